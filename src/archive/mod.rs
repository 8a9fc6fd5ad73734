//! Photometry archive collaborator.
//!
//! An archive answers two questions: which exposures exist for a target, and
//! what the raw lightcurve of a given exposure is. Network access, caching and
//! authentication are the implementor's concern; the pipeline only sees the
//! [`Archive`] trait and treats any error it returns as "no usable data" for
//! the star being processed.

pub mod local;

pub use local::LocalArchive;

use crate::lightcurve::RawLightcurve;

/// One downloadable product returned by an archive search.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureDescriptor {
    /// Sampling cadence in seconds (e.g. 20, 120, 1800).
    pub cadence_s: f64,
    /// Archive-specific product identifier, passed back to [`Archive::download`].
    pub product_id: String,
    /// Archive object number of the target (e.g. a TIC id), when known.
    pub object_id: Option<u64>,
}

/// Source of raw photometry.
pub trait Archive {
    /// List the exposures available for `target`.
    fn search(&self, target: &str) -> anyhow::Result<Vec<ExposureDescriptor>>;

    /// Fetch the raw lightcurve of one exposure.
    fn download(&self, exposure: &ExposureDescriptor) -> anyhow::Result<RawLightcurve>;
}

impl<A: Archive + ?Sized> Archive for &A {
    fn search(&self, target: &str) -> anyhow::Result<Vec<ExposureDescriptor>> {
        (**self).search(target)
    }

    fn download(&self, exposure: &ExposureDescriptor) -> anyhow::Result<RawLightcurve> {
        (**self).download(exposure)
    }
}
