//! Directory-backed archive.
//!
//! Layout under the archive root:
//!
//! ```text
//! <root>/<target>/products.csv        product,cadence_s,object_id
//! <root>/<target>/<product>.csv       time,flux,flux_err[,quality]
//! ```
//!
//! Target names are sanitised into directory names by replacing every
//! character outside `[A-Za-z0-9+._-]` with `_`, so `"SDSS J0101+0101"` maps to
//! `SDSS_J0101+0101`. Missing values in a product file may be left empty or
//! written as `nan`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use super::{Archive, ExposureDescriptor};
use crate::lightcurve::RawLightcurve;

/// Archive reading pre-downloaded products from disk.
#[derive(Debug, Clone)]
pub struct LocalArchive {
    root: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ProductRow {
    product: String,
    cadence_s: f64,
    #[serde(default)]
    object_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SampleRow {
    time: Option<f64>,
    flux: Option<f64>,
    #[serde(default)]
    flux_err: Option<f64>,
    #[serde(default)]
    quality: Option<i32>,
}

/// Directory name used for `target` under the archive root.
pub fn target_dir_name(target: &str) -> String {
    target
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl LocalArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target_dir(&self, target: &str) -> PathBuf {
        self.root.join(target_dir_name(target))
    }
}

impl Archive for LocalArchive {
    fn search(&self, target: &str) -> Result<Vec<ExposureDescriptor>> {
        let index = self.target_dir(target).join("products.csv");
        let mut reader = csv::Reader::from_path(&index)
            .with_context(|| format!("no archive products for {:?} ({})", target, index.display()))?;

        let mut exposures = Vec::new();
        for row in reader.deserialize() {
            let row: ProductRow =
                row.with_context(|| format!("malformed product index {}", index.display()))?;
            exposures.push(ExposureDescriptor {
                cadence_s: row.cadence_s,
                product_id: format!("{}/{}", target_dir_name(target), row.product),
                object_id: row.object_id,
            });
        }
        debug!("{}: {} exposures in local archive", target, exposures.len());
        Ok(exposures)
    }

    fn download(&self, exposure: &ExposureDescriptor) -> Result<RawLightcurve> {
        let path = self.root.join(format!("{}.csv", exposure.product_id));
        let mut reader = csv::Reader::from_path(&path)
            .with_context(|| format!("cannot open product {}", path.display()))?;
        let has_quality = reader
            .headers()
            .with_context(|| format!("cannot read header of {}", path.display()))?
            .iter()
            .any(|h| h == "quality");

        let mut raw = RawLightcurve {
            quality: has_quality.then(Vec::new),
            ..Default::default()
        };
        for row in reader.deserialize() {
            let row: SampleRow =
                row.with_context(|| format!("malformed sample in {}", path.display()))?;
            raw.time.push(row.time.unwrap_or(f64::NAN));
            raw.flux.push(row.flux.unwrap_or(f64::NAN));
            raw.flux_err.push(row.flux_err.unwrap_or(f64::NAN));
            if let Some(q) = raw.quality.as_mut() {
                q.push(row.quality.unwrap_or(0));
            }
        }
        debug!("{}: {} raw samples", exposure.product_id, raw.time.len());
        Ok(raw)
    }
}
