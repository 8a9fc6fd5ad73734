//! Build one cleaned lightcurve per star from the archive's raw exposures.
//!
//! Two strategies are available, selected by [`ExposureSelection`]:
//!
//! - **Append**: every exposure at the requested cadence is cleaned,
//!   normalised and concatenated in time order.
//! - **BestPrecision**: every exposure at the requested cadence is cleaned and
//!   normalised, and the one with the lowest CDPP is kept.
//!
//! Archive failures, missing cadences and degenerate exposures never escape as
//! anything other than [`PipelineError::NoDataForStar`].

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::archive::{Archive, ExposureDescriptor};
use crate::error::PipelineError;
use crate::lightcurve::{CleaningConfig, Lightcurve};

/// Cadence values closer than this (seconds) are considered equal.
const CADENCE_TOLERANCE_S: f64 = 1e-6;

/// Running-mean length for CDPP ranking (~26 min at 2 min cadence).
const CDPP_TRANSIT_SAMPLES: usize = 13;
/// Detrending window for CDPP ranking.
const CDPP_DETREND_WINDOW: usize = 101;

/// How multiple exposures at the requested cadence are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExposureSelection {
    /// Concatenate every matching exposure.
    #[default]
    Append,
    /// Keep the single matching exposure with the lowest CDPP.
    BestPrecision,
}

/// Lightcurve assembled for one star.
#[derive(Debug, Clone)]
pub struct RetrievedLightcurve {
    pub lightcurve: Lightcurve,
    /// Archive object id reported by the first usable exposure.
    pub object_id: Option<u64>,
    /// Number of exposures that contributed samples.
    pub exposures_used: usize,
}

/// Retrieve, clean and combine the exposures of `target` at `cadence_s`.
pub fn retrieve<A: Archive + ?Sized>(
    archive: &A,
    target: &str,
    cadence_s: f64,
    selection: ExposureSelection,
    cleaning: &CleaningConfig,
) -> Result<RetrievedLightcurve, PipelineError> {
    let exposures = archive
        .search(target)
        .map_err(|e| PipelineError::no_data(target, format!("archive search failed: {:#}", e)))?;

    let matching: Vec<&ExposureDescriptor> = exposures
        .iter()
        .filter(|e| (e.cadence_s - cadence_s).abs() < CADENCE_TOLERANCE_S)
        .collect();
    debug!(
        "{}: {} of {} exposures at {} s cadence",
        target,
        matching.len(),
        exposures.len(),
        cadence_s
    );
    if matching.is_empty() {
        return Err(PipelineError::no_data(
            target,
            format!("no exposure at {} s cadence", cadence_s),
        ));
    }

    let mut cleaned: Vec<(Lightcurve, Option<u64>)> = Vec::with_capacity(matching.len());
    for exposure in matching {
        match load_exposure(archive, exposure, cleaning) {
            Ok(lc) => cleaned.push((lc, exposure.object_id)),
            Err(reason) => warn!("{}: skipping exposure {}: {}", target, exposure.product_id, reason),
        }
    }
    if cleaned.is_empty() {
        return Err(PipelineError::no_data(
            target,
            "every exposure failed to download or was degenerate",
        ));
    }

    let object_id = cleaned.iter().find_map(|(_, id)| *id);
    let result = match selection {
        ExposureSelection::Append => {
            let exposures_used = cleaned.len();
            let mut iter = cleaned.into_iter().map(|(lc, _)| lc);
            // cleaned is non-empty
            let first = iter.next().ok_or_else(|| PipelineError::no_data(target, "no exposures"))?;
            RetrievedLightcurve {
                lightcurve: iter.fold(first, Lightcurve::append),
                object_id,
                exposures_used,
            }
        }
        ExposureSelection::BestPrecision => RetrievedLightcurve {
            lightcurve: select_best_precision(target, cleaned.into_iter().map(|(lc, _)| lc))
                .ok_or_else(|| PipelineError::no_data(target, "no exposures"))?,
            object_id,
            exposures_used: 1,
        },
    };

    info!(
        "{}: {} samples from {} exposure(s), span {:.2} d",
        target,
        result.lightcurve.len(),
        result.exposures_used,
        result.lightcurve.duration_days()
    );
    Ok(result)
}

fn load_exposure<A: Archive + ?Sized>(
    archive: &A,
    exposure: &ExposureDescriptor,
    cleaning: &CleaningConfig,
) -> Result<Lightcurve, String> {
    let raw = archive.download(exposure).map_err(|e| format!("{:#}", e))?;
    raw.clean(cleaning).map_err(|e| e.to_string())
}

/// Keep the exposure with the lowest CDPP.
///
/// An exposure replaces the running best only when its CDPP is strictly
/// lower. When no exposure has a finite CDPP the last one is returned.
fn select_best_precision(
    target: &str,
    candidates: impl IntoIterator<Item = Lightcurve>,
) -> Option<Lightcurve> {
    let mut best: Option<(f64, Lightcurve)> = None;
    let mut last: Option<Lightcurve> = None;

    for lc in candidates {
        let cdpp = lc.cdpp_ppm(CDPP_TRANSIT_SAMPLES, CDPP_DETREND_WINDOW);
        debug!("{}: exposure CDPP {:.1} ppm", target, cdpp);
        let improves = cdpp.is_finite() && best.as_ref().map_or(true, |(b, _)| cdpp < *b);
        if improves {
            best = Some((cdpp, lc.clone()));
        }
        last = Some(lc);
    }
    best.map(|(_, lc)| lc).or(last)
}
