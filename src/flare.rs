//! Flare-probability predictor collaborator.
//!
//! A predictor scores each sample of a lightcurve with the probability that it
//! belongs to a flare. It only annotates the Flares review view; the operator
//! still makes the call.

use anyhow::{ensure, Result};

/// Per-sample flare probability model.
pub trait FlarePredictor {
    /// Probability of flare for each sample. Must return one value per sample.
    fn predict(&self, time: &[f64], flux: &[f64], flux_err: &[f64]) -> Result<Vec<f64>>;
}

/// Run `predictor` and enforce its output contract: one value per sample,
/// clamped to `[0, 1]`. NaN probabilities are reported as 0.
pub fn predict_checked(
    predictor: &dyn FlarePredictor,
    time: &[f64],
    flux: &[f64],
    flux_err: &[f64],
) -> Result<Vec<f64>> {
    let probabilities = predictor.predict(time, flux, flux_err)?;
    ensure!(
        probabilities.len() == time.len(),
        "flare predictor returned {} probabilities for {} samples",
        probabilities.len(),
        time.len()
    );
    Ok(probabilities
        .into_iter()
        .map(|p| if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) })
        .collect())
}

/// Fraction of samples scored above `threshold`.
pub fn flagged_fraction(probabilities: &[f64], threshold: f64) -> f64 {
    if probabilities.is_empty() {
        return 0.0;
    }
    probabilities.iter().filter(|&&p| p > threshold).count() as f64 / probabilities.len() as f64
}
