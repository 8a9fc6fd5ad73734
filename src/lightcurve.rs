//! Photometric time series: raw archive products and the cleaned,
//! baseline-subtracted [`Lightcurve`] every downstream stage works on.
//!
//! Cleaning follows the usual order for space photometry:
//!
//! 1. drop flagged and non-finite samples, sort by time, drop duplicate timestamps
//! 2. iterative sigma clipping of flux outliers around the median
//! 3. divide by the median flux and subtract 1, so the baseline sits at 0
//!
//! A lightcurve whose median flux is non-positive (or numerically zero)
//! cannot be normalised and is rejected as degenerate.

use thiserror::Error;

use crate::signal::{median, std_dev};

/// Median flux magnitudes below this are treated as zero.
const DEGENERATE_MEDIAN: f64 = 1e-12;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LightcurveError {
    #[error("lightcurve has no samples")]
    Empty,
    #[error("column lengths differ: time={time}, flux={flux}, flux_err={flux_err}")]
    LengthMismatch {
        time: usize,
        flux: usize,
        flux_err: usize,
    },
    #[error("non-finite time or flux at sample {0}")]
    NonFinite(usize),
    #[error("time is not strictly increasing at sample {0}")]
    NotIncreasing(usize),
    #[error("median flux {0} is non-positive or zero; cannot normalise")]
    DegenerateMedian(f64),
}

/// Parameters for turning a raw product into a [`Lightcurve`].
#[derive(Debug, Clone)]
pub struct CleaningConfig {
    /// Sigma-clipping threshold for flux outliers. Default 5.0.
    pub outlier_sigma: f64,
    /// Maximum sigma-clipping passes. Default 5.
    pub max_clip_iterations: usize,
    /// Drop samples whose quality flag is non-zero. Default true.
    pub require_zero_quality: bool,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            outlier_sigma: 5.0,
            max_clip_iterations: 5,
            require_zero_quality: true,
        }
    }
}

/// One downloaded exposure as delivered by the archive, before any cleaning.
///
/// Columns may contain NaNs and need not be sorted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawLightcurve {
    pub time: Vec<f64>,
    pub flux: Vec<f64>,
    pub flux_err: Vec<f64>,
    /// Per-sample quality bitmask (0 = good), when the product carries one.
    pub quality: Option<Vec<i32>>,
}

impl RawLightcurve {
    /// Drop missing and outlier samples, then normalise to a zero baseline.
    pub fn clean(&self, config: &CleaningConfig) -> Result<Lightcurve, LightcurveError> {
        let n = self.time.len();
        if self.flux.len() != n || self.flux_err.len() != n {
            return Err(LightcurveError::LengthMismatch {
                time: n,
                flux: self.flux.len(),
                flux_err: self.flux_err.len(),
            });
        }

        let mut rows: Vec<(f64, f64, f64)> = (0..n)
            .filter(|&i| {
                let good_quality = !config.require_zero_quality
                    || self
                        .quality
                        .as_ref()
                        .and_then(|q| q.get(i))
                        .map_or(true, |&q| q == 0);
                good_quality && self.time[i].is_finite() && self.flux[i].is_finite()
            })
            .map(|i| {
                let err = if self.flux_err[i].is_finite() { self.flux_err[i] } else { 0.0 };
                (self.time[i], self.flux[i], err)
            })
            .collect();

        if rows.is_empty() {
            return Err(LightcurveError::Empty);
        }

        rows.sort_by(|a, b| a.0.total_cmp(&b.0));
        rows.dedup_by(|b, a| b.0 == a.0);

        let rows = sigma_clip(rows, config.outlier_sigma, config.max_clip_iterations);
        let (time, flux, flux_err) = unzip3(rows);

        Lightcurve::new(time, flux, flux_err)?.normalize()
    }
}

/// Iteratively remove samples whose flux deviates from the median by more
/// than `sigma` standard deviations.
fn sigma_clip(mut rows: Vec<(f64, f64, f64)>, sigma: f64, max_iterations: usize) -> Vec<(f64, f64, f64)> {
    for _ in 0..max_iterations {
        let flux: Vec<f64> = rows.iter().map(|r| r.1).collect();
        let (Some(med), Some(sd)) = (median(&flux), std_dev(&flux)) else {
            break;
        };
        if sd <= 0.0 {
            break;
        }
        let threshold = sigma * sd;
        let before = rows.len();
        rows.retain(|r| (r.1 - med).abs() <= threshold);
        if rows.len() == before {
            break;
        }
    }
    rows
}

fn unzip3(rows: Vec<(f64, f64, f64)>) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let mut time = Vec::with_capacity(rows.len());
    let mut flux = Vec::with_capacity(rows.len());
    let mut flux_err = Vec::with_capacity(rows.len());
    for (t, f, e) in rows {
        time.push(t);
        flux.push(f);
        flux_err.push(e);
    }
    (time, flux, flux_err)
}

/// Cleaned photometric time series.
///
/// Invariants (checked by [`Lightcurve::new`]): at least one sample, equal
/// column lengths, finite time and flux, strictly increasing time.
#[derive(Debug, Clone, PartialEq)]
pub struct Lightcurve {
    time: Vec<f64>,
    flux: Vec<f64>,
    flux_err: Vec<f64>,
}

impl Lightcurve {
    pub fn new(time: Vec<f64>, flux: Vec<f64>, flux_err: Vec<f64>) -> Result<Self, LightcurveError> {
        if time.len() != flux.len() || time.len() != flux_err.len() {
            return Err(LightcurveError::LengthMismatch {
                time: time.len(),
                flux: flux.len(),
                flux_err: flux_err.len(),
            });
        }
        if time.is_empty() {
            return Err(LightcurveError::Empty);
        }
        if let Some(i) = (0..time.len()).find(|&i| !time[i].is_finite() || !flux[i].is_finite()) {
            return Err(LightcurveError::NonFinite(i));
        }
        if let Some(i) = time.windows(2).position(|w| w[1] <= w[0]) {
            return Err(LightcurveError::NotIncreasing(i + 1));
        }
        Ok(Self { time, flux, flux_err })
    }

    /// Time stamps in days.
    pub fn time(&self) -> &[f64] {
        &self.time
    }

    /// Normalised flux, baseline at 0.
    pub fn flux(&self) -> &[f64] {
        &self.flux
    }

    pub fn flux_err(&self) -> &[f64] {
        &self.flux_err
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    /// Always `false`; a `Lightcurve` holds at least one sample.
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn start_time(&self) -> f64 {
        self.time[0]
    }

    pub fn end_time(&self) -> f64 {
        self.time[self.time.len() - 1]
    }

    /// Observing span in days.
    pub fn duration_days(&self) -> f64 {
        self.end_time() - self.start_time()
    }

    /// Divide flux and errors by the median flux and subtract 1.
    pub fn normalize(self) -> Result<Self, LightcurveError> {
        let med = median(&self.flux).ok_or(LightcurveError::Empty)?;
        if !(med > DEGENERATE_MEDIAN) {
            return Err(LightcurveError::DegenerateMedian(med));
        }
        let inv = 1.0 / med;
        Ok(Self {
            flux: self.flux.iter().map(|&f| f * inv - 1.0).collect(),
            flux_err: self.flux_err.iter().map(|&e| e * inv).collect(),
            time: self.time,
        })
    }

    /// Concatenate another lightcurve, keeping time order.
    ///
    /// Samples of `other` that share a timestamp with an existing sample are dropped.
    pub fn append(self, other: Lightcurve) -> Lightcurve {
        let mut rows: Vec<(f64, f64, f64)> = self
            .into_rows()
            .into_iter()
            .chain(other.into_rows())
            .collect();
        rows.sort_by(|a, b| a.0.total_cmp(&b.0));
        rows.dedup_by(|b, a| b.0 == a.0);
        let (time, flux, flux_err) = unzip3(rows);
        Lightcurve { time, flux, flux_err }
    }

    fn into_rows(self) -> Vec<(f64, f64, f64)> {
        self.time
            .into_iter()
            .zip(self.flux)
            .zip(self.flux_err)
            .map(|((t, f), e)| (t, f, e))
            .collect()
    }

    /// Combined differential photometric precision in parts per million.
    ///
    /// Long-term trends are removed with a centred moving average over
    /// `detrend_window` samples, residuals beyond 5σ are clipped, and the
    /// standard deviation of a running mean over `transit_samples` samples is
    /// returned. Returns NaN when the series is too short to evaluate.
    pub fn cdpp_ppm(&self, transit_samples: usize, detrend_window: usize) -> f64 {
        let n = self.flux.len();
        if n < transit_samples.max(2) || transit_samples == 0 {
            return f64::NAN;
        }
        let half = detrend_window / 2;
        let mut prefix = vec![0.0; n + 1];
        for (i, &f) in self.flux.iter().enumerate() {
            prefix[i + 1] = prefix[i] + f;
        }
        let detrended: Vec<f64> = (0..n)
            .map(|i| {
                let lo = i.saturating_sub(half);
                let hi = (i + half + 1).min(n);
                let trend = (prefix[hi] - prefix[lo]) / (hi - lo) as f64;
                self.flux[i] - trend
            })
            .collect();

        let clipped: Vec<f64> = match (median(&detrended), std_dev(&detrended)) {
            (Some(med), Some(sd)) if sd > 0.0 => detrended
                .into_iter()
                .filter(|r| (r - med).abs() <= 5.0 * sd)
                .collect(),
            _ => detrended,
        };
        if clipped.len() < transit_samples {
            return f64::NAN;
        }

        let running: Vec<f64> = clipped
            .windows(transit_samples)
            .map(|w| w.iter().sum::<f64>() / transit_samples as f64)
            .collect();
        std_dev(&running).map_or(f64::NAN, |sd| sd * 1e6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(time: Vec<f64>, flux: Vec<f64>) -> RawLightcurve {
        let n = time.len();
        RawLightcurve {
            time,
            flux,
            flux_err: vec![1.0; n],
            quality: None,
        }
    }

    #[test]
    fn test_new_rejects_invariant_violations() {
        assert_eq!(Lightcurve::new(vec![], vec![], vec![]), Err(LightcurveError::Empty));
        assert_eq!(
            Lightcurve::new(vec![1.0, 1.0], vec![0.0, 0.0], vec![0.0, 0.0]),
            Err(LightcurveError::NotIncreasing(1))
        );
        assert_eq!(
            Lightcurve::new(vec![1.0, 2.0], vec![0.0, f64::NAN], vec![0.0, 0.0]),
            Err(LightcurveError::NonFinite(1))
        );
        assert!(matches!(
            Lightcurve::new(vec![1.0], vec![0.0, 1.0], vec![0.0]),
            Err(LightcurveError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_clean_drops_nans_sorts_and_normalizes() {
        let r = raw(
            vec![3.0, 1.0, f64::NAN, 2.0, 4.0],
            vec![100.0, 100.0, 100.0, f64::NAN, 100.0],
        );
        let lc = r.clean(&CleaningConfig::default()).unwrap();
        assert_eq!(lc.time(), &[1.0, 3.0, 4.0]);
        assert!(lc.flux().iter().all(|f| f.abs() < 1e-12), "flux={:?}", lc.flux());
        assert!((lc.flux_err()[0] - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_clean_drops_flagged_quality() {
        let mut r = raw(vec![1.0, 2.0, 3.0], vec![10.0, 500.0, 10.0]);
        r.quality = Some(vec![0, 128, 0]);
        let lc = r.clean(&CleaningConfig::default()).unwrap();
        assert_eq!(lc.time(), &[1.0, 3.0]);
    }

    #[test]
    fn test_clean_clips_outliers() {
        let n = 200;
        let time: Vec<f64> = (0..n).map(|i| i as f64 * 0.01).collect();
        let mut flux: Vec<f64> = (0..n).map(|i| 1000.0 + if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        flux[50] = 5000.0;
        let lc = raw(time, flux).clean(&CleaningConfig::default()).unwrap();
        assert_eq!(lc.len(), n - 1);
        assert!(lc.flux().iter().all(|f| f.abs() < 0.01));
    }

    #[test]
    fn test_degenerate_median_rejected() {
        let r = raw(vec![1.0, 2.0, 3.0], vec![-5.0, -4.0, -6.0]);
        assert!(matches!(
            r.clean(&CleaningConfig::default()),
            Err(LightcurveError::DegenerateMedian(_))
        ));
        let r = raw(vec![1.0, 2.0, 3.0], vec![0.0, 0.0, 0.0]);
        assert!(matches!(
            r.clean(&CleaningConfig::default()),
            Err(LightcurveError::DegenerateMedian(_))
        ));
    }

    #[test]
    fn test_append_keeps_time_order() {
        let a = Lightcurve::new(vec![5.0, 6.0], vec![0.1, 0.2], vec![0.0, 0.0]).unwrap();
        let b = Lightcurve::new(vec![1.0, 2.0, 6.0], vec![0.3, 0.4, 0.9], vec![0.0; 3]).unwrap();
        let c = a.append(b);
        assert_eq!(c.time(), &[1.0, 2.0, 5.0, 6.0]);
        assert_eq!(c.flux(), &[0.3, 0.4, 0.1, 0.2]);
    }

    #[test]
    fn test_cdpp_orders_by_noise() {
        let time: Vec<f64> = (0..2000).map(|i| i as f64 / 720.0).collect();
        // Deterministic pseudo-noise with two amplitudes
        let noise = |scale: f64| -> Vec<f64> {
            (0..2000)
                .map(|i| scale * (((i * 7919) % 113) as f64 / 113.0 - 0.5))
                .collect()
        };
        let quiet = Lightcurve::new(time.clone(), noise(1e-4), vec![0.0; 2000]).unwrap();
        let loud = Lightcurve::new(time, noise(1e-3), vec![0.0; 2000]).unwrap();
        let (q, l) = (quiet.cdpp_ppm(13, 101), loud.cdpp_ppm(13, 101));
        assert!(q.is_finite() && l.is_finite());
        assert!(q < l, "quiet={} loud={}", q, l);
    }

    #[test]
    fn test_cdpp_too_short_is_nan() {
        let lc = Lightcurve::new(vec![1.0, 2.0], vec![0.0, 0.1], vec![0.0, 0.0]).unwrap();
        assert!(lc.cdpp_ppm(13, 101).is_nan());
    }
}
