//! Lomb–Scargle period search.
//!
//! The periodogram is evaluated on a uniform frequency grid between
//! `1 / maximum_period` and `1 / minimum_period` with spacing
//! `1 / (oversample_factor · baseline)`. Power is the least-squares sinusoid
//! fit expressed as a semi-amplitude in flux units, so a clean sine of
//! amplitude `A` peaks at `≈ A`.
//!
//! Trigonometric sums are advanced with a per-sample rotation recurrence
//! instead of calling `sin_cos` for every (frequency, sample) pair.
//!
//! The period at maximum power is never trusted on its own: harmonic
//! aliasing makes P/2 and 2P equally likely for binaries, so the search
//! returns all three as a [`CandidateSet`] and leaves the choice to the reviewer.

use std::f64::consts::TAU;

use thiserror::Error;
use tracing::{debug, warn};

use crate::lightcurve::Lightcurve;
use crate::signal::{self, Plausibility};

/// Upper bound of the search range (days). Longer periods are unreliable for
/// the typical ~27 day observing sectors.
pub const DEFAULT_MAXIMUM_PERIOD_DAYS: f64 = 14.0;

/// Default grid oversampling.
pub const DEFAULT_OVERSAMPLE_FACTOR: f64 = 10.0;

/// Default cap on the number of trial frequencies.
pub const DEFAULT_MAX_FREQUENCIES: usize = 200_000;

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PeriodogramError {
    #[error("need at least 3 samples for a periodogram, got {0}")]
    TooFewSamples(usize),
    #[error("lightcurve has zero time baseline")]
    ZeroBaseline,
    #[error("invalid period range [{min}, {max}] days")]
    InvalidRange { min: f64, max: f64 },
    #[error("oversample factor must be >= 1, got {0}")]
    InvalidOversample(f64),
    #[error("frequency grid cap must be at least 2, got {0}")]
    InvalidGridCap(usize),
    #[error("periodogram has no finite power")]
    NoPeak,
}

/// Search range and grid density.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodogramConfig {
    /// Frequency grid oversampling relative to `1 / baseline`. Default 10.
    pub oversample_factor: f64,
    /// Shortest trial period in days. Default twice the cadence.
    pub minimum_period_days: f64,
    /// Longest trial period in days. Default 14.
    pub maximum_period_days: f64,
    /// Most trial frequencies evaluated. Long multi-sector baselines widen
    /// the spacing to stay under it. Default 200 000.
    pub max_frequencies: usize,
}

impl PeriodogramConfig {
    /// Defaults for a given sampling cadence: the shortest period is two
    /// cadences (the Nyquist limit).
    pub fn for_cadence(cadence_s: f64) -> Self {
        Self {
            oversample_factor: DEFAULT_OVERSAMPLE_FACTOR,
            minimum_period_days: 2.0 * cadence_s / SECONDS_PER_DAY,
            maximum_period_days: DEFAULT_MAXIMUM_PERIOD_DAYS,
            max_frequencies: DEFAULT_MAX_FREQUENCIES,
        }
    }

    pub fn validate(&self) -> Result<(), PeriodogramError> {
        if !(self.oversample_factor >= 1.0) {
            return Err(PeriodogramError::InvalidOversample(self.oversample_factor));
        }
        if self.max_frequencies < 2 {
            return Err(PeriodogramError::InvalidGridCap(self.max_frequencies));
        }
        if !(self.minimum_period_days > 0.0
            && self.maximum_period_days.is_finite()
            && self.minimum_period_days < self.maximum_period_days)
        {
            return Err(PeriodogramError::InvalidRange {
                min: self.minimum_period_days,
                max: self.maximum_period_days,
            });
        }
        Ok(())
    }
}

impl Default for PeriodogramConfig {
    fn default() -> Self {
        Self::for_cadence(120.0)
    }
}

/// Power spectrum over trial periods.
///
/// Samples are stored in ascending frequency, i.e. descending period.
/// Power is NaN where the least-squares problem is singular.
#[derive(Debug, Clone)]
pub struct Periodogram {
    pub frequency: Vec<f64>,
    pub period: Vec<f64>,
    pub power: Vec<f64>,
}

impl Periodogram {
    /// Evaluate the amplitude-normalised Lomb–Scargle periodogram of `lc`.
    pub fn compute(lc: &Lightcurve, config: &PeriodogramConfig) -> Result<Self, PeriodogramError> {
        config.validate()?;
        let n = lc.len();
        if n < 3 {
            return Err(PeriodogramError::TooFewSamples(n));
        }
        let baseline = lc.duration_days();
        if !(baseline > 0.0) {
            return Err(PeriodogramError::ZeroBaseline);
        }

        let f_min = 1.0 / config.maximum_period_days;
        let f_max = 1.0 / config.minimum_period_days;
        let mut df = 1.0 / (config.oversample_factor * baseline);
        let mut n_freq = ((f_max - f_min) / df).floor() as usize + 1;
        if n_freq > config.max_frequencies {
            let wanted = n_freq;
            n_freq = config.max_frequencies;
            df = (f_max - f_min) / (n_freq - 1) as f64;
            warn!(
                "Periodogram grid of {} frequencies capped at {} (baseline {:.1} d), df={:.3e}",
                wanted, n_freq, baseline, df
            );
        }
        debug!(
            "Periodogram grid: {} frequencies in [{:.5}, {:.3}] /d, df={:.3e}, {} samples",
            n_freq, f_min, f_max, df, n
        );

        let t0 = lc.start_time();
        let t: Vec<f64> = lc.time().iter().map(|&x| x - t0).collect();
        let y_mean = signal::mean(lc.flux()).unwrap_or(0.0);
        let y: Vec<f64> = lc.flux().iter().map(|&f| f - y_mean).collect();

        // Per-sample phasor at f_min and per-step rotation by df
        let mut cos_wt = Vec::with_capacity(n);
        let mut sin_wt = Vec::with_capacity(n);
        let mut cos_step = Vec::with_capacity(n);
        let mut sin_step = Vec::with_capacity(n);
        for &ti in &t {
            let (s, c) = (TAU * f_min * ti).sin_cos();
            cos_wt.push(c);
            sin_wt.push(s);
            let (s, c) = (TAU * df * ti).sin_cos();
            cos_step.push(c);
            sin_step.push(s);
        }

        let mut frequency = Vec::with_capacity(n_freq);
        let mut power = Vec::with_capacity(n_freq);
        let singular = 1e-12 * (n as f64) * (n as f64);

        for k in 0..n_freq {
            let (mut yc, mut ys, mut cc, mut ss, mut cs) = (0.0, 0.0, 0.0, 0.0, 0.0);
            for i in 0..n {
                let (c, s) = (cos_wt[i], sin_wt[i]);
                yc += y[i] * c;
                ys += y[i] * s;
                cc += c * c;
                ss += s * s;
                cs += c * s;
                cos_wt[i] = c * cos_step[i] - s * sin_step[i];
                sin_wt[i] = s * cos_step[i] + c * sin_step[i];
            }

            let det = cc * ss - cs * cs;
            let p = if det > singular {
                let psd = 0.5 * (yc * yc * ss - 2.0 * yc * ys * cs + ys * ys * cc) / det;
                (4.0 * psd.max(0.0) / n as f64).sqrt()
            } else {
                f64::NAN
            };
            frequency.push(f_min + k as f64 * df);
            power.push(p);
        }

        let period = frequency.iter().map(|f| 1.0 / f).collect();
        Ok(Self {
            frequency,
            period,
            power,
        })
    }

    pub fn len(&self) -> usize {
        self.power.len()
    }

    pub fn is_empty(&self) -> bool {
        self.power.is_empty()
    }

    fn argmax(&self) -> Option<usize> {
        self.power
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_finite())
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
    }

    /// Period with the highest power, ignoring NaN samples.
    pub fn period_at_max_power(&self) -> Option<f64> {
        self.argmax().map(|i| self.period[i])
    }

    pub fn max_power(&self) -> Option<f64> {
        self.argmax().map(|i| self.power[i])
    }

    /// Population standard deviation of the valid power samples.
    pub fn power_std(&self) -> Option<f64> {
        signal::std_dev(&self.power)
    }

    /// Power at `period`, linearly interpolated along the period axis.
    ///
    /// NaN outside the sampled period range.
    pub fn power_at(&self, period: f64) -> f64 {
        if self.is_empty() || !period.is_finite() {
            return f64::NAN;
        }
        // Stored in descending period; walk it from the short end.
        let n = self.len();
        let p = |j: usize| self.period[n - 1 - j];
        let w = |j: usize| self.power[n - 1 - j];

        if period < p(0) || period > p(n - 1) {
            return f64::NAN;
        }
        let hi = (0..n).find(|&j| p(j) >= period).unwrap_or(n - 1);
        if hi == 0 || p(hi) == period {
            return w(hi);
        }
        let lo = hi - 1;
        let frac = (period - p(lo)) / (p(hi) - p(lo));
        w(lo) + frac * (w(hi) - w(lo))
    }

    /// Significance of `candidate_period` against this periodogram.
    pub fn plausibility(&self, candidate_period: f64) -> Plausibility {
        signal::plausibility(&self.power, &self.period, candidate_period)
    }
}

/// The three alias candidates `[P/2, P, 2P]`, in that order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateSet([f64; 3]);

impl CandidateSet {
    /// Candidates around a peak period. `None` unless `period` is positive and finite.
    pub fn from_peak(period: f64) -> Option<Self> {
        (period.is_finite() && period > 0.0).then(|| Self([period / 2.0, period, period * 2.0]))
    }

    /// Candidate by its 1-based operator key.
    pub fn get(&self, choice: usize) -> Option<f64> {
        choice.checked_sub(1).and_then(|i| self.0.get(i).copied())
    }

    pub fn as_array(&self) -> [f64; 3] {
        self.0
    }

    /// The period at maximum power.
    pub fn peak(&self) -> f64 {
        self.0[1]
    }
}

/// Everything the review needs from the period search.
#[derive(Debug, Clone)]
pub struct PeriodSearch {
    pub periodogram: Periodogram,
    pub best_period: f64,
    pub max_power: f64,
    pub candidates: CandidateSet,
    /// Advisory verdict for `best_period`.
    pub plausibility: Plausibility,
}

/// Compute the periodogram of `lc` and derive the peak, its aliases and
/// the plausibility of the peak.
pub fn search(lc: &Lightcurve, config: &PeriodogramConfig) -> Result<PeriodSearch, PeriodogramError> {
    let periodogram = Periodogram::compute(lc, config)?;
    let best_period = periodogram.period_at_max_power().ok_or(PeriodogramError::NoPeak)?;
    let max_power = periodogram.max_power().ok_or(PeriodogramError::NoPeak)?;
    let candidates = CandidateSet::from_peak(best_period).ok_or(PeriodogramError::NoPeak)?;
    let plausibility = periodogram.plausibility(best_period);
    debug!(
        "Peak period {:.6} d, power {:.3e}, cutoff {:.3e}, plausible={}",
        best_period, max_power, plausibility.cutoff, plausibility.is_plausible
    );
    Ok(PeriodSearch {
        periodogram,
        best_period,
        max_power,
        candidates,
        plausibility,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::sine;

    fn synthetic(period: f64, amplitude: f64, days: f64, step: f64) -> Lightcurve {
        let n = (days / step) as usize;
        let time: Vec<f64> = (0..n).map(|i| 2000.0 + i as f64 * step).collect();
        let flux: Vec<f64> = time
            .iter()
            .enumerate()
            .map(|(i, &t)| {
                // Small deterministic jitter so the series is not a pure tone
                let jitter = 1e-4 * (((i * 7919) % 101) as f64 / 101.0 - 0.5);
                sine(t, amplitude, 1.0 / period, 0.4) + jitter
            })
            .collect();
        let n = time.len();
        Lightcurve::new(time, flux, vec![1e-4; n]).unwrap()
    }

    fn config() -> PeriodogramConfig {
        PeriodogramConfig {
            oversample_factor: 10.0,
            minimum_period_days: 0.1,
            maximum_period_days: 5.0,
            max_frequencies: DEFAULT_MAX_FREQUENCIES,
        }
    }

    #[test]
    fn test_recovers_injected_period() {
        let lc = synthetic(1.3, 0.01, 12.0, 1.0 / 48.0);
        let result = search(&lc, &config()).unwrap();
        let rel = (result.best_period - 1.3).abs() / 1.3;
        assert!(rel < 0.01, "best period {} vs 1.3", result.best_period);
        assert!(
            (result.max_power - 0.01).abs() < 0.001,
            "amplitude-normalised peak {} should be near 0.01",
            result.max_power
        );
    }

    #[test]
    fn test_grid_spans_configured_range() {
        let lc = synthetic(1.3, 0.01, 12.0, 1.0 / 48.0);
        let pg = Periodogram::compute(&lc, &config()).unwrap();
        assert!((pg.period[0] - 5.0).abs() < 1e-9);
        assert!(*pg.period.last().unwrap() >= 0.1 - 1e-9);
        assert!(pg.frequency.windows(2).all(|w| w[0] < w[1]));
        let df = pg.frequency[1] - pg.frequency[0];
        let expected = 1.0 / (10.0 * lc.duration_days());
        assert!((df - expected).abs() < 1e-12, "df={} expected={}", df, expected);
    }

    #[test]
    fn test_long_baseline_grid_is_capped() {
        let lc = synthetic(1.3, 0.01, 12.0, 1.0 / 48.0);
        let cfg = PeriodogramConfig {
            max_frequencies: 100,
            ..config()
        };
        let pg = Periodogram::compute(&lc, &cfg).unwrap();
        assert_eq!(pg.len(), 100);
        assert!((pg.period[0] - 5.0).abs() < 1e-9);
        assert!((pg.period[99] - 0.1).abs() < 1e-9);

        let mut bad = config();
        bad.max_frequencies = 1;
        assert_eq!(bad.validate(), Err(PeriodogramError::InvalidGridCap(1)));
    }

    #[test]
    fn test_candidates_are_ordered_aliases() {
        for p in [0.013, 0.5, 1.0, 3.7, 14.0] {
            let c = CandidateSet::from_peak(p).unwrap();
            let [a, b, d] = c.as_array();
            assert_eq!(a, p / 2.0);
            assert_eq!(b, p);
            assert_eq!(d, 2.0 * p);
            assert!(a < b && b < d);
            assert_eq!(c.get(1), Some(a));
            assert_eq!(c.get(3), Some(d));
            assert_eq!(c.get(0), None);
            assert_eq!(c.get(4), None);
        }
        assert!(CandidateSet::from_peak(0.0).is_none());
        assert!(CandidateSet::from_peak(f64::NAN).is_none());
    }

    #[test]
    fn test_power_at_interpolates() {
        let pg = Periodogram {
            frequency: vec![0.25, 0.5, 1.0],
            period: vec![4.0, 2.0, 1.0],
            power: vec![0.4, 0.2, 0.0],
        };
        assert!((pg.power_at(1.5) - 0.1).abs() < 1e-12);
        assert!((pg.power_at(3.0) - 0.3).abs() < 1e-12);
        assert!((pg.power_at(2.0) - 0.2).abs() < 1e-12);
        assert!(pg.power_at(0.5).is_nan());
        assert!(pg.power_at(8.0).is_nan());
    }

    #[test]
    fn test_rejects_degenerate_input() {
        let lc = Lightcurve::new(vec![1.0, 2.0], vec![0.0, 0.1], vec![0.0; 2]).unwrap();
        assert_eq!(
            Periodogram::compute(&lc, &config()).unwrap_err(),
            PeriodogramError::TooFewSamples(2)
        );
        let mut bad = config();
        bad.minimum_period_days = 6.0;
        let lc = synthetic(1.3, 0.01, 2.0, 0.1);
        assert!(matches!(
            Periodogram::compute(&lc, &bad),
            Err(PeriodogramError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_for_cadence_floor() {
        let c = PeriodogramConfig::for_cadence(120.0);
        assert!((c.minimum_period_days - 240.0 / 86_400.0).abs() < 1e-15);
        assert_eq!(c.maximum_period_days, 14.0);
        assert_eq!(c.oversample_factor, 10.0);
        assert_eq!(c.max_frequencies, DEFAULT_MAX_FREQUENCIES);
    }
}
