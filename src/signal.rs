//! Stateless numeric building blocks shared by the period search, the sine
//! fitter and the diagnostic views.
//!
//! Everything here is a pure function of its inputs: the sinusoid model,
//! the periodogram plausibility score, folding a time series onto a trial
//! period and binning the folded curve.

use std::f64::consts::TAU;

/// Number of minutes in one day.
pub const MINUTES_PER_DAY: f64 = 1440.0;

/// Significance multiplier applied to the periodogram power scatter.
pub const PLAUSIBILITY_SIGMA: f64 = 5.0;

/// Sinusoid model `amplitude · sin(2π · frequency · x + phase)`.
///
/// This is the exact model minimised by [`crate::sine_fit`].
#[inline]
pub fn sine(x: f64, amplitude: f64, frequency: f64, phase: f64) -> f64 {
    amplitude * (TAU * frequency * x + phase).sin()
}

/// Advisory significance of a candidate period against the periodogram noise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plausibility {
    /// `true` when `|candidate − median(period)|` exceeds [`Self::cutoff`].
    pub is_plausible: bool,
    /// `5σ` of the valid power samples. NaN when σ is undefined.
    pub cutoff: f64,
}

/// Score a candidate period against the periodogram background.
///
/// Samples with undefined (NaN) power are dropped together with their period.
/// The cutoff is five times the population standard deviation of the
/// remaining power. With fewer than two valid samples σ is undefined and the
/// candidate is reported implausible.
pub fn plausibility(power: &[f64], period: &[f64], candidate_period: f64) -> Plausibility {
    let (valid_power, valid_period): (Vec<f64>, Vec<f64>) = power
        .iter()
        .zip(period.iter())
        .filter(|(p, _)| !p.is_nan())
        .map(|(&p, &t)| (p, t))
        .unzip();

    if valid_power.len() < 2 {
        return Plausibility {
            is_plausible: false,
            cutoff: f64::NAN,
        };
    }

    let (Some(sigma), Some(median_period)) = (std_dev(&valid_power), median(&valid_period)) else {
        return Plausibility {
            is_plausible: false,
            cutoff: f64::NAN,
        };
    };
    let cutoff = PLAUSIBILITY_SIGMA * sigma;

    Plausibility {
        is_plausible: (candidate_period - median_period).abs() > cutoff,
        cutoff,
    }
}

/// Bin width in minutes that splits `duration_days` into `target_bins` bins.
///
/// Keeps the number of bins roughly constant regardless of the observing span.
pub fn bin_width_minutes(duration_days: f64, target_bins: usize) -> f64 {
    duration_days * MINUTES_PER_DAY / target_bins.max(1) as f64
}

/// Median of the finite values in `values`, or `None` if there are none.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    if v.is_empty() {
        return None;
    }
    v.sort_by(f64::total_cmp);
    let mid = v.len() / 2;
    if v.len() % 2 == 0 {
        Some((v[mid - 1] + v[mid]) / 2.0)
    } else {
        Some(v[mid])
    }
}

/// Arithmetic mean of the finite values in `values`.
pub fn mean(values: &[f64]) -> Option<f64> {
    let (sum, n) = values
        .iter()
        .filter(|x| x.is_finite())
        .fold((0.0, 0usize), |(s, n), &x| (s + x, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Population standard deviation (ddof = 0) of the finite values in `values`.
///
/// Returns `None` when fewer than two finite values are present.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    if finite.len() < 2 {
        return None;
    }
    let mu = finite.iter().sum::<f64>() / finite.len() as f64;
    let var = finite.iter().map(|x| (x - mu) * (x - mu)).sum::<f64>() / finite.len() as f64;
    Some(var.sqrt())
}

/// Phase of each time sample within `period`, measured from `epoch`.
///
/// Phases lie in `[0, 1)`.
pub fn fold_phase(time: &[f64], period: f64, epoch: f64) -> Vec<f64> {
    time.iter()
        .map(|&t| {
            let p = ((t - epoch) / period).rem_euclid(1.0);
            // rem_euclid can round up to exactly 1.0 for tiny negative inputs
            if p >= 1.0 {
                0.0
            } else {
                p
            }
        })
        .collect()
}

/// A time series folded onto a trial period, sorted by phase.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldedCurve {
    /// Period the curve was folded on (days).
    pub period: f64,
    /// Phase in `[0, 1)`, ascending.
    pub phase: Vec<f64>,
    pub flux: Vec<f64>,
    pub flux_err: Vec<f64>,
}

impl FoldedCurve {
    /// Fold `(time, flux, flux_err)` on `period`, using `epoch` as phase zero.
    pub fn new(time: &[f64], flux: &[f64], flux_err: &[f64], period: f64, epoch: f64) -> Self {
        let phase = fold_phase(time, period, epoch);
        let mut order: Vec<usize> = (0..phase.len()).collect();
        order.sort_by(|&a, &b| phase[a].total_cmp(&phase[b]));

        Self {
            period,
            phase: order.iter().map(|&i| phase[i]).collect(),
            flux: order.iter().map(|&i| flux[i]).collect(),
            flux_err: order
                .iter()
                .map(|&i| flux_err.get(i).copied().unwrap_or(0.0))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.phase.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phase.is_empty()
    }

    /// Span of the folded curve expressed in days of phase-time.
    pub fn duration_days(&self) -> f64 {
        match (self.phase.first(), self.phase.last()) {
            (Some(first), Some(last)) => (last - first) * self.period,
            _ => 0.0,
        }
    }

    /// Average the folded samples in fixed windows of `bin_width_minutes`.
    ///
    /// Empty bins are omitted. The error of each bin is the quadrature sum of
    /// the member errors divided by the member count.
    pub fn bin(&self, bin_width_minutes: f64) -> BinnedCurve {
        let period_minutes = self.period * MINUTES_PER_DAY;
        if self.is_empty() || !(bin_width_minutes > 0.0) || !(period_minutes > 0.0) {
            return BinnedCurve::default();
        }

        let n_bins = ((period_minutes / bin_width_minutes).ceil() as usize).max(1);
        let width = bin_width_minutes / period_minutes;

        let mut sum_flux = vec![0.0; n_bins];
        let mut sum_err_sq = vec![0.0; n_bins];
        let mut count = vec![0usize; n_bins];

        for ((&ph, &f), &e) in self.phase.iter().zip(&self.flux).zip(&self.flux_err) {
            let idx = ((ph / width).floor() as usize).min(n_bins - 1);
            sum_flux[idx] += f;
            sum_err_sq[idx] += e * e;
            count[idx] += 1;
        }

        let mut binned = BinnedCurve::default();
        for i in 0..n_bins {
            if count[i] == 0 {
                continue;
            }
            let n = count[i] as f64;
            let lo = i as f64 * width;
            let hi = ((i + 1) as f64 * width).min(1.0);
            binned.phase.push(0.5 * (lo + hi));
            binned.flux.push(sum_flux[i] / n);
            binned.flux_err.push(sum_err_sq[i].sqrt() / n);
            binned.count.push(count[i]);
        }
        binned
    }

    /// Fold and bin so the folded span is split into roughly `target_bins` bins.
    pub fn bin_to_target(&self, target_bins: usize) -> BinnedCurve {
        self.bin(bin_width_minutes(self.duration_days(), target_bins))
    }
}

/// Folded curve averaged into phase bins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BinnedCurve {
    /// Bin centre phase in `[0, 1)`.
    pub phase: Vec<f64>,
    pub flux: Vec<f64>,
    pub flux_err: Vec<f64>,
    /// Number of folded samples aggregated into each bin.
    pub count: Vec<usize>,
}

impl BinnedCurve {
    pub fn len(&self) -> usize {
        self.phase.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phase.is_empty()
    }

    /// Total number of folded samples represented by the bins.
    pub fn total_count(&self) -> usize {
        self.count.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sine_matches_closed_form() {
        let v = sine(0.25, 2.0, 1.0, 0.0);
        assert!((v - 2.0).abs() < 1e-12, "sin(π/2)·2 should be 2, got {}", v);
        let v = sine(0.0, 1.5, 3.0, std::f64::consts::FRAC_PI_2);
        assert!((v - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_plausibility_cutoff_is_five_sigma() {
        let power = [0.0, 2.0, 0.0, 2.0];
        let period = [1.0, 2.0, 3.0, 4.0];
        // population std of {0,2,0,2} is 1
        let p = plausibility(&power, &period, 100.0);
        assert!((p.cutoff - 5.0).abs() < 1e-12, "cutoff={}", p.cutoff);
        assert!(p.is_plausible);

        let p = plausibility(&power, &period, 2.5);
        assert!(!p.is_plausible, "zero deviation is never plausible");
    }

    #[test]
    fn test_plausibility_symmetric_in_deviation_sign() {
        let power = [0.1, 0.3, 0.2, 0.05, 0.4];
        let period = [10.0, 5.0, 3.0, 2.0, 1.0];
        let med = 3.0;
        for dev in [0.1, 0.5, 1.0, 2.0, 7.5] {
            let above = plausibility(&power, &period, med + dev);
            let below = plausibility(&power, &period, med - dev);
            assert_eq!(above.is_plausible, below.is_plausible, "dev={}", dev);
            assert_eq!(above.cutoff, below.cutoff);
        }
    }

    #[test]
    fn test_plausibility_drops_nan_power() {
        let power = [f64::NAN, 0.0, 2.0, f64::NAN];
        let period = [1000.0, 1.0, 3.0, 1000.0];
        // Only periods 1 and 3 remain: median 2, σ 1
        let p = plausibility(&power, &period, 7.5);
        assert!((p.cutoff - 5.0).abs() < 1e-12);
        assert!(p.is_plausible);
    }

    #[test]
    fn test_plausibility_too_few_samples() {
        let p = plausibility(&[f64::NAN, 0.4], &[1.0, 2.0], 50.0);
        assert!(!p.is_plausible);
        assert!(p.cutoff.is_nan());

        let p = plausibility(&[], &[], 1.0);
        assert!(!p.is_plausible);
    }

    #[test]
    fn test_bin_width_minutes() {
        // 25 days over 50 bins = 0.5 day = 720 min
        assert!((bin_width_minutes(25.0, 50) - 720.0).abs() < 1e-9);
    }

    #[test]
    fn test_median_and_std() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(&[f64::NAN]), None);
        let s = std_dev(&[1.0, 3.0]).unwrap();
        assert!((s - 1.0).abs() < 1e-12);
        assert_eq!(std_dev(&[1.0]), None);
    }

    #[test]
    fn test_fold_bin_preserves_samples() {
        let time: Vec<f64> = (0..997).map(|i| 1500.0 + i as f64 * 0.0137).collect();
        let flux: Vec<f64> = time.iter().map(|&t| sine(t, 0.1, 1.0 / 0.71, 0.3)).collect();
        let err = vec![0.01; time.len()];

        let folded = FoldedCurve::new(&time, &flux, &err, 0.71, time[0]);
        assert_eq!(folded.len(), time.len());
        assert!(folded.phase.iter().all(|&p| (0.0..1.0).contains(&p)));
        assert!(folded.phase.windows(2).all(|w| w[0] <= w[1]));

        let binned = folded.bin_to_target(50);
        assert_eq!(binned.total_count(), time.len(), "no sample lost or duplicated");
        assert!(binned.phase.iter().all(|&p| (0.0..1.0).contains(&p)));
        assert!(binned.len() <= 51, "bins={}", binned.len());
    }

    #[test]
    fn test_bin_error_is_error_of_mean() {
        let folded = FoldedCurve {
            period: 1.0,
            phase: vec![0.1, 0.2, 0.3, 0.4],
            flux: vec![1.0, 3.0, 5.0, 7.0],
            flux_err: vec![2.0, 2.0, 2.0, 2.0],
        };
        let binned = folded.bin(MINUTES_PER_DAY);
        assert_eq!(binned.len(), 1);
        assert!((binned.flux[0] - 4.0).abs() < 1e-12);
        assert!((binned.flux_err[0] - 1.0).abs() < 1e-12);
    }
}
