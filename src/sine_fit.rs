//! Levenberg–Marquardt fit of a single sinusoid.
//!
//! Model: `flux(t) = A · sin(2π f t + φ)`, the same function as
//! [`crate::signal::sine`]. The fit is deterministic: one damped
//! Gauss–Newton descent from the supplied seed, no restarts.
//!
//! Internally time is measured from the mean sample time so the phase and
//! frequency columns of the Jacobian are not dominated by the absolute epoch
//! (BJD-like times put `2π f t` in the thousands of radians). The phase is
//! converted back to the caller's time origin before returning.
//!
//! Stopping follows MINPACK: relative step (`xtol`), relative χ² reduction
//! (`ftol`) and the cosine between residuals and Jacobian columns (`gtol`).
//! A stalled descent (damping exhausted, or singular normal equations) is a
//! local minimum and is returned as converged. Reaching the iteration limit
//! returns the best parameters so far with [`SineFit::converged`] unset.
//!
//! The fit fails only when the seed is unusable or the parameters blow up.

use std::f64::consts::{PI, TAU};

use nalgebra::{Matrix3, Vector3};
use thiserror::Error;
use tracing::{debug, warn};

use crate::periodogram::Periodogram;
use crate::signal::sine;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FitError {
    #[error("invalid seed: amplitude={amplitude}, frequency={frequency}, phase={phase}")]
    InvalidSeed {
        amplitude: f64,
        frequency: f64,
        phase: f64,
    },
    #[error("need at least 3 samples to fit a sinusoid, got {0}")]
    TooFewSamples(usize),
    #[error("time has {time} samples but flux has {flux}")]
    LengthMismatch { time: usize, flux: usize },
    #[error("fit diverged to non-finite parameters after {iterations} iterations")]
    Diverged { iterations: usize },
}

/// Configuration for the Levenberg–Marquardt descent.
#[derive(Debug, Clone)]
pub struct SineFitConfig {
    /// Maximum iterations. Default 200.
    pub max_iterations: usize,
    /// Stop when every parameter step is below `xtol` relative to the parameter. Default 1.5e-8.
    pub xtol: f64,
    /// Stop when an accepted step lowers χ² by less than `ftol` relative. Default 1.5e-8.
    pub ftol: f64,
    /// Stop when the largest cosine between the residual vector and a
    /// Jacobian column is below `gtol`. Default 1e-10.
    pub gtol: f64,
    /// Initial damping parameter. Default 1e-3.
    pub initial_lambda: f64,
    /// Factor to increase lambda on a rejected step. Default 10.
    pub lambda_up: f64,
    /// Factor to decrease lambda on an accepted step. Default 0.1.
    pub lambda_down: f64,
}

impl Default for SineFitConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            xtol: 1.5e-8,
            ftol: 1.5e-8,
            gtol: 1e-10,
            initial_lambda: 1e-3,
            lambda_up: 10.0,
            lambda_down: 0.1,
        }
    }
}

/// Starting point of the fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SineSeed {
    pub amplitude: f64,
    pub frequency: f64,
    pub phase: f64,
}

impl SineSeed {
    /// Seed for a trial `period`: amplitude from the periodogram power at that
    /// period, frequency `1 / period`, phase 0.
    ///
    /// The amplitude is NaN when `period` lies outside the periodogram range,
    /// which [`fit_sine`] rejects.
    pub fn from_periodogram(periodogram: &Periodogram, period: f64) -> Self {
        Self {
            amplitude: periodogram.power_at(period),
            frequency: 1.0 / period,
            phase: 0.0,
        }
    }

    fn validate(&self) -> Result<(), FitError> {
        let ok = self.amplitude.is_finite()
            && self.frequency.is_finite()
            && self.frequency > 0.0
            && self.phase.is_finite();
        if ok {
            Ok(())
        } else {
            Err(FitError::InvalidSeed {
                amplitude: self.amplitude,
                frequency: self.frequency,
                phase: self.phase,
            })
        }
    }
}

/// Result of a sinusoid fit.
#[derive(Debug, Clone)]
pub struct SineFit {
    /// Semi-amplitude, always non-negative.
    pub amplitude: f64,
    /// Frequency in cycles per day.
    pub frequency: f64,
    /// Phase in radians, wrapped to `(-π, π]`, for the caller's time origin.
    pub phase: f64,
    /// Model evaluated at each input time.
    pub best_fit: Vec<f64>,
    /// `flux − best_fit`.
    pub residuals: Vec<f64>,
    /// Sum of squared residuals.
    pub chi2: f64,
    pub iterations: usize,
    /// False when the iteration limit was reached before a stopping test.
    pub converged: bool,
}

impl SineFit {
    /// Period of the fitted sinusoid, `1 / frequency`.
    pub fn sine_period(&self) -> f64 {
        1.0 / self.frequency
    }

    /// Evaluate the fitted model at arbitrary times.
    pub fn evaluate(&self, time: &[f64]) -> Vec<f64> {
        time.iter()
            .map(|&t| sine(t, self.amplitude, self.frequency, self.phase))
            .collect()
    }
}

fn chi2(t: &[f64], flux: &[f64], p: &Vector3<f64>) -> f64 {
    t.iter()
        .zip(flux)
        .map(|(&ti, &fi)| {
            let r = fi - sine(ti, p[0], p[1], p[2]);
            r * r
        })
        .sum()
}

/// Normal equations `JᵀJ` and `Jᵀr` for parameters `(A, f, φ)`.
fn normal_equations(t: &[f64], flux: &[f64], p: &Vector3<f64>) -> (Matrix3<f64>, Vector3<f64>) {
    let (a, f, phi) = (p[0], p[1], p[2]);
    let mut jtj = Matrix3::zeros();
    let mut jtr = Vector3::zeros();
    for (&ti, &fi) in t.iter().zip(flux) {
        let (s, c) = (TAU * f * ti + phi).sin_cos();
        let row = Vector3::new(s, a * c * TAU * ti, a * c);
        let r = fi - a * s;
        jtj += row * row.transpose();
        jtr += row * r;
    }
    (jtj, jtr)
}

/// Largest cosine between the residual vector and a Jacobian column.
/// Columns with zero norm contribute nothing.
fn gradient_cosine(jtj: &Matrix3<f64>, jtr: &Vector3<f64>, chi2: f64) -> f64 {
    if chi2 <= 0.0 {
        return 0.0;
    }
    (0..3)
        .filter(|&i| jtj[(i, i)] > 0.0)
        .map(|i| jtr[i].abs() / (jtj[(i, i)] * chi2).sqrt())
        .fold(0.0, f64::max)
}

fn wrap_phase(phi: f64) -> f64 {
    let w = (phi + PI).rem_euclid(TAU) - PI;
    if w <= -PI {
        w + TAU
    } else {
        w
    }
}

/// Fit `A · sin(2π f t + φ)` to `(time, flux)` starting from `seed`.
pub fn fit_sine(
    time: &[f64],
    flux: &[f64],
    seed: &SineSeed,
    config: &SineFitConfig,
) -> Result<SineFit, FitError> {
    if time.len() != flux.len() {
        return Err(FitError::LengthMismatch {
            time: time.len(),
            flux: flux.len(),
        });
    }
    if time.len() < 3 {
        return Err(FitError::TooFewSamples(time.len()));
    }
    seed.validate()?;

    let t_ref = time.iter().sum::<f64>() / time.len() as f64;
    let t: Vec<f64> = time.iter().map(|&x| x - t_ref).collect();

    // Same model, phase expressed at t_ref
    let mut params = Vector3::new(
        seed.amplitude,
        seed.frequency,
        wrap_phase(seed.phase + TAU * seed.frequency * t_ref),
    );
    let mut lambda = config.initial_lambda;
    let mut prev_chi2 = chi2(&t, flux, &params);
    let mut stopped = false;
    let mut iterations = 0;
    // Running maximum of the JᵀJ diagonal, used as damping scale
    let mut scale = Vector3::<f64>::zeros();

    for iter in 0..config.max_iterations {
        iterations = iter + 1;

        let (jtj, jtr) = normal_equations(&t, flux, &params);
        if gradient_cosine(&jtj, &jtr, prev_chi2) <= config.gtol {
            stopped = true;
            break;
        }
        let mut damped = jtj;
        for i in 0..3 {
            scale[i] = scale[i].max(jtj[(i, i)]);
            damped[(i, i)] += lambda * scale[i];
        }

        let Some(delta) = damped.lu().solve(&jtr) else {
            debug!("Sine fit: singular normal equations at iteration {}", iterations);
            stopped = true;
            break;
        };

        let trial = params + delta;
        let trial_chi2 = chi2(&t, flux, &trial);

        if trial_chi2 < prev_chi2 {
            let reduction = (prev_chi2 - trial_chi2) / prev_chi2;
            let small_step = (0..3).all(|i| delta[i].abs() <= config.xtol * (params[i].abs() + config.xtol));
            params = trial;
            prev_chi2 = trial_chi2;
            lambda *= config.lambda_down;

            if small_step || reduction <= config.ftol {
                stopped = true;
                break;
            }
        } else {
            lambda *= config.lambda_up;
            if lambda > 1e10 {
                stopped = true;
                break;
            }
        }
    }

    if !params.iter().all(|p| p.is_finite()) || !prev_chi2.is_finite() {
        return Err(FitError::Diverged { iterations });
    }
    if !stopped {
        warn!(
            "Sine fit stopped at the {} iteration limit without converging",
            config.max_iterations
        );
    }

    let (mut amplitude, frequency, mut phase_ref) = (params[0], params[1], params[2]);
    if amplitude < 0.0 {
        amplitude = -amplitude;
        phase_ref += PI;
    }
    let phase = wrap_phase(phase_ref - TAU * frequency * t_ref);

    let best_fit: Vec<f64> = time
        .iter()
        .map(|&x| sine(x, amplitude, frequency, phase))
        .collect();
    let residuals: Vec<f64> = flux.iter().zip(&best_fit).map(|(f, m)| f - m).collect();
    let chi2 = residuals.iter().map(|r| r * r).sum();

    debug!(
        "Sine fit: A={:.4e} f={:.6} /d phi={:.4} chi2={:.4e} after {} iterations",
        amplitude, frequency, phase, chi2, iterations
    );

    Ok(SineFit {
        amplitude,
        frequency,
        phase,
        best_fit,
        residuals,
        chi2,
        iterations,
        converged: stopped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean_sine(amplitude: f64, frequency: f64, phase: f64) -> (Vec<f64>, Vec<f64>) {
        let time: Vec<f64> = (0..1500).map(|i| 1600.0 + i as f64 / 144.0).collect();
        let flux = time.iter().map(|&t| sine(t, amplitude, frequency, phase)).collect();
        (time, flux)
    }

    #[test]
    fn test_recovers_clean_sinusoid() {
        let (a, f, phi) = (0.02, 1.0 / 0.83, 0.7);
        let (time, flux) = clean_sine(a, f, phi);
        let seed = SineSeed {
            amplitude: 0.015,
            frequency: f,
            phase: 0.0,
        };
        let fit = fit_sine(&time, &flux, &seed, &SineFitConfig::default()).unwrap();

        assert!((fit.amplitude - a).abs() < 1e-6, "amplitude {} vs {}", fit.amplitude, a);
        assert!((fit.frequency - f).abs() < 1e-6, "frequency {} vs {}", fit.frequency, f);
        assert!((fit.phase - phi).abs() < 1e-6, "phase {} vs {}", fit.phase, phi);
        assert!((fit.sine_period() - 0.83).abs() < 1e-6);
        let worst = fit.residuals.iter().fold(0.0f64, |m, r| m.max(r.abs()));
        assert!(worst < 1e-6, "max residual {}", worst);
    }

    #[test]
    fn test_negative_amplitude_is_normalized() {
        let (time, flux) = clean_sine(0.01, 2.0, -0.4);
        let seed = SineSeed {
            amplitude: -0.009,
            frequency: 2.0,
            phase: PI - 0.35,
        };
        let fit = fit_sine(&time, &flux, &seed, &SineFitConfig::default()).unwrap();
        assert!(fit.amplitude > 0.0);
        assert!((fit.amplitude - 0.01).abs() < 1e-6);
        assert!((fit.phase + 0.4).abs() < 1e-6, "phase {}", fit.phase);
    }

    #[test]
    fn test_is_deterministic() {
        let (time, mut flux) = clean_sine(0.01, 1.5, 1.0);
        for (i, f) in flux.iter_mut().enumerate() {
            *f += 2e-3 * (((i * 7919) % 211) as f64 / 211.0 - 0.5);
        }
        let seed = SineSeed {
            amplitude: 0.008,
            frequency: 1.5,
            phase: 0.0,
        };
        let a = fit_sine(&time, &flux, &seed, &SineFitConfig::default()).unwrap();
        let b = fit_sine(&time, &flux, &seed, &SineFitConfig::default()).unwrap();
        assert_eq!(a.amplitude, b.amplitude);
        assert_eq!(a.frequency, b.frequency);
        assert_eq!(a.phase, b.phase);
        assert_eq!(a.residuals, b.residuals);
    }

    #[test]
    fn test_alias_frequency_returns_a_fit() {
        // Seeding at half the true frequency leaves almost no signal to fit
        let (time, mut flux) = clean_sine(0.01, 2.0, 0.3);
        for (i, f) in flux.iter_mut().enumerate() {
            *f += 1e-3 * (((i * 7919) % 211) as f64 / 211.0 - 0.5);
        }
        let seed = SineSeed {
            amplitude: 3e-4,
            frequency: 1.0,
            phase: 0.0,
        };
        let config = SineFitConfig::default();
        let fit = fit_sine(&time, &flux, &seed, &config).unwrap();
        assert!(fit.iterations <= config.max_iterations);
        assert!(fit.amplitude.is_finite() && fit.chi2.is_finite());
        assert_eq!(fit.best_fit.len(), time.len());
    }

    #[test]
    fn test_iteration_limit_returns_best_so_far() {
        let (time, flux) = clean_sine(0.02, 1.0 / 0.83, 0.7);
        let seed = SineSeed {
            amplitude: 0.015,
            frequency: 1.0 / 0.83,
            phase: 0.0,
        };
        let config = SineFitConfig {
            max_iterations: 1,
            ..Default::default()
        };
        let fit = fit_sine(&time, &flux, &seed, &config).unwrap();
        assert!(!fit.converged);
        assert_eq!(fit.iterations, 1);
        let seed_chi2: f64 = time
            .iter()
            .zip(&flux)
            .map(|(&t, &f)| (f - sine(t, seed.amplitude, seed.frequency, seed.phase)).powi(2))
            .sum();
        assert!(fit.chi2 < seed_chi2, "chi2 {} vs seed {}", fit.chi2, seed_chi2);
    }

    #[test]
    fn test_invalid_seeds_rejected() {
        let (time, flux) = clean_sine(0.01, 1.0, 0.0);
        for seed in [
            SineSeed { amplitude: f64::NAN, frequency: 1.0, phase: 0.0 },
            SineSeed { amplitude: 0.01, frequency: 0.0, phase: 0.0 },
            SineSeed { amplitude: 0.01, frequency: -1.0, phase: 0.0 },
            SineSeed { amplitude: 0.01, frequency: f64::INFINITY, phase: 0.0 },
        ] {
            let err = fit_sine(&time, &flux, &seed, &SineFitConfig::default()).unwrap_err();
            assert!(matches!(err, FitError::InvalidSeed { .. }), "{:?}", seed);
        }
    }

    #[test]
    fn test_seed_outside_periodogram_range_is_invalid() {
        let pg = Periodogram {
            frequency: vec![0.5, 1.0],
            period: vec![2.0, 1.0],
            power: vec![0.1, 0.2],
        };
        let seed = SineSeed::from_periodogram(&pg, 4.0);
        assert!(seed.amplitude.is_nan());
        assert!(seed.validate().is_err());
        let seed = SineSeed::from_periodogram(&pg, 1.5);
        assert!((seed.amplitude - 0.15).abs() < 1e-12);
        assert!((seed.frequency - 1.0 / 1.5).abs() < 1e-12);
        assert_eq!(seed.phase, 0.0);
    }

    #[test]
    fn test_too_few_samples() {
        let seed = SineSeed { amplitude: 1.0, frequency: 1.0, phase: 0.0 };
        assert_eq!(
            fit_sine(&[1.0, 2.0], &[0.0, 0.0], &seed, &SineFitConfig::default()).unwrap_err(),
            FitError::TooFewSamples(2)
        );
    }

    #[test]
    fn test_wrap_phase_range() {
        for phi in [-7.0, -PI, 0.0, PI, 3.5, 12.0] {
            let w = wrap_phase(phi);
            assert!(w > -PI - 1e-12 && w <= PI + 1e-12, "{} -> {}", phi, w);
            assert!(((w - phi) / TAU - ((w - phi) / TAU).round()).abs() < 1e-9);
        }
    }
}
