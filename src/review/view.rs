//! Diagnostic views shown to the operator at each review prompt.
//!
//! A view is plain data: panels of series and reference markers, plus a
//! headline and notes. How it is drawn is up to the frontend; see
//! [`crate::render::SvgRenderer`] for the SVG backend.

use std::fmt::Write as _;
use std::path::PathBuf;

use crate::flare::{self, FlarePredictor};
use crate::lightcurve::Lightcurve;
use crate::periodogram::PeriodSearch;
use crate::signal::FoldedCurve;
use crate::sine_fit::{fit_sine, SineFit, SineFitConfig, SineSeed};

use super::{Effect, ViewProvider};
use crate::error::PipelineError;

/// Sine-period markers drawn on a lightcurve panel at most.
const MAX_PERIOD_MARKERS: usize = 64;

/// Flare probability above which a residual is highlighted.
const FLARE_HIGHLIGHT: f64 = 0.5;

// ── View data ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SeriesStyle {
    Line,
    Points,
    /// Points with symmetric vertical error bars.
    ErrorBars { err: Vec<f64> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub label: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub style: SeriesStyle,
}

impl Series {
    pub fn line(label: impl Into<String>, x: Vec<f64>, y: Vec<f64>) -> Self {
        Self { label: label.into(), x, y, style: SeriesStyle::Line }
    }

    pub fn points(label: impl Into<String>, x: Vec<f64>, y: Vec<f64>) -> Self {
        Self { label: label.into(), x, y, style: SeriesStyle::Points }
    }

    pub fn error_bars(label: impl Into<String>, x: Vec<f64>, y: Vec<f64>, err: Vec<f64>) -> Self {
        Self { label: label.into(), x, y, style: SeriesStyle::ErrorBars { err } }
    }
}

/// Reference line across a panel.
#[derive(Debug, Clone, PartialEq)]
pub enum Marker {
    Vertical { x: f64, label: Option<String> },
    Horizontal { y: f64, label: Option<String> },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Panel {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    /// Draw the x axis logarithmically.
    pub log_x: bool,
    /// Explicit x window; otherwise the data range.
    pub x_range: Option<(f64, f64)>,
    pub series: Vec<Series>,
    pub markers: Vec<Marker>,
}

/// Which prompt a view belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    Candidates,
    Period,
    Eclipsing,
    Doppler,
    Flares,
}

impl ViewKind {
    pub const ALL: [ViewKind; 5] = [
        ViewKind::Candidates,
        ViewKind::Period,
        ViewKind::Eclipsing,
        ViewKind::Doppler,
        ViewKind::Flares,
    ];

    /// Short name used in file names.
    pub fn name(self) -> &'static str {
        match self {
            ViewKind::Candidates => "candidates",
            ViewKind::Period => "period",
            ViewKind::Eclipsing => "eclipsing",
            ViewKind::Doppler => "doppler",
            ViewKind::Flares => "flares",
        }
    }

    /// Question asked with this view; `period` is the period under review.
    pub fn headline(self, period: f64) -> String {
        match self {
            ViewKind::Candidates => {
                "Press the key corresponding with the best period candidate (1,2,3), if none are good, press 'n'"
                    .to_string()
            }
            ViewKind::Period => format!("Press the key 'y' if the period {:.3} days is real, 'n' if not", period),
            ViewKind::Eclipsing => "Press 'y' if there are eclipses, 'n' if not".to_string(),
            ViewKind::Doppler => "Press 'y' if there is doppler beaming, 'n' if not".to_string(),
            ViewKind::Flares => "Press 'y' if there are flares, 'n' if not".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StarHeader {
    pub name: String,
    pub i_magnitude: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewContent {
    Panels(Vec<Panel>),
    /// Pre-rendered image on disk.
    Image(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticView {
    pub kind: ViewKind,
    pub star: StarHeader,
    /// The question put to the operator.
    pub headline: String,
    pub notes: Vec<String>,
    pub content: ViewContent,
}

impl DiagnosticView {
    /// Plain-text rendering for terminals and logs.
    pub fn summary(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(
            s,
            "── {} · {} (i = {:.2}) ──",
            self.kind.name(),
            self.star.name,
            self.star.i_magnitude
        );
        let _ = writeln!(s, "{}", self.headline);
        for note in &self.notes {
            let _ = writeln!(s, "  {}", note);
        }
        match &self.content {
            ViewContent::Panels(panels) => {
                for p in panels {
                    let _ = writeln!(s, "  [{}] {} series", p.title, p.series.len());
                }
            }
            ViewContent::Image(path) => {
                let _ = writeln!(s, "  image: {}", path.display());
            }
        }
        s
    }
}

/// Text shown for a plausibility verdict.
pub fn plausibility_note(is_plausible: bool) -> &'static str {
    if is_plausible {
        "over 5 sigma, so MIGHT be real"
    } else {
        "under 5 sigma, so might NOT be real"
    }
}

// ── Star analysis ───────────────────────────────────────────────────────────

/// Everything computed for one star before review begins.
#[derive(Debug, Clone)]
pub struct StarAnalysis {
    pub header: StarHeader,
    /// Literature period in days; 0 when unknown.
    pub literature_period_days: f64,
    pub lightcurve: Lightcurve,
    pub search: PeriodSearch,
}

impl StarAnalysis {
    pub fn has_literature_period(&self) -> bool {
        self.literature_period_days > 0.0 && self.literature_period_days.is_finite()
    }

    /// Fit a sinusoid at `period`, seeded from the periodogram.
    pub fn fit_at(&self, period: f64, config: &SineFitConfig) -> Result<SineFit, PipelineError> {
        let seed = SineSeed::from_periodogram(&self.search.periodogram, period);
        Ok(fit_sine(self.lightcurve.time(), self.lightcurve.flux(), &seed, config)?)
    }
}

/// Binning targets for folded panels.
#[derive(Debug, Clone, Copy)]
pub struct BinningConfig {
    pub target_bins: usize,
    pub doppler_target_bins: usize,
}

impl Default for BinningConfig {
    fn default() -> Self {
        Self {
            target_bins: 50,
            doppler_target_bins: 100,
        }
    }
}

// ── Panel builders ──────────────────────────────────────────────────────────

fn periodogram_panel(analysis: &StarAnalysis, periods: &[(f64, String)], with_cutoff: bool) -> Panel {
    let pg = &analysis.search.periodogram;
    let mut markers: Vec<Marker> = periods
        .iter()
        .map(|(x, label)| Marker::Vertical { x: *x, label: Some(label.clone()) })
        .collect();
    if analysis.has_literature_period() {
        markers.push(Marker::Vertical {
            x: analysis.literature_period_days,
            label: Some(format!("literature {:.4} d", analysis.literature_period_days)),
        });
    }
    let cutoff = analysis.search.plausibility.cutoff;
    if with_cutoff && cutoff.is_finite() {
        markers.push(Marker::Horizontal { y: cutoff, label: Some("5σ".to_string()) });
    }
    Panel {
        title: "Periodogram".to_string(),
        x_label: "Period [days]".to_string(),
        y_label: "Amplitude".to_string(),
        log_x: true,
        x_range: None,
        series: vec![Series::line("power", pg.period.clone(), pg.power.clone())],
        markers,
    }
}

/// Folded and binned lightcurve at `period`, optionally with the folded fit.
fn folded_panel(
    title: String,
    lc: &Lightcurve,
    fit: Option<&SineFit>,
    period: f64,
    target_bins: usize,
) -> Panel {
    let epoch = lc.start_time();
    let folded = FoldedCurve::new(lc.time(), lc.flux(), lc.flux_err(), period, epoch);
    let binned = folded.bin_to_target(target_bins);
    let mut series = vec![Series::error_bars("binned flux", binned.phase, binned.flux, binned.flux_err)];
    if let Some(fit) = fit {
        let model_err = vec![0.0; fit.best_fit.len()];
        let model = FoldedCurve::new(lc.time(), &fit.best_fit, &model_err, period, epoch)
            .bin_to_target(target_bins);
        series.push(Series::line("sine fit", model.phase, model.flux));
    }
    Panel {
        title,
        x_label: "Phase".to_string(),
        y_label: "Normalized flux".to_string(),
        log_x: false,
        x_range: Some((0.0, 1.0)),
        series,
        markers: Vec::new(),
    }
}

/// Index range of sorted `time` within `[lo, hi]`; the full range if empty.
fn window_range(time: &[f64], lo: f64, hi: f64) -> (usize, usize) {
    let a = time.partition_point(|&t| t < lo);
    let b = time.partition_point(|&t| t <= hi);
    if a < b {
        (a, b)
    } else {
        (0, time.len())
    }
}

/// Lightcurve with fit overlay over `[t0 + 1 + P, t0 + 1 + 4P]`, marking
/// every sine period counted from the first sample.
fn lightcurve_panel(lc: &Lightcurve, fit: &SineFit, period: f64, with_period_markers: bool) -> Panel {
    let t0 = lc.start_time();
    let (lo, hi) = (t0 + 1.0 + period, t0 + 1.0 + 4.0 * period);
    let (a, b) = window_range(lc.time(), lo, hi);
    let t = lc.time()[a..b].to_vec();

    let mut markers = Vec::new();
    if with_period_markers {
        let step = fit.sine_period();
        if step.is_finite() && step > 0.0 {
            let (w0, w1) = (t[0], t[t.len() - 1]);
            let first = ((w0 - t0) / step).ceil().max(0.0) as usize;
            markers.extend(
                (first..)
                    .map(|k| t0 + k as f64 * step)
                    .take_while(|&x| x <= w1)
                    .take(MAX_PERIOD_MARKERS)
                    .map(|x| Marker::Vertical { x, label: None }),
            );
        }
    }

    Panel {
        title: "Lightcurve".to_string(),
        x_label: "Time [days]".to_string(),
        y_label: "Normalized flux".to_string(),
        log_x: false,
        x_range: Some((t[0], t[t.len() - 1])),
        series: vec![
            Series::points("flux", t.clone(), lc.flux()[a..b].to_vec()),
            Series::line("sine fit", t, fit.best_fit[a..b].to_vec()),
        ],
        markers,
    }
}

fn residual_panel(lc: &Lightcurve, fit: &SineFit, period: f64, flare_probability: Option<&[f64]>) -> Panel {
    let t0 = lc.start_time();
    let (a, b) = window_range(lc.time(), t0 + 1.0 + period, t0 + 1.0 + 4.0 * period);
    let t = &lc.time()[a..b];
    let r = &fit.residuals[a..b];

    let mut series = vec![Series::points("residuals", t.to_vec(), r.to_vec())];
    if let Some(prob) = flare_probability {
        let (fx, fy): (Vec<f64>, Vec<f64>) = (a..b)
            .filter(|&i| prob.get(i).is_some_and(|&p| p > FLARE_HIGHLIGHT))
            .map(|i| (lc.time()[i], fit.residuals[i]))
            .unzip();
        series.push(Series::points(
            format!("flare probability > {}", FLARE_HIGHLIGHT),
            fx,
            fy,
        ));
    }
    Panel {
        title: "Residuals".to_string(),
        x_label: "Time [days]".to_string(),
        y_label: "Flux − fit".to_string(),
        log_x: false,
        x_range: Some((t[0], t[t.len() - 1])),
        series,
        markers: vec![Marker::Horizontal { y: 0.0, label: None }],
    }
}

// ── Views ───────────────────────────────────────────────────────────────────

fn literature_note(analysis: &StarAnalysis) -> String {
    if analysis.has_literature_period() {
        format!("literature period {:.6} d", analysis.literature_period_days)
    } else {
        "literature period unknown".to_string()
    }
}

/// Periodogram with the three alias candidates and their folded curves.
pub fn candidates_view(analysis: &StarAnalysis, bins: &BinningConfig) -> DiagnosticView {
    let search = &analysis.search;
    let candidates = search.candidates.as_array();
    let labelled: Vec<(f64, String)> = candidates
        .iter()
        .enumerate()
        .map(|(i, p)| (*p, format!("{}: {:.5} d", i + 1, p)))
        .collect();

    let mut panels = vec![periodogram_panel(analysis, &labelled, true)];
    for (p, label) in &labelled {
        panels.push(folded_panel(label.clone(), &analysis.lightcurve, None, *p, bins.target_bins));
    }

    DiagnosticView {
        kind: ViewKind::Candidates,
        star: analysis.header.clone(),
        headline: ViewKind::Candidates.headline(search.best_period),
        notes: vec![
            format!(
                "best period {:.6} d, max power {:.4e}",
                search.best_period, search.max_power
            ),
            format!(
                "5σ cutoff {:.4e}: {}",
                search.plausibility.cutoff,
                plausibility_note(search.plausibility.is_plausible)
            ),
            literature_note(analysis),
        ],
        content: ViewContent::Panels(panels),
    }
}

/// Accepted period folded with its fit, the windowed lightcurve and residuals.
pub fn confirmation_view(
    analysis: &StarAnalysis,
    accepted: f64,
    fit: &SineFit,
    bins: &BinningConfig,
) -> DiagnosticView {
    let lc = &analysis.lightcurve;
    let panels = vec![
        periodogram_panel(analysis, &[(accepted, format!("{:.5} d", accepted))], true),
        folded_panel(format!("Folded on {:.5} d", accepted), lc, Some(fit), accepted, bins.target_bins),
        lightcurve_panel(lc, fit, accepted, true),
        residual_panel(lc, fit, accepted, None),
    ];
    let mut notes = vec![format!(
        "sine fit: amplitude {:.4e}, period {:.6} d, phase {:.3} rad",
        fit.amplitude,
        fit.sine_period(),
        fit.phase
    )];
    if !fit.converged {
        notes.push(format!("sine fit did not converge in {} iterations", fit.iterations));
    }
    notes.push(literature_note(analysis));
    DiagnosticView {
        kind: ViewKind::Period,
        star: analysis.header.clone(),
        headline: ViewKind::Period.headline(accepted),
        notes,
        content: ViewContent::Panels(panels),
    }
}

pub fn eclipsing_view(
    analysis: &StarAnalysis,
    accepted: f64,
    fit: &SineFit,
    bins: &BinningConfig,
) -> DiagnosticView {
    let lc = &analysis.lightcurve;
    DiagnosticView {
        kind: ViewKind::Eclipsing,
        star: analysis.header.clone(),
        headline: ViewKind::Eclipsing.headline(accepted),
        notes: vec![format!("period {:.6} d", accepted)],
        content: ViewContent::Panels(vec![
            lightcurve_panel(lc, fit, accepted, false),
            periodogram_panel(analysis, &[(accepted, format!("{:.5} d", accepted))], false),
            folded_panel(format!("Folded on {:.5} d", accepted), lc, Some(fit), accepted, bins.target_bins),
        ]),
    }
}

/// Lightcurve and fit folded on twice the accepted period.
pub fn doppler_view(
    analysis: &StarAnalysis,
    accepted: f64,
    fit: &SineFit,
    bins: &BinningConfig,
) -> DiagnosticView {
    let doubled = 2.0 * accepted;
    DiagnosticView {
        kind: ViewKind::Doppler,
        star: analysis.header.clone(),
        headline: ViewKind::Doppler.headline(accepted),
        notes: vec![format!("folded on 2 × {:.6} d = {:.6} d", accepted, doubled)],
        content: ViewContent::Panels(vec![folded_panel(
            format!("Folded on {:.5} d", doubled),
            &analysis.lightcurve,
            Some(fit),
            doubled,
            bins.doppler_target_bins,
        )]),
    }
}

pub fn flares_view(
    analysis: &StarAnalysis,
    accepted: f64,
    fit: &SineFit,
    flare_probability: Option<&[f64]>,
) -> DiagnosticView {
    let lc = &analysis.lightcurve;
    let mut notes = Vec::new();
    if let Some(prob) = flare_probability {
        notes.push(format!(
            "{:.2}% of samples have flare probability > {}",
            100.0 * flare::flagged_fraction(prob, FLARE_HIGHLIGHT),
            FLARE_HIGHLIGHT
        ));
    }
    DiagnosticView {
        kind: ViewKind::Flares,
        star: analysis.header.clone(),
        headline: ViewKind::Flares.headline(accepted),
        notes,
        content: ViewContent::Panels(vec![
            lightcurve_panel(lc, fit, accepted, false),
            residual_panel(lc, fit, accepted, flare_probability),
        ]),
    }
}

// ── Live provider ───────────────────────────────────────────────────────────

/// Builds views on demand from a [`StarAnalysis`], fitting the sinusoid once
/// per accepted period.
pub struct LiveViews<'a> {
    analysis: &'a StarAnalysis,
    bins: BinningConfig,
    fit_config: SineFitConfig,
    predictor: Option<&'a dyn FlarePredictor>,
    fit: Option<(f64, SineFit)>,
}

impl<'a> LiveViews<'a> {
    pub fn new(analysis: &'a StarAnalysis, bins: BinningConfig, fit_config: SineFitConfig) -> Self {
        Self {
            analysis,
            bins,
            fit_config,
            predictor: None,
            fit: None,
        }
    }

    pub fn with_predictor(mut self, predictor: &'a dyn FlarePredictor) -> Self {
        self.predictor = Some(predictor);
        self
    }

    fn fit_for(&mut self, period: f64) -> Result<SineFit, PipelineError> {
        if let Some((p, fit)) = &self.fit {
            if *p == period {
                return Ok(fit.clone());
            }
        }
        let fit = self.analysis.fit_at(period, &self.fit_config)?;
        self.fit = Some((period, fit.clone()));
        Ok(fit)
    }
}

impl ViewProvider for LiveViews<'_> {
    fn candidates(&mut self) -> Result<DiagnosticView, PipelineError> {
        Ok(candidates_view(self.analysis, &self.bins))
    }

    fn confirmation(&mut self, accepted: f64) -> Result<DiagnosticView, PipelineError> {
        let fit = self.fit_for(accepted)?;
        Ok(confirmation_view(self.analysis, accepted, &fit, &self.bins))
    }

    fn effect(&mut self, effect: Effect, accepted: f64) -> Result<DiagnosticView, PipelineError> {
        let fit = self.fit_for(accepted)?;
        Ok(match effect {
            Effect::Eclipsing => eclipsing_view(self.analysis, accepted, &fit, &self.bins),
            Effect::DopplerBeaming => doppler_view(self.analysis, accepted, &fit, &self.bins),
            Effect::Flares => {
                let lc = &self.analysis.lightcurve;
                let probability = match self.predictor {
                    Some(p) => match flare::predict_checked(p, lc.time(), lc.flux(), lc.flux_err()) {
                        Ok(prob) => Some(prob),
                        Err(e) => {
                            tracing::warn!("{}: flare predictor failed: {:#}", self.analysis.header.name, e);
                            None
                        }
                    },
                    None => None,
                };
                flares_view(self.analysis, accepted, &fit, probability.as_deref())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::periodogram::{search, PeriodogramConfig};
    use crate::signal::sine;

    fn analysis(literature_period_days: f64) -> StarAnalysis {
        let time: Vec<f64> = (0..2000).map(|i| 1700.0 + i as f64 / 144.0).collect();
        let flux: Vec<f64> = time
            .iter()
            .enumerate()
            .map(|(i, &t)| sine(t, 0.01, 1.0 / 0.9, 0.2) + 5e-4 * (((i * 7919) % 89) as f64 / 89.0 - 0.5))
            .collect();
        let lc = Lightcurve::new(time, flux, vec![5e-4; 2000]).unwrap();
        let cfg = PeriodogramConfig {
            oversample_factor: 5.0,
            minimum_period_days: 0.2,
            maximum_period_days: 5.0,
            ..PeriodogramConfig::default()
        };
        StarAnalysis {
            header: StarHeader { name: "TIC 42".to_string(), i_magnitude: 14.1 },
            literature_period_days,
            search: search(&lc, &cfg).unwrap(),
            lightcurve: lc,
        }
    }

    fn panels(view: &DiagnosticView) -> &[Panel] {
        match &view.content {
            ViewContent::Panels(p) => p,
            ViewContent::Image(_) => panic!("expected panels"),
        }
    }

    #[test]
    fn test_candidates_view_contents() {
        let a = analysis(0.9);
        let view = candidates_view(&a, &BinningConfig::default());
        assert_eq!(view.kind, ViewKind::Candidates);
        let p = panels(&view);
        assert_eq!(p.len(), 4, "periodogram + three folded candidates");
        assert!(p[0].log_x);
        let verticals = p[0].markers.iter().filter(|m| matches!(m, Marker::Vertical { .. })).count();
        assert_eq!(verticals, 4, "three candidates and the literature period");
        assert!(p[0].markers.iter().any(|m| matches!(m, Marker::Horizontal { .. })));
        assert!(p[1].title.starts_with("1:") && p[3].title.starts_with("3:"));
        assert!(view.notes.iter().any(|n| n.contains("sigma")));
    }

    #[test]
    fn test_unknown_literature_period_omits_marker() {
        let a = analysis(0.0);
        let view = candidates_view(&a, &BinningConfig::default());
        let verticals = panels(&view)[0]
            .markers
            .iter()
            .filter(|m| matches!(m, Marker::Vertical { .. }))
            .count();
        assert_eq!(verticals, 3);
    }

    #[test]
    fn test_confirmation_view_windowed() {
        let a = analysis(0.0);
        let fit = a.fit_at(a.search.best_period, &SineFitConfig::default()).unwrap();
        let p = a.search.best_period;
        let view = confirmation_view(&a, p, &fit, &BinningConfig::default());
        let lc_panel = &panels(&view)[2];
        let (lo, hi) = lc_panel.x_range.unwrap();
        let t0 = a.lightcurve.start_time();
        assert!(lo >= t0 + 1.0 + p - 1e-9 && hi <= t0 + 1.0 + 4.0 * p + 1e-9);
        assert!(!lc_panel.markers.is_empty());
        assert_eq!(view.kind, ViewKind::Period);
    }

    #[test]
    fn test_live_views_cache_fit_and_build_effects() {
        let a = analysis(0.0);
        let mut views = LiveViews::new(&a, BinningConfig::default(), SineFitConfig::default());
        let p = a.search.best_period;
        assert_eq!(views.confirmation(p).unwrap().kind, ViewKind::Period);
        assert_eq!(views.effect(Effect::Eclipsing, p).unwrap().kind, ViewKind::Eclipsing);
        let doppler = views.effect(Effect::DopplerBeaming, p).unwrap();
        assert!(panels(&doppler)[0].title.contains(&format!("{:.5}", 2.0 * p)));
        assert_eq!(views.effect(Effect::Flares, p).unwrap().kind, ViewKind::Flares);
    }

    #[test]
    fn test_summary_mentions_star() {
        let a = analysis(0.0);
        let s = candidates_view(&a, &BinningConfig::default()).summary();
        assert!(s.contains("TIC 42"));
        assert!(s.contains("candidates"));
    }
}
