//! Batch driver: configuration, per-star processing and the error boundary
//! between stars.
//!
//! Stars are processed strictly one after another. Any non-fatal error while
//! processing a star (no data, periodogram or fit failure) is logged with the
//! star's identifier and the star is skipped. Fatal errors (see
//! [`PipelineError::is_fatal`]) stop the batch.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::archive::Archive;
use crate::catalog::{self, CatalogEntry};
use crate::error::PipelineError;
use crate::flare::FlarePredictor;
use crate::lightcurve::CleaningConfig;
use crate::periodogram::{
    self, PeriodogramConfig, DEFAULT_MAXIMUM_PERIOD_DAYS, DEFAULT_MAX_FREQUENCIES, DEFAULT_OVERSAMPLE_FACTOR,
};
use crate::preload;
use crate::render::SvgRenderer;
use crate::results::{CsvResultSink, ResultSink};
use crate::review::view::BinningConfig;
use crate::review::{
    CandidateReviewSession, LabelTolerances, LiveViews, ReviewContext, ReviewFrontend, ReviewOutcome,
    StarAnalysis, StarHeader,
};
use crate::sine_fit::SineFitConfig;
use crate::source::{self, ExposureSelection};

/// Run configuration.
///
/// Every field has a default, so a TOML file only needs the values it changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Exposure cadence to use, in seconds. Default 120.
    pub cadence_s: f64,
    /// Periodogram frequency oversampling. Default 10.
    pub oversample_factor: f64,
    /// Shortest trial period in days. Default: twice the cadence.
    pub minimum_period_days: Option<f64>,
    /// Longest trial period in days. Default 14.
    pub maximum_period_days: f64,
    /// Cap on periodogram trial frequencies. Default 200 000.
    pub max_periodogram_frequencies: usize,
    /// Render all diagnostic images first, then review them. Default false.
    pub preload: bool,
    /// Target bin count for folded panels. Default 50.
    pub target_bins: usize,
    /// Target bin count for the double-period (Doppler) fold. Default 100.
    pub doppler_target_bins: usize,
    /// Relative tolerance for the irradiation label. Default 1e-2.
    pub irradiation_rel_tol: f64,
    /// Relative tolerance for the ellipsoidal label. Default 1e-2.
    pub ellipsoidal_rel_tol: f64,
    /// Sigma-clipping threshold applied to raw exposures. Default 5.
    pub outlier_sigma: f64,
    /// How exposures at the chosen cadence are combined. Default append.
    pub exposure_selection: ExposureSelection,
    /// Sine fit iteration limit. Default 200.
    pub fit_max_iterations: usize,
    /// Remove an existing results file before the run. Default true.
    pub reset_results_on_start: bool,
    /// Whitespace-delimited catalog as exported from the survey query.
    pub raw_catalog_path: PathBuf,
    /// Comma-delimited catalog produced from `raw_catalog_path`.
    pub catalog_path: PathBuf,
    /// Append-only results table.
    pub results_path: PathBuf,
    /// Output directory for preload mode images and manifest.
    pub preload_dir: PathBuf,
    /// Root of the local archive.
    pub archive_root: PathBuf,
    /// Where interactive mode writes plots; none disables rendering.
    pub plot_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cadence_s: 120.0,
            oversample_factor: DEFAULT_OVERSAMPLE_FACTOR,
            minimum_period_days: None,
            maximum_period_days: DEFAULT_MAXIMUM_PERIOD_DAYS,
            max_periodogram_frequencies: DEFAULT_MAX_FREQUENCIES,
            preload: false,
            target_bins: 50,
            doppler_target_bins: 100,
            irradiation_rel_tol: 1e-2,
            ellipsoidal_rel_tol: 1e-2,
            outlier_sigma: 5.0,
            exposure_selection: ExposureSelection::Append,
            fit_max_iterations: 200,
            reset_results_on_start: true,
            raw_catalog_path: PathBuf::from("raw_wdss_data.csv"),
            catalog_path: PathBuf::from("wdss_data.csv"),
            results_path: PathBuf::from("orbital_periods/periods.csv"),
            preload_dir: PathBuf::from("preload"),
            archive_root: PathBuf::from("archive"),
            plot_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Load and validate a TOML configuration file.
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        let config: Self =
            toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let fail = |msg: String| Err(PipelineError::Config(msg));
        if !(self.cadence_s > 0.0) {
            return fail(format!("cadence_s must be positive, got {}", self.cadence_s));
        }
        if self.target_bins == 0 || self.doppler_target_bins == 0 {
            return fail("bin targets must be at least 1".to_string());
        }
        if !(self.irradiation_rel_tol > 0.0 && self.ellipsoidal_rel_tol > 0.0) {
            return fail("label tolerances must be positive".to_string());
        }
        if !(self.outlier_sigma > 0.0) {
            return fail(format!("outlier_sigma must be positive, got {}", self.outlier_sigma));
        }
        self.periodogram_config()
            .validate()
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        if !self.catalog_path.exists() && !self.raw_catalog_path.exists() {
            return fail(format!(
                "neither catalog {} nor raw catalog {} exists",
                self.catalog_path.display(),
                self.raw_catalog_path.display()
            ));
        }
        Ok(())
    }

    pub fn periodogram_config(&self) -> PeriodogramConfig {
        let mut config = PeriodogramConfig::for_cadence(self.cadence_s);
        config.oversample_factor = self.oversample_factor;
        config.maximum_period_days = self.maximum_period_days;
        config.max_frequencies = self.max_periodogram_frequencies;
        if let Some(min) = self.minimum_period_days {
            config.minimum_period_days = min;
        }
        config
    }

    pub fn cleaning_config(&self) -> CleaningConfig {
        CleaningConfig {
            outlier_sigma: self.outlier_sigma,
            ..CleaningConfig::default()
        }
    }

    pub fn fit_config(&self) -> SineFitConfig {
        SineFitConfig {
            max_iterations: self.fit_max_iterations,
            ..SineFitConfig::default()
        }
    }

    pub fn binning(&self) -> BinningConfig {
        BinningConfig {
            target_bins: self.target_bins,
            doppler_target_bins: self.doppler_target_bins,
        }
    }

    pub fn tolerances(&self) -> LabelTolerances {
        LabelTolerances {
            irradiation_rel_tol: self.irradiation_rel_tol,
            ellipsoidal_rel_tol: self.ellipsoidal_rel_tol,
        }
    }
}

/// Star counts at the end of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub committed: usize,
    pub abandoned: usize,
    pub skipped: usize,
}

impl BatchSummary {
    pub fn record(&mut self, outcome: &ReviewOutcome) {
        match outcome {
            ReviewOutcome::Committed(_) => self.committed += 1,
            ReviewOutcome::Abandoned(_) => self.abandoned += 1,
        }
    }
}

/// Reviewed star name: `"TIC <id>"` when the archive reports an object id,
/// the catalog identifier otherwise.
pub fn star_name(entry: &CatalogEntry, object_id: Option<u64>) -> String {
    match object_id {
        Some(id) => format!("TIC {}", id),
        None => entry.identifier.clone(),
    }
}

/// Retrieve the lightcurve of `entry` and run the period search.
pub fn analyze_star<A: Archive + ?Sized>(
    entry: &CatalogEntry,
    archive: &A,
    config: &PipelineConfig,
) -> Result<StarAnalysis, PipelineError> {
    let retrieved = source::retrieve(
        archive,
        &entry.identifier,
        config.cadence_s,
        config.exposure_selection,
        &config.cleaning_config(),
    )?;
    let name = star_name(entry, retrieved.object_id);
    let search = periodogram::search(&retrieved.lightcurve, &config.periodogram_config())?;
    info!(
        "{}: best period {:.6} d ({})",
        name,
        search.best_period,
        crate::review::view::plausibility_note(search.plausibility.is_plausible)
    );
    Ok(StarAnalysis {
        header: StarHeader {
            name,
            i_magnitude: entry.i_magnitude,
        },
        literature_period_days: entry.literature_period_days(),
        lightcurve: retrieved.lightcurve,
        search,
    })
}

/// Analyse one catalog row and run its interactive review.
pub fn process_star<A: Archive + ?Sized>(
    entry: &CatalogEntry,
    archive: &A,
    config: &PipelineConfig,
    frontend: &mut dyn ReviewFrontend,
    sink: &mut dyn ResultSink,
    predictor: Option<&dyn FlarePredictor>,
) -> Result<ReviewOutcome, PipelineError> {
    let analysis = analyze_star(entry, archive, config)?;
    let context = ReviewContext {
        star: analysis.header.clone(),
        literature_period_days: analysis.literature_period_days,
        candidates: analysis.search.candidates,
    };
    let mut views = LiveViews::new(&analysis, config.binning(), config.fit_config());
    if let Some(p) = predictor {
        views = views.with_predictor(p);
    }
    CandidateReviewSession::new(&context, config.tolerances()).run(&mut views, frontend, sink)
}

/// Process every entry in order. Non-fatal per-star errors are logged and
/// counted as skipped.
pub fn run_batch<A: Archive + ?Sized>(
    entries: &[CatalogEntry],
    archive: &A,
    config: &PipelineConfig,
    frontend: &mut dyn ReviewFrontend,
    sink: &mut dyn ResultSink,
    predictor: Option<&dyn FlarePredictor>,
) -> Result<BatchSummary, PipelineError> {
    let mut summary = BatchSummary::default();
    for (i, entry) in entries.iter().enumerate() {
        info!("[{}/{}] {}", i + 1, entries.len(), entry.identifier);
        match process_star(entry, archive, config, frontend, sink, predictor) {
            Ok(outcome) => summary.record(&outcome),
            Err(e) if e.is_fatal() => {
                error!("{}: {}; stopping batch", entry.identifier, e);
                return Err(e);
            }
            Err(e) => {
                warn!("{}: skipped: {}", entry.identifier, e);
                summary.skipped += 1;
            }
        }
    }
    info!(
        "Batch finished: {} committed, {} abandoned, {} skipped",
        summary.committed, summary.abandoned, summary.skipped
    );
    Ok(summary)
}

/// Convert and load the catalog, reset the results table if configured, then
/// run either the interactive or the two-phase preload workflow.
pub fn run<A: Archive + ?Sized>(
    config: &PipelineConfig,
    archive: &A,
    frontend: &mut dyn ReviewFrontend,
    predictor: Option<&dyn FlarePredictor>,
) -> Result<BatchSummary, PipelineError> {
    config.validate()?;
    catalog::commaize(&config.raw_catalog_path, &config.catalog_path)
        .map_err(|e| PipelineError::Catalog(format!("{:#}", e)))?;
    let entries = catalog::load_catalog(&config.catalog_path)
        .map_err(|e| PipelineError::Catalog(format!("{:#}", e)))?;

    let mut sink = CsvResultSink::new(&config.results_path);
    if config.reset_results_on_start {
        sink.reset()?;
    }

    if config.preload {
        let renderer = SvgRenderer::new(&config.preload_dir);
        let manifest = preload::generate(&entries, archive, config, &renderer, predictor)?;
        preload::review(&manifest.for_catalog(&entries), frontend, &mut sink, &config.tolerances())
    } else {
        run_batch(&entries, archive, config, frontend, &mut sink, predictor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let c = PipelineConfig::default();
        let pg = c.periodogram_config();
        assert!((pg.minimum_period_days - 2.0 * 120.0 / 86_400.0).abs() < 1e-15);
        assert_eq!(pg.maximum_period_days, 14.0);
        assert_eq!(pg.oversample_factor, 10.0);
        assert_eq!(pg.max_frequencies, 200_000);
        assert_eq!(c.binning().doppler_target_bins, 100);
        assert_eq!(c.exposure_selection, ExposureSelection::Append);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let c: PipelineConfig = toml::from_str(
            "cadence_s = 20.0\npreload = true\nexposure_selection = \"best_precision\"\nminimum_period_days = 0.01\n",
        )
        .unwrap();
        assert_eq!(c.cadence_s, 20.0);
        assert!(c.preload);
        assert_eq!(c.exposure_selection, ExposureSelection::BestPrecision);
        assert_eq!(c.periodogram_config().minimum_period_days, 0.01);
        assert_eq!(c.target_bins, 50);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw.txt");
        std::fs::write(&raw, "iau_name i porb porbe\n").unwrap();
        let base = PipelineConfig {
            raw_catalog_path: raw,
            catalog_path: dir.path().join("catalog.csv"),
            ..Default::default()
        };
        assert!(base.validate().is_ok());

        let mut c = base.clone();
        c.cadence_s = 0.0;
        assert!(matches!(c.validate(), Err(PipelineError::Config(_))));

        let mut c = base.clone();
        c.minimum_period_days = Some(20.0);
        assert!(c.validate().is_err());

        let mut c = base.clone();
        c.max_periodogram_frequencies = 0;
        assert!(matches!(c.validate(), Err(PipelineError::Config(_))));

        let mut c = base.clone();
        c.raw_catalog_path = dir.path().join("missing.txt");
        let err = c.validate().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_star_name() {
        let entry = CatalogEntry {
            identifier: "SDSS J0101+0101".into(),
            i_magnitude: 15.0,
            literature_period_hours: 0.0,
            literature_period_uncertainty_hours: 0.0,
        };
        assert_eq!(star_name(&entry, Some(123)), "TIC 123");
        assert_eq!(star_name(&entry, None), "SDSS J0101+0101");
    }
}
