//! # binary_vetting
//!
//! Orbital period search and **operator vetting** for close binary star
//! lightcurves.
//!
//! For every star in a candidate catalog the pipeline retrieves space
//! photometry at a chosen cadence, computes a Lomb–Scargle periodogram,
//! offers the peak period and its half/double aliases to a human reviewer,
//! fits a sinusoid at the accepted period, and asks about secondary effects
//! (eclipses, Doppler beaming, flares). Irradiation and ellipsoidal variation
//! are derived from the literature period. Accepted stars are appended to a
//! CSV results table.
//!
//! ## Example
//!
//! ```no_run
//! use std::io;
//! use binary_vetting::{LocalArchive, PipelineConfig, TerminalFrontend};
//!
//! let config = PipelineConfig {
//!     cadence_s: 120.0,
//!     ..Default::default()
//! };
//! let archive = LocalArchive::new(&config.archive_root);
//! let mut frontend = TerminalFrontend::new(io::stdin().lock(), io::stdout());
//!
//! let summary = binary_vetting::run(&config, &archive, &mut frontend, None).unwrap();
//! println!("{} stars committed", summary.committed);
//! ```
//!
//! ## Workflow
//!
//! 1. **Retrieval**: exposures at the requested cadence are cleaned
//!    (flagged, missing and outlier samples removed), normalised to a zero
//!    baseline and appended, or the quietest one is kept
//! 2. **Period search**: amplitude-normalised Lomb–Scargle periodogram
//!    between twice the cadence and 14 days; the peak P yields the candidates
//!    P/2, P and 2P plus an advisory 5σ plausibility verdict
//! 3. **Review**: candidate selection, real-period confirmation, then one
//!    yes/no per secondary effect; invalid keys re-prompt
//! 4. **Commit**: one row per accepted star in the results table
//!
//! In preload mode all diagnostic images are rendered first, and the review
//! runs afterwards from the stored images.

pub mod archive;
pub mod catalog;
pub mod error;
pub mod flare;
pub mod lightcurve;
pub mod periodogram;
pub mod pipeline;
pub mod preload;
pub mod render;
pub mod results;
pub mod review;
pub mod signal;
pub mod sine_fit;
pub mod source;

pub use archive::{Archive, ExposureDescriptor, LocalArchive};
pub use catalog::{commaize, load_catalog, CatalogEntry};
pub use error::PipelineError;
pub use flare::FlarePredictor;
pub use lightcurve::{CleaningConfig, Lightcurve, LightcurveError, RawLightcurve};
pub use periodogram::{CandidateSet, PeriodSearch, Periodogram, PeriodogramConfig};
pub use pipeline::{analyze_star, process_star, run, run_batch, BatchSummary, PipelineConfig};
pub use render::SvgRenderer;
pub use results::{ClassificationRecord, CsvResultSink, ResultSink};
pub use review::{
    derive_secondary_labels, CandidateReviewSession, DiagnosticView, Effect, ReviewContext, ReviewFrontend,
    ReviewOutcome, TerminalFrontend, ViewProvider,
};
pub use sine_fit::{fit_sine, FitError, SineFit, SineFitConfig, SineSeed};
pub use source::ExposureSelection;
