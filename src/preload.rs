//! Two-phase preload workflow.
//!
//! Phase 1 ([`generate`]) runs unattended: every catalog star is analysed and
//! rendered to SVG. The candidate view is drawn once; the confirmation and
//! effect views are drawn for each of the three candidates, fitted at that
//! candidate, so phase 2 can show whichever one the operator accepts.
//! Stars already in the manifest are not analysed again and existing images
//! are kept, so an interrupted run can be resumed.
//!
//! Phase 2 ([`review`]) is purely interactive: it replays the same review
//! session for every manifest entry, with views backed by the stored images.
//!
//! The manifest is persisted with rkyv at `<preload_dir>/manifest.rkyv`.

use std::io;
use std::path::{Path, PathBuf};

use rkyv::{Archive, Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::archive::Archive as PhotometryArchive;
use crate::catalog::CatalogEntry;
use crate::error::PipelineError;
use crate::flare::{self, FlarePredictor};
use crate::periodogram::CandidateSet;
use crate::pipeline::{analyze_star, BatchSummary, PipelineConfig};
use crate::render::SvgRenderer;
use crate::results::ResultSink;
use crate::review::view::{self, StarAnalysis, ViewContent};
use crate::review::{
    CandidateReviewSession, DiagnosticView, Effect, LabelTolerances, ReviewContext, ReviewFrontend, StarHeader,
    ViewKind, ViewProvider,
};

/// File name of the manifest inside the preload directory.
pub const MANIFEST_FILE: &str = "manifest.rkyv";

/// Images of the views that depend on the accepted period, for one candidate.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct CandidateImages {
    /// Candidate period in days.
    pub period_days: f64,
    pub period: String,
    pub eclipsing: String,
    pub doppler: String,
    pub flares: String,
}

impl CandidateImages {
    /// Image for `kind`; `None` for the candidate-selection view.
    pub fn get(&self, kind: ViewKind) -> Option<&str> {
        match kind {
            ViewKind::Candidates => None,
            ViewKind::Period => Some(&self.period),
            ViewKind::Eclipsing => Some(&self.eclipsing),
            ViewKind::Doppler => Some(&self.doppler),
            ViewKind::Flares => Some(&self.flares),
        }
    }
}

/// Star data recorded in phase 1.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct PreloadedStar {
    /// Catalog identifier the star was retrieved under.
    pub identifier: String,
    /// Reviewed star name.
    pub star: String,
    pub i_magnitude: f64,
    pub best_period_days: f64,
    pub literature_period_days: f64,
    pub plausible: bool,
    pub candidates_image: String,
    /// Per-candidate images in candidate order. Candidates whose fit failed
    /// are absent.
    pub candidates: Vec<CandidateImages>,
}

impl PreloadedStar {
    /// Images rendered for the candidate at `period`.
    pub fn images_for(&self, period: f64) -> Option<&CandidateImages> {
        self.candidates
            .iter()
            .find(|c| (c.period_days - period).abs() <= 1e-12 * period.abs())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Archive, Serialize, Deserialize)]
pub struct PreloadManifest {
    pub stars: Vec<PreloadedStar>,
}

// ── Serialization ───────────────────────────────────────────────────────────

impl PreloadManifest {
    pub fn path_in(preload_dir: &Path) -> PathBuf {
        preload_dir.join(MANIFEST_FILE)
    }

    pub fn to_rkyv_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map_err(|e| anyhow::anyhow!("rkyv serialization failed: {}", e))?;
        Ok(bytes.to_vec())
    }

    /// Save the manifest to a file using rkyv.
    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let bytes = self.to_rkyv_bytes()?;
        std::fs::write(path, &bytes)?;
        info!("Saved preload manifest to {} ({} stars)", path.display(), self.stars.len());
        Ok(())
    }

    /// Load a manifest from an rkyv file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)?;
        let mut aligned = rkyv::util::AlignedVec::<16>::new();
        aligned.extend_from_slice(&bytes);
        let manifest = rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| anyhow::anyhow!("rkyv deserialization failed: {}", e))?;
        info!("Loaded preload manifest: {} stars", manifest.stars.len());
        Ok(manifest)
    }

    /// Whether the catalog star `identifier` has been preloaded.
    pub fn contains(&self, identifier: &str) -> bool {
        self.stars.iter().any(|s| s.identifier == identifier)
    }

    /// The preloaded stars of `entries`, in catalog order.
    pub fn for_catalog(&self, entries: &[CatalogEntry]) -> PreloadManifest {
        let stars = entries
            .iter()
            .filter_map(|e| self.stars.iter().find(|s| s.identifier == e.identifier))
            .cloned()
            .collect();
        PreloadManifest { stars }
    }
}

fn persistence(path: &Path, e: anyhow::Error) -> PipelineError {
    PipelineError::Persistence {
        path: path.to_path_buf(),
        source: io::Error::other(format!("{:#}", e)),
    }
}

// ── Phase 1 ─────────────────────────────────────────────────────────────────

/// Render one view unless its image already exists.
fn render_once(renderer: &SvgRenderer, view: &DiagnosticView, tag: Option<&str>) -> Result<String, PipelineError> {
    let path = renderer.tagged_image_path(view.kind, &view.star.name, tag);
    if path.exists() {
        info!("{} plot already exists for {}", view.kind.name(), view.star.name);
        return Ok(path.to_string_lossy().into_owned());
    }
    renderer
        .render_tagged(view, tag)
        .map(|p| p.to_string_lossy().into_owned())
        .map_err(|e| PipelineError::no_data(&view.star.name, format!("rendering failed: {:#}", e)))
}

/// Fit and render the period-dependent views of candidate `key` (1-based).
fn preload_candidate(
    analysis: &StarAnalysis,
    key: usize,
    period: f64,
    config: &PipelineConfig,
    renderer: &SvgRenderer,
    probability: Option<&[f64]>,
) -> Result<CandidateImages, PipelineError> {
    let fit = analysis.fit_at(period, &config.fit_config())?;
    let bins = config.binning();
    let tag = format!("c{}", key);
    let tag = Some(tag.as_str());
    Ok(CandidateImages {
        period_days: period,
        period: render_once(renderer, &view::confirmation_view(analysis, period, &fit, &bins), tag)?,
        eclipsing: render_once(renderer, &view::eclipsing_view(analysis, period, &fit, &bins), tag)?,
        doppler: render_once(renderer, &view::doppler_view(analysis, period, &fit, &bins), tag)?,
        flares: render_once(renderer, &view::flares_view(analysis, period, &fit, probability), tag)?,
    })
}

fn preload_star<A: PhotometryArchive + ?Sized>(
    entry: &CatalogEntry,
    archive: &A,
    config: &PipelineConfig,
    renderer: &SvgRenderer,
    predictor: Option<&dyn FlarePredictor>,
) -> Result<PreloadedStar, PipelineError> {
    let analysis = analyze_star(entry, archive, config)?;
    let name = analysis.header.name.clone();

    let probability = predictor.and_then(|p| {
        let lc = &analysis.lightcurve;
        flare::predict_checked(p, lc.time(), lc.flux(), lc.flux_err())
            .map_err(|e| warn!("{}: flare predictor failed: {:#}", name, e))
            .ok()
    });

    let candidates_image = render_once(renderer, &view::candidates_view(&analysis, &config.binning()), None)?;

    let mut candidates = Vec::with_capacity(3);
    for (i, period) in analysis.search.candidates.as_array().into_iter().enumerate() {
        let key = i + 1;
        match preload_candidate(&analysis, key, period, config, renderer, probability.as_deref()) {
            Ok(images) => candidates.push(images),
            // The peak itself must be reviewable
            Err(e) if period == analysis.search.best_period || e.is_fatal() => return Err(e),
            Err(e) => warn!("{}: candidate {} ({:.6} d) not preloaded: {}", name, key, period, e),
        }
    }

    Ok(PreloadedStar {
        identifier: entry.identifier.clone(),
        star: name,
        i_magnitude: analysis.header.i_magnitude,
        best_period_days: analysis.search.best_period,
        literature_period_days: analysis.literature_period_days,
        plausible: analysis.search.plausibility.is_plausible,
        candidates_image,
        candidates,
    })
}

/// Phase 1: analyse and render every star not yet in the manifest, saving
/// the manifest after each one. Returns the full manifest.
pub fn generate<A: PhotometryArchive + ?Sized>(
    entries: &[CatalogEntry],
    archive: &A,
    config: &PipelineConfig,
    renderer: &SvgRenderer,
    predictor: Option<&dyn FlarePredictor>,
) -> Result<PreloadManifest, PipelineError> {
    let manifest_path = PreloadManifest::path_in(renderer.out_dir());
    std::fs::create_dir_all(renderer.out_dir()).map_err(|e| PipelineError::Persistence {
        path: renderer.out_dir().to_path_buf(),
        source: e,
    })?;

    let mut manifest = if manifest_path.exists() {
        PreloadManifest::load_from_file(&manifest_path).unwrap_or_else(|e| {
            warn!("Ignoring unreadable manifest {}: {:#}", manifest_path.display(), e);
            PreloadManifest::default()
        })
    } else {
        PreloadManifest::default()
    };

    for (i, entry) in entries.iter().enumerate() {
        if manifest.contains(&entry.identifier) {
            info!("[{}/{}] {}: already preloaded", i + 1, entries.len(), entry.identifier);
            continue;
        }
        info!("[{}/{}] preloading {}", i + 1, entries.len(), entry.identifier);
        match preload_star(entry, archive, config, renderer, predictor) {
            Ok(star) => {
                manifest.stars.push(star);
                manifest
                    .save_to_file(&manifest_path)
                    .map_err(|e| persistence(&manifest_path, e))?;
            }
            Err(e) if e.is_fatal() => {
                error!("{}: {}; stopping preload", entry.identifier, e);
                return Err(e);
            }
            Err(e) => warn!("{}: skipped: {}", entry.identifier, e),
        }
    }
    manifest
        .save_to_file(&manifest_path)
        .map_err(|e| persistence(&manifest_path, e))?;
    Ok(manifest)
}

// ── Phase 2 ─────────────────────────────────────────────────────────────────

/// Views backed by the images of one preloaded star.
struct ImageViews<'a> {
    star: &'a PreloadedStar,
}

impl ImageViews<'_> {
    fn view(&self, kind: ViewKind, period: f64, image: &str) -> DiagnosticView {
        let mut notes = vec![format!("period at max power {:.6} d", self.star.best_period_days)];
        if kind == ViewKind::Candidates {
            notes.push(view::plausibility_note(self.star.plausible).to_string());
        }
        DiagnosticView {
            kind,
            star: StarHeader {
                name: self.star.star.clone(),
                i_magnitude: self.star.i_magnitude,
            },
            headline: kind.headline(period),
            notes,
            content: ViewContent::Image(PathBuf::from(image)),
        }
    }

    fn candidate_view(&self, kind: ViewKind, accepted: f64) -> Result<DiagnosticView, PipelineError> {
        let image = self
            .star
            .images_for(accepted)
            .and_then(|c| c.get(kind))
            .ok_or_else(|| {
                PipelineError::no_data(
                    &self.star.star,
                    format!("no preloaded {} image for period {:.6} d", kind.name(), accepted),
                )
            })?;
        Ok(self.view(kind, accepted, image))
    }
}

impl ViewProvider for ImageViews<'_> {
    fn candidates(&mut self) -> Result<DiagnosticView, PipelineError> {
        Ok(self.view(
            ViewKind::Candidates,
            self.star.best_period_days,
            &self.star.candidates_image,
        ))
    }

    fn confirmation(&mut self, accepted: f64) -> Result<DiagnosticView, PipelineError> {
        self.candidate_view(ViewKind::Period, accepted)
    }

    fn effect(&mut self, effect: Effect, accepted: f64) -> Result<DiagnosticView, PipelineError> {
        self.candidate_view(effect.view_kind(), accepted)
    }
}

/// Phase 2: review every manifest entry in order.
pub fn review(
    manifest: &PreloadManifest,
    frontend: &mut dyn ReviewFrontend,
    sink: &mut dyn ResultSink,
    tolerances: &LabelTolerances,
) -> Result<BatchSummary, PipelineError> {
    let mut summary = BatchSummary::default();
    for (i, star) in manifest.stars.iter().enumerate() {
        info!("[{}/{}] reviewing {}", i + 1, manifest.stars.len(), star.star);
        let Some(candidates) = CandidateSet::from_peak(star.best_period_days) else {
            warn!("{}: skipped: invalid stored period {}", star.star, star.best_period_days);
            summary.skipped += 1;
            continue;
        };
        let context = ReviewContext {
            star: StarHeader {
                name: star.star.clone(),
                i_magnitude: star.i_magnitude,
            },
            literature_period_days: star.literature_period_days,
            candidates,
        };
        let mut views = ImageViews { star };
        match CandidateReviewSession::new(&context, *tolerances).run(&mut views, frontend, sink) {
            Ok(outcome) => summary.record(&outcome),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("{}: skipped: {}", star.star, e);
                summary.skipped += 1;
            }
        }
    }
    info!(
        "Preload review finished: {} committed, {} abandoned, {} skipped",
        summary.committed, summary.abandoned, summary.skipped
    );
    Ok(summary)
}
