//! Operator review of one star's period candidates.
//!
//! The session walks a fixed sequence of prompts:
//!
//! ```text
//! candidate selection ─► real-period confirmation ─► eclipsing ─► doppler ─► flares ─► derive ─► commit
//!        │ 'n'                     │ 'n'
//!        └──────────► abandon ◄────┘
//! ```
//!
//! Only the first two prompts can abandon the star. Once the period is
//! confirmed real, all three effect prompts are answered before the record
//! is committed. A keystroke outside the accepted set is reported and the
//! same prompt is shown again.
//!
//! Irradiation and ellipsoidal variation are not asked; they are derived from
//! the accepted and literature periods by [`derive_secondary_labels`].

pub mod frontend;
pub mod view;

pub use frontend::{ReviewFrontend, TerminalFrontend};
pub use view::{DiagnosticView, LiveViews, StarAnalysis, StarHeader, ViewKind};

use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::periodogram::CandidateSet;
use crate::results::{ClassificationRecord, ResultSink};

/// Keys accepted at the candidate-selection prompt.
pub const CANDIDATE_KEYS: [&str; 4] = ["1", "2", "3", "n"];
/// Keys accepted at every yes/no prompt.
pub const YES_NO_KEYS: [&str; 2] = ["y", "n"];

/// Secondary effect asked about after confirmation, in prompt order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Eclipsing,
    DopplerBeaming,
    Flares,
}

impl Effect {
    pub const ORDER: [Effect; 3] = [Effect::Eclipsing, Effect::DopplerBeaming, Effect::Flares];

    pub fn view_kind(self) -> ViewKind {
        match self {
            Effect::Eclipsing => ViewKind::Eclipsing,
            Effect::DopplerBeaming => ViewKind::Doppler,
            Effect::Flares => ViewKind::Flares,
        }
    }
}

/// Source of the view shown at each prompt.
pub trait ViewProvider {
    fn candidates(&mut self) -> Result<DiagnosticView, PipelineError>;
    fn confirmation(&mut self, accepted_period: f64) -> Result<DiagnosticView, PipelineError>;
    fn effect(&mut self, effect: Effect, accepted_period: f64) -> Result<DiagnosticView, PipelineError>;
}

/// Operator answers for the three effect prompts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EffectFlags {
    pub eclipsing: bool,
    pub doppler_beaming: bool,
    pub flares: bool,
}

impl EffectFlags {
    fn set(&mut self, effect: Effect, value: bool) {
        match effect {
            Effect::Eclipsing => self.eclipsing = value,
            Effect::DopplerBeaming => self.doppler_beaming = value,
            Effect::Flares => self.flares = value,
        }
    }
}

/// Labels computed from the period relationship.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SecondaryLabels {
    pub irradiation: bool,
    pub ellipsoidal: bool,
}

/// Relative tolerances for [`derive_secondary_labels`].
#[derive(Debug, Clone, Copy)]
pub struct LabelTolerances {
    /// Default 1e-2.
    pub irradiation_rel_tol: f64,
    /// Default 1e-2.
    pub ellipsoidal_rel_tol: f64,
}

impl Default for LabelTolerances {
    fn default() -> Self {
        Self {
            irradiation_rel_tol: 1e-2,
            ellipsoidal_rel_tol: 1e-2,
        }
    }
}

fn rel_close(a: f64, b: f64, rel_tol: f64) -> bool {
    (a - b).abs() <= rel_tol * a.abs().max(b.abs())
}

/// Irradiation: accepted period equals the literature period.
/// Ellipsoidal: accepted period is half the literature period.
///
/// Both are false when the literature period is unknown (≤ 0 or non-finite).
pub fn derive_secondary_labels(
    accepted_period: f64,
    literature_period: f64,
    tolerances: &LabelTolerances,
) -> SecondaryLabels {
    if !(literature_period > 0.0 && literature_period.is_finite()) {
        return SecondaryLabels::default();
    }
    SecondaryLabels {
        irradiation: rel_close(accepted_period, literature_period, tolerances.irradiation_rel_tol),
        ellipsoidal: rel_close(
            (accepted_period / literature_period).abs(),
            0.5,
            tolerances.ellipsoidal_rel_tol,
        ),
    }
}

/// Why a star was dropped without a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    /// No candidate was acceptable.
    NoCandidate,
    /// The accepted period was judged not real.
    NotReal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReviewOutcome {
    Committed(ClassificationRecord),
    Abandoned(AbandonReason),
}

/// Star-level facts the session needs besides the views.
#[derive(Debug, Clone)]
pub struct ReviewContext {
    pub star: StarHeader,
    pub literature_period_days: f64,
    pub candidates: CandidateSet,
}

enum State {
    CandidateSelection,
    Confirmation { accepted: f64 },
    EffectReview { accepted: f64, index: usize, flags: EffectFlags },
    Derive { accepted: f64, flags: EffectFlags },
    Commit(ClassificationRecord),
    Abandon(AbandonReason),
}

/// One star's review, from candidate selection to commit or abandon.
pub struct CandidateReviewSession<'a> {
    context: &'a ReviewContext,
    tolerances: LabelTolerances,
}

impl<'a> CandidateReviewSession<'a> {
    pub fn new(context: &'a ReviewContext, tolerances: LabelTolerances) -> Self {
        Self { context, tolerances }
    }

    /// Prompt until the answer is one of `accepted`.
    fn ask(
        &self,
        frontend: &mut dyn ReviewFrontend,
        view: &DiagnosticView,
        accepted: &[&str],
    ) -> Result<String, PipelineError> {
        loop {
            let raw = frontend.prompt(view, accepted)?;
            let answer = raw.trim().to_ascii_lowercase();
            if accepted.contains(&answer.as_str()) {
                debug!("{}: {} -> {:?}", self.context.star.name, view.kind.name(), answer);
                return Ok(answer);
            }
            let err = PipelineError::InvalidOperatorInput {
                input: raw,
                accepted: accepted.iter().map(|s| s.to_string()).collect(),
            };
            warn!("{}: {}", self.context.star.name, err);
            frontend.reject(&err);
        }
    }

    /// Drive the review to completion. A committed record is handed to `sink`
    /// before returning.
    pub fn run(
        &self,
        views: &mut dyn ViewProvider,
        frontend: &mut dyn ReviewFrontend,
        sink: &mut dyn ResultSink,
    ) -> Result<ReviewOutcome, PipelineError> {
        let ctx = self.context;
        let mut state = State::CandidateSelection;
        loop {
            state = match state {
                State::CandidateSelection => {
                    let view = views.candidates()?;
                    let answer = self.ask(frontend, &view, &CANDIDATE_KEYS)?;
                    let choice = answer.parse::<usize>().ok().and_then(|c| ctx.candidates.get(c));
                    match choice {
                        Some(accepted) => State::Confirmation { accepted },
                        None => State::Abandon(AbandonReason::NoCandidate),
                    }
                }
                State::Confirmation { accepted } => {
                    let view = views.confirmation(accepted)?;
                    if self.ask(frontend, &view, &YES_NO_KEYS)? == "y" {
                        State::EffectReview {
                            accepted,
                            index: 0,
                            flags: EffectFlags::default(),
                        }
                    } else {
                        State::Abandon(AbandonReason::NotReal)
                    }
                }
                State::EffectReview { accepted, index, mut flags } => match Effect::ORDER.get(index) {
                    Some(&effect) => {
                        let view = views.effect(effect, accepted)?;
                        let yes = self.ask(frontend, &view, &YES_NO_KEYS)? == "y";
                        flags.set(effect, yes);
                        State::EffectReview { accepted, index: index + 1, flags }
                    }
                    None => State::Derive { accepted, flags },
                },
                State::Derive { accepted, flags } => {
                    let labels =
                        derive_secondary_labels(accepted, ctx.literature_period_days, &self.tolerances);
                    State::Commit(ClassificationRecord {
                        star: ctx.star.name.clone(),
                        orbital_period_days: accepted,
                        literature_period_days: ctx.literature_period_days,
                        i_magnitude: ctx.star.i_magnitude,
                        eclipsing: flags.eclipsing,
                        doppler_beaming: flags.doppler_beaming,
                        flares: flags.flares,
                        irradiation: labels.irradiation,
                        ellipsoidal: labels.ellipsoidal,
                    })
                }
                State::Commit(record) => {
                    sink.append(&record)?;
                    return Ok(ReviewOutcome::Committed(record));
                }
                State::Abandon(reason) => {
                    info!("{}: abandoned ({:?})", ctx.star.name, reason);
                    return Ok(ReviewOutcome::Abandoned(reason));
                }
            };
        }
    }
}
