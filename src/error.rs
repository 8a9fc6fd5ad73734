//! Error taxonomy for a vetting run.
//!
//! Errors are split by how far they propagate. Per-star conditions
//! (no data, fit failure) are recovered at the batch boundary and the star is
//! skipped. Persistence, configuration and operator-channel failures halt the
//! batch, see [`PipelineError::is_fatal`].

use std::path::PathBuf;

use thiserror::Error;

use crate::lightcurve::LightcurveError;
use crate::periodogram::PeriodogramError;
use crate::sine_fit::FitError;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Archive lookup failed, no exposure at the requested cadence, or the
    /// lightcurve was degenerate.
    #[error("no usable data for {star}: {reason}")]
    NoDataForStar { star: String, reason: String },

    /// Keystroke outside the accepted set for the current prompt.
    #[error("invalid operator input {input:?}, expected one of {accepted:?}")]
    InvalidOperatorInput {
        input: String,
        accepted: Vec<String>,
    },

    #[error("sine fit failed: {0}")]
    FitFailure(#[from] FitError),

    #[error("periodogram failed: {0}")]
    Periodogram(#[from] PeriodogramError),

    #[error("invalid lightcurve: {0}")]
    Lightcurve(#[from] LightcurveError),

    /// The results destination could not be written.
    #[error("cannot persist results to {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    /// The operator input channel closed or failed mid-session.
    #[error("operator input unavailable: {0}")]
    InputClosed(String),
}

impl PipelineError {
    /// Shorthand for [`PipelineError::NoDataForStar`].
    pub fn no_data(star: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NoDataForStar {
            star: star.into(),
            reason: reason.into(),
        }
    }

    /// Fatal errors halt the whole batch; everything else skips the current star.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::Persistence { .. }
                | PipelineError::Config(_)
                | PipelineError::Catalog(_)
                | PipelineError::InputClosed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(!PipelineError::no_data("TIC 1", "archive offline").is_fatal());
        assert!(!PipelineError::FitFailure(FitError::TooFewSamples(1)).is_fatal());
        assert!(!PipelineError::InvalidOperatorInput {
            input: "x".into(),
            accepted: vec!["y".into(), "n".into()],
        }
        .is_fatal());

        let persistence = PipelineError::Persistence {
            path: PathBuf::from("/nonexistent/periods.csv"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(persistence.is_fatal());
        assert!(PipelineError::InputClosed("eof".into()).is_fatal());
    }

    #[test]
    fn test_display_names_star() {
        let e = PipelineError::no_data("SDSS J0101+0101", "no exposure at 120 s cadence");
        assert_eq!(
            e.to_string(),
            "no usable data for SDSS J0101+0101: no exposure at 120 s cadence"
        );
    }
}
