//! Operator prompt abstraction and the terminal implementation.

use std::io::{BufRead, Write};

use tracing::warn;

use super::view::DiagnosticView;
use crate::error::PipelineError;
use crate::render::SvgRenderer;

/// Shows a view and blocks until the operator answers.
pub trait ReviewFrontend {
    /// Present `view` and return the raw answer. The session validates it
    /// against `accepted`.
    fn prompt(&mut self, view: &DiagnosticView, accepted: &[&str]) -> Result<String, PipelineError>;

    /// Called after an answer was rejected, before the same view is prompted again.
    fn reject(&mut self, _error: &PipelineError) {}
}

/// Line-based prompt over any reader/writer pair (stdin/stdout in the binary).
///
/// When a renderer is attached each view is also written as an SVG image and
/// its path printed, so it can be opened next to the terminal.
pub struct TerminalFrontend<R, W> {
    reader: R,
    writer: W,
    renderer: Option<SvgRenderer>,
}

impl<R: BufRead, W: Write> TerminalFrontend<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            renderer: None,
        }
    }

    pub fn with_renderer(mut self, renderer: SvgRenderer) -> Self {
        self.renderer = Some(renderer);
        self
    }

    fn io_error(e: std::io::Error) -> PipelineError {
        PipelineError::InputClosed(e.to_string())
    }
}

impl<R: BufRead, W: Write> ReviewFrontend for TerminalFrontend<R, W> {
    fn prompt(&mut self, view: &DiagnosticView, accepted: &[&str]) -> Result<String, PipelineError> {
        write!(self.writer, "\n{}", view.summary()).map_err(Self::io_error)?;
        if let Some(renderer) = &self.renderer {
            match renderer.render(view) {
                Ok(path) => writeln!(self.writer, "  plot: {}", path.display()).map_err(Self::io_error)?,
                Err(e) => warn!("{}: cannot render {} view: {:#}", view.star.name, view.kind.name(), e),
            }
        }
        write!(self.writer, "[{}] > ", accepted.join("/")).map_err(Self::io_error)?;
        self.writer.flush().map_err(Self::io_error)?;

        let mut line = String::new();
        let n = self.reader.read_line(&mut line).map_err(Self::io_error)?;
        if n == 0 {
            return Err(PipelineError::InputClosed("end of input".to_string()));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn reject(&mut self, error: &PipelineError) {
        let _ = writeln!(self.writer, "  {}", error);
    }
}
