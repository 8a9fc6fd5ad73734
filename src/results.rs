//! Classification records and the append-only results table.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::error::PipelineError;

/// Final per-star output, one row of the results table.
///
/// Field order is the column order of the table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationRecord {
    #[serde(rename = "Star")]
    pub star: String,
    #[serde(rename = "Orbital Period(days)")]
    pub orbital_period_days: f64,
    #[serde(rename = "Literature Period(days)")]
    pub literature_period_days: f64,
    #[serde(rename = "i Magnitude")]
    pub i_magnitude: f64,
    #[serde(rename = "Eclipsing")]
    pub eclipsing: bool,
    #[serde(rename = "Doppler beaming")]
    pub doppler_beaming: bool,
    #[serde(rename = "Flares")]
    pub flares: bool,
    #[serde(rename = "Irradiation")]
    pub irradiation: bool,
    #[serde(rename = "Ellipsoidal")]
    pub ellipsoidal: bool,
}

/// Column names of the results table, in order.
pub const RESULTS_HEADER: [&str; 9] = [
    "Star",
    "Orbital Period(days)",
    "Literature Period(days)",
    "i Magnitude",
    "Eclipsing",
    "Doppler beaming",
    "Flares",
    "Irradiation",
    "Ellipsoidal",
];

/// Append-only destination for committed records.
pub trait ResultSink {
    /// Persist exactly one record. Failures are fatal for the batch.
    fn append(&mut self, record: &ClassificationRecord) -> Result<(), PipelineError>;
}

impl<S: ResultSink + ?Sized> ResultSink for &mut S {
    fn append(&mut self, record: &ClassificationRecord) -> Result<(), PipelineError> {
        (**self).append(record)
    }
}

/// Results table as a CSV file.
///
/// Each append opens the file, writes the header if the file did not exist
/// yet, writes one row and closes it again. Reviewing a star twice yields two rows.
#[derive(Debug, Clone)]
pub struct CsvResultSink {
    path: PathBuf,
}

impl CsvResultSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove an existing results file so the run starts a fresh table.
    pub fn reset(&self) -> Result<(), PipelineError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Removed previous results file {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.persistence(e)),
        }
    }

    fn persistence(&self, source: io::Error) -> PipelineError {
        PipelineError::Persistence {
            path: self.path.clone(),
            source,
        }
    }

    fn write_row(&self, record: &ClassificationRecord) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let exists = self.path.exists();
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(!exists).from_writer(file);
        writer.serialize(record).map_err(io::Error::from)?;
        writer.flush()
    }
}

impl ResultSink for CsvResultSink {
    fn append(&mut self, record: &ClassificationRecord) -> Result<(), PipelineError> {
        self.write_row(record).map_err(|e| self.persistence(e))?;
        info!(
            "{}: committed P={:.6} d to {}",
            record.star,
            record.orbital_period_days,
            self.path.display()
        );
        Ok(())
    }
}
