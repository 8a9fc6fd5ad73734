//! Shared synthetic photometry for the integration tests.
//!
//! Stars are sinusoids on a 1000 e/s baseline with Gaussian noise, sampled
//! every 6 minutes over 6 days. The search range used with them covers
//! 0.1 to 3 days so the periodograms stay small.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::f64::consts::PI;
use std::fs;
use std::io::Write;
use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use binary_vetting::review::ViewKind;
use binary_vetting::{
    Archive, ClassificationRecord, DiagnosticView, ExposureDescriptor, PipelineConfig, PipelineError,
    RawLightcurve, ResultSink, ReviewFrontend,
};

pub const BASELINE: f64 = 1000.0;
pub const SAMPLES: usize = 1440;
pub const SPAN_DAYS: f64 = 6.0;
pub const START_TIME: f64 = 2000.0;

/// Sinusoid of relative `amplitude` and `period` plus relative Gaussian noise.
pub fn sine_star(period: f64, amplitude: f64, noise: f64, seed: u64) -> RawLightcurve {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, noise * BASELINE).unwrap();
    let mut raw = RawLightcurve::default();
    for i in 0..SAMPLES {
        let t = START_TIME + i as f64 * SPAN_DAYS / SAMPLES as f64;
        let signal = amplitude * (2.0 * PI * t / period).sin();
        raw.time.push(t);
        raw.flux.push(BASELINE * (1.0 + signal) + normal.sample(&mut rng));
        raw.flux_err.push(noise * BASELINE);
    }
    raw
}

/// Pipeline settings sized for [`sine_star`] data.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        cadence_s: 120.0,
        oversample_factor: 5.0,
        minimum_period_days: Some(0.1),
        maximum_period_days: 3.0,
        ..Default::default()
    }
}

/// In-memory archive: one 120 s exposure per known target.
#[derive(Default)]
pub struct MemoryArchive {
    stars: HashMap<String, (u64, RawLightcurve)>,
}

impl MemoryArchive {
    pub fn with_star(mut self, target: &str, object_id: u64, raw: RawLightcurve) -> Self {
        self.stars.insert(target.to_string(), (object_id, raw));
        self
    }
}

impl Archive for MemoryArchive {
    fn search(&self, target: &str) -> anyhow::Result<Vec<ExposureDescriptor>> {
        match self.stars.get(target) {
            Some((id, _)) => Ok(vec![ExposureDescriptor {
                cadence_s: 120.0,
                product_id: target.to_string(),
                object_id: Some(*id),
            }]),
            None => anyhow::bail!("archive lookup failed for {}", target),
        }
    }

    fn download(&self, exposure: &ExposureDescriptor) -> anyhow::Result<RawLightcurve> {
        self.stars
            .get(&exposure.product_id)
            .map(|(_, raw)| raw.clone())
            .ok_or_else(|| anyhow::anyhow!("no product {}", exposure.product_id))
    }
}

/// Answers prompts from a fixed script and records what was shown.
#[derive(Default)]
pub struct ScriptedFrontend {
    answers: VecDeque<String>,
    pub shown: Vec<(String, ViewKind)>,
    pub rejected: usize,
}

impl ScriptedFrontend {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: answers.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn remaining(&self) -> usize {
        self.answers.len()
    }
}

impl ReviewFrontend for ScriptedFrontend {
    fn prompt(&mut self, view: &DiagnosticView, _accepted: &[&str]) -> Result<String, PipelineError> {
        self.shown.push((view.star.name.clone(), view.kind));
        self.answers
            .pop_front()
            .ok_or_else(|| PipelineError::InputClosed("script exhausted".to_string()))
    }

    fn reject(&mut self, _error: &PipelineError) {
        self.rejected += 1;
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub records: Vec<ClassificationRecord>,
}

impl ResultSink for RecordingSink {
    fn append(&mut self, record: &ClassificationRecord) -> Result<(), PipelineError> {
        self.records.push(record.clone());
        Ok(())
    }
}

/// Write `raw` as a product file readable by `LocalArchive`.
pub fn write_product(path: &Path, raw: &RawLightcurve) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut f = fs::File::create(path).unwrap();
    writeln!(f, "time,flux,flux_err").unwrap();
    for i in 0..raw.time.len() {
        writeln!(f, "{},{},{}", raw.time[i], raw.flux[i], raw.flux_err[i]).unwrap();
    }
}
