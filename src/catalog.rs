//! Candidate catalog: conversion of the raw query output and loading of
//! [`CatalogEntry`] rows.
//!
//! The raw catalog is a tab-separated export whose fields are themselves
//! space separated. [`commaize`] turns it into a plain CSV once; the
//! converted file is reused on later runs.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;

const HOURS_PER_DAY: f64 = 24.0;

/// One candidate star.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    /// Archive-resolvable name (`iau_name` column).
    pub identifier: String,
    /// i-band apparent magnitude; NaN when not listed.
    pub i_magnitude: f64,
    /// Published orbital period in hours; 0 when unknown.
    pub literature_period_hours: f64,
    pub literature_period_uncertainty_hours: f64,
}

impl CatalogEntry {
    pub fn literature_period_days(&self) -> f64 {
        self.literature_period_hours / HOURS_PER_DAY
    }

    pub fn has_literature_period(&self) -> bool {
        self.literature_period_hours > 0.0
    }
}

/// Convert the raw catalog at `raw` into comma-separated `converted`.
///
/// Each line is split on tabs, and within each field every run of
/// whitespace becomes a comma. Does nothing and returns `false` when
/// `converted` already exists.
pub fn commaize(raw: &Path, converted: &Path) -> Result<bool> {
    if converted.exists() {
        info!("Catalog already converted: {}", converted.display());
        return Ok(false);
    }
    let text = fs::read_to_string(raw)
        .with_context(|| format!("cannot read raw catalog {}", raw.display()))?;

    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let row: Vec<String> = line
            .split('\t')
            .map(|field| field.split_whitespace().collect::<Vec<_>>().join(","))
            .collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }

    if let Some(parent) = converted.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(converted, out)
        .with_context(|| format!("cannot write converted catalog {}", converted.display()))?;
    info!("Converted {} -> {}", raw.display(), converted.display());
    Ok(true)
}

fn parse_number(value: Option<&str>, empty: f64) -> Result<f64> {
    match value.map(str::trim) {
        None | Some("") => Ok(empty),
        Some(v) => v
            .parse::<f64>()
            .with_context(|| format!("invalid number {:?}", v)),
    }
}

/// Load catalog rows from a converted CSV file.
///
/// Columns are located by header name: `iau_name`, `i`, `porb`, `porbe`.
/// Empty `porb` means "unknown" (0), empty `i` is NaN.
pub fn load_catalog(path: &Path) -> Result<Vec<CatalogEntry>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("cannot open catalog {}", path.display()))?;

    let headers = reader.headers()?.clone();
    let column = |name: &str| -> Result<usize> {
        match headers.iter().position(|h| h == name) {
            Some(i) => Ok(i),
            None => bail!("catalog {} has no {:?} column", path.display(), name),
        }
    };
    let (name_col, mag_col, porb_col, porbe_col) =
        (column("iau_name")?, column("i")?, column("porb")?, column("porbe")?);

    let mut entries = Vec::new();
    for (row_idx, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("catalog row {}", row_idx + 1))?;
        let identifier = record.get(name_col).unwrap_or("").to_string();
        if identifier.is_empty() {
            continue;
        }
        let parse = |col: usize, empty: f64| {
            parse_number(record.get(col), empty)
                .with_context(|| format!("catalog row {} ({})", row_idx + 1, identifier))
        };
        entries.push(CatalogEntry {
            i_magnitude: parse(mag_col, f64::NAN)?,
            literature_period_hours: parse(porb_col, 0.0)?,
            literature_period_uncertainty_hours: parse(porbe_col, 0.0)?,
            identifier,
        });
    }
    info!("Loaded {} catalog entries from {}", entries.len(), path.display());
    Ok(entries)
}
