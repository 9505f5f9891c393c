// Copyright 2026 Gleaner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Result persistence — JSON snapshots, image files, and a cumulative CSV
//! export.
//!
//! Every persisted outcome writes a per-instruction JSON snapshot under
//! `results/`. Image assets are written to `images/` and their record values
//! replaced by relative file paths before anything is serialized, so the
//! snapshots and the CSV stay text-only. The CSV export (`data.csv`) is
//! cumulative across runs: its header is the union of every field name ever
//! seen, in first-seen order, and older rows are backfilled with empty cells
//! when new columns appear.

use crate::engine::{ExtractionResult, Outcome, ResultSink};
use crate::extract::{FieldValue, Record};
use crate::instructions::Instruction;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to update CSV export")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Filesystem store rooted at one output directory.
pub struct Store {
    out_dir: PathBuf,
}

impl Store {
    /// Open (and lay out) the output directory.
    pub fn open(out_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let out_dir = out_dir.into();
        for dir in [out_dir.join("results"), out_dir.join("images")] {
            fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
                path: dir.display().to_string(),
                source,
            })?;
        }
        Ok(Self { out_dir })
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Persist one extraction result: images first, then the JSON snapshot,
    /// then the CSV rows.
    pub fn persist_result(&self, result: &ExtractionResult) -> Result<(), StoreError> {
        let mut result = result.clone();
        for record in &mut result.data {
            for (_, value) in record.iter_mut() {
                self.substitute_assets(value)?;
            }
        }

        let stem = snapshot_stem(result.id.as_deref());
        self.write_snapshot(&stem, &serde_json::to_value(&result)?)?;
        self.append_csv(&result.data)?;
        Ok(())
    }

    /// Persist a readiness failure payload as a snapshot of its own.
    pub fn persist_failure(&self, id: Option<&str>, error: &str) -> Result<(), StoreError> {
        let stem = snapshot_stem(id);
        self.write_snapshot(&stem, &serde_json::json!({ "error": error }))
    }

    fn write_snapshot(&self, stem: &str, value: &serde_json::Value) -> Result<(), StoreError> {
        let path = self.out_dir.join("results").join(format!("{stem}.json"));
        let body = serde_json::to_string_pretty(value)?;
        fs::write(&path, body).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "wrote result snapshot");
        Ok(())
    }

    /// Replace every image asset in the value tree with the relative path of
    /// its written file.
    fn substitute_assets(&self, value: &mut FieldValue) -> Result<(), StoreError> {
        match value {
            FieldValue::Text(_) => Ok(()),
            FieldValue::Asset(asset) => {
                let rel = self.write_image(&asset.file_name, &asset.extension, &asset.bytes)?;
                *value = FieldValue::Text(rel);
                Ok(())
            }
            FieldValue::Many(items) => {
                for item in items {
                    self.substitute_assets(item)?;
                }
                Ok(())
            }
        }
    }

    /// Write image bytes under `images/`, suffixing the name until it is
    /// unique. Returns the path relative to the output directory.
    fn write_image(&self, base: &str, ext: &str, bytes: &[u8]) -> Result<String, StoreError> {
        let images = self.out_dir.join("images");
        let mut file_name = format!("{base}.{ext}");
        let mut counter = 0u32;
        while images.join(&file_name).exists() {
            counter += 1;
            file_name = format!("{base}-{counter}.{ext}");
        }

        let path = images.join(&file_name);
        fs::write(&path, bytes).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(format!("images/{file_name}"))
    }

    /// Append this run's records to the cumulative CSV export.
    fn append_csv(&self, records: &[Record]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let path = self.out_dir.join("data.csv");
        let (mut header, mut rows) = read_csv(&path)?;

        for record in records {
            for (name, _) in record.iter() {
                if !header.iter().any(|h| h == name) {
                    header.push(name.to_string());
                }
            }
            let row = header
                .iter()
                .map(|h| record.get(h).map(render_cell).unwrap_or_default())
                .collect();
            rows.push(row);
        }

        // Earlier rows predate newly discovered columns.
        for row in &mut rows {
            row.resize(header.len(), String::new());
        }

        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(&header)?;
        for row in &rows {
            writer.write_record(row)?;
        }
        writer.flush().map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(())
    }
}

impl ResultSink for Store {
    fn persist(&mut self, instruction: &Instruction, outcome: &Outcome) -> anyhow::Result<()> {
        match outcome {
            Outcome::Extracted(result) => self.persist_result(result)?,
            Outcome::Failed { error } => {
                self.persist_failure(instruction.id.as_deref(), error)?
            }
        }
        Ok(())
    }
}

/// Snapshot file stem: the instruction id, else a timestamped fallback.
fn snapshot_stem(id: Option<&str>) -> String {
    match id.map(str::trim).filter(|s| !s.is_empty()) {
        Some(id) => id.to_string(),
        None => format!("scrape-{}", chrono::Utc::now().timestamp_millis()),
    }
}

/// Text values pass through; anything structured is serialized as JSON.
fn render_cell(value: &FieldValue) -> String {
    match value {
        FieldValue::Text(text) => text.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Read an existing CSV export into header and rows. A missing file is an
/// empty export.
fn read_csv(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>), StoreError> {
    if !path.exists() {
        return Ok((Vec::new(), Vec::new()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut records = reader.records();
    let header = match records.next() {
        Some(first) => first?.iter().map(str::to_string).collect(),
        None => Vec::new(),
    };

    let mut rows = Vec::new();
    for record in records {
        rows.push(record?.iter().map(str::to_string).collect());
    }
    Ok((header, rows))
}
