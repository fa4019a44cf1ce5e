//! Output writers & bundling
//!
//! Serializes patients to the requested artifact formats inside the
//! job-scoped output directory. Writers consume ordered batches so peak
//! memory stays proportional to the batch size, never the cohort size.
//!
//! - `json` — streaming `patients.json` array writer
//! - `csv` — `patients.csv` with the fixed column order
//! - `bundle` — zip bundle, optionally encrypted with a password-derived key

pub mod bundle;
pub mod csv;
pub mod json;

use crate::config::OutputFormat;
use crate::types::Patient;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("output I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("bundling error: {0}")]
    Bundle(String),
    #[error("encryption error: {0}")]
    Encryption(String),
}

/// Per-job writer set. Create once, feed ordered batches, finalize.
pub struct OutputWriters {
    dir: PathBuf,
    json: json::JsonPatientWriter,
    csv: Option<csv::CsvPatientWriter>,
    files: Vec<String>,
}

impl OutputWriters {
    /// Open writers for the requested formats inside `dir`.
    ///
    /// `patients.json` is always produced: it doubles as the summary
    /// artifact the timeline endpoints read. Formats without a writer
    /// are logged and skipped.
    pub fn create(dir: &Path, formats: &[OutputFormat]) -> Result<Self, OutputError> {
        std::fs::create_dir_all(dir)?;

        let unsupported: Vec<&OutputFormat> =
            formats.iter().filter(|f| !f.is_supported()).collect();
        if !unsupported.is_empty() {
            warn!(?unsupported, "Skipping output formats without a writer");
        }

        let json = json::JsonPatientWriter::create(&dir.join("patients.json"))?;
        let mut files = vec!["patients.json".to_string()];

        let csv = if formats.contains(&OutputFormat::Csv) {
            files.push("patients.csv".to_string());
            Some(csv::CsvPatientWriter::create(&dir.join("patients.csv"))?)
        } else {
            None
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            json,
            csv,
            files,
        })
    }

    /// Write one ordered batch of patients to every open writer.
    pub fn write_batch(&mut self, patients: &[Patient]) -> Result<(), OutputError> {
        for patient in patients {
            self.json.write_patient(patient)?;
            if let Some(csv) = self.csv.as_mut() {
                csv.write_patient(patient)?;
            }
        }
        Ok(())
    }

    /// Close all writers and return the artifact filenames, relative to
    /// the job directory.
    pub fn finalize(self) -> Result<Vec<String>, OutputError> {
        self.json.finish()?;
        if let Some(csv) = self.csv {
            csv.finish()?;
        }
        Ok(self.files)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
