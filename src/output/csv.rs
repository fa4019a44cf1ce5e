//! `patients.csv` writer
//!
//! Fixed column order:
//! `id, nationality, triage, injury_type, final_status, last_facility,
//! injury_timestamp, hours_to_outcome, facilities_visited,
//! total_timeline_events`
//!
//! Facilities are semicolon-joined. Timestamps are RFC 3339.

use super::OutputError;
use crate::types::Patient;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub const CSV_HEADER: &str = "id,nationality,triage,injury_type,final_status,last_facility,injury_timestamp,hours_to_outcome,facilities_visited,total_timeline_events";

pub struct CsvPatientWriter {
    writer: BufWriter<File>,
}

impl CsvPatientWriter {
    pub fn create(path: &Path) -> Result<Self, OutputError> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "{}", CSV_HEADER)?;
        Ok(Self { writer })
    }

    pub fn write_patient(&mut self, patient: &Patient) -> Result<(), OutputError> {
        let facilities = patient
            .facilities_visited()
            .iter()
            .map(|f| f.code())
            .collect::<Vec<_>>()
            .join(";");
        writeln!(
            self.writer,
            "{},{},{},{},{},{},{},{:.3},{},{}",
            patient.id,
            patient.nationality,
            patient.triage,
            patient.injury_type,
            patient.final_status,
            patient.last_facility,
            patient.injury_timestamp.to_rfc3339(),
            patient.hours_to_outcome(),
            facilities,
            patient.timeline.len(),
        )?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}
