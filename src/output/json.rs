//! Streaming `patients.json` writer
//!
//! Emits a JSON array one patient at a time so the full cohort never sits
//! in memory. One patient object per line keeps the file diffable and lets
//! the timeline endpoints scan it without loading everything at once.

use super::OutputError;
use crate::types::Patient;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub struct JsonPatientWriter {
    writer: BufWriter<File>,
    first: bool,
}

impl JsonPatientWriter {
    pub fn create(path: &Path) -> Result<Self, OutputError> {
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(b"[\n")?;
        Ok(Self {
            writer,
            first: true,
        })
    }

    pub fn write_patient(&mut self, patient: &Patient) -> Result<(), OutputError> {
        if !self.first {
            self.writer.write_all(b",\n")?;
        }
        self.first = false;
        serde_json::to_writer(&mut self.writer, patient)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), OutputError> {
        self.writer.write_all(b"\n]\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Read a complete `patients.json` back into memory. Used by the timeline
/// endpoints and tests, not by the generation path.
pub fn read_patients(path: &Path) -> Result<Vec<Patient>, OutputError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Facility, FinalStatus, InjuryType, Triage};
    use chrono::Utc;

    fn patient(id: u64) -> Patient {
        Patient {
            id,
            nationality: "USA".to_string(),
            given_name: "Test".to_string(),
            family_name: "Case".to_string(),
            gender: "male".to_string(),
            front_id: "north".to_string(),
            triage: Triage::T2,
            injury_type: InjuryType::BattleInjury,
            diagnoses: vec![],
            treatments: vec![],
            injury_timestamp: Utc::now(),
            timeline: vec![],
            final_status: FinalStatus::Rtd,
            last_facility: Facility::Role1,
        }
    }

    #[test]
    fn streamed_array_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patients.json");
        let mut writer = JsonPatientWriter::create(&path).unwrap();
        for id in 0..5 {
            writer.write_patient(&patient(id)).unwrap();
        }
        writer.finish().unwrap();

        let back = read_patients(&path).unwrap();
        assert_eq!(back.len(), 5);
        assert_eq!(back[3].id, 3);
    }

    #[test]
    fn empty_cohort_is_a_valid_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patients.json");
        JsonPatientWriter::create(&path).unwrap().finish().unwrap();
        assert!(read_patients(&path).unwrap().is_empty());
    }
}
