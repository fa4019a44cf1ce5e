//! Treatment protocol selection
//!
//! Binds diagnoses to facility-appropriate interventions. The protocol
//! table is deterministic: candidates are filtered on facility and
//! contraindications, ranked by a utility score that decays past the
//! golden hour, and the per-facility top-k survive.
//!
//! Diagnoses without a protocol entry fall back to keyword matching on
//! the display string; the caller logs that once per diagnosis per job.

use crate::config::defaults;
use crate::types::{Diagnosis, Facility, Triage};
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

const PROTOCOLS: &str = include_str!("../../data/protocols.json");

/// Name of the generic entry used when no candidate passes the filters
const SUPPORTIVE_CARE: &str = "Supportive care";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to parse protocol table: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One candidate intervention for a diagnosis
#[derive(Debug, Clone, Deserialize)]
pub struct TreatmentCandidate {
    pub name: String,
    pub facilities: Vec<Facility>,
    /// Clinical fit in [0, 1]
    pub appropriateness: f64,
    #[serde(default)]
    pub contraindications: Vec<String>,
    pub effectiveness_base: f64,
    pub golden_hour_threshold_h: f64,
    pub decay_rate_per_h: f64,
    #[serde(default)]
    pub risk: f64,
}

#[derive(Debug, Deserialize)]
struct ProtocolFile {
    protocols: BTreeMap<String, Vec<TreatmentCandidate>>,
    keywords: BTreeMap<String, String>,
}

/// Result of a protocol lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub treatments: Vec<String>,
    /// The diagnosis had no direct protocol entry and keyword matching
    /// was used; the caller logs this once per diagnosis per job
    pub via_keyword: bool,
}

/// Deterministic protocol table, loaded once and shared read-only
#[derive(Debug)]
pub struct ProtocolTable {
    protocols: BTreeMap<String, Vec<TreatmentCandidate>>,
    keywords: BTreeMap<String, String>,
}

impl ProtocolTable {
    pub fn embedded() -> Result<Self, ProtocolError> {
        Self::from_json(PROTOCOLS)
    }

    pub fn from_json(raw: &str) -> Result<Self, ProtocolError> {
        let file: ProtocolFile = serde_json::from_str(raw)?;
        Ok(Self {
            protocols: file.protocols,
            keywords: file.keywords,
        })
    }

    /// Select treatments for a diagnosis at a facility.
    ///
    /// `hours_since_injury` drives the time factor; `patient_tags` carries
    /// the patient state the contraindication filter matches against.
    pub fn select_treatments(
        &self,
        diagnosis: &Diagnosis,
        facility: Facility,
        triage: Triage,
        hours_since_injury: f64,
        patient_tags: &[String],
    ) -> Selection {
        let (candidates, via_keyword) = match self.protocols.get(&diagnosis.code) {
            Some(list) => (Some(list), false),
            None => (self.keyword_lookup(&diagnosis.display), true),
        };

        let Some(candidates) = candidates else {
            return Selection {
                treatments: vec![SUPPORTIVE_CARE.to_string()],
                via_keyword,
            };
        };

        let mut scored: Vec<(f64, &str)> = candidates
            .iter()
            .filter(|c| c.facilities.contains(&facility))
            .filter(|c| !c.contraindications.iter().any(|tag| patient_tags.contains(tag)))
            .map(|c| (utility(c, triage, hours_since_injury), c.name.as_str()))
            .collect();

        if scored.is_empty() {
            return Selection {
                treatments: vec![SUPPORTIVE_CARE.to_string()],
                via_keyword,
            };
        }

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(defaults::treatment_top_k(facility));

        Selection {
            treatments: scored.into_iter().map(|(_, name)| name.to_string()).collect(),
            via_keyword,
        }
    }

    fn keyword_lookup(&self, display: &str) -> Option<&Vec<TreatmentCandidate>> {
        let lowered = display.to_lowercase();
        self.keywords
            .iter()
            .find(|(keyword, _)| lowered.contains(keyword.as_str()))
            .and_then(|(_, code)| self.protocols.get(code))
    }

    /// Contraindication tags implied by a patient's diagnoses
    pub fn patient_tags(diagnoses: &[Diagnosis]) -> Vec<String> {
        let mut tags = Vec::new();
        for diagnosis in diagnoses {
            let lowered = diagnosis.display.to_lowercase();
            if lowered.contains("burn") {
                tags.push("thermal_burn".to_string());
            }
            if lowered.contains("head") || lowered.contains("concussion") {
                tags.push("head_injury".to_string());
            }
        }
        tags.sort();
        tags.dedup();
        tags
    }
}

/// Utility ranking: `U = w_app * appropriateness + w_time * time_factor
/// - w_risk * risk`, where the time factor decays exponentially past the
/// golden hour. T1 patients weight time harder.
fn utility(candidate: &TreatmentCandidate, triage: Triage, hours_since_injury: f64) -> f64 {
    let (w_app, mut w_time, w_risk) = defaults::TREATMENT_WEIGHTS;
    if triage == Triage::T1 {
        w_time = defaults::TREATMENT_TIME_WEIGHT_T1;
    }
    let overdue = (hours_since_injury - candidate.golden_hour_threshold_h).max(0.0);
    let time_factor = (-candidate.decay_rate_per_h * overdue).exp();
    w_app * candidate.appropriateness + w_time * time_factor - w_risk * candidate.risk
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ProtocolTable {
        ProtocolTable::embedded().unwrap()
    }

    fn diagnosis(code: &str, display: &str) -> Diagnosis {
        Diagnosis {
            code: code.to_string(),
            display: display.to_string(),
        }
    }

    #[test]
    fn direct_protocol_lookup_selects_facility_candidates() {
        let selection = table().select_treatments(
            &diagnosis("BI-1001", "Gunshot wound, extremity"),
            Facility::Poi,
            Triage::T1,
            0.2,
            &[],
        );
        assert!(!selection.via_keyword);
        assert!(selection.treatments.contains(&"Tourniquet application".to_string()));
        assert!(selection.treatments.len() <= defaults::treatment_top_k(Facility::Poi));
    }

    #[test]
    fn contraindicated_candidates_are_filtered() {
        let tags = vec!["thermal_burn".to_string()];
        let selection = table().select_treatments(
            &diagnosis("BI-1001", "Gunshot wound, extremity"),
            Facility::Poi,
            Triage::T1,
            0.2,
            &tags,
        );
        assert!(!selection.treatments.contains(&"Tourniquet application".to_string()));
    }

    #[test]
    fn unknown_code_uses_keyword_matching() {
        let selection = table().select_treatments(
            &diagnosis("BI-9999", "Penetrating gunshot injury"),
            Facility::Role2,
            Triage::T2,
            3.0,
            &[],
        );
        assert!(selection.via_keyword);
        assert_ne!(selection.treatments, vec![SUPPORTIVE_CARE.to_string()]);
    }

    #[test]
    fn no_match_falls_back_to_supportive_care() {
        let selection = table().select_treatments(
            &diagnosis("ZZ-0000", "Completely unrecognized condition"),
            Facility::Role1,
            Triage::T3,
            1.0,
            &[],
        );
        assert!(selection.via_keyword);
        assert_eq!(selection.treatments, vec![SUPPORTIVE_CARE.to_string()]);
    }

    #[test]
    fn late_presentation_prefers_low_decay_candidates() {
        let table = table();
        let early = table.select_treatments(
            &diagnosis("BI-1007", "Thermal burn, second degree"),
            Facility::Role3,
            Triage::T2,
            0.5,
            &[],
        );
        let late = table.select_treatments(
            &diagnosis("BI-1007", "Thermal burn, second degree"),
            Facility::Role3,
            Triage::T2,
            100.0,
            &[],
        );
        assert_eq!(early.treatments[0], "Fluid resuscitation");
        assert_eq!(late.treatments[0], "Skin graft surgery");
    }

    #[test]
    fn derived_patient_tags_cover_burns() {
        let tags = ProtocolTable::patient_tags(&[diagnosis("BI-1007", "Thermal burn, second degree")]);
        assert_eq!(tags, vec!["thermal_burn".to_string()]);
    }

    #[test]
    fn top_k_respects_facility_budget() {
        let selection = table().select_treatments(
            &diagnosis("DIS-3005", "Acute appendicitis"),
            Facility::Role3,
            Triage::T2,
            4.0,
            &[],
        );
        assert!(selection.treatments.len() <= defaults::treatment_top_k(Facility::Role3));
    }
}
