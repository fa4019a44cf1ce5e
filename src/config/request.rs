//! Wire shapes for generation requests.
//!
//! These types mirror the HTTP request body. They stay loose at the
//! boundary (string-keyed maps, optional sections) and are turned into a
//! trusted [`super::NormalizedConfig`] by the validation layer.

use crate::evac::EvacuationTimes;
use crate::types::{Priority, SpecialEventType};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Requested artifact formats. Validation accepts the full contract set;
/// the writers currently produce `json` and `csv` and log skipped formats.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Csv,
    Xlsx,
    Xml,
    Fhir,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
            OutputFormat::Xlsx => "xlsx",
            OutputFormat::Xml => "xml",
            OutputFormat::Fhir => "fhir.json",
        }
    }

    /// Formats the output writers implement
    pub fn is_supported(&self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::Csv)
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Csv => write!(f, "csv"),
            OutputFormat::Xlsx => write!(f, "xlsx"),
            OutputFormat::Xml => write!(f, "xml"),
            OutputFormat::Fhir => write!(f, "fhir"),
        }
    }
}

/// Overall conflict intensity, scales the base hourly casualty rate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Intensity {
    Low,
    #[default]
    Medium,
    High,
    Extreme,
}

impl Intensity {
    pub fn multiplier(&self) -> f64 {
        match self {
            Intensity::Low => super::defaults::INTENSITY_LOW,
            Intensity::Medium => super::defaults::INTENSITY_MEDIUM,
            Intensity::High => super::defaults::INTENSITY_HIGH,
            Intensity::Extreme => super::defaults::INTENSITY_EXTREME,
        }
    }
}

/// Temporal shape of the campaign across the fighting horizon
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tempo {
    #[default]
    Sustained,
    Escalating,
    Surge,
    Declining,
    Intermittent,
}

/// One front line with its relative casualty weight and the nationality
/// mix of forces engaged there
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrontConfig {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Non-negative relative weight across fronts
    pub casualty_rate: f64,
    /// Country code -> positive weight; need not sum to 1
    pub nationality_distribution: BTreeMap<String, f64>,
}

/// Environmental modifiers applied to selected hour bands
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EnvironmentalConditions {
    #[serde(default)]
    pub night_operations: bool,
    #[serde(default)]
    pub adverse_weather: bool,
}

/// A discrete high-casualty injection requested by the scenario
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpecialEventConfig {
    pub event_type: SpecialEventType,
    pub min_patients: u32,
    pub max_patients: u32,
    /// Zero-based day of the horizon; sampled uniformly when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<u32>,
}

/// Scenario configuration as submitted inline in a request body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioConfig {
    pub total_patients: u32,
    pub days_of_fighting: u32,
    pub base_date: NaiveDate,
    /// Injury-category display name -> probability, sums to 1.0
    pub injury_mix: BTreeMap<String, f64>,
    pub fronts: Vec<FrontConfig>,
    /// Warfare scenario id -> active toggle
    #[serde(default)]
    pub warfare: BTreeMap<String, bool>,
    #[serde(default)]
    pub intensity: Intensity,
    #[serde(default)]
    pub tempo: Tempo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentalConditions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_events: Option<Vec<SpecialEventConfig>>,
    /// Inline evacuation table override; the bundled default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evacuation: Option<EvacuationTimes>,
    /// Seed for reproducible runs; derived from the job id when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// A generation request: configuration inline or by reference id, plus
/// output and priority options. Exactly one of `configuration_id` and
/// `configuration` must be present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<ScenarioConfig>,
    pub output_formats: Vec<OutputFormat>,
    #[serde(default)]
    pub use_encryption: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_password: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}
