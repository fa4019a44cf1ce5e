//! Request validation and normalization.
//!
//! `validate` turns a raw [`GenerationRequest`] into a [`NormalizedConfig`]
//! the engine trusts, or a list of issues. All rules are checked in one
//! pass so the caller sees every problem at once rather than the first.

use super::defaults;
use super::request::{
    EnvironmentalConditions, FrontConfig, GenerationRequest, Intensity, OutputFormat,
    ScenarioConfig, SpecialEventConfig, Tempo,
};
use crate::evac::EvacuationTimes;
use crate::types::{InjuryType, Priority, WarfareType};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tolerance on the injury-mix probability sum before normalization.
const MIX_TOLERANCE: f64 = 1e-6;

/// A single validation failure, keyed by the offending field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validated, normalized generation configuration. This is what the worker
/// persists on the job record and what the engine consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedConfig {
    pub total_patients: u32,
    pub days_of_fighting: u32,
    pub base_date: NaiveDate,
    /// Normalized to sum exactly 1.0
    pub injury_mix: BTreeMap<InjuryType, f64>,
    /// Sorted by front id; at least one positive weight
    pub fronts: Vec<FrontConfig>,
    /// Active warfare scenarios; empty means uniform sustained fallback
    pub scenarios: Vec<WarfareType>,
    pub intensity: Intensity,
    pub tempo: Tempo,
    pub environment: EnvironmentalConditions,
    pub special_events: Vec<SpecialEventConfig>,
    pub evacuation: EvacuationTimes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub output_formats: Vec<OutputFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_password: Option<String>,
    pub priority: Priority,
}

/// Validate a generation request against server limits.
///
/// `resolved` carries the stored configuration when the request referenced
/// one by id; the caller performs that lookup so this layer stays pure.
pub fn validate(
    request: &GenerationRequest,
    resolved: Option<ScenarioConfig>,
    default_evacuation: &EvacuationTimes,
    max_patients: u32,
) -> Result<NormalizedConfig, Vec<ValidationIssue>> {
    let mut issues = Vec::new();

    // Exactly one of inline config or config id
    let config = match (&request.configuration, &request.configuration_id, resolved) {
        (Some(inline), None, _) => Some(inline.clone()),
        (None, Some(_), Some(stored)) => Some(stored),
        (None, Some(id), None) => {
            issues.push(ValidationIssue::new(
                "configuration_id",
                format!("unknown configuration id '{id}'"),
            ));
            None
        }
        (Some(_), Some(_), _) => {
            issues.push(ValidationIssue::new(
                "configuration",
                "provide either configuration or configuration_id, not both",
            ));
            None
        }
        (None, None, _) => {
            issues.push(ValidationIssue::new(
                "configuration",
                "one of configuration or configuration_id is required",
            ));
            None
        }
    };

    // Output format set
    let mut formats: Vec<OutputFormat> = Vec::new();
    for format in &request.output_formats {
        if !formats.contains(format) {
            formats.push(*format);
        }
    }
    if formats.is_empty() {
        issues.push(ValidationIssue::new(
            "output_formats",
            "at least one output format is required",
        ));
    }

    // Encryption password
    let encryption_password = if request.use_encryption {
        match &request.encryption_password {
            Some(p) if p.len() >= defaults::MIN_ENCRYPTION_PASSWORD_LEN => Some(p.clone()),
            Some(_) => {
                issues.push(ValidationIssue::new(
                    "encryption_password",
                    format!(
                        "encryption password must be at least {} characters",
                        defaults::MIN_ENCRYPTION_PASSWORD_LEN
                    ),
                ));
                None
            }
            None => {
                issues.push(ValidationIssue::new(
                    "encryption_password",
                    "use_encryption requires an encryption_password",
                ));
                None
            }
        }
    } else {
        None
    };

    let Some(config) = config else {
        return Err(issues);
    };

    // Patient and horizon bounds
    if config.total_patients < 1 || config.total_patients > max_patients {
        issues.push(ValidationIssue::new(
            "configuration.total_patients",
            format!("must be between 1 and {max_patients}"),
        ));
    }
    if config.days_of_fighting < 1 {
        issues.push(ValidationIssue::new(
            "configuration.days_of_fighting",
            "must be at least 1",
        ));
    }

    let injury_mix = validate_injury_mix(&config.injury_mix, &mut issues);
    let fronts = validate_fronts(&config.fronts, &mut issues);
    let scenarios = validate_warfare(&config.warfare, &mut issues);
    let special_events =
        validate_special_events(config.special_events.as_deref().unwrap_or(&[]), &config, &mut issues);

    // Evacuation table: inline override or server default, revalidated
    let evacuation = match &config.evacuation {
        Some(inline) => match inline.validate() {
            Ok(()) => inline.clone(),
            Err(e) => {
                issues.push(ValidationIssue::new(
                    "configuration.evacuation",
                    e.to_string(),
                ));
                default_evacuation.clone()
            }
        },
        None => default_evacuation.clone(),
    };

    if !issues.is_empty() {
        return Err(issues);
    }

    Ok(NormalizedConfig {
        total_patients: config.total_patients,
        days_of_fighting: config.days_of_fighting,
        base_date: config.base_date,
        injury_mix,
        fronts,
        scenarios,
        intensity: config.intensity,
        tempo: config.tempo,
        environment: config.environment.unwrap_or_default(),
        special_events,
        evacuation,
        seed: config.seed,
        output_formats: formats,
        encryption_password,
        priority: request.priority,
    })
}

/// Keys must belong to the known injury categories, values must be
/// non-negative, and the sum must be 1.0 within tolerance. The returned
/// map is renormalized to sum exactly 1.
fn validate_injury_mix(
    mix: &BTreeMap<String, f64>,
    issues: &mut Vec<ValidationIssue>,
) -> BTreeMap<InjuryType, f64> {
    let mut typed = BTreeMap::new();
    for (key, value) in mix {
        match InjuryType::parse(key) {
            Some(injury_type) => {
                if *value < 0.0 {
                    issues.push(ValidationIssue::new(
                        "configuration.injury_mix",
                        format!("probability for '{key}' must be non-negative"),
                    ));
                } else {
                    typed.insert(injury_type, *value);
                }
            }
            None => issues.push(ValidationIssue::new(
                "configuration.injury_mix",
                format!("unknown injury category '{key}'"),
            )),
        }
    }

    let sum: f64 = typed.values().sum();
    if typed.is_empty() {
        issues.push(ValidationIssue::new(
            "configuration.injury_mix",
            "at least one injury category is required",
        ));
    } else if (sum - 1.0).abs() > MIX_TOLERANCE {
        issues.push(ValidationIssue::new(
            "configuration.injury_mix",
            format!("probabilities must sum to 1.0 (got {sum})"),
        ));
    } else if sum > 0.0 {
        // Normalize to exact 1.0
        for value in typed.values_mut() {
            *value /= sum;
        }
    }
    typed
}

fn validate_fronts(
    fronts: &[FrontConfig],
    issues: &mut Vec<ValidationIssue>,
) -> Vec<FrontConfig> {
    if fronts.is_empty() {
        issues.push(ValidationIssue::new(
            "configuration.fronts",
            "at least one front is required",
        ));
        return Vec::new();
    }

    let mut any_positive = false;
    for front in fronts {
        let field = format!("configuration.fronts[{}]", front.id);
        if front.casualty_rate < 0.0 {
            issues.push(ValidationIssue::new(
                &field,
                "casualty_rate must be non-negative",
            ));
        }
        if front.casualty_rate > 0.0 {
            any_positive = true;
        }
        if front.nationality_distribution.is_empty() {
            issues.push(ValidationIssue::new(
                &field,
                "nationality_distribution must be non-empty",
            ));
        }
        for (nation, weight) in &front.nationality_distribution {
            if *weight <= 0.0 {
                issues.push(ValidationIssue::new(
                    &field,
                    format!("nationality weight for '{nation}' must be positive"),
                ));
            }
        }
    }
    if !any_positive {
        issues.push(ValidationIssue::new(
            "configuration.fronts",
            "at least one front must have a positive casualty_rate",
        ));
    }

    // Canonical order: sorted by front id
    let mut sorted = fronts.to_vec();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));
    sorted
}

fn validate_warfare(
    warfare: &BTreeMap<String, bool>,
    issues: &mut Vec<ValidationIssue>,
) -> Vec<WarfareType> {
    let mut active = Vec::new();
    for (id, enabled) in warfare {
        match WarfareType::parse(id) {
            Some(warfare_type) => {
                if *enabled && !active.contains(&warfare_type) {
                    active.push(warfare_type);
                }
            }
            None => issues.push(ValidationIssue::new(
                "configuration.warfare",
                format!("unknown warfare scenario id '{id}'"),
            )),
        }
    }
    active.sort();
    active
}

fn validate_special_events(
    events: &[SpecialEventConfig],
    config: &ScenarioConfig,
    issues: &mut Vec<ValidationIssue>,
) -> Vec<SpecialEventConfig> {
    for (i, event) in events.iter().enumerate() {
        let field = format!("configuration.special_events[{i}]");
        if event.min_patients < 1 {
            issues.push(ValidationIssue::new(&field, "min_patients must be at least 1"));
        }
        if event.min_patients > event.max_patients {
            issues.push(ValidationIssue::new(
                &field,
                "min_patients must not exceed max_patients",
            ));
        }
        if let Some(day) = event.day {
            if day >= config.days_of_fighting {
                issues.push(ValidationIssue::new(
                    &field,
                    format!(
                        "day {day} is outside the {}-day horizon",
                        config.days_of_fighting
                    ),
                ));
            }
        }
    }
    events.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SpecialEventType;

    fn minimal_config() -> ScenarioConfig {
        let mut injury_mix = BTreeMap::new();
        injury_mix.insert("Battle Injury".to_string(), 0.6);
        injury_mix.insert("Non-Battle Injury".to_string(), 0.25);
        injury_mix.insert("Disease".to_string(), 0.15);
        let mut nationality = BTreeMap::new();
        nationality.insert("USA".to_string(), 1.0);
        ScenarioConfig {
            total_patients: 100,
            days_of_fighting: 3,
            base_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            injury_mix,
            fronts: vec![FrontConfig {
                id: "north".to_string(),
                name: None,
                casualty_rate: 1.0,
                nationality_distribution: nationality,
            }],
            warfare: BTreeMap::from([("conventional".to_string(), true)]),
            intensity: Intensity::Medium,
            tempo: Tempo::Sustained,
            environment: None,
            special_events: None,
            evacuation: None,
            seed: Some(42),
        }
    }

    fn minimal_request() -> GenerationRequest {
        GenerationRequest {
            configuration_id: None,
            configuration: Some(minimal_config()),
            output_formats: vec![OutputFormat::Json],
            use_encryption: false,
            encryption_password: None,
            priority: Priority::Normal,
        }
    }

    fn default_evac() -> EvacuationTimes {
        EvacuationTimes::embedded().unwrap()
    }

    #[test]
    fn minimal_request_validates() {
        let normalized = validate(&minimal_request(), None, &default_evac(), 100_000).unwrap();
        assert_eq!(normalized.total_patients, 100);
        assert_eq!(normalized.scenarios, vec![WarfareType::Conventional]);
        let sum: f64 = normalized.injury_mix.values().sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn both_config_and_id_is_rejected() {
        let mut request = minimal_request();
        request.configuration_id = Some("cfg-1".to_string());
        let issues = validate(&request, None, &default_evac(), 100_000).unwrap_err();
        assert!(issues.iter().any(|i| i.field == "configuration"));
    }

    #[test]
    fn neither_config_nor_id_is_rejected() {
        let mut request = minimal_request();
        request.configuration = None;
        let issues = validate(&request, None, &default_evac(), 100_000).unwrap_err();
        assert!(issues.iter().any(|i| i.field == "configuration"));
    }

    #[test]
    fn unknown_configuration_id_is_rejected() {
        let mut request = minimal_request();
        request.configuration = None;
        request.configuration_id = Some("missing".to_string());
        let issues = validate(&request, None, &default_evac(), 100_000).unwrap_err();
        assert!(issues[0].message.contains("unknown configuration id"));
    }

    #[test]
    fn resolved_configuration_id_is_accepted() {
        let mut request = minimal_request();
        request.configuration = None;
        request.configuration_id = Some("cfg-1".to_string());
        let normalized =
            validate(&request, Some(minimal_config()), &default_evac(), 100_000).unwrap();
        assert_eq!(normalized.total_patients, 100);
    }

    #[test]
    fn empty_output_formats_rejected() {
        let mut request = minimal_request();
        request.output_formats.clear();
        let issues = validate(&request, None, &default_evac(), 100_000).unwrap_err();
        assert!(issues.iter().any(|i| i.field == "output_formats"));
    }

    #[test]
    fn short_encryption_password_rejected() {
        let mut request = minimal_request();
        request.use_encryption = true;
        request.encryption_password = Some("short".to_string());
        let issues = validate(&request, None, &default_evac(), 100_000).unwrap_err();
        assert!(issues.iter().any(|i| i.field == "encryption_password"));
    }

    #[test]
    fn patient_count_over_server_limit_rejected() {
        let mut request = minimal_request();
        request.configuration.as_mut().unwrap().total_patients = 200_000;
        let issues = validate(&request, None, &default_evac(), 100_000).unwrap_err();
        assert!(issues
            .iter()
            .any(|i| i.field == "configuration.total_patients"));
    }

    #[test]
    fn injury_mix_off_by_more_than_tolerance_rejected() {
        let mut request = minimal_request();
        request
            .configuration
            .as_mut()
            .unwrap()
            .injury_mix
            .insert("Disease".to_string(), 0.25);
        let issues = validate(&request, None, &default_evac(), 100_000).unwrap_err();
        assert!(issues.iter().any(|i| i.message.contains("sum to 1.0")));
    }

    #[test]
    fn injury_mix_within_tolerance_is_renormalized() {
        let mut request = minimal_request();
        request
            .configuration
            .as_mut()
            .unwrap()
            .injury_mix
            .insert("Disease".to_string(), 0.15 + 5e-7);
        let normalized = validate(&request, None, &default_evac(), 100_000).unwrap();
        let sum: f64 = normalized.injury_mix.values().sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn unknown_injury_category_rejected() {
        let mut request = minimal_request();
        request
            .configuration
            .as_mut()
            .unwrap()
            .injury_mix
            .insert("Space Injury".to_string(), 0.0);
        let issues = validate(&request, None, &default_evac(), 100_000).unwrap_err();
        assert!(issues
            .iter()
            .any(|i| i.message.contains("unknown injury category")));
    }

    #[test]
    fn all_zero_front_weights_rejected() {
        let mut request = minimal_request();
        request.configuration.as_mut().unwrap().fronts[0].casualty_rate = 0.0;
        let issues = validate(&request, None, &default_evac(), 100_000).unwrap_err();
        assert!(issues
            .iter()
            .any(|i| i.message.contains("positive casualty_rate")));
    }

    #[test]
    fn unknown_warfare_id_rejected() {
        let mut request = minimal_request();
        request
            .configuration
            .as_mut()
            .unwrap()
            .warfare
            .insert("orbital".to_string(), true);
        let issues = validate(&request, None, &default_evac(), 100_000).unwrap_err();
        assert!(issues
            .iter()
            .any(|i| i.message.contains("unknown warfare scenario")));
    }

    #[test]
    fn zero_active_scenarios_is_not_an_error() {
        let mut request = minimal_request();
        request.configuration.as_mut().unwrap().warfare.clear();
        let normalized = validate(&request, None, &default_evac(), 100_000).unwrap();
        assert!(normalized.scenarios.is_empty());
    }

    #[test]
    fn fronts_are_sorted_by_id() {
        let mut request = minimal_request();
        let config = request.configuration.as_mut().unwrap();
        let mut second = config.fronts[0].clone();
        second.id = "east".to_string();
        config.fronts.push(second);
        let normalized = validate(&request, None, &default_evac(), 100_000).unwrap();
        assert_eq!(normalized.fronts[0].id, "east");
        assert_eq!(normalized.fronts[1].id, "north");
    }

    #[test]
    fn special_event_day_outside_horizon_rejected() {
        let mut request = minimal_request();
        request.configuration.as_mut().unwrap().special_events = Some(vec![SpecialEventConfig {
            event_type: SpecialEventType::Ambush,
            min_patients: 5,
            max_patients: 10,
            day: Some(10),
        }]);
        let issues = validate(&request, None, &default_evac(), 100_000).unwrap_err();
        assert!(issues.iter().any(|i| i.message.contains("outside")));
    }
}
