//! Shared data structures for the casualty generation pipeline
//!
//! This module defines the core types for the evacuation chain simulation:
//! - Phase 1: CasualtyEvent (temporal generator output)
//! - Phase 2: Patient / PatientBuilder (flow simulator output)
//! - Phase 3: TimelineEvent (per-patient movement timeline)
//! - Phase 4: TreatmentRecord (protocol selection output)
//! - Phase 5: JobRecord (controller state, persisted)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ============================================================================
// Evacuation Chain
// ============================================================================

/// Echelon of medical care, ordered from point of injury rearward
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
pub enum Facility {
    #[default]
    #[serde(rename = "POI")]
    Poi,
    Role1,
    Role2,
    Role3,
    Role4,
}

impl Facility {
    /// All facilities in evacuation order
    pub const ORDER: [Facility; 5] = [
        Facility::Poi,
        Facility::Role1,
        Facility::Role2,
        Facility::Role3,
        Facility::Role4,
    ];

    /// Next facility rearward, `None` at Role4
    pub fn next(&self) -> Option<Facility> {
        match self {
            Facility::Poi => Some(Facility::Role1),
            Facility::Role1 => Some(Facility::Role2),
            Facility::Role2 => Some(Facility::Role3),
            Facility::Role3 => Some(Facility::Role4),
            Facility::Role4 => None,
        }
    }

    /// Short code used in CSV output and logs
    pub fn code(&self) -> &'static str {
        match self {
            Facility::Poi => "POI",
            Facility::Role1 => "Role1",
            Facility::Role2 => "Role2",
            Facility::Role3 => "Role3",
            Facility::Role4 => "Role4",
        }
    }

    /// Parse from config/API strings
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "POI" | "poi" => Some(Facility::Poi),
            "Role1" | "role1" | "R1" => Some(Facility::Role1),
            "Role2" | "role2" | "R2" => Some(Facility::Role2),
            "Role3" | "role3" | "R3" => Some(Facility::Role3),
            "Role4" | "role4" | "R4" => Some(Facility::Role4),
            _ => None,
        }
    }
}

impl std::fmt::Display for Facility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Triage urgency class, T1 most urgent
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
pub enum Triage {
    T1,
    #[default]
    T2,
    T3,
}

impl Triage {
    pub const ALL: [Triage; 3] = [Triage::T1, Triage::T2, Triage::T3];

    pub fn code(&self) -> &'static str {
        match self {
            Triage::T1 => "T1",
            Triage::T2 => "T2",
            Triage::T3 => "T3",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "T1" | "t1" => Some(Triage::T1),
            "T2" | "t2" => Some(Triage::T2),
            "T3" | "t3" => Some(Triage::T3),
            _ => None,
        }
    }
}

impl std::fmt::Display for Triage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ============================================================================
// Injury Classification
// ============================================================================

/// Top-level casualty category, drives diagnosis sampling and triage weights
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
pub enum InjuryType {
    #[default]
    #[serde(rename = "Battle Injury")]
    BattleInjury,
    #[serde(rename = "Non-Battle Injury")]
    NonBattleInjury,
    Disease,
}

impl InjuryType {
    pub const ALL: [InjuryType; 3] = [
        InjuryType::BattleInjury,
        InjuryType::NonBattleInjury,
        InjuryType::Disease,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            InjuryType::BattleInjury => "Battle Injury",
            InjuryType::NonBattleInjury => "Non-Battle Injury",
            InjuryType::Disease => "Disease",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Battle Injury" | "battle_injury" | "BI" => Some(InjuryType::BattleInjury),
            "Non-Battle Injury" | "non_battle_injury" | "NBI" => Some(InjuryType::NonBattleInjury),
            "Disease" | "disease" | "DIS" => Some(InjuryType::Disease),
            _ => None,
        }
    }
}

impl std::fmt::Display for InjuryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Terminal disposition of a patient
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FinalStatus {
    #[serde(rename = "KIA")]
    Kia,
    #[serde(rename = "RTD")]
    Rtd,
    #[serde(rename = "Remains_Role4")]
    RemainsRole4,
}

impl FinalStatus {
    pub fn code(&self) -> &'static str {
        match self {
            FinalStatus::Kia => "KIA",
            FinalStatus::Rtd => "RTD",
            FinalStatus::RemainsRole4 => "Remains_Role4",
        }
    }
}

impl std::fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ============================================================================
// Phase 1: Casualty Events (temporal generator)
// ============================================================================

/// Warfare scenario driving the temporal clustering of casualties
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum WarfareType {
    #[default]
    Conventional,
    Artillery,
    Urban,
    Guerrilla,
    Drone,
}

impl WarfareType {
    pub const ALL: [WarfareType; 5] = [
        WarfareType::Conventional,
        WarfareType::Artillery,
        WarfareType::Urban,
        WarfareType::Guerrilla,
        WarfareType::Drone,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            WarfareType::Conventional => "conventional",
            WarfareType::Artillery => "artillery",
            WarfareType::Urban => "urban",
            WarfareType::Guerrilla => "guerrilla",
            WarfareType::Drone => "drone",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "conventional" => Some(WarfareType::Conventional),
            "artillery" => Some(WarfareType::Artillery),
            "urban" => Some(WarfareType::Urban),
            "guerrilla" => Some(WarfareType::Guerrilla),
            "drone" | "drone_attacks" => Some(WarfareType::Drone),
            _ => None,
        }
    }

    /// Mass-casualty threshold: an event with at least this many patients
    /// is flagged `is_mass_casualty`
    pub fn mass_casualty_threshold(&self) -> u32 {
        match self {
            WarfareType::Artillery => 8,
            WarfareType::Conventional => 10,
            WarfareType::Urban => 12,
            WarfareType::Drone => 6,
            WarfareType::Guerrilla => 15,
        }
    }
}

impl std::fmt::Display for WarfareType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Discrete high-casualty injection placed by the temporal generator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SpecialEventType {
    MassCasualtyIncident,
    Ambush,
    MajorOffensive,
}

impl std::fmt::Display for SpecialEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpecialEventType::MassCasualtyIncident => write!(f, "mass_casualty_incident"),
            SpecialEventType::Ambush => write!(f, "ambush"),
            SpecialEventType::MajorOffensive => write!(f, "major_offensive"),
        }
    }
}

/// A timestamped batch of casualties produced by the temporal generator.
///
/// Event timestamps are monotonic non-decreasing within a scenario and
/// `patient_count` across all events sums to exactly the requested total.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CasualtyEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub patient_count: u32,
    pub warfare_type: WarfareType,
    pub is_mass_casualty: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environmental_factors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_event_type: Option<SpecialEventType>,
}

// ============================================================================
// Phase 2-3: Patient & Movement Timeline
// ============================================================================

/// Timeline event kind. A patient timeline ends with exactly one terminal:
/// `kia`, `rtd`, or an `arrival` at Role4 followed by the Role4 `rtd`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventType {
    Arrival,
    EvacuationStart,
    TransitStart,
    Kia,
    Rtd,
}

/// One entry in a patient's movement timeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineEvent {
    pub event_type: TimelineEventType,
    pub facility: Facility,
    pub timestamp: DateTime<Utc>,
    /// Hours elapsed since the injury timestamp, always >= 0
    pub hours_since_injury: f64,
    pub triage: Triage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evacuation_duration_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transit_duration_hours: Option<f64>,
}

/// A diagnosed condition sampled from the injury catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diagnosis {
    pub code: String,
    pub display: String,
}

/// Treatments selected for one diagnosis at one facility
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreatmentRecord {
    pub diagnosis_code: String,
    pub facility: Facility,
    pub treatments: Vec<String>,
}

/// Immutable patient value, frozen from [`PatientBuilder`] before output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    pub id: u64,
    pub nationality: String,
    pub given_name: String,
    pub family_name: String,
    pub gender: String,
    pub front_id: String,
    pub triage: Triage,
    pub injury_type: InjuryType,
    pub diagnoses: Vec<Diagnosis>,
    pub treatments: Vec<TreatmentRecord>,
    pub injury_timestamp: DateTime<Utc>,
    pub timeline: Vec<TimelineEvent>,
    pub final_status: FinalStatus,
    pub last_facility: Facility,
}

impl Patient {
    /// Hours from injury to the terminal timeline event
    pub fn hours_to_outcome(&self) -> f64 {
        self.timeline
            .last()
            .map(|e| e.hours_since_injury)
            .unwrap_or(0.0)
    }

    /// Distinct facilities with an arrival event, in visit order
    pub fn facilities_visited(&self) -> Vec<Facility> {
        self.timeline
            .iter()
            .filter(|e| e.event_type == TimelineEventType::Arrival)
            .map(|e| e.facility)
            .collect()
    }
}

/// Mutable patient under simulation. The flow simulator appends timeline
/// events and the builder is frozen into a [`Patient`] once terminal.
#[derive(Debug, Clone)]
pub struct PatientBuilder {
    pub id: u64,
    pub nationality: String,
    pub given_name: String,
    pub family_name: String,
    pub gender: String,
    pub front_id: String,
    pub triage: Triage,
    pub injury_type: InjuryType,
    pub diagnoses: Vec<Diagnosis>,
    pub treatments: Vec<TreatmentRecord>,
    pub injury_timestamp: DateTime<Utc>,
    pub timeline: Vec<TimelineEvent>,
}

impl PatientBuilder {
    /// Append a timeline event, computing `hours_since_injury` from the
    /// injury timestamp so the two can never disagree.
    pub fn push_event(
        &mut self,
        event_type: TimelineEventType,
        facility: Facility,
        timestamp: DateTime<Utc>,
        evacuation_duration_hours: Option<f64>,
        transit_duration_hours: Option<f64>,
    ) {
        let hours = (timestamp - self.injury_timestamp).num_milliseconds() as f64 / 3_600_000.0;
        self.timeline.push(TimelineEvent {
            event_type,
            facility,
            timestamp,
            hours_since_injury: hours.max(0.0),
            triage: self.triage,
            evacuation_duration_hours,
            transit_duration_hours,
        });
    }

    /// Freeze into an immutable [`Patient`]
    pub fn freeze(self, final_status: FinalStatus, last_facility: Facility) -> Patient {
        Patient {
            id: self.id,
            nationality: self.nationality,
            given_name: self.given_name,
            family_name: self.family_name,
            gender: self.gender,
            front_id: self.front_id,
            triage: self.triage,
            injury_type: self.injury_type,
            diagnoses: self.diagnoses,
            treatments: self.treatments,
            injury_timestamp: self.injury_timestamp,
            timeline: self.timeline,
            final_status,
            last_facility,
        }
    }
}

// ============================================================================
// Phase 5: Jobs
// ============================================================================

/// Generation priority, drives queue ordering (high drains first)
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    /// Queue rank, lower claims first
    pub fn rank(&self) -> i32 {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "normal" => Some(Priority::Normal),
            "high" => Some(Priority::High),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Job lifecycle status.
///
/// ```text
/// pending ──► running ──► completed
///    │              ├──► failed
///    └──────────────┴──► cancelled
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn code(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// True when no further transitions are allowed
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Legal state-machine transitions. Illegal transitions are ignored
    /// and logged by the repository layer.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Error recorded on a failed job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobFailure {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl JobFailure {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

/// Aggregate statistics persisted when a job completes
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobSummary {
    pub total_patients: u64,
    pub kia: u64,
    pub rtd: u64,
    pub remains_role4: u64,
    pub by_triage: BTreeMap<String, u64>,
    pub by_last_facility: BTreeMap<String, u64>,
    pub mean_hours_to_outcome: f64,
    pub median_hours_to_outcome: f64,
    pub max_hours_to_outcome: f64,
    pub event_count: u64,
    pub mass_casualty_events: u64,
}

/// Persisted job record. The repository row is the single source of truth;
/// output filenames here are authoritative for the download path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    /// Owning API key id (multi-tenant boundary)
    pub tenant: String,
    pub status: JobStatus,
    /// Percent complete, monotone non-decreasing in [0, 100]
    pub progress: u8,
    pub phase_description: String,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Normalized generation config, stored as JSON
    pub config: serde_json::Value,
    pub output_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<JobSummary>,
    /// Cooperative cancellation flag, observed between batches
    pub cancel_requested: bool,
    /// Set by the retention sweeper; metadata survives for audit
    pub deleted: bool,
    /// Output directory left incomplete by a cancellation
    pub partial: bool,
}

impl JobRecord {
    /// Fresh pending record for a submitted request
    pub fn new_pending(tenant: &str, priority: Priority, config: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant: tenant.to_string(),
            status: JobStatus::Pending,
            progress: 0,
            phase_description: "Queued".to_string(),
            priority,
            created_at: now,
            updated_at: now,
            completed_at: None,
            config,
            output_files: Vec::new(),
            error: None,
            summary: None,
            cancel_requested: false,
            deleted: false,
            partial: false,
        }
    }

    /// Job-scoped output directory name, `job_<id>`
    pub fn dir_name(&self) -> String {
        format!("job_{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facility_order_walks_chain_to_role4() {
        let mut f = Facility::Poi;
        let mut visited = vec![f];
        while let Some(next) = f.next() {
            visited.push(next);
            f = next;
        }
        assert_eq!(visited, Facility::ORDER);
        assert_eq!(Facility::Role4.next(), None);
    }

    #[test]
    fn injury_type_serde_uses_display_names() {
        let json = serde_json::to_string(&InjuryType::NonBattleInjury).unwrap();
        assert_eq!(json, "\"Non-Battle Injury\"");
        let back: InjuryType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, InjuryType::NonBattleInjury);
    }

    #[test]
    fn job_status_transitions_follow_state_machine() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Cancelled.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn builder_freeze_preserves_timeline_hours() {
        let injury = Utc::now();
        let mut b = PatientBuilder {
            id: 7,
            nationality: "USA".to_string(),
            given_name: "John".to_string(),
            family_name: "Doe".to_string(),
            gender: "male".to_string(),
            front_id: "north".to_string(),
            triage: Triage::T1,
            injury_type: InjuryType::BattleInjury,
            diagnoses: vec![],
            treatments: vec![],
            injury_timestamp: injury,
            timeline: vec![],
        };
        b.push_event(TimelineEventType::Arrival, Facility::Poi, injury, None, None);
        b.push_event(
            TimelineEventType::Kia,
            Facility::Poi,
            injury + chrono::Duration::hours(2),
            None,
            None,
        );
        let p = b.freeze(FinalStatus::Kia, Facility::Poi);
        assert_eq!(p.timeline.len(), 2);
        assert!((p.timeline[1].hours_since_injury - 2.0).abs() < 1e-9);
        assert!((p.hours_to_outcome() - 2.0).abs() < 1e-9);
        assert_eq!(p.facilities_visited(), vec![Facility::Poi]);
    }

    #[test]
    fn patient_json_round_trip() {
        let injury = Utc::now();
        let patient = Patient {
            id: 1,
            nationality: "GBR".to_string(),
            given_name: "Ada".to_string(),
            family_name: "Hart".to_string(),
            gender: "female".to_string(),
            front_id: "east".to_string(),
            triage: Triage::T2,
            injury_type: InjuryType::Disease,
            diagnoses: vec![Diagnosis {
                code: "D-101".to_string(),
                display: "Acute gastroenteritis".to_string(),
            }],
            treatments: vec![],
            injury_timestamp: injury,
            timeline: vec![TimelineEvent {
                event_type: TimelineEventType::Arrival,
                facility: Facility::Poi,
                timestamp: injury,
                hours_since_injury: 0.0,
                triage: Triage::T2,
                evacuation_duration_hours: None,
                transit_duration_hours: None,
            }],
            final_status: FinalStatus::Rtd,
            last_facility: Facility::Poi,
        };
        let json = serde_json::to_string(&patient).unwrap();
        let back: Patient = serde_json::from_str(&json).unwrap();
        assert_eq!(patient, back);
    }
}
