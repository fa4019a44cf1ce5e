//! CASGEN: Casualty Generation Engine
//!
//! Military medical casualty generation and evacuation chain simulation.
//!
//! ## Architecture
//!
//! - **Temporal Generator**: clustered casualty arrivals from warfare patterns
//! - **Flow Simulator**: per-patient POI -> Role4 state machine with KIA/RTD rules
//! - **Treatment Selection**: deterministic protocol table per diagnosis/facility
//! - **Job Controller**: bounded worker pool with progress, cancellation, retention
//! - **API Key Layer**: multi-tenant admission control and rate limiting

pub mod api;
pub mod auth;
pub mod background;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod evac;
pub mod generator;
pub mod jobs;
pub mod medical;
pub mod output;
pub mod types;

// Re-export commonly used types
pub use types::{
    CasualtyEvent, Facility, FinalStatus, InjuryType, JobRecord, JobStatus, JobSummary, Patient,
    PatientBuilder, Priority, TimelineEvent, TimelineEventType, Triage, WarfareType,
};

// Re-export the configuration surface
pub use config::{GenerationRequest, NormalizedConfig, ScenarioConfig, ServiceConfig};

// Re-export engine entry points
pub use generator::flow::FlowSimulator;
pub use generator::temporal::generate_events;

// Re-export reference data
pub use catalog::ReferenceCatalog;
pub use evac::EvacuationTimes;
pub use medical::ProtocolTable;

/// Crate version reported by the health endpoint
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
