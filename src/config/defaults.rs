//! System-wide default constants.
//!
//! Centralises magic numbers used across the engine and job controller.
//! Grouped by subsystem for easy discovery.

use crate::types::{Facility, InjuryType, Triage};

// ============================================================================
// Generation limits
// ============================================================================

/// Hard cap on patients per job unless overridden by the server config.
pub const MAX_PATIENTS_DEFAULT: u32 = 100_000;

/// Patients streamed to output writers per batch. Cohorts are never
/// materialized whole; peak memory stays proportional to this.
pub const BATCH_SIZE_DEFAULT: usize = 500;

/// Soft per-job deadline (seconds).
pub const JOB_TIMEOUT_SECS_DEFAULT: u64 = 1_800;

/// Deadline for a single durable-store operation (seconds). Exceeding
/// it surfaces as a storage error on the affected request.
pub const STORE_OP_DEADLINE_SECS: u64 = 30;

/// Job directory retention (days).
pub const JOB_RETENTION_DAYS_DEFAULT: u64 = 7;

// ============================================================================
// Temporal generator
// ============================================================================

/// Sub-hour sampling bin width (minutes).
pub const BIN_MINUTES: i64 = 5;

/// Probability that a POI patient bypasses Role1 straight to Role2.
pub const ROLE1_BYPASS_PROBABILITY: f64 = 0.03;

/// Intensity multipliers shape temporal clustering only; the final patient
/// sum is always forced to the requested total.
pub const INTENSITY_LOW: f64 = 0.7;
pub const INTENSITY_MEDIUM: f64 = 1.0;
pub const INTENSITY_HIGH: f64 = 1.5;
pub const INTENSITY_EXTREME: f64 = 2.2;

// ============================================================================
// Flow simulator rates
// ============================================================================

/// Base probability of KIA during evacuation at a facility, before the
/// triage modifier is applied. Forward facilities are deadlier.
pub fn base_kia_rate(facility: Facility, injury_type: InjuryType) -> f64 {
    let by_facility = match facility {
        Facility::Poi => 0.08,
        Facility::Role1 => 0.04,
        Facility::Role2 => 0.02,
        Facility::Role3 => 0.01,
        Facility::Role4 => 0.005,
    };
    let by_injury = match injury_type {
        InjuryType::BattleInjury => 1.0,
        InjuryType::NonBattleInjury => 0.3,
        InjuryType::Disease => 0.15,
    };
    by_facility * by_injury
}

/// Base probability of RTD during evacuation at a facility, before the
/// triage modifier. Rearward facilities return more patients to duty.
pub fn base_rtd_rate(facility: Facility, injury_type: InjuryType) -> f64 {
    let by_facility = match facility {
        Facility::Poi => 0.05,
        Facility::Role1 => 0.15,
        Facility::Role2 => 0.25,
        Facility::Role3 => 0.30,
        Facility::Role4 => 0.0,
    };
    let by_injury = match injury_type {
        InjuryType::BattleInjury => 0.8,
        InjuryType::NonBattleInjury => 1.2,
        InjuryType::Disease => 1.3,
    };
    by_facility * by_injury
}

/// KIA risk during transit runs at half the evacuation rate.
pub const TRANSIT_KIA_FACTOR: f64 = 0.5;

/// Default triage weights (T1, T2, T3) by injury type, used when the
/// scenario does not override them.
pub fn default_triage_weights(injury_type: InjuryType) -> [(Triage, f64); 3] {
    match injury_type {
        InjuryType::BattleInjury => [(Triage::T1, 0.4), (Triage::T2, 0.4), (Triage::T3, 0.2)],
        InjuryType::NonBattleInjury => [(Triage::T1, 0.2), (Triage::T2, 0.3), (Triage::T3, 0.5)],
        InjuryType::Disease => [(Triage::T1, 0.1), (Triage::T2, 0.3), (Triage::T3, 0.6)],
    }
}

// ============================================================================
// Treatment selection
// ============================================================================

/// Utility weights (appropriateness, time factor, risk).
pub const TREATMENT_WEIGHTS: (f64, f64, f64) = (0.5, 0.3, 0.2);

/// T1 patients weight the time factor harder.
pub const TREATMENT_TIME_WEIGHT_T1: f64 = 0.5;

/// Top-k treatments retained per facility.
pub fn treatment_top_k(facility: Facility) -> usize {
    match facility {
        Facility::Poi => 2,
        Facility::Role1 => 3,
        Facility::Role2 => 5,
        Facility::Role3 => 6,
        Facility::Role4 => 4,
    }
}

// ============================================================================
// Progress reporting
// ============================================================================

/// Progress floor after initialization.
pub const PROGRESS_INIT: u8 = 5;

/// Progress ceiling for patient generation; finalization runs 95..100.
pub const PROGRESS_GENERATION_END: u8 = 95;

/// Update frequency scaled by total count: every patient for tiny jobs,
/// every 50 for large ones.
pub fn progress_stride(total_patients: u32) -> u32 {
    match total_patients {
        0..=10 => 1,
        11..=100 => 5,
        101..=1_000 => 10,
        _ => 50,
    }
}

// ============================================================================
// API keys & rate limiting
// ============================================================================

/// Well-known demo key, auto-provisioned on first use.
pub const DEMO_API_KEY_DEFAULT: &str = "DEMO_MILMED_2025";

/// Demo key limits: patients per request / per day / per minute / per hour.
pub const DEMO_MAX_PATIENTS_PER_REQUEST: u32 = 500;
pub const DEMO_MAX_REQUESTS_PER_DAY: u32 = 100;
pub const DEMO_MAX_REQUESTS_PER_MINUTE: u32 = 10;
pub const DEMO_MAX_REQUESTS_PER_HOUR: u32 = 50;

/// Standard key window defaults.
pub const DEFAULT_MAX_REQUESTS_PER_MINUTE: u32 = 60;
pub const DEFAULT_MAX_REQUESTS_PER_HOUR: u32 = 1_000;

/// Transient storage errors on counter increments retry this many times.
pub const COUNTER_RETRY_ATTEMPTS: u32 = 3;

// ============================================================================
// Archive encryption
// ============================================================================

/// PBKDF2-HMAC-SHA256 iteration count for password-derived archive keys.
pub const KDF_ITERATIONS: u32 = 100_000;

/// Minimum encryption password length accepted by validation.
pub const MIN_ENCRYPTION_PASSWORD_LEN: usize = 8;
