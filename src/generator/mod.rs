//! Casualty generation engine
//!
//! Two stages run per job:
//!
//! 1. `temporal` — turns the warfare scenario into a time-ordered list of
//!    [`crate::types::CasualtyEvent`] whose patient counts sum to exactly
//!    the requested total.
//! 2. `flow` — advances each casualty through the POI -> Role4 evacuation
//!    chain under triage-dependent timing with KIA/RTD rules.
//!
//! All randomness is seeded per job from `(job seed, patient id)` so runs
//! are reproducible regardless of batching.

pub mod flow;
pub mod temporal;

use crate::evac::ConfigError;
use thiserror::Error;

/// Errors raised while generating a cohort
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("evacuation config error: {0}")]
    Evacuation(#[from] ConfigError),
    #[error("simulator invariant violated: {0}")]
    Invariant(String),
}

/// Derive the per-patient RNG seed from the job seed and patient id.
/// The multiplier spreads consecutive ids across the seed space.
pub fn patient_seed(job_seed: u64, patient_id: u64) -> u64 {
    job_seed ^ patient_id.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}
