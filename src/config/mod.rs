//! Configuration module
//!
//! Three layers:
//!
//! 1. `service` — process-level settings from environment variables
//!    (database, output root, worker pool, timeouts).
//! 2. `request` — the wire shape of a generation request and its scenario
//!    configuration as submitted over HTTP.
//! 3. `validation` — turns a raw request into a [`NormalizedConfig`] the
//!    engine trusts, or a list of validation issues.
//!
//! The engine never reads globals; a validated config value is passed into
//! constructors explicitly.

pub mod defaults;
pub mod request;
pub mod service;
pub mod validation;

pub use request::{
    EnvironmentalConditions, FrontConfig, GenerationRequest, Intensity, OutputFormat,
    ScenarioConfig, SpecialEventConfig, Tempo,
};
pub use service::ServiceConfig;
pub use validation::{validate, NormalizedConfig, ValidationIssue};
