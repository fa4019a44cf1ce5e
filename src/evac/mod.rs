//! Evacuation time manager
//!
//! Loads the evacuation/transit table once, validates structure, and hands
//! out uniform draws for facility evacuation and inter-facility transit
//! durations plus the triage KIA/RTD rate modifiers.
//!
//! The table must cover every facility x triage cell and every transit
//! route between adjacent facilities; loading fails fast otherwise.

use crate::types::{Facility, Triage};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Bundled default table, loaded when no override file is configured
const DEFAULT_TABLE: &str = include_str!("../../data/evacuation_times.json");

/// Structural errors raised while loading the evacuation table
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing evacuation cell for {facility}/{triage}")]
    MissingEvacuationCell { facility: Facility, triage: Triage },
    #[error("missing transit route {from} -> {to}")]
    MissingTransitRoute { from: Facility, to: Facility },
    #[error("invalid range for {context}: min {min} > max {max}")]
    InvalidRange {
        context: String,
        min: f64,
        max: f64,
    },
    #[error("negative bound for {context}: {value}")]
    NegativeBound { context: String, value: f64 },
    #[error("{kind} modifier for {triage} must be a positive real, got {value}")]
    NonPositiveModifier {
        kind: &'static str,
        triage: Triage,
        value: f64,
    },
    #[error("failed to parse evacuation table: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Closed hour interval for a uniform duration draw
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HoursRange {
    pub min_hours: f64,
    pub max_hours: f64,
}

impl HoursRange {
    fn validate(&self, context: &str) -> Result<(), ConfigError> {
        if self.min_hours < 0.0 {
            return Err(ConfigError::NegativeBound {
                context: context.to_string(),
                value: self.min_hours,
            });
        }
        if self.max_hours < 0.0 {
            return Err(ConfigError::NegativeBound {
                context: context.to_string(),
                value: self.max_hours,
            });
        }
        if self.min_hours > self.max_hours {
            return Err(ConfigError::InvalidRange {
                context: context.to_string(),
                min: self.min_hours,
                max: self.max_hours,
            });
        }
        Ok(())
    }
}

/// Validated evacuation/transit duration table with triage rate modifiers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvacuationTimes {
    /// Time under care at each facility, by triage
    pub facilities: BTreeMap<Facility, BTreeMap<Triage, HoursRange>>,
    /// Travel time to the next facility rearward, keyed by origin
    pub transit: BTreeMap<Facility, BTreeMap<Triage, HoursRange>>,
    /// Multiplier on the base KIA probability per triage
    pub kia_modifiers: BTreeMap<Triage, f64>,
    /// Multiplier on the base RTD probability per triage
    pub rtd_modifiers: BTreeMap<Triage, f64>,
}

impl EvacuationTimes {
    /// Parse and validate a JSON table
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let table: EvacuationTimes = serde_json::from_str(raw)?;
        table.validate()?;
        Ok(table)
    }

    /// The bundled default table
    pub fn embedded() -> Result<Self, ConfigError> {
        Self::from_json(DEFAULT_TABLE)
    }

    /// Structural validation: full facility x triage coverage, all adjacent
    /// transit routes present, ranges ordered, modifiers positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for facility in Facility::ORDER {
            let cells =
                self.facilities
                    .get(&facility)
                    .ok_or(ConfigError::MissingEvacuationCell {
                        facility,
                        triage: Triage::T1,
                    })?;
            for triage in Triage::ALL {
                let range = cells
                    .get(&triage)
                    .ok_or(ConfigError::MissingEvacuationCell { facility, triage })?;
                range.validate(&format!("evacuation {facility}/{triage}"))?;
            }
        }
        for from in Facility::ORDER {
            let Some(to) = from.next() else { continue };
            let cells = self
                .transit
                .get(&from)
                .ok_or(ConfigError::MissingTransitRoute { from, to })?;
            for triage in Triage::ALL {
                let range = cells
                    .get(&triage)
                    .ok_or(ConfigError::MissingTransitRoute { from, to })?;
                range.validate(&format!("transit {from}->{to}/{triage}"))?;
            }
        }
        for triage in Triage::ALL {
            for (kind, map) in [("KIA", &self.kia_modifiers), ("RTD", &self.rtd_modifiers)] {
                let value = *map.get(&triage).unwrap_or(&0.0);
                if !(value > 0.0) || !value.is_finite() {
                    return Err(ConfigError::NonPositiveModifier { kind, triage, value });
                }
            }
        }
        Ok(())
    }

    /// Configured evacuation range for a facility/triage cell.
    /// Validation guarantees presence, so absence is treated as a bug.
    pub fn evacuation_range(&self, facility: Facility, triage: Triage) -> HoursRange {
        self.facilities
            .get(&facility)
            .and_then(|m| m.get(&triage))
            .copied()
            .unwrap_or(HoursRange {
                min_hours: 0.0,
                max_hours: 0.0,
            })
    }

    /// Uniform draw of hours under care at `facility` for `triage`
    pub fn draw_evacuation<R: Rng + ?Sized>(
        &self,
        facility: Facility,
        triage: Triage,
        rng: &mut R,
    ) -> f64 {
        let range = self.evacuation_range(facility, triage);
        draw_uniform(range, rng)
    }

    /// Uniform draw of travel hours on the route `from -> from.next()`
    pub fn draw_transit<R: Rng + ?Sized>(
        &self,
        from: Facility,
        triage: Triage,
        rng: &mut R,
    ) -> Result<f64, ConfigError> {
        let to = from.next().ok_or(ConfigError::MissingTransitRoute {
            from,
            to: Facility::Role4,
        })?;
        let range = self
            .transit
            .get(&from)
            .and_then(|m| m.get(&triage))
            .copied()
            .ok_or(ConfigError::MissingTransitRoute { from, to })?;
        Ok(draw_uniform(range, rng))
    }

    pub fn kia_modifier(&self, triage: Triage) -> f64 {
        *self.kia_modifiers.get(&triage).unwrap_or(&1.0)
    }

    pub fn rtd_modifier(&self, triage: Triage) -> f64 {
        *self.rtd_modifiers.get(&triage).unwrap_or(&1.0)
    }

    pub fn facility_order(&self) -> [Facility; 5] {
        Facility::ORDER
    }
}

fn draw_uniform<R: Rng + ?Sized>(range: HoursRange, rng: &mut R) -> f64 {
    if range.max_hours <= range.min_hours {
        range.min_hours
    } else {
        rng.gen_range(range.min_hours..=range.max_hours)
    }
}
