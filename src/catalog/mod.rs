//! Demographics & injury reference catalog
//!
//! Loaded once at process start from bundled data files and shared via
//! `Arc`. Read-only after initialization, so access is concurrency-safe
//! without locking. Tests construct their own instances.

use crate::types::{Diagnosis, InjuryType};
use rand::Rng;
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

const DEMOGRAPHICS: &str = include_str!("../../data/demographics.json");
const INJURIES: &str = include_str!("../../data/injuries.json");

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to parse reference data: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("injury table for {0} is empty")]
    EmptyInjuryTable(InjuryType),
    #[error("name pool is missing entries")]
    EmptyNamePool,
}

/// Weighted name pool for one nationality
#[derive(Debug, Clone, Deserialize)]
pub struct NamePool {
    pub male_ratio: f64,
    pub male_given: Vec<String>,
    pub female_given: Vec<String>,
    pub family: Vec<String>,
}

impl NamePool {
    fn validate(&self) -> Result<(), CatalogError> {
        if self.male_given.is_empty() || self.female_given.is_empty() || self.family.is_empty() {
            return Err(CatalogError::EmptyNamePool);
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct DemographicsFile {
    generic: NamePool,
    nations: BTreeMap<String, NamePool>,
}

/// One row of the injury table
#[derive(Debug, Clone, Deserialize)]
pub struct InjuryEntry {
    pub code: String,
    pub display: String,
    pub weight: f64,
}

/// A sampled person identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub given_name: String,
    pub family_name: String,
    pub gender: String,
}

/// Immutable reference data: person identities by nationality and injury
/// codes by category.
#[derive(Debug)]
pub struct ReferenceCatalog {
    nations: BTreeMap<String, NamePool>,
    generic: NamePool,
    injuries: BTreeMap<InjuryType, Vec<InjuryEntry>>,
}

impl ReferenceCatalog {
    /// Load the bundled reference data
    pub fn embedded() -> Result<Self, CatalogError> {
        Self::from_json(DEMOGRAPHICS, INJURIES)
    }

    /// Load from raw JSON documents (tests and overrides)
    pub fn from_json(demographics: &str, injuries: &str) -> Result<Self, CatalogError> {
        let demo: DemographicsFile = serde_json::from_str(demographics)?;
        demo.generic.validate()?;
        for pool in demo.nations.values() {
            pool.validate()?;
        }

        let raw: BTreeMap<InjuryType, Vec<InjuryEntry>> = serde_json::from_str(injuries)?;
        let mut tables = BTreeMap::new();
        for injury_type in InjuryType::ALL {
            let mut entries = raw.get(&injury_type).cloned().unwrap_or_default();
            if entries.is_empty() {
                return Err(CatalogError::EmptyInjuryTable(injury_type));
            }
            // Sorted by code for stable iteration order
            entries.sort_by(|a, b| a.code.cmp(&b.code));
            tables.insert(injury_type, entries);
        }

        Ok(Self {
            nations: demo.nations,
            generic: demo.generic,
            injuries: tables,
        })
    }

    /// Sample an identity for a nationality, falling back to the generic
    /// pool when the nationality is unknown.
    pub fn sample_identity<R: Rng + ?Sized>(&self, nationality: &str, rng: &mut R) -> Identity {
        let pool = self.nations.get(nationality).unwrap_or(&self.generic);
        let male = rng.gen_bool(pool.male_ratio.clamp(0.0, 1.0));
        let given = if male {
            &pool.male_given[rng.gen_range(0..pool.male_given.len())]
        } else {
            &pool.female_given[rng.gen_range(0..pool.female_given.len())]
        };
        let family = &pool.family[rng.gen_range(0..pool.family.len())];
        Identity {
            given_name: given.clone(),
            family_name: family.clone(),
            gender: if male { "male" } else { "female" }.to_string(),
        }
    }

    /// Sample an injury code from the category-scoped weighted table
    pub fn sample_injury<R: Rng + ?Sized>(
        &self,
        injury_type: InjuryType,
        rng: &mut R,
    ) -> Diagnosis {
        let entries = &self.injuries[&injury_type];
        let total: f64 = entries.iter().map(|e| e.weight.max(0.0)).sum();
        let mut pick = rng.gen_range(0.0..total.max(f64::MIN_POSITIVE));
        for entry in entries {
            pick -= entry.weight.max(0.0);
            if pick <= 0.0 {
                return Diagnosis {
                    code: entry.code.clone(),
                    display: entry.display.clone(),
                };
            }
        }
        // Rounding can leave a sliver; the last entry absorbs it
        let last = &entries[entries.len() - 1];
        Diagnosis {
            code: last.code.clone(),
            display: last.display.clone(),
        }
    }

    /// All injury entries for a category, sorted by code
    pub fn injuries(&self, injury_type: InjuryType) -> &[InjuryEntry] {
        &self.injuries[&injury_type]
    }

    /// Known nationality codes, sorted
    pub fn nationalities(&self) -> impl Iterator<Item = &str> {
        self.nations.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn embedded_catalog_loads() {
        let catalog = ReferenceCatalog::embedded().unwrap();
        assert!(catalog.nationalities().count() >= 5);
        for injury_type in InjuryType::ALL {
            assert!(!catalog.injuries(injury_type).is_empty());
        }
    }

    #[test]
    fn injury_entries_are_sorted_by_code() {
        let catalog = ReferenceCatalog::embedded().unwrap();
        let entries = catalog.injuries(InjuryType::BattleInjury);
        let mut codes: Vec<&str> = entries.iter().map(|e| e.code.as_str()).collect();
        let sorted = codes.clone();
        codes.sort();
        assert_eq!(codes, sorted);
    }

    #[test]
    fn unknown_nationality_falls_back_to_generic_pool() {
        let catalog = ReferenceCatalog::embedded().unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let identity = catalog.sample_identity("ZZZ", &mut rng);
        assert!(!identity.given_name.is_empty());
        assert!(!identity.family_name.is_empty());
    }

    #[test]
    fn sampled_injury_matches_category() {
        let catalog = ReferenceCatalog::embedded().unwrap();
        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..100 {
            let d = catalog.sample_injury(InjuryType::Disease, &mut rng);
            assert!(d.code.starts_with("DIS-"), "unexpected code {}", d.code);
        }
    }

    #[test]
    fn identity_sampling_is_deterministic_per_seed() {
        let catalog = ReferenceCatalog::embedded().unwrap();
        let a = catalog.sample_identity("USA", &mut StdRng::seed_from_u64(5));
        let b = catalog.sample_identity("USA", &mut StdRng::seed_from_u64(5));
        assert_eq!(a, b);
    }
}
