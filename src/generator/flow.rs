//! Patient flow simulator
//!
//! Advances each casualty through the evacuation chain as a per-patient
//! state machine. On entering a facility the patient arrives, may die or
//! return to duty during evacuation, otherwise starts evacuation and, if
//! the facility is not Role4, transits rearward with a reduced KIA risk.
//! RTD never occurs mid-transit.
//!
//! Every draw comes from an RNG seeded by `(job seed, patient id)`, so
//! batch-level parallelism cannot change outputs.

use crate::catalog::ReferenceCatalog;
use crate::config::defaults;
use crate::config::validation::NormalizedConfig;
use crate::generator::{patient_seed, GenerationError};
use crate::medical::ProtocolTable;
use crate::types::{
    CasualtyEvent, Facility, FinalStatus, InjuryType, Patient, PatientBuilder, TimelineEventType,
    Triage,
};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::debug;

/// Injury timestamps jitter up to this many minutes after the event
const INJURY_JITTER_MINUTES: f64 = 15.0;

/// Per-job patient flow simulator. Cheap to share across batches; the
/// only interior state is the once-per-diagnosis fallback log guard.
pub struct FlowSimulator<'a> {
    config: &'a NormalizedConfig,
    catalog: &'a ReferenceCatalog,
    protocols: &'a ProtocolTable,
    job_seed: u64,
    keyword_logged: Mutex<HashSet<String>>,
}

impl<'a> FlowSimulator<'a> {
    pub fn new(
        config: &'a NormalizedConfig,
        catalog: &'a ReferenceCatalog,
        protocols: &'a ProtocolTable,
        job_seed: u64,
    ) -> Self {
        Self {
            config,
            catalog,
            protocols,
            job_seed,
            keyword_logged: Mutex::new(HashSet::new()),
        }
    }

    /// Simulate one patient spawned by `event`.
    pub fn simulate_patient(
        &self,
        patient_id: u64,
        event: &CasualtyEvent,
    ) -> Result<Patient, GenerationError> {
        let mut rng = StdRng::seed_from_u64(patient_seed(self.job_seed, patient_id));

        let front = self.pick_front(&mut rng);
        let nationality = pick_weighted(&front.nationality_distribution, &mut rng);
        let identity = self.catalog.sample_identity(&nationality, &mut rng);
        let injury_type = self.pick_injury_type(&mut rng);
        let diagnoses = vec![self.catalog.sample_injury(injury_type, &mut rng)];
        let triage = pick_triage(injury_type, &mut rng);

        let jitter_minutes = rng.gen_range(0.0..INJURY_JITTER_MINUTES);
        let injury_timestamp = event.timestamp + duration_from_hours(jitter_minutes / 60.0);

        let mut builder = PatientBuilder {
            id: patient_id,
            nationality,
            given_name: identity.given_name,
            family_name: identity.family_name,
            gender: identity.gender,
            front_id: front.id.clone(),
            triage,
            injury_type,
            diagnoses,
            treatments: Vec::new(),
            injury_timestamp,
            timeline: Vec::new(),
        };

        let (status, last_facility) = self.walk_chain(&mut builder, &mut rng)?;
        Ok(builder.freeze(status, last_facility))
    }

    /// Facility progression state machine, initial state POI.
    fn walk_chain(
        &self,
        builder: &mut PatientBuilder,
        rng: &mut StdRng,
    ) -> Result<(FinalStatus, Facility), GenerationError> {
        let evac = &self.config.evacuation;
        let triage = builder.triage;
        let injury_type = builder.injury_type;
        let tags = ProtocolTable::patient_tags(&builder.diagnoses);

        let mut facility = Facility::Poi;
        let mut t = builder.injury_timestamp;

        loop {
            builder.push_event(TimelineEventType::Arrival, facility, t, None, None);
            self.select_treatments_at(builder, facility, t, &tags);

            let evac_hours = evac.draw_evacuation(facility, triage, rng);

            // KIA risk during evacuation
            let p_kia =
                defaults::base_kia_rate(facility, injury_type) * evac.kia_modifier(triage);
            if rng.gen_bool(p_kia.clamp(0.0, 1.0)) {
                let dt = rng.gen_range(0.0..=evac_hours.max(f64::MIN_POSITIVE));
                let when = t + duration_from_hours(dt);
                builder.push_event(TimelineEventType::Kia, facility, when, None, None);
                return Ok((FinalStatus::Kia, facility));
            }

            builder.push_event(
                TimelineEventType::EvacuationStart,
                facility,
                t,
                Some(evac_hours),
                None,
            );

            // RTD during evacuation, only forward of Role4 and for
            // non-severe (T2/T3) patients
            if facility != Facility::Role4 && triage != Triage::T1 {
                let p_rtd =
                    defaults::base_rtd_rate(facility, injury_type) * evac.rtd_modifier(triage);
                if rng.gen_bool(p_rtd.clamp(0.0, 1.0)) {
                    let dt = rng.gen_range(0.0..=evac_hours.max(f64::MIN_POSITIVE));
                    let when = t + duration_from_hours(dt);
                    builder.push_event(TimelineEventType::Rtd, facility, when, None, None);
                    return Ok((FinalStatus::Rtd, facility));
                }
            }

            // Role4 auto-RTD at the end of evacuation
            if facility == Facility::Role4 {
                let when = t + duration_from_hours(evac_hours);
                builder.push_event(TimelineEventType::Rtd, Facility::Role4, when, None, None);
                return Ok((FinalStatus::RemainsRole4, Facility::Role4));
            }

            // Advance rearward; a small share of POI patients bypass Role1
            let next = if facility == Facility::Poi
                && rng.gen_bool(defaults::ROLE1_BYPASS_PROBABILITY)
            {
                Facility::Role2
            } else {
                facility.next().ok_or_else(|| {
                    GenerationError::Invariant(format!("no next facility after {facility}"))
                })?
            };

            let transit_hours = evac.draw_transit(facility, triage, rng)?;
            let transit_start = t + duration_from_hours(evac_hours);

            // KIA during transit runs at half the evacuation rate
            let p_transit_kia = p_kia * defaults::TRANSIT_KIA_FACTOR;
            if rng.gen_bool(p_transit_kia.clamp(0.0, 1.0)) {
                let dt = rng.gen_range(0.0..=transit_hours.max(f64::MIN_POSITIVE));
                let when = transit_start + duration_from_hours(dt);
                builder.push_event(TimelineEventType::Kia, facility, when, None, None);
                return Ok((FinalStatus::Kia, facility));
            }

            builder.push_event(
                TimelineEventType::TransitStart,
                facility,
                transit_start,
                None,
                Some(transit_hours),
            );

            t = transit_start + duration_from_hours(transit_hours);
            facility = next;
        }
    }

    fn select_treatments_at(
        &self,
        builder: &mut PatientBuilder,
        facility: Facility,
        at: DateTime<Utc>,
        tags: &[String],
    ) {
        let hours = (at - builder.injury_timestamp).num_milliseconds() as f64 / 3_600_000.0;
        let diagnoses = builder.diagnoses.clone();
        for diagnosis in &diagnoses {
            let selection = self.protocols.select_treatments(
                diagnosis,
                facility,
                builder.triage,
                hours.max(0.0),
                tags,
            );
            if selection.via_keyword {
                let mut logged = self
                    .keyword_logged
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if logged.insert(diagnosis.code.clone()) {
                    debug!(
                        code = %diagnosis.code,
                        display = %diagnosis.display,
                        "No protocol entry for diagnosis, using keyword match"
                    );
                }
            }
            builder.treatments.push(crate::types::TreatmentRecord {
                diagnosis_code: diagnosis.code.clone(),
                facility,
                treatments: selection.treatments,
            });
        }
    }

    fn pick_front(&self, rng: &mut StdRng) -> &crate::config::FrontConfig {
        let total: f64 = self.config.fronts.iter().map(|f| f.casualty_rate.max(0.0)).sum();
        let mut pick = rng.gen_range(0.0..total.max(f64::MIN_POSITIVE));
        for front in &self.config.fronts {
            pick -= front.casualty_rate.max(0.0);
            if pick <= 0.0 {
                return front;
            }
        }
        &self.config.fronts[self.config.fronts.len() - 1]
    }

    fn pick_injury_type(&self, rng: &mut StdRng) -> InjuryType {
        let total: f64 = self.config.injury_mix.values().sum();
        let mut pick = rng.gen_range(0.0..total.max(f64::MIN_POSITIVE));
        for (injury_type, weight) in &self.config.injury_mix {
            pick -= weight;
            if pick <= 0.0 {
                return *injury_type;
            }
        }
        InjuryType::BattleInjury
    }
}

fn pick_triage(injury_type: InjuryType, rng: &mut StdRng) -> Triage {
    let weights = defaults::default_triage_weights(injury_type);
    let total: f64 = weights.iter().map(|(_, w)| w).sum();
    let mut pick = rng.gen_range(0.0..total.max(f64::MIN_POSITIVE));
    for (triage, weight) in weights {
        pick -= weight;
        if pick <= 0.0 {
            return triage;
        }
    }
    Triage::T3
}

fn pick_weighted(map: &std::collections::BTreeMap<String, f64>, rng: &mut StdRng) -> String {
    let total: f64 = map.values().map(|w| w.max(0.0)).sum();
    let mut pick = rng.gen_range(0.0..total.max(f64::MIN_POSITIVE));
    for (key, weight) in map {
        pick -= weight.max(0.0);
        if pick <= 0.0 {
            return key.clone();
        }
    }
    map.keys()
        .next_back()
        .cloned()
        .unwrap_or_default()
}

fn duration_from_hours(hours: f64) -> Duration {
    Duration::milliseconds((hours * 3_600_000.0) as i64)
}
