//! Temporal event generator
//!
//! Produces clustered casualty arrivals from warfare patterns. The horizon
//! `[base_date 00:00, base_date + days_of_fighting)` is walked in 5-minute
//! bins; each bin draws a Poisson count proportional to the mixed scenario
//! shape function, consecutive positive bins group into single events, and
//! the final counts are rescaled so the total equals `total_patients`
//! exactly.

use crate::config::defaults;
use crate::config::validation::NormalizedConfig;
use crate::config::{SpecialEventConfig, Tempo};
use crate::types::{CasualtyEvent, SpecialEventType, WarfareType};
use chrono::{DateTime, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Poisson};

/// Surge hours for surge-tempo scenarios (three surges per day)
const SURGE_HOURS: [u32; 3] = [6, 14, 22];
/// Shape multiplier inside a surge window (±1h around each surge hour)
const SURGE_MULTIPLIER: f64 = 4.0;
/// Baseline shape between surges
const SURGE_BASELINE: f64 = 0.4;
/// Mean bursts per day for intermittent scenarios
const INTERMITTENT_BURSTS_PER_DAY: f64 = 3.0;
/// Burst width in hours for intermittent scenarios
const INTERMITTENT_BURST_HOURS: f64 = 1.5;

/// Generate the time-ordered casualty events for a scenario.
///
/// Guarantees: patient counts sum to exactly `config.total_patients`,
/// events are sorted by timestamp, every event has `patient_count >= 1`,
/// and nothing lies beyond the fighting horizon.
pub fn generate_events(config: &NormalizedConfig, job_seed: u64) -> Vec<CasualtyEvent> {
    let mut rng = StdRng::seed_from_u64(job_seed);

    let horizon_start = start_of_horizon(config);
    let horizon_hours = config.days_of_fighting as f64 * 24.0;
    let bins_per_hour = 60 / defaults::BIN_MINUTES as usize;
    let total_bins = (horizon_hours as usize) * bins_per_hour;
    let bin_hours = defaults::BIN_MINUTES as f64 / 60.0;

    // Active scenarios; uniform sustained fallback when none configured
    let scenarios: Vec<WarfareType> = if config.scenarios.is_empty() {
        vec![WarfareType::Conventional]
    } else {
        config.scenarios.clone()
    };
    let burst_windows = intermittent_windows(config, &scenarios, &mut rng);

    // Base hourly intensity; shapes clustering only, the sum is forced below
    let lambda_base = config.total_patients as f64 / horizon_hours * config.intensity.multiplier();

    // Walk the horizon, Poisson-sampling each bin against the mixed shape
    let mut raw: Vec<RawEvent> = Vec::new();
    let mut open: Option<RawEvent> = None;
    for bin in 0..total_bins {
        let hour = bin as f64 * bin_hours;
        let day = (hour / 24.0) as u32;

        let (shape, dominant) = mixed_shape(config, &scenarios, &burst_windows, hour, &mut rng);
        let env = environmental_factor(config, hour);
        let mean = (lambda_base * bin_hours * shape * env).max(0.0);

        let count = if mean > 0.0 {
            Poisson::new(mean).map(|p| p.sample(&mut rng) as u64).unwrap_or(0)
        } else {
            0
        };

        if count == 0 {
            if let Some(done) = open.take() {
                raw.push(done);
            }
            continue;
        }

        match open.as_mut() {
            // Events never span a midnight boundary
            Some(event) if event.day == day => event.count += count,
            _ => {
                if let Some(done) = open.take() {
                    raw.push(done);
                }
                open = Some(RawEvent {
                    start_hour: hour,
                    day,
                    count,
                    warfare_type: dominant,
                    special: None,
                });
            }
        }
    }
    if let Some(done) = open.take() {
        raw.push(done);
    }

    // Special events are discrete injections at sampled timestamps
    for special in &config.special_events {
        raw.push(inject_special_event(config, special, &scenarios, &mut rng));
    }

    // Nothing fired (tiny cohorts against sparse shapes): one fallback event
    if raw.is_empty() {
        let hour = rng.gen_range(0.0..horizon_hours);
        raw.push(RawEvent {
            start_hour: hour,
            day: (hour / 24.0) as u32,
            count: config.total_patients as u64,
            warfare_type: scenarios[0],
            special: None,
        });
    }

    // Discard anything beyond the horizon before scaling
    raw.retain(|e| e.start_hour < horizon_hours);

    scale_to_total(&mut raw, config.total_patients);

    raw.sort_by(|a, b| {
        a.start_hour
            .partial_cmp(&b.start_hour)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    raw.iter()
        .enumerate()
        .map(|(i, event)| {
            let timestamp = horizon_start + chrono::Duration::seconds((event.start_hour * 3600.0) as i64);
            let threshold = event.warfare_type.mass_casualty_threshold();
            CasualtyEvent {
                event_id: format!("EVT-{:05}", i + 1),
                timestamp,
                patient_count: event.count as u32,
                warfare_type: event.warfare_type,
                is_mass_casualty: event.count as u32 >= threshold,
                environmental_factors: active_factors(config, event.start_hour),
                special_event_type: event.special,
            }
        })
        .collect()
}

struct RawEvent {
    start_hour: f64,
    day: u32,
    count: u64,
    warfare_type: WarfareType,
    special: Option<SpecialEventType>,
}

fn start_of_horizon(config: &NormalizedConfig) -> DateTime<Utc> {
    Utc.from_utc_datetime(
        &config
            .base_date
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default(),
    )
}

/// Characteristic tempo per warfare type. Artillery fights in surges and
/// guerrilla/drone warfare in intermittent bursts; the others follow the
/// campaign tempo from the config.
fn scenario_tempo(warfare: WarfareType, campaign: Tempo) -> Tempo {
    match warfare {
        WarfareType::Artillery => Tempo::Surge,
        WarfareType::Guerrilla | WarfareType::Drone => Tempo::Intermittent,
        WarfareType::Conventional | WarfareType::Urban => campaign,
    }
}

/// Additive weighted sum of the per-scenario shapes, plus a weighted draw
/// of which scenario an event at this hour is attributed to.
fn mixed_shape(
    config: &NormalizedConfig,
    scenarios: &[WarfareType],
    bursts: &[(WarfareType, f64, f64)],
    hour: f64,
    rng: &mut StdRng,
) -> (f64, WarfareType) {
    let weight = 1.0 / scenarios.len() as f64;
    let mut total = 0.0;
    let mut best = (scenarios[0], 0.0);
    for &warfare in scenarios {
        let tempo = scenario_tempo(warfare, config.tempo);
        let shape = tempo_shape(tempo, warfare, config, bursts, hour) * weight;
        total += shape;
        if shape > best.1 {
            best = (warfare, shape);
        }
    }

    // Weighted attribution keeps mixed scenarios from collapsing to one type
    let dominant = if scenarios.len() > 1 && total > 0.0 {
        let mut pick = rng.gen_range(0.0..total);
        let mut chosen = best.0;
        for &warfare in scenarios {
            let tempo = scenario_tempo(warfare, config.tempo);
            let shape = tempo_shape(tempo, warfare, config, bursts, hour) * weight;
            pick -= shape;
            if pick <= 0.0 {
                chosen = warfare;
                break;
            }
        }
        chosen
    } else {
        best.0
    };

    (total, dominant)
}

fn tempo_shape(
    tempo: Tempo,
    warfare: WarfareType,
    config: &NormalizedConfig,
    bursts: &[(WarfareType, f64, f64)],
    hour: f64,
) -> f64 {
    let hour_of_day = hour % 24.0;
    let days = config.days_of_fighting.max(1) as f64;
    let day_frac = if days > 1.0 {
        (hour / 24.0).floor() / (days - 1.0)
    } else {
        0.0
    };

    match tempo {
        // Near-constant with a small diurnal oscillation peaking mid-day
        Tempo::Sustained => {
            1.0 + 0.2 * ((hour_of_day - 6.0) / 24.0 * std::f64::consts::TAU).sin()
        }
        Tempo::Escalating => 0.5 + day_frac,
        Tempo::Declining => 1.5 - day_frac,
        Tempo::Surge => {
            let in_surge = SURGE_HOURS
                .iter()
                .any(|&h| (hour_of_day - h as f64).abs() <= 1.0);
            if in_surge {
                SURGE_MULTIPLIER
            } else {
                SURGE_BASELINE
            }
        }
        Tempo::Intermittent => {
            let in_burst = bursts
                .iter()
                .any(|&(w, start, end)| w == warfare && hour >= start && hour < end);
            if in_burst {
                3.0
            } else {
                0.0
            }
        }
    }
}

/// Pre-sample Poisson burst windows for intermittent scenarios so the
/// shape function stays deterministic across bins.
fn intermittent_windows(
    config: &NormalizedConfig,
    scenarios: &[WarfareType],
    rng: &mut StdRng,
) -> Vec<(WarfareType, f64, f64)> {
    let horizon_hours = config.days_of_fighting as f64 * 24.0;
    let mut windows = Vec::new();
    for &warfare in scenarios {
        if scenario_tempo(warfare, config.tempo) != Tempo::Intermittent {
            continue;
        }
        let mean = INTERMITTENT_BURSTS_PER_DAY * config.days_of_fighting as f64;
        let bursts = Poisson::new(mean.max(0.5))
            .map(|p| p.sample(rng) as usize)
            .unwrap_or(1)
            .max(1);
        for _ in 0..bursts {
            let start = rng.gen_range(0.0..horizon_hours);
            windows.push((warfare, start, (start + INTERMITTENT_BURST_HOURS).min(horizon_hours)));
        }
    }
    windows
}

/// Multiplicative environmental modifier for a given hour band
fn environmental_factor(config: &NormalizedConfig, hour: f64) -> f64 {
    let hour_of_day = hour % 24.0;
    let mut factor = 1.0;
    if config.environment.night_operations && !(6.0..22.0).contains(&hour_of_day) {
        factor *= 1.4;
    }
    if config.environment.adverse_weather && (6.0..18.0).contains(&hour_of_day) {
        factor *= 0.7;
    }
    factor
}

fn active_factors(config: &NormalizedConfig, hour: f64) -> Vec<String> {
    let hour_of_day = hour % 24.0;
    let mut factors = Vec::new();
    if config.environment.night_operations && !(6.0..22.0).contains(&hour_of_day) {
        factors.push("night_operations".to_string());
    }
    if config.environment.adverse_weather {
        factors.push("adverse_weather".to_string());
    }
    factors
}

fn inject_special_event(
    config: &NormalizedConfig,
    special: &SpecialEventConfig,
    scenarios: &[WarfareType],
    rng: &mut StdRng,
) -> RawEvent {
    let day = special
        .day
        .unwrap_or_else(|| rng.gen_range(0..config.days_of_fighting));
    let hour = day as f64 * 24.0 + rng.gen_range(0.0..24.0);
    let count = if special.max_patients > special.min_patients {
        rng.gen_range(special.min_patients..=special.max_patients)
    } else {
        special.min_patients
    } as u64;
    let warfare_type = scenarios[rng.gen_range(0..scenarios.len())];
    RawEvent {
        start_hour: hour.min(config.days_of_fighting as f64 * 24.0 - 0.01),
        day,
        count,
        warfare_type,
        special: Some(special.event_type),
    }
}

/// Rescale event counts so the grand total equals `total` exactly.
///
/// Uniform scaling with the integer remainder redistributed greedily to
/// the largest events; every surviving event keeps at least one patient.
/// When there are more events than patients the largest events win and
/// the rest are coalesced away.
fn scale_to_total(events: &mut Vec<RawEvent>, total: u32) {
    let total = total as u64;
    let current: u64 = events.iter().map(|e| e.count).sum();
    if current == total {
        return;
    }

    if (events.len() as u64) > total {
        // Coalesce: keep the largest `total` events at one patient each
        events.sort_by(|a, b| b.count.cmp(&a.count));
        events.truncate(total as usize);
        for event in events.iter_mut() {
            event.count = 1;
        }
        return;
    }

    // Floor-scale with a minimum of one patient per event
    for event in events.iter_mut() {
        event.count = ((event.count * total) / current.max(1)).max(1);
    }

    let mut diff = total as i64 - events.iter().map(|e| e.count).sum::<u64>() as i64;

    // Largest events absorb the remainder first
    let mut order: Vec<usize> = (0..events.len()).collect();
    order.sort_by(|&a, &b| events[b].count.cmp(&events[a].count));

    let mut i = 0;
    while diff > 0 {
        events[order[i % order.len()]].count += 1;
        diff -= 1;
        i += 1;
    }
    // Overshoot from the per-event floor comes off the smallest events
    let mut j = order.len();
    while diff < 0 {
        j = if j == 0 { order.len() } else { j };
        let idx = order[j - 1];
        if events[idx].count > 1 {
            events[idx].count -= 1;
            diff += 1;
        }
        j -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::request::{FrontConfig, Intensity};
    use crate::evac::EvacuationTimes;
    use chrono::{NaiveDate, Timelike};
    use std::collections::BTreeMap;

    fn test_config(total: u32, days: u32, scenarios: Vec<WarfareType>) -> NormalizedConfig {
        let mut injury_mix = BTreeMap::new();
        injury_mix.insert(crate::types::InjuryType::BattleInjury, 1.0);
        NormalizedConfig {
            total_patients: total,
            days_of_fighting: days,
            base_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            injury_mix,
            fronts: vec![FrontConfig {
                id: "north".to_string(),
                name: None,
                casualty_rate: 1.0,
                nationality_distribution: BTreeMap::from([("USA".to_string(), 1.0)]),
            }],
            scenarios,
            intensity: Intensity::High,
            tempo: Tempo::Sustained,
            environment: Default::default(),
            special_events: vec![],
            evacuation: EvacuationTimes::embedded().unwrap(),
            seed: Some(42),
            output_formats: vec![crate::config::OutputFormat::Json],
            encryption_password: None,
            priority: crate::types::Priority::Normal,
        }
    }

    #[test]
    fn patient_counts_sum_exactly_to_total() {
        for total in [1u32, 7, 100, 5_000] {
            let config = test_config(total, 2, vec![WarfareType::Conventional]);
            let events = generate_events(&config, 42);
            let sum: u32 = events.iter().map(|e| e.patient_count).sum();
            assert_eq!(sum, total, "total {total} mismatch");
            assert!(events.iter().all(|e| e.patient_count >= 1));
        }
    }

    #[test]
    fn events_are_sorted_and_inside_horizon() {
        let config = test_config(500, 3, vec![WarfareType::Conventional]);
        let events = generate_events(&config, 7);
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let end = start + chrono::Duration::days(3);
        for pair in events.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
        for event in &events {
            assert!(event.timestamp >= start && event.timestamp < end);
        }
    }

    #[test]
    fn single_patient_single_day_yields_one_event() {
        let config = test_config(1, 1, vec![WarfareType::Conventional]);
        let events = generate_events(&config, 42);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].patient_count, 1);
    }

    #[test]
    fn zero_scenarios_falls_back_to_sustained() {
        let config = test_config(200, 1, vec![]);
        let events = generate_events(&config, 11);
        let sum: u32 = events.iter().map(|e| e.patient_count).sum();
        assert_eq!(sum, 200);
        assert!(events.iter().all(|e| e.warfare_type == WarfareType::Conventional));
    }

    #[test]
    fn artillery_clusters_around_surge_hours() {
        let config = test_config(300, 1, vec![WarfareType::Artillery]);
        let events = generate_events(&config, 42);
        // Casualty mass concentrates in the surge windows; consecutive-bin
        // grouping merges each window into few large events, so the share
        // is measured over patients
        let near_surge: u32 = events
            .iter()
            .filter(|e| {
                let hour = e.timestamp.time().hour() as f64
                    + e.timestamp.time().minute() as f64 / 60.0;
                SURGE_HOURS.iter().any(|&s| (hour - s as f64).abs() <= 1.0)
            })
            .map(|e| e.patient_count)
            .sum();
        assert!(
            near_surge as f64 >= 300.0 * 0.6,
            "only {near_surge}/300 casualties near surge hours"
        );
        assert!(events.iter().any(|e| e.is_mass_casualty));
    }

    #[test]
    fn special_events_are_injected_with_type() {
        let mut config = test_config(400, 2, vec![WarfareType::Conventional]);
        config.special_events = vec![SpecialEventConfig {
            event_type: SpecialEventType::Ambush,
            min_patients: 20,
            max_patients: 30,
            day: Some(1),
        }];
        let events = generate_events(&config, 9);
        assert!(events
            .iter()
            .any(|e| e.special_event_type == Some(SpecialEventType::Ambush)));
        let sum: u32 = events.iter().map(|e| e.patient_count).sum();
        assert_eq!(sum, 400);
    }

    #[test]
    fn generation_is_deterministic_per_seed() {
        let config = test_config(250, 2, vec![WarfareType::Conventional, WarfareType::Artillery]);
        let a = generate_events(&config, 1234);
        let b = generate_events(&config, 1234);
        assert_eq!(a, b);
    }
}
