//! Bounded worker pool
//!
//! Each worker runs a claim loop against the repository. A claimed job is
//! executed end to end: temporal events, patient flow in ordered batches
//! streamed to the output writers, bundling, then the terminal
//! transition. The cancel flag is observed between batches and between
//! output phases; a soft deadline fails the job with reason "timeout".

use super::repository::JobRepository;
use super::StorageError;
use crate::auth::AuthService;
use crate::catalog::ReferenceCatalog;
use crate::config::validation::NormalizedConfig;
use crate::config::{defaults, ServiceConfig};
use crate::generator::flow::FlowSimulator;
use crate::generator::temporal;
use crate::medical::ProtocolTable;
use crate::output::{bundle, OutputWriters};
use crate::types::{
    CasualtyEvent, FinalStatus, JobFailure, JobRecord, JobStatus, JobSummary, Patient,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Shared state for the worker pool
pub struct WorkerContext {
    pub repo: Arc<dyn JobRepository>,
    pub auth: Arc<AuthService>,
    pub catalog: Arc<ReferenceCatalog>,
    pub protocols: Arc<ProtocolTable>,
    pub service: ServiceConfig,
}

/// Spawn the bounded worker pool. Each worker polls for pending jobs
/// once a second and executes one job at a time.
pub fn run_worker_pool(ctx: Arc<WorkerContext>) {
    for worker_id in 0..ctx.service.worker_pool_size {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            worker_loop(ctx, worker_id).await;
        });
    }
}

async fn worker_loop(ctx: Arc<WorkerContext>, worker_id: usize) {
    info!(worker_id, "Generation worker started");
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let job = match ctx.repo.claim_next().await {
            Ok(Some(job)) => job,
            Ok(None) => continue,
            Err(e) => {
                error!(worker_id, error = %e, "Job claim failed");
                continue;
            }
        };

        let job_id = job.id;
        info!(worker_id, job_id = %job_id, priority = %job.priority, "Claimed generation job");

        let deadline = ctx.service.job_timeout;
        match tokio::time::timeout(deadline, execute_job(&ctx, &job)).await {
            Ok(Ok(outcome)) => {
                info!(worker_id, job_id = %job_id, outcome = %outcome, "Job finished");
            }
            Ok(Err(failure)) => {
                warn!(worker_id, job_id = %job_id, code = %failure.code, "Job failed: {}", failure.message);
                let _ = ctx
                    .repo
                    .transition(job_id, JobStatus::Failed, Some(failure))
                    .await;
            }
            Err(_) => {
                warn!(worker_id, job_id = %job_id, "Job exceeded its deadline");
                cleanup_output_dir(&ctx, &job).await;
                let _ = ctx
                    .repo
                    .transition(
                        job_id,
                        JobStatus::Failed,
                        Some(JobFailure::new("GENERATION_ERROR", "timeout")),
                    )
                    .await;
            }
        }
    }
}

/// Terminal outcome of one execution, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Cancelled,
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOutcome::Completed => write!(f, "completed"),
            JobOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Execute one claimed job to a terminal state. Returns the outcome, or
/// the failure to record on the row.
pub async fn execute_job(
    ctx: &WorkerContext,
    job: &JobRecord,
) -> Result<JobOutcome, JobFailure> {
    let config: NormalizedConfig = serde_json::from_value(job.config.clone())
        .map_err(|e| JobFailure::new("GENERATION_ERROR", format!("bad stored config: {e}")))?;

    set_progress(ctx, job, defaults::PROGRESS_INIT, "Initializing").await;

    let job_seed = config.seed.unwrap_or_else(|| seed_from_job_id(job));
    let events = temporal::generate_events(&config, job_seed);
    let total: u64 = events.iter().map(|e| e.patient_count as u64).sum();

    let dir = ctx.service.output_root.join(job.dir_name());
    let mut writers = OutputWriters::create(&dir, &config.output_formats)
        .map_err(|e| JobFailure::new("STORAGE_ERROR", e.to_string()))?;

    let sim = FlowSimulator::new(&config, &ctx.catalog, &ctx.protocols, job_seed);
    let mut stats = SummaryAccumulator::new(&events);
    let stride = defaults::progress_stride(config.total_patients) as u64;

    // Ordered batches: patient ids are sequential across events so the
    // output order is stable regardless of batch boundaries
    let mut batch: Vec<Patient> = Vec::with_capacity(ctx.service.batch_size);
    let mut done: u64 = 0;
    let mut next_report = stride;

    for event in &events {
        for _ in 0..event.patient_count {
            let patient = sim
                .simulate_patient(done, event)
                .map_err(|e| JobFailure::new("GENERATION_ERROR", e.to_string()))?;
            stats.observe(&patient);
            batch.push(patient);
            done += 1;

            if batch.len() >= ctx.service.batch_size {
                writers
                    .write_batch(&batch)
                    .map_err(|e| JobFailure::new("STORAGE_ERROR", e.to_string()))?;
                batch.clear();

                if cancel_checkpoint(ctx, job).await? {
                    drop(writers);
                    cleanup_output_dir(ctx, job).await;
                    return Ok(JobOutcome::Cancelled);
                }
                // Keep the runtime responsive between batches
                tokio::task::yield_now().await;
            }

            if done >= next_report {
                let progress = generation_progress(done, total);
                set_progress(
                    ctx,
                    job,
                    progress,
                    &format!("Generating patient {done}/{total}"),
                )
                .await;
                next_report = done + stride;
            }
        }
    }

    if !batch.is_empty() {
        writers
            .write_batch(&batch)
            .map_err(|e| JobFailure::new("STORAGE_ERROR", e.to_string()))?;
        batch.clear();
    }

    // Finalization: 95..100 across output writing and bundling
    if cancel_checkpoint(ctx, job).await? {
        drop(writers);
        cleanup_output_dir(ctx, job).await;
        return Ok(JobOutcome::Cancelled);
    }
    set_progress(ctx, job, defaults::PROGRESS_GENERATION_END, "Writing outputs").await;

    let mut files = writers
        .finalize()
        .map_err(|e| JobFailure::new("STORAGE_ERROR", e.to_string()))?;

    if cancel_checkpoint(ctx, job).await? {
        cleanup_output_dir(ctx, job).await;
        return Ok(JobOutcome::Cancelled);
    }

    set_progress(ctx, job, 97, "Bundling artifacts").await;
    let bundle_name = bundle::bundle_job(&dir, &job.id.to_string(), &files)
        .map_err(|e| JobFailure::new("STORAGE_ERROR", e.to_string()))?;
    if let Some(password) = &config.encryption_password {
        let sealed = bundle::encrypt_bundle(&dir, &bundle_name, password)
            .map_err(|e| JobFailure::new("STORAGE_ERROR", e.to_string()))?;
        files.push(sealed);
    } else {
        files.push(bundle_name);
    }

    let summary = stats.finish(total);
    ctx.repo
        .set_outputs(job.id, &files, &summary)
        .await
        .map_err(storage_failure)?;

    set_progress(ctx, job, 100, "Done").await;
    ctx.repo
        .transition(job.id, JobStatus::Completed, None)
        .await
        .map_err(storage_failure)?;

    ctx.auth.record_patients(&job.tenant, total).await;
    debug!(job_id = %job.id, patients = total, files = files.len(), "Artifacts written");
    Ok(JobOutcome::Completed)
}

fn storage_failure(e: StorageError) -> JobFailure {
    JobFailure::new("STORAGE_ERROR", e.to_string())
}

/// Map generated-patient progress onto the 5..95 band
fn generation_progress(done: u64, total: u64) -> u8 {
    if total == 0 {
        return defaults::PROGRESS_GENERATION_END;
    }
    let span = (defaults::PROGRESS_GENERATION_END - defaults::PROGRESS_INIT) as u64;
    (defaults::PROGRESS_INIT as u64 + done * span / total) as u8
}

async fn set_progress(ctx: &WorkerContext, job: &JobRecord, progress: u8, phase: &str) {
    if let Err(e) = ctx.repo.update_progress(job.id, progress, phase).await {
        warn!(job_id = %job.id, error = %e, "Progress update failed");
    }
}

/// Observe the cancel flag; storage errors here fail the job rather
/// than risk running an uncancellable loop.
async fn cancel_checkpoint(ctx: &WorkerContext, job: &JobRecord) -> Result<bool, JobFailure> {
    let requested = ctx
        .repo
        .cancel_requested(job.id)
        .await
        .map_err(storage_failure)?;
    if requested {
        let _ = ctx
            .repo
            .transition(job.id, JobStatus::Cancelled, None)
            .await;
    }
    Ok(requested)
}

/// A cancelled job leaves its directory fully absent, or is marked
/// partial when removal fails.
async fn cleanup_output_dir(ctx: &WorkerContext, job: &JobRecord) {
    let dir = ctx.service.output_root.join(job.dir_name());
    if !dir.exists() {
        return;
    }
    if let Err(e) = std::fs::remove_dir_all(&dir) {
        warn!(job_id = %job.id, error = %e, "Could not remove output directory, marking partial");
        let _ = ctx.repo.set_partial(job.id, true).await;
    }
}

/// Stable fallback seed when the config does not pin one
fn seed_from_job_id(job: &JobRecord) -> u64 {
    let bytes = job.id.as_bytes();
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

// ============================================================================
// Summary accumulation
// ============================================================================

struct SummaryAccumulator {
    kia: u64,
    rtd: u64,
    remains_role4: u64,
    by_triage: std::collections::BTreeMap<String, u64>,
    by_last_facility: std::collections::BTreeMap<String, u64>,
    hours: Vec<f64>,
    event_count: u64,
    mass_casualty_events: u64,
}

impl SummaryAccumulator {
    fn new(events: &[CasualtyEvent]) -> Self {
        Self {
            kia: 0,
            rtd: 0,
            remains_role4: 0,
            by_triage: Default::default(),
            by_last_facility: Default::default(),
            hours: Vec::new(),
            event_count: events.len() as u64,
            mass_casualty_events: events.iter().filter(|e| e.is_mass_casualty).count() as u64,
        }
    }

    fn observe(&mut self, patient: &Patient) {
        match patient.final_status {
            FinalStatus::Kia => self.kia += 1,
            FinalStatus::Rtd => self.rtd += 1,
            FinalStatus::RemainsRole4 => self.remains_role4 += 1,
        }
        *self
            .by_triage
            .entry(patient.triage.code().to_string())
            .or_default() += 1;
        *self
            .by_last_facility
            .entry(patient.last_facility.code().to_string())
            .or_default() += 1;
        self.hours.push(patient.hours_to_outcome());
    }

    fn finish(mut self, total: u64) -> JobSummary {
        self.hours
            .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mean = if self.hours.is_empty() {
            0.0
        } else {
            self.hours.iter().sum::<f64>() / self.hours.len() as f64
        };
        let median = if self.hours.is_empty() {
            0.0
        } else {
            self.hours[self.hours.len() / 2]
        };
        let max = self.hours.last().copied().unwrap_or(0.0);
        JobSummary {
            total_patients: total,
            kia: self.kia,
            rtd: self.rtd,
            remains_role4: self.remains_role4,
            by_triage: self.by_triage,
            by_last_facility: self.by_last_facility,
            mean_hours_to_outcome: mean,
            median_hours_to_outcome: median,
            max_hours_to_outcome: max,
            event_count: self.event_count,
            mass_casualty_events: self.mass_casualty_events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryApiKeyStore;
    use crate::config::request::{FrontConfig, Intensity, Tempo};
    use crate::config::validation::NormalizedConfig;
    use crate::config::OutputFormat;
    use crate::evac::EvacuationTimes;
    use crate::jobs::MemoryJobRepository;
    use crate::types::{Priority, WarfareType};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;
    use std::path::Path;

    fn test_normalized(total: u32) -> NormalizedConfig {
        let mut injury_mix = BTreeMap::new();
        injury_mix.insert(crate::types::InjuryType::BattleInjury, 1.0);
        NormalizedConfig {
            total_patients: total,
            days_of_fighting: 1,
            base_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            injury_mix,
            fronts: vec![FrontConfig {
                id: "north".to_string(),
                name: None,
                casualty_rate: 1.0,
                nationality_distribution: BTreeMap::from([("USA".to_string(), 1.0)]),
            }],
            scenarios: vec![WarfareType::Conventional],
            intensity: Intensity::High,
            tempo: Tempo::Sustained,
            environment: Default::default(),
            special_events: vec![],
            evacuation: EvacuationTimes::embedded().unwrap(),
            seed: Some(42),
            output_formats: vec![OutputFormat::Json, OutputFormat::Csv],
            encryption_password: None,
            priority: Priority::Normal,
        }
    }

    fn test_context(output_root: &Path) -> Arc<WorkerContext> {
        let mut service = ServiceConfig::default();
        service.output_root = output_root.to_path_buf();
        service.batch_size = 16;
        let store = Arc::new(MemoryApiKeyStore::new());
        Arc::new(WorkerContext {
            repo: Arc::new(MemoryJobRepository::new()),
            auth: Arc::new(AuthService::new(store, None, "demo".to_string())),
            catalog: Arc::new(ReferenceCatalog::embedded().unwrap()),
            protocols: Arc::new(ProtocolTable::embedded().unwrap()),
            service,
        })
    }

    async fn submit(ctx: &WorkerContext, config: &NormalizedConfig) -> JobRecord {
        let job = JobRecord::new_pending(
            "tenant-a",
            Priority::Normal,
            serde_json::to_value(config).unwrap(),
        );
        ctx.repo.insert(&job).await.unwrap();
        ctx.repo.claim_next().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn execute_job_completes_and_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let config = test_normalized(60);
        let job = submit(&ctx, &config).await;

        let outcome = execute_job(&ctx, &job).await.unwrap();
        assert_eq!(outcome, JobOutcome::Completed);

        let stored = ctx.repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.progress, 100);
        let summary = stored.summary.unwrap();
        assert_eq!(summary.total_patients, 60);
        assert_eq!(summary.kia + summary.rtd + summary.remains_role4, 60);

        let job_dir = dir.path().join(job.dir_name());
        assert!(job_dir.join("patients.json").exists());
        assert!(job_dir.join("patients.csv").exists());
        assert!(job_dir.join(format!("job_{}.zip", job.id)).exists());

        let patients =
            crate::output::json::read_patients(&job_dir.join("patients.json")).unwrap();
        assert_eq!(patients.len(), 60);
        // Ordered output: ids are sequential
        for (i, p) in patients.iter().enumerate() {
            assert_eq!(p.id, i as u64);
        }
    }

    #[tokio::test]
    async fn identical_config_and_seed_produce_identical_patients_json() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let config = test_normalized(40);

        let job_a = submit(&ctx, &config).await;
        execute_job(&ctx, &job_a).await.unwrap();
        let job_b = submit(&ctx, &config).await;
        execute_job(&ctx, &job_b).await.unwrap();

        let a = std::fs::read(dir.path().join(job_a.dir_name()).join("patients.json")).unwrap();
        let b = std::fs::read(dir.path().join(job_b.dir_name()).join("patients.json")).unwrap();
        assert_eq!(a, b, "seeded runs must be byte-identical");
    }

    #[tokio::test]
    async fn encrypted_job_seals_the_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let mut config = test_normalized(10);
        config.encryption_password = Some("hunter2hunter2".to_string());
        let job = submit(&ctx, &config).await;

        execute_job(&ctx, &job).await.unwrap();
        let stored = ctx.repo.get(job.id).await.unwrap().unwrap();
        let sealed = format!("job_{}.zip.enc", job.id);
        assert!(stored.output_files.contains(&sealed));
        let job_dir = dir.path().join(job.dir_name());
        assert!(job_dir.join(&sealed).exists());
        assert!(!job_dir.join(format!("job_{}.zip", job.id)).exists());
    }

    #[tokio::test]
    async fn cancelled_job_removes_its_directory() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let config = test_normalized(2_000);
        let job = submit(&ctx, &config).await;

        // Raise the flag before execution; the first batch checkpoint
        // observes it
        ctx.repo.request_cancel(job.id).await.unwrap();
        let outcome = execute_job(&ctx, &job).await.unwrap();
        assert_eq!(outcome, JobOutcome::Cancelled);

        let stored = ctx.repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
        assert!(!dir.path().join(job.dir_name()).exists());
    }

    #[tokio::test]
    async fn progress_is_monotone_across_execution() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let config = test_normalized(120);
        let job = submit(&ctx, &config).await;
        execute_job(&ctx, &job).await.unwrap();

        // The memory repository clamps regressions; landing at 100 with
        // completed status means every intermediate update was accepted
        let stored = ctx.repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.progress, 100);
        assert_eq!(stored.phase_description, "Done");
    }

    #[test]
    fn generation_progress_stays_inside_band() {
        assert_eq!(generation_progress(0, 100), 5);
        assert_eq!(generation_progress(100, 100), 95);
        let mid = generation_progress(50, 100);
        assert!(mid > 5 && mid < 95);
    }
}
