//! Service configuration — environment variables, CLI args, defaults

use super::defaults;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Process-level configuration for the generation service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Bind address (e.g., "0.0.0.0:8080")
    pub bind_address: String,
    /// Filesystem root for job output directories
    pub output_root: PathBuf,
    /// Bounded worker pool size (default: min(CPU count, 4))
    pub worker_pool_size: usize,
    /// Patients streamed per output batch
    pub batch_size: usize,
    /// Soft per-job deadline
    pub job_timeout: Duration,
    /// Job directory retention before the sweeper deletes artifacts
    pub retention_days: u64,
    /// Maximum patients accepted per job
    pub max_patients_per_job: u32,
    /// Optional legacy singleton key, honored as an unlimited active key
    pub legacy_api_key: Option<String>,
    /// Well-known demo key string
    pub demo_api_key: String,
    /// Optional side-cache endpoint; the engine runs fine without one
    pub cache_url: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            bind_address: "0.0.0.0:8080".to_string(),
            output_root: PathBuf::from("./output"),
            worker_pool_size: default_worker_pool_size(),
            batch_size: defaults::BATCH_SIZE_DEFAULT,
            job_timeout: Duration::from_secs(defaults::JOB_TIMEOUT_SECS_DEFAULT),
            retention_days: defaults::JOB_RETENTION_DAYS_DEFAULT,
            max_patients_per_job: defaults::MAX_PATIENTS_DEFAULT,
            legacy_api_key: None,
            demo_api_key: defaults::DEMO_API_KEY_DEFAULT.to_string(),
            cache_url: None,
        }
    }
}

/// Worker pool default: min(CPU count, 4)
fn default_worker_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(4)
}

impl ServiceConfig {
    /// Load configuration from environment variables with CLI overrides.
    pub fn from_env(
        database_url: Option<String>,
        bind_address: Option<String>,
        port: Option<u16>,
    ) -> anyhow::Result<Self> {
        let mut config = Self::default();

        // Database URL: CLI arg > env var
        config.database_url = database_url
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .unwrap_or_default();

        // Bind address: CLI --bind-address or --port
        if let Some(addr) = bind_address {
            config.bind_address = addr;
        } else if let Some(p) = port {
            config.bind_address = format!("0.0.0.0:{}", p);
        }

        if let Ok(v) = std::env::var("OUTPUT_ROOT") {
            config.output_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("WORKER_POOL_SIZE") {
            match v.parse::<usize>() {
                Ok(n) if n >= 1 => config.worker_pool_size = n,
                _ => warn!(value = %v, "Ignoring invalid WORKER_POOL_SIZE"),
            }
        }
        if let Ok(v) = std::env::var("BATCH_SIZE") {
            match v.parse::<usize>() {
                Ok(n) if n >= 1 => config.batch_size = n,
                _ => warn!(value = %v, "Ignoring invalid BATCH_SIZE"),
            }
        }
        if let Ok(v) = std::env::var("JOB_TIMEOUT_SECONDS") {
            if let Ok(n) = v.parse::<u64>() {
                config.job_timeout = Duration::from_secs(n);
            }
        }
        if let Ok(v) = std::env::var("JOB_RETENTION_DAYS") {
            if let Ok(n) = v.parse::<u64>() {
                config.retention_days = n;
            }
        }
        if let Ok(v) = std::env::var("MAX_PATIENTS_PER_JOB") {
            if let Ok(n) = v.parse::<u32>() {
                config.max_patients_per_job = n;
            }
        }

        config.legacy_api_key = std::env::var("LEGACY_API_KEY").ok().filter(|k| {
            if k.len() < 16 {
                warn!("LEGACY_API_KEY shorter than 16 chars — refusing to honor it");
                false
            } else {
                true
            }
        });
        if let Ok(v) = std::env::var("DEMO_API_KEY") {
            if !v.is_empty() {
                config.demo_api_key = v;
            }
        }
        config.cache_url = std::env::var("CACHE_URL").ok();

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ServiceConfig::default();
        assert!(config.worker_pool_size >= 1 && config.worker_pool_size <= 4);
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.job_timeout, Duration::from_secs(1_800));
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.max_patients_per_job, 100_000);
    }
}
