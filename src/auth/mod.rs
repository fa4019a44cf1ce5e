//! API key authentication and admission control
//!
//! Every job-related request carries a key in the `X-API-Key` header.
//! Admission runs, in order: key lookup (legacy singleton, then the
//! store, auto-provisioning the demo key on first use), sliding-window
//! minute/hour rate limits, the daily request cap, and the per-request
//! patient cap. Admitted requests increment the durable counters with a
//! bounded retry on transient storage errors.

pub mod rate_limit;
pub mod store;

pub use rate_limit::RateLimiter;
pub use store::{ApiKey, ApiKeyStore, KeyCounters, KeyLimits, MemoryApiKeyStore, PgApiKeyStore};

use crate::config::defaults;
use crate::jobs::StorageError;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Admission failures, mapped onto the HTTP error taxonomy by the API layer
#[derive(Debug)]
pub enum AdmissionError {
    /// Missing, unknown, inactive, or expired key (401)
    Unauthorized,
    /// Minute/hour/day cap exceeded (429 with Retry-After)
    RateLimited { retry_after_secs: u64 },
    /// Patient count exceeds the per-key request cap (403)
    QuotaExceeded { message: String },
    /// Durable store failure after retries (503)
    Storage(StorageError),
}

impl From<StorageError> for AdmissionError {
    fn from(err: StorageError) -> Self {
        AdmissionError::Storage(err)
    }
}

/// Multi-tenant admission service
pub struct AuthService {
    store: Arc<dyn ApiKeyStore>,
    limiter: RateLimiter,
    legacy_key: Option<String>,
    demo_key: String,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn ApiKeyStore>,
        legacy_key: Option<String>,
        demo_key: String,
    ) -> Self {
        Self {
            store,
            limiter: RateLimiter::new(),
            legacy_key,
            demo_key,
        }
    }

    pub fn store(&self) -> &Arc<dyn ApiKeyStore> {
        &self.store
    }

    /// Authenticate a key without consuming quota. Used by read-only
    /// endpoints (status, listing, downloads).
    pub async fn authenticate(&self, raw_key: &str) -> Result<ApiKey, AdmissionError> {
        if raw_key.is_empty() {
            return Err(AdmissionError::Unauthorized);
        }
        if self
            .legacy_key
            .as_deref()
            .is_some_and(|legacy| legacy == raw_key)
        {
            return Ok(ApiKey::legacy(raw_key));
        }

        let record = match self.store.find_by_key(raw_key).await? {
            Some(record) => record,
            None if raw_key == self.demo_key => self.provision_demo().await?,
            None => return Err(AdmissionError::Unauthorized),
        };

        if !record.is_active {
            return Err(AdmissionError::Unauthorized);
        }
        if record.expires_at.is_some_and(|at| at <= Utc::now()) {
            return Err(AdmissionError::Unauthorized);
        }
        Ok(record)
    }

    /// Full admission for a generation request: authenticate, enforce
    /// rate limits and quotas, and increment counters.
    pub async fn admit(
        &self,
        raw_key: &str,
        requested_patients: u32,
    ) -> Result<ApiKey, AdmissionError> {
        let record = self.authenticate(raw_key).await?;

        // Legacy singleton bypasses every limit
        if record.is_legacy() {
            return Ok(record);
        }

        // Demo keys enforce their patient cap before anything else
        if record.is_demo {
            if let Some(cap) = record.limits.max_patients_per_request {
                if requested_patients > cap {
                    return Err(AdmissionError::QuotaExceeded {
                        message: format!(
                            "demo key allows at most {cap} patients per request"
                        ),
                    });
                }
            }
        }

        // Sliding minute/hour windows, in-process
        self.limiter.check(
            &record.key,
            record.limits.max_requests_per_minute,
            record.limits.max_requests_per_hour,
        )?;

        // Daily request cap against the durable counters
        let now = Utc::now();
        let daily_used = if now >= record.counters.daily_reset_at {
            0
        } else {
            record.counters.daily_requests
        };
        if let Some(cap) = record.limits.max_requests_per_day {
            if daily_used >= cap {
                let retry = (record.counters.daily_reset_at - now).num_seconds().max(1) as u64;
                return Err(AdmissionError::RateLimited {
                    retry_after_secs: retry,
                });
            }
        }

        // Per-request patient cap
        if let Some(cap) = record.limits.max_patients_per_request {
            if requested_patients > cap {
                return Err(AdmissionError::QuotaExceeded {
                    message: format!(
                        "requested {requested_patients} patients exceeds the per-request cap of {cap}"
                    ),
                });
            }
        }

        // Counters are authoritative in the store; transient failures
        // retry with exponential backoff before failing the request
        self.record_admission_with_retry(&record).await?;
        self.limiter.record(&record.key);

        Ok(record)
    }

    /// Credit generated patients to a key once its job completes.
    pub async fn record_patients(&self, key_id: &str, count: u64) {
        if key_id == store::LEGACY_KEY_ID {
            return;
        }
        if let Err(e) = self.store.record_patients(key_id, count).await {
            warn!(key_id = %key_id, error = %e, "Failed to credit generated patients");
        }
    }

    async fn record_admission_with_retry(&self, record: &ApiKey) -> Result<(), AdmissionError> {
        let reset_at = next_utc_midnight();
        let mut backoff = std::time::Duration::from_millis(50);
        let mut last_err = None;
        for _ in 0..defaults::COUNTER_RETRY_ATTEMPTS {
            match self.store.record_admission(&record.id, reset_at).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(key_id = %record.id, error = %e, "Counter increment failed, retrying");
                    last_err = Some(e);
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
        Err(AdmissionError::Storage(last_err.unwrap_or(
            StorageError::Database("counter increment failed".to_string()),
        )))
    }

    async fn provision_demo(&self) -> Result<ApiKey, AdmissionError> {
        let demo = ApiKey::demo(&self.demo_key);
        self.store.insert(&demo).await?;
        info!(key = %self.demo_key, "Auto-provisioned demo API key");
        Ok(demo)
    }
}

/// The daily window resets at UTC midnight
fn next_utc_midnight() -> chrono::DateTime<Utc> {
    let now = Utc::now();
    (now + ChronoDuration::days(1))
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| chrono::DateTime::from_naive_utc_and_offset(naive, Utc))
        .unwrap_or(now + ChronoDuration::hours(24))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_with_memory() -> AuthService {
        AuthService::new(
            Arc::new(MemoryApiKeyStore::new()),
            Some("legacy-key-0123456789abcdef".to_string()),
            defaults::DEMO_API_KEY_DEFAULT.to_string(),
        )
    }

    #[tokio::test]
    async fn unknown_key_is_unauthorized() {
        let auth = service_with_memory();
        assert!(matches!(
            auth.admit("nope", 10).await,
            Err(AdmissionError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn legacy_key_is_unlimited() {
        let auth = service_with_memory();
        let key = auth
            .admit("legacy-key-0123456789abcdef", 100_000)
            .await
            .unwrap();
        assert!(key.is_legacy());
    }

    #[tokio::test]
    async fn demo_key_is_auto_provisioned_with_restrictive_limits() {
        let auth = service_with_memory();
        let key = auth.admit(defaults::DEMO_API_KEY_DEFAULT, 100).await.unwrap();
        assert!(key.is_demo);
        assert_eq!(
            key.limits.max_patients_per_request,
            Some(defaults::DEMO_MAX_PATIENTS_PER_REQUEST)
        );

        // Second use finds the stored record instead of re-provisioning
        let again = auth.admit(defaults::DEMO_API_KEY_DEFAULT, 100).await.unwrap();
        assert_eq!(again.id, key.id);
    }

    #[tokio::test]
    async fn demo_patient_cap_is_a_quota_error() {
        let auth = service_with_memory();
        let result = auth.admit(defaults::DEMO_API_KEY_DEFAULT, 501).await;
        assert!(matches!(result, Err(AdmissionError::QuotaExceeded { .. })));
    }

    #[tokio::test]
    async fn minute_window_returns_retry_after() {
        let auth = service_with_memory();
        // Demo key allows 10/minute
        for _ in 0..defaults::DEMO_MAX_REQUESTS_PER_MINUTE {
            auth.admit(defaults::DEMO_API_KEY_DEFAULT, 1).await.unwrap();
        }
        match auth.admit(defaults::DEMO_API_KEY_DEFAULT, 1).await {
            Err(AdmissionError::RateLimited { retry_after_secs }) => {
                assert!(retry_after_secs > 0);
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn admission_increments_durable_counters() {
        let auth = service_with_memory();
        auth.admit(defaults::DEMO_API_KEY_DEFAULT, 1).await.unwrap();
        auth.admit(defaults::DEMO_API_KEY_DEFAULT, 1).await.unwrap();
        let stored = auth
            .store
            .find_by_key(defaults::DEMO_API_KEY_DEFAULT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.counters.total_requests, 2);
        assert_eq!(stored.counters.daily_requests, 2);
    }
}
