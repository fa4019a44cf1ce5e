//! API key records and the durable key store
//!
//! Keys are opaque strings with at least 32 bytes of entropy. Limits and
//! counters are stored as JSON documents on the row; counter increments
//! run inside a row-locking transaction so concurrent admissions for the
//! same key serialize.

use crate::config::defaults;
use crate::jobs::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Synthetic id for the legacy environment singleton; never persisted
pub const LEGACY_KEY_ID: &str = "legacy";

/// Per-key request/patient limits. `None` means unlimited.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyLimits {
    #[serde(default)]
    pub max_patients_per_request: Option<u32>,
    #[serde(default)]
    pub max_requests_per_day: Option<u32>,
    pub max_requests_per_minute: u32,
    pub max_requests_per_hour: u32,
}

impl Default for KeyLimits {
    fn default() -> Self {
        Self {
            max_patients_per_request: None,
            max_requests_per_day: None,
            max_requests_per_minute: defaults::DEFAULT_MAX_REQUESTS_PER_MINUTE,
            max_requests_per_hour: defaults::DEFAULT_MAX_REQUESTS_PER_HOUR,
        }
    }
}

impl KeyLimits {
    pub fn demo() -> Self {
        Self {
            max_patients_per_request: Some(defaults::DEMO_MAX_PATIENTS_PER_REQUEST),
            max_requests_per_day: Some(defaults::DEMO_MAX_REQUESTS_PER_DAY),
            max_requests_per_minute: defaults::DEMO_MAX_REQUESTS_PER_MINUTE,
            max_requests_per_hour: defaults::DEMO_MAX_REQUESTS_PER_HOUR,
        }
    }

    pub fn unlimited() -> Self {
        Self {
            max_patients_per_request: None,
            max_requests_per_day: None,
            max_requests_per_minute: u32::MAX,
            max_requests_per_hour: u32::MAX,
        }
    }
}

/// Usage counters, authoritative in the durable store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyCounters {
    pub total_requests: u64,
    pub total_patients: u64,
    pub daily_requests: u32,
    pub daily_reset_at: DateTime<Utc>,
}

impl Default for KeyCounters {
    fn default() -> Self {
        Self {
            total_requests: 0,
            total_patients: 0,
            daily_requests: 0,
            daily_reset_at: Utc::now(),
        }
    }
}

/// A long-lived API key record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub key: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub is_active: bool,
    pub is_demo: bool,
    pub limits: KeyLimits,
    pub counters: KeyCounters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub key_metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApiKey {
    /// Fresh standard key with default limits
    pub fn new(name: &str, email: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            key: generate_key_string(),
            name: name.to_string(),
            email,
            is_active: true,
            is_demo: false,
            limits: KeyLimits::default(),
            counters: KeyCounters::default(),
            expires_at: None,
            key_metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    /// The well-known demo key with fixed restrictive limits
    pub fn demo(key: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            key: key.to_string(),
            name: "Demo".to_string(),
            email: None,
            is_active: true,
            is_demo: true,
            limits: KeyLimits::demo(),
            counters: KeyCounters::default(),
            expires_at: None,
            key_metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    /// Synthetic record for the legacy environment singleton
    pub fn legacy(key: &str) -> Self {
        let now = Utc::now();
        Self {
            id: LEGACY_KEY_ID.to_string(),
            key: key.to_string(),
            name: "Legacy".to_string(),
            email: None,
            is_active: true,
            is_demo: false,
            limits: KeyLimits::unlimited(),
            counters: KeyCounters::default(),
            expires_at: None,
            key_metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_legacy(&self) -> bool {
        self.id == LEGACY_KEY_ID
    }
}

/// Generate an opaque key: 32 random bytes, hex-encoded
pub fn generate_key_string() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut out = String::with_capacity(3 + 64);
    out.push_str("cg_");
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

// ============================================================================
// Store contract
// ============================================================================

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn find_by_key(&self, key: &str) -> Result<Option<ApiKey>, StorageError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<ApiKey>, StorageError>;
    async fn insert(&self, record: &ApiKey) -> Result<(), StorageError>;
    /// Full-record update (CLI administration)
    async fn update(&self, record: &ApiKey) -> Result<bool, StorageError>;
    async fn list(&self) -> Result<Vec<ApiKey>, StorageError>;
    async fn delete(&self, id: &str) -> Result<bool, StorageError>;
    /// Serialized counter increment for one admitted request. Resets the
    /// daily window when it has lapsed, advancing `daily_reset_at`.
    async fn record_admission(
        &self,
        id: &str,
        next_reset: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    /// Credit generated patients after a job completes.
    async fn record_patients(&self, id: &str, count: u64) -> Result<(), StorageError>;
}

// ============================================================================
// In-memory store (dev/tests, non-durable)
// ============================================================================

#[derive(Default)]
pub struct MemoryApiKeyStore {
    keys: RwLock<HashMap<String, ApiKey>>,
}

impl MemoryApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiKeyStore for MemoryApiKeyStore {
    async fn find_by_key(&self, key: &str) -> Result<Option<ApiKey>, StorageError> {
        let keys = self.keys.read().await;
        Ok(keys.values().find(|k| k.key == key).cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ApiKey>, StorageError> {
        let keys = self.keys.read().await;
        Ok(keys.get(id).cloned())
    }

    async fn insert(&self, record: &ApiKey) -> Result<(), StorageError> {
        let mut keys = self.keys.write().await;
        keys.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn update(&self, record: &ApiKey) -> Result<bool, StorageError> {
        let mut keys = self.keys.write().await;
        match keys.get_mut(&record.id) {
            Some(stored) => {
                *stored = record.clone();
                stored.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self) -> Result<Vec<ApiKey>, StorageError> {
        let keys = self.keys.read().await;
        let mut all: Vec<ApiKey> = keys.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let mut keys = self.keys.write().await;
        Ok(keys.remove(id).is_some())
    }

    async fn record_admission(
        &self,
        id: &str,
        next_reset: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut keys = self.keys.write().await;
        if let Some(record) = keys.get_mut(id) {
            let now = Utc::now();
            record.counters.total_requests += 1;
            if now >= record.counters.daily_reset_at {
                record.counters.daily_requests = 1;
                record.counters.daily_reset_at = next_reset;
            } else {
                record.counters.daily_requests += 1;
            }
            record.updated_at = now;
        }
        Ok(())
    }

    async fn record_patients(&self, id: &str, count: u64) -> Result<(), StorageError> {
        let mut keys = self.keys.write().await;
        if let Some(record) = keys.get_mut(id) {
            record.counters.total_patients += count;
            record.updated_at = Utc::now();
        }
        Ok(())
    }
}

// ============================================================================
// PostgreSQL store
// ============================================================================

type KeyRow = (
    String,                    // id
    String,                    // key
    String,                    // name
    Option<String>,            // email
    bool,                      // is_active
    bool,                      // is_demo
    serde_json::Value,         // limits_json
    serde_json::Value,         // counters_json
    Option<DateTime<Utc>>,     // expires_at
    Option<serde_json::Value>, // metadata_json
    DateTime<Utc>,             // created_at
    DateTime<Utc>,             // updated_at
);

const KEY_COLUMNS: &str = "id, key, name, email, is_active, is_demo, limits_json, \
     counters_json, expires_at, metadata_json, created_at, updated_at";

pub struct PgApiKeyStore {
    pool: PgPool,
}

impl PgApiKeyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn key_from_row(row: KeyRow) -> Result<ApiKey, StorageError> {
    let (
        id,
        key,
        name,
        email,
        is_active,
        is_demo,
        limits,
        counters,
        expires_at,
        metadata,
        created_at,
        updated_at,
    ) = row;
    Ok(ApiKey {
        id,
        key,
        name,
        email,
        is_active,
        is_demo,
        limits: serde_json::from_value(limits)?,
        counters: serde_json::from_value(counters)?,
        expires_at,
        key_metadata: metadata.unwrap_or(serde_json::Value::Null),
        created_at,
        updated_at,
    })
}

#[async_trait]
impl ApiKeyStore for PgApiKeyStore {
    async fn find_by_key(&self, key: &str) -> Result<Option<ApiKey>, StorageError> {
        let row: Option<KeyRow> =
            sqlx::query_as(&format!("SELECT {KEY_COLUMNS} FROM api_keys WHERE key = $1"))
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        row.map(key_from_row).transpose()
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ApiKey>, StorageError> {
        let row: Option<KeyRow> =
            sqlx::query_as(&format!("SELECT {KEY_COLUMNS} FROM api_keys WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(key_from_row).transpose()
    }

    async fn insert(&self, record: &ApiKey) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO api_keys \
             (id, key, name, email, is_active, is_demo, limits_json, counters_json, \
              expires_at, metadata_json, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), NOW()) \
             ON CONFLICT (key) DO NOTHING",
        )
        .bind(&record.id)
        .bind(&record.key)
        .bind(&record.name)
        .bind(&record.email)
        .bind(record.is_active)
        .bind(record.is_demo)
        .bind(serde_json::to_value(&record.limits)?)
        .bind(serde_json::to_value(&record.counters)?)
        .bind(record.expires_at)
        .bind(&record.key_metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, record: &ApiKey) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE api_keys \
             SET key = $2, name = $3, email = $4, is_active = $5, limits_json = $6, \
                 expires_at = $7, metadata_json = $8, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(&record.id)
        .bind(&record.key)
        .bind(&record.name)
        .bind(&record.email)
        .bind(record.is_active)
        .bind(serde_json::to_value(&record.limits)?)
        .bind(record.expires_at)
        .bind(&record.key_metadata)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<ApiKey>, StorageError> {
        let rows: Vec<KeyRow> = sqlx::query_as(&format!(
            "SELECT {KEY_COLUMNS} FROM api_keys ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(key_from_row).collect()
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_admission(
        &self,
        id: &str,
        next_reset: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        // Row lock serializes concurrent admissions for the same key
        let mut tx = self.pool.begin().await?;
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT counters_json FROM api_keys WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((raw,)) = row else {
            tx.rollback().await.ok();
            return Ok(());
        };

        let mut counters: KeyCounters = serde_json::from_value(raw)?;
        let now = Utc::now();
        counters.total_requests += 1;
        if now >= counters.daily_reset_at {
            counters.daily_requests = 1;
            counters.daily_reset_at = next_reset;
        } else {
            counters.daily_requests += 1;
        }

        sqlx::query("UPDATE api_keys SET counters_json = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(serde_json::to_value(&counters)?)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_patients(&self, id: &str, count: u64) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT counters_json FROM api_keys WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((raw,)) = row else {
            tx.rollback().await.ok();
            return Ok(());
        };

        let mut counters: KeyCounters = serde_json::from_value(raw)?;
        counters.total_patients += count;

        sqlx::query("UPDATE api_keys SET counters_json = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(serde_json::to_value(&counters)?)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
