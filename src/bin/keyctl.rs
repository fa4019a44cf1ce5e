//! API key administration CLI
//!
//! ```bash
//! keyctl create --name "planning-team" --email ops@example.mil
//! keyctl list --format table
//! keyctl limits <id> --max-patients 5000 --max-per-day 200
//! ```
//!
//! Exit codes: 0 success, 2 validation error, 3 not found, 4 conflict,
//! 1 unexpected.

use casgen::auth::{ApiKey, ApiKeyStore, PgApiKeyStore};
use casgen::jobs::pg;
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::process::ExitCode;

const EXIT_VALIDATION: u8 = 2;
const EXIT_NOT_FOUND: u8 = 3;
const EXIT_CONFLICT: u8 = 4;

#[derive(Parser, Debug)]
#[command(name = "keyctl", about = "CASGEN API key administration")]
struct CliArgs {
    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Table,
    Csv,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new API key
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        max_patients: Option<u32>,
        #[arg(long)]
        max_per_day: Option<u32>,
        #[arg(long)]
        max_per_minute: Option<u32>,
        #[arg(long)]
        max_per_hour: Option<u32>,
        /// Expire the key after this many days
        #[arg(long)]
        expires_days: Option<i64>,
    },
    /// List all keys
    List,
    /// Show one key by id
    Show { id: String },
    /// Re-activate a deactivated key
    Activate { id: String },
    /// Deactivate a key without deleting it
    Deactivate { id: String },
    /// Delete a key permanently
    Delete { id: String },
    /// Show usage counters for a key
    Usage { id: String },
    /// Aggregate usage across all keys
    Stats,
    /// Update limits on a key
    Limits {
        id: String,
        #[arg(long)]
        max_patients: Option<u32>,
        #[arg(long)]
        max_per_day: Option<u32>,
        #[arg(long)]
        max_per_minute: Option<u32>,
        #[arg(long)]
        max_per_hour: Option<u32>,
    },
    /// Push the expiry out by N days
    Extend {
        id: String,
        #[arg(long)]
        days: i64,
    },
    /// Replace the key string, keeping limits and counters
    Rotate { id: String },
    /// Delete expired and inactive keys
    Cleanup,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    // One admin session needs two connections at most; migrations run
    // here too so the CLI works against a fresh database
    let pool = match pg::connect(&args.database_url, 2).await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("error: cannot open key store: {e}");
            return ExitCode::FAILURE;
        }
    };
    let store = PgApiKeyStore::new(pool);

    match run(&store, args.command, args.format).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(
    store: &PgApiKeyStore,
    command: Command,
    format: OutputFormat,
) -> anyhow::Result<ExitCode> {
    match command {
        Command::Create {
            name,
            email,
            max_patients,
            max_per_day,
            max_per_minute,
            max_per_hour,
            expires_days,
        } => {
            if name.trim().is_empty() {
                eprintln!("error: --name must not be empty");
                return Ok(ExitCode::from(EXIT_VALIDATION));
            }
            let mut record = ApiKey::new(name.trim(), email);
            record.limits.max_patients_per_request = max_patients;
            record.limits.max_requests_per_day = max_per_day;
            if let Some(n) = max_per_minute {
                record.limits.max_requests_per_minute = n;
            }
            if let Some(n) = max_per_hour {
                record.limits.max_requests_per_hour = n;
            }
            record.expires_at = expires_days.map(|d| Utc::now() + ChronoDuration::days(d));
            store.insert(&record).await?;
            render_keys(&[record], format, true);
            Ok(ExitCode::SUCCESS)
        }

        Command::List => {
            let keys = store.list().await?;
            render_keys(&keys, format, false);
            Ok(ExitCode::SUCCESS)
        }

        Command::Show { id } => match store.find_by_id(&id).await? {
            Some(record) => {
                render_keys(&[record], format, true);
                Ok(ExitCode::SUCCESS)
            }
            None => {
                eprintln!("error: no key with id {id}");
                Ok(ExitCode::from(EXIT_NOT_FOUND))
            }
        },

        Command::Activate { id } => set_active(store, &id, true, format).await,
        Command::Deactivate { id } => set_active(store, &id, false, format).await,

        Command::Delete { id } => {
            if store.delete(&id).await? {
                println!("deleted {id}");
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("error: no key with id {id}");
                Ok(ExitCode::from(EXIT_NOT_FOUND))
            }
        }

        Command::Usage { id } => match store.find_by_id(&id).await? {
            Some(record) => {
                match format {
                    OutputFormat::Json => println!(
                        "{}",
                        serde_json::to_string_pretty(&record.counters)?
                    ),
                    _ => {
                        println!("total_requests:  {}", record.counters.total_requests);
                        println!("total_patients:  {}", record.counters.total_patients);
                        println!("daily_requests:  {}", record.counters.daily_requests);
                        println!("daily_reset_at:  {}", record.counters.daily_reset_at);
                    }
                }
                Ok(ExitCode::SUCCESS)
            }
            None => {
                eprintln!("error: no key with id {id}");
                Ok(ExitCode::from(EXIT_NOT_FOUND))
            }
        },

        Command::Stats => {
            let keys = store.list().await?;
            let active = keys.iter().filter(|k| k.is_active).count();
            let requests: u64 = keys.iter().map(|k| k.counters.total_requests).sum();
            let patients: u64 = keys.iter().map(|k| k.counters.total_patients).sum();
            match format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::json!({
                        "keys": keys.len(),
                        "active": active,
                        "total_requests": requests,
                        "total_patients": patients,
                    })
                ),
                _ => {
                    println!("keys:            {}", keys.len());
                    println!("active:          {active}");
                    println!("total_requests:  {requests}");
                    println!("total_patients:  {patients}");
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Limits {
            id,
            max_patients,
            max_per_day,
            max_per_minute,
            max_per_hour,
        } => {
            let Some(mut record) = store.find_by_id(&id).await? else {
                eprintln!("error: no key with id {id}");
                return Ok(ExitCode::from(EXIT_NOT_FOUND));
            };
            if let Some(n) = max_patients {
                record.limits.max_patients_per_request = Some(n);
            }
            if let Some(n) = max_per_day {
                record.limits.max_requests_per_day = Some(n);
            }
            if let Some(n) = max_per_minute {
                record.limits.max_requests_per_minute = n;
            }
            if let Some(n) = max_per_hour {
                record.limits.max_requests_per_hour = n;
            }
            store.update(&record).await?;
            render_keys(&[record], format, true);
            Ok(ExitCode::SUCCESS)
        }

        Command::Extend { id, days } => {
            if days <= 0 {
                eprintln!("error: --days must be positive");
                return Ok(ExitCode::from(EXIT_VALIDATION));
            }
            let Some(mut record) = store.find_by_id(&id).await? else {
                eprintln!("error: no key with id {id}");
                return Ok(ExitCode::from(EXIT_NOT_FOUND));
            };
            let base = record.expires_at.unwrap_or_else(Utc::now).max(Utc::now());
            record.expires_at = Some(base + ChronoDuration::days(days));
            store.update(&record).await?;
            render_keys(&[record], format, true);
            Ok(ExitCode::SUCCESS)
        }

        Command::Rotate { id } => {
            let Some(mut record) = store.find_by_id(&id).await? else {
                eprintln!("error: no key with id {id}");
                return Ok(ExitCode::from(EXIT_NOT_FOUND));
            };
            if record.is_demo {
                eprintln!("error: the demo key cannot be rotated");
                return Ok(ExitCode::from(EXIT_CONFLICT));
            }
            record.key = casgen::auth::store::generate_key_string();
            store.update(&record).await?;
            render_keys(&[record], format, true);
            Ok(ExitCode::SUCCESS)
        }

        Command::Cleanup => {
            let keys = store.list().await?;
            let now = Utc::now();
            let mut removed = 0;
            for key in keys {
                let expired = key.expires_at.is_some_and(|at| at <= now);
                if (expired || !key.is_active) && !key.is_demo {
                    if store.delete(&key.id).await? {
                        removed += 1;
                    }
                }
            }
            println!("removed {removed} keys");
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn set_active(
    store: &PgApiKeyStore,
    id: &str,
    active: bool,
    format: OutputFormat,
) -> anyhow::Result<ExitCode> {
    let Some(mut record) = store.find_by_id(id).await? else {
        eprintln!("error: no key with id {id}");
        return Ok(ExitCode::from(EXIT_NOT_FOUND));
    };
    if record.is_active == active {
        eprintln!(
            "error: key is already {}",
            if active { "active" } else { "inactive" }
        );
        return Ok(ExitCode::from(EXIT_CONFLICT));
    }
    record.is_active = active;
    store.update(&record).await?;
    render_keys(&[record], format, true);
    Ok(ExitCode::SUCCESS)
}

/// Render key records. `full` includes the key string (create/show paths
/// only; listings stay redacted).
fn render_keys(keys: &[ApiKey], format: OutputFormat, full: bool) {
    match format {
        OutputFormat::Json => {
            let value: Vec<serde_json::Value> = keys.iter().map(|k| key_json(k, full)).collect();
            match serde_json::to_string_pretty(&value) {
                Ok(out) => println!("{out}"),
                Err(e) => eprintln!("error: {e}"),
            }
        }
        OutputFormat::Csv => {
            println!("id,name,active,demo,total_requests,total_patients,expires_at");
            for k in keys {
                println!(
                    "{},{},{},{},{},{},{}",
                    k.id,
                    k.name,
                    k.is_active,
                    k.is_demo,
                    k.counters.total_requests,
                    k.counters.total_patients,
                    k.expires_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                );
            }
        }
        OutputFormat::Table => {
            println!(
                "{:<38} {:<20} {:<7} {:<6} {:>10} {:>10}",
                "ID", "NAME", "ACTIVE", "DEMO", "REQUESTS", "PATIENTS"
            );
            for k in keys {
                println!(
                    "{:<38} {:<20} {:<7} {:<6} {:>10} {:>10}",
                    k.id,
                    k.name,
                    k.is_active,
                    k.is_demo,
                    k.counters.total_requests,
                    k.counters.total_patients,
                );
            }
            if full {
                for k in keys {
                    println!("\nkey: {}", k.key);
                }
            }
        }
    }
}

fn key_json(k: &ApiKey, full: bool) -> serde_json::Value {
    let mut value = serde_json::json!({
        "id": k.id,
        "name": k.name,
        "email": k.email,
        "is_active": k.is_active,
        "is_demo": k.is_demo,
        "limits": k.limits,
        "counters": k.counters,
        "expires_at": k.expires_at,
        "created_at": k.created_at,
    });
    if full {
        value["key"] = serde_json::Value::String(k.key.clone());
    }
    value
}
