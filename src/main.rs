//! CASGEN service binary
//!
//! ## Environment variables
//!
//! | Variable              | Required | Description                              |
//! |-----------------------|----------|------------------------------------------|
//! | `DATABASE_URL`        | No       | PostgreSQL DSN; omit for in-memory dev   |
//! | `OUTPUT_ROOT`         | No       | Artifact root (default ./output)         |
//! | `WORKER_POOL_SIZE`    | No       | Workers (default min(CPU, 4))            |
//! | `BATCH_SIZE`          | No       | Patients per output batch (default 500)  |
//! | `JOB_TIMEOUT_SECONDS` | No       | Soft job deadline (default 1800)         |
//! | `JOB_RETENTION_DAYS`  | No       | Artifact retention (default 7)           |
//! | `LEGACY_API_KEY`      | No       | Honored as an unlimited active key       |
//! | `DEMO_API_KEY`        | No       | Demo key override                        |

use casgen::api::{routes, AppState};
use casgen::auth::{AuthService, MemoryApiKeyStore, PgApiKeyStore};
use casgen::cache::{Cache, MemoryCache, NoopCache};
use casgen::config::ServiceConfig;
use casgen::evac::EvacuationTimes;
use casgen::jobs::{
    pg, run_worker_pool, JobRepository, MemoryJobRepository, PgJobRepository, WorkerContext,
};
use casgen::{background, catalog::ReferenceCatalog, medical::ProtocolTable};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "casgen", about = "Casualty generation and evacuation simulation service")]
struct CliArgs {
    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Port to listen on (default: 8080)
    #[arg(long, short)]
    port: Option<u16>,

    /// Bind address (overrides --port)
    #[arg(long)]
    bind_address: Option<String>,

    /// Run with in-memory stores even when DATABASE_URL is set
    #[arg(long)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,casgen=debug")),
        )
        .init();

    let args = CliArgs::parse();
    let service = ServiceConfig::from_env(args.database_url, args.bind_address, args.port)?;

    info!(bind = %service.bind_address, "Starting CASGEN service");

    // ── Reference data ────────────────────────────────────────────────────────
    let catalog = Arc::new(ReferenceCatalog::embedded()?);
    let protocols = Arc::new(ProtocolTable::embedded()?);
    let evacuation = Arc::new(EvacuationTimes::embedded()?);

    // ── Stores ────────────────────────────────────────────────────────────────
    let use_memory = args.in_memory || service.database_url.is_empty();
    let (repo, key_store, pool): (
        Arc<dyn JobRepository>,
        Arc<dyn casgen::auth::ApiKeyStore>,
        Option<sqlx::PgPool>,
    ) = if use_memory {
        warn!("Running with in-memory stores — jobs and keys do NOT survive a restart");
        (
            Arc::new(MemoryJobRepository::new()),
            Arc::new(MemoryApiKeyStore::new()),
            None,
        )
    } else {
        let pool = pg::connect(
            &service.database_url,
            pg::pool_size(service.worker_pool_size),
        )
        .await?;
        (
            Arc::new(PgJobRepository::new(pool.clone())),
            Arc::new(PgApiKeyStore::new(pool.clone())),
            Some(pool),
        )
    };

    // Crash recovery: running jobs with no worker become failed("orphaned")
    let orphaned = repo.fail_orphans().await?;
    if orphaned > 0 {
        warn!(orphaned, "Failed orphaned jobs from a previous run");
    }

    // ── Services ──────────────────────────────────────────────────────────────
    let auth = Arc::new(AuthService::new(
        Arc::clone(&key_store),
        service.legacy_api_key.clone(),
        service.demo_api_key.clone(),
    ));
    let cache: Arc<dyn Cache> = match &service.cache_url {
        Some(_) => Arc::new(MemoryCache::new()),
        None => Arc::new(NoopCache),
    };

    std::fs::create_dir_all(&service.output_root)?;

    // ── Background tasks ──────────────────────────────────────────────────────
    let worker_ctx = Arc::new(WorkerContext {
        repo: Arc::clone(&repo),
        auth: Arc::clone(&auth),
        catalog: Arc::clone(&catalog),
        protocols: Arc::clone(&protocols),
        service: service.clone(),
    });
    run_worker_pool(worker_ctx);
    info!(workers = service.worker_pool_size, "Worker pool started");

    tokio::spawn(background::run_retention_sweeper(
        Arc::clone(&repo),
        service.clone(),
    ));
    info!("Retention sweeper started");

    // ── HTTP server ───────────────────────────────────────────────────────────
    let state = Arc::new(AppState {
        repo,
        auth,
        cache,
        evacuation,
        service: service.clone(),
        db: pool,
        version: casgen::VERSION,
    });
    let app = routes::build_router(state);
    let listener = tokio::net::TcpListener::bind(&service.bind_address).await?;
    info!(address = %service.bind_address, "CASGEN listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("CASGEN shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("Failed to install Ctrl+C handler");
        return;
    }
    info!("Shutdown signal received");
}
