use anyhow::{Context, Result};
use authz_relationships::{AuthzClient, RelationshipBackend, SpiceDbBackend, SpiceDbConfig};
use authz_sync::{
    AlwaysSync, DistributedLock, PgSource, RedisLock, SourceDatabase, SyncConfig, SyncEngine, SyncReport,
};
use clap::{Parser, Subcommand};
use std::{env, path::PathBuf, sync::Arc, time::Duration};
use tracing::{error, info, Level};
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Authorization relationship synchronizer
#[derive(Parser, Debug)]
#[command(name = "authz-sync")]
#[command(about = "Mirrors membership and off-day facts into the ReBAC authorization backend")]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "AUTHZ_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one incremental sync
    Sync {
        /// Sync even if the source reports no changes
        #[arg(long)]
        force: bool,
    },
    /// Delete every tracked relationship and rebuild from the source.
    /// Can take hours on a large backend.
    Resync {
        #[arg(long)]
        force: bool,
    },
    /// Sync periodically until interrupted
    Run {
        /// Seconds between passes, overriding the configuration
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Write the bundled schema to the backend
    MigrateSchema,
    /// Apply the source database migrations
    MigrateSource,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    let config = SyncConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    info!("Starting authz-sync {}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Sync { force } => {
            let report = build_engine(&config, force).await?.sync().await?;
            log_report(&report);
        }
        Command::Resync { force } => {
            let report = build_engine(&config, force).await?.resync().await?;
            log_report(&report);
        }
        Command::Run { interval_secs } => {
            let interval = interval_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.sync.interval());
            let engine = build_engine(&config, false).await?;
            run_loop(&engine, interval).await;
        }
        Command::MigrateSchema => {
            let client = AuthzClient::new(build_backend(&config)?);
            client.migrate_schema().await.context("Failed to write schema")?;
            info!("Schema written to {}", config.backend.endpoint);
        }
        Command::MigrateSource => {
            let source = PgSource::connect(&config.source.database_url, config.source.max_connections)
                .await
                .context("Failed to connect to source database")?;
            source.migrate().await.context("Failed to migrate source database")?;
        }
    }

    Ok(())
}

fn build_backend(config: &SyncConfig) -> Result<Arc<dyn RelationshipBackend>> {
    let backend = SpiceDbBackend::new(SpiceDbConfig {
        endpoint: config.backend.endpoint.clone(),
        preshared_key: config.backend.preshared_key.clone(),
        timeout: config.backend.timeout(),
    })
    .context("Failed to create backend client")?;
    Ok(Arc::new(backend))
}

async fn build_engine(config: &SyncConfig, force: bool) -> Result<SyncEngine> {
    let backend = build_backend(config)?;

    let lock: Arc<dyn DistributedLock> = Arc::new(
        RedisLock::connect(
            &config.lock.redis_url,
            &config.lock.key,
            config.lock.ttl(),
            config.lock.acquire_timeout(),
        )
        .await
        .context("Failed to connect to lock service")?,
    );

    let mut source: Arc<dyn SourceDatabase> = Arc::new(
        PgSource::connect(&config.source.database_url, config.source.max_connections)
            .await
            .context("Failed to connect to source database")?,
    );
    if force {
        source = Arc::new(AlwaysSync::new(source));
    }

    Ok(SyncEngine::new(backend, source, lock).with_chunk_size(config.sync.chunk_size)?)
}

/// Time given to the lock release spawned by an interrupted pass before the
/// runtime shuts down. Past it, the lock TTL reclaims the entry.
const RELEASE_GRACE: Duration = Duration::from_millis(500);

/// Sync every `interval` until Ctrl-C. Errors are logged and the loop goes on.
async fn run_loop(engine: &SyncEngine, interval: Duration) {
    info!("Syncing every {:?}", interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted during a sync pass");
                tokio::time::sleep(RELEASE_GRACE).await;
                break;
            }
            result = engine.sync() => match result {
                Ok(report) => log_report(&report),
                Err(e) => error!("Sync pass failed: {:#}", anyhow::Error::new(e)),
            },
        }
    }

    info!("Shutting down");
}

fn log_report(report: &SyncReport) {
    info!(
        mode = ?report.mode,
        outcome = ?report.outcome,
        updates = report.total_updates(),
        chunks = report.total_chunks(),
        elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
        "Sync finished"
    );
    for category in &report.categories {
        info!(
            category = category.name,
            entities = category.entities,
            updates = category.updates,
            chunks = category.chunks,
            "Category synced"
        );
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    // Pretty output in development, JSON lines in production
    let is_development = env::var("AUTHZ_ENV").unwrap_or_else(|_| "development".to_string()) == "development";

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("authz_sync={},authz_relationships={},sqlx=warn,reqwest=info", level, level).into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);
    if is_development {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_level(true),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .json(),
            )
            .try_init()?;
    }

    Ok(())
}
