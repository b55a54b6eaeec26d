use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use looks_comfyui::ComfyUIBackend;
use looks_db::DbPool;
use looks_pipeline::kinds::KindRegistry;
use looks_pipeline::storage::SupabaseStorage;
use looks_pipeline::store::PgStore;
use looks_pipeline::{BatchScheduler, ExecutorConfig, JobExecutor};
use looks_worker::config::WorkerConfig;
use looks_worker::supervisor::{exit_code, Supervisor, SupervisorSettings};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit status for invalid or missing configuration.
const EXIT_CONFIG: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    tracing::info!(
        worker_id = %config.worker_id,
        backend = %config.comfyui_api_base,
        affinity = %config.backend_affinity,
        max_batch = config.batch_bounds.max(),
        "LOOKS worker starting",
    );

    let pool = match looks_db::create_pool(&config.database_url).context("Invalid DATABASE_URL") {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = ?e, "Invalid configuration");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    run(config, pool).await
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "looks_worker=info,looks_pipeline=info,looks_comfyui=info".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Probe the database and apply migrations when asked. Failures are
/// logged; queue calls keep retrying through the supervisor's cooldown.
async fn prepare_database(pool: &DbPool, run_migrations: bool) -> anyhow::Result<()> {
    looks_db::health_check(pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database reachable");

    if run_migrations {
        looks_db::run_migrations(pool)
            .await
            .context("Failed to run database migrations")?;
        tracing::info!("Database migrations applied");
    }
    Ok(())
}

async fn run(config: WorkerConfig, pool: DbPool) -> ExitCode {
    if let Err(e) = prepare_database(&pool, config.run_migrations).await {
        tracing::warn!(error = ?e, "Database not ready at startup, continuing");
    }

    let store = Arc::new(PgStore::new(pool));
    let storage = Arc::new(SupabaseStorage::connect(&config.storage).await);

    let cancel = CancellationToken::new();
    let backend = Arc::new(ComfyUIBackend::new(
        &config.comfyui_api_base,
        config.worker_id.clone(),
    ));
    let listener = backend.start_progress_listener(cancel.child_token());

    let kinds = KindRegistry::with_defaults();
    let mut kind_names: Vec<&str> = kinds.kinds().collect();
    kind_names.sort_unstable();
    tracing::info!(kinds = ?kind_names, "Job kinds registered");

    let executor = JobExecutor::new(
        store.clone(),
        store.clone(),
        backend.clone(),
        storage,
        kinds,
        ExecutorConfig {
            worker_id: config.worker_id.clone(),
            backend_tag: config.backend_affinity.clone(),
            render_timeout: config.job_timeout,
            render_poll_interval: config.render_poll_interval,
            cost_per_job_usd: config.cost_per_job_usd,
        },
    );
    let scheduler = BatchScheduler::new(
        store.clone(),
        store.clone(),
        executor,
        config.backend_affinity.clone(),
        config.batch_bounds,
    );
    let supervisor = Supervisor::new(
        SupervisorSettings::from_config(&config),
        backend,
        store,
        scheduler,
    );

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received, finishing current batch");
        signal_cancel.cancel();
    });

    let result = supervisor.run(cancel.clone()).await;

    cancel.cancel();
    if let Err(e) = listener.await {
        tracing::warn!(error = %e, "Progress listener ended abnormally");
    }

    if let Err(e) = &result {
        tracing::error!(error = %e, "Worker exiting");
    }
    exit_code(&result)
}

/// Resolve on Ctrl-C or SIGTERM. A handler that cannot be installed never
/// resolves, leaving the other one in charge.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
