use std::process::ExitCode;
use std::sync::Arc;

use abacus_db::store::Stores;
use abacus_db::{FileDefinitions, PgStore};
use abacus_worker::analysis::{DataSourceRegistry, PostgresDataSource};
use abacus_worker::{Pipeline, WorkerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    // --- Configuration ---
    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid worker configuration");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        instance_id = %config.instance_id,
        warehouses = config.warehouses.len(),
        "Loaded worker configuration"
    );

    // --- Database ---
    let pool = match abacus_db::create_pool(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = abacus_db::run_migrations(&pool).await {
        tracing::error!(error = %e, "Failed to run database migrations");
        return ExitCode::FAILURE;
    }
    tracing::info!("Database ready");

    let mut stores = Stores::shared(Arc::new(PgStore::new(pool)));

    // --- Definitions ---
    if let Some(path) = &config.metrics_config_path {
        match FileDefinitions::load(path) {
            Ok(definitions) => {
                tracing::info!(
                    path = %path.display(),
                    metrics = definitions.metric_count(),
                    experiments = definitions.experiment_count(),
                    "Using definitions file"
                );
                stores = stores.with_definitions(Arc::new(definitions));
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to load definitions");
                return ExitCode::FAILURE;
            }
        }
    }

    // --- Data sources ---
    let mut sources = DataSourceRegistry::new();
    for warehouse in &config.warehouses {
        match PostgresDataSource::connect_lazy(&warehouse.url) {
            Ok(source) => {
                sources.register(warehouse.name.clone(), Arc::new(source));
            }
            Err(e) => {
                tracing::error!(warehouse = %warehouse.name, error = %e, "Invalid warehouse URL");
                return ExitCode::FAILURE;
            }
        }
    }

    // --- Scheduler ---
    let pipeline = match Pipeline::build(&config, stores, sources) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build pipeline");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    match pipeline.scheduler.run(cancel).await {
        Ok(()) => {
            tracing::info!("Worker stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Worker stopped after infrastructure failure");
            ExitCode::FAILURE
        }
    }
}

/// `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "abacus_worker=debug,abacus_events=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT (Ctrl-C), shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
