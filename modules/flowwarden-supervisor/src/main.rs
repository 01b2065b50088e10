use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use flowwarden_common::Settings;
use flowwarden_events::{connect_storage, EventStore};
use flowwarden_supervisor::{
    config_manager::PgConfigManager, features::FeatureServiceProvider,
    listener::PgChangeListener, schema, sources::InboxSourceProvider, FileCheckpointStore,
    Supervisor, SupervisorDeps,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load config first so logging can follow it
    let settings = Arc::new(Settings::from_env()?);

    init_logging(&settings)?;

    info!("Flowwarden supervisor starting...");
    settings.log_redacted();

    // Connect to storage, first reachable host wins
    let pool = connect_storage(&settings).await?;

    // Run migrations (idempotent)
    let store = EventStore::new(pool.clone());
    store.migrate().await?;
    schema::migrate(&pool).await?;

    let deps = SupervisorDeps::builder()
        .checkpoint_store(Arc::new(FileCheckpointStore::new()))
        .config_manager(Arc::new(PgConfigManager::new(pool.clone())))
        .source_provider(Arc::new(InboxSourceProvider::new(pool.clone())))
        .transform_provider(Arc::new(FeatureServiceProvider::from_settings(&settings)?))
        .sink(Arc::new(store))
        .listener(Arc::new(PgChangeListener::from_settings(&settings)))
        .build();

    let mut supervisor = Supervisor::new(settings.clone(), deps);

    tokio::select! {
        res = supervisor.run() => match res {
            Ok(never) => match never {},
            Err(e) => {
                error!(error = %e, "Supervisor stopped");
                return Err(e.into());
            }
        },
        _ = shutdown_signal() => {
            info!("Shutdown signal received, exiting");
        }
    }

    Ok(())
}

fn init_logging(settings: &Settings) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("flowwarden=info".parse()?);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    // Structured output when shipping to a telemetry backend
    if settings.telemetry_key.is_some() {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
