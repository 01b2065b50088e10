use std::time::Duration;

use anyhow::{bail, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use tracing::{info, warn};

use flowwarden_common::Settings;

const DEFAULT_PORT: u16 = 5432;
const MAX_CONNECTIONS: u32 = 10;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect to the first reachable host of the storage cluster.
pub async fn connect_storage(settings: &Settings) -> Result<PgPool> {
    for host in &settings.storage_hosts {
        let (name, port) = split_host(host);
        let mut options = PgConnectOptions::new()
            .host(name)
            .port(port)
            .database(&settings.storage_database)
            .username(&settings.storage_user);
        if let Some(password) = &settings.storage_password {
            options = options.password(password);
        }

        match PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await
        {
            Ok(pool) => {
                info!(host = host.as_str(), "Connected to storage cluster");
                return Ok(pool);
            }
            Err(e) => {
                warn!(host = host.as_str(), error = %e, "Storage host unreachable, trying next");
            }
        }
    }

    bail!(
        "none of the storage hosts are reachable: {}",
        settings.storage_hosts.join(", ")
    )
}

fn split_host(host: &str) -> (&str, u16) {
    match host.rsplit_once(':') {
        Some((name, port)) => match port.parse() {
            Ok(port) => (name, port),
            Err(_) => (host, DEFAULT_PORT),
        },
        None => (host, DEFAULT_PORT),
    }
}
