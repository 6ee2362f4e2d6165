//! whdb-worker: procesa jobs de backfill pendientes contra Postgres.
//!
//! Variables: `DATABASE_URL` (obligatoria), las `WHDB_*` de `AppConfig` y
//! `RUST_LOG` para el filtro de logs.
use std::sync::atomic::AtomicBool;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use webhookdb_rust::{build_engine, AppError, Worker, CONFIG};
use whdb_persistence::{build_dev_pool_from_env, pg_stores};

fn run() -> Result<(), AppError> {
    let config = &*CONFIG;
    info!("config {}", serde_json::to_string(config).unwrap_or_default());
    let pool = build_dev_pool_from_env()?;
    let engine = build_engine(pg_stores(pool), config);
    info!("replicators {:?}", engine.context().registry.names());
    let stop = AtomicBool::new(false);
    Worker::new(engine, config.worker_poll).run(&stop);
    Ok(())
}

fn main() {
    // también recoge los registros de `log` de las librerías
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
                             .init();
    if let Err(e) = run() {
        error!("whdb-worker: {e}");
        std::process::exit(1);
    }
}
