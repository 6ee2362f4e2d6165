//! Implementaciones Postgres (Diesel) de los stores del motor.
//!
//! - Paridad con los stores en memoria: mismo contrato, misma decisión de
//!   escritura (`UpdatePolicy::decide`) evaluada dentro de la transacción.
//! - Las tablas replicadas se manejan con SQL dinámico (`sql_query`); las de
//!   metadatos con el DSL de Diesel.
//! - Los errores transitorios (serialización, pool, desconexiones) se
//!   reintentan con un backoff corto.

mod events;
mod integrations;
mod jobs;
mod tables;

use std::sync::Arc;

use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use log::warn;
use whdb_core::store::Stores;

pub use events::PgEventPublisher;
pub use integrations::PgIntegrationStore;
pub use jobs::PgBackfillJobStore;
pub use tables::PgTableStore;

use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;

/// Pool r2d2 de conexiones Postgres.
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;
pub type PgPooledConnection = r2d2::PooledConnection<ConnectionManager<PgConnection>>;

/// Proveedor abstracto de conexiones.
///
/// Permite inyectar el pool real o uno de pruebas sin acoplar los stores a
/// r2d2.
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<PgPooledConnection, PersistenceError>;
}

/// `ConnectionProvider` respaldado por un `PgPool`.
#[derive(Clone)]
pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<PgPooledConnection, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

/// Errores que vale la pena repetir.
pub(crate) fn is_retryable(e: &PersistenceError) -> bool {
    match e {
        PersistenceError::SerializationConflict => true,
        PersistenceError::TransientIo(_) => true,
        // Algunos drivers sólo dan texto; best-effort sin acoplar a SQLSTATE.
        PersistenceError::Unknown(msg) => {
            let m = msg.to_lowercase();
            m.contains("deadlock detected")
            || m.contains("could not serialize access due to concurrent update")
            || m.contains("terminating connection due to administrator command")
            || m.contains("connection closed")
            || m.contains("connection refused")
            || m.contains("timeout")
        }
        _ => false,
    }
}

/// Hasta 3 reintentos con backoff de 15ms, 30ms, 45ms.
pub(crate) fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if is_retryable(&e) && attempts < 3 => {
                let delay_ms = 15 * ((attempts + 1) as u64);
                warn!("retryable error (attempt {}): {:?} -> sleeping {}ms",
                      attempts + 1,
                      e,
                      delay_ms);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

/// Construye un pool Postgres y corre las migraciones pendientes.
///
/// Si `min_size > max_size` se usa `min = max`.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let validated_min = min_size.max(1);
    let validated_max = max_size.max(1);
    if validated_min > validated_max {
        warn!("build_pool: min_size > max_size ({validated_min} > {validated_max}), ajustando min=max");
    }
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().min_idle(Some(validated_min.min(validated_max)))
                                    .max_size(validated_max)
                                    .build(manager)
                                    .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get()
                           .map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

/// Carga `.env`, lee `DbConfig` y construye un pool ya migrado.
pub fn build_dev_pool_from_env() -> Result<PgPool, PersistenceError> {
    crate::config::init_dotenv();
    let cfg = crate::config::DbConfig::from_env()?;
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}

/// Stores del motor respaldados por el mismo pool.
pub fn pg_stores(pool: PgPool) -> Stores {
    let provider = PoolProvider { pool };
    Stores { tables: Arc::new(PgTableStore::new(provider.clone())),
             integrations: Arc::new(PgIntegrationStore::new(provider.clone())),
             jobs: Arc::new(PgBackfillJobStore::new(provider.clone())),
             events: Arc::new(PgEventPublisher::new(provider)) }
}
