//! whdb-persistence
//!
//! Implementaciones Postgres (Diesel) de los stores del motor de
//! replicación: tablas replicadas, integraciones, jobs de backfill y outbox
//! de eventos.
//!
//! Módulos:
//! - `pg`: stores sobre Postgres y utilidades de pool/reintentos.
//! - `migrations`: runner embebido de migraciones Diesel.
//! - `config`: carga de configuración desde .env.
//! - `schema`: tablas Diesel de metadatos.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::{init_dotenv, DbConfig};
pub use error::PersistenceError;
pub use pg::{build_dev_pool_from_env, build_pool, pg_stores, ConnectionProvider, PgBackfillJobStore, PgEventPublisher,
             PgIntegrationStore, PgPool, PgTableStore, PoolProvider};
