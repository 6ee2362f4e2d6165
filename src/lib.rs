//! webhookdb-rust
//!
//! Paquete de aplicación sobre el motor de replicación:
//! - `config`: `AppConfig` leído del entorno, de donde sale el `EngineConfig`.
//! - `worker`: bucle que reclama jobs de backfill pendientes y los ejecuta de
//!   a uno.
//! - `build_engine`: motor con el registry de adapters de producción.

pub mod config;
pub mod error;
pub mod worker;

use whdb_core::store::Stores;
use whdb_core::{ReplicationEngine, ReplicatorRegistry};

pub use config::{AppConfig, CONFIG};
pub use error::AppError;
pub use worker::{Worker, WorkerReport};

/// Motor con los adapters de producción sobre los stores dados.
pub fn build_engine(stores: Stores, config: &AppConfig) -> ReplicationEngine {
    build_engine_with(stores, whdb_adapters::default_registry(), config)
}

pub fn build_engine_with(stores: Stores, registry: ReplicatorRegistry, config: &AppConfig) -> ReplicationEngine {
    ReplicationEngine::builder().stores(stores)
                                .registry(registry)
                                .config(config.engine_config())
                                .build()
}
