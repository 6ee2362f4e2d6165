//! Motor de replicación: contexto, pipelines y fachada.
pub mod builder;
pub mod context;
pub mod core;
pub mod pipeline;

pub use builder::EngineBuilder;
pub use context::{EngineConfig, ReplicationContext};
pub use core::ReplicationEngine;
pub use pipeline::{ensure_table, ensure_table_current, handle_webhook, plan_table, upsert_resource};
