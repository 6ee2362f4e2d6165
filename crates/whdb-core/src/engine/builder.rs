//! Builder para `ReplicationEngine`.
//!
//! Todos los colaboradores tienen un valor por defecto (stores en memoria,
//! registry vacío, `EngineConfig::default()`), así que un engine de prueba
//! sólo necesita registrar sus replicators.
use std::sync::Arc;

use super::{EngineConfig, ReplicationContext, ReplicationEngine};
use crate::replicator::{Replicator, ReplicatorRegistry};
use crate::store::Stores;

#[derive(Default)]
pub struct EngineBuilder {
    stores: Option<Stores>,
    registry: ReplicatorRegistry,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn stores(mut self, stores: Stores) -> Self {
        self.stores = Some(stores);
        self
    }

    pub fn registry(mut self, registry: ReplicatorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn replicator(mut self, replicator: Arc<dyn Replicator>) -> Self {
        self.registry.register(replicator);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn regression_mode(mut self, on: bool) -> Self {
        self.config.regression_mode = on;
        self
    }

    pub fn build(self) -> ReplicationEngine {
        let stores = self.stores.unwrap_or_else(Stores::in_memory);
        ReplicationEngine::new(ReplicationContext::new(stores, self.registry, self.config))
    }
}
