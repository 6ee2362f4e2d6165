use std::sync::Arc;

use indexmap::IndexMap;

use super::Replicator;
use crate::errors::{ReplicatorError, Result};
use crate::model::ServiceIntegration;

/// Mapa `service_name -> replicator`.
#[derive(Clone, Default)]
pub struct ReplicatorRegistry {
    inner: IndexMap<String, Arc<dyn Replicator>>,
}

impl ReplicatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra (o reemplaza) un replicator bajo su nombre de servicio.
    pub fn register(&mut self, replicator: Arc<dyn Replicator>) -> &mut Self {
        let name = replicator.descriptor().name.clone();
        self.inner.insert(name, replicator);
        self
    }

    pub fn with(mut self, replicator: Arc<dyn Replicator>) -> Self {
        self.register(replicator);
        self
    }

    pub fn get(&self, service_name: &str) -> Result<Arc<dyn Replicator>> {
        self.inner
            .get(service_name)
            .cloned()
            .ok_or_else(|| ReplicatorError::UnknownService(service_name.to_string()))
    }

    pub fn for_integration(&self, sint: &ServiceIntegration) -> Result<Arc<dyn Replicator>> {
        self.get(&sint.service_name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.inner.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
