use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::backfill::RetryPolicy;
use crate::replicator::ReplicatorRegistry;
use crate::store::Stores;

/// Configuración del motor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Schema donde viven las tablas replicadas.
    pub schema: String,
    /// Si está activo, cada backfill pide exactamente una página.
    pub regression_mode: bool,
    pub retry: RetryPolicy,
    /// Prefijo de la API para construir `post_to_url`.
    pub api_path_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { schema: "public".into(),
               regression_mode: false,
               retry: RetryPolicy::default(),
               api_path_prefix: "/v1".into() }
    }
}

/// Lo que cualquier operación del motor necesita: stores, registry y
/// configuración. Se pasa por referencia a los hooks de los replicators.
#[derive(Clone)]
pub struct ReplicationContext {
    pub stores: Stores,
    pub registry: Arc<ReplicatorRegistry>,
    pub config: EngineConfig,
    /// Huellas de definiciones ya verificadas contra la base, para que el
    /// camino de webhooks no introspeccione en cada request.
    pub(crate) verified_schemas: Arc<Mutex<HashSet<String>>>,
}

impl ReplicationContext {
    pub fn new(stores: Stores, registry: ReplicatorRegistry, config: EngineConfig) -> Self {
        Self { stores,
               registry: Arc::new(registry),
               config,
               verified_schemas: Arc::default() }
    }
}
