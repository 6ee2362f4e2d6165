//! Contratos de almacenamiento del motor.
//!
//! Todas las operaciones toman `&self` y son `Send + Sync`: un mismo store
//! se comparte entre el handler de webhooks y los workers de backfill. La
//! implementación en memoria vive en `memory`; la de Postgres en el crate de
//! persistencia.
mod memory;

use std::sync::Arc;

use uuid::Uuid;

pub use memory::{InMemoryBackfillJobStore, InMemoryIntegrationStore, InMemoryStores, InMemoryTableStore};

use crate::backfill::BackfillJob;
use crate::errors::{ReplicatorError, Result};
use crate::event::EventPublisher;
use crate::model::{IntegrationId, NewServiceIntegration, OrganizationId, Row, ServiceIntegration, TableRef};
use crate::schema::{SchemaModification, TableState};
use crate::upsert::{UpsertOutcome, UpsertRequest};

/// Tablas replicadas: introspección, DDL y upsert.
pub trait TableStore: Send + Sync {
    /// Estado actual de la tabla y (si se pide) de la secuencia.
    fn introspect(&self, table: &TableRef, sequence: Option<&str>) -> Result<TableState>;
    /// Ejecuta los tres grupos de la modificación, en orden.
    fn apply(&self, modification: &SchemaModification) -> Result<()>;
    /// Inserta o actualiza según `request.policy`, de forma atómica por clave.
    fn upsert(&self, request: &UpsertRequest) -> Result<UpsertOutcome>;
    /// `true` mientras un cambio de esquema incompatible tiene la tabla.
    fn is_migrating(&self, table: &TableRef) -> Result<bool>;
    fn drop_table(&self, table: &TableRef) -> Result<()>;
    /// Filas ordenadas por `pk`.
    fn rows(&self, table: &TableRef) -> Result<Vec<Row>>;
}

pub trait IntegrationStore: Send + Sync {
    /// Crea la integración asignando id, opaque id y nombre de tabla.
    fn create(&self, new: &NewServiceIntegration) -> Result<ServiceIntegration>;
    fn find(&self, id: IntegrationId) -> Result<Option<ServiceIntegration>>;
    fn find_by_opaque_id(&self, opaque_id: &str) -> Result<Option<ServiceIntegration>>;
    fn save(&self, sint: &ServiceIntegration) -> Result<()>;
    fn delete(&self, id: IntegrationId) -> Result<()>;
    fn list_for_organization(&self, org: OrganizationId) -> Result<Vec<ServiceIntegration>>;
    /// Hijos directos (`depends_on == id`), ordenados por id.
    fn dependents_of(&self, id: IntegrationId) -> Result<Vec<ServiceIntegration>>;

    fn get(&self, id: IntegrationId) -> Result<ServiceIntegration> {
        self.find(id)?
            .ok_or_else(|| ReplicatorError::NotFound(format!("service integration {id}")))
    }
}

pub trait BackfillJobStore: Send + Sync {
    fn create(&self, job: &BackfillJob) -> Result<()>;
    fn find(&self, id: Uuid) -> Result<Option<BackfillJob>>;
    fn save(&self, job: &BackfillJob) -> Result<()>;
    fn children_of(&self, parent_id: Uuid) -> Result<Vec<BackfillJob>>;
    /// Toma el job pendiente más antiguo y lo marca `Fetching`.
    fn claim_next_pending(&self) -> Result<Option<BackfillJob>>;

    fn get(&self, id: Uuid) -> Result<BackfillJob> {
        self.find(id)?
            .ok_or_else(|| ReplicatorError::NotFound(format!("backfill job {id}")))
    }
}

/// Conjunto de colaboradores de almacenamiento que usa el motor.
#[derive(Clone)]
pub struct Stores {
    pub tables: Arc<dyn TableStore>,
    pub integrations: Arc<dyn IntegrationStore>,
    pub jobs: Arc<dyn BackfillJobStore>,
    pub events: Arc<dyn EventPublisher>,
}

impl Stores {
    pub fn in_memory() -> Self {
        InMemoryStores::new().stores()
    }
}
