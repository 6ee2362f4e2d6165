//! Contrato de replicator: el punto de extensión por servicio externo.
//!
//! Cada adapter implementa `Replicator` una vez; el motor (upsert, schema,
//! backfill, state machines) es genérico sobre `dyn Replicator`. Los tests
//! sustituyen adapters reales por fakes que reciben sus respuestas por
//! constructor.
mod dependency;
mod registry;
mod webhook;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

pub use dependency::{dependency_candidates, find_dependent, find_dependent_required, require_dependency,
                     require_parent_credentials, set_dependency, would_create_cycle};
pub use registry::ReplicatorRegistry;
pub use webhook::{check_secret_header, secure_compare, WebhookRequest, WebhookResponse, DEFAULT_SECRET_HEADER};

use crate::column::{Column, IndexSpec};
use crate::engine::ReplicationContext;
use crate::errors::{ReplicatorError, Result};
use crate::model::{Row, ServiceIntegration};
use crate::schema::TableDefinition;
use crate::state_machine::{self, StateMachineStep};
use crate::upsert::UpdatePolicy;

/// Metadatos estáticos de un replicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicatorDescriptor {
    /// Nombre del servicio (`fake_v1`, `github_issue_v1`...).
    pub name: String,
    pub resource_name_singular: String,
    pub resource_name_plural: String,
    /// Servicio del que depende (integración padre), si lo hay.
    pub dependency: Option<String>,
    pub supports_webhooks: bool,
    pub supports_backfill: bool,
}

impl ReplicatorDescriptor {
    pub fn new(name: impl Into<String>, singular: impl Into<String>, plural: impl Into<String>) -> Self {
        Self { name: name.into(),
               resource_name_singular: singular.into(),
               resource_name_plural: plural.into(),
               dependency: None,
               supports_webhooks: true,
               supports_backfill: true }
    }

    pub fn depends_on(mut self, service: impl Into<String>) -> Self {
        self.dependency = Some(service.into());
        self
    }

    pub fn webhooks(mut self, supported: bool) -> Self {
        self.supports_webhooks = supported;
        self
    }

    pub fn backfill(mut self, supported: bool) -> Self {
        self.supports_backfill = supported;
        self
    }
}

/// Página pedida al adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    /// `None` en la primera página. Formato opaco para el driver.
    pub token: Option<Value>,
    /// Cursor para backfills incrementales.
    pub last_backfilled_at: Option<DateTime<Utc>>,
    pub criteria: Value,
}

impl PageRequest {
    pub fn first() -> Self {
        Self { token: None,
               last_backfilled_at: None,
               criteria: Value::Object(Map::new()) }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BackfillPage {
    pub items: Vec<Value>,
    pub next_page_token: Option<Value>,
}

impl BackfillPage {
    pub fn new(items: Vec<Value>, next_page_token: Option<Value>) -> Self {
        Self { items, next_page_token }
    }

    pub fn last(items: Vec<Value>) -> Self {
        Self::new(items, None)
    }

    /// Token nulo, string vacío o colección vacía terminan la paginación.
    pub fn is_last(&self) -> bool {
        match &self.next_page_token {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(Value::Array(a)) => a.is_empty(),
            Some(Value::Object(o)) => o.is_empty(),
            Some(_) => false,
        }
    }
}

/// Decisión ante un error del proveedor durante el backfill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillErrorAction {
    Raise,
    /// Error "esperado" (p.ej. plan restringido): se trata como página vacía.
    TreatAsEmpty,
}

pub trait Replicator: Send + Sync {
    fn descriptor(&self) -> &ReplicatorDescriptor;

    /// Columna de identidad remota (clave de conflicto).
    fn remote_key_column(&self) -> Column;

    fn denormalized_columns(&self) -> Vec<Column>;

    fn extra_index_specs(&self) -> Vec<IndexSpec> {
        Vec::new()
    }

    fn update_policy(&self) -> UpdatePolicy {
        UpdatePolicy::default()
    }

    fn requires_sequence(&self) -> bool {
        false
    }

    fn store_enrichment_body(&self) -> bool {
        false
    }

    // Webhooks

    /// Valida firma/secreto. Cualquier status no 2xx corta el pipeline.
    fn webhook_response(&self, sint: &ServiceIntegration, request: &WebhookRequest) -> WebhookResponse {
        check_secret_header(sint, request, DEFAULT_SECRET_HEADER)
    }

    /// Separa el cuerpo en recurso y evento. `None` ignora la petición.
    fn resource_and_event(&self, request: &WebhookRequest) -> Result<Option<(Value, Option<Value>)>> {
        match request.json_body()? {
            Value::Object(o) => Ok(Some((Value::Object(o), None))),
            _ => Err(ReplicatorError::InvalidPayload("webhook body must be a JSON object".into())),
        }
    }

    fn fetch_enrichment(&self, _ctx: &ReplicationContext, _sint: &ServiceIntegration, _resource: &Value,
                        _event: Option<&Value>)
                        -> Result<Option<Value>> {
        Ok(None)
    }

    /// Payload que se guarda en `data`.
    fn resource_to_data(&self, resource: &Value, _event: Option<&Value>, _enrichment: Option<&Value>) -> Value {
        resource.clone()
    }

    // Backfill

    fn fetch_backfill_page(&self, _ctx: &ReplicationContext, _sint: &ServiceIntegration, _page: &PageRequest)
                           -> Result<BackfillPage> {
        Err(ReplicatorError::Invariant(format!("{} does not support backfill", self.descriptor().name)))
    }

    fn backfill_item_to_resource(&self, item: Value) -> Result<Value> {
        Ok(item)
    }

    /// Si es `true`, completar la configuración de backfill verifica las
    /// credenciales pidiendo una página.
    fn verify_credentials_on_setup(&self) -> bool {
        false
    }

    fn on_backfill_error(&self, _err: &ReplicatorError) -> BackfillErrorAction {
        BackfillErrorAction::Raise
    }

    /// Mensaje para el usuario cuando la verificación de credenciales falla.
    fn verify_backfill_error_message(&self, err: &ReplicatorError) -> String {
        if err.is_auth_failure() {
            format!("Something is wrong with your {} credentials: the API rejected them. Please re-check them and try \
                     again.",
                    self.descriptor().name)
        } else {
            format!("We could not reach the {} API to verify your credentials. Please try again later.",
                    self.descriptor().name)
        }
    }

    // State machines

    fn calculate_webhook_state_machine(&self, ctx: &ReplicationContext, sint: &ServiceIntegration)
                                       -> Result<StateMachineStep> {
        let d = self.descriptor();
        match (d.supports_webhooks, d.supports_backfill) {
            (true, _) => state_machine::default_webhook_state_machine(ctx, self, sint),
            (false, true) => self.calculate_backfill_state_machine(ctx, sint),
            (false, false) => Err(ReplicatorError::Precondition(format!("{} supports neither webhooks nor backfill",
                                                                        d.name))),
        }
    }

    fn calculate_backfill_state_machine(&self, ctx: &ReplicationContext, sint: &ServiceIntegration)
                                        -> Result<StateMachineStep> {
        let d = self.descriptor();
        match (d.supports_backfill, d.supports_webhooks) {
            (true, _) => state_machine::default_backfill_state_machine(ctx, self, sint),
            (false, true) => self.calculate_webhook_state_machine(ctx, sint),
            (false, false) => Err(ReplicatorError::Precondition(format!("{} supports neither webhooks nor backfill",
                                                                        d.name))),
        }
    }

    /// Rechaza valores mal formados con `InvalidInput`.
    fn validate_state_change(&self, _field: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    /// Se invoca en cada integración dependiente cuando el padre hace un
    /// upsert que cambió datos.
    fn on_dependency_webhook_upsert(&self, _ctx: &ReplicationContext, _sint: &ServiceIntegration,
                                    _parent: &ServiceIntegration, _row: &Row, _changed: bool)
                                    -> Result<()> {
        Ok(())
    }
}

/// Definición de tabla que el planificador necesita para una integración.
pub fn table_definition(replicator: &dyn Replicator, sint: &ServiceIntegration, schema: &str) -> TableDefinition {
    TableDefinition { table: sint.table(schema),
                      opaque_id: sint.opaque_id.clone(),
                      service_name: sint.service_name.clone(),
                      remote_key: replicator.remote_key_column(),
                      columns: replicator.denormalized_columns(),
                      extra_indices: replicator.extra_index_specs(),
                      store_enrichment: replicator.store_enrichment_body(),
                      requires_sequence: replicator.requires_sequence() }
}
