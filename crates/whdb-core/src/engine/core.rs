//! Fachada del motor de replicación.
//!
//! `ReplicationEngine` resuelve ids/opaque ids a integraciones y delega en
//! los módulos de schema, upsert, backfill y state machine. Las capas
//! externas (API, CLI, worker) sólo hablan con esta fachada.
use log::info;
use serde_json::Value;
use uuid::Uuid;

use super::builder::EngineBuilder;
use super::pipeline;
use super::ReplicationContext;
use crate::backfill::{self, BackfillJob, BackfillRequest, CredentialVerification};
use crate::errors::{ReplicatorError, Result};
use crate::model::{IntegrationId, NewServiceIntegration, ServiceIntegration};
use crate::replicator::{self, WebhookRequest, WebhookResponse};
use crate::schema::SchemaModification;
use crate::state_machine::{self, StateMachineStep};
use crate::upsert::UpsertOutcome;

pub struct ReplicationEngine {
    ctx: ReplicationContext,
}

impl ReplicationEngine {
    pub fn new(ctx: ReplicationContext) -> Self {
        Self { ctx }
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn context(&self) -> &ReplicationContext {
        &self.ctx
    }

    pub fn integration(&self, id: IntegrationId) -> Result<ServiceIntegration> {
        self.ctx.stores.integrations.get(id)
    }

    /// Crea la integración (validando servicio y dependencia) y su tabla.
    pub fn create_integration(&self, new: NewServiceIntegration) -> Result<ServiceIntegration> {
        let replicator = self.ctx.registry.get(&new.service_name)?;
        if let Some(parent_id) = new.depends_on {
            let parent = self.ctx.stores.integrations.get(parent_id)?;
            let expected = replicator.descriptor().dependency.as_deref();
            if expected != Some(parent.service_name.as_str()) {
                return Err(ReplicatorError::Precondition(format!("{} cannot depend on a {} integration",
                                                                 new.service_name, parent.service_name)));
            }
            if parent.organization_id != new.organization_id {
                return Err(ReplicatorError::Precondition("dependency belongs to another organization".into()));
            }
        }
        let sint = self.ctx.stores.integrations.create(&new)?;
        pipeline::ensure_table(&self.ctx, replicator.as_ref(), &sint)?;
        info!("create_integration sint={} service={} table={}",
              sint.opaque_id, sint.service_name, sint.table_name);
        Ok(sint)
    }

    /// Elimina la integración y su tabla. Falla si otras dependen de ella.
    pub fn destroy_integration(&self, id: IntegrationId) -> Result<()> {
        let sint = self.integration(id)?;
        let dependents = self.ctx.stores.integrations.dependents_of(id)?;
        if !dependents.is_empty() {
            return Err(ReplicatorError::Precondition(format!("{} still has {} dependent integrations",
                                                             sint.opaque_id,
                                                             dependents.len())));
        }
        self.ctx.stores.tables.drop_table(&sint.table(&self.ctx.config.schema))?;
        self.ctx.stores.integrations.delete(id)?;
        info!("destroy_integration sint={}", sint.opaque_id);
        Ok(())
    }

    pub fn ensure_all_columns(&self, id: IntegrationId) -> Result<SchemaModification> {
        let sint = self.integration(id)?;
        let replicator = self.ctx.registry.for_integration(&sint)?;
        pipeline::ensure_table(&self.ctx, replicator.as_ref(), &sint)
    }

    /// Modificación pendiente, sin aplicarla.
    pub fn plan_all_columns(&self, id: IntegrationId) -> Result<SchemaModification> {
        let sint = self.integration(id)?;
        let replicator = self.ctx.registry.for_integration(&sint)?;
        pipeline::plan_table(&self.ctx, replicator.as_ref(), &sint)
    }

    /// Webhook dirigido a la integración con ese opaque id.
    pub fn handle_webhook(&self, opaque_id: &str, request: &WebhookRequest) -> Result<WebhookResponse> {
        match self.ctx.stores.integrations.find_by_opaque_id(opaque_id)? {
            Some(sint) => pipeline::handle_webhook(&self.ctx, &sint, request),
            None => Ok(WebhookResponse::error(404, "no such integration")),
        }
    }

    pub fn upsert_resource(&self, id: IntegrationId, resource: &Value) -> Result<UpsertOutcome> {
        let sint = self.integration(id)?;
        let replicator = self.ctx.registry.for_integration(&sint)?;
        pipeline::upsert_resource(&self.ctx, replicator.as_ref(), &sint, resource, None)
    }

    pub fn calculate_webhook_state_machine(&self, id: IntegrationId) -> Result<StateMachineStep> {
        let sint = self.integration(id)?;
        self.ctx
            .registry
            .for_integration(&sint)?
            .calculate_webhook_state_machine(&self.ctx, &sint)
    }

    pub fn calculate_backfill_state_machine(&self, id: IntegrationId) -> Result<StateMachineStep> {
        let sint = self.integration(id)?;
        self.ctx
            .registry
            .for_integration(&sint)?
            .calculate_backfill_state_machine(&self.ctx, &sint)
    }

    pub fn calculate_preferred_create_state_machine(&self, id: IntegrationId) -> Result<StateMachineStep> {
        let sint = self.integration(id)?;
        state_machine::calculate_preferred_create_state_machine(&self.ctx, &sint)
    }

    pub fn process_state_change(&self, id: IntegrationId, field: &str, value: &str) -> Result<StateMachineStep> {
        let mut sint = self.integration(id)?;
        state_machine::process_state_change(&self.ctx, &mut sint, field, value)
    }

    pub fn clear_backfill_information(&self, id: IntegrationId) -> Result<()> {
        let mut sint = self.integration(id)?;
        state_machine::clear_backfill_information(&self.ctx, &mut sint)
    }

    pub fn set_dependency(&self, child: IntegrationId, parent: IntegrationId) -> Result<ServiceIntegration> {
        let mut sint = self.integration(child)?;
        let parent = self.integration(parent)?;
        replicator::set_dependency(&self.ctx, &mut sint, &parent)?;
        Ok(sint)
    }

    pub fn enqueue_backfill(&self, id: IntegrationId, request: BackfillRequest) -> Result<BackfillJob> {
        let sint = self.integration(id)?;
        backfill::enqueue_backfill(&self.ctx, &sint, request)
    }

    pub fn run_backfill_job(&self, job_id: Uuid, enqueue: bool) -> Result<BackfillJob> {
        backfill::run_backfill_job(&self.ctx, job_id, enqueue)
    }

    /// Encola y ejecuta en el mismo hilo (sin evento `backfilljob.run` para
    /// el job raíz).
    pub fn backfill_now(&self, id: IntegrationId, request: BackfillRequest) -> Result<BackfillJob> {
        let enqueue_children = request.enqueue;
        let job = self.enqueue_backfill(id, request.enqueue(false))?;
        self.run_backfill_job(job.id, enqueue_children)
    }

    pub fn verify_backfill_credentials(&self, id: IntegrationId) -> Result<CredentialVerification> {
        let sint = self.integration(id)?;
        backfill::verify_backfill_credentials(&self.ctx, &sint)
    }

    pub fn find_dependent(&self, id: IntegrationId, service_name: &str) -> Result<Option<ServiceIntegration>> {
        let sint = self.integration(id)?;
        replicator::find_dependent(&self.ctx, &sint, service_name)
    }

    pub fn find_dependent_required(&self, id: IntegrationId, service_name: &str) -> Result<ServiceIntegration> {
        let sint = self.integration(id)?;
        replicator::find_dependent_required(&self.ctx, &sint, service_name)
    }
}
