//! Replicators falsos con respuestas guionadas.
//!
//! Cada fake recibe sus páginas/errores por constructor (o `push_*`) y
//! registra las llamadas que recibe. El harness de tests es dueño del ciclo
//! de vida: `reset()` entre casos.
use std::collections::VecDeque;
use std::sync::Mutex;

use serde_json::Value;
use whdb_core::column::{Column, ColumnType, Converter, IndexSpec};
use whdb_core::engine::ReplicationContext;
use whdb_core::errors::{ExternalErrorKind, ReplicatorError, Result};
use whdb_core::model::{IntegrationId, Row, ServiceIntegration};
use whdb_core::replicator::{require_parent_credentials, BackfillErrorAction, BackfillPage, PageRequest, Replicator,
                            ReplicatorDescriptor};
use whdb_core::state_machine::{self, transition_url, StateMachineStep};
use whdb_core::upsert::UpdatePolicy;

/// Respuesta guionada para una llamada a `fetch_backfill_page`.
#[derive(Debug, Clone)]
pub enum Scripted {
    Page(BackfillPage),
    Error(ReplicatorError),
}

/// Llamada recibida en `on_dependency_webhook_upsert`.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyUpsert {
    pub dependent: IntegrationId,
    pub parent: IntegrationId,
    pub row: Row,
    pub changed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackfillFlow {
    /// API key en `backfill_secret`.
    Secret,
    /// `backfill_key` y luego `backfill_secret`.
    KeyAndSecret,
}

pub struct FakeReplicator {
    descriptor: ReplicatorDescriptor,
    remote_key: Column,
    columns: Vec<Column>,
    extra_indices: Vec<IndexSpec>,
    policy: UpdatePolicy,
    requires_sequence: bool,
    enrichment: Option<Value>,
    flow: BackfillFlow,
    verify_on_setup: bool,
    needs_parent_credentials: bool,
    /// Status HTTP que se trata como "sin datos".
    empty_on_status: Option<u16>,
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<PageRequest>>,
    dependency_upserts: Mutex<Vec<DependencyUpsert>>,
}

impl FakeReplicator {
    fn base(descriptor: ReplicatorDescriptor) -> Self {
        Self { descriptor,
               remote_key: Column::new("my_id", ColumnType::Text),
               columns: vec![Column::new("at", ColumnType::Timestamp).converter(Converter::Time)
                                                                     .indexed()],
               extra_indices: Vec::new(),
               policy: UpdatePolicy::ordered_by("at", ColumnType::Timestamp),
               requires_sequence: false,
               enrichment: None,
               flow: BackfillFlow::Secret,
               verify_on_setup: false,
               needs_parent_credentials: false,
               empty_on_status: None,
               script: Mutex::new(VecDeque::new()),
               calls: Mutex::new(Vec::new()),
               dependency_upserts: Mutex::new(Vec::new()) }
    }

    /// `fake_v1`: webhooks y backfill, identidad `my_id`, orden por `at`.
    pub fn fake_v1() -> Self {
        Self::base(ReplicatorDescriptor::new("fake_v1", "Fake", "Fakes"))
    }

    pub fn webhooks_only() -> Self {
        Self::base(ReplicatorDescriptor::new("fake_webhooks_only_v1", "Fake", "Fakes").backfill(false))
    }

    /// Sólo backfill: pide `backfill_key` y `backfill_secret`, y verifica las
    /// credenciales al completar.
    pub fn backfill_only() -> Self {
        let mut f = Self::base(ReplicatorDescriptor::new("fake_backfill_only_v1", "Fake", "Fakes").webhooks(false));
        f.flow = BackfillFlow::KeyAndSecret;
        f.verify_on_setup = true;
        f
    }

    /// Depende de `fake_v1` y usa sus credenciales para el backfill.
    pub fn dependent() -> Self {
        let mut f = Self::base(ReplicatorDescriptor::new("fake_dependent_v1", "Fake Child", "Fake Children")
                                   .depends_on("fake_v1"));
        f.needs_parent_credentials = true;
        f
    }

    pub fn named(mut self, name: &str) -> Self {
        self.descriptor.name = name.to_string();
        self
    }

    pub fn depending_on(mut self, service: &str) -> Self {
        self.descriptor.dependency = Some(service.to_string());
        self
    }

    pub fn with_columns(mut self, columns: Vec<Column>) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_index(mut self, spec: IndexSpec) -> Self {
        self.extra_indices.push(spec);
        self
    }

    pub fn with_update_policy(mut self, policy: UpdatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sequence(mut self) -> Self {
        self.requires_sequence = true;
        self
    }

    pub fn with_enrichment(mut self, body: Value) -> Self {
        self.enrichment = Some(body);
        self
    }

    pub fn treating_status_as_empty(mut self, status: u16) -> Self {
        self.empty_on_status = Some(status);
        self
    }

    pub fn with_script(self, script: Vec<Scripted>) -> Self {
        if let Ok(mut s) = self.script.lock() {
            s.extend(script);
        }
        self
    }

    /// Guion de páginas: cada página lleva el token `"page-<n+1>"` salvo la
    /// última.
    pub fn with_pages(self, pages: Vec<Vec<Value>>) -> Self {
        let total = pages.len();
        let script = pages.into_iter()
                          .enumerate()
                          .map(|(i, items)| {
                              let token = (i + 1 < total).then(|| Value::String(format!("page-{}", i + 2)));
                              Scripted::Page(BackfillPage::new(items, token))
                          })
                          .collect();
        self.with_script(script)
    }

    pub fn push_page(&self, page: BackfillPage) {
        if let Ok(mut s) = self.script.lock() {
            s.push_back(Scripted::Page(page));
        }
    }

    pub fn push_error(&self, err: ReplicatorError) {
        if let Ok(mut s) = self.script.lock() {
            s.push_back(Scripted::Error(err));
        }
    }

    /// Peticiones de página recibidas, en orden.
    pub fn calls(&self) -> Vec<PageRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn dependency_upserts(&self) -> Vec<DependencyUpsert> {
        self.dependency_upserts.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn reset(&self) {
        if let Ok(mut s) = self.script.lock() {
            s.clear();
        }
        if let Ok(mut c) = self.calls.lock() {
            c.clear();
        }
        if let Ok(mut d) = self.dependency_upserts.lock() {
            d.clear();
        }
    }
}

impl Replicator for FakeReplicator {
    fn descriptor(&self) -> &ReplicatorDescriptor {
        &self.descriptor
    }

    fn remote_key_column(&self) -> Column {
        self.remote_key.clone()
    }

    fn denormalized_columns(&self) -> Vec<Column> {
        self.columns.clone()
    }

    fn extra_index_specs(&self) -> Vec<IndexSpec> {
        self.extra_indices.clone()
    }

    fn update_policy(&self) -> UpdatePolicy {
        self.policy.clone()
    }

    fn requires_sequence(&self) -> bool {
        self.requires_sequence
    }

    fn store_enrichment_body(&self) -> bool {
        self.enrichment.is_some()
    }

    fn fetch_enrichment(&self, _ctx: &ReplicationContext, _sint: &ServiceIntegration, _resource: &Value,
                        _event: Option<&Value>)
                        -> Result<Option<Value>> {
        Ok(self.enrichment.clone())
    }

    fn fetch_backfill_page(&self, ctx: &ReplicationContext, sint: &ServiceIntegration, page: &PageRequest)
                           -> Result<BackfillPage> {
        if !self.descriptor.supports_backfill {
            return Err(ReplicatorError::Invariant(format!("{} does not support backfill", self.descriptor.name)));
        }
        if self.needs_parent_credentials {
            require_parent_credentials(ctx, sint)?;
        }
        self.calls
            .lock()
            .map_err(|_| ReplicatorError::storage("fake calls mutex poisoned"))?
            .push(page.clone());
        let next = self.script
                       .lock()
                       .map_err(|_| ReplicatorError::storage("fake script mutex poisoned"))?
                       .pop_front();
        match next {
            Some(Scripted::Page(p)) => Ok(p),
            Some(Scripted::Error(e)) => Err(e),
            None => Ok(BackfillPage::default()),
        }
    }

    fn verify_credentials_on_setup(&self) -> bool {
        self.verify_on_setup
    }

    fn on_backfill_error(&self, err: &ReplicatorError) -> BackfillErrorAction {
        match (err, self.empty_on_status) {
            (ReplicatorError::External(e), Some(status))
                if e.kind == ExternalErrorKind::Status && e.status == Some(status) =>
            {
                BackfillErrorAction::TreatAsEmpty
            }
            _ => BackfillErrorAction::Raise,
        }
    }

    fn calculate_backfill_state_machine(&self, ctx: &ReplicationContext, sint: &ServiceIntegration)
                                        -> Result<StateMachineStep> {
        if !self.descriptor.supports_backfill {
            return self.calculate_webhook_state_machine(ctx, sint);
        }
        if self.flow == BackfillFlow::Secret {
            return state_machine::default_backfill_state_machine(ctx, self, sint);
        }
        if let Some(step) = state_machine::dependency_step(ctx, self, sint)? {
            return Ok(step);
        }
        if sint.backfill_key().is_none() {
            return Ok(StateMachineStep::prompting("Paste or type your API key here:",
                                                  transition_url(ctx, sint, "backfill_key"))
                      .output("To backfill Fakes, we need your API key and secret."));
        }
        if sint.backfill_secret().is_none() {
            return Ok(StateMachineStep::prompting("Paste or type your API secret here:",
                                                  transition_url(ctx, sint, "backfill_secret")).secret());
        }
        Ok(StateMachineStep::completed().output(format!("Great! We are going to start backfilling your Fakes into \
                                                         {}.",
                                                        sint.table_name)))
    }

    fn validate_state_change(&self, field: &str, value: &str) -> Result<()> {
        if matches!(field, "backfill_key" | "backfill_secret") && value.chars().any(char::is_whitespace) {
            return Err(ReplicatorError::InvalidInput(format!("{field} cannot contain spaces")));
        }
        Ok(())
    }

    fn on_dependency_webhook_upsert(&self, _ctx: &ReplicationContext, sint: &ServiceIntegration,
                                    parent: &ServiceIntegration, row: &Row, changed: bool)
                                    -> Result<()> {
        self.dependency_upserts
            .lock()
            .map_err(|_| ReplicatorError::storage("fake dependency mutex poisoned"))?
            .push(DependencyUpsert { dependent: sint.id,
                                     parent: parent.id,
                                     row: row.clone(),
                                     changed });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pages_are_tokenized_in_order() {
        let f = FakeReplicator::fake_v1().with_pages(vec![vec![json!({"my_id": "a"})], vec![json!({"my_id": "b"})]]);
        let script = f.script.lock().unwrap();
        match (&script[0], &script[1]) {
            (Scripted::Page(a), Scripted::Page(b)) => {
                assert_eq!(a.next_page_token, Some(json!("page-2")));
                assert!(b.is_last());
            }
            other => panic!("guion inesperado: {other:?}"),
        }
    }

    #[test]
    fn descriptors() {
        assert!(!FakeReplicator::webhooks_only().descriptor().supports_backfill);
        assert!(!FakeReplicator::backfill_only().descriptor().supports_webhooks);
        assert_eq!(FakeReplicator::dependent().descriptor().dependency.as_deref(), Some("fake_v1"));
    }

    #[test]
    fn reset_clears_script_and_calls() {
        let f = FakeReplicator::fake_v1().with_pages(vec![vec![]]);
        f.reset();
        assert!(f.script.lock().unwrap().is_empty());
        assert!(f.calls().is_empty());
    }
}
