//! Implementaciones en memoria de los stores.
//!
//! Útiles para tests y para ejecutar el motor sin base de datos. El DDL se
//! aplica estructuralmente: las sentencias crudas (`RawStatement`) y las
//! `backfill_expr` no se evalúan.
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use indexmap::IndexMap;
use log::debug;
use serde_json::Value;
use uuid::Uuid;

use super::{BackfillJobStore, IntegrationStore, Stores, TableStore};
use crate::backfill::{BackfillJob, BackfillStatus};
use crate::constants::{DATA_COLUMN, ENRICHMENT_COLUMN, PK_COLUMN};
use crate::errors::{ReplicatorError, Result};
use crate::event::InMemoryEventPublisher;
use crate::model::{new_opaque_id, IntegrationId, NewServiceIntegration, OrganizationId, Row, ServiceIntegration,
                   TableRef};
use crate::schema::{chunk_contains, SchemaChange, SchemaModification, TableState};
use crate::upsert::{UpsertOutcome, UpsertRequest, WriteDecision};

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    m.lock().map_err(|_| ReplicatorError::storage("in-memory store mutex poisoned"))
}

#[derive(Debug, Default, Clone)]
struct MemTable {
    columns: Vec<String>,
    indices: Vec<String>,
    rows: Vec<Row>,
    next_pk: i64,
}

impl MemTable {
    /// Proyecta una fila a las columnas de la tabla; las ausentes quedan en
    /// null. Una clave sin columna es un error, como en Postgres.
    fn project(&self, table: &TableRef, row: &Row, pk: i64) -> Result<Row> {
        if let Some(unknown) = row.keys().find(|k| !self.columns.contains(k)) {
            return Err(ReplicatorError::storage(format!("column \"{unknown}\" of relation {table} does not exist")));
        }
        Ok(self.columns
               .iter()
               .map(|c| {
                   let v = if c == PK_COLUMN {
                       Value::from(pk)
                   } else {
                       row.get(c).cloned().unwrap_or(Value::Null)
                   };
                   (c.clone(), v)
               })
               .collect())
    }
}

#[derive(Default)]
pub struct InMemoryTableStore {
    tables: Mutex<HashMap<TableRef, MemTable>>,
    sequences: Mutex<HashSet<(String, String)>>,
    migrating: Mutex<HashSet<TableRef>>,
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marca/desmarca la tabla como en migración (simula el lock de DDL).
    pub fn set_migrating(&self, table: &TableRef, migrating: bool) -> Result<()> {
        let mut m = lock(&self.migrating)?;
        if migrating {
            m.insert(table.clone());
        } else {
            m.remove(table);
        }
        Ok(())
    }

    fn apply_change(&self, tables: &mut HashMap<TableRef, MemTable>, change: &SchemaChange) -> Result<()> {
        match change {
            SchemaChange::CreateTable { table,
                                        remote_key,
                                        columns,
                                        enrichment, } => {
                tables.entry(table.clone()).or_insert_with(|| {
                                               let mut cols = vec![PK_COLUMN.to_string(), remote_key.name.clone()];
                                               cols.extend(columns.iter().map(|c| c.name.clone()));
                                               cols.push(DATA_COLUMN.to_string());
                                               if *enrichment {
                                                   cols.push(ENRICHMENT_COLUMN.to_string());
                                               }
                                               MemTable { columns: cols,
                                                          ..MemTable::default() }
                                           });
            }
            SchemaChange::AddColumn { table, column } => {
                let t = tables.get_mut(table)
                              .ok_or_else(|| ReplicatorError::storage(format!("relation {table} does not exist")))?;
                if !t.columns.contains(&column.name) {
                    t.columns.push(column.name.clone());
                    for row in t.rows.iter_mut() {
                        row.insert(column.name.clone(), Value::Null);
                    }
                }
            }
            SchemaChange::RawStatement(sql) => {
                debug!("memory_apply:raw_statement_ignored len={}", sql.len());
            }
            SchemaChange::BackfillColumns { table, columns, chunk } => {
                let t = tables.get_mut(table)
                              .ok_or_else(|| ReplicatorError::storage(format!("relation {table} does not exist")))?;
                for row in t.rows.iter_mut() {
                    let pk = row.get(PK_COLUMN).and_then(Value::as_i64).unwrap_or(0);
                    if !chunk_contains(chunk, pk) {
                        continue;
                    }
                    let data = row.get(DATA_COLUMN).cloned().unwrap_or(Value::Null);
                    let enrichment = row.get(ENRICHMENT_COLUMN).cloned().filter(|v| !v.is_null());
                    for col in columns.iter().filter(|c| c.backfill_expr.is_none()) {
                        // ->> sobre una clave ausente da NULL, no error
                        let mut lenient = col.clone();
                        lenient.optional = true;
                        let v = lenient.extract(&data, enrichment.as_ref())
                                       .map_err(|e| ReplicatorError::storage(e.to_string()))?;
                        row.insert(col.name.clone(), v);
                    }
                }
            }
            SchemaChange::CreateIndex { table, index, .. } => {
                let t = tables.get_mut(table)
                              .ok_or_else(|| ReplicatorError::storage(format!("relation {table} does not exist")))?;
                if !t.indices.contains(&index.name) {
                    t.indices.push(index.name.clone());
                }
            }
            SchemaChange::CreateSequence { schema, name } => {
                lock(&self.sequences)?.insert((schema.clone(), name.clone()));
            }
        }
        Ok(())
    }
}

impl TableStore for InMemoryTableStore {
    fn introspect(&self, table: &TableRef, sequence: Option<&str>) -> Result<TableState> {
        let tables = lock(&self.tables)?;
        let sequence_exists = match sequence {
            Some(name) => lock(&self.sequences)?.contains(&(table.schema.clone(), name.to_string())),
            None => false,
        };
        Ok(match tables.get(table) {
            None => TableState { sequence_exists,
                                 ..TableState::missing() },
            Some(t) => TableState { exists: true,
                                    columns: t.columns.clone(),
                                    indices: t.indices.clone(),
                                    sequence_exists,
                                    max_pk: t.next_pk },
        })
    }

    fn apply(&self, modification: &SchemaModification) -> Result<()> {
        let mut tables = lock(&self.tables)?;
        for change in modification.transaction_statements
                                  .iter()
                                  .chain(&modification.application_database_statements)
                                  .chain(&modification.nontransaction_statements)
        {
            self.apply_change(&mut tables, change)?;
        }
        Ok(())
    }

    fn upsert(&self, request: &UpsertRequest) -> Result<UpsertOutcome> {
        if self.is_migrating(&request.table)? {
            return Err(ReplicatorError::MigrationInProgress(request.table.to_string()));
        }
        let mut tables = lock(&self.tables)?;
        let t = tables.get_mut(&request.table)
                      .ok_or_else(|| ReplicatorError::storage(format!("relation {} does not exist", request.table)))?;
        let key = request.key().clone();
        let pos = t.rows.iter().position(|r| r.get(&request.key_column) == Some(&key));
        let existing = pos.map(|i| t.rows[i].clone());
        let decision = request.policy.decide(existing.as_ref(), &request.row);
        let stored = match (&decision, pos) {
            (WriteDecision::Insert(row), _) => {
                let stored = t.project(&request.table, row, t.next_pk + 1)?;
                t.next_pk += 1;
                t.rows.push(stored.clone());
                stored
            }
            (WriteDecision::Update(row), Some(i)) => {
                let pk = t.rows[i].get(PK_COLUMN).and_then(Value::as_i64).unwrap_or(0);
                let stored = t.project(&request.table, row, pk)?;
                t.rows[i] = stored.clone();
                stored
            }
            (WriteDecision::Skip, Some(i)) => t.rows[i].clone(),
            (_, None) => return Err(ReplicatorError::Invariant("update decided for a missing row".into())),
        };
        Ok(UpsertOutcome::from_decision(existing.as_ref(), &decision, stored, &request.tracked))
    }

    fn is_migrating(&self, table: &TableRef) -> Result<bool> {
        Ok(lock(&self.migrating)?.contains(table))
    }

    fn drop_table(&self, table: &TableRef) -> Result<()> {
        lock(&self.tables)?.remove(table);
        Ok(())
    }

    fn rows(&self, table: &TableRef) -> Result<Vec<Row>> {
        Ok(lock(&self.tables)?.get(table).map(|t| t.rows.clone()).unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemoryIntegrationStore {
    inner: Mutex<IndexMap<IntegrationId, ServiceIntegration>>,
}

impl InMemoryIntegrationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IntegrationStore for InMemoryIntegrationStore {
    fn create(&self, new: &NewServiceIntegration) -> Result<ServiceIntegration> {
        let mut m = lock(&self.inner)?;
        let id = IntegrationId(m.keys().map(|k| k.0).max().unwrap_or(0) + 1);
        let opaque_id = new_opaque_id();
        let sint = ServiceIntegration { id,
                                        table_name: new.resolved_table_name(&opaque_id),
                                        opaque_id,
                                        organization_id: new.organization_id,
                                        service_name: new.service_name.clone(),
                                        webhook_secret: None,
                                        backfill_key: None,
                                        backfill_secret: None,
                                        api_url: None,
                                        depends_on: new.depends_on,
                                        last_backfilled_at: None,
                                        created_at: Utc::now() };
        m.insert(id, sint.clone());
        Ok(sint)
    }

    fn find(&self, id: IntegrationId) -> Result<Option<ServiceIntegration>> {
        Ok(lock(&self.inner)?.get(&id).cloned())
    }

    fn find_by_opaque_id(&self, opaque_id: &str) -> Result<Option<ServiceIntegration>> {
        Ok(lock(&self.inner)?.values().find(|s| s.opaque_id == opaque_id).cloned())
    }

    fn save(&self, sint: &ServiceIntegration) -> Result<()> {
        let mut m = lock(&self.inner)?;
        match m.get_mut(&sint.id) {
            Some(slot) => {
                *slot = sint.clone();
                Ok(())
            }
            None => Err(ReplicatorError::NotFound(format!("service integration {}", sint.id))),
        }
    }

    fn delete(&self, id: IntegrationId) -> Result<()> {
        lock(&self.inner)?.shift_remove(&id);
        Ok(())
    }

    fn list_for_organization(&self, org: OrganizationId) -> Result<Vec<ServiceIntegration>> {
        Ok(lock(&self.inner)?.values().filter(|s| s.organization_id == org).cloned().collect())
    }

    fn dependents_of(&self, id: IntegrationId) -> Result<Vec<ServiceIntegration>> {
        Ok(lock(&self.inner)?.values().filter(|s| s.depends_on == Some(id)).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryBackfillJobStore {
    inner: Mutex<IndexMap<Uuid, BackfillJob>>,
}

impl InMemoryBackfillJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<BackfillJob> {
        self.inner.lock().map(|m| m.values().cloned().collect()).unwrap_or_default()
    }
}

impl BackfillJobStore for InMemoryBackfillJobStore {
    fn create(&self, job: &BackfillJob) -> Result<()> {
        lock(&self.inner)?.insert(job.id, job.clone());
        Ok(())
    }

    fn find(&self, id: Uuid) -> Result<Option<BackfillJob>> {
        Ok(lock(&self.inner)?.get(&id).cloned())
    }

    fn save(&self, job: &BackfillJob) -> Result<()> {
        lock(&self.inner)?.insert(job.id, job.clone());
        Ok(())
    }

    fn children_of(&self, parent_id: Uuid) -> Result<Vec<BackfillJob>> {
        Ok(lock(&self.inner)?.values()
                             .filter(|j| j.parent_job_id == Some(parent_id))
                             .cloned()
                             .collect())
    }

    fn claim_next_pending(&self) -> Result<Option<BackfillJob>> {
        let mut m = lock(&self.inner)?;
        let Some(job) = m.values_mut().find(|j| j.status == BackfillStatus::Pending) else {
            return Ok(None);
        };
        job.status = BackfillStatus::Fetching;
        job.started_at = Some(Utc::now());
        Ok(Some(job.clone()))
    }
}

/// Stores en memoria con acceso a los tipos concretos (útil en tests para
/// inspeccionar filas, jobs y eventos).
#[derive(Clone, Default)]
pub struct InMemoryStores {
    pub tables: Arc<InMemoryTableStore>,
    pub integrations: Arc<InMemoryIntegrationStore>,
    pub jobs: Arc<InMemoryBackfillJobStore>,
    pub events: Arc<InMemoryEventPublisher>,
}

impl InMemoryStores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stores(&self) -> Stores {
        Stores { tables: self.tables.clone(),
                 integrations: self.integrations.clone(),
                 jobs: self.jobs.clone(),
                 events: self.events.clone() }
    }
}
