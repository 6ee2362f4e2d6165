use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::model::{IntegrationId, ServiceIntegration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackfillStatus {
    Pending,
    Fetching,
    Done,
    Error,
}

impl BackfillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => Self::Pending,
            "fetching" => Self::Fetching,
            "done" => Self::Done,
            "error" => Self::Error,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillJob {
    pub id: Uuid,
    pub service_integration_id: IntegrationId,
    pub parent_job_id: Option<Uuid>,
    pub incremental: bool,
    pub recursive: bool,
    /// Mapa libre que se pasa al adapter tal cual.
    pub criteria: Value,
    pub status: BackfillStatus,
    pub failure_reason: Option<String>,
    pub pages_fetched: i64,
    pub items_upserted: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BackfillJob {
    pub fn new(service_integration_id: IntegrationId, request: &BackfillRequest) -> Self {
        Self { id: Uuid::new_v4(),
               service_integration_id,
               parent_job_id: None,
               incremental: request.incremental,
               recursive: request.recursive,
               criteria: request.criteria.clone(),
               status: BackfillStatus::Pending,
               failure_reason: None,
               pages_fetched: 0,
               items_upserted: 0,
               created_at: Utc::now(),
               started_at: None,
               finished_at: None }
    }

    /// Hijo de cascada: recursivo, hereda `incremental`, sin criteria.
    pub fn child_of(parent: &BackfillJob, service_integration_id: IntegrationId) -> Self {
        let mut job = Self::new(service_integration_id,
                                &BackfillRequest { incremental: parent.incremental,
                                                   criteria: Value::Object(Map::new()),
                                                   recursive: true,
                                                   enqueue: true });
        job.parent_job_id = Some(parent.id);
        job
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = BackfillStatus::Error;
        self.failure_reason = Some(reason.into());
        self.finished_at = Some(Utc::now());
    }

    /// Vuelve a la cola desde la primera página. Los upserts son
    /// idempotentes, así que repetir páginas ya procesadas es seguro.
    pub fn requeue(&mut self) {
        self.status = BackfillStatus::Pending;
        self.pages_fetched = 0;
        self.items_upserted = 0;
    }

    pub fn finish(&mut self) {
        self.status = BackfillStatus::Done;
        self.finished_at = Some(Utc::now());
    }
}

/// Parámetros de una petición de backfill.
#[derive(Debug, Clone, PartialEq)]
pub struct BackfillRequest {
    pub incremental: bool,
    pub criteria: Value,
    pub recursive: bool,
    /// `false` evita publicar `backfilljob.run` (uso síncrono/tests).
    pub enqueue: bool,
}

impl Default for BackfillRequest {
    fn default() -> Self {
        Self { incremental: false,
               criteria: Value::Object(Map::new()),
               recursive: true,
               enqueue: true }
    }
}

impl BackfillRequest {
    /// El primer backfill es completo; los siguientes son incrementales.
    pub fn for_integration(sint: &ServiceIntegration) -> Self {
        Self { incremental: sint.last_backfilled_at.is_some(),
               ..Self::default() }
    }

    pub fn incremental(mut self, incremental: bool) -> Self {
        self.incremental = incremental;
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn enqueue(mut self, enqueue: bool) -> Self {
        self.enqueue = enqueue;
        self
    }

    pub fn criteria(mut self, criteria: Value) -> Self {
        self.criteria = criteria;
        self
    }
}
