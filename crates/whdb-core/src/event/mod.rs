//! Eventos publicados al bus asíncrono.
//!
//! El motor sólo publica; el despacho (workers, alertas) es responsabilidad
//! del consumidor del bus.
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{ReplicatorError, Result};
use crate::model::IntegrationId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "payload")]
pub enum EngineEvent {
    /// Dispara la ejecución de un backfill job (cascadas incluidas).
    #[serde(rename = "backfilljob.run")]
    BackfillJobRun { job_id: Uuid },
    /// Alerta para desarrolladores ante errores irrecuperables.
    #[serde(rename = "developeralert.emitted")]
    DeveloperAlertEmitted {
        subsystem: String,
        message: String,
        fields: Value,
    },
    /// Alerta para administradores de la organización (credenciales, etc.).
    #[serde(rename = "backfilljob.failed")]
    BackfillJobFailed {
        job_id: Uuid,
        service_integration_id: IntegrationId,
        message: String,
    },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BackfillJobRun { .. } => "backfilljob.run",
            Self::DeveloperAlertEmitted { .. } => "developeralert.emitted",
            Self::BackfillJobFailed { .. } => "backfilljob.failed",
        }
    }

    /// Cuerpo del evento sin el nombre.
    pub fn payload(&self) -> Result<Value> {
        let tagged = serde_json::to_value(self).map_err(|e| ReplicatorError::storage(e.to_string()))?;
        Ok(tagged.get("payload").cloned().unwrap_or(Value::Null))
    }
}

/// Evento ya publicado, con su instante.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedEvent {
    pub seq: u64,
    pub event: EngineEvent,
    pub ts: DateTime<Utc>,
}

pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: EngineEvent) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryEventPublisher {
    inner: Mutex<Vec<PublishedEvent>>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<PublishedEvent> {
        self.inner.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Eventos publicados con el nombre dado.
    pub fn named(&self, name: &str) -> Vec<EngineEvent> {
        self.published()
            .into_iter()
            .map(|p| p.event)
            .filter(|e| e.name() == name)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut v) = self.inner.lock() {
            v.clear();
        }
    }
}

impl EventPublisher for InMemoryEventPublisher {
    fn publish(&self, event: EngineEvent) -> Result<()> {
        let mut v = self.inner
                        .lock()
                        .map_err(|_| ReplicatorError::storage("event publisher mutex poisoned"))?;
        let seq = v.len() as u64;
        v.push(PublishedEvent { seq,
                                event,
                                ts: Utc::now() });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn publishes_in_order_with_names() {
        let bus = InMemoryEventPublisher::new();
        let job_id = Uuid::new_v4();
        bus.publish(EngineEvent::BackfillJobRun { job_id }).unwrap();
        bus.publish(EngineEvent::DeveloperAlertEmitted { subsystem: "backfill".into(),
                                                         message: "boom".into(),
                                                         fields: json!({}) })
           .unwrap();
        let all = bus.published();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].seq, 0);
        assert_eq!(bus.named("backfilljob.run"), vec![EngineEvent::BackfillJobRun { job_id }]);
        assert_eq!(all[0].event.payload().unwrap(), json!({"job_id": job_id}));
        bus.clear();
        assert!(bus.published().is_empty());
    }
}
