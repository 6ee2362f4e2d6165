//! Worker de backfill: reclama el job pendiente más antiguo, lo ejecuta y
//! repite. Un job por worker; el paralelismo se consigue con más procesos
//! (`claim_next_pending` no entrega el mismo job dos veces).
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use whdb_core::store::BackfillJobStore;
use whdb_core::{BackfillJob, BackfillStatus, ReplicationEngine};

use crate::error::AppError;

/// Resumen de una corrida del worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReport {
    pub started_at: DateTime<Utc>,
    pub done: Vec<Uuid>,
    /// Jobs que terminaron en `Error` o cuya ejecución devolvió error.
    pub failed: Vec<Uuid>,
}

impl WorkerReport {
    fn new() -> Self {
        Self { started_at: Utc::now(),
               done: Vec::new(),
               failed: Vec::new() }
    }

    fn record(&mut self, job: &BackfillJob) {
        match job.status {
            BackfillStatus::Done => self.done.push(job.id),
            _ => self.failed.push(job.id),
        }
    }

    pub fn total(&self) -> usize {
        self.done.len() + self.failed.len()
    }
}

pub struct Worker {
    engine: ReplicationEngine,
    poll: Duration,
}

impl Worker {
    pub fn new(engine: ReplicationEngine, poll: Duration) -> Self {
        Self { engine, poll }
    }

    pub fn engine(&self) -> &ReplicationEngine {
        &self.engine
    }

    /// Ejecuta a lo sumo un job. `Ok(None)` si no había pendientes.
    ///
    /// Los fallos manejados (credenciales, errores HTTP) vuelven como
    /// `Ok(job)` con estado `Error`; sólo los invariantes y el storage
    /// devuelven `Err`.
    pub fn run_once(&self) -> Result<Option<BackfillJob>, AppError> {
        match self.engine.context().stores.jobs.claim_next_pending()? {
            Some(claimed) => Ok(Some(self.run_claimed(&claimed)?)),
            None => Ok(None),
        }
    }

    fn run_claimed(&self, claimed: &BackfillJob) -> Result<BackfillJob, AppError> {
        debug!("worker:claimed job_id={} sint={}", claimed.id, claimed.service_integration_id);
        match self.engine.run_backfill_job(claimed.id, true) {
            Ok(job) => {
                info!("worker:finished job_id={} status={} pages={} items={}",
                      job.id,
                      job.status.as_str(),
                      job.pages_fetched,
                      job.items_upserted);
                Ok(job)
            }
            Err(e) if e.is_retryable() => {
                // vuelve a la cola para que otro intento lo tome
                let jobs = &self.engine.context().stores.jobs;
                let mut job = jobs.get(claimed.id)?;
                if !job.status.is_terminal() {
                    job.status = BackfillStatus::Pending;
                    jobs.save(&job)?;
                }
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Corre jobs hasta que no quede ninguno pendiente. Los hijos de cascada
    /// encolados durante la corrida también se ejecutan.
    pub fn drain(&self) -> WorkerReport {
        let mut report = WorkerReport::new();
        while self.step(&mut report) {}
        report
    }

    /// Bucle principal: cuando no hay trabajo duerme `poll` y vuelve a mirar.
    pub fn run(&self, stop: &AtomicBool) -> WorkerReport {
        let mut report = WorkerReport::new();
        info!("worker:start poll_ms={}", self.poll.as_millis());
        while !stop.load(Ordering::Relaxed) {
            if !self.step(&mut report) {
                std::thread::sleep(self.poll);
            }
        }
        info!("worker:stop done={} failed={}", report.done.len(), report.failed.len());
        report
    }

    /// `true` si se procesó (o intentó procesar) un job.
    fn step(&self, report: &mut WorkerReport) -> bool {
        let claimed = match self.engine.context().stores.jobs.claim_next_pending() {
            Ok(Some(job)) => job,
            Ok(None) => return false,
            Err(e) => {
                warn!("worker:claim_failed error={e}");
                return false;
            }
        };
        match self.run_claimed(&claimed) {
            Ok(job) => {
                report.record(&job);
                true
            }
            Err(AppError::Engine(e)) if e.is_retryable() => {
                warn!("worker:requeued job_id={} error={e}", claimed.id);
                false
            }
            Err(e) => {
                error!("worker:job_failed job_id={} error={e}", claimed.id);
                report.failed.push(claimed.id);
                true
            }
        }
    }
}
