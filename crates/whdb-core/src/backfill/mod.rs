//! Backfill: jobs, política de reintentos y driver de paginación.
mod driver;
mod job;
mod retry;

use log::{debug, info};

pub use driver::run_backfill_job;
pub use job::{BackfillJob, BackfillRequest, BackfillStatus};
pub use retry::{with_retry, RetryPolicy};

use crate::engine::ReplicationContext;
use crate::errors::{classify_error, ErrorClass, ReplicatorError, Result};
use crate::event::EngineEvent;
use crate::model::ServiceIntegration;
use crate::replicator::PageRequest;

/// Crea un job de backfill para la integración y, salvo `enqueue = false`,
/// publica `backfilljob.run`.
pub fn enqueue_backfill(ctx: &ReplicationContext, sint: &ServiceIntegration, request: BackfillRequest)
                        -> Result<BackfillJob> {
    let replicator = ctx.registry.for_integration(sint)?;
    if !replicator.descriptor().supports_backfill {
        return Err(ReplicatorError::Invariant(format!("{} does not support backfill", sint.service_name)));
    }
    let job = BackfillJob::new(sint.id, &request);
    ctx.stores.jobs.create(&job)?;
    if request.enqueue {
        ctx.stores.events.publish(EngineEvent::BackfillJobRun { job_id: job.id })?;
    }
    debug!("enqueue_backfill job_id={} sint={} incremental={} recursive={} enqueue={}",
           job.id, sint.opaque_id, job.incremental, job.recursive, request.enqueue);
    Ok(job)
}

/// Resultado de verificar credenciales de backfill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialVerification {
    pub verified: bool,
    /// Mensaje para el usuario cuando `verified` es `false`.
    pub message: String,
}

/// Pide la primera página para comprobar que las credenciales sirven.
pub fn verify_backfill_credentials(ctx: &ReplicationContext, sint: &ServiceIntegration)
                                   -> Result<CredentialVerification> {
    let replicator = ctx.registry.for_integration(sint)?;
    if !replicator.descriptor().supports_backfill {
        return Err(ReplicatorError::Invariant(format!("{} does not support backfill", sint.service_name)));
    }
    let request = PageRequest::first();
    match with_retry(&ctx.config.retry, || replicator.fetch_backfill_page(ctx, sint, &request)) {
        Ok(_) => Ok(CredentialVerification { verified: true,
                                             message: String::new() }),
        Err(e) if classify_error(&e) == ErrorClass::Invariant => Err(e),
        Err(e) => {
            info!("verify_backfill_credentials:failed sint={} error={e}", sint.opaque_id);
            Ok(CredentialVerification { verified: false,
                                        message: replicator.verify_backfill_error_message(&e) })
        }
    }
}
