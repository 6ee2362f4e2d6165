//! Driver de backfill: `Pending -> Fetching(token) -> (upserts)* -> Done | Error`.
//!
//! Las páginas se piden y procesan estrictamente en secuencia. El token de
//! paginación es opaco; el driver sólo distingue "hay siguiente" de "no hay".
use chrono::Utc;
use log::{debug, error, info, warn};
use serde_json::json;
use uuid::Uuid;

use super::job::{BackfillJob, BackfillStatus};
use super::retry::with_retry;
use crate::engine::{ensure_table, upsert_resource, ReplicationContext};
use crate::errors::{classify_error, ErrorClass, ReplicatorError, Result};
use crate::event::EngineEvent;
use crate::model::ServiceIntegration;
use crate::replicator::{BackfillErrorAction, BackfillPage, PageRequest, Replicator};

/// Ejecuta un job de backfill hasta `Done` o `Error`.
///
/// Los fallos del proveedor (credenciales, errores fatales, transitorios
/// agotados) dejan el job en `Error`, publican la alerta correspondiente y
/// devuelven `Ok(job)`. Una tabla en migración devuelve el job a `Pending`
/// y propaga el error reintentable. Las violaciones de invariante se
/// propagan con el job en `Error`.
/// `enqueue = false` suprime la cascada a dependientes.
pub fn run_backfill_job(ctx: &ReplicationContext, job_id: Uuid, enqueue: bool) -> Result<BackfillJob> {
    let mut job = ctx.stores.jobs.get(job_id)?;
    if job.status.is_terminal() {
        debug!("backfill:skip job_id={job_id} status={}", job.status.as_str());
        return Ok(job);
    }
    let mut sint = ctx.stores.integrations.get(job.service_integration_id)?;
    let replicator = ctx.registry.for_integration(&sint)?;
    if !replicator.descriptor().supports_backfill {
        let err = ReplicatorError::Invariant(format!("{} does not support backfill", sint.service_name));
        job.fail(err.to_string());
        ctx.stores.jobs.save(&job)?;
        return Err(err);
    }
    ensure_table(ctx, replicator.as_ref(), &sint)?;

    job.status = BackfillStatus::Fetching;
    job.started_at.get_or_insert_with(Utc::now);
    ctx.stores.jobs.save(&job)?;
    let started = Utc::now();
    info!("backfill:start job_id={} sint={} incremental={} recursive={}",
          job.id, sint.opaque_id, job.incremental, job.recursive);

    if let Err(e) = fetch_all_pages(ctx, replicator.as_ref(), &sint, &mut job) {
        if classify_error(&e) == ErrorClass::Invariant {
            job.fail(e.to_string());
            ctx.stores.jobs.save(&job)?;
            return Err(e);
        }
        if requeues(&e) {
            warn!("backfill:requeued job_id={} sint={} error={e}", job.id, sint.opaque_id);
            job.requeue();
            ctx.stores.jobs.save(&job)?;
            return Err(e);
        }
        fail_job(ctx, replicator.as_ref(), &sint, &mut job, &e)?;
        return Ok(job);
    }

    sint.last_backfilled_at = Some(started);
    ctx.stores.integrations.save(&sint)?;
    job.finish();
    ctx.stores.jobs.save(&job)?;
    info!("backfill:done job_id={} pages={} items={}",
          job.id, job.pages_fetched, job.items_upserted);

    if job.recursive && enqueue {
        cascade(ctx, &job, &sint)?;
    }
    Ok(job)
}

fn fetch_all_pages(ctx: &ReplicationContext, replicator: &dyn Replicator, sint: &ServiceIntegration,
                   job: &mut BackfillJob)
                   -> Result<()> {
    let last_backfilled_at = if job.incremental { sint.last_backfilled_at } else { None };
    let mut token = None;
    loop {
        let request = PageRequest { token: token.take(),
                                    last_backfilled_at,
                                    criteria: job.criteria.clone() };
        let page = match with_retry(&ctx.config.retry, || replicator.fetch_backfill_page(ctx, sint, &request)) {
            Ok(page) => page,
            Err(e) if replicator.on_backfill_error(&e) == BackfillErrorAction::TreatAsEmpty => {
                info!("backfill:expected_error job_id={} error={e}", job.id);
                BackfillPage::default()
            }
            Err(e) => return Err(e),
        };
        job.pages_fetched += 1;
        let item_count = page.items.len();
        for item in page.items.iter().cloned() {
            let resource = replicator.backfill_item_to_resource(item)?;
            upsert_resource(ctx, replicator, sint, &resource, None)?;
            job.items_upserted += 1;
        }
        debug!("backfill:page job_id={} page={} items={}", job.id, job.pages_fetched, item_count);
        ctx.stores.jobs.save(job)?;
        if ctx.config.regression_mode {
            info!("backfill:regression_mode_stop job_id={}", job.id);
            return Ok(());
        }
        if page.is_last() {
            return Ok(());
        }
        token = page.next_page_token;
    }
}

/// Errores del lado de la base (tabla migrando, conflictos que agotaron sus
/// reintentos): el job queda `Pending` y el error se propaga para que el
/// worker lo reintente más tarde. Los transitorios del proveedor ya se
/// reintentaron en `fetch_all_pages` y terminan el job.
fn requeues(err: &ReplicatorError) -> bool {
    matches!(err,
             ReplicatorError::MigrationInProgress(_) | ReplicatorError::Storage { transient: true, .. })
}

fn fail_job(ctx: &ReplicationContext, replicator: &dyn Replicator, sint: &ServiceIntegration, job: &mut BackfillJob,
            err: &ReplicatorError)
            -> Result<()> {
    if err.is_auth_failure() {
        warn!("backfill:auth_failure job_id={} sint={} error={err}", job.id, sint.opaque_id);
        job.fail("credentials invalid");
        ctx.stores.jobs.save(job)?;
        let message = replicator.verify_backfill_error_message(err);
        return ctx.stores.events.publish(EngineEvent::BackfillJobFailed { job_id: job.id,
                                                                            service_integration_id: sint.id,
                                                                            message });
    }
    error!("backfill:failed job_id={} sint={} error={err}", job.id, sint.opaque_id);
    job.fail(err.to_string());
    ctx.stores.jobs.save(job)?;
    ctx.stores.events.publish(EngineEvent::DeveloperAlertEmitted {
        subsystem: "Backfill Error".into(),
        message: format!("backfill of {} failed: {err}", sint.service_name),
        fields: json!({
            "job_id": job.id,
            "service_integration_id": sint.id,
            "service_name": sint.service_name,
            "opaque_id": sint.opaque_id,
            "transient": err.is_retryable(),
        }),
    })
}

/// Un hijo recursivo por cada dependiente directo que soporta backfill.
fn cascade(ctx: &ReplicationContext, parent: &BackfillJob, sint: &ServiceIntegration) -> Result<Vec<BackfillJob>> {
    let mut children = Vec::new();
    for dependent in ctx.stores.integrations.dependents_of(sint.id)? {
        let replicator = ctx.registry.for_integration(&dependent)?;
        if !replicator.descriptor().supports_backfill {
            debug!("backfill:cascade_skip dependent={} reason=no_backfill", dependent.opaque_id);
            continue;
        }
        let child = BackfillJob::child_of(parent, dependent.id);
        ctx.stores.jobs.create(&child)?;
        ctx.stores.events.publish(EngineEvent::BackfillJobRun { job_id: child.id })?;
        debug!("backfill:cascade parent_job={} child_job={} dependent={}",
               parent.id, child.id, dependent.opaque_id);
        children.push(child);
    }
    Ok(children)
}
