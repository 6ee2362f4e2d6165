//! Pipelines compartidos por webhooks y backfill: asegurar la tabla,
//! upsert de un recurso y manejo completo de un webhook.
use std::collections::HashSet;
use std::sync::MutexGuard;

use log::{debug, error, info, warn};
use serde_json::Value;

use super::ReplicationContext;
use crate::constants::ENRICHMENT_COLUMN;
use crate::errors::{ReplicatorError, Result};
use crate::model::{Row, ServiceIntegration};
use crate::replicator::{table_definition, Replicator, WebhookRequest, WebhookResponse};
use crate::schema::{plan_modification, SchemaModification, TableDefinition};
use crate::upsert::{build_row, tracked_columns, UpsertOutcome, UpsertRequest};

pub fn definition_for(ctx: &ReplicationContext, replicator: &dyn Replicator, sint: &ServiceIntegration)
                      -> TableDefinition {
    table_definition(replicator, sint, &ctx.config.schema)
}

/// Planifica sin aplicar.
pub fn plan_table(ctx: &ReplicationContext, replicator: &dyn Replicator, sint: &ServiceIntegration)
                  -> Result<SchemaModification> {
    let def = definition_for(ctx, replicator, sint);
    let sequence = def.requires_sequence.then(|| def.sequence_name());
    let state = ctx.stores.tables.introspect(&def.table, sequence.as_deref())?;
    Ok(plan_modification(&def, &state))
}

/// Planifica y aplica lo necesario para que la tabla coincida con las
/// columnas declaradas. Devuelve lo aplicado.
pub fn ensure_table(ctx: &ReplicationContext, replicator: &dyn Replicator, sint: &ServiceIntegration)
                    -> Result<SchemaModification> {
    let modification = plan_table(ctx, replicator, sint)?;
    if modification.is_empty() {
        debug!("ensure_table:noop sint={}", sint.opaque_id);
        return Ok(modification);
    }
    info!("ensure_table:apply sint={} tx={} app={} nontx={}",
          sint.opaque_id,
          modification.transaction_statements.len(),
          modification.application_database_statements.len(),
          modification.nontransaction_statements.len());
    ctx.stores.tables.apply(&modification)?;
    Ok(modification)
}

fn schema_fingerprint(def: &TableDefinition) -> String {
    let mut parts = vec![def.table.to_string(), def.remote_key.name.clone()];
    parts.extend(def.columns.iter().map(|c| c.name.clone()));
    parts.extend(def.indices().into_iter().map(|i| i.name));
    if def.store_enrichment {
        parts.push(ENRICHMENT_COLUMN.to_string());
    }
    parts.join("|")
}

/// `ensure_table` una sola vez por definición y proceso. Un adapter que
/// declara columnas nuevas cambia la huella y vuelve a migrar.
pub fn ensure_table_current(ctx: &ReplicationContext, replicator: &dyn Replicator, sint: &ServiceIntegration)
                            -> Result<()> {
    let def = definition_for(ctx, replicator, sint);
    let fingerprint = schema_fingerprint(&def);
    if verified_schemas(ctx)?.contains(&fingerprint) {
        return Ok(());
    }
    if ctx.stores.tables.is_migrating(&def.table)? {
        return Err(ReplicatorError::MigrationInProgress(def.table.to_string()));
    }
    ensure_table(ctx, replicator, sint)?;
    verified_schemas(ctx)?.insert(fingerprint);
    Ok(())
}

fn verified_schemas(ctx: &ReplicationContext) -> Result<MutexGuard<'_, HashSet<String>>> {
    ctx.verified_schemas
       .lock()
       .map_err(|_| ReplicatorError::storage("schema cache mutex poisoned"))
}

/// Upsert de un recurso: enrichment, normalización, extracción de columnas,
/// decisión de escritura y notificación a dependientes.
pub fn upsert_resource(ctx: &ReplicationContext, replicator: &dyn Replicator, sint: &ServiceIntegration,
                       resource: &Value, event: Option<&Value>)
                       -> Result<UpsertOutcome> {
    let enrichment = replicator.fetch_enrichment(ctx, sint, resource, event)?;
    let data = replicator.resource_to_data(resource, event, enrichment.as_ref());
    let def = definition_for(ctx, replicator, sint);
    let row = build_row(&def, &data, enrichment.as_ref())?;
    if ctx.stores.tables.is_migrating(&def.table)? {
        return Err(ReplicatorError::MigrationInProgress(def.table.to_string()));
    }
    let request = UpsertRequest { table: def.table.clone(),
                                  key_column: def.remote_key.name.clone(),
                                  tracked: tracked_columns(&def),
                                  policy: replicator.update_policy(),
                                  row };
    let outcome = ctx.stores.tables.upsert(&request)?;
    debug!("upsert:done sint={} key={} action={:?} changed={}",
           sint.opaque_id,
           request.key(),
           outcome.action,
           outcome.changed);
    if outcome.changed {
        notify_dependents(ctx, sint, &outcome.row)?;
    }
    Ok(outcome)
}

fn notify_dependents(ctx: &ReplicationContext, sint: &ServiceIntegration, row: &Row) -> Result<()> {
    for dependent in ctx.stores.integrations.dependents_of(sint.id)? {
        let replicator = ctx.registry.for_integration(&dependent)?;
        replicator.on_dependency_webhook_upsert(ctx, &dependent, sint, row, true)?;
    }
    Ok(())
}

/// Maneja un webhook completo. Los errores esperados se traducen a status
/// definidos sin exponer detalles internos; las violaciones de invariante se
/// propagan.
pub fn handle_webhook(ctx: &ReplicationContext, sint: &ServiceIntegration, request: &WebhookRequest)
                      -> Result<WebhookResponse> {
    let replicator = ctx.registry.for_integration(sint)?;
    if !replicator.descriptor().supports_webhooks {
        return Ok(WebhookResponse::error(405, "this integration does not accept webhooks"));
    }
    let response = replicator.webhook_response(sint, request);
    if !response.is_success() {
        warn!("webhook:rejected sint={} status={}", sint.opaque_id, response.status);
        return Ok(response);
    }
    let result = ensure_table_current(ctx, replicator.as_ref(), sint)
        .and_then(|_| replicator.resource_and_event(request))
        .and_then(|parsed| match parsed {
            Some((resource, event)) => {
                upsert_resource(ctx, replicator.as_ref(), sint, &resource, event.as_ref()).map(Some)
            }
            None => Ok(None),
        });
    match result {
        Ok(Some(_)) => Ok(response),
        Ok(None) => {
            debug!("webhook:ignored sint={}", sint.opaque_id);
            Ok(response)
        }
        Err(ReplicatorError::InvalidPayload(msg)) => {
            warn!("webhook:invalid_payload sint={} error={msg}", sint.opaque_id);
            Ok(WebhookResponse::error(400, "invalid payload"))
        }
        Err(ReplicatorError::MigrationInProgress(table)) => {
            info!("webhook:migrating sint={} table={table}", sint.opaque_id);
            Ok(WebhookResponse::error(503, "temporarily unavailable, please retry"))
        }
        Err(e @ ReplicatorError::Invariant(_)) => Err(e),
        Err(e) => {
            error!("webhook:failed sint={} error={e}", sint.opaque_id);
            Ok(WebhookResponse::error(500, "internal error"))
        }
    }
}
