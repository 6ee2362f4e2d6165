//! Protocolo de state machine para configurar integraciones campo a campo.
//!
//! `calculate_*` inspecciona la integración y devuelve el siguiente
//! requisito pendiente; `process_state_change` valida y persiste una
//! respuesta y vuelve a calcular.
mod step;

use log::{debug, info};

pub use step::StateMachineStep;

use crate::backfill::{enqueue_backfill, verify_backfill_credentials, BackfillRequest};
use crate::constants::{BACKFILL_STATE_FIELDS, DEPENDENCY_CHOICE_FIELD, NOOP_CREATE_FIELD, WEBHOOK_STATE_FIELDS};
use crate::engine::ReplicationContext;
use crate::errors::{ReplicatorError, Result};
use crate::model::ServiceIntegration;
use crate::replicator::{dependency_candidates, set_dependency, Replicator};

/// URL a la que se envía la respuesta de un campo.
pub fn transition_url(ctx: &ReplicationContext, sint: &ServiceIntegration, field: &str) -> String {
    format!("{}/service_integrations/{}/transition/{}",
            ctx.config.api_path_prefix.trim_end_matches('/'),
            sint.opaque_id,
            field)
}

fn is_secret_field(field: &str) -> bool {
    matches!(field, "webhook_secret" | "backfill_secret")
}

/// Paso de selección de dependencia, si la integración aún no la tiene.
pub fn dependency_step<R>(ctx: &ReplicationContext, replicator: &R, sint: &ServiceIntegration)
                          -> Result<Option<StateMachineStep>>
    where R: Replicator + ?Sized
{
    let Some(dep) = replicator.descriptor().dependency.clone() else {
        return Ok(None);
    };
    if sint.depends_on.is_some() {
        return Ok(None);
    }
    let candidates = dependency_candidates(ctx, sint)?;
    if candidates.is_empty() {
        return Ok(Some(StateMachineStep::completed().error_code("no_candidate_dependency")
                                                    .output(format!("This integration requires a {dep} integration, \
                                                                     but your organization has none. Please set one up \
                                                                     first, then come back.",))));
    }
    let listing: Vec<String> = candidates.iter()
                                         .enumerate()
                                         .map(|(i, c)| format!("{}. {} ({})", i + 1, c.table_name, c.opaque_id))
                                         .collect();
    Ok(Some(StateMachineStep::prompting(format!("Enter the number of the {dep} integration to use (blank for the \
                                                 first):"),
                                        transition_url(ctx, sint, DEPENDENCY_CHOICE_FIELD))
            .output(format!("This integration depends on a {dep} integration. Choose one of:\n{}",
                            listing.join("\n")))))
}

/// Máquina por defecto para webhooks: dependencia y secreto.
pub fn default_webhook_state_machine<R>(ctx: &ReplicationContext, replicator: &R, sint: &ServiceIntegration)
                                        -> Result<StateMachineStep>
    where R: Replicator + ?Sized
{
    if let Some(step) = dependency_step(ctx, replicator, sint)? {
        return Ok(step);
    }
    let d = replicator.descriptor();
    if sint.webhook_secret().is_none() {
        return Ok(StateMachineStep::prompting("Paste or type your webhook secret here:",
                                              transition_url(ctx, sint, "webhook_secret"))
                  .secret()
                  .output(format!("You are about to start replicating {} into the table {}. Configure {} to send \
                                   webhooks to this integration and share the signing secret.",
                                  d.resource_name_plural, sint.table_name, d.name)));
    }
    Ok(StateMachineStep::completed().output(format!("Great! {} are now being replicated into {}.",
                                                    d.resource_name_plural, sint.table_name)))
}

/// Máquina por defecto para backfill: dependencia y API key.
pub fn default_backfill_state_machine<R>(ctx: &ReplicationContext, replicator: &R, sint: &ServiceIntegration)
                                         -> Result<StateMachineStep>
    where R: Replicator + ?Sized
{
    if let Some(step) = dependency_step(ctx, replicator, sint)? {
        return Ok(step);
    }
    let d = replicator.descriptor();
    if sint.backfill_secret().is_none() {
        return Ok(StateMachineStep::prompting("Paste or type your API key here:",
                                              transition_url(ctx, sint, "backfill_secret"))
                  .secret()
                  .output(format!("To backfill {}, we need an API key for {}.", d.resource_name_plural, d.name)));
    }
    Ok(StateMachineStep::completed().output(format!("Great! We are going to start backfilling your {} into {}.",
                                                    d.resource_name_plural, sint.table_name)))
}

/// Máquina de creación preferida: webhooks si el servicio los soporta.
pub fn calculate_preferred_create_state_machine(ctx: &ReplicationContext, sint: &ServiceIntegration)
                                                -> Result<StateMachineStep> {
    let replicator = ctx.registry.for_integration(sint)?;
    if replicator.descriptor().supports_webhooks {
        replicator.calculate_webhook_state_machine(ctx, sint)
    } else {
        replicator.calculate_backfill_state_machine(ctx, sint)
    }
}

/// Índice 0-based elegido (`value` es 1-based; vacío elige el primero).
fn resolve_dependency_choice(value: &str, count: usize) -> Result<usize> {
    if value.is_empty() {
        return Ok(0);
    }
    match value.parse::<usize>() {
        Ok(n) if n >= 1 && n <= count => Ok(n - 1),
        Ok(n) => Err(ReplicatorError::InvalidInput(format!("{n} is not between 1 and {count}"))),
        Err(_) => Err(ReplicatorError::InvalidInput(format!("'{value}' is not a number"))),
    }
}

fn reprompt(ctx: &ReplicationContext, sint: &ServiceIntegration, field: &str, code: &str, message: String)
            -> StateMachineStep {
    let step = StateMachineStep::prompting(format!("Please enter a valid value for {field}:"),
                                           transition_url(ctx, sint, field)).output(message)
                                                                            .error_code(code);
    if is_secret_field(field) {
        step.secret()
    } else {
        step
    }
}

/// Valida y persiste una respuesta, y devuelve el siguiente paso.
pub fn process_state_change(ctx: &ReplicationContext, sint: &mut ServiceIntegration, field: &str, value: &str)
                            -> Result<StateMachineStep> {
    let value = value.trim();
    let replicator = ctx.registry.for_integration(sint)?;
    debug!("process_state_change:start sint={} field={field}", sint.opaque_id);

    if field == DEPENDENCY_CHOICE_FIELD {
        let candidates = dependency_candidates(ctx, sint)?;
        if candidates.is_empty() {
            return Err(ReplicatorError::Precondition(format!("there are no candidate dependencies for {}",
                                                             sint.opaque_id)));
        }
        let idx = match resolve_dependency_choice(value, candidates.len()) {
            Ok(i) => i,
            Err(ReplicatorError::InvalidInput(msg)) => {
                return Ok(reprompt(ctx, sint, field, "invalid_dependency_choice", msg));
            }
            Err(e) => return Err(e),
        };
        set_dependency(ctx, sint, &candidates[idx])?;
        return calculate_preferred_create_state_machine(ctx, sint);
    }
    if field == NOOP_CREATE_FIELD {
        return calculate_preferred_create_state_machine(ctx, sint);
    }

    let is_webhook_field = WEBHOOK_STATE_FIELDS.contains(&field);
    let is_backfill_field = BACKFILL_STATE_FIELDS.contains(&field);
    if !is_webhook_field && !is_backfill_field {
        return Err(ReplicatorError::Precondition(format!("{field} is not a valid field for {}",
                                                         sint.service_name)));
    }
    match replicator.validate_state_change(field, value) {
        Ok(()) => {}
        Err(ReplicatorError::InvalidInput(msg)) => return Ok(reprompt(ctx, sint, field, "invalid_value", msg)),
        Err(e) => return Err(e),
    }
    sint.set_field(field, value.to_string());
    ctx.stores.integrations.save(sint)?;

    if is_webhook_field {
        return replicator.calculate_webhook_state_machine(ctx, sint);
    }
    let step = replicator.calculate_backfill_state_machine(ctx, sint)?;
    if !step.successful() || !replicator.descriptor().supports_backfill {
        return Ok(step);
    }
    if replicator.verify_credentials_on_setup() {
        let verification = verify_backfill_credentials(ctx, sint)?;
        if !verification.verified {
            clear_backfill_information(ctx, sint)?;
            let next = replicator.calculate_backfill_state_machine(ctx, sint)?;
            return Ok(next.output(verification.message).error_code("invalid_credentials"));
        }
    }
    let request = BackfillRequest::for_integration(sint).recursive(false);
    let job = enqueue_backfill(ctx, sint, request)?;
    info!("process_state_change:backfill_enqueued sint={} job_id={}", sint.opaque_id, job.id);
    Ok(step)
}

/// Borra las credenciales de backfill (tras una verificación fallida).
pub fn clear_backfill_information(ctx: &ReplicationContext, sint: &mut ServiceIntegration) -> Result<()> {
    sint.backfill_key = None;
    sint.backfill_secret = None;
    ctx.stores.integrations.save(sint)
}
