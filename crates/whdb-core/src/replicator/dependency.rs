//! Grafo de dependencias entre integraciones.
//!
//! Las integraciones forman un DAG por `depends_on`. Los ciclos se rechazan
//! al configurar la dependencia, no en tiempo de ejecución.
use std::collections::HashSet;

use log::debug;

use crate::engine::ReplicationContext;
use crate::errors::{ReplicatorError, Result};
use crate::model::{IntegrationId, ServiceIntegration};

/// Integraciones de la organización que pueden actuar como padre de `sint`
/// (mismo servicio que la dependencia declarada y sin formar ciclo).
pub fn dependency_candidates(ctx: &ReplicationContext, sint: &ServiceIntegration) -> Result<Vec<ServiceIntegration>> {
    let replicator = ctx.registry.for_integration(sint)?;
    let Some(dep_service) = replicator.descriptor().dependency.clone() else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for candidate in ctx.stores.integrations.list_for_organization(sint.organization_id)? {
        if candidate.service_name != dep_service || candidate.id == sint.id {
            continue;
        }
        if would_create_cycle(ctx, sint.id, candidate.id)? {
            continue;
        }
        out.push(candidate);
    }
    Ok(out)
}

/// `true` si hacer que `child` dependa de `parent` cerraría un ciclo.
pub fn would_create_cycle(ctx: &ReplicationContext, child: IntegrationId, parent: IntegrationId) -> Result<bool> {
    let mut seen = HashSet::new();
    let mut cursor = Some(parent);
    while let Some(id) = cursor {
        if id == child {
            return Ok(true);
        }
        if !seen.insert(id) {
            // ciclo preexistente que no pasa por `child`
            return Ok(true);
        }
        cursor = ctx.stores.integrations.find(id)?.and_then(|s| s.depends_on);
    }
    Ok(false)
}

/// Asigna `parent` como dependencia de `sint` validando tipo y ciclos.
pub fn set_dependency(ctx: &ReplicationContext, sint: &mut ServiceIntegration, parent: &ServiceIntegration)
                      -> Result<()> {
    let replicator = ctx.registry.for_integration(sint)?;
    match replicator.descriptor().dependency.as_deref() {
        Some(dep) if dep == parent.service_name => {}
        Some(dep) => {
            return Err(ReplicatorError::Precondition(format!("{} must depend on a {dep} integration, not {}",
                                                             sint.service_name, parent.service_name)))
        }
        None => {
            return Err(ReplicatorError::Precondition(format!("{} does not take a dependency",
                                                             sint.service_name)))
        }
    }
    if would_create_cycle(ctx, sint.id, parent.id)? {
        return Err(ReplicatorError::Precondition(format!("making {} depend on {} would create a cycle",
                                                         sint.opaque_id, parent.opaque_id)));
    }
    debug!("set_dependency child={} parent={}", sint.id, parent.id);
    sint.depends_on = Some(parent.id);
    ctx.stores.integrations.save(sint)
}

/// Hijo directo único del servicio dado, o `None`. Más de uno es un error
/// de precondición.
pub fn find_dependent(ctx: &ReplicationContext, sint: &ServiceIntegration, service_name: &str)
                      -> Result<Option<ServiceIntegration>> {
    let mut matches: Vec<ServiceIntegration> = ctx.stores
                                                  .integrations
                                                  .dependents_of(sint.id)?
                                                  .into_iter()
                                                  .filter(|d| d.service_name == service_name)
                                                  .collect();
    match matches.len() {
        0 => Ok(None),
        1 => Ok(matches.pop()),
        n => Err(ReplicatorError::Precondition(format!("{} has {n} {service_name} dependents, expected at most one",
                                                       sint.opaque_id))),
    }
}

/// Como `find_dependent`, pero ninguno también es error.
pub fn find_dependent_required(ctx: &ReplicationContext, sint: &ServiceIntegration, service_name: &str)
                               -> Result<ServiceIntegration> {
    find_dependent(ctx, sint, service_name)?.ok_or_else(|| {
                                               ReplicatorError::Precondition(format!("{} has no {service_name} \
                                                                                      dependent",
                                                                                     sint.opaque_id))
                                           })
}

/// Integración padre configurada.
pub fn require_dependency(ctx: &ReplicationContext, sint: &ServiceIntegration) -> Result<ServiceIntegration> {
    let parent_id = sint.depends_on
                        .ok_or_else(|| ReplicatorError::Precondition(format!("{} has no dependency configured",
                                                                             sint.opaque_id)))?;
    ctx.stores.integrations.get(parent_id)
}

/// Padre con alguna credencial utilizable. Si el padre existe pero aún no
/// tiene credenciales, `CredentialsMissing`.
pub fn require_parent_credentials(ctx: &ReplicationContext, sint: &ServiceIntegration)
                                  -> Result<ServiceIntegration> {
    let parent = require_dependency(ctx, sint)?;
    if parent.backfill_secret().is_none() && parent.backfill_key().is_none() && parent.webhook_secret().is_none() {
        return Err(ReplicatorError::CredentialsMissing(format!("{} ({}) has no credentials yet",
                                                               parent.service_name, parent.opaque_id)));
    }
    Ok(parent)
}
