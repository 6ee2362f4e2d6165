use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::debug;
use whdb_core::errors::{ReplicatorError, Result};
use whdb_core::model::{new_opaque_id, IntegrationId, NewServiceIntegration, OrganizationId, ServiceIntegration};
use whdb_core::store::IntegrationStore;

use super::{with_retry, ConnectionProvider};
use crate::schema::service_integrations;

/// Fila de `service_integrations` en el orden de columnas del esquema.
#[derive(Queryable, Debug)]
pub struct IntegrationRow {
    pub id: i64,
    pub opaque_id: String,
    pub organization_id: i64,
    pub service_name: String,
    pub table_name: String,
    pub webhook_secret: Option<String>,
    pub backfill_key: Option<String>,
    pub backfill_secret: Option<String>,
    pub api_url: Option<String>,
    pub depends_on: Option<i64>,
    pub last_backfilled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<IntegrationRow> for ServiceIntegration {
    fn from(r: IntegrationRow) -> Self {
        Self { id: IntegrationId(r.id),
               opaque_id: r.opaque_id,
               organization_id: OrganizationId(r.organization_id),
               service_name: r.service_name,
               table_name: r.table_name,
               webhook_secret: r.webhook_secret,
               backfill_key: r.backfill_key,
               backfill_secret: r.backfill_secret,
               api_url: r.api_url,
               depends_on: r.depends_on.map(IntegrationId),
               last_backfilled_at: r.last_backfilled_at,
               created_at: r.created_at }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = service_integrations)]
struct NewIntegrationRow<'a> {
    opaque_id: &'a str,
    organization_id: i64,
    service_name: &'a str,
    table_name: &'a str,
    depends_on: Option<i64>,
}

/// Campos mutables. `None` limpia la columna (credenciales rechazadas).
#[derive(AsChangeset, Debug)]
#[diesel(table_name = service_integrations, treat_none_as_null = true)]
struct IntegrationChangeset<'a> {
    table_name: &'a str,
    webhook_secret: Option<&'a str>,
    backfill_key: Option<&'a str>,
    backfill_secret: Option<&'a str>,
    api_url: Option<&'a str>,
    depends_on: Option<i64>,
    last_backfilled_at: Option<DateTime<Utc>>,
}

pub struct PgIntegrationStore<P: ConnectionProvider> {
    provider: P,
}

impl<P: ConnectionProvider> PgIntegrationStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl<P: ConnectionProvider> IntegrationStore for PgIntegrationStore<P> {
    fn create(&self, new: &NewServiceIntegration) -> Result<ServiceIntegration> {
        let opaque_id = new_opaque_id();
        let table_name = new.resolved_table_name(&opaque_id);
        let row: IntegrationRow = with_retry(|| {
            let mut conn = self.provider.connection()?;
            Ok(diesel::insert_into(service_integrations::table)
                .values(NewIntegrationRow { opaque_id: &opaque_id,
                                            organization_id: new.organization_id.0,
                                            service_name: &new.service_name,
                                            table_name: &table_name,
                                            depends_on: new.depends_on.map(|p| p.0) })
                .get_result(&mut conn)?)
        })?;
        debug!("integration:create id={} opaque_id={} service={}", row.id, row.opaque_id, row.service_name);
        Ok(row.into())
    }

    fn find(&self, id: IntegrationId) -> Result<Option<ServiceIntegration>> {
        let row: Option<IntegrationRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            Ok(service_integrations::table.find(id.0)
                                          .first(&mut conn)
                                          .optional()?)
        })?;
        Ok(row.map(Into::into))
    }

    fn find_by_opaque_id(&self, opaque_id: &str) -> Result<Option<ServiceIntegration>> {
        let row: Option<IntegrationRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            Ok(service_integrations::table.filter(service_integrations::opaque_id.eq(opaque_id))
                                          .first(&mut conn)
                                          .optional()?)
        })?;
        Ok(row.map(Into::into))
    }

    fn save(&self, sint: &ServiceIntegration) -> Result<()> {
        let changes = IntegrationChangeset { table_name: &sint.table_name,
                                             webhook_secret: sint.webhook_secret.as_deref(),
                                             backfill_key: sint.backfill_key.as_deref(),
                                             backfill_secret: sint.backfill_secret.as_deref(),
                                             api_url: sint.api_url.as_deref(),
                                             depends_on: sint.depends_on.map(|p| p.0),
                                             last_backfilled_at: sint.last_backfilled_at };
        let updated = with_retry(|| {
            let mut conn = self.provider.connection()?;
            Ok(diesel::update(service_integrations::table.find(sint.id.0)).set(&changes)
                                                                           .execute(&mut conn)?)
        })?;
        if updated == 0 {
            return Err(ReplicatorError::NotFound(format!("service integration {}", sint.id)));
        }
        Ok(())
    }

    fn delete(&self, id: IntegrationId) -> Result<()> {
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            Ok(diesel::delete(service_integrations::table.find(id.0)).execute(&mut conn)?)
        })?;
        Ok(())
    }

    fn list_for_organization(&self, org: OrganizationId) -> Result<Vec<ServiceIntegration>> {
        let rows: Vec<IntegrationRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            Ok(service_integrations::table.filter(service_integrations::organization_id.eq(org.0))
                                          .order(service_integrations::id.asc())
                                          .load(&mut conn)?)
        })?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    fn dependents_of(&self, id: IntegrationId) -> Result<Vec<ServiceIntegration>> {
        let rows: Vec<IntegrationRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            Ok(service_integrations::table.filter(service_integrations::depends_on.eq(id.0))
                                          .order(service_integrations::id.asc())
                                          .load(&mut conn)?)
        })?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
