use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_query;
use log::debug;
use serde_json::Value;
use uuid::Uuid;
use whdb_core::backfill::{BackfillJob, BackfillStatus};
use whdb_core::errors::Result;
use whdb_core::model::IntegrationId;
use whdb_core::store::BackfillJobStore;

use super::{with_retry, ConnectionProvider};
use crate::error::PersistenceError;
use crate::schema::backfill_jobs;

/// Fila de `backfill_jobs`; sirve para leer, insertar y actualizar.
#[derive(Queryable, QueryableByName, Insertable, AsChangeset, Debug)]
#[diesel(table_name = backfill_jobs, treat_none_as_null = true)]
pub struct JobRow {
    pub id: Uuid,
    pub service_integration_id: i64,
    pub parent_job_id: Option<Uuid>,
    pub incremental: bool,
    pub recursive: bool,
    pub criteria: Value,
    pub status: String,
    pub failure_reason: Option<String>,
    pub pages_fetched: i64,
    pub items_upserted: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&BackfillJob> for JobRow {
    fn from(j: &BackfillJob) -> Self {
        Self { id: j.id,
               service_integration_id: j.service_integration_id.0,
               parent_job_id: j.parent_job_id,
               incremental: j.incremental,
               recursive: j.recursive,
               criteria: j.criteria.clone(),
               status: j.status.as_str().to_string(),
               failure_reason: j.failure_reason.clone(),
               pages_fetched: j.pages_fetched,
               items_upserted: j.items_upserted,
               created_at: j.created_at,
               started_at: j.started_at,
               finished_at: j.finished_at }
    }
}

impl TryFrom<JobRow> for BackfillJob {
    type Error = PersistenceError;

    fn try_from(r: JobRow) -> std::result::Result<Self, Self::Error> {
        let status = BackfillStatus::parse(&r.status).ok_or_else(|| {
                                                          PersistenceError::Decode(format!("unknown job status {}",
                                                                                           r.status))
                                                      })?;
        Ok(Self { id: r.id,
                  service_integration_id: IntegrationId(r.service_integration_id),
                  parent_job_id: r.parent_job_id,
                  incremental: r.incremental,
                  recursive: r.recursive,
                  criteria: r.criteria,
                  status,
                  failure_reason: r.failure_reason,
                  pages_fetched: r.pages_fetched,
                  items_upserted: r.items_upserted,
                  created_at: r.created_at,
                  started_at: r.started_at,
                  finished_at: r.finished_at })
    }
}

pub struct PgBackfillJobStore<P: ConnectionProvider> {
    provider: P,
}

impl<P: ConnectionProvider> PgBackfillJobStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl<P: ConnectionProvider> BackfillJobStore for PgBackfillJobStore<P> {
    fn create(&self, job: &BackfillJob) -> Result<()> {
        let row = JobRow::from(job);
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            Ok(diesel::insert_into(backfill_jobs::table).values(&row)
                                                        .execute(&mut conn)?)
        })?;
        debug!("job:create id={} sint={}", job.id, job.service_integration_id);
        Ok(())
    }

    fn find(&self, id: Uuid) -> Result<Option<BackfillJob>> {
        let row: Option<JobRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            Ok(backfill_jobs::table.find(id).first(&mut conn).optional()?)
        })?;
        Ok(row.map(BackfillJob::try_from).transpose()?)
    }

    fn save(&self, job: &BackfillJob) -> Result<()> {
        let row = JobRow::from(job);
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            Ok(diesel::insert_into(backfill_jobs::table).values(&row)
                                                        .on_conflict(backfill_jobs::id)
                                                        .do_update()
                                                        .set(&row)
                                                        .execute(&mut conn)?)
        })?;
        Ok(())
    }

    fn children_of(&self, parent_id: Uuid) -> Result<Vec<BackfillJob>> {
        let rows: Vec<JobRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            Ok(backfill_jobs::table.filter(backfill_jobs::parent_job_id.eq(parent_id))
                                   .order(backfill_jobs::created_at.asc())
                                   .load(&mut conn)?)
        })?;
        Ok(rows.into_iter()
               .map(BackfillJob::try_from)
               .collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn claim_next_pending(&self) -> Result<Option<BackfillJob>> {
        // SKIP LOCKED: varios workers pueden reclamar en paralelo sin repetir job.
        let row: Option<JobRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            Ok(sql_query("UPDATE backfill_jobs SET status = 'fetching', started_at = now() WHERE id = (SELECT id \
                          FROM backfill_jobs WHERE status = 'pending' ORDER BY created_at LIMIT 1 FOR UPDATE SKIP \
                          LOCKED) RETURNING *").get_result(&mut conn)
                                               .optional()?)
        })?;
        if let Some(r) = &row {
            debug!("job:claim id={} sint={}", r.id, r.service_integration_id);
        }
        Ok(row.map(BackfillJob::try_from).transpose()?)
    }
}
