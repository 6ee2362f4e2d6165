//! Outbox de eventos: cada `publish` es un INSERT en `published_events`; el
//! consumidor del bus lee por `seq`.
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::debug;
use serde_json::Value;
use whdb_core::errors::Result;
use whdb_core::event::{EngineEvent, EventPublisher};

use super::{with_retry, ConnectionProvider};
use crate::schema::published_events;

#[derive(Insertable, Debug)]
#[diesel(table_name = published_events)]
struct NewEventRow<'a> {
    name: &'a str,
    payload: &'a Value,
}

/// Fila leída del outbox.
#[derive(Queryable, Debug)]
pub struct EventRow {
    pub seq: i64,
    pub name: String,
    pub payload: Value,
    pub ts: DateTime<Utc>,
}

pub struct PgEventPublisher<P: ConnectionProvider> {
    provider: P,
}

impl<P: ConnectionProvider> PgEventPublisher<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Eventos con `seq > after`, en orden de publicación.
    pub fn since(&self, after: i64) -> Result<Vec<EventRow>> {
        Ok(with_retry(|| {
               let mut conn = self.provider.connection()?;
               Ok(published_events::table.filter(published_events::seq.gt(after))
                                         .order(published_events::seq.asc())
                                         .load(&mut conn)?)
           })?)
    }
}

impl<P: ConnectionProvider> EventPublisher for PgEventPublisher<P> {
    fn publish(&self, event: EngineEvent) -> Result<()> {
        let name = event.name();
        let payload = event.payload()?;
        let seq: i64 = with_retry(|| {
            let mut conn = self.provider.connection()?;
            Ok(diesel::insert_into(published_events::table).values(NewEventRow { name, payload: &payload })
                                                            .returning(published_events::seq)
                                                            .get_result(&mut conn)?)
        })?;
        debug!("publish:done name={name} seq={seq}");
        Ok(())
    }
}
