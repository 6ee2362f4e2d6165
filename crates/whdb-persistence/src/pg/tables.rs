//! `TableStore` sobre Postgres: introspección por catálogo, DDL bajo lock
//! consultivo y upsert transaccional con `FOR UPDATE`.
//!
//! El lock consultivo por tabla (`hashtext('schema.tabla')`) coordina DDL y
//! escrituras: el DDL transaccional lo toma en exclusiva y cada upsert lo
//! intenta en modo compartido. Si no lo consigue, la tabla está migrando.
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::{BigInt, Bool, Jsonb, Text};
use log::{debug, info};
use serde_json::Value;
use whdb_core::constants::PK_COLUMN;
use whdb_core::errors::Result;
use whdb_core::model::{Row, TableRef};
use whdb_core::schema::{quote_ident, SchemaChange, SchemaModification, TableState};
use whdb_core::store::TableStore;
use whdb_core::upsert::{UpsertOutcome, UpsertRequest, WriteDecision};

use super::{with_retry, ConnectionProvider};
use crate::error::PersistenceError;

#[derive(QueryableByName)]
struct NameRow {
    #[diesel(sql_type = Text)]
    name: String,
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    n: i64,
}

#[derive(QueryableByName)]
struct FlagRow {
    #[diesel(sql_type = Bool)]
    flag: bool,
}

#[derive(QueryableByName)]
struct JsonRow {
    #[diesel(sql_type = Jsonb)]
    row: Value,
}

impl JsonRow {
    fn into_row(self) -> std::result::Result<Row, PersistenceError> {
        Ok(serde_json::from_value(self.row)?)
    }
}

fn row_json(row: &Row) -> Value {
    Value::Object(row.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

/// Tabla afectada por la modificación (todas las sentencias comparten una).
fn modification_table(m: &SchemaModification) -> Option<&TableRef> {
    m.transaction_statements
     .iter()
     .chain(&m.nontransaction_statements)
     .find_map(|c| match c {
         SchemaChange::CreateTable { table, .. }
         | SchemaChange::AddColumn { table, .. }
         | SchemaChange::BackfillColumns { table, .. }
         | SchemaChange::CreateIndex { table, .. } => Some(table),
         SchemaChange::RawStatement(_) | SchemaChange::CreateSequence { .. } => None,
     })
}

pub struct PgTableStore<P: ConnectionProvider> {
    provider: P,
}

impl<P: ConnectionProvider> PgTableStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

fn insert_row(conn: &mut PgConnection, q: &str, key_column: &str, row: &Row)
              -> std::result::Result<Option<Row>, PersistenceError> {
    let cols: Vec<String> = row.keys().filter(|k| k.as_str() != PK_COLUMN).map(|k| quote_ident(k)).collect();
    let list = cols.join(", ");
    let sql = format!("INSERT INTO {q} AS t ({list}) SELECT {list} FROM jsonb_populate_record(NULL::{q}, $1) ON \
                       CONFLICT ({}) DO NOTHING RETURNING to_jsonb(t.*) AS row",
                      quote_ident(key_column));
    let inserted: Option<JsonRow> = sql_query(sql).bind::<Jsonb, _>(row_json(row))
                                                  .get_result(conn)
                                                  .optional()?;
    inserted.map(JsonRow::into_row).transpose()
}

fn update_row(conn: &mut PgConnection, q: &str, row: &Row) -> std::result::Result<Row, PersistenceError> {
    let pk = row.get(PK_COLUMN)
                .and_then(Value::as_i64)
                .ok_or_else(|| PersistenceError::Decode("stored row without pk".into()))?;
    let cols: Vec<String> = row.keys().filter(|k| k.as_str() != PK_COLUMN).map(|k| quote_ident(k)).collect();
    let list = cols.join(", ");
    let sql = format!("UPDATE {q} AS t SET ({list}) = (SELECT {list} FROM jsonb_populate_record(NULL::{q}, $1)) \
                       WHERE t.{} = $2 RETURNING to_jsonb(t.*) AS row",
                      quote_ident(PK_COLUMN));
    sql_query(sql).bind::<Jsonb, _>(row_json(row))
                  .bind::<BigInt, _>(pk)
                  .get_result::<JsonRow>(conn)?
                  .into_row()
}

impl<P: ConnectionProvider> TableStore for PgTableStore<P> {
    fn introspect(&self, table: &TableRef, sequence: Option<&str>) -> Result<TableState> {
        Ok(with_retry(|| {
               let mut pooled = self.provider.connection()?;
               let conn: &mut PgConnection = &mut pooled;
               let columns: Vec<NameRow> =
                   sql_query("SELECT column_name::text AS name FROM information_schema.columns WHERE table_schema = \
                              $1 AND table_name = $2 ORDER BY ordinal_position").bind::<Text, _>(&table.schema)
                                                                                .bind::<Text, _>(&table.name)
                                                                                .load(conn)?;
               let sequence_exists = match sequence {
                   Some(name) => {
                       let c: CountRow = sql_query("SELECT count(*) AS n FROM pg_class c JOIN pg_namespace ns ON ns.oid \
                                                    = c.relnamespace WHERE c.relkind = 'S' AND ns.nspname = $1 AND \
                                                    c.relname = $2").bind::<Text, _>(&table.schema)
                                                                    .bind::<Text, _>(name)
                                                                    .get_result(conn)?;
                       c.n > 0
                   }
                   None => false,
               };
               if columns.is_empty() {
                   return Ok(TableState { sequence_exists,
                                          ..TableState::missing() });
               }
               let indices: Vec<NameRow> =
                   sql_query("SELECT indexname::text AS name FROM pg_indexes WHERE schemaname = $1 AND tablename = \
                              $2").bind::<Text, _>(&table.schema)
                                  .bind::<Text, _>(&table.name)
                                  .load(conn)?;
               let max_pk: CountRow = sql_query(format!("SELECT COALESCE(max({}), 0)::bigint AS n FROM {}",
                                                        quote_ident(PK_COLUMN),
                                                        table.qualified())).get_result(conn)?;
               Ok(TableState { exists: true,
                               columns: columns.into_iter().map(|r| r.name).collect(),
                               indices: indices.into_iter().map(|r| r.name).collect(),
                               sequence_exists,
                               max_pk: max_pk.n })
           })?)
    }

    fn apply(&self, modification: &SchemaModification) -> Result<()> {
        let lock_key = modification_table(modification).map(ToString::to_string);
        let tx_sql = modification.transaction_sql();
        with_retry(|| {
               let mut pooled = self.provider.connection()?;
               let conn: &mut PgConnection = &mut pooled;
               conn.transaction::<_, PersistenceError, _>(|tx| {
                       if let Some(key) = &lock_key {
                           sql_query("SELECT pg_advisory_xact_lock(hashtext($1))").bind::<Text, _>(key)
                                                                                  .execute(tx)?;
                       }
                       for sql in &tx_sql {
                           tx.batch_execute(sql)?;
                       }
                       Ok(())
                   })?;
               for sql in modification.application_database_sql() {
                   conn.batch_execute(&sql)?;
               }
               // CREATE INDEX CONCURRENTLY no puede ir dentro de una transacción
               for sql in modification.nontransaction_sql() {
                   debug!("apply:nontransaction sql={sql}");
                   conn.batch_execute(&sql)?;
               }
               Ok(())
           })?;
        info!("apply:done table={} statements={}",
              lock_key.as_deref().unwrap_or("-"),
              modification.all_sql().len());
        Ok(())
    }

    fn upsert(&self, request: &UpsertRequest) -> Result<UpsertOutcome> {
        let q = request.table.qualified();
        let lock_key = request.table.to_string();
        let key = quote_ident(&request.key_column);
        let incoming = row_json(&request.row);
        Ok(with_retry(|| {
               let mut pooled = self.provider.connection()?;
               let conn: &mut PgConnection = &mut pooled;
               conn.transaction::<_, PersistenceError, _>(|tx| {
                       let lock: FlagRow =
                           sql_query("SELECT pg_try_advisory_xact_lock_shared(hashtext($1)) AS flag").bind::<Text, _>(&lock_key)
                                                                                                     .get_result(tx)?;
                       if !lock.flag {
                           return Err(PersistenceError::Locked(lock_key.clone()));
                       }
                       let existing: Option<JsonRow> =
                           sql_query(format!("SELECT to_jsonb(t.*) AS row FROM {q} t WHERE t.{key} = (SELECT r.{key} \
                                              FROM jsonb_populate_record(NULL::{q}, $1) r) FOR UPDATE"))
                               .bind::<Jsonb, _>(&incoming)
                               .get_result(tx)
                               .optional()?;
                       let existing = existing.map(JsonRow::into_row).transpose()?;
                       let decision = request.policy.decide(existing.as_ref(), &request.row);
                       let stored = match (&decision, &existing) {
                           (WriteDecision::Insert(row), _) => match insert_row(tx, &q, &request.key_column, row)? {
                               Some(stored) => stored,
                               // otra transacción insertó la misma clave: se repite todo
                               None => return Err(PersistenceError::SerializationConflict),
                           },
                           (WriteDecision::Update(row), _) => update_row(tx, &q, row)?,
                           (WriteDecision::Skip, Some(current)) => current.clone(),
                           (WriteDecision::Skip, None) => {
                               return Err(PersistenceError::Decode("skip decided for a missing row".into()))
                           }
                       };
                       Ok(UpsertOutcome::from_decision(existing.as_ref(), &decision, stored, &request.tracked))
                   })
           })?)
    }

    fn is_migrating(&self, table: &TableRef) -> Result<bool> {
        let lock_key = table.to_string();
        Ok(with_retry(|| {
               let mut pooled = self.provider.connection()?;
               let conn: &mut PgConnection = &mut pooled;
               let got: FlagRow = sql_query("SELECT pg_try_advisory_lock_shared(hashtext($1)) AS flag")
                   .bind::<Text, _>(&lock_key)
                   .get_result(conn)?;
               if got.flag {
                   sql_query("SELECT pg_advisory_unlock_shared(hashtext($1)) AS flag").bind::<Text, _>(&lock_key)
                                                                                       .get_result::<FlagRow>(conn)?;
               }
               Ok(!got.flag)
           })?)
    }

    fn drop_table(&self, table: &TableRef) -> Result<()> {
        let sql = format!("DROP TABLE IF EXISTS {}", table.qualified());
        Ok(with_retry(|| {
               let mut conn = self.provider.connection()?;
               conn.batch_execute(&sql)?;
               Ok(())
           })?)
    }

    fn rows(&self, table: &TableRef) -> Result<Vec<Row>> {
        let sql = format!("SELECT to_jsonb(t.*) AS row FROM {} t ORDER BY t.{}",
                          table.qualified(),
                          quote_ident(PK_COLUMN));
        Ok(with_retry(|| {
               let mut pooled = self.provider.connection()?;
               let conn: &mut PgConnection = &mut pooled;
               let rows: Vec<JsonRow> = sql_query(&sql).load(conn)?;
               rows.into_iter().map(JsonRow::into_row).collect()
           })?)
    }
}
