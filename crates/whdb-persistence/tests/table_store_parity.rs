//! Mismo comportamiento que el store en memoria para el ciclo
//! crear tabla -> upsert -> orden por timestamp -> drop.

use std::sync::Arc;

use serde_json::json;
use test_support::{fresh_org, pg_engine, with_pool};
use whdb_adapters::FakeReplicator;
use whdb_core::model::NewServiceIntegration;
use whdb_core::store::TableStore;
use whdb_core::UpsertAction;
use whdb_persistence::{PgTableStore, PoolProvider};

#[test]
fn upsert_follows_update_policy_on_postgres() {
    with_pool(|pool| {
        let engine = pg_engine(pool, vec![Arc::new(FakeReplicator::fake_v1())]);
        let sint = engine.create_integration(NewServiceIntegration::new(fresh_org(), "fake_v1"))
                         .expect("create");
        assert!(engine.plan_all_columns(sint.id).expect("plan").is_empty(),
                "la tabla recién creada ya converge");

        let first = engine.upsert_resource(sint.id, &json!({"my_id": "a", "at": "2016-07-30T21:12:33+00:00"}))
                          .expect("insert");
        assert_eq!(first.action, UpsertAction::Inserted);
        assert!(first.changed);

        let stale = engine.upsert_resource(sint.id, &json!({"my_id": "a", "at": "2015-01-01T00:00:00Z"}))
                          .expect("stale");
        assert_eq!(stale.action, UpsertAction::Skipped);

        let newer = engine.upsert_resource(sint.id, &json!({"my_id": "a", "at": "2017-01-01T00:00:00Z", "x": 1}))
                          .expect("update");
        assert_eq!(newer.action, UpsertAction::Updated);
        assert_eq!(newer.row["pk"], first.row["pk"]);

        let tables = PgTableStore::new(PoolProvider { pool: pool.clone() });
        let table = sint.table("public");
        let rows = tables.rows(&table).expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["data"]["x"], json!(1));
        assert!(!tables.is_migrating(&table).expect("lock check"));

        engine.destroy_integration(sint.id).expect("destroy");
        assert!(!tables.introspect(&table, None).expect("introspect").exists);
    });
}

#[test]
fn added_columns_are_backfilled_from_data() {
    with_pool(|pool| {
        let v1 = pg_engine(pool, vec![Arc::new(FakeReplicator::fake_v1())]);
        let sint = v1.create_integration(NewServiceIntegration::new(fresh_org(), "fake_v1"))
                     .expect("create");
        v1.upsert_resource(sint.id, &json!({"my_id": "b", "at": "2020-01-01T00:00:00Z", "extra": "hola"}))
          .expect("upsert");

        let extended =
            FakeReplicator::fake_v1().with_column(whdb_core::Column::new("extra", whdb_core::ColumnType::Text));
        let v2 = pg_engine(pool, vec![Arc::new(extended)]);
        let modification = v2.ensure_all_columns(sint.id).expect("ensure");
        assert!(!modification.is_empty());

        let tables = PgTableStore::new(PoolProvider { pool: pool.clone() });
        let rows = tables.rows(&sint.table("public")).expect("rows");
        assert_eq!(rows[0]["extra"], json!("hola"));
        assert!(v2.plan_all_columns(sint.id).expect("plan").is_empty());
        v2.destroy_integration(sint.id).expect("destroy");
    });
}
