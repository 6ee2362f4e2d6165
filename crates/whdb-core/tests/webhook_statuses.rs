mod test_support;

use std::sync::Arc;

use serde_json::json;
use test_support::{config, fake, harness, harness_with};
use whdb_adapters::FakeReplicator;
use whdb_core::column::{Column, ColumnType};
use whdb_core::replicator::{WebhookRequest, DEFAULT_SECRET_HEADER};

fn signed(body: serde_json::Value, secret: &str) -> WebhookRequest {
    WebhookRequest::json(&body).header(DEFAULT_SECRET_HEADER, secret)
}

#[test]
fn accepted_webhook_is_upserted() {
    let h = harness(vec![fake()]);
    let sint = h.create("fake_v1");
    let sint = h.set_secret(&sint, "webhook_secret", "s");
    let resp = h.engine
                .handle_webhook(&sint.opaque_id,
                                &signed(json!({"my_id": "w1", "at": "2021-05-05T10:00:00Z"}), "s"))
                .unwrap();
    assert_eq!(resp.status, 202);
    assert_eq!(resp.body, json!({"o": "k"}));
    assert_eq!(h.rows(&sint).len(), 1);
}

#[test]
fn older_webhook_is_accepted_and_leaves_the_row_alone() {
    let h = harness(vec![fake()]);
    let sint = h.create("fake_v1");
    let sint = h.set_secret(&sint, "webhook_secret", "s");
    let newer = json!({"my_id": "abc", "at": "Thu, 30 Jul 2015 21:12:33 +0000"});
    assert_eq!(h.engine.handle_webhook(&sint.opaque_id, &signed(newer.clone(), "s")).unwrap().status, 202);
    let older = json!({"my_id": "abc", "at": "Thu, 30 Jul 2014 21:12:33 +0000"});
    assert_eq!(h.engine.handle_webhook(&sint.opaque_id, &signed(older, "s")).unwrap().status, 202);
    let rows = h.rows(&sint);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["at"], json!("2015-07-30T21:12:33+00:00"));
    assert_eq!(rows[0]["data"]["at"], newer["at"]);
}

#[test]
fn missing_secret_configuration_is_409() {
    let h = harness(vec![fake()]);
    let sint = h.create("fake_v1");
    let resp = h.engine
                .handle_webhook(&sint.opaque_id, &signed(json!({"my_id": "x"}), "s"))
                .unwrap();
    assert_eq!(resp.status, 409);
}

#[test]
fn wrong_secret_is_401_and_nothing_is_written() {
    let h = harness(vec![fake()]);
    let sint = h.create("fake_v1");
    let sint = h.set_secret(&sint, "webhook_secret", "s");
    let body = json!({"my_id": "x", "at": "2021-05-05T10:00:00Z"});
    assert_eq!(h.engine.handle_webhook(&sint.opaque_id, &signed(body.clone(), "t")).unwrap().status, 401);
    assert_eq!(h.engine
                .handle_webhook(&sint.opaque_id, &WebhookRequest::json(&body))
                .unwrap()
                .status,
               401);
    assert!(h.rows(&sint).is_empty());
}

#[test]
fn malformed_payload_is_400() {
    let h = harness(vec![fake()]);
    let sint = h.create("fake_v1");
    let sint = h.set_secret(&sint, "webhook_secret", "s");
    let not_json = WebhookRequest::new("{nope").header(DEFAULT_SECRET_HEADER, "s");
    assert_eq!(h.engine.handle_webhook(&sint.opaque_id, &not_json).unwrap().status, 400);
    let no_key = signed(json!({"at": "2021-05-05T10:00:00Z"}), "s");
    assert_eq!(h.engine.handle_webhook(&sint.opaque_id, &no_key).unwrap().status, 400);
}

#[test]
fn migrating_table_is_503() {
    let h = harness(vec![fake()]);
    let sint = h.create("fake_v1");
    let sint = h.set_secret(&sint, "webhook_secret", "s");
    h.mem.tables.set_migrating(&sint.table("public"), true).unwrap();
    let resp = h.engine
                .handle_webhook(&sint.opaque_id,
                                &signed(json!({"my_id": "m", "at": "2021-05-05T10:00:00Z"}), "s"))
                .unwrap();
    assert_eq!(resp.status, 503);
    h.mem.tables.set_migrating(&sint.table("public"), false).unwrap();
    assert!(h.rows(&sint).is_empty());
}

#[test]
fn unknown_integration_is_404_and_backfill_only_is_405() {
    let h = harness(vec![Arc::new(FakeReplicator::backfill_only())]);
    assert_eq!(h.engine
                .handle_webhook("svi_missing", &WebhookRequest::json(&json!({})))
                .unwrap()
                .status,
               404);
    let sint = h.create("fake_backfill_only_v1");
    assert_eq!(h.engine
                .handle_webhook(&sint.opaque_id, &WebhookRequest::json(&json!({})))
                .unwrap()
                .status,
               405);
}

#[test]
fn webhook_migrates_columns_added_by_the_adapter() {
    let h = harness(vec![fake()]);
    let sint = h.create("fake_v1");
    let sint = h.set_secret(&sint, "webhook_secret", "s");
    let v2 = FakeReplicator::fake_v1().with_column(Column::new("name", ColumnType::Text).optional());
    let h2 = harness_with(h.mem.clone(), vec![Arc::new(v2)], config());
    let resp = h2.engine
                 .handle_webhook(&sint.opaque_id,
                                 &signed(json!({"my_id": "n", "at": "2021-05-05T10:00:00Z", "name": "neo"}), "s"))
                 .unwrap();
    assert_eq!(resp.status, 202);
    let rows = h2.rows(&sint);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], json!("neo"));
    assert!(h2.engine.plan_all_columns(sint.id).unwrap().is_empty());
}
