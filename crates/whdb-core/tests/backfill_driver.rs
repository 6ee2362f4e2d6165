mod test_support;

use std::sync::Arc;

use serde_json::json;
use test_support::{config, harness, harness_with};
use whdb_adapters::FakeReplicator;
use whdb_core::backfill::BackfillRequest;
use whdb_core::errors::ExternalError;
use whdb_core::event::EngineEvent;
use whdb_core::store::{BackfillJobStore, InMemoryStores};
use whdb_core::{BackfillStatus, EngineConfig, ReplicatorError};

fn item(id: &str) -> serde_json::Value {
    json!({"my_id": id, "at": "2020-01-01T00:00:00Z"})
}

#[test]
fn pages_are_fetched_until_the_token_runs_out() {
    let fake = Arc::new(FakeReplicator::fake_v1().with_pages(vec![vec![item("a"), item("b")],
                                                                  vec![item("c"), item("d")]]));
    let h = harness(vec![fake.clone()]);
    let sint = h.create("fake_v1");
    let job = h.engine.backfill_now(sint.id, BackfillRequest::default()).unwrap();

    assert_eq!(job.status, BackfillStatus::Done);
    assert_eq!(job.pages_fetched, 2);
    assert_eq!(job.items_upserted, 4);
    let calls = fake.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].token, None);
    assert_eq!(calls[1].token, Some(json!("page-2")));
    assert_eq!(h.rows(&sint).len(), 4);
    assert!(h.engine.integration(sint.id).unwrap().last_backfilled_at.is_some());
}

#[test]
fn second_backfill_is_incremental() {
    let fake = Arc::new(FakeReplicator::fake_v1());
    let h = harness(vec![fake.clone()]);
    let sint = h.create("fake_v1");
    h.engine.backfill_now(sint.id, BackfillRequest::default()).unwrap();
    let sint = h.engine.integration(sint.id).unwrap();
    let job = h.engine
               .backfill_now(sint.id, BackfillRequest::for_integration(&sint))
               .unwrap();
    assert!(job.incremental);
    let calls = fake.calls();
    assert_eq!(calls[0].last_backfilled_at, None);
    assert_eq!(calls[1].last_backfilled_at, sint.last_backfilled_at);
}

#[test]
fn regression_mode_fetches_exactly_one_page() {
    let fake = Arc::new(FakeReplicator::fake_v1().with_pages(vec![vec![item("a")], vec![item("b")], vec![item("c")]]));
    let cfg = EngineConfig { regression_mode: true,
                             ..config() };
    let h = harness_with(InMemoryStores::new(), vec![fake.clone()], cfg);
    let sint = h.create("fake_v1");
    let job = h.engine.backfill_now(sint.id, BackfillRequest::default()).unwrap();
    assert_eq!(job.status, BackfillStatus::Done);
    assert_eq!(fake.calls().len(), 1);
    assert_eq!(h.rows(&sint).len(), 1);
}

#[test]
fn recursive_backfill_cascades_one_child_per_dependent() {
    let h = harness(vec![Arc::new(FakeReplicator::fake_v1()),
                         Arc::new(FakeReplicator::dependent()),
                         Arc::new(FakeReplicator::webhooks_only().named("fake_child_webhooks_v1")
                                                                .depending_on("fake_v1"))]);
    let parent = h.create("fake_v1");
    let parent = h.set_secret(&parent, "backfill_secret", "key");
    let c1 = h.create_child("fake_dependent_v1", &parent);
    let c2 = h.create_child("fake_dependent_v1", &parent);
    h.create_child("fake_child_webhooks_v1", &parent);

    let job = h.engine.backfill_now(parent.id, BackfillRequest::default()).unwrap();
    let children = h.mem.jobs.children_of(job.id).unwrap();
    assert_eq!(children.len(), 2);
    let mut ids: Vec<_> = children.iter().map(|c| c.service_integration_id).collect();
    ids.sort();
    assert_eq!(ids, vec![c1.id, c2.id]);
    assert!(children.iter().all(|c| c.recursive && c.parent_job_id == Some(job.id)));

    let runs = h.mem.events.named("backfilljob.run");
    assert_eq!(runs.len(), 2, "root job runs inline, each child is enqueued");

    // los hijos usan las credenciales del padre
    for child in children {
        let done = h.engine.run_backfill_job(child.id, true).unwrap();
        assert_eq!(done.status, BackfillStatus::Done);
    }
}

#[test]
fn non_recursive_or_unenqueued_backfill_does_not_cascade() {
    let h = harness(vec![Arc::new(FakeReplicator::fake_v1()), Arc::new(FakeReplicator::dependent())]);
    let parent = h.create("fake_v1");
    h.create_child("fake_dependent_v1", &parent);

    let a = h.engine
             .backfill_now(parent.id, BackfillRequest::default().recursive(false))
             .unwrap();
    let b = h.engine
             .backfill_now(parent.id, BackfillRequest::default().enqueue(false))
             .unwrap();
    assert!(h.mem.jobs.children_of(a.id).unwrap().is_empty());
    assert!(h.mem.jobs.children_of(b.id).unwrap().is_empty());
    assert!(h.mem.events.named("backfilljob.run").is_empty());
}

#[test]
fn enqueue_publishes_a_run_event() {
    let h = harness(vec![Arc::new(FakeReplicator::fake_v1())]);
    let sint = h.create("fake_v1");
    let job = h.engine.enqueue_backfill(sint.id, BackfillRequest::default()).unwrap();
    assert_eq!(job.status, BackfillStatus::Pending);
    assert_eq!(h.mem.events.named("backfilljob.run"),
               vec![EngineEvent::BackfillJobRun { job_id: job.id }]);
    let claimed = h.mem.jobs.claim_next_pending().unwrap().unwrap();
    assert_eq!(claimed.id, job.id);
}

#[test]
fn webhook_only_backfill_is_an_invariant_violation() {
    let h = harness(vec![Arc::new(FakeReplicator::webhooks_only())]);
    let sint = h.create("fake_webhooks_only_v1");
    let err = h.engine
               .enqueue_backfill(sint.id, BackfillRequest::default())
               .unwrap_err();
    assert!(matches!(err, ReplicatorError::Invariant(_)), "{err:?}");
}

#[test]
fn auth_failure_marks_credentials_invalid() {
    let fake = Arc::new(FakeReplicator::fake_v1());
    fake.push_error(ExternalError::status(401, "bad key").into());
    let h = harness(vec![fake.clone()]);
    let sint = h.create("fake_v1");
    let job = h.engine.backfill_now(sint.id, BackfillRequest::default()).unwrap();

    assert_eq!(job.status, BackfillStatus::Error);
    assert_eq!(job.failure_reason.as_deref(), Some("credentials invalid"));
    assert_eq!(fake.calls().len(), 1, "auth failures are not retried");
    let failed = h.mem.events.named("backfilljob.failed");
    assert_eq!(failed.len(), 1);
    assert!(h.mem.events.named("developeralert.emitted").is_empty());
    assert!(h.engine.integration(sint.id).unwrap().last_backfilled_at.is_none());
}

#[test]
fn exhausted_transient_errors_emit_a_developer_alert() {
    let fake = Arc::new(FakeReplicator::fake_v1());
    for _ in 0..3 {
        fake.push_error(ExternalError::status(503, "unavailable").into());
    }
    let h = harness(vec![fake.clone()]);
    let sint = h.create("fake_v1");
    let job = h.engine.backfill_now(sint.id, BackfillRequest::default()).unwrap();

    assert_eq!(job.status, BackfillStatus::Error);
    assert_eq!(fake.calls().len(), 3);
    let alerts = h.mem.events.named("developeralert.emitted");
    assert_eq!(alerts.len(), 1);
    match &alerts[0] {
        EngineEvent::DeveloperAlertEmitted { subsystem, fields, .. } => {
            assert_eq!(subsystem, "Backfill Error");
            assert_eq!(fields["transient"], json!(true));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn transient_error_then_success_recovers() {
    let fake = Arc::new(FakeReplicator::fake_v1());
    fake.push_error(ExternalError::timeout("slow").into());
    fake.push_page(whdb_core::BackfillPage::last(vec![item("z")]));
    let h = harness(vec![fake.clone()]);
    let sint = h.create("fake_v1");
    let job = h.engine.backfill_now(sint.id, BackfillRequest::default()).unwrap();
    assert_eq!(job.status, BackfillStatus::Done);
    assert_eq!(job.items_upserted, 1);
}

#[test]
fn expected_provider_error_is_treated_as_empty() {
    let fake = Arc::new(FakeReplicator::fake_v1().treating_status_as_empty(402));
    fake.push_error(ExternalError::status(402, "upgrade your plan").into());
    let h = harness(vec![fake]);
    let sint = h.create("fake_v1");
    let job = h.engine.backfill_now(sint.id, BackfillRequest::default()).unwrap();
    assert_eq!(job.status, BackfillStatus::Done);
    assert_eq!(job.items_upserted, 0);
    assert!(h.mem.events.published().is_empty());
}

#[test]
fn dependent_without_parent_credentials_fails_softly() {
    let h = harness(vec![Arc::new(FakeReplicator::fake_v1()), Arc::new(FakeReplicator::dependent())]);
    let parent = h.create("fake_v1");
    let child = h.create_child("fake_dependent_v1", &parent);
    let job = h.engine.backfill_now(child.id, BackfillRequest::default()).unwrap();
    assert_eq!(job.status, BackfillStatus::Error);
    assert_eq!(h.mem.events.named("developeralert.emitted").len(), 1);
}

#[test]
fn terminal_jobs_are_not_rerun() {
    let fake = Arc::new(FakeReplicator::fake_v1());
    let h = harness(vec![fake.clone()]);
    let sint = h.create("fake_v1");
    let job = h.engine.backfill_now(sint.id, BackfillRequest::default()).unwrap();
    let again = h.engine.run_backfill_job(job.id, true).unwrap();
    assert_eq!(again, job);
    assert_eq!(fake.calls().len(), 1);
}

#[test]
fn migrating_table_requeues_the_job_without_alerting() {
    let fake = Arc::new(FakeReplicator::fake_v1().with_pages(vec![vec![item("a")], vec![item("b")]]));
    let h = harness(vec![fake.clone()]);
    let sint = h.create("fake_v1");
    let table = sint.table("public");
    h.mem.tables.set_migrating(&table, true).unwrap();

    let err = h.engine.backfill_now(sint.id, BackfillRequest::default()).unwrap_err();
    assert!(matches!(err, ReplicatorError::MigrationInProgress(_)), "{err:?}");
    assert!(err.is_retryable());
    assert!(h.mem.events.named("developeralert.emitted").is_empty());

    let pending = h.mem.jobs.claim_next_pending().unwrap().expect("job back in the queue");
    assert_eq!(pending.pages_fetched, 0);
    assert!(pending.failure_reason.is_none());

    h.mem.tables.set_migrating(&table, false).unwrap();
    fake.reset();
    fake.push_page(whdb_core::BackfillPage::new(vec![item("a")], Some(json!("page-2"))));
    fake.push_page(whdb_core::BackfillPage::last(vec![item("b")]));
    let done = h.engine.run_backfill_job(pending.id, true).unwrap();
    assert_eq!(done.status, BackfillStatus::Done);
    assert_eq!(done.items_upserted, 2);
    assert_eq!(h.rows(&sint).len(), 2);
}
