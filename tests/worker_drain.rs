use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use webhookdb_rust::{build_engine_with, AppConfig, Worker};
use whdb_adapters::FakeReplicator;
use whdb_core::backfill::BackfillRequest;
use whdb_core::errors::ExternalError;
use whdb_core::model::{NewServiceIntegration, OrganizationId};
use whdb_core::store::{BackfillJobStore, InMemoryStores, TableStore};
use whdb_core::{BackfillStatus, ReplicatorRegistry};

fn worker(mem: &InMemoryStores, registry: ReplicatorRegistry) -> Worker {
    let config = AppConfig { backfill_backoff: Duration::ZERO,
                             ..AppConfig::default() };
    Worker::new(build_engine_with(mem.stores(), registry, &config), Duration::from_millis(1))
}

#[test]
fn drain_runs_parent_and_cascaded_children() {
    let parent = Arc::new(FakeReplicator::fake_v1().with_pages(vec![vec![json!({"my_id": "a",
                                                                                  "at": "2020-01-01T00:00:00Z"})]]));
    let child = Arc::new(FakeReplicator::fake_v1().named("fake_child_v1").depending_on("fake_v1"));
    let mem = InMemoryStores::new();
    let w = worker(&mem, ReplicatorRegistry::new().with(parent.clone()).with(child.clone()));

    let org = OrganizationId(4);
    let p = w.engine().create_integration(NewServiceIntegration::new(org, "fake_v1")).unwrap();
    let c = w.engine()
             .create_integration(NewServiceIntegration::new(org, "fake_child_v1").depends_on(p.id))
             .unwrap();
    let root = w.engine().enqueue_backfill(p.id, BackfillRequest::default()).unwrap();

    let report = w.drain();
    assert_eq!(report.done.len(), 2);
    assert!(report.failed.is_empty());
    assert_eq!(report.done[0], root.id);
    assert_eq!(child.calls().len(), 1);
    assert_eq!(mem.tables.rows(&p.table("public")).unwrap().len(), 1);
    assert!(w.engine().integration(c.id).unwrap().last_backfilled_at.is_some());
    assert!(w.run_once().unwrap().is_none());
}

#[test]
fn handled_failures_are_reported_and_the_worker_moves_on() {
    let fake = Arc::new(FakeReplicator::fake_v1());
    fake.push_error(ExternalError::status(401, "bad key").into());
    let mem = InMemoryStores::new();
    let w = worker(&mem, ReplicatorRegistry::new().with(fake.clone()));
    let sint = w.engine()
                .create_integration(NewServiceIntegration::new(OrganizationId(4), "fake_v1"))
                .unwrap();
    let failing = w.engine()
                   .enqueue_backfill(sint.id, BackfillRequest::default().recursive(false))
                   .unwrap();
    let ok = w.engine()
              .enqueue_backfill(sint.id, BackfillRequest::default().recursive(false))
              .unwrap();

    let report = w.drain();
    assert_eq!(report.failed, vec![failing.id]);
    assert_eq!(report.done, vec![ok.id]);
    assert_eq!(mem.jobs.get(failing.id).unwrap().status, BackfillStatus::Error);
    assert_eq!(report.total(), 2);
}

#[test]
fn jobs_hitting_a_migrating_table_go_back_to_the_queue() {
    let fake = Arc::new(FakeReplicator::fake_v1().with_pages(vec![vec![json!({"my_id": "a",
                                                                                "at": "2020-01-01T00:00:00Z"})]]));
    let mem = InMemoryStores::new();
    let w = worker(&mem, ReplicatorRegistry::new().with(fake.clone()));
    let sint = w.engine()
                .create_integration(NewServiceIntegration::new(OrganizationId(4), "fake_v1"))
                .unwrap();
    let job = w.engine()
               .enqueue_backfill(sint.id, BackfillRequest::default().recursive(false))
               .unwrap();
    let table = sint.table("public");
    mem.tables.set_migrating(&table, true).unwrap();

    let err = w.run_once().unwrap_err();
    assert!(err.to_string().contains("migrat"), "{err}");
    assert_eq!(mem.jobs.get(job.id).unwrap().status, BackfillStatus::Pending);

    mem.tables.set_migrating(&table, false).unwrap();
    fake.push_page(whdb_core::BackfillPage::last(vec![json!({"my_id": "a", "at": "2020-01-01T00:00:00Z"})]));
    let report = w.drain();
    assert_eq!(report.done, vec![job.id]);
    assert_eq!(mem.tables.rows(&table).unwrap().len(), 1);
}
