
use std::sync::Arc;

use test_support::{fresh_org, pg_engine, with_pool};
use whdb_adapters::FakeReplicator;
use whdb_core::backfill::{BackfillJob, BackfillRequest};
use whdb_core::event::{EngineEvent, EventPublisher};
use whdb_core::model::{NewServiceIntegration, OrganizationId};
use whdb_core::store::{BackfillJobStore, IntegrationStore};
use whdb_core::BackfillStatus;
use whdb_persistence::{PgBackfillJobStore, PgEventPublisher, PgIntegrationStore, PoolProvider};

#[test]
fn integration_round_trip_and_dependents() {
    with_pool(|pool| {
        let store = PgIntegrationStore::new(PoolProvider { pool: pool.clone() });
        let org = fresh_org();
        let parent = store.create(&NewServiceIntegration::new(org, "fake_v1")).expect("parent");
        let child = store.create(&NewServiceIntegration::new(org, "fake_dependent_v1").depends_on(parent.id))
                         .expect("child");
        assert!(parent.opaque_id.starts_with("svi_"));

        let mut edited = parent.clone();
        edited.webhook_secret = Some("s".into());
        store.save(&edited).expect("save");
        let found = store.find_by_opaque_id(&parent.opaque_id).expect("find").expect("exists");
        assert_eq!(found.webhook_secret(), Some("s"));

        edited.webhook_secret = None;
        store.save(&edited).expect("clear");
        assert_eq!(store.get(parent.id).expect("get").webhook_secret, None);

        let deps = store.dependents_of(parent.id).expect("dependents");
        assert_eq!(deps.iter().map(|d| d.id).collect::<Vec<_>>(), vec![child.id]);
        assert_eq!(store.list_for_organization(org).expect("list").len(), 2);
        assert!(store.list_for_organization(OrganizationId(-1)).expect("list").is_empty());

        store.delete(child.id).expect("delete child");
        store.delete(parent.id).expect("delete parent");
        assert!(store.find(parent.id).expect("find").is_none());
    });
}

#[test]
fn jobs_are_claimed_once() {
    with_pool(|pool| {
        let provider = PoolProvider { pool: pool.clone() };
        let sints = PgIntegrationStore::new(provider.clone());
        let jobs = PgBackfillJobStore::new(provider);
        let sint = sints.create(&NewServiceIntegration::new(fresh_org(), "fake_v1")).expect("sint");

        let parent = BackfillJob::new(sint.id, &BackfillRequest::default());
        jobs.create(&parent).expect("create");
        let child = BackfillJob::child_of(&parent, sint.id);
        jobs.create(&child).expect("create child");
        assert_eq!(jobs.children_of(parent.id).expect("children").len(), 1);

        // Reclama hasta agotar: cada job pendiente sale una sola vez.
        let mut claimed = Vec::new();
        while let Some(job) = jobs.claim_next_pending().expect("claim") {
            assert_eq!(job.status, BackfillStatus::Fetching);
            assert!(job.started_at.is_some());
            claimed.push(job.id);
        }
        assert!(claimed.contains(&parent.id));
        assert!(claimed.contains(&child.id));
        assert_eq!(claimed.iter().filter(|id| **id == parent.id).count(), 1);

        let mut done = jobs.get(parent.id).expect("get");
        done.pages_fetched = 3;
        done.fail("credentials invalid");
        jobs.save(&done).expect("save");
        let stored = jobs.get(parent.id).expect("reload");
        assert_eq!(stored.status, BackfillStatus::Error);
        assert_eq!(stored.failure_reason.as_deref(), Some("credentials invalid"));
        assert_eq!(stored.pages_fetched, 3);

        sints.delete(sint.id).expect("cascade");
        assert!(jobs.find(child.id).expect("find").is_none());
    });
}

#[test]
fn published_events_land_in_outbox() {
    with_pool(|pool| {
        let bus = PgEventPublisher::new(PoolProvider { pool: pool.clone() });
        let before = bus.since(0).expect("since").last().map(|e| e.seq).unwrap_or(0);
        let job_id = uuid::Uuid::new_v4();
        bus.publish(EngineEvent::BackfillJobRun { job_id }).expect("publish");
        let rows = bus.since(before).expect("since");
        let mine = rows.iter()
                       .find(|r| r.payload["job_id"] == serde_json::json!(job_id))
                       .expect("event stored");
        assert_eq!(mine.name, "backfilljob.run");
    });
}

#[test]
fn backfill_runs_end_to_end_on_postgres() {
    with_pool(|pool| {
        let fake = Arc::new(FakeReplicator::fake_v1().with_pages(vec![
            vec![serde_json::json!({"my_id": "p1", "at": "2020-01-01T00:00:00Z"})],
            vec![serde_json::json!({"my_id": "p2", "at": "2020-01-02T00:00:00Z"})],
        ]));
        let engine = pg_engine(pool, vec![fake.clone()]);
        let sint = engine.create_integration(NewServiceIntegration::new(fresh_org(), "fake_v1"))
                         .expect("create");
        let job = engine.backfill_now(sint.id, BackfillRequest::default()).expect("backfill");
        assert_eq!(job.status, BackfillStatus::Done);
        assert_eq!(job.items_upserted, 2);
        assert_eq!(fake.calls().len(), 2);
        assert!(engine.integration(sint.id).expect("reload").last_backfilled_at.is_some());
        engine.destroy_integration(sint.id).expect("destroy");
    });
}
