use std::sync::Arc;

use serde_json::json;
use whdb_adapters::{FakeReplicator, Scripted};
use whdb_core::backfill::BackfillRequest;
use whdb_core::errors::ExternalError;
use whdb_core::model::{NewServiceIntegration, OrganizationId};
use whdb_core::{BackfillPage, BackfillStatus, ReplicationEngine};

#[test]
fn scripted_error_then_page_and_reset() {
    let fake = Arc::new(FakeReplicator::fake_v1().with_script(vec![
        Scripted::Error(ExternalError::connection("reset by peer").into()),
        Scripted::Page(BackfillPage::last(vec![json!({"my_id": "a", "at": "2020-01-01T00:00:00Z"})])),
    ]));
    let engine = ReplicationEngine::builder().replicator(fake.clone())
                                             .config(whdb_core::EngineConfig { retry:
                                                                                   whdb_core::RetryPolicy::immediate(2),
                                                                               ..Default::default() })
                                             .build();
    let sint = engine.create_integration(NewServiceIntegration::new(OrganizationId(9), "fake_v1"))
                     .unwrap();
    let job = engine.backfill_now(sint.id, BackfillRequest::default()).unwrap();
    assert_eq!(job.status, BackfillStatus::Done);
    assert_eq!(fake.calls().len(), 2);

    fake.reset();
    assert!(fake.calls().is_empty());
    let job = engine.backfill_now(sint.id, BackfillRequest::default()).unwrap();
    assert_eq!(job.items_upserted, 0, "an exhausted script yields an empty last page");
}
