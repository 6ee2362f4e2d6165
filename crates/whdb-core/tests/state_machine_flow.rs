mod test_support;

use std::sync::Arc;

use test_support::{fake, harness, ORG};
use whdb_adapters::FakeReplicator;
use whdb_core::errors::ExternalError;
use whdb_core::model::NewServiceIntegration;
use whdb_core::{BackfillStatus, ReplicatorError};

#[test]
fn webhook_setup_terminates_after_the_secret() {
    let h = harness(vec![fake()]);
    let sint = h.create("fake_v1");

    let step = h.engine.calculate_webhook_state_machine(sint.id).unwrap();
    assert!(step.needs_input);
    assert!(step.prompt_is_secret);
    assert_eq!(step.field(), Some("webhook_secret"));
    assert_eq!(step.post_to_url,
               Some(format!("/v1/service_integrations/{}/transition/webhook_secret", sint.opaque_id)));

    let done = h.engine.process_state_change(sint.id, "webhook_secret", "  whsec_abc  ").unwrap();
    assert!(done.complete);
    assert!(done.successful());
    assert_eq!(h.engine.integration(sint.id).unwrap().webhook_secret.as_deref(),
               Some("whsec_abc"));
}

#[test]
fn backfill_setup_enqueues_a_non_recursive_job() {
    let h = harness(vec![fake()]);
    let sint = h.create("fake_v1");
    let step = h.engine.calculate_backfill_state_machine(sint.id).unwrap();
    assert_eq!(step.field(), Some("backfill_secret"));

    let done = h.engine.process_state_change(sint.id, "backfill_secret", "key").unwrap();
    assert!(done.successful());
    let jobs = h.mem.jobs.all();
    assert_eq!(jobs.len(), 1);
    assert!(!jobs[0].recursive);
    assert_eq!(jobs[0].status, BackfillStatus::Pending);
    assert_eq!(h.mem.events.named("backfilljob.run").len(), 1);
}

#[test]
fn backfill_only_service_asks_key_then_secret_and_verifies() {
    let replicator = Arc::new(FakeReplicator::backfill_only());
    let h = harness(vec![replicator.clone()]);
    let sint = h.create("fake_backfill_only_v1");

    // sin webhooks, la máquina de webhooks delega en la de backfill
    let step = h.engine.calculate_webhook_state_machine(sint.id).unwrap();
    assert_eq!(step.field(), Some("backfill_key"));
    let preferred = h.engine.calculate_preferred_create_state_machine(sint.id).unwrap();
    assert_eq!(preferred, step);

    let step = h.engine.process_state_change(sint.id, "backfill_key", "my key").unwrap();
    assert_eq!(step.error_code.as_deref(), Some("invalid_value"));
    assert_eq!(step.field(), Some("backfill_key"));

    let step = h.engine.process_state_change(sint.id, "backfill_key", "key").unwrap();
    assert_eq!(step.field(), Some("backfill_secret"));
    assert!(step.prompt_is_secret);

    let done = h.engine.process_state_change(sint.id, "backfill_secret", "secret").unwrap();
    assert!(done.successful());
    assert_eq!(replicator.calls().len(), 1, "credentials were verified once");
    assert_eq!(h.mem.jobs.all().len(), 1);
}

#[test]
fn rejected_credentials_are_cleared() {
    let replicator = Arc::new(FakeReplicator::backfill_only());
    replicator.push_error(ExternalError::status(401, "nope").into());
    let h = harness(vec![replicator]);
    let sint = h.create("fake_backfill_only_v1");
    h.engine.process_state_change(sint.id, "backfill_key", "key").unwrap();
    let step = h.engine.process_state_change(sint.id, "backfill_secret", "secret").unwrap();

    assert_eq!(step.error_code.as_deref(), Some("invalid_credentials"));
    assert_eq!(step.field(), Some("backfill_key"));
    let sint = h.engine.integration(sint.id).unwrap();
    assert!(sint.backfill_key.is_none() && sint.backfill_secret.is_none());
    assert!(h.mem.jobs.all().is_empty());
}

#[test]
fn unknown_field_is_a_precondition_error() {
    let h = harness(vec![fake()]);
    let sint = h.create("fake_v1");
    let err = h.engine.process_state_change(sint.id, "organization_id", "2").unwrap_err();
    assert!(matches!(err, ReplicatorError::Precondition(_)), "{err:?}");
}

#[test]
fn dependency_without_candidates_completes_with_error_code() {
    let h = harness(vec![fake(), Arc::new(FakeReplicator::dependent())]);
    let child = h.engine
                 .create_integration(NewServiceIntegration::new(ORG, "fake_dependent_v1"))
                 .unwrap();
    let step = h.engine.calculate_preferred_create_state_machine(child.id).unwrap();
    assert!(step.complete);
    assert_eq!(step.error_code.as_deref(), Some("no_candidate_dependency"));
    assert!(!step.successful());

    let err = h.engine
               .process_state_change(child.id, "dependency_choice", "1")
               .unwrap_err();
    assert!(matches!(err, ReplicatorError::Precondition(_)), "{err:?}");
}

#[test]
fn dependency_choice_selects_a_candidate() {
    let h = harness(vec![fake(), Arc::new(FakeReplicator::dependent())]);
    let p1 = h.create("fake_v1");
    let p2 = h.create("fake_v1");
    let child = h.engine
                 .create_integration(NewServiceIntegration::new(ORG, "fake_dependent_v1"))
                 .unwrap();

    let step = h.engine.calculate_preferred_create_state_machine(child.id).unwrap();
    assert_eq!(step.field(), Some("dependency_choice"));
    assert!(step.output.contains(&p1.opaque_id) && step.output.contains(&p2.opaque_id));

    for bad in ["0", "3", "abc"] {
        let retry = h.engine.process_state_change(child.id, "dependency_choice", bad).unwrap();
        assert_eq!(retry.error_code.as_deref(), Some("invalid_dependency_choice"), "value={bad}");
    }
    let next = h.engine.process_state_change(child.id, "dependency_choice", "2").unwrap();
    assert_eq!(h.engine.integration(child.id).unwrap().depends_on, Some(p2.id));
    assert_eq!(next.field(), Some("webhook_secret"));

    assert_eq!(h.engine.find_dependent(p2.id, "fake_dependent_v1").unwrap().map(|s| s.id),
               Some(child.id));
    assert!(h.engine.find_dependent(p1.id, "fake_dependent_v1").unwrap().is_none());
    assert!(h.engine.find_dependent_required(p1.id, "fake_dependent_v1").is_err());
}

#[test]
fn blank_dependency_choice_picks_the_first() {
    let h = harness(vec![fake(), Arc::new(FakeReplicator::dependent())]);
    let p1 = h.create("fake_v1");
    let child = h.engine
                 .create_integration(NewServiceIntegration::new(ORG, "fake_dependent_v1"))
                 .unwrap();
    h.engine.process_state_change(child.id, "dependency_choice", "").unwrap();
    assert_eq!(h.engine.integration(child.id).unwrap().depends_on, Some(p1.id));
}

#[test]
fn cycles_are_rejected() {
    let chained = FakeReplicator::fake_v1().named("fake_chain_v1").depending_on("fake_chain_v1");
    let h = harness(vec![Arc::new(chained)]);
    let a = h.create("fake_chain_v1");
    let b = h.create("fake_chain_v1");
    h.engine.set_dependency(b.id, a.id).unwrap();
    let err = h.engine.set_dependency(a.id, b.id).unwrap_err();
    assert!(matches!(err, ReplicatorError::Precondition(_)), "{err:?}");
}
