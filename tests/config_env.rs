use std::time::Duration;

use webhookdb_rust::{build_engine, AppConfig};
use whdb_core::store::InMemoryStores;

#[test]
fn engine_built_from_config_uses_production_registry() {
    let config = AppConfig::from_lookup(|k| match k {
                                            "WHDB_REPLICATION_SCHEMA" => Some("replica".into()),
                                            "WHDB_WORKER_POLL_MS" => Some("10".into()),
                                            _ => None,
                                        });
    assert_eq!(config.worker_poll, Duration::from_millis(10));
    let engine = build_engine(InMemoryStores::new().stores(), &config);
    assert_eq!(engine.context().config.schema, "replica");
    assert_eq!(engine.context().registry.names(), vec!["github_issue_v1"]);
}
