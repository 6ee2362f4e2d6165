//! whdb-adapters: replicators concretos y fakes para tests.
pub mod fake;
pub mod github;
pub mod http;
pub mod signature;

use std::sync::Arc;

use whdb_core::replicator::ReplicatorRegistry;

pub use fake::{DependencyUpsert, FakeReplicator, Scripted};
pub use github::GithubIssueReplicator;

/// Registry con los adapters de producción.
pub fn default_registry() -> ReplicatorRegistry {
    ReplicatorRegistry::new().with(Arc::new(GithubIssueReplicator::new()))
}
