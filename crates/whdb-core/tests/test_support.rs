#![allow(dead_code)]
//! Harness compartido: engine en memoria con fakes registrados.
use std::sync::Arc;

use whdb_adapters::FakeReplicator;
use whdb_core::backfill::RetryPolicy;
use whdb_core::model::{NewServiceIntegration, OrganizationId, Row, ServiceIntegration};
use whdb_core::store::InMemoryStores;
use whdb_core::{EngineConfig, ReplicationEngine, Replicator};

pub const ORG: OrganizationId = OrganizationId(1);

pub struct Harness {
    pub engine: ReplicationEngine,
    pub mem: InMemoryStores,
}

pub fn config() -> EngineConfig {
    EngineConfig { retry: RetryPolicy::immediate(3),
                   ..EngineConfig::default() }
}

pub fn harness(replicators: Vec<Arc<dyn Replicator>>) -> Harness {
    harness_with(InMemoryStores::new(), replicators, config())
}

pub fn harness_with(mem: InMemoryStores, replicators: Vec<Arc<dyn Replicator>>, config: EngineConfig) -> Harness {
    let mut builder = ReplicationEngine::builder().stores(mem.stores()).config(config);
    for r in replicators {
        builder = builder.replicator(r);
    }
    Harness { engine: builder.build(),
              mem }
}

impl Harness {
    pub fn create(&self, service: &str) -> ServiceIntegration {
        self.engine
            .create_integration(NewServiceIntegration::new(ORG, service))
            .expect("create_integration")
    }

    pub fn create_child(&self, service: &str, parent: &ServiceIntegration) -> ServiceIntegration {
        self.engine
            .create_integration(NewServiceIntegration::new(ORG, service).depends_on(parent.id))
            .expect("create_integration child")
    }

    pub fn rows(&self, sint: &ServiceIntegration) -> Vec<Row> {
        use whdb_core::store::TableStore;
        self.mem
            .tables
            .rows(&sint.table(&self.engine.context().config.schema))
            .expect("rows")
    }

    pub fn set_secret(&self, sint: &ServiceIntegration, field: &str, value: &str) -> ServiceIntegration {
        use whdb_core::store::IntegrationStore;
        let mut s = self.engine.integration(sint.id).expect("integration");
        s.set_field(field, value.to_string());
        self.mem.integrations.save(&s).expect("save");
        s
    }
}

pub fn fake() -> Arc<FakeReplicator> {
    Arc::new(FakeReplicator::fake_v1())
}
