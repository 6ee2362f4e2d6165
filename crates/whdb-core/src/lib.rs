//! whdb-core: motor genérico de replicación webhook/API -> base de datos.
pub mod backfill;
pub mod column;
pub mod constants;
pub mod engine;
pub mod errors;
pub mod event;
pub mod model;
pub mod replicator;
pub mod schema;
pub mod state_machine;
pub mod store;
pub mod upsert;

pub use backfill::{BackfillJob, BackfillRequest, BackfillStatus, RetryPolicy};
pub use column::{Column, ColumnType, Converter, Defaulter, IndexSpec};
pub use engine::{EngineConfig, ReplicationContext, ReplicationEngine};
pub use errors::{classify_error, ErrorClass, ExternalError, ReplicatorError};
pub use event::{EngineEvent, EventPublisher, InMemoryEventPublisher};
pub use model::{IntegrationId, NewServiceIntegration, OrganizationId, Row, ServiceIntegration, TableRef};
pub use replicator::{BackfillPage, PageRequest, Replicator, ReplicatorDescriptor, ReplicatorRegistry, WebhookRequest,
                     WebhookResponse};
pub use schema::{SchemaChange, SchemaModification, TableState};
pub use state_machine::StateMachineStep;
pub use store::{BackfillJobStore, InMemoryStores, IntegrationStore, Stores, TableStore};
pub use upsert::{UpdatePolicy, UpsertAction, UpsertOutcome};
