//! Modelo de datos del motor: integraciones configuradas y filas replicadas.

mod integration;
mod row;

pub use integration::{new_opaque_id, IntegrationId, NewServiceIntegration, OrganizationId, ServiceIntegration, TableRef};
pub use row::{rows_differ, Row};
