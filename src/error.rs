//! Errores del proceso worker.
use thiserror::Error;
use whdb_core::ReplicatorError;
use whdb_persistence::PersistenceError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Error de persistencia: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("Error del motor: {0}")]
    Engine(#[from] ReplicatorError),
}
