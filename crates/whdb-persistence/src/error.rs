//! Errores de persistencia.
//! Mapea errores de Diesel / conexión a variantes semánticas y de ahí a la
//! taxonomía del motor.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;
use whdb_core::errors::ReplicatorError;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("check violation: {0}")]
    CheckViolation(String),
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),
    #[error("not found")]
    NotFound,
    #[error("serialization conflict (retryable)")]
    SerializationConflict,
    #[error("transient IO / connection pool error: {0}")]
    TransientIo(String),
    /// La tabla tiene un cambio de esquema en curso.
    #[error("table {0} is locked by a schema change")]
    Locked(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("row decode error: {0}")]
    Decode(String),
    #[error("unknown database error: {0}")]
    Unknown(String),
}

impl From<DieselError> for PersistenceError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => Self::NotFound,
            DieselError::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation => Self::UniqueViolation(info.message().to_string()),
                DatabaseErrorKind::CheckViolation => Self::CheckViolation(info.message().to_string()),
                DatabaseErrorKind::ForeignKeyViolation => Self::ForeignKeyViolation(info.message().to_string()),
                DatabaseErrorKind::SerializationFailure => Self::SerializationConflict,
                DatabaseErrorKind::ClosedConnection => Self::TransientIo(info.message().to_string()),
                other => Self::Unknown(format!("db error kind {:?}: {}", other, info.message())),
            },
            DieselError::DeserializationError(e) => Self::Decode(format!("deser: {e}")),
            DieselError::SerializationError(e) => Self::Unknown(format!("ser: {e}")),
            DieselError::BrokenTransactionManager => Self::TransientIo("broken transaction manager".into()),
            other => Self::Unknown(format!("unhandled diesel error: {other:?}")),
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<PersistenceError> for ReplicatorError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::NotFound => ReplicatorError::NotFound("database row".into()),
            PersistenceError::Locked(table) => ReplicatorError::MigrationInProgress(table),
            PersistenceError::SerializationConflict | PersistenceError::TransientIo(_) => {
                ReplicatorError::transient_storage(err.to_string())
            }
            other => ReplicatorError::storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_mapping() {
        assert!(ReplicatorError::from(PersistenceError::TransientIo("x".into())).is_retryable());
        assert!(!ReplicatorError::from(PersistenceError::UniqueViolation("x".into())).is_retryable());
        assert_eq!(ReplicatorError::from(PersistenceError::Locked("public.t".into())),
                   ReplicatorError::MigrationInProgress("public.t".into()));
    }
}
