//! Taxonomía de errores del motor de replicación.
//!
//! Cada variante corresponde a una clase con un tratamiento distinto por la
//! capa que llama (API/CLI/worker):
//! - `InvalidInput`: error de entrada del usuario; los flujos de state machine
//!   lo convierten en un `StateMachineStep` con `error_code`.
//! - `Precondition`: precondición no cumplida (o error del llamador); se
//!   renderiza como respuesta 4xx.
//! - `CredentialsMissing`: la cadena de dependencias no tiene credenciales
//!   utilizables todavía.
//! - `External`: fallo del servicio externo (ver `ExternalError`).
//! - `Invariant`: error de programación; nunca se convierte en respuesta
//!   "suave".

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Naturaleza del fallo al hablar con el proveedor externo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExternalErrorKind {
    /// El proveedor respondió con un status HTTP no exitoso.
    Status,
    /// La petición excedió el timeout del adapter.
    Timeout,
    /// Conexión rechazada/reseteada antes de obtener respuesta.
    Connection,
    /// La respuesta llegó pero su forma no es la esperada.
    Decode,
}

/// Error de un servicio externo (webhook provider / API de backfill).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind:?} error from external service (status={status:?}): {message}")]
pub struct ExternalError {
    pub kind: ExternalErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl ExternalError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self { kind: ExternalErrorKind::Status,
               status: Some(status),
               message: message.into() }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self { kind: ExternalErrorKind::Timeout,
               status: None,
               message: message.into() }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self { kind: ExternalErrorKind::Connection,
               status: None,
               message: message.into() }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self { kind: ExternalErrorKind::Decode,
               status: None,
               message: message.into() }
    }

    /// 429, 5xx de gateway/servidor, timeouts y resets de conexión se
    /// reintentan. Todo lo demás es fatal para el job.
    pub fn is_transient(&self) -> bool {
        match self.kind {
            ExternalErrorKind::Timeout | ExternalErrorKind::Connection => true,
            ExternalErrorKind::Decode => false,
            ExternalErrorKind::Status => matches!(self.status, Some(429 | 500 | 502 | 503 | 504)),
        }
    }

    /// 401/403: las credenciales configuradas no sirven.
    pub fn is_auth_failure(&self) -> bool {
        self.kind == ExternalErrorKind::Status && matches!(self.status, Some(401 | 403))
    }
}

#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum ReplicatorError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("credentials missing: {0}")]
    CredentialsMissing(String),
    #[error(transparent)]
    External(#[from] ExternalError),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("table {0} is being migrated, retry later")]
    MigrationInProgress(String),
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unknown service: {0}")]
    UnknownService(String),
    #[error("storage error: {message}")]
    Storage { message: String, transient: bool },
}

impl ReplicatorError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into(),
                        transient: false }
    }

    pub fn transient_storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into(),
                        transient: true }
    }

    /// Indica si repetir la misma operación puede tener éxito.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::External(e) => e.is_transient(),
            Self::MigrationInProgress(_) => true,
            Self::Storage { transient, .. } => *transient,
            _ => false,
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::External(e) if e.is_auth_failure())
    }
}

/// Clasificación de alto nivel usada para decidir cómo se presenta un error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    UserInput,
    Precondition,
    CredentialsMissing,
    Transient,
    Fatal,
    Invariant,
}

pub fn classify_error(err: &ReplicatorError) -> ErrorClass {
    match err {
        ReplicatorError::InvalidInput(_) => ErrorClass::UserInput,
        ReplicatorError::Precondition(_) | ReplicatorError::NotFound(_) | ReplicatorError::UnknownService(_) => {
            ErrorClass::Precondition
        }
        ReplicatorError::CredentialsMissing(_) => ErrorClass::CredentialsMissing,
        ReplicatorError::Invariant(_) => ErrorClass::Invariant,
        e if e.is_retryable() => ErrorClass::Transient,
        _ => ErrorClass::Fatal,
    }
}

pub type Result<T, E = ReplicatorError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_statuses() {
        for s in [429u16, 500, 502, 503, 504] {
            assert!(ExternalError::status(s, "x").is_transient(), "{s} debería reintentarse");
        }
        for s in [400u16, 401, 403, 404, 422, 501] {
            assert!(!ExternalError::status(s, "x").is_transient(), "{s} no debería reintentarse");
        }
        assert!(ExternalError::timeout("t").is_transient());
        assert!(ExternalError::connection("reset").is_transient());
        assert!(!ExternalError::decode("bad json").is_transient());
    }

    #[test]
    fn classification() {
        assert_eq!(classify_error(&ReplicatorError::InvalidInput("x".into())), ErrorClass::UserInput);
        assert_eq!(classify_error(&ReplicatorError::Precondition("x".into())), ErrorClass::Precondition);
        assert_eq!(classify_error(&ReplicatorError::CredentialsMissing("x".into())),
                   ErrorClass::CredentialsMissing);
        assert_eq!(classify_error(&ExternalError::status(503, "x").into()), ErrorClass::Transient);
        assert_eq!(classify_error(&ExternalError::status(401, "x").into()), ErrorClass::Fatal);
        assert_eq!(classify_error(&ReplicatorError::MigrationInProgress("t".into())), ErrorClass::Transient);
        assert_eq!(classify_error(&ReplicatorError::Invariant("x".into())), ErrorClass::Invariant);
        assert_eq!(classify_error(&ReplicatorError::storage("boom")), ErrorClass::Fatal);
        assert_eq!(classify_error(&ReplicatorError::transient_storage("pool")), ErrorClass::Transient);
    }

    #[test]
    fn auth_failure_detection() {
        assert!(ReplicatorError::from(ExternalError::status(403, "forbidden")).is_auth_failure());
        assert!(!ReplicatorError::from(ExternalError::status(404, "nope")).is_auth_failure());
    }
}
