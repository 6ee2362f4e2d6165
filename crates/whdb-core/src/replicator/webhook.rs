use indexmap::IndexMap;
use serde_json::{json, Value};

use crate::errors::{ReplicatorError, Result};
use crate::model::ServiceIntegration;

/// Header por defecto con el secreto compartido del webhook.
pub const DEFAULT_SECRET_HEADER: &str = "whdb-webhook-secret";

/// Petición de webhook entregada por la capa de routing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebhookRequest {
    pub body: String,
    /// Nombres de header en minúsculas.
    pub headers: IndexMap<String, String>,
    pub path: String,
    pub method: String,
}

impl WebhookRequest {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into(),
               headers: IndexMap::new(),
               path: "/".into(),
               method: "POST".into() }
    }

    pub fn json(body: &Value) -> Self {
        Self::new(body.to_string()).header("content-type", "application/json")
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Cuerpo como JSON; un cuerpo inválido es `InvalidPayload`.
    pub fn json_body(&self) -> Result<Value> {
        serde_json::from_str(&self.body).map_err(|e| ReplicatorError::InvalidPayload(format!("webhook body: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: Value,
}

impl WebhookResponse {
    pub fn ok() -> Self {
        Self { status: 202,
               body: json!({"o": "k"}) }
    }

    pub fn error(status: u16, message: &str) -> Self {
        Self { status,
               body: json!({"message": message}) }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Comparación en tiempo constante respecto del contenido.
pub fn secure_compare(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Validación estándar por secreto compartido en un header: 409 si la
/// integración no tiene secreto, 401 si falta o no coincide.
pub fn check_secret_header(sint: &ServiceIntegration, request: &WebhookRequest, header: &str) -> WebhookResponse {
    let Some(secret) = sint.webhook_secret() else {
        return WebhookResponse::error(409, "webhook secret not configured");
    };
    match request.get_header(header) {
        Some(given) if secure_compare(given, secret) => WebhookResponse::ok(),
        _ => WebhookResponse::error(401, "invalid webhook secret"),
    }
}
