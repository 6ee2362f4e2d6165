//! `ServiceIntegration`: una conexión configurada a un servicio externo para
//! una organización.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::INTEGRATION_OPAQUE_PREFIX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IntegrationId(pub i64);

impl std::fmt::Display for IntegrationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrganizationId(pub i64);

/// Genera un opaque id estable (`svi_<hex>`), usado para nombrar objetos de
/// base de datos derivados de la integración.
pub fn new_opaque_id() -> String {
    format!("{}_{}", INTEGRATION_OPAQUE_PREFIX, Uuid::new_v4().simple())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceIntegration {
    pub id: IntegrationId,
    pub opaque_id: String,
    pub organization_id: OrganizationId,
    pub service_name: String,
    pub table_name: String,
    pub webhook_secret: Option<String>,
    pub backfill_key: Option<String>,
    pub backfill_secret: Option<String>,
    /// Significado dependiente del adapter (URL base, owner/repo, feed...).
    pub api_url: Option<String>,
    pub depends_on: Option<IntegrationId>,
    pub last_backfilled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

fn present(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl ServiceIntegration {
    pub fn webhook_secret(&self) -> Option<&str> {
        present(&self.webhook_secret)
    }

    pub fn backfill_key(&self) -> Option<&str> {
        present(&self.backfill_key)
    }

    pub fn backfill_secret(&self) -> Option<&str> {
        present(&self.backfill_secret)
    }

    pub fn api_url(&self) -> Option<&str> {
        present(&self.api_url)
    }

    /// Asigna un campo configurable por nombre (state machine). Devuelve
    /// `false` si el campo no es asignable por esta vía.
    pub fn set_field(&mut self, field: &str, value: String) -> bool {
        let slot = match field {
            "webhook_secret" => &mut self.webhook_secret,
            "backfill_key" => &mut self.backfill_key,
            "backfill_secret" => &mut self.backfill_secret,
            "api_url" => &mut self.api_url,
            _ => return false,
        };
        *slot = if value.is_empty() { None } else { Some(value) };
        true
    }

    /// Referencia a la tabla de esta integración dentro del schema de
    /// replicación.
    pub fn table(&self, schema: &str) -> TableRef {
        TableRef::new(schema, &self.table_name)
    }
}

/// Datos para crear una integración nueva.
#[derive(Debug, Clone)]
pub struct NewServiceIntegration {
    pub organization_id: OrganizationId,
    pub service_name: String,
    /// Si es `None` se deriva de `service_name` y el opaque id.
    pub table_name: Option<String>,
    pub depends_on: Option<IntegrationId>,
}

impl NewServiceIntegration {
    pub fn new(organization_id: OrganizationId, service_name: impl Into<String>) -> Self {
        Self { organization_id,
               service_name: service_name.into(),
               table_name: None,
               depends_on: None }
    }

    pub fn depends_on(mut self, parent: IntegrationId) -> Self {
        self.depends_on = Some(parent);
        self
    }

    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = Some(name.into());
        self
    }

    /// Resuelve el nombre de tabla final para el opaque id dado.
    pub fn resolved_table_name(&self, opaque_id: &str) -> String {
        match &self.table_name {
            Some(t) => t.clone(),
            None => {
                let suffix = opaque_id.trim_start_matches(&format!("{INTEGRATION_OPAQUE_PREFIX}_"));
                let short: String = suffix.chars().take(12).collect();
                format!("{}_{}", self.service_name, short)
            }
        }
    }
}

/// Tabla calificada por schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: &str, name: &str) -> Self {
        Self { schema: schema.to_string(),
               name: name.to_string() }
    }

    /// `"schema"."tabla"` siempre entre comillas.
    pub fn qualified(&self) -> String {
        format!("{}.{}",
                crate::schema::quote_ident(&self.schema),
                crate::schema::quote_ident(&self.name))
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}
