//! Constantes del motor de replicación.
//!
//! Cambiar estos valores altera las sentencias que genera el planificador de
//! esquema, así que cualquier cambio debe revisarse junto a tablas ya
//! existentes.

/// Filas por cada `UPDATE` de backfill de columnas nuevas.
pub const BACKFILL_CHUNK_SIZE: i64 = 1_000_000;

/// Columna de identidad auto-incremental presente en toda tabla replicada.
pub const PK_COLUMN: &str = "pk";

/// Columna JSONB con el payload normalizado completo.
pub const DATA_COLUMN: &str = "data";

/// Columna JSONB con el cuerpo de enrichment (sólo si el replicator lo guarda).
pub const ENRICHMENT_COLUMN: &str = "enrichment";

/// Prefijo de los opaque ids de integraciones.
pub const INTEGRATION_OPAQUE_PREFIX: &str = "svi";

/// Campo especial para elegir la integración padre por índice (1-based).
pub const DEPENDENCY_CHOICE_FIELD: &str = "dependency_choice";

/// Campo que sólo recalcula la state machine de creación.
pub const NOOP_CREATE_FIELD: &str = "noop_create";

/// Campos que alimentan la state machine de webhooks.
pub const WEBHOOK_STATE_FIELDS: &[&str] = &["webhook_secret"];

/// Campos que alimentan la state machine de backfill.
pub const BACKFILL_STATE_FIELDS: &[&str] = &["backfill_key", "backfill_secret", "api_url"];
