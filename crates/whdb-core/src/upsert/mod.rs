//! Motor de upsert: construcción de filas y decisión de escritura.
mod policy;

use serde::Serialize;
use serde_json::Value;

pub use policy::{MergePolicy, NullOrdering, OrderingPolicy, UpdatePolicy, WriteDecision};

use crate::column::ColumnType;
use crate::constants::{DATA_COLUMN, ENRICHMENT_COLUMN};
use crate::errors::{ReplicatorError, Result};
use crate::model::{rows_differ, Row, TableRef};
use crate::schema::TableDefinition;

/// Petición de upsert lista para un store.
#[derive(Debug, Clone)]
pub struct UpsertRequest {
    pub table: TableRef,
    /// Columna de conflicto (identidad remota).
    pub key_column: String,
    pub row: Row,
    pub policy: UpdatePolicy,
    pub tracked: Vec<(String, ColumnType)>,
}

impl UpsertRequest {
    pub fn key(&self) -> &Value {
        self.row.get(&self.key_column).unwrap_or(&Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpsertAction {
    Inserted,
    Updated,
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    /// Fila tal como queda almacenada.
    pub row: Row,
    pub changed: bool,
    pub action: UpsertAction,
}

impl UpsertOutcome {
    /// Resultado para una decisión ya aplicada. `stored` es la fila final
    /// que devolvió el backend (con `pk`).
    pub fn from_decision(existing: Option<&Row>, decision: &WriteDecision, stored: Row, tracked: &[(String, ColumnType)])
                         -> Self {
        match decision {
            WriteDecision::Insert(_) => Self { row: stored,
                                               changed: true,
                                               action: UpsertAction::Inserted },
            WriteDecision::Update(_) => {
                let changed = existing.map(|e| rows_differ(e, &stored, tracked)).unwrap_or(true);
                Self { row: stored,
                       changed,
                       action: UpsertAction::Updated }
            }
            WriteDecision::Skip => Self { row: stored,
                                          changed: false,
                                          action: UpsertAction::Skipped },
        }
    }
}

/// Construye la fila a persistir: identidad remota, columnas
/// denormalizadas, `data` y (si corresponde) `enrichment`.
pub fn build_row(def: &TableDefinition, data: &Value, enrichment: Option<&Value>) -> Result<Row> {
    let mut row = Row::new();
    let key = def.remote_key.extract(data, enrichment)?;
    if key.is_null() {
        return Err(ReplicatorError::InvalidPayload(format!("remote key {} is null", def.remote_key.name)));
    }
    row.insert(def.remote_key.name.clone(), key);
    for col in &def.columns {
        row.insert(col.name.clone(), col.extract(data, enrichment)?);
    }
    row.insert(DATA_COLUMN.to_string(), data.clone());
    if def.store_enrichment {
        row.insert(ENRICHMENT_COLUMN.to_string(), enrichment.cloned().unwrap_or(Value::Null));
    }
    Ok(row)
}

/// Columnas comparadas para reportar `changed`: identidad, denormalizadas y
/// `data`.
pub fn tracked_columns(def: &TableDefinition) -> Vec<(String, ColumnType)> {
    let mut tracked = def.tracked_columns();
    tracked.push((DATA_COLUMN.to_string(), ColumnType::Object));
    tracked
}
