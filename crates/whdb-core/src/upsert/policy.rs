//! Política de resolución de conflictos del upsert.
//!
//! `UpdatePolicy::decide` es la única fuente de verdad: cada store la evalúa
//! dentro de su propia unidad atómica (mutex en memoria, transacción con
//! `FOR UPDATE` en Postgres).
use std::cmp::Ordering;

use serde_json::Value;

use crate::column::ColumnType;
use crate::constants::{DATA_COLUMN, ENRICHMENT_COLUMN};
use crate::model::Row;

/// Qué hacer cuando el valor de orden entrante es nulo o falta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullOrdering {
    #[default]
    Allow,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum OrderingPolicy {
    /// Toda escritura gana.
    #[default]
    Always,
    /// Las escrituras estrictamente más antiguas que lo almacenado se
    /// descartan. Igual o más nuevo escribe.
    Column {
        column: String,
        column_type: ColumnType,
        on_null_incoming: NullOrdering,
    },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum MergePolicy {
    /// Todas las columnas entrantes reemplazan las almacenadas.
    #[default]
    Replace,
    /// Sólo estas columnas (más `data`/`enrichment`) se actualizan.
    Columns(Vec<String>),
    /// Una vez que todas estas columnas tienen valor en la fila almacenada,
    /// no se aceptan más escrituras.
    LockWhenSet(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdatePolicy {
    pub ordering: OrderingPolicy,
    pub merge: MergePolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteDecision {
    Insert(Row),
    /// Fila completa resultante tras el merge.
    Update(Row),
    Skip,
}

impl UpdatePolicy {
    /// Ordena por `column` y permite escrituras con valor nulo.
    pub fn ordered_by(column: impl Into<String>, column_type: ColumnType) -> Self {
        Self { ordering: OrderingPolicy::Column { column: column.into(),
                                                  column_type,
                                                  on_null_incoming: NullOrdering::Allow },
               merge: MergePolicy::Replace }
    }

    pub fn reject_null_ordering(mut self) -> Self {
        if let OrderingPolicy::Column { on_null_incoming, .. } = &mut self.ordering {
            *on_null_incoming = NullOrdering::Reject;
        }
        self
    }

    pub fn merge(mut self, merge: MergePolicy) -> Self {
        self.merge = merge;
        self
    }

    fn ordering_allows(&self, existing: &Row, incoming: &Row) -> bool {
        let OrderingPolicy::Column { column,
                                     column_type,
                                     on_null_incoming, } = &self.ordering
        else {
            return true;
        };
        let inc = incoming.get(column).unwrap_or(&Value::Null);
        if inc.is_null() {
            return *on_null_incoming == NullOrdering::Allow;
        }
        let cur = existing.get(column).unwrap_or(&Value::Null);
        !matches!(column_type.compare(inc, cur), Some(Ordering::Less))
    }

    pub fn decide(&self, existing: Option<&Row>, incoming: &Row) -> WriteDecision {
        let Some(existing) = existing else {
            return WriteDecision::Insert(incoming.clone());
        };
        if !self.ordering_allows(existing, incoming) {
            return WriteDecision::Skip;
        }
        let mut merged = existing.clone();
        match &self.merge {
            MergePolicy::Replace => {
                for (k, v) in incoming {
                    merged.insert(k.clone(), v.clone());
                }
            }
            MergePolicy::Columns(names) => {
                for (k, v) in incoming {
                    let allowed = k == DATA_COLUMN || k == ENRICHMENT_COLUMN || names.iter().any(|n| n == k);
                    if allowed {
                        merged.insert(k.clone(), v.clone());
                    }
                }
            }
            MergePolicy::LockWhenSet(names) => {
                let locked = names.iter()
                                  .all(|n| existing.get(n).map(|v| !v.is_null()).unwrap_or(false));
                if locked {
                    return WriteDecision::Skip;
                }
                for (k, v) in incoming {
                    merged.insert(k.clone(), v.clone());
                }
            }
        }
        WriteDecision::Update(merged)
    }
}
