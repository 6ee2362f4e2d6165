use log::debug;
use sha2::{Digest, Sha256};

use crate::column::{Column, ColumnType, IndexSpec};
use crate::constants::{BACKFILL_CHUNK_SIZE, ENRICHMENT_COLUMN};
use crate::model::TableRef;

use super::change::{SchemaChange, SchemaModification};
use super::quote_ident;

const MAX_IDENT_LEN: usize = 63;
const INDEX_SUFFIX: &str = "_idx";
const INDEX_HASH_LEN: usize = 8;

/// Índice ya resuelto (nombre incluido) para una tabla concreta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub where_clause: Option<String>,
    pub unique: bool,
}

/// `<prefix>_<col1>_<col2>_idx`. Los prefijos que empiezan por dígito se
/// anteponen con `idx`; caracteres fuera de `[A-Za-z0-9_]` pasan a `_`.
/// Si excede el límite de identificadores de Postgres, la cola se reemplaza
/// por un hash corto del nombre completo y se conserva el sufijo `_idx`.
pub fn index_name(prefix: &str, columns: &[String]) -> String {
    let mut raw = String::from(prefix);
    for c in columns {
        raw.push('_');
        raw.push_str(c);
    }
    let mut name: String = raw.chars()
                              .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
                              .collect();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, "idx");
    }
    if name.len() + INDEX_SUFFIX.len() <= MAX_IDENT_LEN {
        return name + INDEX_SUFFIX;
    }
    let digest = format!("{:x}", Sha256::digest(name.as_bytes()));
    let hash = &digest[..INDEX_HASH_LEN];
    let keep = MAX_IDENT_LEN - INDEX_SUFFIX.len() - INDEX_HASH_LEN - 1;
    format!("{}_{hash}{INDEX_SUFFIX}", &name[..keep])
}

pub fn sequence_name(service_name: &str, opaque_id: &str) -> String {
    format!("replicator_seq_{service_name}_{opaque_id}")
}

/// Definición declarada de una tabla replicada.
#[derive(Debug, Clone)]
pub struct TableDefinition {
    pub table: TableRef,
    pub opaque_id: String,
    pub service_name: String,
    pub remote_key: Column,
    pub columns: Vec<Column>,
    pub extra_indices: Vec<IndexSpec>,
    pub store_enrichment: bool,
    pub requires_sequence: bool,
}

impl TableDefinition {
    /// Índices de columna (en orden de declaración) seguidos de los índices
    /// extra del replicator.
    pub fn indices(&self) -> Vec<IndexDefinition> {
        let mut out: Vec<IndexDefinition> = Vec::new();
        for col in self.columns.iter().filter(|c| c.index) {
            let columns = vec![col.name.clone()];
            let where_clause = col.index_not_null
                                  .then(|| format!("{} IS NOT NULL", quote_ident(&col.name)));
            out.push(IndexDefinition { name: index_name(&self.opaque_id, &columns),
                                       columns,
                                       where_clause,
                                       unique: false });
        }
        for spec in &self.extra_indices {
            out.push(IndexDefinition { name: index_name(&self.opaque_id, &spec.columns),
                                       columns: spec.columns.clone(),
                                       where_clause: spec.where_clause.clone(),
                                       unique: spec.unique });
        }
        out
    }

    pub fn sequence_name(&self) -> String {
        sequence_name(&self.service_name, &self.opaque_id)
    }

    /// Columnas rastreadas para detectar cambios en el upsert.
    pub fn tracked_columns(&self) -> Vec<(String, ColumnType)> {
        let mut out = vec![(self.remote_key.name.clone(), self.remote_key.column_type)];
        out.extend(self.columns.iter().map(|c| (c.name.clone(), c.column_type)));
        out
    }

    fn enrichment_column() -> Column {
        Column::new(ENRICHMENT_COLUMN, ColumnType::Object).optional()
    }
}

/// Estado introspectado de la tabla y su secuencia.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableState {
    pub exists: bool,
    pub columns: Vec<String>,
    pub indices: Vec<String>,
    pub sequence_exists: bool,
    /// Mayor `pk` presente (0 si la tabla está vacía).
    pub max_pk: i64,
}

impl TableState {
    pub fn missing() -> Self {
        Self::default()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indices.iter().any(|i| i == name)
    }
}

/// Límites de chunks para rellenar columnas sobre `max_pk` filas:
/// `[0, N]`, `[N, 2N]`, ... y un último `[k*N]` abierto.
pub fn chunk_bounds(max_pk: i64) -> Vec<Vec<i64>> {
    let mut out = Vec::new();
    let mut lo = 0;
    while lo + BACKFILL_CHUNK_SIZE <= max_pk {
        out.push(vec![lo, lo + BACKFILL_CHUNK_SIZE]);
        lo += BACKFILL_CHUNK_SIZE;
    }
    out.push(vec![lo]);
    out
}

/// Calcula los cambios necesarios para que la tabla alcance la definición.
/// Aplicar el resultado y volver a planificar produce una modificación vacía.
pub fn plan_modification(def: &TableDefinition, state: &TableState) -> SchemaModification {
    let mut m = SchemaModification::default();
    let indices = def.indices();
    if !state.exists {
        debug!("plan_modification:create table={} columns={} indices={}",
               def.table,
               def.columns.len(),
               indices.len());
        m.transaction_statements.push(SchemaChange::CreateTable { table: def.table.clone(),
                                                                  remote_key: def.remote_key.clone(),
                                                                  columns: def.columns.clone(),
                                                                  enrichment: def.store_enrichment });
        for index in indices {
            m.transaction_statements.push(SchemaChange::CreateIndex { table: def.table.clone(),
                                                                      index,
                                                                      concurrently: false });
        }
        if def.requires_sequence {
            m.application_database_statements.push(SchemaChange::CreateSequence { schema: def.table.schema.clone(),
                                                                                  name: def.sequence_name() });
        }
        return m;
    }

    let mut added: Vec<Column> = Vec::new();
    if def.store_enrichment && !state.has_column(ENRICHMENT_COLUMN) {
        m.transaction_statements.push(SchemaChange::AddColumn { table: def.table.clone(),
                                                                column: TableDefinition::enrichment_column() });
    }
    for col in def.columns.iter().filter(|c| !state.has_column(&c.name)) {
        m.transaction_statements.push(SchemaChange::AddColumn { table: def.table.clone(),
                                                                column: col.clone() });
        if let Some(stmt) = &col.backfill_statement {
            m.transaction_statements.push(SchemaChange::RawStatement(stmt.clone()));
        }
        added.push(col.clone());
    }
    if !added.is_empty() {
        let chunks = chunk_bounds(state.max_pk);
        debug!("plan_modification:backfill table={} columns={} chunks={}",
               def.table,
               added.len(),
               chunks.len());
        for chunk in chunks {
            m.nontransaction_statements.push(SchemaChange::BackfillColumns { table: def.table.clone(),
                                                                             columns: added.clone(),
                                                                             chunk });
        }
    }
    for index in indices.into_iter().filter(|i| !state.has_index(&i.name)) {
        m.nontransaction_statements.push(SchemaChange::CreateIndex { table: def.table.clone(),
                                                                     index,
                                                                     concurrently: true });
    }
    if def.requires_sequence && !state.sequence_exists {
        m.application_database_statements.push(SchemaChange::CreateSequence { schema: def.table.schema.clone(),
                                                                              name: def.sequence_name() });
    }
    m
}
