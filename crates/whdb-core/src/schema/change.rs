use crate::column::{Column, ColumnType};
use crate::constants::{DATA_COLUMN, ENRICHMENT_COLUMN, PK_COLUMN};
use crate::model::TableRef;

use super::planner::IndexDefinition;
use super::quote_ident;

/// Un cambio de esquema tipado. Se renderiza a SQL con `to_sql`; los
/// backends sin SQL lo aplican estructuralmente.
#[derive(Debug, Clone)]
pub enum SchemaChange {
    CreateTable {
        table: TableRef,
        remote_key: Column,
        columns: Vec<Column>,
        enrichment: bool,
    },
    AddColumn {
        table: TableRef,
        column: Column,
    },
    /// `backfill_statement` de una columna, concatenado sin validar.
    RawStatement(String),
    /// Rellena columnas nuevas desde `data` para un chunk de `pk`.
    BackfillColumns {
        table: TableRef,
        columns: Vec<Column>,
        chunk: Vec<i64>,
    },
    CreateIndex {
        table: TableRef,
        index: IndexDefinition,
        concurrently: bool,
    },
    CreateSequence {
        schema: String,
        name: String,
    },
}

fn column_ddl(col: &Column) -> String {
    format!("{} {}", quote_ident(&col.name), col.column_type.to_sql_type())
}

/// Condición `WHERE` de un chunk de backfill. `[0]` solo no filtra.
pub(crate) fn chunk_condition(chunk: &[i64]) -> Option<String> {
    let pk = quote_ident(PK_COLUMN);
    match chunk {
        [0] => None,
        [lo] => Some(format!("{pk} > {lo}")),
        [lo, hi, ..] => Some(format!("{pk} > {lo} AND {pk} <= {hi}")),
        [] => None,
    }
}

/// Indica si un `pk` cae dentro de un chunk.
pub(crate) fn chunk_contains(chunk: &[i64], pk: i64) -> bool {
    match chunk {
        [0] | [] => true,
        [lo] => pk > *lo,
        [lo, hi, ..] => pk > *lo && pk <= *hi,
    }
}

impl SchemaChange {
    pub fn to_sql(&self) -> String {
        match self {
            Self::CreateTable { table,
                                remote_key,
                                columns,
                                enrichment, } => {
                let mut defs = vec![format!("{} bigserial PRIMARY KEY", quote_ident(PK_COLUMN)),
                                    format!("{} UNIQUE NOT NULL", column_ddl(remote_key)),];
                defs.extend(columns.iter().map(column_ddl));
                defs.push(format!("{} {} NOT NULL",
                                  quote_ident(DATA_COLUMN),
                                  ColumnType::Object.to_sql_type()));
                if *enrichment {
                    defs.push(format!("{} {}",
                                      quote_ident(ENRICHMENT_COLUMN),
                                      ColumnType::Object.to_sql_type()));
                }
                format!("CREATE TABLE IF NOT EXISTS {} ({})", table.qualified(), defs.join(", "))
            }
            Self::AddColumn { table, column } => {
                format!("ALTER TABLE {} ADD COLUMN IF NOT EXISTS {}",
                        table.qualified(),
                        column_ddl(column))
            }
            Self::RawStatement(sql) => sql.clone(),
            Self::BackfillColumns { table, columns, chunk } => {
                let sets: Vec<String> = columns.iter()
                                               .map(|c| format!("{} = {}", quote_ident(&c.name), c.backfill_sql_expr()))
                                               .collect();
                let mut sql = format!("UPDATE {} SET {}", table.qualified(), sets.join(", "));
                if let Some(cond) = chunk_condition(chunk) {
                    sql.push_str(" WHERE ");
                    sql.push_str(&cond);
                }
                sql
            }
            Self::CreateIndex { table,
                                index,
                                concurrently, } => {
                let cols: Vec<String> = index.columns.iter().map(|c| quote_ident(c)).collect();
                let mut sql = format!("CREATE {}INDEX {}IF NOT EXISTS {} ON {} ({})",
                                      if index.unique { "UNIQUE " } else { "" },
                                      if *concurrently { "CONCURRENTLY " } else { "" },
                                      quote_ident(&index.name),
                                      table.qualified(),
                                      cols.join(", "));
                if let Some(w) = &index.where_clause {
                    sql.push_str(" WHERE ");
                    sql.push_str(w);
                }
                sql
            }
            Self::CreateSequence { schema, name } => {
                format!("CREATE SEQUENCE IF NOT EXISTS {}.{}", quote_ident(schema), quote_ident(name))
            }
        }
    }
}

/// Resultado del planificador. Los grupos se ejecutan en orden:
/// `transaction_statements` dentro de una transacción con el lock de
/// migración, `application_database_statements` aparte, y
/// `nontransaction_statements` fuera de toda transacción (UPDATEs por chunks
/// e índices `CONCURRENTLY`).
#[derive(Debug, Clone, Default)]
pub struct SchemaModification {
    pub transaction_statements: Vec<SchemaChange>,
    pub application_database_statements: Vec<SchemaChange>,
    pub nontransaction_statements: Vec<SchemaChange>,
}

impl SchemaModification {
    pub fn is_empty(&self) -> bool {
        self.transaction_statements.is_empty()
        && self.application_database_statements.is_empty()
        && self.nontransaction_statements.is_empty()
    }

    pub fn transaction_sql(&self) -> Vec<String> {
        self.transaction_statements.iter().map(SchemaChange::to_sql).collect()
    }

    pub fn application_database_sql(&self) -> Vec<String> {
        self.application_database_statements.iter().map(SchemaChange::to_sql).collect()
    }

    pub fn nontransaction_sql(&self) -> Vec<String> {
        self.nontransaction_statements.iter().map(SchemaChange::to_sql).collect()
    }

    /// Todas las sentencias en orden de ejecución.
    pub fn all_sql(&self) -> Vec<String> {
        let mut out = self.transaction_sql();
        out.extend(self.application_database_sql());
        out.extend(self.nontransaction_sql());
        out
    }
}
