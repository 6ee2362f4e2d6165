//! Planificador de migraciones de esquema para tablas replicadas.
//!
//! El planificador compara la definición declarada de la tabla (columnas,
//! índices, secuencia) con el estado introspectado y produce una
//! `SchemaModification`: tres grupos ordenados de `SchemaChange` que el
//! backend ejecuta (o aplica estructuralmente, en memoria).
mod change;
mod planner;

pub(crate) use change::chunk_contains;
pub use change::{SchemaChange, SchemaModification};
pub use planner::{chunk_bounds, index_name, plan_modification, sequence_name, IndexDefinition, TableDefinition,
                  TableState};

/// Identificador SQL siempre entre comillas dobles (palabras reservadas
/// como `from` incluidas).
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Literal de texto SQL.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting() {
        assert_eq!(quote_ident("from"), "\"from\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("o'clock"), "'o''clock'");
    }
}
