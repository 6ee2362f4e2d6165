//! Representación neutra de una fila replicada.
//!
//! Las filas viajan como mapas ordenados `columna -> JSON`. El tipado real lo
//! imponen las `Column` del replicator al extraer valores y el backend al
//! persistirlos.
use indexmap::IndexMap;
use serde_json::Value;

use crate::column::ColumnType;

pub type Row = IndexMap<String, Value>;

/// Compara dos filas sobre las columnas rastreadas, con comparación
/// consciente del tipo (por ejemplo, dos timestamps iguales con distinto
/// offset no cuentan como cambio).
pub fn rows_differ(before: &Row, after: &Row, tracked: &[(String, ColumnType)]) -> bool {
    tracked.iter().any(|(name, ty)| {
                      let a = before.get(name).unwrap_or(&Value::Null);
                      let b = after.get(name).unwrap_or(&Value::Null);
                      !ty.values_equal(a, b)
                  })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timestamps_with_different_offsets_are_equal() {
        let mut a = Row::new();
        a.insert("at".into(), json!("2015-07-30T21:12:33+00:00"));
        let mut b = Row::new();
        b.insert("at".into(), json!("2015-07-30T23:12:33+02:00"));
        let tracked = vec![("at".to_string(), ColumnType::Timestamp)];
        assert!(!rows_differ(&a, &b, &tracked));
        b.insert("at".into(), json!("2016-07-30T21:12:33Z"));
        assert!(rows_differ(&a, &b, &tracked));
    }

    #[test]
    fn missing_and_null_are_the_same() {
        let mut a = Row::new();
        a.insert("x".into(), Value::Null);
        let b = Row::new();
        assert!(!rows_differ(&a, &b, &[("x".to_string(), ColumnType::Text)]));
    }
}
