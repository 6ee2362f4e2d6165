//! Modelo de columnas.
//!
//! Una `Column` describe cómo se extrae un valor del payload de un recurso
//! (función Rust) y cómo se recalcula ese mismo valor desde la columna
//! `data` ya almacenada (expresión SQL). La segunda forma es la que usa el
//! planificador de esquema para rellenar columnas añadidas después.
mod converter;
mod index;

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use converter::{parse_local_date, parse_time, Converter, Defaulter};
pub use index::IndexSpec;

use crate::constants::{DATA_COLUMN, ENRICHMENT_COLUMN};
use crate::errors::{ReplicatorError, Result};
use crate::schema::{quote_ident, quote_literal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Text,
    Integer,
    BigInt,
    Double,
    Decimal,
    Boolean,
    Date,
    Timestamp,
    Uuid,
    Object,
    TextArray,
    IntegerArray,
    BigIntArray,
}

impl ColumnType {
    pub fn to_sql_type(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::BigInt => "bigint",
            Self::Double => "double precision",
            Self::Decimal => "numeric",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Timestamp => "timestamptz",
            Self::Uuid => "uuid",
            Self::Object => "jsonb",
            Self::TextArray => "text[]",
            Self::IntegerArray => "integer[]",
            Self::BigIntArray => "bigint[]",
        }
    }

    /// Tipo inverso a partir de `information_schema.columns.udt_name`.
    pub fn from_udt_name(udt: &str) -> Option<Self> {
        Some(match udt {
            "text" | "varchar" | "bpchar" => Self::Text,
            "int4" | "int2" => Self::Integer,
            "int8" => Self::BigInt,
            "float8" | "float4" => Self::Double,
            "numeric" => Self::Decimal,
            "bool" => Self::Boolean,
            "date" => Self::Date,
            "timestamptz" | "timestamp" => Self::Timestamp,
            "uuid" => Self::Uuid,
            "jsonb" | "json" => Self::Object,
            "_text" | "_varchar" => Self::TextArray,
            "_int4" => Self::IntegerArray,
            "_int8" => Self::BigIntArray,
            _ => return None,
        })
    }

    fn is_array(&self) -> bool {
        matches!(self, Self::TextArray | Self::IntegerArray | Self::BigIntArray)
    }

    fn element_type(&self) -> Self {
        match self {
            Self::TextArray => Self::Text,
            Self::IntegerArray => Self::Integer,
            Self::BigIntArray => Self::BigInt,
            other => *other,
        }
    }

    /// Normaliza un valor JSON a la forma canónica del tipo. `Null` se
    /// conserva.
    pub fn coerce(&self, v: Value) -> std::result::Result<Value, String> {
        if v.is_null() {
            return Ok(v);
        }
        match self {
            Self::Object => Ok(v),
            Self::Text => Ok(match v {
                Value::String(_) => v,
                other => Value::String(other.to_string()),
            }),
            Self::Integer | Self::BigInt => match &v {
                Value::Number(n) if n.is_i64() => Ok(v),
                Value::Number(n) => n.as_f64()
                                     .filter(|f| f.fract() == 0.0)
                                     .map(|f| Value::from(f as i64))
                                     .ok_or_else(|| format!("{v} is not an integer")),
                Value::String(s) => s.trim()
                                     .parse::<i64>()
                                     .map(Value::from)
                                     .map_err(|_| format!("{v} is not an integer")),
                _ => Err(format!("{v} is not an integer")),
            },
            Self::Double | Self::Decimal => match &v {
                Value::Number(_) => Ok(v),
                Value::String(s) => s.trim()
                                     .parse::<f64>()
                                     .ok()
                                     .and_then(serde_json::Number::from_f64)
                                     .map(Value::Number)
                                     .ok_or_else(|| format!("{v} is not numeric")),
                _ => Err(format!("{v} is not numeric")),
            },
            Self::Boolean => match &v {
                Value::Bool(_) => Ok(v),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "t" | "1" | "yes" => Ok(Value::Bool(true)),
                    "false" | "f" | "0" | "no" => Ok(Value::Bool(false)),
                    _ => Err(format!("{v} is not a boolean")),
                },
                Value::Number(n) => match n.as_i64() {
                    Some(0) => Ok(Value::Bool(false)),
                    Some(1) => Ok(Value::Bool(true)),
                    _ => Err(format!("{v} is not a boolean")),
                },
                _ => Err(format!("{v} is not a boolean")),
            },
            Self::Date => v.as_str()
                           .and_then(parse_local_date)
                           .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                           .ok_or_else(|| format!("{v} is not a date")),
            Self::Timestamp => v.as_str()
                                .and_then(parse_time)
                                .map(|t| Value::String(t.to_rfc3339()))
                                .ok_or_else(|| format!("{v} is not a timestamp")),
            Self::Uuid => v.as_str()
                           .and_then(|s| Uuid::parse_str(s.trim()).ok())
                           .map(|u| Value::String(u.hyphenated().to_string()))
                           .ok_or_else(|| format!("{v} is not a uuid")),
            Self::TextArray | Self::IntegerArray | Self::BigIntArray => {
                let Value::Array(items) = v else {
                    return Err(format!("{v} is not an array"));
                };
                let elem = self.element_type();
                items.into_iter()
                     .map(|i| elem.coerce(i))
                     .collect::<std::result::Result<Vec<_>, _>>()
                     .map(Value::Array)
            }
        }
    }

    /// Orden consciente del tipo; `None` si alguno es nulo o no son
    /// comparables.
    pub fn compare(&self, a: &Value, b: &Value) -> Option<Ordering> {
        if a.is_null() || b.is_null() {
            return None;
        }
        match self {
            Self::Timestamp => {
                let ta = parse_time(a.as_str()?)?;
                let tb = parse_time(b.as_str()?)?;
                Some(ta.cmp(&tb))
            }
            Self::Date => {
                let da = self.coerce(a.clone()).ok()?;
                let db = self.coerce(b.clone()).ok()?;
                Some(da.as_str()?.cmp(db.as_str()?))
            }
            Self::Integer | Self::BigInt | Self::Double | Self::Decimal => {
                let fa = number_of(a)?;
                let fb = number_of(b)?;
                fa.partial_cmp(&fb)
            }
            Self::Text => Some(a.as_str()?.cmp(b.as_str()?)),
            Self::Boolean => Some(a.as_bool()?.cmp(&b.as_bool()?)),
            Self::Uuid => {
                let ua = Uuid::parse_str(a.as_str()?).ok()?;
                let ub = Uuid::parse_str(b.as_str()?).ok()?;
                Some(ua.cmp(&ub))
            }
            _ => None,
        }
    }

    /// Igualdad consciente del tipo. Null y ausente son iguales entre sí.
    pub fn values_equal(&self, a: &Value, b: &Value) -> bool {
        match (a.is_null(), b.is_null()) {
            (true, true) => return true,
            (true, false) | (false, true) => return false,
            _ => {}
        }
        if self.is_array() {
            let (Value::Array(xa), Value::Array(xb)) = (a, b) else {
                return a == b;
            };
            let elem = self.element_type();
            return xa.len() == xb.len() && xa.iter().zip(xb).all(|(x, y)| elem.values_equal(x, y));
        }
        match self.compare(a, b) {
            Some(o) => o == Ordering::Equal,
            None => a == b,
        }
    }
}

fn number_of(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Columna denormalizada de una tabla replicada.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    /// Camino dentro del recurso (o del enrichment). Por defecto `[name]`.
    pub data_key: Vec<String>,
    /// Si es `false`, la ausencia de la clave en el payload es un error.
    pub optional: bool,
    pub index: bool,
    /// Índice parcial `WHERE col IS NOT NULL`.
    pub index_not_null: bool,
    pub converter: Option<Converter>,
    pub defaulter: Option<Defaulter>,
    /// Expresión SQL que reemplaza la derivada de `data_key`/converter al
    /// rellenar la columna.
    pub backfill_expr: Option<String>,
    /// Sentencia SQL completa que se ejecuta tras añadir la columna.
    pub backfill_statement: Option<String>,
    /// Extrae desde el cuerpo de enrichment en vez del recurso.
    pub from_enrichment: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        let name = name.into();
        Self { data_key: vec![name.clone()],
               name,
               column_type,
               optional: false,
               index: false,
               index_not_null: false,
               converter: None,
               defaulter: None,
               backfill_expr: None,
               backfill_statement: None,
               from_enrichment: false }
    }

    pub fn data_key<I, S>(mut self, path: I) -> Self
        where I: IntoIterator<Item = S>,
              S: Into<String>
    {
        self.data_key = path.into_iter().map(Into::into).collect();
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn index_not_null(mut self) -> Self {
        self.index = true;
        self.index_not_null = true;
        self
    }

    pub fn converter(mut self, c: Converter) -> Self {
        self.converter = Some(c);
        self
    }

    pub fn defaulter(mut self, d: Defaulter) -> Self {
        self.defaulter = Some(d);
        self
    }

    pub fn backfill_expr(mut self, expr: impl Into<String>) -> Self {
        self.backfill_expr = Some(expr.into());
        self
    }

    pub fn backfill_statement(mut self, stmt: impl Into<String>) -> Self {
        self.backfill_statement = Some(stmt.into());
        self
    }

    pub fn from_enrichment(mut self) -> Self {
        self.from_enrichment = true;
        self
    }

    /// Columna de origen para la expresión de backfill (`data` o
    /// `enrichment`).
    pub fn source_column(&self) -> &'static str {
        if self.from_enrichment {
            ENRICHMENT_COLUMN
        } else {
            DATA_COLUMN
        }
    }

    /// Extrae el valor tipado de esta columna.
    pub fn extract(&self, resource: &Value, enrichment: Option<&Value>) -> Result<Value> {
        let source = if self.from_enrichment {
            enrichment.unwrap_or(&Value::Null)
        } else {
            resource
        };
        let mut cur = Some(source);
        for key in &self.data_key {
            cur = cur.and_then(|v| v.get(key.as_str()));
        }
        let raw = match cur {
            Some(v) => v.clone(),
            None if self.optional || self.defaulter.is_some() || self.from_enrichment => Value::Null,
            None => {
                return Err(ReplicatorError::InvalidPayload(format!("missing key {} for column {}",
                                                                   self.data_key.join("."),
                                                                   self.name)))
            }
        };
        let converted = match (&self.converter, raw.is_null()) {
            (Some(c), false) => c.convert(&raw)
                                 .map_err(|e| ReplicatorError::InvalidPayload(format!("column {}: {e}", self.name)))?,
            _ => raw,
        };
        let value = match (&self.defaulter, converted.is_null()) {
            (Some(d), true) => d.value(),
            _ => converted,
        };
        self.column_type
            .coerce(value)
            .map_err(|e| ReplicatorError::InvalidPayload(format!("column {}: {e}", self.name)))
    }

    fn json_path_expr(&self, source: &str, as_text: bool) -> String {
        let src = quote_ident(source);
        match self.data_key.as_slice() {
            [single] => {
                let op = if as_text { "->>" } else { "->" };
                format!("({src} {op} {})", quote_literal(single))
            }
            path => {
                let op = if as_text { "#>>" } else { "#>" };
                let escaped: Vec<String> = path.iter()
                                               .map(|k| k.replace('\\', "\\\\").replace('"', "\\\"").replace(',', "\\,"))
                                               .map(|k| format!("\"{k}\""))
                                               .collect();
                format!("({src} {op} {})", quote_literal(&format!("{{{}}}", escaped.join(","))))
            }
        }
    }

    /// Expresión SQL equivalente a `extract` evaluada sobre la fila
    /// almacenada.
    pub fn backfill_sql_expr(&self) -> String {
        if let Some(expr) = &self.backfill_expr {
            return expr.clone();
        }
        let ty = self.column_type;
        let typed = if ty == ColumnType::Object {
            self.json_path_expr(self.source_column(), false)
        } else if ty.is_array() {
            let j = self.json_path_expr(self.source_column(), false);
            format!("(CASE WHEN jsonb_typeof({j}) = 'array' THEN CAST(ARRAY(SELECT jsonb_array_elements_text({j})) AS {}) END)",
                    ty.to_sql_type())
        } else {
            let raw = self.json_path_expr(self.source_column(), true);
            let inner = match &self.converter {
                Some(c) => c.sql(&raw),
                None => raw,
            };
            format!("CAST({inner} AS {})", ty.to_sql_type())
        };
        match &self.defaulter {
            Some(d) => format!("coalesce({typed}, {})", d.sql()),
            None => typed,
        }
    }
}
