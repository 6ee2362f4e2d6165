//! Converters y defaulters de columnas.
//!
//! Cada converter existe en dos formas equivalentes: una función Rust que se
//! aplica al upsert (payload -> valor tipado) y una expresión SQL que se usa
//! al rellenar columnas nuevas desde la columna `data`. Ambas deben producir
//! el mismo resultado para el mismo payload.
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use crate::schema::quote_literal;

/// RFC 2822 sin exigir que el día de la semana coincida con la fecha
/// (`Thu, 30 Jul 2014` es válido aunque ese día fuera miércoles).
fn parse_rfc2822_lenient(s: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(t) = DateTime::parse_from_rfc2822(s) {
        return Some(t);
    }
    let (day, rest) = s.split_once(',')?;
    if day.trim().len() != 3 || !day.trim().chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    DateTime::parse_from_rfc2822(rest.trim()).ok()
}

/// Fecha/hora con su offset original, para los formatos que lo llevan.
fn parse_with_offset(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s).ok()
                                   .or_else(|| parse_rfc2822_lenient(s))
                                   .or_else(|| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z").ok())
}

/// Interpreta un string de fecha/hora en los formatos que envían los
/// proveedores: RFC 3339, RFC 2822 y `YYYY-MM-DD HH:MM:SS` (UTC).
pub fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Some(t) = parse_with_offset(s) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&t));
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|t| Utc.from_utc_datetime(&t));
    }
    None
}

/// Fecha calendario tal como está escrita, en el offset del propio literal
/// (igual que `CAST(... AS date)` en Postgres).
pub fn parse_local_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Some(t) = parse_with_offset(s) {
        return Some(t.date_naive());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").ok().map(|t| t.date())
}

pub(crate) fn format_time(t: DateTime<Utc>) -> Value {
    Value::String(t.to_rfc3339())
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Conversión pura de un valor crudo a su forma tipada.
#[derive(Clone, Debug)]
pub enum Converter {
    /// `"12"` o `12.0` -> `12`.
    ToInteger,
    /// String de fecha/hora (RFC 3339 / RFC 2822) -> timestamp.
    Time,
    /// Segundos desde epoch -> timestamp.
    FromUnixSeconds,
    /// Milisegundos desde epoch -> timestamp.
    FromUnixMillis,
    /// Primeros 10 caracteres como `YYYY-MM-DD`.
    Date,
    /// Escape para adapters: el autor garantiza que ambas formas coinciden.
    /// El fragmento SQL se concatena sin validar.
    Custom {
        name: &'static str,
        rust: fn(&Value) -> Result<Value, String>,
        sql: fn(&str) -> String,
    },
}

impl Converter {
    pub fn name(&self) -> &str {
        match self {
            Self::ToInteger => "to_integer",
            Self::Time => "time",
            Self::FromUnixSeconds => "from_unix_seconds",
            Self::FromUnixMillis => "from_unix_millis",
            Self::Date => "date",
            Self::Custom { name, .. } => name,
        }
    }

    /// Aplica la conversión a un valor no nulo.
    pub fn convert(&self, v: &Value) -> Result<Value, String> {
        match self {
            Self::ToInteger => {
                if let Some(i) = v.as_i64() {
                    return Ok(Value::from(i));
                }
                if let Value::String(s) = v {
                    if let Ok(i) = s.trim().parse::<i64>() {
                        return Ok(Value::from(i));
                    }
                }
                as_f64(v).map(|f| Value::from(f.round() as i64))
                         .ok_or_else(|| format!("cannot convert {v} to integer"))
            }
            Self::Time => v.as_str()
                           .and_then(parse_time)
                           .map(format_time)
                           .ok_or_else(|| format!("cannot parse time from {v}")),
            Self::FromUnixSeconds => as_f64(v).and_then(|secs| {
                                                  let whole = secs.trunc() as i64;
                                                  let nanos = ((secs - secs.trunc()) * 1e9).round() as u32;
                                                  Utc.timestamp_opt(whole, nanos).single()
                                              })
                                              .map(format_time)
                                              .ok_or_else(|| format!("cannot convert {v} from unix seconds")),
            Self::FromUnixMillis => as_f64(v).and_then(|ms| Utc.timestamp_millis_opt(ms.round() as i64).single())
                                             .map(format_time)
                                             .ok_or_else(|| format!("cannot convert {v} from unix millis")),
            Self::Date => v.as_str()
                           .and_then(|s| s.get(0..10))
                           .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
                           .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                           .ok_or_else(|| format!("cannot parse date from {v}")),
            Self::Custom { rust, .. } => rust(v),
        }
    }

    /// Envuelve la extracción de texto crudo (`raw`) con la forma SQL del
    /// converter. El resultado luego se castea al tipo de la columna.
    pub fn sql(&self, raw: &str) -> String {
        match self {
            Self::ToInteger => format!("CAST({raw} AS numeric)"),
            Self::Time => format!("CAST({raw} AS timestamptz)"),
            Self::FromUnixSeconds => format!("to_timestamp(CAST({raw} AS double precision))"),
            Self::FromUnixMillis => format!("to_timestamp(CAST({raw} AS double precision) / 1000)"),
            Self::Date => format!("CAST(substring({raw} from 1 for 10) AS date)"),
            Self::Custom { sql, .. } => sql(raw),
        }
    }
}

/// Valor por defecto cuando el payload no trae el campo (o trae null).
#[derive(Clone, Debug, PartialEq)]
pub enum Defaulter {
    Now,
    UnixEpoch,
    Constant(Value),
}

impl Defaulter {
    pub fn value(&self) -> Value {
        match self {
            Self::Now => format_time(Utc::now()),
            Self::UnixEpoch => format_time(DateTime::<Utc>::UNIX_EPOCH),
            Self::Constant(v) => v.clone(),
        }
    }

    pub fn sql(&self) -> String {
        match self {
            Self::Now => "now()".to_string(),
            Self::UnixEpoch => "to_timestamp(0)".to_string(),
            Self::Constant(Value::Null) => "NULL".to_string(),
            Self::Constant(Value::Bool(b)) => b.to_string(),
            Self::Constant(Value::Number(n)) => n.to_string(),
            Self::Constant(Value::String(s)) => quote_literal(s),
            Self::Constant(other) => quote_literal(&other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_rfc2822_and_rfc3339() {
        let a = parse_time("Thu, 30 Jul 2015 21:12:33 +0000").expect("rfc2822");
        let b = parse_time("2015-07-30T21:12:33Z").expect("rfc3339");
        assert_eq!(a, b);
        assert_eq!(parse_time("2015-07-30 21:12:33"), Some(b));
        assert!(parse_time("not a time").is_none());
    }

    #[test]
    fn rfc2822_ignores_a_mismatched_weekday() {
        // 30 Jul 2014 fue miércoles; Postgres acepta el literal igual
        let t = parse_time("Thu, 30 Jul 2014 21:12:33 +0000").expect("rfc2822 sin validar el día");
        assert_eq!(Some(t), parse_time("2014-07-30T21:12:33Z"));
        assert!(parse_time("Thu, 30 Jul 2016 21:12:33 +0000").is_some());
    }

    #[test]
    fn local_date_keeps_the_literal_offset() {
        let d = |s: &str| parse_local_date(s).map(|d| d.to_string());
        assert_eq!(d("2020-02-03T01:00:00+05:00").as_deref(), Some("2020-02-03"));
        assert_eq!(d("2020-02-03T23:30:00-08:00").as_deref(), Some("2020-02-03"));
        assert_eq!(d("Mon, 03 Feb 2020 01:00:00 +0500").as_deref(), Some("2020-02-03"));
        assert_eq!(d("2020-02-03").as_deref(), Some("2020-02-03"));
        assert!(d("yesterday").is_none());
    }

    #[test]
    fn integer_converter() {
        assert_eq!(Converter::ToInteger.convert(&json!("12")).unwrap(), json!(12));
        assert_eq!(Converter::ToInteger.convert(&json!(12.4)).unwrap(), json!(12));
        assert!(Converter::ToInteger.convert(&json!("abc")).is_err());
        assert_eq!(Converter::ToInteger.sql("(\"data\" ->> 'c2')"), "CAST((\"data\" ->> 'c2') AS numeric)");
    }

    #[test]
    fn unix_converters() {
        assert_eq!(Converter::FromUnixSeconds.convert(&json!(1438290753)).unwrap(),
                   json!("2015-07-30T21:12:33+00:00"));
        assert_eq!(Converter::FromUnixMillis.convert(&json!("1438290753000")).unwrap(),
                   json!("2015-07-30T21:12:33+00:00"));
    }

    #[test]
    fn date_converter_takes_prefix() {
        assert_eq!(Converter::Date.convert(&json!("2020-02-03T10:00:00Z")).unwrap(), json!("2020-02-03"));
        assert!(Converter::Date.convert(&json!("02/03/2020")).is_err());
    }

    #[test]
    fn defaulter_sql() {
        assert_eq!(Defaulter::Now.sql(), "now()");
        assert_eq!(Defaulter::Constant(json!("it's")).sql(), "'it''s'");
        assert_eq!(Defaulter::Constant(json!(5)).sql(), "5");
        assert_eq!(Defaulter::UnixEpoch.value(), json!("1970-01-01T00:00:00+00:00"));
    }
}
