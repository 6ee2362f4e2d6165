//! Configuración central de la aplicación.
//! Carga variables de entorno (.env) y expone una estructura inmutable
//! (`CONFIG`) de la que sale el `EngineConfig` del motor.
use std::env;
use std::time::Duration;

use log::warn;
use once_cell::sync::Lazy;
use serde::Serialize;
use whdb_core::backfill::RetryPolicy;
use whdb_core::EngineConfig;

/// Configuración global del proceso.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppConfig {
    /// Backfills de una sola página (`WHDB_REGRESSION_MODE`).
    pub regression_mode: bool,
    /// Schema donde viven las tablas replicadas (`WHDB_REPLICATION_SCHEMA`).
    pub replication_schema: String,
    pub backfill_max_attempts: u32,
    #[serde(with = "millis")]
    pub backfill_backoff: Duration,
    /// Espera del worker cuando no hay jobs pendientes.
    #[serde(with = "millis")]
    pub worker_poll: Duration,
    pub api_path_prefix: String,
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self { regression_mode: engine.regression_mode,
               replication_schema: engine.schema,
               backfill_max_attempts: engine.retry.max_attempts,
               backfill_backoff: engine.retry.backoff,
               worker_poll: Duration::from_millis(1000),
               api_path_prefix: engine.api_path_prefix }
    }
}

fn parse_bool(key: &str, raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => {
            warn!("config:ignored key={key} value={raw}");
            None
        }
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
    let parsed = raw.trim().parse().ok();
    if parsed.is_none() {
        warn!("config:ignored key={key} value={raw}");
    }
    parsed
}

fn non_blank(raw: String) -> Option<String> {
    let t = raw.trim();
    (!t.is_empty()).then(|| t.to_string())
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| env::var(k).ok())
    }

    /// Igual que `from_env` pero con una fuente arbitraria. Los valores que
    /// no parsean se ignoran con un warning y quedan en el default.
    pub fn from_lookup<F>(get: F) -> Self
        where F: Fn(&str) -> Option<String>
    {
        let d = Self::default();
        let bool_var = |key: &str, default: bool| get(key).and_then(|v| parse_bool(key, &v)).unwrap_or(default);
        let ms_var = |key: &str, default: Duration| {
            get(key).and_then(|v| parse_num::<u64>(key, &v))
                    .map(Duration::from_millis)
                    .unwrap_or(default)
        };
        Self { regression_mode: bool_var("WHDB_REGRESSION_MODE", d.regression_mode),
               replication_schema: get("WHDB_REPLICATION_SCHEMA").and_then(non_blank)
                                                                 .unwrap_or(d.replication_schema),
               backfill_max_attempts: get("WHDB_BACKFILL_MAX_ATTEMPTS").and_then(|v| {
                                                                          parse_num("WHDB_BACKFILL_MAX_ATTEMPTS", &v)
                                                                      })
                                                                      .unwrap_or(d.backfill_max_attempts),
               backfill_backoff: ms_var("WHDB_BACKFILL_BACKOFF_MS", d.backfill_backoff),
               worker_poll: ms_var("WHDB_WORKER_POLL_MS", d.worker_poll),
               api_path_prefix: get("WHDB_API_PATH_PREFIX").and_then(non_blank)
                                                           .map(|p| p.trim_end_matches('/').to_string())
                                                           .unwrap_or(d.api_path_prefix) }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig { schema: self.replication_schema.clone(),
                       regression_mode: self.regression_mode,
                       retry: RetryPolicy::new(self.backfill_max_attempts, self.backfill_backoff),
                       api_path_prefix: self.api_path_prefix.clone() }
    }
}

/// Instancia global perezosa de configuración, evaluada una sola vez.
pub static CONFIG: Lazy<AppConfig> = Lazy::new(|| {
    let _ = dotenvy::dotenv(); // ignora error si no existe .env
    AppConfig::from_env()
});

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let m: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| m.get(k).cloned()
    }

    #[test]
    fn defaults_match_engine_defaults() {
        let cfg = AppConfig::from_lookup(lookup(&[]));
        assert_eq!(cfg, AppConfig::default());
        let engine = cfg.engine_config();
        assert_eq!(engine.schema, "public");
        assert!(!engine.regression_mode);
        assert_eq!(engine.retry, RetryPolicy::default());
    }

    #[test]
    fn reads_every_variable() {
        let cfg = AppConfig::from_lookup(lookup(&[("WHDB_REGRESSION_MODE", "true"),
                                                  ("WHDB_REPLICATION_SCHEMA", "replicated"),
                                                  ("WHDB_BACKFILL_MAX_ATTEMPTS", "5"),
                                                  ("WHDB_BACKFILL_BACKOFF_MS", "40"),
                                                  ("WHDB_WORKER_POLL_MS", "250"),
                                                  ("WHDB_API_PATH_PREFIX", "/api/v2/")]));
        assert!(cfg.regression_mode);
        assert_eq!(cfg.worker_poll, Duration::from_millis(250));
        let engine = cfg.engine_config();
        assert_eq!(engine.schema, "replicated");
        assert_eq!(engine.retry.max_attempts, 5);
        assert_eq!(engine.retry.backoff, Duration::from_millis(40));
        assert_eq!(engine.api_path_prefix, "/api/v2");
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let cfg = AppConfig::from_lookup(lookup(&[("WHDB_REGRESSION_MODE", "maybe"),
                                                  ("WHDB_BACKFILL_MAX_ATTEMPTS", "-1"),
                                                  ("WHDB_REPLICATION_SCHEMA", "   ")]));
        assert_eq!(cfg, AppConfig::default());
    }
}
