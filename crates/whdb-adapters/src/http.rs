//! Cliente HTTP bloqueante compartido por los adapters.
//!
//! Traduce los fallos de `reqwest` a `ExternalError` para que el driver de
//! backfill pueda decidir entre reintentar, marcar credenciales inválidas o
//! abortar.
use std::time::Duration;

use log::debug;
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use whdb_core::errors::{ExternalError, ReplicatorError, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
pub const USER_AGENT: &str = concat!("webhookdb-rust/", env!("CARGO_PKG_VERSION"));

/// Respuesta JSON ya decodificada.
#[derive(Debug, Clone)]
pub struct JsonResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Value,
}

impl JsonResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout)
                                      .user_agent(USER_AGENT)
                                      .build()
                                      .map_err(|e| ReplicatorError::Invariant(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    /// GET que espera un cuerpo JSON. Cualquier status no 2xx es un
    /// `ExternalError::status`.
    pub fn get_json(&self, url: &str, headers: &[(&str, String)]) -> Result<JsonResponse> {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                                                                   ReplicatorError::Invariant(format!("bad header \
                                                                                                       name: {e}"))
                                                               })?;
            let value =
                HeaderValue::from_str(value).map_err(|e| ReplicatorError::InvalidInput(format!("bad header value: {e}")))?;
            map.insert(name, value);
        }
        debug!("http:get url={url}");
        let resp = self.client.get(url).headers(map).send().map_err(map_send_error)?;
        decode(resp)
    }
}

fn map_send_error(e: reqwest::Error) -> ReplicatorError {
    if e.is_timeout() {
        ExternalError::timeout(e.to_string()).into()
    } else if e.is_connect() || e.is_request() {
        ExternalError::connection(e.to_string()).into()
    } else {
        ExternalError::decode(e.to_string()).into()
    }
}

fn decode(resp: Response) -> Result<JsonResponse> {
    let status = resp.status().as_u16();
    let headers = resp.headers().clone();
    let text = resp.text().map_err(map_send_error)?;
    if !(200..300).contains(&status) {
        let snippet: String = text.chars().take(200).collect();
        return Err(ExternalError::status(status, snippet).into());
    }
    let body = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).map_err(|e| ExternalError::decode(format!("invalid JSON body: {e}")))?
    };
    Ok(JsonResponse { status, headers, body })
}

/// URL `rel="next"` de un header `Link` (RFC 8288), si existe.
pub fn parse_link_next(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
                         let mut pieces = part.split(';');
                         let target = pieces.next()?.trim();
                         let is_next = pieces.any(|p| {
                                                 let p = p.trim().replace(' ', "");
                                                 p == "rel=\"next\"" || p == "rel=next"
                                             });
                         if !is_next {
                             return None;
                         }
                         target.strip_prefix('<')
                               .and_then(|t| t.strip_suffix('>'))
                               .map(str::to_string)
                     })
}
