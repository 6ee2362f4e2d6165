//! `github_issue_v1`: issues de un repositorio de GitHub.
//!
//! Webhooks firmados con `X-Hub-Signature-256`; backfill paginado por el
//! header `Link` de la API REST, en orden de `updated_at` ascendente para
//! que los backfills incrementales usen `since`.
use std::time::Duration;

use log::debug;
use serde_json::{json, Value};
use whdb_core::column::{Column, ColumnType, Converter};
use whdb_core::engine::ReplicationContext;
use whdb_core::errors::{ExternalError, ReplicatorError, Result};
use whdb_core::model::ServiceIntegration;
use whdb_core::replicator::{BackfillPage, PageRequest, Replicator, ReplicatorDescriptor, WebhookRequest,
                            WebhookResponse};
use whdb_core::state_machine::{self, transition_url, StateMachineStep};
use whdb_core::upsert::UpdatePolicy;

use crate::http::{parse_link_next, HttpClient, JsonResponse, DEFAULT_TIMEOUT};
use crate::signature;

pub const SERVICE_NAME: &str = "github_issue_v1";
pub const DEFAULT_API_BASE: &str = "https://api.github.com";
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const EVENT_HEADER: &str = "x-github-event";

pub struct GithubIssueReplicator {
    descriptor: ReplicatorDescriptor,
    api_base: String,
    timeout: Duration,
}

impl Default for GithubIssueReplicator {
    fn default() -> Self {
        Self::new()
    }
}

impl GithubIssueReplicator {
    pub fn new() -> Self {
        Self { descriptor: ReplicatorDescriptor::new(SERVICE_NAME, "GitHub Issue", "GitHub Issues"),
               api_base: DEFAULT_API_BASE.to_string(),
               timeout: DEFAULT_TIMEOUT }
    }

    /// Base alternativa (GitHub Enterprise o un servidor de pruebas).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// URL de la primera página para `owner/repo`.
    pub fn first_page_url(&self, repo: &str, since: Option<&str>) -> String {
        let mut url = format!("{}/repos/{}/issues?state=all&per_page=100&sort=updated&direction=asc",
                              self.api_base, repo);
        if let Some(since) = since {
            url.push_str("&since=");
            url.push_str(since);
        }
        url
    }
}

fn valid_repo(value: &str) -> bool {
    let mut parts = value.split('/');
    let ok_part = |p: Option<&str>| {
        p.is_some_and(|p| {
             !p.is_empty() && p.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
         })
    };
    ok_part(parts.next()) && ok_part(parts.next()) && parts.next().is_none()
}

impl Replicator for GithubIssueReplicator {
    fn descriptor(&self) -> &ReplicatorDescriptor {
        &self.descriptor
    }

    fn remote_key_column(&self) -> Column {
        Column::new("github_id", ColumnType::BigInt).data_key(["id"])
    }

    fn denormalized_columns(&self) -> Vec<Column> {
        vec![Column::new("number", ColumnType::Integer),
             Column::new("title", ColumnType::Text).optional(),
             Column::new("state", ColumnType::Text).indexed(),
             Column::new("html_url", ColumnType::Text).optional(),
             Column::new("user_login", ColumnType::Text).data_key(["user", "login"]).optional(),
             Column::new("created_at", ColumnType::Timestamp).converter(Converter::Time),
             Column::new("updated_at", ColumnType::Timestamp).converter(Converter::Time)
                                                             .indexed(),
             Column::new("closed_at", ColumnType::Timestamp).converter(Converter::Time)
                                                            .optional(),]
    }

    fn update_policy(&self) -> UpdatePolicy {
        UpdatePolicy::ordered_by("updated_at", ColumnType::Timestamp)
    }

    fn webhook_response(&self, sint: &ServiceIntegration, request: &WebhookRequest) -> WebhookResponse {
        let Some(secret) = sint.webhook_secret() else {
            return WebhookResponse::error(409, "webhook secret not configured");
        };
        match request.get_header(SIGNATURE_HEADER) {
            Some(sig) if signature::verify(secret, request.body.as_bytes(), sig) => WebhookResponse::ok(),
            _ => WebhookResponse::error(401, "invalid signature"),
        }
    }

    fn resource_and_event(&self, request: &WebhookRequest) -> Result<Option<(Value, Option<Value>)>> {
        let event = request.get_header(EVENT_HEADER).unwrap_or("issues");
        if event != "issues" {
            debug!("github:webhook ignored event={event}");
            return Ok(None);
        }
        let body = request.json_body()?;
        match body.get("issue") {
            Some(issue @ Value::Object(_)) => {
                let action = body.get("action").cloned().unwrap_or(Value::Null);
                Ok(Some((issue.clone(), Some(json!({ "action": action })))))
            }
            _ => Err(ReplicatorError::InvalidPayload("issues event without an issue object".into())),
        }
    }

    fn fetch_backfill_page(&self, _ctx: &ReplicationContext, sint: &ServiceIntegration, page: &PageRequest)
                           -> Result<BackfillPage> {
        let token = sint.backfill_secret()
                        .ok_or_else(|| ReplicatorError::CredentialsMissing("GitHub access token".into()))?;
        let repo = sint.api_url()
                       .ok_or_else(|| ReplicatorError::CredentialsMissing("GitHub repository".into()))?;
        let url = match &page.token {
            Some(Value::String(next)) if !next.is_empty() => next.clone(),
            _ => {
                let since = page.last_backfilled_at.map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string());
                self.first_page_url(repo, since.as_deref())
            }
        };
        let client = HttpClient::new(self.timeout)?;
        let resp = client.get_json(&url,
                                   &[("accept", "application/vnd.github+json".to_string()),
                                     ("authorization", format!("Bearer {token}")),
                                     ("x-github-api-version", "2022-11-28".to_string())])?;
        let page = issues_page(resp)?;
        debug!("github:page repo={repo} items={} has_next={}", page.items.len(), page.next_page_token.is_some());
        Ok(page)
    }

    fn verify_credentials_on_setup(&self) -> bool {
        true
    }

    fn verify_backfill_error_message(&self, err: &ReplicatorError) -> String {
        match err {
            ReplicatorError::External(e) if e.status == Some(404) => {
                "We could not find that repository. Check the owner/repo and that your token can read it.".into()
            }
            e if e.is_auth_failure() => {
                "GitHub rejected your access token. Make sure it has read access to issues, then try again.".into()
            }
            _ => "We could not reach GitHub to verify your access token. Please try again later.".into(),
        }
    }

    fn calculate_backfill_state_machine(&self, ctx: &ReplicationContext, sint: &ServiceIntegration)
                                        -> Result<StateMachineStep> {
        if sint.api_url().is_none() {
            return Ok(StateMachineStep::prompting("Enter the repository, as owner/repo:",
                                                  transition_url(ctx, sint, "api_url"))
                      .output("We will backfill the issues of one GitHub repository."));
        }
        state_machine::default_backfill_state_machine(ctx, self, sint)
    }

    fn validate_state_change(&self, field: &str, value: &str) -> Result<()> {
        if field == "api_url" && !valid_repo(value) {
            return Err(ReplicatorError::InvalidInput(format!("{value:?} is not an owner/repo name")));
        }
        Ok(())
    }
}

/// Página de issues a partir de la respuesta de `/repos/{repo}/issues`. El
/// token siguiente sale del header `Link`.
fn issues_page(resp: JsonResponse) -> Result<BackfillPage> {
    let next = resp.header("link").and_then(parse_link_next).map(Value::String);
    let Value::Array(items) = resp.body else {
        return Err(ExternalError::decode("expected a JSON array of issues").into());
    };
    // La API de issues también devuelve pull requests.
    let issues: Vec<Value> = items.into_iter().filter(|i| i.get("pull_request").is_none()).collect();
    Ok(BackfillPage::new(issues, next))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_validation() {
        assert!(valid_repo("rust-lang/rust"));
        assert!(valid_repo("a.b/c_d"));
        assert!(!valid_repo("rust-lang"));
        assert!(!valid_repo("a/b/c"));
        assert!(!valid_repo("/rust"));
        assert!(!valid_repo("a b/c"));
    }

    #[test]
    fn first_page_url_carries_since() {
        let r = GithubIssueReplicator::new().with_api_base("http://localhost:9/");
        assert_eq!(r.first_page_url("o/r", None),
                   "http://localhost:9/repos/o/r/issues?state=all&per_page=100&sort=updated&direction=asc");
        assert!(r.first_page_url("o/r", Some("2024-01-01T00:00:00Z"))
                 .ends_with("&since=2024-01-01T00:00:00Z"));
    }

    fn response(body: Value, link: Option<&str>) -> JsonResponse {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(l) = link {
            headers.insert("link", reqwest::header::HeaderValue::from_str(l).unwrap());
        }
        JsonResponse { status: 200,
                       headers,
                       body }
    }

    #[test]
    fn issues_page_follows_link_and_skips_pull_requests() {
        let link = r#"<https://api.github.com/repos/o/r/issues?page=2>; rel="next", <https://api.github.com/repos/o/r/issues?page=5>; rel="last""#;
        let page = issues_page(response(json!([{"id": 1}, {"id": 2, "pull_request": {}}, {"id": 3}]), Some(link))).unwrap();
        assert_eq!(page.items, vec![json!({"id": 1}), json!({"id": 3})]);
        assert_eq!(page.next_page_token,
                   Some(json!("https://api.github.com/repos/o/r/issues?page=2")));
    }

    #[test]
    fn issues_page_without_link_is_last() {
        let page = issues_page(response(json!([{"id": 1}]), None)).unwrap();
        assert!(page.is_last());
        assert!(issues_page(response(json!({"message": "nope"}), None)).is_err());
    }
}
