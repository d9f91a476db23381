//! HTTP implementation of the console gateway.
//!
//! Every call carries an `X-Request-ID`, plus the admin session and token
//! headers when present. Non-success responses become
//! [`ConsoleError::GatewayStatus`] with the server's message when it sent one.

use async_trait::async_trait;
use campaign_admin_console::ConsoleGateway;
use campaign_core::storage::{KeyValueStore, ADMIN_SESSION_KEY};
use campaign_core::types::{
    Campaign, CampaignStatus, Job, JobKind, JobParams, JobReceipt, ProgressSnapshot, SavedSegment,
    SegmentFilter, SegmentSummary,
};
use campaign_core::{ConsoleConfig, ConsoleError, ConsoleResult};
use reqwest::{header, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const ADMIN_SESSION_HEADER: &str = "x-admin-session";
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Serialize)]
struct SegmentNameBody<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct SavedSegmentBody<'a> {
    name: &'a str,
    filter: &'a SegmentFilter,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Nested { error: ErrorDetail },
    Flat { error: String },
    Message { message: String },
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

pub struct HttpGateway {
    http: reqwest::Client,
    base: Url,
    admin_token: Option<String>,
    store: Arc<dyn KeyValueStore>,
}

impl HttpGateway {
    pub fn new(config: &ConsoleConfig, store: Arc<dyn KeyValueStore>) -> ConsoleResult<Self> {
        let base = Url::parse(&config.api.base_url).map_err(|e| {
            ConsoleError::Config(format!("invalid base_url '{}': {}", config.api.base_url, e))
        })?;
        if base.cannot_be_a_base() {
            return Err(ConsoleError::Config(format!(
                "base_url '{}' cannot carry a path",
                config.api.base_url
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.api.request_timeout_ms))
            .build()
            .map_err(|e| ConsoleError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base,
            admin_token: config.api.admin_token.clone().filter(|t| !t.is_empty()),
            store,
        })
    }

    /// `base` with `segments` appended as encoded path segments.
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let mut request = self
            .http
            .request(method, url)
            .header(REQUEST_ID_HEADER, Uuid::new_v4().to_string())
            .header(header::ACCEPT, "application/json");
        if let Some(session) = self.store.get(ADMIN_SESSION_KEY).filter(|s| !s.is_empty()) {
            request = request.header(ADMIN_SESSION_HEADER, session);
        }
        if let Some(token) = &self.admin_token {
            request = request.header(ADMIN_TOKEN_HEADER, token);
        }
        request
    }

    async fn send(&self, request: RequestBuilder) -> ConsoleResult<Response> {
        let response = request.send().await.map_err(|e| {
            metrics::counter!("console.gateway.transport_errors").increment(1);
            ConsoleError::Gateway(format!("request failed: {e}"))
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = error_message(status, &body);
        warn!(status = status.as_u16(), message = %message, "Gateway returned an error");
        metrics::counter!("console.gateway.status_errors").increment(1);
        Err(ConsoleError::GatewayStatus {
            status: status.as_u16(),
            message,
        })
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> ConsoleResult<T> {
        let response = self.send(request).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ConsoleError::Gateway(format!("failed to read response: {e}")))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> ConsoleResult<T> {
        self.json(self.request(Method::GET, url)).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &B,
    ) -> ConsoleResult<T> {
        self.json(self.request(Method::POST, url).json(body)).await
    }

    async fn delete(&self, url: Url) -> ConsoleResult<()> {
        self.send(self.request(Method::DELETE, url)).await?;
        Ok(())
    }
}

/// Operator-facing message for a failed response.
pub fn error_message(status: StatusCode, body: &str) -> String {
    let message = match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody::Nested { error }) => error.message,
        Ok(ErrorBody::Flat { error }) => error,
        Ok(ErrorBody::Message { message }) => message,
        Err(_) => body.trim().to_string(),
    };
    if message.is_empty() {
        format!(
            "Request failed with status {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        )
        .trim_end()
        .to_string()
    } else {
        message
    }
}

#[async_trait]
impl ConsoleGateway for HttpGateway {
    async fn create_job(&self, params: &JobParams) -> ConsoleResult<JobReceipt> {
        match params {
            JobParams::CampaignSend { campaign_id } => self.send_now(campaign_id).await,
            JobParams::SegmentExport { .. } => {
                debug!(key = %params.key(), "Creating export job");
                self.post(self.endpoint(&["api", "segments", "exports"]), params)
                    .await
            }
        }
    }

    async fn send_now(&self, campaign_id: &str) -> ConsoleResult<JobReceipt> {
        debug!(campaign_id, "Requesting immediate send");
        self.post(
            self.endpoint(&["api", "campaigns", campaign_id, "send"]),
            &serde_json::json!({}),
        )
        .await
    }

    async fn job_status(&self, kind: JobKind, id: &str) -> ConsoleResult<ProgressSnapshot> {
        let url = match kind {
            JobKind::CampaignSend => self.endpoint(&["api", "campaigns", "jobs", id, "progress"]),
            JobKind::SegmentExport => self.endpoint(&["api", "segments", "exports", id]),
        };
        self.get(url).await
    }

    async fn list_recent_jobs(&self, limit: usize) -> ConsoleResult<Vec<Job>> {
        let mut url = self.endpoint(&["api", "jobs"]);
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());
        self.get(url).await
    }

    async fn list_campaigns(&self, status: Option<CampaignStatus>) -> ConsoleResult<Vec<Campaign>> {
        let mut url = self.endpoint(&["api", "campaigns"]);
        if let Some(status) = status {
            url.query_pairs_mut().append_pair("status", status.as_param());
        }
        self.get(url).await
    }

    async fn delete_campaign(&self, campaign_id: &str) -> ConsoleResult<()> {
        self.delete(self.endpoint(&["api", "campaigns", campaign_id]))
            .await
    }

    async fn segment_summary(&self, filter: &SegmentFilter) -> ConsoleResult<SegmentSummary> {
        let mut url = self.endpoint(&["api", "segments", "summary"]);
        append_filter(&mut url, filter);
        self.get(url).await
    }

    async fn list_saved_segments(&self) -> ConsoleResult<Vec<SavedSegment>> {
        self.get(self.endpoint(&["api", "segments", "saved"])).await
    }

    async fn create_saved_segment(
        &self,
        name: &str,
        filter: &SegmentFilter,
    ) -> ConsoleResult<SavedSegment> {
        self.post(
            self.endpoint(&["api", "segments", "saved"]),
            &SavedSegmentBody { name, filter },
        )
        .await
    }

    async fn rename_saved_segment(&self, id: &str, name: &str) -> ConsoleResult<SavedSegment> {
        let url = self.endpoint(&["api", "segments", "saved", id]);
        self.json(
            self.request(Method::PATCH, url)
                .json(&SegmentNameBody { name }),
        )
        .await
    }

    async fn delete_saved_segment(&self, id: &str) -> ConsoleResult<()> {
        self.delete(self.endpoint(&["api", "segments", "saved", id]))
            .await
    }
}

/// Audience filter as query parameters; unset dimensions are omitted.
pub fn append_filter(url: &mut Url, filter: &SegmentFilter) {
    let mut pairs = url.query_pairs_mut();
    if let Some(continent) = &filter.continent {
        pairs.append_pair("continent", continent);
    }
    if let Some(source) = &filter.source {
        pairs.append_pair("source", source);
    }
    if let Some(engagement) = filter.engagement.as_param() {
        pairs.append_pair("engagement", engagement);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use campaign_core::types::Engagement;
    use campaign_core::MemoryStore;

    fn gateway(base_url: &str) -> HttpGateway {
        let mut config = ConsoleConfig::default();
        config.api.base_url = base_url.to_string();
        HttpGateway::new(&config, MemoryStore::shared()).unwrap()
    }

    #[test]
    fn test_endpoint_encodes_ids() {
        let gateway = gateway("https://console.example.com/admin/");
        let url = gateway.endpoint(&["api", "campaigns", "spring sale/1"]);
        assert_eq!(
            url.as_str(),
            "https://console.example.com/admin/api/campaigns/spring%20sale%2F1"
        );
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        let mut config = ConsoleConfig::default();
        config.api.base_url = "not a url".into();
        assert!(matches!(
            HttpGateway::new(&config, MemoryStore::shared()),
            Err(ConsoleError::Config(_))
        ));
    }

    #[test]
    fn test_filter_query_omits_unset_dimensions() {
        let mut url = Url::parse("https://console.example.com/api/segments/summary").unwrap();
        append_filter(
            &mut url,
            &SegmentFilter {
                continent: Some("EU".into()),
                source: None,
                engagement: Engagement::NotEngaged,
            },
        );
        assert_eq!(url.query(), Some("continent=EU&engagement=not_engaged"));
    }

    #[test]
    fn test_error_message_shapes() {
        let status = StatusCode::UNPROCESSABLE_ENTITY;
        assert_eq!(
            error_message(status, r#"{"error":"Segment is empty"}"#),
            "Segment is empty"
        );
        assert_eq!(
            error_message(status, r#"{"error":{"message":"Sender not verified"}}"#),
            "Sender not verified"
        );
        assert_eq!(
            error_message(status, r#"{"message":"Quota exceeded"}"#),
            "Quota exceeded"
        );
        assert_eq!(error_message(status, "  upstream down \n"), "upstream down");
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, ""),
            "Request failed with status 502 Bad Gateway"
        );
    }
}
