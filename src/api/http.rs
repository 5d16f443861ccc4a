//! HTTP implementation of the ticket service

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use super::{ApiError, TicketService};
use crate::config::ApiConfig;
use crate::types::{
    HealthReport, ProcessResult, SubmitResponse, Ticket, TicketCreate, TicketSubmission,
};

const SERVICE_NAME: &str = "helpdesk";

/// Default request timeout; a full swarm run can take around two minutes
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(150);

/// reqwest client for the helpdesk REST API
pub struct HttpTicketService {
    client: Client,
    base_url: String,
}

impl HttpTicketService {
    /// Create a client for the given base URL with the default timeout
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::invalid_request(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, ApiError> {
        Self::with_timeout(&config.base_url, Duration::from_secs(config.timeout_secs))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// URL for a fixed route ending in a caller-supplied id; each segment is
    /// percent-encoded so ids containing `/`, `?` or `#` stay one segment
    fn ticket_url(&self, route: &[&str], ticket_id: &str) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            ApiError::invalid_request(format!("invalid base URL {}: {}", self.base_url, e))
        })?;
        url.path_segments_mut()
            .map_err(|()| {
                ApiError::invalid_request(format!("base URL {} cannot take a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(route)
            .push(ticket_id);
        Ok(url)
    }

    /// Send a request and decode a JSON body, mapping non-2xx to `ApiError::Http`
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = request
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(ApiError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::http(status.as_u16(), error_detail(&body)));
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::parse(format!("failed to parse response: {}", e)))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        debug!("{} GET: {}", SERVICE_NAME, url);
        self.send(self.client.get(&url)).await
    }
}

/// FastAPI wraps errors as `{"detail": "..."}`; fall back to the raw body
fn error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl TicketService for HttpTicketService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn create_ticket(&self, request: &TicketCreate) -> Result<Ticket, ApiError> {
        let url = self.url("/api/tickets");
        debug!("{} POST: {}", SERVICE_NAME, url);
        self.send(self.client.post(&url).json(request)).await
    }

    async fn list_tickets(&self) -> Result<Vec<Ticket>, ApiError> {
        self.get("/api/tickets").await
    }

    async fn get_ticket(&self, ticket_id: &str) -> Result<Ticket, ApiError> {
        let url = self.ticket_url(&["api", "tickets"], ticket_id)?;
        debug!("{} GET: {}", SERVICE_NAME, url);
        self.send(self.client.get(url)).await
    }

    async fn process_ticket(&self, ticket_id: &str) -> Result<ProcessResult, ApiError> {
        let url = self.ticket_url(&["api", "process-ticket"], ticket_id)?;
        debug!("{} POST: {}", SERVICE_NAME, url);
        self.send(self.client.post(url)).await
    }

    async fn submit_ticket(
        &self,
        submission: TicketSubmission,
    ) -> Result<SubmitResponse, ApiError> {
        let url = self.url("/api/submit-ticket");
        debug!(
            "{} POST (multipart, {} files): {}",
            SERVICE_NAME,
            submission.attachments.len(),
            url
        );

        let mut form = Form::new()
            .text("title", submission.title)
            .text("description", submission.description)
            .text("severity", submission.severity)
            .text("category", submission.category);

        for attachment in submission.attachments {
            let part = Part::bytes(attachment.bytes)
                .file_name(attachment.file_name)
                .mime_str(&attachment.content_type)
                .map_err(|e| ApiError::invalid_request(format!("bad content type: {}", e)))?;
            form = form.part("files", part);
        }

        self.send(self.client.post(&url).multipart(form)).await
    }

    async fn health(&self) -> Result<HealthReport, ApiError> {
        self.get("/health").await
    }
}
