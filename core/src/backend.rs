/// Stream API backend
///
/// `StreamBackend` is the seam between the dispatcher and the server. The
/// HTTP implementation talks to the case management REST API:
/// - `POST api/stream` creates a session and returns its id
/// - `GET api/stream/{id}` long-polls the next batch of update events
/// - `GET api/user/current` refreshes the authenticated user
use crate::config::StreamConfig;
use crate::event::UpdateEvent;
use crate::{Result, StreamError};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, Url};
use std::time::Duration;
use tracing::{debug, warn};

/// Successful answer to a poll request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PollResponse {
    pub status: u16,
    pub events: Vec<UpdateEvent>,
}

impl PollResponse {
    pub fn ok(events: Vec<UpdateEvent>) -> Self {
        Self {
            status: 200,
            events,
        }
    }
}

/// Server operations the dispatcher depends on.
///
/// Failures that came with an HTTP answer are reported as
/// [`StreamError::Status`] so the dispatcher can tell 401 and 404 apart.
#[async_trait]
pub trait StreamBackend: Send + Sync {
    /// Opens a new stream session and returns its opaque identifier.
    async fn create_session(&self) -> Result<String>;

    /// Waits for the next batch of events on `session_id`.
    async fn poll(&self, session_id: &str) -> Result<PollResponse>;

    /// Re-reads the current user, which extends the login session.
    async fn refresh_user(&self) -> Result<()>;
}

/// reqwest-based backend.
pub struct HttpBackend {
    base_url: Url,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: &StreamConfig) -> Result<Self> {
        let mut base_url = Url::parse(&config.base_url)
            .map_err(|e| StreamError::Config(format!("Invalid base URL {}: {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(StreamError::Config(format!(
                "Base URL cannot carry paths: {}",
                config.base_url
            )));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self {
            base_url,
            api_key: config.api_key.clone(),
            http_client,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Appends escaped path segments to the base URL.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StreamError::Config(format!("Base URL cannot carry paths: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Turns a non-success answer into `StreamError::Status`.
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!(target: "backend", status = %status, "Stream API returned error");
        Err(StreamError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// Accepts either a JSON string or a bare token.
fn parse_session_id(body: &str) -> Result<String> {
    let trimmed = body.trim();
    let id = serde_json::from_str::<String>(trimmed).unwrap_or_else(|_| trimmed.to_string());
    if id.is_empty() {
        return Err(StreamError::Session("Backend returned an empty stream id".into()));
    }
    Ok(id)
}

fn parse_batch(body: &str) -> Result<Vec<UpdateEvent>> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(body)?)
}

#[async_trait]
impl StreamBackend for HttpBackend {
    async fn create_session(&self) -> Result<String> {
        let url = self.endpoint(&["api", "stream"])?;
        debug!(target: "backend", url = %url, "Requesting stream session");

        let response = self.authorize(self.http_client.post(url)).send().await?;
        let body = Self::check(response).await?.text().await?;
        parse_session_id(&body)
    }

    async fn poll(&self, session_id: &str) -> Result<PollResponse> {
        let url = self.endpoint(&["api", "stream", session_id])?;

        let response = self.authorize(self.http_client.get(url)).send().await?;
        let response = Self::check(response).await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        let events = parse_batch(&body)?;
        debug!(target: "backend", status, events = events.len(), "Poll answered");

        Ok(PollResponse { status, events })
    }

    async fn refresh_user(&self) -> Result<()> {
        let url = self.endpoint(&["api", "user", "current"])?;
        let response = self.authorize(self.http_client.get(url)).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}
