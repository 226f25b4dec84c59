use std::fmt;
use std::time::Duration;
use async_trait::async_trait;
use shared::protocol::{PATH_ADD, PATH_REMOVE, PATH_UPDATE};
use shared::types::FormFields;

/// Which directory endpoint an exchange targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Add,
    Update,
    Remove,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Self::Add => PATH_ADD,
            Self::Update => PATH_UPDATE,
            Self::Remove => PATH_REMOVE,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Remove => "remove",
        };
        f.write_str(s)
    }
}

/// Non-success outcome of an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeFailure {
    /// HTTP status, if the directory answered at all
    pub status: Option<u16>,
    pub detail: String,
}

impl ExchangeFailure {
    pub fn status(status: u16, detail: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            detail: detail.into(),
        }
    }

    pub fn unreachable(detail: impl Into<String>) -> Self {
        Self {
            status: None,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ExchangeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "status {}: {}", status, self.detail),
            None => write!(f, "no response: {}", self.detail),
        }
    }
}

impl std::error::Error for ExchangeFailure {}

/// Successful exchanges yield the HTTP status code.
pub type ExchangeResult = std::result::Result<u16, ExchangeFailure>;

/// One request/response round trip with the directory service.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn send(&self, endpoint: Endpoint, fields: FormFields) -> ExchangeResult;
}

/// Directory transport over HTTP form posts.
pub struct HttpDirectoryClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDirectoryClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("listing-client/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.base_url, endpoint.path())
    }
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    async fn send(&self, endpoint: Endpoint, fields: FormFields) -> ExchangeResult {
        let url = self.url(endpoint);
        tracing::debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .form(&fields)
            .send()
            .await
            .map_err(|e| ExchangeFailure::unreachable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::OK {
            return Ok(status.as_u16());
        }

        // The body is only used as error detail; an unreadable one is not worth failing over
        let body = response.text().await.unwrap_or_default();
        let detail = if body.is_empty() {
            status.canonical_reason().unwrap_or("unexpected status").to_string()
        } else {
            body
        };

        Err(ExchangeFailure::status(status.as_u16(), detail))
    }
}
