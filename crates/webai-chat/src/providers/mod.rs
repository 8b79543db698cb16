//! Provider clients for the browser-authenticated chat web services.
//!
//! A [`ProviderConnector`] turns resolved credentials into a live
//! [`ProviderSession`]; a session turns one prompt (plus an optional
//! continuation token from the previous exchange) into one whole reply.

pub mod claude;
pub mod gemini;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, USER_AGENT};
use reqwest::{Client, StatusCode};
use tracing::debug;
use webai_core::{Error, Provider, Result};

use crate::credentials::Credentials;

pub use claude::ClaudeSession;
pub use gemini::GeminiSession;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// One generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    /// Opaque handle from the previous exchange on this conversation.
    pub continuation: Option<String>,
}

/// A whole reply plus the handle to continue the remote conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub continuation: Option<String>,
}

#[async_trait]
pub trait ProviderSession: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<Generation>;
}

#[async_trait]
pub trait ProviderConnector: Send + Sync {
    async fn open(&self, credentials: &Credentials) -> Result<Arc<dyn ProviderSession>>;
}

/// Connector for the real web endpoints.
#[derive(Debug, Clone, Default)]
pub struct WebConnector {
    proxy: Option<String>,
    base_urls: HashMap<Provider, String>,
}

impl WebConnector {
    pub fn new(proxy: Option<String>) -> Self {
        Self {
            proxy,
            base_urls: HashMap::new(),
        }
    }

    /// Point a provider at a different origin (mock servers, mirrors).
    pub fn with_base_url(mut self, provider: Provider, url: impl Into<String>) -> Self {
        self.base_urls
            .insert(provider, url.into().trim_end_matches('/').to_string());
        self
    }

    fn base_url(&self, provider: Provider) -> String {
        self.base_urls
            .get(&provider)
            .cloned()
            .unwrap_or_else(|| provider.base_url().to_string())
    }
}

#[async_trait]
impl ProviderConnector for WebConnector {
    async fn open(&self, credentials: &Credentials) -> Result<Arc<dyn ProviderSession>> {
        let provider = credentials.provider;
        let http = build_client(credentials, self.proxy.as_deref())?;
        let base = self.base_url(provider);
        debug!("Opening {} session at {}", provider, base);

        let session: Arc<dyn ProviderSession> = match provider {
            Provider::Gemini => Arc::new(GeminiSession::open(http, base).await?),
            Provider::Claude => Arc::new(ClaudeSession::open(http, base).await?),
        };
        Ok(session)
    }
}

/// HTTP client carrying the session cookies on every request.
pub fn build_client(credentials: &Credentials, proxy: Option<&str>) -> Result<Client> {
    let mut headers = HeaderMap::new();
    let cookie = HeaderValue::from_str(&credentials.cookie_header())
        .map_err(|e| Error::CredentialsUnavailable(format!("invalid cookie value: {}", e)))?;
    headers.insert(COOKIE, cookie);
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));

    let mut builder = Client::builder()
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(10));
    if let Some(proxy) = proxy.filter(|p| !p.trim().is_empty()) {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| Error::Config(format!("invalid http_proxy '{}': {}", proxy, e)))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| Error::Internal(format!("HTTP client: {}", e)))
}

pub(crate) fn transport(provider: Provider, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Transport(format!("{} request timed out", provider))
    } else {
        Error::Transport(format!("{} request failed: {}", provider, err))
    }
}

/// Map a non-success status to the error taxonomy.
pub(crate) fn check_status(provider: Provider, status: StatusCode, body: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    Err(status_error(provider, status, body))
}

/// Error for a response that came back with a non-success `status`.
pub(crate) fn status_error(provider: Provider, status: StatusCode, body: &str) -> Error {
    let snippet: String = body.chars().take(200).collect();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Error::AuthExpired(format!(
            "{} rejected the session ({}). Refresh the browser login or the [Cookies] values",
            provider, status
        ))
    } else {
        Error::Transport(format!("{} returned {}: {}", provider, status, snippet))
    }
}
