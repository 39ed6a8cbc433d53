//! HTTP transport
//!
//! The fetch client talks to the network through the `Transport` trait. The
//! production implementation wraps reqwest and keeps one client per session
//! generation, so every identity gets its own cookie jar and connection pool.

use crate::config::CrawlerConfig;
use crate::session::SessionState;
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// A raw HTTP response
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub final_url: Url,
    pub body: String,
}

/// Network-level failures; all of them are worth retrying
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request timeout")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request failed: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Issues one physical GET request with the session's identity
    async fn get(&self, url: &Url, session: &SessionState) -> Result<RawResponse, TransportError>;
}

/// Builds an HTTP client bound to one session's cookie jar
pub fn build_http_client(
    config: &CrawlerConfig,
    session: &SessionState,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .cookie_provider(session.cookies.clone())
        .default_headers(session.headers())
        .timeout(config.request_timeout())
        .connect_timeout(config.connect_timeout())
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// reqwest-backed transport
pub struct ReqwestTransport {
    config: CrawlerConfig,
    client: Mutex<Option<(u64, Client)>>,
}

impl ReqwestTransport {
    pub fn new(config: &CrawlerConfig) -> Self {
        Self {
            config: config.clone(),
            client: Mutex::new(None),
        }
    }

    /// Returns the client for this session, building it on first use
    fn client_for(&self, session: &SessionState) -> Result<Client, TransportError> {
        let mut cached = self.client.lock().unwrap_or_else(|e| e.into_inner());

        if let Some((generation, client)) = cached.as_ref() {
            if *generation == session.generation {
                return Ok(client.clone());
            }
        }

        let client = build_http_client(&self.config, session)
            .map_err(|e| TransportError::Other(format!("Failed to build client: {}", e)))?;
        *cached = Some((session.generation, client.clone()));
        Ok(client)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &Url, session: &SessionState) -> Result<RawResponse, TransportError> {
        let client = self.client_for(session)?;
        let response = client.get(url.clone()).send().await?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let body = response.text().await?;

        Ok(RawResponse {
            status,
            final_url,
            body,
        })
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("timeout", &Duration::from_secs(self.config.request_timeout_secs))
            .finish()
    }
}
