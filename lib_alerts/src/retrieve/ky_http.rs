//! # HTTP Retrieval Utilities
//!
//! This module provides the asynchronous feed client wrapper around `reqwest`.
//! It applies a per-request timeout and user agent, and can optionally attach
//! `reqwest-retry` middleware for transport-level retries. Cycle-level retries
//! with backoff belong to the poll scheduler, so the default is zero retries.

use std::time::Duration;

use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::Url;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use thiserror::Error;

/// Errors produced while fetching a feed document.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The underlying `reqwest::Client` could not be constructed.
    #[error("failed to build http client: {0}")]
    Build(#[source] reqwest::Error),
    /// Connection failure, timeout, or middleware error.
    #[error("request to {url} failed: {source}")]
    Request {
        /// Requested URL.
        url: String,
        /// Underlying error.
        #[source]
        source: reqwest_middleware::Error,
    },
    /// The server answered with a non-2xx status.
    #[error("unexpected status {status} from {url}")]
    Status {
        /// Requested URL.
        url: String,
        /// Numeric HTTP status.
        status: u16,
        /// Error body, if it could be read.
        body: Option<String>,
    },
    /// The body could not be read.
    #[error("failed to read body from {url}: {source}")]
    Body {
        /// Requested URL.
        url: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },
}

/// Knobs for [`ApiClient::new`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Whole-request timeout.
    pub timeout: Duration,
    /// `User-Agent` header value.
    pub user_agent: String,
    /// Transport-level retries for transient failures (0 disables the middleware).
    pub transport_retries: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            user_agent: "disaster-alerts/0.1".to_string(),
            transport_retries: 0,
        }
    }
}

/// A standardized container for raw feed responses.
#[derive(Debug)]
pub struct ApiResponse {
    /// The response body as text.
    pub body: String,
    /// The numeric HTTP status code.
    pub status: u16,
    /// The headers returned by the server.
    pub headers: HeaderMap,
}

/// A shared asynchronous HTTP client.
///
/// Built on top of `reqwest_middleware`. One instance is shared by every
/// source adapter so connection pooling is reused across polls.
#[derive(Clone)]
pub struct ApiClient {
    /// The underlying middleware-enabled client.
    inner: ClientWithMiddleware,
}

impl ApiClient {
    /// Creates a client from `options`.
    ///
    /// # Errors
    /// Returns [`FetchError::Build`] if TLS or the connector cannot be initialized.
    pub fn new(options: &ClientOptions) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .user_agent(options.user_agent.clone())
            .build()
            .map_err(FetchError::Build)?;

        let mut builder = ClientBuilder::new(client);
        if options.transport_retries > 0 {
            let retry_policy =
                ExponentialBackoff::builder().build_with_max_retries(options.transport_retries);
            builder = builder.with(RetryTransientMiddleware::new_with_policy(retry_policy));
        }

        Ok(Self { inner: builder.build() })
    }

    /// Performs a GET and returns the body of a 2xx response.
    ///
    /// # Errors
    /// - [`FetchError::Request`] on network failure or timeout.
    /// - [`FetchError::Status`] on a non-success status.
    /// - [`FetchError::Body`] if the body cannot be read.
    pub async fn get_text(&self, url: &Url) -> Result<ApiResponse, FetchError> {
        let response = self
            .inner
            .get(url.clone())
            .header(ACCEPT, "application/json, application/xml, text/xml, */*")
            .send()
            .await
            .map_err(|source| FetchError::Request { url: url.to_string(), source })?;

        let status = response.status();
        let headers = response.headers().clone();

        if !status.is_success() {
            // Capture the error body as a string for debugging
            let body = response.text().await.ok();
            return Err(FetchError::Status { url: url.to_string(), status: status.as_u16(), body });
        }

        let body = response
            .text()
            .await
            .map_err(|source| FetchError::Body { url: url.to_string(), source })?;

        Ok(ApiResponse { body, status: status.as_u16(), headers })
    }
}
