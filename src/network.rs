//! Shared HTTP client used by the prober, resolvers, walker, and extractor.
//!
//! Redirect following is deliberately manual: automatic policies cannot
//! reapply browser headers on each hop, which defeats the fingerprinting.

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::config::Config;
use crate::fingerprint::FingerprintProvider;

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    fingerprints: Arc<FingerprintProvider>,
    pub max_content_size: usize,
}

impl HttpClient {
    pub fn new(
        fingerprints: Arc<FingerprintProvider>,
        timeout_secs: u64,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            // Redirects are walked manually so fresh headers apply per hop.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| FetchError::ClientBuildError(e.to_string()))?;

        Ok(Self {
            client,
            fingerprints,
            max_content_size: Config::MAX_CONTENT_SIZE,
        })
    }

    /// Build a request carrying a fresh randomized browser header set.
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let mut builder = self.client.request(method, url);
        for (key, value) in self.fingerprints.browser_headers() {
            builder = builder.header(key, value);
        }
        builder
    }

    /// GET following up to `max_hops` redirects, reapplying fresh browser
    /// headers on every hop. Returns the final response.
    pub async fn get_following_redirects(
        &self,
        url: &str,
        max_hops: usize,
    ) -> Result<Response, FetchError> {
        self.get_following_redirects_with(url, max_hops, &[]).await
    }

    /// Same as [`Self::get_following_redirects`] with extra headers layered
    /// over the fingerprint set on every hop.
    pub async fn get_following_redirects_with(
        &self,
        url: &str,
        max_hops: usize,
        extra_headers: &[(&str, &str)],
    ) -> Result<Response, FetchError> {
        let mut current = url.to_string();
        for _ in 0..=max_hops {
            let mut builder = self.request(Method::GET, &current);
            for (key, value) in extra_headers {
                builder = builder.header(*key, *value);
            }
            let response = builder
                .send()
                .await
                .map_err(FetchError::from_reqwest_error)?;

            if !response.status().is_redirection() {
                return Ok(response);
            }

            current = match redirect_target(&current, &response) {
                Some(next) => next,
                // A 3xx without a usable Location is terminal.
                None => return Ok(response),
            };
        }
        Err(FetchError::TooManyRedirects)
    }

    /// GET a URL and buffer the body as text. Non-2xx is an error.
    pub async fn fetch_text(&self, url: &str) -> Result<FetchResult, FetchError> {
        let response = self
            .get_following_redirects(url, Config::MAX_REDIRECTS)
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::BodyError(e.to_string()))?;
        if body.len() > self.max_content_size {
            return Err(FetchError::ContentTooLarge(body.len(), self.max_content_size));
        }
        Ok(FetchResult {
            content: body,
            status_code: status.as_u16(),
        })
    }

    /// GET a URL and buffer the raw body bytes together with the response
    /// content encoding. Non-2xx is an error.
    pub async fn fetch_bytes(&self, url: &str) -> Result<FetchBytesResult, FetchError> {
        let response = self
            .get_following_redirects(url, Config::MAX_REDIRECTS)
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }
        let content_encoding = response
            .headers()
            .get(reqwest::header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::BodyError(e.to_string()))?;
        if body.len() > self.max_content_size {
            return Err(FetchError::ContentTooLarge(body.len(), self.max_content_size));
        }
        Ok(FetchBytesResult {
            content: body.to_vec(),
            status_code: status.as_u16(),
            content_encoding,
        })
    }

    /// HEAD probe: true when the URL answers 200.
    pub async fn head_ok(&self, url: &str) -> bool {
        let probe = self
            .request(Method::HEAD, url)
            .timeout(Duration::from_secs(Config::HEAD_TIMEOUT_SECS))
            .send()
            .await;
        matches!(probe, Ok(resp) if resp.status() == StatusCode::OK)
    }
}

fn redirect_target(current: &str, response: &Response) -> Option<String> {
    let location = response
        .headers()
        .get(reqwest::header::LOCATION)?
        .to_str()
        .ok()?;
    let base = Url::parse(current).ok()?;
    base.join(location).ok().map(|u| u.to_string())
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub content: String,
    pub status_code: u16,
}

#[derive(Debug, Clone)]
pub struct FetchBytesResult {
    pub content: Vec<u8>,
    pub status_code: u16,
    pub content_encoding: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection refused - server not accepting connections")]
    ConnectionRefused,

    #[error("DNS resolution failed")]
    DnsError,

    #[error("SSL/TLS error - certificate or encryption issue")]
    SslError,

    #[error("Request timeout")]
    Timeout,

    #[error("HTTP {0}")]
    HttpStatus(u16),

    #[error("Too many redirects")]
    TooManyRedirects,

    #[error("Failed to read response body: {0}")]
    BodyError(String),

    #[error("Content too large: {0} bytes (max: {1} bytes)")]
    ContentTooLarge(usize, usize),

    #[error("Failed to build HTTP client: {0}")]
    ClientBuildError(String),
}

impl FetchError {
    pub fn from_reqwest_error(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return FetchError::Timeout;
        }

        let error_msg_lower = error.to_string().to_lowercase();

        if error.is_connect() {
            if error_msg_lower.contains("connection refused") {
                return FetchError::ConnectionRefused;
            }
            if error_msg_lower.contains("dns")
                || error_msg_lower.contains("name resolution")
                || error_msg_lower.contains("no such host")
            {
                return FetchError::DnsError;
            }
        }

        if error_msg_lower.contains("certificate")
            || error_msg_lower.contains("ssl")
            || error_msg_lower.contains("tls")
        {
            return FetchError::SslError;
        }

        FetchError::NetworkError(error.to_string())
    }
}
