//! Network tile fetching.
//!
//! [`TileFetcher`] is the seam between the loader's network stage and the
//! outside world: given a tile URL, produce the encoded bytes. The real
//! implementation is [`HttpTileFetcher`]; tests substitute scripted fakes.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::REFERER;
use reqwest::Client;

use crate::error::FetchError;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Default referer header sent with tile requests. Some tile servers only
/// answer requests that carry one.
pub const DEFAULT_REFERER: &str = "https://map.geo.admin.ch/";

/// Fetches encoded tile bytes for a URL.
#[async_trait]
pub trait TileFetcher: Send + Sync {
    /// Fetch the resource at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on transport failures (including timeouts),
    /// non-success status codes, and empty bodies. An empty 2xx response is
    /// an error: a zero-byte tile can never decode.
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError>;
}

/// HTTP tile fetcher backed by a shared reqwest client.
pub struct HttpTileFetcher {
    client: Client,
    referer: Option<String>,
}

impl HttpTileFetcher {
    /// Create a fetcher with the default referer and timeout.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_options(Some(DEFAULT_REFERER.to_string()), DEFAULT_TIMEOUT)
    }

    /// Create a fetcher with an explicit referer and timeout.
    pub fn with_options(referer: Option<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .use_rustls_tls()
            .build()?;
        Ok(Self { client, referer })
    }
}

#[async_trait]
impl TileFetcher for HttpTileFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let mut request = self.client.get(url);
        if let Some(referer) = &self.referer {
            request = request.header(REFERER, referer.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                code: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Err(FetchError::EmptyBody);
        }
        Ok(body)
    }
}
