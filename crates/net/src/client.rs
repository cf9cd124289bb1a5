//! HTTP client with connection pooling and retry logic

use std::time::Duration;

use futures::StreamExt;
use hotload_errors::{Error, NetworkError, UserFacingError};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response};

/// Upper bound on the buffer reserved from a server's `Content-Length`.
const PREALLOCATE_LIMIT: usize = 1024 * 1024;

/// Network client configuration
#[derive(Debug, Clone)]
pub struct NetConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub pool_idle_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub user_agent: String,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self::from(&hotload_config::NetworkConfig::default())
    }
}

impl From<&hotload_config::NetworkConfig> for NetConfig {
    fn from(config: &hotload_config::NetworkConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 10,
            retry_count: config.retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            user_agent: config.user_agent.clone(),
        }
    }
}

/// HTTP client wrapper with retry logic
#[derive(Clone)]
pub struct NetClient {
    client: Client,
    config: NetConfig,
}

impl std::fmt::Debug for NetClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetClient").field("config", &self.config).finish()
    }
}

impl NetClient {
    /// Create a new network client
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to initialize.
    pub fn new(config: NetConfig) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| NetworkError::ConnectionRefused(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Create with default configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created with default settings.
    pub fn with_defaults() -> Result<Self, Error> {
        Self::new(NetConfig::default())
    }

    /// GET `url` and return the whole body. Non-2xx responses are errors.
    ///
    /// With `max_bytes`, a body that is announced or turns out to be larger
    /// fails with [`NetworkError::ResponseTooLarge`] without being buffered.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails after all retry attempts, the
    /// server answers with an error status, the body exceeds `max_bytes`, or
    /// the body cannot be read.
    pub async fn get_bytes(
        &self,
        url: &str,
        headers: &[(String, String)],
        max_bytes: Option<usize>,
    ) -> Result<Vec<u8>, Error> {
        let header_map = build_headers(headers)?;
        let response = self
            .retry_request(url, || self.client.get(url).headers(header_map.clone()).send())
            .await?;

        let max = max_bytes.unwrap_or(usize::MAX);
        let announced = response
            .content_length()
            .map_or(0, |len| usize::try_from(len).unwrap_or(usize::MAX));
        if announced > max {
            return Err(too_large(url, announced, max));
        }

        let mut body = Vec::with_capacity(announced.min(PREALLOCATE_LIMIT));
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| NetworkError::DownloadFailed(e.to_string()))?;
            let size = body.len().saturating_add(chunk.len());
            if size > max {
                return Err(too_large(url, size, max));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    /// Execute a request with retries. Transport failures and retryable
    /// statuses (5xx, 429) are retried with linear backoff.
    async fn retry_request<F, Fut>(&self, url: &str, mut f: F) -> Result<Response, Error>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Response, reqwest::Error>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.retry_count {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay * attempt).await;
            }

            let error = match f().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    NetworkError::HttpError {
                        status: status.as_u16(),
                        message: status.to_string(),
                    }
                }
                Err(e) => convert_error(url, &e),
            };

            let retry = error.is_retryable();
            tracing::debug!(url, attempt, retry, error = %error, "request failed");
            last_error = Some(error);
            if !retry {
                break;
            }
        }

        Err(last_error
            .unwrap_or_else(|| NetworkError::DownloadFailed("Unknown error".to_string()))
            .into())
    }
}

fn convert_error(url: &str, error: &reqwest::Error) -> NetworkError {
    if error.is_timeout() {
        NetworkError::Timeout {
            url: url.to_string(),
        }
    } else if error.is_connect() {
        NetworkError::ConnectionRefused(error.to_string())
    } else if error.is_builder() {
        NetworkError::InvalidUrl(error.to_string())
    } else {
        NetworkError::DownloadFailed(error.to_string())
    }
}

fn too_large(url: &str, size: usize, max: usize) -> Error {
    NetworkError::ResponseTooLarge {
        url: url.to_string(),
        size,
        max,
    }
    .into()
}

fn build_headers(headers: &[(String, String)]) -> Result<HeaderMap, Error> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| NetworkError::DownloadFailed(format!("invalid header {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| NetworkError::DownloadFailed(format!("invalid header value: {e}")))?;
        map.append(name, value);
    }
    Ok(map)
}
