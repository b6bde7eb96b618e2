//! HTTP client abstraction for testability.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;

use super::DownloadError;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for HTTP GET operations.
///
/// This abstraction allows dependency injection and easier testing by
/// enabling mock HTTP clients in tests. The per-request timeout is applied
/// by the downloader, not the client.
pub trait HttpClient: Send + Sync {
    /// Performs an HTTP GET request and returns the response body.
    fn get(&self, url: &str) -> BoxFuture<'_, Result<Bytes, DownloadError>>;
}

/// Real HTTP client implementation using reqwest.
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a client with default configuration.
    pub fn new() -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            // Connect timeout only; the downloader owns the request timeout.
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DownloadError::NetworkUnreachable(format!("client setup failed: {e}")))?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str) -> BoxFuture<'_, Result<Bytes, DownloadError>> {
        let request = self.client.get(url).send();
        Box::pin(async move {
            let response = request.await.map_err(classify_reqwest_error)?;
            let status = response.status();
            if !status.is_success() {
                return Err(DownloadError::HttpStatus(status.as_u16()));
            }
            response
                .bytes()
                .await
                .map_err(classify_reqwest_error)
        })
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> DownloadError {
    if error.is_timeout() {
        DownloadError::Timeout
    } else if let Some(status) = error.status() {
        DownloadError::HttpStatus(status.as_u16())
    } else {
        DownloadError::NetworkUnreachable(error.to_string())
    }
}
