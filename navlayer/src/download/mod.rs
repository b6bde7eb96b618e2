//! Concurrent tile downloading.
//!
//! The [`Downloader`] runs a bounded pool of worker tasks draining a
//! two-lane FIFO queue: requests for the current viewport go ahead of
//! backfill work. Duplicate in-flight requests for the same key are
//! coalesced into a single network call whose result every waiter receives.
//!
//! Failure policy: timeouts and 5xx responses are transient and retry with
//! exponential backoff up to a fixed bound; 4xx responses and empty payloads
//! are permanent, marking the key failed until
//! [`Downloader::invalidate`] clears it. A successful fetch writes through
//! the cache before waiters are signaled, and a worker checks its request's
//! cancellation token before committing anything, silently discarding stale
//! results.

mod http;

pub use http::{BoxFuture, HttpClient, ReqwestClient};
pub use tokio_util::sync::CancellationToken;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::TileCache;
use crate::telemetry::Metrics;

/// Errors surfaced by tile downloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    /// The request did not complete within its timeout.
    #[error("request timed out")]
    Timeout,

    /// The server answered with a non-2xx status.
    #[error("server answered HTTP {0}")]
    HttpStatus(u16),

    /// The server could not be reached.
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    /// The response body was empty or unusable.
    #[error("malformed payload")]
    MalformedPayload,

    /// The request's token was cancelled before completion.
    #[error("request cancelled")]
    Cancelled,

    /// The downloader has shut down.
    #[error("download queue closed")]
    QueueClosed,
}

impl DownloadError {
    /// Returns true for failures worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            DownloadError::Timeout | DownloadError::NetworkUnreachable(_) => true,
            DownloadError::HttpStatus(code) => (500..=599).contains(code),
            _ => false,
        }
    }
}

/// Errors from URL template validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// The template is missing a required placeholder.
    #[error("url template is missing the {{{0}}} placeholder")]
    MissingPlaceholder(&'static str),
}

/// A tile server URL template with `{zoom}`, `{x}` and `{y}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    template: String,
}

impl UrlTemplate {
    /// Validates and wraps a template string.
    pub fn new(template: impl Into<String>) -> Result<Self, TemplateError> {
        let template = template.into();
        for placeholder in ["{zoom}", "{x}", "{y}"] {
            if !template.contains(placeholder) {
                return Err(TemplateError::MissingPlaceholder(
                    &placeholder[1..placeholder.len() - 1],
                ));
            }
        }
        Ok(Self { template })
    }

    /// Substitutes tile coordinates into the template.
    pub fn url(&self, zoom: u8, x: u32, y: u32) -> String {
        self.template
            .replace("{zoom}", &zoom.to_string())
            .replace("{x}", &x.to_string())
            .replace("{y}", &y.to_string())
    }
}

/// Scheduling lane of a fetch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPriority {
    /// The container is in the current viewport; served first.
    Viewport,
    /// Speculative or backlog work.
    Backfill,
}

/// Downloader tuning knobs.
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Number of worker tasks.
    pub workers: usize,
    /// Per-attempt request timeout.
    pub request_timeout: Duration,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    /// Base delay for exponential backoff between attempts.
    pub backoff_base: Duration,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            request_timeout: Duration::from_secs(10),
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

/// Resolves to the fetch result once the download completes.
pub struct FetchHandle {
    rx: oneshot::Receiver<Result<Bytes, DownloadError>>,
}

impl FetchHandle {
    /// Waits for the fetch outcome.
    pub async fn wait(self) -> Result<Bytes, DownloadError> {
        self.rx.await.unwrap_or(Err(DownloadError::Cancelled))
    }
}

struct Job {
    key: String,
    url: String,
    token: CancellationToken,
}

#[derive(Default)]
struct Lanes {
    viewport: VecDeque<Job>,
    backfill: VecDeque<Job>,
}

struct Inner {
    client: Arc<dyn HttpClient>,
    cache: Arc<TileCache>,
    config: DownloaderConfig,
    lanes: parking_lot::Mutex<Lanes>,
    wakeup: Notify,
    closed: AtomicBool,
    in_flight: DashMap<String, Vec<oneshot::Sender<Result<Bytes, DownloadError>>>>,
    failed: DashMap<String, DownloadError>,
    metrics: Arc<Metrics>,
}

/// Concurrent, retrying, coalescing tile fetcher.
pub struct Downloader {
    inner: Arc<Inner>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Downloader {
    /// Starts the worker pool. Successful fetches write through `cache`.
    pub fn spawn(
        client: Arc<dyn HttpClient>,
        cache: Arc<TileCache>,
        config: DownloaderConfig,
    ) -> Self {
        let metrics = cache.metrics();
        let inner = Arc::new(Inner {
            client,
            cache,
            config,
            lanes: parking_lot::Mutex::new(Lanes::default()),
            wakeup: Notify::new(),
            closed: AtomicBool::new(false),
            in_flight: DashMap::new(),
            failed: DashMap::new(),
            metrics,
        });
        let workers = (0..inner.config.workers.max(1))
            .map(|worker| {
                let inner = Arc::clone(&inner);
                tokio::spawn(async move { worker_loop(worker, inner).await })
            })
            .collect();
        Self {
            inner,
            workers: parking_lot::Mutex::new(workers),
        }
    }

    /// Enqueues a fetch, coalescing onto an identical in-flight request.
    ///
    /// A key previously marked failed resolves immediately with its recorded
    /// error and no network traffic until [`Downloader::invalidate`].
    pub fn fetch(
        &self,
        key: &str,
        url: &str,
        priority: FetchPriority,
        token: CancellationToken,
    ) -> FetchHandle {
        let (tx, rx) = oneshot::channel();
        let handle = FetchHandle { rx };

        if self.inner.closed.load(Ordering::Acquire) {
            let _ = tx.send(Err(DownloadError::QueueClosed));
            return handle;
        }
        if token.is_cancelled() {
            let _ = tx.send(Err(DownloadError::Cancelled));
            return handle;
        }
        if let Some(error) = self.inner.failed.get(key) {
            let _ = tx.send(Err(error.clone()));
            return handle;
        }

        let mut new_request = false;
        self.inner
            .in_flight
            .entry(key.to_string())
            .and_modify(|_waiters| {
                self.inner.metrics.download_coalesced();
                debug!(key, "coalesced onto in-flight request");
            })
            .or_insert_with(|| {
                new_request = true;
                Vec::new()
            })
            .push(tx);

        if new_request {
            // Pin for the duration of the flight so an existing entry for
            // this key cannot be evicted under us.
            self.inner.cache.pin(key);
            let job = Job {
                key: key.to_string(),
                url: url.to_string(),
                token,
            };
            let mut lanes = self.inner.lanes.lock();
            match priority {
                FetchPriority::Viewport => lanes.viewport.push_back(job),
                FetchPriority::Backfill => lanes.backfill.push_back(job),
            }
            drop(lanes);
            self.inner.wakeup.notify_one();
        }
        handle
    }

    /// Clears a permanent failure mark so the key can be fetched again.
    pub fn invalidate(&self, key: &str) {
        self.inner.failed.remove(key);
    }

    /// Number of requests currently queued or executing.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Pipeline metrics shared with this downloader.
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.inner.metrics)
    }

    /// Stops accepting work, drains nothing, and joins the workers.
    /// Queued jobs resolve with [`DownloadError::QueueClosed`].
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.wakeup.notify_waiters();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            let _ = worker.await;
        }
        // Fail whatever never got picked up.
        let jobs: Vec<Job> = {
            let mut guard = self.inner.lanes.lock();
            let lanes = &mut *guard;
            lanes
                .viewport
                .drain(..)
                .chain(lanes.backfill.drain(..))
                .collect()
        };
        for job in jobs {
            finish_job(&self.inner, &job.key, Err(DownloadError::QueueClosed));
        }
    }
}

async fn worker_loop(worker: usize, inner: Arc<Inner>) {
    debug!(worker, "download worker started");
    loop {
        let job = {
            loop {
                if inner.closed.load(Ordering::Acquire) {
                    // Leftover queued jobs are failed by shutdown().
                    break None;
                }
                let notified = inner.wakeup.notified();
                let popped = {
                    let mut lanes = inner.lanes.lock();
                    lanes.viewport.pop_front().or_else(|| lanes.backfill.pop_front())
                };
                if let Some(job) = popped {
                    break Some(job);
                }
                if inner.closed.load(Ordering::Acquire) {
                    break None;
                }
                notified.await;
            }
        };
        let Some(job) = job else {
            debug!(worker, "download worker stopping");
            return;
        };

        if job.token.is_cancelled() {
            inner.metrics.fetch_cancelled();
            finish_job(&inner, &job.key, Err(DownloadError::Cancelled));
            continue;
        }

        let result = execute(&inner, &job).await;

        // A stale result is silently discarded; the viewport or source that
        // wanted it is gone.
        if job.token.is_cancelled() {
            inner.metrics.fetch_cancelled();
            finish_job(&inner, &job.key, Err(DownloadError::Cancelled));
            continue;
        }

        match &result {
            Ok(payload) => {
                // Write through the cache before signaling waiters. Cache
                // pressure is not a download failure; the payload is still
                // delivered.
                if let Err(error) = inner.cache.insert(&job.key, payload.clone()).await {
                    warn!(key = %job.key, %error, "cache write-through failed");
                }
                inner.metrics.download_succeeded();
            }
            Err(error) => {
                if !error.is_transient() {
                    inner.failed.insert(job.key.clone(), error.clone());
                }
                inner.metrics.download_failed();
                debug!(key = %job.key, %error, "download failed");
            }
        }
        finish_job(&inner, &job.key, result);
    }
}

/// Runs the attempt/retry loop for one job.
async fn execute(inner: &Inner, job: &Job) -> Result<Bytes, DownloadError> {
    let attempts = inner.config.max_retries + 1;
    let mut last_error = DownloadError::Timeout;
    for attempt in 0..attempts {
        if attempt > 0 {
            let backoff = inner.config.backoff_base * 2u32.saturating_pow(attempt - 1);
            tokio::time::sleep(backoff).await;
            if job.token.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
        }
        let outcome =
            tokio::time::timeout(inner.config.request_timeout, inner.client.get(&job.url)).await;
        let error = match outcome {
            Ok(Ok(payload)) if payload.is_empty() => DownloadError::MalformedPayload,
            Ok(Ok(payload)) => return Ok(payload),
            Ok(Err(error)) => error,
            Err(_elapsed) => DownloadError::Timeout,
        };
        if !error.is_transient() {
            return Err(error);
        }
        debug!(key = %job.key, attempt, %error, "transient download failure");
        last_error = error;
    }
    Err(last_error)
}

/// Delivers a result to every waiter and releases the in-flight state.
fn finish_job(inner: &Inner, key: &str, result: Result<Bytes, DownloadError>) {
    if let Some((_, waiters)) = inner.in_flight.remove(key) {
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }
    inner.cache.unpin(key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    /// Mock client with per-call scripted responses, delays, and a call log.
    struct ScriptedClient {
        responses: Mutex<VecDeque<Result<Bytes, DownloadError>>>,
        delays: Mutex<VecDeque<Duration>>,
        log: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new() -> Self {
            Self {
                responses: Mutex::new(VecDeque::new()),
                delays: Mutex::new(VecDeque::new()),
                log: Mutex::new(Vec::new()),
            }
        }

        fn script(self, responses: Vec<Result<Bytes, DownloadError>>) -> Self {
            *self.responses.lock() = responses.into();
            self
        }

        fn with_delays(self, delays: Vec<Duration>) -> Self {
            *self.delays.lock() = delays.into();
            self
        }

        fn call_count(&self) -> usize {
            self.log.lock().len()
        }

        fn calls(&self) -> Vec<String> {
            self.log.lock().clone()
        }
    }

    impl HttpClient for ScriptedClient {
        fn get(&self, url: &str) -> BoxFuture<'_, Result<Bytes, DownloadError>> {
            self.log.lock().push(url.to_string());
            let delay = self.delays.lock().pop_front().unwrap_or(Duration::ZERO);
            let response = self
                .responses
                .lock()
                .pop_front()
                .unwrap_or(Ok(Bytes::from_static(b"tile bytes")));
            Box::pin(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                response
            })
        }
    }

    fn fast_config(workers: usize) -> DownloaderConfig {
        DownloaderConfig {
            workers,
            request_timeout: Duration::from_millis(200),
            max_retries: 2,
            backoff_base: Duration::from_millis(5),
        }
    }

    fn test_cache(dir: &TempDir) -> Arc<TileCache> {
        Arc::new(TileCache::open(dir.path(), CacheConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn test_fetch_writes_through_cache() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir);
        let client = Arc::new(ScriptedClient::new());
        let downloader = Downloader::spawn(client.clone(), Arc::clone(&cache), fast_config(2));

        let handle = downloader.fetch(
            "tile/10/1/2",
            "http://tiles.test/10/1/2",
            FetchPriority::Viewport,
            CancellationToken::new(),
        );
        let payload = handle.wait().await.unwrap();
        assert_eq!(payload, Bytes::from_static(b"tile bytes"));
        assert_eq!(cache.get("tile/10/1/2").await.unwrap(), payload);
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_requests_coalesce_to_one_call() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir);
        let client = Arc::new(
            ScriptedClient::new().with_delays(vec![Duration::from_millis(50)]),
        );
        let downloader = Downloader::spawn(client.clone(), cache, fast_config(4));

        let token = CancellationToken::new();
        let first = downloader.fetch(
            "tile/10/1/2",
            "http://tiles.test/10/1/2",
            FetchPriority::Viewport,
            token.clone(),
        );
        let second = downloader.fetch(
            "tile/10/1/2",
            "http://tiles.test/10/1/2",
            FetchPriority::Viewport,
            token.clone(),
        );

        let (a, b) = tokio::join!(first.wait(), second.wait());
        assert_eq!(a.unwrap(), Bytes::from_static(b"tile bytes"));
        assert_eq!(b.unwrap(), Bytes::from_static(b"tile bytes"));
        assert_eq!(client.call_count(), 1, "exactly one network fetch");
        assert_eq!(downloader.metrics().snapshot().downloads_coalesced, 1);
    }

    #[tokio::test]
    async fn test_transient_errors_retry_until_success() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir);
        let client = Arc::new(ScriptedClient::new().script(vec![
            Err(DownloadError::HttpStatus(503)),
            Err(DownloadError::NetworkUnreachable("reset".into())),
        ]));
        let downloader = Downloader::spawn(client.clone(), cache, fast_config(1));

        let handle = downloader.fetch(
            "tile/10/1/2",
            "http://tiles.test/10/1/2",
            FetchPriority::Viewport,
            CancellationToken::new(),
        );
        assert!(handle.wait().await.is_ok());
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn test_retry_bound_respected() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir);
        let client = Arc::new(ScriptedClient::new().script(vec![
            Err(DownloadError::HttpStatus(500)),
            Err(DownloadError::HttpStatus(502)),
            Err(DownloadError::HttpStatus(503)),
            Err(DownloadError::HttpStatus(504)),
        ]));
        let downloader = Downloader::spawn(client.clone(), cache, fast_config(1));

        let handle = downloader.fetch(
            "tile/10/1/2",
            "http://tiles.test/10/1/2",
            FetchPriority::Viewport,
            CancellationToken::new(),
        );
        let result = handle.wait().await;
        assert!(matches!(result, Err(DownloadError::HttpStatus(503))));
        // max_retries = 2 means exactly 3 attempts.
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_sticks_until_invalidated() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir);
        let client = Arc::new(
            ScriptedClient::new().script(vec![Err(DownloadError::HttpStatus(404))]),
        );
        let downloader = Downloader::spawn(client.clone(), cache, fast_config(1));

        let handle = downloader.fetch(
            "tile/10/1/2",
            "http://tiles.test/10/1/2",
            FetchPriority::Viewport,
            CancellationToken::new(),
        );
        assert!(matches!(
            handle.wait().await,
            Err(DownloadError::HttpStatus(404))
        ));
        assert_eq!(client.call_count(), 1, "4xx does not retry");

        // Still failed: no new network call.
        let handle = downloader.fetch(
            "tile/10/1/2",
            "http://tiles.test/10/1/2",
            FetchPriority::Viewport,
            CancellationToken::new(),
        );
        assert!(matches!(
            handle.wait().await,
            Err(DownloadError::HttpStatus(404))
        ));
        assert_eq!(client.call_count(), 1);

        downloader.invalidate("tile/10/1/2");
        let handle = downloader.fetch(
            "tile/10/1/2",
            "http://tiles.test/10/1/2",
            FetchPriority::Viewport,
            CancellationToken::new(),
        );
        assert!(handle.wait().await.is_ok());
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir);
        // First attempt sleeps past the 200ms request timeout.
        let client = Arc::new(
            ScriptedClient::new().with_delays(vec![Duration::from_millis(500)]),
        );
        let downloader = Downloader::spawn(client.clone(), cache, fast_config(1));

        let handle = downloader.fetch(
            "tile/10/1/2",
            "http://tiles.test/10/1/2",
            FetchPriority::Viewport,
            CancellationToken::new(),
        );
        assert!(handle.wait().await.is_ok());
        assert_eq!(client.call_count(), 2, "timed-out attempt plus retry");
    }

    #[tokio::test]
    async fn test_cancelled_before_pickup_makes_no_network_call() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir);
        // One worker, blocked on a slow job.
        let client = Arc::new(
            ScriptedClient::new().with_delays(vec![Duration::from_millis(100)]),
        );
        let downloader = Downloader::spawn(client.clone(), cache, fast_config(1));

        let blocker = downloader.fetch(
            "tile/10/0/0",
            "http://tiles.test/10/0/0",
            FetchPriority::Viewport,
            CancellationToken::new(),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;

        let token = CancellationToken::new();
        let doomed = downloader.fetch(
            "tile/10/9/9",
            "http://tiles.test/10/9/9",
            FetchPriority::Viewport,
            token.clone(),
        );
        token.cancel();

        assert!(matches!(doomed.wait().await, Err(DownloadError::Cancelled)));
        assert!(blocker.wait().await.is_ok());
        let calls = client.calls();
        assert!(!calls.iter().any(|url| url.contains("9/9")));
    }

    #[tokio::test]
    async fn test_cancelled_mid_flight_discards_result() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir);
        let client = Arc::new(
            ScriptedClient::new().with_delays(vec![Duration::from_millis(100)]),
        );
        let downloader = Downloader::spawn(client.clone(), Arc::clone(&cache), fast_config(1));

        let token = CancellationToken::new();
        let handle = downloader.fetch(
            "tile/10/1/2",
            "http://tiles.test/10/1/2",
            FetchPriority::Viewport,
            token.clone(),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        assert!(matches!(handle.wait().await, Err(DownloadError::Cancelled)));
        // The completed download was discarded, not committed.
        assert!(cache.get("tile/10/1/2").await.is_none());
        assert_eq!(downloader.metrics().snapshot().fetches_cancelled, 1);
    }

    #[tokio::test]
    async fn test_viewport_lane_preempts_backfill() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir);
        let client = Arc::new(
            ScriptedClient::new().with_delays(vec![Duration::from_millis(60)]),
        );
        let downloader = Downloader::spawn(client.clone(), cache, fast_config(1));

        // Occupy the single worker.
        let blocker = downloader.fetch(
            "blocker",
            "http://tiles.test/blocker",
            FetchPriority::Viewport,
            CancellationToken::new(),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;

        let b1 = downloader.fetch(
            "backfill-1",
            "http://tiles.test/backfill-1",
            FetchPriority::Backfill,
            CancellationToken::new(),
        );
        let b2 = downloader.fetch(
            "backfill-2",
            "http://tiles.test/backfill-2",
            FetchPriority::Backfill,
            CancellationToken::new(),
        );
        let v = downloader.fetch(
            "viewport-1",
            "http://tiles.test/viewport-1",
            FetchPriority::Viewport,
            CancellationToken::new(),
        );

        for handle in [blocker, b1, b2, v] {
            assert!(handle.wait().await.is_ok());
        }
        let calls = client.calls();
        assert_eq!(
            calls,
            vec![
                "http://tiles.test/blocker",
                "http://tiles.test/viewport-1",
                "http://tiles.test/backfill-1",
                "http://tiles.test/backfill-2",
            ]
        );
    }

    #[tokio::test]
    async fn test_shutdown_fails_queued_jobs() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir);
        let client = Arc::new(
            ScriptedClient::new().with_delays(vec![Duration::from_millis(80)]),
        );
        let downloader = Downloader::spawn(client.clone(), cache, fast_config(1));

        let running = downloader.fetch(
            "running",
            "http://tiles.test/running",
            FetchPriority::Viewport,
            CancellationToken::new(),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        let queued = downloader.fetch(
            "queued",
            "http://tiles.test/queued",
            FetchPriority::Backfill,
            CancellationToken::new(),
        );

        downloader.shutdown().await;
        assert!(running.wait().await.is_ok());
        assert!(matches!(
            queued.wait().await,
            Err(DownloadError::QueueClosed)
        ));
    }

    #[test]
    fn test_url_template_substitution() {
        let template = UrlTemplate::new("https://tiles.test/{zoom}/{x}/{y}.png").unwrap();
        assert_eq!(template.url(12, 2150, 1360), "https://tiles.test/12/2150/1360.png");
    }

    #[test]
    fn test_url_template_missing_placeholder() {
        assert_eq!(
            UrlTemplate::new("https://tiles.test/{zoom}/{x}.png"),
            Err(TemplateError::MissingPlaceholder("y"))
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(DownloadError::Timeout.is_transient());
        assert!(DownloadError::HttpStatus(500).is_transient());
        assert!(DownloadError::HttpStatus(503).is_transient());
        assert!(DownloadError::NetworkUnreachable("x".into()).is_transient());
        assert!(!DownloadError::HttpStatus(404).is_transient());
        assert!(!DownloadError::HttpStatus(403).is_transient());
        assert!(!DownloadError::MalformedPayload.is_transient());
        assert!(!DownloadError::Cancelled.is_transient());
    }
}
