//! Network decorator source.

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use super::{MapSource, SourceError};
use crate::cache::TileCache;
use crate::calibrate::Calibrator;
use crate::container::{ContainerId, ContainerKey, PixelFormat};
use crate::download::{BoxFuture, Downloader, FetchPriority};
use crate::geo::GeoArea;
use crate::index::ContainerStore;

/// Wraps a static source definition, fetching its payloads over the network
/// and caching them.
///
/// The inner source supplies all metadata (containers, bounds, calibration);
/// payload bytes come from `<base_url>/<cache key>` through the downloader,
/// written through the shared cache. Used for source definitions hosted on a
/// remote server.
pub struct NetworkSource {
    name: String,
    inner: Arc<dyn MapSource>,
    cache: Arc<TileCache>,
    downloader: Arc<Downloader>,
    base_url: String,
}

impl NetworkSource {
    /// Decorates `inner`, serving payloads from `base_url`.
    pub fn new(
        inner: Arc<dyn MapSource>,
        cache: Arc<TileCache>,
        downloader: Arc<Downloader>,
        base_url: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            name: format!("{}+network", inner.name()),
            inner,
            cache,
            downloader,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn payload_url(&self, key: &ContainerKey) -> String {
        format!("{}/{}", self.base_url, key.cache_key())
    }
}

impl MapSource for NetworkSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn zoom_levels(&self) -> BTreeSet<u8> {
        self.inner.zoom_levels()
    }

    fn pixel_format(&self) -> PixelFormat {
        self.inner.pixel_format()
    }

    fn store(&self) -> &RwLock<ContainerStore> {
        self.inner.store()
    }

    fn container(&self, key: &ContainerKey) -> Result<ContainerId, SourceError> {
        self.inner.container(key)
    }

    fn calibrator(&self, key: &ContainerKey) -> Result<Calibrator, SourceError> {
        self.inner.calibrator(key)
    }

    fn containers_for(&self, area: &GeoArea, zoom: u8) -> Result<Vec<ContainerId>, SourceError> {
        self.inner.containers_for(area, zoom)
    }

    fn fetch_payload(
        &self,
        key: &ContainerKey,
        priority: FetchPriority,
        token: CancellationToken,
    ) -> BoxFuture<'_, Result<Bytes, SourceError>> {
        let key = *key;
        Box::pin(async move {
            let cache_key = key.cache_key();
            if let Some(payload) = self.cache.get(&cache_key).await {
                return Ok(payload);
            }
            let url = self.payload_url(&key);
            let payload = self
                .downloader
                .fetch(&cache_key, &url, priority, token)
                .wait()
                .await?;
            Ok(payload)
        })
    }

    fn invalidate(&self, key: &ContainerKey) {
        self.downloader.invalidate(&key.cache_key());
        self.inner.invalidate(key);
    }
}
