//! Tiled online map source.

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{MapSource, SourceError};
use crate::archive::ArchiveReader;
use crate::cache::TileCache;
use crate::calibrate::{Calibrator, DEFAULT_TILE_SIZE};
use crate::container::{ContainerId, ContainerKey, PixelFormat};
use crate::download::{BoxFuture, Downloader, FetchPriority, UrlTemplate};
use crate::geo::{tile_bounds, tile_range, GeoArea};
use crate::index::{ContainerStore, SpatialIndex};

/// Upper bound on containers materialized by one viewport query. A viewport
/// wider than this at the requested zoom gets truncated with a warning.
const MAX_QUERY_TILES: usize = 1024;

/// Configuration of a tiled online source.
#[derive(Debug, Clone)]
pub struct TiledOnlineConfig {
    /// Source name for logs and cache attribution.
    pub name: String,
    /// Server URL template with `{zoom}`, `{x}`, `{y}` placeholders.
    pub url_template: String,
    /// Lowest zoom level served.
    pub min_zoom: u8,
    /// Highest zoom level served.
    pub max_zoom: u8,
    /// Tile edge length in pixels.
    pub tile_size: u32,
    /// Encoding of the payloads the server returns.
    pub format: PixelFormat,
}

impl Default for TiledOnlineConfig {
    fn default() -> Self {
        Self {
            name: "tiled-online".to_string(),
            url_template: "https://tile.openstreetmap.org/{zoom}/{x}/{y}.png".to_string(),
            min_zoom: 0,
            max_zoom: 19,
            tile_size: DEFAULT_TILE_SIZE,
            format: PixelFormat::Png,
        }
    }
}

enum Backend {
    /// Fetch misses from the network.
    Online(Arc<Downloader>),
    /// Operate offline against a packed archive.
    Offline(ArchiveReader),
}

/// Slippy-tile source: one container per `(zoom, x, y)`.
pub struct TiledOnlineSource {
    config: TiledOnlineConfig,
    template: UrlTemplate,
    store: RwLock<ContainerStore>,
    index: RwLock<SpatialIndex>,
    cache: Arc<TileCache>,
    backend: Backend,
}

impl TiledOnlineSource {
    /// Creates an online source fetching misses through `downloader`.
    pub fn new(
        config: TiledOnlineConfig,
        cache: Arc<TileCache>,
        downloader: Arc<Downloader>,
    ) -> Result<Self, SourceError> {
        let template = UrlTemplate::new(config.url_template.clone())?;
        Ok(Self {
            config,
            template,
            store: RwLock::new(ContainerStore::new()),
            index: RwLock::new(SpatialIndex::new()),
            cache,
            backend: Backend::Online(downloader),
        })
    }

    /// Creates an offline source reading misses from a packed archive.
    pub fn with_archive(
        config: TiledOnlineConfig,
        cache: Arc<TileCache>,
        archive: ArchiveReader,
    ) -> Result<Self, SourceError> {
        let template = UrlTemplate::new(config.url_template.clone())?;
        Ok(Self {
            config,
            template,
            store: RwLock::new(ContainerStore::new()),
            index: RwLock::new(SpatialIndex::new()),
            cache,
            backend: Backend::Offline(archive),
        })
    }

    fn clamp_zoom(&self, zoom: u8) -> u8 {
        zoom.clamp(self.config.min_zoom, self.config.max_zoom)
    }

    /// Creates the container for a tile key if it does not exist yet.
    fn get_or_create(&self, zoom: u8, x: u32, y: u32) -> ContainerId {
        let key = ContainerKey::Tile { zoom, x, y };
        if let Some(id) = self.store.read().find(&key) {
            return id;
        }
        let mut store = self.store.write();
        // Re-check under the write lock; another path may have created it.
        if let Some(id) = store.find(&key) {
            return id;
        }
        let bounds = tile_bounds(zoom, x, y);
        let calibrator = Calibrator::mercator(zoom, x, y, self.config.tile_size);
        let id = store.insert(key, bounds, calibrator);
        drop(store);
        self.index.write().insert(id, bounds);
        debug!(source = %self.config.name, %key, "container created");
        id
    }
}

impl MapSource for TiledOnlineSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn zoom_levels(&self) -> BTreeSet<u8> {
        (self.config.min_zoom..=self.config.max_zoom).collect()
    }

    fn pixel_format(&self) -> PixelFormat {
        self.config.format
    }

    fn store(&self) -> &RwLock<ContainerStore> {
        &self.store
    }

    fn container(&self, key: &ContainerKey) -> Result<ContainerId, SourceError> {
        match key {
            ContainerKey::Tile { zoom, x, y } => {
                if *zoom < self.config.min_zoom || *zoom > self.config.max_zoom {
                    return Err(SourceError::UnknownContainer(*key));
                }
                Ok(self.get_or_create(*zoom, *x, *y))
            }
            ContainerKey::Raster { .. } => Err(SourceError::UnsupportedKey(*key)),
        }
    }

    fn calibrator(&self, key: &ContainerKey) -> Result<Calibrator, SourceError> {
        match key {
            ContainerKey::Tile { zoom, x, y } => {
                Ok(Calibrator::mercator(*zoom, *x, *y, self.config.tile_size))
            }
            ContainerKey::Raster { .. } => Err(SourceError::UnsupportedKey(*key)),
        }
    }

    fn containers_for(&self, area: &GeoArea, zoom: u8) -> Result<Vec<ContainerId>, SourceError> {
        let zoom = self.clamp_zoom(zoom);
        let range = tile_range(area, zoom)?;
        if range.len() > MAX_QUERY_TILES {
            warn!(
                source = %self.config.name,
                zoom,
                tiles = range.len(),
                limit = MAX_QUERY_TILES,
                "viewport query truncated"
            );
        }
        let ids = range
            .iter()
            .take(MAX_QUERY_TILES)
            .map(|(x, y)| self.get_or_create(zoom, x, y))
            .collect();
        Ok(ids)
    }

    fn fetch_payload(
        &self,
        key: &ContainerKey,
        priority: FetchPriority,
        token: CancellationToken,
    ) -> BoxFuture<'_, Result<Bytes, SourceError>> {
        let key = *key;
        Box::pin(async move {
            let ContainerKey::Tile { zoom, x, y } = key else {
                return Err(SourceError::UnsupportedKey(key));
            };
            let cache_key = key.cache_key();
            if let Some(payload) = self.cache.get(&cache_key).await {
                return Ok(payload);
            }
            match &self.backend {
                Backend::Online(downloader) => {
                    let url = self.template.url(zoom, x, y);
                    let payload = downloader
                        .fetch(&cache_key, &url, priority, token)
                        .wait()
                        .await?;
                    Ok(payload)
                }
                Backend::Offline(archive) => {
                    let payload = archive.get(&cache_key)?;
                    // Promote into the cache so repeat reads stay in memory.
                    if let Err(error) = self.cache.insert(&cache_key, payload.clone()).await {
                        warn!(key = %cache_key, %error, "cache promote failed");
                    }
                    Ok(payload)
                }
            }
        })
    }

    fn invalidate(&self, key: &ContainerKey) {
        if let Backend::Online(downloader) = &self.backend {
            downloader.invalidate(&key.cache_key());
        }
        let mut store = self.store.write();
        if let Some(id) = store.find(key) {
            if let Some(container) = store.get_mut(id) {
                container.invalidate();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::container::TileState;
    use tempfile::TempDir;

    fn offline_source(dir: &TempDir, entries: &[((u8, u32, u32), &[u8])]) -> TiledOnlineSource {
        let archive_path = dir.path().join("tiles.nlar");
        let mut writer = crate::archive::ArchiveWriter::create(&archive_path).unwrap();
        for ((zoom, x, y), payload) in entries {
            let key = ContainerKey::Tile {
                zoom: *zoom,
                x: *x,
                y: *y,
            };
            writer.append(&key.cache_key(), payload).unwrap();
        }
        writer.finish().unwrap();

        let cache = Arc::new(
            TileCache::open(dir.path().join("cache"), CacheConfig::default()).unwrap(),
        );
        TiledOnlineSource::with_archive(
            TiledOnlineConfig::default(),
            cache,
            crate::archive::ArchiveReader::open(&archive_path).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_template_rejected() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(TileCache::open(dir.path(), CacheConfig::default()).unwrap());
        let config = TiledOnlineConfig {
            url_template: "https://tiles.test/broken".to_string(),
            ..TiledOnlineConfig::default()
        };
        let archive_path = dir.path().join("empty.nlar");
        crate::archive::ArchiveWriter::create(&archive_path)
            .unwrap()
            .finish()
            .unwrap();
        let archive = crate::archive::ArchiveReader::open(&archive_path).unwrap();
        assert!(matches!(
            TiledOnlineSource::with_archive(config, cache, archive),
            Err(SourceError::Template(_))
        ));
    }

    #[tokio::test]
    async fn test_container_created_on_first_reference() {
        let dir = TempDir::new().unwrap();
        let source = offline_source(&dir, &[]);
        let key = ContainerKey::Tile {
            zoom: 10,
            x: 540,
            y: 358,
        };
        let id = source.container(&key).unwrap();
        assert_eq!(source.container(&key).unwrap(), id, "same id on re-reference");

        let store = source.store().read();
        let container = store.get(id).unwrap();
        assert_eq!(container.key(), key);
        assert_eq!(container.state(), TileState::NotLoaded);
        assert!(container.bounds().contains(&container.bounds().center()));
    }

    #[tokio::test]
    async fn test_containers_for_matches_tile_range() {
        let dir = TempDir::new().unwrap();
        let source = offline_source(&dir, &[]);
        let area = GeoArea::new(48.2, 48.0, 11.8, 11.4);
        let ids = source.containers_for(&area, 10).unwrap();
        let expected = tile_range(&area, 10).unwrap().len();
        assert_eq!(ids.len(), expected);
        // All created containers are indexed and queryable.
        let store = source.store().read();
        for id in &ids {
            assert!(store.get(*id).unwrap().bounds().intersects(&area));
        }
    }

    #[tokio::test]
    async fn test_zoom_clamped_to_range() {
        let dir = TempDir::new().unwrap();
        let source = offline_source(&dir, &[]);
        let area = GeoArea::new(48.01, 48.0, 11.01, 11.0);
        // Requested zoom above max: served at max_zoom instead of failing.
        let ids = source.containers_for(&area, 40).unwrap();
        assert!(!ids.is_empty());
        let store = source.store().read();
        for id in ids {
            match store.get(id).unwrap().key() {
                ContainerKey::Tile { zoom, .. } => assert_eq!(zoom, 19),
                other => panic!("unexpected key {other}"),
            }
        }
    }

    #[tokio::test]
    async fn test_offline_fetch_reads_archive_and_promotes() {
        let dir = TempDir::new().unwrap();
        let source = offline_source(&dir, &[((10, 540, 358), b"tile payload")]);
        let key = ContainerKey::Tile {
            zoom: 10,
            x: 540,
            y: 358,
        };
        let payload = source
            .fetch_payload(&key, FetchPriority::Viewport, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(payload, Bytes::from_static(b"tile payload"));

        // Second read comes from the cache.
        let payload = source
            .fetch_payload(&key, FetchPriority::Viewport, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(payload, Bytes::from_static(b"tile payload"));
        assert!(source.cache.metrics().snapshot().cache_hits >= 1);
    }

    #[tokio::test]
    async fn test_offline_fetch_missing_entry() {
        let dir = TempDir::new().unwrap();
        let source = offline_source(&dir, &[]);
        let key = ContainerKey::Tile {
            zoom: 10,
            x: 1,
            y: 2,
        };
        let result = source
            .fetch_payload(&key, FetchPriority::Viewport, CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(SourceError::Archive(crate::archive::ArchiveError::EntryNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_raster_key_unsupported() {
        let dir = TempDir::new().unwrap();
        let source = offline_source(&dir, &[]);
        let key = ContainerKey::Raster { id: 1 };
        assert!(matches!(
            source.container(&key),
            Err(SourceError::UnsupportedKey(_))
        ));
        assert!(matches!(
            source.calibrator(&key),
            Err(SourceError::UnsupportedKey(_))
        ));
    }

    #[test]
    fn test_calibrator_matches_tile() {
        let dir = TempDir::new().unwrap();
        let source = offline_source(&dir, &[]);
        let key = ContainerKey::Tile {
            zoom: 12,
            x: 2150,
            y: 1434,
        };
        let calibrator = source.calibrator(&key).unwrap();
        let bounds = tile_bounds(12, 2150, 1434);
        let center = bounds.center();
        let (px, py) = calibrator.to_pixel(&center).unwrap();
        assert!(px >= 0.0 && px < 256.0);
        assert!(py >= 0.0 && py < 256.0);
        let back = calibrator.to_geo(px, py).unwrap();
        assert!((back.lat() - center.lat()).abs() < 1e-6);
        assert!((back.lng() - center.lng()).abs() < 1e-6);
    }
}
