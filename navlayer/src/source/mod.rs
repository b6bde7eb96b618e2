//! Map source variants.
//!
//! A [`MapSource`] combines a container store, a spatial index, and a policy
//! for obtaining payload bytes:
//!
//! - [`TiledOnlineSource`] — slippy tiles from a server URL template via the
//!   downloader, or from a packed archive when operating offline.
//! - [`CalibratedRasterSource`] — a small set of large scanned maps with
//!   sidecar calibration descriptors; no network dependency.
//! - [`NetworkSource`] — wraps another source, adding downloader + cache
//!   semantics to an otherwise static source definition.
//! - [`EmptySource`] — a fixed placeholder that never fails.
//!
//! The concrete variant is chosen once at configuration time and stays
//! immutable for the engine's active-source lifetime.

mod empty;
mod network;
mod raster;
mod tiled;

pub use empty::EmptySource;
pub use network::NetworkSource;
pub use raster::{CalibratedRasterSource, RasterDescriptor};
pub use tiled::{TiledOnlineConfig, TiledOnlineSource};

use std::collections::BTreeSet;

use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::archive::ArchiveError;
use crate::cache::CacheError;
use crate::calibrate::{CalibrationError, Calibrator};
use crate::container::{ContainerId, ContainerKey, PixelFormat};
use crate::download::{BoxFuture, DownloadError, FetchPriority, TemplateError};
use crate::geo::{CoordError, GeoArea};
use crate::index::{ContainerStore, SpatialIndex};

/// Errors from source operations, composing the component errors.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Calibration setup or transform failure.
    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    /// Archive open or retrieval failure.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Cache failure.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Download failure.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Invalid server URL template.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Coordinate validation failure.
    #[error(transparent)]
    Coord(#[from] CoordError),

    /// Sidecar descriptor parse failure.
    #[error("descriptor error: {0}")]
    Descriptor(String),

    /// The key shape does not belong to this source.
    #[error("key {0} is not served by this source")]
    UnsupportedKey(ContainerKey),

    /// The key is well-formed but unknown to this source.
    #[error("container {0} unknown to this source")]
    UnknownContainer(ContainerKey),
}

/// Common contract of all source variants.
///
/// Metadata operations (`container`, `calibrator`, `containers_for`) are
/// synchronous and touch no I/O beyond memory; only `fetch_payload`
/// suspends, and only inside the downloader or the cache.
pub trait MapSource: Send + Sync {
    /// Human-readable source name for logs.
    fn name(&self) -> &str;

    /// The zoom levels this source serves.
    fn zoom_levels(&self) -> BTreeSet<u8>;

    /// Encoding of the payloads this source produces.
    fn pixel_format(&self) -> PixelFormat;

    /// The arena holding this source's containers.
    fn store(&self) -> &RwLock<ContainerStore>;

    /// Returns the container for a key, creating it on first reference.
    fn container(&self, key: &ContainerKey) -> Result<ContainerId, SourceError>;

    /// Resolves the calibrator for a key.
    fn calibrator(&self, key: &ContainerKey) -> Result<Calibrator, SourceError>;

    /// Returns the containers intersecting `area` at `zoom`, creating
    /// tiled containers on first reference.
    fn containers_for(&self, area: &GeoArea, zoom: u8) -> Result<Vec<ContainerId>, SourceError>;

    /// Obtains payload bytes for a key: cache, then archive or network
    /// depending on the variant.
    fn fetch_payload(
        &self,
        key: &ContainerKey,
        priority: FetchPriority,
        token: CancellationToken,
    ) -> BoxFuture<'_, Result<Bytes, SourceError>>;

    /// Clears a failure mark so the key can be fetched again.
    fn invalidate(&self, key: &ContainerKey) {
        let _ = key;
    }
}

/// Queries a source's spatial index, skipping failed containers.
///
/// Shared helper for variants whose containers pre-exist in the index.
pub(crate) fn query_index(
    index: &RwLock<SpatialIndex>,
    store: &RwLock<ContainerStore>,
    area: &GeoArea,
) -> Vec<ContainerId> {
    let ids = index.read().find_containers(area);
    let store = store.read();
    ids.into_iter()
        .filter(|id| {
            store
                .get(*id)
                .map(|c| c.state() != crate::container::TileState::Failed)
                .unwrap_or(false)
        })
        .collect()
}
