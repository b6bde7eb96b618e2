//! Placeholder source.

use std::collections::BTreeSet;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use super::{MapSource, SourceError};
use crate::calibrate::{Calibrator, DEFAULT_TILE_SIZE};
use crate::container::{ContainerId, ContainerKey, PixelFormat};
use crate::download::{BoxFuture, FetchPriority};
use crate::geo::{GeoArea, MAX_LAT, MIN_LAT};
use crate::index::ContainerStore;

/// A single white RGBA pixel; the renderer stretches it.
const PLACEHOLDER_PIXEL: &[u8] = &[0xFF, 0xFF, 0xFF, 0xFF];

/// Source used when no real map source is configured.
///
/// Serves one world-covering placeholder container for any key and never
/// fails.
pub struct EmptySource {
    store: RwLock<ContainerStore>,
    placeholder: ContainerId,
}

impl EmptySource {
    /// Creates the placeholder source.
    pub fn new() -> Self {
        let mut store = ContainerStore::new();
        let bounds = GeoArea::new(MAX_LAT, MIN_LAT, 180.0, -180.0);
        let placeholder = store.insert(
            ContainerKey::Raster { id: 0 },
            bounds,
            Calibrator::mercator(0, 0, 0, DEFAULT_TILE_SIZE),
        );
        Self {
            store: RwLock::new(store),
            placeholder,
        }
    }
}

impl Default for EmptySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MapSource for EmptySource {
    fn name(&self) -> &str {
        "empty"
    }

    fn zoom_levels(&self) -> BTreeSet<u8> {
        BTreeSet::from([0])
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Raw { bytes_per_pixel: 4 }
    }

    fn store(&self) -> &RwLock<ContainerStore> {
        &self.store
    }

    fn container(&self, _key: &ContainerKey) -> Result<ContainerId, SourceError> {
        Ok(self.placeholder)
    }

    fn calibrator(&self, _key: &ContainerKey) -> Result<Calibrator, SourceError> {
        Ok(Calibrator::mercator(0, 0, 0, DEFAULT_TILE_SIZE))
    }

    fn containers_for(&self, _area: &GeoArea, _zoom: u8) -> Result<Vec<ContainerId>, SourceError> {
        Ok(vec![self.placeholder])
    }

    fn fetch_payload(
        &self,
        _key: &ContainerKey,
        _priority: FetchPriority,
        _token: CancellationToken,
    ) -> BoxFuture<'_, Result<Bytes, SourceError>> {
        Box::pin(async { Ok(Bytes::from_static(PLACEHOLDER_PIXEL)) })
    }
}
