//! Calibrated raster map source.
//!
//! Serves a small set of large scanned maps. Payloads live in a packed
//! archive (`rasters.nlar`); each container has a sidecar JSON descriptor
//! (`<id>.json`) next to the archive recording its bounds and calibration.
//! No network dependency.

use std::collections::BTreeSet;
use std::path::Path;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{query_index, MapSource, SourceError};
use crate::archive::{ArchiveError, ArchiveReader};
use crate::calibrate::{CalibrationDescriptor, Calibrator};
use crate::container::{ContainerId, ContainerKey, PixelFormat};
use crate::download::{BoxFuture, FetchPriority};
use crate::geo::GeoArea;
use crate::index::{ContainerStore, SpatialIndex};

/// Archive file name inside a raster source directory.
const ARCHIVE_NAME: &str = "rasters.nlar";

/// Sidecar descriptor of one calibrated raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterDescriptor {
    /// Archive-assigned container id; the payload entry key is
    /// `raster/<id>`.
    pub id: u32,
    /// Optional display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Geographic bounds of the raster.
    pub bounds: GeoArea,
    /// Calibration kind and parameters.
    pub calibration: CalibrationDescriptor,
}

/// Source backed by calibrated raster scans.
pub struct CalibratedRasterSource {
    name: String,
    format: PixelFormat,
    store: RwLock<ContainerStore>,
    index: RwLock<SpatialIndex>,
    archive: ArchiveReader,
    /// Descriptors whose calibration could not be resolved, with why.
    failed: Vec<(u32, SourceError)>,
}

impl CalibratedRasterSource {
    /// Opens a raster source directory: `rasters.nlar` plus one `<id>.json`
    /// descriptor per container.
    ///
    /// A descriptor that fails to parse or calibrate is skipped and
    /// recorded; it never aborts the other containers.
    pub fn open(dir: &Path, format: PixelFormat) -> Result<Self, SourceError> {
        let archive = ArchiveReader::open(&dir.join(ARCHIVE_NAME))?;
        let mut descriptors = Vec::new();
        let mut failed = Vec::new();
        let entries = std::fs::read_dir(dir).map_err(ArchiveError::Io)?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match parse_descriptor(&path) {
                    Ok(descriptor) => descriptors.push(descriptor),
                    Err(error) => {
                        warn!(path = %path.display(), %error, "skipping bad raster descriptor");
                        failed.push((u32::MAX, error));
                    }
                }
            }
        }
        descriptors.sort_by_key(|d| d.id);
        let mut source = Self::from_parts(
            dir.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "calibrated-rasters".to_string()),
            format,
            archive,
            descriptors,
        );
        source.failed.extend(failed);
        Ok(source)
    }

    /// Builds the source from an already-open archive and descriptors.
    pub fn from_parts(
        name: String,
        format: PixelFormat,
        archive: ArchiveReader,
        descriptors: Vec<RasterDescriptor>,
    ) -> Self {
        let mut store = ContainerStore::new();
        let mut index = SpatialIndex::new();
        let mut failed = Vec::new();
        for descriptor in descriptors {
            let key = ContainerKey::Raster { id: descriptor.id };
            if store.find(&key).is_some() {
                warn!(id = descriptor.id, "duplicate raster descriptor, skipping");
                continue;
            }
            match descriptor.calibration.resolve() {
                Ok(calibrator) => {
                    let id = store.insert(key, descriptor.bounds, calibrator);
                    index.insert(id, descriptor.bounds);
                    debug!(id = descriptor.id, "raster container loaded");
                }
                Err(error) => {
                    warn!(id = descriptor.id, %error, "raster calibration failed, skipping");
                    failed.push((descriptor.id, SourceError::Calibration(error)));
                }
            }
        }
        Self {
            name,
            format,
            store: RwLock::new(store),
            index: RwLock::new(index),
            archive,
            failed,
        }
    }

    /// Descriptors that failed to load, with the reason.
    pub fn failed(&self) -> &[(u32, SourceError)] {
        &self.failed
    }
}

fn parse_descriptor(path: &Path) -> Result<RasterDescriptor, SourceError> {
    let data = std::fs::read(path).map_err(ArchiveError::Io)?;
    serde_json::from_slice(&data).map_err(|e| SourceError::Descriptor(e.to_string()))
}

impl MapSource for CalibratedRasterSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn zoom_levels(&self) -> BTreeSet<u8> {
        // Rasters are zoom-agnostic; they serve every requested level.
        BTreeSet::from([0])
    }

    fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    fn store(&self) -> &RwLock<ContainerStore> {
        &self.store
    }

    fn container(&self, key: &ContainerKey) -> Result<ContainerId, SourceError> {
        match key {
            ContainerKey::Raster { .. } => self
                .store
                .read()
                .find(key)
                .ok_or(SourceError::UnknownContainer(*key)),
            ContainerKey::Tile { .. } => Err(SourceError::UnsupportedKey(*key)),
        }
    }

    fn calibrator(&self, key: &ContainerKey) -> Result<Calibrator, SourceError> {
        let id = self.container(key)?;
        let store = self.store.read();
        let container = store
            .get(id)
            .ok_or(SourceError::UnknownContainer(*key))?;
        Ok(container.calibrator().clone())
    }

    fn containers_for(&self, area: &GeoArea, _zoom: u8) -> Result<Vec<ContainerId>, SourceError> {
        Ok(query_index(&self.index, &self.store, area))
    }

    fn fetch_payload(
        &self,
        key: &ContainerKey,
        _priority: FetchPriority,
        _token: CancellationToken,
    ) -> BoxFuture<'_, Result<Bytes, SourceError>> {
        let key = *key;
        Box::pin(async move {
            if !matches!(key, ContainerKey::Raster { .. }) {
                return Err(SourceError::UnsupportedKey(key));
            }
            match self.archive.get(&key.cache_key()) {
                Ok(payload) => Ok(payload),
                Err(error @ ArchiveError::ChecksumMismatch { .. }) => {
                    // Corruption is isolated to this container.
                    let mut store = self.store.write();
                    if let Some(id) = store.find(&key) {
                        if let Some(container) = store.get_mut(id) {
                            container.mark_failed();
                        }
                    }
                    Err(error.into())
                }
                Err(error) => Err(error.into()),
            }
        })
    }

    fn invalidate(&self, key: &ContainerKey) {
        let mut store = self.store.write();
        if let Some(id) = store.find(key) {
            if let Some(container) = store.get_mut(id) {
                container.invalidate();
            }
        }
    }
}
