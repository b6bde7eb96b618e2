//! Map containers and their tiles.
//!
//! A [`Container`] is one addressable map sheet: a single slippy tile for
//! online sources, or a whole calibrated raster for scanned maps. Containers
//! own their [`Tile`]s and their [`Calibrator`]. Pixel payloads are opaque
//! byte blobs tagged with width/height/format; decoding them is the image
//! codec collaborator's job, not this crate's.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::calibrate::{Calibrator, DEFAULT_TILE_SIZE};
use crate::geo::{GeoArea, GeoPosition};

/// Identifies a container inside a source's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(pub u32);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Addressable identity of a container.
///
/// Tiled sources address containers by their slippy-grid position; raster
/// sources by an archive-assigned id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContainerKey {
    /// A slippy tile at `(zoom, x, y)`.
    Tile { zoom: u8, x: u32, y: u32 },
    /// A calibrated raster with an archive-assigned id.
    Raster { id: u32 },
}

impl ContainerKey {
    /// The cache/archive key for this container.
    ///
    /// Keys are human-readable strings so cache directories and logs stay
    /// debuggable.
    pub fn cache_key(&self) -> String {
        match self {
            ContainerKey::Tile { zoom, x, y } => format!("tile/{zoom}/{x}/{y}"),
            ContainerKey::Raster { id } => format!("raster/{id}"),
        }
    }

    /// Parses a key previously produced by [`ContainerKey::cache_key`].
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('/');
        match parts.next()? {
            "tile" => {
                let zoom = parts.next()?.parse().ok()?;
                let x = parts.next()?.parse().ok()?;
                let y = parts.next()?.parse().ok()?;
                if parts.next().is_some() {
                    return None;
                }
                Some(ContainerKey::Tile { zoom, x, y })
            }
            "raster" => {
                let id = parts.next()?.parse().ok()?;
                if parts.next().is_some() {
                    return None;
                }
                Some(ContainerKey::Raster { id })
            }
            _ => None,
        }
    }
}

impl fmt::Display for ContainerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cache_key())
    }
}

/// Encoding of a tile's pixel payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// PNG-encoded image bytes.
    Png,
    /// JPEG-encoded image bytes.
    Jpeg,
    /// Raw interleaved samples with the given bytes per pixel.
    Raw { bytes_per_pixel: u8 },
}

/// An opaque pixel payload with its dimensions and encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Bytes,
}

impl PixelBuffer {
    /// Wraps payload bytes with their dimensions and format tag.
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Bytes) -> Self {
        Self {
            width,
            height,
            format,
            data,
        }
    }

    /// Pixel width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Pixel height.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Payload encoding.
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// The payload bytes. Cheap to clone; the buffer is shared.
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

/// Load state of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileState {
    /// No load has been attempted.
    NotLoaded,
    /// A fetch is in flight.
    Loading,
    /// The pixel buffer is present and immutable.
    Loaded,
    /// The last fetch failed permanently; stays failed until invalidated.
    Failed,
}

/// One fixed-size pixel block of a container.
pub struct Tile {
    container: ContainerId,
    index: usize,
    state: TileState,
    buffer: Option<PixelBuffer>,
    last_access: u64,
}

impl Tile {
    /// Creates a not-yet-loaded placeholder tile.
    pub fn placeholder(container: ContainerId, index: usize) -> Self {
        Self {
            container,
            index,
            state: TileState::NotLoaded,
            buffer: None,
            last_access: 0,
        }
    }

    /// Id of the container owning this tile.
    pub fn container(&self) -> ContainerId {
        self.container
    }

    /// Position of this tile within its container's tile list.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Current load state.
    pub fn state(&self) -> TileState {
        self.state
    }

    /// The loaded pixel buffer, if any.
    pub fn buffer(&self) -> Option<&PixelBuffer> {
        self.buffer.as_ref()
    }

    /// Access stamp of the most recent touch.
    pub fn last_access(&self) -> u64 {
        self.last_access
    }

    /// Records an access for recency tracking.
    pub fn touch(&mut self, stamp: u64) {
        self.last_access = stamp;
    }

    /// Marks a fetch as started.
    pub fn mark_loading(&mut self) {
        self.state = TileState::Loading;
    }

    /// Installs the pixel buffer. The buffer is immutable from here on.
    pub fn mark_loaded(&mut self, buffer: PixelBuffer) {
        self.buffer = Some(buffer);
        self.state = TileState::Loaded;
    }

    /// Marks the tile permanently failed until invalidated.
    pub fn mark_failed(&mut self) {
        self.buffer = None;
        self.state = TileState::Failed;
    }

    /// Clears a failed or loaded state so the tile can be fetched again.
    pub fn invalidate(&mut self) {
        self.buffer = None;
        self.state = TileState::NotLoaded;
    }
}

impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tile")
            .field("container", &self.container)
            .field("index", &self.index)
            .field("state", &self.state)
            .field("has_buffer", &self.buffer.is_some())
            .finish()
    }
}

/// One addressable map sheet.
#[derive(Debug)]
pub struct Container {
    id: ContainerId,
    key: ContainerKey,
    bounds: GeoArea,
    calibrator: Calibrator,
    tiles: Vec<Tile>,
    failed: bool,
}

impl Container {
    /// Creates a container with pre-created placeholder tiles.
    ///
    /// The tile count is derived from the calibrator's pixel dimensions and
    /// the standard tile edge length: a slippy-tile container gets exactly
    /// one tile, a large raster gets a row-major grid.
    pub fn new(id: ContainerId, key: ContainerKey, bounds: GeoArea, calibrator: Calibrator) -> Self {
        let cols = calibrator.width().div_ceil(DEFAULT_TILE_SIZE).max(1);
        let rows = calibrator.height().div_ceil(DEFAULT_TILE_SIZE).max(1);
        let tiles = (0..(cols * rows) as usize)
            .map(|i| Tile::placeholder(id, i))
            .collect();
        Self {
            id,
            key,
            bounds,
            calibrator,
            tiles,
            failed: false,
        }
    }

    /// Arena id of this container.
    pub fn id(&self) -> ContainerId {
        self.id
    }

    /// Addressable key of this container.
    pub fn key(&self) -> ContainerKey {
        self.key
    }

    /// Geographic bounds of this container.
    pub fn bounds(&self) -> GeoArea {
        self.bounds
    }

    /// The container's calibrator.
    pub fn calibrator(&self) -> &Calibrator {
        &self.calibrator
    }

    /// Number of tiles in the container.
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Returns the tile at `index`. Tiles exist from construction as
    /// NotLoaded placeholders; `None` only for an out-of-range index.
    pub fn tile_at(&self, index: usize) -> Option<&Tile> {
        self.tiles.get(index)
    }

    /// Mutable access to the tile at `index`.
    pub fn tile_at_mut(&mut self, index: usize) -> Option<&mut Tile> {
        self.tiles.get_mut(index)
    }

    /// All tiles in order.
    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    /// Returns true if the position maps to a pixel inside this container.
    pub fn covers_geo(&self, pos: &GeoPosition) -> bool {
        self.calibrator.to_pixel(pos).is_ok()
    }

    /// Marks the whole container failed (bad calibration, corrupt archive
    /// entry). Failed containers are skipped in query results.
    pub fn mark_failed(&mut self) {
        self.failed = true;
        for tile in &mut self.tiles {
            tile.mark_failed();
        }
    }

    /// Clears a failure so the container can be loaded again.
    pub fn invalidate(&mut self) {
        self.failed = false;
        for tile in &mut self.tiles {
            tile.invalidate();
        }
    }

    /// Aggregated load state over all tiles.
    ///
    /// Any failed tile (or an explicit container failure) dominates, then
    /// any in-flight tile, then fully loaded; otherwise not loaded.
    pub fn state(&self) -> TileState {
        if self.failed || self.tiles.iter().any(|t| t.state() == TileState::Failed) {
            return TileState::Failed;
        }
        if self.tiles.iter().any(|t| t.state() == TileState::Loading) {
            return TileState::Loading;
        }
        if self.tiles.iter().all(|t| t.state() == TileState::Loaded) {
            return TileState::Loaded;
        }
        TileState::NotLoaded
    }
}
