//! Geographic primitives and Web Mercator tile numbering.
//!
//! Provides the immutable coordinate value types ([`GeoPosition`],
//! [`GeoArea`]) and the conversions between geographic coordinates and the
//! standard slippy-map tile grid used by online imagery servers.

mod types;

pub use types::{
    CoordError, GeoArea, GeoPosition, MAX_LAT, MAX_LON, MAX_ZOOM, MIN_LAT, MIN_LON, MIN_ZOOM,
};

use std::f64::consts::PI;

/// Converts a geographic position to tile coordinates at the given zoom.
///
/// # Arguments
///
/// * `pos` - Position inside the Web Mercator domain
/// * `zoom` - Zoom level (0 to [`MAX_ZOOM`])
///
/// # Returns
///
/// The `(x, y)` tile indices under the standard tile-numbering scheme, or an
/// error if the position or zoom is out of range.
#[inline]
pub fn position_to_tile(pos: &GeoPosition, zoom: u8) -> Result<(u32, u32), CoordError> {
    pos.validate()?;
    if zoom > MAX_ZOOM {
        return Err(CoordError::InvalidZoom(zoom));
    }

    let n = (1u64 << zoom) as f64;
    let x = ((pos.lng() + 180.0) / 360.0 * n) as u32;
    let lat_rad = pos.lat() * PI / 180.0;
    let y = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n) as u32;

    let max = (1u64 << zoom) as u32 - 1;
    Ok((x.min(max), y.min(max)))
}

/// Returns the geographic bounds of a tile.
///
/// The northwest corner of tile `(x, y)` is the position of `(x, y)` on the
/// grid; the southeast corner is the northwest corner of `(x+1, y+1)`.
#[inline]
pub fn tile_bounds(zoom: u8, x: u32, y: u32) -> GeoArea {
    let (north, west) = tile_origin(zoom, x, y);
    let (south, east) = tile_origin(zoom, x + 1, y + 1);
    GeoArea::new(north, south, east, west)
}

/// Latitude/longitude of a tile's northwest corner.
#[inline]
fn tile_origin(zoom: u8, x: u32, y: u32) -> (f64, f64) {
    let n = (1u64 << zoom) as f64;
    let lng = x as f64 / n * 360.0 - 180.0;
    let lat = (PI * (1.0 - 2.0 * y as f64 / n)).sinh().atan() * 180.0 / PI;
    (lat, lng)
}

/// The rectangle of tiles covering a geographic area at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    /// Zoom level of the range.
    pub zoom: u8,
    /// Westmost tile column.
    pub min_x: u32,
    /// Eastmost tile column (inclusive).
    pub max_x: u32,
    /// Northmost tile row.
    pub min_y: u32,
    /// Southmost tile row (inclusive).
    pub max_y: u32,
}

impl TileRange {
    /// Number of tiles in the range.
    pub fn len(&self) -> usize {
        ((self.max_x - self.min_x + 1) as usize) * ((self.max_y - self.min_y + 1) as usize)
    }

    /// Returns true if the range holds no tiles. Cannot happen for ranges
    /// produced by [`tile_range`], which always cover at least one tile.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Iterates over the `(x, y)` indices in the range, row-major.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let (min_x, max_x) = (self.min_x, self.max_x);
        (self.min_y..=self.max_y).flat_map(move |y| (min_x..=max_x).map(move |x| (x, y)))
    }
}

/// Computes the tile range covering `area` at `zoom`.
///
/// Latitudes are clamped to the Web Mercator domain so that viewports
/// reaching past the projection's poles still resolve to the edge rows.
pub fn tile_range(area: &GeoArea, zoom: u8) -> Result<TileRange, CoordError> {
    if zoom > MAX_ZOOM {
        return Err(CoordError::InvalidZoom(zoom));
    }
    let nw = GeoPosition::new(area.north().clamp(MIN_LAT, MAX_LAT), area.west());
    let se = GeoPosition::new(area.south().clamp(MIN_LAT, MAX_LAT), area.east());
    let (min_x, min_y) = position_to_tile(&nw, zoom)?;
    let (max_x, max_y) = position_to_tile(&se, zoom)?;
    Ok(TileRange {
        zoom,
        min_x,
        max_x,
        min_y,
        max_y,
    })
}
