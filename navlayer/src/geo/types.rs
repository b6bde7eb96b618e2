//! Geographic value types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum latitude representable in Web Mercator (degrees).
pub const MIN_LAT: f64 = -85.05112878;
/// Maximum latitude representable in Web Mercator (degrees).
pub const MAX_LAT: f64 = 85.05112878;
/// Minimum longitude (degrees).
pub const MIN_LON: f64 = -180.0;
/// Maximum longitude (degrees).
pub const MAX_LON: f64 = 180.0;
/// Minimum supported zoom level.
pub const MIN_ZOOM: u8 = 0;
/// Maximum supported zoom level.
pub const MAX_ZOOM: u8 = 19;

/// Errors from coordinate validation and conversion.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordError {
    /// Latitude outside the Web Mercator range.
    #[error("latitude {0} outside [{MIN_LAT}, {MAX_LAT}]")]
    InvalidLatitude(f64),

    /// Longitude outside [-180, 180].
    #[error("longitude {0} outside [{MIN_LON}, {MAX_LON}]")]
    InvalidLongitude(f64),

    /// Zoom level above the supported maximum.
    #[error("zoom level {0} above maximum {MAX_ZOOM}")]
    InvalidZoom(u8),
}

/// A geographic position in degrees, with an optional altitude in meters.
///
/// Positions are immutable; derived positions are created with
/// [`GeoPosition::with_altitude`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPosition {
    lat: f64,
    lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    altitude: Option<f64>,
}

impl GeoPosition {
    /// Creates a position from latitude and longitude in degrees.
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            altitude: None,
        }
    }

    /// Returns a copy of this position carrying an altitude in meters.
    pub fn with_altitude(self, altitude: f64) -> Self {
        Self {
            altitude: Some(altitude),
            ..self
        }
    }

    /// Latitude in degrees.
    pub fn lat(&self) -> f64 {
        self.lat
    }

    /// Longitude in degrees.
    pub fn lng(&self) -> f64 {
        self.lng
    }

    /// Altitude in meters, if known.
    pub fn altitude(&self) -> Option<f64> {
        self.altitude
    }

    /// Checks that the position lies inside the Web Mercator domain.
    pub fn validate(&self) -> Result<(), CoordError> {
        if !(MIN_LAT..=MAX_LAT).contains(&self.lat) {
            return Err(CoordError::InvalidLatitude(self.lat));
        }
        if !(MIN_LON..=MAX_LON).contains(&self.lng) {
            return Err(CoordError::InvalidLongitude(self.lng));
        }
        Ok(())
    }
}

/// A geographic rectangle bounded by north/south latitudes and
/// east/west longitudes, all in degrees.
///
/// Used for viewports and container bounds. Areas do not wrap across the
/// antimeridian; callers split wrapping viewports before querying.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoArea {
    north: f64,
    south: f64,
    east: f64,
    west: f64,
}

impl GeoArea {
    /// Creates an area from explicit bounds.
    ///
    /// Bounds are normalized so that `north >= south` and `east >= west`.
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Self {
        Self {
            north: north.max(south),
            south: north.min(south),
            east: east.max(west),
            west: east.min(west),
        }
    }

    /// Creates the smallest area covering both corner positions.
    pub fn from_corners(a: GeoPosition, b: GeoPosition) -> Self {
        Self::new(a.lat(), b.lat(), a.lng(), b.lng())
    }

    /// Northern latitude bound in degrees.
    pub fn north(&self) -> f64 {
        self.north
    }

    /// Southern latitude bound in degrees.
    pub fn south(&self) -> f64 {
        self.south
    }

    /// Eastern longitude bound in degrees.
    pub fn east(&self) -> f64 {
        self.east
    }

    /// Western longitude bound in degrees.
    pub fn west(&self) -> f64 {
        self.west
    }

    /// Center of the area.
    pub fn center(&self) -> GeoPosition {
        GeoPosition::new(
            (self.north + self.south) / 2.0,
            (self.east + self.west) / 2.0,
        )
    }

    /// Returns true if `pos` lies inside the area (bounds inclusive).
    pub fn contains(&self, pos: &GeoPosition) -> bool {
        pos.lat() >= self.south
            && pos.lat() <= self.north
            && pos.lng() >= self.west
            && pos.lng() <= self.east
    }

    /// Returns true if the two areas share any point (touching counts).
    pub fn intersects(&self, other: &GeoArea) -> bool {
        self.south <= other.north
            && self.north >= other.south
            && self.west <= other.east
            && self.east >= other.west
    }

    /// Smallest area covering both `self` and `other`.
    pub fn union(&self, other: &GeoArea) -> GeoArea {
        GeoArea {
            north: self.north.max(other.north),
            south: self.south.min(other.south),
            east: self.east.max(other.east),
            west: self.west.min(other.west),
        }
    }

    /// Degree-space surface of the area. Used by the spatial index to pick
    /// the child with the least enlargement; not a geodesic area.
    pub fn extent(&self) -> f64 {
        (self.north - self.south) * (self.east - self.west)
    }

    /// Extent the area would grow by if it had to cover `other`.
    pub fn enlargement(&self, other: &GeoArea) -> f64 {
        self.union(other).extent() - self.extent()
    }

    /// Extent of the overlap between the two areas, zero if disjoint.
    pub fn overlap(&self, other: &GeoArea) -> f64 {
        if !self.intersects(other) {
            return 0.0;
        }
        let north = self.north.min(other.north);
        let south = self.south.max(other.south);
        let east = self.east.min(other.east);
        let west = self.west.max(other.west);
        (north - south) * (east - west)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_accessors() {
        let pos = GeoPosition::new(48.137, 11.575).with_altitude(519.0);
        assert_eq!(pos.lat(), 48.137);
        assert_eq!(pos.lng(), 11.575);
        assert_eq!(pos.altitude(), Some(519.0));
    }

    #[test]
    fn test_position_validate() {
        assert!(GeoPosition::new(48.0, 11.0).validate().is_ok());
        assert!(matches!(
            GeoPosition::new(90.0, 11.0).validate(),
            Err(CoordError::InvalidLatitude(_))
        ));
        assert!(matches!(
            GeoPosition::new(48.0, 181.0).validate(),
            Err(CoordError::InvalidLongitude(_))
        ));
    }

    #[test]
    fn test_area_normalizes_bounds() {
        let area = GeoArea::new(-10.0, 10.0, -20.0, 20.0);
        assert_eq!(area.north(), 10.0);
        assert_eq!(area.south(), -10.0);
        assert_eq!(area.east(), 20.0);
        assert_eq!(area.west(), -20.0);
    }

    #[test]
    fn test_area_from_corners() {
        let area = GeoArea::from_corners(
            GeoPosition::new(48.0, 11.0),
            GeoPosition::new(47.0, 12.0),
        );
        assert_eq!(area.north(), 48.0);
        assert_eq!(area.south(), 47.0);
        assert_eq!(area.east(), 12.0);
        assert_eq!(area.west(), 11.0);
    }

    #[test]
    fn test_area_contains() {
        let area = GeoArea::new(48.0, 47.0, 12.0, 11.0);
        assert!(area.contains(&GeoPosition::new(47.5, 11.5)));
        assert!(area.contains(&GeoPosition::new(48.0, 11.0))); // on the edge
        assert!(!area.contains(&GeoPosition::new(46.9, 11.5)));
        assert!(!area.contains(&GeoPosition::new(47.5, 12.1)));
    }

    #[test]
    fn test_area_intersects() {
        let a = GeoArea::new(48.0, 47.0, 12.0, 11.0);
        let b = GeoArea::new(47.5, 46.5, 11.5, 10.5);
        let c = GeoArea::new(50.0, 49.0, 12.0, 11.0);
        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_area_intersects_touching_edge() {
        let a = GeoArea::new(48.0, 47.0, 12.0, 11.0);
        let b = GeoArea::new(49.0, 48.0, 12.0, 11.0);
        assert!(a.intersects(&b));
    }

    #[test]
    fn test_area_union_covers_both() {
        let a = GeoArea::new(48.0, 47.0, 12.0, 11.0);
        let b = GeoArea::new(50.0, 49.0, 14.0, 13.0);
        let u = a.union(&b);
        assert_eq!(u.north(), 50.0);
        assert_eq!(u.south(), 47.0);
        assert_eq!(u.east(), 14.0);
        assert_eq!(u.west(), 11.0);
    }

    #[test]
    fn test_enlargement_zero_when_contained() {
        let outer = GeoArea::new(50.0, 40.0, 20.0, 10.0);
        let inner = GeoArea::new(45.0, 44.0, 15.0, 14.0);
        assert_eq!(outer.enlargement(&inner), 0.0);
        assert!(inner.enlargement(&outer) > 0.0);
    }

    #[test]
    fn test_overlap_disjoint_is_zero() {
        let a = GeoArea::new(48.0, 47.0, 12.0, 11.0);
        let b = GeoArea::new(40.0, 39.0, 2.0, 1.0);
        assert_eq!(a.overlap(&b), 0.0);
    }

    #[test]
    fn test_overlap_partial() {
        let a = GeoArea::new(2.0, 0.0, 2.0, 0.0);
        let b = GeoArea::new(3.0, 1.0, 3.0, 1.0);
        assert!((a.overlap(&b) - 1.0).abs() < 1e-12);
    }
}
