//! Sidecar calibration descriptors.
//!
//! Calibrated raster containers ship with a JSON descriptor recording which
//! calibrator kind applies and its parameters. The descriptor is resolved
//! into a [`Calibrator`](super::Calibrator) once, when the source loads the
//! container.

use serde::{Deserialize, Serialize};

use super::{CalibrationError, Calibrator, DEFAULT_SPHERE_RADIUS, DEFAULT_TILE_SIZE};

/// One geo ↔ pixel control point in a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    /// Pixel x coordinate the position maps to.
    pub x: f64,
    /// Pixel y coordinate the position maps to.
    pub y: f64,
}

impl ControlPoint {
    /// Creates a control point.
    pub fn new(lat: f64, lng: f64, x: f64, y: f64) -> Self {
        Self { lat, lng, x, y }
    }
}

fn default_radius() -> f64 {
    DEFAULT_SPHERE_RADIUS
}

fn default_tile_size() -> u32 {
    DEFAULT_TILE_SIZE
}

/// On-disk record of a container's calibration.
///
/// ```json
/// {
///   "kind": "linear",
///   "width": 4000,
///   "height": 3000,
///   "control_points": [
///     { "lat": 48.0, "lng": 11.0, "x": 0.0, "y": 0.0 },
///     { "lat": 47.0, "lng": 12.0, "x": 3999.0, "y": 2999.0 }
///   ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalibrationDescriptor {
    /// Affine fit from control points.
    Linear {
        width: u32,
        height: u32,
        control_points: Vec<ControlPoint>,
    },
    /// Closed-form Web Mercator tile calibration.
    Mercator {
        zoom: u8,
        tile_x: u32,
        tile_y: u32,
        #[serde(default = "default_tile_size")]
        tile_size: u32,
    },
    /// Normal Mercator on a configurable sphere, fitted from control points.
    SphericalMercator {
        width: u32,
        height: u32,
        #[serde(default = "default_radius")]
        radius: f64,
        control_points: Vec<ControlPoint>,
    },
    /// Generic cartographic projection given as a proj string.
    Projection {
        width: u32,
        height: u32,
        proj: String,
        control_points: Vec<ControlPoint>,
    },
}

impl CalibrationDescriptor {
    /// Resolves the descriptor into a usable calibrator.
    pub fn resolve(&self) -> Result<Calibrator, CalibrationError> {
        match self {
            CalibrationDescriptor::Linear {
                width,
                height,
                control_points,
            } => Calibrator::linear(*width, *height, control_points),
            CalibrationDescriptor::Mercator {
                zoom,
                tile_x,
                tile_y,
                tile_size,
            } => Ok(Calibrator::mercator(*zoom, *tile_x, *tile_y, *tile_size)),
            CalibrationDescriptor::SphericalMercator {
                width,
                height,
                radius,
                control_points,
            } => Calibrator::spherical_mercator(*width, *height, *radius, control_points),
            CalibrationDescriptor::Projection {
                width,
                height,
                proj,
                control_points,
            } => Calibrator::projection(*width, *height, proj, control_points),
        }
    }
}
