//! Geo ↔ pixel calibration.
//!
//! Every map container carries a [`Calibrator`] mapping geographic positions
//! to pixel coordinates inside the container and back. Four projection
//! families are supported:
//!
//! - **Linear** — affine fit from control points, for scanned maps whose
//!   projection is locally flat.
//! - **Mercator** — closed-form Web Mercator addressed by zoom level and
//!   tile origin, for slippy-map tiles; no control points.
//! - **SphericalMercator** — normal Mercator on a configurable sphere
//!   radius, fitted from control points in projected space, for sources on
//!   a slightly different datum.
//! - **Projection** — delegates to a generic cartographic projection
//!   (proj string), then fits projected space to pixels from control points.
//!
//! The invariant across all variants: `to_geo(to_pixel(p)) ≈ p` within a
//! small epsilon everywhere inside the container's pixel bounds.

mod affine;
mod descriptor;

pub use affine::{AffineFit, FitPoint};
pub use descriptor::{CalibrationDescriptor, ControlPoint};

use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

use proj4rs::proj::Proj;
use thiserror::Error;

use crate::geo::GeoPosition;

/// Default sphere radius for the spherical normal Mercator variant (meters).
pub const DEFAULT_SPHERE_RADIUS: f64 = 6_378_137.0;

/// Pixel edge length of a standard slippy-map tile.
pub const DEFAULT_TILE_SIZE: u32 = 256;

const WGS84_PROJ: &str = "+proj=longlat +datum=WGS84 +no_defs";

/// Errors from calibration setup and coordinate transforms.
#[derive(Debug, Clone, Error)]
pub enum CalibrationError {
    /// The transformed pixel coordinate falls outside the container.
    #[error("pixel ({x:.1}, {y:.1}) outside container bounds {width}x{height}")]
    OutOfBounds {
        x: f64,
        y: f64,
        width: u32,
        height: u32,
    },

    /// Not enough control points for the requested variant.
    #[error("{got} control points given, at least {need} required")]
    InsufficientControlPoints { got: usize, need: usize },

    /// The control points are coincident or collinear and cannot be solved.
    #[error("control points are degenerate, no unique transform exists")]
    DegenerateControlPoints,

    /// The projection definition cannot be parsed.
    #[error("invalid projection configuration: {0}")]
    ConfigInvalid(String),

    /// The projection collaborator rejected the coordinate.
    #[error("projection failed: {0}")]
    ProjectionFailed(String),
}

/// A per-container geo ↔ pixel transform.
#[derive(Debug, Clone)]
pub struct Calibrator {
    width: u32,
    height: u32,
    kind: CalibratorKind,
}

#[derive(Debug, Clone)]
enum CalibratorKind {
    Linear(AffineFit),
    Mercator {
        zoom: u8,
        tile_x: u32,
        tile_y: u32,
        tile_size: u32,
    },
    SphericalMercator {
        radius: f64,
        fit: AffineFit,
    },
    Projection(ProjectionDelegate),
}

/// Forwarding calibrator backed by a generic cartographic projection.
///
/// Geographic coordinates are projected with proj4rs, then an affine fit
/// maps projected space to pixel space.
#[derive(Clone)]
struct ProjectionDelegate {
    definition: String,
    wgs84: Arc<Proj>,
    target: Arc<Proj>,
    fit: AffineFit,
}

impl fmt::Debug for ProjectionDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectionDelegate")
            .field("definition", &self.definition)
            .field("fit", &self.fit)
            .finish()
    }
}

impl ProjectionDelegate {
    fn project(&self, pos: &GeoPosition) -> Result<(f64, f64), CalibrationError> {
        let mut point = (pos.lng().to_radians(), pos.lat().to_radians(), 0.0);
        proj4rs::transform::transform(&self.wgs84, &self.target, &mut point)
            .map_err(|e| CalibrationError::ProjectionFailed(format!("{e:?}")))?;
        Ok((point.0, point.1))
    }

    fn unproject(&self, u: f64, v: f64) -> Result<GeoPosition, CalibrationError> {
        let mut point = (u, v, 0.0);
        proj4rs::transform::transform(&self.target, &self.wgs84, &mut point)
            .map_err(|e| CalibrationError::ProjectionFailed(format!("{e:?}")))?;
        Ok(GeoPosition::new(point.1.to_degrees(), point.0.to_degrees()))
    }
}

/// Normal Mercator projection of a latitude onto a sphere of radius 1.
#[inline]
fn mercator_y(lat_deg: f64) -> f64 {
    let lat_rad = lat_deg.to_radians();
    ((lat_rad.sin() + 1.0) / lat_rad.cos()).ln()
}

/// Inverse of [`mercator_y`].
#[inline]
fn inverse_mercator_y(y: f64) -> f64 {
    let t = y.exp();
    (2.0 * ((t - 1.0) / (t + 1.0)).atan()).to_degrees()
}

impl Calibrator {
    /// Builds a linear calibrator from geographic control points.
    ///
    /// Requires at least two points; see [`AffineFit::fit`] for how the fit
    /// degrades with exactly two.
    pub fn linear(
        width: u32,
        height: u32,
        points: &[ControlPoint],
    ) -> Result<Self, CalibrationError> {
        let fit_points: Vec<FitPoint> = points
            .iter()
            .map(|p| FitPoint {
                u: p.lng,
                v: p.lat,
                x: p.x,
                y: p.y,
            })
            .collect();
        Ok(Self {
            width,
            height,
            kind: CalibratorKind::Linear(AffineFit::fit(&fit_points)?),
        })
    }

    /// Builds the closed-form Web Mercator calibrator for a slippy tile.
    pub fn mercator(zoom: u8, tile_x: u32, tile_y: u32, tile_size: u32) -> Self {
        Self {
            width: tile_size,
            height: tile_size,
            kind: CalibratorKind::Mercator {
                zoom,
                tile_x,
                tile_y,
                tile_size,
            },
        }
    }

    /// Builds a spherical normal Mercator calibrator from control points.
    ///
    /// Latitudes are projected onto a sphere of `radius` before the affine
    /// fit, which keeps the fit accurate over larger latitude spans than the
    /// plain linear variant.
    pub fn spherical_mercator(
        width: u32,
        height: u32,
        radius: f64,
        points: &[ControlPoint],
    ) -> Result<Self, CalibrationError> {
        if !(radius.is_finite() && radius > 0.0) {
            return Err(CalibrationError::ConfigInvalid(format!(
                "sphere radius must be positive, got {radius}"
            )));
        }
        let fit_points: Vec<FitPoint> = points
            .iter()
            .map(|p| FitPoint {
                u: radius * p.lng.to_radians(),
                v: radius * mercator_y(p.lat),
                x: p.x,
                y: p.y,
            })
            .collect();
        Ok(Self {
            width,
            height,
            kind: CalibratorKind::SphericalMercator {
                radius,
                fit: AffineFit::fit(&fit_points)?,
            },
        })
    }

    /// Builds a calibrator delegating to a generic cartographic projection.
    ///
    /// `definition` is a proj string (for example
    /// `"+proj=utm +zone=32 +datum=WGS84"`). Control points pair geographic
    /// positions with pixel coordinates; they are projected before fitting.
    pub fn projection(
        width: u32,
        height: u32,
        definition: &str,
        points: &[ControlPoint],
    ) -> Result<Self, CalibrationError> {
        let wgs84 = Arc::new(
            Proj::from_proj_string(WGS84_PROJ)
                .map_err(|e| CalibrationError::ConfigInvalid(format!("{e:?}")))?,
        );
        let target = Arc::new(
            Proj::from_proj_string(definition)
                .map_err(|e| CalibrationError::ConfigInvalid(format!("{e:?}")))?,
        );
        let mut fit_points = Vec::with_capacity(points.len());
        for p in points {
            let mut point = (p.lng.to_radians(), p.lat.to_radians(), 0.0);
            proj4rs::transform::transform(&wgs84, &target, &mut point)
                .map_err(|e| CalibrationError::ProjectionFailed(format!("{e:?}")))?;
            fit_points.push(FitPoint {
                u: point.0,
                v: point.1,
                x: p.x,
                y: p.y,
            });
        }
        Ok(Self {
            width,
            height,
            kind: CalibratorKind::Projection(ProjectionDelegate {
                definition: definition.to_string(),
                wgs84,
                target,
                fit: AffineFit::fit(&fit_points)?,
            }),
        })
    }

    /// Pixel width of the calibrated container.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Pixel height of the calibrated container.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Transforms a geographic position to pixel coordinates.
    ///
    /// Fails with [`CalibrationError::OutOfBounds`] when the result lands
    /// outside `[0, width) × [0, height)`.
    pub fn to_pixel(&self, pos: &GeoPosition) -> Result<(f64, f64), CalibrationError> {
        let (x, y) = match &self.kind {
            CalibratorKind::Linear(fit) => fit.forward(pos.lng(), pos.lat()),
            CalibratorKind::Mercator {
                zoom,
                tile_x,
                tile_y,
                tile_size,
            } => {
                let n = ((1u64 << zoom) * *tile_size as u64) as f64;
                let global_x = (pos.lng() + 180.0) / 360.0 * n;
                let lat_rad = pos.lat() * PI / 180.0;
                let global_y = (1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n;
                (
                    global_x - (*tile_x as u64 * *tile_size as u64) as f64,
                    global_y - (*tile_y as u64 * *tile_size as u64) as f64,
                )
            }
            CalibratorKind::SphericalMercator { radius, fit } => fit.forward(
                radius * pos.lng().to_radians(),
                radius * mercator_y(pos.lat()),
            ),
            CalibratorKind::Projection(delegate) => {
                let (u, v) = delegate.project(pos)?;
                delegate.fit.forward(u, v)
            }
        };
        self.check_bounds(x, y)?;
        Ok((x, y))
    }

    /// Transforms pixel coordinates back to a geographic position.
    ///
    /// Fails with [`CalibrationError::OutOfBounds`] when `(x, y)` is outside
    /// `[0, width) × [0, height)`.
    pub fn to_geo(&self, x: f64, y: f64) -> Result<GeoPosition, CalibrationError> {
        self.check_bounds(x, y)?;
        match &self.kind {
            CalibratorKind::Linear(fit) => {
                let (lng, lat) = fit.inverse(x, y);
                Ok(GeoPosition::new(lat, lng))
            }
            CalibratorKind::Mercator {
                zoom,
                tile_x,
                tile_y,
                tile_size,
            } => {
                let n = ((1u64 << zoom) * *tile_size as u64) as f64;
                let global_x = x + (*tile_x as u64 * *tile_size as u64) as f64;
                let global_y = y + (*tile_y as u64 * *tile_size as u64) as f64;
                let lng = global_x / n * 360.0 - 180.0;
                let lat = (PI * (1.0 - 2.0 * global_y / n)).sinh().atan() * 180.0 / PI;
                Ok(GeoPosition::new(lat, lng))
            }
            CalibratorKind::SphericalMercator { radius, fit } => {
                let (u, v) = fit.inverse(x, y);
                let lng = (u / radius).to_degrees();
                let lat = inverse_mercator_y(v / radius);
                Ok(GeoPosition::new(lat, lng))
            }
            CalibratorKind::Projection(delegate) => {
                let (u, v) = delegate.fit.inverse(x, y);
                delegate.unproject(u, v)
            }
        }
    }

    fn check_bounds(&self, x: f64, y: f64) -> Result<(), CalibrationError> {
        if x < 0.0 || y < 0.0 || x >= self.width as f64 || y >= self.height as f64 {
            return Err(CalibrationError::OutOfBounds {
                x,
                y,
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::tile_bounds;

    const EPS: f64 = 1e-6;

    fn roundtrip(cal: &Calibrator, pos: &GeoPosition) {
        let (x, y) = cal.to_pixel(pos).unwrap();
        let back = cal.to_geo(x, y).unwrap();
        assert!(
            (back.lat() - pos.lat()).abs() < EPS,
            "lat {} vs {}",
            back.lat(),
            pos.lat()
        );
        assert!(
            (back.lng() - pos.lng()).abs() < EPS,
            "lng {} vs {}",
            back.lng(),
            pos.lng()
        );
    }

    fn linear_points() -> Vec<ControlPoint> {
        // Map sheet corners plus one inner reference mark.
        vec![
            ControlPoint::new(48.0, 11.0, 0.0, 0.0),
            ControlPoint::new(48.0, 12.0, 1000.0, 0.0),
            ControlPoint::new(47.0, 11.0, 0.0, 800.0),
            ControlPoint::new(47.5, 11.5, 500.0, 400.0),
        ]
    }

    #[test]
    fn test_linear_roundtrip() {
        let cal = Calibrator::linear(1000, 800, &linear_points()).unwrap();
        roundtrip(&cal, &GeoPosition::new(47.3, 11.7));
        roundtrip(&cal, &GeoPosition::new(47.999, 11.001));
    }

    #[test]
    fn test_linear_known_pixel() {
        let cal = Calibrator::linear(1000, 800, &linear_points()).unwrap();
        let (x, y) = cal.to_pixel(&GeoPosition::new(47.5, 11.5)).unwrap();
        assert!((x - 500.0).abs() < 1e-6);
        assert!((y - 400.0).abs() < 1e-6);
    }

    #[test]
    fn test_linear_out_of_bounds() {
        let cal = Calibrator::linear(1000, 800, &linear_points()).unwrap();
        // North of the sheet maps to a negative y pixel.
        assert!(matches!(
            cal.to_pixel(&GeoPosition::new(48.5, 11.5)),
            Err(CalibrationError::OutOfBounds { .. })
        ));
        assert!(matches!(
            cal.to_geo(1000.0, 0.0),
            Err(CalibrationError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_mercator_roundtrip() {
        let (x, y) = crate::geo::position_to_tile(&GeoPosition::new(48.1374, 11.5755), 14).unwrap();
        let cal = Calibrator::mercator(14, x, y, DEFAULT_TILE_SIZE);
        let bounds = tile_bounds(14, x, y);
        roundtrip(&cal, &bounds.center());
        roundtrip(&cal, &GeoPosition::new(48.1374, 11.5755));
    }

    #[test]
    fn test_mercator_tile_corners() {
        let cal = Calibrator::mercator(10, 540, 358, DEFAULT_TILE_SIZE);
        let bounds = tile_bounds(10, 540, 358);
        // Northwest corner is pixel (0, 0).
        let (x, y) = cal
            .to_pixel(&GeoPosition::new(bounds.north(), bounds.west()))
            .unwrap();
        assert!(x.abs() < 1e-6);
        assert!(y.abs() < 1e-6);
        // Southeast corner lies just past the last pixel.
        assert!(matches!(
            cal.to_pixel(&GeoPosition::new(bounds.south(), bounds.east())),
            Err(CalibrationError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_spherical_mercator_roundtrip() {
        let cal = Calibrator::spherical_mercator(
            2000,
            1500,
            DEFAULT_SPHERE_RADIUS,
            &[
                ControlPoint::new(48.0, 11.0, 0.0, 0.0),
                ControlPoint::new(46.0, 13.0, 1999.0, 1499.0),
            ],
        )
        .unwrap();
        roundtrip(&cal, &GeoPosition::new(47.0, 12.0));
        roundtrip(&cal, &GeoPosition::new(46.2, 11.1));
    }

    #[test]
    fn test_spherical_mercator_rejects_bad_radius() {
        assert!(matches!(
            Calibrator::spherical_mercator(100, 100, -1.0, &[]),
            Err(CalibrationError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_projection_roundtrip_utm() {
        let cal = Calibrator::projection(
            4000,
            3000,
            "+proj=utm +zone=32 +ellps=WGS84",
            &[
                ControlPoint::new(48.0, 11.0, 0.0, 0.0),
                ControlPoint::new(48.0, 11.5, 3999.0, 30.0),
                ControlPoint::new(47.7, 11.0, 20.0, 2999.0),
            ],
        )
        .unwrap();
        roundtrip(&cal, &GeoPosition::new(47.85, 11.25));
    }

    #[test]
    fn test_projection_bad_definition() {
        assert!(matches!(
            Calibrator::projection(100, 100, "+proj=no_such_projection", &[]),
            Err(CalibrationError::ConfigInvalid(_))
        ));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_mercator_roundtrip_property(
                zoom in 4u8..=19,
                fx in 0.0..0.999_f64,
                fy in 0.0..0.999_f64
            ) {
                // Pick a mid-latitude tile so test positions stay in domain.
                let (tx, ty) = crate::geo::position_to_tile(
                    &GeoPosition::new(48.0, 11.0), zoom).unwrap();
                let cal = Calibrator::mercator(zoom, tx, ty, DEFAULT_TILE_SIZE);
                let x = fx * DEFAULT_TILE_SIZE as f64;
                let y = fy * DEFAULT_TILE_SIZE as f64;
                let pos = cal.to_geo(x, y).unwrap();
                let (x2, y2) = cal.to_pixel(&pos).unwrap();
                prop_assert!((x - x2).abs() < 1e-6);
                prop_assert!((y - y2).abs() < 1e-6);
            }

            #[test]
            fn test_linear_roundtrip_property(
                lat in 47.01..47.99_f64,
                lng in 11.01..11.99_f64
            ) {
                let points = [
                    ControlPoint::new(48.0, 11.0, 0.0, 0.0),
                    ControlPoint::new(48.0, 12.0, 1000.0, 0.0),
                    ControlPoint::new(47.0, 11.0, 0.0, 800.0),
                ];
                let cal = Calibrator::linear(1000, 800, &points).unwrap();
                let pos = GeoPosition::new(lat, lng);
                let (x, y) = cal.to_pixel(&pos).unwrap();
                let back = cal.to_geo(x, y).unwrap();
                prop_assert!((back.lat() - lat).abs() < 1e-6);
                prop_assert!((back.lng() - lng).abs() < 1e-6);
            }
        }
    }
}
