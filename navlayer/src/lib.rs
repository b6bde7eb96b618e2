//! NavLayer - map imagery acquisition for navigation applications
//!
//! This library provides the map acquisition pipeline behind a navigation
//! app's display: calibrating imagery between geographic and pixel space,
//! spatially indexing loaded map containers, caching them under a byte
//! budget, downloading missing tiles concurrently, and reading packed
//! offline archives.
//!
//! The entry point is [`engine::Engine`], which owns the active
//! [`source::MapSource`] and the current viewport and feeds a rendering
//! collaborator with whatever is loaded while the rest backfills in the
//! background.

pub mod archive;
pub mod cache;
pub mod calibrate;
pub mod container;
pub mod download;
pub mod engine;
pub mod geo;
pub mod index;
pub mod source;
pub mod telemetry;

pub use engine::{Engine, EngineState, Viewport};
pub use geo::{GeoArea, GeoPosition};
