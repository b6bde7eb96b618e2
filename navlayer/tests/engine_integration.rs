//! Integration tests for the acquisition pipeline.
//!
//! These tests exercise the complete flow through the public API:
//! - offline archive → source → engine → loaded containers
//! - calibrated raster directory → source → engine
//! - cache persistence across engine restarts

use std::sync::Arc;
use std::time::Duration;

use navlayer::archive::ArchiveWriter;
use navlayer::cache::{CacheConfig, TileCache};
use navlayer::calibrate::{CalibrationDescriptor, ControlPoint};
use navlayer::container::{ContainerKey, PixelFormat, TileState};
use navlayer::geo::{tile_range, GeoArea};
use navlayer::source::{CalibratedRasterSource, RasterDescriptor, TiledOnlineConfig, TiledOnlineSource};
use navlayer::{Engine, Viewport};
use tempfile::TempDir;

async fn drain(engine: &mut Engine) -> usize {
    let mut loaded = 0;
    for _ in 0..400 {
        loaded += engine.process_completions();
        if engine.pending_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    loaded
}

fn offline_engine(dir: &TempDir, zoom: u8, viewport_area: &GeoArea) -> Engine {
    // Pack an archive holding exactly the tiles the viewport needs.
    let archive_path = dir.path().join("tiles.nlar");
    let mut writer = ArchiveWriter::create(&archive_path).unwrap();
    for (x, y) in tile_range(viewport_area, zoom).unwrap().iter() {
        let key = ContainerKey::Tile { zoom, x, y };
        writer
            .append(&key.cache_key(), format!("payload-{x}-{y}").as_bytes())
            .unwrap();
    }
    writer.finish().unwrap();

    let cache = Arc::new(
        TileCache::open(dir.path().join("cache"), CacheConfig::default()).unwrap(),
    );
    let archive = navlayer::archive::ArchiveReader::open(&archive_path).unwrap();
    let source = Arc::new(
        TiledOnlineSource::with_archive(
            TiledOnlineConfig::default(),
            Arc::clone(&cache),
            archive,
        )
        .unwrap(),
    );
    Engine::new(source, cache)
}

#[tokio::test]
async fn test_offline_viewport_loads_all_tiles() {
    let dir = TempDir::new().unwrap();
    let viewport_area = GeoArea::new(48.2, 48.0, 11.8, 11.4);
    let mut engine = offline_engine(&dir, 10, &viewport_area);

    let viewport = Viewport {
        area: viewport_area,
        zoom: 10,
    };
    let expected = tile_range(&viewport_area, 10).unwrap().len();

    let loaded = engine.set_viewport(viewport).unwrap();
    assert!(loaded.is_empty());
    let newly_loaded = drain(&mut engine).await;
    assert_eq!(newly_loaded, expected);

    // Every visible container is loaded with its archived payload.
    let loaded = engine.set_viewport(viewport).unwrap();
    assert_eq!(loaded.len(), expected);
    let store = engine.source().store().read();
    for id in loaded {
        let container = store.get(id).unwrap();
        assert_eq!(container.state(), TileState::Loaded);
        let ContainerKey::Tile { x, y, .. } = container.key() else {
            panic!("unexpected key");
        };
        let buffer = container.tile_at(0).unwrap().buffer().unwrap().clone();
        assert_eq!(
            buffer.data().as_ref(),
            format!("payload-{x}-{y}").as_bytes()
        );
    }
}

#[tokio::test]
async fn test_cache_survives_engine_restart() {
    let dir = TempDir::new().unwrap();
    let viewport_area = GeoArea::new(48.2, 48.0, 11.8, 11.4);
    let viewport = Viewport {
        area: viewport_area,
        zoom: 10,
    };

    {
        let mut engine = offline_engine(&dir, 10, &viewport_area);
        engine.set_viewport(viewport).unwrap();
        drain(&mut engine).await;
    }

    // A fresh cache over the same root already holds the payloads.
    let cache = TileCache::open(dir.path().join("cache"), CacheConfig::default()).unwrap();
    assert_eq!(
        cache.entry_count(),
        tile_range(&viewport_area, 10).unwrap().len()
    );
}

#[tokio::test]
async fn test_raster_source_end_to_end() {
    let dir = TempDir::new().unwrap();

    // One calibrated sheet covering the Munich area.
    let mut writer = ArchiveWriter::create(&dir.path().join("rasters.nlar")).unwrap();
    writer.append("raster/1", b"scanned sheet").unwrap();
    writer.finish().unwrap();
    let descriptor = RasterDescriptor {
        id: 1,
        name: Some("munich".to_string()),
        bounds: GeoArea::new(48.5, 47.5, 12.0, 11.0),
        calibration: CalibrationDescriptor::Linear {
            width: 2000,
            height: 1600,
            control_points: vec![
                ControlPoint::new(48.5, 11.0, 0.0, 0.0),
                ControlPoint::new(47.5, 12.0, 1999.0, 1599.0),
            ],
        },
    };
    std::fs::write(
        dir.path().join("1.json"),
        serde_json::to_vec_pretty(&descriptor).unwrap(),
    )
    .unwrap();

    let source = Arc::new(
        CalibratedRasterSource::open(dir.path(), PixelFormat::Png).unwrap(),
    );
    let cache = Arc::new(
        TileCache::open(dir.path().join("cache"), CacheConfig::default()).unwrap(),
    );
    let mut engine = Engine::new(source, cache);

    let viewport = Viewport {
        area: GeoArea::new(48.2, 48.0, 11.8, 11.4),
        zoom: 12,
    };
    engine.set_viewport(viewport).unwrap();
    assert_eq!(engine.pending_count(), 1);
    drain(&mut engine).await;

    let loaded = engine.set_viewport(viewport).unwrap();
    assert_eq!(loaded.len(), 1);
    let store = engine.source().store().read();
    let container = store.get(loaded[0]).unwrap();
    assert_eq!(container.key(), ContainerKey::Raster { id: 1 });
    // The calibrated sheet places the viewport center inside its pixels.
    let center = viewport.area.center();
    assert!(container.covers_geo(&center));
}
