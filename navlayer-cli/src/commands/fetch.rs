//! `navlayer fetch` - prefetch the tiles covering an area into a cache.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use navlayer::cache::{CacheConfig, TileCache};
use navlayer::container::ContainerKey;
use navlayer::download::{
    CancellationToken, Downloader, DownloaderConfig, FetchPriority, ReqwestClient, UrlTemplate,
};
use navlayer::geo::{tile_range, GeoArea};
use tracing::info;

use crate::error::CliError;

/// Arguments for the fetch command.
#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Server URL template with {zoom}/{x}/{y} placeholders
    #[arg(long)]
    pub template: String,
    /// Area as north,south,east,west in degrees
    #[arg(long)]
    pub area: String,
    /// Zoom level to fetch
    #[arg(long)]
    pub zoom: u8,
    /// Cache root directory to fill
    #[arg(long)]
    pub cache: PathBuf,
    /// Cache byte budget
    #[arg(long, default_value_t = 512 * 1024 * 1024)]
    pub budget: u64,
    /// Concurrent download workers
    #[arg(long, default_value_t = 4)]
    pub workers: usize,
}

/// Downloads every tile in the range covering the area at the given zoom,
/// writing through the cache at `--cache`.
pub fn run(args: FetchArgs) -> Result<(), CliError> {
    let area = parse_area(&args.area)?;
    let template = UrlTemplate::new(args.template.clone())
        .map_err(|e| CliError::InvalidArgument(e.to_string()))?;
    let range = tile_range(&area, args.zoom)
        .map_err(|e| CliError::InvalidArgument(e.to_string()))?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let cache = Arc::new(
            TileCache::open(
                &args.cache,
                CacheConfig {
                    max_size_bytes: args.budget,
                    ..CacheConfig::default()
                },
            )
            .map_err(|e| CliError::Archive(e.to_string()))?,
        );
        let client = Arc::new(
            ReqwestClient::new().map_err(|e| CliError::InvalidArgument(e.to_string()))?,
        );
        let downloader = Downloader::spawn(
            client,
            Arc::clone(&cache),
            DownloaderConfig {
                workers: args.workers,
                ..DownloaderConfig::default()
            },
        );

        info!(tiles = range.len(), zoom = args.zoom, "prefetch started");
        let token = CancellationToken::new();
        let handles: Vec<_> = range
            .iter()
            .map(|(x, y)| {
                let key = ContainerKey::Tile {
                    zoom: args.zoom,
                    x,
                    y,
                };
                downloader.fetch(
                    &key.cache_key(),
                    &template.url(args.zoom, x, y),
                    FetchPriority::Backfill,
                    token.clone(),
                )
            })
            .collect();

        let total = handles.len();
        let mut failed = 0usize;
        for handle in handles {
            if handle.wait().await.is_err() {
                failed += 1;
            }
        }
        downloader.shutdown().await;

        println!(
            "Fetched {} of {total} tiles into {} ({} bytes)",
            total - failed,
            args.cache.display(),
            cache.total_bytes()
        );
        if failed > 0 {
            return Err(CliError::FetchFailed { failed, total });
        }
        Ok(())
    })
}

fn parse_area(spec: &str) -> Result<GeoArea, CliError> {
    let parts: Vec<f64> = spec
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| {
            CliError::InvalidArgument(format!("area must be north,south,east,west: {spec}"))
        })?;
    if parts.len() != 4 {
        return Err(CliError::InvalidArgument(format!(
            "area must have 4 components: {spec}"
        )));
    }
    Ok(GeoArea::new(parts[0], parts[1], parts[2], parts[3]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_area() {
        let area = parse_area("48.2, 48.0, 11.8, 11.4").unwrap();
        assert_eq!(area.north(), 48.2);
        assert_eq!(area.south(), 48.0);
        assert_eq!(area.east(), 11.8);
        assert_eq!(area.west(), 11.4);
    }

    #[test]
    fn test_parse_area_rejects_garbage() {
        assert!(parse_area("48.2,48.0,11.8").is_err());
        assert!(parse_area("a,b,c,d").is_err());
    }
}
