//! Example: Query elevation, fetching the tile if needed.
//!
//! Usage: cargo run --example query_elevation -- <lat> <lon> [dem_root]

use elevfill_dem::{DemConfig, ElevationResolver, TileId};
use std::env;
use std::time::Instant;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: {} <lat> <lon> [dem_root]", args[0]);
        eprintln!("Example: {} 39.7392 -104.9903 ./dem", args[0]);
        std::process::exit(1);
    }

    let lat: f64 = args[1].parse().expect("Invalid latitude");
    let lon: f64 = args[2].parse().expect("Invalid longitude");

    let mut config = DemConfig::default();
    if let Some(root) = args.get(3) {
        config.root = root.into();
    }

    let resolver = ElevationResolver::from_config(&config).expect("Failed to build resolver");

    match TileId::resolve(lat, lon) {
        Ok(tile) => println!("Tile: {} under {}", tile, config.root.display()),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    println!("\nQuerying elevation at ({}, {})...", lat, lon);
    let query_start = Instant::now();

    match resolver.query_lat_lon(lat, lon) {
        Ok(elevation) => {
            println!(
                "Elevation: {:.2} meters (in {:.2}s)",
                elevation,
                query_start.elapsed().as_secs_f64()
            );
        }
        Err(e) if e.is_missing_data() => {
            println!("No elevation data: {}", e);
            return;
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    // Second query should be fast (dataset already open)
    let query_start = Instant::now();
    if let Ok(elevation) = resolver.query_lat_lon(lat, lon) {
        println!(
            "Elevation: {:.2} meters (cached: {:.6}s)",
            elevation,
            query_start.elapsed().as_secs_f64()
        );
    }

    let stats = resolver.cache().stats();
    let acquired = resolver.cache().acquirer().stats();
    println!(
        "Cache: {} hits, {} misses; downloaded {} bytes",
        stats.hits, stats.misses, acquired.bytes_downloaded
    );
}
