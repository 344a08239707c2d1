//! End-to-end: one point batch through the aggregator, the tile generator
//! and the geometry encoder.

use approx::assert_relative_eq;
use geolens::encoding::{geom_type, unzigzag};
use geolens::tiles::{HEATMAP_LAYER, POINTS_LAYER};
use geolens::{
    encode_geometry, lon_lat_to_tile, tile_bounds, tile_to_lon_lat, Bounds, GeoPoint,
    GridAggregator, GridConfig, TileConfig, TileCoord, TileGenerator, EXTENT,
};

fn civic_reports() -> Vec<GeoPoint> {
    let mut points = Vec::new();
    for i in 0..40 {
        let f = i as f64;
        points.push(
            GeoPoint::new(37.76 + (f * 0.0005), -122.42 + (f * 0.0004), f % 7.0)
                .with_category(if i % 2 == 0 { "pothole" } else { "graffiti" })
                .with_urgency(if i % 5 == 0 { "high" } else { "low" }),
        );
    }
    points.push(GeoPoint::new(f64::NAN, -122.41, 1.0));
    points
}

#[test]
fn test_batch_aggregates_and_tiles_consistently() {
    let points = civic_reports();
    let bounds = Bounds::new(37.80, 37.75, -122.40, -122.43);

    let mut aggregator = GridAggregator::new(GridConfig {
        smoothing: true,
        ..Default::default()
    });
    let grid = aggregator.aggregate(&points, &bounds, Some(9)).unwrap();
    let counted: u64 = grid.cells.iter().map(|c| c.count).sum();
    assert_eq!(counted, 40);
    assert_eq!(grid.skipped_points, 1);
    let summed: f64 = grid.cells.iter().map(|c| c.value).sum();
    let expected: f64 = (0..40).map(|i| (i as f64) % 7.0).sum();
    assert_relative_eq!(summed, expected, epsilon = 1e-9);
    assert!(grid.cells.iter().all(|c| c.smoothed_value.is_some()));

    let mut generator = TileGenerator::new(TileConfig::default());
    let tiles = generator.generate(&points, 14, Some(bounds)).unwrap();
    assert!(!tiles.is_empty());
    let tiled: usize = tiles
        .iter()
        .map(|t| t.layer(POINTS_LAYER).map_or(0, |l| l.features.len()))
        .sum();
    assert_eq!(tiled, 40);
    assert!(tiles.iter().all(|t| t.within_extent()));
    assert!(tiles.iter().all(|t| t.layer(HEATMAP_LAYER).is_some()));
}

#[test]
fn test_encoded_points_decode_back_into_extent() {
    let points = civic_reports();
    let mut generator = TileGenerator::default();
    for tile in generator.generate(&points, 13, None).unwrap() {
        let layer = tile.layer(POINTS_LAYER).unwrap();
        for feature in &layer.features {
            let commands = encode_geometry(&feature.geometry);
            assert_eq!(geom_type(&feature.geometry), 1);
            assert_eq!(commands.len(), 3);
            let (x, y) = (unzigzag(commands[1]), unzigzag(commands[2]));
            assert!((0..EXTENT).contains(&x));
            assert!((0..EXTENT).contains(&y));
        }
    }
}

#[test]
fn test_tile_math_round_trips_at_every_zoom() {
    for z in 0..=18u8 {
        let n = 1u32 << z;
        for (x, y) in [(0, 0), (n / 2, n / 3), (n - 1, n - 1), (n / 5, n - 1)] {
            let (lon, lat) = tile_to_lon_lat(x, y, z);
            assert_eq!(lon_lat_to_tile(lon, lat, z), TileCoord::new(z, x, y));

            let b = tile_bounds(TileCoord::new(z, x, y));
            let center = lon_lat_to_tile((b.west + b.east) / 2.0, (b.north + b.south) / 2.0, z);
            assert_eq!(center, TileCoord::new(z, x, y));
        }
    }
}

#[test]
fn test_generator_cache_keeps_recently_read_tiles() {
    let mut generator = TileGenerator::new(TileConfig {
        cache_capacity: 2,
        ..Default::default()
    });
    let at = |lat: f64, lng: f64| vec![GeoPoint::new(lat, lng, 1.0)];

    let a = generator.generate(&at(10.0, 10.0), 6, None).unwrap()[0].coord;
    let b = generator.generate(&at(-10.0, -10.0), 6, None).unwrap()[0].coord;
    assert!(generator.cached_tile(a).is_some());

    let c = generator.generate(&at(40.0, 100.0), 6, None).unwrap()[0].coord;
    assert!(generator.cache().contains(a));
    assert!(!generator.cache().contains(b));
    assert!(generator.cache().contains(c));
}
