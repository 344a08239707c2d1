//! Core geospatial aggregation for Geolens: hexagonal grid binning, Web-Mercator vector tiles and tile caching.

pub mod encoding;
pub mod grid;
pub mod tile_cache;
pub mod tiles;
pub mod types;

pub use encoding::encode_geometry;
pub use grid::{
    cell_area_km2, resolution_for_bounds, CellMetadata, GridAggregator, GridConfig, GridResult,
    GridStats, HexCell,
};
pub use tile_cache::TileCache;
pub use tiles::{
    lon_lat_to_tile, tile_bounds, tile_to_lon_lat, tile_url, tiles_for_bounds,
    tiles_for_bounds_within, Geometry, Tile, TileBounds, TileConfig, TileCoord, TileFeature,
    TileGenerator, TileLayer, EXTENT,
};
pub use types::*;
