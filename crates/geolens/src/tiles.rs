//! Web-Mercator XYZ tiling and per-tile vector layer generation.
//!
//! Every tile carries three layers built from the points that fall inside
//! its geographic bounds:
//!
//! - `points`   one feature per point
//! - `heatmap`  a 32×32 density grid, one square polygon per occupied cell
//! - `clusters` greedy radius clustering, radius shrinking with zoom
//!
//! Geometry is expressed in tile-local integer coordinates in `[0, EXTENT)`.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tile_cache::TileCache;
use crate::types::{Bounds, GeoError, GeoPoint, GeoResult};

/// Tile-local coordinate extent shared by every tile.
pub const EXTENT: i32 = 4096;

/// Highest zoom level accepted.
pub const MAX_ZOOM: u8 = 22;

/// Default cap on tiles enumerated for one viewport.
pub const DEFAULT_MAX_TILES: u64 = 1 << 16;

/// Cells per axis in the heatmap layer.
pub const HEATMAP_GRID: i32 = 32;

/// Web-Mercator latitude limit.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

pub const POINTS_LAYER: &str = "points";
pub const HEATMAP_LAYER: &str = "heatmap";
pub const CLUSTERS_LAYER: &str = "clusters";

const CLUSTER_RADIUS_BASE: f64 = 512.0;
const CLUSTER_RADIUS_DECAY: f64 = 0.85;
const CLUSTER_RADIUS_MIN: f64 = 16.0;

/// Guards `floor` against landing one tile short on exact tile edges.
const EDGE_EPSILON: f64 = 1e-9;

/// An XYZ tile address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Cache key in `z/x/y` form.
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.z, self.x, self.y)
    }

    pub fn parent(&self) -> Option<Self> {
        (self.z > 0).then(|| Self::new(self.z - 1, self.x / 2, self.y / 2))
    }

    pub fn children(&self) -> [Self; 4] {
        let (z, x, y) = (self.z + 1, self.x * 2, self.y * 2);
        [
            Self::new(z, x, y),
            Self::new(z, x + 1, y),
            Self::new(z, x, y + 1),
            Self::new(z, x + 1, y + 1),
        ]
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Geographic extent of a tile in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileBounds {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl TileBounds {
    /// Half-open membership: east and south edges belong to the neighbour tile.
    pub fn contains(&self, lng: f64, lat: f64) -> bool {
        lng >= self.west && lng < self.east && lat > self.south && lat <= self.north
    }
}

fn tiles_per_axis(zoom: u8) -> f64 {
    (1u64 << zoom) as f64
}

/// Fractional tile coordinates of a position.
fn lon_lat_to_fraction(lon: f64, lat: f64, zoom: u8) -> (f64, f64) {
    let n = tiles_per_axis(zoom);
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let x = (lon + 180.0) / 360.0 * n;
    let y = (1.0 - lat.tan().asinh() / PI) / 2.0 * n;
    (x, y)
}

/// Tile containing a position.
pub fn lon_lat_to_tile(lon: f64, lat: f64, zoom: u8) -> TileCoord {
    let (fx, fy) = lon_lat_to_fraction(lon, lat, zoom);
    let max = (1u64 << zoom) as f64 - 1.0;
    let x = (fx + EDGE_EPSILON).floor().clamp(0.0, max) as u32;
    let y = (fy + EDGE_EPSILON).floor().clamp(0.0, max) as u32;
    TileCoord::new(zoom, x, y)
}

/// North-west corner (lon, lat) of a tile. Accepts `x`/`y` up to `2^z` so
/// the south-east corner is `tile_to_lon_lat(x + 1, y + 1, z)`.
pub fn tile_to_lon_lat(x: u32, y: u32, zoom: u8) -> (f64, f64) {
    let n = tiles_per_axis(zoom);
    let lon = x as f64 / n * 360.0 - 180.0;
    let lat = (PI * (1.0 - 2.0 * y as f64 / n)).sinh().atan().to_degrees();
    (lon, lat)
}

pub fn tile_bounds(coord: TileCoord) -> TileBounds {
    let (west, north) = tile_to_lon_lat(coord.x, coord.y, coord.z);
    let (east, south) = tile_to_lon_lat(coord.x + 1, coord.y + 1, coord.z);
    TileBounds {
        west,
        south,
        east,
        north,
    }
}

/// Every tile intersecting `bounds` at `zoom`, row-major, capped at
/// [`DEFAULT_MAX_TILES`].
pub fn tiles_for_bounds(bounds: &Bounds, zoom: u8) -> GeoResult<Vec<TileCoord>> {
    tiles_for_bounds_within(bounds, zoom, DEFAULT_MAX_TILES)
}

/// Every tile intersecting `bounds` at `zoom`, or [`GeoError::TooManyTiles`]
/// when more than `max_tiles` would be produced.
pub fn tiles_for_bounds_within(
    bounds: &Bounds,
    zoom: u8,
    max_tiles: u64,
) -> GeoResult<Vec<TileCoord>> {
    if zoom > MAX_ZOOM {
        return Err(GeoError::InvalidZoom(zoom));
    }
    bounds.validate()?;
    let nw = lon_lat_to_tile(bounds.west, bounds.north, zoom);
    let se = lon_lat_to_tile(bounds.east, bounds.south, zoom);
    let columns = u64::from(se.x.saturating_sub(nw.x)) + 1;
    let rows = u64::from(se.y.saturating_sub(nw.y)) + 1;
    let count = columns
        .checked_mul(rows)
        .filter(|n| *n <= max_tiles)
        .ok_or(GeoError::TooManyTiles {
            zoom,
            limit: max_tiles,
        })?;
    let mut tiles = Vec::with_capacity(count as usize);
    for y in nw.y..=se.y {
        for x in nw.x..=se.x {
            tiles.push(TileCoord::new(zoom, x, y));
        }
    }
    Ok(tiles)
}

/// Expand an XYZ URL template. `{s}` rotates over `hosts` by tile position.
pub fn tile_url(template: &str, coord: TileCoord, hosts: &[String]) -> String {
    let mut url = template
        .replace("{z}", &coord.z.to_string())
        .replace("{x}", &coord.x.to_string())
        .replace("{y}", &coord.y.to_string());
    if !hosts.is_empty() {
        let idx = (coord.x as usize + coord.y as usize) % hosts.len();
        url = url.replace("{s}", &hosts[idx]);
    }
    url
}

/// Cluster radius in tile units; shrinks as zoom increases.
pub fn cluster_radius(zoom: u8) -> f64 {
    (CLUSTER_RADIUS_BASE * CLUSTER_RADIUS_DECAY.powi(zoom as i32)).max(CLUSTER_RADIUS_MIN)
}

/// Tile-local geometry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point([i32; 2]),
    LineString(Vec<[i32; 2]>),
    Polygon(Vec<Vec<[i32; 2]>>),
}

impl Geometry {
    fn vertices(&self) -> Box<dyn Iterator<Item = &[i32; 2]> + '_> {
        match self {
            Geometry::Point(p) => Box::new(std::iter::once(p)),
            Geometry::LineString(line) => Box::new(line.iter()),
            Geometry::Polygon(rings) => Box::new(rings.iter().flatten()),
        }
    }

    pub fn within_extent(&self) -> bool {
        self.vertices()
            .all(|[x, y]| (0..EXTENT).contains(x) && (0..EXTENT).contains(y))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileFeature {
    pub id: u64,
    pub geometry: Geometry,
    pub properties: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileLayer {
    pub name: String,
    pub extent: i32,
    pub features: Vec<TileFeature>,
}

impl TileLayer {
    fn new(name: &str, features: Vec<TileFeature>) -> Self {
        Self {
            name: name.to_string(),
            extent: EXTENT,
            features,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    pub coord: TileCoord,
    pub layers: Vec<TileLayer>,
}

impl Tile {
    pub fn layer(&self, name: &str) -> Option<&TileLayer> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// Every feature lies inside `[0, EXTENT)` on both axes.
    pub fn within_extent(&self) -> bool {
        self.layers
            .iter()
            .all(|l| l.extent == EXTENT && l.features.iter().all(|f| f.geometry.within_extent()))
    }

    pub fn feature_count(&self) -> usize {
        self.layers.iter().map(|l| l.features.len()).sum()
    }
}

/// Tile generator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TileConfig {
    /// Tiles retained in the LRU cache.
    pub cache_capacity: usize,
    pub include_points: bool,
    pub include_heatmap: bool,
    pub include_clusters: bool,
    /// Viewports covering more tiles than this are rejected.
    pub max_tiles: u64,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 256,
            include_points: true,
            include_heatmap: true,
            include_clusters: true,
            max_tiles: DEFAULT_MAX_TILES,
        }
    }
}

/// Builds vector tiles from point batches and keeps recent tiles in an LRU.
pub struct TileGenerator {
    config: TileConfig,
    cache: TileCache,
}

impl TileGenerator {
    pub fn new(config: TileConfig) -> Self {
        let cache = TileCache::new(config.cache_capacity);
        Self { config, cache }
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut TileCache {
        &mut self.cache
    }

    /// Read a previously generated tile, refreshing its LRU position.
    pub fn cached_tile(&mut self, coord: TileCoord) -> Option<Tile> {
        self.cache.get(coord).map(|t| (*t).clone())
    }

    /// Generate every non-empty tile at `zoom` covering `bounds` (or the
    /// points' own extent when `bounds` is `None`).
    pub fn generate(
        &mut self,
        points: &[GeoPoint],
        zoom: u8,
        bounds: Option<Bounds>,
    ) -> GeoResult<Vec<Tile>> {
        let bounds = match bounds.or_else(|| Bounds::enclosing(points)) {
            Some(b) => b,
            None => return Ok(Vec::new()),
        };
        let coords = tiles_for_bounds_within(&bounds, zoom, self.config.max_tiles)?;

        let mut tiles = Vec::new();
        for coord in coords {
            let tile = self.build_tile(coord, points);
            if tile.feature_count() == 0 {
                continue;
            }
            self.cache.put(tile.clone());
            tiles.push(tile);
        }
        tracing::debug!(
            "generated {} tile(s) at z{} from {} point(s)",
            tiles.len(),
            zoom,
            points.len()
        );
        Ok(tiles)
    }

    /// Build a single tile from whatever points fall inside it.
    pub fn build_tile(&self, coord: TileCoord, points: &[GeoPoint]) -> Tile {
        let bounds = tile_bounds(coord);
        let members: Vec<(usize, &GeoPoint, [i32; 2])> = points
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_finite() && bounds.contains(p.lng, p.lat))
            .map(|(i, p)| (i, p, to_tile_local(coord, p.lng, p.lat)))
            .collect();

        let mut layers = Vec::with_capacity(3);
        if self.config.include_points {
            layers.push(TileLayer::new(POINTS_LAYER, point_features(&members)));
        }
        if self.config.include_heatmap {
            layers.push(TileLayer::new(HEATMAP_LAYER, heatmap_features(&members)));
        }
        if self.config.include_clusters {
            layers.push(TileLayer::new(
                CLUSTERS_LAYER,
                cluster_features(&members, cluster_radius(coord.z)),
            ));
        }
        Tile { coord, layers }
    }
}

impl Default for TileGenerator {
    fn default() -> Self {
        Self::new(TileConfig::default())
    }
}

/// Project a position into clamped tile-local coordinates.
pub fn to_tile_local(coord: TileCoord, lng: f64, lat: f64) -> [i32; 2] {
    let (fx, fy) = lon_lat_to_fraction(lng, lat, coord.z);
    let lx = ((fx - coord.x as f64) * EXTENT as f64).floor();
    let ly = ((fy - coord.y as f64) * EXTENT as f64).floor();
    [clamp_local(lx), clamp_local(ly)]
}

fn clamp_local(v: f64) -> i32 {
    if v.is_nan() {
        return 0;
    }
    v.clamp(0.0, (EXTENT - 1) as f64) as i32
}

fn point_features(members: &[(usize, &GeoPoint, [i32; 2])]) -> Vec<TileFeature> {
    members
        .iter()
        .map(|(idx, p, local)| {
            let mut properties = BTreeMap::new();
            properties.insert("value".into(), json!(p.value));
            if let Some(id) = &p.id {
                properties.insert("sourceId".into(), json!(id));
            }
            if let Some(w) = p.weight {
                properties.insert("weight".into(), json!(w));
            }
            if let Some(c) = &p.category {
                properties.insert("category".into(), json!(c));
            }
            if let Some(u) = &p.urgency {
                properties.insert("urgency".into(), json!(u));
            }
            TileFeature {
                id: *idx as u64,
                geometry: Geometry::Point(*local),
                properties,
            }
        })
        .collect()
}

fn heatmap_features(members: &[(usize, &GeoPoint, [i32; 2])]) -> Vec<TileFeature> {
    let cell = EXTENT / HEATMAP_GRID;
    let mut counts: BTreeMap<(i32, i32), u32> = BTreeMap::new();
    for (_, _, [x, y]) in members {
        *counts.entry((y / cell, x / cell)).or_default() += 1;
    }
    let max = counts.values().copied().max().unwrap_or(0).max(1) as f64;

    counts
        .into_iter()
        .map(|((gy, gx), count)| {
            let x0 = gx * cell;
            let y0 = gy * cell;
            let x1 = ((gx + 1) * cell).min(EXTENT - 1);
            let y1 = ((gy + 1) * cell).min(EXTENT - 1);
            let ring = vec![[x0, y0], [x1, y0], [x1, y1], [x0, y1], [x0, y0]];
            let mut properties = BTreeMap::new();
            properties.insert("density".into(), json!(count));
            properties.insert("intensity".into(), json!(count as f64 / max));
            TileFeature {
                id: (gy * HEATMAP_GRID + gx) as u64,
                geometry: Geometry::Polygon(vec![ring]),
                properties,
            }
        })
        .collect()
}

fn cluster_features(members: &[(usize, &GeoPoint, [i32; 2])], radius: f64) -> Vec<TileFeature> {
    let radius_sq = radius * radius;
    let mut assigned = vec![false; members.len()];
    let mut features = Vec::new();

    for seed in 0..members.len() {
        if assigned[seed] {
            continue;
        }
        assigned[seed] = true;
        let [sx, sy] = members[seed].2;
        let mut group = vec![seed];
        for (other, slot) in assigned.iter_mut().enumerate().skip(seed + 1) {
            if *slot {
                continue;
            }
            let [ox, oy] = members[other].2;
            let (dx, dy) = ((ox - sx) as f64, (oy - sy) as f64);
            if dx * dx + dy * dy <= radius_sq {
                *slot = true;
                group.push(other);
            }
        }

        let count = group.len();
        let (mut cx, mut cy, mut total) = (0.0, 0.0, 0.0);
        for &i in &group {
            let (_, p, [x, y]) = members[i];
            cx += x as f64;
            cy += y as f64;
            total += p.value;
        }
        let center = [
            clamp_local((cx / count as f64).round()),
            clamp_local((cy / count as f64).round()),
        ];

        let mut properties = BTreeMap::new();
        properties.insert("count".into(), json!(count));
        properties.insert("averageValue".into(), json!(total / count as f64));
        properties.insert("isCluster".into(), json!(count > 1));
        features.push(TileFeature {
            id: members[seed].0 as u64,
            geometry: Geometry::Point(center),
            properties,
        });
    }
    features
}
