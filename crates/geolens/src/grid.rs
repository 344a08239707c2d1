//! Hexagonal spatial aggregation over H3 cells.
//!
//! Points are binned into cells at a resolution derived from the viewport
//! (or supplied by the caller), per-cell statistics are folded in a single
//! pass, and an optional Gaussian smoothing pass blends each cell with its
//! neighbours using the raw aggregates only.
//!
//! Results are memoised for [`GridConfig::cache_ttl`] keyed by bounds,
//! resolution and a signature of the point batch.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use h3o::{CellIndex, LatLng, Resolution};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::{now_millis, Bounds, GeoError, GeoPoint, GeoResult};

/// Finest supported resolution.
pub const MAX_RESOLUTION: u8 = 15;

/// Average hexagon area in km² for resolutions 0 through 15.
pub const CELL_AREA_KM2: [f64; 16] = [
    4_357_449.416,
    609_788.441_7,
    86_801.780_4,
    12_393.434_9,
    1_770.347_654,
    252.903_364_5,
    36.129_062_73,
    5.161_293_36,
    0.737_327_571_3,
    0.105_332_505_2,
    0.015_047_501_9,
    0.002_149_643_151,
    0.000_307_091_966_7,
    0.000_043_870_272_09,
    0.000_006_267_181_344,
    0.000_000_895_311_593_3,
];

/// Viewport area thresholds (km²) and the resolution used above each.
/// Ordered from largest to smallest area.
const AREA_STEPS: [(f64, u8); 8] = [
    (5_000_000.0, 2),
    (500_000.0, 3),
    (50_000.0, 4),
    (5_000.0, 5),
    (500.0, 6),
    (50.0, 7),
    (1.0, 8),
    (0.1, 9),
];

/// Resolution used for viewports smaller than every step.
const FINEST_AUTO_RESOLUTION: u8 = 10;

const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_MAX_CELLS: usize = 10_000;

/// Average cell area for a resolution.
pub fn cell_area_km2(resolution: u8) -> f64 {
    CELL_AREA_KM2[resolution.min(MAX_RESOLUTION) as usize]
}

/// Pick a resolution for a viewport. Larger areas get coarser cells.
pub fn resolution_for_bounds(bounds: &Bounds) -> u8 {
    let area = bounds.area_km2();
    AREA_STEPS
        .iter()
        .find(|(threshold, _)| area >= *threshold)
        .map(|(_, res)| *res)
        .unwrap_or(FINEST_AUTO_RESOLUTION)
}

/// Tuning knobs for the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Cells with fewer points are dropped from the result.
    pub min_count: u64,
    /// Upper bound on emitted cells; the first-filled cells are kept.
    pub max_cells: usize,
    /// Blend each cell with its neighbours.
    pub smoothing: bool,
    /// Ring radius (in grid steps) considered while smoothing.
    pub smoothing_radius: u32,
    /// How long an identical aggregation is served from memory.
    #[serde(with = "duration_secs")]
    pub cache_ttl: Duration,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            min_count: 1,
            max_cells: DEFAULT_MAX_CELLS,
            smoothing: false,
            smoothing_radius: 1,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
        }
    }
}

/// Per-cell descriptive statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellMetadata {
    pub min_value: f64,
    pub max_value: f64,
    pub average_value: f64,
    pub categories: BTreeMap<String, u64>,
    pub urgency: BTreeMap<String, u64>,
    pub last_updated: i64,
}

/// One hexagonal bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HexCell {
    /// H3 index in its canonical hex string form.
    pub id: String,
    pub resolution: u8,
    /// (lat, lng) of the cell center.
    pub center: (f64, f64),
    /// (lat, lng) ring of the cell boundary.
    pub boundary: Vec<(f64, f64)>,
    pub count: u64,
    pub value: f64,
    pub weight: f64,
    /// Neighbour-blended average value, present when smoothing ran.
    pub smoothed_value: Option<f64>,
    pub metadata: CellMetadata,
}

impl HexCell {
    fn new(index: CellIndex, point: &GeoPoint, now: i64) -> Self {
        let center = LatLng::from(index);
        let boundary = index
            .boundary()
            .iter()
            .map(|ll| (ll.lat(), ll.lng()))
            .collect();
        let mut cell = Self {
            id: index.to_string(),
            resolution: u8::from(index.resolution()),
            center: (center.lat(), center.lng()),
            boundary,
            count: 0,
            value: 0.0,
            weight: 0.0,
            smoothed_value: None,
            metadata: CellMetadata {
                min_value: point.value,
                max_value: point.value,
                average_value: 0.0,
                categories: BTreeMap::new(),
                urgency: BTreeMap::new(),
                last_updated: now,
            },
        };
        cell.fold(point, now);
        cell
    }

    fn fold(&mut self, point: &GeoPoint, now: i64) {
        self.count += 1;
        self.value += point.value;
        self.weight += point.effective_weight();
        self.metadata.min_value = self.metadata.min_value.min(point.value);
        self.metadata.max_value = self.metadata.max_value.max(point.value);
        if let Some(category) = &point.category {
            *self.metadata.categories.entry(category.clone()).or_default() += 1;
        }
        if let Some(urgency) = &point.urgency {
            *self.metadata.urgency.entry(urgency.clone()).or_default() += 1;
        }
        self.metadata.last_updated = now;
    }

    /// Points per km², always derived from the current count.
    pub fn density(&self) -> f64 {
        self.count as f64 / cell_area_km2(self.resolution)
    }

    /// Mean value of the folded points.
    pub fn average_value(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.value / self.count as f64
        }
    }
}

/// Summary numbers for a finished aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridStats {
    pub cell_count: usize,
    pub total_points: usize,
    pub skipped_points: usize,
    pub max_density: f64,
    pub max_count: u64,
}

/// Output of one aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridResult {
    pub resolution: u8,
    pub bounds: Bounds,
    pub cells: Vec<HexCell>,
    /// Points folded into some cell (before count filtering).
    pub total_points: usize,
    /// Points rejected for non-finite coordinates.
    pub skipped_points: usize,
    pub generated_at: i64,
}

impl GridResult {
    pub fn stats(&self) -> GridStats {
        GridStats {
            cell_count: self.cells.len(),
            total_points: self.total_points,
            skipped_points: self.skipped_points,
            max_density: self.cells.iter().map(HexCell::density).fold(0.0, f64::max),
            max_count: self.cells.iter().map(|c| c.count).max().unwrap_or(0),
        }
    }

    /// Render the cells as a GeoJSON FeatureCollection of polygons.
    pub fn to_geojson(&self) -> Value {
        let features: Vec<Value> = self
            .cells
            .iter()
            .map(|cell| {
                let mut ring: Vec<[f64; 2]> =
                    cell.boundary.iter().map(|(lat, lng)| [*lng, *lat]).collect();
                if let Some(first) = ring.first().copied() {
                    ring.push(first);
                }
                json!({
                    "type": "Feature",
                    "id": cell.id,
                    "geometry": { "type": "Polygon", "coordinates": [ring] },
                    "properties": {
                        "count": cell.count,
                        "value": cell.value,
                        "weight": cell.weight,
                        "density": cell.density(),
                        "averageValue": cell.metadata.average_value,
                        "minValue": cell.metadata.min_value,
                        "maxValue": cell.metadata.max_value,
                        "smoothedValue": cell.smoothed_value,
                        "categories": cell.metadata.categories,
                        "urgency": cell.metadata.urgency,
                    }
                })
            })
            .collect();
        json!({ "type": "FeatureCollection", "features": features })
    }
}

struct CachedResult {
    created: Instant,
    result: Arc<GridResult>,
}

/// Bins point batches into H3 cells.
pub struct GridAggregator {
    config: GridConfig,
    cache: HashMap<String, CachedResult>,
}

impl GridAggregator {
    pub fn new(config: GridConfig) -> Self {
        Self {
            config,
            cache: HashMap::new(),
        }
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Aggregate `points` for the viewport `bounds`.
    ///
    /// When `resolution` is `None` it is derived from the viewport area.
    /// Identical inputs within the cache TTL return the same `Arc`.
    pub fn aggregate(
        &mut self,
        points: &[GeoPoint],
        bounds: &Bounds,
        resolution: Option<u8>,
    ) -> GeoResult<Arc<GridResult>> {
        bounds.validate()?;
        let resolution = match resolution {
            Some(r) if r > MAX_RESOLUTION => return Err(GeoError::InvalidResolution(r)),
            Some(r) => r,
            None => resolution_for_bounds(bounds),
        };

        let key = cache_key(points, bounds, resolution);
        if let Some(hit) = self.cache.get(&key) {
            if hit.created.elapsed() < self.config.cache_ttl {
                tracing::debug!("grid cache hit: res={resolution} points={}", points.len());
                return Ok(Arc::clone(&hit.result));
            }
        }

        let result = Arc::new(self.compute(points, bounds, resolution)?);
        let ttl = self.config.cache_ttl;
        self.cache.retain(|_, entry| entry.created.elapsed() < ttl);
        self.cache.insert(
            key,
            CachedResult {
                created: Instant::now(),
                result: Arc::clone(&result),
            },
        );
        Ok(result)
    }

    /// Drop every memoised result.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn cached_results(&self) -> usize {
        self.cache.len()
    }

    fn compute(&self, points: &[GeoPoint], bounds: &Bounds, resolution: u8) -> GeoResult<GridResult> {
        let res = Resolution::try_from(resolution)
            .map_err(|_| GeoError::InvalidResolution(resolution))?;
        let now = now_millis();

        let mut cells: IndexMap<CellIndex, HexCell> = IndexMap::new();
        let mut skipped = 0usize;
        let mut folded = 0usize;

        for point in points {
            let Some(latlng) = point
                .is_finite()
                .then(|| LatLng::new(point.lat, point.lng).ok())
                .flatten()
            else {
                skipped += 1;
                continue;
            };
            let index = latlng.to_cell(res);
            match cells.get_mut(&index) {
                Some(cell) => cell.fold(point, now),
                None => {
                    cells.insert(index, HexCell::new(index, point, now));
                }
            }
            folded += 1;
        }

        for cell in cells.values_mut() {
            cell.metadata.average_value = cell.average_value();
        }

        if self.config.smoothing && self.config.smoothing_radius > 0 {
            let smoothed = smooth(&cells, self.config.smoothing_radius);
            for (index, value) in smoothed {
                if let Some(cell) = cells.get_mut(&index) {
                    cell.smoothed_value = Some(value);
                }
            }
        }

        let cells: Vec<HexCell> = cells
            .into_values()
            .filter(|cell| cell.count >= self.config.min_count)
            .take(self.config.max_cells)
            .collect();

        if skipped > 0 {
            tracing::debug!("grid aggregation skipped {skipped} malformed point(s)");
        }
        tracing::debug!(
            "grid aggregation: res={resolution} points={folded} cells={}",
            cells.len()
        );

        Ok(GridResult {
            resolution,
            bounds: *bounds,
            cells,
            total_points: folded,
            skipped_points: skipped,
            generated_at: now,
        })
    }
}

impl Default for GridAggregator {
    fn default() -> Self {
        Self::new(GridConfig::default())
    }
}

/// Gaussian-weighted neighbour average over the raw per-cell averages.
fn smooth(cells: &IndexMap<CellIndex, HexCell>, radius: u32) -> Vec<(CellIndex, f64)> {
    let sigma = (radius as f64 / 2.0).max(0.5);
    let two_sigma_sq = 2.0 * sigma * sigma;

    cells
        .keys()
        .map(|&index| {
            let disk: Vec<CellIndex> = index.grid_disk(radius);
            let (sum, norm) = disk
                .into_iter()
                .filter_map(|neighbor| {
                    let cell = cells.get(&neighbor)?;
                    let distance = index.grid_distance(neighbor).unwrap_or(radius as i32) as f64;
                    let weight = (-(distance * distance) / two_sigma_sq).exp();
                    Some((cell.metadata.average_value * weight, weight))
                })
                .fold((0.0, 0.0), |(s, n), (v, w)| (s + v, n + w));
            let value = if norm > 0.0 {
                sum / norm
            } else {
                cells[&index].metadata.average_value
            };
            (index, value)
        })
        .collect()
}

fn cache_key(points: &[GeoPoint], bounds: &Bounds, resolution: u8) -> String {
    let mut hasher = DefaultHasher::new();
    for p in points {
        p.lat.to_bits().hash(&mut hasher);
        p.lng.to_bits().hash(&mut hasher);
        p.value.to_bits().hash(&mut hasher);
        p.weight.map(f64::to_bits).hash(&mut hasher);
        p.category.hash(&mut hasher);
        p.urgency.hash(&mut hasher);
    }
    format!(
        "{:.6}:{:.6}:{:.6}:{:.6}:{}:{}:{:016x}",
        bounds.north,
        bounds.south,
        bounds.east,
        bounds.west,
        resolution,
        points.len(),
        hasher.finish()
    )
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
