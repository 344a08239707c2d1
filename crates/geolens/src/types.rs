//! Core data types shared by the grid aggregator and the tile generator.

use serde::{Deserialize, Serialize};

/// Mean kilometres per degree of latitude.
pub const KM_PER_DEGREE: f64 = 111.32;

/// A raw observation fed in by the application (issue report, sensor reading, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoPoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urgency: Option<String>,
    /// Observation time in epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl GeoPoint {
    /// A bare point with a value and no attributes.
    pub fn new(lat: f64, lng: f64, value: f64) -> Self {
        Self {
            id: None,
            lat,
            lng,
            value,
            weight: None,
            category: None,
            urgency: None,
            timestamp: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_urgency(mut self, urgency: impl Into<String>) -> Self {
        self.urgency = Some(urgency.into());
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Whether the coordinates can be placed on the globe at all.
    pub fn is_finite(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Weight used for weighted sums; missing or non-finite weights count as 1.
    pub fn effective_weight(&self) -> f64 {
        match self.weight {
            Some(w) if w.is_finite() => w,
            _ => 1.0,
        }
    }
}

/// A geographic bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl Bounds {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Self {
        Self {
            north,
            south,
            east,
            west,
        }
    }

    /// The whole Web-Mercator world.
    pub fn world() -> Self {
        Self::new(85.051_128_78, -85.051_128_78, 180.0, -180.0)
    }

    /// Reject boxes that are inverted or not finite.
    pub fn validate(&self) -> GeoResult<()> {
        let finite = [self.north, self.south, self.east, self.west]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(GeoError::InvalidBounds("non-finite coordinate".into()));
        }
        if self.north < self.south {
            return Err(GeoError::InvalidBounds(format!(
                "north {} is below south {}",
                self.north, self.south
            )));
        }
        if self.east < self.west {
            return Err(GeoError::InvalidBounds(format!(
                "east {} is west of west {}",
                self.east, self.west
            )));
        }
        Ok(())
    }

    /// Approximate area in km² using an equirectangular projection at the
    /// box's mid latitude.
    pub fn area_km2(&self) -> f64 {
        let mid_lat = ((self.north + self.south) / 2.0).to_radians();
        let height = (self.north - self.south).abs() * KM_PER_DEGREE;
        let width = (self.east - self.west).abs() * KM_PER_DEGREE * mid_lat.cos().abs();
        height * width
    }

    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat <= self.north && lat >= self.south && lng <= self.east && lng >= self.west
    }

    /// Smallest box enclosing every finite point, or `None` for an empty set.
    pub fn enclosing(points: &[GeoPoint]) -> Option<Self> {
        let mut iter = points.iter().filter(|p| p.is_finite());
        let first = iter.next()?;
        let mut bounds = Self::new(first.lat, first.lat, first.lng, first.lng);
        for p in iter {
            bounds.north = bounds.north.max(p.lat);
            bounds.south = bounds.south.min(p.lat);
            bounds.east = bounds.east.max(p.lng);
            bounds.west = bounds.west.min(p.lng);
        }
        Some(bounds)
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Errors that can occur in the geospatial core.
#[derive(thiserror::Error, Debug)]
pub enum GeoError {
    #[error("Invalid resolution: {0} (expected 0-15)")]
    InvalidResolution(u8),

    #[error("Invalid zoom: {0}")]
    InvalidZoom(u8),

    #[error("Invalid bounds: {0}")]
    InvalidBounds(String),

    #[error("Too many tiles at zoom {zoom} (limit {limit})")]
    TooManyTiles { zoom: u8, limit: u64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience result type.
pub type GeoResult<T> = Result<T, GeoError>;
