// Copyright 2026 Geolens Contributors
// SPDX-License-Identifier: Apache-2.0

//! URL-pattern cache strategies.

use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// How a fetch balances cache and network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Serve a fresh cached copy; only go to the network on a miss.
    CacheFirst,
    /// Always try the network; fall back to the cache on failure.
    NetworkFirst,
    /// Serve the cached copy immediately and refresh it in the background.
    StaleWhileRevalidate,
    NetworkOnly,
    CacheOnly,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::CacheFirst => "cache-first",
            StrategyKind::NetworkFirst => "network-first",
            StrategyKind::StaleWhileRevalidate => "stale-while-revalidate",
            StrategyKind::NetworkOnly => "network-only",
            StrategyKind::CacheOnly => "cache-only",
        }
    }

    /// Whether successful network results are written through to the cache.
    pub fn writes_through(self) -> bool {
        !matches!(self, StrategyKind::NetworkOnly)
    }
}

/// Serialized form of a strategy, as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategySpec {
    pub pattern: String,
    pub kind: StrategyKind,
    pub max_age_secs: u64,
}

/// A compiled strategy: first matching pattern wins.
#[derive(Debug, Clone)]
pub struct CacheStrategy {
    pub pattern: Regex,
    pub kind: StrategyKind,
    pub max_age: Duration,
}

impl CacheStrategy {
    pub fn new(pattern: &str, kind: StrategyKind, max_age: Duration) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            kind,
            max_age,
        })
    }

    pub fn matches(&self, url: &str) -> bool {
        self.pattern.is_match(url)
    }
}

impl TryFrom<&StrategySpec> for CacheStrategy {
    type Error = regex::Error;

    fn try_from(spec: &StrategySpec) -> Result<Self, Self::Error> {
        Self::new(
            &spec.pattern,
            spec.kind,
            Duration::from_secs(spec.max_age_secs),
        )
    }
}

/// The built-in strategy table.
pub fn default_specs() -> Vec<StrategySpec> {
    vec![
        StrategySpec {
            pattern: r"/\d+/\d+/\d+\.(png|jpg|jpeg|webp|pbf|mvt)(\?.*)?$".to_string(),
            kind: StrategyKind::CacheFirst,
            max_age_secs: 7 * 24 * 3600,
        },
        StrategySpec {
            pattern: r"/api/user".to_string(),
            kind: StrategyKind::StaleWhileRevalidate,
            max_age_secs: 3600,
        },
        StrategySpec {
            pattern: r"/api/".to_string(),
            kind: StrategyKind::NetworkFirst,
            max_age_secs: 300,
        },
    ]
}

/// Ordered strategy table.
#[derive(Debug, Clone, Default)]
pub struct StrategyTable {
    strategies: Vec<CacheStrategy>,
}

impl StrategyTable {
    pub fn new(strategies: Vec<CacheStrategy>) -> Self {
        Self { strategies }
    }

    pub fn compile(specs: &[StrategySpec]) -> Result<Self, regex::Error> {
        let strategies = specs
            .iter()
            .map(CacheStrategy::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(strategies))
    }

    /// First strategy whose pattern matches `url`.
    pub fn resolve(&self, url: &str) -> Option<&CacheStrategy> {
        self.strategies.iter().find(|s| s.matches(url))
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
