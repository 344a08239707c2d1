// Copyright 2026 Geolens Contributors
// SPDX-License-Identifier: Apache-2.0

//! `geolens`: command-line front end for the geospatial services.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use geolens::{
    tile_url, tiles_for_bounds_within, Bounds, GeoPoint, GridAggregator, TileGenerator,
};
use geolens_runtime::layers::{LayerManager, LayerManagerConfig};
use geolens_runtime::{
    GeoConfig, NewSyncTask, OfflineManager, OfflineStore, SyncOperation, SyncPriority,
};

#[derive(Parser)]
#[command(
    name = "geolens",
    about = "Geolens: hex-grid aggregation, vector tiles and offline map data",
    version
)]
struct Cli {
    /// JSON config file (also read from GEOLENS_CONFIG).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite offline store (also read from GEOLENS_DB).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate points into hexagonal cells.
    Aggregate {
        /// JSON array of points; `-` reads stdin.
        #[arg(short, long, default_value = "-")]
        input: String,
        /// Viewport as north,south,east,west (defaults to the points' extent).
        #[arg(long, value_parser = parse_bounds)]
        bounds: Option<Bounds>,
        /// Hex resolution 0-15 (derived from the viewport when omitted).
        #[arg(short, long)]
        resolution: Option<u8>,
        /// Blend cells with their neighbours.
        #[arg(long)]
        smoothing: bool,
        /// Print a GeoJSON FeatureCollection instead of summary stats.
        #[arg(long)]
        geojson: bool,
    },

    /// Generate vector tiles for a point set.
    Tiles {
        #[arg(short, long, default_value = "-")]
        input: String,
        #[arg(short, long)]
        zoom: u8,
        #[arg(long, value_parser = parse_bounds)]
        bounds: Option<Bounds>,
        /// Print complete tiles rather than per-layer feature counts.
        #[arg(long)]
        full: bool,
    },

    /// List the tiles covering a viewport.
    TileRange {
        #[arg(long, value_parser = parse_bounds)]
        bounds: Bounds,
        #[arg(short, long)]
        zoom: u8,
        /// XYZ URL template, e.g. https://{s}.tile.example.org/{z}/{x}/{y}.png
        #[arg(long)]
        template: Option<String>,
        /// Comma-separated hosts substituted for `{s}`.
        #[arg(long, value_delimiter = ',')]
        hosts: Vec<String>,
    },

    /// Inspect or clear the offline cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Manage the background sync queue.
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },

    /// Show the layer catalog.
    Layers {
        /// Only visible layers, in stacking order.
        #[arg(long)]
        visible: bool,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   geolens completions bash > ~/.local/share/bash-completion/completions/geolens
    ///   geolens completions zsh > ~/.zfunc/_geolens
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Print the cached payload for a URL.
    Get { url: String },
    /// Print cache metrics.
    Stats,
    /// Remove every cached record and queued task.
    Clear,
}

#[derive(Subcommand)]
enum SyncAction {
    /// List queued tasks in drain order.
    List,
    /// Queue a task.
    Enqueue {
        /// upload, download, update or delete.
        #[arg(long, value_parser = parse_operation)]
        op: SyncOperation,
        #[arg(long)]
        url: String,
        /// high, medium or low.
        #[arg(long, value_parser = parse_priority, default_value = "medium")]
        priority: SyncPriority,
        /// JSON body sent with the request.
        #[arg(long)]
        payload: Option<String>,
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Attempt every queued task once.
    Drain,
}

fn parse_bounds(s: &str) -> Result<Bounds, String> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("bounds must be four numbers: {e}"))?;
    let [north, south, east, west] = parts[..] else {
        return Err("bounds must be north,south,east,west".to_string());
    };
    let bounds = Bounds::new(north, south, east, west);
    bounds.validate().map_err(|e| e.to_string())?;
    Ok(bounds)
}

fn parse_operation(s: &str) -> Result<SyncOperation, String> {
    SyncOperation::parse(s).ok_or_else(|| format!("unknown operation: {s}"))
}

fn parse_priority(s: &str) -> Result<SyncPriority, String> {
    SyncPriority::parse(s).ok_or_else(|| format!("unknown priority: {s}"))
}

fn read_points(input: &str) -> Result<Vec<GeoPoint>> {
    let raw = if input == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(input).with_context(|| format!("cannot read {input}"))?
    };
    serde_json::from_str(&raw).context("input must be a JSON array of points")
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_offline(config: &GeoConfig, db: Option<&Path>) -> Result<OfflineManager> {
    let path = config.resolve_db_path(db);
    let store = OfflineStore::open(&path, config.offline.storage_quota_bytes)
        .with_context(|| format!("cannot open offline store {}", path.display()))?;
    Ok(OfflineManager::new(store, config.offline.clone())?)
}

fn init_logging(cli: &Cli) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = GeoConfig::load(cli.config.as_deref())?;
    let db = cli.db.as_deref();

    match cli.command {
        Commands::Aggregate {
            input,
            bounds,
            resolution,
            smoothing,
            geojson,
        } => {
            let points = read_points(&input)?;
            let bounds = match bounds.or_else(|| Bounds::enclosing(&points)) {
                Some(b) => b,
                None => anyhow::bail!("no valid points and no --bounds given"),
            };
            let mut grid = config.grid.clone();
            grid.smoothing |= smoothing;
            let result = GridAggregator::new(grid).aggregate(&points, &bounds, resolution)?;
            if geojson {
                print_json(&result.to_geojson())?;
            } else {
                print_json(&serde_json::json!({
                    "resolution": result.resolution,
                    "stats": result.stats(),
                }))?;
            }
        }

        Commands::Tiles {
            input,
            zoom,
            bounds,
            full,
        } => {
            let points = read_points(&input)?;
            let tiles = TileGenerator::new(config.tiles.clone()).generate(&points, zoom, bounds)?;
            if full {
                print_json(&tiles)?;
            } else {
                let summary: Vec<_> = tiles
                    .iter()
                    .map(|t| {
                        let layers: serde_json::Map<_, _> = t
                            .layers
                            .iter()
                            .map(|l| (l.name.clone(), serde_json::json!(l.features.len())))
                            .collect();
                        serde_json::json!({ "tile": t.coord.key(), "features": layers })
                    })
                    .collect();
                print_json(&summary)?;
            }
        }

        Commands::TileRange {
            bounds,
            zoom,
            template,
            hosts,
        } => {
            for coord in tiles_for_bounds_within(&bounds, zoom, config.tiles.max_tiles)? {
                match &template {
                    Some(t) => println!("{}", tile_url(t, coord, &hosts)),
                    None => println!("{}", coord.key()),
                }
            }
        }

        Commands::Cache { action } => {
            let offline = open_offline(&config, db)?;
            match action {
                CacheAction::Get { url } => match offline.get_cached(&url).await? {
                    Some(data) => match std::str::from_utf8(&data) {
                        Ok(text) => println!("{text}"),
                        Err(_) => println!("<{} bytes of binary data>", data.len()),
                    },
                    None => anyhow::bail!("no fresh cached copy of {url}"),
                },
                CacheAction::Stats => {
                    print_json(&offline.refresh_metrics().await?)?;
                }
                CacheAction::Clear => {
                    offline.clear().await?;
                    eprintln!("offline cache cleared");
                }
            }
            offline.destroy();
        }

        Commands::Sync { action } => {
            let offline = open_offline(&config, db)?;
            match action {
                SyncAction::List => print_json(&offline.pending_tasks().await?)?,
                SyncAction::Enqueue {
                    op,
                    url,
                    priority,
                    payload,
                    max_attempts,
                } => {
                    let mut task = NewSyncTask::new(op, url, priority);
                    if let Some(raw) = payload {
                        task = task
                            .with_payload(serde_json::from_str(&raw).context("invalid --payload")?);
                    }
                    if let Some(max) = max_attempts {
                        task = task.with_max_attempts(max);
                    }
                    println!("{}", offline.enqueue_sync(task).await?);
                }
                SyncAction::Drain => print_json(&offline.process_queue().await?)?,
            }
            offline.destroy();
        }

        Commands::Layers { visible } => {
            let offline = open_offline(&config, db)?;
            let layers = LayerManager::new(
                LayerManagerConfig {
                    load_default_catalog: true,
                    ..config.layers.clone()
                },
                Arc::new(offline.clone()),
            )?;
            let list = if visible {
                layers.get_visible_layers()
            } else {
                layers.layers()
            };
            print_json(&list)?;
            layers.destroy();
            offline.destroy();
        }

        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "geolens",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}
