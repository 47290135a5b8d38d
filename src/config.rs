//! Command line configuration for tilekeep.
//!
//! The binary exposes three subcommands, each with its own argument struct:
//!
//! - `seed` - download a rectangle of tiles into the persistent store
//! - `status` - report how many tiles the store holds
//! - `prune` - evict least recently used tiles down to a bound
//!
//! # Example
//!
//! ```ignore
//! use tilekeep::config::{Cli, Command};
//! use clap::Parser;
//!
//! match Cli::parse().into_command() {
//!     Command::Seed(config) => println!("seeding layer {}", config.layer),
//!     Command::Status(config) => println!("store at {}", config.store.display()),
//!     Command::Prune(config) => println!("pruning to {} tiles", config.keep),
//! }
//! ```
//!
//! # Environment Variables
//!
//! Common options can also be set via environment variables with the
//! `TILEKEEP_` prefix:
//!
//! - `TILEKEEP_STORE` - SQLite store path (default: tilekeep.sqlite)
//! - `TILEKEEP_MAP_FILE` - JSON map definition file (default: built-in map)
//! - `TILEKEEP_LAYER` - layer id to seed
//! - `TILEKEEP_MAX_RECORDS` - soft bound on stored tiles (default: 10000)
//! - `TILEKEEP_EVICT_CHUNK` - tiles evicted per batch (default: 25)
//! - `TILEKEEP_TIMEOUT` - per-request timeout in seconds (default: 20)
//! - `TILEKEEP_REFERER` - Referer header sent with tile requests

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::fetch::{DEFAULT_REFERER, DEFAULT_TIMEOUT};
use crate::map::{Layer, MapDefinition};
use crate::store::{StoreLimits, DEFAULT_EVICT_CHUNK, DEFAULT_MAX_RECORDS};

// =============================================================================
// Default Values
// =============================================================================

/// Default path of the SQLite tile store.
pub const DEFAULT_STORE_PATH: &str = "tilekeep.sqlite";

/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = DEFAULT_TIMEOUT.as_secs();

// =============================================================================
// CLI Arguments
// =============================================================================

/// tilekeep - an offline tile warehouse for pyramid maps.
///
/// Downloads map tiles into a bounded SQLite store so already visited
/// regions keep rendering without connectivity.
#[derive(Parser, Debug, Clone)]
#[command(name = "tilekeep")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Consume the parsed arguments and return the selected command.
    pub fn into_command(self) -> Command {
        self.command
    }
}

/// The available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Download a rectangle of tiles into the persistent store.
    Seed(SeedConfig),

    /// Report how many tiles the persistent store holds.
    Status(StatusConfig),

    /// Evict least recently used tiles until the store fits a bound.
    Prune(PruneConfig),
}

// =============================================================================
// Seed Command
// =============================================================================

/// Configuration for the `seed` command.
#[derive(Args, Debug, Clone)]
pub struct SeedConfig {
    /// Path of the SQLite tile store.
    #[arg(long, default_value = DEFAULT_STORE_PATH, env = "TILEKEEP_STORE")]
    pub store: PathBuf,

    /// JSON map definition file.
    ///
    /// If not specified, the built-in Swisstopo map is used.
    #[arg(long, env = "TILEKEEP_MAP_FILE")]
    pub map_file: Option<PathBuf>,

    /// Layer to seed, by id (e.g. CH18).
    #[arg(long, env = "TILEKEEP_LAYER")]
    pub layer: String,

    /// First tile column of the region. Defaults to the layer's left edge.
    #[arg(long)]
    pub min_x: Option<u32>,

    /// Last tile column of the region. Defaults to the layer's right edge.
    #[arg(long)]
    pub max_x: Option<u32>,

    /// First tile row of the region. Defaults to the layer's top edge.
    #[arg(long)]
    pub min_y: Option<u32>,

    /// Last tile row of the region. Defaults to the layer's bottom edge.
    #[arg(long)]
    pub max_y: Option<u32>,

    /// Soft bound on the number of stored tiles.
    #[arg(long, default_value_t = DEFAULT_MAX_RECORDS, env = "TILEKEEP_MAX_RECORDS")]
    pub max_records: u64,

    /// Number of tiles evicted per batch when the store is over its bound.
    #[arg(long, default_value_t = DEFAULT_EVICT_CHUNK, env = "TILEKEEP_EVICT_CHUNK")]
    pub evict_chunk: u32,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, env = "TILEKEEP_TIMEOUT")]
    pub timeout: u64,

    /// Referer header sent with tile requests.
    ///
    /// Some tile servers only answer requests that carry one.
    #[arg(long, default_value = DEFAULT_REFERER, env = "TILEKEEP_REFERER")]
    pub referer: String,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl SeedConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.store.as_os_str().is_empty() {
            return Err("store path is required. Set --store or TILEKEEP_STORE".to_string());
        }

        if self.layer.is_empty() {
            return Err("layer id is required. Set --layer or TILEKEEP_LAYER".to_string());
        }

        if let (Some(min), Some(max)) = (self.min_x, self.max_x) {
            if min > max {
                return Err("min_x must not exceed max_x".to_string());
            }
        }
        if let (Some(min), Some(max)) = (self.min_y, self.max_y) {
            if min > max {
                return Err("min_y must not exceed max_y".to_string());
            }
        }

        if self.max_records == 0 {
            return Err("max_records must be greater than 0".to_string());
        }
        if self.evict_chunk == 0 {
            return Err("evict_chunk must be greater than 0".to_string());
        }
        if self.timeout == 0 {
            return Err("timeout must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Load the map definition from `--map-file`, or the built-in map.
    pub fn load_map_definition(&self) -> Result<MapDefinition, String> {
        match &self.map_file {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .map_err(|e| format!("cannot read map file {}: {}", path.display(), e))?;
                serde_json::from_str(&raw)
                    .map_err(|e| format!("cannot parse map file {}: {}", path.display(), e))
            }
            None => Ok(MapDefinition::swisstopo()),
        }
    }

    /// Resolve the seed region for `layer`, clamped to its tile grid.
    ///
    /// Bounds that were not given default to the layer's edges.
    pub fn region(&self, layer: &Layer) -> (u32, u32, u32, u32) {
        let right = layer.tiles_x() - 1;
        let bottom = layer.tiles_y() - 1;
        let min_x = self.min_x.unwrap_or(0).min(right);
        let max_x = self.max_x.unwrap_or(right).min(right);
        let min_y = self.min_y.unwrap_or(0).min(bottom);
        let max_y = self.max_y.unwrap_or(bottom).min(bottom);
        (min_x, max_x, min_y, max_y)
    }

    /// Store limits assembled from the arguments.
    pub fn limits(&self) -> StoreLimits {
        StoreLimits {
            max_records: self.max_records,
            evict_chunk: self.evict_chunk,
        }
    }

    /// Per-request timeout as a [`Duration`].
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

// =============================================================================
// Status Command
// =============================================================================

/// Configuration for the `status` command.
#[derive(Args, Debug, Clone)]
pub struct StatusConfig {
    /// Path of the SQLite tile store.
    #[arg(long, default_value = DEFAULT_STORE_PATH, env = "TILEKEEP_STORE")]
    pub store: PathBuf,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl StatusConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.store.as_os_str().is_empty() {
            return Err("store path is required. Set --store or TILEKEEP_STORE".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Prune Command
// =============================================================================

/// Configuration for the `prune` command.
#[derive(Args, Debug, Clone)]
pub struct PruneConfig {
    /// Path of the SQLite tile store.
    #[arg(long, default_value = DEFAULT_STORE_PATH, env = "TILEKEEP_STORE")]
    pub store: PathBuf,

    /// Number of tiles to keep.
    #[arg(long, default_value_t = DEFAULT_MAX_RECORDS, env = "TILEKEEP_MAX_RECORDS")]
    pub keep: u64,

    /// Number of tiles deleted per batch.
    #[arg(long, default_value_t = DEFAULT_EVICT_CHUNK, env = "TILEKEEP_EVICT_CHUNK")]
    pub chunk: u32,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl PruneConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.store.as_os_str().is_empty() {
            return Err("store path is required. Set --store or TILEKEEP_STORE".to_string());
        }
        if self.chunk == 0 {
            return Err("chunk must be greater than 0".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
