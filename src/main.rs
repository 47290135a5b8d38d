//! tilekeep - an offline tile warehouse for pyramid maps.
//!
//! This binary seeds, inspects and prunes the persistent tile store.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tilekeep::{
    cache::LoadHandler,
    config::{Cli, Command, PruneConfig, SeedConfig, StatusConfig},
    error::StoreError,
    fetch::{HttpTileFetcher, TileFetcher},
    loader::{LoaderOptions, TileLoader},
    map::Map,
    store::{SqliteTileStore, TileStore},
    tile::{LoadKind, Priority, Tile},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Seed(config) => run_seed(config).await,
        Command::Status(config) => run_status(config).await,
        Command::Prune(config) => run_prune(config).await,
    }
}

// =============================================================================
// Seed Command
// =============================================================================

/// Progress is reported every this many completed tiles.
const PROGRESS_EVERY: u64 = 250;

async fn run_seed(config: SeedConfig) -> ExitCode {
    // Initialize logging
    init_logging(config.verbose);

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    // Resolve the map and the layer to seed
    let definition = match config.load_map_definition() {
        Ok(definition) => definition,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let map = match Map::from_definition(&definition) {
        Ok(map) => map,
        Err(e) => {
            error!("Invalid map definition: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let layer = match map.layer_by_id(&config.layer) {
        Some(layer) => Arc::clone(layer),
        None => {
            let available: Vec<&str> = map.layers().iter().map(|layer| layer.id()).collect();
            error!("Map '{}' has no layer '{}'", map.name(), config.layer);
            error!("Available layers: {}", available.join(", "));
            return ExitCode::FAILURE;
        }
    };

    let (min_x, max_x, min_y, max_y) = config.region(&layer);
    let total = u64::from(max_x - min_x + 1) * u64::from(max_y - min_y + 1);

    info!("tilekeep v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Store: {}", config.store.display());
    info!("  Map: {} ({} layers)", map.name(), map.layer_count());
    info!(
        "  Layer: {} ({} x {} tiles)",
        layer.id(),
        layer.tiles_x(),
        layer.tiles_y()
    );
    info!(
        "  Region: x {}..{}, y {}..{} ({} tiles)",
        min_x, max_x, min_y, max_y, total
    );

    // Open the store and build the fetcher
    let store: Arc<dyn TileStore> = match SqliteTileStore::open(&config.store) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Cannot open store {}: {}", config.store.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let fetcher: Arc<dyn TileFetcher> =
        match HttpTileFetcher::with_options(Some(config.referer.clone()), config.fetch_timeout()) {
            Ok(fetcher) => Arc::new(fetcher),
            Err(e) => {
                error!("Cannot build HTTP client: {}", e);
                return ExitCode::FAILURE;
            }
        };

    // Start the pipeline and order the whole region at low priority
    let options = LoaderOptions {
        limits: config.limits(),
        ..LoaderOptions::default()
    };
    let (loader, mut events) = TileLoader::spawn(store, fetcher, options);
    let handle = loader.handle();

    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let tile = Arc::new(Tile::new(Arc::clone(&layer), x, y));
            handle.order_load(tile, Priority::Low);
        }
    }

    // Drain completion events; each order produces exactly one
    let mut from_store: u64 = 0;
    let mut from_network: u64 = 0;
    let mut failed: u64 = 0;
    let mut done: u64 = 0;

    while done < total {
        let event = match events.recv().await {
            Some(event) => event,
            None => {
                error!("Loader stopped after {} of {} tiles", done, total);
                return ExitCode::FAILURE;
            }
        };

        match event.kind {
            LoadKind::LoadedFromStore => from_store += 1,
            LoadKind::LoadedFromNetwork => from_network += 1,
            LoadKind::LoadFailed => {
                warn!("Failed to load {}", event.tile.id());
                failed += 1;
            }
        }

        done += 1;
        if done % PROGRESS_EVERY == 0 {
            info!("  {} / {} tiles", done, total);
        }
    }

    loader.shutdown();

    info!("");
    info!("Seeding finished:");
    info!("  Already stored: {}", from_store);
    info!("  Downloaded:     {}", from_network);
    info!("  Failed:         {}", failed);

    if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

// =============================================================================
// Status Command
// =============================================================================

async fn run_status(config: StatusConfig) -> ExitCode {
    // Initialize minimal logging for the status command
    if config.verbose {
        init_logging(true);
    }

    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    if !config.store.exists() {
        eprintln!("Error: no store at {}", config.store.display());
        return ExitCode::FAILURE;
    }

    let store = match SqliteTileStore::open(&config.store) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: cannot open store {}: {}", config.store.display(), e);
            return ExitCode::FAILURE;
        }
    };

    match store.count().await {
        Ok(count) => {
            println!("Store: {}", config.store.display());
            println!("Tiles: {}", count);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: cannot read store: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Prune Command
// =============================================================================

async fn run_prune(config: PruneConfig) -> ExitCode {
    // Initialize minimal logging for the prune command
    if config.verbose {
        init_logging(true);
    }

    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    if !config.store.exists() {
        eprintln!("Error: no store at {}", config.store.display());
        return ExitCode::FAILURE;
    }

    let store = match SqliteTileStore::open(&config.store) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: cannot open store {}: {}", config.store.display(), e);
            return ExitCode::FAILURE;
        }
    };

    match prune_store(&store, config.keep, config.chunk).await {
        Ok((kept, deleted)) => {
            println!("Store: {}", config.store.display());
            println!("Deleted: {}", deleted);
            println!("Kept: {}", kept);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: prune failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Delete least recently used tiles in batches until at most `keep` remain.
///
/// Returns the remaining and the deleted record counts.
async fn prune_store(
    store: &SqliteTileStore,
    keep: u64,
    chunk: u32,
) -> Result<(u64, u64), StoreError> {
    let mut deleted_total: u64 = 0;
    loop {
        let count = store.count().await?;
        if count <= keep {
            return Ok((count, deleted_total));
        }

        let batch = (count - keep).min(u64::from(chunk)) as u32;
        let deleted = store.delete_least_recently_used(batch).await?;
        if deleted == 0 {
            return Ok((count, deleted_total));
        }
        deleted_total += u64::from(deleted);
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "tilekeep=debug"
    } else {
        "tilekeep=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
