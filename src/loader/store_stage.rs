use std::sync::Arc;

use tracing::{debug, warn};

use crate::loader::PipelineShared;
use crate::tile::{now_millis, LoadKind};

/// Store stage worker: first stop for every load order.
///
/// Hits resolve the tile immediately; misses, unreadable records and store
/// errors hand the order to the network stage. A hit whose timestamp is older
/// than the staleness threshold gets its `last_used` refreshed after the tile
/// has been delivered.
pub(crate) async fn run(shared: Arc<PipelineShared>) {
    debug!("store stage started");

    while let Some(tile) = shared.store_queue.pop().await {
        tile.set_loading();

        let lookup = shared.store.read(tile.id()).await;
        if tile.is_cancelled() {
            debug!(tile = %tile.id(), "discarding store result for cancelled tile");
            continue;
        }

        match lookup {
            Ok(Some(record)) => match image::load_from_memory(&record.image) {
                Ok(decoded) => {
                    let now = now_millis();
                    let stale = now.saturating_sub(record.last_used) > shared.stale_after_ms;
                    let last_used = if stale { now } else { record.last_used };

                    tile.set_ready(Arc::new(decoded), last_used);
                    shared.emit(&tile, LoadKind::LoadedFromStore);

                    if stale {
                        if let Err(error) = shared.store.update_last_used(tile.id(), now).await {
                            warn!(tile = %tile.id(), %error, "failed to refresh last_used");
                        }
                    }
                }
                Err(error) => {
                    // unreadable record, let the network stage replace it
                    warn!(tile = %tile.id(), %error, "stored tile does not decode");
                    shared.forward_to_network(tile);
                }
            },
            Ok(None) => {
                debug!(tile = %tile.id(), "store miss");
                shared.forward_to_network(tile);
            }
            Err(error) => {
                warn!(tile = %tile.id(), %error, "store read failed");
                shared.forward_to_network(tile);
            }
        }
    }

    debug!("store stage stopped");
}
