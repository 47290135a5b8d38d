use std::sync::Arc;

use bytes::Bytes;
use image::DynamicImage;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::loader::PipelineShared;
use crate::tile::{now_millis, LoadKind};

/// Network stage worker: last resort for orders the store could not satisfy.
///
/// Successful fetches are decoded, published, and persisted; before a fresh
/// record would push the store past its soft bound, a batch of the least
/// recently used records is evicted. A failed fetch marks the tile `Failed`
/// and writes nothing. There is no automatic retry.
pub(crate) async fn run(shared: Arc<PipelineShared>) {
    debug!("network stage started");

    while let Some(tile) = shared.net_queue.pop().await {
        let url = tile.layer().tile_url(tile.x(), tile.y());

        let outcome: Result<(DynamicImage, Bytes), FetchError> = async {
            let body = shared.fetcher.fetch(&url).await?;
            let decoded = image::load_from_memory(&body)?;
            Ok((decoded, body))
        }
        .await;

        match outcome {
            Ok((decoded, body)) => {
                let now = now_millis();
                if tile.is_cancelled() {
                    debug!(tile = %tile.id(), "discarding fetch result for cancelled tile");
                } else {
                    tile.set_ready(Arc::new(decoded), now);
                    shared.emit(&tile, LoadKind::LoadedFromNetwork);
                }

                // fetched bytes are persisted even for cancelled tiles
                if let Err(error) = shared
                    .store
                    .insert_or_update(tile.id(), now, body, shared.limits)
                    .await
                {
                    warn!(tile = %tile.id(), %error, "failed to persist tile");
                }
            }
            Err(error) => {
                debug!(tile = %tile.id(), url = %url, %error, "tile fetch failed");
                if !tile.is_cancelled() {
                    tile.set_failed();
                    shared.emit(&tile, LoadKind::LoadFailed);
                }
            }
        }
    }

    debug!("network stage stopped");
}
