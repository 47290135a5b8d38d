use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::tile::{Priority, Tile};

/// Work queue feeding one loader stage.
///
/// Two strict priority levels: every `High` order dequeues before any `Low`
/// order, FIFO within a level. Producers are synchronous (orders come from
/// the render path); the single consumer awaits [`OrderQueue::pop`].
///
/// Cancelled tiles are not removed from the queue; `pop` drops them at
/// dequeue time, so a tile cancelled while still queued is never processed.
pub struct OrderQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

struct QueueState {
    high: VecDeque<Arc<Tile>>,
    low: VecDeque<Arc<Tile>>,
    paused: bool,
    shutdown: bool,
}

impl QueueState {
    fn pop_next(&mut self) -> Option<Arc<Tile>> {
        self.high.pop_front().or_else(|| self.low.pop_front())
    }
}

impl OrderQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                high: VecDeque::new(),
                low: VecDeque::new(),
                paused: false,
                shutdown: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue a load order. Returns `false` after shutdown, when orders are
    /// no longer accepted.
    pub fn push(&self, tile: Arc<Tile>, priority: Priority) -> bool {
        {
            let mut state = self.lock();
            if state.shutdown {
                return false;
            }
            match priority {
                Priority::High => state.high.push_back(tile),
                Priority::Low => state.low.push_back(tile),
            }
        }
        self.notify.notify_one();
        true
    }

    /// Wait for the next order.
    ///
    /// Returns `None` once the queue has shut down. While paused, queued
    /// orders are held back until [`OrderQueue::resume`]. Tiles whose
    /// cancellation token is set are discarded without being returned.
    pub async fn pop(&self) -> Option<Arc<Tile>> {
        loop {
            {
                let mut state = self.lock();
                if state.shutdown {
                    return None;
                }
                if !state.paused {
                    while let Some(tile) = state.pop_next() {
                        if !tile.is_cancelled() {
                            return Some(tile);
                        }
                    }
                }
            }
            self.notify.notified().await;
        }
    }

    /// Hold back queued orders until resumed.
    pub fn pause(&self) {
        self.lock().paused = true;
    }

    /// Resume delivery of queued orders.
    pub fn resume(&self) {
        self.lock().paused = false;
        self.notify.notify_one();
    }

    /// Shut the queue down permanently, dropping all queued orders.
    pub fn shutdown(&self) {
        {
            let mut state = self.lock();
            state.shutdown = true;
            state.high.clear();
            state.low.clear();
        }
        self.notify.notify_one();
    }

    /// Number of queued orders, cancelled ones included.
    pub fn len(&self) -> usize {
        let state = self.lock();
        state.high.len() + state.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Producers only push and flip flags; a poisoned lock cannot leave
        // the deques in a torn state.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for OrderQueue {
    fn default() -> Self {
        Self::new()
    }
}
