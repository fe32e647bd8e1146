//! Lazy pool of channels to one fixed target.
//!
//! While the pool is below capacity every `acquire` dials a new channel.
//! Once full, channels are handed out round-robin in creation order.
//! Nothing is closed individually; `close` detaches the whole list under
//! the lock and closes it outside.

use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::dial::Transport;
use crate::error::ConnResult;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Produces a new channel for the pool.
pub type ChannelFactory<T> = Box<dyn Fn() -> BoxFuture<ConnResult<T>> + Send + Sync>;

struct PoolState<T> {
    entries: Vec<T>,
    /// Round-robin cursor, only meaningful once the pool is full.
    next: usize,
}

/// A bounded, lazily growing pool of interchangeable channels.
pub struct ChannelPool<T: Transport> {
    capacity: NonZeroUsize,
    factory: ChannelFactory<T>,
    state: Mutex<PoolState<T>>,
}

impl<T: Transport> ChannelPool<T> {
    /// Create an empty pool. No channel is dialed until `acquire`.
    pub fn new<F, Fut>(capacity: NonZeroUsize, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ConnResult<T>> + Send + 'static,
    {
        Self {
            capacity,
            factory: Box::new(move || Box::pin(factory())),
            state: Mutex::new(PoolState {
                entries: Vec::with_capacity(capacity.get()),
                next: 0,
            }),
        }
    }

    /// Get a channel, dialing a new one if the pool is not yet full.
    ///
    /// A failed dial is returned as-is and the pool does not grow.
    pub async fn acquire(&self) -> ConnResult<T> {
        let mut state = self.state.lock().await;

        if state.entries.len() < self.capacity.get() {
            let entry = (self.factory)().await?;
            state.entries.push(entry.clone());
            debug!(
                addr = entry.target(),
                size = state.entries.len(),
                capacity = self.capacity.get(),
                "channel pool grew"
            );
            return Ok(entry);
        }

        let entry = state.entries[state.next].clone();
        state.next = (state.next + 1) % self.capacity.get();
        Ok(entry)
    }

    /// Detach every channel from the pool and reset the cursor.
    ///
    /// The caller becomes responsible for closing the returned channels.
    pub async fn take_all(&self) -> Vec<T> {
        let mut state = self.state.lock().await;
        state.next = 0;
        std::mem::take(&mut state.entries)
    }

    /// Close every channel. Individual close failures are logged.
    pub async fn close(&self) {
        let entries = self.take_all().await;
        let count = entries.len();
        for entry in entries {
            let target = entry.target().to_string();
            if let Err(e) = entry.close() {
                warn!(addr = %target, error = %e, "failed to close pooled channel");
            }
        }
        if count > 0 {
            debug!(count, "channel pool closed");
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }
}
