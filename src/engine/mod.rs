//! The booking engine: accept-or-reject decisions over one item's reservation list.

mod conflict;
mod error;
mod mutations;
mod queries;

pub use conflict::find_overlap;
pub use error::{BookingOutcome, EngineError, Rejection};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::*;
use crate::store::{ItemStore, StoreError};

pub type ItemLock = Arc<Mutex<()>>;

/// Stateless apart from the lock table; items and reservations live in the store.
pub struct BookingEngine {
    store: Arc<dyn ItemStore>,
    /// Held across load, validate, append and save for one item.
    item_locks: DashMap<ItemId, ItemLock>,
    store_timeout: Duration,
}

impl BookingEngine {
    pub fn new(store: Arc<dyn ItemStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            item_locks: DashMap::new(),
            store_timeout,
        }
    }

    pub(super) fn item_lock(&self, id: ItemId) -> ItemLock {
        self.item_locks.entry(id).or_default().value().clone()
    }

    /// Drop the lock entry of an item that no longer exists.
    pub fn forget_item(&self, id: &ItemId) {
        self.item_locks.remove(id);
    }

    /// Run a write on its own task so it finishes once started. A write that
    /// outlives the timeout is reported as `Unconfirmed`; `held` then moves to
    /// a watcher and stays locked until the write settles.
    pub(super) async fn store_write<T, Fut>(
        &self,
        held: &mut Option<OwnedMutexGuard<()>>,
        write: Fut,
    ) -> Result<T, StoreError>
    where
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
        T: Send + 'static,
    {
        let mut task = tokio::spawn(write);
        match tokio::time::timeout(self.store_timeout, &mut task).await {
            Ok(joined) => {
                joined.map_err(|e| StoreError::Io(format!("store write task failed: {e}")))?
            }
            Err(_) => {
                tracing::error!("item store write exceeded {:?}", self.store_timeout);
                let held = held.take();
                tokio::spawn(async move {
                    match task.await {
                        Ok(Ok(_)) => tracing::warn!("unconfirmed store write landed"),
                        Ok(Err(e)) => tracing::warn!("unconfirmed store write failed: {e}"),
                        Err(e) => tracing::error!("unconfirmed store write task failed: {e}"),
                    }
                    drop(held);
                });
                Err(StoreError::Unconfirmed(self.store_timeout))
            }
        }
    }

    /// Run a store read, turning a stall past the configured timeout into an error.
    pub(super) async fn store_call<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("item store call exceeded {:?}", self.store_timeout);
                Err(StoreError::TimedOut(self.store_timeout))
            }
        }
    }

    pub(super) async fn load(&self, id: ItemId) -> Result<Item, EngineError> {
        Ok(self.store_call(self.store.load_item(id)).await?)
    }
}
