//! Item persistence. The booking engine only talks to [`ItemStore`].

mod durable;
mod memory;

pub use durable::WalStore;
pub use memory::MemoryStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::model::{Item, ItemFilter, ItemId};

pub type SharedItem = Arc<RwLock<Item>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("item not found: {0}")]
    NotFound(ItemId),
    #[error("item already exists: {0}")]
    AlreadyExists(ItemId),
    #[error("stale write to item {id}: wrote over version {expected}, store has {found}")]
    VersionConflict { id: ItemId, expected: u64, found: u64 },
    #[error("store I/O error: {0}")]
    Io(String),
    /// A read stalled. Nothing was written.
    #[error("store call timed out after {0:?}")]
    TimedOut(Duration),
    /// A write outlived the timeout. It keeps running and may still land.
    #[error("store write unconfirmed after {0:?}, it may still complete")]
    Unconfirmed(Duration),
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn create_item(&self, item: Item) -> Result<(), StoreError>;

    async fn load_item(&self, id: ItemId) -> Result<Item, StoreError>;

    /// Atomically replace the stored item, provided `item.version` is still the
    /// stored version. Returns the stored copy carrying its new version.
    async fn save_item(&self, item: Item) -> Result<Item, StoreError>;

    async fn delete_item(&self, id: ItemId) -> Result<(), StoreError>;

    /// Matching items ordered by id.
    async fn find_items(&self, filter: &ItemFilter) -> Result<Vec<Item>, StoreError>;
}

/// Compare-and-swap check shared by the store implementations.
pub(crate) fn next_version(current: &Item, mut incoming: Item) -> Result<Item, StoreError> {
    if incoming.version != current.version {
        return Err(StoreError::VersionConflict {
            id: current.id,
            expected: incoming.version,
            found: current.version,
        });
    }
    incoming.version += 1;
    Ok(incoming)
}
