use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::model::{Item, ItemFilter, ItemId};

use super::{next_version, ItemStore, SharedItem, StoreError};

/// Volatile item table. Each item sits behind its own lock so writes to
/// different items never contend.
pub struct MemoryStore {
    items: DashMap<ItemId, SharedItem>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn shared(&self, id: &ItemId) -> Result<SharedItem, StoreError> {
        self.items
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::NotFound(*id))
    }

    /// True while `shared` is still the live entry for `id`. A writer holding
    /// the item lock uses this to detect a delete that won the race.
    pub(crate) fn is_live(&self, id: &ItemId, shared: &SharedItem) -> bool {
        self.items
            .get(id)
            .is_some_and(|e| Arc::ptr_eq(e.value(), shared))
    }

    pub(crate) fn contains(&self, id: &ItemId) -> bool {
        self.items.contains_key(id)
    }

    /// Insert or replace without any checks. Used by WAL replay.
    pub(crate) fn put(&self, item: Item) {
        self.items.insert(item.id, Arc::new(RwLock::new(item)));
    }

    pub(crate) fn try_insert(&self, item: Item) -> Result<(), StoreError> {
        match self.items.entry(item.id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(item.id)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(RwLock::new(item)));
                Ok(())
            }
        }
    }

    pub(crate) fn remove(&self, id: &ItemId) -> bool {
        self.items.remove(id).is_some()
    }

    fn all_shared(&self) -> Vec<(ItemId, SharedItem)> {
        let mut all: Vec<_> = self
            .items
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    /// Copies of every item, ordered by id.
    pub(crate) async fn snapshot(&self, filter: &ItemFilter) -> Vec<Item> {
        let mut out = Vec::new();
        for (_, shared) in self.all_shared() {
            let guard = shared.read().await;
            if filter.matches(&guard) {
                out.push(guard.clone());
            }
        }
        out
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn create_item(&self, item: Item) -> Result<(), StoreError> {
        self.try_insert(item)
    }

    async fn load_item(&self, id: ItemId) -> Result<Item, StoreError> {
        let shared = self.shared(&id)?;
        let guard = shared.read().await;
        Ok(guard.clone())
    }

    async fn save_item(&self, item: Item) -> Result<Item, StoreError> {
        let id = item.id;
        let shared = self.shared(&id)?;
        let mut guard = shared.write().await;
        if !self.is_live(&id, &shared) {
            return Err(StoreError::NotFound(id));
        }
        let next = next_version(&guard, item)?;
        *guard = next.clone();
        Ok(next)
    }

    async fn delete_item(&self, id: ItemId) -> Result<(), StoreError> {
        let shared = self.shared(&id)?;
        // Wait out an in-flight save so it either lands first or sees the delete.
        let _guard = shared.write().await;
        if !self.is_live(&id, &shared) || !self.remove(&id) {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn find_items(&self, filter: &ItemFilter) -> Result<Vec<Item>, StoreError> {
        Ok(self.snapshot(filter).await)
    }
}
