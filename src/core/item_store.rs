//! Resident upload items, mirrored to durable storage.
//!
//! The whole map is serialized as one JSON blob under a fixed key and rewritten
//! on every mutation. Item counts are bounded by concurrently recorded entries,
//! so there is no incremental journal.

use std::collections::HashMap;
use std::sync::Arc;

use crate::adapters::{KeyValueStore, StorageError};
use crate::domain::{EntryId, ItemId, UploadItem};

/// Key the item map is persisted under
pub const UPLOAD_ITEMS_KEY: &str = "upload_items";

/// In-memory item map with explicit persistence
pub struct UploadItemStore {
    items: HashMap<ItemId, UploadItem>,
    kv: Arc<dyn KeyValueStore>,
    key: String,
}

impl UploadItemStore {
    /// Load the persisted map (empty if nothing was stored yet)
    pub async fn load(kv: Arc<dyn KeyValueStore>) -> Result<Self, StorageError> {
        Self::load_with_key(kv, UPLOAD_ITEMS_KEY).await
    }

    pub async fn load_with_key(
        kv: Arc<dyn KeyValueStore>,
        key: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let key = key.into();
        let items = match kv.get(&key).await? {
            Some(bytes) if !bytes.is_empty() => serde_json::from_slice(&bytes)?,
            _ => HashMap::new(),
        };

        Ok(Self { items, kv, key })
    }

    /// Rewrite the full map
    pub async fn persist(&self) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(&self.items)?;
        self.kv.set(&self.key, bytes).await
    }

    pub fn insert(&mut self, item: UploadItem) {
        self.items.insert(item.id, item);
    }

    pub fn remove(&mut self, id: &ItemId) -> Option<UploadItem> {
        self.items.remove(id)
    }

    pub fn get(&self, id: &ItemId) -> Option<&UploadItem> {
        self.items.get(id)
    }

    pub fn get_mut(&mut self, id: &ItemId) -> Option<&mut UploadItem> {
        self.items.get_mut(id)
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.items.contains_key(id)
    }

    /// Remove every item owned by `entry_id`
    pub fn remove_for_entry(&mut self, entry_id: EntryId) -> Vec<UploadItem> {
        let ids: Vec<ItemId> = self
            .items
            .values()
            .filter(|item| item.entry_id == entry_id)
            .map(|item| item.id)
            .collect();

        ids.iter().filter_map(|id| self.items.remove(id)).collect()
    }

    /// Resident item for an entry, if any
    pub fn find_by_entry(&self, entry_id: EntryId) -> Option<&UploadItem> {
        self.items.values().find(|item| item.entry_id == entry_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &UploadItem> {
        self.items.values()
    }

    pub fn item_ids(&self) -> Vec<ItemId> {
        self.items.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryKeyValueStore;
    use crate::domain::UploadDestination;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn item_for(entry_id: EntryId) -> UploadItem {
        UploadItem::new(
            entry_id,
            PathBuf::from(format!("/tmp/{}.m4a", entry_id)),
            UploadDestination::new(format!("https://uploads.example.com/{}", entry_id)),
        )
    }

    #[tokio::test]
    async fn test_load_empty() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
        let store = UploadItemStore::load(kv).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
        let entry_id = Uuid::new_v4();

        let mut store = UploadItemStore::load(kv.clone()).await.unwrap();
        let mut item = item_for(entry_id);
        item.attempt = 2;
        let item_id = item.id;
        store.insert(item);
        store.persist().await.unwrap();

        let reloaded = UploadItemStore::load(kv).await.unwrap();
        assert_eq!(reloaded.len(), 1);
        let item = reloaded.get(&item_id).unwrap();
        assert_eq!(item.entry_id, entry_id);
        assert_eq!(item.attempt, 2);
    }

    #[tokio::test]
    async fn test_remove_for_entry() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
        let keep = Uuid::new_v4();
        let drop = Uuid::new_v4();

        let mut store = UploadItemStore::load(kv).await.unwrap();
        store.insert(item_for(keep));
        store.insert(item_for(drop));

        let removed = store.remove_for_entry(drop);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].entry_id, drop);
        assert!(store.find_by_entry(drop).is_none());
        assert!(store.find_by_entry(keep).is_some());
    }
}
