//! In-memory store implementation

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::{
    validate_name, Entries, MetadataStore, StoreGetFuture, StoreListFuture, StoreOpFuture,
};

/// In-memory store
///
/// Holds entries for the lifetime of the value only. Selecting this store
/// is what disables persistence: no operation touches the filesystem.
///
/// Thread-safe and suitable for use across async tasks.
///
/// # Example
///
/// ```
/// use sigstore_cache::{InMemoryStore, MetadataStore};
///
/// # async fn example() -> Result<(), sigstore_cache::Error> {
/// let store = InMemoryStore::new();
///
/// store.put("timestamp.json", b"{}").await?;
/// assert!(store.get("timestamp.json").await?.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<RwLock<Entries>>,
}

impl InMemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `entries`
    pub fn with_entries(entries: Entries) -> Self {
        Self {
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// Get the number of entries in the store
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl MetadataStore for InMemoryStore {
    fn get(&self, name: &str) -> StoreGetFuture<'_> {
        let name = name.to_string();
        Box::pin(async move {
            validate_name(&name)?;
            Ok(self.entries.read().await.get(&name).cloned())
        })
    }

    fn put(&self, name: &str, value: &[u8]) -> StoreOpFuture<'_> {
        let name = name.to_string();
        let value = value.to_vec();
        Box::pin(async move {
            validate_name(&name)?;
            self.entries.write().await.insert(name, value);
            Ok(())
        })
    }

    fn list(&self) -> StoreListFuture<'_> {
        Box::pin(async move { Ok(self.entries.read().await.keys().cloned().collect()) })
    }

    fn commit(&self, entries: Entries) -> StoreOpFuture<'_> {
        Box::pin(async move {
            for name in entries.keys() {
                validate_name(name)?;
            }
            *self.entries.write().await = entries;
            Ok(())
        })
    }

    fn is_persistent(&self) -> bool {
        false
    }
}
