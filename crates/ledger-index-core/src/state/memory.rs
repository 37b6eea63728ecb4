// # Memory Pin Store
//
// In-memory implementation of PinStore.
//
// Nothing survives a restart: every root published before the restart is
// forgotten and never unpinned by retention. Useful for tests and for
// embedding where the content store is itself ephemeral.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::pin_store::{PinStore, PinTable};

/// In-memory pin store
///
/// Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct MemoryPinStore {
    inner: Arc<RwLock<PinTable>>,
}

impl MemoryPinStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with `table`
    pub fn with_table(table: PinTable) -> Self {
        Self {
            inner: Arc::new(RwLock::new(table)),
        }
    }

    /// Copy of the current table
    pub async fn snapshot(&self) -> PinTable {
        self.inner.read().await.clone()
    }

    /// Number of tracked pins
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether no pins are tracked
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl PinStore for MemoryPinStore {
    async fn load_or_default(&self) -> PinTable {
        self.inner.read().await.clone()
    }

    async fn save(&self, table: &PinTable) -> Result<(), Error> {
        *self.inner.write().await = table.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::ContentId;

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryPinStore::new();
        assert!(store.is_empty().await);

        let mut table = PinTable::new();
        table.insert(ContentId::new("QmA"), 10);
        store.save(&table).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.load_or_default().await, table);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = MemoryPinStore::new();
        let other = store.clone();

        let table = PinTable::from([(ContentId::new("QmB"), 20)]);
        other.save(&table).await.unwrap();

        assert_eq!(store.snapshot().await, table);
    }
}
