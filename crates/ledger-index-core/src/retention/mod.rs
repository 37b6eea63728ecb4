//! Pin retention
//!
//! Every published root is kept pinned for roughly five polling cycles plus a
//! fixed grace window, then unpinned on a later cycle. Expiries live in a
//! [`PinStore`] so they survive restarts. Identifiers on the allow-list are
//! never unpinned.

use crate::error::{Error, Result};
use crate::publish::ContentId;
use crate::traits::{ContentStore, PinKind, PinStore, PinTable};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Seconds added to every expiry on top of the polling-derived window
pub const GRACE_SECS: i64 = 120;

/// Number of polling cycles a root outlives its publication by
pub const RETAINED_CYCLES: u64 = 5;

/// What one retention cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Expiry recorded for the new root (epoch seconds)
    pub expiry: i64,
    /// Unpinned and dropped from the table
    pub evicted: Vec<ContentId>,
    /// Expired but allow-listed
    pub kept: Vec<ContentId>,
    /// Expired, unpin failed; retried next cycle
    pub failed: Vec<ContentId>,
}

/// Time-based eviction of previously published roots
pub struct RetentionManager {
    store: Arc<dyn ContentStore>,
    pins: Box<dyn PinStore>,
    allow_list: BTreeSet<ContentId>,
    poll_interval_ms: u64,
}

impl RetentionManager {
    /// Create a retention manager
    ///
    /// `poll_interval_ms` is the snapshot cadence; it sizes the retention window.
    pub fn new(
        store: Arc<dyn ContentStore>,
        pins: Box<dyn PinStore>,
        allow_list: impl IntoIterator<Item = ContentId>,
        poll_interval_ms: u64,
    ) -> Self {
        Self {
            store,
            pins,
            allow_list: allow_list.into_iter().collect(),
            poll_interval_ms,
        }
    }

    /// Retention window in seconds: `(poll_ms * 5) / 1000 + 120`
    pub fn ttl_secs(&self) -> i64 {
        let window = self.poll_interval_ms.saturating_mul(RETAINED_CYCLES) / 1000;
        i64::try_from(window).unwrap_or(i64::MAX - GRACE_SECS) + GRACE_SECS
    }

    /// Whether `id` is exempt from eviction
    pub fn is_allowed(&self, id: &ContentId) -> bool {
        self.allow_list.contains(id)
    }

    /// Record the expiry of `root` and evict every expired entry, as of now
    pub async fn register_and_evict(&self, root: &ContentId) -> Result<RetentionReport> {
        self.register_and_evict_at(root, Utc::now()).await
    }

    /// Record the expiry of `root` and evict every entry expired at `now`.
    ///
    /// Unpin failures are logged and the entry is kept for the next cycle.
    /// Entries the store no longer pins are dropped as evicted. The whole
    /// table is written back at the end; a failed write is returned.
    pub async fn register_and_evict_at(
        &self,
        root: &ContentId,
        now: DateTime<Utc>,
    ) -> Result<RetentionReport> {
        let now_secs = now.timestamp();
        let mut table = self.pins.load_or_default().await;

        let expiry = now_secs.saturating_add(self.ttl_secs());
        table.insert(root.clone(), expiry);
        debug!("pin {} expires at {}", root, expiry);

        let mut report = RetentionReport {
            expiry,
            ..Default::default()
        };

        let expired: Vec<ContentId> = table
            .iter()
            .filter(|(_, at)| **at <= now_secs)
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            if self.is_allowed(&id) {
                info!("pin {} expired but is on the allow-list, keeping", id);
                report.kept.push(id);
                continue;
            }

            match self.store.remove_pin(&id).await {
                Ok(()) => {
                    info!("removed pin: {}", id);
                    table.remove(&id);
                    report.evicted.push(id);
                }
                Err(Error::NotFound(_)) => {
                    debug!("pin {} already gone, forgetting it", id);
                    table.remove(&id);
                    report.evicted.push(id);
                }
                Err(e) => {
                    warn!("failed to remove pin {}: {}", id, e);
                    report.failed.push(id);
                }
            }
        }

        self.pins.save(&table).await?;
        Ok(report)
    }

    /// Unpin recursive pins the retention table does not know about.
    ///
    /// Pins that are tracked, allow-listed, or equal to `fresh_root` are left
    /// alone. Failures are logged per pin.
    ///
    /// # Returns
    ///
    /// The identifiers that were unpinned.
    pub async fn sweep_untracked(&self, fresh_root: &ContentId) -> Result<Vec<ContentId>> {
        info!("attempting to clean pin list");
        let table: PinTable = self.pins.load_or_default().await;
        let pins = self.store.list_pins().await?;

        let mut removed = Vec::new();
        for pin in pins {
            if pin.kind != PinKind::Recursive
                || &pin.id == fresh_root
                || table.contains_key(&pin.id)
                || self.is_allowed(&pin.id)
            {
                continue;
            }

            debug!("attempting to unpin: {}", pin.id);
            match self.store.remove_pin(&pin.id).await {
                Ok(()) => removed.push(pin.id),
                Err(Error::NotFound(_)) => {}
                Err(e) => warn!("failed to remove untracked pin {}: {}", pin.id, e),
            }
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for RetentionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionManager")
            .field("store", &self.store.store_name())
            .field("allow_list", &self.allow_list)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryPinStore;
    use crate::traits::{AddedContent, KeyInfo, KeySpec, NameOptions, PinInfo, PublishedName};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;

    /// Store that only records unpins
    #[derive(Default)]
    struct UnpinLog(Mutex<Vec<ContentId>>);

    #[async_trait]
    impl ContentStore for UnpinLog {
        async fn version(&self) -> Result<String> {
            Ok("test".into())
        }
        async fn add_directory(&self, _dir: &Path) -> Result<AddedContent> {
            Err(Error::publish("test", "unsupported"))
        }
        async fn publish_name(&self, _: &ContentId, _: &NameOptions) -> Result<PublishedName> {
            Err(Error::publish("test", "unsupported"))
        }
        async fn list_pins(&self) -> Result<Vec<PinInfo>> {
            Ok(Vec::new())
        }
        async fn remove_pin(&self, id: &ContentId) -> Result<()> {
            self.0.lock().unwrap().push(id.clone());
            Ok(())
        }
        async fn list_keys(&self) -> Result<Vec<KeyInfo>> {
            Ok(Vec::new())
        }
        async fn generate_key(&self, _: &str, _: &KeySpec) -> Result<KeyInfo> {
            Err(Error::publish("test", "unsupported"))
        }
        fn store_name(&self) -> &'static str {
            "test"
        }
    }

    #[test]
    fn test_ttl_from_poll_interval() {
        let manager = RetentionManager::new(
            Arc::new(UnpinLog::default()),
            Box::new(MemoryPinStore::new()),
            [],
            300_000,
        );
        assert_eq!(manager.ttl_secs(), 1620);

        let manager = RetentionManager::new(
            Arc::new(UnpinLog::default()),
            Box::new(MemoryPinStore::new()),
            [],
            999,
        );
        // integer division truncates
        assert_eq!(manager.ttl_secs(), 124);
    }

    #[tokio::test]
    async fn test_new_root_is_not_evicted_immediately() {
        let store = Arc::new(UnpinLog::default());
        let pins = MemoryPinStore::new();
        let manager = RetentionManager::new(store.clone(), Box::new(pins.clone()), [], 60_000);

        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let report = manager
            .register_and_evict_at(&ContentId::new("QmA"), now)
            .await
            .unwrap();

        assert_eq!(report.expiry, 1_700_000_000 + 300 + 120);
        assert!(report.evicted.is_empty());
        assert!(store.0.lock().unwrap().is_empty());
        assert_eq!(pins.snapshot().await.get(&ContentId::new("QmA")), Some(&report.expiry));
    }
}
