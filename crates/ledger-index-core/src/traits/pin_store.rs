// # Pin Store Trait
//
// Durable storage for pin expiries: one map from content identifier to the
// absolute epoch second at which it may be unpinned.
//
// The whole table is read at the start of a retention cycle and the whole
// table is written back at the end. There is no journal.

use crate::publish::ContentId;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Content identifier -> expiry (epoch seconds)
pub type PinTable = BTreeMap<ContentId, i64>;

/// Trait for pin state implementations
#[async_trait]
pub trait PinStore: Send + Sync {
    /// Load the persisted table.
    ///
    /// A missing or unreadable table is not an error: implementations log it
    /// and return an empty table.
    async fn load_or_default(&self) -> PinTable;

    /// Replace the persisted table with `table`
    async fn save(&self, table: &PinTable) -> crate::Result<()>;
}
