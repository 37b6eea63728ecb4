// # ledger-index-core
//
// Core library for the ledger-to-IPFS service-discovery indexer.
//
// ## Architecture Overview
//
// - **LedgerTransport**: Trait for the persistent connection to a ledger node
// - **LedgerClient**: Per-index pagination state machine assembling account-state snapshots
// - **ServiceTable**: Classifies account domain fields into service buckets
// - **SnapshotPublisher**: Hashes, uploads and names the records directory
// - **RetentionManager**: Time-based unpinning of previously published roots
// - **IndexerEngine**: Drives the above on timers and completion signals
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Protocol, classification and publication are independent
// 2. **Event-Driven**: Responses arrive on a stream; completion is signalled on a channel
// 3. **Single Owner**: Mutable state lives in one component each, no shared locks
// 4. **Library-First**: The daemon only loads configuration and wires implementations

pub mod traits;
pub mod classifier;
pub mod ledger;
pub mod publish;
pub mod retention;
pub mod engine;
pub mod config;
pub mod error;
pub mod state;

// Re-export core types for convenience
pub use traits::{ContentStore, LedgerTransport, PinStore};
pub use classifier::{DiscoveredRecord, ServiceTable};
pub use ledger::{IndexReady, LedgerClient, SnapshotWriter};
pub use publish::{ContentId, SnapshotPublisher, content_id_of};
pub use retention::RetentionManager;
pub use engine::{EngineEvent, IndexerEngine};
pub use config::{IndexerConfig, IndexingConfig, IpfsNodeConfig, RippledConfig};
pub use error::{Error, Result};
pub use state::{FilePinStore, MemoryPinStore};
