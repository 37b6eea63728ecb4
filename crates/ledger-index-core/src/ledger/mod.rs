//! Ledger node protocol
//!
//! - [`protocol`]: request builders and response routing
//! - [`client`]: connection state and per-index snapshot assembly
//! - [`writer`]: per-index snapshot files on disk

pub mod client;
pub mod protocol;
pub mod writer;

pub use client::{FetchOutcome, IndexReady, LedgerClient};
pub use protocol::{LedgerHeader, LedgerIndex, LedgerRequest, LedgerResponse};
pub use writer::{HEADER_FILE, SnapshotWriter};
