//! Core traits for the ledger indexer
//!
//! This module defines the abstract interfaces the indexer is built around.
//!
//! - [`LedgerTransport`]: Persistent connection to a ledger node
//! - [`ContentStore`]: Content-addressed store with mutable names and pins
//! - [`PinStore`]: Durable pin-expiry state for retention

pub mod ledger_transport;
pub mod content_store;
pub mod pin_store;

pub use ledger_transport::{LedgerConnection, LedgerSink, LedgerTransport, MessageStream};
pub use content_store::{
    AddedContent, ContentStore, KeyInfo, KeySpec, NameOptions, PinInfo, PinKind, PublishedName,
};
pub use pin_store::{PinStore, PinTable};
