// # Ledger Transport Trait
//
// Defines the interface for the single persistent, bidirectional connection
// to a ledger node.
//
// ## Implementations
//
// - WebSocket to rippled: `ledger-index-rippled` crate
// - Tests: scripted/recording doubles in `tests/common`
//
// ## Usage
//
// ```rust,ignore
// use ledger_index_core::traits::LedgerTransport;
// use tokio_stream::StreamExt;
//
// let LedgerConnection { mut sink, mut messages } = transport.connect().await?;
// sink.send(r#"{"id":"closed","command":"ledger","ledger_index":"closed"}"#.into()).await?;
// while let Some(frame) = messages.next().await {
//     println!("{}", frame?);
// }
// ```

use async_trait::async_trait;
use std::pin::Pin;
use tokio_stream::Stream;

/// Stream of inbound text frames. Ends when the connection closes.
pub type MessageStream = Pin<Box<dyn Stream<Item = crate::Result<String>> + Send + 'static>>;

/// Write half of a ledger connection
#[async_trait]
pub trait LedgerSink: Send {
    /// Send one JSON request as a text frame
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Frame handed to the connection
    /// - `Err(Error::Transport)`: Connection is gone
    async fn send(&mut self, text: String) -> crate::Result<()>;
}

/// An established connection, split into its two halves
pub struct LedgerConnection {
    /// Outbound requests
    pub sink: Box<dyn LedgerSink>,
    /// Inbound responses, in arrival order
    pub messages: MessageStream,
}

/// Trait for ledger transport implementations
///
/// A transport only moves frames. It does not parse responses, retry, or
/// decide what to request; that belongs to `LedgerClient` and `IndexerEngine`.
#[async_trait]
pub trait LedgerTransport: Send + Sync {
    /// Open a new connection to the node
    ///
    /// # Returns
    ///
    /// - `Ok(LedgerConnection)`: Connected
    /// - `Err(Error::Transport)`: Connection refused or handshake failed
    async fn connect(&self) -> crate::Result<LedgerConnection>;

    /// Human-readable endpoint, for logs
    fn endpoint(&self) -> &str;
}
