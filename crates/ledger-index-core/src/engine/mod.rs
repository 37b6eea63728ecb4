//! Indexer engine
//!
//! The IndexerEngine is responsible for:
//! - Keeping the ledger connection and driving snapshot requests on a timer
//! - Pruning old index directories and writing `meta.json`
//! - Publishing the records root and running pin retention
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐   frames    ┌──────────────┐  IndexReady  ┌───────────────────┐
//! │ LedgerTransport │────────────▶│ LedgerClient │─────────────▶│ SnapshotPublisher │
//! └─────────────────┘◀────────────└──────────────┘   (mpsc)     └───────────────────┘
//!                      requests     ▲         ▲                           │
//!                                   │         │                           ▼
//!                       index-check timer   create-index timer   ┌──────────────────┐
//!                                                                │ RetentionManager │
//!                                                                └──────────────────┘
//! ```
//!
//! Two loops, joined on the caller's task: the ledger loop owns the client,
//! the publish loop owns the publisher. The only thing they share is the
//! completion channel, so no state needs a lock.
//!
//! ## Shutdown
//!
//! The ledger loop stops on the shutdown signal and drops the client. That
//! closes the completion channel; the publish loop finishes the snapshot it
//! is working on, drains what is queued, and returns.

use crate::config::IndexerConfig;
use crate::error::{Error, Result};
use crate::ledger::{IndexReady, LedgerClient, LedgerIndex};
use crate::publish::{
    ContentId, MetaEnvelope, PublishOutcome, SnapshotPublisher, hash_tree, prune_index_dirs,
};
use crate::retention::RetentionManager;
use crate::traits::{ContentStore, LedgerConnection, LedgerTransport, MessageStream, PinStore};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

/// Capacity of the engine event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the completion channel between the two loops
const READY_CHANNEL_CAPACITY: usize = 16;

/// Events emitted by the IndexerEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine started
    Started { endpoint: String },

    /// Ledger connection established
    Connected,

    /// Ledger connection lost
    Disconnected,

    /// A snapshot was assembled and written
    IndexReady { index: LedgerIndex },

    /// The records root was published for this index
    Published {
        index: LedgerIndex,
        root: ContentId,
        name: String,
        evicted: usize,
    },

    /// Publishing was skipped (store not initialized or directory missing)
    PublishSkipped { index: LedgerIndex },

    /// Publishing failed; the next completed index retries
    PublishFailed { index: LedgerIndex, error: String },

    /// Engine stopped
    Stopped { reason: String },
}

/// Ledger indexer engine
///
/// ## Lifecycle
///
/// 1. Create with [`IndexerEngine::new()`]
/// 2. Start with [`IndexerEngine::run()`]
/// 3. Engine runs until a shutdown signal is received or a fatal error occurs
pub struct IndexerEngine {
    ledger: LedgerLoop,
    publishing: PublishLoop,
    event_tx: mpsc::Sender<EngineEvent>,
}

impl IndexerEngine {
    /// Create a new indexer engine
    ///
    /// # Parameters
    ///
    /// - `transport`: Ledger node transport
    /// - `store`: Content store the records root is published to
    /// - `pins`: Durable pin-expiry state
    /// - `config`: Indexer configuration
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        transport: Box<dyn LedgerTransport>,
        store: Arc<dyn ContentStore>,
        pins: Box<dyn PinStore>,
        config: IndexerConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = mpsc::channel(READY_CHANNEL_CAPACITY);

        let client = LedgerClient::from_config(&config.indexer, ready_tx);

        let allow_list = config
            .ipfsnode
            .ignore_pins
            .iter()
            .map(|id| ContentId::new(id.as_str()));
        let retention = RetentionManager::new(
            store.clone(),
            pins,
            allow_list,
            config.indexer.create_index_ms,
        );
        let publisher = SnapshotPublisher::from_config(store, &config.ipfsnode, retention);

        let engine = Self {
            ledger: LedgerLoop {
                transport,
                client,
                create_index_interval: config.indexer.create_index_interval(),
                index_check_interval: config.indexer.index_check_interval(),
                reconnect_delay: config.rippled.reconnect_delay(),
                event_tx: event_tx.clone(),
            },
            publishing: PublishLoop {
                publisher,
                ready_rx,
                records_root: config.indexer.file_path.clone(),
                remove_indexes_after: config.indexer.remove_indexes_after(),
                event_tx: event_tx.clone(),
            },
            event_tx,
        };

        Ok((engine, event_rx))
    }

    /// Run the engine until SIGINT/SIGTERM
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Clean shutdown
    /// - `Err(Error)`: Fatal error
    pub async fn run(self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Run the engine with a controlled shutdown signal
    ///
    /// **TESTING ONLY**: the daemon uses `run()`, which listens for OS signals.
    /// Dropping the sender counts as a shutdown request.
    pub async fn run_with_shutdown(self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.run_internal(shutdown_rx).await
    }

    async fn run_internal(self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        let Self {
            ledger,
            publishing,
            event_tx,
        } = self;

        emit(
            &event_tx,
            EngineEvent::Started {
                endpoint: ledger.transport.endpoint().to_string(),
            },
        );

        let shutdown = async move {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => shutdown_signal().await,
            }
        };

        let result = tokio::try_join!(ledger.run(shutdown), publishing.run());

        let reason = match &result {
            Ok(_) => "Shutdown signal".to_string(),
            Err(e) => e.to_string(),
        };
        emit(&event_tx, EngineEvent::Stopped { reason });
        info!("engine stopped");

        result.map(|_| ())
    }
}

/// Owns the ledger connection and the snapshot client
struct LedgerLoop {
    transport: Box<dyn LedgerTransport>,
    client: LedgerClient,
    create_index_interval: Duration,
    index_check_interval: Duration,
    reconnect_delay: Option<Duration>,
    event_tx: mpsc::Sender<EngineEvent>,
}

impl LedgerLoop {
    async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);

        let mut messages = self.connect().await;
        let mut reconnect_at = match messages {
            Some(_) => None,
            None => self.reconnect_deadline(),
        };

        let start = Instant::now();
        let mut index_check = interval_at(start + self.index_check_interval, self.index_check_interval);
        index_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut create_index =
            interval_at(start + self.create_index_interval, self.create_index_interval);
        create_index.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }

                frame = next_frame(&mut messages) => match frame {
                    Some(Ok(text)) => {
                        let handled = self.client.handle_message(&text).await;
                        if self.absorb(handled)? {
                            messages = None;
                            reconnect_at = self.reconnect_deadline();
                        }
                    }
                    Some(Err(e)) => {
                        warn!("ledger connection error: {}", e);
                        self.disconnected();
                        messages = None;
                        reconnect_at = self.reconnect_deadline();
                    }
                    None => {
                        self.disconnected();
                        messages = None;
                        reconnect_at = self.reconnect_deadline();
                    }
                },

                _ = index_check.tick() => {
                    if self.client.is_connected() {
                        let sent = self.client.resolve_latest_closed_index().await;
                        if self.absorb(sent)? {
                            messages = None;
                            reconnect_at = self.reconnect_deadline();
                        }
                    }
                }

                _ = create_index.tick() => {
                    if self.client.is_connected() {
                        let requested = self.create_index().await;
                        if self.absorb(requested)? {
                            messages = None;
                            reconnect_at = self.reconnect_deadline();
                        }
                    } else {
                        warn!("cannot create new index, not connected to {}", self.transport.endpoint());
                    }
                }

                _ = reconnect_timer(reconnect_at) => {
                    reconnect_at = None;
                    messages = self.connect().await;
                    if messages.is_none() {
                        reconnect_at = self.reconnect_deadline();
                    }
                }
            }
        }

        if self.client.is_connected() {
            self.client.on_disconnected();
        }
        Ok(())
    }

    /// Refresh the latest index, then request the snapshot just below the
    /// last one known.
    async fn create_index(&mut self) -> Result<()> {
        let latest = self.client.latest_index();
        self.client.resolve_latest_closed_index().await?;

        match latest.checked_sub(1) {
            Some(target) => {
                info!("requesting new index for ledger {}", target);
                self.client.fetch_snapshot(target).await?;
            }
            None => debug!("latest closed index not known yet, skipping"),
        }
        Ok(())
    }

    async fn connect(&mut self) -> Option<MessageStream> {
        info!("connecting to ledger node {}", self.transport.endpoint());
        let LedgerConnection { sink, messages } = match self.transport.connect().await {
            Ok(connection) => connection,
            Err(e) => {
                warn!("failed to connect to {}: {}", self.transport.endpoint(), e);
                return None;
            }
        };

        if let Err(e) = self.client.on_connected(sink).await {
            warn!("ledger connection unusable: {}", e);
            self.client.on_disconnected();
            return None;
        }
        emit(&self.event_tx, EngineEvent::Connected);
        Some(messages)
    }

    fn disconnected(&mut self) {
        self.client.on_disconnected();
        emit(&self.event_tx, EngineEvent::Disconnected);
    }

    /// Log a recoverable error and decide whether the connection is lost.
    ///
    /// # Returns
    ///
    /// - `Ok(true)`: Transport failure, the connection was dropped
    /// - `Ok(false)`: Nothing to do
    /// - `Err(Error)`: Fatal error, passed through
    fn absorb(&mut self, result: Result<()>) -> Result<bool> {
        match result {
            Ok(()) => Ok(false),
            Err(Error::Transport(msg)) => {
                warn!("ledger transport failed: {}", msg);
                self.disconnected();
                Ok(true)
            }
            Err(e) if e.is_recoverable() => {
                warn!("ledger request failed: {}", e);
                Ok(false)
            }
            Err(e) => {
                error!("fatal ledger error: {}", e);
                Err(e)
            }
        }
    }

    fn reconnect_deadline(&self) -> Option<Instant> {
        match self.reconnect_delay {
            Some(delay) => {
                info!("reconnecting in {:?}", delay);
                Some(Instant::now() + delay)
            }
            None => {
                warn!("ledger connection lost; reconnect is disabled, fetching halted");
                None
            }
        }
    }
}

/// Owns the publisher; reacts to completed snapshots
struct PublishLoop {
    publisher: SnapshotPublisher,
    ready_rx: mpsc::Receiver<IndexReady>,
    records_root: PathBuf,
    remove_indexes_after: Duration,
    event_tx: mpsc::Sender<EngineEvent>,
}

impl PublishLoop {
    async fn run(mut self) -> Result<()> {
        if let Err(e) = self.publisher.initialize().await {
            if !e.is_recoverable() {
                return Err(e);
            }
            warn!("content store not ready, will retry on the next index: {}", e);
        }

        while let Some(ready) = self.ready_rx.recv().await {
            let index = ready.index;
            emit(&self.event_tx, EngineEvent::IndexReady { index });

            match self.publish_index(&ready).await {
                Ok(Some(outcome)) => emit(
                    &self.event_tx,
                    EngineEvent::Published {
                        index,
                        root: outcome.root,
                        name: outcome.name,
                        evicted: outcome.retention.evicted.len(),
                    },
                ),
                Ok(None) => emit(&self.event_tx, EngineEvent::PublishSkipped { index }),
                Err(e) if e.is_recoverable() => {
                    error!("failed to publish index {}: {}", index, e);
                    emit(
                        &self.event_tx,
                        EngineEvent::PublishFailed {
                            index,
                            error: e.to_string(),
                        },
                    );
                }
                Err(e) => return Err(e),
            }
        }

        debug!("completion channel closed, publish loop done");
        Ok(())
    }

    async fn publish_index(&mut self, ready: &IndexReady) -> Result<Option<PublishOutcome>> {
        prune_index_dirs(&self.records_root, self.remove_indexes_after).await?;

        if !self.publisher.is_initialized() {
            if let Err(e) = self.publisher.initialize().await {
                if !e.is_recoverable() {
                    return Err(e);
                }
                warn!("content store still not ready: {}", e);
            }
        }
        let Some(name) = self.publisher.advertised_name() else {
            warn!("no IPNS name yet, skipping publish of index {}", ready.index);
            return Ok(None);
        };

        info!("packaging records for IPNS publishing");
        let hashes = hash_tree(&self.records_root).await?;
        let meta = MetaEnvelope::build(ready.index, &ready.header, name, &hashes);
        meta.write(&self.records_root).await?;

        info!("attempting to publish data to IPNS: {}", meta.current.root);
        self.publisher.publish(&self.records_root).await
    }
}

async fn next_frame(messages: &mut Option<MessageStream>) -> Option<Result<String>> {
    match messages {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn reconnect_timer(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn emit(event_tx: &mpsc::Sender<EngineEvent>, event: EngineEvent) {
    // Nobody listening is fine; a full channel means the listener is too slow
    if let Err(mpsc::error::TrySendError::Full(event)) = event_tx.try_send(event) {
        warn!("Event channel full, dropping event: {:?}", event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_event_clone() {
        let event = EngineEvent::Published {
            index: 100,
            root: ContentId::new("QmRoot"),
            name: "k51name".to_string(),
            evicted: 0,
        };
        assert_eq!(event.clone(), event);
    }

    #[tokio::test]
    async fn test_next_frame_pends_without_connection() {
        let mut messages: Option<MessageStream> = None;
        let polled = tokio::time::timeout(Duration::from_millis(20), next_frame(&mut messages)).await;
        assert!(polled.is_err());
    }
}
