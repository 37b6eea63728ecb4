//! Ledger protocol client
//!
//! The client owns the write half of the node connection and every in-flight
//! snapshot assembly. All of its methods take `&mut self`; the engine drives it
//! from one task, so no locking is involved.
//!
//! ## Per-index state machine
//!
//! ```text
//!            fetch_snapshot(i)            first page, closed        last page
//! Unseen ────────────────────▶ Requested ───────────────────▶ Collecting ─────────▶ Completed
//!                                  │                            │    ▲
//!                                  │ first page, not closed     │    │ page with marker:
//!                                  ▼                            └────┘ request next page
//!                        abandoned, fetch_snapshot(i - 1)
//! ```
//!
//! A failed page drops the index back to `Unseen`.
//!
//! Each index has at most one page request outstanding: a page is only
//! requested from the handler of the previous page, and a fresh fetch is
//! refused while the index is anywhere between `Requested` and `Completed`.

use crate::classifier::{DiscoveredRecord, ServiceTable};
use crate::config::IndexingConfig;
use crate::error::{Error, Result};
use crate::ledger::protocol::{
    ClosedLedger, LedgerHeader, LedgerIndex, LedgerRequest, LedgerResponse, StatePage,
};
use crate::ledger::writer::SnapshotWriter;
use crate::traits::LedgerSink;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// How many completed indices are remembered to refuse re-collection
const COMPLETED_HISTORY: usize = 256;

/// Completion signal: a snapshot was fully assembled and written
#[derive(Debug, Clone, PartialEq)]
pub struct IndexReady {
    pub index: LedgerIndex,
    pub header: LedgerHeader,
    /// Directory the snapshot files were written to
    pub directory: PathBuf,
}

/// Records accumulated for one closed ledger
#[derive(Debug)]
struct SnapshotState {
    header: LedgerHeader,
    objects: Vec<DiscoveredRecord>,
    pages: usize,
}

#[derive(Debug)]
enum Assembly {
    /// First page requested; not yet known to be closed
    Requested,
    /// Confirmed closed and accumulating pages
    Collecting {
        snapshot: SnapshotState,
        awaiting_page: bool,
    },
}

/// Outcome of a fetch request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Request written to the connection
    Sent,
    /// Refused: the index is already being assembled or was completed
    Refused,
}

/// Client side of the ledger protocol
pub struct LedgerClient {
    sink: Option<Box<dyn LedgerSink>>,
    connected: watch::Sender<bool>,
    latest_index: LedgerIndex,
    fetch_on_resolve: bool,
    page_limit: u32,
    classifier: ServiceTable,
    writer: SnapshotWriter,
    assemblies: BTreeMap<LedgerIndex, Assembly>,
    completed: BTreeSet<LedgerIndex>,
    ready_tx: mpsc::Sender<IndexReady>,
}

impl LedgerClient {
    /// Create a disconnected client
    ///
    /// Every fully written snapshot is announced on `ready_tx`.
    pub fn new(
        page_limit: u32,
        classifier: ServiceTable,
        writer: SnapshotWriter,
        ready_tx: mpsc::Sender<IndexReady>,
    ) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            sink: None,
            connected,
            latest_index: 0,
            fetch_on_resolve: false,
            page_limit,
            classifier,
            writer,
            assemblies: BTreeMap::new(),
            completed: BTreeSet::new(),
            ready_tx,
        }
    }

    /// Create a client from the indexing section of the configuration
    pub fn from_config(config: &IndexingConfig, ready_tx: mpsc::Sender<IndexReady>) -> Self {
        Self::new(
            config.page_limit,
            ServiceTable::standard(),
            SnapshotWriter::new(config.file_path.clone(), config.root_copy),
            ready_tx,
        )
    }

    /// Observe the connected flag
    pub fn connection_status(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Whether a connection is attached
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Last closed ledger index the node reported (0 until known)
    pub fn latest_index(&self) -> LedgerIndex {
        self.latest_index
    }

    /// Indices with an assembly in progress
    pub fn assembling(&self) -> Vec<LedgerIndex> {
        self.assemblies.keys().copied().collect()
    }

    /// Attach a fresh connection.
    ///
    /// Marks the client connected, asks for the latest closed ledger, and
    /// fetches that ledger's snapshot as soon as the answer arrives.
    pub async fn on_connected(&mut self, sink: Box<dyn LedgerSink>) -> Result<()> {
        info!("ledger connection established");
        self.sink = Some(sink);
        self.connected.send_replace(true);
        self.fetch_on_resolve = true;
        self.resolve_latest_closed_index().await
    }

    /// Detach a closed connection.
    ///
    /// Outstanding requests can never be answered on a new connection, so
    /// their assemblies are dropped.
    pub fn on_disconnected(&mut self) {
        info!("ledger connection closed");
        self.sink = None;
        self.connected.send_replace(false);
        self.fetch_on_resolve = false;
        if !self.assemblies.is_empty() {
            warn!(
                "abandoning {} unfinished snapshot(s): {:?}",
                self.assemblies.len(),
                self.assembling()
            );
            self.assemblies.clear();
        }
    }

    /// Ask the node for its latest closed ledger.
    ///
    /// The answer arrives later through [`handle_message`](Self::handle_message).
    pub async fn resolve_latest_closed_index(&mut self) -> Result<()> {
        self.send(&LedgerRequest::ClosedLedger).await
    }

    /// Start assembling the snapshot for `index`.
    ///
    /// Refused (and logged) when the index is already being assembled or was
    /// completed before.
    pub async fn fetch_snapshot(&mut self, index: LedgerIndex) -> Result<FetchOutcome> {
        if self.completed.contains(&index) {
            debug!("index {} already completed, not fetching again", index);
            return Ok(FetchOutcome::Refused);
        }
        if self.assemblies.contains_key(&index) {
            warn!("index {} is already being assembled, not fetching again", index);
            return Ok(FetchOutcome::Refused);
        }

        self.assemblies.insert(index, Assembly::Requested);
        if let Err(e) = self.request_page(index, None).await {
            self.assemblies.remove(&index);
            return Err(e);
        }
        Ok(FetchOutcome::Sent)
    }

    /// Handle one inbound frame.
    ///
    /// Malformed or unsuccessful responses are logged and dropped. A failed
    /// page abandons its index without a retry, leaving it free to be fetched
    /// again. An `Err` from here means the snapshot could not be written; the
    /// index is left unfinished so a later fetch can collect it again.
    pub async fn handle_message(&mut self, text: &str) -> Result<()> {
        let response = match LedgerResponse::parse(text) {
            Ok(response) => response,
            Err(e) => {
                warn!("dropping ledger message: {}", e);
                return Ok(());
            }
        };

        match response {
            LedgerResponse::Closed(closed) => self.handle_closed(closed).await,
            LedgerResponse::State { requested, page } => match requested {
                Some(requested) => self.handle_state_page(requested, page).await,
                None => {
                    warn!(
                        "dropping ledger_data page for {} without a request index",
                        page.ledger_index
                    );
                    Ok(())
                }
            },
            LedgerResponse::Unknown { id } => {
                warn!("unknown message received: id={}", id);
                Ok(())
            }
            LedgerResponse::Failed {
                id,
                requested,
                reason,
            } => {
                warn!("bad message: id={} {}", id, reason);
                if let Some(index) = requested {
                    if self.assemblies.remove(&index).is_some() {
                        warn!("abandoning snapshot for index {} after failed page", index);
                    }
                }
                Ok(())
            }
        }
    }

    async fn handle_closed(&mut self, closed: ClosedLedger) -> Result<()> {
        self.latest_index = closed.ledger_index;
        info!(
            "[ClosedLedger] -> Index: {} Validated: {} Close time: {}",
            closed.ledger_index,
            closed.validated,
            closed.ledger.close_time_human().unwrap_or("unknown")
        );

        if self.fetch_on_resolve {
            self.fetch_on_resolve = false;
            self.fetch_snapshot(closed.ledger_index).await?;
        }
        Ok(())
    }

    async fn handle_state_page(&mut self, requested: LedgerIndex, page: StatePage) -> Result<()> {
        let index = requested;

        let Some(assembly) = self.assemblies.get_mut(&index) else {
            warn!("dropping unsolicited ledger_data page for index {}", index);
            return Ok(());
        };

        if page.ledger_index != index {
            warn!(
                "node answered index {} for request {}, abandoning",
                page.ledger_index, index
            );
            self.assemblies.remove(&index);
            return Ok(());
        }

        match assembly {
            Assembly::Requested => {
                let Some(header) = page.ledger.clone() else {
                    warn!("first page for index {} has no ledger header, abandoning", index);
                    self.assemblies.remove(&index);
                    return Ok(());
                };

                if !header.is_closed() {
                    self.assemblies.remove(&index);
                    warn!("skipping ledger index {}, as it is not yet closed", index);
                    return self.redirect_from(index).await;
                }

                debug!("adding ledger index {} to the snapshot table", index);
                *assembly = Assembly::Collecting {
                    snapshot: SnapshotState {
                        header,
                        objects: Vec::new(),
                        pages: 0,
                    },
                    awaiting_page: false,
                };
            }
            Assembly::Collecting { awaiting_page, .. } => {
                if !*awaiting_page {
                    warn!("dropping unexpected extra page for index {}", index);
                    return Ok(());
                }
                *awaiting_page = false;
            }
        }

        let Some(Assembly::Collecting { snapshot, .. }) = self.assemblies.get_mut(&index) else {
            return Ok(());
        };

        let before = snapshot.objects.len();
        snapshot.pages += 1;
        snapshot.objects.extend(page.state.into_iter().filter_map(|object| {
            match (object.account, object.domain) {
                (Some(account), Some(domain)) if !domain.is_empty() => {
                    Some(DiscoveredRecord::new(account, domain))
                }
                _ => None,
            }
        }));
        let found = snapshot.objects.len() - before;

        match page.marker {
            Some(marker) => {
                if found > 0 {
                    debug!(
                        "gathering more data for {}, current size in collection {}",
                        index,
                        snapshot.objects.len()
                    );
                }
                self.continue_snapshot(index, marker).await
            }
            None => {
                info!(
                    "size in {} collection {} ({} pages)",
                    index,
                    snapshot.objects.len(),
                    snapshot.pages
                );
                self.complete(index).await
            }
        }
    }

    async fn redirect_from(&mut self, index: LedgerIndex) -> Result<()> {
        match index.checked_sub(1) {
            Some(previous) => {
                self.fetch_snapshot(previous).await?;
                Ok(())
            }
            None => {
                warn!("cannot redirect below ledger index 0, abandoning");
                Ok(())
            }
        }
    }

    async fn continue_snapshot(&mut self, index: LedgerIndex, marker: Value) -> Result<()> {
        self.request_page(index, Some(marker)).await?;
        if let Some(Assembly::Collecting { awaiting_page, .. }) = self.assemblies.get_mut(&index) {
            *awaiting_page = true;
        }
        Ok(())
    }

    async fn complete(&mut self, index: LedgerIndex) -> Result<()> {
        let Some(Assembly::Collecting { snapshot, .. }) = self.assemblies.remove(&index) else {
            return Ok(());
        };

        info!("no more data to collect for {}, processing data", index);
        let buckets = self.classifier.bucket(&snapshot.objects);
        let directory = self.writer.write(index, &buckets, &snapshot.header).await?;

        self.completed.insert(index);
        while self.completed.len() > COMPLETED_HISTORY {
            self.completed.pop_first();
        }

        let ready = IndexReady {
            index,
            header: snapshot.header,
            directory,
        };
        if self.ready_tx.send(ready).await.is_err() {
            warn!("no listener for completed index {}", index);
        }
        Ok(())
    }

    async fn request_page(&mut self, index: LedgerIndex, marker: Option<Value>) -> Result<()> {
        let request = LedgerRequest::LedgerData {
            index,
            limit: self.page_limit,
            marker,
        };
        self.send(&request).await
    }

    async fn send(&mut self, request: &LedgerRequest) -> Result<()> {
        let text = request.to_json()?;
        match self.sink.as_mut() {
            Some(sink) => sink.send(text).await,
            None => Err(Error::transport("not connected to a ledger node")),
        }
    }
}

impl std::fmt::Debug for LedgerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerClient")
            .field("connected", &self.is_connected())
            .field("latest_index", &self.latest_index)
            .field("assembling", &self.assembling())
            .field("completed", &self.completed.len())
            .finish()
    }
}
