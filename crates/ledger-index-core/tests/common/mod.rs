//! Test doubles and common utilities for contract tests
//!
//! The doubles model the two external collaborators (ledger node, content
//! store) closely enough to drive the real client, publisher and engine.

#![allow(dead_code)]

use async_trait::async_trait;
use ledger_index_core::error::{Error, Result};
use ledger_index_core::publish::ContentId;
use ledger_index_core::state::MemoryPinStore;
use ledger_index_core::traits::{
    AddedContent, ContentStore, KeyInfo, KeySpec, LedgerConnection, LedgerSink, LedgerTransport,
    NameOptions, PinInfo, PinKind, PinStore, PinTable, PublishedName,
};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

// ---------------------------------------------------------------------------
// Ledger side
// ---------------------------------------------------------------------------

/// A LedgerSink that records every frame it is asked to send
#[derive(Clone, Default)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw frames, in send order
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Frames parsed as JSON
    pub fn requests(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    /// `ledger_data` requests only
    pub fn state_requests(&self) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|r| r["command"] == "ledger_data")
            .collect()
    }

    /// Number of closed-ledger queries sent
    pub fn closed_queries(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| r["command"] == "ledger" && r["ledger_index"] == "closed")
            .count()
    }
}

#[async_trait]
impl LedgerSink for RecordingSink {
    async fn send(&mut self, text: String) -> Result<()> {
        self.sent.lock().unwrap().push(text);
        Ok(())
    }
}

/// A transport whose inbound frames are pushed by the test
///
/// Each `connect()` takes the next scripted connection; once they are used
/// up it fails like a refused connection. Dropping a frame sender closes its
/// connection.
pub struct ScriptedTransport {
    sink: RecordingSink,
    connections: Mutex<VecDeque<mpsc::UnboundedReceiver<String>>>,
    connect_count: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    /// Transport with one scripted connection
    pub fn new() -> (Self, mpsc::UnboundedSender<String>, RecordingSink) {
        let sink = RecordingSink::new();
        let transport = Self {
            sink: sink.clone(),
            connections: Mutex::new(VecDeque::new()),
            connect_count: Arc::new(AtomicUsize::new(0)),
        };
        let frames = transport.add_connection();
        (transport, frames, sink)
    }

    /// Script one more connection, handed out after the earlier ones
    pub fn add_connection(&self) -> mpsc::UnboundedSender<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.lock().unwrap().push_back(rx);
        tx
    }

    /// Shared counter of connect() calls
    pub fn connect_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.connect_count)
    }
}

#[async_trait]
impl LedgerTransport for ScriptedTransport {
    async fn connect(&self) -> Result<LedgerConnection> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        let rx = self
            .connections
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::transport("connection refused"))?;

        let messages = tokio_stream::wrappers::UnboundedReceiverStream::new(rx).map(Ok::<String, Error>);
        Ok(LedgerConnection {
            sink: Box::new(self.sink.clone()),
            messages: Box::pin(messages),
        })
    }

    fn endpoint(&self) -> &str {
        "ws://scripted"
    }
}

/// A transport that can never connect
pub struct RefusingTransport;

#[async_trait]
impl LedgerTransport for RefusingTransport {
    async fn connect(&self) -> Result<LedgerConnection> {
        Err(Error::transport("connection refused"))
    }

    fn endpoint(&self) -> &str {
        "ws://refusing"
    }
}

/// Successful closed-ledger response
pub fn closed_response(index: u32) -> String {
    json!({
        "id": "closed",
        "status": "success",
        "type": "response",
        "result": {
            "ledger_index": index,
            "validated": true,
            "ledger": {
                "closed": true,
                "close_time_human": "2024-Jan-01 00:00:00.000000000 UTC",
                "ledger_hash": format!("HASH{}", index)
            }
        }
    })
    .to_string()
}

/// Ledger header as it appears on the first page of a snapshot
pub fn header(index: u32, closed: bool) -> Value {
    json!({
        "closed": closed,
        "ledger_index": index.to_string(),
        "ledger_hash": format!("HASH{}", index),
        "close_time_human": "2024-Jan-01 00:00:00.000000000 UTC"
    })
}

/// One `ledger_data` page for `index`
///
/// `objects` are `(account, domain)` pairs. The header is attached only to
/// the first page (`first == true`), as the node does.
pub fn state_page(
    index: u32,
    closed: bool,
    first: bool,
    objects: &[(&str, Option<&str>)],
    marker: Option<&str>,
) -> String {
    let state: Vec<Value> = objects
        .iter()
        .map(|(account, domain)| match domain {
            Some(domain) => json!({ "LedgerEntryType": "AccountRoot", "Account": account, "Domain": domain }),
            None => json!({ "LedgerEntryType": "AccountRoot", "Account": account }),
        })
        .collect();

    let mut result = json!({
        "ledger_index": index,
        "state": state,
    });
    if first {
        result["ledger"] = header(index, closed);
    }
    if let Some(marker) = marker {
        result["marker"] = json!(marker);
    }

    json!({
        "id": format!("state:{}", index),
        "status": "success",
        "type": "response",
        "result": result
    })
    .to_string()
}

/// Unsuccessful response
pub fn error_response(id: &str) -> String {
    json!({
        "id": id,
        "status": "error",
        "type": "response",
        "error": "lgrNotFound"
    })
    .to_string()
}

/// Read `<root>/<index>/<tag>.json` and return its records as (account, domain) pairs
pub fn read_records(root: &Path, index: u32, tag: &str) -> Vec<(String, String)> {
    let path = root.join(index.to_string()).join(format!("{}.json", tag));
    let body: Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
    let mut records: Vec<(String, String)> = body["records"]
        .as_array()
        .unwrap()
        .iter()
        .flat_map(|record| {
            record
                .as_object()
                .unwrap()
                .iter()
                .map(|(k, v)| (k.clone(), v.as_str().unwrap().to_string()))
                .collect::<Vec<_>>()
        })
        .collect();
    records.sort();
    records
}

// ---------------------------------------------------------------------------
// Content store side
// ---------------------------------------------------------------------------

/// A mock ContentStore that tracks calls and holds pins in memory
pub struct MockContentStore {
    root: ContentId,
    key_id: String,
    keys: Mutex<Vec<KeyInfo>>,
    pins: Mutex<BTreeMap<ContentId, PinKind>>,
    failing_unpins: Mutex<BTreeSet<ContentId>>,
    added_dirs: Mutex<Vec<PathBuf>>,
    published: Mutex<Vec<(ContentId, NameOptions)>>,
    removed: Mutex<Vec<ContentId>>,
    generated: Mutex<Vec<(String, KeySpec)>>,
    version_call_count: AtomicUsize,
}

impl MockContentStore {
    /// Store whose uploads always produce `root`
    pub fn new(root: &str) -> Self {
        Self {
            root: ContentId::new(root),
            key_id: "k51qzi5uqu5dtest".to_string(),
            keys: Mutex::new(Vec::new()),
            pins: Mutex::new(BTreeMap::new()),
            failing_unpins: Mutex::new(BTreeSet::new()),
            added_dirs: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            generated: Mutex::new(Vec::new()),
            version_call_count: AtomicUsize::new(0),
        }
    }

    /// Pre-register a key
    pub fn with_key(self, name: &str, id: &str) -> Self {
        self.keys.lock().unwrap().push(KeyInfo {
            name: name.to_string(),
            id: id.to_string(),
        });
        self
    }

    /// Pre-register a pin
    pub fn with_pin(self, id: &str, kind: PinKind) -> Self {
        self.pins.lock().unwrap().insert(ContentId::new(id), kind);
        self
    }

    /// Make unpinning `id` fail with a publish error
    pub fn fail_unpin(&self, id: &str) {
        self.failing_unpins.lock().unwrap().insert(ContentId::new(id));
    }

    /// Id every generated key gets
    pub fn generated_key_id(&self) -> &str {
        &self.key_id
    }

    pub fn is_pinned(&self, id: &str) -> bool {
        self.pins.lock().unwrap().contains_key(&ContentId::new(id))
    }

    pub fn added_dirs(&self) -> Vec<PathBuf> {
        self.added_dirs.lock().unwrap().clone()
    }

    pub fn add_call_count(&self) -> usize {
        self.added_dirs.lock().unwrap().len()
    }

    pub fn published(&self) -> Vec<(ContentId, NameOptions)> {
        self.published.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<ContentId> {
        self.removed.lock().unwrap().clone()
    }

    pub fn generated(&self) -> Vec<(String, KeySpec)> {
        self.generated.lock().unwrap().clone()
    }

    pub fn version_call_count(&self) -> usize {
        self.version_call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentStore for MockContentStore {
    async fn version(&self) -> Result<String> {
        self.version_call_count.fetch_add(1, Ordering::SeqCst);
        Ok("0.29.0-mock".to_string())
    }

    async fn add_directory(&self, dir: &Path) -> Result<AddedContent> {
        self.added_dirs.lock().unwrap().push(dir.to_path_buf());
        self.pins
            .lock()
            .unwrap()
            .insert(self.root.clone(), PinKind::Recursive);
        Ok(AddedContent {
            root: self.root.clone(),
            size: 1024,
            path: dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
        })
    }

    async fn publish_name(&self, root: &ContentId, options: &NameOptions) -> Result<PublishedName> {
        self.published
            .lock()
            .unwrap()
            .push((root.clone(), options.clone()));
        let name = self
            .keys
            .lock()
            .unwrap()
            .iter()
            .find(|k| k.name == options.key)
            .map(|k| k.id.clone())
            .unwrap_or_else(|| self.key_id.clone());
        Ok(PublishedName {
            name,
            value: format!("/ipfs/{}", root),
        })
    }

    async fn list_pins(&self) -> Result<Vec<PinInfo>> {
        Ok(self
            .pins
            .lock()
            .unwrap()
            .iter()
            .map(|(id, kind)| PinInfo {
                id: id.clone(),
                kind: *kind,
            })
            .collect())
    }

    async fn remove_pin(&self, id: &ContentId) -> Result<()> {
        if self.failing_unpins.lock().unwrap().contains(id) {
            return Err(Error::publish("mock", "unpin timed out"));
        }
        if self.pins.lock().unwrap().remove(id).is_none() {
            return Err(Error::not_found(format!("{} is not pinned", id)));
        }
        self.removed.lock().unwrap().push(id.clone());
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<KeyInfo>> {
        Ok(self.keys.lock().unwrap().clone())
    }

    async fn generate_key(&self, name: &str, spec: &KeySpec) -> Result<KeyInfo> {
        self.generated
            .lock()
            .unwrap()
            .push((name.to_string(), spec.clone()));
        let key = KeyInfo {
            name: name.to_string(),
            id: self.key_id.clone(),
        };
        self.keys.lock().unwrap().push(key.clone());
        Ok(key)
    }

    fn store_name(&self) -> &'static str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Pin state side
// ---------------------------------------------------------------------------

/// A PinStore whose first `failures` saves fail with a storage error
#[derive(Clone)]
pub struct FlakyPinStore {
    inner: MemoryPinStore,
    failures: Arc<AtomicUsize>,
}

impl FlakyPinStore {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: MemoryPinStore::new(),
            failures: Arc::new(AtomicUsize::new(failures)),
        }
    }

    pub async fn snapshot(&self) -> PinTable {
        self.inner.snapshot().await
    }
}

#[async_trait]
impl PinStore for FlakyPinStore {
    async fn load_or_default(&self) -> PinTable {
        self.inner.load_or_default().await
    }

    async fn save(&self, table: &PinTable) -> Result<()> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(Error::storage("disk full"));
        }
        self.inner.save(table).await
    }
}
