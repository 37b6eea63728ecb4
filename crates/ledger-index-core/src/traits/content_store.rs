// # Content Store Trait
//
// Defines the subset of a content-addressed store (IPFS) the publisher and
// retention manager need: directory upload, mutable-name publication, pin
// listing/removal, and key management.
//
// ## Implementations
//
// - Kubo RPC API: `ledger-index-kubo` crate
//
// Implementations make one request per call. No retries, no caching:
// the engine republishes on its next cycle instead.

use crate::publish::ContentId;
use async_trait::async_trait;
use std::path::Path;

/// Result of uploading a directory tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedContent {
    /// Root content identifier of the uploaded tree
    pub root: ContentId,
    /// Cumulative size reported by the store
    pub size: u64,
    /// Path the store reported for the root entry
    pub path: String,
}

/// Options for publishing a mutable name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameOptions {
    /// Resolve the target before publishing
    pub resolve: bool,
    /// Record validity lifetime (e.g. "24h")
    pub lifetime: String,
    /// Record cache TTL (e.g. "1m")
    pub ttl: String,
    /// Key name to publish under
    pub key: String,
    /// Publish even when the node has no peers
    pub allow_offline: bool,
}

/// Result of publishing a mutable name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedName {
    /// The mutable name (key id)
    pub name: String,
    /// The path the name now points to
    pub value: String,
}

/// Kind of pin held by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinKind {
    Recursive,
    Direct,
    Indirect,
}

/// One pin held by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinInfo {
    /// Pinned content identifier
    pub id: ContentId,
    /// How it is pinned
    pub kind: PinKind,
}

/// A key known to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    /// Local key name
    pub name: String,
    /// Key id (the mutable name it publishes)
    pub id: String,
}

/// Parameters for generating a new key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    /// Key type (e.g. "rsa", "ed25519")
    pub kind: String,
    /// Key size in bits (ignored by some key types)
    pub size: u32,
}

impl Default for KeySpec {
    fn default() -> Self {
        Self {
            kind: "rsa".to_string(),
            size: 2048,
        }
    }
}

/// Trait for content-addressed store implementations
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Version string of the store; doubles as a liveness check
    async fn version(&self) -> crate::Result<String>;

    /// Upload a directory tree recursively and pin its root
    async fn add_directory(&self, dir: &Path) -> crate::Result<AddedContent>;

    /// Point a mutable name at `root`
    async fn publish_name(
        &self,
        root: &ContentId,
        options: &NameOptions,
    ) -> crate::Result<PublishedName>;

    /// List pins held by the store
    async fn list_pins(&self) -> crate::Result<Vec<PinInfo>>;

    /// Remove a pin
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Unpinned
    /// - `Err(Error::NotFound)`: Nothing was pinned under `id`
    /// - `Err(Error)`: Any other failure
    async fn remove_pin(&self, id: &ContentId) -> crate::Result<()>;

    /// List keys held by the store
    async fn list_keys(&self) -> crate::Result<Vec<KeyInfo>>;

    /// Generate a new named key
    async fn generate_key(&self, name: &str, spec: &KeySpec) -> crate::Result<KeyInfo>;

    /// Store name, for logs and errors
    fn store_name(&self) -> &'static str;
}
