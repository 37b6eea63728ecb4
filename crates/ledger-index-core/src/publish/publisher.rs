//! Snapshot publisher
//!
//! Uploads the records root to the content store, points the mutable name
//! at the new root, then hands the root to retention.

use crate::config::IpfsNodeConfig;
use crate::error::{Error, Result};
use crate::publish::cid::{ContentId, content_id_of};
use crate::publish::metadata::META_FILE;
use crate::retention::{RetentionManager, RetentionReport};
use crate::traits::{ContentStore, KeySpec, NameOptions};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// Result of one successful publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Root identifier of the uploaded tree
    pub root: ContentId,
    /// Cumulative size reported by the store
    pub size: u64,
    /// Mutable name now pointing at `root`
    pub name: String,
    /// What retention did with the new root
    pub retention: RetentionReport,
}

/// Publishes the records root under one mutable name
pub struct SnapshotPublisher {
    store: Arc<dyn ContentStore>,
    options: NameOptions,
    key_spec: KeySpec,
    name: Option<String>,
    retention: RetentionManager,
    sweep_untracked: bool,
}

impl SnapshotPublisher {
    /// Create an uninitialized publisher
    pub fn new(store: Arc<dyn ContentStore>, options: NameOptions, retention: RetentionManager) -> Self {
        Self {
            store,
            options,
            key_spec: KeySpec::default(),
            name: None,
            retention,
            sweep_untracked: false,
        }
    }

    /// Create a publisher from the IPFS node section of the configuration
    pub fn from_config(
        store: Arc<dyn ContentStore>,
        config: &IpfsNodeConfig,
        retention: RetentionManager,
    ) -> Self {
        let options = NameOptions {
            resolve: false,
            lifetime: config.ipns_lifetime.clone(),
            ttl: config.ipns_ttl.clone(),
            key: config.ipns_key.clone(),
            allow_offline: false,
        };
        Self::new(store, options, retention).with_untracked_sweep(config.sweep_untracked_pins)
    }

    /// Also unpin untracked recursive pins after each retention cycle
    pub fn with_untracked_sweep(mut self, enabled: bool) -> Self {
        self.sweep_untracked = enabled;
        self
    }

    /// Key parameters used when the configured key has to be generated
    pub fn with_key_spec(mut self, spec: KeySpec) -> Self {
        self.key_spec = spec;
        self
    }

    /// Mutable name the tree is advertised under, once initialized
    pub fn advertised_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether [`initialize`](Self::initialize) has succeeded
    pub fn is_initialized(&self) -> bool {
        self.name.is_some()
    }

    /// Name publication options
    pub fn name_options(&self) -> &NameOptions {
        &self.options
    }

    /// Check the store is reachable and make sure the publishing key exists.
    ///
    /// The key is generated when missing. Its id becomes the advertised name.
    pub async fn initialize(&mut self) -> Result<String> {
        let version = self.store.version().await?;
        info!("{} client connected, version {}", self.store.store_name(), version);

        info!("validating IPNS key exists: {}", self.options.key);
        let keys = self.store.list_keys().await?;
        let id = match keys.into_iter().find(|k| k.name == self.options.key) {
            Some(key) => {
                info!("located IPNS key: '{}', IPNS: 'ipns://{}/'", key.name, key.id);
                key.id
            }
            None => {
                warn!(
                    "unable to find IPNS key: '{}', attempting to generate new key",
                    self.options.key
                );
                let key = self
                    .store
                    .generate_key(&self.options.key, &self.key_spec)
                    .await?;
                info!("generated IPNS key: '{}', IPNS: 'ipns://{}/'", key.name, key.id);
                key.id
            }
        };

        self.name = Some(id.clone());
        Ok(id)
    }

    /// Upload `dir`, point the mutable name at it, then run retention.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(outcome))`: Published
    /// - `Ok(None)`: `dir` does not exist or the publisher is not initialized;
    ///   logged, nothing was uploaded
    /// - `Err(Error)`: Store or retention failure
    pub async fn publish(&self, dir: &Path) -> Result<Option<PublishOutcome>> {
        if !fs::try_exists(dir).await.unwrap_or(false) {
            warn!("cannot publish IPNS data, {} does not exist", dir.display());
            return Ok(None);
        }

        if !self.is_initialized() {
            warn!("cannot publish IPNS data, client is not yet initialized");
            return Ok(None);
        }

        info!("attempting to publish '{}' to IPNS", dir.display());
        let added = self.store.add_directory(dir).await?;
        info!(
            "content added for publishing, CID: {}, Size: {}, Path: {}",
            added.root, added.size, added.path
        );

        let published = self.store.publish_name(&added.root, &self.options).await?;
        info!(
            "data published to IPNS: ipns://{}  IPFS: {}",
            published.name, published.value
        );

        let retention = self.retention.register_and_evict(&added.root).await?;

        if self.sweep_untracked {
            match self.retention.sweep_untracked(&added.root).await {
                Ok(removed) if !removed.is_empty() => {
                    info!("removed {} untracked pin(s)", removed.len())
                }
                Ok(_) => {}
                Err(e) => warn!("untracked pin sweep failed: {}", e),
            }
        }

        Ok(Some(PublishOutcome {
            root: added.root,
            size: added.size,
            name: published.name,
            retention,
        }))
    }
}

impl std::fmt::Debug for SnapshotPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotPublisher")
            .field("store", &self.store.store_name())
            .field("key", &self.options.key)
            .field("name", &self.name)
            .field("sweep_untracked", &self.sweep_untracked)
            .finish()
    }
}

/// Identifier of every regular file below `records_root`.
///
/// Keys are root-relative paths with a leading `/` (`/100/http.json`). The
/// root-level `meta.json` is skipped, as it is written from this mapping.
///
/// # Returns
///
/// - `Err(Error::NotFound)`: `records_root` does not exist
/// - `Err(Error::Storage)`: a directory or file could not be read
pub async fn hash_tree(records_root: &Path) -> Result<BTreeMap<String, ContentId>> {
    if !fs::try_exists(records_root).await.unwrap_or(false) {
        return Err(Error::not_found(format!(
            "records directory {}",
            records_root.display()
        )));
    }

    info!("gathering content identifiers for {}", records_root.display());
    let mut hashes = BTreeMap::new();
    let mut pending: Vec<PathBuf> = vec![PathBuf::new()];

    while let Some(relative) = pending.pop() {
        let dir = records_root.join(&relative);
        let mut entries = fs::read_dir(&dir).await.map_err(|e| {
            Error::storage(format!("Failed to read directory {}: {}", dir.display(), e))
        })?;

        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let child = relative.join(entry.file_name());

            if file_type.is_dir() {
                pending.push(child);
                continue;
            }
            if !file_type.is_file() || child.as_os_str() == META_FILE {
                continue;
            }

            let path = entry.path();
            let bytes = fs::read(&path).await.map_err(|e| {
                Error::storage(format!("Failed to read {}: {}", path.display(), e))
            })?;
            let id = content_id_of(&bytes);

            let key = relative_key(&child);
            debug!("adding '{}' with cid {} to meta data", key, id);
            hashes.insert(key, id);
        }
    }

    Ok(hashes)
}

fn relative_key(path: &Path) -> String {
    let mut key = String::new();
    for component in path.components() {
        key.push('/');
        key.push_str(&component.as_os_str().to_string_lossy());
    }
    key
}
