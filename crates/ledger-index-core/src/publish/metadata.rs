//! Records-root housekeeping: the `meta.json` envelope and age-based pruning
//! of old index directories.

use crate::error::{Error, Result};
use crate::ledger::protocol::{LedgerHeader, LedgerIndex};
use crate::publish::ContentId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, info, warn};

/// Name of the metadata file at the records root
pub const META_FILE: &str = "meta.json";

/// Entry point for consumers of the published tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaEnvelope {
    pub current: CurrentIndex,
    /// Files of every other index still on disk: `/<index>/<file>` -> identifier
    pub historical: BTreeMap<String, ContentId>,
}

/// The newest index, addressed both by mutable name and by identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentIndex {
    pub ledger: LedgerHeader,
    /// `/ipns/<name>/<index>/`
    pub root: String,
    /// tag -> `/ipns/<name>/<index>/<file>`
    pub ipns: BTreeMap<String, String>,
    /// tag -> `/ipfs/<cid>`
    pub ipfs: BTreeMap<String, String>,
}

impl MetaEnvelope {
    /// Build the envelope for `index` from the hashes of the whole records root.
    ///
    /// `hashes` is keyed by root-relative path (`/<index>/<file>`), as produced
    /// by [`hash_tree`](crate::publish::hash_tree).
    pub fn build(
        index: LedgerIndex,
        header: &LedgerHeader,
        name: &str,
        hashes: &BTreeMap<String, ContentId>,
    ) -> Self {
        let root = format!("/ipns/{}/{}/", name, index);
        let current_prefix = format!("/{}/", index);

        let mut ipns = BTreeMap::new();
        let mut ipfs = BTreeMap::new();
        let mut historical = BTreeMap::new();

        for (path, id) in hashes {
            match path.strip_prefix(&current_prefix) {
                Some(file) => {
                    let tag = file.strip_suffix(".json").unwrap_or(file).to_string();
                    ipns.insert(tag.clone(), format!("{}{}", root, file));
                    ipfs.insert(tag, format!("/ipfs/{}", id));
                }
                None => {
                    historical.insert(path.clone(), id.clone());
                }
            }
        }

        Self {
            current: CurrentIndex {
                ledger: header.clone(),
                root,
                ipns,
                ipfs,
            },
            historical,
        }
    }

    /// Write the envelope to `<records_root>/meta.json`
    pub async fn write(&self, records_root: &Path) -> Result<PathBuf> {
        let path = records_root.join(META_FILE);
        let body = serde_json::to_vec_pretty(self)?;
        fs::write(&path, body)
            .await
            .map_err(|e| Error::storage(format!("Failed to write {}: {}", path.display(), e)))?;
        debug!("wrote {}", path.display());
        Ok(path)
    }
}

/// Remove index directories below `records_root` last modified more than
/// `max_age` ago.
///
/// Only directories are considered; root-level files (`meta.json`, root
/// copies of tag files) are left alone. A missing root prunes nothing.
///
/// # Returns
///
/// The removed directories.
pub async fn prune_index_dirs(records_root: &Path, max_age: Duration) -> Result<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(records_root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(Error::storage(format!(
                "Failed to read records directory {}: {}",
                records_root.display(),
                e
            )));
        }
    };

    let now = SystemTime::now();
    let mut removed = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("cannot stat {}: {}", entry.path().display(), e);
                continue;
            }
        };
        if !metadata.is_dir() {
            continue;
        }

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age <= max_age {
            continue;
        }

        let path = entry.path();
        fs::remove_dir_all(&path).await.map_err(|e| {
            Error::storage(format!("Failed to remove {}: {}", path.display(), e))
        })?;
        info!("removed aged directory: {}", path.display());
        removed.push(path);
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tempfile::tempdir;

    fn hashes() -> BTreeMap<String, ContentId> {
        BTreeMap::from([
            ("/100/http.json".to_string(), ContentId::new("QmHttp100")),
            ("/100/header.json".to_string(), ContentId::new("QmHeader100")),
            ("/99/http.json".to_string(), ContentId::new("QmHttp99")),
            ("/1000/http.json".to_string(), ContentId::new("QmHttp1000")),
        ])
    }

    #[test]
    fn test_current_and_historical_split() {
        let header = LedgerHeader(json!({ "closed": true }));
        let meta = MetaEnvelope::build(100, &header, "k51name", &hashes());

        assert_eq!(meta.current.root, "/ipns/k51name/100/");
        assert_eq!(
            meta.current.ipns.get("http").map(String::as_str),
            Some("/ipns/k51name/100/http.json")
        );
        assert_eq!(
            meta.current.ipfs.get("header").map(String::as_str),
            Some("/ipfs/QmHeader100")
        );
        // "/1000/" must not be mistaken for index 100
        assert_eq!(meta.historical.len(), 2);
        assert!(meta.historical.contains_key("/1000/http.json"));
        assert!(meta.historical.contains_key("/99/http.json"));
    }

    #[tokio::test]
    async fn test_write_envelope() {
        let dir = tempdir().unwrap();
        let header = LedgerHeader(json!({ "closed": true, "ledger_hash": "AB" }));
        let meta = MetaEnvelope::build(100, &header, "k51name", &hashes());

        let path = meta.write(dir.path()).await.unwrap();
        let stored: Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(stored["current"]["ledger"]["ledger_hash"], "AB");
        assert_eq!(stored["historical"]["/99/http.json"], "QmHttp99");
    }

    #[tokio::test]
    async fn test_prune_keeps_fresh_dirs_and_files() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("100")).unwrap();
        std::fs::write(dir.path().join(META_FILE), b"{}").unwrap();

        let removed = prune_index_dirs(dir.path(), Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(removed.is_empty());
        assert!(dir.path().join("100").exists());
    }

    #[tokio::test]
    async fn test_prune_removes_aged_dirs() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("99")).unwrap();
        std::fs::write(dir.path().join("99").join("http.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("http.json"), b"{}").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let removed = prune_index_dirs(dir.path(), Duration::ZERO).await.unwrap();
        assert_eq!(removed, vec![dir.path().join("99")]);
        assert!(dir.path().join("http.json").exists());
    }

    #[tokio::test]
    async fn test_prune_missing_root() {
        let dir = tempdir().unwrap();
        let removed = prune_index_dirs(&dir.path().join("absent"), Duration::ZERO)
            .await
            .unwrap();
        assert!(removed.is_empty());
    }
}
