//! Per-index snapshot files
//!
//! Layout under the records root:
//!
//! ```text
//! <root>/<index>/<tag>.json    {"index": .., "prefix": "..", "records": [{"<account>": "<domain hex>"}, ..]}
//! <root>/<index>/header.json   raw ledger header, pretty-printed
//! <root>/<tag>.json            latest copy of each tag file (root_copy only)
//! ```

use crate::classifier::{DiscoveredRecord, ServiceBucket};
use crate::error::{Error, Result};
use crate::ledger::protocol::{LedgerHeader, LedgerIndex};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Name of the header file written into every index directory
pub const HEADER_FILE: &str = "header.json";

#[derive(Serialize)]
struct TagFile<'a> {
    index: LedgerIndex,
    prefix: &'a str,
    records: &'a [DiscoveredRecord],
}

/// Writes completed snapshots below the records root
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    root: PathBuf,
    root_copy: bool,
}

impl SnapshotWriter {
    /// Create a writer for `root`
    ///
    /// With `root_copy`, every tag file is also copied to the root itself so
    /// the newest file for each tag has a fixed path.
    pub fn new(root: impl Into<PathBuf>, root_copy: bool) -> Self {
        Self {
            root: root.into(),
            root_copy,
        }
    }

    /// Records root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the files for `index`
    pub fn index_dir(&self, index: LedgerIndex) -> PathBuf {
        self.root.join(index.to_string())
    }

    /// Write one tag file per bucket plus `header.json`.
    ///
    /// # Returns
    ///
    /// The index directory.
    pub async fn write(
        &self,
        index: LedgerIndex,
        buckets: &[ServiceBucket],
        header: &LedgerHeader,
    ) -> Result<PathBuf> {
        let dir = self.index_dir(index);
        fs::create_dir_all(&dir).await.map_err(|e| {
            Error::storage(format!(
                "Failed to create records directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        info!("created records destination: '{}'", dir.display());

        for bucket in buckets {
            let file_name = format!("{}.json", bucket.tag);
            let path = dir.join(&file_name);
            let body = serde_json::to_vec(&TagFile {
                index,
                prefix: &bucket.prefix,
                records: &bucket.records,
            })?;

            info!("index {} writing {}", index, path.display());
            write_file(&path, &body).await?;

            if self.root_copy {
                let copy = self.root.join(&file_name);
                debug!("copying {} to {}", path.display(), copy.display());
                fs::copy(&path, &copy).await.map_err(|e| {
                    Error::storage(format!(
                        "Failed to copy {} to {}: {}",
                        path.display(),
                        copy.display(),
                        e
                    ))
                })?;
            }
        }

        let header_path = dir.join(HEADER_FILE);
        debug!("writing {} for index {}", header_path.display(), index);
        write_file(&header_path, &serde_json::to_vec_pretty(header)?).await?;

        Ok(dir)
    }
}

async fn write_file(path: &Path, body: &[u8]) -> Result<()> {
    fs::write(path, body)
        .await
        .map_err(|e| Error::storage(format!("Failed to write {}: {}", path.display(), e)))
}
