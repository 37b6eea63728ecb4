// # File Pin Store
//
// File-based implementation of PinStore.
//
// ## File Format
//
// A single JSON object mapping content identifiers to the epoch second at
// which they may be unpinned:
//
// ```json
// {
//   "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG": 1736424000,
//   "QmT78zSuBmuS4z925WZfrqQ1qHaJ56DQaTfyMUF7F8ff5o": 1736425620
// }
// ```
//
// ## Crash Behavior
//
// - Atomic writes: the table is written to `<path>.tmp`, then renamed
// - A missing file is an empty table
// - A file that does not parse is logged and treated as an empty table; it is
//   replaced on the next save

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::Error;
use crate::traits::pin_store::{PinStore, PinTable};

/// File-based pin store
///
/// # Example
///
/// ```rust,no_run
/// use ledger_index_core::state::FilePinStore;
/// use ledger_index_core::traits::PinStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FilePinStore::new("/var/lib/ledger-index/pins.json").await?;
///
///     let mut table = store.load_or_default().await;
///     table.insert("QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG".into(), 1736424000);
///     store.save(&table).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct FilePinStore {
    path: PathBuf,
}

impl FilePinStore {
    /// Create a file pin store, creating parent directories if needed
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create pin state directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        Ok(Self { path })
    }

    /// Path of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<PinTable, Error> {
        if !self.path.exists() {
            tracing::debug!("Pin state file does not exist: {}", self.path.display());
            return Ok(PinTable::new());
        }

        let content = fs::read_to_string(&self.path).await.map_err(|e| {
            Error::storage(format!(
                "Failed to read pin state file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            Error::storage(format!(
                "Failed to parse pin state file {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }
}

#[async_trait]
impl PinStore for FilePinStore {
    async fn load_or_default(&self) -> PinTable {
        match self.load().await {
            Ok(table) => {
                tracing::debug!("Loaded pin state: {} pins", table.len());
                table
            }
            Err(e) => {
                tracing::warn!("{}. Starting with empty pin state.", e);
                PinTable::new()
            }
        }
    }

    async fn save(&self, table: &PinTable) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(table)
            .map_err(|e| Error::storage(format!("Failed to serialize pin state: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::storage(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::storage(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.flush().await.map_err(|e| {
                Error::storage(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::storage(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Pin state written to {}", self.path.display());
        Ok(())
    }
}
