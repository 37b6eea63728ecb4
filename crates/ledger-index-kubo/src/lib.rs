// # Kubo Content Store
//
// This crate provides the `ContentStore` implementation for a Kubo (go-ipfs)
// node, over its RPC API.
//
// ## Behavior
//
// - One HTTP request per trait call; no retries, no caching
// - Every RPC command is a `POST /api/v0/<command>` with query arguments
// - Errors are mapped by status: 401/403 authentication, 404 unsupported
//   command, 500 with a "not pinned" message becomes `Error::NotFound`,
//   anything else is a publish error the engine logs and retries next cycle
//
// ## API Reference
//
// - `version`
// - `add` (multipart directory upload, pinned, CIDv0)
// - `name/publish?arg=/ipfs/<cid>&key=<name>&lifetime&ttl&resolve&allow-offline`
// - `pin/ls`, `pin/rm?arg=<cid>`
// - `key/list`, `key/gen?arg=<name>&type&size`

use async_trait::async_trait;
use ledger_index_core::config::IpfsNodeConfig;
use ledger_index_core::publish::ContentId;
use ledger_index_core::traits::{
    AddedContent, ContentStore, KeyInfo, KeySpec, NameOptions, PinInfo, PinKind, PublishedName,
};
use ledger_index_core::{Error, Result};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Store name used in logs and errors
const STORE: &str = "kubo";

/// Default HTTP timeout for RPC calls (60 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Kubo RPC content store
pub struct KuboStore {
    /// Base URL of the RPC API, without `/api/v0`
    api_url: String,

    /// HTTP client for RPC calls
    client: reqwest::Client,
}

impl std::fmt::Debug for KuboStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KuboStore")
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl KuboStore {
    /// Create a store talking to `api_url` (e.g. `http://127.0.0.1:5001`)
    ///
    /// # Returns
    ///
    /// - `Ok(KuboStore)`: Client built
    /// - `Err(Error::Config)`: Empty URL or the HTTP client could not be built
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        if api_url.is_empty() {
            return Err(Error::config("Kubo API URL cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { api_url, client })
    }

    /// Create a store from the `ipfsnode` configuration section
    pub fn from_config(config: &IpfsNodeConfig) -> Result<Self> {
        let timeout = if config.timeout_ms == 0 {
            DEFAULT_HTTP_TIMEOUT
        } else {
            config.timeout()
        };
        Self::new(config.api_url(), timeout)
    }

    fn command_url(&self, command: &str) -> String {
        format!("{}/api/v0/{}", self.api_url, command)
    }

    /// Call `command` and return the response body
    async fn call(&self, command: &str, query: &[(&str, String)]) -> Result<String> {
        tracing::debug!("kubo rpc: {}", command);
        let response = self
            .client
            .post(self.command_url(command))
            .query(query)
            .send()
            .await
            .map_err(|e| Error::publish(STORE, format!("{} request failed: {}", command, e)))?;

        read_body(command, response).await
    }
}

async fn read_body(command: &str, response: reqwest::Response) -> Result<String> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| Error::publish(STORE, format!("{} response unreadable: {}", command, e)))?;

    if status.is_success() {
        Ok(body)
    } else {
        Err(status_error(command, status, &body))
    }
}

/// Kubo's error envelope
#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "Message")]
    message: String,
}

fn status_error(command: &str, status: reqwest::StatusCode, body: &str) -> Error {
    let message = serde_json::from_str::<ApiError>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.trim().to_string());

    match status.as_u16() {
        401 | 403 => Error::publish(
            STORE,
            format!("{} rejected: authentication required. Status: {}", command, status),
        ),
        404 => Error::publish(
            STORE,
            format!("{} is not supported by this node. Status: {}", command, status),
        ),
        _ if message.contains("not pinned") => Error::not_found(message),
        _ => Error::publish(STORE, format!("{} failed: {} - {}", command, status, message)),
    }
}

fn parse<T: for<'de> Deserialize<'de>>(command: &str, body: &str) -> Result<T> {
    serde_json::from_str(body)
        .map_err(|e| Error::publish(STORE, format!("{} response malformed: {}", command, e)))
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    #[serde(rename = "Version")]
    version: String,
}

#[derive(Debug, Deserialize)]
struct NameResponse {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value")]
    value: String,
}

#[derive(Debug, Deserialize)]
struct KeyEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Id")]
    id: String,
}

impl From<KeyEntry> for KeyInfo {
    fn from(entry: KeyEntry) -> Self {
        KeyInfo {
            name: entry.name,
            id: entry.id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct KeyListResponse {
    #[serde(rename = "Keys", default)]
    keys: Vec<KeyEntry>,
}

#[derive(Debug, Deserialize)]
struct PinEntry {
    #[serde(rename = "Type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct PinListResponse {
    #[serde(rename = "Keys", default)]
    keys: BTreeMap<String, PinEntry>,
}

/// Root entry of an `add` response: the last NDJSON line
fn parse_add_output(body: &str) -> Result<AddedContent> {
    let last = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .ok_or_else(|| Error::publish(STORE, "add returned no entries"))?;

    let entry: Value = parse("add", last)?;
    let root = entry["Hash"]
        .as_str()
        .ok_or_else(|| Error::publish(STORE, "add response has no Hash"))?;
    // Size is a decimal string in current releases, a number in older ones
    let size = match &entry["Size"] {
        Value::String(s) => s.parse().unwrap_or(0),
        Value::Number(n) => n.as_u64().unwrap_or(0),
        _ => 0,
    };

    Ok(AddedContent {
        root: ContentId::new(root),
        size,
        path: entry["Name"].as_str().unwrap_or_default().to_string(),
    })
}

fn parse_pins(body: &str) -> Result<Vec<PinInfo>> {
    let list: PinListResponse = parse("pin/ls", body)?;
    list.keys
        .into_iter()
        .map(|(id, entry)| {
            let kind = match entry.kind.as_str() {
                "recursive" => PinKind::Recursive,
                "direct" => PinKind::Direct,
                "indirect" => PinKind::Indirect,
                other => {
                    return Err(Error::publish(
                        STORE,
                        format!("pin/ls returned unknown pin type '{}'", other),
                    ));
                }
            };
            Ok(PinInfo {
                id: ContentId::new(id),
                kind,
            })
        })
        .collect()
}

/// One part of a directory upload
#[derive(Debug, Clone, PartialEq, Eq)]
enum UploadEntry {
    Directory { name: String },
    File { name: String, path: PathBuf },
}

/// Walk `dir` depth-first, parents before children, siblings sorted by name.
///
/// Names are relative to the parent of `dir`, so the first entry is the
/// directory itself and becomes the root of the upload.
async fn upload_entries(dir: &Path) -> Result<Vec<UploadEntry>> {
    let root_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::storage(format!("cannot upload {}: no directory name", dir.display())))?;

    let mut entries = Vec::new();
    let mut stack = vec![(dir.to_path_buf(), root_name)];

    while let Some((path, name)) = stack.pop() {
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| Error::storage(format!("cannot read {}: {}", path.display(), e)))?;

        if !metadata.is_dir() {
            entries.push(UploadEntry::File { name, path });
            continue;
        }

        let mut children = Vec::new();
        let mut listing = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| Error::storage(format!("cannot list {}: {}", path.display(), e)))?;
        while let Some(child) = listing.next_entry().await? {
            let child_name = child.file_name().to_string_lossy().into_owned();
            children.push((child.path(), format!("{}/{}", name, child_name)));
        }
        children.sort();

        entries.push(UploadEntry::Directory { name });
        stack.extend(children.into_iter().rev());
    }

    Ok(entries)
}

async fn upload_form(entries: Vec<UploadEntry>) -> Result<Form> {
    let mut form = Form::new();
    for entry in entries {
        let part = match entry {
            UploadEntry::Directory { name } => Part::bytes(Vec::new())
                .file_name(name)
                .mime_str("application/x-directory"),
            UploadEntry::File { name, path } => {
                let body = tokio::fs::read(&path).await?;
                Part::bytes(body)
                    .file_name(name)
                    .mime_str("application/octet-stream")
            }
        }
        .map_err(|e| Error::publish(STORE, format!("cannot build upload: {}", e)))?;
        form = form.part("file", part);
    }
    Ok(form)
}

#[async_trait]
impl ContentStore for KuboStore {
    async fn version(&self) -> Result<String> {
        let body = self.call("version", &[]).await?;
        let version: VersionResponse = parse("version", &body)?;
        Ok(version.version)
    }

    async fn add_directory(&self, dir: &Path) -> Result<AddedContent> {
        let entries = upload_entries(dir).await?;
        tracing::debug!("uploading {} entries from {}", entries.len(), dir.display());
        let form = upload_form(entries).await?;

        let response = self
            .client
            .post(self.command_url("add"))
            .query(&[
                ("pin", "true"),
                ("cid-version", "0"),
                ("wrap-with-directory", "false"),
            ])
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::publish(STORE, format!("add request failed: {}", e)))?;

        let body = read_body("add", response).await?;
        let added = parse_add_output(&body)?;
        tracing::info!("added {} as {} ({} bytes)", dir.display(), added.root, added.size);
        Ok(added)
    }

    async fn publish_name(&self, root: &ContentId, options: &NameOptions) -> Result<PublishedName> {
        let query = [
            ("arg", format!("/ipfs/{}", root)),
            ("resolve", options.resolve.to_string()),
            ("lifetime", options.lifetime.clone()),
            ("ttl", options.ttl.clone()),
            ("key", options.key.clone()),
            ("allow-offline", options.allow_offline.to_string()),
        ];
        let body = self.call("name/publish", &query).await?;
        let published: NameResponse = parse("name/publish", &body)?;
        Ok(PublishedName {
            name: published.name,
            value: published.value,
        })
    }

    async fn list_pins(&self) -> Result<Vec<PinInfo>> {
        let body = self.call("pin/ls", &[("type", "all".to_string())]).await?;
        parse_pins(&body)
    }

    async fn remove_pin(&self, id: &ContentId) -> Result<()> {
        self.call("pin/rm", &[("arg", id.to_string())]).await?;
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<KeyInfo>> {
        let body = self.call("key/list", &[]).await?;
        let list: KeyListResponse = parse("key/list", &body)?;
        Ok(list.keys.into_iter().map(KeyInfo::from).collect())
    }

    async fn generate_key(&self, name: &str, spec: &KeySpec) -> Result<KeyInfo> {
        let query = [
            ("arg", name.to_string()),
            ("type", spec.kind.clone()),
            ("size", spec.size.to_string()),
        ];
        let body = self.call("key/gen", &query).await?;
        let key: KeyEntry = parse("key/gen", &body)?;
        Ok(key.into())
    }

    fn store_name(&self) -> &'static str {
        STORE
    }
}
