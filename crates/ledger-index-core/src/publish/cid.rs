//! Content identifiers
//!
//! Identifiers are CIDv0 strings: base58btc of a sha2-256 multihash over the
//! root block of a UnixFS file DAG. The DAG is built exactly as an IPFS node
//! builds it by default, so an identifier computed here for a file equals the
//! one the node reports after adding the same bytes:
//!
//! - fixed 256 KiB chunks, each wrapped in a dag-pb leaf
//! - balanced layout, at most 174 links per node
//! - a single-chunk file is just its leaf

use prost::Message;
use prost::encoding::{WireType, encode_key, encode_varint};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Chunk size used when splitting file content
pub const CHUNK_SIZE: usize = 262_144;

/// Maximum number of links per DAG node
pub const MAX_LINKS: usize = 174;

/// Multihash code for sha2-256
const SHA2_256: u8 = 0x12;

/// UnixFS node type for file content
const UNIXFS_FILE: i32 = 2;

/// Identifier of a file, directory, or pinned object
///
/// Treated as an opaque string: identifiers reported by the content store are
/// accepted as-is, whatever their version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    /// Wrap an identifier string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_multihash(multihash: &[u8]) -> Self {
        Self(bs58::encode(multihash).into_string())
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ContentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ContentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// UnixFS `Data` message
#[derive(Clone, PartialEq, Message)]
struct UnixFsData {
    #[prost(int32, required, tag = "1")]
    kind: i32,
    #[prost(bytes = "vec", optional, tag = "2")]
    data: Option<Vec<u8>>,
    #[prost(uint64, optional, tag = "3")]
    filesize: Option<u64>,
    #[prost(uint64, repeated, packed = "false", tag = "4")]
    blocksizes: Vec<u64>,
}

/// A finished DAG node, as seen by its parent
struct DagNode {
    multihash: Vec<u8>,
    /// Bytes of file content below this node
    file_size: u64,
    /// Encoded block size plus the cumulative size of everything it links to
    cumulative_size: u64,
}

/// Compute the identifier the content store would assign to `bytes`
pub fn content_id_of(bytes: &[u8]) -> ContentId {
    let mut level: Vec<DagNode> = if bytes.is_empty() {
        vec![leaf(bytes)]
    } else {
        bytes.chunks(CHUNK_SIZE).map(leaf).collect()
    };

    while level.len() > 1 {
        level = level.chunks(MAX_LINKS).map(parent).collect();
    }

    // `level` always holds exactly one node here
    let root = level.swap_remove(0);
    ContentId::from_multihash(&root.multihash)
}

fn leaf(chunk: &[u8]) -> DagNode {
    let unixfs = UnixFsData {
        kind: UNIXFS_FILE,
        data: (!chunk.is_empty()).then(|| chunk.to_vec()),
        filesize: Some(chunk.len() as u64),
        blocksizes: Vec::new(),
    };

    let mut block = Vec::with_capacity(chunk.len() + 16);
    put_bytes(1, &unixfs.encode_to_vec(), &mut block);

    DagNode {
        multihash: multihash(&block),
        file_size: chunk.len() as u64,
        cumulative_size: block.len() as u64,
    }
}

fn parent(children: &[DagNode]) -> DagNode {
    let file_size = children.iter().map(|c| c.file_size).sum();
    let unixfs = UnixFsData {
        kind: UNIXFS_FILE,
        data: None,
        filesize: Some(file_size),
        blocksizes: children.iter().map(|c| c.file_size).collect(),
    };

    // dag-pb writes Links (field 2) before Data (field 1)
    let mut block = Vec::new();
    for child in children {
        let mut link = Vec::with_capacity(48);
        put_bytes(1, &child.multihash, &mut link);
        put_bytes(2, b"", &mut link);
        encode_key(3, WireType::Varint, &mut link);
        encode_varint(child.cumulative_size, &mut link);
        put_bytes(2, &link, &mut block);
    }
    put_bytes(1, &unixfs.encode_to_vec(), &mut block);

    let linked: u64 = children.iter().map(|c| c.cumulative_size).sum();
    DagNode {
        multihash: multihash(&block),
        file_size,
        cumulative_size: block.len() as u64 + linked,
    }
}

fn put_bytes(tag: u32, value: &[u8], buf: &mut Vec<u8>) {
    encode_key(tag, WireType::LengthDelimited, buf);
    encode_varint(value.len() as u64, buf);
    buf.extend_from_slice(value);
}

fn multihash(block: &[u8]) -> Vec<u8> {
    let digest = Sha256::digest(block);
    let mut out = Vec::with_capacity(2 + digest.len());
    out.push(SHA2_256);
    out.push(digest.len() as u8);
    out.extend_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file() {
        assert_eq!(
            content_id_of(b"").as_str(),
            "QmbFMke1KXqnYyBBWxB74N4c5SBnJMVAiMNRcGu6x1AwQH"
        );
    }

    #[test]
    fn test_small_file() {
        assert_eq!(
            content_id_of(b"hello world\n").as_str(),
            "QmT78zSuBmuS4z925WZfrqQ1qHaJ56DQaTfyMUF7F8ff5o"
        );
    }

    #[test]
    fn test_same_bytes_same_id() {
        let body = br#"{"index":100,"prefix":"687474703A","records":[{"rA":"687474703A2F2F"}]}"#;
        assert_eq!(content_id_of(body), content_id_of(&body.to_vec()));
    }

    #[test]
    fn test_single_byte_change() {
        let mut body = vec![b'a'; 1024];
        let before = content_id_of(&body);
        body[512] = b'b';
        assert_ne!(before, content_id_of(&body));
    }

    #[test]
    fn test_multi_chunk_file() {
        let mut body = vec![0u8; CHUNK_SIZE * 2 + 10];
        let id = content_id_of(&body);
        assert!(id.as_str().starts_with("Qm"));
        assert_eq!(id.as_str().len(), 46);

        // A change in the last chunk alters the root
        let last = body.len() - 1;
        body[last] = 1;
        assert_ne!(id, content_id_of(&body));

        // The root is not just the first chunk's leaf
        assert_ne!(id, content_id_of(&body[..CHUNK_SIZE]));
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = ContentId::new("QmKeep");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"QmKeep\"");
        assert_eq!(id.to_string(), "QmKeep");
    }
}
