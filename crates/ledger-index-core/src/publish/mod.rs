//! Content-addressed publication
//!
//! - [`cid`]: content identifiers computed locally, matching the store's
//! - [`publisher`]: tree hashing, upload, and mutable-name publication
//! - [`metadata`]: the `meta.json` envelope and index directory pruning

pub mod cid;
pub mod metadata;
pub mod publisher;

pub use cid::{ContentId, content_id_of};
pub use metadata::{META_FILE, MetaEnvelope, prune_index_dirs};
pub use publisher::{PublishOutcome, SnapshotPublisher, hash_tree};
