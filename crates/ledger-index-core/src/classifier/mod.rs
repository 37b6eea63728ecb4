//! Domain service-discovery classifier
//!
//! Account `Domain` fields carry hex-encoded ASCII. Accounts advertising a
//! service put a scheme-like prefix there (`ipfs:`, `http:`, `@xnft:` ...).
//! [`ServiceTable`] maps a domain's hex string to the first table entry whose
//! hex prefix it starts with. Table order decides ties, not prefix length.
//! Anything unmatched lands in the catch-all `debug` bucket.

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Tag of the catch-all bucket
pub const DEBUG_TAG: &str = "debug";

/// Hex of `debug`, used as the catch-all bucket's prefix
pub const DEBUG_PREFIX: &str = "6465627567";

/// Protocol and service prefixes, in match order
const STANDARD_SERVICES: &[(&str, &str)] = &[
    // Protocol addresses
    ("bith", "626974683A"),
    ("callto", "63616C6C746F3A"),
    ("ftp", "6674703A"),
    ("http", "687474703A"),
    ("ilp", "696C703A"),
    ("ipfs", "697066733A"),
    ("mailto", "6D61696C746F3A"),
    ("pay", "7061793A"),
    ("paystring", "706179737472696E673A"),
    ("ws", "57533A"),
    ("wss", "5753533A"),
    // Service objects
    ("data", "40646174613A"),
    ("xapp", "40786170703A"),
    ("xdns", "4078646E733A"),
    ("xmplc", "40786D706C633A"),
    ("xndxr", "40786E6478723A"),
    ("xnft", "40786E66743A"),
    ("xrp-ledger-tom", "407872702D6C65646765722D746F6D3A"),
    ("xumm", "4078756D6D3A"),
    (DEBUG_TAG, DEBUG_PREFIX),
];

/// An account whose ledger entry carries a non-empty `Domain` field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredRecord {
    /// Account address
    pub account: String,
    /// Raw hex of the `Domain` field, as the ledger returned it
    pub domain_hex: String,
}

impl DiscoveredRecord {
    pub fn new(account: impl Into<String>, domain_hex: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            domain_hex: domain_hex.into(),
        }
    }
}

// On disk a record is a single-entry object: `{"<account>": "<domain hex>"}`
impl Serialize for DiscoveredRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.account, &self.domain_hex)?;
        map.end()
    }
}

/// One classification rule: a human-readable tag and its hex prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    /// File-name friendly tag (`http` -> `http.json`)
    pub tag: String,
    /// Uppercase hex of the ASCII prefix
    pub prefix: String,
}

impl ServiceEntry {
    pub fn new(tag: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            prefix: prefix.into().to_ascii_uppercase(),
        }
    }

    // Exact match: the node reports Domain in uppercase hex
    fn matches(&self, domain_hex: &str) -> bool {
        domain_hex.starts_with(&self.prefix)
    }
}

/// Records sharing one classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceBucket {
    pub tag: String,
    pub prefix: String,
    pub records: Vec<DiscoveredRecord>,
}

/// Ordered prefix table plus catch-all
#[derive(Debug, Clone)]
pub struct ServiceTable {
    entries: Vec<ServiceEntry>,
    fallback: ServiceEntry,
}

impl ServiceTable {
    /// Build a table from entries in match order
    pub fn new(entries: Vec<ServiceEntry>) -> Self {
        Self {
            entries,
            fallback: ServiceEntry::new(DEBUG_TAG, DEBUG_PREFIX),
        }
    }

    /// The standard protocol/service table
    pub fn standard() -> Self {
        Self::new(
            STANDARD_SERVICES
                .iter()
                .map(|(tag, prefix)| ServiceEntry::new(*tag, *prefix))
                .collect(),
        )
    }

    /// Entries in match order (catch-all excluded)
    pub fn entries(&self) -> &[ServiceEntry] {
        &self.entries
    }

    /// Classify one domain hex string. First matching entry wins.
    pub fn classify(&self, domain_hex: &str) -> &ServiceEntry {
        self.entries
            .iter()
            .find(|entry| entry.matches(domain_hex))
            .unwrap_or(&self.fallback)
    }

    /// Tag for a bucket prefix, if the table knows it
    pub fn tag_for_prefix(&self, prefix: &str) -> Option<&str> {
        self.entries
            .iter()
            .chain(std::iter::once(&self.fallback))
            .find(|entry| entry.prefix.eq_ignore_ascii_case(prefix))
            .map(|entry| entry.tag.as_str())
    }

    /// Classify every record and group them into buckets.
    ///
    /// Buckets come out in table order (catch-all last); records keep their
    /// input order within a bucket. Empty buckets are omitted.
    pub fn bucket(&self, records: &[DiscoveredRecord]) -> Vec<ServiceBucket> {
        let mut buckets: Vec<ServiceBucket> = Vec::new();

        for record in records {
            let entry = self.classify(&record.domain_hex);
            match buckets.iter_mut().find(|b| b.prefix == entry.prefix) {
                Some(bucket) => bucket.records.push(record.clone()),
                None => buckets.push(ServiceBucket {
                    tag: entry.tag.clone(),
                    prefix: entry.prefix.clone(),
                    records: vec![record.clone()],
                }),
            }
        }

        let order = |prefix: &str| {
            self.entries
                .iter()
                .position(|e| e.prefix == prefix)
                .unwrap_or(self.entries.len())
        };
        buckets.sort_by_key(|b| order(&b.prefix));
        buckets
    }
}

impl Default for ServiceTable {
    fn default() -> Self {
        Self::standard()
    }
}
