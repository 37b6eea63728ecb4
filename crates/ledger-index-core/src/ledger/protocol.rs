//! Ledger node wire protocol
//!
//! Requests are JSON objects with an `id` the node echoes back. The id's tag
//! (the part before `:`) routes the response: `closed` for the latest
//! closed-ledger query, `state` for `ledger_data` pages. State ids also carry
//! the requested index so the client can match a page to its request.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Monotonically increasing ledger sequence number
pub type LedgerIndex = u32;

/// Tag of the closed-ledger query
pub const CLOSED_TAG: &str = "closed";

/// Tag of state-page queries
pub const STATE_TAG: &str = "state";

/// Request id for a state page of `index`
pub fn state_request_id(index: LedgerIndex) -> String {
    format!("{}:{}", STATE_TAG, index)
}

/// Outbound requests
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerRequest {
    /// Latest closed ledger header
    ClosedLedger,
    /// One page of account state
    LedgerData {
        index: LedgerIndex,
        limit: u32,
        marker: Option<Value>,
    },
}

#[derive(Serialize)]
struct ClosedLedgerWire<'a> {
    id: &'a str,
    command: &'a str,
    ledger_index: &'a str,
}

#[derive(Serialize)]
struct LedgerDataWire<'a> {
    id: String,
    command: &'a str,
    ledger_index: LedgerIndex,
    limit: u32,
    binary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    marker: Option<&'a Value>,
}

impl LedgerRequest {
    /// Encode as a JSON text frame
    pub fn to_json(&self) -> crate::Result<String> {
        let text = match self {
            Self::ClosedLedger => serde_json::to_string(&ClosedLedgerWire {
                id: CLOSED_TAG,
                command: "ledger",
                ledger_index: "closed",
            })?,
            Self::LedgerData {
                index,
                limit,
                marker,
            } => serde_json::to_string(&LedgerDataWire {
                id: state_request_id(*index),
                command: "ledger_data",
                ledger_index: *index,
                limit: *limit,
                binary: false,
                marker: marker.as_ref(),
            })?,
        };
        Ok(text)
    }
}

/// Generic response envelope
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Raw ledger header, kept verbatim for `header.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerHeader(pub Value);

impl LedgerHeader {
    /// Whether the node reports this ledger as closed
    pub fn is_closed(&self) -> bool {
        self.0.get("closed").and_then(Value::as_bool).unwrap_or(false)
    }

    /// Close time in the node's human-readable format
    pub fn close_time_human(&self) -> Option<&str> {
        self.0.get("close_time_human").and_then(Value::as_str)
    }

    /// Ledger hash
    pub fn hash(&self) -> Option<&str> {
        self.0
            .get("ledger_hash")
            .or_else(|| self.0.get("hash"))
            .and_then(Value::as_str)
    }
}

/// Result of the closed-ledger query
#[derive(Debug, Clone, Deserialize)]
pub struct ClosedLedger {
    #[serde(deserialize_with = "de_ledger_index")]
    pub ledger_index: LedgerIndex,
    #[serde(default)]
    pub validated: bool,
    pub ledger: LedgerHeader,
}

/// One object from a `ledger_data` page
#[derive(Debug, Clone, Deserialize)]
pub struct StateObject {
    #[serde(rename = "Account", default)]
    pub account: Option<String>,
    #[serde(rename = "Domain", default)]
    pub domain: Option<String>,
}

/// Result of a `ledger_data` query
#[derive(Debug, Clone, Deserialize)]
pub struct StatePage {
    #[serde(deserialize_with = "de_ledger_index")]
    pub ledger_index: LedgerIndex,
    /// Only present on the first page of a snapshot
    #[serde(default)]
    pub ledger: Option<LedgerHeader>,
    #[serde(default)]
    pub state: Vec<StateObject>,
    #[serde(default)]
    pub marker: Option<Value>,
}

/// A routed, successfully parsed response
#[derive(Debug, Clone)]
pub enum LedgerResponse {
    Closed(ClosedLedger),
    State {
        /// Index the page was requested for (from the echoed id)
        requested: Option<LedgerIndex>,
        page: StatePage,
    },
    /// Successful response with an id the client never issues
    Unknown { id: String },
    /// Unsuccessful response; `requested` is set when it answers a state page
    Failed {
        id: String,
        requested: Option<LedgerIndex>,
        reason: String,
    },
}

impl LedgerResponse {
    /// Parse and route one inbound frame.
    ///
    /// The id is read before the status so that a failed page can still be
    /// matched to the index it was requested for.
    ///
    /// # Returns
    ///
    /// - `Ok(LedgerResponse::Failed)`: a well-formed envelope that is not a
    ///   successful response
    /// - `Err(Error::Protocol)`: not JSON, or a successful result missing
    ///   required fields
    pub fn parse(text: &str) -> crate::Result<Self> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| crate::Error::protocol(format!("unparsable frame: {}", e)))?;

        let id = match envelope.id {
            Some(Value::String(id)) => id,
            Some(other) => other.to_string(),
            None => String::from("error"),
        };
        let (tag, target) = match id.split_once(':') {
            Some((tag, target)) => (tag, Some(target)),
            None => (id.as_str(), None),
        };
        let requested = match tag {
            STATE_TAG => target.and_then(|t| t.parse().ok()),
            _ => None,
        };

        if envelope.status.as_deref() != Some("success")
            || envelope.kind.as_deref() != Some("response")
        {
            let reason = format!(
                "status={:?} type={:?} error={:?}",
                envelope.status, envelope.kind, envelope.error
            );
            return Ok(Self::Failed {
                id,
                requested,
                reason,
            });
        }

        let result = envelope
            .result
            .ok_or_else(|| crate::Error::protocol(format!("response '{}' has no result", id)))?;

        match tag {
            CLOSED_TAG => {
                let closed = serde_json::from_value(result).map_err(|e| {
                    crate::Error::protocol(format!("malformed closed-ledger result: {}", e))
                })?;
                Ok(Self::Closed(closed))
            }
            STATE_TAG => {
                let page = serde_json::from_value(result).map_err(|e| {
                    crate::Error::protocol(format!("malformed ledger_data result: {}", e))
                })?;
                Ok(Self::State { requested, page })
            }
            _ => Ok(Self::Unknown { id }),
        }
    }
}

// Nodes report `ledger_index` as a number in some results and a string in others.
fn de_ledger_index<'de, D: Deserializer<'de>>(deserializer: D) -> Result<LedgerIndex, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrString {
        Num(LedgerIndex),
        Str(String),
    }

    match NumOrString::deserialize(deserializer)? {
        NumOrString::Num(n) => Ok(n),
        NumOrString::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}
