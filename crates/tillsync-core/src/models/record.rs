//! Record model and the last-write-wins rule

use chrono::{DateTime, SubsecRound, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A synchronized record.
///
/// The core never interprets `payload`; it is stored and shipped as-is.
/// Tables with a known shape can use a typed `Record<P>` at the edges via
/// [`Record::decode`] and [`Record::encode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record<P = Value> {
    /// Identifier, unique within its table
    pub id: String,
    /// Opaque business payload
    pub payload: P,
    /// Last modification time, the sole LWW ordering key
    pub updated_at: DateTime<Utc>,
}

impl<P> Record<P> {
    /// Create a record, rejecting empty ids.
    ///
    /// `updated_at` is truncated to microseconds, the precision both the local
    /// store and the remote keep.
    pub fn new(id: impl Into<String>, payload: P, updated_at: DateTime<Utc>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::InvalidInput("record id must not be empty".into()));
        }
        Ok(Self {
            id,
            payload,
            updated_at: updated_at.trunc_subsecs(6),
        })
    }

    /// Strict LWW comparison: `true` only when `self` is newer than `other`.
    pub fn supersedes<Q>(&self, other: &Record<Q>) -> bool {
        self.updated_at > other.updated_at
    }
}

impl<P: Serialize> Record<P> {
    /// Erase the payload type for storage or transport.
    pub fn encode(&self) -> Result<Record> {
        Ok(Record {
            id: self.id.clone(),
            payload: serde_json::to_value(&self.payload)?,
            updated_at: self.updated_at,
        })
    }
}

impl Record {
    /// Validate and view the payload as a concrete table type.
    pub fn decode<P: DeserializeOwned>(&self) -> Result<Record<P>> {
        Ok(Record {
            id: self.id.clone(),
            payload: serde_json::from_value(self.payload.clone())?,
            updated_at: self.updated_at,
        })
    }
}

/// Outcome of applying an incoming version against local state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LwwDecision {
    /// Incoming version written (no local copy, or strictly newer)
    Applied,
    /// Local copy is newer or equally new; kept unchanged
    KeptLocal,
    /// A local tombstone at least as new as the incoming version
    Tombstoned,
}

/// Decide whether an incoming version replaces local state.
///
/// Ties favour whatever is already stored: the comparison is strictly `>`,
/// against both the live record and any tombstone.
pub fn resolve_lww(
    local: Option<&Record>,
    tombstone: Option<DateTime<Utc>>,
    incoming: &Record,
) -> LwwDecision {
    if let Some(deleted_at) = tombstone {
        if incoming.updated_at <= deleted_at {
            return LwwDecision::Tombstoned;
        }
    }
    match local {
        Some(local) if !incoming.supersedes(local) => LwwDecision::KeptLocal,
        _ => LwwDecision::Applied,
    }
}
