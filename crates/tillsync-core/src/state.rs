//! Shared sync state types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse sync state published by the engine for presentation layers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// No remote configured, or the last pass could not reach it
    #[default]
    Offline,
    Syncing,
    Synced,
    Error,
}

impl SyncState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
