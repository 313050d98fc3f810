//! Persisted sync settings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Process-wide sync settings row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    /// Completion time of the last successful full sync (the cursor)
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl SyncSettings {
    /// Move the cursor forward; earlier candidates are ignored.
    ///
    /// Returns `true` when the cursor changed.
    pub fn advance_cursor(&mut self, candidate: DateTime<Utc>) -> bool {
        match self.last_sync_time {
            Some(current) if current >= candidate => false,
            _ => {
                self.last_sync_time = Some(candidate);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = SyncSettings::default();
        assert!(settings.last_sync_time.is_none());
    }

    #[test]
    fn cursor_never_moves_backwards() {
        let now = Utc::now();
        let mut settings = SyncSettings::default();
        assert!(settings.advance_cursor(now));
        assert!(!settings.advance_cursor(now - chrono::Duration::seconds(1)));
        assert!(!settings.advance_cursor(now));
        assert_eq!(settings.last_sync_time, Some(now));
    }
}
