//! Settings repository implementation

use chrono::{DateTime, Utc};
use libsql::Connection;

use crate::error::Result;
use crate::models::SyncSettings;
use crate::util::{parse_iso8601, to_iso8601};

const LAST_SYNC_TIME_KEY: &str = "last_sync_time";

/// Trait for settings storage operations (async)
#[allow(async_fn_in_trait)]
pub trait SettingsRepository {
    /// Load settings from the database
    async fn load(&self) -> Result<SyncSettings>;

    /// Save settings to the database
    async fn save(&self, settings: &SyncSettings) -> Result<()>;

    /// Move the sync cursor forward; returns the cursor now stored
    async fn advance_cursor(&self, candidate: DateTime<Utc>) -> Result<Option<DateTime<Utc>>>;
}

/// libSQL implementation of `SettingsRepository`
pub struct LibSqlSettingsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSettingsRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SettingsRepository for LibSqlSettingsRepository<'_> {
    async fn load(&self) -> Result<SyncSettings> {
        let mut settings = SyncSettings::default();

        if let Some(value) = self.get_setting(LAST_SYNC_TIME_KEY).await? {
            settings.last_sync_time = parse_iso8601(&value);
            if settings.last_sync_time.is_none() {
                tracing::warn!("Ignoring unparseable {LAST_SYNC_TIME_KEY} value '{value}'");
            }
        }

        Ok(settings)
    }

    async fn save(&self, settings: &SyncSettings) -> Result<()> {
        match settings.last_sync_time {
            Some(timestamp) => {
                self.set_setting(LAST_SYNC_TIME_KEY, &to_iso8601(timestamp))
                    .await
            }
            None => self.remove_setting(LAST_SYNC_TIME_KEY).await,
        }
    }

    async fn advance_cursor(&self, candidate: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let mut settings = self.load().await?;
        if settings.advance_cursor(candidate) {
            self.save(&settings).await?;
        }
        Ok(settings.last_sync_time)
    }
}

impl LibSqlSettingsRepository<'_> {
    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM settings WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
                [key, value],
            )
            .await?;
        Ok(())
    }

    async fn remove_setting(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM settings WHERE key = ?", [key])
            .await?;
        Ok(())
    }
}
