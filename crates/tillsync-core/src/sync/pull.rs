//! Pull pipeline: fetch a user's remote rows as local records.

use chrono::{DateTime, Utc};

use super::{SyncEngine, SyncPass};
use crate::error::{SyncError, SyncResult};
use crate::models::Record;

impl SyncEngine {
    /// Fetch every remote row of `table` owned by `user_id`, optionally only
    /// rows updated after `since`.
    ///
    /// A failed fetch is logged and returned as [`SyncError::Pull`]; nothing is
    /// rescheduled, the table simply stays stale until the next pull.
    pub async fn pull_from_cloud(
        &self,
        table: &str,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<Record>> {
        self.pull_in_pass(table, user_id, since, &SyncPass::standalone())
            .await
    }

    pub(crate) async fn pull_in_pass(
        &self,
        table: &str,
        user_id: &str,
        since: Option<DateTime<Utc>>,
        pass: &SyncPass,
    ) -> SyncResult<Vec<Record>> {
        let (remote, remote_table) = self.target(table, user_id)?;

        let rows = match pass
            .call(
                self.options().request_timeout,
                remote.select(remote_table, user_id, since),
            )
            .await
        {
            Ok(rows) => rows,
            Err(error @ (SyncError::Cancelled | SyncError::LocalStorage(_))) => return Err(error),
            Err(error) => {
                tracing::warn!("Pull failed for {table}: {error}");
                return Err(SyncError::Pull {
                    table: table.to_string(),
                    message: error.to_string(),
                });
            }
        };

        let fetched = rows.len();
        let records = rows
            .into_iter()
            .filter_map(|row| match row.into_record() {
                Ok(record) => Some(record),
                Err(error) => {
                    tracing::warn!("Skipping remote row in {table}: {error}");
                    None
                }
            })
            .collect::<Vec<_>>();

        tracing::debug!("Pulled {} of {fetched} rows for {table}", records.len());
        Ok(records)
    }
}
