//! Per-record ordering of remote writes.

use std::collections::HashSet;
use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::SyncResult;
use crate::services::KeyedLocks;

/// Result of passing a write through the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// The write reached the remote
    Written,
    /// A newer write for the same record already reached the remote
    Superseded,
}

/// Identifies one remote row: `(user_id, table, record_id)`
pub type GateKey = (String, String, String);

fn gate_key(user_id: &str, table: &str, id: &str) -> GateKey {
    (user_id.to_string(), table.to_string(), id.to_string())
}

/// Serializes remote writes per `(user, table, id)` and drops stale ones, so
/// the remote observes each row's writes in non-decreasing timestamp order.
#[derive(Default)]
pub struct WriteGate {
    written: KeyedLocks<GateKey, Option<DateTime<Utc>>>,
}

impl WriteGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `write` unless a newer stamp for the record has already been written.
    ///
    /// The watermark only moves after `write` succeeds.
    pub async fn write<F, Fut>(
        &self,
        user_id: &str,
        table: &str,
        id: &str,
        stamp: DateTime<Utc>,
        write: F,
    ) -> SyncResult<GateOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SyncResult<()>>,
    {
        let mut watermark = self.written.lock(&gate_key(user_id, table, id)).await;
        if watermark.is_some_and(|written| stamp < written) {
            tracing::debug!("Skipping superseded write to {table}/{id} at {stamp}");
            return Ok(GateOutcome::Superseded);
        }

        write().await?;
        *watermark = Some(watermark.map_or(stamp, |written| written.max(stamp)));
        Ok(GateOutcome::Written)
    }

    /// Highest stamp written for a row by this process.
    pub async fn watermark(&self, user_id: &str, table: &str, id: &str) -> Option<DateTime<Utc>> {
        *self.written.lock(&gate_key(user_id, table, id)).await
    }

    /// Forget idle watermarks, except for rows in `pending`.
    ///
    /// A row with queued writes keeps its watermark so replays stay ordered.
    pub fn prune(&self, pending: &HashSet<GateKey>) {
        self.written.prune_where(|key, _| pending.contains(key));
    }

    /// Number of rows currently tracked.
    pub fn len(&self) -> usize {
        self.written.len()
    }

    pub fn is_empty(&self) -> bool {
        self.written.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(seconds, 0).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_writes_are_skipped() {
        let gate = WriteGate::new();
        let log = Mutex::new(Vec::new());

        for stamp in [20, 10, 20, 30] {
            let outcome = gate
                .write("u1", "orders", "1", at(stamp), || async {
                    log.lock().unwrap().push(stamp);
                    Ok(())
                })
                .await
                .unwrap();
            let expected = if stamp == 10 {
                GateOutcome::Superseded
            } else {
                GateOutcome::Written
            };
            assert_eq!(outcome, expected);
        }

        assert_eq!(*log.lock().unwrap(), [20, 20, 30]);
        assert_eq!(gate.watermark("u1", "orders", "1").await, Some(at(30)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_write_keeps_watermark() {
        let gate = WriteGate::new();
        let result = gate
            .write("u1", "orders", "1", at(50), || async {
                Err(SyncError::Network("refused".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(gate.watermark("u1", "orders", "1").await, None);

        let outcome = gate
            .write("u1", "orders", "1", at(40), || async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(outcome, GateOutcome::Written);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn racing_writers_land_in_stamp_order() {
        let gate = Arc::new(WriteGate::new());
        let landed = Arc::new(Mutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for stamp in [3_i64, 1, 4, 2, 5] {
            let gate = Arc::clone(&gate);
            let landed = Arc::clone(&landed);
            tasks.push(tokio::spawn(async move {
                gate.write("u1", "orders", "1", at(stamp), || async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    landed.lock().unwrap().push(stamp);
                    Ok(())
                })
                .await
                .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let landed = landed.lock().unwrap().clone();
        assert!(landed.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(landed.last(), Some(&5));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn users_are_ordered_independently() {
        let gate = WriteGate::new();
        let ok = || async { Ok::<(), SyncError>(()) };

        gate.write("u1", "orders", "1", at(20), ok).await.unwrap();
        let outcome = gate.write("u2", "orders", "1", at(10), ok).await.unwrap();
        assert_eq!(outcome, GateOutcome::Written);
        assert_eq!(gate.watermark("u1", "orders", "1").await, Some(at(20)));
        assert_eq!(gate.watermark("u2", "orders", "1").await, Some(at(10)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn prune_forgets_rows_without_pending_writes() {
        let gate = WriteGate::new();
        for id in ["1", "2", "3"] {
            gate.write("u1", "orders", id, at(10), || async { Ok(()) })
                .await
                .unwrap();
        }
        assert_eq!(gate.len(), 3);

        let pending = HashSet::from([gate_key("u1", "orders", "2")]);
        gate.prune(&pending);
        assert_eq!(gate.len(), 1);
        assert_eq!(gate.watermark("u1", "orders", "2").await, Some(at(10)));

        gate.prune(&HashSet::new());
        assert!(gate.is_empty());
    }
}
