//! Merge resolver: apply cloud records to the local store with LWW.

use serde::{Deserialize, Serialize};

use super::SyncEngine;
use crate::error::SyncResult;
use crate::models::{ConflictSource, LwwDecision, Record};

/// Per-record decisions taken by one merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Cloud version written locally
    pub applied: usize,
    /// Local version kept (newer or tied)
    pub kept_local: usize,
    /// Ignored because the record was deleted locally later
    pub tombstoned: usize,
}

impl MergeReport {
    fn record(&mut self, decision: LwwDecision) {
        match decision {
            LwwDecision::Applied => self.applied += 1,
            LwwDecision::KeptLocal => self.kept_local += 1,
            LwwDecision::Tombstoned => self.tombstoned += 1,
        }
    }
}

impl SyncEngine {
    /// Overwrite local records wholesale where the cloud version is strictly
    /// newer or the record is missing locally. Ties keep the local version.
    pub async fn merge_cloud_data(&self, table: &str, records: &[Record]) -> SyncResult<MergeReport> {
        let mut report = MergeReport::default();
        for record in records {
            let decision = self
                .store()
                .put_if_newer(table, record, ConflictSource::Pull)
                .await?;
            report.record(decision);
        }
        self.store().prune_record_locks();

        tracing::debug!(
            "Merged {table}: {} applied, {} kept local, {} tombstoned",
            report.applied,
            report.kept_local,
            report.tombstoned
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncOptions;
    use crate::models::TableRegistry;
    use crate::services::StoreService;
    use crate::util::parse_iso8601;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn engine() -> SyncEngine {
        let store = StoreService::open_in_memory().await.unwrap();
        let tables = TableRegistry::new([("orders", "orders")]).unwrap();
        SyncEngine::new(store, None, tables, SyncOptions::default())
    }

    fn record(id: &str, at: &str, status: &str) -> Record {
        Record::new(id, json!({"status": status}), parse_iso8601(at).unwrap()).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn newer_cloud_record_replaces_local() {
        let engine = engine().await;
        let local = record("1001", "2024-01-01T10:00:00Z", "Packed");
        engine.store().put_record("orders", &local).await.unwrap();

        let cloud = record("1001", "2024-01-01T12:00:00Z", "Dispatched");
        let report = engine.merge_cloud_data("orders", &[cloud.clone()]).await.unwrap();

        assert_eq!(report.applied, 1);
        assert_eq!(engine.store().get_record("orders", "1001").await.unwrap(), Some(cloud));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn merge_counts_each_decision() {
        let engine = engine().await;
        let store = engine.store();
        store
            .put_record("orders", &record("kept", "2024-01-02T00:00:00Z", "Local"))
            .await
            .unwrap();
        store
            .delete_local("orders", "gone", parse_iso8601("2024-01-02T00:00:00Z").unwrap())
            .await
            .unwrap();

        let incoming = [
            record("new", "2024-01-01T00:00:00Z", "Cloud"),
            record("kept", "2024-01-01T00:00:00Z", "Cloud"),
            record("gone", "2024-01-01T00:00:00Z", "Cloud"),
        ];
        let report = engine.merge_cloud_data("orders", &incoming).await.unwrap();

        assert_eq!(
            report,
            MergeReport {
                applied: 1,
                kept_local: 1,
                tombstoned: 1,
            }
        );
        assert_eq!(
            store.get_record("orders", "kept").await.unwrap().unwrap().payload,
            json!({"status": "Local"})
        );
        assert_eq!(store.get_record("orders", "gone").await.unwrap(), None);
    }
}
