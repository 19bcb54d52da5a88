use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use crate::cluster::models::{ClusterId, GuestType};
use crate::errors::OrchestratorResult;
use crate::utils::{append_json_line, read_json_lines};
use crate::{with_context, AsyncMutex};

pub const HISTORY_FILE: &str = "migration_history.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationHistoryEntry {
    pub guest_id: u32,
    pub guest_type: GuestType,
    pub cluster: ClusterId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_cluster: Option<ClusterId>,
    pub from_node: String,
    pub to_node: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Uuid>,
}

/// Append-only migration log, one JSON document per line.
pub struct MigrationHistory {
    path: PathBuf,
    write_lock: AsyncMutex<()>,
}

impl MigrationHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: AsyncMutex::new(()),
        }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(HISTORY_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, entry: &MigrationHistoryEntry) -> OrchestratorResult<()> {
        let _guard = self.write_lock.lock().await;
        debug!(
            guest_id = entry.guest_id,
            from = %entry.from_node,
            to = %entry.to_node,
            success = entry.success,
            "Recording migration history"
        );
        with_context!(
            append_json_line(&self.path, entry).await,
            "append migration history"
        )
    }

    pub async fn entries(&self) -> OrchestratorResult<Vec<MigrationHistoryEntry>> {
        with_context!(
            read_json_lines(&self.path).await,
            "read migration history"
        )
    }

    /// Newest first.
    pub async fn recent(&self, limit: usize) -> OrchestratorResult<Vec<MigrationHistoryEntry>> {
        let mut entries = self.entries().await?;
        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn entry(guest_id: u32, success: bool) -> MigrationHistoryEntry {
        MigrationHistoryEntry {
            guest_id,
            guest_type: GuestType::Vm,
            cluster: ClusterId::new("prod"),
            target_cluster: None,
            from_node: "pve1".into(),
            to_node: "pve2".into(),
            timestamp: Utc::now(),
            success,
            dry_run: false,
            workflow_id: None,
        }
    }

    #[tokio::test]
    async fn recent_returns_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let history = MigrationHistory::in_dir(dir.path());
        for id in 100..105 {
            history.append(&entry(id, true)).await.unwrap();
        }

        let recent = history.recent(2).await.unwrap();
        assert_eq!(
            recent.iter().map(|e| e.guest_id).collect::<Vec<_>>(),
            vec![104, 103]
        );
    }

    #[tokio::test]
    async fn concurrent_appends_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let history = Arc::new(MigrationHistory::in_dir(dir.path()));

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let history = history.clone();
                tokio::spawn(async move { history.append(&entry(i, i % 2 == 0)).await })
            })
            .collect();
        for result in futures::future::join_all(handles).await {
            result.unwrap().unwrap();
        }

        assert_eq!(history.entries().await.unwrap().len(), 20);
    }
}
