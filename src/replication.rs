/*
* Cross-Cluster Replication Jobs
* ------------------------------
* @project: cluster-lifecycle-manager
*
* A replication job says "keep a copy of guest X from cluster A on cluster B,
* on this storage and bridge, every so often, and keep N snapshots around".
*
* We only store definitions (append-only) and answer "is it due?". Actually
* shipping the bits is the control plane's job.
*
* Schedules look like cron but we only understand the presets people
* actually pick in the UI, see schedule_interval below.
*/

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::cluster::models::{ClusterId, GuestType};
use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::utils::{append_json_line, read_json_lines};
use crate::{with_context, AsyncMutex};

pub const JOBS_FILE: &str = "replication_jobs.jsonl";
pub const DEFAULT_SCHEDULE: &str = "0 */6 * * *";

const FALLBACK_INTERVAL_SECS: i64 = 6 * 3600;
const MIN_MINUTE_INTERVAL: i64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationJob {
    pub id: Uuid,
    pub source_cluster: ClusterId,
    pub guest_id: u32,
    pub guest_type: GuestType,
    pub target_cluster: ClusterId,
    pub target_storage: String,
    pub target_bridge: String,
    pub schedule: String,
    pub retention: u32,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

fn enabled_by_default() -> bool {
    true
}

impl ReplicationJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_cluster: ClusterId,
        guest_id: u32,
        guest_type: GuestType,
        target_cluster: ClusterId,
        target_storage: impl Into<String>,
        target_bridge: impl Into<String>,
        schedule: impl Into<String>,
        retention: u32,
    ) -> OrchestratorResult<Self> {
        if source_cluster == target_cluster {
            return Err(OrchestratorError::Validation(
                "replication source and target cluster must differ".into(),
            ));
        }
        if retention == 0 {
            return Err(OrchestratorError::Validation(
                "retention must keep at least one snapshot".into(),
            ));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            source_cluster,
            guest_id,
            guest_type,
            target_cluster,
            target_storage: target_storage.into(),
            target_bridge: target_bridge.into(),
            schedule: schedule.into(),
            retention,
            enabled: true,
            created_at: Utc::now(),
        })
    }

    pub fn interval(&self) -> Duration {
        schedule_interval(&self.schedule)
    }

    /// Never-run jobs are always due.
    pub fn is_due(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        match last_run {
            Some(last) => now - last >= self.interval(),
            None => true,
        }
    }
}

/// Interval for a cron-like schedule:
///
/// - `*/N * * * *` every N minutes, never more often than every 5
/// - `0 */N * * *` every N hours
/// - `M H * * *` once a day
/// - anything else every 6 hours
pub fn schedule_interval(schedule: &str) -> Duration {
    let parts: Vec<&str> = schedule.split_whitespace().collect();
    if parts.len() != 5 {
        return fallback_interval();
    }
    let (minute, hour) = (parts[0], parts[1]);

    if let Some(n) = hour.strip_prefix("*/") {
        return match n.parse::<i64>() {
            Ok(n) => Duration::try_hours(n.max(1)).unwrap_or_else(fallback_interval),
            Err(_) => fallback_interval(),
        };
    }

    if let Some(n) = minute.strip_prefix("*/") {
        return match n.parse::<i64>() {
            Ok(n) => Duration::try_minutes(n.max(MIN_MINUTE_INTERVAL)).unwrap_or_else(fallback_interval),
            Err(_) => fallback_interval(),
        };
    }

    let is_number = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if is_number(hour) && is_number(minute) {
        return Duration::hours(24);
    }

    fallback_interval()
}

fn fallback_interval() -> Duration {
    Duration::seconds(FALLBACK_INTERVAL_SECS)
}

/// Append-only store of job definitions.
pub struct ReplicationStore {
    path: PathBuf,
    write_lock: AsyncMutex<()>,
}

impl ReplicationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: AsyncMutex::new(()),
        }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(JOBS_FILE))
    }

    pub async fn append(&self, job: &ReplicationJob) -> OrchestratorResult<()> {
        let _guard = self.write_lock.lock().await;
        tracing::info!(
            job_id = %job.id,
            guest_id = job.guest_id,
            source = %job.source_cluster,
            target = %job.target_cluster,
            "Storing replication job"
        );
        with_context!(
            append_json_line(&self.path, job).await,
            "append replication job"
        )
    }

    pub async fn jobs(&self) -> OrchestratorResult<Vec<ReplicationJob>> {
        with_context!(read_json_lines(&self.path).await, "read replication jobs")
    }

    pub async fn due_jobs(
        &self,
        last_runs: &HashMap<Uuid, DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<Vec<ReplicationJob>> {
        Ok(self
            .jobs()
            .await?
            .into_iter()
            .filter(|job| job.is_due(last_runs.get(&job.id).copied(), now))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(schedule: &str) -> ReplicationJob {
        ReplicationJob::new(
            "a".into(),
            100,
            GuestType::Vm,
            "b".into(),
            "ceph",
            "vmbr0",
            schedule,
            3,
        )
        .unwrap()
    }

    #[test]
    fn schedule_presets() {
        assert_eq!(schedule_interval("0 */6 * * *"), Duration::hours(6));
        assert_eq!(schedule_interval("0 */0 * * *"), Duration::hours(1));
        assert_eq!(schedule_interval("*/30 * * * *"), Duration::minutes(30));
        assert_eq!(schedule_interval("*/1 * * * *"), Duration::minutes(5));
        assert_eq!(schedule_interval("0 2 * * *"), Duration::hours(24));
        assert_eq!(schedule_interval("@daily"), Duration::hours(6));
        assert_eq!(schedule_interval("0 */x * * *"), Duration::hours(6));
    }

    #[test]
    fn oversized_steps_fall_back_instead_of_overflowing() {
        assert_eq!(schedule_interval("0 */99999999999999 * * *"), Duration::hours(6));
        assert_eq!(schedule_interval("*/9223372036854775807 * * * *"), Duration::hours(6));

        let job = job("0 */99999999999999 * * *");
        let now = Utc::now();
        assert!(job.is_due(None, now));
        assert!(!job.is_due(Some(now - Duration::hours(1)), now));
    }

    #[test]
    fn due_logic() {
        let job = job("*/30 * * * *");
        let now = Utc::now();
        assert!(job.is_due(None, now));
        assert!(!job.is_due(Some(now - Duration::minutes(10)), now));
        assert!(job.is_due(Some(now - Duration::minutes(30)), now));

        let disabled = ReplicationJob {
            enabled: false,
            ..job
        };
        assert!(!disabled.is_due(None, now));
    }

    #[test]
    fn rejects_nonsense_jobs() {
        assert!(ReplicationJob::new("a".into(), 1, GuestType::Vm, "a".into(), "s", "b", DEFAULT_SCHEDULE, 1).is_err());
        assert!(ReplicationJob::new("a".into(), 1, GuestType::Vm, "b".into(), "s", "b", DEFAULT_SCHEDULE, 0).is_err());
    }

    #[tokio::test]
    async fn store_filters_due_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReplicationStore::in_dir(dir.path());
        let fresh = job("0 */6 * * *");
        let stale = job("0 */6 * * *");
        store.append(&fresh).await.unwrap();
        store.append(&stale).await.unwrap();

        let now = Utc::now();
        let mut last_runs = HashMap::new();
        last_runs.insert(fresh.id, now - Duration::hours(1));
        last_runs.insert(stale.id, now - Duration::hours(7));

        let due = store.due_jobs(&last_runs, now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, stale.id);
    }
}
