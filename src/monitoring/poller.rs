/*
* Inventory Poller
* ----------------
* @project: cluster-lifecycle-manager
*
* Every N seconds: ask every registered cluster for its inventory (all at
* once, nobody waits on the slow one), score it, keep the result.
*
* Snapshots are what workflows decide on. They can be a little stale and
* that's fine: the control plane is the source of truth and will say no to
* anything that stopped making sense since the last tick.
*
* A cluster that fails to answer is marked disconnected and scores 0, but its
* last good inventory is kept around. A node move needs exactly that: the IP
* of a node that is about to vanish from the API.
*/

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::cluster::gateway::{ClusterGateway, Session};
use crate::cluster::models::{ClusterId, ClusterInventory};
use crate::config::Settings;
use crate::core::health::{ClusterHealth, HealthWeights};
use crate::core::intersection::{intersect_group, ClusterResources, ResourceIntersection};
use crate::AsyncMutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub cluster: ClusterId,
    pub connected: bool,
    /// Last inventory that was fetched successfully, possibly from an
    /// earlier tick when `connected` is false.
    pub inventory: Option<ClusterInventory>,
    pub health_score: u8,
    pub fetched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct InventoryPoller {
    gateway: Arc<dyn ClusterGateway>,
    session: Session,
    clusters: Vec<ClusterId>,
    weights: HealthWeights,
    interval: Duration,
    snapshots: AsyncMutex<HashMap<ClusterId, InventorySnapshot>>,
}

impl InventoryPoller {
    pub fn new(
        gateway: Arc<dyn ClusterGateway>,
        session: Session,
        clusters: Vec<ClusterId>,
        interval_secs: u64,
    ) -> Self {
        info!(
            clusters = clusters.len(),
            interval_secs, "Initializing inventory poller"
        );
        Self {
            gateway,
            session,
            clusters,
            weights: HealthWeights::default(),
            interval: Duration::from_secs(interval_secs.max(1)),
            snapshots: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Interval from `polling.interval_secs`, weights from `health`.
    pub fn from_settings(
        gateway: Arc<dyn ClusterGateway>,
        session: Session,
        clusters: Vec<ClusterId>,
        settings: &Settings,
    ) -> Self {
        Self::new(gateway, session, clusters, settings.polling.interval_secs)
            .with_health_weights(settings.health_weights())
    }

    pub fn with_health_weights(mut self, weights: HealthWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One pass over every cluster. Returns the fresh snapshots in
    /// registration order.
    pub async fn poll_once(&self) -> Vec<InventorySnapshot> {
        let fetches = self.clusters.iter().map(|cluster| async move {
            let result = self.gateway.get_cluster_inventory(&self.session, cluster).await;
            (cluster.clone(), result)
        });
        let results = join_all(fetches).await;

        let mut snapshots = self.snapshots.lock().await;
        let mut fresh = Vec::with_capacity(results.len());
        for (cluster, result) in results {
            let snapshot = match result {
                Ok(inventory) => {
                    let health = ClusterHealth::from_nodes(&inventory.nodes, true);
                    let health_score = health.score(&self.weights);
                    debug!(cluster = %cluster, health_score, nodes = inventory.nodes.len(), "Inventory polled");
                    InventorySnapshot {
                        cluster: cluster.clone(),
                        connected: true,
                        inventory: Some(inventory),
                        health_score,
                        fetched_at: Utc::now(),
                        error: None,
                    }
                }
                Err(e) => {
                    warn!(cluster = %cluster, error = %e, "Inventory poll failed");
                    let last_known = snapshots.get(&cluster).and_then(|s| s.inventory.clone());
                    InventorySnapshot {
                        cluster: cluster.clone(),
                        connected: false,
                        inventory: last_known,
                        health_score: 0,
                        fetched_at: Utc::now(),
                        error: Some(e.to_string()),
                    }
                }
            };
            snapshots.insert(cluster, snapshot.clone());
            fresh.push(snapshot);
        }
        fresh
    }

    pub async fn snapshot(&self, cluster: &ClusterId) -> Option<InventorySnapshot> {
        self.snapshots.lock().await.get(cluster).cloned()
    }

    pub async fn snapshots(&self) -> Vec<InventorySnapshot> {
        let snapshots = self.snapshots.lock().await;
        self.clusters
            .iter()
            .filter_map(|c| snapshots.get(c).cloned())
            .collect()
    }

    /// Storages and bridges shared by every currently connected cluster.
    pub async fn intersection(&self) -> ResourceIntersection {
        let snapshots = self.snapshots().await;
        let resources: Vec<ClusterResources<'_>> = snapshots
            .iter()
            .map(|s| ClusterResources {
                cluster: &s.cluster,
                connected: s.connected,
                inventory: s.inventory.as_ref(),
            })
            .collect();
        intersect_group(&resources)
    }

    /// Polls forever on a fixed interval. The first pass runs immediately.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(self.interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let snapshots = self.poll_once().await;
                let connected = snapshots.iter().filter(|s| s.connected).count();
                debug!(connected, total = snapshots.len(), "Polling pass finished");
            }
        })
    }
}
