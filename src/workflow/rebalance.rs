/*
* Workflow Orchestrator - Group Rebalancing
* -----------------------------------------
* @project: cluster-lifecycle-manager
*
* Clusters in a group drift apart: one is cooking, the other is idle.
* rebalance_group looks at every reachable member, and if the health spread
* is bigger than the threshold moves ONE guest from the busiest node of the
* sickest cluster to the healthiest node of the healthiest cluster.
*
* One guest per run. Call it again (or let the poller loop do it) if the
* group is still lopsided afterwards; we'd rather undershoot than have two
* runs stampede in opposite directions.
*
* Dry-run is the default. It writes a history entry saying what it would
* have done and stops there.
*
* Moves are online unless the guest's disks are over the large-disk
* threshold, in which case it goes offline. Clusters without a single
* online node are not members for this purpose: nothing could land there.
*/

use chrono::Utc;
use futures_util::future::join_all;
use tracing::{info, warn};

use crate::cluster::models::{
    group_members, Cluster, ClusterId, ClusterInventory, Guest, GuestRef, GuestStatus, GuestType,
};
use crate::config::settings::RebalanceSettings;
use crate::core::health::{busiest_node, healthiest_node, ClusterHealth};
use crate::core::inspector::inspect;
use crate::core::intersection::{intersect_group, ClusterResources, ResourceIntersection};
use crate::history::MigrationHistoryEntry;
use crate::workflow::migration::CrossClusterMigrationParams;
use crate::workflow::orchestrator::WorkflowOrchestrator;
use crate::workflow::{NoProgress, ProgressObserver, StepError, Workflow, WorkflowKind, WorkflowRun};

#[derive(Debug, Clone)]
pub struct RebalanceParams {
    pub clusters: Vec<ClusterId>,
    /// Minimum score spread (points) before anything moves.
    pub threshold: f64,
    pub dry_run: bool,
    pub target_storage: Option<String>,
    pub target_bridge: Option<String>,
    pub include_containers: bool,
}

impl RebalanceParams {
    /// Every connected member of `group`.
    pub fn for_group(clusters: &[Cluster], group: &str, settings: &RebalanceSettings) -> Self {
        Self::from_settings(group_members(clusters, group), settings)
    }

    pub fn from_settings(clusters: Vec<ClusterId>, settings: &RebalanceSettings) -> Self {
        Self {
            clusters,
            threshold: settings.threshold,
            dry_run: settings.dry_run,
            target_storage: settings.target_storage.clone(),
            target_bridge: Some(settings.target_bridge.clone()),
            include_containers: settings.include_containers,
        }
    }
}

/// A polled group member.
struct Member {
    cluster: ClusterId,
    inventory: ClusterInventory,
    score: u8,
}

/// What step two decided to move.
struct Plan {
    guest: GuestRef,
    target_cluster: ClusterId,
    target_node: String,
    storage: String,
    bridge: String,
}

impl WorkflowOrchestrator {
    pub async fn rebalance_group(
        &self,
        params: RebalanceParams,
        observer: &dyn ProgressObserver,
    ) -> Workflow {
        let workflow = Workflow::new(
            WorkflowKind::GroupRebalance {
                clusters: params.clusters.clone(),
            },
            [
                "Score clusters in group".to_string(),
                "Select guest and placement".to_string(),
                "Migrate guest across clusters".to_string(),
            ],
        );
        let mut run = WorkflowRun::start(workflow, observer);

        // (1) who is sick, who is fine
        run.begin();
        let mut members = self.poll_members(&params.clusters).await;
        if members.len() < 2 {
            run.conclude(format!(
                "{} of {} cluster(s) reachable with online nodes, nothing to balance",
                members.len(),
                params.clusters.len()
            ));
            return run.settle();
        }
        // healthiest first; name breaks ties so runs are repeatable
        members.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.cluster.cmp(&b.cluster)));
        let (best, worst) = (&members[0], &members[members.len() - 1]);
        let spread = f64::from(best.score) - f64::from(worst.score);
        let scores = members
            .iter()
            .map(|m| format!("{}={}", m.cluster, m.score))
            .collect::<Vec<_>>()
            .join(", ");
        if spread <= params.threshold {
            run.conclude(format!(
                "balanced: spread {spread} <= threshold {} ({scores})",
                params.threshold
            ));
            return run.settle();
        }
        run.complete(Some(format!("spread {spread} ({scores})")));

        // (2) pick the guest and where it lands
        run.begin();
        let plan = match self.plan_move(&params, &members) {
            Ok(Some(plan)) => plan,
            Ok(None) => {
                run.conclude(format!(
                    "no migration candidate in cluster {}",
                    worst.cluster
                ));
                return run.settle();
            }
            Err(e) => {
                run.fail(e);
                return run.settle();
            }
        };
        let online = match self.fits_online(&plan.guest).await {
            Ok(online) => online,
            Err(e) => {
                run.fail(e);
                return run.settle();
            }
        };
        let summary = format!(
            "{} -> {}/{} (storage {}, bridge {}, {})",
            plan.guest,
            plan.target_cluster,
            plan.target_node,
            plan.storage,
            plan.bridge,
            if online { "online" } else { "offline" }
        );

        if params.dry_run {
            info!(plan = %summary, "Rebalance dry run");
            self.record_history(MigrationHistoryEntry {
                guest_id: plan.guest.id,
                guest_type: plan.guest.guest_type,
                cluster: plan.guest.cluster.clone(),
                target_cluster: Some(plan.target_cluster.clone()),
                from_node: plan.guest.node.clone(),
                to_node: plan.target_node.clone(),
                timestamp: Utc::now(),
                success: true,
                dry_run: true,
                workflow_id: Some(run.id()),
            })
            .await;
            run.conclude(format!("dry run: would migrate {summary}"));
            return run.settle();
        }
        run.complete(Some(summary));

        // (3) do it
        run.begin();
        let child = self
            .migrate_guest_cross_cluster(
                CrossClusterMigrationParams {
                    guest: plan.guest.clone(),
                    target_cluster: plan.target_cluster.clone(),
                    target_node: Some(plan.target_node.clone()),
                    target_storage: Some(plan.storage.clone()),
                    target_bridge: Some(plan.bridge.clone()),
                    new_id: None,
                    online,
                    force_large_online: false,
                    delete_source: true,
                },
                &NoProgress,
            )
            .await;

        let index = run.current();
        if child.succeeded() {
            run.complete(child.steps.last().and_then(|s| s.detail.clone()));
            for outcome in child.steps.iter().flat_map(|s| s.best_effort.clone()) {
                run.attach_best_effort(index, outcome);
            }
        } else {
            let error = child
                .failed_step()
                .and_then(|(_, step)| step.error.clone())
                .unwrap_or_else(|| StepError::validation(format!("{} did not migrate", plan.guest)));
            run.fail(error);
        }
        run.push_child(child);
        run.settle()
    }

    /// Fetches every inventory concurrently. Unreachable clusters drop out.
    async fn poll_members(&self, clusters: &[ClusterId]) -> Vec<Member> {
        let fetches = clusters.iter().map(|cluster| async move {
            let result = self.gateway.get_cluster_inventory(&self.session, cluster).await;
            (cluster.clone(), result)
        });

        join_all(fetches)
            .await
            .into_iter()
            .filter_map(|(cluster, result)| match result {
                Ok(inventory) => {
                    let health = ClusterHealth::from_nodes(&inventory.nodes, true);
                    if health.nodes_online == 0 {
                        warn!(cluster = %cluster, "No online node, cluster left out of rebalance");
                        return None;
                    }
                    Some(Member {
                        cluster,
                        score: health.score(&self.weights),
                        inventory,
                    })
                }
                Err(e) => {
                    warn!(cluster = %cluster, error = %e, "Cluster left out of rebalance");
                    None
                }
            })
            .collect()
    }

    /// Online unless the disks are over the large-disk threshold.
    async fn fits_online(&self, guest: &GuestRef) -> Result<bool, StepError> {
        let config = self
            .gateway
            .get_guest_config(&self.session, &guest.cluster, &guest.node, guest.guest_type, guest.id)
            .await
            .map_err(|e| StepError::remote(&e))?;
        let total_gb = inspect(&config).total_disk_gb;
        if total_gb > self.large_disk_threshold_gb {
            info!(guest = %guest, total_gb, "Large guest, rebalancing it offline");
            return Ok(false);
        }
        Ok(true)
    }

    fn plan_move(
        &self,
        params: &RebalanceParams,
        members: &[Member],
    ) -> Result<Option<Plan>, StepError> {
        let (Some(best), Some(worst)) = (members.first(), members.last()) else {
            return Ok(None);
        };

        let Some(source_node) = busiest_node(&self.weights, &worst.inventory.nodes) else {
            return Ok(None);
        };
        let target_node = healthiest_node(&self.weights, &best.inventory.nodes).ok_or_else(|| {
            StepError::validation(format!("cluster {} has no schedulable node", best.cluster))
        })?;

        let Some(candidate) = pick_candidate(
            &worst.inventory.guests,
            &source_node.name,
            params.include_containers,
        ) else {
            return Ok(None);
        };

        let resources: Vec<ClusterResources<'_>> = members
            .iter()
            .map(|m| ClusterResources {
                cluster: &m.cluster,
                connected: true,
                inventory: Some(&m.inventory),
            })
            .collect();
        let common = intersect_group(&resources);
        let (storage, bridge) = pick_resources(params, &common)?;

        Ok(Some(Plan {
            guest: GuestRef {
                cluster: worst.cluster.clone(),
                node: source_node.name.clone(),
                guest_type: candidate.guest_type,
                id: candidate.id,
            },
            target_cluster: best.cluster.clone(),
            target_node: target_node.name.clone(),
            storage,
            bridge,
        }))
    }
}

/// Smallest running guest on `node`, cheapest to move.
pub fn pick_candidate<'a>(guests: &'a [Guest], node: &str, include_containers: bool) -> Option<&'a Guest> {
    guests
        .iter()
        .filter(|g| g.node == node && g.status == GuestStatus::Running)
        .filter(|g| include_containers || g.guest_type == GuestType::Vm)
        .min_by(|a, b| a.memory_mb.cmp(&b.memory_mb).then_with(|| a.id.cmp(&b.id)))
}

/// Configured storage/bridge must exist on every member; without one
/// configured, the first common entry is used.
fn pick_resources(
    params: &RebalanceParams,
    common: &ResourceIntersection,
) -> Result<(String, String), StepError> {
    let storage = match &params.target_storage {
        Some(name) if common.has_storage(name) => name.clone(),
        Some(name) => {
            return Err(StepError::validation(format!(
                "storage {name} is not available on every cluster in the group"
            )))
        }
        None => common
            .storages
            .first()
            .map(|s| s.name.clone())
            .ok_or_else(|| StepError::validation("clusters in the group share no storage"))?,
    };

    let bridge = match &params.target_bridge {
        Some(name) if common.has_bridge(name) => name.clone(),
        Some(name) => {
            return Err(StepError::validation(format!(
                "bridge {name} is not available on every cluster in the group"
            )))
        }
        None => common
            .bridges
            .first()
            .map(|b| b.name.clone())
            .ok_or_else(|| StepError::validation("clusters in the group share no bridge"))?,
    };

    Ok((storage, bridge))
}
