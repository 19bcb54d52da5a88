/*
* Workflow Orchestrator - Node Membership
* ---------------------------------------
* @project: cluster-lifecycle-manager
*
* Entry points that change which cluster a node belongs to:
*
*   node_join    probe the node, then join it (force only if asked for)
*   node_remove  confirm by name, check eligibility, remove, best-effort cleanup
*   node_move    remove from A, ask B for join info, find the node's IP in A's
*                last-known inventory, join B with force
*
* Guest migrations live in workflow::migration, group rebalancing in
* workflow::rebalance; they share the plumbing defined here.
*
* Every entry point returns the finished Workflow, never an Err: the step
* trace IS the result. Nothing here retries, nothing here rolls back.
*/

use std::sync::Arc;
use tracing::{info, warn};

use crate::cluster::gateway::{ClusterGateway, Credentials, GatewayResult, Session};
use crate::cluster::models::{
    ClusterId, ClusterInventory, JoinRequest, NodeProbeResult, RemovalEligibility, RemovalResult,
};
use crate::config::Settings;
use crate::core::health::HealthWeights;
use crate::core::preflight::LARGE_DISK_THRESHOLD_GB;
use crate::history::{MigrationHistory, MigrationHistoryEntry};
use crate::workflow::{
    BestEffortOutcome, ProgressObserver, StepError, Workflow, WorkflowKind, WorkflowRun,
};

pub const CLEANUP_LABEL: &str = "cleanup";

#[derive(Debug, Clone)]
pub struct NodeJoinParams {
    pub cluster: ClusterId,
    pub ip: String,
    pub credentials: Credentials,
    pub link0: Option<String>,
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct NodeRemoveParams {
    pub cluster: ClusterId,
    pub node: String,
    /// Must equal `node` exactly.
    pub confirmation: String,
}

#[derive(Debug, Clone)]
pub struct NodeMoveParams {
    pub source: ClusterId,
    pub target: ClusterId,
    pub node: String,
    pub confirmation: String,
    /// Credentials for the node itself, used for the join to `target`.
    pub credentials: Credentials,
    pub link0: Option<String>,
    /// Last-known inventory of `source`, taken before the node disappears
    /// from its API.
    pub source_inventory: ClusterInventory,
}

pub struct WorkflowOrchestrator {
    pub(crate) gateway: Arc<dyn ClusterGateway>,
    pub(crate) session: Session,
    pub(crate) large_disk_threshold_gb: f64,
    pub(crate) weights: HealthWeights,
    pub(crate) history: Option<Arc<MigrationHistory>>,
}

impl WorkflowOrchestrator {
    pub fn new(gateway: Arc<dyn ClusterGateway>, session: Session) -> Self {
        Self {
            gateway,
            session,
            large_disk_threshold_gb: LARGE_DISK_THRESHOLD_GB,
            weights: HealthWeights::default(),
            history: None,
        }
    }

    /// Thresholds and weights from settings, history kept in `storage.data_dir`.
    pub fn from_settings(
        gateway: Arc<dyn ClusterGateway>,
        session: Session,
        settings: &Settings,
    ) -> Self {
        Self::new(gateway, session)
            .with_large_disk_threshold(settings.preflight.large_disk_threshold_gb)
            .with_health_weights(settings.health_weights())
            .with_history(Arc::new(MigrationHistory::in_dir(&settings.storage.data_dir)))
    }

    pub fn large_disk_threshold_gb(&self) -> f64 {
        self.large_disk_threshold_gb
    }

    pub fn health_weights(&self) -> HealthWeights {
        self.weights
    }

    pub fn history(&self) -> Option<&Arc<MigrationHistory>> {
        self.history.as_ref()
    }

    pub fn with_large_disk_threshold(mut self, threshold_gb: f64) -> Self {
        self.large_disk_threshold_gb = threshold_gb;
        self
    }

    pub fn with_health_weights(mut self, weights: HealthWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_history(mut self, history: Arc<MigrationHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// Probe on its own, so a caller can look at the node before deciding
    /// whether to pre-select force.
    pub async fn probe_node(
        &self,
        ip: &str,
        credentials: &Credentials,
    ) -> GatewayResult<NodeProbeResult> {
        self.gateway
            .test_node_connection(&self.session, ip, credentials)
            .await
    }

    pub async fn node_join(&self, params: NodeJoinParams, observer: &dyn ProgressObserver) -> Workflow {
        let workflow = Workflow::new(
            WorkflowKind::NodeJoin {
                cluster: params.cluster.clone(),
                ip: params.ip.clone(),
            },
            [
                format!("Test connection to {}", params.ip),
                format!("Join {} to cluster {}", params.ip, params.cluster),
            ],
        );
        let mut run = WorkflowRun::start(workflow, observer);

        run.begin();
        let probe = match self.probe_node(&params.ip, &params.credentials).await {
            Ok(probe) => probe,
            Err(e) => {
                run.fail(StepError::remote(&e));
                return run.settle();
            }
        };
        run.complete(Some(describe_probe(&probe)));

        run.begin();
        if probe.needs_force() && !params.force {
            let reason = match (&probe.cluster_name, probe.in_cluster) {
                (Some(name), true) => format!("{} already belongs to cluster {}", probe.hostname, name),
                (None, true) => format!("{} already belongs to a cluster", probe.hostname),
                _ => format!("{} carries stale cluster configuration", probe.hostname),
            };
            run.fail(StepError::validation(format!("{reason}; set force to join anyway")));
            return run.settle();
        }

        let request = JoinRequest {
            ip: params.ip.clone(),
            credentials: params.credentials,
            link0: params.link0,
            force: params.force,
        };
        match self.gateway.join_node(&self.session, &params.cluster, &request).await {
            Ok(result) => {
                info!(cluster = %params.cluster, ip = %params.ip, "Node joined");
                run.complete(non_empty(result.message));
            }
            Err(e) => run.fail(StepError::remote(&e)),
        }
        run.settle()
    }

    pub async fn node_remove(
        &self,
        params: NodeRemoveParams,
        observer: &dyn ProgressObserver,
    ) -> Workflow {
        let workflow = Workflow::new(
            WorkflowKind::NodeRemove {
                cluster: params.cluster.clone(),
                node: params.node.clone(),
            },
            [
                format!("Check removal eligibility of {}", params.node),
                format!("Remove {} from cluster {}", params.node, params.cluster),
            ],
        );
        let mut run = WorkflowRun::start(workflow, observer);

        run.begin();
        match self
            .check_removal(&params.cluster, &params.node, &params.confirmation)
            .await
        {
            Ok(eligibility) => run.complete(Some(describe_eligibility(&eligibility))),
            Err(e) => {
                run.fail(e);
                return run.settle();
            }
        }

        run.begin();
        match self.issue_removal(&params.cluster, &params.node).await {
            Ok(result) => {
                let index = run.current();
                run.complete(None);
                run.attach_best_effort(index, cleanup_outcome(&result));
            }
            Err(e) => run.fail(e),
        }
        run.settle()
    }

    pub async fn node_move(&self, params: NodeMoveParams, observer: &dyn ProgressObserver) -> Workflow {
        let NodeMoveParams {
            source,
            target,
            node,
            confirmation,
            credentials,
            link0,
            source_inventory,
        } = params;

        let workflow = Workflow::new(
            WorkflowKind::NodeMove {
                source: source.clone(),
                target: target.clone(),
                node: node.clone(),
            },
            [
                format!("Remove {node} from cluster {source}"),
                format!("Fetch join information from cluster {target}"),
                format!("Resolve address of {node}"),
                format!("Join {node} to cluster {target}"),
            ],
        );
        let mut run = WorkflowRun::start(workflow, observer);

        // (1) remove from the source cluster
        run.begin();
        if source == target {
            run.fail(StepError::validation(format!(
                "{node} is already in cluster {target}; not removed"
            )));
            return run.settle();
        }
        let removal = match self.check_removal(&source, &node, &confirmation).await {
            Ok(_) => self.issue_removal(&source, &node).await,
            Err(e) => Err(e),
        };
        match removal {
            Ok(result) => {
                let index = run.current();
                run.complete(Some(format!("{node} removed from {source}")));
                run.attach_best_effort(index, cleanup_outcome(&result));
            }
            Err(e) => {
                run.fail(StepError {
                    kind: e.kind,
                    message: format!("{}; {node} was not removed", e.message),
                });
                return run.settle();
            }
        }

        // From here on the node is out of `source`. Any failure leaves it
        // removed-but-unjoined and says so.
        run.begin();
        let join_info = match self.gateway.get_join_info(&self.session, &target).await {
            Ok(info) => info,
            Err(e) => {
                run.fail(StepError::inconsistent(format!(
                    "{node} was already removed from {source} but {target} returned no join information ({e}); join it manually"
                )));
                return run.settle();
            }
        };
        run.complete(Some(format!(
            "cluster {} with {} node(s)",
            join_info.cluster_name,
            join_info.nodes.len()
        )));

        run.begin();
        let ip = match source_inventory.node(&node).and_then(|n| n.ip.clone()) {
            Some(ip) => ip,
            None => {
                run.fail(StepError::inconsistent(format!(
                    "{node} was already removed from {source} and its address is unknown in the last inventory; join it manually"
                )));
                return run.settle();
            }
        };
        run.complete(Some(ip.clone()));

        run.begin();
        // always forced: the node was just removed and may still carry state
        let request = JoinRequest {
            ip: ip.clone(),
            credentials,
            link0,
            force: true,
        };
        match self.gateway.join_node(&self.session, &target, &request).await {
            Ok(result) => {
                info!(node = %node, from = %source, to = %target, "Node moved");
                run.complete(non_empty(result.message));
            }
            Err(e) => run.fail(StepError::inconsistent(format!(
                "{node} was removed from {source} but joining {target} at {ip} failed: {e}; join it manually"
            ))),
        }
        run.settle()
    }

    /// Local confirmation first, so a typo never costs a remote call.
    pub(crate) async fn check_removal(
        &self,
        cluster: &ClusterId,
        node: &str,
        confirmation: &str,
    ) -> Result<RemovalEligibility, StepError> {
        if confirmation != node {
            return Err(StepError::validation(format!(
                "confirmation text does not match node name {node}"
            )));
        }

        let eligibility = self
            .gateway
            .get_removal_eligibility(&self.session, cluster, node)
            .await
            .map_err(|e| StepError::remote(&e))?;

        if !eligibility.blockers.is_empty() {
            return Err(StepError::validation(format!(
                "removal blocked: {}",
                eligibility.blockers.join("; ")
            )));
        }
        if !eligibility.can_remove {
            return Err(StepError::validation(format!(
                "{node} cannot be removed from {cluster}"
            )));
        }
        for warning in &eligibility.warnings {
            warn!(cluster = %cluster, node = %node, warning = %warning, "Removal warning");
        }
        Ok(eligibility)
    }

    pub(crate) async fn issue_removal(
        &self,
        cluster: &ClusterId,
        node: &str,
    ) -> Result<RemovalResult, StepError> {
        let result = self
            .gateway
            .remove_node(&self.session, cluster, node)
            .await
            .map_err(|e| StepError::remote(&e))?;

        if !result.success {
            return Err(StepError {
                kind: crate::workflow::StepErrorKind::Remote,
                message: format!("control plane reported that removing {node} failed"),
            });
        }
        info!(cluster = %cluster, node = %node, "Node removed");
        Ok(result)
    }

    /// History is a side channel; a full disk must not fail a migration.
    pub(crate) async fn record_history(&self, entry: MigrationHistoryEntry) {
        if let Some(history) = &self.history {
            if let Err(e) = history.append(&entry).await {
                warn!(error = %e, guest_id = entry.guest_id, "Could not record migration history");
            }
        }
    }
}

fn describe_probe(probe: &NodeProbeResult) -> String {
    let membership = match (&probe.cluster_name, probe.in_cluster) {
        (Some(name), true) => format!("member of {name}"),
        (None, true) => "already clustered".to_string(),
        _ => "standalone".to_string(),
    };
    let stale = if probe.stale_config {
        ", stale cluster config present"
    } else {
        ""
    };
    format!("{} {} ({membership}{stale})", probe.hostname, probe.version)
        .trim()
        .to_string()
}

fn describe_eligibility(eligibility: &RemovalEligibility) -> String {
    if eligibility.warnings.is_empty() {
        "eligible".to_string()
    } else {
        format!("eligible with warnings: {}", eligibility.warnings.join("; "))
    }
}

fn cleanup_outcome(result: &RemovalResult) -> BestEffortOutcome {
    BestEffortOutcome {
        label: CLEANUP_LABEL.to_string(),
        success: result.cleanup.success,
        message: result.cleanup.message.clone(),
    }
}

pub(crate) fn non_empty(message: String) -> Option<String> {
    if message.trim().is_empty() {
        None
    } else {
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_description_mentions_membership_and_stale_config() {
        let probe = NodeProbeResult {
            hostname: "pve5".into(),
            version: "8.2".into(),
            in_cluster: true,
            cluster_name: Some("lab".into()),
            stale_config: true,
        };
        let text = describe_probe(&probe);
        assert!(text.contains("member of lab"));
        assert!(text.contains("stale"));
    }

    #[test]
    fn cleanup_outcome_mirrors_report() {
        let result = RemovalResult {
            success: true,
            cleanup: crate::cluster::models::CleanupReport {
                success: false,
                message: "could not reach node".into(),
            },
        };
        let outcome = cleanup_outcome(&result);
        assert_eq!(outcome.label, CLEANUP_LABEL);
        assert!(!outcome.success);
    }
}
