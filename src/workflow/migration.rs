/*
* Workflow Orchestrator - Guest Migration
* ---------------------------------------
* @project: cluster-lifecycle-manager
*
* Moving VMs and containers around:
*
*   migrate_guest                read config -> preflight -> migrate
*   migrate_guest_cross_cluster  read config -> preflight -> pick target -> migrate
*                                (+ best-effort delete of the source copy)
*   bulk_migrate                 the first one, sequentially, for a list of guests,
*                                and it does NOT stop at the first casualty
*
* Reading the config is the only remote call allowed before preflight; if
* preflight says no, nothing gets moved.
*/

use chrono::Utc;
use tracing::info;

use crate::cluster::models::{
    ClusterId, ClusterInventory, GuestRef, MigrationRequest, MigrationTarget,
};
use crate::core::health::healthiest_node;
use crate::core::inspector::{inspect, ConfigFinding};
use crate::core::preflight::{PreflightBlock, PreflightValidator, ValidationResult};
use crate::history::MigrationHistoryEntry;
use crate::workflow::orchestrator::{non_empty, WorkflowOrchestrator};
use crate::workflow::{
    BestEffortOutcome, NoProgress, ProgressObserver, StepError, Workflow, WorkflowKind, WorkflowRun,
};

pub const DELETE_SOURCE_LABEL: &str = "delete_source";
pub const DEFAULT_BRIDGE: &str = "vmbr0";

#[derive(Debug, Clone)]
pub struct GuestMigrationParams {
    pub guest: GuestRef,
    pub target_node: String,
    /// `None` keeps the source storage.
    pub target_storage: Option<String>,
    pub online: bool,
    pub force_large_online: bool,
    pub with_local_disks: bool,
}

#[derive(Debug, Clone)]
pub struct CrossClusterMigrationParams {
    pub guest: GuestRef,
    pub target_cluster: ClusterId,
    /// `None` picks the healthiest schedulable node of the target cluster.
    pub target_node: Option<String>,
    pub target_storage: Option<String>,
    pub target_bridge: Option<String>,
    /// `None` keeps the guest id.
    pub new_id: Option<u32>,
    pub online: bool,
    pub force_large_online: bool,
    pub delete_source: bool,
}

#[derive(Debug, Clone)]
pub struct BulkMigrationParams {
    pub cluster: ClusterId,
    pub guests: Vec<GuestRef>,
    pub target_node: String,
    pub target_storage: Option<String>,
    pub online: bool,
    pub force_large_online: bool,
}

/// Where a cross-cluster migration ends up, all validated against the
/// target's inventory.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTarget {
    pub node: String,
    pub storage: String,
    pub bridge: String,
    pub guest_id: u32,
}

impl WorkflowOrchestrator {
    pub async fn migrate_guest(
        &self,
        params: GuestMigrationParams,
        observer: &dyn ProgressObserver,
    ) -> Workflow {
        let guest = params.guest.clone();
        let workflow = Workflow::new(
            WorkflowKind::GuestMigration {
                guest: guest.clone(),
                target_node: params.target_node.clone(),
            },
            [
                format!("Read configuration of {guest}"),
                "Run preflight checks".to_string(),
                format!("Migrate {guest} to {}", params.target_node),
            ],
        );
        let mut run = WorkflowRun::start(workflow, observer);

        let Some((finding, validation)) = self
            .read_and_validate(
                &mut run,
                &guest,
                Some(&params.target_node),
                params.online,
                params.force_large_online,
            )
            .await
        else {
            return run.settle();
        };

        run.begin();
        let request = MigrationRequest {
            cluster: guest.cluster.clone(),
            source_node: guest.node.clone(),
            guest_id: guest.id,
            guest_type: guest.guest_type,
            target: MigrationTarget::Node {
                node: params.target_node.clone(),
            },
            target_storage: params.target_storage.clone(),
            online: validation.online,
            with_local_disks: params.with_local_disks || finding.has_local_disks,
        };
        let outcome = self.gateway.migrate_guest(&self.session, &request).await;
        self.record_history(MigrationHistoryEntry {
            guest_id: guest.id,
            guest_type: guest.guest_type,
            cluster: guest.cluster.clone(),
            target_cluster: None,
            from_node: guest.node.clone(),
            to_node: params.target_node.clone(),
            timestamp: Utc::now(),
            success: outcome.is_ok(),
            dry_run: false,
            workflow_id: Some(run.id()),
        })
        .await;

        match outcome {
            Ok(result) => {
                info!(guest = %guest, target = %params.target_node, online = validation.online, "Guest migrated");
                run.complete(describe_migration(&result.task_id, result.message, &validation));
            }
            Err(e) => run.fail(StepError::remote(&e)),
        }
        run.settle()
    }

    pub async fn migrate_guest_cross_cluster(
        &self,
        params: CrossClusterMigrationParams,
        observer: &dyn ProgressObserver,
    ) -> Workflow {
        let guest = params.guest.clone();
        let workflow = Workflow::new(
            WorkflowKind::CrossClusterMigration {
                guest: guest.clone(),
                target_cluster: params.target_cluster.clone(),
            },
            [
                format!("Read configuration of {guest}"),
                "Run preflight checks".to_string(),
                format!("Resolve target on cluster {}", params.target_cluster),
                format!("Migrate {guest} to cluster {}", params.target_cluster),
            ],
        );
        let mut run = WorkflowRun::start(workflow, observer);

        if guest.cluster == params.target_cluster {
            run.begin();
            run.fail(StepError::validation(format!(
                "{guest} already lives in cluster {}",
                params.target_cluster
            )));
            return run.settle();
        }

        let Some((finding, validation)) = self
            .read_and_validate(&mut run, &guest, None, params.online, params.force_large_online)
            .await
        else {
            return run.settle();
        };

        run.begin();
        let inventory = match self
            .gateway
            .get_cluster_inventory(&self.session, &params.target_cluster)
            .await
        {
            Ok(inventory) => inventory,
            Err(e) => {
                run.fail(StepError::remote(&e));
                return run.settle();
            }
        };
        let target = match self.resolve_target(&params, &inventory) {
            Ok(target) => target,
            Err(e) => {
                run.fail(e);
                return run.settle();
            }
        };
        run.complete(Some(format!(
            "node {}, storage {}, bridge {}, id {}",
            target.node, target.storage, target.bridge, target.guest_id
        )));

        run.begin();
        let request = MigrationRequest {
            cluster: guest.cluster.clone(),
            source_node: guest.node.clone(),
            guest_id: guest.id,
            guest_type: guest.guest_type,
            target: MigrationTarget::Remote {
                cluster: params.target_cluster.clone(),
                node: target.node.clone(),
                new_id: Some(target.guest_id),
                bridge: target.bridge.clone(),
            },
            target_storage: Some(target.storage.clone()),
            online: validation.online,
            with_local_disks: finding.has_local_disks,
        };
        let outcome = self.gateway.migrate_guest(&self.session, &request).await;
        self.record_history(MigrationHistoryEntry {
            guest_id: guest.id,
            guest_type: guest.guest_type,
            cluster: guest.cluster.clone(),
            target_cluster: Some(params.target_cluster.clone()),
            from_node: guest.node.clone(),
            to_node: target.node.clone(),
            timestamp: Utc::now(),
            success: outcome.is_ok(),
            dry_run: false,
            workflow_id: Some(run.id()),
        })
        .await;

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                run.fail(StepError::remote(&e));
                return run.settle();
            }
        };
        info!(guest = %guest, target = %params.target_cluster, node = %target.node, "Guest migrated across clusters");
        let index = run.current();
        run.complete(describe_migration(&result.task_id, result.message, &validation));

        if params.delete_source {
            let outcome = match self
                .gateway
                .delete_guest_source(
                    &self.session,
                    &guest.cluster,
                    &guest.node,
                    guest.guest_type,
                    guest.id,
                )
                .await
            {
                Ok(()) => BestEffortOutcome {
                    label: DELETE_SOURCE_LABEL.to_string(),
                    success: true,
                    message: format!("removed source copy on {}", guest.node),
                },
                Err(e) => BestEffortOutcome {
                    label: DELETE_SOURCE_LABEL.to_string(),
                    success: false,
                    message: e.to_string(),
                },
            };
            run.attach_best_effort(index, outcome);
        }
        run.settle()
    }

    /// One guest after another. A failed guest marks its step and the
    /// whole run Failed, but the rest still get their turn.
    pub async fn bulk_migrate(
        &self,
        params: BulkMigrationParams,
        observer: &dyn ProgressObserver,
    ) -> Workflow {
        let kind = WorkflowKind::BulkMigration {
            cluster: params.cluster.clone(),
            target_node: params.target_node.clone(),
        };

        if params.guests.is_empty() {
            let mut run = WorkflowRun::start(Workflow::new(kind, ["Select guests to migrate"]), observer);
            run.begin();
            run.fail(StepError::validation("no guests selected"));
            return run.settle();
        }

        let descriptions: Vec<String> = params
            .guests
            .iter()
            .map(|g| format!("Migrate {g} to {}", params.target_node))
            .collect();
        let mut run = WorkflowRun::start(Workflow::new(kind, descriptions), observer);

        for guest in &params.guests {
            run.begin();
            if guest.cluster != params.cluster {
                run.fail_without_halting(StepError::validation(format!(
                    "{guest} is not part of cluster {}",
                    params.cluster
                )));
                continue;
            }

            let child = self
                .migrate_guest(
                    GuestMigrationParams {
                        guest: guest.clone(),
                        target_node: params.target_node.clone(),
                        target_storage: params.target_storage.clone(),
                        online: params.online,
                        force_large_online: params.force_large_online,
                        with_local_disks: false,
                    },
                    &NoProgress,
                )
                .await;

            if child.succeeded() {
                let detail = child.steps.last().and_then(|s| s.detail.clone());
                run.complete(detail);
            } else {
                let error = child
                    .failed_step()
                    .and_then(|(_, step)| step.error.clone())
                    .unwrap_or_else(|| StepError::validation(format!("{guest} did not migrate")));
                run.fail_without_halting(error);
            }
            run.push_child(child);
        }
        run.settle()
    }

    /// Steps 0 and 1 shared by both migration flavors. `None` means the run
    /// has already been failed.
    async fn read_and_validate(
        &self,
        run: &mut WorkflowRun<'_>,
        guest: &GuestRef,
        same_cluster_target: Option<&str>,
        online: bool,
        force_large_online: bool,
    ) -> Option<(ConfigFinding, ValidationResult)> {
        run.begin();
        let config = match self
            .gateway
            .get_guest_config(&self.session, &guest.cluster, &guest.node, guest.guest_type, guest.id)
            .await
        {
            Ok(config) => config,
            Err(e) => {
                run.fail(StepError::remote(&e));
                return None;
            }
        };
        let finding = inspect(&config);
        run.complete(Some(format!(
            "{:.1} GB of disks, {} on local storage",
            finding.total_disk_gb,
            finding.local_disks.len()
        )));

        run.begin();
        let mut validation = PreflightValidator::new(self.large_disk_threshold_gb)
            .acknowledge_large_online(force_large_online)
            .validate(&finding, guest.guest_type, online);
        if same_cluster_target == Some(guest.node.as_str()) {
            validation.blocks.push(PreflightBlock::SameTargetNode {
                node: guest.node.clone(),
            });
        }

        if validation.is_blocked() {
            run.fail(StepError::validation(validation.summary()));
            return None;
        }
        let detail = if validation.warnings.is_empty() {
            "no findings".to_string()
        } else {
            validation.summary()
        };
        run.complete(Some(detail));
        Some((finding, validation))
    }

    fn resolve_target(
        &self,
        params: &CrossClusterMigrationParams,
        inventory: &ClusterInventory,
    ) -> Result<ResolvedTarget, StepError> {
        let cluster = &params.target_cluster;

        let node = match &params.target_node {
            Some(name) => match inventory.node(name) {
                Some(node) if node.is_schedulable() => node.name.clone(),
                Some(_) => {
                    return Err(StepError::validation(format!(
                        "node {name} of cluster {cluster} is offline or in maintenance"
                    )))
                }
                None => {
                    return Err(StepError::validation(format!(
                        "cluster {cluster} has no node named {name}"
                    )))
                }
            },
            None => healthiest_node(&self.weights, &inventory.nodes)
                .map(|n| n.name.clone())
                .ok_or_else(|| {
                    StepError::validation(format!("cluster {cluster} has no schedulable node"))
                })?,
        };

        let storage = match &params.target_storage {
            Some(name) if inventory.has_storage(name) => name.clone(),
            Some(name) => {
                return Err(StepError::validation(format!(
                    "storage {name} does not exist on cluster {cluster}"
                )))
            }
            None => inventory
                .storages
                .iter()
                .find(|s| s.shared)
                .or_else(|| inventory.storages.first())
                .map(|s| s.name.clone())
                .ok_or_else(|| StepError::validation(format!("cluster {cluster} has no storage")))?,
        };

        let bridge = match &params.target_bridge {
            Some(name) if inventory.has_bridge(name) => name.clone(),
            Some(name) => {
                return Err(StepError::validation(format!(
                    "bridge {name} does not exist on cluster {cluster}"
                )))
            }
            None if inventory.has_bridge(DEFAULT_BRIDGE) => DEFAULT_BRIDGE.to_string(),
            None => inventory
                .bridges
                .first()
                .map(|b| b.name.clone())
                .ok_or_else(|| StepError::validation(format!("cluster {cluster} has no bridge")))?,
        };

        let guest_id = params.new_id.unwrap_or(params.guest.id);
        if inventory.guests.iter().any(|g| g.id == guest_id) {
            return Err(StepError::validation(format!(
                "guest id {guest_id} is already taken on cluster {cluster}"
            )));
        }

        Ok(ResolvedTarget {
            node,
            storage,
            bridge,
            guest_id,
        })
    }
}

fn describe_migration(
    task_id: &Option<String>,
    message: String,
    validation: &ValidationResult,
) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(task) = task_id {
        parts.push(format!("task {task}"));
    }
    if validation.downgraded_to_offline {
        parts.push("containers migrate offline".to_string());
    }
    parts.extend(non_empty(message));
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_detail_notes_offline_downgrade() {
        let validation = ValidationResult {
            downgraded_to_offline: true,
            ..Default::default()
        };
        let detail = describe_migration(&Some("UPID:1".into()), String::new(), &validation);
        assert_eq!(detail.as_deref(), Some("task UPID:1, containers migrate offline"));
        assert_eq!(describe_migration(&None, " ".into(), &ValidationResult::default()), None);
    }
}
