/*
* Workflow State Machine
* ----------------------
* @project: cluster-lifecycle-manager
*
* Every composite operation (join, remove, move, migrate, rebalance) is a
* Workflow: a tagged kind, an ordered list of steps, a cursor and an overall
* status. One driver (WorkflowRun) advances it one step at a time:
*
*   Idle -> Running -> step[0] Running -> Done -> step[1] Running -> ...
*                                      \-> Error => workflow Failed, full stop
*
* Forward only. Nothing that is Done ever gets retried or rolled back from
* here; when a step fails halfway through a node move the cluster really is
* in that state, and the step trace is how the operator finds out.
*/

pub mod migration;
pub mod orchestrator;
pub mod rebalance;
pub mod step;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cluster::models::{ClusterId, GuestRef};
pub use migration::{BulkMigrationParams, CrossClusterMigrationParams, GuestMigrationParams};
pub use orchestrator::{NodeJoinParams, NodeMoveParams, NodeRemoveParams, WorkflowOrchestrator};
pub use rebalance::RebalanceParams;
pub use step::{BestEffortOutcome, StepError, StepErrorKind, StepStatus, WorkflowStep};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Idle,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowKind {
    NodeJoin {
        cluster: ClusterId,
        ip: String,
    },
    NodeRemove {
        cluster: ClusterId,
        node: String,
    },
    NodeMove {
        source: ClusterId,
        target: ClusterId,
        node: String,
    },
    GuestMigration {
        guest: GuestRef,
        target_node: String,
    },
    CrossClusterMigration {
        guest: GuestRef,
        target_cluster: ClusterId,
    },
    BulkMigration {
        cluster: ClusterId,
        target_node: String,
    },
    GroupRebalance {
        clusters: Vec<ClusterId>,
    },
}

impl WorkflowKind {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowKind::NodeJoin { .. } => "node_join",
            WorkflowKind::NodeRemove { .. } => "node_remove",
            WorkflowKind::NodeMove { .. } => "node_move",
            WorkflowKind::GuestMigration { .. } => "guest_migration",
            WorkflowKind::CrossClusterMigration { .. } => "cross_cluster_migration",
            WorkflowKind::BulkMigration { .. } => "bulk_migration",
            WorkflowKind::GroupRebalance { .. } => "group_rebalance",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub kind: WorkflowKind,
    pub steps: Vec<WorkflowStep>,
    pub current: usize,
    pub status: WorkflowStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Sub-workflows kept for display, e.g. every guest of a bulk migration.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Workflow>,
}

impl Workflow {
    pub fn new<S: Into<String>>(kind: WorkflowKind, steps: impl IntoIterator<Item = S>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            steps: steps.into_iter().map(WorkflowStep::new).collect(),
            current: 0,
            status: WorkflowStatus::Idle,
            started_at: None,
            finished_at: None,
            children: Vec::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, WorkflowStatus::Succeeded | WorkflowStatus::Failed)
    }

    pub fn succeeded(&self) -> bool {
        self.status == WorkflowStatus::Succeeded
    }

    pub fn step(&self, index: usize) -> Option<&WorkflowStep> {
        self.steps.get(index)
    }

    /// The step that halted the workflow, if any.
    pub fn failed_step(&self) -> Option<(usize, &WorkflowStep)> {
        self.steps
            .iter()
            .enumerate()
            .find(|(_, s)| s.status == StepStatus::Error)
    }

    /// Best-effort follow-ups that did not work out.
    pub fn best_effort_failures(&self) -> Vec<(usize, &BestEffortOutcome)> {
        self.steps
            .iter()
            .enumerate()
            .flat_map(|(i, s)| s.best_effort.iter().filter(|o| !o.success).map(move |o| (i, o)))
            .collect()
    }
}

/// Snapshot pushed to observers after every transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepUpdate {
    pub workflow_id: Uuid,
    pub workflow_status: WorkflowStatus,
    pub index: usize,
    pub step: WorkflowStep,
}

pub trait ProgressObserver: Send + Sync {
    fn on_update(&self, update: &StepUpdate);
}

impl<F> ProgressObserver for F
where
    F: Fn(&StepUpdate) + Send + Sync,
{
    fn on_update(&self, update: &StepUpdate) {
        self(update)
    }
}

/// Forwards every update into a tokio channel.
pub struct ChannelObserver(pub UnboundedSender<StepUpdate>);

impl ProgressObserver for ChannelObserver {
    fn on_update(&self, update: &StepUpdate) {
        // receiver gone means nobody is watching, which is fine
        let _ = self.0.send(update.clone());
    }
}

/// For callers that only care about the final outcome.
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_update(&self, _update: &StepUpdate) {}
}

/// The one driver that moves a workflow forward.
pub struct WorkflowRun<'a> {
    workflow: Workflow,
    observer: &'a dyn ProgressObserver,
}

impl<'a> WorkflowRun<'a> {
    pub fn start(mut workflow: Workflow, observer: &'a dyn ProgressObserver) -> Self {
        workflow.status = WorkflowStatus::Running;
        workflow.started_at = Some(Utc::now());
        info!(
            workflow_id = %workflow.id,
            workflow = workflow.kind.name(),
            steps = workflow.steps.len(),
            "Workflow started"
        );
        Self { workflow, observer }
    }

    pub fn id(&self) -> Uuid {
        self.workflow.id
    }

    pub fn current(&self) -> usize {
        self.workflow.current
    }

    /// Marks the current step running.
    pub fn begin(&mut self) {
        let index = self.workflow.current;
        if let Some(step) = self.workflow.steps.get_mut(index) {
            step.status = StepStatus::Running;
            info!(
                workflow_id = %self.workflow.id,
                step = index,
                description = %step.description,
                "Step running"
            );
        }
        self.notify(index);
    }

    /// Marks the current step done and moves the cursor.
    pub fn complete(&mut self, detail: Option<String>) {
        let index = self.workflow.current;
        if let Some(step) = self.workflow.steps.get_mut(index) {
            step.status = StepStatus::Done;
            step.detail = detail;
        }
        self.workflow.current += 1;
        self.finish_if_exhausted();
        info!(workflow_id = %self.workflow.id, step = index, "Step done");
        self.notify(index);
    }

    /// Marks the current step failed and halts the workflow.
    pub fn fail(&mut self, error: StepError) {
        let index = self.workflow.current;
        error!(
            workflow_id = %self.workflow.id,
            step = index,
            error = %error,
            "Workflow halted"
        );
        if let Some(step) = self.workflow.steps.get_mut(index) {
            step.status = StepStatus::Error;
            step.error = Some(error);
        }
        self.workflow.status = WorkflowStatus::Failed;
        self.workflow.finished_at = Some(Utc::now());
        self.notify(index);
    }

    /// Records a failure for one entry of a step that keeps going (bulk).
    pub fn fail_without_halting(&mut self, error: StepError) {
        let index = self.workflow.current;
        warn!(
            workflow_id = %self.workflow.id,
            step = index,
            error = %error,
            "Step failed, continuing"
        );
        if let Some(step) = self.workflow.steps.get_mut(index) {
            step.status = StepStatus::Error;
            step.error = Some(error);
        }
        self.workflow.current += 1;
        self.finish_if_exhausted();
        self.notify(index);
    }

    /// Attaches a best-effort outcome to an already finished step.
    pub fn attach_best_effort(&mut self, index: usize, outcome: BestEffortOutcome) {
        if !outcome.success {
            warn!(
                workflow_id = %self.workflow.id,
                step = index,
                label = %outcome.label,
                message = %outcome.message,
                "Best-effort follow-up failed"
            );
        }
        if let Some(step) = self.workflow.steps.get_mut(index) {
            step.best_effort.push(outcome);
        }
        self.notify(index);
    }

    /// Finishes early; steps that never ran are dropped from the trace.
    pub fn conclude(&mut self, detail: impl Into<String>) {
        let index = self.workflow.current;
        if let Some(step) = self.workflow.steps.get_mut(index) {
            step.status = StepStatus::Done;
            step.detail = Some(detail.into());
        }
        self.workflow.steps.truncate(index + 1);
        self.workflow.current = self.workflow.steps.len();
        self.workflow.status = WorkflowStatus::Succeeded;
        self.workflow.finished_at = Some(Utc::now());
        info!(workflow_id = %self.workflow.id, step = index, "Workflow concluded early");
        self.notify(index);
    }

    pub fn push_child(&mut self, child: Workflow) {
        self.workflow.children.push(child);
    }

    /// Closes a run whose steps may have failed without halting.
    pub fn settle(mut self) -> Workflow {
        if !self.workflow.is_finished() {
            self.workflow.current = self.workflow.steps.len();
            self.finish_if_exhausted();
        }
        info!(
            workflow_id = %self.workflow.id,
            status = ?self.workflow.status,
            "Workflow finished"
        );
        self.workflow
    }

    fn finish_if_exhausted(&mut self) {
        if self.workflow.current < self.workflow.steps.len() {
            return;
        }
        let any_failed = self
            .workflow
            .steps
            .iter()
            .any(|s| s.status == StepStatus::Error);
        self.workflow.status = if any_failed {
            WorkflowStatus::Failed
        } else {
            WorkflowStatus::Succeeded
        };
        self.workflow.finished_at = Some(Utc::now());
    }

    fn notify(&self, index: usize) {
        if let Some(step) = self.workflow.steps.get(index) {
            self.observer.on_update(&StepUpdate {
                workflow_id: self.workflow.id,
                workflow_status: self.workflow.status,
                index,
                step: step.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn kind() -> WorkflowKind {
        WorkflowKind::NodeRemove {
            cluster: ClusterId::new("a"),
            node: "pve2".into(),
        }
    }

    #[test]
    fn runs_forward_to_success() {
        let seen = Mutex::new(Vec::new());
        let observer = |u: &StepUpdate| seen.lock().unwrap().push((u.index, u.step.status));

        let mut run = WorkflowRun::start(Workflow::new(kind(), ["one", "two"]), &observer);
        run.begin();
        run.complete(None);
        run.begin();
        run.complete(Some("ok".into()));
        let wf = run.settle();

        assert!(wf.succeeded());
        assert_eq!(wf.steps[1].detail.as_deref(), Some("ok"));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (0, StepStatus::Running),
                (0, StepStatus::Done),
                (1, StepStatus::Running),
                (1, StepStatus::Done),
            ]
        );
    }

    #[test]
    fn failure_halts_and_leaves_later_steps_pending() {
        let mut run = WorkflowRun::start(Workflow::new(kind(), ["one", "two", "three"]), &NoProgress);
        run.begin();
        run.complete(None);
        run.begin();
        run.fail(StepError::validation("nope"));
        let wf = run.settle();

        assert_eq!(wf.status, WorkflowStatus::Failed);
        assert_eq!(wf.steps[0].status, StepStatus::Done);
        assert_eq!(wf.failed_step().map(|(i, _)| i), Some(1));
        assert_eq!(wf.steps[2].status, StepStatus::Pending);
    }

    #[test]
    fn best_effort_failure_keeps_success() {
        let mut run = WorkflowRun::start(Workflow::new(kind(), ["remove"]), &NoProgress);
        run.begin();
        run.complete(None);
        run.attach_best_effort(
            0,
            BestEffortOutcome {
                label: "cleanup".into(),
                success: false,
                message: "ssh refused".into(),
            },
        );
        let wf = run.settle();
        assert!(wf.succeeded());
        assert_eq!(wf.best_effort_failures().len(), 1);
    }

    #[test]
    fn conclude_drops_unrun_steps() {
        let mut run = WorkflowRun::start(Workflow::new(kind(), ["check", "act"]), &NoProgress);
        run.begin();
        run.conclude("nothing to do");
        let wf = run.settle();
        assert!(wf.succeeded());
        assert_eq!(wf.steps.len(), 1);
    }

    #[tokio::test]
    async fn channel_observer_receives_updates() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let observer = ChannelObserver(tx);
        let mut run = WorkflowRun::start(Workflow::new(kind(), ["only"]), &observer);
        run.begin();
        run.complete(None);
        drop(run.settle());

        assert_eq!(rx.recv().await.unwrap().step.status, StepStatus::Running);
        let last = rx.recv().await.unwrap();
        assert_eq!(last.workflow_status, WorkflowStatus::Succeeded);
    }
}
