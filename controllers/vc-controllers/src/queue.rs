//! Queue controller
//!
//! Keeps each queue's state set and its per-phase job counts current. Any
//! job change requeues the queue the job belongs to.

use std::sync::Arc;

use async_trait::async_trait;
use crds::{Job, JobPhase, Queue, QueueState, QueueStatus, DEFAULT_QUEUE};
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::reflector::ObjectRef;
use kube_runtime::watcher;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Span};

use crate::error::ControllerError;
use crate::supervisor::Controller;
use crate::watcher::run_controller;

/// Reconciles `Queue` resources.
pub struct QueueController {
    client: Client,
    span: Span,
}

impl QueueController {
    /// Creates a queue controller.
    pub fn new(client: Client, span: Span) -> Self {
        Self { client, span }
    }
}

struct QueueContext {
    client: Client,
    span: Span,
}

#[async_trait]
impl Controller for QueueController {
    fn name(&self) -> &'static str {
        "queue"
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), ControllerError> {
        let queues: Api<Queue> = Api::all(self.client.clone());
        let jobs: Api<Job> = Api::all(self.client.clone());

        let controller = kube_runtime::Controller::new(queues, watcher::Config::default())
            .watches(jobs, watcher::Config::default(), |job| {
                Some(ObjectRef::new(queue_of(&job)))
            });

        let context = Arc::new(QueueContext {
            client: self.client.clone(),
            span: self.span.clone(),
        });

        run_controller(controller, reconcile, context, 1, cancel, self.span.clone(), "Queue").await;
        Ok(())
    }
}

async fn reconcile(queue: Arc<Queue>, ctx: Arc<QueueContext>) -> Result<Action, ControllerError> {
    let jobs: Api<Job> = Api::all(ctx.client.clone());
    let job_list = jobs.list(&ListParams::default()).await?;

    let status = queue_status(&queue, &job_list.items);
    if queue.status.as_ref() != Some(&status) {
        let queues: Api<Queue> = Api::all(ctx.client.clone());
        let patch = json!({ "status": status });
        queues
            .patch_status(&queue.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!(parent: &ctx.span, queue = %queue.name_any(), "Updated queue status");
    }

    Ok(Action::await_change())
}

/// Queue a job is submitted to.
pub fn queue_of(job: &Job) -> &str {
    job.spec
        .queue
        .as_deref()
        .filter(|q| !q.is_empty())
        .unwrap_or(DEFAULT_QUEUE)
}

/// Status of `queue` given every job in the cluster.
pub fn queue_status(queue: &Queue, jobs: &[Job]) -> QueueStatus {
    let name = queue.name_any();
    let mut status = QueueStatus {
        state: queue
            .status
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(QueueState::Open),
        ..Default::default()
    };

    for job in jobs.iter().filter(|j| queue_of(j) == name) {
        match job.phase() {
            JobPhase::Pending => status.pending += 1,
            JobPhase::Running => status.running += 1,
            JobPhase::Completed => status.completed += 1,
            JobPhase::Failed => status.failed += 1,
        }
    }

    status
}
