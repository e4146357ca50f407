//! Garbage collector
//!
//! Deletes finished jobs once their `ttlSecondsAfterFinished` has elapsed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crds::Job;
use kube::api::{DeleteParams, Preconditions, PropagationPolicy};
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::watcher;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Span};

use crate::error::ControllerError;
use crate::supervisor::Controller;
use crate::watcher::run_controller;

/// Cleans up finished jobs after their TTL.
pub struct GarbageCollector {
    client: Client,
    span: Span,
}

impl GarbageCollector {
    /// Creates a garbage collector.
    pub fn new(client: Client, span: Span) -> Self {
        Self { client, span }
    }
}

struct GcContext {
    client: Client,
    span: Span,
}

/// When a job becomes eligible for deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// No TTL, not finished, or finish time unknown
    Never,
    /// TTL has elapsed
    Expired,
    /// TTL elapses after this long
    After(Duration),
}

/// Evaluates the job's TTL against `now`.
pub fn expiry(job: &Job, now: DateTime<Utc>) -> Expiry {
    let Some(ttl) = job.spec.ttl_seconds_after_finished else {
        return Expiry::Never;
    };
    if !job.phase().is_finished() {
        return Expiry::Never;
    }
    let Some(finished_at) = job.status.as_ref().and_then(|s| s.state.last_transition_time) else {
        return Expiry::Never;
    };

    let expire_at = finished_at + chrono::Duration::seconds(i64::from(ttl));
    match (expire_at - now).to_std() {
        Ok(left) if !left.is_zero() => Expiry::After(left),
        _ => Expiry::Expired,
    }
}

#[async_trait]
impl Controller for GarbageCollector {
    fn name(&self) -> &'static str {
        "garbage-collector"
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), ControllerError> {
        let jobs: Api<Job> = Api::all(self.client.clone());
        let controller = kube_runtime::Controller::new(jobs, watcher::Config::default());
        let context = Arc::new(GcContext {
            client: self.client.clone(),
            span: self.span.clone(),
        });

        run_controller(controller, reconcile, context, 1, cancel, self.span.clone(), "Job").await;
        Ok(())
    }
}

async fn reconcile(job: Arc<Job>, ctx: Arc<GcContext>) -> Result<Action, ControllerError> {
    match expiry(&job, Utc::now()) {
        Expiry::Never => return Ok(Action::await_change()),
        Expiry::After(left) => {
            debug!(parent: &ctx.span, job = %job.name_any(), left_secs = left.as_secs(), "Job not expired yet");
            return Ok(Action::requeue(left));
        }
        Expiry::Expired => {}
    }

    let namespace = job
        .namespace()
        .ok_or(ControllerError::MissingObjectKey("metadata.namespace"))?;
    let api: Api<Job> = Api::namespaced(ctx.client.clone(), &namespace);

    // Cached copy may be stale; the TTL could have been extended.
    let Some(fresh) = api.get_opt(&job.name_any()).await? else {
        return Ok(Action::await_change());
    };
    match expiry(&fresh, Utc::now()) {
        Expiry::Never => return Ok(Action::await_change()),
        Expiry::After(left) => return Ok(Action::requeue(left)),
        Expiry::Expired => {}
    }

    let params = DeleteParams {
        propagation_policy: Some(PropagationPolicy::Background),
        preconditions: Some(Preconditions {
            uid: fresh.uid(),
            resource_version: None,
        }),
        ..Default::default()
    };

    match api.delete(&fresh.name_any(), &params).await {
        Ok(_) => {
            info!(parent: &ctx.span, job = %format!("{}/{}", namespace, fresh.name_any()), "Deleted expired job");
        }
        Err(kube::Error::Api(e)) if e.code == 404 => {}
        Err(e) => return Err(e.into()),
    }

    Ok(Action::await_change())
}
