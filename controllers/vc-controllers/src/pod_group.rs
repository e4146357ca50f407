//! Pod-group controller
//!
//! Gives standalone pods bound to our scheduler a single-member pod group
//! so the scheduler can treat them like job pods.

use std::sync::Arc;

use async_trait::async_trait;
use crds::{PodGroup, PodGroupSpec, POD_GROUP_ANNOTATION, QUEUE_NAME_ANNOTATION};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::watcher;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Span};

use crate::error::ControllerError;
use crate::supervisor::Controller;
use crate::watcher::run_controller;

/// Creates pod groups for ungrouped pods.
pub struct PodGroupController {
    client: Client,
    scheduler_name: String,
    span: Span,
}

impl PodGroupController {
    /// Creates a pod-group controller for pods scheduled by `scheduler_name`.
    pub fn new(client: Client, scheduler_name: String, span: Span) -> Self {
        Self {
            client,
            scheduler_name,
            span,
        }
    }
}

struct PodGroupContext {
    client: Client,
    scheduler_name: String,
    span: Span,
}

#[async_trait]
impl Controller for PodGroupController {
    fn name(&self) -> &'static str {
        "pod-group"
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), ControllerError> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let selector = format!("spec.schedulerName={}", self.scheduler_name);
        let controller =
            kube_runtime::Controller::new(pods, watcher::Config::default().fields(&selector));

        let context = Arc::new(PodGroupContext {
            client: self.client.clone(),
            scheduler_name: self.scheduler_name.clone(),
            span: self.span.clone(),
        });

        run_controller(controller, reconcile, context, 1, cancel, self.span.clone(), "Pod").await;
        Ok(())
    }
}

/// Whether `pod` should get a generated pod group.
pub fn needs_pod_group(pod: &Pod, scheduler_name: &str) -> bool {
    let scheduled_by_us = pod
        .spec
        .as_ref()
        .and_then(|s| s.scheduler_name.as_deref())
        == Some(scheduler_name);
    let grouped = pod
        .annotations()
        .get(POD_GROUP_ANNOTATION)
        .is_some_and(|g| !g.is_empty());
    scheduled_by_us && !grouped && pod.metadata.deletion_timestamp.is_none()
}

/// Name of the pod group generated for a pod.
pub fn pod_group_name(pod_uid: &str) -> String {
    format!("podgroup-{}", pod_uid)
}

/// Single-member pod group for `pod`, owned by the pod's controller or,
/// failing that, by the pod itself.
pub fn pod_group_for(pod: &Pod) -> Result<PodGroup, ControllerError> {
    let uid = pod
        .metadata
        .uid
        .as_deref()
        .ok_or(ControllerError::MissingObjectKey("metadata.uid"))?;

    let owner = pod
        .owner_references()
        .iter()
        .find(|r| r.controller == Some(true))
        .cloned()
        .or_else(|| pod.controller_owner_ref(&()))
        .ok_or(ControllerError::MissingObjectKey("metadata.name"))?;

    let mut pod_group = PodGroup::new(
        &pod_group_name(uid),
        PodGroupSpec {
            min_member: 1,
            queue: pod.annotations().get(QUEUE_NAME_ANNOTATION).cloned(),
            priority_class_name: pod.spec.as_ref().and_then(|s| s.priority_class_name.clone()),
        },
    );
    pod_group.metadata.namespace = pod.metadata.namespace.clone();
    pod_group.metadata.owner_references = Some(vec![owner]);
    Ok(pod_group)
}

async fn reconcile(pod: Arc<Pod>, ctx: Arc<PodGroupContext>) -> Result<Action, ControllerError> {
    if !needs_pod_group(&pod, &ctx.scheduler_name) {
        return Ok(Action::await_change());
    }

    let namespace = pod
        .namespace()
        .ok_or(ControllerError::MissingObjectKey("metadata.namespace"))?;
    let pod_group = pod_group_for(&pod)?;
    let group_name = pod_group.name_any();

    let pod_groups: Api<PodGroup> = Api::namespaced(ctx.client.clone(), &namespace);
    match pod_groups.create(&PostParams::default(), &pod_group).await {
        Ok(_) => debug!(parent: &ctx.span, pod_group = %group_name, "Created pod group"),
        Err(kube::Error::Api(e)) if e.code == 409 => {}
        Err(e) => return Err(e.into()),
    }

    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &namespace);
    let patch = json!({ "metadata": { "annotations": { POD_GROUP_ANNOTATION: group_name } } });
    pods.patch(&pod.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;

    info!(
        parent: &ctx.span,
        pod = %format!("{}/{}", namespace, pod.name_any()),
        pod_group = %group_name,
        "Assigned pod group"
    );
    Ok(Action::await_change())
}
