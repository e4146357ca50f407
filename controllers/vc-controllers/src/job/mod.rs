//! Job controller
//!
//! Applies each job's declared plugins, keeps a pod group and one pod per
//! task replica in place, and reports pod counts and phase. A finalizer
//! gives plugins the chance to clean up before the job disappears.
//!
//! Plugin side effects are recorded on the job status before any pod is
//! created, so a pod never references a credential that does not exist.

mod cluster;
mod pods;
mod status;

pub use cluster::{JobCluster, KubeJobCluster};
pub use pods::build_pod;
pub use status::{desired_status, next_phase, PodCounts};

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use crds::{make_pod_name, Job, PodGroup, PodGroupSpec, DEFAULT_QUEUE, JOB_NAME_LABEL};
use job_plugins::{JobPlugin, PluginClientset, PluginError, PluginRegistry};
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube_runtime::watcher;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Span};

use crate::error::ControllerError;
use crate::supervisor::Controller;
use crate::watcher::run_controller;

/// Finalizer held while plugins may still have resources to remove.
pub const JOB_FINALIZER: &str = "volcano.sh/job-plugins";

/// Reconciles `Job` resources.
pub struct JobController {
    client: Client,
    registry: PluginRegistry,
    worker_threads: u16,
    scheduler_name: String,
    span: Span,
}

impl JobController {
    /// Creates a job controller.
    pub fn new(
        client: Client,
        registry: PluginRegistry,
        worker_threads: u16,
        scheduler_name: String,
        span: Span,
    ) -> Self {
        Self {
            client,
            registry,
            worker_threads,
            scheduler_name,
            span,
        }
    }
}

#[async_trait]
impl Controller for JobController {
    fn name(&self) -> &'static str {
        "job"
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), ControllerError> {
        let jobs: Api<Job> = Api::all(self.client.clone());
        let pods: Api<Pod> = Api::all(self.client.clone());
        let pod_groups: Api<PodGroup> = Api::all(self.client.clone());

        let controller = kube_runtime::Controller::new(jobs, watcher::Config::default())
            .owns(pods, watcher::Config::default().labels(JOB_NAME_LABEL))
            .owns(pod_groups, watcher::Config::default());

        let context = Arc::new(JobContext {
            client: self.client.clone(),
            reconciler: JobReconciler {
                cluster: Arc::new(KubeJobCluster::new(self.client.clone())),
                registry: self.registry.clone(),
                clientset: PluginClientset::from_client(self.client.clone(), self.span.clone()),
                scheduler_name: self.scheduler_name.clone(),
                span: self.span.clone(),
            },
        });

        run_controller(
            controller,
            reconcile,
            context,
            self.worker_threads,
            cancel,
            self.span.clone(),
            "Job",
        )
        .await;
        Ok(())
    }
}

struct JobContext {
    client: Client,
    reconciler: JobReconciler,
}

async fn reconcile(job: Arc<Job>, ctx: Arc<JobContext>) -> Result<Action, ControllerError> {
    let namespace = job
        .namespace()
        .ok_or(ControllerError::MissingObjectKey("metadata.namespace"))?;
    let api: Api<Job> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer(&api, JOB_FINALIZER, job, |event| async move {
        match event {
            FinalizerEvent::Apply(job) => ctx.reconciler.sync_job(&job).await,
            FinalizerEvent::Cleanup(job) => ctx.reconciler.kill_job(&job).await,
        }
    })
    .await
    .map_err(|e| ControllerError::Finalizer(Box::new(e)))
}

/// Drives plugins, pods and status for one job at a time.
struct JobReconciler {
    cluster: Arc<dyn JobCluster>,
    registry: PluginRegistry,
    clientset: PluginClientset,
    scheduler_name: String,
    span: Span,
}

impl JobReconciler {
    fn build_plugins(&self, job: &Job) -> Result<Vec<Arc<dyn JobPlugin>>, ControllerError> {
        job.spec
            .plugins
            .iter()
            .map(|(name, arguments)| {
                self.registry
                    .build(name, self.clientset.clone(), arguments)
                    .map_err(ControllerError::from)
            })
            .collect()
    }

    /// Applies plugins, records their markers, then creates missing pods.
    ///
    /// Markers set by plugins that succeeded are persisted even when a later
    /// plugin fails; no pod is created in that case.
    async fn sync_job(&self, job: &Job) -> Result<Action, ControllerError> {
        let name = job.name_any();
        let namespace = job
            .namespace()
            .ok_or(ControllerError::MissingObjectKey("metadata.namespace"))?;
        let key = format!("{}/{}", namespace, name);
        let plugins = self.build_plugins(job)?;

        let mut working = job.clone();
        let mut failed = None;
        for plugin in &plugins {
            if let Err(e) = plugin.on_job_add(&mut working).await {
                failed = Some(e);
                break;
            }
        }

        let markers = working
            .status
            .as_ref()
            .map(|s| s.controlled_resources.clone())
            .unwrap_or_default();
        let previous = job
            .status
            .as_ref()
            .map(|s| s.controlled_resources.clone())
            .unwrap_or_default();
        if markers != previous {
            let patch = json!({ "status": { "controlledResources": markers } });
            self.cluster.patch_job_status(&namespace, &name, &patch).await?;
            info!(parent: &self.span, job = %key, "Recorded plugin markers");
        }

        if let Some(e) = failed {
            return Err(e.into());
        }

        if self.cluster.ensure_pod_group(&job_pod_group(&working)?).await? {
            debug!(parent: &self.span, pod_group = %name, "Created pod group");
        }

        let existing = self.cluster.list_job_pods(&namespace, &name).await?;

        if !working.phase().is_finished() {
            let existing_names: BTreeSet<String> =
                existing.iter().map(ResourceExt::name_any).collect();

            for task in &working.spec.tasks {
                for index in 0..task.replicas {
                    if existing_names.contains(&make_pod_name(&name, &task.name, index)) {
                        continue;
                    }

                    let mut pod = build_pod(&working, task, index, &self.scheduler_name)?;
                    for plugin in &plugins {
                        plugin.on_pod_create(&mut pod, &working)?;
                    }

                    if self.cluster.create_pod(&pod).await? {
                        debug!(parent: &self.span, pod = %pod.name_any(), "Created pod");
                    }
                }
            }
        }

        let status = desired_status(&working, PodCounts::from_pods(&existing), Utc::now());
        if working.status.as_ref() != Some(&status) {
            let patch = json!({ "status": status });
            self.cluster.patch_job_status(&namespace, &name, &patch).await?;
            if working.phase() != status.state.phase {
                info!(
                    parent: &self.span,
                    job = %key,
                    phase = ?status.state.phase,
                    "Job phase changed"
                );
            }
        }

        Ok(Action::await_change())
    }

    /// Runs every plugin's delete hook. Plugins that cannot be built were
    /// never applied and are skipped so deletion is not blocked.
    async fn kill_job(&self, job: &Job) -> Result<Action, ControllerError> {
        for (name, arguments) in &job.spec.plugins {
            let plugin = match self.registry.build(name, self.clientset.clone(), arguments) {
                Ok(plugin) => plugin,
                Err(e @ (PluginError::NotFound(_) | PluginError::InvalidArguments { .. })) => {
                    warn!(parent: &self.span, plugin = %name, error = %e, "Skipping cleanup for plugin that was never applied");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            plugin.on_job_delete(job).await?;
        }

        info!(parent: &self.span, job = %job.name_any(), "Job plugins cleaned up");
        Ok(Action::await_change())
    }
}

/// Pod group gating the job's pods, named after the job.
pub fn job_pod_group(job: &Job) -> Result<PodGroup, ControllerError> {
    let name = job
        .metadata
        .name
        .as_deref()
        .ok_or(ControllerError::MissingObjectKey("metadata.name"))?;
    let owner = job
        .controller_owner_ref(&())
        .ok_or(ControllerError::MissingObjectKey("metadata.uid"))?;

    let mut pod_group = PodGroup::new(
        name,
        PodGroupSpec {
            min_member: job.spec.min_available.unwrap_or_else(|| job.total_replicas()),
            queue: Some(job.spec.queue.clone().unwrap_or_else(|| DEFAULT_QUEUE.to_string())),
            priority_class_name: None,
        },
    );
    pod_group.metadata.namespace = job.metadata.namespace.clone();
    pod_group.metadata.owner_references = Some(vec![owner]);
    Ok(pod_group)
}
