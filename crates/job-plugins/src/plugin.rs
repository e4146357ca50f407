//! Job lifecycle plugin contract.

use std::sync::Arc;

use async_trait::async_trait;
use crds::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use tracing::Span;

use crate::error::PluginError;
use crate::secret::{KubeSecretStore, SecretStore};

/// Prefix of the controlled-resources key a plugin uses as its
/// completion marker.
pub const MARKER_PREFIX: &str = "plugin-";

/// Controlled-resources key marking `plugin_name` as applied.
pub fn marker_key(plugin_name: &str) -> String {
    format!("{}{}", MARKER_PREFIX, plugin_name)
}

/// Capabilities handed to every plugin at construction.
#[derive(Clone)]
pub struct PluginClientset {
    /// Store used for externally persisted resources
    pub secrets: Arc<dyn SecretStore>,
    /// Parent span for everything the plugin logs
    pub span: Span,
}

impl PluginClientset {
    /// Creates a clientset backed by the Kubernetes API.
    pub fn from_client(client: Client, span: Span) -> Self {
        Self {
            secrets: Arc::new(KubeSecretStore::new(client)),
            span,
        }
    }

    /// Creates a clientset over an arbitrary store.
    pub fn new(secrets: Arc<dyn SecretStore>, span: Span) -> Self {
        Self { secrets, span }
    }
}

impl std::fmt::Debug for PluginClientset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginClientset").finish_non_exhaustive()
    }
}

/// Behavior attached to a job's lifecycle.
///
/// The surrounding controller guarantees `on_job_add` completes before any
/// `on_pod_create` for the same job, and that a job is reconciled by one
/// worker at a time. Two concurrent `on_job_add` calls for one job may both
/// observe an unset marker; plugins do not guard against that.
#[async_trait]
pub trait JobPlugin: Send + Sync {
    /// Stable identifier, used for the marker key and registry lookup.
    fn name(&self) -> &str;

    /// Applies one-time side effects for the job. Must be a no-op when the
    /// job's marker for this plugin is already set, and must set it on
    /// success.
    async fn on_job_add(&self, job: &mut Job) -> Result<(), PluginError>;

    /// Removes anything `on_job_add` created outside the job.
    async fn on_job_delete(&self, job: &Job) -> Result<(), PluginError>;

    /// Mutates a pod belonging to the job before it is submitted.
    fn on_pod_create(&self, pod: &mut Pod, job: &Job) -> Result<(), PluginError>;
}

/// Whether the job already records `plugin_name` as applied.
pub fn is_applied(job: &Job, plugin_name: &str) -> bool {
    job.controlled_resource(&marker_key(plugin_name)) == Some(plugin_name)
}

/// Records `plugin_name` as applied on the job's status.
pub fn mark_applied(job: &mut Job, plugin_name: &str) {
    job.status
        .get_or_insert_with(Default::default)
        .controlled_resources
        .insert(marker_key(plugin_name), plugin_name.to_string());
}
