//! Cluster calls made while syncing a job.

use async_trait::async_trait;
use crds::{Job, PodGroup, JOB_NAME_LABEL};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};

use crate::error::ControllerError;

/// Writes the job controller performs against the cluster.
///
/// Creates return `Ok(false)` when the object already exists.
#[async_trait]
pub trait JobCluster: Send + Sync {
    /// Merge-patches the job's status subresource.
    async fn patch_job_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), ControllerError>;

    /// Creates the pod group unless one with the same name exists.
    async fn ensure_pod_group(&self, pod_group: &PodGroup) -> Result<bool, ControllerError>;

    /// Pods labelled as belonging to the job.
    async fn list_job_pods(&self, namespace: &str, job_name: &str)
        -> Result<Vec<Pod>, ControllerError>;

    /// Submits a pod.
    async fn create_pod(&self, pod: &Pod) -> Result<bool, ControllerError>;
}

/// [`JobCluster`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeJobCluster {
    client: Client,
}

impl KubeJobCluster {
    /// Creates a cluster handle over `client`.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn namespace_of<K: Resource>(object: &K) -> Result<String, ControllerError> {
    object
        .namespace()
        .ok_or(ControllerError::MissingObjectKey("metadata.namespace"))
}

#[async_trait]
impl JobCluster for KubeJobCluster {
    async fn patch_job_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), ControllerError> {
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        jobs.patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        Ok(())
    }

    async fn ensure_pod_group(&self, pod_group: &PodGroup) -> Result<bool, ControllerError> {
        let api: Api<PodGroup> = Api::namespaced(self.client.clone(), &namespace_of(pod_group)?);
        if api.get_opt(&pod_group.name_any()).await?.is_some() {
            return Ok(false);
        }

        match api.create(&PostParams::default(), pod_group).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_job_pods(
        &self,
        namespace: &str,
        job_name: &str,
    ) -> Result<Vec<Pod>, ControllerError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let selector = format!("{}={}", JOB_NAME_LABEL, job_name);
        Ok(pods.list(&ListParams::default().labels(&selector)).await?.items)
    }

    async fn create_pod(&self, pod: &Pod) -> Result<bool, ControllerError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &namespace_of(pod)?);
        match pods.create(&PostParams::default(), pod).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
