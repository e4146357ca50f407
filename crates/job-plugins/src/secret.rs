//! Persistence seam for plugin-owned secrets.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;

use crate::error::StoreError;

/// Creates and deletes secrets on behalf of plugins.
///
/// Secrets written through this trait carry deterministic names, so both
/// operations are idempotent: creating a secret that already exists and
/// deleting one that is already gone succeed.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Creates `secret` in its own namespace.
    async fn create(&self, secret: &Secret) -> Result<(), StoreError>;

    /// Deletes the secret `name` in `namespace`.
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}

/// [`SecretStore`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn create(&self, secret: &Secret) -> Result<(), StoreError> {
        let namespace = secret
            .metadata
            .namespace
            .as_deref()
            .unwrap_or("default");
        match self.api(namespace).create(&PostParams::default(), secret).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        match self.api(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
