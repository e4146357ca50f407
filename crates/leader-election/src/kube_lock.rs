//! Lease lock backed by `coordination.k8s.io/v1`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;

use crate::error::ElectionError;
use crate::lock::{LeaderElectionRecord, ResourceLock, VersionedRecord};

/// A [`ResourceLock`] stored in a `Lease` object.
///
/// Uses resourceVersion for compare-and-swap: a write against a lease that
/// changed since it was read fails with 409 Conflict.
pub struct LeaseLock {
    api: Api<Lease>,
    namespace: String,
    name: String,
    identity: String,
}

impl LeaseLock {
    /// Creates a lock on `namespace/name` held as `identity`.
    pub fn new(
        client: Client,
        namespace: &str,
        name: &str,
        identity: &str,
    ) -> Result<Self, ElectionError> {
        if namespace.is_empty() {
            return Err(ElectionError::InvalidConfig(
                "lock namespace must not be empty".to_string(),
            ));
        }
        if name.is_empty() {
            return Err(ElectionError::InvalidConfig(
                "lock name must not be empty".to_string(),
            ));
        }
        if identity.is_empty() {
            return Err(ElectionError::InvalidConfig(
                "lock identity must not be empty".to_string(),
            ));
        }

        Ok(Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            name: name.to_string(),
            identity: identity.to_string(),
        })
    }

    fn to_lease(&self, record: &LeaderElectionRecord, version: Option<&str>) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                resource_version: version.map(str::to_string),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(record.holder_identity.clone()),
                lease_duration_seconds: Some(
                    i32::try_from(record.lease_duration.as_secs()).unwrap_or(i32::MAX),
                ),
                acquire_time: Some(MicroTime(record.acquire_time)),
                renew_time: Some(MicroTime(record.renew_time)),
                lease_transitions: Some(record.leader_transitions),
                ..Default::default()
            }),
        }
    }
}

impl std::fmt::Debug for LeaseLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseLock")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("identity", &self.identity)
            .finish()
    }
}

/// Converts a lease into a record, treating missing fields as zero values.
pub(crate) fn record_from_lease(lease: &Lease) -> LeaderElectionRecord {
    let spec = lease.spec.clone().unwrap_or_default();
    let epoch = chrono::DateTime::<Utc>::UNIX_EPOCH;
    LeaderElectionRecord {
        holder_identity: spec.holder_identity.unwrap_or_default(),
        lease_duration: Duration::from_secs(
            u64::try_from(spec.lease_duration_seconds.unwrap_or(0)).unwrap_or(0),
        ),
        acquire_time: spec.acquire_time.map(|t| t.0).unwrap_or(epoch),
        renew_time: spec.renew_time.map(|t| t.0).unwrap_or(epoch),
        leader_transitions: spec.lease_transitions.unwrap_or(0),
    }
}

#[async_trait]
impl ResourceLock for LeaseLock {
    async fn get(&self) -> Result<Option<VersionedRecord>, ElectionError> {
        let lease = match self.api.get(&self.name).await {
            Ok(lease) => lease,
            Err(kube::Error::Api(e)) if e.code == 404 => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let version = lease.metadata.resource_version.clone().ok_or_else(|| {
            ElectionError::LockUnavailable(format!("lease {} missing resourceVersion", self.describe()))
        })?;

        Ok(Some(VersionedRecord {
            record: record_from_lease(&lease),
            version,
        }))
    }

    async fn create(
        &self,
        record: &LeaderElectionRecord,
    ) -> Result<Option<String>, ElectionError> {
        match self
            .api
            .create(&PostParams::default(), &self.to_lease(record, None))
            .await
        {
            Ok(lease) => Ok(Some(lease.metadata.resource_version.unwrap_or_default())),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(
        &self,
        record: &LeaderElectionRecord,
        version: &str,
    ) -> Result<Option<String>, ElectionError> {
        match self
            .api
            .replace(
                &self.name,
                &PostParams::default(),
                &self.to_lease(record, Some(version)),
            )
            .await
        {
            Ok(lease) => Ok(Some(lease.metadata.resource_version.unwrap_or_default())),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    fn describe(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}
