//! Mock SecretStore for unit testing
//!
//! Keeps secrets in memory and counts writes so tests can assert how many
//! external calls a plugin made.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;

use crate::error::StoreError;
use crate::secret::SecretStore;

/// In-memory [`SecretStore`].
#[derive(Clone, Default)]
pub struct MockSecretStore {
    secrets: Arc<Mutex<BTreeMap<(String, String), Secret>>>,
    creates: Arc<AtomicUsize>,
    deletes: Arc<AtomicUsize>,
    unavailable: Arc<AtomicBool>,
}

impl MockSecretStore {
    /// Create an empty mock store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (or succeed again)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of create calls received, including failed ones
    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Number of delete calls received, including failed ones
    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Look up a stored secret
    pub fn get(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Number of stored secrets
    pub fn len(&self) -> usize {
        self.secrets.lock().unwrap().len()
    }

    /// Whether the store holds no secrets
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("mock store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SecretStore for MockSecretStore {
    async fn create(&self, secret: &Secret) -> Result<(), StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let key = (
            secret.metadata.namespace.clone().unwrap_or_default(),
            secret.metadata.name.clone().unwrap_or_default(),
        );
        self.secrets
            .lock()
            .unwrap()
            .entry(key)
            .or_insert_with(|| secret.clone());
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.secrets
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }
}
