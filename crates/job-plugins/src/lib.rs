//! Job lifecycle plugins
//!
//! A plugin attaches behavior to three points of a job's life: when the job
//! is first reconciled, when each of its pods is built, and when the job is
//! deleted. Plugins are looked up by name in a [`PluginRegistry`] and built
//! per job from the job's `spec.plugins` argument lists.

pub mod error;
pub mod plugin;
pub mod registry;
pub mod secret;
pub mod ssh;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use error::{PluginError, StoreError};
pub use plugin::{is_applied, mark_applied, marker_key, JobPlugin, PluginClientset};
pub use registry::{PluginBuilder, PluginRegistry};
pub use secret::{KubeSecretStore, SecretStore};

#[cfg(any(test, feature = "test-util"))]
pub use mock::MockSecretStore;
