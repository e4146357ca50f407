//! Controller-specific error types.

use job_plugins::PluginError;
use kube::Error as KubeError;
use kube_runtime::finalizer;
use leader_election::ElectionError;
use thiserror::Error;

/// Errors that can occur in the controller manager.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Job plugin error
    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// Leader election ended
    #[error(transparent)]
    Election(#[from] ElectionError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Health endpoint could not be started
    #[error("failed to start healthz on {address}: {source}")]
    Healthz {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Object is missing a field the controller relies on
    #[error("object is missing {0}")]
    MissingObjectKey(&'static str),

    /// Finalizer handling failed
    #[error("finalizer error: {0}")]
    Finalizer(#[source] Box<finalizer::Error<ControllerError>>),

    /// A controller worker stopped before shutdown was requested
    #[error("controller {0} exited unexpectedly")]
    WorkerExited(String),

    /// Controllers returned while leader election was disabled
    #[error("finished without leader elect")]
    FinishedWithoutLeaderElection,
}
