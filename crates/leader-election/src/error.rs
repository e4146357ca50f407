//! Leader election errors

use thiserror::Error;

/// Errors returned by lock construction and the election loop.
///
/// [`LeaderElector::run`](crate::LeaderElector::run) only ever returns one of
/// these; every variant means the caller is no longer authoritative.
#[derive(Debug, Error)]
pub enum ElectionError {
    /// Lock or timing configuration is unusable
    #[error("invalid leader election config: {0}")]
    InvalidConfig(String),

    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The lock store could not be reached
    #[error("lock unavailable: {0}")]
    LockUnavailable(String),

    /// Identity could not be derived from the host
    #[error("failed to resolve hostname: {0}")]
    Hostname(#[from] std::io::Error),

    /// The lease could not be renewed in time or was taken over
    #[error("leaderelection lost for {identity}")]
    LeadershipLost {
        /// Identity that held the lease
        identity: String,
    },

    /// The leading workload returned while the lease was still held
    #[error("leader workload exited: {0}")]
    ActivePhaseExited(String),

    /// Shutdown was requested
    #[error("leader election cancelled")]
    Cancelled,
}
