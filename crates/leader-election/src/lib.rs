//! Lease based leader election
//!
//! Only the replica holding the lease runs its workload. Losing the lease
//! cancels the workload and surfaces as an error to the caller, which
//! decides whether to exit or restart.

pub mod elector;
pub mod error;
pub mod kube_lock;
pub mod lock;

#[cfg(any(test, feature = "test-util"))]
pub mod memory;

pub use elector::{
    hostname_uuid, LeaderElectionConfig, LeaderElector, DEFAULT_LEASE_DURATION,
    DEFAULT_RENEW_DEADLINE, DEFAULT_RETRY_PERIOD,
};
pub use error::ElectionError;
pub use kube_lock::LeaseLock;
pub use lock::{LeaderElectionRecord, ResourceLock, VersionedRecord};

#[cfg(any(test, feature = "test-util"))]
pub use memory::{MemoryLock, MemoryLockStore};
