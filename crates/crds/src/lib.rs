//! Batch CRD Definitions
//!
//! Kubernetes Custom Resource Definitions shared by the batch controllers
//! and job plugins.

pub mod job;
pub mod keys;
pub mod pod_group;
pub mod queue;

pub use job::*;
pub use keys::*;
pub use pod_group::*;
pub use queue::*;
