//! Job status derived from the job's pods.

use chrono::{DateTime, Utc};
use crds::{Job, JobPhase, JobState, JobStatus};
use k8s_openapi::api::core::v1::Pod;

/// Pods of a job grouped by phase.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PodCounts {
    pub pending: u32,
    pub running: u32,
    pub succeeded: u32,
    pub failed: u32,
}

impl PodCounts {
    /// Counts pods by `status.phase`; pods without a phase are pending.
    pub fn from_pods<'a>(pods: impl IntoIterator<Item = &'a Pod>) -> Self {
        let mut counts = Self::default();
        for pod in pods {
            match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
                Some("Running") => counts.running += 1,
                Some("Succeeded") => counts.succeeded += 1,
                Some("Failed") => counts.failed += 1,
                _ => counts.pending += 1,
            }
        }
        counts
    }
}

/// Phase the job should be in given its pods.
///
/// Finished phases are terminal. Any failed pod fails the job; the job
/// completes once every replica succeeded, and runs once `min_available`
/// pods are running or done.
pub fn next_phase(current: JobPhase, counts: PodCounts, min_available: u32, total: u32) -> JobPhase {
    if current.is_finished() {
        return current;
    }
    if counts.failed > 0 {
        return JobPhase::Failed;
    }
    if total > 0 && counts.succeeded >= total {
        return JobPhase::Completed;
    }
    if counts.running > 0 && counts.running + counts.succeeded >= min_available {
        return JobPhase::Running;
    }
    JobPhase::Pending
}

/// Status the job should report, keeping plugin markers and the last
/// transition time unless the phase changed.
pub fn desired_status(job: &Job, counts: PodCounts, now: DateTime<Utc>) -> JobStatus {
    let current = job.status.clone().unwrap_or_default();
    let total = job.total_replicas();
    let min_available = job.spec.min_available.unwrap_or(total);
    let phase = next_phase(current.state.phase, counts, min_available, total);

    let last_transition_time = if phase != current.state.phase || current.state.last_transition_time.is_none() {
        Some(now)
    } else {
        current.state.last_transition_time
    };

    JobStatus {
        state: JobState {
            phase,
            last_transition_time,
        },
        pending: counts.pending,
        running: counts.running,
        succeeded: counts.succeeded,
        failed: counts.failed,
        controlled_resources: current.controlled_resources,
    }
}
