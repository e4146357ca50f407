//! Well-known label, annotation and naming conventions.

/// Label carried by every pod created for a job.
pub const JOB_NAME_LABEL: &str = "volcano.sh/job-name";

/// Label and annotation naming the task a pod was created for.
pub const TASK_SPEC_KEY: &str = "volcano.sh/task-spec";

/// Annotation binding a pod to its pod group.
pub const POD_GROUP_ANNOTATION: &str = "scheduling.k8s.io/group-name";

/// Annotation selecting the queue for a pod created outside a job.
pub const QUEUE_NAME_ANNOTATION: &str = "scheduling.volcano.sh/queue-name";

/// Queue used when a job does not name one.
pub const DEFAULT_QUEUE: &str = "default";

/// Deterministic pod name (and default hostname) for a task replica.
pub fn make_pod_name(job_name: &str, task_name: &str, index: u32) -> String {
    format!("{}-{}-{}", job_name, task_name, index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_pod_name() {
        assert_eq!(make_pod_name("mpi", "worker", 0), "mpi-worker-0");
        assert_eq!(make_pod_name("mpi", "worker", 12), "mpi-worker-12");
    }
}
