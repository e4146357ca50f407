//! Job CRD
//!
//! A batch workload made of replicated tasks. Plugins declared in
//! `spec.plugins` attach per-job behavior to the job's lifecycle.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "batch.volcano.sh",
    version = "v1alpha1",
    kind = "Job",
    namespaced,
    status = "JobStatus",
    shortname = "vcjob"
)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    /// Scheduler responsible for the job's pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler_name: Option<String>,

    /// Queue the job is submitted to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,

    /// Minimum number of pods that must be schedulable together
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_available: Option<u32>,

    /// Ordered task list
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,

    /// Plugin name to raw argument list
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub plugins: BTreeMap<String, Vec<String>>,

    /// Seconds a finished job is kept before garbage collection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<i32>,
}

/// A replicated pod template within a job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    /// Task name, unique within the job
    pub name: String,

    /// Desired pod count
    #[serde(default)]
    pub replicas: u32,

    /// Pod template instantiated once per replica
    #[serde(default)]
    #[schemars(schema_with = "pod_template_schema")]
    pub template: PodTemplateSpec,
}

fn pod_template_schema(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    /// Current lifecycle state
    #[serde(default)]
    pub state: JobState,

    #[serde(default)]
    pub pending: u32,

    #[serde(default)]
    pub running: u32,

    #[serde(default)]
    pub succeeded: u32,

    #[serde(default)]
    pub failed: u32,

    /// Plugin markers (`plugin-<name>` -> `<name>`) recording one-time side effects
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub controlled_resources: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    #[serde(default)]
    pub phase: JobPhase,

    /// Time of the last phase change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// Job lifecycle phase
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum JobPhase {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobPhase {
    /// Whether the job has reached a terminal phase.
    pub fn is_finished(self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Failed)
    }
}

impl Job {
    /// Sum of all task replicas, saturating at `u32::MAX`.
    pub fn total_replicas(&self) -> u32 {
        self.spec
            .tasks
            .iter()
            .fold(0u32, |total, t| total.saturating_add(t.replicas))
    }

    /// Current phase, `Pending` when no status has been written.
    pub fn phase(&self) -> JobPhase {
        self.status
            .as_ref()
            .map(|s| s.state.phase)
            .unwrap_or_default()
    }

    /// Controlled-resources marker value for `key`, if set.
    pub fn controlled_resource(&self, key: &str) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.controlled_resources.get(key))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_deserializes_plugins_and_tasks() {
        let job: Job = serde_json::from_value(serde_json::json!({
            "apiVersion": "batch.volcano.sh/v1alpha1",
            "kind": "Job",
            "metadata": { "name": "mpi", "namespace": "default" },
            "spec": {
                "queue": "research",
                "plugins": { "ssh": ["--no-root"] },
                "tasks": [
                    { "name": "master", "replicas": 1, "template": { "spec": { "containers": [] } } },
                    { "name": "worker", "replicas": 3 }
                ]
            }
        }))
        .unwrap();

        assert_eq!(job.spec.plugins.get("ssh"), Some(&vec!["--no-root".to_string()]));
        assert_eq!(job.spec.tasks.len(), 2);
        assert_eq!(job.total_replicas(), 4);
        assert_eq!(job.phase(), JobPhase::Pending);
        assert!(job.controlled_resource("plugin-ssh").is_none());
    }

    #[test]
    fn test_status_controlled_resources_wire_name() {
        let mut status = JobStatus::default();
        status
            .controlled_resources
            .insert("plugin-ssh".to_string(), "ssh".to_string());
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["controlledResources"]["plugin-ssh"], "ssh");
        assert_eq!(value["state"]["phase"], "Pending");
    }

    #[test]
    fn test_total_replicas_saturates() {
        let task = |replicas| TaskSpec {
            name: "worker".to_string(),
            replicas,
            ..Default::default()
        };
        let job = Job::new(
            "huge",
            JobSpec {
                tasks: vec![task(u32::MAX), task(2)],
                ..Default::default()
            },
        );
        assert_eq!(job.total_replicas(), u32::MAX);
    }

    #[test]
    fn test_finished_phases() {
        assert!(JobPhase::Completed.is_finished());
        assert!(JobPhase::Failed.is_finished());
        assert!(!JobPhase::Running.is_finished());
        assert!(!JobPhase::Pending.is_finished());
    }
}
