//! Pod construction from task templates.

use crds::{
    make_pod_name, Job, TaskSpec, DEFAULT_QUEUE, JOB_NAME_LABEL, POD_GROUP_ANNOTATION,
    QUEUE_NAME_ANNOTATION, TASK_SPEC_KEY,
};
use k8s_openapi::api::core::v1::Pod;
use kube::{Resource, ResourceExt};

use crate::error::ControllerError;

/// Instantiates replica `index` of `task`.
///
/// The pod starts from the task template, is owned by the job and carries
/// the job, task and pod-group keys. An explicit scheduler name in the
/// template wins over the job's.
pub fn build_pod(
    job: &Job,
    task: &TaskSpec,
    index: u32,
    default_scheduler: &str,
) -> Result<Pod, ControllerError> {
    let job_name = job
        .metadata
        .name
        .as_deref()
        .ok_or(ControllerError::MissingObjectKey("metadata.name"))?;
    let owner = job
        .controller_owner_ref(&())
        .ok_or(ControllerError::MissingObjectKey("metadata.uid"))?;

    let mut pod = Pod {
        metadata: task.template.metadata.clone().unwrap_or_default(),
        spec: Some(task.template.spec.clone().unwrap_or_default()),
        ..Default::default()
    };

    pod.metadata.name = Some(make_pod_name(job_name, &task.name, index));
    pod.metadata.namespace = job.metadata.namespace.clone();
    pod.metadata.owner_references = Some(vec![owner]);

    let labels = pod.labels_mut();
    labels.insert(JOB_NAME_LABEL.to_string(), job_name.to_string());
    labels.insert(TASK_SPEC_KEY.to_string(), task.name.clone());

    let queue = job.spec.queue.as_deref().unwrap_or(DEFAULT_QUEUE).to_string();
    let annotations = pod.annotations_mut();
    annotations.insert(TASK_SPEC_KEY.to_string(), task.name.clone());
    annotations.insert(POD_GROUP_ANNOTATION.to_string(), job_name.to_string());
    annotations.insert(QUEUE_NAME_ANNOTATION.to_string(), queue);

    if let Some(spec) = pod.spec.as_mut() {
        if spec.scheduler_name.as_deref().is_none_or(str::is_empty) {
            let scheduler = job
                .spec
                .scheduler_name
                .as_deref()
                .filter(|s| !s.is_empty())
                .unwrap_or(default_scheduler);
            spec.scheduler_name = Some(scheduler.to_string());
        }
    }

    Ok(pod)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::JobSpec;
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn job(spec: JobSpec) -> Job {
        let mut job = Job::new("mpi", spec);
        job.metadata.namespace = Some("research".to_string());
        job.metadata.uid = Some("1234".to_string());
        job
    }

    fn task(template: PodTemplateSpec) -> TaskSpec {
        TaskSpec {
            name: "worker".to_string(),
            replicas: 2,
            template,
        }
    }

    #[test]
    fn test_pod_carries_job_identity() {
        let job = job(JobSpec {
            queue: Some("research".to_string()),
            ..Default::default()
        });
        let task = task(PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(BTreeMap::from([("app".to_string(), "mpi".to_string())])),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "main".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }),
        });

        let pod = build_pod(&job, &task, 1, "volcano").unwrap();

        assert_eq!(pod.metadata.name.as_deref(), Some("mpi-worker-1"));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("research"));
        let labels = pod.labels();
        assert_eq!(labels.get("app").map(String::as_str), Some("mpi"));
        assert_eq!(labels.get(JOB_NAME_LABEL).map(String::as_str), Some("mpi"));
        assert_eq!(labels.get(TASK_SPEC_KEY).map(String::as_str), Some("worker"));
        let annotations = pod.annotations();
        assert_eq!(annotations.get(POD_GROUP_ANNOTATION).map(String::as_str), Some("mpi"));
        assert_eq!(annotations.get(QUEUE_NAME_ANNOTATION).map(String::as_str), Some("research"));

        let owner = &pod.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.kind, "Job");
        assert_eq!(owner.uid, "1234");
        assert_eq!(owner.controller, Some(true));

        let spec = pod.spec.unwrap();
        assert_eq!(spec.scheduler_name.as_deref(), Some("volcano"));
        assert_eq!(spec.containers.len(), 1);
    }

    #[test]
    fn test_scheduler_name_precedence() {
        let job_with_scheduler = job(JobSpec {
            scheduler_name: Some("kube-batch".to_string()),
            ..Default::default()
        });
        let pod = build_pod(&job_with_scheduler, &task(PodTemplateSpec::default()), 0, "volcano").unwrap();
        assert_eq!(pod.spec.unwrap().scheduler_name.as_deref(), Some("kube-batch"));

        let template = PodTemplateSpec {
            metadata: None,
            spec: Some(PodSpec {
                scheduler_name: Some("default-scheduler".to_string()),
                ..Default::default()
            }),
        };
        let pod = build_pod(&job_with_scheduler, &task(template), 0, "volcano").unwrap();
        assert_eq!(pod.spec.unwrap().scheduler_name.as_deref(), Some("default-scheduler"));
    }

    #[test]
    fn test_default_queue_annotation() {
        let pod = build_pod(&job(JobSpec::default()), &task(PodTemplateSpec::default()), 0, "volcano").unwrap();
        assert_eq!(
            pod.annotations().get(QUEUE_NAME_ANNOTATION).map(String::as_str),
            Some(DEFAULT_QUEUE)
        );
    }

    #[test]
    fn test_job_without_uid_is_rejected() {
        let mut job = job(JobSpec::default());
        job.metadata.uid = None;
        assert!(matches!(
            build_pod(&job, &task(PodTemplateSpec::default()), 0, "volcano"),
            Err(ControllerError::MissingObjectKey("metadata.uid"))
        ));
    }
}
