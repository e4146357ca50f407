//! Connectivity config generation.

use crds::{make_pod_name, Job};

/// Header written before any host entry.
const CONFIG_HEADER: &str = "StrictHostKeyChecking no\nUserKnownHostsFile /dev/null\n";

/// Builds the ssh client config listing every addressable pod of the job.
///
/// Each replica gets a `Host` entry for its effective hostname (the task's
/// explicit hostname, else `{job}-{task}-{index}`) resolving to
/// `{hostname}.{subdomain}`, where the subdomain defaults to the job name.
/// A task with an explicit hostname yields a single entry: its replicas
/// share that hostname, so only replica 0 can be addressed by name.
pub fn generate_ssh_config(job: &Job) -> String {
    let job_name = job.metadata.name.as_deref().unwrap_or_default();
    let mut config = String::from(CONFIG_HEADER);

    for task in &job.spec.tasks {
        let pod_spec = task.template.spec.as_ref();
        let explicit_hostname = pod_spec
            .and_then(|s| s.hostname.as_deref())
            .filter(|h| !h.is_empty());
        let subdomain = pod_spec
            .and_then(|s| s.subdomain.as_deref())
            .filter(|s| !s.is_empty())
            .unwrap_or(job_name);

        for index in 0..task.replicas {
            let hostname = match explicit_hostname {
                Some(hostname) => hostname.to_string(),
                None => make_pod_name(job_name, &task.name, index),
            };

            config.push_str(&format!("Host {}\n", hostname));
            config.push_str(&format!("  HostName {}.{}\n", hostname, subdomain));

            // TODO: address every replica once a per-replica naming scheme for explicit hostnames is agreed
            if explicit_hostname.is_some() {
                break;
            }
        }
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{JobSpec, TaskSpec};
    use k8s_openapi::api::core::v1::{PodSpec, PodTemplateSpec};

    fn task(name: &str, replicas: u32, hostname: Option<&str>, subdomain: Option<&str>) -> TaskSpec {
        TaskSpec {
            name: name.to_string(),
            replicas,
            template: PodTemplateSpec {
                spec: Some(PodSpec {
                    hostname: hostname.map(str::to_string),
                    subdomain: subdomain.map(str::to_string),
                    ..Default::default()
                }),
                ..Default::default()
            },
        }
    }

    fn job(tasks: Vec<TaskSpec>) -> Job {
        Job::new(
            "mpi",
            JobSpec {
                tasks,
                ..Default::default()
            },
        )
    }

    fn host_lines(config: &str) -> Vec<&str> {
        config.lines().filter(|l| l.starts_with("Host ")).collect()
    }

    #[test]
    fn test_default_hostnames_per_replica() {
        let config = generate_ssh_config(&job(vec![task("T", 3, None, None)]));

        assert_eq!(
            config,
            "StrictHostKeyChecking no\n\
             UserKnownHostsFile /dev/null\n\
             Host mpi-T-0\n  HostName mpi-T-0.mpi\n\
             Host mpi-T-1\n  HostName mpi-T-1.mpi\n\
             Host mpi-T-2\n  HostName mpi-T-2.mpi\n"
        );
        assert_eq!(host_lines(&config).len(), 3);
    }

    #[test]
    fn test_explicit_hostname_emits_single_entry() {
        let config = generate_ssh_config(&job(vec![task("T", 3, Some("head"), None)]));

        assert_eq!(host_lines(&config), vec!["Host head"]);
        assert!(config.contains("  HostName head.mpi\n"));
    }

    #[test]
    fn test_explicit_subdomain_overrides_job_name() {
        let config = generate_ssh_config(&job(vec![task("worker", 2, None, Some("cluster"))]));

        assert!(config.contains("Host mpi-worker-0\n  HostName mpi-worker-0.cluster\n"));
        assert!(config.contains("Host mpi-worker-1\n  HostName mpi-worker-1.cluster\n"));
    }

    #[test]
    fn test_empty_hostname_is_treated_as_unset() {
        let config = generate_ssh_config(&job(vec![task("w", 2, Some(""), Some(""))]));

        assert_eq!(host_lines(&config), vec!["Host mpi-w-0", "Host mpi-w-1"]);
        assert!(config.contains("  HostName mpi-w-1.mpi\n"));
    }

    #[test]
    fn test_tasks_keep_declaration_order() {
        let config = generate_ssh_config(&job(vec![
            task("master", 1, Some("master"), None),
            task("worker", 2, None, None),
            task("idle", 0, None, None),
        ]));

        assert_eq!(
            host_lines(&config),
            vec!["Host master", "Host mpi-worker-0", "Host mpi-worker-1"]
        );
    }

    #[test]
    fn test_template_without_spec_uses_defaults() {
        let mut t = task("w", 1, None, None);
        t.template.spec = None;
        let config = generate_ssh_config(&job(vec![t]));
        assert!(config.ends_with("Host mpi-w-0\n  HostName mpi-w-0.mpi\n"));
    }
}
