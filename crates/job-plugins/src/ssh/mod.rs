//! SSH plugin
//!
//! Provisions a keypair and an ssh client config per job so the job's pods
//! can reach each other by hostname. The bundle is stored in a secret named
//! `{job}-{uid}-ssh`, mounted into every container, and removed with the
//! job.

mod config;
mod credentials;

pub use config::generate_ssh_config;
pub use credentials::{authorized_key, CredentialBundle, RSA_KEY_BITS};

use std::sync::Arc;

use async_trait::async_trait;
use clap::{ArgAction, Parser};
use crds::Job;
use k8s_openapi::api::core::v1::{KeyToPath, Pod, Secret, SecretVolumeSource, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use tracing::{debug, error, info, Span};

use crate::error::PluginError;
use crate::plugin::{is_applied, mark_applied, JobPlugin, PluginClientset};

/// Registry name of the plugin.
pub const PLUGIN_NAME: &str = "ssh";

/// Private key file and secret key.
pub const SSH_PRIVATE_KEY: &str = "id_rsa";
/// Public key file and secret key.
pub const SSH_PUBLIC_KEY: &str = "id_rsa.pub";
/// Authorized keys file, backed by the public key.
pub const SSH_AUTHORIZED_KEYS: &str = "authorized_keys";
/// Client config file and secret key.
pub const SSH_CONFIG: &str = "config";
/// Canonical mount path for root.
pub const SSH_ABSOLUTE_PATH: &str = "/root/.ssh";
/// Directory holding the files inside the volume.
pub const SSH_RELATIVE_PATH: &str = ".ssh";
/// Mount root used when running as a non-root user.
pub const CONFIG_MAP_MOUNT_PATH: &str = "/etc/volcano";

const DEFAULT_MODE: i32 = 0o600;
const NON_DEFAULT_PATH_MODE: i32 = 0o755;

/// Raw flags accepted in the job's plugin argument list.
#[derive(Debug, Parser)]
#[command(
    name = "ssh",
    no_binary_name = true,
    disable_help_flag = true,
    disable_version_flag = true
)]
struct SshArgs {
    /// Mount keys for a common user instead of root
    #[arg(
        long = "no-root",
        num_args = 0..=1,
        require_equals = true,
        default_value_t = false,
        default_missing_value = "true",
        action = ArgAction::Set
    )]
    no_root: bool,

    /// Path used to store the ssh private and public keys
    #[arg(long = "ssh-key-file-path", default_value = SSH_ABSOLUTE_PATH)]
    ssh_key_file_path: String,
}

/// Validated plugin configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshOptions {
    /// Run as a non-root user
    pub no_root: bool,
    /// Where the key directory is mounted in every container
    pub key_file_path: String,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            no_root: false,
            key_file_path: SSH_ABSOLUTE_PATH.to_string(),
        }
    }
}

impl SshOptions {
    /// Parses the plugin's argument list.
    ///
    /// Flags may be spelled with one or two leading dashes. `--no-root`
    /// without an explicit key path moves the mount under
    /// `/etc/volcano/.ssh`.
    pub fn from_args(arguments: &[String]) -> Result<Self, PluginError> {
        let args = SshArgs::try_parse_from(arguments.iter().map(|a| normalize_flag(a)))
            .map_err(|e| PluginError::InvalidArguments {
                plugin: PLUGIN_NAME.to_string(),
                message: e.to_string().trim().to_string(),
            })?;

        let mut key_file_path = args.ssh_key_file_path;
        if key_file_path.is_empty() {
            return Err(PluginError::InvalidArguments {
                plugin: PLUGIN_NAME.to_string(),
                message: "ssh-key-file-path must not be empty".to_string(),
            });
        }
        if args.no_root && key_file_path == SSH_ABSOLUTE_PATH {
            key_file_path = format!("{}/{}", CONFIG_MAP_MOUNT_PATH, SSH_RELATIVE_PATH);
        }

        Ok(Self {
            no_root: args.no_root,
            key_file_path,
        })
    }

    /// File mode for the mounted volume.
    pub fn volume_mode(&self) -> i32 {
        if self.key_file_path == SSH_ABSOLUTE_PATH {
            DEFAULT_MODE
        } else {
            NON_DEFAULT_PATH_MODE
        }
    }
}

/// Accepts Go-style single-dash long flags (`-no-root`).
fn normalize_flag(arg: &str) -> String {
    if arg.len() > 2 && arg.starts_with('-') && !arg.starts_with("--") {
        format!("-{}", arg)
    } else {
        arg.to_string()
    }
}

/// Deterministic name of the credential bundle for a (job, plugin) pair.
pub fn credential_bundle_name(job_name: &str, job_uid: &str, plugin_name: &str) -> String {
    format!("{}-{}-{}", job_name, job_uid, plugin_name)
}

/// The SSH plugin.
pub struct SshPlugin {
    options: SshOptions,
    clientset: PluginClientset,
}

impl SshPlugin {
    /// Creates the plugin from already validated options.
    pub fn new(clientset: PluginClientset, options: SshOptions) -> Self {
        Self { options, clientset }
    }

    /// Registry constructor.
    pub fn build(
        clientset: PluginClientset,
        arguments: &[String],
    ) -> Result<Arc<dyn JobPlugin>, PluginError> {
        let options = SshOptions::from_args(arguments)?;
        Ok(Arc::new(Self::new(clientset, options)))
    }

    /// Options the plugin was built with.
    pub fn options(&self) -> &SshOptions {
        &self.options
    }

    fn span(&self) -> &Span {
        &self.clientset.span
    }

    fn secret_name(&self, job: &Job) -> Result<String, PluginError> {
        let name = job
            .metadata
            .name
            .as_deref()
            .ok_or(PluginError::MissingField("metadata.name"))?;
        let uid = job
            .metadata
            .uid
            .as_deref()
            .ok_or(PluginError::MissingField("metadata.uid"))?;
        Ok(credential_bundle_name(name, uid, self.name()))
    }

    fn mount_credentials(&self, pod: &mut Pod, secret_name: &str) {
        let items = [
            (SSH_PRIVATE_KEY, SSH_PRIVATE_KEY),
            (SSH_PUBLIC_KEY, SSH_PUBLIC_KEY),
            (SSH_PUBLIC_KEY, SSH_AUTHORIZED_KEYS),
            (SSH_CONFIG, SSH_CONFIG),
        ]
        .into_iter()
        .map(|(key, file)| KeyToPath {
            key: key.to_string(),
            path: format!("{}/{}", SSH_RELATIVE_PATH, file),
            mode: None,
        })
        .collect();

        let volume = Volume {
            name: secret_name.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret_name.to_string()),
                items: Some(items),
                default_mode: Some(self.options.volume_mode()),
                optional: None,
            }),
            ..Default::default()
        };

        let spec = pod.spec.get_or_insert_with(Default::default);
        spec.volumes.get_or_insert_with(Vec::new).push(volume);

        for container in &mut spec.containers {
            container
                .volume_mounts
                .get_or_insert_with(Vec::new)
                .push(VolumeMount {
                    name: secret_name.to_string(),
                    mount_path: self.options.key_file_path.clone(),
                    sub_path: Some(SSH_RELATIVE_PATH.to_string()),
                    ..Default::default()
                });
        }
    }
}

fn job_key(job: &Job) -> String {
    format!(
        "{}/{}",
        job.metadata.namespace.as_deref().unwrap_or_default(),
        job.metadata.name.as_deref().unwrap_or_default()
    )
}

#[async_trait]
impl JobPlugin for SshPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn on_job_add(&self, job: &mut Job) -> Result<(), PluginError> {
        if is_applied(job, self.name()) {
            debug!(parent: self.span(), job = %job_key(job), "ssh credentials already provisioned");
            return Ok(());
        }

        let secret_name = self.secret_name(job)?;
        let bundle = CredentialBundle::generate(job).inspect_err(|e| {
            error!(parent: self.span(), job = %job_key(job), error = %e, "Failed to generate ssh credentials");
        })?;

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(secret_name.clone()),
                namespace: job.metadata.namespace.clone(),
                owner_references: job.controller_owner_ref(&()).map(|r| vec![r]),
                ..Default::default()
            },
            data: Some(bundle.into_data()),
            ..Default::default()
        };

        self.clientset
            .secrets
            .create(&secret)
            .await
            .map_err(|source| PluginError::CreateSecret {
                job: job_key(job),
                plugin: self.name().to_string(),
                source,
            })?;

        mark_applied(job, self.name());
        info!(parent: self.span(), job = %job_key(job), secret = %secret_name, "Provisioned ssh credentials");
        Ok(())
    }

    async fn on_job_delete(&self, job: &Job) -> Result<(), PluginError> {
        let secret_name = self.secret_name(job)?;
        let namespace = job.metadata.namespace.as_deref().unwrap_or("default");

        self.clientset
            .secrets
            .delete(namespace, &secret_name)
            .await
            .map_err(|source| PluginError::DeleteSecret {
                job: job_key(job),
                plugin: self.name().to_string(),
                source,
            })?;

        info!(parent: self.span(), job = %job_key(job), secret = %secret_name, "Removed ssh credentials");
        Ok(())
    }

    fn on_pod_create(&self, pod: &mut Pod, job: &Job) -> Result<(), PluginError> {
        let secret_name = self.secret_name(job)?;
        self.mount_credentials(pod, &secret_name);
        Ok(())
    }
}
