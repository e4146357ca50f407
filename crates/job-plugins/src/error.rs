//! Plugin errors

use thiserror::Error;

/// Errors returned by plugin construction and lifecycle hooks.
#[derive(Debug, Error)]
pub enum PluginError {
    /// No constructor registered under the requested name
    #[error("plugin not found: {0}")]
    NotFound(String),

    /// The plugin rejected its argument list
    #[error("invalid arguments for plugin {plugin}: {message}")]
    InvalidArguments { plugin: String, message: String },

    /// Job is missing metadata the plugin relies on
    #[error("job is missing {0}")]
    MissingField(&'static str),

    /// Keypair generation failed
    #[error("rsa key generation failed: {0}")]
    KeyGeneration(#[from] rsa::Error),

    /// Private key could not be PEM encoded
    #[error("private key encoding failed: {0}")]
    KeyEncoding(#[from] rsa::pkcs1::Error),

    /// Public key could not be converted to SSH format
    #[error("ssh public key encoding failed: {0}")]
    SshKey(#[from] ssh_key::Error),

    /// Persisting the credential bundle failed
    #[error("create secret for job <{job}> with {plugin} plugin failed: {source}")]
    CreateSecret {
        job: String,
        plugin: String,
        #[source]
        source: StoreError,
    },

    /// Removing the credential bundle failed
    #[error("delete secret for job <{job}> with {plugin} plugin failed: {source}")]
    DeleteSecret {
        job: String,
        plugin: String,
        #[source]
        source: StoreError,
    },
}

/// Errors surfaced by a [`SecretStore`](crate::SecretStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
