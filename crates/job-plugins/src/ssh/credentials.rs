//! Credential bundle generation.

use std::collections::BTreeMap;

use crds::Job;
use k8s_openapi::ByteString;
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use ssh_key::public::{KeyData, RsaPublicKey};
use ssh_key::PublicKey;

use super::config::generate_ssh_config;
use super::{SSH_CONFIG, SSH_PRIVATE_KEY, SSH_PUBLIC_KEY};
use crate::error::PluginError;

/// Modulus size of generated keys.
pub const RSA_KEY_BITS: usize = 1024;

/// Keypair plus connectivity config for one (job, plugin) pair.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialBundle {
    /// PKCS#1 PEM private key
    pub private_key_pem: String,
    /// Public key in authorized_keys format, newline terminated
    pub public_key: String,
    /// ssh client config text
    pub config: String,
}

impl CredentialBundle {
    /// Generates a fresh keypair and the job's connectivity config.
    pub fn generate(job: &Job) -> Result<Self, PluginError> {
        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), RSA_KEY_BITS)?;
        let private_key_pem = private_key.to_pkcs1_pem(LineEnding::LF)?;
        let public_key = authorized_key(&private_key)?;

        Ok(Self {
            private_key_pem: private_key_pem.as_str().to_owned(),
            public_key,
            config: generate_ssh_config(job),
        })
    }

    /// Secret data keyed by file name.
    pub fn into_data(self) -> BTreeMap<String, ByteString> {
        BTreeMap::from([
            (SSH_PRIVATE_KEY.to_string(), ByteString(self.private_key_pem.into_bytes())),
            (SSH_PUBLIC_KEY.to_string(), ByteString(self.public_key.into_bytes())),
            (SSH_CONFIG.to_string(), ByteString(self.config.into_bytes())),
        ])
    }
}

impl std::fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("public_key", &self.public_key)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Encodes the public half of `private_key` as an authorized_keys line.
pub fn authorized_key(private_key: &RsaPrivateKey) -> Result<String, PluginError> {
    let public = RsaPublicKey::try_from(private_key.to_public_key())?;
    let line = PublicKey::new(KeyData::Rsa(public), "").to_openssh()?;
    Ok(format!("{}\n", line))
}
