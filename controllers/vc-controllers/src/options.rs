//! Process configuration.
//!
//! Read once from the environment at startup. Every value has a default so
//! an empty environment yields a runnable configuration.

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use leader_election::{DEFAULT_LEASE_DURATION, DEFAULT_RENEW_DEADLINE, DEFAULT_RETRY_PERIOD};

use crate::error::ControllerError;

/// Name of the lock object the replicas contend for.
pub const LOCK_OBJECT_NAME: &str = "vc-controllers";

const DEFAULT_QPS: f32 = 50.0;
const DEFAULT_BURST: u32 = 100;
const DEFAULT_HEALTHZ_ADDRESS: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 11252);
const DEFAULT_LOCK_NAMESPACE: &str = "volcano-system";
const DEFAULT_WORKER_THREADS: u16 = 3;
const DEFAULT_SCHEDULER_NAME: &str = "volcano";

/// Controller manager options.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerOptions {
    /// API request rate limit
    pub kube_api_qps: f32,
    /// API request burst limit
    pub kube_api_burst: u32,
    /// Address the health endpoint listens on
    pub healthz_bind_address: SocketAddr,
    /// Run controllers only while holding the lock
    pub enable_leader_election: bool,
    /// Namespace of the lock object
    pub lock_object_namespace: String,
    /// Concurrent job reconciliations
    pub worker_threads: u16,
    /// Scheduler whose pods get pod groups
    pub scheduler_name: String,
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
}

impl ServerOptions {
    /// Loads options from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads options through `lookup`, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let options = Self {
            kube_api_qps: parse(&lookup, "KUBE_API_QPS", DEFAULT_QPS)?,
            kube_api_burst: parse(&lookup, "KUBE_API_BURST", DEFAULT_BURST)?,
            healthz_bind_address: parse(&lookup, "HEALTHZ_BIND_ADDRESS", DEFAULT_HEALTHZ_ADDRESS)?,
            enable_leader_election: parse(&lookup, "ENABLE_LEADER_ELECTION", true)?,
            lock_object_namespace: lookup("LOCK_OBJECT_NAMESPACE")
                .unwrap_or_else(|| DEFAULT_LOCK_NAMESPACE.to_string()),
            worker_threads: parse(&lookup, "WORKER_THREADS", DEFAULT_WORKER_THREADS)?,
            scheduler_name: lookup("SCHEDULER_NAME")
                .unwrap_or_else(|| DEFAULT_SCHEDULER_NAME.to_string()),
            lease_duration: seconds(&lookup, "LEADER_ELECT_LEASE_DURATION", DEFAULT_LEASE_DURATION)?,
            renew_deadline: seconds(&lookup, "LEADER_ELECT_RENEW_DEADLINE", DEFAULT_RENEW_DEADLINE)?,
            retry_period: seconds(&lookup, "LEADER_ELECT_RETRY_PERIOD", DEFAULT_RETRY_PERIOD)?,
        };
        options.validate()?;
        Ok(options)
    }

    fn validate(&self) -> Result<(), ControllerError> {
        if self.worker_threads == 0 {
            return Err(ControllerError::InvalidConfig(
                "WORKER_THREADS must be at least 1".to_string(),
            ));
        }
        if self.scheduler_name.is_empty() {
            return Err(ControllerError::InvalidConfig(
                "SCHEDULER_NAME must not be empty".to_string(),
            ));
        }
        if self.enable_leader_election && self.lock_object_namespace.is_empty() {
            return Err(ControllerError::InvalidConfig(
                "LOCK_OBJECT_NAMESPACE must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            kube_api_qps: DEFAULT_QPS,
            kube_api_burst: DEFAULT_BURST,
            healthz_bind_address: DEFAULT_HEALTHZ_ADDRESS,
            enable_leader_election: true,
            lock_object_namespace: DEFAULT_LOCK_NAMESPACE.to_string(),
            worker_threads: DEFAULT_WORKER_THREADS,
            scheduler_name: DEFAULT_SCHEDULER_NAME.to_string(),
            lease_duration: DEFAULT_LEASE_DURATION,
            renew_deadline: DEFAULT_RENEW_DEADLINE,
            retry_period: DEFAULT_RETRY_PERIOD,
        }
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ControllerError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e| {
            ControllerError::InvalidConfig(format!("{} has invalid value {:?}: {}", key, raw, e))
        }),
        None => Ok(default),
    }
}

fn seconds<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ControllerError>
where
    F: Fn(&str) -> Option<String>,
{
    parse(lookup, key, default.as_secs()).map(Duration::from_secs)
}
