//! Volcano controller manager
//!
//! Runs the job, queue, garbage-collector and pod-group controllers. With
//! leader election enabled only the replica holding the `vc-controllers`
//! lease reconciles; the others wait on standby.

mod error;
mod garbage_collector;
mod healthz;
mod job;
mod options;
mod pod_group;
mod queue;
mod server;
mod supervisor;
mod watcher;

use std::process::ExitCode;

use crate::error::ControllerError;
use crate::options::ServerOptions;
use leader_election::ElectionError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let span = info_span!("vc-controllers");
    info!(parent: &span, "Starting controller manager");

    let options = match ServerOptions::from_env() {
        Ok(options) => options,
        Err(e) => {
            error!(parent: &span, error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    info!(parent: &span, ?options, "Configuration loaded");

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    let Err(e) = server::run(options, cancel.clone(), span.clone()).await;
    match e {
        ControllerError::Election(ElectionError::Cancelled) => {
            info!(parent: &span, "Shut down");
            ExitCode::SUCCESS
        }
        ControllerError::FinishedWithoutLeaderElection if cancel.is_cancelled() => {
            info!(parent: &span, "Shut down");
            ExitCode::SUCCESS
        }
        e => {
            error!(parent: &span, error = %e, "Controller manager stopped");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
    cancel.cancel();
}
