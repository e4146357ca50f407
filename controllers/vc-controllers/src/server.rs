//! Process wiring: health endpoint, leader election and the controller set.

use std::convert::Infallible;
use std::sync::Arc;

use kube::Client;
use leader_election::{hostname_uuid, LeaderElectionConfig, LeaderElector, LeaseLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Span};

use crate::error::ControllerError;
use crate::healthz;
use crate::options::{ServerOptions, LOCK_OBJECT_NAME};
use crate::supervisor::ControllerSupervisor;

/// Runs the controller manager until it stops being authoritative.
///
/// There is no successful return: with election disabled the controllers
/// returning is reported as [`ControllerError::FinishedWithoutLeaderElection`],
/// otherwise the election outcome is returned.
pub async fn run(
    options: ServerOptions,
    cancel: CancellationToken,
    span: Span,
) -> Result<Infallible, ControllerError> {
    let client = Client::try_default().await?;
    info!(
        parent: &span,
        qps = options.kube_api_qps,
        burst = options.kube_api_burst,
        "Kubernetes client ready"
    );

    healthz::start(
        options.healthz_bind_address,
        cancel.clone(),
        info_span!(parent: &span, "healthz"),
    )
    .await?;

    let supervisor =
        ControllerSupervisor::build(client.clone(), &options, info_span!(parent: &span, "controllers"));

    if !options.enable_leader_election {
        info!(parent: &span, "Leader election disabled, starting controllers");
        supervisor.run(cancel).await?;
        return Err(ControllerError::FinishedWithoutLeaderElection);
    }

    let identity = hostname_uuid()?;
    let lock = LeaseLock::new(client, &options.lock_object_namespace, LOCK_OBJECT_NAME, &identity)?;
    let config = LeaderElectionConfig {
        lock: Arc::new(lock),
        lease_duration: options.lease_duration,
        renew_deadline: options.renew_deadline,
        retry_period: options.retry_period,
        release_on_cancel: true,
    };
    let elector = LeaderElector::new(config, info_span!(parent: &span, "leader-election"))?;

    let controllers_span = span.clone();
    let outcome = elector
        .run(cancel, move |leading| async move {
            if let Err(e) = supervisor.run(leading).await {
                error!(parent: &controllers_span, error = %e, "Controllers stopped");
            }
        })
        .await;

    Err(outcome.into())
}
