//! Generic reconcile loop driver.
//!
//! Every controller builds its `kube_runtime::Controller` (primary resource
//! plus owned or watched children) and hands it to [`run_controller`], which
//! applies the shared error policy, concurrency and shutdown handling.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::Controller;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Span};

use crate::error::ControllerError;

/// Delay before a failed reconciliation is retried.
pub const ERROR_REQUEUE: Duration = Duration::from_secs(60);

/// Drives `controller` until `cancel` fires.
pub async fn run_controller<K, Ctx, F, Fut>(
    controller: Controller<K>,
    reconcile: F,
    context: Arc<Ctx>,
    concurrency: u16,
    cancel: CancellationToken,
    span: Span,
    resource_name: &'static str,
) where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Debug + Unpin,
    Ctx: Send + Sync + 'static,
    F: FnMut(Arc<K>, Arc<Ctx>) -> Fut,
    Fut: Future<Output = Result<Action, ControllerError>> + Send + 'static,
{
    info!(parent: &span, resource = resource_name, concurrency, "Starting watcher");

    let policy_span = span.clone();
    let error_policy = move |obj: Arc<K>, error: &ControllerError, _ctx: Arc<Ctx>| {
        warn!(
            parent: &policy_span,
            resource = resource_name,
            name = %obj.name_any(),
            namespace = obj.namespace().as_deref().unwrap_or(""),
            error = %error,
            "Reconciliation failed"
        );
        Action::requeue(ERROR_REQUEUE)
    };

    let config = ControllerConfig::default().concurrency(concurrency);

    controller
        .with_config(config)
        .graceful_shutdown_on(cancel.cancelled_owned())
        .run(reconcile, error_policy, context)
        .for_each(|res| {
            let span = span.clone();
            async move {
                match res {
                    Ok((obj, _)) => debug!(parent: &span, object = %obj, "Reconciled"),
                    Err(e) => debug!(parent: &span, error = %e, "Controller event failed"),
                }
            }
        })
        .await;

    info!(parent: &span, resource = resource_name, "Watcher stopped");
}
