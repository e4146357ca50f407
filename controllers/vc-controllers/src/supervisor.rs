//! Runs the fixed controller set as sibling workers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use job_plugins::PluginRegistry;
use kube::Client;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Span};

use crate::error::ControllerError;
use crate::garbage_collector::GarbageCollector;
use crate::job::JobController;
use crate::options::ServerOptions;
use crate::pod_group::PodGroupController;
use crate::queue::QueueController;

/// A long-running reconciliation worker.
///
/// `run` must return promptly once `cancel` fires; returning earlier is
/// treated as a failure of the whole controller set.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Reconciles until `cancel` fires.
    async fn run(&self, cancel: CancellationToken) -> Result<(), ControllerError>;
}

/// Owns the controller set and its shutdown.
pub struct ControllerSupervisor {
    controllers: Vec<Arc<dyn Controller>>,
    span: Span,
}

impl std::fmt::Debug for ControllerSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.controllers.iter().map(|c| c.name()))
            .finish()
    }
}

impl ControllerSupervisor {
    /// Builds the job, queue, garbage-collector and pod-group controllers
    /// over a shared client.
    pub fn build(client: Client, options: &ServerOptions, span: Span) -> Self {
        let child = |name: &'static str| info_span!(parent: &span, "controller", controller = name);

        let controllers: Vec<Arc<dyn Controller>> = vec![
            Arc::new(JobController::new(
                client.clone(),
                PluginRegistry::builtin(),
                options.worker_threads,
                options.scheduler_name.clone(),
                child("job"),
            )),
            Arc::new(QueueController::new(client.clone(), child("queue"))),
            Arc::new(GarbageCollector::new(client.clone(), child("garbage-collector"))),
            Arc::new(PodGroupController::new(
                client,
                options.scheduler_name.clone(),
                child("pod-group"),
            )),
        ];

        Self::new(controllers, span)
    }

    /// Supervises an arbitrary controller set.
    pub fn new(controllers: Vec<Arc<dyn Controller>>, span: Span) -> Self {
        Self { controllers, span }
    }

    /// Starts every controller and blocks until `cancel` fires, then joins
    /// all of them.
    ///
    /// A controller that stops on its own cancels its siblings; the first
    /// such failure is returned once every worker has been joined.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ControllerError> {
        let workers = cancel.child_token();
        let mut set = JoinSet::new();
        let mut names = HashMap::new();

        for controller in &self.controllers {
            let controller = Arc::clone(controller);
            let name = controller.name();
            let token = workers.clone();
            info!(parent: &self.span, controller = name, "Starting controller");
            let handle = set.spawn(async move { (name, controller.run(token).await) });
            names.insert(handle.id(), name);
        }

        let mut failure = None;
        while let Some(joined) = set.join_next().await {
            let stopped_early = !workers.is_cancelled();
            let (name, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    let name = names.get(&e.id()).copied().unwrap_or("unknown");
                    error!(parent: &self.span, controller = name, error = %e, "Controller task panicked");
                    (name, Ok(()))
                }
            };

            match result {
                Ok(()) if !stopped_early => {
                    info!(parent: &self.span, controller = name, "Controller stopped");
                }
                Ok(()) => {
                    warn!(parent: &self.span, controller = name, "Controller exited before shutdown");
                }
                Err(ref e) => {
                    error!(parent: &self.span, controller = name, error = %e, "Controller failed");
                }
            }

            if stopped_early && failure.is_none() {
                failure = Some(ControllerError::WorkerExited(name.to_string()));
                workers.cancel();
            }
        }

        match failure {
            Some(e) => Err(e),
            None => {
                workers.cancelled().await;
                info!(parent: &self.span, "All controllers stopped");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct FakeController {
        name: &'static str,
        exit_after: Option<Duration>,
        stopped: Arc<AtomicBool>,
    }

    impl FakeController {
        fn new(name: &'static str, exit_after: Option<Duration>) -> (Arc<Self>, Arc<AtomicBool>) {
            let stopped = Arc::new(AtomicBool::new(false));
            let controller = Arc::new(Self {
                name,
                exit_after,
                stopped: Arc::clone(&stopped),
            });
            (controller, stopped)
        }
    }

    #[async_trait]
    impl Controller for FakeController {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(&self, cancel: CancellationToken) -> Result<(), ControllerError> {
            match self.exit_after {
                Some(after) => {
                    tokio::time::sleep(after).await;
                    Err(ControllerError::InvalidConfig("watch ended".to_string()))
                }
                None => {
                    cancel.cancelled().await;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    self.stopped.store(true, Ordering::SeqCst);
                    Ok(())
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_joins_every_controller_on_cancel() {
        let (job, job_stopped) = FakeController::new("job", None);
        let (queue, queue_stopped) = FakeController::new("queue", None);
        let supervisor = ControllerSupervisor::new(vec![job, queue], Span::none());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        supervisor.run(cancel).await.unwrap();

        assert!(job_stopped.load(Ordering::SeqCst));
        assert!(queue_stopped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_exit_stops_siblings() {
        let (job, job_stopped) = FakeController::new("job", None);
        let (gc, _) = FakeController::new("garbage-collector", Some(Duration::from_secs(2)));
        let supervisor = ControllerSupervisor::new(vec![job, gc], Span::none());

        let cancel = CancellationToken::new();
        let err = supervisor.run(cancel.clone()).await.unwrap_err();

        assert!(matches!(err, ControllerError::WorkerExited(ref name) if name == "garbage-collector"));
        assert!(job_stopped.load(Ordering::SeqCst));
        assert!(!cancel.is_cancelled());
    }

    struct PanickingController;

    #[async_trait]
    impl Controller for PanickingController {
        fn name(&self) -> &'static str {
            "pod-group"
        }

        async fn run(&self, _cancel: CancellationToken) -> Result<(), ControllerError> {
            panic!("informer cache poisoned");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicked_controller_is_named() {
        let (job, job_stopped) = FakeController::new("job", None);
        let supervisor =
            ControllerSupervisor::new(vec![job, Arc::new(PanickingController)], Span::none());

        let err = supervisor.run(CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, ControllerError::WorkerExited(ref name) if name == "pod-group"));
        assert!(job_stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_empty_set_returns_after_cancel() {
        let supervisor = ControllerSupervisor::new(Vec::new(), Span::none());
        let cancel = CancellationToken::new();
        cancel.cancel();
        supervisor.run(cancel).await.unwrap();
    }
}
