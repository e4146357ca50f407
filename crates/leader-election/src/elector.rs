//! Acquire/renew loop around a [`ResourceLock`].
//!
//! Expiry of another holder's lease is judged against the local monotonic
//! time at which its record was last seen to change, never against the
//! timestamps written in the record.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::time::{sleep, sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Span};

use crate::error::ElectionError;
use crate::lock::{LeaderElectionRecord, ResourceLock, VersionedRecord};

/// Default lease validity without renewal.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(15);
/// Default time the holder has to renew before giving up.
pub const DEFAULT_RENEW_DEADLINE: Duration = Duration::from_secs(10);
/// Default polling interval.
pub const DEFAULT_RETRY_PERIOD: Duration = Duration::from_secs(5);

/// Lease duration written when the holder steps down.
const RELEASED_LEASE_DURATION: Duration = Duration::from_secs(1);

/// Election timing and the lock to contend for.
#[derive(Clone)]
pub struct LeaderElectionConfig {
    /// Lock every replica contends for
    pub lock: Arc<dyn ResourceLock>,
    /// How long a held lock is valid without renewal
    pub lease_duration: Duration,
    /// How long the holder keeps retrying renewal before it forfeits
    pub renew_deadline: Duration,
    /// Interval between acquire or renew attempts
    pub retry_period: Duration,
    /// Step down explicitly on shutdown instead of letting the lease expire
    pub release_on_cancel: bool,
}

impl LeaderElectionConfig {
    /// Creates a config with the default timings.
    pub fn new(lock: Arc<dyn ResourceLock>) -> Self {
        Self {
            lock,
            lease_duration: DEFAULT_LEASE_DURATION,
            renew_deadline: DEFAULT_RENEW_DEADLINE,
            retry_period: DEFAULT_RETRY_PERIOD,
            release_on_cancel: true,
        }
    }

    /// Checks `lease_duration > renew_deadline > retry_period > 0` and a
    /// non-empty identity.
    pub fn validate(&self) -> Result<(), ElectionError> {
        if self.lease_duration <= self.renew_deadline {
            return Err(ElectionError::InvalidConfig(
                "leaseDuration must be greater than renewDeadline".to_string(),
            ));
        }
        if self.renew_deadline <= self.retry_period {
            return Err(ElectionError::InvalidConfig(
                "renewDeadline must be greater than retryPeriod".to_string(),
            ));
        }
        if self.retry_period.is_zero() {
            return Err(ElectionError::InvalidConfig(
                "retryPeriod must be greater than zero".to_string(),
            ));
        }
        if self.lock.identity().is_empty() {
            return Err(ElectionError::InvalidConfig(
                "lock identity is empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for LeaderElectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElectionConfig")
            .field("lock", &self.lock.describe())
            .field("identity", &self.lock.identity())
            .field("lease_duration", &self.lease_duration)
            .field("renew_deadline", &self.renew_deadline)
            .field("retry_period", &self.retry_period)
            .field("release_on_cancel", &self.release_on_cancel)
            .finish()
    }
}

#[derive(Debug)]
struct Observed {
    record: VersionedRecord,
    observed_at: Instant,
}

/// Runs a workload only while holding the lock.
pub struct LeaderElector {
    config: LeaderElectionConfig,
    observed: Mutex<Option<Observed>>,
    reported_leader: Mutex<String>,
    span: Span,
}

impl std::fmt::Debug for LeaderElector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LeaderElector {
    /// Creates an elector after validating `config`.
    pub fn new(config: LeaderElectionConfig, span: Span) -> Result<Self, ElectionError> {
        config.validate()?;
        Ok(Self {
            config,
            observed: Mutex::new(None),
            reported_leader: Mutex::new(String::new()),
            span,
        })
    }

    /// Identity written as holder.
    pub fn identity(&self) -> &str {
        self.config.lock.identity()
    }

    /// Holder of the most recently observed record.
    pub fn leader(&self) -> Option<String> {
        self.observed
            .lock()
            .ok()?
            .as_ref()
            .map(|o| o.record.record.holder_identity.clone())
            .filter(|h| !h.is_empty())
    }

    /// Whether the most recently observed record names this elector.
    pub fn is_leader(&self) -> bool {
        self.leader().as_deref() == Some(self.identity())
    }

    /// Acquires the lock, renews it while `cancel` is not triggered, and
    /// runs `on_started_leading` for as long as it is held.
    ///
    /// The workload receives a token that is cancelled when leadership ends
    /// for any reason; it is joined before this returns. The result is
    /// always an error: [`ElectionError::LeadershipLost`] when renewal
    /// failed, [`ElectionError::ActivePhaseExited`] when the workload
    /// returned on its own, [`ElectionError::Cancelled`] on shutdown.
    pub async fn run<F, Fut>(&self, cancel: CancellationToken, on_started_leading: F) -> ElectionError
    where
        F: FnOnce(CancellationToken) -> Fut + Send,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let acquired = match self.acquire(&cancel).await {
            Ok(at) => at,
            Err(e) => return e,
        };

        let active = cancel.child_token();
        let mut phase = tokio::spawn(on_started_leading(active.clone()));

        let (outcome, phase_joined) = tokio::select! {
            renewed = self.renew(&cancel, acquired) => {
                let outcome = match renewed {
                    Ok(()) => ElectionError::Cancelled,
                    Err(e) => e,
                };
                (outcome, false)
            }
            joined = &mut phase => {
                let reason = match joined {
                    Ok(()) => "returned while holding the lease".to_string(),
                    Err(e) => e.to_string(),
                };
                (ElectionError::ActivePhaseExited(reason), true)
            }
        };

        active.cancel();
        if !phase_joined {
            if let Err(e) = phase.await {
                warn!(parent: &self.span, error = %e, "Leader workload did not stop cleanly");
            }
        }

        if self.config.release_on_cancel && !matches!(outcome, ElectionError::LeadershipLost { .. }) {
            self.release().await;
        }

        outcome
    }

    /// Returns when the successful attempt started.
    async fn acquire(&self, cancel: &CancellationToken) -> Result<Instant, ElectionError> {
        info!(
            parent: &self.span,
            lock = %self.config.lock.describe(),
            identity = %self.identity(),
            "Attempting to acquire leader lease"
        );

        loop {
            if cancel.is_cancelled() {
                return Err(ElectionError::Cancelled);
            }

            let started = Instant::now();
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(
                        parent: &self.span,
                        lock = %self.config.lock.describe(),
                        identity = %self.identity(),
                        "Successfully acquired lease"
                    );
                    return Ok(started);
                }
                Ok(false) => {
                    debug!(
                        parent: &self.span,
                        retry_secs = self.config.retry_period.as_secs(),
                        "Lease held by another, waiting"
                    );
                }
                Err(e) => {
                    warn!(
                        parent: &self.span,
                        error = %e,
                        retry_secs = self.config.retry_period.as_secs(),
                        "Failed to acquire lease, retrying"
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ElectionError::Cancelled),
                _ = sleep(self.config.retry_period) => {}
            }
        }
    }

    /// Returns `Ok(())` when cancelled and `LeadershipLost` once the lease
    /// could not be renewed within the renew deadline. No attempt runs past
    /// that deadline.
    async fn renew(
        &self,
        cancel: &CancellationToken,
        acquired: Instant,
    ) -> Result<(), ElectionError> {
        let mut last_renew = acquired;

        loop {
            let deadline = last_renew + self.config.renew_deadline;
            let wake = std::cmp::min(Instant::now() + self.config.retry_period, deadline);

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = sleep_until(wake) => {}
            }

            let started = Instant::now();
            let attempt_deadline = std::cmp::min(started + self.config.retry_period, deadline);
            match timeout_at(attempt_deadline, self.try_acquire_or_renew()).await {
                Ok(Ok(true)) => {
                    debug!(parent: &self.span, "Lease renewed");
                    last_renew = started;
                    continue;
                }
                Ok(Ok(false)) => {
                    if self.leader().is_some_and(|l| l != self.identity()) {
                        error!(parent: &self.span, identity = %self.identity(), "Lease taken over by another holder");
                        return Err(self.lost());
                    }
                    debug!(parent: &self.span, "Lease renewal conflict, retrying");
                }
                Ok(Err(e)) => {
                    warn!(parent: &self.span, error = %e, "Failed to renew lease");
                }
                Err(_) => {
                    warn!(parent: &self.span, "Lease renewal timed out");
                }
            }

            if Instant::now() >= deadline {
                error!(
                    parent: &self.span,
                    identity = %self.identity(),
                    renew_deadline_secs = self.config.renew_deadline.as_secs(),
                    "Failed to renew lease within deadline"
                );
                return Err(self.lost());
            }
        }
    }

    fn lost(&self) -> ElectionError {
        ElectionError::LeadershipLost {
            identity: self.identity().to_string(),
        }
    }

    /// One acquire or renew attempt. `Ok(false)` means another replica
    /// holds an unexpired lease or won the write race.
    pub async fn try_acquire_or_renew(&self) -> Result<bool, ElectionError> {
        let now = Utc::now();
        let mut record = LeaderElectionRecord {
            holder_identity: self.identity().to_string(),
            lease_duration: self.config.lease_duration,
            acquire_time: now,
            renew_time: now,
            leader_transitions: 0,
        };

        let Some(current) = self.config.lock.get().await? else {
            let Some(version) = self.config.lock.create(&record).await? else {
                return Ok(false);
            };
            self.set_observed(record, version);
            return Ok(true);
        };

        let observed_at = self.observe(&current);
        let holder = current.record.holder_identity.as_str();
        let held_by_other = !holder.is_empty() && holder != self.identity();
        if held_by_other && observed_at + current.record.lease_duration > Instant::now() {
            return Ok(false);
        }

        if holder == self.identity() {
            record.acquire_time = current.record.acquire_time;
            record.leader_transitions = current.record.leader_transitions;
        } else {
            record.leader_transitions = current.record.leader_transitions + 1;
        }

        let Some(version) = self.config.lock.update(&record, &current.version).await? else {
            return Ok(false);
        };
        self.set_observed(record, version);
        Ok(true)
    }

    /// Records `current` and returns when it was first seen in this version.
    fn observe(&self, current: &VersionedRecord) -> Instant {
        let now = Instant::now();
        let observed_at = match self.observed.lock() {
            Ok(mut observed) => {
                let unchanged = observed
                    .as_ref()
                    .filter(|o| o.record.version == current.version)
                    .map(|o| o.observed_at);
                match unchanged {
                    Some(at) => at,
                    None => {
                        *observed = Some(Observed {
                            record: current.clone(),
                            observed_at: now,
                        });
                        now
                    }
                }
            }
            Err(_) => now,
        };
        self.report_leader(&current.record.holder_identity);
        observed_at
    }

    /// Remembers a record this elector wrote itself.
    fn set_observed(&self, record: LeaderElectionRecord, version: String) {
        let holder = record.holder_identity.clone();
        if let Ok(mut observed) = self.observed.lock() {
            *observed = Some(Observed {
                record: VersionedRecord { record, version },
                observed_at: Instant::now(),
            });
        }
        self.report_leader(&holder);
    }

    fn report_leader(&self, holder: &str) {
        if holder.is_empty() {
            return;
        }
        let Ok(mut reported) = self.reported_leader.lock() else {
            return;
        };
        if *reported != holder {
            *reported = holder.to_string();
            if holder == self.identity() {
                info!(parent: &self.span, leader = %holder, "Became leader");
            } else {
                info!(parent: &self.span, leader = %holder, "New leader elected");
            }
        }
    }

    /// Steps down so a standby can take over without waiting for expiry.
    async fn release(&self) {
        let current = match self.config.lock.get().await {
            Ok(Some(current)) => current,
            Ok(None) => return,
            Err(e) => {
                warn!(parent: &self.span, error = %e, "Failed to read lease for release");
                return;
            }
        };
        if current.record.holder_identity != self.identity() {
            debug!(parent: &self.span, "Not the lease holder, nothing to release");
            return;
        }

        let now = Utc::now();
        let record = LeaderElectionRecord {
            holder_identity: String::new(),
            lease_duration: RELEASED_LEASE_DURATION,
            acquire_time: now,
            renew_time: now,
            leader_transitions: current.record.leader_transitions,
        };

        match self.config.lock.update(&record, &current.version).await {
            Ok(Some(version)) => {
                info!(parent: &self.span, identity = %self.identity(), "Lease released");
                self.set_observed(record, version);
            }
            Ok(None) => warn!(parent: &self.span, "Lease changed before release"),
            Err(e) => warn!(parent: &self.span, error = %e, "Failed to release lease"),
        }
    }
}

/// Holder identity unique to this process: `{hostname}_{uuid}`.
pub fn hostname_uuid() -> Result<String, ElectionError> {
    let host = hostname::get()?.to_string_lossy().into_owned();
    Ok(format!("{}_{}", host, uuid::Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryLock, MemoryLockStore};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn config(lock: &MemoryLock) -> LeaderElectionConfig {
        LeaderElectionConfig::new(Arc::new(lock.clone()))
    }

    fn elector(lock: &MemoryLock) -> LeaderElector {
        LeaderElector::new(config(lock), Span::none()).unwrap()
    }

    /// Workload that tracks how many electors are active at once.
    #[derive(Clone, Default)]
    struct Activity {
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
        started: Arc<AtomicUsize>,
    }

    impl Activity {
        fn phase(
            &self,
        ) -> impl FnOnce(CancellationToken) -> std::pin::Pin<Box<dyn Future<Output = ()> + Send>>
        + Send
        + use<> {
            let activity = self.clone();
            move |token: CancellationToken| {
                Box::pin(async move {
                    let now = activity.active.fetch_add(1, Ordering::SeqCst) + 1;
                    activity.max_active.fetch_max(now, Ordering::SeqCst);
                    activity.started.fetch_add(1, Ordering::SeqCst);
                    token.cancelled().await;
                    activity.active.fetch_sub(1, Ordering::SeqCst);
                }) as std::pin::Pin<Box<dyn Future<Output = ()> + Send>>
            }
        }
    }

    /// Lock whose calls never complete once `hang` is set.
    struct HangingLock {
        inner: MemoryLock,
        hang: Arc<AtomicBool>,
    }

    impl HangingLock {
        async fn wait_if_hung(&self) {
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
        }
    }

    #[async_trait::async_trait]
    impl ResourceLock for HangingLock {
        async fn get(&self) -> Result<Option<VersionedRecord>, ElectionError> {
            self.wait_if_hung().await;
            self.inner.get().await
        }

        async fn create(
            &self,
            record: &LeaderElectionRecord,
        ) -> Result<Option<String>, ElectionError> {
            self.wait_if_hung().await;
            self.inner.create(record).await
        }

        async fn update(
            &self,
            record: &LeaderElectionRecord,
            version: &str,
        ) -> Result<Option<String>, ElectionError> {
            self.wait_if_hung().await;
            self.inner.update(record, version).await
        }

        fn identity(&self) -> &str {
            self.inner.identity()
        }

        fn describe(&self) -> String {
            self.inner.describe()
        }
    }

    #[test]
    fn test_config_validation() {
        let store = MemoryLockStore::new();
        let lock = store.lock("a");
        assert!(config(&lock).validate().is_ok());

        let mut bad = config(&lock);
        bad.lease_duration = Duration::from_secs(10);
        assert!(matches!(bad.validate(), Err(ElectionError::InvalidConfig(_))));

        let mut bad = config(&lock);
        bad.retry_period = Duration::from_secs(10);
        assert!(matches!(bad.validate(), Err(ElectionError::InvalidConfig(_))));

        let mut bad = config(&lock);
        bad.retry_period = Duration::ZERO;
        assert!(matches!(bad.validate(), Err(ElectionError::InvalidConfig(_))));

        let empty = store.lock("");
        assert!(matches!(
            LeaderElector::new(config(&empty), Span::none()),
            Err(ElectionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_hostname_uuid_is_unique() {
        let a = hostname_uuid().unwrap();
        let b = hostname_uuid().unwrap();
        assert_ne!(a, b);
        assert!(a.contains('_'));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_creates_lock() {
        let store = MemoryLockStore::new();
        let a = elector(&store.lock("a"));

        assert!(a.try_acquire_or_renew().await.unwrap());

        let record = store.record().unwrap();
        assert_eq!(record.holder_identity, "a");
        assert_eq!(record.lease_duration, DEFAULT_LEASE_DURATION);
        assert_eq!(record.leader_transitions, 0);
        assert!(a.is_leader());
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_keeps_acquire_time() {
        let store = MemoryLockStore::new();
        let a = elector(&store.lock("a"));

        a.try_acquire_or_renew().await.unwrap();
        let acquired = store.record().unwrap().acquire_time;
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(a.try_acquire_or_renew().await.unwrap());

        let record = store.record().unwrap();
        assert_eq!(record.acquire_time, acquired);
        assert_eq!(record.leader_transitions, 0);
        assert_eq!(store.writes(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_takeover_only_after_observed_expiry() {
        let store = MemoryLockStore::new();
        let a = elector(&store.lock("a"));
        let b = elector(&store.lock("b"));

        a.try_acquire_or_renew().await.unwrap();
        assert!(!b.try_acquire_or_renew().await.unwrap());
        assert_eq!(b.leader().as_deref(), Some("a"));

        tokio::time::advance(Duration::from_secs(14)).await;
        assert!(!b.try_acquire_or_renew().await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(b.try_acquire_or_renew().await.unwrap());

        let record = store.record().unwrap();
        assert_eq!(record.holder_identity, "b");
        assert_eq!(record.leader_transitions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_resets_observed_expiry() {
        let store = MemoryLockStore::new();
        let a = elector(&store.lock("a"));
        let b = elector(&store.lock("b"));

        a.try_acquire_or_renew().await.unwrap();
        assert!(!b.try_acquire_or_renew().await.unwrap());

        tokio::time::advance(Duration::from_secs(10)).await;
        a.try_acquire_or_renew().await.unwrap();
        assert!(!b.try_acquire_or_renew().await.unwrap());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!b.try_acquire_or_renew().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_write_is_observed_at_written_version() {
        let store = MemoryLockStore::new();
        let a = elector(&store.lock("a"));

        a.try_acquire_or_renew().await.unwrap();
        a.try_acquire_or_renew().await.unwrap();

        let version = a
            .observed
            .lock()
            .unwrap()
            .as_ref()
            .map(|o| o.record.version.clone());
        assert_eq!(version.as_deref(), Some("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_store_is_an_error() {
        let store = MemoryLockStore::new();
        let lock = store.lock("a");
        let a = elector(&lock);
        lock.set_unreachable(true);

        assert!(matches!(
            a.try_acquire_or_renew().await,
            Err(ElectionError::LockUnavailable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_one_active_and_takeover_after_partition() {
        let store = MemoryLockStore::new();
        let lock_a = store.lock("a");
        let lock_b = store.lock("b");
        let activity_a = Activity::default();
        let activity_b = Activity::default();
        let cancel_a = CancellationToken::new();
        let cancel_b = CancellationToken::new();

        let elector_a = elector(&lock_a);
        let phase_a = activity_a.phase();
        let run_a = {
            let cancel = cancel_a.clone();
            tokio::spawn(async move { elector_a.run(cancel, phase_a).await })
        };
        sleep(Duration::from_secs(1)).await;

        let elector_b = elector(&lock_b);
        let phase_b = activity_b.phase();
        let run_b = {
            let cancel = cancel_b.clone();
            tokio::spawn(async move { elector_b.run(cancel, phase_b).await })
        };

        sleep(Duration::from_secs(30)).await;
        assert_eq!(store.holder().as_deref(), Some("a"));
        assert_eq!(activity_a.active.load(Ordering::SeqCst), 1);
        assert_eq!(activity_b.started.load(Ordering::SeqCst), 0);

        lock_a.set_unreachable(true);
        let err_a = run_a.await.unwrap();
        assert!(matches!(err_a, ElectionError::LeadershipLost { ref identity } if identity == "a"));
        assert_eq!(activity_a.active.load(Ordering::SeqCst), 0);
        assert_eq!(activity_b.started.load(Ordering::SeqCst), 0);

        sleep(Duration::from_secs(20)).await;
        assert_eq!(store.holder().as_deref(), Some("b"));
        assert_eq!(activity_b.active.load(Ordering::SeqCst), 1);

        cancel_b.cancel();
        let err_b = run_b.await.unwrap();
        assert!(matches!(err_b, ElectionError::Cancelled));
        assert_eq!(activity_b.active.load(Ordering::SeqCst), 0);
        assert_eq!(store.holder().as_deref(), Some(""));

        assert_eq!(activity_a.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(activity_b.max_active.load(Ordering::SeqCst), 1);
        cancel_a.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_renewal_stops_workload_before_standby_takes_over() {
        fn timed(lock: Arc<dyn ResourceLock>, retry_secs: u64) -> LeaderElectionConfig {
            LeaderElectionConfig {
                lease_duration: Duration::from_secs(11),
                renew_deadline: Duration::from_secs(10),
                retry_period: Duration::from_secs(retry_secs),
                ..LeaderElectionConfig::new(lock)
            }
        }

        let store = MemoryLockStore::new();
        let hang = Arc::new(AtomicBool::new(false));
        let lock_a = HangingLock {
            inner: store.lock("a"),
            hang: Arc::clone(&hang),
        };
        let elector_a = LeaderElector::new(timed(Arc::new(lock_a), 9), Span::none()).unwrap();
        let elector_b =
            LeaderElector::new(timed(Arc::new(store.lock("b")), 1), Span::none()).unwrap();
        let activity = Activity::default();
        let cancel = CancellationToken::new();

        let phase_a = activity.phase();
        let run_a = {
            let cancel = cancel.clone();
            tokio::spawn(async move { elector_a.run(cancel, phase_a).await })
        };
        sleep(Duration::from_secs(1)).await;
        assert_eq!(store.holder().as_deref(), Some("a"));
        hang.store(true, Ordering::SeqCst);

        let phase_b = activity.phase();
        let run_b = {
            let cancel = cancel.clone();
            tokio::spawn(async move { elector_b.run(cancel, phase_b).await })
        };

        sleep(Duration::from_secs(30)).await;
        assert!(matches!(
            run_a.await.unwrap(),
            ElectionError::LeadershipLost { ref identity } if identity == "a"
        ));
        assert_eq!(store.holder().as_deref(), Some("b"));
        assert_eq!(activity.active.load(Ordering::SeqCst), 1);
        assert_eq!(activity.max_active.load(Ordering::SeqCst), 1);

        cancel.cancel();
        assert!(matches!(run_b.await.unwrap(), ElectionError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_lease_is_taken_without_waiting_for_expiry() {
        let store = MemoryLockStore::new();
        let cancel_a = CancellationToken::new();
        let elector_a = elector(&store.lock("a"));
        let run_a = {
            let cancel = cancel_a.clone();
            tokio::spawn(async move { elector_a.run(cancel, |token| token.cancelled_owned()).await })
        };
        sleep(Duration::from_secs(1)).await;

        let b = elector(&store.lock("b"));
        assert!(!b.try_acquire_or_renew().await.unwrap());

        cancel_a.cancel();
        assert!(matches!(run_a.await.unwrap(), ElectionError::Cancelled));
        assert_eq!(store.holder().as_deref(), Some(""));

        assert!(b.try_acquire_or_renew().await.unwrap());
        assert_eq!(store.holder().as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_workload_exit_ends_leadership() {
        let store = MemoryLockStore::new();
        let a = elector(&store.lock("a"));

        let err = a.run(CancellationToken::new(), |_| async {}).await;

        assert!(matches!(err, ElectionError::ActivePhaseExited(_)));
        assert_eq!(store.holder().as_deref(), Some(""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting_never_starts_workload() {
        let store = MemoryLockStore::new();
        let a = elector(&store.lock("a"));
        a.try_acquire_or_renew().await.unwrap();

        let activity = Activity::default();
        let cancel = CancellationToken::new();
        let b = elector(&store.lock("b"));
        let phase = activity.phase();
        let run_b = {
            let cancel = cancel.clone();
            tokio::spawn(async move { b.run(cancel, phase).await })
        };

        sleep(Duration::from_secs(7)).await;
        a.try_acquire_or_renew().await.unwrap();
        sleep(Duration::from_secs(7)).await;
        cancel.cancel();

        assert!(matches!(run_b.await.unwrap(), ElectionError::Cancelled));
        assert_eq!(activity.started.load(Ordering::SeqCst), 0);
        assert_eq!(store.holder().as_deref(), Some("a"));
    }
}
