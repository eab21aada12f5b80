//! Presence maintainer scenarios against the in-memory coordinator.
//!
//! All tests run on a paused tokio clock, so retry intervals and session
//! TTLs elapse instantly and deterministically.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tether_coordinator::{
    BindingLost, Coordinator, HealthStatus, InMemoryCoordinator, Operation, Registration,
    SessionId,
};
use tether_core::{
    IdError, IdGenerator, MaintainerError, PresenceConfig, PresenceEvent, PresenceMaintainer,
    ReadySignal, Runner, SessionError, UuidGenerator,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

const KEY: &str = "locks/cell";

fn config() -> PresenceConfig {
    PresenceConfig::new(KEY, "cell-z1-0")
        .with_ttl(Duration::from_secs(10))
        .with_retry_interval(Duration::from_secs(1))
}

struct Running {
    events: broadcast::Receiver<PresenceEvent>,
    ready: tokio::sync::oneshot::Receiver<()>,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<(), MaintainerError>>,
}

fn start(coordinator: &Arc<InMemoryCoordinator>, config: PresenceConfig) -> Running {
    let maintainer =
        PresenceMaintainer::new(coordinator.clone(), Arc::new(UuidGenerator), config).unwrap();
    start_maintainer(maintainer)
}

fn start_maintainer(maintainer: PresenceMaintainer) -> Running {
    let events = maintainer.subscribe();
    let (signal, ready) = ReadySignal::channel();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(maintainer.run(shutdown.clone(), signal));

    Running {
        events,
        ready,
        shutdown,
        handle,
    }
}

/// Collect events up to and including the first one matching `done`.
async fn collect_until(
    events: &mut broadcast::Receiver<PresenceEvent>,
    done: impl Fn(&PresenceEvent) -> bool,
) -> Vec<PresenceEvent> {
    let mut seen = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(120), events.recv())
            .await
            .expect("timed out waiting for presence event")
            .expect("event channel closed");
        let finished = done(&event);
        seen.push(event);
        if finished {
            return seen;
        }
    }
}

fn count(events: &[PresenceEvent], pred: impl Fn(&PresenceEvent) -> bool) -> usize {
    events.iter().filter(|e| pred(e)).count()
}

async fn stop(running: Running) -> Result<(), MaintainerError> {
    running.shutdown.cancel();
    running.handle.await.unwrap()
}

#[tokio::test(start_paused = true)]
async fn recovers_after_three_failed_binds_and_signals_ready_once() {
    let coordinator = Arc::new(InMemoryCoordinator::new());
    coordinator.fail_next(Operation::BindKey, 3).await;
    let mut running = start(&coordinator, config());

    let events = collect_until(&mut running.events, |e| *e == PresenceEvent::Ready).await;

    assert_eq!(
        count(&events, |e| matches!(e, PresenceEvent::BindFailed { .. })),
        3
    );
    assert_eq!(
        count(&events, |e| matches!(e, PresenceEvent::BindSucceeded { .. })),
        1
    );
    assert!(timeout(Duration::from_secs(1), &mut running.ready).await.is_ok());
    assert_eq!(coordinator.value(KEY).await, Some(b"cell-z1-0".to_vec()));

    assert!(coordinator.release_key(KEY).await);
    let after_loss = collect_until(&mut running.events, |e| {
        matches!(e, PresenceEvent::BindSucceeded { .. })
    })
    .await;

    assert!(matches!(after_loss[0], PresenceEvent::PresenceLost { .. }));
    assert_eq!(count(&after_loss, |e| *e == PresenceEvent::Ready), 0);
    assert!(coordinator.holder(KEY).await.is_some());

    stop(running).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn expired_session_is_recreated_before_rebinding() {
    let coordinator = Arc::new(InMemoryCoordinator::new());
    let mut running = start(&coordinator, config());

    collect_until(&mut running.events, |e| *e == PresenceEvent::Ready).await;
    let first = coordinator.holder(KEY).await.unwrap();

    coordinator.expire_session(&first).await;
    let events = collect_until(&mut running.events, |e| {
        matches!(e, PresenceEvent::BindSucceeded { session } if session != first.as_str())
    })
    .await;

    assert!(events.iter().any(|e| matches!(
        e,
        PresenceEvent::SessionRecreated { previous, .. } if previous == first.as_str()
    )));

    let second = coordinator.holder(KEY).await.unwrap();
    assert_ne!(second, first);
    assert_eq!(coordinator.bind_history().await.last(), Some(&second));
    assert_eq!(coordinator.live_sessions().await, vec![second]);

    stop(running).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn shutdown_destroys_session_even_if_never_bound() {
    let coordinator = Arc::new(InMemoryCoordinator::new());
    coordinator.fail_next(Operation::BindKey, 1_000).await;
    let mut running = start(&coordinator, config());

    collect_until(&mut running.events, |e| {
        matches!(e, PresenceEvent::BindFailed { .. })
    })
    .await;
    assert_eq!(coordinator.live_sessions().await.len(), 1);

    stop(running).await.unwrap();

    assert!(coordinator.live_sessions().await.is_empty());
    assert_eq!(coordinator.calls(Operation::DestroySession).await, 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_releases_the_key() {
    let coordinator = Arc::new(InMemoryCoordinator::new());
    let mut running = start(&coordinator, config());

    collect_until(&mut running.events, |e| *e == PresenceEvent::Ready).await;
    stop(running).await.unwrap();

    assert!(coordinator.holder(KEY).await.is_none());
    assert!(coordinator.live_sessions().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn session_creation_is_retried() {
    let coordinator = Arc::new(InMemoryCoordinator::new());
    coordinator.fail_next(Operation::CreateSession, 2).await;
    let mut running = start(&coordinator, config());

    let events = collect_until(&mut running.events, |e| *e == PresenceEvent::Ready).await;

    assert_eq!(
        count(&events, |e| matches!(
            e,
            PresenceEvent::SessionCreateFailed { .. }
        )),
        2
    );
    assert_eq!(
        count(&events, |e| matches!(e, PresenceEvent::SessionCreated { .. })),
        1
    );
    assert_eq!(coordinator.calls(Operation::CreateSession).await, 3);

    stop(running).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn key_held_elsewhere_is_acquired_once_released() {
    let coordinator = Arc::new(InMemoryCoordinator::new());
    let foreign = {
        use tether_coordinator::Coordinator;
        let id = coordinator
            .create_session("foreign", Duration::from_secs(10))
            .await
            .unwrap();
        let _lost = coordinator.bind_key(&id, KEY, b"other").await.unwrap();
        id
    };
    let mut running = start(&coordinator, config());

    let events = collect_until(&mut running.events, |e| {
        matches!(e, PresenceEvent::BindFailed { .. })
    })
    .await;
    assert!(matches!(
        events.last(),
        Some(PresenceEvent::BindFailed { error, .. }) if error.contains("held by another session")
    ));

    coordinator.expire_session(&foreign).await;
    collect_until(&mut running.events, |e| *e == PresenceEvent::Ready).await;
    assert_ne!(coordinator.holder(KEY).await, Some(foreign));

    stop(running).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn survives_coordinator_outage_longer_than_ttl() {
    let coordinator = Arc::new(InMemoryCoordinator::new());
    let config = config()
        .with_ttl(Duration::from_secs(2))
        .with_retry_interval(Duration::from_millis(500));
    let mut running = start(&coordinator, config);

    collect_until(&mut running.events, |e| *e == PresenceEvent::Ready).await;
    let first = coordinator.holder(KEY).await.unwrap();

    coordinator.set_reachable(false).await;
    collect_until(&mut running.events, |e| {
        matches!(e, PresenceEvent::SessionError { .. })
    })
    .await;
    sleep(Duration::from_secs(3)).await;
    coordinator.set_reachable(true).await;

    let events = collect_until(&mut running.events, |e| {
        matches!(e, PresenceEvent::BindSucceeded { .. })
    })
    .await;
    assert!(events
        .iter()
        .any(|e| matches!(e, PresenceEvent::SessionRecreated { .. })));
    assert_eq!(count(&events, |e| *e == PresenceEvent::Ready), 0);

    let second = coordinator.holder(KEY).await.unwrap();
    assert_ne!(second, first);
    assert_eq!(coordinator.live_sessions().await, vec![second]);

    stop(running).await.unwrap();
}

#[tokio::test]
async fn rejects_invalid_config() {
    let coordinator = Arc::new(InMemoryCoordinator::new());
    let result = PresenceMaintainer::new(
        coordinator,
        Arc::new(UuidGenerator),
        PresenceConfig::new("", "value"),
    );
    assert!(matches!(result, Err(MaintainerError::Config(_))));
}

/// Succeeds for the first `budget` identifiers, then fails.
struct LimitedIds {
    issued: AtomicUsize,
    budget: usize,
}

impl IdGenerator for LimitedIds {
    fn generate(&self) -> Result<String, IdError> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        if n < self.budget {
            Ok(format!("name-{n}"))
        } else {
            Err(IdError::Unavailable("identifier source exhausted".to_string()))
        }
    }
}

#[tokio::test]
async fn identifier_failure_at_construction_is_fatal() {
    let coordinator = Arc::new(InMemoryCoordinator::new());
    let ids = Arc::new(LimitedIds {
        issued: AtomicUsize::new(0),
        budget: 0,
    });

    let result = PresenceMaintainer::new(coordinator, ids, config());
    assert!(matches!(
        result,
        Err(MaintainerError::Session(SessionError::Identifier(_)))
    ));
}

#[tokio::test(start_paused = true)]
async fn identifier_failure_during_recovery_ends_the_run() {
    let coordinator = Arc::new(InMemoryCoordinator::new());
    coordinator.fail_next(Operation::CreateSession, 1).await;
    let ids = Arc::new(LimitedIds {
        issued: AtomicUsize::new(0),
        budget: 1,
    });
    let maintainer = PresenceMaintainer::new(coordinator.clone(), ids, config()).unwrap();
    let running = start_maintainer(maintainer);

    let result = timeout(Duration::from_secs(60), running.handle)
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(
        result,
        Err(MaintainerError::Session(SessionError::Identifier(_)))
    ));
    assert!(coordinator.live_sessions().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stale_session_ids_are_never_reused_for_binding() {
    let coordinator = Arc::new(InMemoryCoordinator::new());
    let mut running = start(&coordinator, config());

    collect_until(&mut running.events, |e| *e == PresenceEvent::Ready).await;
    let first: SessionId = coordinator.holder(KEY).await.unwrap();
    coordinator.expire_session(&first).await;

    collect_until(&mut running.events, |e| {
        matches!(e, PresenceEvent::SessionRecreated { .. })
    })
    .await;
    collect_until(&mut running.events, |e| {
        matches!(e, PresenceEvent::BindSucceeded { .. })
    })
    .await;

    let history = coordinator.bind_history().await;
    let recreated_at = history.iter().rposition(|id| *id == first).unwrap();
    assert!(history[recreated_at + 1..].iter().all(|id| *id != first));

    stop(running).await.unwrap();
}

/// Delays session creation and key binding before passing them on.
struct Delayed {
    inner: Arc<InMemoryCoordinator>,
    create: Duration,
    bind: Duration,
}

impl Delayed {
    fn new(inner: &Arc<InMemoryCoordinator>) -> Self {
        Self {
            inner: inner.clone(),
            create: Duration::ZERO,
            bind: Duration::ZERO,
        }
    }
}

#[async_trait]
impl Coordinator for Delayed {
    async fn create_session(
        &self,
        name: &str,
        ttl: Duration,
    ) -> tether_coordinator::Result<SessionId> {
        sleep(self.create).await;
        self.inner.create_session(name, ttl).await
    }

    async fn destroy_session(&self, id: &SessionId) -> tether_coordinator::Result<()> {
        self.inner.destroy_session(id).await
    }

    async fn renew_session(&self, id: &SessionId) -> tether_coordinator::Result<()> {
        self.inner.renew_session(id).await
    }

    async fn bind_key(
        &self,
        session: &SessionId,
        key: &str,
        value: &[u8],
    ) -> tether_coordinator::Result<BindingLost> {
        sleep(self.bind).await;
        self.inner.bind_key(session, key, value).await
    }

    async fn register_endpoint(
        &self,
        registration: &Registration,
    ) -> tether_coordinator::Result<()> {
        self.inner.register_endpoint(registration).await
    }

    async fn deregister_endpoint(&self, id: &str) -> tether_coordinator::Result<()> {
        self.inner.deregister_endpoint(id).await
    }

    async fn assert_health(
        &self,
        check_id: &str,
        status: HealthStatus,
    ) -> tether_coordinator::Result<()> {
        self.inner.assert_health(check_id, status).await
    }
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_negotiation_destroys_the_new_session() {
    let coordinator = Arc::new(InMemoryCoordinator::new());
    let delayed = Delayed {
        create: Duration::from_secs(2),
        ..Delayed::new(&coordinator)
    };
    let maintainer =
        PresenceMaintainer::new(Arc::new(delayed), Arc::new(UuidGenerator), config()).unwrap();
    let running = start_maintainer(maintainer);

    sleep(Duration::from_secs(1)).await;
    assert!(coordinator.live_sessions().await.is_empty());
    stop(running).await.unwrap();

    assert_eq!(coordinator.calls(Operation::CreateSession).await, 1);
    assert!(coordinator.live_sessions().await.is_empty());
    assert_eq!(coordinator.calls(Operation::DestroySession).await, 1);

    sleep(Duration::from_secs(60)).await;
    assert!(coordinator.live_sessions().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn session_error_during_bind_still_drives_recreation() {
    let coordinator = Arc::new(InMemoryCoordinator::new());
    let delayed = Delayed {
        bind: Duration::from_secs(3),
        ..Delayed::new(&coordinator)
    };
    let config = config().with_ttl(Duration::from_secs(2));
    let maintainer =
        PresenceMaintainer::new(Arc::new(delayed), Arc::new(UuidGenerator), config).unwrap();
    let mut running = start_maintainer(maintainer);

    let started = collect_until(&mut running.events, |e| {
        matches!(e, PresenceEvent::BindStarted { .. })
    })
    .await;
    let Some(PresenceEvent::BindStarted { session: first }) = started.last().cloned() else {
        panic!("expected a bind to start");
    };
    assert!(coordinator.expire_session(&SessionId::new(first.as_str())).await);

    let events = collect_until(&mut running.events, |e| *e == PresenceEvent::Ready).await;

    let error_at = events
        .iter()
        .position(|e| {
            matches!(e, PresenceEvent::SessionError { session, .. } if *session == first)
        })
        .expect("session error reported");
    assert!(events.iter().any(|e| matches!(
        e,
        PresenceEvent::SessionRecreated { previous, .. } if *previous == first
    )));
    assert!(events[error_at..].iter().all(|e| match e {
        PresenceEvent::BindStarted { session } | PresenceEvent::BindSucceeded { session } => {
            *session != first
        }
        _ => true,
    }));
    assert!(matches!(
        events.iter().rev().nth(1),
        Some(PresenceEvent::BindSucceeded { session }) if *session != first
    ));

    let holder = coordinator.holder(KEY).await.unwrap();
    assert_ne!(holder.as_str(), first);
    assert_eq!(coordinator.live_sessions().await, vec![holder]);

    stop(running).await.unwrap();
}
