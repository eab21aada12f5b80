//! Heartbeat registrar.
//!
//! Registers an endpoint with a TTL check and keeps the check passing by
//! asserting health every half TTL. On shutdown the endpoint is either
//! deregistered or marked failing so observers stop routing to it at once.

use std::future::pending;
use std::sync::Arc;

use async_trait::async_trait;
use tether_coordinator::{Coordinator, CoordinatorError, HealthStatus, Registration};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{RegistrationPolicy, ServiceConfig, ShutdownPolicy};
use crate::error::MaintainerError;
use crate::events::ServiceEvent;
use crate::runner::{ReadySignal, Runner};
use crate::timer::{RetryTimer, renewal_period};

/// Keeps an endpoint registered and passing until shutdown.
pub struct ServiceRegistrar {
    coordinator: Arc<dyn Coordinator>,
    registration: Registration,
    policy: RegistrationPolicy,
    on_shutdown: ShutdownPolicy,
    events: broadcast::Sender<ServiceEvent>,
}

impl ServiceRegistrar {
    pub fn new(
        coordinator: Arc<dyn Coordinator>,
        config: ServiceConfig,
    ) -> Result<Self, MaintainerError> {
        config.validate()?;
        let (events, _) = broadcast::channel(256);

        Ok(Self {
            coordinator,
            registration: config.registration(),
            policy: config.registration,
            on_shutdown: config.on_shutdown,
            events,
        })
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }

    /// The endpoint this registrar maintains.
    pub fn registration(&self) -> &Registration {
        &self.registration
    }
}

#[async_trait]
impl Runner for ServiceRegistrar {
    fn name(&self) -> &'static str {
        "service"
    }

    async fn run(
        self,
        shutdown: CancellationToken,
        mut ready: ReadySignal,
    ) -> Result<(), MaintainerError> {
        let (outcome_tx, mut outcomes) = mpsc::channel(1);
        let check_id = self.registration.check_id();
        let mut state = RegistrarLoop {
            coordinator: self.coordinator,
            registration: Arc::new(self.registration),
            check_id,
            policy: self.policy,
            on_shutdown: self.on_shutdown,
            events: self.events,
            outcome_tx,
            phase: Phase::Registering,
            attempt: 0,
            in_flight: None,
            failures: 0,
            renewal: None,
            timer: RetryTimer::new(),
        };

        info!(service = %state.registration.id, "Service registrar started");
        state.dispatch_register();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(outcome) = outcomes.recv() => match outcome {
                    Outcome::Registered { attempt, result } => {
                        state.on_registered(attempt, result)?;
                    }
                    Outcome::Asserted(result) => state.on_asserted(result, &mut ready),
                },
                _ = next_tick(&mut state.renewal) => state.dispatch_assert(),
                _ = state.timer.fired() => {
                    if state.phase == Phase::Registering {
                        state.dispatch_register();
                    }
                }
            }
        }

        state.shut_down(&mut outcomes).await;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Registering,
    Registered,
}

enum Outcome {
    Registered {
        attempt: u32,
        result: Result<(), CoordinatorError>,
    },
    Asserted(Result<(), CoordinatorError>),
}

struct RegistrarLoop {
    coordinator: Arc<dyn Coordinator>,
    registration: Arc<Registration>,
    check_id: String,
    policy: RegistrationPolicy,
    on_shutdown: ShutdownPolicy,
    events: broadcast::Sender<ServiceEvent>,
    outcome_tx: mpsc::Sender<Outcome>,
    phase: Phase,
    attempt: u32,
    /// Registration attempt whose outcome has not arrived yet.
    in_flight: Option<u32>,
    failures: u32,
    renewal: Option<Interval>,
    timer: RetryTimer,
}

impl RegistrarLoop {
    fn emit(&self, event: ServiceEvent) {
        let _ = self.events.send(event);
    }

    fn dispatch_register(&mut self) {
        self.attempt += 1;
        let attempt = self.attempt;
        self.in_flight = Some(attempt);

        debug!(service = %self.registration.id, attempt, "Registering endpoint");
        self.emit(ServiceEvent::Registering { attempt });

        let coordinator = Arc::clone(&self.coordinator);
        let registration = Arc::clone(&self.registration);
        let tx = self.outcome_tx.clone();

        tokio::spawn(async move {
            let result = coordinator.register_endpoint(&registration).await;
            let _ = tx.send(Outcome::Registered { attempt, result }).await;
        });
    }

    fn dispatch_assert(&mut self) {
        let coordinator = Arc::clone(&self.coordinator);
        let check_id = self.check_id.clone();
        let tx = self.outcome_tx.clone();

        tokio::spawn(async move {
            let result = coordinator
                .assert_health(&check_id, HealthStatus::Passing)
                .await;
            let _ = tx.send(Outcome::Asserted(result)).await;
        });
    }

    fn on_registered(
        &mut self,
        attempt: u32,
        result: Result<(), CoordinatorError>,
    ) -> Result<(), MaintainerError> {
        if attempt != self.attempt {
            return Ok(());
        }
        self.in_flight = None;

        match result {
            Ok(()) => {
                info!(service = %self.registration.id, attempt, "Endpoint registered");
                self.emit(ServiceEvent::Registered);

                self.phase = Phase::Registered;
                self.failures = 0;
                self.timer.clear();

                let period = renewal_period(self.registration.ttl);
                let mut renewal = interval_at(Instant::now() + period, period);
                renewal.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.renewal = Some(renewal);

                self.dispatch_assert();
            }
            Err(e) => {
                self.failures += 1;
                self.emit(ServiceEvent::RegistrationFailed {
                    attempt,
                    error: e.to_string(),
                });

                match self.policy.next_delay(self.failures) {
                    Some(delay) => {
                        warn!(
                            service = %self.registration.id,
                            attempt,
                            error = %e,
                            retry_in = ?delay,
                            "Registration failed"
                        );
                        self.timer.arm(delay);
                    }
                    None => {
                        warn!(
                            service = %self.registration.id,
                            attempts = self.failures,
                            error = %e,
                            "Registration attempts exhausted"
                        );
                        return Err(MaintainerError::RegistrationExhausted {
                            attempts: self.failures,
                            last: e,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn on_asserted(&mut self, result: Result<(), CoordinatorError>, ready: &mut ReadySignal) {
        if self.phase != Phase::Registered {
            return;
        }

        match result {
            Ok(()) => {
                debug!(check = %self.check_id, "Health asserted");
                self.emit(ServiceEvent::HealthAsserted);

                if ready.fire() {
                    info!(service = %self.registration.id, "Service ready");
                    self.emit(ServiceEvent::Ready);
                }
            }
            Err(CoordinatorError::NotFound(reason)) => {
                warn!(
                    service = %self.registration.id,
                    reason = %reason,
                    "Coordinator lost the registration, registering again"
                );
                self.emit(ServiceEvent::RegistrationLost { error: reason });

                self.phase = Phase::Registering;
                self.renewal = None;
                self.dispatch_register();
            }
            Err(e) => {
                warn!(check = %self.check_id, error = %e, "Health assertion failed");
                self.emit(ServiceEvent::HealthAssertFailed {
                    error: e.to_string(),
                });
            }
        }
    }

    async fn shut_down(&mut self, outcomes: &mut mpsc::Receiver<Outcome>) {
        info!(
            service = %self.registration.id,
            policy = ?self.on_shutdown,
            "Service registrar shutting down"
        );
        self.emit(ServiceEvent::ShuttingDown);
        self.renewal = None;

        // A registration still in flight must settle before the policy applies.
        if let Some(pending_attempt) = self.in_flight.take() {
            debug!(
                service = %self.registration.id,
                attempt = pending_attempt,
                "Waiting for in-flight registration"
            );
            while let Some(outcome) = outcomes.recv().await {
                let settled = matches!(
                    outcome,
                    Outcome::Registered { attempt, .. } if attempt == pending_attempt
                );
                if settled {
                    break;
                }
            }
        }

        match self.on_shutdown {
            ShutdownPolicy::Deregister => {
                match self
                    .coordinator
                    .deregister_endpoint(&self.registration.id)
                    .await
                {
                    Ok(()) => {
                        info!(service = %self.registration.id, "Endpoint deregistered");
                        self.emit(ServiceEvent::Deregistered);
                    }
                    Err(CoordinatorError::NotFound(_)) => {
                        debug!(service = %self.registration.id, "Endpoint was not registered");
                    }
                    Err(e) => {
                        warn!(
                            service = %self.registration.id,
                            error = %e,
                            "Failed to deregister endpoint"
                        );
                    }
                }
            }
            ShutdownPolicy::MarkFailing => {
                match self
                    .coordinator
                    .assert_health(&self.check_id, HealthStatus::Failing)
                    .await
                {
                    Ok(()) => {
                        info!(check = %self.check_id, "Check marked failing");
                        self.emit(ServiceEvent::MarkedFailing);
                    }
                    Err(CoordinatorError::NotFound(_)) => {
                        debug!(check = %self.check_id, "Check was not registered");
                    }
                    Err(e) => {
                        warn!(check = %self.check_id, error = %e, "Failed to mark check failing");
                    }
                }
            }
        }
    }
}

async fn next_tick(renewal: &mut Option<Interval>) {
    match renewal {
        Some(renewal) => {
            renewal.tick().await;
        }
        None => pending::<()>().await,
    }
}
