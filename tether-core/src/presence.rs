//! Session lock maintainer.
//!
//! Keeps a key/value pair bound to a live session. The maintainer owns its
//! session exclusively: every coordinator call runs in its own task and
//! reports back through a result channel, and only the control loop ever
//! replaces the held session or binding.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tether_coordinator::{BindingLost, Coordinator, CoordinatorError, SessionId};
use tokio::sync::mpsc::error::SendError;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PresenceConfig;
use crate::error::{MaintainerError, SessionError};
use crate::events::PresenceEvent;
use crate::ids::IdGenerator;
use crate::runner::{ReadySignal, Runner};
use crate::session::{Session, SessionManager};
use crate::timer::RetryTimer;

/// Keeps `key` bound to a session until shutdown.
pub struct PresenceMaintainer {
    config: PresenceConfig,
    coordinator: Arc<dyn Coordinator>,
    sessions: SessionManager,
    initial_name: String,
    events: broadcast::Sender<PresenceEvent>,
}

impl PresenceMaintainer {
    /// Build a maintainer for `config`.
    ///
    /// Generates the name of the first session up front: an identifier
    /// source that cannot produce one makes the maintainer unusable.
    pub fn new(
        coordinator: Arc<dyn Coordinator>,
        ids: Arc<dyn IdGenerator>,
        config: PresenceConfig,
    ) -> Result<Self, MaintainerError> {
        config.validate()?;

        let sessions = SessionManager::new(Arc::clone(&coordinator), ids, config.ttl);
        let initial_name = sessions.generate_name()?;
        let (events, _) = broadcast::channel(256);

        Ok(Self {
            config,
            coordinator,
            sessions,
            initial_name,
            events,
        })
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }
}

#[async_trait]
impl Runner for PresenceMaintainer {
    fn name(&self) -> &'static str {
        "presence"
    }

    async fn run(
        self,
        shutdown: CancellationToken,
        mut ready: ReadySignal,
    ) -> Result<(), MaintainerError> {
        let Self {
            config,
            coordinator,
            sessions,
            initial_name,
            events,
        } = self;

        let (outcome_tx, mut outcomes) = mpsc::channel(1);
        let mut state = PresenceLoop {
            coordinator,
            sessions,
            key: config.key,
            value: config.value.into_bytes(),
            retry_interval: config.retry_interval,
            events,
            outcome_tx,
            session: None,
            lost: None,
            last_error: None,
            timer: RetryTimer::new(),
            negotiating: false,
        };

        info!(key = %state.key, "Presence maintainer started");
        state.dispatch_create(Some(initial_name));

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(outcome) = outcomes.recv() => match outcome {
                    Outcome::Negotiated { previous, result } => {
                        if let Err(e) = state.on_negotiated(previous, result) {
                            state.shut_down(&mut outcomes).await;
                            return Err(e);
                        }
                    }
                    Outcome::Bound { session, result } => {
                        state.on_bound(session, result, &mut ready);
                    }
                },
                error = next_session_error(&mut state.session) => state.on_session_error(error),
                reason = binding_lost(&mut state.lost) => state.on_lost(reason),
                _ = state.timer.fired() => state.on_retry(),
            }
        }

        state.shut_down(&mut outcomes).await;
        Ok(())
    }
}

enum Outcome {
    Negotiated {
        previous: Option<SessionId>,
        result: Result<Session, SessionError>,
    },
    Bound {
        session: SessionId,
        result: Result<BindingLost, CoordinatorError>,
    },
}

struct PresenceLoop {
    coordinator: Arc<dyn Coordinator>,
    sessions: SessionManager,
    key: String,
    value: Vec<u8>,
    retry_interval: Duration,
    events: broadcast::Sender<PresenceEvent>,
    outcome_tx: mpsc::Sender<Outcome>,
    session: Option<Session>,
    lost: Option<BindingLost>,
    last_error: Option<CoordinatorError>,
    timer: RetryTimer,
    negotiating: bool,
}

impl PresenceLoop {
    fn emit(&self, event: PresenceEvent) {
        let _ = self.events.send(event);
    }

    fn session_label(&self) -> String {
        self.session
            .as_ref()
            .map(|s| s.id().to_string())
            .unwrap_or_default()
    }

    fn dispatch_create(&mut self, name: Option<String>) {
        self.negotiating = true;
        let sessions = self.sessions.clone();
        let tx = self.outcome_tx.clone();

        tokio::spawn(async move {
            let result = match name {
                Some(name) => sessions.create_named(name).await,
                None => sessions.create().await,
            };
            report_negotiated(&sessions, &tx, None, result).await;
        });
    }

    fn dispatch_recreate(&mut self, previous: SessionId) {
        self.negotiating = true;
        let sessions = self.sessions.clone();
        let tx = self.outcome_tx.clone();

        tokio::spawn(async move {
            let result = sessions.recreate(&previous).await;
            report_negotiated(&sessions, &tx, Some(previous), result).await;
        });
    }

    fn dispatch_bind(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let session = session.id().clone();
        self.lost = None;

        debug!(key = %self.key, session = %session, "Binding key");
        self.emit(PresenceEvent::BindStarted {
            session: session.to_string(),
        });

        let coordinator = Arc::clone(&self.coordinator);
        let key = self.key.clone();
        let value = self.value.clone();
        let tx = self.outcome_tx.clone();

        tokio::spawn(async move {
            let result = coordinator.bind_key(&session, &key, &value).await;
            let _ = tx.send(Outcome::Bound { session, result }).await;
        });
    }

    fn on_negotiated(
        &mut self,
        previous: Option<SessionId>,
        result: Result<Session, SessionError>,
    ) -> Result<(), MaintainerError> {
        self.negotiating = false;

        match result {
            Ok(session) => {
                let id = session.id().to_string();
                match previous {
                    Some(previous) => {
                        info!(previous = %previous, session = %id, "Session recreated");
                        self.emit(PresenceEvent::SessionRecreated {
                            previous: previous.to_string(),
                            session: id.clone(),
                        });
                    }
                    None => self.emit(PresenceEvent::SessionCreated {
                        session: id.clone(),
                    }),
                }

                self.session = Some(session);
                self.last_error = None;
                self.timer.clear();
                self.dispatch_bind();
            }
            Err(e) if !e.is_retryable() => return Err(e.into()),
            Err(e) => {
                warn!(error = %e, retry_in = ?self.retry_interval, "Session negotiation failed");
                let error = e.to_string();
                match previous {
                    Some(previous) => self.emit(PresenceEvent::RecreateFailed {
                        previous: previous.to_string(),
                        error,
                    }),
                    None => self.emit(PresenceEvent::SessionCreateFailed { error }),
                }
                self.timer.arm(self.retry_interval);
            }
        }
        Ok(())
    }

    fn on_bound(
        &mut self,
        session: SessionId,
        result: Result<BindingLost, CoordinatorError>,
        ready: &mut ReadySignal,
    ) {
        match result {
            Ok(lost) => {
                info!(key = %self.key, session = %session, "Presence acquired");
                self.timer.clear();
                self.lost = Some(lost);
                self.emit(PresenceEvent::BindSucceeded {
                    session: session.to_string(),
                });

                if ready.fire() {
                    info!(key = %self.key, "Presence ready");
                    self.emit(PresenceEvent::Ready);
                }
            }
            Err(e) => {
                warn!(
                    key = %self.key,
                    session = %session,
                    error = %e,
                    retry_in = ?self.retry_interval,
                    "Bind failed"
                );
                self.emit(PresenceEvent::BindFailed {
                    session: session.to_string(),
                    error: e.to_string(),
                });
                self.timer.arm(self.retry_interval);
            }
        }
    }

    fn on_session_error(&mut self, error: CoordinatorError) {
        let session = self.session_label();
        warn!(session = %session, error = %error, "Session error");
        self.emit(PresenceEvent::SessionError {
            session,
            error: error.to_string(),
        });

        self.last_error = Some(error);
        self.timer.arm(self.retry_interval);
    }

    fn on_lost(&mut self, reason: String) {
        self.lost = None;

        let session = self.session_label();
        warn!(key = %self.key, session = %session, reason = %reason, "Presence lost");
        self.emit(PresenceEvent::PresenceLost { session, reason });

        self.timer.arm(self.retry_interval);
    }

    fn on_retry(&mut self) {
        if self.negotiating {
            return;
        }

        let invalid = self
            .last_error
            .as_ref()
            .is_some_and(CoordinatorError::is_session_invalid);

        match self.session.as_ref() {
            None => self.dispatch_create(None),
            Some(session) if invalid => {
                let previous = session.id().clone();
                self.dispatch_recreate(previous);
            }
            Some(_) => self.dispatch_bind(),
        }
    }

    async fn shut_down(&mut self, outcomes: &mut mpsc::Receiver<Outcome>) {
        info!(key = %self.key, "Presence maintainer shutting down");
        self.emit(PresenceEvent::ShuttingDown);

        self.lost = None;
        if let Some(session) = self.session.take() {
            self.sessions.destroy(session).await;
        }

        // Whatever an in-flight negotiation produces is destroyed too.
        if self.negotiating {
            debug!(key = %self.key, "Waiting for in-flight session negotiation");
            while let Some(outcome) = outcomes.recv().await {
                if let Outcome::Negotiated { result, .. } = outcome {
                    self.negotiating = false;
                    if let Ok(session) = result {
                        self.sessions.destroy(session).await;
                    }
                    break;
                }
            }
        }
    }
}

/// Hand a negotiated session to the control loop, or destroy it when the
/// loop is gone.
async fn report_negotiated(
    sessions: &SessionManager,
    tx: &mpsc::Sender<Outcome>,
    previous: Option<SessionId>,
    result: Result<Session, SessionError>,
) {
    let outcome = Outcome::Negotiated { previous, result };
    if let Err(SendError(Outcome::Negotiated {
        result: Ok(session),
        ..
    })) = tx.send(outcome).await
    {
        sessions.destroy(session).await;
    }
}

async fn next_session_error(session: &mut Option<Session>) -> CoordinatorError {
    match session {
        Some(session) => session.next_error().await,
        None => pending().await,
    }
}

async fn binding_lost(lost: &mut Option<BindingLost>) -> String {
    match lost {
        Some(lost) => lost.wait().await,
        None => pending().await,
    }
}
