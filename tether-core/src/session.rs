//! Session negotiation and validity monitoring.
//!
//! A [`SessionManager`] negotiates sessions with the coordinator and hands
//! out [`Session`] handles. Each handle owns a background task that renews
//! the session every half TTL and reports, at most once, when the session can
//! no longer be used. Dropping or destroying the handle stops the task.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use tether_coordinator::{Coordinator, CoordinatorError, SessionId};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::ids::IdGenerator;
use crate::timer::renewal_period;

/// A live lease held by exactly one owner.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    name: String,
    ttl: Duration,
    errors: mpsc::Receiver<CoordinatorError>,
    _monitor: DropGuard,
}

impl Session {
    /// Coordinator-assigned identifier.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Name the session was negotiated with.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Wait for the monitor to report the session unusable.
    ///
    /// Resolves at most once per session; afterwards it stays pending.
    /// Cancel-safe.
    pub async fn next_error(&mut self) -> CoordinatorError {
        match self.errors.recv().await {
            Some(error) => error,
            None => pending().await,
        }
    }
}

/// Negotiates, replaces and releases sessions.
#[derive(Clone)]
pub struct SessionManager {
    coordinator: Arc<dyn Coordinator>,
    ids: Arc<dyn IdGenerator>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(
        coordinator: Arc<dyn Coordinator>,
        ids: Arc<dyn IdGenerator>,
        ttl: Duration,
    ) -> Self {
        Self {
            coordinator,
            ids,
            ttl,
        }
    }

    /// TTL every session from this manager is negotiated with.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Generate a fresh session name.
    pub fn generate_name(&self) -> Result<String, SessionError> {
        Ok(self.ids.generate()?)
    }

    /// Negotiate a session under a freshly generated name.
    pub async fn create(&self) -> Result<Session, SessionError> {
        let name = self.generate_name()?;
        self.create_named(name).await
    }

    /// Negotiate a session under `name`.
    pub async fn create_named(&self, name: String) -> Result<Session, SessionError> {
        let id = self
            .coordinator
            .create_session(&name, self.ttl)
            .await
            .map_err(SessionError::CreateFailed)?;

        info!(session = %id, name = %name, ttl = ?self.ttl, "Session created");
        Ok(self.start(id, name))
    }

    /// Replace an invalid session with a new one.
    ///
    /// The previous session is released best-effort first. On error nothing
    /// has changed for the caller, so the call can simply be repeated.
    pub async fn recreate(&self, previous: &SessionId) -> Result<Session, SessionError> {
        self.release(previous).await;
        self.create().await
    }

    /// Stop monitoring `session` and release it. Failures are only logged.
    pub async fn destroy(&self, session: Session) {
        let id = session.id.clone();
        drop(session);
        self.release(&id).await;
    }

    async fn release(&self, id: &SessionId) {
        match self.coordinator.destroy_session(id).await {
            Ok(()) => info!(session = %id, "Session destroyed"),
            Err(e) => warn!(session = %id, error = %e, "Failed to destroy session"),
        }
    }

    fn start(&self, id: SessionId, name: String) -> Session {
        let (tx, errors) = mpsc::channel(1);
        let token = CancellationToken::new();

        tokio::spawn(monitor(
            Arc::clone(&self.coordinator),
            id.clone(),
            self.ttl,
            tx,
            token.clone(),
        ));

        Session {
            id,
            name,
            ttl: self.ttl,
            errors,
            _monitor: token.drop_guard(),
        }
    }
}

/// Renew `id` every half TTL until it fails for good or `token` is cancelled.
async fn monitor(
    coordinator: Arc<dyn Coordinator>,
    id: SessionId,
    ttl: Duration,
    errors: mpsc::Sender<CoordinatorError>,
    token: CancellationToken,
) {
    let period = renewal_period(ttl);
    let mut last_renewed = Instant::now();

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = sleep(period) => {}
        }

        let result = tokio::select! {
            _ = token.cancelled() => return,
            result = coordinator.renew_session(&id) => result,
        };

        match result {
            Ok(()) => {
                debug!(session = %id, "Session renewed");
                last_renewed = Instant::now();
            }
            Err(e) if e.is_session_invalid() => {
                warn!(session = %id, error = %e, "Session is no longer valid");
                let _ = errors.try_send(e);
                return;
            }
            Err(e) => {
                warn!(session = %id, error = %e, "Session renewal failed");
                if last_renewed.elapsed() >= ttl {
                    let _ = errors.try_send(CoordinatorError::SessionExpired);
                    return;
                }
            }
        }
    }
}
