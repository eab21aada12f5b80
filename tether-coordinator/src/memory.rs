//! In-memory Coordinator implementation for testing.
//!
//! Behaves like a single coordinator agent held in process memory. Faults can
//! be injected per operation, sessions can be expired and keys released from
//! the outside, and TTL checks lapse against the tokio clock, so a paused
//! runtime controls when a check turns failing.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, oneshot};
use tokio::time::Instant;

use crate::error::{CoordinatorError, Result};
use crate::traits::Coordinator;
use crate::types::{BindingLost, HealthStatus, Registration, SessionId};

/// Coordinator operations, used to target injected faults and count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateSession,
    DestroySession,
    RenewSession,
    BindKey,
    RegisterEndpoint,
    DeregisterEndpoint,
    AssertHealth,
}

struct SessionEntry {
    live: bool,
}

struct KeyEntry {
    value: Vec<u8>,
    session: SessionId,
    lost: Option<oneshot::Sender<String>>,
}

impl KeyEntry {
    fn release(mut self, reason: &str) {
        if let Some(tx) = self.lost.take() {
            let _ = tx.send(reason.to_string());
        }
    }
}

struct ServiceEntry {
    registration: Registration,
    status: HealthStatus,
    last_pass: Option<Instant>,
}

impl ServiceEntry {
    fn effective_status(&self, now: Instant) -> HealthStatus {
        match (self.status, self.last_pass) {
            (HealthStatus::Passing, Some(at))
                if now.duration_since(at) <= self.registration.ttl =>
            {
                HealthStatus::Passing
            }
            _ => HealthStatus::Failing,
        }
    }
}

struct State {
    sessions: HashMap<SessionId, SessionEntry>,
    keys: HashMap<String, KeyEntry>,
    services: HashMap<String, ServiceEntry>,
    next_session: u64,
    reachable: bool,
    pending_failures: HashMap<Operation, u32>,
    calls: HashMap<Operation, usize>,
    bind_history: Vec<SessionId>,
    health_history: Vec<(String, HealthStatus)>,
}

impl State {
    fn admit(&mut self, op: Operation) -> Result<()> {
        *self.calls.entry(op).or_default() += 1;

        if !self.reachable {
            return Err(CoordinatorError::Unreachable("coordinator offline".to_string()));
        }
        let remaining = self.pending_failures.entry(op).or_default();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(CoordinatorError::Unreachable(format!(
                "injected {op:?} failure"
            )));
        }
        Ok(())
    }

    fn release_keys_of(&mut self, session: &SessionId, reason: &str) {
        let keys: Vec<String> = self
            .keys
            .iter()
            .filter(|(_, entry)| &entry.session == session)
            .map(|(key, _)| key.clone())
            .collect();

        for key in keys {
            if let Some(entry) = self.keys.remove(&key) {
                entry.release(reason);
            }
        }
    }

    fn is_live(&self, session: &SessionId) -> bool {
        self.sessions.get(session).is_some_and(|s| s.live)
    }

    fn service_for_check(&mut self, check_id: &str) -> Option<&mut ServiceEntry> {
        self.services
            .values_mut()
            .find(|s| s.registration.check_id() == check_id)
    }
}

/// In-memory implementation of Coordinator for testing.
pub struct InMemoryCoordinator {
    state: Mutex<State>,
}

impl InMemoryCoordinator {
    /// Create a reachable coordinator with no sessions, keys or services.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                sessions: HashMap::new(),
                keys: HashMap::new(),
                services: HashMap::new(),
                next_session: 0,
                reachable: true,
                pending_failures: HashMap::new(),
                calls: HashMap::new(),
                bind_history: Vec::new(),
                health_history: Vec::new(),
            }),
        }
    }

    /// Make every operation fail with `Unreachable` until reset.
    pub async fn set_reachable(&self, reachable: bool) {
        self.state.lock().await.reachable = reachable;
    }

    /// Fail the next `count` calls of `op` with `Unreachable`.
    pub async fn fail_next(&self, op: Operation, count: u32) {
        self.state.lock().await.pending_failures.insert(op, count);
    }

    /// Number of times `op` was called, including failed calls.
    pub async fn calls(&self, op: Operation) -> usize {
        self.state.lock().await.calls.get(&op).copied().unwrap_or(0)
    }

    /// Expire a session as if its TTL lapsed, releasing its keys.
    ///
    /// Returns `false` if the session was not live.
    pub async fn expire_session(&self, id: &SessionId) -> bool {
        let mut state = self.state.lock().await;
        let Some(entry) = state.sessions.get_mut(id) else {
            return false;
        };
        let was_live = entry.live;
        entry.live = false;
        state.release_keys_of(id, "session expired");
        was_live
    }

    /// Delete a key, firing its lost notification.
    pub async fn release_key(&self, key: &str) -> bool {
        let mut state = self.state.lock().await;
        match state.keys.remove(key) {
            Some(entry) => {
                entry.release("key deleted");
                true
            }
            None => false,
        }
    }

    /// Session currently holding `key`.
    pub async fn holder(&self, key: &str) -> Option<SessionId> {
        let state = self.state.lock().await;
        state.keys.get(key).map(|entry| entry.session.clone())
    }

    /// Value stored under `key`.
    pub async fn value(&self, key: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().await;
        state.keys.get(key).map(|entry| entry.value.clone())
    }

    /// Sessions that are currently live.
    pub async fn live_sessions(&self) -> Vec<SessionId> {
        let state = self.state.lock().await;
        state
            .sessions
            .iter()
            .filter(|(_, entry)| entry.live)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Sessions used by every bind attempt that reached the coordinator, in order.
    pub async fn bind_history(&self) -> Vec<SessionId> {
        self.state.lock().await.bind_history.clone()
    }

    /// Every accepted health assertion, in order.
    pub async fn health_history(&self) -> Vec<(String, HealthStatus)> {
        self.state.lock().await.health_history.clone()
    }

    /// Registration stored for endpoint `id`.
    pub async fn service(&self, id: &str) -> Option<Registration> {
        let state = self.state.lock().await;
        state.services.get(id).map(|s| s.registration.clone())
    }

    /// Drop an endpoint as if the agent lost its catalog.
    pub async fn remove_service(&self, id: &str) -> bool {
        self.state.lock().await.services.remove(id).is_some()
    }

    /// Status of a TTL check as an observer would see it now.
    ///
    /// A check is failing until its first passing assertion, after a failing
    /// assertion, and once its TTL has elapsed since the last pass.
    pub async fn check_status(&self, check_id: &str) -> Option<HealthStatus> {
        let state = self.state.lock().await;
        let now = Instant::now();
        state
            .services
            .values()
            .find(|s| s.registration.check_id() == check_id)
            .map(|s| s.effective_status(now))
    }
}

impl Default for InMemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Coordinator for InMemoryCoordinator {
    async fn create_session(&self, _name: &str, _ttl: Duration) -> Result<SessionId> {
        let mut state = self.state.lock().await;
        state.admit(Operation::CreateSession)?;

        state.next_session += 1;
        let id = SessionId::new(format!("session-{}", state.next_session));
        state.sessions.insert(id.clone(), SessionEntry { live: true });
        Ok(id)
    }

    async fn destroy_session(&self, id: &SessionId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.admit(Operation::DestroySession)?;

        state.sessions.remove(id);
        state.release_keys_of(id, "session destroyed");
        Ok(())
    }

    async fn renew_session(&self, id: &SessionId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.admit(Operation::RenewSession)?;

        if state.is_live(id) {
            Ok(())
        } else {
            Err(CoordinatorError::SessionExpired)
        }
    }

    async fn bind_key(&self, session: &SessionId, key: &str, value: &[u8]) -> Result<BindingLost> {
        let mut state = self.state.lock().await;
        state.admit(Operation::BindKey)?;
        state.bind_history.push(session.clone());

        if !state.is_live(session) {
            return Err(CoordinatorError::SessionInvalid(format!(
                "invalid session \"{session}\""
            )));
        }

        let held_elsewhere = state.keys.get(key).is_some_and(|existing| {
            &existing.session != session && state.is_live(&existing.session)
        });
        if held_elsewhere {
            return Err(CoordinatorError::LockHeld(key.to_string()));
        }

        let (tx, lost) = BindingLost::channel();
        state.keys.insert(
            key.to_string(),
            KeyEntry {
                value: value.to_vec(),
                session: session.clone(),
                lost: Some(tx),
            },
        );
        Ok(lost)
    }

    async fn register_endpoint(&self, registration: &Registration) -> Result<()> {
        let mut state = self.state.lock().await;
        state.admit(Operation::RegisterEndpoint)?;

        let entry = state
            .services
            .entry(registration.id.clone())
            .or_insert_with(|| ServiceEntry {
                registration: registration.clone(),
                status: HealthStatus::Failing,
                last_pass: None,
            });
        entry.registration = registration.clone();
        Ok(())
    }

    async fn deregister_endpoint(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.admit(Operation::DeregisterEndpoint)?;

        match state.services.remove(id) {
            Some(_) => Ok(()),
            None => Err(CoordinatorError::NotFound(format!("service \"{id}\""))),
        }
    }

    async fn assert_health(&self, check_id: &str, status: HealthStatus) -> Result<()> {
        let mut state = self.state.lock().await;
        state.admit(Operation::AssertHealth)?;

        let now = Instant::now();
        let Some(service) = state.service_for_check(check_id) else {
            return Err(CoordinatorError::NotFound(format!(
                "unknown check \"{check_id}\""
            )));
        };
        service.status = status;
        if status == HealthStatus::Passing {
            service.last_pass = Some(now);
        }
        state.health_history.push((check_id.to_string(), status));
        Ok(())
    }
}
