//! Timers driving the maintainer loops.

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Sleep, sleep};

/// Interval at which a TTL-bound registration is renewed.
///
/// Half the TTL, so one renewal can be missed before the TTL lapses.
#[must_use]
pub fn renewal_period(ttl: Duration) -> Duration {
    ttl / 2
}

/// One-shot deadline that can be re-armed or cleared.
///
/// An unarmed timer never fires, so it can sit in a `select!` next to the
/// other event sources without a guard.
#[derive(Debug, Default)]
pub struct RetryTimer {
    deadline: Option<Pin<Box<Sleep>>>,
}

impl RetryTimer {
    /// Create an unarmed timer.
    #[must_use]
    pub fn new() -> Self {
        Self { deadline: None }
    }

    /// Fire once after `after`, replacing any pending deadline.
    pub fn arm(&mut self, after: Duration) {
        self.deadline = Some(Box::pin(sleep(after)));
    }

    /// Drop any pending deadline.
    pub fn clear(&mut self) {
        self.deadline = None;
    }

    /// Whether a deadline is pending.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Wait for the pending deadline, disarming the timer when it passes.
    ///
    /// Cancel-safe: dropping the future leaves the deadline armed.
    pub async fn fired(&mut self) {
        match self.deadline.as_mut() {
            Some(deadline) => {
                deadline.as_mut().await;
                self.deadline = None;
            }
            None => pending::<()>().await,
        }
    }
}
