//! Contract between maintainers and the process that supervises them.
//!
//! A supervisor hands a maintainer a shutdown token and a [`ReadySignal`],
//! then awaits [`Runner::run`]. `Ok(())` means a clean exit after shutdown;
//! an error means the maintainer gave up and the supervisor decides whether
//! to restart the process.

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::MaintainerError;

/// One-shot "initial acquisition succeeded" notification.
#[derive(Debug)]
pub struct ReadySignal {
    tx: Option<oneshot::Sender<()>>,
    fired: bool,
}

impl ReadySignal {
    /// Create a signal and the receiver the supervisor waits on.
    #[must_use]
    pub fn channel() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Some(tx),
                fired: false,
            },
            rx,
        )
    }

    /// A signal nobody listens to.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            tx: None,
            fired: false,
        }
    }

    /// Fire the signal. Returns `true` only on the first call.
    pub fn fire(&mut self) -> bool {
        if self.fired {
            return false;
        }
        self.fired = true;
        if let Some(tx) = self.tx.take() {
            // A supervisor that stopped listening is not our concern.
            let _ = tx.send(());
        }
        true
    }

    /// Whether the signal has not fired yet.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.fired
    }
}

/// A long-running maintainer driven by a supervisor.
#[async_trait]
pub trait Runner: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Run until `shutdown` is cancelled or the maintainer gives up.
    async fn run(
        self,
        shutdown: CancellationToken,
        ready: ReadySignal,
    ) -> Result<(), MaintainerError>;
}
