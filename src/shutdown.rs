//! Cooperative cancellation
//!
//! A [`ShutdownTrigger`] is held by whoever decides to stop (the signal
//! handler, a UI, a test). Every long wait in the crate selects on a
//! [`Shutdown`] observer so the session can move to draining instead of
//! being torn down abruptly.

use tokio::sync::watch;

/// Create a connected trigger / observer pair
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

/// Requests shutdown
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Request shutdown. Returns whether it had already been requested.
    pub fn trigger(&self) -> bool {
        self.tx.send_replace(true)
    }

    /// Get another observer for this trigger
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observes a shutdown request
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// An observer that never fires
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown was requested. Never resolves if the trigger
    /// was dropped without firing.
    pub async fn triggered(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Exit status after a second interrupt (128 + SIGINT)
const FORCED_EXIT_CODE: i32 = 130;

/// Fire `trigger` on Ctrl+C (and SIGTERM on Unix). A second signal while
/// the session is still draining exits the process immediately.
pub fn spawn_signal_handler(trigger: ShutdownTrigger) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        tokio::spawn(async move {
            let (mut interrupt, mut terminate) =
                match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                    (Ok(i), Ok(t)) => (i, t),
                    (Err(e), _) | (_, Err(e)) => {
                        tracing::warn!("Failed to install signal handler: {}", e);
                        return;
                    }
                };
            loop {
                let reason = tokio::select! {
                    _ = interrupt.recv() => "user interrupt",
                    _ = terminate.recv() => "terminated",
                };
                on_signal(&trigger, reason);
            }
        });
    }

    #[cfg(windows)]
    {
        if let Err(e) = ctrlc::set_handler(move || on_signal(&trigger, "user interrupt")) {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
        }
    }
}

fn on_signal(trigger: &ShutdownTrigger, reason: &str) {
    if trigger.trigger() {
        tracing::warn!("Second signal ({}), exiting immediately", reason);
        std::process::exit(FORCED_EXIT_CODE);
    }
    tracing::info!("Stopping stream ({})... press Ctrl+C again to force quit", reason);
}
