//! Signal-driven shutdown coordination.
//!
//! SIGINT and SIGTERM are translated into a stop flag carried by a watch
//! channel. The signal path only sets the flag; teardown (closing the
//! listener, removing the store file) happens exactly once on the main task
//! after it observes the flag, so multiple signals in quick succession still
//! produce a single shutdown sequence.

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::info;

/// Owner of the stop flag. Held by `main`; handlers get a [`Shutdown`].
pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// A receiver for the accept loop or a connection handler.
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }

    /// Set the stop flag. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Spawn a task that triggers shutdown on SIGINT or SIGTERM.
    pub fn listen_for_signals(&self) -> std::io::Result<()> {
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let name = tokio::select! {
                _ = interrupt.recv() => "SIGINT",
                _ = terminate.recv() => "SIGTERM",
            };
            info!(signal = name, "caught signal, stopping");
            tx.send_replace(true);
        });

        Ok(())
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side of the stop flag.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is requested. Returns immediately if it already
    /// has been, so this is safe to poll in a `select!` on every loop turn.
    pub async fn recv(&mut self) {
        // The controller outlives all subscribers in practice; a closed
        // channel also means the process is coming down.
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}
