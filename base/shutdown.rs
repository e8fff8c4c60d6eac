// This file is part of Fieldcast NVR, on-premise video capture/processing/
// delivery middleware for sports venues.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Tools for propagating a graceful shutdown signal through the program.
//!
//! The [`Receiver`] can be cloned, checked synchronously, or awaited. Every
//! capture supervisor, worker pool, and HTTP handler in the core is handed a
//! clone and is expected to check it at each checkpoint (4.3 step 7, 5
//! "Cancellation").

#[derive(Debug)]
pub struct ShutdownError;

impl std::fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("shutdown requested")
    }
}

impl std::error::Error for ShutdownError {}

/// Dropping the sender requests shutdown. There is normally exactly one,
/// held by the top-level `run` command until a signal arrives.
pub struct Sender(tokio::sync::watch::Sender<bool>);

impl Drop for Sender {
    fn drop(&mut self) {
        let _ = self.0.send(true);
    }
}

#[derive(Clone)]
pub struct Receiver(tokio::sync::watch::Receiver<bool>);

impl Receiver {
    /// Returns an error if shutdown has been requested.
    pub fn check(&self) -> Result<(), ShutdownError> {
        if *self.0.borrow() {
            Err(ShutdownError)
        } else {
            Ok(())
        }
    }

    /// Resolves once shutdown has been requested. Safe to call repeatedly
    /// (e.g. in a `tokio::select!` loop); returns immediately if shutdown
    /// already happened.
    pub async fn cancelled(&mut self) {
        if *self.0.borrow() {
            return;
        }
        // `changed()` only errors if every Sender was dropped without ever
        // sending `true`, which can't happen: our only Sender sends `true`
        // from its `Drop` impl.
        let _ = self.0.changed().await;
    }

    /// Blocks the current (non-async) thread until shutdown or `timeout`
    /// elapses, whichever comes first. Used by code that can't `.await`,
    /// mirroring the teacher's synchronous shutdown wait.
    pub fn wait_for(&self, timeout: std::time::Duration) -> Result<(), ShutdownError> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if *self.0.borrow() {
                return Err(ShutdownError);
            }
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            std::thread::sleep(remaining.min(std::time::Duration::from_millis(50)));
        }
    }
}

/// Returns a sender and receiver for graceful shutdown. Dropping the sender
/// requests shutdown.
pub fn channel() -> (Sender, Receiver) {
    let (tx, rx) = tokio::sync::watch::channel(false);
    (Sender(tx), Receiver(rx))
}

#[cfg(test)]
mod tests {
    #[test]
    fn simple_check() {
        let (tx, rx) = super::channel();
        rx.check().unwrap();
        drop(tx);
        rx.check().unwrap_err();
    }

    #[tokio::test]
    async fn cancelled_resolves_after_drop() {
        let (tx, mut rx) = super::channel();
        let mut rx2 = rx.clone();
        let handle = tokio::spawn(async move {
            rx2.cancelled().await;
        });
        tokio::task::yield_now().await;
        drop(tx);
        handle.await.unwrap();
        rx.check().unwrap_err();
    }
}
