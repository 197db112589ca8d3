//! Cooperative stop signal for long running sync loops.
//!
//! A stop request never interrupts work in flight. Loops check [`StopHandle::is_stopped`] at
//! their own boundaries and return once they observe it.

use tokio::sync::watch;

/// Handle to a stop signal. Clones share the same signal.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    /// Creates a signal in the running state.
    pub fn new() -> Self {
        // We keep no receiver around, the sender alone stores the value.
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Requests a stop. Idempotent.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_is_visible_through_every_clone() {
        let handle = StopHandle::new();
        let other = handle.clone();

        assert!(!handle.is_stopped());
        other.stop();
        other.stop();

        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn stop_from_another_task() {
        let handle = StopHandle::new();
        let remote = handle.clone();

        tokio::spawn(async move { remote.stop() }).await.unwrap();

        assert!(handle.is_stopped());
    }
}
