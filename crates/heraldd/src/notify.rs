//! Bridges the synchronous engine thread to the async D-Bus signal.
//!
//! The engine calls [`Notifier::notify`] inline during a tick; the actual
//! `DignitaryRecognized` emission happens on the runtime, so the notifier
//! hands the event over a channel and waits for an ack under a deadline.
//! A missed deadline or a failed emission reports an error to the session,
//! which then leaves cooldown state untouched and retries on the next
//! recognized occurrence.

use std::time::Duration;

use tokio::sync::mpsc;

use herald_core::{Notifier, NotifyError};

/// One greeting to emit on the bus.
pub struct GreetingEvent {
    pub name: String,
    pub message: String,
    /// Emission outcome, reported back to the waiting engine thread.
    pub ack: std::sync::mpsc::Sender<bool>,
}

/// [`Notifier`] that forwards greetings to the signal pump task.
pub struct SignalNotifier {
    tx: mpsc::Sender<GreetingEvent>,
    timeout: Duration,
}

impl SignalNotifier {
    pub fn new(tx: mpsc::Sender<GreetingEvent>, timeout: Duration) -> Self {
        Self { tx, timeout }
    }
}

impl Notifier for SignalNotifier {
    fn notify(&self, name: &str, message: &str) -> Result<(), NotifyError> {
        let (ack_tx, ack_rx) = std::sync::mpsc::channel();
        self.tx
            .blocking_send(GreetingEvent {
                name: name.to_string(),
                message: message.to_string(),
                ack: ack_tx,
            })
            .map_err(|_| NotifyError::Failed("greeting channel closed".into()))?;

        match ack_rx.recv_timeout(self.timeout) {
            Ok(true) => Ok(()),
            Ok(false) => Err(NotifyError::Failed("signal emission failed".into())),
            Err(_) => Err(NotifyError::Timeout),
        }
    }
}
