//! Signalling primitives between the engine and its caller.

use crate::error::ClientError;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

/// A value delivered at most once.
///
/// Firing never blocks and later fires are ignored, so any number of code
/// paths may try to complete it.
pub struct OnceSignal<T> {
    tx: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> OnceSignal<T> {
    pub fn channel() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Delivers `value` if nothing was delivered yet. Returns whether this
    /// call was the one that fired.
    pub fn fire(&self, value: T) -> bool {
        match self.tx.lock().take() {
            Some(tx) => {
                // The receiver may be gone; the signal still counts as fired.
                let _ = tx.send(value);
                true
            }
            None => false,
        }
    }

    pub fn is_fired(&self) -> bool {
        self.tx.lock().is_none()
    }
}

/// Capacity of the error channel handed to callers.
pub const ERROR_CHANNEL_CAPACITY: usize = 16;

/// Non-blocking sender for the error channel.
pub struct ErrorReporter {
    tx: mpsc::Sender<ClientError>,
}

impl ErrorReporter {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ClientError>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Hands `error` to the caller without waiting.
    ///
    /// A full or closed channel drops the error with a log line.
    pub fn report(&self, error: ClientError) {
        match self.tx.try_send(error) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(error)) => {
                tracing::warn!("Error channel full, dropping: {}", error);
            }
            Err(mpsc::error::TrySendError::Closed(error)) => {
                tracing::debug!("Error channel closed, dropping: {}", error);
            }
        }
    }
}
