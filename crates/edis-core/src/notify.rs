//! The notification seam.
//!
//! The actor calls [`Notifier::notify`] with `(database, command)` before
//! executing every command; a failure aborts that command with
//! `notify_failed`. The bus itself is an external collaborator — this
//! crate only defines the seam and two stock implementations.

use std::fmt;

use thiserror::Error;
use tokio::sync::broadcast;

use crate::command::Command;

/// Raised when the bus refuses a notification.
#[derive(Debug, Error)]
#[error("notification bus rejected the event")]
pub struct NotifyError;

/// Receives one event per accepted command, before execution.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, db: usize, command: &Command) -> Result<(), NotifyError>;
}

/// Discards every event. The default for embedded use.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _db: usize, _command: &Command) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Publishes `(db, command)` on a tokio broadcast channel. Having no
/// subscribers is not a failure; the channel only exists for whoever cares
/// to listen.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<(usize, Command)>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<(usize, Command)>) {
        let (tx, rx) = broadcast::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(usize, Command)> {
        self.tx.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, db: usize, command: &Command) -> Result<(), NotifyError> {
        // send only fails when there are no receivers — fine by contract
        let _ = self.tx.send((db, command.clone()));
        Ok(())
    }
}

impl fmt::Debug for BroadcastNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastNotifier").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn noop_always_accepts() {
        let cmd = Command::new("PING", vec![]);
        assert!(NoopNotifier.notify(0, &cmd).is_ok());
    }

    #[tokio::test]
    async fn broadcast_delivers_to_subscribers() {
        let (bus, mut rx) = BroadcastNotifier::new(8);
        let cmd = Command::new("set", vec![Bytes::from("k"), Bytes::from("v")]);
        bus.notify(3, &cmd).unwrap();

        let (db, seen) = rx.recv().await.unwrap();
        assert_eq!(db, 3);
        assert_eq!(seen.name, "SET");
    }

    #[test]
    fn broadcast_without_subscribers_still_accepts() {
        let (bus, rx) = BroadcastNotifier::new(8);
        drop(rx);
        assert!(bus.notify(0, &Command::new("PING", vec![])).is_ok());
    }
}
