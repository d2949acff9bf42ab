//! Shutdown signaling between the scheduler and in-flight runs.
//!
//! The channel carries no payload: every send is a request to stop. Receivers observe it
//! through [`tokio::sync::watch::Receiver::changed`].

use tokio::sync::watch;

/// Receiver side of the shutdown channel.
pub type ShutdownRx = watch::Receiver<()>;

/// Sender side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<()>);

impl ShutdownTx {
    /// Requests every subscribed receiver to stop.
    ///
    /// Returns an error if no receiver is alive anymore.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<()>> {
        self.0.send(())
    }

    /// Returns a new receiver which only observes shutdowns requested after this call.
    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

/// Creates a new shutdown channel.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(());
    (ShutdownTx(tx), rx)
}
