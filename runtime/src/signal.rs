//! Termination signals.
//!
//! OS signals are forwarded into a `tokio::sync::broadcast` channel so that
//! the process entrypoint and the consumer service both observe every signal.
//!
//! ```ignore
//! let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
//! let forwarder = SignalForwarder::register()?;
//! tokio::spawn(forwarder.run(signals.clone()));
//!
//! service.start(&ctx, signals.subscribe()).await?;
//! ```

use std::fmt;
use tokio::sync::broadcast;
use tracing::info;

/// Buffer size for termination signal channels.
pub const SIGNAL_CAPACITY: usize = 4;

/// A request to terminate the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TerminationSignal {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "SIGINT"),
            Self::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Create a termination signal channel.
#[must_use]
pub fn channel() -> (
    broadcast::Sender<TerminationSignal>,
    broadcast::Receiver<TerminationSignal>,
) {
    broadcast::channel(SIGNAL_CAPACITY)
}

/// Listens for OS termination signals and forwards them.
///
/// Registration happens up front in [`register`](Self::register) so that a
/// failure to install handlers is reported before the process starts work.
#[derive(Debug)]
pub struct SignalForwarder {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl SignalForwarder {
    /// Install handlers for SIGINT and SIGTERM (Ctrl+C elsewhere).
    ///
    /// # Errors
    ///
    /// Returns the I/O error from the OS if a handler cannot be installed.
    #[cfg(unix)]
    pub fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Install a Ctrl+C handler.
    ///
    /// # Errors
    ///
    /// Never fails on this platform; the signature matches the unix variant.
    #[cfg(not(unix))]
    pub fn register() -> std::io::Result<Self> {
        Ok(Self {})
    }

    /// Wait for the next signal.
    ///
    /// Returns `None` once the OS stream is closed.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> Option<TerminationSignal> {
        tokio::select! {
            received = self.interrupt.recv() => received.map(|()| TerminationSignal::Interrupt),
            received = self.terminate.recv() => received.map(|()| TerminationSignal::Terminate),
        }
    }

    /// Wait for the next signal.
    ///
    /// Returns `None` if Ctrl+C can no longer be observed.
    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> Option<TerminationSignal> {
        tokio::signal::ctrl_c()
            .await
            .ok()
            .map(|()| TerminationSignal::Interrupt)
    }

    /// Forward every signal into `tx` until the OS stream closes.
    ///
    /// A send with no live receivers is not an error: nobody is waiting yet.
    pub async fn run(mut self, tx: broadcast::Sender<TerminationSignal>) {
        while let Some(signal) = self.recv().await {
            info!(%signal, "Received termination signal");
            let _ = tx.send(signal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_receiver_observes_a_signal() {
        let (tx, mut first) = channel();
        let mut second = tx.subscribe();

        tx.send(TerminationSignal::Terminate).unwrap();

        assert_eq!(first.recv().await.unwrap(), TerminationSignal::Terminate);
        assert_eq!(second.recv().await.unwrap(), TerminationSignal::Terminate);
    }

    #[test]
    fn display_names_the_os_signal() {
        assert_eq!(TerminationSignal::Interrupt.to_string(), "SIGINT");
        assert_eq!(TerminationSignal::Terminate.to_string(), "SIGTERM");
    }
}
