use anyhow::Result;
use tokio::signal::unix::{self, Signal, SignalKind};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// SIGHUP
    ConfigReload,
    /// SIGTERM or SIGINT
    Shutdown,
}

/// Signal streams registered once and polled from the main loop.
pub struct SignalHandler {
    hangup: Signal,
    terminate: Signal,
    interrupt: Signal,
}

impl SignalHandler {
    pub fn new() -> Result<Self> {
        Ok(Self {
            hangup: unix::signal(SignalKind::hangup())?,
            terminate: unix::signal(SignalKind::terminate())?,
            interrupt: unix::signal(SignalKind::interrupt())?,
        })
    }

    pub async fn next(&mut self) -> SignalEvent {
        tokio::select! {
            _ = self.hangup.recv() => {
                info!("SignalHandler: SIGHUP received, reloading configuration.");
                SignalEvent::ConfigReload
            }
            _ = self.terminate.recv() => {
                info!("SignalHandler: SIGTERM received, shutting down.");
                SignalEvent::Shutdown
            }
            _ = self.interrupt.recv() => {
                info!("SignalHandler: SIGINT received, shutting down.");
                SignalEvent::Shutdown
            }
        }
    }
}
