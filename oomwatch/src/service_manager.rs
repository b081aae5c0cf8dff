use crate::{
    config::AppConfig,
    event_bus::ProbeEvent,
    subscriber::{oom_reporter::OomReporter, Subscriber},
};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Owns the long-lived consumers of the event bus.
pub struct ServiceManager;

impl ServiceManager {
    pub fn spawn_persistent_services(
        event_sender: &broadcast::Sender<ProbeEvent>,
        config: &Arc<RwLock<AppConfig>>,
    ) -> JoinHandle<()> {
        Self::spawn_oom_reporter(event_sender, config)
    }

    /// The task ends once every sender has been dropped and the backlog is
    /// consumed.
    fn spawn_oom_reporter(
        event_sender: &broadcast::Sender<ProbeEvent>,
        config: &Arc<RwLock<AppConfig>>,
    ) -> JoinHandle<()> {
        let reporter_receiver = event_sender.subscribe();
        let reporter_config = Arc::clone(config);

        tokio::spawn(async move {
            let mut reporter = OomReporter::new(reporter_receiver, reporter_config);
            info!("ServiceManager: OomReporter service started.");
            loop {
                match reporter.event_rx.recv().await {
                    Ok(event) => {
                        reporter.handle_event(event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(
                            "ServiceManager: OomReporter lagged, missed {} messages",
                            n
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        error!("ServiceManager: OomReporter event channel closed, exiting.");
                        break;
                    }
                }
            }
        })
    }
}
