use crate::{
    collector::{oom_table::OomTableCollector, Collector},
    config::AppConfig,
    config_manager::ConfigManager,
    event_bus,
    probe::OomProbe,
    service_manager::ServiceManager,
    signal_handler::{SignalEvent, SignalHandler},
};
use anyhow::Result;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::{path::PathBuf, sync::Arc};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub fn async_runtime(app_config: Arc<RwLock<AppConfig>>, config_path: PathBuf) {
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("oomwatch")
        .build()
    {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Async runtime: Error from {}", e);
            std::process::exit(1);
        }
    };

    let outcome = rt.block_on(daemon_core_logic(app_config, config_path));
    if let Err(e) = outcome {
        error!("Core logic error: {:#}", e);
        std::process::exit(1);
    }
}

async fn daemon_core_logic(config: Arc<RwLock<AppConfig>>, config_path: PathBuf) -> Result<()> {
    info!("Application Core Logic: Starting up and initializing components...");

    let event_sender = event_bus::create_event_sender();
    let mut signals = SignalHandler::new()?;

    let reporter = ServiceManager::spawn_persistent_services(&event_sender, &config);
    info!("Application Core Logic: Persistent services started.");

    let offsets = config.read().await.offsets.to_probe_offsets();
    let mut probe = OomProbe::load(&offsets)?;
    let config_manager = ConfigManager::new(Arc::clone(&config), config_path, offsets);
    let table = probe.take_table()?;

    let collector = OomTableCollector::new(table, Arc::clone(&config), event_sender.clone());
    let collector_shutdown = collector.shutdown_handle();
    info!("Application Core Logic: Starting {}.", collector.name());
    let collector_task = tokio::spawn(collector.run());

    loop {
        match signals.next().await {
            SignalEvent::ConfigReload => match config_manager.reload_config().await {
                Ok(outcome) if outcome.offsets_changed => {
                    warn!("Core Logic: Structure offsets changed; restart oomwatch to apply them.");
                }
                Ok(_) => {}
                Err(e) => error!("Core Logic: Failed to reload config: {}", e),
            },
            SignalEvent::Shutdown => {
                info!("Core Logic: Initiating graceful shutdown...");
                break;
            }
        }
    }

    collector_shutdown.store(true, Ordering::SeqCst);
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, collector_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Core Logic: Collector task failed: {}", e),
        Err(_) => warn!("Core Logic: Collector did not stop within {:?}", SHUTDOWN_TIMEOUT),
    }
    // detach before the last reports are flushed
    drop(probe);

    // the reporter exits once the channel is closed and drained
    drop(event_sender);
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, reporter).await.is_err() {
        warn!("Core Logic: Reporter did not drain within {:?}", SHUTDOWN_TIMEOUT);
    }

    info!("Application Core Logic: Shutdown completed.");
    Ok(())
}
