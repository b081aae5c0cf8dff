use oomwatch::config::AppConfig;
use oomwatch::config_manager::ConfigManager;
use oomwatch::event_bus::{self, ProbeEvent};
use oomwatch::report::OomReport;
use oomwatch::service_manager::ServiceManager;
use oomwatch_common::OomEvent;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout, Duration};

fn write_config(config_path: &Path, report_path: &Path, chosen: u32) -> anyhow::Result<()> {
    let yaml = format!(
        r#"
log_directory: "/tmp/oomwatch-tests/logs"
collector:
  poll_interval_ms: 100
report:
  path: "{}"
offsets:
  oom_control_chosen: {}
"#,
        report_path.display(),
        chosen
    );
    std::fs::write(config_path, yaml)?;
    Ok(())
}

fn capture(pid: u32) -> ProbeEvent {
    let mut event = OomEvent::EMPTY;
    event.pid = pid;
    event.comm[..3].copy_from_slice(b"app");
    ProbeEvent::OomCaptured(OomReport::from_entry(pid, &event, chrono::Utc::now()))
}

async fn wait_for_file(path: &Path) -> bool {
    for _ in 0..50 {
        if path.exists() {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn report_path_follows_reload() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let base_path = temp_dir.path();
    let config_path = base_path.join("oomwatch.yaml");
    let before = base_path.join("before.yaml");
    let after = base_path.join("after.yaml");

    write_config(&config_path, &before, 40)?;
    let shared = Arc::new(RwLock::new(AppConfig::load_from_file(&config_path).unwrap()));
    let sender = event_bus::create_event_sender();
    let reporter = ServiceManager::spawn_persistent_services(&sender, &shared);
    let loaded = shared.read().await.offsets.to_probe_offsets();
    let manager = ConfigManager::new(Arc::clone(&shared), config_path.clone(), loaded);

    sender.send(capture(100))?;
    assert!(wait_for_file(&before).await, "first report never written");

    write_config(&config_path, &after, 40)?;
    let outcome = manager.reload_config().await?;
    assert!(!outcome.offsets_changed);

    sender.send(capture(200))?;
    assert!(wait_for_file(&after).await, "report did not move after reload");

    let first = std::fs::read_to_string(&before)?;
    let second = std::fs::read_to_string(&after)?;
    assert!(first.contains("pid: 100") && !first.contains("pid: 200"));
    assert!(second.contains("pid: 200"));

    drop(sender);
    timeout(Duration::from_secs(2), reporter).await??;
    Ok(())
}

#[tokio::test]
async fn offset_changes_are_flagged_against_the_attached_offsets() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("oomwatch.yaml");
    let report_path = temp_dir.path().join("r.yaml");

    write_config(&config_path, &report_path, 40)?;
    let shared = Arc::new(RwLock::new(AppConfig::load_from_file(&config_path).unwrap()));
    let loaded = shared.read().await.offsets.to_probe_offsets();
    let manager = ConfigManager::new(Arc::clone(&shared), config_path.clone(), loaded);

    write_config(&config_path, &report_path, 48)?;
    assert!(manager.reload_config().await?.offsets_changed);
    assert_eq!(
        shared.read().await.offsets.to_probe_offsets().oom_control_chosen,
        48
    );

    // still differs from what is attached on a second reload
    assert!(manager.reload_config().await?.offsets_changed);

    // back to the offsets loaded at startup
    write_config(&config_path, &report_path, 40)?;
    assert!(!manager.reload_config().await?.offsets_changed);
    Ok(())
}

#[tokio::test]
async fn broken_file_keeps_previous_config() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("oomwatch.yaml");
    let report_path = temp_dir.path().join("r.yaml");

    write_config(&config_path, &report_path, 40)?;
    let shared = Arc::new(RwLock::new(AppConfig::load_from_file(&config_path).unwrap()));
    let loaded = shared.read().await.offsets.to_probe_offsets();
    let manager = ConfigManager::new(Arc::clone(&shared), config_path.clone(), loaded);

    std::fs::write(&config_path, "collector: [not, a, map")?;
    assert!(manager.reload_config().await.is_err());
    assert_eq!(shared.read().await.report.path.as_deref(), Some(report_path.as_path()));
    assert_eq!(shared.read().await.collector.poll_interval_ms, 100);
    Ok(())
}
