//! The configuration files shipped in `config/outreach` load and validate.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use outreach_core::config::ConfigManager;

fn shipped_config_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("config/outreach")
}

#[test]
fn test_shipped_environments_load() {
    let test = ConfigManager::load_from_directory_with_env(Some(shipped_config_dir()), "test")
        .unwrap();
    assert_eq!(test.config().workers.webhook_concurrency, 4);
    assert_eq!(test.config().queues.poll_interval_ms, 10);
    assert_eq!(test.config().healing.max_step_rewinds, 5);

    let production =
        ConfigManager::load_from_directory_with_env(Some(shipped_config_dir()), "production")
            .unwrap();
    assert_eq!(production.config().database.max_connections, 25);
    assert_eq!(production.config().events.broadcast_capacity, 5000);
    assert_eq!(production.config().queues.webhook_events, "outreach_webhook_events");
}

#[test]
fn test_copied_config_with_local_overlay() {
    let dir = TempDir::new().unwrap();
    for file in ["base.toml", "test.toml"] {
        fs::copy(shipped_config_dir().join(file), dir.path().join(file)).unwrap();
    }
    fs::write(
        dir.path().join("staging.toml"),
        "[healing]\nmax_step_rewinds = 2\n\n[capacity]\ncache_max_capacity = 50\n",
    )
    .unwrap();

    let staging =
        ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "staging")
            .unwrap();
    assert_eq!(staging.config().healing.max_step_rewinds, 2);
    assert_eq!(staging.config().capacity.cache_max_capacity, 50);
    // test.toml is not applied to other environments
    assert_eq!(staging.config().workers.webhook_concurrency, 10);
    assert_eq!(staging.config_directory(), dir.path());
}

#[test]
fn test_empty_queue_name_is_rejected() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("base.toml"), "[queues]\nwebhook_events = \"\"\n").unwrap();

    assert!(
        ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
            .is_err()
    );
}
