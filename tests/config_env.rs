mod util;

use std::fs;
use std::time::Duration;

use search_sync::config::{Config, ConfigError};
use serial_test::serial;
use util::EnvGuard;

fn clear_env() -> Vec<EnvGuard> {
    [
        "SEARCH_SYNC_CONFIG",
        "SEARCH_SYNC_HOSTS",
        "SEARCH_SYNC_TIMEOUT",
        "SEARCH_SYNC_ENV",
        "SEARCH_SYNC_DB",
    ]
    .into_iter()
    .map(EnvGuard::unset)
    .collect()
}

#[test]
#[serial]
fn environment_overrides_file_values() {
    let _clean = clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("search-sync.toml");
    fs::write(
        &path,
        "environment = \"staging\"\n[backend]\nhosts = [\"http://file:9200\"]\ntimeout_secs = 9\n",
    )
    .unwrap();

    let _hosts = EnvGuard::set("SEARCH_SYNC_HOSTS", "http://a:9200, http://b:9200");
    let _timeout = EnvGuard::set("SEARCH_SYNC_TIMEOUT", "4");
    let _env = EnvGuard::set("SEARCH_SYNC_ENV", "production");
    let _db = EnvGuard::set("SEARCH_SYNC_DB", "/tmp/app.db");

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.backend.hosts, vec!["http://a:9200", "http://b:9200"]);
    assert_eq!(config.backend.probe_timeout(), Duration::from_secs(4));
    assert!(config.is_production());
    assert_eq!(config.database_path().unwrap(), std::path::PathBuf::from("/tmp/app.db"));
}

#[test]
#[serial]
fn config_path_can_come_from_the_environment() {
    let _clean = clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom.toml");
    fs::write(&path, "[[pipeline]]\nid = \"strip\"\n").unwrap();
    let _config = EnvGuard::set("SEARCH_SYNC_CONFIG", path.to_string_lossy());

    let config = Config::load(None).unwrap();
    assert_eq!(config.pipelines[0].id, "strip");
    assert_eq!(config.registry().pipeline_ids(), vec!["strip"]);
}

#[test]
#[serial]
fn invalid_timeout_is_rejected() {
    let _clean = clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("search-sync.toml");
    fs::write(&path, "").unwrap();
    let _timeout = EnvGuard::set("SEARCH_SYNC_TIMEOUT", "soon");
    let err = Config::load(Some(&path)).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Invalid {
            key: "SEARCH_SYNC_TIMEOUT",
            ..
        }
    ));
}

#[test]
#[serial]
fn missing_explicit_file_is_an_error() {
    let _clean = clear_env();
    let err = Config::load(Some(std::path::Path::new("/nonexistent/search-sync.toml"))).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}
