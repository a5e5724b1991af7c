//! Coverage for config parsing, env overrides and path resolution.

use std::collections::HashMap;
use std::time::Duration;

use hostpatch::config::{config_path_with, load_config, Config, CONFIG_PATH_ENV};
use hostpatch::gate::FeatureId;

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn defaults_enable_every_feature() {
    let config = Config::default();
    for feature in FeatureId::ALL {
        assert!(config.features.get(feature), "{feature} should default on");
    }
    assert_eq!(config.remote.timeout(), Duration::from_secs(5));
    assert_eq!(config.reconciler.settle_delay(), Duration::from_millis(500));
    assert_eq!(config.logging.level, "info");
}

#[test]
fn parse_uses_stable_feature_ids() {
    let toml_str = r#"
[features]
AutoPause = false
TerrainLeak = true

[remote]
url = "https://example.com/hostpatch.json"
timeout_ms = 2000

[reconciler]
settle_delay_ms = 250
"#;
    let config = Config::from_toml(toml_str).expect("config should parse");
    assert!(!config.features.get(FeatureId::AutoPause));
    assert!(config.features.get(FeatureId::SpawnBlocker));
    assert!(config.features.get(FeatureId::TerrainLeak));
    assert_eq!(config.remote.timeout(), Duration::from_secs(2));
    assert_eq!(config.reconciler.settle_delay_ms, 250);
    assert_eq!(config.remediation.bytes_per_element, 32);
}

#[test]
fn invalid_toml_is_an_error() {
    assert!(Config::from_toml("[features\nAutoPause = ").is_err());
    assert!(Config::from_toml("[features]\nAutoPause = \"yes\"").is_err());
}

#[test]
fn load_missing_file_yields_defaults() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let config = load_config(&tmp.path().join("absent.toml")).expect("missing file is fine");
    assert_eq!(config, Config::default());
}

#[test]
fn load_reads_file_from_disk() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("config.toml");
    std::fs::write(&path, "[features]\nSpawnBlocker = false\n").expect("should write config");

    let config = load_config(&path).expect("should load");
    assert!(!config.features.spawn_blocker);
    assert!(config.features.auto_pause);
}

#[test]
fn load_reports_parse_errors_with_path() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("broken.toml");
    std::fs::write(&path, "not = [valid").expect("should write config");

    let err = load_config(&path).expect_err("broken config should not load");
    assert!(err.to_string().contains("broken.toml"));
}

#[test]
fn env_overrides_take_precedence() {
    let mut config = Config::default();
    config.apply_overrides(env_from(&[
        ("HOSTPATCH_REMOTE_URL", "https://override.example/doc.json"),
        ("HOSTPATCH_KILLSWITCH", "false"),
        ("HOSTPATCH_LOG_LEVEL", "debug"),
    ]));
    assert_eq!(config.remote.url, "https://override.example/doc.json");
    assert!(!config.remote.killswitch_enabled);
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn invalid_killswitch_override_is_ignored() {
    let mut config = Config::default();
    config.apply_overrides(env_from(&[("HOSTPATCH_KILLSWITCH", "maybe")]));
    assert!(config.remote.killswitch_enabled);
}

#[test]
fn remote_url_requires_killswitch_and_http() {
    let mut config = Config::default();
    assert!(config.remote_url().is_none(), "empty url skips the fetch");

    config.remote.url = "https://example.com/doc.json".to_owned();
    assert!(config.remote_url().is_some());

    config.remote.url = "ftp://example.com/doc.json".to_owned();
    assert!(config.remote_url().is_none());

    config.remote.url = "not a url".to_owned();
    assert!(config.remote_url().is_none());

    config.remote.url = "http://127.0.0.1:9/doc.json".to_owned();
    config.remote.killswitch_enabled = false;
    assert!(config.remote_url().is_none());
}

#[test]
fn serialised_default_parses_back() {
    let text = Config::default().to_toml().expect("should serialise");
    assert!(text.contains("AutoPause"));
    let parsed = Config::from_toml(&text).expect("should parse back");
    assert_eq!(parsed, Config::default());
}

#[test]
fn config_path_env_wins() {
    let path = config_path_with(env_from(&[(CONFIG_PATH_ENV, "/srv/game/hostpatch.toml")]))
        .expect("should resolve");
    assert_eq!(path, std::path::PathBuf::from("/srv/game/hostpatch.toml"));
}
