// Tests for configuration loading, overrides and persistence.
//
// Only one test in this binary touches process environment variables, so
// they cannot leak between parallel tests.

use std::collections::HashMap;
use std::time::Duration;

use fbns_push::Config;
use tempfile::TempDir;

#[test]
fn test_defaults_match_service_values() {
    let session = Config::default().session_config();
    assert_eq!(session.broker_host, "mqtt-mini.facebook.com");
    assert_eq!(session.broker_port, 443);
    assert_eq!(session.keep_alive_secs, 900);
    assert_eq!(session.reconnect_delay, Duration::from_secs(3));
    assert_eq!(session.handoff_grace, Duration::from_secs(2));
    assert_eq!(session.registration_retries, 1);
    assert_eq!(session.ping_interval(), Duration::from_secs(840));
    assert_eq!(session.token_max_age, Duration::from_secs(86_400));
}

#[test]
fn test_overrides_from_lookup() {
    let vars: HashMap<&str, &str> = [
        ("FBNS_BROKER_HOST", "broker.test"),
        ("FBNS_BROKER_PORT", "8883"),
        ("FBNS_KEEP_ALIVE", "not-a-number"),
        ("FBNS_USER_ID", "42"),
        ("FBNS_COOKIE", "sessionid=x"),
    ]
    .into_iter()
    .collect();

    let mut config = Config::default();
    config.apply_overrides(|key| vars.get(key).map(ToString::to_string));

    assert_eq!(config.broker_host, "broker.test");
    assert_eq!(config.broker_port, 8883);
    assert_eq!(config.keep_alive_secs, 900);
    assert_eq!(config.user_id, Some(42));
    assert_eq!(config.account_session().cookie.as_deref(), Some("sessionid=x"));
}

#[test]
fn test_save_and_load_in_config_dir() {
    let dir = TempDir::new().expect("tempdir");
    std::env::set_var("FBNS_CONFIG_DIR", dir.path());
    std::env::set_var("FBNS_COOKIE", "sessionid=secret");

    let mut config = Config::load().expect("load");
    let (device, generated) = config.ensure_device();
    assert!(generated);
    config.registration_retries = 4;
    config.save().expect("save");

    let written = std::fs::read_to_string(dir.path().join("config.json")).expect("read");
    assert!(!written.contains("sessionid=secret"));

    let mut reloaded = Config::load().expect("reload");
    assert_eq!(reloaded.registration_retries, 4);
    let (same_device, generated) = reloaded.ensure_device();
    assert!(!generated);
    assert_eq!(same_device, device);

    let store = reloaded.connection_store().expect("store");
    assert_eq!(store.path(), dir.path().join("connection.json"));

    std::env::remove_var("FBNS_CONFIG_DIR");
    std::env::remove_var("FBNS_COOKIE");
}
