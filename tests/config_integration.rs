use chat_sync::config::AppConfig;
use serial_test::serial;
use std::env;
use std::fs;
use std::io::Write;
use std::time::Duration;

// Variables that would otherwise leak in from the developer's shell or a
// previous test.
fn clear_env_vars() {
    unsafe {
        env::remove_var("CHAT_SERVER__PORT");
        env::remove_var("CHAT_CLIENT__BACKEND_URL");
        env::remove_var("CHAT_CLIENT__HISTORY_TIMEOUT_MS");
        env::remove_var("CONFIG_FILE");
        env::remove_var("BACKEND_URL");
        env::remove_var("HISTORY_TIMEOUT_MS");
        env::remove_var("PORT");
    }
}

// The test harness's own argv is not ours to parse.
fn load() -> Result<AppConfig, config::ConfigError> {
    AppConfig::load_from_args(["chat-sync"])
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();

    let config = load().expect("defaults should always load");
    assert_eq!(config.server.port, 3000);
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.client.backend_url, "http://127.0.0.1:3000");
    assert_eq!(config.client.history_timeout(), Duration::from_secs(5));
    assert_eq!(config.client.outbox_capacity, 256);
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    unsafe {
        env::set_var("CHAT_SERVER__PORT", "9090");
        env::set_var("CHAT_CLIENT__HISTORY_TIMEOUT_MS", "750");
    }

    let config = load().expect("Failed to load config");
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.client.history_timeout(), Duration::from_millis(750));

    clear_env_vars();
}

#[test]
#[serial]
fn test_env_backend_url_feeds_both_endpoints() {
    clear_env_vars();
    unsafe {
        env::set_var("CHAT_CLIENT__BACKEND_URL", "https://chat.internal:8443");
    }

    let config = load().expect("Failed to load config");
    assert_eq!(config.client.backend_url, "https://chat.internal:8443");
    assert_eq!(
        config.client.base_url().unwrap().as_str(),
        "https://chat.internal:8443/"
    );

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();

    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("Failed to create temp config");
    writeln!(
        file,
        "server:\n  port: 7070\nclient:\n  backend_url: https://chat.example.com/base\n"
    )
    .unwrap();

    unsafe {
        env::set_var("CONFIG_FILE", file.path());
    }

    let config = load().expect("Failed to load config from file");
    assert_eq!(config.server.port, 7070);
    assert_eq!(
        config.client.base_url().unwrap().as_str(),
        "https://chat.example.com/base"
    );

    clear_env_vars();
}

#[test]
#[serial]
fn test_cli_flags_beat_env() {
    clear_env_vars();
    unsafe {
        env::set_var("CHAT_SERVER__PORT", "9090");
    }

    let config = AppConfig::load_from_args([
        "chat-sync",
        "serve",
        "--port",
        "4242",
        "--backend-url",
        "http://relay.local:8000",
    ])
    .expect("Failed to load config");
    assert_eq!(config.server.port, 4242);
    assert_eq!(config.client.backend_url, "http://relay.local:8000");

    clear_env_vars();
}

#[test]
#[serial]
fn test_invalid_backend_url_is_rejected() {
    clear_env_vars();
    unsafe {
        env::set_var("CHAT_CLIENT__BACKEND_URL", "ftp://nope");
    }

    assert!(load().is_err());

    clear_env_vars();
}

#[test]
#[serial]
fn test_cwd_config_fallback() {
    clear_env_vars();

    let cwd_path = "config.yaml";
    fs::write(cwd_path, "server:\n  port: 6060\n").expect("Failed to write ./config.yaml");

    let config = load();

    // Clean up before asserting so a failure doesn't leave the file behind.
    fs::remove_file(cwd_path).unwrap();

    assert_eq!(config.expect("Failed to load config").server.port, 6060);
}
