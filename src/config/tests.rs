//! Config module tests

use super::*;
use std::io::Write;

#[test]
fn test_substitute_env_vars_simple() {
    std::env::set_var("MOCKPEER_TEST_VAR_SIMPLE", "hello");
    let result = substitute_env_vars("value = \"${MOCKPEER_TEST_VAR_SIMPLE}\"");
    assert_eq!(result, "value = \"hello\"");
    std::env::remove_var("MOCKPEER_TEST_VAR_SIMPLE");
}

#[test]
fn test_substitute_env_vars_with_default() {
    std::env::remove_var("MOCKPEER_TEST_VAR_UNSET");
    let result = substitute_env_vars("value = \"${MOCKPEER_TEST_VAR_UNSET:-fallback}\"");
    assert_eq!(result, "value = \"fallback\"");

    std::env::set_var("MOCKPEER_TEST_VAR_SET", "env_value");
    let result = substitute_env_vars("value = \"${MOCKPEER_TEST_VAR_SET:-fallback}\"");
    assert_eq!(result, "value = \"env_value\"");
    std::env::remove_var("MOCKPEER_TEST_VAR_SET");
}

#[test]
fn test_substitute_env_vars_missing_no_default() {
    std::env::remove_var("MOCKPEER_TEST_VAR_MISSING");
    let result = substitute_env_vars("value = \"${MOCKPEER_TEST_VAR_MISSING}\"");
    assert_eq!(result, "value = \"\"");
}

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.log.level, "info");
    assert_eq!(config.server.bind.port(), 1888);
    assert_eq!(config.server.accept_timeout, Duration::from_secs(10));
    assert_eq!(config.timing.step_timeout, Duration::from_secs(5));
    assert_eq!(config.timing.retry_interval, Duration::from_secs(3));
    assert_eq!(config.timing.terminate_grace, Duration::from_secs(5));
    assert_eq!(config.client.search_path_var, "PYTHONPATH");
    assert_eq!(config.client.search_path, "../../src");
    assert_eq!(config.limits.max_packet_size, DEFAULT_MAX_PACKET_SIZE);
    assert_eq!(config.scenario.name, Scenario::PublishQos2Timeout);
    assert_eq!(config.scenario.protocol_level, 3);
    assert!(config.validate().is_ok());
}

#[test]
fn test_default_params_match_scenario_defaults() {
    let params = Config::default().scenario.params().unwrap();
    assert_eq!(params, ScenarioParams::default());
}

#[test]
fn test_parse_full_config() {
    let config = Config::parse(
        r#"
[log]
level = "debug"

[server]
bind = "127.0.0.1:18830"
accept_timeout = "2s"

[limits]
max_packet_size = 4096

[timing]
step_timeout = "500ms"
retry_interval = "1s"
terminate_grace = "250ms"

[client]
search_path_var = "RUBYLIB"
search_path = "/opt/client/lib"

[scenario]
name = "publish-qos1-timeout"
client_id = "c1"
keep_alive = 30
protocol_level = 4
topic = "x/y"
payload = "hello"
packet_id = 7
"#,
    )
    .unwrap();

    assert_eq!(config.log.level, "debug");
    assert_eq!(config.server.bind.to_string(), "127.0.0.1:18830");
    assert_eq!(config.server.accept_timeout, Duration::from_secs(2));
    assert_eq!(config.limits.max_packet_size, 4096);
    assert_eq!(config.timing.step_timeout, Duration::from_millis(500));
    assert_eq!(config.timing.retry_interval, Duration::from_secs(1));
    assert_eq!(config.timing.terminate_grace, Duration::from_millis(250));
    assert_eq!(config.client.search_path_var, "RUBYLIB");
    assert_eq!(config.client.search_path, "/opt/client/lib");
    assert_eq!(config.scenario.name, Scenario::PublishQos1Timeout);

    let params = config.scenario.params().unwrap();
    assert_eq!(params.client_id.as_deref(), Some("c1"));
    assert_eq!(params.keep_alive, 30);
    assert_eq!(params.protocol_version, ProtocolVersion::V311);
    assert_eq!(params.topic.as_deref(), Some("x/y"));
    assert_eq!(&params.payload[..], b"hello");
    assert_eq!(params.packet_id, 7);

    let timing = config.timing.engine_timing();
    assert_eq!(timing.wait_for(crate::script::Patience::Retry), Duration::from_millis(1500));
}

#[test]
fn test_partial_config_keeps_defaults() {
    let config = Config::parse(
        r#"
[timing]
step_timeout = "1s"
"#,
    )
    .unwrap();
    assert_eq!(config.timing.step_timeout, Duration::from_secs(1));
    assert_eq!(config.timing.retry_interval, Duration::from_secs(3));
    assert_eq!(config.server.bind.port(), 1888);
}

#[test]
fn test_validation_rejects_zero_durations() {
    for (section, key) in [
        ("server", "accept_timeout"),
        ("timing", "step_timeout"),
        ("timing", "retry_interval"),
        ("timing", "terminate_grace"),
    ] {
        let toml = format!("[{}]\n{} = \"0s\"\n", section, key);
        let err = Config::parse(&toml).unwrap_err();
        assert!(
            matches!(&err, ConfigError::Validation(msg) if msg.contains(key)),
            "{}: {}",
            key,
            err
        );
    }
}

#[test]
fn test_validation_rejects_bad_search_path_var() {
    let result = Config::parse("[client]\nsearch_path_var = \"\"\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));

    let result = Config::parse("[client]\nsearch_path_var = \"A=B\"\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_validation_rejects_bad_scenario_values() {
    let result = Config::parse("[scenario]\npacket_id = 0\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));

    let result = Config::parse("[scenario]\nprotocol_level = 5\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));

    let result = Config::parse("[limits]\nmax_packet_size = 0\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_unknown_scenario_is_parse_error() {
    let result = Config::parse("[scenario]\nname = \"subscribe-qos2\"\n");
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[test]
fn test_load_config_with_env_substitution() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::env::set_var("MOCKPEER_TEST_BIND_PORT", "18831");
    write!(
        file,
        r#"
[server]
bind = "127.0.0.1:${{MOCKPEER_TEST_BIND_PORT}}"

[timing]
step_timeout = "${{MOCKPEER_TEST_STEP_UNSET:-750ms}}"
"#
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.server.bind.to_string(), "127.0.0.1:18831");
    assert_eq!(config.timing.step_timeout, Duration::from_millis(750));
    assert_eq!(config.timing.retry_interval, Duration::from_secs(3));

    std::env::remove_var("MOCKPEER_TEST_BIND_PORT");
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.log.level, "info");
    assert_eq!(config.server.bind.port(), 1888);
    assert_eq!(config.timing.step_timeout, Duration::from_secs(5));
}

#[test]
fn test_load_rejects_invalid_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[timing]\nstep_timeout = \"0s\"").unwrap();

    let result = Config::load(file.path());
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}
