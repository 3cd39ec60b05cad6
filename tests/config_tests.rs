use std::collections::HashMap;
use std::time::Duration;
use uslpbus::config::*;
use uslpbus::*;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let env: HashMap<String, String> = pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    move |key: &str| env.get(key).cloned()
}

#[test]
fn test_endpoints_with_defaults() {
    let config = BridgeConfig::from_lookup(lookup(&[
        (BPCS_ENDPOINT_ENV, "tcp://broker:5001"),
        (BSCP_ENDPOINT_ENV, "tcp://broker:5002"),
    ]))
    .unwrap();

    assert_eq!(config.bpcs_endpoint, "tcp://broker:5001");
    assert_eq!(config.bscp_endpoint, "tcp://broker:5002");
    assert_eq!(config.poll_period, Duration::from_millis(1000));
    assert_eq!(config.frame_timeout, Duration::from_millis(10_000));
}

#[test]
fn test_missing_endpoint_is_fatal() {
    let result = BridgeConfig::from_lookup(lookup(&[(BSCP_ENDPOINT_ENV, "tcp://broker:5002")]));
    assert_eq!(
        result,
        Err(ConfigError::MissingEndpoint { what: "bpcs", key: BPCS_ENDPOINT_ENV })
    );

    // Empty counts as missing
    let result = BridgeConfig::from_lookup(lookup(&[
        (BPCS_ENDPOINT_ENV, "tcp://broker:5001"),
        (BSCP_ENDPOINT_ENV, ""),
    ]));
    assert_eq!(
        result,
        Err(ConfigError::MissingEndpoint { what: "bscp", key: BSCP_ENDPOINT_ENV })
    );
}

#[test]
fn test_timing_overrides() {
    let config = BridgeConfig::from_lookup(lookup(&[
        (BPCS_ENDPOINT_ENV, "ipc:///tmp/bpcs"),
        (BSCP_ENDPOINT_ENV, "ipc:///tmp/bscp"),
        (POLL_PERIOD_ENV, "250"),
        (FRAME_TIMEOUT_ENV, "3000"),
    ]))
    .unwrap();

    assert_eq!(config.poll_period, Duration::from_millis(250));
    assert_eq!(config.frame_timeout, Duration::from_secs(3));
}

#[test]
fn test_bad_duration_is_fatal() {
    let result = BridgeConfig::from_lookup(lookup(&[
        (BPCS_ENDPOINT_ENV, "tcp://broker:5001"),
        (BSCP_ENDPOINT_ENV, "tcp://broker:5002"),
        (FRAME_TIMEOUT_ENV, "ten seconds"),
    ]));

    match result {
        Err(ConfigError::InvalidDuration { key, value }) => {
            assert_eq!(key, FRAME_TIMEOUT_ENV);
            assert_eq!(value, "ten seconds");
        }
        other => panic!("Expected invalid duration, got {:?}", other),
    }
}
