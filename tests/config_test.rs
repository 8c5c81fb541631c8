use std::sync::Arc;
use std::time::Duration;

use queue_bus::{
    BackoffPolicy, BackoffStrategy, ConfigError, ConsumerPoolConfig, ExponentialBackoff,
    FixedBackoff, HandlerOptions, MAX_BATCH_SIZE, WORKERS_PER_CORE,
};

#[test]
fn test_default_config_is_valid() {
    let config = ConsumerPoolConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.batch_size, MAX_BATCH_SIZE);
    assert_eq!(config.default_visibility_timeout, Duration::from_secs(30));
    assert_eq!(config.max_retries, 5);
}

#[test]
fn test_effective_worker_count() {
    let explicit = ConsumerPoolConfig::default().with_worker_count(3);
    assert_eq!(explicit.effective_worker_count(), 3);

    let derived = ConsumerPoolConfig {
        max_in_flight: 1_000_000,
        ..Default::default()
    };
    assert_eq!(derived.effective_worker_count() % WORKERS_PER_CORE, 0);

    let capped = ConsumerPoolConfig {
        max_in_flight: 2,
        ..Default::default()
    };
    assert_eq!(capped.effective_worker_count(), 2);
}

#[test]
fn test_invalid_values_are_rejected() {
    let cases = [
        (ConsumerPoolConfig::default().with_worker_count(0), "worker_count"),
        (ConsumerPoolConfig::default().with_batch_size(0), "batch_size"),
        (ConsumerPoolConfig::default().with_batch_size(MAX_BATCH_SIZE + 1), "batch_size"),
        (ConsumerPoolConfig::default().with_buffer_capacity(0), "buffer_capacity"),
        (ConsumerPoolConfig::default().with_multiplexer_capacity(0), "multiplexer_capacity"),
    ];

    for (config, expected) in cases {
        match config.validate() {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected),
            other => panic!("expected {} to be rejected, got {:?}", expected, other),
        }
    }
}

#[test]
fn test_config_from_json_fills_defaults() {
    let config = ConsumerPoolConfig::from_json_str(
        r#"{"batch_size": 5, "worker_count": 4, "poll_wait": {"secs": 1, "nanos": 0}}"#,
    )
    .unwrap();

    assert_eq!(config.batch_size, 5);
    assert_eq!(config.worker_count, Some(4));
    assert_eq!(config.poll_wait, Duration::from_secs(1));
    assert_eq!(config.buffer_capacity, ConsumerPoolConfig::default().buffer_capacity);
}

#[test]
fn test_config_from_json_errors() {
    assert!(matches!(
        ConsumerPoolConfig::from_json_str("{not json"),
        Err(ConfigError::Parse(_))
    ));
    assert!(matches!(
        ConsumerPoolConfig::from_json_str(r#"{"batch_size": 50}"#),
        Err(ConfigError::Invalid { field: "batch_size", .. })
    ));
}

#[test]
fn test_handler_options() {
    assert!(HandlerOptions::new().exactly_once.is_none());

    let options = HandlerOptions::new().exactly_once(Some(Duration::from_secs(5)));
    let exactly_once = options.exactly_once.unwrap();
    assert_eq!(exactly_once.timeout, Some(Duration::from_secs(5)));
}

#[test]
fn test_fixed_backoff() {
    let backoff = FixedBackoff::new(Duration::from_secs(30));
    assert_eq!(backoff.backoff(1), Duration::from_secs(30));
    assert_eq!(backoff.backoff(10), Duration::from_secs(30));
}

#[test]
fn test_exponential_backoff_grows_and_caps() {
    let backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(10));

    assert_eq!(backoff.backoff(1), Duration::from_secs(1));
    assert_eq!(backoff.backoff(2), Duration::from_secs(2));
    assert_eq!(backoff.backoff(3), Duration::from_secs(4));
    assert_eq!(backoff.backoff(5), Duration::from_secs(10));
    assert_eq!(backoff.backoff(64), Duration::from_secs(10));
}

#[test]
fn test_exponential_backoff_jitter_stays_in_range() {
    let backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(10))
        .with_jitter(Duration::from_millis(500));

    for _ in 0..100 {
        let delay = backoff.backoff(2);
        assert!(delay >= Duration::from_secs(2));
        assert!(delay <= Duration::from_millis(2500));
    }
}

#[test]
fn test_backoff_policy_exhausts_retries() {
    let policy = BackoffPolicy::fixed(Duration::from_secs(30), 3);

    let first = policy.decide(1);
    assert!(first.retry_locally);
    assert_eq!(first.next_visibility_timeout, Duration::from_secs(30));

    assert!(policy.decide(2).retry_locally);
    assert!(!policy.decide(3).retry_locally);
    assert!(!policy.decide(4).retry_locally);

    // A missing receive count is treated as the first attempt.
    assert!(policy.decide(0).retry_locally);
}

#[test]
fn test_backoff_policy_uses_strategy() {
    let strategy: Arc<dyn BackoffStrategy> =
        Arc::new(ExponentialBackoff::new(Duration::from_secs(2), Duration::from_secs(60)));
    let policy = BackoffPolicy::new(strategy, 10);

    assert_eq!(policy.decide(1).next_visibility_timeout, Duration::from_secs(2));
    assert_eq!(policy.decide(4).next_visibility_timeout, Duration::from_secs(16));
}
