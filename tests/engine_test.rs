//! Lifecycle tests for the consumer engine.
//!
//! These run without a broker: building the client does not connect, so
//! start/stop semantics and the shutdown handshake are fully observable
//! with an unreachable broker address.

use async_trait::async_trait;
use kafka_runtime::{
    AutoOffsetReset, ConsumerConfig, ConsumerEngine, ConsumerParameters, EngineState, Error,
    MessageProcessor, TopicPartitionOffset,
};
use std::time::Duration;
use tokio::sync::watch;

struct NullProcessor {
    config: ConsumerConfig,
}

#[async_trait]
impl MessageProcessor for NullProcessor {
    type Value = serde_json::Value;

    fn build_parameters(&self) -> ConsumerParameters<serde_json::Value> {
        ConsumerParameters::json(self.config.clone())
    }

    async fn process_message(
        &self,
        _key: &str,
        _value: serde_json::Value,
        _offset: &TopicPartitionOffset,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

fn test_config(topics: Vec<String>) -> ConsumerConfig {
    ConsumerConfig {
        // Nothing listens here; these tests never need a connection
        brokers: vec!["127.0.0.1:1".to_string()],
        group_id: "engine-test".to_string(),
        topics,
        auto_offset_reset: AutoOffsetReset::Earliest,
        session_timeout_ms: 6_000,
        heartbeat_interval_ms: 2_000,
        stop_timeout_secs: Some(5),
    }
}

fn engine(topics: Vec<String>) -> ConsumerEngine<NullProcessor> {
    ConsumerEngine::new(NullProcessor {
        config: test_config(topics),
    })
}

async fn wait_for_state<P: MessageProcessor>(engine: &ConsumerEngine<P>, expected: EngineState) {
    for _ in 0..200 {
        if engine.state() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "engine did not reach {:?}; still in {:?}",
        expected,
        engine.state()
    );
}

#[tokio::test]
async fn test_start_with_empty_topics_fails() {
    let engine = engine(vec![]);
    let (_host, signal) = watch::channel(false);

    let err = engine.start(signal).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert_eq!(engine.state(), EngineState::Created);

    // No loop was launched, so stopping is immediate
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_stop_handshake() {
    let engine = engine(vec!["engine-test-topic".to_string()]);
    let (_host, signal) = watch::channel(false);

    engine.start(signal).await.unwrap();
    assert_eq!(engine.state(), EngineState::Running);

    engine.stop().await.unwrap();
    assert_eq!(engine.state(), EngineState::Stopped);
}

#[tokio::test]
async fn test_stop_before_start_returns_promptly() {
    let engine = engine(vec!["engine-test-topic".to_string()]);

    tokio::time::timeout(Duration::from_secs(1), engine.stop())
        .await
        .expect("stop must not hang without a running loop")
        .unwrap();
    assert_eq!(engine.state(), EngineState::Created);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let engine = engine(vec!["engine-test-topic".to_string()]);
    let (_host, signal) = watch::channel(false);

    engine.start(signal).await.unwrap();
    engine.stop().await.unwrap();
    engine.stop().await.unwrap();
    assert_eq!(engine.state(), EngineState::Stopped);
}

#[tokio::test]
async fn test_start_twice_is_a_lifecycle_error() {
    let engine = engine(vec!["engine-test-topic".to_string()]);
    let (_host, signal) = watch::channel(false);

    engine.start(signal.clone()).await.unwrap();
    let err = engine.start(signal).await.unwrap_err();
    assert!(matches!(err, Error::Lifecycle(_)));

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_after_stop_is_a_lifecycle_error() {
    let engine = engine(vec!["engine-test-topic".to_string()]);
    let (_host, signal) = watch::channel(false);

    engine.start(signal.clone()).await.unwrap();
    engine.stop().await.unwrap();

    let err = engine.start(signal).await.unwrap_err();
    assert!(matches!(err, Error::Lifecycle(_)));
}

#[tokio::test]
async fn test_host_cancellation_drains_the_loop() {
    let engine = engine(vec!["engine-test-topic".to_string()]);
    let (host, signal) = watch::channel(false);

    engine.start(signal).await.unwrap();
    assert_eq!(engine.state(), EngineState::Running);

    host.send(true).unwrap();
    wait_for_state(&engine, EngineState::Stopped).await;

    // A follow-up stop still completes cleanly
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_dropped_host_signal_counts_as_cancellation() {
    let engine = engine(vec!["engine-test-topic".to_string()]);
    let (host, signal) = watch::channel(false);

    engine.start(signal).await.unwrap();
    drop(host);

    wait_for_state(&engine, EngineState::Stopped).await;
}
