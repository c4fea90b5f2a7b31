use rdkafka::ClientConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{Error, Result};

/// Settings for the consumer engine: broker connection, group identity,
/// offset-reset policy, and the topic set to subscribe to.
///
/// The topic list must be non-empty when the engine starts. Offsets are
/// always committed manually by the engine, so `enable.auto.commit` is
/// forced off regardless of configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsumerConfig {
    pub brokers: Vec<String>,
    pub group_id: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub auto_offset_reset: AutoOffsetReset,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u32,
    /// Upper bound on how long `stop` waits for the poll loop to wind
    /// down. `None` waits indefinitely.
    #[serde(default)]
    pub stop_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AutoOffsetReset {
    Earliest,
    #[default]
    Latest,
}

impl AutoOffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoOffsetReset::Earliest => "earliest",
            AutoOffsetReset::Latest => "latest",
        }
    }
}

impl ConsumerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("KAFKA_CONSUMER")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))
    }

    pub fn to_client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", self.brokers.join(","))
            .set("group.id", &self.group_id)
            .set("auto.offset.reset", self.auto_offset_reset.as_str())
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", self.session_timeout_ms.to_string())
            .set(
                "heartbeat.interval.ms",
                self.heartbeat_interval_ms.to_string(),
            );
        client_config
    }

    pub fn stop_timeout(&self) -> Option<Duration> {
        self.stop_timeout_secs.map(Duration::from_secs)
    }
}

/// Settings for the producing side. Immutable once the lazy client is
/// realized on the first produce call.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProducerConfig {
    pub brokers: Vec<String>,
    #[serde(default = "default_acks")]
    pub acks: String,
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u32,
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u32,
    /// Bound on the flush performed when the producer is dropped.
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
}

impl ProducerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("KAFKA_PRODUCER")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))
    }

    pub fn to_client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", self.brokers.join(","))
            .set("acks", &self.acks)
            .set("compression.type", &self.compression)
            .set("linger.ms", self.linger_ms.to_string())
            .set("message.timeout.ms", self.message_timeout_ms.to_string());
        client_config
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

fn default_session_timeout_ms() -> u32 {
    30_000
}

fn default_heartbeat_interval_ms() -> u32 {
    10_000
}

fn default_acks() -> String {
    "all".to_string()
}

fn default_compression() -> String {
    "snappy".to_string()
}

fn default_linger_ms() -> u32 {
    100
}

fn default_message_timeout_ms() -> u32 {
    30_000
}

fn default_flush_timeout_ms() -> u64 {
    5_000
}
