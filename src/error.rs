//! Error types and result handling for kafka-runtime.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use kafka_runtime::{Error, Result};
//!
//! fn check_topics(topics: &[String]) -> Result<()> {
//!     if topics.is_empty() {
//!         return Err(Error::Config("topic list is empty".to_string()));
//!     }
//!     Ok(())
//! }
//!
//! match check_topics(&[]) {
//!     Ok(()) => println!("Valid"),
//!     Err(Error::Config(msg)) => eprintln!("Configuration error: {}", msg),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for kafka-runtime operations.
///
/// The consumer engine recovers from per-record failures
/// ([`Error::Serialization`], [`Error::Processing`]) by logging them and
/// committing the record's offset anyway; the producer propagates every
/// failure to its caller.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration detected at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kafka client, transport, or protocol error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// JSON (de)serialization error for message payloads.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The message handler reported a failure.
    #[error("Processing error: {0}")]
    Processing(anyhow::Error),

    /// The engine is not in a state that allows the requested operation.
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),
}

/// A convenient Result type alias for kafka-runtime operations.
///
/// This is equivalent to `std::result::Result<T, kafka_runtime::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
