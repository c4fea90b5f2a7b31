pub mod codec;
pub mod config;
pub mod consumer;
pub mod error;
pub mod message;
pub mod producer;

pub use codec::{Deserializer, JsonCodec, RawCodec, Serializer};
pub use config::{AutoOffsetReset, ConsumerConfig, ProducerConfig};
pub use consumer::{ConsumerEngine, ConsumerParameters, EngineState, MessageProcessor};
pub use error::{Error, Result};
pub use message::TopicPartitionOffset;
pub use producer::Producer;
