//! Kafka producer with lazy client construction.
//!
//! The underlying client is built on the first `produce` call, so broker
//! configuration problems surface there rather than at construction. On
//! drop, pending sends are flushed with a bounded timeout, but only if
//! the client was ever realized.

use crate::codec::{JsonCodec, RawCodec, Serializer};
use crate::config::ProducerConfig;
use crate::message::TopicPartitionOffset;
use crate::{Error, Result};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};
use rdkafka::util::Timeout;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

/// Serializes values with `S` and sends them to a topic.
///
/// Unlike the consumer engine, every failure here is propagated to the
/// caller: the business logic issuing a produce must see it fail.
pub struct Producer<S> {
    config: ProducerConfig,
    serializer: S,
    client: OnceCell<FutureProducer>,
}

impl<S> Producer<S> {
    pub fn new(config: ProducerConfig, serializer: S) -> Self {
        Self {
            config,
            serializer,
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&FutureProducer> {
        self.client
            .get_or_try_init(|| async move {
                let producer: FutureProducer = self.config.to_client_config().create()?;
                info!(brokers = ?self.config.brokers, "producer started");
                Ok(producer)
            })
            .await
    }

    /// Serializes `value` and sends it to `topic`, returning the offset
    /// assigned by the broker once the delivery is acknowledged.
    pub async fn produce<T>(
        &self,
        key: &str,
        value: &T,
        topic: &str,
    ) -> Result<TopicPartitionOffset>
    where
        S: Serializer<T>,
    {
        let serialized = match self.serializer.serialize(value) {
            Ok(serialized) => serialized,
            Err(e) => {
                error!(key, topic, error = %e, "delivery failed: could not serialize value");
                return Err(e);
            }
        };

        let record = FutureRecord::to(topic).key(key).payload(&serialized);

        match self.client().await?.send(record, Timeout::Never).await {
            Ok((partition, raw_offset)) => {
                let offset = TopicPartitionOffset::new(topic, partition, raw_offset);
                debug!(key, value = %serialized, offset = %offset, "message delivered");
                Ok(offset)
            }
            Err((e, _record)) => {
                error!(key, value = %serialized, topic, reason = %e, "delivery failed");
                Err(Error::Kafka(e))
            }
        }
    }
}

impl Producer<JsonCodec> {
    /// A producer that serializes any serde-compatible value to JSON.
    pub fn json(config: ProducerConfig) -> Self {
        Self::new(config, JsonCodec)
    }
}

impl Producer<RawCodec> {
    /// A producer that sends string payloads as-is.
    pub fn raw(config: ProducerConfig) -> Self {
        Self::new(config, RawCodec)
    }
}

impl<S> Drop for Producer<S> {
    fn drop(&mut self) {
        // Flush only if the client was ever realized; an unused producer
        // must not touch the network on teardown.
        if let Some(client) = self.client.get() {
            if let Err(e) = client.flush(Timeout::After(self.config.flush_timeout())) {
                warn!(error = %e, "failed to flush producer during teardown");
            }
        }
    }
}
