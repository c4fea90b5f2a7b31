//! The consumer execution engine.
//!
//! [`ConsumerEngine`] owns a background poll loop that receives records,
//! deserializes them, dispatches them to a [`MessageProcessor`], and
//! commits each record's offset after processing. Per-record failures are
//! logged and never abort the loop; the offset is committed regardless so
//! a poison message cannot stall its partition. Offsets are only ever
//! committed manually, which gives at-least-once delivery: a record whose
//! commit fails (or that was in flight during a crash) is redelivered on
//! restart.
//!
//! Shutdown is cooperative and two-phase: the host's cancellation signal
//! and the engine's own `stop` signal both drain the loop, and `stop`
//! waits for a one-shot completion handshake before returning, so the
//! client is never torn down mid-iteration.

use crate::codec::{Deserializer, JsonCodec, RawCodec};
use crate::config::ConsumerConfig;
use crate::message::TopicPartitionOffset;
use crate::{Error, Result};
use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle of a [`ConsumerEngine`].
///
/// The broker client and subscription exist only between `Running` and
/// `Stopping`; the engine never skips unsubscription once subscribed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// The product of [`MessageProcessor::build_parameters`]: the consumer
/// config and the codec the engine runs with.
///
/// Consumer topologies are data here, not subclasses: a single-topic
/// consumer is a one-element topic list in its config, a raw consumer is
/// one built with [`ConsumerParameters::raw`].
pub struct ConsumerParameters<T> {
    config: Option<ConsumerConfig>,
    deserializer: Option<Box<dyn Deserializer<T>>>,
}

impl<T> Default for ConsumerParameters<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ConsumerParameters<T> {
    pub fn new() -> Self {
        Self {
            config: None,
            deserializer: None,
        }
    }

    pub fn config(mut self, config: ConsumerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn deserializer(mut self, deserializer: impl Deserializer<T> + 'static) -> Self {
        self.deserializer = Some(Box::new(deserializer));
        self
    }

    fn validate(self) -> Result<(ConsumerConfig, Box<dyn Deserializer<T>>)> {
        let config = self
            .config
            .ok_or_else(|| Error::Config("consumer config was not provided".to_string()))?;
        if config.brokers.is_empty() {
            return Err(Error::Config("broker list is empty".to_string()));
        }
        if config.group_id.is_empty() {
            return Err(Error::Config("consumer group id is empty".to_string()));
        }
        if config.topics.is_empty() {
            return Err(Error::Config(
                "topic list for subscription is empty".to_string(),
            ));
        }
        let deserializer = self
            .deserializer
            .ok_or_else(|| Error::Config("no deserializer was configured".to_string()))?;
        Ok((config, deserializer))
    }
}

impl<T: DeserializeOwned> ConsumerParameters<T> {
    /// Parameters for a JSON-typed consumer.
    pub fn json(config: ConsumerConfig) -> Self {
        Self::new().config(config).deserializer(JsonCodec)
    }
}

impl ConsumerParameters<String> {
    /// Parameters for a consumer that hands raw string payloads to the
    /// processor.
    pub fn raw(config: ConsumerConfig) -> Self {
        Self::new().config(config).deserializer(RawCodec)
    }
}

/// The extension point a concrete consumer implements.
///
/// `process_message` must tolerate redelivery: a record is handed to it
/// at least once, and again after a restart if its offset commit failed.
/// Errors it returns are logged with full context and do not abort the
/// poll loop.
#[async_trait]
pub trait MessageProcessor: Send + Sync + 'static {
    /// The deserialized message type.
    type Value: Send + 'static;

    /// Supplies the consumer config and codec used to build the client.
    fn build_parameters(&self) -> ConsumerParameters<Self::Value>;

    /// Handles one deserialized message.
    async fn process_message(
        &self,
        key: &str,
        value: Self::Value,
        offset: &TopicPartitionOffset,
    ) -> anyhow::Result<()>;
}

struct LoopHandle {
    stopped: oneshot::Receiver<()>,
    join: JoinHandle<()>,
    stop_timeout: Option<Duration>,
}

/// A consumer engine driving one background poll loop.
///
/// # Example
///
/// ```rust,no_run
/// use async_trait::async_trait;
/// use kafka_runtime::{
///     ConsumerConfig, ConsumerEngine, ConsumerParameters, MessageProcessor,
///     TopicPartitionOffset,
/// };
/// use serde::Deserialize;
/// use tokio::sync::watch;
///
/// #[derive(Deserialize)]
/// struct UserCommand {
///     message: String,
/// }
///
/// struct UserCommandProcessor {
///     config: ConsumerConfig,
/// }
///
/// #[async_trait]
/// impl MessageProcessor for UserCommandProcessor {
///     type Value = UserCommand;
///
///     fn build_parameters(&self) -> ConsumerParameters<UserCommand> {
///         ConsumerParameters::json(self.config.clone())
///     }
///
///     async fn process_message(
///         &self,
///         key: &str,
///         value: UserCommand,
///         offset: &TopicPartitionOffset,
///     ) -> anyhow::Result<()> {
///         println!("{key} at {offset}: {}", value.message);
///         Ok(())
///     }
/// }
///
/// # async fn run(config: ConsumerConfig) -> kafka_runtime::Result<()> {
/// let (_host_stop, host_signal) = watch::channel(false);
/// let engine = ConsumerEngine::new(UserCommandProcessor { config });
/// engine.start(host_signal).await?;
/// // ... later
/// engine.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct ConsumerEngine<P: MessageProcessor> {
    processor: Arc<P>,
    state: Arc<Mutex<EngineState>>,
    stop_tx: watch::Sender<bool>,
    loop_handle: Mutex<Option<LoopHandle>>,
}

impl<P: MessageProcessor> ConsumerEngine<P> {
    pub fn new(processor: P) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            processor: Arc::new(processor),
            state: Arc::new(Mutex::new(EngineState::Created)),
            stop_tx,
            loop_handle: Mutex::new(None),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock().unwrap()
    }

    /// Validates the processor's parameters, builds the broker client, and
    /// launches the poll loop on its own task.
    ///
    /// `shutdown` is the host's cancellation signal: flipping it to `true`
    /// (or dropping its sender) drains the loop just like [`stop`] does.
    /// On failure the engine stays in `Created` and no loop is launched.
    ///
    /// [`stop`]: ConsumerEngine::stop
    pub async fn start(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != EngineState::Created {
                return Err(Error::Lifecycle(format!(
                    "cannot start a consumer engine from the {:?} state",
                    *state
                )));
            }
            *state = EngineState::Starting;
        }

        let launched = self.launch(shutdown);
        if launched.is_err() {
            *self.state.lock().unwrap() = EngineState::Created;
        }
        launched
    }

    fn launch(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let (config, deserializer) = self.processor.build_parameters().validate()?;
        let consumer: StreamConsumer = config.to_client_config().create()?;

        info!(
            group_id = %config.group_id,
            topics = ?config.topics,
            "consumer started"
        );

        let (stopped_tx, stopped_rx) = oneshot::channel();
        let stop_timeout = config.stop_timeout();

        let poll_loop = PollLoop {
            processor: Arc::clone(&self.processor),
            consumer,
            deserializer,
            topics: config.topics,
            shutdown,
            stop: self.stop_tx.subscribe(),
            state: Arc::clone(&self.state),
            stopped: stopped_tx,
        };

        *self.state.lock().unwrap() = EngineState::Running;
        let join = tokio::spawn(poll_loop.run());
        *self.loop_handle.lock().unwrap() = Some(LoopHandle {
            stopped: stopped_rx,
            join,
            stop_timeout,
        });

        Ok(())
    }

    /// Signals the poll loop to drain and waits until it has acknowledged
    /// termination, so the client is never torn down mid-iteration.
    ///
    /// The wait is bounded by `ConsumerConfig::stop_timeout_secs` when
    /// set; past that deadline the loop task is aborted. Safe to call
    /// before `start`, after a failed `start`, after the loop already
    /// exited, and any number of times.
    pub async fn stop(&self) -> Result<()> {
        self.stop_tx.send_replace(true);

        let handle = self.loop_handle.lock().unwrap().take();
        let Some(LoopHandle {
            stopped,
            join,
            stop_timeout,
        }) = handle
        else {
            return Ok(());
        };

        {
            let mut state = self.state.lock().unwrap();
            if matches!(*state, EngineState::Starting | EngineState::Running) {
                *state = EngineState::Stopping;
            }
        }

        // The loop releases this signal exactly once on exit; a dropped
        // sender counts as released.
        let acknowledged = async {
            let _ = stopped.await;
        };
        match stop_timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, acknowledged).await.is_err() {
                    warn!(
                        timeout_secs = limit.as_secs(),
                        "poll loop did not acknowledge stop in time; aborting it"
                    );
                    join.abort();
                }
            }
            None => acknowledged.await,
        }
        let _ = join.await;

        *self.state.lock().unwrap() = EngineState::Stopped;
        Ok(())
    }
}

impl<P: MessageProcessor> Drop for ConsumerEngine<P> {
    fn drop(&mut self) {
        // A forgotten engine still winds its loop down; the loop task owns
        // the client and closes it when it exits.
        self.stop_tx.send_replace(true);
    }
}

struct PollLoop<P: MessageProcessor> {
    processor: Arc<P>,
    consumer: StreamConsumer,
    deserializer: Box<dyn Deserializer<P::Value>>,
    topics: Vec<String>,
    shutdown: watch::Receiver<bool>,
    stop: watch::Receiver<bool>,
    state: Arc<Mutex<EngineState>>,
    stopped: oneshot::Sender<()>,
}

impl<P: MessageProcessor> PollLoop<P> {
    async fn run(mut self) {
        let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();
        match self.consumer.subscribe(&topics) {
            Ok(()) => {
                debug!(topics = ?self.topics, "subscribed");
                self.poll_until_cancelled().await;
                *self.state.lock().unwrap() = EngineState::Stopping;
                self.consumer.unsubscribe();
                debug!("unsubscribed");
            }
            Err(e) => {
                error!(error = %e, "subscription failed; poll loop will not run");
            }
        }

        *self.state.lock().unwrap() = EngineState::Stopped;
        let _ = self.stopped.send(());
        info!("poll loop terminated");
    }

    async fn poll_until_cancelled(&mut self) {
        loop {
            tokio::select! {
                _ = cancelled(&mut self.shutdown) => {
                    info!("consumer draining after host cancellation");
                    break;
                }
                _ = cancelled(&mut self.stop) => {
                    info!("consumer draining after stop request");
                    break;
                }
                polled = self.consumer.recv() => match polled {
                    Ok(record) => self.handle_record(&record).await,
                    Err(e) => {
                        error!(error = %e, "consume failed; terminating poll loop");
                        break;
                    }
                }
            }
        }
    }

    async fn handle_record(&self, record: &BorrowedMessage<'_>) {
        let offset =
            TopicPartitionOffset::new(record.topic(), record.partition(), record.offset());
        let key = String::from_utf8_lossy(record.key().unwrap_or_default());
        let raw = String::from_utf8_lossy(record.payload().unwrap_or_default());

        debug!(key = %key, value = %raw, offset = %offset, "message received");

        let outcome = process_record(
            self.processor.as_ref(),
            self.deserializer.as_ref(),
            &key,
            &raw,
            &offset,
        )
        .await;
        if let Err(e) = outcome {
            // The offset is still committed below; a poison message must
            // not stall the partition.
            error!(
                key = %key,
                value = %raw,
                offset = %offset,
                error = %e,
                "message processing failed"
            );
        }

        match self.consumer.commit_message(record, CommitMode::Sync) {
            Ok(()) => debug!(offset = %offset, "offset committed"),
            Err(e) => warn!(
                offset = %offset,
                error = %e,
                "offset commit failed; the record may be redelivered after a restart"
            ),
        }
    }
}

/// Deserializes one record and dispatches it to the processor.
async fn process_record<P: MessageProcessor>(
    processor: &P,
    deserializer: &dyn Deserializer<P::Value>,
    key: &str,
    raw: &str,
    offset: &TopicPartitionOffset,
) -> Result<()> {
    let value = deserializer.deserialize(raw)?;
    processor
        .process_message(key, value, offset)
        .await
        .map_err(Error::Processing)
}

/// Resolves when the watch flag flips to `true` or its sender is dropped;
/// a vanished host counts as cancellation.
async fn cancelled(signal: &mut watch::Receiver<bool>) {
    let _ = signal.wait_for(|stop| *stop).await;
}
