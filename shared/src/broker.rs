//! Broker connection management.
//!
//! Owns the single producer connection per process and the receive loops for
//! subscriptions. Connection establishment retries forever at a fixed 2s
//! interval and never surfaces an error to callers. `publish` is an
//! at-least-once, unconfirmed send: it returns once the message is handed to
//! the client's outbound queue and delivery durability is bounded by the
//! broker's own buffering. Use `publish_confirmed` where a broker-side
//! acknowledgment is required.
//!
//! Known gap: a reconnect restores the producer connection only. Each
//! subscription is tied to the consumer created by its `subscribe` call and
//! must be re-established by invoking `subscribe` again.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::BorrowedMessage;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{ClientContext, Message, Offset};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const METADATA_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Client context that reports transport-level errors. The connection is
/// kept; only a failed publish discards it (see `Broker::publish`).
pub struct LoggingContext;

impl ClientContext for LoggingContext {
    fn error(&self, error: KafkaError, reason: &str) {
        warn!(%error, reason, "broker client error");
    }
}

impl ConsumerContext for LoggingContext {}

/// An inbound message with owned payload, safe to hand to async handlers.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    fn from_borrowed(m: &BorrowedMessage<'_>) -> Self {
        Self {
            topic: m.topic().to_string(),
            key: m
                .key()
                .and_then(|k| std::str::from_utf8(k).ok())
                .map(String::from),
            payload: m.payload().map(|p| p.to_vec()).unwrap_or_default(),
        }
    }

    /// Decodes the JSON payload into a typed event. Handlers call this before
    /// touching any state so malformed payloads are rejected up front.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload)
            .with_context(|| format!("malformed payload on {}", self.topic))
    }
}

struct BrokerInner {
    brokers: String,
    producer: Mutex<Option<FutureProducer<LoggingContext>>>,
}

#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                brokers: brokers.into(),
                producer: Mutex::new(None),
            }),
        }
    }

    /// Returns the live producer connection, establishing one if needed.
    /// Suspends until the broker accepts; the lock is held across the retry
    /// loop so concurrent callers all wait for the same attempt.
    pub async fn connect(&self) -> FutureProducer<LoggingContext> {
        let mut slot = self.inner.producer.lock().await;
        if let Some(producer) = slot.as_ref() {
            return producer.clone();
        }
        let producer = connect_with_retry(&self.inner.brokers, || self.try_connect()).await;
        info!(brokers = %self.inner.brokers, "broker connection established");
        *slot = Some(producer.clone());
        producer
    }

    async fn try_connect(&self) -> Result<FutureProducer<LoggingContext>, KafkaError> {
        let producer: FutureProducer<LoggingContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.inner.brokers)
            .set("message.timeout.ms", "5000")
            .create_with_context(LoggingContext)?;

        // Client creation is lazy; only a metadata probe proves the broker
        // is actually reachable.
        let probe = producer.clone();
        tokio::task::spawn_blocking(move || {
            probe
                .client()
                .fetch_metadata(None, METADATA_PROBE_TIMEOUT)
                .map(|_| ())
        })
        .await
        .map_err(|_| KafkaError::Canceled)??;

        Ok(producer)
    }

    /// At-least-once, unconfirmed send: returns once the message is queued
    /// on the client. Delivery failures are logged asynchronously and, when
    /// they indicate a lost transport, discard the connection so the next
    /// caller reconnects.
    pub async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<()> {
        let producer = self.connect().await;
        let record = FutureRecord::to(topic).key(key).payload(&payload);
        let delivery = match producer.send_result(record) {
            Ok(delivery) => delivery,
            Err((e, _)) => return Err(anyhow!("failed to enqueue message for {topic}: {e}")),
        };

        let broker = self.clone();
        let topic = topic.to_string();
        tokio::spawn(async move {
            match delivery.await {
                Ok(Ok(_)) => {}
                Ok(Err((e, _))) => {
                    error!(topic = %topic, error = %e, "broker did not accept message");
                    if is_transport_failure(&e) {
                        broker.disconnect().await;
                    }
                }
                // Producer dropped before delivery settled; nothing to report.
                Err(_) => {}
            }
        });

        Ok(())
    }

    /// Variant of `publish` that completes only once the broker has
    /// acknowledged the message.
    pub async fn publish_confirmed(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<()> {
        let producer = self.connect().await;
        let record = FutureRecord::to(topic).key(key).payload(&payload);
        producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow!("broker rejected message for {topic}: {e}"))?;
        Ok(())
    }

    pub async fn publish_json<T: Serialize>(&self, topic: &str, key: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.publish(topic, key, payload).await
    }

    async fn disconnect(&self) {
        let mut slot = self.inner.producer.lock().await;
        if slot.take().is_some() {
            warn!("broker connection discarded, reconnecting in 1s");
            let broker = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(RECONNECT_DELAY).await;
                broker.connect().await;
            });
        }
    }

    /// Consumes `topic` one message at a time: the next message is not
    /// polled until the current handler settles. Handler success commits the
    /// message (ack); handler failure rewinds to the same offset (nack), so
    /// the message is redelivered. There is no dead-letter routing; a
    /// permanently failing message redelivers indefinitely.
    pub async fn subscribe<F, Fut>(&self, topic: &str, group_id: &str, handler: F) -> Result<()>
    where
        F: Fn(InboundMessage) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        // Wait until the broker is reachable before creating the consumer.
        self.connect().await;

        let consumer: StreamConsumer<LoggingContext> = ClientConfig::new()
            .set("group.id", group_id)
            .set("bootstrap.servers", &self.inner.brokers)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .set("enable.auto.commit", "false")
            .create_with_context(LoggingContext)?;
        consumer.subscribe(&[topic])?;
        info!(topic, group_id, "subscribed");

        let mut stream = consumer.stream();
        while let Some(message) = stream.next().await {
            match message {
                Ok(m) => {
                    let inbound = InboundMessage::from_borrowed(&m);
                    match handler(inbound).await {
                        Ok(()) => {
                            if let Err(e) = consumer.commit_message(&m, CommitMode::Async) {
                                error!(topic, error = %e, "failed to ack message");
                            }
                        }
                        Err(e) => {
                            error!(topic, error = %e, "handler failed, message will be redelivered");
                            let rewind = consumer.seek(
                                m.topic(),
                                m.partition(),
                                Offset::Offset(m.offset()),
                                Duration::from_secs(1),
                            );
                            if let Err(seek_err) = rewind {
                                error!(topic, error = %seek_err, "failed to rewind after nack");
                            }
                        }
                    }
                }
                Err(e) => error!(topic, error = %e, "error receiving message"),
            }
        }

        Ok(())
    }
}

fn is_transport_failure(err: &KafkaError) -> bool {
    matches!(
        err,
        KafkaError::MessageProduction(RDKafkaErrorCode::BrokerTransportFailure)
            | KafkaError::MessageProduction(RDKafkaErrorCode::AllBrokersDown)
    )
}

/// Fixed-interval retry, no cap and no backoff growth. Small internal
/// topology; unbounded retry at 2s is a known scaling risk.
async fn connect_with_retry<T, E, F, Fut>(brokers: &str, mut attempt: F) -> T
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    loop {
        match attempt().await {
            Ok(conn) => return conn,
            Err(e) => {
                warn!(brokers, error = %e, "broker connect failed, retrying in 2s");
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
        }
    }
}
