//! RabbitMQ (AMQP 0-9-1) broker adapter.
//!
//! Declares a durable work queue bound to a dead-letter exchange with
//! a default 24-hour message TTL, consumes with `prefetch = 1` and
//! manual acknowledgment, and surfaces a close notification so the
//! dispatcher can drive reconnection itself.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use lapin::{
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::{QueueError, Result};

const RECONNECT_ATTEMPTS: u32 = 3;
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const PUBLISH_ATTEMPTS: u32 = 3;
const DEFAULT_MESSAGE_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// Fixed per the external-interface contract: every task queue in
/// this system shares the same dead-letter exchange and queue, not
/// one derived per queue name.
const DEAD_LETTER_EXCHANGE: &str = "dead.letter.ex";
const DEAD_LETTER_QUEUE: &str = "dead.letter.queue";

#[derive(Debug, Clone)]
pub struct RabbitMqConfig {
    pub uri: String,
    pub queue_name: String,
    pub message_ttl_ms: i64,
    pub prefetch_count: u16,
}

impl RabbitMqConfig {
    pub fn new(uri: impl Into<String>, queue_name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            queue_name: queue_name.into(),
            message_ttl_ms: DEFAULT_MESSAGE_TTL_MS,
            prefetch_count: 1,
        }
    }
}

/// A single unacknowledged delivery. `body` is the raw message
/// payload; callers deserialize it themselves so this crate stays
/// free of any domain type.
pub struct Delivery {
    pub body: Vec<u8>,
    acker: Acker,
}

impl Delivery {
    pub async fn ack(&self) -> Result<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| QueueError::Ack(e.to_string()))
    }

    /// Route to the dead-letter exchange. The core never requeues.
    pub async fn nack_no_requeue(&self) -> Result<()> {
        self.acker
            .nack(BasicNackOptions {
                requeue: false,
                ..Default::default()
            })
            .await
            .map_err(|e| QueueError::Ack(e.to_string()))
    }
}

/// Durable work queue consumer and publisher. Owns its own
/// connection; `next()` drains the delivery stream and `reconnect()`
/// re-dials, re-declares, and re-registers the consumer in place.
pub struct RabbitMqBroker {
    config: RabbitMqConfig,
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
    closed_rx: watch::Receiver<bool>,
}

impl RabbitMqBroker {
    pub async fn connect(config: RabbitMqConfig) -> Result<Self> {
        let (connection, channel, consumer, closed_rx) = dial(&config).await?;
        info!(queue = %config.queue_name, "connected to broker");
        Ok(Self {
            config,
            connection,
            channel,
            consumer,
            closed_rx,
        })
    }

    /// Pull the next delivery. Returns `None` when the consumer
    /// stream has ended (the connection dropped); callers should
    /// call `reconnect()` in that case.
    pub async fn next(&mut self) -> Option<Result<Delivery>> {
        match self.consumer.next().await {
            Some(Ok(delivery)) => Some(Ok(Delivery {
                body: delivery.data,
                acker: delivery.acker,
            })),
            Some(Err(e)) => Some(Err(QueueError::Channel(e.to_string()))),
            None => None,
        }
    }

    /// Whether the underlying connection has signaled closure. Used
    /// by the dispatcher's select loop alongside `next()`.
    pub fn close_signal(&self) -> watch::Receiver<bool> {
        self.closed_rx.clone()
    }

    /// Re-dial up to `RECONNECT_ATTEMPTS` times with a fixed backoff,
    /// replacing the connection, channel, and consumer in place.
    pub async fn reconnect(&mut self) -> Result<()> {
        for attempt in 1..=RECONNECT_ATTEMPTS {
            warn!(queue = %self.config.queue_name, attempt, "reconnecting to broker");
            match dial(&self.config).await {
                Ok((connection, channel, consumer, closed_rx)) => {
                    self.connection = connection;
                    self.channel = channel;
                    self.consumer = consumer;
                    self.closed_rx = closed_rx;
                    info!(queue = %self.config.queue_name, "reconnected to broker");
                    return Ok(());
                }
                Err(e) => {
                    error!(queue = %self.config.queue_name, attempt, error = %e, "reconnect attempt failed");
                    if attempt < RECONNECT_ATTEMPTS {
                        sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        }
        Err(QueueError::ReconnectExhausted {
            attempts: RECONNECT_ATTEMPTS,
        })
    }

    /// Publish a persistent message to the default exchange, routed
    /// to the work queue by routing key. Retried up to
    /// `PUBLISH_ATTEMPTS` times.
    pub async fn publish(&self, body: &[u8]) -> Result<()> {
        let mut last_err = None;
        for attempt in 1..=PUBLISH_ATTEMPTS {
            match publish_once(&self.channel, &self.config.queue_name, body).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(queue = %self.config.queue_name, attempt, error = %e, "publish attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| QueueError::Publish("unknown failure".to_string())))
    }

    /// Orderly shutdown: stop consuming, close the channel then the
    /// connection.
    pub async fn stop(self) -> Result<()> {
        self.channel
            .close(200, "shutdown")
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        self.connection
            .close(200, "shutdown")
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        Ok(())
    }
}

async fn publish_once(channel: &Channel, queue_name: &str, body: &[u8]) -> Result<()> {
    channel
        .basic_publish(
            "",
            queue_name,
            BasicPublishOptions::default(),
            body,
            BasicProperties::default()
                .with_delivery_mode(2)
                .with_content_type(ShortString::from("application/json")),
        )
        .await
        .map_err(|e| QueueError::Publish(e.to_string()))?
        .await
        .map_err(|e| QueueError::Publish(e.to_string()))?;
    Ok(())
}

async fn dial(
    config: &RabbitMqConfig,
) -> Result<(Connection, Channel, Consumer, watch::Receiver<bool>)> {
    let connection = Connection::connect(
        &config.uri,
        ConnectionProperties::default().with_connection_name("gatekeeper".into()),
    )
    .await
    .map_err(|e| QueueError::Connection(e.to_string()))?;

    let (closed_tx, closed_rx) = watch::channel(false);
    let closed_tx = Arc::new(closed_tx);
    connection.on_error(move |err| {
        warn!(error = %err, "broker connection closed");
        let _ = closed_tx.send(true);
    });

    let channel = connection
        .create_channel()
        .await
        .map_err(|e| QueueError::Channel(e.to_string()))?;

    channel
        .exchange_declare(
            DEAD_LETTER_EXCHANGE,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| QueueError::Channel(e.to_string()))?;

    channel
        .queue_declare(
            DEAD_LETTER_QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| QueueError::Channel(e.to_string()))?;

    channel
        .queue_bind(
            DEAD_LETTER_QUEUE,
            DEAD_LETTER_EXCHANGE,
            "",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| QueueError::Channel(e.to_string()))?;

    let mut queue_args = FieldTable::default();
    queue_args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(DEAD_LETTER_EXCHANGE.into()),
    );
    queue_args.insert(
        "x-message-ttl".into(),
        AMQPValue::LongLongInt(config.message_ttl_ms),
    );

    channel
        .queue_declare(
            &config.queue_name,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            queue_args,
        )
        .await
        .map_err(|e| QueueError::Channel(e.to_string()))?;

    channel
        .basic_qos(config.prefetch_count, BasicQosOptions::default())
        .await
        .map_err(|e| QueueError::Channel(e.to_string()))?;

    let consumer_tag = format!("gatekeeper-{}", uuid::Uuid::new_v4());
    let consumer = channel
        .basic_consume(
            &config.queue_name,
            &consumer_tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| QueueError::Channel(e.to_string()))?;

    debug!(queue = %config.queue_name, dlx = DEAD_LETTER_EXCHANGE, "declared queue and dead-letter exchange");

    Ok((connection, channel, consumer, closed_rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_the_contractual_dead_letter_names() {
        let config = RabbitMqConfig::new("amqp://localhost", "gatekeeper-requests");
        assert_eq!(DEAD_LETTER_EXCHANGE, "dead.letter.ex");
        assert_eq!(DEAD_LETTER_QUEUE, "dead.letter.queue");
        assert_eq!(config.prefetch_count, 1);
        assert_eq!(config.message_ttl_ms, DEFAULT_MESSAGE_TTL_MS);
    }
}
