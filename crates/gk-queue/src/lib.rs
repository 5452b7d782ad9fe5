//! Broker adapter: a durable work queue with a bound dead-letter
//! exchange, manual-ack consumption, and a close notification for
//! reconnection. Implemented over RabbitMQ (AMQP 0-9-1).

pub mod error;
pub mod rabbitmq;

pub use error::QueueError;
pub use rabbitmq::{Delivery, RabbitMqBroker, RabbitMqConfig};

pub type Result<T> = std::result::Result<T, QueueError>;
