use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("ack/nack failed: {0}")]
    Ack(String),

    #[error("reconnection exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
