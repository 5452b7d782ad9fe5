use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("request store error: {0}")]
    Store(#[from] gk_store::StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("stats update abandoned after exhausting the watch/multi/exec retry budget")]
    ContentionExhausted,
}

pub type Result<T> = std::result::Result<T, CacheError>;
