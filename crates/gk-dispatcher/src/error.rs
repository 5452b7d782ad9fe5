use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("broker error: {0}")]
    Queue(#[from] gk_queue::QueueError),

    #[error("stats cache error: {0}")]
    Cache(#[from] gk_cache::CacheError),

    #[error("request store error: {0}")]
    Store(#[from] gk_store::StoreError),

    #[error("broker reconnection exhausted, dispatcher terminating")]
    Fatal,
}

pub type Result<T> = std::result::Result<T, DispatcherError>;
