//! Message queue error types

use thiserror::Error;

/// Error type for queue operations
#[derive(Error, Debug)]
pub enum QueueError {
    /// Queue handle already closed
    #[error("queue closed")]
    Closed,

    /// Connection error (Redis)
    #[error("connection error: {0}")]
    Connection(String),

    /// Stream command error
    #[error("stream error: {0}")]
    Stream(String),

    /// Consumer group error
    #[error("consumer group error: {0}")]
    ConsumerGroup(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<deadpool_redis::PoolError> for QueueError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        QueueError::Connection(err.to_string())
    }
}

impl From<deadpool_redis::redis::RedisError> for QueueError {
    fn from(err: deadpool_redis::redis::RedisError) -> Self {
        QueueError::Stream(err.to_string())
    }
}
