//! Error types for the Redis tile store.

use overtile_core::StoreError;
use redis::RedisError;

/// Error type for Redis store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error from the underlying Redis client: connection failures,
    /// protocol errors, authentication failures, command errors.
    #[error("redis error: {0}")]
    Redis(#[from] RedisError),

    /// No connection URL was configured before building the store.
    #[error("Redis URL not specified. Call .url() before .build()")]
    MissingUrl,
}

impl From<Error> for StoreError {
    fn from(error: Error) -> Self {
        match &error {
            Error::Redis(redis)
                if redis.is_io_error()
                    || redis.is_connection_refusal()
                    || redis.is_connection_dropped()
                    || redis.is_timeout() =>
            {
                StoreError::Connection(Box::new(error))
            }
            _ => StoreError::Command(Box::new(error)),
        }
    }
}
