//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection lost after {0} reconnect attempts")]
    ConnectionLost(u32),

    #[error("Feed error: {0}")]
    Feed(#[from] tickstream_feed::FeedError),
}

pub type AppResult<T> = Result<T, AppError>;
