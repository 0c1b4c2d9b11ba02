//! Feed error types.

use thiserror::Error;
use tickstream_ws::WsError;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Session error: {0}")]
    Session(#[from] WsError),
}

pub type FeedResult<T> = Result<T, FeedError>;
