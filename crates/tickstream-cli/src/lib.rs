//! tickstream command-line runner.
//!
//! Loads a TOML configuration, subscribes to the configured markets, and logs
//! a periodic summary of the projected order books and candlestick series.

pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::{AppConfig, MarketConfig};
pub use error::{AppError, AppResult};
