//! Integration tests for tickstream-cli.
//!
//! These run the client against a local WebSocket server:
//! - Subscription replay on connect and reconnect
//! - Heartbeat challenge handling
//! - Projection of pushed market data
//! - Application shutdown

pub mod common;
