//! Command implementations for the CLI
//!
//! - serve: Run the demo server with request telemetry
//! - config: Configuration display and validation

pub mod config;
pub mod serve;
