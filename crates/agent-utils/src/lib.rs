//! Shared utilities for the consensus workspace
//!
//! Logging setup, process-level configuration and the timeout wrapper used
//! around every external call.

pub mod config;
pub mod logging;
pub mod timeout;

pub use config::Config;
pub use logging::{LogFormat, init_tracing, init_tracing_with};
pub use timeout::{TimedOut, with_timeout};
