//! Common utilities for devctl
//!
//! This crate provides the plumbing shared by the server and its tests:
//! the async channel bridge between the Tokio runtime and the blocking
//! platform worker threads, error handling, logging setup, and test helpers.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use channel::{
    Lane, PlatformBridge, PlatformCommand, PlatformWorker, PlatformWorkers, Responder,
    create_platform_bridge,
};
pub use error::{Error, Result};
pub use logging::setup_logging;
