//! devctl server
//!
//! Device-state reconciliation and control backend: enumerates USB, Bluetooth,
//! audio and camera devices, tracks what changed between enumerations, and
//! runs device-changing operations (disable, eject, radio power, recording)
//! at most one per device at a time, behind a small HTTP API.

pub mod api;
pub mod config;
pub mod control;
pub mod devices;
pub mod platform;

pub use api::build_router;
pub use config::ServerConfig;
pub use control::ControlService;
