//! # Core Runtime Module
//!
//! Provides the ambient runtime infrastructure shared by the sync crates:
//! - Logging and tracing infrastructure
//! - Configuration management (environment + builder)
//! - Event bus system
//!
//! ## Overview
//!
//! Nothing in here knows how orders are fetched or delivered. This crate
//! establishes the configuration shape, logging conventions and event
//! broadcasting used by `core-sync` and `core-service`.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{SyncSettings, SyncSettingsBuilder, WatermarkBackend};
pub use error::{Error, Result};
pub use events::{EventBus, SyncEvent};
pub use logging::{init_logging, redact_endpoint, LogFormat, LogLevel, LoggingConfig};
