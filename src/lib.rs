//! Workspace umbrella crate.
//!
//! Re-exports the order sync crates behind the `server` feature so a host
//! process can depend on `erp-sync` alone instead of wiring `core-service`,
//! `core-sync` and `core-runtime` individually.

#[cfg(feature = "server")]
pub use core_runtime as runtime;
#[cfg(feature = "server")]
pub use core_service as service;
#[cfg(feature = "server")]
pub use core_sync as sync;

#[cfg(feature = "server")]
pub use core_runtime::{init_logging, LoggingConfig, SyncSettings};
#[cfg(feature = "server")]
pub use core_service::{CoreError, SyncDependencies, SyncService};
#[cfg(feature = "server")]
pub use core_sync::{ChangeSource, SourceRecord};
