//! # Order Sync Pipeline
//!
//! Incrementally discovers new orders in the ERP store and delivers them to
//! the logistics API, one at a time, surviving restarts and transient
//! network failures.
//!
//! ## Components
//!
//! - **Watermark** (`watermark`): persisted `(timestamp, id)` cursor and the eligibility filter
//! - **Stores** (`store`, `sqlite_store`): file, SQLite and in-memory watermark persistence
//! - **Change Fetcher** (`fetcher`): windowed queries against the host's `ChangeSource`
//! - **Transformer** (`transform`): source row to delivery payload, with validation
//! - **Delivery Client** (`delivery`): HTTP POST with exponential backoff
//! - **Orchestrator** (`orchestrator`): single-flight cycle state machine
//! - **Scheduler** (`scheduler`): recurring, startup and manual cycles

pub mod delivery;
pub mod error;
pub mod fetcher;
pub mod orchestrator;
pub mod record;
pub mod scheduler;
pub mod sqlite_store;
pub mod store;
pub mod transform;
pub mod watermark;

pub use delivery::{DeliveryClient, DeliveryConfig, DeliveryReceipt};
pub use error::{Result, SyncError};
pub use fetcher::{ChangeFetcher, ChangeSource, SourceError};
pub use orchestrator::{CycleOutcome, CycleReport, RecordOrdering, SyncOrchestrator, SyncRunStats};
pub use record::{
    Customer, DeliveryItem, DeliveryPayload, ShippingAddress, SourceLine, SourceRecord,
};
pub use scheduler::{SchedulerConfig, SchedulerStatus, SyncScheduler, TriggerAck};
pub use sqlite_store::SqliteWatermarkStore;
pub use store::{
    FileWatermarkStore, InMemoryWatermarkStore, WatermarkBootstrap, WatermarkStore,
};
pub use transform::{clean_optional_fields, transform, validate, TransformOutcome};
pub use watermark::{filter_eligible, Watermark};
