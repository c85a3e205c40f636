//! # Host Bridge Traits
//!
//! Abstractions over the capabilities the sync core needs from its host
//! process.
//!
//! ## Overview
//!
//! The core never talks to the network, the wall clock or a timer wheel
//! directly. Each of those capabilities is expressed here as a trait so that
//! `bridge-server` can provide production implementations while tests inject
//! deterministic fakes.
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - Single-attempt async HTTP requests
//! - [`BackgroundExecutor`](background::BackgroundExecutor) - Recurring and one-shot task scheduling
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! convert library-specific errors into it and keep the message actionable
//! (include the URL, task id or status code involved).
//!
//! ## Thread Safety
//!
//! Every trait requires `Send + Sync` so implementations can be shared across
//! tokio tasks behind an `Arc`.

pub mod background;
pub mod error;
pub mod http;
pub mod time;

pub use error::BridgeError;

pub use background::{task_handler, BackgroundExecutor, Schedule, TaskHandler, TaskId, TaskStatus};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use time::{Clock, FixedClock, SystemClock};
