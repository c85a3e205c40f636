//! # Server Bridge Implementations
//!
//! Default implementations of bridge traits for long-running server
//! processes.
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `BackgroundExecutor` using tokio timers
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_server::{ReqwestHttpClient, TokioBackgroundExecutor};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let http_client = ReqwestHttpClient::with_timeout(Duration::from_secs(10))?;
//!     let executor = TokioBackgroundExecutor::new();
//!
//!     // Hand both to the sync service
//! }
//! ```

mod background;
mod http;

pub use background::TokioBackgroundExecutor;
pub use http::ReqwestHttpClient;
