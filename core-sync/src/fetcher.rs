//! # Change Fetcher
//!
//! Retrieves candidate orders from the ERP store through the host-supplied
//! [`ChangeSource`].

use crate::{record::SourceRecord, Result, SyncError};
use async_trait::async_trait;
use bridge_traits::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use std::error::Error as StdError;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Boxed error returned by change sources.
pub type SourceError = Box<dyn StdError + Send + Sync>;

/// Query interface of the source transactional store.
///
/// Implementations return every record whose business timestamp falls within
/// `[from, to]`, in any order, without pagination.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    async fn fetch(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> std::result::Result<Vec<SourceRecord>, SourceError>;
}

/// Queries the [`ChangeSource`] for records at or after a timestamp.
pub struct ChangeFetcher {
    source: Arc<dyn ChangeSource>,
    clock: Arc<dyn Clock>,
}

impl ChangeFetcher {
    pub fn new(source: Arc<dyn ChangeSource>) -> Self {
        Self::with_clock(source, Arc::new(SystemClock))
    }

    pub fn with_clock(source: Arc<dyn ChangeSource>, clock: Arc<dyn Clock>) -> Self {
        Self { source, clock }
    }

    /// Fetch all records in `[since, now]`.
    ///
    /// Records with timestamp equal to `since` are included; the watermark
    /// filter removes the ones already delivered.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Fetch`] if the source fails.
    #[instrument(skip(self), fields(since = %since))]
    pub async fn fetch_since(&self, since: DateTime<Utc>) -> Result<Vec<SourceRecord>> {
        let until = self.clock.now();
        let records = self
            .source
            .fetch(since, until)
            .await
            .map_err(|e| SyncError::Fetch(e.to_string()))?;

        debug!(count = records.len(), until = %until, "Fetched candidate records");
        Ok(records)
    }
}
