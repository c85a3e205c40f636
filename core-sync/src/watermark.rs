//! # Watermark
//!
//! The persisted cursor `(last_timestamp, last_id)` marking the newest order
//! already delivered, plus the eligibility filter derived from it.
//!
//! A record is eligible iff its `(timestamp, id)` pair is strictly greater
//! than the watermark's cursor under lexicographic ordering. This is the only
//! de-duplication the pipeline performs.

use crate::record::SourceRecord;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default lookback for a freshly bootstrapped watermark.
pub fn default_lookback() -> Duration {
    Duration::hours(1)
}

/// Persisted progress marker.
///
/// Serialized as `{ "ultimaFecha", "ultimoId", "ultimaActualizacion",
/// "totalProcesados" }` for compatibility with existing watermark files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    #[serde(rename = "ultimaFecha")]
    pub last_timestamp: DateTime<Utc>,
    #[serde(rename = "ultimoId")]
    pub last_id: i64,
    #[serde(rename = "ultimaActualizacion")]
    pub last_updated_at: DateTime<Utc>,
    #[serde(rename = "totalProcesados")]
    pub total_processed: u64,
}

impl Watermark {
    /// Watermark used when nothing has been persisted yet:
    /// `now - lookback`, id 0, zero processed. Clamped to the earliest
    /// representable timestamp.
    pub fn bootstrap(now: DateTime<Utc>, lookback: Duration) -> Self {
        Self {
            last_timestamp: now
                .checked_sub_signed(lookback)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            last_id: 0,
            last_updated_at: now,
            total_processed: 0,
        }
    }

    pub fn cursor(&self) -> (DateTime<Utc>, i64) {
        (self.last_timestamp, self.last_id)
    }

    /// Whether `record` lies strictly after this watermark.
    pub fn admits(&self, record: &SourceRecord) -> bool {
        record.timestamp > self.last_timestamp
            || (record.timestamp == self.last_timestamp && record.id > self.last_id)
    }

    /// Watermark after successfully delivering `record`.
    ///
    /// The cursor never moves backwards: a record that sorts at or below the
    /// current cursor still counts as processed but leaves the cursor alone.
    pub fn advanced_to(&self, record: &SourceRecord, now: DateTime<Utc>) -> Self {
        let (last_timestamp, last_id) = if self.admits(record) {
            record.cursor()
        } else {
            self.cursor()
        };

        Self {
            last_timestamp,
            last_id,
            last_updated_at: now,
            total_processed: self.total_processed.saturating_add(1),
        }
    }
}

/// Keep only records strictly after `watermark`, preserving input order.
pub fn filter_eligible(records: Vec<SourceRecord>, watermark: &Watermark) -> Vec<SourceRecord> {
    records
        .into_iter()
        .filter(|record| watermark.admits(record))
        .collect()
}
