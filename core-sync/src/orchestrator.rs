//! # Sync Orchestrator
//!
//! Runs one incremental sync cycle at a time: read the watermark, fetch
//! changes, filter, transform, deliver each order and advance the watermark
//! after every success.
//!
//! ## Workflow
//!
//! 1. Read the watermark (storage failure aborts the cycle)
//! 2. Fetch candidate records since the watermark timestamp (fetch failure
//!    aborts the cycle, nothing advances)
//! 3. Keep records strictly after the watermark cursor and order them
//! 4. Per record: transform and validate, deliver, then persist the new
//!    watermark before moving on
//! 5. Record statistics and emit events
//!
//! A record that fails validation or delivery is skipped. If a later record
//! succeeds the watermark moves past the skipped one, which is then never
//! retried.
//!
//! ## Single flight
//!
//! At most one cycle runs per orchestrator. A cycle requested while another
//! is running returns [`CycleOutcome::Skipped`] immediately.

use crate::{
    delivery::DeliveryClient,
    fetcher::ChangeFetcher,
    store::WatermarkStore,
    transform::{clean_optional_fields, transform},
    watermark::filter_eligible,
    Result, SyncError, Watermark,
};
use bridge_traits::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use core_runtime::events::{EventBus, SyncEvent};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Order in which eligible records are delivered within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordOrdering {
    /// Ascending `(timestamp, id)`.
    #[default]
    Chronological,
    /// Whatever order the change source returned.
    FetchOrder,
}

/// Counters for a finished cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Records returned by the change source.
    pub fetched: usize,
    /// Records remaining after the watermark filter.
    pub eligible: usize,
    pub delivered: usize,
    /// Records skipped by validation.
    pub invalid: usize,
    /// Records whose delivery exhausted every attempt.
    pub failed: usize,
    /// Whether the cycle stopped early on request.
    pub cancelled: bool,
    pub watermark_before: Watermark,
    pub watermark_after: Watermark,
}

/// Result of asking for a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Another cycle was already running.
    Skipped,
    Completed(CycleReport),
}

impl CycleOutcome {
    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            CycleOutcome::Completed(report) => Some(report),
            CycleOutcome::Skipped => None,
        }
    }
}

/// In-memory statistics, reset on restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncRunStats {
    pub is_running: bool,
    pub endpoint_url: String,
    pub last_watermark: Option<Watermark>,
    pub last_cycle: Option<CycleReport>,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub cycles_skipped: u64,
    pub last_error: Option<String>,
}

/// Clears the running flag when the cycle ends, however it ends.
struct RunningGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Drives sync cycles.
pub struct SyncOrchestrator {
    store: Arc<dyn WatermarkStore>,
    fetcher: ChangeFetcher,
    delivery: DeliveryClient,
    clock: Arc<dyn Clock>,
    ordering: RecordOrdering,
    events: Option<EventBus>,
    running: AtomicBool,
    stats: Mutex<SyncRunStats>,
    current_cancel: Mutex<Option<CancellationToken>>,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn WatermarkStore>,
        fetcher: ChangeFetcher,
        delivery: DeliveryClient,
    ) -> Self {
        let stats = SyncRunStats {
            endpoint_url: delivery.endpoint_for_display(),
            ..Default::default()
        };

        Self {
            store,
            fetcher,
            delivery,
            clock: Arc::new(SystemClock),
            ordering: RecordOrdering::default(),
            events: None,
            running: AtomicBool::new(false),
            stats: Mutex::new(stats),
            current_cancel: Mutex::new(None),
        }
    }

    /// Clock used for watermark `last_updated_at` and report timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ordering(mut self, ordering: RecordOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn delivery(&self) -> &DeliveryClient {
        &self.delivery
    }

    /// Whether a cycle is currently in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Snapshot of the run statistics.
    pub fn status(&self) -> SyncRunStats {
        let mut snapshot = self.lock_stats().clone();
        snapshot.is_running = self.is_running();
        snapshot
    }

    /// Ask the in-flight cycle to stop.
    ///
    /// Pending backoff waits end immediately and no further records are
    /// attempted. Returns `false` when no cycle is running.
    pub fn cancel_in_flight(&self) -> bool {
        match self.lock_cancel().as_ref() {
            Some(token) => {
                info!("Cancelling in-flight sync cycle");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Run one sync cycle unless another is already running.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Storage`] or [`SyncError::Fetch`] when the cycle
    /// aborts. Per-record failures never fail the cycle.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let Some(_guard) = RunningGuard::acquire(&self.running) else {
            info!("Sync cycle already running, skipping");
            self.lock_stats().cycles_skipped += 1;
            self.emit(SyncEvent::CycleSkipped {
                reason: "cycle already running".to_string(),
            });
            return Ok(CycleOutcome::Skipped);
        };

        let cycle_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        *self.lock_cancel() = Some(cancel.clone());

        let result = self
            .execute_cycle(cycle_id, &cancel)
            .instrument(info_span!("sync_cycle", cycle_id = %cycle_id))
            .await;

        *self.lock_cancel() = None;

        match result {
            Ok(report) => {
                {
                    let mut stats = self.lock_stats();
                    stats.cycles_completed += 1;
                    stats.last_watermark = Some(report.watermark_after.clone());
                    stats.last_cycle = Some(report.clone());
                    stats.last_error = None;
                }
                self.emit(SyncEvent::CycleCompleted {
                    cycle_id,
                    fetched: report.fetched,
                    delivered: report.delivered,
                    invalid: report.invalid,
                    failed: report.failed,
                    duration_ms: report.duration_ms,
                    cancelled: report.cancelled,
                });
                Ok(CycleOutcome::Completed(report))
            }
            Err(e) => {
                error!(cycle_id = %cycle_id, error = %e, "Sync cycle failed");
                {
                    let mut stats = self.lock_stats();
                    stats.cycles_failed += 1;
                    stats.last_error = Some(e.to_string());
                }
                self.emit(SyncEvent::CycleFailed {
                    cycle_id,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn execute_cycle(
        &self,
        cycle_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<CycleReport> {
        let started = Instant::now();
        let started_at = self.clock.now();

        info!("Phase 1: Reading watermark");
        let mut watermark = self.store.read().await?;
        self.lock_stats().last_watermark = Some(watermark.clone());

        self.emit(SyncEvent::CycleStarted {
            cycle_id,
            since: watermark.last_timestamp,
            since_id: watermark.last_id,
        });

        info!(
            since = %watermark.last_timestamp,
            since_id = watermark.last_id,
            "Phase 2: Fetching changes"
        );
        let records = self.fetcher.fetch_since(watermark.last_timestamp).await?;

        let mut report = CycleReport {
            cycle_id,
            started_at,
            finished_at: started_at,
            duration_ms: 0,
            fetched: records.len(),
            eligible: 0,
            delivered: 0,
            invalid: 0,
            failed: 0,
            cancelled: false,
            watermark_before: watermark.clone(),
            watermark_after: watermark.clone(),
        };

        if records.is_empty() {
            info!("No new orders");
            return Ok(self.finish(report, watermark, started));
        }

        let mut eligible = filter_eligible(records, &watermark);
        if self.ordering == RecordOrdering::Chronological {
            eligible.sort_by_key(|record| record.cursor());
        }
        report.eligible = eligible.len();
        info!(
            fetched = report.fetched,
            eligible = report.eligible,
            "Phase 3: Delivering orders"
        );

        for record in eligible {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let payload = match transform(&record).into_payload(record.id) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(record_id = record.id, error = %e, "Order failed validation, skipping");
                    report.invalid += 1;
                    if let SyncError::Validation { record_id, errors } = e {
                        self.emit(SyncEvent::RecordRejected {
                            cycle_id,
                            record_id,
                            errors,
                        });
                    }
                    continue;
                }
            };

            let body = clean_optional_fields(&payload);
            match self.delivery.send(&body, cancel).await {
                Ok(receipt) => {
                    let next = watermark.advanced_to(&record, self.clock.now());
                    self.store.write(&next).await?;
                    watermark = next;

                    debug!(
                        record_id = record.id,
                        status = receipt.status,
                        attempts = receipt.attempts,
                        "Watermark advanced"
                    );
                    report.delivered += 1;
                    self.lock_stats().last_watermark = Some(watermark.clone());
                    self.emit(SyncEvent::RecordDelivered {
                        cycle_id,
                        record_id: record.id,
                        status: receipt.status,
                        attempts: receipt.attempts,
                    });
                }
                Err(SyncError::Cancelled) => {
                    info!(record_id = record.id, "Cycle cancelled during delivery");
                    report.cancelled = true;
                    break;
                }
                Err(e) => {
                    let attempts = match &e {
                        SyncError::Delivery { attempts, .. } => *attempts,
                        _ => 0,
                    };
                    error!(record_id = record.id, error = %e, "Order delivery failed, skipping");
                    report.failed += 1;
                    self.emit(SyncEvent::RecordFailed {
                        cycle_id,
                        record_id: record.id,
                        attempts,
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(self.finish(report, watermark, started))
    }

    fn finish(&self, mut report: CycleReport, watermark: Watermark, started: Instant) -> CycleReport {
        report.watermark_after = watermark;
        report.finished_at = self.clock.now();
        report.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            fetched = report.fetched,
            eligible = report.eligible,
            delivered = report.delivered,
            invalid = report.invalid,
            failed = report.failed,
            cancelled = report.cancelled,
            duration_ms = report.duration_ms,
            "Sync cycle completed"
        );
        report
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(bus) = &self.events {
            bus.emit(event).ok();
        }
    }

    fn lock_stats(&self) -> MutexGuard<'_, SyncRunStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_cancel(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.current_cancel.lock().unwrap_or_else(|e| e.into_inner())
    }
}
