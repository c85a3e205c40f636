//! Integration tests for the order sync pipeline
//!
//! These tests drive full cycles through the orchestrator with a fake ERP
//! source and a fake logistics endpoint, covering:
//! - End-to-end delivery and watermark persistence across restarts
//! - Failed deliveries that are passed over by a later success
//! - Single-flight under a slow fetch
//! - Idempotent re-runs and watermark monotonicity
//! - Bootstrap, storage and fetch failures, cancellation
//! - Watermark write failures after a successful delivery
//! - Scheduling through the tokio executor

use async_trait::async_trait;
use bridge_server::TokioBackgroundExecutor;
use bridge_traits::{
    error::Result as BridgeResult, FixedClock, HttpClient, HttpRequest, HttpResponse,
    RetryPolicy, Schedule,
};
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use core_sync::{
    ChangeFetcher, ChangeSource, CycleOutcome, DeliveryClient, DeliveryConfig,
    FileWatermarkStore, InMemoryWatermarkStore, RecordOrdering, SchedulerConfig, SourceError,
    SourceLine, SourceRecord, SyncError, SyncOrchestrator, SyncScheduler, Watermark,
    WatermarkBootstrap, WatermarkStore,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Notify, Semaphore};

// ============================================================================
// Fakes
// ============================================================================

/// ERP store returning the records inside each requested window.
#[derive(Default)]
struct FakeErp {
    records: AsyncMutex<Vec<SourceRecord>>,
    windows: AsyncMutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
    calls: AtomicUsize,
    fail: AsyncMutex<bool>,
    gate: Option<Arc<Semaphore>>,
    entered: Notify,
}

impl FakeErp {
    fn with_records(records: Vec<SourceRecord>) -> Self {
        Self {
            records: AsyncMutex::new(records),
            ..Default::default()
        }
    }

    fn gated(records: Vec<SourceRecord>, gate: Arc<Semaphore>) -> Self {
        Self {
            records: AsyncMutex::new(records),
            gate: Some(gate),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ChangeSource for FakeErp {
    async fn fetch(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.windows.lock().await.push((from, to));

        if let Some(gate) = &self.gate {
            self.entered.notify_one();
            gate.acquire().await.map(|permit| permit.forget())?;
        }

        if *self.fail.lock().await {
            return Err("ERP connection pool exhausted".into());
        }

        Ok(self
            .records
            .lock()
            .await
            .iter()
            .filter(|r| r.timestamp >= from && r.timestamp <= to)
            .cloned()
            .collect())
    }
}

/// Logistics endpoint that accepts everything except the failing ids.
#[derive(Default)]
struct FakeEndpoint {
    failing: AsyncMutex<HashSet<String>>,
    attempts: AsyncMutex<HashMap<String, u32>>,
    accepted: AsyncMutex<Vec<String>>,
}

impl FakeEndpoint {
    async fn fail(&self, id: &str) {
        self.failing.lock().await.insert(id.to_string());
    }

    async fn attempts_for(&self, id: &str) -> u32 {
        self.attempts.lock().await.get(id).copied().unwrap_or(0)
    }

    async fn accepted(&self) -> Vec<String> {
        self.accepted.lock().await.clone()
    }
}

#[async_trait]
impl HttpClient for FakeEndpoint {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        let body: serde_json::Value =
            serde_json::from_slice(request.body.as_deref().unwrap_or_default()).unwrap();
        let id = body["external_id"].as_str().unwrap().to_string();

        *self.attempts.lock().await.entry(id.clone()).or_default() += 1;

        let status = if self.failing.lock().await.contains(&id) {
            503
        } else {
            self.accepted.lock().await.push(id);
            201
        };

        Ok(HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from_static(br#"{"ok":true}"#),
        })
    }
}

/// Wraps a store and keeps every written watermark.
struct RecordingStore {
    inner: InMemoryWatermarkStore,
    writes: AsyncMutex<Vec<Watermark>>,
}

#[async_trait]
impl WatermarkStore for RecordingStore {
    async fn read(&self) -> core_sync::Result<Watermark> {
        self.inner.read().await
    }

    async fn write(&self, watermark: &Watermark) -> core_sync::Result<()> {
        self.writes.lock().await.push(watermark.clone());
        self.inner.write(watermark).await
    }
}

/// Reads normally; writes fail while `fail_writes` is set.
struct ReadOnlyStore {
    inner: InMemoryWatermarkStore,
    fail_writes: AsyncMutex<bool>,
}

#[async_trait]
impl WatermarkStore for ReadOnlyStore {
    async fn read(&self) -> core_sync::Result<Watermark> {
        self.inner.read().await
    }

    async fn write(&self, watermark: &Watermark) -> core_sync::Result<()> {
        if *self.fail_writes.lock().await {
            return Err(SyncError::Storage("read-only file system".to_string()));
        }
        self.inner.write(watermark).await
    }
}

struct BrokenStore;

#[async_trait]
impl WatermarkStore for BrokenStore {
    async fn read(&self) -> core_sync::Result<Watermark> {
        Err(SyncError::Storage("disk unavailable".to_string()))
    }

    async fn write(&self, _watermark: &Watermark) -> core_sync::Result<()> {
        Err(SyncError::Storage("disk unavailable".to_string()))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

fn minutes(n: i64) -> chrono::Duration {
    chrono::Duration::minutes(n)
}

fn order(id: i64, timestamp: DateTime<Utc>) -> SourceRecord {
    let mut record = SourceRecord::new(id, timestamp);
    record.folio = Some(format!("PED-{id:05}"));
    record.trade_name = Some("Ferretería Central".to_string());
    record.phone = Some("8112345678".to_string());
    record.address = Some("Av. Constitución 200".to_string());
    record.city = Some("Monterrey".to_string());
    record.lines = vec![SourceLine {
        product_code: Some(format!("SKU-{id}")),
        quantity: Some(2.0),
        unit_price: Some(125.0),
        ..Default::default()
    }];
    record
}

fn watermark_at(timestamp: DateTime<Utc>, id: i64) -> Watermark {
    Watermark {
        last_timestamp: timestamp,
        last_id: id,
        last_updated_at: timestamp,
        total_processed: 0,
    }
}

fn pipeline(
    store: Arc<dyn WatermarkStore>,
    erp: Arc<FakeErp>,
    endpoint: Arc<FakeEndpoint>,
    clock: Arc<FixedClock>,
    base_delay: Duration,
) -> SyncOrchestrator {
    let delivery = DeliveryClient::new(
        endpoint,
        DeliveryConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay,
                ..Default::default()
            },
            ..DeliveryConfig::new("https://logistics.example.com/api/orders")
        },
    );

    SyncOrchestrator::new(
        store,
        ChangeFetcher::with_clock(erp, clock.clone()),
        delivery,
    )
    .with_clock(clock)
}

fn completed(outcome: CycleOutcome) -> core_sync::CycleReport {
    match outcome {
        CycleOutcome::Completed(report) => report,
        CycleOutcome::Skipped => panic!("cycle was skipped"),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_end_to_end_success_persists_watermark() {
    let t = base_time();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sync-watermark.json");
    let clock = Arc::new(FixedClock::new(t + minutes(10)));

    let file_store = FileWatermarkStore::new(&path);
    file_store.write(&watermark_at(t - minutes(1), 0)).await.unwrap();

    let erp = Arc::new(FakeErp::with_records(vec![
        order(1, t),
        order(2, t + minutes(1)),
        order(3, t + minutes(1)),
    ]));
    let endpoint = Arc::new(FakeEndpoint::default());
    let orchestrator = pipeline(
        Arc::new(file_store),
        erp.clone(),
        endpoint.clone(),
        clock.clone(),
        Duration::from_millis(1),
    );

    let report = completed(orchestrator.run_cycle().await.unwrap());
    assert_eq!(report.fetched, 3);
    assert_eq!(report.eligible, 3);
    assert_eq!(report.delivered, 3);
    assert_eq!(endpoint.accepted().await, vec!["1", "2", "3"]);

    // A fresh store over the same file sees the advanced watermark.
    let reopened = FileWatermarkStore::new(&path).read().await.unwrap();
    assert_eq!(reopened.cursor(), (t + minutes(1), 3));
    assert_eq!(reopened.total_processed, 3);
    assert_eq!(reopened.last_updated_at, t + minutes(10));

    // Restarted pipeline re-fetches the boundary records but sends nothing.
    let restarted = pipeline(
        Arc::new(FileWatermarkStore::new(&path)),
        erp,
        endpoint.clone(),
        clock,
        Duration::from_millis(1),
    );
    let report = completed(restarted.run_cycle().await.unwrap());
    assert_eq!(report.fetched, 2);
    assert_eq!(report.eligible, 0);
    assert_eq!(endpoint.accepted().await.len(), 3);
}

#[tokio::test]
async fn test_failed_record_is_passed_over_and_never_retried() {
    let t = base_time();
    let clock = Arc::new(FixedClock::new(t + minutes(10)));
    let store = Arc::new(InMemoryWatermarkStore::with_watermark(watermark_at(
        t - minutes(1),
        0,
    )));
    let erp = Arc::new(FakeErp::with_records(vec![
        order(1, t),
        order(2, t + minutes(1)),
        order(3, t + minutes(1)),
    ]));
    let endpoint = Arc::new(FakeEndpoint::default());
    endpoint.fail("2").await;

    let orchestrator = pipeline(
        store.clone(),
        erp,
        endpoint.clone(),
        clock,
        Duration::from_millis(1),
    );

    let report = completed(orchestrator.run_cycle().await.unwrap());
    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(endpoint.attempts_for("2").await, 3);

    let w = store.peek().await.unwrap();
    assert_eq!(w.cursor(), (t + minutes(1), 3));
    assert_eq!(w.total_processed, 2);

    // Even once the endpoint recovers, record 2 sits behind the watermark.
    endpoint.failing.lock().await.clear();
    let report = completed(orchestrator.run_cycle().await.unwrap());
    assert_eq!(report.eligible, 0);
    assert_eq!(endpoint.attempts_for("2").await, 3);
    assert_eq!(endpoint.accepted().await, vec!["1", "3"]);
}

#[tokio::test]
async fn test_single_flight_under_slow_fetch() {
    let t = base_time();
    let clock = Arc::new(FixedClock::new(t + minutes(10)));
    let gate = Arc::new(Semaphore::new(0));
    let erp = Arc::new(FakeErp::gated(
        vec![order(1, t + minutes(1)), order(2, t + minutes(2))],
        gate.clone(),
    ));
    let endpoint = Arc::new(FakeEndpoint::default());
    let orchestrator = Arc::new(pipeline(
        Arc::new(InMemoryWatermarkStore::with_watermark(watermark_at(t, 0))),
        erp.clone(),
        endpoint.clone(),
        clock,
        Duration::from_millis(1),
    ));
    let scheduler = SyncScheduler::new(
        orchestrator.clone(),
        Arc::new(TokioBackgroundExecutor::new()),
        SchedulerConfig::default(),
    );

    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_cycle().await })
    };
    erp.entered.notified().await;

    assert!(orchestrator.is_running());
    assert!(matches!(
        orchestrator.run_cycle().await.unwrap(),
        CycleOutcome::Skipped
    ));
    let ack = scheduler.trigger();
    assert!(!ack.accepted);
    assert!(scheduler.status().await.running);

    gate.add_permits(1);
    let report = completed(first.await.unwrap().unwrap());

    assert_eq!(report.delivered, 2);
    assert_eq!(erp.calls.load(Ordering::SeqCst), 1);
    assert_eq!(endpoint.accepted().await, vec!["1", "2"]);

    let stats = orchestrator.status();
    assert!(!stats.is_running);
    assert_eq!(stats.cycles_skipped, 1);
    assert_eq!(stats.cycles_completed, 1);
}

#[tokio::test]
async fn test_rerun_without_new_records_is_idempotent() {
    let t = base_time();
    let clock = Arc::new(FixedClock::new(t + minutes(10)));
    let store = Arc::new(InMemoryWatermarkStore::with_watermark(watermark_at(t, 0)));
    let erp = Arc::new(FakeErp::with_records(vec![order(1, t + minutes(1))]));
    let endpoint = Arc::new(FakeEndpoint::default());
    let orchestrator = pipeline(
        store.clone(),
        erp,
        endpoint.clone(),
        clock.clone(),
        Duration::from_millis(1),
    );

    orchestrator.run_cycle().await.unwrap();
    let after_first = store.peek().await.unwrap();

    clock.advance(minutes(5));
    orchestrator.run_cycle().await.unwrap();
    orchestrator.run_cycle().await.unwrap();

    assert_eq!(store.peek().await.unwrap(), after_first);
    assert_eq!(endpoint.accepted().await, vec!["1"]);
}

#[tokio::test]
async fn test_watermark_writes_are_monotonic() {
    let t = base_time();
    let clock = Arc::new(FixedClock::new(t + minutes(30)));
    let store = Arc::new(RecordingStore {
        inner: InMemoryWatermarkStore::with_watermark(watermark_at(t, 0)),
        writes: AsyncMutex::new(Vec::new()),
    });
    let erp = Arc::new(FakeErp::with_records(vec![
        order(7, t + minutes(3)),
        order(2, t + minutes(1)),
        order(5, t + minutes(3)),
        order(4, t + minutes(2)),
        order(1, t + minutes(1)),
    ]));
    let endpoint = Arc::new(FakeEndpoint::default());
    endpoint.fail("4").await;

    let orchestrator = pipeline(
        store.clone(),
        erp.clone(),
        endpoint,
        clock,
        Duration::from_millis(1),
    )
    .with_ordering(RecordOrdering::FetchOrder);

    orchestrator.run_cycle().await.unwrap();
    erp.records.lock().await.push(order(9, t + minutes(4)));
    orchestrator.run_cycle().await.unwrap();

    let writes = store.writes.lock().await;
    assert!(!writes.is_empty());
    for pair in writes.windows(2) {
        assert!(pair[0].cursor() <= pair[1].cursor(), "{:?}", pair);
        assert!(pair[0].total_processed < pair[1].total_processed);
    }
    assert_eq!(writes.last().unwrap().cursor(), (t + minutes(4), 9));
}

#[tokio::test]
async fn test_bootstrap_starts_one_hour_back() {
    let now = base_time();
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(FixedClock::new(now));
    let store = FileWatermarkStore::with_bootstrap(
        dir.path().join("wm.json"),
        WatermarkBootstrap::new(clock.clone(), chrono::Duration::hours(1)),
    );

    let erp = Arc::new(FakeErp::with_records(vec![
        order(10, now - minutes(90)),
        order(11, now - minutes(30)),
    ]));
    let endpoint = Arc::new(FakeEndpoint::default());
    let orchestrator = pipeline(
        Arc::new(store),
        erp.clone(),
        endpoint.clone(),
        clock,
        Duration::from_millis(1),
    );

    let report = completed(orchestrator.run_cycle().await.unwrap());

    assert_eq!(report.watermark_before.cursor(), (now - minutes(60), 0));
    assert_eq!(erp.windows.lock().await[0], (now - minutes(60), now));
    assert_eq!(endpoint.accepted().await, vec!["11"]);
}

#[tokio::test]
async fn test_storage_failure_aborts_cycle() {
    let t = base_time();
    let erp = Arc::new(FakeErp::with_records(vec![order(1, t)]));
    let orchestrator = pipeline(
        Arc::new(BrokenStore),
        erp.clone(),
        Arc::new(FakeEndpoint::default()),
        Arc::new(FixedClock::new(t)),
        Duration::from_millis(1),
    );

    let err = orchestrator.run_cycle().await.unwrap_err();
    assert!(matches!(err, SyncError::Storage(_)));
    assert_eq!(erp.calls.load(Ordering::SeqCst), 0);

    let stats = orchestrator.status();
    assert_eq!(stats.cycles_failed, 1);
    assert!(stats.last_error.unwrap().contains("disk unavailable"));
    assert!(!stats.is_running);
}

#[tokio::test]
async fn test_watermark_write_failure_aborts_and_redelivers() {
    let t = base_time();
    let start = watermark_at(t, 0);
    let store = Arc::new(ReadOnlyStore {
        inner: InMemoryWatermarkStore::with_watermark(start.clone()),
        fail_writes: AsyncMutex::new(true),
    });
    let erp = Arc::new(FakeErp::with_records(vec![
        order(1, t + minutes(1)),
        order(2, t + minutes(2)),
    ]));
    let endpoint = Arc::new(FakeEndpoint::default());
    let orchestrator = pipeline(
        store.clone(),
        erp,
        endpoint.clone(),
        Arc::new(FixedClock::new(t + minutes(10))),
        Duration::from_millis(1),
    );

    let err = orchestrator.run_cycle().await.unwrap_err();
    assert!(matches!(err, SyncError::Storage(_)));
    assert_eq!(endpoint.accepted().await, vec!["1"]);
    assert_eq!(endpoint.attempts_for("2").await, 0);
    assert_eq!(store.inner.peek().await.unwrap(), start);

    let stats = orchestrator.status();
    assert_eq!(stats.cycles_failed, 1);
    assert_eq!(stats.cycles_completed, 0);
    assert!(stats.last_error.unwrap().contains("read-only file system"));
    assert!(!stats.is_running);

    // Delivery is at-least-once: the unpersisted record goes out again.
    *store.fail_writes.lock().await = false;
    let report = completed(orchestrator.run_cycle().await.unwrap());
    assert_eq!(report.delivered, 2);
    assert_eq!(endpoint.accepted().await, vec!["1", "1", "2"]);
    assert_eq!(
        store.inner.peek().await.unwrap().cursor(),
        (t + minutes(2), 2)
    );
}

#[tokio::test]
async fn test_fetch_failure_leaves_watermark_untouched() {
    let t = base_time();
    let start = watermark_at(t, 4);
    let store = Arc::new(InMemoryWatermarkStore::with_watermark(start.clone()));
    let erp = Arc::new(FakeErp::with_records(vec![order(5, t + minutes(1))]));
    *erp.fail.lock().await = true;
    let endpoint = Arc::new(FakeEndpoint::default());

    let orchestrator = pipeline(
        store.clone(),
        erp.clone(),
        endpoint.clone(),
        Arc::new(FixedClock::new(t + minutes(10))),
        Duration::from_millis(1),
    );

    let err = orchestrator.run_cycle().await.unwrap_err();
    assert!(matches!(err, SyncError::Fetch(_)));
    assert_eq!(store.peek().await.unwrap(), start);

    // The next cycle picks the record up once the source recovers.
    *erp.fail.lock().await = false;
    let report = completed(orchestrator.run_cycle().await.unwrap());
    assert_eq!(report.delivered, 1);
    assert_eq!(endpoint.accepted().await, vec!["5"]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_in_flight_stops_remaining_records() {
    let t = base_time();
    let store = Arc::new(InMemoryWatermarkStore::with_watermark(watermark_at(t, 0)));
    let erp = Arc::new(FakeErp::with_records(vec![
        order(1, t + minutes(1)),
        order(2, t + minutes(2)),
        order(3, t + minutes(3)),
    ]));
    let endpoint = Arc::new(FakeEndpoint::default());
    endpoint.fail("2").await;

    let orchestrator = Arc::new(pipeline(
        store.clone(),
        erp,
        endpoint.clone(),
        Arc::new(FixedClock::new(t + minutes(10))),
        Duration::from_secs(30),
    ));

    let cycle = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_cycle().await })
    };

    // Record 2 is now waiting out its first 30s backoff.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(orchestrator.cancel_in_flight());

    let report = completed(cycle.await.unwrap().unwrap());
    assert!(report.cancelled);
    assert_eq!(report.delivered, 1);
    assert_eq!(endpoint.attempts_for("2").await, 1);
    assert_eq!(endpoint.attempts_for("3").await, 0);
    assert_eq!(store.peek().await.unwrap().cursor(), (t + minutes(1), 1));
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_runs_startup_and_recurring_cycles() {
    let t = base_time();
    let erp = Arc::new(FakeErp::with_records(Vec::new()));
    let orchestrator = Arc::new(pipeline(
        Arc::new(InMemoryWatermarkStore::with_watermark(watermark_at(t, 0))),
        erp.clone(),
        Arc::new(FakeEndpoint::default()),
        Arc::new(FixedClock::new(t)),
        Duration::from_millis(1),
    ));
    let scheduler = SyncScheduler::new(
        orchestrator,
        Arc::new(TokioBackgroundExecutor::new()),
        SchedulerConfig {
            enabled: true,
            schedule: Schedule::every(Duration::from_secs(60)),
            initial_delay: Duration::from_secs(5),
        },
    );

    assert!(scheduler.start().await.unwrap());
    assert_eq!(erp.calls.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(erp.calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(erp.calls.load(Ordering::SeqCst), 2);

    scheduler.stop().await;
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(erp.calls.load(Ordering::SeqCst), 2);

    let status = scheduler.status().await;
    assert!(status.enabled);
    assert!(!status.scheduled);
    assert_eq!(status.stats.cycles_completed, 2);
}
