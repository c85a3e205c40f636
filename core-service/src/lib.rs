//! Core service façade and bootstrap helpers.
//!
//! This crate wires validated [`SyncSettings`] and host-provided bridge
//! implementations (HTTP, background executor, clock, change source) into a
//! ready-to-run [`SyncService`]. Server processes typically call
//! [`SyncService::from_settings`], which uses the `bridge-server` adapters;
//! tests and embedders with their own bridges use [`SyncService::new`].
//!
//! ```ignore
//! use core_runtime::SyncSettings;
//! use core_service::SyncService;
//!
//! let settings = SyncSettings::from_env()?;
//! let service = SyncService::from_settings(settings, erp_source).await?;
//! service.start().await?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use bridge_server::{ReqwestHttpClient, TokioBackgroundExecutor};
use bridge_traits::{BackgroundExecutor, Clock, HttpClient, SystemClock};
use core_runtime::{EventBus, SyncEvent, SyncSettings, WatermarkBackend};
use core_sync::{
    ChangeFetcher, ChangeSource, CycleOutcome, DeliveryClient, DeliveryConfig,
    FileWatermarkStore, SchedulerConfig, SchedulerStatus, SqliteWatermarkStore, SyncOrchestrator,
    SyncScheduler, TriggerAck, WatermarkBootstrap, WatermarkStore,
};
use tokio::sync::broadcast::Receiver;
use tracing::info;

/// Aggregated handle to the bridge dependencies the sync core requires.
pub struct SyncDependencies {
    pub http_client: Arc<dyn HttpClient>,
    pub executor: Arc<dyn BackgroundExecutor>,
    pub clock: Arc<dyn Clock>,
    pub source: Arc<dyn ChangeSource>,
}

impl SyncDependencies {
    /// Construct a dependency bundle from explicit bridge handles, using the
    /// system clock.
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        executor: Arc<dyn BackgroundExecutor>,
        source: Arc<dyn ChangeSource>,
    ) -> Self {
        Self {
            http_client,
            executor,
            clock: Arc::new(SystemClock),
            source,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Server bridges: reqwest for HTTP and tokio timers for scheduling.
    pub fn server(settings: &SyncSettings, source: Arc<dyn ChangeSource>) -> Result<Self> {
        let http_client = ReqwestHttpClient::with_timeout(settings.timeout)?;
        Ok(Self::new(
            Arc::new(http_client),
            Arc::new(TokioBackgroundExecutor::new()),
            source,
        ))
    }
}

/// Primary façade exposed to the host process and its route layer.
pub struct SyncService {
    settings: SyncSettings,
    scheduler: SyncScheduler,
    events: EventBus,
}

impl SyncService {
    /// Build the pipeline from settings and explicit dependencies.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Config`] when the settings fail validation
    /// - [`CoreError::Sync`] when the watermark store cannot be opened
    pub async fn new(settings: SyncSettings, deps: SyncDependencies) -> Result<Self> {
        settings.validate()?;

        let store = open_store(&settings, Arc::clone(&deps.clock)).await?;

        let delivery = DeliveryClient::new(
            deps.http_client,
            DeliveryConfig {
                timeout: settings.timeout,
                retry: settings.retry.clone(),
                user_agent: settings.user_agent.clone(),
                ..DeliveryConfig::new(settings.endpoint_url.clone().unwrap_or_default())
            },
        );

        let events = EventBus::default();
        let orchestrator = SyncOrchestrator::new(
            store,
            ChangeFetcher::with_clock(deps.source, Arc::clone(&deps.clock)),
            delivery,
        )
        .with_clock(deps.clock)
        .with_event_bus(events.clone());

        let scheduler = SyncScheduler::new(
            Arc::new(orchestrator),
            deps.executor,
            SchedulerConfig {
                enabled: settings.enabled,
                schedule: settings.schedule.clone(),
                initial_delay: settings.initial_delay,
            },
        );

        info!(
            enabled = settings.enabled,
            schedule = %settings.schedule,
            endpoint = %settings.redacted_endpoint(),
            "Sync service initialized"
        );

        Ok(Self {
            settings,
            scheduler,
            events,
        })
    }

    /// Build the pipeline with the server bridges.
    pub async fn from_settings(
        settings: SyncSettings,
        source: Arc<dyn ChangeSource>,
    ) -> Result<Self> {
        let deps = SyncDependencies::server(&settings, source)?;
        Self::new(settings, deps).await
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Schedule recurring and startup cycles. Returns `false` when disabled.
    pub async fn start(&self) -> Result<bool> {
        Ok(self.scheduler.start().await?)
    }

    /// Cancel scheduled cycles. A cycle already executing runs to completion.
    pub async fn stop(&self) {
        self.scheduler.stop().await;
    }

    /// Start a cycle in the background and acknowledge immediately.
    pub fn trigger(&self) -> TriggerAck {
        if self.settings.endpoint_url.is_none() {
            return TriggerAck {
                accepted: false,
                message: "Sync endpoint is not configured".to_string(),
            };
        }
        self.scheduler.trigger()
    }

    /// Run one cycle and wait for its outcome.
    pub async fn run_now(&self) -> Result<CycleOutcome> {
        if self.settings.endpoint_url.is_none() {
            return Err(core_runtime::Error::Config(
                "SYNC_ENDPOINT_URL is required to run a sync cycle".to_string(),
            )
            .into());
        }
        Ok(self.scheduler.run_now().await?)
    }

    pub async fn status(&self) -> SchedulerStatus {
        self.scheduler.status().await
    }

    /// Ask the in-flight cycle to stop. Returns `false` when idle.
    pub fn cancel_in_flight(&self) -> bool {
        self.scheduler.orchestrator().cancel_in_flight()
    }

    /// Whether the delivery endpoint answers below 500.
    pub async fn health_check(&self) -> bool {
        if self.settings.endpoint_url.is_none() {
            return false;
        }
        self.scheduler.orchestrator().delivery().health_check().await
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        self.events.subscribe()
    }
}

async fn open_store(
    settings: &SyncSettings,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn WatermarkStore>> {
    let lookback = chrono::Duration::from_std(settings.lookback).map_err(|e| {
        CoreError::InitializationFailed(format!("Lookback out of range: {}", e))
    })?;
    let bootstrap = WatermarkBootstrap::new(clock, lookback);

    match &settings.watermark {
        WatermarkBackend::File(path) => {
            info!(path = %path.display(), "Using file watermark store");
            Ok(Arc::new(FileWatermarkStore::with_bootstrap(
                path.clone(),
                bootstrap,
            )))
        }
        WatermarkBackend::Sqlite(url) => {
            let store = SqliteWatermarkStore::connect(url, bootstrap).await?;
            info!(key = store.key(), "Using SQLite watermark store");
            Ok(Arc::new(store))
        }
    }
}
