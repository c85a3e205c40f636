//! # Sync Scheduler
//!
//! Fires orchestrator cycles on a [`Schedule`] through a
//! [`BackgroundExecutor`], plus one catch-up cycle shortly after start.
//! Manual triggers go straight to the orchestrator, whose single-flight
//! guard keeps timer and trigger from overlapping.

use crate::{
    orchestrator::{CycleOutcome, SyncOrchestrator, SyncRunStats},
    Result, SyncError,
};
use bridge_traits::{task_handler, BackgroundExecutor, BridgeError, Schedule, TaskHandler, TaskId};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Task id of the recurring cycle.
pub const RECURRING_TASK_ID: &str = "erp-order-sync";
/// Task id of the one-shot cycle after start.
pub const STARTUP_TASK_ID: &str = "erp-order-sync-startup";

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub schedule: Schedule,
    /// Delay before the one-shot catch-up cycle.
    pub initial_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule: Schedule::from_interval_secs(30),
            initial_delay: Duration::from_secs(5),
        }
    }
}

/// Reply to a manual trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerAck {
    pub accepted: bool,
    pub message: String,
}

/// Operator-facing status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub enabled: bool,
    /// Whether a cycle is executing right now.
    pub running: bool,
    /// Whether recurring cycles are scheduled.
    pub scheduled: bool,
    pub stats: SyncRunStats,
}

pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    executor: Arc<dyn BackgroundExecutor>,
    config: SchedulerConfig,
    tasks: Mutex<Vec<TaskId>>,
}

impl SyncScheduler {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        executor: Arc<dyn BackgroundExecutor>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            orchestrator,
            executor,
            config,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    /// Schedule recurring cycles and the startup catch-up cycle.
    ///
    /// Returns `false` without scheduling anything when disabled. Calling
    /// it again while started is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Scheduler`] if the executor rejects a task.
    pub async fn start(&self) -> Result<bool> {
        if !self.config.enabled {
            info!("Order sync is disabled, scheduler not started");
            return Ok(false);
        }

        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            debug!("Scheduler already started");
            return Ok(true);
        }

        let handler = self.cycle_handler();

        let recurring = self
            .executor
            .schedule_task(RECURRING_TASK_ID, self.config.schedule.clone(), handler.clone())
            .await
            .map_err(scheduler_error)?;

        let startup = match self
            .executor
            .schedule_once(STARTUP_TASK_ID, self.config.initial_delay, handler)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                self.executor.cancel_task(&recurring).await.ok();
                return Err(scheduler_error(e));
            }
        };

        tasks.push(recurring);
        tasks.push(startup);

        info!(
            schedule = %self.config.schedule,
            initial_delay_secs = self.config.initial_delay.as_secs(),
            endpoint = %self.orchestrator.status().endpoint_url,
            "Order sync scheduler started"
        );
        Ok(true)
    }

    /// Cancel scheduled cycles. A cycle already executing runs to completion.
    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_empty() {
            return;
        }

        for id in tasks.drain(..) {
            match self.executor.cancel_task(&id).await {
                Ok(()) | Err(BridgeError::TaskNotFound(_)) => {}
                Err(e) => warn!(task_id = %id, error = %e, "Failed to cancel sync task"),
            }
        }
        info!("Order sync scheduler stopped");
    }

    /// Start one cycle in the background and return immediately.
    ///
    /// The cycle is spawned on the current tokio runtime; called from outside
    /// one, the trigger is refused. The acknowledgement is not a promise: a
    /// cycle that starts between the check and the spawn makes the triggered
    /// one a skip.
    pub fn trigger(&self) -> TriggerAck {
        let Ok(runtime) = Handle::try_current() else {
            warn!("Manual trigger ignored, no tokio runtime available");
            return TriggerAck {
                accepted: false,
                message: "No async runtime available to run the sync cycle".to_string(),
            };
        };

        if self.orchestrator.is_running() {
            info!("Manual trigger ignored, cycle already running");
            return TriggerAck {
                accepted: false,
                message: "A sync cycle is already running".to_string(),
            };
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        runtime.spawn(async move {
            if let Err(e) = orchestrator.run_cycle().await {
                warn!(error = %e, "Manually triggered cycle failed");
            }
        });

        info!("Manual sync cycle triggered");
        TriggerAck {
            accepted: true,
            message: "Sync cycle started".to_string(),
        }
    }

    /// Run one cycle and wait for it.
    pub async fn run_now(&self) -> Result<CycleOutcome> {
        self.orchestrator.run_cycle().await
    }

    pub async fn status(&self) -> SchedulerStatus {
        let stats = self.orchestrator.status();
        SchedulerStatus {
            enabled: self.config.enabled,
            running: stats.is_running,
            scheduled: !self.tasks.lock().await.is_empty(),
            stats,
        }
    }

    fn cycle_handler(&self) -> TaskHandler {
        let orchestrator = Arc::clone(&self.orchestrator);
        task_handler(move || {
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                orchestrator
                    .run_cycle()
                    .await
                    .map(|_| ())
                    .map_err(|e| BridgeError::OperationFailed(e.to_string()))
            }
        })
    }
}

fn scheduler_error(e: BridgeError) -> SyncError {
    SyncError::Scheduler(e.to_string())
}
