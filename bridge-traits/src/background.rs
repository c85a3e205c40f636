//! Background Execution and Task Scheduling
//!
//! Provides recurring and one-shot task scheduling driven by a structured
//! [`Schedule`] value.

use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// Future returned by a task handler.
pub type TaskFuture = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

/// Callback invoked every time a scheduled task fires.
pub type TaskHandler = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// Wrap an async closure into a [`TaskHandler`].
pub fn task_handler<F, Fut>(handler: F) -> TaskHandler
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(handler()) as TaskFuture)
}

/// When a recurring task fires.
#[derive(Clone)]
pub enum Schedule {
    /// Fixed period between runs. The first run happens one period after
    /// scheduling.
    Interval(Duration),
    /// Cron expression with a leading seconds field
    /// (e.g. `0/30 * * * * *`), evaluated in UTC.
    Cron {
        expression: String,
        schedule: Arc<cron::Schedule>,
    },
}

impl Schedule {
    /// Fixed interval schedule.
    pub fn every(period: Duration) -> Self {
        Schedule::Interval(period)
    }

    /// Parse a cron expression.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidSchedule`] when the expression does not
    /// parse.
    pub fn cron(expression: &str) -> Result<Self> {
        let schedule = cron::Schedule::from_str(expression)
            .map_err(|e| BridgeError::InvalidSchedule(format!("{}: {}", expression, e)))?;
        Ok(Schedule::Cron {
            expression: expression.to_string(),
            schedule: Arc::new(schedule),
        })
    }

    /// Map an interval in seconds onto a schedule.
    ///
    /// Values below 60 keep second granularity (minimum 1s). Values of 60
    /// and above are truncated to whole minutes, so 90 runs every minute.
    pub fn from_interval_secs(secs: u64) -> Self {
        if secs < 60 {
            Schedule::Interval(Duration::from_secs(secs.max(1)))
        } else {
            Schedule::Interval(Duration::from_secs((secs / 60) * 60))
        }
    }

    /// Time to wait from `now` until the next run, or `None` when the
    /// schedule will never fire again.
    pub fn next_delay(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Schedule::Interval(period) => Some(*period),
            Schedule::Cron { schedule, .. } => schedule
                .after(&now)
                .next()
                .map(|next| (next - now).to_std().unwrap_or(Duration::ZERO)),
        }
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Interval(period) => f.debug_tuple("Interval").field(period).finish(),
            Schedule::Cron { expression, .. } => f.debug_tuple("Cron").field(expression).finish(),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Interval(period) => write!(f, "every {}s", period.as_secs()),
            Schedule::Cron { expression, .. } => write!(f, "cron '{}'", expression),
        }
    }
}

impl PartialEq for Schedule {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Schedule::Interval(a), Schedule::Interval(b)) => a == b,
            (Schedule::Cron { expression: a, .. }, Schedule::Cron { expression: b, .. }) => {
                a == b
            }
            _ => false,
        }
    }
}

/// Scheduled task identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Task execution status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Task is scheduled but not yet running
    Scheduled,
    /// Task is currently executing
    Running,
    /// Last run completed successfully
    Completed,
    /// Last run failed
    Failed,
    /// Task was cancelled
    Cancelled,
}

/// Background task executor trait
///
/// Cancelling a task stops future runs only. A run that is already executing
/// is allowed to finish.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::background::{task_handler, BackgroundExecutor, Schedule};
/// use std::time::Duration;
///
/// async fn schedule_sync(executor: &dyn BackgroundExecutor) -> Result<()> {
///     executor
///         .schedule_task(
///             "order-sync",
///             Schedule::every(Duration::from_secs(30)),
///             task_handler(|| async { Ok(()) }),
///         )
///         .await?;
///     Ok(())
/// }
/// ```
#[async_trait::async_trait]
pub trait BackgroundExecutor: Send + Sync {
    /// Schedule a recurring task
    async fn schedule_task(
        &self,
        task_id: &str,
        schedule: Schedule,
        handler: TaskHandler,
    ) -> Result<TaskId>;

    /// Schedule a one-time delayed task
    async fn schedule_once(
        &self,
        task_id: &str,
        delay: Duration,
        handler: TaskHandler,
    ) -> Result<TaskId>;

    /// Cancel a scheduled task
    async fn cancel_task(&self, task_id: &TaskId) -> Result<()>;

    /// Get status of a task
    async fn get_task_status(&self, task_id: &TaskId) -> Result<TaskStatus>;

    /// List all scheduled tasks
    async fn list_tasks(&self) -> Result<Vec<TaskId>>;

    /// Time remaining until the task's next run, if one is planned
    async fn next_execution_time(&self, task_id: &TaskId) -> Result<Option<Duration>>;
}
