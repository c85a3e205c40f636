//! Background Task Execution Implementation

use async_trait::async_trait;
use bridge_traits::{
    background::{BackgroundExecutor, Schedule, TaskHandler, TaskId, TaskStatus},
    error::{BridgeError, Result},
    time::{Clock, SystemClock},
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

type TaskTable = Arc<RwLock<HashMap<TaskId, TaskInfo>>>;

/// Tokio-based background executor.
///
/// Each scheduled task runs on its own tokio task. Cancelling a task signals
/// its loop to exit; a handler that is already running is never aborted.
pub struct TokioBackgroundExecutor {
    tasks: TaskTable,
    clock: Arc<dyn Clock>,
}

struct TaskInfo {
    status: TaskStatus,
    cancel: Option<oneshot::Sender<()>>,
    last_run: Option<i64>,
    next_run: Option<i64>,
}

/// Drives the waits of a recurring task.
enum Ticker {
    Fixed(Interval),
    Cron(Schedule),
}

impl Ticker {
    fn new(schedule: Schedule) -> Self {
        match schedule {
            Schedule::Interval(period) => {
                let mut interval = interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                Ticker::Fixed(interval)
            }
            cron => Ticker::Cron(cron),
        }
    }

    /// Delay until the upcoming run, used for bookkeeping only.
    fn peek_delay(&self, clock: &dyn Clock) -> Option<Duration> {
        match self {
            Ticker::Fixed(interval) => Some(interval.period()),
            Ticker::Cron(schedule) => schedule.next_delay(clock.now()),
        }
    }

    /// Wait for the next run. Returns `false` when the schedule is exhausted.
    async fn tick(&mut self, clock: &dyn Clock) -> bool {
        match self {
            Ticker::Fixed(interval) => {
                interval.tick().await;
                true
            }
            Ticker::Cron(schedule) => match schedule.next_delay(clock.now()) {
                Some(delay) => {
                    sleep(delay).await;
                    true
                }
                None => false,
            },
        }
    }
}

impl TokioBackgroundExecutor {
    /// Create a new background executor using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a background executor with a custom clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    fn now_millis(clock: &dyn Clock) -> i64 {
        clock.unix_timestamp_millis()
    }

    fn duration_to_millis(duration: Duration) -> i64 {
        duration.as_millis().min(i64::MAX as u128) as i64
    }

    fn schedule_after(clock: &dyn Clock, delay: Duration) -> i64 {
        Self::now_millis(clock).saturating_add(Self::duration_to_millis(delay))
    }

    fn millis_to_duration(millis: i64) -> Duration {
        if millis <= 0 {
            Duration::from_secs(0)
        } else {
            Duration::from_millis(millis as u64)
        }
    }

    async fn insert_task(&self, id: TaskId, info: TaskInfo) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&id) {
            return Err(BridgeError::OperationFailed(format!(
                "Task already scheduled: {}",
                id
            )));
        }
        tasks.insert(id, info);
        Ok(())
    }

    async fn update_task<F>(tasks: &TaskTable, id: &TaskId, update: F)
    where
        F: FnOnce(&mut TaskInfo),
    {
        let mut tasks = tasks.write().await;
        if let Some(info) = tasks.get_mut(id) {
            update(info);
        }
    }

    async fn run_handler(tasks: &TaskTable, id: &TaskId, handler: &TaskHandler, clock: &dyn Clock) {
        Self::update_task(tasks, id, |info| info.status = TaskStatus::Running).await;

        let result = handler().await;

        Self::update_task(tasks, id, |info| {
            info.last_run = Some(Self::now_millis(clock));
            info.status = match result {
                Ok(()) => TaskStatus::Completed,
                Err(err) => {
                    warn!(task_id = %id, error = %err, "Scheduled task failed");
                    TaskStatus::Failed
                }
            };
        })
        .await;
    }

    async fn run_recurring_task(
        tasks: TaskTable,
        id: TaskId,
        handler: TaskHandler,
        schedule: Schedule,
        mut cancel_rx: oneshot::Receiver<()>,
        clock: Arc<dyn Clock>,
    ) {
        let mut ticker = Ticker::new(schedule);
        loop {
            let next = ticker
                .peek_delay(clock.as_ref())
                .map(|delay| Self::schedule_after(clock.as_ref(), delay));
            Self::update_task(&tasks, &id, |info| info.next_run = next).await;

            tokio::select! {
                _ = &mut cancel_rx => {
                    Self::update_task(&tasks, &id, |info| {
                        info.status = TaskStatus::Cancelled;
                        info.next_run = None;
                    })
                    .await;
                    break;
                }
                more = ticker.tick(clock.as_ref()) => {
                    if !more {
                        debug!(task_id = %id, "Schedule exhausted");
                        Self::update_task(&tasks, &id, |info| info.next_run = None).await;
                        break;
                    }
                    Self::run_handler(&tasks, &id, &handler, clock.as_ref()).await;
                }
            }
        }
    }

    async fn run_one_time_task(
        tasks: TaskTable,
        id: TaskId,
        handler: TaskHandler,
        delay: Duration,
        mut cancel_rx: oneshot::Receiver<()>,
        clock: Arc<dyn Clock>,
    ) {
        let delay_sleep = sleep(delay);
        tokio::pin!(delay_sleep);
        tokio::select! {
            _ = &mut cancel_rx => {
                Self::update_task(&tasks, &id, |info| {
                    info.status = TaskStatus::Cancelled;
                    info.next_run = None;
                })
                .await;
                return;
            }
            _ = delay_sleep.as_mut() => {}
        }

        Self::update_task(&tasks, &id, |info| info.next_run = None).await;
        Self::run_handler(&tasks, &id, &handler, clock.as_ref()).await;

        // Finished one-shot tasks leave the table, same as cancelled ones.
        let mut table = tasks.write().await;
        let finished = table.get(&id).map_or(false, |info| {
            matches!(info.status, TaskStatus::Completed | TaskStatus::Failed)
        });
        if finished {
            table.remove(&id);
            debug!(task_id = %id, "One-time task finished");
        }
    }
}

impl Default for TokioBackgroundExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackgroundExecutor for TokioBackgroundExecutor {
    async fn schedule_task(
        &self,
        task_id: &str,
        schedule: Schedule,
        handler: TaskHandler,
    ) -> Result<TaskId> {
        let id = TaskId::new(task_id);

        debug!(task_id = task_id, schedule = %schedule, "Scheduling recurring task");

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.insert_task(
            id.clone(),
            TaskInfo {
                status: TaskStatus::Scheduled,
                cancel: Some(cancel_tx),
                last_run: None,
                next_run: None,
            },
        )
        .await?;

        tokio::spawn(TokioBackgroundExecutor::run_recurring_task(
            Arc::clone(&self.tasks),
            id.clone(),
            handler,
            schedule,
            cancel_rx,
            Arc::clone(&self.clock),
        ));

        Ok(id)
    }

    async fn schedule_once(
        &self,
        task_id: &str,
        delay: Duration,
        handler: TaskHandler,
    ) -> Result<TaskId> {
        let id = TaskId::new(task_id);

        debug!(
            task_id = task_id,
            delay_ms = delay.as_millis() as u64,
            "Scheduling one-time task"
        );

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.insert_task(
            id.clone(),
            TaskInfo {
                status: TaskStatus::Scheduled,
                cancel: Some(cancel_tx),
                last_run: None,
                next_run: Some(Self::schedule_after(self.clock.as_ref(), delay)),
            },
        )
        .await?;

        tokio::spawn(TokioBackgroundExecutor::run_one_time_task(
            Arc::clone(&self.tasks),
            id.clone(),
            handler,
            delay,
            cancel_rx,
            Arc::clone(&self.clock),
        ));

        Ok(id)
    }

    async fn cancel_task(&self, task_id: &TaskId) -> Result<()> {
        debug!(task_id = %task_id, "Cancelling task");

        let removed = self.tasks.write().await.remove(task_id);
        match removed {
            Some(mut info) => {
                if let Some(cancel) = info.cancel.take() {
                    let _ = cancel.send(());
                }
                Ok(())
            }
            None => Err(BridgeError::TaskNotFound(task_id.to_string())),
        }
    }

    async fn get_task_status(&self, task_id: &TaskId) -> Result<TaskStatus> {
        let tasks = self.tasks.read().await;
        tasks
            .get(task_id)
            .map(|info| info.status.clone())
            .ok_or_else(|| BridgeError::TaskNotFound(task_id.to_string()))
    }

    async fn list_tasks(&self) -> Result<Vec<TaskId>> {
        let tasks = self.tasks.read().await;
        Ok(tasks.keys().cloned().collect())
    }

    async fn next_execution_time(&self, task_id: &TaskId) -> Result<Option<Duration>> {
        let tasks = self.tasks.read().await;
        let info = tasks
            .get(task_id)
            .ok_or_else(|| BridgeError::TaskNotFound(task_id.to_string()))?;

        Ok(info.next_run.map(|next| {
            let now = Self::now_millis(self.clock.as_ref());
            Self::millis_to_duration(next - now)
        }))
    }
}
