//! Tracked execution of units of work.
//!
//! # Data Flow
//! ```text
//! run / spawn / try_run
//!     → begin(): id, start stack, TaskRecord → hub active set, started += 1
//!     → lifecycle companion spawned (log sync every tick)
//!     → work(ctx) called and polled under catch_unwind
//!     → finish(Outcome), completed/failed += 1
//!     → done signal → companion: final sync → hub history (exactly once)
//! ```
//!
//! # Design Decisions
//! - `run` and `spawn` share one code path; `spawn` only moves it onto the runtime
//! - Panics are observability data: `run` and `spawn` never surface them, `try_run` does
//! - If the awaiting caller drops the future mid-flight, the companion still
//!   finalizes the record (as failed) so nothing is left in the active set

use futures_util::future::Either;
use futures_util::FutureExt;
use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::{MonitorError, MonitorResult};
use crate::hub::MonitorHub;
use crate::tracking::session::SessionLogger;
use crate::tracking::stack::capture_stack;
use crate::tracking::trace::{Outcome, TaskRecord, TaskSpec, TaskTrace};

/// Execution context passed to tracked work.
#[derive(Clone)]
pub struct TaskContext {
    record: Arc<TaskRecord>,
}

impl TaskContext {
    pub fn id(&self) -> &str {
        self.record.id()
    }

    pub fn name(&self) -> &str {
        self.record.name()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.record.request_id()
    }

    /// Session logger whose lines end up on this task's trace.
    pub fn logger(&self) -> &SessionLogger {
        self.record.session()
    }

    /// Record resource usage observed by the work itself.
    pub fn report_usage(&self, cpu_usage: f64, memory_usage: u64) {
        self.record.report_usage(cpu_usage, memory_usage);
    }
}

/// Handle to a task submitted with [`TaskSupervisor::spawn`].
///
/// Dropping the handle detaches the task; tracking is unaffected.
pub struct TaskHandle {
    id: String,
    join: JoinHandle<TaskTrace>,
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the task and return its final trace.
    pub async fn wait(self) -> MonitorResult<TaskTrace> {
        self.join
            .await
            .map_err(|e| MonitorError::Join(e.to_string()))
    }
}

/// Runs work under tracking. Cheap to clone.
#[derive(Clone)]
pub struct TaskSupervisor {
    hub: Arc<MonitorHub>,
}

impl TaskSupervisor {
    pub fn new(hub: Arc<MonitorHub>) -> Self {
        Self { hub }
    }

    /// Run `work` to completion and return its final trace.
    ///
    /// A panic inside `work` is recorded on the trace and never propagated.
    pub async fn run<S, F, Fut>(&self, spec: S, work: F) -> TaskTrace
    where
        S: Into<TaskSpec>,
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = ()>,
    {
        let (record, ctx) = self.begin(spec.into());
        let fut = start_work(work, ctx).map(Ok::<(), String>);
        track(self.hub.clone(), record, fut).await.0
    }

    /// Submit `work` to the runtime. The task is in the active set before this returns.
    pub fn spawn<S, F, Fut>(&self, spec: S, work: F) -> TaskHandle
    where
        S: Into<TaskSpec>,
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (record, ctx) = self.begin(spec.into());
        let id = record.id().to_string();
        let fut = start_work(work, ctx).map(Ok::<(), String>);
        let hub = self.hub.clone();
        let join = tokio::spawn(async move { track(hub, record, fut).await.0 });
        TaskHandle { id, join }
    }

    /// Run fallible `work` and propagate its error or panic to the caller.
    ///
    /// Tracking is identical to [`run`](Self::run); an `Err` return counts as a failure.
    pub async fn try_run<S, F, Fut, T, E>(&self, spec: S, work: F) -> MonitorResult<T>
    where
        S: Into<TaskSpec>,
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let (record, ctx) = self.begin(spec.into());
        let fut = start_work(work, ctx).map(|result| result.map_err(|e| e.to_string()));
        let (trace, result) = track(self.hub.clone(), record, fut).await;

        result.map_err(|failure| match failure {
            Failure::Returned(message) => MonitorError::TaskFailed {
                id: trace.id,
                name: trace.name,
                message,
            },
            Failure::Panicked(message) => MonitorError::TaskPanicked {
                id: trace.id,
                name: trace.name,
                message,
            },
        })
    }

    fn begin(&self, spec: TaskSpec) -> (Arc<TaskRecord>, TaskContext) {
        let id = Uuid::new_v4().to_string();
        let stack = if self.hub.config().capture_stacks {
            capture_stack()
        } else {
            String::new()
        };
        let session = SessionLogger::new(&id);
        let record = Arc::new(TaskRecord::new(id, spec, stack, session));

        self.hub.register_task(record.clone());
        let ctx = TaskContext {
            record: record.clone(),
        };
        (record, ctx)
    }
}

/// Call `work` so that a panic while building its future is replayed when the
/// returned future is first polled, inside the caller's `catch_unwind`.
fn start_work<F, Fut>(work: F, ctx: TaskContext) -> Either<Fut, ReplayPanic<Fut::Output>>
where
    F: FnOnce(TaskContext) -> Fut,
    Fut: Future,
{
    match panic::catch_unwind(AssertUnwindSafe(|| work(ctx))) {
        Ok(fut) => Either::Left(fut),
        Err(payload) => Either::Right(ReplayPanic {
            payload: Some(payload),
            _output: PhantomData,
        }),
    }
}

/// Resumes a captured panic on first poll.
struct ReplayPanic<T> {
    payload: Option<Box<dyn Any + Send>>,
    _output: PhantomData<fn() -> T>,
}

impl<T> Future for ReplayPanic<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<T> {
        match self.payload.take() {
            Some(payload) => panic::resume_unwind(payload),
            None => Poll::Pending,
        }
    }
}

enum Failure {
    Returned(String),
    Panicked(String),
}

async fn track<T, Fut>(
    hub: Arc<MonitorHub>,
    record: Arc<TaskRecord>,
    fut: Fut,
) -> (TaskTrace, Result<T, Failure>)
where
    Fut: Future<Output = Result<T, String>>,
{
    let (done_tx, done_rx) = oneshot::channel();
    let companion = tokio::spawn(lifecycle_companion(
        hub.clone(),
        record.clone(),
        done_rx,
        hub.config().log_sync_interval(),
    ));

    let capture = hub.config().capture_stacks;
    let result = match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(message)) => {
            warn!(task_id = %record.id(), task = %record.name(), error = %message, "Tracked task returned an error");
            Err(Failure::Returned(message))
        }
        Err(payload) => {
            let message = panic_message(&*payload);
            error!(task_id = %record.id(), task = %record.name(), error = %message, "Tracked task panicked");
            Err(Failure::Panicked(message))
        }
    };

    let outcome = match &result {
        Ok(_) => Outcome::Success,
        Err(Failure::Returned(message) | Failure::Panicked(message)) => Outcome::Failure {
            message: message.clone(),
            stack: if capture { capture_stack() } else { String::new() },
        },
    };
    let success = outcome.is_success();
    if record.finish(outcome) {
        if success {
            hub.stats().record_task(0, 1, 0);
        } else {
            hub.stats().record_task(0, 0, 1);
        }
    }

    let _ = done_tx.send(());
    if let Err(e) = companion.await {
        warn!(task_id = %record.id(), error = %e, "Lifecycle companion did not finish cleanly");
    }

    (record.snapshot(), result)
}

async fn lifecycle_companion(
    hub: Arc<MonitorHub>,
    record: Arc<TaskRecord>,
    mut done: oneshot::Receiver<()>,
    sync_every: Duration,
) {
    let mut ticker = tokio::time::interval(sync_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            signal = &mut done => {
                if signal.is_err() {
                    let abandoned = Outcome::Failure {
                        message: "task dropped before completion".to_string(),
                        stack: String::new(),
                    };
                    if record.finish(abandoned) {
                        hub.stats().record_task(0, 0, 1);
                        warn!(task_id = %record.id(), task = %record.name(), "Tracked task dropped before completion");
                    }
                }
                record.sync_logs();
                hub.complete_task(&record);
                return;
            }
            _ = ticker.tick() => {
                if record.sync_logs() {
                    debug!(task_id = %record.id(), "Synced session logs");
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MonitorConfig, RealtimeConfig};
    use crate::tracking::trace::TraceStatus;

    fn hub() -> Arc<MonitorHub> {
        let config = MonitorConfig {
            enable_realtime: false,
            ..MonitorConfig::default()
        };
        Arc::new(MonitorHub::new(config, RealtimeConfig::default()))
    }

    #[tokio::test]
    async fn test_two_successes_and_a_panic() {
        let hub = hub();
        let supervisor = hub.supervisor();

        supervisor.run("first", |_ctx| async {}).await;
        supervisor.run("second", |ctx| async move { ctx.logger().info("working") }).await;
        let failed = supervisor
            .run("third", |_ctx| async { panic!("boom") })
            .await;

        let stats = hub.stats().task_stats();
        assert_eq!(stats.total_started, 3);
        assert_eq!(stats.total_completed, 2);
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.current_active, 0);

        assert_eq!(failed.status, TraceStatus::Failed);
        assert!(failed.error.contains("boom"));
        assert!(hub.get_active_tasks().is_empty());
        assert_eq!(hub.get_history_tasks(None).len(), 3);
    }

    #[tokio::test]
    async fn test_spawned_task_is_active_until_done() {
        let hub = hub();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let handle = hub.supervisor().spawn(TaskSpec::new("waiter").tag("kind", "test"), |ctx| async move {
            ctx.logger().info("waiting");
            let _ = release_rx.await;
        });

        let active = hub.get_active_tasks();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, handle.id());
        assert_eq!(active[0].status, TraceStatus::Running);

        release_tx.send(()).unwrap();
        let trace = handle.wait().await.unwrap();
        assert_eq!(trace.status, TraceStatus::Completed);
        assert_eq!(trace.tags.get("kind").map(String::as_str), Some("test"));
        assert_eq!(trace.session_logs.len(), 1);
        assert!(hub.get_active_tasks().is_empty());
    }

    #[tokio::test]
    async fn test_try_run_propagates() {
        let hub = hub();
        let supervisor = hub.supervisor();

        let ok: MonitorResult<u32> = supervisor.try_run("ok", |_| async { Ok::<_, String>(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err = supervisor
            .try_run("bad", |_| async { Err::<(), _>("no funds") })
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::TaskFailed { ref message, .. } if message == "no funds"));

        let panicked = supervisor
            .try_run("panics", |_| async {
                if true {
                    panic!("kaput");
                }
                Ok::<(), String>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(panicked, MonitorError::TaskPanicked { .. }));

        let stats = hub.stats().task_stats();
        assert_eq!(stats.total_completed, 1);
        assert_eq!(stats.total_failed, 2);
    }

    #[tokio::test]
    async fn test_panic_before_future_is_built_is_recorded() {
        let hub = hub();
        let supervisor = hub.supervisor();

        let trace = supervisor
            .run("sync-panic", |_ctx| -> std::future::Ready<()> { panic!("before future") })
            .await;
        assert_eq!(trace.status, TraceStatus::Failed);
        assert!(trace.error.contains("before future"));

        let spawned = supervisor
            .spawn("sync-panic-spawned", |_ctx| -> std::future::Ready<()> { panic!("detached") })
            .wait()
            .await
            .unwrap();
        assert_eq!(spawned.status, TraceStatus::Failed);

        let err = supervisor
            .try_run("sync-panic-try", |_ctx| -> std::future::Ready<Result<(), String>> {
                panic!("fallible")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::TaskPanicked { ref message, .. } if message == "fallible"));

        let stats = hub.stats().task_stats();
        assert_eq!(stats.total_started, 3);
        assert_eq!(stats.total_failed, 3);
        assert_eq!(stats.current_active, 0);
        assert!(hub.get_active_tasks().is_empty());
        assert_eq!(hub.get_history_tasks(None).len(), 3);
    }

    #[tokio::test]
    async fn test_dropped_run_is_still_finalized() {
        let hub = hub();
        let supervisor = hub.supervisor();

        let pending = supervisor.run("never", |_| std::future::pending::<()>());
        let _ = tokio::time::timeout(Duration::from_millis(20), pending).await;

        for _ in 0..50 {
            if hub.get_active_tasks().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(hub.get_active_tasks().is_empty());
        let history = hub.get_history_tasks(None);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, TraceStatus::Failed);
        assert_eq!(hub.stats().task_stats().total_failed, 1);
    }
}
