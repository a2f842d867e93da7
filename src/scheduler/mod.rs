//! Bounded-concurrency execution of per-file analyses.
//!
//! A single coordinator owns a [`JoinSet`] of in-flight tasks. It launches in
//! priority order, waits for whichever task finishes first when the set is
//! full, and handles every completion itself: progress, the caller's
//! completion callback and result aggregation all run one at a time in the
//! coordinator, so callers can mutate shared state from the callback without
//! locking.

pub mod retry;

use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::validate_concurrency;
use crate::error::{BackendError, Result};
use crate::types::{
    silent_observer, AnalysisTask, FailureKind, FileFailure, ProgressObserver, ProgressPhase,
    ProgressSnapshot, Suggestion, IN_FLIGHT_PREVIEW,
};

pub use retry::{run_with_retry, RetryPolicy};

/// What one successful unit of work produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkOutput {
    pub suggestions: Vec<Suggestion>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// The backend answered but the payload failed validation.
    pub malformed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(WorkOutput),
    Failed(FileFailure),
}

/// Handed to the completion callback, in completion order.
#[derive(Debug, Clone)]
pub struct TaskCompletion {
    pub task: AnalysisTask,
    pub outcome: TaskOutcome,
    pub attempts: u32,
    pub elapsed: Duration,
}

impl TaskCompletion {
    pub fn output(&self) -> Option<&WorkOutput> {
        match &self.outcome {
            TaskOutcome::Completed(output) => Some(output),
            TaskOutcome::Failed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleOutcome {
    /// Suggestions in completion order.
    pub suggestions: Vec<Suggestion>,
    pub failures: Vec<FileFailure>,
    pub completed: usize,
    pub succeeded: usize,
    pub peak_in_flight: usize,
    pub duration: Duration,
}

/// Tracks in-flight work and derives averages and ETA for snapshots.
#[derive(Debug)]
struct ProgressTracker {
    total: usize,
    completed: usize,
    measured: u32,
    total_elapsed: Duration,
    in_flight: Vec<String>,
    last_file: Option<String>,
}

impl ProgressTracker {
    fn new(already_completed: usize, total: usize) -> Self {
        Self {
            total,
            completed: already_completed,
            measured: 0,
            total_elapsed: Duration::ZERO,
            in_flight: Vec::new(),
            last_file: None,
        }
    }

    fn launched(&mut self, file: &str) {
        self.in_flight.push(file.to_string());
        self.last_file = Some(file.to_string());
    }

    fn finished(&mut self, file: &str, elapsed: Duration) {
        if let Some(pos) = self.in_flight.iter().position(|f| f == file) {
            self.in_flight.remove(pos);
        }
        self.completed += 1;
        self.measured += 1;
        self.total_elapsed += elapsed;
        self.last_file = Some(file.to_string());
    }

    fn average(&self) -> Option<Duration> {
        if self.measured == 0 {
            None
        } else {
            Some(self.total_elapsed / self.measured)
        }
    }

    fn snapshot(&self) -> ProgressSnapshot {
        let avg = self.average();
        let remaining = self.total.saturating_sub(self.completed) as u32;
        ProgressSnapshot {
            phase: ProgressPhase::Analyzing,
            completed: self.completed,
            total: self.total,
            current_file: self.last_file.clone(),
            in_flight_files: self.in_flight.iter().take(IN_FLIGHT_PREVIEW).cloned().collect(),
            in_flight: self.in_flight.len(),
            avg_time_per_file: avg,
            eta: avg.map(|a| a * remaining),
        }
    }
}

pub struct Scheduler {
    limit: usize,
    retry: RetryPolicy,
    observer: ProgressObserver,
    already_completed: usize,
}

impl Scheduler {
    /// Fails with `InvalidConcurrency` outside 1-50.
    pub fn new(limit: usize) -> Result<Self> {
        validate_concurrency(limit)?;
        Ok(Self {
            limit,
            retry: RetryPolicy::default(),
            observer: silent_observer(),
            already_completed: 0,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_observer(mut self, observer: ProgressObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Count `n` files (e.g. cache hits) as done before the first launch, so
    /// progress covers the whole run rather than just the scheduled part.
    pub fn with_already_completed(mut self, n: usize) -> Self {
        self.already_completed = n;
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `work` over `tasks` with at most `limit` in flight.
    ///
    /// Per-file failures, including exhausted retries and panics, become a
    /// [`FileFailure`]; the batch always runs to the end. `on_complete` is
    /// called once per task after its progress snapshot is emitted.
    pub async fn run<W, Fut, C>(&self, tasks: Vec<AnalysisTask>, work: W, mut on_complete: C) -> ScheduleOutcome
    where
        W: Fn(AnalysisTask) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<WorkOutput, BackendError>> + Send + 'static,
        C: FnMut(&TaskCompletion),
    {
        let started = Instant::now();
        let total = self.already_completed + tasks.len();
        let mut tracker = ProgressTracker::new(self.already_completed, total);
        let mut outcome = ScheduleOutcome::default();
        let mut in_flight: JoinSet<TaskCompletion> = JoinSet::new();
        let mut launched: HashMap<Id, (AnalysisTask, Instant)> = HashMap::new();
        let work = Arc::new(work);

        info!("Scheduling {} file(s) with concurrency {}", tasks.len(), self.limit);

        for task in tasks {
            if in_flight.len() >= self.limit {
                if let Some(joined) = in_flight.join_next_with_id().await {
                    self.complete(joined, &mut launched, &mut tracker, &mut outcome, &mut on_complete);
                }
            }

            tracker.launched(&task.relative_path);
            debug!("Launching {}", task.relative_path);
            let handle = in_flight.spawn(Self::attempt(task.clone(), Arc::clone(&work), self.retry.clone()));
            launched.insert(handle.id(), (task, Instant::now()));
            outcome.peak_in_flight = outcome.peak_in_flight.max(in_flight.len());
            (self.observer)(&tracker.snapshot());
        }

        while let Some(joined) = in_flight.join_next_with_id().await {
            self.complete(joined, &mut launched, &mut tracker, &mut outcome, &mut on_complete);
        }

        outcome.duration = started.elapsed();
        info!(
            "Scheduler drained: {} completed, {} failed in {:?}",
            outcome.completed,
            outcome.failures.len(),
            outcome.duration
        );
        outcome
    }

    /// One file: retries around `work`, with panics converted to a failure.
    async fn attempt<W, Fut>(task: AnalysisTask, work: Arc<W>, retry: RetryPolicy) -> TaskCompletion
    where
        W: Fn(AnalysisTask) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<WorkOutput, BackendError>> + Send + 'static,
    {
        let started = Instant::now();
        let label = task.relative_path.clone();
        let guarded = AssertUnwindSafe(run_with_retry(&retry, &label, || work(task.clone()))).catch_unwind();

        let (outcome, attempts) = match guarded.await {
            Ok((Ok(output), attempts)) => (TaskOutcome::Completed(output), attempts),
            Ok((Err(e), attempts)) => (
                TaskOutcome::Failed(FileFailure {
                    file: label.clone(),
                    kind: e.kind(),
                    message: e.to_string(),
                    attempts,
                }),
                attempts,
            ),
            Err(payload) => (
                TaskOutcome::Failed(FileFailure {
                    file: label.clone(),
                    kind: FailureKind::Panicked,
                    message: panic_message(payload.as_ref()),
                    attempts: 1,
                }),
                1,
            ),
        };

        TaskCompletion {
            task,
            outcome,
            attempts,
            elapsed: started.elapsed(),
        }
    }

    fn complete<C>(
        &self,
        joined: std::result::Result<(Id, TaskCompletion), JoinError>,
        launched: &mut HashMap<Id, (AnalysisTask, Instant)>,
        tracker: &mut ProgressTracker,
        outcome: &mut ScheduleOutcome,
        on_complete: &mut C,
    ) where
        C: FnMut(&TaskCompletion),
    {
        let completion = match joined {
            Ok((id, completion)) => {
                launched.remove(&id);
                completion
            }
            Err(e) => {
                error!("Analysis task ended abnormally: {}", e);
                let Some((task, started)) = launched.remove(&e.id()) else {
                    return;
                };
                abnormal_completion(task, started, &e)
            }
        };

        tracker.finished(&completion.task.relative_path, completion.elapsed);
        (self.observer)(&tracker.snapshot());
        on_complete(&completion);

        outcome.completed += 1;
        match completion.outcome {
            TaskOutcome::Completed(output) => {
                outcome.succeeded += 1;
                outcome.suggestions.extend(output.suggestions);
            }
            TaskOutcome::Failed(failure) => {
                warn!(
                    "{} failed after {} attempt(s): {}",
                    failure.file, failure.attempts, failure.message
                );
                outcome.failures.push(failure);
            }
        }
    }
}

/// A task that died outside its own panic guard, or was cancelled.
fn abnormal_completion(task: AnalysisTask, started: Instant, e: &JoinError) -> TaskCompletion {
    let kind = if e.is_panic() {
        FailureKind::Panicked
    } else {
        FailureKind::Other
    };
    TaskCompletion {
        outcome: TaskOutcome::Failed(FileFailure {
            file: task.relative_path.clone(),
            kind,
            message: e.to_string(),
            attempts: 1,
        }),
        task,
        attempts: 1,
        elapsed: started.elapsed(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("task panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("task panicked: {}", message)
    } else {
        "task panicked".to_string()
    }
}
