//! Compute worker: runs one bounded CPU-bound job on a dedicated thread.
//!
//! ### Lifecycle
//! - A `ComputeWorker` runs exactly one job. Starting a second job on the same
//!   instance is `InvalidJob`; create a fresh worker instead.
//! - Events flow back on an unbounded channel so the job thread never waits on
//!   the async runtime.
//!
//! ### Progress
//! - Emitted every `progress_interval` units of work (default
//!   `max(1, iterations / 100)`), capped at 99 while the loop runs.
//! - Exactly one `100` is emitted, immediately before the result.
//!
//! ### Faults and cancellation
//! - A panic in the kernel or a non-finite accumulator ends the job with one
//!   `Failed` event.
//! - Cancellation is checked at progress boundaries; after it, the stream just
//!   closes.

pub mod protocol;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;

use outpost_core::{AppConfig, Error};

pub use protocol::{WorkerCommand, WorkerMessage};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// One unit of work, evaluated for every index in `0..iterations`.
pub type Kernel = fn(u64) -> f64;

/// `sqrt(i) * sin(i) * cos(i)`.
pub fn trig_sum_step(i: u64) -> f64 {
    let x = i as f64;
    x.sqrt() * x.sin() * x.cos()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    TrigSum,
}

/// A job submitted by the page controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub id: u64,
    pub kind: JobKind,
    pub iterations: i64,
}

impl Job {
    pub fn new(iterations: i64) -> Self {
        Self { id: NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed), kind: JobKind::TrigSum, iterations }
    }
}

impl From<WorkerCommand> for Job {
    fn from(command: WorkerCommand) -> Self {
        match command {
            WorkerCommand::StartProcessing { iterations } => Job::new(iterations),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    pub job_id: u64,
    pub iterations: u64,
    pub value: f64,
    pub elapsed_ms: u64,
}

impl JobResult {
    /// Human-readable summary carried by the COMPLETE message.
    pub fn summary(&self) -> String {
        format!(
            "Computed {} iterations in {}ms. Final result: {:.2}",
            self.iterations, self.elapsed_ms, self.value
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobFailure {
    pub job_id: u64,
    pub reason: String,
}

/// Everything a running job reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Progress { job_id: u64, percent: u8 },
    Completed(JobResult),
    Failed(JobFailure),
}

impl JobEvent {
    pub fn job_id(&self) -> u64 {
        match self {
            JobEvent::Progress { job_id, .. } => *job_id,
            JobEvent::Completed(result) => result.job_id,
            JobEvent::Failed(failure) => failure.job_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobEvent::Progress { .. })
    }

    /// The wire message the page controller sees for this event.
    pub fn to_message(&self) -> WorkerMessage {
        match self {
            JobEvent::Progress { percent, .. } => WorkerMessage::Progress { progress: *percent },
            JobEvent::Completed(result) => WorkerMessage::Complete { result: result.summary() },
            JobEvent::Failed(failure) => WorkerMessage::Error { error: failure.reason.clone() },
        }
    }
}

/// Receiving side of a started job.
#[derive(Debug)]
pub struct JobHandle {
    job: Job,
    events: mpsc::UnboundedReceiver<JobEvent>,
    cancel: Arc<AtomicBool>,
}

impl JobHandle {
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Next event, or None once the job thread has finished or was cancelled.
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }

    /// Ask the job to stop at its next progress boundary.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Skip progress and wait for the outcome.
    pub async fn wait(mut self) -> Result<JobResult, Error> {
        while let Some(event) = self.events.recv().await {
            match event {
                JobEvent::Progress { .. } => {}
                JobEvent::Completed(result) => return Ok(result),
                JobEvent::Failed(failure) => return Err(Error::WorkerFault(failure.reason)),
            }
        }
        Err(Error::WorkerFault(format!("job {} ended without a result", self.job.id)))
    }
}

/// Runs one job in an isolated thread.
#[derive(Debug)]
pub struct ComputeWorker {
    kernel: Kernel,
    progress_interval: Option<u64>,
    background_execution: bool,
    used: AtomicBool,
    active: OnceLock<(u64, Arc<AtomicBool>)>,
}

impl Default for ComputeWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeWorker {
    pub fn new() -> Self {
        Self {
            kernel: trig_sum_step,
            progress_interval: None,
            background_execution: true,
            used: AtomicBool::new(false),
            active: OnceLock::new(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            progress_interval: config.progress_interval,
            background_execution: config.capabilities.has_background_execution,
            ..Self::new()
        }
    }

    /// Replace the per-iteration kernel.
    pub fn with_kernel(mut self, kernel: Kernel) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_progress_interval(mut self, every: u64) -> Self {
        self.progress_interval = Some(every);
        self
    }

    /// Start `job` on a new thread.
    pub fn start(&self, job: Job) -> Result<JobHandle, Error> {
        if !self.background_execution {
            return Err(Error::CapabilityMissing("background execution is disabled".into()));
        }
        if job.iterations <= 0 {
            return Err(Error::InvalidJob(format!("iterations must be positive, got {}", job.iterations)));
        }
        if self.progress_interval == Some(0) {
            return Err(Error::InvalidJob("progress interval must be positive".into()));
        }
        if self.used.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidJob("worker already ran a job; use a fresh worker".into()));
        }

        let iterations = job.iterations.unsigned_abs();
        let interval = self.progress_interval.unwrap_or_else(|| (iterations / 100).max(1));
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, events) = mpsc::unbounded_channel();
        let _ = self.active.set((job.id, Arc::clone(&cancel)));

        let run = JobRun { job_id: job.id, iterations, interval, kernel: self.kernel, cancel: Arc::clone(&cancel), tx };
        thread::Builder::new()
            .name(format!("compute-{}", job.id))
            .spawn(move || run.execute())
            .map_err(|e| Error::WorkerFault(format!("failed to spawn worker thread: {e}")))?;

        tracing::debug!(job_id = job.id, iterations, interval, "compute job started");
        Ok(JobHandle { job, events, cancel })
    }

    /// Handle a wire command.
    pub fn dispatch(&self, command: WorkerCommand) -> Result<JobHandle, Error> {
        self.start(Job::from(command))
    }

    /// Cancel the running job if it has this id. Returns whether it matched.
    pub fn cancel(&self, job_id: u64) -> bool {
        match self.active.get() {
            Some((id, flag)) if *id == job_id => {
                flag.store(true, Ordering::Relaxed);
                tracing::debug!(job_id, "compute job cancelled");
                true
            }
            _ => false,
        }
    }
}

struct JobRun {
    job_id: u64,
    iterations: u64,
    interval: u64,
    kernel: Kernel,
    cancel: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<JobEvent>,
}

impl JobRun {
    fn execute(self) {
        let start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.accumulate()));

        let event = match outcome {
            Ok(Ok(Some(value))) => {
                if self.tx.send(JobEvent::Progress { job_id: self.job_id, percent: 100 }).is_err() {
                    return;
                }
                JobEvent::Completed(JobResult {
                    job_id: self.job_id,
                    iterations: self.iterations,
                    value,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                })
            }
            Ok(Ok(None)) => return,
            Ok(Err(reason)) => JobEvent::Failed(JobFailure { job_id: self.job_id, reason }),
            Err(payload) => JobEvent::Failed(JobFailure { job_id: self.job_id, reason: panic_reason(payload.as_ref()) }),
        };

        if let JobEvent::Failed(failure) = &event {
            tracing::warn!(job_id = self.job_id, reason = %failure.reason, "compute job failed");
        }
        let _ = self.tx.send(event);
    }

    /// Ok(None) means the job was cancelled or nobody is listening any more.
    fn accumulate(&self) -> Result<Option<f64>, String> {
        let mut acc = 0.0_f64;
        for i in 0..self.iterations {
            if i % self.interval == 0 {
                if self.cancel.load(Ordering::Relaxed) {
                    return Ok(None);
                }
                let percent = ((u128::from(i) * 100) / u128::from(self.iterations)).min(99) as u8;
                if self.tx.send(JobEvent::Progress { job_id: self.job_id, percent }).is_err() {
                    return Ok(None);
                }
            }
            acc += (self.kernel)(i);
        }

        if self.cancel.load(Ordering::Relaxed) {
            return Ok(None);
        }
        if !acc.is_finite() {
            return Err(format!("accumulator is not finite: {acc}"));
        }
        Ok(Some(acc))
    }
}

fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("worker panicked: {message}")
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn collect(mut handle: JobHandle) -> Vec<JobEvent> {
        let mut events = Vec::new();
        while let Some(event) = handle.next_event().await {
            events.push(event);
        }
        events
    }

    fn progress_values(events: &[JobEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                JobEvent::Progress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_rejects_non_positive_iterations() {
        let worker = ComputeWorker::new();
        assert!(matches!(worker.start(Job::new(0)), Err(Error::InvalidJob(_))));
        assert!(matches!(worker.start(Job::new(-5)), Err(Error::InvalidJob(_))));
    }

    #[test]
    fn test_capability_missing() {
        let mut config = AppConfig::default();
        config.capabilities.has_background_execution = false;
        let worker = ComputeWorker::from_config(&config);
        assert!(matches!(worker.start(Job::new(10)), Err(Error::CapabilityMissing(_))));
    }

    #[tokio::test]
    async fn test_million_iterations_complete() {
        let worker = ComputeWorker::new();
        let handle = worker.start(Job::new(1_000_000)).unwrap();
        let job_id = handle.job().id;
        let events = collect(handle).await;

        let progress = progress_values(&events);
        assert!(progress.len() >= 100);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.iter().filter(|p| **p == 100).count(), 1);

        let n = events.len();
        assert_eq!(events[n - 2], JobEvent::Progress { job_id, percent: 100 });
        let JobEvent::Completed(result) = &events[n - 1] else {
            panic!("expected completion, got {:?}", events[n - 1]);
        };
        assert_eq!(result.iterations, 1_000_000);
        assert!(result.summary().starts_with("Computed 1000000 iterations in "));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_custom_progress_interval() {
        let worker = ComputeWorker::new().with_kernel(|_| 1.0).with_progress_interval(2);
        let handle = worker.start(Job::new(10)).unwrap();
        let events = collect(handle).await;

        assert_eq!(progress_values(&events), vec![0, 20, 40, 60, 80, 100]);
        let JobEvent::Completed(result) = events.last().unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(result.value, 10.0);
        assert!(result.summary().ends_with("Final result: 10.00"));
    }

    #[tokio::test]
    async fn test_tiny_job_still_reports() {
        let worker = ComputeWorker::new();
        let events = collect(worker.start(Job::new(1)).unwrap()).await;
        assert_eq!(progress_values(&events), vec![0, 100]);
    }

    #[tokio::test]
    async fn test_worker_is_single_use() {
        let worker = ComputeWorker::new();
        let first = worker.start(Job::new(10)).unwrap();
        assert!(matches!(worker.start(Job::new(10)), Err(Error::InvalidJob(_))));
        assert!(first.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_panic_becomes_single_failure() {
        let worker = ComputeWorker::new().with_kernel(|i| if i == 10 { panic!("kernel exploded") } else { 0.0 });
        let events = collect(worker.start(Job::new(100)).unwrap()).await;

        let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        let JobEvent::Failed(failure) = terminal[0] else {
            panic!("expected failure");
        };
        assert!(failure.reason.contains("kernel exploded"));
        assert!(!progress_values(&events).contains(&100));
    }

    #[tokio::test]
    async fn test_non_finite_result_is_fault() {
        let worker = ComputeWorker::new().with_kernel(|_| f64::INFINITY);
        let result = worker.start(Job::new(5)).unwrap().wait().await;
        assert!(matches!(result, Err(Error::WorkerFault(_))));
    }

    #[tokio::test]
    async fn test_cancel_stops_without_result() {
        let worker = ComputeWorker::new()
            .with_kernel(|_| {
                std::thread::sleep(Duration::from_millis(1));
                1.0
            })
            .with_progress_interval(10);
        let mut handle = worker.start(Job::new(10_000)).unwrap();
        let job_id = handle.job().id;

        assert!(matches!(handle.next_event().await, Some(JobEvent::Progress { .. })));
        assert!(!worker.cancel(job_id + 1));
        assert!(worker.cancel(job_id));

        let rest = tokio::time::timeout(Duration::from_secs(5), collect(handle)).await.unwrap();
        assert!(rest.iter().all(|e| !e.is_terminal()));
    }

    #[tokio::test]
    async fn test_dispatch_wire_command() {
        let worker = ComputeWorker::new().with_kernel(|_| 0.5);
        let handle = worker.dispatch(WorkerCommand::StartProcessing { iterations: 4 }).unwrap();
        let events = collect(handle).await;

        let messages: Vec<WorkerMessage> = events.iter().map(JobEvent::to_message).collect();
        assert_eq!(messages.first(), Some(&WorkerMessage::Progress { progress: 0 }));
        match messages.last() {
            Some(WorkerMessage::Complete { result }) => assert!(result.ends_with("Final result: 2.00")),
            other => panic!("unexpected final message {other:?}"),
        }
    }
}
