//! The job scheduler: slots, queue, dispatch and retention.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::SchedulerConfig;
use super::types::{SchedulerError, SchedulerStats};
use crate::adapter::FailureKind;
use crate::job::{
    CancelRequest, Job, JobFailure, JobHandle, JobId, JobOutput, JobRequest, JobRunner, JobState,
    JobUpdate,
};
use crate::metrics;

const UPDATE_CHANNEL_CAPACITY: usize = 1024;

/// Everything the scheduler mutates, guarded by one lock.
///
/// Lock order is scheduler state first, then a job's own lock.
struct State {
    accepting: bool,
    /// Runtime job tasks are spawned on, captured by `start`.
    runtime: Option<tokio::runtime::Handle>,
    free_slots: Vec<usize>,
    queue: VecDeque<JobHandle>,
    jobs: HashMap<JobId, JobHandle>,
    done: u64,
    failed: u64,
    cancelled: u64,
}

impl State {
    fn running(&self, capacity: usize) -> usize {
        capacity - self.free_slots.len()
    }

    fn record_finished(&mut self, state: JobState) {
        match state {
            JobState::Done => self.done += 1,
            JobState::Failed => self.failed += 1,
            JobState::Cancelled => self.cancelled += 1,
            _ => return,
        }
        metrics::JOBS_FINISHED
            .with_label_values(&[state.as_str()])
            .inc();
    }

    fn publish_gauges(&self, capacity: usize) {
        metrics::JOBS_RUNNING.set(self.running(capacity) as i64);
        metrics::JOBS_QUEUED.set(self.queue.len() as i64);
    }
}

struct Shared {
    config: SchedulerConfig,
    runner: JobRunner,
    state: Mutex<State>,
    updates: broadcast::Sender<JobUpdate>,
    idle: Notify,
    shutdown_tx: broadcast::Sender<()>,
}

/// Returns a slot to the pool when a job task ends, however it ends.
struct SlotGuard {
    shared: Arc<Shared>,
    slot: usize,
    handle: JobHandle,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let state = self.handle.state();
        if !state.is_terminal() {
            error!(job_id = %self.handle.id(), state = %state, "Job task ended without a terminal state");
            let _ = self.handle.fail(JobFailure {
                stage: state.stage(),
                kind: FailureKind::Fatal,
                message: "job task ended unexpectedly".to_string(),
                diagnostic: None,
            });
        }

        let idle = {
            let mut guarded = self.shared.state.lock();
            guarded.free_slots.push(self.slot);
            guarded.record_finished(self.handle.state());
            guarded.publish_gauges(self.shared.config.max_concurrent_jobs);
            guarded.free_slots.len() == self.shared.config.max_concurrent_jobs
        };
        debug!(job_id = %self.handle.id(), slot = self.slot, "Released slot");

        if idle {
            self.shared.idle.notify_waiters();
        }
        dispatch(&self.shared);
    }
}

/// Grants free slots to queued jobs in FIFO order and spawns their tasks.
///
/// Tasks go to the runtime `start` ran on, so callers need no runtime
/// context of their own.
fn dispatch(shared: &Arc<Shared>) {
    let mut granted = Vec::new();
    let runtime = {
        let mut state = shared.state.lock();
        // Admission opens together with the runtime being set.
        let Some(runtime) = state.runtime.clone() else {
            debug_assert!(state.queue.is_empty(), "jobs queued before start");
            return;
        };
        while let Some(slot) = state.free_slots.pop() {
            let Some(handle) = state.queue.pop_front() else {
                state.free_slots.push(slot);
                break;
            };
            // Queued -> Downloading happens under the scheduler lock, so a
            // concurrent cancel either removed the job from the queue or
            // finds it running.
            match handle.transition(JobState::Downloading) {
                Ok(_) => granted.push((slot, handle)),
                Err(e) => {
                    warn!(job_id = %handle.id(), error = %e, "Skipping undispatchable job");
                    state.free_slots.push(slot);
                }
            }
        }
        state.publish_gauges(shared.config.max_concurrent_jobs);
        runtime
    };

    for (slot, handle) in granted {
        debug!(job_id = %handle.id(), slot, "Granted slot");
        let guard = SlotGuard {
            shared: Arc::clone(shared),
            slot,
            handle: handle.clone(),
        };
        runtime.spawn(async move {
            guard.shared.runner.run(&handle).await;
            drop(guard);
        });
    }
}

/// Admits jobs, runs at most `max_concurrent_jobs` of them at once and keeps
/// finished jobs around for status queries until the retention window ends.
///
/// # Example
///
/// ```rust,ignore
/// use mediafetch_core::scheduler::{JobScheduler, SchedulerConfig};
///
/// let scheduler = JobScheduler::new(SchedulerConfig::default(), runner);
/// scheduler.start().await?;
///
/// let id = scheduler.submit_url("https://example.test/v/1", "mp3")?;
/// let job = scheduler.wait(&id).await?;
/// println!("{} -> {:?}", job.state, scheduler.result(&id));
///
/// scheduler.shutdown().await;
/// ```
pub struct JobScheduler {
    shared: Arc<Shared>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl JobScheduler {
    /// Create a scheduler. Nothing is admitted until [`JobScheduler::start`].
    pub fn new(config: SchedulerConfig, runner: JobRunner) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(1);
        let state = State {
            accepting: false,
            runtime: None,
            free_slots: (0..config.max_concurrent_jobs).rev().collect(),
            queue: VecDeque::new(),
            jobs: HashMap::new(),
            done: 0,
            failed: 0,
            cancelled: 0,
        };

        Self {
            shared: Arc::new(Shared {
                config,
                runner,
                state: Mutex::new(state),
                updates,
                idle: Notify::new(),
                shutdown_tx,
            }),
            sweeper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Prepares the workspace base, starts the retention sweeper and opens
    /// admission.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.shared.state.lock().accepting {
            warn!("Scheduler already running");
            return Ok(());
        }

        let removed = self.shared.runner.workspaces().prepare().await?;
        info!(
            max_concurrent_jobs = self.shared.config.max_concurrent_jobs,
            queue_capacity = self.shared.config.queue_capacity,
            stale_workspaces = removed,
            "Starting job scheduler"
        );

        let sweeper = self.spawn_sweeper();
        if let Some(previous) = self.sweeper.lock().replace(sweeper) {
            previous.abort();
        }
        let mut state = self.shared.state.lock();
        state.runtime = Some(tokio::runtime::Handle::current());
        state.accepting = true;
        Ok(())
    }

    /// Admits a job into `Queued` without waiting for it to run.
    pub fn submit(&self, request: JobRequest) -> Result<JobId, SchedulerError> {
        let id = JobId::generate();
        let admitted = {
            let mut state = self.shared.state.lock();
            let capacity = self.shared.config.max_concurrent_jobs;
            if !state.accepting {
                Err(SchedulerError::NotRunning)
            } else if state.free_slots.is_empty()
                && state.queue.len() >= self.shared.config.queue_capacity
            {
                Err(SchedulerError::CapacityExceeded {
                    running: state.running(capacity),
                    queued: state.queue.len(),
                })
            } else {
                let handle =
                    JobHandle::new(Job::new(id.clone(), request), self.shared.updates.clone());
                state.jobs.insert(id.clone(), handle.clone());
                state.queue.push_back(handle);
                state.publish_gauges(capacity);
                Ok(())
            }
        };

        if let Err(e) = admitted {
            metrics::JOBS_REJECTED
                .with_label_values(&[e.rejection_reason()])
                .inc();
            warn!(error = %e, "Rejected job");
            return Err(e);
        }

        metrics::JOBS_SUBMITTED.inc();
        info!(job_id = %id, "Admitted job");
        dispatch(&self.shared);
        Ok(id)
    }

    /// Validates `url` and `format` and submits the job.
    pub fn submit_url(&self, url: &str, format: &str) -> Result<JobId, SchedulerError> {
        let request = JobRequest::parse(url, format).map_err(|e| {
            metrics::JOBS_REJECTED
                .with_label_values(&["invalid_request"])
                .inc();
            SchedulerError::from(e)
        })?;
        self.submit(request)
    }

    /// Snapshot of one job.
    pub fn status(&self, id: &JobId) -> Result<Job, SchedulerError> {
        self.handle(id).map(|handle| handle.snapshot())
    }

    /// Snapshots of every retained job, oldest first.
    pub fn list(&self) -> Vec<Job> {
        let handles: Vec<JobHandle> = self.shared.state.lock().jobs.values().cloned().collect();
        let mut jobs: Vec<Job> = handles.iter().map(JobHandle::snapshot).collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        jobs
    }

    /// Cancels a job.
    ///
    /// A queued job is `Cancelled` when this returns. A running job is
    /// signalled and reaches `Cancelled` once its process and workspace are
    /// torn down.
    pub fn cancel(&self, id: &JobId) -> Result<CancelRequest, SchedulerError> {
        let handle = {
            let mut state = self.shared.state.lock();
            let handle = state
                .jobs
                .get(id)
                .cloned()
                .ok_or_else(|| SchedulerError::NotFound(id.clone()))?;

            if let Some(pos) = state.queue.iter().position(|queued| queued.id() == *id) {
                state.queue.remove(pos);
                if let Err(e) = handle.cancel_queued() {
                    error!(job_id = %id, error = %e, "Failed to cancel queued job");
                    return Err(SchedulerError::InvalidState {
                        id: id.clone(),
                        state: handle.state(),
                    });
                }
                state.record_finished(JobState::Cancelled);
                state.publish_gauges(self.shared.config.max_concurrent_jobs);
                info!(job_id = %id, "Cancelled queued job");
                return Ok(CancelRequest::Cancelled);
            }
            handle
        };

        let outcome = handle.request_cancel();
        match outcome {
            CancelRequest::Signalled => info!(job_id = %id, "Signalled running job to cancel"),
            CancelRequest::TooLate => debug!(job_id = %id, "Job is finalizing, cancel ignored"),
            _ => {}
        }
        Ok(outcome)
    }

    /// Final output of a job.
    pub fn result(&self, id: &JobId) -> Result<JobOutput, SchedulerError> {
        let job = self.status(id)?;
        match job.state {
            JobState::Done => job.output.ok_or(SchedulerError::InvalidState {
                id: job.id,
                state: JobState::Done,
            }),
            JobState::Failed => Err(SchedulerError::Failed {
                failure: job.failure.unwrap_or_else(|| JobFailure {
                    stage: None,
                    kind: FailureKind::Fatal,
                    message: "unknown failure".to_string(),
                    diagnostic: None,
                }),
                id: job.id,
            }),
            JobState::Cancelled => Err(SchedulerError::Cancelled(job.id)),
            state => Err(SchedulerError::Pending { id: job.id, state }),
        }
    }

    /// Forgets a finished job and deletes its delivered output.
    pub async fn delete(&self, id: &JobId) -> Result<(), SchedulerError> {
        {
            let mut state = self.shared.state.lock();
            let handle = state
                .jobs
                .get(id)
                .ok_or_else(|| SchedulerError::NotFound(id.clone()))?;
            let job_state = handle.state();
            if !job_state.is_terminal() {
                return Err(SchedulerError::InvalidState {
                    id: id.clone(),
                    state: job_state,
                });
            }
            state.jobs.remove(id);
        }

        remove_output(&self.shared, id).await;
        info!(job_id = %id, "Deleted job");
        Ok(())
    }

    /// Purges finished jobs older than the retention window. Returns how
    /// many were removed.
    pub async fn purge_expired(&self) -> usize {
        purge_expired(&self.shared, Utc::now()).await
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.shared.state.lock();
        let capacity = self.shared.config.max_concurrent_jobs;
        SchedulerStats {
            accepting: state.accepting,
            running: state.running(capacity),
            queued: state.queue.len(),
            capacity,
            queue_capacity: self.shared.config.queue_capacity,
            retained: state.jobs.len(),
            done: state.done,
            failed: state.failed,
            cancelled: state.cancelled,
        }
    }

    /// Receiver of every state change and progress update.
    pub fn subscribe(&self) -> broadcast::Receiver<JobUpdate> {
        self.shared.updates.subscribe()
    }

    /// Waits until the job reaches a terminal state and returns its snapshot.
    pub async fn wait(&self, id: &JobId) -> Result<Job, SchedulerError> {
        let mut updates = self.subscribe();
        loop {
            let job = self.status(id)?;
            if job.state.is_terminal() {
                return Ok(job);
            }
            match updates.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return self.status(id),
            }
        }
    }

    /// Stops admission, cancels queued and running jobs and waits until
    /// every slot is free again.
    pub async fn shutdown(&self) {
        let capacity = self.shared.config.max_concurrent_jobs;
        let running = {
            let mut state = self.shared.state.lock();
            state.accepting = false;

            let queued: Vec<JobHandle> = state.queue.drain(..).collect();
            for handle in &queued {
                if handle.cancel_queued().is_ok() {
                    state.record_finished(JobState::Cancelled);
                }
            }
            state.publish_gauges(capacity);

            let running: Vec<JobHandle> = state
                .jobs
                .values()
                .filter(|handle| handle.state().is_active())
                .cloned()
                .collect();
            info!(
                queued = queued.len(),
                running = running.len(),
                "Shutting down job scheduler"
            );
            running
        };

        let _ = self.shared.shutdown_tx.send(());
        for handle in &running {
            handle.request_cancel();
        }

        loop {
            let idle = self.shared.idle.notified();
            if self.shared.state.lock().free_slots.len() == capacity {
                break;
            }
            idle.await;
        }

        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.await;
        }
        info!("Job scheduler stopped");
    }

    fn handle(&self, id: &JobId) -> Result<JobHandle, SchedulerError> {
        self.shared
            .state
            .lock()
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| SchedulerError::NotFound(id.clone()))
    }

    fn spawn_sweeper(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let mut shutdown_rx = shared.shutdown_tx.subscribe();
        let interval = Duration::from_secs(shared.config.sweep_interval_secs.max(1));

        tokio::spawn(async move {
            debug!("Retention sweeper started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(interval) => {
                        let purged = purge_expired(&shared, Utc::now()).await;
                        if purged > 0 {
                            info!(purged, "Purged expired jobs");
                        }
                    }
                }
            }
            debug!("Retention sweeper stopped");
        })
    }
}

async fn purge_expired(shared: &Shared, now: DateTime<Utc>) -> usize {
    let retention = Duration::from_secs(shared.config.retention_secs);
    let expired: Vec<JobId> = {
        let mut state = shared.state.lock();
        let expired: Vec<JobId> = state
            .jobs
            .values()
            .map(JobHandle::snapshot)
            .filter(|job| {
                job.state.is_terminal()
                    && job
                        .finished_at
                        .and_then(|at| (now - at).to_std().ok())
                        .map(|age| age >= retention)
                        .unwrap_or(false)
            })
            .map(|job| job.id)
            .collect();
        for id in &expired {
            state.jobs.remove(id);
        }
        expired
    };

    for id in &expired {
        remove_output(shared, id).await;
    }
    expired.len()
}

async fn remove_output(shared: &Shared, id: &JobId) {
    let dir = shared.runner.workspaces().output_dir_for(id.as_str());
    match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => debug!(job_id = %id, path = %dir.display(), "Removed job output"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(job_id = %id, path = %dir.display(), error = %e, "Failed to remove job output"),
    }
}
