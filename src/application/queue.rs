//! The queue manager: decides which single job is active and restarts the
//! pipeline whenever the head of the queue changes.

use crate::application::runner::{JobRunner, RunOutcome};
use crate::application::status::StatusStore;
use crate::domain::jobs::{Job, JobStatus};
use crate::ports::Cancellable;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Deferred work for the scheduling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Work {
    Start(Job),
}

pub type WorkReceiver = mpsc::UnboundedReceiver<Work>;

struct QueueState {
    items: Vec<Job>,
    /// Token of the pipeline currently running, if any.
    active: Option<CancellationToken>,
}

pub struct QueueManager {
    status: Arc<StatusStore>,
    runner: Arc<JobRunner>,
    state: Mutex<QueueState>,
    work_tx: mpsc::UnboundedSender<Work>,
}

impl QueueManager {
    /// The receiver must be handed to [`QueueManager::run`].
    pub fn new(status: Arc<StatusStore>, runner: Arc<JobRunner>) -> (Arc<Self>, WorkReceiver) {
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            status,
            runner,
            state: Mutex::new(QueueState {
                items: Vec::new(),
                active: None,
            }),
            work_tx,
        });
        (manager, work_rx)
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the queue with `jobs`, minus anything already finished.
    ///
    /// Never blocks and never starts a pipeline itself: when the head changes,
    /// the running pipeline is cancelled and a start is queued for the loop.
    /// Returns the accepted queue.
    pub fn submit(&self, jobs: Vec<Job>) -> Vec<Job> {
        let mut state = self.lock();
        self.replace_locked(&mut state, jobs)
    }

    /// Re-apply the filter to the current queue, dropping finished jobs.
    pub fn requeue(&self) -> Vec<Job> {
        let mut state = self.lock();
        let items = state.items.clone();
        self.replace_locked(&mut state, items)
    }

    /// Filter and replace in one critical section, so a concurrent `submit`
    /// can never be overwritten by an older snapshot.
    fn replace_locked(&self, state: &mut QueueState, jobs: Vec<Job>) -> Vec<Job> {
        let mut seen = HashSet::new();
        let accepted: Vec<Job> = jobs
            .into_iter()
            .filter(|job| seen.insert(job.id.clone()))
            .filter(|job| {
                let status = match self.status.get_status(&job.id) {
                    Some(status) => status,
                    None => {
                        self.status.set_status(&job.id, JobStatus::Queued, None);
                        JobStatus::Queued
                    }
                };
                !status.is_terminal()
            })
            .collect();

        let old_head = state.items.first().map(|job| job.id.clone());
        let new_head = accepted.first().cloned();
        state.items = accepted.clone();

        if old_head.as_deref() != new_head.as_ref().map(|job| job.id.as_str()) {
            debug!(from = ?old_head, to = ?new_head.as_ref().map(|j| &j.id), "Queue head changed");
            if let Some(token) = state.active.take() {
                info!("Interrupting active job");
                token.cancel();
                self.runner.cancel();
            }
            if let Some(job) = new_head {
                // The loop is gone only during shutdown.
                let _ = self.work_tx.send(Work::Start(job));
            }
        }
        accepted
    }

    pub fn items(&self) -> Vec<Job> {
        self.lock().items.clone()
    }

    /// True while a queued job is downloading or processing.
    pub fn is_busy(&self) -> bool {
        self.items().iter().any(|job| {
            self.status
                .get_status(&job.id)
                .is_some_and(JobStatus::is_active)
        })
    }

    /// The scheduling loop. Runs one pipeline at a time until every sender is gone.
    pub async fn run(self: Arc<Self>, mut work_rx: WorkReceiver) {
        while let Some(Work::Start(job)) = work_rx.recv().await {
            let token = {
                let mut state = self.lock();
                if state.items.first().map(|head| &head.id) != Some(&job.id) {
                    debug!(job = %job.id, "Skipping stale start");
                    continue;
                }
                let token = CancellationToken::new();
                state.active = Some(token.clone());
                token
            };

            let outcome = self.runner.run(&job, token.clone()).await;

            {
                let mut state = self.lock();
                if !token.is_cancelled() {
                    state.active = None;
                }
            }
            if outcome == RunOutcome::Cancelled {
                self.settle_cancelled(&job);
            }
            self.requeue();
        }
        debug!("Scheduling loop stopped");
    }

    /// An interrupted job must not stay `downloading`/`processing`: it goes
    /// back to `queued` if it is still waiting, otherwise it is forgotten.
    fn settle_cancelled(&self, job: &Job) {
        let active = self
            .status
            .get_status(&job.id)
            .is_some_and(JobStatus::is_active);
        if !active {
            return;
        }
        let still_queued = self.lock().items.iter().any(|item| item.id == job.id);
        if still_queued {
            self.status.set_status(&job.id, JobStatus::Queued, None);
        } else {
            self.status.clear(&job.id);
        }
    }
}
