//! The four-stage pipeline for one job: fetch, separate, verify, mix and publish.

use crate::adapters::local::Janitor;
use crate::application::status::StatusStore;
use crate::config::ToolPaths;
use crate::domain::jobs::{Job, JobStatus, MediaSource};
use crate::domain::stems::{self, INSTRUMENTAL};
use crate::ports::fetch::{FetchError, FetchPort};
use crate::ports::power::{InhibitGuard, PowerInhibitor};
use crate::ports::process::{ProcessError, ProcessPort};
use crate::ports::Cancellable;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use sysinfo::System;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// File name of the fetched remote media inside the workspace.
const FETCHED_MEDIA: &str = "yt-audio";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid media source for job {0}")]
    InvalidSource(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("{tool} exited with code {code}")]
    ToolFailed { tool: String, code: i32 },
    #[error("{0}")]
    MissingOutput(String),
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
    #[error("job was cancelled")]
    Cancelled,
}

/// How a run ended, from the queue's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Done(PathBuf),
    Failed,
    Cancelled,
}

pub struct JobRunner {
    status: Arc<StatusStore>,
    process: Arc<dyn ProcessPort>,
    fetcher: Arc<dyn FetchPort>,
    janitor: Janitor,
    inhibitor: Arc<dyn PowerInhibitor>,
    tools: ToolPaths,
    models_dir: Option<PathBuf>,
}

impl JobRunner {
    pub fn new(
        status: Arc<StatusStore>,
        process: Arc<dyn ProcessPort>,
        fetcher: Arc<dyn FetchPort>,
        janitor: Janitor,
        inhibitor: Arc<dyn PowerInhibitor>,
        tools: ToolPaths,
        models_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            status,
            process,
            fetcher,
            janitor,
            inhibitor,
            tools,
            models_dir,
        }
    }

    /// Run the whole pipeline for `job`, converting failures into an `error`
    /// status unless the run was cancelled.
    pub async fn run(&self, job: &Job, cancel: CancellationToken) -> RunOutcome {
        let _inhibit = InhibitGuard::acquire(self.inhibitor.as_ref());

        let workspace = match self.janitor.acquire_workspace().await {
            Ok(dir) => dir,
            Err(e) => {
                error!(job = %job.id, "Failed to create workspace: {}", e);
                return self.settle_failure(job, &cancel);
            }
        };

        let started = Instant::now();
        info!(job = %job.id, "BEGIN downloading/processing \"{}\"", job.title);
        let result = self.pipeline(job, &workspace, &cancel).await;
        self.janitor.release(&workspace).await;

        match result {
            Ok(dir) => {
                info!(
                    job = %job.id,
                    "DONE processing \"{}\" (finished in {} seconds)",
                    job.title,
                    started.elapsed().as_secs()
                );
                RunOutcome::Done(dir)
            }
            Err(e) => {
                warn!(job = %job.id, "Pipeline stopped: {}", e);
                self.settle_failure(job, &cancel)
            }
        }
    }

    /// A cleared status or a fired token means the user moved on; anything
    /// else is a genuine failure.
    fn settle_failure(&self, job: &Job, cancel: &CancellationToken) -> RunOutcome {
        if cancel.is_cancelled() || self.status.get_status(&job.id).is_none() {
            info!(job = %job.id, "Task was canceled by user.");
            RunOutcome::Cancelled
        } else {
            self.status.set_status(&job.id, JobStatus::Error, None);
            RunOutcome::Failed
        }
    }

    async fn pipeline(
        &self,
        job: &Job,
        workspace: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, PipelineError> {
        self.status
            .set_status(&job.id, JobStatus::Downloading, None);
        let media = self.fetch(job, workspace, cancel).await?;
        ensure_live(cancel)?;

        self.status
            .set_status(&job.id, JobStatus::Processing, None);
        let stems_dir = self.separate(job, &media, workspace, cancel).await?;
        ensure_live(cancel)?;

        let stems = stems::stem_paths(&stems_dir);
        for (_, path) in &stems {
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                error!(job = %job.id, "File {:?} does not exist", path);
                return Err(PipelineError::MissingOutput(String::from(
                    "Unable to access output stems - separation tool probably failed",
                )));
            }
        }

        let instrumental = workspace.join(format!("{INSTRUMENTAL}.wav"));
        self.mix(&stems, &instrumental, workspace, cancel).await?;
        ensure_live(cancel)?;

        let output = stems::output_dir(&self.status.output_path(), &job.title, &job.id);
        tokio::fs::create_dir_all(&output).await?;
        info!(job = %job.id, "Copying all stems to {:?}", output);
        for (stem, path) in &stems {
            tokio::fs::copy(path, output.join(format!("{stem}.wav"))).await?;
        }
        tokio::fs::copy(&instrumental, output.join(format!("{INSTRUMENTAL}.wav"))).await?;

        self.status
            .set_status(&job.id, JobStatus::Done, Some(output.clone()));
        Ok(output)
    }

    async fn fetch(
        &self,
        job: &Job,
        workspace: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, PipelineError> {
        match job.source {
            MediaSource::Remote => {
                let path = workspace.join(FETCHED_MEDIA);
                info!(job = %job.id, "Downloading remote source into {:?}", path);
                self.fetcher.fetch(&job.id, &path, cancel.clone()).await?;
                Ok(path)
            }
            MediaSource::Local => job
                .local_path
                .clone()
                .ok_or_else(|| PipelineError::InvalidSource(job.id.clone())),
        }
    }

    /// Run the separation tool and return the folder holding its stems.
    async fn separate(
        &self,
        job: &Job,
        media: &Path,
        workspace: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, PipelineError> {
        let workers = available_workers();
        let backend = self.status.backend();
        info!(
            job = %job.id,
            "Splitting; {} jobs using model \"{}\" ({:?} backend)",
            workers,
            stems::MODEL_NAME,
            backend
        );
        let args = stems::separation_args(media, workers, backend, self.models_dir.as_deref());
        let code = self
            .process
            .run(workspace, &self.tools.separator, args, cancel.clone())
            .await?;
        if code != 0 {
            return Err(PipelineError::ToolFailed {
                tool: self.tools.separator.clone(),
                code,
            });
        }

        find_output_dir(&stems::separated_root(workspace)).await
    }

    async fn mix(
        &self,
        stems: &[(&'static str, PathBuf)],
        output: &Path,
        workspace: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let stem = |name: &str| {
            stems
                .iter()
                .find(|(stem, _)| *stem == name)
                .map(|(_, path)| path.as_path())
                .ok_or_else(|| PipelineError::MissingOutput(format!("no {name} stem")))
        };
        let args = stems::mix_args(stem("bass")?, stem("drums")?, stem("other")?, output);

        info!("Mixing down instrumental stems to {:?}", output);
        let code = self
            .process
            .run(workspace, &self.tools.mixer, args, cancel.clone())
            .await?;
        if code != 0 {
            return Err(PipelineError::ToolFailed {
                tool: self.tools.mixer.clone(),
                code,
            });
        }
        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(PipelineError::MissingOutput(format!(
                "Unable to access instrumental file {:?} - mixing tool probably failed",
                output
            )));
        }
        Ok(())
    }
}

impl Cancellable for JobRunner {
    /// Interrupt whichever stage is in flight.
    fn cancel(&self) {
        self.fetcher.cancel();
        self.process.cancel();
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

/// First subdirectory of `root`; the separation tool writes one per input.
async fn find_output_dir(root: &Path) -> Result<PathBuf, PipelineError> {
    let missing =
        || PipelineError::MissingOutput(String::from("Unable to find separation output directory"));
    let mut entries = tokio::fs::read_dir(root).await.map_err(|_| missing())?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            return Ok(entry.path());
        }
    }
    Err(missing())
}

/// Separation workers for this machine right now.
pub fn available_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let mut system = System::new();
    system.refresh_memory();
    stems::worker_count(cpus, system.available_memory())
}
