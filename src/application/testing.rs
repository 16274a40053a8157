//! Fakes shared by the application service tests.

use crate::adapters::local::{EventHub, Janitor, JsonFileStore};
use crate::application::runner::JobRunner;
use crate::application::status::StatusStore;
use crate::config::{ToolPaths, TMP_PREFIX};
use crate::domain::jobs::{Job, QueueEvent};
use crate::domain::stems::{separated_root, STEMS};
use crate::ports::fetch::{FetchError, FetchPort};
use crate::ports::power::PowerInhibitor;
use crate::ports::process::{ProcessError, ProcessPort};
use crate::ports::Cancellable;
use async_trait::async_trait;
use std::error::Error;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::Receiver;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ToolBehavior {
    pub separator_exit: i32,
    /// Stem the fake separator "forgets" to write.
    pub skip_stem: Option<&'static str>,
    pub mixer_writes_output: bool,
    /// Block every separator run until cancelled.
    pub block_separator: bool,
    /// Block separator runs whose media path contains this string.
    pub block_on: Option<&'static str>,
}

impl Default for ToolBehavior {
    fn default() -> Self {
        Self {
            separator_exit: 0,
            skip_stem: None,
            mixer_writes_output: true,
            block_separator: false,
            block_on: None,
        }
    }
}

impl ToolBehavior {
    fn blocks(&self, media: &str) -> bool {
        self.block_separator || self.block_on.is_some_and(|s| media.contains(s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub program: String,
    pub args: Vec<String>,
}

/// Stands in for the separation and mixing tools by writing their outputs.
#[derive(Clone)]
pub struct FakeTools {
    behavior: ToolBehavior,
    calls: Arc<Mutex<Vec<Call>>>,
    running: Arc<Notify>,
}

impl FakeTools {
    pub fn new(behavior: ToolBehavior) -> Self {
        Self {
            behavior,
            calls: Arc::default(),
            running: Arc::new(Notify::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Separator runs whose media path contains `needle`.
    pub fn separations_of(&self, needle: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.program == "demucs" && c.args[0].contains(needle))
            .count()
    }

    /// Resolves once a blocking separator run has started.
    pub async fn wait_until_running(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.running.notified())
            .await
            .expect("separator never started");
    }
}

#[async_trait]
impl ProcessPort for FakeTools {
    async fn run(
        &self,
        cwd: &Path,
        program: &str,
        args: Vec<OsString>,
        cancel: CancellationToken,
    ) -> Result<i32, ProcessError> {
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        self.calls.lock().unwrap().push(Call {
            program: program.to_string(),
            args: args.clone(),
        });

        if program == "demucs" {
            if self.behavior.blocks(&args[0]) {
                self.running.notify_one();
                cancel.cancelled().await;
                return Err(ProcessError::Signal(9));
            }
            let dir = separated_root(cwd).join("track");
            std::fs::create_dir_all(&dir).unwrap();
            for stem in STEMS {
                if self.behavior.skip_stem != Some(stem) {
                    std::fs::write(dir.join(format!("{stem}.wav")), stem).unwrap();
                }
            }
            Ok(self.behavior.separator_exit)
        } else {
            if self.behavior.mixer_writes_output {
                std::fs::write(args.last().unwrap(), b"mix").unwrap();
            }
            Ok(0)
        }
    }
}

impl Cancellable for FakeTools {
    fn cancel(&self) {}
}

pub struct FakeFetcher;

#[async_trait]
impl FetchPort for FakeFetcher {
    async fn fetch(
        &self,
        _source_id: &str,
        destination: &Path,
        _cancel: CancellationToken,
    ) -> Result<(), FetchError> {
        tokio::fs::write(destination, b"audio").await?;
        Ok(())
    }
}

impl Cancellable for FakeFetcher {
    fn cancel(&self) {}
}

pub struct NullInhibitor;

impl PowerInhibitor for NullInhibitor {
    fn acquire(&self) -> Result<u32, Box<dyn Error + Send + Sync>> {
        Ok(0)
    }

    fn release(&self, _id: u32) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}

/// A status store, temp root and output root inside one temp dir.
pub struct Harness {
    pub root: TempDir,
    pub hub: Arc<EventHub>,
    pub status: Arc<StatusStore>,
    pub tools: FakeTools,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_behavior(ToolBehavior::default())
    }

    pub fn with_behavior(behavior: ToolBehavior) -> Self {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("tmp")).unwrap();
        std::fs::create_dir_all(root.path().join("media")).unwrap();
        let store = Arc::new(JsonFileStore::open(root.path().join("config.json")).unwrap());
        let hub = Arc::new(EventHub::new());
        let status = Arc::new(StatusStore::load(store, hub.clone()));
        status.set_output_path(&root.path().join("out"));
        Self {
            root,
            hub,
            status,
            tools: FakeTools::new(behavior),
        }
    }

    pub fn tmp_root(&self) -> PathBuf {
        self.root.path().join("tmp")
    }

    pub fn output_root(&self) -> PathBuf {
        self.root.path().join("out")
    }

    pub fn local_job(&self, id: &str, title: &str) -> Job {
        let media = self.root.path().join("media").join(format!("{id}.wav"));
        std::fs::write(&media, b"pcm").unwrap();
        Job::local(id, title, media)
    }

    pub fn runner(&self) -> JobRunner {
        self.runner_with(Arc::new(self.tools.clone()), Arc::new(FakeFetcher))
    }

    pub fn runner_with(
        &self,
        process: Arc<dyn ProcessPort>,
        fetcher: Arc<dyn FetchPort>,
    ) -> JobRunner {
        self.runner_from(process, fetcher, Arc::new(NullInhibitor))
    }

    pub fn runner_from(
        &self,
        process: Arc<dyn ProcessPort>,
        fetcher: Arc<dyn FetchPort>,
        inhibitor: Arc<dyn PowerInhibitor>,
    ) -> JobRunner {
        JobRunner::new(
            self.status.clone(),
            process,
            fetcher,
            Janitor::new(self.tmp_root()).with_retry(2, Duration::from_millis(10)),
            inhibitor,
            ToolPaths::default(),
            None,
        )
    }

    /// Workspaces currently left under the temp root.
    pub fn workspaces(&self) -> usize {
        std::fs::read_dir(self.tmp_root())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(TMP_PREFIX))
            .count()
    }

    pub fn drain(&self, rx: &mut Receiver<QueueEvent>) -> Vec<QueueEvent> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) => return events,
                Err(e) => panic!("unexpected receive error: {e}"),
            }
        }
    }
}
