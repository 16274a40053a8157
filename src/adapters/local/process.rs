//! Supervises the external separation and mixing tools.

use super::slot::ActiveSlot;
use crate::config::ToolPaths;
use crate::ports::process::{ProcessError, ProcessPort};
use crate::ports::Cancellable;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Host variables passed through to children in addition to `PATH`.
const INHERITED_VARS: [&str; 6] = ["CUDA_PATH", "TEMP", "TMP", "TMPDIR", "HOME", "SYSTEMROOT"];

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Runs at most one child process at a time and kills its whole tree on cancel.
#[derive(Debug)]
pub struct ProcessSupervisor {
    env: Vec<(OsString, OsString)>,
    active: ActiveSlot,
}

impl ProcessSupervisor {
    pub fn new(tools: &ToolPaths) -> Self {
        Self {
            env: child_env(tools.search_path.as_deref()),
            active: ActiveSlot::default(),
        }
    }

    /// True while a child is being supervised.
    pub fn is_running(&self) -> bool {
        !self.active.is_empty()
    }
}

/// Child environment: bundled tool dirs replace the host `PATH` when present.
fn child_env(search_path: Option<&[PathBuf]>) -> Vec<(OsString, OsString)> {
    let mut env = Vec::new();
    let path = match search_path {
        Some(dirs) => std::env::join_paths(dirs).ok(),
        None => std::env::var_os("PATH"),
    };
    if let Some(path) = path {
        env.push((OsString::from("PATH"), path));
    }
    for key in INHERITED_VARS {
        if let Some(value) = std::env::var_os(key) {
            env.push((OsString::from(key), value));
        }
    }
    env
}

#[async_trait]
impl ProcessPort for ProcessSupervisor {
    async fn run(
        &self,
        cwd: &Path,
        program: &str,
        args: Vec<OsString>,
        cancel: CancellationToken,
    ) -> Result<i32, ProcessError> {
        let lease = self.active.seize(&cancel);

        let mut command = Command::new(program);
        command
            .args(&args)
            .current_dir(cwd)
            .env_clear()
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            command.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: program.to_string(),
            source,
        })?;
        let pid = child.id();
        info!(program, pid, "Spawned child process");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, "stderr"));
        }

        let status = tokio::select! {
            status = child.wait() => status,
            _ = lease.token().cancelled() => {
                if let Some(pid) = pid {
                    info!(pid, "Killing process tree");
                    kill_tree(pid).await;
                }
                if let Err(e) = child.start_kill() {
                    debug!("start_kill after tree kill: {e}");
                }
                child.wait().await
            }
        };
        let status = status.map_err(|source| ProcessError::Wait {
            program: program.to_string(),
            source,
        })?;

        exit_code(status)
    }
}

impl Cancellable for ProcessSupervisor {
    fn cancel(&self) {
        self.active.cancel();
    }
}

fn exit_code(status: ExitStatus) -> Result<i32, ProcessError> {
    if let Some(code) = status.code() {
        return Ok(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Err(ProcessError::Signal(signal));
        }
    }
    Err(ProcessError::Signal(-1))
}

async fn forward_output<R>(reader: R, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!("child {stream}: {line}"),
            Ok(None) => break,
            Err(e) => {
                debug!("child {stream} closed: {e}");
                break;
            }
        }
    }
}

/// Kill the process and all of its descendants. Best effort.
#[cfg(unix)]
async fn kill_tree(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    // The child leads its own process group, so the group id is its pid.
    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        warn!(pid, "tree kill failed: {e}");
    }
}

#[cfg(windows)]
async fn kill_tree(pid: u32) {
    let pid = pid.to_string();
    let result = Command::new("taskkill")
        .args(["/PID", &pid, "/T", "/F"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(e) = result {
        warn!(%pid, "taskkill failed: {e}");
    }
}

#[cfg(not(any(unix, windows)))]
async fn kill_tree(_pid: u32) {}
