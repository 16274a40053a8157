use super::Cancellable;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("child process exited due to signal: {0}")]
    Signal(i32),
}

/// Runs one external tool at a time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessPort: Cancellable {
    /// Run `program` in `cwd` and wait for it. Resolves with the exit code,
    /// nonzero included; interpreting it is the caller's business.
    async fn run(
        &self,
        cwd: &Path,
        program: &str,
        args: Vec<OsString>,
        cancel: CancellationToken,
    ) -> Result<i32, ProcessError>;
}

#[cfg(test)]
impl Cancellable for MockProcessPort {
    fn cancel(&self) {}
}
