use super::Cancellable;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transfer cancelled")]
    Cancelled,
    #[error("invalid source url {0}")]
    InvalidUrl(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("remote responded with status {0}")]
    Status(u16),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Streams a remote source into a local file.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FetchPort: Cancellable {
    async fn fetch(
        &self,
        source_id: &str,
        destination: &Path,
        cancel: CancellationToken,
    ) -> Result<(), FetchError>;
}

#[cfg(test)]
impl Cancellable for MockFetchPort {
    fn cancel(&self) {}
}
