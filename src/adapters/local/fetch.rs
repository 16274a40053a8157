//! Streaming download of remote sources into the job workspace.

use super::slot::ActiveSlot;
use crate::ports::fetch::{FetchError, FetchPort};
use crate::ports::Cancellable;
use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Write buffer for the destination file.
const WRITE_BUFFER: usize = 1024 * 1024;

pub struct HttpFetcher {
    client: reqwest::Client,
    url_template: String,
    active: ActiveSlot,
}

impl HttpFetcher {
    /// `url_template` must contain `{id}`, or be exactly `{id}` when job ids are URLs.
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url_template: url_template.into(),
            active: ActiveSlot::default(),
        }
    }

    pub fn source_url(&self, source_id: &str) -> Result<reqwest::Url, FetchError> {
        let raw = self.url_template.replace("{id}", source_id);
        reqwest::Url::parse(&raw).map_err(|_| FetchError::InvalidUrl(raw))
    }

    pub fn is_fetching(&self) -> bool {
        !self.active.is_empty()
    }

    async fn transfer(&self, url: reqwest::Url, destination: &Path) -> Result<u64, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let mut file = BufWriter::with_capacity(WRITE_BUFFER, File::create(destination).await?);
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::Network(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl FetchPort for HttpFetcher {
    async fn fetch(
        &self,
        source_id: &str,
        destination: &Path,
        cancel: CancellationToken,
    ) -> Result<(), FetchError> {
        let url = self.source_url(source_id)?;
        let lease = self.active.seize(&cancel);

        info!(source_id, "Downloading into {:?}", destination);
        let written = tokio::select! {
            biased;
            _ = lease.token().cancelled() => {
                info!(source_id, "Aborting download");
                return Err(FetchError::Cancelled);
            }
            result = self.transfer(url, destination) => result?,
        };
        info!(source_id, bytes = written, "Download finished");
        Ok(())
    }
}

impl Cancellable for HttpFetcher {
    fn cancel(&self) {
        self.active.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn endless_body() -> Body {
        let chunks = futures::stream::unfold((), |_| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Some((Ok::<_, std::io::Error>(vec![0u8; 1024]), ()))
        });
        Body::from_stream(chunks)
    }

    #[test]
    fn test_source_url_template() {
        let fetcher = HttpFetcher::new("https://media.example/{id}/audio");
        assert_eq!(
            fetcher.source_url("abc").unwrap().as_str(),
            "https://media.example/abc/audio"
        );
        assert!(matches!(
            HttpFetcher::new("{id}").source_url("not a url"),
            Err(FetchError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_writes_body_to_file() {
        let base = serve(Router::new().route("/:id", get(|| async { "hello stems" }))).await;
        let dir = tempdir().unwrap();
        let dest = dir.path().join("yt-audio");

        let fetcher = HttpFetcher::new(format!("{base}/{{id}}"));
        fetcher
            .fetch("abc", &dest, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "hello stems");
        assert!(!fetcher.is_fetching());
    }

    #[tokio::test]
    async fn test_fetch_rejects_error_status() {
        let base = serve(Router::new()).await;
        let dir = tempdir().unwrap();

        let fetcher = HttpFetcher::new(format!("{base}/{{id}}"));
        let result = fetcher
            .fetch("missing", &dir.path().join("out"), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(FetchError::Status(404))));
    }

    #[tokio::test]
    async fn test_cancel_aborts_transfer() {
        let base = serve(Router::new().route("/:id", get(|| async { endless_body() }))).await;
        let dir = tempdir().unwrap();
        let dest = dir.path().join("yt-audio");
        let fetcher = Arc::new(HttpFetcher::new(format!("{base}/{{id}}")));

        let handle = {
            let fetcher = fetcher.clone();
            let dest = dest.clone();
            tokio::spawn(async move { fetcher.fetch("abc", &dest, CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(fetcher.is_fetching());
        fetcher.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("transfer was not aborted")
            .unwrap();
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }

    #[tokio::test]
    async fn test_parent_token_aborts_transfer() {
        let base = serve(Router::new().route("/:id", get(|| async { endless_body() }))).await;
        let dir = tempdir().unwrap();
        let fetcher = HttpFetcher::new(format!("{base}/{{id}}"));
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                token.cancel();
            }
        };
        let out = dir.path().join("out");
        let (result, _) = tokio::join!(fetcher.fetch("abc", &out, token.clone()), canceller);
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }
}
