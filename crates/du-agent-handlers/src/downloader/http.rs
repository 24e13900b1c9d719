//! HTTP(S) payload downloads.

use std::path::Path;
use std::time::{Duration, Instant};

use du_agent_workflow::{CancelToken, FileEntity};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;

use super::{ContentDownloader, DownloadRequest, ProgressFn};
use crate::error::{HandlerError, Result};

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Downloads payloads over HTTP, retrying until the request's retry window
/// closes.
///
/// Handler calls are synchronous and run on blocking worker threads, so the
/// transfer is driven on the agent's runtime through a [`Handle`].
#[derive(Debug, Clone)]
pub struct HttpContentDownloader {
    client: reqwest::Client,
    runtime: Handle,
    retry_delay: Duration,
}

impl HttpContentDownloader {
    /// Create a downloader with a default client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(runtime: Handle) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self::with_client(client, runtime))
    }

    /// Create a downloader with a custom reqwest client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, runtime: Handle) -> Self {
        Self {
            client,
            runtime,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Set the pause between attempts.
    #[must_use]
    pub const fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    async fn fetch(&self, url: &str, target: &Path, cancel: &CancelToken) -> Result<u64> {
        let response = self.client.get(url).send().await?.error_for_status()?;

        let mut file = tokio::fs::File::create(target).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(HandlerError::Cancelled);
            }
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

impl ContentDownloader for HttpContentDownloader {
    fn download(
        &self,
        entity: &FileEntity,
        request: &DownloadRequest<'_>,
        progress: &ProgressFn,
    ) -> Result<u64> {
        let Some(url) = entity
            .download_uri
            .as_deref()
            .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
        else {
            let uri = entity.download_uri.clone().unwrap_or_default();
            return Err(request.fail(entity, progress, 0, HandlerError::UnsupportedUri(uri)));
        };

        let deadline = Instant::now() + request.retry_timeout;
        let mut attempt = 0u32;
        loop {
            if request.cancel.is_cancelled() {
                return Err(request.fail(entity, progress, 0, HandlerError::Cancelled));
            }

            attempt += 1;
            tracing::debug!(file_id = %entity.file_id, url, attempt, "Downloading");
            match self
                .runtime
                .block_on(self.fetch(url, request.target, request.cancel))
            {
                Ok(bytes) => {
                    let bytes = request.finish(entity, progress, bytes)?;
                    tracing::info!(file_id = %entity.file_id, bytes, "Download completed");
                    return Ok(bytes);
                }
                Err(HandlerError::Cancelled) => {
                    tracing::info!(file_id = %entity.file_id, attempt, "Download cancelled");
                    return Err(request.fail(entity, progress, 0, HandlerError::Cancelled));
                }
                Err(e) if Instant::now() + self.retry_delay < deadline => {
                    tracing::warn!(file_id = %entity.file_id, attempt, error = %e, "Download attempt failed, retrying");
                    std::thread::sleep(self.retry_delay);
                }
                Err(e) => {
                    tracing::error!(file_id = %entity.file_id, attempt, error = %e, "Download failed");
                    let error = HandlerError::Transfer(e.to_string());
                    return Err(request.fail(entity, progress, 0, error));
                }
            }
        }
    }
}
