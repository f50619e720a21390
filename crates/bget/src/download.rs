//! Streaming download manager.
//!
//! Drives the fetch of one selected variant's byte stream into a uniquely
//! named temporary file, reporting per-chunk progress and honoring run-level
//! cancellation. A variant's backup URLs are tried in order when the primary
//! source fails with a retryable error.

use std::fmt;
use std::path::PathBuf;

use futures::StreamExt;
use reqwest::header::HeaderMap;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DownloadError;
use crate::progress::{ProgressSink, ProgressTracker};

/// Which elementary stream a task carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StreamRole {
    Video,
    Audio,
    /// Legacy single-file stream carrying both tracks.
    Combined,
}

impl StreamRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Combined => "combined",
        }
    }
}

impl fmt::Display for StreamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fetch of one selected variant.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub cid: u64,
    pub role: StreamRole,
    pub url: String,
    pub backup_urls: Vec<String>,
    /// Human-readable progress label.
    pub label: String,
}

/// Outcome of a task. Carries the task itself so callers can associate
/// results under out-of-order completion.
#[derive(Debug)]
pub struct DownloadResult {
    pub task: DownloadTask,
    pub temp_path: PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Headers attached to every media request (User-Agent, Referer tied to
    /// the owning asset, auth cookie).
    pub headers: HeaderMap,
    /// Directory for temporary files.
    pub tmp_dir: PathBuf,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            headers: HeaderMap::new(),
            tmp_dir: std::env::temp_dir(),
        }
    }
}

impl DownloadConfig {
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_tmp_dir(mut self, tmp_dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = tmp_dir.into();
        self
    }
}

pub struct Downloader {
    client: reqwest::Client,
    config: DownloadConfig,
}

impl Downloader {
    pub fn new(config: DownloadConfig) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, config })
    }

    /// Download one task, failing over to its backup URLs on retryable
    /// source errors.
    pub async fn download(
        &self,
        task: &DownloadTask,
        sink: &dyn ProgressSink,
        token: &CancellationToken,
    ) -> Result<DownloadResult, DownloadError> {
        let sources = std::iter::once(task.url.as_str())
            .chain(task.backup_urls.iter().map(String::as_str));

        for (attempt, url) in sources.enumerate() {
            if attempt > 0 {
                info!(cid = task.cid, role = %task.role, url = %url, "switching to backup source");
            }
            match self.fetch_to_temp(task, url, sink, token).await {
                Ok(result) => return Ok(result),
                Err(err) if err.is_retryable() => {
                    warn!(cid = task.cid, role = %task.role, url = %url, error = %err, "source failed");
                }
                Err(err) => return Err(err),
            }
        }

        Err(DownloadError::SourceExhausted {
            label: task.label.clone(),
        })
    }

    /// Download a set of tasks with bounded concurrency.
    ///
    /// All tasks run to completion; when any of them fails, the temp files
    /// of the ones that succeeded are removed before the first error is
    /// returned, so a failed set never leaks partial inputs.
    pub async fn download_all(
        &self,
        tasks: Vec<DownloadTask>,
        limit: usize,
        sink: &dyn ProgressSink,
        token: &CancellationToken,
    ) -> Result<Vec<DownloadResult>, DownloadError> {
        let outcomes: Vec<Result<DownloadResult, DownloadError>> =
            futures::stream::iter(tasks.iter().map(|task| self.download(task, sink, token)))
                .buffer_unordered(limit.max(1))
                .collect()
                .await;

        let mut results = Vec::with_capacity(outcomes.len());
        let mut first_err = None;
        for outcome in outcomes {
            match outcome {
                Ok(result) => results.push(result),
                Err(err) if first_err.is_none() => first_err = Some(err),
                Err(err) => warn!(error = %err, "additional task failure"),
            }
        }

        if let Some(err) = first_err {
            for result in &results {
                remove_temp(&result.temp_path).await;
            }
            return Err(err);
        }
        Ok(results)
    }

    async fn fetch_to_temp(
        &self,
        task: &DownloadTask,
        url: &str,
        sink: &dyn ProgressSink,
        token: &CancellationToken,
    ) -> Result<DownloadResult, DownloadError> {
        let response = tokio::select! {
            _ = token.cancelled() => return Err(DownloadError::Cancelled),
            response = self.client.get(url).headers(self.config.headers.clone()).send() => response?,
        };

        if !response.status().is_success() {
            return Err(DownloadError::HttpStatus {
                status: response.status(),
                url: url.to_string(),
            });
        }

        let total = response.content_length();
        debug!(cid = task.cid, role = %task.role, total = ?total, "download started");

        fs::create_dir_all(&self.config.tmp_dir).await?;
        let temp_path = self.config.tmp_dir.join(format!(
            "{}_{}_{}.tmp",
            task.cid,
            task.role,
            Uuid::new_v4().simple()
        ));

        let tracker = sink.tracker(total, &task.label);
        let written = self
            .write_body(response, &temp_path, tracker.as_ref(), token)
            .await;
        tracker.finish();

        match written {
            Ok(0) => {
                remove_temp(&temp_path).await;
                Err(DownloadError::EmptyBody)
            }
            Ok(bytes) => {
                info!(cid = task.cid, role = %task.role, bytes, "download finished");
                Ok(DownloadResult {
                    task: task.clone(),
                    temp_path,
                    bytes,
                })
            }
            Err(err) => {
                remove_temp(&temp_path).await;
                Err(err)
            }
        }
    }

    async fn write_body(
        &self,
        response: reqwest::Response,
        path: &PathBuf,
        tracker: &dyn ProgressTracker,
        token: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        let mut file = fs::File::create(path).await?;
        let mut stream = response.bytes_stream();
        let mut bytes: u64 = 0;

        loop {
            tokio::select! {
                _ = token.cancelled() => return Err(DownloadError::Cancelled),
                chunk = stream.next() => match chunk {
                    Some(Ok(chunk)) => {
                        file.write_all(&chunk).await?;
                        bytes += chunk.len() as u64;
                        tracker.advance(chunk.len() as u64);
                    }
                    Some(Err(err)) => return Err(err.into()),
                    None => break,
                },
            }
        }

        file.flush().await?;
        Ok(bytes)
    }
}

/// Best-effort temp removal. Failures are logged, never escalated.
async fn remove_temp(path: &PathBuf) {
    if let Err(err) = fs::remove_file(path).await
        && err.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %err, "failed to remove temp file");
    }
}
