//! External remux invocation.
//!
//! Merges the downloaded elementary streams of one part into a single
//! container by driving an `ffmpeg` child process with codec copy. The
//! output is written to a staging path and only renamed into place on the
//! process's success signal, so the output directory never holds a partial
//! file. Input temp files are deleted on success and failure alike.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RemuxError;
use crate::progress::ProgressSink;

/// How many trailing stderr lines to keep for error reporting.
const STDERR_TAIL_LINES: usize = 8;

/// One merge of a part's downloaded streams into its final container file.
#[derive(Debug, Clone)]
pub struct RemuxJob {
    pub cid: u64,
    pub output_path: PathBuf,
    /// Ordered inputs; ffmpeg treats the first input's streams as primary.
    pub inputs: Vec<PathBuf>,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct RemuxConfig {
    pub ffmpeg_path: String,
}

impl Default for RemuxConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
        }
    }
}

impl RemuxConfig {
    pub fn with_ffmpeg_path(mut self, path: impl Into<String>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }
}

pub struct Remuxer {
    config: RemuxConfig,
}

impl Remuxer {
    pub fn new() -> Self {
        Self::with_config(RemuxConfig::default())
    }

    pub fn with_config(config: RemuxConfig) -> Self {
        Self { config }
    }

    fn build_args(job: &RemuxJob, staging: &Path) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-nostats".to_string(),
        ];
        for input in &job.inputs {
            args.extend(["-i".to_string(), input.to_string_lossy().into_owned()]);
        }
        args.extend([
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            "copy".to_string(),
            "-f".to_string(),
            "matroska".to_string(),
        ]);
        args.push(staging.to_string_lossy().into_owned());
        args
    }

    /// Run the merge. Returns the final output path on success.
    pub async fn remux(
        &self,
        job: &RemuxJob,
        sink: &dyn ProgressSink,
        token: &CancellationToken,
    ) -> Result<PathBuf, RemuxError> {
        if let Some(parent) = job.output_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let staging = staging_path(&job.output_path);
        let tracker = sink.tracker(Some(1), &job.label);
        let merged = self.run_ffmpeg(job, &staging, token).await;

        // The inputs are consumed by this job on every outcome; a failed
        // merge must not orphan them either.
        for input in &job.inputs {
            if let Err(err) = fs::remove_file(input).await {
                warn!(path = %input.display(), error = %err, "failed to remove merge input");
            }
        }

        match merged {
            Ok(()) => {
                if let Err(err) = fs::rename(&staging, &job.output_path).await {
                    tracker.finish();
                    return Err(err.into());
                }
                tracker.advance(1);
                tracker.finish();
                info!(cid = job.cid, output = %job.output_path.display(), "remux finished");
                Ok(job.output_path.clone())
            }
            Err(err) => {
                if let Err(remove_err) = fs::remove_file(&staging).await
                    && remove_err.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(path = %staging.display(), error = %remove_err, "failed to remove staging file");
                }
                tracker.finish();
                Err(err)
            }
        }
    }

    async fn run_ffmpeg(
        &self,
        job: &RemuxJob,
        staging: &Path,
        token: &CancellationToken,
    ) -> Result<(), RemuxError> {
        let args = Self::build_args(job, staging);
        debug!(cid = job.cid, ffmpeg = %self.config.ffmpeg_path, args = ?args, "spawning merge process");

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(RemuxError::Spawn)?;

        // Drain stderr concurrently so the child never blocks on the pipe.
        let mut stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        tokio::select! {
            _ = token.cancelled() => {
                if let Err(err) = child.kill().await {
                    warn!(error = %err, "failed to kill merge process");
                }
                Err(RemuxError::Cancelled)
            }
            status = child.wait() => {
                let status = status?;
                let stderr = stderr_task.await.unwrap_or_default();
                if status.success() {
                    Ok(())
                } else {
                    Err(RemuxError::Ffmpeg {
                        status,
                        stderr: stderr_tail(&stderr),
                    })
                }
            }
        }
    }
}

impl Default for Remuxer {
    fn default() -> Self {
        Self::new()
    }
}

fn staging_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    output.with_file_name(name)
}

fn stderr_tail(stderr: &str) -> String {
    let mut lines: Vec<&str> = stderr.lines().rev().take(STDERR_TAIL_LINES).collect();
    lines.reverse();
    lines.join("\n")
}
