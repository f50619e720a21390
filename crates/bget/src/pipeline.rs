//! Pipeline orchestration.
//!
//! Sequences one run: best-effort identity fetch, asset fetch, then per part
//! the unlocked stream fetch, variant selection, locked re-fetch, concurrent
//! downloads and the serialized remux. Per-part failures are collected into
//! the run report unless fail-fast is configured; run-level cancellation and
//! user prompt cancellation both short-circuit cleanly.

use std::path::PathBuf;
use std::sync::Arc;

use bili_api::{
    ApiError, AssetDescriptor, BiliClient, PartDescriptor, SelectedSpecification,
    StreamDescriptor, StreamPayload, VariantPicker, select_specification,
};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::download::{DownloadConfig, DownloadTask, Downloader, StreamRole};
use crate::error::PipelineError;
use crate::filename::sanitize_filename;
use crate::progress::ProgressSink;
use crate::remux::{RemuxJob, Remuxer};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub output_dir: PathBuf,
    pub tmp_dir: PathBuf,
    /// Concurrency bound for the downloads within one part.
    pub download_workers: usize,
    /// Concurrency bound across parts. The default of 1 completes each part,
    /// remux included, before the next part's analysis begins.
    pub part_workers: usize,
    /// Abort the run on the first part failure instead of collecting it.
    pub fail_fast: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            tmp_dir: std::env::temp_dir(),
            download_workers: 2,
            part_workers: 1,
            fail_fast: false,
        }
    }
}

impl PipelineConfig {
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_tmp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = dir.into();
        self
    }

    pub fn with_download_workers(mut self, workers: usize) -> Self {
        self.download_workers = workers;
        self
    }

    pub fn with_part_workers(mut self, workers: usize) -> Self {
        self.part_workers = workers;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }
}

/// Outcome of one part.
#[derive(Debug)]
pub struct PartReport {
    pub ordinal: u32,
    pub name: String,
    pub outcome: Result<PathBuf, PipelineError>,
}

/// Outcome of a whole run.
#[derive(Debug)]
pub struct RunReport {
    pub title: String,
    /// True when the user cancelled an interactive pick; remaining parts
    /// were skipped and the run counts as a clean exit.
    pub cancelled: bool,
    pub parts: Vec<PartReport>,
}

impl RunReport {
    pub fn failed(&self) -> usize {
        self.parts.iter().filter(|p| p.outcome.is_err()).count()
    }

    pub fn succeeded(&self) -> usize {
        self.parts.len() - self.failed()
    }
}

pub struct Pipeline {
    client: BiliClient,
    remuxer: Remuxer,
    config: PipelineConfig,
    sink: Arc<dyn ProgressSink>,
    picker: Arc<dyn VariantPicker>,
    token: CancellationToken,
}

impl Pipeline {
    pub fn new(
        client: BiliClient,
        config: PipelineConfig,
        sink: Arc<dyn ProgressSink>,
        picker: Arc<dyn VariantPicker>,
        token: CancellationToken,
    ) -> Self {
        Self {
            client,
            remuxer: Remuxer::new(),
            config,
            sink,
            picker,
            token,
        }
    }

    pub fn with_remuxer(mut self, remuxer: Remuxer) -> Self {
        self.remuxer = remuxer;
        self
    }

    /// Run the full pipeline for one asset.
    pub async fn run(&self, bvid: &str) -> Result<RunReport, PipelineError> {
        // Identity is display-only context; its failure never blocks the run.
        match self.client.fetch_identity().await {
            Ok(user) => {
                info!(id = user.id, name = %user.name, privileged = user.is_privileged, "authenticated")
            }
            Err(err) => warn!(error = %err, "proceeding without identity"),
        }

        let asset = self.client.fetch_asset(bvid).await?;
        info!(bvid = %asset.bvid, title = %asset.title, parts = asset.parts.len(), "asset resolved");

        let downloader = Downloader::new(
            DownloadConfig::default()
                .with_headers(self.client.download_headers(&asset.bvid))
                .with_tmp_dir(self.config.tmp_dir.clone()),
        )?;

        // Parts flow through an order-preserving buffer: one worker means a
        // part is fully remuxed before the next starts, more is an explicit
        // opt-in to concurrent parts. A child token lets fail-fast and
        // prompt cancellation stop in-flight siblings while the stream is
        // drained, so their cleanup still runs.
        let parts_token = self.token.child_token();
        let asset_ref = &asset;
        let downloader_ref = &downloader;
        let mut outcomes = futures::stream::iter(asset.parts.iter().map(|part| {
            let token = parts_token.clone();
            async move {
                if token.is_cancelled() {
                    return (part, Err(PipelineError::Cancelled));
                }
                let outcome = self
                    .process_part(asset_ref, part, downloader_ref, &token)
                    .await;
                (part, outcome)
            }
        }))
        .buffered(self.config.part_workers.max(1));

        let mut parts = Vec::with_capacity(asset.parts.len());
        let mut cancelled = false;
        let mut fatal: Option<PipelineError> = None;

        while let Some((part, outcome)) = outcomes.next().await {
            match outcome {
                Ok(Some(output)) => parts.push(PartReport {
                    ordinal: part.ordinal,
                    name: part.name.clone(),
                    outcome: Ok(output),
                }),
                Ok(None) => {
                    info!(part = %part.name, "selection cancelled by user");
                    cancelled = true;
                    parts_token.cancel();
                }
                Err(err) if err.is_cancelled() => {
                    // Either the run-level interrupt or a sibling shutdown;
                    // only the former is the run's outcome.
                    if fatal.is_none() && !cancelled {
                        fatal = Some(PipelineError::Cancelled);
                    }
                }
                Err(err) => {
                    warn!(bvid = %asset.bvid, part = %part.name, error = %err, "part failed");
                    if self.config.fail_fast {
                        parts_token.cancel();
                        if fatal.is_none() {
                            fatal = Some(err);
                        }
                    } else {
                        parts.push(PartReport {
                            ordinal: part.ordinal,
                            name: part.name.clone(),
                            outcome: Err(err),
                        });
                    }
                }
            }
        }
        drop(outcomes);

        self.sink.clear();
        if !cancelled && let Some(err) = fatal {
            return Err(err);
        }
        Ok(RunReport {
            title: asset.title,
            cancelled,
            parts,
        })
    }

    /// Analyze, download and remux one part. `Ok(None)` means the user
    /// cancelled an interactive pick.
    async fn process_part(
        &self,
        asset: &AssetDescriptor,
        part: &PartDescriptor,
        downloader: &Downloader,
        token: &CancellationToken,
    ) -> Result<Option<PathBuf>, PipelineError> {
        info!(part = %part.name, cid = part.cid, "analyzing part");

        let context = format!("{} - {}", asset.title, part.name);
        let descriptor = self.client.fetch_stream(&asset.bvid, part.cid, None).await?;

        let Some(spec) = select_specification(&descriptor, &context, self.picker.as_ref())? else {
            return Ok(None);
        };
        info!(
            video = spec.video.id,
            audio = spec.audio.as_ref().map(|a| a.id),
            "specification selected"
        );

        // Second phase: re-fetch locked to the chosen quality. The playback
        // URLs are scoped to the requested tier, so only this response's
        // URLs are authoritative.
        let locked = self
            .client
            .fetch_stream(&asset.bvid, part.cid, Some(spec.video.id))
            .await?;

        let tasks = build_tasks(&locked, &spec, part.cid, &context)?;
        let mut results = downloader
            .download_all(tasks, self.config.download_workers, self.sink.as_ref(), token)
            .await?;

        // Video first: the merge treats the first input's streams as primary.
        results.sort_by_key(|r| r.task.role);

        let output_path = self.config.output_dir.join(format!(
            "{}_{}.mkv",
            sanitize_filename(&asset.title),
            sanitize_filename(&part.name)
        ));
        let job = RemuxJob {
            cid: part.cid,
            output_path,
            inputs: results.iter().map(|r| r.temp_path.clone()).collect(),
            label: format!("[REMUX] {context}"),
        };

        let output = self.remuxer.remux(&job, self.sink.as_ref(), token).await?;
        Ok(Some(output))
    }
}

/// Build the download tasks for a part from the locked stream offer.
///
/// The locked offer must still carry the chosen variant ids; a provider that
/// answers the lock with an emptier descriptor would otherwise make the part
/// download nothing silently.
fn build_tasks(
    locked: &StreamDescriptor,
    spec: &SelectedSpecification,
    cid: u64,
    context: &str,
) -> Result<Vec<DownloadTask>, PipelineError> {
    let missing = |what: &str, id: u32| {
        PipelineError::Api(ApiError::StreamUnavailable {
            code: 0,
            message: format!("locked offer no longer carries {what} variant {id}"),
        })
    };

    match &locked.payload {
        StreamPayload::Dash {
            video,
            audio,
            dolby_audio,
        } => {
            let chosen_video = video
                .iter()
                .find(|v| v.id == spec.video.id)
                .ok_or_else(|| missing("video", spec.video.id))?;

            let mut tasks = vec![DownloadTask {
                cid,
                role: StreamRole::Video,
                url: chosen_video.base_url.clone(),
                backup_urls: chosen_video.backup_urls.clone(),
                label: format!("[VIDEO] {context}"),
            }];

            if let Some(chosen_audio) = &spec.audio {
                let audio = dolby_audio
                    .iter()
                    .chain(audio.iter())
                    .find(|a| a.id == chosen_audio.id)
                    .ok_or_else(|| missing("audio", chosen_audio.id))?;
                tasks.push(DownloadTask {
                    cid,
                    role: StreamRole::Audio,
                    url: audio.base_url.clone(),
                    backup_urls: audio.backup_urls.clone(),
                    label: format!("[AUDIO] {context}"),
                });
            }

            Ok(tasks)
        }
        StreamPayload::Durl(segment) => Ok(vec![DownloadTask {
            cid,
            role: StreamRole::Combined,
            url: segment.url.clone(),
            backup_urls: segment.backup_urls.clone(),
            label: format!("[VIDEO] {context}"),
        }]),
    }
}
