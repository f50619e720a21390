//! Download-and-remux engine for multi-part Bilibili videos.
//!
//! The pipeline fetches asset metadata, negotiates an encoding variant pair
//! per part, downloads the chosen variants concurrently with progress
//! feedback, and merges them into one container file per part through an
//! external ffmpeg process. Rendering (progress bars, prompts) stays outside
//! this crate behind the [`progress::ProgressSink`] and
//! [`bili_api::VariantPicker`] seams.

pub mod download;
pub mod error;
pub mod filename;
pub mod pipeline;
pub mod progress;
pub mod remux;

pub use download::{DownloadConfig, DownloadResult, DownloadTask, Downloader, StreamRole};
pub use error::{DownloadError, PipelineError, RemuxError};
pub use filename::sanitize_filename;
pub use pipeline::{PartReport, Pipeline, PipelineConfig, RunReport};
pub use progress::{NullSink, ProgressSink, ProgressTracker};
pub use remux::{RemuxConfig, RemuxJob, Remuxer};
