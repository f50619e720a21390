use bili_api::ApiError;
use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download cancelled")]
    Cancelled,

    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("response carried no readable body")]
    EmptyBody,

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("all download sources failed for {label}")]
    SourceExhausted { label: String },
}

impl DownloadError {
    /// Whether a failure on one source justifies trying the next backup URL.
    /// Client-side rejections (4xx) abort immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled | Self::SourceExhausted { .. } => false,
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::EmptyBody | Self::Network { .. } | Self::Io { .. } => true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RemuxError {
    #[error("failed to spawn merge process: {0}")]
    Spawn(std::io::Error),

    #[error("merge process failed ({status}): {stderr}")]
    Ffmpeg {
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("remux cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Remux(#[from] RemuxError),

    #[error("run cancelled")]
    Cancelled,
}

impl PipelineError {
    /// True when the failure is run-level cancellation rather than an error.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled
                | Self::Download(DownloadError::Cancelled)
                | Self::Remux(RemuxError::Cancelled)
        )
    }
}
