use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("identity fetch failed: {reason}")]
    Auth { reason: String },

    #[error("video `{bvid}` not found (code {code}): {message}")]
    NotFound {
        bvid: String,
        code: i64,
        message: String,
    },

    #[error("stream unavailable (code {code}): {message}")]
    StreamUnavailable { code: i64, message: String },

    #[error("stream descriptor contains no usable variants")]
    NoVariants,

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed API response: {0}")]
    Json(#[from] serde_json::Error),
}
