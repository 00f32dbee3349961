//! Error types for the remote's command paths.

use thiserror::Error;

/// Failures talking to the backend HTTP API.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Transport-level failure (connect, timeout, body read).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Backend answered but reported failure.
    #[error("backend rejected request (HTTP {status})")]
    Rejected { status: u16 },

    /// Reply carried `status: "error"`.
    #[error("backend reported an error")]
    Reported,

    /// Reply body did not match the expected shape.
    #[error("failed to decode reply: {0}")]
    Decode(String),

    /// No backend is configured or reachable.
    #[error("backend unavailable")]
    Unavailable,
}

/// Why a volume command did not produce a new confirmed volume.
#[derive(Error, Debug)]
pub enum VolumeError {
    /// Another volume command is still in flight or settling.
    #[error("a volume request is already pending")]
    Busy,

    #[error(transparent)]
    Api(#[from] ApiError),

    /// The reply arrived after the request was no longer tracked.
    #[error("volume reply discarded: no request pending")]
    Stale,

    /// The core loop has shut down.
    #[error("remote core is not running")]
    CoreGone,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
