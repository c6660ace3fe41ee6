use pvesync_engine::ApiError;
use thiserror::Error;

/// Errors building a client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid endpoint {0:?}: expected an http(s) URL")]
    InvalidEndpoint(String),

    #[error("API token contains characters not allowed in a header")]
    InvalidToken,

    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Maps a non-success response onto the engine's error type.
///
/// The platform reports a missing VM as 500 with a "does not exist" message
/// on most endpoints, so that counts as not found too.
pub(crate) fn classify(code: u16, message: String) -> ApiError {
    if code == 404 || (code == 500 && message.contains("does not exist")) {
        ApiError::NotFound
    } else {
        ApiError::Status { code, message }
    }
}

pub(crate) fn transport(err: reqwest::Error) -> ApiError {
    ApiError::Transport(err.to_string())
}
