//! Error taxonomy shared by the store, the services and the capture client.

use thiserror::Error;

/// Errors surfaced by lifecycle, storage and capture operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown token, unknown stage or missing artifact file.
    #[error("{0}")]
    NotFound(String),

    /// Malformed input: bad upload, illegal transition, empty artifact.
    #[error("{0}")]
    BadRequest(String),

    /// Missing or wrong admin credentials.
    #[error("{0}")]
    Unauthorized(String),

    /// The control channel could not reach the server.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// HTTP status code for this error.
    ///
    /// - NotFound: 404
    /// - BadRequest: 400
    /// - Unauthorized: 401
    /// - Transport: 502 (only produced client-side)
    /// - Io / Json: 500
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::BadRequest(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Transport(_) => 502,
            Self::Io(_) | Self::Json(_) => 500,
        }
    }

    /// Rebuild a typed error from an HTTP status and the server's detail message.
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match status {
            404 => Self::NotFound(detail),
            400 | 422 => Self::BadRequest(detail),
            401 | 403 => Self::Unauthorized(detail),
            _ => Self::Transport(format!("HTTP {status}: {detail}")),
        }
    }

    /// True for failures worth retrying on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Io(_))
    }
}
