use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraServerError {
    #[error("Could not open camera device {index}: {message}")]
    DeviceUnavailable { index: u32, message: String },

    #[error("Frame read failed: {message}")]
    ReadFailure { message: String },

    #[error("JPEG encode failed: {message}")]
    EncodeFailed { message: String },

    #[error("Camera not found: {id}")]
    NotFound { id: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl CameraServerError {
    pub fn device_unavailable(index: u32, message: impl Into<String>) -> Self {
        Self::DeviceUnavailable { index, message: message.into() }
    }

    pub fn read_failure(message: impl Into<String>) -> Self {
        Self::ReadFailure { message: message.into() }
    }

    pub fn encode_failed(message: impl Into<String>) -> Self {
        Self::EncodeFailed { message: message.into() }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig { message: message.into() }
    }

    /// HTTP status the error maps to at the API boundary.
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::InvalidConfig { .. } => StatusCode::BAD_REQUEST,
            Self::DeviceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, CameraServerError>;
