use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("multipart error: {0}")]
    Multipart(#[from] MultipartError),

    #[error("no file uploaded")]
    NoFile,

    #[error("invalid file type: {0}")]
    InvalidFileType(String),

    #[error("file too large: {size} > {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("hub unavailable")]
    HubUnavailable,

    #[error("log storage disabled")]
    LogsDisabled,

    #[error("log query failed: {0}")]
    LogQuery(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Multipart(e) => e.status(),
            Self::NoFile | Self::InvalidFileType(_) => StatusCode::BAD_REQUEST,
            Self::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::HubUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::LogsDisabled => StatusCode::NOT_FOUND,
            Self::LogQuery(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to HTTP clients. Internal details stay in the logs.
    fn public_message(&self) -> &'static str {
        match self {
            Self::NoFile => "No file uploaded",
            Self::InvalidFileType(_) => "Invalid file type",
            Self::TooLarge { .. } => "File too large",
            Self::HubUnavailable => "Server shutting down",
            Self::LogsDisabled => "Log storage disabled",
            Self::LogQuery(_) => "Log query failed",
            Self::Multipart(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => "File too large",
            Self::Io(_) | Self::Multipart(_) => "Upload failed",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        (status, Json(serde_json::json!({ "error": self.public_message() }))).into_response()
    }
}
