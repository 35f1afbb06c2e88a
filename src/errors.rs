use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Failed to read photo {filename}: {message}")]
    Read { filename: String, message: String },

    #[error("Failed to decode photo {filename}: {message}")]
    Decode { filename: String, message: String },

    #[error("Compression of {filename} timed out after {timeout_ms}ms")]
    CompressionTimeout { filename: String, timeout_ms: u64 },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("Upload rejected by server: {reason}")]
    ServerRejected { reason: String },

    #[error("Upload failed (retried {attempts} times)")]
    UploadExhausted { attempts: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Custom result type
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn read(filename: &str, err: impl std::fmt::Display) -> Self {
        Self::Read {
            filename: filename.to_string(),
            message: err.to_string(),
        }
    }

    pub fn decode(filename: &str, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            filename: filename.to_string(),
            message: err.to_string(),
        }
    }

    pub fn server_rejected(reason: Option<&str>) -> Self {
        Self::ServerRejected {
            reason: reason.unwrap_or("upload failed").to_string(),
        }
    }

    /// Failures of a single upload attempt. The attempt loop lowers quality
    /// and backs off on these.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Network(_)
                | AppError::HttpStatus { .. }
                | AppError::ServerRejected { .. }
                | AppError::Io(_)
                | AppError::Internal(_)
        ) || self.is_compression_failure()
    }

    pub fn is_compression_failure(&self) -> bool {
        matches!(
            self,
            AppError::Read { .. }
                | AppError::Decode { .. }
                | AppError::CompressionTimeout { .. }
                | AppError::Image(_)
        )
    }
}
