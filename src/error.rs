// Error taxonomy for the attachment pipeline.
//
// Local validation errors fail the whole batch before any network call.
// Stage errors belong to a single file and are turned into an
// `UploadResult` by the orchestrator instead of being propagated.

use std::path::PathBuf;
use thiserror::Error;

/// Why a file was rejected during the local pre-flight checks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("path is a directory: {0}")]
    IsDirectory(PathBuf),
    #[error("not a regular file: {0}")]
    NotRegularFile(PathBuf),
    #[error("file too large: {size} bytes (max {max} bytes)")]
    TooLarge { size: u64, max: u64 },
    #[error("title must not be empty")]
    EmptyTitle,
    #[error("could not detect content type: {0}")]
    ContentTypeDetectionFailed(String),
}

impl ValidationError {
    /// Short machine-friendly category, used in JSON reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::PermissionDenied(_) => "permission_denied",
            Self::IsDirectory(_) => "is_directory",
            Self::NotRegularFile(_) => "not_regular_file",
            Self::TooLarge { .. } => "too_large",
            Self::EmptyTitle => "empty_title",
            Self::ContentTypeDetectionFailed(_) => "content_type_detection_failed",
        }
    }
}

/// Failure of a single byte transfer to the pre-signed upload target.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("could not start the upload runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("could not open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not read {0} while uploading")]
    Read(PathBuf),
    #[error("upload target returned an unusable header: {0}")]
    InvalidHeader(String),
    #[error("upload target responded with HTTP {status}")]
    Status { status: u16, retryable: bool },
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
    #[error("upload cancelled")]
    Cancelled,
    #[error("upload failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<TransferError>,
    },
}

impl TransferError {
    /// 5xx responses and transport failures may succeed on a later attempt.
    /// Everything else (4xx, local I/O, cancellation) is terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { retryable, .. } => *retryable,
            Self::Network(_) => true,
            _ => false,
        }
    }
}

/// Errors returned by the remote API client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("API responded with HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("API error: {0}")]
    GraphQl(String),
    #[error("{0} was not successful")]
    Unsuccessful(&'static str),
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// A per-file failure in one of the three remote stages.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("requesting upload target failed: {0}")]
    UploadTargetRequestFailed(#[source] ApiError),
    #[error("transfer failed: {0}")]
    TransferFailed(#[source] TransferError),
    #[error("registering attachment failed: {0}")]
    RegistrationFailed(#[source] ApiError),
    #[error("cancelled before upload started")]
    Cancelled,
}

impl StageError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::UploadTargetRequestFailed(_) => "request_upload_target",
            Self::TransferFailed(_) => "transfer",
            Self::RegistrationFailed(_) => "register_attachment",
            Self::Cancelled => "cancelled",
        }
    }
}
