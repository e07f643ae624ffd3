// Library root
// -----------
// This crate exposes the attachment pipeline behind the `linear` binary.
//
// Module responsibilities:
// - `validate`: local pre-flight checks and content-type detection.
// - `transfer`: streaming PUT to a pre-signed URL with bounded retry.
// - `upload`: batch orchestration of the three remote stages.
// - `summary`: reduces per-file outcomes into a batch report.
// - `api`: blocking GraphQL client for the attachment mutations.
// - `cli` / `ui`: argument parsing, dispatch and terminal rendering.
pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod summary;
pub mod transfer;
pub mod types;
pub mod ui;
pub mod upload;
pub mod validate;

pub use api::{ApiClient, AttachmentApi};
pub use cli::{exit_status, run, Cli};
pub use config::Config;
pub use error::{ApiError, StageError, TransferError, ValidationError};
pub use summary::{BatchSummary, FailureDetail};
pub use transfer::{CancelToken, FileTransfer, ProgressSink, RetryPolicy, TransferExecutor};
pub use types::{AttachmentRecord, FileAttachmentRequest, UploadResult, ValidatedAttachment};
pub use upload::{OutputMode, UploadObserver, UploadOptions, UploadOrchestrator};
pub use validate::{BatchValidationError, FileValidator, ValidationOutcome, MAX_UPLOAD_BYTES};
