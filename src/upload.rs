// Upload orchestration: validate the whole batch, then run the three remote
// stages (request target, transfer bytes, register attachment) for each
// file in input order. Validation failures abort the batch before any
// network call; a failure after that only affects its own file.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::api::AttachmentApi;
use crate::error::StageError;
use crate::summary::BatchSummary;
use crate::transfer::{CancelToken, FileTransfer, ProgressSink, TransferJob};
use crate::types::{FileAttachmentRequest, NewAttachment, UploadResult, ValidatedAttachment};
use crate::validate::{BatchValidationError, FileValidator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Human,
    Json,
}

/// Per-invocation settings, passed in explicitly rather than read from
/// process-wide state.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub output: OutputMode,
    pub quiet: bool,
    pub verbose: bool,
    pub cancel: CancelToken,
}

/// Hooks for the rendering layer. All methods default to no-ops.
pub trait UploadObserver: Send + Sync {
    fn file_started(&self, _index: usize, _file: &ValidatedAttachment) {}

    fn bytes_sent(&self, _index: usize, _sent: u64, _total: u64) {}

    fn file_finished(&self, _index: usize, _result: &UploadResult) {}
}

pub struct SilentObserver;

impl UploadObserver for SilentObserver {}

pub struct UploadOrchestrator<'a> {
    api: &'a dyn AttachmentApi,
    transfer: &'a dyn FileTransfer,
    validator: FileValidator,
    options: UploadOptions,
    observer: Arc<dyn UploadObserver>,
}

impl<'a> UploadOrchestrator<'a> {
    pub fn new(
        api: &'a dyn AttachmentApi,
        transfer: &'a dyn FileTransfer,
        options: UploadOptions,
    ) -> Self {
        Self {
            api,
            transfer,
            validator: FileValidator::default(),
            options,
            observer: Arc::new(SilentObserver),
        }
    }

    pub fn with_validator(mut self, validator: FileValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn UploadObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Attach every requested file to `issue_id`.
    ///
    /// Returns `Err` only when local validation fails, in which case no
    /// remote call has been made for any file. Otherwise every validated
    /// file has exactly one entry in the summary, in input order.
    /// Attachments registered before a later failure are kept.
    #[instrument(skip(self, requests), fields(files = requests.len()))]
    pub fn run(
        &self,
        issue_id: &str,
        requests: &[FileAttachmentRequest],
    ) -> Result<BatchSummary, BatchValidationError> {
        let files = self.validator.validate_all(requests)?;
        info!(files = files.len(), "validation passed, starting uploads");

        let mut results = Vec::with_capacity(files.len());
        for (index, file) in files.iter().enumerate() {
            let result = if self.options.cancel.is_cancelled() {
                UploadResult::failed(file, 0, StageError::Cancelled.stage(), StageError::Cancelled)
            } else {
                self.observer.file_started(index, file);
                self.upload_one(index, issue_id, file)
            };
            self.observer.file_finished(index, &result);
            results.push(result);
        }

        Ok(BatchSummary::summarize(results))
    }

    fn upload_one(&self, index: usize, issue_id: &str, file: &ValidatedAttachment) -> UploadResult {
        let fail = |attempts: u32, err: StageError| {
            warn!(path = %file.path().display(), stage = err.stage(), error = %err, "upload failed");
            UploadResult::failed(file, attempts, err.stage(), err)
        };

        let target = match self.api.request_upload_target(
            &file.content_type,
            &file.request.file_name(),
            file.size,
        ) {
            Ok(target) => target,
            Err(e) => return fail(0, StageError::UploadTargetRequestFailed(e)),
        };

        let job = TransferJob {
            path: file.path(),
            url: &target.upload_url,
            headers: &target.headers,
            size: file.size,
        };
        let observer = Arc::clone(&self.observer);
        let total = file.size;
        let sink: Arc<dyn ProgressSink> =
            Arc::new(move |sent: u64| observer.bytes_sent(index, sent, total));

        let attempts = match self.transfer.transfer(&job, sink) {
            Ok(attempts) => attempts,
            Err(failure) => {
                return fail(failure.attempts, StageError::TransferFailed(failure.error))
            }
        };

        let attachment = NewAttachment::for_upload(file, &target.asset_url);
        match self.api.register_attachment(issue_id, &attachment) {
            Ok(record) => {
                info!(path = %file.path().display(), id = %record.id, "attachment registered");
                UploadResult::succeeded(file, attempts, record)
            }
            Err(e) => fail(attempts, StageError::RegistrationFailed(e)),
        }
    }
}
