// Byte transfer to a pre-signed upload target.
//
// One `transfer` call makes up to `RetryPolicy::max_attempts()` PUTs. Each
// attempt opens the file afresh and streams it from byte 0; the handle is
// owned by the request body and dropped when that attempt ends.
//
// PUTs go through the async client on a runtime owned by the executor. A
// storage target may answer (typically 403) before it has read the body and
// then drop the connection; the async client still hands back that status,
// where the blocking one only reports the broken body pipe.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE,
};
use reqwest::{Body, Client, StatusCode};
use thiserror::Error;
use tokio::runtime::Runtime;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, instrument, warn};

use crate::error::TransferError;

pub const UPLOAD_CONTENT_TYPE: &str = "application/octet-stream";
pub const UPLOAD_CACHE_CONTROL: &str = "public, max-age=31536000";

/// Per-attempt timeout, sized for 50 MiB bodies on slow links.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(300);

/// Receives the cumulative number of bytes sent in the current attempt.
/// A retried attempt starts counting from zero again.
pub trait ProgressSink: Send + Sync {
    fn report(&self, bytes_sent: u64);
}

impl<F> ProgressSink for F
where
    F: Fn(u64) + Send + Sync,
{
    fn report(&self, bytes_sent: u64) {
        self(bytes_sent)
    }
}

/// Sink for headless and JSON output.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _bytes_sent: u64) {}
}

/// Shared cancellation flag, tripped from the Ctrl-C handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless cancelled first. Returns `false` if the
    /// token was tripped before or during the wait.
    pub fn sleep(&self, duration: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(50);
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(SLICE.min(deadline - now));
        }
    }
}

/// Fixed backoff schedule. `delays[n]` is waited before attempt `n + 2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4),
        ])
    }
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Initial attempt plus one retry per configured delay.
    pub fn max_attempts(&self) -> u32 {
        self.delays.len() as u32 + 1
    }

    /// Delay to wait after a failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        self.delays.get(attempt as usize - 1).copied()
    }
}

/// One file's destination and body description.
#[derive(Debug, Clone, Copy)]
pub struct TransferJob<'a> {
    pub path: &'a Path,
    pub url: &'a str,
    pub headers: &'a [(String, String)],
    pub size: u64,
}

/// A terminal transfer failure plus how many attempts were made.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct TransferFailure {
    pub attempts: u32,
    pub error: TransferError,
}

/// Seam between the orchestrator and the network, so batch policy can be
/// tested without an HTTP server.
pub trait FileTransfer {
    /// Upload the file and return the number of attempts used.
    fn transfer(
        &self,
        job: &TransferJob<'_>,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<u32, TransferFailure>;
}

/// Streams files to pre-signed URLs with bounded retry. Holds no per-file
/// state; clones share the client and runtime.
#[derive(Clone)]
pub struct TransferExecutor {
    client: Client,
    runtime: Arc<Runtime>,
    policy: RetryPolicy,
    cancel: CancelToken,
}

/// Read size for the request body stream.
const CHUNK_SIZE: usize = 64 * 1024;

impl TransferExecutor {
    pub fn new(
        timeout: Duration,
        policy: RetryPolicy,
        cancel: CancelToken,
    ) -> Result<Self, TransferError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(TransferError::Runtime)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransferError::Network)?;
        Ok(Self {
            client,
            runtime: Arc::new(runtime),
            policy,
            cancel,
        })
    }

    fn attempt(
        &self,
        job: &TransferJob<'_>,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<(), TransferError> {
        self.runtime.block_on(self.send(job, progress))
    }

    async fn send(
        &self,
        job: &TransferJob<'_>,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<(), TransferError> {
        let headers = build_headers(job.headers, job.size)?;
        let file = tokio::fs::File::open(job.path)
            .await
            .map_err(|source| TransferError::Open {
                path: job.path.to_path_buf(),
                source,
            })?;

        let read_failed = Arc::new(AtomicBool::new(false));
        let body = progress_body(
            file,
            progress,
            self.cancel.clone(),
            Arc::clone(&read_failed),
        );

        let response = self
            .client
            .put(job.url)
            .headers(headers)
            .body(body)
            .send()
            .await;

        match response {
            Ok(response) => classify_status(response.status()),
            Err(_) if self.cancel.is_cancelled() => Err(TransferError::Cancelled),
            Err(_) if read_failed.load(Ordering::SeqCst) => {
                Err(TransferError::Read(job.path.to_path_buf()))
            }
            Err(e) => Err(TransferError::Network(e)),
        }
    }
}

impl FileTransfer for TransferExecutor {
    #[instrument(skip_all, fields(path = %job.path.display(), size = job.size))]
    fn transfer(
        &self,
        job: &TransferJob<'_>,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<u32, TransferFailure> {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 1;

        loop {
            debug!(attempt, max_attempts, "starting transfer attempt");
            let err = match self.attempt(job, Arc::clone(&progress)) {
                Ok(()) => {
                    info!(attempt, "transfer complete");
                    return Ok(attempt);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                warn!(attempt, error = %err, "transfer failed, not retrying");
                return Err(TransferFailure {
                    attempts: attempt,
                    error: err,
                });
            }

            let Some(delay) = self.policy.delay_after(attempt) else {
                warn!(attempt, error = %err, "transfer retries exhausted");
                return Err(TransferFailure {
                    attempts: attempt,
                    error: TransferError::Exhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    },
                });
            };

            warn!(attempt, error = %err, delay_ms = delay.as_millis() as u64, "transfer failed, retrying");
            if !self.cancel.sleep(delay) {
                return Err(TransferFailure {
                    attempts: attempt,
                    error: TransferError::Cancelled,
                });
            }
            attempt += 1;
        }
    }
}

/// Fixed upload headers first, then the target's headers replayed verbatim.
/// A name the target supplies drops the fixed header of that name; repeated
/// target names are all sent.
fn build_headers(extra: &[(String, String)], size: u64) -> Result<HeaderMap, TransferError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(UPLOAD_CONTENT_TYPE));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(UPLOAD_CACHE_CONTROL));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(size));

    let mut replayed = Vec::with_capacity(extra.len());
    for (name, value) in extra {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| TransferError::InvalidHeader(name.clone()))?;
        let header_value =
            HeaderValue::from_str(value).map_err(|_| TransferError::InvalidHeader(name.clone()))?;
        replayed.push((header_name, header_value));
    }
    for (name, _) in &replayed {
        headers.remove(name);
    }
    for (name, value) in replayed {
        headers.append(name, value);
    }
    Ok(headers)
}

fn classify_status(status: StatusCode) -> Result<(), TransferError> {
    if status.is_success() {
        return Ok(());
    }
    Err(TransferError::Status {
        status: status.as_u16(),
        retryable: status.is_server_error(),
    })
}

/// Streams the file in chunks and reports cumulative bytes after each one.
/// The stream yields an error once the cancel token is tripped, which
/// aborts the request.
fn progress_body(
    file: tokio::fs::File,
    sink: Arc<dyn ProgressSink>,
    cancel: CancelToken,
    read_failed: Arc<AtomicBool>,
) -> Body {
    let mut sent = 0u64;
    let chunks = ReaderStream::with_capacity(file, CHUNK_SIZE).map(move |chunk| {
        if cancel.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::Other, "upload cancelled"));
        }
        let chunk = chunk.inspect_err(|_| read_failed.store(true, Ordering::SeqCst))?;
        sent += chunk.len() as u64;
        sink.report(sent);
        Ok(chunk)
    });
    Body::wrap_stream(chunks)
}
