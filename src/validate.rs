// Local pre-flight checks run before any network call.
//
// Validation only reads file metadata and, when the extension is unknown,
// a bounded prefix of the file for content sniffing. Files are never
// modified.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::error::ValidationError;
use crate::types::{FileAttachmentRequest, ValidatedAttachment};

/// Largest file the upload target accepts (50 MiB).
pub const MAX_UPLOAD_BYTES: u64 = 52_428_800;

/// Number of leading bytes inspected when sniffing a content type.
pub const SNIFF_LEN: u64 = 512;

const OCTET_STREAM: &str = "application/octet-stream";
const TEXT_UTF8: &str = "text/plain; charset=utf-8";

/// Pass/fail record for one file of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub path: PathBuf,
    pub error: Option<ValidationError>,
}

impl ValidationOutcome {
    pub fn passed(&self) -> bool {
        self.error.is_none()
    }
}

/// Returned when at least one file of a batch fails validation. Lists
/// every failure, not just the first.
#[derive(Debug, Error)]
#[error("{} of {total} files failed validation", failures.len())]
pub struct BatchValidationError {
    pub total: usize,
    pub failures: Vec<ValidationOutcome>,
}

#[derive(Debug, Clone)]
pub struct FileValidator {
    max_size: u64,
}

impl Default for FileValidator {
    fn default() -> Self {
        Self {
            max_size: MAX_UPLOAD_BYTES,
        }
    }
}

impl FileValidator {
    pub fn with_max_size(max_size: u64) -> Self {
        Self { max_size }
    }

    /// Check that `path` is an existing, readable regular file within the
    /// size cap and return its size. Zero-byte files are accepted.
    pub fn validate(&self, path: &Path) -> Result<u64, ValidationError> {
        let meta = std::fs::metadata(path).map_err(|e| io_to_validation(e, path))?;
        if meta.is_dir() {
            return Err(ValidationError::IsDirectory(path.to_path_buf()));
        }
        // Opening a FIFO or device can block, so only regular files get probed.
        if !meta.file_type().is_file() {
            return Err(ValidationError::NotRegularFile(path.to_path_buf()));
        }
        // metadata() succeeds on unreadable files, so probe with an open.
        File::open(path).map_err(|e| io_to_validation(e, path))?;

        let size = meta.len();
        if size > self.max_size {
            return Err(ValidationError::TooLarge {
                size,
                max: self.max_size,
            });
        }
        Ok(size)
    }

    /// Guess the MIME type from the extension, falling back to sniffing the
    /// first 512 bytes. Only fails if the file cannot be opened or read.
    pub fn detect_content_type(&self, path: &Path) -> Result<String, ValidationError> {
        if let Some(mime) = mime_guess::from_path(path).first() {
            return Ok(mime.essence_str().to_string());
        }

        let detection_failed = |e: io::Error| {
            ValidationError::ContentTypeDetectionFailed(format!("{}: {}", path.display(), e))
        };
        let file = File::open(path).map_err(detection_failed)?;
        let mut head = Vec::with_capacity(SNIFF_LEN as usize);
        file.take(SNIFF_LEN)
            .read_to_end(&mut head)
            .map_err(detection_failed)?;

        let sniffed = sniff_content_type(&head);
        debug!(path = %path.display(), content_type = sniffed, "sniffed content type");
        Ok(sniffed.to_string())
    }

    /// Run every check for one request and resolve its size and content type.
    pub fn validate_request(
        &self,
        request: &FileAttachmentRequest,
    ) -> Result<ValidatedAttachment, ValidationError> {
        if request.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        let size = self.validate(&request.path)?;
        let content_type = self.detect_content_type(&request.path)?;
        Ok(ValidatedAttachment {
            request: request.clone(),
            size,
            content_type,
        })
    }

    /// Validate a whole batch. Either every request passes, or the caller
    /// gets all failures together and nothing is uploaded.
    pub fn validate_all(
        &self,
        requests: &[FileAttachmentRequest],
    ) -> Result<Vec<ValidatedAttachment>, BatchValidationError> {
        let mut validated = Vec::with_capacity(requests.len());
        let mut failures = Vec::new();

        for request in requests {
            match self.validate_request(request) {
                Ok(file) => validated.push(file),
                Err(error) => failures.push(ValidationOutcome {
                    path: request.path.clone(),
                    error: Some(error),
                }),
            }
        }

        if failures.is_empty() {
            Ok(validated)
        } else {
            Err(BatchValidationError {
                total: requests.len(),
                failures,
            })
        }
    }
}

fn io_to_validation(err: io::Error, path: &Path) -> ValidationError {
    match err.kind() {
        io::ErrorKind::NotFound => ValidationError::NotFound(path.to_path_buf()),
        // Anything else that stops us opening the file counts as unreadable.
        _ => ValidationError::PermissionDenied(path.to_path_buf()),
    }
}

/// Exact-prefix signatures, checked in order.
const SIGNATURES: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (b"%!PS-Adobe-", "application/postscript"),
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xFF\xD8\xFF", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"BM", "image/bmp"),
    (b"\x00\x00\x01\x00", "image/x-icon"),
    (b"\x1A\x45\xDF\xA3", "video/webm"),
    (b"OggS\x00", "application/ogg"),
    (b"ID3", "audio/mpeg"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1F\x8B\x08", "application/x-gzip"),
    (b"Rar!\x1A\x07", "application/x-rar-compressed"),
    (b"wOFF", "font/woff"),
    (b"wOF2", "font/woff2"),
    (b"\xEF\xBB\xBF", TEXT_UTF8),
    (b"\xFE\xFF", "text/plain; charset=utf-16be"),
    (b"\xFF\xFE", "text/plain; charset=utf-16le"),
];

/// Markup markers, matched case-insensitively after leading whitespace.
const MARKUP: &[(&[u8], &str)] = &[
    (b"<?xml", "text/xml; charset=utf-8"),
    (b"<!doctype html", "text/html; charset=utf-8"),
    (b"<html", "text/html; charset=utf-8"),
    (b"<head", "text/html; charset=utf-8"),
    (b"<body", "text/html; charset=utf-8"),
    (b"<svg", "image/svg+xml"),
];

/// Classify a file prefix by magic bytes. Anything unrecognised that
/// contains no control bytes is treated as UTF-8 text.
pub fn sniff_content_type(head: &[u8]) -> &'static str {
    if let Some(&(_, mime)) = SIGNATURES.iter().find(|(sig, _)| head.starts_with(sig)) {
        return mime;
    }

    // RIFF containers and ISO media keep their tag at an offset.
    if head.len() >= 12 && head.starts_with(b"RIFF") {
        match &head[8..12] {
            b"WEBP" => return "image/webp",
            b"WAVE" => return "audio/wave",
            b"AVI " => return "video/avi",
            _ => {}
        }
    }
    if head.len() >= 12 && head[4..8] == *b"ftyp" {
        return "video/mp4";
    }

    let trimmed = match head.iter().position(|b| !b.is_ascii_whitespace()) {
        Some(start) => &head[start..],
        None => &[][..],
    };
    for &(marker, mime) in MARKUP {
        if trimmed.len() >= marker.len() && trimmed[..marker.len()].eq_ignore_ascii_case(marker) {
            return mime;
        }
    }

    if head.iter().any(|&b| is_binary_byte(b)) {
        OCTET_STREAM
    } else {
        TEXT_UTF8
    }
}

fn is_binary_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    fn sized_file(dir: &TempDir, name: &str, len: u64) -> PathBuf {
        let path = dir.path().join(name);
        let f = File::create(&path).unwrap();
        f.set_len(len).unwrap();
        path
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope.txt");
        assert_eq!(
            FileValidator::default().validate(&path),
            Err(ValidationError::NotFound(path))
        );
    }

    #[test]
    fn test_directory_rejected() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            FileValidator::default().validate(dir.path()),
            Err(ValidationError::IsDirectory(dir.path().to_path_buf()))
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_fifo_rejected_without_blocking() {
        let dir = TempDir::new().unwrap();
        let fifo = dir.path().join("pipe");
        let status = std::process::Command::new("mkfifo")
            .arg(&fifo)
            .status()
            .unwrap();
        assert!(status.success());

        assert_eq!(
            FileValidator::default().validate(&fifo),
            Err(ValidationError::NotRegularFile(fifo))
        );
    }

    #[test]
    fn test_size_boundary() {
        let dir = TempDir::new().unwrap();
        let validator = FileValidator::default();

        let at_cap = sized_file(&dir, "at_cap.bin", MAX_UPLOAD_BYTES);
        assert_eq!(validator.validate(&at_cap), Ok(MAX_UPLOAD_BYTES));

        let over_cap = sized_file(&dir, "over_cap.bin", MAX_UPLOAD_BYTES + 1);
        assert_eq!(
            validator.validate(&over_cap),
            Err(ValidationError::TooLarge {
                size: MAX_UPLOAD_BYTES + 1,
                max: MAX_UPLOAD_BYTES
            })
        );
    }

    #[test]
    fn test_zero_byte_file_accepted() {
        let dir = TempDir::new().unwrap();
        let empty = write_file(&dir, "empty.txt", b"");
        assert_eq!(FileValidator::default().validate(&empty), Ok(0));
    }

    #[test]
    fn test_validate_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "notes.md", b"# notes\n");
        let validator = FileValidator::default();
        assert_eq!(validator.validate(&path), validator.validate(&path));
        assert_eq!(validator.validate(&path), Ok(8));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "secret.txt", b"hidden");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o000)).unwrap();
        if File::open(&path).is_ok() {
            // Running with privileges that bypass file modes.
            return;
        }
        assert_eq!(
            FileValidator::default().validate(&path),
            Err(ValidationError::PermissionDenied(path))
        );
    }

    #[test]
    fn test_content_type_from_extension() {
        let dir = TempDir::new().unwrap();
        // Extension wins even if the bytes disagree.
        let path = write_file(&dir, "diagram.png", b"not really a png");
        assert_eq!(
            FileValidator::default().detect_content_type(&path).unwrap(),
            "image/png"
        );
    }

    #[test]
    fn test_content_type_sniffed_without_extension() {
        let dir = TempDir::new().unwrap();
        let validator = FileValidator::default();

        let png = write_file(&dir, "capture", b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR");
        assert_eq!(validator.detect_content_type(&png).unwrap(), "image/png");

        let text = write_file(&dir, "README", b"plain words\n");
        assert_eq!(validator.detect_content_type(&text).unwrap(), TEXT_UTF8);

        let blob = write_file(&dir, "blob", &[0x00, 0x01, 0x02, 0xFE]);
        assert_eq!(validator.detect_content_type(&blob).unwrap(), OCTET_STREAM);
    }

    #[test]
    fn test_content_type_unreadable_fails() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone");
        assert!(matches!(
            FileValidator::default().detect_content_type(&missing),
            Err(ValidationError::ContentTypeDetectionFailed(_))
        ));
    }

    #[test]
    fn test_sniff_offsets_and_markup() {
        assert_eq!(sniff_content_type(b"RIFF\x00\x00\x00\x00WEBPVP8 "), "image/webp");
        assert_eq!(sniff_content_type(b"\x00\x00\x00\x18ftypmp42"), "video/mp4");
        assert_eq!(sniff_content_type(b"  <!DOCTYPE html><p>"), "text/html; charset=utf-8");
        assert_eq!(sniff_content_type(b""), TEXT_UTF8);
    }

    #[test]
    fn test_validate_all_reports_every_failure() {
        let dir = TempDir::new().unwrap();
        let ok = write_file(&dir, "ok.txt", b"fine");
        let requests = vec![
            FileAttachmentRequest::new(&ok, "Good"),
            FileAttachmentRequest::new(dir.path().join("missing.txt"), "Missing"),
            FileAttachmentRequest::new(&ok, "   "),
        ];

        let err = FileValidator::default().validate_all(&requests).unwrap_err();
        assert_eq!(err.total, 3);
        assert_eq!(err.failures.len(), 2);
        assert!(matches!(err.failures[0].error, Some(ValidationError::NotFound(_))));
        assert_eq!(err.failures[1].error, Some(ValidationError::EmptyTitle));
        assert_eq!(err.to_string(), "2 of 3 files failed validation");
    }

    #[test]
    fn test_validate_all_resolves_fields() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "trace.json", b"{}");
        let files = FileValidator::default()
            .validate_all(&[FileAttachmentRequest::new(&path, "Trace")])
            .unwrap();
        assert_eq!(files[0].size, 2);
        assert_eq!(files[0].content_type, "application/json");
    }
}
