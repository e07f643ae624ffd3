// Shared data shapes for the attachment pipeline.
//
// `FileAttachmentRequest` is what the CLI layer hands us; it only becomes a
// `ValidatedAttachment` (with resolved size and content type) once the
// local pre-flight checks pass. Server-owned records are read-only.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Flat attachment metadata, parsed from `key=value,key=value` text.
pub type Metadata = BTreeMap<String, String>;

/// One file the user asked to attach, as parsed from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttachmentRequest {
    pub path: PathBuf,
    pub title: String,
    pub subtitle: Option<String>,
    pub icon_url: Option<String>,
    pub metadata: Option<Metadata>,
}

impl FileAttachmentRequest {
    pub fn new(path: impl Into<PathBuf>, title: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            title: title.into(),
            subtitle: None,
            icon_url: None,
            metadata: None,
        }
    }

    pub fn subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }

    pub fn icon_url(mut self, icon_url: impl Into<String>) -> Self {
        self.icon_url = Some(icon_url.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// File name sent to the server when requesting an upload target.
    pub fn file_name(&self) -> String {
        file_name_of(&self.path)
    }
}

/// A request that passed validation. Only these reach the transfer stage,
/// so the title is non-empty and the size is within the upload cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedAttachment {
    pub request: FileAttachmentRequest,
    pub size: u64,
    pub content_type: String,
}

impl ValidatedAttachment {
    pub fn path(&self) -> &Path {
        &self.request.path
    }
}

/// Pre-signed destination returned by the `fileUpload` mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub upload_url: String,
    pub asset_url: String,
    /// Headers that must be replayed verbatim on the PUT, in server order.
    pub headers: Vec<(String, String)>,
}

/// Everything `RegisterAttachment` needs besides the issue id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttachment {
    pub title: String,
    pub url: String,
    pub subtitle: Option<String>,
    pub icon_url: Option<String>,
    pub metadata: Option<Metadata>,
}

impl NewAttachment {
    pub fn for_upload(file: &ValidatedAttachment, asset_url: &str) -> Self {
        Self {
            title: file.request.title.clone(),
            url: asset_url.to_string(),
            subtitle: file.request.subtitle.clone(),
            icon_url: file.request.icon_url.clone(),
            metadata: file.request.metadata.clone(),
        }
    }
}

/// Fields that can be changed on an existing attachment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentUpdate {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub icon_url: Option<String>,
    pub metadata: Option<Metadata>,
}

impl AttachmentUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.subtitle.is_none()
            && self.icon_url.is_none()
            && self.metadata.is_none()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Creator {
    pub id: String,
    pub name: String,
}

/// Attachment as the server reports it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRecord {
    pub id: String,
    pub title: String,
    pub url: String,
    pub created_at: String,
    #[serde(default)]
    pub creator: Option<Creator>,
}

/// Terminal outcome for one file of a batch.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub path: PathBuf,
    pub title: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<&'static str>,
    /// Transfer attempts consumed, zero if the transfer stage never ran.
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<AttachmentRecord>,
}

impl UploadResult {
    pub fn succeeded(file: &ValidatedAttachment, attempts: u32, record: AttachmentRecord) -> Self {
        Self {
            path: file.request.path.clone(),
            title: file.request.title.clone(),
            success: true,
            error: None,
            failed_stage: None,
            attempts,
            attachment: Some(record),
        }
    }

    pub fn failed(
        file: &ValidatedAttachment,
        attempts: u32,
        stage: &'static str,
        error: impl ToString,
    ) -> Self {
        Self {
            path: file.request.path.clone(),
            title: file.request.title.clone(),
            success: false,
            error: Some(error.to_string()),
            failed_stage: Some(stage),
            attempts,
            attachment: None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("metadata entry `{0}` is not in key=value form")]
    MissingEquals(String),
    #[error("metadata entry `{0}` has an empty key")]
    EmptyKey(String),
}

/// Parse `key=value,key=value` into a flat map. Later duplicates win.
/// Values are kept as strings; nested structures cannot be expressed.
pub fn parse_metadata(input: &str) -> Result<Metadata, MetadataError> {
    let mut map = Metadata::new();
    for entry in input.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| MetadataError::MissingEquals(entry.to_string()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(MetadataError::EmptyKey(entry.to_string()));
        }
        map.insert(key.to_string(), value.trim().to_string());
    }
    Ok(map)
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
