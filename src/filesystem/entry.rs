use std::fs;
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::filesystem::mime::{self, ContentFormat};
use crate::filesystem::path::PathSandbox;
use crate::filesystem::preview::PreviewPipeline;

/// Canonical result record of every operation. Built fresh on every read and
/// never cached; wire field names match the workspace API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryDescriptor {
    pub name: String,
    pub path: String,
    /// Bytes; absent for directories.
    pub size: Option<u64>,
    /// Millisecond epoch.
    pub created_time: i64,
    /// Millisecond epoch.
    pub modified_time: i64,
    pub mime_type: String,
    pub format: Option<ContentFormat>,
    pub writable: bool,
    pub is_folder: bool,
    pub is_upload: bool,
    /// Always present on the wire; null when not requested or size-gated out.
    pub content: Option<serde_json::Value>,
}

/// Assembles the descriptor for an already-resolved absolute path. Content is
/// only extracted on request and only for files; directories carry no
/// mimetype, size or format.
pub fn build_descriptor(
    sandbox: &PathSandbox,
    preview: &PreviewPipeline,
    upload_extension: &str,
    absolute: &Path,
    include_content: bool,
) -> Result<EntryDescriptor> {
    let metadata = fs::metadata(absolute)?;
    let name = absolute
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let relative = sandbox.relative_of(absolute);
    let modified_time = epoch_millis(metadata.modified()?);
    let created_time = metadata.created().map(epoch_millis).unwrap_or(modified_time);
    let writable = !metadata.permissions().readonly();

    if metadata.is_dir() {
        return Ok(EntryDescriptor {
            name,
            path: relative,
            size: None,
            created_time,
            modified_time,
            mime_type: String::new(),
            format: None,
            writable,
            is_folder: true,
            is_upload: false,
            content: None,
        });
    }

    let mime_type = mime::mime_for(&name);
    let format = mime::format_for(mime_type);
    let size = metadata.len();
    let is_upload = name.starts_with('.') && mime::extension_of(&name) == upload_extension;
    let content = if include_content {
        preview.extract_sync(absolute, format, size)?
    } else {
        None
    };

    Ok(EntryDescriptor {
        name,
        path: relative,
        size: Some(size),
        created_time,
        modified_time,
        mime_type: mime_type.to_string(),
        format: Some(format),
        writable,
        is_folder: false,
        is_upload,
        content,
    })
}

fn epoch_millis(time: SystemTime) -> i64 {
    DateTime::<Utc>::from(time).timestamp_millis()
}
