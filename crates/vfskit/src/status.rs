//! File status records and MIME type derivation.

use serde::{Deserialize, Serialize};

use crate::path::VfsPath;

/// Immutable status record for a file or directory.
///
/// `size` is present iff the entry is a file. `mime_type` is derived from
/// the filename extension; unknown extensions yield `None`.
///
/// The serde representation uses camelCase field names because these records
/// are persisted verbatim inside cache `meta.json` files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStatus {
    /// Canonical path of the entry.
    pub path: VfsPath,
    /// Whether the entry is a directory.
    pub is_directory: bool,
    /// File size in bytes; absent for directories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// MIME type derived from the filename extension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl FileStatus {
    /// Status record for a file of the given size.
    pub fn file(path: VfsPath, size: u64) -> Self {
        let mime_type = path.filename().and_then(mime_type_for).map(str::to_string);
        Self {
            path,
            is_directory: false,
            size: Some(size),
            mime_type,
        }
    }

    /// Status record for a directory.
    pub fn directory(path: VfsPath) -> Self {
        Self {
            path,
            is_directory: true,
            size: None,
            mime_type: None,
        }
    }

    /// Same record re-rooted at a different path.
    ///
    /// Used by adapters that translate between path spaces; the MIME type is
    /// re-derived because the filename may have changed.
    pub fn with_path(&self, path: VfsPath) -> Self {
        if self.is_directory {
            Self::directory(path)
        } else {
            Self::file(path, self.size.unwrap_or(0))
        }
    }
}

/// Look up the MIME type for a filename, case-insensitively by extension.
///
/// The table is fixed; anything not listed maps to `None`.
pub fn mime_type_for(filename: &str) -> Option<&'static str> {
    let ext = filename.rsplit_once('.').map(|(_, ext)| ext)?;
    let mime = match ext.to_ascii_lowercase().as_str() {
        "txt" | "text" | "log" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "md" | "markdown" => "text/markdown",
        "xml" => "text/xml",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "yaml" | "yml" => "application/yaml",
        "toml" => "application/toml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "wasm" => "application/wasm",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "bmp" => "image/bmp",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        _ => return None,
    };
    Some(mime)
}
