//! Shared pre-operation checks.
//!
//! Terminal backends run these before handing out read streams or write
//! sinks, so a sink is never produced for a path whose preconditions are
//! violated. Adapters delegate and therefore inherit the checks from the
//! backend that finally serves the operation.

use crate::context::Context;
use crate::error::{FsError, Result};
use crate::fs::traits::{FileSystem, WriteMode};
use crate::path::VfsPath;
use crate::status::FileStatus;

/// Validate a path about to be opened for reading.
///
/// Returns the file's status so callers can reuse the size.
///
/// # Errors
/// - `NotFound` when nothing exists at `path`
/// - `NotAFile` when `path` is a directory
pub async fn before_open_read<F>(fs: &F, ctx: &Context, path: &VfsPath) -> Result<FileStatus>
where
    F: FileSystem + ?Sized,
{
    let status = fs
        .stat(ctx, path)
        .await?
        .ok_or_else(|| FsError::not_found(path))?;
    if status.is_directory {
        return Err(FsError::not_a_file(path));
    }
    Ok(status)
}

/// Validate a path about to be opened for writing.
///
/// The parent must exist and be a directory; the target must not be a
/// directory; an existing target file is rejected in [`WriteMode::Create`].
/// Returns the existing target status, if any.
pub async fn before_open_write<F>(
    fs: &F,
    ctx: &Context,
    path: &VfsPath,
    mode: WriteMode,
) -> Result<Option<FileStatus>>
where
    F: FileSystem + ?Sized,
{
    if let Some(parent) = path.parent() {
        match fs.stat(ctx, &parent).await? {
            None => return Err(FsError::not_found(&parent)),
            Some(status) if !status.is_directory => {
                return Err(FsError::not_a_directory(&parent));
            }
            Some(_) => {}
        }
    }
    match fs.stat(ctx, path).await? {
        Some(status) if status.is_directory => Err(FsError::not_a_file(path)),
        Some(status) => {
            if mode == WriteMode::Create {
                return Err(FsError::already_exists(path));
            }
            Ok(Some(status))
        }
        None => Ok(None),
    }
}
