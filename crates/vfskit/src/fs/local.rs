//! Local-disk filesystem implementation.
//!
//! [`LocalFs`] maps abstract paths into host paths under a fixed base
//! directory and delegates every operation to the host filesystem via
//! `tokio::fs`. Host I/O failures are mapped onto the error taxonomy.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::context::Context;
use crate::error::{FsError, Result};
use crate::fs::check;
use crate::fs::traits::{ByteStream, FileSystem, ReadRange, WriteMode, WriteSink};
use crate::path::VfsPath;
use crate::status::FileStatus;

const READ_CHUNK_SIZE: u64 = 64 * 1024;

/// Filesystem backed by a directory on the host.
///
/// All abstract paths resolve inside `base_dir`; the canonical path model
/// guarantees no `..` escapes it.
pub struct LocalFs {
    base_dir: PathBuf,
}

impl LocalFs {
    /// Create a backend rooted at `base_dir`.
    ///
    /// The directory must already exist; operations fail with `NotFound`
    /// otherwise.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn host_path(&self, path: &VfsPath) -> PathBuf {
        let mut host = self.base_dir.clone();
        for segment in path.segments() {
            host.push(segment);
        }
        host
    }

    async fn host_status(&self, path: &VfsPath) -> Result<Option<FileStatus>> {
        match tokio::fs::metadata(self.host_path(path)).await {
            Ok(meta) if meta.is_dir() => Ok(Some(FileStatus::directory(path.clone()))),
            Ok(meta) => Ok(Some(FileStatus::file(path.clone(), meta.len()))),
            // A missing component or a file used as a directory both mean
            // "nothing at this abstract path".
            Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                Ok(None)
            }
            Err(err) => Err(FsError::from_io(path, err)),
        }
    }
}

#[async_trait]
impl FileSystem for LocalFs {
    async fn stat(&self, ctx: &Context, path: &VfsPath) -> Result<Option<FileStatus>> {
        ctx.ensure_not_canceled()?;
        self.host_status(path).await
    }

    async fn read_dir(&self, ctx: &Context, path: &VfsPath) -> Result<Vec<FileStatus>> {
        ctx.ensure_not_canceled()?;
        match self.host_status(path).await? {
            None => return Err(FsError::not_found(path)),
            Some(status) if !status.is_directory => return Err(FsError::not_a_directory(path)),
            Some(_) => {}
        }

        let mut reader = tokio::fs::read_dir(self.host_path(path))
            .await
            .map_err(|err| FsError::from_io(path, err))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|err| FsError::from_io(path, err))?
        {
            ctx.ensure_not_canceled()?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let child = path.join(&name);
            let meta = entry
                .metadata()
                .await
                .map_err(|err| FsError::from_io(&child, err))?;
            entries.push(if meta.is_dir() {
                FileStatus::directory(child)
            } else {
                FileStatus::file(child, meta.len())
            });
        }
        Ok(entries)
    }

    async fn open_read(
        &self,
        ctx: &Context,
        path: &VfsPath,
        range: ReadRange,
    ) -> Result<ByteStream> {
        ctx.ensure_not_canceled()?;
        let status = check::before_open_read(self, ctx, path).await?;
        let size = status.size.unwrap_or(0);
        let (start, end) = range.clamp_to(size);
        if start >= end {
            return Ok(Box::pin(futures_util::stream::empty()));
        }

        let mut file = File::open(self.host_path(path))
            .await
            .map_err(|err| FsError::from_io(path, err))?;
        if start > 0 {
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|err| FsError::io(path, err))?;
        }

        let state = (file, end - start, path.clone(), ctx.clone());
        let stream = futures_util::stream::try_unfold(
            state,
            |(mut file, remaining, path, ctx)| async move {
                if remaining == 0 {
                    return Ok(None);
                }
                ctx.ensure_not_canceled()?;
                let take = remaining.min(READ_CHUNK_SIZE) as usize;
                let mut buf = vec![0u8; take];
                let mut filled = 0;
                while filled < take {
                    let n = file
                        .read(&mut buf[filled..])
                        .await
                        .map_err(|err| FsError::io(&path, err))?;
                    if n == 0 {
                        break;
                    }
                    filled += n;
                }
                if filled == 0 {
                    // File shrank underneath us; end the stream.
                    return Ok(None);
                }
                buf.truncate(filled);
                let remaining = remaining - filled as u64;
                Ok(Some((Bytes::from(buf), (file, remaining, path, ctx))))
            },
        );
        Ok(Box::pin(stream))
    }

    async fn open_write(
        &self,
        ctx: &Context,
        path: &VfsPath,
        mode: WriteMode,
    ) -> Result<Box<dyn WriteSink>> {
        ctx.ensure_not_canceled()?;
        check::before_open_write(self, ctx, path, mode).await?;

        let mut options = OpenOptions::new();
        match mode {
            WriteMode::Create => options.create_new(true).write(true),
            WriteMode::Overwrite => options.create(true).truncate(true).write(true),
            WriteMode::Append => options.create(true).append(true),
        };
        let file = options
            .open(self.host_path(path))
            .await
            .map_err(|err| FsError::from_io(path, err))?;
        Ok(Box::new(LocalWriteSink {
            file,
            path: path.clone(),
            ctx: ctx.clone(),
        }))
    }

    async fn create_dir(&self, ctx: &Context, path: &VfsPath) -> Result<()> {
        ctx.ensure_not_canceled()?;
        tokio::fs::create_dir(self.host_path(path))
            .await
            .map_err(|err| FsError::from_io(path, err))
    }

    async fn remove(&self, ctx: &Context, path: &VfsPath) -> Result<()> {
        ctx.ensure_not_canceled()?;
        let host = self.host_path(path);
        let meta = match tokio::fs::symlink_metadata(&host).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(FsError::not_found(path));
            }
            Err(err) => return Err(FsError::from_io(path, err)),
        };
        let result = if meta.is_dir() {
            tokio::fs::remove_dir(&host).await
        } else {
            // Plain files and symlinks both unlink.
            tokio::fs::remove_file(&host).await
        };
        result.map_err(|err| FsError::from_io(path, err))
    }

    async fn copy_file(
        &self,
        ctx: &Context,
        src: &VfsPath,
        dst: &VfsPath,
        overwrite: bool,
    ) -> Result<()> {
        ctx.ensure_not_canceled()?;
        match self.host_status(src).await? {
            None => return Err(FsError::not_found(src)),
            Some(status) if status.is_directory => return Err(FsError::not_a_file(src)),
            Some(_) => {}
        }
        match self.host_status(dst).await? {
            Some(status) if status.is_directory => return Err(FsError::not_a_file(dst)),
            Some(_) if !overwrite => return Err(FsError::already_exists_from(dst, src)),
            _ => {}
        }
        tokio::fs::copy(self.host_path(src), self.host_path(dst))
            .await
            .map_err(|err| FsError::from_io(dst, err))?;
        Ok(())
    }

    async fn rename(&self, ctx: &Context, src: &VfsPath, dst: &VfsPath) -> Result<()> {
        ctx.ensure_not_canceled()?;
        if !self.exists(ctx, src).await? {
            return Err(FsError::not_found(src));
        }
        if self.exists(ctx, dst).await? {
            return Err(FsError::already_exists_from(dst, src));
        }
        tokio::fs::rename(self.host_path(src), self.host_path(dst))
            .await
            .map_err(|err| FsError::from_io(dst, err))
    }
}

struct LocalWriteSink {
    file: File,
    path: VfsPath,
    ctx: Context,
}

#[async_trait]
impl WriteSink for LocalWriteSink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.ctx.ensure_not_canceled()?;
        self.file
            .write_all(&chunk)
            .await
            .map_err(|err| FsError::io(&self.path, err))
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        self.file
            .flush()
            .await
            .map_err(|err| FsError::io(&self.path, err))?;
        self.file
            .sync_all()
            .await
            .map_err(|err| FsError::io(&self.path, err))
    }
}
