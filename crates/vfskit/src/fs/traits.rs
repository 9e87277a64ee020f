//! Filesystem trait definitions.
//!
//! [`FileSystem`] is the one capability every backend and adapter honors.
//! Implementations provide the non-recursive primitives; the recursive
//! operations (`list`, `make_dir`, `delete`, `copy`, `move_entry`) ship as
//! default methods built on those primitives, so an adapter only overrides
//! what it actually transforms.

use std::collections::{HashSet, VecDeque};
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use futures_util::TryStreamExt;

use crate::context::Context;
use crate::error::{FsError, Result};
use crate::path::VfsPath;
use crate::status::FileStatus;

/// Lazy sequence of byte chunks produced by [`FileSystem::open_read`].
///
/// Single consumer, chunks in ascending byte order, cancellation-observant.
/// Dropping the stream releases its resources; the consumer is not required
/// to drain it.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Lazy sequence of status records produced by [`FileSystem::list`].
///
/// Finite and not restartable; yields in unspecified order, except that a
/// recursive listing emits every directory before that directory's
/// descendants.
pub type StatusStream<'a> = Pin<Box<dyn Stream<Item = Result<FileStatus>> + Send + 'a>>;

/// Half-open byte range `[start, end)` for [`FileSystem::open_read`].
///
/// `end == None` reads to the end of the file. Ranges are clamped to the
/// file size; an inverted or fully-out-of-bounds range reads zero bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRange {
    /// First byte offset to read.
    pub start: u64,
    /// One past the last byte offset, absent for end-of-file.
    pub end: Option<u64>,
}

impl ReadRange {
    /// The whole file.
    pub const fn full() -> Self {
        Self {
            start: 0,
            end: None,
        }
    }

    /// An explicit `[start, end)` range.
    pub const fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// Clamp to a file of `size` bytes, returning concrete `(start, end)`.
    pub fn clamp_to(&self, size: u64) -> (u64, u64) {
        let start = self.start.min(size);
        let end = self.end.unwrap_or(size).min(size).max(start);
        (start, end)
    }

    /// Whether the clamped range reads zero bytes.
    pub fn is_empty_for(&self, size: u64) -> bool {
        let (start, end) = self.clamp_to(size);
        start >= end
    }
}

impl Default for ReadRange {
    fn default() -> Self {
        Self::full()
    }
}

/// How [`FileSystem::open_write`] treats an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Create a new file; fail `AlreadyExists` when the file exists.
    #[default]
    Create,
    /// Replace the file's contents.
    Overwrite,
    /// Create the file or append to its existing contents.
    Append,
}

/// Options for [`FileSystem::list`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    /// Also yield the contents of every listed directory.
    pub recursive: bool,
}

impl ListOptions {
    /// Recursive listing.
    pub const fn recursive() -> Self {
        Self { recursive: true }
    }
}

/// Options for [`FileSystem::make_dir`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MkdirOptions {
    /// Create missing ancestor directories.
    pub create_parents: bool,
}

impl MkdirOptions {
    /// Create missing ancestors as needed.
    pub const fn with_parents() -> Self {
        Self {
            create_parents: true,
        }
    }
}

/// Options for [`FileSystem::delete`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    /// Delete directory contents first.
    pub recursive: bool,
}

impl DeleteOptions {
    /// Recursive delete.
    pub const fn recursive() -> Self {
        Self { recursive: true }
    }
}

/// Options for [`FileSystem::copy`] and [`FileSystem::move_entry`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyOptions {
    /// Replace an existing destination.
    pub overwrite: bool,
    /// Allow directory sources.
    pub recursive: bool,
}

impl CopyOptions {
    /// Recursive copy/move keeping the no-overwrite default.
    pub const fn recursive() -> Self {
        Self {
            overwrite: false,
            recursive: true,
        }
    }

    /// Overwriting copy/move of a single file.
    pub const fn overwrite() -> Self {
        Self {
            overwrite: true,
            recursive: false,
        }
    }
}

/// Write end handed out by [`FileSystem::open_write`].
///
/// Append-only byte acceptance and one terminal [`close`](WriteSink::close)
/// that signals durability in the underlying storage. Callers must close the
/// sink on all paths; decorator sinks close the inner sink first and then run
/// their side effect exactly once, even if the inner close errored.
#[async_trait]
pub trait WriteSink: Send {
    /// Append a chunk.
    async fn write(&mut self, chunk: Bytes) -> Result<()>;

    /// Finalize the write and flush to the underlying storage.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Async filesystem capability.
///
/// All backends and adapters implement this trait; any composition exposes
/// the same surface and can be consumed uniformly. Every operation takes a
/// [`Context`] and checks cancellation at entry and before each new I/O step.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Status of the entry at `path`, `None` when nothing is there.
    ///
    /// Never fails for missing paths.
    async fn stat(&self, ctx: &Context, path: &VfsPath) -> Result<Option<FileStatus>>;

    /// Non-recursive listing of a directory.
    ///
    /// # Errors
    /// - `NotFound` when `path` does not exist
    /// - `NotADirectory` when `path` is a file
    async fn read_dir(&self, ctx: &Context, path: &VfsPath) -> Result<Vec<FileStatus>>;

    /// Open a file for reading within `range`.
    ///
    /// # Errors
    /// - `NotFound` when `path` does not exist
    /// - `NotAFile` when `path` is a directory
    async fn open_read(&self, ctx: &Context, path: &VfsPath, range: ReadRange)
    -> Result<ByteStream>;

    /// Open a file for writing.
    ///
    /// The parent must exist and be a directory. See [`WriteMode`] for how
    /// an existing file is treated.
    async fn open_write(
        &self,
        ctx: &Context,
        path: &VfsPath,
        mode: WriteMode,
    ) -> Result<Box<dyn WriteSink>>;

    /// Create a single directory; the parent must already exist.
    ///
    /// # Errors
    /// - `NotFound` when the parent is missing
    /// - `AlreadyExists` when something is already at `path`
    async fn create_dir(&self, ctx: &Context, path: &VfsPath) -> Result<()>;

    /// Remove a file or an empty directory.
    ///
    /// # Errors
    /// - `NotFound` when `path` does not exist
    /// - `NotEmptyDirectory` when `path` is a non-empty directory
    async fn remove(&self, ctx: &Context, path: &VfsPath) -> Result<()>;

    /// Copy a single file inside this filesystem.
    ///
    /// # Errors
    /// - `AlreadyExists` when `dst` exists and `overwrite` is false
    async fn copy_file(
        &self,
        ctx: &Context,
        src: &VfsPath,
        dst: &VfsPath,
        overwrite: bool,
    ) -> Result<()>;

    /// Rename an entry inside this filesystem, replacing nothing.
    ///
    /// This is the same-storage move primitive; cross-storage moves are the
    /// mixin's job via [`move_entry`](FileSystem::move_entry).
    async fn rename(&self, ctx: &Context, src: &VfsPath, dst: &VfsPath) -> Result<()>;

    // --- helper mixin -----------------------------------------------------

    /// Whether anything exists at `path`.
    async fn exists(&self, ctx: &Context, path: &VfsPath) -> Result<bool> {
        Ok(self.stat(ctx, path).await?.is_some())
    }

    /// List a directory, optionally recursively.
    ///
    /// The recursive walk is an iterative worklist guarded by a visited set,
    /// so a cyclic composition terminates. Every yielded directory precedes
    /// its descendants.
    async fn list<'a>(
        &'a self,
        ctx: &Context,
        path: &VfsPath,
        opts: ListOptions,
    ) -> Result<StatusStream<'a>> {
        ctx.ensure_not_canceled()?;
        if !opts.recursive {
            let entries = self.read_dir(ctx, path).await?;
            return Ok(Box::pin(futures_util::stream::iter(
                entries.into_iter().map(Ok),
            )));
        }

        struct Walk {
            pending: VecDeque<FileStatus>,
            dirs: VecDeque<VfsPath>,
            visited: HashSet<String>,
        }

        let mut visited = HashSet::new();
        visited.insert(path.to_string());
        let state = Walk {
            pending: VecDeque::new(),
            dirs: VecDeque::from([path.clone()]),
            visited,
        };
        let ctx = ctx.clone();
        let stream = futures_util::stream::try_unfold(state, move |mut walk| {
            let ctx = ctx.clone();
            async move {
                loop {
                    if let Some(item) = walk.pending.pop_front() {
                        return Ok(Some((item, walk)));
                    }
                    let Some(dir) = walk.dirs.pop_front() else {
                        return Ok(None);
                    };
                    ctx.ensure_not_canceled()?;
                    for child in self.read_dir(&ctx, &dir).await? {
                        if child.is_directory && walk.visited.insert(child.path.to_string()) {
                            walk.dirs.push_back(child.path.clone());
                        }
                        walk.pending.push_back(child);
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }

    /// Read a file (or a range of it) fully into memory.
    async fn read_to_bytes(&self, ctx: &Context, path: &VfsPath, range: ReadRange)
    -> Result<Vec<u8>> {
        let mut stream = self.open_read(ctx, path, range).await?;
        let mut out = Vec::new();
        while let Some(chunk) = stream.try_next().await? {
            ctx.ensure_not_canceled()?;
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Write a byte slice in one shot: open, write, close.
    async fn write_bytes(
        &self,
        ctx: &Context,
        path: &VfsPath,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<()> {
        let mut sink = self.open_write(ctx, path, mode).await?;
        sink.write(Bytes::copy_from_slice(data)).await?;
        sink.close().await
    }

    /// Create a directory, optionally with its missing ancestors.
    ///
    /// Walks from the target upward accumulating missing ancestors, then
    /// creates top-down; `AlreadyExists` on an ancestor (concurrent creation)
    /// is tolerated, on the target it is not.
    async fn make_dir(&self, ctx: &Context, path: &VfsPath, opts: MkdirOptions) -> Result<()> {
        ctx.ensure_not_canceled()?;
        if !opts.create_parents {
            return self.create_dir(ctx, path).await;
        }
        if self.stat(ctx, path).await?.is_some() {
            return Err(FsError::already_exists(path));
        }

        let mut missing = Vec::new();
        let mut cursor = path.parent();
        while let Some(ancestor) = cursor {
            ctx.ensure_not_canceled()?;
            match self.stat(ctx, &ancestor).await? {
                Some(status) if status.is_directory => break,
                Some(_) => return Err(FsError::not_a_directory(&ancestor)),
                None => {
                    cursor = ancestor.parent();
                    missing.push(ancestor);
                }
            }
        }
        for ancestor in missing.iter().rev() {
            ctx.ensure_not_canceled()?;
            match self.create_dir(ctx, ancestor).await {
                Ok(()) | Err(FsError::AlreadyExists { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        self.create_dir(ctx, path).await
    }

    /// Delete an entry, optionally with its contents.
    ///
    /// The recursive form deletes post-order: the whole subtree is walked
    /// first, then removed deepest-first.
    async fn delete(&self, ctx: &Context, path: &VfsPath, opts: DeleteOptions) -> Result<()> {
        ctx.ensure_not_canceled()?;
        if !opts.recursive {
            return self.remove(ctx, path).await;
        }
        let status = self
            .stat(ctx, path)
            .await?
            .ok_or_else(|| FsError::not_found(path))?;
        if !status.is_directory {
            return self.remove(ctx, path).await;
        }

        let mut order = vec![path.clone()];
        let mut worklist = VecDeque::from([path.clone()]);
        let mut visited = HashSet::from([path.to_string()]);
        while let Some(dir) = worklist.pop_front() {
            ctx.ensure_not_canceled()?;
            for child in self.read_dir(ctx, &dir).await? {
                if child.is_directory && !visited.insert(child.path.to_string()) {
                    continue;
                }
                if child.is_directory {
                    worklist.push_back(child.path.clone());
                }
                order.push(child.path);
            }
        }
        for target in order.iter().rev() {
            ctx.ensure_not_canceled()?;
            self.remove(ctx, target).await?;
        }
        Ok(())
    }

    /// Copy a file or directory tree.
    ///
    /// Directory sources require `recursive`; an existing destination
    /// requires `overwrite`.
    async fn copy(
        &self,
        ctx: &Context,
        src: &VfsPath,
        dst: &VfsPath,
        opts: CopyOptions,
    ) -> Result<()> {
        ctx.ensure_not_canceled()?;
        let status = self
            .stat(ctx, src)
            .await?
            .ok_or_else(|| FsError::not_found(src))?;
        if !status.is_directory {
            return self.copy_file(ctx, src, dst, opts.overwrite).await;
        }
        if !opts.recursive {
            return Err(FsError::RecursiveNotSpecified { path: src.clone() });
        }
        match self.stat(ctx, dst).await? {
            Some(_) if !opts.overwrite => {
                return Err(FsError::already_exists_from(dst, src));
            }
            Some(existing) if !existing.is_directory => {
                self.remove(ctx, dst).await?;
                self.create_dir(ctx, dst).await?;
            }
            Some(_) => {}
            None => self.create_dir(ctx, dst).await?,
        }
        for child in self.read_dir(ctx, src).await? {
            ctx.ensure_not_canceled()?;
            let name = child
                .path
                .filename()
                .ok_or_else(|| FsError::not_found(&child.path))?;
            self.copy(ctx, &child.path, &dst.join(name), opts).await?;
        }
        Ok(())
    }

    /// Move a file or directory tree.
    ///
    /// Within one filesystem this is a direct [`rename`](FileSystem::rename)
    /// after the same checks `copy` performs; routers that span multiple
    /// storages override this with copy-then-delete.
    async fn move_entry(
        &self,
        ctx: &Context,
        src: &VfsPath,
        dst: &VfsPath,
        opts: CopyOptions,
    ) -> Result<()> {
        ctx.ensure_not_canceled()?;
        let status = self
            .stat(ctx, src)
            .await?
            .ok_or_else(|| FsError::not_found(src))?;
        if status.is_directory && !opts.recursive {
            return Err(FsError::RecursiveNotSpecified { path: src.clone() });
        }
        if self.stat(ctx, dst).await?.is_some() {
            if !opts.overwrite {
                return Err(FsError::already_exists_from(dst, src));
            }
            self.delete(ctx, dst, DeleteOptions::recursive()).await?;
        }
        self.rename(ctx, src, dst).await
    }
}
