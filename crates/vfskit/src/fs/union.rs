//! Union router.
//!
//! [`UnionFs`] merges multiple mounted filesystems into one logical path
//! space. Reads are answered by the first candidate that contains the path;
//! writes go to the most specific, highest-priority writable candidate;
//! listings merge every candidate with first-seen-wins deduplication.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::context::Context;
use crate::error::{FsError, Result};
use crate::fs::traits::{
    ByteStream, CopyOptions, DeleteOptions, FileSystem, ReadRange, WriteMode, WriteSink,
};
use crate::path::VfsPath;
use crate::status::FileStatus;

/// One filesystem mounted into a union's logical path space.
pub struct MountItem {
    fs: Arc<dyn FileSystem>,
    mount_path: VfsPath,
    read_only: bool,
    priority: i32,
}

impl MountItem {
    /// Mount `fs` so its root appears at `mount_path`.
    pub fn new(fs: Arc<dyn FileSystem>, mount_path: VfsPath) -> Self {
        Self {
            fs,
            mount_path,
            read_only: false,
            priority: 0,
        }
    }

    /// Refuse writes routed to this mount.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Higher priority wins among equally specific mounts.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// A mount that applies to some queried path, with the path translated into
/// the mount's own space.
struct Candidate<'a> {
    item: &'a MountItem,
    index: usize,
    inner: VfsPath,
}

/// Union of multiple mounted filesystems.
///
/// Candidates for a path are ordered by mount-path length descending (more
/// specific first), then priority descending. Among items with equal
/// specificity and priority, construction order decides.
pub struct UnionFs {
    items: Vec<MountItem>,
}

impl UnionFs {
    /// Build a union over `items`.
    ///
    /// Items are kept sorted by priority descending; the sort is stable, so
    /// construction order breaks priority ties.
    pub fn new(items: Vec<MountItem>) -> Self {
        let mut items = items;
        items.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { items }
    }

    /// Mounts whose path is a prefix of `path`, most specific first.
    fn candidates(&self, path: &VfsPath) -> Vec<Candidate<'_>> {
        let mut found: Vec<Candidate<'_>> = self
            .items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| {
                path.strip_prefix(&item.mount_path).map(|inner| Candidate {
                    item,
                    index,
                    inner,
                })
            })
            .collect();
        found.sort_by(|a, b| b.item.mount_path.depth().cmp(&a.item.mount_path.depth()));
        found
    }

    /// First writable candidate, or `ReadOnly` when none applies.
    fn write_target(&self, path: &VfsPath) -> Result<Candidate<'_>> {
        self.candidates(path)
            .into_iter()
            .find(|candidate| !candidate.item.read_only)
            .ok_or_else(|| FsError::ReadOnly { path: path.clone() })
    }

    /// Whether `path` is a strict ancestor of some mount path and should
    /// stat as a synthetic directory (the virtual root generalized).
    fn is_synthetic_dir(&self, path: &VfsPath) -> bool {
        self.items
            .iter()
            .any(|item| path.is_prefix_of(&item.mount_path) && *path != item.mount_path)
    }

    /// Resolve the candidate that answers reads for `path`.
    async fn read_source(&self, ctx: &Context, path: &VfsPath) -> Result<Option<Candidate<'_>>> {
        for candidate in self.candidates(path) {
            if candidate
                .item
                .fs
                .stat(ctx, &candidate.inner)
                .await
                .map_err(|err| remap_error(&candidate.item.mount_path, err))?
                .is_some()
            {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }
}

/// Rewrite inner-space error paths into union-space ones.
fn remap_error(mount_path: &VfsPath, err: FsError) -> FsError {
    err.map_paths(|inner| mount_path.join_path(&inner))
}

#[async_trait]
impl FileSystem for UnionFs {
    async fn stat(&self, ctx: &Context, path: &VfsPath) -> Result<Option<FileStatus>> {
        ctx.ensure_not_canceled()?;
        for candidate in self.candidates(path) {
            let status = candidate
                .item
                .fs
                .stat(ctx, &candidate.inner)
                .await
                .map_err(|err| remap_error(&candidate.item.mount_path, err))?;
            if let Some(status) = status {
                return Ok(Some(status.with_path(path.clone())));
            }
        }
        if self.is_synthetic_dir(path) {
            return Ok(Some(FileStatus::directory(path.clone())));
        }
        Ok(None)
    }

    async fn read_dir(&self, ctx: &Context, path: &VfsPath) -> Result<Vec<FileStatus>> {
        ctx.ensure_not_canceled()?;
        let mut seen: HashSet<String> = HashSet::new();
        let mut entries: Vec<FileStatus> = Vec::new();

        // Every mount below `path` contributes its nearest ancestor segment
        // as a synthetic directory, ahead of any backend entry of the same
        // name. Deeper mounts surface their intermediate ancestors too, so a
        // recursive walk can always descend to the mount itself.
        for item in &self.items {
            let Some(rest) = item.mount_path.strip_prefix(path) else {
                continue;
            };
            let Some(first) = rest.segments().first() else {
                continue;
            };
            let child = path.join(first);
            if seen.insert(child.to_string()) {
                entries.push(FileStatus::directory(child));
            }
        }

        let mut listed_any = false;
        for candidate in self.candidates(path) {
            ctx.ensure_not_canceled()?;
            match candidate.item.fs.read_dir(ctx, &candidate.inner).await {
                Ok(children) => {
                    listed_any = true;
                    for child in children {
                        let Some(name) = child.path.filename() else {
                            continue;
                        };
                        let union_path = path.join(name);
                        if seen.insert(union_path.to_string()) {
                            entries.push(child.with_path(union_path));
                        }
                    }
                }
                // A candidate that cannot list (path is a file there, or the
                // backend failed) is skipped; the merge covers the rest.
                Err(err) => {
                    warn!(
                        op = ctx.operation_id(),
                        path = %path,
                        mount = %candidate.item.mount_path,
                        error = %err,
                        "union list: skipping failing candidate"
                    );
                }
            }
        }

        if listed_any || self.is_synthetic_dir(path) {
            return Ok(entries);
        }
        match self.stat(ctx, path).await? {
            Some(status) if !status.is_directory => Err(FsError::not_a_directory(path)),
            Some(_) => Ok(entries),
            None => Err(FsError::not_found(path)),
        }
    }

    async fn open_read(
        &self,
        ctx: &Context,
        path: &VfsPath,
        range: ReadRange,
    ) -> Result<ByteStream> {
        ctx.ensure_not_canceled()?;
        match self.read_source(ctx, path).await? {
            Some(candidate) => candidate
                .item
                .fs
                .open_read(ctx, &candidate.inner, range)
                .await
                .map_err(|err| remap_error(&candidate.item.mount_path, err)),
            None if self.is_synthetic_dir(path) => Err(FsError::not_a_file(path)),
            None => Err(FsError::not_found(path)),
        }
    }

    async fn open_write(
        &self,
        ctx: &Context,
        path: &VfsPath,
        mode: WriteMode,
    ) -> Result<Box<dyn WriteSink>> {
        ctx.ensure_not_canceled()?;
        let target = self.write_target(path)?;
        target
            .item
            .fs
            .open_write(ctx, &target.inner, mode)
            .await
            .map_err(|err| remap_error(&target.item.mount_path, err))
    }

    async fn create_dir(&self, ctx: &Context, path: &VfsPath) -> Result<()> {
        ctx.ensure_not_canceled()?;
        if self.exists(ctx, path).await? {
            return Err(FsError::already_exists(path));
        }
        let target = self.write_target(path)?;
        target
            .item
            .fs
            .create_dir(ctx, &target.inner)
            .await
            .map_err(|err| remap_error(&target.item.mount_path, err))
    }

    /// Delete attempts every writable candidate and succeeds when at least
    /// one backend deleted the path.
    ///
    /// A candidate's `NotFound` just means it never held the path; any other
    /// failure is kept and surfaced when nothing was removed, so real errors
    /// are never mistaken for absence.
    async fn remove(&self, ctx: &Context, path: &VfsPath) -> Result<()> {
        ctx.ensure_not_canceled()?;
        let mut any_removed = false;
        let mut last_err: Option<FsError> = None;
        for candidate in self.candidates(path) {
            if candidate.item.read_only {
                continue;
            }
            ctx.ensure_not_canceled()?;
            match candidate.item.fs.remove(ctx, &candidate.inner).await {
                Ok(()) => any_removed = true,
                Err(FsError::NotFound { .. }) => {}
                Err(err) => {
                    last_err = Some(remap_error(&candidate.item.mount_path, err));
                }
            }
        }
        if any_removed {
            return Ok(());
        }
        match last_err {
            Some(err) => Err(err),
            None => Err(FsError::not_found(path)),
        }
    }

    async fn copy_file(
        &self,
        ctx: &Context,
        src: &VfsPath,
        dst: &VfsPath,
        overwrite: bool,
    ) -> Result<()> {
        ctx.ensure_not_canceled()?;
        let source = self
            .read_source(ctx, src)
            .await?
            .ok_or_else(|| FsError::not_found(src))?;
        let target = self.write_target(dst)?;

        if source.index == target.index {
            return source
                .item
                .fs
                .copy_file(ctx, &source.inner, &target.inner, overwrite)
                .await
                .map_err(|err| remap_error(&source.item.mount_path, err));
        }

        // Different backends: materialize and rewrite (see DESIGN.md).
        if !overwrite && self.exists(ctx, dst).await? {
            return Err(FsError::already_exists_from(dst, src));
        }
        let data = self.read_to_bytes(ctx, src, ReadRange::full()).await?;
        let mode = if overwrite {
            WriteMode::Overwrite
        } else {
            WriteMode::Create
        };
        target
            .item
            .fs
            .write_bytes(ctx, &target.inner, &data, mode)
            .await
            .map_err(|err| remap_error(&target.item.mount_path, err))
    }

    async fn rename(&self, ctx: &Context, src: &VfsPath, dst: &VfsPath) -> Result<()> {
        ctx.ensure_not_canceled()?;
        let source = self
            .read_source(ctx, src)
            .await?
            .ok_or_else(|| FsError::not_found(src))?;
        let target = self.write_target(dst)?;

        if source.index == target.index {
            return source
                .item
                .fs
                .rename(ctx, &source.inner, &target.inner)
                .await
                .map_err(|err| remap_error(&source.item.mount_path, err));
        }

        // Crossing storage: copy then recursively delete the source.
        let status = source
            .item
            .fs
            .stat(ctx, &source.inner)
            .await
            .map_err(|err| remap_error(&source.item.mount_path, err))?
            .ok_or_else(|| FsError::not_found(src))?;
        let opts = CopyOptions {
            overwrite: false,
            recursive: status.is_directory,
        };
        self.copy(ctx, src, dst, opts).await?;
        self.delete(ctx, src, DeleteOptions::recursive()).await
    }
}
