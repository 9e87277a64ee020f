//! Path-aliasing adapter.
//!
//! [`AliasFs`] re-roots a child directory of a wrapped filesystem as its own
//! root: every outgoing path is prefixed with the sub-directory, every
//! incoming status (and error) has the prefix stripped again.

use std::io::{Error as IoError, ErrorKind};
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::{FsError, Result};
use crate::fs::traits::{ByteStream, FileSystem, ReadRange, WriteMode, WriteSink};
use crate::path::VfsPath;
use crate::status::FileStatus;

/// Bijective mapping between an alias path space and a subtree of the
/// wrapped filesystem rooted at `sub_directory`.
pub struct AliasFs {
    inner: Arc<dyn FileSystem>,
    sub_directory: VfsPath,
}

impl AliasFs {
    /// Expose `sub_directory` of `inner` as a filesystem root.
    pub fn new(inner: Arc<dyn FileSystem>, sub_directory: VfsPath) -> Self {
        Self {
            inner,
            sub_directory,
        }
    }

    fn to_inner(&self, path: &VfsPath) -> VfsPath {
        self.sub_directory.join_path(path)
    }

    /// Strip the sub-directory prefix from a status coming back up.
    ///
    /// The prefix is always present; a status outside the subtree means the
    /// wrapped filesystem leaked a foreign path.
    fn to_alias_status(&self, status: FileStatus) -> Result<FileStatus> {
        match status.path.strip_prefix(&self.sub_directory) {
            Some(alias_path) => Ok(status.with_path(alias_path)),
            None => Err(FsError::io(
                &status.path,
                IoError::new(ErrorKind::InvalidInput, "path escapes aliased subtree"),
            )),
        }
    }

    /// Rewrite error paths back into the alias path space where they apply.
    fn to_alias_error(&self, err: FsError) -> FsError {
        err.map_paths(|path| path.strip_prefix(&self.sub_directory).unwrap_or(path))
    }
}

#[async_trait]
impl FileSystem for AliasFs {
    async fn stat(&self, ctx: &Context, path: &VfsPath) -> Result<Option<FileStatus>> {
        match self.inner.stat(ctx, &self.to_inner(path)).await {
            Ok(Some(status)) => Ok(Some(self.to_alias_status(status)?)),
            Ok(None) => Ok(None),
            Err(err) => Err(self.to_alias_error(err)),
        }
    }

    async fn read_dir(&self, ctx: &Context, path: &VfsPath) -> Result<Vec<FileStatus>> {
        let entries = self
            .inner
            .read_dir(ctx, &self.to_inner(path))
            .await
            .map_err(|err| self.to_alias_error(err))?;
        entries
            .into_iter()
            .map(|status| self.to_alias_status(status))
            .collect()
    }

    async fn open_read(
        &self,
        ctx: &Context,
        path: &VfsPath,
        range: ReadRange,
    ) -> Result<ByteStream> {
        self.inner
            .open_read(ctx, &self.to_inner(path), range)
            .await
            .map_err(|err| self.to_alias_error(err))
    }

    async fn open_write(
        &self,
        ctx: &Context,
        path: &VfsPath,
        mode: WriteMode,
    ) -> Result<Box<dyn WriteSink>> {
        self.inner
            .open_write(ctx, &self.to_inner(path), mode)
            .await
            .map_err(|err| self.to_alias_error(err))
    }

    async fn create_dir(&self, ctx: &Context, path: &VfsPath) -> Result<()> {
        self.inner
            .create_dir(ctx, &self.to_inner(path))
            .await
            .map_err(|err| self.to_alias_error(err))
    }

    async fn remove(&self, ctx: &Context, path: &VfsPath) -> Result<()> {
        self.inner
            .remove(ctx, &self.to_inner(path))
            .await
            .map_err(|err| self.to_alias_error(err))
    }

    async fn copy_file(
        &self,
        ctx: &Context,
        src: &VfsPath,
        dst: &VfsPath,
        overwrite: bool,
    ) -> Result<()> {
        self.inner
            .copy_file(ctx, &self.to_inner(src), &self.to_inner(dst), overwrite)
            .await
            .map_err(|err| self.to_alias_error(err))
    }

    async fn rename(&self, ctx: &Context, src: &VfsPath, dst: &VfsPath) -> Result<()> {
        self.inner
            .rename(ctx, &self.to_inner(src), &self.to_inner(dst))
            .await
            .map_err(|err| self.to_alias_error(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::memory::MemoryFs;
    use crate::fs::traits::MkdirOptions;

    async fn fixture() -> (Arc<MemoryFs>, AliasFs, Context) {
        let ctx = Context::new();
        let backing = Arc::new(MemoryFs::new());
        backing
            .make_dir(&ctx, &VfsPath::parse("/data/sub"), MkdirOptions::with_parents())
            .await
            .unwrap();
        let alias = AliasFs::new(backing.clone(), VfsPath::parse("/data"));
        (backing, alias, ctx)
    }

    #[tokio::test]
    async fn paths_are_rewritten_both_ways() {
        let (backing, alias, ctx) = fixture().await;
        alias
            .write_bytes(&ctx, &VfsPath::parse("/sub/file"), b"x", WriteMode::Create)
            .await
            .unwrap();

        // Stored under the sub-directory in the backing filesystem.
        assert!(
            backing
                .exists(&ctx, &VfsPath::parse("/data/sub/file"))
                .await
                .unwrap()
        );

        // Visible at the alias path with the alias path in the status.
        let status = alias
            .stat(&ctx, &VfsPath::parse("/sub/file"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.path.to_string(), "/sub/file");

        let entries = alias.read_dir(&ctx, &VfsPath::parse("/sub")).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path.to_string(), "/sub/file");
    }

    #[tokio::test]
    async fn alias_root_is_the_sub_directory() {
        let (_backing, alias, ctx) = fixture().await;
        let status = alias.stat(&ctx, &VfsPath::root()).await.unwrap().unwrap();
        assert!(status.is_directory);
        assert_eq!(status.path.to_string(), "/");
    }

    #[tokio::test]
    async fn errors_carry_alias_paths() {
        let (_backing, alias, ctx) = fixture().await;
        let err = alias
            .read_dir(&ctx, &VfsPath::parse("/missing"))
            .await
            .unwrap_err();
        match err {
            FsError::NotFound { path } => assert_eq!(path.to_string(), "/missing"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn sibling_subtrees_are_invisible() {
        let (backing, alias, ctx) = fixture().await;
        backing
            .write_bytes(&ctx, &VfsPath::parse("/outside"), b"x", WriteMode::Create)
            .await
            .unwrap();
        assert!(!alias.exists(&ctx, &VfsPath::parse("/outside")).await.unwrap());
    }
}
