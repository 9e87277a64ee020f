//! In-memory filesystem implementation.
//!
//! [`MemoryFs`] keeps a rooted tree of nodes behind an `RwLock`; lookups are
//! O(depth). It is the reference backend for conformance tests and the usual
//! substrate for cache storage.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use crate::context::Context;
use crate::error::{FsError, Result};
use crate::fs::check;
use crate::fs::traits::{ByteStream, FileSystem, ReadRange, WriteMode, WriteSink};
use crate::path::VfsPath;
use crate::status::FileStatus;

const READ_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
enum Node {
    File { data: Vec<u8> },
    Dir { children: BTreeMap<String, Node> },
}

impl Node {
    fn empty_dir() -> Self {
        Node::Dir {
            children: BTreeMap::new(),
        }
    }

    fn status(&self, path: VfsPath) -> FileStatus {
        match self {
            Node::File { data } => FileStatus::file(path, data.len() as u64),
            Node::Dir { .. } => FileStatus::directory(path),
        }
    }
}

/// Diagnostics counters kept by [`MemoryFs`].
#[derive(Debug, Default)]
struct Counters {
    operations: AtomicU64,
    bytes_written: AtomicU64,
    max_buffer_bytes: AtomicU64,
}

/// Point-in-time usage snapshot of a [`MemoryFs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryFsUsage {
    /// Number of files and directories, the root excluded.
    pub entity_count: u64,
    /// Bytes held by file payloads and entry names.
    pub resident_bytes: u64,
    /// Total primitive operations served.
    pub operations: u64,
    /// Total bytes accepted by write sinks.
    pub bytes_written: u64,
    /// Largest staged write buffer observed.
    pub max_buffer_bytes: u64,
}

struct MemoryInner {
    tree: RwLock<Node>,
    counters: Counters,
}

/// In-memory filesystem.
///
/// Cloning is cheap and clones share the same tree.
#[derive(Clone)]
pub struct MemoryFs {
    inner: Arc<MemoryInner>,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFs {
    /// Create a new filesystem containing only the root directory.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                tree: RwLock::new(Node::empty_dir()),
                counters: Counters::default(),
            }),
        }
    }

    /// Usage diagnostics: entity count, resident bytes, operation counters.
    pub fn usage(&self) -> MemoryFsUsage {
        // Lock poisoning means a writer panicked mid-mutation; propagate.
        let tree = self.inner.tree.read().unwrap();
        let mut entity_count = 0u64;
        let mut resident_bytes = 0u64;
        let mut stack = vec![&*tree];
        while let Some(node) = stack.pop() {
            if let Node::Dir { children } = node {
                for (name, child) in children {
                    entity_count += 1;
                    resident_bytes += name.len() as u64;
                    if let Node::File { data } = child {
                        resident_bytes += data.len() as u64;
                    }
                    stack.push(child);
                }
            }
        }
        MemoryFsUsage {
            entity_count,
            resident_bytes,
            operations: self.inner.counters.operations.load(Ordering::Relaxed),
            bytes_written: self.inner.counters.bytes_written.load(Ordering::Relaxed),
            max_buffer_bytes: self.inner.counters.max_buffer_bytes.load(Ordering::Relaxed),
        }
    }

    fn count_op(&self) {
        self.inner.counters.operations.fetch_add(1, Ordering::Relaxed);
    }

    fn record_write(&self, buffer_len: u64) {
        self.inner
            .counters
            .bytes_written
            .fetch_add(buffer_len, Ordering::Relaxed);
        self.inner
            .counters
            .max_buffer_bytes
            .fetch_max(buffer_len, Ordering::Relaxed);
    }

    fn node_at<'t>(root: &'t Node, path: &VfsPath) -> Option<&'t Node> {
        let mut node = root;
        for segment in path.segments() {
            match node {
                Node::Dir { children } => node = children.get(segment)?,
                Node::File { .. } => return None,
            }
        }
        Some(node)
    }

    /// Mutable handle on the map holding `path`'s entry, plus the entry name.
    fn parent_children_mut<'t>(
        root: &'t mut Node,
        path: &VfsPath,
    ) -> Result<(&'t mut BTreeMap<String, Node>, String)> {
        let name = path
            .filename()
            .ok_or_else(|| FsError::UnsupportedEntity { path: path.clone() })?
            .to_string();
        let parent = path.parent().expect("non-root path has a parent");
        let mut node = root;
        for segment in parent.segments() {
            match node {
                Node::Dir { children } => {
                    node = children
                        .get_mut(segment)
                        .ok_or_else(|| FsError::not_found(&parent))?;
                }
                Node::File { .. } => return Err(FsError::not_a_directory(&parent)),
            }
        }
        match node {
            Node::Dir { children } => Ok((children, name)),
            Node::File { .. } => Err(FsError::not_a_directory(&parent)),
        }
    }

    /// Replace (or create) the file node at `path` with `data`.
    ///
    /// The parent must already exist; preconditions are the caller's job.
    fn commit_file(&self, path: &VfsPath, data: Vec<u8>) -> Result<()> {
        let mut tree = self.inner.tree.write().unwrap();
        let (children, name) = Self::parent_children_mut(&mut tree, path)?;
        if let Some(Node::Dir { .. }) = children.get(&name) {
            return Err(FsError::not_a_file(path));
        }
        children.insert(name, Node::File { data });
        Ok(())
    }

    fn read_file_data(&self, path: &VfsPath) -> Result<Option<Vec<u8>>> {
        let tree = self.inner.tree.read().unwrap();
        match Self::node_at(&tree, path) {
            Some(Node::File { data }) => Ok(Some(data.clone())),
            Some(Node::Dir { .. }) => Err(FsError::not_a_file(path)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl FileSystem for MemoryFs {
    async fn stat(&self, ctx: &Context, path: &VfsPath) -> Result<Option<FileStatus>> {
        ctx.ensure_not_canceled()?;
        self.count_op();
        let tree = self.inner.tree.read().unwrap();
        Ok(Self::node_at(&tree, path).map(|node| node.status(path.clone())))
    }

    async fn read_dir(&self, ctx: &Context, path: &VfsPath) -> Result<Vec<FileStatus>> {
        ctx.ensure_not_canceled()?;
        self.count_op();
        let tree = self.inner.tree.read().unwrap();
        match Self::node_at(&tree, path) {
            Some(Node::Dir { children }) => Ok(children
                .iter()
                .map(|(name, node)| node.status(path.join(name)))
                .collect()),
            Some(Node::File { .. }) => Err(FsError::not_a_directory(path)),
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
        self.count_op();
        let status = check::before_open_read(self, ctx, path).await?;
        let size = status.size.unwrap_or(0);
        let (start, end) = range.clamp_to(size);
        if start >= end {
            return Ok(Box::pin(futures_util::stream::empty()));
        }

        let data = self
            .read_file_data(path)?
            .ok_or_else(|| FsError::not_found(path))?;
        let slice = Bytes::copy_from_slice(&data[start as usize..end as usize]);
        let chunks: Vec<Result<Bytes>> = (0..slice.len())
            .step_by(READ_CHUNK_SIZE)
            .map(|offset| {
                let stop = (offset + READ_CHUNK_SIZE).min(slice.len());
                Ok(slice.slice(offset..stop))
            })
            .collect();
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }

    async fn open_write(
        &self,
        ctx: &Context,
        path: &VfsPath,
        mode: WriteMode,
    ) -> Result<Box<dyn WriteSink>> {
        ctx.ensure_not_canceled()?;
        self.count_op();
        check::before_open_write(self, ctx, path, mode).await?;
        let buffer = match mode {
            WriteMode::Append => self.read_file_data(path)?.unwrap_or_default(),
            WriteMode::Create | WriteMode::Overwrite => Vec::new(),
        };
        Ok(Box::new(MemoryWriteSink {
            fs: self.clone(),
            ctx: ctx.clone(),
            path: path.clone(),
            buffer,
        }))
    }

    async fn create_dir(&self, ctx: &Context, path: &VfsPath) -> Result<()> {
        ctx.ensure_not_canceled()?;
        self.count_op();
        let mut tree = self.inner.tree.write().unwrap();
        let (children, name) = Self::parent_children_mut(&mut tree, path)?;
        if children.contains_key(&name) {
            return Err(FsError::already_exists(path));
        }
        children.insert(name, Node::empty_dir());
        Ok(())
    }

    async fn remove(&self, ctx: &Context, path: &VfsPath) -> Result<()> {
        ctx.ensure_not_canceled()?;
        self.count_op();
        let mut tree = self.inner.tree.write().unwrap();
        let (children, name) = Self::parent_children_mut(&mut tree, path)?;
        match children.get(&name) {
            Some(Node::Dir {
                children: grandchildren,
            }) if !grandchildren.is_empty() => Err(FsError::NotEmptyDirectory { path: path.clone() }),
            Some(_) => {
                children.remove(&name);
                Ok(())
            }
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
        self.count_op();
        let mut tree = self.inner.tree.write().unwrap();
        let data = match Self::node_at(&tree, src) {
            Some(Node::File { data }) => data.clone(),
            Some(Node::Dir { .. }) => return Err(FsError::not_a_file(src)),
            None => return Err(FsError::not_found(src)),
        };
        let (children, name) = Self::parent_children_mut(&mut tree, dst)?;
        match children.get(&name) {
            Some(Node::Dir { .. }) => return Err(FsError::not_a_file(dst)),
            Some(Node::File { .. }) if !overwrite => {
                return Err(FsError::already_exists_from(dst, src));
            }
            _ => {}
        }
        children.insert(name, Node::File { data });
        Ok(())
    }

    async fn rename(&self, ctx: &Context, src: &VfsPath, dst: &VfsPath) -> Result<()> {
        ctx.ensure_not_canceled()?;
        self.count_op();
        if src.is_prefix_of(dst) {
            return Err(FsError::UnsupportedEntity { path: dst.clone() });
        }
        let mut tree = self.inner.tree.write().unwrap();
        // Validate the destination before detaching so a failure leaves the
        // tree unchanged.
        {
            let (dst_children, dst_name) = Self::parent_children_mut(&mut tree, dst)?;
            if dst_children.contains_key(&dst_name) {
                return Err(FsError::already_exists_from(dst, src));
            }
        }
        let node = {
            let (src_children, src_name) = Self::parent_children_mut(&mut tree, src)?;
            src_children
                .remove(&src_name)
                .ok_or_else(|| FsError::not_found(src))?
        };
        let (dst_children, dst_name) =
            Self::parent_children_mut(&mut tree, dst).expect("destination parent validated");
        dst_children.insert(dst_name, node);
        Ok(())
    }

    /// One-shot write that fuses existing contents and new data in a single
    /// allocation instead of staging through a sink buffer.
    async fn write_bytes(
        &self,
        ctx: &Context,
        path: &VfsPath,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<()> {
        ctx.ensure_not_canceled()?;
        self.count_op();
        check::before_open_write(self, ctx, path, mode).await?;
        let payload = match mode {
            WriteMode::Append => {
                let existing = self.read_file_data(path)?.unwrap_or_default();
                let mut fused = Vec::with_capacity(existing.len() + data.len());
                fused.extend_from_slice(&existing);
                fused.extend_from_slice(data);
                fused
            }
            WriteMode::Create | WriteMode::Overwrite => data.to_vec(),
        };
        self.record_write(payload.len() as u64);
        self.commit_file(path, payload)
    }
}

/// Write sink staging bytes into a growable buffer.
///
/// The buffer is materialized into the tree on `close`; `Append` seeds it
/// with the file's prior contents at open time.
struct MemoryWriteSink {
    fs: MemoryFs,
    ctx: Context,
    path: VfsPath,
    buffer: Vec<u8>,
}

#[async_trait]
impl WriteSink for MemoryWriteSink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.ctx.ensure_not_canceled()?;
        self.buffer.extend_from_slice(&chunk);
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.ctx.ensure_not_canceled()?;
        self.fs.record_write(self.buffer.len() as u64);
        self.fs.commit_file(&self.path, self.buffer)
    }
}
