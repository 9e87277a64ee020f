//! Read-through block cache with sequential read-ahead.
//!
//! [`BlockCacheFs`] sits between an origin filesystem and a cache-storage
//! filesystem. File bytes are cached in fixed-size blocks under the hash
//! layout of [`super::layout`]; each entry carries a `meta.json` whose
//! recorded path, size, block size and version must match before any cached
//! block is served, which also defends against 16-hex-prefix collisions.
//! Cache-layer failures never fail a read; the origin is the fallback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::{Cancellation, Clock, Context, SystemClock};
use crate::error::{FsError, Result};
use crate::fs::cache::layout::{self, CACHE_META_VERSION};
use crate::fs::cache::readahead::ReadAheadTracker;
use crate::fs::traits::{
    ByteStream, FileSystem, MkdirOptions, ReadRange, WriteMode, WriteSink,
};
use crate::path::VfsPath;
use crate::status::FileStatus;

/// How long the in-process memos keep an entry.
const MEMO_TTL: Duration = Duration::from_secs(30);
const MEMO_CAPACITY: u64 = 4096;

/// Tuning knobs for [`BlockCacheFs`].
#[derive(Debug, Clone)]
pub struct BlockCacheConfig {
    /// Fixed size of a cached block in bytes.
    pub block_size: u32,
    /// How many blocks to prefetch ahead of a sequential reader.
    pub read_ahead_blocks: u32,
    /// Master switch for prefetching.
    pub enable_read_ahead: bool,
}

impl Default for BlockCacheConfig {
    fn default() -> Self {
        Self {
            block_size: 1024 * 1024,
            read_ahead_blocks: 2,
            enable_read_ahead: true,
        }
    }
}

/// Per-file cache bookkeeping persisted as `meta.json`.
///
/// `file_path` is recorded so that two paths colliding on their hash prefix
/// can never serve each other's bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
    /// Logical path the entry belongs to.
    pub file_path: VfsPath,
    /// Origin file size the blocks were cut from.
    pub file_size: u64,
    /// Block size the entry was written with.
    pub block_size: u32,
    /// `ceil(file_size / block_size)`.
    pub total_blocks: u32,
    /// Sorted indices of the blocks present under `blocks/`.
    pub cached_blocks: Vec<u32>,
    /// Last time a block was added.
    pub last_modified: DateTime<Utc>,
    /// Metadata format version.
    pub version: String,
}

impl CacheMetadata {
    fn new(file_path: VfsPath, file_size: u64, block_size: u32, now: DateTime<Utc>) -> Self {
        Self {
            file_path,
            file_size,
            block_size,
            total_blocks: total_blocks(file_size, block_size),
            cached_blocks: Vec::new(),
            last_modified: now,
            version: CACHE_META_VERSION.to_string(),
        }
    }

    /// Whether this record still describes `path` as the origin reports it.
    fn matches(&self, path: &VfsPath, block_size: u32, file_size: u64) -> bool {
        self.file_path == *path
            && self.block_size == block_size
            && self.version == CACHE_META_VERSION
            && self.file_size == file_size
    }
}

fn total_blocks(file_size: u64, block_size: u32) -> u32 {
    if file_size == 0 {
        return 0;
    }
    file_size.div_ceil(block_size as u64) as u32
}

struct BlockCacheInner {
    origin: Arc<dyn FileSystem>,
    cache: Arc<dyn FileSystem>,
    config: BlockCacheConfig,
    clock: Arc<dyn Clock>,
    /// Recent origin stat results, to absorb bursts of block accesses.
    stat_memo: moka::sync::Cache<String, Option<FileStatus>>,
    /// Parsed `meta.json` records.
    meta_memo: moka::sync::Cache<String, CacheMetadata>,
    /// Integrity-validation verdicts.
    valid_memo: moka::sync::Cache<String, bool>,
    read_ahead: ReadAheadTracker,
    /// Serializes cache-storage writes and invalidations.
    write_serial: tokio::sync::Mutex<()>,
    /// Per-path invalidation epochs. A deferred write-back captured its
    /// epoch before reading the origin; a bump in between means the data it
    /// holds may predate a mutation and must not be persisted.
    generations: std::sync::Mutex<std::collections::HashMap<String, u64>>,
}

/// Read-through block cache over an origin filesystem.
///
/// Reads are served block-wise from the cache storage when the entry
/// validates, falling back to the origin otherwise; blocks fetched from the
/// origin are written back asynchronously. Mutations through this adapter
/// invalidate the touched entries.
#[derive(Clone)]
pub struct BlockCacheFs {
    inner: Arc<BlockCacheInner>,
}

impl BlockCacheFs {
    /// Cache `origin` into `cache` with the given configuration.
    pub fn new(
        origin: Arc<dyn FileSystem>,
        cache: Arc<dyn FileSystem>,
        config: BlockCacheConfig,
    ) -> Self {
        Self::with_clock(origin, cache, config, Arc::new(SystemClock))
    }

    /// Like [`new`](Self::new) with an injected clock, for tests.
    pub fn with_clock(
        origin: Arc<dyn FileSystem>,
        cache: Arc<dyn FileSystem>,
        config: BlockCacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        fn memo<K, V>() -> moka::sync::Cache<K, V>
        where
            K: std::hash::Hash + Eq + Send + Sync + 'static,
            V: Clone + Send + Sync + 'static,
        {
            moka::sync::Cache::builder()
                .time_to_live(MEMO_TTL)
                .max_capacity(MEMO_CAPACITY)
                .build()
        }
        Self {
            inner: Arc::new(BlockCacheInner {
                origin,
                cache,
                config,
                clock,
                stat_memo: memo(),
                meta_memo: memo(),
                valid_memo: memo(),
                read_ahead: ReadAheadTracker::new(),
                write_serial: tokio::sync::Mutex::new(()),
                generations: std::sync::Mutex::new(std::collections::HashMap::new()),
            }),
        }
    }
}

impl BlockCacheInner {
    /// Origin stat through the short-TTL memo, for bursts of block access.
    async fn origin_stat_memo(&self, ctx: &Context, path: &VfsPath) -> Result<Option<FileStatus>> {
        let key = path.to_string();
        if let Some(status) = self.stat_memo.get(&key) {
            return Ok(status);
        }
        let status = self.origin.stat(ctx, path).await?;
        self.stat_memo.insert(key, status.clone());
        Ok(status)
    }

    async fn load_metadata(&self, ctx: &Context, path: &VfsPath) -> Option<CacheMetadata> {
        let key = path.to_string();
        if let Some(meta) = self.meta_memo.get(&key) {
            return Some(meta);
        }
        let raw = self
            .cache
            .read_to_bytes(ctx, &layout::meta_path(path), ReadRange::full())
            .await
            .ok()?;
        match serde_json::from_slice::<CacheMetadata>(&raw) {
            Ok(meta) => {
                self.meta_memo.insert(key, meta.clone());
                Some(meta)
            }
            Err(err) => {
                debug!(
                    op = ctx.operation_id(),
                    path = %path,
                    error = %err,
                    "block cache: unreadable metadata treated as miss"
                );
                None
            }
        }
    }

    async fn store_metadata(&self, ctx: &Context, path: &VfsPath, meta: &CacheMetadata) -> Result<()> {
        let raw = serde_json::to_vec(meta).map_err(|err| {
            FsError::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, err))
        })?;
        self.cache
            .write_bytes(ctx, &layout::meta_path(path), &raw, WriteMode::Overwrite)
            .await?;
        let key = path.to_string();
        self.meta_memo.insert(key.clone(), meta.clone());
        self.valid_memo.insert(key, true);
        Ok(())
    }

    /// Integrity validation for the entry of `path`.
    ///
    /// A mismatch on recorded path (hash-prefix collision), block size,
    /// version or origin size invalidates the whole entry.
    async fn validate_entry(&self, ctx: &Context, path: &VfsPath, file_size: u64) -> bool {
        let key = path.to_string();
        if let Some(valid) = self.valid_memo.get(&key) {
            return valid;
        }
        let valid = match self.load_metadata(ctx, path).await {
            Some(meta) => meta.matches(path, self.config.block_size, file_size),
            None => false,
        };
        if !valid {
            self.purge_entry_storage(ctx, path).await;
        }
        self.valid_memo.insert(key, valid);
        valid
    }

    fn generation(&self, key: &str) -> u64 {
        self.generations.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    fn bump_generation(&self, key: &str) {
        *self
            .generations
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_insert(0) += 1;
    }

    /// Delete the entry's hash directory and drop stale memo state.
    ///
    /// Bumps the invalidation epoch so deferred write-backs holding
    /// pre-purge data are discarded.
    async fn purge_entry_storage(&self, ctx: &Context, path: &VfsPath) {
        let _serial = self.write_serial.lock().await;
        self.bump_generation(&path.to_string());
        layout::remove_entry(self.cache.as_ref(), ctx, path).await;
        let key = path.to_string();
        self.meta_memo.invalidate(&key);
        self.valid_memo.invalidate(&key);
    }

    /// Full invalidation after a mutation of `path` through the cache.
    async fn invalidate_entry(&self, ctx: &Context, path: &VfsPath) {
        debug!(op = ctx.operation_id(), path = %path, "block cache: invalidate");
        self.purge_entry_storage(ctx, path).await;
        let key = path.to_string();
        self.stat_memo.invalidate(&key);
        self.read_ahead.reset(&key);
    }

    /// Persist one fetched block and fold it into the metadata.
    ///
    /// `cancel` is the originating operation's signal: a canceled operation
    /// must not leave partial cache state behind, so the block is staged
    /// under a temporary name and renamed into place.
    async fn store_block(
        &self,
        ctx: &Context,
        cancel: &Cancellation,
        path: &VfsPath,
        block: u32,
        data: &Bytes,
        file_size: u64,
        generation: u64,
    ) -> Result<()> {
        if cancel.is_canceled() {
            return Ok(());
        }
        let _serial = self.write_serial.lock().await;
        if self.generation(&path.to_string()) != generation {
            // The entry was invalidated after this data was read.
            return Ok(());
        }
        let blocks_dir = layout::blocks_dir(path);
        match self
            .cache
            .make_dir(ctx, &blocks_dir, MkdirOptions::with_parents())
            .await
        {
            Ok(()) | Err(FsError::AlreadyExists { .. }) => {}
            Err(err) => return Err(err),
        }

        let final_path = layout::block_path(path, block);
        let tmp_path = blocks_dir.join(&format!("{block}.tmp-{}", ctx.operation_id()));
        self.cache
            .write_bytes(ctx, &tmp_path, data, WriteMode::Overwrite)
            .await?;
        if cancel.is_canceled() {
            let _ = self.cache.remove(ctx, &tmp_path).await;
            return Ok(());
        }
        match self.cache.remove(ctx, &final_path).await {
            Ok(()) | Err(FsError::NotFound { .. }) => {}
            Err(err) => {
                let _ = self.cache.remove(ctx, &tmp_path).await;
                return Err(err);
            }
        }
        self.cache.rename(ctx, &tmp_path, &final_path).await?;

        let mut meta = match self.load_metadata(ctx, path).await {
            Some(meta) if meta.matches(path, self.config.block_size, file_size) => meta,
            _ => CacheMetadata::new(
                path.clone(),
                file_size,
                self.config.block_size,
                self.clock.now(),
            ),
        };
        if let Err(pos) = meta.cached_blocks.binary_search(&block) {
            meta.cached_blocks.insert(pos, block);
        }
        meta.last_modified = self.clock.now();
        self.store_metadata(ctx, path, &meta).await
    }

    /// Serve one full block, from the cache when the entry validates, from
    /// the origin otherwise (with an asynchronous write-back).
    async fn fetch_block(
        self: &Arc<Self>,
        ctx: &Context,
        path: &VfsPath,
        block: u32,
        file_size: u64,
    ) -> Result<Bytes> {
        if self.validate_entry(ctx, path, file_size).await {
            let block_path = layout::block_path(path, block);
            match self.cache.stat(ctx, &block_path).await {
                Ok(Some(_)) => {
                    match self
                        .cache
                        .read_to_bytes(ctx, &block_path, ReadRange::full())
                        .await
                    {
                        Ok(data) => {
                            debug!(
                                op = ctx.operation_id(),
                                path = %path,
                                block,
                                "block cache: hit"
                            );
                            return Ok(Bytes::from(data));
                        }
                        Err(err) => warn!(
                            op = ctx.operation_id(),
                            path = %path,
                            block,
                            error = %err,
                            "block cache: read failed, falling back to origin"
                        ),
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(
                    op = ctx.operation_id(),
                    path = %path,
                    block,
                    error = %err,
                    "block cache: stat failed, falling back to origin"
                ),
            }
        }

        let generation = self.generation(&path.to_string());
        let block_size = self.config.block_size as u64;
        let start = block as u64 * block_size;
        let end = ((block as u64 + 1) * block_size).min(file_size);
        let data = self
            .origin
            .read_to_bytes(ctx, path, ReadRange::new(start, end))
            .await?;
        let bytes = Bytes::from(data);

        let inner = Arc::clone(self);
        let task_ctx = Context::with_operation_id(ctx.operation_id());
        let cancel = ctx.cancellation().clone();
        let task_path = path.clone();
        let task_data = bytes.clone();
        tokio::spawn(async move {
            if let Err(err) = inner
                .store_block(
                    &task_ctx,
                    &cancel,
                    &task_path,
                    block,
                    &task_data,
                    file_size,
                    generation,
                )
                .await
            {
                debug!(
                    op = task_ctx.operation_id(),
                    path = %task_path,
                    block,
                    error = %err,
                    "block cache: write-back failed"
                );
            }
        });
        Ok(bytes)
    }

    /// Schedule prefetches after `block` was served.
    async fn trigger_read_ahead(
        self: &Arc<Self>,
        ctx: &Context,
        path: &VfsPath,
        block: u32,
        file_size: u64,
    ) {
        if !self.config.enable_read_ahead || self.config.read_ahead_blocks == 0 {
            return;
        }
        let key = path.to_string();
        if !self.read_ahead.record_access(&key, block) {
            return;
        }
        let total = total_blocks(file_size, self.config.block_size);
        if total == 0 {
            return;
        }
        let last = total - 1;
        let cached = self
            .load_metadata(ctx, path)
            .await
            .map(|meta| meta.cached_blocks)
            .unwrap_or_default();

        let window_end = block.saturating_add(self.config.read_ahead_blocks).min(last);
        let mut next = block.saturating_add(1);
        while next <= window_end {
            if cached.binary_search(&next).is_ok() {
                next += 1;
                continue;
            }
            if !self.read_ahead.begin_prefetch(&key, next) {
                next += 1;
                continue;
            }

            let inner = Arc::clone(self);
            let task_ctx = Context::with_operation_id(ctx.operation_id());
            let cancel = ctx.cancellation().clone();
            let task_path = path.clone();
            let task_key = key.clone();
            let generation = self.generation(&key);
            tokio::spawn(async move {
                if !cancel.is_canceled() {
                    let block_size = inner.config.block_size as u64;
                    let start = next as u64 * block_size;
                    let end = ((next as u64 + 1) * block_size).min(file_size);
                    let result = async {
                        let data = inner
                            .origin
                            .read_to_bytes(&task_ctx, &task_path, ReadRange::new(start, end))
                            .await?;
                        inner
                            .store_block(
                                &task_ctx,
                                &cancel,
                                &task_path,
                                next,
                                &Bytes::from(data),
                                file_size,
                                generation,
                            )
                            .await
                    }
                    .await;
                    if let Err(err) = result {
                        debug!(
                            op = task_ctx.operation_id(),
                            path = %task_path,
                            block = next,
                            error = %err,
                            "block cache: prefetch failed"
                        );
                    }
                }
                inner.read_ahead.finish_prefetch(&task_key, next);
            });
            next += 1;
        }
    }
}

#[async_trait]
impl FileSystem for BlockCacheFs {
    async fn stat(&self, ctx: &Context, path: &VfsPath) -> Result<Option<FileStatus>> {
        self.inner.origin.stat(ctx, path).await
    }

    async fn read_dir(&self, ctx: &Context, path: &VfsPath) -> Result<Vec<FileStatus>> {
        self.inner.origin.read_dir(ctx, path).await
    }

    async fn open_read(
        &self,
        ctx: &Context,
        path: &VfsPath,
        range: ReadRange,
    ) -> Result<ByteStream> {
        ctx.ensure_not_canceled()?;
        let status = match self.inner.origin_stat_memo(ctx, path).await? {
            None => return Err(FsError::not_found(path)),
            Some(status) if status.is_directory => return Err(FsError::not_a_file(path)),
            Some(status) => status,
        };
        let file_size = status.size.unwrap_or(0);
        let (start, end) = range.clamp_to(file_size);
        if start >= end {
            return Ok(Box::pin(futures_util::stream::empty()));
        }

        let block_size = self.inner.config.block_size as u64;
        let end_block = ((end - 1) / block_size) as u32;

        struct ReadState {
            inner: Arc<BlockCacheInner>,
            ctx: Context,
            path: VfsPath,
            file_size: u64,
            start: u64,
            end: u64,
            next_block: u32,
            end_block: u32,
        }

        let state = ReadState {
            inner: Arc::clone(&self.inner),
            ctx: ctx.clone(),
            path: path.clone(),
            file_size,
            start,
            end,
            next_block: (start / block_size) as u32,
            end_block,
        };
        let stream = futures_util::stream::try_unfold(state, |mut state| async move {
            if state.next_block > state.end_block {
                return Ok(None);
            }
            state.ctx.ensure_not_canceled()?;
            let block = state.next_block;
            let data = state
                .inner
                .fetch_block(&state.ctx, &state.path, block, state.file_size)
                .await?;

            // Slice the block to the exact requested sub-range. Bounds are
            // clamped to the data actually fetched in case the origin file
            // shrank between stat and read.
            let block_size = state.inner.config.block_size as u64;
            let block_start = block as u64 * block_size;
            let len = data.len() as u64;
            let lo = (state.start.max(block_start) - block_start).min(len);
            let hi = state
                .end
                .min(block_start + len)
                .saturating_sub(block_start)
                .max(lo);
            let chunk = data.slice(lo as usize..hi as usize);

            state
                .inner
                .trigger_read_ahead(&state.ctx, &state.path, block, state.file_size)
                .await;

            state.next_block += 1;
            Ok(Some((chunk, state)))
        });
        Ok(Box::pin(stream))
    }

    async fn open_write(
        &self,
        ctx: &Context,
        path: &VfsPath,
        mode: WriteMode,
    ) -> Result<Box<dyn WriteSink>> {
        let sink = self.inner.origin.open_write(ctx, path, mode).await?;
        Ok(Box::new(InvalidatingSink {
            sink,
            inner: Arc::clone(&self.inner),
            ctx: ctx.clone(),
            path: path.clone(),
        }))
    }

    async fn create_dir(&self, ctx: &Context, path: &VfsPath) -> Result<()> {
        self.inner.origin.create_dir(ctx, path).await
    }

    async fn remove(&self, ctx: &Context, path: &VfsPath) -> Result<()> {
        self.inner.origin.remove(ctx, path).await?;
        self.inner.invalidate_entry(ctx, path).await;
        Ok(())
    }

    async fn copy_file(
        &self,
        ctx: &Context,
        src: &VfsPath,
        dst: &VfsPath,
        overwrite: bool,
    ) -> Result<()> {
        self.inner.origin.copy_file(ctx, src, dst, overwrite).await?;
        self.inner.invalidate_entry(ctx, dst).await;
        Ok(())
    }

    async fn rename(&self, ctx: &Context, src: &VfsPath, dst: &VfsPath) -> Result<()> {
        self.inner.origin.rename(ctx, src, dst).await?;
        self.inner.invalidate_entry(ctx, src).await;
        self.inner.invalidate_entry(ctx, dst).await;
        Ok(())
    }
}

/// Sink decorator that invalidates the cache entry exactly once after the
/// inner sink closed, even when the close errored.
struct InvalidatingSink {
    sink: Box<dyn WriteSink>,
    inner: Arc<BlockCacheInner>,
    ctx: Context,
    path: VfsPath,
}

#[async_trait]
impl WriteSink for InvalidatingSink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.sink.write(chunk).await
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let this = *self;
        let result = this.sink.close().await;
        // Run on a detached context so a canceled operation still
        // invalidates whatever the inner sink may have persisted.
        let cleanup_ctx = Context::with_operation_id(this.ctx.operation_id());
        this.inner.invalidate_entry(&cleanup_ctx, &this.path).await;
        result
    }
}
