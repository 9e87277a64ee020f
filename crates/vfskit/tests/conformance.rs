//! Universal conformance suite run against every backend and composition.

mod common;

use std::sync::Arc;

use common::assert_conformance;
use vfskit::{
    AliasFs, BlockCacheConfig, BlockCacheFs, Context, FileSystem, LocalFs, MemoryFs,
    MetadataCacheConfig, MetadataCacheFs, MkdirOptions, MountItem, UnionFs, VfsPath,
};

#[tokio::test]
async fn memory_backend() {
    assert_conformance(Arc::new(MemoryFs::new())).await;
}

#[tokio::test]
async fn local_backend() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    assert_conformance(Arc::new(LocalFs::new(dir.path()))).await;
}

#[tokio::test]
async fn alias_over_memory() {
    let ctx = Context::new();
    let backing = Arc::new(MemoryFs::new());
    backing
        .make_dir(&ctx, &VfsPath::parse("/mnt/data"), MkdirOptions::with_parents())
        .await
        .unwrap();
    assert_conformance(Arc::new(AliasFs::new(backing, VfsPath::parse("/mnt/data")))).await;
}

#[tokio::test]
async fn union_of_memories() {
    let upper = Arc::new(MemoryFs::new());
    let lower = Arc::new(MemoryFs::new());
    assert_conformance(Arc::new(UnionFs::new(vec![
        MountItem::new(upper, VfsPath::root()).priority(100),
        MountItem::new(lower, VfsPath::root()).priority(50).read_only(),
    ])))
    .await;
}

#[tokio::test]
async fn block_cache_over_memory() {
    let config = BlockCacheConfig {
        block_size: 64,
        read_ahead_blocks: 2,
        enable_read_ahead: true,
    };
    assert_conformance(Arc::new(BlockCacheFs::new(
        Arc::new(MemoryFs::new()),
        Arc::new(MemoryFs::new()),
        config,
    )))
    .await;
}

#[tokio::test]
async fn metadata_cache_over_memory() {
    assert_conformance(Arc::new(MetadataCacheFs::new(
        Arc::new(MemoryFs::new()),
        Arc::new(MemoryFs::new()),
        MetadataCacheConfig::default(),
    )))
    .await;
}

#[tokio::test]
async fn full_stack_composition() {
    // metadata cache over block cache over a union over memory: the whole
    // tower still honors the capability.
    let origin = Arc::new(MemoryFs::new());
    let union = Arc::new(UnionFs::new(vec![MountItem::new(
        origin,
        VfsPath::root(),
    )]));
    let block_cached = Arc::new(BlockCacheFs::new(
        union,
        Arc::new(MemoryFs::new()),
        BlockCacheConfig {
            block_size: 128,
            read_ahead_blocks: 1,
            enable_read_ahead: true,
        },
    ));
    let stacked = Arc::new(MetadataCacheFs::new(
        block_cached,
        Arc::new(MemoryFs::new()),
        MetadataCacheConfig::default(),
    ));
    assert_conformance(stacked).await;
}
