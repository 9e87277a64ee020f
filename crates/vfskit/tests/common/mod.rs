//! Shared conformance harness.
//!
//! [`assert_conformance`] exercises the universal capability properties
//! against any filesystem handed to it; every backend and composition must
//! pass unchanged.

// Each integration test target compiles this module separately and not all
// of them use every helper.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::TryStreamExt;
use pretty_assertions::assert_eq;
use vfskit::{
    Context, CopyOptions, DeleteOptions, FileSystem, FsError, ListOptions, MkdirOptions,
    ReadRange, VfsPath, WriteMode,
};

/// Poll `probe` until it reports true or a generous deadline passes.
pub async fn wait_for<F>(mut probe: F)
where
    F: AsyncFnMut() -> bool,
{
    for _ in 0..400 {
        if probe().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Run the universal conformance properties against `fs`.
///
/// Expects an empty, writable filesystem; leaves test residue behind.
pub async fn assert_conformance(fs: Arc<dyn FileSystem>) {
    let ctx = Context::new();

    round_trip(&*fs, &ctx).await;
    append_concatenates(&*fs, &ctx).await;
    delete_removes(&*fs, &ctx).await;
    fresh_directory_is_empty(&*fs, &ctx).await;
    create_parents(&*fs, &ctx).await;
    non_empty_delete(&*fs, &ctx).await;
    copy_overwrite(&*fs, &ctx).await;
    ranged_read(&*fs, &ctx).await;
    recursive_listing(&*fs, &ctx).await;
}

async fn round_trip(fs: &dyn FileSystem, ctx: &Context) {
    let path = VfsPath::parse("/p1.txt");
    let payload: Vec<u8> = (0u16..2048).map(|i| (i % 251) as u8).collect();
    fs.write_bytes(ctx, &path, &payload, WriteMode::Create)
        .await
        .expect("p1: write");
    let read = fs
        .read_to_bytes(ctx, &path, ReadRange::full())
        .await
        .expect("p1: read");
    assert_eq!(read, payload, "p1: read bytes equal written bytes");
}

async fn append_concatenates(fs: &dyn FileSystem, ctx: &Context) {
    let path = VfsPath::parse("/p2.txt");
    fs.write_bytes(ctx, &path, b"first", WriteMode::Create)
        .await
        .expect("p2: write");
    fs.write_bytes(ctx, &path, b"second", WriteMode::Append)
        .await
        .expect("p2: append");
    let read = fs
        .read_to_bytes(ctx, &path, ReadRange::full())
        .await
        .expect("p2: read");
    assert_eq!(read, b"firstsecond", "p2: append concatenates");
}

async fn delete_removes(fs: &dyn FileSystem, ctx: &Context) {
    let path = VfsPath::parse("/p3.txt");
    fs.write_bytes(ctx, &path, b"x", WriteMode::Create)
        .await
        .expect("p3: write");
    fs.delete(ctx, &path, DeleteOptions::default())
        .await
        .expect("p3: delete");
    assert!(!fs.exists(ctx, &path).await.expect("p3: exists"), "p3: gone");
}

async fn fresh_directory_is_empty(fs: &dyn FileSystem, ctx: &Context) {
    let path = VfsPath::parse("/p4");
    fs.make_dir(ctx, &path, MkdirOptions::default())
        .await
        .expect("p4: create");
    let status = fs
        .stat(ctx, &path)
        .await
        .expect("p4: stat")
        .expect("p4: present");
    assert!(status.is_directory, "p4: is a directory");
    let listing: Vec<_> = fs
        .list(ctx, &path, ListOptions::default())
        .await
        .expect("p4: list")
        .try_collect()
        .await
        .expect("p4: drain");
    assert!(listing.is_empty(), "p4: fresh directory lists empty");
}

async fn create_parents(fs: &dyn FileSystem, ctx: &Context) {
    let deep = VfsPath::parse("/p5/a/b/c");
    fs.make_dir(ctx, &deep, MkdirOptions::with_parents())
        .await
        .expect("p5: create with parents");
    for prefix in ["/p5", "/p5/a", "/p5/a/b", "/p5/a/b/c"] {
        let status = fs
            .stat(ctx, &VfsPath::parse(prefix))
            .await
            .expect("p5: stat")
            .expect("p5: ancestor exists");
        assert!(status.is_directory, "p5: {prefix} is a directory");
    }

    // A file in the middle of the chain blocks creation.
    fs.write_bytes(ctx, &VfsPath::parse("/p5/file"), b"x", WriteMode::Create)
        .await
        .expect("p5: write blocker");
    let err = fs
        .make_dir(ctx, &VfsPath::parse("/p5/file/sub"), MkdirOptions::with_parents())
        .await
        .expect_err("p5: file prefix must fail");
    assert!(
        matches!(err, FsError::NotADirectory { .. } | FsError::NotAFile { .. }),
        "p5: got {err}"
    );
}

async fn non_empty_delete(fs: &dyn FileSystem, ctx: &Context) {
    let dir = VfsPath::parse("/p6");
    fs.make_dir(ctx, &dir.join("sub"), MkdirOptions::with_parents())
        .await
        .expect("p6: dirs");
    fs.write_bytes(ctx, &dir.join("sub/f"), b"x", WriteMode::Create)
        .await
        .expect("p6: file");

    let err = fs
        .delete(ctx, &dir, DeleteOptions::default())
        .await
        .expect_err("p6: non-recursive delete of non-empty dir");
    assert!(
        matches!(err, FsError::NotEmptyDirectory { .. }),
        "p6: got {err}"
    );

    fs.delete(ctx, &dir, DeleteOptions::recursive())
        .await
        .expect("p6: recursive delete");
    for path in ["/p6", "/p6/sub", "/p6/sub/f"] {
        assert!(
            !fs.exists(ctx, &VfsPath::parse(path)).await.expect("p6: exists"),
            "p6: {path} unreachable after recursive delete"
        );
    }
}

async fn copy_overwrite(fs: &dyn FileSystem, ctx: &Context) {
    let src = VfsPath::parse("/p7-src");
    let dst = VfsPath::parse("/p7-dst");
    fs.write_bytes(ctx, &src, b"fresh", WriteMode::Create)
        .await
        .expect("p7: src");
    fs.write_bytes(ctx, &dst, b"stale", WriteMode::Create)
        .await
        .expect("p7: dst");

    let err = fs
        .copy(ctx, &src, &dst, CopyOptions::default())
        .await
        .expect_err("p7: copy without overwrite onto existing dst");
    assert!(matches!(err, FsError::AlreadyExists { .. }), "p7: got {err}");

    fs.copy(ctx, &src, &dst, CopyOptions::overwrite())
        .await
        .expect("p7: overwriting copy");
    let src_bytes = fs
        .read_to_bytes(ctx, &src, ReadRange::full())
        .await
        .expect("p7: read src");
    let dst_bytes = fs
        .read_to_bytes(ctx, &dst, ReadRange::full())
        .await
        .expect("p7: read dst");
    assert_eq!(src_bytes, dst_bytes, "p7: copy equalizes contents");
}

async fn ranged_read(fs: &dyn FileSystem, ctx: &Context) {
    let path = VfsPath::parse("/p8.bin");
    let payload: Vec<u8> = (0u16..512).map(|i| (i % 256) as u8).collect();
    fs.write_bytes(ctx, &path, &payload, WriteMode::Create)
        .await
        .expect("p8: write");

    for (start, end) in [(0u64, 1u64), (0, 512), (100, 300), (511, 512), (500, 9999)] {
        let read = fs
            .read_to_bytes(ctx, &path, ReadRange::new(start, end))
            .await
            .expect("p8: ranged read");
        let lo = (start as usize).min(payload.len());
        let hi = (end as usize).min(payload.len());
        assert_eq!(read, &payload[lo..hi], "p8: range [{start},{end})");
    }
}

async fn recursive_listing(fs: &dyn FileSystem, ctx: &Context) {
    let expected = [
        "/p9",
        "/p9/d1",
        "/p9/d1/f1",
        "/p9/d1/d2",
        "/p9/d1/d2/f2",
        "/p9/f0",
    ];
    fs.make_dir(ctx, &VfsPath::parse("/p9/d1/d2"), MkdirOptions::with_parents())
        .await
        .expect("p9: dirs");
    for file in ["/p9/f0", "/p9/d1/f1", "/p9/d1/d2/f2"] {
        fs.write_bytes(ctx, &VfsPath::parse(file), b"x", WriteMode::Create)
            .await
            .expect("p9: file");
    }

    let listing: Vec<_> = fs
        .list(ctx, &VfsPath::root(), ListOptions::recursive())
        .await
        .expect("p9: list")
        .try_collect()
        .await
        .expect("p9: drain");
    let yielded: Vec<String> = listing
        .iter()
        .map(|s| s.path.to_string())
        .filter(|p| p == "/p9" || p.starts_with("/p9/"))
        .collect();

    let unique: HashSet<&String> = yielded.iter().collect();
    assert_eq!(unique.len(), yielded.len(), "p9: no duplicates");
    let expected: HashSet<String> = expected.iter().map(|s| s.to_string()).collect();
    let yielded: HashSet<String> = yielded.into_iter().collect();
    assert_eq!(yielded, expected, "p9: every descendant exactly once");
}
