//! Union router compositions exercised through the public API.

use std::sync::Arc;

use futures_util::TryStreamExt;
use vfskit::{
    AliasFs, Context, DeleteOptions, FileSystem, FsError, ListOptions, MemoryFs, MkdirOptions,
    MountItem, ReadRange, UnionFs, VfsPath, WriteMode,
};

fn ctx() -> Context {
    Context::new()
}

#[tokio::test]
async fn delete_removes_from_every_writable_candidate() {
    let ctx = ctx();
    let upper = Arc::new(MemoryFs::new());
    let lower = Arc::new(MemoryFs::new());
    for fs in [&upper, &lower] {
        fs.write_bytes(&ctx, &VfsPath::parse("/dup.txt"), b"x", WriteMode::Create)
            .await
            .unwrap();
    }
    let union = UnionFs::new(vec![
        MountItem::new(upper.clone(), VfsPath::root()).priority(10),
        MountItem::new(lower.clone(), VfsPath::root()).priority(5),
    ]);

    union
        .delete(&ctx, &VfsPath::parse("/dup.txt"), DeleteOptions::default())
        .await
        .unwrap();

    // Both copies are gone, otherwise the lower one would shine through.
    assert!(!upper.exists(&ctx, &VfsPath::parse("/dup.txt")).await.unwrap());
    assert!(!lower.exists(&ctx, &VfsPath::parse("/dup.txt")).await.unwrap());
    assert!(!union.exists(&ctx, &VfsPath::parse("/dup.txt")).await.unwrap());
}

#[tokio::test]
async fn writes_skip_read_only_mounts() {
    let ctx = ctx();
    let writable = Arc::new(MemoryFs::new());
    let frozen = Arc::new(MemoryFs::new());
    let union = UnionFs::new(vec![
        MountItem::new(frozen.clone(), VfsPath::root()).priority(100).read_only(),
        MountItem::new(writable.clone(), VfsPath::root()).priority(1),
    ]);

    union
        .write_bytes(&ctx, &VfsPath::parse("/f"), b"data", WriteMode::Create)
        .await
        .unwrap();
    assert!(writable.exists(&ctx, &VfsPath::parse("/f")).await.unwrap());
    assert!(!frozen.exists(&ctx, &VfsPath::parse("/f")).await.unwrap());
}

#[tokio::test]
async fn nested_mounts_route_by_specificity() {
    let ctx = ctx();
    let outer = Arc::new(MemoryFs::new());
    let inner = Arc::new(MemoryFs::new());
    outer
        .write_bytes(&ctx, &VfsPath::parse("/outer.txt"), b"outer", WriteMode::Create)
        .await
        .unwrap();
    inner
        .write_bytes(&ctx, &VfsPath::parse("/inner.txt"), b"inner", WriteMode::Create)
        .await
        .unwrap();

    let union = UnionFs::new(vec![
        MountItem::new(outer, VfsPath::parse("/mnt")),
        MountItem::new(inner, VfsPath::parse("/mnt/nested")),
    ]);

    assert_eq!(
        union
            .read_to_bytes(&ctx, &VfsPath::parse("/mnt/outer.txt"), ReadRange::full())
            .await
            .unwrap(),
        b"outer"
    );
    assert_eq!(
        union
            .read_to_bytes(&ctx, &VfsPath::parse("/mnt/nested/inner.txt"), ReadRange::full())
            .await
            .unwrap(),
        b"inner"
    );

    // The nested mount point lists inside its parent alongside real entries.
    let names: Vec<String> = union
        .read_dir(&ctx, &VfsPath::parse("/mnt"))
        .await
        .unwrap()
        .iter()
        .map(|s| s.path.to_string())
        .collect();
    assert!(names.contains(&"/mnt/nested".to_string()));
    assert!(names.contains(&"/mnt/outer.txt".to_string()));
}

#[tokio::test]
async fn deeply_nested_mount_is_discoverable() {
    let ctx = ctx();
    let share = Arc::new(MemoryFs::new());
    share
        .write_bytes(&ctx, &VfsPath::parse("/doc.txt"), b"deep", WriteMode::Create)
        .await
        .unwrap();
    let union = UnionFs::new(vec![MountItem::new(
        share,
        VfsPath::parse("/srv/exports/share"),
    )]);

    // Every ancestor of the mount stats as a synthetic directory...
    for ancestor in ["/", "/srv", "/srv/exports"] {
        let status = union
            .stat(&ctx, &VfsPath::parse(ancestor))
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("{ancestor} should exist"));
        assert!(status.is_directory, "{ancestor} should be a directory");
    }

    // ...and each listing surfaces the next ancestor segment, so a walk can
    // descend level by level.
    let level = |entries: Vec<vfskit::FileStatus>| -> Vec<String> {
        entries.iter().map(|s| s.path.to_string()).collect()
    };
    assert_eq!(
        level(union.read_dir(&ctx, &VfsPath::root()).await.unwrap()),
        ["/srv"]
    );
    assert_eq!(
        level(union.read_dir(&ctx, &VfsPath::parse("/srv")).await.unwrap()),
        ["/srv/exports"]
    );
    assert_eq!(
        level(
            union
                .read_dir(&ctx, &VfsPath::parse("/srv/exports"))
                .await
                .unwrap()
        ),
        ["/srv/exports/share"]
    );

    // A recursive listing from the root therefore reaches into the mount.
    let listing: Vec<_> = union
        .list(&ctx, &VfsPath::root(), ListOptions::recursive())
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    let paths: Vec<String> = listing.iter().map(|s| s.path.to_string()).collect();
    for expected in [
        "/srv",
        "/srv/exports",
        "/srv/exports/share",
        "/srv/exports/share/doc.txt",
    ] {
        assert!(paths.contains(&expected.to_string()), "missing {expected}");
    }
}

#[tokio::test]
async fn union_of_aliases_shares_one_backing_tree() {
    let ctx = ctx();
    let backing = Arc::new(MemoryFs::new());
    backing
        .make_dir(&ctx, &VfsPath::parse("/exports/a"), MkdirOptions::with_parents())
        .await
        .unwrap();
    backing
        .make_dir(&ctx, &VfsPath::parse("/exports/b"), MkdirOptions::with_parents())
        .await
        .unwrap();
    backing
        .write_bytes(&ctx, &VfsPath::parse("/exports/a/f"), b"va", WriteMode::Create)
        .await
        .unwrap();

    let union = UnionFs::new(vec![
        MountItem::new(
            Arc::new(AliasFs::new(backing.clone(), VfsPath::parse("/exports/a"))),
            VfsPath::parse("/a"),
        ),
        MountItem::new(
            Arc::new(AliasFs::new(backing.clone(), VfsPath::parse("/exports/b"))),
            VfsPath::parse("/b"),
        ),
    ]);

    assert_eq!(
        union
            .read_to_bytes(&ctx, &VfsPath::parse("/a/f"), ReadRange::full())
            .await
            .unwrap(),
        b"va"
    );

    // Writing through one alias lands in the shared backing tree.
    union
        .write_bytes(&ctx, &VfsPath::parse("/b/g"), b"vb", WriteMode::Create)
        .await
        .unwrap();
    assert_eq!(
        backing
            .read_to_bytes(&ctx, &VfsPath::parse("/exports/b/g"), ReadRange::full())
            .await
            .unwrap(),
        b"vb"
    );

    // Recursive listing walks through the synthetic mount directories.
    let listing: Vec<_> = union
        .list(&ctx, &VfsPath::root(), ListOptions::recursive())
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    let paths: Vec<String> = listing.iter().map(|s| s.path.to_string()).collect();
    for expected in ["/a", "/b", "/a/f", "/b/g"] {
        assert!(paths.contains(&expected.to_string()), "missing {expected}");
    }
}

#[tokio::test]
async fn read_errors_carry_union_paths() {
    let ctx = ctx();
    let fs = Arc::new(MemoryFs::new());
    let union = UnionFs::new(vec![MountItem::new(fs, VfsPath::parse("/data"))]);

    let err = union
        .read_to_bytes(&ctx, &VfsPath::parse("/data/missing"), ReadRange::full())
        .await
        .unwrap_err();
    match err {
        FsError::NotFound { path } => assert_eq!(path.to_string(), "/data/missing"),
        other => panic!("unexpected error: {other}"),
    }
}
