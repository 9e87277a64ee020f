//! Hash-directory layout shared by the block cache and the metadata cache.
//!
//! Every logical path maps to a three-level directory derived from the first
//! 16 hex characters of `SHA-256(path)`, split `H[0:3]/H[3:6]/H[6:16]` to
//! bound per-directory fan-out. The split is part of the on-disk format; do
//! not change it.

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::context::Context;
use crate::error::FsError;
use crate::fs::traits::{DeleteOptions, FileSystem};
use crate::path::VfsPath;

/// Version stamped into every persisted cache metadata record.
pub const CACHE_META_VERSION: &str = "1.0";

const META_FILE: &str = "meta.json";
const BLOCKS_DIR: &str = "blocks";

/// First 16 hex characters of the SHA-256 of the path's string form.
fn hash_prefix(path: &VfsPath) -> String {
    let digest = Sha256::digest(path.to_string().as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in &digest[..8] {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Hash directory for a logical path inside the cache storage.
pub fn entry_dir(path: &VfsPath) -> VfsPath {
    let hex = hash_prefix(path);
    VfsPath::from_segments([&hex[0..3], &hex[3..6], &hex[6..16]])
}

/// Location of the entry's `meta.json`.
pub fn meta_path(path: &VfsPath) -> VfsPath {
    entry_dir(path).join(META_FILE)
}

/// Directory holding the entry's block files.
pub fn blocks_dir(path: &VfsPath) -> VfsPath {
    entry_dir(path).join(BLOCKS_DIR)
}

/// Location of one block file.
pub fn block_path(path: &VfsPath, block: u32) -> VfsPath {
    blocks_dir(path).join(&block.to_string())
}

/// Delete a logical path's cache entry and prune emptied parents.
///
/// Best effort: a missing entry is fine, and parents are only removed while
/// they are empty. Never fails the caller.
pub async fn remove_entry(cache: &dyn FileSystem, ctx: &Context, path: &VfsPath) {
    let dir = entry_dir(path);
    match cache.delete(ctx, &dir, DeleteOptions::recursive()).await {
        Ok(()) | Err(FsError::NotFound { .. }) => {}
        Err(err) => {
            debug!(
                op = ctx.operation_id(),
                path = %path,
                error = %err,
                "cache entry cleanup failed"
            );
            return;
        }
    }
    // Prune the level-2 then level-1 directory while they are empty.
    let mut cursor = dir.parent();
    while let Some(parent) = cursor {
        if parent.is_root() {
            break;
        }
        match cache.remove(ctx, &parent).await {
            Ok(()) => cursor = parent.parent(),
            Err(_) => break,
        }
    }
}
