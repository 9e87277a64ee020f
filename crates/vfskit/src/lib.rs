//! vfskit - Composable async virtual filesystem toolkit
//!
//! vfskit defines one uniform filesystem capability, [`FileSystem`], and a
//! set of interchangeable implementations that stack: terminal backends
//! ([`MemoryFs`], [`LocalFs`]) and adapters that wrap another filesystem
//! ([`AliasFs`], [`UnionFs`], [`BlockCacheFs`], [`MetadataCacheFs`]). Any
//! composition exposes the same capability, so higher-level frontends can
//! consume a plain directory, a prioritized union of mounts, or a cached
//! remote mirror through one interface.
//!
//! # Quick Start
//!
//! ```rust
//! use vfskit::{Context, FileSystem, MemoryFs, ReadRange, VfsPath, WriteMode};
//!
//! # #[tokio::main]
//! # async fn main() -> vfskit::Result<()> {
//! let fs = MemoryFs::new();
//! let ctx = Context::new();
//!
//! fs.write_bytes(&ctx, &VfsPath::parse("/hello.txt"), b"Hello, World!", WriteMode::Create)
//!     .await?;
//! let content = fs
//!     .read_to_bytes(&ctx, &VfsPath::parse("/hello.txt"), ReadRange::full())
//!     .await?;
//! assert_eq!(content, b"Hello, World!");
//! # Ok(())
//! # }
//! ```
//!
//! # Union mounts
//!
//! [`UnionFs`] merges multiple filesystems into one logical path space,
//! honoring mount specificity and priority:
//!
//! ```rust
//! use std::sync::Arc;
//! use vfskit::{Context, FileSystem, MemoryFs, MountItem, ReadRange, UnionFs, VfsPath, WriteMode};
//!
//! # #[tokio::main]
//! # async fn main() -> vfskit::Result<()> {
//! let ctx = Context::new();
//! let user = Arc::new(MemoryFs::new());
//! let system = Arc::new(MemoryFs::new());
//! user.write_bytes(&ctx, &VfsPath::parse("/config.ini"), b"user", WriteMode::Create)
//!     .await?;
//! system
//!     .write_bytes(&ctx, &VfsPath::parse("/config.ini"), b"sys", WriteMode::Create)
//!     .await?;
//!
//! let union = UnionFs::new(vec![
//!     MountItem::new(user, VfsPath::root()).priority(100),
//!     MountItem::new(system, VfsPath::root()).priority(50).read_only(),
//! ]);
//!
//! // The higher-priority mount answers.
//! let content = union
//!     .read_to_bytes(&ctx, &VfsPath::parse("/config.ini"), ReadRange::full())
//!     .await?;
//! assert_eq!(content, b"user");
//! # Ok(())
//! # }
//! ```
//!
//! # Caching
//!
//! [`BlockCacheFs`] interposes a read-through, fixed-size-block cache with
//! sequential read-ahead between an origin and a cache-storage filesystem;
//! [`MetadataCacheFs`] does the same for stat records and directory
//! listings. Cache-layer failures never fail a read; the origin remains the
//! source of truth.
//!
//! ```rust
//! use std::sync::Arc;
//! use vfskit::{
//!     BlockCacheConfig, BlockCacheFs, Context, FileSystem, MemoryFs, ReadRange, VfsPath,
//!     WriteMode,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> vfskit::Result<()> {
//! let ctx = Context::new();
//! let origin = Arc::new(MemoryFs::new());
//! origin
//!     .write_bytes(&ctx, &VfsPath::parse("/big.bin"), &[0u8; 8192], WriteMode::Create)
//!     .await?;
//!
//! let cached = BlockCacheFs::new(
//!     origin,
//!     Arc::new(MemoryFs::new()),
//!     BlockCacheConfig::default(),
//! );
//! let head = cached
//!     .read_to_bytes(&ctx, &VfsPath::parse("/big.bin"), ReadRange::new(0, 1024))
//!     .await?;
//! assert_eq!(head.len(), 1024);
//! # Ok(())
//! # }
//! ```
//!
//! # Contexts and cancellation
//!
//! Every operation takes a [`Context`] carrying a correlation id and a
//! cancellation signal. Operations observe cancellation at entry and before
//! each new I/O step and fail with [`FsError::ContextCanceled`]. Log events
//! are emitted through the `tracing` facade tagged with the operation id;
//! without a subscriber installed they are free.
//!
//! # Error model
//!
//! All failures are values of the closed [`FsError`] taxonomy and carry the
//! offending path. Adapters surface origin errors unchanged; only the cache
//! layers recover locally (falling back to the origin) where the contract
//! says so.

mod context;
mod error;
mod fs;
mod path;
mod status;

pub use async_trait::async_trait;
pub use context::{Cancellation, Clock, Context, SystemClock};
pub use error::{FsError, Result};
pub use fs::cache_layout;
pub use fs::{
    AliasFs, BlockCacheConfig, BlockCacheFs, ByteStream, CacheMetadata, CopyOptions,
    DeleteOptions, FileSystem, ListOptions, LocalFs, MemoryFs, MemoryFsUsage, MetaCacheEntry,
    MetadataCacheConfig, MetadataCacheFs, MkdirOptions, MountItem, ReadRange, StatusStream,
    UnionFs, WriteMode, WriteSink,
};
pub use path::VfsPath;
pub use status::{FileStatus, mime_type_for};
