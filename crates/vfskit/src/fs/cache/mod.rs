//! Caching adapters: block cache and metadata cache.
//!
//! Both persist their state in a cache-storage filesystem under the shared
//! hash-directory layout of [`layout`].

pub mod layout;
mod readahead;

mod block;
mod metadata;

pub use block::{BlockCacheConfig, BlockCacheFs, CacheMetadata};
pub use metadata::{MetaCacheEntry, MetadataCacheConfig, MetadataCacheFs};
