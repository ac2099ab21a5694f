//! veilfs-fs: directory IV material for the filename-encryption layer
//!
//! The cache is shared by every worker thread of a mounted volume; the
//! filesystem driver itself lives outside this workspace.

pub mod dir_iv;
pub mod dir_iv_cache;

pub use dir_iv::DirIvLoader;
pub use dir_iv_cache::{normalize_key, CacheStats, DirIvCache, DIR_IV_CACHE_ENTRIES};
