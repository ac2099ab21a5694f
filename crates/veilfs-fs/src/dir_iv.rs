//! Read-through loading of directory IVs.
//!
//! `DirIvLoader` answers from the cache when it can and otherwise reads the
//! directory's IV file, outside the cache lock, then stores the result.

use std::path::Path;

use tracing::debug;
use veilfs_core::dir_iv::{create_dir_iv, read_dir_iv};
use veilfs_core::{DirIv, VeilResult};

use crate::dir_iv_cache::DirIvCache;

pub struct DirIvLoader<'a> {
    cache: &'a DirIvCache,
}

impl DirIvLoader<'static> {
    /// Loader backed by the process-wide cache.
    pub fn global() -> Self {
        DirIvLoader {
            cache: DirIvCache::global(),
        }
    }
}

impl<'a> DirIvLoader<'a> {
    pub fn new(cache: &'a DirIvCache) -> Self {
        DirIvLoader { cache }
    }

    /// IV of the encrypted directory `dir`.
    ///
    /// Paths that are not valid UTF-8 bypass the cache and are always read
    /// from disk; lossy conversion would let distinct directories share a key.
    pub fn load(&self, dir: &Path) -> VeilResult<DirIv> {
        let key = cache_key(dir);
        if let Some(iv) = key.and_then(|k| self.cache.lookup(k)) {
            return Ok(iv);
        }

        let iv = read_dir_iv(dir)?;
        debug!(dir = %dir.display(), cached = key.is_some(), "dir IV read from disk");
        if let Some(key) = key {
            self.cache.store(key, &iv);
        }
        Ok(iv)
    }

    /// Create the IV file for a new directory and cache it.
    pub fn create(&self, dir: &Path) -> VeilResult<DirIv> {
        let iv = create_dir_iv(dir)?;
        if let Some(key) = cache_key(dir) {
            self.cache.store(key, &iv);
        }
        Ok(iv)
    }

    /// Drop `dir` from the cache. Call after renaming or deleting it.
    pub fn invalidate(&self, dir: &Path) {
        if let Some(key) = cache_key(dir) {
            self.cache.remove(key);
        }
    }
}

fn cache_key(dir: &Path) -> Option<&str> {
    dir.to_str()
}
