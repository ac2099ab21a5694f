//! Per-directory IV files.
//!
//! Every encrypted directory carries a `gocryptfs.diriv` file holding 16
//! random bytes. The filename cipher mixes it into each name so identical
//! names in different directories encrypt differently.

use std::path::Path;

use rand::RngCore;

use crate::error::{VeilError, VeilResult};
use crate::fsutil;

/// Length of a directory IV in bytes
pub const DIR_IV_LEN: usize = 16;

/// Name of the IV file inside each encrypted directory
pub const DIR_IV_FILE: &str = "gocryptfs.diriv";

pub type DirIv = [u8; DIR_IV_LEN];

/// Generate a fresh random directory IV.
pub fn generate_dir_iv() -> DirIv {
    let mut iv = [0u8; DIR_IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    iv
}

/// Read and validate the IV file of `dir`.
pub fn read_dir_iv(dir: &Path) -> VeilResult<DirIv> {
    let path = dir.join(DIR_IV_FILE);
    let data = std::fs::read(&path)?;
    data.as_slice().try_into().map_err(|_| {
        VeilError::ConfigFormat(format!(
            "{}: expected {DIR_IV_LEN} bytes, found {}",
            path.display(),
            data.len()
        ))
    })
}

/// Write a fresh IV file into `dir`. Refuses to replace an existing one, since
/// that would orphan every encrypted name in the directory.
pub fn create_dir_iv(dir: &Path) -> VeilResult<DirIv> {
    let iv = generate_dir_iv();
    fsutil::write_new_atomic(&dir.join(DIR_IV_FILE), &iv)?;
    Ok(iv)
}
