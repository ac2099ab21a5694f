//! veilfs-core: shared error taxonomy, tool configuration, and on-disk helpers
//! used by the key store and the directory IV cache.

pub mod config;
pub mod dir_iv;
pub mod error;
pub mod fsutil;

pub use config::VeilConfig;
pub use dir_iv::{DirIv, DIR_IV_FILE, DIR_IV_LEN};
pub use error::{VeilError, VeilResult};
