//! veilfs-crypto: volume key management for the veilfs overlay filesystem
//!
//! Key hierarchy:
//! ```text
//! Password ──scrypt(Salt, N, R, P)──> KEK (256-bit, discarded after use)
//!   └── Master Key (256-bit random, AES-256-GCM wrapped by KEK, AAD = block 0)
//!       └── Volume Name Key (HKDF-SHA256, domain="veilfs-volume-name")
//!           └── Volume name AEAD, AAD = SHA-256 over the whole config record
//! ```
//!
//! The master key feeds the external content and filename ciphers; this crate
//! only produces and protects it.

pub mod flags;
pub mod kdf;
pub mod keys;
pub mod record;
pub mod store;

pub use flags::VolumeFlags;
pub use kdf::{derive_kek, generate_salt, KdfParams, Kek};
pub use keys::{generate_master_key, unwrap_key, wrap_key, MasterKey};
pub use record::ConfigRecord;
pub use store::{ConfigStore, CreateOptions, CONFIG_FILE_NAME, CONFIG_VERSION};

/// Size of the master key and KEK in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce as stored on disk (128-bit)
pub const NONCE_SIZE: usize = 16;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of a wrapped master key: nonce + key + tag
pub const WRAPPED_KEY_SIZE: usize = NONCE_SIZE + KEY_SIZE + TAG_SIZE;
