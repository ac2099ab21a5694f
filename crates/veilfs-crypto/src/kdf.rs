//! Key derivation: scrypt passphrase → key-encrypting key

use rand::RngCore;
use scrypt::Params;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::KEY_SIZE;

/// Salt length in bytes for newly created volumes
pub const SALT_SIZE: usize = 32;

/// Minimum salt length accepted from an existing config record
pub const MIN_SALT_SIZE: usize = 16;

/// Smallest accepted scrypt cost exponent (N = 1024)
pub const MIN_LOG_N: u8 = 10;

/// Largest accepted scrypt cost exponent (N = 2^28)
pub const MAX_LOG_N: u8 = 28;

/// A 256-bit key-encrypting key derived from the volume password.
///
/// Only ever used to wrap or unwrap the master key. Zeroized on drop.
pub struct Kek {
    bytes: [u8; KEY_SIZE],
}

impl Kek {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for Kek {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for Kek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kek").field("bytes", &"[REDACTED]").finish()
    }
}

/// scrypt parameters, persisted per volume so every unlock reproduces the same KEK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// CPU/memory cost (power of two)
    pub n: u64,
    /// Block size
    pub r: u32,
    /// Parallelism
    pub p: u32,
    /// Derived key length in bytes
    pub key_len: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            n: 1 << 16,
            r: 8,
            p: 1,
            key_len: KEY_SIZE as u32,
        }
    }
}

impl KdfParams {
    /// Build parameters from a cost exponent, as stored in the tool config.
    pub fn from_log_n(log_n: u8, r: u32, p: u32) -> Self {
        Self {
            n: 1u64.checked_shl(u32::from(log_n)).unwrap_or(0),
            r,
            p,
            key_len: KEY_SIZE as u32,
        }
    }

    /// log2(N). Only meaningful once `problems()` came back empty.
    pub fn log_n(&self) -> u8 {
        self.n.trailing_zeros() as u8
    }

    /// Every reason these parameters cannot be used, as human-readable messages.
    pub fn problems(&self) -> Vec<String> {
        let mut out = Vec::new();
        if !self.n.is_power_of_two() {
            out.push(format!("scrypt N={} is not a power of two", self.n));
        } else if !(MIN_LOG_N..=MAX_LOG_N).contains(&self.log_n()) {
            out.push(format!(
                "scrypt N=2^{} outside supported range 2^{MIN_LOG_N}..=2^{MAX_LOG_N}",
                self.log_n()
            ));
        }
        if self.r == 0 {
            out.push("scrypt R must be positive".to_string());
        }
        if self.p == 0 {
            out.push("scrypt P must be positive".to_string());
        }
        if self.key_len as usize != KEY_SIZE {
            out.push(format!(
                "scrypt KeyLen={} unsupported (expected {KEY_SIZE})",
                self.key_len
            ));
        }
        out
    }
}

/// Generate a random salt for a new volume or password change.
pub fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Derive the key-encrypting key from a password and salt using scrypt.
pub fn derive_kek(
    password: &SecretString,
    salt: &[u8],
    params: &KdfParams,
) -> anyhow::Result<Kek> {
    if let Some(problem) = params.problems().into_iter().next() {
        anyhow::bail!("invalid scrypt params: {problem}");
    }

    let scrypt_params = Params::new(params.log_n(), params.r, params.p, KEY_SIZE)
        .map_err(|e| anyhow::anyhow!("invalid scrypt params: {e}"))?;

    let mut key = [0u8; KEY_SIZE];
    scrypt::scrypt(
        password.expose_secret().as_bytes(),
        salt,
        &scrypt_params,
        &mut key,
    )
    .map_err(|e| anyhow::anyhow!("scrypt KDF failed: {e}"))?;

    Ok(Kek::from_bytes(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_params() -> KdfParams {
        KdfParams::from_log_n(MIN_LOG_N, 8, 1)
    }

    #[test]
    fn test_kdf_deterministic() {
        let password = SecretString::from("test-passphrase-123");
        let salt = [1u8; SALT_SIZE];

        let k1 = derive_kek(&password, &salt, &fast_params()).unwrap();
        let k2 = derive_kek(&password, &salt, &fast_params()).unwrap();

        assert_eq!(k1.as_bytes(), k2.as_bytes(), "KDF must be deterministic");
    }

    #[test]
    fn test_kdf_different_passwords() {
        let salt = [1u8; SALT_SIZE];

        let k1 = derive_kek(&SecretString::from("password-a"), &salt, &fast_params()).unwrap();
        let k2 = derive_kek(&SecretString::from("password-b"), &salt, &fast_params()).unwrap();

        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_kdf_different_salts() {
        let password = SecretString::from("same-password");

        let k1 = derive_kek(&password, &[1u8; SALT_SIZE], &fast_params()).unwrap();
        let k2 = derive_kek(&password, &[2u8; SALT_SIZE], &fast_params()).unwrap();

        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_kdf_cost_changes_key() {
        let password = SecretString::from("same-password");
        let salt = [3u8; SALT_SIZE];

        let k1 = derive_kek(&password, &salt, &fast_params()).unwrap();
        let k2 = derive_kek(&password, &salt, &KdfParams::from_log_n(11, 8, 1)).unwrap();

        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_params_validation() {
        assert!(KdfParams::default().problems().is_empty());
        assert!(fast_params().problems().is_empty());

        let not_pow2 = KdfParams {
            n: 12345,
            ..KdfParams::default()
        };
        assert_eq!(not_pow2.problems().len(), 1);

        let too_small = KdfParams::from_log_n(4, 8, 1);
        assert_eq!(too_small.problems().len(), 1);

        let broken = KdfParams {
            n: 1 << 16,
            r: 0,
            p: 0,
            key_len: 16,
        };
        assert_eq!(broken.problems().len(), 3);
    }

    #[test]
    fn test_derive_rejects_bad_params() {
        let password = SecretString::from("pw");
        let params = KdfParams {
            r: 0,
            ..fast_params()
        };
        assert!(derive_kek(&password, &[0u8; SALT_SIZE], &params).is_err());
    }

    #[test]
    fn test_from_log_n() {
        let params = KdfParams::from_log_n(16, 8, 1);
        assert_eq!(params.n, 65536);
        assert_eq!(params.log_n(), 16);
        assert_eq!(params, KdfParams::default());
    }

    #[test]
    fn test_generate_salt() {
        let s1 = generate_salt();
        let s2 = generate_salt();
        assert_eq!(s1.len(), SALT_SIZE);
        assert_ne!(s1, s2);
    }
}
