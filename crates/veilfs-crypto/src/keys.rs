//! Master key generation, AES-256-GCM key wrapping, and volume-name sealing

use aes_gcm::{
    aead::{consts::U16, Aead, KeyInit, Payload},
    aes::Aes256,
    AesGcm, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::kdf::Kek;
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE, WRAPPED_KEY_SIZE};

/// AES-256-GCM with a 128-bit nonce, as used by GCMIV128 volumes.
type Aes256Gcm128 = AesGcm<Aes256, U16>;

/// AAD for the wrapped master key: block number 0, big-endian.
const KEY_WRAP_AAD: [u8; 8] = 0u64.to_be_bytes();

const VOLUME_NAME_DOMAIN: &[u8] = b"veilfs-volume-name";

/// The volume's 256-bit master key.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit master key.
pub fn generate_master_key() -> MasterKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    MasterKey::from_bytes(bytes)
}

/// Wrap (encrypt) the master key under the KEK.
///
/// Output: `[16-byte nonce][32-byte ciphertext][16-byte tag]`
pub fn wrap_key(kek: &Kek, master: &MasterKey) -> anyhow::Result<Vec<u8>> {
    seal(kek.as_bytes(), master.as_bytes(), &KEY_WRAP_AAD)
        .map_err(|e| anyhow::anyhow!("key wrapping failed: {e}"))
}

/// Unwrap (decrypt) the master key.
///
/// Input: output of `wrap_key`. Every failure reads the same so callers
/// cannot tell a wrong password from a damaged blob.
pub fn unwrap_key(kek: &Kek, wrapped: &[u8]) -> anyhow::Result<MasterKey> {
    if wrapped.len() != WRAPPED_KEY_SIZE {
        anyhow::bail!(
            "wrapped key has wrong size: {} bytes (expected {WRAPPED_KEY_SIZE})",
            wrapped.len()
        );
    }

    let mut plaintext = open(kek.as_bytes(), wrapped, &KEY_WRAP_AAD).map_err(|_| {
        anyhow::anyhow!("key unwrapping failed: invalid password or corrupted data")
    })?;

    let mut key_bytes = [0u8; KEY_SIZE];
    key_bytes.copy_from_slice(&plaintext);
    plaintext.zeroize();

    Ok(MasterKey::from_bytes(key_bytes))
}

/// Derive the volume-name encryption key from the master key via HKDF-SHA256.
pub fn derive_volume_name_key(master: &MasterKey) -> anyhow::Result<Zeroizing<[u8; KEY_SIZE]>> {
    let hkdf = Hkdf::<Sha256>::new(None, master.as_bytes());
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(VOLUME_NAME_DOMAIN, &mut okm[..])
        .map_err(|e| anyhow::anyhow!("HKDF expand failed: {e}"))?;
    Ok(okm)
}

/// Encrypt the volume display name. `aad` binds the ciphertext to the rest
/// of the config record.
pub fn encrypt_volume_name(master: &MasterKey, name: &str, aad: &[u8]) -> anyhow::Result<Vec<u8>> {
    let key = derive_volume_name_key(master)?;
    seal(&key, name.as_bytes(), aad)
        .map_err(|e| anyhow::anyhow!("volume name encryption failed: {e}"))
}

/// Decrypt the volume display name sealed by `encrypt_volume_name`.
pub fn decrypt_volume_name(
    master: &MasterKey,
    sealed: &[u8],
    aad: &[u8],
) -> anyhow::Result<String> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        anyhow::bail!("sealed volume name too short: {} bytes", sealed.len());
    }
    let key = derive_volume_name_key(master)?;
    let plaintext = open(&key, sealed, aad).map_err(|_| {
        anyhow::anyhow!("volume name decryption failed: wrong key or tampered record")
    })?;
    String::from_utf8(plaintext).map_err(|e| anyhow::anyhow!("volume name is not UTF-8: {e}"))
}

fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, aes_gcm::Error> {
    let cipher = Aes256Gcm128::new(key.into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::<U16>::from_slice(&nonce_bytes);

    let ciphertext = cipher.encrypt(
        nonce,
        Payload {
            msg: plaintext,
            aad,
        },
    )?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

fn open(key: &[u8; KEY_SIZE], sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, aes_gcm::Error> {
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
    let nonce = Nonce::<U16>::from_slice(nonce_bytes);
    let cipher = Aes256Gcm128::new(key.into());
    cipher.decrypt(
        nonce,
        Payload {
            msg: ciphertext,
            aad,
        },
    )
}
