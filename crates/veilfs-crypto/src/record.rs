//! Persisted volume configuration record
//!
//! On-disk format (JSON, field names are part of the format):
//! ```text
//! {
//!   "Creator": "veilfs 0.1.0",
//!   "EncryptedKey": "<base64: nonce || wrapped master key || tag>",
//!   "ScryptObject": { "Salt": "<base64>", "N": 65536, "R": 8, "P": 1, "KeyLen": 32 },
//!   "Version": 2,
//!   "FeatureFlags": ["GCMIV128", "DirIV", "EMENames", "LongNames"],
//!   "VolumeName": "<base64: nonce || name ciphertext || tag>"
//! }
//! ```
//!
//! `VolumeName` parses as optional, but `ConfigStore` refuses to unlock a
//! record without it: it is sealed with AAD = `binding_digest()`, which
//! covers every other field, so a successful unlock also proves the record
//! was not altered.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use veilfs_core::{VeilError, VeilResult};

use crate::kdf::KdfParams;

const BINDING_DOMAIN: &[u8] = b"veilfs-config-record";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConfigRecord {
    pub creator: String,
    #[serde(with = "b64")]
    pub encrypted_key: Vec<u8>,
    pub scrypt_object: ScryptObject,
    pub version: u16,
    pub feature_flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64_opt")]
    pub volume_name: Option<Vec<u8>>,
}

/// Salt plus scrypt parameters, as stored in the record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScryptObject {
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
    #[serde(rename = "N")]
    pub n: u64,
    #[serde(rename = "R")]
    pub r: u32,
    #[serde(rename = "P")]
    pub p: u32,
    pub key_len: u32,
}

impl ScryptObject {
    pub fn new(salt: Vec<u8>, params: &KdfParams) -> Self {
        Self {
            salt,
            n: params.n,
            r: params.r,
            p: params.p,
            key_len: params.key_len,
        }
    }

    pub fn params(&self) -> KdfParams {
        KdfParams {
            n: self.n,
            r: self.r,
            p: self.p,
            key_len: self.key_len,
        }
    }
}

impl ConfigRecord {
    /// Parse a record. Only JSON structure and base64 encoding are checked
    /// here; version gating happens in the store.
    pub fn parse(data: &[u8]) -> VeilResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| VeilError::ConfigFormat(format!("invalid config record: {e}")))
    }

    /// Serialize as pretty JSON with a trailing newline.
    pub fn to_json(&self) -> VeilResult<Vec<u8>> {
        let mut out = serde_json::to_vec_pretty(self)
            .map_err(|e| VeilError::Other(anyhow::anyhow!("serializing config record: {e}")))?;
        out.push(b'\n');
        Ok(out)
    }

    /// SHA-256 over every field except `VolumeName` and `Creator`.
    ///
    /// Flags are sorted first so that reordering the list is not treated as
    /// tampering. Variable-length fields are length-prefixed.
    pub fn binding_digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(BINDING_DOMAIN);
        hasher.update(self.version.to_be_bytes());

        let s = &self.scrypt_object;
        hasher.update(s.n.to_be_bytes());
        hasher.update(s.r.to_be_bytes());
        hasher.update(s.p.to_be_bytes());
        hasher.update(s.key_len.to_be_bytes());
        update_prefixed(&mut hasher, &s.salt);

        update_prefixed(&mut hasher, &self.encrypted_key);

        let mut flags: Vec<&str> = self.feature_flags.iter().map(String::as_str).collect();
        flags.sort_unstable();
        hasher.update((flags.len() as u64).to_be_bytes());
        for flag in flags {
            update_prefixed(&mut hasher, flag.as_bytes());
        }

        hasher.finalize().into()
    }
}

fn update_prefixed(hasher: &mut Sha256, data: &[u8]) {
    hasher.update((data.len() as u64).to_be_bytes());
    hasher.update(data);
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

mod b64_opt {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        data: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match data {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
