//! Volume feature flags and their consistency rules

use veilfs_core::{VeilError, VeilResult};

pub const FLAG_PLAINTEXT_NAMES: &str = "PlaintextNames";
pub const FLAG_DIR_IV: &str = "DirIV";
pub const FLAG_EME_NAMES: &str = "EMENames";
pub const FLAG_GCM_IV128: &str = "GCMIV128";
pub const FLAG_LONG_NAMES: &str = "LongNames";

/// Feature flags of a volume, persisted as a list of flag names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VolumeFlags {
    /// File names are stored unencrypted
    pub plaintext_names: bool,
    /// Each directory carries its own IV file
    pub dir_iv: bool,
    /// Names are encrypted with EME wide-block encryption
    pub eme_names: bool,
    /// Content and key wrapping use 128-bit GCM nonces
    pub gcm_iv128: bool,
    /// Over-long encrypted names are hashed and stored in a side file
    pub long_names: bool,
}

impl VolumeFlags {
    /// Flags for a freshly created volume.
    pub fn for_new_volume(plaintext_names: bool, eme_names: bool, long_names: bool) -> Self {
        Self {
            plaintext_names,
            dir_iv: !plaintext_names,
            eme_names,
            gcm_iv128: true,
            long_names,
        }
    }

    /// Parse the persisted flag list. Unknown flags are a format error: a
    /// volume using a feature we cannot honor must not be opened.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> VeilResult<Self> {
        let mut flags = Self::default();
        for name in names {
            match name.as_ref() {
                FLAG_PLAINTEXT_NAMES => flags.plaintext_names = true,
                FLAG_DIR_IV => flags.dir_iv = true,
                FLAG_EME_NAMES => flags.eme_names = true,
                FLAG_GCM_IV128 => flags.gcm_iv128 = true,
                FLAG_LONG_NAMES => flags.long_names = true,
                other => {
                    return Err(VeilError::ConfigFormat(format!(
                        "unsupported feature flag: {other}"
                    )))
                }
            }
        }
        Ok(flags)
    }

    /// Flag names in canonical order.
    pub fn to_names(&self) -> Vec<String> {
        [
            (self.gcm_iv128, FLAG_GCM_IV128),
            (self.dir_iv, FLAG_DIR_IV),
            (self.eme_names, FLAG_EME_NAMES),
            (self.long_names, FLAG_LONG_NAMES),
            (self.plaintext_names, FLAG_PLAINTEXT_NAMES),
        ]
        .into_iter()
        .filter(|(set, _)| *set)
        .map(|(_, name)| name.to_string())
        .collect()
    }

    /// Every conflict between the flags, as human-readable messages.
    pub fn conflicts(&self) -> Vec<String> {
        let mut out = Vec::new();
        if !self.gcm_iv128 {
            out.push("only 128-bit GCM IVs are supported (GCMIV128 missing)".to_string());
        }
        if self.plaintext_names {
            for (set, name) in [
                (self.eme_names, FLAG_EME_NAMES),
                (self.dir_iv, FLAG_DIR_IV),
                (self.long_names, FLAG_LONG_NAMES),
            ] {
                if set {
                    out.push(format!("{FLAG_PLAINTEXT_NAMES} cannot be combined with {name}"));
                }
            }
        } else {
            if !self.eme_names {
                out.push(format!(
                    "encrypted names require {FLAG_EME_NAMES} (or enable {FLAG_PLAINTEXT_NAMES})"
                ));
            }
            if !self.dir_iv {
                out.push(format!("encrypted names require {FLAG_DIR_IV}"));
            }
        }
        if self.long_names && !self.eme_names && !self.plaintext_names {
            out.push(format!("{FLAG_LONG_NAMES} requires {FLAG_EME_NAMES}"));
        }
        out
    }
}
