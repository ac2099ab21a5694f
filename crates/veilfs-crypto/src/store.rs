//! ConfigStore: load, create, validate, and unlock a volume's key record.
//!
//! Lifecycle:
//! ```text
//! read() ──> locked ──decrypt_key(pw)──> unlocked ──lock()/drop──> locked
//! create() ─────────────────────────────> unlocked
//! ```
//! Key-dependent accessors return `VeilError::Locked` until an unlock
//! succeeds. Every write replaces the whole record atomically.

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use tracing::{debug, info, warn};
use veilfs_core::{dir_iv, fsutil, VeilError, VeilResult};

use crate::flags::VolumeFlags;
use crate::kdf::{derive_kek, generate_salt, KdfParams, MIN_SALT_SIZE};
use crate::keys::{
    decrypt_volume_name, encrypt_volume_name, generate_master_key, unwrap_key, wrap_key,
    MasterKey,
};
use crate::record::{ConfigRecord, ScryptObject};
use crate::WRAPPED_KEY_SIZE;

/// Name of the config file inside the volume's base directory
pub const CONFIG_FILE_NAME: &str = "gocryptfs.conf";

/// The only record version this crate reads and writes
pub const CONFIG_VERSION: u16 = 2;

/// Parameters for a new volume.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub plaintext_names: bool,
    pub eme_names: bool,
    pub long_names: bool,
    /// Display name; stored encrypted. Empty means "no name".
    pub volume_name: String,
    pub kdf: KdfParams,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            plaintext_names: false,
            eme_names: true,
            long_names: true,
            volume_name: String::new(),
            kdf: KdfParams::default(),
        }
    }
}

/// A volume's configuration plus, once unlocked, its master key.
pub struct ConfigStore {
    config_path: PathBuf,
    base_dir: PathBuf,
    record: ConfigRecord,
    flags: VolumeFlags,
    mount_target: Option<String>,
    master_key: Option<MasterKey>,
    volume_name: Option<String>,
}

impl ConfigStore {
    /// Load the config record from `base_dir`. The store starts locked.
    pub fn read(base_dir: impl AsRef<Path>) -> VeilResult<Self> {
        Self::read_from(base_dir.as_ref().join(CONFIG_FILE_NAME))
    }

    /// Load the config record from an explicit file path. The base directory
    /// is the file's parent.
    pub fn read_from(config_path: impl Into<PathBuf>) -> VeilResult<Self> {
        let config_path = config_path.into();
        let data = std::fs::read(&config_path).map_err(|e| {
            VeilError::ConfigFormat(format!("reading {}: {e}", config_path.display()))
        })?;
        let record = ConfigRecord::parse(&data)?;
        if record.version != CONFIG_VERSION {
            return Err(VeilError::ConfigFormat(format!(
                "unsupported config version {} (expected {CONFIG_VERSION})",
                record.version
            )));
        }
        let flags = VolumeFlags::from_names(&record.feature_flags)?;
        let base_dir = parent_dir(&config_path);

        debug!(config = %config_path.display(), creator = %record.creator, "config record loaded");

        Ok(Self {
            config_path,
            base_dir,
            record,
            flags,
            mount_target: None,
            master_key: None,
            volume_name: None,
        })
    }

    /// Derive the KEK from `password` and unwrap the master key.
    ///
    /// Any existing key is discarded first, so a failed attempt always leaves
    /// the store locked. Wrong passwords, corrupted records, and records
    /// missing their `VolumeName` binding all yield `VeilError::Authentication`.
    pub fn decrypt_key(&mut self, password: &SecretString) -> VeilResult<()> {
        self.lock();

        let params = self.record.scrypt_object.params();
        let key = {
            let kek = derive_kek(password, &self.record.scrypt_object.salt, &params)
                .map_err(|e| VeilError::ConfigFormat(e.to_string()))?;
            unwrap_key(&kek, &self.record.encrypted_key).map_err(|e| {
                warn!(config = %self.config_path.display(), "unlock failed");
                debug!("unwrap error: {e}");
                VeilError::Authentication
            })?
            // kek dropped (zeroized) here
        };

        // The sealed name is the record's authenticator; without it the
        // flags and parameters are unverified.
        let Some(sealed) = &self.record.volume_name else {
            warn!(config = %self.config_path.display(), "config record has no VolumeName binding");
            return Err(VeilError::Authentication);
        };
        let aad = self.record.binding_digest();
        let name = decrypt_volume_name(&key, sealed, &aad).map_err(|e| {
            warn!(config = %self.config_path.display(), "config record failed authentication");
            debug!("volume name error: {e}");
            VeilError::Authentication
        })?;
        let volume_name = Some(name).filter(|n| !n.is_empty());

        self.master_key = Some(key);
        self.volume_name = volume_name;
        info!(base_dir = %self.base_dir.display(), "volume unlocked");
        Ok(())
    }

    /// Create a new volume in the empty directory `base_dir` and return it
    /// unlocked.
    ///
    /// Nothing is left on disk if any step fails.
    pub fn create(
        base_dir: impl AsRef<Path>,
        password: &SecretString,
        options: &CreateOptions,
    ) -> VeilResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        if !base_dir.is_dir() {
            return Err(VeilError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("base directory {} does not exist", base_dir.display()),
            )));
        }
        let config_path = base_dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Err(VeilError::AlreadyExists(config_path));
        }
        if std::fs::read_dir(&base_dir)?.next().is_some() {
            return Err(VeilError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("base directory {} is not empty", base_dir.display()),
            )));
        }

        let flags =
            VolumeFlags::for_new_volume(options.plaintext_names, options.eme_names, options.long_names);
        let conflicts = flags.conflicts();
        if !conflicts.is_empty() {
            return Err(VeilError::ConflictingOptions(conflicts.join("; ")));
        }
        let kdf_problems = options.kdf.problems();
        if !kdf_problems.is_empty() {
            return Err(VeilError::ConflictingOptions(kdf_problems.join("; ")));
        }

        let master = generate_master_key();
        let salt = generate_salt();
        let mut record = ConfigRecord {
            creator: creator(),
            encrypted_key: Vec::new(),
            scrypt_object: ScryptObject::new(salt, &options.kdf),
            version: CONFIG_VERSION,
            feature_flags: flags.to_names(),
            volume_name: None,
        };
        record.encrypted_key = {
            let kek = derive_kek(password, &record.scrypt_object.salt, &options.kdf)?;
            wrap_key(&kek, &master)?
        };
        record.volume_name = Some(encrypt_volume_name(
            &master,
            &options.volume_name,
            &record.binding_digest(),
        )?);

        let data = record.to_json()?;
        fsutil::write_new_atomic(&config_path, &data).map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => VeilError::AlreadyExists(config_path.clone()),
            _ => VeilError::Io(e),
        })?;

        if flags.dir_iv {
            if let Err(e) = dir_iv::create_dir_iv(&base_dir) {
                discard_partial_config(&config_path);
                return Err(e);
            }
        }

        info!(
            base_dir = %base_dir.display(),
            flags = ?record.feature_flags,
            log_n = options.kdf.log_n(),
            "volume created"
        );

        Ok(Self {
            config_path,
            base_dir,
            record,
            flags,
            mount_target: None,
            master_key: Some(master),
            volume_name: Some(options.volume_name.clone()).filter(|n| !n.is_empty()),
        })
    }

    /// Validate flag consistency and structural sanity of the loaded record.
    ///
    /// Needs no key material. Flag conflicts yield `ConflictingOptions`;
    /// structural problems yield `ConfigFormat`. All diagnostics of the
    /// failing category are joined into one message.
    pub fn check_config(&self) -> VeilResult<()> {
        let conflicts = self.flags.conflicts();
        if !conflicts.is_empty() {
            return Err(VeilError::ConflictingOptions(conflicts.join("; ")));
        }

        let mut problems = self.record.scrypt_object.params().problems();
        if self.record.version != CONFIG_VERSION {
            problems.push(format!("unsupported config version {}", self.record.version));
        }
        if self.record.scrypt_object.salt.len() < MIN_SALT_SIZE {
            problems.push(format!(
                "salt too short: {} bytes (minimum {MIN_SALT_SIZE})",
                self.record.scrypt_object.salt.len()
            ));
        }
        if self.record.volume_name.is_none() {
            problems.push("record has no VolumeName binding".to_string());
        }
        if self.record.encrypted_key.len() != WRAPPED_KEY_SIZE {
            problems.push(format!(
                "encrypted key has {} bytes (expected {WRAPPED_KEY_SIZE})",
                self.record.encrypted_key.len()
            ));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(VeilError::ConfigFormat(problems.join("; ")))
        }
    }

    /// Replace the volume display name and rewrite the record.
    ///
    /// The name is resealed against a digest of the whole record, so the
    /// rewritten file is authenticated as one unit.
    pub fn write_volume_name(&mut self, name: &str) -> VeilResult<()> {
        let key = self.key()?;
        let mut record = self.record.clone();
        record.volume_name = Some(encrypt_volume_name(key, name, &record.binding_digest())?);

        self.persist(record)?;
        self.volume_name = Some(name.to_string()).filter(|n| !n.is_empty());
        info!(base_dir = %self.base_dir.display(), "volume name updated");
        Ok(())
    }

    /// Re-wrap the master key under a new password.
    ///
    /// A fresh salt is always generated; `kdf` optionally replaces the cost
    /// parameters. The master key itself does not change.
    pub fn change_password(
        &mut self,
        new_password: &SecretString,
        kdf: Option<KdfParams>,
    ) -> VeilResult<()> {
        let params = kdf.unwrap_or_else(|| self.record.scrypt_object.params());
        let problems = params.problems();
        if !problems.is_empty() {
            return Err(VeilError::ConflictingOptions(problems.join("; ")));
        }

        let key = self.key()?;
        let mut record = self.record.clone();
        record.scrypt_object = ScryptObject::new(generate_salt(), &params);
        record.encrypted_key = {
            let kek = derive_kek(new_password, &record.scrypt_object.salt, &params)?;
            wrap_key(&kek, key)?
        };
        let name = self.volume_name.clone().unwrap_or_default();
        record.volume_name = Some(encrypt_volume_name(key, &name, &record.binding_digest())?);

        self.persist(record)?;
        info!(base_dir = %self.base_dir.display(), log_n = params.log_n(), "password changed");
        Ok(())
    }

    /// Zeroize and discard the master key (unmount).
    pub fn lock(&mut self) {
        if self.master_key.take().is_some() {
            debug!(base_dir = %self.base_dir.display(), "master key discarded");
        }
        self.volume_name = None;
    }

    fn persist(&mut self, record: ConfigRecord) -> VeilResult<()> {
        let data = record.to_json()?;
        fsutil::write_atomic(&self.config_path, &data)?;
        self.record = record;
        Ok(())
    }

    // ── Accessors ──────────────────────────────────────────────────────────

    /// The unwrapped master key. Fails with `Locked` before unlock.
    pub fn key(&self) -> VeilResult<&MasterKey> {
        self.master_key.as_ref().ok_or(VeilError::Locked)
    }

    pub fn is_unlocked(&self) -> bool {
        self.master_key.is_some()
    }

    /// Decrypted display name. Fails with `Locked` before unlock; `None` if
    /// the volume has no name.
    pub fn volume_name(&self) -> VeilResult<Option<&str>> {
        self.key()?;
        Ok(self.volume_name.as_deref())
    }

    /// Drive letter or mount point the volume is (to be) mounted on.
    pub fn mount_target(&self) -> Option<&str> {
        self.mount_target.as_deref()
    }

    pub fn set_mount_target(&mut self, target: impl Into<String>) {
        self.mount_target = Some(target.into());
    }

    /// Directory holding the encrypted tree and the config file.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn flags(&self) -> VolumeFlags {
        self.flags
    }

    pub fn kdf_params(&self) -> KdfParams {
        self.record.scrypt_object.params()
    }

    pub fn version(&self) -> u16 {
        self.record.version
    }

    pub fn creator(&self) -> &str {
        &self.record.creator
    }

    pub fn record(&self) -> &ConfigRecord {
        &self.record
    }
}

fn creator() -> String {
    format!("veilfs {}", env!("CARGO_PKG_VERSION"))
}

/// Remove a config written by a create that failed later on. Returns whether
/// the file is gone.
fn discard_partial_config(config_path: &Path) -> bool {
    match std::fs::remove_file(config_path) {
        Ok(()) => true,
        Err(e) => {
            warn!(
                config = %config_path.display(),
                "rollback after failed create left config behind: {e}"
            );
            false
        }
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
