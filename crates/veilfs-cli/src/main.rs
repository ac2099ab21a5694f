//! veilfs: volume key management CLI
//!
//! Commands:
//!   init <dir>              - create a new volume config in an existing empty directory
//!   info <dir>              - show version, flags, and KDF parameters (no password)
//!   check <dir>             - validate flag consistency and record structure
//!   unlock <dir>            - verify the password and show the volume name
//!   passwd <dir>            - re-wrap the master key under a new password
//!   set-name <dir> <name>   - change the encrypted volume display name
//!
//! Passwords are read from VEILFS_PASSWORD when set, otherwise prompted.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use tracing::info;

use veilfs_core::{VeilConfig, VeilError};
use veilfs_crypto::{ConfigStore, CreateOptions, KdfParams};
use veilfs_fs::{DirIvCache, DirIvLoader};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "veilfs",
    version,
    about = "veilfs encrypted overlay volume tool",
    long_about = "veilfs: create, inspect, and unlock encrypted overlay volumes"
)]
struct Cli {
    /// Path to veilfs.toml configuration file
    #[arg(long, short = 'c', env = "VEILFS_CONFIG", default_value = "~/.config/veilfs/veilfs.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "VEILFS_LOG")]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "VEILFS_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new volume
    Init {
        /// Base directory of the encrypted tree (must exist and be empty)
        dir: PathBuf,
        /// Store file names unencrypted
        #[arg(long)]
        plaintext_names: bool,
        /// Disable long file name support
        #[arg(long)]
        no_long_names: bool,
        /// Volume display name (stored encrypted)
        #[arg(long, default_value = "")]
        name: String,
        /// scrypt cost exponent (overrides the config file)
        #[arg(long)]
        scrypt_log_n: Option<u8>,
    },

    /// Show volume parameters without unlocking
    Info {
        dir: PathBuf,
    },

    /// Validate the volume config
    Check {
        dir: PathBuf,
    },

    /// Verify the password and show the unlocked volume's metadata
    Unlock {
        dir: PathBuf,
        /// Drive letter or mount point the volume is intended for
        #[arg(long)]
        mount_target: Option<String>,
    },

    /// Change the volume password
    Passwd {
        dir: PathBuf,
        /// New scrypt cost exponent (default: keep current)
        #[arg(long)]
        scrypt_log_n: Option<u8>,
    },

    /// Change the volume display name
    #[command(name = "set-name")]
    SetName {
        dir: PathBuf,
        name: String,
    },
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = expand_tilde(&cli.config);
    let config = VeilConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);

    if !DirIvCache::init_global(config.cache.dir_iv_entries) {
        tracing::debug!("dir IV cache already initialized");
    }

    info!(version = env!("CARGO_PKG_VERSION"), "veilfs starting");

    let result = match cli.command {
        Commands::Init {
            dir,
            plaintext_names,
            no_long_names,
            name,
            scrypt_log_n,
        } => cmd_init(&config, &dir, plaintext_names, !no_long_names, name, scrypt_log_n),
        Commands::Info { dir } => cmd_info(&dir),
        Commands::Check { dir } => cmd_check(&dir),
        Commands::Unlock { dir, mount_target } => cmd_unlock(&dir, mount_target),
        Commands::Passwd { dir, scrypt_log_n } => cmd_passwd(&config, &dir, scrypt_log_n),
        Commands::SetName { dir, name } => cmd_set_name(&dir, &name),
    };

    result.map_err(|e| match e.downcast_ref::<VeilError>() {
        Some(VeilError::Authentication) => anyhow::anyhow!("wrong password or corrupted config"),
        _ => e,
    })
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

fn read_password(prompt: &str) -> Result<SecretString> {
    if let Ok(pw) = std::env::var("VEILFS_PASSWORD") {
        return Ok(SecretString::from(pw));
    }
    let pw = rpassword::prompt_password(prompt).context("reading password")?;
    Ok(SecretString::from(pw))
}

fn read_new_password() -> Result<SecretString> {
    if std::env::var_os("VEILFS_PASSWORD").is_some() {
        let password = read_password("")?;
        check_new_password(&password, None)?;
        return Ok(password);
    }
    let first = read_password("New password: ")?;
    let second = read_password("Repeat: ")?;
    check_new_password(&first, Some(&second))?;
    Ok(first)
}

fn check_new_password(first: &SecretString, repeat: Option<&SecretString>) -> Result<()> {
    if let Some(repeat) = repeat {
        if first.expose_secret() != repeat.expose_secret() {
            anyhow::bail!("passwords do not match");
        }
    }
    if first.expose_secret().is_empty() {
        anyhow::bail!("password must not be empty");
    }
    Ok(())
}

fn kdf_from(config: &VeilConfig, log_n: Option<u8>) -> KdfParams {
    KdfParams::from_log_n(log_n.unwrap_or(config.kdf.log_n), config.kdf.r, config.kdf.p)
}

fn unlock(dir: &Path) -> Result<ConfigStore> {
    let mut store = ConfigStore::read(dir)?;
    store.check_config()?;
    let password = read_password("Password: ")?;
    store.decrypt_key(&password)?;
    Ok(store)
}

// ── Commands ─────────────────────────────────────────────────────────────────

fn cmd_init(
    config: &VeilConfig,
    dir: &Path,
    plaintext_names: bool,
    long_names: bool,
    name: String,
    log_n: Option<u8>,
) -> Result<()> {
    let options = CreateOptions {
        plaintext_names,
        eme_names: !plaintext_names,
        long_names: long_names && !plaintext_names,
        volume_name: name,
        kdf: kdf_from(config, log_n),
    };
    let password = read_new_password()?;
    let store = ConfigStore::create(dir, &password, &options)?;
    println!("created volume in {}", store.base_dir().display());
    println!("  config: {}", store.config_path().display());
    Ok(())
}

fn cmd_info(dir: &Path) -> Result<()> {
    let store = ConfigStore::read(dir)?;
    let kdf = store.kdf_params();
    println!("config:   {}", store.config_path().display());
    println!("creator:  {}", store.creator());
    println!("version:  {}", store.version());
    println!("flags:    {}", store.flags().to_names().join(" "));
    println!(
        "scrypt:   N=2^{} R={} P={} KeyLen={}",
        kdf.log_n(),
        kdf.r,
        kdf.p,
        kdf.key_len
    );
    Ok(())
}

fn cmd_check(dir: &Path) -> Result<()> {
    let store = ConfigStore::read(dir)?;
    store.check_config()?;
    println!("ok: {}", store.config_path().display());
    Ok(())
}

fn cmd_unlock(dir: &Path, mount_target: Option<String>) -> Result<()> {
    let mut store = unlock(dir)?;
    if let Some(target) = mount_target {
        store.set_mount_target(target);
    }
    println!("unlocked: {}", store.base_dir().display());
    println!("name:     {}", store.volume_name()?.unwrap_or("(none)"));
    if let Some(target) = store.mount_target() {
        println!("target:   {target}");
    }
    if store.flags().dir_iv {
        DirIvLoader::global().load(store.base_dir())?;
        let stats = DirIvCache::global().stats();
        tracing::debug!(resident = stats.resident, capacity = stats.capacity, "root dir IV loaded");
    }
    store.lock();
    Ok(())
}

fn cmd_passwd(config: &VeilConfig, dir: &Path, log_n: Option<u8>) -> Result<()> {
    let mut store = unlock(dir)?;
    let new_password = read_new_password()?;
    let kdf = log_n.map(|n| kdf_from(config, Some(n)));
    store.change_password(&new_password, kdf)?;
    println!("password changed");
    Ok(())
}

fn cmd_set_name(dir: &Path, name: &str) -> Result<()> {
    let mut store = unlock(dir)?;
    store.write_volume_name(name)?;
    println!("volume name set");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_init() {
        let cli = Cli::parse_from(["veilfs", "init", "/tmp/vol", "--name", "Docs", "--scrypt-log-n", "12"]);
        match cli.command {
            Commands::Init {
                dir,
                name,
                scrypt_log_n,
                plaintext_names,
                ..
            } => {
                assert_eq!(dir, PathBuf::from("/tmp/vol"));
                assert_eq!(name, "Docs");
                assert_eq!(scrypt_log_n, Some(12));
                assert!(!plaintext_names);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_parses_set_name() {
        let cli = Cli::parse_from(["veilfs", "--log", "debug", "set-name", "/v", "New"]);
        assert_eq!(cli.log.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Commands::SetName { name, .. } if name == "New"));
    }

    #[test]
    fn kdf_override() {
        let config = VeilConfig::default();
        assert_eq!(kdf_from(&config, None).log_n(), 16);
        assert_eq!(kdf_from(&config, Some(12)).log_n(), 12);
    }

    #[test]
    fn new_password_must_be_non_empty() {
        let empty = SecretString::from(String::new());
        assert!(check_new_password(&empty, None).is_err());
        assert!(check_new_password(&empty, Some(&SecretString::from(String::new()))).is_err());

        let pw = SecretString::from("s3cret".to_string());
        check_new_password(&pw, None).unwrap();
        check_new_password(&pw, Some(&SecretString::from("s3cret".to_string()))).unwrap();
        assert!(check_new_password(&pw, Some(&SecretString::from("other".to_string()))).is_err());
    }

    #[test]
    fn tilde_expansion() {
        let plain = PathBuf::from("/etc/veilfs.toml");
        assert_eq!(expand_tilde(&plain), plain);
    }
}
