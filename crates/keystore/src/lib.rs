//! Tiplock Keystore
//!
//! Resolves the one signing identity a tiplock node submits ledger
//! transactions from. The key is a hex-encoded secp256k1 secret, taken from
//! an environment variable when set, otherwise from a key file under the
//! platform data directory.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tiplock_crypto::{KeyError, LedgerKeypair};
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error("Failed to read key file: {0}")]
    ReadError(String),
    #[error("Failed to write key file: {0}")]
    WriteError(String),
    #[error("Invalid key in {source_name}: {error}")]
    InvalidKey { source_name: String, error: KeyError },
    #[error("Failed to create directory: {0}")]
    CreateDirError(String),
}

pub type Result<T> = std::result::Result<T, KeystoreError>;

/// Read a hex secret key file.
pub fn load_keypair(path: &Path) -> Result<LedgerKeypair> {
    debug!("Loading ledger key from {}", path.display());
    let text = fs::read_to_string(path).map_err(|e| KeystoreError::ReadError(e.to_string()))?;
    LedgerKeypair::from_hex(text.trim()).map_err(|error| KeystoreError::InvalidKey {
        source_name: path.display().to_string(),
        error,
    })
}

/// Load the key at `path`, or generate and persist a fresh one.
///
/// A fresh identity holds no funds; print its address and fund it before the
/// first submission.
pub fn load_or_generate_keypair(path: &Path) -> Result<LedgerKeypair> {
    if path.exists() {
        load_keypair(path)
    } else {
        let keypair = LedgerKeypair::generate();
        save_keypair(path, &keypair)?;
        info!(
            address = %keypair.address(),
            "Generated new ledger key at {}",
            path.display()
        );
        Ok(keypair)
    }
}

/// Write the secret as hex, owner-only on unix.
pub fn save_keypair(path: &Path, keypair: &LedgerKeypair) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| KeystoreError::CreateDirError(e.to_string()))?;
    }
    fs::write(path, hex_secret(keypair)).map_err(|e| KeystoreError::WriteError(e.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .map_err(|e| KeystoreError::WriteError(e.to_string()))?;
    }
    Ok(())
}

/// Read a hex secret from `var`. `Ok(None)` when the variable is unset or
/// blank.
pub fn keypair_from_env(var: &str) -> Result<Option<LedgerKeypair>> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => LedgerKeypair::from_hex(&value)
            .map(Some)
            .map_err(|error| KeystoreError::InvalidKey {
                source_name: format!("${var}"),
                error,
            }),
        _ => Ok(None),
    }
}

/// Environment first, then the key file (generated if missing).
pub fn resolve_keypair(env_var: &str, path: &Path) -> Result<LedgerKeypair> {
    if let Some(keypair) = keypair_from_env(env_var)? {
        debug!(address = %keypair.address(), "Using ledger key from ${}", env_var);
        return Ok(keypair);
    }
    load_or_generate_keypair(path)
}

fn hex_secret(keypair: &LedgerKeypair) -> String {
    format!("0x{}\n", hex::encode(keypair.secret_key_bytes()))
}

/// Default keystore directory for a service (`<data dir>/keys`).
pub fn default_keystore_dir_for(service: &str) -> PathBuf {
    data_dir(service).join("keys")
}

/// Default key file path for a service.
pub fn default_key_path_for(service: &str) -> PathBuf {
    default_keystore_dir_for(service).join("ledger.key")
}

/// Default config directory for a service.
///
/// - macOS: `~/Library/Application Support/{service}`
/// - Linux: `$XDG_CONFIG_HOME/{service}` or `~/.config/{service}`
/// - other: `~/.{service}`
pub fn default_config_dir_for(service: &str) -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        home_dir().join("Library").join("Application Support").join(service)
    }
    #[cfg(target_os = "linux")]
    {
        xdg_dir("XDG_CONFIG_HOME", &[".config"]).join(service.to_lowercase())
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        home_dir().join(format!(".{}", service.to_lowercase()))
    }
}

/// Default data directory for a service (staging files, cases, keys).
pub fn data_dir(service: &str) -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        home_dir().join("Library").join("Application Support").join(service)
    }
    #[cfg(target_os = "linux")]
    {
        xdg_dir("XDG_DATA_HOME", &[".local", "share"]).join(service.to_lowercase())
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        home_dir().join(format!(".{}", service.to_lowercase()))
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_path(path: &str) -> PathBuf {
    if path == "~" {
        home_dir()
    } else if let Some(rest) = path.strip_prefix("~/") {
        home_dir().join(rest)
    } else {
        PathBuf::from(path)
    }
}

#[cfg(target_os = "linux")]
fn xdg_dir(var: &str, fallback: &[&str]) -> PathBuf {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| fallback.iter().fold(home_dir(), |acc, p| acc.join(p)))
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_load_keypair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("ledger.key");

        let kp1 = load_or_generate_keypair(&path).unwrap();
        let kp2 = load_or_generate_keypair(&path).unwrap();
        assert_eq!(kp1.address(), kp2.address());

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("0x"));
        assert_eq!(text.trim().len(), 66);
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.key");
        load_or_generate_keypair(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_invalid_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.key");
        fs::write(&path, "not hex").unwrap();

        let result = load_keypair(&path);
        assert!(matches!(result, Err(KeystoreError::InvalidKey { .. })));
    }

    #[test]
    fn test_env_key_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.key");
        let var = "TIPLOCK_KEYSTORE_TEST_KEY";
        std::env::set_var(
            var,
            "0x0000000000000000000000000000000000000000000000000000000000000001",
        );

        let kp = resolve_keypair(var, &path).unwrap();
        assert_eq!(
            kp.address().to_string(),
            "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"
        );
        assert!(!path.exists());

        std::env::remove_var(var);
    }

    #[test]
    fn test_blank_env_is_ignored() {
        let var = "TIPLOCK_KEYSTORE_TEST_BLANK";
        std::env::set_var(var, "   ");
        assert!(keypair_from_env(var).unwrap().is_none());
        std::env::remove_var(var);
    }

    #[test]
    fn test_default_paths() {
        let key_path = default_key_path_for("tiplock");
        assert!(key_path.to_string_lossy().contains("keys"));
        assert!(key_path.to_string_lossy().ends_with("ledger.key"));
        assert!(!default_config_dir_for("tiplock").as_os_str().is_empty());
    }

    #[test]
    fn test_expand_path() {
        assert!(!expand_path("~/staging").to_string_lossy().starts_with('~'));
        assert_eq!(expand_path("/abs/path"), PathBuf::from("/abs/path"));
    }
}
