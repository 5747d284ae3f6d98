//! Tiplock Settings
//!
//! A service's config lives in one JSON file. The file is created with
//! defaults on first run; environment variables then override individual
//! fields without being written back, so secrets such as API tokens never
//! land on disk unless an operator puts them there.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::debug;

use tiplock_keystore::default_config_dir_for;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    ReadError(String),
    #[error("Failed to write settings: {0}")]
    WriteError(String),
    #[error("Failed to parse settings {path}: {error}")]
    ParseError { path: String, error: String },
    #[error("Failed to create directory: {0}")]
    CreateDirError(String),
    #[error("Invalid value for {var}: {reason}")]
    InvalidEnv { var: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Source of override values, normally the process environment.
pub trait EnvSource {
    fn get(&self, var: &str) -> Option<String>;
}

/// Reads `std::env`, treating blank values as unset.
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, var: &str) -> Option<String> {
        std::env::var(var).ok().filter(|v| !v.trim().is_empty())
    }
}

impl EnvSource for std::collections::HashMap<String, String> {
    fn get(&self, var: &str) -> Option<String> {
        std::collections::HashMap::get(self, var).cloned()
    }
}

/// Config types that accept environment overrides.
pub trait EnvOverrides {
    fn apply_env(&mut self, env: &dyn EnvSource) -> Result<()>;
}

/// Parse an override, naming the variable on failure.
pub fn parse_env<T: std::str::FromStr>(env: &dyn EnvSource, var: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env.get(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| SettingsError::InvalidEnv {
                var: var.to_string(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

/// A loaded config together with the file it came from.
pub struct Settings<T> {
    pub config: T,
    path: PathBuf,
}

impl<T: Serialize + DeserializeOwned + Default> Settings<T> {
    /// Load settings from the default path for a service, or create defaults.
    pub fn load_or_default(service: &str, custom_path: Option<&Path>) -> Result<Self> {
        let path = match custom_path {
            Some(p) => p.to_path_buf(),
            None => default_settings_path(service),
        };

        if path.exists() {
            debug!("Loading settings from {}", path.display());
            let content =
                fs::read_to_string(&path).map_err(|e| SettingsError::ReadError(e.to_string()))?;
            let config: T =
                serde_json::from_str(&content).map_err(|e| SettingsError::ParseError {
                    path: path.display().to_string(),
                    error: e.to_string(),
                })?;
            Ok(Self { config, path })
        } else {
            debug!("Creating default settings at {}", path.display());
            let settings = Self {
                config: T::default(),
                path,
            };
            settings.save()?;
            Ok(settings)
        }
    }

    /// Save current settings to disk.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| SettingsError::CreateDirError(e.to_string()))?;
        }
        let content = serde_json::to_string_pretty(&self.config)
            .map_err(|e| SettingsError::WriteError(e.to_string()))?;
        fs::write(&self.path, content).map_err(|e| SettingsError::WriteError(e.to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T: Serialize + DeserializeOwned + Default + EnvOverrides> Settings<T> {
    /// Load (or create) the file, then layer environment overrides on top.
    pub fn load_with_env(
        service: &str,
        custom_path: Option<&Path>,
        env: &dyn EnvSource,
    ) -> Result<Self> {
        let mut settings = Self::load_or_default(service, custom_path)?;
        settings.config.apply_env(env)?;
        Ok(settings)
    }
}

/// Get the default settings file path for a service.
pub fn default_settings_path(service: &str) -> PathBuf {
    default_config_dir_for(service).join("settings.json")
}
