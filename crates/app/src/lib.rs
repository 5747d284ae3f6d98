//! Tiplock App
//!
//! Process bootstrap for the tiplock node and its CLI: logging, settings
//! with environment overrides, and the ledger signing key. [`node::Node`]
//! then wires evidence store, ledger, pipeline and review workflow behind the
//! local RPC socket.

pub mod config;
pub mod node;
pub mod rpc;

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tiplock_crypto::LedgerKeypair;
use tiplock_logging::LogLevel;
use tiplock_settings::{EnvOverrides, EnvSource, ProcessEnv, Settings, SettingsError};
use tracing::info;

pub use config::NodeConfig;
pub use node::Node;

/// Service name used for config, data and socket paths.
pub const SERVICE: &str = "tiplock";

/// Hex secret of the ledger signing key; wins over the key file.
pub const ENV_WALLET_KEY: &str = "WALLET_PRIVATEKEY";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Initialization failed: {0}")]
    InitError(String),
    #[error("Settings error: {0}")]
    SettingsError(#[from] SettingsError),
    #[error("Keystore error: {0}")]
    KeystoreError(#[from] tiplock_keystore::KeystoreError),
    #[error("Evidence store error: {0}")]
    StoreError(#[from] tiplock_evidence::StoreError),
    #[error("Ledger error: {0}")]
    LedgerError(#[from] tiplock_ledger::LedgerError),
    #[error("Case store error: {0}")]
    ReviewError(#[from] tiplock_review::ReviewError),
    #[error("IPC error: {0}")]
    IpcError(#[from] tiplock_ipc::IpcError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppType {
    Cli,
    Daemon,
}

impl AppType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cli => "CLI",
            Self::Daemon => "Daemon",
        }
    }
}

/// Initialized application context
pub struct App<T> {
    pub service: String,
    pub app_type: AppType,
    pub keypair: LedgerKeypair,
    pub settings: Settings<T>,
}

pub struct AppBuilder<T> {
    service: String,
    app_type: AppType,
    log_level: LogLevel,
    json_logs: bool,
    skip_logging: bool,
    skip_banner: bool,
    config_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
    env: Box<dyn EnvSource>,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned + Default + EnvOverrides> AppBuilder<T> {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
            app_type: AppType::Cli,
            log_level: LogLevel::Info,
            json_logs: false,
            skip_logging: false,
            skip_banner: false,
            config_path: None,
            key_path: None,
            env: Box::new(ProcessEnv),
            _phantom: std::marker::PhantomData,
        }
    }

    pub fn app_type(mut self, app_type: AppType) -> Self {
        self.app_type = app_type;
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.log_level = LogLevel::from_verbose(verbose);
        self
    }

    pub fn json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }

    pub fn skip_logging(mut self) -> Self {
        self.skip_logging = true;
        self
    }

    pub fn skip_banner(mut self) -> Self {
        self.skip_banner = true;
        self
    }

    pub fn config_path(mut self, path: &Path) -> Self {
        self.config_path = Some(path.to_path_buf());
        self
    }

    /// Key file used when `WALLET_PRIVATEKEY` is unset.
    pub fn key_path(mut self, path: &Path) -> Self {
        self.key_path = Some(path.to_path_buf());
        self
    }

    /// Override source for settings (the process environment by default).
    pub fn env(mut self, env: Box<dyn EnvSource>) -> Self {
        self.env = env;
        self
    }

    pub fn build(self) -> Result<App<T>, AppError> {
        if !self.skip_logging {
            let _ = if self.json_logs {
                tiplock_logging::try_init_json(self.log_level)
            } else {
                tiplock_logging::try_init(self.log_level)
            };
        }

        let settings =
            Settings::load_with_env(&self.service, self.config_path.as_deref(), self.env.as_ref())?;

        let key_path = self
            .key_path
            .unwrap_or_else(|| tiplock_keystore::default_key_path_for(&self.service));
        let keypair = tiplock_keystore::resolve_keypair(ENV_WALLET_KEY, &key_path)?;

        if !self.skip_banner {
            info!(
                version = env!("CARGO_PKG_VERSION"),
                app_type = self.app_type.name(),
                address = %keypair.address(),
                settings = %settings.path().display(),
                "{} starting",
                self.service,
            );
        }

        Ok(App {
            service: self.service,
            app_type: self.app_type,
            keypair,
            settings,
        })
    }
}
