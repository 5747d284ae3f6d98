//! Tiplock Logging
//!
//! One place to install the process-wide `tracing` subscriber. `RUST_LOG`
//! always wins over the level passed in.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const TIPLOCK_TARGETS: &[&str] = &[
    "tiplock_core",
    "tiplock_crypto",
    "tiplock_keystore",
    "tiplock_settings",
    "tiplock_evidence",
    "tiplock_ledger",
    "tiplock_review",
    "tiplock_ingest",
    "tiplock_ipc",
    "tiplock_app",
    "tiplockd",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn from_verbose(verbose: bool) -> Self {
        if verbose {
            Self::Debug
        } else {
            Self::Info
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    /// Default directive: our crates at this level, dependencies one notch
    /// quieter so hyper/reqwest do not drown the pipeline logs.
    fn directive(&self) -> String {
        let deps = match self {
            Self::Trace | Self::Debug => "info",
            Self::Info | Self::Warn => "warn",
            Self::Error => "error",
        };
        let mut directive = deps.to_string();
        for target in TIPLOCK_TARGETS {
            directive.push_str(&format!(",{}={}", target, self.as_str()));
        }
        directive
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directive()))
    }
}

/// Install a human-readable subscriber. Returns an error string if a global
/// subscriber is already set.
pub fn try_init(level: LogLevel) -> Result<(), String> {
    tracing_subscriber::registry()
        .with(level.filter())
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| e.to_string())
}

/// Install a JSON subscriber, one object per line.
pub fn try_init_json(level: LogLevel) -> Result<(), String> {
    tracing_subscriber::registry()
        .with(level.filter())
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
        .map_err(|e| e.to_string())
}
