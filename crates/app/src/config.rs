//! Node configuration: one settings file composed of each crate's config,
//! plus environment overrides.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tiplock_core::normalize_gateway_base;
use tiplock_evidence::StoreConfig;
use tiplock_ingest::IngestConfig;
use tiplock_keystore::data_dir;
use tiplock_ledger::LedgerConfig;
use tiplock_settings::{parse_env, EnvOverrides, EnvSource, Result};

use crate::SERVICE;

pub const ENV_PINATA_JWT: &str = "PINATA_JWT";
pub const ENV_GATEWAY_URL: &str = "GATEWAY_URL";
pub const ENV_RPC_URL: &str = "TIPLOCK_RPC_URL";
pub const ENV_CONTRACT: &str = "TIPLOCK_CONTRACT";
pub const ENV_CHAIN_ID: &str = "TIPLOCK_CHAIN_ID";
pub const ENV_SOCKET: &str = "TIPLOCK_SOCKET";
pub const ENV_DRY_RUN: &str = "TIPLOCK_DRY_RUN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub store: StoreConfig,
    pub ledger: LedgerConfig,
    pub ingest: IngestConfig,
    /// One JSON file per case.
    pub cases_dir: PathBuf,
    pub socket_path: PathBuf,
    /// Keep evidence in memory and record reports on a dry-run ledger.
    pub dry_run: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data = data_dir(SERVICE);
        Self {
            store: StoreConfig::default(),
            ledger: LedgerConfig::default(),
            ingest: IngestConfig {
                staging_dir: data.join("staging"),
                ..IngestConfig::default()
            },
            cases_dir: data.join("cases"),
            socket_path: tiplock_ipc::default_socket_path(SERVICE),
            dry_run: false,
        }
    }
}

/// Dry-run cases live apart from real ones.
const DRY_RUN_CASES_SUBDIR: &str = "dry-run";

impl NodeConfig {
    /// Where this node keeps its cases: `cases_dir`, or its `dry-run`
    /// subdirectory when running without real backends.
    pub fn effective_cases_dir(&self) -> PathBuf {
        if self.dry_run {
            self.cases_dir.join(DRY_RUN_CASES_SUBDIR)
        } else {
            self.cases_dir.clone()
        }
    }
}

impl EnvOverrides for NodeConfig {
    fn apply_env(&mut self, env: &dyn EnvSource) -> Result<()> {
        if let Some(jwt) = env.get(ENV_PINATA_JWT) {
            self.store.jwt = Some(jwt.trim().to_string());
        }
        if let Some(gateway) = env.get(ENV_GATEWAY_URL) {
            self.store.gateway_base = normalize_gateway_base(&gateway);
        }
        if let Some(url) = env.get(ENV_RPC_URL) {
            self.ledger.rpc_url = url.trim().to_string();
        }
        if let Some(contract) = env.get(ENV_CONTRACT) {
            self.ledger.contract_address = contract.trim().to_string();
        }
        if let Some(chain_id) = parse_env(env, ENV_CHAIN_ID)? {
            self.ledger.chain_id = Some(chain_id);
        }
        if let Some(socket) = env.get(ENV_SOCKET) {
            self.socket_path = PathBuf::from(socket.trim());
        }
        if let Some(dry_run) = parse_env(env, ENV_DRY_RUN)? {
            self.dry_run = dry_run;
        }
        Ok(())
    }
}
