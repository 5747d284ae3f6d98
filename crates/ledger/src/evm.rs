//! EVM contract ledger.
//!
//! One submission is: read the gas price, take the nonce lock, read the
//! pending nonce, sign and send, release the lock, then poll for the
//! receipt. The transaction hash is the submission id.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tiplock_core::SubmissionId;
use tiplock_crypto::{Address, LedgerKeypair};
use tokio::sync::{Mutex, OnceCell};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::abi::encode_add_report;
use crate::fee::{check_ceiling, format_gwei, max_fee_wei, DEFAULT_GAS_LIMIT};
use crate::rpc::{parse_quantity, HttpTransport, RpcCallError, RpcTransport};
use crate::tx::LegacyTransaction;
use crate::{LedgerClient, LedgerError};

pub const DEFAULT_CONTRACT: &str = "0x7EF2e0048f5bAeDe046f6BF797943daF4ED8CB47";

/// Polygon Amoy testnet.
pub const DEFAULT_CHAIN_ID: u64 = 80002;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub rpc_url: String,
    pub contract_address: String,
    /// Read once from the node when unset.
    pub chain_id: Option<u64>,
    pub gas_limit: u64,
    /// Refuse to send above this price.
    pub max_gas_price_wei: Option<u64>,
    pub confirmation_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://rpc-amoy.polygon.technology".to_string(),
            contract_address: DEFAULT_CONTRACT.to_string(),
            chain_id: Some(DEFAULT_CHAIN_ID),
            gas_limit: DEFAULT_GAS_LIMIT,
            max_gas_price_wei: None,
            confirmation_timeout_secs: 120,
            poll_interval_ms: 2_000,
            request_timeout_secs: 30,
        }
    }
}

pub struct EvmLedger<T: RpcTransport = HttpTransport> {
    transport: T,
    keypair: LedgerKeypair,
    contract: Address,
    config: LedgerConfig,
    chain_id: OnceCell<u64>,
    /// Held from nonce read to send so concurrent submissions from this
    /// identity never share a nonce.
    nonce_lock: Mutex<()>,
}

impl EvmLedger<HttpTransport> {
    pub fn connect(config: LedgerConfig, keypair: LedgerKeypair) -> Result<Self, LedgerError> {
        let transport = HttpTransport::new(
            &config.rpc_url,
            Duration::from_secs(config.request_timeout_secs.max(1)),
        )
        .map_err(|e| LedgerError::Config(e.to_string()))?;
        Self::with_transport(config, keypair, transport)
    }
}

impl<T: RpcTransport> EvmLedger<T> {
    pub fn with_transport(
        config: LedgerConfig,
        keypair: LedgerKeypair,
        transport: T,
    ) -> Result<Self, LedgerError> {
        let contract = Address::from_str(&config.contract_address)
            .map_err(|e| LedgerError::Config(format!("contract address: {e}")))?;
        if config.gas_limit == 0 {
            return Err(LedgerError::Config("gas limit must be positive".to_string()));
        }
        let chain_id = match config.chain_id {
            Some(id) => OnceCell::new_with(Some(id)),
            None => OnceCell::new(),
        };
        Ok(Self {
            transport,
            keypair,
            contract,
            config,
            chain_id,
            nonce_lock: Mutex::new(()),
        })
    }

    /// The signing identity's address.
    pub fn address(&self) -> Address {
        self.keypair.address()
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    async fn chain_id(&self) -> Result<u64, LedgerError> {
        self.chain_id
            .get_or_try_init(|| async {
                let value = self
                    .transport
                    .call("eth_chainId", json!([]))
                    .await
                    .map_err(|e| LedgerError::Transport(format!("eth_chainId: {e}")))?;
                let id = parse_quantity(&value)
                    .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;
                let id = u64::try_from(id)
                    .map_err(|_| LedgerError::InvalidResponse(format!("chain id {id}")))?;
                info!(chain_id = id, "chain id read from node");
                Ok::<u64, LedgerError>(id)
            })
            .await
            .copied()
    }

    /// Sign and send under the nonce lock. Returns the transaction hash.
    async fn send(&self, data: Vec<u8>, gas_price: u128) -> Result<String, LedgerError> {
        let chain_id = self.chain_id().await?;
        let from = self.address();

        let _guard = self.nonce_lock.lock().await;

        let nonce = self
            .transport
            .call(
                "eth_getTransactionCount",
                json!([from.to_checksum(), "pending"]),
            )
            .await
            .map_err(|e| LedgerError::Transport(format!("eth_getTransactionCount: {e}")))?;
        let nonce = parse_quantity(&nonce)
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;
        let nonce =
            u64::try_from(nonce).map_err(|_| LedgerError::InvalidResponse(format!("nonce {nonce}")))?;

        let tx = LegacyTransaction {
            nonce,
            gas_price,
            gas_limit: self.config.gas_limit,
            to: self.contract,
            value: 0,
            data,
            chain_id,
        };
        let signed = tx.sign(&self.keypair)?;
        let tx_hash = signed.hash_hex();

        debug!(tx_hash = %tx_hash, nonce, from = %from, "sending transaction");
        match self
            .transport
            .call("eth_sendRawTransaction", json!([signed.raw_hex()]))
            .await
        {
            Ok(returned) => {
                if returned.as_str().map(str::to_lowercase) != Some(tx_hash.clone()) {
                    warn!(tx_hash = %tx_hash, returned = %returned, "node returned a different hash");
                }
                Ok(tx_hash)
            }
            Err(RpcCallError::Rpc { code, message }) => {
                warn!(tx_hash = %tx_hash, code, message = %message, "transaction rejected");
                Err(LedgerError::Rejected(message))
            }
            Err(e) => Err(LedgerError::SendUncertain {
                tx_hash,
                reason: e.to_string(),
            }),
        }
    }

    /// Poll until the receipt shows up or the confirmation timeout passes.
    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<(), LedgerError> {
        let timeout = Duration::from_secs(self.config.confirmation_timeout_secs);
        let interval = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            match self
                .transport
                .call("eth_getTransactionReceipt", json!([tx_hash]))
                .await
            {
                Ok(Value::Null) => debug!(tx_hash, "receipt not yet available"),
                Ok(receipt) => {
                    return match receipt.get("status").and_then(Value::as_str) {
                        Some("0x0") => Err(LedgerError::Reverted {
                            tx_hash: tx_hash.to_string(),
                        }),
                        _ => Ok(()),
                    };
                }
                Err(e) => warn!(tx_hash, error = %e, "receipt poll failed"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(LedgerError::Unconfirmed {
                    tx_hash: tx_hash.to_string(),
                    waited_secs: now.duration_since(started).as_secs(),
                });
            }
            tokio::time::sleep(interval.min(deadline - now)).await;
        }
    }
}

#[async_trait::async_trait]
impl<T: RpcTransport> LedgerClient for EvmLedger<T> {
    async fn gas_price(&self) -> Result<u128, LedgerError> {
        let value = self
            .transport
            .call("eth_gasPrice", json!([]))
            .await
            .map_err(|e| LedgerError::FeeQuery(e.to_string()))?;
        parse_quantity(&value).map_err(|e| LedgerError::FeeQuery(e.to_string()))
    }

    async fn record_report(
        &self,
        text: &str,
        evidence_url: Option<&str>,
    ) -> Result<SubmissionId, LedgerError> {
        let gas_price = self.gas_price().await?;
        check_ceiling(gas_price, self.config.max_gas_price_wei.map(u128::from))?;
        debug!(
            gas_price = %format_gwei(gas_price),
            max_fee_wei = %max_fee_wei(gas_price, self.config.gas_limit),
            "fee conditions read"
        );

        let data = encode_add_report(text, evidence_url);
        let tx_hash = self.send(data, gas_price).await?;
        self.wait_for_receipt(&tx_hash).await?;

        info!(
            tx_hash = %tx_hash,
            with_evidence = evidence_url.is_some(),
            "report recorded on ledger"
        );
        Ok(SubmissionId::new(tx_hash))
    }
}
