//! Tiplock Ledger
//!
//! Records reports on an EVM contract. [`EvmLedger`] reads the gas price for
//! every submission, signs a legacy EIP-155 transaction calling
//! `addReport`, sends it and waits for the receipt. [`DryRunLedger`] records
//! calls in memory.
//!
//! Nothing here retries: a report written twice is two ledger entries.

pub mod abi;
pub mod dry_run;
pub mod evm;
pub mod fee;
pub mod rlp;
pub mod rpc;
pub mod tx;

pub use dry_run::{DryRunFailure, DryRunLedger, RecordedCall};
pub use evm::{EvmLedger, LedgerConfig};
pub use rpc::{HttpTransport, RpcCallError, RpcTransport};

use thiserror::Error;
use tiplock_core::SubmissionId;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Failed to read gas price: {0}")]
    FeeQuery(String),
    #[error("Gas price {price} wei is above the configured ceiling of {ceiling} wei")]
    FeeAboveCeiling { price: u128, ceiling: u128 },
    #[error("Transaction rejected by node: {0}")]
    Rejected(String),
    #[error("Transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },
    #[error("Transaction {tx_hash} not confirmed after {waited_secs}s; it may still commit")]
    Unconfirmed { tx_hash: String, waited_secs: u64 },
    #[error("Transaction {tx_hash} may have been sent: {reason}")]
    SendUncertain { tx_hash: String, reason: String },
    #[error("Ledger transport error: {0}")]
    Transport(String),
    #[error("Invalid ledger response: {0}")]
    InvalidResponse(String),
    #[error("Signing failed: {0}")]
    Signing(String),
    #[error("Ledger configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    /// True when the transaction may be on the chain even though the call
    /// failed. Resubmitting in that state risks a duplicate entry.
    pub fn may_have_committed(&self) -> bool {
        matches!(
            self,
            LedgerError::Unconfirmed { .. } | LedgerError::SendUncertain { .. }
        )
    }

    /// Hash of the transaction the error concerns, once one was built.
    pub fn tx_hash(&self) -> Option<&str> {
        match self {
            LedgerError::Reverted { tx_hash }
            | LedgerError::Unconfirmed { tx_hash, .. }
            | LedgerError::SendUncertain { tx_hash, .. } => Some(tx_hash),
            _ => None,
        }
    }
}

/// A ledger that can record reports.
#[async_trait::async_trait]
pub trait LedgerClient: Send + Sync {
    /// Current fee conditions in wei per gas. Never cached.
    async fn gas_price(&self) -> Result<u128, LedgerError>;

    /// Record a report. Not idempotent: each successful call is a new entry.
    async fn record_report(
        &self,
        text: &str,
        evidence_url: Option<&str>,
    ) -> Result<SubmissionId, LedgerError>;
}
