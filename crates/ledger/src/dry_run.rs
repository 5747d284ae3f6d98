//! In-memory ledger that records every call.
//!
//! Issues `dryrun_<uuid>` ids, so two identical reports still get two ids,
//! also across restarts of the process.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tiplock_core::SubmissionId;
use tracing::info;
use uuid::Uuid;

use crate::{LedgerClient, LedgerError};

/// Fixed gas price reported by the dry-run ledger (30 gwei).
const DRY_RUN_GAS_PRICE: u128 = 30_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub text: String,
    pub evidence_url: Option<String>,
}

/// Failure to inject into subsequent `record_report` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DryRunFailure {
    Rejected,
    Reverted,
    Unconfirmed,
}

pub struct DryRunLedger {
    calls: Mutex<Vec<RecordedCall>>,
    attempts: AtomicUsize,
    fee_reads: AtomicUsize,
    failure: Mutex<Option<DryRunFailure>>,
}

impl DryRunLedger {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            fee_reads: AtomicUsize::new(0),
            failure: Mutex::new(None),
        }
    }

    /// Make subsequent calls fail with `failure`, or succeed again with `None`.
    pub fn fail_with(&self, failure: Option<DryRunFailure>) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = failure;
    }

    /// Successfully recorded calls, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of `record_report` calls, successful or not.
    pub fn call_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn fee_read_count(&self) -> usize {
        self.fee_reads.load(Ordering::SeqCst)
    }
}

impl Default for DryRunLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LedgerClient for DryRunLedger {
    async fn gas_price(&self) -> Result<u128, LedgerError> {
        self.fee_reads.fetch_add(1, Ordering::SeqCst);
        Ok(DRY_RUN_GAS_PRICE)
    }

    async fn record_report(
        &self,
        text: &str,
        evidence_url: Option<&str>,
    ) -> Result<SubmissionId, LedgerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.gas_price().await?;

        let failure = *self.failure.lock().unwrap_or_else(|e| e.into_inner());
        let tx_hash = format!("dryrun_{}", Uuid::new_v4().simple());
        match failure {
            Some(DryRunFailure::Rejected) => {
                return Err(LedgerError::Rejected("dry-run rejection".to_string()))
            }
            Some(DryRunFailure::Reverted) => return Err(LedgerError::Reverted { tx_hash }),
            Some(DryRunFailure::Unconfirmed) => {
                return Err(LedgerError::Unconfirmed {
                    tx_hash,
                    waited_secs: 0,
                })
            }
            None => {}
        }

        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                text: text.to_string(),
                evidence_url: evidence_url.map(str::to_string),
            });
        info!(id = %tx_hash, with_evidence = evidence_url.is_some(), "dry-run: recorded report");
        Ok(SubmissionId::new(tx_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_calls_with_distinct_ids() {
        let ledger = DryRunLedger::new();
        let a = ledger.record_report("same", None).await.unwrap();
        let b = ledger.record_report("same", None).await.unwrap();

        assert_ne!(a, b);
        assert!(a.as_str().starts_with("dryrun_"));
        assert_eq!(ledger.call_count(), 2);
        assert_eq!(ledger.fee_read_count(), 2);
        assert_eq!(ledger.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_fresh_ledger_does_not_reuse_ids() {
        let first = DryRunLedger::new().record_report("a", None).await.unwrap();
        let second = DryRunLedger::new().record_report("a", None).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_evidence_url_is_recorded() {
        let ledger = DryRunLedger::new();
        ledger
            .record_report("theft", Some("https://gw/ipfs/Qm1"))
            .await
            .unwrap();
        assert_eq!(
            ledger.calls()[0],
            RecordedCall {
                text: "theft".into(),
                evidence_url: Some("https://gw/ipfs/Qm1".into()),
            }
        );
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let ledger = DryRunLedger::new();

        ledger.fail_with(Some(DryRunFailure::Rejected));
        assert!(matches!(
            ledger.record_report("x", None).await,
            Err(LedgerError::Rejected(_))
        ));

        ledger.fail_with(Some(DryRunFailure::Unconfirmed));
        let err = ledger.record_report("x", None).await.unwrap_err();
        assert!(err.may_have_committed());

        ledger.fail_with(None);
        assert!(ledger.record_report("x", None).await.is_ok());

        assert_eq!(ledger.call_count(), 3);
        assert_eq!(ledger.calls().len(), 1);
    }
}
