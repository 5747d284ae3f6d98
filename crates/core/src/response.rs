//! Wire shape returned by the ingestion entry point.

use serde::{Deserialize, Serialize};

use crate::{ErrorKind, SubmissionId};

/// `{success: true, submissionId, evidenceUrl?}` or
/// `{success: false, errorKind, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<SubmissionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Set on ledger failures where the transaction may still have committed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub outcome_unknown: bool,
}

impl SubmissionResponse {
    pub fn committed(submission_id: SubmissionId, evidence_url: Option<String>) -> Self {
        Self {
            success: true,
            submission_id: Some(submission_id),
            evidence_url,
            error_kind: None,
            message: None,
            outcome_unknown: false,
        }
    }

    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            submission_id: None,
            evidence_url: None,
            error_kind: Some(kind),
            message: Some(message.into()),
            outcome_unknown: false,
        }
    }

    pub fn with_outcome_unknown(mut self, unknown: bool) -> Self {
        self.outcome_unknown = unknown;
        self
    }
}
