//! Tiplock Core
//!
//! Types shared by every tiplock crate: the report moving through the
//! ingestion pipeline, the locator of its stored evidence, the ledger
//! acknowledgment, and the review case that wraps a recorded report.

pub mod response;

pub use response::SubmissionResponse;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Path segment between the gateway base and the content address.
const IPFS_PATH: &str = "/ipfs/";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CoreError {
    #[error("not an evidence url: {0}")]
    InvalidEvidenceUrl(String),
    #[error("report has no submission id")]
    UnrecordedReport,
    #[error("unknown case status: {0}")]
    UnknownStatus(String),
    #[error("unknown reporter category: {0}")]
    UnknownCategory(String),
}

/// Failure class reported to the caller of the ingestion pipeline.
///
/// The UI must show `Ledger` apart from the other two: only a ledger
/// failure can leave the write partially applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "ValidationError")]
    Validation,
    #[serde(rename = "UploadError")]
    Upload,
    #[serde(rename = "LedgerError")]
    Ledger,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "ValidationError",
            Self::Upload => "UploadError",
            Self::Ledger => "LedgerError",
        }
    }

    /// Whether resubmitting after this failure can never create a duplicate
    /// ledger entry.
    pub fn safe_to_resubmit(&self) -> bool {
        !matches!(self, Self::Ledger)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize a configured gateway into `scheme://host[/path]` without a
/// trailing slash. A bare host gets `https://`.
pub fn normalize_gateway_base(gateway: &str) -> String {
    let trimmed = gateway.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

/// Reference to an evidence blob in the content-addressed store.
///
/// Immutable once issued; `url` is always `<gateway>/ipfs/<content_address>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceLocator {
    content_address: String,
    url: String,
}

impl EvidenceLocator {
    pub fn new(content_address: &str, gateway_base: &str) -> Self {
        let base = normalize_gateway_base(gateway_base);
        Self {
            content_address: content_address.to_string(),
            url: format!("{base}{IPFS_PATH}{content_address}"),
        }
    }

    /// Recover a locator from a gateway URL.
    pub fn from_url(url: &str) -> Result<Self, CoreError> {
        let (_, address) = url
            .rsplit_once(IPFS_PATH)
            .ok_or_else(|| CoreError::InvalidEvidenceUrl(url.to_string()))?;
        if address.is_empty() || address.contains('/') {
            return Err(CoreError::InvalidEvidenceUrl(url.to_string()));
        }
        Ok(Self {
            content_address: address.to_string(),
            url: url.to_string(),
        })
    }

    pub fn content_address(&self) -> &str {
        &self.content_address
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Ledger acknowledgment of a committed report (the transaction hash on EVM
/// ledgers).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionId(String);

impl SubmissionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The unit moving through the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<EvidenceLocator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<SubmissionId>,
}

impl Report {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            evidence: None,
            submission_id: None,
        }
    }

    pub fn with_evidence(mut self, locator: EvidenceLocator) -> Self {
        self.evidence = Some(locator);
        self
    }

    /// Mark the report as committed to the ledger.
    pub fn recorded(mut self, id: SubmissionId) -> Self {
        self.submission_id = Some(id);
        self
    }

    pub fn is_recorded(&self) -> bool {
        self.submission_id.is_some()
    }

    pub fn evidence_url(&self) -> Option<&str> {
        self.evidence.as_ref().map(EvidenceLocator::url)
    }
}

/// Review state of a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaseStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "rejected" => Ok(Self::Rejected),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardType {
    Positive,
    Negative,
}

/// Who the reporter says the subject is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReporterCategory {
    Dealer,
    User,
}

impl FromStr for ReporterCategory {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dealer" => Ok(Self::Dealer),
            "user" => Ok(Self::User),
            other => Err(CoreError::UnknownCategory(other.to_string())),
        }
    }
}

/// Administrative record wrapping a recorded report during human review.
///
/// Keyed by the report's submission id. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Case {
    pub id: SubmissionId,
    pub report: Report,
    pub status: CaseStatus,
    pub is_blacklisted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward_amount: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward_type: Option<RewardType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ReporterCategory>,
    /// Unix seconds.
    pub created_at: u64,
}

impl Case {
    /// Open a pending case for a report the ledger has acknowledged.
    pub fn pending(report: Report, created_at: u64) -> Result<Self, CoreError> {
        let id = report
            .submission_id
            .clone()
            .ok_or(CoreError::UnrecordedReport)?;
        Ok(Self {
            id,
            report,
            status: CaseStatus::Pending,
            is_blacklisted: false,
            reward_amount: None,
            reward_type: None,
            category: None,
            created_at,
        })
    }
}
