//! Tiplock Review
//!
//! The administrative side of a report: a [`Case`] opened when the ledger
//! acknowledges the report, then confirmed or rejected by a reviewer and
//! optionally blacklisted. Cases are never deleted.

pub mod file;
pub mod memory;
pub mod workflow;

pub use file::FileCaseStore;
pub use memory::MemoryCaseStore;
pub use workflow::ReviewWorkflow;

use thiserror::Error;
use tiplock_core::{Case, CaseStatus, CoreError, Report, SubmissionId};

#[derive(Error, Debug)]
pub enum ReviewError {
    #[error("case not found: {0}")]
    NotFound(SubmissionId),
    #[error("case already exists: {0}")]
    AlreadyExists(SubmissionId),
    #[error("cannot {action} case {id}: it is {from}")]
    InvalidTransition {
        id: SubmissionId,
        from: CaseStatus,
        action: &'static str,
    },
    #[error("case id not usable as a storage key: {0}")]
    InvalidId(String),
    #[error("case storage error: {0}")]
    Storage(String),
    #[error("corrupt case file {path}: {error}")]
    Corrupt { path: String, error: String },
    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type Result<T> = std::result::Result<T, ReviewError>;

/// Selects cases by status and/or blacklist flag. Empty matches all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaseFilter {
    pub status: Option<CaseStatus>,
    pub blacklisted: Option<bool>,
}

impl CaseFilter {
    pub fn status(status: CaseStatus) -> Self {
        Self {
            status: Some(status),
            blacklisted: None,
        }
    }

    pub fn blacklisted() -> Self {
        Self {
            status: None,
            blacklisted: Some(true),
        }
    }

    pub fn matches(&self, case: &Case) -> bool {
        self.status.map_or(true, |s| case.status == s)
            && self.blacklisted.map_or(true, |b| case.is_blacklisted == b)
    }
}

/// Persistence for cases.
#[async_trait::async_trait]
pub trait CaseStore: Send + Sync {
    /// Add a new case. Fails with `AlreadyExists` if the id is taken.
    async fn insert(&self, case: Case) -> Result<()>;

    async fn get(&self, id: &SubmissionId) -> Result<Option<Case>>;

    /// Replace an existing case. Fails with `NotFound` if there is none.
    async fn put(&self, case: Case) -> Result<()>;

    /// Matching cases, newest first.
    async fn list(&self, filter: CaseFilter) -> Result<Vec<Case>>;
}

/// Opens the pending case for a report the ledger just acknowledged.
#[async_trait::async_trait]
pub trait CaseRecorder: Send + Sync {
    async fn open_case(&self, report: &Report) -> Result<Case>;
}

/// Newest first, ties broken by id so listings are stable.
pub(crate) fn sort_newest_first(cases: &mut [Case]) {
    cases.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}
