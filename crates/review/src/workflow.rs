//! Case state machine: pending → confirmed | rejected.
//!
//! The blacklist flag and the reporter category can change in any state.
//! Mutations run one at a time so two reviewers cannot both act on the same
//! pending case.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tiplock_core::{Case, CaseStatus, Report, ReporterCategory, RewardType, SubmissionId};
use tokio::sync::Mutex;
use tracing::info;

use crate::{CaseFilter, CaseRecorder, CaseStore, Result, ReviewError};

pub struct ReviewWorkflow {
    store: Arc<dyn CaseStore>,
    write_lock: Mutex<()>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl ReviewWorkflow {
    pub fn new(store: Arc<dyn CaseStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Open a pending case for a recorded report.
    pub async fn open(&self, report: Report) -> Result<Case> {
        let case = Case::pending(report, now_secs())?;
        let _guard = self.write_lock.lock().await;
        self.store.insert(case.clone()).await?;
        info!(case = %case.id, "case opened");
        Ok(case)
    }

    pub async fn get(&self, id: &SubmissionId) -> Result<Case> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| ReviewError::NotFound(id.clone()))
    }

    /// Confirm a pending case and record the reward granted to the reporter.
    pub async fn confirm(&self, id: &SubmissionId, reward_amount: u64) -> Result<Case> {
        self.transition(id, "confirm", |case| {
            case.status = CaseStatus::Confirmed;
            case.reward_type = Some(RewardType::Positive);
            case.reward_amount = Some(reward_amount);
        })
        .await
    }

    /// Reject a pending case. The reporter gets a negative, zero-amount reward.
    pub async fn reject(&self, id: &SubmissionId) -> Result<Case> {
        self.transition(id, "reject", |case| {
            case.status = CaseStatus::Rejected;
            case.reward_type = Some(RewardType::Negative);
            case.reward_amount = Some(0);
        })
        .await
    }

    pub async fn set_blacklisted(&self, id: &SubmissionId, blacklisted: bool) -> Result<Case> {
        let case = self
            .update(id, |case| case.is_blacklisted = blacklisted)
            .await?;
        info!(case = %id, blacklisted, "blacklist flag set");
        Ok(case)
    }

    pub async fn set_category(&self, id: &SubmissionId, category: ReporterCategory) -> Result<Case> {
        self.update(id, |case| case.category = Some(category)).await
    }

    pub async fn list(&self, filter: CaseFilter) -> Result<Vec<Case>> {
        self.store.list(filter).await
    }

    pub async fn by_status(&self, status: CaseStatus) -> Result<Vec<Case>> {
        self.list(CaseFilter::status(status)).await
    }

    pub async fn blacklisted(&self) -> Result<Vec<Case>> {
        self.list(CaseFilter::blacklisted()).await
    }

    async fn transition(
        &self,
        id: &SubmissionId,
        action: &'static str,
        apply: impl FnOnce(&mut Case),
    ) -> Result<Case> {
        let _guard = self.write_lock.lock().await;
        let mut case = self.get(id).await?;
        if case.status != CaseStatus::Pending {
            return Err(ReviewError::InvalidTransition {
                id: id.clone(),
                from: case.status,
                action,
            });
        }
        apply(&mut case);
        self.store.put(case.clone()).await?;
        info!(case = %id, status = %case.status, reward = ?case.reward_amount, "case reviewed");
        Ok(case)
    }

    async fn update(&self, id: &SubmissionId, apply: impl FnOnce(&mut Case)) -> Result<Case> {
        let _guard = self.write_lock.lock().await;
        let mut case = self.get(id).await?;
        apply(&mut case);
        self.store.put(case.clone()).await?;
        Ok(case)
    }
}

#[async_trait::async_trait]
impl CaseRecorder for ReviewWorkflow {
    async fn open_case(&self, report: &Report) -> Result<Case> {
        self.open(report.clone()).await
    }
}
