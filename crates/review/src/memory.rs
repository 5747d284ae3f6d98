use std::collections::HashMap;
use std::sync::Mutex;

use tiplock_core::{Case, SubmissionId};

use crate::{sort_newest_first, CaseFilter, CaseStore, Result, ReviewError};

/// Case store held in process memory.
#[derive(Default)]
pub struct MemoryCaseStore {
    cases: Mutex<HashMap<SubmissionId, Case>>,
}

impl MemoryCaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SubmissionId, Case>> {
        self.cases.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl CaseStore for MemoryCaseStore {
    async fn insert(&self, case: Case) -> Result<()> {
        let mut cases = self.lock();
        if cases.contains_key(&case.id) {
            return Err(ReviewError::AlreadyExists(case.id));
        }
        cases.insert(case.id.clone(), case);
        Ok(())
    }

    async fn get(&self, id: &SubmissionId) -> Result<Option<Case>> {
        Ok(self.lock().get(id).cloned())
    }

    async fn put(&self, case: Case) -> Result<()> {
        let mut cases = self.lock();
        match cases.get_mut(&case.id) {
            Some(slot) => {
                *slot = case;
                Ok(())
            }
            None => Err(ReviewError::NotFound(case.id)),
        }
    }

    async fn list(&self, filter: CaseFilter) -> Result<Vec<Case>> {
        let mut cases: Vec<Case> = self
            .lock()
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        sort_newest_first(&mut cases);
        Ok(cases)
    }
}
