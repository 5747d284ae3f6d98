//! One pretty-printed JSON document per case under a directory.

use std::path::{Path, PathBuf};

use tiplock_core::{Case, SubmissionId};
use tokio::fs;
use tracing::{debug, warn};

use crate::{sort_newest_first, CaseFilter, CaseStore, Result, ReviewError};

const EXTENSION: &str = "json";

pub struct FileCaseStore {
    dir: PathBuf,
}

impl FileCaseStore {
    /// Open (and create if needed) the case directory.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| ReviewError::Storage(format!("create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &SubmissionId) -> Result<PathBuf> {
        let raw = id.as_str();
        let valid = !raw.is_empty()
            && raw.len() <= 128
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(ReviewError::InvalidId(raw.to_string()));
        }
        Ok(self.dir.join(format!("{raw}.{EXTENSION}")))
    }

    async fn read(path: &Path) -> Result<Case> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| ReviewError::Storage(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&content).map_err(|e| ReviewError::Corrupt {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }

    /// Write to a sibling temp file, then rename over the target.
    async fn write(path: &Path, case: &Case) -> Result<()> {
        let content = serde_json::to_string_pretty(case)
            .map_err(|e| ReviewError::Storage(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .await
            .map_err(|e| ReviewError::Storage(format!("write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| ReviewError::Storage(format!("rename {}: {e}", path.display())))?;
        debug!(case = %case.id, path = %path.display(), "case written");
        Ok(())
    }
}

#[async_trait::async_trait]
impl CaseStore for FileCaseStore {
    async fn insert(&self, case: Case) -> Result<()> {
        let path = self.path_for(&case.id)?;
        if fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ReviewError::AlreadyExists(case.id));
        }
        Self::write(&path, &case).await
    }

    async fn get(&self, id: &SubmissionId) -> Result<Option<Case>> {
        let path = self.path_for(id)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        Self::read(&path).await.map(Some)
    }

    async fn put(&self, case: Case) -> Result<()> {
        let path = self.path_for(&case.id)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ReviewError::NotFound(case.id));
        }
        Self::write(&path, &case).await
    }

    async fn list(&self, filter: CaseFilter) -> Result<Vec<Case>> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| ReviewError::Storage(format!("list {}: {e}", self.dir.display())))?;

        let mut cases = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ReviewError::Storage(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            match Self::read(&path).await {
                Ok(case) if filter.matches(&case) => cases.push(case),
                Ok(_) => {}
                // One bad file should not hide every other case.
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable case"),
            }
        }
        sort_newest_first(&mut cases);
        Ok(cases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiplock_core::{CaseStatus, EvidenceLocator, Report};

    fn case(id: &str, created_at: u64) -> Case {
        let report = Report::new("theft at 5th ave")
            .with_evidence(EvidenceLocator::new("QmHash", "https://gw.example"))
            .recorded(SubmissionId::new(id));
        Case::pending(report, created_at).unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCaseStore::open(dir.path().join("cases")).await.unwrap();

        store.insert(case("0xaa", 1)).await.unwrap();
        let loaded = store.get(&SubmissionId::new("0xaa")).await.unwrap().unwrap();
        assert_eq!(loaded, case("0xaa", 1));
        assert!(dir.path().join("cases").join("0xaa.json").exists());

        // A fresh handle sees the same data.
        let reopened = FileCaseStore::open(dir.path().join("cases")).await.unwrap();
        assert!(reopened.get(&SubmissionId::new("0xaa")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_insert_twice_and_put_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCaseStore::open(dir.path()).await.unwrap();

        store.insert(case("0xbb", 1)).await.unwrap();
        assert!(matches!(
            store.insert(case("0xbb", 2)).await,
            Err(ReviewError::AlreadyExists(_))
        ));
        assert!(matches!(
            store.put(case("0xcc", 1)).await,
            Err(ReviewError::NotFound(_))
        ));
        assert!(store.get(&SubmissionId::new("0xcc")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_filters_and_skips_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCaseStore::open(dir.path()).await.unwrap();

        store.insert(case("0x01", 10)).await.unwrap();
        let mut confirmed = case("0x02", 20);
        confirmed.status = CaseStatus::Confirmed;
        confirmed.is_blacklisted = true;
        store.insert(confirmed).await.unwrap();
        std::fs::write(dir.path().join("0x03.json"), "{ broken").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let all = store.list(CaseFilter::default()).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["0x02", "0x01"]);

        let pending = store.list(CaseFilter::status(CaseStatus::Pending)).await.unwrap();
        assert_eq!(pending.len(), 1);
        let banned = store.list(CaseFilter::blacklisted()).await.unwrap();
        assert_eq!(banned[0].id.as_str(), "0x02");
    }

    #[tokio::test]
    async fn test_path_traversal_ids_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCaseStore::open(dir.path()).await.unwrap();
        let result = store.get(&SubmissionId::new("../escape")).await;
        assert!(matches!(result, Err(ReviewError::InvalidId(_))));
    }
}
