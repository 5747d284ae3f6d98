use std::path::PathBuf;
use std::sync::Arc;

use tiplock_core::{Case, CaseStatus, ErrorKind, Report};
use tiplock_evidence::{MemoryEvidenceStore, SequenceTokenSource};
use tiplock_ingest::*;
use tiplock_ledger::{DryRunFailure, DryRunLedger};
use tiplock_review::{CaseRecorder, FileCaseStore, MemoryCaseStore, ReviewError, ReviewWorkflow};

const GATEWAY: &str = "https://gateway.test";
const PHOTO: &[u8] = b"\xff\xd8\xff\xe0 not really a jpeg";

struct Harness {
    store: Arc<MemoryEvidenceStore>,
    ledger: Arc<DryRunLedger>,
    submitter: ReportSubmitter,
    staging: tempfile::TempDir,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryEvidenceStore::new(
        GATEWAY,
        Arc::new(SequenceTokenSource::new("tok")),
    ));
    let ledger = Arc::new(DryRunLedger::new());
    let staging = tempfile::tempdir().unwrap();
    let config = IngestConfig {
        staging_dir: staging.path().to_path_buf(),
        ..IngestConfig::default()
    };
    let submitter = ReportSubmitter::new(store.clone(), ledger.clone(), config);
    Harness {
        store,
        ledger,
        submitter,
        staging,
    }
}

async fn staged_photo(h: &Harness) -> (Attachment, PathBuf) {
    let file = StagedFile::create(h.staging.path(), "photo.jpg", PHOTO)
        .await
        .unwrap();
    let path = file.path().to_path_buf();
    assert!(path.exists());
    (Attachment::staged(file, "photo.jpg", "image/jpeg"), path)
}

fn staging_is_empty(h: &Harness) -> bool {
    std::fs::read_dir(h.staging.path()).unwrap().next().is_none()
}

// -- call counts --

#[tokio::test]
async fn text_only_calls_ledger_once_and_store_never() {
    let h = harness();
    let result = h.submitter.submit("noise complaint", None).await.unwrap();

    assert_eq!(h.ledger.call_count(), 1);
    assert_eq!(h.store.call_count(), 0);
    assert!(result.evidence.is_none());
    assert_eq!(h.ledger.calls()[0].evidence_url, None);
}

#[tokio::test]
async fn attachment_calls_store_once_and_ledger_gets_that_url() {
    let h = harness();
    let attachment = Attachment::from_bytes(PHOTO.to_vec(), "photo.jpg", "image/jpeg");
    let result = h.submitter.submit("theft at 5th ave", Some(attachment)).await.unwrap();

    assert_eq!(h.store.call_count(), 1);
    assert_eq!(h.ledger.call_count(), 1);

    let url = result.evidence_url().unwrap();
    assert_eq!(h.ledger.calls()[0].evidence_url.as_deref(), Some(url));
    let blob = h.store.resolve(url).unwrap();
    assert_eq!(blob.bytes, PHOTO);
    assert_eq!(blob.name, "photo_tok-0.jpg");
    assert_eq!(blob.mime_type, "image/jpeg");
}

#[tokio::test]
async fn each_submission_uses_its_own_upload_url() {
    let h = harness();
    let first = h
        .submitter
        .submit("a", Some(Attachment::from_bytes(b"one".to_vec(), "a.png", "image/png")))
        .await
        .unwrap();
    let second = h
        .submitter
        .submit("b", Some(Attachment::from_bytes(b"two".to_vec(), "b.png", "image/png")))
        .await
        .unwrap();

    let calls = h.ledger.calls();
    assert_eq!(calls[0].evidence_url.as_deref(), first.evidence_url());
    assert_eq!(calls[1].evidence_url.as_deref(), second.evidence_url());
    assert_ne!(first.evidence_url(), second.evidence_url());
}

// -- no idempotence --

#[tokio::test]
async fn identical_submissions_get_distinct_ids() {
    let h = harness();
    let a = h.submitter.submit("same text", None).await.unwrap();
    let b = h.submitter.submit("same text", None).await.unwrap();

    assert_ne!(a.submission_id, b.submission_id);
    assert_eq!(h.ledger.call_count(), 2);
}

#[tokio::test]
async fn concurrent_submissions_all_commit() {
    let h = Arc::new(harness());
    let mut handles = Vec::new();
    for i in 0..8 {
        let h = h.clone();
        handles.push(tokio::spawn(async move {
            h.submitter.submit(&format!("report {i}"), None).await
        }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().submission_id);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);
}

// -- scenarios --

#[tokio::test]
async fn healthy_backends_commit_with_gateway_url() {
    let h = harness();
    let (attachment, _) = staged_photo(&h).await;
    let result = h.submitter.submit("theft at 5th ave", Some(attachment)).await;

    let response = response_for(&result);
    assert!(response.success);
    assert!(!response.submission_id.unwrap().as_str().is_empty());
    let url = response.evidence_url.unwrap();
    let prefix = format!("{GATEWAY}/ipfs/");
    assert!(url.starts_with(&prefix));
    assert!(url.len() > prefix.len());
}

#[tokio::test]
async fn empty_text_is_validation_error_with_no_calls() {
    let h = harness();
    let result = h.submitter.submit("", None).await;

    let response = response_for(&result);
    assert!(!response.success);
    assert_eq!(response.error_kind, Some(ErrorKind::Validation));
    assert_eq!(h.store.call_count(), 0);
    assert_eq!(h.ledger.call_count(), 0);
}

#[tokio::test]
async fn attachment_without_filename_is_validation_error() {
    let h = harness();
    let attachment = Attachment::from_bytes(PHOTO.to_vec(), " ", "image/jpeg");
    let err = h.submitter.submit("x", Some(attachment)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(h.store.call_count(), 0);
    assert_eq!(h.ledger.call_count(), 0);
}

#[tokio::test]
async fn unreadable_staged_attachment_is_validation_error() {
    let h = harness();
    let missing = StagedFile::adopt(h.staging.path().join("never-written.jpg"));
    let attachment = Attachment::staged(missing, "photo.jpg", "image/jpeg");
    let err = h.submitter.submit("x", Some(attachment)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(h.store.call_count(), 0);
}

#[tokio::test]
async fn store_failure_is_upload_error_and_ledger_untouched() {
    let h = harness();
    h.store.set_failing(true);
    let attachment = Attachment::from_bytes(PHOTO.to_vec(), "photo.jpg", "image/jpeg");
    let result = h.submitter.submit("theft", Some(attachment)).await;

    let response = response_for(&result);
    assert!(!response.success);
    assert_eq!(response.error_kind, Some(ErrorKind::Upload));
    assert!(!response.outcome_unknown);
    assert_eq!(h.store.call_count(), 1);
    assert_eq!(h.ledger.call_count(), 0);
}

#[tokio::test]
async fn ledger_failure_leaves_uploaded_blob_retrievable() {
    let h = harness();
    h.ledger.fail_with(Some(DryRunFailure::Rejected));
    let attachment = Attachment::from_bytes(PHOTO.to_vec(), "photo.jpg", "image/jpeg");
    let err = h.submitter.submit("theft", Some(attachment)).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Ledger);
    assert!(!err.may_have_committed());
    let orphan = match &err {
        SubmitError::Ledger {
            orphaned_evidence: Some(locator),
            ..
        } => locator.clone(),
        other => panic!("expected ledger error with orphan, got {other:?}"),
    };
    assert_eq!(h.store.resolve(orphan.url()).unwrap().bytes, PHOTO);
    assert_eq!(h.store.call_count(), 1);
    assert_eq!(h.ledger.call_count(), 1);
}

#[tokio::test]
async fn confirmation_timeout_is_reported_as_unknown_outcome() {
    let h = harness();
    h.ledger.fail_with(Some(DryRunFailure::Unconfirmed));
    let result = h.submitter.submit("theft", None).await;

    let response = response_for(&result);
    assert_eq!(response.error_kind, Some(ErrorKind::Ledger));
    assert!(response.outcome_unknown);
    assert_eq!(h.ledger.call_count(), 1);
}

// -- staging cleanup --

#[tokio::test]
async fn staging_file_removed_after_success() {
    let h = harness();
    let (attachment, path) = staged_photo(&h).await;
    h.submitter.submit("theft", Some(attachment)).await.unwrap();
    assert!(!path.exists());
    assert!(staging_is_empty(&h));
}

#[tokio::test]
async fn staging_file_removed_after_validation_failure() {
    let h = harness();
    let (attachment, path) = staged_photo(&h).await;
    let err = h.submitter.submit("", Some(attachment)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(!path.exists());
    assert!(staging_is_empty(&h));
}

#[tokio::test]
async fn staging_file_removed_after_upload_failure() {
    let h = harness();
    h.store.set_failing(true);
    let (attachment, path) = staged_photo(&h).await;
    let err = h.submitter.submit("theft", Some(attachment)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Upload);
    assert!(!path.exists());
    assert!(staging_is_empty(&h));
}

#[tokio::test]
async fn staging_file_removed_after_ledger_failure() {
    let h = harness();
    h.ledger.fail_with(Some(DryRunFailure::Reverted));
    let (attachment, path) = staged_photo(&h).await;
    let err = h.submitter.submit("theft", Some(attachment)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Ledger);
    assert!(!path.exists());
    assert!(staging_is_empty(&h));
}

// -- after commit --

#[tokio::test]
async fn committed_report_opens_pending_case() {
    let h = harness();
    let workflow = Arc::new(ReviewWorkflow::new(Arc::new(MemoryCaseStore::new())));
    let submitter = ReportSubmitter::new(h.store.clone(), h.ledger.clone(), IngestConfig::default())
        .with_case_recorder(workflow.clone());

    let attachment = Attachment::from_bytes(PHOTO.to_vec(), "photo.jpg", "image/jpeg");
    let result = submitter.submit("dealer on the corner", Some(attachment)).await.unwrap();

    let case_id = result.case_id.clone().unwrap();
    assert_eq!(case_id, result.submission_id);
    let case = workflow.get(&case_id).await.unwrap();
    assert_eq!(case.status, CaseStatus::Pending);
    assert_eq!(case.report.evidence_url(), result.evidence_url());
    assert_eq!(case.report.text, "dealer on the corner");
}

#[tokio::test]
async fn restarted_dry_run_keeps_earlier_cases() {
    let h = harness();
    let cases_dir = tempfile::tempdir().unwrap();

    let mut results = Vec::new();
    for text in ["first run", "second run"] {
        // Fresh ledger and store handle per run, as after a process restart.
        let cases = Arc::new(FileCaseStore::open(cases_dir.path()).await.unwrap());
        let workflow = Arc::new(ReviewWorkflow::new(cases));
        let submitter =
            ReportSubmitter::new(h.store.clone(), Arc::new(DryRunLedger::new()), IngestConfig::default())
                .with_case_recorder(workflow);
        let result = submitter.submit(text, None).await.unwrap();
        assert!(result.case_id.is_some());
        results.push(result);
    }
    assert_ne!(results[0].submission_id, results[1].submission_id);

    let workflow = ReviewWorkflow::new(Arc::new(FileCaseStore::open(cases_dir.path()).await.unwrap()));
    let first = workflow.get(&results[0].submission_id).await.unwrap();
    let second = workflow.get(&results[1].submission_id).await.unwrap();
    assert_eq!(first.report.text, "first run");
    assert_eq!(second.report.text, "second run");
}

#[tokio::test]
async fn failed_submission_opens_no_case() {
    let h = harness();
    h.ledger.fail_with(Some(DryRunFailure::Rejected));
    let cases = Arc::new(MemoryCaseStore::new());
    let workflow = Arc::new(ReviewWorkflow::new(cases.clone()));
    let submitter = ReportSubmitter::new(h.store.clone(), h.ledger.clone(), IngestConfig::default())
        .with_case_recorder(workflow);

    assert!(submitter.submit("x", None).await.is_err());
    assert!(cases.is_empty());
}

struct BrokenRecorder;

#[async_trait::async_trait]
impl CaseRecorder for BrokenRecorder {
    async fn open_case(&self, _report: &Report) -> Result<Case, ReviewError> {
        Err(ReviewError::Storage("disk full".into()))
    }
}

#[tokio::test]
async fn case_failure_does_not_fail_committed_submission() {
    let h = harness();
    let submitter = ReportSubmitter::new(h.store.clone(), h.ledger.clone(), IngestConfig::default())
        .with_case_recorder(Arc::new(BrokenRecorder));

    let result = submitter.submit("x", None).await.unwrap();
    assert!(result.case_id.is_none());
    assert_eq!(h.ledger.call_count(), 1);
}

#[tokio::test]
async fn commit_is_announced_and_failure_is_not() {
    let h = harness();
    let notifier = Arc::new(BroadcastNotifier::new(8));
    let mut events = notifier.subscribe();
    let submitter = ReportSubmitter::new(h.store.clone(), h.ledger.clone(), IngestConfig::default())
        .with_notifier(notifier);

    let result = submitter.submit("x", None).await.unwrap();
    assert_eq!(
        events.recv().await.unwrap(),
        SubmissionEvent::Committed {
            submission_id: result.submission_id.to_string(),
            evidence_url: None,
        }
    );

    h.ledger.fail_with(Some(DryRunFailure::Rejected));
    assert!(submitter.submit("y", None).await.is_err());
    assert!(events.try_recv().is_err());
}
