//! The ingestion pipeline.
//!
//! `Received → Uploading (only with an attachment) → Recording → Committed`.
//! Any step can end the submission; nothing is retried and no step runs
//! twice. The ledger is never called unless a required upload succeeded.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tiplock_core::{ErrorKind, EvidenceLocator, Report, SubmissionId, SubmissionResponse};
use tiplock_evidence::{EvidenceStore, StoreError};
use tiplock_ledger::{LedgerClient, LedgerError};
use tiplock_review::CaseRecorder;
use tracing::{debug, info, warn};

use crate::attachment::{Attachment, AttachmentSource};
use crate::notify::{NoopNotifier, SubmissionEvent, SubmissionNotifier};

/// Default attachment ceiling (10 MiB).
pub const DEFAULT_MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Where incoming attachments are written before upload.
    pub staging_dir: PathBuf,
    pub max_attachment_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            staging_dir: std::env::temp_dir().join("tiplock-staging"),
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
        }
    }
}

#[derive(Error, Debug)]
pub enum SubmitError {
    /// Bad input. Nothing was touched.
    #[error("invalid submission: {0}")]
    Validation(String),
    /// The evidence store failed. The ledger was not called.
    #[error("evidence upload failed: {0}")]
    Upload(#[from] StoreError),
    /// The ledger call failed. Evidence uploaded before it stays in the
    /// store, unreferenced.
    #[error("ledger write failed: {source}")]
    Ledger {
        #[source]
        source: LedgerError,
        orphaned_evidence: Option<EvidenceLocator>,
    },
}

impl SubmitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SubmitError::Validation(_) => ErrorKind::Validation,
            SubmitError::Upload(_) => ErrorKind::Upload,
            SubmitError::Ledger { .. } => ErrorKind::Ledger,
        }
    }

    /// Whether the report may be on the ledger despite the error.
    pub fn may_have_committed(&self) -> bool {
        match self {
            SubmitError::Ledger { source, .. } => source.may_have_committed(),
            _ => false,
        }
    }

    pub fn to_response(&self) -> SubmissionResponse {
        let message = match self {
            SubmitError::Ledger {
                orphaned_evidence: Some(locator),
                ..
            } => format!("{self}; uploaded evidence left unreferenced at {}", locator.url()),
            _ => self.to_string(),
        };
        SubmissionResponse::failed(self.kind(), message).with_outcome_unknown(self.may_have_committed())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionResult {
    pub submission_id: SubmissionId,
    pub evidence: Option<EvidenceLocator>,
    /// Set when a case recorder is attached and opened the case.
    pub case_id: Option<SubmissionId>,
}

impl SubmissionResult {
    pub fn evidence_url(&self) -> Option<&str> {
        self.evidence.as_ref().map(EvidenceLocator::url)
    }

    pub fn to_response(&self) -> SubmissionResponse {
        SubmissionResponse::committed(
            self.submission_id.clone(),
            self.evidence_url().map(str::to_string),
        )
    }
}

/// Wire response for either outcome.
pub fn response_for(outcome: &Result<SubmissionResult, SubmitError>) -> SubmissionResponse {
    match outcome {
        Ok(result) => result.to_response(),
        Err(err) => err.to_response(),
    }
}

/// Validated attachment contents.
struct Payload {
    bytes: Vec<u8>,
    filename: String,
    mime_type: String,
}

pub struct ReportSubmitter {
    store: Arc<dyn EvidenceStore>,
    ledger: Arc<dyn LedgerClient>,
    notifier: Arc<dyn SubmissionNotifier>,
    recorder: Option<Arc<dyn CaseRecorder>>,
    config: IngestConfig,
}

impl ReportSubmitter {
    pub fn new(
        store: Arc<dyn EvidenceStore>,
        ledger: Arc<dyn LedgerClient>,
        config: IngestConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            notifier: Arc::new(NoopNotifier),
            recorder: None,
            config,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn SubmissionNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_case_recorder(mut self, recorder: Arc<dyn CaseRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Run one submission to a terminal state.
    ///
    /// A staged attachment is owned by this call and its file is removed
    /// before it returns, whatever the outcome.
    pub async fn submit(
        &self,
        text: &str,
        attachment: Option<Attachment>,
    ) -> Result<SubmissionResult, SubmitError> {
        let outcome = self.run(text, attachment.as_ref()).await;
        drop(attachment);

        match &outcome {
            Ok(result) => info!(
                submission_id = %result.submission_id,
                evidence = ?result.evidence_url(),
                "report committed"
            ),
            Err(err) => warn!(
                kind = err.kind().as_str(),
                outcome_unknown = err.may_have_committed(),
                error = %err,
                "report submission failed"
            ),
        }
        outcome
    }

    async fn run(
        &self,
        text: &str,
        attachment: Option<&Attachment>,
    ) -> Result<SubmissionResult, SubmitError> {
        if text.trim().is_empty() {
            return Err(SubmitError::Validation("text must not be empty".to_string()));
        }
        let payload = match attachment {
            Some(attachment) => Some(self.load(attachment).await?),
            None => None,
        };
        debug!(with_attachment = payload.is_some(), "submission received");

        let evidence = match &payload {
            Some(payload) => {
                debug!(filename = %payload.filename, size = payload.bytes.len(), "uploading evidence");
                let locator = self
                    .store
                    .store(&payload.bytes, &payload.filename, &payload.mime_type)
                    .await?;
                debug!(url = %locator.url(), "evidence uploaded");
                Some(locator)
            }
            None => None,
        };

        debug!("recording report on ledger");
        let submission_id = self
            .ledger
            .record_report(text, evidence.as_ref().map(EvidenceLocator::url))
            .await
            .map_err(|source| SubmitError::Ledger {
                source,
                orphaned_evidence: evidence.clone(),
            })?;

        let mut report = Report::new(text);
        if let Some(locator) = &evidence {
            report = report.with_evidence(locator.clone());
        }
        let report = report.recorded(submission_id.clone());

        self.notifier.notify(SubmissionEvent::Committed {
            submission_id: submission_id.to_string(),
            evidence_url: report.evidence_url().map(str::to_string),
        });

        // The report is already on the ledger: a case failure is logged, never
        // returned.
        let case_id = match &self.recorder {
            Some(recorder) => match recorder.open_case(&report).await {
                Ok(case) => Some(case.id),
                Err(e) => {
                    warn!(submission_id = %submission_id, error = %e, "failed to open review case");
                    None
                }
            },
            None => None,
        };

        Ok(SubmissionResult {
            submission_id,
            evidence,
            case_id,
        })
    }

    async fn load(&self, attachment: &Attachment) -> Result<Payload, SubmitError> {
        if attachment.filename.trim().is_empty() {
            return Err(SubmitError::Validation(
                "attachment filename must not be empty".to_string(),
            ));
        }

        let bytes = match &attachment.source {
            AttachmentSource::Bytes(bytes) => bytes.clone(),
            AttachmentSource::Staged(file) => {
                let size = tokio::fs::metadata(file.path())
                    .await
                    .map_err(|e| SubmitError::Validation(format!("attachment is not readable: {e}")))?
                    .len();
                self.check_file_size(size)?;
                tokio::fs::read(file.path())
                    .await
                    .map_err(|e| SubmitError::Validation(format!("attachment is not readable: {e}")))?
            }
        };
        self.check_size(bytes.len())?;
        if bytes.is_empty() {
            return Err(SubmitError::Validation("attachment is empty".to_string()));
        }

        let mime_type = match attachment.mime_type.trim() {
            "" => DEFAULT_MIME_TYPE.to_string(),
            mime => mime.to_string(),
        };
        Ok(Payload {
            bytes,
            filename: attachment.filename.clone(),
            mime_type,
        })
    }

    /// A file too large to address in memory is over any limit.
    fn check_file_size(&self, size: u64) -> Result<(), SubmitError> {
        match usize::try_from(size) {
            Ok(size) => self.check_size(size),
            Err(_) => Err(SubmitError::Validation(format!(
                "attachment is {size} bytes, limit is {}",
                self.config.max_attachment_bytes
            ))),
        }
    }

    fn check_size(&self, size: usize) -> Result<(), SubmitError> {
        if size > self.config.max_attachment_bytes {
            return Err(SubmitError::Validation(format!(
                "attachment is {size} bytes, limit is {}",
                self.config.max_attachment_bytes
            )));
        }
        Ok(())
    }
}
