//! Local RPC surface: `report.*`, `case.*` and `status`.
//!
//! A failed submission is a normal `report.submit` result with
//! `success: false`; RPC errors are reserved for malformed requests and
//! node-side faults.

use std::sync::Arc;

use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tiplock_core::{CaseStatus, ReporterCategory, SubmissionId};
use tiplock_crypto::Address;
use tiplock_ingest::{Attachment, ReportSubmitter, StagedFile, SubmitError};
use tiplock_ipc::{codes, HandlerResult, IpcHandler, RpcError};
use tiplock_review::{CaseFilter, ReviewError, ReviewWorkflow};
use tracing::{debug, error};

/// No case with the requested id.
pub const CASE_NOT_FOUND: i32 = -32001;
/// The case is not in a state that allows the requested action.
pub const CASE_INVALID_TRANSITION: i32 = -32002;

fn parse<T: DeserializeOwned>(params: Option<Value>) -> Result<T, RpcError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| RpcError::invalid_params(e.to_string()))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::new(codes::INTERNAL_ERROR, e.to_string()))
}

fn review_error(err: ReviewError) -> RpcError {
    match &err {
        ReviewError::NotFound(_) => RpcError::new(CASE_NOT_FOUND, err.to_string()),
        ReviewError::InvalidTransition { .. } => {
            RpcError::new(CASE_INVALID_TRANSITION, err.to_string())
        }
        ReviewError::InvalidId(_) => RpcError::invalid_params(err.to_string()),
        _ => {
            error!(error = %err, "case store failure");
            RpcError::server(err.to_string())
        }
    }
}

// -- report.* --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitParams {
    #[serde(default)]
    text: String,
    attachment: Option<AttachmentParams>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentParams {
    /// Base64 (standard alphabet, padded).
    data: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    mime_type: String,
}

pub struct ReportHandler {
    submitter: Arc<ReportSubmitter>,
}

impl ReportHandler {
    pub fn new(submitter: Arc<ReportSubmitter>) -> Self {
        Self { submitter }
    }

    async fn submit(&self, params: Option<Value>) -> Result<Value, RpcError> {
        let params: SubmitParams = parse(params)?;

        let attachment = match params.attachment {
            Some(a) => match self.stage(a).await? {
                Ok(attachment) => Some(attachment),
                Err(rejected) => return to_value(&rejected.to_response()),
            },
            None => None,
        };

        let outcome = self.submitter.submit(&params.text, attachment).await;
        to_value(&tiplock_ingest::response_for(&outcome))
    }

    /// Decode and stage an attachment. The inner error is a submission
    /// failure to report back; the outer one a node fault.
    async fn stage(
        &self,
        params: AttachmentParams,
    ) -> Result<Result<Attachment, SubmitError>, RpcError> {
        let bytes = match base64::engine::general_purpose::STANDARD.decode(params.data.trim()) {
            Ok(bytes) => bytes,
            Err(e) => {
                return Ok(Err(SubmitError::Validation(format!(
                    "attachment is not valid base64: {e}"
                ))))
            }
        };
        let limit = self.submitter.config().max_attachment_bytes;
        if bytes.len() > limit {
            return Ok(Err(SubmitError::Validation(format!(
                "attachment is {} bytes, limit is {limit}",
                bytes.len()
            ))));
        }
        if params.filename.trim().is_empty() {
            return Ok(Err(SubmitError::Validation(
                "attachment filename must not be empty".to_string(),
            )));
        }

        let staging_dir = &self.submitter.config().staging_dir;
        let file = StagedFile::create(staging_dir, &params.filename, &bytes)
            .await
            .map_err(|e| {
                error!(dir = %staging_dir.display(), error = %e, "failed to stage attachment");
                RpcError::server(format!("failed to stage attachment: {e}"))
            })?;
        debug!(path = %file.path().display(), "attachment staged for submission");
        Ok(Ok(Attachment::staged(file, &params.filename, &params.mime_type)))
    }
}

impl IpcHandler for ReportHandler {
    fn handle(&self, method: &str, params: Option<Value>) -> HandlerResult<'_> {
        let method = method.to_string();
        Box::pin(async move {
            match method.as_str() {
                "submit" => self.submit(params).await,
                other => Err(RpcError::method_not_found(&format!("report.{other}"))),
            }
        })
    }
}

// -- case.* --

#[derive(Debug, Deserialize)]
struct IdParams {
    id: SubmissionId,
}

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    status: Option<CaseStatus>,
    blacklisted: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmParams {
    id: SubmissionId,
    reward_amount: u64,
}

#[derive(Debug, Deserialize)]
struct BlacklistParams {
    id: SubmissionId,
    #[serde(default = "default_true")]
    blacklisted: bool,
}

#[derive(Debug, Deserialize)]
struct CategorizeParams {
    id: SubmissionId,
    category: ReporterCategory,
}

fn default_true() -> bool {
    true
}

pub struct CaseHandler {
    workflow: Arc<ReviewWorkflow>,
}

impl CaseHandler {
    pub fn new(workflow: Arc<ReviewWorkflow>) -> Self {
        Self { workflow }
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        let case = match method {
            "get" => {
                let p: IdParams = parse(params)?;
                self.workflow.get(&p.id).await
            }
            "list" => {
                let p: ListParams = match params {
                    Some(Value::Null) | None => ListParams::default(),
                    params => parse(params)?,
                };
                let filter = CaseFilter {
                    status: p.status,
                    blacklisted: p.blacklisted,
                };
                let cases = self.workflow.list(filter).await.map_err(review_error)?;
                return to_value(&cases);
            }
            "confirm" => {
                let p: ConfirmParams = parse(params)?;
                self.workflow.confirm(&p.id, p.reward_amount).await
            }
            "reject" => {
                let p: IdParams = parse(params)?;
                self.workflow.reject(&p.id).await
            }
            "blacklist" => {
                let p: BlacklistParams = parse(params)?;
                self.workflow.set_blacklisted(&p.id, p.blacklisted).await
            }
            "categorize" => {
                let p: CategorizeParams = parse(params)?;
                self.workflow.set_category(&p.id, p.category).await
            }
            other => return Err(RpcError::method_not_found(&format!("case.{other}"))),
        };
        to_value(&case.map_err(review_error)?)
    }
}

impl IpcHandler for CaseHandler {
    fn handle(&self, method: &str, params: Option<Value>) -> HandlerResult<'_> {
        let method = method.to_string();
        Box::pin(async move { self.dispatch(&method, params).await })
    }
}

// -- status --

/// Answers un-namespaced methods.
pub struct StatusHandler {
    address: Address,
    dry_run: bool,
}

impl StatusHandler {
    pub fn new(address: Address, dry_run: bool) -> Self {
        Self { address, dry_run }
    }
}

impl IpcHandler for StatusHandler {
    fn handle(&self, method: &str, _params: Option<Value>) -> HandlerResult<'_> {
        let result = match method {
            "status" => Ok(json!({
                "version": env!("CARGO_PKG_VERSION"),
                "address": self.address.to_checksum(),
                "dryRun": self.dry_run,
            })),
            other => Err(RpcError::method_not_found(other)),
        };
        Box::pin(async move { result })
    }
}
