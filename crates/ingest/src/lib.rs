//! Tiplock Ingest
//!
//! Takes a report's text and optional attachment, stores the attachment as
//! evidence, then records the report on the ledger. See
//! [`ReportSubmitter::submit`].

pub mod attachment;
pub mod notify;
pub mod submitter;

pub use attachment::{Attachment, AttachmentSource, StagedFile};
pub use notify::{BroadcastNotifier, NoopNotifier, SubmissionEvent, SubmissionNotifier};
pub use submitter::{
    response_for, IngestConfig, ReportSubmitter, SubmissionResult, SubmitError,
    DEFAULT_MAX_ATTACHMENT_BYTES,
};
