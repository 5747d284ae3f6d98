//! Tiplock Evidence
//!
//! Uploads report attachments to a content-addressed object store and hands
//! back an [`EvidenceLocator`]. A locator is returned only after the backend
//! acknowledged the blob; any failure surfaces as a [`StoreError`] with no
//! partial result.
//!
//! Backends: [`PinataStore`] (IPFS pinning service over HTTPS) and
//! [`MemoryEvidenceStore`] (in-process, for tests and dry runs).

pub mod cid;
pub mod memory;
pub mod naming;
pub mod pinata;

pub use cid::cid_v0;
pub use memory::{MemoryEvidenceStore, StoredBlob};
pub use naming::{staged_name, SequenceTokenSource, TokenSource, UuidTokenSource};
pub use pinata::{PinataStore, StoreConfig};

use thiserror::Error;
use tiplock_core::EvidenceLocator;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("refusing to store an empty blob")]
    EmptyPayload,
    #[error("store misconfigured: {0}")]
    Config(String),
    #[error("store unreachable: {0}")]
    Transport(String),
    #[error("store rejected upload (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("unexpected store response: {0}")]
    InvalidResponse(String),
}

/// Content-addressed storage for report attachments.
#[async_trait::async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Upload `bytes` under a collision-resistant name derived from
    /// `original_name`, returning the locator the backend assigned.
    async fn store(
        &self,
        bytes: &[u8],
        original_name: &str,
        mime_type: &str,
    ) -> Result<EvidenceLocator, StoreError>;
}
