//! In-process evidence store.
//!
//! Addresses blobs with [`cid_v0`] and keeps them so a locator can be
//! resolved afterwards. Counts every `store` call and can be switched into a
//! failing mode, which is what the pipeline tests need.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tiplock_core::{normalize_gateway_base, EvidenceLocator};
use tracing::info;

use crate::cid::cid_v0;
use crate::naming::{staged_name, TokenSource, UuidTokenSource};
use crate::{EvidenceStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// Name the blob was uploaded under (`stem_token.ext`).
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

pub struct MemoryEvidenceStore {
    gateway_base: String,
    tokens: Arc<dyn TokenSource>,
    blobs: Mutex<HashMap<String, StoredBlob>>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryEvidenceStore {
    pub fn new(gateway_base: &str, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            gateway_base: normalize_gateway_base(gateway_base),
            tokens,
            blobs: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// Make subsequent `store` calls fail as an unreachable backend would.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `store` calls, successful or not.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn get(&self, content_address: &str) -> Option<StoredBlob> {
        self.lock().get(content_address).cloned()
    }

    /// Resolve a gateway URL issued by this store.
    pub fn resolve(&self, url: &str) -> Option<StoredBlob> {
        let locator = EvidenceLocator::from_url(url).ok()?;
        if locator.url() != format!("{}/ipfs/{}", self.gateway_base, locator.content_address()) {
            return None;
        }
        self.get(locator.content_address())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredBlob>> {
        self.blobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryEvidenceStore {
    fn default() -> Self {
        Self::new("https://gateway.local", Arc::new(UuidTokenSource))
    }
}

#[async_trait::async_trait]
impl EvidenceStore for MemoryEvidenceStore {
    async fn store(
        &self,
        bytes: &[u8],
        original_name: &str,
        mime_type: &str,
    ) -> Result<EvidenceLocator, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if bytes.is_empty() {
            return Err(StoreError::EmptyPayload);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("memory store set to fail".to_string()));
        }

        let name = staged_name(original_name, &self.tokens.token());
        let address = cid_v0(bytes);
        self.lock().insert(
            address.clone(),
            StoredBlob {
                name: name.clone(),
                mime_type: mime_type.to_string(),
                bytes: bytes.to_vec(),
            },
        );

        info!(name = %name, cid = %address, "evidence stored in memory");
        Ok(EvidenceLocator::new(&address, &self.gateway_base))
    }
}
