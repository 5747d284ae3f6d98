//! Upload names: `<stem>_<token>.<ext>`.
//!
//! The token comes from an injected [`TokenSource`] rather than the content,
//! so the same bytes uploaded twice land under two distinct names.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Stem used when the original name has none (e.g. `.jpg`).
const FALLBACK_STEM: &str = "evidence";

/// Produces collision-resistant filename suffixes.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> String;
}

/// Random UUID v4 in 32-char hex form.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidTokenSource;

impl TokenSource for UuidTokenSource {
    fn token(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// Deterministic `prefix-0`, `prefix-1`, ... for tests and reproducible runs.
#[derive(Debug)]
pub struct SequenceTokenSource {
    prefix: String,
    next: AtomicU64,
}

impl SequenceTokenSource {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            next: AtomicU64::new(0),
        }
    }
}

impl TokenSource for SequenceTokenSource {
    fn token(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.prefix, n)
    }
}

/// Build the upload name from the caller's original filename.
///
/// Directory components are dropped. The stem is everything before the first
/// `.`, the extension everything after the last one; a name without a `.`
/// gets no extension.
pub fn staged_name(original_name: &str, token: &str) -> String {
    let base = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_name)
        .trim();

    let stem = match base.split('.').next() {
        Some(s) if !s.is_empty() => s,
        _ => FALLBACK_STEM,
    };

    match base.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => format!("{stem}_{token}.{ext}"),
        _ => format!("{stem}_{token}"),
    }
}
