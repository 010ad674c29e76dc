//! Conditional-request fast path for local modules.

use std::fs::Metadata;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Weak ETag derived from a source file's size, modification time and the
/// minify flag. Cheap to compute; not a content hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WeakValidator(String);

impl WeakValidator {
    pub fn from_metadata(meta: &Metadata, minify: bool) -> Self {
        let mtime_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis())
            .unwrap_or(0);
        Self::from_parts(meta.len(), mtime_ms, minify)
    }

    fn from_parts(size: u64, mtime_ms: u128, minify: bool) -> Self {
        let suffix = if minify { "-m" } else { "" };
        Self(format!("W/\"{:x}-{:x}{}\"", size, mtime_ms, suffix))
    }

    /// The header value, e.g. `W/"1f-18c2a3b4c5d"`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether an `If-None-Match` value names exactly this validator,
    /// alone or as one entry of a comma-separated list.
    pub fn matches(&self, if_none_match: &str) -> bool {
        if_none_match.split(',').map(str::trim).any(|tag| tag == self.0)
    }
}

impl std::fmt::Display for WeakValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of the freshness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// The client's copy, tagged with this validator, is current.
    Fresh(WeakValidator),
    /// The client must be sent a new body tagged with this validator.
    Stale(WeakValidator),
}

/// Compare `path` against the client's `If-None-Match` with one `stat`.
pub async fn check_freshness(
    path: &Path,
    minify: bool,
    if_none_match: Option<&str>,
) -> io::Result<Freshness> {
    let meta = tokio::fs::metadata(path).await?;
    let validator = WeakValidator::from_metadata(&meta, minify);
    match if_none_match {
        Some(header) if validator.matches(header) => Ok(Freshness::Fresh(validator)),
        _ => Ok(Freshness::Stale(validator)),
    }
}
