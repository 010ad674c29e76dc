//! Request path → local source file, jailed to the source root.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Extensions tried, in order, for a script request.
pub const SCRIPT_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs"];

/// Extensions a browser may put on a script URL that stand for "the compiled
/// module", and are therefore stripped before probing.
const COMPILED_EXTENSIONS: &[&str] = &["js", "mjs"];

/// What kind of asset a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Script,
    Style,
}

impl AssetKind {
    /// Infer the asset kind from a request path.
    pub fn from_request_path(path: &str) -> Self {
        if path.ends_with(".css") {
            AssetKind::Style
        } else {
            AssetKind::Script
        }
    }

    /// The `Content-Type` served for this kind.
    pub fn content_type(self) -> &'static str {
        match self {
            AssetKind::Script => "application/javascript; charset=utf-8",
            AssetKind::Style => "text/css; charset=utf-8",
        }
    }
}

/// Maps public request paths onto files beneath a canonical source root.
#[derive(Debug, Clone)]
pub struct SourcePathResolver {
    root: PathBuf,
}

impl SourcePathResolver {
    /// Create a resolver jailed to `root`.
    ///
    /// # Errors
    /// Returns [`Error::SourceRootMissing`] if `root` is not an existing
    /// directory.
    pub fn new(root: &Path) -> Result<Self> {
        let root = root
            .canonicalize()
            .map_err(|_| Error::SourceRootMissing(root.to_path_buf()))?;
        if !root.is_dir() {
            return Err(Error::SourceRootMissing(root));
        }
        Ok(Self { root })
    }

    /// The canonical source root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a request path (relative to the public prefix) to a source
    /// file. Misses, including every path that would escape the root, are
    /// `None`.
    pub async fn resolve(&self, request_path: &str, kind: AssetKind) -> Option<PathBuf> {
        let relative = request_path.trim_start_matches('/');
        if relative.is_empty() || relative.contains('\0') {
            return None;
        }

        for candidate in candidates(relative, kind) {
            if let Some(path) = self.jailed(&self.root.join(candidate)).await {
                return Some(path);
            }
        }
        None
    }

    /// Canonicalize `candidate` and keep it only if it is a regular file
    /// strictly inside the root.
    async fn jailed(&self, candidate: &Path) -> Option<PathBuf> {
        let canonical = tokio::fs::canonicalize(candidate).await.ok()?;
        if canonical == self.root || !canonical.starts_with(&self.root) {
            tracing::debug!(path = %candidate.display(), "rejected path outside source root");
            return None;
        }
        let metadata = tokio::fs::metadata(&canonical).await.ok()?;
        metadata.is_file().then_some(canonical)
    }
}

/// Candidate relative file names for a request, in probe order.
fn candidates(relative: &str, kind: AssetKind) -> Vec<String> {
    if kind == AssetKind::Style {
        return vec![relative.to_string()];
    }

    let (stem, ext) = match relative.rsplit_once('.') {
        Some((stem, ext)) if !ext.contains('/') && !stem.ends_with('/') => (stem, Some(ext)),
        _ => (relative, None),
    };

    let mut out = Vec::new();
    match ext {
        // An explicit source extension names the exact file.
        Some(ext) if SCRIPT_EXTENSIONS.contains(&ext) && !COMPILED_EXTENSIONS.contains(&ext) => {
            out.push(relative.to_string());
        }
        Some(ext) if COMPILED_EXTENSIONS.contains(&ext) => {
            out.extend(SCRIPT_EXTENSIONS.iter().map(|e| format!("{}.{}", stem, e)));
        }
        _ => {
            out.extend(SCRIPT_EXTENSIONS.iter().map(|e| format!("{}.{}", relative, e)));
        }
    }
    out
}
