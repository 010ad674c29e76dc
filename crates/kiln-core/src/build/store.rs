//! Persisted vendor modules.
//!
//! One file per vendor specifier, named by the sanitized specifier. A file's
//! presence is its validity: entries are written once, atomically, and never
//! rewritten by the gateway.

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::resolve::specifier::{sanitize, unsanitize};

const ENTRY_EXTENSION: &str = ".js";

/// On-disk cache of rewritten vendor modules.
#[derive(Debug, Clone)]
pub struct VendorStore {
    dir: PathBuf,
}

impl VendorStore {
    /// Store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the entry for `specifier`.
    pub fn entry_path(&self, specifier: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}", sanitize(specifier), ENTRY_EXTENSION))
    }

    /// Read the entry for `specifier`, if one has been persisted.
    pub async fn read(&self, specifier: &str) -> Option<Bytes> {
        match tokio::fs::read(self.entry_path(specifier)).await {
            Ok(content) => Some(Bytes::from(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(specifier, "unreadable vendor cache entry: {}", e);
                None
            }
        }
    }

    /// Whether an entry for `specifier` exists.
    pub async fn contains(&self, specifier: &str) -> bool {
        tokio::fs::try_exists(self.entry_path(specifier))
            .await
            .unwrap_or(false)
    }

    /// Persist `content` for `specifier`.
    ///
    /// Written to a temporary sibling and renamed into place, so readers
    /// see either nothing or the complete entry.
    pub async fn write(&self, specifier: &str, content: &[u8]) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let target = self.entry_path(specifier);
        let tmp = self.dir.join(format!(
            ".{}.{}.tmp",
            sanitize(specifier),
            std::process::id()
        ));

        if let Err(e) = tokio::fs::write(&tmp, content).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }

    /// Specifiers of every persisted entry, sorted.
    ///
    /// Synchronous: used while seeding trust at construction.
    pub fn specifiers(&self) -> Vec<String> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!("cannot list vendor cache {}: {}", self.dir.display(), e);
                return Vec::new();
            }
        };

        let mut specifiers: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                if name.starts_with('.') {
                    return None;
                }
                let stem = name.strip_suffix(ENTRY_EXTENSION)?;
                Some(unsanitize(stem))
            })
            .collect();
        specifiers.sort();
        specifiers
    }

    /// Remove the cache directory and everything in it. Returns the number
    /// of entries removed.
    pub fn clear(&self) -> io::Result<usize> {
        let count = self.specifiers().len();
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(count),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_then_read() {
        let temp = TempDir::new().unwrap();
        let store = VendorStore::new(temp.path().join("cache"));

        assert!(store.read("preact").await.is_none());
        assert!(!store.contains("preact").await);

        store.write("preact", b"export default 1;").await.unwrap();
        assert!(store.contains("preact").await);
        assert_eq!(
            store.read("preact").await.unwrap(),
            Bytes::from_static(b"export default 1;")
        );
    }

    #[tokio::test]
    async fn test_scoped_specifier_is_flat_file() {
        let temp = TempDir::new().unwrap();
        let store = VendorStore::new(temp.path());

        store.write("@scope/pkg/sub", b"x").await.unwrap();
        let path = store.entry_path("@scope/pkg/sub");
        assert_eq!(path.parent(), Some(temp.path()));
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "@scope%2Fpkg%2Fsub.js"
        );
    }

    #[tokio::test]
    async fn test_specifiers_lists_entries_only() {
        let temp = TempDir::new().unwrap();
        let store = VendorStore::new(temp.path());

        store.write("preact/hooks", b"a").await.unwrap();
        store.write("@scope/pkg", b"b").await.unwrap();
        std::fs::write(temp.path().join(".preact.123.tmp"), b"partial").unwrap();
        std::fs::write(temp.path().join("notes.txt"), b"ignored").unwrap();

        assert_eq!(
            store.specifiers(),
            vec!["@scope/pkg".to_string(), "preact/hooks".to_string()]
        );
    }

    #[tokio::test]
    async fn test_write_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let store = VendorStore::new(temp.path());

        store.write("pkg", b"first").await.unwrap();
        let names: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["pkg.js".to_string()]);
    }

    #[tokio::test]
    async fn test_clear() {
        let temp = TempDir::new().unwrap();
        let store = VendorStore::new(temp.path().join("cache"));

        assert_eq!(store.clear().unwrap(), 0);
        store.write("a", b"1").await.unwrap();
        store.write("b", b"2").await.unwrap();
        assert_eq!(store.clear().unwrap(), 2);
        assert!(!store.dir().exists());
    }
}
