//! Trust registry: the allow-list of packages the gateway may bundle.
//!
//! Seeded from explicit configuration, from the vendor cache already on
//! disk, and from a static scan of the source tree's top-level import and
//! export declarations. The set only ever grows.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use oxc_allocator::Allocator;
use oxc_ast::ast::Statement;
use oxc_parser::Parser;
use oxc_span::SourceType;
use walkdir::WalkDir;

use crate::resolve::specifier::{self, SpecifierKind};

/// File extensions scanned for import declarations.
const SCANNED_EXTENSIONS: &[&str] = &["ts", "tsx", "mts", "js", "jsx", "mjs"];

/// Set of trusted package names.
#[derive(Debug, Default)]
pub struct TrustRegistry {
    names: RwLock<HashSet<String>>,
}

impl TrustRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the package owning `specifier` is trusted.
    pub fn is_trusted(&self, specifier: &str) -> bool {
        let name = specifier::package_name(specifier);
        self.names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    /// Trust the package owning `specifier`. Returns `true` if it was not
    /// trusted before.
    pub fn register(&self, specifier: &str) -> bool {
        let name = specifier::package_name(specifier);
        if name.is_empty() {
            return false;
        }
        // Cheap read first: almost every call is for a known name.
        if self.is_trusted(name) {
            return false;
        }
        let added = self
            .names
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
        if added {
            tracing::debug!(package = name, "trusted package");
        }
        added
    }

    /// Trust every package in `specifiers`.
    pub fn extend<I, S>(&self, specifiers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for spec in specifiers {
            self.register(spec.as_ref());
        }
    }

    /// Number of trusted packages.
    pub fn len(&self) -> usize {
        self.names.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no package is trusted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted copy of the trusted names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// Recursively scan `root` and return every bare specifier imported or
/// re-exported at the top level of a module.
///
/// `node_modules` and dot-directories are skipped. Files that fail to read
/// or parse are logged and ignored.
pub fn scan_bare_imports(root: &Path) -> Vec<String> {
    let mut found = Vec::new();

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        let name = entry.file_name().to_string_lossy();
        entry.depth() == 0 || !(name.starts_with('.') || name == "node_modules")
    });

    for entry in walker.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }
        let scanned = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| SCANNED_EXTENSIONS.contains(&ext));
        if !scanned {
            continue;
        }

        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable module");
                continue;
            }
        };
        let Ok(source_type) = SourceType::from_path(path) else {
            continue;
        };

        match top_level_specifiers(&source, source_type) {
            Ok(specs) => found.extend(
                specs
                    .into_iter()
                    .filter(|s| specifier::classify(s) == SpecifierKind::Bare),
            ),
            Err(message) => {
                tracing::warn!(path = %path.display(), %message, "skipping module with syntax errors");
            }
        }
    }

    found
}

/// Parse `source` and collect the specifiers of its top-level value imports
/// and re-exports. Type-only imports are erased at compile time and skipped.
pub fn top_level_specifiers(source: &str, source_type: SourceType) -> Result<Vec<String>, String> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, source_type).parse();
    if ret.panicked || !ret.errors.is_empty() {
        let message = ret
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(message);
    }

    let mut specs = Vec::new();
    for stmt in &ret.program.body {
        match stmt {
            Statement::ImportDeclaration(decl) if !decl.import_kind.is_type() => {
                specs.push(decl.source.value.to_string());
            }
            Statement::ExportAllDeclaration(decl) if !decl.export_kind.is_type() => {
                specs.push(decl.source.value.to_string());
            }
            Statement::ExportNamedDeclaration(decl) if !decl.export_kind.is_type() => {
                if let Some(source) = &decl.source {
                    specs.push(source.value.to_string());
                }
            }
            _ => {}
        }
    }
    Ok(specs)
}
