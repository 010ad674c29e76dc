//! Bare package specifier → vendor module.
//!
//! A specifier is satisfied, in order, by a configured runtime global, by a
//! package installed under the packages directory, or by the CDN mirror.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use super::normalize_lexically;
use super::specifier::split_package;
use crate::config::GatewayConfig;
use crate::trust::TrustRegistry;

/// Export conditions honored in `package.json` `exports`, in preference order.
const EXPORT_CONDITIONS: &[&str] = &["browser", "import", "module", "default"];

/// How a bare specifier is satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageResolution {
    /// Installed locally; served from the contained vendor proxy path.
    Local(String),
    /// Satisfied by a shim that re-exports a runtime global.
    Global,
    /// Redirected to the CDN mirror.
    Cdn(String),
    /// Nothing provides it. Callers still render the proxy path so output is
    /// stable; requesting it is a miss.
    Unresolved,
}

/// A vendor module located on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedModule {
    /// Package name (`pkg` or `@scope/pkg`).
    pub package: String,
    /// Canonical package directory.
    pub package_dir: PathBuf,
    /// Canonical module file inside `package_dir`.
    pub path: PathBuf,
}

impl LocatedModule {
    /// Vendor specifier for a file of this package, e.g. `pkg/lib/util.js`.
    pub fn specifier_for(&self, file: &Path) -> Option<String> {
        let relative = file.strip_prefix(&self.package_dir).ok()?;
        let relative = relative.to_str()?.replace('\\', "/");
        if relative.is_empty() {
            return None;
        }
        Some(format!("{}/{}", self.package, relative))
    }
}

/// Resolves bare package specifiers for the rewriter and the vendor route.
#[derive(Debug)]
pub struct VendorResolver {
    packages_dir: PathBuf,
    vendor_prefix: String,
    globals: BTreeMap<String, String>,
    cdn_url: Option<String>,
    trust: Arc<TrustRegistry>,
}

impl VendorResolver {
    /// Create a resolver from gateway configuration.
    pub fn new(config: &GatewayConfig, trust: Arc<TrustRegistry>) -> Self {
        Self {
            packages_dir: config.packages_dir.clone(),
            vendor_prefix: config.vendor_prefix(),
            globals: config.globals.clone(),
            cdn_url: config.cdn_fallback.then(|| config.cdn_url.clone()),
            trust,
        }
    }

    /// Resolve `specifier`. A successful local lookup trusts its package.
    pub fn resolve_package(&self, specifier: &str) -> PackageResolution {
        if self.globals.contains_key(specifier) {
            return PackageResolution::Global;
        }
        if let Some(located) = self.locate(specifier) {
            self.trust.register(&located.package);
            return PackageResolution::Local(self.proxy_path(specifier));
        }
        match self.cdn_url(specifier) {
            Some(url) => PackageResolution::Cdn(url),
            None => PackageResolution::Unresolved,
        }
    }

    /// The text an import of `specifier` is rewritten to.
    pub fn render(&self, specifier: &str) -> String {
        match self.resolve_package(specifier) {
            PackageResolution::Cdn(url) => url,
            PackageResolution::Local(path) => path,
            PackageResolution::Global | PackageResolution::Unresolved => self.proxy_path(specifier),
        }
    }

    /// Public path serving `specifier`, e.g. `/modules/vendor/preact/hooks`.
    pub fn proxy_path(&self, specifier: &str) -> String {
        format!("{}/{}", self.vendor_prefix, specifier)
    }

    /// Mirror URL for `specifier` when CDN fallback is enabled.
    pub fn cdn_url(&self, specifier: &str) -> Option<String> {
        self.cdn_url
            .as_ref()
            .map(|base| format!("{}/{}", base, specifier))
    }

    /// The global expression configured for `specifier`, if any.
    pub fn global_for(&self, specifier: &str) -> Option<&str> {
        self.globals.get(specifier).map(String::as_str)
    }

    /// Find the module file `specifier` names under the packages directory.
    pub fn locate(&self, specifier: &str) -> Option<LocatedModule> {
        let (package, subpath) = split_package(specifier);
        let package_dir = self.packages_dir.join(package).canonicalize().ok()?;
        if !package_dir.is_dir() {
            return None;
        }

        let manifest = read_manifest(&package_dir);
        let path = match subpath {
            None => root_entry(&package_dir, manifest.as_ref()),
            Some(sub) => subpath_entry(&package_dir, manifest.as_ref(), sub),
        }?;

        Some(LocatedModule {
            package: package.to_string(),
            package_dir,
            path,
        })
    }
}

/// Synthesize a module whose default export is the runtime global named by
/// `expression` (a dotted path such as `React` or `window.preact`).
pub fn global_shim(expression: &str) -> String {
    let mut access = String::from("globalThis");
    for segment in expression.split('.').filter(|s| !s.is_empty()) {
        // JSON string literals are valid JS string literals.
        let key = serde_json::to_string(segment).unwrap_or_else(|_| "\"\"".to_string());
        access.push('[');
        access.push_str(&key);
        access.push(']');
    }
    format!(
        "const __kiln_global = {};\nexport default __kiln_global;\n",
        access
    )
}

fn read_manifest(package_dir: &Path) -> Option<Value> {
    let text = std::fs::read_to_string(package_dir.join("package.json")).ok()?;
    match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(dir = %package_dir.display(), error = %e, "invalid package.json");
            None
        }
    }
}

fn root_entry(package_dir: &Path, manifest: Option<&Value>) -> Option<PathBuf> {
    let mut targets: Vec<String> = Vec::new();
    if let Some(manifest) = manifest {
        if let Some(target) = manifest.get("exports").and_then(|e| exports_target(e, ".")) {
            targets.push(target);
        }
        for field in ["module", "browser", "main"] {
            if let Some(Value::String(target)) = manifest.get(field) {
                targets.push(target.clone());
            }
        }
    }
    targets.push("index.js".to_string());

    targets
        .iter()
        .find_map(|target| probe(package_dir, target))
}

fn subpath_entry(package_dir: &Path, manifest: Option<&Value>, sub: &str) -> Option<PathBuf> {
    let key = format!("./{}", sub);
    if let Some(target) = manifest
        .and_then(|m| m.get("exports"))
        .and_then(|e| exports_target(e, &key))
        && let Some(found) = probe(package_dir, &target)
    {
        return Some(found);
    }
    probe(package_dir, sub)
}

/// Resolve an `exports` field for `key` (`.` or `./sub`).
fn exports_target(exports: &Value, key: &str) -> Option<String> {
    match exports {
        Value::String(target) if key == "." => Some(target.clone()),
        Value::Object(map) => {
            let is_subpath_map = map.keys().any(|k| k.starts_with('.'));
            if !is_subpath_map {
                return (key == ".").then(|| conditional_target(exports)).flatten();
            }
            if let Some(value) = map.get(key) {
                return conditional_target(value);
            }
            // Single-wildcard patterns such as "./*" or "./utils/*.js".
            map.iter().find_map(|(pattern, value)| {
                let (prefix, suffix) = pattern.split_once('*')?;
                let middle = key.strip_prefix(prefix)?.strip_suffix(suffix)?;
                conditional_target(value).map(|t| t.replace('*', middle))
            })
        }
        Value::Array(items) => items.iter().find_map(|item| exports_target(item, key)),
        _ => None,
    }
}

fn conditional_target(value: &Value) -> Option<String> {
    match value {
        Value::String(target) => Some(target.clone()),
        Value::Object(map) => EXPORT_CONDITIONS
            .iter()
            .find_map(|cond| map.get(*cond).and_then(conditional_target)),
        Value::Array(items) => items.iter().find_map(conditional_target),
        _ => None,
    }
}

/// Probe `target` and its usual variants inside `package_dir`, keeping only
/// regular files that stay inside the package.
fn probe(package_dir: &Path, target: &str) -> Option<PathBuf> {
    let target = target.trim_start_matches("./");
    let base = normalize_lexically(&package_dir.join(target))?;
    if !base.starts_with(package_dir) {
        return None;
    }

    let candidates = [
        base.clone(),
        with_suffix(&base, ".js"),
        with_suffix(&base, ".mjs"),
        base.join("index.js"),
    ];
    candidates.into_iter().find_map(|candidate| {
        let canonical = candidate.canonicalize().ok()?;
        (canonical.starts_with(package_dir) && canonical.is_file()).then_some(canonical)
    })
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}
