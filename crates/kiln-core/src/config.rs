//! Gateway configuration.
//!
//! Loaded from a `kiln.toml` file, for example:
//!
//! ```text
//! source_root = "src"
//! public_prefix = "/modules"
//! prewarm = ["preact", "preact/hooks"]
//! minify = false
//! cdn_fallback = true
//!
//! [define]
//! "process.env.NODE_ENV" = "\"development\""
//!
//! [globals]
//! react = "React"
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default public prefix the gateway owns.
pub const DEFAULT_PUBLIC_PREFIX: &str = "/modules";

/// Default path segment for vendor modules beneath the public prefix.
pub const DEFAULT_VENDOR_SUBPATH: &str = "vendor";

/// Default CDN mirror used when `cdn_fallback` is enabled.
pub const DEFAULT_CDN_URL: &str = "https://esm.sh";

/// Configuration for a single gateway instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Directory holding the typed source modules. Everything served as a
    /// local module must live beneath it.
    pub source_root: PathBuf,

    /// URL prefix owned by the gateway (e.g. `/modules`).
    pub public_prefix: String,

    /// Segment beneath `public_prefix` under which vendor modules are served.
    pub vendor_subpath: String,

    /// Packages trusted and built in the background at startup.
    pub prewarm: Vec<String>,

    /// Emit minified output.
    pub minify: bool,

    /// `max-age` for compiled local modules. Zero means `no-cache`.
    pub local_cache_ttl_seconds: u64,

    /// Global identifier replacements applied at compile time.
    pub define: BTreeMap<String, String>,

    /// Package specifiers satisfied by a runtime global instead of a build,
    /// mapped to the global expression (e.g. `react = "React"`).
    pub globals: BTreeMap<String, String>,

    /// Redirect unresolvable or untrusted packages to `cdn_url`.
    pub cdn_fallback: bool,

    /// Base URL of the CDN mirror.
    pub cdn_url: String,

    /// Directory for persisted vendor modules.
    pub cache_dir: PathBuf,

    /// Directory holding installed third-party packages.
    pub packages_dir: PathBuf,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            source_root: PathBuf::from("src"),
            public_prefix: DEFAULT_PUBLIC_PREFIX.to_string(),
            vendor_subpath: DEFAULT_VENDOR_SUBPATH.to_string(),
            prewarm: Vec::new(),
            minify: false,
            local_cache_ttl_seconds: 0,
            define: BTreeMap::new(),
            globals: BTreeMap::new(),
            cdn_fallback: false,
            cdn_url: DEFAULT_CDN_URL.to_string(),
            cache_dir: PathBuf::from(".kiln/cache"),
            packages_dir: PathBuf::from("node_modules"),
        }
    }
}

impl GatewayConfig {
    /// Create a config rooted at `source_root` with every other option at
    /// its default.
    pub fn for_source_root(source_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            ..Self::default()
        }
    }

    /// Parse a config from TOML text without touching the filesystem.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.normalized()
    }

    /// Load and validate a config file, resolving relative paths against the
    /// file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        let base = path.parent().unwrap_or(Path::new("."));
        Ok(config.relative_to(base))
    }

    /// Resolve relative directories against `base`.
    pub fn relative_to(mut self, base: &Path) -> Self {
        for dir in [
            &mut self.source_root,
            &mut self.cache_dir,
            &mut self.packages_dir,
        ] {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
        self
    }

    /// Validate the config and bring URL-ish fields into canonical form:
    /// the prefix gets exactly one leading `/` and no trailing `/`, the CDN
    /// URL loses its trailing `/`.
    pub fn normalized(mut self) -> Result<Self> {
        let prefix = self.public_prefix.trim_matches('/');
        if prefix.split('/').any(|seg| seg == ".." || seg == ".") {
            return Err(Error::Config(format!(
                "public_prefix must not contain dot segments: {}",
                self.public_prefix
            )));
        }
        self.public_prefix = format!("/{}", prefix);

        let vendor = self.vendor_subpath.trim_matches('/');
        if vendor.is_empty() || vendor.contains('/') || vendor == "." || vendor == ".." {
            return Err(Error::Config(format!(
                "vendor_subpath must be a single path segment: {:?}",
                self.vendor_subpath
            )));
        }
        self.vendor_subpath = vendor.to_string();

        if self.cdn_fallback && self.cdn_url.trim().is_empty() {
            return Err(Error::Config(
                "cdn_fallback is enabled but cdn_url is empty".to_string(),
            ));
        }
        self.cdn_url = self.cdn_url.trim_end_matches('/').to_string();

        Ok(self)
    }

    /// The public path under which vendor modules are served, e.g.
    /// `/modules/vendor`.
    pub fn vendor_prefix(&self) -> String {
        if self.public_prefix == "/" {
            format!("/{}", self.vendor_subpath)
        } else {
            format!("{}/{}", self.public_prefix, self.vendor_subpath)
        }
    }

    /// `Cache-Control` value for compiled local modules.
    pub fn local_cache_control(&self) -> String {
        if self.local_cache_ttl_seconds == 0 {
            "no-cache".to_string()
        } else {
            format!("max-age={}", self.local_cache_ttl_seconds)
        }
    }
}
