//! The gateway: one instance owning trust, resolution, the build
//! coordinator and the vendor store, answering requests under its public
//! prefix.
//!
//! Requests are framework-agnostic ([`GatewayRequest`] in, [`Outcome`]
//! out); `kiln-server` adapts them to axum. Security misses (paths outside
//! the source root, untrusted packages) are [`Outcome::Next`], identical to
//! "not mine", so they surface as whatever the next handler does, usually a
//! 404.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use bytes::Bytes;
use tokio::task::JoinHandle;

use crate::build::{
    BuildCoordinator, BuildResult, CompileUnit, Compiler, CompilerPlugin, CompilerSettings,
    OxcCompiler, VendorStore,
};
use crate::config::GatewayConfig;
use crate::diagnostics;
use crate::error::Result;
use crate::freshness::{check_freshness, Freshness};
use crate::resolve::specifier::is_valid_vendor_specifier;
use crate::resolve::vendor::global_shim;
use crate::resolve::{AssetKind, LocatedModule, SourcePathResolver, VendorResolver};
use crate::rewrite::{rewrite, RewriteContext};
use crate::trust::{scan_bare_imports, TrustRegistry};

/// `Cache-Control` for vendor modules. A vendor URL names one specifier
/// whose persisted build never changes.
pub const VENDOR_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// `Cache-Control` for anything that must be revalidated every time:
/// diagnostics and global shims.
pub const NO_CACHE: &str = "no-cache";

/// Request method, as far as the gateway cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Other,
}

impl Method {
    pub fn parse(method: &str) -> Self {
        match method {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            _ => Method::Other,
        }
    }
}

/// The parts of an HTTP request the gateway reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayRequest {
    pub method: Method,
    /// Request path; a query string, if present, is ignored.
    pub path: String,
    pub if_none_match: Option<String>,
}

impl GatewayRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            if_none_match: None,
        }
    }

    pub fn head(path: impl Into<String>) -> Self {
        Self {
            method: Method::Head,
            ..Self::get(path)
        }
    }

    pub fn with_if_none_match(mut self, etag: impl Into<String>) -> Self {
        self.if_none_match = Some(etag.into());
        self
    }
}

/// A response produced by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub cache_control: String,
    pub etag: Option<String>,
    pub body: Bytes,
}

impl GatewayResponse {
    fn ok(content_type: &str, cache_control: &str, body: Bytes) -> Self {
        Self {
            status: 200,
            content_type: Some(content_type.to_string()),
            cache_control: cache_control.to_string(),
            etag: None,
            body,
        }
    }

    fn not_modified(etag: &str, cache_control: &str) -> Self {
        Self {
            status: 304,
            content_type: None,
            cache_control: cache_control.to_string(),
            etag: Some(etag.to_string()),
            body: Bytes::new(),
        }
    }

    fn with_etag(mut self, etag: &str) -> Self {
        self.etag = Some(etag.to_string());
        self
    }
}

/// What the router should do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Respond(GatewayResponse),
    /// Redirect (302) to the given URL.
    Redirect(String),
    /// Not handled here; pass to the next handler.
    Next,
}

/// Module gateway. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

struct Inner {
    config: GatewayConfig,
    trust: Arc<TrustRegistry>,
    sources: SourcePathResolver,
    vendor: Arc<VendorResolver>,
    store: VendorStore,
    coordinator: BuildCoordinator,
    compiler: Arc<dyn Compiler>,
    prewarm_tasks: Mutex<Vec<JoinHandle<bool>>>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("source_root", &self.inner.sources.root())
            .field("public_prefix", &self.inner.config.public_prefix)
            .field("trusted", &self.inner.trust.len())
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Create a gateway compiling with [`OxcCompiler`].
    pub fn new(config: GatewayConfig) -> Result<Self> {
        Self::with_plugins(config, Vec::new())
    }

    /// Create a gateway whose [`OxcCompiler`] runs `plugins` after code
    /// generation.
    pub fn with_plugins(config: GatewayConfig, plugins: Vec<Arc<dyn CompilerPlugin>>) -> Result<Self> {
        let compiler = plugins.into_iter().fold(
            OxcCompiler::new(CompilerSettings::from_config(&config)),
            OxcCompiler::with_plugin,
        );
        Self::with_compiler(config, Arc::new(compiler))
    }

    /// Create a gateway with a custom compiler.
    ///
    /// Validates `config`, jails the source root and seeds the trust
    /// registry from the prewarm list, the globals, the persisted vendor
    /// cache and a scan of the source tree.
    pub fn with_compiler(config: GatewayConfig, compiler: Arc<dyn Compiler>) -> Result<Self> {
        let config = config.normalized()?;
        let sources = SourcePathResolver::new(&config.source_root)?;
        let store = VendorStore::new(&config.cache_dir);

        let trust = Arc::new(TrustRegistry::new());
        trust.extend(&config.prewarm);
        trust.extend(config.globals.keys());
        trust.extend(store.specifiers());
        trust.extend(scan_bare_imports(sources.root()));

        tracing::info!(
            root = %sources.root().display(),
            prefix = %config.public_prefix,
            trusted = trust.len(),
            "gateway ready"
        );

        let vendor = Arc::new(VendorResolver::new(&config, trust.clone()));
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                trust,
                sources,
                vendor,
                store,
                coordinator: BuildCoordinator::new(),
                compiler,
                prewarm_tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    /// The validated configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn trust(&self) -> &TrustRegistry {
        &self.inner.trust
    }

    pub fn store(&self) -> &VendorStore {
        &self.inner.store
    }

    pub fn coordinator(&self) -> &BuildCoordinator {
        &self.inner.coordinator
    }

    /// Canonical source root.
    pub fn source_root(&self) -> &Path {
        self.inner.sources.root()
    }

    /// Answer one request.
    pub async fn handle(&self, request: &GatewayRequest) -> Outcome {
        if request.method == Method::Other {
            return Outcome::Next;
        }

        let path = request.path.split(['?', '#']).next().unwrap_or_default();
        let Some(rest) = self.strip_prefix(path) else {
            return Outcome::Next;
        };

        let vendor_dir = format!("/{}/", self.inner.config.vendor_subpath);
        let outcome = match rest.strip_prefix(&vendor_dir) {
            Some(specifier) => self.serve_vendor(specifier).await,
            None => self.serve_local(rest, request.if_none_match.as_deref()).await,
        };

        match outcome {
            Outcome::Respond(mut response) if request.method == Method::Head => {
                response.body = Bytes::new();
                Outcome::Respond(response)
            }
            other => other,
        }
    }

    /// The part of `path` below the public prefix, starting with `/`.
    fn strip_prefix<'p>(&self, path: &'p str) -> Option<&'p str> {
        let prefix = self.inner.config.public_prefix.as_str();
        let rest = if prefix == "/" {
            path
        } else {
            path.strip_prefix(prefix)?
        };
        (rest.starts_with('/') && rest.len() > 1).then_some(rest)
    }

    async fn serve_vendor(&self, specifier: &str) -> Outcome {
        if !is_valid_vendor_specifier(specifier) {
            tracing::debug!(specifier, "rejected vendor specifier");
            return Outcome::Next;
        }

        if let Some(expression) = self.inner.vendor.global_for(specifier) {
            return Outcome::Respond(GatewayResponse::ok(
                AssetKind::Script.content_type(),
                NO_CACHE,
                Bytes::from(global_shim(expression)),
            ));
        }

        if let Some(content) = self.inner.store.read(specifier).await {
            tracing::debug!(specifier, "vendor cache hit");
            return Outcome::Respond(GatewayResponse::ok(
                AssetKind::Script.content_type(),
                VENDOR_CACHE_CONTROL,
                content,
            ));
        }

        if !self.inner.trust.is_trusted(specifier) {
            return self.miss_or_redirect(specifier);
        }

        let Some(module) = self.locate(specifier).await else {
            return self.miss_or_redirect(specifier);
        };

        match self.build_vendor(specifier, module).await {
            BuildResult::Success { content, content_type } => Outcome::Respond(GatewayResponse::ok(
                &content_type,
                VENDOR_CACHE_CONTROL,
                content,
            )),
            BuildResult::Failure { message } => Outcome::Respond(GatewayResponse::ok(
                AssetKind::Script.content_type(),
                NO_CACHE,
                Bytes::from(diagnostics::synthesize_script(specifier, &message)),
            )),
        }
    }

    fn miss_or_redirect(&self, specifier: &str) -> Outcome {
        match self.inner.vendor.cdn_url(specifier) {
            Some(url) => {
                tracing::debug!(specifier, url = %url, "redirecting to CDN");
                Outcome::Redirect(url)
            }
            None => Outcome::Next,
        }
    }

    async fn locate(&self, specifier: &str) -> Option<LocatedModule> {
        let vendor = self.inner.vendor.clone();
        let specifier = specifier.to_string();
        tokio::task::spawn_blocking(move || vendor.locate(&specifier))
            .await
            .ok()
            .flatten()
    }

    /// Build `specifier` through the coordinator, persisting success.
    async fn build_vendor(&self, specifier: &str, module: LocatedModule) -> BuildResult {
        let this = self.clone();
        let owned = specifier.to_string();
        self.inner
            .coordinator
            .build(format!("vendor:{}", specifier), move || async move {
                this.produce_vendor(&owned, module).await
            })
            .await
    }

    async fn produce_vendor(&self, specifier: &str, module: LocatedModule) -> BuildResult {
        // A job for this key may have finished between our store check and
        // registering this one.
        if let Some(content) = self.inner.store.read(specifier).await {
            return BuildResult::success(content, AssetKind::Script.content_type());
        }

        let started = Instant::now();
        let source = match tokio::fs::read_to_string(&module.path).await {
            Ok(source) => source,
            Err(e) => {
                return BuildResult::failure(format!("cannot read {}: {}", module.path.display(), e));
            }
        };

        let compiler = self.inner.compiler.clone();
        let vendor = self.inner.vendor.clone();
        let compiled = tokio::task::spawn_blocking(move || {
            let unit = CompileUnit::new(&module.path, &source, AssetKind::Script);
            let context = RewriteContext::Vendor {
                vendor: &vendor,
                module: &module,
            };
            compile_and_rewrite(compiler.as_ref(), &unit, Some(&context))
        })
        .await;

        let result = finish(compiled, AssetKind::Script);
        if let BuildResult::Success { content, .. } = &result {
            tracing::info!(
                specifier,
                bytes = content.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "built vendor module"
            );
            if let Err(e) = self.inner.store.write(specifier, content).await {
                tracing::warn!(specifier, "failed to persist vendor module: {}", e);
            }
        }
        result
    }

    async fn serve_local(&self, rest: &str, if_none_match: Option<&str>) -> Outcome {
        let kind = AssetKind::from_request_path(rest);
        let Some(path) = self.inner.sources.resolve(rest, kind).await else {
            return Outcome::Next;
        };

        let minify = self.inner.config.minify;
        let cache_control = self.inner.config.local_cache_control();
        let validator = match check_freshness(&path, minify, if_none_match).await {
            Ok(Freshness::Fresh(validator)) => {
                tracing::debug!(path = %path.display(), "not modified");
                return Outcome::Respond(GatewayResponse::not_modified(
                    validator.as_str(),
                    &cache_control,
                ));
            }
            Ok(Freshness::Stale(validator)) => validator,
            Err(e) => {
                tracing::debug!(path = %path.display(), "source vanished: {}", e);
                return Outcome::Next;
            }
        };

        let key = format!("local:{}:{}", path.display(), validator);
        let this = self.clone();
        let build_path = path.clone();
        let result = self
            .inner
            .coordinator
            .build(key, move || async move { this.produce_local(build_path, kind).await })
            .await;

        match result {
            BuildResult::Success { content, content_type } => Outcome::Respond(
                GatewayResponse::ok(&content_type, &cache_control, content)
                    .with_etag(validator.as_str()),
            ),
            BuildResult::Failure { message } => {
                let display = self.display_path(&path);
                Outcome::Respond(GatewayResponse::ok(
                    kind.content_type(),
                    NO_CACHE,
                    Bytes::from(diagnostics::synthesize(kind, &display, &message)),
                ))
            }
        }
    }

    async fn produce_local(&self, path: PathBuf, kind: AssetKind) -> BuildResult {
        let started = Instant::now();
        let source = match tokio::fs::read_to_string(&path).await {
            Ok(source) => source,
            Err(e) => return BuildResult::failure(format!("cannot read source: {}", e)),
        };

        let compiler = self.inner.compiler.clone();
        let vendor = self.inner.vendor.clone();
        let unit_path = path.clone();
        let compiled = tokio::task::spawn_blocking(move || {
            let unit = CompileUnit::new(&unit_path, &source, kind);
            let context = RewriteContext::Local { vendor: &vendor };
            let context = (kind == AssetKind::Script).then_some(&context);
            compile_and_rewrite(compiler.as_ref(), &unit, context)
        })
        .await;

        let result = finish(compiled, kind);
        match &result {
            BuildResult::Success { content, .. } => tracing::info!(
                path = %self.display_path(&path),
                bytes = content.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "compiled"
            ),
            BuildResult::Failure { message } => tracing::warn!(
                path = %self.display_path(&path),
                "build failed: {}",
                message
            ),
        }
        result
    }

    fn display_path(&self, path: &Path) -> String {
        path.strip_prefix(self.inner.sources.root())
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Start one background build per prewarm entry. Returns how many
    /// were started; [`Gateway::wait_for_prewarm`] awaits them.
    pub fn prewarm(&self) -> usize {
        let mut started = 0;
        let mut tasks = self
            .inner
            .prewarm_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        for specifier in &self.inner.config.prewarm {
            if !is_valid_vendor_specifier(specifier) {
                tracing::warn!(specifier = %specifier, "skipping invalid prewarm entry");
                continue;
            }
            let this = self.clone();
            let specifier = specifier.clone();
            tasks.push(tokio::spawn(async move { this.warm(&specifier).await }));
            started += 1;
        }
        started
    }

    /// Await every prewarm task started so far. Returns how many packages
    /// are ready (built now or already cached).
    pub async fn wait_for_prewarm(&self) -> usize {
        let tasks = std::mem::take(
            &mut *self
                .inner
                .prewarm_tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        let mut ready = 0;
        for task in tasks {
            match task.await {
                Ok(true) => ready += 1,
                Ok(false) => {}
                Err(e) => tracing::error!("prewarm task failed: {}", e),
            }
        }
        ready
    }

    async fn warm(&self, specifier: &str) -> bool {
        if self.inner.vendor.global_for(specifier).is_some()
            || self.inner.store.contains(specifier).await
        {
            return true;
        }
        let Some(module) = self.locate(specifier).await else {
            tracing::warn!(specifier, "prewarm package not found");
            return false;
        };
        match self.build_vendor(specifier, module).await {
            BuildResult::Success { .. } => true,
            BuildResult::Failure { message } => {
                tracing::warn!(specifier, "prewarm build failed: {}", message);
                false
            }
        }
    }
}

fn compile_and_rewrite(
    compiler: &dyn Compiler,
    unit: &CompileUnit<'_>,
    context: Option<&RewriteContext<'_>>,
) -> std::result::Result<String, String> {
    let output = compiler.compile(unit).map_err(|e| e.message)?;
    match context {
        Some(context) => rewrite(&output, context).map_err(|e| e.to_string()),
        None => Ok(output),
    }
}

fn finish(
    compiled: std::result::Result<std::result::Result<String, String>, tokio::task::JoinError>,
    kind: AssetKind,
) -> BuildResult {
    match compiled {
        Ok(Ok(output)) => BuildResult::success(output, kind.content_type()),
        Ok(Err(message)) => BuildResult::failure(message),
        Err(e) => BuildResult::failure(format!("compiler task failed: {}", e)),
    }
}
