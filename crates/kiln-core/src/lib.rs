//! Core of the kiln module gateway.
//!
//! This crate provides:
//! - Trust registry gating which packages may be bundled
//! - Source path and vendor package resolution, jailed to their roots
//! - A scanner that rewrites import specifiers in generated code
//! - Build deduplication, the compiler primitive and the vendor cache
//! - Diagnostic assets for failed builds and the freshness fast path
//! - [`Gateway`], which ties them into one request path

pub mod build;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod freshness;
pub mod gateway;
pub mod resolve;
pub mod rewrite;
pub mod trust;

pub use build::{
    BuildCoordinator, BuildResult, CompileError, CompileUnit, Compiler, CompilerPlugin,
    CompilerSettings, OxcCompiler, VendorStore,
};
pub use config::GatewayConfig;
pub use error::{Error, Result};
pub use freshness::{Freshness, WeakValidator, check_freshness};
pub use gateway::{Gateway, GatewayRequest, GatewayResponse, Method, Outcome};
pub use resolve::{AssetKind, PackageResolution, SourcePathResolver, VendorResolver};
pub use rewrite::{RewriteContext, RewriteError};
pub use trust::TrustRegistry;
