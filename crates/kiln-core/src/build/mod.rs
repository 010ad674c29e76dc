//! Build pipeline: the compiler primitive, in-flight deduplication, and the
//! persisted vendor cache.

pub mod compiler;
pub mod coordinator;
pub mod store;

pub use compiler::{CompileError, CompileUnit, Compiler, CompilerPlugin, CompilerSettings, OxcCompiler};
pub use coordinator::BuildCoordinator;
pub use store::VendorStore;

use bytes::Bytes;

/// Outcome of one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildResult {
    /// Compiled and rewritten output.
    Success { content: Bytes, content_type: String },
    /// The build failed; `message` is shown to the developer.
    Failure { message: String },
}

impl BuildResult {
    /// A successful build.
    pub fn success(content: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        BuildResult::Success {
            content: content.into(),
            content_type: content_type.into(),
        }
    }

    /// A failed build.
    pub fn failure(message: impl Into<String>) -> Self {
        BuildResult::Failure {
            message: message.into(),
        }
    }

    /// Whether the build succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, BuildResult::Success { .. })
    }
}
