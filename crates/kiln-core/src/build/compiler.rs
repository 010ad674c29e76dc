//! The compiler primitive: typed source in, browser-executable script out.
//!
//! The gateway only sees the [`Compiler`] trait. [`OxcCompiler`] is the
//! default implementation and runs the oxc toolchain in one pass:
//! parse, semantic analysis, TypeScript/JSX lowering, `define`
//! replacement, code generation.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use oxc_allocator::Allocator;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_parser::Parser;
use oxc_semantic::SemanticBuilder;
use oxc_span::SourceType;
use oxc_transformer::{TransformOptions, Transformer};
use oxc_transformer_plugins::{ReplaceGlobalDefines, ReplaceGlobalDefinesConfig};
use thiserror::Error;

use crate::config::GatewayConfig;
use crate::resolve::AssetKind;

/// One file handed to a compiler.
#[derive(Debug, Clone, Copy)]
pub struct CompileUnit<'a> {
    pub path: &'a Path,
    pub source: &'a str,
    pub kind: AssetKind,
}

impl<'a> CompileUnit<'a> {
    pub fn new(path: &'a Path, source: &'a str, kind: AssetKind) -> Self {
        Self { path, source, kind }
    }
}

/// Compilation failure. `message` is shown to the developer verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CompileError {
    pub message: String,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    fn from_diagnostics<I, D>(stage: &str, diagnostics: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: std::fmt::Display,
    {
        let lines: Vec<String> = diagnostics
            .into_iter()
            .map(|d| format!("{}: {}", stage, d))
            .collect();
        Self::new(lines.join("\n"))
    }
}

/// Turns one source file into output text.
///
/// Called on the blocking pool; implementations may do CPU-heavy work.
pub trait Compiler: Send + Sync {
    fn compile(&self, unit: &CompileUnit<'_>) -> Result<String, CompileError>;
}

impl<C: Compiler + ?Sized> Compiler for Arc<C> {
    fn compile(&self, unit: &CompileUnit<'_>) -> Result<String, CompileError> {
        (**self).compile(unit)
    }
}

/// Post-processing step applied to compiled output, in registration order.
pub trait CompilerPlugin: Send + Sync {
    /// Name used in error messages.
    fn name(&self) -> &str;

    fn transform(&self, unit: &CompileUnit<'_>, output: String) -> Result<String, String>;
}

/// Options for [`OxcCompiler`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilerSettings {
    pub minify: bool,
    pub define: BTreeMap<String, String>,
}

impl CompilerSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            minify: config.minify,
            define: config.define.clone(),
        }
    }
}

/// Compiler backed by the oxc toolchain.
#[derive(Default)]
pub struct OxcCompiler {
    settings: CompilerSettings,
    plugins: Vec<Arc<dyn CompilerPlugin>>,
}

impl std::fmt::Debug for OxcCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OxcCompiler")
            .field("settings", &self.settings)
            .field(
                "plugins",
                &self.plugins.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl OxcCompiler {
    pub fn new(settings: CompilerSettings) -> Self {
        Self {
            settings,
            plugins: Vec::new(),
        }
    }

    /// Append a plugin run after code generation.
    pub fn with_plugin(mut self, plugin: Arc<dyn CompilerPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    fn compile_script(&self, unit: &CompileUnit<'_>) -> Result<String, CompileError> {
        let allocator = Allocator::default();
        let source_type = SourceType::from_path(unit.path)
            .unwrap_or_else(|_| SourceType::mjs())
            .with_module(true);

        let parsed = Parser::new(&allocator, unit.source, source_type).parse();
        if parsed.panicked || !parsed.errors.is_empty() {
            return Err(CompileError::from_diagnostics("syntax error", parsed.errors));
        }
        let mut program = parsed.program;

        let semantic = SemanticBuilder::new().build(&program);
        if !semantic.errors.is_empty() {
            return Err(CompileError::from_diagnostics("semantic error", semantic.errors));
        }
        let scoping = semantic.semantic.into_scoping();

        let options = TransformOptions::default();
        let transformed =
            Transformer::new(&allocator, unit.path, &options).build_with_scoping(scoping, &mut program);
        if !transformed.errors.is_empty() {
            return Err(CompileError::from_diagnostics("transform error", transformed.errors));
        }

        if !self.settings.define.is_empty() {
            let pairs: Vec<(&str, &str)> = self
                .settings
                .define
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            let config = ReplaceGlobalDefinesConfig::new(&pairs)
                .map_err(|errors| CompileError::from_diagnostics("invalid define", errors))?;
            let _ = ReplaceGlobalDefines::new(&allocator, config)
                .build(transformed.scoping, &mut program);
        }

        let codegen_options = if self.settings.minify {
            CodegenOptions::minify()
        } else {
            CodegenOptions::default()
        };
        Ok(Codegen::new()
            .with_options(codegen_options)
            .build(&program)
            .code)
    }
}

impl Compiler for OxcCompiler {
    fn compile(&self, unit: &CompileUnit<'_>) -> Result<String, CompileError> {
        let mut output = match unit.kind {
            AssetKind::Script => self.compile_script(unit)?,
            AssetKind::Style => unit.source.to_string(),
        };

        for plugin in &self.plugins {
            output = plugin
                .transform(unit, output)
                .map_err(|e| CompileError::new(format!("plugin {}: {}", plugin.name(), e)))?;
        }
        Ok(output)
    }
}
