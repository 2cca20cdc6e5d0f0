//! Depyler - Python to Rust Transpiler
//!
//! # Overview
//! Type-annotated Python code to idiomatic Rust code transpiler.
//!
//! パイプライン: lexer → parser (AST) → semantic (HIR + 推論) → emitter → manifest

pub mod diagnostics;
pub mod emitter;
pub mod error;
pub mod hir;
pub mod lexer;
pub mod manifest;
pub mod parser;
pub mod semantic;
pub mod stdlib;
pub mod unsupported_features;

pub use error::{DepylerError, Result};
pub use manifest::{generate_manifest, CrateRole, Dependency};
pub use stdlib::ErrorTaxon;

use anyhow::Context as _;
use diagnostics::{Diagnostics, Phase};
use emitter::EmitOptions;
use hir::HirModule;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

/// Options for one transpilation run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranspileOptions {
    pub crate_role: CrateRole,
    /// docstring と推論した関数属性を doc コメントとして出す
    pub emit_docs: bool,
}

impl Default for TranspileOptions {
    fn default() -> Self {
        Self {
            crate_role: CrateRole::Binary,
            emit_docs: true,
        }
    }
}

/// Generated Rust source and what it needs to build
#[derive(Debug, Clone, PartialEq)]
pub struct TranspileOutput {
    pub rust_code: String,
    pub dependencies: BTreeSet<Dependency>,
    pub error_types: BTreeSet<ErrorTaxon>,
}

impl TranspileOutput {
    /// Manifest for this output
    pub fn manifest(&self, package_name: &str, role: CrateRole) -> String {
        let role = CrateRole::resolve(&manifest::sanitize_package_name(package_name), role);
        generate_manifest(
            package_name,
            role.default_source_path(),
            &self.dependencies,
            role,
        )
    }
}

/// Parse Python source and run every analysis pass
pub fn analyze_to_hir(source: &str) -> Result<HirModule> {
    // 1. Parse Python source to AST
    let program = parser::parse(source)?;
    debug!(statements = program.body.len(), "parsed");

    // 2. Bridge + inference
    semantic::analyze(&program)
}

/// Transpile with default options
pub fn transpile(source: &str) -> Result<TranspileOutput> {
    transpile_with_options(source, &TranspileOptions::default())
}

pub fn transpile_with_options(source: &str, options: &TranspileOptions) -> Result<TranspileOutput> {
    let module = analyze_to_hir(source)?;
    emit_module(&module, options)
}

fn emit_module(module: &HirModule, options: &TranspileOptions) -> Result<TranspileOutput> {
    let out = emitter::emit(
        module,
        &EmitOptions {
            library: options.crate_role == CrateRole::Library,
            emit_docs: options.emit_docs,
        },
    )?;
    debug!(
        bytes = out.code.len(),
        dependencies = out.dependencies.len(),
        error_types = out.error_types.len(),
        "emitted"
    );
    Ok(TranspileOutput {
        rust_code: out.code,
        dependencies: out.dependencies,
        error_types: out.error_types,
    })
}

/// Transpile and report failures as diagnostics tagged with the failing stage
pub fn transpile_with_diagnostics(
    source: &str,
    file: Option<&Path>,
    options: &TranspileOptions,
) -> std::result::Result<TranspileOutput, Diagnostics> {
    let module = analyze_with_diagnostics(source, file)?;
    emit_module(&module, options)
        .map_err(|err| Diagnostics::from_error(&err, file).in_phase(Phase::Codegen))
}

/// `analyze_to_hir` with diagnostics
pub fn analyze_with_diagnostics(
    source: &str,
    file: Option<&Path>,
) -> std::result::Result<HirModule, Diagnostics> {
    let program = parser::parse(source)
        .map_err(|err| Diagnostics::from_error(&err, file).in_phase(Phase::Parse))?;
    semantic::analyze(&program).map_err(|err| Diagnostics::from_error(&err, file))
}

/// Transpile a Python file to a Rust file
pub fn transpile_file(input: &Path, output: &Path, options: &TranspileOptions) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let out = transpile_with_options(&source, options)?;
    std::fs::write(output, out.rust_code)
        .with_context(|| format!("failed to write {}", output.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transpile_simple_function() {
        let python = "def add(a: int, b: int) -> int:\n    return a + b\n";
        let out = transpile(python).unwrap();
        assert!(out.rust_code.contains("fn add(a: i64, b: i64) -> i64"));
        assert!(out.dependencies.is_empty());
    }

    #[test]
    fn test_transpile_library_has_no_main() {
        let python = "def double(x: int) -> int:\n    return x * 2\n";
        let options = TranspileOptions {
            crate_role: CrateRole::Library,
            emit_docs: false,
        };
        let out = transpile_with_options(python, &options).unwrap();
        assert!(out.rust_code.contains("pub fn double"));
        assert!(!out.rust_code.contains("fn main()"));
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = transpile("def f(:\n    pass\n").unwrap_err();
        assert!(matches!(err, DepylerError::ParseError { .. }));
    }

    #[test]
    fn test_diagnostics_tag_parse_phase() {
        let diags = transpile_with_diagnostics("x = (1,\n", None, &TranspileOptions::default())
            .unwrap_err();
        assert_eq!(diags.diagnostics.len(), 1);
        assert_eq!(diags.diagnostics[0].code, "DEPYLER-PARSE-ERROR");
        assert_eq!(diags.diagnostics[0].phase, Phase::Parse);
    }

    #[test]
    fn test_output_manifest_uses_role_path() {
        let out = transpile("print(1)\n").unwrap();
        let text = out.manifest("hello", CrateRole::Binary);
        assert!(text.contains("path = \"src/main.rs\""));
    }
}
