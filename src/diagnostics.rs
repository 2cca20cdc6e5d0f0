//! Diagnostics - structured failure reports for the CLI
//!
//! `DepylerError` を `[CODE] file:line:col message` 形式のテキストか JSON にする。

use crate::error::DepylerError;
use serde::Serialize;
use serde_json::json;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticSpan {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub line: usize,
    pub column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

impl DiagnosticSpan {
    /// 1 文字分の範囲。位置不明 (0) は 1:1 に寄せる
    pub fn point(file: Option<&Path>, line: usize, column: usize) -> Self {
        let line = line.max(1);
        let column = column.max(1);
        Self {
            file: file.map(|p| p.display().to_string()),
            line,
            column,
            end_line: line,
            end_column: column,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
}

/// Pipeline stage that produced the diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Parse,
    Lowering,
    Inference,
    Codegen,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub code: String,
    pub message: String,
    pub severity: DiagnosticSeverity,
    pub span: DiagnosticSpan,
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Diagnostics {
    pub diagnostics: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == DiagnosticSeverity::Error)
    }

    pub fn add(&mut self, diag: Diagnostic) {
        self.diagnostics.push(diag);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.diagnostics.extend(other.diagnostics);
    }

    /// Build the single diagnostic for a transpilation error
    pub fn from_error(err: &DepylerError, file: Option<&Path>) -> Self {
        let mut diags = Self::new();
        diags.add(Diagnostic::from_error(err, file));
        diags
    }

    /// Override the phase of every entry (the caller knows which stage failed)
    pub fn in_phase(mut self, phase: Phase) -> Self {
        for d in &mut self.diagnostics {
            d.phase = phase;
        }
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for diag in &self.diagnostics {
            let file = diag.span.file.as_deref().unwrap_or("<input>");
            out.push_str(&format!(
                "[{}] {}:{}:{} {}\n",
                diag.code, file, diag.span.line, diag.span.column, diag.message
            ));
        }
        out
    }
}

impl Diagnostic {
    pub fn from_error(err: &DepylerError, file: Option<&Path>) -> Self {
        let (code, message, phase, meta) = match err {
            DepylerError::ParseError { message, .. } => {
                ("DEPYLER-PARSE-ERROR", message.clone(), Phase::Parse, None)
            }
            DepylerError::UnsupportedSyntax { detail, .. } => (
                "DEPYLER-UNSUPPORTED-SYNTAX",
                format!("unsupported syntax: {detail}"),
                Phase::Lowering,
                Some(json!({ "construct": detail })),
            ),
            DepylerError::UnmappableType { ty, .. } => (
                "DEPYLER-UNMAPPABLE-TYPE",
                format!("type '{ty}' has no Rust equivalent"),
                Phase::Inference,
                Some(json!({ "type": ty })),
            ),
            DepylerError::NameResolution { name, .. } => (
                "DEPYLER-NAME-RESOLUTION",
                format!("unresolved name '{name}'"),
                Phase::Lowering,
                Some(json!({ "name": name })),
            ),
            DepylerError::Internal(message) => {
                ("DEPYLER-INTERNAL", message.clone(), Phase::Codegen, None)
            }
        };
        let pos = err.pos().unwrap_or_default();
        Diagnostic {
            code: code.to_string(),
            message,
            severity: DiagnosticSeverity::Error,
            span: DiagnosticSpan::point(file, pos.line, pos.column),
            phase,
            meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::SourcePos;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_text_format() {
        let err = DepylerError::parse(SourcePos::new(3, 9), "expected ':'");
        let diags = Diagnostics::from_error(&err, Some(Path::new("app.py")));
        assert_eq!(diags.to_text(), "[DEPYLER-PARSE-ERROR] app.py:3:9 expected ':'\n");
    }

    #[test]
    fn test_unknown_position_defaults_to_first_line() {
        let err = DepylerError::Internal("bad state".to_string());
        let diags = Diagnostics::from_error(&err, None);
        assert_eq!(diags.to_text(), "[DEPYLER-INTERNAL] <input>:1:1 bad state\n");
    }

    #[test]
    fn test_json_carries_phase_and_meta() {
        let err = DepylerError::unsupported(SourcePos::new(1, 1), "del statement");
        let json: serde_json::Value =
            serde_json::from_str(&Diagnostics::from_error(&err, None).to_json()).unwrap();
        let d = &json["diagnostics"][0];
        assert_eq!(d["code"], "DEPYLER-UNSUPPORTED-SYNTAX");
        assert_eq!(d["phase"], "lowering");
        assert_eq!(d["severity"], "error");
        assert_eq!(d["meta"]["construct"], "del statement");
        assert!(d["span"].get("file").is_none());
    }

    #[test]
    fn test_in_phase_overrides() {
        let err = DepylerError::unmappable(SourcePos::new(2, 5), "Unknown");
        let diags = Diagnostics::from_error(&err, None).in_phase(Phase::Codegen);
        assert_eq!(diags.diagnostics[0].phase, Phase::Codegen);
        assert!(diags.has_errors());
    }
}
