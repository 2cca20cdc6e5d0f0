use std::path::Path;

use depyler::diagnostics::{DiagnosticSeverity, Phase};
use depyler::{analyze_with_diagnostics, transpile_with_diagnostics, TranspileOptions};

fn failing(src: &str) -> depyler::diagnostics::Diagnostics {
    transpile_with_diagnostics(src, Some(Path::new("sample.py")), &TranspileOptions::default())
        .unwrap_err()
}

#[test]
fn test_parse_error_has_position() {
    let diags = failing("def f(:\n    pass\n");
    assert_eq!(diags.diagnostics.len(), 1);
    let d = &diags.diagnostics[0];
    assert_eq!(d.code, "DEPYLER-PARSE-ERROR");
    assert_eq!(d.phase, Phase::Parse);
    assert_eq!(d.span.line, 1);
    assert_eq!(d.span.file.as_deref(), Some("sample.py"));
}

#[test]
fn test_unsupported_syntax_reports_construct() {
    let diags = failing("x = 1\nmatch x:\n    case 1:\n        pass\n");
    let d = &diags.diagnostics[0];
    assert_eq!(d.code, "DEPYLER-UNSUPPORTED-SYNTAX");
    assert_eq!(d.phase, Phase::Lowering);
    assert_eq!(d.span.line, 2);
    assert!(d.message.contains("match statement"));
    assert!(matches!(d.severity, DiagnosticSeverity::Error));
}

#[test]
fn test_each_rejected_builtin() {
    for name in ["exec", "eval"] {
        let diags = failing(&format!("{name}('1')\n"));
        assert!(diags.diagnostics[0].message.contains(&format!("{name}()")));
    }
}

#[test]
fn test_unresolved_name() {
    let diags = failing("def f() -> int:\n    return nope\n");
    let d = &diags.diagnostics[0];
    assert_eq!(d.code, "DEPYLER-NAME-RESOLUTION");
    assert_eq!(d.span.line, 2);
    assert_eq!(d.meta.as_ref().unwrap()["name"], "nope");
}

#[test]
fn test_type_mismatch_is_inference_phase() {
    let diags = failing("def f(s: str) -> str:\n    return s + 1\n");
    let d = &diags.diagnostics[0];
    assert_eq!(d.code, "DEPYLER-UNMAPPABLE-TYPE");
    assert_eq!(d.phase, Phase::Inference);
}

#[test]
fn test_text_and_json_rendering() {
    let diags = failing("del x\n");
    let text = diags.to_text();
    assert!(text.starts_with("[DEPYLER-UNSUPPORTED-SYNTAX] sample.py:1:"));
    let json: serde_json::Value = serde_json::from_str(&diags.to_json()).unwrap();
    assert_eq!(json["diagnostics"][0]["meta"]["construct"], "del statement");
}

#[test]
fn test_analysis_success_returns_module() {
    let module = analyze_with_diagnostics("def f(x: int) -> int:\n    return x\n", None).unwrap();
    assert!(module.function("f").is_some());
}
