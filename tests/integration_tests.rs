//! Integration tests for the Depyler transpiler
//!
//! Python ソースから公開 API (`transpile`) を通して Rust コードを確かめる。

use depyler::{transpile, transpile_with_options, CrateRole, Dependency, ErrorTaxon, TranspileOptions};

fn rust(src: &str) -> String {
    transpile(src).unwrap().rust_code
}

/// `fn name(...` (ジェネリクスなら `fn name<..>(`) から対応する閉じ括弧までの本体
fn function_text<'a>(code: &'a str, name: &str) -> &'a str {
    let start = code
        .find(&format!("fn {name}("))
        .or_else(|| code.find(&format!("fn {name}<")))
        .unwrap_or_else(|| panic!("fn {name} not found in:\n{code}"));
    let rest = &code[start..];
    let mut depth = 0usize;
    for (i, c) in rest.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return &rest[..=i];
                }
            }
            _ => {}
        }
    }
    rest
}

// --- end-to-end scenarios ---

/// Python:
/// def add(x: int, y: int) -> int:
///     return x + y
#[test]
fn test_add_function() {
    let out = transpile("def add(x: int, y: int) -> int:\n    return x + y").unwrap();
    let f = function_text(&out.rust_code, "add");
    assert!(f.starts_with("fn add(x: i64, y: i64) -> i64"));
    assert!(f.contains("x + y"));
    assert!(out.dependencies.is_empty());
}

#[test]
fn test_word_frequency_map() {
    let src = "def freq(items: list) -> dict:\n    d = {}\n    for x in items:\n        d[x] = d.get(x, 0) + 1\n    return d";
    let out = transpile(src).unwrap();
    let f = function_text(&out.rust_code, "freq");
    assert!(f.contains("HashMap"));
    assert!(f.contains("let mut d"));
    assert!(f.contains("unwrap_or(0)"));
    assert!(out.dependencies.contains(&Dependency::HashMap));
    assert!(out.rust_code.contains("use std::collections::HashMap;"));
}

#[test]
fn test_regex_findall() {
    let src = "import re\ndef find_ints(s: str) -> list:\n    return re.findall(r\"\\d+\", s)";
    let out = transpile(src).unwrap();
    let f = function_text(&out.rust_code, "find_ints");
    assert!(f.contains("-> Vec<String>"));
    assert!(f.contains("regex::Regex::new"));
    assert!(out.dependencies.contains(&Dependency::Regex));
    let manifest = out.manifest("find_ints", CrateRole::Binary);
    assert!(manifest.contains("regex = \"1.10\""));
}

#[test]
fn test_isinstance_sum_type() {
    let src = "def classify(x):\n    if isinstance(x, int):\n        return \"int\"\n    if isinstance(x, str):\n        return \"str\"\n    return \"other\"";
    let code = rust(src);
    assert!(code.contains("pub enum IntOrStr {"));
    assert!(code.contains("impl From<i64> for IntOrStr"));
    // 2 つのメンバと受け皿
    assert!(code.contains("    Other(String),"));
    let f = function_text(&code, "classify");
    assert!(f.contains("IntOrStr"));
    assert!(f.contains("-> String"));
}

#[test]
fn test_generator_state_machine() {
    let src = "def count_up(n: int):\n    i = 0\n    while i < n:\n        yield i\n        i += 1";
    let code = rust(src);
    let f = function_text(&code, "count_up");
    assert!(f.contains("-> impl Iterator<Item = i64>"));
    assert!(f.contains("let mut _state: usize = 0;"));
    assert!(f.contains("'gen: loop {"));
    assert!(f.contains("match _state {"));
    assert!(f.contains("return Some(i);"));
    assert!(f.contains("_ => return None,"));
    assert!(!f.contains("_out"));
}

#[test]
fn test_caught_zero_division() {
    let src = "def safe(x):\n    try:\n        return 1 / x\n    except ZeroDivisionError:\n        return 0";
    let out = transpile(src).unwrap();
    let f = function_text(&out.rust_code, "safe");
    assert!(!f.contains("Result<"));
    assert!(f.contains("if _d == 0.0"));
    assert!(out.error_types.contains(&ErrorTaxon::ZeroDivisionError));
    assert!(out.rust_code.contains("pub struct ZeroDivisionError"));
}

// --- boundary behaviours ---

#[test]
fn test_floor_division_follows_python() {
    let code = rust("def q(a: int, b: int) -> int:\n    return a // b\ndef r(a: int, b: int) -> int:\n    return a % b\n");
    assert!(function_text(&code, "q").contains("py_floor_div(a, b)"));
    assert!(function_text(&code, "r").contains("py_mod(a, b)"));
    // 余りの符号は除数に従う
    let helper = function_text(&code, "py_mod");
    assert!(helper.contains("(r < 0) != (b < 0)"));
    assert!(helper.contains("r + b"));
}

#[test]
fn test_negative_index() {
    let code = rust("def last(xs: list[int]) -> int:\n    return xs[-1]\n");
    assert!(function_text(&code, "last").contains("xs.len() - 1"));
}

#[test]
fn test_chained_comparison_binds_middle_once() {
    let src = "def mid() -> int:\n    return 5\ndef between(a: int, c: int) -> bool:\n    return a < mid() < c\n";
    let code = rust(src);
    let f = function_text(&code, "between");
    assert_eq!(f.matches("mid()").count(), 1);
    assert!(f.contains("_cmp_"));
}

#[test]
fn test_mutable_default_evaluated_per_call() {
    let src = "def add(x: int, acc: list[int] = []) -> list[int]:\n    acc.append(x)\n    return acc\nprint(add(1))\nprint(add(2))\n";
    let code = rust(src);
    assert!(!code.contains("static"));
    let main = function_text(&code, "main");
    assert_eq!(main.matches("Vec::new()").count(), 2);
}

#[test]
fn test_fstring_fragments_in_order() {
    let src = "def a() -> int:\n    return 1\ndef b() -> int:\n    return 2\ndef show() -> str:\n    return f\"{a()}-{b()}\"\n";
    let code = rust(src);
    let f = function_text(&code, "show");
    let ia = f.find("a()").unwrap();
    let ib = f.find("b()").unwrap();
    assert!(ia < ib);
    assert_eq!(f.matches("a()").count(), 1);
    assert_eq!(f.matches("b()").count(), 1);
}

#[test]
fn test_with_exit_runs_on_every_path() {
    let src = "class Res:\n    def __enter__(self):\n        return self\n    def __exit__(self, a, b, c):\n        print(\"closed\")\n\ndef guarded(flag: bool) -> int:\n    with Res() as r:\n        if flag:\n            return 1\n    return 0\n";
    let code = rust(src);
    let f = function_text(&code, "guarded");
    // return の前と本体の末尾
    assert_eq!(f.matches(".__exit__(").count(), 2);
}

// --- options and properties ---

#[test]
fn test_library_output() {
    let options = TranspileOptions {
        crate_role: CrateRole::Library,
        emit_docs: false,
    };
    let out = transpile_with_options("def double(x: int) -> int:\n    return x * 2\n", &options).unwrap();
    assert!(out.rust_code.contains("pub fn double(x: i64) -> i64"));
    assert!(!out.rust_code.contains("fn main()"));
    assert!(out.manifest("double", CrateRole::Library).contains("[lib]"));
}

#[test]
fn test_binary_without_statements_gets_empty_main() {
    let code = rust("def f() -> int:\n    return 1\n");
    assert!(code.contains("fn main() {"));
}

#[test]
fn test_transpile_is_idempotent() {
    let src = "import re\nfrom dataclasses import dataclass\n\n@dataclass\nclass Item:\n    name: str\n    qty: int\n\ndef total(items: list[Item]) -> int:\n    return sum(i.qty for i in items)\n\ndef words(s: str) -> list[str]:\n    return re.findall(r\"\\w+\", s)\n";
    let a = transpile(src).unwrap();
    let b = transpile(src).unwrap();
    assert_eq!(a.rust_code, b.rust_code);
    assert_eq!(a.dependencies, b.dependencies);
}

#[test]
fn test_dependencies_appear_in_code() {
    let src = "import re\nimport json\ndef f(s: str) -> list[str]:\n    return re.findall(r\"a\", s)\n";
    let out = transpile(src).unwrap();
    for dep in &out.dependencies {
        let marker = match dep {
            Dependency::Regex => "regex::",
            Dependency::SerdeJson => "serde_json::",
            Dependency::HashMap => "HashMap",
            Dependency::HashSet => "HashSet",
            _ => continue,
        };
        assert!(out.rust_code.contains(marker), "{dep:?} flagged but unused");
    }
    assert!(!out.dependencies.contains(&Dependency::SerdeJson));
}

#[test]
fn test_unsupported_construct_is_an_error() {
    let err = transpile("x = [1, 2]\ndel x[0]\n").unwrap_err();
    assert!(matches!(err, depyler::DepylerError::UnsupportedSyntax { .. }));
}
