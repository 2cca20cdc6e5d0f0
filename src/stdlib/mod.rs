//! Stdlib mapping registry
//!
//! Python の標準ライブラリ呼び出しと Rust 側の置換テンプレートの静的テーブル。
//! 構築後は不変。
//!
//! ## テンプレートのプレースホルダ
//! - `{0}` 所有値 / `{s0}` `&str` / `{f0}` `f64` / `{i0}` `i64` / `{u0}` `usize`
//! - `{r0}` 参照 / `{k0}` マップ検索キー / `{p0}` 生成コードそのまま
//! - `{it0}` 所有要素のイテレータ / `{v0}` スライス化できる値
//! - `{recv}` レシーバ / `{srecv}` `&str` としてのレシーバ / `{args}` 全引数
//!
//! 省略可能な引数は `"name=default"` と書き、未指定のときは default のコードを使う。

pub mod builtin_table;
pub mod exceptions;
pub mod method_table;
pub mod module_table;

use crate::manifest::Dependency;
use crate::semantic::Type;
use once_cell::sync::Lazy;
use std::collections::HashMap;

pub use builtin_table::{get_builtin_spec, is_builtin, BuiltinSpec, BUILTIN_SPECS};
pub use exceptions::ErrorTaxon;
pub use method_table::{
    lookup_attribute, lookup_method, mutating_families, Family, MethodSpec, METHOD_SPECS,
};
pub use module_table::{StdlibSpec, MODULE_SPECS};

/// Registry entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Function,
    Constant,
    /// Lowered by dedicated code generation (argparse, asyncio.gather)
    Special,
}

/// One declared parameter of a mapped function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec<'a> {
    pub name: &'a str,
    pub default: Option<&'a str>,
}

/// `"name=default"` → ParamSpec
pub fn parse_param(raw: &str) -> ParamSpec<'_> {
    match raw.split_once('=') {
        Some((name, default)) => ParamSpec {
            name,
            default: Some(default),
        },
        None => ParamSpec {
            name: raw,
            default: None,
        },
    }
}

/// `(required, max)`; `max == None` for variadic `"*"`
pub fn arity(params: &[&str]) -> (usize, Option<usize>) {
    if params.contains(&"*") {
        return (0, None);
    }
    let required = params
        .iter()
        .filter(|p| parse_param(p).default.is_none())
        .count();
    (required, Some(params.len()))
}

fn accepts(params: &[&str], argc: usize) -> bool {
    let (required, max) = arity(params);
    argc >= required && max.map_or(true, |m| argc <= m)
}

static MODULE_INDEX: Lazy<HashMap<&'static str, Vec<&'static StdlibSpec>>> = Lazy::new(|| {
    let mut index: HashMap<&'static str, Vec<&'static StdlibSpec>> = HashMap::new();
    for spec in MODULE_SPECS {
        index.entry(spec.path).or_default().push(spec);
    }
    index
});

/// Modules whose members the registry (or dedicated lowering) knows
pub const KNOWN_MODULES: &[&str] = &[
    "math",
    "os",
    "os.path",
    "os.environ",
    "sys",
    "re",
    "json",
    "base64",
    "hashlib",
    "time",
    "random",
    "subprocess",
    "pathlib",
    "collections",
    "itertools",
    "functools",
    "datetime",
    "asyncio",
    "argparse",
    "string",
    "copy",
    "statistics",
    // 型注釈・デコレータのみ
    "typing",
    "dataclasses",
    "__future__",
];

pub fn is_known_module(module: &str) -> bool {
    KNOWN_MODULES.contains(&module)
}

/// Modules that exist only for annotations and produce no Rust `use`
pub fn is_annotation_module(module: &str) -> bool {
    matches!(module, "typing" | "dataclasses" | "__future__" | "collections.abc")
}

/// Function entry for `path` accepting `argc` positional arguments
pub fn lookup_function(path: &str, argc: usize) -> Option<&'static StdlibSpec> {
    MODULE_INDEX.get(path)?.iter().copied().find(|spec| {
        matches!(spec.kind, EntryKind::Function | EntryKind::Special) && accepts(spec.params, argc)
    })
}

/// Any function entry for `path`, regardless of arity
pub fn has_function(path: &str) -> bool {
    MODULE_INDEX
        .get(path)
        .map_or(false, |specs| specs.iter().any(|s| s.kind != EntryKind::Constant))
}

pub fn lookup_constant(path: &str) -> Option<&'static StdlibSpec> {
    MODULE_INDEX
        .get(path)?
        .iter()
        .copied()
        .find(|spec| spec.kind == EntryKind::Constant)
}

/// Dependency required by a registered path
pub fn dependency_of(path: &str) -> Option<Dependency> {
    MODULE_INDEX.get(path)?.iter().find_map(|s| s.dependency)
}

/// Rust spelling of a registry-known library type
pub fn native_rust_type(name: &str) -> Option<&'static str> {
    let ty = match name {
        "re.Pattern" => "regex::Regex",
        "re.Match" => "regex::Captures<'_>",
        "json.Value" => "serde_json::Value",
        "hashlib.Hash" => "Vec<u8>",
        "datetime.datetime" => "chrono::NaiveDateTime",
        "datetime.date" => "chrono::NaiveDate",
        "datetime.timedelta" => "chrono::Duration",
        "io.File" => "std::fs::File",
        "subprocess.CompletedProcess" => "std::process::Output",
        "pathlib.Path" => "std::path::PathBuf",
        "argparse.Namespace" => "Args",
        "DynError" => "DynError",
        _ => return None,
    };
    Some(ty)
}

/// Dependency needed to name a native type
pub fn native_dependency(name: &str) -> Option<Dependency> {
    match name {
        "re.Pattern" | "re.Match" => Some(Dependency::Regex),
        "json.Value" => Some(Dependency::SerdeJson),
        "datetime.datetime" | "datetime.date" | "datetime.timedelta" => Some(Dependency::Chrono),
        "argparse.Namespace" => Some(Dependency::Clap),
        _ => None,
    }
}

/// Annotation spelling of library types (`re.Pattern`, `Path`)
pub fn native_type_for_hint(name: &str) -> Option<Type> {
    let native = match name {
        "re.Pattern" | "Pattern" => "re.Pattern",
        "re.Match" | "Match" => "re.Match",
        "Path" | "pathlib.Path" => "pathlib.Path",
        "datetime" | "datetime.datetime" => "datetime.datetime",
        "date" | "datetime.date" => "datetime.date",
        "timedelta" | "datetime.timedelta" => "datetime.timedelta",
        "argparse.Namespace" | "Namespace" => "argparse.Namespace",
        _ => return None,
    };
    Some(Type::Native(native.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_arity() {
        let one = lookup_function("math.log", 1).unwrap();
        assert!(one.template.contains("ln()"));
        let two = lookup_function("math.log", 2).unwrap();
        assert!(two.template.contains(".log("));
        assert!(lookup_function("math.log", 3).is_none());
    }

    #[test]
    fn test_findall_requires_regex() {
        let spec = lookup_function("re.findall", 2).unwrap();
        assert_eq!(spec.dependency, Some(Dependency::Regex));
        let ret = (spec.ret_ty_resolver)(&[Type::Str, Type::Str]);
        assert_eq!(ret, Type::list(Type::Str));
    }

    #[test]
    fn test_constants() {
        let pi = lookup_constant("math.pi").unwrap();
        assert_eq!(pi.template, "std::f64::consts::PI");
        assert!(lookup_function("math.pi", 0).is_none());
    }

    #[test]
    fn test_optional_params() {
        assert_eq!(arity(&["x", "base=10"]), (1, Some(2)));
        assert_eq!(arity(&["*"]), (0, None));
        let p = parse_param("exist_ok=false");
        assert_eq!(p.name, "exist_ok");
        assert_eq!(p.default, Some("false"));
    }

    #[test]
    fn test_native_types() {
        assert_eq!(native_rust_type("re.Pattern"), Some("regex::Regex"));
        assert_eq!(native_dependency("datetime.date"), Some(Dependency::Chrono));
        assert!(native_rust_type("numpy.ndarray").is_none());
    }
}
