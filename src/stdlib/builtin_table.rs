//! 組み込み関数の宣言的定義テーブル
//!
//! 各組み込み関数の引数の数と戻り値型をここで定義する。
//! 実際の Rust コードへの展開規則は `emitter::builtin_gen` が持つ。

use crate::semantic::{join, Type};
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// 組み込み関数の展開形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    /// 値を返す通常の関数
    Value,
    /// 遅延イテレータを返す (range, enumerate, zip, map, filter, reversed, iter)
    Iterator,
    /// 型変換 (int, str, list, ...)
    Conversion,
    /// 標準入出力・ファイル
    Io,
}

/// 組み込み関数の仕様定義
#[derive(Debug)]
pub struct BuiltinSpec {
    pub name: &'static str,
    pub kind: BuiltinKind,
    pub min_args: usize,
    /// `None` は可変長
    pub max_args: Option<usize>,
    /// 戻り値の型を解決する純粋関数
    pub ret_ty_resolver: fn(args: &[Type]) -> Type,
}

impl BuiltinSpec {
    pub fn accepts(&self, argc: usize) -> bool {
        argc >= self.min_args && self.max_args.map_or(true, |m| argc <= m)
    }
}

fn first(args: &[Type]) -> Type {
    args.first().cloned().unwrap_or(Type::Unknown)
}

fn first_elem(args: &[Type]) -> Type {
    args.first().map(Type::element).unwrap_or(Type::Unknown)
}

/// min/max: 1 引数ならその要素、複数なら全引数の join
fn extremum(args: &[Type]) -> Type {
    match args {
        [] => Type::Unknown,
        [single] => single.element(),
        [a, rest @ ..] => rest.iter().fold(a.clone(), |acc, t| join(&acc, t)),
    }
}

/// 組み込み関数の登録リスト
pub const BUILTIN_SPECS: &[BuiltinSpec] = &[
    BuiltinSpec {
        name: "len",
        kind: BuiltinKind::Value,
        min_args: 1,
        max_args: Some(1),
        ret_ty_resolver: |_| Type::Int,
    },
    BuiltinSpec {
        name: "abs",
        kind: BuiltinKind::Value,
        min_args: 1,
        max_args: Some(1),
        ret_ty_resolver: |args| match first(args) {
            Type::Float => Type::Float,
            _ => Type::Int,
        },
    },
    BuiltinSpec {
        name: "min",
        kind: BuiltinKind::Value,
        min_args: 1,
        max_args: None,
        ret_ty_resolver: extremum,
    },
    BuiltinSpec {
        name: "max",
        kind: BuiltinKind::Value,
        min_args: 1,
        max_args: None,
        ret_ty_resolver: extremum,
    },
    BuiltinSpec {
        name: "sum",
        kind: BuiltinKind::Value,
        min_args: 1,
        max_args: Some(2),
        ret_ty_resolver: |args| match first_elem(args) {
            Type::Float => Type::Float,
            _ => Type::Int,
        },
    },
    BuiltinSpec {
        name: "any",
        kind: BuiltinKind::Value,
        min_args: 1,
        max_args: Some(1),
        ret_ty_resolver: |_| Type::Bool,
    },
    BuiltinSpec {
        name: "all",
        kind: BuiltinKind::Value,
        min_args: 1,
        max_args: Some(1),
        ret_ty_resolver: |_| Type::Bool,
    },
    BuiltinSpec {
        name: "sorted",
        kind: BuiltinKind::Value,
        min_args: 1,
        max_args: Some(1),
        ret_ty_resolver: |args| Type::list(first_elem(args)),
    },
    BuiltinSpec {
        name: "reversed",
        kind: BuiltinKind::Iterator,
        min_args: 1,
        max_args: Some(1),
        ret_ty_resolver: |args| Type::list(first_elem(args)),
    },
    BuiltinSpec {
        name: "enumerate",
        kind: BuiltinKind::Iterator,
        min_args: 1,
        max_args: Some(2),
        ret_ty_resolver: |args| Type::list(Type::Tuple(vec![Type::Int, first_elem(args)])),
    },
    BuiltinSpec {
        name: "zip",
        kind: BuiltinKind::Iterator,
        min_args: 2,
        max_args: Some(3),
        ret_ty_resolver: |args| Type::list(Type::Tuple(args.iter().map(Type::element).collect())),
    },
    BuiltinSpec {
        name: "map",
        kind: BuiltinKind::Iterator,
        min_args: 2,
        max_args: Some(2),
        ret_ty_resolver: |args| match first(args) {
            Type::Callable { ret, .. } => Type::list(*ret),
            _ => Type::list(Type::Unknown),
        },
    },
    BuiltinSpec {
        name: "filter",
        kind: BuiltinKind::Iterator,
        min_args: 2,
        max_args: Some(2),
        ret_ty_resolver: |args| Type::list(args.get(1).map(Type::element).unwrap_or(Type::Unknown)),
    },
    BuiltinSpec {
        name: "range",
        kind: BuiltinKind::Iterator,
        min_args: 1,
        max_args: Some(3),
        ret_ty_resolver: |_| Type::list(Type::Int),
    },
    BuiltinSpec {
        name: "iter",
        kind: BuiltinKind::Iterator,
        min_args: 1,
        max_args: Some(1),
        ret_ty_resolver: |args| Type::list(first_elem(args)),
    },
    BuiltinSpec {
        name: "next",
        kind: BuiltinKind::Value,
        min_args: 1,
        max_args: Some(2),
        ret_ty_resolver: |args| first_elem(args),
    },
    BuiltinSpec {
        name: "print",
        kind: BuiltinKind::Io,
        min_args: 0,
        max_args: None,
        ret_ty_resolver: |_| Type::None,
    },
    BuiltinSpec {
        name: "input",
        kind: BuiltinKind::Io,
        min_args: 0,
        max_args: Some(1),
        ret_ty_resolver: |_| Type::Str,
    },
    BuiltinSpec {
        name: "open",
        kind: BuiltinKind::Io,
        min_args: 1,
        max_args: Some(2),
        ret_ty_resolver: |_| Type::Native("io.File".to_string()),
    },
    BuiltinSpec {
        name: "int",
        kind: BuiltinKind::Conversion,
        min_args: 0,
        max_args: Some(2),
        ret_ty_resolver: |_| Type::Int,
    },
    BuiltinSpec {
        name: "float",
        kind: BuiltinKind::Conversion,
        min_args: 0,
        max_args: Some(1),
        ret_ty_resolver: |_| Type::Float,
    },
    BuiltinSpec {
        name: "str",
        kind: BuiltinKind::Conversion,
        min_args: 0,
        max_args: Some(1),
        ret_ty_resolver: |_| Type::Str,
    },
    BuiltinSpec {
        name: "bool",
        kind: BuiltinKind::Conversion,
        min_args: 0,
        max_args: Some(1),
        ret_ty_resolver: |_| Type::Bool,
    },
    BuiltinSpec {
        name: "list",
        kind: BuiltinKind::Conversion,
        min_args: 0,
        max_args: Some(1),
        ret_ty_resolver: |args| Type::list(first_elem(args)),
    },
    // tuple(...) は要素数が静的に分からないので Vec になる
    BuiltinSpec {
        name: "tuple",
        kind: BuiltinKind::Conversion,
        min_args: 0,
        max_args: Some(1),
        ret_ty_resolver: |args| Type::list(first_elem(args)),
    },
    BuiltinSpec {
        name: "set",
        kind: BuiltinKind::Conversion,
        min_args: 0,
        max_args: Some(1),
        ret_ty_resolver: |args| Type::set(first_elem(args)),
    },
    BuiltinSpec {
        name: "dict",
        kind: BuiltinKind::Conversion,
        min_args: 0,
        max_args: Some(1),
        ret_ty_resolver: |args| match first_elem(args) {
            Type::Tuple(kv) if kv.len() == 2 => Type::dict(kv[0].clone(), kv[1].clone()),
            _ => match first(args) {
                Type::Dict(k, v) => Type::Dict(k, v),
                _ => Type::dict(Type::Unknown, Type::Unknown),
            },
        },
    },
    BuiltinSpec {
        name: "hex",
        kind: BuiltinKind::Conversion,
        min_args: 1,
        max_args: Some(1),
        ret_ty_resolver: |_| Type::Str,
    },
    BuiltinSpec {
        name: "bin",
        kind: BuiltinKind::Conversion,
        min_args: 1,
        max_args: Some(1),
        ret_ty_resolver: |_| Type::Str,
    },
    BuiltinSpec {
        name: "oct",
        kind: BuiltinKind::Conversion,
        min_args: 1,
        max_args: Some(1),
        ret_ty_resolver: |_| Type::Str,
    },
    BuiltinSpec {
        name: "chr",
        kind: BuiltinKind::Conversion,
        min_args: 1,
        max_args: Some(1),
        ret_ty_resolver: |_| Type::Str,
    },
    BuiltinSpec {
        name: "ord",
        kind: BuiltinKind::Conversion,
        min_args: 1,
        max_args: Some(1),
        ret_ty_resolver: |_| Type::Int,
    },
    BuiltinSpec {
        name: "repr",
        kind: BuiltinKind::Conversion,
        min_args: 1,
        max_args: Some(1),
        ret_ty_resolver: |_| Type::Str,
    },
    BuiltinSpec {
        name: "format",
        kind: BuiltinKind::Conversion,
        min_args: 1,
        max_args: Some(2),
        ret_ty_resolver: |_| Type::Str,
    },
    BuiltinSpec {
        name: "isinstance",
        kind: BuiltinKind::Value,
        min_args: 2,
        max_args: Some(2),
        ret_ty_resolver: |_| Type::Bool,
    },
    // type(x) は型名の文字列に落とす
    BuiltinSpec {
        name: "type",
        kind: BuiltinKind::Value,
        min_args: 1,
        max_args: Some(1),
        ret_ty_resolver: |_| Type::Str,
    },
    BuiltinSpec {
        name: "round",
        kind: BuiltinKind::Value,
        min_args: 1,
        max_args: Some(2),
        ret_ty_resolver: |args| {
            if args.len() == 2 {
                Type::Float
            } else {
                Type::Int
            }
        },
    },
    BuiltinSpec {
        name: "divmod",
        kind: BuiltinKind::Value,
        min_args: 2,
        max_args: Some(2),
        ret_ty_resolver: |args| {
            let t = join(&first(args), &args.get(1).cloned().unwrap_or(Type::Int));
            Type::Tuple(vec![t.clone(), t])
        },
    },
    BuiltinSpec {
        name: "pow",
        kind: BuiltinKind::Value,
        min_args: 2,
        max_args: Some(3),
        ret_ty_resolver: |args| join(&first(args), &args.get(1).cloned().unwrap_or(Type::Int)),
    },
    BuiltinSpec {
        name: "hash",
        kind: BuiltinKind::Value,
        min_args: 1,
        max_args: Some(1),
        ret_ty_resolver: |_| Type::Int,
    },
];

pub static BUILTIN_MAP: Lazy<HashMap<&'static str, &'static BuiltinSpec>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for spec in BUILTIN_SPECS {
        map.insert(spec.name, spec);
    }
    map
});

/// 名前から仕様を取得する
pub fn get_builtin_spec(name: &str) -> Option<&'static BuiltinSpec> {
    BUILTIN_MAP.get(name).copied()
}

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_MAP.contains_key(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_builtins_registered() {
        for name in [
            "len", "abs", "min", "max", "sum", "any", "all", "sorted", "reversed", "enumerate",
            "zip", "map", "filter", "range", "print", "input", "int", "float", "str", "bool",
            "list", "dict", "set", "tuple", "hex", "chr", "ord", "isinstance", "type",
        ] {
            assert!(is_builtin(name), "{name} missing");
        }
    }

    #[test]
    fn test_resolvers() {
        let sum = get_builtin_spec("sum").unwrap();
        assert_eq!((sum.ret_ty_resolver)(&[Type::list(Type::Float)]), Type::Float);
        let max = get_builtin_spec("max").unwrap();
        assert_eq!((max.ret_ty_resolver)(&[Type::Int, Type::Float]), Type::Float);
        assert_eq!((max.ret_ty_resolver)(&[Type::list(Type::Str)]), Type::Str);
        let e = get_builtin_spec("enumerate").unwrap();
        assert_eq!(
            (e.ret_ty_resolver)(&[Type::list(Type::Str)]),
            Type::list(Type::Tuple(vec![Type::Int, Type::Str]))
        );
    }

    #[test]
    fn test_arity() {
        let range = get_builtin_spec("range").unwrap();
        assert!(range.accepts(1) && range.accepts(3));
        assert!(!range.accepts(0) && !range.accepts(4));
        assert!(get_builtin_spec("print").unwrap().accepts(7));
    }
}
