//! Built-in function typing
//!
//! 組み込み関数の戻り値型 (宣言テーブル `stdlib::builtin_table` の resolver) と、
//! `map(lambda x: ..., xs)` のようにラムダ引数の型を周囲の引数から決める規則。

use super::types::{join, Type};
use crate::hir::{HirExpr, HirExprKind};
use crate::stdlib;

/// 組み込み呼び出しの戻り値型
///
/// テーブルの resolver に加えて、キーワード引数や引数型に依存する形をここで補う。
pub fn builtin_call_type(name: &str, args: &[Type], kwargs: &[(String, Type)]) -> Type {
    match name {
        // dict(a=1, b=2) / dict(pairs)
        "dict" => {
            if let Some(value) = kwargs.iter().map(|(_, t)| t.clone()).reduce(|a, b| join(&a, &b))
            {
                return Type::dict(Type::Str, value);
            }
            match args.first() {
                Some(Type::Dict(k, v)) => Type::dict((**k).clone(), (**v).clone()),
                Some(other) => match other.element() {
                    Type::Tuple(items) if items.len() == 2 => {
                        Type::dict(items[0].clone(), items[1].clone())
                    }
                    _ => Type::dict(Type::Unknown, Type::Unknown),
                },
                None => Type::dict(Type::Unknown, Type::Unknown),
            }
        }
        // map(f, xs): f の戻り値
        "map" => match args.first() {
            Some(Type::Callable { ret, .. }) => Type::list((**ret).clone()),
            _ => Type::list(Type::Unknown),
        },
        // sum(xs, start)
        "sum" if args.len() == 2 => {
            let elem = args[0].element();
            match (&elem, &args[1]) {
                (Type::List(_), _) => elem.clone(),
                (Type::Float, s) | (s, Type::Float) if s.is_numeric() => Type::Float,
                (e, s) if e.is_numeric() && s.is_numeric() => Type::Int,
                _ => resolve(name, args),
            }
        }
        "round" if args.len() == 1 => Type::Int,
        // next(it, default)
        "next" => match args {
            [it] => it.element(),
            [it, default] => join(&it.element(), default),
            _ => Type::Unknown,
        },
        _ => resolve(name, args),
    }
}

fn resolve(name: &str, args: &[Type]) -> Type {
    stdlib::get_builtin_spec(name)
        .map(|spec| (spec.ret_ty_resolver)(args))
        .unwrap_or(Type::Unknown)
}

/// 値として渡された組み込み型名 (`defaultdict(list)`) が作る値の型
pub fn factory_type(name: &str) -> Option<Type> {
    let ty = match name {
        "list" => Type::list(Type::Unknown),
        "dict" => Type::dict(Type::Unknown, Type::Unknown),
        "set" => Type::set(Type::Unknown),
        "int" => Type::Int,
        "float" => Type::Float,
        "str" => Type::Str,
        "bool" => Type::Bool,
        _ => return None,
    };
    Some(ty)
}

/// Parameter types for a lambda passed as argument `index` (or keyword `key`)
///
/// `arg_types` are the already-inferred types of the other positional
/// arguments; the lambda's own slot is `Unknown`.
pub fn lambda_param_types(
    func: &str,
    index: Option<usize>,
    key: Option<&str>,
    arg_types: &[Type],
    arity: usize,
) -> Vec<Type> {
    let elem = |i: usize| arg_types.get(i).map(Type::element).unwrap_or(Type::Unknown);
    let single = match (func, index, key) {
        ("map" | "filter", Some(0), _) => {
            // map(f, a, b) は f(a_i, b_i)
            if arity > 1 {
                return (1..=arity).map(elem).collect();
            }
            elem(1)
        }
        ("sorted" | "min" | "max" | "list.sort", _, Some("key")) => elem(0),
        ("functools.reduce", Some(0), _) => {
            let e = elem(1);
            return vec![e.clone(), e];
        }
        (
            "itertools.takewhile" | "itertools.dropwhile" | "itertools.filterfalse",
            Some(0),
            _,
        ) => elem(1),
        ("itertools.groupby", _, Some("key")) => elem(0),
        _ => Type::Unknown,
    };
    vec![single; arity.max(1)]
}

/// One `parser.add_argument(...)` call, normalized
#[derive(Debug, Clone, PartialEq)]
pub struct ArgparseArg {
    /// `Args` のフィールド名 (`--dry-run` → `dry_run`)
    pub field: String,
    pub long: Option<String>,
    pub short: Option<char>,
    pub positional: bool,
    pub ty: Type,
    pub help: Option<String>,
    pub default: Option<HirExpr>,
    /// `action="store_true"`
    pub flag: bool,
    pub count: bool,
}

fn str_literal(expr: &HirExpr) -> Option<&str> {
    match &expr.kind {
        HirExprKind::Str { value, .. } => Some(value),
        _ => None,
    }
}

/// `add_argument` の引数を解釈する
///
/// 名前がリテラルでない呼び出しは `None`。
pub fn argparse_argument(args: &[HirExpr], kwargs: &[(String, HirExpr)]) -> Option<ArgparseArg> {
    let names: Vec<&str> = args.iter().map(str_literal).collect::<Option<_>>()?;
    let kw = |key: &str| kwargs.iter().find(|(k, _)| k == key).map(|(_, v)| v);
    let long = names
        .iter()
        .find(|n| n.starts_with("--"))
        .map(|n| n.trim_start_matches('-').to_string());
    let short = names
        .iter()
        .find(|n| n.starts_with('-') && !n.starts_with("--"))
        .and_then(|n| n.chars().nth(1));
    let positional = names.first().map_or(false, |n| !n.starts_with('-'));
    let field = match kw("dest").and_then(str_literal) {
        Some(dest) => dest.to_string(),
        None => {
            let raw = if positional {
                names.first().copied()?.to_string()
            } else {
                long.clone().or_else(|| short.map(String::from))?
            };
            raw.replace('-', "_")
        }
    };

    let action = kw("action").and_then(str_literal);
    let flag = matches!(action, Some("store_true") | Some("store_false"));
    let count = action == Some("count");
    let default = kw("default").cloned();
    let base = match kw("type").and_then(HirExpr::as_name) {
        Some("int") => Type::Int,
        Some("float") => Type::Float,
        Some(_) => Type::Str,
        None => match default.as_ref().map(|d| &d.kind) {
            Some(HirExprKind::Int { .. }) => Type::Int,
            Some(HirExprKind::Float { .. }) => Type::Float,
            _ => Type::Str,
        },
    };
    let multiple = match kw("nargs").map(|n| &n.kind) {
        Some(HirExprKind::Str { value, .. }) => value == "+" || value == "*",
        Some(HirExprKind::Int { value, .. }) => *value > 1,
        _ => false,
    };
    let required = matches!(kw("required").map(|r| &r.kind), Some(HirExprKind::Bool(true)));
    let ty = if flag {
        Type::Bool
    } else if count {
        Type::Int
    } else if multiple {
        Type::list(base)
    } else if positional || required || default.is_some() {
        base
    } else {
        Type::optional(base)
    };
    Some(ArgparseArg {
        field,
        long,
        short,
        positional,
        ty,
        help: kw("help").and_then(str_literal).map(str::to_string),
        default,
        flag,
        count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dict_from_kwargs() {
        let t = builtin_call_type("dict", &[], &[("a".to_string(), Type::Int)]);
        assert_eq!(t, Type::dict(Type::Str, Type::Int));
    }

    #[test]
    fn test_table_fallback() {
        assert_eq!(builtin_call_type("len", &[Type::Str], &[]), Type::Int);
        assert_eq!(
            builtin_call_type("sorted", &[Type::list(Type::Str)], &[]),
            Type::list(Type::Str)
        );
    }

    #[test]
    fn test_map_uses_callable_ret() {
        let f = Type::Callable {
            params: vec![Type::Int],
            ret: Box::new(Type::Str),
        };
        assert_eq!(
            builtin_call_type("map", &[f, Type::list(Type::Int)], &[]),
            Type::list(Type::Str)
        );
    }

    #[test]
    fn test_lambda_params() {
        let xs = Type::list(Type::Float);
        assert_eq!(
            lambda_param_types("map", Some(0), None, &[Type::Unknown, xs.clone()], 1),
            vec![Type::Float]
        );
        assert_eq!(
            lambda_param_types("sorted", None, Some("key"), &[xs], 1),
            vec![Type::Float]
        );
        assert_eq!(
            lambda_param_types("print", Some(0), None, &[], 1),
            vec![Type::Unknown]
        );
    }

    fn s(v: &str) -> HirExpr {
        HirExpr::new(
            HirExprKind::Str {
                value: v.to_string(),
                raw: false,
            },
            crate::hir::SourcePos::new(1, 1),
        )
    }

    #[test]
    fn test_argparse_flag_and_optional() {
        let arg = argparse_argument(
            &[s("-v"), s("--verbose")],
            &[("action".to_string(), s("store_true"))],
        )
        .unwrap();
        assert_eq!(arg.field, "verbose");
        assert_eq!(arg.short, Some('v'));
        assert!(arg.flag);
        assert_eq!(arg.ty, Type::Bool);

        let arg = argparse_argument(&[s("--out-dir")], &[]).unwrap();
        assert_eq!(arg.field, "out_dir");
        assert_eq!(arg.ty, Type::optional(Type::Str));
    }

    #[test]
    fn test_argparse_positional_list() {
        let arg = argparse_argument(&[s("files")], &[("nargs".to_string(), s("+"))]).unwrap();
        assert!(arg.positional);
        assert_eq!(arg.ty, Type::list(Type::Str));
    }
}
