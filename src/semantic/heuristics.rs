//! Heuristic type resolution
//!
//! 注釈も呼び出し側の証拠もない場合の最後の手段。
//! 型注釈と呼び出しグラフからの伝播が常に優先する。

use super::Type;
use crate::stdlib::{method_table::method_families, mutating_families};

/// 文字列とみなす変数名
const STRING_NAMES: &[&str] = &[
    "key",
    "name",
    "id",
    "word",
    "text",
    "prefix",
    "suffix",
    "pattern",
    "delimiter",
    "separator",
    "char",
];

const STRING_SUFFIXES: &[&str] = &["_str", "_text", "_name", "_key"];

const INDEX_NAMES: &[&str] = &["i", "j", "k", "idx", "index"];

const INDEX_SUFFIXES: &[&str] = &["_idx", "_index"];

/// 名前だけから決まる型 (文字列系の名前)
pub fn type_from_name(name: &str) -> Option<Type> {
    if STRING_NAMES.contains(&name) || STRING_SUFFIXES.iter().any(|s| name.ends_with(s)) {
        return Some(Type::Str);
    }
    None
}

/// 添字位置で使われたときに整数とみなす名前
pub fn is_index_name(name: &str) -> bool {
    INDEX_NAMES.contains(&name) || INDEX_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// Container family nominated by a method name
///
/// A mutating method unique to one family wins; otherwise any method defined
/// by exactly one family.
pub fn unique_method_family(method: &str) -> Option<Type> {
    let mutating = mutating_families(method);
    if mutating.len() == 1 {
        return Some(mutating[0].representative());
    }
    if !mutating.is_empty() {
        return None;
    }
    let families = method_families(method);
    match families.as_slice() {
        [only] => Some(only.representative()),
        _ => None,
    }
}

/// `isinstance(x, int)` の第 2 引数の名前 → 型
pub fn isinstance_type(name: &str, is_class: bool) -> Option<Type> {
    let ty = match name {
        "int" => Type::Int,
        "float" => Type::Float,
        "str" => Type::Str,
        "bool" => Type::Bool,
        "bytes" => Type::Bytes,
        "list" => Type::list(Type::Unknown),
        "dict" => Type::dict(Type::Unknown, Type::Unknown),
        "set" => Type::set(Type::Unknown),
        "tuple" => Type::list(Type::Unknown),
        other if is_class => Type::Class(other.to_string()),
        _ => return None,
    };
    Some(ty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_names() {
        assert_eq!(type_from_name("word"), Some(Type::Str));
        assert_eq!(type_from_name("user_name"), Some(Type::Str));
        assert_eq!(type_from_name("count"), None);
    }

    #[test]
    fn test_index_names() {
        assert!(is_index_name("i"));
        assert!(is_index_name("row_idx"));
        assert!(!is_index_name("items"));
    }

    #[test]
    fn test_unique_family() {
        assert_eq!(unique_method_family("append"), Some(Type::list(Type::Unknown)));
        assert_eq!(unique_method_family("add"), Some(Type::set(Type::Unknown)));
        assert_eq!(unique_method_family("upper"), Some(Type::Str));
        // pop は list/dict/set で曖昧
        assert_eq!(unique_method_family("pop"), None);
    }

    #[test]
    fn test_isinstance_names() {
        assert_eq!(isinstance_type("int", false), Some(Type::Int));
        assert_eq!(
            isinstance_type("Point", true),
            Some(Type::Class("Point".to_string()))
        );
        assert_eq!(isinstance_type("Point", false), None);
    }
}
