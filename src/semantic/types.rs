//! Type definitions
//!
//! Python の意味型と、その束 (join / 正規化 / ハッシュ可能性)。
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic types
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Type {
    Int,                        // i64
    Float,                      // f64
    Bool,                       // bool
    Str,                        // String / &str
    Bytes,                      // Vec<u8> / &[u8]
    None,                       // ()
    List(Box<Type>),            // Vec<T>
    Tuple(Vec<Type>),           // (T, U, ...)
    Dict(Box<Type>, Box<Type>), // HashMap<K, V>
    Set(Box<Type>),             // HashSet<T>
    Optional(Box<Type>),        // Option<T>
    /// 正規化済みでは None も Optional も含まない
    Union(Vec<Type>),
    Callable {
        params: Vec<Type>,
        ret: Box<Type>,
    },
    /// User-defined class
    Class(String),
    /// 型パラメータ (T, U, ...)
    Generic(String),
    /// Library type known to the stdlib registry (`re.Pattern`)
    Native(String),
    #[default]
    Unknown,
}

/// Join grouping key: members in the same group fuse
#[derive(PartialEq)]
enum Group<'a> {
    Numeric,
    Str,
    Bytes,
    List,
    Dict,
    Set,
    Tuple(usize),
    Callable(&'a Type),
    Named(&'a Type),
}

impl Type {
    pub fn list(elem: Type) -> Self {
        Type::List(Box::new(elem))
    }

    pub fn dict(key: Type, value: Type) -> Self {
        Type::Dict(Box::new(key), Box::new(value))
    }

    pub fn set(elem: Type) -> Self {
        Type::Set(Box::new(elem))
    }

    pub fn optional(inner: Type) -> Self {
        join(&inner, &Type::None)
    }

    /// Convert a Python type hint name to a semantic type
    pub fn from_python_hint(name: &str, params: &[Type]) -> Self {
        let first = || params.first().cloned().unwrap_or(Type::Unknown);
        match name {
            "int" => Type::Int,
            "float" => Type::Float,
            "bool" => Type::Bool,
            "str" => Type::Str,
            "bytes" | "bytearray" => Type::Bytes,
            "None" | "NoneType" => Type::None,
            "list" | "List" | "Sequence" | "Iterable" | "Iterator" | "Generator"
            | "deque" | "Deque" => Type::list(first()),
            "set" | "Set" | "frozenset" | "FrozenSet" => Type::set(first()),
            "dict" | "Dict" | "Mapping" | "DefaultDict" | "defaultdict" | "OrderedDict"
            | "Counter" => {
                let value = if name == "Counter" {
                    Type::Int
                } else {
                    params.get(1).cloned().unwrap_or(Type::Unknown)
                };
                Type::dict(first(), value)
            }
            "tuple" | "Tuple" => {
                if params.is_empty() {
                    Type::list(Type::Unknown)
                } else {
                    Type::Tuple(params.to_vec())
                }
            }
            "Optional" => Type::optional(first()),
            "Union" => params
                .iter()
                .fold(None, |acc: Option<Type>, t| {
                    Some(match acc {
                        Some(a) => join(&a, t),
                        None => normalize(t),
                    })
                })
                .unwrap_or(Type::Unknown),
            // Callable[[A, B], R]: the bracketed list arrives as a Tuple
            "Callable" => {
                let params_ty = match params.first() {
                    Some(Type::Tuple(items)) => items.clone(),
                    Some(Type::None) | None => Vec::new(),
                    Some(other) => vec![other.clone()],
                };
                Type::Callable {
                    params: params_ty,
                    ret: Box::new(params.get(1).cloned().unwrap_or(Type::None)),
                }
            }
            "Any" | "object" => Type::Unknown,
            // TypeVar 名は 1 文字の大文字
            n if n.len() == 1 && n.chars().all(|c| c.is_ascii_uppercase()) => {
                Type::Generic(n.to_string())
            }
            n if n.contains('.') => Type::Native(n.to_string()),
            n if n.chars().next().map(|c| c.is_uppercase()).unwrap_or(false) => {
                Type::Class(n.to_string())
            }
            _ => Type::Unknown,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Type::Unknown)
    }

    /// Unknown anywhere inside the type
    pub fn contains_unknown(&self) -> bool {
        match self {
            Type::Unknown => true,
            Type::List(t) | Type::Set(t) | Type::Optional(t) => t.contains_unknown(),
            Type::Dict(k, v) => k.contains_unknown() || v.contains_unknown(),
            Type::Tuple(items) | Type::Union(items) => items.iter().any(Type::contains_unknown),
            Type::Callable { params, ret } => {
                params.iter().any(Type::contains_unknown) || ret.contains_unknown()
            }
            _ => false,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Float | Type::Bool)
    }

    /// Distinct borrow form exists (`&str`, `&[u8]`, `&[T]`, `&HashMap`, `&HashSet`)
    pub fn has_borrow_form(&self) -> bool {
        matches!(
            self,
            Type::Str | Type::Bytes | Type::List(_) | Type::Dict(_, _) | Type::Set(_)
        )
    }

    /// Rust 側で Copy になる型
    pub fn is_copy(&self) -> bool {
        match self {
            Type::Int | Type::Float | Type::Bool | Type::None => true,
            Type::Tuple(items) => items.iter().all(Type::is_copy),
            _ => false,
        }
    }

    /// Element type produced by iterating a value of this type
    pub fn element(&self) -> Type {
        match self {
            Type::List(t) | Type::Set(t) => (**t).clone(),
            Type::Dict(k, _) => (**k).clone(),
            Type::Str => Type::Str,
            Type::Bytes => Type::Int,
            Type::Tuple(items) => items
                .iter()
                .fold(None, |acc: Option<Type>, t| {
                    Some(acc.map_or_else(|| t.clone(), |a| join(&a, t)))
                })
                .unwrap_or(Type::Unknown),
            _ => Type::Unknown,
        }
    }

    /// `Optional(T)` → `T`
    pub fn unwrap_optional(&self) -> &Type {
        match self {
            Type::Optional(inner) => inner,
            other => other,
        }
    }

    fn group(&self) -> Group<'_> {
        match self {
            Type::Int | Type::Float | Type::Bool => Group::Numeric,
            Type::Str => Group::Str,
            Type::Bytes => Group::Bytes,
            Type::List(_) => Group::List,
            Type::Dict(_, _) => Group::Dict,
            Type::Set(_) => Group::Set,
            Type::Tuple(items) => Group::Tuple(items.len()),
            Type::Callable { .. } => Group::Callable(self),
            _ => Group::Named(self),
        }
    }
}

fn numeric_rank(t: &Type) -> u8 {
    match t {
        Type::Bool => 0,
        Type::Int => 1,
        _ => 2,
    }
}

/// Union/Optional を平坦化し、None の有無を返す
fn flatten_into(t: &Type, out: &mut Vec<Type>, has_none: &mut bool) {
    match t {
        Type::None => *has_none = true,
        Type::Optional(inner) => {
            *has_none = true;
            flatten_into(inner, out, has_none);
        }
        Type::Union(items) => {
            for item in items {
                flatten_into(item, out, has_none);
            }
        }
        other => out.push(normalize_shallow(other)),
    }
}

/// Normalize the type arguments of a container without touching its head
fn normalize_shallow(t: &Type) -> Type {
    match t {
        Type::List(e) => Type::list(normalize(e)),
        Type::Set(e) => Type::set(normalize(e)),
        Type::Dict(k, v) => Type::dict(normalize(k), normalize(v)),
        Type::Tuple(items) => Type::Tuple(items.iter().map(normalize).collect()),
        Type::Callable { params, ret } => Type::Callable {
            params: params.iter().map(normalize).collect(),
            ret: Box::new(normalize(ret)),
        },
        other => other.clone(),
    }
}

/// Fuse two members of the same group
fn fuse(a: &Type, b: &Type) -> Type {
    match (a, b) {
        (x, y) if x.is_numeric() && y.is_numeric() => {
            if numeric_rank(x) >= numeric_rank(y) {
                x.clone()
            } else {
                y.clone()
            }
        }
        (Type::List(x), Type::List(y)) => Type::list(join(x, y)),
        (Type::Set(x), Type::Set(y)) => Type::set(join(x, y)),
        (Type::Dict(k1, v1), Type::Dict(k2, v2)) => Type::dict(join(k1, k2), join(v1, v2)),
        (Type::Tuple(xs), Type::Tuple(ys)) => {
            Type::Tuple(xs.iter().zip(ys.iter()).map(|(x, y)| join(x, y)).collect())
        }
        (x, _) => x.clone(),
    }
}

/// Canonical form of a member list
fn canonical(members: Vec<Type>, has_none: bool) -> Type {
    let mut fused: Vec<Type> = Vec::new();
    for member in members {
        match fused.iter().position(|f| f.group() == member.group()) {
            Some(idx) => fused[idx] = fuse(&fused[idx], &member),
            None => fused.push(member),
        }
    }
    let core = match fused.len() {
        0 => return Type::None,
        1 => fused.remove(0),
        _ => Type::Union(fused),
    };
    if has_none {
        Type::Optional(Box::new(core))
    } else {
        core
    }
}

/// Least upper bound of two types
///
/// - `Unknown` absorbs everything
/// - numeric widening `Bool < Int < Float`
/// - `Optional(T) ⊔ T = Optional(T)`
/// - otherwise a deduplicated `Union` ordered by first appearance
pub fn join(a: &Type, b: &Type) -> Type {
    if a.contains_top() || b.contains_top() {
        return Type::Unknown;
    }
    let mut members = Vec::new();
    let mut has_none = false;
    flatten_into(a, &mut members, &mut has_none);
    flatten_into(b, &mut members, &mut has_none);
    canonical(members, has_none)
}

impl Type {
    /// Top-level Unknown, including an Unknown member of a union
    fn contains_top(&self) -> bool {
        match self {
            Type::Unknown => true,
            Type::Optional(inner) => inner.contains_top(),
            Type::Union(items) => items.iter().any(Type::contains_top),
            _ => false,
        }
    }
}

/// 正規形 (join の恒等元として振る舞う)
pub fn normalize(t: &Type) -> Type {
    if t.contains_top() {
        return Type::Unknown;
    }
    let mut members = Vec::new();
    let mut has_none = false;
    flatten_into(t, &mut members, &mut has_none);
    canonical(members, has_none)
}

/// Information merge used while inferring: `Unknown` is a hole, not a top
pub fn refine(known: &Type, evidence: &Type) -> Type {
    match (known, evidence) {
        (Type::Unknown, e) => e.clone(),
        (k, Type::Unknown) => k.clone(),
        (Type::List(a), Type::List(b)) => Type::list(refine(a, b)),
        (Type::Set(a), Type::Set(b)) => Type::set(refine(a, b)),
        (Type::Dict(k1, v1), Type::Dict(k2, v2)) => Type::dict(refine(k1, k2), refine(v1, v2)),
        (Type::Tuple(xs), Type::Tuple(ys)) if xs.len() == ys.len() => {
            Type::Tuple(xs.iter().zip(ys.iter()).map(|(x, y)| refine(x, y)).collect())
        }
        (Type::Optional(a), Type::Optional(b)) => Type::Optional(Box::new(refine(a, b))),
        (Type::Optional(a), b) if !matches!(b, Type::None) => {
            Type::Optional(Box::new(refine(a, b)))
        }
        (a, Type::Optional(b)) if !matches!(a, Type::None) => {
            Type::Optional(Box::new(refine(a, b)))
        }
        (a, b) if a.contains_unknown() || b.contains_unknown() => {
            if a.group() == b.group() {
                fuse_refined(a, b)
            } else {
                join(a, b)
            }
        }
        (a, b) => join(a, b),
    }
}

fn fuse_refined(a: &Type, b: &Type) -> Type {
    match (a, b) {
        (Type::Callable { params: p1, ret: r1 }, Type::Callable { params: p2, ret: r2 })
            if p1.len() == p2.len() =>
        {
            Type::Callable {
                params: p1.iter().zip(p2.iter()).map(|(x, y)| refine(x, y)).collect(),
                ret: Box::new(refine(r1, r2)),
            }
        }
        _ => a.clone(),
    }
}

/// ハッシュ可能性 (辞書キー・集合要素)
pub fn is_hashable(t: &Type) -> bool {
    match t {
        Type::List(_) | Type::Dict(_, _) | Type::Set(_) | Type::Unknown => false,
        Type::Callable { .. } => false,
        Type::Tuple(items) | Type::Union(items) => items.iter().all(is_hashable),
        Type::Optional(inner) => is_hashable(inner),
        _ => true,
    }
}

/// Variant name of a union member
pub fn variant_name(t: &Type) -> String {
    match t {
        Type::Int => "Int".to_string(),
        Type::Float => "Float".to_string(),
        Type::Bool => "Bool".to_string(),
        Type::Str => "Str".to_string(),
        Type::Bytes => "Bytes".to_string(),
        Type::None => "None".to_string(),
        Type::List(_) => "List".to_string(),
        Type::Dict(_, _) => "Dict".to_string(),
        Type::Set(_) => "Set".to_string(),
        Type::Tuple(items) => format!("Tuple{}", items.len()),
        Type::Callable { .. } => "Func".to_string(),
        Type::Class(name) | Type::Generic(name) => name.clone(),
        Type::Native(path) => path
            .rsplit('.')
            .next()
            .map(pascal_case)
            .unwrap_or_else(|| "Native".to_string()),
        Type::Optional(inner) => format!("Opt{}", variant_name(inner)),
        Type::Union(items) => union_enum_name(items),
        Type::Unknown => "Unknown".to_string(),
    }
}

/// `[Int, Str]` → `IntOrStr`
pub fn union_enum_name(members: &[Type]) -> String {
    members
        .iter()
        .map(variant_name)
        .collect::<Vec<_>>()
        .join("Or")
}

fn pascal_case(s: &str) -> String {
    s.split('_')
        .filter(|p| !p.is_empty())
        .map(|p| {
            let mut chars = p.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |items: &[Type]| {
            items
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self {
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::Bool => write!(f, "bool"),
            Type::Str => write!(f, "str"),
            Type::Bytes => write!(f, "bytes"),
            Type::None => write!(f, "None"),
            Type::List(t) => write!(f, "list[{t}]"),
            Type::Tuple(items) => write!(f, "tuple[{}]", list(items)),
            Type::Dict(k, v) => write!(f, "dict[{k}, {v}]"),
            Type::Set(t) => write!(f, "set[{t}]"),
            Type::Optional(t) => write!(f, "Optional[{t}]"),
            Type::Union(items) => write!(f, "Union[{}]", list(items)),
            Type::Callable { params, ret } => write!(f, "Callable[[{}], {ret}]", list(params)),
            Type::Class(name) | Type::Generic(name) | Type::Native(name) => write!(f, "{name}"),
            Type::Unknown => write!(f, "Unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_type() -> impl Strategy<Value = Type> {
        let leaf = prop_oneof![
            Just(Type::Int),
            Just(Type::Float),
            Just(Type::Bool),
            Just(Type::Str),
            Just(Type::Bytes),
            Just(Type::None),
            Just(Type::Unknown),
            Just(Type::Class("Point".to_string())),
            Just(Type::Generic("T".to_string())),
        ];
        leaf.prop_recursive(3, 16, 3, |inner| {
            prop_oneof![
                inner.clone().prop_map(Type::list),
                inner.clone().prop_map(Type::set),
                (inner.clone(), inner.clone()).prop_map(|(k, v)| Type::dict(k, v)),
                inner.clone().prop_map(|t| Type::Optional(Box::new(t))),
                prop::collection::vec(inner.clone(), 1..3).prop_map(Type::Tuple),
                prop::collection::vec(inner, 1..3).prop_map(Type::Union),
            ]
        })
    }

    #[test]
    fn test_numeric_widening() {
        assert_eq!(join(&Type::Int, &Type::Float), Type::Float);
        assert_eq!(join(&Type::Bool, &Type::Int), Type::Int);
        assert_eq!(join(&Type::Bool, &Type::Bool), Type::Bool);
    }

    #[test]
    fn test_optional_collapse() {
        let opt = Type::Optional(Box::new(Type::Str));
        assert_eq!(join(&opt, &Type::Str), opt);
        assert_eq!(join(&Type::Str, &Type::None), opt);
        assert_eq!(Type::optional(Type::None), Type::None);
    }

    #[test]
    fn test_union_dedup_in_order() {
        let u = join(&join(&Type::Int, &Type::Str), &Type::Int);
        assert_eq!(u, Type::Union(vec![Type::Int, Type::Str]));
        assert_eq!(union_enum_name(&[Type::Int, Type::Str]), "IntOrStr");
    }

    #[test]
    fn test_unknown_absorbs() {
        assert_eq!(join(&Type::Unknown, &Type::Int), Type::Unknown);
        assert_eq!(join(&Type::list(Type::Int), &Type::Unknown), Type::Unknown);
        // 内側の Unknown は要素の join で吸収される
        assert_eq!(
            join(&Type::list(Type::Int), &Type::list(Type::Unknown)),
            Type::list(Type::Unknown)
        );
    }

    #[test]
    fn test_refine_fills_holes() {
        let partial = Type::dict(Type::Unknown, Type::Int);
        let evidence = Type::dict(Type::Str, Type::Unknown);
        assert_eq!(refine(&partial, &evidence), Type::dict(Type::Str, Type::Int));
        assert_eq!(refine(&Type::Unknown, &Type::Float), Type::Float);
    }

    #[test]
    fn test_hashability() {
        assert!(is_hashable(&Type::Str));
        assert!(is_hashable(&Type::Tuple(vec![Type::Int, Type::Str])));
        assert!(!is_hashable(&Type::list(Type::Int)));
        assert!(!is_hashable(&Type::Tuple(vec![Type::Int, Type::set(Type::Int)])));
        assert!(!is_hashable(&Type::Unknown));
    }

    #[test]
    fn test_from_python_hint() {
        assert_eq!(Type::from_python_hint("List", &[Type::Int]), Type::list(Type::Int));
        assert_eq!(
            Type::from_python_hint("Optional", &[Type::Str]),
            Type::Optional(Box::new(Type::Str))
        );
        assert_eq!(
            Type::from_python_hint("Union", &[Type::Int, Type::None]),
            Type::Optional(Box::new(Type::Int))
        );
        assert_eq!(Type::from_python_hint("T", &[]), Type::Generic("T".to_string()));
        assert_eq!(Type::from_python_hint("Point", &[]), Type::Class("Point".to_string()));
    }

    #[test]
    fn test_display() {
        assert_eq!(Type::dict(Type::Str, Type::list(Type::Int)).to_string(), "dict[str, list[int]]");
    }

    proptest! {
        #[test]
        fn prop_join_associative(a in arb_type(), b in arb_type(), c in arb_type()) {
            prop_assert_eq!(join(&join(&a, &b), &c), join(&a, &join(&b, &c)));
        }

        #[test]
        fn prop_join_idempotent(a in arb_type()) {
            let n = normalize(&a);
            prop_assert_eq!(join(&n, &n), n.clone());
            prop_assert_eq!(normalize(&n), n);
        }

        #[test]
        fn prop_unknown_is_top(a in arb_type()) {
            prop_assert_eq!(join(&Type::Unknown, &a), Type::Unknown);
        }
    }
}
