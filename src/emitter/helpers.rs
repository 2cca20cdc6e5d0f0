//! Runtime helpers and generated support items
//!
//! 生成コードが使ったときだけ出力する小さな関数群と、union enum の定義。

use super::context::Helper;
use crate::semantic::{map_type, variant_name, MapMode, Type};
use crate::hir::SourcePos;

/// `type DynError = ...;`
pub const DYN_ERROR_ALIAS: &str = "pub type DynError = Box<dyn std::error::Error>;";

pub fn helper_source(helper: Helper) -> &'static str {
    match helper {
        Helper::FloorDiv => {
            "fn py_floor_div(a: i64, b: i64) -> i64 {
    if b == 0 {
        panic!(\"ZeroDivisionError: integer division or modulo by zero\");
    }
    let q = a / b;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}"
        }
        Helper::Mod => {
            "fn py_mod(a: i64, b: i64) -> i64 {
    if b == 0 {
        panic!(\"ZeroDivisionError: integer division or modulo by zero\");
    }
    let r = a % b;
    if r != 0 && ((r < 0) != (b < 0)) {
        r + b
    } else {
        r
    }
}"
        }
        Helper::FloatFloorDiv => {
            "fn py_float_floor_div(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        panic!(\"ZeroDivisionError: float floor division by zero\");
    }
    (a / b).floor()
}"
        }
        Helper::FloatMod => {
            "fn py_float_mod(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        panic!(\"ZeroDivisionError: float modulo\");
    }
    let r = a % b;
    if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
        r + b
    } else {
        r
    }
}"
        }
        Helper::Index => {
            "fn py_index(i: i64, len: usize) -> usize {
    let idx = if i < 0 { len as i64 + i } else { i };
    if idx < 0 || idx as usize >= len {
        panic!(\"IndexError: index {} out of range\", i);
    }
    idx as usize
}"
        }
        Helper::SliceIndices => {
            "fn py_slice_indices(len: usize, start: Option<i64>, stop: Option<i64>, step: i64) -> Vec<usize> {
    if step == 0 {
        panic!(\"ValueError: slice step cannot be zero\");
    }
    let len = len as i64;
    let clamp = |v: i64, lo: i64, hi: i64| if v < lo { lo } else if v > hi { hi } else { v };
    let norm = |v: i64| if v < 0 { v + len } else { v };
    let mut out = Vec::new();
    if step > 0 {
        let mut i = clamp(start.map_or(0, norm), 0, len);
        let end = clamp(stop.map_or(len, norm), 0, len);
        while i < end {
            out.push(i as usize);
            i += step;
        }
    } else {
        let mut i = clamp(start.map_or(len - 1, norm), -1, len - 1);
        let end = clamp(stop.map_or(-1, norm), -1, len - 1);
        while i > end {
            out.push(i as usize);
            i += step;
        }
    }
    out
}"
        }
        Helper::Range => {
            "fn py_range(start: i64, stop: i64, step: i64) -> impl Iterator<Item = i64> {
    if step == 0 {
        panic!(\"ValueError: range() arg 3 must not be zero\");
    }
    let mut i = start;
    std::iter::from_fn(move || {
        if (step > 0 && i < stop) || (step < 0 && i > stop) {
            let v = i;
            i += step;
            Some(v)
        } else {
            None
        }
    })
}"
        }
        Helper::Repr => {
            "trait PyRepr {
    fn py_repr(&self) -> String;
}

impl PyRepr for i64 {
    fn py_repr(&self) -> String {
        self.to_string()
    }
}

impl PyRepr for f64 {
    fn py_repr(&self) -> String {
        format!(\"{:?}\", self)
    }
}

impl PyRepr for bool {
    fn py_repr(&self) -> String {
        if *self { \"True\" } else { \"False\" }.to_string()
    }
}

impl PyRepr for () {
    fn py_repr(&self) -> String {
        \"None\".to_string()
    }
}

impl PyRepr for str {
    fn py_repr(&self) -> String {
        let body = self.replace('\\\\', \"\\\\\\\\\").replace('\\n', \"\\\\n\").replace('\\t', \"\\\\t\");
        if body.contains('\\'') && !body.contains('\"') {
            format!(\"\\\"{}\\\"\", body)
        } else {
            format!(\"'{}'\", body.replace('\\'', \"\\\\'\"))
        }
    }
}

impl PyRepr for String {
    fn py_repr(&self) -> String {
        self.as_str().py_repr()
    }
}

impl<T: PyRepr + ?Sized> PyRepr for &T {
    fn py_repr(&self) -> String {
        (**self).py_repr()
    }
}

impl<T: PyRepr> PyRepr for Option<T> {
    fn py_repr(&self) -> String {
        match self {
            Some(v) => v.py_repr(),
            None => \"None\".to_string(),
        }
    }
}

impl<T: PyRepr> PyRepr for [T] {
    fn py_repr(&self) -> String {
        format!(\"[{}]\", self.iter().map(|v| v.py_repr()).collect::<Vec<_>>().join(\", \"))
    }
}

impl<T: PyRepr> PyRepr for Vec<T> {
    fn py_repr(&self) -> String {
        self.as_slice().py_repr()
    }
}

impl<T: PyRepr> PyRepr for std::collections::HashSet<T> {
    fn py_repr(&self) -> String {
        if self.is_empty() {
            return \"set()\".to_string();
        }
        format!(\"{{{}}}\", self.iter().map(|v| v.py_repr()).collect::<Vec<_>>().join(\", \"))
    }
}

impl<K: PyRepr, V: PyRepr> PyRepr for std::collections::HashMap<K, V> {
    fn py_repr(&self) -> String {
        let items: Vec<String> = self.iter().map(|(k, v)| format!(\"{}: {}\", k.py_repr(), v.py_repr())).collect();
        format!(\"{{{}}}\", items.join(\", \"))
    }
}

impl<A: PyRepr> PyRepr for (A,) {
    fn py_repr(&self) -> String {
        format!(\"({},)\", self.0.py_repr())
    }
}

impl<A: PyRepr, B: PyRepr> PyRepr for (A, B) {
    fn py_repr(&self) -> String {
        format!(\"({}, {})\", self.0.py_repr(), self.1.py_repr())
    }
}

impl<A: PyRepr, B: PyRepr, C: PyRepr> PyRepr for (A, B, C) {
    fn py_repr(&self) -> String {
        format!(\"({}, {}, {})\", self.0.py_repr(), self.1.py_repr(), self.2.py_repr())
    }
}

impl<A: PyRepr, B: PyRepr, C: PyRepr, D: PyRepr> PyRepr for (A, B, C, D) {
    fn py_repr(&self) -> String {
        format!(\"({}, {}, {}, {})\", self.0.py_repr(), self.1.py_repr(), self.2.py_repr(), self.3.py_repr())
    }
}"
        }
    }
}

/// `PyRepr` で書ける型 (要素まで組み込みの値型)
pub fn has_py_repr(ty: &Type) -> bool {
    match ty {
        Type::Int | Type::Float | Type::Bool | Type::Str | Type::None => true,
        Type::List(t) | Type::Set(t) | Type::Optional(t) => has_py_repr(t),
        Type::Dict(k, v) => has_py_repr(k) && has_py_repr(v),
        Type::Tuple(items) => (1..=4).contains(&items.len()) && items.iter().all(has_py_repr),
        _ => false,
    }
}

/// Tagged enum for a union type, with `From` per member and `Display`
///
/// 同じ Rust 型を持つメンバが複数あると From が衝突するので、最初のものだけ実装する。
pub fn union_enum_source(name: &str, members: &[Type]) -> String {
    let pos = SourcePos::unknown();
    let mut variants = Vec::new();
    for member in members {
        let rust = map_type(member, MapMode::Owned, pos)
            .map(|t| t.to_string())
            .unwrap_or_else(|_| "()".to_string());
        variants.push((variant_name(member), rust));
    }

    let fallback = fallback_variant(members);
    let mut out = String::new();
    out.push_str("#[derive(Debug, Clone, PartialEq)]\n");
    out.push_str(&format!("pub enum {name} {{\n"));
    for (variant, rust) in &variants {
        out.push_str(&format!("    {variant}({rust}),\n"));
    }
    out.push_str(&format!("    /// その他の値 (Python の表示文字列)\n    {fallback}(String),\n"));
    out.push_str("}\n");

    let mut seen = Vec::new();
    for (variant, rust) in &variants {
        if seen.contains(rust) {
            continue;
        }
        seen.push(rust.clone());
        out.push_str(&format!(
            "\nimpl From<{rust}> for {name} {{\n    fn from(v: {rust}) -> Self {{\n        {name}::{variant}(v)\n    }}\n}}\n"
        ));
        if rust == "String" {
            out.push_str(&format!(
                "\nimpl From<&str> for {name} {{\n    fn from(v: &str) -> Self {{\n        {name}::{variant}(v.to_string())\n    }}\n}}\n"
            ));
        }
    }

    out.push_str(&format!(
        "\nimpl std::fmt::Display for {name} {{\n    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {{\n        match self {{\n"
    ));
    for (variant, rust) in &variants {
        let display = match rust.as_str() {
            "i64" | "String" | "bool" => "write!(f, \"{}\", v)",
            _ => "write!(f, \"{:?}\", v)",
        };
        out.push_str(&format!("            {name}::{variant}(v) => {display},\n"));
    }
    out.push_str(&format!("            {name}::{fallback}(v) => write!(f, \"{{}}\", v),\n"));
    out.push_str("        }\n    }\n}\n");
    out
}

/// Union enum の受け皿の variant 名 (メンバの variant と重ならない)
pub fn fallback_variant(members: &[Type]) -> &'static str {
    if members.iter().any(|m| variant_name(m) == "Other") {
        "OtherValue"
    } else {
        "Other"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_enum_has_variants_and_from() {
        let src = union_enum_source("IntOrStr", &[Type::Int, Type::Str]);
        assert!(src.contains("pub enum IntOrStr {"));
        assert!(src.contains("    Int(i64),"));
        assert!(src.contains("    Str(String),"));
        assert!(src.contains("impl From<i64> for IntOrStr"));
        assert!(src.contains("impl From<&str> for IntOrStr"));
        assert!(src.contains("impl std::fmt::Display for IntOrStr"));
        assert!(src.contains("    Other(String),"));
        assert!(src.contains("IntOrStr::Other(v) => write!(f, \"{}\", v),"));
    }

    #[test]
    fn test_fallback_variant_avoids_member_names() {
        assert_eq!(fallback_variant(&[Type::Int, Type::Str]), "Other");
        let members = [Type::Int, Type::Class("Other".to_string())];
        assert_eq!(fallback_variant(&members), "OtherValue");
    }

    #[test]
    fn test_helpers_are_named() {
        assert!(helper_source(Helper::FloorDiv).starts_with("fn py_floor_div"));
        assert!(helper_source(Helper::Index).contains("IndexError"));
        assert!(helper_source(Helper::SliceIndices).contains("step cannot be zero"));
        assert!(helper_source(Helper::Repr).starts_with("trait PyRepr"));
    }

    #[test]
    fn test_py_repr_covers_builtin_containers() {
        assert!(has_py_repr(&Type::list(Type::Str)));
        assert!(has_py_repr(&Type::dict(Type::Str, Type::list(Type::Int))));
        assert!(has_py_repr(&Type::Tuple(vec![Type::Str, Type::Int])));
        assert!(!has_py_repr(&Type::list(Type::Class("Point".to_string()))));
        assert!(!has_py_repr(&Type::list(Type::Unknown)));
    }
}
