//! Semantic type → Rust type mapping
//!
//! 写像は全域: 具体型を要求する位置に `Unknown` が来た場合だけ失敗する。

use super::types::{union_enum_name, Type};
use crate::error::{DepylerError, Result};
use crate::hir::SourcePos;
use crate::stdlib;
use std::fmt;

/// Position the mapped type is used in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    Owned,
    BorrowShared,
    BorrowMut,
    ReturnPosition,
}

/// Rust 側の型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RustType {
    I64,
    F64,
    Bool,
    Unit,
    String,
    StrRef,
    Bytes,
    ByteSlice,
    Vec(Box<RustType>),
    Slice(Box<RustType>),
    Tuple(Vec<RustType>),
    HashMap(Box<RustType>, Box<RustType>),
    HashSet(Box<RustType>),
    Option(Box<RustType>),
    Ref(Box<RustType>),
    RefMut(Box<RustType>),
    /// Generated union enum
    Enum(String),
    /// User struct
    Struct(String),
    Generic(String),
    /// Library type spelled as a path
    Path(String),
    /// `impl Fn(A) -> R` (argument position)
    ImplFn(Vec<RustType>, Box<RustType>),
    /// `Box<dyn Fn(A) -> R>`
    BoxFn(Vec<RustType>, Box<RustType>),
}

impl fmt::Display for RustType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |items: &[RustType]| {
            items
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let ret_suffix = |ret: &RustType| match ret {
            RustType::Unit => String::new(),
            other => format!(" -> {other}"),
        };
        match self {
            RustType::I64 => write!(f, "i64"),
            RustType::F64 => write!(f, "f64"),
            RustType::Bool => write!(f, "bool"),
            RustType::Unit => write!(f, "()"),
            RustType::String => write!(f, "String"),
            RustType::StrRef => write!(f, "&str"),
            RustType::Bytes => write!(f, "Vec<u8>"),
            RustType::ByteSlice => write!(f, "&[u8]"),
            RustType::Vec(t) => write!(f, "Vec<{t}>"),
            RustType::Slice(t) => write!(f, "&[{t}]"),
            RustType::Tuple(items) if items.len() == 1 => write!(f, "({},)", items[0]),
            RustType::Tuple(items) => write!(f, "({})", join(items)),
            RustType::HashMap(k, v) => write!(f, "HashMap<{k}, {v}>"),
            RustType::HashSet(t) => write!(f, "HashSet<{t}>"),
            RustType::Option(t) => write!(f, "Option<{t}>"),
            RustType::Ref(t) => write!(f, "&{t}"),
            RustType::RefMut(t) => write!(f, "&mut {t}"),
            RustType::Enum(name) | RustType::Struct(name) | RustType::Generic(name) => {
                write!(f, "{name}")
            }
            RustType::Path(path) => write!(f, "{path}"),
            RustType::ImplFn(params, ret) => {
                write!(f, "impl Fn({}){}", join(params), ret_suffix(ret))
            }
            RustType::BoxFn(params, ret) => {
                write!(f, "Box<dyn Fn({}){}>", join(params), ret_suffix(ret))
            }
        }
    }
}

impl RustType {
    pub fn to_rust_string(&self) -> String {
        self.to_string()
    }
}

/// Map a semantic type for the given position
pub fn map_type(ty: &Type, mode: MapMode, pos: SourcePos) -> Result<RustType> {
    match mode {
        MapMode::BorrowShared => map_borrowed(ty, pos),
        MapMode::BorrowMut => map_borrowed_mut(ty, pos),
        MapMode::Owned | MapMode::ReturnPosition => map_owned(ty, pos),
    }
}

fn map_owned(ty: &Type, pos: SourcePos) -> Result<RustType> {
    let mapped = match ty {
        Type::Int => RustType::I64,
        Type::Float => RustType::F64,
        Type::Bool => RustType::Bool,
        Type::Str => RustType::String,
        Type::Bytes => RustType::Bytes,
        Type::None => RustType::Unit,
        Type::List(t) => RustType::Vec(Box::new(map_owned(t, pos)?)),
        Type::Tuple(items) => RustType::Tuple(
            items
                .iter()
                .map(|t| map_owned(t, pos))
                .collect::<Result<Vec<_>>>()?,
        ),
        Type::Dict(k, v) => {
            RustType::HashMap(Box::new(map_owned(k, pos)?), Box::new(map_owned(v, pos)?))
        }
        Type::Set(t) => RustType::HashSet(Box::new(map_owned(t, pos)?)),
        Type::Optional(t) => RustType::Option(Box::new(map_owned(t, pos)?)),
        Type::Union(members) => {
            if members.iter().any(Type::contains_unknown) {
                return Err(DepylerError::unmappable(pos, ty.to_string()));
            }
            RustType::Enum(union_enum_name(members))
        }
        Type::Callable { params, ret } => {
            let (params, ret) = map_signature(params, ret, pos)?;
            RustType::BoxFn(params, Box::new(ret))
        }
        Type::Class(name) => RustType::Struct(name.clone()),
        Type::Generic(name) => RustType::Generic(name.clone()),
        Type::Native(name) => RustType::Path(
            stdlib::native_rust_type(name)
                .map(str::to_string)
                .unwrap_or_else(|| name.clone()),
        ),
        Type::Unknown => return Err(DepylerError::unmappable(pos, "Unknown")),
    };
    Ok(mapped)
}

fn map_signature(
    params: &[Type],
    ret: &Type,
    pos: SourcePos,
) -> Result<(Vec<RustType>, RustType)> {
    let params = params
        .iter()
        .map(|p| map_owned(p, pos))
        .collect::<Result<Vec<_>>>()?;
    Ok((params, map_owned(ret, pos)?))
}

fn map_borrowed(ty: &Type, pos: SourcePos) -> Result<RustType> {
    let mapped = match ty {
        Type::Str => RustType::StrRef,
        Type::Bytes => RustType::ByteSlice,
        Type::List(t) => RustType::Slice(Box::new(map_owned(t, pos)?)),
        Type::Dict(_, _) | Type::Set(_) => RustType::Ref(Box::new(map_owned(ty, pos)?)),
        Type::Callable { params, ret } => {
            let (params, ret) = map_signature(params, ret, pos)?;
            RustType::ImplFn(params, Box::new(ret))
        }
        other => map_owned(other, pos)?,
    };
    Ok(mapped)
}

fn map_borrowed_mut(ty: &Type, pos: SourcePos) -> Result<RustType> {
    let mapped = match ty {
        Type::Str
        | Type::Bytes
        | Type::List(_)
        | Type::Dict(_, _)
        | Type::Set(_)
        | Type::Class(_)
        | Type::Native(_) => RustType::RefMut(Box::new(map_owned(ty, pos)?)),
        other => map_owned(other, pos)?,
    };
    Ok(mapped)
}

/// Shorthand: owned Rust spelling
pub fn rust_type_string(ty: &Type, pos: SourcePos) -> Result<String> {
    Ok(map_owned(ty, pos)?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(ty: &Type) -> String {
        map_type(ty, MapMode::Owned, SourcePos::unknown())
            .unwrap()
            .to_string()
    }

    fn shared(ty: &Type) -> String {
        map_type(ty, MapMode::BorrowShared, SourcePos::unknown())
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_map_primitives() {
        assert_eq!(owned(&Type::Int), "i64");
        assert_eq!(owned(&Type::Float), "f64");
        assert_eq!(owned(&Type::Str), "String");
        assert_eq!(owned(&Type::None), "()");
        assert_eq!(owned(&Type::Tuple(vec![Type::Int])), "(i64,)");
    }

    #[test]
    fn test_map_containers() {
        assert_eq!(owned(&Type::list(Type::Str)), "Vec<String>");
        assert_eq!(owned(&Type::dict(Type::Str, Type::Int)), "HashMap<String, i64>");
        assert_eq!(owned(&Type::Optional(Box::new(Type::Int))), "Option<i64>");
    }

    #[test]
    fn test_borrow_forms() {
        assert_eq!(shared(&Type::Str), "&str");
        assert_eq!(shared(&Type::Bytes), "&[u8]");
        assert_eq!(shared(&Type::list(Type::Int)), "&[i64]");
        assert_eq!(shared(&Type::set(Type::Int)), "&HashSet<i64>");
        // 借用形のない型はそのまま
        assert_eq!(shared(&Type::Int), "i64");
        let m = map_type(&Type::list(Type::Int), MapMode::BorrowMut, SourcePos::unknown()).unwrap();
        assert_eq!(m.to_string(), "&mut Vec<i64>");
    }

    #[test]
    fn test_union_maps_to_enum() {
        assert_eq!(owned(&Type::Union(vec![Type::Int, Type::Str])), "IntOrStr");
    }

    #[test]
    fn test_callable_positions() {
        let f = Type::Callable {
            params: vec![Type::Int],
            ret: Box::new(Type::Int),
        };
        assert_eq!(owned(&f), "Box<dyn Fn(i64) -> i64>");
        assert_eq!(shared(&f), "impl Fn(i64) -> i64");
    }

    #[test]
    fn test_unknown_is_unmappable() {
        let err = map_type(&Type::list(Type::Unknown), MapMode::Owned, SourcePos::new(3, 7));
        assert!(matches!(err, Err(DepylerError::UnmappableType { .. })));
    }
}
