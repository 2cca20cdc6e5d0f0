//! Operator typing module
//!
//! 二項演算の結果型を決める。
//! - 数値は `Bool < Int < Float` で拡幅
//! - 文字列 `+` は連結、文字列と数値の混在はエラー
//! - `**` は指数が非負の整数リテラルのときだけ整数のまま

use super::types::{join, refine, Type};
use crate::error::{DepylerError, Result};
use crate::hir::{HirBinOp, HirExpr, HirExprKind, HirUnaryOp, SourcePos};

/// `x ** 2` は整数のまま、`x ** -1` / `x ** y` は浮動小数
pub fn is_integer_exponent(exponent: &HirExpr) -> bool {
    match &exponent.kind {
        HirExprKind::Int { value, .. } => *value >= 0,
        _ => false,
    }
}

/// 算術で Bool は Int として扱う
fn arith(t: &Type) -> Type {
    match t {
        Type::Bool => Type::Int,
        other => other.clone(),
    }
}

fn mismatch(op: HirBinOp, left: &Type, right: &Type, pos: SourcePos) -> DepylerError {
    DepylerError::unmappable(
        pos,
        format!("{left} {} {right}", op.rust_token()),
    )
}

/// Result type of `left <op> right`
///
/// `Unknown` operands produce `Unknown` unless the other side decides the
/// result on its own. `Optional` operands are typed by their payload.
pub fn binop_result_type(
    op: HirBinOp,
    left: &Type,
    right: &Type,
    int_pow: bool,
    pos: SourcePos,
) -> Result<Type> {
    let l = left.unwrap_optional();
    let r = right.unwrap_optional();
    let ty = match op {
        HirBinOp::Add => match (l, r) {
            (Type::Str, Type::Str) => Type::Str,
            (Type::Str, Type::Unknown) | (Type::Unknown, Type::Str) => Type::Str,
            (Type::Str, other) | (other, Type::Str) if other.is_numeric() => {
                return Err(mismatch(op, left, right, pos))
            }
            (Type::Bytes, Type::Bytes) => Type::Bytes,
            (Type::List(a), Type::List(b)) => Type::list(refine(a, b)),
            (Type::List(_), Type::Unknown) => l.clone(),
            (Type::Unknown, Type::List(_)) => r.clone(),
            (Type::Tuple(a), Type::Tuple(b)) => {
                Type::Tuple(a.iter().chain(b.iter()).cloned().collect())
            }
            (a, b) if a.is_numeric() && b.is_numeric() => join(&arith(a), &arith(b)),
            (Type::Unknown, _) | (_, Type::Unknown) => Type::Unknown,
            _ => return Err(mismatch(op, left, right, pos)),
        },
        HirBinOp::Sub => match (l, r) {
            (Type::Set(a), Type::Set(b)) => Type::set(refine(a, b)),
            (a, b) if a.is_numeric() && b.is_numeric() => join(&arith(a), &arith(b)),
            (Type::Unknown, _) | (_, Type::Unknown) => Type::Unknown,
            (Type::Native(n), _) if n.starts_with("datetime.") => l.clone(),
            _ => return Err(mismatch(op, left, right, pos)),
        },
        HirBinOp::Mul => match (l, r) {
            (Type::Str, Type::Int) | (Type::Int, Type::Str) => Type::Str,
            (Type::List(_), Type::Int) => l.clone(),
            (Type::Int, Type::List(_)) => r.clone(),
            (Type::Str, Type::Float) | (Type::Float, Type::Str) => {
                return Err(mismatch(op, left, right, pos))
            }
            (a, b) if a.is_numeric() && b.is_numeric() => join(&arith(a), &arith(b)),
            (Type::Str, Type::Unknown) | (Type::Unknown, Type::Str) => Type::Str,
            (Type::Unknown, _) | (_, Type::Unknown) => Type::Unknown,
            _ => return Err(mismatch(op, left, right, pos)),
        },
        HirBinOp::Div => match (l, r) {
            (a, b) if a.is_numeric() && b.is_numeric() => Type::Float,
            (a, Type::Unknown) | (Type::Unknown, a) if a.is_numeric() => Type::Float,
            (Type::Unknown, Type::Unknown) => Type::Unknown,
            _ => return Err(mismatch(op, left, right, pos)),
        },
        HirBinOp::FloorDiv => match (l, r) {
            (a, b) if a.is_numeric() && b.is_numeric() => join(&arith(a), &arith(b)),
            (Type::Unknown, _) | (_, Type::Unknown) => Type::Unknown,
            _ => return Err(mismatch(op, left, right, pos)),
        },
        HirBinOp::Mod => match (l, r) {
            // 残った `%` 書式 (percent_format が諦めた形)
            (Type::Str, _) => Type::Str,
            (a, b) if a.is_numeric() && b.is_numeric() => join(&arith(a), &arith(b)),
            (Type::Unknown, _) | (_, Type::Unknown) => Type::Unknown,
            _ => return Err(mismatch(op, left, right, pos)),
        },
        HirBinOp::Pow => match (l, r) {
            (a, b) if a.is_numeric() && b.is_numeric() => {
                if matches!(arith(a), Type::Int) && matches!(arith(b), Type::Int) && int_pow {
                    Type::Int
                } else {
                    Type::Float
                }
            }
            (Type::Unknown, _) | (_, Type::Unknown) => Type::Unknown,
            _ => return Err(mismatch(op, left, right, pos)),
        },
        HirBinOp::BitAnd | HirBinOp::BitOr | HirBinOp::BitXor => match (l, r) {
            (Type::Set(a), Type::Set(b)) => Type::set(refine(a, b)),
            (Type::Dict(_, _), Type::Dict(_, _)) if op == HirBinOp::BitOr => refine(l, r),
            (Type::Bool, Type::Bool) => Type::Bool,
            (a, b) if a.is_numeric() && b.is_numeric() => Type::Int,
            (Type::Unknown, _) | (_, Type::Unknown) => Type::Unknown,
            _ => return Err(mismatch(op, left, right, pos)),
        },
        HirBinOp::LShift | HirBinOp::RShift => match (l, r) {
            (a, b) if a.is_numeric() && b.is_numeric() => Type::Int,
            (Type::Unknown, _) | (_, Type::Unknown) => Type::Int,
            _ => return Err(mismatch(op, left, right, pos)),
        },
    };
    Ok(ty)
}

/// Result type of a unary operator
pub fn unary_result_type(op: HirUnaryOp, operand: &Type) -> Type {
    match op {
        HirUnaryOp::Not => Type::Bool,
        HirUnaryOp::BitNot => Type::Int,
        HirUnaryOp::Neg | HirUnaryOp::Pos => arith(operand.unwrap_optional()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at() -> SourcePos {
        SourcePos::new(1, 1)
    }

    #[test]
    fn test_numeric_widening() {
        let t = binop_result_type(HirBinOp::Add, &Type::Int, &Type::Float, false, at()).unwrap();
        assert_eq!(t, Type::Float);
        let t = binop_result_type(HirBinOp::Add, &Type::Bool, &Type::Bool, false, at()).unwrap();
        assert_eq!(t, Type::Int);
    }

    #[test]
    fn test_true_division_is_float() {
        let t = binop_result_type(HirBinOp::Div, &Type::Int, &Type::Int, false, at()).unwrap();
        assert_eq!(t, Type::Float);
        let t =
            binop_result_type(HirBinOp::FloorDiv, &Type::Int, &Type::Int, false, at()).unwrap();
        assert_eq!(t, Type::Int);
    }

    #[test]
    fn test_str_plus_int_is_error() {
        let err = binop_result_type(HirBinOp::Add, &Type::Str, &Type::Int, false, at());
        assert!(matches!(err, Err(DepylerError::UnmappableType { .. })));
    }

    #[test]
    fn test_pow() {
        let t = binop_result_type(HirBinOp::Pow, &Type::Int, &Type::Int, true, at()).unwrap();
        assert_eq!(t, Type::Int);
        let t = binop_result_type(HirBinOp::Pow, &Type::Int, &Type::Int, false, at()).unwrap();
        assert_eq!(t, Type::Float);
    }

    #[test]
    fn test_containers() {
        let t = binop_result_type(
            HirBinOp::Add,
            &Type::list(Type::Unknown),
            &Type::list(Type::Int),
            false,
            at(),
        )
        .unwrap();
        assert_eq!(t, Type::list(Type::Int));
        let t = binop_result_type(HirBinOp::Mul, &Type::Str, &Type::Int, false, at()).unwrap();
        assert_eq!(t, Type::Str);
    }

    #[test]
    fn test_exact_exponent() {
        let two = HirExpr::new(
            HirExprKind::Int {
                value: 2,
                text: "2".to_string(),
            },
            at(),
        );
        assert!(is_integer_exponent(&two));
        assert!(!is_integer_exponent(&HirExpr::name("y", at())));
    }
}
