//! HIR Operator Definitions
//
// HIR での演算子を定義する。
// - 二項演算子 (HirBinOp)
// - 単項演算子 (HirUnaryOp)
// - 比較演算子 (HirCmpOp)
// - 論理演算子 (HirBoolOp)
use crate::parser::{BinOp, BoolOpKind, CmpOp, UnaryOp};
use serde::{Deserialize, Serialize};

/// HIR 二項演算子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HirBinOp {
    // 算術演算子
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,

    // ビット演算子
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,
}

impl HirBinOp {
    /// Rust token for operators with a direct counterpart
    pub fn rust_token(&self) -> &'static str {
        match self {
            HirBinOp::Add => "+",
            HirBinOp::Sub => "-",
            HirBinOp::Mul => "*",
            HirBinOp::Div => "/",
            HirBinOp::FloorDiv => "/",
            HirBinOp::Mod => "%",
            HirBinOp::Pow => "**",
            HirBinOp::BitAnd => "&",
            HirBinOp::BitOr => "|",
            HirBinOp::BitXor => "^",
            HirBinOp::LShift => "<<",
            HirBinOp::RShift => ">>",
        }
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            HirBinOp::Add
                | HirBinOp::Sub
                | HirBinOp::Mul
                | HirBinOp::Div
                | HirBinOp::FloorDiv
                | HirBinOp::Mod
                | HirBinOp::Pow
        )
    }
}

impl HirBinOp {
    /// `None` for operators the HIR does not model (`@`)
    pub fn from_ast(op: BinOp) -> Option<Self> {
        let op = match op {
            BinOp::Add => HirBinOp::Add,
            BinOp::Sub => HirBinOp::Sub,
            BinOp::Mul => HirBinOp::Mul,
            BinOp::Div => HirBinOp::Div,
            BinOp::FloorDiv => HirBinOp::FloorDiv,
            BinOp::Mod => HirBinOp::Mod,
            BinOp::Pow => HirBinOp::Pow,
            BinOp::BitAnd => HirBinOp::BitAnd,
            BinOp::BitOr => HirBinOp::BitOr,
            BinOp::BitXor => HirBinOp::BitXor,
            BinOp::LShift => HirBinOp::LShift,
            BinOp::RShift => HirBinOp::RShift,
            // 行列積は対応しない
            BinOp::MatMul => return None,
        };
        Some(op)
    }
}

/// HIR 単項演算子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HirUnaryOp {
    Not,
    Neg,
    Pos,
    BitNot,
}

impl From<UnaryOp> for HirUnaryOp {
    fn from(op: UnaryOp) -> Self {
        match op {
            UnaryOp::Not => HirUnaryOp::Not,
            UnaryOp::Neg => HirUnaryOp::Neg,
            UnaryOp::Pos => HirUnaryOp::Pos,
            UnaryOp::Invert => HirUnaryOp::BitNot,
        }
    }
}

/// HIR 比較演算子 (連鎖比較はブリッジで分解済み)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HirCmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl HirCmpOp {
    pub fn rust_token(&self) -> &'static str {
        match self {
            HirCmpOp::Eq | HirCmpOp::Is => "==",
            HirCmpOp::NotEq | HirCmpOp::IsNot => "!=",
            HirCmpOp::Lt => "<",
            HirCmpOp::LtE => "<=",
            HirCmpOp::Gt => ">",
            HirCmpOp::GtE => ">=",
            HirCmpOp::In | HirCmpOp::NotIn => "in",
        }
    }

    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            HirCmpOp::Lt | HirCmpOp::LtE | HirCmpOp::Gt | HirCmpOp::GtE
        )
    }
}

impl From<CmpOp> for HirCmpOp {
    fn from(op: CmpOp) -> Self {
        match op {
            CmpOp::Eq => HirCmpOp::Eq,
            CmpOp::NotEq => HirCmpOp::NotEq,
            CmpOp::Lt => HirCmpOp::Lt,
            CmpOp::LtE => HirCmpOp::LtE,
            CmpOp::Gt => HirCmpOp::Gt,
            CmpOp::GtE => HirCmpOp::GtE,
            CmpOp::Is => HirCmpOp::Is,
            CmpOp::IsNot => HirCmpOp::IsNot,
            CmpOp::In => HirCmpOp::In,
            CmpOp::NotIn => HirCmpOp::NotIn,
        }
    }
}

/// 論理演算子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HirBoolOp {
    And,
    Or,
}

impl From<BoolOpKind> for HirBoolOp {
    fn from(op: BoolOpKind) -> Self {
        match op {
            BoolOpKind::And => HirBoolOp::And,
            BoolOpKind::Or => HirBoolOp::Or,
        }
    }
}
