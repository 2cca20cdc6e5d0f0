use super::location::SourcePos;
use super::ops::{HirBinOp, HirBoolOp, HirCmpOp, HirUnaryOp};
use crate::semantic::Type;
use serde::{Deserialize, Serialize};

/// 型スロット付きの式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HirExpr {
    pub kind: HirExprKind,
    /// 推論前は `Type::Unknown`
    pub ty: Type,
    pub pos: SourcePos,
}

impl HirExpr {
    pub fn new(kind: HirExprKind, pos: SourcePos) -> Self {
        Self {
            kind,
            ty: Type::Unknown,
            pos,
        }
    }

    pub fn typed(kind: HirExprKind, ty: Type, pos: SourcePos) -> Self {
        Self { kind, ty, pos }
    }

    pub fn name(name: impl Into<String>, pos: SourcePos) -> Self {
        Self::new(HirExprKind::Name(name.into()), pos)
    }

    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            HirExprKind::Name(n) => Some(n),
            _ => None,
        }
    }

    /// Literal or bare name: safe to evaluate more than once
    pub fn is_trivial(&self) -> bool {
        matches!(
            self.kind,
            HirExprKind::Name(_)
                | HirExprKind::Int { .. }
                | HirExprKind::Float { .. }
                | HirExprKind::Bool(_)
                | HirExprKind::NoneLit
                | HirExprKind::Str { .. }
        )
    }

    pub fn is_none_literal(&self) -> bool {
        matches!(self.kind, HirExprKind::NoneLit)
    }

    /// `self.<attr>` の attr 名
    pub fn self_field(&self) -> Option<&str> {
        match &self.kind {
            HirExprKind::Attribute { value, attr } if value.as_name() == Some("self") => {
                Some(attr)
            }
            _ => None,
        }
    }
}

/// 式の種類
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HirExprKind {
    // --- リテラル ---
    /// 整数 (ソース表記を保持: `0xff`)
    Int { value: i64, text: String },
    Float { value: f64, text: String },
    Str { value: String, raw: bool },
    Bytes(Vec<u8>),
    Bool(bool),
    NoneLit,

    // --- 参照 ---
    Name(String),
    /// Imported symbol resolved to its full dotted path (`math.pi`)
    Path(String),
    Attribute {
        value: Box<HirExpr>,
        attr: String,
    },
    Subscript {
        value: Box<HirExpr>,
        index: Box<HirExpr>,
    },
    Slice {
        value: Box<HirExpr>,
        lower: Option<Box<HirExpr>>,
        upper: Option<Box<HirExpr>>,
        step: Option<Box<HirExpr>>,
    },

    // --- 呼び出し ---
    /// Call of a named function, class, builtin or stdlib path (`re.findall`)
    Call {
        func: String,
        args: Vec<HirExpr>,
        kwargs: Vec<(String, HirExpr)>,
    },
    MethodCall {
        receiver: Box<HirExpr>,
        method: String,
        args: Vec<HirExpr>,
        kwargs: Vec<(String, HirExpr)>,
    },
    /// Call through an arbitrary callee expression (`handlers[0](x)`)
    DynCall {
        callee: Box<HirExpr>,
        args: Vec<HirExpr>,
    },

    // --- 演算 ---
    BinOp {
        op: HirBinOp,
        left: Box<HirExpr>,
        right: Box<HirExpr>,
    },
    UnaryOp {
        op: HirUnaryOp,
        operand: Box<HirExpr>,
    },
    /// Single pairwise comparison
    Compare {
        op: HirCmpOp,
        left: Box<HirExpr>,
        right: Box<HirExpr>,
    },
    BoolOp {
        op: HirBoolOp,
        left: Box<HirExpr>,
        right: Box<HirExpr>,
    },
    IfExpr {
        test: Box<HirExpr>,
        body: Box<HirExpr>,
        orelse: Box<HirExpr>,
    },
    /// `{ let name = value; body }`: evaluates `value` once
    TempBind {
        name: String,
        value: Box<HirExpr>,
        body: Box<HirExpr>,
    },

    // --- 複合 ---
    FString(Vec<FStringFragment>),
    List(Vec<HirExpr>),
    Tuple(Vec<HirExpr>),
    Set(Vec<HirExpr>),
    Dict(Vec<(HirExpr, HirExpr)>),
    Comprehension(Box<Comprehension>),
    Lambda {
        params: Vec<String>,
        body: Box<HirExpr>,
        /// 定義スコープから逃げる (move クロージャ)
        escapes: bool,
    },
    Await(Box<HirExpr>),
    Yield(Option<Box<HirExpr>>),
    Starred(Box<HirExpr>),
    NamedExpr {
        target: String,
        value: Box<HirExpr>,
    },
}

/// f-string の断片
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FStringFragment {
    Literal(String),
    Expr {
        value: HirExpr,
        conversion: Option<Conversion>,
        format_spec: Option<String>,
    },
}

/// `!s` / `!r` / `!a`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Conversion {
    Str,
    Repr,
    Ascii,
}

impl Conversion {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            's' => Some(Conversion::Str),
            'r' => Some(Conversion::Repr),
            'a' => Some(Conversion::Ascii),
            _ => None,
        }
    }
}

/// 内包表記の種類 (生成先コンテナ)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComprehensionKind {
    List,
    Set,
    Dict,
    Generator,
}

/// Canonical comprehension: `element for target in iter if guard ...`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comprehension {
    pub kind: ComprehensionKind,
    /// Element, or key for dict comprehensions
    pub element: HirExpr,
    /// Value for dict comprehensions
    pub value: Option<HirExpr>,
    pub iters: Vec<CompIter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompIter {
    pub target: Pattern,
    pub iter: HirExpr,
    pub guards: Vec<HirExpr>,
}

/// 束縛パターン
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pattern {
    Name(String),
    Tuple(Vec<Pattern>),
    Wildcard,
}

impl Pattern {
    /// Names bound by the pattern, left to right
    pub fn names(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_names(&mut out);
        out
    }

    fn collect_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Pattern::Name(n) => out.push(n),
            Pattern::Tuple(items) => items.iter().for_each(|p| p.collect_names(out)),
            Pattern::Wildcard => {}
        }
    }
}
