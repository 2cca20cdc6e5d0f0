//! AST definitions
//!
//! Python の構文木。位置情報とリテラルのソース表記を保持する。

use crate::hir::SourcePos;

/// Parsed module
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub body: Vec<Stmt>,
}

/// Statement with position
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub pos: SourcePos,
}

/// Statement types
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// Expression statement
    Expr(Expr),
    /// `a = b = value`
    Assign { targets: Vec<Expr>, value: Expr },
    /// `x: int = value`
    AnnAssign {
        target: Expr,
        annotation: Expr,
        value: Option<Expr>,
    },
    /// `x += value`
    AugAssign {
        target: Expr,
        op: BinOp,
        value: Expr,
    },
    /// `elif` chains are nested `If` nodes in `orelse`
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        is_async: bool,
    },
    Return(Option<Expr>),
    Raise {
        exc: Option<Expr>,
        cause: Option<Expr>,
    },
    Try {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        orelse: Vec<Stmt>,
        finalbody: Vec<Stmt>,
    },
    With {
        items: Vec<WithItem>,
        body: Vec<Stmt>,
        is_async: bool,
    },
    FuncDef(FunctionDef),
    ClassDef(ClassDef),
    Import(Vec<Alias>),
    ImportFrom {
        module: String,
        names: Vec<Alias>,
        level: usize,
    },
    Global(Vec<String>),
    Nonlocal(Vec<String>),
    Delete(Vec<Expr>),
    Assert { test: Expr, msg: Option<Expr> },
    /// `match` statement (only recorded so the bridge can reject it)
    Match,
    Pass,
    Break,
    Continue,
}

/// Function definition
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub vararg: Option<Param>,
    pub kwarg: Option<Param>,
    pub returns: Option<Expr>,
    pub body: Vec<Stmt>,
    pub decorators: Vec<Expr>,
    pub is_async: bool,
}

/// Function parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub annotation: Option<Expr>,
    pub default: Option<Expr>,
    pub pos: SourcePos,
}

/// Class definition
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: String,
    pub bases: Vec<Expr>,
    pub keywords: Vec<(String, Expr)>,
    pub body: Vec<Stmt>,
    pub decorators: Vec<Expr>,
}

/// `except T as name:` clause
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    pub typ: Option<Expr>,
    pub name: Option<String>,
    pub body: Vec<Stmt>,
    pub pos: SourcePos,
}

/// `with context as target`
#[derive(Debug, Clone, PartialEq)]
pub struct WithItem {
    pub context: Expr,
    pub target: Option<Expr>,
}

/// `import name as asname`
#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    pub name: String,
    pub asname: Option<String>,
}

/// Expression with position
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub pos: SourcePos,
}

impl Expr {
    pub fn new(kind: ExprKind, pos: SourcePos) -> Self {
        Self { kind, pos }
    }

    /// Identifier name, if this is a bare name
    pub fn as_ident(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Ident(name) => Some(name),
            _ => None,
        }
    }

    /// Dotted path for `a.b.c` chains of names
    pub fn dotted_name(&self) -> Option<String> {
        match &self.kind {
            ExprKind::Ident(name) => Some(name.clone()),
            ExprKind::Attribute { value, attr } => value.dotted_name().map(|base| format!("{base}.{attr}")),
            _ => None,
        }
    }
}

/// Expression types
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Integer literal with its source spelling
    IntLiteral { value: i64, text: String },
    /// Float literal with its source spelling
    FloatLiteral { value: f64, text: String },
    /// String literal; `raw` records an `r` prefix
    StringLiteral { value: String, raw: bool },
    BytesLiteral(Vec<u8>),
    BoolLiteral(bool),
    NoneLiteral,
    Ellipsis,
    /// f-string literal f"..."
    FString(Vec<FStringPart>),
    /// Identifier
    Ident(String),
    /// Binary operation
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    /// Unary operation
    UnaryOp { op: UnaryOp, operand: Box<Expr> },
    /// `a and b and c`
    BoolOp { op: BoolOpKind, values: Vec<Expr> },
    /// `a < b <= c` keeps the whole chain
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
    },
    /// Function call with positional and keyword arguments
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    /// Conditional Expression (body if test else orelse)
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    /// Attribute access (obj.attr)
    Attribute { value: Box<Expr>, attr: String },
    /// Index access; the index may be a `Slice`
    Index { target: Box<Expr>, index: Box<Expr> },
    /// `lower:upper:step` inside a subscript
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Set(Vec<Expr>),
    /// Dict literal; a `None` key is a `**spread`
    Dict(Vec<(Option<Expr>, Expr)>),
    ListComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    SetComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    DictComp {
        key: Box<Expr>,
        value: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    /// Generator expression (elt for target in iter if cond)
    GenExpr {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    Lambda { params: Vec<Param>, body: Box<Expr> },
    Await(Box<Expr>),
    Yield(Option<Box<Expr>>),
    YieldFrom(Box<Expr>),
    /// `*x`
    Starred(Box<Expr>),
    /// `**x` in a call argument list
    DoubleStarred(Box<Expr>),
    /// `(name := value)`
    NamedExpr { target: String, value: Box<Expr> },
}

/// One `for target in iter if cond` clause
#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub target: Expr,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
    pub is_async: bool,
}

/// f-string fragment
#[derive(Debug, Clone, PartialEq)]
pub enum FStringPart {
    Literal(String),
    Expr {
        value: Expr,
        conversion: Option<char>,
        format_spec: Option<String>,
    },
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    MatMul,
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOpKind {
    And,
    Or,
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
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
