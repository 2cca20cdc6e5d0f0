//! HIR Node (Statement) Definitions
//!
//! HIR でのステートメント、関数、クラス、モジュールを定義する。

use super::exprs::{HirExpr, Pattern};
use super::location::SourcePos;
use super::ops::HirBinOp;
use crate::semantic::Type;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// 位置付きステートメント
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HirStmt {
    pub kind: HirStmtKind,
    pub pos: SourcePos,
}

impl HirStmt {
    pub fn new(kind: HirStmtKind, pos: SourcePos) -> Self {
        Self { kind, pos }
    }
}

/// ステートメントの種類
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HirStmtKind {
    Assign {
        target: AssignTarget,
        value: HirExpr,
        annotation: Option<Type>,
    },
    /// 累算代入 (x += 1): 脱糖せずに保持する
    AugAssign {
        target: AssignTarget,
        op: HirBinOp,
        value: HirExpr,
    },
    If {
        test: HirExpr,
        body: Vec<HirStmt>,
        orelse: Vec<HirStmt>,
    },
    /// `else` 節はブリッジでフラグ変数に展開済み
    While {
        test: HirExpr,
        body: Vec<HirStmt>,
    },
    For {
        target: Pattern,
        iter: HirExpr,
        body: Vec<HirStmt>,
    },
    Return(Option<HirExpr>),
    /// `exc == None` is a bare re-raise inside a handler
    Raise {
        exc: Option<HirExpr>,
        cause: Option<HirExpr>,
    },
    Try {
        body: Vec<HirStmt>,
        handlers: Vec<ExceptClause>,
        orelse: Vec<HirStmt>,
        finalbody: Vec<HirStmt>,
    },
    /// Scoped acquisition; release runs on every exit from `body`
    With {
        context: HirExpr,
        binding: Option<String>,
        body: Vec<HirStmt>,
    },
    Break,
    Continue,
    Expr(HirExpr),
    Pass,
    FuncDef(Box<HirFunction>),
    ClassDef(Box<HirClass>),
    Import(HirImport),
    Assert {
        test: HirExpr,
        msg: Option<HirExpr>,
    },
}

/// 代入先の分類
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AssignTarget {
    Name(String),
    Attribute { value: HirExpr, attr: String },
    Subscript { value: HirExpr, index: HirExpr },
    Tuple(Vec<AssignTarget>),
}

impl AssignTarget {
    pub fn as_name(&self) -> Option<&str> {
        match self {
            AssignTarget::Name(n) => Some(n),
            _ => None,
        }
    }

    /// Root variable that an attribute/subscript target mutates in place
    pub fn mutated_root(&self) -> Option<&str> {
        match self {
            AssignTarget::Attribute { value, .. } | AssignTarget::Subscript { value, .. } => {
                root_name(value)
            }
            _ => None,
        }
    }
}

/// `a.b[c].d` → `a`
pub fn root_name(expr: &HirExpr) -> Option<&str> {
    use super::exprs::HirExprKind;
    match &expr.kind {
        HirExprKind::Name(n) => Some(n),
        HirExprKind::Attribute { value, .. } | HirExprKind::Subscript { value, .. } => {
            root_name(value)
        }
        _ => None,
    }
}

/// `except (A, B) as name:`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptClause {
    /// 空なら bare except
    pub types: Vec<String>,
    pub name: Option<String>,
    pub body: Vec<HirStmt>,
    pub pos: SourcePos,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HirImport {
    pub module: String,
    pub alias: Option<String>,
    /// `from module import item as alias`
    pub items: Vec<(String, Option<String>)>,
    pub pos: SourcePos,
}

/// 引数の受け渡し方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ParamMode {
    #[default]
    ByValue,
    Borrow,
    BorrowMut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HirParam {
    pub name: String,
    pub ty: Type,
    /// 型注釈由来かどうか
    pub annotated: bool,
    /// Captured unevaluated; bound at each call site
    pub default: Option<HirExpr>,
    pub mode: ParamMode,
    /// Rebound inside the body (`mut` by-value parameter)
    pub rebound: bool,
    pub pos: SourcePos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MethodKind {
    Instance,
    Class,
    Static,
}

/// 関数属性 (推論パスが埋める)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionAttrs {
    pub pure: bool,
    pub terminating: bool,
    pub panic_free: bool,
    pub generator: bool,
    pub is_async: bool,
    pub classmethod: bool,
    pub staticmethod: bool,
    pub property: bool,
    /// `@x.setter` の x
    pub setter_of: Option<String>,
    /// Result を返す
    pub can_fail: bool,
    /// `&mut self` を要する
    pub self_mut: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HirFunction {
    pub name: String,
    pub params: Vec<HirParam>,
    pub ret: Type,
    pub ret_annotated: bool,
    pub body: Vec<HirStmt>,
    pub attrs: FunctionAttrs,
    pub method: Option<MethodKind>,
    /// 推論済みのローカル変数型
    pub locals: BTreeMap<String, Type>,
    /// Pass A の結果
    pub mutable_vars: BTreeSet<String>,
    /// Generic parameter → trait bounds
    pub generic_bounds: BTreeMap<String, BTreeSet<String>>,
    pub docstring: Option<String>,
    pub pos: SourcePos,
}

impl HirFunction {
    pub fn param(&self, name: &str) -> Option<&HirParam> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Parameters excluding `self`/`cls`
    pub fn value_params(&self) -> &[HirParam] {
        match self.method {
            Some(MethodKind::Instance) | Some(MethodKind::Class) if !self.params.is_empty() => {
                &self.params[1..]
            }
            _ => &self.params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HirField {
    pub name: String,
    pub ty: Type,
    pub default: Option<HirExpr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HirClass {
    pub name: String,
    pub fields: Vec<HirField>,
    /// `__init__` を含む
    pub methods: Vec<HirFunction>,
    pub base: Option<String>,
    /// `@property` メソッド名
    pub properties: BTreeSet<String>,
    pub is_dataclass: bool,
    pub is_exception: bool,
    /// Class-level constants (`MAX = 10` in the class body)
    pub class_attrs: Vec<(String, HirExpr)>,
    pub docstring: Option<String>,
    pub pos: SourcePos,
}

impl HirClass {
    pub fn method(&self, name: &str) -> Option<&HirFunction> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&HirField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// 1 入力ファイル分のモジュール
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HirModule {
    pub items: Vec<HirStmt>,
    pub imports: Vec<HirImport>,
    pub class_names: BTreeSet<String>,
    /// モジュールレベル変数の推論済み型
    #[serde(default)]
    pub globals: BTreeMap<String, Type>,
    /// Module-level names mutated from inside a function
    #[serde(default)]
    pub mutable_globals: BTreeSet<String>,
    /// トップレベル文 (main) から例外が漏れる
    #[serde(default)]
    pub entry_can_fail: bool,
}

impl HirModule {
    pub fn functions(&self) -> impl Iterator<Item = &HirFunction> {
        self.items.iter().filter_map(|s| match &s.kind {
            HirStmtKind::FuncDef(f) => Some(f.as_ref()),
            _ => None,
        })
    }

    pub fn classes(&self) -> impl Iterator<Item = &HirClass> {
        self.items.iter().filter_map(|s| match &s.kind {
            HirStmtKind::ClassDef(c) => Some(c.as_ref()),
            _ => None,
        })
    }

    pub fn function(&self, name: &str) -> Option<&HirFunction> {
        self.functions().find(|f| f.name == name)
    }

    pub fn class(&self, name: &str) -> Option<&HirClass> {
        self.classes().find(|c| c.name == name)
    }
}
