//! Type inference pass
//!
//! HIR の型スロットを埋める。モジュール全体を固定点まで反復する。
//! - ローカル変数の型は関数ごとに flow-insensitive に集める
//!   (`isinstance` / `is not None` による絞り込みだけは分岐内に限る)
//! - 注釈のない引数は 呼び出し側の実引数型 > 本体での使われ方 > 名前 の順で決める
//! - 最後まで穴の残る引数型は型パラメータ (T, U, ...) で埋め、もう一度収束させる

use super::builtins::{argparse_argument, builtin_call_type, factory_type, lambda_param_types};
use super::heuristics::{is_index_name, isinstance_type, type_from_name, unique_method_family};
use super::operators::{binop_result_type, is_integer_exponent, unary_result_type};
use super::types::{is_hashable, join, refine, variant_name, Type};
use crate::error::{DepylerError, Result};
use crate::hir::visit;
use crate::hir::*;
use crate::stdlib::{self, ErrorTaxon};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

const MAX_ROUNDS: usize = 12;
const GENERIC_NAMES: &[&str] = &["T", "U", "V", "W"];

/// 引数 1 つ分の推論状態
#[derive(Debug, Clone, PartialEq)]
struct ParamSig {
    name: String,
    /// 注釈 (無ければ Unknown)
    declared: Type,
    ty: Type,
    /// 注釈付き、または型パラメータで固定済み
    fixed: bool,
    default_ty: Option<Type>,
}

/// 本体での使われ方 (注釈なし引数の証拠)
#[derive(Debug, Clone, Default, PartialEq)]
struct Usage {
    isinstance: Vec<Type>,
    partner: Option<Type>,
    family: Option<Type>,
    container: Option<Type>,
    index_position: bool,
    /// `-` `/` `//` `**` の被演算子 (相手も数値か不明)
    numeric: bool,
}

impl Usage {
    /// 前のラウンドの証拠に足す
    ///
    /// 型が決まった後のラウンドでは証拠が集まらないので、上書きすると
    /// Unknown と具体型の間を往復して収束しなくなる。
    fn absorb(&mut self, newer: Usage) {
        fn merge(old: &mut Option<Type>, new: Option<Type>) {
            if let Some(n) = new {
                *old = Some(match old.take() {
                    Some(o) => refine(&o, &n),
                    None => n,
                });
            }
        }
        for t in newer.isinstance {
            if !self.isinstance.contains(&t) {
                self.isinstance.push(t);
            }
        }
        merge(&mut self.partner, newer.partner);
        merge(&mut self.family, newer.family);
        merge(&mut self.container, newer.container);
        self.index_position |= newer.index_position;
        self.numeric |= newer.numeric;
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Signature {
    params: Vec<ParamSig>,
    /// params[0] が self / cls
    receiver: bool,
    ret: Type,
    ret_declared: Option<Type>,
    generator: bool,
    locals: BTreeMap<String, Type>,
    usage: BTreeMap<String, Usage>,
}

impl Signature {
    fn from_hir(f: &HirFunction) -> Self {
        let receiver = matches!(f.method, Some(MethodKind::Instance) | Some(MethodKind::Class));
        let params = f
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let declared = if p.annotated || (receiver && i == 0) {
                    p.ty.clone()
                } else {
                    Type::Unknown
                };
                ParamSig {
                    name: p.name.clone(),
                    ty: declared.clone(),
                    fixed: p.annotated || (receiver && i == 0),
                    declared,
                    default_ty: None,
                }
            })
            .collect();
        Signature {
            params,
            receiver,
            ret: if f.ret_annotated { f.ret.clone() } else { Type::Unknown },
            ret_declared: f.ret_annotated.then(|| f.ret.clone()),
            generator: f.attrs.generator,
            locals: BTreeMap::new(),
            usage: BTreeMap::new(),
        }
    }

    fn offset(&self) -> usize {
        usize::from(self.receiver)
    }

    fn callable(&self) -> Type {
        Type::Callable {
            params: self.params[self.offset()..]
                .iter()
                .map(|p| p.ty.clone())
                .collect(),
            ret: Box::new(self.ret.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct ClassInfo {
    fields: BTreeMap<String, Type>,
    /// 注釈で型が決まっているフィールド
    declared: BTreeSet<String>,
    field_order: Vec<String>,
    base: Option<String>,
    properties: BTreeSet<String>,
    attrs: BTreeMap<String, Type>,
    is_dataclass: bool,
}

/// モジュール全体の推論状態 (ラウンドごとに比較して収束を判定する)
#[derive(Debug, Clone, Default, PartialEq)]
struct Context {
    functions: BTreeMap<String, Signature>,
    classes: BTreeMap<String, ClassInfo>,
    globals: BTreeMap<String, Type>,
    /// 呼び出し側の実引数型 (関数キー → 引数位置)
    call_args: BTreeMap<String, Vec<Type>>,
    argparse_fields: BTreeMap<String, Type>,
}

/// 分岐内での型の絞り込み
#[derive(Debug, Clone, PartialEq)]
pub struct Narrowing {
    pub name: String,
    pub ty: Type,
    pub kind: NarrowKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NarrowKind {
    /// `Option<T>` の中身 (`x is not None`, `if x:`)
    Some,
    /// Union enum の 1 バリアント (`isinstance(x, int)`)
    Variant(Vec<Type>),
}

/// Narrowing that holds inside the `if` body
///
/// 条件式の型推論が済んだ後に呼ぶ (Name の型は絞り込み前の宣言型)。
pub fn narrowed_in_body(test: &HirExpr) -> Option<Narrowing> {
    match &test.kind {
        HirExprKind::Compare {
            op: HirCmpOp::IsNot,
            left,
            right,
        } if right.is_none_literal() => some_narrowing(left),
        HirExprKind::Name(_) => some_narrowing(test),
        HirExprKind::Call { func, args, .. } if func == "isinstance" && args.len() == 2 => {
            let name = args[0].as_name()?;
            let members = match &args[0].ty {
                Type::Union(members) => members.clone(),
                _ => return None,
            };
            let wanted = isinstance_targets(&args[1]);
            let member = members.iter().find(|m| {
                wanted
                    .iter()
                    .any(|w| variant_name(w) == variant_name(m))
            })?;
            Some(Narrowing {
                name: name.to_string(),
                ty: member.clone(),
                kind: NarrowKind::Variant(members),
            })
        }
        _ => None,
    }
}

/// Narrowing that holds in the `else` branch (`if x is None: ... else: ...`)
pub fn narrowed_in_else(test: &HirExpr) -> Option<Narrowing> {
    match &test.kind {
        HirExprKind::Compare {
            op: HirCmpOp::Is,
            left,
            right,
        } if right.is_none_literal() => some_narrowing(left),
        HirExprKind::UnaryOp {
            op: HirUnaryOp::Not,
            operand,
        } if operand.as_name().is_some() => some_narrowing(operand),
        _ => None,
    }
}

fn some_narrowing(expr: &HirExpr) -> Option<Narrowing> {
    let name = expr.as_name()?;
    match &expr.ty {
        Type::Optional(inner) => Some(Narrowing {
            name: name.to_string(),
            ty: (**inner).clone(),
            kind: NarrowKind::Some,
        }),
        _ => None,
    }
}

/// `isinstance` の第 2 引数 (名前またはタプル) が指す型
fn isinstance_targets(expr: &HirExpr) -> Vec<Type> {
    let one = |e: &HirExpr| -> Option<Type> {
        let name = e.as_name()?;
        let is_class = name.chars().next().map_or(false, char::is_uppercase);
        isinstance_type(name, is_class)
    };
    match &expr.kind {
        HirExprKind::Tuple(items) => items.iter().filter_map(one).collect(),
        _ => one(expr).into_iter().collect(),
    }
}

/// Element type produced by iterating a value of `ty`
pub fn iter_element(ty: &Type) -> Type {
    match ty.unwrap_optional() {
        Type::Native(n) if n == "io.File" => Type::Str,
        Type::Native(n) if n == "json.Value" => ty.clone(),
        other => other.element(),
    }
}

/// Type parameter anywhere inside the type
pub fn contains_generic(ty: &Type) -> bool {
    match ty {
        Type::Generic(_) => true,
        Type::List(t) | Type::Set(t) | Type::Optional(t) => contains_generic(t),
        Type::Dict(k, v) => contains_generic(k) || contains_generic(v),
        Type::Tuple(items) | Type::Union(items) => items.iter().any(contains_generic),
        Type::Callable { params, ret } => params.iter().any(contains_generic) || contains_generic(ret),
        _ => false,
    }
}

/// 呼び出し側から渡す証拠として使える型
fn usable_evidence(ty: &Type) -> bool {
    !ty.is_unknown() && !contains_generic(ty)
}

fn is_lambda(expr: &HirExpr) -> bool {
    matches!(expr.kind, HirExprKind::Lambda { .. })
}

fn lambda_arity(expr: &HirExpr) -> usize {
    match &expr.kind {
        HirExprKind::Lambda { params, .. } => params.len(),
        _ => 0,
    }
}

/// 1 関数 (またはモジュール本体) の推論
struct FnInfer<'a> {
    ctx: &'a mut Context,
    class: Option<String>,
    /// モジュール本体ではローカル = グローバル
    is_module: bool,
    locals: BTreeMap<String, Type>,
    declared: BTreeSet<String>,
    /// 注釈のない引数
    params: BTreeSet<String>,
    /// 内包表記・ラムダ・TempBind の束縛
    scopes: Vec<BTreeMap<String, Type>>,
    narrowed: Vec<BTreeMap<String, Type>>,
    outer: Vec<BTreeMap<String, Type>>,
    returns: Vec<Type>,
    yields: Vec<Type>,
    usage: BTreeMap<String, Usage>,
}

impl<'a> FnInfer<'a> {
    fn new(ctx: &'a mut Context, class: Option<String>, outer: Vec<BTreeMap<String, Type>>) -> Self {
        Self {
            ctx,
            class,
            is_module: false,
            locals: BTreeMap::new(),
            declared: BTreeSet::new(),
            params: BTreeSet::new(),
            scopes: Vec::new(),
            narrowed: Vec::new(),
            outer,
            returns: Vec::new(),
            yields: Vec::new(),
            usage: BTreeMap::new(),
        }
    }

    fn locals(&self) -> &BTreeMap<String, Type> {
        if self.is_module {
            &self.ctx.globals
        } else {
            &self.locals
        }
    }

    fn locals_mut(&mut self) -> &mut BTreeMap<String, Type> {
        if self.is_module {
            &mut self.ctx.globals
        } else {
            &mut self.locals
        }
    }

    // --- 名前 ---

    fn lookup(&self, name: &str) -> Type {
        for scope in self.scopes.iter().rev() {
            if let Some(t) = scope.get(name) {
                return t.clone();
            }
        }
        for scope in self.narrowed.iter().rev() {
            if let Some(t) = scope.get(name) {
                return t.clone();
            }
        }
        if let Some(t) = self.locals().get(name) {
            return t.clone();
        }
        for env in self.outer.iter().rev() {
            if let Some(t) = env.get(name) {
                return t.clone();
            }
        }
        if let Some(t) = self.ctx.globals.get(name) {
            return t.clone();
        }
        if let Some(sig) = self.ctx.functions.get(name) {
            return sig.callable();
        }
        if self.ctx.classes.contains_key(name) {
            return Type::Class(name.to_string());
        }
        match factory_type(name) {
            Some(made) => Type::Callable {
                params: Vec::new(),
                ret: Box::new(made),
            },
            None => Type::Unknown,
        }
    }

    fn in_binding_scope(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.contains_key(name))
    }

    /// 代入: 新しい型の証拠を足す
    fn bind_name(&mut self, name: &str, ty: &Type) {
        if let Some(scope) = self.scopes.iter_mut().rev().find(|s| s.contains_key(name)) {
            if let Some(cur) = scope.get_mut(name) {
                *cur = refine(cur, ty);
            }
            return;
        }
        let declared = self.declared.contains(name);
        let locals = self.locals_mut();
        match locals.get_mut(name) {
            Some(cur) if declared => {
                if cur.contains_unknown() {
                    *cur = refine(cur, ty);
                }
            }
            Some(cur) => *cur = refine(cur, ty),
            None => {
                locals.insert(name.to_string(), ty.clone());
            }
        }
    }

    /// 既存の変数への証拠 (`xs.append(1)` → `xs: list[int]`)
    fn refine_var(&mut self, name: &str, evidence: &Type) {
        if self.in_binding_scope(name) || self.locals().contains_key(name) {
            self.bind_name(name, evidence);
            return;
        }
        if self.outer.iter().any(|env| env.contains_key(name)) {
            return;
        }
        if let Some(cur) = self.ctx.globals.get_mut(name) {
            *cur = refine(cur, evidence);
        }
    }

    /// 式が指す場所 (変数または self のフィールド) への証拠
    fn refine_place(&mut self, place: &HirExpr, evidence: &Type) {
        match &place.kind {
            HirExprKind::Name(n) => self.refine_var(n, evidence),
            HirExprKind::Attribute { value, attr } => {
                if let Type::Class(class) = value.ty.unwrap_optional() {
                    let class = class.clone();
                    self.refine_field(&class, attr, evidence);
                }
            }
            _ => {}
        }
    }

    fn refine_field(&mut self, class: &str, attr: &str, evidence: &Type) {
        let owner = self.field_owner(class, attr).unwrap_or_else(|| class.to_string());
        if let Some(info) = self.ctx.classes.get_mut(&owner) {
            let declared = info.declared.contains(attr);
            let cur = info.fields.entry(attr.to_string()).or_insert(Type::Unknown);
            if !declared || cur.contains_unknown() {
                *cur = refine(cur, evidence);
            }
            if !info.field_order.iter().any(|f| f == attr) {
                info.field_order.push(attr.to_string());
            }
        }
    }

    /// フィールドを宣言しているクラス (基底をたどる)
    fn field_owner(&self, class: &str, attr: &str) -> Option<String> {
        let mut current = Some(class.to_string());
        while let Some(name) = current {
            let info = self.ctx.classes.get(&name)?;
            if info.fields.contains_key(attr) {
                return Some(name);
            }
            current = info.base.clone();
        }
        None
    }

    fn field_type(&self, class: &str, attr: &str) -> Option<Type> {
        let mut current = Some(class.to_string());
        while let Some(name) = current {
            let info = self.ctx.classes.get(&name)?;
            if let Some(t) = info.fields.get(attr) {
                return Some(t.clone());
            }
            if info.properties.contains(attr) {
                return self
                    .ctx
                    .functions
                    .get(&format!("{name}.{attr}"))
                    .map(|sig| sig.ret.clone());
            }
            if let Some(t) = info.attrs.get(attr) {
                return Some(t.clone());
            }
            current = info.base.clone();
        }
        None
    }

    /// `Class.method` のキー (基底をたどる)
    fn find_method(&self, class: &str, method: &str) -> Option<String> {
        let mut current = Some(class.to_string());
        while let Some(name) = current {
            let key = format!("{name}.{method}");
            if self.ctx.functions.contains_key(&key) {
                return Some(key);
            }
            current = self.ctx.classes.get(&name)?.base.clone();
        }
        None
    }

    fn usage_of(&mut self, expr: &HirExpr) -> Option<&mut Usage> {
        let name = expr.as_name()?;
        if !self.params.contains(name) || self.in_binding_scope(name) {
            return None;
        }
        Some(self.usage.entry(name.to_string()).or_default())
    }

    /// `x + 1` の相手側の型を x の証拠にする
    fn note_partner(&mut self, subject: &HirExpr, other: &Type) {
        let primitive = matches!(other, Type::Int | Type::Float | Type::Str | Type::Bool);
        if !primitive || !subject.ty.is_unknown() {
            return;
        }
        if let Some(name) = subject.as_name() {
            // ラムダ引数はその場で決める
            if let Some(scope) = self.scopes.iter_mut().rev().find(|s| s.contains_key(name)) {
                if let Some(cur) = scope.get_mut(name) {
                    *cur = refine(cur, other);
                }
                return;
            }
        }
        if let Some(usage) = self.usage_of(subject) {
            usage.partner = Some(match &usage.partner {
                Some(p) => refine(p, other),
                None => other.clone(),
            });
        }
    }

    /// 数値演算の被演算子に現れる注釈なし引数 (`(a + b) / 2` の a と b も)
    fn note_numeric(&mut self, expr: &HirExpr) {
        match &expr.kind {
            HirExprKind::BinOp { op, left, right } if op.is_arithmetic() => {
                self.note_numeric(left);
                self.note_numeric(right);
            }
            HirExprKind::UnaryOp { operand, .. } => self.note_numeric(operand),
            _ => {
                if let Some(usage) = self.usage_of(expr) {
                    usage.numeric = true;
                }
            }
        }
    }

    // --- ブロックと文 ---

    fn block(&mut self, stmts: &mut [HirStmt]) -> Result<()> {
        let mut pushed = 0;
        for stmt in stmts.iter_mut() {
            self.stmt(stmt)?;
            // `if x is None: return ...` の後では x は中身の型
            if let HirStmtKind::If { test, body, orelse } = &stmt.kind {
                if orelse.is_empty() && visit::always_returns(body) {
                    if let Some(n) = narrowed_in_else(test) {
                        self.narrowed.push(BTreeMap::from([(n.name, n.ty)]));
                        pushed += 1;
                    }
                }
            }
        }
        for _ in 0..pushed {
            self.narrowed.pop();
        }
        Ok(())
    }

    fn with_narrowing(
        &mut self,
        narrowing: Option<Narrowing>,
        stmts: &mut [HirStmt],
    ) -> Result<()> {
        match narrowing {
            Some(n) => {
                self.narrowed.push(BTreeMap::from([(n.name, n.ty)]));
                let result = self.block(stmts);
                self.narrowed.pop();
                result
            }
            None => self.block(stmts),
        }
    }

    fn stmt(&mut self, stmt: &mut HirStmt) -> Result<()> {
        let pos = stmt.pos;
        match &mut stmt.kind {
            HirStmtKind::Assign {
                target,
                value,
                annotation,
            } => {
                let vt = self.expr(value)?;
                if let (Some(ann), AssignTarget::Name(name)) = (annotation.as_ref(), &*target) {
                    if !self.declared.contains(name.as_str()) {
                        self.declared.insert(name.clone());
                        let prev = self.locals().get(name.as_str()).cloned();
                        let ty = match prev {
                            Some(p) if ann.contains_unknown() => refine(ann, &p),
                            _ => ann.clone(),
                        };
                        self.locals_mut().insert(name.clone(), ty);
                    }
                }
                self.assign(target, &vt)?;
            }
            HirStmtKind::AugAssign { target, op, value } => {
                let vt = self.expr(value)?;
                let op = *op;
                let int_pow = is_integer_exponent(value);
                match target {
                    AssignTarget::Name(name) => {
                        let current = self.lookup(name);
                        let subject = HirExpr::typed(HirExprKind::Name(name.clone()), current.clone(), pos);
                        self.note_partner(&subject, &vt);
                        let result = binop_result_type(op, &current, &vt, int_pow, pos)?;
                        let evidence = if result.is_unknown() { vt.clone() } else { result };
                        if op.is_arithmetic() || current.is_unknown() {
                            self.bind_name(name, &evidence);
                        }
                    }
                    AssignTarget::Attribute { value: obj, attr } => {
                        let ot = self.expr(obj)?;
                        let current = self.attribute_type(&ot, attr);
                        let result = binop_result_type(op, &current, &vt, int_pow, pos)?;
                        if let Type::Class(class) = ot.unwrap_optional() {
                            let class = class.clone();
                            let evidence = if result.is_unknown() { vt.clone() } else { result };
                            self.refine_field(&class, attr, &evidence);
                        }
                    }
                    AssignTarget::Subscript { value: obj, index } => {
                        let ot = self.expr(obj)?;
                        let it = self.expr(index)?;
                        let current = subscript_type(&ot, index);
                        let result = binop_result_type(op, &current, &vt, int_pow, pos)?;
                        let elem = if result.is_unknown() { vt.clone() } else { result };
                        self.container_store(obj, &ot, &it, &elem);
                    }
                    AssignTarget::Tuple(_) => {}
                }
            }
            HirStmtKind::If { test, body, orelse } => {
                self.expr(test)?;
                let then_narrow = narrowed_in_body(test);
                let else_narrow = narrowed_in_else(test);
                self.with_narrowing(then_narrow, body)?;
                self.with_narrowing(else_narrow, orelse)?;
            }
            HirStmtKind::While { test, body } => {
                self.expr(test)?;
                let narrow = narrowed_in_body(test);
                self.with_narrowing(narrow, body)?;
            }
            HirStmtKind::For { target, iter, body } => {
                let it = self.expr(iter)?;
                if it.is_unknown() {
                    if let Some(usage) = self.usage_of(iter) {
                        usage.container.get_or_insert(Type::list(Type::Unknown));
                    }
                }
                let elem = iter_element(&it);
                self.bind_pattern(target, &elem, false);
                self.block(body)?;
            }
            HirStmtKind::Return(value) => {
                let t = match value {
                    Some(v) => self.expr(v)?,
                    None => Type::None,
                };
                self.returns.push(t);
            }
            HirStmtKind::Raise { exc, cause } => {
                if let Some(e) = exc {
                    self.expr(e)?;
                }
                if let Some(c) = cause {
                    self.expr(c)?;
                }
            }
            HirStmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                self.block(body)?;
                for handler in handlers.iter_mut() {
                    if let Some(name) = &handler.name {
                        let ty = match handler.types.as_slice() {
                            [single] => Type::Class(single.clone()),
                            _ => Type::Native("DynError".to_string()),
                        };
                        self.bind_name(name, &ty);
                    }
                    self.block(&mut handler.body)?;
                }
                self.block(orelse)?;
                self.block(finalbody)?;
            }
            HirStmtKind::With {
                context,
                binding,
                body,
            } => {
                let ct = self.expr(context)?;
                if let Some(name) = binding {
                    let bound = self.entered_type(&ct);
                    self.bind_name(name, &bound);
                }
                self.block(body)?;
            }
            HirStmtKind::Expr(e) => {
                self.expr(e)?;
            }
            HirStmtKind::Assert { test, msg } => {
                self.expr(test)?;
                if let Some(m) = msg {
                    self.expr(m)?;
                }
            }
            HirStmtKind::FuncDef(f) => {
                if self.is_module {
                    infer_function(self.ctx, f, None, Vec::new())?;
                } else {
                    let mut outer = self.outer.clone();
                    outer.push(self.locals.clone());
                    infer_function(self.ctx, f, None, outer)?;
                }
            }
            HirStmtKind::ClassDef(c) => self.class(c)?,
            HirStmtKind::Break
            | HirStmtKind::Continue
            | HirStmtKind::Pass
            | HirStmtKind::Import(_) => {}
        }
        Ok(())
    }

    /// `with X as y:` の y の型
    fn entered_type(&self, ct: &Type) -> Type {
        if let Type::Class(class) = ct {
            if let Some(key) = self.find_method(class, "__enter__") {
                if let Some(sig) = self.ctx.functions.get(&key) {
                    if !matches!(sig.ret, Type::None | Type::Unknown) {
                        return sig.ret.clone();
                    }
                }
            }
        }
        ct.clone()
    }

    fn assign(&mut self, target: &mut AssignTarget, ty: &Type) -> Result<()> {
        match target {
            AssignTarget::Name(name) => self.bind_name(name, ty),
            AssignTarget::Tuple(items) => {
                let n = items.len();
                for (i, item) in items.iter_mut().enumerate() {
                    let part = match ty {
                        Type::Tuple(ts) if ts.len() == n => ts[i].clone(),
                        other => iter_element(other),
                    };
                    self.assign(item, &part)?;
                }
            }
            AssignTarget::Attribute { value, attr } => {
                let ot = self.expr(value)?;
                if let Type::Class(class) = ot.unwrap_optional() {
                    let class = class.clone();
                    self.refine_field(&class, attr, ty);
                }
            }
            AssignTarget::Subscript { value, index } => {
                let ot = self.expr(value)?;
                let it = self.expr(index)?;
                self.container_store(value, &ot, &it, ty);
            }
        }
        Ok(())
    }

    /// `d[k] = v` / `xs[i] = v` の証拠
    fn container_store(&mut self, place: &HirExpr, container: &Type, index: &Type, elem: &Type) {
        let evidence = match container.unwrap_optional() {
            Type::Dict(_, _) => Type::dict(index.clone(), elem.clone()),
            Type::List(_) => Type::list(elem.clone()),
            Type::Unknown if matches!(index, Type::Str) => Type::dict(Type::Str, elem.clone()),
            _ => return,
        };
        self.refine_place(place, &evidence);
    }

    fn bind_pattern(&mut self, pattern: &Pattern, ty: &Type, scoped: bool) {
        match pattern {
            Pattern::Name(name) => {
                if scoped {
                    if let Some(scope) = self.scopes.last_mut() {
                        scope.insert(name.clone(), ty.clone());
                    }
                } else {
                    self.bind_name(name, ty);
                }
            }
            Pattern::Tuple(items) => {
                let n = items.len();
                for (i, item) in items.iter().enumerate() {
                    let part = match ty {
                        Type::Tuple(ts) if ts.len() == n => ts[i].clone(),
                        other => iter_element(other),
                    };
                    self.bind_pattern(item, &part, scoped);
                }
            }
            Pattern::Wildcard => {}
        }
    }

    fn class(&mut self, class: &mut HirClass) -> Result<()> {
        let name = class.name.clone();
        for (attr, value) in class.class_attrs.iter_mut() {
            let t = self.expr(value)?;
            if let Some(info) = self.ctx.classes.get_mut(&name) {
                info.attrs.insert(attr.clone(), t);
            }
        }
        for field in class.fields.iter_mut() {
            if let Some(default) = field.default.as_mut() {
                let t = self.expr(default)?;
                self.refine_field(&name, &field.name, &t);
            }
        }
        for method in class.methods.iter_mut() {
            infer_function(self.ctx, method, Some(&name), Vec::new())?;
        }
        Ok(())
    }

    // --- 式 ---

    fn exprs(&mut self, exprs: &mut [HirExpr]) -> Result<Vec<Type>> {
        exprs.iter_mut().map(|e| self.expr(e)).collect()
    }

    /// 要素型の合成 (Starred は展開した要素)
    fn element_types(&mut self, items: &mut [HirExpr]) -> Result<Type> {
        let mut acc = Type::Unknown;
        for item in items.iter_mut() {
            let t = self.expr(item)?;
            let t = if matches!(item.kind, HirExprKind::Starred(_)) {
                iter_element(&t)
            } else {
                t
            };
            acc = refine(&acc, &t);
        }
        Ok(acc)
    }

    fn expr(&mut self, e: &mut HirExpr) -> Result<Type> {
        self.expr_with_hint(e, &[])
    }

    /// ラムダには引数型のヒントを渡す
    fn expr_with_hint(&mut self, e: &mut HirExpr, hint: &[Type]) -> Result<Type> {
        let pos = e.pos;
        let ty = match &mut e.kind {
            HirExprKind::Int { .. } => Type::Int,
            HirExprKind::Float { .. } => Type::Float,
            HirExprKind::Str { .. } => Type::Str,
            HirExprKind::Bytes(_) => Type::Bytes,
            HirExprKind::Bool(_) => Type::Bool,
            HirExprKind::NoneLit => Type::None,
            HirExprKind::Name(name) => self.lookup(name),
            HirExprKind::Path(path) => stdlib::lookup_constant(path)
                .map(|spec| (spec.ret_ty_resolver)(&[]))
                .unwrap_or(Type::Unknown),
            HirExprKind::Attribute { value, attr } => {
                let vt = self.expr(value)?;
                self.attribute_type(&vt, attr)
            }
            HirExprKind::Subscript { value, index } => {
                let vt = self.expr(value)?;
                let it = self.expr(index)?;
                if let Some(name) = index.as_name() {
                    if is_index_name(name) {
                        if let Some(usage) = self.usage_of(index) {
                            usage.index_position = true;
                        }
                    }
                }
                if vt.is_unknown() {
                    let evidence = match it {
                        Type::Int => Some(Type::list(Type::Unknown)),
                        Type::Str => Some(Type::dict(Type::Str, Type::Unknown)),
                        _ => None,
                    };
                    if let (Some(evidence), Some(usage)) = (evidence, self.usage_of(value)) {
                        usage.container.get_or_insert(evidence);
                    }
                }
                subscript_type(&vt, index)
            }
            HirExprKind::Slice {
                value,
                lower,
                upper,
                step,
            } => {
                let vt = self.expr(value)?;
                for part in [lower, upper, step].into_iter().flatten() {
                    self.expr(part)?;
                }
                match vt.unwrap_optional() {
                    Type::Tuple(_) => Type::list(vt.element()),
                    other => other.clone(),
                }
            }
            HirExprKind::Call { func, args, kwargs } => {
                let func = func.clone();
                self.call(&func, args, kwargs, pos)?
            }
            HirExprKind::MethodCall {
                receiver,
                method,
                args,
                kwargs,
            } => {
                let method = method.clone();
                self.method_call(receiver, &method, args, kwargs)?
            }
            HirExprKind::DynCall { callee, args } => {
                let ct = self.expr(callee)?;
                let hints: Vec<Type> = match &ct {
                    Type::Callable { params, .. } => params.clone(),
                    _ => Vec::new(),
                };
                for (i, arg) in args.iter_mut().enumerate() {
                    let t = self.expr(arg)?;
                    // 変数に入ったラムダの引数型を呼び出し側から決める
                    if let (Some(name), true) = (callee.as_name(), usable_evidence(&t)) {
                        if hints.get(i).map_or(false, Type::is_unknown) {
                            let mut params = hints.clone();
                            params[i] = t.clone();
                            let ret = match &ct {
                                Type::Callable { ret, .. } => (**ret).clone(),
                                _ => Type::Unknown,
                            };
                            let name = name.to_string();
                            self.refine_var(&name, &Type::Callable { params, ret: Box::new(ret) });
                        }
                    }
                }
                match ct {
                    Type::Callable { ret, .. } => *ret,
                    Type::Class(c) => Type::Class(c),
                    _ => Type::Unknown,
                }
            }
            HirExprKind::BinOp { op, left, right } => {
                let lt = self.expr(left)?;
                let rt = self.expr(right)?;
                self.note_partner(left, &rt);
                self.note_partner(right, &lt);
                if numeric_only(*op, &lt, &rt) {
                    self.note_numeric(left);
                    self.note_numeric(right);
                }
                // ラムダ引数が決まったら読み直す
                let lt = if lt.is_unknown() { self.retype_name(left) } else { lt };
                let rt = if rt.is_unknown() { self.retype_name(right) } else { rt };
                binop_result_type(*op, &lt, &rt, is_integer_exponent(right), pos)?
            }
            HirExprKind::UnaryOp { op, operand } => {
                let t = self.expr(operand)?;
                unary_result_type(*op, &t)
            }
            HirExprKind::Compare { op, left, right } => {
                let lt = self.expr(left)?;
                let rt = self.expr(right)?;
                if !matches!(op, HirCmpOp::In | HirCmpOp::NotIn | HirCmpOp::Is | HirCmpOp::IsNot) {
                    self.note_partner(left, &rt);
                    self.note_partner(right, &lt);
                } else if matches!(op, HirCmpOp::In | HirCmpOp::NotIn) && rt.is_unknown() {
                    if let Some(usage) = self.usage_of(right) {
                        let evidence = if matches!(lt, Type::Str) && usage.family.is_none() {
                            Type::list(Type::Str)
                        } else {
                            Type::list(lt.clone())
                        };
                        usage.container.get_or_insert(evidence);
                    }
                }
                Type::Bool
            }
            HirExprKind::BoolOp { op, left, right } => {
                let lt = self.expr(left)?;
                let narrow = match op {
                    HirBoolOp::And => narrowed_in_body(left),
                    HirBoolOp::Or => narrowed_in_else(left),
                };
                let rt = match narrow {
                    Some(n) => {
                        self.narrowed.push(BTreeMap::from([(n.name, n.ty)]));
                        let rt = self.expr(right);
                        self.narrowed.pop();
                        rt?
                    }
                    None => self.expr(right)?,
                };
                bool_op_type(*op, &lt, &rt)
            }
            HirExprKind::IfExpr { test, body, orelse } => {
                self.expr(test)?;
                let then_narrow = narrowed_in_body(test);
                let else_narrow = narrowed_in_else(test);
                let bt = self.narrowed_expr(then_narrow, body)?;
                let ot = self.narrowed_expr(else_narrow, orelse)?;
                if bt.is_unknown() {
                    ot
                } else if ot.is_unknown() {
                    bt
                } else {
                    join(&bt, &ot)
                }
            }
            HirExprKind::TempBind { name, value, body } => {
                let vt = self.expr(value)?;
                self.scopes.push(BTreeMap::from([(name.clone(), vt)]));
                let bt = self.expr(body);
                self.scopes.pop();
                bt?
            }
            HirExprKind::FString(parts) => {
                for part in parts.iter_mut() {
                    if let FStringFragment::Expr { value, .. } = part {
                        self.expr(value)?;
                    }
                }
                Type::Str
            }
            HirExprKind::List(items) => Type::list(self.element_types(items)?),
            HirExprKind::Set(items) => Type::set(self.element_types(items)?),
            HirExprKind::Tuple(items) => Type::Tuple(self.exprs(items)?),
            HirExprKind::Dict(pairs) => {
                let mut kt = Type::Unknown;
                let mut vt = Type::Unknown;
                for (k, v) in pairs.iter_mut() {
                    let k = self.expr(k)?;
                    let v = self.expr(v)?;
                    kt = refine(&kt, &k);
                    vt = refine(&vt, &v);
                }
                Type::dict(kt, vt)
            }
            HirExprKind::Comprehension(comp) => self.comprehension(comp)?,
            HirExprKind::Lambda { params, body, .. } => {
                let mut scope = BTreeMap::new();
                for (i, p) in params.iter().enumerate() {
                    scope.insert(p.clone(), hint.get(i).cloned().unwrap_or(Type::Unknown));
                }
                self.scopes.push(scope);
                let bt = self.expr(body);
                let scope = self.scopes.pop().unwrap_or_default();
                let bt = bt?;
                Type::Callable {
                    params: params
                        .iter()
                        .map(|p| scope.get(p).cloned().unwrap_or(Type::Unknown))
                        .collect(),
                    ret: Box::new(bt),
                }
            }
            HirExprKind::Await(inner) => self.expr(inner)?,
            HirExprKind::Yield(value) => {
                let t = match value {
                    Some(v) => self.expr(v)?,
                    None => Type::None,
                };
                self.yields.push(t);
                Type::None
            }
            HirExprKind::Starred(inner) => self.expr(inner)?,
            HirExprKind::NamedExpr { target, value } => {
                let vt = self.expr(value)?;
                self.bind_name(target, &vt);
                vt
            }
        };
        e.ty = ty.clone();
        Ok(ty)
    }

    fn narrowed_expr(&mut self, narrowing: Option<Narrowing>, e: &mut HirExpr) -> Result<Type> {
        match narrowing {
            Some(n) => {
                self.narrowed.push(BTreeMap::from([(n.name, n.ty)]));
                let t = self.expr(e);
                self.narrowed.pop();
                t
            }
            None => self.expr(e),
        }
    }

    /// note_partner で決まったラムダ引数の型を式に反映する
    fn retype_name(&self, e: &mut HirExpr) -> Type {
        if let Some(name) = e.as_name() {
            let t = self.lookup(name);
            e.ty = t.clone();
            return t;
        }
        e.ty.clone()
    }

    fn attribute_type(&self, vt: &Type, attr: &str) -> Type {
        match vt.unwrap_optional() {
            Type::Class(class) => self.field_type(class, attr).unwrap_or(Type::Unknown),
            Type::Native(n) if n == "argparse.Namespace" => self
                .ctx
                .argparse_fields
                .get(attr)
                .cloned()
                .unwrap_or(Type::Str),
            other => stdlib::lookup_attribute(other, attr)
                .map(|spec| (spec.ret_ty_resolver)(other, &[]))
                .unwrap_or(Type::Unknown),
        }
    }

    fn comprehension(&mut self, comp: &mut Comprehension) -> Result<Type> {
        let mut pushed = 0;
        let mut result = Ok(());
        for it in comp.iters.iter_mut() {
            let t = match self.expr(&mut it.iter) {
                Ok(t) => t,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            };
            self.scopes.push(BTreeMap::new());
            pushed += 1;
            self.bind_pattern(&it.target, &iter_element(&t), true);
            for guard in it.guards.iter_mut() {
                if let Err(e) = self.expr(guard) {
                    result = Err(e);
                    break;
                }
            }
        }
        let et = match result {
            Ok(()) => self.expr(&mut comp.element),
            Err(e) => Err(e),
        };
        let vt = match (&et, comp.value.as_mut()) {
            (Ok(_), Some(v)) => Some(self.expr(v)),
            _ => None,
        };
        for _ in 0..pushed {
            self.scopes.pop();
        }
        let et = et?;
        let vt = vt.transpose()?.unwrap_or(Type::Unknown);
        Ok(match comp.kind {
            ComprehensionKind::List | ComprehensionKind::Generator => Type::list(et),
            ComprehensionKind::Set => Type::set(et),
            ComprehensionKind::Dict => Type::dict(et, vt),
        })
    }

    /// 引数を推論する (ラムダは他の引数が決まってから)
    fn call_args(
        &mut self,
        func: &str,
        args: &mut [HirExpr],
        kwargs: &mut [(String, HirExpr)],
        receiver: Option<&Type>,
    ) -> Result<(Vec<Type>, Vec<(String, Type)>)> {
        let mut arg_types = vec![Type::Unknown; args.len()];
        for (i, arg) in args.iter_mut().enumerate() {
            if !is_lambda(arg) {
                arg_types[i] = self.expr(arg)?;
            }
        }
        let mut kw_types = Vec::with_capacity(kwargs.len());
        for (k, v) in kwargs.iter_mut() {
            if !is_lambda(v) {
                kw_types.push((k.clone(), self.expr(v)?));
            }
        }
        let context: Vec<Type> = match receiver {
            Some(r) => std::iter::once(r.clone()).chain(arg_types.iter().cloned()).collect(),
            None => arg_types.clone(),
        };
        let declared = self.declared_callable_params(func);
        for (i, arg) in args.iter_mut().enumerate() {
            if is_lambda(arg) {
                let arity = lambda_arity(arg);
                let mut hint = lambda_param_types(func, Some(i), None, &context, arity);
                if let Some(Type::Callable { params, .. }) = declared.get(i) {
                    hint = params.clone();
                }
                arg_types[i] = self.expr_with_hint(arg, &hint)?;
            }
        }
        for (k, v) in kwargs.iter_mut() {
            if is_lambda(v) {
                let arity = lambda_arity(v);
                let hint = lambda_param_types(func, None, Some(k), &context, arity);
                let t = self.expr_with_hint(v, &hint)?;
                kw_types.push((k.clone(), t));
            }
        }
        Ok((arg_types, kw_types))
    }

    /// ユーザ関数の引数に宣言された Callable 型 (ラムダのヒント)
    fn declared_callable_params(&self, func: &str) -> Vec<Type> {
        match self.ctx.functions.get(func) {
            Some(sig) => sig.params[sig.offset()..].iter().map(|p| p.ty.clone()).collect(),
            None => Vec::new(),
        }
    }

    fn record_call(&mut self, key: &str, offset: usize, args: &[Type], kwargs: &[(String, Type)]) {
        let Some(sig) = self.ctx.functions.get(key) else {
            return;
        };
        let names: Vec<String> = sig.params.iter().map(|p| p.name.clone()).collect();
        let entry = self
            .ctx
            .call_args
            .entry(key.to_string())
            .or_insert_with(|| vec![Type::Unknown; names.len()]);
        for (i, t) in args.iter().enumerate() {
            if let Some(slot) = entry.get_mut(i + offset) {
                if usable_evidence(t) {
                    *slot = refine(slot, t);
                }
            }
        }
        for (k, t) in kwargs {
            if let Some(idx) = names.iter().position(|n| n == k) {
                if usable_evidence(t) {
                    entry[idx] = refine(&entry[idx], t);
                }
            }
        }
    }

    fn call(
        &mut self,
        func: &str,
        args: &mut [HirExpr],
        kwargs: &mut [(String, HirExpr)],
        pos: SourcePos,
    ) -> Result<Type> {
        let (arg_types, kw_types) = self.call_args(func, args, kwargs, None)?;
        if func == "isinstance" && args.len() == 2 {
            let targets = isinstance_targets(&args[1]);
            if let Some(usage) = self.usage_of(&args[0]) {
                usage.isinstance.extend(targets);
            }
            return Ok(Type::Bool);
        }
        if func == "super" {
            let base = self
                .class
                .as_ref()
                .and_then(|c| self.ctx.classes.get(c))
                .and_then(|info| info.base.clone());
            return Ok(base.map(Type::Class).unwrap_or(Type::Unknown));
        }
        if let Some(sig) = self.ctx.functions.get(func) {
            let (offset, ret) = (sig.offset(), sig.ret.clone());
            self.record_call(func, offset, &arg_types, &kw_types);
            return Ok(ret);
        }
        if let Some(info) = self.ctx.classes.get(func) {
            let init = self.find_method(func, "__init__");
            match init {
                Some(key) => self.record_call(&key, 1, &arg_types, &kw_types),
                None if info.is_dataclass => {
                    let order = info.field_order.clone();
                    for (name, t) in order.iter().zip(arg_types.iter()) {
                        if usable_evidence(t) {
                            self.refine_field(func, name, t);
                        }
                    }
                    for (k, t) in &kw_types {
                        if usable_evidence(t) {
                            self.refine_field(func, k, t);
                        }
                    }
                }
                None => {}
            }
            return Ok(Type::Class(func.to_string()));
        }
        if ErrorTaxon::is_builtin_exception(func) {
            return Ok(Type::Class(func.to_string()));
        }
        if stdlib::is_builtin(func) {
            return Ok(builtin_call_type(func, &arg_types, &kw_types));
        }
        if let Some(spec) = stdlib::lookup_function(func, args.len()) {
            return Ok((spec.ret_ty_resolver)(&arg_types));
        }
        trace!(func, %pos, "call of unknown callee");
        Ok(Type::Unknown)
    }

    fn method_call(
        &mut self,
        receiver: &mut HirExpr,
        method: &str,
        args: &mut [HirExpr],
        kwargs: &mut [(String, HirExpr)],
    ) -> Result<Type> {
        let rt = self.expr(receiver)?;
        let base = rt.unwrap_optional().clone();
        let table_key = match base {
            Type::List(_) => "list.sort",
            _ => "",
        };
        let hint_key = if method == "sort" { table_key } else { method };
        let (arg_types, kw_types) = self.call_args(hint_key, args, kwargs, Some(&base))?;

        match &base {
            Type::Class(class) => {
                if let Some(key) = self.find_method(class, method) {
                    let (offset, ret) = match self.ctx.functions.get(&key) {
                        Some(sig) => (sig.offset(), sig.ret.clone()),
                        None => (1, Type::Unknown),
                    };
                    self.record_call(&key, offset, &arg_types, &kw_types);
                    return Ok(ret);
                }
                return Ok(Type::Unknown);
            }
            Type::Native(n) if n == "argparse.ArgumentParser" => {
                return Ok(match method {
                    "add_argument" => {
                        if let Some(arg) = argparse_argument(args, kwargs) {
                            self.ctx.argparse_fields.insert(arg.field, arg.ty);
                        }
                        Type::None
                    }
                    "parse_args" => Type::Native("argparse.Namespace".to_string()),
                    _ => Type::None,
                });
            }
            _ => {}
        }

        // 受け手の要素型の証拠
        let first = arg_types.first().cloned().unwrap_or(Type::Unknown);
        let family = if base.is_unknown() {
            unique_method_family(method)
        } else {
            None
        };
        let shape = family.as_ref().unwrap_or(&base);
        let evidence = match (shape, method) {
            (Type::List(_), "append" | "appendleft") => Some(Type::list(first.clone())),
            (Type::List(_), "insert") => {
                Some(Type::list(arg_types.get(1).cloned().unwrap_or(Type::Unknown)))
            }
            (Type::List(_), "extend") => Some(Type::list(iter_element(&first))),
            (Type::Set(_), "add") => Some(Type::set(first.clone())),
            (Type::Set(_), "update") => Some(Type::set(iter_element(&first))),
            (Type::Dict(_, _), "setdefault") | (Type::Dict(_, _), "get") if arg_types.len() == 2 => {
                Some(Type::dict(first.clone(), arg_types[1].clone()))
            }
            (Type::Dict(_, _), "update") => Some(first.clone()),
            (other, _) if base.is_unknown() => Some(other.clone()),
            _ => None,
        };
        let shape_evidence = evidence.clone().or_else(|| family.clone());
        if let Some(evidence) = evidence {
            if usable_evidence(&evidence) || matches!(evidence, Type::List(_) | Type::Set(_) | Type::Dict(_, _)) {
                self.refine_place(receiver, &evidence);
            }
        }
        // 注釈なし引数: 要素型も含めて族を証拠にする
        if let Some(ev) = shape_evidence.filter(|t| matches!(t, Type::List(_) | Type::Set(_) | Type::Dict(_, _))) {
            if let Some(usage) = self.usage_of(receiver) {
                usage.family = Some(match usage.family.take() {
                    Some(f) => refine(&f, &ev),
                    None => ev,
                });
            }
        }

        let recv_ty = match receiver.as_name() {
            Some(name) => {
                let t = self.lookup(name);
                receiver.ty = t.clone();
                t
            }
            None => rt,
        };
        let recv_ty = match (recv_ty.unwrap_optional(), family) {
            (Type::Unknown, Some(f)) => f,
            (t, _) => t.clone(),
        };
        Ok(stdlib::lookup_method(&recv_ty, method, args.len())
            .map(|spec| (spec.ret_ty_resolver)(&recv_ty, &arg_types))
            .unwrap_or(Type::Unknown))
    }
}

fn subscript_type(container: &Type, index: &HirExpr) -> Type {
    match container.unwrap_optional() {
        Type::List(t) => (**t).clone(),
        Type::Dict(_, v) => (**v).clone(),
        Type::Str => Type::Str,
        Type::Bytes => Type::Int,
        Type::Tuple(items) => match &index.kind {
            HirExprKind::Int { value, .. } => {
                let n = items.len() as i64;
                let idx = if *value < 0 { n + value } else { *value };
                usize::try_from(idx)
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or(Type::Unknown)
            }
            _ => container.element(),
        },
        Type::Native(n) if n == "json.Value" => container.clone(),
        Type::Native(n) if n == "re.Match" => Type::Str,
        _ => Type::Unknown,
    }
}

/// `a or b` / `a and b` の結果型
///
/// 両辺が同じ型ならオペランドを返す意味を保ち、それ以外は bool。
pub fn bool_op_type(op: HirBoolOp, left: &Type, right: &Type) -> Type {
    if left.is_unknown() || right.is_unknown() {
        return Type::Unknown;
    }
    if variant_name(left) == variant_name(right) {
        return refine(left, right);
    }
    if let (HirBoolOp::Or, Type::Optional(inner)) = (op, left) {
        if variant_name(inner) == variant_name(right) {
            return refine(inner, right);
        }
    }
    Type::Bool
}

/// 被演算子が数値でなければならない演算か (`s % x` や集合の差は除く)
fn numeric_only(op: HirBinOp, left: &Type, right: &Type) -> bool {
    let open = |t: &Type| t.is_numeric() || t.is_unknown() || matches!(t, Type::Generic(_));
    matches!(
        op,
        HirBinOp::Sub | HirBinOp::Div | HirBinOp::FloorDiv | HirBinOp::Mod | HirBinOp::Pow
    ) && open(left.unwrap_optional())
        && open(right.unwrap_optional())
}

/// 引数 1 つの型を証拠から決める
fn choose_param_type(param: &ParamSig, call: &Type, usage: Option<&Usage>) -> Type {
    if param.fixed {
        return if param.declared.contains_unknown() && usable_evidence(call) {
            refine(&param.declared, call)
        } else {
            param.declared.clone()
        };
    }
    let isinstance = usage
        .map(|u| u.isinstance.iter().fold(Type::Unknown, |acc, t| refine(&acc, t)))
        .unwrap_or(Type::Unknown);
    let mut ty = if !call.is_unknown() {
        refine(call, &isinstance)
    } else if !isinstance.is_unknown() {
        isinstance
    } else {
        let u = usage.cloned().unwrap_or_default();
        u.partner
            .or(u.family)
            .or(u.container)
            .or(u.numeric.then_some(Type::Int))
            .unwrap_or(Type::Unknown)
    };
    if let Some(default) = &param.default_ty {
        if matches!(default, Type::None) {
            if !ty.is_unknown() {
                ty = Type::optional(ty);
            }
        } else {
            ty = refine(&ty, default);
        }
    }
    if ty.is_unknown() {
        if let Some(t) = type_from_name(&param.name) {
            ty = t;
        } else if usage.map_or(false, |u| u.index_position) && is_index_name(&param.name) {
            ty = Type::Int;
        }
    }
    ty
}

fn infer_function(
    ctx: &mut Context,
    f: &mut HirFunction,
    class: Option<&str>,
    outer: Vec<BTreeMap<String, Type>>,
) -> Result<()> {
    let key = match class {
        Some(c) => format!("{c}.{}", f.name),
        None => f.name.clone(),
    };
    let sig = match ctx.functions.get(&key) {
        Some(sig) => sig.clone(),
        None => {
            let sig = Signature::from_hir(f);
            ctx.functions.insert(key.clone(), sig.clone());
            sig
        }
    };
    for (param, ps) in f.params.iter_mut().zip(sig.params.iter()) {
        param.ty = ps.ty.clone();
    }

    let mut inf = FnInfer::new(ctx, class.map(str::to_string), outer);
    for (i, param) in f.params.iter().enumerate() {
        inf.locals.insert(param.name.clone(), param.ty.clone());
        if sig.params.get(i).map_or(false, |p| p.fixed) {
            inf.declared.insert(param.name.clone());
        } else {
            inf.params.insert(param.name.clone());
        }
    }
    let mut default_types = Vec::with_capacity(f.params.len());
    for param in f.params.iter_mut() {
        default_types.push(match param.default.as_mut() {
            Some(d) => Some(inf.expr(d)?),
            None => None,
        });
    }
    for (name, ty) in &sig.locals {
        if !inf.locals.contains_key(name) {
            inf.locals.insert(name.clone(), ty.clone());
        }
    }
    inf.block(&mut f.body)?;

    let ret = if sig.generator {
        Type::list(inf.yields.iter().fold(Type::Unknown, |acc, t| refine(&acc, t)))
    } else {
        let mut ret = inf
            .returns
            .iter()
            .fold(Type::Unknown, |acc, t| refine(&acc, t));
        if !visit::always_returns(&f.body) {
            ret = refine(&ret, &Type::None);
        }
        if ret.is_unknown() && inf.returns.is_empty() {
            Type::None
        } else {
            ret
        }
    };
    let ret = match &sig.ret_declared {
        Some(declared) if declared.contains_unknown() => refine(declared, &ret),
        Some(declared) => declared.clone(),
        None => ret,
    };
    f.ret = ret.clone();

    let params: BTreeSet<String> = f.params.iter().map(|p| p.name.clone()).collect();
    let locals: BTreeMap<String, Type> = inf
        .locals
        .iter()
        .filter(|(name, _)| !params.contains(*name))
        .map(|(n, t)| (n.clone(), t.clone()))
        .collect();
    let usage = std::mem::take(&mut inf.usage);
    drop(inf);

    f.locals = locals.clone();
    if let Some(entry) = ctx.functions.get_mut(&key) {
        entry.ret = ret;
        entry.locals = locals;
        for (name, u) in usage {
            entry.usage.entry(name).or_default().absorb(u);
        }
        for (ps, d) in entry.params.iter_mut().zip(default_types) {
            ps.default_ty = d;
        }
    }
    Ok(())
}

/// 呼び出し側と本体の証拠から注釈なし引数の型を決め直す
fn resolve_params(ctx: &mut Context) {
    let call_args = ctx.call_args.clone();
    for (key, sig) in ctx.functions.iter_mut() {
        let calls = call_args.get(key);
        let usage = sig.usage.clone();
        for (i, param) in sig.params.iter_mut().enumerate() {
            let call = calls
                .and_then(|c| c.get(i))
                .cloned()
                .unwrap_or(Type::Unknown);
            param.ty = choose_param_type(param, &call, usage.get(&param.name));
        }
    }
}

/// 穴の残る引数型を型パラメータで埋める
fn assign_generics(ctx: &mut Context) -> usize {
    let mut introduced = 0;
    for sig in ctx.functions.values_mut() {
        let mut next = 0usize;
        let mut fresh = || {
            let name = GENERIC_NAMES
                .get(next)
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("T{next}"));
            next += 1;
            name
        };
        let offset = sig.offset();
        for param in sig.params.iter_mut().skip(offset) {
            if param.ty.contains_unknown() {
                param.declared = fill_holes(&param.ty, &mut fresh);
                param.ty = param.declared.clone();
                param.fixed = true;
                introduced += 1;
            }
        }
    }
    introduced
}

fn fill_holes(ty: &Type, fresh: &mut dyn FnMut() -> String) -> Type {
    match ty {
        Type::Unknown => Type::Generic(fresh()),
        Type::List(t) => Type::list(fill_holes(t, fresh)),
        Type::Set(t) => Type::set(fill_holes(t, fresh)),
        Type::Optional(t) => Type::Optional(Box::new(fill_holes(t, fresh))),
        Type::Dict(k, v) => {
            let k = fill_holes(k, fresh);
            Type::dict(k, fill_holes(v, fresh))
        }
        Type::Tuple(items) => Type::Tuple(items.iter().map(|t| fill_holes(t, fresh)).collect()),
        other => other.clone(),
    }
}

fn run_rounds(ctx: &mut Context, module: &mut HirModule) -> Result<usize> {
    for round in 1..=MAX_ROUNDS {
        let snapshot = ctx.clone();
        ctx.call_args.clear();
        {
            let mut top = FnInfer::new(ctx, None, Vec::new());
            top.is_module = true;
            top.block(&mut module.items)?;
        }
        resolve_params(ctx);
        trace!(round, functions = ctx.functions.len(), "type inference round");
        if *ctx == snapshot {
            return Ok(round);
        }
    }
    debug!("type inference stopped at the round limit");
    Ok(MAX_ROUNDS)
}

fn seed_context(module: &HirModule) -> Context {
    let mut ctx = Context::default();
    for class in module.classes() {
        let mut info = ClassInfo {
            base: class.base.clone(),
            properties: class.properties.clone(),
            is_dataclass: class.is_dataclass,
            ..ClassInfo::default()
        };
        for field in &class.fields {
            info.fields.insert(field.name.clone(), field.ty.clone());
            info.field_order.push(field.name.clone());
            if !field.ty.is_unknown() {
                info.declared.insert(field.name.clone());
            }
        }
        ctx.classes.insert(class.name.clone(), info);
    }
    ctx
}

/// Fill every type slot of the module
pub fn infer_module(module: &mut HirModule) -> Result<()> {
    let mut ctx = seed_context(module);
    let rounds = run_rounds(&mut ctx, module)?;
    let generics = assign_generics(&mut ctx);
    let extra = if generics > 0 {
        run_rounds(&mut ctx, module)?
    } else {
        0
    };
    debug!(
        rounds,
        extra,
        generics,
        functions = ctx.functions.len(),
        "type inference converged"
    );
    write_back(&ctx, module);
    check_hashable(&module.items)
}

/// 辞書キー・集合要素に list/dict/set を使っていたら拒否する
fn check_hashable(stmts: &[HirStmt]) -> Result<()> {
    let mut found: Option<(SourcePos, Type)> = None;
    visit::walk_stmt_exprs(stmts, &mut |e| {
        if found.is_none() {
            found = unhashable_member(&e.ty).map(|t| (e.pos, t));
        }
    });
    if let Some((pos, ty)) = found {
        return Err(unhashable_error(pos, &ty));
    }

    let mut functions: Vec<&HirFunction> = Vec::new();
    let mut fields: Vec<(SourcePos, &Type)> = Vec::new();
    visit::walk_stmts(stmts, &mut |s| match &s.kind {
        HirStmtKind::FuncDef(f) => functions.push(f),
        HirStmtKind::ClassDef(c) => {
            functions.extend(c.methods.iter());
            fields.extend(c.fields.iter().map(|field| (c.pos, &field.ty)));
        }
        _ => {}
    });
    for (pos, ty) in fields {
        if let Some(bad) = unhashable_member(ty) {
            return Err(unhashable_error(pos, &bad));
        }
    }
    for f in functions {
        let declared = f
            .params
            .iter()
            .map(|p| (p.pos, &p.ty))
            .chain(f.locals.values().map(|t| (f.pos, t)))
            .chain(std::iter::once((f.pos, &f.ret)));
        for (pos, ty) in declared {
            if let Some(bad) = unhashable_member(ty) {
                return Err(unhashable_error(pos, &bad));
            }
        }
        check_hashable(&f.body)?;
    }
    Ok(())
}

fn unhashable_error(pos: SourcePos, ty: &Type) -> DepylerError {
    DepylerError::unmappable(pos, format!("unhashable type {ty} as a dict key or set element"))
}

/// `t` の中でキー・要素位置にある確実にハッシュできない型
fn unhashable_member(t: &Type) -> Option<Type> {
    let definitely = |k: &Type| (!is_hashable(k) && !k.contains_unknown()).then(|| k.clone());
    match t {
        Type::Dict(k, v) => definitely(k)
            .or_else(|| unhashable_member(k))
            .or_else(|| unhashable_member(v)),
        Type::Set(e) => definitely(e).or_else(|| unhashable_member(e)),
        Type::List(e) | Type::Optional(e) => unhashable_member(e),
        Type::Tuple(items) | Type::Union(items) => items.iter().find_map(unhashable_member),
        Type::Callable { params, ret } => params
            .iter()
            .find_map(unhashable_member)
            .or_else(|| unhashable_member(ret)),
        _ => None,
    }
}

fn write_back(ctx: &Context, module: &mut HirModule) {
    module.globals = ctx.globals.clone();
    for stmt in module.items.iter_mut() {
        match &mut stmt.kind {
            HirStmtKind::FuncDef(f) => write_function(ctx, f, None),
            HirStmtKind::ClassDef(c) => {
                let name = c.name.clone();
                if let Some(info) = ctx.classes.get(&name) {
                    for field in c.fields.iter_mut() {
                        if let Some(t) = info.fields.get(&field.name) {
                            field.ty = t.clone();
                        }
                    }
                    // メソッド本体で初めて現れたフィールド
                    for field in &info.field_order {
                        if c.field(field).is_none() && !c.properties.contains(field) {
                            c.fields.push(HirField {
                                name: field.clone(),
                                ty: info.fields.get(field).cloned().unwrap_or(Type::Unknown),
                                default: None,
                            });
                        }
                    }
                }
                for m in c.methods.iter_mut() {
                    write_function(ctx, m, Some(&name));
                }
            }
            _ => {}
        }
    }
}

fn write_function(ctx: &Context, f: &mut HirFunction, class: Option<&str>) {
    let key = match class {
        Some(c) => format!("{c}.{}", f.name),
        None => f.name.clone(),
    };
    if let Some(sig) = ctx.functions.get(&key) {
        for (param, ps) in f.params.iter_mut().zip(sig.params.iter()) {
            param.ty = ps.ty.clone();
        }
    }
    f.generic_bounds = generic_bounds(f);
    visit_nested_functions(&mut f.body, &mut |nested| {
        if let Some(sig) = ctx.functions.get(&nested.name) {
            for (param, ps) in nested.params.iter_mut().zip(sig.params.iter()) {
                param.ty = ps.ty.clone();
            }
        }
        nested.generic_bounds = generic_bounds(nested);
    });
}

fn visit_nested_functions(stmts: &mut [HirStmt], f: &mut dyn FnMut(&mut HirFunction)) {
    for stmt in stmts.iter_mut() {
        match &mut stmt.kind {
            HirStmtKind::FuncDef(nested) => {
                f(&mut **nested);
                visit_nested_functions(&mut nested.body, f);
            }
            HirStmtKind::If { body, orelse, .. } => {
                visit_nested_functions(body, f);
                visit_nested_functions(orelse, f);
            }
            HirStmtKind::While { body, .. }
            | HirStmtKind::For { body, .. }
            | HirStmtKind::With { body, .. } => visit_nested_functions(body, f),
            HirStmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                visit_nested_functions(body, f);
                for h in handlers.iter_mut() {
                    visit_nested_functions(&mut h.body, f);
                }
                visit_nested_functions(orelse, f);
                visit_nested_functions(finalbody, f);
            }
            _ => {}
        }
    }
}

fn generic_names(ty: &Type, out: &mut BTreeSet<String>) {
    match ty {
        Type::Generic(name) => {
            out.insert(name.clone());
        }
        Type::List(t) | Type::Set(t) | Type::Optional(t) => generic_names(t, out),
        Type::Dict(k, v) => {
            generic_names(k, out);
            generic_names(v, out);
        }
        Type::Tuple(items) | Type::Union(items) => items.iter().for_each(|t| generic_names(t, out)),
        Type::Callable { params, ret } => {
            params.iter().for_each(|t| generic_names(t, out));
            generic_names(ret, out);
        }
        _ => {}
    }
}

/// `T` をキーや集合要素に使う型の中の generic
fn hashed_generics(ty: &Type, out: &mut BTreeSet<String>) {
    match ty {
        Type::Dict(k, v) => {
            generic_names(k, out);
            hashed_generics(v, out);
        }
        Type::Set(t) => generic_names(t, out),
        Type::List(t) | Type::Optional(t) => hashed_generics(t, out),
        Type::Tuple(items) | Type::Union(items) => items.iter().for_each(|t| hashed_generics(t, out)),
        _ => {}
    }
}

/// 型パラメータごとの trait 境界 (使われ方から集める)
fn generic_bounds(f: &HirFunction) -> BTreeMap<String, BTreeSet<String>> {
    let mut generics = BTreeSet::new();
    for p in &f.params {
        generic_names(&p.ty, &mut generics);
    }
    let mut bounds: BTreeMap<String, BTreeSet<String>> = generics
        .iter()
        .map(|g| (g.clone(), BTreeSet::from(["Clone".to_string()])))
        .collect();
    if bounds.is_empty() {
        return bounds;
    }
    let mut add = |ty: &Type, bound: &str| {
        let mut names = BTreeSet::new();
        generic_names(ty, &mut names);
        for name in names {
            if let Some(set) = bounds.get_mut(&name) {
                set.insert(bound.to_string());
            }
        }
    };
    let mut hashed = BTreeSet::new();
    for t in f
        .params
        .iter()
        .map(|p| &p.ty)
        .chain(f.locals.values())
        .chain(std::iter::once(&f.ret))
    {
        hashed_generics(t, &mut hashed);
    }
    for name in &hashed {
        add(&Type::Generic(name.clone()), "std::hash::Hash");
        add(&Type::Generic(name.clone()), "Eq");
    }
    visit::walk_stmt_exprs(&f.body, &mut |e| match &e.kind {
        HirExprKind::Compare { op, left, right } => {
            let bound = if op.is_ordering() {
                "PartialOrd"
            } else if matches!(op, HirCmpOp::Is | HirCmpOp::IsNot) {
                return;
            } else {
                "PartialEq"
            };
            if let Type::Generic(_) = left.ty {
                add(&left.ty, bound);
            }
            if let Type::Generic(_) = right.ty {
                add(&right.ty, bound);
            }
        }
        HirExprKind::Call { func, args, .. } => match func.as_str() {
            "sorted" | "min" | "max" => {
                for a in args {
                    add(&a.ty, "PartialOrd");
                }
            }
            "print" | "str" => {
                for a in args {
                    match &a.ty {
                        Type::Generic(_) => add(&a.ty, "std::fmt::Display"),
                        other => add(other, "std::fmt::Debug"),
                    }
                }
            }
            "repr" => {
                for a in args {
                    add(&a.ty, "std::fmt::Debug");
                }
            }
            _ => {}
        },
        HirExprKind::MethodCall {
            receiver, method, ..
        } if method == "sort" => add(&receiver.ty, "PartialOrd"),
        HirExprKind::FString(parts) => {
            for part in parts {
                if let FStringFragment::Expr {
                    value, conversion, ..
                } = part
                {
                    match (&value.ty, conversion) {
                        (Type::Generic(_), None | Some(Conversion::Str)) => {
                            add(&value.ty, "std::fmt::Display")
                        }
                        (other, _) => add(other, "std::fmt::Debug"),
                    }
                }
            }
        }
        HirExprKind::BinOp { op, left, .. } if op.is_arithmetic() => {
            if let Type::Generic(name) = &left.ty {
                let op_trait = match op {
                    HirBinOp::Add => "Add",
                    HirBinOp::Sub => "Sub",
                    HirBinOp::Mul => "Mul",
                    HirBinOp::Div => "Div",
                    _ => "Rem",
                };
                add(&left.ty, &format!("std::ops::{op_trait}<Output = {name}>"));
                add(&left.ty, "Copy");
            }
        }
        _ => {}
    });
    bounds
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(n: &str, ty: Type) -> HirExpr {
        HirExpr::typed(HirExprKind::Name(n.to_string()), ty, SourcePos::new(1, 1))
    }

    #[test]
    fn test_is_not_none_narrowing() {
        let test = HirExpr::new(
            HirExprKind::Compare {
                op: HirCmpOp::IsNot,
                left: Box::new(name("x", Type::optional(Type::Int))),
                right: Box::new(HirExpr::new(HirExprKind::NoneLit, SourcePos::new(1, 10))),
            },
            SourcePos::new(1, 1),
        );
        let n = narrowed_in_body(&test).unwrap();
        assert_eq!(n.name, "x");
        assert_eq!(n.ty, Type::Int);
        assert_eq!(n.kind, NarrowKind::Some);
        assert!(narrowed_in_else(&test).is_none());
    }

    #[test]
    fn test_isinstance_narrowing_picks_member() {
        let union = Type::Union(vec![Type::Int, Type::Str]);
        let test = HirExpr::new(
            HirExprKind::Call {
                func: "isinstance".to_string(),
                args: vec![name("x", union.clone()), name("str", Type::Unknown)],
                kwargs: Vec::new(),
            },
            SourcePos::new(1, 1),
        );
        let n = narrowed_in_body(&test).unwrap();
        assert_eq!(n.ty, Type::Str);
        assert_eq!(n.kind, NarrowKind::Variant(vec![Type::Int, Type::Str]));
    }

    #[test]
    fn test_bool_op_types() {
        assert_eq!(bool_op_type(HirBoolOp::Or, &Type::Str, &Type::Str), Type::Str);
        assert_eq!(
            bool_op_type(HirBoolOp::Or, &Type::optional(Type::Int), &Type::Int),
            Type::Int
        );
        assert_eq!(bool_op_type(HirBoolOp::And, &Type::Int, &Type::Str), Type::Bool);
    }

    #[test]
    fn test_choose_param_precedence() {
        let param = ParamSig {
            name: "word".to_string(),
            declared: Type::Unknown,
            ty: Type::Unknown,
            fixed: false,
            default_ty: None,
        };
        let usage = Usage {
            partner: Some(Type::Int),
            ..Usage::default()
        };
        // 呼び出し側が最優先
        assert_eq!(choose_param_type(&param, &Type::Float, Some(&usage)), Type::Float);
        assert_eq!(choose_param_type(&param, &Type::Unknown, Some(&usage)), Type::Int);
        // 名前は最後の手段
        assert_eq!(choose_param_type(&param, &Type::Unknown, None), Type::Str);
    }

    #[test]
    fn test_fill_holes_with_generics() {
        let mut names = vec!["T".to_string(), "U".to_string()].into_iter();
        let mut fresh = || names.next().unwrap_or_default();
        let filled = fill_holes(&Type::dict(Type::Unknown, Type::Unknown), &mut fresh);
        assert_eq!(
            filled,
            Type::dict(Type::Generic("T".to_string()), Type::Generic("U".to_string()))
        );
    }
}
