//! Emit planning
//!
//! コード生成の前に関数ごとの属性を確定する。
//! - `can_fail`: 捕捉されない例外が漏れる関数は `Result` を返す (呼び出しグラフ上の固定点)
//! - `pure` / `terminating` / `panic_free`: 生成コードの doc 行に出す性質

use crate::hir::visit;
use crate::hir::*;
use crate::semantic::Type;
use crate::stdlib::{self, exceptions::caught_by, exceptions::CatchSet, ErrorTaxon};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

const MAX_ROUNDS: usize = 16;

/// Exception class named by a `raise` operand
///
/// `raise ValueError("x")` / `raise ValueError` → `ValueError`
pub fn raised_name(exc: &HirExpr) -> Option<&str> {
    match &exc.kind {
        HirExprKind::Call { func, .. } => Some(func),
        HirExprKind::Name(n) => Some(n),
        _ => None,
    }
}

/// ユーザ定義例外クラスの継承関係
#[derive(Debug, Clone, Default)]
pub struct ExceptionHierarchy {
    bases: BTreeMap<String, Option<String>>,
}

impl ExceptionHierarchy {
    pub fn from_module(module: &HirModule) -> Self {
        let bases = module
            .classes()
            .filter(|c| c.is_exception)
            .map(|c| (c.name.clone(), c.base.clone()))
            .collect();
        Self { bases }
    }

    pub fn is_user_exception(&self, name: &str) -> bool {
        self.bases.contains_key(name)
    }

    pub fn user_exceptions(&self) -> impl Iterator<Item = &str> {
        self.bases.keys().map(String::as_str)
    }

    /// Generated error type for `raise <name>`
    ///
    /// 組み込みの抽象クラスは具象タクソンに寄せ、未知の名前は RuntimeError。
    pub fn error_type(&self, name: &str) -> String {
        if self.is_user_exception(name) {
            return name.to_string();
        }
        ErrorTaxon::for_raise(name)
            .unwrap_or(ErrorTaxon::RuntimeError)
            .name()
            .to_string()
    }

    /// Does `except <handler>` catch an error of generated type `ty`
    pub fn catches(&self, handler: &str, ty: &str) -> bool {
        if handler == ty {
            return true;
        }
        match caught_by(handler) {
            CatchSet::All => true,
            CatchSet::User(h) => {
                let mut current = self.bases.get(ty).cloned().flatten();
                while let Some(base) = current {
                    if base == h {
                        return true;
                    }
                    current = self.bases.get(&base).cloned().flatten();
                }
                false
            }
            CatchSet::Taxa(taxa) => {
                if !self.is_user_exception(ty) {
                    return ErrorTaxon::from_python(ty).map_or(false, |t| taxa.contains(&t));
                }
                // ユーザ例外は基底で判定する (`class E(ValueError)`)
                let mut current = self.bases.get(ty).cloned().flatten();
                while let Some(base) = current {
                    if base == handler {
                        return true;
                    }
                    if !self.is_user_exception(&base) {
                        return ErrorTaxon::from_python(&base).map_or(false, |t| taxa.contains(&t));
                    }
                    current = self.bases.get(&base).cloned().flatten();
                }
                false
            }
        }
    }

    /// Generated error types an `except <handler>` matches; `None` for all
    pub fn caught_types(&self, handler: &str) -> Option<Vec<String>> {
        if caught_by(handler) == CatchSet::All {
            return None;
        }
        let candidates = ErrorTaxon::ALL
            .iter()
            .map(|t| t.name().to_string())
            .chain(self.bases.keys().cloned());
        Some(candidates.filter(|ty| self.catches(handler, ty)).collect())
    }

    fn handler_catches(&self, handler: &ExceptClause, ty: &str) -> bool {
        handler.types.is_empty() || handler.types.iter().any(|h| self.catches(h, ty))
    }
}

/// `Raises:` 節に書かれた例外名 (Google スタイルの docstring)
fn documented_raises(doc: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut in_section = false;
    for line in doc.lines() {
        let trimmed = line.trim();
        if trimmed == "Raises:" {
            in_section = true;
            continue;
        }
        if !in_section {
            continue;
        }
        if trimmed.is_empty() || (trimmed.ends_with(':') && !trimmed.contains(' ')) {
            break;
        }
        let name: String = trimmed
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if !name.is_empty() {
            out.push(name);
        }
    }
    out
}

/// 関数キー → 呼び出し解決に使う情報
struct CallGraph<'a> {
    hierarchy: &'a ExceptionHierarchy,
    bases: BTreeMap<String, Option<String>>,
    escapes: &'a BTreeMap<String, BTreeSet<String>>,
}

impl CallGraph<'_> {
    fn callee_key(&self, e: &HirExpr) -> Option<String> {
        match &e.kind {
            HirExprKind::Call { func, .. } => {
                if self.escapes.contains_key(func) {
                    return Some(func.clone());
                }
                // コンストラクタ
                let init = format!("{func}.__init__");
                self.escapes.contains_key(&init).then_some(init)
            }
            HirExprKind::MethodCall {
                receiver, method, ..
            } => {
                let mut current = match receiver.ty.unwrap_optional() {
                    Type::Class(c) => Some(c.clone()),
                    _ => None,
                };
                while let Some(class) = current {
                    let key = format!("{class}.{method}");
                    if self.escapes.contains_key(&key) {
                        return Some(key);
                    }
                    current = self.bases.get(&class).cloned().flatten();
                }
                None
            }
            _ => None,
        }
    }

    /// ブロックから漏れる例外型
    fn block(&self, stmts: &[HirStmt], reraise: &BTreeSet<String>, out: &mut BTreeSet<String>) {
        for stmt in stmts {
            self.stmt(stmt, reraise, out);
        }
    }

    fn exprs_of(&self, stmt: &HirStmt, out: &mut BTreeSet<String>) {
        for e in visit::stmt_exprs(stmt) {
            visit::walk_expr(e, &mut |e| {
                if let Some(key) = self.callee_key(e) {
                    if let Some(escaping) = self.escapes.get(&key) {
                        out.extend(escaping.iter().cloned());
                    }
                }
            });
        }
    }

    fn stmt(&self, stmt: &HirStmt, reraise: &BTreeSet<String>, out: &mut BTreeSet<String>) {
        self.exprs_of(stmt, out);
        match &stmt.kind {
            HirStmtKind::Raise { exc: None, .. } => out.extend(reraise.iter().cloned()),
            HirStmtKind::Raise { exc: Some(exc), .. } => match raised_name(exc) {
                // `raise e` (捕捉した例外の再送出)
                Some(name) if exc.as_name().is_some() && !self.is_exception_name(name) => {
                    out.extend(reraise.iter().cloned())
                }
                Some(name) => {
                    out.insert(self.hierarchy.error_type(name));
                }
                None => {
                    out.insert(ErrorTaxon::RuntimeError.name().to_string());
                }
            },
            HirStmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                let mut inner = BTreeSet::new();
                self.block(body, reraise, &mut inner);
                self.block(orelse, reraise, &mut inner);
                for ty in &inner {
                    if !handlers.iter().any(|h| self.hierarchy.handler_catches(h, ty)) {
                        out.insert(ty.clone());
                    }
                }
                for h in handlers {
                    let caught: BTreeSet<String> = inner
                        .iter()
                        .filter(|ty| self.hierarchy.handler_catches(h, ty))
                        .cloned()
                        .collect();
                    self.block(&h.body, &caught, out);
                }
                self.block(finalbody, reraise, out);
            }
            _ => {
                for block in visit::stmt_blocks(stmt) {
                    self.block(block, reraise, out);
                }
            }
        }
    }

    fn is_exception_name(&self, name: &str) -> bool {
        self.hierarchy.is_user_exception(name) || ErrorTaxon::is_builtin_exception(name)
    }
}

/// 全関数 (キー付き) への参照
fn functions(module: &HirModule) -> Vec<(String, &HirFunction)> {
    let mut out = Vec::new();
    for stmt in &module.items {
        match &stmt.kind {
            HirStmtKind::FuncDef(f) => {
                out.push((f.name.clone(), f.as_ref()));
                nested(&f.body, &mut out);
            }
            HirStmtKind::ClassDef(c) => {
                for m in &c.methods {
                    out.push((format!("{}.{}", c.name, m.name), m));
                    nested(&m.body, &mut out);
                }
            }
            _ => {}
        }
    }
    out
}

fn nested<'a>(body: &'a [HirStmt], out: &mut Vec<(String, &'a HirFunction)>) {
    visit::walk_stmts(body, &mut |s| {
        if let HirStmtKind::FuncDef(f) = &s.kind {
            out.push((f.name.clone(), f.as_ref()));
        }
    });
}

/// 例外を Result で返せない関数 (panic に落とす)
fn must_not_fail(f: &HirFunction) -> bool {
    f.attrs.generator || matches!(f.name.as_str(), "__str__" | "__repr__" | "__eq__" | "__hash__")
}

fn infer_fallibility(
    module: &HirModule,
    hierarchy: &ExceptionHierarchy,
) -> (BTreeMap<String, BTreeSet<String>>, BTreeSet<String>) {
    let funcs = functions(module);
    let bases: BTreeMap<String, Option<String>> = module
        .classes()
        .map(|c| (c.name.clone(), c.base.clone()))
        .collect();
    let mut escapes: BTreeMap<String, BTreeSet<String>> =
        funcs.iter().map(|(k, _)| (k.clone(), BTreeSet::new())).collect();
    for round in 1..=MAX_ROUNDS {
        let graph = CallGraph {
            hierarchy,
            bases: bases.clone(),
            escapes: &escapes,
        };
        let mut next = BTreeMap::new();
        for (key, f) in &funcs {
            let mut out = BTreeSet::new();
            if !must_not_fail(f) {
                graph.block(&f.body, &BTreeSet::new(), &mut out);
                if let Some(doc) = &f.docstring {
                    out.extend(documented_raises(doc).iter().map(|n| hierarchy.error_type(n)));
                }
            }
            next.insert(key.clone(), out);
        }
        let changed = next != escapes;
        escapes = next;
        trace!(round, changed, "fallibility round");
        if !changed {
            break;
        }
    }
    let graph = CallGraph {
        hierarchy,
        bases,
        escapes: &escapes,
    };
    let mut entry = BTreeSet::new();
    let top: Vec<HirStmt> = module
        .items
        .iter()
        .filter(|s| !matches!(s.kind, HirStmtKind::FuncDef(_) | HirStmtKind::ClassDef(_)))
        .cloned()
        .collect();
    graph.block(&top, &BTreeSet::new(), &mut entry);
    (escapes, entry)
}

/// 関数属性の推論に使うモジュール全体の情報
struct AttrContext {
    globals: BTreeSet<String>,
}

/// panic し得る組み込み呼び出し
fn builtin_may_panic(func: &str, args: &[HirExpr]) -> bool {
    match func {
        "int" | "float" => args.first().map_or(false, |a| matches!(a.ty, Type::Str)),
        "next" => args.len() < 2,
        "min" | "max" => args.len() == 1,
        "chr" | "input" | "open" => true,
        _ => false,
    }
}

fn template_may_panic(template: &str) -> bool {
    template.contains(".expect(") || template.contains(".unwrap()")
}

/// 本体が直接持つ性質 (呼び出し先は別に合成する)
#[derive(Debug, Clone, Copy, Default)]
struct LocalFacts {
    impure: bool,
    loops: bool,
    panics: bool,
}

fn local_facts(f: &HirFunction, ctx: &AttrContext) -> LocalFacts {
    let mut facts = LocalFacts {
        impure: f.attrs.generator
            || f.attrs.is_async
            || f.attrs.self_mut
            || f.params.iter().any(|p| p.mode == ParamMode::BorrowMut),
        ..LocalFacts::default()
    };
    visit::walk_stmts(&f.body, &mut |stmt| match &stmt.kind {
        HirStmtKind::While { .. } => facts.loops = true,
        HirStmtKind::Raise { .. } | HirStmtKind::Assert { .. } => facts.panics = true,
        HirStmtKind::With { .. } => facts.impure = true,
        HirStmtKind::Assign { target, .. } | HirStmtKind::AugAssign { target, .. } => {
            if let Some(root) = target.mutated_root() {
                if ctx.globals.contains(root) && !f.locals.contains_key(root) {
                    facts.impure = true;
                }
            }
        }
        _ => {}
    });
    visit::walk_stmt_exprs(&f.body, &mut |e| match &e.kind {
        HirExprKind::Call { func, args, .. } => {
            if let Some(spec) = stdlib::get_builtin_spec(func) {
                if spec.kind == stdlib::builtin_table::BuiltinKind::Io {
                    facts.impure = true;
                }
                if builtin_may_panic(func, args) {
                    facts.panics = true;
                }
            } else if let Some(spec) = stdlib::lookup_function(func, args.len()) {
                if !func.starts_with("math.") {
                    facts.impure = true;
                }
                if template_may_panic(spec.template) {
                    facts.panics = true;
                }
            }
            if matches!(func.as_str(), "itertools.count" | "itertools.cycle" | "itertools.repeat") {
                facts.loops = true;
            }
        }
        HirExprKind::MethodCall {
            receiver,
            method,
            args,
            ..
        } => {
            if let Some(spec) = stdlib::lookup_method(receiver.ty.unwrap_optional(), method, args.len()) {
                if spec.mutating {
                    let root = root_name(receiver);
                    if root.map_or(true, |r| !f.locals.contains_key(r)) {
                        facts.impure = true;
                    }
                }
                if template_may_panic(spec.template) {
                    facts.panics = true;
                }
            }
        }
        HirExprKind::Subscript { value, .. } => {
            if matches!(
                value.ty.unwrap_optional(),
                Type::List(_) | Type::Dict(_, _) | Type::Str | Type::Tuple(_) | Type::Unknown
            ) {
                facts.panics = true;
            }
        }
        HirExprKind::BinOp { op, right, .. } => {
            let literal_nonzero = match &right.kind {
                HirExprKind::Int { value, .. } => *value != 0,
                HirExprKind::Float { value, .. } => *value != 0.0,
                _ => false,
            };
            if matches!(op, HirBinOp::Div | HirBinOp::FloorDiv | HirBinOp::Mod) && !literal_nonzero
            {
                facts.panics = true;
            }
        }
        HirExprKind::Name(n) => {
            // 可変なグローバルの読み出しも副作用扱い
            if ctx.globals.contains(n) && !f.locals.contains_key(n) && f.param(n).is_none() {
                facts.impure = true;
            }
        }
        _ => {}
    });
    facts
}

fn callees(f: &HirFunction, keys: &BTreeSet<String>) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    visit::walk_stmt_exprs(&f.body, &mut |e| match &e.kind {
        HirExprKind::Call { func, .. } => {
            if keys.contains(func) {
                out.insert(func.clone());
            }
            let init = format!("{func}.__init__");
            if keys.contains(&init) {
                out.insert(init);
            }
        }
        HirExprKind::MethodCall {
            receiver, method, ..
        } => {
            if let Type::Class(c) = receiver.ty.unwrap_optional() {
                let key = format!("{c}.{method}");
                if keys.contains(&key) {
                    out.insert(key);
                }
            }
        }
        _ => {}
    });
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Attrs {
    pure: bool,
    terminating: bool,
    panic_free: bool,
}

fn infer_attrs(module: &HirModule) -> BTreeMap<String, Attrs> {
    let ctx = AttrContext {
        globals: module.mutable_globals.clone(),
    };
    let funcs = functions(module);
    let keys: BTreeSet<String> = funcs.iter().map(|(k, _)| k.clone()).collect();
    let facts: BTreeMap<String, (LocalFacts, BTreeSet<String>)> = funcs
        .iter()
        .map(|(k, f)| (k.clone(), (local_facts(f, &ctx), callees(f, &keys))))
        .collect();

    // pure / panic_free は真から始めて下げる、terminating は偽から始めて上げる
    let mut attrs: BTreeMap<String, Attrs> = facts
        .iter()
        .map(|(k, (local, _))| {
            (
                k.clone(),
                Attrs {
                    pure: !local.impure,
                    terminating: false,
                    panic_free: !local.panics,
                },
            )
        })
        .collect();
    for round in 1..=MAX_ROUNDS {
        let mut changed = false;
        for (key, (local, calls)) in &facts {
            let Some(current) = attrs.get(key).copied() else {
                continue;
            };
            let next = {
                let get = |c: &String| attrs.get(c).copied();
                Attrs {
                    // 自己再帰は純粋性と panic を変えない
                    pure: current.pure
                        && calls.iter().all(|c| c == key || get(c).map_or(false, |a| a.pure)),
                    terminating: !local.loops
                        && calls
                            .iter()
                            .all(|c| c != key && get(c).map_or(false, |a| a.terminating)),
                    panic_free: current.panic_free
                        && calls
                            .iter()
                            .all(|c| c == key || get(c).map_or(false, |a| a.panic_free)),
                }
            };
            if next != current {
                attrs.insert(key.clone(), next);
                changed = true;
            }
        }
        trace!(round, changed, "function attribute round");
        if !changed {
            break;
        }
    }
    attrs
}

fn apply(module: &mut HirModule, f: &mut dyn FnMut(&str, &mut HirFunction)) {
    fn nested_mut(body: &mut [HirStmt], f: &mut dyn FnMut(&str, &mut HirFunction)) {
        for stmt in body.iter_mut() {
            match &mut stmt.kind {
                HirStmtKind::FuncDef(inner) => {
                    let key = inner.name.clone();
                    f(&key, &mut **inner);
                    nested_mut(&mut inner.body, f);
                }
                HirStmtKind::If { body, orelse, .. } => {
                    nested_mut(body, f);
                    nested_mut(orelse, f);
                }
                HirStmtKind::While { body, .. }
                | HirStmtKind::For { body, .. }
                | HirStmtKind::With { body, .. } => nested_mut(body, f),
                HirStmtKind::Try {
                    body,
                    handlers,
                    orelse,
                    finalbody,
                } => {
                    nested_mut(body, f);
                    for h in handlers.iter_mut() {
                        nested_mut(&mut h.body, f);
                    }
                    nested_mut(orelse, f);
                    nested_mut(finalbody, f);
                }
                _ => {}
            }
        }
    }
    for stmt in module.items.iter_mut() {
        match &mut stmt.kind {
            HirStmtKind::FuncDef(func) => {
                let key = func.name.clone();
                f(&key, &mut **func);
                nested_mut(&mut func.body, f);
            }
            HirStmtKind::ClassDef(class) => {
                let class_name = class.name.clone();
                for m in class.methods.iter_mut() {
                    let key = format!("{class_name}.{}", m.name);
                    f(&key, m);
                    nested_mut(&mut m.body, f);
                }
            }
            _ => {}
        }
    }
}

/// Fill `can_fail`, `pure`, `terminating` and `panic_free` on every function
pub fn annotate_module(module: &mut HirModule) {
    let hierarchy = ExceptionHierarchy::from_module(module);
    let (escapes, entry) = infer_fallibility(module, &hierarchy);
    let attrs = infer_attrs(module);
    apply(module, &mut |key, f| {
        f.attrs.can_fail = escapes.get(key).map_or(false, |e| !e.is_empty());
        if let Some(a) = attrs.get(key) {
            f.attrs.pure = a.pure;
            f.attrs.terminating = a.terminating;
            f.attrs.panic_free = a.panic_free && !f.attrs.can_fail;
        }
    });
    module.entry_can_fail = !entry.is_empty();
    debug!(
        functions = escapes.len(),
        fallible = escapes.values().filter(|e| !e.is_empty()).count(),
        entry_can_fail = module.entry_can_fail,
        "emit plan ready"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy(pairs: &[(&str, &str)]) -> ExceptionHierarchy {
        ExceptionHierarchy {
            bases: pairs
                .iter()
                .map(|(c, b)| (c.to_string(), Some(b.to_string())))
                .collect(),
        }
    }

    #[test]
    fn test_builtin_hierarchy() {
        let h = ExceptionHierarchy::default();
        assert!(h.catches("LookupError", "KeyError"));
        assert!(h.catches("Exception", "IndexError"));
        assert!(!h.catches("ValueError", "KeyError"));
    }

    #[test]
    fn test_user_exception_caught_by_base() {
        let h = hierarchy(&[("ParseError", "ValueError"), ("AppError", "Exception")]);
        assert!(h.catches("ValueError", "ParseError"));
        assert!(h.catches("ParseError", "ParseError"));
        assert!(!h.catches("KeyError", "ParseError"));
        assert!(h.catches("Exception", "AppError"));
        assert_eq!(h.error_type("ParseError"), "ParseError");
        assert_eq!(h.error_type("Exception"), "RuntimeError");
    }

    #[test]
    fn test_caught_types_includes_subclasses() {
        let h = hierarchy(&[("ParseError", "ValueError")]);
        let types = h.caught_types("ValueError").unwrap();
        assert!(types.contains(&"ValueError".to_string()));
        assert!(types.contains(&"ParseError".to_string()));
        assert!(h.caught_types("Exception").is_none());
    }

    #[test]
    fn test_documented_raises() {
        let doc = "Parse a number.\n\nRaises:\n    ValueError: when empty\n    KeyError\n\nReturns:\n    int";
        assert_eq!(documented_raises(doc), vec!["ValueError", "KeyError"]);
    }

    #[test]
    fn test_raised_name() {
        let at = SourcePos::new(1, 1);
        let call = HirExpr::new(
            HirExprKind::Call {
                func: "ValueError".to_string(),
                args: Vec::new(),
                kwargs: Vec::new(),
            },
            at,
        );
        assert_eq!(raised_name(&call), Some("ValueError"));
        assert_eq!(raised_name(&HirExpr::name("KeyError", at)), Some("KeyError"));
    }
}
