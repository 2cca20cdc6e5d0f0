//! Ownership and mutability inference
//!
//! Pass A: 関数本体を走査して再代入・内部変更される変数を集める。
//! Pass B: 引数ごとに by-value / `&` / `&mut` を決める。
//! どちらも呼び出しグラフ上の固定点で収束させる (`&mut` 引数に渡した変数も変更扱い)。

use crate::hir::visit;
use crate::hir::*;
use crate::semantic::Type;
use crate::stdlib::{lookup_method, mutating_families};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

const MAX_ROUNDS: usize = 16;

/// 引数の受け渡しと self の可変性 (呼び出し側から参照する要約)
#[derive(Debug, Clone, Default, PartialEq)]
struct FnSummary {
    /// receiver を除く引数
    modes: Vec<ParamMode>,
    self_mut: bool,
}

/// Result of Pass A over one body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mutations {
    /// 2 回目以降の代入、累算代入の対象
    pub reassigned: BTreeSet<String>,
    /// 変更メソッドのレシーバ、添字・属性代入の根、`&mut` 引数に渡した変数
    pub mutated: BTreeSet<String>,
}

impl Mutations {
    pub fn all(&self) -> BTreeSet<String> {
        self.reassigned.union(&self.mutated).cloned().collect()
    }
}

/// 要約と継承関係 (固定点の 1 ラウンド分は不変)
#[derive(Debug, Default)]
struct Summaries {
    functions: BTreeMap<String, FnSummary>,
    bases: BTreeMap<String, Option<String>>,
}

impl Summaries {
    fn method(&self, class: &str, method: &str) -> Option<&FnSummary> {
        let mut current = Some(class.to_string());
        while let Some(name) = current {
            if let Some(s) = self.functions.get(&format!("{name}.{method}")) {
                return Some(s);
            }
            current = self.bases.get(&name).cloned().flatten();
        }
        None
    }
}

struct MutationScan<'a> {
    summaries: &'a Summaries,
    seen: BTreeSet<String>,
    out: Mutations,
}

impl MutationScan<'_> {
    fn block(&mut self, stmts: &[HirStmt]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn bind(&mut self, name: &str) {
        if !self.seen.insert(name.to_string()) {
            self.out.reassigned.insert(name.to_string());
        }
    }

    fn target(&mut self, target: &AssignTarget) {
        match target {
            AssignTarget::Name(name) => self.bind(name),
            AssignTarget::Tuple(items) => items.iter().for_each(|t| self.target(t)),
            AssignTarget::Attribute { .. } | AssignTarget::Subscript { .. } => {
                if let Some(root) = target.mutated_root() {
                    self.out.mutated.insert(root.to_string());
                }
            }
        }
    }

    fn stmt(&mut self, stmt: &HirStmt) {
        for e in visit::stmt_exprs(stmt) {
            visit::walk_expr(e, &mut |e| self.expr(e));
        }
        match &stmt.kind {
            HirStmtKind::Assign { target, .. } => self.target(target),
            HirStmtKind::AugAssign { target, .. } => match target {
                AssignTarget::Name(name) => {
                    self.seen.insert(name.clone());
                    self.out.reassigned.insert(name.clone());
                }
                other => self.target(other),
            },
            HirStmtKind::For { target, .. } => {
                for name in target.names() {
                    self.seen.insert(name.to_string());
                }
            }
            HirStmtKind::With {
                binding: Some(name),
                ..
            } => self.bind(name),
            HirStmtKind::Try { handlers, .. } => {
                for h in handlers {
                    if let Some(name) = &h.name {
                        self.seen.insert(name.clone());
                    }
                }
            }
            _ => {}
        }
        for block in visit::stmt_blocks(stmt) {
            self.block(block);
        }
    }

    fn expr(&mut self, e: &HirExpr) {
        let summaries = self.summaries;
        match &e.kind {
            HirExprKind::MethodCall {
                receiver,
                method,
                args,
                ..
            } => {
                let Some(root) = root_name(receiver) else {
                    return;
                };
                let recv_ty = receiver.ty.unwrap_optional();
                let (mutating, callee) = match recv_ty {
                    Type::Class(class) => match summaries.method(class, method) {
                        Some(s) => (s.self_mut, Some(s)),
                        None => (false, None),
                    },
                    Type::Unknown => (!mutating_families(method).is_empty(), None),
                    other => (
                        lookup_method(other, method, args.len()).map_or(false, |s| s.mutating),
                        None,
                    ),
                };
                if mutating {
                    self.out.mutated.insert(root.to_string());
                }
                if let Some(callee) = callee {
                    self.borrowed_mut_args(&callee.modes, args);
                }
            }
            HirExprKind::Call { func, args, .. } => {
                if let Some(s) = summaries.functions.get(func) {
                    self.borrowed_mut_args(&s.modes, args);
                }
            }
            HirExprKind::NamedExpr { target, .. } => self.bind(target),
            _ => {}
        }
    }

    fn borrowed_mut_args(&mut self, modes: &[ParamMode], args: &[HirExpr]) {
        for (mode, arg) in modes.iter().zip(args) {
            if *mode == ParamMode::BorrowMut {
                if let Some(root) = root_name(arg) {
                    self.out.mutated.insert(root.to_string());
                }
            }
        }
    }
}

/// Pass A over a function body
pub fn collect_mutations(body: &[HirStmt], params: &[HirParam]) -> Mutations {
    scan(body, params, &Summaries::default())
}

fn scan(body: &[HirStmt], params: &[HirParam], summaries: &Summaries) -> Mutations {
    let mut scanner = MutationScan {
        summaries,
        seen: params.iter().map(|p| p.name.clone()).collect(),
        out: Mutations::default(),
    };
    scanner.block(body);
    scanner.out
}

/// 関数本体から持ち出される引数 (return される、フィールドや容器に格納される)
fn consumed_names(body: &[HirStmt]) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    visit::walk_stmts(body, &mut |stmt| match &stmt.kind {
        HirStmtKind::Return(Some(value)) => {
            if let Some(n) = value.as_name() {
                out.insert(n.to_string());
            }
        }
        HirStmtKind::Assign {
            target: AssignTarget::Attribute { .. } | AssignTarget::Subscript { .. },
            value,
            ..
        } => {
            if let Some(n) = value.as_name() {
                out.insert(n.to_string());
            }
        }
        _ => {}
    });
    visit::walk_stmt_exprs(body, &mut |e| {
        if let HirExprKind::MethodCall { method, args, .. } = &e.kind {
            if matches!(method.as_str(), "append" | "insert" | "add" | "setdefault" | "push") {
                for a in args {
                    if let Some(n) = a.as_name() {
                        out.insert(n.to_string());
                    }
                }
            }
        }
    });
    out
}

/// Pass B: 1 引数の受け渡し方
fn param_mode(param: &HirParam, mutations: &Mutations, consumed: &BTreeSet<String>) -> ParamMode {
    let name = param.name.as_str();
    if mutations.reassigned.contains(name) || consumed.contains(name) {
        return ParamMode::ByValue;
    }
    if mutations.mutated.contains(name) {
        return match param.ty.unwrap_optional() {
            Type::List(_) | Type::Dict(_, _) | Type::Set(_) | Type::Class(_) | Type::Native(_) => {
                ParamMode::BorrowMut
            }
            _ => ParamMode::ByValue,
        };
    }
    if param.ty.has_borrow_form() {
        ParamMode::Borrow
    } else {
        ParamMode::ByValue
    }
}

fn summarize(f: &HirFunction, summaries: &Summaries) -> (FnSummary, Mutations) {
    let mutations = scan(&f.body, &f.params, summaries);
    let consumed = consumed_names(&f.body);
    let modes = f
        .value_params()
        .iter()
        .map(|p| param_mode(p, &mutations, &consumed))
        .collect();
    let receiver = matches!(f.method, Some(MethodKind::Instance));
    let summary = FnSummary {
        modes,
        self_mut: receiver && mutations.mutated.contains("self"),
    };
    (summary, mutations)
}

/// モジュール内の全関数 (キー付き)。入れ子の関数は素の名前で数える。
fn for_each_function(module: &HirModule, f: &mut dyn FnMut(String, &HirFunction)) {
    fn nested(prefix: Option<&str>, func: &HirFunction, f: &mut dyn FnMut(String, &HirFunction)) {
        let key = match prefix {
            Some(c) => format!("{c}.{}", func.name),
            None => func.name.clone(),
        };
        f(key, func);
        visit::walk_stmts(&func.body, &mut |s| {
            if let HirStmtKind::FuncDef(inner) = &s.kind {
                f(inner.name.clone(), &**inner);
            }
        });
    }
    for stmt in &module.items {
        match &stmt.kind {
            HirStmtKind::FuncDef(func) => nested(None, func, f),
            HirStmtKind::ClassDef(class) => {
                for m in &class.methods {
                    nested(Some(&class.name), m, f);
                }
            }
            _ => {}
        }
    }
}

fn for_each_function_mut(module: &mut HirModule, f: &mut dyn FnMut(String, &mut HirFunction)) {
    fn nested_mut(stmts: &mut [HirStmt], f: &mut dyn FnMut(String, &mut HirFunction)) {
        for stmt in stmts.iter_mut() {
            match &mut stmt.kind {
                HirStmtKind::FuncDef(inner) => {
                    f(inner.name.clone(), &mut **inner);
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
                f(func.name.clone(), &mut **func);
                nested_mut(&mut func.body, f);
            }
            HirStmtKind::ClassDef(class) => {
                let class_name = class.name.clone();
                for m in class.methods.iter_mut() {
                    f(format!("{class_name}.{}", m.name), m);
                    nested_mut(&mut m.body, f);
                }
            }
            _ => {}
        }
    }
}

/// Pass A + Pass B over the whole module, then lambda escape analysis
pub fn analyze_ownership(module: &mut HirModule) {
    let mut summaries = Summaries::default();
    for class in module.classes() {
        summaries.bases.insert(class.name.clone(), class.base.clone());
    }

    let mut rounds = 0;
    loop {
        rounds += 1;
        let mut next = BTreeMap::new();
        for_each_function(module, &mut |key, f| {
            let (summary, _) = summarize(f, &summaries);
            next.insert(key, summary);
        });
        let changed = next != summaries.functions;
        summaries.functions = next;
        trace!(round = rounds, changed, "ownership round");
        if !changed || rounds >= MAX_ROUNDS {
            break;
        }
    }

    let globals: BTreeSet<String> = module.globals.keys().cloned().collect();
    let mut mutable_globals = BTreeSet::new();
    for_each_function_mut(module, &mut |_, f| {
        let (summary, mutations) = summarize(f, &summaries);
        let value_offset = f.params.len() - f.value_params().len();
        for (param, mode) in f.params.iter_mut().skip(value_offset).zip(summary.modes.iter()) {
            param.mode = *mode;
            param.rebound = mutations.reassigned.contains(&param.name)
                || (*mode == ParamMode::ByValue && mutations.mutated.contains(&param.name));
        }
        f.attrs.self_mut = summary.self_mut;
        let params: BTreeSet<&str> = f.params.iter().map(|p| p.name.as_str()).collect();
        f.mutable_vars = mutations
            .all()
            .into_iter()
            .filter(|n| !params.contains(n.as_str()))
            .collect();
        // 関数内から変更されるモジュール変数
        for name in &mutations.mutated {
            if globals.contains(name) && !f.locals.contains_key(name) && !params.contains(name.as_str()) {
                mutable_globals.insert(name.clone());
            }
        }
        mark_escaping_lambdas(&mut f.body);
    });

    // トップレベル文 (main に入る) の変更
    let top = scan(&module.items, &[], &summaries);
    for name in top.all() {
        if globals.contains(&name) {
            mutable_globals.insert(name);
        }
    }
    mark_escaping_lambdas(&mut module.items);
    module.mutable_globals = mutable_globals;
    debug!(
        rounds,
        functions = summaries.functions.len(),
        mutable_globals = module.mutable_globals.len(),
        "ownership inference finished"
    );
}

/// 定義スコープの外へ出るラムダに `escapes` を立てる
fn mark_escaping_lambdas(body: &mut [HirStmt]) {
    let mut returned = BTreeSet::new();
    visit::walk_stmts(body, &mut |stmt| {
        if let HirStmtKind::Return(Some(value)) = &stmt.kind {
            if let Some(n) = value.as_name() {
                returned.insert(n.to_string());
            }
        }
    });
    mark_block(body, &returned);
}

fn mark_block(stmts: &mut [HirStmt], returned: &BTreeSet<String>) {
    for stmt in stmts.iter_mut() {
        match &mut stmt.kind {
            HirStmtKind::Return(Some(value)) => mark_stored(value),
            HirStmtKind::Assign { target, value, .. } => match target {
                AssignTarget::Name(n) if returned.contains(n.as_str()) => mark_stored(value),
                AssignTarget::Attribute { .. } | AssignTarget::Subscript { .. } => {
                    mark_stored(value)
                }
                _ => mark_in_calls(value),
            },
            HirStmtKind::Expr(e) => mark_in_calls(e),
            HirStmtKind::If { body, orelse, .. } => {
                mark_block(body, returned);
                mark_block(orelse, returned);
            }
            HirStmtKind::While { body, .. }
            | HirStmtKind::For { body, .. }
            | HirStmtKind::With { body, .. } => mark_block(body, returned),
            HirStmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                mark_block(body, returned);
                for h in handlers.iter_mut() {
                    mark_block(&mut h.body, returned);
                }
                mark_block(orelse, returned);
                mark_block(finalbody, returned);
            }
            _ => {}
        }
    }
}

/// 値そのもの (またはその容器要素) として格納されるラムダ
fn mark_stored(expr: &mut HirExpr) {
    match &mut expr.kind {
        HirExprKind::Lambda { escapes, .. } => *escapes = true,
        HirExprKind::List(items) | HirExprKind::Tuple(items) => items.iter_mut().for_each(mark_stored),
        HirExprKind::Dict(pairs) => pairs.iter_mut().for_each(|(_, v)| mark_stored(v)),
        HirExprKind::IfExpr { body, orelse, .. } => {
            mark_stored(body);
            mark_stored(orelse);
        }
        _ => {}
    }
}

/// `handlers.append(lambda: ...)`
fn mark_in_calls(expr: &mut HirExpr) {
    if let HirExprKind::MethodCall { method, args, .. } = &mut expr.kind {
        if matches!(method.as_str(), "append" | "insert" | "add" | "setdefault" | "extend") {
            args.iter_mut().for_each(mark_stored);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at() -> SourcePos {
        SourcePos::new(1, 1)
    }

    fn name(n: &str, ty: Type) -> HirExpr {
        HirExpr::typed(HirExprKind::Name(n.to_string()), ty, at())
    }

    fn param(n: &str, ty: Type) -> HirParam {
        HirParam {
            name: n.to_string(),
            ty,
            annotated: true,
            default: None,
            mode: ParamMode::ByValue,
            rebound: false,
            pos: at(),
        }
    }

    fn stmt(kind: HirStmtKind) -> HirStmt {
        HirStmt::new(kind, at())
    }

    fn int(v: i64) -> HirExpr {
        HirExpr::typed(
            HirExprKind::Int {
                value: v,
                text: v.to_string(),
            },
            Type::Int,
            at(),
        )
    }

    #[test]
    fn test_append_marks_receiver_mutated() {
        let xs = Type::list(Type::Int);
        let body = vec![stmt(HirStmtKind::Expr(HirExpr::new(
            HirExprKind::MethodCall {
                receiver: Box::new(name("xs", xs.clone())),
                method: "append".to_string(),
                args: vec![int(1)],
                kwargs: Vec::new(),
            },
            at(),
        )))];
        let params = vec![param("xs", xs)];
        let m = collect_mutations(&body, &params);
        assert!(m.mutated.contains("xs"));
        assert!(m.reassigned.is_empty());
        let mode = param_mode(&params[0], &m, &BTreeSet::new());
        assert_eq!(mode, ParamMode::BorrowMut);
    }

    #[test]
    fn test_second_assignment_is_reassignment() {
        let assign = |v| {
            stmt(HirStmtKind::Assign {
                target: AssignTarget::Name("total".to_string()),
                value: int(v),
                annotation: None,
            })
        };
        let m = collect_mutations(&[assign(0), assign(1)], &[]);
        assert!(m.reassigned.contains("total"));

        let m = collect_mutations(&[assign(0)], &[]);
        assert!(m.reassigned.is_empty());
    }

    #[test]
    fn test_read_only_string_is_borrowed() {
        let p = param("s", Type::Str);
        assert_eq!(
            param_mode(&p, &Mutations::default(), &BTreeSet::new()),
            ParamMode::Borrow
        );
        let p = param("n", Type::Int);
        assert_eq!(
            param_mode(&p, &Mutations::default(), &BTreeSet::new()),
            ParamMode::ByValue
        );
    }

    #[test]
    fn test_returned_param_is_by_value() {
        let p = param("xs", Type::list(Type::Int));
        let consumed = BTreeSet::from(["xs".to_string()]);
        assert_eq!(
            param_mode(&p, &Mutations::default(), &consumed),
            ParamMode::ByValue
        );
    }

    #[test]
    fn test_returned_lambda_escapes() {
        let lambda = HirExpr::new(
            HirExprKind::Lambda {
                params: vec!["y".to_string()],
                body: Box::new(name("y", Type::Int)),
                escapes: false,
            },
            at(),
        );
        let mut body = vec![stmt(HirStmtKind::Return(Some(lambda)))];
        mark_escaping_lambdas(&mut body);
        match &body[0].kind {
            HirStmtKind::Return(Some(HirExpr {
                kind: HirExprKind::Lambda { escapes, .. },
                ..
            })) => assert!(*escapes),
            other => panic!("unexpected {other:?}"),
        }
    }
}
