//! HIR traversal helpers
//!
//! 読み取り専用の走査。ネストした関数・クラスの本体には入らない。

use super::exprs::{FStringFragment, HirExpr, HirExprKind};
use super::nodes::{AssignTarget, HirStmt, HirStmtKind};

/// Direct sub-expressions of an expression
pub fn expr_children(expr: &HirExpr) -> Vec<&HirExpr> {
    let mut out: Vec<&HirExpr> = Vec::new();
    match &expr.kind {
        HirExprKind::Int { .. }
        | HirExprKind::Float { .. }
        | HirExprKind::Str { .. }
        | HirExprKind::Bytes(_)
        | HirExprKind::Bool(_)
        | HirExprKind::NoneLit
        | HirExprKind::Name(_)
        | HirExprKind::Path(_) => {}
        HirExprKind::Attribute { value, .. } => out.push(value),
        HirExprKind::Subscript { value, index } => {
            out.push(value);
            out.push(index);
        }
        HirExprKind::Slice {
            value,
            lower,
            upper,
            step,
        } => {
            out.push(value);
            for part in [lower, upper, step].into_iter().flatten() {
                out.push(part);
            }
        }
        HirExprKind::Call { args, kwargs, .. } => {
            out.extend(args.iter());
            out.extend(kwargs.iter().map(|(_, v)| v));
        }
        HirExprKind::MethodCall {
            receiver,
            args,
            kwargs,
            ..
        } => {
            out.push(receiver);
            out.extend(args.iter());
            out.extend(kwargs.iter().map(|(_, v)| v));
        }
        HirExprKind::DynCall { callee, args } => {
            out.push(callee);
            out.extend(args.iter());
        }
        HirExprKind::BinOp { left, right, .. }
        | HirExprKind::Compare { left, right, .. }
        | HirExprKind::BoolOp { left, right, .. } => {
            out.push(left);
            out.push(right);
        }
        HirExprKind::UnaryOp { operand, .. } => out.push(operand),
        HirExprKind::IfExpr { test, body, orelse } => {
            out.push(test);
            out.push(body);
            out.push(orelse);
        }
        HirExprKind::TempBind { value, body, .. } => {
            out.push(value);
            out.push(body);
        }
        HirExprKind::FString(parts) => {
            for part in parts {
                if let FStringFragment::Expr { value, .. } = part {
                    out.push(value);
                }
            }
        }
        HirExprKind::List(items) | HirExprKind::Tuple(items) | HirExprKind::Set(items) => {
            out.extend(items.iter())
        }
        HirExprKind::Dict(pairs) => {
            for (k, v) in pairs {
                out.push(k);
                out.push(v);
            }
        }
        HirExprKind::Comprehension(comp) => {
            for it in &comp.iters {
                out.push(&it.iter);
                out.extend(it.guards.iter());
            }
            out.push(&comp.element);
            if let Some(v) = &comp.value {
                out.push(v);
            }
        }
        HirExprKind::Lambda { body, .. } => out.push(body),
        HirExprKind::Await(inner) | HirExprKind::Starred(inner) => out.push(inner),
        HirExprKind::Yield(value) => {
            if let Some(v) = value {
                out.push(v);
            }
        }
        HirExprKind::NamedExpr { value, .. } => out.push(value),
    }
    out
}

/// Pre-order walk over an expression tree
pub fn walk_expr<'a>(expr: &'a HirExpr, f: &mut dyn FnMut(&'a HirExpr)) {
    f(expr);
    for child in expr_children(expr) {
        walk_expr(child, f);
    }
}

fn target_exprs(target: &AssignTarget) -> Vec<&HirExpr> {
    match target {
        AssignTarget::Name(_) => Vec::new(),
        AssignTarget::Attribute { value, .. } => vec![value],
        AssignTarget::Subscript { value, index } => vec![value, index],
        AssignTarget::Tuple(items) => items.iter().flat_map(target_exprs).collect(),
    }
}

/// Expressions owned directly by a statement (not by nested blocks)
pub fn stmt_exprs(stmt: &HirStmt) -> Vec<&HirExpr> {
    match &stmt.kind {
        HirStmtKind::Assign { target, value, .. } | HirStmtKind::AugAssign { target, value, .. } => {
            let mut out = target_exprs(target);
            out.push(value);
            out
        }
        HirStmtKind::If { test, .. } | HirStmtKind::While { test, .. } => vec![test],
        HirStmtKind::For { iter, .. } => vec![iter],
        HirStmtKind::Return(value) => value.iter().collect(),
        HirStmtKind::Raise { exc, cause } => exc.iter().chain(cause.iter()).collect(),
        HirStmtKind::With { context, .. } => vec![context],
        HirStmtKind::Expr(e) => vec![e],
        HirStmtKind::Assert { test, msg } => std::iter::once(test).chain(msg.iter()).collect(),
        HirStmtKind::Try { .. }
        | HirStmtKind::Break
        | HirStmtKind::Continue
        | HirStmtKind::Pass
        | HirStmtKind::FuncDef(_)
        | HirStmtKind::ClassDef(_)
        | HirStmtKind::Import(_) => Vec::new(),
    }
}

/// Nested statement blocks of a statement
pub fn stmt_blocks(stmt: &HirStmt) -> Vec<&[HirStmt]> {
    match &stmt.kind {
        HirStmtKind::If { body, orelse, .. } => vec![body.as_slice(), orelse.as_slice()],
        HirStmtKind::While { body, .. }
        | HirStmtKind::For { body, .. }
        | HirStmtKind::With { body, .. } => vec![body.as_slice()],
        HirStmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            let mut out: Vec<&[HirStmt]> = vec![body.as_slice()];
            out.extend(handlers.iter().map(|h| h.body.as_slice()));
            out.push(orelse.as_slice());
            out.push(finalbody.as_slice());
            out
        }
        _ => Vec::new(),
    }
}

/// Pre-order walk over statements, descending into blocks
pub fn walk_stmts<'a>(stmts: &'a [HirStmt], f: &mut dyn FnMut(&'a HirStmt)) {
    for stmt in stmts {
        f(stmt);
        for block in stmt_blocks(stmt) {
            walk_stmts(block, f);
        }
    }
}

/// Every expression reachable from `stmts`
pub fn walk_stmt_exprs<'a>(stmts: &'a [HirStmt], f: &mut dyn FnMut(&'a HirExpr)) {
    walk_stmts(stmts, &mut |stmt| {
        for e in stmt_exprs(stmt) {
            walk_expr(e, f);
        }
    });
}

pub fn contains_yield(stmts: &[HirStmt]) -> bool {
    let mut found = false;
    walk_stmt_exprs(stmts, &mut |e| {
        if matches!(e.kind, HirExprKind::Yield(_)) {
            found = true;
        }
    });
    found
}

/// ブロックが必ず return / raise で終わるか
pub fn always_returns(stmts: &[HirStmt]) -> bool {
    stmts.iter().any(stmt_always_returns)
}

fn stmt_always_returns(stmt: &HirStmt) -> bool {
    match &stmt.kind {
        HirStmtKind::Return(_) | HirStmtKind::Raise { .. } => true,
        HirStmtKind::If { body, orelse, .. } => always_returns(body) && always_returns(orelse),
        HirStmtKind::While { test, body } => {
            matches!(test.kind, HirExprKind::Bool(true)) && !contains_break(body)
        }
        HirStmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            always_returns(finalbody)
                || ((always_returns(body) || always_returns(orelse))
                    && handlers.iter().all(|h| always_returns(&h.body)))
        }
        HirStmtKind::With { body, .. } => always_returns(body),
        _ => false,
    }
}

/// `break` targeting the enclosing loop (not nested loops)
pub fn contains_break(stmts: &[HirStmt]) -> bool {
    stmts.iter().any(|stmt| match &stmt.kind {
        HirStmtKind::Break => true,
        HirStmtKind::While { .. } | HirStmtKind::For { .. } => false,
        _ => stmt_blocks(stmt).into_iter().any(contains_break),
    })
}
