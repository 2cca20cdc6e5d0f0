//! Statement lowering for SemanticAnalyzer
//!
//! Extracted from mod.rs for maintainability

use super::*;
use crate::parser::{ExceptHandler, WithItem};

impl SemanticAnalyzer {
    pub(crate) fn lower_block(&mut self, stmts: &[Stmt]) -> Result<Vec<HirStmt>> {
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            out.extend(self.lower_stmt(stmt)?);
        }
        Ok(out)
    }

    /// ブロックスコープ付きで lower する (変数は親に昇格する)
    fn lower_scoped_block(&mut self, stmts: &[Stmt]) -> Result<Vec<HirStmt>> {
        self.scope.push();
        let result = self.lower_block(stmts);
        self.scope.pop();
        result
    }

    /// One AST statement may expand to several HIR statements
    pub(crate) fn lower_stmt(&mut self, stmt: &Stmt) -> Result<Vec<HirStmt>> {
        let pos = stmt.pos;
        let one = |kind: HirStmtKind| Ok(vec![HirStmt::new(kind, pos)]);
        match &stmt.kind {
            StmtKind::Expr(expr) => self.lower_expr_stmt(expr, pos),
            StmtKind::Assign { targets, value } => self.lower_assign(targets, value, pos),
            StmtKind::AnnAssign {
                target,
                annotation,
                value,
            } => {
                let ty = self.type_from_annotation(annotation)?;
                match value {
                    Some(value) => {
                        let target = self.lower_target(target)?;
                        if let AssignTarget::Name(name) = &target {
                            self.scope.set_type(name, ty.clone());
                        }
                        let value = self.lower_expr(value)?;
                        one(HirStmtKind::Assign {
                            target,
                            value,
                            annotation: Some(ty),
                        })
                    }
                    // `x: int` だけでは束縛されない
                    None => {
                        if let Some(name) = target.as_ident() {
                            self.scope.set_type(name, ty);
                        }
                        Ok(Vec::new())
                    }
                }
            }
            StmtKind::AugAssign { target, op, value } => {
                let hir_op = match HirBinOp::from_ast(*op) {
                    Some(op) => op,
                    None => {
                        self.check(UnsupportedFeature::MatrixMultiply, pos)?;
                        return Err(DepylerError::unsupported(
                            pos,
                            UnsupportedFeature::MatrixMultiply.description(),
                        ));
                    }
                };
                let target = self.lower_target(target)?;
                if matches!(target, AssignTarget::Tuple(_)) {
                    return Err(DepylerError::unsupported(
                        pos,
                        "augmented assignment to a tuple",
                    ));
                }
                let value = self.lower_expr(value)?;
                one(HirStmtKind::AugAssign {
                    target,
                    op: hir_op,
                    value,
                })
            }
            StmtKind::If { test, body, orelse } => {
                let test = self.lower_expr(test)?;
                let body = self.lower_scoped_block(body)?;
                let orelse = self.lower_scoped_block(orelse)?;
                one(HirStmtKind::If { test, body, orelse })
            }
            StmtKind::While { test, body, orelse } => {
                let test = self.lower_expr(test)?;
                self.lower_loop(body, orelse, pos, |body| HirStmtKind::While { test, body })
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
                is_async,
            } => {
                if *is_async {
                    return Err(DepylerError::unsupported(pos, "async for"));
                }
                let iter = self.lower_expr(iter)?;
                let target = self.lower_pattern(target)?;
                self.lower_loop(body, orelse, pos, |body| HirStmtKind::For { target, iter, body })
            }
            StmtKind::Return(value) => {
                let value = value.as_ref().map(|v| self.lower_expr(v)).transpose()?;
                one(HirStmtKind::Return(value))
            }
            StmtKind::Raise { exc, cause } => {
                let exc = match exc {
                    Some(e) => Some(self.lower_raised(e)?),
                    None => None,
                };
                let cause = cause.as_ref().map(|c| self.lower_expr(c)).transpose()?;
                one(HirStmtKind::Raise { exc, cause })
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                let body = self.lower_scoped_block(body)?;
                let handlers = handlers
                    .iter()
                    .map(|h| self.lower_handler(h))
                    .collect::<Result<Vec<_>>>()?;
                let orelse = self.lower_scoped_block(orelse)?;
                let finalbody = self.lower_scoped_block(finalbody)?;
                let yields = visit::contains_yield(&body)
                    || handlers.iter().any(|h| visit::contains_yield(&h.body))
                    || visit::contains_yield(&orelse)
                    || visit::contains_yield(&finalbody);
                if yields {
                    self.check(UnsupportedFeature::YieldInsideTry, pos)?;
                }
                one(HirStmtKind::Try {
                    body,
                    handlers,
                    orelse,
                    finalbody,
                })
            }
            StmtKind::With {
                items,
                body,
                is_async,
            } => {
                if *is_async {
                    return Err(DepylerError::unsupported(pos, "async with"));
                }
                self.lower_with(items, body, pos)
            }
            StmtKind::FuncDef(def) => {
                let func = self.lower_function(def, pos, None)?;
                one(HirStmtKind::FuncDef(Box::new(func)))
            }
            StmtKind::ClassDef(def) => {
                let class = self.lower_class(def, pos)?;
                one(HirStmtKind::ClassDef(Box::new(class)))
            }
            StmtKind::Import(aliases) => {
                let mut out = Vec::new();
                for alias in aliases {
                    self.register_import(alias.name.as_str(), alias.asname.as_deref(), None);
                    let import = HirImport {
                        module: alias.name.clone(),
                        alias: alias.asname.clone(),
                        items: Vec::new(),
                        pos,
                    };
                    self.imports.push(import.clone());
                    out.push(HirStmt::new(HirStmtKind::Import(import), pos));
                }
                Ok(out)
            }
            StmtKind::ImportFrom { module, names, level } => {
                if *level > 0 {
                    return Err(DepylerError::unsupported(pos, "relative import"));
                }
                if names.iter().any(|a| a.name == "*") {
                    return Err(DepylerError::unsupported(pos, "wildcard import"));
                }
                for alias in names {
                    self.register_import(module, alias.asname.as_deref(), Some(&alias.name));
                }
                let import = HirImport {
                    module: module.clone(),
                    alias: None,
                    items: names
                        .iter()
                        .map(|a| (a.name.clone(), a.asname.clone()))
                        .collect(),
                    pos,
                };
                self.imports.push(import.clone());
                one(HirStmtKind::Import(import))
            }
            StmtKind::Global(_) => {
                if self.function_depth > 0 {
                    self.check(UnsupportedFeature::GlobalStatement, pos)?;
                }
                Ok(Vec::new())
            }
            StmtKind::Nonlocal(_) => {
                self.check(UnsupportedFeature::NonlocalStatement, pos)?;
                Ok(Vec::new())
            }
            StmtKind::Delete(_) => {
                self.check(UnsupportedFeature::DelStatement, pos)?;
                one(HirStmtKind::Pass)
            }
            StmtKind::Assert { test, msg } => {
                let test = self.lower_expr(test)?;
                let msg = msg.as_ref().map(|m| self.lower_expr(m)).transpose()?;
                one(HirStmtKind::Assert { test, msg })
            }
            StmtKind::Match => {
                self.check(UnsupportedFeature::MatchStatement, pos)?;
                Err(DepylerError::unsupported(
                    pos,
                    UnsupportedFeature::MatchStatement.description(),
                ))
            }
            StmtKind::Pass => one(HirStmtKind::Pass),
            StmtKind::Break => match self.loop_flags.last() {
                Some(Some(flag)) => {
                    let flag = flag.clone();
                    Ok(vec![
                        HirStmt::new(
                            HirStmtKind::Assign {
                                target: AssignTarget::Name(flag),
                                value: HirExpr::new(HirExprKind::Bool(true), pos),
                                annotation: None,
                            },
                            pos,
                        ),
                        HirStmt::new(HirStmtKind::Break, pos),
                    ])
                }
                _ => one(HirStmtKind::Break),
            },
            StmtKind::Continue => one(HirStmtKind::Continue),
        }
    }

    fn lower_expr_stmt(&mut self, expr: &Expr, pos: SourcePos) -> Result<Vec<HirStmt>> {
        let lowered = match &expr.kind {
            // 途中の docstring と `...`
            ExprKind::StringLiteral { .. } | ExprKind::Ellipsis => return Ok(Vec::new()),
            ExprKind::Yield(value) => {
                let value = value.as_ref().map(|v| self.lower_expr(v)).transpose()?;
                HirExpr::new(HirExprKind::Yield(value.map(Box::new)), expr.pos)
            }
            _ => self.lower_expr(expr)?,
        };
        Ok(vec![HirStmt::new(HirStmtKind::Expr(lowered), pos)])
    }

    /// `a = b = value` は最初のターゲットに代入し、残りはそこからコピーする
    fn lower_assign(&mut self, targets: &[Expr], value: &Expr, pos: SourcePos) -> Result<Vec<HirStmt>> {
        let value = self.lower_expr(value)?;
        let lowered_targets = targets
            .iter()
            .map(|t| self.lower_target(t))
            .collect::<Result<Vec<_>>>()?;

        let mut out = Vec::new();
        let mut iter = lowered_targets.into_iter();
        let Some(first) = iter.next() else {
            return Err(DepylerError::Internal("assignment without target".to_string()));
        };
        let rest: Vec<AssignTarget> = iter.collect();
        if rest.is_empty() {
            out.push(HirStmt::new(
                HirStmtKind::Assign {
                    target: first,
                    value,
                    annotation: None,
                },
                pos,
            ));
            return Ok(out);
        }

        let (first, source) = match first {
            AssignTarget::Name(name) => (AssignTarget::Name(name.clone()), HirExpr::name(name, pos)),
            other => {
                let tmp = self.fresh("tmp");
                out.push(HirStmt::new(
                    HirStmtKind::Assign {
                        target: AssignTarget::Name(tmp.clone()),
                        value: value.clone(),
                        annotation: None,
                    },
                    pos,
                ));
                (other, HirExpr::name(tmp, pos))
            }
        };
        let first_value = if out.is_empty() { value } else { source.clone() };
        out.push(HirStmt::new(
            HirStmtKind::Assign {
                target: first,
                value: first_value,
                annotation: None,
            },
            pos,
        ));
        for target in rest {
            out.push(HirStmt::new(
                HirStmtKind::Assign {
                    target,
                    value: source.clone(),
                    annotation: None,
                },
                pos,
            ));
        }
        Ok(out)
    }

    pub(crate) fn lower_target(&mut self, target: &Expr) -> Result<AssignTarget> {
        match &target.kind {
            ExprKind::Ident(name) => {
                if self.scope.lookup(name).is_none() {
                    self.scope.define(name, Type::Unknown, BindingKind::Local);
                }
                Ok(AssignTarget::Name(name.clone()))
            }
            ExprKind::Attribute { value, attr } => Ok(AssignTarget::Attribute {
                value: self.lower_expr(value)?,
                attr: attr.clone(),
            }),
            ExprKind::Index { target: value, index } => {
                if matches!(index.kind, ExprKind::Slice { .. }) {
                    return Err(DepylerError::unsupported(target.pos, "slice assignment"));
                }
                Ok(AssignTarget::Subscript {
                    value: self.lower_expr(value)?,
                    index: self.lower_expr(index)?,
                })
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => Ok(AssignTarget::Tuple(
                items
                    .iter()
                    .map(|item| self.lower_target(item))
                    .collect::<Result<Vec<_>>>()?,
            )),
            ExprKind::Starred(_) => Err(DepylerError::unsupported(
                target.pos,
                "starred assignment target",
            )),
            _ => Err(DepylerError::unsupported(target.pos, "assignment target")),
        }
    }

    /// for / 内包表記のターゲット
    pub(crate) fn lower_pattern(&mut self, target: &Expr) -> Result<Pattern> {
        match &target.kind {
            ExprKind::Ident(name) if name == "_" => Ok(Pattern::Wildcard),
            ExprKind::Ident(name) => {
                self.scope.define(name, Type::Unknown, BindingKind::Local);
                Ok(Pattern::Name(name.clone()))
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => Ok(Pattern::Tuple(
                items
                    .iter()
                    .map(|item| self.lower_pattern(item))
                    .collect::<Result<Vec<_>>>()?,
            )),
            _ => Err(DepylerError::unsupported(target.pos, "loop target")),
        }
    }

    /// for/while の else 節をフラグ変数に展開する
    fn lower_loop(
        &mut self,
        body: &[Stmt],
        orelse: &[Stmt],
        pos: SourcePos,
        build: impl FnOnce(Vec<HirStmt>) -> HirStmtKind,
    ) -> Result<Vec<HirStmt>> {
        let flag = if !orelse.is_empty() && ast_contains_break(body) {
            Some(self.fresh("broke"))
        } else {
            None
        };

        self.loop_flags.push(flag.clone());
        let lowered = self.lower_scoped_block(body);
        self.loop_flags.pop();
        let body = lowered?;
        let orelse = self.lower_scoped_block(orelse)?;

        let mut out = Vec::new();
        match flag {
            Some(flag) => {
                out.push(HirStmt::new(
                    HirStmtKind::Assign {
                        target: AssignTarget::Name(flag.clone()),
                        value: HirExpr::new(HirExprKind::Bool(false), pos),
                        annotation: Some(Type::Bool),
                    },
                    pos,
                ));
                out.push(HirStmt::new(build(body), pos));
                let test = HirExpr::new(
                    HirExprKind::UnaryOp {
                        op: HirUnaryOp::Not,
                        operand: Box::new(HirExpr::name(flag, pos)),
                    },
                    pos,
                );
                out.push(HirStmt::new(
                    HirStmtKind::If {
                        test,
                        body: orelse,
                        orelse: Vec::new(),
                    },
                    pos,
                ));
            }
            None => {
                // break がなければ else は常に実行される
                out.push(HirStmt::new(build(body), pos));
                out.extend(orelse);
            }
        }
        Ok(out)
    }

    fn lower_handler(&mut self, handler: &ExceptHandler) -> Result<ExceptClause> {
        let types = match &handler.typ {
            None => Vec::new(),
            Some(Expr {
                kind: ExprKind::Tuple(items),
                ..
            }) => items
                .iter()
                .map(|item| self.exception_name(item))
                .collect::<Result<Vec<_>>>()?,
            Some(expr) => vec![self.exception_name(expr)?],
        };
        self.scope.push();
        if let Some(name) = &handler.name {
            self.scope.define(name, Type::Unknown, BindingKind::Local);
        }
        let body = self.lower_block(&handler.body);
        self.scope.pop();
        Ok(ExceptClause {
            types,
            name: handler.name.clone(),
            body: body?,
            pos: handler.pos,
        })
    }

    /// `json.JSONDecodeError` → `ValueError`
    pub(crate) fn exception_name(&self, expr: &Expr) -> Result<String> {
        let dotted = expr
            .dotted_name()
            .ok_or_else(|| DepylerError::unsupported(expr.pos, "exception type expression"))?;
        let short = dotted.rsplit('.').next().unwrap_or(&dotted);
        let mapped = match short {
            "JSONDecodeError" => "ValueError",
            "CalledProcessError" | "TimeoutExpired" => "RuntimeError",
            other => other,
        };
        Ok(mapped.to_string())
    }

    /// `raise ValueError` → `raise ValueError()`
    fn lower_raised(&mut self, exc: &Expr) -> Result<HirExpr> {
        match &exc.kind {
            ExprKind::Ident(_) | ExprKind::Attribute { .. } if exc.dotted_name().is_some() => {
                let name = self.exception_name(exc)?;
                let is_exception_class = ErrorTaxon::is_builtin_exception(&name)
                    || self.exception_classes.contains(&name);
                if is_exception_class {
                    return Ok(HirExpr::new(
                        HirExprKind::Call {
                            func: name,
                            args: Vec::new(),
                            kwargs: Vec::new(),
                        },
                        exc.pos,
                    ));
                }
                self.lower_expr(exc)
            }
            ExprKind::Call { func, args, kwargs } if func.dotted_name().is_some() => {
                let name = self.exception_name(func)?;
                let is_exception_class = ErrorTaxon::is_builtin_exception(&name)
                    || self.exception_classes.contains(&name);
                if !is_exception_class {
                    return self.lower_expr(exc);
                }
                let args = args
                    .iter()
                    .map(|a| self.lower_expr(a))
                    .collect::<Result<Vec<_>>>()?;
                let kwargs = kwargs
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.lower_expr(v)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(HirExpr::new(
                    HirExprKind::Call {
                        func: name,
                        args,
                        kwargs,
                    },
                    exc.pos,
                ))
            }
            _ => self.lower_expr(exc),
        }
    }

    /// 複数アイテムの with は入れ子にする
    fn lower_with(&mut self, items: &[WithItem], body: &[Stmt], pos: SourcePos) -> Result<Vec<HirStmt>> {
        let Some((first, rest)) = items.split_first() else {
            return self.lower_scoped_block(body);
        };
        let context = self.lower_expr(&first.context)?;
        let binding = match &first.target {
            None => None,
            Some(target) => match target.as_ident() {
                Some(name) => {
                    self.scope.define(name, Type::Unknown, BindingKind::Local);
                    Some(name.to_string())
                }
                None => {
                    return Err(DepylerError::unsupported(target.pos, "with target"));
                }
            },
        };
        let inner = self.lower_with(rest, body, pos)?;
        if visit::contains_yield(&inner) {
            self.check(UnsupportedFeature::YieldInsideTry, pos)?;
        }
        Ok(vec![HirStmt::new(
            HirStmtKind::With {
                context,
                binding,
                body: inner,
            },
            pos,
        )])
    }

    /// Record an import so later names resolve through it
    pub(crate) fn register_import(&mut self, module: &str, asname: Option<&str>, item: Option<&str>) {
        match item {
            None => {
                let bound = asname
                    .map(str::to_string)
                    .unwrap_or_else(|| module.split('.').next().unwrap_or(module).to_string());
                let target = if asname.is_some() {
                    module.to_string()
                } else {
                    bound.clone()
                };
                self.module_aliases.insert(bound.clone(), target);
                self.scope.define(&bound, Type::Unknown, BindingKind::Import);
            }
            Some(item) => {
                let bound = asname.unwrap_or(item).to_string();
                let full = format!("{module}.{item}");
                // `from os import path` はモジュール
                if stdlib::is_known_module(&full) {
                    self.module_aliases.insert(bound.clone(), full);
                } else {
                    self.imported_names.insert(bound.clone(), full);
                }
                self.scope.define(&bound, Type::Unknown, BindingKind::Import);
            }
        }
    }
}

/// Names bound anywhere in a block (Python のローカル変数規則)
///
/// ネストした関数・クラスの本体には入らないが、その名前自体は含む。
pub(crate) fn collect_bound_names(stmts: &[Stmt], out: &mut BTreeSet<String>) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Assign { targets, .. } => {
                for target in targets {
                    target_names(target, out);
                }
            }
            StmtKind::AnnAssign {
                target,
                value: Some(_),
                ..
            }
            | StmtKind::AugAssign { target, .. } => target_names(target, out),
            StmtKind::For {
                target, body, orelse, ..
            } => {
                target_names(target, out);
                collect_bound_names(body, out);
                collect_bound_names(orelse, out);
            }
            StmtKind::If { body, orelse, .. } | StmtKind::While { body, orelse, .. } => {
                collect_bound_names(body, out);
                collect_bound_names(orelse, out);
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                collect_bound_names(body, out);
                for handler in handlers {
                    if let Some(name) = &handler.name {
                        out.insert(name.clone());
                    }
                    collect_bound_names(&handler.body, out);
                }
                collect_bound_names(orelse, out);
                collect_bound_names(finalbody, out);
            }
            StmtKind::With { items, body, .. } => {
                for item in items {
                    if let Some(target) = &item.target {
                        target_names(target, out);
                    }
                }
                collect_bound_names(body, out);
            }
            StmtKind::FuncDef(def) => {
                out.insert(def.name.clone());
            }
            StmtKind::ClassDef(def) => {
                out.insert(def.name.clone());
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    let bound = alias
                        .asname
                        .clone()
                        .unwrap_or_else(|| alias.name.split('.').next().unwrap_or(&alias.name).to_string());
                    out.insert(bound);
                }
            }
            StmtKind::ImportFrom { names, .. } => {
                for alias in names {
                    out.insert(alias.asname.clone().unwrap_or_else(|| alias.name.clone()));
                }
            }
            _ => {}
        }
    }
}

/// Names of functions defined directly in a block (nested `def`)
pub(crate) fn collect_defined_functions(stmts: &[Stmt], out: &mut BTreeSet<String>) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::FuncDef(def) => {
                out.insert(def.name.clone());
            }
            StmtKind::If { body, orelse, .. } => {
                collect_defined_functions(body, out);
                collect_defined_functions(orelse, out);
            }
            _ => {}
        }
    }
}

fn target_names(target: &Expr, out: &mut BTreeSet<String>) {
    match &target.kind {
        ExprKind::Ident(name) if name != "_" => {
            out.insert(name.clone());
        }
        ExprKind::Tuple(items) | ExprKind::List(items) => {
            for item in items {
                target_names(item, out);
            }
        }
        ExprKind::Starred(inner) => target_names(inner, out),
        _ => {}
    }
}

/// ループ本体に (内側のループを除いて) break があるか
fn ast_contains_break(stmts: &[Stmt]) -> bool {
    stmts.iter().any(|stmt| match &stmt.kind {
        StmtKind::Break => true,
        StmtKind::If { body, orelse, .. } => ast_contains_break(body) || ast_contains_break(orelse),
        StmtKind::With { body, .. } => ast_contains_break(body),
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            ast_contains_break(body)
                || handlers.iter().any(|h| ast_contains_break(&h.body))
                || ast_contains_break(orelse)
                || ast_contains_break(finalbody)
        }
        _ => false,
    })
}
