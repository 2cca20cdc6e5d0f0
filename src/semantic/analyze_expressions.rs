//! Expression lowering for SemanticAnalyzer
//!
//! Extracted from mod.rs for maintainability

use super::*;
use crate::parser::{Comprehension as AstComprehension, FStringPart, UnaryOp};

impl SemanticAnalyzer {
    pub(crate) fn lower_expr(&mut self, expr: &Expr) -> Result<HirExpr> {
        let pos = expr.pos;
        let kind = match &expr.kind {
            ExprKind::IntLiteral { value, text } => HirExprKind::Int {
                value: *value,
                text: text.clone(),
            },
            ExprKind::FloatLiteral { value, text } => HirExprKind::Float {
                value: *value,
                text: text.clone(),
            },
            ExprKind::StringLiteral { value, raw } => HirExprKind::Str {
                value: value.clone(),
                raw: *raw,
            },
            ExprKind::BytesLiteral(bytes) => HirExprKind::Bytes(bytes.clone()),
            ExprKind::BoolLiteral(b) => HirExprKind::Bool(*b),
            ExprKind::NoneLiteral => HirExprKind::NoneLit,
            ExprKind::Ellipsis => {
                return Err(DepylerError::unsupported(pos, "ellipsis in expression"))
            }
            ExprKind::FString(parts) => HirExprKind::FString(self.lower_fstring(parts)?),
            ExprKind::Ident(name) => return self.resolve_name(name, pos),
            ExprKind::BinOp { left, op, right } => return self.lower_binop(left, *op, right, pos),
            ExprKind::UnaryOp { op, operand } => return self.lower_unary(*op, operand, pos),
            ExprKind::BoolOp { op, values } => {
                let mut iter = values.iter();
                let first = iter
                    .next()
                    .ok_or_else(|| DepylerError::Internal("empty bool op".to_string()))?;
                let mut acc = self.lower_expr(first)?;
                for value in iter {
                    let right = self.lower_expr(value)?;
                    acc = HirExpr::new(
                        HirExprKind::BoolOp {
                            op: (*op).into(),
                            left: Box::new(acc),
                            right: Box::new(right),
                        },
                        pos,
                    );
                }
                return Ok(acc);
            }
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => return self.lower_compare(left, ops, comparators, pos),
            ExprKind::Call { func, args, kwargs } => return self.lower_call(func, args, kwargs, pos),
            ExprKind::IfExp { test, body, orelse } => HirExprKind::IfExpr {
                test: Box::new(self.lower_expr(test)?),
                body: Box::new(self.lower_expr(body)?),
                orelse: Box::new(self.lower_expr(orelse)?),
            },
            ExprKind::Attribute { value, attr } => {
                if let Some(path) = self.module_path(expr) {
                    HirExprKind::Path(path)
                } else {
                    HirExprKind::Attribute {
                        value: Box::new(self.lower_expr(value)?),
                        attr: attr.clone(),
                    }
                }
            }
            ExprKind::Index { target, index } => match &index.kind {
                ExprKind::Slice { lower, upper, step } => {
                    let mut part = |e: &Option<Box<Expr>>| -> Result<Option<Box<HirExpr>>> {
                        e.as_ref()
                            .map(|e| self.lower_expr(e).map(Box::new))
                            .transpose()
                    };
                    let lower = part(lower)?;
                    let upper = part(upper)?;
                    let step = part(step)?;
                    HirExprKind::Slice {
                        value: Box::new(self.lower_expr(target)?),
                        lower,
                        upper,
                        step,
                    }
                }
                _ => HirExprKind::Subscript {
                    value: Box::new(self.lower_expr(target)?),
                    index: Box::new(self.lower_expr(index)?),
                },
            },
            ExprKind::Slice { .. } => {
                return Err(DepylerError::unsupported(pos, "slice outside of a subscript"))
            }
            ExprKind::List(items) => HirExprKind::List(self.lower_exprs(items)?),
            ExprKind::Tuple(items) => HirExprKind::Tuple(self.lower_exprs(items)?),
            ExprKind::Set(items) => HirExprKind::Set(self.lower_exprs(items)?),
            ExprKind::Dict(pairs) => {
                let mut out = Vec::with_capacity(pairs.len());
                for (key, value) in pairs {
                    let key = key
                        .as_ref()
                        .ok_or_else(|| DepylerError::unsupported(value.pos, "dict unpacking"))?;
                    out.push((self.lower_expr(key)?, self.lower_expr(value)?));
                }
                HirExprKind::Dict(out)
            }
            ExprKind::ListComp { elt, generators } => {
                self.lower_comprehension(ComprehensionKind::List, elt, None, generators)?
            }
            ExprKind::SetComp { elt, generators } => {
                self.lower_comprehension(ComprehensionKind::Set, elt, None, generators)?
            }
            ExprKind::GenExpr { elt, generators } => {
                self.lower_comprehension(ComprehensionKind::Generator, elt, None, generators)?
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => self.lower_comprehension(ComprehensionKind::Dict, key, Some(value), generators)?,
            ExprKind::Lambda { params, body } => {
                if params.iter().any(|p| p.default.is_some()) {
                    self.check(UnsupportedFeature::LambdaDefaults, pos)?;
                }
                self.scope.push();
                for param in params {
                    self.scope.define(&param.name, Type::Unknown, BindingKind::Param);
                }
                let body = self.lower_expr(body);
                self.scope.pop_isolated();
                HirExprKind::Lambda {
                    params: params.iter().map(|p| p.name.clone()).collect(),
                    body: Box::new(body?),
                    escapes: false,
                }
            }
            ExprKind::Await(inner) => HirExprKind::Await(Box::new(self.lower_expr(inner)?)),
            ExprKind::Yield(value) => {
                // 文として現れる yield は lower_expr_stmt が処理する
                self.check(UnsupportedFeature::YieldExpression, pos)?;
                let value = value.as_ref().map(|v| self.lower_expr(v)).transpose()?;
                HirExprKind::Yield(value.map(Box::new))
            }
            ExprKind::YieldFrom(_) => {
                self.check(UnsupportedFeature::YieldFrom, pos)?;
                return Err(DepylerError::unsupported(
                    pos,
                    UnsupportedFeature::YieldFrom.description(),
                ));
            }
            ExprKind::Starred(inner) => HirExprKind::Starred(Box::new(self.lower_expr(inner)?)),
            ExprKind::DoubleStarred(_) => {
                self.check(UnsupportedFeature::StarArgs, pos)?;
                return Err(DepylerError::unsupported(pos, "keyword unpacking"));
            }
            ExprKind::NamedExpr { target, value } => {
                if self.scope.lookup(target).is_none() {
                    self.scope.define(target, Type::Unknown, BindingKind::Local);
                }
                HirExprKind::NamedExpr {
                    target: target.clone(),
                    value: Box::new(self.lower_expr(value)?),
                }
            }
        };
        Ok(HirExpr::new(kind, pos))
    }

    pub(crate) fn lower_exprs(&mut self, items: &[Expr]) -> Result<Vec<HirExpr>> {
        items.iter().map(|item| self.lower_expr(item)).collect()
    }

    /// 名前解決: ローカル → モジュール → import → 組み込み
    pub(crate) fn resolve_name(&self, name: &str, pos: SourcePos) -> Result<HirExpr> {
        if let Some(info) = self.scope.lookup(name) {
            let kind = match info.kind {
                BindingKind::Import => match self.imported_names.get(name) {
                    Some(full) => HirExprKind::Path(full.clone()),
                    None => HirExprKind::Path(
                        self.module_aliases
                            .get(name)
                            .cloned()
                            .unwrap_or_else(|| name.to_string()),
                    ),
                },
                BindingKind::Function if info.defined_at_depth == 0 => {
                    HirExprKind::Name(self.function_name(name))
                }
                _ => HirExprKind::Name(name.to_string()),
            };
            return Ok(HirExpr::new(kind, pos));
        }
        if stdlib::is_builtin(name) || ErrorTaxon::is_builtin_exception(name) {
            return Ok(HirExpr::name(name, pos));
        }
        Err(DepylerError::unresolved(pos, name))
    }

    /// `math.pi` / `os.path.sep` のようなモジュール経由のパス
    pub(crate) fn module_path(&self, expr: &Expr) -> Option<String> {
        let dotted = expr.dotted_name()?;
        let (root, rest) = match dotted.split_once('.') {
            Some((root, rest)) => (root, Some(rest)),
            None => (dotted.as_str(), None),
        };
        // ローカル変数が同名なら属性アクセス
        match self.scope.lookup(root) {
            Some(info) if info.kind == BindingKind::Import => {}
            _ => return None,
        }
        let base = self
            .module_aliases
            .get(root)
            .or_else(|| self.imported_names.get(root))?;
        Some(match rest {
            Some(rest) => format!("{base}.{rest}"),
            None => base.clone(),
        })
    }

    fn lower_binop(&mut self, left: &Expr, op: BinOp, right: &Expr, pos: SourcePos) -> Result<HirExpr> {
        let hir_op = match HirBinOp::from_ast(op) {
            Some(op) => op,
            None => {
                self.check(UnsupportedFeature::MatrixMultiply, pos)?;
                return Err(DepylerError::unsupported(
                    pos,
                    UnsupportedFeature::MatrixMultiply.description(),
                ));
            }
        };
        // "%s items" % n → f-string
        if let (BinOp::Mod, ExprKind::StringLiteral { value, .. }) = (op, &left.kind) {
            let args = match &right.kind {
                ExprKind::Tuple(items) => items.clone(),
                _ => vec![right.clone()],
            };
            if let Some(parts) = percent_format(value, &args) {
                return Ok(HirExpr::new(HirExprKind::FString(self.lower_fstring(&parts)?), pos));
            }
        }
        Ok(HirExpr::new(
            HirExprKind::BinOp {
                op: hir_op,
                left: Box::new(self.lower_expr(left)?),
                right: Box::new(self.lower_expr(right)?),
            },
            pos,
        ))
    }

    fn lower_unary(&mut self, op: UnaryOp, operand: &Expr, pos: SourcePos) -> Result<HirExpr> {
        // 負の数値リテラルは畳み込む
        if op == UnaryOp::Neg {
            match &operand.kind {
                ExprKind::IntLiteral { value, text } => {
                    return Ok(HirExpr::new(
                        HirExprKind::Int {
                            value: value.wrapping_neg(),
                            text: format!("-{text}"),
                        },
                        pos,
                    ))
                }
                ExprKind::FloatLiteral { value, text } => {
                    return Ok(HirExpr::new(
                        HirExprKind::Float {
                            value: -value,
                            text: format!("-{text}"),
                        },
                        pos,
                    ))
                }
                _ => {}
            }
        }
        Ok(HirExpr::new(
            HirExprKind::UnaryOp {
                op: op.into(),
                operand: Box::new(self.lower_expr(operand)?),
            },
            pos,
        ))
    }

    /// `a < b < c` → `a < b && b < c` (中間項は一度だけ評価する)
    fn lower_compare(
        &mut self,
        left: &Expr,
        ops: &[CmpOp],
        comparators: &[Expr],
        pos: SourcePos,
    ) -> Result<HirExpr> {
        if ops.len() != comparators.len() || ops.is_empty() {
            return Err(DepylerError::Internal("malformed comparison".to_string()));
        }
        let left = self.lower_expr(left)?;
        let rest: Vec<(HirCmpOp, &Expr)> = ops
            .iter()
            .map(|op| HirCmpOp::from(*op))
            .zip(comparators.iter())
            .collect();
        if rest.len() > 1 && !left.is_trivial() {
            let name = self.fresh("cmp");
            let body = self.compare_chain(HirExpr::name(name.clone(), pos), &rest, pos)?;
            return Ok(HirExpr::new(
                HirExprKind::TempBind {
                    name,
                    value: Box::new(left),
                    body: Box::new(body),
                },
                pos,
            ));
        }
        self.compare_chain(left, &rest, pos)
    }

    fn compare_chain(
        &mut self,
        left: HirExpr,
        rest: &[(HirCmpOp, &Expr)],
        pos: SourcePos,
    ) -> Result<HirExpr> {
        let Some(((op, first), tail)) = rest.split_first() else {
            return Ok(left);
        };
        let right = self.lower_expr(first)?;
        let pair = |left: HirExpr, right: HirExpr| {
            HirExpr::new(
                HirExprKind::Compare {
                    op: *op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                pos,
            )
        };
        if tail.is_empty() {
            return Ok(pair(left, right));
        }
        let and = |l: HirExpr, r: HirExpr| {
            HirExpr::new(
                HirExprKind::BoolOp {
                    op: HirBoolOp::And,
                    left: Box::new(l),
                    right: Box::new(r),
                },
                pos,
            )
        };
        if right.is_trivial() {
            let head = pair(left, right.clone());
            let tail = self.compare_chain(right, tail, pos)?;
            return Ok(and(head, tail));
        }
        // 中間項は一時変数に束縛する
        let name = self.fresh("cmp");
        let var = HirExpr::name(name.clone(), pos);
        let head = pair(left, var.clone());
        let tail = self.compare_chain(var, tail, pos)?;
        Ok(HirExpr::new(
            HirExprKind::TempBind {
                name,
                value: Box::new(right),
                body: Box::new(and(head, tail)),
            },
            pos,
        ))
    }

    pub(crate) fn lower_fstring(&mut self, parts: &[FStringPart]) -> Result<Vec<FStringFragment>> {
        let mut out = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                FStringPart::Literal(text) => {
                    // 隣接するリテラルは結合する
                    if let Some(FStringFragment::Literal(prev)) = out.last_mut() {
                        prev.push_str(text);
                    } else {
                        out.push(FStringFragment::Literal(text.clone()));
                    }
                }
                FStringPart::Expr {
                    value,
                    conversion,
                    format_spec,
                } => out.push(FStringFragment::Expr {
                    value: self.lower_expr(value)?,
                    conversion: conversion.and_then(Conversion::from_char),
                    format_spec: format_spec.clone(),
                }),
            }
        }
        Ok(out)
    }

    fn lower_comprehension(
        &mut self,
        kind: ComprehensionKind,
        element: &Expr,
        value: Option<&Expr>,
        generators: &[AstComprehension],
    ) -> Result<HirExprKind> {
        if generators.iter().any(|g| g.is_async) {
            return Err(DepylerError::unsupported(element.pos, "async comprehension"));
        }
        self.scope.push();
        let result = self.lower_comprehension_inner(kind, element, value, generators);
        self.scope.pop_isolated();
        result
    }

    fn lower_comprehension_inner(
        &mut self,
        kind: ComprehensionKind,
        element: &Expr,
        value: Option<&Expr>,
        generators: &[AstComprehension],
    ) -> Result<HirExprKind> {
        let mut iters = Vec::with_capacity(generators.len());
        for generator in generators {
            // イテラブルはターゲットを束縛する前に評価する
            let iter = self.lower_expr(&generator.iter)?;
            let target = self.lower_pattern(&generator.target)?;
            let guards = self.lower_exprs(&generator.ifs)?;
            iters.push(CompIter {
                target,
                iter,
                guards,
            });
        }
        let element = self.lower_expr(element)?;
        let value = value.map(|v| self.lower_expr(v)).transpose()?;
        Ok(HirExprKind::Comprehension(Box::new(Comprehension {
            kind,
            element,
            value,
            iters,
        })))
    }
}

/// `"%s: %d" % (a, b)` の書式を f-string の断片に分解する
///
/// 対応外の変換指定があれば None。
fn percent_format(template: &str, args: &[Expr]) -> Option<Vec<FStringPart>> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut args = args.iter();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            literal.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            literal.push('%');
            continue;
        }
        let mut spec = String::new();
        while let Some(&d) = chars.peek() {
            if d.is_ascii_digit() || d == '.' || d == '-' || d == '+' || d == '0' {
                spec.push(d);
                chars.next();
            } else {
                break;
            }
        }
        let conv = chars.next()?;
        let arg = args.next()?.clone();
        if !literal.is_empty() {
            parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
        }
        let (conversion, format_spec) = match conv {
            's' | 'd' | 'i' if spec.is_empty() => (None, None),
            'r' if spec.is_empty() => (Some('r'), None),
            'd' | 'i' => (None, Some(spec.replace('-', "<"))),
            'f' | 'e' => (None, Some(format!("{spec}{conv}"))),
            'x' | 'X' | 'o' => (None, Some(format!("{spec}{conv}"))),
            's' => (None, Some(spec.replace('-', "<"))),
            _ => return None,
        };
        parts.push(FStringPart::Expr {
            value: arg,
            conversion,
            format_spec,
        });
    }
    if args.next().is_some() {
        return None;
    }
    if !literal.is_empty() {
        parts.push(FStringPart::Literal(literal));
    }
    Some(parts)
}
