//! Statement lowering (C7)
//!
//! 文ごとに行を出す。入れ子のブロックで初めて束縛され、ブロックの外でも
//! 使われる名前は関数の先頭で宣言しておく (巻き上げ)。

use super::comp_gen::pattern_code;
use super::context::{default_dict_targets, rust_ident, Binding};
use super::value::{Form, Value};
use super::RustEmitter;
use crate::error::{DepylerError, Result};
use crate::hir::visit;
use crate::hir::*;
use crate::semantic::{collect_mutations, join, narrowed_in_body, narrowed_in_else, Narrowing, Type};
use std::collections::BTreeSet;

impl RustEmitter<'_> {
    /// Function or entry body: hoisted declarations, then the statements
    ///
    /// 最後の `return` は末尾式にする。
    pub(super) fn emit_body(&mut self, stmts: &[HirStmt]) -> Result<()> {
        let (filled, _) = default_dict_targets(stmts);
        self.ctx.frame_mut()?.default_dicts.extend(filled);
        self.emit_hoisted(stmts)?;
        match stmts.split_last() {
            Some((last, rest)) if self.tail_return_allowed(last) => {
                self.emit_block(rest)?;
                if let HirStmtKind::Return(value) = &last.kind {
                    let code = self.return_value(value.as_ref())?;
                    if !code.is_empty() {
                        self.line(code);
                    }
                }
                Ok(())
            }
            _ => self.emit_block(stmts),
        }
    }

    fn tail_return_allowed(&self, stmt: &HirStmt) -> bool {
        matches!(stmt.kind, HirStmtKind::Return(_))
            && self.ctx.frame().map_or(false, |f| {
                f.cleanups.is_empty() && f.gen_return.is_none() && f.init_return.is_none()
            })
    }

    /// `let mut x: T = Default::default();` for every hoisted name
    pub(super) fn emit_hoisted(&mut self, stmts: &[HirStmt]) -> Result<()> {
        for name in hoisted_names(stmts) {
            if self.ctx.is_declared(&name) || self.ctx.globals.contains_key(&name) {
                continue;
            }
            let ty = self.local_ty(&name).unwrap_or(Type::Unknown);
            let ident = rust_ident(&name);
            let line = match self.ctx.local_type(&ty) {
                Some(t) if self.ctx.has_default(&ty) => {
                    format!("let mut {ident}: {t} = Default::default();")
                }
                Some(t) => format!("let mut {ident}: {t};"),
                None => format!("let mut {ident};"),
            };
            self.line(line);
            self.ctx.declare_local(&name, ty, Form::Place);
        }
        Ok(())
    }

    pub(super) fn emit_block(&mut self, stmts: &[HirStmt]) -> Result<()> {
        for stmt in stmts {
            self.emit_stmt(stmt)?;
        }
        Ok(())
    }

    /// ブロックを新しいスコープで出す (`{` は呼び出し側が開く)
    pub(super) fn scoped_block(&mut self, stmts: &[HirStmt]) -> Result<()> {
        self.ctx.push_scope();
        let result = self.emit_block(stmts);
        self.ctx.pop_scope();
        result
    }

    pub(super) fn emit_stmt(&mut self, stmt: &HirStmt) -> Result<()> {
        match &stmt.kind {
            HirStmtKind::Assign {
                target,
                value,
                annotation,
            } => self.emit_assign(target, value, annotation.as_ref(), stmt.pos),
            HirStmtKind::AugAssign { target, op, value } => {
                self.emit_aug_assign(target, *op, value, stmt.pos)
            }
            HirStmtKind::If { test, body, orelse } => self.emit_if(test, body, orelse),
            HirStmtKind::While { test, body } => self.emit_while(test, body),
            HirStmtKind::For { target, iter, body } => self.emit_for(target, iter, body, stmt.pos),
            HirStmtKind::Return(value) => self.emit_return(value.as_ref()),
            HirStmtKind::Raise { exc, cause } => self.emit_raise(exc.as_ref(), cause.as_ref(), stmt.pos),
            HirStmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => self.emit_try(body, handlers, orelse, finalbody),
            HirStmtKind::With {
                context,
                binding,
                body,
            } => self.emit_with(context, binding.as_deref(), body),
            HirStmtKind::Break => self.emit_loop_exit(true),
            HirStmtKind::Continue => self.emit_loop_exit(false),
            HirStmtKind::Expr(e) => self.emit_expr_stmt(e),
            HirStmtKind::Pass | HirStmtKind::Import(_) => Ok(()),
            HirStmtKind::FuncDef(f) => self.emit_nested_function(f),
            HirStmtKind::ClassDef(c) => Err(DepylerError::unsupported(
                c.pos,
                "class definition inside a function",
            )),
            HirStmtKind::Assert { test, msg } => self.emit_assert(test, msg.as_ref()),
        }
    }

    fn emit_expr_stmt(&mut self, e: &HirExpr) -> Result<()> {
        match &e.kind {
            HirExprKind::Yield(value) => return self.emit_yield(value.as_deref(), e.pos),
            // docstring
            HirExprKind::Str { .. } => return Ok(()),
            _ => {}
        }
        let v = self.expr(e)?;
        // 名前だけの式文は何もしない (ムーブさせない)
        if v.code.is_empty() || v.code == "()" || matches!(v.form, Form::Place | Form::Borrowed | Form::BorrowedMut | Form::Literal) {
            return Ok(());
        }
        self.line(format!("{};", v.code));
        Ok(())
    }

    fn emit_assert(&mut self, test: &HirExpr, msg: Option<&HirExpr>) -> Result<()> {
        let c = self.cond(test)?;
        match msg {
            Some(m) => {
                let v = self.expr(m)?;
                let hole = self.display(&v);
                self.line(format!("assert!({c}, \"{}\", {});", hole.placeholder, hole.arg));
            }
            None => self.line(format!("assert!({c});")),
        }
        Ok(())
    }

    // --- 代入 ---

    fn emit_assign(
        &mut self,
        target: &AssignTarget,
        value: &HirExpr,
        annotation: Option<&Type>,
        pos: SourcePos,
    ) -> Result<()> {
        match target {
            AssignTarget::Name(n) => self.assign_name(n, value, annotation),
            AssignTarget::Tuple(items) => self.assign_tuple(items, value, pos),
            _ => {
                let v = self.expr(value)?;
                self.assign_value(target, v, pos)
            }
        }
    }

    fn assign_name(&mut self, n: &str, value: &HirExpr, annotation: Option<&Type>) -> Result<()> {
        // ArgumentParser 自体は Args 構造体に置き換わる
        if matches!(&value.ty, Type::Native(p) if p == "argparse.ArgumentParser") {
            self.ctx.declare(
                n,
                Binding {
                    code: "()".to_string(),
                    ty: value.ty.clone(),
                    form: Form::Owned,
                },
            );
            return Ok(());
        }
        if self.ctx.is_declared(n) || self.ctx.globals.contains_key(n) {
            let v = self.expr(value)?;
            return self.reassign_name(n, v);
        }
        let ty = annotation
            .cloned()
            .or_else(|| self.local_ty(n))
            .filter(|t| !t.contains_unknown())
            .unwrap_or_else(|| value.ty.clone());
        let v = self.expr(value)?;
        let ident = rust_ident(n);
        let mutable = if self.ctx.is_mutable(n) { "mut " } else { "" };

        if v.form == Form::Iter && keeps_lazy(value, self) {
            self.line(format!("let mut {ident} = {};", v.code));
            self.ctx.declare_local(n, v.ty.clone(), Form::Iter);
            return Ok(());
        }
        if matches!(value.kind, HirExprKind::Lambda { .. }) {
            self.line(format!("let {mutable}{ident} = {};", v.code));
            self.ctx.declare_local(n, v.ty.clone(), Form::Place);
            return Ok(());
        }
        let code = if ty.contains_unknown() {
            v.into_owned()
        } else {
            self.coerce(v, &ty)?
        };
        match self.ctx.local_type(&ty) {
            Some(t) if !matches!(ty, Type::Callable { .. }) => {
                self.line(format!("let {mutable}{ident}: {t} = {code};"))
            }
            _ => self.line(format!("let {mutable}{ident} = {code};")),
        }
        self.ctx.declare_local(n, ty, Form::Place);
        Ok(())
    }

    /// 宣言済みの名前 (あるいはモジュール変数) への再代入
    fn reassign_name(&mut self, n: &str, v: Value) -> Result<()> {
        let place = match self.ctx.lookup(n).cloned() {
            Some(b) => {
                let code = if b.form == Form::BorrowedMut {
                    format!("*{}", b.code)
                } else {
                    b.code
                };
                Value::new(code, b.ty, Form::Place)
            }
            None => match self.ctx.global_value(n, true) {
                Some(g) => g,
                None => return Err(DepylerError::Internal(format!("'{n}' is not declared"))),
            },
        };
        let ty = if place.ty.contains_unknown() { v.ty.clone() } else { place.ty.clone() };
        let code = self.coerce(v, &ty)?;
        self.line(format!("{} = {code};", place.code));
        Ok(())
    }

    fn assign_tuple(&mut self, items: &[AssignTarget], value: &HirExpr, pos: SourcePos) -> Result<()> {
        let names: Option<Vec<&str>> = items.iter().map(AssignTarget::as_name).collect();
        let fresh_names = names.as_ref().map_or(false, |ns| {
            ns.iter()
                .all(|n| !self.ctx.is_declared(n) && !self.ctx.globals.contains_key(*n))
        });
        let v = self.expr(value)?;
        if let (Some(names), true) = (names, fresh_names) {
            let tys = self.element_types(&v.ty, names.len());
            let pattern: Vec<String> = names
                .iter()
                .map(|n| {
                    let ident = rust_ident(n);
                    if self.ctx.is_mutable(n) {
                        format!("mut {ident}")
                    } else {
                        ident
                    }
                })
                .collect();
            self.line(format!("let ({}) = {};", pattern.join(", "), v.into_owned()));
            for (n, t) in names.iter().zip(tys) {
                let ty = self.local_ty(n).filter(|t| !t.contains_unknown()).unwrap_or(t);
                self.ctx.declare_local(n, ty, Form::Place);
            }
            return Ok(());
        }
        // 入れ替え (`a, b = b, a`) などは一時変数を経由する
        let tmp = self.ctx.fresh("t");
        let tys = self.element_types(&v.ty, items.len());
        self.line(format!("let {tmp} = {};", v.into_owned()));
        for (i, (target, ty)) in items.iter().zip(tys).enumerate() {
            let part = Value::new(format!("{tmp}.{i}"), ty, Form::Place);
            self.assign_value(target, part, pos)?;
        }
        Ok(())
    }

    fn element_types(&self, ty: &Type, n: usize) -> Vec<Type> {
        match ty {
            Type::Tuple(ts) if ts.len() == n => ts.clone(),
            Type::List(t) => vec![(**t).clone(); n],
            _ => vec![Type::Unknown; n],
        }
    }

    /// Store an already lowered value into `target`
    fn assign_value(&mut self, target: &AssignTarget, v: Value, pos: SourcePos) -> Result<()> {
        match target {
            AssignTarget::Name(n) => {
                if self.ctx.is_declared(n) || self.ctx.globals.contains_key(n) {
                    return self.reassign_name(n, v);
                }
                let ty = self
                    .local_ty(n)
                    .filter(|t| !t.contains_unknown())
                    .unwrap_or_else(|| v.ty.clone());
                let mutable = if self.ctx.is_mutable(n) { "mut " } else { "" };
                let code = self.coerce(v, &ty)?;
                self.line(format!("let {mutable}{} = {code};", rust_ident(n)));
                self.ctx.declare_local(n, ty, Form::Place);
                Ok(())
            }
            AssignTarget::Tuple(items) => {
                let tmp = self.ctx.fresh("t");
                let tys = self.element_types(&v.ty, items.len());
                self.line(format!("let {tmp} = {};", v.into_owned()));
                for (i, (t, ty)) in items.iter().zip(tys).enumerate() {
                    self.assign_value(t, Value::new(format!("{tmp}.{i}"), ty, Form::Place), pos)?;
                }
                Ok(())
            }
            AssignTarget::Attribute { value, attr } => self.assign_attribute(value, attr, v, pos),
            AssignTarget::Subscript { value, index } => self.assign_subscript(value, index, v, pos),
        }
    }

    fn assign_attribute(&mut self, obj: &HirExpr, attr: &str, v: Value, pos: SourcePos) -> Result<()> {
        // 構築前の `self.x = ...` はローカル変数に入れる
        if obj.as_name() == Some("self") && !self.ctx.is_declared("self") {
            if let Some(class) = self.ctx.current_class().map(str::to_string) {
                return self.assign_init_field(&class, attr, v);
            }
        }
        if let Type::Class(class) = &obj.ty {
            if self.has_setter(class, attr) {
                let recv = self.place_expr(obj)?;
                let ty = self.property_type(class, attr);
                let code = self.coerce(v, &ty)?;
                self.line(format!("{}.set_{attr}({code});", recv.atom()));
                return Ok(());
            }
        }
        let target = HirExpr::typed(
            HirExprKind::Attribute {
                value: Box::new(obj.clone()),
                attr: attr.to_string(),
            },
            Type::Unknown,
            pos,
        );
        let place = self.place_expr(&target)?;
        let ty = if place.ty.contains_unknown() { v.ty.clone() } else { place.ty.clone() };
        let code = self.coerce(v, &ty)?;
        self.line(format!("{} = {code};", place.code));
        Ok(())
    }

    fn assign_init_field(&mut self, class: &str, attr: &str, v: Value) -> Result<()> {
        let ty = self
            .ctx
            .find_field(class, attr)
            .map(|(_, t)| t)
            .filter(|t| !t.contains_unknown())
            .unwrap_or_else(|| v.ty.clone());
        let existing = self
            .ctx
            .frame()
            .and_then(|f| f.init_fields.get(attr).cloned())
            .filter(|local| self.ctx.is_declared(local));
        let code = self.coerce(v, &ty)?;
        match existing {
            Some(local) => self.line(format!("{local} = {code};")),
            None => {
                let local = format!("_f_{attr}");
                match self.ctx.local_type(&ty) {
                    Some(t) => self.line(format!("let mut {local}: {t} = {code};")),
                    None => self.line(format!("let mut {local} = {code};")),
                }
                self.ctx.declare(
                    &local,
                    Binding {
                        code: local.clone(),
                        ty,
                        form: Form::Place,
                    },
                );
                self.ctx.frame_mut()?.init_fields.insert(attr.to_string(), local);
            }
        }
        Ok(())
    }

    fn has_setter(&self, class: &str, attr: &str) -> bool {
        let mut current = Some(class.to_string());
        while let Some(c) = current {
            let Some(info) = self.ctx.classes.get(&c) else {
                return false;
            };
            if info.setters.contains(attr) {
                return true;
            }
            current = info.base.clone();
        }
        false
    }

    fn property_type(&self, class: &str, attr: &str) -> Type {
        self.ctx
            .find_method(class, attr)
            .map(|(_, sig)| sig.ret.clone())
            .unwrap_or(Type::Unknown)
    }

    fn assign_subscript(&mut self, obj: &HirExpr, index: &HirExpr, v: Value, pos: SourcePos) -> Result<()> {
        if let Type::Dict(kt, vt) = obj.ty.unwrap_optional() {
            let (kt, vt) = ((**kt).clone(), (**vt).clone());
            let base = self.place_expr(obj)?;
            let key = self.expr(index)?;
            let key = self.coerce(key, &kt)?;
            let ty = if vt.contains_unknown() { v.ty.clone() } else { vt };
            let val = self.coerce(v, &ty)?;
            self.line(format!("{}.insert({key}, {val});", base.atom()));
            return Ok(());
        }
        let target = HirExpr::typed(
            HirExprKind::Subscript {
                value: Box::new(obj.clone()),
                index: Box::new(index.clone()),
            },
            Type::Unknown,
            pos,
        );
        let place = self.place_expr(&target)?;
        if place.form != Form::Place {
            return Err(DepylerError::unsupported(
                pos,
                format!("item assignment on a value of type {}", obj.ty),
            ));
        }
        let ty = if place.ty.contains_unknown() { v.ty.clone() } else { place.ty.clone() };
        // 右辺を先に評価してから借用する
        let code = self.coerce(v, &ty)?;
        if code.contains(&place.code) || place.code.contains("py_index") {
            let tmp = self.ctx.fresh("v");
            self.line(format!("let {tmp} = {code};"));
            self.line(format!("{} = {tmp};", place.code));
        } else {
            self.line(format!("{} = {code};", place.code));
        }
        Ok(())
    }

    // --- 累算代入 ---

    fn emit_aug_assign(&mut self, target: &AssignTarget, op: HirBinOp, value: &HirExpr, pos: SourcePos) -> Result<()> {
        let target_expr = match target {
            AssignTarget::Name(n) => HirExpr::name(n.clone(), pos),
            AssignTarget::Attribute { value, attr } => HirExpr::new(
                HirExprKind::Attribute {
                    value: Box::new(value.clone()),
                    attr: attr.clone(),
                },
                pos,
            ),
            AssignTarget::Subscript { value, index } => HirExpr::new(
                HirExprKind::Subscript {
                    value: Box::new(value.clone()),
                    index: Box::new(index.clone()),
                },
                pos,
            ),
            AssignTarget::Tuple(_) => {
                return Err(DepylerError::unsupported(pos, "augmented assignment to a tuple"))
            }
        };
        // 構築前のフィールド
        if let AssignTarget::Attribute { value: obj, .. } = target {
            if obj.as_name() == Some("self") && !self.ctx.is_declared("self") {
                return self.desugared_aug_assign(target, &target_expr, op, value, pos);
            }
        }
        let place = self.place_expr(&target_expr)?;
        let place_code = match place.form {
            Form::BorrowedMut if place.ty.is_copy() => format!("*{}", place.code),
            _ => place.code.clone(),
        };
        let rhs = self.expr(value)?;

        match (&place.ty, op, &rhs.ty) {
            (Type::Int, _, Type::Int | Type::Bool) if in_place_int(op) => {
                self.line(format!("{place_code} {}= {};", op.rust_token(), rhs.as_i64()));
                Ok(())
            }
            (Type::Float, HirBinOp::Add | HirBinOp::Sub | HirBinOp::Mul | HirBinOp::Div, Type::Int | Type::Float | Type::Bool) => {
                self.line(format!("{place_code} {}= {};", op.rust_token(), rhs.as_f64()));
                Ok(())
            }
            (Type::Bool, HirBinOp::BitAnd | HirBinOp::BitOr | HirBinOp::BitXor, Type::Bool) => {
                self.line(format!("{place_code} {}= {};", op.rust_token(), rhs.scalar()));
                Ok(())
            }
            (Type::Str, HirBinOp::Add, _) => {
                let arg = match rhs.ty {
                    Type::Str => rhs.as_str_ref(),
                    _ => format!("&{}", self.to_str(&rhs)),
                };
                self.line(format!("{}.push_str({arg});", place.atom()));
                Ok(())
            }
            (Type::List(_), HirBinOp::Add, _) => {
                self.line(format!("{}.extend({});", place.atom(), rhs.iter_owned()));
                Ok(())
            }
            (Type::Set(_), HirBinOp::BitOr, Type::Set(_)) => {
                self.line(format!("{}.extend({});", place.atom(), rhs.iter_owned()));
                Ok(())
            }
            _ => self.desugared_aug_assign(target, &target_expr, op, value, pos),
        }
    }

    /// `x = x <op> rhs`
    fn desugared_aug_assign(
        &mut self,
        target: &AssignTarget,
        target_expr: &HirExpr,
        op: HirBinOp,
        value: &HirExpr,
        pos: SourcePos,
    ) -> Result<()> {
        let ty = match target {
            AssignTarget::Name(n) => self.ctx.lookup(n).map(|b| b.ty.clone()),
            _ => None,
        }
        .unwrap_or(Type::Unknown);
        let mut left = target_expr.clone();
        if !ty.contains_unknown() {
            left.ty = ty.clone();
        }
        let combined = HirExpr::typed(
            HirExprKind::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(value.clone()),
            },
            ty,
            pos,
        );
        let v = self.expr(&combined)?;
        self.assign_value(target, v, pos)
    }

    // --- if ---

    fn emit_if(&mut self, test: &HirExpr, body: &[HirStmt], orelse: &[HirStmt]) -> Result<()> {
        if self.emit_let_else(test, body, orelse)? {
            return Ok(());
        }
        self.emit_if_arm(test, body, orelse, false)?;
        self.close();
        Ok(())
    }

    /// `if x is None: return` → `let Some(x) = x else { return; };`
    fn emit_let_else(&mut self, test: &HirExpr, body: &[HirStmt], orelse: &[HirStmt]) -> Result<bool> {
        if !orelse.is_empty() || !visit::always_returns(body) {
            return Ok(false);
        }
        if !matches!(test.kind, HirExprKind::Compare { .. }) {
            return Ok(false);
        }
        let Some(n) = narrowed_in_else(test) else {
            return Ok(false);
        };
        if self.ctx.is_mutable(&n.name) {
            return Ok(false);
        }
        let Some(subject) = self.ctx.lookup(&n.name).cloned() else {
            return Ok(false);
        };
        let ident = rust_ident(&n.name);
        let pattern = self.narrow_pattern(&n, &ident);
        // `(*x)` のような借用中の場所からはムーブできない
        let by_ref = subject.code != ident && subject.form == Form::Place;
        let scrutinee = if by_ref {
            format!("&{}", subject.code)
        } else {
            subject.code.clone()
        };
        self.open(format!("let {pattern} = {scrutinee} else"));
        self.scoped_block(body)?;
        self.close_with(";");
        let borrowed = by_ref || matches!(subject.form, Form::Borrowed | Form::BorrowedMut);
        let form = if borrowed { Form::Borrowed } else { Form::Place };
        self.ctx.declare(
            &n.name,
            Binding {
                code: ident,
                ty: n.ty,
                form,
            },
        );
        Ok(true)
    }

    /// 1 つの `if` / `else if` 腕を開き、else 側まで出す (最後の `}` は呼び出し側)
    fn emit_if_arm(&mut self, test: &HirExpr, body: &[HirStmt], orelse: &[HirStmt], chained: bool) -> Result<()> {
        let keyword = if chained { "else if" } else { "if" };

        // `if x is None: a else: b` は `if let Some(x) = &x { b } else { a }`
        if let Some(n) = narrowed_in_else(test).filter(|_| !orelse.is_empty()) {
            if matches!(test.kind, HirExprKind::Compare { .. }) && self.ctx.is_declared(&n.name) {
                let header = self.narrowed_header(&n, test, keyword)?;
                self.open_arm(&header, chained);
                self.narrowed_block(&n, orelse)?;
                self.reopen("else");
                self.scoped_block(body)?;
                return Ok(());
            }
        }

        let narrowing = narrowed_in_body(test).filter(|n| self.ctx.is_declared(&n.name));
        match narrowing {
            Some(n) => {
                let header = self.narrowed_header(&n, test, keyword)?;
                self.open_arm(&header, chained);
                self.narrowed_block(&n, body)?;
            }
            None => {
                let c = self.cond(test)?;
                self.open_arm(&format!("{keyword} {c}"), chained);
                self.scoped_block(body)?;
            }
        }
        match orelse {
            [] => Ok(()),
            [HirStmt {
                kind: HirStmtKind::If {
                    test: t2,
                    body: b2,
                    orelse: o2,
                },
                ..
            }] => self.emit_if_arm(t2, b2, o2, true),
            _ => {
                self.reopen("else");
                self.scoped_block(orelse)
            }
        }
    }

    fn open_arm(&mut self, header: &str, chained: bool) {
        if chained {
            self.reopen(header);
        } else {
            self.open(header);
        }
    }

    /// `} header {`
    pub(super) fn reopen(&mut self, header: &str) {
        self.close_with(&format!(" {header} {{"));
        self.indent += 1;
    }

    /// `if let Some(x) = &x`
    ///
    /// 本体で書き換えられる変数はクローンを束縛する。
    fn narrowed_header(&mut self, n: &Narrowing, test: &HirExpr, keyword: &str) -> Result<String> {
        let subject = self
            .ctx
            .lookup(&n.name)
            .cloned()
            .ok_or_else(|| DepylerError::Internal(format!("'{}' is not declared", n.name)))?;
        let ident = rust_ident(&n.name);
        let pattern = self.narrow_pattern(n, &ident);
        let owned = self.ctx.is_mutable(&n.name);
        let scrutinee = match (test.as_name().is_some(), owned) {
            (true, false) => {
                let item = Value::new("(**_v)", n.ty.clone(), Form::Place);
                format!("{}.as_ref().filter(|_v| {})", subject.code, self.truthy(&item))
            }
            (true, true) => {
                let item = Value::new("(*_v)", n.ty.clone(), Form::Place);
                format!("{}.clone().filter(|_v| {})", subject.code, self.truthy(&item))
            }
            (false, false) => format!("&{}", subject.code),
            (false, true) => format!("{}.clone()", subject.code),
        };
        Ok(format!("{keyword} let {pattern} = {scrutinee}"))
    }

    fn narrowed_block(&mut self, n: &Narrowing, body: &[HirStmt]) -> Result<()> {
        let ident = rust_ident(&n.name);
        let code = if self.ctx.is_mutable(&n.name) {
            ident
        } else {
            format!("(*{ident})")
        };
        self.ctx.push_scope();
        self.ctx.declare(
            &n.name,
            Binding {
                code,
                ty: n.ty.clone(),
                form: Form::Place,
            },
        );
        let result = self.emit_block(body);
        self.ctx.pop_scope();
        result
    }

    // --- ループ ---

    /// ループのラベル (本体に try があるときだけ)
    fn loop_label(&mut self, body: &[HirStmt]) -> Option<String> {
        let mut has_try = false;
        visit::walk_stmts(body, &mut |s| {
            if matches!(s.kind, HirStmtKind::Try { .. }) {
                has_try = true;
            }
        });
        has_try.then(|| self.ctx.fresh("l"))
    }

    fn enter_loop(&mut self, label: Option<String>) -> Result<()> {
        let frame = self.ctx.frame_mut()?;
        frame.loop_depth += 1;
        frame.loop_labels.push(label);
        Ok(())
    }

    fn leave_loop(&mut self) -> Result<()> {
        let frame = self.ctx.frame_mut()?;
        frame.loop_depth = frame.loop_depth.saturating_sub(1);
        frame.loop_labels.pop();
        Ok(())
    }

    fn loop_body(&mut self, header: String, label: Option<String>, body: &[HirStmt], prelude: impl FnOnce(&mut Self)) -> Result<()> {
        let header = match &label {
            Some(l) => format!("'{l}: {header}"),
            None => header,
        };
        self.open(header);
        self.enter_loop(label)?;
        self.ctx.push_scope();
        prelude(self);
        let result = self.emit_block(body);
        self.ctx.pop_scope();
        self.leave_loop()?;
        result?;
        self.close();
        Ok(())
    }

    fn emit_while(&mut self, test: &HirExpr, body: &[HirStmt]) -> Result<()> {
        let label = self.loop_label(body);
        let header = match test.kind {
            HirExprKind::Bool(true) => "loop".to_string(),
            _ => format!("while {}", self.cond(test)?),
        };
        self.loop_body(header, label, body, |_| {})
    }

    fn emit_for(&mut self, target: &Pattern, iter: &HirExpr, body: &[HirStmt], pos: SourcePos) -> Result<()> {
        let label = self.loop_label(body);
        let mutations = collect_mutations(body, &[]);
        let reassigned: BTreeSet<String> = target
            .names()
            .into_iter()
            .filter(|n| mutations.reassigned.contains(*n) || mutations.mutated.contains(*n))
            .map(str::to_string)
            .collect();
        let root_mutated = root_name(iter).map_or(false, |r| mutations.all().contains(r));

        // `for x in (1, 2, 3)` はリストとして回す
        let iter_owned;
        let iter = match &iter.kind {
            HirExprKind::Tuple(items) => {
                let elem = items.iter().fold(Type::Unknown, |acc, i| join(&acc, &i.ty));
                iter_owned = HirExpr::typed(HirExprKind::List(items.clone()), Type::list(elem), pos);
                &iter_owned
            }
            _ => iter,
        };
        let src = self.expr(iter)?;
        let elem = crate::semantic::iter_element(&src.ty);
        let by_ref_ok = reassigned.is_empty() && !root_mutated;
        let (source, by_ref) = match (src.form, src.ty.unwrap_optional()) {
            (Form::Iter, _) => (src.code.clone(), false),
            (_, Type::Str | Type::Bytes | Type::Native(_)) => (src.iter_owned(), false),
            (Form::Place | Form::Borrowed | Form::BorrowedMut, Type::Dict(_, _)) if by_ref_ok => {
                (format!("{}.keys()", src.atom()), true)
            }
            (_, Type::Dict(_, _)) if root_mutated => (
                format!("{}.keys().cloned().collect::<Vec<_>>()", src.atom()),
                false,
            ),
            (_, Type::Dict(_, _)) => (src.iter_owned(), false),
            (Form::Owned, _) => (src.code.clone(), false),
            (_, Type::List(_) | Type::Set(_)) if by_ref_ok => (format!("{}.iter()", src.atom()), true),
            // 本体で元の容器が変わるならコピーを回す
            _ if root_mutated => (src.into_owned(), false),
            _ => (src.iter_owned(), false),
        };
        // 外で宣言済みのループ変数はループ後も最後の値を持つ
        let carried: BTreeSet<String> = target
            .names()
            .into_iter()
            .filter(|n| self.is_plain_local(n))
            .map(str::to_string)
            .collect();
        let pattern = carried_pattern(target, &reassigned, &carried);
        let header = format!("for {pattern} in {source}");
        self.loop_body(header, label, body, |e| {
            e.bind_pattern(target, &elem, by_ref);
            e.store_carried(target, &elem, by_ref, &carried);
        })
    }

    /// 関数のローカルとして宣言済み (引数・グローバルではない)
    fn is_plain_local(&self, name: &str) -> bool {
        self.local_ty(name).is_some()
            && self
                .ctx
                .lookup(name)
                .map_or(false, |b| b.form == Form::Place && b.code == rust_ident(name))
    }

    /// `_x_item` で受けた値を外の `x` に入れ、本体の `x` を外の変数に向ける
    fn store_carried(&mut self, pat: &Pattern, ty: &Type, by_ref: bool, carried: &BTreeSet<String>) {
        match pat {
            Pattern::Name(n) if carried.contains(n) => {
                let ident = rust_ident(n);
                let item = format!("_{ident}_item");
                let value = match (by_ref, ty.is_copy()) {
                    (true, true) => format!("*{item}"),
                    (true, false) => format!("{item}.clone()"),
                    (false, _) => item,
                };
                self.line(format!("{ident} = {value};"));
                self.ctx.declare(
                    n,
                    Binding {
                        code: ident,
                        ty: ty.clone(),
                        form: Form::Place,
                    },
                );
            }
            Pattern::Tuple(items) => {
                let tys = match ty {
                    Type::Tuple(ts) if ts.len() == items.len() => ts.clone(),
                    _ => vec![Type::Unknown; items.len()],
                };
                for (p, t) in items.iter().zip(&tys) {
                    self.store_carried(p, t, by_ref, carried);
                }
            }
            _ => {}
        }
    }

    /// `break` / `continue` (囲む try の後始末を先に走らせる)
    fn emit_loop_exit(&mut self, is_break: bool) -> Result<()> {
        let (label, jump) = match self.ctx.frame() {
            Some(f) => (
                f.loop_labels.last().cloned().flatten(),
                f.gen_loops
                    .iter()
                    .rev()
                    .find(|(depth, _, _)| *depth == f.loop_depth)
                    .map(|(_, brk, cont)| if is_break { brk.clone() } else { cont.clone() }),
            ),
            None => (None, None),
        };
        for c in self.ctx.cleanups_for_loop_exit() {
            self.line(format!("{c};"));
        }
        // 状態機械のループは状態の遷移で抜ける
        if let Some(stmt) = jump {
            self.line(stmt);
            return Ok(());
        }
        let keyword = if is_break { "break" } else { "continue" };
        match label {
            Some(l) => self.line(format!("{keyword} '{l};")),
            None => self.line(format!("{keyword};")),
        }
        Ok(())
    }

    // --- return ---

    /// 返す式 (`Ok(..)` 込み)。値のない return で unit なら空文字列
    fn return_value(&mut self, value: Option<&HirExpr>) -> Result<String> {
        let (ret, can_fail) = self
            .ctx
            .frame()
            .map_or((Type::None, false), |f| (f.ret.clone(), f.can_fail));
        let code = match value {
            Some(v) if !(v.is_none_literal() && ret == Type::None) => {
                let val = self.expr(v)?;
                if ret.contains_unknown() {
                    val.into_owned()
                } else {
                    self.coerce(val, &ret)?
                }
            }
            _ => match ret {
                Type::Optional(_) => "None".to_string(),
                _ => String::new(),
            },
        };
        Ok(match (can_fail, code.is_empty()) {
            (true, true) => "Ok(())".to_string(),
            (true, false) => format!("Ok({code})"),
            (false, _) => code,
        })
    }

    fn emit_return(&mut self, value: Option<&HirExpr>) -> Result<()> {
        let (gen_return, init_return, can_fail) = match self.ctx.frame() {
            Some(f) => (f.gen_return.clone(), f.init_return.clone(), f.can_fail),
            None => (None, None, false),
        };
        if let Some(stmt) = gen_return {
            self.line(stmt);
            return Ok(());
        }
        let code = match init_return {
            Some(r) if can_fail => format!("Ok({r})"),
            Some(r) => r,
            None => self.return_value(value)?,
        };
        let cleanups = self.ctx.cleanups_for_return();
        if cleanups.is_empty() {
            if code.is_empty() {
                self.line("return;");
            } else {
                self.line(format!("return {code};"));
            }
            return Ok(());
        }
        if code.is_empty() {
            for c in cleanups {
                self.line(format!("{c};"));
            }
            self.line("return;");
        } else {
            self.line(format!("let _ret = {code};"));
            for c in cleanups {
                self.line(format!("{c};"));
            }
            self.line("return _ret;");
        }
        Ok(())
    }
}

fn in_place_int(op: HirBinOp) -> bool {
    matches!(
        op,
        HirBinOp::Add
            | HirBinOp::Sub
            | HirBinOp::Mul
            | HirBinOp::BitAnd
            | HirBinOp::BitOr
            | HirBinOp::BitXor
            | HirBinOp::LShift
            | HirBinOp::RShift
    )
}

/// 遅延イテレータのまま束縛してよい値 (`iter(...)`、ジェネレータ)
pub(super) fn keeps_lazy(value: &HirExpr, emitter: &RustEmitter<'_>) -> bool {
    match &value.kind {
        HirExprKind::Call { func, .. } if func == "iter" => true,
        HirExprKind::Call { func, .. } => emitter.ctx.lookup_fn(func).map_or(false, |s| s.generator),
        HirExprKind::Comprehension(c) => matches!(c.kind, ComprehensionKind::Generator),
        _ => false,
    }
}

/// ループの束縛パターン (外へ持ち出す名前は `_x_item` で受ける)
fn carried_pattern(pat: &Pattern, muts: &BTreeSet<String>, carried: &BTreeSet<String>) -> String {
    match pat {
        Pattern::Name(n) if carried.contains(n) => format!("_{}_item", rust_ident(n)),
        Pattern::Tuple(items) if pat.names().iter().any(|n| carried.contains(*n)) => {
            let inner: Vec<String> = items
                .iter()
                .map(|p| carried_pattern(p, muts, carried))
                .collect();
            if inner.len() == 1 {
                format!("({},)", inner[0])
            } else {
                format!("({})", inner.join(", "))
            }
        }
        _ => mut_pattern(pat, muts),
    }
}

/// `(mut a, b)`
fn mut_pattern(pat: &Pattern, muts: &BTreeSet<String>) -> String {
    match pat {
        Pattern::Name(n) if muts.contains(n) => format!("mut {}", rust_ident(n)),
        Pattern::Tuple(items) if pat.names().iter().any(|n| muts.contains(*n)) => {
            let inner: Vec<String> = items.iter().map(|p| mut_pattern(p, muts)).collect();
            if inner.len() == 1 {
                format!("({},)", inner[0])
            } else {
                format!("({})", inner.join(", "))
            }
        }
        _ => pattern_code(pat),
    }
}

// --- 巻き上げ ---

/// Names that must be declared before the block they are first bound in
pub(super) fn hoisted_names(stmts: &[HirStmt]) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect_hoisted(stmts, &BTreeSet::new(), &mut out);
    visit::walk_stmt_exprs(stmts, &mut |e| {
        if let HirExprKind::NamedExpr { target, .. } = &e.kind {
            out.insert(target.clone());
        }
    });
    out
}

fn collect_hoisted(stmts: &[HirStmt], outer: &BTreeSet<String>, out: &mut BTreeSet<String>) {
    let mut bound = outer.clone();
    for (i, stmt) in stmts.iter().enumerate() {
        let blocks = visit::stmt_blocks(stmt);
        if !blocks.is_empty() {
            let mut inner = BTreeSet::new();
            for block in &blocks {
                bound_in_block(block, &mut inner);
            }
            for name in inner.difference(&bound) {
                let used_elsewhere = stmts
                    .iter()
                    .enumerate()
                    .any(|(j, s)| j != i && mentions(s, name));
                if used_elsewhere {
                    out.insert(name.clone());
                }
            }
            for block in blocks {
                collect_hoisted(block, &bound, out);
            }
        }
        // ループ後に読まれるループ変数
        if let HirStmtKind::For { target, .. } = &stmt.kind {
            for name in target.names() {
                if !bound.contains(name) && read_after(&stmts[i + 1..], name) {
                    out.insert(name.to_string());
                }
            }
        }
        bound_directly(stmt, &mut bound);
    }
}

pub(super) fn target_names(target: &AssignTarget, out: &mut BTreeSet<String>) {
    match target {
        AssignTarget::Name(n) => {
            out.insert(n.clone());
        }
        AssignTarget::Tuple(items) => items.iter().for_each(|t| target_names(t, out)),
        _ => {}
    }
}

/// 文そのものが束縛する名前
fn bound_directly(stmt: &HirStmt, out: &mut BTreeSet<String>) {
    if let HirStmtKind::Assign { target, .. } = &stmt.kind {
        target_names(target, out);
    }
}

/// 入れ子のブロックで束縛される名前 (ループ変数と except の名前は除く)
fn bound_in_block(block: &[HirStmt], out: &mut BTreeSet<String>) {
    visit::walk_stmts(block, &mut |s| match &s.kind {
        HirStmtKind::Assign { target, .. } => target_names(target, out),
        HirStmtKind::With {
            binding: Some(b), ..
        } => {
            out.insert(b.clone());
        }
        _ => {}
    });
}

/// `name` を読む文があるか (同じ名前を束縛し直す for の本体は除く)
fn read_after(stmts: &[HirStmt], name: &str) -> bool {
    stmts.iter().any(|stmt| {
        if let HirStmtKind::For { target, iter, .. } = &stmt.kind {
            if target.names().contains(&name) {
                let mut found = false;
                visit::walk_expr(iter, &mut |e| found |= e.as_name() == Some(name));
                return found;
            }
        }
        let mut found = false;
        visit::walk_stmt_exprs(std::slice::from_ref(stmt), &mut |e| {
            found |= e.as_name() == Some(name);
        });
        found
    })
}

fn mentions(stmt: &HirStmt, name: &str) -> bool {
    let mut found = false;
    visit::walk_stmts(std::slice::from_ref(stmt), &mut |s| {
        match &s.kind {
            HirStmtKind::Assign { target, .. } | HirStmtKind::AugAssign { target, .. } => {
                let mut names = BTreeSet::new();
                target_names(target, &mut names);
                if names.contains(name) {
                    found = true;
                }
            }
            HirStmtKind::For { target, .. } if target.names().contains(&name) => found = true,
            _ => {}
        }
        for e in visit::stmt_exprs(s) {
            visit::walk_expr(e, &mut |e| {
                if e.as_name() == Some(name) {
                    found = true;
                }
            });
        }
    });
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pos() -> SourcePos {
        SourcePos::unknown()
    }

    fn assign(name: &str, value: i64) -> HirStmt {
        HirStmt::new(
            HirStmtKind::Assign {
                target: AssignTarget::Name(name.into()),
                value: HirExpr::typed(
                    HirExprKind::Int {
                        value,
                        text: value.to_string(),
                    },
                    Type::Int,
                    pos(),
                ),
                annotation: None,
            },
            pos(),
        )
    }

    fn use_name(name: &str) -> HirStmt {
        HirStmt::new(HirStmtKind::Expr(HirExpr::name(name, pos())), pos())
    }

    fn if_stmt(body: Vec<HirStmt>, orelse: Vec<HirStmt>) -> HirStmt {
        HirStmt::new(
            HirStmtKind::If {
                test: HirExpr::typed(HirExprKind::Bool(true), Type::Bool, pos()),
                body,
                orelse,
            },
            pos(),
        )
    }

    #[test]
    fn test_name_bound_in_branch_and_used_after_is_hoisted() {
        let stmts = vec![
            if_stmt(vec![assign("y", 1)], vec![assign("y", 2)]),
            use_name("y"),
        ];
        let hoisted: Vec<String> = hoisted_names(&stmts).into_iter().collect();
        assert_eq!(hoisted, vec!["y".to_string()]);
    }

    #[test]
    fn test_branch_local_name_is_not_hoisted() {
        let stmts = vec![if_stmt(vec![assign("t", 1), use_name("t")], vec![])];
        assert!(hoisted_names(&stmts).is_empty());
    }

    #[test]
    fn test_name_bound_before_block_is_not_hoisted() {
        let stmts = vec![
            assign("x", 0),
            if_stmt(vec![assign("x", 1)], vec![]),
            use_name("x"),
        ];
        assert!(hoisted_names(&stmts).is_empty());
    }

    #[test]
    fn test_mut_pattern() {
        let pat = Pattern::Tuple(vec![Pattern::Name("i".into()), Pattern::Name("x".into())]);
        let mut muts = BTreeSet::new();
        assert_eq!(mut_pattern(&pat, &muts), "(i, x)");
        muts.insert("x".to_string());
        assert_eq!(mut_pattern(&pat, &muts), "(i, mut x)");
    }
}
