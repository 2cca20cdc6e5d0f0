//! try / raise / with
//!
//! `try` 本体はラベル付きブロックにして、送出は `break 'label Some(err)` で抜ける。
//! ハンドラは `DynError::is::<T>()` で型を見て選ぶ。
//!
//! ```text
//! let _try0: Option<DynError> = '_try0: { body; None };
//! if let Some(_e1) = _try0 {
//!     if _e1.is::<ValueError>() { handler } else { <re-raise> }
//! } else { orelse }
//! finally
//! ```

use super::context::{Binding, Cleanup, ParamSig, TryScope};
use super::value::Form;
use super::RustEmitter;
use crate::error::{DepylerError, Result};
use crate::hir::visit;
use crate::hir::*;
use crate::semantic::Type;
use crate::stdlib::ErrorTaxon;
use std::collections::BTreeSet;

impl RustEmitter<'_> {
    pub(super) fn emit_raise(&mut self, exc: Option<&HirExpr>, _cause: Option<&HirExpr>, pos: SourcePos) -> Result<()> {
        let Some(exc) = exc else {
            let held = self.ctx.frame().and_then(|f| f.held_errors.last().cloned());
            let Some(held) = held else {
                return Err(DepylerError::unsupported(pos, "bare raise outside an except block"));
            };
            let stmt = self.ctx.raise_boxed(&held);
            self.fail_stmt(stmt);
            return Ok(());
        };
        let err = self.raised_error(exc)?;
        let stmt = self.ctx.raise_boxed(&err);
        self.fail_stmt(stmt);
        Ok(())
    }

    /// Boxed error value for a `raise` operand
    fn raised_error(&mut self, exc: &HirExpr) -> Result<String> {
        if let Some(n) = exc.as_name() {
            // `raise e` (ハンドラで捕まえた例外)
            if let Some(b) = self.ctx.lookup(n) {
                if matches!(&b.ty, Type::Native(t) if t == "DynError") {
                    return Ok(b.code.clone());
                }
            }
            // `raise ValueError`
            let is_exception = self.ctx.hierarchy.is_user_exception(n)
                || (!self.ctx.is_declared(n) && ErrorTaxon::is_builtin_exception(n));
            if is_exception {
                return Ok(self.exception_value(n, &[])?.code);
            }
        }
        let v = self.expr(exc)?;
        match &v.ty {
            Type::Native(t) if t == "DynError" => Ok(v.into_owned()),
            _ => {
                let err = self.ctx.dyn_error();
                Ok(format!("{err}::from({})", v.into_owned()))
            }
        }
    }

    /// `fail_path` の結果を文として出す
    fn fail_stmt(&mut self, stmt: String) {
        if stmt.starts_with('{') {
            self.line(stmt);
        } else {
            self.line(format!("{stmt};"));
        }
    }

    pub(super) fn emit_try(
        &mut self,
        body: &[HirStmt],
        handlers: &[ExceptClause],
        orelse: &[HirStmt],
        finalbody: &[HirStmt],
    ) -> Result<()> {
        let cleanup = if finalbody.is_empty() {
            false
        } else {
            let lines = self.capture(|e| e.scoped_block(finalbody))?;
            let frame = self.ctx.frame_mut()?;
            let cleanup = Cleanup {
                lines: vec![format!("{{ {} }}", lines.iter().map(|l| l.trim()).collect::<Vec<_>>().join(" "))],
                loop_depth: frame.loop_depth,
                try_depth: frame.tries.len(),
            };
            frame.cleanups.push(cleanup);
            true
        };

        let result = if handlers.is_empty() {
            self.open("");
            let r = self.scoped_block(body).and_then(|_| self.scoped_block(orelse));
            self.close();
            r
        } else {
            self.emit_guarded(body, handlers, orelse)
        };

        if cleanup {
            if let Ok(frame) = self.ctx.frame_mut() {
                frame.cleanups.pop();
            }
        }
        result?;
        self.scoped_block(finalbody)?;
        // 本体と全ハンドラが return するなら後続には来ない
        let in_generator = self.ctx.frame().map_or(false, |f| f.gen_return.is_some());
        if !handlers.is_empty()
            && !in_generator
            && !visit::always_returns(finalbody)
            && visit::always_returns(body)
            && handlers.iter().all(|h| visit::always_returns(&h.body))
        {
            self.line("unreachable!();");
        }
        Ok(())
    }

    fn emit_guarded(&mut self, body: &[HirStmt], handlers: &[ExceptClause], orelse: &[HirStmt]) -> Result<()> {
        let err_ty = self.ctx.dyn_error();
        let label = self.ctx.fresh("try");
        let caught = self.caught_set(handlers);
        self.ctx.frame_mut()?.tries.push(TryScope {
            label: label.clone(),
            caught,
        });

        self.open(format!("let {label}: Option<{err_ty}> = '{label}:"));
        let body_result = self.scoped_block(body);
        if body_result.is_ok() {
            self.line("None");
        }
        self.close_with(";");
        if let Ok(frame) = self.ctx.frame_mut() {
            frame.tries.pop();
        }
        body_result?;

        let err = self.ctx.fresh("e");
        self.open(format!("if let Some({err}) = {label}"));
        let mut opened = false;
        let mut exhaustive = false;
        for h in handlers {
            let test = self.handler_test(h, &err);
            match (&test, opened) {
                (None, false) => {}
                (None, true) => self.reopen("else"),
                (Some(t), false) => {
                    self.open(format!("if {t}"));
                    opened = true;
                }
                (Some(t), true) => self.reopen(&format!("else if {t}")),
            }
            self.emit_handler(h, &err)?;
            if test.is_none() {
                exhaustive = true;
                break;
            }
        }
        if !exhaustive {
            // どのハンドラにも合わなければ外へ送り直す
            self.reopen("else");
            let stmt = self.ctx.raise_boxed(&err);
            self.fail_stmt(stmt);
        }
        if opened {
            self.close();
        }
        if orelse.is_empty() {
            self.close();
        } else {
            self.reopen("else");
            self.scoped_block(orelse)?;
            self.close();
        }
        Ok(())
    }

    /// 型の判定式。全部捕まえるハンドラなら `None`
    fn handler_test(&mut self, h: &ExceptClause, err: &str) -> Option<String> {
        if h.types.is_empty() {
            return None;
        }
        let mut tys = BTreeSet::new();
        for t in &h.types {
            match self.ctx.hierarchy.caught_types(t) {
                None => return None,
                Some(list) => tys.extend(list),
            }
        }
        let checks: Vec<String> = tys
            .into_iter()
            .map(|t| {
                self.ctx.error_types.insert(t.clone());
                format!("{err}.is::<{t}>()")
            })
            .collect();
        if checks.is_empty() {
            return Some("false".to_string());
        }
        Some(checks.join(" || "))
    }

    fn emit_handler(&mut self, h: &ExceptClause, err: &str) -> Result<()> {
        self.ctx.push_scope();
        let held = match &h.name {
            Some(name) => {
                let ident = super::context::rust_ident(name);
                self.line(format!("let {ident} = {err};"));
                self.ctx.declare(
                    name,
                    Binding {
                        code: ident.clone(),
                        ty: Type::Native("DynError".to_string()),
                        form: Form::Place,
                    },
                );
                ident
            }
            None => err.to_string(),
        };
        self.ctx.frame_mut()?.held_errors.push(held);
        let result = self.emit_block(&h.body);
        if let Ok(frame) = self.ctx.frame_mut() {
            frame.held_errors.pop();
        }
        self.ctx.pop_scope();
        result
    }

    /// 囲む try が捕まえる型の集合 (`None` は全部)
    fn caught_set(&mut self, handlers: &[ExceptClause]) -> Option<BTreeSet<String>> {
        let mut out = BTreeSet::new();
        for h in handlers {
            if h.types.is_empty() {
                return None;
            }
            for t in &h.types {
                out.extend(self.ctx.hierarchy.caught_types(t)?);
            }
        }
        Some(out)
    }

    // --- with ---

    pub(super) fn emit_with(&mut self, context: &HirExpr, binding: Option<&str>, body: &[HirStmt]) -> Result<()> {
        if let Type::Class(class) = &context.ty {
            if self.ctx.find_method(class, "__enter__").is_some() {
                let class = class.clone();
                return self.emit_context_manager(&class, context, binding, body);
            }
        }
        let v = self.expr(context)?;
        self.open("");
        self.ctx.push_scope();
        match binding {
            Some(name) => {
                let ident = super::context::rust_ident(name);
                self.line(format!("let mut {ident} = {};", v.into_owned()));
                self.ctx.declare_local(name, v.ty.clone(), Form::Place);
            }
            None => {
                let tmp = self.ctx.fresh("ctx");
                self.line(format!("let {tmp} = {};", v.into_owned()));
            }
        }
        let result = self.emit_block(body);
        self.ctx.pop_scope();
        result?;
        self.close();
        Ok(())
    }

    /// `__enter__` / `__exit__` を持つユーザクラス
    fn emit_context_manager(
        &mut self,
        class: &str,
        context: &HirExpr,
        binding: Option<&str>,
        body: &[HirStmt],
    ) -> Result<()> {
        let v = self.expr(context)?;
        let tmp = self.ctx.fresh("ctx");
        self.open("");
        self.ctx.push_scope();
        self.line(format!("let mut {tmp} = {};", v.into_owned()));

        let enter = self.ctx.find_method(class, "__enter__").map(|(p, s)| (p, s.clone()));
        if let Some((path, sig)) = enter {
            let call = format!("{tmp}{path}.{}()", sig.rust_name);
            let call = if sig.can_fail { self.ctx.unwrap_fallible(&call) } else { call };
            match binding {
                // `return self` なら同じ値を指す
                Some(name) if sig.ret == Type::Class(class.to_string()) => {
                    self.line(format!("{call};"));
                    self.ctx.declare(
                        name,
                        Binding {
                            code: tmp.clone(),
                            ty: sig.ret.clone(),
                            form: Form::Place,
                        },
                    );
                }
                Some(name) => {
                    let ident = super::context::rust_ident(name);
                    self.line(format!("let mut {ident} = {call};"));
                    self.ctx.declare_local(name, sig.ret.clone(), Form::Place);
                }
                None => self.line(format!("{call};")),
            }
        }

        let exit = self.ctx.find_method(class, "__exit__").map(|(p, s)| (p, s.clone()));
        let exit_call = exit.map(|(path, sig)| {
            let nones: Vec<String> = sig.params.iter().map(exit_none).collect();
            format!("let _ = {tmp}{path}.{}({})", sig.rust_name, nones.join(", "))
        });
        if let Some(call) = &exit_call {
            let frame = self.ctx.frame_mut()?;
            let cleanup = Cleanup {
                lines: vec![format!("{{ {call}; }}")],
                loop_depth: frame.loop_depth,
                try_depth: frame.tries.len(),
            };
            frame.cleanups.push(cleanup);
        }
        let result = self.emit_block(body);
        if exit_call.is_some() {
            if let Ok(frame) = self.ctx.frame_mut() {
                frame.cleanups.pop();
            }
        }
        self.ctx.pop_scope();
        result?;
        if let Some(call) = exit_call {
            self.line(format!("{call};"));
        }
        self.close();
        Ok(())
    }
}

/// 正常終了時に `__exit__` の各引数へ渡す `None`
///
/// 注釈のない引数はジェネリクスになるので `()` で型を決める。
fn exit_none(param: &ParamSig) -> String {
    let none = match &param.ty {
        Type::Optional(_) => "None",
        _ => "None::<()>",
    };
    match param.passing() {
        ParamMode::Borrow => format!("&{none}"),
        ParamMode::BorrowMut => format!("&mut {none}"),
        ParamMode::ByValue => none.to_string(),
    }
}
