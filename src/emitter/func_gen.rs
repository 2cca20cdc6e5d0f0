//! Function items (C7)
//!
//! シグネチャは推論済みの受け渡し方 (`ParamSig::passing`) に従う。
//! 例外が漏れる関数は `Result<T, DynError>` を返す。

use super::context::{rust_ident, Binding, FnSig, Frame};
use super::value::Form;
use super::RustEmitter;
use crate::error::{DepylerError, Result};
use crate::hir::visit;
use crate::hir::*;
use crate::semantic::{MapMode, Type};
use std::collections::BTreeSet;
use tracing::trace;

impl RustEmitter<'_> {
    /// Top-level function, or a method when `class` is given
    pub(super) fn emit_function(&mut self, f: &HirFunction, class: Option<&HirClass>) -> Result<()> {
        let vis = if class.is_some() { "pub " } else { self.item_vis() };
        self.fn_item(f, class, vis)
    }

    fn fn_item(&mut self, f: &HirFunction, class: Option<&HirClass>, vis: &str) -> Result<()> {
        if f.attrs.generator && f.attrs.is_async {
            return Err(DepylerError::unsupported(f.pos, "async generator"));
        }
        trace!(function = %f.name, "emit function");
        self.emit_fn_docs(f);

        let sig = FnSig::from_function(f);
        let name = match &f.attrs.setter_of {
            Some(prop) => format!("set_{}", rust_ident(prop)),
            None => rust_ident(&f.name),
        };
        let generics = generic_params(f);
        let mut params = Vec::new();
        if let Some(receiver) = receiver(f) {
            params.push(receiver.to_string());
        }
        params.extend(self.param_decls(f, &sig)?);
        let ret = self.fn_return(f)?;
        let asyncness = if f.attrs.is_async { "async " } else { "" };
        self.open(format!(
            "{vis}{asyncness}fn {name}{generics}({}){ret}",
            params.join(", ")
        ));

        let mut frame = Frame::function(f.ret.clone(), f.attrs.can_fail && !f.attrs.generator);
        frame.mutable = f.mutable_vars.clone();
        frame.generator = f.attrs.generator;
        frame.is_async = f.attrs.is_async;
        frame.class = class.map(|c| c.name.clone());
        self.enter_frame(frame, f.locals.clone());
        let result = self
            .declare_params(f, &sig, class)
            .and_then(|_| {
                if f.attrs.generator {
                    self.emit_generator_body(f)
                } else {
                    self.emit_function_body(f)
                }
            });
        self.leave_frame();
        result?;
        self.close();
        Ok(())
    }

    /// `name: T` for each value parameter
    pub(super) fn param_decls(&mut self, f: &HirFunction, sig: &FnSig) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for (p, ps) in f.value_params().iter().zip(&sig.params) {
            let mode = match ps.passing() {
                ParamMode::ByValue => MapMode::Owned,
                ParamMode::Borrow => MapMode::BorrowShared,
                ParamMode::BorrowMut => MapMode::BorrowMut,
            };
            let ty = self.ctx.rust_type(&p.ty, mode, p.pos)?;
            let rebound = p.rebound || f.mutable_vars.contains(&p.name);
            let mutable = if rebound && ps.passing() == ParamMode::ByValue { "mut " } else { "" };
            out.push(format!("{mutable}{}: {ty}", rust_ident(&p.name)));
        }
        Ok(out)
    }

    /// `/// docstring` と検証済みの性質
    fn emit_fn_docs(&mut self, f: &HirFunction) {
        if !self.options.emit_docs {
            return;
        }
        if let Some(doc) = &f.docstring {
            self.emit_doc_lines(doc);
        }
        if f.attrs.panic_free {
            self.line("/// Depyler: verified panic-free");
        }
        if f.attrs.terminating {
            self.line("/// Depyler: proven to terminate");
        }
    }

    pub(super) fn emit_doc_lines(&mut self, doc: &str) {
        for l in doc.trim().lines() {
            let l = l.trim();
            if l.is_empty() {
                self.line("///");
            } else {
                self.line(format!("/// {l}"));
            }
        }
    }

    /// ` -> T` (失敗しうるなら `Result`、ジェネレータは `impl Iterator`)
    fn fn_return(&mut self, f: &HirFunction) -> Result<String> {
        if f.attrs.generator {
            let elem = f.ret.element();
            let item = self.ctx.rust_type(&elem, MapMode::Owned, f.pos)?;
            let lifetime = if f.method == Some(MethodKind::Instance) { " + '_" } else { "" };
            return Ok(format!(" -> impl Iterator<Item = {item}>{lifetime}"));
        }
        let ty = self.ctx.rust_type(&f.ret, MapMode::ReturnPosition, f.pos)?;
        if f.attrs.can_fail {
            let err = self.ctx.dyn_error();
            return Ok(format!(" -> Result<{ty}, {err}>"));
        }
        if f.ret == Type::None {
            return Ok(String::new());
        }
        Ok(format!(" -> {ty}"))
    }

    pub(super) fn declare_params(&mut self, f: &HirFunction, sig: &FnSig, class: Option<&HirClass>) -> Result<()> {
        if let (Some(c), Some(first)) = (class, f.params.first()) {
            match f.method {
                Some(MethodKind::Instance) => self.ctx.declare(
                    &first.name,
                    Binding {
                        code: "self".to_string(),
                        ty: Type::Class(c.name.clone()),
                        form: Form::Place,
                    },
                ),
                Some(MethodKind::Class) => self.ctx.declare(
                    &first.name,
                    Binding {
                        code: "Self".to_string(),
                        ty: Type::Class(c.name.clone()),
                        form: Form::Place,
                    },
                ),
                _ => {}
            }
        }
        for ps in &sig.params {
            let form = match ps.passing() {
                ParamMode::ByValue => Form::Place,
                ParamMode::Borrow => Form::Borrowed,
                ParamMode::BorrowMut => Form::BorrowedMut,
            };
            self.ctx.declare_local(&ps.name, ps.ty.clone(), form);
        }
        Ok(())
    }

    /// 本体と、落ちて終わるときの末尾値
    fn emit_function_body(&mut self, f: &HirFunction) -> Result<()> {
        self.emit_body(&f.body)?;
        if visit::always_returns(&f.body) {
            return Ok(());
        }
        if let Some(tail) = fallthrough_value(&f.ret, f.attrs.can_fail) {
            self.line(tail);
        }
        Ok(())
    }

    // --- 入れ子の関数 ---

    /// `def` inside a function body
    ///
    /// 外側の変数を参照しなければ入れ子の `fn` 項目、参照するならクロージャ。
    pub(super) fn emit_nested_function(&mut self, f: &HirFunction) -> Result<()> {
        let captures = self.captured_names(f);
        if captures.is_empty() {
            self.ctx
                .frame_mut()?
                .fns
                .insert(f.name.clone(), FnSig::from_function(f));
            return self.fn_item(f, None, "");
        }
        if f.attrs.generator || f.attrs.is_async {
            return Err(DepylerError::unsupported(
                f.pos,
                format!("nested {} '{}' capturing outer variables", kind_name(f), f.name),
            ));
        }
        trace!(function = %f.name, captures = captures.len(), "emit closure");
        self.emit_closure(f)
    }

    fn emit_closure(&mut self, f: &HirFunction) -> Result<()> {
        let ident = rust_ident(&f.name);
        let mut params = Vec::new();
        let mut param_tys = Vec::new();
        for p in &f.params {
            let ty = self.ctx.rust_type(&p.ty, MapMode::Owned, p.pos)?;
            let mutable = if p.rebound || f.mutable_vars.contains(&p.name) { "mut " } else { "" };
            params.push(format!("{mutable}{}: {ty}", rust_ident(&p.name)));
            param_tys.push(p.ty.clone());
        }
        let ret_ty = self.ctx.rust_type(&f.ret, MapMode::ReturnPosition, f.pos)?;
        let callable = Type::Callable {
            params: param_tys,
            ret: Box::new(f.ret.clone()),
        };
        // 関数の外へ返るクロージャは Box に入れて所有させる
        let escapes = self
            .ctx
            .frame()
            .map_or(false, |fr| matches!(fr.ret, Type::Callable { .. }));
        let header = if escapes {
            let boxed = self.ctx.rust_type(&callable, MapMode::Owned, f.pos)?;
            format!("let {ident}: {boxed} = Box::new(move |{}| -> {ret_ty}", params.join(", "))
        } else {
            format!("let {ident} = |{}| -> {ret_ty}", params.join(", "))
        };
        self.open(header);

        let mut frame = Frame::closure(f.ret.clone());
        frame.mutable = f.mutable_vars.clone();
        self.enter_frame(frame, f.locals.clone());
        for p in &f.params {
            self.ctx.declare_local(&p.name, p.ty.clone(), Form::Place);
        }
        let result = self.emit_body(&f.body).map(|_| {
            if !visit::always_returns(&f.body) {
                if let Some(tail) = fallthrough_value(&f.ret, false) {
                    self.line(tail);
                }
            }
        });
        self.leave_frame();
        result?;
        self.close_with(if escapes { ");" } else { ";" });
        self.ctx.declare_local(&f.name, callable, Form::Place);
        Ok(())
    }

    /// 入れ子の関数が読む外側のローカル
    fn captured_names(&self, f: &HirFunction) -> BTreeSet<String> {
        let own: BTreeSet<&str> = f
            .params
            .iter()
            .map(|p| p.name.as_str())
            .chain(f.locals.keys().map(String::as_str))
            .collect();
        let mut out = BTreeSet::new();
        let mut check = |n: &str| {
            if own.contains(n) || self.ctx.globals.contains_key(n) {
                return;
            }
            if self.ctx.lookup(n).map_or(false, |b| b.code != "Self") {
                out.insert(n.to_string());
            }
        };
        visit::walk_stmt_exprs(&f.body, &mut |e| {
            if let HirExprKind::Name(n) = &e.kind {
                check(n);
            }
        });
        for p in &f.params {
            if let Some(d) = &p.default {
                visit::walk_expr(d, &mut |e| {
                    if let HirExprKind::Name(n) = &e.kind {
                        check(n);
                    }
                });
            }
        }
        out
    }
}

/// `&self` / `&mut self` (static / classmethod はなし)
fn receiver(f: &HirFunction) -> Option<&'static str> {
    match f.method {
        Some(MethodKind::Instance) if f.attrs.self_mut || f.attrs.setter_of.is_some() => Some("&mut self"),
        Some(MethodKind::Instance) => Some("&self"),
        _ => None,
    }
}

/// `<T: Clone + PartialOrd>`
fn generic_params(f: &HirFunction) -> String {
    if f.generic_bounds.is_empty() {
        return String::new();
    }
    let params: Vec<String> = f
        .generic_bounds
        .iter()
        .map(|(name, bounds)| {
            if bounds.is_empty() {
                name.clone()
            } else {
                let b: Vec<&str> = bounds.iter().map(String::as_str).collect();
                format!("{name}: {}", b.join(" + "))
            }
        })
        .collect();
    format!("<{}>", params.join(", "))
}

/// 本体が最後まで流れたときの値
fn fallthrough_value(ret: &Type, can_fail: bool) -> Option<&'static str> {
    match (ret, can_fail) {
        (Type::None, true) => Some("Ok(())"),
        (Type::Optional(_), true) => Some("Ok(None)"),
        (Type::Optional(_), false) => Some("None"),
        _ => None,
    }
}

fn kind_name(f: &HirFunction) -> &'static str {
    if f.attrs.generator {
        "generator"
    } else {
        "async function"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn function(name: &str) -> HirFunction {
        HirFunction {
            name: name.to_string(),
            params: Vec::new(),
            ret: Type::None,
            ret_annotated: false,
            body: Vec::new(),
            attrs: FunctionAttrs::default(),
            method: None,
            locals: BTreeMap::new(),
            mutable_vars: BTreeSet::new(),
            generic_bounds: BTreeMap::new(),
            docstring: None,
            pos: SourcePos::unknown(),
        }
    }

    #[test]
    fn test_generic_params() {
        let mut f = function("largest");
        assert_eq!(generic_params(&f), "");
        f.generic_bounds.insert(
            "T".to_string(),
            ["Clone", "PartialOrd"].iter().map(|s| s.to_string()).collect(),
        );
        assert_eq!(generic_params(&f), "<T: Clone + PartialOrd>");
    }

    #[test]
    fn test_receiver_forms() {
        let mut f = function("area");
        assert_eq!(receiver(&f), None);
        f.method = Some(MethodKind::Instance);
        assert_eq!(receiver(&f), Some("&self"));
        f.attrs.self_mut = true;
        assert_eq!(receiver(&f), Some("&mut self"));
        f.method = Some(MethodKind::Static);
        assert_eq!(receiver(&f), None);
    }

    #[test]
    fn test_fallthrough_value() {
        assert_eq!(fallthrough_value(&Type::None, true), Some("Ok(())"));
        assert_eq!(fallthrough_value(&Type::optional(Type::Int), false), Some("None"));
        assert_eq!(fallthrough_value(&Type::Int, false), None);
    }
}
