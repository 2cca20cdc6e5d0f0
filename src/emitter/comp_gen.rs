//! Comprehensions and lambdas
//!
//! 内包表記はイテレータチェーンに、ラムダはクロージャに落とす。
//! 入れ子の `for` は内側を `collect` してから `flat_map` に渡す
//! (外側の束縛を借用したままにしないため)。

use super::context::{rust_ident, Binding, Frame};
use super::expr_gen::is_ident;
use super::value::{Form, Value};
use super::RustEmitter;
use crate::error::{DepylerError, Result};
use crate::hir::*;
use crate::semantic::{iter_element, Type};
use std::collections::BTreeMap;

/// `(a, b)` / `x` / `_`
pub(super) fn pattern_code(pat: &Pattern) -> String {
    match pat {
        Pattern::Name(n) => rust_ident(n),
        Pattern::Wildcard => "_".to_string(),
        Pattern::Tuple(items) => {
            let inner: Vec<String> = items.iter().map(pattern_code).collect();
            if inner.len() == 1 {
                format!("({},)", inner[0])
            } else {
                format!("({})", inner.join(", "))
            }
        }
    }
}

impl RustEmitter<'_> {
    /// Declare the names of `pat` in the current scope
    ///
    /// `by_ref` なら各名前は `&T` に束縛されている (filter のクロージャ引数)。
    pub(super) fn bind_pattern(&mut self, pat: &Pattern, ty: &Type, by_ref: bool) {
        match pat {
            Pattern::Name(n) => {
                let ident = rust_ident(n);
                let code = if by_ref { format!("(*{ident})") } else { ident };
                self.ctx.declare(
                    n,
                    Binding {
                        code,
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
                    self.bind_pattern(p, t, by_ref);
                }
            }
            Pattern::Wildcard => {}
        }
    }

    pub(super) fn comprehension(&mut self, e: &HirExpr, comp: &Comprehension) -> Result<Value> {
        let chain = self.comp_level(comp, 0, &e.ty)?;
        self.ctx.note_type(&e.ty);
        let code = match comp.kind {
            ComprehensionKind::Generator => return Ok(Value::new(chain, e.ty.clone(), Form::Iter)),
            ComprehensionKind::List => {
                let t = self.elem_type_code(&e.ty.element());
                format!("{chain}.collect::<Vec<{t}>>()")
            }
            ComprehensionKind::Set => {
                let t = self.elem_type_code(&e.ty.element());
                format!("{chain}.collect::<HashSet<{t}>>()")
            }
            ComprehensionKind::Dict => {
                let (k, v) = match &e.ty {
                    Type::Dict(k, v) => (self.elem_type_code(k), self.elem_type_code(v)),
                    _ => ("_".to_string(), "_".to_string()),
                };
                format!("{chain}.collect::<HashMap<{k}, {v}>>()")
            }
        };
        Ok(Value::owned(code, e.ty.clone()))
    }

    fn elem_type_code(&mut self, ty: &Type) -> String {
        self.ctx.local_type(ty).unwrap_or_else(|| "_".to_string())
    }

    /// Iterator chain for `iters[level..]`
    fn comp_level(&mut self, comp: &Comprehension, level: usize, result_ty: &Type) -> Result<String> {
        let Some(it) = comp.iters.get(level) else {
            return Err(DepylerError::Internal("comprehension without a for clause".into()));
        };
        let src = self.expr(&it.iter)?;
        let elem_ty = iter_element(&src.ty);
        let mut chain = src.iter_owned();
        let pat = pattern_code(&it.target);

        if !it.guards.is_empty() {
            self.ctx.push_scope();
            self.bind_pattern(&it.target, &elem_ty, true);
            let guards: Result<Vec<String>> = it.guards.iter().map(|g| self.cond(g)).collect();
            self.ctx.pop_scope();
            let guards = guards?;
            chain = format!("{chain}.filter(|{}| {})", filter_pattern(&it.target), guards.join(" && "));
        }

        self.ctx.push_scope();
        self.bind_pattern(&it.target, &elem_ty, false);
        let body = if level + 1 == comp.iters.len() {
            self.comp_element(comp, result_ty)
                .map(|code| format!("{chain}.map(|{pat}| {code})"))
        } else {
            self.comp_level(comp, level + 1, result_ty)
                .map(|inner| format!("{chain}.flat_map(|{pat}| {inner}.collect::<Vec<_>>())"))
        };
        self.ctx.pop_scope();
        body
    }

    fn comp_element(&mut self, comp: &Comprehension, result_ty: &Type) -> Result<String> {
        match (&comp.kind, &comp.value) {
            (ComprehensionKind::Dict, Some(value)) => {
                let (kt, vt) = match result_ty {
                    Type::Dict(k, v) => ((**k).clone(), (**v).clone()),
                    _ => (Type::Unknown, Type::Unknown),
                };
                let k = self.owned_expr(&comp.element, &kt)?;
                let v = self.owned_expr(value, &vt)?;
                Ok(format!("({k}, {v})"))
            }
            _ => {
                let et = result_ty.element();
                self.owned_expr(&comp.element, &et)
            }
        }
    }

    // --- ラムダ ---

    pub(super) fn lambda(
        &mut self,
        e: &HirExpr,
        params: &[String],
        body: &HirExpr,
        escapes: bool,
    ) -> Result<Value> {
        let (param_tys, ret) = match &e.ty {
            Type::Callable { params: ps, ret } if ps.len() == params.len() => {
                (ps.clone(), (**ret).clone())
            }
            _ => (vec![Type::Unknown; params.len()], body.ty.clone()),
        };
        let mut sig = Vec::new();
        for (p, t) in params.iter().zip(&param_tys) {
            match self.ctx.local_type(t) {
                Some(rt) => sig.push(format!("{}: {rt}", rust_ident(p))),
                None => sig.push(rust_ident(p)),
            }
        }
        self.enter_frame(Frame::closure(ret.clone()), BTreeMap::new());
        for (p, t) in params.iter().zip(&param_tys) {
            self.ctx.declare_local(p, t.clone(), Form::Place);
        }
        let result = self.expr(body).and_then(|v| {
            if ret.contains_unknown() {
                Ok(v.into_owned())
            } else {
                self.coerce(v, &ret)
            }
        });
        self.leave_frame();
        let code = result?;
        let mv = if escapes { "move " } else { "" };
        Ok(Value::owned(format!("{mv}|{}| {code}", sig.join(", ")), e.ty.clone()))
    }

    /// Apply a callable expression to already-lowered arguments
    ///
    /// `map(f, xs)` / `sorted(key=f)` などから呼ばれる。ラムダはその場で展開する。
    pub(super) fn apply_callable(
        &mut self,
        callee: &HirExpr,
        args: Vec<Value>,
        ret: &Type,
        pos: SourcePos,
    ) -> Result<Value> {
        match &callee.kind {
            HirExprKind::Lambda { params, body, .. } => {
                if params.len() != args.len() {
                    return Err(DepylerError::unsupported(
                        pos,
                        format!("lambda takes {} arguments, {} given", params.len(), args.len()),
                    ));
                }
                self.ctx.push_scope();
                for (p, v) in params.iter().zip(args) {
                    self.ctx.declare(
                        p,
                        Binding {
                            code: v.code,
                            ty: v.ty,
                            form: v.form,
                        },
                    );
                }
                let v = self.expr(body);
                self.ctx.pop_scope();
                v
            }
            HirExprKind::Name(n) if !self.ctx.is_declared(n) => {
                if let Some(sig) = self.ctx.lookup_fn(n).cloned() {
                    return self.invoke_values(&sig, args, pos);
                }
                if self.ctx.classes.contains_key(n) {
                    let codes: Vec<String> = args.iter().map(Value::into_owned).collect();
                    return Ok(Value::owned(
                        format!("{n}::new({})", codes.join(", ")),
                        Type::Class(n.clone()),
                    ));
                }
                if crate::stdlib::is_builtin(n) {
                    return self.builtin_values(n, args, ret, pos);
                }
                Err(DepylerError::unresolved(pos, n))
            }
            HirExprKind::Path(p) => self.stdlib_values(p, args, ret, pos),
            HirExprKind::Attribute { value, attr } if value.as_name() == Some("str") => {
                // map(str.upper, xs)
                let Some(recv) = args.first().cloned() else {
                    return Err(DepylerError::unsupported(pos, "unbound method without receiver"));
                };
                self.registry_method(&recv, attr, args[1..].to_vec(), ret, pos)
            }
            _ => {
                let f = self.expr(callee)?;
                let codes: Vec<String> = args.iter().map(Value::into_owned).collect();
                let head = if is_ident(&f.code) { f.code.clone() } else { format!("({})", f.code) };
                let ty = match &f.ty {
                    Type::Callable { ret, .. } => (**ret).clone(),
                    _ => ret.clone(),
                };
                Ok(Value::owned(format!("{head}({})", codes.join(", ")), ty))
            }
        }
    }
}

/// filter のクロージャ引数 (`&T` を受ける)
fn filter_pattern(pat: &Pattern) -> String {
    match pat {
        Pattern::Tuple(_) => format!("&{}", ref_tuple(pat)),
        _ => pattern_code(pat),
    }
}

/// `&(a, b)` を分解しつつ各名前は参照のまま束縛する
fn ref_tuple(pat: &Pattern) -> String {
    match pat {
        Pattern::Name(n) => format!("ref {}", rust_ident(n)),
        Pattern::Wildcard => "_".to_string(),
        Pattern::Tuple(items) => {
            let inner: Vec<String> = items.iter().map(ref_tuple).collect();
            if inner.len() == 1 {
                format!("({},)", inner[0])
            } else {
                format!("({})", inner.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_code() {
        let pat = Pattern::Tuple(vec![
            Pattern::Name("i".into()),
            Pattern::Tuple(vec![Pattern::Name("k".into()), Pattern::Wildcard]),
        ]);
        assert_eq!(pattern_code(&pat), "(i, (k, _))");
    }

    #[test]
    fn test_filter_pattern_binds_by_ref() {
        let pat = Pattern::Tuple(vec![Pattern::Name("a".into()), Pattern::Name("type".into())]);
        assert_eq!(filter_pattern(&pat), "&(ref a, ref type_)");
        assert_eq!(filter_pattern(&Pattern::Name("x".into())), "x");
    }
}
