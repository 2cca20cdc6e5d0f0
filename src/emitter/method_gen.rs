//! Method call lowering
//!
//! ユーザクラスのメソッドはシグネチャに従って呼び、それ以外はメソッドテーブルの
//! テンプレートを展開する。

use super::template::{expand, implied_dependencies, Slot};
use super::value::{Form, Value};
use super::RustEmitter;
use crate::error::{DepylerError, Result};
use crate::hir::*;
use crate::manifest::Dependency;
use crate::semantic::{unique_method_family, Type};
use crate::stdlib::lookup_method;

impl RustEmitter<'_> {
    pub(super) fn method_call(
        &mut self,
        e: &HirExpr,
        receiver: &HirExpr,
        method: &str,
        args: &[HirExpr],
        kwargs: &[(String, HirExpr)],
    ) -> Result<Value> {
        if is_super_call(receiver) {
            return self.super_method(e, method, args, kwargs);
        }
        if let HirExprKind::Str { value, .. } = &receiver.kind {
            if method == "format" {
                return self.str_format(e, value, args, kwargs);
            }
        }
        if let Type::Native(n) = &receiver.ty {
            if n == "argparse.ArgumentParser" {
                return self.parser_method(e, method);
            }
        }
        // `cls.method()` in a classmethod
        if let Some(n) = receiver.as_name() {
            if self.ctx.lookup(n).map_or(false, |b| b.code == "Self") {
                let class = self.ctx.current_class().map(str::to_string).unwrap_or_default();
                return self.class_method(e, &class, method, args, kwargs);
            }
        }
        if let Type::Class(class) = &receiver.ty {
            if self.ctx.find_method(class, method).is_some() {
                let class = class.clone();
                return self.instance_method(e, receiver, &class, method, args, kwargs);
            }
        }
        if method == "sort" && matches!(receiver.ty, Type::List(_) | Type::Unknown) {
            return self.list_sort(e, receiver, kwargs);
        }
        self.table_method(e, receiver, method, args, kwargs)
    }

    /// `super().method(...)` → `self.base.method(...)`
    fn super_method(
        &mut self,
        e: &HirExpr,
        method: &str,
        args: &[HirExpr],
        kwargs: &[(String, HirExpr)],
    ) -> Result<Value> {
        if method == "__init__" {
            return Err(DepylerError::unsupported(
                e.pos,
                "super().__init__() outside the start of __init__",
            ));
        }
        let base = self
            .ctx
            .current_class()
            .and_then(|c| self.ctx.classes.get(c))
            .and_then(|info| info.base.clone());
        let Some(base) = base.filter(|b| self.ctx.classes.contains_key(b)) else {
            return Err(DepylerError::unsupported(e.pos, "super() without a user base class"));
        };
        let Some((path, sig)) = self.ctx.find_method(&base, method) else {
            return Err(DepylerError::unresolved(e.pos, format!("{base}.{method}")));
        };
        let sig = sig.clone();
        let bound = self.bind_arguments(&sig.params, args, kwargs, e.pos, method)?;
        let recv = self.self_code();
        let head = format!("{recv}.base{path}.{}", sig.rust_name);
        Ok(self.invoke(&sig, &head, bound, e))
    }

    /// `self` のコード (`__init__` の途中なら `_self`)
    fn self_code(&self) -> String {
        self.ctx
            .lookup("self")
            .map_or_else(|| "self".to_string(), |b| b.code.clone())
    }

    fn class_method(
        &mut self,
        e: &HirExpr,
        class: &str,
        method: &str,
        args: &[HirExpr],
        kwargs: &[(String, HirExpr)],
    ) -> Result<Value> {
        let Some((path, sig)) = self.ctx.find_method(class, method) else {
            return Err(DepylerError::unresolved(e.pos, format!("{class}.{method}")));
        };
        let sig = sig.clone();
        let owner = self.defining_class(class, &path);
        let bound = self.bind_arguments(&sig.params, args, kwargs, e.pos, method)?;
        let head = if owner == class {
            format!("Self::{}", sig.rust_name)
        } else {
            format!("{owner}::{}", sig.rust_name)
        };
        Ok(self.invoke(&sig, &head, bound, e))
    }

    /// `.base.base` の経路を辿ってメソッドを定義しているクラスを得る
    fn defining_class(&self, class: &str, path: &str) -> String {
        let mut current = class.to_string();
        for _ in path.matches(".base") {
            match self.ctx.classes.get(&current).and_then(|c| c.base.clone()) {
                Some(b) => current = b,
                None => break,
            }
        }
        current
    }

    fn instance_method(
        &mut self,
        e: &HirExpr,
        receiver: &HirExpr,
        class: &str,
        method: &str,
        args: &[HirExpr],
        kwargs: &[(String, HirExpr)],
    ) -> Result<Value> {
        let Some((path, sig)) = self.ctx.find_method(class, method) else {
            return Err(DepylerError::unresolved(e.pos, format!("{class}.{method}")));
        };
        let sig = sig.clone();
        if sig.method != Some(MethodKind::Instance) {
            let owner = self.defining_class(class, &path);
            let bound = self.bind_arguments(&sig.params, args, kwargs, e.pos, method)?;
            return Ok(self.invoke(&sig, &format!("{owner}::{}", sig.rust_name), bound, e));
        }
        let recv = if sig.self_mut {
            self.place_expr(receiver)?
        } else {
            self.expr(receiver)?
        };
        let bound = self.bind_arguments(&sig.params, args, kwargs, e.pos, method)?;
        let head = format!("{}{path}.{}", recv.atom(), sig.rust_name);
        Ok(self.invoke(&sig, &head, bound, e))
    }

    /// `ArgumentParser` の構築系メソッドは Args 構造体に吸収される
    fn parser_method(&mut self, e: &HirExpr, method: &str) -> Result<Value> {
        match method {
            "parse_args" => {
                self.ctx.need(Dependency::Clap);
                Ok(Value::owned(
                    "<Args as clap::Parser>::parse()",
                    Type::Native("argparse.Namespace".to_string()),
                ))
            }
            "add_argument" | "add_argument_group" | "set_defaults" => Ok(Value::unit("()")),
            other => Err(DepylerError::unsupported(
                e.pos,
                format!("ArgumentParser.{other}()"),
            )),
        }
    }

    /// `xs.sort(key=..., reverse=...)`
    fn list_sort(&mut self, e: &HirExpr, receiver: &HirExpr, kwargs: &[(String, HirExpr)]) -> Result<Value> {
        let recv = self.place_expr(receiver)?;
        let mut key = None;
        let mut reverse = None;
        for (k, v) in kwargs {
            match k.as_str() {
                "key" => key = Some(v),
                "reverse" => reverse = Some(v),
                other => {
                    return Err(DepylerError::unsupported(
                        e.pos,
                        format!("list.sort() keyword argument '{other}'"),
                    ))
                }
            }
        }
        let reverse = match reverse {
            Some(r) => Some(self.cond(r)?),
            None => None,
        };
        let code = self.sort_in_place(&recv.atom(), &recv.ty.element(), key, reverse.as_deref(), e.pos)?;
        Ok(Value::unit(code))
    }

    fn table_method(
        &mut self,
        e: &HirExpr,
        receiver: &HirExpr,
        method: &str,
        args: &[HirExpr],
        kwargs: &[(String, HirExpr)],
    ) -> Result<Value> {
        let argc = args.len() + kwargs.len();
        let lookup_ty = match receiver.ty.unwrap_optional() {
            Type::Unknown => unique_method_family(method).unwrap_or(Type::Unknown),
            other => other.clone(),
        };
        let Some(spec) = lookup_method(&lookup_ty, method, argc) else {
            return Err(DepylerError::unsupported(
                e.pos,
                format!("method '{method}' on a value of type {}", receiver.ty),
            ));
        };
        if method == "format" && spec.params.contains(&"*") {
            return Err(DepylerError::unsupported(
                e.pos,
                "str.format() on a non-literal format string",
            ));
        }
        let recv = if spec.mutating {
            self.place_expr(receiver)?
        } else {
            self.expr(receiver)?
        };
        let recv = match recv.form {
            Form::Iter => Value::owned(recv.into_owned(), recv.ty),
            _ => recv,
        };
        let mut values = Vec::new();
        for a in args {
            values.push(self.expr(a)?);
        }
        let mut kw = Vec::new();
        for (k, v) in kwargs {
            kw.push((k.clone(), self.expr(v)?));
        }
        let arg_tys: Vec<Type> = values.iter().map(|v| v.ty.clone()).collect();
        let slots = self.registry_slots(spec.params, values, kw, e.pos, method)?;
        let ret = if e.ty.contains_unknown() {
            (spec.ret_ty_resolver)(&recv.ty, &arg_tys)
        } else {
            e.ty.clone()
        };
        self.expand_method(spec, &recv, &slots, ret)
    }

    /// Table method applied to lowered values (`map(str.upper, xs)`)
    pub(super) fn registry_method(
        &mut self,
        recv: &Value,
        method: &str,
        args: Vec<Value>,
        ret: &Type,
        pos: SourcePos,
    ) -> Result<Value> {
        let Some(spec) = lookup_method(&recv.ty, method, args.len()) else {
            return Err(DepylerError::unsupported(
                pos,
                format!("method '{method}' on a value of type {}", recv.ty),
            ));
        };
        let arg_tys: Vec<Type> = args.iter().map(|v| v.ty.clone()).collect();
        let slots = self.registry_slots(spec.params, args, Vec::new(), pos, method)?;
        let ret = if ret.contains_unknown() {
            (spec.ret_ty_resolver)(&recv.ty, &arg_tys)
        } else {
            ret.clone()
        };
        self.expand_method(spec, recv, &slots, ret)
    }

    fn expand_method(
        &mut self,
        spec: &crate::stdlib::MethodSpec,
        recv: &Value,
        slots: &[Slot],
        ret: Type,
    ) -> Result<Value> {
        let code = expand(spec.template, Some(recv), slots)?;
        if let Some(dep) = spec.dependency {
            self.ctx.need(dep);
        }
        for dep in implied_dependencies(&code) {
            self.ctx.need(dep);
        }
        self.ctx.note_type(&ret);
        Ok(Value::owned(code, ret))
    }
}

/// `super()` (引数なし)
pub(super) fn is_super_call(e: &HirExpr) -> bool {
    matches!(&e.kind, HirExprKind::Call { func, args, .. } if func == "super" && args.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_super_call() {
        let pos = SourcePos::unknown();
        let sup = HirExpr::new(
            HirExprKind::Call {
                func: "super".into(),
                args: vec![],
                kwargs: vec![],
            },
            pos,
        );
        assert!(is_super_call(&sup));
        assert!(!is_super_call(&HirExpr::name("super", pos)));
    }
}
