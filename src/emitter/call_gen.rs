//! Call lowering
//!
//! 呼び出し先の解決順: ローカルの呼び出し可能変数 → ユーザ関数 → クラス →
//! 例外クラス → `Class.method` → 組み込み → 標準ライブラリのレジストリ。

use super::context::{FnSig, ParamSig};
use super::expr_gen::is_ident;
use super::template::{expand, implied_dependencies, Slot};
use super::value::{Form, Value};
use super::RustEmitter;
use crate::error::{DepylerError, Result};
use crate::hir::*;
use crate::manifest::Dependency;
use crate::semantic::Type;
use crate::stdlib::{self, parse_param, EntryKind, ErrorTaxon};

impl RustEmitter<'_> {
    pub(super) fn call(
        &mut self,
        e: &HirExpr,
        func: &str,
        args: &[HirExpr],
        kwargs: &[(String, HirExpr)],
    ) -> Result<Value> {
        if self.ctx.is_declared(func) {
            return self.call_variable(e, func, args);
        }
        if let Some(sig) = self.ctx.lookup_fn(func).cloned() {
            let bound = self.bind_arguments(&sig.params, args, kwargs, e.pos, func)?;
            return Ok(self.invoke(&sig, &sig.rust_name, bound, e));
        }
        let is_exception = self
            .ctx
            .classes
            .get(func)
            .map_or(ErrorTaxon::is_builtin_exception(func), |c| c.is_exception);
        if is_exception {
            return self.exception_value(func, args);
        }
        if self.ctx.classes.contains_key(func) {
            return self.construct(e, func, args, kwargs);
        }
        if let Some((class, method)) = func.rsplit_once('.') {
            if self.ctx.classes.contains_key(class) {
                return self.static_call(e, class, method, args, kwargs);
            }
        }
        if stdlib::is_builtin(func) {
            return self.builtin(e, func, args, kwargs);
        }
        if func.contains('.') {
            return self.stdlib_call(e, func, args, kwargs);
        }
        Err(DepylerError::unresolved(e.pos, func))
    }

    /// Arguments in declaration order: positional, keyword, then default
    pub(super) fn bind_arguments(
        &mut self,
        params: &[ParamSig],
        args: &[HirExpr],
        kwargs: &[(String, HirExpr)],
        pos: SourcePos,
        callee: &str,
    ) -> Result<Vec<String>> {
        if args.len() > params.len() {
            return Err(DepylerError::unsupported(
                pos,
                format!(
                    "{callee}() takes {} arguments but {} were given",
                    params.len(),
                    args.len()
                ),
            ));
        }
        if let Some((k, _)) = kwargs.iter().find(|(k, _)| !params.iter().any(|p| &p.name == k)) {
            return Err(DepylerError::unsupported(
                pos,
                format!("{callee}() got an unexpected keyword argument '{k}'"),
            ));
        }
        let mut out = Vec::with_capacity(params.len());
        for (i, p) in params.iter().enumerate() {
            let source = args
                .get(i)
                .or_else(|| kwargs.iter().find(|(k, _)| k == &p.name).map(|(_, v)| v));
            let expr = match (source, &p.default) {
                (Some(a), _) => a,
                (None, Some(d)) => d,
                (None, None) => {
                    return Err(DepylerError::unsupported(
                        pos,
                        format!("{callee}() missing required argument '{}'", p.name),
                    ))
                }
            };
            if matches!(expr.kind, HirExprKind::Starred(_)) {
                return Err(DepylerError::unsupported(
                    expr.pos,
                    "argument unpacking in a call to a user function",
                ));
            }
            let v = if p.passing() == ParamMode::BorrowMut {
                self.place_expr(expr)?
            } else {
                self.expr(expr)?
            };
            out.push(self.pass_arg(p, v)?);
        }
        Ok(out)
    }

    /// Argument code for the parameter's passing convention
    pub(super) fn pass_arg(&mut self, p: &ParamSig, v: Value) -> Result<String> {
        Ok(match p.passing() {
            ParamMode::ByValue => self.coerce(v, &p.ty)?,
            ParamMode::Borrow => match p.ty {
                Type::Str => v.as_str_ref(),
                _ => v.as_ref(),
            },
            ParamMode::BorrowMut => v.as_mut_ref(),
        })
    }

    /// `head(args)` with the callee's failure and generator conventions applied
    pub(super) fn invoke(&mut self, sig: &FnSig, head: &str, args: Vec<String>, e: &HirExpr) -> Value {
        let code = format!("{head}({})", args.join(", "));
        let ty = if sig.ret.contains_unknown() && !e.ty.contains_unknown() {
            e.ty.clone()
        } else {
            sig.ret.clone()
        };
        if sig.generator {
            return Value::new(code, ty, Form::Iter);
        }
        if sig.can_fail && !sig.is_async {
            return Value::owned(self.ctx.unwrap_fallible(&code), ty);
        }
        Value::owned(code, ty)
    }

    /// User function applied to lowered values (`map(f, xs)`)
    pub(super) fn invoke_values(&mut self, sig: &FnSig, args: Vec<Value>, pos: SourcePos) -> Result<Value> {
        if args.len() > sig.params.len() {
            return Err(DepylerError::unsupported(
                pos,
                format!("{}() given too many arguments", sig.rust_name),
            ));
        }
        let mut codes = Vec::new();
        let mut values = args.into_iter();
        for p in &sig.params {
            let v = match values.next() {
                Some(v) => v,
                None => match &p.default {
                    Some(d) => self.expr(d)?,
                    None => {
                        return Err(DepylerError::unsupported(
                            pos,
                            format!("{}() missing required argument '{}'", sig.rust_name, p.name),
                        ))
                    }
                },
            };
            codes.push(self.pass_arg(p, v)?);
        }
        let site = HirExpr::new(HirExprKind::NoneLit, pos);
        Ok(self.invoke(sig, &sig.rust_name, codes, &site))
    }

    /// Call of a local holding a function or closure
    fn call_variable(&mut self, e: &HirExpr, name: &str, args: &[HirExpr]) -> Result<Value> {
        let callee = HirExpr::typed(HirExprKind::Name(name.to_string()), Type::Unknown, e.pos);
        self.dyn_call(e, &callee, args)
    }

    pub(super) fn dyn_call(&mut self, e: &HirExpr, callee: &HirExpr, args: &[HirExpr]) -> Result<Value> {
        let f = self.expr(callee)?;
        // `cls(...)` in a classmethod
        if f.code == "Self" {
            let class = self.ctx.current_class().map(str::to_string).unwrap_or_default();
            return self.construct(e, &class, args, &[]);
        }
        let (param_tys, ret) = match &f.ty {
            Type::Callable { params, ret } => (params.clone(), (**ret).clone()),
            _ => (Vec::new(), e.ty.clone()),
        };
        let mut codes = Vec::new();
        for (i, a) in args.iter().enumerate() {
            let v = self.expr(a)?;
            let ty = param_tys.get(i).cloned().unwrap_or(Type::Unknown);
            codes.push(self.coerce(v, &ty)?);
        }
        let head = if is_ident(&f.code) {
            f.code.clone()
        } else {
            format!("({})", f.code)
        };
        let ty = if ret.contains_unknown() { e.ty.clone() } else { ret };
        Ok(Value::owned(format!("{head}({})", codes.join(", ")), ty))
    }

    // --- クラス ---

    /// Parameters of `Class(...)`
    ///
    /// `__init__` がなければ dataclass のフィールド、それもなければ基底クラスの引数。
    pub(super) fn constructor_params(&self, class: &str) -> (Vec<ParamSig>, bool) {
        let Some(info) = self.ctx.classes.get(class) else {
            return (Vec::new(), false);
        };
        if let Some(init) = info.methods.get("__init__") {
            return (init.params.clone(), init.can_fail);
        }
        if info.is_dataclass {
            let defaults = self.module.class(class).map(|c| c.fields.clone()).unwrap_or_default();
            let params = defaults
                .into_iter()
                .map(|f| ParamSig {
                    name: f.name,
                    ty: f.ty,
                    mode: ParamMode::ByValue,
                    default: f.default,
                })
                .collect();
            return (params, false);
        }
        match &info.base {
            Some(base) if self.ctx.classes.contains_key(base) => self.constructor_params(base),
            _ => (Vec::new(), false),
        }
    }

    fn construct(
        &mut self,
        e: &HirExpr,
        class: &str,
        args: &[HirExpr],
        kwargs: &[(String, HirExpr)],
    ) -> Result<Value> {
        let (params, can_fail) = self.constructor_params(class);
        let bound = self.bind_arguments(&params, args, kwargs, e.pos, class)?;
        let code = format!("{class}::new({})", bound.join(", "));
        let code = if can_fail {
            self.ctx.unwrap_fallible(&code)
        } else {
            code
        };
        Ok(Value::owned(code, Type::Class(class.to_string())))
    }

    fn static_call(
        &mut self,
        e: &HirExpr,
        class: &str,
        method: &str,
        args: &[HirExpr],
        kwargs: &[(String, HirExpr)],
    ) -> Result<Value> {
        let Some((_, sig)) = self.ctx.find_method(class, method) else {
            return Err(DepylerError::unresolved(e.pos, format!("{class}.{method}")));
        };
        let sig = sig.clone();
        if sig.method == Some(MethodKind::Instance) {
            return Err(DepylerError::unsupported(
                e.pos,
                format!("calling instance method {class}.{method} through the class"),
            ));
        }
        let bound = self.bind_arguments(&sig.params, args, kwargs, e.pos, method)?;
        let head = format!("{class}::{}", sig.rust_name);
        Ok(self.invoke(&sig, &head, bound, e))
    }

    /// `ValueError("msg")` as a boxed error value
    pub(super) fn exception_value(&mut self, class: &str, args: &[HirExpr]) -> Result<Value> {
        let ty = self.ctx.use_error_type(class);
        let msg = match args.first() {
            Some(a) => {
                let v = self.expr(a)?;
                self.to_str(&v)
            }
            None => "\"\"".to_string(),
        };
        let err = self.ctx.dyn_error();
        Ok(Value::owned(
            format!("{err}::from({ty}::new({msg}))"),
            Type::Native("DynError".to_string()),
        ))
    }

    // --- 標準ライブラリ ---

    /// Template slots for registry parameters
    pub(super) fn registry_slots(
        &self,
        params: &[&str],
        values: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        pos: SourcePos,
        callee: &str,
    ) -> Result<Vec<Slot>> {
        if params.contains(&"*") {
            return Ok(values.into_iter().map(Slot::Value).collect());
        }
        let mut values = values.into_iter();
        let mut kwargs = kwargs;
        let mut slots = Vec::with_capacity(params.len());
        for raw in params {
            let p = parse_param(raw);
            if let Some(v) = values.next() {
                slots.push(Slot::Value(v));
                continue;
            }
            if let Some(idx) = kwargs.iter().position(|(k, _)| k == p.name) {
                slots.push(Slot::Value(kwargs.remove(idx).1));
                continue;
            }
            match p.default {
                Some(d) => slots.push(Slot::Raw(d.to_string())),
                None => {
                    return Err(DepylerError::unsupported(
                        pos,
                        format!("{callee}() missing argument '{}'", p.name),
                    ))
                }
            }
        }
        if values.next().is_some() {
            return Err(DepylerError::unsupported(pos, format!("too many arguments to {callee}()")));
        }
        if let Some((k, _)) = kwargs.first() {
            return Err(DepylerError::unsupported(
                pos,
                format!("{callee}() keyword argument '{k}' is not supported"),
            ));
        }
        Ok(slots)
    }

    fn stdlib_call(
        &mut self,
        e: &HirExpr,
        path: &str,
        args: &[HirExpr],
        kwargs: &[(String, HirExpr)],
    ) -> Result<Value> {
        let argc = args.len() + kwargs.len();
        let Some(spec) = stdlib::lookup_function(path, argc) else {
            if stdlib::has_function(path) {
                return Err(DepylerError::unsupported(
                    e.pos,
                    format!("{path}() with {argc} arguments"),
                ));
            }
            return Err(DepylerError::unresolved(e.pos, path));
        };
        if spec.kind == EntryKind::Special {
            return self.special_call(e, path, args);
        }
        let mut values = Vec::new();
        for a in args {
            values.push(self.expr(a)?);
        }
        let mut kw = Vec::new();
        for (k, v) in kwargs {
            kw.push((k.clone(), self.expr(v)?));
        }
        let ret = if e.ty.contains_unknown() {
            let tys: Vec<Type> = values.iter().map(|v| v.ty.clone()).collect();
            (spec.ret_ty_resolver)(&tys)
        } else {
            e.ty.clone()
        };
        let slots = self.registry_slots(spec.params, values, kw, e.pos, path)?;
        self.expand_stdlib(spec, &slots, ret)
    }

    /// Registry function applied to lowered values
    pub(super) fn stdlib_values(
        &mut self,
        path: &str,
        args: Vec<Value>,
        ret: &Type,
        pos: SourcePos,
    ) -> Result<Value> {
        let Some(spec) = stdlib::lookup_function(path, args.len()) else {
            return Err(DepylerError::unresolved(pos, path));
        };
        let ret = if ret.contains_unknown() {
            let tys: Vec<Type> = args.iter().map(|v| v.ty.clone()).collect();
            (spec.ret_ty_resolver)(&tys)
        } else {
            ret.clone()
        };
        let slots = self.registry_slots(spec.params, args, Vec::new(), pos, path)?;
        self.expand_stdlib(spec, &slots, ret)
    }

    fn expand_stdlib(&mut self, spec: &stdlib::StdlibSpec, slots: &[Slot], ret: Type) -> Result<Value> {
        let code = expand(spec.template, None, slots)?;
        if let Some(dep) = spec.dependency {
            self.ctx.need(dep);
        }
        for dep in implied_dependencies(&code) {
            self.ctx.need(dep);
        }
        self.ctx.note_type(&ret);
        let form = if spec.lazy { Form::Iter } else { Form::Owned };
        Ok(Value::new(code, ret, form))
    }

    /// Entries lowered by dedicated code (`asyncio.gather`, `argparse`)
    fn special_call(&mut self, e: &HirExpr, path: &str, args: &[HirExpr]) -> Result<Value> {
        match path {
            "asyncio.gather" => {
                self.ctx.need(Dependency::Tokio);
                let mut futures = Vec::new();
                let mut tys = Vec::new();
                for a in args {
                    let v = self.expr(a)?;
                    tys.push(v.ty.clone());
                    futures.push(v.into_owned());
                }
                Ok(Value::owned(
                    format!("tokio::join!({})", futures.join(", ")),
                    Type::Tuple(tys),
                ))
            }
            "argparse.ArgumentParser" => Ok(Value::new(
                "()",
                Type::Native("argparse.ArgumentParser".to_string()),
                Form::Owned,
            )),
            _ => Err(DepylerError::unsupported(e.pos, format!("{path}()"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::EmitOptions;

    #[test]
    fn test_registry_slots_fill_defaults_and_kwargs() {
        let module = HirModule::default();
        let emitter = RustEmitter::new(&module, EmitOptions::default());
        let params = ["x", "sep=\" \"", "n=1"];
        let slots = emitter
            .registry_slots(
                &params,
                vec![Value::new("s", Type::Str, Form::Place)],
                vec![("n".to_string(), Value::owned("3", Type::Int))],
                SourcePos::unknown(),
                "f",
            )
            .unwrap();
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[1], Slot::Raw("\" \"".to_string()));
        assert_eq!(slots[2], Slot::Value(Value::owned("3", Type::Int)));
    }

    #[test]
    fn test_registry_slots_reject_unknown_kwarg() {
        let module = HirModule::default();
        let emitter = RustEmitter::new(&module, EmitOptions::default());
        let err = emitter.registry_slots(
            &["x"],
            vec![Value::owned("1", Type::Int)],
            vec![("bogus".to_string(), Value::owned("2", Type::Int))],
            SourcePos::unknown(),
            "f",
        );
        assert!(err.is_err());
    }
}
