//! Expression lowering (C6)
//!
//! HIR の式を `Value` (コード片 + 型 + 所有形態) に落とす。
//! 呼び出しは `call_gen` / `method_gen`、内包表記とラムダは `comp_gen`、
//! f-string は `format_gen` が受け持つ。

use super::context::{global_ident, rust_ident, Binding, Helper};
use super::helpers::fallback_variant;
use super::value::{self, method_receiver, parenthesize, Form, Value};
use super::RustEmitter;
use crate::error::{DepylerError, Result};
use crate::hir::*;
use crate::semantic::{
    factory_type, is_integer_exponent, narrowed_in_body, narrowed_in_else, union_enum_name, variant_name,
    NarrowKind, Narrowing, Type,
};
use crate::stdlib::{self, lookup_attribute, ErrorTaxon};

/// 整数リテラル (`-1` を含む)
pub(super) fn literal_int(e: &HirExpr) -> Option<i64> {
    match &e.kind {
        HirExprKind::Int { value, .. } => Some(*value),
        HirExprKind::UnaryOp {
            op: HirUnaryOp::Neg,
            operand,
        } => match operand.kind {
            HirExprKind::Int { value, .. } => Some(-value),
            _ => None,
        },
        _ => None,
    }
}

/// 負にならないと分かっている整数式
fn known_non_negative(e: &HirExpr) -> bool {
    literal_int(e).map_or(false, |v| v >= 0)
        || matches!(&e.kind, HirExprKind::Call { func, .. } if func == "len")
}

/// 単純な識別子か (`f(x)` の形で呼べる)
pub(super) fn is_ident(code: &str) -> bool {
    !code.is_empty() && code.chars().all(|c| c.is_alphanumeric() || c == '_')
}

impl RustEmitter<'_> {
    pub(super) fn expr(&mut self, e: &HirExpr) -> Result<Value> {
        match &e.kind {
            HirExprKind::Int { value, text } => {
                Ok(Value::owned(super::int_text(text, *value), Type::Int))
            }
            HirExprKind::Float { text, .. } => Ok(Value::owned(super::float_text(text), Type::Float)),
            HirExprKind::Str { value, raw } => Ok(Value::new(
                value::string_literal(value, *raw),
                Type::Str,
                Form::Literal,
            )),
            HirExprKind::Bytes(bytes) => Ok(Value::owned(
                format!("{}.to_vec()", value::bytes_literal(bytes)),
                Type::Bytes,
            )),
            HirExprKind::Bool(b) => Ok(Value::owned(b.to_string(), Type::Bool)),
            HirExprKind::NoneLit => Ok(Value::owned("None", Type::None)),
            HirExprKind::Name(n) => self.name_value(e, n, false),
            HirExprKind::Path(p) => self.path_value(e, p),
            HirExprKind::Attribute { value, attr } => self.attribute(e, value, attr),
            HirExprKind::Subscript { value, index } => self.subscript(value, index),
            HirExprKind::Slice {
                value,
                lower,
                upper,
                step,
            } => self.slice(e, value, lower.as_deref(), upper.as_deref(), step.as_deref()),
            HirExprKind::Call { func, args, kwargs } => self.call(e, func, args, kwargs),
            HirExprKind::MethodCall {
                receiver,
                method,
                args,
                kwargs,
            } => self.method_call(e, receiver, method, args, kwargs),
            HirExprKind::DynCall { callee, args } => self.dyn_call(e, callee, args),
            HirExprKind::BinOp { op, left, right } => self.binop(e, *op, left, right),
            HirExprKind::UnaryOp { op, operand } => self.unary(*op, operand),
            HirExprKind::Compare { op, left, right } => {
                let code = self.compare(*op, left, right)?;
                Ok(Value::owned(code, Type::Bool))
            }
            HirExprKind::BoolOp { op, left, right } => self.bool_op(e, *op, left, right),
            HirExprKind::IfExpr { test, body, orelse } => self.if_expr(e, test, body, orelse),
            HirExprKind::TempBind { name, value, body } => self.temp_bind(name, value, body),
            HirExprKind::FString(parts) => self.fstring(parts),
            HirExprKind::List(items) => self.list_literal(e, items),
            HirExprKind::Tuple(items) => self.tuple_literal(e, items),
            HirExprKind::Set(items) => self.set_literal(e, items),
            HirExprKind::Dict(pairs) => self.dict_literal(e, pairs),
            HirExprKind::Comprehension(comp) => self.comprehension(e, comp),
            HirExprKind::Lambda {
                params,
                body,
                escapes,
            } => self.lambda(e, params, body, *escapes),
            HirExprKind::Await(inner) => self.await_expr(e, inner),
            HirExprKind::Yield(_) => Err(DepylerError::unsupported(
                e.pos,
                "yield used as a value outside a generator statement",
            )),
            HirExprKind::Starred(_) => Err(DepylerError::unsupported(
                e.pos,
                "starred expression in this position",
            )),
            HirExprKind::NamedExpr { target, value } => self.named_expr(target, value),
        }
    }

    // --- 名前 ---

    /// Local, global, function item or class named `n`
    pub(super) fn name_value(&mut self, e: &HirExpr, n: &str, place: bool) -> Result<Value> {
        if let Some(b) = self.ctx.lookup(n).cloned() {
            let ty = if b.ty.contains_unknown() && !e.ty.contains_unknown() {
                e.ty.clone()
            } else {
                b.ty
            };
            return Ok(Value::new(b.code, ty, b.form));
        }
        if let Some(v) = self.ctx.global_value(n, place) {
            return Ok(v);
        }
        if let Some(sig) = self.ctx.lookup_fn(n) {
            return Ok(Value::owned(sig.rust_name.clone(), e.ty.clone()));
        }
        if self.ctx.classes.contains_key(n) {
            return Ok(Value::owned(n, Type::Class(n.to_string())));
        }
        // `defaultdict(list)` の `list`
        if let Some(made) = factory_type(n) {
            let ctor = match made {
                Type::List(_) => "Vec::new",
                Type::Dict(_, _) => "HashMap::new",
                Type::Set(_) => "HashSet::new",
                Type::Int => "i64::default",
                Type::Float => "f64::default",
                Type::Bool => "bool::default",
                _ => "String::new",
            };
            self.ctx.note_type(&made);
            let ty = Type::Callable {
                params: Vec::new(),
                ret: Box::new(made),
            };
            return Ok(Value::owned(ctor, ty));
        }
        Err(DepylerError::unresolved(e.pos, n))
    }

    /// `defaultdict` / `Counter` を入れた変数 (欠けたキーは既定値で埋まる)
    pub(super) fn fills_missing_keys(&self, value: &HirExpr) -> bool {
        match &value.kind {
            HirExprKind::Name(n) => self.ctx.frame().map_or(false, |f| f.default_dicts.contains(n)),
            HirExprKind::Attribute { value, attr } if value.as_name() == Some("self") => self
                .ctx
                .current_class()
                .and_then(|c| self.ctx.classes.get(c))
                .map_or(false, |c| c.default_fields.contains(attr)),
            _ => false,
        }
    }

    fn path_value(&mut self, e: &HirExpr, path: &str) -> Result<Value> {
        let Some(spec) = stdlib::lookup_constant(path) else {
            return Err(DepylerError::unresolved(e.pos, path));
        };
        if let Some(dep) = spec.dependency {
            self.ctx.need(dep);
        }
        let ty = if e.ty.contains_unknown() {
            (spec.ret_ty_resolver)(&[])
        } else {
            e.ty.clone()
        };
        let form = if ty == Type::Str && spec.template.starts_with('"') {
            Form::Literal
        } else {
            Form::Owned
        };
        Ok(Value::new(spec.template, ty, form))
    }

    /// Assignment target or mutating receiver
    ///
    /// 読み出しと違い、ロック中のグローバルや `get_mut` 経由の場所を返す。
    pub(super) fn place_expr(&mut self, e: &HirExpr) -> Result<Value> {
        match &e.kind {
            HirExprKind::Name(n) => self.name_value(e, n, true),
            HirExprKind::Attribute { value, attr } if value.as_name() != Some("self") => {
                let base = self.place_expr(value)?;
                self.attribute_on(e, base, attr)
            }
            HirExprKind::Subscript { value, index } => {
                let base = self.place_expr(value)?;
                match base.ty.clone() {
                    Type::Dict(_, v) => {
                        let key = self.expr(index)?;
                        if self.fills_missing_keys(value) {
                            return Ok(Value::new(
                                format!("(*{}.entry({}).or_default())", base.atom(), key.into_owned()),
                                *v,
                                Form::Place,
                            ));
                        }
                        Ok(Value::new(
                            format!(
                                "(*{}.get_mut({}).expect(\"KeyError: key not found\"))",
                                base.atom(),
                                key.as_key()
                            ),
                            *v,
                            Form::Place,
                        ))
                    }
                    Type::List(elem) => {
                        let idx = self.list_index(&base, index)?;
                        Ok(Value::new(format!("{}[{idx}]", base.atom()), *elem, Form::Place))
                    }
                    _ => self.expr(e),
                }
            }
            _ => self.expr(e),
        }
    }

    // --- 属性 ---

    fn attribute(&mut self, e: &HirExpr, value: &HirExpr, attr: &str) -> Result<Value> {
        if value.as_name() == Some("self") {
            if let Some(v) = self.self_attribute(e, attr)? {
                return Ok(v);
            }
        }
        // Class.ATTR
        if let Some(n) = value.as_name() {
            if !self.ctx.is_declared(n) {
                let found = self
                    .ctx
                    .classes
                    .get(n)
                    .and_then(|c| c.class_attrs.get(attr))
                    .cloned();
                if let Some(ty) = found {
                    return Ok(class_attr_value(&format!("{n}::{}", global_ident(attr)), ty));
                }
            }
        }
        let recv = self.expr(value)?;
        self.attribute_on(e, recv, attr)
    }

    /// `self.<attr>` inside a method (or a constructor still building fields)
    fn self_attribute(&mut self, e: &HirExpr, attr: &str) -> Result<Option<Value>> {
        let Some(class) = self.ctx.current_class().map(str::to_string) else {
            return Ok(None);
        };
        let init_fields = self
            .ctx
            .frame()
            .map(|f| f.init_fields.clone())
            .unwrap_or_default();
        if let Some(local) = init_fields.get(attr) {
            return match self.ctx.lookup(local) {
                Some(b) => Ok(Some(Value::new(b.code.clone(), b.ty.clone(), Form::Place))),
                None => Err(DepylerError::unsupported(
                    e.pos,
                    format!("self.{attr} is read before it is assigned in __init__"),
                )),
            };
        }
        let class_attr = self
            .ctx
            .classes
            .get(&class)
            .and_then(|c| c.class_attrs.get(attr))
            .cloned();
        if let Some(ty) = class_attr {
            return Ok(Some(class_attr_value(
                &format!("{class}::{}", global_ident(attr)),
                ty,
            )));
        }
        let Some(recv) = self.ctx.lookup("self").cloned() else {
            // 構築前: 基底のフィールドは基底のローカルから読む
            if let (Some((path, ty)), Some(base_local)) =
                (self.ctx.find_field(&class, attr), init_fields.get("base"))
            {
                if let Some(rest) = path.strip_prefix(".base") {
                    return Ok(Some(Value::new(
                        format!("{base_local}{rest}.{attr}"),
                        ty,
                        Form::Place,
                    )));
                }
            }
            return Ok(None);
        };
        let recv = Value::new(recv.code, recv.ty, recv.form);
        self.attribute_on(e, recv, attr).map(Some)
    }

    pub(super) fn attribute_on(&mut self, e: &HirExpr, recv: Value, attr: &str) -> Result<Value> {
        match recv.ty.clone() {
            Type::Class(c) => {
                if let Some((path, sig)) = self.ctx.find_method(&c, attr) {
                    if sig.property {
                        let sig = sig.clone();
                        let call = format!("{}{path}.{}()", recv.atom(), sig.rust_name);
                        let call = if sig.can_fail {
                            self.ctx.unwrap_fallible(&call)
                        } else {
                            call
                        };
                        return Ok(Value::owned(call, sig.ret));
                    }
                }
                if let Some((path, ty)) = self.ctx.find_field(&c, attr) {
                    return Ok(Value::new(
                        format!("{}{path}.{}", recv.atom(), rust_ident(attr)),
                        ty,
                        Form::Place,
                    ));
                }
                let class_attr = self
                    .ctx
                    .classes
                    .get(&c)
                    .and_then(|info| info.class_attrs.get(attr))
                    .cloned();
                if let Some(ty) = class_attr {
                    return Ok(class_attr_value(&format!("{c}::{}", global_ident(attr)), ty));
                }
                Err(DepylerError::unresolved(e.pos, format!("{c}.{attr}")))
            }
            Type::Native(n) if n == "argparse.Namespace" => {
                let arg = self.args.iter().find(|a| a.field == attr).cloned();
                let field = rust_ident(attr);
                match arg {
                    Some(a) if a.count => Ok(Value::owned(
                        format!("({}.{field} as i64)", recv.atom()),
                        Type::Int,
                    )),
                    Some(a) => Ok(Value::new(format!("{}.{field}", recv.atom()), a.ty, Form::Place)),
                    None => Ok(Value::new(
                        format!("{}.{field}", recv.atom()),
                        e.ty.clone(),
                        Form::Place,
                    )),
                }
            }
            ty => {
                let Some(spec) = lookup_attribute(&ty, attr) else {
                    return Err(DepylerError::unsupported(
                        e.pos,
                        format!("attribute '{attr}' on a value of type {ty}"),
                    ));
                };
                if let Some(dep) = spec.dependency {
                    self.ctx.need(dep);
                }
                let code = super::template::expand(spec.template, Some(&recv), &[])?;
                let ret = if e.ty.contains_unknown() {
                    (spec.ret_ty_resolver)(&ty, &[])
                } else {
                    e.ty.clone()
                };
                Ok(Value::owned(code, ret))
            }
        }
    }

    // --- 添字・スライス ---

    /// `usize` index into `base` for a Python index expression
    fn list_index(&mut self, base: &Value, index: &HirExpr) -> Result<String> {
        if let Some(k) = literal_int(index) {
            if k >= 0 {
                return Ok(k.to_string());
            }
            return Ok(format!("{}.len() - {}", base.atom(), -k));
        }
        let idx = self.expr(index)?;
        if known_non_negative(index) || matches!(idx.ty, Type::Bool) {
            return Ok(idx.as_usize());
        }
        self.ctx.use_helper(Helper::Index);
        Ok(format!("py_index({}, {}.len())", idx.as_i64(), base.atom()))
    }

    fn subscript(&mut self, value: &HirExpr, index: &HirExpr) -> Result<Value> {
        let recv = self.expr(value)?;
        let recv = if recv.form == Form::Iter {
            Value::owned(recv.into_owned(), recv.ty)
        } else {
            recv
        };
        match recv.ty.clone() {
            Type::Tuple(items) => {
                let Some(k) = literal_int(index) else {
                    return Err(DepylerError::unsupported(
                        index.pos,
                        "tuple index must be an integer literal",
                    ));
                };
                let idx = if k < 0 { items.len() as i64 + k } else { k };
                let ty = usize::try_from(idx)
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .ok_or_else(|| {
                        DepylerError::unsupported(index.pos, "tuple index out of range")
                    })?;
                Ok(Value::new(format!("{}.{idx}", recv.atom()), ty, Form::Place))
            }
            Type::List(elem) => {
                if let Some(route) = self
                    .ctx
                    .implicit_route(ErrorTaxon::IndexError, "list index out of range")
                {
                    let i = self.expr(index)?;
                    let r = recv.atom();
                    let code = format!(
                        "{{ let _i: i64 = {}; match usize::try_from(if _i < 0 {{ {r}.len() as i64 + _i }} else {{ _i }}).ok().and_then(|_k| {r}.get(_k)) {{ Some(_v) => _v.clone(), None => {route} }} }}",
                        i.as_i64()
                    );
                    return Ok(Value::owned(code, *elem));
                }
                let idx = self.list_index(&recv, index)?;
                Ok(Value::new(format!("{}[{idx}]", recv.atom()), *elem, Form::Place))
            }
            Type::Str => {
                let r = recv.atom();
                let code = match literal_int(index) {
                    Some(k) if k >= 0 => format!(
                        "{r}.chars().nth({k}).map(|_c| _c.to_string()).expect(\"IndexError: string index out of range\")"
                    ),
                    _ => {
                        let i = self.expr(index)?;
                        self.ctx.use_helper(Helper::Index);
                        format!(
                            "{r}.chars().nth(py_index({}, {r}.chars().count())).map(|_c| _c.to_string()).unwrap_or_default()",
                            i.as_i64()
                        )
                    }
                };
                Ok(Value::owned(code, Type::Str))
            }
            Type::Bytes => {
                let idx = self.list_index(&recv, index)?;
                Ok(Value::owned(format!("({}[{idx}] as i64)", recv.atom()), Type::Int))
            }
            Type::Dict(_, v) => {
                let key = self.expr(index)?;
                if self.fills_missing_keys(value) {
                    return Ok(Value::owned(
                        format!("{}.get({}).cloned().unwrap_or_default()", recv.atom(), key.as_key()),
                        *v,
                    ));
                }
                if let Some(route) = self
                    .ctx
                    .implicit_route(ErrorTaxon::KeyError, "key not found")
                {
                    let code = format!(
                        "match {}.get({}) {{ Some(_v) => _v.clone(), None => {route} }}",
                        recv.atom(),
                        key.as_key()
                    );
                    return Ok(Value::owned(code, *v));
                }
                let k = match key.form {
                    Form::Literal | Form::Borrowed => key.code.clone(),
                    _ => format!("&{}", key.atom()),
                };
                Ok(Value::new(format!("{}[{k}]", recv.atom()), *v, Form::Place))
            }
            Type::Native(n) if n == "json.Value" => {
                let key = self.expr(index)?;
                let k = match key.ty {
                    Type::Str => key.as_str_ref(),
                    _ => key.as_usize(),
                };
                Ok(Value::new(format!("{}[{k}]", recv.atom()), recv.ty, Form::Place))
            }
            ty => Err(DepylerError::unsupported(
                index.pos,
                format!("subscript on a value of type {ty}"),
            )),
        }
    }

    fn slice(
        &mut self,
        e: &HirExpr,
        value: &HirExpr,
        lower: Option<&HirExpr>,
        upper: Option<&HirExpr>,
        step: Option<&HirExpr>,
    ) -> Result<Value> {
        let recv = self.expr(value)?;
        let r = recv.atom();
        let is_str = matches!(recv.ty, Type::Str);
        if !matches!(recv.ty, Type::Str | Type::List(_) | Type::Bytes) {
            return Err(DepylerError::unsupported(
                e.pos,
                format!("slice of a value of type {}", recv.ty),
            ));
        }
        let step_lit = step.map(literal_int);
        let lit_lower = lower.map(literal_int);
        let lit_upper = upper.map(literal_int);

        // [::-1]
        if lower.is_none() && upper.is_none() && step_lit == Some(Some(-1)) {
            if is_str {
                return Ok(Value::owned(
                    format!("{r}.chars().rev().collect::<String>()"),
                    Type::Str,
                ));
            }
            return Ok(Value::owned(
                format!("{r}.iter().rev().cloned().collect::<Vec<_>>()"),
                recv.ty,
            ));
        }

        let unit_step = step.is_none() || step_lit == Some(Some(1));
        if unit_step {
            match (lit_lower, lit_upper) {
                (None, None) => return Ok(Value::owned(recv.into_owned(), recv.ty)),
                (Some(Some(a)), None) if a >= 0 => {
                    let code = if is_str {
                        format!("{r}.chars().skip({a}).collect::<String>()")
                    } else {
                        format!("{r}[{a}.min({r}.len())..].to_vec()")
                    };
                    return Ok(Value::owned(code, recv.ty));
                }
                (None, Some(Some(b))) if b >= 0 => {
                    let code = if is_str {
                        format!("{r}.chars().take({b}).collect::<String>()")
                    } else {
                        format!("{r}[..{b}.min({r}.len())].to_vec()")
                    };
                    return Ok(Value::owned(code, recv.ty));
                }
                _ => {}
            }
        }

        self.ctx.use_helper(Helper::SliceIndices);
        let bound = |this: &mut Self, b: Option<&HirExpr>| -> Result<String> {
            match b {
                Some(x) => Ok(format!("Some({})", this.expr(x)?.as_i64())),
                None => Ok("None".to_string()),
            }
        };
        let lo = bound(self, lower)?;
        let hi = bound(self, upper)?;
        let st = match step {
            Some(s) => self.expr(s)?.as_i64(),
            None => "1".to_string(),
        };
        let code = if is_str {
            format!(
                "{{ let _c: Vec<char> = {r}.chars().collect(); py_slice_indices(_c.len(), {lo}, {hi}, {st}).into_iter().map(|_i| _c[_i]).collect::<String>() }}"
            )
        } else {
            format!(
                "py_slice_indices({r}.len(), {lo}, {hi}, {st}).into_iter().map(|_i| {r}[_i].clone()).collect::<Vec<_>>()"
            )
        };
        Ok(Value::owned(code, recv.ty))
    }

    // --- 演算子 ---

    /// `&[T]` view of a list-like operand
    fn slice_view(v: &Value) -> String {
        match v.form {
            Form::Borrowed | Form::BorrowedMut => v.code.clone(),
            Form::Iter => format!("&{}.collect::<Vec<_>>()[..]", v.atom()),
            _ => format!("&{}[..]", v.atom()),
        }
    }

    fn binop(&mut self, e: &HirExpr, op: HirBinOp, left: &HirExpr, right: &HirExpr) -> Result<Value> {
        if op == HirBinOp::Mod && left.ty == Type::Str {
            return self.percent_format(left, right);
        }
        // [x] * n
        if op == HirBinOp::Mul {
            if let HirExprKind::List(items) = &left.kind {
                if items.len() == 1 && !matches!(items[0].kind, HirExprKind::Starred(_)) {
                    let elem_ty = e.ty.element();
                    let item = self.expr(&items[0])?;
                    let item = if elem_ty.contains_unknown() {
                        item.into_owned()
                    } else {
                        self.coerce(item, &elem_ty)?
                    };
                    let n = self.expr(right)?;
                    return Ok(Value::owned(format!("vec![{item}; {}]", n.as_usize()), e.ty.clone()));
                }
            }
        }
        let l = self.expr(left)?;
        let r = self.expr(right)?;
        let lt = l.ty.clone();
        let rt = r.ty.clone();

        match (op, &lt, &rt) {
            (HirBinOp::Add, Type::Str, _) | (HirBinOp::Add, _, Type::Str) => {
                return Ok(Value::owned(
                    format!("format!(\"{{}}{{}}\", {}, {})", str_arg(&l), str_arg(&r)),
                    Type::Str,
                ));
            }
            (HirBinOp::Add, Type::List(_), Type::List(_)) | (HirBinOp::Add, Type::Bytes, Type::Bytes) => {
                let ty = if e.ty.contains_unknown() { lt.clone() } else { e.ty.clone() };
                return Ok(Value::owned(
                    format!("[{}, {}].concat()", Self::slice_view(&l), Self::slice_view(&r)),
                    ty,
                ));
            }
            (HirBinOp::Mul, Type::Str, Type::Int | Type::Bool) => {
                return Ok(Value::owned(format!("{}.repeat({})", l.atom(), r.as_usize()), Type::Str));
            }
            (HirBinOp::Mul, Type::Int | Type::Bool, Type::Str) => {
                return Ok(Value::owned(format!("{}.repeat({})", r.atom(), l.as_usize()), Type::Str));
            }
            (HirBinOp::Mul, Type::List(elem), Type::Int | Type::Bool) => {
                let code = if elem.is_copy() {
                    format!("{}.repeat({})", l.atom(), r.as_usize())
                } else {
                    format!(
                        "{{ let _v = {}; (0..{}).flat_map(|_| _v.iter().cloned()).collect::<Vec<_>>() }}",
                        Self::slice_view(&l),
                        r.as_usize()
                    )
                };
                return Ok(Value::owned(code, lt.clone()));
            }
            (HirBinOp::Sub | HirBinOp::BitOr | HirBinOp::BitAnd | HirBinOp::BitXor, Type::Set(_), Type::Set(_)) => {
                let method = match op {
                    HirBinOp::Sub => "difference",
                    HirBinOp::BitOr => "union",
                    HirBinOp::BitAnd => "intersection",
                    _ => "symmetric_difference",
                };
                self.ctx.note_type(&lt);
                return Ok(Value::owned(
                    format!("{}.{method}({}).cloned().collect::<HashSet<_>>()", l.atom(), r.as_ref()),
                    lt.clone(),
                ));
            }
            (HirBinOp::BitOr, Type::Dict(_, _), Type::Dict(_, _)) => {
                return Ok(Value::owned(
                    format!("{{ let mut _m = {}; _m.extend({}); _m }}", l.into_owned(), r.into_owned()),
                    lt.clone(),
                ));
            }
            _ => {}
        }

        let float = matches!(lt, Type::Float) || matches!(rt, Type::Float) || e.ty == Type::Float;
        let result_ty = if !e.ty.contains_unknown() {
            e.ty.clone()
        } else if float {
            Type::Float
        } else {
            Type::Int
        };
        let a = if float { l.as_f64() } else { l.as_i64() };
        let b = if float { r.as_f64() } else { r.as_i64() };
        let (pa, pb) = (parenthesize(&a), parenthesize(&b));

        let code = match op {
            HirBinOp::Div => {
                let a = l.as_f64();
                let b = r.as_f64();
                match self
                    .ctx
                    .implicit_route(ErrorTaxon::ZeroDivisionError, "division by zero")
                {
                    Some(route) => format!(
                        "{{ let _d = {b}; if _d == 0.0 {{ {route} }} {} / _d }}",
                        parenthesize(&a)
                    ),
                    None => format!("{} / {}", parenthesize(&a), parenthesize(&b)),
                }
            }
            HirBinOp::FloorDiv | HirBinOp::Mod => {
                let floor = op == HirBinOp::FloorDiv;
                let zero = if float { "0.0" } else { "0" };
                let direct = !float && known_non_negative(left) && known_non_negative(right)
                    && literal_int(right).map_or(false, |k| k > 0);
                if direct {
                    format!("{pa} {} {pb}", if floor { "/" } else { "%" })
                } else {
                    let (helper, name) = match (float, floor) {
                        (false, true) => (Helper::FloorDiv, "py_floor_div"),
                        (false, false) => (Helper::Mod, "py_mod"),
                        (true, true) => (Helper::FloatFloorDiv, "py_float_floor_div"),
                        (true, false) => (Helper::FloatMod, "py_float_mod"),
                    };
                    self.ctx.use_helper(helper);
                    let msg = if floor {
                        "integer division or modulo by zero"
                    } else {
                        "integer modulo by zero"
                    };
                    match self.ctx.implicit_route(ErrorTaxon::ZeroDivisionError, msg) {
                        Some(route) => format!(
                            "{{ let _d = {b}; if _d == {zero} {{ {route} }} {name}({a}, _d) }}"
                        ),
                        None => format!("{name}({a}, {b})"),
                    }
                }
            }
            HirBinOp::Pow => {
                if !float && is_integer_exponent(right) {
                    format!(
                        "i64::checked_pow({a}, {}).expect(\"OverflowError: integer power overflow\")",
                        match literal_int(right) {
                            Some(k) => k.to_string(),
                            None => format!("{} as u32", parenthesize(&b)),
                        }
                    )
                } else {
                    let base = l.as_f64();
                    let pow = match literal_int(right) {
                        Some(k) => format!("{}.powi({k})", method_receiver(&base, &Type::Float)),
                        None => format!("{}.powf({})", method_receiver(&base, &Type::Float), r.as_f64()),
                    };
                    if result_ty == Type::Int {
                        format!("({pow} as i64)")
                    } else {
                        pow
                    }
                }
            }
            HirBinOp::Add | HirBinOp::Sub | HirBinOp::Mul => {
                format!("{pa} {} {pb}", op.rust_token())
            }
            HirBinOp::BitAnd | HirBinOp::BitOr | HirBinOp::BitXor => {
                if lt == Type::Bool && rt == Type::Bool {
                    format!("{} {} {}", parenthesize(&l.scalar()), op.rust_token(), parenthesize(&r.scalar()))
                } else {
                    format!("{pa} {} {pb}", op.rust_token())
                }
            }
            HirBinOp::LShift | HirBinOp::RShift => format!("{pa} {} {pb}", op.rust_token()),
        };
        Ok(Value::owned(code, result_ty))
    }

    fn unary(&mut self, op: HirUnaryOp, operand: &HirExpr) -> Result<Value> {
        match op {
            HirUnaryOp::Not => {
                let c = self.cond(operand)?;
                Ok(Value::owned(format!("!{}", parenthesize(&c)), Type::Bool))
            }
            HirUnaryOp::Neg => {
                if let HirExprKind::Int { value, text } = &operand.kind {
                    return Ok(Value::owned(format!("-{}", super::int_text(text, *value)), Type::Int));
                }
                let v = self.expr(operand)?;
                let code = match v.ty {
                    Type::Bool => format!("-({} as i64)", v.scalar()),
                    _ => format!("-{}", parenthesize(&v.scalar())),
                };
                let ty = if v.ty == Type::Bool { Type::Int } else { v.ty };
                Ok(Value::owned(code, ty))
            }
            HirUnaryOp::Pos => {
                let v = self.expr(operand)?;
                Ok(Value::owned(v.scalar(), v.ty))
            }
            HirUnaryOp::BitNot => {
                let v = self.expr(operand)?;
                Ok(Value::owned(format!("!{}", parenthesize(&v.as_i64())), Type::Int))
            }
        }
    }

    // --- 比較 ---

    pub(super) fn compare(&mut self, op: HirCmpOp, left: &HirExpr, right: &HirExpr) -> Result<String> {
        let none_cmp = matches!(op, HirCmpOp::Is | HirCmpOp::IsNot | HirCmpOp::Eq | HirCmpOp::NotEq)
            && (right.is_none_literal() || left.is_none_literal());
        if none_cmp {
            let subject = if right.is_none_literal() { left } else { right };
            let is = matches!(op, HirCmpOp::Is | HirCmpOp::Eq);
            let v = self.expr(subject)?;
            return Ok(match &v.ty {
                Type::Optional(_) => {
                    format!("{}.{}()", v.atom(), if is { "is_none" } else { "is_some" })
                }
                Type::Native(n) if n == "json.Value" => {
                    let test = format!("{}.is_null()", v.atom());
                    if is { test } else { format!("!{test}") }
                }
                Type::None => (if is { "true" } else { "false" }).to_string(),
                _ => (if is { "false" } else { "true" }).to_string(),
            });
        }
        match op {
            HirCmpOp::In | HirCmpOp::NotIn => {
                let test = self.membership(left, right)?;
                Ok(if op == HirCmpOp::NotIn {
                    format!("!{}", parenthesize(&test))
                } else {
                    test
                })
            }
            _ => {
                let l = self.expr(left)?;
                let r = self.expr(right)?;
                Ok(self.compare_values(op, &l, &r))
            }
        }
    }

    pub(super) fn compare_values(&mut self, op: HirCmpOp, l: &Value, r: &Value) -> String {
        let tok = op.rust_token();
        let eq = !op.is_ordering();
        match (&l.ty, &r.ty) {
            (Type::Optional(inner), other) if eq && !matches!(other, Type::Optional(_) | Type::None) => {
                if **inner == Type::Str {
                    format!("{}.as_deref() {tok} Some({})", l.atom(), r.as_str_ref())
                } else {
                    format!("{} {tok} Some({})", l.atom(), r.into_owned())
                }
            }
            (other, Type::Optional(inner)) if eq && !matches!(other, Type::Optional(_) | Type::None) => {
                if **inner == Type::Str {
                    format!("Some({}) {tok} {}.as_deref()", l.as_str_ref(), r.atom())
                } else {
                    format!("Some({}) {tok} {}", l.into_owned(), r.atom())
                }
            }
            (a, b) if a.is_numeric() && b.is_numeric() => {
                if matches!(a, Type::Float) || matches!(b, Type::Float) {
                    format!("{} {tok} {}", parenthesize(&l.as_f64()), parenthesize(&r.as_f64()))
                } else if a != b {
                    format!("{} {tok} {}", parenthesize(&l.as_i64()), parenthesize(&r.as_i64()))
                } else {
                    format!("{} {tok} {}", parenthesize(&l.scalar()), parenthesize(&r.scalar()))
                }
            }
            (Type::Str, _) | (_, Type::Str) if eq => {
                format!("{} {tok} {}", str_operand(l), str_operand(r))
            }
            (Type::Str, _) | (_, Type::Str) => {
                format!("{} {tok} {}", str_view(l), str_view(r))
            }
            _ => {
                let side = |v: &Value| match v.form {
                    Form::Iter => format!("{}.collect::<Vec<_>>()", v.atom()),
                    _ => parenthesize(&v.scalar()),
                };
                format!("{} {tok} {}", side(l), side(r))
            }
        }
    }

    fn membership(&mut self, left: &HirExpr, right: &HirExpr) -> Result<String> {
        // x in (a, b, c) / x in [a, b]
        if let HirExprKind::Tuple(items) | HirExprKind::List(items) = &right.kind {
            let item = self.expr(left)?;
            let mut elems = Vec::new();
            for it in items {
                let v = self.expr(it)?;
                elems.push(match (&item.ty, v.form) {
                    (Type::Str, Form::Literal) => v.code,
                    (Type::Str, _) => v.as_str_ref(),
                    (Type::Float, _) => v.as_f64(),
                    _ => v.into_owned(),
                });
            }
            let needle = match item.ty {
                Type::Str => format!("&{}", str_view(&item)),
                Type::Float => format!("&{}", parenthesize(&item.as_f64())),
                _ => item.as_ref(),
            };
            return Ok(format!("[{}].contains({needle})", elems.join(", ")));
        }
        let container = self.expr(right)?;
        let item = self.expr(left)?;
        let c = container.atom();
        Ok(match container.ty.unwrap_optional() {
            Type::Str => format!("{c}.contains({})", item.as_str_ref()),
            Type::Dict(_, _) => format!("{c}.contains_key({})", item.as_key()),
            Type::Set(_) => format!("{c}.contains({})", item.as_key()),
            Type::Native(n) if n == "json.Value" => {
                format!("{c}.get({}).is_some()", item.as_str_ref())
            }
            _ if container.form == Form::Iter => {
                let needle = if item.ty == Type::Str {
                    str_operand(&item)
                } else {
                    parenthesize(&item.scalar())
                };
                format!("{c}.any(|_v| _v == {needle})")
            }
            Type::List(elem) if **elem == Type::Str => {
                format!("{c}.iter().any(|_v| _v == {})", item.as_str_ref())
            }
            Type::List(elem) if **elem == Type::Float && item.ty == Type::Int => {
                format!("{c}.contains(&{})", parenthesize(&item.as_f64()))
            }
            _ => format!("{c}.contains({})", item.as_ref()),
        })
    }

    // --- 論理演算 ---

    fn bool_op(&mut self, e: &HirExpr, op: HirBoolOp, left: &HirExpr, right: &HirExpr) -> Result<Value> {
        if e.ty == Type::Bool || e.ty.contains_unknown() {
            let code = self.bool_cond(op, left, right)?;
            return Ok(Value::owned(code, Type::Bool));
        }
        // 値を返す and / or
        let l = self.expr(left)?;
        let target = e.ty.clone();
        let tmp = self.ctx.fresh("t");
        let held = Value::new(tmp.clone(), l.ty.clone(), Form::Place);
        let test = self.truthy(&held);
        let r = self.expr(right)?;
        let r_code = self.coerce(r, &target)?;
        let code = match (op, &l.ty) {
            (HirBoolOp::Or, Type::Optional(inner)) if target == **inner => {
                let inner_held = Value::new(tmp.clone(), (**inner).clone(), Form::Place);
                let inner_test = self.truthy(&inner_held);
                format!(
                    "match {} {{ Some({tmp}) if {inner_test} => {tmp}, _ => {r_code} }}",
                    l.into_owned()
                )
            }
            (HirBoolOp::Or, _) => {
                let keep = self.coerce(held.clone(), &target)?;
                format!("{{ let {tmp} = {}; if {test} {{ {keep} }} else {{ {r_code} }} }}", l.into_owned())
            }
            (HirBoolOp::And, _) => {
                let keep = self.coerce(held.clone(), &target)?;
                format!("{{ let {tmp} = {}; if {test} {{ {r_code} }} else {{ {keep} }} }}", l.into_owned())
            }
        };
        Ok(Value::owned(code, target))
    }

    /// Boolean `and` / `or` with `Option` narrowing on the left
    fn bool_cond(&mut self, op: HirBoolOp, left: &HirExpr, right: &HirExpr) -> Result<String> {
        match op {
            HirBoolOp::And => {
                if let Some(n) = narrowed_in_body(left) {
                    if let Some(code) = self.narrowed_and(left, &n, right)? {
                        return Ok(code);
                    }
                }
            }
            HirBoolOp::Or => {
                if let Some(n) = narrowed_in_else(left) {
                    if let Some(code) = self.narrowed_or(left, &n, right)? {
                        return Ok(code);
                    }
                }
            }
        }
        let l = self.cond(left)?;
        let r = self.cond(right)?;
        let tok = match op {
            HirBoolOp::And => "&&",
            HirBoolOp::Or => "||",
        };
        Ok(format!("{} {tok} {}", bool_operand(&l, tok), bool_operand(&r, tok)))
    }

    /// `matches!(&x, Some(x) if rhs)`
    fn narrowed_and(&mut self, left: &HirExpr, n: &Narrowing, right: &HirExpr) -> Result<Option<String>> {
        let Some(subject) = self.ctx.lookup(&n.name).cloned() else {
            return Ok(None);
        };
        let ident = rust_ident(&n.name);
        let pattern = self.narrow_pattern(n, &ident);
        self.ctx.push_scope();
        self.ctx.declare(
            &n.name,
            Binding {
                code: format!("(*{ident})"),
                ty: n.ty.clone(),
                form: Form::Place,
            },
        );
        let result = (|| -> Result<String> {
            let mut guards = Vec::new();
            if left.as_name().is_some() {
                let inner = Value::new(format!("(*{ident})"), n.ty.clone(), Form::Place);
                let t = self.truthy(&inner);
                if t != "true" {
                    guards.push(t);
                }
            }
            guards.push(self.cond(right)?);
            Ok(guards.join(" && "))
        })();
        self.ctx.pop_scope();
        let guard = result?;
        Ok(Some(format!("matches!(&{}, {pattern} if {guard})", subject.code)))
    }

    /// `match &x { Some(x) => rhs, _ => true }`
    fn narrowed_or(&mut self, left: &HirExpr, n: &Narrowing, right: &HirExpr) -> Result<Option<String>> {
        let Some(subject) = self.ctx.lookup(&n.name).cloned() else {
            return Ok(None);
        };
        let ident = rust_ident(&n.name);
        let pattern = self.narrow_pattern(n, &ident);
        self.ctx.push_scope();
        self.ctx.declare(
            &n.name,
            Binding {
                code: format!("(*{ident})"),
                ty: n.ty.clone(),
                form: Form::Place,
            },
        );
        let result = (|| -> Result<(String, String)> {
            // `not x or ...` は中身が偽のときも右辺を見ない
            let guard = if matches!(left.kind, HirExprKind::UnaryOp { .. }) {
                let inner = Value::new(format!("(*{ident})"), n.ty.clone(), Form::Place);
                let t = self.truthy(&inner);
                if t == "true" {
                    String::new()
                } else {
                    format!(" if {t}")
                }
            } else {
                String::new()
            };
            Ok((guard, self.cond(right)?))
        })();
        self.ctx.pop_scope();
        let (guard, rhs) = result?;
        Ok(Some(format!(
            "match &{} {{ {pattern}{guard} => {rhs}, _ => true }}",
            subject.code
        )))
    }

    /// `Some(x)` / `IntOrStr::Int(x)`
    pub(super) fn narrow_pattern(&mut self, n: &Narrowing, ident: &str) -> String {
        match &n.kind {
            NarrowKind::Some => format!("Some({ident})"),
            NarrowKind::Variant(members) => {
                self.ctx.note_type(&Type::Union(members.clone()));
                format!(
                    "{}::{}({ident})",
                    union_enum_name(members),
                    variant_name(&n.ty)
                )
            }
        }
    }

    /// Boolean condition for `if` / `while` / guards
    pub(super) fn cond(&mut self, e: &HirExpr) -> Result<String> {
        match &e.kind {
            HirExprKind::BoolOp { op, left, right } => self.bool_cond(*op, left, right),
            HirExprKind::UnaryOp {
                op: HirUnaryOp::Not,
                operand,
            } => {
                let c = self.cond(operand)?;
                Ok(format!("!{}", parenthesize(&c)))
            }
            HirExprKind::Compare { op, left, right } => self.compare(*op, left, right),
            _ => {
                let v = self.expr(e)?;
                Ok(self.truthy(&v))
            }
        }
    }

    /// Python truthiness of a value
    pub(super) fn truthy(&self, v: &Value) -> String {
        let atom = v.atom();
        match &v.ty {
            Type::Bool => v.scalar(),
            Type::Int => format!("{} != 0", parenthesize(&v.scalar())),
            Type::Float => format!("{} != 0.0", parenthesize(&v.scalar())),
            Type::Str | Type::List(_) | Type::Dict(_, _) | Type::Set(_) | Type::Bytes => {
                if v.form == Form::Iter {
                    format!("{atom}.next().is_some()")
                } else {
                    format!("!{atom}.is_empty()")
                }
            }
            Type::Optional(inner) => match &**inner {
                Type::Bool => format!("{atom}.unwrap_or(false)"),
                Type::Int => format!("{atom}.map_or(false, |_v| _v != 0)"),
                Type::Float => format!("{atom}.map_or(false, |_v| _v != 0.0)"),
                Type::Str | Type::List(_) | Type::Dict(_, _) | Type::Set(_) | Type::Bytes => {
                    format!("{atom}.as_ref().map_or(false, |_v| !_v.is_empty())")
                }
                _ => format!("{atom}.is_some()"),
            },
            Type::None => "false".to_string(),
            Type::Native(n) if n == "json.Value" => format!("!{atom}.is_null()"),
            Type::Tuple(items) if items.is_empty() => "false".to_string(),
            Type::Class(c) => {
                if let Some((path, _)) = self.ctx.find_method(c, "__bool__") {
                    format!("{atom}{path}.__bool__()")
                } else if let Some((path, _)) = self.ctx.find_method(c, "__len__") {
                    format!("{atom}{path}.__len__() != 0")
                } else {
                    "true".to_string()
                }
            }
            Type::Unknown | Type::Generic(_) => v.code.clone(),
            _ => "true".to_string(),
        }
    }

    // --- 条件式・一時束縛 ---

    fn if_expr(&mut self, e: &HirExpr, test: &HirExpr, body: &HirExpr, orelse: &HirExpr) -> Result<Value> {
        let target = e.ty.clone();
        if let Some(n) = narrowed_in_body(test) {
            if let Some(code) = self.narrowed_if_expr(&n, test, body, orelse, &target)? {
                return Ok(Value::owned(code, target));
            }
        }
        if let Some(n) = narrowed_in_else(test) {
            if matches!(test.kind, HirExprKind::Compare { .. }) {
                if let Some(code) = self.narrowed_if_expr(&n, test, orelse, body, &target)? {
                    return Ok(Value::owned(code, target));
                }
            }
        }
        let c = self.cond(test)?;
        let b = self.arm(body, &target)?;
        let o = self.arm(orelse, &target)?;
        Ok(Value::owned(format!("if {c} {{ {b} }} else {{ {o} }}"), target))
    }

    fn arm(&mut self, e: &HirExpr, target: &Type) -> Result<String> {
        let v = self.expr(e)?;
        if target.contains_unknown() {
            Ok(v.into_owned())
        } else {
            self.coerce(v, target)
        }
    }

    /// `if let Some(x) = &x { some_arm } else { none_arm }`
    fn narrowed_if_expr(
        &mut self,
        n: &Narrowing,
        test: &HirExpr,
        some_arm: &HirExpr,
        none_arm: &HirExpr,
        target: &Type,
    ) -> Result<Option<String>> {
        let Some(subject) = self.ctx.lookup(&n.name).cloned() else {
            return Ok(None);
        };
        let ident = rust_ident(&n.name);
        let pattern = self.narrow_pattern(n, &ident);
        let scrutinee = if test.as_name().is_some() {
            let held = Value::new("(**_v)", n.ty.clone(), Form::Place);
            format!("{}.as_ref().filter(|_v| {})", subject.code, self.truthy(&held))
        } else {
            format!("&{}", subject.code)
        };
        self.ctx.push_scope();
        self.ctx.declare(
            &n.name,
            Binding {
                code: format!("(*{ident})"),
                ty: n.ty.clone(),
                form: Form::Place,
            },
        );
        let some = self.arm(some_arm, target);
        self.ctx.pop_scope();
        let some = some?;
        let none = self.arm(none_arm, target)?;
        Ok(Some(format!(
            "if let {pattern} = {scrutinee} {{ {some} }} else {{ {none} }}"
        )))
    }

    fn temp_bind(&mut self, name: &str, value: &HirExpr, body: &HirExpr) -> Result<Value> {
        let v = self.expr(value)?;
        let (init, binding) = match v.form {
            Form::Owned | Form::Iter => (
                v.into_owned(),
                Binding { code: name.to_string(), ty: v.ty.clone(), form: Form::Place },
            ),
            Form::Literal => (
                v.code.clone(),
                Binding { code: name.to_string(), ty: v.ty.clone(), form: Form::Literal },
            ),
            Form::Borrowed | Form::BorrowedMut => (
                v.code.clone(),
                Binding { code: name.to_string(), ty: v.ty.clone(), form: Form::Borrowed },
            ),
            Form::Place if v.ty.is_copy() => (
                v.code.clone(),
                Binding { code: name.to_string(), ty: v.ty.clone(), form: Form::Place },
            ),
            Form::Place => (
                format!("&{}", v.atom()),
                Binding { code: format!("(*{name})"), ty: v.ty.clone(), form: Form::Place },
            ),
        };
        self.ctx.push_scope();
        self.ctx.declare(name, binding);
        let inner = self.expr(body);
        self.ctx.pop_scope();
        let inner = inner?;
        let ty = inner.ty.clone();
        let out = if ty.is_copy() { inner.scalar() } else { inner.into_owned() };
        Ok(Value::owned(format!("{{ let {name} = {init}; {out} }}"), ty))
    }

    fn named_expr(&mut self, target: &str, value: &HirExpr) -> Result<Value> {
        let Some(b) = self.ctx.lookup(target).cloned() else {
            return Err(DepylerError::Internal(format!(
                "assignment expression target '{target}' was not declared"
            )));
        };
        let ty = if b.ty.contains_unknown() { value.ty.clone() } else { b.ty.clone() };
        let v = self.expr(value)?;
        let rhs = self.coerce(v, &ty)?;
        let read = if ty.is_copy() {
            b.code.clone()
        } else {
            format!("{}.clone()", b.code)
        };
        Ok(Value::owned(format!("{{ {} = {rhs}; {read} }}", b.code), ty))
    }

    fn await_expr(&mut self, e: &HirExpr, inner: &HirExpr) -> Result<Value> {
        if let HirExprKind::Call { func, .. } = &inner.kind {
            if func == "asyncio.gather" {
                return self.expr(inner);
            }
            let fallible = !self.ctx.is_declared(func)
                && self
                    .ctx
                    .lookup_fn(func)
                    .map_or(false, |s| s.is_async && s.can_fail);
            if fallible {
                let v = self.expr(inner)?;
                let code = self.ctx.unwrap_fallible(&format!("{}.await", v.atom()));
                return Ok(Value::owned(code, v.ty));
            }
        }
        if let HirExprKind::MethodCall { receiver, method, .. } = &inner.kind {
            if let Type::Class(c) = &receiver.ty {
                let fallible = self
                    .ctx
                    .find_method(c, method)
                    .map_or(false, |(_, s)| s.is_async && s.can_fail);
                if fallible {
                    let v = self.expr(inner)?;
                    let code = self.ctx.unwrap_fallible(&format!("{}.await", v.atom()));
                    return Ok(Value::owned(code, v.ty));
                }
            }
        }
        let v = self.expr(inner)?;
        let ty = if e.ty.contains_unknown() { v.ty.clone() } else { e.ty.clone() };
        Ok(Value::owned(format!("{}.await", v.atom()), ty))
    }

    // --- コレクションリテラル ---

    fn list_literal(&mut self, e: &HirExpr, items: &[HirExpr]) -> Result<Value> {
        let elem = e.ty.element();
        if items.is_empty() {
            return Ok(Value::owned("Vec::new()", e.ty.clone()));
        }
        if items.iter().any(|i| matches!(i.kind, HirExprKind::Starred(_))) {
            let mut parts = Vec::new();
            for item in items {
                if let HirExprKind::Starred(inner) = &item.kind {
                    let v = self.expr(inner)?;
                    parts.push(format!("_v.extend({});", v.iter_owned()));
                } else {
                    let code = self.element(item, &elem)?;
                    parts.push(format!("_v.push({code});"));
                }
            }
            return Ok(Value::owned(
                format!("{{ let mut _v = Vec::new(); {} _v }}", parts.join(" ")),
                e.ty.clone(),
            ));
        }
        let codes = items
            .iter()
            .map(|i| self.element(i, &elem))
            .collect::<Result<Vec<_>>>()?;
        Ok(Value::owned(format!("vec![{}]", codes.join(", ")), e.ty.clone()))
    }

    /// Element coerced to the container's element type
    fn element(&mut self, item: &HirExpr, elem: &Type) -> Result<String> {
        let v = self.expr(item)?;
        if elem.contains_unknown() {
            Ok(v.into_owned())
        } else {
            self.coerce(v, elem)
        }
    }

    fn tuple_literal(&mut self, e: &HirExpr, items: &[HirExpr]) -> Result<Value> {
        let tys = match &e.ty {
            Type::Tuple(ts) if ts.len() == items.len() => ts.clone(),
            _ => vec![Type::Unknown; items.len()],
        };
        let mut codes = Vec::new();
        for (item, ty) in items.iter().zip(&tys) {
            codes.push(self.element(item, ty)?);
        }
        let code = if codes.len() == 1 {
            format!("({},)", codes[0])
        } else {
            format!("({})", codes.join(", "))
        };
        Ok(Value::owned(code, e.ty.clone()))
    }

    fn set_literal(&mut self, e: &HirExpr, items: &[HirExpr]) -> Result<Value> {
        self.ctx.note_type(&e.ty);
        let elem = e.ty.element();
        if items.is_empty() {
            return Ok(Value::owned("HashSet::new()", e.ty.clone()));
        }
        let codes = items
            .iter()
            .map(|i| self.element(i, &elem))
            .collect::<Result<Vec<_>>>()?;
        Ok(Value::owned(
            format!("HashSet::from([{}])", codes.join(", ")),
            e.ty.clone(),
        ))
    }

    fn dict_literal(&mut self, e: &HirExpr, pairs: &[(HirExpr, HirExpr)]) -> Result<Value> {
        self.ctx.note_type(&e.ty);
        let (kt, vt) = match &e.ty {
            Type::Dict(k, v) => ((**k).clone(), (**v).clone()),
            _ => (Type::Unknown, Type::Unknown),
        };
        if pairs.is_empty() {
            return Ok(Value::owned("HashMap::new()", e.ty.clone()));
        }
        let mut codes = Vec::new();
        for (k, v) in pairs {
            let kc = self.element(k, &kt)?;
            let vc = self.element(v, &vt)?;
            codes.push(format!("({kc}, {vc})"));
        }
        Ok(Value::owned(
            format!("HashMap::from([{}])", codes.join(", ")),
            e.ty.clone(),
        ))
    }

    // --- 型合わせ ---

    /// Owned code of `v` shaped for a slot of type `target`
    pub(super) fn coerce(&mut self, v: Value, target: &Type) -> Result<String> {
        Ok(match target {
            Type::Unknown | Type::Generic(_) => v.into_owned(),
            Type::Optional(inner) => match &v.ty {
                Type::None => "None".to_string(),
                Type::Optional(_) | Type::Unknown => v.into_owned(),
                _ => format!("Some({})", self.coerce(v, inner)?),
            },
            Type::Float if matches!(v.ty, Type::Int | Type::Bool) => v.as_f64(),
            Type::Int if v.ty == Type::Bool => v.as_i64(),
            Type::Union(members)
                if !matches!(v.ty, Type::Union(_)) && !v.ty.contains_unknown() =>
            {
                self.ctx.note_type(target);
                let name = union_enum_name(members);
                let member = members
                    .iter()
                    .find(|m| variant_name(m) == variant_name(&v.ty))
                    .cloned();
                match member {
                    Some(m) => {
                        let inner = self.coerce(v, &m)?;
                        format!("{name}::{}({inner})", variant_name(&m))
                    }
                    // メンバにない型は表示文字列で受け皿に入れる
                    None => format!("{name}::{}({})", fallback_variant(members), self.to_str(&v)),
                }
            }
            Type::Callable { .. } => match v.form {
                Form::Owned if !v.code.starts_with("Box::new") => format!("Box::new({})", v.code),
                Form::Place => v.code.clone(),
                _ => v.into_owned(),
            },
            Type::List(elem) if v.form == Form::Iter => {
                let t = self.ctx.local_type(elem).unwrap_or_else(|| "_".to_string());
                format!("{}.collect::<Vec<{t}>>()", v.atom())
            }
            Type::Set(_) if v.form == Form::Iter => {
                self.ctx.note_type(target);
                format!("{}.collect::<HashSet<_>>()", v.atom())
            }
            Type::Dict(_, _) if v.form == Form::Iter => {
                self.ctx.note_type(target);
                format!("{}.collect::<HashMap<_, _>>()", v.atom())
            }
            Type::Str if v.form == Form::Iter => format!("{}.collect::<String>()", v.atom()),
            _ => v.into_owned(),
        })
    }
}

/// `Self::MAX` (文字列定数は `&str`)
fn class_attr_value(code: &str, ty: Type) -> Value {
    let form = if ty == Type::Str { Form::Literal } else { Form::Place };
    Value::new(code, ty, form)
}

/// Argument to `format!` for a string operand
fn str_arg(v: &Value) -> String {
    match v.form {
        Form::Iter => format!("{}.collect::<String>()", v.atom()),
        _ => v.code.clone(),
    }
}

/// `==` operand: `String` and `&str` compare either way round
fn str_operand(v: &Value) -> String {
    match v.form {
        Form::Iter => format!("{}.collect::<String>()", v.atom()),
        _ => v.atom(),
    }
}

/// `&str` view for ordering comparisons
fn str_view(v: &Value) -> String {
    match v.form {
        Form::Literal | Form::Borrowed | Form::BorrowedMut => v.atom(),
        Form::Iter => format!("{}.collect::<String>().as_str()", v.atom()),
        _ => format!("{}.as_str()", v.atom()),
    }
}

/// `a || b && c` の優先順位を崩さないよう異なる演算子は括弧で包む
fn bool_operand(code: &str, tok: &str) -> String {
    let other = if tok == "&&" { "||" } else { "&&" };
    if code.contains(other) || code.starts_with("match ") || code.starts_with("if ") {
        format!("({code})")
    } else {
        code.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_int_handles_negation() {
        let pos = SourcePos::unknown();
        let one = HirExpr::typed(
            HirExprKind::Int {
                value: 1,
                text: "1".to_string(),
            },
            Type::Int,
            pos,
        );
        let neg = HirExpr::typed(
            HirExprKind::UnaryOp {
                op: HirUnaryOp::Neg,
                operand: Box::new(one.clone()),
            },
            Type::Int,
            pos,
        );
        assert_eq!(literal_int(&one), Some(1));
        assert_eq!(literal_int(&neg), Some(-1));
    }

    #[test]
    fn test_str_views() {
        let lit = Value::new("\"a\"", Type::Str, Form::Literal);
        let place = Value::new("name", Type::Str, Form::Place);
        assert_eq!(str_view(&lit), "\"a\"");
        assert_eq!(str_view(&place), "name.as_str()");
        assert_eq!(str_operand(&place), "name");
    }

    #[test]
    fn test_bool_operand_parenthesizes_mixed_ops() {
        assert_eq!(bool_operand("a || b", "&&"), "(a || b)");
        assert_eq!(bool_operand("a && b", "&&"), "a && b");
    }
}
