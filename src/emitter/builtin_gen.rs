//! Built-in function lowering
//!
//! 型に応じて組み込み関数を Rust の式に展開する。イテレータを返すもの
//! (range, enumerate, zip, map, filter, reversed, iter) は `Form::Iter` の値になり、
//! 使う側が `collect` するか `for` で回す。

use super::context::Helper;
use super::value::{is_int_literal, method_receiver, parenthesize, Form, Value};
use super::RustEmitter;
use crate::error::{DepylerError, Result};
use crate::hir::*;
use crate::semantic::{iter_element, union_enum_name, variant_name, Type};
use crate::stdlib::{self, ErrorTaxon};

const EQUAL: &str = "std::cmp::Ordering::Equal";

/// `a.cmp(&b)` (浮動小数点を含むなら partial_cmp)
fn ordering(a: &str, b: &str, ty: &Type) -> String {
    if has_float(ty) || ty.contains_unknown() {
        format!("({a}).partial_cmp(&({b})).unwrap_or({EQUAL})")
    } else {
        format!("({a}).cmp(&({b}))")
    }
}

fn has_float(ty: &Type) -> bool {
    match ty {
        Type::Float => true,
        Type::Tuple(items) => items.iter().any(has_float),
        Type::Optional(t) | Type::List(t) => has_float(t),
        _ => false,
    }
}

/// 空の列に対する `min()` のエラー
fn empty_sequence(name: &str) -> String {
    format!(".expect(\"ValueError: {name}() arg is an empty sequence\")")
}

/// `"w"` → `w`
fn literal_text(v: &Value) -> Option<String> {
    if v.form != Form::Literal {
        return None;
    }
    v.code
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .map(str::to_string)
}

/// Python の型名 (`isinstance` の第 2 引数)
fn matches_type_name(ty: &Type, name: &str) -> Option<bool> {
    let hit = match (name, ty) {
        ("int", Type::Int)
        | ("float", Type::Float)
        | ("bool", Type::Bool)
        | ("str", Type::Str)
        | ("bytes", Type::Bytes)
        | ("list", Type::List(_))
        | ("tuple", Type::Tuple(_))
        | ("dict", Type::Dict(_, _))
        | ("set", Type::Set(_)) => true,
        (_, Type::Unknown | Type::Generic(_)) => return None,
        _ => false,
    };
    Some(hit)
}

impl RustEmitter<'_> {
    /// Built-in call with its HIR arguments
    ///
    /// キーワード引数やコールバックを取る形だけここで処理し、残りは
    /// 評価済みの値で `builtin_values` に渡す。
    pub(super) fn builtin(
        &mut self,
        e: &HirExpr,
        name: &str,
        args: &[HirExpr],
        kwargs: &[(String, HirExpr)],
    ) -> Result<Value> {
        let kw = |key: &str| kwargs.iter().find(|(k, _)| k == key).map(|(_, v)| v);
        match name {
            "print" => return self.print_call(e, args, kwargs),
            "isinstance" => return self.isinstance(e, args),
            "type" if args.len() == 1 => {
                let ty = args[0].ty.clone();
                return Ok(Value::new(
                    format!("\"{}\"", python_type_name(&ty)),
                    Type::Str,
                    Form::Literal,
                ));
            }
            "sorted" => {
                let Some(src) = args.first() else {
                    return Err(DepylerError::unsupported(e.pos, "sorted() without an iterable"));
                };
                let v = self.expr(src)?;
                let reverse = match kw("reverse") {
                    Some(r) => Some(self.cond(r)?),
                    None => None,
                };
                return self.sorted(v, kw("key"), reverse.as_deref(), &e.ty, e.pos);
            }
            "min" | "max" if kw("key").is_some() || kw("default").is_some() => {
                return self.extremum_keyed(e, name, args, kw("key"), kw("default"));
            }
            "map" if args.len() >= 2 => return self.map_call(e, &args[0], &args[1..]),
            "filter" if args.len() == 2 => return self.filter_call(e, &args[0], &args[1]),
            "enumerate" => {
                let start = match kw("start").or_else(|| args.get(1)) {
                    Some(s) => Some(self.expr(s)?),
                    None => None,
                };
                let Some(src) = args.first() else {
                    return Err(DepylerError::unsupported(e.pos, "enumerate() without an iterable"));
                };
                let v = self.expr(src)?;
                return Ok(self.enumerate(&v, start.as_ref()));
            }
            "dict" if !kwargs.is_empty() => {
                let mut pairs = Vec::new();
                let vt = match &e.ty {
                    Type::Dict(_, v) => (**v).clone(),
                    _ => Type::Unknown,
                };
                for (k, v) in kwargs {
                    let code = self.owned_expr(v, &vt)?;
                    pairs.push(format!("(\"{k}\".to_string(), {code})"));
                }
                self.ctx.note_type(&e.ty);
                return Ok(Value::owned(
                    format!("HashMap::from([{}])", pairs.join(", ")),
                    e.ty.clone(),
                ));
            }
            "open" => {
                let mut values = Vec::new();
                for a in args {
                    values.push(self.expr(a)?);
                }
                if let Some(mode) = kw("mode") {
                    let v = self.expr(mode)?;
                    values.truncate(1);
                    values.push(v);
                }
                return self.open_file(values, e.pos);
            }
            "int" if kw("base").is_some() => {
                let (Some(src), Some(base)) = (args.first(), kw("base")) else {
                    return Err(DepylerError::unsupported(e.pos, "int() without a value"));
                };
                let values = vec![self.expr(src)?, self.expr(base)?];
                return self.builtin_values(name, values, &e.ty, e.pos);
            }
            _ => {}
        }
        if let Some((k, _)) = kwargs.first() {
            return Err(DepylerError::unsupported(
                e.pos,
                format!("{name}() keyword argument '{k}'"),
            ));
        }
        let mut values = Vec::new();
        for a in args {
            if let HirExprKind::Starred(_) = a.kind {
                return Err(DepylerError::unsupported(a.pos, format!("starred argument to {name}()")));
            }
            values.push(self.expr(a)?);
        }
        self.builtin_values(name, values, &e.ty, e.pos)
    }

    /// Built-in applied to already-lowered values
    pub(super) fn builtin_values(
        &mut self,
        name: &str,
        args: Vec<Value>,
        ret: &Type,
        pos: SourcePos,
    ) -> Result<Value> {
        if let Some(spec) = stdlib::get_builtin_spec(name) {
            if !spec.accepts(args.len()) {
                return Err(DepylerError::unsupported(
                    pos,
                    format!("{name}() with {} arguments", args.len()),
                ));
            }
        }
        let ret = if ret.contains_unknown() {
            let tys: Vec<Type> = args.iter().map(|v| v.ty.clone()).collect();
            stdlib::get_builtin_spec(name)
                .map(|s| (s.ret_ty_resolver)(&tys))
                .filter(|t| !t.contains_unknown())
                .unwrap_or_else(|| ret.clone())
        } else {
            ret.clone()
        };
        let first = args.first().cloned();
        let a = match &first {
            Some(v) => v.clone(),
            None => Value::unit("()"),
        };
        let v = match name {
            "len" => Value::owned(self.len_of(&a), Type::Int),
            "abs" => Value::owned(format!("{}.abs()", method_receiver(&a.scalar(), &a.ty)), a.ty.clone()),
            "min" | "max" if args.len() == 1 => self.extremum_iter(name, &a),
            "min" | "max" => self.extremum_args(name, &args, &ret),
            "sum" => self.sum(&args, &ret, pos)?,
            "any" | "all" => {
                let elem = iter_element(&a.ty);
                let item = Value::new("_x", elem, Form::Place);
                let test = self.truthy(&item);
                Value::owned(format!("{}.{name}(|_x| {test})", a.iter_owned()), Type::Bool)
            }
            "sorted" => self.sorted(a, None, None, &ret, pos)?,
            "reversed" => self.reversed(&a),
            "enumerate" => self.enumerate(&a, args.get(1)),
            "zip" => self.zip(&args),
            "map" | "filter" => {
                return Err(DepylerError::unsupported(pos, format!("{name}() over lowered values")))
            }
            "range" => self.range(&args, pos)?,
            "iter" => Value::new(a.iter_owned(), a.ty.clone(), Form::Iter),
            "next" => self.next_call(&args, &ret),
            "input" => self.input(first.as_ref()),
            "open" => return self.open_file(args, pos),
            "int" => self.to_int(&args),
            "float" => self.to_float(first.as_ref()),
            "str" => match &first {
                Some(v) => Value::owned(self.to_str(v), Type::Str),
                None => Value::owned("String::new()", Type::Str),
            },
            "bool" => match &first {
                Some(v) => Value::owned(self.truthy(v), Type::Bool),
                None => Value::owned("false", Type::Bool),
            },
            "list" | "tuple" => self.to_list(first.as_ref(), &ret),
            "set" => {
                self.ctx.note_type(&ret);
                match &first {
                    Some(v) => Value::owned(format!("{}.collect::<HashSet<_>>()", v.iter_owned()), ret.clone()),
                    None => Value::owned("HashSet::new()", ret.clone()),
                }
            }
            "dict" => {
                self.ctx.note_type(&ret);
                match &first {
                    None => Value::owned("HashMap::new()", ret.clone()),
                    Some(v) if matches!(v.ty, Type::Dict(_, _)) => Value::owned(v.into_owned(), ret.clone()),
                    Some(v) => Value::owned(
                        format!("{}.collect::<HashMap<_, _>>()", v.iter_owned()),
                        ret.clone(),
                    ),
                }
            }
            "hex" => self.radix(&a, "x"),
            "bin" => self.radix(&a, "b"),
            "oct" => self.radix(&a, "o"),
            "chr" => Value::owned(
                format!(
                    "char::from_u32({} as u32).map(String::from).expect(\"ValueError: chr() arg not in range\")",
                    parenthesize(&a.as_i64())
                ),
                Type::Str,
            ),
            "ord" => Value::owned(
                format!("{}.chars().next().map_or(0, |_c| _c as i64)", a.atom()),
                Type::Int,
            ),
            "repr" => {
                let hole = self.repr_hole(&a);
                Value::owned(format!("format!(\"{}\", {})", hole.placeholder, hole.arg), Type::Str)
            }
            "format" => match args.get(1).and_then(literal_text) {
                Some(spec) => {
                    let hole = self.formatted(&a, &spec, pos)?;
                    Value::owned(format!("format!(\"{}\", {})", hole.placeholder, hole.arg), Type::Str)
                }
                None => Value::owned(self.to_str(&a), Type::Str),
            },
            "round" => self.round(&args),
            "divmod" => self.divmod(&args)?,
            "pow" => self.pow(&args),
            "hash" => {
                let key = match a.ty {
                    Type::Float => format!("{}.to_bits()", method_receiver(&a.scalar(), &Type::Float)),
                    _ => a.code.clone(),
                };
                Value::owned(
                    format!(
                        "{{ use std::hash::{{Hash, Hasher}}; let mut _h = std::collections::hash_map::DefaultHasher::new(); {key}.hash(&mut _h); _h.finish() as i64 }}"
                    ),
                    Type::Int,
                )
            }
            "print" | "isinstance" | "type" => {
                return Err(DepylerError::unsupported(pos, format!("{name} used as a value")))
            }
            other => return Err(DepylerError::unresolved(pos, other)),
        };
        self.ctx.note_type(&v.ty);
        Ok(v)
    }

    // --- 長さ・集計 ---

    fn len_of(&mut self, v: &Value) -> String {
        let atom = v.atom();
        if v.form == Form::Iter {
            return format!("({atom}.count() as i64)");
        }
        match v.ty.unwrap_optional() {
            Type::Str => format!("({atom}.chars().count() as i64)"),
            Type::Tuple(items) => items.len().to_string(),
            Type::Class(c) => match self.ctx.find_method(c, "__len__") {
                Some((path, _)) => format!("{atom}{path}.__len__()"),
                None => format!("({atom}.len() as i64)"),
            },
            Type::Native(n) if n == "json.Value" => {
                format!("({atom}.as_array().map_or(0, |_a| _a.len()) as i64)")
            }
            _ => format!("({atom}.len() as i64)"),
        }
    }

    fn sum(&mut self, args: &[Value], ret: &Type, pos: SourcePos) -> Result<Value> {
        let Some(src) = args.first() else {
            return Err(DepylerError::unsupported(pos, "sum() without an iterable"));
        };
        let elem = iter_element(&src.ty);
        let total = match &elem {
            Type::Float => format!("{}.sum::<f64>()", src.iter_owned()),
            Type::Bool => format!("{}.map(|_b| _b as i64).sum::<i64>()", src.iter_owned()),
            Type::Int | Type::Unknown => format!("{}.sum::<i64>()", src.iter_owned()),
            other => {
                return Err(DepylerError::unsupported(
                    pos,
                    format!("sum() over elements of type {other}"),
                ))
            }
        };
        let ty = if ret.contains_unknown() {
            if elem == Type::Float { Type::Float } else { Type::Int }
        } else {
            ret.clone()
        };
        let code = match args.get(1) {
            Some(start) if ty == Type::Float => format!("{} + {total}", start.as_f64()),
            Some(start) => format!("{} + {total}", parenthesize(&start.scalar())),
            None if ty == Type::Float && elem != Type::Float => format!("({total} as f64)"),
            None => total,
        };
        Ok(Value::owned(code, ty))
    }

    /// `min(xs)` / `max(xs)`
    fn extremum_iter(&mut self, name: &str, v: &Value) -> Value {
        let elem = iter_element(&v.ty);
        let empty = empty_sequence(name);
        let code = if has_float(&elem) {
            // 最初の最大値を返す
            let (a, b) = if name == "min" { ("_a", "_b") } else { ("_b", "_a") };
            format!(
                "{}.min_by(|_a, _b| {a}.partial_cmp({b}).unwrap_or({EQUAL})){empty}",
                v.iter_owned()
            )
        } else {
            format!("{}.{name}(){empty}", v.iter_owned())
        };
        Value::owned(code, elem)
    }

    /// `min(a, b, c)`
    fn extremum_args(&mut self, name: &str, args: &[Value], ret: &Type) -> Value {
        let ty = if ret.contains_unknown() {
            args.iter()
                .fold(None, |acc: Option<Type>, v| {
                    Some(acc.map_or_else(|| v.ty.clone(), |t| crate::semantic::join(&t, &v.ty)))
                })
                .unwrap_or(Type::Unknown)
        } else {
            ret.clone()
        };
        let operand = |v: &Value| match ty {
            Type::Float => v.as_f64(),
            Type::Int | Type::Bool => parenthesize(&v.scalar()),
            _ => v.into_owned(),
        };
        let mut acc = operand(&args[0]);
        for v in &args[1..] {
            let next = operand(v);
            acc = match ty {
                Type::Int | Type::Float | Type::Bool => format!("{}.{name}({next})", parenthesize(&acc)),
                _ => format!("std::cmp::{name}({acc}, {next})"),
            };
        }
        Value::owned(acc, ty)
    }

    /// `min(xs, key=f, default=d)`
    fn extremum_keyed(
        &mut self,
        e: &HirExpr,
        name: &str,
        args: &[HirExpr],
        key: Option<&HirExpr>,
        default: Option<&HirExpr>,
    ) -> Result<Value> {
        let src = match args {
            [single] => self.expr(single)?,
            [] => return Err(DepylerError::unsupported(e.pos, format!("{name}() without arguments"))),
            many => {
                let mut codes = Vec::new();
                let mut ty = Type::Unknown;
                for a in many {
                    let v = self.expr(a)?;
                    ty = crate::semantic::join(&ty, &v.ty);
                    codes.push(v.into_owned());
                }
                Value::owned(format!("vec![{}]", codes.join(", ")), Type::list(ty))
            }
        };
        let elem = iter_element(&src.ty);
        let cmp = match key {
            Some(k) => {
                let ka = self.apply_callable(k, vec![Value::new("(*_a)", elem.clone(), Form::Place)], &Type::Unknown, e.pos)?;
                let kb = self.apply_callable(k, vec![Value::new("(*_b)", elem.clone(), Form::Place)], &Type::Unknown, e.pos)?;
                let key_ty = ka.ty.clone();
                if name == "min" {
                    ordering(&ka.into_owned(), &kb.into_owned(), &key_ty)
                } else {
                    ordering(&kb.into_owned(), &ka.into_owned(), &key_ty)
                }
            }
            None if name == "min" => ordering("_a", "_b", &elem),
            None => ordering("_b", "_a", &elem),
        };
        let tail = match default {
            Some(d) => {
                let d = self.owned_expr(d, &elem)?;
                format!(".unwrap_or({d})")
            }
            None => empty_sequence(name),
        };
        Ok(Value::owned(
            format!("{}.min_by(|_a, _b| {cmp}){tail}", src.iter_owned()),
            elem,
        ))
    }

    // --- 並べ替え ---

    fn sorted(
        &mut self,
        v: Value,
        key: Option<&HirExpr>,
        reverse: Option<&str>,
        ret: &Type,
        pos: SourcePos,
    ) -> Result<Value> {
        let elem = iter_element(&v.ty);
        let ty = if ret.contains_unknown() { Type::list(elem.clone()) } else { ret.clone() };
        let vec_ty = self.ctx.local_type(&ty).unwrap_or_else(|| "Vec<_>".to_string());
        let sort = self.sort_in_place("_v", &elem, key, reverse, pos)?;
        Ok(Value::owned(
            format!("{{ let mut _v: {vec_ty} = {}.collect(); {sort}; _v }}", v.iter_owned()),
            ty,
        ))
    }

    /// In-place stable sort of the vector at `recv`
    pub(super) fn sort_in_place(
        &mut self,
        recv: &str,
        elem: &Type,
        key: Option<&HirExpr>,
        reverse: Option<&str>,
        pos: SourcePos,
    ) -> Result<String> {
        let (a, b, key_ty) = match key {
            Some(k) => {
                let ka = self.apply_callable(k, vec![Value::new("(*_a)", elem.clone(), Form::Place)], &Type::Unknown, pos)?;
                let kb = self.apply_callable(k, vec![Value::new("(*_b)", elem.clone(), Form::Place)], &Type::Unknown, pos)?;
                let ty = ka.ty.clone();
                (ka.into_owned(), kb.into_owned(), ty)
            }
            None => ("_a".to_string(), "_b".to_string(), elem.clone()),
        };
        let plain = key.is_none() && !has_float(elem) && !elem.contains_unknown();
        Ok(match reverse {
            None | Some("false") if plain => format!("{recv}.sort()"),
            None | Some("false") => format!("{recv}.sort_by(|_a, _b| {})", ordering(&a, &b, &key_ty)),
            Some("true") => format!("{recv}.sort_by(|_a, _b| {})", ordering(&b, &a, &key_ty)),
            Some(flag) => format!(
                "{recv}.sort_by(|_a, _b| if {flag} {{ {} }} else {{ {} }})",
                ordering(&b, &a, &key_ty),
                ordering(&a, &b, &key_ty)
            ),
        })
    }

    // --- イテレータ ---

    fn reversed(&mut self, v: &Value) -> Value {
        let elem = iter_element(&v.ty);
        let atom = v.atom();
        let code = match (v.form, &v.ty) {
            (Form::Iter, _) => format!("{}.collect::<Vec<_>>().into_iter().rev()", atom),
            (_, Type::Str) => format!("{atom}.chars().rev().map(|_c| _c.to_string())"),
            (Form::Owned, _) => format!("{atom}.into_iter().rev()"),
            _ => format!("{atom}.iter().rev().cloned()"),
        };
        Value::new(code, Type::list(elem), Form::Iter)
    }

    fn enumerate(&mut self, v: &Value, start: Option<&Value>) -> Value {
        let elem = iter_element(&v.ty);
        let index = match start {
            Some(s) if s.code != "0" => format!("_i as i64 + {}", parenthesize(&s.as_i64())),
            _ => "_i as i64".to_string(),
        };
        Value::new(
            format!("{}.enumerate().map(|(_i, _x)| ({index}, _x))", v.iter_owned()),
            Type::list(Type::Tuple(vec![Type::Int, elem])),
            Form::Iter,
        )
    }

    fn zip(&mut self, args: &[Value]) -> Value {
        let tys: Vec<Type> = args.iter().map(|v| iter_element(&v.ty)).collect();
        let mut code = args.first().map(Value::iter_owned).unwrap_or_default();
        for v in args.iter().skip(1) {
            code = format!("{code}.zip({})", v.iter_owned());
        }
        if args.len() > 2 {
            // ((a, b), c) → (a, b, c)
            let mut pat = "_z0".to_string();
            for i in 1..args.len() {
                pat = format!("({pat}, _z{i})");
            }
            let flat: Vec<String> = (0..args.len()).map(|i| format!("_z{i}")).collect();
            code = format!("{code}.map(|{pat}| ({}))", flat.join(", "));
        }
        Value::new(code, Type::list(Type::Tuple(tys)), Form::Iter)
    }

    fn map_call(&mut self, e: &HirExpr, func: &HirExpr, iters: &[HirExpr]) -> Result<Value> {
        let mut sources = Vec::new();
        for it in iters {
            sources.push(self.expr(it)?);
        }
        let ret = e.ty.element();
        let (chain, params) = if sources.len() == 1 {
            let elem = iter_element(&sources[0].ty);
            (sources[0].iter_owned(), vec![Value::new("_x", elem, Form::Place)])
        } else {
            let zipped = self.zip(&sources);
            let params = sources
                .iter()
                .enumerate()
                .map(|(i, s)| Value::new(format!("_z{i}"), iter_element(&s.ty), Form::Place))
                .collect();
            (zipped.code, params)
        };
        let pat = if params.len() == 1 {
            "_x".to_string()
        } else if params.len() == 2 {
            "(_z0, _z1)".to_string()
        } else {
            let names: Vec<String> = params.iter().map(|p| p.code.clone()).collect();
            format!("({})", names.join(", "))
        };
        let applied = self.apply_callable(func, params, &ret, e.pos)?;
        let ty = if e.ty.contains_unknown() { Type::list(applied.ty.clone()) } else { e.ty.clone() };
        let body = if ret.contains_unknown() {
            applied.into_owned()
        } else {
            self.coerce(applied, &ret)?
        };
        Ok(Value::new(format!("{chain}.map(|{pat}| {body})"), ty, Form::Iter))
    }

    fn filter_call(&mut self, e: &HirExpr, func: &HirExpr, src: &HirExpr) -> Result<Value> {
        let v = self.expr(src)?;
        let elem = iter_element(&v.ty);
        let item = Value::new("(*_x)", elem.clone(), Form::Place);
        let test = if func.is_none_literal() {
            self.truthy(&item)
        } else {
            let applied = self.apply_callable(func, vec![item], &Type::Bool, e.pos)?;
            self.truthy(&applied)
        };
        Ok(Value::new(
            format!("{}.filter(|_x| {test})", v.iter_owned()),
            Type::list(elem),
            Form::Iter,
        ))
    }

    fn range(&mut self, args: &[Value], pos: SourcePos) -> Result<Value> {
        let ty = Type::list(Type::Int);
        let bound = |v: &Value| parenthesize(&v.as_i64());
        let code = match args {
            [stop] => format!("(0..{})", bound(stop)),
            [start, stop] => format!("({}..{})", bound(start), bound(stop)),
            [start, stop, step] => match step.code.parse::<i64>() {
                Ok(0) => {
                    return Err(DepylerError::unsupported(pos, "range() arg 3 must not be zero"))
                }
                Ok(1) => format!("({}..{})", bound(start), bound(stop)),
                Ok(k) if k > 0 => format!("({}..{}).step_by({k})", bound(start), bound(stop)),
                Ok(k) => {
                    let lo = if is_int_literal(&stop.code) {
                        stop.code.parse::<i64>().map(|s| (s + 1).to_string()).unwrap_or_default()
                    } else {
                        format!("{} + 1", bound(stop))
                    };
                    let rev = format!("({lo}..={}).rev()", bound(start));
                    if k == -1 {
                        rev
                    } else {
                        format!("{rev}.step_by({})", -k)
                    }
                }
                Err(_) => {
                    self.ctx.use_helper(Helper::Range);
                    format!("py_range({}, {}, {})", start.as_i64(), stop.as_i64(), step.as_i64())
                }
            },
            _ => return Err(DepylerError::unsupported(pos, "range() with this many arguments")),
        };
        Ok(Value::new(code, ty, Form::Iter))
    }

    fn next_call(&mut self, args: &[Value], ret: &Type) -> Value {
        let it = &args[0];
        let elem = if ret.contains_unknown() { iter_element(&it.ty) } else { ret.clone() };
        let call = format!("{}.next()", it.code);
        let code = match args.get(1) {
            Some(d) => {
                let d = d.into_owned();
                format!("{call}.unwrap_or({d})")
            }
            None => match self.ctx.implicit_route(ErrorTaxon::StopIteration, "") {
                Some(route) => format!("match {call} {{ Some(_v) => _v, None => {route} }}"),
                None => format!("{call}.expect(\"StopIteration\")"),
            },
        };
        Value::owned(code, elem)
    }

    // --- 入出力 ---

    fn input(&mut self, prompt: Option<&Value>) -> Value {
        let show = match prompt {
            Some(p) => format!(
                "print!(\"{{}}\", {}); std::io::stdout().flush().ok(); ",
                p.code
            ),
            None => String::new(),
        };
        Value::owned(
            format!(
                "{{ use std::io::Write; {show}let mut _s = String::new(); std::io::stdin().read_line(&mut _s).ok(); _s.trim_end_matches(&['\\r', '\\n'][..]).to_string() }}"
            ),
            Type::Str,
        )
    }

    fn open_file(&mut self, args: Vec<Value>, pos: SourcePos) -> Result<Value> {
        let Some(path) = args.first() else {
            return Err(DepylerError::unsupported(pos, "open() without a path"));
        };
        let mode = match args.get(1) {
            Some(m) => match literal_text(m) {
                Some(text) => text,
                None => return Err(DepylerError::unsupported(pos, "open() with a computed mode")),
            },
            None => "r".to_string(),
        };
        let p = path.as_str_ref();
        let opener = match mode.trim_end_matches('b').trim_end_matches('t') {
            "r" | "" => format!("std::fs::File::open({p})"),
            "w" => format!("std::fs::File::create({p})"),
            "a" => format!("std::fs::OpenOptions::new().append(true).create(true).open({p})"),
            "r+" | "w+" => format!(
                "std::fs::OpenOptions::new().read(true).write(true).create({}).open({p})",
                mode.starts_with('w')
            ),
            other => return Err(DepylerError::unsupported(pos, format!("open() mode '{other}'"))),
        };
        let code = match self
            .ctx
            .implicit_route(ErrorTaxon::FileNotFoundError, "No such file or directory")
        {
            Some(route) => format!("match {opener} {{ Ok(_f) => _f, Err(_) => {route} }}"),
            None => format!("{opener}.unwrap_or_else(|_e| panic!(\"FileNotFoundError: {{}}\", _e))"),
        };
        Ok(Value::owned(code, Type::Native("io.File".to_string())))
    }

    // --- 変換 ---

    fn to_int(&mut self, args: &[Value]) -> Value {
        let Some(v) = args.first() else {
            return Value::owned("0", Type::Int);
        };
        let parsed = match (&v.ty, args.get(1)) {
            (_, Some(base)) => Some(format!(
                "i64::from_str_radix({}.trim(), {} as u32)",
                v.atom(),
                parenthesize(&base.as_i64())
            )),
            (Type::Str, None) => Some(format!("{}.trim().parse::<i64>()", v.atom())),
            _ => None,
        };
        let code = match parsed {
            Some(p) => self.checked_parse(&p, "invalid literal for int()"),
            None => match v.ty {
                Type::Float => format!("({} as i64)", parenthesize(&v.scalar())),
                _ => v.as_i64(),
            },
        };
        Value::owned(code, Type::Int)
    }

    fn to_float(&mut self, v: Option<&Value>) -> Value {
        let Some(v) = v else {
            return Value::owned("0.0", Type::Float);
        };
        let code = match v.ty {
            Type::Str => {
                let p = format!("{}.trim().parse::<f64>()", v.atom());
                self.checked_parse(&p, "could not convert string to float")
            }
            _ => v.as_f64(),
        };
        Value::owned(code, Type::Float)
    }

    /// `parse()` の失敗を ValueError にする
    fn checked_parse(&mut self, parse: &str, message: &str) -> String {
        match self.ctx.implicit_route(ErrorTaxon::ValueError, message) {
            Some(route) => format!("match {parse} {{ Ok(_v) => _v, Err(_) => {route} }}"),
            None => format!("{parse}.expect(\"ValueError: {message}\")"),
        }
    }

    fn to_list(&mut self, v: Option<&Value>, ret: &Type) -> Value {
        let ty = match (ret, v) {
            (t, Some(v)) if t.contains_unknown() => Type::list(iter_element(&v.ty)),
            (t, _) => t.clone(),
        };
        let code = match v {
            None => "Vec::new()".to_string(),
            Some(v) if v.form != Form::Iter && matches!(v.ty, Type::List(_)) => v.into_owned(),
            Some(v) => {
                let t = self.ctx.local_type(&ty).unwrap_or_else(|| "Vec<_>".to_string());
                format!("{}.collect::<{t}>()", v.iter_owned())
            }
        };
        Value::owned(code, ty)
    }

    /// `hex(n)` / `bin(n)` / `oct(n)` (負数は `-0x..`)
    fn radix(&mut self, v: &Value, kind: &str) -> Value {
        let n = v.as_i64();
        let non_negative = is_int_literal(&n) && !n.starts_with('-');
        let code = if non_negative {
            format!("format!(\"{{:#{kind}}}\", {n})")
        } else {
            format!(
                "{{ let _n: i64 = {n}; if _n < 0 {{ format!(\"-{{:#{kind}}}\", -_n) }} else {{ format!(\"{{:#{kind}}}\", _n) }} }}"
            )
        };
        Value::owned(code, Type::Str)
    }

    // --- 数値 ---

    fn round(&mut self, args: &[Value]) -> Value {
        let x = args[0].as_f64();
        match args.get(1) {
            None if args[0].ty == Type::Int => Value::owned(args[0].scalar(), Type::Int),
            // 偶数丸め
            None => Value::owned(
                format!("({}.round_ties_even() as i64)", method_receiver(&x, &Type::Float)),
                Type::Int,
            ),
            Some(n) => Value::owned(
                format!(
                    "{{ let _m = 10f64.powi({} as i32); ({} * _m).round() / _m }}",
                    parenthesize(&n.as_i64()),
                    parenthesize(&x)
                ),
                Type::Float,
            ),
        }
    }

    fn divmod(&mut self, args: &[Value]) -> Result<Value> {
        let (a, b) = (&args[0], &args[1]);
        if a.ty == Type::Float || b.ty == Type::Float {
            self.ctx.use_helper(Helper::FloatFloorDiv);
            self.ctx.use_helper(Helper::FloatMod);
            return Ok(Value::owned(
                format!(
                    "{{ let (_a, _b) = ({}, {}); (py_float_floor_div(_a, _b), py_float_mod(_a, _b)) }}",
                    a.as_f64(),
                    b.as_f64()
                ),
                Type::Tuple(vec![Type::Float, Type::Float]),
            ));
        }
        self.ctx.use_helper(Helper::FloorDiv);
        self.ctx.use_helper(Helper::Mod);
        Ok(Value::owned(
            format!(
                "{{ let (_a, _b) = ({}, {}); (py_floor_div(_a, _b), py_mod(_a, _b)) }}",
                a.as_i64(),
                b.as_i64()
            ),
            Type::Tuple(vec![Type::Int, Type::Int]),
        ))
    }

    fn pow(&mut self, args: &[Value]) -> Value {
        let (a, b) = (&args[0], &args[1]);
        if let Some(m) = args.get(2) {
            return Value::owned(
                format!(
                    "{{ let (mut _b, mut _e, _m) = ({} as i128, {}, {} as i128); let mut _r: i128 = 1; _b = _b.rem_euclid(_m); while _e > 0 {{ if _e & 1 == 1 {{ _r = (_r * _b).rem_euclid(_m); }} _b = (_b * _b).rem_euclid(_m); _e >>= 1; }} _r as i64 }}",
                    parenthesize(&a.as_i64()),
                    b.as_i64(),
                    parenthesize(&m.as_i64())
                ),
                Type::Int,
            );
        }
        if a.ty == Type::Int && b.ty == Type::Int {
            return Value::owned(
                format!(
                    "{}.checked_pow({} as u32).expect(\"OverflowError: integer overflow\")",
                    method_receiver(&a.scalar(), &Type::Int),
                    parenthesize(&b.scalar())
                ),
                Type::Int,
            );
        }
        let base = method_receiver(&a.as_f64(), &Type::Float);
        let code = if b.ty == Type::Int {
            format!("{base}.powi({} as i32)", parenthesize(&b.scalar()))
        } else {
            format!("{base}.powf({})", b.as_f64())
        };
        Value::owned(code, Type::Float)
    }

    // --- 型検査 ---

    /// `isinstance(x, T)` は静的な型で決める
    fn isinstance(&mut self, e: &HirExpr, args: &[HirExpr]) -> Result<Value> {
        let [value, class] = args else {
            return Err(DepylerError::unsupported(e.pos, "isinstance() needs two arguments"));
        };
        let names: Vec<&str> = match &class.kind {
            HirExprKind::Name(n) => vec![n.as_str()],
            HirExprKind::Tuple(items) => items.iter().filter_map(HirExpr::as_name).collect(),
            _ => return Err(DepylerError::unsupported(e.pos, "isinstance() with a computed class")),
        };
        let v = self.expr(value)?;
        let mut tests = Vec::new();
        for name in names {
            tests.push(self.type_test(&v, name));
        }
        if tests.iter().any(|t| t == "true") {
            return Ok(Value::owned("true", Type::Bool));
        }
        tests.retain(|t| t != "false");
        let code = match tests.len() {
            0 => "false".to_string(),
            1 => tests.remove(0),
            _ => tests.join(" || "),
        };
        Ok(Value::owned(code, Type::Bool))
    }

    fn type_test(&mut self, v: &Value, name: &str) -> String {
        match &v.ty {
            Type::Union(members) => {
                let enum_name = union_enum_name(members);
                let hits: Vec<String> = members
                    .iter()
                    .filter(|m| self.static_is(m, name))
                    .map(|m| format!("{enum_name}::{}(_)", variant_name(m)))
                    .collect();
                if hits.is_empty() {
                    "false".to_string()
                } else {
                    format!("matches!({}, {})", v.atom(), hits.join(" | "))
                }
            }
            Type::Optional(_) if name == "NoneType" => format!("{}.is_none()", v.atom()),
            Type::Optional(inner) if self.static_is(inner, name) => format!("{}.is_some()", v.atom()),
            ty if self.static_is(ty, name) => "true".to_string(),
            _ => "false".to_string(),
        }
    }

    /// 静的な型 `ty` が Python のクラス `name` のインスタンスか
    fn static_is(&self, ty: &Type, name: &str) -> bool {
        if let Some(hit) = matches_type_name(ty, name) {
            return hit;
        }
        if name == "object" {
            return true;
        }
        // bool は int のサブクラス
        if name == "int" && *ty == Type::Bool {
            return true;
        }
        let Type::Class(c) = ty else {
            return matches!(ty, Type::Unknown | Type::Generic(_));
        };
        let mut current = Some(c.clone());
        while let Some(cls) = current {
            if cls == name {
                return true;
            }
            current = self.ctx.classes.get(&cls).and_then(|i| i.base.clone());
        }
        false
    }
}

/// `type(x)` の表示名
fn python_type_name(ty: &Type) -> String {
    match ty {
        Type::Int => "int".to_string(),
        Type::Float => "float".to_string(),
        Type::Bool => "bool".to_string(),
        Type::Str => "str".to_string(),
        Type::Bytes => "bytes".to_string(),
        Type::None => "NoneType".to_string(),
        Type::List(_) => "list".to_string(),
        Type::Tuple(_) => "tuple".to_string(),
        Type::Dict(_, _) => "dict".to_string(),
        Type::Set(_) => "set".to_string(),
        Type::Class(c) => c.clone(),
        Type::Callable { .. } => "function".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ordering_for_floats_is_partial() {
        assert_eq!(ordering("_a", "_b", &Type::Int), "(_a).cmp(&(_b))");
        assert!(ordering("_a", "_b", &Type::Float).contains("partial_cmp"));
        let pair = Type::Tuple(vec![Type::Str, Type::Float]);
        assert!(ordering("_a", "_b", &pair).contains("partial_cmp"));
    }

    #[test]
    fn test_literal_text() {
        let mode = Value::new("\"w\"", Type::Str, Form::Literal);
        assert_eq!(literal_text(&mode), Some("w".to_string()));
        let computed = Value::new("m", Type::Str, Form::Place);
        assert_eq!(literal_text(&computed), None);
    }

    #[test]
    fn test_type_names() {
        assert_eq!(matches_type_name(&Type::Int, "int"), Some(true));
        assert_eq!(matches_type_name(&Type::Str, "int"), Some(false));
        assert_eq!(matches_type_name(&Type::Unknown, "int"), None);
        assert_eq!(python_type_name(&Type::list(Type::Int)), "list");
        assert_eq!(python_type_name(&Type::Class("Point".into())), "Point");
    }
}
