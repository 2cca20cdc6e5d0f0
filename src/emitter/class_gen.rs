//! Classes → struct + impl (C7)
//!
//! - 単一継承は `base: Base` フィールドで表す。`super().__init__(...)` は `Base::new(...)`
//! - `__init__` のフィールド代入はローカル `_f_<name>` に溜めて最後に `Self { .. }` を作る
//! - `__str__` / `__repr__` があれば `Display` を実装する
//! - 例外クラスはエラー構造体になる

use super::context::{rust_ident, Binding, FnSig, Frame};
use super::value::Form;
use super::{const_literal, RustEmitter};
use crate::error::{DepylerError, Result};
use crate::hir::visit;
use crate::hir::*;
use crate::semantic::{MapMode, Type};
use crate::stdlib::exceptions::error_struct;
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// derive できるトレイトの段階
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Derives {
    None,
    Debug,
    Full,
}

impl RustEmitter<'_> {
    pub(super) fn emit_class(&mut self, c: &HirClass) -> Result<()> {
        trace!(class = %c.name, "emit class");
        if self.options.emit_docs {
            if let Some(doc) = &c.docstring {
                self.emit_doc_lines(doc);
            }
        }
        if c.is_exception {
            self.ctx.error_types.insert(c.name.clone());
            self.ctx.dyn_error();
            for l in error_struct(&c.name).trim_end().lines() {
                self.line(l);
            }
            return Ok(());
        }
        self.emit_struct(c)?;
        self.line("");
        self.open(format!("impl {}", c.name));
        self.emit_class_attrs(c)?;
        self.emit_constructor(c)?;
        for m in &c.methods {
            if m.name == "__init__" {
                continue;
            }
            self.line("");
            self.emit_function(m, Some(c))?;
        }
        self.close();
        self.emit_display(c)?;
        Ok(())
    }

    fn emit_struct(&mut self, c: &HirClass) -> Result<()> {
        let derives = self.derives(&c.name, &mut BTreeSet::new());
        let has_default = self.ctx.has_default(&Type::Class(c.name.clone()));
        let mut traits: Vec<&str> = match derives {
            Derives::None => Vec::new(),
            Derives::Debug => vec!["Debug"],
            Derives::Full => vec!["Debug", "Clone", "PartialEq"],
        };
        if has_default && derives != Derives::None {
            traits.push("Default");
        }
        if !traits.is_empty() {
            self.line(format!("#[derive({})]", traits.join(", ")));
        }
        let vis = self.item_vis();
        self.open(format!("{vis}struct {}", c.name));
        if let Some(base) = self.user_base(c) {
            self.line(format!("pub base: {base},"));
        }
        for f in &c.fields {
            let ty = self.ctx.rust_type(&f.ty, MapMode::Owned, c.pos)?;
            self.line(format!("pub {}: {ty},", rust_ident(&f.name)));
        }
        self.close();
        Ok(())
    }

    /// 基底がユーザクラスならその名前
    fn user_base(&self, c: &HirClass) -> Option<String> {
        c.base
            .clone()
            .filter(|b| self.ctx.classes.contains_key(b) && !self.ctx.hierarchy.is_user_exception(b))
    }

    /// フィールドの型から決まる derive
    fn derives(&self, class: &str, seen: &mut BTreeSet<String>) -> Derives {
        if !seen.insert(class.to_string()) {
            return Derives::Full;
        }
        let Some(info) = self.ctx.classes.get(class) else {
            return Derives::Full;
        };
        let mut level = Derives::Full;
        if let Some(base) = info.base.clone() {
            if self.ctx.classes.contains_key(&base) {
                level = level.min(self.derives(&base, seen));
            }
        }
        for (_, ty) in info.fields.clone() {
            level = level.min(self.type_derives(&ty, seen));
        }
        level
    }

    fn type_derives(&self, ty: &Type, seen: &mut BTreeSet<String>) -> Derives {
        match ty {
            Type::Callable { .. } => Derives::None,
            Type::Native(n) if n == "DynError" => Derives::Debug,
            Type::Native(n) if n.starts_with("io.") => Derives::Debug,
            Type::Class(name) => self.derives(name, seen),
            Type::List(t) | Type::Set(t) | Type::Optional(t) => self.type_derives(t, seen),
            Type::Dict(k, v) => self.type_derives(k, seen).min(self.type_derives(v, seen)),
            Type::Tuple(items) | Type::Union(items) => items
                .iter()
                .map(|t| self.type_derives(t, seen))
                .min()
                .unwrap_or(Derives::Full),
            _ => Derives::Full,
        }
    }

    /// `pub const MAX: i64 = 10;`
    fn emit_class_attrs(&mut self, c: &HirClass) -> Result<()> {
        for (name, value) in &c.class_attrs {
            let Some(text) = const_literal(value) else {
                return Err(DepylerError::unsupported(
                    value.pos,
                    format!("class attribute '{}.{name}' with a non-literal value", c.name),
                ));
            };
            let ty = match &value.ty {
                Type::Str => "&'static str".to_string(),
                other => self.ctx.rust_type(other, MapMode::Owned, value.pos)?,
            };
            self.line(format!(
                "pub const {}: {ty} = {text};",
                super::context::global_ident(name)
            ));
        }
        Ok(())
    }

    // --- コンストラクタ ---

    fn emit_constructor(&mut self, c: &HirClass) -> Result<()> {
        if let Some(init) = c.method("__init__") {
            return self.emit_init(c, init);
        }
        if c.is_dataclass {
            return self.emit_dataclass_new(c);
        }
        self.emit_default_new(c)
    }

    /// `@dataclass`: フィールド順の引数をそのまま詰める
    fn emit_dataclass_new(&mut self, c: &HirClass) -> Result<()> {
        if let Some(base) = self.user_base(c) {
            return Err(DepylerError::unsupported(
                c.pos,
                format!("dataclass '{}' inheriting from class '{base}'", c.name),
            ));
        }
        let mut params = Vec::new();
        let mut names = Vec::new();
        for f in &c.fields {
            let ty = self.ctx.rust_type(&f.ty, MapMode::Owned, c.pos)?;
            let ident = rust_ident(&f.name);
            params.push(format!("{ident}: {ty}"));
            names.push(ident);
        }
        self.open(format!("pub fn new({}) -> Self", params.join(", ")));
        self.line(format!("Self {{ {} }}", names.join(", ")));
        self.close();
        Ok(())
    }

    /// `__init__` のないクラス: 基底の引数を受けて基底を作り、フィールドは既定値
    fn emit_default_new(&mut self, c: &HirClass) -> Result<()> {
        let base = self.user_base(c);
        let (params, can_fail) = match &base {
            Some(b) => self.constructor_params(b),
            None => (Vec::new(), false),
        };
        let mut decls = Vec::new();
        let mut args = Vec::new();
        for p in &params {
            // 基底の new と同じ受け渡し方で受けて、そのまま渡す
            let mode = match p.passing() {
                ParamMode::ByValue => MapMode::Owned,
                ParamMode::Borrow => MapMode::BorrowShared,
                ParamMode::BorrowMut => MapMode::BorrowMut,
            };
            let ty = self.ctx.rust_type(&p.ty, mode, c.pos)?;
            let ident = rust_ident(&p.name);
            decls.push(format!("{ident}: {ty}"));
            args.push(ident);
        }
        let ret = if can_fail {
            let err = self.ctx.dyn_error();
            format!("Result<Self, {err}>")
        } else {
            "Self".to_string()
        };
        self.open(format!("pub fn new({}) -> {ret}", decls.join(", ")));
        self.enter_frame(Frame::function(Type::Class(c.name.clone()), can_fail), BTreeMap::new());
        let result = self.field_defaults(c);
        self.leave_frame();
        let mut inits = result?;
        if let Some(b) = base {
            let q = if can_fail { "?" } else { "" };
            inits.insert(0, format!("base: {b}::new({}){q}", args.join(", ")));
        }
        let literal = format!("Self {{ {} }}", inits.join(", "));
        if can_fail {
            self.line(format!("Ok({literal})"));
        } else {
            self.line(literal);
        }
        self.close();
        Ok(())
    }

    /// `field: <default>` for every own field
    fn field_defaults(&mut self, c: &HirClass) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for f in &c.fields {
            let code = self.field_default(f, c.pos)?;
            out.push(format!("{}: {code}", rust_ident(&f.name)));
        }
        Ok(out)
    }

    fn field_default(&mut self, f: &HirField, pos: SourcePos) -> Result<String> {
        match &f.default {
            Some(d) => {
                let v = self.expr(d)?;
                self.coerce(v, &f.ty)
            }
            None if self.ctx.has_default(&f.ty) => Ok("Default::default()".to_string()),
            None => Err(DepylerError::unsupported(
                pos,
                format!("field '{}' has no value outside __init__", f.name),
            )),
        }
    }

    /// `__init__` → `new`
    ///
    /// ```text
    /// pub fn new(a: i64) -> Self {
    ///     let _base = Base::new(a);        // super().__init__(a)
    ///     let mut _f_x: i64 = a * 2;       // self.x = a * 2
    ///     Self { base: _base, x: _f_x }
    /// }
    /// ```
    fn emit_init(&mut self, c: &HirClass, init: &HirFunction) -> Result<()> {
        let sig = FnSig::from_function(init);
        let can_fail = init.attrs.can_fail;
        let params = self.param_decls(init, &sig)?;
        let ret = if can_fail {
            let err = self.ctx.dyn_error();
            format!("Result<Self, {err}>")
        } else {
            "Self".to_string()
        };
        if self.options.emit_docs {
            if let Some(doc) = &init.docstring {
                self.emit_doc_lines(doc);
            }
        }
        self.open(format!("pub fn new({}) -> {ret}", params.join(", ")));

        let mut frame = Frame::function(Type::Class(c.name.clone()), can_fail);
        frame.mutable = init.mutable_vars.clone();
        frame.class = Some(c.name.clone());
        frame.init_return = Some(self.struct_literal(c));
        self.enter_frame(frame, init.locals.clone());
        let result = self.init_body(c, init, &sig);
        self.leave_frame();
        result?;
        self.close();
        Ok(())
    }

    fn init_body(&mut self, c: &HirClass, init: &HirFunction, sig: &FnSig) -> Result<()> {
        // self は構築が終わるまで宣言しない
        for ps in &sig.params {
            let form = match ps.passing() {
                ParamMode::ByValue => Form::Place,
                ParamMode::Borrow => Form::Borrowed,
                ParamMode::BorrowMut => Form::BorrowedMut,
            };
            self.ctx.declare_local(&ps.name, ps.ty.clone(), form);
        }
        let mut body: &[HirStmt] = &init.body;
        if let Some(HirStmtKind::Expr(e)) = body.first().map(|s| &s.kind) {
            if matches!(e.kind, HirExprKind::Str { .. }) {
                body = &body[1..];
            }
        }
        let base = self.user_base(c);
        if let Some((first, rest)) = body.split_first() {
            if let Some(args) = super_init_args(first) {
                let Some(b) = base.clone() else {
                    return Err(DepylerError::unsupported(
                        first.pos,
                        "super().__init__() without a user base class",
                    ));
                };
                let (params, base_fails) = self.constructor_params(&b);
                let (args, kwargs) = args;
                let bound = self.bind_arguments(&params, args, kwargs, first.pos, &b)?;
                let call = format!("{b}::new({})", bound.join(", "));
                let call = if base_fails { self.ctx.unwrap_fallible(&call) } else { call };
                self.line(format!("let mut _base = {call};"));
                self.ctx.frame_mut()?.init_fields.insert("base".to_string(), "_base".to_string());
                body = rest;
            }
        }
        let base_built = self.ctx.frame().map_or(false, |f| f.init_fields.contains_key("base"));
        if let Some(b) = base.filter(|_| !base_built) {
            // super().__init__ を呼ばない派生クラスは引数なしで基底を作る
            let (params, base_fails) = self.constructor_params(&b);
            if !params.is_empty() {
                return Err(DepylerError::unsupported(
                    init.pos,
                    format!("{}.__init__ must start with super().__init__(...)", c.name),
                ));
            }
            let call = format!("{b}::new()");
            let call = if base_fails { self.ctx.unwrap_fallible(&call) } else { call };
            self.line(format!("let mut _base = {call};"));
            self.ctx.frame_mut()?.init_fields.insert("base".to_string(), "_base".to_string());
        }

        self.predeclare_fields(c, body)?;
        self.emit_body(body)?;
        if visit::always_returns(body) {
            return Ok(());
        }
        let literal = self.struct_literal(c);
        let can_fail = self.ctx.frame().map_or(false, |f| f.can_fail);
        if can_fail {
            self.line(format!("Ok({literal})"));
        } else {
            self.line(literal);
        }
        Ok(())
    }

    /// `__init__` の直下で代入されないフィールドを先に宣言しておく
    fn predeclare_fields(&mut self, c: &HirClass, body: &[HirStmt]) -> Result<()> {
        let direct = direct_field_assignments(body);
        for f in &c.fields {
            if direct.contains(f.name.as_str()) {
                continue;
            }
            let local = format!("_f_{}", f.name);
            let assigned = assigned_anywhere(body, &f.name);
            let ty = self.ctx.local_type(&f.ty);
            let line = match (assigned, ty) {
                (false, _) => {
                    let code = self.field_default(f, c.pos)?;
                    format!("let mut {local} = {code};")
                }
                (true, Some(t)) if self.ctx.has_default(&f.ty) => {
                    format!("let mut {local}: {t} = Default::default();")
                }
                (true, Some(t)) => format!("let mut {local}: {t};"),
                (true, None) => format!("let mut {local};"),
            };
            self.line(line);
            self.ctx.declare(
                &local,
                Binding {
                    code: local.clone(),
                    ty: f.ty.clone(),
                    form: Form::Place,
                },
            );
            self.ctx.frame_mut()?.init_fields.insert(f.name.clone(), local);
        }
        Ok(())
    }

    /// `Self { base: _base, x: _f_x }`
    fn struct_literal(&self, c: &HirClass) -> String {
        let mut parts = Vec::new();
        if self.user_base(c).is_some() {
            parts.push("base: _base".to_string());
        }
        for f in &c.fields {
            parts.push(format!("{}: _f_{}", rust_ident(&f.name), f.name));
        }
        format!("Self {{ {} }}", parts.join(", "))
    }

    // --- Display ---

    fn emit_display(&mut self, c: &HirClass) -> Result<()> {
        let Some(m) = c.method("__str__").or_else(|| c.method("__repr__")) else {
            return Ok(());
        };
        let call = format!("self.{}()", rust_ident(&m.name));
        let call = if m.attrs.can_fail {
            format!("{call}.map_err(|_| std::fmt::Error)?")
        } else {
            call
        };
        self.line("");
        self.open(format!("impl std::fmt::Display for {}", c.name));
        self.open("fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result");
        self.line(format!("write!(f, \"{{}}\", {call})"));
        self.close();
        self.close();
        Ok(())
    }
}

/// `super().__init__(args)` の引数
fn super_init_args(stmt: &HirStmt) -> Option<(&[HirExpr], &[(String, HirExpr)])> {
    let HirStmtKind::Expr(e) = &stmt.kind else {
        return None;
    };
    match &e.kind {
        HirExprKind::MethodCall {
            receiver,
            method,
            args,
            kwargs,
        } if method == "__init__" && super::method_gen::is_super_call(receiver) => {
            Some((args.as_slice(), kwargs.as_slice()))
        }
        _ => None,
    }
}

/// `self.x = ...` で直下の文から代入されるフィールド
fn direct_field_assignments(body: &[HirStmt]) -> BTreeSet<&str> {
    body.iter()
        .filter_map(|s| match &s.kind {
            HirStmtKind::Assign { target, .. } => self_field(target),
            _ => None,
        })
        .collect()
}

fn assigned_anywhere(body: &[HirStmt], field: &str) -> bool {
    let mut found = false;
    visit::walk_stmts(body, &mut |s| {
        if let HirStmtKind::Assign { target, .. } | HirStmtKind::AugAssign { target, .. } = &s.kind {
            if self_field(target) == Some(field) {
                found = true;
            }
        }
    });
    found
}

fn self_field(target: &AssignTarget) -> Option<&str> {
    match target {
        AssignTarget::Attribute { value, attr } if value.as_name() == Some("self") => Some(attr),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pos() -> SourcePos {
        SourcePos::unknown()
    }

    fn set_field(name: &str, nested: bool) -> HirStmt {
        let assign = HirStmt::new(
            HirStmtKind::Assign {
                target: AssignTarget::Attribute {
                    value: HirExpr::name("self", pos()),
                    attr: name.to_string(),
                },
                value: HirExpr::new(HirExprKind::Bool(true), pos()),
                annotation: None,
            },
            pos(),
        );
        if !nested {
            return assign;
        }
        HirStmt::new(
            HirStmtKind::If {
                test: HirExpr::name("flag", pos()),
                body: vec![assign],
                orelse: vec![],
            },
            pos(),
        )
    }

    #[test]
    fn test_direct_and_nested_field_assignments() {
        let body = vec![set_field("a", false), set_field("b", true)];
        let direct: Vec<&str> = direct_field_assignments(&body).into_iter().collect();
        assert_eq!(direct, vec!["a"]);
        assert!(assigned_anywhere(&body, "b"));
        assert!(!assigned_anywhere(&body, "c"));
    }

    #[test]
    fn test_super_init_detected() {
        let call = HirExpr::new(
            HirExprKind::MethodCall {
                receiver: Box::new(HirExpr::new(
                    HirExprKind::Call {
                        func: "super".to_string(),
                        args: vec![],
                        kwargs: vec![],
                    },
                    pos(),
                )),
                method: "__init__".to_string(),
                args: vec![HirExpr::name("name", pos())],
                kwargs: vec![],
            },
            pos(),
        );
        let stmt = HirStmt::new(HirStmtKind::Expr(call), pos());
        let (args, kwargs) = super_init_args(&stmt).unwrap();
        assert_eq!(args.len(), 1);
        assert!(kwargs.is_empty());
        assert!(super_init_args(&set_field("a", false)).is_none());
    }
}
