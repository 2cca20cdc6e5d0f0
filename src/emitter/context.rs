//! Code generation context
//!
//! 生成中の状態をまとめて持つ:
//! - 宣言済み変数のスタック (最初の束縛が `let`、以降は再代入)
//! - 関数・メソッドのシグネチャ索引とクラス情報
//! - try ブロックのラベルと後始末 (finally / with) のスタック
//! - 出力に必要な依存・エラー型・ヘルパ・union enum

use super::value::{Form, Value};
use crate::error::{DepylerError, Result};
use crate::hir::visit;
use crate::hir::*;
use crate::manifest::Dependency;
use crate::semantic::{map_type, union_enum_name, ExceptionHierarchy, MapMode, Type};
use crate::stdlib::{self, ErrorTaxon};
use std::collections::{BTreeMap, BTreeSet};

/// Rust の予約語と衝突する名前は末尾に `_` を付ける
const RESERVED: &[&str] = &[
    "as", "async", "await", "box", "break", "const", "continue", "crate", "do", "dyn", "else",
    "enum", "extern", "false", "final", "fn", "for", "if", "impl", "in", "let", "loop", "macro",
    "match", "mod", "move", "mut", "override", "priv", "pub", "ref", "return", "static",
    "struct", "super", "trait", "true", "try", "type", "typeof", "unsafe", "unsized", "use",
    "virtual", "where", "while", "yield", "abstract", "become", "gen",
];

/// `max_size` → `MAX_SIZE`
pub fn global_ident(name: &str) -> String {
    name.to_uppercase()
}

pub fn rust_ident(name: &str) -> String {
    if RESERVED.contains(&name) {
        format!("{name}_")
    } else {
        name.to_string()
    }
}

/// A declared local
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub code: String,
    pub ty: Type,
    pub form: Form,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSig {
    pub name: String,
    pub ty: Type,
    pub mode: ParamMode,
    pub default: Option<HirExpr>,
}

impl ParamSig {
    /// Passing convention after mapping (`Option<Vec<T>>` has no `&mut` form)
    pub fn passing(&self) -> ParamMode {
        match self.mode {
            ParamMode::Borrow if self.ty.has_borrow_form() => ParamMode::Borrow,
            ParamMode::BorrowMut
                if matches!(
                    self.ty,
                    Type::Str
                        | Type::Bytes
                        | Type::List(_)
                        | Type::Dict(_, _)
                        | Type::Set(_)
                        | Type::Class(_)
                        | Type::Native(_)
                ) =>
            {
                ParamMode::BorrowMut
            }
            _ => ParamMode::ByValue,
        }
    }
}

/// Callable signature as seen from a call site
#[derive(Debug, Clone, PartialEq)]
pub struct FnSig {
    /// Rust 側の呼び出し名
    pub rust_name: String,
    /// `self` / `cls` を除く
    pub params: Vec<ParamSig>,
    pub ret: Type,
    pub can_fail: bool,
    pub generator: bool,
    pub is_async: bool,
    pub method: Option<MethodKind>,
    pub self_mut: bool,
    pub property: bool,
}

impl FnSig {
    pub fn from_function(f: &HirFunction) -> Self {
        let generator = f.attrs.generator;
        let params = f
            .value_params()
            .iter()
            .map(|p| ParamSig {
                name: p.name.clone(),
                ty: p.ty.clone(),
                // ジェネレータは引数を構造体に持つので常に所有で受ける
                mode: if generator { ParamMode::ByValue } else { p.mode },
                default: p.default.clone(),
            })
            .collect();
        Self {
            rust_name: rust_ident(&f.name),
            params,
            ret: f.ret.clone(),
            can_fail: f.attrs.can_fail,
            generator,
            is_async: f.attrs.is_async,
            method: f.method,
            self_mut: f.attrs.self_mut,
            property: f.attrs.property,
        }
    }

    /// 呼び出し式の型 (ジェネレータはイテレータ)
    pub fn call_type(&self) -> Type {
        self.ret.clone()
    }
}

/// What the emitter needs to know about a user class
#[derive(Debug, Clone, PartialEq)]
pub struct ClassInfo {
    pub name: String,
    pub base: Option<String>,
    pub fields: Vec<(String, Type)>,
    pub methods: BTreeMap<String, FnSig>,
    pub properties: BTreeSet<String>,
    /// `@x.setter` を持つプロパティ
    pub setters: BTreeSet<String>,
    pub class_attrs: BTreeMap<String, Type>,
    pub is_exception: bool,
    pub is_dataclass: bool,
    pub has_display: bool,
    /// `self.x = defaultdict(..)` のフィールド
    pub default_fields: BTreeSet<String>,
}

impl ClassInfo {
    pub fn from_class(class: &HirClass) -> Self {
        let methods = class
            .methods
            .iter()
            .filter(|m| m.attrs.setter_of.is_none())
            .map(|m| (m.name.clone(), FnSig::from_function(m)))
            .collect();
        let setters = class
            .methods
            .iter()
            .filter_map(|m| m.attrs.setter_of.clone())
            .collect();
        Self {
            name: class.name.clone(),
            base: class.base.clone(),
            fields: class
                .fields
                .iter()
                .map(|f| (f.name.clone(), f.ty.clone()))
                .collect(),
            methods,
            properties: class.properties.clone(),
            setters,
            class_attrs: class
                .class_attrs
                .iter()
                .map(|(n, v)| (n.clone(), v.ty.clone()))
                .collect(),
            is_exception: class.is_exception,
            is_dataclass: class.is_dataclass,
            has_display: class.method("__str__").is_some() || class.method("__repr__").is_some(),
            default_fields: class
                .methods
                .iter()
                .flat_map(|m| default_dict_targets(&m.body).1)
                .collect(),
        }
    }

    /// 引数 (`__init__`、dataclass ならフィールド順)
    pub fn init_params(&self) -> Vec<ParamSig> {
        if let Some(init) = self.methods.get("__init__") {
            return init.params.clone();
        }
        Vec::new()
    }
}

/// `x = defaultdict(..)` / `self.x = Counter()` の束縛先 (ローカル名, self のフィールド)
pub fn default_dict_targets(stmts: &[HirStmt]) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut names = BTreeSet::new();
    let mut fields = BTreeSet::new();
    visit::walk_stmts(stmts, &mut |s| {
        let HirStmtKind::Assign { target, value, .. } = &s.kind else {
            return;
        };
        let fills = matches!(
            &value.kind,
            HirExprKind::Call { func, .. } if func == "collections.defaultdict" || func == "collections.Counter"
        );
        if !fills {
            return;
        }
        match target {
            AssignTarget::Name(n) => {
                names.insert(n.clone());
            }
            AssignTarget::Attribute { value, attr } if value.as_name() == Some("self") => {
                fields.insert(attr.clone());
            }
            _ => {}
        }
    });
    (names, fields)
}

/// Module-level name shared with functions
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalKind {
    /// `const NAME: T = lit;`
    Const(Type),
    /// `static NAME: Lazy<T>` (変更されるなら `Lazy<Mutex<T>>`)
    Static { ty: Type, mutable: bool },
}

/// One enclosing `try`
#[derive(Debug, Clone, PartialEq)]
pub struct TryScope {
    pub label: String,
    /// `None`: 全部捕捉する
    pub caught: Option<BTreeSet<String>>,
}

impl TryScope {
    pub fn catches(&self, ty: &str) -> bool {
        self.caught.as_ref().map_or(true, |c| c.contains(ty))
    }
}

/// Statements to run before control leaves a region (finally, `__exit__`)
#[derive(Debug, Clone, PartialEq)]
pub struct Cleanup {
    pub lines: Vec<String>,
    pub loop_depth: usize,
    pub try_depth: usize,
}

/// Per-function (or per-closure) state
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub scopes: Vec<BTreeMap<String, Binding>>,
    pub mutable: BTreeSet<String>,
    pub ret: Type,
    pub can_fail: bool,
    pub generator: bool,
    pub is_async: bool,
    /// ラムダ・内包表記のクロージャ (ラベル付き break で抜けられない)
    pub closure: bool,
    pub tries: Vec<TryScope>,
    pub cleanups: Vec<Cleanup>,
    pub loop_depth: usize,
    /// ループごとのラベル (try を含むループだけ持つ)
    pub loop_labels: Vec<Option<String>>,
    pub class: Option<String>,
    /// ハンドラ内で保持している例外 (bare `raise` で再送出する)
    pub held_errors: Vec<String>,
    /// 入れ子の関数
    pub fns: BTreeMap<String, FnSig>,
    /// `__init__` 内で構築前のフィールド → ローカル変数
    pub init_fields: BTreeMap<String, String>,
    /// `__init__` 内の `return` が返す式
    pub init_return: Option<String>,
    /// ジェネレータ本体の `return` (イテレータを閉じる文)
    pub gen_return: Option<String>,
    /// 状態機械に開いたループ: (深さ, break の文, continue の文)
    pub gen_loops: Vec<(usize, String, String)>,
    /// `defaultdict` / `Counter` を束縛したローカル
    pub default_dicts: BTreeSet<String>,
}

impl Frame {
    pub fn function(ret: Type, can_fail: bool) -> Self {
        Self {
            scopes: vec![BTreeMap::new()],
            ret,
            can_fail,
            ..Self::default()
        }
    }

    pub fn closure(ret: Type) -> Self {
        Self {
            scopes: vec![BTreeMap::new()],
            ret,
            closure: true,
            ..Self::default()
        }
    }
}

/// Runtime helper functions emitted on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Helper {
    FloorDiv,
    Mod,
    FloatFloorDiv,
    FloatMod,
    Index,
    SliceIndices,
    Range,
    Repr,
}

/// C5: mutable state threaded through code generation
#[derive(Debug, Default)]
pub struct CodegenContext {
    frames: Vec<Frame>,
    pub functions: BTreeMap<String, FnSig>,
    pub classes: BTreeMap<String, ClassInfo>,
    pub globals: BTreeMap<String, GlobalKind>,
    pub hierarchy: ExceptionHierarchy,
    pub dependencies: BTreeSet<Dependency>,
    /// 生成するエラー型 (タクソンとユーザ例外)
    pub error_types: BTreeSet<String>,
    pub helpers: BTreeSet<Helper>,
    pub unions: BTreeMap<String, Vec<Type>>,
    pub needs_dyn_error: bool,
    counter: usize,
}

impl CodegenContext {
    pub fn new(module: &HirModule) -> Self {
        let mut ctx = Self {
            hierarchy: ExceptionHierarchy::from_module(module),
            ..Self::default()
        };
        for f in module.functions() {
            ctx.functions.insert(f.name.clone(), FnSig::from_function(f));
        }
        for class in module.classes() {
            ctx.classes.insert(class.name.clone(), ClassInfo::from_class(class));
        }
        ctx
    }

    /// `_{prefix}{n}`
    pub fn fresh(&mut self, prefix: &str) -> String {
        let n = self.counter;
        self.counter += 1;
        format!("_{prefix}{n}")
    }

    // --- frames ---

    pub fn push_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub fn frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn frame_mut(&mut self) -> Result<&mut Frame> {
        self.frames
            .last_mut()
            .ok_or_else(|| DepylerError::Internal("no active function frame".to_string()))
    }

    pub fn push_scope(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.scopes.push(BTreeMap::new());
        }
    }

    pub fn pop_scope(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.scopes.pop();
        }
    }

    pub fn declare(&mut self, name: &str, binding: Binding) {
        if let Some(scope) = self.frames.last_mut().and_then(|f| f.scopes.last_mut()) {
            scope.insert(name.to_string(), binding);
        }
    }

    /// 変数 `name` を `code` として宣言する
    pub fn declare_local(&mut self, name: &str, ty: Type, form: Form) {
        let code = self.local_code(name);
        self.declare(name, Binding { code, ty, form });
    }

    /// Rust spelling of a local (`__init__` の構築前フィールドは別名)
    pub fn local_code(&self, name: &str) -> String {
        rust_ident(name)
    }

    /// Innermost binding visible from the current frame
    ///
    /// クロージャのフレームは外側のフレームの束縛も見える。
    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        for frame in self.frames.iter().rev() {
            for scope in frame.scopes.iter().rev() {
                if let Some(b) = scope.get(name) {
                    return Some(b);
                }
            }
        }
        None
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn is_mutable(&self, name: &str) -> bool {
        self.frames
            .last()
            .map_or(false, |f| f.mutable.contains(name))
    }

    pub fn lookup_fn(&self, name: &str) -> Option<&FnSig> {
        for frame in self.frames.iter().rev() {
            if let Some(sig) = frame.fns.get(name) {
                return Some(sig);
            }
        }
        self.functions.get(name)
    }

    pub fn current_class(&self) -> Option<&str> {
        self.frames.iter().rev().find_map(|f| f.class.as_deref())
    }

    /// Method `name` on `class` or one of its bases, with the field path to reach it
    pub fn find_method(&self, class: &str, name: &str) -> Option<(String, &FnSig)> {
        let mut path = String::new();
        let mut current = Some(class.to_string());
        while let Some(c) = current {
            let info = self.classes.get(&c)?;
            if let Some(sig) = info.methods.get(name) {
                return Some((path, sig));
            }
            path.push_str(".base");
            current = info.base.clone();
        }
        None
    }

    /// Field `name` on `class` or a base: `(path prefix, type)`
    pub fn find_field(&self, class: &str, name: &str) -> Option<(String, Type)> {
        let mut path = String::new();
        let mut current = Some(class.to_string());
        while let Some(c) = current {
            let info = self.classes.get(&c)?;
            if let Some((_, ty)) = info.fields.iter().find(|(f, _)| f == name) {
                return Some((path, ty.clone()));
            }
            path.push_str(".base");
            current = info.base.clone();
        }
        None
    }

    pub fn class_has_base(&self, class: &str) -> bool {
        self.classes
            .get(class)
            .and_then(|c| c.base.as_ref())
            .map_or(false, |b| self.classes.contains_key(b))
    }

    // --- error routing ---

    pub fn use_error_type(&mut self, name: &str) -> String {
        let ty = self.hierarchy.error_type(name);
        self.error_types.insert(ty.clone());
        ty
    }

    pub fn dyn_error(&mut self) -> &'static str {
        self.needs_dyn_error = true;
        "DynError"
    }

    /// Cleanup lines to run when leaving to `depth` (try depth, loop depth)
    fn cleanups_until(&self, try_depth: Option<usize>, loop_depth: Option<usize>) -> Vec<String> {
        let Some(frame) = self.frames.last() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for c in frame.cleanups.iter().rev() {
            let inside = match (try_depth, loop_depth) {
                (Some(t), _) => c.try_depth > t,
                (_, Some(l)) => c.loop_depth >= l,
                (None, None) => true,
            };
            if inside {
                out.extend(c.lines.iter().cloned());
            }
        }
        out
    }

    /// Statement that leaves the current region with error `err`
    ///
    /// 囲む try があればそこへ break、Result を返す関数なら return Err、
    /// それ以外は panic。
    pub fn fail_path(&mut self, err: &str) -> String {
        let (route, can_fail, closure) = match self.frames.last() {
            Some(f) => (
                f.tries.last().map(|t| (t.label.clone(), f.tries.len() - 1)),
                f.can_fail,
                f.closure,
            ),
            None => (None, false, false),
        };
        if let Some((label, depth)) = route.filter(|_| !closure) {
            let mut parts = self.cleanups_until(Some(depth), None);
            parts.push(format!("break '{label} Some({err})"));
            return format!("{{ {}; }}", parts.join("; "));
        }
        if can_fail && !closure {
            let mut parts = self.cleanups_until(None, None);
            parts.push(format!("return Err({err})"));
            return format!("{{ {}; }}", parts.join("; "));
        }
        format!("panic!(\"{{}}\", {err})")
    }

    /// `raise` of an already boxed error
    pub fn raise_boxed(&mut self, err: &str) -> String {
        self.dyn_error();
        self.fail_path(err)
    }

    /// Result-returning call, unwrapped for the current context
    pub fn unwrap_fallible(&mut self, call: &str) -> String {
        self.dyn_error();
        let (in_try, can_fail, closure, has_cleanup) = match self.frames.last() {
            Some(f) => (!f.tries.is_empty(), f.can_fail, f.closure, !f.cleanups.is_empty()),
            None => (false, false, false, false),
        };
        if closure || (!in_try && !can_fail) {
            return format!("{call}.unwrap_or_else(|_e| panic!(\"{{}}\", _e))");
        }
        if can_fail && !in_try && !has_cleanup {
            return format!("{call}?");
        }
        let fail = self.fail_path("_e");
        format!("match {call} {{ Ok(_v) => _v, Err(_e) => {fail} }}")
    }

    /// Guard label for an implicit error of type `taxon` raised by an operation
    ///
    /// 囲む try のどれかが捕捉するときだけ経路を作る。
    pub fn implicit_route(&mut self, taxon: ErrorTaxon, message: &str) -> Option<String> {
        let frame = self.frames.last()?;
        if frame.closure || !frame.tries.iter().any(|t| t.catches(taxon.name())) {
            return None;
        }
        self.error_types.insert(taxon.name().to_string());
        self.dyn_error();
        let err = format!(
            "DynError::from({}::new({}))",
            taxon.name(),
            super::value::string_literal(message, false)
        );
        Some(self.fail_path(&err))
    }

    pub fn cleanups_for_return(&self) -> Vec<String> {
        self.cleanups_until(None, None)
    }

    pub fn cleanups_for_loop_exit(&self) -> Vec<String> {
        let depth = self.frames.last().map_or(0, |f| f.loop_depth);
        self.cleanups_until(None, Some(depth))
    }

    // --- types ---

    pub fn need(&mut self, dep: Dependency) {
        self.dependencies.insert(dep);
    }

    /// Record deps / unions / error alias a type spelling relies on
    pub fn note_type(&mut self, ty: &Type) {
        match ty {
            Type::List(t) | Type::Optional(t) => self.note_type(t),
            Type::Set(t) => {
                self.need(Dependency::HashSet);
                self.note_type(t);
            }
            Type::Dict(k, v) => {
                self.need(Dependency::HashMap);
                self.note_type(k);
                self.note_type(v);
            }
            Type::Tuple(items) => items.iter().for_each(|t| self.note_type(t)),
            Type::Union(members) => {
                members.iter().for_each(|t| self.note_type(t));
                if !members.iter().any(Type::contains_unknown) {
                    self.unions
                        .insert(union_enum_name(members), members.clone());
                }
            }
            Type::Callable { params, ret } => {
                params.iter().for_each(|t| self.note_type(t));
                self.note_type(ret);
            }
            Type::Native(name) => {
                if let Some(dep) = stdlib::native_dependency(name) {
                    self.need(dep);
                }
                if name == "DynError" {
                    self.needs_dyn_error = true;
                }
            }
            _ => {}
        }
    }

    /// Rust spelling of `ty` for a position that requires a concrete type
    pub fn rust_type(&mut self, ty: &Type, mode: MapMode, pos: SourcePos) -> Result<String> {
        let mapped = map_type(ty, mode, pos)?;
        self.note_type(ty);
        Ok(mapped.to_string())
    }

    /// Annotation for a `let`; `None` when inference left a hole
    pub fn local_type(&mut self, ty: &Type) -> Option<String> {
        if ty.contains_unknown() || matches!(ty, Type::None) {
            return None;
        }
        self.rust_type(ty, MapMode::Owned, SourcePos::unknown()).ok()
    }

    /// 型から構築できる既定値 (`Default::default()` を持つか)
    pub fn has_default(&self, ty: &Type) -> bool {
        match ty {
            Type::Int
            | Type::Float
            | Type::Bool
            | Type::Str
            | Type::Bytes
            | Type::None
            | Type::List(_)
            | Type::Dict(_, _)
            | Type::Set(_)
            | Type::Optional(_) => true,
            Type::Tuple(items) => items.iter().all(|t| self.has_default(t)),
            Type::Class(name) => self.classes.get(name).map_or(false, |c| {
                !c.is_exception
                    && c.fields.iter().all(|(_, t)| self.has_default(t))
                    && c.base.as_ref().map_or(true, |b| {
                        !self.classes.contains_key(b) || self.has_default(&Type::Class(b.clone()))
                    })
            }),
            _ => false,
        }
    }

    pub fn use_helper(&mut self, helper: Helper) {
        self.helpers.insert(helper);
    }

    /// Global binding as a value
    ///
    /// `place` は書き換え用 (ロックを文の終わりまで保持する)。読み出しは
    /// ロックをすぐ離すスナップショットにする: 同じ文で 2 回読んでもデッドロックしない。
    /// 括弧で包むので式文の先頭や演算子の左辺に置いてもブロック文にならない。
    pub fn global_value(&self, name: &str, place: bool) -> Option<Value> {
        let ident = global_ident(name);
        match self.globals.get(name)? {
            GlobalKind::Const(Type::Str) => Some(Value::new(ident, Type::Str, Form::Literal)),
            GlobalKind::Const(ty) => Some(Value::new(ident, ty.clone(), Form::Place)),
            GlobalKind::Static { ty, mutable: false } => {
                Some(Value::new(format!("(*{ident})"), ty.clone(), Form::Place))
            }
            GlobalKind::Static { ty, mutable: true } if place => Some(Value::new(
                format!("(*{ident}.lock().unwrap())"),
                ty.clone(),
                Form::Place,
            )),
            GlobalKind::Static { ty, mutable: true } => {
                let read = if ty.is_copy() { "*_g" } else { "_g.clone()" };
                Some(Value::owned(
                    format!("({{ let _g = {ident}.lock().unwrap(); {read} }})"),
                    ty.clone(),
                ))
            }
        }
    }

    pub fn taxa(&self) -> BTreeSet<ErrorTaxon> {
        self.error_types
            .iter()
            .filter_map(|n| ErrorTaxon::from_python(n))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_names() {
        assert_eq!(rust_ident("type"), "type_");
        assert_eq!(rust_ident("match"), "match_");
        assert_eq!(rust_ident("count"), "count");
    }

    #[test]
    fn test_default_frame_has_unknown_return() {
        let frame = Frame::default();
        assert_eq!(frame.ret, Type::Unknown);
        assert!(frame.gen_loops.is_empty());
    }

    #[test]
    fn test_scopes_shadow_and_pop() {
        let mut ctx = CodegenContext::default();
        ctx.push_frame(Frame::function(Type::None, false));
        ctx.declare_local("x", Type::Int, Form::Place);
        ctx.push_scope();
        ctx.declare_local("y", Type::Str, Form::Place);
        assert!(ctx.is_declared("x"));
        assert!(ctx.is_declared("y"));
        ctx.pop_scope();
        assert!(!ctx.is_declared("y"));
    }

    #[test]
    fn test_fail_path_by_context() {
        let mut ctx = CodegenContext::default();
        ctx.push_frame(Frame::function(Type::None, false));
        assert!(ctx.fail_path("e").starts_with("panic!"));
        ctx.pop_frame();

        ctx.push_frame(Frame::function(Type::Int, true));
        assert_eq!(ctx.fail_path("e"), "{ return Err(e); }");
        ctx.frame_mut().unwrap().tries.push(TryScope {
            label: "try_0".to_string(),
            caught: None,
        });
        assert_eq!(ctx.fail_path("e"), "{ break 'try_0 Some(e); }");
    }

    #[test]
    fn test_unwrap_fallible() {
        let mut ctx = CodegenContext::default();
        ctx.push_frame(Frame::function(Type::Int, true));
        assert_eq!(ctx.unwrap_fallible("f(x)"), "f(x)?");
        ctx.pop_frame();
        ctx.push_frame(Frame::function(Type::Int, false));
        assert!(ctx.unwrap_fallible("f(x)").contains("unwrap_or_else"));
    }

    #[test]
    fn test_implicit_route_only_when_caught() {
        let mut ctx = CodegenContext::default();
        ctx.push_frame(Frame::function(Type::Int, false));
        assert!(ctx
            .implicit_route(ErrorTaxon::ZeroDivisionError, "division by zero")
            .is_none());
        let mut caught = BTreeSet::new();
        caught.insert("ZeroDivisionError".to_string());
        ctx.frame_mut().unwrap().tries.push(TryScope {
            label: "try_0".to_string(),
            caught: Some(caught),
        });
        let route = ctx
            .implicit_route(ErrorTaxon::ZeroDivisionError, "division by zero")
            .unwrap();
        assert!(route.contains("break 'try_0"));
        assert!(ctx.error_types.contains("ZeroDivisionError"));
    }

    #[test]
    fn test_locked_global_read_is_parenthesized() {
        let mut ctx = CodegenContext::default();
        ctx.globals.insert(
            "calls".to_string(),
            GlobalKind::Static {
                ty: Type::List(Box::new(Type::Int)),
                mutable: true,
            },
        );
        let read = ctx.global_value("calls", false).unwrap();
        assert_eq!(read.code, "({ let _g = CALLS.lock().unwrap(); _g.clone() })");
        // 添字の受け手にしても式のまま
        assert!(format!("{}[0]", read.code).starts_with("({"));
        let place = ctx.global_value("calls", true).unwrap();
        assert_eq!(place.code, "(*CALLS.lock().unwrap())");
    }

    #[test]
    fn test_cleanups_before_return() {
        let mut ctx = CodegenContext::default();
        ctx.push_frame(Frame::function(Type::None, true));
        ctx.frame_mut().unwrap().cleanups.push(Cleanup {
            lines: vec!["println!(\"done\")".to_string()],
            loop_depth: 0,
            try_depth: 0,
        });
        assert_eq!(
            ctx.fail_path("e"),
            "{ println!(\"done\"); return Err(e); }"
        );
    }
}
