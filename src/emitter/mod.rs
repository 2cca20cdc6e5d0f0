//! Emitter module - Rust code generation
//!
//! 推論済みの HIR から Rust ソースを組み立てる。出力の順序:
//! use 宣言 → DynError → エラー型 → union enum → ヘルパ → Args → const/static → 項目 → main
//!
//! ## サブモジュール
//! - `context` - C5 コード生成コンテキスト
//! - `value` - 式のコード片と所有形態
//! - `expr_gen` / `call_gen` / `builtin_gen` / `method_gen` - 式 (C6)
//! - `comp_gen` - 内包表記とラムダ
//! - `format_gen` - f-string / print / str()
//! - `stmt_gen` / `exception_gen` / `func_gen` / `class_gen` / `generator_gen` - 文と項目 (C7)
//! - `argparse_gen` - `argparse` → clap の Args 構造体
//! - `template` - レジストリのテンプレート展開
//! - `helpers` - 生成コードに入れる補助関数と union enum

mod argparse_gen;
mod builtin_gen;
mod call_gen;
mod class_gen;
mod comp_gen;
pub mod context;
mod exception_gen;
mod expr_gen;
mod format_gen;
mod func_gen;
mod generator_gen;
pub mod helpers;
mod method_gen;
mod stmt_gen;
pub mod template;
pub mod value;

#[cfg(test)]
mod tests;

pub use context::CodegenContext;

use crate::error::Result;
use crate::hir::visit;
use crate::hir::*;
use crate::manifest::Dependency;
use crate::semantic::{collect_mutations, ArgparseArg, MapMode, Type};
use crate::stdlib::{exceptions::error_struct, ErrorTaxon};
use context::{global_ident, Frame, GlobalKind};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// 生成コードの先頭に置く lint 抑制
const FILE_HEADER: &str = "#![allow(unused_imports, unused_mut, unused_variables, unused_parens, unused_assignments, dead_code, non_snake_case, unreachable_code, unused_labels)]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitOptions {
    /// ライブラリとして出力する (main を作らず、トップレベル文は `run()` に入れる)
    pub library: bool,
    /// docstring と関数属性を doc コメントに出す
    pub emit_docs: bool,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            library: false,
            emit_docs: true,
        }
    }
}

/// Emitted source plus what it needs to build
#[derive(Debug, Clone, PartialEq)]
pub struct EmitOutput {
    pub code: String,
    pub dependencies: BTreeSet<Dependency>,
    pub error_types: BTreeSet<ErrorTaxon>,
}

/// Emit Rust code for an analyzed module
pub fn emit(module: &HirModule, options: &EmitOptions) -> Result<EmitOutput> {
    RustEmitter::new(module, options.clone()).emit_module()
}

/// Rust code emitter
pub struct RustEmitter<'m> {
    module: &'m HirModule,
    options: EmitOptions,
    ctx: CodegenContext,
    indent: usize,
    lines: Vec<String>,
    /// 関数ごとの推論済みローカル型 (フレームと対応)
    locals: Vec<BTreeMap<String, Type>>,
    /// `add_argument` から集めた Args のフィールド
    args: Vec<ArgparseArg>,
    args_about: Option<String>,
    /// const / static に移したので main で実行しない文
    skipped: BTreeSet<usize>,
    globals_out: Vec<String>,
}

impl<'m> RustEmitter<'m> {
    pub fn new(module: &'m HirModule, options: EmitOptions) -> Self {
        Self {
            module,
            options,
            ctx: CodegenContext::new(module),
            indent: 0,
            lines: Vec::new(),
            locals: Vec::new(),
            args: Vec::new(),
            args_about: None,
            skipped: BTreeSet::new(),
            globals_out: Vec::new(),
        }
    }

    // --- 行バッファ ---

    fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if text.is_empty() {
            self.lines.push(String::new());
        } else {
            self.lines.push(format!("{}{}", "    ".repeat(self.indent), text));
        }
    }

    /// `header {` を出して字下げする
    fn open(&mut self, header: impl AsRef<str>) {
        let header = header.as_ref();
        if header.is_empty() {
            self.line("{");
        } else {
            self.line(format!("{header} {{"));
        }
        self.indent += 1;
    }

    fn close(&mut self) {
        self.close_with("");
    }

    /// `}` + suffix (`} else {` / `};`)
    fn close_with(&mut self, suffix: &str) {
        self.indent = self.indent.saturating_sub(1);
        self.line(format!("}}{suffix}"));
    }

    /// Run `f` into a fresh buffer at indent 0 and return its lines
    fn capture(&mut self, f: impl FnOnce(&mut Self) -> Result<()>) -> Result<Vec<String>> {
        let saved_lines = std::mem::take(&mut self.lines);
        let saved_indent = std::mem::replace(&mut self.indent, 0);
        let result = f(self);
        let captured = std::mem::replace(&mut self.lines, saved_lines);
        self.indent = saved_indent;
        result.map(|_| captured)
    }

    /// Re-indent captured lines under the current indent
    fn emit_lines(&mut self, lines: &[String]) {
        for l in lines {
            self.line(l);
        }
    }

    // --- フレーム ---

    fn enter_frame(&mut self, frame: Frame, locals: BTreeMap<String, Type>) {
        self.ctx.push_frame(frame);
        self.locals.push(locals);
    }

    fn leave_frame(&mut self) {
        self.ctx.pop_frame();
        self.locals.pop();
    }

    /// 推論済みのローカル型 (内側のフレームから)
    fn local_ty(&self, name: &str) -> Option<Type> {
        self.locals.iter().rev().find_map(|l| l.get(name).cloned())
    }

    // --- モジュール ---

    fn emit_module(mut self) -> Result<EmitOutput> {
        let module = self.module;
        self.classify_globals()?;
        self.collect_argparse();

        let mut items = Vec::new();
        let mut loose: Vec<&HirStmt> = Vec::new();
        for (i, stmt) in module.items.iter().enumerate() {
            match &stmt.kind {
                HirStmtKind::FuncDef(f) => {
                    let lines = self.capture(|e| e.emit_function(f, None))?;
                    items.push(lines.join("\n"));
                }
                HirStmtKind::ClassDef(c) => {
                    let lines = self.capture(|e| e.emit_class(c))?;
                    items.push(lines.join("\n"));
                }
                HirStmtKind::Import(_) => {}
                _ if self.skipped.contains(&i) => {}
                _ => loose.push(stmt),
            }
        }
        if let Some(entry) = self.emit_entry(&loose)? {
            items.push(entry);
        }
        let statics = std::mem::take(&mut self.globals_out);
        let args = self.args_struct()?;

        let body = items.join("\n\n");
        let output = self.assemble(args, statics, body);
        debug!(
            items = module.items.len(),
            dependencies = output.dependencies.len(),
            error_types = output.error_types.len(),
            "emit complete"
        );
        Ok(output)
    }

    /// `fn main()` / `pub fn run()` for loose top-level statements
    fn emit_entry(&mut self, loose: &[&HirStmt]) -> Result<Option<String>> {
        let user_main = self.module.function("main").is_some();
        if self.options.library && loose.is_empty() {
            return Ok(None);
        }
        if !self.options.library && user_main {
            return Ok(None);
        }
        let can_fail = self.module.entry_can_fail;
        let stmts: Vec<HirStmt> = loose.iter().map(|s| (*s).clone()).collect();
        let mut frame = Frame::function(Type::None, can_fail);
        frame.mutable = collect_mutations(&stmts, &[]).all();
        let locals: BTreeMap<String, Type> = self
            .module
            .globals
            .iter()
            .filter(|(n, _)| !self.ctx.globals.contains_key(*n))
            .map(|(n, t)| (n.clone(), t.clone()))
            .collect();
        let name = if self.options.library { "pub fn run" } else { "fn main" };
        let ret = if can_fail {
            let err = self.ctx.dyn_error();
            format!(" -> Result<(), {err}>")
        } else {
            String::new()
        };
        let lines = self.capture(|e| {
            e.open(format!("{name}(){ret}"));
            e.enter_frame(frame, locals);
            let result = e.emit_body(&stmts);
            if result.is_ok() && can_fail && !visit::always_returns(&stmts) {
                e.line("Ok(())");
            }
            e.leave_frame();
            result?;
            e.close();
            Ok(())
        })?;
        Ok(Some(lines.join("\n")))
    }

    fn assemble(&mut self, args: Option<String>, statics: Vec<String>, body: String) -> EmitOutput {
        let mut sections: Vec<String> = vec![FILE_HEADER.to_string()];

        let mut taxa: Vec<String> = self
            .ctx
            .error_types
            .iter()
            .filter(|n| ErrorTaxon::from_python(n).is_some())
            .cloned()
            .collect();
        taxa.sort();
        let errors: Vec<String> = taxa.iter().map(|n| error_struct(n)).collect();
        let unions: Vec<String> = self
            .ctx
            .unions
            .iter()
            .map(|(name, members)| helpers::union_enum_source(name, members))
            .collect();
        let helper_code: Vec<String> = self
            .ctx
            .helpers
            .iter()
            .map(|h| helpers::helper_source(*h).to_string())
            .collect();

        let mut rest = String::new();
        for part in errors
            .iter()
            .chain(unions.iter())
            .chain(helper_code.iter())
            .chain(args.iter())
            .chain(statics.iter())
        {
            rest.push_str(part);
            rest.push('\n');
        }
        rest.push_str(&body);

        let needs_dyn = self.ctx.needs_dyn_error || rest.contains("DynError");
        let mut uses = Vec::new();
        if rest.contains("HashMap") {
            uses.push("use std::collections::HashMap;");
        }
        if rest.contains("HashSet") {
            uses.push("use std::collections::HashSet;");
        }
        if !uses.is_empty() {
            sections.push(uses.join("\n"));
        }
        if needs_dyn {
            sections.push(helpers::DYN_ERROR_ALIAS.to_string());
        }
        for part in errors
            .into_iter()
            .chain(unions)
            .chain(helper_code)
            .chain(args)
        {
            sections.push(part.trim_end().to_string());
        }
        if !statics.is_empty() {
            sections.push(statics.join("\n"));
        }
        if !body.is_empty() {
            sections.push(body);
        }
        let mut code = sections.join("\n\n");
        code.push('\n');

        let dependencies = used_dependencies(&self.ctx.dependencies, &code);
        EmitOutput {
            code,
            dependencies,
            error_types: self.ctx.taxa(),
        }
    }

    // --- モジュール変数 ---

    /// Decide which module-level names become `const` / `static`
    ///
    /// 関数から参照される名前だけがモジュール変数として残る。それ以外は main のローカル。
    fn classify_globals(&mut self) -> Result<()> {
        let module = self.module;
        let user_entry = !self.options.library && module.function("main").is_some();
        let shared = shared_globals(module);

        let mut first: BTreeMap<&str, (usize, &HirExpr, Option<&Type>)> = BTreeMap::new();
        for (i, stmt) in module.items.iter().enumerate() {
            if let HirStmtKind::Assign {
                target: AssignTarget::Name(n),
                value,
                annotation,
            } = &stmt.kind
            {
                first.entry(n.as_str()).or_insert((i, value, annotation.as_ref()));
            }
        }

        for (name, ty) in &module.globals {
            let Some(&(idx, value, annotation)) = first.get(name.as_str()) else {
                continue;
            };
            let ty = annotation.cloned().unwrap_or_else(|| ty.clone());
            let mutated = module.mutable_globals.contains(name);
            let is_shared = shared.contains(name) || user_entry || self.options.library;
            let upper = name.chars().any(|c| c.is_ascii_uppercase())
                && !name.chars().any(|c| c.is_ascii_lowercase());
            if !mutated && (is_shared || upper) && const_literal(value).is_some() {
                let text = const_literal(value).unwrap_or_default();
                let rust_ty = match ty {
                    Type::Str => "&str".to_string(),
                    _ => self.ctx.rust_type(&ty, MapMode::Owned, value.pos)?,
                };
                self.globals_out.push(format!(
                    "{}const {}: {} = {};",
                    self.item_vis(),
                    global_ident(name),
                    rust_ty,
                    text
                ));
                self.ctx.globals.insert(name.clone(), GlobalKind::Const(ty));
                self.skipped.insert(idx);
            } else if is_shared {
                let kind = GlobalKind::Static {
                    ty: ty.clone(),
                    mutable: mutated,
                };
                // 初期化式は自分自身を参照しないので登録前に生成してよい
                let init = self.static_initializer(value, &ty)?;
                let rust_ty = self.ctx.rust_type(&ty, MapMode::Owned, value.pos)?;
                self.ctx.need(Dependency::OnceCell);
                let line = if mutated {
                    format!(
                        "static {}: once_cell::sync::Lazy<std::sync::Mutex<{}>> = once_cell::sync::Lazy::new(|| std::sync::Mutex::new({}));",
                        global_ident(name),
                        rust_ty,
                        init
                    )
                } else {
                    format!(
                        "static {}: once_cell::sync::Lazy<{}> = once_cell::sync::Lazy::new(|| {});",
                        global_ident(name),
                        rust_ty,
                        init
                    )
                };
                self.globals_out.push(line);
                self.ctx.globals.insert(name.clone(), kind);
                self.skipped.insert(idx);
            }
        }
        Ok(())
    }

    fn static_initializer(&mut self, value: &HirExpr, ty: &Type) -> Result<String> {
        self.enter_frame(Frame::closure(ty.clone()), BTreeMap::new());
        let result = self.expr(value).and_then(|v| self.coerce(v, ty));
        self.leave_frame();
        result
    }

    /// ライブラリなら項目を公開する
    fn item_vis(&self) -> &'static str {
        if self.options.library {
            "pub "
        } else {
            ""
        }
    }

    /// Owned value of an expression coerced to `ty`
    fn owned_expr(&mut self, e: &HirExpr, ty: &Type) -> Result<String> {
        let v = self.expr(e)?;
        self.coerce(v, ty)
    }
}

/// `const` にできる初期化式 (数値・真偽値・文字列リテラル)
fn const_literal(value: &HirExpr) -> Option<String> {
    match &value.kind {
        HirExprKind::Int { text, value } => Some(int_text(text, *value)),
        HirExprKind::Float { text, .. } => Some(float_text(text)),
        HirExprKind::Bool(b) => Some(b.to_string()),
        HirExprKind::Str { value, raw } => Some(value::string_literal(value, *raw)),
        HirExprKind::UnaryOp {
            op: HirUnaryOp::Neg,
            operand,
        } => match &operand.kind {
            HirExprKind::Int { .. } | HirExprKind::Float { .. } => {
                const_literal(operand).map(|t| format!("-{t}"))
            }
            _ => None,
        },
        _ => None,
    }
}

/// Integer literal text kept in its source base (`0xff`, `1_000`)
pub(crate) fn int_text(text: &str, value: i64) -> String {
    let lower = text.to_ascii_lowercase();
    if lower.starts_with("0x") || lower.starts_with("0b") {
        return lower;
    }
    if lower.starts_with("0o") {
        return lower;
    }
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit() || c == '_') {
        return value.to_string();
    }
    text.to_string()
}

/// Float literal that Rust accepts (`1.` → `1.0`, `1e5` → `1e5`)
pub(crate) fn float_text(text: &str) -> String {
    let t = text.replace('_', "");
    if t.is_empty() {
        return "0.0".to_string();
    }
    if t.ends_with('.') {
        return format!("{t}0");
    }
    if t.starts_with('.') {
        return format!("0{t}");
    }
    if !t.contains('.') && !t.contains('e') && !t.contains('E') && !t.contains("inf") {
        return format!("{t}.0");
    }
    t
}

/// Module-level names read or written from any function body
fn shared_globals(module: &HirModule) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for stmt in &module.items {
        match &stmt.kind {
            HirStmtKind::FuncDef(f) => scan_function(f, &[], module, &mut out),
            HirStmtKind::ClassDef(c) => {
                for m in &c.methods {
                    scan_function(m, &[], module, &mut out);
                }
                let mut note = |e: &HirExpr| note_global(e, &[], module, &mut out);
                for (_, v) in &c.class_attrs {
                    visit::walk_expr(v, &mut note);
                }
                for f in &c.fields {
                    if let Some(d) = &f.default {
                        visit::walk_expr(d, &mut note);
                    }
                }
            }
            _ => {}
        }
    }
    out
}

fn scan_function(
    f: &HirFunction,
    outer: &[&BTreeSet<String>],
    module: &HirModule,
    out: &mut BTreeSet<String>,
) {
    let mut own: BTreeSet<String> = f.locals.keys().cloned().collect();
    own.extend(f.params.iter().map(|p| p.name.clone()));
    let mut scopes: Vec<&BTreeSet<String>> = outer.to_vec();
    scopes.push(&own);
    for p in &f.params {
        if let Some(d) = &p.default {
            visit::walk_expr(d, &mut |e| note_global(e, outer, module, out));
        }
    }
    visit::walk_stmts(&f.body, &mut |stmt| {
        for e in visit::stmt_exprs(stmt) {
            visit::walk_expr(e, &mut |e| note_global(e, &scopes, module, out));
        }
        if let HirStmtKind::FuncDef(nested) = &stmt.kind {
            scan_function(nested, &scopes, module, out);
        }
    });
}

fn note_global(e: &HirExpr, scopes: &[&BTreeSet<String>], module: &HirModule, out: &mut BTreeSet<String>) {
    if let HirExprKind::Name(n) = &e.kind {
        if module.globals.contains_key(n) && !scopes.iter().any(|s| s.contains(n)) {
            out.insert(n.clone());
        }
    }
}

/// 出力に現れる依存だけを残す (std の集合型は use 宣言から拾う)
fn used_dependencies(registered: &BTreeSet<Dependency>, code: &str) -> BTreeSet<Dependency> {
    let marker = |dep: Dependency| -> &'static str {
        match dep {
            Dependency::HashMap => "HashMap",
            Dependency::HashSet => "HashSet",
            Dependency::Regex => "regex::",
            Dependency::SerdeJson => "serde_json::",
            Dependency::Serde => "serde",
            Dependency::Clap => "clap::",
            Dependency::Chrono => "chrono::",
            Dependency::Rand => "rand::",
            Dependency::Base64 => "base64::",
            Dependency::Sha2 => "sha2::",
            Dependency::Md5 => "md5::",
            Dependency::Hex => "hex::",
            Dependency::Tokio => "tokio::",
            Dependency::OnceCell => "once_cell::",
            Dependency::Itertools => "itertools::",
        }
    };
    let mut out: BTreeSet<Dependency> = registered
        .iter()
        .copied()
        .filter(|d| code.contains(marker(*d)))
        .collect();
    for dep in [Dependency::HashMap, Dependency::HashSet, Dependency::OnceCell, Dependency::Clap] {
        if code.contains(marker(dep)) {
            out.insert(dep);
        }
    }
    out
}
