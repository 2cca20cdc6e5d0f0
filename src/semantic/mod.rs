//! Semantic analysis module
//!
//! AST → HIR のブリッジ (SemanticAnalyzer) と、HIR 上の推論パス。
//!
//! パスの順序:
//! 1. ブリッジ: 正規化と未対応構文の拒否
//! 2. 型推論 (`type_infer`)
//! 3. 所有権推論 Pass A / Pass B (`ownership`)
//! 4. 失敗可能性と関数属性 (`emit_plan`)

mod analyze_calls;
mod analyze_expressions;
mod analyze_statements;
mod analyze_types;
mod builtins;
mod emit_plan;
mod heuristics;
mod operators;
mod ownership;
mod scope;
mod type_infer;
pub mod type_mapper;
mod types;

#[cfg(test)]
mod tests;

pub use builtins::{argparse_argument, factory_type, ArgparseArg};
pub use emit_plan::{annotate_module, raised_name, ExceptionHierarchy};
pub use heuristics::{is_index_name, type_from_name, unique_method_family};
pub use operators::{binop_result_type, is_integer_exponent};
pub use ownership::{analyze_ownership, collect_mutations, Mutations};
pub use scope::*;
pub use type_infer::{
    bool_op_type, contains_generic, infer_module, iter_element, narrowed_in_body, narrowed_in_else, NarrowKind,
    Narrowing,
};
pub use type_mapper::{map_type, rust_type_string, MapMode, RustType};
pub use types::*;

use crate::error::{DepylerError, Result};
use crate::hir::*;
use crate::parser::{
    BinOp, ClassDef, CmpOp, Expr, ExprKind, FunctionDef, Program, Stmt, StmtKind,
};
use crate::stdlib::{self, ErrorTaxon};
use crate::unsupported_features::{UnsupportedFeature, UnsupportedFeatureRegistry};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Analyze a program: bridge to HIR and run every inference pass
pub fn analyze(program: &Program) -> Result<HirModule> {
    analyze_with_registry(program, UnsupportedFeatureRegistry::default())
}

pub fn analyze_with_registry(
    program: &Program,
    registry: UnsupportedFeatureRegistry,
) -> Result<HirModule> {
    let mut analyzer = SemanticAnalyzer::with_registry(registry);
    let mut module = analyzer.analyze(program)?;
    debug!(items = module.items.len(), "bridge complete");
    infer_module(&mut module)?;
    analyze_ownership(&mut module);
    annotate_module(&mut module);
    Ok(module)
}

/// Rename applied when a user `main` cannot be the Rust entry point
const RENAMED_MAIN: &str = "py_main";

/// AST → HIR bridge
pub struct SemanticAnalyzer {
    scope: ScopeStack,
    /// `import numpy as np` → np → numpy
    module_aliases: HashMap<String, String>,
    /// `from os.path import join as j` → j → os.path.join
    imported_names: HashMap<String, String>,
    class_names: BTreeSet<String>,
    exception_classes: BTreeSet<String>,
    function_depth: usize,
    current_class: Option<String>,
    /// for/while-else のフラグ変数 (ループごと、else なしは None)
    loop_flags: Vec<Option<String>>,
    tmp_counter: usize,
    registry: UnsupportedFeatureRegistry,
    imports: Vec<HirImport>,
    rename_main: bool,
}

impl Default for SemanticAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SemanticAnalyzer {
    pub fn new() -> Self {
        Self::with_registry(UnsupportedFeatureRegistry::default())
    }

    pub fn with_registry(registry: UnsupportedFeatureRegistry) -> Self {
        Self {
            scope: ScopeStack::new(),
            module_aliases: HashMap::new(),
            imported_names: HashMap::new(),
            class_names: BTreeSet::new(),
            exception_classes: BTreeSet::new(),
            function_depth: 0,
            current_class: None,
            loop_flags: Vec::new(),
            tmp_counter: 0,
            registry,
            imports: Vec::new(),
            rename_main: false,
        }
    }

    /// Reject a construct unless the registry allows it
    pub(crate) fn check(&self, feature: UnsupportedFeature, pos: SourcePos) -> Result<()> {
        if self.registry.is_enabled(feature) {
            return Err(DepylerError::unsupported(pos, feature.description()));
        }
        Ok(())
    }

    pub(crate) fn fresh(&mut self, prefix: &str) -> String {
        let n = self.tmp_counter;
        self.tmp_counter += 1;
        format!("_{prefix}_{n}")
    }

    pub fn analyze(&mut self, program: &Program) -> Result<HirModule> {
        let stmts = self.preprocess_top_level(&program.body);
        self.collect_module_symbols(&stmts)?;

        let mut items = Vec::new();
        for stmt in &stmts {
            items.extend(self.lower_stmt(stmt)?);
        }
        Ok(HirModule {
            items,
            imports: std::mem::take(&mut self.imports),
            class_names: self.class_names.clone(),
            ..HirModule::default()
        })
    }

    /// `if __name__ == "__main__":` を展開し、`main` の扱いを決める
    fn preprocess_top_level(&mut self, stmts: &[Stmt]) -> Vec<Stmt> {
        let user_main = stmts.iter().find_map(|s| match &s.kind {
            StmtKind::FuncDef(def) if def.name == "main" => Some(def),
            _ => None,
        });

        let mut out = Vec::new();
        let mut guard_calls_main_only = false;
        for stmt in stmts {
            if let StmtKind::If { test, body, orelse } = &stmt.kind {
                if orelse.is_empty() && is_main_guard(test) {
                    if user_main.is_some() && body.len() == 1 && is_bare_main_call(&body[0]) {
                        guard_calls_main_only = true;
                    } else {
                        out.extend(body.iter().cloned());
                    }
                    continue;
                }
            }
            out.push(stmt.clone());
        }

        if let Some(def) = user_main {
            let loose = out.iter().any(is_loose_statement);
            let entry_shape = def.params.is_empty()
                && def.vararg.is_none()
                && def.kwarg.is_none()
                && !def.is_async
                && def
                    .returns
                    .as_ref()
                    .map_or(true, |r| matches!(r.kind, ExprKind::NoneLiteral));
            if loose || !entry_shape {
                self.rename_main = true;
                if guard_calls_main_only {
                    // 呼び出しを残して py_main() を実行させる
                    if let Some(guard_call) = stmts.iter().find_map(|s| match &s.kind {
                        StmtKind::If { test, body, .. } if is_main_guard(test) => {
                            body.first().cloned()
                        }
                        _ => None,
                    }) {
                        out.push(guard_call);
                    }
                }
            }
        }
        out
    }

    /// Module-level names: classes, functions, imports and globals
    fn collect_module_symbols(&mut self, stmts: &[Stmt]) -> Result<()> {
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::ClassDef(def) => {
                    self.class_names.insert(def.name.clone());
                    let base = def.bases.first().and_then(Expr::dotted_name);
                    if let Some(base) = base {
                        let short = base.rsplit('.').next().unwrap_or(&base).to_string();
                        if ErrorTaxon::is_builtin_exception(&short)
                            || self.exception_classes.contains(&short)
                        {
                            self.exception_classes.insert(def.name.clone());
                        }
                    }
                    self.scope.define(&def.name, Type::Class(def.name.clone()), BindingKind::Class);
                }
                StmtKind::FuncDef(def) => {
                    self.scope.define(&def.name, Type::Unknown, BindingKind::Function);
                }
                StmtKind::Import(aliases) => {
                    for alias in aliases {
                        self.register_import(&alias.name, alias.asname.as_deref(), None);
                    }
                }
                StmtKind::ImportFrom { module, names, .. } => {
                    for alias in names {
                        self.register_import(module, alias.asname.as_deref(), Some(&alias.name));
                    }
                }
                _ => {
                    let mut names = BTreeSet::new();
                    analyze_statements::collect_bound_names(std::slice::from_ref(stmt), &mut names);
                    for name in names {
                        if self.scope.lookup(&name).is_none() {
                            self.scope.define(&name, Type::Unknown, BindingKind::Module);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Rust name of a module-level function
    pub(crate) fn function_name(&self, name: &str) -> String {
        if self.rename_main && name == "main" {
            RENAMED_MAIN.to_string()
        } else {
            name.to_string()
        }
    }

    /// 関数定義を HIR に落とす
    pub(crate) fn lower_function(
        &mut self,
        def: &FunctionDef,
        pos: SourcePos,
        method: Option<MethodKind>,
    ) -> Result<HirFunction> {
        if def.vararg.is_some() || def.kwarg.is_some() {
            self.check(UnsupportedFeature::VariadicParams, pos)?;
        }

        let mut attrs = FunctionAttrs {
            is_async: def.is_async,
            ..FunctionAttrs::default()
        };
        let mut method = method;
        for decorator in &def.decorators {
            self.apply_function_decorator(decorator, &mut attrs, &mut method)?;
        }

        self.scope.push();
        self.function_depth += 1;
        let result = self.lower_function_inner(def, pos, method, attrs);
        self.function_depth -= 1;
        self.scope.pop_isolated();
        result
    }

    fn lower_function_inner(
        &mut self,
        def: &FunctionDef,
        pos: SourcePos,
        method: Option<MethodKind>,
        attrs: FunctionAttrs,
    ) -> Result<HirFunction> {
        let mut params = Vec::new();
        for (idx, param) in def.params.iter().enumerate() {
            let receiver = idx == 0 && matches!(method, Some(MethodKind::Instance) | Some(MethodKind::Class));
            let (ty, annotated) = if receiver {
                let class = self.current_class.clone().unwrap_or_default();
                (Type::Class(class), true)
            } else {
                match &param.annotation {
                    Some(ann) => (self.type_from_annotation(ann)?, true),
                    None => (Type::Unknown, false),
                }
            };
            let default = match &param.default {
                Some(d) => Some(self.lower_expr(d)?),
                None => None,
            };
            self.scope.define(&param.name, ty.clone(), BindingKind::Param);
            params.push(HirParam {
                name: param.name.clone(),
                ty,
                annotated,
                default,
                mode: ParamMode::ByValue,
                rebound: false,
                pos: param.pos,
            });
        }

        let (ret, ret_annotated) = match &def.returns {
            Some(ann) => (self.type_from_annotation(ann)?, true),
            None => (Type::Unknown, false),
        };

        let (docstring, body_src) = split_docstring(&def.body);
        let mut locals = BTreeSet::new();
        analyze_statements::collect_bound_names(body_src, &mut locals);
        let mut nested = BTreeSet::new();
        analyze_statements::collect_defined_functions(body_src, &mut nested);
        for name in &locals {
            if def.params.iter().all(|p| &p.name != name) {
                let kind = if nested.contains(name) {
                    BindingKind::Function
                } else {
                    BindingKind::Local
                };
                self.scope.define(name, Type::Unknown, kind);
            }
        }

        let saved_flags = std::mem::take(&mut self.loop_flags);
        let body = self.lower_block(body_src);
        self.loop_flags = saved_flags;
        let body = body?;

        let mut attrs = attrs;
        attrs.generator = visit::contains_yield(&body);
        let module_level = self.function_depth == 1 && self.current_class.is_none();
        Ok(HirFunction {
            name: if module_level {
                self.function_name(&def.name)
            } else {
                def.name.clone()
            },
            params,
            ret,
            ret_annotated,
            body,
            attrs,
            method,
            locals: Default::default(),
            mutable_vars: Default::default(),
            generic_bounds: Default::default(),
            docstring,
            pos,
        })
    }

    fn apply_function_decorator(
        &self,
        decorator: &Expr,
        attrs: &mut FunctionAttrs,
        method: &mut Option<MethodKind>,
    ) -> Result<()> {
        let name = match &decorator.kind {
            ExprKind::Call { func, .. } => func.dotted_name(),
            _ => decorator.dotted_name(),
        }
        .unwrap_or_default();
        match name.as_str() {
            "property" | "functools.cached_property" | "cached_property" => attrs.property = true,
            "staticmethod" => {
                attrs.staticmethod = true;
                *method = Some(MethodKind::Static);
            }
            "classmethod" => {
                attrs.classmethod = true;
                *method = Some(MethodKind::Class);
            }
            // キャッシュや抽象メソッドは意味を変えない
            "functools.lru_cache" | "lru_cache" | "functools.cache" | "cache"
            | "abstractmethod" | "abc.abstractmethod" | "functools.wraps" => {}
            other => match other.strip_suffix(".setter") {
                Some(prop) if self.current_class.is_some() => {
                    attrs.setter_of = Some(prop.to_string());
                }
                _ => self.check(UnsupportedFeature::CustomDecorator, decorator.pos)?,
            },
        }
        Ok(())
    }

    /// クラス定義を HIR に落とす
    pub(crate) fn lower_class(&mut self, def: &ClassDef, pos: SourcePos) -> Result<HirClass> {
        if self.function_depth > 0 {
            self.check(UnsupportedFeature::NestedClass, pos)?;
        }
        if def.keywords.iter().any(|(k, _)| k == "metaclass") {
            self.check(UnsupportedFeature::Metaclass, pos)?;
        }

        let bases: Vec<String> = def
            .bases
            .iter()
            .filter_map(Expr::dotted_name)
            .filter(|b| !matches!(b.as_str(), "object" | "ABC" | "abc.ABC" | "Protocol" | "typing.Protocol"))
            .collect();
        let generic_bases = def
            .bases
            .iter()
            .filter(|b| matches!(b.kind, ExprKind::Index { .. }))
            .count();
        if bases.len() > 1 || (bases.len() == 1 && generic_bases > 0 && def.bases.len() > 1) {
            self.check(UnsupportedFeature::MultipleInheritance, pos)?;
        }

        let mut is_dataclass = false;
        for decorator in &def.decorators {
            let name = match &decorator.kind {
                ExprKind::Call { func, .. } => func.dotted_name(),
                _ => decorator.dotted_name(),
            }
            .unwrap_or_default();
            match name.as_str() {
                "dataclass" | "dataclasses.dataclass" => is_dataclass = true,
                _ => self.check(UnsupportedFeature::CustomDecorator, decorator.pos)?,
            }
        }

        let is_exception = self.exception_classes.contains(&def.name);
        let base = bases
            .first()
            .map(|b| b.rsplit('.').next().unwrap_or(b).to_string())
            // 例外クラスは組み込みの基底も残す (except の照合に使う)
            .filter(|b| {
                self.class_names.contains(b) || (is_exception && ErrorTaxon::is_builtin_exception(b))
            });

        let saved_class = self.current_class.replace(def.name.clone());
        let result = self.lower_class_body(def, pos, base, is_dataclass, is_exception);
        self.current_class = saved_class;
        result
    }

    fn lower_class_body(
        &mut self,
        def: &ClassDef,
        pos: SourcePos,
        base: Option<String>,
        is_dataclass: bool,
        is_exception: bool,
    ) -> Result<HirClass> {
        let (docstring, body) = split_docstring(&def.body);
        let mut class = HirClass {
            name: def.name.clone(),
            fields: Vec::new(),
            methods: Vec::new(),
            base,
            properties: BTreeSet::new(),
            is_dataclass,
            is_exception,
            class_attrs: Vec::new(),
            docstring,
            pos,
        };

        for stmt in body {
            match &stmt.kind {
                StmtKind::AnnAssign {
                    target,
                    annotation,
                    value,
                } => {
                    let name = target.as_ident().ok_or_else(|| {
                        DepylerError::unsupported(stmt.pos, "annotated class attribute target")
                    })?;
                    let ty = self.type_from_annotation(annotation)?;
                    let default = match value {
                        Some(v) => Some(self.lower_field_default(v)?),
                        None => None,
                    };
                    class.fields.push(HirField {
                        name: name.to_string(),
                        ty,
                        default,
                    });
                }
                StmtKind::Assign { targets, value } => {
                    let value = self.lower_expr(value)?;
                    for target in targets {
                        let name = target.as_ident().ok_or_else(|| {
                            DepylerError::unsupported(stmt.pos, "class attribute target")
                        })?;
                        class.class_attrs.push((name.to_string(), value.clone()));
                    }
                }
                StmtKind::FuncDef(func) => {
                    let kind = Some(MethodKind::Instance);
                    let method = self.lower_function(func, stmt.pos, kind)?;
                    if method.attrs.property {
                        class.properties.insert(method.name.clone());
                    }
                    class.methods.push(method);
                }
                StmtKind::Pass => {}
                StmtKind::Expr(e) if matches!(e.kind, ExprKind::Ellipsis | ExprKind::StringLiteral { .. }) => {}
                _ => {
                    return Err(DepylerError::unsupported(
                        stmt.pos,
                        "statement in class body",
                    ))
                }
            }
        }

        collect_instance_fields(&mut class);
        Ok(class)
    }

    /// `field(default_factory=list)` → `[]`
    fn lower_field_default(&mut self, value: &Expr) -> Result<HirExpr> {
        if let ExprKind::Call { func, kwargs, .. } = &value.kind {
            let callee = func.dotted_name().unwrap_or_default();
            if callee == "field" || callee == "dataclasses.field" {
                for (key, arg) in kwargs {
                    match key.as_str() {
                        "default" => return self.lower_expr(arg),
                        "default_factory" => {
                            let call = Expr::new(
                                ExprKind::Call {
                                    func: Box::new(arg.clone()),
                                    args: Vec::new(),
                                    kwargs: Vec::new(),
                                },
                                arg.pos,
                            );
                            return self.lower_expr(&call);
                        }
                        _ => {}
                    }
                }
            }
        }
        self.lower_expr(value)
    }
}

/// `self.x = ...` の代入から、宣言されていないインスタンスフィールドを集める
fn collect_instance_fields(class: &mut HirClass) {
    let mut found: Vec<(String, Option<Type>)> = Vec::new();
    for method in &class.methods {
        visit::walk_stmts(&method.body, &mut |stmt| {
            let (target, annotation) = match &stmt.kind {
                HirStmtKind::Assign {
                    target, annotation, ..
                } => (target, annotation.clone()),
                _ => return,
            };
            let mut targets = vec![target];
            while let Some(t) = targets.pop() {
                match t {
                    AssignTarget::Attribute { value, attr } if value.as_name() == Some("self") => {
                        if !found.iter().any(|(n, _)| n == attr) {
                            found.push((attr.clone(), annotation.clone()));
                        }
                    }
                    AssignTarget::Tuple(items) => targets.extend(items.iter()),
                    _ => {}
                }
            }
        });
    }
    for (name, annotation) in found {
        if class.field(&name).is_some() || class.properties.contains(&name) {
            continue;
        }
        // setter 経由の代入はフィールドではない
        if class.methods.iter().any(|m| m.attrs.setter_of.as_deref() == Some(name.as_str())) {
            continue;
        }
        class.fields.push(HirField {
            name,
            ty: annotation.unwrap_or(Type::Unknown),
            default: None,
        });
    }
}

/// 先頭の文字列リテラルを docstring として切り出す
fn split_docstring(body: &[Stmt]) -> (Option<String>, &[Stmt]) {
    match body.first().map(|s| &s.kind) {
        Some(StmtKind::Expr(Expr {
            kind: ExprKind::StringLiteral { value, .. },
            ..
        })) => (Some(value.trim().to_string()), &body[1..]),
        _ => (None, body),
    }
}

fn is_main_guard(test: &Expr) -> bool {
    if let ExprKind::Compare {
        left,
        ops,
        comparators,
    } = &test.kind
    {
        if ops.as_slice() != [CmpOp::Eq] || comparators.len() != 1 {
            return false;
        }
        let is_name = |e: &Expr| e.as_ident() == Some("__name__");
        let is_main = |e: &Expr| {
            matches!(&e.kind, ExprKind::StringLiteral { value, .. } if value == "__main__")
        };
        return (is_name(left) && is_main(&comparators[0]))
            || (is_main(left) && is_name(&comparators[0]));
    }
    false
}

fn is_bare_main_call(stmt: &Stmt) -> bool {
    matches!(
        &stmt.kind,
        StmtKind::Expr(Expr { kind: ExprKind::Call { func, args, kwargs }, .. })
            if func.as_ident() == Some("main") && args.is_empty() && kwargs.is_empty()
    )
}

/// 実行文 (関数本体に入るもの)
fn is_loose_statement(stmt: &Stmt) -> bool {
    !matches!(
        stmt.kind,
        StmtKind::FuncDef(_)
            | StmtKind::ClassDef(_)
            | StmtKind::Import(_)
            | StmtKind::ImportFrom { .. }
            | StmtKind::Assign { .. }
            | StmtKind::AnnAssign { .. }
            | StmtKind::Pass
            | StmtKind::Global(_)
    ) && !matches!(
        &stmt.kind,
        StmtKind::Expr(Expr {
            kind: ExprKind::StringLiteral { .. },
            ..
        })
    )
}
