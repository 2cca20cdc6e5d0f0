//! `argparse` → clap derive
//!
//! `add_argument` の呼び出しを集めて `#[derive(clap::Parser)] struct Args` にする。
//! `parse_args()` は `<Args as clap::Parser>::parse()` になる (method_gen)。

use super::RustEmitter;
use crate::error::Result;
use crate::hir::visit;
use crate::hir::*;
use crate::manifest::Dependency;
use crate::semantic::{argparse_argument, ArgparseArg, MapMode, Type};
use tracing::debug;

const PARSER_TYPE: &str = "argparse.ArgumentParser";

impl RustEmitter<'_> {
    /// Collect `add_argument` calls from the whole module
    pub(super) fn collect_argparse(&mut self) {
        let mut found = Vec::new();
        let mut about = None;
        let mut parser = false;
        each_expr(&self.module.items, &mut |e| match &e.kind {
            HirExprKind::MethodCall {
                receiver,
                method,
                args,
                kwargs,
            } if method == "add_argument" && is_parser(&receiver.ty) => {
                if let Some(arg) = argparse_argument(args, kwargs) {
                    found.push(arg);
                }
            }
            HirExprKind::Call { func, kwargs, .. } if func == PARSER_TYPE || func == "ArgumentParser" => {
                parser = true;
                if let Some((_, d)) = kwargs.iter().find(|(k, _)| k == "description") {
                    if let HirExprKind::Str { value, .. } = &d.kind {
                        about = Some(value.clone());
                    }
                }
            }
            _ => {}
        });
        let mut args: Vec<ArgparseArg> = Vec::new();
        for arg in found {
            if !args.iter().any(|a| a.field == arg.field) {
                args.push(arg);
            }
        }
        if parser || !args.is_empty() {
            debug!(arguments = args.len(), "argparse parser found");
            self.args_about = Some(about.unwrap_or_default());
        }
        self.args = args;
    }

    /// `#[derive(clap::Parser)] struct Args { .. }`
    pub(super) fn args_struct(&mut self) -> Result<Option<String>> {
        let Some(about) = self.args_about.clone() else {
            return Ok(None);
        };
        self.ctx.need(Dependency::Clap);
        let mut lines = vec!["#[derive(clap::Parser, Debug)]".to_string()];
        if !about.is_empty() {
            lines.push(format!(
                "#[command(about = {})]",
                super::value::string_literal(&about, false)
            ));
        }
        let vis = self.item_vis();
        lines.push(format!("{vis}struct Args {{"));
        for arg in self.args.clone() {
            if let Some(help) = &arg.help {
                lines.push(format!("    /// {help}"));
            }
            let attrs = self.arg_attributes(&arg)?;
            if !attrs.is_empty() {
                lines.push(format!("    #[arg({})]", attrs.join(", ")));
            }
            let ty = if arg.count {
                "u8".to_string()
            } else {
                self.ctx.rust_type(&arg.ty, MapMode::Owned, SourcePos::unknown())?
            };
            lines.push(format!(
                "    {vis}{}: {ty},",
                super::context::rust_ident(&arg.field)
            ));
        }
        lines.push("}".to_string());
        Ok(Some(lines.join("\n")))
    }

    fn arg_attributes(&mut self, arg: &ArgparseArg) -> Result<Vec<String>> {
        let mut attrs = Vec::new();
        if !arg.positional {
            match &arg.long {
                Some(l) if l.replace('-', "_") == arg.field => attrs.push("long".to_string()),
                Some(l) => attrs.push(format!("long = \"{l}\"")),
                None => {}
            }
            if let Some(s) = arg.short {
                attrs.push(format!("short = '{s}'"));
            }
        }
        if arg.count {
            attrs.push("action = clap::ArgAction::Count".to_string());
            return Ok(attrs);
        }
        if arg.flag {
            return Ok(attrs);
        }
        if let Some(d) = &arg.default {
            match (&d.kind, arg.ty.unwrap_optional()) {
                (HirExprKind::Str { value, .. }, _) => {
                    attrs.push(format!("default_value = {}", super::value::string_literal(value, false)))
                }
                (HirExprKind::Int { value, .. }, Type::Float) => {
                    attrs.push(format!("default_value_t = {value}.0"))
                }
                (HirExprKind::Int { text, value }, _) => {
                    attrs.push(format!("default_value_t = {}", super::int_text(text, *value)))
                }
                (HirExprKind::Float { text, .. }, _) => {
                    attrs.push(format!("default_value_t = {}", super::float_text(text)))
                }
                _ => {}
            }
        }
        if matches!(arg.ty, Type::List(_)) && !arg.positional {
            attrs.push("num_args = 1..".to_string());
        }
        Ok(attrs)
    }
}

fn is_parser(ty: &Type) -> bool {
    matches!(ty, Type::Native(n) if n == PARSER_TYPE)
}

/// 関数とメソッドの本体も含めた全ての式
fn each_expr<'a>(stmts: &'a [HirStmt], f: &mut dyn FnMut(&'a HirExpr)) {
    visit::walk_stmts(stmts, &mut |stmt| {
        for e in visit::stmt_exprs(stmt) {
            visit::walk_expr(e, f);
        }
        match &stmt.kind {
            HirStmtKind::FuncDef(func) => each_expr(&func.body, f),
            HirStmtKind::ClassDef(c) => {
                for m in &c.methods {
                    each_expr(&m.body, f);
                }
            }
            _ => {}
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_each_expr_enters_function_bodies() {
        let pos = SourcePos::unknown();
        let inner = HirStmt::new(HirStmtKind::Expr(HirExpr::name("x", pos)), pos);
        let func = HirFunction {
            name: "main".to_string(),
            params: vec![],
            ret: Type::None,
            ret_annotated: false,
            body: vec![inner],
            attrs: FunctionAttrs::default(),
            method: None,
            locals: Default::default(),
            mutable_vars: Default::default(),
            generic_bounds: Default::default(),
            docstring: None,
            pos,
        };
        let items = vec![
            HirStmt::new(HirStmtKind::Expr(HirExpr::name("y", pos)), pos),
            HirStmt::new(HirStmtKind::FuncDef(Box::new(func)), pos),
        ];
        let mut names = Vec::new();
        each_expr(&items, &mut |e| {
            if let Some(n) = e.as_name() {
                names.push(n.to_string());
            }
        });
        assert_eq!(names, vec!["y", "x"]);
    }
}
