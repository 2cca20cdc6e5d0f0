//! Call lowering for SemanticAnalyzer
//!
//! Extracted from mod.rs for maintainability
//!
//! 呼び出し先の分類:
//! - 定義済み関数・クラス・組み込み → `Call { func: name }`
//! - モジュール経由 (`re.findall`, `np.array`) → `Call { func: full.path }`
//! - `Class.method()` → `Call { func: "Class.method" }`
//! - 値に対するメソッド → `MethodCall`
//! - それ以外 (ローカル変数に入った関数など) → `DynCall`

use super::*;

impl SemanticAnalyzer {
    pub(crate) fn lower_call(
        &mut self,
        func: &Expr,
        args: &[Expr],
        kwargs: &[(String, Expr)],
        pos: SourcePos,
    ) -> Result<HirExpr> {
        for arg in args {
            if matches!(arg.kind, ExprKind::Starred(_) | ExprKind::DoubleStarred(_)) {
                self.check(UnsupportedFeature::StarArgs, arg.pos)?;
            }
        }
        let hir_args = self.lower_exprs(args)?;
        let hir_kwargs = kwargs
            .iter()
            .map(|(k, v)| Ok((k.clone(), self.lower_expr(v)?)))
            .collect::<Result<Vec<_>>>()?;

        let call = |func: String, args: Vec<HirExpr>, kwargs: Vec<(String, HirExpr)>| {
            HirExpr::new(HirExprKind::Call { func, args, kwargs }, pos)
        };

        match &func.kind {
            ExprKind::Ident(name) => {
                if let Some(feature) = UnsupportedFeature::for_builtin(name) {
                    if self.scope.lookup(name).is_none() {
                        self.check(feature, pos)?;
                    }
                }
                match self.scope.lookup(name).map(|info| (info.kind, info.defined_at_depth)) {
                    Some((BindingKind::Function, 0)) => {
                        Ok(call(self.function_name(name), hir_args, hir_kwargs))
                    }
                    Some((BindingKind::Function, _)) | Some((BindingKind::Class, _)) => {
                        Ok(call(name.clone(), hir_args, hir_kwargs))
                    }
                    Some((BindingKind::Import, _)) => {
                        let path = self
                            .imported_names
                            .get(name)
                            .or_else(|| self.module_aliases.get(name))
                            .cloned()
                            .unwrap_or_else(|| name.clone());
                        Ok(call(path, hir_args, hir_kwargs))
                    }
                    Some(_) => {
                        // 変数に入った callable
                        if !hir_kwargs.is_empty() {
                            return Err(DepylerError::unsupported(
                                pos,
                                "keyword arguments to a callable value",
                            ));
                        }
                        Ok(HirExpr::new(
                            HirExprKind::DynCall {
                                callee: Box::new(HirExpr::name(name.clone(), func.pos)),
                                args: hir_args,
                            },
                            pos,
                        ))
                    }
                    None if self.class_names.contains(name)
                        || stdlib::is_builtin(name)
                        || ErrorTaxon::is_builtin_exception(name)
                        || name == "super" =>
                    {
                        Ok(call(name.clone(), hir_args, hir_kwargs))
                    }
                    None => Err(DepylerError::unresolved(func.pos, name.clone())),
                }
            }
            ExprKind::Attribute { value, attr } => {
                if let Some(path) = self.module_path(func) {
                    return Ok(call(path, hir_args, hir_kwargs));
                }
                // Point.origin() / Color.from_str()
                if let Some(class) = value.as_ident() {
                    let is_class = matches!(
                        self.scope.lookup(class).map(|info| info.kind),
                        Some(BindingKind::Class)
                    );
                    if is_class {
                        return Ok(call(format!("{class}.{attr}"), hir_args, hir_kwargs));
                    }
                }
                let receiver = self.lower_expr(value)?;
                Ok(HirExpr::new(
                    HirExprKind::MethodCall {
                        receiver: Box::new(receiver),
                        method: attr.clone(),
                        args: hir_args,
                        kwargs: hir_kwargs,
                    },
                    pos,
                ))
            }
            _ => {
                if !hir_kwargs.is_empty() {
                    return Err(DepylerError::unsupported(
                        pos,
                        "keyword arguments to a callable value",
                    ));
                }
                let callee = self.lower_expr(func)?;
                Ok(HirExpr::new(
                    HirExprKind::DynCall {
                        callee: Box::new(callee),
                        args: hir_args,
                    },
                    pos,
                ))
            }
        }
    }
}
