//! Annotation → semantic type for SemanticAnalyzer
//!
//! Extracted from mod.rs for maintainability

use super::*;

impl SemanticAnalyzer {
    /// 型注釈の式を意味型に変換する
    pub(crate) fn type_from_annotation(&self, expr: &Expr) -> Result<Type> {
        let ty = match &expr.kind {
            ExprKind::NoneLiteral => Type::None,
            ExprKind::Ident(name) => self.type_from_hint_name(name, &[]),
            ExprKind::Attribute { .. } => match expr.dotted_name() {
                Some(dotted) => self.type_from_hint_name(&dotted, &[]),
                None => Type::Unknown,
            },
            ExprKind::Index { target, index } => {
                let name = target.dotted_name().unwrap_or_default();
                let params = match &index.kind {
                    ExprKind::Tuple(items) => items
                        .iter()
                        .map(|item| self.type_from_annotation(item))
                        .collect::<Result<Vec<_>>>()?,
                    _ => vec![self.type_from_annotation(index)?],
                };
                self.type_from_hint_name(&name, &params)
            }
            // Callable の引数リスト
            ExprKind::List(items) => Type::Tuple(
                items
                    .iter()
                    .map(|item| self.type_from_annotation(item))
                    .collect::<Result<Vec<_>>>()?,
            ),
            // PEP 604: `int | None`
            ExprKind::BinOp {
                left,
                op: BinOp::BitOr,
                right,
            } => join(
                &self.type_from_annotation(left)?,
                &self.type_from_annotation(right)?,
            ),
            // 前方参照 "ClassName"
            ExprKind::StringLiteral { value, .. } => {
                let inner = crate::parser::parse_expression(value, expr.pos)?;
                self.type_from_annotation(&inner)?
            }
            ExprKind::Ellipsis => Type::Unknown,
            _ => {
                return Err(DepylerError::unsupported(
                    expr.pos,
                    "unrecognized type annotation",
                ))
            }
        };
        Ok(ty)
    }

    fn type_from_hint_name(&self, name: &str, params: &[Type]) -> Type {
        if let Some(native) = stdlib::native_type_for_hint(name) {
            return native;
        }
        if self.class_names.contains(name) {
            return Type::Class(name.to_string());
        }
        // typing.List → List
        let short = name.rsplit('.').next().unwrap_or(name);
        if name.contains('.') && self.is_typing_path(name) {
            return Type::from_python_hint(short, params);
        }
        Type::from_python_hint(name, params)
    }

    fn is_typing_path(&self, dotted: &str) -> bool {
        let root = dotted.split('.').next().unwrap_or(dotted);
        let module = self
            .module_aliases
            .get(root)
            .map(String::as_str)
            .unwrap_or(root);
        stdlib::is_annotation_module(module) || module == "collections"
    }
}
