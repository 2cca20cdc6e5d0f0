//! Unsupported feature registry (centralized guard)
//!
//! ブリッジが拒否する構文の一覧。既定ではすべて拒否する。

use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnsupportedFeature {
    DelStatement,
    MatchStatement,
    GlobalStatement,
    NonlocalStatement,
    YieldFrom,
    /// 値として使われる yield (`x = yield v`)
    YieldExpression,
    YieldInsideTry,
    Metaclass,
    MultipleInheritance,
    NestedClass,
    /// `f(*args)` / `f(**kwargs)`
    StarArgs,
    /// `def f(*args, **kwargs)`
    VariadicParams,
    LambdaDefaults,
    CustomDecorator,
    MatrixMultiply,
    BuiltinExec,
    BuiltinEval,
    BuiltinGetattr,
    BuiltinSetattr,
    BuiltinHasattr,
    BuiltinDelattr,
}

impl UnsupportedFeature {
    pub const ALL: [UnsupportedFeature; 21] = [
        UnsupportedFeature::DelStatement,
        UnsupportedFeature::MatchStatement,
        UnsupportedFeature::GlobalStatement,
        UnsupportedFeature::NonlocalStatement,
        UnsupportedFeature::YieldFrom,
        UnsupportedFeature::YieldExpression,
        UnsupportedFeature::YieldInsideTry,
        UnsupportedFeature::Metaclass,
        UnsupportedFeature::MultipleInheritance,
        UnsupportedFeature::NestedClass,
        UnsupportedFeature::StarArgs,
        UnsupportedFeature::VariadicParams,
        UnsupportedFeature::LambdaDefaults,
        UnsupportedFeature::CustomDecorator,
        UnsupportedFeature::MatrixMultiply,
        UnsupportedFeature::BuiltinExec,
        UnsupportedFeature::BuiltinEval,
        UnsupportedFeature::BuiltinGetattr,
        UnsupportedFeature::BuiltinSetattr,
        UnsupportedFeature::BuiltinHasattr,
        UnsupportedFeature::BuiltinDelattr,
    ];

    /// Message fragment used in `UnsupportedSyntax` errors
    pub fn description(&self) -> &'static str {
        match self {
            UnsupportedFeature::DelStatement => "del statement",
            UnsupportedFeature::MatchStatement => "match statement",
            UnsupportedFeature::GlobalStatement => "global declaration inside a function",
            UnsupportedFeature::NonlocalStatement => "nonlocal declaration inside a function",
            UnsupportedFeature::YieldFrom => "yield from",
            UnsupportedFeature::YieldExpression => "yield used as a value",
            UnsupportedFeature::YieldInsideTry => "yield inside try/with",
            UnsupportedFeature::Metaclass => "metaclass",
            UnsupportedFeature::MultipleInheritance => "multiple inheritance",
            UnsupportedFeature::NestedClass => "class defined inside a function",
            UnsupportedFeature::StarArgs => "star-args in call",
            UnsupportedFeature::VariadicParams => "variadic parameters (*args / **kwargs)",
            UnsupportedFeature::LambdaDefaults => "lambda parameter defaults",
            UnsupportedFeature::CustomDecorator => "decorator",
            UnsupportedFeature::MatrixMultiply => "matrix multiplication operator '@'",
            UnsupportedFeature::BuiltinExec => "exec()",
            UnsupportedFeature::BuiltinEval => "eval()",
            UnsupportedFeature::BuiltinGetattr => "getattr()",
            UnsupportedFeature::BuiltinSetattr => "setattr()",
            UnsupportedFeature::BuiltinHasattr => "hasattr()",
            UnsupportedFeature::BuiltinDelattr => "delattr()",
        }
    }

    /// Reflection / dynamic-evaluation builtins
    pub fn for_builtin(name: &str) -> Option<UnsupportedFeature> {
        match name {
            "exec" => Some(UnsupportedFeature::BuiltinExec),
            "eval" => Some(UnsupportedFeature::BuiltinEval),
            "getattr" => Some(UnsupportedFeature::BuiltinGetattr),
            "setattr" => Some(UnsupportedFeature::BuiltinSetattr),
            "hasattr" => Some(UnsupportedFeature::BuiltinHasattr),
            "delattr" => Some(UnsupportedFeature::BuiltinDelattr),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnsupportedFeatureRegistry {
    enabled: HashSet<UnsupportedFeature>,
}

impl UnsupportedFeatureRegistry {
    pub fn new(enabled: HashSet<UnsupportedFeature>) -> Self {
        Self { enabled }
    }

    /// `true` when the construct is rejected
    pub fn is_enabled(&self, feature: UnsupportedFeature) -> bool {
        self.enabled.contains(&feature)
    }

    pub fn enable(&mut self, feature: UnsupportedFeature) {
        self.enabled.insert(feature);
    }

    pub fn disable(&mut self, feature: UnsupportedFeature) {
        self.enabled.remove(&feature);
    }
}

impl Default for UnsupportedFeatureRegistry {
    fn default() -> Self {
        Self {
            enabled: UnsupportedFeature::ALL.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rejects_everything() {
        let registry = UnsupportedFeatureRegistry::default();
        for feature in UnsupportedFeature::ALL {
            assert!(registry.is_enabled(feature), "{feature:?}");
        }
    }

    #[test]
    fn test_disable() {
        let mut registry = UnsupportedFeatureRegistry::default();
        registry.disable(UnsupportedFeature::DelStatement);
        assert!(!registry.is_enabled(UnsupportedFeature::DelStatement));
        registry.enable(UnsupportedFeature::DelStatement);
        assert!(registry.is_enabled(UnsupportedFeature::DelStatement));
    }

    #[test]
    fn test_reflection_builtins() {
        assert_eq!(
            UnsupportedFeature::for_builtin("getattr"),
            Some(UnsupportedFeature::BuiltinGetattr)
        );
        assert_eq!(UnsupportedFeature::for_builtin("len"), None);
    }
}
