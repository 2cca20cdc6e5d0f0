//! Scope management

use super::Type;
use std::collections::HashMap;

/// 名前の出どころ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Local,
    Param,
    /// Module-level variable or constant
    Module,
    Import,
    Function,
    Class,
}

/// Variable information
#[derive(Debug, Clone)]
pub struct VarInfo {
    pub name: String,
    pub ty: Type,
    pub kind: BindingKind,
    /// Scope depth at which this variable was defined (0 = module level)
    pub defined_at_depth: usize,
}

/// Scope for variable tracking
#[derive(Debug, Clone, Default)]
pub struct Scope {
    variables: HashMap<String, VarInfo>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: &str, ty: Type, kind: BindingKind, depth: usize) {
        self.variables.insert(
            name.to_string(),
            VarInfo {
                name: name.to_string(),
                ty,
                kind,
                defined_at_depth: depth,
            },
        );
    }

    pub fn lookup(&self, name: &str) -> Option<&VarInfo> {
        self.variables.get(name)
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut VarInfo> {
        self.variables.get_mut(name)
    }
}

/// Stack of scopes for nested contexts
#[derive(Debug, Clone)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::new()],
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len().saturating_sub(1)
    }

    pub fn push(&mut self) {
        self.scopes.push(Scope::new());
    }

    /// Pop the current scope and promote its variables to the parent
    ///
    /// if/for/while/try のブロックで定義した変数はブロックの後でも見える。
    pub fn pop(&mut self) {
        if self.scopes.len() <= 1 {
            return;
        }
        if let Some(popped) = self.scopes.pop() {
            if let Some(parent) = self.scopes.last_mut() {
                for (name, info) in popped.variables {
                    if parent.lookup(&name).is_none() {
                        parent.variables.insert(name, info);
                    }
                }
            }
        }
    }

    /// Pop without promotion (function bodies, lambdas, comprehensions)
    pub fn pop_isolated(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn define(&mut self, name: &str, ty: Type, kind: BindingKind) {
        let depth = self.depth();
        if let Some(scope) = self.scopes.last_mut() {
            scope.define(name, ty, kind, depth);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&VarInfo> {
        self.scopes.iter().rev().find_map(|s| s.lookup(name))
    }

    /// Update the type of the innermost binding of `name`
    pub fn set_type(&mut self, name: &str, ty: Type) -> bool {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(info) = scope.lookup_mut(name) {
                info.ty = ty;
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_define_and_lookup() {
        let mut scope = Scope::new();
        scope.define("x", Type::Int, BindingKind::Local, 0);

        let info = scope.lookup("x").unwrap();
        assert_eq!(info.name, "x");
        assert_eq!(info.ty, Type::Int);
        assert_eq!(info.defined_at_depth, 0);
    }

    #[test]
    fn test_block_variables_promote() {
        let mut stack = ScopeStack::new();
        stack.define("outer", Type::Int, BindingKind::Local);

        stack.push();
        stack.define("inner", Type::Str, BindingKind::Local);
        stack.pop();

        // Python では if ブロック内の変数もブロック後に見える
        assert!(stack.lookup("outer").is_some());
        assert!(stack.lookup("inner").is_some());
    }

    #[test]
    fn test_isolated_scope_does_not_leak() {
        let mut stack = ScopeStack::new();
        stack.push();
        stack.define("param", Type::Int, BindingKind::Param);
        stack.pop_isolated();
        assert!(stack.lookup("param").is_none());
    }
}
