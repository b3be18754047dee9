use std::collections::HashMap;

use crate::types::ShellError;

pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variable {
    pub value: String,
    pub exported: bool,
    pub readonly: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    Function,
    /// Assignment prefixes of a single command (`x=1 cmd`).
    Temporary,
}

#[derive(Debug, Clone)]
struct Scope {
    kind: ScopeKind,
    vars: HashMap<String, Variable>,
}

impl Scope {
    fn new(kind: ScopeKind) -> Self {
        Self {
            kind,
            vars: HashMap::new(),
        }
    }
}

/// Dynamic variable scopes plus the positional parameter stack.
#[derive(Debug, Clone)]
pub struct Variables {
    scopes: Vec<Scope>,
    positional: Vec<Vec<String>>,
}

impl Default for Variables {
    fn default() -> Self {
        Self::new()
    }
}

impl Variables {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::new(ScopeKind::Global)],
            positional: vec![Vec::new()],
        }
    }

    /// Seed the global scope from the process environment.
    pub fn from_env() -> Self {
        let mut vars = Self::new();
        for (name, value) in std::env::vars() {
            if is_identifier(&name) {
                vars.scopes[0].vars.insert(
                    name,
                    Variable {
                        value,
                        exported: true,
                        readonly: false,
                    },
                );
            }
        }
        vars
    }

    fn find(&self, name: &str) -> Option<&Variable> {
        self.scopes.iter().rev().find_map(|scope| scope.vars.get(name))
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.vars.get_mut(name))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.find(name).map(|v| v.value.as_str())
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Assign to the innermost existing binding, or create a global one.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), ShellError> {
        if !is_identifier(name) {
            return Err(ShellError::InvalidIdentifier(name.to_string()));
        }
        if let Some(var) = self.find_mut(name) {
            if var.readonly {
                return Err(ShellError::ReadonlyVariable(name.to_string()));
            }
            var.value = value.to_string();
            return Ok(());
        }
        self.scopes[0].vars.insert(
            name.to_string(),
            Variable {
                value: value.to_string(),
                ..Variable::default()
            },
        );
        Ok(())
    }

    /// Bind in the innermost scope regardless of outer bindings.
    pub fn set_local(&mut self, name: &str, value: &str, exported: bool) -> Result<(), ShellError> {
        if !is_identifier(name) {
            return Err(ShellError::InvalidIdentifier(name.to_string()));
        }
        if self.find(name).map_or(false, |v| v.readonly) {
            return Err(ShellError::ReadonlyVariable(name.to_string()));
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.vars.insert(
                name.to_string(),
                Variable {
                    value: value.to_string(),
                    exported,
                    readonly: false,
                },
            );
        }
        Ok(())
    }

    pub fn export(&mut self, name: &str) -> Result<(), ShellError> {
        if !is_identifier(name) {
            return Err(ShellError::InvalidIdentifier(name.to_string()));
        }
        match self.find_mut(name) {
            Some(var) => var.exported = true,
            None => {
                self.scopes[0].vars.insert(
                    name.to_string(),
                    Variable {
                        exported: true,
                        ..Variable::default()
                    },
                );
            }
        }
        Ok(())
    }

    pub fn set_readonly(&mut self, name: &str) {
        if let Some(var) = self.find_mut(name) {
            var.readonly = true;
        }
    }

    pub fn unset(&mut self, name: &str) -> Result<(), ShellError> {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(var) = scope.vars.get(name) {
                if var.readonly {
                    return Err(ShellError::ReadonlyVariable(name.to_string()));
                }
                scope.vars.remove(name);
                return Ok(());
            }
        }
        Ok(())
    }

    pub fn push_scope(&mut self, kind: ScopeKind) {
        self.scopes.push(Scope::new(kind));
    }

    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn in_function(&self) -> bool {
        self.scopes.iter().any(|s| s.kind == ScopeKind::Function)
    }

    /// Move the bindings of the innermost temporary scope into the scope
    /// below it.
    pub fn merge_temporary(&mut self) {
        if self.scopes.len() < 2 || self.scopes.last().map(|s| s.kind) != Some(ScopeKind::Temporary) {
            return;
        }
        if let Some(scope) = self.scopes.pop() {
            for (name, var) in scope.vars {
                let _ = self.set(&name, &var.value);
                if var.exported {
                    let _ = self.export(&name);
                }
            }
        }
    }

    fn visible(&self, exported_only: bool) -> Vec<(String, String)> {
        let mut merged: HashMap<&str, &Variable> = HashMap::new();
        for scope in &self.scopes {
            for (name, var) in &scope.vars {
                merged.insert(name, var);
            }
        }
        let mut pairs: Vec<(String, String)> = merged
            .into_iter()
            .filter(|(_, var)| var.exported || !exported_only)
            .map(|(name, var)| (name.to_string(), var.value.clone()))
            .collect();
        pairs.sort();
        pairs
    }

    /// `NAME=value` pairs for a child's environment, innermost bindings
    /// winning.
    pub fn environment(&self) -> Vec<(String, String)> {
        self.visible(true)
    }

    /// Every visible binding, sorted by name.
    pub fn all(&self) -> Vec<(String, String)> {
        self.visible(false)
    }

    pub fn positional(&self) -> &[String] {
        self.positional.last().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn set_positional(&mut self, args: Vec<String>) {
        if let Some(top) = self.positional.last_mut() {
            *top = args;
        }
    }

    pub fn push_positional(&mut self, args: Vec<String>) {
        self.positional.push(args);
    }

    pub fn pop_positional(&mut self) {
        if self.positional.len() > 1 {
            self.positional.pop();
        }
    }

    pub fn shift(&mut self, n: usize) -> bool {
        match self.positional.last_mut() {
            Some(top) if n <= top.len() => {
                top.drain(..n);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_scope_shadows_and_restores() {
        let mut vars = Variables::new();
        vars.set("x", "global").unwrap();
        vars.push_scope(ScopeKind::Function);
        vars.set_local("x", "local", false).unwrap();
        assert_eq!(vars.get("x"), Some("local"));
        vars.set("y", "leaks").unwrap();
        vars.pop_scope();
        assert_eq!(vars.get("x"), Some("global"));
        assert_eq!(vars.get("y"), Some("leaks"));
    }

    #[test]
    fn readonly_rejects_assignment() {
        let mut vars = Variables::new();
        vars.set("r", "1").unwrap();
        vars.set_readonly("r");
        assert!(matches!(vars.set("r", "2"), Err(ShellError::ReadonlyVariable(_))));
        assert!(vars.unset("r").is_err());
    }

    #[test]
    fn environment_lists_exported_only() {
        let mut vars = Variables::new();
        vars.set("A", "1").unwrap();
        vars.set("B", "2").unwrap();
        vars.export("B").unwrap();
        vars.push_scope(ScopeKind::Temporary);
        vars.set_local("C", "3", true).unwrap();
        assert_eq!(
            vars.environment(),
            vec![("B".to_string(), "2".to_string()), ("C".to_string(), "3".to_string())]
        );
    }

    #[test]
    fn shift_positional() {
        let mut vars = Variables::new();
        vars.set_positional(vec!["a".into(), "b".into()]);
        assert!(vars.shift(1));
        assert_eq!(vars.positional().to_vec(), vec!["b".to_string()]);
        assert!(!vars.shift(2));
    }
}
