//! Environments for UTTR
//!
//! All scopes of a program run live in one arena and refer to their parent by
//! [`EnvId`]. Closures hold the id of their defining scope, so a function
//! stored inside its own scope forms no ownership cycle. Scopes are never
//! freed individually; the arena lives as long as the interpreter.

use std::collections::HashMap;

use crate::value::Value;

/// Index of a scope in the [`SymbolTable`] arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvId(usize);

/// What created a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// The built-ins and the entry program
    Global,
    /// Top level of an imported module
    Module,
    /// A single user-function call
    Call,
}

/// A single scope
#[derive(Debug)]
struct Scope {
    parent: Option<EnvId>,
    kind: ScopeKind,
    symbols: HashMap<String, Value>,
    /// Names listed by `share`, in order; `None` until the first `share`
    shared: Option<Vec<String>>,
}

/// Arena of scopes
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
}

impl SymbolTable {
    /// Create a table holding only the empty global scope
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                parent: None,
                kind: ScopeKind::Global,
                symbols: HashMap::new(),
                shared: None,
            }],
        }
    }

    /// The global scope
    pub fn global(&self) -> EnvId {
        EnvId(0)
    }

    /// Allocate a new scope
    pub fn push_scope(&mut self, parent: EnvId, kind: ScopeKind) -> EnvId {
        self.scopes.push(Scope {
            parent: Some(parent),
            kind,
            symbols: HashMap::new(),
            shared: None,
        });
        EnvId(self.scopes.len() - 1)
    }

    pub fn kind(&self, env: EnvId) -> ScopeKind {
        self.scopes[env.0].kind
    }

    /// Number of scopes allocated so far
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Look a name up through the parent chain
    pub fn get(&self, env: EnvId, name: &str) -> Option<&Value> {
        let mut current = Some(env);
        while let Some(id) = current {
            let scope = &self.scopes[id.0];
            if let Some(value) = scope.symbols.get(name) {
                return Some(value);
            }
            current = scope.parent;
        }
        None
    }

    pub fn get_local(&self, env: EnvId, name: &str) -> Option<&Value> {
        self.scopes[env.0].symbols.get(name)
    }

    /// Bind a name in this scope, shadowing any outer binding
    pub fn define(&mut self, env: EnvId, name: impl Into<String>, value: Value) {
        self.scopes[env.0].symbols.insert(name.into(), value);
    }

    /// Bind a name for `put`/`keep`.
    ///
    /// A name already bound in an enclosing function-call scope (reached before
    /// any module or global scope) is rebound there, which lets closures update
    /// captured variables. Otherwise the name is bound locally.
    pub fn assign(&mut self, env: EnvId, name: &str, value: Value) {
        if !self.scopes[env.0].symbols.contains_key(name) {
            let mut current = self.scopes[env.0].parent;
            while let Some(id) = current {
                let scope = &mut self.scopes[id.0];
                if scope.kind != ScopeKind::Call {
                    break;
                }
                if let Some(slot) = scope.symbols.get_mut(name) {
                    *slot = value;
                    return;
                }
                current = scope.parent;
            }
        }
        self.define(env, name, value);
    }

    /// Record a name as exported from this scope
    pub fn share(&mut self, env: EnvId, name: &str) {
        let shared = self.scopes[env.0].shared.get_or_insert_with(Vec::new);
        if !shared.iter().any(|n| n == name) {
            shared.push(name.to_string());
        }
    }

    /// Bindings visible to importers.
    ///
    /// Without any `share`, every local name not starting with `_` is
    /// exported; otherwise exactly the shared names are.
    pub fn exports(&self, env: EnvId) -> Vec<(String, Value)> {
        let scope = &self.scopes[env.0];
        match &scope.shared {
            Some(names) => names
                .iter()
                .filter_map(|n| scope.symbols.get(n).map(|v| (n.clone(), v.clone())))
                .collect(),
            None => {
                let mut exports: Vec<(String, Value)> = scope
                    .symbols
                    .iter()
                    .filter(|(n, _)| !n.starts_with('_'))
                    .map(|(n, v)| (n.clone(), v.clone()))
                    .collect();
                exports.sort_by(|a, b| a.0.cmp(&b.0));
                exports
            }
        }
    }

    /// Local bindings of a scope, sorted by name
    pub fn bindings(&self, env: EnvId) -> Vec<(String, Value)> {
        let mut bindings: Vec<(String, Value)> = self.scopes[env.0]
            .symbols
            .iter()
            .map(|(n, v)| (n.clone(), v.clone()))
            .collect();
        bindings.sort_by(|a, b| a.0.cmp(&b.0));
        bindings
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
