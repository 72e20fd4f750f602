use std::{
    collections::hash_map::Entry,
    fmt::Debug,
    sync::{Arc, RwLock},
};

use rustc_hash::FxHashMap;

use crate::{
    error::ExecutionErrorKind,
    sync,
    value::{types::Type, Value},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    Function,
    /// `while`, `for`, `nubo_concurrent`, …
    Block(&'static str),
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub value: Value,
    pub mutable: bool,
    /// Declared type; assignments must match it.
    pub ty: Option<Type>,
}

impl Binding {
    pub fn constant(value: Value) -> Self {
        Self {
            value,
            mutable: false,
            ty: None,
        }
    }

    pub fn variable(value: Value, ty: Option<Type>) -> Self {
        Self {
            value,
            mutable: true,
            ty,
        }
    }
}

pub struct Scope {
    bindings: FxHashMap<String, Binding>,
    parent: Option<Arc<RwLock<Scope>>>,
    kind: ScopeKind,
}

impl Scope {
    pub fn boxed(parent: Option<Arc<RwLock<Scope>>>, kind: ScopeKind) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(Self::new(parent, kind)))
    }

    pub fn new(parent: Option<Arc<RwLock<Scope>>>, kind: ScopeKind) -> Self {
        Self {
            bindings: FxHashMap::default(),
            parent,
            kind,
        }
    }

    /// `let` rebinds an existing name; `const`, or shadowing a `const`, fails.
    pub fn declare(&mut self, name: &str, binding: Binding) -> Result<(), ExecutionErrorKind> {
        match self.bindings.entry(name.to_string()) {
            Entry::Occupied(mut o) => {
                if !binding.mutable || !o.get().mutable {
                    Err(ExecutionErrorKind::AlreadyDeclared(name.to_string()))
                } else {
                    o.insert(binding);
                    Ok(())
                }
            }
            Entry::Vacant(v) => {
                v.insert(binding);
                Ok(())
            }
        }
    }

    /// Overwrites without the redeclaration rules; used for loop variables
    /// and host bindings.
    pub fn force(&mut self, name: &str, binding: Binding) {
        self.bindings.insert(name.to_string(), binding);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(binding) = self.bindings.get(name) {
            return Some(binding.value.clone());
        }
        self.parent
            .as_ref()
            .and_then(|parent| sync::read(parent).get(name))
    }

    pub fn contains_local(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Assigns in the scope that defined `name`.
    pub fn assign(&mut self, name: &str, value: Value) -> Result<(), ExecutionErrorKind> {
        if let Some(binding) = self.bindings.get_mut(name) {
            if !binding.mutable {
                return Err(ExecutionErrorKind::ImmutableVariable(name.to_string()));
            }
            if let Some(ty) = &binding.ty {
                let actual = value.type_of();
                if !ty.compare(&actual) {
                    return Err(ExecutionErrorKind::TypeMismatch(format!(
                        "cannot assign {actual} to '{name}' of type {ty}"
                    )));
                }
            }
            binding.value = value;
            return Ok(());
        }
        match &self.parent {
            Some(parent) => sync::write(parent).assign(name, value),
            None => Err(ExecutionErrorKind::UndefinedVariable(name.to_string())),
        }
    }

    /// Local binding names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }
}

impl Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(format!("Scope<{:?}>", std::ptr::from_ref(self)).as_str())
            .field("kind", &self.kind)
            .field("bindings", &self.names())
            .field("parent", &self.parent.as_ref().map(Arc::as_ptr))
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_assign_walks_to_defining_scope() {
        let global = Scope::boxed(None, ScopeKind::Global);
        sync::write(&global)
            .declare("x", Binding::variable(Value::Int(1), Some(Type::INT)))
            .unwrap();
        let block = Scope::boxed(Some(global.clone()), ScopeKind::Block("while"));
        sync::write(&block).assign("x", Value::Int(2)).unwrap();
        assert_eq!(sync::read(&global).get("x"), Some(Value::Int(2)));

        let err = sync::write(&block)
            .assign("x", Value::string("no"))
            .unwrap_err();
        assert!(matches!(err, ExecutionErrorKind::TypeMismatch(_)));
        let err = sync::write(&block).assign("y", Value::Nil).unwrap_err();
        assert!(matches!(err, ExecutionErrorKind::UndefinedVariable(_)));
    }

    #[test]
    fn test_redeclaration_rules() {
        let mut scope = Scope::new(None, ScopeKind::Global);
        scope.declare("a", Binding::variable(Value::Int(1), None)).unwrap();
        scope.declare("a", Binding::variable(Value::Int(2), None)).unwrap();
        assert_eq!(scope.get("a"), Some(Value::Int(2)));

        scope.declare("c", Binding::constant(Value::Int(1))).unwrap();
        assert!(scope.declare("c", Binding::variable(Value::Int(2), None)).is_err());
        assert!(scope.declare("a", Binding::constant(Value::Int(3))).is_err());
        assert!(matches!(
            scope.assign("c", Value::Int(5)),
            Err(ExecutionErrorKind::ImmutableVariable(_))
        ));
    }
}
