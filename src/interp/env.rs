use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::{TError, Value};

/// A persistent chain of scopes. Cloning an `Environment` shares the chain,
/// which is what lambda capture relies on: `define` mutates the innermost
/// scope in place (so recursion works), while `override` produces a fresh
/// shadowing layer that closures captured earlier never see.
#[derive(Debug, Clone)]
pub struct Environment {
    scope: Rc<Scope>,
}

#[derive(Debug)]
struct Scope {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Environment>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self {
            scope: Rc::new(Scope {
                vars: RefCell::new(HashMap::new()),
                parent: None,
            }),
        }
    }

    /// Push a fresh innermost scope.
    pub fn child(&self) -> Self {
        Self {
            scope: Rc::new(Scope {
                vars: RefCell::new(HashMap::new()),
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut current = Some(self);
        while let Some(env) = current {
            if let Some(v) = env.scope.vars.borrow().get(name) {
                return Some(v.clone());
            }
            current = env.scope.parent.as_ref();
        }
        None
    }

    /// Bind `name` exactly once in the innermost scope.
    pub fn define(&self, name: &str, value: Value) -> Result<(), TError> {
        let mut vars = self.scope.vars.borrow_mut();
        if vars.contains_key(name) {
            return Err(TError::name_error(format!(
                "`{name}` is already defined; use `:=` to rebind it"
            )));
        }
        vars.insert(name.to_string(), value);
        Ok(())
    }

    /// `:=`: rebind by shadowing. Returns the environment subsequent
    /// statements should evaluate in; `self` is left untouched, so any lambda
    /// holding the old chain keeps the old binding.
    pub fn rebind(&self, name: &str, value: Value) -> Self {
        let shadow = self.child();
        shadow
            .scope
            .vars
            .borrow_mut()
            .insert(name.to_string(), value);
        shadow
    }

    /// Used by package seeding and internal bindings that may repeat.
    pub fn force_define(&self, name: &str, value: Value) {
        self.scope.vars.borrow_mut().insert(name.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_once_then_name_error() {
        let env = Environment::new();
        env.define("x", Value::Int(1)).unwrap();
        let err = env.define("x", Value::Int(2)).unwrap_err();
        assert_eq!(err.code, crate::interp::ErrorCode::NameError);
    }

    #[test]
    fn rebind_shadows_without_touching_captured_chain() {
        let env = Environment::new();
        env.define("x", Value::Int(1)).unwrap();
        let captured = env.clone();
        let after = env.rebind("x", Value::Int(2));
        assert_eq!(after.lookup("x"), Some(Value::Int(2)));
        assert_eq!(captured.lookup("x"), Some(Value::Int(1)));
    }

    #[test]
    fn lookup_walks_outward() {
        let outer = Environment::new();
        outer.define("a", Value::Int(1)).unwrap();
        let inner = outer.child();
        inner.define("b", Value::Int(2)).unwrap();
        assert_eq!(inner.lookup("a"), Some(Value::Int(1)));
        assert_eq!(outer.lookup("b"), None);
    }

    #[test]
    fn define_after_capture_is_visible_to_closure_scope() {
        // recursion support: the innermost scope is shared, not copied
        let env = Environment::new();
        let captured = env.clone();
        env.define("f", Value::Int(42)).unwrap();
        assert_eq!(captured.lookup("f"), Some(Value::Int(42)));
    }
}
