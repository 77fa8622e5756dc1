// ABOUTME: Environment module: lexically nested variable frames with export flags and runtime context

use crate::error::EvalError;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Security policy for the I/O mediator (`sandbox` module). Carried as a
/// runtime-context slot rather than loaded from a config file — configuration
/// loading is a host concern, out of scope here.
#[derive(Debug, Clone, Default)]
pub struct SecurityPolicy {
    pub no_read: bool,
    pub no_write: bool,
    pub restrict_read: Vec<String>,
    pub restrict_write: Vec<String>,
    pub allow_write: Vec<String>,
    pub allow_write_all: bool,
    pub allow_execute: Vec<String>,
    pub allow_execute_all: bool,
}

/// Slots inherited by pointer copy from parent frame to child frame so that
/// features depending on them keep working across function and module
/// boundaries (§4.1.3 / §4.3 context inheritance).
#[derive(Debug, Clone, Default)]
pub struct RuntimeContext {
    pub filename: Option<Rc<str>>,
    pub root_path: Option<Rc<str>>,
    pub security_policy: Option<Rc<SecurityPolicy>>,
    pub dev_log: bool,
    pub import_stack: Option<Rc<RefCell<HashSet<String>>>>,
    pub last_token_pos: Option<crate::ast::Pos>,
}

struct Binding {
    value: Value,
    exported: bool,
    protected: bool,
}

pub struct Environment {
    bindings: RefCell<HashMap<String, Binding>>,
    parent: Option<Rc<Environment>>,
    pub context: RefCell<RuntimeContext>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Environment {{ .. }}")
    }
}

impl Environment {
    /// Creates a new root environment with no parent.
    pub fn new() -> Rc<Self> {
        Rc::new(Environment {
            bindings: RefCell::new(HashMap::new()),
            parent: None,
            context: RefCell::new(RuntimeContext::default()),
        })
    }

    /// Creates a new child frame, inheriting the parent's runtime context by
    /// pointer copy.
    pub fn with_parent(parent: Rc<Environment>) -> Rc<Self> {
        let context = parent.context.borrow().clone();
        Rc::new(Environment {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(parent),
            context: RefCell::new(context),
        })
    }

    /// Defines a binding in this scope, unconditionally (used for function
    /// parameter binding).
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.bindings.borrow_mut().insert(
            name.into(),
            Binding {
                value,
                exported: false,
                protected: false,
            },
        );
    }

    /// `let name = expr` — introduces a fresh binding in the current frame.
    pub fn set_let(&self, name: impl Into<String>, value: Value, exported: bool) -> Result<(), EvalError> {
        let name = name.into();
        if let Some(existing) = self.bindings.borrow().get(&name) {
            if existing.protected {
                return Err(EvalError::protected_binding(&name));
            }
        }
        self.bindings.borrow_mut().insert(
            name,
            Binding {
                value,
                exported,
                protected: false,
            },
        );
        Ok(())
    }

    /// Marks `name` (already bound somewhere in the chain) as exported.
    pub fn set_export(&self, name: &str) -> bool {
        if let Some(b) = self.bindings.borrow_mut().get_mut(name) {
            b.exported = true;
            return true;
        }
        match &self.parent {
            Some(p) => p.set_export(name),
            None => false,
        }
    }

    /// Defines a protected binding that user code cannot shadow or reassign
    /// (e.g. the `basil` framework binding threaded into module scopes).
    pub fn define_protected(&self, name: impl Into<String>, value: Value) {
        self.bindings.borrow_mut().insert(
            name.into(),
            Binding {
                value,
                exported: false,
                protected: true,
            },
        );
    }

    /// `name = expr` — walks up the chain and updates the defining frame.
    pub fn update(&self, name: &str, value: Value) -> Result<(), EvalError> {
        if let Some(b) = self.bindings.borrow_mut().get_mut(name) {
            if b.protected {
                return Err(EvalError::protected_binding(name));
            }
            b.value = value;
            return Ok(());
        }
        match &self.parent {
            Some(p) => p.update(name, value),
            None => Err(EvalError::undefined_name(name)),
        }
    }

    /// Looks up `name`, walking the parent chain. Returns `(value, found)`.
    pub fn get(&self, name: &str) -> (Value, bool) {
        if let Some(b) = self.bindings.borrow().get(name) {
            return (b.value.clone(), true);
        }
        match &self.parent {
            Some(p) => p.get(name),
            None => (Value::Null, false),
        }
    }

    pub fn is_exported(&self, name: &str) -> bool {
        if let Some(b) = self.bindings.borrow().get(name) {
            return b.exported;
        }
        match &self.parent {
            Some(p) => p.is_exported(name),
            None => false,
        }
    }

    /// Names bound directly in this frame and marked exported, for building
    /// the module dictionary on import.
    pub fn exported_names(&self) -> Vec<(String, Value)> {
        self.bindings
            .borrow()
            .iter()
            .filter(|(_, b)| b.exported)
            .map(|(k, b)| (k.clone(), b.value.clone()))
            .collect()
    }

    pub fn parent(&self) -> Option<Rc<Environment>> {
        self.parent.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_and_get() {
        let env = Environment::new();
        env.define("x", Value::Integer(42));
        assert_eq!(env.get("x").0.type_name(), "integer");
    }

    #[test]
    fn undefined_name_not_found() {
        let env = Environment::new();
        assert!(!env.get("missing").1);
    }

    #[test]
    fn child_shadows_parent() {
        let parent = Environment::new();
        parent.define("x", Value::Integer(1));
        let child = Environment::with_parent(parent);
        child.define("x", Value::Integer(2));
        assert!(child.get("x").0.equals(&Value::Integer(2)));
    }

    #[test]
    fn update_walks_up_to_defining_frame() {
        let parent = Environment::new();
        parent.define("x", Value::Integer(1));
        let child = Environment::with_parent(parent.clone());
        child.update("x", Value::Integer(9)).unwrap();
        assert!(parent.get("x").0.equals(&Value::Integer(9)));
    }

    #[test]
    fn update_undefined_is_error() {
        let env = Environment::new();
        assert!(env.update("nope", Value::Null).is_err());
    }

    #[test]
    fn export_flags_are_scoped_to_defining_frame() {
        let env = Environment::new();
        env.set_let("x", Value::Integer(1), true).unwrap();
        assert!(env.is_exported("x"));
        assert_eq!(env.exported_names().len(), 1);
    }

    #[test]
    fn protected_bindings_cannot_be_updated() {
        let env = Environment::new();
        env.define_protected("basil", Value::Null);
        assert!(env.update("basil", Value::Integer(1)).is_err());
    }

    #[test]
    fn child_inherits_runtime_context_by_pointer_copy() {
        let parent = Environment::new();
        parent.context.borrow_mut().filename = Some(Rc::from("main.pars"));
        let child = Environment::with_parent(parent);
        assert_eq!(child.context.borrow().filename.as_deref(), Some("main.pars"));
    }
}
