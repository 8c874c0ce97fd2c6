//! The global environment.
//!
//! A [`Module`] is a cheap, clonable handle onto a shared symbol table. Every
//! prototype compiled for a session holds the same handle, so a `SETGLOBAL` in one
//! prototype is visible to `GETGLOBAL` in any other. Nothing here is process-wide:
//! two interpreters own two unrelated modules.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::value::{Symbol, Value};
use crate::{Error, Result};

#[derive(Clone, Default)]
pub struct Module {
    bindings: Rc<RefCell<HashMap<Symbol, Value>>>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: Symbol) -> Option<Value> {
        self.bindings.borrow().get(&name).cloned()
    }

    /// Like [`Module::get`], but a missing binding is a `NameError`
    pub fn lookup(&self, name: Symbol) -> Result<Value> {
        self.get(name)
            .ok_or_else(|| Error::undefined(name.name(), "lookup"))
    }

    /// Bind or rebind `name`; the last write wins
    pub fn set(&self, name: Symbol, value: Value) {
        self.bindings.borrow_mut().insert(name, value);
    }

    pub fn contains(&self, name: Symbol) -> bool {
        self.bindings.borrow().contains_key(&name)
    }

    pub fn len(&self) -> usize {
        self.bindings.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.borrow().is_empty()
    }

    /// All bindings, sorted by name
    pub fn bindings(&self) -> Vec<(String, Value)> {
        let mut all: Vec<(String, Value)> = self
            .bindings
            .borrow()
            .iter()
            .map(|(name, value)| (name.name(), value.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn ptr_eq(&self, other: &Module) -> bool {
        Rc::ptr_eq(&self.bindings, &other.bindings)
    }
}

impl fmt::Debug for Module {
    // Bindings routinely hold continuations whose protos point back at this module
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Module({} bindings)", self.len())
    }
}
