//! The binding environment ("localThis") of a compilation unit.
//!
//! Nested scopes push a layer on entry and pop it on exit. Popping a layer
//! drops everything declared in it, which restores any outer binding it
//! shadowed.

use indexmap::IndexMap;
use std::cell::RefCell;

use crate::error::BindingError;
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct Binding {
    pub value: Value,
    pub mutable: bool,
}

#[derive(Debug)]
pub struct Bindings {
    layers: RefCell<Vec<IndexMap<String, Binding>>>,
}

impl Default for Bindings {
    fn default() -> Self {
        Self::new()
    }
}

impl Bindings {
    pub fn new() -> Self {
        Self {
            layers: RefCell::new(vec![IndexMap::new()]),
        }
    }

    pub fn push_layer(&self) {
        self.layers.borrow_mut().push(IndexMap::new());
    }

    /// Pops the innermost layer. The unit's base layer is never popped.
    pub fn pop_layer(&self) {
        let mut layers = self.layers.borrow_mut();
        if layers.len() > 1 {
            layers.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.layers.borrow().len()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.lookup(name).map(|b| b.value)
    }

    pub fn lookup(&self, name: &str) -> Option<Binding> {
        self.layers
            .borrow()
            .iter()
            .rev()
            .find_map(|layer| layer.get(name).cloned())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.layers
            .borrow()
            .iter()
            .any(|layer| layer.contains_key(name))
    }

    /// Declares `name` in the innermost layer.
    ///
    /// Redeclaring a mutable binding of the same layer overwrites it;
    /// redeclaring a constant fails.
    pub fn declare(&self, name: &str, value: Value, mutable: bool) -> Result<(), BindingError> {
        let mut layers = self.layers.borrow_mut();
        let Some(layer) = layers.last_mut() else {
            return Err(BindingError::Undeclared(name.to_string()));
        };
        if let Some(existing) = layer.get(name) {
            if !existing.mutable {
                return Err(BindingError::Redeclared(name.to_string()));
            }
        }
        layer.insert(name.to_string(), Binding { value, mutable });
        Ok(())
    }

    /// Writes to the nearest layer that holds `name`.
    pub fn assign(&self, name: &str, value: Value) -> Result<(), BindingError> {
        let mut layers = self.layers.borrow_mut();
        for layer in layers.iter_mut().rev() {
            if let Some(binding) = layer.get_mut(name) {
                if !binding.mutable {
                    return Err(BindingError::ConstAssignment(name.to_string()));
                }
                binding.value = value;
                return Ok(());
            }
        }
        Err(BindingError::Undeclared(name.to_string()))
    }

    /// `localThis.name = value`: assigns when visible, otherwise declares a
    /// mutable binding.
    pub fn assign_or_declare(&self, name: &str, value: Value) -> Result<(), BindingError> {
        if self.contains(name) {
            self.assign(name, value)
        } else {
            self.declare(name, value, true)
        }
    }

    /// Every visible name with its current value, outermost first, shadowed
    /// entries collapsed.
    pub fn snapshot(&self) -> IndexMap<String, Value> {
        let mut out = IndexMap::new();
        for layer in self.layers.borrow().iter() {
            for (name, binding) in layer {
                out.insert(name.clone(), binding.value.clone());
            }
        }
        out
    }
}
