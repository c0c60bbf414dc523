//! Symbol table
//!
//! Each symbol owns a stack of bindings: function entry pushes shadow
//! bindings for the locals (dynamic scope), return pops them. Name
//! classes follow ⎕NC: 0 unbound, 2 variable, 3 function, label counts
//! as a variable holding its line number.

use crate::function::UserFunction;
use crate::native::NativeFunction;
use apl_core::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub enum Binding {
    #[default]
    Unused,
    Variable(Arc<Value>),
    Function(Arc<UserFunction>),
    Native(Arc<dyn NativeFunction>),
    /// A line label, valid while its function runs
    Label(i64),
    /// A shared-variable key (offer name); the partner side is a collaborator
    Shared(String),
}

#[derive(Debug)]
pub struct Symbol {
    pub name: String,
    bindings: Vec<Binding>,
}

impl Symbol {
    fn new(name: String) -> Self {
        Symbol {
            name,
            bindings: vec![Binding::Unused],
        }
    }

    pub fn top(&self) -> &Binding {
        self.bindings.last().expect("binding stack never empty")
    }

    pub fn set(&mut self, b: Binding) {
        *self.bindings.last_mut().expect("binding stack never empty") = b;
    }

    pub fn push(&mut self, b: Binding) {
        self.bindings.push(b);
    }

    pub fn pop(&mut self) {
        if self.bindings.len() > 1 {
            self.bindings.pop();
        } else {
            self.bindings[0] = Binding::Unused;
        }
    }

    pub fn depth(&self) -> usize {
        self.bindings.len()
    }

    /// ⎕NC name class
    pub fn name_class(&self) -> i64 {
        match self.top() {
            Binding::Unused => 0,
            Binding::Label(_) | Binding::Variable(_) => 2,
            Binding::Function(_) | Binding::Native(_) => 3,
            Binding::Shared(_) => 2,
        }
    }
}

pub type SymbolId = usize;

#[derive(Debug, Default)]
pub struct SymbolTable {
    by_name: HashMap<String, SymbolId>,
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    /// Look up or create a symbol
    pub fn id(&mut self, name: &str) -> SymbolId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = self.symbols.len();
        self.symbols.push(Symbol::new(name.to_string()));
        self.by_name.insert(name.to_string(), id);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.by_name.get(name).map(|&id| &self.symbols[id])
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id]
    }

    pub fn assign(&mut self, name: &str, v: Value) {
        let id = self.id(name);
        self.symbols[id].set(Binding::Variable(Arc::new(v)));
    }

    pub fn assign_function(&mut self, name: &str, f: Arc<UserFunction>) {
        let id = self.id(name);
        self.symbols[id].set(Binding::Function(f));
    }

    pub fn value_of(&self, name: &str) -> Option<Arc<Value>> {
        match self.lookup(name).map(Symbol::top) {
            Some(Binding::Variable(v)) => Some(Arc::clone(v)),
            Some(Binding::Label(n)) => Some(Arc::new(Value::int_scalar(*n))),
            _ => None,
        }
    }

    /// Erase the top-level binding of a name ()ERASE, ⎕EX)
    pub fn erase(&mut self, name: &str) -> bool {
        match self.by_name.get(name) {
            Some(&id) => {
                self.symbols[id].set(Binding::Unused);
                true
            }
            None => false,
        }
    }

    /// All names bound to variables / functions, sorted (for )VARS, )FNS)
    pub fn names_of_class(&self, class: i64) -> Vec<String> {
        let mut names: Vec<String> = self
            .symbols
            .iter()
            .filter(|s| s.name_class() == class)
            .map(|s| s.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Iterate over all symbols (for the save walk)
    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_and_lookup() {
        let mut t = SymbolTable::new();
        t.assign("X", Value::int_scalar(42));
        let v = t.value_of("X").unwrap();
        assert_eq!(v.ravel()[0], apl_core::Cell::Int(42));
        assert_eq!(t.lookup("X").unwrap().name_class(), 2);
        assert!(t.lookup("Y").is_none());
    }

    #[test]
    fn test_shadowing() {
        let mut t = SymbolTable::new();
        t.assign("X", Value::int_scalar(1));
        let id = t.id("X");
        t.get_mut(id).push(Binding::Variable(Arc::new(Value::int_scalar(2))));
        assert_eq!(t.value_of("X").unwrap().ravel()[0], apl_core::Cell::Int(2));
        t.get_mut(id).pop();
        assert_eq!(t.value_of("X").unwrap().ravel()[0], apl_core::Cell::Int(1));
    }

    #[test]
    fn test_erase() {
        let mut t = SymbolTable::new();
        t.assign("X", Value::int_scalar(1));
        assert!(t.erase("X"));
        assert_eq!(t.lookup("X").unwrap().name_class(), 0);
        assert!(!t.erase("NEVER"));
    }

    #[test]
    fn test_class_listing() {
        let mut t = SymbolTable::new();
        t.assign("B", Value::int_scalar(1));
        t.assign("A", Value::int_scalar(2));
        assert_eq!(t.names_of_class(2), vec!["A", "B"]);
    }
}
