//! The workspace container
//!
//! Owns the symbol table, system variables, the native-function registry,
//! the parallel configuration, stop/trace sets, the pushed-command slot
//! (to emulate `)LOAD` mid-evaluation), and the workspace id. The state
//! indicator lives in the interpreter that drives this workspace; the
//! workspace is the root of value reachability for the save walk.

use crate::native::NativeRegistry;
use crate::parallel::ParallelConfig;
use crate::symbol::{Binding, SymbolTable};
use crate::sysvar::SystemVariables;
use apl_core::{AplError, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct Workspace {
    pub wsid: String,
    pub symbols: SymbolTable,
    pub sysvars: SystemVariables,
    pub natives: NativeRegistry,
    pub parallel: ParallelConfig,
    /// S∆fn / T∆fn line sets
    pub stop_sets: HashMap<String, Vec<usize>>,
    pub trace_sets: HashMap<String, Vec<usize>>,
    /// The last error, feeding ⎕EM and ⎕ET
    pub last_error: Option<AplError>,
    /// A command to run once the current evaluation unwinds ()LOAD etc.)
    pub pushed_command: Option<String>,
    /// Soft-interrupt flag, checked between token reductions
    pub interrupt: Arc<AtomicBool>,
    /// Display lines produced by evaluation, drained by the session
    output: Vec<String>,
    /// Workspace library search paths
    pub lib_paths: Vec<PathBuf>,
}

impl Default for Workspace {
    fn default() -> Self {
        Workspace::new()
    }
}

impl Workspace {
    pub fn new() -> Self {
        Workspace {
            wsid: "CLEAR WS".to_string(),
            symbols: SymbolTable::new(),
            sysvars: SystemVariables::new(),
            natives: NativeRegistry::new(),
            parallel: ParallelConfig::default(),
            stop_sets: HashMap::new(),
            trace_sets: HashMap::new(),
            last_error: None,
            pushed_command: None,
            interrupt: Arc::new(AtomicBool::new(false)),
            output: Vec::new(),
            lib_paths: Vec::new(),
        }
    }

    /// )CLEAR: a fresh workspace, keeping session-level settings
    pub fn clear(&mut self) {
        let lib_paths = std::mem::take(&mut self.lib_paths);
        let parallel = self.parallel.clone();
        *self = Workspace::new();
        self.lib_paths = lib_paths;
        self.parallel = parallel;
    }

    pub fn request_interrupt(&self) {
        self.interrupt.store(true, Ordering::Relaxed);
    }

    pub fn take_interrupt(&self) -> bool {
        self.interrupt.swap(false, Ordering::Relaxed)
    }

    pub fn print_line(&mut self, line: String) {
        self.output.push(line);
    }

    pub fn print_value(&mut self, v: &Value) {
        let ctx = self.sysvars.ctx();
        for line in crate::prim::format::display_string(v, &ctx).lines() {
            self.output.push(line.to_string());
        }
    }

    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    /// ⎕EM: the three-line report of the last error
    pub fn error_message(&self) -> Value {
        match &self.last_error {
            Some(e) => Value::char_vector(&e.report()),
            None => Value::char_vector(""),
        }
    }

    /// ⎕ET: the (major, minor) pair of the last error
    pub fn error_type(&self) -> Value {
        match &self.last_error {
            Some(e) => {
                let (maj, min) = e.kind.et();
                Value::int_vector(&[maj, min])
            }
            None => Value::int_vector(&[0, 0]),
        }
    }

    /// )FNS
    pub fn fns(&self) -> Vec<String> {
        self.symbols.names_of_class(3)
    }

    /// )VARS
    pub fn vars(&self) -> Vec<String> {
        self.symbols.names_of_class(2)
    }

    /// )OPS — user-defined operators (name class 4). Defining operators
    /// is not supported, so the listing is always empty.
    pub fn ops(&self) -> Vec<String> {
        self.symbols.names_of_class(4)
    }

    /// )ERASE
    pub fn erase(&mut self, names: &[&str]) -> Vec<String> {
        let mut not_erased = Vec::new();
        for name in names {
            if !self.symbols.erase(name) {
                not_erased.push(name.to_string());
            }
        }
        not_erased
    }

    /// )WSID
    pub fn set_wsid(&mut self, name: &str) -> String {
        let old = std::mem::replace(&mut self.wsid, name.to_string());
        old
    }

    /// All values reachable from the workspace root (symbols and their
    /// whole binding stacks). The interpreter adds SI-held values.
    pub fn reachable_values(&self) -> Vec<Arc<Value>> {
        let mut out = Vec::new();
        for sym in self.symbols.iter() {
            collect_bindings(sym, &mut out);
        }
        out
    }
}

fn collect_bindings(sym: &crate::symbol::Symbol, out: &mut Vec<Arc<Value>>) {
    // only the visible binding is saved; shadowed bindings belong to
    // suspended frames and are serialised with the state indicator
    if let Binding::Variable(v) = sym.top() {
        out.push(Arc::clone(v));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_keeps_lib_paths() {
        let mut ws = Workspace::new();
        ws.lib_paths.push(PathBuf::from("/tmp"));
        ws.symbols.assign("X", Value::int_scalar(1));
        ws.clear();
        assert_eq!(ws.lib_paths.len(), 1);
        assert!(ws.symbols.value_of("X").is_none());
        assert_eq!(ws.wsid, "CLEAR WS");
    }

    #[test]
    fn test_interrupt_flag() {
        let ws = Workspace::new();
        assert!(!ws.take_interrupt());
        ws.request_interrupt();
        assert!(ws.take_interrupt());
        assert!(!ws.take_interrupt());
    }

    #[test]
    fn test_output_collection() {
        let mut ws = Workspace::new();
        ws.print_value(&Value::int_vector(&[1, 2, 3]));
        assert_eq!(ws.take_output(), vec!["1 2 3"]);
        assert!(ws.take_output().is_empty());
    }

    #[test]
    fn test_reachable_values() {
        let mut ws = Workspace::new();
        ws.symbols.assign("X", Value::int_scalar(1));
        ws.symbols.assign("Y", Value::int_scalar(2));
        assert_eq!(ws.reachable_values().len(), 2);
    }

    #[test]
    fn test_error_type_pair() {
        let mut ws = Workspace::new();
        assert_eq!(
            ws.error_type().ravel(),
            Value::int_vector(&[0, 0]).ravel()
        );
        ws.last_error = Some(AplError::new(apl_core::ErrorKind::Domain));
        assert_eq!(
            ws.error_type().ravel(),
            Value::int_vector(&[5, 4]).ravel()
        );
    }
}
