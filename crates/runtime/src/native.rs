//! Native plugin contract
//!
//! A plugin is an in-process object exposing the fixed vocabulary of eval
//! entry points. `signature()` advertises which variants are implemented;
//! the default for every entry is a VALENCE error, so a plugin only
//! implements what its signature claims. The registry maps names to plugin
//! instances; a workspace symbol bound to a native function dispatches
//! through it.
//!
//! Errors are conveyed as `Err(ErrorKind)` results, which the evaluator
//! turns into error tokens like any primitive failure.

use crate::sysvar::Ctx;
use apl_core::{ErrorKind, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

bitflags::bitflags! {
    /// Which argument slots the plugin's eval entries accept
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Signature: u32 {
        /// Right argument B
        const B = 0b00001;
        /// Left argument A
        const A = 0b00010;
        /// Axis X
        const X = 0b00100;
        /// Left function operand L
        const L = 0b01000;
        /// Right function operand R
        const R = 0b10000;
    }
}

/// A function operand handed to an operator plugin: value-level closures
/// supplied by the evaluator
pub struct FunOperand<'a> {
    pub monadic: Option<&'a dyn Fn(&Value) -> Result<Value, ErrorKind>>,
    pub dyadic: Option<&'a dyn Fn(&Value, &Value) -> Result<Value, ErrorKind>>,
}

/// The fixed entry-point vocabulary
#[allow(unused_variables)]
pub trait NativeFunction: Send + Sync + fmt::Debug {
    /// Which eval variants are implemented
    fn get_signature(&self) -> Signature;

    /// Called when the binding is expunged or the workspace is cleared
    fn close_fun(&self) {}

    fn eval_(&self, ctx: &Ctx) -> Result<Value, ErrorKind> {
        Err(ErrorKind::Valence)
    }

    fn eval_b(&self, b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
        Err(ErrorKind::Valence)
    }

    fn eval_ab(&self, a: &Value, b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
        Err(ErrorKind::Valence)
    }

    fn eval_xb(&self, x: &Value, b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
        Err(ErrorKind::Valence)
    }

    fn eval_axb(&self, a: &Value, x: &Value, b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
        Err(ErrorKind::Valence)
    }

    fn eval_lb(&self, l: &FunOperand, b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
        Err(ErrorKind::Valence)
    }

    fn eval_alb(
        &self,
        a: &Value,
        l: &FunOperand,
        b: &Value,
        ctx: &Ctx,
    ) -> Result<Value, ErrorKind> {
        Err(ErrorKind::Valence)
    }

    fn eval_lxb(
        &self,
        l: &FunOperand,
        x: &Value,
        b: &Value,
        ctx: &Ctx,
    ) -> Result<Value, ErrorKind> {
        Err(ErrorKind::Valence)
    }

    fn eval_alxb(
        &self,
        a: &Value,
        l: &FunOperand,
        x: &Value,
        b: &Value,
        ctx: &Ctx,
    ) -> Result<Value, ErrorKind> {
        Err(ErrorKind::Valence)
    }

    fn eval_lrb(
        &self,
        l: &FunOperand,
        r: &FunOperand,
        b: &Value,
        ctx: &Ctx,
    ) -> Result<Value, ErrorKind> {
        Err(ErrorKind::Valence)
    }

    fn eval_alrb(
        &self,
        a: &Value,
        l: &FunOperand,
        r: &FunOperand,
        b: &Value,
        ctx: &Ctx,
    ) -> Result<Value, ErrorKind> {
        Err(ErrorKind::Valence)
    }

    fn eval_lrxb(
        &self,
        l: &FunOperand,
        r: &FunOperand,
        x: &Value,
        b: &Value,
        ctx: &Ctx,
    ) -> Result<Value, ErrorKind> {
        Err(ErrorKind::Valence)
    }

    fn eval_alrxb(
        &self,
        a: &Value,
        l: &FunOperand,
        r: &FunOperand,
        x: &Value,
        b: &Value,
        ctx: &Ctx,
    ) -> Result<Value, ErrorKind> {
        Err(ErrorKind::Valence)
    }

    /// Fill semantics for an empty right argument
    fn eval_fill_b(&self, b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
        Ok(Value::empty_with_prototype(
            b.shape().clone(),
            b.prototype_cell(),
        ))
    }

    fn eval_fill_ab(&self, a: &Value, b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
        let _ = a;
        self.eval_fill_b(b, ctx)
    }

    /// Identity element for reduce over an empty axis
    fn eval_ident_bx(&self, b: &Value, x: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
        Err(ErrorKind::Domain)
    }
}

/// Runtime registry of loaded plugins
#[derive(Debug, Default)]
pub struct NativeRegistry {
    plugins: HashMap<String, Arc<dyn NativeFunction>>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        NativeRegistry::default()
    }

    /// Register a plugin under a name; replaces and closes any previous one
    pub fn register(&mut self, name: &str, plugin: Arc<dyn NativeFunction>) {
        if let Some(old) = self.plugins.insert(name.to_string(), plugin) {
            old.close_fun();
        }
        tracing::debug!(name, "native function registered");
    }

    /// The single dispatch entry: a name returns its plugin
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn NativeFunction>> {
        self.plugins.get(name).cloned()
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        match self.plugins.remove(name) {
            Some(p) => {
                p.close_fun();
                true
            }
            None => false,
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut v: Vec<String> = self.plugins.keys().cloned().collect();
        v.sort();
        v
    }
}
