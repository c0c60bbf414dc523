//! System variables (⎕IO, ⎕CT, ⎕PP, …)
//!
//! Each variable is a stateful scalar or vector with validation on
//! assignment, and participates in scope stacking: a defined function that
//! localises `⎕IO` pushes a shadow binding on entry and pops it on exit, so
//! `⎕IO ← 0 ◇ F` sees the new value inside `F` and the old one afterwards.

use apl_core::{Cell, ErrorKind, Value};
use apl_parser::QuadName;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::time::Instant;

/// A value with a stack of shadow bindings (dynamic scope)
#[derive(Debug, Clone)]
struct Shadowed<T> {
    stack: Vec<T>,
}

impl<T: Clone> Shadowed<T> {
    fn new(initial: T) -> Self {
        Shadowed {
            stack: vec![initial],
        }
    }

    fn get(&self) -> &T {
        self.stack.last().expect("shadow stack never empty")
    }

    fn set(&mut self, v: T) {
        *self.stack.last_mut().expect("shadow stack never empty") = v;
    }

    fn push_shadow(&mut self) {
        self.stack.push(self.get().clone());
    }

    fn pop_shadow(&mut self) {
        if self.stack.len() > 1 {
            self.stack.pop();
        }
    }
}

/// Evaluation-context snapshot handed to primitives
#[derive(Debug, Clone, Copy)]
pub struct Ctx {
    pub io: i64,
    pub ct: f64,
    pub pp: usize,
    pub pw: usize,
    pub fc: [char; 6],
    pub ps: i64,
}

impl Default for Ctx {
    fn default() -> Self {
        Ctx {
            io: 1,
            ct: DEFAULT_CT,
            pp: 10,
            pw: 80,
            fc: DEFAULT_FC,
            ps: 0,
        }
    }
}

pub const DEFAULT_CT: f64 = 1e-13;
pub const DEFAULT_FC: [char; 6] = ['.', ',', '⋆', '0', '_', '¯'];

#[derive(Debug)]
pub struct SystemVariables {
    io: Shadowed<i64>,
    ct: Shadowed<f64>,
    pp: Shadowed<usize>,
    pw: Shadowed<usize>,
    fc: Shadowed<[char; 6]>,
    ps: Shadowed<i64>,
    tz: Shadowed<i64>,
    lx: Shadowed<String>,
    rl: Shadowed<u64>,
    rng: StdRng,
    session_start: Instant,
    /// Accumulated compute time in milliseconds (⎕AI)
    pub compute_ms: u64,
}

impl Default for SystemVariables {
    fn default() -> Self {
        SystemVariables::new()
    }
}

impl SystemVariables {
    pub fn new() -> Self {
        let seed = 16807;
        SystemVariables {
            io: Shadowed::new(1),
            ct: Shadowed::new(DEFAULT_CT),
            pp: Shadowed::new(10),
            pw: Shadowed::new(80),
            fc: Shadowed::new(DEFAULT_FC),
            ps: Shadowed::new(0),
            tz: Shadowed::new(0),
            lx: Shadowed::new(String::new()),
            rl: Shadowed::new(seed),
            rng: StdRng::seed_from_u64(seed),
            session_start: Instant::now(),
            compute_ms: 0,
        }
    }

    /// Snapshot for primitives
    pub fn ctx(&self) -> Ctx {
        Ctx {
            io: *self.io.get(),
            ct: *self.ct.get(),
            pp: *self.pp.get(),
            pw: *self.pw.get(),
            fc: *self.fc.get(),
            ps: *self.ps.get(),
        }
    }

    pub fn io(&self) -> i64 {
        *self.io.get()
    }

    pub fn ct(&self) -> f64 {
        *self.ct.get()
    }

    pub fn pp(&self) -> usize {
        *self.pp.get()
    }

    pub fn pw(&self) -> usize {
        *self.pw.get()
    }

    pub fn lx(&self) -> String {
        self.lx.get().clone()
    }

    /// Roll a random number below `n` (⎕IO-independent); advances ⎕RL
    pub fn roll(&mut self, n: i64) -> i64 {
        self.rl.set(self.rng.next_u64());
        self.rng.gen_range(0..n)
    }

    /// Read a variable as a value. ⎕RL reads advance the link.
    pub fn get(&mut self, name: QuadName) -> Result<Value, ErrorKind> {
        match name {
            QuadName::Io => Ok(Value::int_scalar(*self.io.get())),
            QuadName::Ct => Ok(Value::scalar(Cell::Float(*self.ct.get()))),
            QuadName::Pp => Ok(Value::int_scalar(*self.pp.get() as i64)),
            QuadName::Pw => Ok(Value::int_scalar(*self.pw.get() as i64)),
            QuadName::Ps => Ok(Value::int_scalar(*self.ps.get())),
            QuadName::Tz => Ok(Value::int_scalar(*self.tz.get())),
            QuadName::Fc => {
                let s: String = self.fc.get().iter().collect();
                Ok(Value::char_vector(&s))
            }
            QuadName::Lx => Ok(Value::char_vector(self.lx.get())),
            QuadName::Rl => {
                let link = *self.rl.get();
                self.rl.set(self.rng.next_u64());
                Ok(Value::int_scalar((link & 0x7FFF_FFFF_FFFF_FFFF) as i64))
            }
            QuadName::Ai => {
                let session_ms = self.session_start.elapsed().as_millis() as i64;
                Ok(Value::int_vector(&[
                    1001,
                    self.compute_ms as i64,
                    session_ms,
                    session_ms - self.compute_ms as i64,
                ]))
            }
            _ => Err(ErrorKind::Value),
        }
    }

    /// Assign a variable, validating its domain
    pub fn set(&mut self, name: QuadName, v: &Value) -> Result<(), ErrorKind> {
        let ct = *self.ct.get();
        match name {
            QuadName::Io => {
                let n = v.to_int_scalar(ct)?;
                if n != 0 && n != 1 {
                    return Err(ErrorKind::Domain);
                }
                self.io.set(n);
            }
            QuadName::Ct => {
                let x = v.to_real_scalar(ct)?;
                if !(0.0..1.0).contains(&x) {
                    return Err(ErrorKind::Domain);
                }
                self.ct.set(x);
            }
            QuadName::Pp => {
                let n = v.to_int_scalar(ct)?;
                if !(1..=34).contains(&n) {
                    return Err(ErrorKind::Domain);
                }
                self.pp.set(n as usize);
            }
            QuadName::Pw => {
                let n = v.to_int_scalar(ct)?;
                if n < 30 {
                    return Err(ErrorKind::Domain);
                }
                self.pw.set(n as usize);
            }
            QuadName::Ps => {
                let n = v.to_int_scalar(ct)?;
                if !(0..=4).contains(&n) {
                    return Err(ErrorKind::Domain);
                }
                self.ps.set(n);
            }
            QuadName::Tz => {
                let n = v.to_int_scalar(ct)?;
                if !(-12..=14).contains(&n) {
                    return Err(ErrorKind::Domain);
                }
                self.tz.set(n);
            }
            QuadName::Fc => {
                let s = v.as_string().map_err(|_| ErrorKind::Domain)?;
                let chars: Vec<char> = s.chars().collect();
                if chars.len() != 6 {
                    return Err(ErrorKind::Length);
                }
                let mut fc = [' '; 6];
                fc.copy_from_slice(&chars);
                self.fc.set(fc);
            }
            QuadName::Lx => {
                let s = v.as_string().map_err(|_| ErrorKind::Domain)?;
                self.lx.set(s);
            }
            QuadName::Rl => {
                let n = v.to_int_scalar(ct)?;
                if n < 0 {
                    return Err(ErrorKind::Domain);
                }
                self.rl.set(n as u64);
                self.rng = StdRng::seed_from_u64(n as u64);
            }
            QuadName::Ai => return Err(ErrorKind::Domain), // read-only
            _ => return Err(ErrorKind::Value),
        }
        Ok(())
    }

    /// Shadow a localised system variable on function entry
    pub fn push_shadow(&mut self, name: QuadName) {
        match name {
            QuadName::Io => self.io.push_shadow(),
            QuadName::Ct => self.ct.push_shadow(),
            QuadName::Pp => self.pp.push_shadow(),
            QuadName::Pw => self.pw.push_shadow(),
            QuadName::Ps => self.ps.push_shadow(),
            QuadName::Tz => self.tz.push_shadow(),
            QuadName::Fc => self.fc.push_shadow(),
            QuadName::Lx => self.lx.push_shadow(),
            QuadName::Rl => self.rl.push_shadow(),
            _ => {}
        }
    }

    pub fn pop_shadow(&mut self, name: QuadName) {
        match name {
            QuadName::Io => self.io.pop_shadow(),
            QuadName::Ct => self.ct.pop_shadow(),
            QuadName::Pp => self.pp.pop_shadow(),
            QuadName::Pw => self.pw.pop_shadow(),
            QuadName::Ps => self.ps.pop_shadow(),
            QuadName::Tz => self.tz.pop_shadow(),
            QuadName::Fc => self.fc.pop_shadow(),
            QuadName::Lx => self.lx.pop_shadow(),
            QuadName::Rl => self.rl.pop_shadow(),
            _ => {}
        }
    }
}
