//! End-of-context continuations
//!
//! When an operator's operand is a user-defined function, the operator
//! cannot loop synchronously: each application pushes a new frame on the
//! state indicator. The operator instead registers a continuation record
//! carrying its traversal state (ravel position, partial accumulator, axis
//! parameters). The driver pushes the callee frame; when the callee
//! returns, the continuation is resumed with the result and either issues
//! the next call or finishes and hands the completed value up. Handlers
//! chain: nested operators each park their own record, resumed LIFO.
//!
//! Dropping a handler (interrupt unwinding) releases its in-flight values
//! through ordinary ownership.

use crate::eval::FunSlot;
use crate::oper::{cell_to_value, value_to_cell};
use crate::sysvar::Ctx;
use apl_core::{Cell, ErrorKind, Shape, Shape3, Value};
use apl_parser::Tok;

/// What a continuation wants next
pub enum EocStep {
    /// Apply the function to these operands
    Call {
        fun: FunSlot,
        left: Option<Value>,
        right: Value,
    },
    /// Evaluate a token statement (index slots)
    Eval(Vec<Tok>),
    /// The operator's value is complete
    Done(Value),
    /// An index collection is complete
    DoneIndex(Vec<Option<Value>>),
}

pub enum EocHandler {
    Reduce(ReduceEoc),
    Scan(ScanEoc),
    EachMon(EachMonEoc),
    EachDya(EachDyaEoc),
    Outer(OuterEoc),
    Inner(InnerEoc),
    Power(PowerEoc),
    PowerUntil(PowerUntilEoc),
    RankMon(RankMonEoc),
    RankDya(RankDyaEoc),
    IndexCollect(IndexCollectEoc),
}

impl EocHandler {
    pub fn resume(&mut self, result: Value, ctx: &Ctx) -> Result<EocStep, ErrorKind> {
        match self {
            EocHandler::Reduce(h) => h.resume(result),
            EocHandler::Scan(h) => h.resume(result),
            EocHandler::EachMon(h) => h.resume(result),
            EocHandler::EachDya(h) => h.resume(result),
            EocHandler::Outer(h) => h.resume(result),
            EocHandler::Inner(h) => h.resume(result),
            EocHandler::Power(h) => h.resume(result),
            EocHandler::PowerUntil(h) => h.resume(result, ctx),
            EocHandler::RankMon(h) => h.resume(result, ctx),
            EocHandler::RankDya(h) => h.resume(result, ctx),
            EocHandler::IndexCollect(h) => h.resume(result),
        }
    }
}

// ----------------------------------------------------------------------
// reduce
// ----------------------------------------------------------------------

/// F/[X]B with a user-defined F: one slot (h,l) at a time, folding the
/// axis right-associatively
pub struct ReduceEoc {
    fun: FunSlot,
    b: Value,
    s3: Shape3,
    zshape: Shape,
    slot: usize,
    /// Next axis position to fold into the accumulator (downwards)
    k: usize,
    acc: Option<Value>,
    zcells: Vec<Cell>,
}

impl ReduceEoc {
    /// Build the handler; the caller has already handled the empty and
    /// length-1 axis cases synchronously
    pub fn start(fun: FunSlot, b: Value, axis: usize) -> (Self, EocStep) {
        let s3 = Shape3::new(b.shape(), axis);
        let zshape = b.shape().remove_axis(axis);
        let mut h = ReduceEoc {
            fun,
            b,
            s3,
            zshape,
            slot: 0,
            k: s3.m - 1,
            acc: None,
            zcells: Vec::new(),
        };
        let step = h.next_step();
        (h, step)
    }

    fn slot_hl(&self) -> (usize, usize) {
        (self.slot / self.s3.l.max(1), self.slot % self.s3.l.max(1))
    }

    fn next_step(&mut self) -> EocStep {
        let (h, l) = self.slot_hl();
        match &self.acc {
            None => {
                // seed with the last element of the axis
                self.acc = Some(cell_to_value(self.b.cell(self.s3.offset(
                    h,
                    self.s3.m - 1,
                    l,
                ))));
                self.k = self.s3.m - 1;
                self.next_step()
            }
            Some(acc) => {
                if self.k == 0 {
                    // slot finished
                    self.zcells.push(value_to_cell(acc.clone()));
                    self.slot += 1;
                    self.acc = None;
                    if self.slot >= self.s3.h * self.s3.l {
                        let cells = std::mem::take(&mut self.zcells);
                        let z = Value::new(self.zshape.clone(), cells)
                            .unwrap_or_else(|_| Value::empty_numeric());
                        return EocStep::Done(z);
                    }
                    return self.next_step();
                }
                self.k -= 1;
                let (h, l) = self.slot_hl();
                let left = cell_to_value(self.b.cell(self.s3.offset(h, self.k, l)));
                EocStep::Call {
                    fun: self.fun.clone(),
                    left: Some(left),
                    right: acc.clone(),
                }
            }
        }
    }

    fn resume(&mut self, result: Value) -> Result<EocStep, ErrorKind> {
        self.acc = Some(result);
        Ok(self.next_step())
    }
}

// ----------------------------------------------------------------------
// scan
// ----------------------------------------------------------------------

/// F\[X]B with a user-defined F: every prefix reduced right-to-left
pub struct ScanEoc {
    fun: FunSlot,
    b: Value,
    s3: Shape3,
    slot: usize,
    m: usize,
    k: usize,
    acc: Option<Value>,
    zcells: Vec<Cell>,
}

impl ScanEoc {
    pub fn start(fun: FunSlot, b: Value, axis: usize) -> (Self, EocStep) {
        let s3 = Shape3::new(b.shape(), axis);
        let mut h = ScanEoc {
            fun,
            b,
            s3,
            slot: 0,
            m: 0,
            k: 0,
            acc: None,
            zcells: vec![Cell::Int(0); s3.volume()],
        };
        let step = h.next_step();
        (h, step)
    }

    fn slot_hl(&self) -> (usize, usize) {
        (self.slot / self.s3.l.max(1), self.slot % self.s3.l.max(1))
    }

    fn next_step(&mut self) -> EocStep {
        loop {
            if self.slot >= self.s3.h * self.s3.l {
                let cells = std::mem::take(&mut self.zcells);
                let shape = self.b.shape().clone();
                let z = Value::new(shape, cells).unwrap_or_else(|_| Value::empty_numeric());
                return EocStep::Done(z);
            }
            let (h, l) = self.slot_hl();
            match &self.acc {
                None => {
                    // seed the prefix ending at m
                    self.acc = Some(cell_to_value(self.b.cell(self.s3.offset(h, self.m, l))));
                    self.k = self.m;
                    continue;
                }
                Some(acc) => {
                    if self.k == 0 {
                        self.zcells[self.s3.offset(h, self.m, l)] = value_to_cell(acc.clone());
                        self.acc = None;
                        self.m += 1;
                        if self.m >= self.s3.m {
                            self.m = 0;
                            self.slot += 1;
                        }
                        continue;
                    }
                    self.k -= 1;
                    let left = cell_to_value(self.b.cell(self.s3.offset(h, self.k, l)));
                    return EocStep::Call {
                        fun: self.fun.clone(),
                        left: Some(left),
                        right: acc.clone(),
                    };
                }
            }
        }
    }

    fn resume(&mut self, result: Value) -> Result<EocStep, ErrorKind> {
        self.acc = Some(result);
        Ok(self.next_step())
    }
}

// ----------------------------------------------------------------------
// each
// ----------------------------------------------------------------------

pub struct EachMonEoc {
    fun: FunSlot,
    b: Value,
    i: usize,
    zcells: Vec<Cell>,
}

impl EachMonEoc {
    pub fn start(fun: FunSlot, b: Value) -> (Self, EocStep) {
        let first = cell_to_value(b.cell(0));
        let h = EachMonEoc {
            fun: fun.clone(),
            b,
            i: 0,
            zcells: Vec::new(),
        };
        let step = EocStep::Call {
            fun,
            left: None,
            right: first,
        };
        (h, step)
    }

    fn resume(&mut self, result: Value) -> Result<EocStep, ErrorKind> {
        self.zcells.push(value_to_cell(result));
        self.i += 1;
        if self.i >= self.b.element_count() {
            let cells = std::mem::take(&mut self.zcells);
            let z = Value::new(self.b.shape().clone(), cells)?;
            return Ok(EocStep::Done(z));
        }
        Ok(EocStep::Call {
            fun: self.fun.clone(),
            left: None,
            right: cell_to_value(self.b.cell(self.i)),
        })
    }
}

pub struct EachDyaEoc {
    fun: FunSlot,
    a: Value,
    b: Value,
    zshape: Shape,
    fix_a: bool,
    fix_b: bool,
    i: usize,
    zcells: Vec<Cell>,
}

impl EachDyaEoc {
    pub fn start(fun: FunSlot, a: Value, b: Value) -> Result<(Self, EocStep), ErrorKind> {
        let (zshape, fix_a, fix_b) = if a.is_single() && !b.is_single() {
            (b.shape().clone(), true, false)
        } else if b.is_single() && !a.is_single() {
            (a.shape().clone(), false, true)
        } else if a.shape() == b.shape() {
            (a.shape().clone(), false, false)
        } else if a.rank() != b.rank() {
            return Err(ErrorKind::Rank);
        } else {
            return Err(ErrorKind::Length);
        };
        let h = EachDyaEoc {
            fun: fun.clone(),
            a,
            b,
            zshape,
            fix_a,
            fix_b,
            i: 0,
            zcells: Vec::new(),
        };
        let step = h.call_at(0);
        Ok((h, step))
    }

    fn call_at(&self, i: usize) -> EocStep {
        let ca = cell_to_value(if self.fix_a {
            self.a.first()
        } else {
            self.a.cell(i)
        });
        let cb = cell_to_value(if self.fix_b {
            self.b.first()
        } else {
            self.b.cell(i)
        });
        EocStep::Call {
            fun: self.fun.clone(),
            left: Some(ca),
            right: cb,
        }
    }

    fn resume(&mut self, result: Value) -> Result<EocStep, ErrorKind> {
        self.zcells.push(value_to_cell(result));
        self.i += 1;
        if self.i >= self.zshape.element_count() {
            let cells = std::mem::take(&mut self.zcells);
            let z = Value::new(self.zshape.clone(), cells)?;
            return Ok(EocStep::Done(z));
        }
        Ok(self.call_at(self.i))
    }
}

// ----------------------------------------------------------------------
// outer and inner product
// ----------------------------------------------------------------------

pub struct OuterEoc {
    fun: FunSlot,
    a: Value,
    b: Value,
    i: usize,
    zcells: Vec<Cell>,
}

impl OuterEoc {
    pub fn start(fun: FunSlot, a: Value, b: Value) -> (Self, EocStep) {
        let first = EocStep::Call {
            fun: fun.clone(),
            left: Some(cell_to_value(a.cell(0))),
            right: cell_to_value(b.cell(0)),
        };
        (
            OuterEoc {
                fun,
                a,
                b,
                i: 0,
                zcells: Vec::new(),
            },
            first,
        )
    }

    fn resume(&mut self, result: Value) -> Result<EocStep, ErrorKind> {
        self.zcells.push(value_to_cell(result));
        self.i += 1;
        let bn = self.b.element_count();
        if self.i >= self.a.element_count() * bn {
            let zshape = self.a.shape().catenated(self.b.shape())?;
            let cells = std::mem::take(&mut self.zcells);
            return Ok(EocStep::Done(Value::new(zshape, cells)?));
        }
        Ok(EocStep::Call {
            fun: self.fun.clone(),
            left: Some(cell_to_value(self.a.cell(self.i / bn))),
            right: cell_to_value(self.b.cell(self.i % bn)),
        })
    }
}

/// A F.G B: per result slot, first the G products across the shared axis
/// (right to left), then the F folds
pub struct InnerEoc {
    f: FunSlot,
    g: FunSlot,
    a: Value,
    b: Value,
    m: usize,
    shared: usize,
    rows: usize,
    cols: usize,
    slot: usize,
    k: usize,
    /// Accumulator of the F fold; None while the first G product is pending
    acc: Option<Value>,
    /// Pending G product awaiting the F fold
    in_f: bool,
    zcells: Vec<Cell>,
}

impl InnerEoc {
    pub fn start(
        f: FunSlot,
        g: FunSlot,
        a: Value,
        b: Value,
    ) -> Result<(Self, EocStep), ErrorKind> {
        let m = if a.rank() == 0 {
            1
        } else {
            *a.shape().items().last().expect("rank ≥ 1")
        };
        let n = if b.rank() == 0 { 1 } else { b.shape()[0] };
        if m != n && m != 1 && n != 1 {
            return Err(ErrorKind::Length);
        }
        let shared = m.max(n);
        let rows = a.element_count() / m.max(1);
        let cols = b.element_count() / n.max(1);
        let mut h = InnerEoc {
            f,
            g,
            a,
            b,
            m,
            shared,
            rows,
            cols,
            slot: 0,
            k: shared - 1,
            acc: None,
            in_f: false,
            zcells: Vec::new(),
        };
        let step = h.g_call();
        Ok((h, step))
    }

    fn g_call(&self) -> EocStep {
        let i = self.slot / self.cols.max(1);
        let j = self.slot % self.cols.max(1);
        let bn = self.b.element_count();
        let ak = if self.m == 1 { i } else { i * self.m + self.k };
        let bk = if bn / self.cols.max(1) == 1 {
            j
        } else {
            self.k * self.cols.max(1) + j
        };
        EocStep::Call {
            fun: self.g.clone(),
            left: Some(cell_to_value(self.a.cell(ak))),
            right: cell_to_value(self.b.cell(bk)),
        }
    }

    fn resume(&mut self, result: Value) -> Result<EocStep, ErrorKind> {
        if self.in_f {
            // result of an F fold
            self.acc = Some(result);
            self.in_f = false;
            return Ok(self.advance());
        }
        // result of a G product
        match self.acc.take() {
            None => {
                self.acc = Some(result);
                Ok(self.advance())
            }
            Some(acc) => {
                self.in_f = true;
                Ok(EocStep::Call {
                    fun: self.f.clone(),
                    left: Some(result),
                    right: acc,
                })
            }
        }
    }

    fn advance(&mut self) -> EocStep {
        if self.k == 0 {
            // slot complete
            let acc = self.acc.take().expect("fold finished");
            self.zcells.push(value_to_cell(acc));
            self.slot += 1;
            self.k = self.shared - 1;
            if self.slot >= self.rows * self.cols {
                let zshape_a = if self.a.rank() == 0 {
                    Shape::scalar()
                } else {
                    Shape::new(self.a.shape().items()[..self.a.rank() - 1].to_vec())
                        .expect("rank decreases")
                };
                let zshape_b = if self.b.rank() == 0 {
                    Shape::scalar()
                } else {
                    Shape::new(self.b.shape().items()[1..].to_vec()).expect("rank decreases")
                };
                let zshape = zshape_a
                    .catenated(&zshape_b)
                    .unwrap_or_else(|_| Shape::vector(self.zcells.len()));
                let cells = std::mem::take(&mut self.zcells);
                return match Value::new(zshape, cells) {
                    Ok(z) => EocStep::Done(z),
                    Err(_) => EocStep::Done(Value::empty_numeric()),
                };
            }
            return self.g_call();
        }
        self.k -= 1;
        self.g_call()
    }
}

// ----------------------------------------------------------------------
// power
// ----------------------------------------------------------------------

pub struct PowerEoc {
    fun: FunSlot,
    left: Option<Value>,
    remaining: u64,
}

impl PowerEoc {
    pub fn start(fun: FunSlot, left: Option<Value>, n: u64, b: Value) -> (Self, EocStep) {
        let h = PowerEoc {
            fun: fun.clone(),
            left: left.clone(),
            remaining: n,
        };
        let step = if n == 0 {
            EocStep::Done(b)
        } else {
            EocStep::Call {
                fun,
                left,
                right: b,
            }
        };
        (h, step)
    }

    fn resume(&mut self, result: Value) -> Result<EocStep, ErrorKind> {
        self.remaining -= 1;
        if self.remaining == 0 {
            return Ok(EocStep::Done(result));
        }
        Ok(EocStep::Call {
            fun: self.fun.clone(),
            left: self.left.clone(),
            right: result,
        })
    }
}

/// F⍣G: alternates F applications with G condition checks on (new, old)
pub struct PowerUntilEoc {
    f: FunSlot,
    g: FunSlot,
    left: Option<Value>,
    old: Value,
    new: Option<Value>,
}

impl PowerUntilEoc {
    pub fn start(f: FunSlot, g: FunSlot, left: Option<Value>, b: Value) -> (Self, EocStep) {
        let step = EocStep::Call {
            fun: f.clone(),
            left: left.clone(),
            right: b.clone(),
        };
        (
            PowerUntilEoc {
                f,
                g,
                left,
                old: b,
                new: None,
            },
            step,
        )
    }

    fn resume(&mut self, result: Value, ctx: &Ctx) -> Result<EocStep, ErrorKind> {
        match self.new.take() {
            None => {
                // result of F: now ask G(new, old)
                self.new = Some(result.clone());
                Ok(EocStep::Call {
                    fun: self.g.clone(),
                    left: Some(result),
                    right: self.old.clone(),
                })
            }
            Some(new) => {
                // result of G
                let flag = result
                    .to_int_scalar(ctx.ct)
                    .map_err(|_| ErrorKind::Domain)?;
                if flag == 1 {
                    return Ok(EocStep::Done(new));
                }
                if flag != 0 {
                    return Err(ErrorKind::Domain);
                }
                self.old = new.clone();
                Ok(EocStep::Call {
                    fun: self.f.clone(),
                    left: self.left.clone(),
                    right: new,
                })
            }
        }
    }
}

// ----------------------------------------------------------------------
// rank
// ----------------------------------------------------------------------

pub struct RankMonEoc {
    fun: FunSlot,
    chunks: Vec<Value>,
    frame: Shape,
    i: usize,
    results: Vec<Value>,
}

impl RankMonEoc {
    pub fn start(fun: FunSlot, frame: Shape, chunks: Vec<Value>) -> (Self, EocStep) {
        let first = chunks[0].clone();
        (
            RankMonEoc {
                fun: fun.clone(),
                chunks,
                frame,
                i: 0,
                results: Vec::new(),
            },
            EocStep::Call {
                fun,
                left: None,
                right: first,
            },
        )
    }

    fn resume(&mut self, result: Value, ctx: &Ctx) -> Result<EocStep, ErrorKind> {
        self.results.push(result);
        self.i += 1;
        if self.i >= self.chunks.len() {
            let results = std::mem::take(&mut self.results);
            let z = crate::oper::rank::assemble_frames(self.frame.clone(), results, ctx)?;
            return Ok(EocStep::Done(z));
        }
        Ok(EocStep::Call {
            fun: self.fun.clone(),
            left: None,
            right: self.chunks[self.i].clone(),
        })
    }
}

pub struct RankDyaEoc {
    fun: FunSlot,
    pairs: Vec<(Value, Value)>,
    frame: Shape,
    i: usize,
    results: Vec<Value>,
}

impl RankDyaEoc {
    pub fn start(fun: FunSlot, frame: Shape, pairs: Vec<(Value, Value)>) -> (Self, EocStep) {
        let (a0, b0) = pairs[0].clone();
        (
            RankDyaEoc {
                fun: fun.clone(),
                pairs,
                frame,
                i: 0,
                results: Vec::new(),
            },
            EocStep::Call {
                fun,
                left: Some(a0),
                right: b0,
            },
        )
    }

    fn resume(&mut self, result: Value, ctx: &Ctx) -> Result<EocStep, ErrorKind> {
        self.results.push(result);
        self.i += 1;
        if self.i >= self.pairs.len() {
            let results = std::mem::take(&mut self.results);
            let z = crate::oper::rank::assemble_frames(self.frame.clone(), results, ctx)?;
            return Ok(EocStep::Done(z));
        }
        let (a, b) = self.pairs[self.i].clone();
        Ok(EocStep::Call {
            fun: self.fun.clone(),
            left: Some(a),
            right: b,
        })
    }
}

// ----------------------------------------------------------------------
// bracket index collection
// ----------------------------------------------------------------------

/// Evaluates the slot expressions of `[i1;…;ik]` right to left, then
/// hands the collected index list back to the prefix parser
pub struct IndexCollectEoc {
    /// Slots not yet evaluated, in evaluation order (rightmost first);
    /// None marks an elided slot
    pending: Vec<Option<Vec<Tok>>>,
    /// Collected values, rightmost first
    collected: Vec<Option<Value>>,
}

impl IndexCollectEoc {
    /// `slots` in source order; returns None if there is nothing to
    /// evaluate (all slots elided). Popping from the back walks the
    /// slots rightmost-first, matching right-to-left evaluation.
    pub fn start(slots: Vec<Option<Vec<Tok>>>) -> (Self, Option<EocStep>) {
        let mut h = IndexCollectEoc {
            pending: slots,
            collected: Vec::new(),
        };
        let step = h.next_eval();
        (h, step)
    }

    fn next_eval(&mut self) -> Option<EocStep> {
        while let Some(slot) = self.pending.pop() {
            match slot {
                None => self.collected.push(None),
                Some(toks) => return Some(EocStep::Eval(toks)),
            }
        }
        None
    }

    pub fn finish(&mut self) -> Vec<Option<Value>> {
        // collected holds rightmost-first; restore source order
        let mut out = std::mem::take(&mut self.collected);
        out.reverse();
        out
    }

    fn resume(&mut self, result: Value) -> Result<EocStep, ErrorKind> {
        self.collected.push(Some(result));
        match self.next_eval() {
            Some(step) => Ok(step),
            None => Ok(EocStep::DoneIndex(self.finish())),
        }
    }
}
