//! Execution: the runtime prefix parser and the state indicator
//!
//! Statements execute by a right-to-left scan that shifts tokens onto a
//! per-frame lookahead stack and reduces when a reducible pattern appears
//! (`F B`, `A F B`, `V ← value`, …). The lookahead stack is part of the
//! frame, so a user-defined function call is a pure suspension: push a
//! callee frame, and on return feed the result back into the caller's
//! lookahead (or into its EOC chain when an operator is mid-flight).
//!
//! The driver is a single loop over the state-indicator stack; errors
//! travel as `Result` values and either get caught by a ⎕EA/⎕EC frame or
//! promote the top frame to Error state, where it stays for )SI.

use crate::eoc::{
    EachDyaEoc, EachMonEoc, EocHandler, EocStep, IndexCollectEoc, InnerEoc, OuterEoc,
    PowerEoc, PowerUntilEoc, RankDyaEoc, RankMonEoc, ReduceEoc, ScanEoc,
};
use crate::function::{Adicity, UserFunction};
use crate::native::NativeFunction;
use crate::oper;
use crate::parallel::ParallelConfig;
use crate::prim::{self, format, nested, scalar, structural};
use crate::symbol::{Binding, SymbolId};
use crate::sysvar::Ctx;
use crate::workspace::Workspace;
use apl_core::{AplError, Cell, ErrorKind, Result, Value};
use apl_parser::{QuadName, Tok, TokenTag, parse_line};
use std::sync::Arc;

// ----------------------------------------------------------------------
// function slots
// ----------------------------------------------------------------------

/// Anything the prefix parser can apply
#[derive(Debug, Clone)]
pub enum FunSlot {
    Prim(char),
    Quad(QuadName),
    Defined(Arc<UserFunction>),
    Native(Arc<dyn NativeFunction>),
    Derived(Arc<Derived>),
}

#[derive(Debug, Clone)]
pub enum Operand {
    Fun(FunSlot),
    Val(Value),
}

/// An operator applied to its operand(s)
#[derive(Debug, Clone)]
pub struct Derived {
    pub op: char,
    pub left: Option<Operand>,
    pub right: Option<Operand>,
    pub axis: Option<Value>,
}

/// True when the whole operand tree can be applied without pushing frames
fn is_pure(slot: &FunSlot) -> bool {
    match slot {
        FunSlot::Prim(c) => *c != '?' && *c != '⍎',
        FunSlot::Native(_) => true,
        FunSlot::Quad(_) | FunSlot::Defined(_) => false,
        FunSlot::Derived(d) => {
            let lp = match &d.left {
                Some(Operand::Fun(f)) => is_pure(f),
                _ => true,
            };
            let rp = match &d.right {
                Some(Operand::Fun(f)) => is_pure(f),
                _ => true,
            };
            lp && rp
        }
    }
}

// ----------------------------------------------------------------------
// lookahead items
// ----------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Item {
    Val {
        v: Value,
        assigned: bool,
        strand: bool,
    },
    Fun {
        slot: FunSlot,
        axis: Option<Value>,
    },
    /// Monadic operator glyph awaiting its (left) operand
    Op {
        glyph: char,
        axis: Option<Value>,
    },
    /// `. G` seen, awaiting F (inner product) or ∘ (outer product)
    DotOp(FunSlot),
    /// ⍣/⍤ with its right operand captured, awaiting the function
    OpRight {
        glyph: char,
        operand: Operand,
    },
    /// `)` boundary
    RMark,
    Assign,
    BranchMark,
    LSymb(String),
    LSymb2(Vec<String>),
    QuadTarget(QuadName),
    Index(Vec<Option<Value>>),
}

fn val_item(v: Value) -> Item {
    Item::Val {
        v,
        assigned: false,
        strand: false,
    }
}

/// What the token just left of the scan position will become
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextClass {
    ValueLike,
    FunLike,
    /// ⍣ or ⍤: the item at the top may be its right operand
    OpDyaVal,
    /// `.`
    Dot,
    Other,
    End,
}

// ----------------------------------------------------------------------
// frames
// ----------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Running,
    Suspended,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deliver {
    /// Top-level: print non-assigned statement values
    Display,
    /// Push the result into the parent frame's lookahead
    ToItem,
    /// Resume the parent frame's EOC chain
    ToEoc,
}

#[derive(Debug, Clone)]
enum Catch {
    /// 'alt' ⎕EA 'text': on error evaluate alt instead
    Ea(String),
    /// ⎕EC 'text': always complete with (rc, ⎕ET, value)
    Ec,
}

enum FrameKind {
    Immediate,
    Defined {
        fun: Arc<UserFunction>,
        shadowed: Vec<SymbolId>,
        quad_shadowed: Vec<QuadName>,
        result_sym: Option<SymbolId>,
    },
}

pub struct Frame {
    kind: FrameKind,
    /// Current line (defined functions start at 1)
    line: usize,
    stmt_ix: usize,
    statements: Vec<Vec<Tok>>,
    toks: Vec<Tok>,
    /// Tokens not yet consumed; the next token is `toks[tpos - 1]`
    tpos: usize,
    in_stmt: bool,
    items: Vec<Item>,
    eoc: Vec<EocHandler>,
    pub state: FrameState,
    deliver: Deliver,
    catch: Option<Catch>,
    result: Option<Value>,
    line_text: String,
    /// A `(` was reached while a callee was in flight; close it on resume
    pending_close: bool,
    /// Items parked above an in-flight call: delivered values insert
    /// beneath this many top items
    hold_on_top: usize,
}

impl Frame {
    fn immediate(
        statements: Vec<Vec<Tok>>,
        deliver: Deliver,
        catch: Option<Catch>,
        line_text: String,
    ) -> Frame {
        Frame {
            kind: FrameKind::Immediate,
            line: 0,
            stmt_ix: 0,
            statements,
            toks: Vec::new(),
            tpos: 0,
            in_stmt: false,
            items: Vec::new(),
            eoc: Vec::new(),
            state: FrameState::Running,
            deliver,
            catch,
            result: None,
            line_text,
            pending_close: false,
            hold_on_top: 0,
        }
    }

    pub fn describe(&self) -> String {
        match &self.kind {
            FrameKind::Immediate => "⋆".to_string(),
            FrameKind::Defined { fun, .. } => {
                let marker = match self.state {
                    FrameState::Error => " ⍫",
                    FrameState::Suspended => " ⍫",
                    FrameState::Running => "",
                };
                format!("{}[{}]{}", fun.name(), self.line, marker)
            }
        }
    }
}

/// The outcome of one completed statement
enum Outcome {
    None,
    Value { v: Value, assigned: bool },
    Branch(Value),
    Escape,
}

// ----------------------------------------------------------------------
// pure application (no interpreter state needed)
// ----------------------------------------------------------------------

#[derive(Clone)]
struct PureCtx {
    ctx: Ctx,
    par: ParallelConfig,
}

fn kerr(k: ErrorKind) -> AplError {
    AplError::new(k)
}

/// Monadic application of a pure slot
fn pure_mon(pc: &PureCtx, slot: &FunSlot, axis: Option<&Value>, b: &Value) -> Result<Value> {
    match slot {
        FunSlot::Prim(c) => prim_mon(pc, *c, axis, b),
        FunSlot::Native(p) => match axis {
            Some(x) => p.eval_xb(x, b, &pc.ctx).map_err(kerr),
            None => p.eval_b(b, &pc.ctx).map_err(kerr),
        },
        FunSlot::Derived(d) => derived_mon(pc, d, b),
        _ => Err(kerr(ErrorKind::Syntax)),
    }
}

/// Dyadic application of a pure slot
fn pure_dya(
    pc: &PureCtx,
    slot: &FunSlot,
    axis: Option<&Value>,
    a: &Value,
    b: &Value,
) -> Result<Value> {
    match slot {
        FunSlot::Prim(c) => prim_dya(pc, *c, axis, a, b),
        FunSlot::Native(p) => match axis {
            Some(x) => p.eval_axb(a, x, b, &pc.ctx).map_err(kerr),
            None => p.eval_ab(a, b, &pc.ctx).map_err(kerr),
        },
        FunSlot::Derived(d) => derived_dya(pc, d, a, b),
        _ => Err(kerr(ErrorKind::Syntax)),
    }
}

/// Axis resolved against a value's rank, or a default
fn axis_or(pc: &PureCtx, axis: Option<&Value>, rank: usize, default: usize) -> Result<usize> {
    match axis {
        Some(x) => prim::resolve_axis(x, rank.max(1), &pc.ctx).map_err(kerr),
        None => Ok(default),
    }
}

/// The primitive dispatch: monadic
fn prim_mon(pc: &PureCtx, c: char, axis: Option<&Value>, b: &Value) -> Result<Value> {
    let ctx = &pc.ctx;
    let par = &pc.par;
    let z = match c {
        '+' | '-' | '×' | '÷' | '|' | '⌈' | '⌊' | '⋆' | '⍟' | '!' | '○' | '~' => {
            scalar::eval_monadic(c, b, ctx, par)
        }
        '⍴' => Ok(structural::shape_of(b)),
        ',' => Ok(structural::ravel(b)),
        '⍪' => structural::table(b),
        '↑' => Ok(structural::first(b)),
        '⍳' => structural::iota(b, ctx),
        '∊' => Ok(structural::enlist(b)),
        '⍉' => structural::transpose_mon(b),
        '⌽' => {
            let ax = axis_or(pc, axis, b.rank(), b.rank().saturating_sub(1))?;
            structural::reverse(b, ax)
        }
        '⊖' => {
            let ax = axis_or(pc, axis, b.rank(), 0)?;
            structural::reverse(b, ax)
        }
        '⊂' => match axis {
            Some(x) => {
                let axes = prim::resolve_axis_set(x, b.rank(), ctx).map_err(kerr)?;
                nested::enclose_axes(b, &axes)
            }
            None => Ok(nested::enclose(b)),
        },
        '⊃' => nested::disclose(b, ctx),
        '⍋' => structural::grade(b, true, ctx),
        '⍒' => structural::grade(b, false, ctx),
        '⍕' => format::monadic_format(b, ctx),
        '⌷' => Ok(b.clone()),
        '⌹' => structural::matrix_inverse(b, ctx),
        '≡' => Ok(structural::depth(b)),
        '≢' => Ok(structural::tally(b)),
        '⊣' | '⊢' => Ok(b.clone()),
        '∪' => structural::unique(b, ctx),
        _ => Err(ErrorKind::Valence),
    };
    z.map_err(kerr)
}

/// The primitive dispatch: dyadic
fn prim_dya(pc: &PureCtx, c: char, axis: Option<&Value>, a: &Value, b: &Value) -> Result<Value> {
    let ctx = &pc.ctx;
    let par = &pc.par;
    let z = match c {
        _ if scalar::is_scalar_dyadic(c) => match axis {
            Some(x) => scalar::eval_dyadic_axis(c, a, x, b, ctx, par),
            None => scalar::eval_dyadic(c, a, b, ctx, par),
        },
        '⍴' => structural::reshape(a, b, ctx),
        ',' => structural::catenate(a, b, axis, false, ctx),
        '⍪' => structural::catenate(a, b, axis, true, ctx),
        '↑' => structural::take(a, b, ctx),
        '↓' => structural::drop(a, b, ctx),
        '⍳' => structural::index_of(a, b, ctx),
        '∊' => structural::membership(a, b, ctx),
        '⍉' => structural::transpose_dya(a, b, ctx),
        '⌽' => {
            let ax = axis_or(pc, axis, b.rank(), b.rank().saturating_sub(1))?;
            structural::rotate(a, b, ax, ctx)
        }
        '⊖' => {
            let ax = axis_or(pc, axis, b.rank(), 0)?;
            structural::rotate(a, b, ax, ctx)
        }
        '⊂' => nested::partition(a, b, ctx),
        '⊃' => nested::pick(a, b, ctx),
        '⌷' => structural::squad_index(a, b, ctx),
        '⊤' => structural::encode(a, b, ctx),
        '⊥' => structural::decode(a, b, ctx),
        '⌹' => structural::matrix_divide(a, b, ctx),
        '≡' => Ok(structural::match_values(a, b, ctx)),
        '≢' => Ok(structural::not_match(a, b, ctx)),
        '⊣' => Ok(a.clone()),
        '⊢' => Ok(b.clone()),
        '∪' => structural::union(a, b, ctx),
        '∩' => structural::intersection(a, b, ctx),
        '~' => structural::without(a, b, ctx),
        '⍕' => format::dyadic_format(a, b, ctx),
        _ => Err(ErrorKind::Valence),
    };
    z.map_err(kerr)
}

/// Monadic application of a derived function with pure operands
fn derived_mon(pc: &PureCtx, d: &Derived, b: &Value) -> Result<Value> {
    let ctx = pc.ctx;
    match d.op {
        '/' | '⌿' | '\\' | '⍀' => {
            let first_axis = d.op == '⌿' || d.op == '⍀';
            let default = if first_axis {
                0
            } else {
                b.rank().saturating_sub(1)
            };
            let axis = axis_or(pc, d.axis.as_ref(), b.rank(), default)?;
            match d.left.as_ref().ok_or_else(|| kerr(ErrorKind::Syntax))? {
                Operand::Val(counts) => {
                    if d.op == '/' || d.op == '⌿' {
                        oper::reduce::replicate(counts, b, axis, &ctx).map_err(kerr)
                    } else {
                        oper::scan::expand(counts, b, axis, &ctx).map_err(kerr)
                    }
                }
                Operand::Fun(f) => {
                    let ff = |x: &Value, y: &Value| {
                        pure_dya(pc, f, None, x, y).map_err(|e| e.kind)
                    };
                    if d.op == '/' || d.op == '⌿' {
                        let ident = slot_identity(f);
                        oper::reduce::reduce(&ff, ident.as_ref(), b, axis).map_err(kerr)
                    } else {
                        let assoc = matches!(f, FunSlot::Prim(p) if oper::scan::is_associative(*p));
                        oper::scan::scan(&ff, assoc, b, axis).map_err(kerr)
                    }
                }
            }
        }
        '¨' => {
            let f = operand_fun(d.left.as_ref())?;
            let ff = |x: &Value| pure_mon(pc, f, None, x).map_err(|e| e.kind);
            oper::each::each_mon(&ff, b).map_err(kerr)
        }
        '⍨' => {
            let f = operand_fun(d.left.as_ref())?;
            pure_dya(pc, f, None, b, b)
        }
        '⍣' => {
            let f = operand_fun(d.left.as_ref())?;
            match d.right.as_ref().ok_or_else(|| kerr(ErrorKind::Syntax))? {
                Operand::Val(n) => {
                    let count = n.to_int_scalar(ctx.ct).map_err(kerr)?;
                    if count < 0 {
                        return inverse_power(pc, f, None, count.unsigned_abs(), b);
                    }
                    let ff = |x: &Value| pure_mon(pc, f, None, x).map_err(|e| e.kind);
                    oper::power::power_n(&ff, count as u64, b).map_err(kerr)
                }
                Operand::Fun(g) => {
                    let ff = |x: &Value| pure_mon(pc, f, None, x).map_err(|e| e.kind);
                    let gg = |x: &Value, y: &Value| {
                        pure_dya(pc, g, None, x, y).map_err(|e| e.kind)
                    };
                    oper::power::power_until(&ff, &gg, b, ctx.ct).map_err(kerr)
                }
            }
        }
        '⍤' => {
            let f = operand_fun(d.left.as_ref())?;
            let y = operand_val(d.right.as_ref())?;
            let (mon_rank, _, _) = oper::rank::split_ranks(y, ctx.ct).map_err(kerr)?;
            let ff = |x: &Value| pure_mon(pc, f, None, x).map_err(|e| e.kind);
            oper::rank::rank_mon(&ff, mon_rank, b, &ctx).map_err(kerr)
        }
        _ => Err(kerr(ErrorKind::Valence)),
    }
}

/// Dyadic application of a derived function with pure operands
fn derived_dya(pc: &PureCtx, d: &Derived, a: &Value, b: &Value) -> Result<Value> {
    let ctx = pc.ctx;
    match d.op {
        '/' | '⌿' => {
            // n-wise reduce
            let f = operand_fun(d.left.as_ref())?;
            let default = if d.op == '⌿' {
                0
            } else {
                b.rank().saturating_sub(1)
            };
            let axis = axis_or(pc, d.axis.as_ref(), b.rank(), default)?;
            let n = a.to_int_scalar(ctx.ct).map_err(kerr)?;
            let ff = |x: &Value, y: &Value| pure_dya(pc, f, None, x, y).map_err(|e| e.kind);
            let ident = slot_identity(f);
            oper::reduce::nwise_reduce(&ff, ident.as_ref(), n, b, axis).map_err(kerr)
        }
        '¨' => {
            let f = operand_fun(d.left.as_ref())?;
            let ff = |x: &Value, y: &Value| pure_dya(pc, f, None, x, y).map_err(|e| e.kind);
            oper::each::each_dya(&ff, a, b).map_err(kerr)
        }
        '⍨' => {
            let f = operand_fun(d.left.as_ref())?;
            pure_dya(pc, f, None, b, a)
        }
        '⍣' => {
            let f = operand_fun(d.left.as_ref())?;
            match d.right.as_ref().ok_or_else(|| kerr(ErrorKind::Syntax))? {
                Operand::Val(n) => {
                    let count = n.to_int_scalar(ctx.ct).map_err(kerr)?;
                    if count < 0 {
                        return inverse_power(pc, f, Some(a), count.unsigned_abs(), b);
                    }
                    let ff = |x: &Value| pure_dya(pc, f, None, a, x).map_err(|e| e.kind);
                    oper::power::power_n(&ff, count as u64, b).map_err(kerr)
                }
                Operand::Fun(g) => {
                    let ff = |x: &Value| pure_dya(pc, f, None, a, x).map_err(|e| e.kind);
                    let gg = |x: &Value, y: &Value| {
                        pure_dya(pc, g, None, x, y).map_err(|e| e.kind)
                    };
                    oper::power::power_until(&ff, &gg, b, ctx.ct).map_err(kerr)
                }
            }
        }
        '⍤' => {
            let f = operand_fun(d.left.as_ref())?;
            let y = operand_val(d.right.as_ref())?;
            let (_, la, ra) = oper::rank::split_ranks(y, ctx.ct).map_err(kerr)?;
            let ff = |x: &Value, yv: &Value| pure_dya(pc, f, None, x, yv).map_err(|e| e.kind);
            oper::rank::rank_dya(&ff, la, ra, a, b, &ctx).map_err(kerr)
        }
        '.' => {
            let f = operand_fun(d.left.as_ref())?;
            let g = operand_fun(d.right.as_ref())?;
            if let (FunSlot::Prim(fc), FunSlot::Prim(gc)) = (f, g) {
                return oper::product::inner_prim(*fc, *gc, a, b, &ctx, &pc.par).map_err(kerr);
            }
            let ff = |x: &Value, y: &Value| pure_dya(pc, f, None, x, y).map_err(|e| e.kind);
            let gg = |x: &Value, y: &Value| pure_dya(pc, g, None, x, y).map_err(|e| e.kind);
            let ident = slot_identity(f);
            oper::product::inner(&ff, &gg, ident.as_ref(), a, b).map_err(kerr)
        }
        '∘' => {
            let f = operand_fun(d.right.as_ref())?;
            if let FunSlot::Prim(fc) = f {
                return oper::product::outer_prim(*fc, a, b, &ctx, &pc.par).map_err(kerr);
            }
            let ff = |x: &Value, y: &Value| pure_dya(pc, f, None, x, y).map_err(|e| e.kind);
            oper::product::outer(&ff, a, b).map_err(kerr)
        }
        _ => Err(kerr(ErrorKind::Valence)),
    }
}

fn operand_fun<'a>(op: Option<&'a Operand>) -> Result<&'a FunSlot> {
    match op {
        Some(Operand::Fun(f)) => Ok(f),
        _ => Err(kerr(ErrorKind::Syntax)),
    }
}

fn operand_val<'a>(op: Option<&'a Operand>) -> Result<&'a Value> {
    match op {
        Some(Operand::Val(v)) => Ok(v),
        _ => Err(kerr(ErrorKind::Syntax)),
    }
}

fn slot_identity(f: &FunSlot) -> Option<Cell> {
    match f {
        FunSlot::Prim(c) => scalar::identity_cell(*c),
        _ => None,
    }
}

/// F⍣(−N): apply the inverse of a primitive N times
fn inverse_power(
    pc: &PureCtx,
    f: &FunSlot,
    left: Option<&Value>,
    n: u64,
    b: &Value,
) -> Result<Value> {
    let FunSlot::Prim(c) = f else {
        return Err(kerr(ErrorKind::Domain));
    };
    let mut cur = b.clone();
    for _ in 0..n {
        cur = inverse_apply(pc, *c, left, &cur)?;
    }
    Ok(cur)
}

/// One application of a primitive's inverse
fn inverse_apply(pc: &PureCtx, c: char, left: Option<&Value>, b: &Value) -> Result<Value> {
    match left {
        None => {
            let inv = match c {
                '+' => '+',
                '-' => '-',
                '÷' => '÷',
                '⌽' => '⌽',
                '⊖' => '⊖',
                '⍉' => '⍉',
                '~' => '~',
                '⋆' => '⍟',
                '⍟' => '⋆',
                '⊂' => '⊃',
                '⊃' => '⊂',
                _ => return Err(kerr(ErrorKind::Domain)),
            };
            prim_mon(pc, inv, None, b)
        }
        Some(a) => match c {
            '+' => prim_dya(pc, '-', None, b, a),
            '-' => prim_dya(pc, '-', None, a, b),
            '×' => prim_dya(pc, '÷', None, b, a),
            '÷' => prim_dya(pc, '÷', None, a, b),
            '⋆' => prim_dya(pc, '⍟', None, a, b),
            '⍟' => prim_dya(pc, '⋆', None, a, b),
            '⌽' | '⊖' => {
                let neg = prim_mon(pc, '-', None, a)?;
                prim_dya(pc, c, None, &neg, b)
            }
            _ => Err(kerr(ErrorKind::Domain)),
        },
    }
}

// ----------------------------------------------------------------------
// the interpreter
// ----------------------------------------------------------------------

enum DriveOutcome {
    Value(Value),
    DeliveredIndex,
    Pending,
}

/// How a derived-function application begins
enum DerivedStart {
    /// Completed without registering a handler
    Immediate(Value),
    /// A handler is on the chain; drive this first step
    Started(EocStep),
    /// No handler needed: apply this call in the operator's place
    /// (commute rewrites into a single call)
    Tail {
        fun: FunSlot,
        left: Option<Value>,
        right: Value,
    },
}

pub struct Interpreter {
    pub ws: Workspace,
    frames: Vec<Frame>,
    last_value: Option<Value>,
    /// The driver runs while the stack is deeper than this; resuming a
    /// suspended function through →N lowers it so the whole chain drains
    run_floor: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Interpreter::with_workspace(Workspace::new())
    }

    pub fn with_workspace(ws: Workspace) -> Self {
        Interpreter {
            ws,
            frames: Vec::new(),
            last_value: None,
            run_floor: 0,
        }
    }

    fn pure_ctx(&self) -> PureCtx {
        PureCtx {
            ctx: self.ws.sysvars.ctx(),
            par: self.ws.parallel.clone(),
        }
    }

    /// Evaluate one source line in a fresh immediate frame. Returns the
    /// last statement value; display output lands in the workspace.
    pub fn eval_line(&mut self, line: &str) -> Result<Option<Value>> {
        let stmts = parse_line(line).map_err(|mut e| {
            if e.line.is_none() {
                e.set_position(line, 0, 0);
            }
            self.ws.last_error = Some(e.clone());
            e
        })?;
        let base = self.frames.len();
        self.frames.push(Frame::immediate(
            stmts,
            Deliver::Display,
            None,
            line.to_string(),
        ));
        self.last_value = None;
        self.run(base)?;
        Ok(self.last_value.take())
    }

    /// Run the latent expression, if any
    pub fn run_latent(&mut self) -> Result<Option<Value>> {
        let lx = self.ws.sysvars.lx();
        if lx.is_empty() {
            return Ok(None);
        }
        self.eval_line(&lx)
    }

    /// The )SI listing, innermost first
    pub fn si_lines(&self) -> Vec<String> {
        self.frames.iter().rev().map(Frame::describe).collect()
    }

    /// The )SIS listing: )SI plus the statement text of each level
    pub fn sis_lines(&self) -> Vec<String> {
        self.frames
            .iter()
            .rev()
            .map(|f| {
                if f.line_text.is_empty() {
                    f.describe()
                } else {
                    format!("{}  {}", f.describe(), f.line_text)
                }
            })
            .collect()
    }

    /// )SIC: unwind every frame, restoring all shadowed bindings
    pub fn si_clear(&mut self) {
        while let Some(frame) = self.frames.pop() {
            self.unwind_frame_shadows(frame);
        }
    }

    pub fn si_depth(&self) -> usize {
        self.frames.len()
    }

    fn unwind_frame_shadows(&mut self, frame: Frame) {
        if let FrameKind::Defined {
            shadowed,
            quad_shadowed,
            ..
        } = frame.kind
        {
            for id in shadowed {
                self.ws.symbols.get_mut(id).pop();
            }
            for q in quad_shadowed {
                self.ws.sysvars.pop_shadow(q);
            }
        }
    }

    // ------------------------------------------------------------------
    // the driver loop
    // ------------------------------------------------------------------

    fn run(&mut self, base: usize) -> Result<()> {
        self.run_floor = base;
        while self.frames.len() > self.run_floor {
            if self.ws.take_interrupt() {
                let e = AplError::new(ErrorKind::Interrupt);
                self.handle_error(e)?;
                continue;
            }
            match self.step_top() {
                Ok(()) => {}
                Err(e) => self.handle_error(e)?,
            }
        }
        Ok(())
    }

    /// Advance the top frame: load the next statement if needed, then
    /// consume tokens until the statement ends or a callee frame is
    /// pushed.
    fn step_top(&mut self) -> Result<()> {
        let fi = self.frames.len() - 1;

        if !self.frames[fi].in_stmt {
            if !self.load_next_statement(fi)? {
                // frame finished
                let frame = self.frames.pop().expect("frame present");
                return self.finish_frame(frame);
            }
        }

        loop {
            if self.frames.len() != fi + 1 {
                return Ok(()); // a callee frame appeared
            }
            if self.frames[fi].pending_close {
                self.frames[fi].pending_close = false;
                self.close_paren(fi)?;
                continue;
            }
            if self.frames[fi].tpos == 0 {
                match self.finalize_statement(fi)? {
                    Some(outcome) => return self.apply_outcome(fi, outcome),
                    None => return Ok(()), // suspended in the final reduce
                }
            }
            let tok = {
                let f = &mut self.frames[fi];
                f.tpos -= 1;
                f.toks[f.tpos].clone()
            };
            self.push_token(fi, tok)?;
            if self.frames.len() != fi + 1 {
                return Ok(());
            }
            self.reduce(fi)?;
        }
    }

    /// Load the next statement into the frame; false when the frame is
    /// out of work
    fn load_next_statement(&mut self, fi: usize) -> Result<bool> {
        loop {
            {
                let f = &mut self.frames[fi];
                if f.stmt_ix < f.statements.len() {
                    let stmt = f.statements[f.stmt_ix].clone();
                    f.stmt_ix += 1;
                    f.tpos = stmt.len();
                    f.toks = stmt;
                    f.items.clear();
                    f.in_stmt = true;
                    return Ok(true);
                }
            }
            let fun = match &self.frames[fi].kind {
                FrameKind::Immediate => return Ok(false),
                FrameKind::Defined { fun, .. } => Arc::clone(fun),
            };
            let next = self.frames[fi].line + 1;
            if next >= fun.lines.len() {
                return Ok(false);
            }
            {
                let f = &mut self.frames[fi];
                f.line = next;
                f.stmt_ix = 0;
                f.statements = fun.lines[next].statements.clone();
                f.line_text = fun.text.get(next).cloned().unwrap_or_default();
            }
            self.check_stop_trace(fi, &fun, next)?;
        }
    }

    fn check_stop_trace(&mut self, fi: usize, fun: &UserFunction, line: usize) -> Result<()> {
        if let Some(set) = self.ws.stop_sets.get(fun.name()) {
            if set.contains(&line) {
                self.frames[fi].state = FrameState::Suspended;
                let name = fun.name().to_string();
                return Err(AplError::with_info(
                    ErrorKind::Interrupt,
                    format!("stopped at {}[{}]", name, line),
                ));
            }
        }
        if let Some(set) = self.ws.trace_sets.get(fun.name()) {
            if set.contains(&line) {
                let text = format!("{}[{}]", fun.name(), line);
                self.ws.print_line(text);
            }
        }
        Ok(())
    }

    /// A frame has run out of statements: deliver its result
    fn finish_frame(&mut self, mut frame: Frame) -> Result<()> {
        // collect the result for defined functions from the result symbol
        if let FrameKind::Defined {
            result_sym: Some(id),
            ..
        } = &frame.kind
        {
            frame.result = match self.ws.symbols.get(*id).top() {
                Binding::Variable(v) => Some((**v).clone()),
                _ => None,
            };
        }
        let result = frame.result.clone();
        let deliver = frame.deliver;
        let catch = frame.catch.clone();
        self.unwind_frame_shadows(frame);

        // a ⎕EC frame wraps its outcome
        let result = match catch {
            Some(Catch::Ec) => Some(ec_wrap(&self.ws, result)),
            _ => result,
        };

        match deliver {
            Deliver::Display => Ok(()),
            Deliver::ToItem => {
                let v = result.ok_or_else(|| kerr(ErrorKind::Value))?;
                let fi = self.frames.len().checked_sub(1).ok_or_else(|| {
                    kerr(ErrorKind::Syntax)
                })?;
                self.deliver_item(fi, val_item(v));
                Ok(())
            }
            Deliver::ToEoc => {
                let v = result.ok_or_else(|| kerr(ErrorKind::Value))?;
                let fi = self
                    .frames
                    .len()
                    .checked_sub(1)
                    .ok_or_else(|| kerr(ErrorKind::Syntax))?;
                let ctx = self.ws.sysvars.ctx();
                let step = {
                    let handler = self.frames[fi]
                        .eoc
                        .last_mut()
                        .ok_or_else(|| kerr(ErrorKind::Syntax))?;
                    handler.resume(v, &ctx).map_err(kerr)?
                };
                match self.drive_steps(fi, step)? {
                    DriveOutcome::Value(v) => {
                        self.deliver_item(fi, val_item(v));
                        Ok(())
                    }
                    DriveOutcome::DeliveredIndex | DriveOutcome::Pending => Ok(()),
                }
            }
        }
    }

    /// Insert a delivered item beneath any parked top items
    fn deliver_item(&mut self, fi: usize, item: Item) {
        let f = &mut self.frames[fi];
        let keep = f.hold_on_top.min(f.items.len());
        f.hold_on_top = 0;
        let at = f.items.len() - keep;
        f.items.insert(at, item);
    }

    /// Resolve EOC steps until a frame must be pushed or a value is done
    fn drive_steps(&mut self, fi: usize, mut step: EocStep) -> Result<DriveOutcome> {
        loop {
            match step {
                EocStep::Done(v) => {
                    self.frames[fi].eoc.pop();
                    if self.frames[fi].eoc.is_empty() {
                        return Ok(DriveOutcome::Value(v));
                    }
                    // the handler below was waiting for this value
                    let ctx = self.ws.sysvars.ctx();
                    step = self.frames[fi]
                        .eoc
                        .last_mut()
                        .expect("non-empty")
                        .resume(v, &ctx)
                        .map_err(kerr)?;
                }
                EocStep::DoneIndex(list) => {
                    self.frames[fi].eoc.pop();
                    self.deliver_item(fi, Item::Index(list));
                    return Ok(DriveOutcome::DeliveredIndex);
                }
                EocStep::Eval(toks) => {
                    self.frames.push(Frame::immediate(
                        vec![toks],
                        Deliver::ToEoc,
                        None,
                        self.frames[fi].line_text.clone(),
                    ));
                    return Ok(DriveOutcome::Pending);
                }
                EocStep::Call { fun, left, right } => {
                    if is_pure(&fun) {
                        let pc = self.pure_ctx();
                        let v = match &left {
                            Some(a) => pure_dya(&pc, &fun, None, a, &right)?,
                            None => pure_mon(&pc, &fun, None, &right)?,
                        };
                        let ctx = self.ws.sysvars.ctx();
                        step = self.frames[fi]
                            .eoc
                            .last_mut()
                            .expect("handler present")
                            .resume(v, &ctx)
                            .map_err(kerr)?;
                        continue;
                    }
                    match &fun {
                        FunSlot::Defined(f) => {
                            let f = Arc::clone(f);
                            self.push_call_frame(&f, left, Some(right), Deliver::ToEoc)?;
                            return Ok(DriveOutcome::Pending);
                        }
                        FunSlot::Derived(d) => {
                            let d = Arc::clone(d);
                            match self.start_derived_eoc(fi, &d, left, right)? {
                                DerivedStart::Started(next) => {
                                    step = next;
                                }
                                DerivedStart::Immediate(v) => {
                                    let ctx = self.ws.sysvars.ctx();
                                    step = self.frames[fi]
                                        .eoc
                                        .last_mut()
                                        .expect("handler present")
                                        .resume(v, &ctx)
                                        .map_err(kerr)?;
                                }
                                DerivedStart::Tail { fun, left, right } => {
                                    step = EocStep::Call { fun, left, right };
                                }
                            }
                        }
                        FunSlot::Prim('?') => {
                            let v = match &left {
                                Some(a) => self.deal(a, &right)?,
                                None => self.roll(&right)?,
                            };
                            let ctx = self.ws.sysvars.ctx();
                            step = self.frames[fi]
                                .eoc
                                .last_mut()
                                .expect("handler present")
                                .resume(v, &ctx)
                                .map_err(kerr)?;
                        }
                        FunSlot::Prim('⍎') => {
                            let text = right.as_string().map_err(kerr)?;
                            let stmts = parse_line(&text)?;
                            self.frames.push(Frame::immediate(
                                stmts,
                                Deliver::ToEoc,
                                None,
                                text,
                            ));
                            return Ok(DriveOutcome::Pending);
                        }
                        FunSlot::Quad(q) => {
                            let v = self.apply_quad(*q, left.as_ref(), &right, Deliver::ToEoc)?;
                            match v {
                                Some(v) => {
                                    let ctx = self.ws.sysvars.ctx();
                                    step = self.frames[fi]
                                        .eoc
                                        .last_mut()
                                        .expect("handler present")
                                        .resume(v, &ctx)
                                        .map_err(kerr)?;
                                }
                                None => return Ok(DriveOutcome::Pending),
                            }
                        }
                        _ => return Err(kerr(ErrorKind::Syntax)),
                    }
                }
            }
        }
    }

    /// Start an EOC handler for a derived function with an impure
    /// operand. Returns the first step if it must be driven further.
    fn start_derived_eoc(
        &mut self,
        fi: usize,
        d: &Derived,
        left: Option<Value>,
        right: Value,
    ) -> Result<DerivedStart> {
        let ctx = self.ws.sysvars.ctx();
        let b = right;
        let (handler, step) = match d.op {
            '/' | '⌿' | '\\' | '⍀' => {
                let f = operand_fun(d.left.as_ref())?.clone();
                let first_axis = d.op == '⌿' || d.op == '⍀';
                let default = if first_axis {
                    0
                } else {
                    b.rank().saturating_sub(1)
                };
                let pc = self.pure_ctx();
                let axis = axis_or(&pc, d.axis.as_ref(), b.rank(), default)?;
                if left.is_some() {
                    return Err(kerr(ErrorKind::Valence));
                }
                if d.op == '/' || d.op == '⌿' {
                    if b.rank() == 0 {
                        return Ok(DerivedStart::Immediate(b));
                    }
                    let s3 = apl_core::Shape3::new(b.shape(), axis);
                    if s3.m == 0 {
                        return Err(kerr(ErrorKind::Domain)); // no identity for defined F
                    }
                    if s3.m == 1 {
                        let zshape = b.shape().remove_axis(axis);
                        let z = Value::new(zshape, b.ravel().to_vec()).map_err(kerr)?;
                        return Ok(DerivedStart::Immediate(z));
                    }
                    if s3.h * s3.l == 0 {
                        let zshape = b.shape().remove_axis(axis);
                        return Ok(DerivedStart::Immediate(Value::empty_with_prototype(
                            zshape,
                            b.prototype_cell(),
                        )));
                    }
                    let (h, step) = ReduceEoc::start(f, b, axis);
                    (EocHandler::Reduce(h), step)
                } else {
                    if b.is_empty() || b.rank() == 0 {
                        return Ok(DerivedStart::Immediate(b));
                    }
                    let (h, step) = ScanEoc::start(f, b, axis);
                    (EocHandler::Scan(h), step)
                }
            }
            '¨' => {
                let f = operand_fun(d.left.as_ref())?.clone();
                match left {
                    None => {
                        if b.is_empty() {
                            return Ok(DerivedStart::Immediate(Value::empty_with_prototype(
                                b.shape().clone(),
                                b.prototype_cell(),
                            )));
                        }
                        let (h, step) = EachMonEoc::start(f, b);
                        (EocHandler::EachMon(h), step)
                    }
                    Some(a) => {
                        if b.is_empty() || a.is_empty() {
                            return Ok(DerivedStart::Immediate(Value::empty_with_prototype(
                                b.shape().clone(),
                                Cell::Int(0),
                            )));
                        }
                        let (h, step) = EachDyaEoc::start(f, a, b).map_err(kerr)?;
                        (EocHandler::EachDya(h), step)
                    }
                }
            }
            '⍨' => {
                let f = operand_fun(d.left.as_ref())?.clone();
                let (l, r) = match left {
                    Some(a) => (Some(b), a),
                    None => (Some(b.clone()), b),
                };
                return Ok(DerivedStart::Tail {
                    fun: f,
                    left: l,
                    right: r,
                });
            }
            '⍣' => {
                let f = operand_fun(d.left.as_ref())?.clone();
                match d.right.as_ref().ok_or_else(|| kerr(ErrorKind::Syntax))? {
                    Operand::Val(n) => {
                        let count = n.to_int_scalar(ctx.ct).map_err(kerr)?;
                        if count < 0 {
                            return Err(kerr(ErrorKind::Domain)); // no inverse of defined F
                        }
                        let (h, step) = PowerEoc::start(f, left, count as u64, b);
                        (EocHandler::Power(h), step)
                    }
                    Operand::Fun(g) => {
                        let (h, step) = PowerUntilEoc::start(f, g.clone(), left, b);
                        (EocHandler::PowerUntil(h), step)
                    }
                }
            }
            '⍤' => {
                let f = operand_fun(d.left.as_ref())?.clone();
                let y = operand_val(d.right.as_ref())?;
                let (mon, la, ra) = oper::rank::split_ranks(y, ctx.ct).map_err(kerr)?;
                match left {
                    None => {
                        let (frame, chunks) =
                            oper::rank::chunks_of(&b, mon).map_err(kerr)?;
                        if chunks.is_empty() {
                            return Ok(DerivedStart::Immediate(Value::empty_with_prototype(
                                frame,
                                b.prototype_cell(),
                            )));
                        }
                        let (h, step) = RankMonEoc::start(f, frame, chunks);
                        (EocHandler::RankMon(h), step)
                    }
                    Some(a) => {
                        let (fa, ca) = oper::rank::chunks_of(&a, la).map_err(kerr)?;
                        let (fb, cb) = oper::rank::chunks_of(&b, ra).map_err(kerr)?;
                        let (frame, pairs) = pair_chunks(fa, ca, fb, cb)?;
                        if pairs.is_empty() {
                            return Ok(DerivedStart::Immediate(Value::empty_with_prototype(
                                frame,
                                b.prototype_cell(),
                            )));
                        }
                        let (h, step) = RankDyaEoc::start(f, frame, pairs);
                        (EocHandler::RankDya(h), step)
                    }
                }
            }
            '.' => {
                let f = operand_fun(d.left.as_ref())?.clone();
                let g = operand_fun(d.right.as_ref())?.clone();
                let a = left.ok_or_else(|| kerr(ErrorKind::Valence))?;
                // an empty shared axis needs F's identity, which a
                // defined operand does not have; an empty frame is empty
                let m = if a.rank() == 0 {
                    1
                } else {
                    *a.shape().items().last().expect("rank ≥ 1")
                };
                let n = if b.rank() == 0 { 1 } else { b.shape()[0] };
                if m.max(n) == 0 {
                    return Err(kerr(ErrorKind::Domain));
                }
                if a.element_count() / m.max(1) == 0 || b.element_count() / n.max(1) == 0 {
                    let za = if a.rank() == 0 {
                        apl_core::Shape::scalar()
                    } else {
                        apl_core::Shape::new(a.shape().items()[..a.rank() - 1].to_vec())
                            .map_err(kerr)?
                    };
                    let zb = if b.rank() == 0 {
                        apl_core::Shape::scalar()
                    } else {
                        apl_core::Shape::new(b.shape().items()[1..].to_vec()).map_err(kerr)?
                    };
                    let zshape = za.catenated(&zb).map_err(kerr)?;
                    return Ok(DerivedStart::Immediate(Value::empty_with_prototype(
                        zshape,
                        Cell::Int(0),
                    )));
                }
                let (h, step) = InnerEoc::start(f, g, a, b).map_err(kerr)?;
                (EocHandler::Inner(h), step)
            }
            '∘' => {
                let f = operand_fun(d.right.as_ref())?.clone();
                let a = left.ok_or_else(|| kerr(ErrorKind::Valence))?;
                if a.is_empty() || b.is_empty() {
                    let zshape = a.shape().catenated(b.shape()).map_err(kerr)?;
                    return Ok(DerivedStart::Immediate(Value::empty_with_prototype(
                        zshape,
                        Cell::Int(0),
                    )));
                }
                let (h, step) = OuterEoc::start(f, a, b);
                (EocHandler::Outer(h), step)
            }
            _ => return Err(kerr(ErrorKind::Syntax)),
        };
        self.frames[fi].eoc.push(handler);
        Ok(DerivedStart::Started(step))
    }

    // ------------------------------------------------------------------
    // statement completion, branching, errors
    // ------------------------------------------------------------------

    fn finalize_statement(&mut self, fi: usize) -> Result<Option<Outcome>> {
        self.reduce_with(fi, NextClass::End)?;
        if self.frames.len() != fi + 1 {
            return Ok(None); // the final reduce called a defined function
        }
        let f = &mut self.frames[fi];
        f.in_stmt = false;
        let items = std::mem::take(&mut f.items);
        match items.as_slice() {
            [] => Ok(Some(Outcome::None)),
            [Item::Val { v, assigned, .. }] => Ok(Some(Outcome::Value {
                v: v.clone(),
                assigned: *assigned,
            })),
            [Item::BranchMark] => Ok(Some(Outcome::Escape)),
            [Item::Val { v, .. }, Item::BranchMark] => Ok(Some(Outcome::Branch(v.clone()))),
            _ => Err(kerr(ErrorKind::Syntax)),
        }
    }

    fn apply_outcome(&mut self, fi: usize, outcome: Outcome) -> Result<()> {
        match outcome {
            Outcome::None => Ok(()),
            Outcome::Value { v, assigned } => {
                let deliver = self.frames[fi].deliver;
                // a lambda returns its first non-assigned statement value
                let lambda_end = match &self.frames[fi].kind {
                    FrameKind::Defined {
                        fun, result_sym, ..
                    } if fun.is_lambda() && !assigned => Some((fun.lines.len(), *result_sym)),
                    _ => None,
                };
                if let Some((end, result_sym)) = lambda_end {
                    if let Some(id) = result_sym {
                        self.ws
                            .symbols
                            .get_mut(id)
                            .set(Binding::Variable(Arc::new(v.clone())));
                    }
                    let f = &mut self.frames[fi];
                    f.line = end;
                    f.stmt_ix = 0;
                    f.statements = Vec::new();
                    f.result = Some(v);
                    return Ok(());
                }
                if !assigned
                    && (deliver == Deliver::Display
                        || matches!(self.frames[fi].kind, FrameKind::Defined { .. }))
                {
                    self.ws.print_value(&v);
                }
                if deliver == Deliver::Display {
                    self.last_value = Some(v.clone());
                }
                self.frames[fi].result = Some(v);
                Ok(())
            }
            Outcome::Branch(target) => self.branch(fi, target),
            Outcome::Escape => {
                // → exits the innermost suspended context
                let frame = self.frames.pop().expect("frame present");
                self.unwind_frame_shadows(frame);
                while let Some(top) = self.frames.last() {
                    let is_defined = matches!(top.kind, FrameKind::Defined { .. });
                    let frame = self.frames.pop().expect("frame present");
                    self.unwind_frame_shadows(frame);
                    if is_defined {
                        break;
                    }
                }
                Ok(())
            }
        }
    }

    fn branch(&mut self, fi: usize, target: Value) -> Result<()> {
        let ct = self.ws.sysvars.ct();
        // →⍬ continues with the next statement
        if target.is_empty() {
            return Ok(());
        }
        let line = target.to_int_scalar(ct).map_err(kerr)?;

        match &self.frames[fi].kind {
            FrameKind::Defined { fun, .. } => {
                let fun = Arc::clone(fun);
                if line <= 0 || line as usize >= fun.lines.len() {
                    // branch out of the function: finish it
                    let f = &mut self.frames[fi];
                    f.statements = Vec::new();
                    f.stmt_ix = 0;
                    f.line = fun.lines.len();
                    return Ok(());
                }
                let f = &mut self.frames[fi];
                f.line = line as usize;
                f.stmt_ix = 0;
                f.statements = fun.lines[line as usize].statements.clone();
                f.line_text = fun.text.get(line as usize).cloned().unwrap_or_default();
                Ok(())
            }
            FrameKind::Immediate => {
                // resume a suspended function below
                let below = fi.checked_sub(1);
                match below {
                    Some(bi)
                        if matches!(self.frames[bi].kind, FrameKind::Defined { .. })
                            && self.frames[bi].state != FrameState::Running =>
                    {
                        let frame = self.frames.pop().expect("immediate frame");
                        self.unwind_frame_shadows(frame);
                        self.frames[bi].state = FrameState::Running;
                        // drain the whole suspended chain, not just the
                        // frames above the current entry point
                        self.run_floor = 0;
                        self.branch(bi, target)
                    }
                    _ => Err(AplError::with_info(
                        ErrorKind::Syntax,
                        "no suspended function to resume",
                    )),
                }
            }
        }
    }

    /// Route an error to the nearest catching frame, or suspend
    fn handle_error(&mut self, mut e: AplError) -> Result<()> {
        if let Some(top) = self.frames.last() {
            e.set_position(&top.line_text, 0, 0);
        }
        self.ws.last_error = Some(e.clone());

        // find the nearest ⎕EA/⎕EC frame
        let catcher = self
            .frames
            .iter()
            .rposition(|f| f.catch.is_some());
        match catcher {
            Some(ci) => {
                while self.frames.len() > ci + 1 {
                    let frame = self.frames.pop().expect("frame present");
                    self.unwind_frame_shadows(frame);
                }
                let catch = self.frames[ci].catch.take().expect("catch present");
                match catch {
                    Catch::Ea(alt) => {
                        let stmts = parse_line(&alt)?;
                        let f = &mut self.frames[ci];
                        f.statements = stmts;
                        f.stmt_ix = 0;
                        f.in_stmt = false;
                        f.items.clear();
                        f.eoc.clear();
                        f.line_text = alt;
                        f.state = FrameState::Running;
                        Ok(())
                    }
                    Catch::Ec => {
                        let mut frame = self.frames.pop().expect("catch frame");
                        frame.eoc.clear();
                        frame.catch = Some(Catch::Ec);
                        frame.result = None;
                        let deliver = frame.deliver;
                        self.unwind_frame_shadows(frame);
                        let wrapped = ec_wrap(&self.ws, None);
                        match deliver {
                            Deliver::ToItem | Deliver::Display => {
                                if let Some(pi) = self.frames.len().checked_sub(1) {
                                    self.deliver_item(pi, val_item(wrapped));
                                }
                                Ok(())
                            }
                            Deliver::ToEoc => {
                                let fi = self.frames.len() - 1;
                                let ctx = self.ws.sysvars.ctx();
                                let step = self.frames[fi]
                                    .eoc
                                    .last_mut()
                                    .ok_or_else(|| kerr(ErrorKind::Syntax))?
                                    .resume(wrapped, &ctx)
                                    .map_err(kerr)?;
                                match self.drive_steps(fi, step)? {
                                    DriveOutcome::Value(v) => {
                                        self.deliver_item(fi, val_item(v));
                                        Ok(())
                                    }
                                    _ => Ok(()),
                                }
                            }
                        }
                    }
                }
            }
            None => {
                // release in-flight operator values, then suspend
                if let Some(top) = self.frames.last_mut() {
                    top.eoc.clear();
                    top.in_stmt = false;
                    top.state = FrameState::Error;
                }
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // token push and reduction
    // ------------------------------------------------------------------

    fn push_token(&mut self, fi: usize, tok: Tok) -> Result<()> {
        match tok.tag {
            TokenTag::Void => Ok(()),
            TokenTag::Value(v) => {
                self.frames[fi].items.push(val_item(v));
                Ok(())
            }
            TokenTag::Symbol(name) => self.push_symbol(fi, &name),
            TokenTag::LSymb(name) => {
                self.frames[fi].items.push(Item::LSymb(name));
                Ok(())
            }
            TokenTag::LSymb2(names) => {
                self.frames[fi].items.push(Item::LSymb2(names));
                Ok(())
            }
            TokenTag::Quad(q) => {
                // a quad left of ← is a target, otherwise a read
                let is_target = matches!(self.frames[fi].items.last(), Some(Item::Assign));
                if is_target {
                    self.frames[fi].items.push(Item::QuadTarget(q));
                    return Ok(());
                }
                if q.is_variable() {
                    let v = self.read_quad_var(q)?;
                    self.frames[fi].items.push(val_item(v));
                } else {
                    self.frames[fi].items.push(Item::Fun {
                        slot: FunSlot::Quad(q),
                        axis: None,
                    });
                }
                Ok(())
            }
            TokenTag::Prim(c) => self.push_prim(fi, c),
            TokenTag::Assign => {
                self.frames[fi].items.push(Item::Assign);
                Ok(())
            }
            TokenTag::Branch => {
                self.frames[fi].items.push(Item::BranchMark);
                Ok(())
            }
            TokenTag::RParen => {
                self.frames[fi].items.push(Item::RMark);
                Ok(())
            }
            TokenTag::LParen => self.close_paren(fi),
            TokenTag::Index(slots) => self.push_index(fi, slots),
            TokenTag::Lambda(body) => {
                let fun = UserFunction::lambda(body)?;
                self.frames[fi].items.push(Item::Fun {
                    slot: FunSlot::Defined(Arc::new(fun)),
                    axis: None,
                });
                Ok(())
            }
            TokenTag::StopTrace { trace, name } => self.push_stop_trace(fi, trace, &name),
            TokenTag::Colon | TokenTag::Semicolon => Err(kerr(ErrorKind::Syntax)),
            TokenTag::Diamond
            | TokenTag::LBracket
            | TokenTag::RBracket
            | TokenTag::LBrace
            | TokenTag::RBrace
            | TokenTag::Int(_)
            | TokenTag::Float(_)
            | TokenTag::Complex(_)
            | TokenTag::Chars(_) => Err(kerr(ErrorKind::Syntax)),
        }
    }

    fn push_symbol(&mut self, fi: usize, name: &str) -> Result<()> {
        let binding = self.ws.symbols.lookup(name).map(|s| s.top().clone());
        match binding {
            Some(Binding::Variable(v)) => {
                self.frames[fi].items.push(val_item((*v).clone()));
                Ok(())
            }
            Some(Binding::Label(n)) => {
                self.frames[fi].items.push(val_item(Value::int_scalar(n)));
                Ok(())
            }
            Some(Binding::Function(f)) => {
                if f.header.adicity() == Adicity::Niladic {
                    // niladic functions are called on reference
                    self.push_call_frame(&f, None, None, Deliver::ToItem)?;
                    return Ok(());
                }
                self.frames[fi].items.push(Item::Fun {
                    slot: FunSlot::Defined(f),
                    axis: None,
                });
                Ok(())
            }
            Some(Binding::Native(p)) => {
                self.frames[fi].items.push(Item::Fun {
                    slot: FunSlot::Native(p),
                    axis: None,
                });
                Ok(())
            }
            Some(Binding::Shared(_)) | Some(Binding::Unused) | None => {
                Err(AplError::with_info(ErrorKind::Value, name))
            }
        }
    }

    fn push_prim(&mut self, fi: usize, c: char) -> Result<()> {
        match c {
            '/' | '⌿' | '\\' | '⍀' | '¨' | '⍨' | '⍣' | '⍤' => {
                self.frames[fi].items.push(Item::Op {
                    glyph: c,
                    axis: None,
                });
                Ok(())
            }
            '.' => {
                // `. G` makes a dot-operator awaiting its left operand
                match self.frames[fi].items.pop() {
                    Some(Item::Fun { slot, axis: None }) => {
                        self.frames[fi].items.push(Item::DotOp(slot));
                        Ok(())
                    }
                    other => {
                        if let Some(it) = other {
                            self.frames[fi].items.push(it);
                        }
                        Err(kerr(ErrorKind::Syntax))
                    }
                }
            }
            '∘' => {
                // only the ∘. outer-product spelling is supported
                match self.frames[fi].items.pop() {
                    Some(Item::DotOp(g)) => {
                        let d = Derived {
                            op: '∘',
                            left: None,
                            right: Some(Operand::Fun(g)),
                            axis: None,
                        };
                        self.frames[fi].items.push(Item::Fun {
                            slot: FunSlot::Derived(Arc::new(d)),
                            axis: None,
                        });
                        Ok(())
                    }
                    other => {
                        if let Some(it) = other {
                            self.frames[fi].items.push(it);
                        }
                        Err(kerr(ErrorKind::Syntax))
                    }
                }
            }
            _ => {
                self.frames[fi].items.push(Item::Fun {
                    slot: FunSlot::Prim(c),
                    axis: None,
                });
                Ok(())
            }
        }
    }

    fn push_index(&mut self, fi: usize, slots: Vec<Vec<Tok>>) -> Result<()> {
        // fast path: every slot is empty or one value token
        let mut simple: Vec<Option<Value>> = Vec::with_capacity(slots.len());
        let mut fast = true;
        for slot in &slots {
            match slot.as_slice() {
                [] => simple.push(None),
                [Tok {
                    tag: TokenTag::Value(v),
                    ..
                }] => simple.push(Some(v.clone())),
                _ => {
                    fast = false;
                    break;
                }
            }
        }
        if fast {
            self.frames[fi].items.push(Item::Index(simple));
            return Ok(());
        }
        let eoc_slots: Vec<Option<Vec<Tok>>> = slots
            .into_iter()
            .map(|s| if s.is_empty() { None } else { Some(s) })
            .collect();
        let (h, step) = IndexCollectEoc::start(eoc_slots);
        match step {
            None => {
                let mut h = h;
                self.frames[fi].items.push(Item::Index(h.finish()));
                Ok(())
            }
            Some(step) => {
                self.frames[fi].eoc.push(EocHandler::IndexCollect(h));
                match self.drive_steps(fi, step)? {
                    DriveOutcome::Value(_) => Err(kerr(ErrorKind::Syntax)),
                    _ => Ok(()),
                }
            }
        }
    }

    fn push_stop_trace(&mut self, fi: usize, trace: bool, name: &str) -> Result<()> {
        // assignment (S∆F←lines) or reference (S∆F)
        let is_target = matches!(self.frames[fi].items.last(), Some(Item::Assign));
        if is_target {
            self.frames[fi].items.pop();
            let v = match self.frames[fi].items.pop() {
                Some(Item::Val { v, .. }) => v,
                _ => return Err(kerr(ErrorKind::LeftSyntax)),
            };
            let ct = self.ws.sysvars.ct();
            let lines: Vec<usize> = v
                .as_int_vector(ct)
                .map_err(kerr)?
                .into_iter()
                .filter(|&n| n >= 0)
                .map(|n| n as usize)
                .collect();
            let sets = if trace {
                &mut self.ws.trace_sets
            } else {
                &mut self.ws.stop_sets
            };
            if lines.is_empty() {
                sets.remove(name);
            } else {
                sets.insert(name.to_string(), lines);
            }
            self.frames[fi].items.push(Item::Val {
                v,
                assigned: true,
                strand: false,
            });
            return Ok(());
        }
        let sets = if trace {
            &self.ws.trace_sets
        } else {
            &self.ws.stop_sets
        };
        let lines: Vec<i64> = sets
            .get(name)
            .map(|v| v.iter().map(|&n| n as i64).collect())
            .unwrap_or_default();
        self.frames[fi].items.push(val_item(Value::int_vector(&lines)));
        Ok(())
    }

    /// `(`: the items down to the matching `)` must have reduced to one
    fn close_paren(&mut self, fi: usize) -> Result<()> {
        self.reduce_with(fi, NextClass::End)?;
        if self.frames.len() != fi + 1 {
            // a callee is in flight; retry once it delivers
            self.frames[fi].pending_close = true;
            return Ok(());
        }
        let f = &mut self.frames[fi];
        let mark = f
            .items
            .iter()
            .rposition(|it| matches!(it, Item::RMark))
            .ok_or_else(|| kerr(ErrorKind::Syntax))?;
        let inner: Vec<Item> = f.items.drain(mark..).skip(1).collect();
        match inner.len() {
            1 => {
                let mut it = inner.into_iter().next().expect("one item");
                if let Item::Val { strand, .. } = &mut it {
                    // a parenthesised value never re-strands with neighbours
                    *strand = false;
                }
                f.items.push(it);
                self.reduce(fi)
            }
            _ => Err(kerr(ErrorKind::Syntax)),
        }
    }

    /// Class of the token that will be consumed next
    fn classify_next(&self, fi: usize) -> NextClass {
        let f = &self.frames[fi];
        if f.tpos == 0 {
            return NextClass::End;
        }
        self.classify_tok(&f.toks[f.tpos - 1], if f.tpos >= 2 {
            Some(&f.toks[f.tpos - 2])
        } else {
            None
        })
    }

    fn classify_tok(&self, tok: &Tok, before: Option<&Tok>) -> NextClass {
        match &tok.tag {
            TokenTag::Value(_) | TokenTag::Chars(_) | TokenTag::Int(_) | TokenTag::Float(_)
            | TokenTag::Complex(_) => NextClass::ValueLike,
            TokenTag::Symbol(name) => match self.ws.symbols.lookup(name).map(|s| s.top()) {
                Some(Binding::Function(f)) => {
                    if f.header.adicity() == Adicity::Niladic {
                        NextClass::ValueLike
                    } else {
                        NextClass::FunLike
                    }
                }
                Some(Binding::Native(_)) => NextClass::FunLike,
                _ => NextClass::ValueLike,
            },
            TokenTag::Quad(q) => {
                if q.is_variable() {
                    NextClass::ValueLike
                } else {
                    NextClass::FunLike
                }
            }
            TokenTag::Prim(c) => match c {
                '⍣' | '⍤' => NextClass::OpDyaVal,
                '.' => NextClass::Dot,
                '/' | '\\' | '⌿' | '⍀' | '¨' | '⍨' | '∘' => NextClass::Other,
                _ => NextClass::FunLike,
            },
            TokenTag::RParen => NextClass::ValueLike,
            TokenTag::Lambda(_) => NextClass::FunLike,
            TokenTag::Index(_) => {
                // an index left of this position belongs to a symbol or a
                // function: decide by the token before it
                match before {
                    Some(b) => match self.classify_tok(b, None) {
                        NextClass::FunLike => NextClass::Other,
                        _ => NextClass::ValueLike,
                    },
                    None => NextClass::ValueLike,
                }
            }
            _ => NextClass::Other,
        }
    }

    fn reduce(&mut self, fi: usize) -> Result<()> {
        let next = self.classify_next(fi);
        self.reduce_with(fi, next)
    }

    /// Run reductions at the top of the lookahead stack until none apply
    fn reduce_with(&mut self, fi: usize, next: NextClass) -> Result<()> {
        loop {
            if self.frames.len() != fi + 1 {
                return Ok(()); // suspended mid-reduction
            }
            let n = self.frames[fi].items.len();

            // operator formation: [Op, Fun] / [Op, Val] / [OpRight, Fun]
            if n >= 2 {
                let formed = self.try_form_operator(fi)?;
                if formed {
                    continue;
                }
            }

            // axis attachment and indexing: [Index, Fun] / [Index, Val]
            if n >= 2 && self.try_index_patterns(fi)? {
                continue;
            }

            // assignment: [Val, Assign, target]
            if n >= 3 && self.try_assignment(fi)? {
                continue;
            }

            // stranding: [Val, Val] (blocked before ⍣/⍤)
            if n >= 2 && next != NextClass::OpDyaVal && self.try_strand(fi)? {
                continue;
            }

            // dyadic: [Val(b), Fun, Val(a)]
            if n >= 3
                && next != NextClass::ValueLike
                && next != NextClass::OpDyaVal
                && self.try_dyadic(fi)?
            {
                continue;
            }

            // monadic: [Val(b), Fun]
            if n >= 2
                && !matches!(
                    next,
                    NextClass::ValueLike | NextClass::OpDyaVal | NextClass::Dot
                )
                && self.try_monadic(fi)?
            {
                continue;
            }

            // buried monadic: [Val(b), Fun(f), Fun(g)] — in `G F B` the
            // function adjacent to the value applies first
            if n >= 3 && self.try_inner_monadic(fi)? {
                continue;
            }

            return Ok(());
        }
    }

    fn try_inner_monadic(&mut self, fi: usize) -> Result<bool> {
        let items = &self.frames[fi].items;
        let n = items.len();
        if !matches!(
            (&items[n - 3], &items[n - 2], &items[n - 1]),
            (Item::Val { .. }, Item::Fun { .. }, Item::Fun { .. })
        ) {
            return Ok(false);
        }
        let f = &mut self.frames[fi];
        let Some(outer) = f.items.pop() else {
            unreachable!()
        };
        let Some(Item::Fun { slot, axis }) = f.items.pop() else {
            unreachable!()
        };
        let Some(Item::Val { v: b, .. }) = f.items.pop() else {
            unreachable!()
        };
        // keep the outer function; apply the adjacent one
        match self.apply_slot(fi, &slot, axis.as_ref(), None, b)? {
            Some(v) => {
                self.frames[fi].items.push(val_item(v));
                self.frames[fi].items.push(outer);
                Ok(true)
            }
            None => {
                // the callee delivers later; park the outer function so
                // the delivered value is inserted beneath it
                self.frames[fi].items.push(outer);
                self.frames[fi].hold_on_top = 1;
                Ok(true)
            }
        }
    }

    fn try_form_operator(&mut self, fi: usize) -> Result<bool> {
        let items = &self.frames[fi].items;
        let n = items.len();
        let form = matches!(
            (&items[n - 2], &items[n - 1]),
            (Item::Op { .. }, Item::Fun { axis: None, .. })
                | (Item::Op { glyph: '/', .. }, Item::Val { .. })
                | (Item::Op { glyph: '⌿', .. }, Item::Val { .. })
                | (Item::Op { glyph: '\\', .. }, Item::Val { .. })
                | (Item::Op { glyph: '⍀', .. }, Item::Val { .. })
                | (Item::OpRight { .. }, Item::Fun { axis: None, .. })
                | (Item::DotOp(_), Item::Fun { axis: None, .. })
        );
        if !form {
            // ⍣/⍤ capture their right operand from the top item
            let capture = matches!(
                (&items[n - 2], &items[n - 1]),
                (
                    Item::Val { .. } | Item::Fun { axis: None, .. },
                    Item::Op {
                        glyph: '⍣',
                        ..
                    } | Item::Op {
                        glyph: '⍤',
                        ..
                    }
                )
            );
            if !capture {
                return Ok(false);
            }
        }

        let f = &mut self.frames[fi];
        let top = f.items.pop().expect("len checked");
        let under = f.items.pop().expect("len checked");
        match (under, top) {
            // F op  →  derived
            (Item::Op { glyph, axis }, Item::Fun { slot, .. }) => {
                let d = Derived {
                    op: glyph,
                    left: Some(Operand::Fun(slot)),
                    right: None,
                    axis,
                };
                f.items.push(Item::Fun {
                    slot: FunSlot::Derived(Arc::new(d)),
                    axis: None,
                });
                Ok(true)
            }
            // A op (replicate/expand operand)
            (Item::Op { glyph, axis }, Item::Val { v, .. }) => {
                let d = Derived {
                    op: glyph,
                    left: Some(Operand::Val(v)),
                    right: None,
                    axis,
                };
                f.items.push(Item::Fun {
                    slot: FunSlot::Derived(Arc::new(d)),
                    axis: None,
                });
                Ok(true)
            }
            // F . G  →  inner product
            (Item::DotOp(g), Item::Fun { slot, .. }) => {
                let d = Derived {
                    op: '.',
                    left: Some(Operand::Fun(slot)),
                    right: Some(Operand::Fun(g)),
                    axis: None,
                };
                f.items.push(Item::Fun {
                    slot: FunSlot::Derived(Arc::new(d)),
                    axis: None,
                });
                Ok(true)
            }
            // F ⍣N / F⍤y
            (Item::OpRight { glyph, operand }, Item::Fun { slot, .. }) => {
                let d = Derived {
                    op: glyph,
                    left: Some(Operand::Fun(slot)),
                    right: Some(operand),
                    axis: None,
                };
                f.items.push(Item::Fun {
                    slot: FunSlot::Derived(Arc::new(d)),
                    axis: None,
                });
                Ok(true)
            }
            // the ⍣/⍤ capture: [operand, Op] → OpRight
            (operand_item, Item::Op { glyph, .. }) => {
                let operand = match operand_item {
                    Item::Val { v, .. } => Operand::Val(v),
                    Item::Fun { slot, .. } => Operand::Fun(slot),
                    _ => return Err(kerr(ErrorKind::Syntax)),
                };
                f.items.push(Item::OpRight { glyph, operand });
                Ok(true)
            }
            _ => Err(kerr(ErrorKind::Syntax)),
        }
    }

    fn try_index_patterns(&mut self, fi: usize) -> Result<bool> {
        let items = &self.frames[fi].items;
        let n = items.len();
        match (&items[n - 2], &items[n - 1]) {
            (Item::Index(_), Item::Fun { axis: None, .. }) => {
                let f = &mut self.frames[fi];
                let Some(Item::Fun { slot, .. }) = f.items.pop() else {
                    unreachable!()
                };
                let Some(Item::Index(slots)) = f.items.pop() else {
                    unreachable!()
                };
                if slots.len() != 1 {
                    return Err(kerr(ErrorKind::Axis));
                }
                let axis = slots
                    .into_iter()
                    .next()
                    .expect("one slot")
                    .ok_or_else(|| kerr(ErrorKind::Axis))?;
                f.items.push(Item::Fun {
                    slot,
                    axis: Some(axis),
                });
                Ok(true)
            }
            (Item::Index(_), Item::Op { axis: None, .. }) => {
                let f = &mut self.frames[fi];
                let Some(Item::Op { glyph, .. }) = f.items.pop() else {
                    unreachable!()
                };
                let Some(Item::Index(slots)) = f.items.pop() else {
                    unreachable!()
                };
                if slots.len() != 1 {
                    return Err(kerr(ErrorKind::Axis));
                }
                let axis = slots
                    .into_iter()
                    .next()
                    .expect("one slot")
                    .ok_or_else(|| kerr(ErrorKind::Axis))?;
                f.items.push(Item::Op {
                    glyph,
                    axis: Some(axis),
                });
                Ok(true)
            }
            (Item::Index(_), Item::Val { .. }) => {
                let ctx = self.ws.sysvars.ctx();
                let f = &mut self.frames[fi];
                let Some(Item::Val { v, .. }) = f.items.pop() else {
                    unreachable!()
                };
                let Some(Item::Index(slots)) = f.items.pop() else {
                    unreachable!()
                };
                let z = structural::bracket_index(&v, &slots, &ctx).map_err(kerr)?;
                f.items.push(val_item(z));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn try_assignment(&mut self, fi: usize) -> Result<bool> {
        let items = &self.frames[fi].items;
        let n = items.len();

        // [Val, Assign, LSymb] — plain assignment
        if matches!(
            (&items[n - 3], &items[n - 2], &items[n - 1]),
            (Item::Val { .. }, Item::Assign, Item::LSymb(_))
        ) {
            let f = &mut self.frames[fi];
            let Some(Item::LSymb(name)) = f.items.pop() else {
                unreachable!()
            };
            f.items.pop(); // Assign
            let Some(Item::Val { v, .. }) = f.items.pop() else {
                unreachable!()
            };
            self.ws.symbols.assign(&name, v.clone());
            self.frames[fi].items.push(Item::Val {
                v,
                assigned: true,
                strand: false,
            });
            return Ok(true);
        }

        // [Val, Assign, Index, LSymb] — indexed assignment
        if n >= 4
            && matches!(
                (&items[n - 4], &items[n - 3], &items[n - 2], &items[n - 1]),
                (
                    Item::Val { .. },
                    Item::Assign,
                    Item::Index(_),
                    Item::LSymb(_)
                )
            )
        {
            let ctx = self.ws.sysvars.ctx();
            let f = &mut self.frames[fi];
            let Some(Item::LSymb(name)) = f.items.pop() else {
                unreachable!()
            };
            let Some(Item::Index(slots)) = f.items.pop() else {
                unreachable!()
            };
            f.items.pop(); // Assign
            let Some(Item::Val { v, .. }) = f.items.pop() else {
                unreachable!()
            };
            let current = self
                .ws
                .symbols
                .value_of(&name)
                .ok_or_else(|| AplError::with_info(ErrorKind::Value, name.as_str()))?;
            let mut updated = (*current).clone();
            structural::bracket_index_assign(&mut updated, &slots, &v, &ctx).map_err(kerr)?;
            self.ws.symbols.assign(&name, updated);
            self.frames[fi].items.push(Item::Val {
                v,
                assigned: true,
                strand: false,
            });
            return Ok(true);
        }

        // [Val, Assign, LSymb2] — (A B C)←
        if matches!(
            (&items[n - 3], &items[n - 2], &items[n - 1]),
            (Item::Val { .. }, Item::Assign, Item::LSymb2(_))
        ) {
            let f = &mut self.frames[fi];
            let Some(Item::LSymb2(names)) = f.items.pop() else {
                unreachable!()
            };
            f.items.pop();
            let Some(Item::Val { v, .. }) = f.items.pop() else {
                unreachable!()
            };
            if !v.is_single() && v.element_count() != names.len() {
                return Err(kerr(ErrorKind::Length));
            }
            for (i, name) in names.iter().enumerate() {
                let cell = if v.is_single() { v.first() } else { v.cell(i) };
                let item = oper::cell_to_value(cell);
                self.ws.symbols.assign(name, item);
            }
            self.frames[fi].items.push(Item::Val {
                v,
                assigned: true,
                strand: false,
            });
            return Ok(true);
        }

        // [Val, Assign, QuadTarget]
        if matches!(
            (&items[n - 3], &items[n - 2], &items[n - 1]),
            (Item::Val { .. }, Item::Assign, Item::QuadTarget(_))
        ) {
            let f = &mut self.frames[fi];
            let Some(Item::QuadTarget(q)) = f.items.pop() else {
                unreachable!()
            };
            f.items.pop();
            let Some(Item::Val { v, .. }) = f.items.pop() else {
                unreachable!()
            };
            match q {
                QuadName::Quad => self.ws.print_value(&v),
                QuadName::Syl => {
                    // ⎕SYL←cores [threshold]: the parallel contract knobs
                    let ct = self.ws.sysvars.ct();
                    let items = v.as_int_vector(ct).map_err(kerr)?;
                    if items.is_empty() || items.iter().any(|&n| n < 0) {
                        return Err(kerr(ErrorKind::Domain));
                    }
                    self.ws.parallel.cores = (items[0] as usize).max(1);
                    if let Some(&t) = items.get(1) {
                        self.ws.parallel.default_threshold = t as usize;
                    }
                }
                _ => self.ws.sysvars.set(q, &v).map_err(kerr)?,
            }
            self.frames[fi].items.push(Item::Val {
                v,
                assigned: true,
                strand: false,
            });
            return Ok(true);
        }

        Ok(false)
    }

    fn try_strand(&mut self, fi: usize) -> Result<bool> {
        let items = &self.frames[fi].items;
        let n = items.len();
        if !matches!(
            (&items[n - 2], &items[n - 1]),
            (Item::Val { .. }, Item::Val { .. })
        ) {
            return Ok(false);
        }
        let f = &mut self.frames[fi];
        let Some(Item::Val { v: left, .. }) = f.items.pop() else {
            unreachable!()
        };
        let Some(Item::Val {
            v: right,
            strand,
            ..
        }) = f.items.pop()
        else {
            unreachable!()
        };
        let mut cells: Vec<Cell> = Vec::new();
        cells.push(oper::value_to_cell(left));
        if strand {
            cells.extend_from_slice(right.ravel());
        } else {
            cells.push(oper::value_to_cell(right));
        }
        f.items.push(Item::Val {
            v: Value::vector(cells),
            assigned: false,
            strand: true,
        });
        Ok(true)
    }

    fn try_dyadic(&mut self, fi: usize) -> Result<bool> {
        let items = &self.frames[fi].items;
        let n = items.len();
        if !matches!(
            (&items[n - 3], &items[n - 2], &items[n - 1]),
            (Item::Val { .. }, Item::Fun { .. }, Item::Val { .. })
        ) {
            return Ok(false);
        }
        let f = &mut self.frames[fi];
        let Some(Item::Val { v: a, .. }) = f.items.pop() else {
            unreachable!()
        };
        let Some(Item::Fun { slot, axis }) = f.items.pop() else {
            unreachable!()
        };
        let Some(Item::Val { v: b, .. }) = f.items.pop() else {
            unreachable!()
        };
        match self.apply_slot(fi, &slot, axis.as_ref(), Some(a), b)? {
            Some(v) => {
                self.frames[fi].items.push(val_item(v));
                Ok(true)
            }
            None => Ok(true),
        }
    }

    fn try_monadic(&mut self, fi: usize) -> Result<bool> {
        let items = &self.frames[fi].items;
        let n = items.len();
        if !matches!(
            (&items[n - 2], &items[n - 1]),
            (Item::Val { .. }, Item::Fun { .. })
        ) {
            return Ok(false);
        }
        let f = &mut self.frames[fi];
        let Some(Item::Fun { slot, axis }) = f.items.pop() else {
            unreachable!()
        };
        let Some(Item::Val { v: b, .. }) = f.items.pop() else {
            unreachable!()
        };
        match self.apply_slot(fi, &slot, axis.as_ref(), None, b)? {
            Some(v) => {
                self.frames[fi].items.push(val_item(v));
                Ok(true)
            }
            None => Ok(true),
        }
    }

    // ------------------------------------------------------------------
    // function application
    // ------------------------------------------------------------------

    /// Apply a function slot. `Some(v)` means the value is available now;
    /// `None` means a frame was pushed (or an EOC chain is pending) and
    /// the value will arrive through delivery.
    fn apply_slot(
        &mut self,
        fi: usize,
        slot: &FunSlot,
        axis: Option<&Value>,
        left: Option<Value>,
        right: Value,
    ) -> Result<Option<Value>> {
        if is_pure(slot) {
            let pc = self.pure_ctx();
            let v = match &left {
                Some(a) => pure_dya(&pc, slot, axis, a, &right)?,
                None => pure_mon(&pc, slot, axis, &right)?,
            };
            return Ok(Some(v));
        }
        match slot {
            FunSlot::Prim('?') => {
                let v = match &left {
                    Some(a) => self.deal(a, &right)?,
                    None => self.roll(&right)?,
                };
                Ok(Some(v))
            }
            FunSlot::Prim('⍎') => {
                if left.is_some() {
                    return Err(kerr(ErrorKind::Valence));
                }
                let text = right.as_string().map_err(kerr)?;
                let stmts = parse_line(&text)?;
                self.frames
                    .push(Frame::immediate(stmts, Deliver::ToItem, None, text));
                Ok(None)
            }
            FunSlot::Defined(f) => {
                let f = Arc::clone(f);
                self.push_call_frame(&f, left, Some(right), Deliver::ToItem)?;
                Ok(None)
            }
            FunSlot::Quad(q) => self.apply_quad(*q, left.as_ref(), &right, Deliver::ToItem),
            FunSlot::Derived(d) => {
                let d = Arc::clone(d);
                match self.start_derived_eoc(fi, &d, left, right)? {
                    DerivedStart::Started(step) => match self.drive_steps(fi, step)? {
                        DriveOutcome::Value(v) => Ok(Some(v)),
                        _ => Ok(None),
                    },
                    DerivedStart::Immediate(v) => Ok(Some(v)),
                    DerivedStart::Tail { fun, left, right } => {
                        self.apply_slot(fi, &fun, None, left, right)
                    }
                }
            }
            _ => Err(kerr(ErrorKind::Syntax)),
        }
    }

    /// Push a call frame for a defined function, shadowing its names
    fn push_call_frame(
        &mut self,
        fun: &Arc<UserFunction>,
        left: Option<Value>,
        right: Option<Value>,
        deliver: Deliver,
    ) -> Result<()> {
        let header = &fun.header;
        if left.is_some() && header.left.is_none() {
            return Err(kerr(ErrorKind::Valence));
        }
        if right.is_some() && header.right.is_none() {
            return Err(kerr(ErrorKind::Valence));
        }

        let mut shadowed: Vec<SymbolId> = Vec::new();
        let mut result_sym = None;

        if let Some(z) = &header.result {
            let id = self.ws.symbols.id(z);
            self.ws.symbols.get_mut(id).push(Binding::Unused);
            shadowed.push(id);
            result_sym = Some(id);
        }
        if let Some(a) = &header.left {
            let id = self.ws.symbols.id(a);
            let b = match &left {
                Some(v) => Binding::Variable(Arc::new(v.clone())),
                None => Binding::Unused,
            };
            self.ws.symbols.get_mut(id).push(b);
            shadowed.push(id);
        }
        if let Some(r) = &header.right {
            let id = self.ws.symbols.id(r);
            let b = match &right {
                Some(v) => Binding::Variable(Arc::new(v.clone())),
                None => Binding::Unused,
            };
            self.ws.symbols.get_mut(id).push(b);
            shadowed.push(id);
        }
        for l in &header.locals {
            let id = self.ws.symbols.id(l);
            self.ws.symbols.get_mut(id).push(Binding::Unused);
            shadowed.push(id);
        }
        for (label, line) in &fun.labels {
            let id = self.ws.symbols.id(label);
            self.ws.symbols.get_mut(id).push(Binding::Label(*line as i64));
            shadowed.push(id);
        }
        let mut quad_shadowed = Vec::new();
        for q in &header.quad_locals {
            self.ws.sysvars.push_shadow(*q);
            quad_shadowed.push(*q);
        }

        tracing::trace!(name = fun.name(), "call");
        self.frames.push(Frame {
            kind: FrameKind::Defined {
                fun: Arc::clone(fun),
                shadowed,
                quad_shadowed,
                result_sym,
            },
            line: 0,
            stmt_ix: 0,
            statements: Vec::new(),
            toks: Vec::new(),
            tpos: 0,
            in_stmt: false,
            items: Vec::new(),
            eoc: Vec::new(),
            state: FrameState::Running,
            deliver,
            catch: None,
            result: None,
            line_text: String::new(),
            pending_close: false,
            hold_on_top: 0,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // quad variables and functions
    // ------------------------------------------------------------------

    fn read_quad_var(&mut self, q: QuadName) -> Result<Value> {
        match q {
            QuadName::Em => Ok(self.ws.error_message()),
            QuadName::Et => Ok(self.ws.error_type()),
            QuadName::Syl => {
                // system limits: cores and the default parallel threshold
                let p = &self.ws.parallel;
                Ok(Value::int_vector(&[
                    p.cores as i64,
                    p.default_threshold as i64,
                ]))
            }
            QuadName::Quad => Err(kerr(ErrorKind::Value)), // no session input conduit here
            _ => self.ws.sysvars.get(q).map_err(kerr),
        }
    }

    /// Apply a quad function. ⎕EA and ⎕EC push frames.
    fn apply_quad(
        &mut self,
        q: QuadName,
        left: Option<&Value>,
        right: &Value,
        deliver: Deliver,
    ) -> Result<Option<Value>> {
        let ct = self.ws.sysvars.ct();
        match q {
            QuadName::Fx => {
                let lines = text_lines(right)?;
                let fun = UserFunction::fix(&lines)?;
                let name = fun.name().to_string();
                self.ws.symbols.assign_function(&name, Arc::new(fun));
                Ok(Some(Value::char_vector(&name)))
            }
            QuadName::Cr => {
                let name = right.as_string().map_err(kerr)?;
                match self.ws.symbols.lookup(&name).map(|s| s.top().clone()) {
                    Some(Binding::Function(f)) => Ok(Some(char_matrix(f.canonical_text()))),
                    _ => Ok(Some(Value::char_vector(""))),
                }
            }
            QuadName::Ucs => {
                let cells: Result<Vec<Cell>> = right
                    .ravel()
                    .iter()
                    .take(right.shape().ravel_len())
                    .map(|c| match c {
                        Cell::Char(ch) => Ok(Cell::Int(*ch as i64)),
                        Cell::Int(n) => char::from_u32(*n as u32)
                            .map(Cell::Char)
                            .ok_or_else(|| kerr(ErrorKind::Domain)),
                        _ => Err(kerr(ErrorKind::Domain)),
                    })
                    .collect();
                Ok(Some(Value::new(right.shape().clone(), cells?).map_err(kerr)?))
            }
            QuadName::Nc => {
                let name = right.as_string().map_err(kerr)?;
                let class = self
                    .ws
                    .symbols
                    .lookup(&name)
                    .map(|s| s.name_class())
                    .unwrap_or(0);
                Ok(Some(Value::int_scalar(class)))
            }
            QuadName::Ex => {
                let name = right.as_string().map_err(kerr)?;
                let erased = self.ws.symbols.erase(&name);
                Ok(Some(Value::int_scalar(if erased { 1 } else { 0 })))
            }
            QuadName::Tf => {
                let mode = left
                    .ok_or_else(|| kerr(ErrorKind::Valence))?
                    .to_int_scalar(ct)
                    .map_err(kerr)?;
                if mode != 3 {
                    return Err(kerr(ErrorKind::Domain));
                }
                let name = right.as_string().map_err(kerr)?;
                let v = self
                    .ws
                    .symbols
                    .value_of(&name)
                    .ok_or_else(|| AplError::with_info(ErrorKind::Value, name.as_str()))?;
                let bytes = crate::cdr::encode(&v).map_err(kerr)?;
                let cells: Vec<Cell> = bytes.into_iter().map(|b| Cell::Int(b as i64)).collect();
                Ok(Some(Value::vector(cells)))
            }
            QuadName::Ea => {
                let alt = left
                    .ok_or_else(|| kerr(ErrorKind::Valence))?
                    .as_string()
                    .map_err(kerr)?;
                let text = right.as_string().map_err(kerr)?;
                let stmts = parse_line(&text)?;
                self.frames.push(Frame::immediate(
                    stmts,
                    deliver,
                    Some(Catch::Ea(alt)),
                    text,
                ));
                Ok(None)
            }
            QuadName::Ec => {
                let text = right.as_string().map_err(kerr)?;
                let stmts = parse_line(&text)?;
                self.frames.push(Frame::immediate(
                    stmts,
                    deliver,
                    Some(Catch::Ec),
                    text,
                ));
                Ok(None)
            }
            _ => Err(kerr(ErrorKind::Valence)),
        }
    }

    // ------------------------------------------------------------------
    // roll and deal
    // ------------------------------------------------------------------

    fn roll(&mut self, b: &Value) -> Result<Value> {
        let ct = self.ws.sysvars.ct();
        let io = self.ws.sysvars.io();
        if b.is_empty() {
            return Ok(Value::empty_with_prototype(
                b.shape().clone(),
                Cell::Int(0),
            ));
        }
        let mut cells = Vec::with_capacity(b.element_count());
        for i in 0..b.element_count() {
            let n = b.cell(i).to_int(ct).map_err(kerr)?;
            if n <= 0 {
                return Err(kerr(ErrorKind::Domain));
            }
            cells.push(Cell::Int(self.ws.sysvars.roll(n) + io));
        }
        Value::new(b.shape().clone(), cells).map_err(kerr)
    }

    /// A?B: A distinct draws from ⍳B
    fn deal(&mut self, a: &Value, b: &Value) -> Result<Value> {
        let ct = self.ws.sysvars.ct();
        let io = self.ws.sysvars.io();
        let count = a.to_int_scalar(ct).map_err(kerr)?;
        let pool_size = b.to_int_scalar(ct).map_err(kerr)?;
        if count < 0 || pool_size < 0 || count > pool_size {
            return Err(kerr(ErrorKind::Domain));
        }
        let mut pool: Vec<i64> = (0..pool_size).collect();
        let mut out = Vec::with_capacity(count as usize);
        for k in 0..count {
            let remaining = pool_size - k;
            let pick = self.ws.sysvars.roll(remaining) as usize;
            out.push(pool[pick] + io);
            pool.swap_remove(pick);
        }
        Ok(Value::int_vector(&out))
    }
}

/// Combine the frames of a dyadic rank application
fn pair_chunks(
    fa: apl_core::Shape,
    ca: Vec<Value>,
    fb: apl_core::Shape,
    cb: Vec<Value>,
) -> Result<(apl_core::Shape, Vec<(Value, Value)>)> {
    if fa.rank() == 0 && ca.len() == 1 {
        let a = ca.into_iter().next().expect("one chunk");
        let pairs = cb.into_iter().map(|b| (a.clone(), b)).collect();
        return Ok((fb, pairs));
    }
    if fb.rank() == 0 && cb.len() == 1 {
        let b = cb.into_iter().next().expect("one chunk");
        let pairs = ca.into_iter().map(|a| (a, b.clone())).collect();
        return Ok((fa, pairs));
    }
    if fa != fb {
        return Err(kerr(ErrorKind::Rank));
    }
    if ca.len() != cb.len() {
        return Err(kerr(ErrorKind::Length));
    }
    Ok((fa, ca.into_iter().zip(cb).collect()))
}

/// ⎕EC wrapping: (return code, ⎕ET, value)
fn ec_wrap(ws: &Workspace, result: Option<Value>) -> Value {
    let (rc, et, val) = match result {
        Some(v) => (1, Value::int_vector(&[0, 0]), v),
        None => match &ws.last_error {
            Some(_) => (0, ws.error_type(), ws.error_message()),
            None => (3, Value::int_vector(&[0, 0]), Value::empty_numeric()),
        },
    };
    Value::vector(vec![
        Cell::Int(rc),
        oper::value_to_cell(et),
        oper::value_to_cell(val),
    ])
}

/// Lines of text from a char matrix or a nested vector of char vectors
fn text_lines(v: &Value) -> Result<Vec<String>> {
    if v.rank() == 2 {
        let cols = v.shape()[1];
        let rows = v.shape()[0];
        let mut out = Vec::with_capacity(rows);
        for r in 0..rows {
            let mut line = String::new();
            for c in 0..cols {
                match v.cell(r * cols + c) {
                    Cell::Char(ch) => line.push(*ch),
                    _ => return Err(kerr(ErrorKind::Domain)),
                }
            }
            out.push(line.trim_end().to_string());
        }
        return Ok(out);
    }
    if v.rank() <= 1 {
        if v.is_char_array() {
            return Ok(vec![v.as_string().map_err(kerr)?]);
        }
        let mut out = Vec::with_capacity(v.element_count());
        for i in 0..v.element_count() {
            match v.cell(i) {
                Cell::Pointer(inner) => out.push(inner.as_string().map_err(kerr)?),
                _ => return Err(kerr(ErrorKind::Domain)),
            }
        }
        return Ok(out);
    }
    Err(kerr(ErrorKind::Rank))
}

/// A char matrix from text lines, padded with spaces
fn char_matrix(lines: &[String]) -> Value {
    let rows = lines.len();
    let width = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
    let mut cells = Vec::with_capacity(rows * width);
    for l in lines {
        let mut n = 0;
        for ch in l.chars() {
            cells.push(Cell::Char(ch));
            n += 1;
        }
        for _ in n..width {
            cells.push(Cell::Char(' '));
        }
    }
    Value::new(
        apl_core::Shape::new(vec![rows, width]).expect("rank 2"),
        cells,
    )
    .unwrap_or_else(|_| Value::empty_char())
}
