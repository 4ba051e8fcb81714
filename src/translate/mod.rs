//! # Translator
//!
//! Lowers a decoded [`Function`] into a slot-form [`Code`] graph.
//!
//! Two passes over the operations:
//!
//! 1. **Scan**: find block leaders (jump targets, fall-through points after
//!    branches, and the boundaries of protected ranges) and recognize each
//!    handler section's clause chain.
//! 2. **Lower**: walk the operations in byte order with a symbolic operand
//!    stack, emitting instructions into the block each leader opened.
//!
//! Operand-stack values that live across a block boundary are spilled into
//! hidden `$stack{i}` slots; the SSA builder later turns those into phis the
//! same way it does for named locals. A `for` over `range(...)` keeps its
//! iterator as a pair of hidden counter and bound slots, so the loop has the
//! same header/body/exit shape as a `while`.

pub mod translate_error;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::rc::Rc;

use tracing::{debug, instrument, trace};

use crate::bytecode::op::{BinOp, CmpOp, Instr, Op};
use crate::env::Env;
use crate::error::Result;
use crate::ir::{
    BlockId, CatchClause, Code, HandlerRegion, Inst, InstKind, Operand, RegionId, Terminator,
};
use crate::lang::function::{Function, FunctionWrapper, Globals};
use crate::lang::value::Value;
use crate::runtime::builtins::Builtin;
use translate_error::TranslateError;

/// Translate `func` into slot-form IR.
#[instrument(skip_all, fields(function = func.name()))]
pub fn translate(func: &FunctionWrapper, env: &mut Env) -> Result<Code> {
    let function = func.decode()?;
    let globals = function
        .host
        .globals()
        .ok_or_else(|| TranslateError::DetachedFunction {
            name: function.name.clone(),
        })?;

    let code = Translator::new(&function, env, globals).run()?;
    debug!(
        blocks = code.blocks.len(),
        insts = code.inst_count(),
        regions = code.regions.len(),
        "translated"
    );
    Ok(code)
}

fn stack_slot(i: usize) -> String {
    format!("$stack{}", i)
}

// =============================================================================
// Symbolic state
// =============================================================================

/// A `range(...)` iterator kept in two hidden slots.
#[derive(Debug, Clone, PartialEq)]
struct RangeIter {
    counter: String,
    stop: String,
    step: i64,
}

#[derive(Debug, Clone)]
enum Slot {
    Value(Operand),
    Range(RangeIter),
}

/// What a block expects on the operand stack when it is entered.
#[derive(Debug, Clone, PartialEq)]
enum Shape {
    Value,
    Range(RangeIter),
}

/// Translation-time block stack entry (`SETUP_LOOP` / `SETUP_EXCEPT`).
#[derive(Debug, Clone, PartialEq)]
enum Frame {
    Loop { end: usize, depth: usize },
    Except { region: RegionId },
}

#[derive(Debug, Clone)]
struct EntryState {
    shape: Vec<Shape>,
    frames: Vec<Frame>,
    /// Handler clause entry: the top slot is the in-flight exception.
    caught: bool,
}

struct Cursor {
    block: BlockId,
    stack: Vec<Slot>,
    frames: Vec<Frame>,
}

enum Flow {
    /// Keep filling the current block; this many ops were consumed.
    Continue(usize),
    /// The current block has its terminator.
    Ended,
}

fn shape_of(stack: &[Slot]) -> Vec<Shape> {
    stack
        .iter()
        .map(|s| match s {
            Slot::Value(_) => Shape::Value,
            Slot::Range(r) => Shape::Range(r.clone()),
        })
        .collect()
}

fn innermost_region(frames: &[Frame]) -> Option<RegionId> {
    frames.iter().rev().find_map(|f| match f {
        Frame::Except { region } => Some(*region),
        Frame::Loop { .. } => None,
    })
}

fn pop(cur: &mut Cursor, at: usize) -> std::result::Result<Slot, TranslateError> {
    cur.stack
        .pop()
        .ok_or(TranslateError::StackUnderflow { offset: at })
}

fn pop_value(cur: &mut Cursor, at: usize) -> std::result::Result<Operand, TranslateError> {
    match pop(cur, at)? {
        Slot::Value(v) => Ok(v),
        Slot::Range(_) => Err(TranslateError::unsupported(
            at,
            "range iterator used as a value",
        )),
    }
}

fn peek_value(cur: &Cursor, at: usize) -> std::result::Result<Operand, TranslateError> {
    match cur.stack.last() {
        Some(Slot::Value(v)) => Ok(v.clone()),
        Some(Slot::Range(_)) => Err(TranslateError::unsupported(
            at,
            "range iterator used as a value",
        )),
        None => Err(TranslateError::StackUnderflow { offset: at }),
    }
}

// =============================================================================
// Pass 1: scan
// =============================================================================

#[derive(Debug, Clone)]
struct ClausePattern {
    /// Exception class name and the offset of its `LOAD_GLOBAL`.
    exc_type: Option<(String, usize)>,
    body: usize,
    binding: Option<String>,
}

#[derive(Debug, Default)]
struct Scan {
    leaders: BTreeSet<usize>,
    /// Clause-test ops; dispatch replaces them.
    skipped: HashSet<usize>,
    /// Clause chains keyed by handler offset.
    chains: HashMap<usize, Vec<ClausePattern>>,
}

fn scan(ops: &[Instr]) -> std::result::Result<Scan, TranslateError> {
    let index: HashMap<usize, usize> = ops
        .iter()
        .enumerate()
        .map(|(i, ins)| (ins.offset, i))
        .collect();

    let mut out = Scan::default();
    if let Some(first) = ops.first() {
        out.leaders.insert(first.offset);
    }

    for ins in ops {
        if let Some(t) = ins.op.jump_target() {
            out.leaders.insert(t);
        }
        if ins.op.is_branch()
            || ins.op.ends_flow()
            || matches!(ins.op, Op::SetupExcept(_) | Op::PopBlock)
        {
            out.leaders.insert(ins.next_offset());
        }
    }

    for ins in ops {
        if let Op::SetupExcept(handler) = ins.op {
            let chain = scan_chain(ops, &index, handler, &mut out.skipped)?;
            out.chains.insert(handler, chain);
        }
    }

    out.leaders
        .retain(|o| index.contains_key(o) && !out.skipped.contains(o));
    Ok(out)
}

/// Recognize the clause tests of one handler section.
///
/// A typed clause is `DUP_TOP; LOAD_GLOBAL T; COMPARE_OP exception-match;
/// POP_JUMP_IF_FALSE next`, with its body right after. The chain ends at an
/// `END_FINALLY` (no clause matched) or at a bare `except:` body.
fn scan_chain(
    ops: &[Instr],
    index: &HashMap<usize, usize>,
    handler: usize,
    skipped: &mut HashSet<usize>,
) -> std::result::Result<Vec<ClausePattern>, TranslateError> {
    let binding_at = |i: usize| match ops.get(i).map(|ins| &ins.op) {
        Some(Op::StoreVar(name)) => Some(name.clone()),
        _ => None,
    };

    let mut clauses = Vec::new();
    let mut at = handler;
    loop {
        let i = *index.get(&at).ok_or_else(|| {
            TranslateError::unsupported(handler, "handler section outside the code")
        })?;

        if let [dup, load, test, jump, ..] = &ops[i..] {
            if let (Op::Dup, Op::LoadGlobal(name), Op::ExceptionMatch, Op::PopJumpIfFalse(next)) =
                (&dup.op, &load.op, &test.op, &jump.op)
            {
                if *next <= at {
                    return Err(TranslateError::unsupported(
                        jump.offset,
                        "except clause chain jumps backward",
                    ));
                }
                for ins in [dup, load, test, jump] {
                    skipped.insert(ins.offset);
                }
                clauses.push(ClausePattern {
                    exc_type: Some((name.clone(), load.offset)),
                    body: jump.next_offset(),
                    binding: binding_at(i + 4),
                });
                at = *next;
                continue;
            }
        }

        match ops[i].op {
            Op::EndFinally => {
                skipped.insert(at);
            }
            _ => clauses.push(ClausePattern {
                exc_type: None,
                body: at,
                binding: binding_at(i),
            }),
        }
        return Ok(clauses);
    }
}

// =============================================================================
// Pass 2: lower
// =============================================================================

struct Translator<'a> {
    func: &'a Function,
    env: &'a mut Env,
    globals: Rc<Globals>,
    code: Code,
    scan: Scan,
    /// Leader offset -> block.
    blocks: BTreeMap<usize, BlockId>,
    states: HashMap<usize, EntryState>,
    started: HashSet<usize>,
    /// Whether a synthetic block binds the parameters before offset 0.
    preheader: bool,
    cur: Option<Cursor>,
}

impl<'a> Translator<'a> {
    fn new(func: &'a Function, env: &'a mut Env, globals: Rc<Globals>) -> Self {
        Translator {
            func,
            env,
            globals,
            code: Code::new(func.name.clone(), func.params.clone()),
            scan: Scan::default(),
            blocks: BTreeMap::new(),
            states: HashMap::new(),
            started: HashSet::new(),
            preheader: false,
            cur: None,
        }
    }

    fn run(mut self) -> std::result::Result<Code, TranslateError> {
        let func = self.func;
        let ops = &func.ops;
        let first = ops
            .first()
            .map(|i| i.offset)
            .ok_or(TranslateError::FallsOffEnd { offset: 0 })?;

        self.scan = scan(ops)?;

        // a loop back to offset 0 needs somewhere else to bind parameters
        self.preheader = ops.iter().any(|i| i.op.jump_target() == Some(first));
        if self.preheader {
            let entry = self.code.add_block(None);
            self.code.entry = entry;
        }
        for &offset in &self.scan.leaders {
            let id = self.code.add_block(Some(offset));
            self.blocks.insert(offset, id);
        }

        if self.preheader {
            let entry = Cursor {
                block: self.code.entry,
                stack: Vec::new(),
                frames: Vec::new(),
            };
            self.bind_params(&entry);
            let target = self.record(first, Vec::new(), Vec::new(), first)?;
            self.finish(&entry, Terminator::Jump(target));
        } else {
            self.code.entry = *self
                .blocks
                .get(&first)
                .ok_or_else(|| TranslateError::unsupported(first, "function starts inside a handler"))?;
            self.record(first, Vec::new(), Vec::new(), first)?;
        }

        let mut i = 0;
        while i < ops.len() {
            let ins = &ops[i];
            if self.blocks.contains_key(&ins.offset) {
                self.enter_leader(ins.offset)?;
            }
            if self.scan.skipped.contains(&ins.offset) {
                i += 1;
                continue;
            }
            let Some(mut cur) = self.cur.take() else {
                i += 1;
                continue;
            };

            trace!(offset = ins.offset, op = ?ins.op, depth = cur.stack.len(), "lower");
            match self.lower(&mut cur, ins, ops.get(i + 1))? {
                Flow::Continue(n) => {
                    self.cur = Some(cur);
                    i += n;
                }
                Flow::Ended => i += 1,
            }
        }

        if self.cur.is_some() {
            let end = ops.last().map(|i| i.next_offset()).unwrap_or(0);
            return Err(TranslateError::FallsOffEnd { offset: end });
        }

        Ok(self.code)
    }

    // =========================================================================
    // Blocks and edges
    // =========================================================================

    fn enter_leader(&mut self, offset: usize) -> std::result::Result<(), TranslateError> {
        if let Some(cur) = self.cur.take() {
            self.jump_to(&cur, offset, offset)?;
        }
        self.started.insert(offset);

        match self.states.get(&offset).cloned() {
            Some(state) => self.start_block(offset, state),
            None => trace!(offset, "unreachable leader"),
        }
        Ok(())
    }

    fn start_block(&mut self, offset: usize, state: EntryState) {
        let block = self.blocks[&offset];
        self.code.block_mut(block).region = innermost_region(&state.frames);

        let mut cur = Cursor {
            block,
            stack: Vec::with_capacity(state.shape.len()),
            frames: state.frames,
        };

        if block == self.code.entry && !self.preheader {
            self.bind_params(&cur);
        }

        let last = state.shape.len().saturating_sub(1);
        for (i, shape) in state.shape.into_iter().enumerate() {
            let slot = match shape {
                Shape::Value if state.caught && i == last => {
                    Slot::Value(self.emit(&cur, InstKind::Caught))
                }
                Shape::Value => Slot::Value(self.emit(&cur, InstKind::Load(stack_slot(i)))),
                Shape::Range(r) => Slot::Range(r),
            };
            cur.stack.push(slot);
        }

        self.cur = Some(cur);
    }

    fn bind_params(&mut self, cur: &Cursor) {
        for (i, name) in self.func.params.iter().enumerate() {
            let v = self.emit(cur, InstKind::Param(i));
            self.emit_void(cur, InstKind::Store(name.clone(), v));
        }
    }

    /// Note that control reaches leader `target` in the given state.
    fn record(
        &mut self,
        target: usize,
        shape: Vec<Shape>,
        frames: Vec<Frame>,
        at: usize,
    ) -> std::result::Result<BlockId, TranslateError> {
        let block = *self
            .blocks
            .get(&target)
            .ok_or(TranslateError::FallsOffEnd { offset: at })?;

        match self.states.get(&target) {
            Some(prev) if prev.shape.len() != shape.len() => {
                return Err(TranslateError::StackMismatch {
                    offset: target,
                    expected: prev.shape.len(),
                    found: shape.len(),
                });
            }
            Some(_) => {}
            None if self.started.contains(&target) => {
                return Err(TranslateError::unsupported(
                    at,
                    "jump back into code not reachable from above",
                ));
            }
            None => {
                self.states.insert(
                    target,
                    EntryState {
                        shape,
                        frames,
                        caught: false,
                    },
                );
            }
        }
        Ok(block)
    }

    /// Store every value on the stack into its `$stack{i}` slot.
    fn spill(&mut self, cur: &Cursor) {
        for (i, slot) in cur.stack.iter().enumerate() {
            if let Slot::Value(v) = slot {
                self.emit_void(cur, InstKind::Store(stack_slot(i), v.clone()));
            }
        }
    }

    fn jump_to(
        &mut self,
        cur: &Cursor,
        target: usize,
        at: usize,
    ) -> std::result::Result<(), TranslateError> {
        self.spill(cur);
        let block = self.record(target, shape_of(&cur.stack), cur.frames.clone(), at)?;
        self.finish(cur, Terminator::Jump(block));
        Ok(())
    }

    fn finish(&mut self, cur: &Cursor, term: Terminator) {
        self.code.block_mut(cur.block).term = term;
    }

    fn emit(&mut self, cur: &Cursor, kind: InstKind) -> Operand {
        let v = self.code.new_value();
        self.code.block_mut(cur.block).insts.push(Inst {
            result: Some(v),
            kind,
        });
        Operand::Value(v)
    }

    fn emit_void(&mut self, cur: &Cursor, kind: InstKind) {
        self.code
            .block_mut(cur.block)
            .insts
            .push(Inst { result: None, kind });
    }

    /// Emit an instruction that may raise. Inside a protected range it ends
    /// the block, so the exception edge leaves from a block boundary.
    fn emit_raising(&mut self, cur: &mut Cursor, kind: InstKind) -> Operand {
        let v = self.emit(cur, kind);
        let block = self.code.block(cur.block);
        let region = block.region;
        if region.is_some() && block.insts.last().is_some_and(Inst::may_raise) {
            let next = self.code.add_block(None);
            self.code.block_mut(next).region = region;
            self.finish(cur, Terminator::Jump(next));
            cur.block = next;
        }
        v
    }

    fn resolve_global(&self, name: &str, at: usize) -> std::result::Result<Value, TranslateError> {
        let name = self.env.resolve_alias(name);
        self.globals
            .lookup(name)
            .ok_or_else(|| TranslateError::unresolved(name, at))
    }

    // =========================================================================
    // Operations
    // =========================================================================

    fn lower(
        &mut self,
        cur: &mut Cursor,
        ins: &Instr,
        next: Option<&Instr>,
    ) -> std::result::Result<Flow, TranslateError> {
        let at = ins.offset;

        match &ins.op {
            Op::Pop => {
                pop(cur, at)?;
            }
            Op::Dup => {
                let v = peek_value(cur, at)?;
                cur.stack.push(Slot::Value(v));
            }
            Op::RotTwo => {
                let n = cur.stack.len();
                if n < 2 {
                    return Err(TranslateError::StackUnderflow { offset: at });
                }
                cur.stack.swap(n - 1, n - 2);
            }

            Op::LoadConst(c) => cur.stack.push(Slot::Value(Operand::Const(Value::from(c)))),
            Op::LoadVar(name) => {
                let v = self.emit(cur, InstKind::Load(name.clone()));
                cur.stack.push(Slot::Value(v));
            }
            Op::StoreVar(name) => {
                let v = pop_value(cur, at)?;
                self.emit_void(cur, InstKind::Store(name.clone(), v));
            }
            Op::LoadGlobal(name) => {
                let v = self.resolve_global(name, at)?;
                cur.stack.push(Slot::Value(Operand::Const(v)));
            }

            Op::Binary(op) => {
                let b = pop_value(cur, at)?;
                let a = pop_value(cur, at)?;
                let r = self.emit_raising(cur, InstKind::Binary(*op, a, b));
                cur.stack.push(Slot::Value(r));
            }
            Op::Unary(op) => {
                let a = pop_value(cur, at)?;
                let r = self.emit_raising(cur, InstKind::Unary(*op, a));
                cur.stack.push(Slot::Value(r));
            }
            Op::Compare(op) => {
                let b = pop_value(cur, at)?;
                let a = pop_value(cur, at)?;
                let r = self.emit_raising(cur, InstKind::Compare(*op, a, b));
                cur.stack.push(Slot::Value(r));
            }
            Op::ExceptionMatch => {
                return Err(TranslateError::unsupported_with_hint(
                    at,
                    "exception match outside an except clause",
                    "clause tests must follow DUP_TOP; LOAD_GLOBAL at a handler entry",
                ));
            }

            Op::Call(argc) => {
                let mut args = Vec::with_capacity(*argc);
                for _ in 0..*argc {
                    args.push(pop_value(cur, at)?);
                }
                args.reverse();
                let callee = pop_value(cur, at)?;

                if callee == Operand::Const(Value::Builtin(Builtin::Range)) {
                    return match next.map(|n| &n.op) {
                        Some(Op::GetIter) => {
                            self.lower_range(cur, &args, at)?;
                            Ok(Flow::Continue(2))
                        }
                        _ => Err(TranslateError::unsupported_with_hint(
                            at,
                            "range() outside a for loop",
                            "range() is only supported as a for-loop iterable",
                        )),
                    };
                }

                let r = self.emit_raising(cur, InstKind::Call(callee, args));
                cur.stack.push(Slot::Value(r));
            }

            // ==================================================================
            // Control flow
            // ==================================================================
            Op::Jump(target) | Op::ContinueLoop(target) => {
                self.jump_to(cur, *target, at)?;
                return Ok(Flow::Ended);
            }
            Op::PopJumpIfFalse(target) => {
                let cond = pop_value(cur, at)?;
                self.branch(cur, cond, ins.next_offset(), *target, at)?;
                return Ok(Flow::Ended);
            }
            Op::PopJumpIfTrue(target) => {
                let cond = pop_value(cur, at)?;
                self.branch(cur, cond, *target, ins.next_offset(), at)?;
                return Ok(Flow::Ended);
            }
            Op::JumpIfFalseOrPop(target) => {
                self.branch_or_pop(cur, false, *target, ins.next_offset(), at)?;
                return Ok(Flow::Ended);
            }
            Op::JumpIfTrueOrPop(target) => {
                self.branch_or_pop(cur, true, *target, ins.next_offset(), at)?;
                return Ok(Flow::Ended);
            }

            Op::SetupLoop(end) => cur.frames.push(Frame::Loop {
                end: *end,
                depth: cur.stack.len(),
            }),
            Op::GetIter => {
                return Err(TranslateError::unsupported_with_hint(
                    at,
                    "iteration over a non-range value",
                    "only `for x in range(...)` loops are supported",
                ));
            }
            Op::ForIter(exit) => {
                self.lower_for_iter(cur, ins, *exit)?;
                return Ok(Flow::Ended);
            }
            Op::BreakLoop => {
                let (k, end, depth) = cur
                    .frames
                    .iter()
                    .enumerate()
                    .rev()
                    .find_map(|(k, f)| match f {
                        Frame::Loop { end, depth } => Some((k, *end, *depth)),
                        Frame::Except { .. } => None,
                    })
                    .ok_or_else(|| TranslateError::unsupported(at, "break outside a loop"))?;
                cur.frames.truncate(k);
                cur.stack.truncate(depth);
                self.jump_to(cur, end, at)?;
                return Ok(Flow::Ended);
            }

            Op::SetupExcept(handler) => self.setup_except(cur, *handler, at)?,
            Op::PopBlock => {
                let frame = cur.frames.pop().ok_or_else(|| {
                    TranslateError::unsupported(at, "POP_BLOCK without an active block")
                })?;
                if let Frame::Except { region } = frame {
                    let target = match next.map(|n| &n.op) {
                        Some(Op::Jump(t)) => *t,
                        _ => ins.next_offset(),
                    };
                    self.code.regions[region.index()].else_target =
                        self.blocks.get(&target).copied();
                }
            }
            Op::EndFinally => {
                let exc = pop_value(cur, at)?;
                self.finish(cur, Terminator::Reraise(exc));
                return Ok(Flow::Ended);
            }
            Op::Raise(0) => {
                let exc = self.emit(cur, InstKind::Caught);
                self.finish(cur, Terminator::Raise(exc));
                return Ok(Flow::Ended);
            }
            Op::Raise(_) => {
                let exc = pop_value(cur, at)?;
                self.finish(cur, Terminator::Raise(exc));
                return Ok(Flow::Ended);
            }

            Op::Return => {
                let v = pop_value(cur, at)?;
                self.finish(cur, Terminator::Return(v));
                return Ok(Flow::Ended);
            }
        }

        Ok(Flow::Continue(1))
    }

    fn branch(
        &mut self,
        cur: &Cursor,
        cond: Operand,
        then_off: usize,
        else_off: usize,
        at: usize,
    ) -> std::result::Result<(), TranslateError> {
        self.spill(cur);
        let shape = shape_of(&cur.stack);
        let then_block = self.record(then_off, shape.clone(), cur.frames.clone(), at)?;
        let else_block = self.record(else_off, shape, cur.frames.clone(), at)?;
        self.finish(
            cur,
            Terminator::Branch {
                cond,
                then_block,
                else_block,
            },
        );
        Ok(())
    }

    /// `JUMP_IF_{TRUE,FALSE}_OR_POP`: the jump keeps the tested value on the
    /// stack, the fall-through drops it.
    fn branch_or_pop(
        &mut self,
        cur: &Cursor,
        jump_if: bool,
        target: usize,
        fallthrough: usize,
        at: usize,
    ) -> std::result::Result<(), TranslateError> {
        let cond = peek_value(cur, at)?;
        self.spill(cur);

        let kept = shape_of(&cur.stack);
        let mut popped = kept.clone();
        popped.pop();

        let jump_block = self.record(target, kept, cur.frames.clone(), at)?;
        let fall_block = self.record(fallthrough, popped, cur.frames.clone(), at)?;
        let (then_block, else_block) = if jump_if {
            (jump_block, fall_block)
        } else {
            (fall_block, jump_block)
        };
        self.finish(
            cur,
            Terminator::Branch {
                cond,
                then_block,
                else_block,
            },
        );
        Ok(())
    }

    // =========================================================================
    // Loops
    // =========================================================================

    /// `range(...)` followed by `GET_ITER`: keep the iterator in two hidden
    /// slots.
    fn lower_range(
        &mut self,
        cur: &mut Cursor,
        args: &[Operand],
        at: usize,
    ) -> std::result::Result<(), TranslateError> {
        let (start, stop, step) = match args {
            [stop] => (Operand::Const(Value::Int(0)), stop.clone(), 1),
            [start, stop] => (start.clone(), stop.clone(), 1),
            [start, stop, Operand::Const(Value::Int(step))] if *step != 0 => {
                (start.clone(), stop.clone(), *step)
            }
            [_, _, _] => {
                return Err(TranslateError::unsupported_with_hint(
                    at,
                    "range() with a non-constant step",
                    "the step must be a non-zero integer literal",
                ));
            }
            _ => {
                return Err(TranslateError::unsupported(
                    at,
                    format!("range() with {} arguments", args.len()),
                ));
            }
        };

        let counter = self.env.fresh_name("iter");
        let stop_slot = format!("{}_stop", counter);
        self.emit_void(cur, InstKind::Store(counter.clone(), start));
        self.emit_void(cur, InstKind::Store(stop_slot.clone(), stop));

        cur.stack.push(Slot::Range(RangeIter {
            counter,
            stop: stop_slot,
            step,
        }));
        Ok(())
    }

    /// `FOR_ITER` over a range: test the counter against the bound, then in a
    /// fresh block push the current value and advance the counter.
    fn lower_for_iter(
        &mut self,
        cur: &mut Cursor,
        ins: &Instr,
        exit: usize,
    ) -> std::result::Result<(), TranslateError> {
        let at = ins.offset;
        let range = match cur.stack.last() {
            Some(Slot::Range(r)) => r.clone(),
            Some(Slot::Value(_)) => {
                return Err(TranslateError::unsupported(at, "FOR_ITER over a non-range value"));
            }
            None => return Err(TranslateError::StackUnderflow { offset: at }),
        };

        let counter = self.emit(cur, InstKind::Load(range.counter.clone()));
        let stop = self.emit(cur, InstKind::Load(range.stop.clone()));
        let test = if range.step > 0 { CmpOp::Lt } else { CmpOp::Gt };
        let more = self.emit_raising(cur, InstKind::Compare(test, counter.clone(), stop));

        self.spill(cur);
        let mut exit_shape = shape_of(&cur.stack);
        exit_shape.pop();
        let exit_block = self.record(exit, exit_shape, cur.frames.clone(), at)?;

        let advance = self.code.add_block(None);
        self.code.block_mut(advance).region = self.code.block(cur.block).region;
        self.finish(
            cur,
            Terminator::Branch {
                cond: more,
                then_block: advance,
                else_block: exit_block,
            },
        );

        cur.block = advance;
        let bumped = self.emit_raising(
            cur,
            InstKind::Binary(
                BinOp::Add,
                counter.clone(),
                Operand::Const(Value::Int(range.step)),
            ),
        );
        self.emit_void(cur, InstKind::Store(range.counter, bumped));
        cur.stack.push(Slot::Value(counter));
        self.jump_to(cur, ins.next_offset(), at)
    }

    // =========================================================================
    // Exceptions
    // =========================================================================

    /// Open a handler region and make each clause body an entry point that
    /// starts with the in-flight exception on the stack.
    fn setup_except(
        &mut self,
        cur: &mut Cursor,
        handler: usize,
        at: usize,
    ) -> std::result::Result<(), TranslateError> {
        let id = RegionId(self.code.regions.len() as u32);
        let parent = innermost_region(&cur.frames);
        let chain = self.scan.chains.get(&handler).cloned().unwrap_or_default();

        let mut shape = shape_of(&cur.stack);
        shape.push(Shape::Value);

        let mut clauses = Vec::with_capacity(chain.len());
        for pattern in chain {
            let exc_type = match &pattern.exc_type {
                None => None,
                Some((name, offset)) => match self.resolve_global(name, *offset)? {
                    Value::ExcType(kind) => Some(kind),
                    other => {
                        return Err(TranslateError::unsupported(
                            *offset,
                            format!("except clause on non-exception {}", other.repr()),
                        ));
                    }
                },
            };

            let target = *self
                .blocks
                .get(&pattern.body)
                .ok_or(TranslateError::FallsOffEnd { offset: handler })?;
            if self.states.contains_key(&pattern.body) {
                return Err(TranslateError::unsupported(
                    pattern.body,
                    "except clause body shared with other code",
                ));
            }
            self.states.insert(
                pattern.body,
                EntryState {
                    shape: shape.clone(),
                    frames: cur.frames.clone(),
                    caught: true,
                },
            );

            clauses.push(CatchClause {
                exc_type,
                target,
                binding: pattern.binding,
            });
        }

        trace!(region = id.0, handler, clauses = clauses.len(), at, "handler region");
        self.code.regions.push(HandlerRegion {
            id,
            parent,
            clauses,
            else_target: None,
            handler_offset: handler,
        });
        cur.frames.push(Frame::Except { region: id });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::asm::Assembler;
    use crate::bytecode::opcode::*;
    use crate::env::fresh_env;
    use crate::lang::exception::ExcKind;

    fn translate_asm(asm: &mut Assembler) -> Code {
        let module = Globals::new();
        let f = module.define_function(asm.finish().unwrap());
        translate(&f, &mut fresh_env()).unwrap()
    }

    fn translate_err(asm: &mut Assembler) -> crate::error::Error {
        let module = Globals::new();
        let f = module.define_function(asm.finish().unwrap());
        translate(&f, &mut fresh_env()).unwrap_err()
    }

    fn kinds(code: &Code, block: usize) -> Vec<InstKind> {
        code.blocks[block].insts.iter().map(|i| i.kind.clone()).collect()
    }

    #[test]
    fn test_straight_line_is_one_block() {
        let mut asm = Assembler::new("add", &["a", "b"]);
        asm.load_fast("a").load_fast("b").binary(BinOp::Add).ret();
        let code = translate_asm(&mut asm);

        assert_eq!(code.blocks.len(), 1);
        assert_eq!(code.entry, BlockId(0));
        assert_eq!(
            kinds(&code, 0)[..2],
            [
                InstKind::Param(0),
                InstKind::Store("a".to_string(), Operand::Value(crate::ir::ValueId(0)))
            ]
        );
        assert!(matches!(code.blocks[0].term, Terminator::Return(_)));
    }

    #[test]
    fn test_branch_creates_blocks_by_offset() {
        // if a: return 1 / return 2
        let mut asm = Assembler::new("f", &["a"]);
        let other = asm.label();
        asm.load_fast("a").jump_op(POP_JUMP_IF_FALSE, other);
        asm.load_const(1).ret();
        asm.bind(other);
        asm.load_const(2).ret();
        let code = translate_asm(&mut asm);

        assert_eq!(code.blocks.len(), 3);
        assert_eq!(code.blocks[1].offset, Some(6));
        assert_eq!(code.blocks[2].offset, Some(10));
        match &code.blocks[0].term {
            Terminator::Branch {
                then_block,
                else_block,
                ..
            } => {
                assert_eq!(*then_block, BlockId(1));
                assert_eq!(*else_block, BlockId(2));
            }
            other => panic!("expected branch, got {:?}", other),
        }
    }

    #[test]
    fn test_loop_to_offset_zero_gets_preheader() {
        // while a: a = a - 1  (loop header at offset 0)
        let mut asm = Assembler::new("f", &["a"]);
        let top = asm.label();
        let done = asm.label();
        asm.bind(top);
        asm.load_fast("a").jump_op(POP_JUMP_IF_FALSE, done);
        asm.load_fast("a").load_const(1).binary(BinOp::Sub).store_fast("a");
        asm.jump_op(JUMP_ABSOLUTE, top);
        asm.bind(done);
        asm.load_fast("a").ret();
        let code = translate_asm(&mut asm);

        assert_eq!(code.entry, BlockId(0));
        assert_eq!(code.blocks[0].offset, None);
        assert_eq!(code.blocks[0].term, Terminator::Jump(BlockId(1)));
        assert_eq!(code.blocks[1].offset, Some(0));
    }

    #[test]
    fn test_for_range_uses_hidden_counter() {
        let mut asm = Assembler::new("f", &["n"]);
        let end = asm.label();
        let top = asm.label();
        let exit = asm.label();
        asm.jump_op(SETUP_LOOP, end);
        asm.load_global("range").load_fast("n").call(1).op(GET_ITER);
        asm.bind(top);
        asm.jump_op(FOR_ITER, exit);
        asm.store_fast("i");
        asm.jump_op(JUMP_ABSOLUTE, top);
        asm.bind(exit);
        asm.op(POP_BLOCK);
        asm.bind(end);
        asm.load_none().ret();
        let code = translate_asm(&mut asm);

        let text = code.to_string();
        assert!(text.contains("store $iter0, 0"));
        assert!(text.contains("store $iter0_stop, %"));
        assert!(text.contains("load $iter0"));
        assert!(text.contains("cmp.lt"));
        assert!(!text.contains("call"));
    }

    #[test]
    fn test_range_outside_loop_rejected() {
        let mut asm = Assembler::new("f", &[]);
        asm.load_global("range").load_const(3).call(1).ret();
        let err = translate_err(&mut asm);
        assert!(err.to_string().contains("range() outside a for loop"));
    }

    #[test]
    fn test_unresolved_global() {
        let mut asm = Assembler::new("f", &[]);
        asm.load_global("nowhere").ret();
        let err = translate_err(&mut asm);
        assert!(matches!(
            err,
            crate::error::Error::Translate(TranslateError::UnresolvedGlobal { .. })
        ));
    }

    #[test]
    fn test_alias_resolves_global() {
        let module = Globals::new();
        let mut asm = Assembler::new("f", &[]);
        asm.load_global("Oops").load_const(1).call(1).raise(1);
        let f = module.define_function(asm.finish().unwrap());

        let mut env = fresh_env();
        env.alias("Oops", "ValueError");
        let code = translate(&f, &mut env).unwrap();
        assert!(code.to_string().contains("<class 'ValueError'>"));
    }

    /// try: a + b / except ValueError: 1 / except: 2 / else: 3
    fn try_except() -> Assembler {
        let mut asm = Assembler::new("f", &["a", "b"]);
        let handler = asm.label();
        let orelse = asm.label();
        let second = asm.label();
        let end = asm.label();

        asm.jump_op(SETUP_EXCEPT, handler);
        asm.load_fast("a").load_fast("b").binary(BinOp::Add).op(POP_TOP);
        asm.op(POP_BLOCK).jump_op(JUMP_FORWARD, orelse);
        asm.bind(handler);
        asm.except_clause("ValueError", second);
        asm.op(POP_TOP).load_const(1).ret();
        asm.bind(second);
        asm.op(POP_TOP).load_const(2).ret();
        asm.op(END_FINALLY);
        asm.bind(orelse);
        asm.load_const(3).ret();
        asm.bind(end);
        asm
    }

    #[test]
    fn test_handler_region_clauses() {
        let code = translate_asm(&mut try_except());

        assert_eq!(code.regions.len(), 1);
        let region = &code.regions[0];
        assert_eq!(region.clauses.len(), 2);
        assert_eq!(region.clauses[0].exc_type, Some(ExcKind::ValueError));
        assert_eq!(region.clauses[1].exc_type, None);
        assert!(region.else_target.is_some());

        for clause in &region.clauses {
            let head = &code.block(clause.target).insts[0];
            assert_eq!(head.kind, InstKind::Caught);
            assert_eq!(code.block(clause.target).region, None);
        }
    }

    #[test]
    fn test_raising_op_ends_protected_block() {
        let code = translate_asm(&mut try_except());

        let protected: Vec<_> = code.blocks.iter().filter(|b| b.region.is_some()).collect();
        let adder = protected
            .iter()
            .find(|b| b.insts.iter().any(|i| matches!(i.kind, InstKind::Binary(..))))
            .unwrap();
        assert!(matches!(adder.insts.last().unwrap().kind, InstKind::Binary(..)));
        assert!(matches!(adder.term, Terminator::Jump(_)));
        assert_eq!(code.exc_successors(adder.id).len(), 2);
    }

    #[test]
    fn test_protected_blocks_raise_only_at_their_end() {
        let code = translate_asm(&mut try_except());
        for b in code.blocks.iter().filter(|b| b.region.is_some()) {
            let body = b.insts.len().saturating_sub(1);
            assert!(b.insts[..body].iter().all(|i| !i.may_raise()), "{}", b);
        }
    }

    #[test]
    fn test_clause_tests_are_not_blocks() {
        let code = translate_asm(&mut try_except());
        let handler_offset = code.regions[0].handler_offset;
        assert!(code.blocks.iter().all(|b| b.offset != Some(handler_offset)));
    }

    #[test]
    fn test_translation_is_deterministic() {
        let a = translate_asm(&mut try_except()).to_string();
        let b = translate_asm(&mut try_except()).to_string();
        assert_eq!(a, b);
    }

    #[test]
    fn test_falls_off_end() {
        let mut asm = Assembler::new("f", &[]);
        asm.load_const(1).op(POP_TOP);
        let err = translate_err(&mut asm);
        assert!(matches!(
            err,
            crate::error::Error::Translate(TranslateError::FallsOffEnd { .. })
        ));
    }

    #[test]
    fn test_decode_error_surfaces() {
        let module = Globals::new();
        let mut raw = Assembler::new("f", &[]).finish().unwrap();
        raw.code = vec![3];
        let f = module.define_function(raw);
        let err = translate(&f, &mut fresh_env()).unwrap_err();
        assert!(matches!(err, crate::error::Error::Decode(_)));
    }
}
