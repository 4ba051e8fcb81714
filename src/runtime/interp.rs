//! # Interpreter
//!
//! Executes [`Code`] block by block. Slot-form and SSA code run on the same
//! loop: `load`/`store` go through the frame's named slots, phis pick their
//! input by the block control arrived from.
//!
//! Calls push a [`Frame`] on the interpreter's own call stack instead of
//! recursing on the host stack, so interpreted recursion depth is bounded by
//! [`InterpConfig::max_call_depth`] alone.
//!
//! Interpreted-program exceptions (explicit raises and operation faults)
//! unwind as [`Unwind::Raise`] and are dispatched through the handler regions
//! of each frame on the way out. Everything else is fatal.

use std::rc::Rc;

use tracing::{debug, instrument, trace};

use super::frame::{Cell, Frame};
use super::ops;
use super::runtime_error::InterpError;
use crate::env::{fresh_env, Env};
use crate::ir::{BlockId, Code, Inst, InstKind, Operand, Terminator};
use crate::lang::exception::{ExcKind, Exception};
use crate::lang::function::FunctionWrapper;
use crate::lang::value::Value;

#[derive(Debug, Clone)]
pub struct InterpConfig {
    pub max_call_depth: usize,
    pub max_steps: Option<usize>,
    /// Convert callee code to SSA before running it.
    pub ssa: bool,
}

impl Default for InterpConfig {
    fn default() -> Self {
        InterpConfig {
            max_call_depth: 1000,
            max_steps: None,
            ssa: true,
        }
    }
}

enum Unwind {
    /// Catchable by interpreted handlers.
    Raise(Rc<Exception>),
    Fatal(InterpError),
}

impl From<InterpError> for Unwind {
    fn from(e: InterpError) -> Self {
        Unwind::Fatal(e)
    }
}

/// How the top frame leaves a stretch of execution.
enum Step {
    Goto(BlockId),
    /// Suspend the frame and enter a callee.
    Call(Rc<Code>, Vec<Value>),
    Return(Value),
}

/// Run `code` with a fresh environment and default limits.
pub fn interpret(code: &Code, args: Vec<Value>) -> Result<Value, InterpError> {
    let mut env = fresh_env();
    Interpreter::new(&mut env, InterpConfig::default()).interpret(code, args)
}

pub struct Interpreter<'e> {
    env: &'e mut Env,
    config: InterpConfig,
    steps: usize,
}

impl<'e> Interpreter<'e> {
    pub fn new(env: &'e mut Env, config: InterpConfig) -> Self {
        Interpreter {
            env,
            config,
            steps: 0,
        }
    }

    /// Run `code` as the outermost call.
    #[instrument(skip_all, fields(function = %code.name, ssa = code.is_ssa))]
    pub fn interpret(&mut self, code: &Code, args: Vec<Value>) -> Result<Value, InterpError> {
        self.run(Rc::new(code.clone()), args)
    }

    /// Translate `func` (or reuse its cached code) and run it.
    #[instrument(skip_all, fields(function = func.name(), ssa = self.config.ssa))]
    pub fn call_function(
        &mut self,
        func: &FunctionWrapper,
        args: Vec<Value>,
    ) -> Result<Value, InterpError> {
        let code = self.env.code_for(func, self.config.ssa)?;
        self.run(code, args)
    }

    // =========================================================================
    // Call stack
    // =========================================================================

    fn run(&mut self, code: Rc<Code>, args: Vec<Value>) -> Result<Value, InterpError> {
        let mut frames: Vec<Frame> = Vec::new();
        self.push_frame(&mut frames, code, args)?;

        loop {
            let Some(frame) = frames.last_mut() else {
                return Err(InterpError::internal("empty call stack"));
            };
            match self.step(frame) {
                Ok(Step::Goto(target)) => frame.goto(target),
                Ok(Step::Call(callee, args)) => self.push_frame(&mut frames, callee, args)?,
                Ok(Step::Return(v)) => {
                    frames.pop();
                    match frames.last_mut() {
                        Some(caller) => caller.resume(v),
                        None => {
                            debug!(steps = self.steps, "returned");
                            return Ok(v);
                        }
                    }
                }
                Err(Unwind::Raise(exc)) => unwind(&mut frames, exc)?,
                Err(Unwind::Fatal(e)) => return Err(e),
            }
        }
    }

    fn push_frame(
        &self,
        frames: &mut Vec<Frame>,
        code: Rc<Code>,
        args: Vec<Value>,
    ) -> Result<(), InterpError> {
        if args.len() != code.params.len() {
            return Err(InterpError::Arity {
                function: code.name.clone(),
                expected: code.params.len(),
                got: args.len(),
            });
        }

        let depth = frames.len() + 1;
        if depth > self.config.max_call_depth {
            return Err(InterpError::StackDepthExceeded {
                limit: self.config.max_call_depth,
                function: code.name.clone(),
            });
        }
        trace!(function = %code.name, depth, "enter");

        frames.push(Frame::new(code, args));
        Ok(())
    }

    /// Run the top frame from where it stands to its next block transfer,
    /// call or return.
    fn step(&mut self, frame: &mut Frame) -> Result<Step, Unwind> {
        let code = Rc::clone(&frame.code);
        let block = code.block(frame.block);

        // phis read their inputs all at once, on entry
        if frame.pc == 0 {
            trace!(block = %block.id, "block");
            let heads = block.insts.iter().take_while(|i| i.is_phi()).count();
            let mut incoming = Vec::with_capacity(heads);
            for inst in &block.insts[..heads] {
                let InstKind::Phi(var, inputs) = &inst.kind else {
                    continue;
                };
                let prev = frame.prev.ok_or_else(|| {
                    InterpError::internal(format!("phi for `{}` in entry block {}", var, block.id))
                })?;
                let op = inputs
                    .iter()
                    .find(|(b, _)| *b == prev)
                    .map(|(_, op)| op)
                    .ok_or_else(|| {
                        InterpError::internal(format!(
                            "phi for `{}` in {} has no input from {}",
                            var, block.id, prev
                        ))
                    })?;
                incoming.push((inst.result, self.cell(frame, op)?));
            }
            for (result, cell) in incoming {
                if let Some(r) = result {
                    frame.set_value(r, cell);
                }
            }
            frame.pc = heads;
        }

        while let Some(inst) = block.insts.get(frame.pc) {
            frame.pc += 1;
            self.tick()?;
            if let Some(call) = self.exec(frame, inst)? {
                return Ok(call);
            }
        }

        self.tick()?;
        match &block.term {
            Terminator::Jump(t) => Ok(Step::Goto(*t)),
            Terminator::Branch {
                cond,
                then_block,
                else_block,
            } => {
                let c = self.operand(frame, cond)?;
                Ok(Step::Goto(if c.is_truthy() {
                    *then_block
                } else {
                    *else_block
                }))
            }
            Terminator::Return(op) => Ok(Step::Return(self.operand(frame, op)?)),
            Terminator::Raise(op) | Terminator::Reraise(op) => {
                let v = self.operand(frame, op)?;
                Err(Unwind::Raise(to_exception(v)))
            }
            Terminator::Unreachable => Err(InterpError::internal(format!(
                "reached unreachable block {}",
                block.id
            ))
            .into()),
        }
    }

    fn tick(&mut self) -> Result<(), Unwind> {
        self.steps += 1;
        match self.config.max_steps {
            Some(limit) if self.steps > limit => {
                Err(InterpError::StepLimitExceeded { limit }.into())
            }
            _ => Ok(()),
        }
    }

    // =========================================================================
    // Instructions
    // =========================================================================

    /// Execute one instruction. A call to an interpreted function suspends
    /// the frame and comes back as [`Step::Call`].
    fn exec(&mut self, frame: &mut Frame, inst: &Inst) -> Result<Option<Step>, Unwind> {
        let cell = match &inst.kind {
            InstKind::Param(i) => {
                let v = frame
                    .arg(*i)
                    .cloned()
                    .ok_or_else(|| InterpError::internal(format!("missing argument {}", i)))?;
                Cell::Set(v)
            }
            InstKind::Load(var) => frame.slot(var),
            InstKind::Store(var, op) => {
                let cell = self.cell(frame, op)?;
                frame.set_slot(var, cell);
                return Ok(None);
            }
            InstKind::Binary(op, a, b) => {
                let a = self.operand(frame, a)?;
                let b = self.operand(frame, b)?;
                Cell::Set(ops::binary(*op, &a, &b).map_err(raise)?)
            }
            InstKind::Unary(op, a) => {
                let a = self.operand(frame, a)?;
                Cell::Set(ops::unary(*op, &a).map_err(raise)?)
            }
            InstKind::Compare(op, a, b) => {
                let a = self.operand(frame, a)?;
                let b = self.operand(frame, b)?;
                Cell::Set(ops::compare(*op, &a, &b).map_err(raise)?)
            }
            InstKind::Call(callee, args) => {
                let callee = self.operand(frame, callee)?;
                let args = args
                    .iter()
                    .map(|a| self.operand(frame, a))
                    .collect::<Result<Vec<_>, _>>()?;
                if let Value::Function(f) = &callee {
                    let code = self
                        .env
                        .code_for(f, self.config.ssa)
                        .map_err(InterpError::from)?;
                    frame.pending = inst.result;
                    return Ok(Some(Step::Call(code, args)));
                }
                Cell::Set(call_native(&callee, args)?)
            }
            InstKind::Caught => match &frame.exception {
                Some(exc) => Cell::Set(Value::Exception(exc.clone())),
                None => {
                    return Err(raise(Exception::with_message(
                        ExcKind::RuntimeError,
                        "No active exception to reraise",
                    )));
                }
            },
            InstKind::Phi(var, _) => {
                return Err(InterpError::internal(format!(
                    "phi for `{}` after the head of {}",
                    var, frame.block
                ))
                .into());
            }
        };

        if let Some(r) = inst.result {
            frame.set_value(r, cell);
        }
        Ok(None)
    }

    // =========================================================================
    // Operands
    // =========================================================================

    /// Read an operand without consuming it: undefined stays undefined.
    fn cell(&self, frame: &Frame, op: &Operand) -> Result<Cell, Unwind> {
        match op {
            Operand::Const(v) => Ok(Cell::Set(v.clone())),
            Operand::Undef => Ok(Cell::Undef),
            Operand::Value(v) => match frame.value(*v) {
                Cell::Empty => Err(InterpError::internal(format!(
                    "{} read before it was computed",
                    v
                ))
                .into()),
                cell => Ok(cell.clone()),
            },
        }
    }

    /// Read an operand for use by an operation.
    fn operand(&self, frame: &Frame, op: &Operand) -> Result<Value, Unwind> {
        match self.cell(frame, op)? {
            Cell::Set(v) => Ok(v),
            _ => Err(raise(Exception::with_message(
                ExcKind::UnboundLocalError,
                "local variable referenced before assignment",
            ))),
        }
    }
}

/// Pass `exc` outward until a frame's handler regions accept it. Frames
/// without a matching clause are discarded.
fn unwind(frames: &mut Vec<Frame>, exc: Rc<Exception>) -> Result<(), InterpError> {
    let traceback = call_stack(frames);
    while let Some(frame) = frames.last_mut() {
        if let Some(handler) = frame.code.dispatch(frame.block, &exc) {
            trace!(exception = %exc, from = %frame.block, to = %handler, "dispatch");
            frame.pending = None;
            frame.exception = Some(exc);
            frame.goto(handler);
            return Ok(());
        }
        frames.pop();
    }

    debug!(exception = %exc, "uncaught exception");
    Err(InterpError::Uncaught {
        exception: exc,
        traceback,
    })
}

/// Function names from the innermost frame outward.
fn call_stack(frames: &[Frame]) -> Vec<String> {
    frames.iter().rev().map(|f| f.code.name.clone()).collect()
}

/// Builtins and exception classes run to completion without a frame.
fn call_native(callee: &Value, args: Vec<Value>) -> Result<Value, Unwind> {
    match callee {
        Value::Builtin(b) => b.call(&args).map_err(raise),
        Value::ExcType(kind) => Ok(Value::Exception(Rc::new(Exception::new(*kind, args)))),
        other => Err(raise(ops::type_error(format!(
            "'{}' object is not callable",
            other.type_name()
        )))),
    }
}

fn raise(exc: impl Into<Rc<Exception>>) -> Unwind {
    Unwind::Raise(exc.into())
}

/// What `raise v` actually throws.
fn to_exception(v: Value) -> Rc<Exception> {
    match v {
        Value::Exception(e) => e,
        Value::ExcType(kind) => Rc::new(Exception::new(kind, vec![])),
        other => Rc::new(ops::type_error(format!(
            "exceptions must derive from BaseException, not {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::asm::Assembler;
    use crate::bytecode::op::{BinOp, CmpOp};
    use crate::bytecode::opcode::*;
    use crate::lang::function::Globals;

    fn run_with(asm: &mut Assembler, args: Vec<Value>, config: InterpConfig) -> Result<Value, InterpError> {
        let module = Globals::new();
        let f = module.define_function(asm.finish().unwrap());
        let mut env = fresh_env();
        Interpreter::new(&mut env, config).call_function(&f, args)
    }

    fn run_both(asm: &mut Assembler, args: Vec<Value>) -> Value {
        let ssa = run_with(asm, args.clone(), InterpConfig::default()).unwrap();
        let plain = run_with(
            asm,
            args,
            InterpConfig {
                ssa: false,
                ..InterpConfig::default()
            },
        )
        .unwrap();
        assert_eq!(ssa, plain);
        ssa
    }

    fn assert_uncaught(r: Result<Value, InterpError>, kind: ExcKind) {
        match r {
            Err(InterpError::Uncaught { exception, .. }) => assert_eq!(exception.kind, kind),
            other => panic!("expected uncaught {}, got {:?}", kind, other),
        }
    }

    #[test]
    fn test_arithmetic() {
        let mut asm = Assembler::new("f", &["a", "b"]);
        asm.load_fast("a").load_fast("b").binary(BinOp::Mul).load_const(1).binary(BinOp::Sub).ret();
        assert_eq!(run_both(&mut asm, vec![Value::Int(6), Value::Int(7)]), Value::Int(41));
    }

    #[test]
    fn test_short_circuit_and() {
        // return a and b
        let mut asm = Assembler::new("f", &["a", "b"]);
        let end = asm.label();
        asm.load_fast("a").jump_op(JUMP_IF_FALSE_OR_POP, end);
        asm.load_fast("b");
        asm.bind(end);
        asm.ret();
        assert_eq!(run_both(&mut asm, vec![Value::Int(0), Value::Int(5)]), Value::Int(0));
        assert_eq!(run_both(&mut asm, vec![Value::Int(3), Value::Int(5)]), Value::Int(5));
    }

    #[test]
    fn test_unbound_local_raises() {
        // if a: x = 1; return x
        let mut asm = Assembler::new("f", &["a"]);
        let join = asm.label();
        asm.load_fast("a").jump_op(POP_JUMP_IF_FALSE, join);
        asm.load_const(1).store_fast("x");
        asm.bind(join);
        asm.load_fast("x").ret();

        assert_eq!(run_both(&mut asm, vec![Value::Bool(true)]), Value::Int(1));
        for ssa in [true, false] {
            let config = InterpConfig {
                ssa,
                ..InterpConfig::default()
            };
            assert_uncaught(
                run_with(&mut asm, vec![Value::Bool(false)], config),
                ExcKind::UnboundLocalError,
            );
        }
    }

    #[test]
    fn test_fault_caught_by_handler() {
        // try: return a / b / except ZeroDivisionError: return -1
        let mut asm = Assembler::new("f", &["a", "b"]);
        let handler = asm.label();
        let next = asm.label();
        asm.jump_op(SETUP_EXCEPT, handler);
        asm.load_fast("a").load_fast("b").binary(BinOp::Div).ret();
        asm.bind(handler);
        asm.except_clause("ZeroDivisionError", next);
        asm.op(POP_TOP).load_const(-1).ret();
        asm.bind(next);
        asm.op(END_FINALLY);

        assert_eq!(run_both(&mut asm, vec![Value::Int(7), Value::Int(2)]), Value::Int(3));
        assert_eq!(run_both(&mut asm, vec![Value::Int(7), Value::Int(0)]), Value::Int(-1));
        assert_uncaught(
            run_with(&mut asm, vec![Value::Int(7), Value::from("x")], InterpConfig::default()),
            ExcKind::TypeError,
        );
    }

    #[test]
    fn test_bare_raise_without_exception() {
        let mut asm = Assembler::new("f", &[]);
        asm.raise(0);
        assert_uncaught(run_with(&mut asm, vec![], InterpConfig::default()), ExcKind::RuntimeError);
    }

    #[test]
    fn test_raise_non_exception() {
        let mut asm = Assembler::new("f", &[]);
        asm.load_const(3).raise(1);
        assert_uncaught(run_with(&mut asm, vec![], InterpConfig::default()), ExcKind::TypeError);
    }

    #[test]
    fn test_arity_mismatch() {
        let mut asm = Assembler::new("f", &["a"]);
        asm.load_fast("a").ret();
        let err = run_with(&mut asm, vec![], InterpConfig::default()).unwrap_err();
        assert!(matches!(err, InterpError::Arity { expected: 1, got: 0, .. }));
    }

    #[test]
    fn test_step_limit() {
        // while True: pass
        let mut asm = Assembler::new("spin", &[]);
        let top = asm.label();
        asm.bind(top);
        asm.load_const(true).jump_op(POP_JUMP_IF_FALSE, top);
        asm.jump_op(JUMP_ABSOLUTE, top);
        let config = InterpConfig {
            max_steps: Some(100),
            ..InterpConfig::default()
        };
        let err = run_with(&mut asm, vec![], config).unwrap_err();
        assert!(matches!(err, InterpError::StepLimitExceeded { limit: 100 }));
    }

    #[test]
    fn test_call_depth_limit() {
        // def down(n): return down(n - 1)
        let mut asm = Assembler::new("down", &["n"]);
        asm.load_global("down").load_fast("n").load_const(1).binary(BinOp::Sub).call(1).ret();
        let config = InterpConfig {
            max_call_depth: 20,
            ..InterpConfig::default()
        };
        let err = run_with(&mut asm, vec![Value::Int(0)], config).unwrap_err();
        assert!(matches!(err, InterpError::StackDepthExceeded { limit: 20, .. }));
    }

    /// def down(n):
    ///     if n <= 0: return 0
    ///     return down(n - 1)
    fn countdown() -> Assembler {
        let mut asm = Assembler::new("down", &["n"]);
        let rec = asm.label();
        asm.load_fast("n").load_const(0).compare(CmpOp::Le);
        asm.jump_op(POP_JUMP_IF_FALSE, rec);
        asm.load_const(0).ret();
        asm.bind(rec);
        asm.load_global("down").load_fast("n").load_const(1).binary(BinOp::Sub).call(1).ret();
        asm
    }

    #[test]
    fn test_recursion_up_to_default_depth_limit() {
        let limit = InterpConfig::default().max_call_depth;
        // down(n) occupies n + 1 frames
        for n in [limit as i64 - 2, limit as i64 - 1] {
            let r = run_with(&mut countdown(), vec![Value::Int(n)], InterpConfig::default());
            assert_eq!(r.unwrap(), Value::Int(0), "n={}", n);
        }
    }

    #[test]
    fn test_recursion_past_default_depth_limit() {
        let limit = InterpConfig::default().max_call_depth;
        let err = run_with(&mut countdown(), vec![Value::Int(limit as i64)], InterpConfig::default())
            .unwrap_err();
        match err {
            InterpError::StackDepthExceeded { limit: l, function } => {
                assert_eq!(l, limit);
                assert_eq!(function, "down");
            }
            other => panic!("expected StackDepthExceeded, got {:?}", other),
        }
    }

    #[test]
    fn test_callee_result_lands_in_suspended_frame() {
        // def sq(x): return x * x
        // def f(a): return sq(a) + sq(a + 1)
        let module = Globals::new();
        let mut sq = Assembler::new("sq", &["x"]);
        sq.load_fast("x").load_fast("x").binary(BinOp::Mul).ret();
        module.define_function(sq.finish().unwrap());
        let mut f = Assembler::new("f", &["a"]);
        f.load_global("sq").load_fast("a").call(1);
        f.load_global("sq").load_fast("a").load_const(1).binary(BinOp::Add).call(1);
        f.binary(BinOp::Add).ret();
        let f = module.define_function(f.finish().unwrap());

        let mut env = fresh_env();
        let r = Interpreter::new(&mut env, InterpConfig::default()).call_function(&f, vec![Value::Int(3)]);
        assert_eq!(r.unwrap(), Value::Int(25));
    }

    #[test]
    fn test_builtin_and_exception_calls() {
        // return len(str(a))
        let mut asm = Assembler::new("f", &["a"]);
        asm.load_global("len").load_global("str").load_fast("a").call(1).call(1).ret();
        assert_eq!(run_both(&mut asm, vec![Value::Int(12345)]), Value::Int(5));
    }

    #[test]
    fn test_uncaught_traceback_names_frames() {
        let module = Globals::new();
        let mut inner = Assembler::new("inner", &[]);
        inner.load_global("ValueError").load_const(1).call(1).raise(1);
        module.define_function(inner.finish().unwrap());
        let mut outer = Assembler::new("outer", &[]);
        outer.load_global("inner").call(0).ret();
        let f = module.define_function(outer.finish().unwrap());

        let mut env = fresh_env();
        let err = Interpreter::new(&mut env, InterpConfig::default())
            .call_function(&f, vec![])
            .unwrap_err();
        match err {
            InterpError::Uncaught { traceback, .. } => {
                assert_eq!(traceback, vec!["inner".to_string(), "outer".to_string()])
            }
            other => panic!("expected uncaught, got {:?}", other),
        }
    }

    #[test]
    fn test_top_level_interpret_on_slot_form() {
        let mut asm = Assembler::new("cmp", &["a", "b"]);
        asm.load_fast("a").load_fast("b").compare(CmpOp::Lt).ret();
        let module = Globals::new();
        let f = module.define_function(asm.finish().unwrap());
        let code = crate::translate::translate(&f, &mut fresh_env()).unwrap();
        assert_eq!(interpret(&code, vec![Value::Int(5), Value::Int(6)]).unwrap(), Value::Bool(true));
    }
}
