use std::rc::Rc;

use indexmap::IndexMap;

use crate::ir::{BlockId, Code, ValueId};
use crate::lang::exception::Exception;
use crate::lang::value::Value;

/// Contents of a value or slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Cell {
    /// Not computed yet.
    #[default]
    Empty,
    /// A local read before assignment. Copying it is fine; consuming it
    /// raises `UnboundLocalError`.
    Undef,
    Set(Value),
}

/// Activation record of one interpreted call.
///
/// Frames live on the interpreter's own call stack, so a call suspends its
/// frame mid-block: `pc` is where execution picks up again and `pending`
/// receives the callee's return value.
#[derive(Debug)]
pub struct Frame {
    pub code: Rc<Code>,
    pub block: BlockId,
    /// Block control arrived from; selects phi inputs.
    pub prev: Option<BlockId>,
    /// Next instruction of `block`. Zero until the block's phis are read.
    pub pc: usize,
    /// Result of the call this frame is suspended on.
    pub pending: Option<ValueId>,
    values: Vec<Cell>,
    slots: IndexMap<String, Cell>,
    args: Vec<Value>,
    /// Exception being handled, bound on dispatch to a handler.
    pub exception: Option<Rc<Exception>>,
}

impl Frame {
    pub fn new(code: Rc<Code>, args: Vec<Value>) -> Self {
        Frame {
            block: code.entry,
            prev: None,
            pc: 0,
            pending: None,
            values: vec![Cell::Empty; code.next_value as usize],
            slots: IndexMap::new(),
            args,
            exception: None,
            code,
        }
    }

    pub fn arg(&self, i: usize) -> Option<&Value> {
        self.args.get(i)
    }

    pub fn value(&self, v: ValueId) -> &Cell {
        self.values.get(v.index()).unwrap_or(&Cell::Empty)
    }

    pub fn set_value(&mut self, v: ValueId, cell: Cell) {
        let i = v.index();
        if i >= self.values.len() {
            self.values.resize(i + 1, Cell::Empty);
        }
        self.values[i] = cell;
    }

    pub fn slot(&self, name: &str) -> Cell {
        self.slots.get(name).cloned().unwrap_or(Cell::Undef)
    }

    pub fn set_slot(&mut self, name: &str, cell: Cell) {
        self.slots.insert(name.to_string(), cell);
    }

    pub fn goto(&mut self, target: BlockId) {
        self.prev = Some(self.block);
        self.block = target;
        self.pc = 0;
    }

    /// Deliver a callee's return value to the suspended call.
    pub fn resume(&mut self, ret: Value) {
        if let Some(r) = self.pending.take() {
            self.set_value(r, Cell::Set(ret));
        }
    }
}
