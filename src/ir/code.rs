use crate::bytecode::op::{BinOp, CmpOp, UnaryOp};
use crate::lang::exception::{ExcKind, Exception};
use crate::lang::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(pub u32);

impl RegionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Const(Value),
    Value(ValueId),
    /// A slot read before any assignment reaches it.
    Undef,
}

impl Operand {
    pub fn as_value(&self) -> Option<ValueId> {
        match self {
            Operand::Value(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    /// The `n`th positional argument.
    Param(usize),
    /// Read a named slot (non-SSA only).
    Load(String),
    /// Write a named slot (non-SSA only).
    Store(String, Operand),
    Binary(BinOp, Operand, Operand),
    Unary(UnaryOp, Operand),
    Compare(CmpOp, Operand, Operand),
    Call(Operand, Vec<Operand>),
    /// The in-flight exception, at the head of a handler clause.
    Caught,
    /// Value of slot `var` selected by the predecessor control came from.
    Phi(String, Vec<(BlockId, Operand)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    pub result: Option<ValueId>,
    pub kind: InstKind,
}

impl Inst {
    pub fn operands(&self) -> Vec<&Operand> {
        match &self.kind {
            InstKind::Param(_) | InstKind::Load(_) | InstKind::Caught => vec![],
            InstKind::Store(_, a) | InstKind::Unary(_, a) => vec![a],
            InstKind::Binary(_, a, b) | InstKind::Compare(_, a, b) => vec![a, b],
            InstKind::Call(callee, args) => {
                let mut ops = vec![callee];
                ops.extend(args.iter());
                ops
            }
            InstKind::Phi(_, incoming) => incoming.iter().map(|(_, op)| op).collect(),
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match &mut self.kind {
            InstKind::Param(_) | InstKind::Load(_) | InstKind::Caught => vec![],
            InstKind::Store(_, a) | InstKind::Unary(_, a) => vec![a],
            InstKind::Binary(_, a, b) | InstKind::Compare(_, a, b) => vec![a, b],
            InstKind::Call(callee, args) => {
                let mut ops = vec![callee];
                ops.extend(args.iter_mut());
                ops
            }
            InstKind::Phi(_, incoming) => incoming.iter_mut().map(|(_, op)| op).collect(),
        }
    }

    pub fn is_phi(&self) -> bool {
        matches!(self.kind, InstKind::Phi(..))
    }

    /// Instructions that can raise an interpreted-program exception.
    pub fn may_raise(&self) -> bool {
        matches!(
            self.kind,
            InstKind::Binary(..) | InstKind::Unary(..) | InstKind::Compare(..) | InstKind::Call(..)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Jump(BlockId),
    Branch {
        cond: Operand,
        then_block: BlockId,
        else_block: BlockId,
    },
    Return(Operand),
    Raise(Operand),
    /// Re-raise the exception a handler chain could not match.
    Reraise(Operand),
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Jump(t) => vec![*t],
            Terminator::Branch {
                then_block,
                else_block,
                ..
            } => {
                if then_block == else_block {
                    vec![*then_block]
                } else {
                    vec![*then_block, *else_block]
                }
            }
            Terminator::Return(_)
            | Terminator::Raise(_)
            | Terminator::Reraise(_)
            | Terminator::Unreachable => vec![],
        }
    }

    pub fn operand(&self) -> Option<&Operand> {
        match self {
            Terminator::Branch { cond, .. } => Some(cond),
            Terminator::Return(op) | Terminator::Raise(op) | Terminator::Reraise(op) => Some(op),
            Terminator::Jump(_) | Terminator::Unreachable => None,
        }
    }

    pub fn operand_mut(&mut self) -> Option<&mut Operand> {
        match self {
            Terminator::Branch { cond, .. } => Some(cond),
            Terminator::Return(op) | Terminator::Raise(op) | Terminator::Reraise(op) => Some(op),
            Terminator::Jump(_) | Terminator::Unreachable => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: BlockId,
    /// Byte offset of the leader this block was cut at; `None` for
    /// synthetic blocks.
    pub offset: Option<usize>,
    pub insts: Vec<Inst>,
    pub term: Terminator,
    /// Innermost handler region protecting this block.
    pub region: Option<RegionId>,
}

impl Block {
    pub fn new(id: BlockId, offset: Option<usize>) -> Self {
        Block {
            id,
            offset,
            insts: Vec::new(),
            term: Terminator::Unreachable,
            region: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    /// `None` for a bare `except:`.
    pub exc_type: Option<ExcKind>,
    pub target: BlockId,
    /// Slot the clause body stores the exception into, if any.
    pub binding: Option<String>,
}

impl CatchClause {
    pub fn matches(&self, exc: &Exception) -> bool {
        match self.exc_type {
            None => true,
            Some(kind) => exc.is_instance(kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandlerRegion {
    pub id: RegionId,
    pub parent: Option<RegionId>,
    /// Tested in order; the first match wins.
    pub clauses: Vec<CatchClause>,
    /// Where control goes when the protected range completes normally.
    pub else_target: Option<BlockId>,
    pub handler_offset: usize,
}

impl HandlerRegion {
    pub fn has_catch_all(&self) -> bool {
        self.clauses.iter().any(|c| c.exc_type.is_none())
    }
}

/// One translated function.
#[derive(Debug, Clone, PartialEq)]
pub struct Code {
    pub name: String,
    pub params: Vec<String>,
    pub entry: BlockId,
    /// Indexed by `BlockId`.
    pub blocks: Vec<Block>,
    /// Indexed by `RegionId`.
    pub regions: Vec<HandlerRegion>,
    pub next_value: u32,
    pub is_ssa: bool,
}

impl Code {
    pub fn new(name: impl Into<String>, params: Vec<String>) -> Self {
        Code {
            name: name.into(),
            params,
            entry: BlockId(0),
            blocks: Vec::new(),
            regions: Vec::new(),
            next_value: 0,
            is_ssa: false,
        }
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    pub fn region(&self, id: RegionId) -> &HandlerRegion {
        &self.regions[id.index()]
    }

    pub fn add_block(&mut self, offset: Option<usize>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::new(id, offset));
        id
    }

    pub fn new_value(&mut self) -> ValueId {
        let v = ValueId(self.next_value);
        self.next_value += 1;
        v
    }

    /// Regions enclosing `region`, innermost first.
    pub fn region_chain(&self, region: Option<RegionId>) -> Vec<RegionId> {
        let mut chain = Vec::new();
        let mut cur = region;
        while let Some(r) = cur {
            chain.push(r);
            cur = self.region(r).parent;
        }
        chain
    }

    /// Handler entries an exception leaving `id` may reach, in dispatch
    /// order. Regions outside one with a catch-all clause are never reached.
    pub fn exc_successors(&self, id: BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        for r in self.region_chain(self.block(id).region) {
            let region = self.region(r);
            for clause in &region.clauses {
                if !out.contains(&clause.target) {
                    out.push(clause.target);
                }
            }
            if region.has_catch_all() {
                break;
            }
        }
        out
    }

    /// Normal successors followed by exceptional ones, without duplicates.
    pub fn successors(&self, id: BlockId) -> Vec<BlockId> {
        let mut out = self.block(id).term.successors();
        for t in self.exc_successors(id) {
            if !out.contains(&t) {
                out.push(t);
            }
        }
        out
    }

    /// Predecessor lists indexed by block, in ascending block order.
    pub fn predecessors(&self) -> Vec<Vec<BlockId>> {
        let mut preds = vec![Vec::new(); self.blocks.len()];
        for block in &self.blocks {
            for succ in self.successors(block.id) {
                preds[succ.index()].push(block.id);
            }
        }
        preds
    }

    pub fn reachable(&self) -> Vec<bool> {
        let mut seen = vec![false; self.blocks.len()];
        let mut work = vec![self.entry];
        while let Some(b) = work.pop() {
            if seen[b.index()] {
                continue;
            }
            seen[b.index()] = true;
            work.extend(self.successors(b));
        }
        seen
    }

    /// Handler block for `exc` raised in `block`: walk the enclosing regions
    /// innermost first and take the first clause that matches.
    pub fn dispatch(&self, block: BlockId, exc: &Exception) -> Option<BlockId> {
        for r in self.region_chain(self.block(block).region) {
            if let Some(clause) = self.region(r).clauses.iter().find(|c| c.matches(exc)) {
                return Some(clause.target);
            }
        }
        None
    }

    pub fn inst_count(&self) -> usize {
        self.blocks.iter().map(|b| b.insts.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// bb0 -> bb1 (protected, region r0) -> bb2; r0 catches ValueError at
    /// bb3 and anything at bb4.
    fn protected_code() -> Code {
        let mut code = Code::new("f", vec![]);
        let b0 = code.add_block(None);
        let b1 = code.add_block(Some(0));
        let b2 = code.add_block(Some(3));
        let b3 = code.add_block(Some(6));
        let b4 = code.add_block(Some(9));

        code.regions.push(HandlerRegion {
            id: RegionId(0),
            parent: None,
            clauses: vec![
                CatchClause {
                    exc_type: Some(ExcKind::ValueError),
                    target: b3,
                    binding: None,
                },
                CatchClause {
                    exc_type: None,
                    target: b4,
                    binding: None,
                },
            ],
            else_target: Some(b2),
            handler_offset: 6,
        });

        code.block_mut(b0).term = Terminator::Jump(b1);
        code.block_mut(b1).term = Terminator::Jump(b2);
        code.block_mut(b1).region = Some(RegionId(0));
        code.block_mut(b2).term = Terminator::Return(Operand::Const(Value::None));
        code.block_mut(b3).term = Terminator::Return(Operand::Const(Value::Int(1)));
        code.block_mut(b4).term = Terminator::Return(Operand::Const(Value::Int(2)));
        code
    }

    #[test]
    fn test_exception_edges_are_successors() {
        let code = protected_code();
        assert_eq!(
            code.successors(BlockId(1)),
            vec![BlockId(2), BlockId(3), BlockId(4)]
        );
        assert_eq!(code.successors(BlockId(2)), vec![]);
    }

    #[test]
    fn test_predecessors_include_exception_edges() {
        let preds = code_preds();
        assert_eq!(preds[3], vec![BlockId(1)]);
        assert_eq!(preds[2], vec![BlockId(1)]);
    }

    fn code_preds() -> Vec<Vec<BlockId>> {
        protected_code().predecessors()
    }

    #[test]
    fn test_dispatch_first_match_wins() {
        let code = protected_code();
        let exc = Exception::new(ExcKind::ValueError, vec![]);
        assert_eq!(code.dispatch(BlockId(1), &exc), Some(BlockId(3)));

        let other = Exception::new(ExcKind::TypeError, vec![]);
        assert_eq!(code.dispatch(BlockId(1), &other), Some(BlockId(4)));

        // unprotected block has nowhere to go
        assert_eq!(code.dispatch(BlockId(2), &exc), None);
    }

    #[test]
    fn test_catch_all_stops_outer_edges() {
        let mut code = protected_code();
        let outer = code.add_block(Some(20));
        code.block_mut(outer).term = Terminator::Return(Operand::Undef);
        code.regions.push(HandlerRegion {
            id: RegionId(1),
            parent: None,
            clauses: vec![CatchClause {
                exc_type: Some(ExcKind::Exception),
                target: outer,
                binding: None,
            }],
            else_target: None,
            handler_offset: 20,
        });
        code.regions[0].parent = Some(RegionId(1));

        assert!(!code.exc_successors(BlockId(1)).contains(&outer));

        code.regions[0].clauses.pop();
        assert!(code.exc_successors(BlockId(1)).contains(&outer));
    }

    #[test]
    fn test_reachable_follows_exception_edges() {
        let code = protected_code();
        assert!(code.reachable().iter().all(|r| *r));
    }
}
