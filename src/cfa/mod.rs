//! # Control-flow analysis
//!
//! Converts slot-form [`Code`] into SSA form in place:
//!
//! 1. Clear blocks unreachable from the entry.
//! 2. Compute dominators over normal and exceptional edges.
//! 3. Place phis at the iterated dominance frontier of every slot's
//!    definition sites. The entry block defines every slot as undefined.
//! 4. Rename down the dominator tree, removing every `load`/`store`.
//! 5. Drop phis nothing uses.
//!
//! An exceptional edge carries the slot values at the end of its source
//! block. The translator ends a protected block right after any operation
//! that may raise, so those are exactly the values at the raise point.

pub mod cfg_error;
pub mod dominance;
mod verify;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::{debug, instrument};

use crate::ir::{BlockId, Code, Inst, InstKind, Operand, Terminator, ValueId};
use cfg_error::MalformedCfgError;
use dominance::DomTree;
pub use verify::verify_ssa;

/// Rewrite `code` into SSA form. Does nothing if it already is.
#[instrument(skip_all, fields(function = %code.name))]
pub fn run(code: &mut Code) -> Result<(), MalformedCfgError> {
    if code.is_ssa {
        return Ok(());
    }
    check_shape(code)?;

    clear_unreachable(code);
    let preds = code.predecessors();
    if !preds[code.entry.index()].is_empty() {
        return Err(MalformedCfgError::at(
            code.entry,
            "entry block has predecessors",
        ));
    }

    let dom = DomTree::compute(code);
    let placed = place_phis(code, &dom);

    let entry = code.entry;
    Renamer::default().rename(code, &dom, entry);
    sort_incoming(code);
    let pruned = prune_dead_phis(code);

    code.is_ssa = true;
    debug!(phis = placed - pruned, pruned, blocks = code.blocks.len(), "ssa built");

    if cfg!(debug_assertions) {
        verify_ssa(code)?;
    }
    Ok(())
}

fn check_shape(code: &Code) -> Result<(), MalformedCfgError> {
    let n = code.blocks.len();
    if code.entry.index() >= n {
        return Err(MalformedCfgError::new(format!(
            "entry {} out of range",
            code.entry
        )));
    }
    for block in &code.blocks {
        for s in code.successors(block.id) {
            if s.index() >= n {
                return Err(MalformedCfgError::at(
                    block.id,
                    format!("edge to missing block {}", s),
                ));
            }
        }
        if block.insts.iter().any(Inst::is_phi) {
            return Err(MalformedCfgError::at(block.id, "phi in slot-form code"));
        }
    }
    Ok(())
}

fn clear_unreachable(code: &mut Code) {
    let reachable = code.reachable();
    for block in &mut code.blocks {
        if !reachable[block.id.index()] {
            block.insts.clear();
            block.term = Terminator::Unreachable;
            block.region = None;
        }
    }
}

/// Insert an empty phi for each slot at the iterated dominance frontier of
/// the blocks that store it. Returns how many were placed.
fn place_phis(code: &mut Code, dom: &DomTree) -> usize {
    let mut defsites: BTreeMap<String, BTreeSet<BlockId>> = BTreeMap::new();
    for block in &code.blocks {
        for inst in &block.insts {
            if let InstKind::Store(var, _) = &inst.kind {
                defsites.entry(var.clone()).or_default().insert(block.id);
            }
        }
    }

    let frontiers = dom.frontiers();
    let mut phis: BTreeMap<BlockId, Vec<String>> = BTreeMap::new();
    for (var, sites) in defsites {
        let mut has_phi = HashSet::new();
        let mut work: Vec<BlockId> = sites.iter().copied().collect();
        work.push(code.entry);
        let mut queued: HashSet<BlockId> = work.iter().copied().collect();

        while let Some(b) = work.pop() {
            for &f in &frontiers[b.index()] {
                if has_phi.insert(f) {
                    phis.entry(f).or_default().push(var.clone());
                    if queued.insert(f) {
                        work.push(f);
                    }
                }
            }
        }
    }

    let mut placed = 0;
    for (b, vars) in phis {
        let heads: Vec<Inst> = vars
            .into_iter()
            .map(|var| Inst {
                result: Some(code.new_value()),
                kind: InstKind::Phi(var, Vec::new()),
            })
            .collect();
        placed += heads.len();
        code.block_mut(b).insts.splice(0..0, heads);
    }
    placed
}

#[derive(Default)]
struct Renamer {
    /// Reaching definition of each slot along the current dominator path.
    stacks: HashMap<String, Vec<Operand>>,
    /// Removed `load` results and what they read.
    replace: HashMap<ValueId, Operand>,
}

impl Renamer {
    fn top(&self, var: &str) -> Operand {
        self.stacks
            .get(var)
            .and_then(|s| s.last())
            .cloned()
            .unwrap_or(Operand::Undef)
    }

    fn resolve(&self, op: &Operand) -> Operand {
        match op {
            Operand::Value(v) => self.replace.get(v).cloned().unwrap_or_else(|| op.clone()),
            _ => op.clone(),
        }
    }

    /// Rename `b`, then its dominator-tree children, then restore the
    /// definitions `b` pushed.
    fn rename(&mut self, code: &mut Code, dom: &DomTree, b: BlockId) {
        let mut pushed: Vec<String> = Vec::new();

        let insts = std::mem::take(&mut code.block_mut(b).insts);
        let mut kept = Vec::with_capacity(insts.len());
        for mut inst in insts {
            match &inst.kind {
                InstKind::Load(var) => {
                    if let Some(r) = inst.result {
                        let top = self.top(var);
                        self.replace.insert(r, top);
                    }
                    continue;
                }
                InstKind::Store(var, op) => {
                    let v = self.resolve(op);
                    self.stacks.entry(var.clone()).or_default().push(v);
                    pushed.push(var.clone());
                    continue;
                }
                InstKind::Phi(var, _) => {
                    if let Some(r) = inst.result {
                        self.stacks
                            .entry(var.clone())
                            .or_default()
                            .push(Operand::Value(r));
                        pushed.push(var.clone());
                    }
                }
                _ => {
                    for op in inst.operands_mut() {
                        *op = self.resolve(op);
                    }
                }
            }
            kept.push(inst);
        }

        let block = code.block_mut(b);
        block.insts = kept;
        if let Some(op) = block.term.operand_mut() {
            *op = self.resolve(op);
        }

        for s in code.successors(b) {
            for inst in code.block_mut(s).insts.iter_mut() {
                let InstKind::Phi(var, incoming) = &mut inst.kind else {
                    break;
                };
                let v = self.top(var);
                incoming.push((b, v));
            }
        }

        for &child in dom.children(b) {
            self.rename(code, dom, child);
        }

        for var in pushed {
            if let Some(stack) = self.stacks.get_mut(&var) {
                stack.pop();
            }
        }
    }
}

fn sort_incoming(code: &mut Code) {
    for block in &mut code.blocks {
        for inst in &mut block.insts {
            if let InstKind::Phi(_, incoming) = &mut inst.kind {
                incoming.sort_by_key(|(b, _)| *b);
            }
        }
    }
}

/// Remove phis whose results reach no instruction or terminator. Returns
/// how many were removed.
fn prune_dead_phis(code: &mut Code) -> usize {
    let mut phi_inputs: HashMap<ValueId, Vec<ValueId>> = HashMap::new();
    let mut live: HashSet<ValueId> = HashSet::new();
    let mut work: Vec<ValueId> = Vec::new();

    for block in &code.blocks {
        for inst in &block.insts {
            let inputs = inst.operands().into_iter().filter_map(Operand::as_value);
            match (inst.is_phi(), inst.result) {
                (true, Some(r)) => {
                    phi_inputs.insert(r, inputs.collect());
                }
                _ => work.extend(inputs),
            }
        }
        work.extend(block.term.operand().and_then(Operand::as_value));
    }

    while let Some(v) = work.pop() {
        if live.insert(v) {
            if let Some(inputs) = phi_inputs.get(&v) {
                work.extend(inputs.iter().copied());
            }
        }
    }

    let mut removed = 0;
    for block in &mut code.blocks {
        let before = block.insts.len();
        block.insts.retain(|inst| match (inst.is_phi(), inst.result) {
            (true, Some(r)) => live.contains(&r),
            _ => true,
        });
        removed += before - block.insts.len();
    }
    removed
}
