use std::collections::{BTreeSet, HashMap};

use super::cfg_error::MalformedCfgError;
use super::dominance::DomTree;
use crate::ir::{BlockId, Code, InstKind, Operand, ValueId};

/// Check the SSA invariants of `code`:
///
/// - every value is defined exactly once
/// - no `load`/`store` remains
/// - phis sit at the head of their block, with one incoming value per
///   predecessor
/// - every use is dominated by its definition
pub fn verify_ssa(code: &Code) -> Result<(), MalformedCfgError> {
    if !code.is_ssa {
        return Err(MalformedCfgError::new("code is not in SSA form"));
    }
    let dom = DomTree::compute(code);

    // value -> (block, position); phis and ordinary instructions share one
    // position space per block
    let mut defs: HashMap<ValueId, (BlockId, usize)> = HashMap::new();
    for block in &code.blocks {
        let mut in_head = true;
        for (i, inst) in block.insts.iter().enumerate() {
            match &inst.kind {
                InstKind::Load(_) | InstKind::Store(..) => {
                    return Err(MalformedCfgError::at(
                        block.id,
                        format!("slot access `{}` left after conversion", inst),
                    ));
                }
                InstKind::Phi(..) if !in_head => {
                    return Err(MalformedCfgError::at(block.id, "phi after a non-phi"));
                }
                InstKind::Phi(..) => {}
                _ => in_head = false,
            }
            if let Some(r) = inst.result {
                if defs.insert(r, (block.id, i)).is_some() {
                    return Err(MalformedCfgError::at(
                        block.id,
                        format!("{} defined more than once", r),
                    ));
                }
            }
        }
    }

    let dominated = |v: ValueId, block: BlockId, pos: usize| -> Result<(), MalformedCfgError> {
        let (db, di) = defs
            .get(&v)
            .copied()
            .ok_or_else(|| MalformedCfgError::at(block, format!("use of undefined {}", v)))?;
        let ok = if db == block {
            di < pos
        } else {
            dom.dominates(db, block)
        };
        if ok {
            Ok(())
        } else {
            Err(MalformedCfgError::at(
                block,
                format!("use of {} not dominated by its definition", v),
            ))
        }
    };

    for block in &code.blocks {
        if !dom.is_reachable(block.id) {
            continue;
        }
        let preds: BTreeSet<BlockId> = dom.preds(block.id).iter().copied().collect();

        for (i, inst) in block.insts.iter().enumerate() {
            if let InstKind::Phi(var, incoming) = &inst.kind {
                let from: BTreeSet<BlockId> = incoming.iter().map(|(b, _)| *b).collect();
                if from != preds || from.len() != incoming.len() {
                    return Err(MalformedCfgError::at(
                        block.id,
                        format!("phi for `{}` does not match the predecessors", var),
                    ));
                }
                for (p, op) in incoming {
                    if let Operand::Value(v) = op {
                        dominated(*v, *p, usize::MAX)?;
                    }
                }
                continue;
            }
            for v in inst.operands().into_iter().filter_map(Operand::as_value) {
                dominated(v, block.id, i)?;
            }
        }

        if let Some(v) = block.term.operand().and_then(Operand::as_value) {
            dominated(v, block.id, usize::MAX)?;
        }
    }

    Ok(())
}
