//! Dominator tree and dominance frontiers over normal and exceptional edges.
//!
//! Immediate dominators use the iterative Cooper-Harvey-Kennedy scheme over
//! reverse postorder. Unreachable blocks have no dominator and are left out
//! of the tree.

use std::collections::BTreeSet;

use crate::ir::{BlockId, Code};

#[derive(Debug, Clone)]
pub struct DomTree {
    entry: BlockId,
    /// Reachable blocks in reverse postorder.
    rpo: Vec<BlockId>,
    rpo_index: Vec<usize>,
    /// `idom[entry] == Some(entry)`; `None` for unreachable blocks.
    idom: Vec<Option<BlockId>>,
    children: Vec<Vec<BlockId>>,
    preds: Vec<Vec<BlockId>>,
}

fn block_order_rpo(code: &Code) -> Vec<BlockId> {
    fn dfs(code: &Code, b: BlockId, seen: &mut [bool], post: &mut Vec<BlockId>) {
        if seen[b.index()] {
            return;
        }
        seen[b.index()] = true;
        for s in code.successors(b) {
            dfs(code, s, seen, post);
        }
        post.push(b);
    }

    let mut seen = vec![false; code.blocks.len()];
    let mut post = Vec::with_capacity(code.blocks.len());
    if !code.blocks.is_empty() {
        dfs(code, code.entry, &mut seen, &mut post);
    }
    post.reverse();
    post
}

impl DomTree {
    pub fn compute(code: &Code) -> DomTree {
        let n = code.blocks.len();
        let rpo = block_order_rpo(code);

        let mut rpo_index = vec![usize::MAX; n];
        for (i, b) in rpo.iter().enumerate() {
            rpo_index[b.index()] = i;
        }

        // predecessors among reachable blocks only
        let mut preds: Vec<Vec<BlockId>> = vec![Vec::new(); n];
        for &b in &rpo {
            for s in code.successors(b) {
                preds[s.index()].push(b);
            }
        }
        for p in &mut preds {
            p.sort_unstable();
            p.dedup();
        }

        fn intersect(
            mut b1: BlockId,
            mut b2: BlockId,
            idom: &[Option<BlockId>],
            rpo_index: &[usize],
        ) -> BlockId {
            while b1 != b2 {
                while rpo_index[b1.index()] > rpo_index[b2.index()] {
                    match idom[b1.index()] {
                        Some(d) => b1 = d,
                        None => return b2,
                    }
                }
                while rpo_index[b2.index()] > rpo_index[b1.index()] {
                    match idom[b2.index()] {
                        Some(d) => b2 = d,
                        None => return b1,
                    }
                }
            }
            b1
        }

        let mut idom: Vec<Option<BlockId>> = vec![None; n];
        if n > 0 {
            idom[code.entry.index()] = Some(code.entry);
        }

        let mut changed = true;
        while changed {
            changed = false;
            for &b in rpo.iter().skip(1) {
                let mut it = preds[b.index()]
                    .iter()
                    .copied()
                    .filter(|p| idom[p.index()].is_some());
                let Some(mut new_idom) = it.next() else {
                    continue;
                };
                for p in it {
                    new_idom = intersect(p, new_idom, &idom, &rpo_index);
                }
                if idom[b.index()] != Some(new_idom) {
                    idom[b.index()] = Some(new_idom);
                    changed = true;
                }
            }
        }

        let mut children = vec![Vec::new(); n];
        for &b in &rpo {
            if let Some(d) = idom[b.index()] {
                if d != b {
                    children[d.index()].push(b);
                }
            }
        }
        for c in &mut children {
            c.sort_unstable();
        }

        DomTree {
            entry: code.entry,
            rpo,
            rpo_index,
            idom,
            children,
            preds,
        }
    }

    pub fn rpo(&self) -> &[BlockId] {
        &self.rpo
    }

    pub fn is_reachable(&self, b: BlockId) -> bool {
        self.rpo_index[b.index()] != usize::MAX
    }

    /// Immediate dominator; `None` for the entry and for unreachable blocks.
    pub fn idom(&self, b: BlockId) -> Option<BlockId> {
        match self.idom[b.index()] {
            Some(d) if d != b => Some(d),
            _ => None,
        }
    }

    pub fn children(&self, b: BlockId) -> &[BlockId] {
        &self.children[b.index()]
    }

    /// Reachable predecessors, ascending.
    pub fn preds(&self, b: BlockId) -> &[BlockId] {
        &self.preds[b.index()]
    }

    /// Whether `a` dominates `b` (reflexive).
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match self.idom(cur) {
                Some(d) => cur = d,
                None => return false,
            }
        }
    }

    /// Dominator-tree preorder from the entry, children in block order.
    pub fn preorder(&self) -> Vec<BlockId> {
        let mut out = Vec::with_capacity(self.rpo.len());
        if self.rpo.is_empty() {
            return out;
        }
        let mut work = vec![self.entry];
        while let Some(b) = work.pop() {
            out.push(b);
            work.extend(self.children(b).iter().rev());
        }
        out
    }

    /// Dominance frontier of every block.
    pub fn frontiers(&self) -> Vec<BTreeSet<BlockId>> {
        let mut df = vec![BTreeSet::new(); self.idom.len()];
        for &b in &self.rpo {
            let preds = self.preds(b);
            if preds.len() < 2 {
                continue;
            }
            let Some(stop) = self.idom(b) else {
                continue;
            };
            for &p in preds {
                let mut runner = p;
                while runner != stop {
                    df[runner.index()].insert(b);
                    match self.idom(runner) {
                        Some(d) => runner = d,
                        None => break,
                    }
                }
            }
        }
        df
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Operand, Terminator};
    use crate::lang::value::Value;

    /// bb0 -> bb1 | bb2 -> bb3
    fn diamond() -> Code {
        let mut code = Code::new("d", vec![]);
        for _ in 0..4 {
            code.add_block(None);
        }
        code.blocks[0].term = Terminator::Branch {
            cond: Operand::Const(Value::Bool(true)),
            then_block: BlockId(1),
            else_block: BlockId(2),
        };
        code.blocks[1].term = Terminator::Jump(BlockId(3));
        code.blocks[2].term = Terminator::Jump(BlockId(3));
        code.blocks[3].term = Terminator::Return(Operand::Const(Value::None));
        code
    }

    #[test]
    fn test_diamond_idoms() {
        let dom = DomTree::compute(&diamond());
        assert_eq!(dom.idom(BlockId(0)), None);
        assert_eq!(dom.idom(BlockId(1)), Some(BlockId(0)));
        assert_eq!(dom.idom(BlockId(2)), Some(BlockId(0)));
        assert_eq!(dom.idom(BlockId(3)), Some(BlockId(0)));
        assert!(dom.dominates(BlockId(0), BlockId(3)));
        assert!(!dom.dominates(BlockId(1), BlockId(3)));
    }

    #[test]
    fn test_diamond_frontiers() {
        let df = DomTree::compute(&diamond()).frontiers();
        assert!(df[0].is_empty());
        assert_eq!(df[1].iter().copied().collect::<Vec<_>>(), vec![BlockId(3)]);
        assert_eq!(df[2].iter().copied().collect::<Vec<_>>(), vec![BlockId(3)]);
    }

    #[test]
    fn test_loop_header_in_own_frontier() {
        // bb0 -> bb1 <-> bb2, bb1 -> bb3
        let mut code = Code::new("l", vec![]);
        for _ in 0..4 {
            code.add_block(None);
        }
        code.blocks[0].term = Terminator::Jump(BlockId(1));
        code.blocks[1].term = Terminator::Branch {
            cond: Operand::Const(Value::Bool(true)),
            then_block: BlockId(2),
            else_block: BlockId(3),
        };
        code.blocks[2].term = Terminator::Jump(BlockId(1));
        code.blocks[3].term = Terminator::Return(Operand::Const(Value::None));

        let dom = DomTree::compute(&code);
        let df = dom.frontiers();
        assert!(df[2].contains(&BlockId(1)));
        assert!(df[1].contains(&BlockId(1)));
        assert_eq!(dom.preorder(), vec![BlockId(0), BlockId(1), BlockId(2), BlockId(3)]);
    }

    #[test]
    fn test_unreachable_block_has_no_dominator() {
        let mut code = diamond();
        let dead = code.add_block(None);
        code.block_mut(dead).term = Terminator::Jump(BlockId(3));

        let dom = DomTree::compute(&code);
        assert!(!dom.is_reachable(dead));
        assert_eq!(dom.idom(dead), None);
        assert_eq!(dom.preds(BlockId(3)), &[BlockId(1), BlockId(2)]);
    }
}
