//! Control-flow graph construction.

use crate::mir::{BlockId, Function};
use rillc_util::Idx;

/// Predecessor/successor lists per block, in deterministic order.
pub struct ControlFlowGraph {
    pub predecessors: Vec<Vec<BlockId>>,
    pub successors: Vec<Vec<BlockId>>,
}

impl ControlFlowGraph {
    pub fn new(fcn: &Function) -> Self {
        let n = fcn.blocks.len();
        let mut predecessors = vec![Vec::new(); n];
        let mut successors = vec![Vec::new(); n];

        for (bb, block) in fcn.blocks.iter_enumerated() {
            for target in block.terminator.targets() {
                if !successors[bb.index()].contains(&target) {
                    successors[bb.index()].push(target);
                }
                if !predecessors[target.index()].contains(&bb) {
                    predecessors[target.index()].push(bb);
                }
            }
        }

        ControlFlowGraph { predecessors, successors }
    }

    pub fn preds(&self, bb: BlockId) -> &[BlockId] {
        &self.predecessors[bb.index()]
    }

    pub fn succs(&self, bb: BlockId) -> &[BlockId] {
        &self.successors[bb.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::Terminator;
    use rillc_hir::TypeRef;

    #[test]
    fn edges_from_branches() {
        let mut fcn = Function::new();
        let cond = fcn.new_local(TypeRef::bool_());
        let b0 = fcn.new_block();
        let b1 = fcn.new_block();
        let b2 = fcn.new_block();
        fcn.blocks[b0].terminator = Terminator::If {
            cond: crate::mir::LValue::new_local(cond),
            bb_true: b1,
            bb_false: b2,
        };
        fcn.blocks[b1].terminator = Terminator::Goto(b2);
        fcn.blocks[b2].terminator = Terminator::Return;

        let cfg = ControlFlowGraph::new(&fcn);
        assert_eq!(cfg.succs(b0), &[b1, b2]);
        assert_eq!(cfg.preds(b2), &[b0, b1]);
        assert!(cfg.preds(b0).is_empty());
    }
}
