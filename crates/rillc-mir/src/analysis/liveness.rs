//! Backward liveness analysis over locals.
//!
//! Worklist iteration to a fixed point: a local is live-in to a block when
//! it is read before being fully overwritten, or is live-out and not
//! overwritten. Used by temporary unification to find non-overlapping
//! lifetimes.

use crate::analysis::cfg::ControlFlowGraph;
use crate::mir::{Function, LValue, LocalId, Root, Statement, Terminator};
use rillc_util::{FxHashSet, Idx};

pub struct LivenessAnalysis {
    pub block_entry: Vec<FxHashSet<LocalId>>,
    pub block_exit: Vec<FxHashSet<LocalId>>,
}

pub fn analyze_liveness(fcn: &Function, cfg: &ControlFlowGraph) -> LivenessAnalysis {
    let n = fcn.blocks.len();
    let mut block_entry: Vec<FxHashSet<LocalId>> = vec![FxHashSet::default(); n];
    let mut block_exit: Vec<FxHashSet<LocalId>> = vec![FxHashSet::default(); n];

    let mut changed = true;
    let max_iterations = n * n + 1;
    let mut iterations = 0;

    while changed && iterations < max_iterations {
        changed = false;
        iterations += 1;

        for (bb, block) in fcn.blocks.iter_enumerated() {
            let mut out: FxHashSet<LocalId> = FxHashSet::default();
            for &succ in cfg.succs(bb) {
                out.extend(block_entry[succ.index()].iter().copied());
            }

            let in_set = compute_block_in(block, &out);

            if in_set != block_entry[bb.index()] {
                changed = true;
                block_entry[bb.index()] = in_set;
            }
            block_exit[bb.index()] = out;
        }
    }

    LivenessAnalysis { block_entry, block_exit }
}

fn compute_block_in(
    block: &crate::mir::BasicBlock,
    out: &FxHashSet<LocalId>,
) -> FxHashSet<LocalId> {
    let mut live = out.clone();

    // Walk the block backwards; a full overwrite kills, any read revives.
    let mut term_reads = FxHashSet::default();
    collect_terminator_reads(&block.terminator, &mut term_reads);
    if let Terminator::Call { ret_val, .. } = &block.terminator {
        if let Some(id) = ret_val.as_local() {
            live.remove(&id);
        }
    }
    live.extend(term_reads);

    for stmt in block.statements.iter().rev() {
        match stmt {
            Statement::Assign { dst, src } => {
                if let Some(id) = dst.as_local() {
                    live.remove(&id);
                } else {
                    read_lvalue(dst, &mut live);
                }
                let mut reads = FxHashSet::default();
                src.visit_lvalues(&mut |lv| read_lvalue(lv, &mut reads));
                live.extend(reads);
            }
            Statement::Drop { slot, .. } => read_lvalue(slot, &mut live),
            Statement::Asm(a) => {
                for (_, lv) in &a.outputs {
                    if let Some(id) = lv.as_local() {
                        live.remove(&id);
                    }
                }
                for (_, lv) in &a.inputs {
                    read_lvalue(lv, &mut live);
                }
            }
            Statement::Asm2(a) => {
                for p in &a.params {
                    if let crate::mir::AsmParam::Reg { input, output, .. } = p {
                        if let Some(o) = output {
                            if let Some(id) = o.as_local() {
                                live.remove(&id);
                            }
                        }
                        if let Some(i) = input {
                            i.visit_lvalues(&mut |lv| read_lvalue(lv, &mut live));
                        }
                    }
                }
            }
            Statement::SetDropFlag { .. } | Statement::ScopeEnd { .. } => {}
        }
    }

    live
}

fn read_lvalue(lv: &LValue, set: &mut FxHashSet<LocalId>) {
    if let Root::Local(id) = lv.root {
        set.insert(id);
    }
    for w in &lv.wrappers {
        if let crate::mir::Wrapper::Index(id) = w {
            set.insert(*id);
        }
    }
}

fn collect_terminator_reads(term: &Terminator, set: &mut FxHashSet<LocalId>) {
    match term {
        Terminator::If { cond, .. } => read_lvalue(cond, set),
        Terminator::Switch { val, .. } | Terminator::SwitchValue { val, .. } => read_lvalue(val, set),
        Terminator::Call { fcn, args, ret_val, .. } => {
            if let crate::mir::CallTarget::Value(lv) = fcn {
                read_lvalue(lv, set);
            }
            for a in args {
                a.visit_lvalues(&mut |lv| read_lvalue(lv, set));
            }
            // A projected destination reads its base.
            if ret_val.as_local().is_none() {
                read_lvalue(ret_val, set);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::cfg::ControlFlowGraph;
    use crate::mir::{Constant, RValue};
    use rillc_hir::{CoreType, TypeRef};

    #[test]
    fn straight_line_liveness() {
        // _0 = 1; _1 = _0; return
        let mut fcn = Function::new();
        let a = fcn.new_local(TypeRef::primitive(CoreType::U32));
        let b = fcn.new_local(TypeRef::primitive(CoreType::U32));
        let bb = fcn.new_block();
        fcn.blocks[bb].statements.push(Statement::Assign {
            dst: LValue::new_local(a),
            src: RValue::Constant(Constant::Uint { v: 1, t: CoreType::U32 }),
        });
        fcn.blocks[bb].statements.push(Statement::Assign {
            dst: LValue::new_local(b),
            src: RValue::Use(LValue::new_local(a)),
        });
        fcn.blocks[bb].terminator = Terminator::Return;

        let cfg = ControlFlowGraph::new(&fcn);
        let live = analyze_liveness(&fcn, &cfg);
        // Nothing is live into the entry block: both locals are defined
        // before their uses.
        assert!(live.block_entry[0].is_empty());
    }
}
