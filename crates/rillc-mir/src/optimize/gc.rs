//! Garbage collection and finalisation passes.
//!
//! The partial form runs between optimisation rounds and only empties
//! unreachable blocks (indices stay stable). The full form renumbers
//! locals, drop flags, and blocks densely and is the single point where
//! every outstanding index is invalidated at once. Block sorting gives the
//! final function a deterministic, readable order.

use crate::analysis::{analyze_liveness, ControlFlowGraph};
use crate::helpers::FnContext;
use crate::mir::{
    BasicBlock, BlockId, FlagId, Function, LValue, LocalId, Root, Statement, Terminator, Wrapper,
};
use crate::Result;
use rillc_util::{FxHashMap, FxHashSet, Idx, IndexVec};

/// Empty every unreachable block, leaving an `Incomplete` stub. Indices are
/// untouched.
pub fn partial(fcn: &mut Function) -> bool {
    let reachable = crate::check::reachable_blocks(fcn);
    let mut changed = false;
    for (bb, block) in fcn.blocks.iter_enumerated_mut() {
        if !reachable[bb.index()]
            && !(block.statements.is_empty() && matches!(block.terminator, Terminator::Incomplete))
        {
            block.statements.clear();
            block.terminator = Terminator::Incomplete;
            changed = true;
        }
    }
    changed
}

/// Full garbage collection: drop unreachable blocks and unused locals/drop
/// flags, renumbering everything densely.
pub fn collect(_ctx: &FnContext<'_>, fcn: &mut Function) -> Result<()> {
    let reachable = crate::check::reachable_blocks(fcn);

    // Which locals and flags are used by reachable code. Scope-end markers
    // do not keep locals alive; their lists are pruned instead.
    let mut used_locals = vec![false; fcn.locals.len()];
    let mut used_flags = vec![false; fcn.drop_flags.len()];
    let mut mark_lv = |used: &mut Vec<bool>, lv: &LValue| {
        if let Root::Local(id) = lv.root {
            used[id.index()] = true;
        }
        for w in &lv.wrappers {
            if let Wrapper::Index(id) = w {
                used[id.index()] = true;
            }
        }
    };
    for (bb, block) in fcn.blocks.iter_enumerated() {
        if !reachable[bb.index()] {
            continue;
        }
        for stmt in &block.statements {
            match stmt {
                Statement::ScopeEnd { .. } => {}
                Statement::Drop { flag_idx, .. } => {
                    stmt.visit_lvalues(&mut |lv| mark_lv(&mut used_locals, lv));
                    if let Some(f) = flag_idx {
                        used_flags[f.index()] = true;
                    }
                }
                other => other.visit_lvalues(&mut |lv| mark_lv(&mut used_locals, lv)),
            }
        }
        block.terminator.visit_lvalues(&mut |lv| mark_lv(&mut used_locals, lv));
    }
    // A flag feeding a used flag through the xor form is itself used.
    loop {
        let mut flag_changed = false;
        for (bb, block) in fcn.blocks.iter_enumerated() {
            if !reachable[bb.index()] {
                continue;
            }
            for stmt in &block.statements {
                if let Statement::SetDropFlag { idx, other: Some(o), .. } = stmt {
                    if used_flags[idx.index()] && !used_flags[o.index()] {
                        used_flags[o.index()] = true;
                        flag_changed = true;
                    }
                }
            }
        }
        if !flag_changed {
            break;
        }
    }

    // Dense renumberings.
    let mut local_map: Vec<Option<LocalId>> = vec![None; fcn.locals.len()];
    let mut new_locals = IndexVec::new();
    for (id, ty) in fcn.locals.iter_enumerated() {
        if used_locals[id.index()] {
            local_map[id.index()] = Some(new_locals.push(ty.clone()));
        }
    }
    let mut flag_map: Vec<Option<FlagId>> = vec![None; fcn.drop_flags.len()];
    let mut new_flags = IndexVec::new();
    for (id, &initial) in fcn.drop_flags.iter_enumerated() {
        if used_flags[id.index()] {
            flag_map[id.index()] = Some(new_flags.push(initial));
        }
    }
    let mut block_map: Vec<Option<BlockId>> = vec![None; fcn.blocks.len()];
    let mut next_block = 0u32;
    for idx in 0..fcn.blocks.len() {
        if reachable[idx] {
            block_map[idx] = Some(BlockId(next_block));
            next_block += 1;
        }
    }

    // Rewrite and compact.
    let old_blocks = std::mem::take(&mut fcn.blocks);
    let mut new_blocks: IndexVec<BlockId, BasicBlock> = IndexVec::new();
    for (bb, mut block) in old_blocks.into_iter_enumerated() {
        if !reachable[bb.index()] {
            continue;
        }
        let mut statements = Vec::with_capacity(block.statements.len());
        for mut stmt in block.statements.drain(..) {
            match &mut stmt {
                Statement::ScopeEnd { slots } => {
                    slots.retain(|s| local_map[s.index()].is_some());
                    for s in slots.iter_mut() {
                        *s = local_map[s.index()].expect("retained above");
                    }
                    if slots.is_empty() {
                        continue;
                    }
                }
                Statement::SetDropFlag { idx, other, .. } => {
                    if flag_map[idx.index()].is_none() {
                        continue;
                    }
                    *idx = flag_map[idx.index()].expect("checked above");
                    if let Some(o) = other {
                        *o = flag_map[o.index()].expect("transitively used");
                    }
                }
                Statement::Drop { flag_idx, .. } => {
                    if let Some(f) = flag_idx {
                        *f = flag_map[f.index()].expect("marked used");
                    }
                }
                _ => {}
            }
            stmt.visit_lvalues_mut(&mut |lv| remap_lvalue(lv, &local_map));
            statements.push(stmt);
        }
        block.statements = statements;
        block.terminator.visit_lvalues_mut(&mut |lv| remap_lvalue(lv, &local_map));
        block.terminator.visit_targets_mut(&mut |t| {
            *t = block_map[t.index()].expect("target of a reachable block is reachable");
        });
        new_blocks.push(block);
    }

    fcn.locals = new_locals;
    fcn.drop_flags = new_flags;
    fcn.blocks = new_blocks;
    Ok(())
}

fn remap_lvalue(lv: &mut LValue, local_map: &[Option<LocalId>]) {
    if let Root::Local(id) = lv.root {
        lv.root = Root::Local(local_map[id.index()].expect("used local survives GC"));
    }
    for w in &mut lv.wrappers {
        if let Wrapper::Index(id) = w {
            *id = local_map[id.index()].expect("used local survives GC");
        }
    }
}

/// Coalesce same-typed locals whose lifetimes never overlap.
///
/// The footprint of a local is the set of blocks where it is referenced or
/// live across the boundary; two locals with disjoint footprints can share a
/// slot. Borrowed locals are left alone (a pointer may outlive the
/// footprint).
pub fn unify_temporaries(_ctx: &FnContext<'_>, fcn: &mut Function) -> Result<bool> {
    let cfg = ControlFlowGraph::new(fcn);
    let live = analyze_liveness(fcn, &cfg);

    let n = fcn.locals.len();
    let mut footprint: Vec<FxHashSet<usize>> = vec![FxHashSet::default(); n];
    let mut borrowed = vec![false; n];

    for (bb, block) in fcn.blocks.iter_enumerated() {
        let mut touch = |lv: &LValue| {
            if let Root::Local(id) = lv.root {
                footprint[id.index()].insert(bb.index());
            }
            for w in &lv.wrappers {
                if let Wrapper::Index(id) = w {
                    footprint[id.index()].insert(bb.index());
                }
            }
        };
        for stmt in &block.statements {
            stmt.visit_lvalues(&mut touch);
            if let Statement::Assign { src: crate::mir::RValue::Borrow { val, .. }, .. } = stmt {
                if let Root::Local(id) = val.root {
                    borrowed[id.index()] = true;
                }
            }
        }
        block.terminator.visit_lvalues(&mut touch);
        for &id in &live.block_entry[bb.index()] {
            footprint[id.index()].insert(bb.index());
        }
        for &id in &live.block_exit[bb.index()] {
            footprint[id.index()].insert(bb.index());
        }
    }

    // Greedy first-fit into bins of the same type.
    let mut remap: FxHashMap<LocalId, LocalId> = FxHashMap::default();
    let mut bins: Vec<(LocalId, FxHashSet<usize>)> = Vec::new();
    for idx in 0..n {
        let id = LocalId(idx as u32);
        if borrowed[idx] || footprint[idx].is_empty() {
            continue;
        }
        let ty = &fcn.locals[id];
        let mut placed = false;
        for (repr, bin_footprint) in bins.iter_mut() {
            if *repr == id {
                continue;
            }
            if fcn.locals[*repr] != *ty {
                continue;
            }
            if bin_footprint.is_disjoint(&footprint[idx]) {
                remap.insert(id, *repr);
                bin_footprint.extend(footprint[idx].iter().copied());
                placed = true;
                break;
            }
        }
        if !placed {
            bins.push((id, footprint[idx].clone()));
        }
    }

    if remap.is_empty() {
        return Ok(false);
    }

    let apply = |lv: &mut LValue| {
        if let Root::Local(id) = lv.root {
            if let Some(&new) = remap.get(&id) {
                lv.root = Root::Local(new);
            }
        }
        for w in &mut lv.wrappers {
            if let Wrapper::Index(id) = w {
                if let Some(&new) = remap.get(id) {
                    *id = new;
                }
            }
        }
    };
    for block in fcn.blocks.iter_mut() {
        for stmt in &mut block.statements {
            stmt.visit_lvalues_mut(&mut |lv| apply(lv));
            if let Statement::ScopeEnd { slots } = stmt {
                for s in slots.iter_mut() {
                    if let Some(&new) = remap.get(s) {
                        *s = new;
                    }
                }
                slots.sort();
                slots.dedup();
            }
        }
        block.terminator.visit_lvalues_mut(&mut |lv| apply(lv));
    }
    Ok(true)
}

/// Reorder blocks into a deterministic depth-first order from the entry.
pub fn sort_blocks(fcn: &mut Function) {
    let n = fcn.blocks.len();
    if n == 0 {
        return;
    }
    let mut order: Vec<BlockId> = Vec::with_capacity(n);
    let mut seen = vec![false; n];
    let mut stack = vec![Function::ENTRY];
    while let Some(bb) = stack.pop() {
        if seen[bb.index()] {
            continue;
        }
        seen[bb.index()] = true;
        order.push(bb);
        // Push in reverse so the first successor is visited first.
        let targets = fcn.blocks[bb].terminator.targets();
        for &t in targets.iter().rev() {
            if !seen[t.index()] {
                stack.push(t);
            }
        }
    }
    // Anything the sweep missed (only possible before a full GC) keeps its
    // relative order at the end.
    for idx in 0..n {
        if !seen[idx] {
            order.push(BlockId(idx as u32));
        }
    }

    let mut new_index = vec![BlockId(0); n];
    for (new_pos, &old) in order.iter().enumerate() {
        new_index[old.index()] = BlockId(new_pos as u32);
    }

    let old_blocks = std::mem::take(&mut fcn.blocks);
    let mut slots: Vec<Option<BasicBlock>> = old_blocks.into_iter_enumerated().map(|(_, b)| Some(b)).collect();
    let mut new_blocks: IndexVec<BlockId, BasicBlock> = IndexVec::new();
    for &old in &order {
        let mut block = slots[old.index()].take().expect("each block moved once");
        block.terminator.visit_targets_mut(&mut |t| {
            *t = new_index[t.index()];
        });
        new_blocks.push(block);
    }
    fcn.blocks = new_blocks;
}
