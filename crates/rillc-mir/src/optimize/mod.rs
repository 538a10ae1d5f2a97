//! The optimisation pipeline.
//!
//! A driver iterates simplification passes until none of them reports a
//! change (bounded by an iteration cap treated as a bug when exceeded),
//! collects garbage between rounds, and finishes with temporary
//! unification, a full garbage collection, and a deterministic block sort.
//!
//! Every pass preserves the observable trace: the sequence of calls, their
//! argument values, and the returned value.

pub mod gc;
pub mod inline;

use crate::analysis::ControlFlowGraph;
use crate::helpers::FnContext;
use crate::mir::{
    BinOp, BlockId, CallTarget, Constant, FlagId, Function, LValue, LocalId, Param, RValue, Root,
    Statement, Terminator, Wrapper,
};
use crate::{ArgList, Resolve, Result};
use rillc_hir as hir;
use rillc_hir::{CoreType, Type};
use rillc_util::{FxHashMap, FxHashSet, Idx};

/// Iteration cap for the fixed-point driver. Exceeding it means a pass pair
/// keeps undoing each other's work, which is a bug.
const MAX_PASSES: usize = 100;

pub fn optimise(
    resolve: &Resolve<'_>,
    path: &hir::SimplePath,
    fcn: &mut Function,
    args: &ArgList,
    ret_ty: &hir::TypeRef,
    minimal: bool,
) -> Result<()> {
    let ctx = FnContext::new(resolve, path, args, ret_ty);
    let lookup = |p: &hir::SimplePath| resolve.body(p);

    if minimal {
        block_simplify(&ctx, fcn)?;
        inline::run(&ctx, fcn, &lookup)?;
        gc::partial(fcn);
    } else {
        let mut pass_num = 0;
        loop {
            let mut changed = false;
            changed |= block_simplify(&ctx, fcn)?;
            changed |= const_propagate(&ctx, fcn)?;
            changed |= de_temporary(&ctx, fcn)?;
            changed |= split_aggregates(&ctx, fcn)?;
            changed |= propagate_known_values(&ctx, fcn)?;
            changed |= propagate_single_assignments(&ctx, fcn)?;
            changed |= common_statements(&ctx, fcn)?;
            changed |= unify_blocks(&ctx, fcn)?;
            changed |= dead_drop_flags(&ctx, fcn)?;
            changed |= dead_assignments(&ctx, fcn)?;
            changed |= noop_removal(&ctx, fcn)?;
            changed |= inline::run(&ctx, fcn, &lookup)?;
            gc::partial(fcn);
            if !changed {
                break;
            }
            pass_num += 1;
            if pass_num >= MAX_PASSES {
                bug!(ctx.sp, "{}: optimisation did not converge after {} rounds", path, MAX_PASSES);
            }
        }
        gc::unify_temporaries(&ctx, fcn)?;
    }

    gc::collect(&ctx, fcn)?;
    gc::sort_blocks(fcn);
    Ok(())
}

/// Whole-program inlining over an explicit list of translated functions.
pub fn optimise_inline(
    resolve: &Resolve<'_>,
    path: &hir::SimplePath,
    fcn: &mut Function,
    args: &ArgList,
    ret_ty: &hir::TypeRef,
    trans_list: &inline::TransList,
) -> Result<()> {
    let ctx = FnContext::new(resolve, path, args, ret_ty);
    let lookup = |p: &hir::SimplePath| trans_list.get(p);
    let changed = inline::run(&ctx, fcn, &lookup)?;
    if changed {
        block_simplify(&ctx, fcn)?;
        gc::partial(fcn);
        gc::collect(&ctx, fcn)?;
        gc::sort_blocks(fcn);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 1. Block simplification
// ---------------------------------------------------------------------------

/// Fold `Goto`-only blocks into their users and merge single-predecessor
/// chains; coalesce adjacent scope-end markers.
fn block_simplify(_ctx: &FnContext<'_>, fcn: &mut Function) -> Result<bool> {
    let mut changed = false;

    // Forward every reference through empty Goto-only blocks.
    let forward: Vec<BlockId> = fcn
        .blocks
        .indices()
        .map(|bb| {
            let mut cur = bb;
            let mut hops = 0;
            while fcn.blocks[cur].statements.is_empty() {
                let Terminator::Goto(t) = &fcn.blocks[cur].terminator else { break };
                if *t == cur || hops > fcn.blocks.len() {
                    break;
                }
                cur = *t;
                hops += 1;
            }
            cur
        })
        .collect();
    for block in fcn.blocks.iter_mut() {
        block.terminator.visit_targets_mut(&mut |t| {
            let new = forward[t.index()];
            if new != *t {
                *t = new;
                changed = true;
            }
        });
    }

    // Merge a straight-line pair when the target has no other predecessor.
    let cfg = ControlFlowGraph::new(fcn);
    for bb_idx in 0..fcn.blocks.len() {
        let bb = BlockId(bb_idx as u32);
        let Terminator::Goto(target) = &fcn.blocks[bb].terminator else { continue };
        let target = *target;
        if target == bb || target == Function::ENTRY {
            continue;
        }
        let preds = cfg.preds(target);
        if preds.len() != 1 || preds[0] != bb {
            continue;
        }
        let merged = std::mem::take(&mut fcn.blocks[target]);
        let this = &mut fcn.blocks[bb];
        this.statements.extend(merged.statements);
        this.terminator = merged.terminator;
        changed = true;
        // The merged-away block stays as an unreachable stub for the
        // partial GC.
    }

    // Adjacent scope-end markers collapse into one.
    for block in fcn.blocks.iter_mut() {
        let stmts = &mut block.statements;
        let mut i = 0;
        while i + 1 < stmts.len() {
            if let (Statement::ScopeEnd { .. }, Statement::ScopeEnd { .. }) = (&stmts[i], &stmts[i + 1]) {
                let Statement::ScopeEnd { slots } = stmts.remove(i + 1) else { unreachable!() };
                let Statement::ScopeEnd { slots: first } = &mut stmts[i] else { unreachable!() };
                first.extend(slots);
                first.sort();
                first.dedup();
                changed = true;
            } else {
                i += 1;
            }
        }
    }

    Ok(changed)
}

// ---------------------------------------------------------------------------
// 2. Constant propagation
// ---------------------------------------------------------------------------

/// Block-local constant tracking: fold constant operations, substitute known
/// values, collapse conditional terminators and drop flags, and fold the
/// value-returning intrinsics.
fn const_propagate(ctx: &FnContext<'_>, fcn: &mut Function) -> Result<bool> {
    let mut changed = false;

    for bb_idx in 0..fcn.blocks.len() {
        let bb = BlockId(bb_idx as u32);
        let mut known: FxHashMap<LocalId, Constant> = FxHashMap::default();
        let mut known_variants: FxHashMap<LocalId, u32> = FxHashMap::default();
        let mut known_flags: FxHashMap<FlagId, bool> = FxHashMap::default();

        let mut block = std::mem::take(&mut fcn.blocks[bb]);
        let mut kept = Vec::with_capacity(block.statements.len());
        for mut stmt in block.statements.drain(..) {
            match &mut stmt {
                Statement::Assign { dst, src } => {
                    // Substitute known constants into the sources.
                    substitute_known(src, &known, &mut changed);
                    if let Some(folded) = fold_rvalue(src) {
                        *src = folded;
                        changed = true;
                    }
                    // Update tracking.
                    if let Some(id) = dst.as_local() {
                        known.remove(&id);
                        known_variants.remove(&id);
                        match src {
                            RValue::Constant(c) => {
                                known.insert(id, c.clone());
                            }
                            RValue::EnumVariant { index, .. } => {
                                known_variants.insert(id, *index);
                            }
                            _ => {}
                        }
                    } else if let Root::Local(id) = dst.root {
                        known.remove(&id);
                        known_variants.remove(&id);
                    }
                    kept.push(stmt);
                }
                Statement::SetDropFlag { idx, new_val, other } => {
                    if let Some(o) = other {
                        if let Some(&ov) = known_flags.get(o) {
                            *new_val ^= ov;
                            *other = None;
                            changed = true;
                        }
                    }
                    if other.is_none() {
                        known_flags.insert(*idx, *new_val);
                    } else {
                        known_flags.remove(idx);
                    }
                    kept.push(stmt);
                }
                Statement::Drop { flag_idx, .. } => {
                    match flag_idx.and_then(|f| known_flags.get(&f).copied()) {
                        Some(false) => {
                            // Statically disabled drop.
                            changed = true;
                        }
                        Some(true) => {
                            *flag_idx = None;
                            changed = true;
                            kept.push(stmt);
                        }
                        None => kept.push(stmt),
                    }
                }
                Statement::Asm(_) | Statement::Asm2(_) => {
                    let mut outs: Vec<LocalId> = Vec::new();
                    stmt.visit_lvalues(&mut |lv| {
                        if let Root::Local(id) = lv.root {
                            outs.push(id);
                        }
                    });
                    for id in outs {
                        known.remove(&id);
                        known_variants.remove(&id);
                    }
                    kept.push(stmt);
                }
                Statement::ScopeEnd { .. } => kept.push(stmt),
            }
        }
        block.statements = kept;

        // Terminator collapses.
        let new_term: Option<Terminator> = match &block.terminator {
            Terminator::If { cond, bb_true, bb_false } => {
                match cond.as_local().and_then(|id| known.get(&id)) {
                    Some(Constant::Bool(b)) => Some(Terminator::Goto(if *b { *bb_true } else { *bb_false })),
                    _ => None,
                }
            }
            Terminator::Switch { val, targets } => val
                .as_local()
                .and_then(|id| known_variants.get(&id))
                .and_then(|&variant| targets.get(variant as usize))
                .map(|&target| Terminator::Goto(target)),
            Terminator::SwitchValue { val, def_target, targets, values } => val
                .as_local()
                .and_then(|id| known.get(&id))
                .and_then(|c| switch_value_target(c, targets, values, *def_target))
                .map(Terminator::Goto),
            Terminator::Call {
                ret_block,
                ret_val,
                fcn: CallTarget::Intrinsic { name, params },
                args,
                ..
            } => match fold_intrinsic(ctx, name.as_str(), params, args)? {
                Some(rv) => {
                    block.statements.push(Statement::Assign { dst: ret_val.clone(), src: rv });
                    Some(Terminator::Goto(*ret_block))
                }
                None => None,
            },
            _ => None,
        };
        if let Some(t) = new_term {
            block.terminator = t;
            changed = true;
        }

        fcn.blocks[bb] = block;
    }

    Ok(changed)
}

fn substitute_known(src: &mut RValue, known: &FxHashMap<LocalId, Constant>, changed: &mut bool) {
    if let RValue::Use(lv) = src {
        if let Some(c) = lv.as_local().and_then(|id| known.get(&id)) {
            *src = RValue::Constant(c.clone());
            *changed = true;
            return;
        }
    }
    let mut subst = |p: &mut Param| {
        if let Param::LValue(lv) = p {
            if let Some(c) = lv.as_local().and_then(|id| known.get(&id)) {
                *p = Param::Constant(c.clone());
                *changed = true;
            }
        }
    };
    match src {
        RValue::BinOp { val_l, val_r, .. } => {
            subst(val_l);
            subst(val_r);
        }
        RValue::SizedArray { val, .. } | RValue::UnionVariant { val, .. } => subst(val),
        RValue::MakeDst { ptr_val, meta_val } => {
            subst(ptr_val);
            subst(meta_val);
        }
        RValue::Tuple { vals } | RValue::Array { vals } | RValue::EnumVariant { vals, .. }
        | RValue::Struct { vals, .. } => {
            for v in vals {
                subst(v);
            }
        }
        _ => {}
    }
}

fn switch_value_target(
    c: &Constant,
    targets: &[BlockId],
    values: &crate::mir::SwitchValues,
    def: BlockId,
) -> Option<BlockId> {
    use crate::mir::SwitchValues as SV;
    let idx = match (c, values) {
        (Constant::Uint { v, .. }, SV::Unsigned(vals)) => vals.iter().position(|x| x == v),
        (Constant::Int { v, .. }, SV::Signed(vals)) => vals.iter().position(|x| x == v),
        (Constant::StaticString(s), SV::String(vals)) => vals.iter().position(|x| x == s),
        (Constant::Bytes(b), SV::Bytes(vals)) => vals.iter().position(|x| x == b),
        _ => return None,
    };
    Some(match idx {
        Some(i) => targets[i],
        None => def,
    })
}

/// Fold a constant-operand rvalue into a plain constant (or constant pair
/// for the overflow-checked forms).
fn fold_rvalue(src: &RValue) -> Option<RValue> {
    match src {
        RValue::BinOp { val_l: Param::Constant(l), op, val_r: Param::Constant(r) } => {
            fold_binop(l, *op, r)
        }
        RValue::UniOp { .. } => None, // operand is a place; handled via substitution first
        _ => None,
    }
}

fn fold_binop(l: &Constant, op: BinOp, r: &Constant) -> Option<RValue> {
    // Comparisons work on the structural ordering shared by all constant
    // kinds.
    if op.is_comparison() {
        let ord = l.partial_cmp(r)?;
        let v = match op {
            BinOp::Eq => ord.is_eq(),
            BinOp::Ne => !ord.is_eq(),
            BinOp::Lt => ord.is_lt(),
            BinOp::Le => ord.is_le(),
            BinOp::Gt => ord.is_gt(),
            BinOp::Ge => ord.is_ge(),
            _ => unreachable!(),
        };
        return Some(RValue::Constant(Constant::Bool(v)));
    }

    match (l, r) {
        (&Constant::Uint { v: a, t }, &Constant::Uint { v: b, .. }) => fold_uint(a, op, b, t),
        (&Constant::Int { v: a, t }, &Constant::Int { v: b, .. }) => fold_int(a, op, b, t),
        (&Constant::Bool(a), &Constant::Bool(b)) => {
            let v = match op {
                BinOp::BitAnd => a & b,
                BinOp::BitOr => a | b,
                BinOp::BitXor => a ^ b,
                _ => return None,
            };
            Some(RValue::Constant(Constant::Bool(v)))
        }
        _ => None,
    }
}

fn uint_mask(t: CoreType) -> u64 {
    match t.byte_size() {
        Some(8) | None => u64::MAX,
        Some(n) => (1u64 << (n * 8)) - 1,
    }
}

fn fold_uint(a: u64, op: BinOp, b: u64, t: CoreType) -> Option<RValue> {
    let mask = uint_mask(t);
    let wrap = |v: u128| -> u64 { (v as u64) & mask };
    let make = |v: u64| Some(RValue::Constant(Constant::Uint { v, t }));
    let pair = |v: u64, ov: bool| {
        Some(RValue::Tuple {
            vals: vec![
                Param::Constant(Constant::Uint { v, t }),
                Param::Constant(Constant::Bool(ov)),
            ],
        })
    };
    match op {
        BinOp::Add => make(wrap(a as u128 + b as u128)),
        BinOp::Sub => make(a.wrapping_sub(b) & mask),
        BinOp::Mul => make(wrap(a as u128 * b as u128)),
        BinOp::Div => (b != 0).then(|| wrap((a / b) as u128)).and_then(make),
        BinOp::Rem => (b != 0).then(|| a % b).and_then(make),
        BinOp::AddOv => {
            let full = a as u128 + b as u128;
            pair(wrap(full), full > mask as u128)
        }
        BinOp::SubOv => pair(a.wrapping_sub(b) & mask, a < b),
        BinOp::MulOv => {
            let full = a as u128 * b as u128;
            pair(wrap(full), full > mask as u128)
        }
        BinOp::DivOv => (b != 0).then(|| (a / b) & mask).and_then(|v| pair(v, false)),
        BinOp::BitAnd => make(a & b),
        BinOp::BitOr => make(a | b),
        BinOp::BitXor => make(a ^ b),
        BinOp::Shl => make(a.checked_shl(b as u32).unwrap_or(0) & mask),
        BinOp::Shr => make((a & mask).checked_shr(b as u32).unwrap_or(0)),
        _ => None,
    }
}

fn fold_int(a: i64, op: BinOp, b: i64, t: CoreType) -> Option<RValue> {
    let make = |v: i64| Some(RValue::Constant(Constant::Int { v, t }));
    match op {
        BinOp::Add => make(a.wrapping_add(b)),
        BinOp::Sub => make(a.wrapping_sub(b)),
        BinOp::Mul => make(a.wrapping_mul(b)),
        BinOp::Div => (b != 0).then(|| a.wrapping_div(b)).and_then(make),
        BinOp::Rem => (b != 0).then(|| a.wrapping_rem(b)).and_then(make),
        BinOp::BitAnd => make(a & b),
        BinOp::BitOr => make(a | b),
        BinOp::BitXor => make(a ^ b),
        BinOp::Shl => make(a.checked_shl(b as u32).unwrap_or(0)),
        BinOp::Shr => make(a.checked_shr(b as u32).unwrap_or(if a < 0 { -1 } else { 0 })),
        _ => None,
    }
}

/// Fold the value-returning intrinsics whose results are static.
fn fold_intrinsic(
    ctx: &FnContext<'_>,
    name: &str,
    params: &hir::PathParams,
    args: &[Param],
) -> Result<Option<RValue>> {
    let usize_const = |v: u64| RValue::Constant(Constant::Uint { v, t: CoreType::Usize });
    Ok(match name {
        "size_of" => params
            .types
            .first()
            .and_then(|ty| ctx.resolve.size_of(ty))
            .map(usize_const),
        "align_of" | "min_align_of" => params
            .types
            .first()
            .and_then(|ty| ctx.resolve.align_of(ty))
            .map(usize_const),
        "size_of_val" => {
            // Only static when the pointee is sized.
            let Some(ty) = params.types.first() else { return Ok(None) };
            if ctx.resolve.type_is_sized(ty) {
                ctx.resolve.size_of(ty).map(usize_const)
            } else {
                None
            }
        }
        "min_align_of_val" => {
            let Some(ty) = params.types.first() else { return Ok(None) };
            if ctx.resolve.type_is_sized(ty) {
                ctx.resolve.align_of(ty).map(usize_const)
            } else {
                None
            }
        }
        "bswap" => {
            // Byte-sized types swap to themselves.
            let byte_sized = params
                .types
                .first()
                .and_then(|ty| ty.as_primitive())
                .and_then(CoreType::byte_size)
                == Some(1);
            if !byte_sized {
                return Ok(None);
            }
            match args.first() {
                Some(Param::Constant(c)) => Some(RValue::Constant(c.clone())),
                Some(Param::LValue(lv)) => Some(RValue::Use(lv.clone())),
                _ => None,
            }
        }
        "slice_len" => match args.first() {
            Some(Param::LValue(lv)) => Some(RValue::DstMeta { val: lv.clone() }),
            _ => None,
        },
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// 3. Temporary elimination
// ---------------------------------------------------------------------------

struct UsageCounts {
    reads: Vec<usize>,
    writes: Vec<usize>,
    borrows: Vec<usize>,
}

fn usage_counts(fcn: &Function) -> UsageCounts {
    let n = fcn.locals.len();
    let mut counts = UsageCounts { reads: vec![0; n], writes: vec![0; n], borrows: vec![0; n] };

    let mut count_read = |counts: &mut UsageCounts, lv: &LValue| {
        if let Root::Local(id) = lv.root {
            counts.reads[id.index()] += 1;
        }
        for w in &lv.wrappers {
            if let Wrapper::Index(id) = w {
                counts.reads[id.index()] += 1;
            }
        }
    };

    for block in fcn.blocks.iter() {
        for stmt in &block.statements {
            match stmt {
                Statement::Assign { dst, src } => {
                    match src {
                        RValue::Borrow { val, .. } => {
                            if let Root::Local(id) = val.root {
                                counts.borrows[id.index()] += 1;
                            }
                            count_read(&mut counts, val);
                        }
                        other => other.visit_lvalues(&mut |lv| count_read(&mut counts, lv)),
                    }
                    if let Some(id) = dst.as_local() {
                        counts.writes[id.index()] += 1;
                    } else {
                        count_read(&mut counts, dst);
                        if let Root::Local(id) = dst.root {
                            counts.writes[id.index()] += 1;
                        }
                    }
                }
                other => other.visit_lvalues(&mut |lv| count_read(&mut counts, lv)),
            }
        }
        match &block.terminator {
            Terminator::Call { ret_val, .. } => {
                block.terminator.visit_lvalues(&mut |lv| {
                    if lv != ret_val {
                        count_read(&mut counts, lv);
                    }
                });
                if let Some(id) = ret_val.as_local() {
                    counts.writes[id.index()] += 1;
                } else {
                    count_read(&mut counts, ret_val);
                }
            }
            other => other.visit_lvalues(&mut |lv| count_read(&mut counts, lv)),
        }
    }

    counts
}

/// Replace write-once/read-once temporaries with their defining rvalue at
/// the use site, within one block, cancelling on any interfering write.
fn de_temporary(ctx: &FnContext<'_>, fcn: &mut Function) -> Result<bool> {
    let counts = usage_counts(fcn);
    let is_candidate = |id: LocalId| {
        counts.writes[id.index()] == 1 && counts.reads[id.index()] == 1 && counts.borrows[id.index()] == 0
    };

    let mut changed = false;
    for bb_idx in 0..fcn.blocks.len() {
        let bb = BlockId(bb_idx as u32);
        let mut remove: Vec<usize> = Vec::new();

        'defs: for def_idx in 0..fcn.blocks[bb].statements.len() {
            let Statement::Assign { dst, src } = &fcn.blocks[bb].statements[def_idx] else {
                continue;
            };
            let Some(tmp) = dst.as_local() else { continue };
            if !is_candidate(tmp) || remove.contains(&def_idx) {
                continue;
            }
            let src = src.clone();

            // Everything the defining rvalue reads; a write to any of these
            // before the use cancels the substitution.
            let mut deps: FxHashSet<LocalId> = FxHashSet::default();
            src.visit_lvalues(&mut |lv| lv.visit_locals(&mut |id| {
                deps.insert(id);
            }));
            deps.insert(tmp);

            for use_idx in def_idx + 1..fcn.blocks[bb].statements.len() {
                let stmt = &fcn.blocks[bb].statements[use_idx];
                if statement_reads_local(stmt, tmp) {
                    // Substitute and retire the definition.
                    let src_for_use = src.clone();
                    let stmt = &mut fcn.blocks[bb].statements[use_idx];
                    if try_substitute_stmt(stmt, tmp, &src_for_use) {
                        remove.push(def_idx);
                        changed = true;
                    }
                    continue 'defs;
                }
                if statement_writes_any(stmt, &deps) {
                    continue 'defs;
                }
            }

            // Use in the terminator.
            let mut term = std::mem::replace(&mut fcn.blocks[bb].terminator, Terminator::Incomplete);
            if terminator_reads_local(&term, tmp) && try_substitute_term(&mut term, tmp, &src) {
                remove.push(def_idx);
                changed = true;
            }
            fcn.blocks[bb].terminator = term;
        }

        remove.sort_unstable();
        for idx in remove.into_iter().rev() {
            fcn.blocks[bb].statements.remove(idx);
        }
    }

    let _ = ctx;
    Ok(changed)
}

fn statement_reads_local(stmt: &Statement, id: LocalId) -> bool {
    let mut found = false;
    match stmt {
        Statement::Assign { dst, src } => {
            src.visit_lvalues(&mut |lv| {
                if lv.root == Root::Local(id) {
                    found = true;
                }
            });
            // Index locals inside the destination are reads too.
            for w in &dst.wrappers {
                if *w == Wrapper::Index(id) {
                    found = true;
                }
            }
        }
        other => other.visit_lvalues(&mut |lv| {
            if lv.root == Root::Local(id) {
                found = true;
            }
        }),
    }
    found
}

fn terminator_reads_local(term: &Terminator, id: LocalId) -> bool {
    let mut found = false;
    term.visit_lvalues(&mut |lv| {
        if lv.root == Root::Local(id) {
            found = true;
        }
    });
    found
}

fn statement_writes_any(stmt: &Statement, deps: &FxHashSet<LocalId>) -> bool {
    match stmt {
        Statement::Assign { dst, src } => {
            if let Root::Local(id) = dst.root {
                if deps.contains(&id) {
                    return true;
                }
            }
            // Moves of dependencies also invalidate.
            let mut moved = false;
            if let RValue::Use(lv) = src {
                if let Some(id) = lv.as_local() {
                    moved = deps.contains(&id);
                }
            }
            moved
        }
        Statement::Drop { slot, .. } => {
            matches!(slot.root, Root::Local(id) if deps.contains(&id))
        }
        Statement::Asm(_) | Statement::Asm2(_) => true,
        Statement::SetDropFlag { .. } | Statement::ScopeEnd { .. } => false,
    }
}

/// Substitute the defining rvalue of `tmp` into a statement that reads it.
fn try_substitute_stmt(stmt: &mut Statement, tmp: LocalId, src: &RValue) -> bool {
    let Statement::Assign { src: use_src, .. } = stmt else { return false };

    // Whole-rvalue move: `y = tmp` becomes `y = <src>`.
    if matches!(use_src, RValue::Use(lv) if lv.as_local() == Some(tmp)) {
        *use_src = src.clone();
        return true;
    }

    // Otherwise only simple sources can replace the operand in place.
    substitute_simple(use_src, tmp, src)
}

fn try_substitute_term(term: &mut Terminator, tmp: LocalId, src: &RValue) -> bool {
    let replacement = match src {
        RValue::Use(lv) => Some(Param::LValue(lv.clone())),
        RValue::Constant(c) => Some(Param::Constant(c.clone())),
        _ => None,
    };
    let Some(replacement) = replacement else { return false };

    if let Terminator::Call { args, fcn, .. } = term {
        for a in args.iter_mut() {
            if matches!(a, Param::LValue(lv) if lv.as_local() == Some(tmp)) {
                *a = replacement.clone();
                return true;
            }
        }
        if let (CallTarget::Value(lv), Param::LValue(new_lv)) = (&mut *fcn, &replacement) {
            if lv.as_local() == Some(tmp) {
                *lv = new_lv.clone();
                return true;
            }
        }
    }
    false
}

/// Substitute a simple (place or constant) definition into operand position.
fn substitute_simple(use_src: &mut RValue, tmp: LocalId, src: &RValue) -> bool {
    let simple: Option<Param> = match src {
        RValue::Use(lv) => Some(Param::LValue(lv.clone())),
        RValue::Constant(c) => Some(Param::Constant(c.clone())),
        _ => None,
    };

    // A place definition can also substitute into projection roots:
    // `tmp = y; z = tmp.1` becomes `z = y.1`.
    if let RValue::Use(def_lv) = src {
        let mut done = false;
        use_src.visit_lvalues_mut(&mut |lv| {
            if !done && lv.root == Root::Local(tmp) {
                let wrappers = lv.wrappers.clone();
                *lv = def_lv.clone_wrapped(wrappers);
                done = true;
            }
        });
        if done {
            return true;
        }
    }

    let Some(simple) = simple else { return false };
    let mut done = false;
    let mut subst = |p: &mut Param| {
        if !done && matches!(p, Param::LValue(lv) if lv.as_local() == Some(tmp)) {
            *p = simple.clone();
            done = true;
        }
    };
    match use_src {
        RValue::BinOp { val_l, val_r, .. } => {
            subst(val_l);
            subst(val_r);
        }
        RValue::SizedArray { val, .. } | RValue::UnionVariant { val, .. } => subst(val),
        RValue::MakeDst { ptr_val, meta_val } => {
            subst(ptr_val);
            subst(meta_val);
        }
        RValue::Tuple { vals } | RValue::Array { vals } | RValue::EnumVariant { vals, .. }
        | RValue::Struct { vals, .. } => {
            for v in vals {
                subst(v);
            }
        }
        _ => {}
    }
    done
}

// ---------------------------------------------------------------------------
// 4. Aggregate splitting
// ---------------------------------------------------------------------------

/// A local assigned one tuple and only ever accessed through `Field`
/// projections splits into one local per element.
fn split_aggregates(_ctx: &FnContext<'_>, fcn: &mut Function) -> Result<bool> {
    // Candidates: exactly one whole write which is a Tuple rvalue, and every
    // other appearance is a Field projection.
    #[derive(Default, Clone)]
    struct Info {
        whole_writes: usize,
        field_only: bool,
        other_uses: usize,
    }
    let mut info = vec![Info { whole_writes: 0, field_only: true, other_uses: 0 }; fcn.locals.len()];

    let mut scan_lv = |info: &mut Vec<Info>, lv: &LValue, is_whole_write: bool| {
        if let Root::Local(id) = lv.root {
            if is_whole_write && lv.wrappers.is_empty() {
                info[id.index()].whole_writes += 1;
            } else if !matches!(lv.wrappers.first(), Some(Wrapper::Field(_))) {
                info[id.index()].field_only = false;
            } else {
                info[id.index()].other_uses += 1;
            }
        }
        for w in &lv.wrappers {
            if let Wrapper::Index(id) = w {
                info[id.index()].field_only = false;
            }
        }
    };

    let mut tuple_defs: FxHashMap<LocalId, (BlockId, usize, usize)> = FxHashMap::default();
    for (bb, block) in fcn.blocks.iter_enumerated() {
        for (stmt_idx, stmt) in block.statements.iter().enumerate() {
            match stmt {
                Statement::Assign { dst, src } => {
                    src.visit_lvalues(&mut |lv| scan_lv(&mut info, lv, false));
                    scan_lv(&mut info, dst, true);
                    if let (Some(id), RValue::Tuple { vals }) = (dst.as_local(), src) {
                        tuple_defs.insert(id, (bb, stmt_idx, vals.len()));
                    }
                }
                other => other.visit_lvalues(&mut |lv| scan_lv(&mut info, lv, false)),
            }
        }
        match &block.terminator {
            Terminator::Call { ret_val, .. } => {
                block.terminator.visit_lvalues(&mut |lv| {
                    let whole = std::ptr::eq(lv, ret_val);
                    scan_lv(&mut info, lv, whole);
                });
            }
            other => other.visit_lvalues(&mut |lv| scan_lv(&mut info, lv, false)),
        }
    }

    let mut changed = false;
    let candidates: Vec<LocalId> = tuple_defs
        .keys()
        .copied()
        .filter(|id| {
            let i = &info[id.index()];
            i.whole_writes == 1 && i.field_only && i.other_uses > 0
        })
        .collect();

    for id in candidates {
        let ty = fcn.locals[id].clone();
        let Type::Tuple(items) = ty.kind() else { continue };
        let (bb, stmt_idx, arity) = tuple_defs[&id];
        if items.len() != arity {
            continue;
        }

        // One fresh local per element.
        let fresh: Vec<LocalId> = items.iter().map(|t| fcn.new_local(t.clone())).collect();

        // Split the defining assignment element-wise.
        let Statement::Assign { src: RValue::Tuple { vals }, .. } =
            fcn.blocks[bb].statements[stmt_idx].clone()
        else {
            continue;
        };
        let split: Vec<Statement> = fresh
            .iter()
            .zip(vals)
            .map(|(new_id, val)| Statement::Assign {
                dst: LValue::new_local(*new_id),
                src: match val {
                    Param::LValue(lv) => RValue::Use(lv),
                    Param::Constant(c) => RValue::Constant(c),
                    Param::Borrow { kind, val } => RValue::Borrow { kind, val },
                },
            })
            .collect();
        fcn.blocks[bb].statements.splice(stmt_idx..=stmt_idx, split);

        // Retarget every projection.
        let remap = |lv: &mut LValue| {
            if lv.root == Root::Local(id) {
                if let Some(Wrapper::Field(f)) = lv.wrappers.first().copied() {
                    lv.root = Root::Local(fresh[f as usize]);
                    lv.wrappers.remove(0);
                }
            }
        };
        for block in fcn.blocks.iter_mut() {
            for stmt in &mut block.statements {
                stmt.visit_lvalues_mut(&mut |lv| remap(lv));
            }
            block.terminator.visit_lvalues_mut(&mut |lv| remap(lv));
        }
        changed = true;
    }

    Ok(changed)
}

// ---------------------------------------------------------------------------
// 5. Known-value propagation
// ---------------------------------------------------------------------------

/// Replace `X.f` with the constant assigned into that element by a dominating
/// `X = (..)` when `X` is Copy and neither has been touched since.
fn propagate_known_values(ctx: &FnContext<'_>, fcn: &mut Function) -> Result<bool> {
    let mut changed = false;

    for block in fcn.blocks.iter_mut() {
        let mut known_tuples: FxHashMap<LocalId, Vec<Param>> = FxHashMap::default();

        for stmt in &mut block.statements {
            if let Statement::Assign { dst, src } = stmt {
                // Substitute reads first.
                let subst_lv = |lv: &LValue| -> Option<Constant> {
                    let Root::Local(id) = lv.root else { return None };
                    if let [Wrapper::Field(f)] = lv.wrappers[..] {
                        if let Some(Param::Constant(c)) = known_tuples.get(&id).and_then(|v| v.get(f as usize)) {
                            return Some(c.clone());
                        }
                    }
                    None
                };
                if let RValue::Use(lv) = src {
                    if let Some(c) = subst_lv(lv) {
                        *src = RValue::Constant(c);
                        changed = true;
                    }
                } else {
                    let mut any = false;
                    visit_params_of(src, &mut |p| {
                        if let Param::LValue(lv) = p {
                            if let Some(c) = subst_lv(lv) {
                                *p = Param::Constant(c);
                                any = true;
                            }
                        }
                    });
                    changed |= any;
                }

                // Track whole-tuple assignments of Copy locals.
                if let Some(id) = dst.as_local() {
                    known_tuples.remove(&id);
                    if let RValue::Tuple { vals } = src {
                        if ctx.resolve.type_is_copy(&fcn.locals[id]) {
                            known_tuples.insert(id, vals.clone());
                        }
                    }
                } else if let Root::Local(id) = dst.root {
                    known_tuples.remove(&id);
                }
            } else {
                // Asm outputs may write arbitrary locals.
                let mut outs = Vec::new();
                stmt.visit_lvalues(&mut |lv| {
                    if let Root::Local(id) = lv.root {
                        outs.push(id);
                    }
                });
                for id in outs {
                    known_tuples.remove(&id);
                }
            }
        }
    }

    Ok(changed)
}

fn visit_params_of(rv: &mut RValue, f: &mut impl FnMut(&mut Param)) {
    match rv {
        RValue::SizedArray { val, .. } | RValue::UnionVariant { val, .. } => f(val),
        RValue::BinOp { val_l, val_r, .. } => {
            f(val_l);
            f(val_r);
        }
        RValue::MakeDst { ptr_val, meta_val } => {
            f(ptr_val);
            f(meta_val);
        }
        RValue::Tuple { vals } | RValue::Array { vals } | RValue::EnumVariant { vals, .. }
        | RValue::Struct { vals, .. } => {
            for v in vals {
                f(v);
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// 6. Single-assignment propagation
// ---------------------------------------------------------------------------

fn propagate_single_assignments(ctx: &FnContext<'_>, fcn: &mut Function) -> Result<bool> {
    let mut changed = false;
    let counts = usage_counts(fcn);

    // Backward: a call writing a temporary that is immediately copied on
    // retargets the call at the final destination.
    for bb_idx in 0..fcn.blocks.len() {
        let bb = BlockId(bb_idx as u32);
        let Terminator::Call { ret_val, ret_block, .. } = &fcn.blocks[bb].terminator else {
            continue;
        };
        let Some(tmp) = ret_val.as_local() else { continue };
        if counts.writes[tmp.index()] != 1 || counts.reads[tmp.index()] != 1 || counts.borrows[tmp.index()] != 0 {
            continue;
        }
        let ret_block = *ret_block;
        let Some(Statement::Assign { dst, src }) = fcn.blocks[ret_block].statements.first() else {
            continue;
        };
        if !matches!(src, RValue::Use(lv) if lv.as_local() == Some(tmp)) {
            continue;
        }
        // The destination must not be recomputed between (it is written
        // directly by the call now).
        let dst = dst.clone();
        fcn.blocks[ret_block].statements.remove(0);
        if let Terminator::Call { ret_val, .. } = &mut fcn.blocks[bb].terminator {
            *ret_val = dst;
        }
        changed = true;
    }

    let _ = ctx;
    Ok(changed)
}

// ---------------------------------------------------------------------------
// 7. Common statement hoisting
// ---------------------------------------------------------------------------

/// When every predecessor of a block ends with the same statement (and falls
/// straight through), the statement moves into the block's front.
fn common_statements(_ctx: &FnContext<'_>, fcn: &mut Function) -> Result<bool> {
    let cfg = ControlFlowGraph::new(fcn);
    let mut changed = false;

    for bb_idx in 0..fcn.blocks.len() {
        let bb = BlockId(bb_idx as u32);
        let preds = cfg.preds(bb);
        if preds.len() < 2 || bb == Function::ENTRY {
            continue;
        }
        // Straight Goto edges only, and a shared trailing statement.
        let all_goto = preds
            .iter()
            .all(|&p| matches!(fcn.blocks[p].terminator, Terminator::Goto(t) if t == bb));
        if !all_goto {
            continue;
        }
        let Some(last) = fcn.blocks[preds[0]].statements.last().cloned() else { continue };
        if !preds.iter().all(|&p| fcn.blocks[p].statements.last() == Some(&last)) {
            continue;
        }

        for &p in preds {
            fcn.blocks[p].statements.pop();
        }
        fcn.blocks[bb].statements.insert(0, last);
        changed = true;
    }

    Ok(changed)
}

// ---------------------------------------------------------------------------
// 8. Block unification
// ---------------------------------------------------------------------------

/// Structurally identical blocks merge; all references move to the first.
fn unify_blocks(_ctx: &FnContext<'_>, fcn: &mut Function) -> Result<bool> {
    let mut replacement: FxHashMap<BlockId, BlockId> = FxHashMap::default();
    {
        let mut seen: FxHashMap<(&[Statement], &Terminator), BlockId> = FxHashMap::default();
        for (bb, block) in fcn.blocks.iter_enumerated() {
            if matches!(block.terminator, Terminator::Incomplete) {
                continue;
            }
            match seen.entry((block.statements.as_slice(), &block.terminator)) {
                std::collections::hash_map::Entry::Occupied(e) => {
                    replacement.insert(bb, *e.get());
                }
                std::collections::hash_map::Entry::Vacant(e) => {
                    e.insert(bb);
                }
            }
        }
    }
    if replacement.is_empty() {
        return Ok(false);
    }

    for block in fcn.blocks.iter_mut() {
        block.terminator.visit_targets_mut(&mut |t| {
            if let Some(new) = replacement.get(t) {
                *t = *new;
            }
        });
    }
    Ok(true)
}

// ---------------------------------------------------------------------------
// 9-11. Dead flag / dead assignment / no-op removal
// ---------------------------------------------------------------------------

/// Remove flag updates whose flag no drop (or other update) ever consults.
fn dead_drop_flags(_ctx: &FnContext<'_>, fcn: &mut Function) -> Result<bool> {
    let mut consulted: FxHashSet<FlagId> = FxHashSet::default();
    for block in fcn.blocks.iter() {
        for stmt in &block.statements {
            match stmt {
                Statement::Drop { flag_idx: Some(f), .. } => {
                    consulted.insert(*f);
                }
                Statement::SetDropFlag { other: Some(o), .. } => {
                    consulted.insert(*o);
                }
                _ => {}
            }
        }
    }

    let mut changed = false;
    for block in fcn.blocks.iter_mut() {
        block.statements.retain(|stmt| match stmt {
            Statement::SetDropFlag { idx, .. } if !consulted.contains(idx) => {
                changed = true;
                false
            }
            _ => true,
        });
    }
    Ok(changed)
}

/// Remove assignments to locals nothing reads, when losing the assignment
/// cannot change drop behaviour.
fn dead_assignments(ctx: &FnContext<'_>, fcn: &mut Function) -> Result<bool> {
    let counts = usage_counts(fcn);
    let mut removable: Vec<(BlockId, usize)> = Vec::new();

    for (bb, block) in fcn.blocks.iter_enumerated() {
        for (stmt_idx, stmt) in block.statements.iter().enumerate() {
            let Statement::Assign { dst, src } = stmt else { continue };
            let Some(id) = dst.as_local() else { continue };
            if counts.reads[id.index()] != 0 || counts.borrows[id.index()] != 0 {
                continue;
            }
            // Keep assignments that move non-Copy values: removal would
            // change what gets dropped.
            let mut moves_value = false;
            let mut check_move = |lv: &LValue| {
                if lv.wrappers.is_empty() {
                    if let Ok(ty) = ctx.lvalue_type(fcn, lv) {
                        if !ctx.resolve.type_is_copy(&ty) {
                            moves_value = true;
                        }
                    }
                }
            };
            match src {
                RValue::Use(lv) => check_move(lv),
                RValue::Borrow { .. } | RValue::Constant(_) => {}
                other => other.visit_lvalues(&mut |lv| check_move(lv)),
            }
            if !moves_value {
                removable.push((bb, stmt_idx));
            }
        }
    }

    let changed = !removable.is_empty();
    for (bb, stmt_idx) in removable.into_iter().rev() {
        fcn.blocks[bb].statements.remove(stmt_idx);
    }
    Ok(changed)
}

/// Remove `x = x` and reborrow no-ops (`x = &*x`).
fn noop_removal(_ctx: &FnContext<'_>, fcn: &mut Function) -> Result<bool> {
    let mut changed = false;
    for block in fcn.blocks.iter_mut() {
        block.statements.retain(|stmt| {
            let Statement::Assign { dst, src } = stmt else { return true };
            let is_noop = match src {
                RValue::Use(lv) => lv == dst,
                RValue::Borrow { val, .. } => {
                    val.wrappers.last() == Some(&Wrapper::Deref) && val.clone_unwrapped(1) == *dst
                }
                _ => false,
            };
            if is_noop {
                changed = true;
            }
            !is_noop
        });
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binop_folding_wraps_to_width() {
        let a = Constant::Uint { v: 0xFF, t: CoreType::U8 };
        let b = Constant::Uint { v: 1, t: CoreType::U8 };
        match fold_binop(&a, BinOp::Add, &b) {
            Some(RValue::Constant(Constant::Uint { v, .. })) => assert_eq!(v, 0),
            other => panic!("unexpected fold result {:?}", other),
        }
        match fold_binop(&a, BinOp::AddOv, &b) {
            Some(RValue::Tuple { vals }) => {
                assert_eq!(vals[0], Param::Constant(Constant::Uint { v: 0, t: CoreType::U8 }));
                assert_eq!(vals[1], Param::Constant(Constant::Bool(true)));
            }
            other => panic!("unexpected fold result {:?}", other),
        }
    }

    #[test]
    fn comparison_folding() {
        let a = Constant::Uint { v: 3, t: CoreType::U32 };
        let b = Constant::Uint { v: 4, t: CoreType::U32 };
        match fold_binop(&a, BinOp::Lt, &b) {
            Some(RValue::Constant(Constant::Bool(true))) => {}
            other => panic!("unexpected fold result {:?}", other),
        }
    }
}
