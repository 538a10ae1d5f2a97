//! Function inlining.
//!
//! Candidates are small shapes only: a single short block, a three-block
//! call wrapper, or a switch fanning out to trivial return arms. Recursion
//! is rejected. The callee's body is cloned with every local, drop flag,
//! and block index shifted by an additive offset, its `Return`/`Diverge`
//! rewired to the call's return/panic edges, and every type and path
//! monomorphised through the call's parameters. Arguments are staged into
//! fresh temporaries first so move semantics stay intact.

use crate::helpers::FnContext;
use crate::mir::{
    AsmParam, BlockId, CallTarget, Constant, FlagId, Function, LValue, LocalId, Param, RValue,
    Root, Statement, Terminator, Wrapper,
};
use crate::Result;
use rillc_hir as hir;
use rillc_hir::{MonomorphState, TypeRef};
use rillc_util::{FxHashMap, Idx};

/// Functions selected for translation, as consumed by the post-enumeration
/// inlining entry point.
#[derive(Default)]
pub struct TransList {
    fns: FxHashMap<hir::SimplePath, Function>,
}

impl TransList {
    pub fn new() -> Self {
        TransList::default()
    }

    pub fn insert(&mut self, path: hir::SimplePath, fcn: Function) {
        self.fns.insert(path, fcn);
    }

    pub fn get(&self, path: &hir::SimplePath) -> Option<&Function> {
        self.fns.get(path)
    }
}

/// Inline every eligible callee. Returns whether anything was inlined.
pub fn run<'r>(
    ctx: &FnContext<'_>,
    fcn: &mut Function,
    lookup: &impl Fn(&hir::SimplePath) -> Option<&'r Function>,
) -> Result<bool> {
    let mut changed = false;
    let original_len = fcn.blocks.len();

    for bb_idx in 0..original_len {
        let bb = BlockId(bb_idx as u32);
        let Terminator::Call { fcn: CallTarget::Path(hir::Path::Generic(gp)), .. } =
            &fcn.blocks[bb].terminator
        else {
            continue;
        };
        // Inlining a function into itself would never terminate.
        if gp.path == *ctx.path {
            continue;
        }
        let Some(callee) = lookup(&gp.path) else { continue };
        if !can_inline(callee) {
            continue;
        }
        let gp = gp.clone();
        inline_one(ctx, fcn, bb, &gp, callee)?;
        changed = true;
    }

    Ok(changed)
}

/// Shape filter for inlining candidates.
fn can_inline(fcn: &Function) -> bool {
    match fcn.blocks.len() {
        0 => false,
        1 => {
            let block = &fcn.blocks[Function::ENTRY];
            block.statements.len() <= 10 && !matches!(block.terminator, Terminator::Goto(_))
        }
        3 => {
            let b0 = &fcn.blocks[BlockId(0)];
            if !matches!(b0.terminator, Terminator::Call { .. }) || b0.statements.len() > 10 {
                return false;
            }
            fcn.blocks.iter().skip(1).all(|b| {
                b.statements.len() <= 10
                    && matches!(b.terminator, Terminator::Return | Terminator::Diverge)
            })
        }
        _ => {
            // An outermost switch fanning out to simple return arms.
            let b0 = &fcn.blocks[Function::ENTRY];
            if b0.statements.len() > 5 {
                return false;
            }
            let targets = match &b0.terminator {
                Terminator::Switch { targets, .. } => targets.clone(),
                _ => return false,
            };
            if fcn.blocks.len() != targets.len() + 1 {
                return false;
            }
            targets.iter().all(|&t| {
                let b = &fcn.blocks[t];
                b.statements.len() <= 5
                    && matches!(b.terminator, Terminator::Return | Terminator::Diverge)
            })
        }
    }
}

struct Remap {
    local_ofs: usize,
    flag_ofs: usize,
    bb_ofs: usize,
    arg_temps: Vec<LocalId>,
    ret_val: LValue,
    ret_block: BlockId,
    panic_block: BlockId,
}

fn inline_one(
    ctx: &FnContext<'_>,
    fcn: &mut Function,
    bb: BlockId,
    gp: &hir::GenericPath,
    callee: &Function,
) -> Result<()> {
    let ms = MonomorphState::with_fn_params(&gp.params);
    let generic = !gp.params.is_empty();
    let mono_ty = |ty: &TypeRef| -> Result<TypeRef> {
        if generic {
            ms.monomorph_type(ty).map_err(|e| crate::MirError::bug(ctx.sp, e.to_string()))
        } else {
            Ok(ty.clone())
        }
    };

    let Some((sig_args, _, _)) =
        ctx.resolve.fn_signature(&hir::Path::Generic(gp.clone()))
    else {
        bug!(ctx.sp, "{}: inlining callee {} with no signature", ctx.path, gp);
    };

    // Dismantle the call.
    let old_term = std::mem::replace(&mut fcn.blocks[bb].terminator, Terminator::Incomplete);
    let Terminator::Call { ret_block, panic_block, ret_val, args, .. } = old_term else {
        unreachable!("caller checked the terminator shape");
    };

    // Stage every argument in a fresh temporary; constants and Copy places
    // would otherwise lose their by-value semantics under substitution.
    let mut arg_temps = Vec::with_capacity(args.len());
    for (arg, sig_ty) in args.into_iter().zip(&sig_args) {
        let tmp = fcn.new_local(sig_ty.clone());
        let src = match arg {
            Param::LValue(lv) => RValue::Use(lv),
            Param::Constant(c) => RValue::Constant(c),
            Param::Borrow { kind, val } => RValue::Borrow { kind, val },
        };
        fcn.blocks[bb].statements.push(Statement::Assign { dst: LValue::new_local(tmp), src });
        arg_temps.push(tmp);
    }

    let remap = Remap {
        local_ofs: fcn.locals.len(),
        flag_ofs: fcn.drop_flags.len(),
        bb_ofs: fcn.blocks.len(),
        arg_temps,
        ret_val,
        ret_block,
        panic_block,
    };

    for ty in callee.locals.iter() {
        let ty = mono_ty(ty)?;
        fcn.new_local(ty);
    }
    for &initial in callee.drop_flags.iter() {
        fcn.new_drop_flag(initial);
    }

    for block in callee.blocks.iter() {
        let mut statements = Vec::with_capacity(block.statements.len());
        for stmt in &block.statements {
            let mut stmt = stmt.clone();
            remap_statement(&mut stmt, &remap);
            if generic {
                monomorph_statement(ctx, &ms, &mut stmt)?;
            }
            statements.push(stmt);
        }
        let mut terminator = block.terminator.clone();
        remap_terminator(&mut terminator, &remap);
        if generic {
            monomorph_terminator(ctx, &ms, &mut terminator)?;
        }
        let new_bb = fcn.new_block();
        fcn.blocks[new_bb].statements = statements;
        fcn.blocks[new_bb].terminator = terminator;
    }

    fcn.blocks[bb].terminator = Terminator::Goto(BlockId(remap.bb_ofs as u32));
    Ok(())
}

// ---------------------------------------------------------------------------
// Index remapping
// ---------------------------------------------------------------------------

fn remap_lvalue(lv: &mut LValue, remap: &Remap) {
    let wrappers: Vec<Wrapper> = lv
        .wrappers
        .iter()
        .map(|w| match w {
            Wrapper::Index(id) => Wrapper::Index(LocalId((remap.local_ofs + id.index()) as u32)),
            other => *other,
        })
        .collect();
    match &lv.root {
        Root::Local(id) => {
            lv.root = Root::Local(LocalId((remap.local_ofs + id.index()) as u32));
            lv.wrappers = wrappers;
        }
        Root::Argument(i) => {
            lv.root = Root::Local(remap.arg_temps[*i as usize]);
            lv.wrappers = wrappers;
        }
        Root::Return => {
            *lv = remap.ret_val.clone_wrapped(wrappers);
        }
        Root::Static(_) => {
            lv.wrappers = wrappers;
        }
    }
}

fn remap_flag(flag: FlagId, remap: &Remap) -> FlagId {
    FlagId((remap.flag_ofs + flag.index()) as u32)
}

fn remap_statement(stmt: &mut Statement, remap: &Remap) {
    stmt.visit_lvalues_mut(&mut |lv| remap_lvalue(lv, remap));
    match stmt {
        Statement::SetDropFlag { idx, other, .. } => {
            *idx = remap_flag(*idx, remap);
            if let Some(o) = other {
                *o = remap_flag(*o, remap);
            }
        }
        Statement::Drop { flag_idx: Some(f), .. } => {
            *f = remap_flag(*f, remap);
        }
        Statement::ScopeEnd { slots } => {
            for s in slots.iter_mut() {
                *s = LocalId((remap.local_ofs + s.index()) as u32);
            }
        }
        _ => {}
    }
}

fn remap_terminator(term: &mut Terminator, remap: &Remap) {
    term.visit_lvalues_mut(&mut |lv| remap_lvalue(lv, remap));
    match term {
        Terminator::Return => *term = Terminator::Goto(remap.ret_block),
        Terminator::Diverge => *term = Terminator::Goto(remap.panic_block),
        other => {
            other.visit_targets_mut(&mut |t| {
                *t = BlockId((remap.bb_ofs + t.index()) as u32);
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Monomorphisation of the cloned body
// ---------------------------------------------------------------------------

fn mono_err(ctx: &FnContext<'_>, e: hir::MonomorphError) -> crate::MirError {
    crate::MirError::bug(ctx.sp, format!("{}: {}", ctx.path, e))
}

fn monomorph_statement(ctx: &FnContext<'_>, ms: &MonomorphState<'_>, stmt: &mut Statement) -> Result<()> {
    // Static roots can carry generic paths.
    let mut res = Ok(());
    stmt.visit_lvalues_mut(&mut |lv| {
        if res.is_ok() {
            if let Root::Static(p) = &mut lv.root {
                match ms.monomorph_path(p) {
                    Ok(new) => **p = new,
                    Err(e) => res = Err(mono_err(ctx, e)),
                }
            }
        }
    });
    res?;

    match stmt {
        Statement::Assign { src, .. } => monomorph_rvalue(ctx, ms, src),
        Statement::Asm2(a) => {
            for p in &mut a.params {
                match p {
                    AsmParam::Const(c) => monomorph_constant(ctx, ms, c)?,
                    AsmParam::Sym(p) => *p = ms.monomorph_path(p).map_err(|e| mono_err(ctx, e))?,
                    AsmParam::Reg { input, .. } => {
                        if let Some(Param::Constant(c)) = input {
                            monomorph_constant(ctx, ms, c)?;
                        }
                    }
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn monomorph_rvalue(ctx: &FnContext<'_>, ms: &MonomorphState<'_>, rv: &mut RValue) -> Result<()> {
    match rv {
        RValue::Use(_) | RValue::Borrow { .. } | RValue::UniOp { .. } | RValue::DstMeta { .. }
        | RValue::DstPtr { .. } => Ok(()),
        RValue::Constant(c) => monomorph_constant(ctx, ms, c),
        RValue::Cast { ty, .. } => {
            *ty = ms.monomorph_type(ty).map_err(|e| mono_err(ctx, e))?;
            Ok(())
        }
        RValue::SizedArray { val, count } => {
            *count = ms.monomorph_array_size(count);
            monomorph_param(ctx, ms, val)
        }
        RValue::BinOp { val_l, val_r, .. } => {
            monomorph_param(ctx, ms, val_l)?;
            monomorph_param(ctx, ms, val_r)
        }
        RValue::MakeDst { ptr_val, meta_val } => {
            monomorph_param(ctx, ms, ptr_val)?;
            monomorph_param(ctx, ms, meta_val)
        }
        RValue::UnionVariant { path, val, .. } => {
            *path = ms.monomorph_generic_path(path).map_err(|e| mono_err(ctx, e))?;
            monomorph_param(ctx, ms, val)
        }
        RValue::Tuple { vals } | RValue::Array { vals } => {
            for v in vals {
                monomorph_param(ctx, ms, v)?;
            }
            Ok(())
        }
        RValue::EnumVariant { path, vals, .. } | RValue::Struct { path, vals, .. } => {
            *path = ms.monomorph_generic_path(path).map_err(|e| mono_err(ctx, e))?;
            for v in vals {
                monomorph_param(ctx, ms, v)?;
            }
            Ok(())
        }
    }
}

fn monomorph_param(ctx: &FnContext<'_>, ms: &MonomorphState<'_>, p: &mut Param) -> Result<()> {
    match p {
        Param::Constant(c) => monomorph_constant(ctx, ms, c),
        Param::LValue(_) | Param::Borrow { .. } => Ok(()),
    }
}

fn monomorph_constant(ctx: &FnContext<'_>, ms: &MonomorphState<'_>, c: &mut Constant) -> Result<()> {
    match c {
        Constant::Const(p) => {
            **p = ms.monomorph_path(p).map_err(|e| mono_err(ctx, e))?;
            Ok(())
        }
        Constant::ItemAddr(Some(p)) => {
            **p = ms.monomorph_path(p).map_err(|e| mono_err(ctx, e))?;
            Ok(())
        }
        _ => Ok(()),
    }
}

fn monomorph_terminator(ctx: &FnContext<'_>, ms: &MonomorphState<'_>, term: &mut Terminator) -> Result<()> {
    if let Terminator::Call { fcn, args, .. } = term {
        match fcn {
            CallTarget::Path(p) => *p = ms.monomorph_path(p).map_err(|e| mono_err(ctx, e))?,
            CallTarget::Intrinsic { params, .. } => {
                *params = ms.monomorph_path_params(params).map_err(|e| mono_err(ctx, e))?;
            }
            CallTarget::Value(_) => {}
        }
        for a in args {
            monomorph_param(ctx, ms, a)?;
        }
    }
    Ok(())
}
