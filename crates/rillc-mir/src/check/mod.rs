//! Structural MIR validation.
//!
//! Every failure here is an internal error: the lowering or a preceding
//! transform produced malformed MIR. Checks cover local sizedness, block
//! terminator completeness and target ranges, per-statement type agreement,
//! and call signatures.

pub mod state;

use crate::helpers::FnContext;
use crate::mir::{
    BasicBlock, BinOp, BlockId, CallTarget, Constant, Function, Param, RValue, Statement,
    SwitchValues, Terminator,
};
use crate::{ArgList, Resolve, Result};
use rillc_hir as hir;
use rillc_hir::{types::same_type, CoreType, MetadataType, Type, TypeRef};
use rillc_util::Idx;

/// Validate the structural invariants of `fcn`.
pub fn validate(
    resolve: &Resolve<'_>,
    path: &hir::SimplePath,
    fcn: &Function,
    args: &ArgList,
    ret_ty: &hir::TypeRef,
) -> Result<()> {
    let ctx = FnContext::new(resolve, path, args, ret_ty);

    if fcn.blocks.is_empty() {
        bug!(ctx.sp, "{}: function has no basic blocks", path);
    }

    // Locals must be sized, except when the type still depends on a generic
    // parameter (those are checked after monomorphisation).
    for (id, ty) in fcn.locals.iter_enumerated() {
        match resolve.metadata_type(ty) {
            MetadataType::None | MetadataType::Unknown => {}
            MetadataType::Slice | MetadataType::TraitObject => {
                bug!(ctx.sp, "{}: local _{} has unsized type {}", path, id.0, ty);
            }
        }
    }

    for (bb_id, block) in fcn.blocks.iter_enumerated() {
        check_block(&ctx, fcn, bb_id, block)?;
    }

    Ok(())
}

fn check_block(ctx: &FnContext<'_>, fcn: &Function, bb_id: BlockId, block: &BasicBlock) -> Result<()> {
    for (stmt_idx, stmt) in block.statements.iter().enumerate() {
        check_statement(ctx, fcn, bb_id, stmt_idx, stmt)?;
    }
    check_terminator(ctx, fcn, bb_id, &block.terminator)
}

fn check_statement(
    ctx: &FnContext<'_>,
    fcn: &Function,
    bb_id: BlockId,
    stmt_idx: usize,
    stmt: &Statement,
) -> Result<()> {
    let at = |msg: String| crate::MirError::bug(ctx.sp, format!("{}: bb{}/{}: {}", ctx.path, bb_id.0, stmt_idx, msg));

    match stmt {
        Statement::Assign { dst, src } => {
            let dst_ty = ctx.lvalue_type(fcn, dst)?;
            check_assign(ctx, fcn, &dst_ty, src).map_err(|e| match e {
                crate::MirError::Bug { msg, .. } => at(msg),
                other => other,
            })
        }
        Statement::Drop { slot, flag_idx, .. } => {
            ctx.lvalue_type(fcn, slot)?;
            if let Some(flag) = flag_idx {
                if flag.index() >= fcn.drop_flags.len() {
                    return Err(at(format!("drop flag df{} out of range", flag.0)));
                }
            }
            Ok(())
        }
        Statement::SetDropFlag { idx, other, .. } => {
            if idx.index() >= fcn.drop_flags.len() {
                return Err(at(format!("drop flag df{} out of range", idx.0)));
            }
            if let Some(o) = other {
                if o.index() >= fcn.drop_flags.len() {
                    return Err(at(format!("drop flag df{} out of range", o.0)));
                }
            }
            Ok(())
        }
        Statement::ScopeEnd { slots } => {
            for s in slots {
                if s.index() >= fcn.locals.len() {
                    return Err(at(format!("scope-end local _{} out of range", s.0)));
                }
            }
            Ok(())
        }
        Statement::Asm(a) => {
            for (_, lv) in a.inputs.iter().chain(&a.outputs) {
                ctx.lvalue_type(fcn, lv)?;
            }
            Ok(())
        }
        Statement::Asm2(a) => {
            for p in &a.params {
                if let crate::mir::AsmParam::Reg { input, output, .. } = p {
                    if let Some(i) = input {
                        ctx.param_type(fcn, i)?;
                    }
                    if let Some(o) = output {
                        ctx.lvalue_type(fcn, o)?;
                    }
                }
            }
            Ok(())
        }
    }
}

/// Per-rvalue type agreement against the destination type.
fn check_assign(ctx: &FnContext<'_>, fcn: &Function, dst_ty: &TypeRef, src: &RValue) -> Result<()> {
    let sp = ctx.sp;
    let require = |cond: bool, msg: String| -> Result<()> {
        if cond {
            Ok(())
        } else {
            Err(crate::MirError::bug(sp, msg))
        }
    };
    let types_match = |src_ty: &TypeRef| -> bool {
        src_ty.is_diverge() || same_type(src_ty, dst_ty) || fn_item_matches(src_ty, dst_ty)
    };

    match src {
        RValue::Use(lv) => {
            let src_ty = ctx.lvalue_type(fcn, lv)?;
            require(types_match(&src_ty), format!("assign type mismatch: {} = {} (from {})", dst_ty, src_ty, lv))
        }
        RValue::Constant(c) => {
            let src_ty = ctx.constant_type(c)?;
            require(types_match(&src_ty), format!("assign type mismatch: {} = constant {}", dst_ty, src_ty))
        }
        RValue::SizedArray { val, count } => {
            let Type::Array(inner, dst_count) = dst_ty.kind() else {
                return Err(crate::MirError::bug(sp, format!("sized-array into non-array {}", dst_ty)));
            };
            require(dst_count == count, format!("sized-array count mismatch on {}", dst_ty))?;
            let val_ty = ctx.param_type(fcn, val)?;
            require(same_type(&val_ty, inner), format!("sized-array element mismatch: {} vs {}", val_ty, inner))
        }
        RValue::Borrow { kind, val } => {
            let inner_ty = ctx.lvalue_type(fcn, val)?;
            match dst_ty.kind() {
                Type::Borrow(dst_kind, _, dst_inner) => {
                    require(dst_kind == kind, format!("borrow class mismatch on {}", dst_ty))?;
                    require(
                        same_type(dst_inner, &inner_ty),
                        format!("borrow of {} stored as {}", inner_ty, dst_ty),
                    )
                }
                _ => Err(crate::MirError::bug(sp, format!("borrow into non-borrow {}", dst_ty))),
            }
        }
        RValue::Cast { val, ty } => {
            require(same_type(ty, dst_ty), format!("cast target {} differs from dst {}", ty, dst_ty))?;
            let src_ty = ctx.lvalue_type(fcn, val)?;
            check_cast(ctx, &src_ty, dst_ty)
        }
        RValue::BinOp { val_l, op, val_r } => {
            let l_ty = ctx.param_type(fcn, val_l)?;
            let r_ty = ctx.param_type(fcn, val_r)?;
            if op.is_comparison() {
                require(
                    dst_ty.as_primitive() == Some(CoreType::Bool),
                    format!("comparison into non-bool {}", dst_ty),
                )?;
                require(same_type(&l_ty, &r_ty), format!("comparison of {} with {}", l_ty, r_ty))
            } else if op.is_overflowing() {
                let Type::Tuple(items) = dst_ty.kind() else {
                    return Err(crate::MirError::bug(sp, format!("overflow op into non-tuple {}", dst_ty)));
                };
                require(items.len() == 2, format!("overflow result arity on {}", dst_ty))?;
                require(
                    same_type(&items[0], &l_ty) && items[1].as_primitive() == Some(CoreType::Bool),
                    format!("overflow result mismatch: {} from {}", dst_ty, l_ty),
                )
            } else {
                require(same_type(dst_ty, &l_ty), format!("binop result {} from {}", dst_ty, l_ty))?;
                match op {
                    BinOp::Shl | BinOp::Shr => Ok(()),
                    _ => require(same_type(&l_ty, &r_ty), format!("binop operands {} vs {}", l_ty, r_ty)),
                }
            }
        }
        RValue::UniOp { val, .. } => {
            let src_ty = ctx.lvalue_type(fcn, val)?;
            require(same_type(dst_ty, &src_ty), format!("uniop result {} from {}", dst_ty, src_ty))
        }
        RValue::DstMeta { val } => {
            let input_ty = ctx.lvalue_type(fcn, val)?;
            let meta_ty = ctx.dst_meta_type(&input_ty)?;
            require(same_type(dst_ty, &meta_ty), format!("metadata of {} is {}, not {}", input_ty, meta_ty, dst_ty))
        }
        RValue::DstPtr { val } => {
            let input_ty = ctx.lvalue_type(fcn, val)?;
            require(
                input_ty.as_pointer_inner().is_some() || ctx.resolve.is_box(&input_ty),
                format!("DstPtr of non-pointer {}", input_ty),
            )?;
            require(
                matches!(dst_ty.kind(), Type::Pointer(..)),
                format!("DstPtr into non-pointer {}", dst_ty),
            )
        }
        RValue::MakeDst { ptr_val, meta_val } => {
            let Some((_, pointee)) = dst_ty.as_pointer_inner() else {
                return Err(crate::MirError::bug(sp, format!("MakeDst into non-pointer {}", dst_ty)));
            };
            let meta_class = ctx.resolve.metadata_type(pointee);
            require(
                meta_class != MetadataType::None,
                format!("MakeDst into thin pointer {}", dst_ty),
            )?;
            let ptr_ty = ctx.param_type(fcn, ptr_val)?;
            require(
                ptr_ty.as_pointer_inner().is_some()
                    || matches!(ptr_ty.kind(), Type::Path(_))
                    || ctx.resolve.is_box(&ptr_ty),
                format!("MakeDst data pointer has type {}", ptr_ty),
            )?;
            // The unresolved-coercion placeholder is materialised in cleanup.
            if matches!(meta_val, Param::Constant(Constant::ItemAddr(None))) {
                return Ok(());
            }
            let meta_ty = ctx.param_type(fcn, meta_val)?;
            match meta_class {
                MetadataType::Slice => require(
                    meta_ty.as_primitive() == Some(CoreType::Usize),
                    format!("slice metadata has type {}", meta_ty),
                ),
                MetadataType::TraitObject => require(
                    matches!(meta_ty.kind(), Type::Pointer(..)),
                    format!("vtable metadata has type {}", meta_ty),
                ),
                _ => Ok(()),
            }
        }
        RValue::Tuple { vals } => {
            let Type::Tuple(items) = dst_ty.kind() else {
                return Err(crate::MirError::bug(sp, format!("tuple into non-tuple {}", dst_ty)));
            };
            require(items.len() == vals.len(), format!("tuple arity on {}", dst_ty))?;
            for (item_ty, val) in items.iter().zip(vals) {
                let val_ty = ctx.param_type(fcn, val)?;
                require(
                    val_ty.is_diverge() || same_type(item_ty, &val_ty),
                    format!("tuple field {} from {}", item_ty, val_ty),
                )?;
            }
            Ok(())
        }
        RValue::Array { vals } => {
            let Type::Array(inner, count) = dst_ty.kind() else {
                return Err(crate::MirError::bug(sp, format!("array into non-array {}", dst_ty)));
            };
            require(
                *count == hir::ArraySize::Known(vals.len() as u64),
                format!("array literal arity on {}", dst_ty),
            )?;
            for val in vals {
                let val_ty = ctx.param_type(fcn, val)?;
                require(same_type(inner, &val_ty), format!("array element {} from {}", inner, val_ty))?;
            }
            Ok(())
        }
        RValue::UnionVariant { path, index, val } => {
            require(
                matches!(dst_ty.kind(), Type::Path(gp) if gp.path == path.path),
                format!("union literal {} into {}", path, dst_ty),
            )?;
            let Some(fld_ty) = ctx.resolve.field_type(dst_ty, *index) else {
                return Err(crate::MirError::bug(sp, format!("no union field {} on {}", index, dst_ty)));
            };
            let val_ty = ctx.param_type(fcn, val)?;
            require(same_type(&fld_ty, &val_ty), format!("union field {} from {}", fld_ty, val_ty))
        }
        RValue::EnumVariant { path, index, vals } => {
            require(
                matches!(dst_ty.kind(), Type::Path(gp) if gp.path == path.path),
                format!("enum literal {} into {}", path, dst_ty),
            )?;
            for (i, val) in vals.iter().enumerate() {
                let Some(fld_ty) = ctx.resolve.enum_variant_field(dst_ty, *index, i as u32) else {
                    return Err(crate::MirError::bug(
                        sp,
                        format!("no field {} in variant {} of {}", i, index, dst_ty),
                    ));
                };
                let val_ty = ctx.param_type(fcn, val)?;
                require(
                    val_ty.is_diverge() || same_type(&fld_ty, &val_ty),
                    format!("variant field {} from {}", fld_ty, val_ty),
                )?;
            }
            Ok(())
        }
        RValue::Struct { path, vals } => {
            require(
                matches!(dst_ty.kind(), Type::Path(gp) if gp.path == path.path),
                format!("struct literal {} into {}", path, dst_ty),
            )?;
            for (i, val) in vals.iter().enumerate() {
                let Some(fld_ty) = ctx.resolve.field_type(dst_ty, i as u32) else {
                    return Err(crate::MirError::bug(sp, format!("no field {} on {}", i, dst_ty)));
                };
                let val_ty = ctx.param_type(fcn, val)?;
                require(
                    val_ty.is_diverge() || same_type(&fld_ty, &val_ty),
                    format!("struct field {} from {}", fld_ty, val_ty),
                )?;
            }
            Ok(())
        }
    }
}

/// A named function item may stand in for a matching function pointer.
fn fn_item_matches(a: &TypeRef, b: &TypeRef) -> bool {
    matches!(
        (a.kind(), b.kind()),
        (Type::NamedFunction(_), Type::Function(_)) | (Type::Function(_), Type::NamedFunction(_))
    )
}

/// Cast source/destination compatibility (resolved open question: unsized
/// sources, including `str`, are rejected outright).
fn check_cast(ctx: &FnContext<'_>, src_ty: &TypeRef, dst_ty: &TypeRef) -> Result<()> {
    let sp = ctx.sp;
    let src_ok = match src_ty.kind() {
        Type::Primitive(CoreType::Str) => false,
        Type::Primitive(_) => true,
        Type::NamedFunction(_) | Type::Function(_) => true,
        Type::Borrow(..) | Type::Pointer(..) => true,
        Type::Path(gp) => ctx
            .resolve
            .enum_by_path(&gp.path)
            .is_some_and(|e| e.is_value_enum()),
        Type::Generic(_) => true,
        _ => false,
    };
    if !src_ok {
        bug!(sp, "invalid cast source {}", src_ty);
    }
    let dst_ok = matches!(
        dst_ty.kind(),
        Type::Primitive(_) | Type::Pointer(..) | Type::Borrow(..) | Type::Function(_) | Type::Generic(_)
    ) && dst_ty.as_primitive() != Some(CoreType::Str);
    if !dst_ok {
        bug!(sp, "invalid cast destination {}", dst_ty);
    }
    // Pointer-to-pointer casts must not change the metadata class.
    if let (Some((_, src_inner)), Some((_, dst_inner))) =
        (src_ty.as_pointer_inner(), dst_ty.as_pointer_inner())
    {
        let src_meta = ctx.resolve.metadata_type(src_inner);
        let dst_meta = ctx.resolve.metadata_type(dst_inner);
        if src_meta != MetadataType::Unknown
            && dst_meta != MetadataType::Unknown
            && src_meta != dst_meta
        {
            bug!(sp, "cast changes metadata class: {} to {}", src_ty, dst_ty);
        }
    }
    Ok(())
}

fn check_terminator(ctx: &FnContext<'_>, fcn: &Function, bb_id: BlockId, term: &Terminator) -> Result<()> {
    let sp = ctx.sp;
    if matches!(term, Terminator::Incomplete) {
        bug!(sp, "{}: bb{} has an incomplete terminator", ctx.path, bb_id.0);
    }
    for target in term.targets() {
        if target.index() >= fcn.blocks.len() {
            bug!(sp, "{}: bb{} jumps to out-of-range bb{}", ctx.path, bb_id.0, target.0);
        }
    }

    match term {
        Terminator::If { cond, .. } => {
            let cond_ty = ctx.lvalue_type(fcn, cond)?;
            if cond_ty.as_primitive() != Some(CoreType::Bool) {
                bug!(sp, "{}: bb{} branches on non-bool {}", ctx.path, bb_id.0, cond_ty);
            }
            Ok(())
        }
        Terminator::Switch { val, targets } => {
            let val_ty = ctx.lvalue_type(fcn, val)?;
            let Type::Path(gp) = val_ty.kind() else {
                bug!(sp, "{}: bb{} switches on non-enum {}", ctx.path, bb_id.0, val_ty);
            };
            let Some(e) = ctx.resolve.enum_by_path(&gp.path) else {
                bug!(sp, "{}: bb{} switches on non-enum {}", ctx.path, bb_id.0, val_ty);
            };
            if e.variants.len() != targets.len() {
                bug!(
                    sp,
                    "{}: bb{} switch has {} targets for {} variants",
                    ctx.path, bb_id.0, targets.len(), e.variants.len()
                );
            }
            Ok(())
        }
        Terminator::SwitchValue { val, targets, values, .. } => {
            if targets.len() != values.len() {
                bug!(sp, "{}: bb{} switch-value arity mismatch", ctx.path, bb_id.0);
            }
            let val_ty = ctx.lvalue_type(fcn, val)?;
            let ok = match values {
                SwitchValues::Unsigned(_) => val_ty.as_primitive().is_some_and(|ct| ct.is_unsigned()),
                SwitchValues::Signed(_) => val_ty.as_primitive().is_some_and(|ct| ct.is_signed()),
                SwitchValues::String(_) => val_ty.as_primitive() == Some(CoreType::Str),
                SwitchValues::Bytes(_) => {
                    matches!(val_ty.kind(), Type::Slice(inner) | Type::Array(inner, _)
                        if inner.as_primitive() == Some(CoreType::U8))
                }
            };
            if !ok {
                bug!(sp, "{}: bb{} switch-value on mismatched type {}", ctx.path, bb_id.0, val_ty);
            }
            Ok(())
        }
        Terminator::Call { ret_val, fcn: target, args, .. } => {
            let ret_slot_ty = ctx.lvalue_type(fcn, ret_val)?;
            match target {
                CallTarget::Value(lv) => {
                    let fcn_ty = ctx.lvalue_type(fcn, lv)?;
                    match fcn_ty.kind() {
                        Type::Function(fp) => {
                            check_call_sig(ctx, fcn, bb_id, &fp.args, &fp.ret, false, args, &ret_slot_ty)
                        }
                        Type::NamedFunction(p) => match ctx.resolve.fn_signature(p) {
                            Some((sig_args, sig_ret, variadic)) => check_call_sig(
                                ctx, fcn, bb_id, &sig_args, &sig_ret, variadic, args, &ret_slot_ty,
                            ),
                            None => bug!(sp, "{}: bb{} calls unresolvable {}", ctx.path, bb_id.0, p),
                        },
                        _ => bug!(sp, "{}: bb{} calls non-function {}", ctx.path, bb_id.0, fcn_ty),
                    }
                }
                CallTarget::Path(p) => match ctx.resolve.fn_signature(p) {
                    Some((sig_args, sig_ret, variadic)) => {
                        check_call_sig(ctx, fcn, bb_id, &sig_args, &sig_ret, variadic, args, &ret_slot_ty)
                    }
                    // Paths into unregistered crates cannot be checked here;
                    // the enumeration layer verifies them.
                    None => {
                        for a in args {
                            ctx.param_type(fcn, a)?;
                        }
                        Ok(())
                    }
                },
                CallTarget::Intrinsic { .. } => {
                    for a in args {
                        ctx.param_type(fcn, a)?;
                    }
                    Ok(())
                }
            }
        }
        _ => Ok(()),
    }
}

#[allow(clippy::too_many_arguments)]
fn check_call_sig(
    ctx: &FnContext<'_>,
    fcn: &Function,
    bb_id: BlockId,
    sig_args: &[TypeRef],
    sig_ret: &TypeRef,
    variadic: bool,
    args: &[Param],
    ret_slot_ty: &TypeRef,
) -> Result<()> {
    let sp = ctx.sp;
    if args.len() < sig_args.len() || (!variadic && args.len() != sig_args.len()) {
        bug!(
            sp,
            "{}: bb{} call passes {} arguments, signature wants {}",
            ctx.path, bb_id.0, args.len(), sig_args.len()
        );
    }
    for (sig_ty, arg) in sig_args.iter().zip(args) {
        let arg_ty = ctx.param_type(fcn, arg)?;
        if !(same_type(sig_ty, &arg_ty) || fn_item_matches(sig_ty, &arg_ty) || matches!(sig_ty.kind(), Type::Generic(_))) {
            bug!(sp, "{}: bb{} argument type {} where {} expected", ctx.path, bb_id.0, arg_ty, sig_ty);
        }
    }
    if !(same_type(sig_ret, ret_slot_ty)
        || sig_ret.is_diverge()
        || matches!(sig_ret.kind(), Type::Generic(_)))
    {
        bug!(sp, "{}: bb{} return slot {} where {} expected", ctx.path, bb_id.0, ret_slot_ty, sig_ret);
    }
    Ok(())
}

/// Reachability sweep from the entry block.
pub(crate) fn reachable_blocks(fcn: &Function) -> Vec<bool> {
    let mut seen = vec![false; fcn.blocks.len()];
    let mut stack = vec![Function::ENTRY];
    while let Some(bb) = stack.pop() {
        if bb.index() >= seen.len() || seen[bb.index()] {
            continue;
        }
        seen[bb.index()] = true;
        for t in fcn.blocks[bb].terminator.targets() {
            stack.push(t);
        }
    }
    seen
}
