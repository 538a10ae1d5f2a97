//! Post-monomorphisation cleanup.
//!
//! Runs once all types are concrete, and rewrites the constructs earlier
//! stages could not finish:
//!
//! - calls through a trait-object receiver become indirect calls through
//!   the vtable,
//! - `Fn*::call*` invocations decompose their tuple argument into
//!   positional arguments,
//! - `const` references expand into value expressions by walking the
//!   encoded bytes against the type layout,
//! - derefs of owned boxes gain the field path to the raw pointer,
//! - leftover unsize placeholders get their metadata materialised.
//!
//! Types of all locals are deduplicated afterwards so equal types share
//! storage. Failures are internal errors: a missing impl at this stage means
//! an earlier phase accepted something it should not have.

use crate::helpers::FnContext;
use crate::mir::{
    BasicBlock, CallTarget, Constant, Function, LValue, Param, RValue, Statement, Terminator,
    Wrapper,
};
use crate::{ArgList, Resolve, Result};
use rillc_hir as hir;
use rillc_hir::{
    BorrowKind, CoreType, EncodedLiteral, MetadataType, ReprVariants, Type, TypeRef,
};
use rillc_util::{FxHashMap, Symbol};

pub fn cleanup_function(
    resolve: &Resolve<'_>,
    path: &hir::SimplePath,
    fcn: &mut Function,
    args: &ArgList,
    ret_ty: &hir::TypeRef,
) -> Result<()> {
    let ctx = FnContext::new(resolve, path, args, ret_ty);

    for bb_idx in 0..fcn.blocks.len() {
        let bb = crate::mir::BlockId(bb_idx as u32);
        let mut block = std::mem::take(&mut fcn.blocks[bb]);
        let result = cleanup_block(&ctx, fcn, &mut block);
        fcn.blocks[bb] = block;
        result?;
    }

    dedup_types(fcn);
    Ok(())
}

fn cleanup_block(ctx: &FnContext<'_>, fcn: &mut Function, block: &mut BasicBlock) -> Result<()> {
    let mut out = Vec::with_capacity(block.statements.len());
    for mut stmt in block.statements.drain(..) {
        fixup_lvalues_stmt(ctx, fcn, &mut stmt)?;
        expand_consts_stmt(ctx, fcn, &mut out, &mut stmt)?;
        if let Statement::Assign { dst, src } = &mut stmt {
            materialise_unsize(ctx, fcn, &mut out, dst, src)?;
        }
        out.push(stmt);
    }

    fixup_lvalues_term(ctx, fcn, &mut block.terminator)?;
    expand_consts_term(ctx, fcn, &mut out, &mut block.terminator)?;
    lower_special_calls(ctx, fcn, &mut out, &mut block.terminator)?;
    block.statements = out;
    Ok(())
}

// ---------------------------------------------------------------------------
// Box derefs
// ---------------------------------------------------------------------------

/// Insert the field path down to the raw pointer for every deref of an
/// owned-box place.
fn fixup_box_deref(ctx: &FnContext<'_>, fcn: &Function, lv: &mut LValue) -> Result<()> {
    let mut i = 0;
    while i < lv.wrappers.len() {
        if lv.wrappers[i] == Wrapper::Deref {
            let prefix = LValue { root: lv.root.clone(), wrappers: lv.wrappers[..i].to_vec() };
            let mut ty = ctx.lvalue_type(fcn, &prefix)?;
            if ctx.resolve.is_box(&ty) {
                // Follow field 0 until the raw pointer appears.
                let mut extra = Vec::new();
                while ty.as_pointer_inner().is_none() {
                    let Some(inner) = ctx.resolve.field_type(&ty, 0) else {
                        bug!(ctx.sp, "{}: owned box {} has no pointer field", ctx.path, ty);
                    };
                    extra.push(Wrapper::Field(0));
                    ty = inner;
                }
                let n = extra.len();
                for (k, w) in extra.into_iter().enumerate() {
                    lv.wrappers.insert(i + k, w);
                }
                i += n;
            }
        }
        i += 1;
    }
    Ok(())
}

fn fixup_lvalues_stmt(ctx: &FnContext<'_>, fcn: &Function, stmt: &mut Statement) -> Result<()> {
    let mut res = Ok(());
    stmt.visit_lvalues_mut(&mut |lv| {
        if res.is_ok() {
            res = fixup_box_deref(ctx, fcn, lv);
        }
    });
    res
}

fn fixup_lvalues_term(ctx: &FnContext<'_>, fcn: &Function, term: &mut Terminator) -> Result<()> {
    let mut res = Ok(());
    term.visit_lvalues_mut(&mut |lv| {
        if res.is_ok() {
            res = fixup_box_deref(ctx, fcn, lv);
        }
    });
    res
}

// ---------------------------------------------------------------------------
// Constant expansion
// ---------------------------------------------------------------------------

fn expand_consts_stmt(
    ctx: &FnContext<'_>,
    fcn: &mut Function,
    out: &mut Vec<Statement>,
    stmt: &mut Statement,
) -> Result<()> {
    if let Statement::Assign { src, .. } = stmt {
        // A direct `dst = const X` expands in place.
        if let RValue::Constant(Constant::Const(p)) = src {
            let path = (**p).clone();
            *src = expanded_const_rvalue(ctx, fcn, out, &path)?;
        } else {
            expand_consts_rvalue(ctx, fcn, out, src)?;
        }
    }
    Ok(())
}

fn expand_consts_rvalue(
    ctx: &FnContext<'_>,
    fcn: &mut Function,
    out: &mut Vec<Statement>,
    rv: &mut RValue,
) -> Result<()> {
    let mut res = Ok(());
    visit_params_mut(rv, &mut |param| {
        if res.is_err() {
            return;
        }
        if let Param::Constant(Constant::Const(p)) = param {
            let path = (**p).clone();
            res = expand_const_param(ctx, fcn, out, param, &path);
        }
    });
    res
}

fn expand_consts_term(
    ctx: &FnContext<'_>,
    fcn: &mut Function,
    out: &mut Vec<Statement>,
    term: &mut Terminator,
) -> Result<()> {
    if let Terminator::Call { args, .. } = term {
        for param in args {
            if let Param::Constant(Constant::Const(p)) = param {
                let path = (**p).clone();
                expand_const_param(ctx, fcn, out, param, &path)?;
            }
        }
    }
    Ok(())
}

/// Replace a `const`-reference operand with either an inline constant or a
/// freshly-assigned temporary.
fn expand_const_param(
    ctx: &FnContext<'_>,
    fcn: &mut Function,
    out: &mut Vec<Statement>,
    param: &mut Param,
    path: &hir::Path,
) -> Result<()> {
    let rv = expanded_const_rvalue(ctx, fcn, out, path)?;
    *param = match rv {
        RValue::Constant(c) => Param::Constant(c),
        other => {
            let (lit_ty, _) = const_def(ctx, path)?;
            let tmp = fcn.new_local(lit_ty);
            let lv = LValue::new_local(tmp);
            out.push(Statement::Assign { dst: lv.clone(), src: other });
            Param::LValue(lv)
        }
    };
    Ok(())
}

fn const_def(ctx: &FnContext<'_>, path: &hir::Path) -> Result<(TypeRef, EncodedLiteral)> {
    match ctx.resolve.get_value(path) {
        Some(hir::ValueItem::Constant(cd)) => Ok((cd.ty.clone(), cd.lit.clone())),
        _ => bug!(ctx.sp, "{}: const {} did not resolve", ctx.path, path),
    }
}

fn expanded_const_rvalue(
    ctx: &FnContext<'_>,
    fcn: &mut Function,
    out: &mut Vec<Statement>,
    path: &hir::Path,
) -> Result<RValue> {
    let (ty, lit) = const_def(ctx, path)?;
    create_const_rvalue(ctx, fcn, out, &ty, &lit, 0)
}

/// Build the value expression for `lit` at `offset`, interpreted as `ty`.
/// Composite members that cannot be inline constants are assigned to fresh
/// temporaries via `out`.
fn create_const_rvalue(
    ctx: &FnContext<'_>,
    fcn: &mut Function,
    out: &mut Vec<Statement>,
    ty: &TypeRef,
    lit: &EncodedLiteral,
    offset: usize,
) -> Result<RValue> {
    let sp = ctx.sp;
    match ty.kind() {
        Type::Primitive(ct) => Ok(RValue::Constant(read_primitive(ctx, *ct, lit, offset)?)),
        Type::Path(gp) if ctx.resolve.union_by_path(&gp.path).is_some() => {
            decode_union_const(ctx, fcn, out, ty, gp, lit, offset)
        }
        Type::Tuple(_) | Type::Path(_) if is_plain_aggregate(ctx, ty) => {
            let Some(repr) = ctx.resolve.type_repr(ty) else {
                bug!(sp, "{}: no layout for constant of type {}", ctx.path, ty);
            };
            match &repr.variants {
                ReprVariants::None => {
                    let mut vals = Vec::with_capacity(repr.fields.len());
                    for fld in &repr.fields {
                        vals.push(field_param(ctx, fcn, out, &fld.ty, lit, offset + fld.offset as usize)?);
                    }
                    Ok(match ty.kind() {
                        Type::Tuple(_) => RValue::Tuple { vals },
                        Type::Path(gp) => RValue::Struct { path: gp.clone(), vals },
                        _ => unreachable!(),
                    })
                }
                ReprVariants::Tagged { tag_offset, tag_size, variants } => {
                    let Some(tag) = lit.read_uint(offset + *tag_offset as usize, *tag_size as usize) else {
                        bug!(sp, "{}: constant of {} is truncated", ctx.path, ty);
                    };
                    let Some((idx, var)) = variants
                        .iter()
                        .enumerate()
                        .find(|(_, v)| v.discriminant == tag as i64)
                    else {
                        bug!(sp, "{}: no variant with discriminant {} in {}", ctx.path, tag, ty);
                    };
                    let mut vals = Vec::with_capacity(var.fields.len());
                    for fld in &var.fields {
                        vals.push(field_param(ctx, fcn, out, &fld.ty, lit, offset + fld.offset as usize)?);
                    }
                    let Type::Path(gp) = ty.kind() else { unreachable!() };
                    Ok(RValue::EnumVariant { path: gp.clone(), index: idx as u32, vals })
                }
            }
        }
        Type::Array(inner, hir::ArraySize::Known(n)) => {
            let Some(step) = ctx.resolve.size_of(inner) else {
                bug!(sp, "{}: unsized array element {} in constant", ctx.path, inner);
            };
            let mut vals = Vec::with_capacity(*n as usize);
            for i in 0..*n {
                vals.push(field_param(ctx, fcn, out, inner, lit, offset + (i * step) as usize)?);
            }
            // Uniform arrays collapse.
            if let Some(first) = vals.first() {
                if *n > 1 && vals.iter().all(|v| v == first) {
                    return Ok(RValue::SizedArray {
                        val: first.clone(),
                        count: hir::ArraySize::Known(*n),
                    });
                }
            }
            Ok(RValue::Array { vals })
        }
        Type::Borrow(_, _, inner) | Type::Pointer(_, inner) => {
            match lit.reloc_at(offset) {
                Some(reloc) => match &reloc.value {
                    hir::RelocValue::Item(p) => {
                        Ok(RValue::Constant(Constant::ItemAddr(Some(Box::new(p.clone())))))
                    }
                    hir::RelocValue::Str(s) => {
                        if inner.as_primitive() == Some(CoreType::Str) {
                            Ok(RValue::Constant(Constant::StaticString(s.clone())))
                        } else {
                            bug!(sp, "{}: string data for non-str pointee {}", ctx.path, inner)
                        }
                    }
                    hir::RelocValue::Bytes(b) => Ok(RValue::MakeDst {
                        ptr_val: Param::Constant(Constant::Bytes(b.clone())),
                        meta_val: Param::Constant(Constant::Uint { v: b.len() as u64, t: CoreType::Usize }),
                    }),
                },
                None => {
                    // A raw address: read it and cast to the pointer type.
                    let Some(v) = lit.read_uint(offset, 8) else {
                        bug!(sp, "{}: constant pointer is truncated", ctx.path);
                    };
                    let tmp = fcn.new_local(TypeRef::usize_());
                    let lv = LValue::new_local(tmp);
                    out.push(Statement::Assign {
                        dst: lv.clone(),
                        src: RValue::Constant(Constant::Uint { v, t: CoreType::Usize }),
                    });
                    Ok(RValue::Cast { val: lv, ty: ty.clone() })
                }
            }
        }
        Type::NamedFunction(_) | Type::Function(_) => match lit.reloc_at(offset) {
            Some(hir::Reloc { value: hir::RelocValue::Item(p), .. }) => {
                Ok(RValue::Constant(Constant::ItemAddr(Some(Box::new(p.clone())))))
            }
            _ => bug!(sp, "{}: function constant without a relocation", ctx.path),
        },
        _ => bug!(sp, "{}: cannot expand constant of type {}", ctx.path, ty),
    }
}

/// Decode a union constant.
///
/// Preference order: a raw byte-array field spanning the whole body wins;
/// maybe-uninit shaped unions (a unit field plus one data field) pick their
/// variant from the body bytes, all-zero meaning uninitialised; anything
/// else uses the first field covering the full size.
fn decode_union_const(
    ctx: &FnContext<'_>,
    fcn: &mut Function,
    out: &mut Vec<Statement>,
    ty: &TypeRef,
    gp: &hir::GenericPath,
    lit: &EncodedLiteral,
    offset: usize,
) -> Result<RValue> {
    let sp = ctx.sp;
    let Some(repr) = ctx.resolve.type_repr(ty) else {
        bug!(sp, "{}: no layout for constant of type {}", ctx.path, ty);
    };
    if repr.fields.is_empty() {
        bug!(sp, "{}: empty union constant {}", ctx.path, ty);
    }

    // A field that is exactly the body as raw bytes decodes losslessly.
    for (i, fld) in repr.fields.iter().enumerate() {
        if let Type::Array(inner, hir::ArraySize::Known(n)) = fld.ty.kind() {
            if inner.as_primitive() == Some(CoreType::U8) && *n == repr.size {
                let val = field_param(ctx, fcn, out, &fld.ty, lit, offset + fld.offset as usize)?;
                return Ok(RValue::UnionVariant { path: gp.clone(), index: i as u32, val });
            }
        }
    }

    // Maybe-uninit shape: a unit field and a data field. All-zero bytes
    // (and no relocations) mean the uninitialised variant; anything else is
    // live data, decoded with the data field's type and offset.
    if repr.fields.len() == 2 && repr.fields[0].ty.is_unit() {
        let size = repr.size as usize;
        let Some(body) = lit.data.get(offset..offset + size) else {
            bug!(sp, "{}: constant of {} is truncated", ctx.path, ty);
        };
        let has_reloc = lit.relocs.iter().any(|r| r.offset >= offset && r.offset < offset + size);
        let index: usize = if has_reloc || body.iter().any(|b| *b != 0) { 1 } else { 0 };
        let fld = &repr.fields[index];
        let val = field_param(ctx, fcn, out, &fld.ty, lit, offset + fld.offset as usize)?;
        return Ok(RValue::UnionVariant { path: gp.clone(), index: index as u32, val });
    }

    // Otherwise the first field covering the whole body.
    let index = repr
        .fields
        .iter()
        .position(|f| ctx.resolve.size_of(&f.ty) == Some(repr.size))
        .unwrap_or(0);
    let fld = &repr.fields[index];
    let val = field_param(ctx, fcn, out, &fld.ty, lit, offset + fld.offset as usize)?;
    Ok(RValue::UnionVariant { path: gp.clone(), index: index as u32, val })
}

fn is_plain_aggregate(ctx: &FnContext<'_>, ty: &TypeRef) -> bool {
    match ty.kind() {
        Type::Tuple(_) => true,
        // Unions take the dedicated decode path.
        Type::Path(gp) => {
            ctx.resolve.struct_by_path(&gp.path).is_some()
                || ctx.resolve.enum_by_path(&gp.path).is_some()
        }
        _ => false,
    }
}

fn field_param(
    ctx: &FnContext<'_>,
    fcn: &mut Function,
    out: &mut Vec<Statement>,
    ty: &TypeRef,
    lit: &EncodedLiteral,
    offset: usize,
) -> Result<Param> {
    let rv = create_const_rvalue(ctx, fcn, out, ty, lit, offset)?;
    Ok(match rv {
        RValue::Constant(c) => Param::Constant(c),
        other => {
            let tmp = fcn.new_local(ty.clone());
            let lv = LValue::new_local(tmp);
            out.push(Statement::Assign { dst: lv.clone(), src: other });
            Param::LValue(lv)
        }
    })
}

fn read_primitive(
    ctx: &FnContext<'_>,
    ct: CoreType,
    lit: &EncodedLiteral,
    offset: usize,
) -> Result<Constant> {
    let sp = ctx.sp;
    let Some(size) = ct.byte_size() else {
        bug!(sp, "{}: primitive read of unsized {}", ctx.path, ct);
    };
    let size = size as usize;
    Ok(if ct == CoreType::Bool {
        let Some(v) = lit.read_uint(offset, 1) else {
            bug!(sp, "{}: constant bool is truncated", ctx.path);
        };
        Constant::Bool(v != 0)
    } else if ct.is_float() {
        let Some(v) = lit.read_float(offset, size) else {
            bug!(sp, "{}: constant float is truncated", ctx.path);
        };
        Constant::Float { v, t: ct }
    } else if ct.is_signed() {
        let Some(v) = lit.read_sint(offset, size) else {
            bug!(sp, "{}: constant int is truncated", ctx.path);
        };
        Constant::Int { v, t: ct }
    } else {
        let Some(v) = lit.read_uint(offset, size) else {
            bug!(sp, "{}: constant uint is truncated", ctx.path);
        };
        Constant::Uint { v, t: ct }
    })
}

/// Visit every operand of an rvalue, mutably.
fn visit_params_mut(rv: &mut RValue, f: &mut impl FnMut(&mut Param)) {
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
        RValue::Use(_) | RValue::Constant(_) | RValue::Borrow { .. } | RValue::Cast { .. }
        | RValue::UniOp { .. } | RValue::DstMeta { .. } | RValue::DstPtr { .. } => {}
    }
}

// ---------------------------------------------------------------------------
// Unsize materialisation
// ---------------------------------------------------------------------------

/// Resolve a `MakeDst` whose metadata is still the placeholder.
fn materialise_unsize(
    ctx: &FnContext<'_>,
    fcn: &mut Function,
    out: &mut Vec<Statement>,
    dst: &LValue,
    src: &mut RValue,
) -> Result<()> {
    let RValue::MakeDst { ptr_val, meta_val } = src else { return Ok(()) };
    if !matches!(meta_val, Param::Constant(Constant::ItemAddr(None))) {
        return Ok(());
    }
    let dst_ty = ctx.lvalue_type(fcn, dst)?;

    // Nested coercion wrappers (`Box<T> -> Box<dyn U>`) rebuild the struct
    // with the unsized field recursed into.
    if let Type::Path(gp) = dst_ty.kind() {
        let Some(s) = ctx.resolve.struct_by_path(&gp.path) else {
            bug!(ctx.sp, "{}: unsize into non-struct path {}", ctx.path, dst_ty);
        };
        let Some(unsized_idx) = s.coerce_unsized else {
            bug!(ctx.sp, "{}: unsize into non-coercible struct {}", ctx.path, dst_ty);
        };
        let Param::LValue(src_lv) = ptr_val.clone() else {
            bug!(ctx.sp, "{}: unsize of a non-place wrapper value", ctx.path);
        };
        let mut vals = Vec::with_capacity(s.fields.len());
        for i in 0..s.fields.len() as u32 {
            let fld_lv = src_lv.clone_wrapped([Wrapper::Field(i)]);
            if i == unsized_idx {
                let Some(fld_ty) = ctx.resolve.field_type(&dst_ty, i) else {
                    bug!(ctx.sp, "{}: no field {} on {}", ctx.path, i, dst_ty);
                };
                let tmp = fcn.new_local(fld_ty.clone());
                let tmp_lv = LValue::new_local(tmp);
                let mut inner = RValue::MakeDst {
                    ptr_val: Param::LValue(fld_lv),
                    meta_val: Param::Constant(Constant::ItemAddr(None)),
                };
                materialise_unsize(ctx, fcn, out, &tmp_lv, &mut inner)?;
                out.push(Statement::Assign { dst: tmp_lv.clone(), src: inner });
                vals.push(Param::LValue(tmp_lv));
            } else {
                vals.push(Param::LValue(fld_lv));
            }
        }
        *src = RValue::Struct { path: gp.clone(), vals };
        return Ok(());
    }

    let Some((_, dst_inner)) = dst_ty.as_pointer_inner() else {
        bug!(ctx.sp, "{}: unsize into non-pointer {}", ctx.path, dst_ty);
    };
    let src_ty = ctx.param_type(fcn, ptr_val)?;
    let src_inner = match src_ty.as_pointer_inner() {
        Some((_, inner)) => inner.clone(),
        None => bug!(ctx.sp, "{}: unsize of non-pointer {}", ctx.path, src_ty),
    };

    match ctx.resolve.metadata_type(dst_inner) {
        MetadataType::Slice => {
            // Array to slice: the metadata is the (static) element count.
            let Type::Array(_, hir::ArraySize::Known(n)) = src_inner.kind() else {
                bug!(ctx.sp, "{}: slice coercion from non-array {}", ctx.path, src_inner);
            };
            *meta_val = Param::Constant(Constant::Uint { v: *n, t: CoreType::Usize });
            Ok(())
        }
        MetadataType::TraitObject => {
            let Type::TraitObject(to) = dst_inner.kind() else {
                bug!(ctx.sp, "{}: trait-object coercion into {}", ctx.path, dst_inner);
            };
            // The vtable instance for the source type; registered as a
            // static by the enumeration layer.
            let vtable_path = hir::Path::UfcsKnown {
                ty: src_inner.clone(),
                trait_: to.trait_.clone(),
                item: Symbol::intern("vtable#"),
                params: hir::PathParams::default(),
            };
            *meta_val = Param::Constant(Constant::ItemAddr(Some(Box::new(vtable_path))));
            Ok(())
        }
        other => {
            bug!(
                ctx.sp,
                "{}: unsize target {} has metadata class {:?}",
                ctx.path, dst_inner, other
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Virtual and Fn-trait calls
// ---------------------------------------------------------------------------

fn lower_special_calls(
    ctx: &FnContext<'_>,
    fcn: &mut Function,
    out: &mut Vec<Statement>,
    term: &mut Terminator,
) -> Result<()> {
    let Terminator::Call { fcn: target, args, .. } = term else { return Ok(()) };
    let CallTarget::Path(hir::Path::UfcsKnown { ty, trait_, item, .. }) = &*target else {
        return Ok(());
    };

    // `<dyn Trait as Trait>::method` becomes an indirect call through the
    // vtable.
    if let Type::TraitObject(to) = ty.kind() {
        if to.trait_.path != trait_.path {
            bug!(ctx.sp, "{}: receiver {} does not implement {}", ctx.path, ty, trait_);
        }
        let Some(idx) = ctx.resolve.get_vtable_index(&trait_.path, *item) else {
            bug!(ctx.sp, "{}: no vtable slot for {}::{}", ctx.path, trait_, item);
        };
        let Some(vtable_ty) = ctx.resolve.get_vtable_type(trait_) else {
            bug!(ctx.sp, "{}: trait {} has no vtable type", ctx.path, trait_);
        };
        let Some(first) = args.first_mut() else {
            bug!(ctx.sp, "{}: virtual call with no receiver", ctx.path);
        };

        // By-value receivers are passed through an owning borrow.
        let recv_lv = match first {
            Param::LValue(lv) => lv.clone(),
            Param::Borrow { val, .. } => {
                let lv = val.clone();
                *first = Param::LValue(lv.clone());
                lv
            }
            Param::Constant(_) => {
                bug!(ctx.sp, "{}: constant receiver in virtual call", ctx.path)
            }
        };
        let recv_ty = ctx.lvalue_type(fcn, &recv_lv)?;
        let recv_lv = if recv_ty.as_pointer_inner().is_none() && !ctx.resolve.is_box(&recv_ty) {
            let tmp = fcn.new_local(TypeRef::borrow(BorrowKind::Owned, recv_ty.clone()));
            let tmp_lv = LValue::new_local(tmp);
            out.push(Statement::Assign {
                dst: tmp_lv.clone(),
                src: RValue::Borrow { kind: BorrowKind::Owned, val: recv_lv },
            });
            *first = Param::LValue(tmp_lv.clone());
            tmp_lv
        } else {
            recv_lv
        };

        // vtable = DstMeta(receiver); data pointer replaces the receiver.
        let vtable_lv = LValue::new_local(fcn.new_local(TypeRef::pointer(BorrowKind::Shared, vtable_ty)));
        out.push(Statement::Assign {
            dst: vtable_lv.clone(),
            src: RValue::DstMeta { val: recv_lv.clone() },
        });
        let data_ptr = LValue::new_local(fcn.new_local(TypeRef::pointer(BorrowKind::Shared, TypeRef::unit())));
        out.push(Statement::Assign {
            dst: data_ptr.clone(),
            src: RValue::DstPtr { val: recv_lv },
        });
        args[0] = Param::LValue(data_ptr);
        *target = CallTarget::Value(vtable_lv.deref().field(idx));
        return Ok(());
    }

    // `<F as Fn*>::call*` with a tuple argument becomes a direct indirect
    // call with positional arguments.
    let trait_name = trait_.path.last().map(|s| s.as_str().to_owned()).unwrap_or_default();
    if matches!(trait_name.as_str(), "Fn" | "FnMut" | "FnOnce")
        && matches!(ty.kind(), Type::Function(_) | Type::NamedFunction(_) | Type::Closure(_))
    {
        if args.len() != 2 {
            bug!(ctx.sp, "{}: {} call with {} arguments", ctx.path, trait_name, args.len());
        }
        let tuple = args.pop().expect("checked length above");
        let callee = args.pop().expect("checked length above");

        let callee_lv = match callee {
            Param::LValue(lv) => lv,
            Param::Borrow { val, .. } => val,
            Param::Constant(c) => {
                // A constant function item: call it directly.
                let Constant::ItemAddr(Some(p)) = c else {
                    bug!(ctx.sp, "{}: uncallable constant in {} call", ctx.path, trait_name);
                };
                let Some(tuple_lv) = tuple.as_lvalue().cloned() else {
                    bug!(ctx.sp, "{}: non-place argument tuple", ctx.path);
                };
                *args = decompose_tuple(ctx, fcn, &tuple_lv)?;
                *target = CallTarget::Path(*p);
                return Ok(());
            }
        };
        let callee_ty = ctx.lvalue_type(fcn, &callee_lv)?;
        let Some(tuple_lv) = tuple.as_lvalue().cloned() else {
            bug!(ctx.sp, "{}: non-place argument tuple", ctx.path);
        };
        *args = decompose_tuple(ctx, fcn, &tuple_lv)?;
        // `FnOnce` receives the callable by value, the others by reference.
        *target = if callee_ty.as_pointer_inner().is_some() {
            CallTarget::Value(callee_lv.deref())
        } else {
            CallTarget::Value(callee_lv)
        };
        return Ok(());
    }

    Ok(())
}

fn decompose_tuple(ctx: &FnContext<'_>, fcn: &Function, tuple_lv: &LValue) -> Result<Vec<Param>> {
    let tuple_ty = ctx.lvalue_type(fcn, tuple_lv)?;
    let Type::Tuple(items) = tuple_ty.kind() else {
        bug!(ctx.sp, "{}: call argument pack has type {}", ctx.path, tuple_ty);
    };
    Ok((0..items.len() as u32)
        .map(|i| Param::LValue(tuple_lv.clone_wrapped([Wrapper::Field(i)])))
        .collect())
}

// ---------------------------------------------------------------------------
// Type deduplication
// ---------------------------------------------------------------------------

/// Make equal local types share storage.
fn dedup_types(fcn: &mut Function) {
    let mut seen: FxHashMap<TypeRef, TypeRef> = FxHashMap::default();
    for ty in fcn.locals.iter_mut() {
        if let Some(shared) = seen.get(ty) {
            *ty = shared.clone();
        } else {
            seen.insert(ty.clone(), ty.clone());
        }
    }
}
