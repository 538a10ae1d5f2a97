//! Borrow and lifetime analysis.
//!
//! A preparatory sweep replaces every unknown lifetime tag in the function
//! (local types, cast targets, constructor paths) with a fresh inference
//! variable, then every statement and terminator records which lifetimes are
//! assigned into which. The pass never changes MIR shape; it annotates
//! lifetimes and reports conflicts as user diagnostics, continuing after
//! each one so a function's problems all surface at once.

use crate::helpers::FnContext;
use crate::mir::{
    CallTarget, Function, LValue, Param, RValue, Root, Statement, Terminator,
};
use crate::{ArgList, Resolve};
use rillc_hir as hir;
use rillc_hir::{LifetimeRef, PathParams, Type, TypeRef};
use rillc_util::{FxHashMap, Handler};

/// Read-only probe: does the type contain any unknown lifetime tag?
fn has_unknown_lifetime(ty: &TypeRef) -> bool {
    fn params_have(params: &PathParams) -> bool {
        params.lifetimes.iter().any(|l| l.is_unknown()) || params.types.iter().any(has_unknown_lifetime)
    }
    match ty.kind() {
        Type::Infer | Type::Diverge | Type::Primitive(_) | Type::Generic(_) | Type::NamedFunction(_) => false,
        Type::Path(gp) => params_have(&gp.params),
        Type::TraitObject(to) => {
            to.lifetime.is_unknown()
                || params_have(&to.trait_.params)
                || to.markers.iter().any(|m| params_have(&m.params))
        }
        Type::ErasedType(e) => e.lifetime.is_unknown() || params_have(&e.trait_.params),
        Type::Array(inner, _) | Type::Slice(inner) | Type::Pointer(_, inner) => has_unknown_lifetime(inner),
        Type::Borrow(_, lft, inner) => lft.is_unknown() || has_unknown_lifetime(inner),
        Type::Tuple(items) => items.iter().any(has_unknown_lifetime),
        Type::Function(fp) => fp.args.iter().any(has_unknown_lifetime) || has_unknown_lifetime(&fp.ret),
        Type::Closure(gp) | Type::Generator(gp) => params_have(&gp.params),
    }
}

/// One lifetime inference variable: everything assigned from, and everything
/// assigned to.
#[derive(Default)]
struct LifetimeIvar {
    srcs: Vec<LifetimeRef>,
    dsts: Vec<LifetimeRef>,
}

struct BorrowState<'a> {
    ctx: FnContext<'a>,
    ivars: Vec<LifetimeIvar>,
    /// Borrow-site ivars and the place the borrow points at.
    origins: FxHashMap<u32, LValue>,
}

impl<'a> BorrowState<'a> {
    fn allocate_ivar(&mut self) -> LifetimeRef {
        let idx = self.ivars.len() as u32;
        self.ivars.push(LifetimeIvar::default());
        LifetimeRef { binding: LifetimeRef::IVAR_BASE + idx }
    }

    fn opt_ivar(&mut self, lr: LifetimeRef) -> Option<&mut LifetimeIvar> {
        if lr.is_ivar() {
            self.ivars.get_mut((lr.binding - LifetimeRef::IVAR_BASE) as usize)
        } else {
            None
        }
    }

    /// Record that `src` flows into `target`.
    fn lifetime_assign(&mut self, target: LifetimeRef, src: LifetimeRef) {
        if let Some(iv) = self.opt_ivar(target) {
            iv.srcs.push(src);
        }
        if let Some(iv) = self.opt_ivar(src) {
            iv.dsts.push(target);
        }
    }

    /// Replace every unknown lifetime in `ty` with a fresh ivar.
    ///
    /// Works on a detached clone of the sum and writes it back, so shared
    /// storage is only copied when the type actually contains an unknown
    /// lifetime.
    fn fill_type(&mut self, ty: &mut TypeRef) {
        if !has_unknown_lifetime(ty) {
            return;
        }
        let mut kind = ty.kind().clone();
        match &mut kind {
            Type::Infer | Type::Diverge | Type::Primitive(_) | Type::Generic(_) | Type::NamedFunction(_) => {}
            Type::Path(gp) => self.fill_path_params(&mut gp.params),
            Type::TraitObject(to) => {
                if to.lifetime.is_unknown() {
                    to.lifetime = self.allocate_ivar();
                }
                self.fill_path_params(&mut to.trait_.params);
                for m in &mut to.markers {
                    self.fill_path_params(&mut m.params);
                }
            }
            Type::ErasedType(e) => {
                if e.lifetime.is_unknown() {
                    e.lifetime = self.allocate_ivar();
                }
                self.fill_path_params(&mut e.trait_.params);
            }
            Type::Array(inner, _) | Type::Slice(inner) | Type::Pointer(_, inner) => {
                self.fill_type(inner);
            }
            Type::Borrow(_, lft, inner) => {
                if lft.is_unknown() {
                    *lft = self.allocate_ivar();
                }
                self.fill_type(inner);
            }
            Type::Tuple(items) => {
                for it in items {
                    self.fill_type(it);
                }
            }
            Type::Function(fp) => {
                for a in &mut fp.args {
                    self.fill_type(a);
                }
                self.fill_type(&mut fp.ret);
            }
            Type::Closure(gp) | Type::Generator(gp) => self.fill_path_params(&mut gp.params),
        }
        *ty = TypeRef::new(kind);
    }

    fn fill_path_params(&mut self, params: &mut PathParams) {
        for lft in &mut params.lifetimes {
            if lft.is_unknown() {
                *lft = self.allocate_ivar();
            }
        }
        for ty in &mut params.types {
            self.fill_type(ty);
        }
    }

    /// Structurally equate the lifetimes of two types that flow together
    /// (`dst = src`).
    fn pair_types(&mut self, dst: &TypeRef, src: &TypeRef) {
        match (dst.kind(), src.kind()) {
            (Type::Borrow(_, dl, di), Type::Borrow(_, sl, si)) => {
                self.lifetime_assign(*dl, *sl);
                self.pair_types(di, si);
            }
            (Type::Pointer(_, di), Type::Pointer(_, si)) => self.pair_types(di, si),
            (Type::Slice(di), Type::Slice(si)) => self.pair_types(di, si),
            (Type::Array(di, _), Type::Array(si, _)) => self.pair_types(di, si),
            (Type::Tuple(dts), Type::Tuple(sts)) => {
                for (d, s) in dts.iter().zip(sts) {
                    self.pair_types(d, s);
                }
            }
            (Type::TraitObject(dt), Type::TraitObject(st)) => {
                self.lifetime_assign(dt.lifetime, st.lifetime);
                self.pair_path_params(&dt.trait_.params, &st.trait_.params);
            }
            (Type::ErasedType(dt), Type::ErasedType(st)) => {
                self.lifetime_assign(dt.lifetime, st.lifetime);
                self.pair_path_params(&dt.trait_.params, &st.trait_.params);
            }
            (Type::Path(dp), Type::Path(sp)) => {
                self.pair_path_params(&dp.params, &sp.params);
            }
            (Type::Function(df), Type::Function(sf)) => {
                for (d, s) in df.args.iter().zip(&sf.args) {
                    self.pair_types(d, s);
                }
                self.pair_types(&df.ret, &sf.ret);
            }
            _ => {}
        }
    }

    fn pair_path_params(&mut self, dst: &PathParams, src: &PathParams) {
        for (d, s) in dst.lifetimes.iter().zip(&src.lifetimes) {
            self.lifetime_assign(*d, *s);
        }
        for (d, s) in dst.types.iter().zip(&src.types) {
            self.pair_types(d, s);
        }
    }

    /// Does `lr` (transitively) flow into `'static` or a caller-visible
    /// lifetime parameter?
    fn escapes(&self, lr: LifetimeRef) -> bool {
        let mut seen = vec![false; self.ivars.len()];
        let mut stack = vec![lr];
        while let Some(l) = stack.pop() {
            if l.is_static() {
                return true;
            }
            if !l.is_ivar() && !l.is_unknown() {
                // A declared parameter: visible to the caller.
                return true;
            }
            if l.is_ivar() {
                let idx = (l.binding - LifetimeRef::IVAR_BASE) as usize;
                if idx >= seen.len() || seen[idx] {
                    continue;
                }
                seen[idx] = true;
                stack.extend(self.ivars[idx].dsts.iter().copied());
            }
        }
        false
    }
}

/// Run the analysis. Lifetime tags inside the function's types are updated
/// in place; conflicts are reported into `handler`.
pub fn borrow_check(
    handler: &Handler,
    resolve: &Resolve<'_>,
    path: &hir::SimplePath,
    fcn: &mut Function,
    args: &ArgList,
    ret_ty: &hir::TypeRef,
) {
    let ctx = FnContext::new(resolve, path, args, ret_ty);
    let mut state = BorrowState { ctx, ivars: Vec::new(), origins: FxHashMap::default() };

    // Pass 1: give every unknown lifetime an inference variable.
    let mut locals: Vec<TypeRef> = fcn.locals.iter().cloned().collect();
    for ty in &mut locals {
        state.fill_type(ty);
    }
    for (slot, ty) in fcn.locals.iter_mut().zip(locals) {
        *slot = ty;
    }
    for block in fcn.blocks.iter_mut() {
        for stmt in &mut block.statements {
            if let Statement::Assign { src: RValue::Cast { ty, .. }, .. } = stmt {
                state.fill_type(ty);
            }
        }
    }

    // Pass 2: record assignment constraints.
    let fcn_view: &Function = fcn;
    for block in fcn_view.blocks.iter() {
        for stmt in &block.statements {
            if let Statement::Assign { dst, src } = stmt {
                record_assign(&mut state, fcn_view, dst, src);
            }
        }
        record_terminator(&mut state, fcn_view, &block.terminator);
    }

    // Report: borrows of locals whose lifetime escapes the function.
    let origins = std::mem::take(&mut state.origins);
    let mut reported: Vec<(u32, LValue)> = origins.into_iter().collect();
    reported.sort_by_key(|(idx, _)| *idx);
    for (idx, origin) in reported {
        let is_local = matches!(origin.root, Root::Local(_));
        if is_local && state.escapes(LifetimeRef { binding: LifetimeRef::IVAR_BASE + idx }) {
            handler.error(
                format!("{}: borrowed value `{}` does not live long enough", path, origin),
                state.ctx.sp,
            );
        }
    }
}

fn record_assign(state: &mut BorrowState<'_>, fcn: &Function, dst: &LValue, src: &RValue) {
    let Ok(dst_ty) = state.ctx.lvalue_type(fcn, dst) else { return };
    match src {
        RValue::Use(lv) => {
            if let Ok(src_ty) = state.ctx.lvalue_type(fcn, lv) {
                state.pair_types(&dst_ty, &src_ty);
            }
        }
        RValue::Borrow { val, .. } => {
            // Fresh lifetime per borrow site, flowing into the destination's
            // outer lifetime.
            let site = state.allocate_ivar();
            let idx = site.binding - LifetimeRef::IVAR_BASE;
            state.origins.insert(idx, val.clone());
            if let Type::Borrow(_, dst_lft, _) = dst_ty.kind() {
                state.lifetime_assign(*dst_lft, site);
            }
        }
        RValue::Cast { val, ty } => {
            if let Ok(src_ty) = state.ctx.lvalue_type(fcn, val) {
                if matches!((ty.kind(), src_ty.kind()), (Type::Borrow(..), Type::Borrow(..))) {
                    state.pair_types(ty, &src_ty);
                }
            }
        }
        RValue::Tuple { vals } => {
            if let Type::Tuple(items) = dst_ty.kind() {
                for (item, val) in items.iter().zip(vals) {
                    record_param(state, fcn, item, val);
                }
            }
        }
        RValue::Array { vals } => {
            if let Type::Array(inner, _) = dst_ty.kind() {
                for val in vals {
                    record_param(state, fcn, inner, val);
                }
            }
        }
        RValue::SizedArray { val, .. } => {
            if let Type::Array(inner, _) = dst_ty.kind() {
                record_param(state, fcn, inner, val);
            }
        }
        RValue::Struct { vals, .. } => {
            for (i, val) in vals.iter().enumerate() {
                if let Some(fld) = state.ctx.resolve.field_type(&dst_ty, i as u32) {
                    record_param(state, fcn, &fld, val);
                }
            }
        }
        RValue::EnumVariant { index, vals, .. } => {
            for (i, val) in vals.iter().enumerate() {
                if let Some(fld) = state.ctx.resolve.enum_variant_field(&dst_ty, *index, i as u32) {
                    record_param(state, fcn, &fld, val);
                }
            }
        }
        RValue::UnionVariant { index, val, .. } => {
            if let Some(fld) = state.ctx.resolve.field_type(&dst_ty, *index) {
                record_param(state, fcn, &fld, val);
            }
        }
        RValue::Constant(_)
        | RValue::BinOp { .. }
        | RValue::UniOp { .. }
        | RValue::DstMeta { .. }
        | RValue::DstPtr { .. }
        | RValue::MakeDst { .. } => {}
    }
}

fn record_param(state: &mut BorrowState<'_>, fcn: &Function, dst_ty: &TypeRef, param: &Param) {
    match param {
        Param::LValue(lv) => {
            if let Ok(src_ty) = state.ctx.lvalue_type(fcn, lv) {
                state.pair_types(dst_ty, &src_ty);
            }
        }
        Param::Borrow { val, .. } => {
            let site = state.allocate_ivar();
            let idx = site.binding - LifetimeRef::IVAR_BASE;
            state.origins.insert(idx, val.clone());
            if let Type::Borrow(_, dst_lft, _) = dst_ty.kind() {
                state.lifetime_assign(*dst_lft, site);
            }
        }
        Param::Constant(_) => {}
    }
}

fn record_terminator(state: &mut BorrowState<'_>, fcn: &Function, term: &Terminator) {
    let Terminator::Call { ret_val, fcn: target, args, .. } = term else { return };
    let CallTarget::Path(p) = target else { return };
    let Some((sig_args, sig_ret, _)) = state.ctx.resolve.fn_signature(p) else { return };
    // Pair each declared parameter type with the passed value, and the
    // declared return type with the destination slot.
    for (sig_ty, arg) in sig_args.iter().zip(args) {
        record_param(state, fcn, sig_ty, arg);
    }
    if let Ok(ret_slot_ty) = state.ctx.lvalue_type(fcn, ret_val) {
        state.pair_types(&ret_slot_ty, &sig_ret);
    }
}
