//! Per-function typing context shared by the validation, cleanup, and
//! optimisation passes.
//!
//! `FnContext` bundles the resolver with the function's signature and can
//! compute the type of any place or operand. Failures here always indicate
//! malformed MIR and are reported as internal errors.

use crate::mir::{Constant, Function, LValue, Param, Root, Wrapper};
use crate::{ArgList, Resolve, Result};
use rillc_hir as hir;
use rillc_hir::{BorrowKind, CoreType, MetadataType, Type, TypeRef, ValueItem};
use rillc_util::Span;

/// Shared state for passes that reason about one function.
#[derive(Clone, Copy)]
pub struct FnContext<'a> {
    pub sp: Span,
    pub resolve: &'a Resolve<'a>,
    pub path: &'a hir::SimplePath,
    pub args: &'a ArgList,
    pub ret_ty: &'a TypeRef,
}

impl<'a> FnContext<'a> {
    pub fn new(
        resolve: &'a Resolve<'a>,
        path: &'a hir::SimplePath,
        args: &'a ArgList,
        ret_ty: &'a TypeRef,
    ) -> Self {
        FnContext { sp: Span::DUMMY, resolve, path, args, ret_ty }
    }

    /// Type of a place, following every wrapper.
    pub fn lvalue_type(&self, fcn: &Function, lv: &LValue) -> Result<TypeRef> {
        let mut cur = match &lv.root {
            Root::Return => Cursor::Ty(self.ret_ty.clone()),
            Root::Argument(i) => match self.args.get(*i as usize) {
                Some((_, ty)) => Cursor::Ty(ty.clone()),
                None => bug!(self.sp, "{}: argument index a{} out of range", self.path, i),
            },
            Root::Local(id) => match fcn.locals.get(*id) {
                Some(ty) => Cursor::Ty(ty.clone()),
                None => bug!(self.sp, "{}: local _{} out of range", self.path, id.0),
            },
            Root::Static(path) => match self.resolve.get_value(path) {
                Some(ValueItem::Static(s)) => Cursor::Ty(s.ty.clone()),
                _ => bug!(self.sp, "{}: static root {} did not resolve", self.path, path),
            },
        };

        for w in &lv.wrappers {
            cur = self.apply_wrapper(cur, *w, lv)?;
        }
        match cur {
            Cursor::Ty(ty) => Ok(ty),
            Cursor::Variant(ty, _) => {
                bug!(self.sp, "{}: place {} ends on a variant view of {}", self.path, lv, ty)
            }
        }
    }

    fn apply_wrapper(&self, cur: Cursor, w: Wrapper, lv: &LValue) -> Result<Cursor> {
        let ty = match cur {
            Cursor::Ty(ty) => ty,
            // Only Field is valid directly after a Downcast.
            Cursor::Variant(ty, var) => {
                if let Wrapper::Field(idx) = w {
                    match self.resolve.enum_variant_field(&ty, var, idx) {
                        Some(t) => return Ok(Cursor::Ty(t)),
                        None => bug!(
                            self.sp,
                            "{}: no field {} in variant {} of {} (place {})",
                            self.path, idx, var, ty, lv
                        ),
                    }
                }
                bug!(self.sp, "{}: invalid wrapper after downcast in {}", self.path, lv)
            }
        };
        match w {
            Wrapper::Deref => {
                if let Some((_, inner)) = ty.as_pointer_inner() {
                    return Ok(Cursor::Ty(inner.clone()));
                }
                // Owned-box deref, before cleanup expands it.
                if self.resolve.is_box(&ty) {
                    if let Type::Path(gp) = ty.kind() {
                        if let Some(inner) = gp.params.types.first() {
                            return Ok(Cursor::Ty(inner.clone()));
                        }
                    }
                }
                bug!(self.sp, "{}: deref of non-pointer {} in {}", self.path, ty, lv)
            }
            Wrapper::Field(idx) => match self.resolve.field_type(&ty, idx) {
                Some(t) => Ok(Cursor::Ty(t)),
                None => {
                    bug!(self.sp, "{}: no field {} on {} (place {})", self.path, idx, ty, lv)
                }
            },
            Wrapper::Downcast(var) => match ty.kind() {
                Type::Path(gp) if self.resolve.enum_by_path(&gp.path).is_some() => {
                    Ok(Cursor::Variant(ty.clone(), var))
                }
                _ => bug!(self.sp, "{}: downcast of non-enum {} in {}", self.path, ty, lv),
            },
            Wrapper::Index(_) => match ty.kind() {
                Type::Array(inner, _) | Type::Slice(inner) => Ok(Cursor::Ty(inner.clone())),
                _ => bug!(self.sp, "{}: index of non-array {} in {}", self.path, ty, lv),
            },
        }
    }

    /// Type of an operand.
    pub fn param_type(&self, fcn: &Function, param: &Param) -> Result<TypeRef> {
        match param {
            Param::LValue(lv) => self.lvalue_type(fcn, lv),
            Param::Borrow { kind, val } => {
                Ok(TypeRef::borrow(*kind, self.lvalue_type(fcn, val)?))
            }
            Param::Constant(c) => self.constant_type(c),
        }
    }

    /// Type of a constant.
    pub fn constant_type(&self, c: &Constant) -> Result<TypeRef> {
        Ok(match c {
            Constant::Int { t, .. } | Constant::Uint { t, .. } | Constant::Float { t, .. } => {
                TypeRef::primitive(*t)
            }
            Constant::Bool(_) => TypeRef::bool_(),
            Constant::Bytes(b) => {
                let mut ty = TypeRef::borrow(
                    BorrowKind::Shared,
                    TypeRef::array(TypeRef::primitive(CoreType::U8), b.len() as u64),
                );
                set_static_lifetime(&mut ty);
                ty
            }
            Constant::StaticString(_) => {
                let mut ty = TypeRef::borrow(BorrowKind::Shared, TypeRef::str_());
                set_static_lifetime(&mut ty);
                ty
            }
            Constant::Const(p) => match self.resolve.get_value(p) {
                Some(ValueItem::Constant(cd)) => cd.ty.clone(),
                _ => bug!(self.sp, "{}: const reference {} did not resolve", self.path, p),
            },
            // Const generics are integers in value position; their declared
            // type is pinned to usize until value monomorphisation.
            Constant::Generic(_) => TypeRef::usize_(),
            Constant::ItemAddr(Some(p)) => {
                // Synthesised vtable instances are addressed before the
                // enumeration layer registers their statics.
                if let hir::Path::UfcsKnown { trait_, item, .. } = &**p {
                    if item.as_str() == "vtable#" {
                        if let Some(vt) = self.resolve.get_vtable_type(trait_) {
                            return Ok(TypeRef::pointer(BorrowKind::Shared, vt));
                        }
                    }
                }
                match self.resolve.get_value(p) {
                    Some(ValueItem::Static(s)) => TypeRef::pointer(BorrowKind::Shared, s.ty.clone()),
                    Some(ValueItem::Function(_)) => TypeRef::new(Type::NamedFunction((**p).clone())),
                    _ => bug!(self.sp, "{}: item address {} did not resolve", self.path, p),
                }
            }
            Constant::ItemAddr(None) => {
                bug!(self.sp, "{}: unresolved unsize placeholder outside MakeDst", self.path)
            }
        })
    }

    /// Result type of a `DstMeta` over the given input place type.
    pub fn dst_meta_type(&self, input: &TypeRef) -> Result<TypeRef> {
        // On an array this yields its length (used by generic size_of_val).
        if let Type::Array(..) = input.kind() {
            return Ok(TypeRef::usize_());
        }
        let inner = match input.as_pointer_inner() {
            Some((_, inner)) => inner.clone(),
            None if self.resolve.is_box(input) => match input.kind() {
                Type::Path(gp) => gp.params.types[0].clone(),
                _ => unreachable!(),
            },
            None => bug!(self.sp, "{}: DstMeta of non-pointer {}", self.path, input),
        };
        match self.resolve.metadata_type(&inner) {
            MetadataType::Slice => Ok(TypeRef::usize_()),
            MetadataType::TraitObject => {
                let Type::TraitObject(to) = inner.kind() else {
                    return Ok(TypeRef::pointer(BorrowKind::Shared, TypeRef::unit()));
                };
                match self.resolve.get_vtable_type(&to.trait_) {
                    Some(vt) => Ok(TypeRef::pointer(BorrowKind::Shared, vt)),
                    None => Ok(TypeRef::pointer(BorrowKind::Shared, TypeRef::unit())),
                }
            }
            MetadataType::Unknown => Ok(TypeRef::usize_()),
            MetadataType::None => {
                bug!(self.sp, "{}: DstMeta of thin pointer to {}", self.path, inner)
            }
        }
    }
}

enum Cursor {
    Ty(TypeRef),
    /// An enum type viewed as one of its variants.
    Variant(TypeRef, u32),
}

fn set_static_lifetime(ty: &mut TypeRef) {
    if let Type::Borrow(_, lft, _) = ty.kind_mut() {
        *lft = hir::LifetimeRef::new_static();
    }
}
