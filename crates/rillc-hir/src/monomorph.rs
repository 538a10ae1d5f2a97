//! Substitution of generic parameters through types and paths.
//!
//! A `MonomorphState` captures the parameter lists in scope (impl-level,
//! function-level, and `Self`) and rewrites every `Generic` reference. The
//! walk is total over the type sum: a new variant cannot be added without
//! this module failing to compile.

use crate::path::{GenericPath, Path, PathParams};
use crate::types::{ArraySize, ErasedTy, FnPointer, GenericRef, TraitObjectTy, Type, TypeRef};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonomorphError {
    #[error("unbound generic parameter {0}")]
    Unbound(GenericRef),
    #[error("`Self` used with no self type in scope")]
    NoSelf,
}

/// Parameter environment for one substitution.
#[derive(Clone, Copy, Default)]
pub struct MonomorphState<'a> {
    pub self_ty: Option<&'a TypeRef>,
    pub impl_params: Option<&'a PathParams>,
    pub fn_params: Option<&'a PathParams>,
}

impl<'a> MonomorphState<'a> {
    pub fn new() -> Self {
        MonomorphState::default()
    }

    /// Environment for an item whose own parameters come from `params`
    /// (impl-level slot).
    pub fn with_impl_params(params: &'a PathParams) -> Self {
        MonomorphState { self_ty: None, impl_params: Some(params), fn_params: None }
    }

    /// Environment for a free function instantiated with `params`.
    pub fn with_fn_params(params: &'a PathParams) -> Self {
        MonomorphState { self_ty: None, impl_params: None, fn_params: Some(params) }
    }

    /// Environment for a trait method: `Self`, the trait's parameters, and
    /// the method's own parameters.
    pub fn for_method(self_ty: &'a TypeRef, trait_params: &'a PathParams, fn_params: &'a PathParams) -> Self {
        MonomorphState { self_ty: Some(self_ty), impl_params: Some(trait_params), fn_params: Some(fn_params) }
    }

    fn lookup(&self, g: &GenericRef) -> Result<TypeRef, MonomorphError> {
        if g.is_self() {
            return self.self_ty.cloned().ok_or(MonomorphError::NoSelf);
        }
        let (group, idx) = g.group_and_index();
        let src = if group == 0 { self.impl_params } else { self.fn_params };
        src.and_then(|p| p.types.get(idx as usize))
            .cloned()
            .ok_or_else(|| MonomorphError::Unbound(g.clone()))
    }

    pub fn monomorph_type(&self, ty: &TypeRef) -> Result<TypeRef, MonomorphError> {
        Ok(match ty.kind() {
            Type::Infer => ty.clone(),
            Type::Diverge => ty.clone(),
            Type::Primitive(_) => ty.clone(),
            Type::Path(gp) => TypeRef::new(Type::Path(self.monomorph_generic_path(gp)?)),
            Type::Generic(g) => self.lookup(g)?,
            Type::TraitObject(to) => TypeRef::new(Type::TraitObject(TraitObjectTy {
                trait_: self.monomorph_generic_path(&to.trait_)?,
                markers: to
                    .markers
                    .iter()
                    .map(|m| self.monomorph_generic_path(m))
                    .collect::<Result<_, _>>()?,
                lifetime: to.lifetime,
            })),
            Type::ErasedType(e) => TypeRef::new(Type::ErasedType(ErasedTy {
                trait_: self.monomorph_generic_path(&e.trait_)?,
                lifetime: e.lifetime,
            })),
            Type::Array(inner, count) => {
                // Const generics in array sizes are left untouched; value
                // parameters are resolved by the enumeration layer.
                TypeRef::new(Type::Array(self.monomorph_type(inner)?, count.clone()))
            }
            Type::Slice(inner) => TypeRef::new(Type::Slice(self.monomorph_type(inner)?)),
            Type::Tuple(items) => TypeRef::new(Type::Tuple(
                items.iter().map(|t| self.monomorph_type(t)).collect::<Result<_, _>>()?,
            )),
            Type::Borrow(bk, lft, inner) => {
                TypeRef::new(Type::Borrow(*bk, *lft, self.monomorph_type(inner)?))
            }
            Type::Pointer(bk, inner) => TypeRef::new(Type::Pointer(*bk, self.monomorph_type(inner)?)),
            Type::NamedFunction(p) => TypeRef::new(Type::NamedFunction(self.monomorph_path(p)?)),
            Type::Function(fp) => TypeRef::new(Type::Function(FnPointer {
                is_unsafe: fp.is_unsafe,
                abi: fp.abi,
                args: fp.args.iter().map(|t| self.monomorph_type(t)).collect::<Result<_, _>>()?,
                ret: self.monomorph_type(&fp.ret)?,
            })),
            Type::Closure(gp) => TypeRef::new(Type::Closure(self.monomorph_generic_path(gp)?)),
            Type::Generator(gp) => TypeRef::new(Type::Generator(self.monomorph_generic_path(gp)?)),
        })
    }

    pub fn monomorph_path_params(&self, params: &PathParams) -> Result<PathParams, MonomorphError> {
        Ok(PathParams {
            lifetimes: params.lifetimes.clone(),
            types: params.types.iter().map(|t| self.monomorph_type(t)).collect::<Result<_, _>>()?,
        })
    }

    pub fn monomorph_generic_path(&self, gp: &GenericPath) -> Result<GenericPath, MonomorphError> {
        Ok(GenericPath {
            path: gp.path.clone(),
            params: self.monomorph_path_params(&gp.params)?,
        })
    }

    pub fn monomorph_path(&self, path: &Path) -> Result<Path, MonomorphError> {
        Ok(match path {
            Path::Generic(gp) => Path::Generic(self.monomorph_generic_path(gp)?),
            Path::UfcsKnown { ty, trait_, item, params } => Path::UfcsKnown {
                ty: self.monomorph_type(ty)?,
                trait_: self.monomorph_generic_path(trait_)?,
                item: *item,
                params: self.monomorph_path_params(params)?,
            },
            Path::UfcsInherent { ty, item, params } => Path::UfcsInherent {
                ty: self.monomorph_type(ty)?,
                item: *item,
                params: self.monomorph_path_params(params)?,
            },
        })
    }

    /// Substitute array sizes that name a generic parameter, when the
    /// surrounding environment pinned them to a concrete length.
    pub fn monomorph_array_size(&self, size: &ArraySize) -> ArraySize {
        size.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CoreType;
    use rillc_util::Symbol;

    #[test]
    fn substitutes_fn_params() {
        let params = PathParams::new(vec![TypeRef::primitive(CoreType::U32)]);
        let state = MonomorphState::with_fn_params(&params);
        let g = TypeRef::new(Type::Generic(GenericRef::new_fn(Symbol::intern("T"), 0)));
        let out = state.monomorph_type(&g).unwrap();
        assert_eq!(out, TypeRef::primitive(CoreType::U32));
    }

    #[test]
    fn unbound_parameter_is_an_error() {
        let state = MonomorphState::new();
        let g = TypeRef::new(Type::Generic(GenericRef::new_fn(Symbol::intern("T"), 0)));
        assert!(state.monomorph_type(&g).is_err());
    }

    #[test]
    fn walks_nested_types() {
        let params = PathParams::new(vec![TypeRef::primitive(CoreType::I64)]);
        let state = MonomorphState::with_impl_params(&params);
        let g = TypeRef::new(Type::Generic(GenericRef::new_impl(Symbol::intern("T"), 0)));
        let nested = TypeRef::tuple(vec![TypeRef::slice(g.clone()), TypeRef::borrow(crate::types::BorrowKind::Shared, g)]);
        let out = state.monomorph_type(&nested).unwrap();
        assert_eq!(
            format!("{}", out),
            "([i64], &i64)"
        );
    }
}
