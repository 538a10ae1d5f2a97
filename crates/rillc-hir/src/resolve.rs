//! The query interface the MIR layer uses to ask about types and items.
//!
//! All queries are synchronous and pure with respect to their arguments; the
//! resolver may be re-entered freely. The body table (`B`) lets the driver
//! attach per-function payloads (the MIR layer registers lowered bodies there
//! so the inliner can find callees).

use crate::defs::{ConstDef, Crate, Enum, FunctionDef, Static, Struct, TraitDef, TraitImpl, Union};
use crate::monomorph::MonomorphState;
use crate::path::{GenericPath, Path, SimplePath};
use crate::types::{same_type, CoreType, Type, TypeRef};
use rillc_util::{FxHashMap, Symbol};

/// What kind of metadata a pointer to a type carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetadataType {
    /// Thin pointer.
    None,
    /// Cannot tell yet (generic-dependent).
    Unknown,
    /// `usize` element count.
    Slice,
    /// Vtable pointer.
    TraitObject,
}

/// One field in a computed layout.
#[derive(Clone, Debug)]
pub struct ReprField {
    pub offset: u64,
    pub ty: TypeRef,
}

/// Per-variant layout of an enum.
#[derive(Clone, Debug)]
pub struct VariantRepr {
    pub discriminant: i64,
    pub fields: Vec<ReprField>,
}

#[derive(Clone, Debug)]
pub enum ReprVariants {
    /// Structs, unions, tuples: a flat field list.
    None,
    /// Enums: a leading tag plus per-variant payloads.
    Tagged {
        tag_offset: u64,
        tag_size: u64,
        variants: Vec<VariantRepr>,
    },
}

/// Computed layout of a type.
///
/// This is the simple C-like packing the constant expander needs; the real
/// target layout is owned by the code-generation collaborator.
#[derive(Clone, Debug)]
pub struct TypeRepr {
    pub size: u64,
    pub align: u64,
    pub fields: Vec<ReprField>,
    pub variants: ReprVariants,
}

/// A value item found by [`Resolver::get_value`].
pub enum ValueItem<'c> {
    Function(&'c FunctionDef),
    Static(&'c Static),
    Constant(&'c ConstDef),
    StructCtor(&'c Struct),
    EnumCtor(&'c Enum, u32),
}

/// Query interface over a [`Crate`], plus a per-function body table.
pub struct Resolver<'c, B = ()> {
    krate: &'c Crate,
    bodies: FxHashMap<SimplePath, B>,
}

impl<'c, B> Resolver<'c, B> {
    pub fn new(krate: &'c Crate) -> Self {
        Resolver { krate, bodies: FxHashMap::default() }
    }

    pub fn krate(&self) -> &'c Crate {
        self.krate
    }

    /// Attach a payload (e.g. lowered MIR) to a function path.
    pub fn register_body(&mut self, path: SimplePath, body: B) {
        self.bodies.insert(path, body);
    }

    pub fn body(&self, path: &SimplePath) -> Option<&B> {
        self.bodies.get(path)
    }

    // ------------------------------------------------------------------
    // Item lookup
    // ------------------------------------------------------------------

    pub fn struct_by_path(&self, path: &SimplePath) -> Option<&'c Struct> {
        self.krate.structs.get(path)
    }

    pub fn enum_by_path(&self, path: &SimplePath) -> Option<&'c Enum> {
        self.krate.enums.get(path)
    }

    pub fn union_by_path(&self, path: &SimplePath) -> Option<&'c Union> {
        self.krate.unions.get(path)
    }

    pub fn trait_by_path(&self, path: &SimplePath) -> Option<&'c TraitDef> {
        self.krate.traits.get(path)
    }

    pub fn get_value(&self, path: &Path) -> Option<ValueItem<'c>> {
        match path {
            Path::Generic(gp) => {
                if let Some(f) = self.krate.functions.get(&gp.path) {
                    return Some(ValueItem::Function(f));
                }
                if let Some(s) = self.krate.statics.get(&gp.path) {
                    return Some(ValueItem::Static(s));
                }
                if let Some(c) = self.krate.constants.get(&gp.path) {
                    return Some(ValueItem::Constant(c));
                }
                if let Some(s) = self.krate.structs.get(&gp.path) {
                    return Some(ValueItem::StructCtor(s));
                }
                // `Enum::Variant` constructor paths.
                let name = gp.path.last()?;
                let parent = gp.path.parent();
                let e = self.krate.enums.get(&parent)?;
                let idx = e.variant_index(name)?;
                Some(ValueItem::EnumCtor(e, idx))
            }
            Path::UfcsKnown { ty, trait_, item, .. } => {
                let imp = self.find_impl(&trait_.path, ty)?;
                let fn_path = imp.methods.get(item)?;
                self.krate.functions.get(fn_path).map(ValueItem::Function)
            }
            Path::UfcsInherent { .. } => None,
        }
    }

    /// Locate the impl of `trait_path` for `self_ty`.
    ///
    /// Match is by structural type equality; specialisation ranking is not
    /// modelled here (the trait solver collaborator owns it).
    pub fn find_impl(&self, trait_path: &SimplePath, self_ty: &TypeRef) -> Option<&'c TraitImpl> {
        self.krate
            .impls
            .iter()
            .find(|imp| &imp.trait_path == trait_path && same_type(&imp.impl_ty, self_ty))
    }

    /// The monomorphised signature of a callable path:
    /// `(args, ret, is_variadic)`.
    pub fn fn_signature(&self, path: &Path) -> Option<(Vec<TypeRef>, TypeRef, bool)> {
        let (sig, state) = match path {
            Path::Generic(gp) => {
                let f = self.krate.functions.get(&gp.path)?;
                (&f.sig, MonomorphState::with_fn_params(&gp.params))
            }
            Path::UfcsKnown { ty, trait_, item, params } => {
                // Prefer the trait's declared signature so unresolved
                // receivers still typecheck against it.
                let tr = self.krate.traits.get(&trait_.path)?;
                let sig = tr.methods.get(item)?;
                (sig, MonomorphState::for_method(ty, &trait_.params, params))
            }
            Path::UfcsInherent { .. } => return None,
        };
        let args = sig.args.iter().map(|a| state.monomorph_type(a).ok()).collect::<Option<Vec<_>>>()?;
        let ret = state.monomorph_type(&sig.ret).ok()?;
        Some((args, ret, sig.is_variadic))
    }

    // ------------------------------------------------------------------
    // Type queries
    // ------------------------------------------------------------------

    pub fn is_box(&self, ty: &TypeRef) -> bool {
        match ty.kind() {
            Type::Path(gp) => self.krate.is_box_path(&gp.path),
            _ => false,
        }
    }

    pub fn type_is_copy(&self, ty: &TypeRef) -> bool {
        match ty.kind() {
            Type::Infer => false,
            Type::Diverge => true,
            Type::Primitive(ct) => *ct != CoreType::Str,
            Type::Path(gp) => {
                if let Some(s) = self.krate.structs.get(&gp.path) {
                    s.is_copy
                } else if let Some(e) = self.krate.enums.get(&gp.path) {
                    e.is_copy
                } else if let Some(u) = self.krate.unions.get(&gp.path) {
                    u.is_copy
                } else {
                    false
                }
            }
            Type::Generic(_) => false,
            Type::TraitObject(_) | Type::ErasedType(_) => false,
            Type::Array(inner, _) => self.type_is_copy(inner),
            Type::Slice(_) => false,
            Type::Tuple(items) => items.iter().all(|t| self.type_is_copy(t)),
            Type::Borrow(bk, _, _) => *bk == crate::types::BorrowKind::Shared,
            Type::Pointer(..) => true,
            Type::NamedFunction(_) | Type::Function(_) => true,
            Type::Closure(_) | Type::Generator(_) => false,
        }
    }

    pub fn type_is_sized(&self, ty: &TypeRef) -> bool {
        self.metadata_type(ty) == MetadataType::None
    }

    pub fn metadata_type(&self, ty: &TypeRef) -> MetadataType {
        match ty.kind() {
            Type::Primitive(CoreType::Str) => MetadataType::Slice,
            Type::Slice(_) => MetadataType::Slice,
            Type::TraitObject(_) => MetadataType::TraitObject,
            Type::ErasedType(_) => MetadataType::Unknown,
            Type::Generic(_) => MetadataType::Unknown,
            Type::Path(gp) => {
                // A struct is unsized when its final field is.
                if let Some(s) = self.krate.structs.get(&gp.path) {
                    let Some((_, last)) = s.fields.last() else { return MetadataType::None };
                    let state = MonomorphState::with_impl_params(&gp.params);
                    match state.monomorph_type(last) {
                        Ok(t) => self.metadata_type(&t),
                        Err(_) => MetadataType::Unknown,
                    }
                } else {
                    MetadataType::None
                }
            }
            _ => MetadataType::None,
        }
    }

    pub fn size_of(&self, ty: &TypeRef) -> Option<u64> {
        self.type_repr(ty).map(|r| r.size)
    }

    pub fn align_of(&self, ty: &TypeRef) -> Option<u64> {
        self.type_repr(ty).map(|r| r.align)
    }

    /// Compute the (simplified) layout of a sized type.
    pub fn type_repr(&self, ty: &TypeRef) -> Option<TypeRepr> {
        match ty.kind() {
            Type::Primitive(ct) => {
                let size = ct.byte_size()?;
                Some(TypeRepr { size, align: size.min(8), fields: Vec::new(), variants: ReprVariants::None })
            }
            Type::Tuple(items) => self.layout_fields(items.iter().cloned()),
            Type::Array(inner, count) => {
                let crate::types::ArraySize::Known(n) = count else { return None };
                let inner_repr = self.type_repr(inner)?;
                Some(TypeRepr {
                    size: inner_repr.size * n,
                    align: inner_repr.align,
                    fields: Vec::new(),
                    variants: ReprVariants::None,
                })
            }
            Type::Borrow(_, _, inner) | Type::Pointer(_, inner) => {
                let size = if self.type_is_sized(inner) { 8 } else { 16 };
                Some(TypeRepr { size, align: 8, fields: Vec::new(), variants: ReprVariants::None })
            }
            Type::NamedFunction(_) => {
                Some(TypeRepr { size: 0, align: 1, fields: Vec::new(), variants: ReprVariants::None })
            }
            Type::Function(_) => {
                Some(TypeRepr { size: 8, align: 8, fields: Vec::new(), variants: ReprVariants::None })
            }
            Type::Path(gp) => {
                if let Some(s) = self.krate.structs.get(&gp.path) {
                    let state = MonomorphState::with_impl_params(&gp.params);
                    let tys = s
                        .fields
                        .iter()
                        .map(|(_, t)| state.monomorph_type(t).ok())
                        .collect::<Option<Vec<_>>>()?;
                    self.layout_fields(tys.into_iter())
                } else if let Some(u) = self.krate.unions.get(&gp.path) {
                    let state = MonomorphState::with_impl_params(&gp.params);
                    let mut size = 0;
                    let mut align = 1;
                    let mut fields = Vec::new();
                    for (_, t) in &u.fields {
                        let t = state.monomorph_type(t).ok()?;
                        let r = self.type_repr(&t)?;
                        size = size.max(r.size);
                        align = align.max(r.align);
                        fields.push(ReprField { offset: 0, ty: t });
                    }
                    Some(TypeRepr { size: round_up(size, align), align, fields, variants: ReprVariants::None })
                } else if let Some(e) = self.krate.enums.get(&gp.path) {
                    self.layout_enum(e, gp)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn layout_fields(&self, tys: impl Iterator<Item = TypeRef>) -> Option<TypeRepr> {
        let mut offset = 0u64;
        let mut align = 1u64;
        let mut fields = Vec::new();
        for ty in tys {
            let r = self.type_repr(&ty)?;
            offset = round_up(offset, r.align);
            fields.push(ReprField { offset, ty });
            offset += r.size;
            align = align.max(r.align);
        }
        Some(TypeRepr { size: round_up(offset, align), align, fields, variants: ReprVariants::None })
    }

    fn layout_enum(&self, e: &Enum, gp: &GenericPath) -> Option<TypeRepr> {
        let state = MonomorphState::with_impl_params(&gp.params);
        let tag_size: u64 = match e.variants.len() {
            0..=0x100 => 1,
            0..=0x1_0000 => 2,
            0..=0x1_0000_0000 => 4,
            _ => 8,
        };
        let mut payload_size = 0u64;
        let mut payload_align = 1u64;
        let mut variants = Vec::new();
        for (idx, v) in e.variants.iter().enumerate() {
            let tys = v
                .fields
                .iter()
                .map(|t| state.monomorph_type(t).ok())
                .collect::<Option<Vec<_>>>()?;
            let body = self.layout_fields(tys.into_iter())?;
            payload_size = payload_size.max(body.size);
            payload_align = payload_align.max(body.align);
            variants.push(VariantRepr { discriminant: e.discriminant_of(idx), fields: body.fields });
        }
        let align = payload_align.max(tag_size);
        let payload_offset = round_up(tag_size, payload_align.max(1));
        for v in &mut variants {
            for f in &mut v.fields {
                f.offset += payload_offset;
            }
        }
        let size = round_up(payload_offset + payload_size, align);
        Some(TypeRepr {
            size,
            align,
            fields: Vec::new(),
            variants: ReprVariants::Tagged { tag_offset: 0, tag_size, variants },
        })
    }

    // ------------------------------------------------------------------
    // Projections
    // ------------------------------------------------------------------

    /// Type of field `idx` of `ty` (tuples, structs, unions, closures).
    pub fn field_type(&self, ty: &TypeRef, idx: u32) -> Option<TypeRef> {
        match ty.kind() {
            Type::Tuple(items) => items.get(idx as usize).cloned(),
            Type::Path(gp) => {
                if let Some(s) = self.krate.structs.get(&gp.path) {
                    let (_, fld) = s.fields.get(idx as usize)?;
                    MonomorphState::with_impl_params(&gp.params).monomorph_type(fld).ok()
                } else if let Some(u) = self.krate.unions.get(&gp.path) {
                    let (_, fld) = u.fields.get(idx as usize)?;
                    MonomorphState::with_impl_params(&gp.params).monomorph_type(fld).ok()
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Type of field `fld` in variant `var` of the enum type `ty`.
    pub fn enum_variant_field(&self, ty: &TypeRef, var: u32, fld: u32) -> Option<TypeRef> {
        let Type::Path(gp) = ty.kind() else { return None };
        let e = self.krate.enums.get(&gp.path)?;
        let v = e.variants.get(var as usize)?;
        let fld_ty = v.fields.get(fld as usize)?;
        MonomorphState::with_impl_params(&gp.params).monomorph_type(fld_ty).ok()
    }

    /// Vtable index of `item` in `trait_path`.
    pub fn get_vtable_index(&self, trait_path: &SimplePath, item: Symbol) -> Option<u32> {
        self.krate.traits.get(trait_path)?.vtable_index.get(&item).copied()
    }

    /// The vtable struct type for a trait instantiation.
    pub fn get_vtable_type(&self, trait_: &GenericPath) -> Option<TypeRef> {
        let tr = self.krate.traits.get(&trait_.path)?;
        Some(TypeRef::new(Type::Path(GenericPath::new(tr.vtable_path.clone(), trait_.params.clone()))))
    }
}

fn round_up(v: u64, align: u64) -> u64 {
    if align == 0 {
        return v;
    }
    v.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::Variant;
    use crate::path::PathParams;
    use crate::types::BorrowKind;

    fn sp(s: &str) -> SimplePath {
        SimplePath::from_str(s)
    }

    #[test]
    fn tuple_layout_respects_alignment() {
        let krate = Crate::new();
        let resolve: Resolver<'_> = Resolver::new(&krate);
        let ty = TypeRef::tuple(vec![
            TypeRef::primitive(CoreType::U8),
            TypeRef::primitive(CoreType::U32),
        ]);
        let repr = resolve.type_repr(&ty).unwrap();
        assert_eq!(repr.fields[0].offset, 0);
        assert_eq!(repr.fields[1].offset, 4);
        assert_eq!(repr.size, 8);
    }

    #[test]
    fn fat_pointer_sizes() {
        let krate = Crate::new();
        let resolve: Resolver<'_> = Resolver::new(&krate);
        let thin = TypeRef::borrow(BorrowKind::Shared, TypeRef::primitive(CoreType::U64));
        let fat = TypeRef::borrow(BorrowKind::Shared, TypeRef::slice(TypeRef::primitive(CoreType::U8)));
        assert_eq!(resolve.size_of(&thin), Some(8));
        assert_eq!(resolve.size_of(&fat), Some(16));
    }

    #[test]
    fn value_enum_lookup() {
        let mut krate = Crate::new();
        krate.enums.insert(
            sp("test::Order"),
            Enum {
                variants: vec![
                    Variant { name: Symbol::intern("Less"), fields: Vec::new(), discriminant: None },
                    Variant { name: Symbol::intern("Equal"), fields: Vec::new(), discriminant: None },
                ],
                ..Enum::default()
            },
        );
        let resolve: Resolver<'_> = Resolver::new(&krate);
        let ctor = Path::Generic(GenericPath::new(sp("test::Order::Equal"), PathParams::default()));
        match resolve.get_value(&ctor) {
            Some(ValueItem::EnumCtor(_, 1)) => {}
            _ => panic!("expected enum ctor"),
        }
    }
}
