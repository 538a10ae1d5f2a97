//! Item definitions and the crate registry.
//!
//! The MIR layer never mutates these; the front-end (or a test fixture)
//! populates a [`Crate`] and the resolver answers queries against it.

use crate::literal::EncodedLiteral;
use crate::path::{PathParams, SimplePath};
use crate::types::TypeRef;
use indexmap::IndexMap;
use rillc_util::{FxHashMap, Symbol};

/// Generic parameter lists, names only. Bounds stay with the trait solver.
#[derive(Clone, Debug, Default)]
pub struct GenericParams {
    pub lifetimes: Vec<Symbol>,
    pub types: Vec<Symbol>,
}

impl GenericParams {
    pub fn is_empty(&self) -> bool {
        self.lifetimes.is_empty() && self.types.is_empty()
    }
}

/// A struct definition with positional fields.
#[derive(Clone, Debug, Default)]
pub struct Struct {
    pub params: GenericParams,
    pub fields: Vec<(Symbol, TypeRef)>,
    pub is_copy: bool,
    /// Index of the field through which an unsize coercion propagates
    /// (`Box<T> -> Box<dyn Trait>` style wrappers).
    pub coerce_unsized: Option<u32>,
}

/// One enum variant.
#[derive(Clone, Debug)]
pub struct Variant {
    pub name: Symbol,
    pub fields: Vec<TypeRef>,
    /// Explicit discriminant, for value enums.
    pub discriminant: Option<i64>,
}

/// An enum definition.
#[derive(Clone, Debug, Default)]
pub struct Enum {
    pub params: GenericParams,
    pub variants: Vec<Variant>,
    pub is_copy: bool,
}

impl Enum {
    /// A value enum has no payload anywhere and can be cast to an integer.
    pub fn is_value_enum(&self) -> bool {
        self.variants.iter().all(|v| v.fields.is_empty())
    }

    /// Discriminant value of a variant (explicit, or its index).
    pub fn discriminant_of(&self, idx: usize) -> i64 {
        self.variants[idx].discriminant.unwrap_or(idx as i64)
    }

    pub fn variant_index(&self, name: Symbol) -> Option<u32> {
        self.variants.iter().position(|v| v.name == name).map(|i| i as u32)
    }
}

/// A union definition.
#[derive(Clone, Debug, Default)]
pub struct Union {
    pub params: GenericParams,
    pub fields: Vec<(Symbol, TypeRef)>,
    pub is_copy: bool,
}

/// A function signature.
#[derive(Clone, Debug)]
pub struct FnSig {
    pub abi: Symbol,
    pub params: GenericParams,
    pub args: Vec<TypeRef>,
    pub ret: TypeRef,
    pub is_variadic: bool,
}

impl FnSig {
    pub fn new(args: Vec<TypeRef>, ret: TypeRef) -> Self {
        FnSig {
            abi: Symbol::intern("Rill"),
            params: GenericParams::default(),
            args,
            ret,
            is_variadic: false,
        }
    }
}

/// A free or associated function item.
#[derive(Clone, Debug)]
pub struct FunctionDef {
    pub sig: FnSig,
}

/// A trait definition: methods in declaration order plus the vtable layout.
///
/// The vtable struct is referenced by path, not by an owning link; the cycle
/// between a trait and its vtable type resolves through the crate registry.
#[derive(Clone, Debug)]
pub struct TraitDef {
    pub params: GenericParams,
    pub methods: IndexMap<Symbol, FnSig>,
    pub vtable_path: SimplePath,
    /// Field index of each method in the vtable struct.
    pub vtable_index: IndexMap<Symbol, u32>,
}

/// A static item, with its encoded initialiser when known.
#[derive(Clone, Debug)]
pub struct Static {
    pub ty: TypeRef,
    pub lit: Option<EncodedLiteral>,
}

/// A `const` item with its precomputed encoded value.
#[derive(Clone, Debug)]
pub struct ConstDef {
    pub ty: TypeRef,
    pub lit: EncodedLiteral,
}

/// One `impl Trait for Type` block.
#[derive(Clone, Debug)]
pub struct TraitImpl {
    pub trait_path: SimplePath,
    pub trait_params: PathParams,
    pub impl_ty: TypeRef,
    pub params: GenericParams,
    /// Method name to concrete function item path.
    pub methods: FxHashMap<Symbol, SimplePath>,
    pub assoc_types: FxHashMap<Symbol, TypeRef>,
}

/// Registry of every item the MIR layer can name.
#[derive(Default)]
pub struct Crate {
    pub structs: FxHashMap<SimplePath, Struct>,
    pub enums: FxHashMap<SimplePath, Enum>,
    pub unions: FxHashMap<SimplePath, Union>,
    pub traits: FxHashMap<SimplePath, TraitDef>,
    pub functions: FxHashMap<SimplePath, FunctionDef>,
    pub statics: FxHashMap<SimplePath, Static>,
    pub constants: FxHashMap<SimplePath, ConstDef>,
    pub impls: Vec<TraitImpl>,
    /// The owned-box lang item, if the crate defines one.
    pub box_path: Option<SimplePath>,
}

impl Crate {
    pub fn new() -> Self {
        Crate::default()
    }

    pub fn is_box_path(&self, path: &SimplePath) -> bool {
        self.box_path.as_ref() == Some(path)
    }
}
