//! Type handles and the type sum.
//!
//! `TypeRef` is a reference-counted handle with shallow clones; mutation goes
//! through copy-on-write (`Rc::make_mut`), so shared storage is never edited
//! in place. Equality and ordering are structural.

use crate::path::{GenericPath, Path};
use rillc_util::Symbol;
use std::fmt;
use std::rc::Rc;

/// Primitive types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CoreType {
    Usize,
    Isize,
    U8,
    U16,
    U32,
    U64,
    U128,
    I8,
    I16,
    I32,
    I64,
    I128,
    F32,
    F64,
    Bool,
    Char,
    Str,
}

impl CoreType {
    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            CoreType::Usize | CoreType::U8 | CoreType::U16 | CoreType::U32 | CoreType::U64 | CoreType::U128 | CoreType::Char | CoreType::Bool
        )
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            CoreType::Isize | CoreType::I8 | CoreType::I16 | CoreType::I32 | CoreType::I64 | CoreType::I128
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, CoreType::F32 | CoreType::F64)
    }

    pub fn is_integer(self) -> bool {
        !self.is_float() && !matches!(self, CoreType::Str | CoreType::Bool | CoreType::Char)
    }

    /// Size in bytes on the (64-bit) target, `None` for `str`.
    pub fn byte_size(self) -> Option<u64> {
        Some(match self {
            CoreType::U8 | CoreType::I8 | CoreType::Bool => 1,
            CoreType::U16 | CoreType::I16 => 2,
            CoreType::U32 | CoreType::I32 | CoreType::F32 | CoreType::Char => 4,
            CoreType::U64 | CoreType::I64 | CoreType::F64 => 8,
            CoreType::U128 | CoreType::I128 => 16,
            CoreType::Usize | CoreType::Isize => 8,
            CoreType::Str => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            CoreType::Usize => "usize",
            CoreType::Isize => "isize",
            CoreType::U8 => "u8",
            CoreType::U16 => "u16",
            CoreType::U32 => "u32",
            CoreType::U64 => "u64",
            CoreType::U128 => "u128",
            CoreType::I8 => "i8",
            CoreType::I16 => "i16",
            CoreType::I32 => "i32",
            CoreType::I64 => "i64",
            CoreType::I128 => "i128",
            CoreType::F32 => "f32",
            CoreType::F64 => "f64",
            CoreType::Bool => "bool",
            CoreType::Char => "char",
            CoreType::Str => "str",
        }
    }
}

impl fmt::Display for CoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Borrow classes, shared between borrow types and raw pointer types.
///
/// `Owned` is the `&move` borrow used when a by-value receiver is passed
/// through a trait object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BorrowKind {
    Shared,
    Unique,
    Owned,
}

impl BorrowKind {
    pub fn prefix_str(self) -> &'static str {
        match self {
            BorrowKind::Shared => "&",
            BorrowKind::Unique => "&mut ",
            BorrowKind::Owned => "&move ",
        }
    }
}

/// A 32-bit lifetime tag.
///
/// `0` is unknown (not yet inferred), `0xFFFF` is `'static`. Values below
/// `0xFFFF` name source-declared lifetime parameters; values from
/// [`LifetimeRef::IVAR_BASE`] up are inference variables allocated by the
/// borrow pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LifetimeRef {
    pub binding: u32,
}

impl LifetimeRef {
    pub const UNKNOWN: u32 = 0;
    pub const STATIC: u32 = 0xFFFF;
    /// First inference-variable tag.
    pub const IVAR_BASE: u32 = 0x1_4000;

    pub fn new() -> Self {
        LifetimeRef { binding: Self::UNKNOWN }
    }

    pub fn new_static() -> Self {
        LifetimeRef { binding: Self::STATIC }
    }

    pub fn new_param(idx: u32) -> Self {
        assert!(idx + 1 < Self::STATIC);
        LifetimeRef { binding: idx + 1 }
    }

    pub fn is_unknown(self) -> bool {
        self.binding == Self::UNKNOWN
    }

    pub fn is_static(self) -> bool {
        self.binding == Self::STATIC
    }

    pub fn is_ivar(self) -> bool {
        self.binding >= Self::IVAR_BASE
    }
}

impl fmt::Display for LifetimeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.binding == Self::UNKNOWN {
            write!(f, "'_")
        } else if self.binding == Self::STATIC {
            write!(f, "'static")
        } else if self.is_ivar() {
            write!(f, "'#i{}", self.binding - Self::IVAR_BASE)
        } else {
            write!(f, "'{}", self.binding - 1)
        }
    }
}

/// A reference to a generic parameter.
///
/// Bindings 0..256 are impl-level parameters, 256.. are function-level, and
/// [`GenericRef::SELF`] is the `Self` type.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenericRef {
    pub name: Symbol,
    pub binding: u32,
}

impl GenericRef {
    pub const SELF: u32 = 0xFFFF;
    pub const FN_BASE: u32 = 256;

    pub fn new_self() -> Self {
        GenericRef { name: Symbol::intern("Self"), binding: Self::SELF }
    }

    pub fn new_impl(name: Symbol, idx: u32) -> Self {
        assert!(idx < Self::FN_BASE);
        GenericRef { name, binding: idx }
    }

    pub fn new_fn(name: Symbol, idx: u32) -> Self {
        GenericRef { name, binding: Self::FN_BASE + idx }
    }

    pub fn is_self(&self) -> bool {
        self.binding == Self::SELF
    }

    /// `(group, index)` where group 0 is impl-level and group 1 fn-level.
    pub fn group_and_index(&self) -> (u32, u32) {
        if self.binding >= Self::FN_BASE {
            (1, self.binding - Self::FN_BASE)
        } else {
            (0, self.binding)
        }
    }
}

impl fmt::Display for GenericRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/*{}*/", self.name, self.binding)
    }
}

/// An array length: either a known constant or a generic parameter.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArraySize {
    Known(u64),
    Generic(GenericRef),
}

impl fmt::Display for ArraySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArraySize::Known(n) => write!(f, "{}", n),
            ArraySize::Generic(g) => write!(f, "{}", g),
        }
    }
}

/// A trait object type: main trait plus marker traits.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TraitObjectTy {
    pub trait_: GenericPath,
    pub markers: Vec<GenericPath>,
    pub lifetime: LifetimeRef,
}

/// An erased type alias (opaque return type).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ErasedTy {
    pub trait_: GenericPath,
    pub lifetime: LifetimeRef,
}

/// A function pointer type.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FnPointer {
    pub is_unsafe: bool,
    pub abi: Symbol,
    pub args: Vec<TypeRef>,
    pub ret: TypeRef,
}

/// The type sum. Obtain one through [`TypeRef`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Type {
    /// An unresolved inference hole. Should not survive typecheck; the MIR
    /// layer treats encountering one as an internal error.
    Infer,
    /// The never type `!`.
    Diverge,
    Primitive(CoreType),
    /// A user path: struct, enum, union, or opaque/extern item.
    Path(GenericPath),
    Generic(GenericRef),
    TraitObject(TraitObjectTy),
    ErasedType(ErasedTy),
    Array(TypeRef, ArraySize),
    Slice(TypeRef),
    Tuple(Vec<TypeRef>),
    Borrow(BorrowKind, LifetimeRef, TypeRef),
    Pointer(BorrowKind, TypeRef),
    /// A zero-sized named function item.
    NamedFunction(Path),
    /// A function pointer.
    Function(FnPointer),
    /// A synthesised closure type (path to its generated struct).
    Closure(GenericPath),
    /// A synthesised generator type.
    Generator(GenericPath),
}

/// Shared-ownership handle to a [`Type`]. Clones are shallow.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeRef(Rc<Type>);

impl TypeRef {
    pub fn new(ty: Type) -> Self {
        TypeRef(Rc::new(ty))
    }

    /// The unit type `()`.
    pub fn unit() -> Self {
        TypeRef::new(Type::Tuple(Vec::new()))
    }

    pub fn diverge() -> Self {
        TypeRef::new(Type::Diverge)
    }

    pub fn primitive(ct: CoreType) -> Self {
        TypeRef::new(Type::Primitive(ct))
    }

    pub fn bool_() -> Self {
        TypeRef::primitive(CoreType::Bool)
    }

    pub fn usize_() -> Self {
        TypeRef::primitive(CoreType::Usize)
    }

    pub fn str_() -> Self {
        TypeRef::primitive(CoreType::Str)
    }

    pub fn path(gp: GenericPath) -> Self {
        TypeRef::new(Type::Path(gp))
    }

    pub fn tuple(items: Vec<TypeRef>) -> Self {
        TypeRef::new(Type::Tuple(items))
    }

    pub fn array(inner: TypeRef, count: u64) -> Self {
        TypeRef::new(Type::Array(inner, ArraySize::Known(count)))
    }

    pub fn slice(inner: TypeRef) -> Self {
        TypeRef::new(Type::Slice(inner))
    }

    pub fn borrow(bk: BorrowKind, inner: TypeRef) -> Self {
        TypeRef::new(Type::Borrow(bk, LifetimeRef::new(), inner))
    }

    pub fn pointer(bk: BorrowKind, inner: TypeRef) -> Self {
        TypeRef::new(Type::Pointer(bk, inner))
    }

    /// Borrowed view of the underlying sum.
    pub fn kind(&self) -> &Type {
        &self.0
    }

    /// Mutable view, cloning the storage first if it is shared.
    pub fn kind_mut(&mut self) -> &mut Type {
        Rc::make_mut(&mut self.0)
    }

    pub fn is_diverge(&self) -> bool {
        matches!(*self.0, Type::Diverge)
    }

    pub fn is_unit(&self) -> bool {
        matches!(&*self.0, Type::Tuple(items) if items.is_empty())
    }

    pub fn as_primitive(&self) -> Option<CoreType> {
        match *self.0 {
            Type::Primitive(ct) => Some(ct),
            _ => None,
        }
    }

    /// Inner type of a borrow or raw pointer.
    pub fn as_pointer_inner(&self) -> Option<(BorrowKind, &TypeRef)> {
        match &*self.0 {
            Type::Borrow(bk, _, inner) => Some((*bk, inner)),
            Type::Pointer(bk, inner) => Some((*bk, inner)),
            _ => None,
        }
    }
}

impl std::ops::Deref for TypeRef {
    type Target = Type;

    fn deref(&self) -> &Type {
        &self.0
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            Type::Infer => write!(f, "_"),
            Type::Diverge => write!(f, "!"),
            Type::Primitive(ct) => write!(f, "{}", ct),
            Type::Path(gp) => write!(f, "{}", gp),
            Type::Generic(g) => write!(f, "{}", g),
            Type::TraitObject(to) => {
                write!(f, "dyn {}", to.trait_)?;
                for m in &to.markers {
                    write!(f, "+{}", m)?;
                }
                Ok(())
            }
            Type::ErasedType(e) => write!(f, "impl {}", e.trait_),
            Type::Array(inner, count) => write!(f, "[{}; {}]", inner, count),
            Type::Slice(inner) => write!(f, "[{}]", inner),
            Type::Tuple(items) => {
                write!(f, "(")?;
                for (i, it) in items.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", it)?;
                }
                write!(f, ")")
            }
            Type::Borrow(bk, lft, inner) => {
                if lft.is_unknown() {
                    write!(f, "{}{}", bk.prefix_str(), inner)
                } else {
                    write!(f, "&{} {}{}", lft, if *bk == BorrowKind::Shared { "" } else { "mut " }, inner)
                }
            }
            Type::Pointer(bk, inner) => match bk {
                BorrowKind::Shared => write!(f, "*const {}", inner),
                BorrowKind::Unique => write!(f, "*mut {}", inner),
                BorrowKind::Owned => write!(f, "*move {}", inner),
            },
            Type::NamedFunction(p) => write!(f, "fn{{{}}}", p),
            Type::Function(fp) => {
                write!(f, "fn(")?;
                for (i, a) in fp.args.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ") -> {}", fp.ret)
            }
            Type::Closure(gp) => write!(f, "closure{{{}}}", gp),
            Type::Generator(gp) => write!(f, "generator{{{}}}", gp),
        }
    }
}

/// Structural equality that ignores lifetime tags.
///
/// The borrow pass rewrites unknown lifetimes into inference variables, so
/// two otherwise-identical types can disagree on lifetimes after it has run.
/// MIR type checks compare with this instead of `==`.
pub fn same_type(a: &TypeRef, b: &TypeRef) -> bool {
    if Rc::ptr_eq(&a.0, &b.0) {
        return true;
    }
    match (&**a, &**b) {
        (Type::Infer, Type::Infer) => true,
        (Type::Diverge, Type::Diverge) => true,
        (Type::Primitive(x), Type::Primitive(y)) => x == y,
        (Type::Path(x), Type::Path(y)) => same_generic_path(x, y),
        (Type::Generic(x), Type::Generic(y)) => x.binding == y.binding,
        (Type::TraitObject(x), Type::TraitObject(y)) => {
            same_generic_path(&x.trait_, &y.trait_)
                && x.markers.len() == y.markers.len()
                && x.markers.iter().zip(&y.markers).all(|(m, n)| same_generic_path(m, n))
        }
        (Type::ErasedType(x), Type::ErasedType(y)) => same_generic_path(&x.trait_, &y.trait_),
        (Type::Array(xi, xc), Type::Array(yi, yc)) => xc == yc && same_type(xi, yi),
        (Type::Slice(x), Type::Slice(y)) => same_type(x, y),
        (Type::Tuple(x), Type::Tuple(y)) => x.len() == y.len() && x.iter().zip(y).all(|(i, j)| same_type(i, j)),
        (Type::Borrow(xb, _, xi), Type::Borrow(yb, _, yi)) => xb == yb && same_type(xi, yi),
        (Type::Pointer(xb, xi), Type::Pointer(yb, yi)) => xb == yb && same_type(xi, yi),
        (Type::NamedFunction(x), Type::NamedFunction(y)) => x == y,
        (Type::Function(x), Type::Function(y)) => {
            x.is_unsafe == y.is_unsafe
                && x.abi == y.abi
                && x.args.len() == y.args.len()
                && x.args.iter().zip(&y.args).all(|(i, j)| same_type(i, j))
                && same_type(&x.ret, &y.ret)
        }
        (Type::Closure(x), Type::Closure(y)) => same_generic_path(x, y),
        (Type::Generator(x), Type::Generator(y)) => same_generic_path(x, y),
        _ => false,
    }
}

fn same_generic_path(a: &GenericPath, b: &GenericPath) -> bool {
    a.path == b.path
        && a.params.types.len() == b.params.types.len()
        && a.params.types.iter().zip(&b.params.types).all(|(i, j)| same_type(i, j))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shallow_clone_shares_storage() {
        let a = TypeRef::tuple(vec![TypeRef::primitive(CoreType::U32), TypeRef::bool_()]);
        let b = a.clone();
        assert!(Rc::ptr_eq(&a.0, &b.0));
        assert_eq!(a, b);
    }

    #[test]
    fn copy_on_write_detaches() {
        let a = TypeRef::slice(TypeRef::primitive(CoreType::U8));
        let mut b = a.clone();
        *b.kind_mut() = Type::Diverge;
        assert!(a.kind() != b.kind());
        assert!(matches!(a.kind(), Type::Slice(_)));
    }

    #[test]
    fn lifetime_insensitive_equality() {
        let mut with_static = TypeRef::borrow(BorrowKind::Shared, TypeRef::str_());
        if let Type::Borrow(_, lft, _) = with_static.kind_mut() {
            *lft = LifetimeRef::new_static();
        }
        let unknown = TypeRef::borrow(BorrowKind::Shared, TypeRef::str_());
        assert!(with_static != unknown);
        assert!(same_type(&with_static, &unknown));
    }
}
