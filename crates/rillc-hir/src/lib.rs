//! rillc-hir - The typed HIR surface consumed by the MIR layer.
//!
//! This crate defines the data the MIR subsystem reads from the front-end:
//! reference-counted type handles, item paths, item definitions, the typed
//! expression tree, the resolver query interface, and monomorphisation.
//! Parsing, name resolution, and type inference live upstream and populate
//! these structures; the MIR layer only consumes them.

pub mod asm;
pub mod defs;
pub mod expr;
pub mod literal;
pub mod monomorph;
pub mod path;
pub mod resolve;
pub mod types;

pub use defs::{ConstDef, Crate, Enum, FnSig, FunctionDef, GenericParams, Static, Struct, TraitDef, TraitImpl, Union, Variant};
pub use expr::{Expr, ExprKind, ExprRoot, Literal, MatchArm, Pattern, PatternKind};
pub use literal::{EncodedLiteral, Reloc, RelocValue};
pub use monomorph::{MonomorphError, MonomorphState};
pub use path::{GenericPath, Path, PathParams, SimplePath};
pub use resolve::{MetadataType, ReprField, ReprVariants, Resolver, TypeRepr, ValueItem, VariantRepr};
pub use types::{ArraySize, BorrowKind, CoreType, FnPointer, GenericRef, LifetimeRef, Type, TypeRef};
