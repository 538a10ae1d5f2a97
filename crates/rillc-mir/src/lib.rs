//! rillc-mir - The MIR layer of the rillc compiler.
//!
//! Functions are lowered from the typed HIR expression tree into a
//! control-flow graph of basic blocks over typed places ([`mir`]), validated
//! ([`check`]), analysed for borrows ([`borrow`]), cleaned up for
//! code generation ([`cleanup`]), and optimised ([`optimize`]).
//!
//! A MIR function is exclusively owned by the pass currently working on it;
//! every pass takes `&mut Function` and leaves indices stable except for the
//! explicit garbage-collection points.

#[macro_use]
mod macros;

pub mod analysis;
pub mod borrow;
pub mod builder;
pub mod check;
pub mod cleanup;
pub mod dump;
pub mod helpers;
pub mod lower;
pub mod mir;
pub mod optimize;

#[cfg(test)]
mod tests;

use rillc_hir as hir;
use rillc_util::{Handler, Span};
use thiserror::Error;

pub use dump::dump_function;
pub use mir::Function;
pub use optimize::inline::TransList;

/// The resolver instantiation used throughout this crate: query surface plus
/// a registry of lowered bodies for the inliner.
pub type Resolve<'c> = hir::Resolver<'c, mir::Function>;

/// Argument list of a function: pattern and type per argument.
pub type ArgList = [(hir::Pattern, hir::TypeRef)];

/// Errors leaving the MIR layer.
///
/// `User` aborts compilation with a source-located message; `Bug` marks an
/// internal invariant violation (malformed MIR reaching a pass is always a
/// bug in the producer, not in the user's program).
#[derive(Debug, Error)]
pub enum MirError {
    #[error("{span}: {msg}")]
    User { span: Span, msg: String },
    #[error("{span}: internal compiler error: {msg}")]
    Bug { span: Span, msg: String },
}

impl MirError {
    pub fn user(span: Span, msg: impl Into<String>) -> Self {
        MirError::User { span, msg: msg.into() }
    }

    pub fn bug(span: Span, msg: impl Into<String>) -> Self {
        MirError::Bug { span, msg: msg.into() }
    }

    pub fn is_bug(&self) -> bool {
        matches!(self, MirError::Bug { .. })
    }
}

pub type Result<T, E = MirError> = std::result::Result<T, E>;

/// Lower a typed function body to MIR.
pub fn from_hir(
    resolve: &Resolve<'_>,
    path: &hir::SimplePath,
    args: &ArgList,
    ret_ty: &hir::TypeRef,
    body: &hir::ExprRoot,
) -> Result<mir::Function> {
    lower::lower_function(resolve, path, args, ret_ty, body)
}

/// Validate structural and value-state invariants. Failures are compiler
/// bugs: the lowering or a preceding pass produced malformed MIR.
pub fn validate(
    resolve: &Resolve<'_>,
    path: &hir::SimplePath,
    fcn: &mir::Function,
    args: &ArgList,
    ret_ty: &hir::TypeRef,
) -> Result<()> {
    check::validate(resolve, path, fcn, args, ret_ty)?;
    check::state::validate_value_states(resolve, path, fcn, args, ret_ty)
}

/// Record borrow/lifetime constraints and report conflicts into `handler`.
/// Keeps going after the first problem so every diagnostic for the function
/// is emitted.
pub fn borrow_check(
    handler: &Handler,
    resolve: &Resolve<'_>,
    path: &hir::SimplePath,
    fcn: &mut mir::Function,
    args: &ArgList,
    ret_ty: &hir::TypeRef,
) {
    borrow::borrow_check(handler, resolve, path, fcn, args, ret_ty);
}

/// Post-monomorphisation cleanup: devirtualise calls, expand constants,
/// materialise unsize coercions. Re-validates on completion.
pub fn cleanup(
    resolve: &Resolve<'_>,
    path: &hir::SimplePath,
    fcn: &mut mir::Function,
    args: &ArgList,
    ret_ty: &hir::TypeRef,
) -> Result<()> {
    cleanup::cleanup_function(resolve, path, fcn, args, ret_ty)?;
    check::validate(resolve, path, fcn, args, ret_ty)
}

/// Run the full optimisation pipeline to a fixed point.
pub fn optimise(
    resolve: &Resolve<'_>,
    path: &hir::SimplePath,
    fcn: &mut mir::Function,
    args: &ArgList,
    ret_ty: &hir::TypeRef,
) -> Result<()> {
    optimize::optimise(resolve, path, fcn, args, ret_ty, false)
}

/// The light variant: block simplification and inlining only, then GC and
/// block sorting. Used when the input is already optimised.
pub fn optimise_minimal(
    resolve: &Resolve<'_>,
    path: &hir::SimplePath,
    fcn: &mut mir::Function,
    args: &ArgList,
    ret_ty: &hir::TypeRef,
) -> Result<()> {
    optimize::optimise(resolve, path, fcn, args, ret_ty, true)
}

/// Whole-program inlining over an enumerated translation list.
pub fn optimise_inline(
    resolve: &Resolve<'_>,
    path: &hir::SimplePath,
    fcn: &mut mir::Function,
    args: &ArgList,
    ret_ty: &hir::TypeRef,
    trans_list: &TransList,
) -> Result<()> {
    optimize::optimise_inline(resolve, path, fcn, args, ret_ty, trans_list)
}
