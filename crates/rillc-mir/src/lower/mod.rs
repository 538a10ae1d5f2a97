//! HIR to MIR lowering.
//!
//! The expression walk lives in [`expr`]; pattern-match compilation (rule
//! extraction, the simple chain strategy, and the decision tree) lives in
//! [`pattern`].

pub mod expr;
pub mod pattern;

use crate::builder::MirBuilder;
use crate::helpers::FnContext;
use crate::mir::{Function, LValue, Terminator};
use crate::{ArgList, Resolve, Result};
use expr::ExprLowerer;
use rillc_hir as hir;
use rillc_hir::TypeRef;

/// Lower one typed function body to MIR.
pub fn lower_function(
    resolve: &Resolve<'_>,
    path: &hir::SimplePath,
    args: &ArgList,
    ret_ty: &TypeRef,
    body: &hir::ExprRoot,
) -> Result<Function> {
    let sp = body.expr.span;
    let mut ctx = FnContext::new(resolve, path, args, ret_ty);
    ctx.sp = sp;
    let mut builder = MirBuilder::new(ctx, &body.var_types);
    let mut lowerer = ExprLowerer::new(&mut builder);

    // Move the arguments into their pattern bindings.
    for (idx, (pat, _ty)) in args.iter().enumerate() {
        lowerer.define_vars_from(pat)?;
        lowerer.destructure_from(pat.span, pat, LValue::new_argument(idx as u32), false)?;
    }

    lowerer.lower_expr(&body.expr)?;

    if builder.block_active() {
        if builder.has_result() {
            let rv = builder.get_result(sp)?;
            builder.push_stmt_assign(sp, LValue::new_return(), rv)?;
        } else if ret_ty.is_unit() {
            let rv = crate::mir::RValue::Tuple { vals: Vec::new() };
            builder.push_stmt_assign(sp, LValue::new_return(), rv)?;
        }
        let fcn_scope = builder.fcn_scope();
        builder.terminate_scope(sp, fcn_scope)?;
        builder.end_block(Terminator::Return);
        builder.finish_terminated(sp)
    } else {
        builder.finish_terminated(sp)
    }
}
