//! Expression-tree lowering.
//!
//! Each node lowers to zero or more statements plus a single result rvalue
//! left in the builder. Diverging nodes (`return`, `break`, a `!` call)
//! leave no result; consumers check and bail, since everything after them is
//! unreachable.

use crate::builder::MirBuilder;
use crate::mir::{
    AsmParam, Asm2Stmt, BinOp, CallTarget, Constant, LValue, LocalId, Param, RValue, Statement,
    Terminator,
};
use crate::Result;
use rillc_hir as hir;
use rillc_hir::{CoreType, TypeRef, ValueItem};
use rillc_util::Span;

pub struct ExprLowerer<'a, 'b> {
    pub builder: &'b mut MirBuilder<'a>,
}

impl<'a, 'b> ExprLowerer<'a, 'b> {
    pub fn new(builder: &'b mut MirBuilder<'a>) -> Self {
        ExprLowerer { builder }
    }

    /// Lower a subexpression and take its result as a place.
    /// `None` means the expression diverged.
    pub fn lower_to_lvalue(&mut self, e: &hir::Expr) -> Result<Option<LValue>> {
        self.lower_expr(e)?;
        if !self.builder.block_active() || !self.builder.has_result() {
            return Ok(None);
        }
        Ok(Some(self.builder.get_result_in_lvalue(e.span, &e.ty)?))
    }

    /// Lower a subexpression and take its result as an operand.
    pub fn lower_to_param(&mut self, e: &hir::Expr) -> Result<Option<Param>> {
        self.lower_expr(e)?;
        if !self.builder.block_active() || !self.builder.has_result() {
            return Ok(None);
        }
        Ok(Some(self.builder.get_result_in_param(e.span, &e.ty)?))
    }

    /// Spill a place to a bare local (index wrappers require one).
    fn to_local(&mut self, sp: Span, lv: LValue, ty: &TypeRef) -> Result<LocalId> {
        if let Some(id) = lv.as_local() {
            return Ok(id);
        }
        let tmp = self.builder.new_temporary(ty.clone());
        self.builder.push_stmt_assign(sp, tmp.clone(), RValue::Use(lv))?;
        Ok(tmp.as_local().expect("new_temporary yields a bare local"))
    }

    pub fn lower_expr(&mut self, e: &hir::Expr) -> Result<()> {
        let sp = e.span;
        match &e.kind {
            hir::ExprKind::Block { stmts, tail } => self.lower_block(e, stmts, tail.as_deref()),
            hir::ExprKind::Return(value) => {
                if let Some(v) = value {
                    self.lower_expr(v)?;
                    if !self.builder.block_active() {
                        return Ok(());
                    }
                    if self.builder.has_result() {
                        let rv = self.builder.get_result(sp)?;
                        self.builder.push_stmt_assign(sp, LValue::new_return(), rv)?;
                    }
                } else {
                    self.builder.push_stmt_assign(sp, LValue::new_return(), RValue::Tuple { vals: Vec::new() })?;
                }
                let fcn_scope = self.builder.fcn_scope();
                self.builder.terminate_scope_early(sp, &fcn_scope)?;
                self.builder.end_block(Terminator::Return);
                let unreachable = self.builder.new_bb_unlinked();
                self.builder.set_cur_block(unreachable);
                Ok(())
            }
            hir::ExprKind::Let { pat, ty, init } => {
                self.define_vars_from(pat)?;
                if let Some(init) = init {
                    self.lower_expr(init)?;
                    if !self.builder.block_active() {
                        return Ok(());
                    }
                    if self.builder.has_result() {
                        // Single bindings take the rvalue directly; anything
                        // structured goes through a place.
                        if let hir::PatternKind::Binding { slot, sub: None, .. } = &pat.kind {
                            let rv = self.builder.get_result(sp)?;
                            let dst = LValue::new_local(LocalId(*slot));
                            self.builder.push_stmt_assign(sp, dst, rv)?;
                        } else {
                            let val = self.builder.get_result_in_lvalue(sp, ty)?;
                            self.destructure_from(sp, pat, val, false)?;
                        }
                    }
                }
                self.builder.set_result(sp, RValue::Tuple { vals: Vec::new() })
            }
            hir::ExprKind::Loop { label, body } => self.lower_loop(e, *label, body),
            hir::ExprKind::LoopControl { label, is_continue, value } => {
                let Some((scope, head, next, result)) = self.builder.loop_targets(*label) else {
                    user_err!(sp, "`break`/`continue` outside of a loop");
                };
                if *is_continue {
                    self.builder.terminate_scope_early(sp, &scope)?;
                    self.builder.end_block(Terminator::Goto(head));
                } else {
                    if let Some(v) = value {
                        self.lower_expr(v)?;
                        if !self.builder.block_active() {
                            return Ok(());
                        }
                        if self.builder.has_result() {
                            let rv = self.builder.get_result(sp)?;
                            if let Some(res) = result {
                                self.builder.push_stmt_assign(sp, LValue::new_local(res), rv)?;
                            }
                        }
                    }
                    self.builder.terminate_scope_early(sp, &scope)?;
                    self.builder.end_block(Terminator::Goto(next));
                }
                let unreachable = self.builder.new_bb_unlinked();
                self.builder.set_cur_block(unreachable);
                Ok(())
            }
            hir::ExprKind::If { cond, then_arm, else_arm } => {
                self.lower_if(e, cond, then_arm, else_arm.as_deref())
            }
            hir::ExprKind::Match { value, arms } => {
                super::pattern::lower_match(self, e, value, arms)
            }
            hir::ExprKind::Assign { dst, src } => {
                self.lower_expr(src)?;
                if !self.builder.block_active() || !self.builder.has_result() {
                    return Ok(());
                }
                let rv = self.builder.get_result(sp)?;
                self.lower_expr(dst)?;
                if !self.builder.block_active() {
                    return Ok(());
                }
                let dst_lv = self.builder.get_result_unwrap_lvalue(sp)?;
                self.builder.push_stmt_assign(sp, dst_lv, rv)?;
                self.builder.set_result(sp, RValue::Tuple { vals: Vec::new() })
            }
            hir::ExprKind::BinOp { op, left, right } => self.lower_binop(e, *op, left, right),
            hir::ExprKind::UniOp { op, value } => {
                let Some(val) = self.lower_to_lvalue(value)? else { return Ok(()) };
                let op = match op {
                    hir::expr::UniOp::Invert => crate::mir::UniOp::Inv,
                    hir::expr::UniOp::Negate => crate::mir::UniOp::Neg,
                };
                self.builder.set_result(sp, RValue::UniOp { val, op })
            }
            hir::ExprKind::Field { value, index } => {
                let Some(lv) = self.lower_to_lvalue(value)? else { return Ok(()) };
                self.builder.set_result(sp, RValue::Use(lv.field(*index)))
            }
            hir::ExprKind::Index { value, index } => {
                let Some(lv) = self.lower_to_lvalue(value)? else { return Ok(()) };
                let Some(idx_lv) = self.lower_to_lvalue(index)? else { return Ok(()) };
                let idx_local = self.to_local(sp, idx_lv, &index.ty)?;
                self.builder.set_result(sp, RValue::Use(lv.index(idx_local)))
            }
            hir::ExprKind::Deref { value } => {
                let Some(lv) = self.lower_to_lvalue(value)? else { return Ok(()) };
                self.builder.set_result(sp, RValue::Use(lv.deref()))
            }
            hir::ExprKind::Downcast { value, variant } => {
                let Some(lv) = self.lower_to_lvalue(value)? else { return Ok(()) };
                self.builder.set_result(sp, RValue::Use(lv.downcast(*variant)))
            }
            hir::ExprKind::Cast { value } => {
                if value.ty.as_primitive() == Some(CoreType::Str) {
                    user_err!(sp, "cannot cast from `str`");
                }
                let Some(val) = self.lower_to_lvalue(value)? else { return Ok(()) };
                self.builder.set_result(sp, RValue::Cast { val, ty: e.ty.clone() })
            }
            hir::ExprKind::Unsize { value } => {
                let Some(ptr) = self.lower_to_param(value)? else { return Ok(()) };
                // Metadata is not knowable until the cleanup pass sees the
                // monomorphised types; leave the placeholder.
                self.builder.set_result(
                    sp,
                    RValue::MakeDst { ptr_val: ptr, meta_val: Param::Constant(Constant::ItemAddr(None)) },
                )
            }
            hir::ExprKind::Borrow { kind, value } => {
                let Some(val) = self.lower_to_lvalue(value)? else { return Ok(()) };
                self.builder.set_result(sp, RValue::Borrow { kind: *kind, val })
            }
            hir::ExprKind::Call { callee, args } => self.lower_call(e, callee, args),
            hir::ExprKind::Tuple(items) => {
                let Some(vals) = self.lower_param_list(items)? else { return Ok(()) };
                self.builder.set_result(sp, RValue::Tuple { vals })
            }
            hir::ExprKind::ArrayList(items) => {
                let Some(vals) = self.lower_param_list(items)? else { return Ok(()) };
                self.builder.set_result(sp, RValue::Array { vals })
            }
            hir::ExprKind::ArraySized { value, count } => {
                let Some(val) = self.lower_to_param(value)? else { return Ok(()) };
                self.builder.set_result(
                    sp,
                    RValue::SizedArray { val, count: hir::ArraySize::Known(*count) },
                )
            }
            hir::ExprKind::StructLiteral { path, fields } => {
                let Some(vals) = self.lower_param_list(fields)? else { return Ok(()) };
                self.builder.set_result(sp, RValue::Struct { path: path.clone(), vals })
            }
            hir::ExprKind::UnionLiteral { path, index, value } => {
                let Some(val) = self.lower_to_param(value)? else { return Ok(()) };
                self.builder.set_result(
                    sp,
                    RValue::UnionVariant { path: path.clone(), index: *index, val },
                )
            }
            hir::ExprKind::VariantLiteral { path, index, fields } => {
                let Some(vals) = self.lower_param_list(fields)? else { return Ok(()) };
                self.builder.set_result(
                    sp,
                    RValue::EnumVariant { path: path.clone(), index: *index, vals },
                )
            }
            hir::ExprKind::Literal(lit) => {
                let c = literal_to_constant(lit);
                self.builder.set_result(sp, RValue::Constant(c))
            }
            hir::ExprKind::PathValue { path } => self.lower_path_value(e, path),
            hir::ExprKind::Variable { binding } => {
                self.builder.set_result(sp, RValue::Use(LValue::new_local(LocalId(*binding))))
            }
            hir::ExprKind::InlineAsm { lines, operands, options } => {
                self.lower_inline_asm(sp, lines, operands, *options)
            }
        }
    }

    fn lower_param_list(&mut self, items: &[hir::Expr]) -> Result<Option<Vec<Param>>> {
        let mut vals = Vec::with_capacity(items.len());
        for item in items {
            let Some(p) = self.lower_to_param(item)? else { return Ok(None) };
            vals.push(p);
        }
        Ok(Some(vals))
    }

    fn lower_block(&mut self, e: &hir::Expr, stmts: &[hir::Expr], tail: Option<&hir::Expr>) -> Result<()> {
        let sp = e.span;
        // Result slot lives in the enclosing scope so the block's drops run
        // before the value is used.
        let res = match tail {
            Some(_) if !e.ty.is_unit() && !e.ty.is_diverge() => {
                Some(self.builder.new_temporary(e.ty.clone()))
            }
            _ => None,
        };

        let scope = self.builder.new_scope_var();
        let mut diverged = false;
        for stmt in stmts {
            let stmt_scope = self.builder.new_scope_temp();
            self.lower_expr(stmt)?;
            if !self.builder.block_active() {
                self.builder.terminate_scope(stmt.span, stmt_scope)?;
                diverged = true;
                break;
            }
            if self.builder.has_result() {
                let rv = self.builder.get_result(stmt.span)?;
                match rv {
                    RValue::Use(_) | RValue::Constant(_) => {}
                    other => {
                        // Materialise so the temporary scope drops it.
                        self.builder.lvalue_or_temp(stmt.span, &stmt.ty, other)?;
                    }
                }
            }
            self.builder.terminate_scope(stmt.span, stmt_scope)?;
        }

        if !diverged {
            if let Some(tail) = tail {
                self.lower_expr(tail)?;
                if self.builder.block_active() && self.builder.has_result() {
                    let rv = self.builder.get_result(tail.span)?;
                    if let Some(res) = &res {
                        self.builder.push_stmt_assign(tail.span, res.clone(), rv)?;
                    }
                }
            }
        }

        self.builder.terminate_scope(sp, scope)?;
        if !self.builder.block_active() {
            return Ok(());
        }
        match res {
            Some(res) => self.builder.set_result(sp, RValue::Use(res)),
            None => self.builder.set_result(sp, RValue::Tuple { vals: Vec::new() }),
        }
    }

    fn lower_loop(&mut self, e: &hir::Expr, label: Option<rillc_util::Symbol>, body: &hir::Expr) -> Result<()> {
        let sp = e.span;
        let res = if !e.ty.is_unit() && !e.ty.is_diverge() {
            let lv = self.builder.new_temporary(e.ty.clone());
            lv.as_local()
        } else {
            None
        };

        let head = self.builder.new_bb_linked();
        let next = self.builder.new_bb_unlinked();
        let scope = self.builder.new_scope_loop(label, head, next, res);

        self.lower_expr(body)?;
        if self.builder.block_active() {
            // Discard the body's (unit) result and loop again.
            if self.builder.has_result() {
                self.builder.get_result(sp)?;
            }
            self.builder.end_block(Terminator::Goto(head));
        }
        self.builder.terminate_scope(sp, scope)?;
        self.builder.set_cur_block(next);

        if e.ty.is_diverge() {
            // No `break` targets this loop; `next` is unreachable and the
            // partial GC removes it.
            return Ok(());
        }
        match res {
            Some(res) => self.builder.set_result(sp, RValue::Use(LValue::new_local(res))),
            None => self.builder.set_result(sp, RValue::Tuple { vals: Vec::new() }),
        }
    }

    fn lower_if(
        &mut self,
        e: &hir::Expr,
        cond: &hir::Expr,
        then_arm: &hir::Expr,
        else_arm: Option<&hir::Expr>,
    ) -> Result<()> {
        let sp = e.span;
        let Some(cond_lv) = self.lower_to_lvalue(cond)? else { return Ok(()) };

        let res = if !e.ty.is_unit() && !e.ty.is_diverge() {
            Some(self.builder.new_temporary(e.ty.clone()))
        } else {
            None
        };

        let true_bb = self.builder.new_bb_unlinked();
        let false_bb = self.builder.new_bb_unlinked();
        let next_bb = self.builder.new_bb_unlinked();
        self.builder.end_block(Terminator::If { cond: cond_lv, bb_true: true_bb, bb_false: false_bb });

        let scope = self.builder.new_scope_split();

        self.builder.set_cur_block(true_bb);
        self.lower_expr(then_arm)?;
        let arm_reachable = self.finish_if_arm(then_arm.span, &res, next_bb)?;
        self.builder.end_split_arm(sp, &scope, arm_reachable)?;

        self.builder.set_cur_block(false_bb);
        let arm_reachable = match else_arm {
            Some(arm) => {
                self.lower_expr(arm)?;
                self.finish_if_arm(arm.span, &res, next_bb)?
            }
            None => {
                self.builder.end_block(Terminator::Goto(next_bb));
                true
            }
        };
        self.builder.end_split_arm(sp, &scope, arm_reachable)?;

        self.builder.terminate_scope(sp, scope)?;
        self.builder.set_cur_block(next_bb);

        match res {
            Some(res) => self.builder.set_result(sp, RValue::Use(res)),
            None if e.ty.is_unit() => self.builder.set_result(sp, RValue::Tuple { vals: Vec::new() }),
            None => Ok(()),
        }
    }

    /// Close an `if` arm: store its result and jump to the join block, or
    /// seal its unreachable continuation. Returns whether the arm fell
    /// through.
    fn finish_if_arm(&mut self, sp: Span, res: &Option<LValue>, next_bb: crate::mir::BlockId) -> Result<bool> {
        let reachable = self.builder.block_active() && self.builder.has_result();
        if reachable {
            self.assign_arm_result(sp, res)?;
            self.builder.end_block(Terminator::Goto(next_bb));
        } else if self.builder.block_active() {
            self.builder.end_block(Terminator::Diverge);
        }
        Ok(reachable)
    }

    /// Store an arm's pending result into the shared slot (or discard it for
    /// unit arms).
    pub(super) fn assign_arm_result(&mut self, sp: Span, res: &Option<LValue>) -> Result<()> {
        if !self.builder.has_result() {
            return Ok(());
        }
        let rv = self.builder.get_result(sp)?;
        if let Some(res) = res {
            self.builder.push_stmt_assign(sp, res.clone(), rv)?;
        }
        Ok(())
    }

    fn lower_binop(&mut self, e: &hir::Expr, op: hir::expr::BinOp, left: &hir::Expr, right: &hir::Expr) -> Result<()> {
        let sp = e.span;
        let Some(val_l) = self.lower_to_param(left)? else { return Ok(()) };
        let Some(val_r) = self.lower_to_param(right)? else { return Ok(()) };

        use hir::expr::BinOp as H;
        let is_int = left.ty.as_primitive().is_some_and(|ct| ct.is_integer());
        let (mir_op, checked) = match op {
            H::Add => (BinOp::Add, is_int),
            H::Sub => (BinOp::Sub, is_int),
            H::Mul => (BinOp::Mul, is_int),
            H::Div => (BinOp::Div, false),
            H::Rem => (BinOp::Rem, false),
            H::BitAnd => (BinOp::BitAnd, false),
            H::BitOr => (BinOp::BitOr, false),
            H::BitXor => (BinOp::BitXor, false),
            H::Shl => (BinOp::Shl, false),
            H::Shr => (BinOp::Shr, false),
            H::Eq => (BinOp::Eq, false),
            H::Ne => (BinOp::Ne, false),
            H::Lt => (BinOp::Lt, false),
            H::Le => (BinOp::Le, false),
            H::Gt => (BinOp::Gt, false),
            H::Ge => (BinOp::Ge, false),
        };

        if checked {
            // Overflow aborts: compute the `(value, overflowed)` pair, then
            // diverge on the flag.
            let ov_op = match mir_op {
                BinOp::Add => BinOp::AddOv,
                BinOp::Sub => BinOp::SubOv,
                BinOp::Mul => BinOp::MulOv,
                _ => unreachable!(),
            };
            let pair_ty = TypeRef::tuple(vec![e.ty.clone(), TypeRef::bool_()]);
            let pair = self.builder.new_temporary(pair_ty);
            self.builder.push_stmt_assign(sp, pair.clone(), RValue::BinOp { val_l, op: ov_op, val_r })?;

            let panic_bb = self.builder.new_bb_unlinked();
            let ok_bb = self.builder.new_bb_unlinked();
            self.builder.end_block(Terminator::If {
                cond: pair.clone().field(1),
                bb_true: panic_bb,
                bb_false: ok_bb,
            });
            self.builder.set_cur_block(panic_bb);
            self.builder.end_block(Terminator::Diverge);
            self.builder.set_cur_block(ok_bb);
            self.builder.set_result(sp, RValue::Use(pair.field(0)))
        } else {
            self.builder.set_result(sp, RValue::BinOp { val_l, op: mir_op, val_r })
        }
    }

    fn lower_call(&mut self, e: &hir::Expr, callee: &hir::expr::Callee, args: &[hir::Expr]) -> Result<()> {
        let sp = e.span;
        let fcn = match callee {
            hir::expr::Callee::Path(p) => CallTarget::Path(p.clone()),
            hir::expr::Callee::Intrinsic { name, params } => {
                CallTarget::Intrinsic { name: *name, params: params.clone() }
            }
            hir::expr::Callee::Value(v) => {
                let Some(lv) = self.lower_to_lvalue(v)? else { return Ok(()) };
                CallTarget::Value(lv)
            }
        };

        let Some(arg_params) = self.lower_param_list(args)? else { return Ok(()) };
        for p in &arg_params {
            self.builder.moved_param(sp, p)?;
        }

        let ret_lv = self.builder.new_temporary(e.ty.clone());
        let ret_bb = self.builder.new_bb_unlinked();
        let panic_bb = self.builder.new_bb_unlinked();
        self.builder.mark_assigned(sp, &ret_lv)?;
        self.builder.end_block(Terminator::Call {
            ret_block: ret_bb,
            panic_block: panic_bb,
            ret_val: ret_lv.clone(),
            fcn,
            args: arg_params,
        });
        self.builder.set_cur_block(panic_bb);
        self.builder.end_block(Terminator::Diverge);
        self.builder.set_cur_block(ret_bb);

        if e.ty.is_diverge() {
            self.builder.end_block(Terminator::Diverge);
            let unreachable = self.builder.new_bb_unlinked();
            self.builder.set_cur_block(unreachable);
            return Ok(());
        }
        self.builder.set_result(sp, RValue::Use(ret_lv))
    }

    fn lower_path_value(&mut self, e: &hir::Expr, path: &hir::Path) -> Result<()> {
        let sp = e.span;
        match self.builder.resolve().get_value(path) {
            Some(ValueItem::Static(_)) => {
                self.builder.set_result(sp, RValue::Use(LValue::new_static(path.clone())))
            }
            Some(ValueItem::Constant(_)) => self.builder.set_result(
                sp,
                RValue::Constant(Constant::Const(Box::new(path.clone()))),
            ),
            Some(ValueItem::Function(_)) => self.builder.set_result(
                sp,
                RValue::Constant(Constant::ItemAddr(Some(Box::new(path.clone())))),
            ),
            Some(ValueItem::EnumCtor(_, idx)) => {
                let Some(gp) = path.as_generic() else {
                    bug!(sp, "enum constructor with a non-generic path: {}", path);
                };
                let parent = hir::GenericPath::new(gp.path.parent(), gp.params.clone());
                self.builder.set_result(
                    sp,
                    RValue::EnumVariant { path: parent, index: idx, vals: Vec::new() },
                )
            }
            Some(ValueItem::StructCtor(_)) => {
                let Some(gp) = path.as_generic() else {
                    bug!(sp, "struct constructor with a non-generic path: {}", path);
                };
                self.builder.set_result(sp, RValue::Struct { path: gp.clone(), vals: Vec::new() })
            }
            None => bug!(sp, "value path {} did not resolve", path),
        }
    }

    fn lower_inline_asm(
        &mut self,
        sp: Span,
        lines: &[String],
        operands: &[hir::expr::AsmOperand],
        options: hir::asm::AsmOptions,
    ) -> Result<()> {
        let mut params = Vec::with_capacity(operands.len());
        for op in operands {
            match op {
                hir::expr::AsmOperand::Const(lit) => {
                    params.push(AsmParam::Const(literal_to_constant(lit)));
                }
                hir::expr::AsmOperand::Sym(p) => params.push(AsmParam::Sym(p.clone())),
                hir::expr::AsmOperand::Reg { dir, spec, input, output } => {
                    let input = match input {
                        Some(i) => {
                            let Some(p) = self.lower_to_param(i)? else { return Ok(()) };
                            Some(p)
                        }
                        None => None,
                    };
                    let output = match output {
                        Some(o) => {
                            let Some(lv) = self.lower_to_lvalue(o)? else { return Ok(()) };
                            Some(lv)
                        }
                        None => None,
                    };
                    params.push(AsmParam::Reg { dir: *dir, spec: spec.clone(), input, output });
                }
            }
        }
        self.builder.push_stmt_other(
            sp,
            Statement::Asm2(Asm2Stmt { options, lines: lines.to_vec(), params }),
        )?;
        self.builder.set_result(sp, RValue::Tuple { vals: Vec::new() })
    }

    // ------------------------------------------------------------------
    // Patterns
    // ------------------------------------------------------------------

    /// Register every binding in `pat` with the active variables scope.
    pub fn define_vars_from(&mut self, pat: &hir::Pattern) -> Result<()> {
        match &pat.kind {
            hir::PatternKind::Any | hir::PatternKind::Value { .. } | hir::PatternKind::Range { .. } => Ok(()),
            hir::PatternKind::Binding { slot, sub, .. } => {
                self.builder.define_variable(pat.span, LocalId(*slot))?;
                if let Some(sub) = sub {
                    self.define_vars_from(sub)?;
                }
                Ok(())
            }
            hir::PatternKind::Tuple(subs)
            | hir::PatternKind::Struct { sub: subs, .. }
            | hir::PatternKind::Variant { sub: subs, .. } => {
                for s in subs {
                    self.define_vars_from(s)?;
                }
                Ok(())
            }
            hir::PatternKind::Ref { sub } => self.define_vars_from(sub),
        }
    }

    /// Move/copy the value at `lval` into the pattern's bindings.
    ///
    /// Refutable components are only legal when `allow_refutable` is set
    /// (after the match tests have already succeeded).
    pub fn destructure_from(
        &mut self,
        sp: Span,
        pat: &hir::Pattern,
        lval: LValue,
        allow_refutable: bool,
    ) -> Result<()> {
        match &pat.kind {
            hir::PatternKind::Any => Ok(()),
            hir::PatternKind::Binding { slot, sub, .. } => {
                if let Some(sub) = sub {
                    self.destructure_from(sp, sub, lval.clone(), allow_refutable)?;
                }
                let dst = LValue::new_local(LocalId(*slot));
                self.builder.push_stmt_assign(sp, dst, RValue::Use(lval))
            }
            hir::PatternKind::Tuple(subs) => {
                for (i, sub) in subs.iter().enumerate() {
                    self.destructure_from(sp, sub, lval.clone_wrapped([crate::mir::Wrapper::Field(i as u32)]), allow_refutable)?;
                }
                Ok(())
            }
            hir::PatternKind::Struct { sub, .. } => {
                for (i, s) in sub.iter().enumerate() {
                    self.destructure_from(sp, s, lval.clone_wrapped([crate::mir::Wrapper::Field(i as u32)]), allow_refutable)?;
                }
                Ok(())
            }
            hir::PatternKind::Variant { path, index, sub } => {
                if !allow_refutable {
                    let multi = self
                        .builder
                        .resolve()
                        .enum_by_path(&path.path.parent())
                        .map(|e| e.variants.len() > 1)
                        .unwrap_or(true);
                    if multi {
                        user_err!(sp, "refutable pattern in irrefutable position");
                    }
                }
                let base = lval.downcast(*index);
                for (i, s) in sub.iter().enumerate() {
                    self.destructure_from(sp, s, base.clone_wrapped([crate::mir::Wrapper::Field(i as u32)]), allow_refutable)?;
                }
                Ok(())
            }
            hir::PatternKind::Ref { sub } => self.destructure_from(sp, sub, lval.deref(), allow_refutable),
            // Already tested by the match machinery; nothing to bind.
            hir::PatternKind::Value { .. } | hir::PatternKind::Range { .. } => Ok(()),
        }
    }
}

/// Translate a HIR literal to a MIR constant.
pub fn literal_to_constant(lit: &hir::Literal) -> Constant {
    match lit {
        hir::Literal::Int(v, t) => Constant::Int { v: *v, t: *t },
        hir::Literal::Uint(v, t) => Constant::Uint { v: *v, t: *t },
        hir::Literal::Float(v, t) => Constant::Float { v: *v, t: *t },
        hir::Literal::Bool(b) => Constant::Bool(*b),
        hir::Literal::Str(s) => Constant::StaticString(s.clone()),
        hir::Literal::ByteStr(b) => Constant::Bytes(b.clone()),
    }
}
