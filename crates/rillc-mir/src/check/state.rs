//! Value-state validation.
//!
//! A forward dataflow over the CFG proving that every read happens on a
//! path where the value is initialised: arguments start `Valid`, everything
//! else `Invalid`; moves of non-Copy locals invalidate; merge points where
//! the two sides disagree produce `Either`. A read of an `Invalid` or
//! `Either` slot is a lowering bug.

use crate::helpers::FnContext;
use crate::mir::{
    CallTarget, Constant, Function, LValue, Param, RValue, Root, Statement, Terminator, Wrapper,
};
use crate::{ArgList, Resolve, Result};
use rillc_hir as hir;
use rillc_util::Idx;
use std::collections::VecDeque;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Invalid,
    Either,
    Valid,
}

impl State {
    fn merge(self, other: State) -> State {
        if self == other {
            self
        } else {
            State::Either
        }
    }
}

/// Full state at one program point.
#[derive(Clone, PartialEq)]
struct ValStates {
    ret: State,
    args: Vec<State>,
    locals: Vec<State>,
}

impl ValStates {
    fn entry(fcn: &Function, n_args: usize) -> Self {
        ValStates {
            ret: State::Invalid,
            args: vec![State::Valid; n_args],
            locals: vec![State::Invalid; fcn.locals.len()],
        }
    }

    fn merge_from(&mut self, other: &ValStates) -> bool {
        let mut changed = false;
        let mut upd = |slot: &mut State, v: State| {
            let new = slot.merge(v);
            if new != *slot {
                *slot = new;
                changed = true;
            }
        };
        upd(&mut self.ret, other.ret);
        for (a, b) in self.args.iter_mut().zip(&other.args) {
            upd(a, *b);
        }
        for (a, b) in self.locals.iter_mut().zip(&other.locals) {
            upd(a, *b);
        }
        changed
    }

    fn get_root(&self, lv: &LValue) -> State {
        match &lv.root {
            Root::Return => self.ret,
            Root::Argument(i) => self.args.get(*i as usize).copied().unwrap_or(State::Invalid),
            Root::Local(id) => self.locals.get(id.index()).copied().unwrap_or(State::Invalid),
            Root::Static(_) => State::Valid,
        }
    }

    fn set_root(&mut self, lv: &LValue, st: State) {
        match &lv.root {
            Root::Return => self.ret = st,
            Root::Argument(i) => {
                if let Some(slot) = self.args.get_mut(*i as usize) {
                    *slot = st;
                }
            }
            Root::Local(id) => {
                if let Some(slot) = self.locals.get_mut(id.index()) {
                    *slot = st;
                }
            }
            Root::Static(_) => {}
        }
    }
}

/// Run the per-function value-state worklist.
pub fn validate_value_states(
    resolve: &Resolve<'_>,
    path: &hir::SimplePath,
    fcn: &Function,
    args: &ArgList,
    ret_ty: &hir::TypeRef,
) -> Result<()> {
    let ctx = FnContext::new(resolve, path, args, ret_ty);

    let mut entry_states: Vec<Option<ValStates>> = vec![None; fcn.blocks.len()];
    entry_states[Function::ENTRY.index()] = Some(ValStates::entry(fcn, args.len()));

    let mut queue = VecDeque::new();
    queue.push_back(Function::ENTRY);

    while let Some(bb) = queue.pop_front() {
        let mut state = entry_states[bb.index()].clone().expect("queued block has a state");
        let block = &fcn.blocks[bb];

        let mut check = BlockCheck { ctx: &ctx, fcn, bb_idx: bb.index(), state: &mut state };
        for (stmt_idx, stmt) in block.statements.iter().enumerate() {
            check.statement(stmt_idx, stmt)?;
        }

        // Terminator reads, then per-edge propagation.
        match &block.terminator {
            Terminator::Return => {
                if state.ret != State::Valid {
                    bug!(
                        ctx.sp,
                        "{}: bb{}: return with {:?} return slot",
                        path, bb.index(), state.ret
                    );
                }
            }
            Terminator::If { cond, .. } => {
                check_read(&ctx, bb.index(), usize::MAX, &state, cond)?;
            }
            Terminator::Switch { val, .. } | Terminator::SwitchValue { val, .. } => {
                check_read(&ctx, bb.index(), usize::MAX, &state, val)?;
            }
            Terminator::Call { ret_val, fcn: target, args: call_args, ret_block, panic_block, .. } => {
                if let CallTarget::Value(lv) = target {
                    check_read(&ctx, bb.index(), usize::MAX, &state, lv)?;
                }
                for a in call_args {
                    param_read(&ctx, fcn, bb.index(), &mut state, a)?;
                }
                // The return edge sees the slot valid; the panic edge does
                // not.
                let mut ret_state = state.clone();
                ret_state.set_root(ret_val, State::Valid);
                propagate(&mut entry_states, &mut queue, *ret_block, &ret_state);
                propagate(&mut entry_states, &mut queue, *panic_block, &state);
                continue;
            }
            _ => {}
        }

        for target in block.terminator.targets() {
            propagate(&mut entry_states, &mut queue, target, &state);
        }
    }

    Ok(())
}

fn propagate(
    entry_states: &mut [Option<ValStates>],
    queue: &mut VecDeque<crate::mir::BlockId>,
    target: crate::mir::BlockId,
    state: &ValStates,
) {
    let slot = &mut entry_states[target.index()];
    let changed = match slot {
        Some(existing) => existing.merge_from(state),
        None => {
            *slot = Some(state.clone());
            true
        }
    };
    if changed && !queue.contains(&target) {
        queue.push_back(target);
    }
}

struct BlockCheck<'a, 'f> {
    ctx: &'a FnContext<'a>,
    fcn: &'f Function,
    bb_idx: usize,
    state: &'a mut ValStates,
}

impl BlockCheck<'_, '_> {
    fn statement(&mut self, stmt_idx: usize, stmt: &Statement) -> Result<()> {
        match stmt {
            Statement::Assign { dst, src } => {
                self.rvalue_reads(stmt_idx, src)?;
                // Writes through projections require the base to be live
                // (a deref reads the pointer, a field write needs storage).
                if dst.wrappers.is_empty() {
                    self.state.set_root(dst, State::Valid);
                } else {
                    self.require_read(stmt_idx, dst)?;
                }
                Ok(())
            }
            Statement::Drop { slot, flag_idx, .. } => {
                let st = self.state.get_root(slot);
                match (st, flag_idx) {
                    (State::Valid, _) => {}
                    // Flag-guarded drops tolerate conditional states: the
                    // flag is false on the invalid paths.
                    (State::Either, Some(_)) | (State::Invalid, Some(_)) => {}
                    (st, None) => {
                        bug!(
                            self.ctx.sp,
                            "{}: bb{}/{}: drop of {:?} value {}",
                            self.ctx.path, self.bb_idx, stmt_idx, st, slot
                        );
                    }
                }
                self.state.set_root(slot, State::Invalid);
                Ok(())
            }
            Statement::Asm(a) => {
                for (_, lv) in &a.inputs {
                    self.require_read(stmt_idx, lv)?;
                }
                for (_, lv) in &a.outputs {
                    self.state.set_root(lv, State::Valid);
                }
                Ok(())
            }
            Statement::Asm2(a) => {
                for p in &a.params {
                    if let crate::mir::AsmParam::Reg { input, output, .. } = p {
                        if let Some(i) = input {
                            param_read(self.ctx, self.fcn, self.bb_idx, self.state, i)?;
                        }
                        if let Some(o) = output {
                            self.state.set_root(o, State::Valid);
                        }
                    }
                }
                Ok(())
            }
            Statement::SetDropFlag { .. } | Statement::ScopeEnd { .. } => Ok(()),
        }
    }

    fn require_read(&self, stmt_idx: usize, lv: &LValue) -> Result<()> {
        check_read(self.ctx, self.bb_idx, stmt_idx, self.state, lv)
    }

    fn rvalue_reads(&mut self, stmt_idx: usize, src: &RValue) -> Result<()> {
        match src {
            RValue::Use(lv) => {
                self.require_read(stmt_idx, lv)?;
                self.move_out(lv)
            }
            RValue::Constant(_) => Ok(()),
            RValue::Borrow { val, .. } | RValue::Cast { val, .. } | RValue::UniOp { val, .. }
            | RValue::DstMeta { val } | RValue::DstPtr { val } => self.require_read(stmt_idx, val),
            RValue::SizedArray { val, .. } | RValue::UnionVariant { val, .. } => {
                param_read(self.ctx, self.fcn, self.bb_idx, self.state, val)
            }
            RValue::BinOp { val_l, val_r, .. } => {
                param_read(self.ctx, self.fcn, self.bb_idx, self.state, val_l)?;
                param_read(self.ctx, self.fcn, self.bb_idx, self.state, val_r)
            }
            RValue::MakeDst { ptr_val, meta_val } => {
                param_read(self.ctx, self.fcn, self.bb_idx, self.state, ptr_val)?;
                if !matches!(meta_val, Param::Constant(Constant::ItemAddr(None))) {
                    param_read(self.ctx, self.fcn, self.bb_idx, self.state, meta_val)?;
                }
                Ok(())
            }
            RValue::Tuple { vals } | RValue::Array { vals } | RValue::EnumVariant { vals, .. }
            | RValue::Struct { vals, .. } => {
                for v in vals {
                    param_read(self.ctx, self.fcn, self.bb_idx, self.state, v)?;
                }
                Ok(())
            }
        }
    }

    /// A `Use` of a whole non-Copy local/argument consumes it.
    fn move_out(&mut self, lv: &LValue) -> Result<()> {
        if !lv.wrappers.is_empty() {
            return Ok(());
        }
        let ty = self.ctx.lvalue_type(self.fcn, lv)?;
        if !self.ctx.resolve.type_is_copy(&ty) {
            self.state.set_root(lv, State::Invalid);
        }
        Ok(())
    }
}

/// Every local an lvalue reads (its root and any index locals) must be
/// `Valid`. Reads through a `Deref` still require the pointer itself.
fn check_read(
    ctx: &FnContext<'_>,
    bb_idx: usize,
    stmt_idx: usize,
    state: &ValStates,
    lv: &LValue,
) -> Result<()> {
    let root_state = state.get_root(lv);
    if root_state != State::Valid {
        let loc = if stmt_idx == usize::MAX {
            format!("bb{}/term", bb_idx)
        } else {
            format!("bb{}/{}", bb_idx, stmt_idx)
        };
        bug!(ctx.sp, "{}: {}: read of {:?} place {}", ctx.path, loc, root_state, lv);
    }
    for w in &lv.wrappers {
        if let Wrapper::Index(idx_local) = w {
            let st = state.locals.get(idx_local.index()).copied().unwrap_or(State::Invalid);
            if st != State::Valid {
                bug!(
                    ctx.sp,
                    "{}: bb{}: index local _{} is {:?}",
                    ctx.path, bb_idx, idx_local.0, st
                );
            }
        }
    }
    Ok(())
}

fn param_read(
    ctx: &FnContext<'_>,
    fcn: &Function,
    bb_idx: usize,
    state: &mut ValStates,
    param: &Param,
) -> Result<()> {
    match param {
        Param::LValue(lv) => {
            check_read(ctx, bb_idx, usize::MAX, state, lv)?;
            // Param reads of whole non-Copy locals are moves.
            if lv.wrappers.is_empty() {
                let ty = ctx.lvalue_type(fcn, lv)?;
                if !ctx.resolve.type_is_copy(&ty) {
                    state.set_root(lv, State::Invalid);
                }
            }
            Ok(())
        }
        Param::Borrow { val, .. } => check_read(ctx, bb_idx, usize::MAX, state, val),
        Param::Constant(_) => Ok(()),
    }
}
