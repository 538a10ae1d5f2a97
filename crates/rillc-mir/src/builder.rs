//! Incremental construction of a MIR function.
//!
//! `MirBuilder` owns the output function while lowering walks the expression
//! tree. It tracks the current block, the pending result value, a scope stack
//! controlling drops, and the initialisation state of every local so scope
//! exits drop exactly the values that are live.

use crate::helpers::FnContext;
use crate::mir::{
    BlockId, DropKind, FlagId, Function, LValue, LocalId, Param, RValue, Root, Statement,
    Terminator, Wrapper,
};
use crate::Result;
use rillc_hir::TypeRef;
use rillc_util::{FxHashMap, FxHashSet, Idx, Span, Symbol};
use std::fmt;

/// Initialisation state of a local while lowering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarState {
    /// No value assigned yet.
    Uninit,
    /// Holds a valid value.
    Init,
    /// Valid on some paths only; governed by a drop flag.
    MaybeMoved,
    /// Definitely moved out.
    Moved,
    /// Dropped by scope exit.
    Dropped,
}

impl fmt::Display for VarState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VarState::Uninit => "uninit",
            VarState::Init => "init",
            VarState::MaybeMoved => "maybe-moved",
            VarState::Moved => "moved",
            VarState::Dropped => "dropped",
        };
        f.write_str(s)
    }
}

/// One arm of a split scope: the state changes made on that path.
#[derive(Default)]
struct SplitArm {
    has_early_terminated: bool,
    always_early_terminated: bool,
    states: FxHashMap<LocalId, VarState>,
}

enum ScopeType {
    /// Owns user variables; drops them in reverse on exit.
    Variables { vars: Vec<LocalId> },
    /// Owns lowering temporaries; drops them on exit.
    Temporaries { temporaries: Vec<LocalId> },
    /// One arm per `if`/`match` branch; merges var states on close.
    Split { arms: Vec<SplitArm> },
    /// A loop body; records the jump targets for `break`/`continue` and the
    /// slot a `break value` writes to.
    Loop {
        label: Option<Symbol>,
        head: BlockId,
        next: BlockId,
        result: Option<LocalId>,
    },
}

struct ScopeDef {
    complete: bool,
    data: ScopeType,
}

/// Index-based handle to an open scope. Consumed by `terminate_scope`.
#[derive(Debug)]
pub struct ScopeHandle {
    idx: usize,
}

/// MIR function under construction.
pub struct MirBuilder<'a> {
    pub ctx: FnContext<'a>,
    output: Function,

    current_block: BlockId,
    block_active: bool,

    result: Option<RValue>,

    /// Per-local state (variables and temporaries share the index space).
    states: Vec<VarState>,
    /// Drop flags for conditionally-initialised locals.
    flags: FxHashMap<LocalId, FlagId>,
    /// Owned boxes whose pointee moved out: only the allocation remains to
    /// free, so their scope-exit drop is shallow.
    moved_out_boxes: FxHashSet<LocalId>,

    scopes: Vec<ScopeDef>,
    scope_stack: Vec<usize>,
}

impl<'a> MirBuilder<'a> {
    /// Start building: allocates one local per HIR variable slot and opens
    /// the entry block and the function scope.
    pub fn new(ctx: FnContext<'a>, var_types: &[TypeRef]) -> Self {
        let mut output = Function::new();
        for ty in var_types {
            output.new_local(ty.clone());
        }
        let entry = output.new_block();
        debug_assert_eq!(entry, Function::ENTRY);

        let mut this = MirBuilder {
            ctx,
            output,
            current_block: entry,
            block_active: true,
            result: None,
            states: vec![VarState::Uninit; var_types.len()],
            flags: FxHashMap::default(),
            moved_out_boxes: FxHashSet::default(),
            scopes: Vec::new(),
            scope_stack: Vec::new(),
        };
        // Function scope: owns nothing directly (arguments move into
        // pattern bindings at entry), but is the target of `return`.
        let fcn_scope = this.new_scope_var();
        debug_assert_eq!(fcn_scope.idx, 0);
        this
    }

    /// Hand over the finished function. The caller has already terminated
    /// the function scope (or control never falls off the end).
    pub fn finish_terminated(mut self, _sp: Span) -> Result<Function> {
        self.scopes[0].complete = true;
        Ok(self.output)
    }

    pub fn resolve(&self) -> &'a crate::Resolve<'a> {
        self.ctx.resolve
    }

    pub fn fcn(&self) -> &Function {
        &self.output
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    /// Allocate a fresh temporary, owned by the innermost value scope.
    pub fn new_temporary(&mut self, ty: TypeRef) -> LValue {
        let id = self.output.new_local(ty);
        self.states.push(VarState::Uninit);
        for &scope_idx in self.scope_stack.iter().rev() {
            match &mut self.scopes[scope_idx].data {
                ScopeType::Temporaries { temporaries } => {
                    temporaries.push(id);
                    return LValue::new_local(id);
                }
                ScopeType::Variables { vars } => {
                    vars.push(id);
                    return LValue::new_local(id);
                }
                _ => {}
            }
        }
        LValue::new_local(id)
    }

    pub fn lvalue_or_temp(&mut self, sp: Span, ty: &TypeRef, val: RValue) -> Result<LValue> {
        match val {
            RValue::Use(lv) => Ok(lv),
            val => {
                let lv = self.new_temporary(ty.clone());
                self.push_stmt_assign(sp, lv.clone(), val)?;
                Ok(lv)
            }
        }
    }

    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }

    pub fn set_result(&mut self, sp: Span, val: RValue) -> Result<()> {
        if self.result.is_some() {
            bug!(sp, "{}: result double-set", self.ctx.path);
        }
        self.result = Some(val);
        Ok(())
    }

    pub fn get_result(&mut self, sp: Span) -> Result<RValue> {
        match self.result.take() {
            Some(rv) => Ok(rv),
            None => bug!(sp, "{}: result retrieved while not set", self.ctx.path),
        }
    }

    /// Obtain the result as a place, spilling to a temporary if needed.
    pub fn get_result_in_lvalue(&mut self, sp: Span, ty: &TypeRef) -> Result<LValue> {
        let rv = self.get_result(sp)?;
        self.lvalue_or_temp(sp, ty, rv)
    }

    /// Obtain the result as an operand, avoiding a temporary for constants
    /// and borrows. Moves are marked by whoever consumes the operand.
    pub fn get_result_in_param(&mut self, sp: Span, ty: &TypeRef) -> Result<Param> {
        let rv = self.get_result(sp)?;
        Ok(match rv {
            RValue::Constant(c) => Param::Constant(c),
            RValue::Use(lv) => Param::LValue(lv),
            RValue::Borrow { kind, val } => Param::Borrow { kind, val },
            other => Param::LValue(self.lvalue_or_temp(sp, ty, other)?),
        })
    }

    /// The result must already be a place.
    pub fn get_result_unwrap_lvalue(&mut self, sp: Span) -> Result<LValue> {
        match self.get_result(sp)? {
            RValue::Use(lv) => Ok(lv),
            other => bug!(sp, "{}: result {:?} is not a place", self.ctx.path, other),
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn push_stmt(&mut self, sp: Span, stmt: Statement) -> Result<()> {
        if !self.block_active {
            bug!(sp, "{}: statement pushed with no active block", self.ctx.path);
        }
        self.output.blocks[self.current_block].statements.push(stmt);
        Ok(())
    }

    /// Push an assignment, marking moved sources and the initialised
    /// destination.
    pub fn push_stmt_assign(&mut self, sp: Span, dst: LValue, src: RValue) -> Result<()> {
        match &src {
            RValue::Use(lv) => self.moved_lvalue(sp, lv)?,
            RValue::BinOp { val_l, val_r, .. } => {
                self.moved_param(sp, val_l)?;
                self.moved_param(sp, val_r)?;
            }
            RValue::UniOp { val, .. } => self.moved_lvalue(sp, val)?,
            RValue::SizedArray { val, .. } => self.moved_param(sp, val)?,
            RValue::MakeDst { ptr_val, meta_val } => {
                self.moved_param(sp, ptr_val)?;
                self.moved_param(sp, meta_val)?;
            }
            RValue::UnionVariant { val, .. } => self.moved_param(sp, val)?,
            RValue::Tuple { vals } | RValue::Array { vals } | RValue::EnumVariant { vals, .. } | RValue::Struct { vals, .. } => {
                for v in vals {
                    self.moved_param(sp, v)?;
                }
            }
            RValue::Constant(_)
            | RValue::Borrow { .. }
            | RValue::Cast { .. }
            | RValue::DstMeta { .. }
            | RValue::DstPtr { .. } => {}
        }
        self.mark_value_assigned(sp, &dst)?;
        self.push_stmt(sp, Statement::Assign { dst, src })
    }

    pub fn push_stmt_drop(&mut self, sp: Span, kind: DropKind, slot: LValue, flag: Option<FlagId>) -> Result<()> {
        self.push_stmt(sp, Statement::Drop { kind, slot, flag_idx: flag })
    }

    pub fn push_stmt_set_dropflag(&mut self, sp: Span, idx: FlagId, new_val: bool, other: Option<FlagId>) -> Result<()> {
        self.push_stmt(sp, Statement::SetDropFlag { idx, new_val, other })
    }

    pub fn push_stmt_other(&mut self, sp: Span, stmt: Statement) -> Result<()> {
        self.push_stmt(sp, stmt)
    }

    /// Record that the value at `lv` was consumed. Copy types are untouched;
    /// moving a bare local transitions it to `Moved`.
    pub fn moved_lvalue(&mut self, sp: Span, lv: &LValue) -> Result<()> {
        if self.lvalue_is_copy(lv)? {
            return Ok(());
        }
        if let Some(id) = lv.as_local() {
            match self.get_state(id) {
                VarState::Init | VarState::MaybeMoved | VarState::Uninit => {}
                st @ (VarState::Moved | VarState::Dropped) => {
                    bug!(sp, "{}: use of {} local _{}", self.ctx.path, st, id.0)
                }
            }
            self.set_state(sp, id, VarState::Moved)?;
            return Ok(());
        }
        // Moves out of projections leave the root state untouched; the
        // value-state checker treats locals whole. The one tracked case is
        // the full pointee of an owned box moving out: the box stays live
        // but its eventual drop only frees the allocation.
        if let Root::Local(id) = lv.root {
            if lv.wrappers[..] == [Wrapper::Deref] {
                let root_ty = self.ctx.lvalue_type(&self.output, &LValue::new_local(id))?;
                if self.ctx.resolve.is_box(&root_ty) {
                    self.moved_out_boxes.insert(id);
                }
            }
        }
        Ok(())
    }

    pub fn moved_param(&mut self, sp: Span, p: &Param) -> Result<()> {
        if let Param::LValue(lv) = p {
            self.moved_lvalue(sp, lv)?;
        }
        Ok(())
    }

    fn mark_value_assigned(&mut self, sp: Span, dst: &LValue) -> Result<()> {
        if let Some(id) = dst.as_local() {
            if self.get_state(id) == VarState::Dropped {
                bug!(sp, "{}: assignment to dropped local _{}", self.ctx.path, id.0);
            }
            self.moved_out_boxes.remove(&id);
            self.set_state(sp, id, VarState::Init)?;
            return Ok(());
        }
        // Writing the pointee back re-arms a full drop.
        if let Root::Local(id) = dst.root {
            if dst.wrappers[..] == [Wrapper::Deref] {
                self.moved_out_boxes.remove(&id);
            }
        }
        Ok(())
    }

    fn lvalue_is_copy(&self, lv: &LValue) -> Result<bool> {
        let ty = self.ctx.lvalue_type(&self.output, lv)?;
        Ok(self.ctx.resolve.type_is_copy(&ty))
    }

    // ------------------------------------------------------------------
    // Variable states
    // ------------------------------------------------------------------

    pub fn get_state(&self, id: LocalId) -> VarState {
        for &scope_idx in self.scope_stack.iter().rev() {
            if let ScopeType::Split { arms } = &self.scopes[scope_idx].data {
                if let Some(arm) = arms.last() {
                    if let Some(&st) = arm.states.get(&id) {
                        return st;
                    }
                }
            }
        }
        self.states[id.index()]
    }

    /// Record a state change and keep the local's drop flag (if any) in
    /// sync with a statement in the current block.
    fn set_state(&mut self, sp: Span, id: LocalId, st: VarState) -> Result<()> {
        if self.block_active {
            if let Some(&flag) = self.flags.get(&id) {
                match st {
                    VarState::Init => self.push_stmt_set_dropflag(sp, flag, true, None)?,
                    VarState::Moved | VarState::Dropped => {
                        self.push_stmt_set_dropflag(sp, flag, false, None)?
                    }
                    _ => {}
                }
            }
        }
        self.record_state(id, st);
        Ok(())
    }

    /// State bookkeeping only; no flag statements. Used when merging scope
    /// arms, where the per-path flag updates already happened.
    fn record_state(&mut self, id: LocalId, st: VarState) {
        for &scope_idx in self.scope_stack.clone().iter().rev() {
            if let ScopeType::Split { arms } = &mut self.scopes[scope_idx].data {
                if let Some(arm) = arms.last_mut() {
                    arm.states.insert(id, st);
                    return;
                }
            }
        }
        self.states[id.index()] = st;
    }

    /// The drop flag for a conditionally-initialised local, allocated on
    /// first demand. The initial value mirrors the state outside the split.
    pub fn get_drop_flag(&mut self, id: LocalId) -> FlagId {
        if let Some(&flag) = self.flags.get(&id) {
            return flag;
        }
        let initial = self.get_state(id) == VarState::Init;
        let flag = self.output.new_drop_flag(initial);
        self.flags.insert(id, flag);
        flag
    }

    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    pub fn block_active(&self) -> bool {
        self.block_active
    }

    pub fn current_block(&self) -> BlockId {
        self.current_block
    }

    pub fn set_cur_block(&mut self, bb: BlockId) {
        debug_assert!(!self.block_active, "switching blocks while one is active");
        debug_assert!(matches!(self.output.blocks[bb].terminator, Terminator::Incomplete));
        self.current_block = bb;
        self.block_active = true;
    }

    /// Stop emitting into the current block without terminating it.
    pub fn pause_cur_block(&mut self) -> BlockId {
        debug_assert!(self.block_active);
        self.block_active = false;
        self.current_block
    }

    pub fn end_block(&mut self, term: Terminator) {
        debug_assert!(self.block_active, "terminating with no active block");
        self.output.blocks[self.current_block].terminator = term;
        self.block_active = false;
    }

    /// Allocate a block and jump to it from the current one.
    pub fn new_bb_linked(&mut self) -> BlockId {
        let bb = self.output.new_block();
        self.end_block(Terminator::Goto(bb));
        self.set_cur_block(bb);
        bb
    }

    pub fn new_bb_unlinked(&mut self) -> BlockId {
        self.output.new_block()
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    fn push_scope(&mut self, data: ScopeType) -> ScopeHandle {
        let idx = self.scopes.len();
        self.scopes.push(ScopeDef { complete: false, data });
        self.scope_stack.push(idx);
        ScopeHandle { idx }
    }

    pub fn new_scope_var(&mut self) -> ScopeHandle {
        self.push_scope(ScopeType::Variables { vars: Vec::new() })
    }

    pub fn new_scope_temp(&mut self) -> ScopeHandle {
        self.push_scope(ScopeType::Temporaries { temporaries: Vec::new() })
    }

    pub fn new_scope_split(&mut self) -> ScopeHandle {
        self.push_scope(ScopeType::Split { arms: vec![SplitArm::default()] })
    }

    pub fn new_scope_loop(
        &mut self,
        label: Option<Symbol>,
        head: BlockId,
        next: BlockId,
        result: Option<LocalId>,
    ) -> ScopeHandle {
        self.push_scope(ScopeType::Loop { label, head, next, result })
    }

    /// Handle of the outermost (function) scope, the target of `return`.
    pub fn fcn_scope(&self) -> ScopeHandle {
        ScopeHandle { idx: 0 }
    }

    /// Record that `dst` now holds a value (used for call return slots).
    pub fn mark_assigned(&mut self, sp: Span, dst: &LValue) -> Result<()> {
        self.mark_value_assigned(sp, dst)
    }

    /// Register a user variable in the innermost variables scope.
    pub fn define_variable(&mut self, sp: Span, id: LocalId) -> Result<()> {
        for &scope_idx in self.scope_stack.iter().rev() {
            if let ScopeType::Variables { vars } = &mut self.scopes[scope_idx].data {
                if !vars.contains(&id) {
                    vars.push(id);
                }
                return Ok(());
            }
        }
        bug!(sp, "{}: no variables scope open for _{}", self.ctx.path, id.0)
    }

    /// The `break`/`continue` targets of the innermost (or labelled) loop:
    /// `(scope, head, next, break-value slot)`.
    pub fn loop_targets(&self, label: Option<Symbol>) -> Option<(ScopeHandle, BlockId, BlockId, Option<LocalId>)> {
        for &scope_idx in self.scope_stack.iter().rev() {
            if let ScopeType::Loop { label: l, head, next, result } = &self.scopes[scope_idx].data {
                if label.is_none() || label == *l {
                    return Some((ScopeHandle { idx: scope_idx }, *head, *next, *result));
                }
            }
        }
        None
    }

    /// Close a scope: emit its drops and merge split-arm states outward.
    pub fn terminate_scope(&mut self, sp: Span, handle: ScopeHandle) -> Result<()> {
        let Some(&top) = self.scope_stack.last() else {
            bug!(sp, "{}: scope stack empty", self.ctx.path);
        };
        if top != handle.idx {
            bug!(sp, "{}: out-of-order scope termination", self.ctx.path);
        }
        if self.block_active {
            self.drop_scope_values(sp, handle.idx)?;
        }
        self.scope_stack.pop();
        self.complete_scope(sp, handle.idx)?;
        Ok(())
    }

    /// Emit the drops for every scope from the innermost up to and including
    /// `handle`'s, without popping any of them. Used for `return`, `break`,
    /// and `continue`.
    pub fn terminate_scope_early(&mut self, sp: Span, handle: &ScopeHandle) -> Result<()> {
        let mut found = false;
        for &scope_idx in self.scope_stack.clone().iter().rev() {
            // Mark intervening split arms as early-terminated so the merge
            // ignores this path.
            if let ScopeType::Split { arms } = &mut self.scopes[scope_idx].data {
                if let Some(arm) = arms.last_mut() {
                    arm.has_early_terminated = true;
                }
            }
            self.drop_scope_values(sp, scope_idx)?;
            if scope_idx == handle.idx {
                found = true;
                break;
            }
        }
        if !found {
            bug!(sp, "{}: early-terminated scope not on the stack", self.ctx.path);
        }
        Ok(())
    }

    /// Finish the current arm of a split scope and open the next one.
    pub fn end_split_arm(&mut self, sp: Span, handle: &ScopeHandle, reachable: bool) -> Result<()> {
        let ScopeType::Split { arms } = &mut self.scopes[handle.idx].data else {
            bug!(sp, "{}: end_split_arm on a non-split scope", self.ctx.path);
        };
        let arm = arms.last_mut().expect("split scope always has an open arm");
        if !reachable {
            arm.always_early_terminated = true;
        }
        arms.push(SplitArm::default());
        Ok(())
    }

    fn drop_scope_values(&mut self, sp: Span, scope_idx: usize) -> Result<()> {
        let slots: Vec<LocalId> = match &self.scopes[scope_idx].data {
            ScopeType::Variables { vars } => vars.clone(),
            ScopeType::Temporaries { temporaries } => temporaries.clone(),
            ScopeType::Split { .. } | ScopeType::Loop { .. } => return Ok(()),
        };
        for &id in slots.iter().rev() {
            let lv = LValue::new_local(id);
            let kind = if self.moved_out_boxes.contains(&id) {
                DropKind::Shallow
            } else {
                DropKind::Deep
            };
            match self.get_state(id) {
                VarState::Init => {
                    if !self.lvalue_is_copy(&lv)? {
                        self.push_stmt_drop(sp, kind, lv, None)?;
                    }
                    self.set_state(sp, id, VarState::Dropped)?;
                }
                VarState::MaybeMoved => {
                    if !self.lvalue_is_copy(&lv)? {
                        let flag = self.get_drop_flag(id);
                        self.push_stmt_drop(sp, kind, lv, Some(flag))?;
                    }
                    self.set_state(sp, id, VarState::Dropped)?;
                }
                VarState::Moved | VarState::Uninit | VarState::Dropped => {}
            }
        }
        if !slots.is_empty() {
            if let ScopeType::Variables { .. } = self.scopes[scope_idx].data {
                self.push_stmt(sp, Statement::ScopeEnd { slots })?;
            }
        }
        Ok(())
    }

    fn complete_scope(&mut self, _sp: Span, scope_idx: usize) -> Result<()> {
        self.scopes[scope_idx].complete = true;
        let ScopeType::Split { arms } = &mut self.scopes[scope_idx].data else {
            return Ok(());
        };
        let arms = std::mem::take(arms);

        // Merge the per-arm states; arms that always exited early do not
        // contribute. The scope is already off the stack, so `get_state`
        // yields the state surrounding the split.
        let live_arms: Vec<&SplitArm> = arms.iter().filter(|a| !a.always_early_terminated).collect();
        let mut touched: Vec<LocalId> = live_arms
            .iter()
            .flat_map(|a| a.states.keys().copied())
            .collect();
        touched.sort_unstable();
        touched.dedup();

        let merged: Vec<(LocalId, VarState)> = touched
            .into_iter()
            .map(|id| {
                let outer = self.get_state(id);
                let mut acc: Option<VarState> = None;
                for arm in &live_arms {
                    let st = arm.states.get(&id).copied().unwrap_or(outer);
                    acc = Some(match acc {
                        None => st,
                        Some(prev) => merge_states(prev, st),
                    });
                }
                (id, acc.unwrap_or(outer))
            })
            .collect();

        for (id, st) in merged {
            if st == VarState::MaybeMoved {
                // Conditional initialisation needs a flag for the eventual
                // guarded drop.
                self.get_drop_flag(id);
            }
            self.record_state(id, st);
        }
        Ok(())
    }
}

/// Pairwise merge of two arms' states.
fn merge_states(a: VarState, b: VarState) -> VarState {
    use VarState::*;
    match (a, b) {
        (x, y) if x == y => x,
        // One path initialised, the other did not (or lost) the value.
        (Uninit, _) | (_, Uninit) => MaybeMoved,
        (Init, Moved) | (Moved, Init) => MaybeMoved,
        (Init, Dropped) | (Dropped, Init) => MaybeMoved,
        (MaybeMoved, _) | (_, MaybeMoved) => MaybeMoved,
        (Moved, Dropped) | (Dropped, Moved) => Moved,
        _ => MaybeMoved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rillc_hir::{Crate, GenericPath, Pattern, PathParams, SimplePath, Struct};

    #[test]
    fn state_merge_table() {
        use VarState::*;
        assert_eq!(merge_states(Init, Init), Init);
        assert_eq!(merge_states(Moved, Moved), Moved);
        assert_eq!(merge_states(Init, Moved), MaybeMoved);
        assert_eq!(merge_states(Uninit, Init), MaybeMoved);
        assert_eq!(merge_states(MaybeMoved, Init), MaybeMoved);
    }

    /// Moving the pointee out of an owned box leaves only the allocation,
    /// so the box's scope-exit drop must be shallow.
    #[test]
    fn moved_out_box_drops_shallow() {
        let mut krate = Crate::new();
        let box_path = SimplePath::from_str("test::Boxed");
        krate.structs.insert(box_path.clone(), Struct::default());
        krate.structs.insert(SimplePath::from_str("test::Payload"), Struct::default());
        krate.box_path = Some(box_path.clone());

        let payload_ty = TypeRef::path(GenericPath::plain(SimplePath::from_str("test::Payload")));
        let box_ty = TypeRef::path(GenericPath::new(box_path, PathParams::new(vec![payload_ty.clone()])));

        let resolve: crate::Resolve<'_> = crate::Resolve::new(&krate);
        let path = SimplePath::from_str("test::take_out");
        let ret_ty = TypeRef::unit();
        let args = [(Pattern::any(Span::DUMMY), box_ty.clone())];
        let ctx = FnContext::new(&resolve, &path, &args, &ret_ty);

        let mut builder = MirBuilder::new(ctx, &[box_ty]);
        builder.define_variable(Span::DUMMY, LocalId(0)).unwrap();
        builder
            .push_stmt_assign(
                Span::DUMMY,
                LValue::new_local(LocalId(0)),
                RValue::Use(LValue::new_argument(0)),
            )
            .unwrap();

        // `let payload = *boxed;`
        let dst = builder.new_temporary(payload_ty);
        builder
            .push_stmt_assign(
                Span::DUMMY,
                dst.clone(),
                RValue::Use(LValue::new_local(LocalId(0)).deref()),
            )
            .unwrap();

        let scope = builder.fcn_scope();
        builder.terminate_scope(Span::DUMMY, scope).unwrap();

        let drops: Vec<(DropKind, LValue)> = builder
            .fcn()
            .blocks
            .iter()
            .flat_map(|b| b.statements.iter())
            .filter_map(|s| match s {
                Statement::Drop { kind, slot, .. } => Some((*kind, slot.clone())),
                _ => None,
            })
            .collect();
        assert!(
            drops.contains(&(DropKind::Shallow, LValue::new_local(LocalId(0)))),
            "emptied box should drop shallow: {:?}",
            drops
        );
        assert!(
            drops.contains(&(DropKind::Deep, dst)),
            "the moved-out payload still drops fully"
        );
    }
}
