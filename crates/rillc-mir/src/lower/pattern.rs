//! Pattern-match compilation.
//!
//! Every arm's patterns are flattened into an ordered list of rules, one per
//! tested column of the scrutinee (depth-first over the type). Two code
//! generation strategies exist:
//!
//! - SIMPLE: a linear chain of test blocks, one per arm pattern, each
//!   falling through to the next on failure. Always correct; required when
//!   any arm has a guard (a shared decision tree could reorder observable
//!   guard effects) and used for value kinds the tree does not model.
//! - DECISION TREE: a trie keyed on one column per node, dispatching by
//!   value or variant, with default edges inherited from ancestors.

use super::expr::{literal_to_constant, ExprLowerer};
use crate::mir::{
    BinOp, BlockId, Constant, LValue, Param, RValue, SwitchValues, Terminator, Wrapper,
};
use crate::Result;
use rillc_hir as hir;
use rillc_hir::{CoreType, Type, TypeRef};
use rillc_util::Span;

/// One test over one column of the scrutinee.
#[derive(Clone, Debug)]
struct PatternRule {
    /// The place this rule examines (absolute, rooted at the scrutinee).
    lv: LValue,
    kind: RuleKind,
}

#[derive(Clone, Debug)]
enum RuleKind {
    /// Matches anything.
    Any,
    Bool(bool),
    Value(Constant),
    /// Inclusive range.
    ValueRange(Constant, Constant),
    Variant {
        index: u32,
        variant_count: usize,
        sub_rules: Vec<PatternRule>,
    },
}

/// The rules of one `(arm, pattern)` alternative.
struct PatternRuleset {
    arm_idx: usize,
    rules: Vec<PatternRule>,
}

pub(super) fn lower_match(
    lowerer: &mut ExprLowerer<'_, '_>,
    node: &hir::Expr,
    value: &hir::Expr,
    arms: &[hir::MatchArm],
) -> Result<()> {
    let sp = node.span;
    if let Type::TraitObject(_) = value.ty.kind() {
        user_err!(sp, "cannot match on a trait object");
    }

    let Some(match_val) = lowerer.lower_to_lvalue(value)? else { return Ok(()) };

    // Irrefutable single-arm matches bypass the whole machinery: no switch,
    // no split scope.
    if arms.len() == 1 && arms[0].guard.is_none() && arms[0].patterns.len() == 1 && !arms[0].patterns[0].is_refutable() {
        let arm = &arms[0];
        lowerer.define_vars_from(&arm.patterns[0])?;
        lowerer.destructure_from(sp, &arm.patterns[0], match_val, true)?;
        return lowerer.lower_expr(&arm.body);
    }

    // Flatten every arm pattern into a ruleset.
    let mut rulesets = Vec::new();
    for (arm_idx, arm) in arms.iter().enumerate() {
        for pat in &arm.patterns {
            let mut rules = Vec::new();
            append_rules(lowerer, &mut rules, pat, &value.ty, match_val.clone())?;
            rulesets.push((PatternRuleset { arm_idx, rules }, pat));
        }
    }

    let have_guards = arms.iter().any(|a| a.guard.is_some());
    let tree_capable = rulesets.iter().all(|(rs, _)| rs.rules.iter().all(rule_tree_capable));

    let res = if !node.ty.is_unit() && !node.ty.is_diverge() {
        Some(lowerer.builder.new_temporary(node.ty.clone()))
    } else {
        None
    };
    let next_bb = lowerer.builder.new_bb_unlinked();
    let decision_point = lowerer.builder.pause_cur_block();

    let scope = lowerer.builder.new_scope_split();

    // Generate each arm's body block up front; tests reference them.
    let mut arm_body_bbs = Vec::with_capacity(arms.len());
    for arm in arms {
        let body_bb = lowerer.builder.new_bb_unlinked();
        arm_body_bbs.push(body_bb);
        lowerer.builder.set_cur_block(body_bb);
        lowerer.lower_expr(&arm.body)?;
        let reachable = lowerer.builder.block_active() && lowerer.builder.has_result();
        if reachable {
            lowerer.assign_arm_result(arm.body.span, &res)?;
            lowerer.builder.end_block(Terminator::Goto(next_bb));
        } else if lowerer.builder.block_active() {
            // Unreachable continuation of an arm that diverged.
            lowerer.builder.end_block(Terminator::Diverge);
        }
        lowerer.builder.end_split_arm(sp, &scope, reachable)?;
    }

    let entry = if have_guards || !tree_capable {
        generate_simple(lowerer, sp, arms, &rulesets, &match_val, &arm_body_bbs)?
    } else {
        generate_tree(lowerer, sp, &rulesets, &match_val, &arm_body_bbs)?
    };

    lowerer.builder.set_cur_block(decision_point);
    lowerer.builder.end_block(Terminator::Goto(entry));

    lowerer.builder.terminate_scope(sp, scope)?;
    lowerer.builder.set_cur_block(next_bb);

    match res {
        Some(res) => lowerer.builder.set_result(sp, RValue::Use(res)),
        None if node.ty.is_unit() => lowerer.builder.set_result(sp, RValue::Tuple { vals: Vec::new() }),
        None => Ok(()),
    }
}

fn rule_tree_capable(rule: &PatternRule) -> bool {
    match &rule.kind {
        RuleKind::Any | RuleKind::Bool(_) => true,
        RuleKind::Value(c) | RuleKind::ValueRange(c, _) => !matches!(
            c,
            Constant::Float { .. } | Constant::StaticString(_) | Constant::Bytes(_)
        ),
        RuleKind::Variant { sub_rules, .. } => sub_rules.iter().all(rule_tree_capable),
    }
}

// ---------------------------------------------------------------------------
// Rule extraction
// ---------------------------------------------------------------------------

/// Flatten `pat` (over a value of type `ty` at `lv`) into `rules`,
/// depth-first left-to-right over the type.
fn append_rules(
    lowerer: &ExprLowerer<'_, '_>,
    rules: &mut Vec<PatternRule>,
    pat: &hir::Pattern,
    ty: &TypeRef,
    lv: LValue,
) -> Result<()> {
    let sp = pat.span;
    // Bindings test whatever their subpattern tests.
    if let hir::PatternKind::Binding { sub, .. } = &pat.kind {
        return match sub {
            Some(sub) => append_rules(lowerer, rules, sub, ty, lv),
            None => {
                rules.push(PatternRule { lv, kind: RuleKind::Any });
                Ok(())
            }
        };
    }

    match ty.kind() {
        Type::Tuple(items) => {
            let subs: Vec<&hir::Pattern> = match &pat.kind {
                hir::PatternKind::Any => Vec::new(),
                hir::PatternKind::Tuple(subs) => subs.iter().collect(),
                _ => user_err!(sp, "invalid pattern for a tuple"),
            };
            for (i, item_ty) in items.iter().enumerate() {
                let field_lv = lv.clone_wrapped([Wrapper::Field(i as u32)]);
                match subs.get(i) {
                    Some(sub) => append_rules(lowerer, rules, sub, item_ty, field_lv)?,
                    None => rules.push(PatternRule { lv: field_lv, kind: RuleKind::Any }),
                }
            }
            Ok(())
        }
        Type::Borrow(_, _, inner) | Type::Pointer(_, inner) => match &pat.kind {
            hir::PatternKind::Any => {
                rules.push(PatternRule { lv, kind: RuleKind::Any });
                Ok(())
            }
            hir::PatternKind::Ref { sub } => append_rules(lowerer, rules, sub, inner, lv.deref()),
            // Literal patterns on `&str` and `&[u8]` compare through the ref.
            hir::PatternKind::Value { .. } => append_rules(lowerer, rules, pat, inner, lv.deref()),
            _ => user_err!(sp, "invalid pattern for a reference"),
        },
        Type::Path(gp) => {
            if let Some(s) = lowerer.builder.resolve().struct_by_path(&gp.path) {
                let subs: Vec<&hir::Pattern> = match &pat.kind {
                    hir::PatternKind::Any => Vec::new(),
                    hir::PatternKind::Struct { sub, .. } => sub.iter().collect(),
                    _ => user_err!(sp, "invalid pattern for struct {}", gp.path),
                };
                let state = hir::MonomorphState::with_impl_params(&gp.params);
                for (i, (_, fld_ty)) in s.fields.iter().enumerate() {
                    let fld_ty = state
                        .monomorph_type(fld_ty)
                        .map_err(|e| crate::MirError::bug(sp, e.to_string()))?;
                    let field_lv = lv.clone_wrapped([Wrapper::Field(i as u32)]);
                    match subs.get(i) {
                        Some(sub) => append_rules(lowerer, rules, sub, &fld_ty, field_lv)?,
                        None => rules.push(PatternRule { lv: field_lv, kind: RuleKind::Any }),
                    }
                }
                Ok(())
            } else if let Some(e) = lowerer.builder.resolve().enum_by_path(&gp.path) {
                match &pat.kind {
                    hir::PatternKind::Any => {
                        rules.push(PatternRule { lv, kind: RuleKind::Any });
                        Ok(())
                    }
                    hir::PatternKind::Variant { index, sub, .. } => {
                        let variant = &e.variants[*index as usize];
                        let state = hir::MonomorphState::with_impl_params(&gp.params);
                        let base = lv.clone_wrapped([Wrapper::Downcast(*index)]);
                        let mut sub_rules = Vec::new();
                        for (i, fld_ty) in variant.fields.iter().enumerate() {
                            let fld_ty = state
                                .monomorph_type(fld_ty)
                                .map_err(|err| crate::MirError::bug(sp, err.to_string()))?;
                            let field_lv = base.clone_wrapped([Wrapper::Field(i as u32)]);
                            match sub.get(i) {
                                Some(s) => append_rules(lowerer, &mut sub_rules, s, &fld_ty, field_lv)?,
                                None => sub_rules.push(PatternRule { lv: field_lv, kind: RuleKind::Any }),
                            }
                        }
                        rules.push(PatternRule {
                            lv,
                            kind: RuleKind::Variant {
                                index: *index,
                                variant_count: e.variants.len(),
                                sub_rules,
                            },
                        });
                        Ok(())
                    }
                    _ => user_err!(sp, "invalid pattern for enum {}", gp.path),
                }
            } else {
                match &pat.kind {
                    hir::PatternKind::Any => {
                        rules.push(PatternRule { lv, kind: RuleKind::Any });
                        Ok(())
                    }
                    _ => user_err!(sp, "cannot match on {}", gp.path),
                }
            }
        }
        Type::Primitive(ct) => {
            let kind = match (&pat.kind, ct) {
                (hir::PatternKind::Any, _) => RuleKind::Any,
                (hir::PatternKind::Value { lit: hir::Literal::Bool(b) }, CoreType::Bool) => {
                    RuleKind::Bool(*b)
                }
                (hir::PatternKind::Value { lit }, _) => RuleKind::Value(literal_to_constant(lit)),
                (hir::PatternKind::Range { start, end }, _) => {
                    RuleKind::ValueRange(literal_to_constant(start), literal_to_constant(end))
                }
                _ => user_err!(sp, "invalid pattern for {}", ct),
            };
            rules.push(PatternRule { lv, kind });
            Ok(())
        }
        Type::TraitObject(_) => user_err!(sp, "cannot match on a trait object"),
        _ => match &pat.kind {
            hir::PatternKind::Any => {
                rules.push(PatternRule { lv, kind: RuleKind::Any });
                Ok(())
            }
            _ => user_err!(sp, "unsupported pattern for type {}", ty),
        },
    }
}

// ---------------------------------------------------------------------------
// Simple strategy
// ---------------------------------------------------------------------------

/// Linear per-pattern test chains. Returns the entry block.
fn generate_simple(
    lowerer: &mut ExprLowerer<'_, '_>,
    sp: Span,
    arms: &[hir::MatchArm],
    rulesets: &[(PatternRuleset, &hir::Pattern)],
    match_val: &LValue,
    arm_body_bbs: &[BlockId],
) -> Result<BlockId> {
    // Pre-allocate one entry block per alternative, plus the final failure
    // block (unreachable if the front-end proved exhaustiveness).
    let mut entries: Vec<BlockId> = (0..rulesets.len())
        .map(|_| lowerer.builder.new_bb_unlinked())
        .collect();
    let fail_bb = lowerer.builder.new_bb_unlinked();
    lowerer.builder.set_cur_block(fail_bb);
    lowerer.builder.end_block(Terminator::Diverge);
    entries.push(fail_bb);

    // Guard failure skips the remaining alternatives of the same arm.
    let arm_fail_target = |k: usize| -> BlockId {
        let arm = rulesets[k].0.arm_idx;
        let mut j = k + 1;
        while j < rulesets.len() && rulesets[j].0.arm_idx == arm {
            j += 1;
        }
        entries[j]
    };

    for (k, (ruleset, pat)) in rulesets.iter().enumerate() {
        let fail = entries[k + 1];
        lowerer.builder.set_cur_block(entries[k]);
        for rule in &ruleset.rules {
            generate_rule_tests(lowerer, sp, rule, fail)?;
        }
        // All tests passed: bind, check the guard, run the body.
        lowerer.define_vars_from(pat)?;
        lowerer.destructure_from(sp, pat, match_val.clone(), true)?;
        let arm = &arms[ruleset.arm_idx];
        if let Some(guard) = &arm.guard {
            let Some(guard_lv) = lowerer.lower_to_lvalue(guard)? else {
                if lowerer.builder.block_active() {
                    lowerer.builder.end_block(Terminator::Diverge);
                }
                continue;
            };
            let body = arm_body_bbs[ruleset.arm_idx];
            let on_fail = arm_fail_target(k);
            lowerer.builder.end_block(Terminator::If {
                cond: guard_lv,
                bb_true: body,
                bb_false: on_fail,
            });
        } else {
            lowerer.builder.end_block(Terminator::Goto(arm_body_bbs[ruleset.arm_idx]));
        }
    }

    Ok(entries[0])
}

/// Emit the tests for one rule into the current block, branching to `fail`
/// on mismatch and continuing in a fresh block on success.
fn generate_rule_tests(
    lowerer: &mut ExprLowerer<'_, '_>,
    sp: Span,
    rule: &PatternRule,
    fail: BlockId,
) -> Result<()> {
    match &rule.kind {
        RuleKind::Any => Ok(()),
        RuleKind::Bool(b) => {
            let ok = lowerer.builder.new_bb_unlinked();
            let (bb_true, bb_false) = if *b { (ok, fail) } else { (fail, ok) };
            lowerer.builder.end_block(Terminator::If { cond: rule.lv.clone(), bb_true, bb_false });
            lowerer.builder.set_cur_block(ok);
            Ok(())
        }
        RuleKind::Value(c) => match c {
            Constant::StaticString(s) => {
                let ok = lowerer.builder.new_bb_unlinked();
                lowerer.builder.end_block(Terminator::SwitchValue {
                    val: rule.lv.clone(),
                    def_target: fail,
                    targets: vec![ok],
                    values: SwitchValues::String(vec![s.clone()]),
                });
                lowerer.builder.set_cur_block(ok);
                Ok(())
            }
            Constant::Bytes(b) => {
                let ok = lowerer.builder.new_bb_unlinked();
                lowerer.builder.end_block(Terminator::SwitchValue {
                    val: rule.lv.clone(),
                    def_target: fail,
                    targets: vec![ok],
                    values: SwitchValues::Bytes(vec![b.clone()]),
                });
                lowerer.builder.set_cur_block(ok);
                Ok(())
            }
            _ => emit_compare(lowerer, sp, &rule.lv, BinOp::Eq, c.clone(), fail),
        },
        RuleKind::ValueRange(lo, hi) => {
            emit_compare(lowerer, sp, &rule.lv, BinOp::Ge, lo.clone(), fail)?;
            emit_compare(lowerer, sp, &rule.lv, BinOp::Le, hi.clone(), fail)
        }
        RuleKind::Variant { index, variant_count, sub_rules } => {
            let ok = lowerer.builder.new_bb_unlinked();
            let targets: Vec<BlockId> =
                (0..*variant_count).map(|i| if i == *index as usize { ok } else { fail }).collect();
            lowerer.builder.end_block(Terminator::Switch { val: rule.lv.clone(), targets });
            lowerer.builder.set_cur_block(ok);
            for sub in sub_rules {
                generate_rule_tests(lowerer, sp, sub, fail)?;
            }
            Ok(())
        }
    }
}

/// `if !(lv OP const) goto fail`
fn emit_compare(
    lowerer: &mut ExprLowerer<'_, '_>,
    sp: Span,
    lv: &LValue,
    op: BinOp,
    c: Constant,
    fail: BlockId,
) -> Result<()> {
    let cmp = lowerer.builder.new_temporary(TypeRef::bool_());
    lowerer.builder.push_stmt_assign(
        sp,
        cmp.clone(),
        RValue::BinOp { val_l: Param::LValue(lv.clone()), op, val_r: Param::Constant(c) },
    )?;
    let ok = lowerer.builder.new_bb_unlinked();
    lowerer.builder.end_block(Terminator::If { cond: cmp, bb_true: ok, bb_false: fail });
    lowerer.builder.set_cur_block(ok);
    Ok(())
}

// ---------------------------------------------------------------------------
// Decision tree
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Branch {
    Unset,
    /// Jump to this arm's destructure-and-run block.
    Terminal(usize),
    Subtree(Box<TreeNode>),
}

#[derive(Debug)]
enum NodeValues {
    Unset,
    Bool { false_branch: Branch, true_branch: Branch },
    Variant { count: usize, branches: Vec<(u32, Branch)> },
    Unsigned { ct: CoreType, entries: Vec<((u64, u64), Branch)> },
    Signed { ct: CoreType, entries: Vec<((i64, i64), Branch)> },
}

#[derive(Debug)]
struct TreeNode {
    /// Column this node examines; set when the first non-Any rule lands.
    lv: Option<LValue>,
    values: NodeValues,
    default: Branch,
}

impl TreeNode {
    fn new() -> Self {
        TreeNode { lv: None, values: NodeValues::Unset, default: Branch::Unset }
    }
}

/// Build and emit the decision tree. Returns the entry block.
fn generate_tree(
    lowerer: &mut ExprLowerer<'_, '_>,
    sp: Span,
    rulesets: &[(PatternRuleset, &hir::Pattern)],
    match_val: &LValue,
    arm_body_bbs: &[BlockId],
) -> Result<BlockId> {
    let mut root = TreeNode::new();
    for (k, (ruleset, _)) in rulesets.iter().enumerate() {
        populate(sp, &mut root, &ruleset.rules, k)?;
    }

    // Per-alternative landing block: destructure and enter the arm body.
    let mut landings = Vec::with_capacity(rulesets.len());
    for (ruleset, pat) in rulesets {
        let bb = lowerer.builder.new_bb_unlinked();
        lowerer.builder.set_cur_block(bb);
        lowerer.define_vars_from(pat)?;
        lowerer.destructure_from(sp, pat, match_val.clone(), true)?;
        lowerer.builder.end_block(Terminator::Goto(arm_body_bbs[ruleset.arm_idx]));
        landings.push(bb);
    }

    // Matches are exhaustive by the time they reach MIR; an unset default
    // can only be reached through compiler error, so it diverges.
    let diverge_bb = lowerer.builder.new_bb_unlinked();
    lowerer.builder.set_cur_block(diverge_bb);
    lowerer.builder.end_block(Terminator::Diverge);

    emit_tree(lowerer, sp, &root, &landings, diverge_bb)
}

/// Insert one ruleset into the trie. `rules` are consumed left to right;
/// earlier arms take priority, so existing terminals are never overwritten.
fn populate(sp: Span, node: &mut TreeNode, rules: &[PatternRule], arm_key: usize) -> Result<()> {
    let Some((rule, rest)) = rules.split_first() else {
        // Out of columns: this path matches.
        set_terminal(&mut node.default, arm_key);
        return Ok(());
    };

    match &rule.kind {
        RuleKind::Any => populate_branch(sp, &mut node.default, rest, arm_key),
        _ => {
            if node.lv.is_none() {
                node.lv = Some(rule.lv.clone());
            } else if node.lv.as_ref() != Some(&rule.lv) {
                bug!(sp, "decision tree column mismatch: {:?} vs {}", node.lv, rule.lv);
            }
            match &rule.kind {
                RuleKind::Bool(b) => {
                    if let NodeValues::Unset = node.values {
                        node.values = NodeValues::Bool { false_branch: Branch::Unset, true_branch: Branch::Unset };
                    }
                    let NodeValues::Bool { false_branch, true_branch } = &mut node.values else {
                        bug!(sp, "decision tree value-kind mismatch on {}", rule.lv);
                    };
                    let branch = if *b { true_branch } else { false_branch };
                    populate_branch(sp, branch, rest, arm_key)
                }
                RuleKind::Variant { index, variant_count, sub_rules } => {
                    if let NodeValues::Unset = node.values {
                        node.values = NodeValues::Variant { count: *variant_count, branches: Vec::new() };
                    }
                    let NodeValues::Variant { branches, .. } = &mut node.values else {
                        bug!(sp, "decision tree value-kind mismatch on {}", rule.lv);
                    };
                    let pos = match branches.iter().position(|(i, _)| i == index) {
                        Some(p) => p,
                        None => {
                            let p = branches.partition_point(|(i, _)| i < index);
                            branches.insert(p, (*index, Branch::Unset));
                            p
                        }
                    };
                    // The variant's columns continue ahead of the remaining
                    // top-level columns.
                    let mut chained: Vec<PatternRule> = sub_rules.clone();
                    chained.extend(rest.iter().cloned());
                    populate_branch(sp, &mut branches[pos].1, &chained, arm_key)
                }
                RuleKind::Value(c) | RuleKind::ValueRange(c, _) => {
                    let (lo, hi) = rule_range(sp, &rule.kind)?;
                    match (c, &mut node.values) {
                        (&Constant::Int { t, .. }, NodeValues::Unset) => {
                            node.values = NodeValues::Signed { ct: t, entries: Vec::new() };
                        }
                        (&Constant::Uint { t, .. }, NodeValues::Unset) => {
                            node.values = NodeValues::Unsigned { ct: t, entries: Vec::new() };
                        }
                        (_, NodeValues::Unset) => {
                            bug!(sp, "non-integer value rule in decision tree on {}", rule.lv);
                        }
                        _ => {}
                    }
                    match &mut node.values {
                        NodeValues::Unsigned { entries, .. } => {
                            let (lo, hi) = (lo as u64, hi as u64);
                            populate_range_entry(sp, entries, (lo, hi), rest, arm_key)
                        }
                        NodeValues::Signed { entries, .. } => {
                            populate_range_entry(sp, entries, (lo, hi), rest, arm_key)
                        }
                        _ => bug!(sp, "decision tree value-kind mismatch on {}", rule.lv),
                    }
                }
                RuleKind::Any => unreachable!(),
            }
        }
    }
}

fn rule_range(sp: Span, kind: &RuleKind) -> Result<(i64, i64)> {
    let value = |c: &Constant| -> Result<i64> {
        Ok(match c {
            Constant::Int { v, .. } => *v,
            Constant::Uint { v, .. } => *v as i64,
            _ => bug!(sp, "non-integer constant in decision tree"),
        })
    };
    Ok(match kind {
        RuleKind::Value(c) => {
            let v = value(c)?;
            (v, v)
        }
        RuleKind::ValueRange(lo, hi) => (value(lo)?, value(hi)?),
        _ => bug!(sp, "rule_range on a non-value rule"),
    })
}

fn populate_range_entry<K: Copy + Ord + std::fmt::Debug>(
    sp: Span,
    entries: &mut Vec<((K, K), Branch)>,
    key: (K, K),
    rest: &[PatternRule],
    arm_key: usize,
) -> Result<()> {
    if let Some(pos) = entries.iter().position(|(k, _)| *k == key) {
        return populate_branch(sp, &mut entries[pos].1, rest, arm_key);
    }
    // Overlapping (but not equal) ranges would make dispatch ambiguous;
    // the exhaustiveness checker upstream should have rejected them.
    if let Some(((lo, hi), _)) = entries.iter().find(|((lo, hi), _)| key.0 <= *hi && *lo <= key.1) {
        bug!(
            sp,
            "overlapping value ranges {:?}..={:?} and {:?}..={:?} in match lowering",
            key.0, key.1, lo, hi
        );
    }
    let pos = entries.partition_point(|((lo, _), _)| *lo < key.0);
    entries.insert(pos, (key, Branch::Unset));
    populate_branch(sp, &mut entries[pos].1, rest, arm_key)
}

fn populate_branch(sp: Span, branch: &mut Branch, rules: &[PatternRule], arm_key: usize) -> Result<()> {
    if rules.is_empty() {
        set_terminal(branch, arm_key);
        return Ok(());
    }
    match branch {
        Branch::Terminal(_) => Ok(()), // an earlier arm already claimed this path
        Branch::Subtree(sub) => populate(sp, sub, rules, arm_key),
        Branch::Unset => {
            let mut sub = TreeNode::new();
            populate(sp, &mut sub, rules, arm_key)?;
            *branch = Branch::Subtree(Box::new(sub));
            Ok(())
        }
    }
}

fn set_terminal(branch: &mut Branch, arm_key: usize) {
    if let Branch::Unset = branch {
        *branch = Branch::Terminal(arm_key);
    }
}

/// Emit a node (and its subtrees) as MIR, returning its entry block.
/// `default_bb` is the inherited default for unset edges.
fn emit_tree(
    lowerer: &mut ExprLowerer<'_, '_>,
    sp: Span,
    node: &TreeNode,
    landings: &[BlockId],
    default_bb: BlockId,
) -> Result<BlockId> {
    // Nodes with no tests collapse into their default edge.
    let default_bb = match &node.default {
        Branch::Unset => default_bb,
        other => emit_branch(lowerer, sp, other, landings, default_bb)?,
    };
    let Some(lv) = &node.lv else {
        return Ok(default_bb);
    };

    match &node.values {
        NodeValues::Unset => Ok(default_bb),
        NodeValues::Bool { false_branch, true_branch } => {
            let bb_true = emit_branch(lowerer, sp, true_branch, landings, default_bb)?;
            let bb_false = emit_branch(lowerer, sp, false_branch, landings, default_bb)?;
            let bb = lowerer.builder.new_bb_unlinked();
            lowerer.builder.set_cur_block(bb);
            lowerer.builder.end_block(Terminator::If { cond: lv.clone(), bb_true, bb_false });
            Ok(bb)
        }
        NodeValues::Variant { count, branches } => {
            let mut targets = vec![default_bb; *count];
            for (idx, branch) in branches {
                targets[*idx as usize] = emit_branch(lowerer, sp, branch, landings, default_bb)?;
            }
            let bb = lowerer.builder.new_bb_unlinked();
            lowerer.builder.set_cur_block(bb);
            lowerer.builder.end_block(Terminator::Switch { val: lv.clone(), targets });
            Ok(bb)
        }
        NodeValues::Unsigned { ct, entries } => {
            emit_int_dispatch(lowerer, sp, lv, entries, landings, default_bb, *ct, true)
        }
        NodeValues::Signed { ct, entries } => {
            emit_int_dispatch(lowerer, sp, lv, entries, landings, default_bb, *ct, false)
        }
    }
}

fn emit_branch(
    lowerer: &mut ExprLowerer<'_, '_>,
    sp: Span,
    branch: &Branch,
    landings: &[BlockId],
    default_bb: BlockId,
) -> Result<BlockId> {
    match branch {
        Branch::Unset => Ok(default_bb),
        Branch::Terminal(k) => Ok(landings[*k]),
        Branch::Subtree(sub) => emit_tree(lowerer, sp, sub, landings, default_bb),
    }
}

trait IntKey: Copy + Ord {
    fn as_i64(self) -> i64;
    fn as_u64(self) -> u64;
    fn min_value() -> Self;
    fn max_value() -> Self;
    fn succ(self) -> Option<Self>;
}

impl IntKey for u64 {
    fn as_i64(self) -> i64 {
        self as i64
    }
    fn as_u64(self) -> u64 {
        self
    }
    fn min_value() -> Self {
        0
    }
    fn max_value() -> Self {
        u64::MAX
    }
    fn succ(self) -> Option<Self> {
        self.checked_add(1)
    }
}

impl IntKey for i64 {
    fn as_i64(self) -> i64 {
        self
    }
    fn as_u64(self) -> u64 {
        self as u64
    }
    fn min_value() -> Self {
        i64::MIN
    }
    fn max_value() -> Self {
        i64::MAX
    }
    fn succ(self) -> Option<Self> {
        self.checked_add(1)
    }
}

/// Integer dispatch. Pure value lists become a `SwitchValue`; anything with
/// ranges becomes an ordered comparison chain, with redundant lower-bound
/// tests elided for sorted contiguous ranges.
#[allow(clippy::too_many_arguments)]
fn emit_int_dispatch<K: IntKey>(
    lowerer: &mut ExprLowerer<'_, '_>,
    sp: Span,
    lv: &LValue,
    entries: &[((K, K), Branch)],
    landings: &[BlockId],
    default_bb: BlockId,
    ct: CoreType,
    unsigned: bool,
) -> Result<BlockId> {
    let mk_const = |v: K| -> Constant {
        if unsigned {
            Constant::Uint { v: v.as_u64(), t: ct }
        } else {
            Constant::Int { v: v.as_i64(), t: ct }
        }
    };

    if entries.iter().all(|((lo, hi), _)| lo == hi) {
        let mut targets = Vec::with_capacity(entries.len());
        for (_, branch) in entries {
            targets.push(emit_branch(lowerer, sp, branch, landings, default_bb)?);
        }
        let values = if unsigned {
            SwitchValues::Unsigned(entries.iter().map(|((lo, _), _)| lo.as_u64()).collect())
        } else {
            SwitchValues::Signed(entries.iter().map(|((lo, _), _)| lo.as_i64()).collect())
        };
        let bb = lowerer.builder.new_bb_unlinked();
        lowerer.builder.set_cur_block(bb);
        lowerer.builder.end_block(Terminator::SwitchValue {
            val: lv.clone(),
            def_target: default_bb,
            targets,
            values,
        });
        return Ok(bb);
    }

    // Comparison chain, last entry first so each test knows its fall-through.
    let mut next = default_bb;
    for (i, ((lo, hi), branch)) in entries.iter().enumerate().rev() {
        let target = emit_branch(lowerer, sp, branch, landings, default_bb)?;
        let bb = lowerer.builder.new_bb_unlinked();
        lowerer.builder.set_cur_block(bb);

        // The lower bound is implied when it is the type minimum or when the
        // previous (sorted) range ends directly below this one: control only
        // arrives here after that range's test failed high.
        let prev_hi = if i > 0 { Some(entries[i - 1].0 .1) } else { None };
        let skip_lower = *lo == K::min_value() || prev_hi.and_then(IntKey::succ) == Some(*lo);
        let skip_upper = *hi == K::max_value();

        match (skip_lower, skip_upper) {
            (true, true) => {
                lowerer.builder.end_block(Terminator::Goto(target));
            }
            (true, false) => {
                let cmp = lowerer.builder.new_temporary(TypeRef::bool_());
                lowerer.builder.push_stmt_assign(
                    sp,
                    cmp.clone(),
                    RValue::BinOp {
                        val_l: Param::LValue(lv.clone()),
                        op: BinOp::Le,
                        val_r: Param::Constant(mk_const(*hi)),
                    },
                )?;
                lowerer.builder.end_block(Terminator::If { cond: cmp, bb_true: target, bb_false: next });
            }
            (false, skip_upper) => {
                let cmp = lowerer.builder.new_temporary(TypeRef::bool_());
                lowerer.builder.push_stmt_assign(
                    sp,
                    cmp.clone(),
                    RValue::BinOp {
                        val_l: Param::LValue(lv.clone()),
                        op: BinOp::Ge,
                        val_r: Param::Constant(mk_const(*lo)),
                    },
                )?;
                if skip_upper {
                    lowerer.builder.end_block(Terminator::If { cond: cmp, bb_true: target, bb_false: next });
                } else {
                    let upper_bb = lowerer.builder.new_bb_unlinked();
                    lowerer.builder.end_block(Terminator::If { cond: cmp, bb_true: upper_bb, bb_false: next });
                    lowerer.builder.set_cur_block(upper_bb);
                    let cmp2 = lowerer.builder.new_temporary(TypeRef::bool_());
                    lowerer.builder.push_stmt_assign(
                        sp,
                        cmp2.clone(),
                        RValue::BinOp {
                            val_l: Param::LValue(lv.clone()),
                            op: BinOp::Le,
                            val_r: Param::Constant(mk_const(*hi)),
                        },
                    )?;
                    lowerer.builder.end_block(Terminator::If { cond: cmp2, bb_true: target, bb_false: next });
                }
            }
        }
        next = bb;
    }
    Ok(next)
}
