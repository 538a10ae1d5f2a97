//! End-to-end tests over the full pipeline: lowering, validation, cleanup,
//! and optimisation against a small fixture crate.

use crate::dump::dump_to_string;
use crate::mir::*;
use crate::{Resolve, TransList};
use rillc_hir as hir;
use rillc_hir::{
    BorrowKind, ConstDef, CoreType, Crate, EncodedLiteral, Enum, FnSig, FunctionDef, GenericPath,
    LifetimeRef, PathParams, SimplePath, Struct, TraitDef, Type, TypeRef, Union, Variant,
};
use rillc_util::{Handler, Span, Symbol};

fn sp(s: &str) -> SimplePath {
    SimplePath::from_str(s)
}

fn u32_ty() -> TypeRef {
    TypeRef::primitive(CoreType::U32)
}

fn i32_ty() -> TypeRef {
    TypeRef::primitive(CoreType::I32)
}

fn expr(kind: hir::ExprKind, ty: TypeRef) -> hir::Expr {
    hir::Expr::new(kind, ty, Span::DUMMY)
}

fn pat(kind: hir::PatternKind) -> hir::Pattern {
    hir::Pattern::new(kind, Span::DUMMY)
}

fn binding(slot: u32, name: &str) -> hir::Pattern {
    pat(hir::PatternKind::Binding { slot, name: Symbol::intern(name), sub: None })
}

fn lit_u32(v: u64) -> hir::Expr {
    expr(hir::ExprKind::Literal(hir::Literal::Uint(v, CoreType::U32)), u32_ty())
}

/// A crate with a non-Copy struct, a copyable option enum, and a small trait
/// with a vtable.
fn fixture_crate() -> Crate {
    let mut krate = Crate::new();

    krate.structs.insert(
        sp("test::Buffer"),
        Struct { fields: vec![(Symbol::intern("data"), TypeRef::usize_())], ..Struct::default() },
    );

    krate.enums.insert(
        sp("test::Maybe"),
        Enum {
            variants: vec![
                Variant { name: Symbol::intern("Some"), fields: vec![u32_ty()], discriminant: None },
                Variant { name: Symbol::intern("None"), fields: Vec::new(), discriminant: None },
            ],
            is_copy: true,
            ..Enum::default()
        },
    );

    // A trait with one method at vtable slot 3 (three header fields first).
    let frob_sig = FnSig::new(
        vec![TypeRef::pointer(BorrowKind::Shared, TypeRef::unit())],
        TypeRef::unit(),
    );
    let mut methods = indexmap::IndexMap::new();
    methods.insert(Symbol::intern("frob"), frob_sig.clone());
    let mut vtable_index = indexmap::IndexMap::new();
    vtable_index.insert(Symbol::intern("frob"), 3u32);
    krate.traits.insert(
        sp("test::Frob"),
        TraitDef {
            params: Default::default(),
            methods,
            vtable_path: sp("test::Frob#vtable"),
            vtable_index,
        },
    );
    let fn_ptr = TypeRef::new(Type::Function(hir::FnPointer {
        is_unsafe: false,
        abi: Symbol::intern("Rill"),
        args: vec![TypeRef::pointer(BorrowKind::Shared, TypeRef::unit())],
        ret: TypeRef::unit(),
    }));
    krate.structs.insert(
        sp("test::Frob#vtable"),
        Struct {
            fields: vec![
                (Symbol::intern("size"), TypeRef::usize_()),
                (Symbol::intern("align"), TypeRef::usize_()),
                (Symbol::intern("drop"), fn_ptr.clone()),
                (Symbol::intern("frob"), fn_ptr),
            ],
            ..Struct::default()
        },
    );

    krate.functions.insert(
        sp("test::inline_id"),
        FunctionDef { sig: FnSig::new(vec![i32_ty()], i32_ty()) },
    );

    // Unions for the constant expander: a raw-bytes overlay and a
    // maybe-uninit shaped pair.
    krate.unions.insert(
        sp("test::Packet"),
        Union {
            fields: vec![
                (Symbol::intern("raw"), TypeRef::array(TypeRef::primitive(CoreType::U8), 8)),
                (Symbol::intern("word"), TypeRef::primitive(CoreType::U64)),
            ],
            ..Union::default()
        },
    );
    krate.unions.insert(
        sp("test::Slot"),
        Union {
            fields: vec![
                (Symbol::intern("empty"), TypeRef::unit()),
                (Symbol::intern("value"), u32_ty()),
            ],
            ..Union::default()
        },
    );
    krate.constants.insert(
        sp("test::PACKET"),
        ConstDef {
            ty: TypeRef::path(GenericPath::plain(sp("test::Packet"))),
            lit: EncodedLiteral::from_bytes(vec![1, 2, 3, 4, 5, 6, 7, 8]),
        },
    );
    krate.constants.insert(
        sp("test::SLOT_SET"),
        ConstDef {
            ty: TypeRef::path(GenericPath::plain(sp("test::Slot"))),
            lit: EncodedLiteral::from_bytes(vec![0x2A, 0, 0, 0]),
        },
    );
    krate.constants.insert(
        sp("test::SLOT_EMPTY"),
        ConstDef {
            ty: TypeRef::path(GenericPath::plain(sp("test::Slot"))),
            lit: EncodedLiteral::from_bytes(vec![0, 0, 0, 0]),
        },
    );

    krate
}

/// `_0 = const <path>; retval = (); return` for the union decode tests.
fn const_ref_fcn(const_path: SimplePath, ty: TypeRef) -> Function {
    let mut fcn = Function::new();
    let l0 = fcn.new_local(ty);
    let bb = fcn.new_block();
    fcn.blocks[bb].statements.push(Statement::Assign {
        dst: LValue::new_local(l0),
        src: RValue::Constant(Constant::Const(Box::new(hir::Path::plain(const_path)))),
    });
    fcn.blocks[bb].statements.push(Statement::Assign {
        dst: LValue::new_return(),
        src: RValue::Tuple { vals: Vec::new() },
    });
    fcn.blocks[bb].terminator = Terminator::Return;
    fcn
}

/// The union-variant assignment a cleaned-up constant reference left behind.
fn find_union_variant(fcn: &Function) -> Option<(u32, Param)> {
    fcn.blocks.iter().flat_map(|b| b.statements.iter()).find_map(|s| match s {
        Statement::Assign { src: RValue::UnionVariant { index, val, .. }, .. } => {
            Some((*index, val.clone()))
        }
        _ => None,
    })
}

fn buffer_ty() -> TypeRef {
    TypeRef::path(GenericPath::plain(sp("test::Buffer")))
}

fn maybe_ty() -> TypeRef {
    TypeRef::path(GenericPath::plain(sp("test::Maybe")))
}

// ---------------------------------------------------------------------------
// Value-state validation
// ---------------------------------------------------------------------------

/// Move-then-use is caught by the value-state pass.
#[test]
fn use_after_move_is_rejected() {
    let krate = fixture_crate();
    let resolve: Resolve<'_> = Resolve::new(&krate);
    let path = sp("test::bad_move");
    let ret_ty = buffer_ty();

    let mut fcn = Function::new();
    let l0 = fcn.new_local(buffer_ty());
    let l1 = fcn.new_local(buffer_ty());
    let bb = fcn.new_block();
    fcn.blocks[bb].statements.push(Statement::Assign {
        dst: LValue::new_local(l0),
        src: RValue::Struct {
            path: GenericPath::plain(sp("test::Buffer")),
            vals: vec![Param::Constant(Constant::Uint { v: 1, t: CoreType::Usize })],
        },
    });
    fcn.blocks[bb].statements.push(Statement::Assign {
        dst: LValue::new_local(l1),
        src: RValue::Use(LValue::new_local(l0)),
    });
    fcn.blocks[bb].statements.push(Statement::Assign {
        dst: LValue::new_return(),
        src: RValue::Use(LValue::new_local(l0)),
    });
    fcn.blocks[bb].terminator = Terminator::Return;

    let err = crate::validate(&resolve, &path, &fcn, &[], &ret_ty).unwrap_err();
    assert!(err.is_bug());
    assert!(err.to_string().contains("Invalid"), "unexpected message: {}", err);
}

#[test]
fn empty_block_list_is_rejected() {
    let krate = fixture_crate();
    let resolve: Resolve<'_> = Resolve::new(&krate);
    let fcn = Function::new();
    assert!(crate::validate(&resolve, &sp("test::empty"), &fcn, &[], &TypeRef::unit()).is_err());
}

// ---------------------------------------------------------------------------
// Optimisation
// ---------------------------------------------------------------------------

/// Constant arithmetic folds to a single assignment.
#[test]
fn constant_folding_collapses_binop() {
    let krate = fixture_crate();
    let resolve: Resolve<'_> = Resolve::new(&krate);
    let path = sp("test::fold");
    let ret_ty = u32_ty();

    let mut fcn = Function::new();
    let bb = fcn.new_block();
    fcn.blocks[bb].statements.push(Statement::Assign {
        dst: LValue::new_return(),
        src: RValue::BinOp {
            val_l: Param::Constant(Constant::Uint { v: 3, t: CoreType::U32 }),
            op: BinOp::Add,
            val_r: Param::Constant(Constant::Uint { v: 4, t: CoreType::U32 }),
        },
    });
    fcn.blocks[bb].terminator = Terminator::Return;

    crate::optimise(&resolve, &path, &mut fcn, &[], &ret_ty).unwrap();

    assert_eq!(fcn.blocks.len(), 1);
    let block = &fcn.blocks[Function::ENTRY];
    assert_eq!(block.statements.len(), 1);
    match &block.statements[0] {
        Statement::Assign { dst, src: RValue::Constant(Constant::Uint { v: 7, .. }) } => {
            assert!(dst.is_return());
        }
        other => panic!("expected folded constant, got {}", other),
    }
    assert_eq!(block.terminator, Terminator::Return);
}

/// Optimisation is a fixed point: a second run changes nothing.
#[test]
fn optimise_is_idempotent() {
    let krate = fixture_crate();
    let resolve: Resolve<'_> = Resolve::new(&krate);
    let path = sp("test::fixed_point");
    let ret_ty = u32_ty();

    let mut fcn = Function::new();
    let tmp = fcn.new_local(u32_ty());
    let bb = fcn.new_block();
    fcn.blocks[bb].statements.push(Statement::Assign {
        dst: LValue::new_local(tmp),
        src: RValue::BinOp {
            val_l: Param::Constant(Constant::Uint { v: 10, t: CoreType::U32 }),
            op: BinOp::Mul,
            val_r: Param::Constant(Constant::Uint { v: 5, t: CoreType::U32 }),
        },
    });
    fcn.blocks[bb].statements.push(Statement::Assign {
        dst: LValue::new_return(),
        src: RValue::Use(LValue::new_local(tmp)),
    });
    fcn.blocks[bb].terminator = Terminator::Return;

    crate::optimise(&resolve, &path, &mut fcn, &[], &ret_ty).unwrap();
    let first = dump_to_string(&fcn);
    crate::optimise(&resolve, &path, &mut fcn, &[], &ret_ty).unwrap();
    let second = dump_to_string(&fcn);
    assert_eq!(first, second);
}

/// A trivial identity callee disappears entirely into the caller.
#[test]
fn inline_identity_call() {
    let krate = fixture_crate();
    let mut resolve: Resolve<'_> = Resolve::new(&krate);

    // fn inline_id(x: i32) -> i32 { x }
    let mut callee = Function::new();
    let bb = callee.new_block();
    callee.blocks[bb].statements.push(Statement::Assign {
        dst: LValue::new_return(),
        src: RValue::Use(LValue::new_argument(0)),
    });
    callee.blocks[bb].terminator = Terminator::Return;
    resolve.register_body(sp("test::inline_id"), callee);

    let path = sp("test::caller");
    let ret_ty = i32_ty();
    let mut fcn = Function::new();
    let b0 = fcn.new_block();
    let b1 = fcn.new_block();
    let b2 = fcn.new_block();
    fcn.blocks[b0].terminator = Terminator::Call {
        ret_block: b1,
        panic_block: b2,
        ret_val: LValue::new_return(),
        fcn: CallTarget::Path(hir::Path::plain(sp("test::inline_id"))),
        args: vec![Param::Constant(Constant::Int { v: 5, t: CoreType::I32 })],
    };
    fcn.blocks[b1].terminator = Terminator::Return;
    fcn.blocks[b2].terminator = Terminator::Diverge;

    crate::optimise(&resolve, &path, &mut fcn, &[], &ret_ty).unwrap();

    assert_eq!(fcn.blocks.len(), 1, "caller should collapse to one block:\n{}", dump_to_string(&fcn));
    let block = &fcn.blocks[Function::ENTRY];
    assert_eq!(block.terminator, Terminator::Return);
    assert_eq!(block.statements.len(), 1);
    match &block.statements[0] {
        Statement::Assign { dst, src: RValue::Constant(Constant::Int { v: 5, .. }) } => {
            assert!(dst.is_return());
        }
        other => panic!("expected inlined constant, got {}", other),
    }
}

/// A function is never inlined into itself.
#[test]
fn recursive_inlining_is_rejected() {
    let krate = fixture_crate();
    let mut resolve: Resolve<'_> = Resolve::new(&krate);
    let path = sp("test::recurse");

    let mut body = Function::new();
    let b0 = body.new_block();
    let b1 = body.new_block();
    let b2 = body.new_block();
    body.blocks[b0].terminator = Terminator::Call {
        ret_block: b1,
        panic_block: b2,
        ret_val: LValue::new_return(),
        fcn: CallTarget::Path(hir::Path::plain(sp("test::recurse"))),
        args: Vec::new(),
    };
    body.blocks[b1].terminator = Terminator::Return;
    body.blocks[b2].terminator = Terminator::Diverge;
    resolve.register_body(sp("test::recurse"), body.clone());

    let mut fcn = body;
    crate::optimise(&resolve, &path, &mut fcn, &[], &TypeRef::unit()).unwrap();

    let has_call = fcn
        .blocks
        .iter()
        .any(|b| matches!(b.terminator, Terminator::Call { .. }));
    assert!(has_call, "self-call must survive:\n{}", dump_to_string(&fcn));
}

/// `size_of::<[T; 0]>()` folds to zero.
#[test]
fn size_of_empty_array_folds_to_zero() {
    let krate = fixture_crate();
    let resolve: Resolve<'_> = Resolve::new(&krate);
    let path = sp("test::size_of_zero");
    let ret_ty = TypeRef::usize_();

    let mut fcn = Function::new();
    let b0 = fcn.new_block();
    let b1 = fcn.new_block();
    let b2 = fcn.new_block();
    fcn.blocks[b0].terminator = Terminator::Call {
        ret_block: b1,
        panic_block: b2,
        ret_val: LValue::new_return(),
        fcn: CallTarget::Intrinsic {
            name: Symbol::intern("size_of"),
            params: PathParams::new(vec![TypeRef::array(u32_ty(), 0)]),
        },
        args: Vec::new(),
    };
    fcn.blocks[b1].terminator = Terminator::Return;
    fcn.blocks[b2].terminator = Terminator::Diverge;

    crate::optimise(&resolve, &path, &mut fcn, &[], &ret_ty).unwrap();

    let listing = dump_to_string(&fcn);
    assert!(
        matches!(
            fcn.blocks[Function::ENTRY].statements.first(),
            Some(Statement::Assign { src: RValue::Constant(Constant::Uint { v: 0, .. }), .. })
        ),
        "expected a zero constant:\n{}",
        listing
    );
}

/// `bswap` on a byte-sized type is the identity.
#[test]
fn bswap_u8_is_identity() {
    let krate = fixture_crate();
    let resolve: Resolve<'_> = Resolve::new(&krate);
    let path = sp("test::bswap8");
    let ret_ty = TypeRef::primitive(CoreType::U8);

    let mut fcn = Function::new();
    let b0 = fcn.new_block();
    let b1 = fcn.new_block();
    let b2 = fcn.new_block();
    fcn.blocks[b0].terminator = Terminator::Call {
        ret_block: b1,
        panic_block: b2,
        ret_val: LValue::new_return(),
        fcn: CallTarget::Intrinsic {
            name: Symbol::intern("bswap"),
            params: PathParams::new(vec![TypeRef::primitive(CoreType::U8)]),
        },
        args: vec![Param::Constant(Constant::Uint { v: 0x12, t: CoreType::U8 })],
    };
    fcn.blocks[b1].terminator = Terminator::Return;
    fcn.blocks[b2].terminator = Terminator::Diverge;

    crate::optimise(&resolve, &path, &mut fcn, &[], &ret_ty).unwrap();

    assert!(
        matches!(
            fcn.blocks[Function::ENTRY].statements.first(),
            Some(Statement::Assign { src: RValue::Constant(Constant::Uint { v: 0x12, .. }), .. })
        ),
        "bswap of a byte should be the identity:\n{}",
        dump_to_string(&fcn)
    );
}

/// A `SwitchValue` with no targets falls straight to the default.
#[test]
fn switch_value_with_no_targets_uses_default() {
    let krate = fixture_crate();
    let resolve: Resolve<'_> = Resolve::new(&krate);
    let path = sp("test::empty_switch");
    let ret_ty = TypeRef::unit();

    let mut fcn = Function::new();
    let l0 = fcn.new_local(u32_ty());
    let b0 = fcn.new_block();
    let b1 = fcn.new_block();
    fcn.blocks[b0].statements.push(Statement::Assign {
        dst: LValue::new_local(l0),
        src: RValue::Constant(Constant::Uint { v: 9, t: CoreType::U32 }),
    });
    fcn.blocks[b0].terminator = Terminator::SwitchValue {
        val: LValue::new_local(l0),
        def_target: b1,
        targets: Vec::new(),
        values: SwitchValues::Unsigned(Vec::new()),
    };
    fcn.blocks[b1].statements.push(Statement::Assign {
        dst: LValue::new_return(),
        src: RValue::Tuple { vals: Vec::new() },
    });
    fcn.blocks[b1].terminator = Terminator::Return;

    crate::optimise(&resolve, &path, &mut fcn, &[], &ret_ty).unwrap();

    assert!(
        !fcn.blocks.iter().any(|b| matches!(b.terminator, Terminator::SwitchValue { .. })),
        "the empty dispatch should be gone:\n{}",
        dump_to_string(&fcn)
    );
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

/// A call through a trait object becomes an indirect call through the
/// vtable: metadata extraction, data-pointer extraction, field dispatch.
#[test]
fn virtual_call_goes_through_vtable() {
    let krate = fixture_crate();
    let resolve: Resolve<'_> = Resolve::new(&krate);
    let path = sp("test::virtual_call");
    let ret_ty = TypeRef::unit();

    let dyn_ty = TypeRef::new(Type::TraitObject(hir::types::TraitObjectTy {
        trait_: GenericPath::plain(sp("test::Frob")),
        markers: Vec::new(),
        lifetime: LifetimeRef::new(),
    }));
    let args = [(pat(hir::PatternKind::Any), TypeRef::borrow(BorrowKind::Shared, dyn_ty.clone()))];

    let mut fcn = Function::new();
    let b0 = fcn.new_block();
    let b1 = fcn.new_block();
    let b2 = fcn.new_block();
    fcn.blocks[b0].terminator = Terminator::Call {
        ret_block: b1,
        panic_block: b2,
        ret_val: LValue::new_return(),
        fcn: CallTarget::Path(hir::Path::UfcsKnown {
            ty: dyn_ty,
            trait_: GenericPath::plain(sp("test::Frob")),
            item: Symbol::intern("frob"),
            params: PathParams::default(),
        }),
        args: vec![Param::LValue(LValue::new_argument(0))],
    };
    fcn.blocks[b1].terminator = Terminator::Return;
    fcn.blocks[b2].terminator = Terminator::Diverge;

    crate::cleanup(&resolve, &path, &mut fcn, &args, &ret_ty).unwrap();

    let block = &fcn.blocks[Function::ENTRY];
    let has_meta = block
        .statements
        .iter()
        .any(|s| matches!(s, Statement::Assign { src: RValue::DstMeta { .. }, .. }));
    let has_ptr = block
        .statements
        .iter()
        .any(|s| matches!(s, Statement::Assign { src: RValue::DstPtr { .. }, .. }));
    assert!(has_meta && has_ptr, "missing pointer decomposition:\n{}", dump_to_string(&fcn));

    match &block.terminator {
        Terminator::Call { fcn: CallTarget::Value(lv), args, .. } => {
            assert_eq!(lv.wrappers.last(), Some(&Wrapper::Field(3)), "vtable slot 3 expected");
            assert!(matches!(&args[0], Param::LValue(lv) if lv.wrappers.is_empty()));
        }
        other => panic!("expected an indirect call, got {}", other),
    }
}

/// A union constant with a whole-body byte-array field decodes through that
/// field, regardless of its position.
#[test]
fn union_constant_prefers_byte_array_field() {
    let krate = fixture_crate();
    let resolve: Resolve<'_> = Resolve::new(&krate);
    let path = sp("test::read_packet");
    let ret_ty = TypeRef::unit();

    let mut fcn = const_ref_fcn(sp("test::PACKET"), TypeRef::path(GenericPath::plain(sp("test::Packet"))));
    crate::cleanup(&resolve, &path, &mut fcn, &[], &ret_ty).unwrap();

    let (index, val) = find_union_variant(&fcn).expect("union constant was not expanded");
    assert_eq!(index, 0, "the raw byte-array field is slot 0");
    assert!(matches!(val, Param::LValue(_)), "non-uniform bytes spill to a temporary");
    let has_bytes = fcn.blocks.iter().flat_map(|b| b.statements.iter()).any(|s| {
        matches!(s, Statement::Assign { src: RValue::Array { vals }, .. } if vals.len() == 8)
    });
    assert!(has_bytes, "expected the 8 raw bytes:\n{}", dump_to_string(&fcn));
}

/// A maybe-uninit shaped union with live bytes decodes as the data variant,
/// using the data field's type.
#[test]
fn maybe_uninit_union_constant_decodes_nonzero_data() {
    let krate = fixture_crate();
    let resolve: Resolve<'_> = Resolve::new(&krate);
    let path = sp("test::read_slot");
    let ret_ty = TypeRef::unit();

    let mut fcn = const_ref_fcn(sp("test::SLOT_SET"), TypeRef::path(GenericPath::plain(sp("test::Slot"))));
    crate::cleanup(&resolve, &path, &mut fcn, &[], &ret_ty).unwrap();

    let (index, val) = find_union_variant(&fcn).expect("union constant was not expanded");
    assert_eq!(index, 1, "nonzero bytes select the data variant");
    assert_eq!(val, Param::Constant(Constant::Uint { v: 0x2A, t: CoreType::U32 }));
}

/// The all-zero maybe-uninit constant stays the uninitialised variant.
#[test]
fn maybe_uninit_union_constant_decodes_zero_as_uninit() {
    let krate = fixture_crate();
    let resolve: Resolve<'_> = Resolve::new(&krate);
    let path = sp("test::read_empty_slot");
    let ret_ty = TypeRef::unit();

    let mut fcn = const_ref_fcn(sp("test::SLOT_EMPTY"), TypeRef::path(GenericPath::plain(sp("test::Slot"))));
    crate::cleanup(&resolve, &path, &mut fcn, &[], &ret_ty).unwrap();

    let (index, val) = find_union_variant(&fcn).expect("union constant was not expanded");
    assert_eq!(index, 0, "all-zero bytes keep the unit variant");
    assert!(matches!(val, Param::LValue(_)), "the unit value lives in a temporary");
}

/// Cleanup is idempotent.
#[test]
fn cleanup_twice_is_stable() {
    let krate = fixture_crate();
    let resolve: Resolve<'_> = Resolve::new(&krate);
    let path = sp("test::cleanup_twice");
    let ret_ty = TypeRef::unit();

    let slice_ty = TypeRef::borrow(BorrowKind::Shared, TypeRef::slice(u32_ty()));
    let arr_ref_ty = TypeRef::borrow(BorrowKind::Shared, TypeRef::array(u32_ty(), 4));
    let args = [(pat(hir::PatternKind::Any), arr_ref_ty)];

    let mut fcn = Function::new();
    let l0 = fcn.new_local(slice_ty);
    let bb = fcn.new_block();
    fcn.blocks[bb].statements.push(Statement::Assign {
        dst: LValue::new_local(l0),
        src: RValue::MakeDst {
            ptr_val: Param::LValue(LValue::new_argument(0)),
            meta_val: Param::Constant(Constant::ItemAddr(None)),
        },
    });
    fcn.blocks[bb].statements.push(Statement::Assign {
        dst: LValue::new_return(),
        src: RValue::Tuple { vals: Vec::new() },
    });
    fcn.blocks[bb].terminator = Terminator::Return;

    crate::cleanup(&resolve, &path, &mut fcn, &args, &ret_ty).unwrap();
    let first = dump_to_string(&fcn);
    // The placeholder must be resolved to the array length.
    assert!(first.contains("0x4 usize"), "slice length not materialised:\n{}", first);

    crate::cleanup(&resolve, &path, &mut fcn, &args, &ret_ty).unwrap();
    assert_eq!(first, dump_to_string(&fcn));
}

// ---------------------------------------------------------------------------
// Lowering
// ---------------------------------------------------------------------------

/// `match x { Some(v) => v, None => 0 }` becomes a variant switch with a
/// downcast field extraction.
#[test]
fn lower_match_on_option_like_enum() {
    let krate = fixture_crate();
    let resolve: Resolve<'_> = Resolve::new(&krate);
    let path = sp("test::match_maybe");
    let ret_ty = u32_ty();
    let args = [(binding(0, "x"), maybe_ty())];

    let some_pat = pat(hir::PatternKind::Variant {
        path: GenericPath::plain(sp("test::Maybe::Some")),
        index: 0,
        sub: vec![binding(1, "v")],
    });
    let none_pat = pat(hir::PatternKind::Variant {
        path: GenericPath::plain(sp("test::Maybe::None")),
        index: 1,
        sub: Vec::new(),
    });
    let body = hir::ExprRoot {
        expr: expr(
            hir::ExprKind::Match {
                value: Box::new(expr(hir::ExprKind::Variable { binding: 0 }, maybe_ty())),
                arms: vec![
                    hir::MatchArm {
                        patterns: vec![some_pat],
                        guard: None,
                        body: expr(hir::ExprKind::Variable { binding: 1 }, u32_ty()),
                    },
                    hir::MatchArm { patterns: vec![none_pat], guard: None, body: lit_u32(0) },
                ],
            },
            u32_ty(),
        ),
        var_types: vec![maybe_ty(), u32_ty()],
        var_names: vec![Symbol::intern("x"), Symbol::intern("v")],
    };

    let fcn = crate::from_hir(&resolve, &path, &args, &ret_ty, &body).unwrap();
    crate::validate(&resolve, &path, &fcn, &args, &ret_ty).unwrap();

    let has_switch = fcn
        .blocks
        .iter()
        .any(|b| matches!(&b.terminator, Terminator::Switch { targets, .. } if targets.len() == 2));
    assert!(has_switch, "expected a two-way variant switch:\n{}", dump_to_string(&fcn));

    let mut extracts_field = false;
    for block in fcn.blocks.iter() {
        for stmt in &block.statements {
            if let Statement::Assign { src: RValue::Use(lv), .. } = stmt {
                if lv.wrappers == [Wrapper::Downcast(0), Wrapper::Field(0)] {
                    extracts_field = true;
                }
            }
        }
    }
    assert!(extracts_field, "expected a downcast field read:\n{}", dump_to_string(&fcn));
}

/// Ranged arms over a `u8` collapse into two comparisons, both failing into
/// the default arm.
#[test]
fn lower_match_with_ranges_uses_two_comparisons() {
    let krate = fixture_crate();
    let resolve: Resolve<'_> = Resolve::new(&krate);
    let path = sp("test::match_ranges");
    let ret_ty = u32_ty();
    let u8_ty = TypeRef::primitive(CoreType::U8);
    let args = [(binding(0, "x"), u8_ty.clone())];

    let range_pat = |lo: u64, hi: u64| {
        pat(hir::PatternKind::Range {
            start: hir::Literal::Uint(lo, CoreType::U8),
            end: hir::Literal::Uint(hi, CoreType::U8),
        })
    };
    let body = hir::ExprRoot {
        expr: expr(
            hir::ExprKind::Match {
                value: Box::new(expr(hir::ExprKind::Variable { binding: 0 }, u8_ty.clone())),
                arms: vec![
                    hir::MatchArm { patterns: vec![range_pat(0, 9)], guard: None, body: lit_u32(1) },
                    hir::MatchArm { patterns: vec![range_pat(10, 19)], guard: None, body: lit_u32(2) },
                    hir::MatchArm { patterns: vec![pat(hir::PatternKind::Any)], guard: None, body: lit_u32(3) },
                ],
            },
            u32_ty(),
        ),
        var_types: vec![u8_ty],
        var_names: vec![Symbol::intern("x")],
    };

    let fcn = crate::from_hir(&resolve, &path, &args, &ret_ty, &body).unwrap();
    crate::validate(&resolve, &path, &fcn, &args, &ret_ty).unwrap();

    let mut comparisons = 0;
    for block in fcn.blocks.iter() {
        for stmt in &block.statements {
            if let Statement::Assign { src: RValue::BinOp { op, .. }, .. } = stmt {
                if op.is_comparison() {
                    comparisons += 1;
                }
            }
        }
    }
    assert_eq!(comparisons, 2, "contiguous ranges need two tests:\n{}", dump_to_string(&fcn));
}

/// A single irrefutable arm bypasses the dispatch machinery entirely.
#[test]
fn single_wildcard_arm_has_no_switch() {
    let krate = fixture_crate();
    let resolve: Resolve<'_> = Resolve::new(&krate);
    let path = sp("test::match_wildcard");
    let ret_ty = u32_ty();
    let args = [(binding(0, "x"), maybe_ty())];

    let body = hir::ExprRoot {
        expr: expr(
            hir::ExprKind::Match {
                value: Box::new(expr(hir::ExprKind::Variable { binding: 0 }, maybe_ty())),
                arms: vec![hir::MatchArm {
                    patterns: vec![pat(hir::PatternKind::Any)],
                    guard: None,
                    body: lit_u32(7),
                }],
            },
            u32_ty(),
        ),
        var_types: vec![maybe_ty()],
        var_names: vec![Symbol::intern("x")],
    };

    let fcn = crate::from_hir(&resolve, &path, &args, &ret_ty, &body).unwrap();
    crate::validate(&resolve, &path, &fcn, &args, &ret_ty).unwrap();

    let has_dispatch = fcn.blocks.iter().any(|b| {
        matches!(
            b.terminator,
            Terminator::Switch { .. } | Terminator::SwitchValue { .. }
        )
    });
    assert!(!has_dispatch, "wildcard match needs no dispatch:\n{}", dump_to_string(&fcn));
}

/// Guarded arms force the linear strategy and still validate.
#[test]
fn guarded_match_lowers_and_validates() {
    let krate = fixture_crate();
    let resolve: Resolve<'_> = Resolve::new(&krate);
    let path = sp("test::match_guard");
    let ret_ty = u32_ty();
    let args = [(binding(0, "x"), u32_ty())];

    let body = hir::ExprRoot {
        expr: expr(
            hir::ExprKind::Match {
                value: Box::new(expr(hir::ExprKind::Variable { binding: 0 }, u32_ty())),
                arms: vec![
                    hir::MatchArm {
                        patterns: vec![pat(hir::PatternKind::Value {
                            lit: hir::Literal::Uint(5, CoreType::U32),
                        })],
                        guard: Some(expr(
                            hir::ExprKind::Literal(hir::Literal::Bool(true)),
                            TypeRef::bool_(),
                        )),
                        body: lit_u32(1),
                    },
                    hir::MatchArm {
                        patterns: vec![pat(hir::PatternKind::Any)],
                        guard: None,
                        body: lit_u32(0),
                    },
                ],
            },
            u32_ty(),
        ),
        var_types: vec![u32_ty()],
        var_names: vec![Symbol::intern("x")],
    };

    let fcn = crate::from_hir(&resolve, &path, &args, &ret_ty, &body).unwrap();
    crate::validate(&resolve, &path, &fcn, &args, &ret_ty).unwrap();
}

/// If/else producing a value: both arms assign the shared result slot.
#[test]
fn lower_if_else_value() {
    let krate = fixture_crate();
    let resolve: Resolve<'_> = Resolve::new(&krate);
    let path = sp("test::if_else");
    let ret_ty = u32_ty();
    let args = [(binding(0, "c"), TypeRef::bool_())];

    let body = hir::ExprRoot {
        expr: expr(
            hir::ExprKind::If {
                cond: Box::new(expr(hir::ExprKind::Variable { binding: 0 }, TypeRef::bool_())),
                then_arm: Box::new(lit_u32(1)),
                else_arm: Some(Box::new(lit_u32(2))),
            },
            u32_ty(),
        ),
        var_types: vec![TypeRef::bool_()],
        var_names: vec![Symbol::intern("c")],
    };

    let fcn = crate::from_hir(&resolve, &path, &args, &ret_ty, &body).unwrap();
    crate::validate(&resolve, &path, &fcn, &args, &ret_ty).unwrap();

    let has_if = fcn.blocks.iter().any(|b| matches!(b.terminator, Terminator::If { .. }));
    assert!(has_if, "expected a conditional branch:\n{}", dump_to_string(&fcn));
}

/// Checked addition produces the overflow pair and an abort edge.
#[test]
fn lower_checked_addition() {
    let krate = fixture_crate();
    let resolve: Resolve<'_> = Resolve::new(&krate);
    let path = sp("test::checked_add");
    let ret_ty = u32_ty();
    let args = [(binding(0, "a"), u32_ty()), (binding(1, "b"), u32_ty())];

    let body = hir::ExprRoot {
        expr: expr(
            hir::ExprKind::BinOp {
                op: hir::expr::BinOp::Add,
                left: Box::new(expr(hir::ExprKind::Variable { binding: 0 }, u32_ty())),
                right: Box::new(expr(hir::ExprKind::Variable { binding: 1 }, u32_ty())),
            },
            u32_ty(),
        ),
        var_types: vec![u32_ty(), u32_ty()],
        var_names: vec![Symbol::intern("a"), Symbol::intern("b")],
    };

    let fcn = crate::from_hir(&resolve, &path, &args, &ret_ty, &body).unwrap();
    crate::validate(&resolve, &path, &fcn, &args, &ret_ty).unwrap();

    let uses_overflow_op = fcn.blocks.iter().any(|b| {
        b.statements.iter().any(|s| {
            matches!(
                s,
                Statement::Assign { src: RValue::BinOp { op: BinOp::AddOv, .. }, .. }
            )
        })
    });
    let has_abort = fcn.blocks.iter().any(|b| matches!(b.terminator, Terminator::Diverge));
    assert!(uses_overflow_op && has_abort, "missing overflow check:\n{}", dump_to_string(&fcn));
}

/// Loops lower to a body that jumps back to its head.
#[test]
fn lower_infinite_loop() {
    let krate = fixture_crate();
    let resolve: Resolve<'_> = Resolve::new(&krate);
    let path = sp("test::spin");
    let ret_ty = TypeRef::unit();

    let body = hir::ExprRoot {
        expr: expr(
            hir::ExprKind::Loop {
                label: None,
                body: Box::new(expr(
                    hir::ExprKind::Block { stmts: Vec::new(), tail: None },
                    TypeRef::unit(),
                )),
            },
            TypeRef::diverge(),
        ),
        var_types: Vec::new(),
        var_names: Vec::new(),
    };

    let fcn = crate::from_hir(&resolve, &path, &[], &ret_ty, &body).unwrap();
    crate::validate(&resolve, &path, &fcn, &[], &ret_ty).unwrap();

    // Some block must jump backwards (the loop edge).
    let mut has_back_edge = false;
    for (bb, block) in fcn.blocks.iter_enumerated() {
        for t in block.terminator.targets() {
            if t.0 <= bb.0 {
                has_back_edge = true;
            }
        }
    }
    assert!(has_back_edge, "expected a loop back edge:\n{}", dump_to_string(&fcn));
}

// ---------------------------------------------------------------------------
// Borrow analysis
// ---------------------------------------------------------------------------

/// Returning a borrow of a local is reported, and the pass keeps going
/// rather than failing fast.
#[test]
fn borrow_of_local_escaping_is_reported() {
    let krate = fixture_crate();
    let resolve: Resolve<'_> = Resolve::new(&krate);
    let path = sp("test::escape");
    let mut ret_ty = TypeRef::borrow(BorrowKind::Shared, u32_ty());
    if let Type::Borrow(_, lft, _) = ret_ty.kind_mut() {
        *lft = LifetimeRef::new_static();
    }

    let mut fcn = Function::new();
    let l0 = fcn.new_local(u32_ty());
    let l1 = fcn.new_local(TypeRef::borrow(BorrowKind::Shared, u32_ty()));
    let bb = fcn.new_block();
    fcn.blocks[bb].statements.push(Statement::Assign {
        dst: LValue::new_local(l0),
        src: RValue::Constant(Constant::Uint { v: 1, t: CoreType::U32 }),
    });
    fcn.blocks[bb].statements.push(Statement::Assign {
        dst: LValue::new_local(l1),
        src: RValue::Borrow { kind: BorrowKind::Shared, val: LValue::new_local(l0) },
    });
    fcn.blocks[bb].statements.push(Statement::Assign {
        dst: LValue::new_return(),
        src: RValue::Use(LValue::new_local(l1)),
    });
    fcn.blocks[bb].terminator = Terminator::Return;

    let handler = Handler::new();
    crate::borrow_check(&handler, &resolve, &path, &mut fcn, &[], &ret_ty);
    assert!(handler.has_errors());
    let diags = handler.take();
    assert!(diags[0].message.contains("does not live long enough"));
}

// ---------------------------------------------------------------------------
// Whole-program inlining
// ---------------------------------------------------------------------------

#[test]
fn optimise_inline_uses_the_translation_list() {
    let krate = fixture_crate();
    let resolve: Resolve<'_> = Resolve::new(&krate);
    let path = sp("test::post_enum");
    let ret_ty = i32_ty();

    let mut callee = Function::new();
    let bb = callee.new_block();
    callee.blocks[bb].statements.push(Statement::Assign {
        dst: LValue::new_return(),
        src: RValue::Use(LValue::new_argument(0)),
    });
    callee.blocks[bb].terminator = Terminator::Return;
    let mut trans = TransList::new();
    trans.insert(sp("test::inline_id"), callee);

    let mut fcn = Function::new();
    let b0 = fcn.new_block();
    let b1 = fcn.new_block();
    let b2 = fcn.new_block();
    fcn.blocks[b0].terminator = Terminator::Call {
        ret_block: b1,
        panic_block: b2,
        ret_val: LValue::new_return(),
        fcn: CallTarget::Path(hir::Path::plain(sp("test::inline_id"))),
        args: vec![Param::Constant(Constant::Int { v: 9, t: CoreType::I32 })],
    };
    fcn.blocks[b1].terminator = Terminator::Return;
    fcn.blocks[b2].terminator = Terminator::Diverge;

    crate::optimise_inline(&resolve, &path, &mut fcn, &[], &ret_ty, &trans).unwrap();

    let has_call = fcn.blocks.iter().any(|b| matches!(b.terminator, Terminator::Call { .. }));
    assert!(!has_call, "the listed callee should be inlined:\n{}", dump_to_string(&fcn));
}
