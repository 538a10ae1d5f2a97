//! The typed expression tree consumed by MIR lowering.
//!
//! Every node carries its type and span; typecheck has already run, so the
//! lowering may trust `ty` without re-deriving it. Compound assignment and
//! short-circuit operators are desugared by the front-end and never appear
//! here.

use crate::asm::{AsmOptions, Direction, RegisterSpec};
use crate::path::{GenericPath, Path, PathParams};
use crate::types::{BorrowKind, CoreType, TypeRef};
use rillc_util::{Span, Symbol};

/// A function body: the expression tree plus the types of all variable slots.
///
/// Variable slot `i` (named by pattern bindings) becomes MIR local `i`;
/// temporaries are appended after them during lowering.
#[derive(Clone, Debug)]
pub struct ExprRoot {
    pub expr: Expr,
    pub var_types: Vec<TypeRef>,
    pub var_names: Vec<Symbol>,
}

/// A typed expression node.
#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: TypeRef,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, ty: TypeRef, span: Span) -> Self {
        Expr { kind, ty, span }
    }
}

/// Binary operators surviving to the typed tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge)
    }

    /// Arithmetic that needs an overflow check in checked builds.
    pub fn can_overflow(self) -> bool {
        matches!(self, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div)
    }
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniOp {
    /// Bitwise/logical invert (`!`).
    Invert,
    /// Arithmetic negate (`-`).
    Negate,
}

/// Callee of a call expression.
#[derive(Clone, Debug)]
pub enum Callee {
    /// A named function or method, fully resolved.
    Path(Path),
    /// An expression evaluating to a function pointer or closure.
    Value(Box<Expr>),
    /// A compiler intrinsic.
    Intrinsic { name: Symbol, params: PathParams },
}

/// One `match` arm: alternative patterns, an optional guard, a body.
#[derive(Clone, Debug)]
pub struct MatchArm {
    pub patterns: Vec<Pattern>,
    pub guard: Option<Expr>,
    pub body: Expr,
}

/// Operand of an inline-assembly node.
#[derive(Clone, Debug)]
pub enum AsmOperand {
    Const(Literal),
    Sym(Path),
    Reg {
        dir: Direction,
        spec: RegisterSpec,
        input: Option<Box<Expr>>,
        output: Option<Box<Expr>>,
    },
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    /// Statement sequence; the tail expression is the block's value.
    Block {
        stmts: Vec<Expr>,
        tail: Option<Box<Expr>>,
    },
    Return(Option<Box<Expr>>),
    Let {
        pat: Pattern,
        ty: TypeRef,
        init: Option<Box<Expr>>,
    },
    Loop {
        label: Option<Symbol>,
        body: Box<Expr>,
    },
    /// `break` / `continue`, optionally labelled; `value` only for `break`.
    LoopControl {
        label: Option<Symbol>,
        is_continue: bool,
        value: Option<Box<Expr>>,
    },
    If {
        cond: Box<Expr>,
        then_arm: Box<Expr>,
        else_arm: Option<Box<Expr>>,
    },
    Match {
        value: Box<Expr>,
        arms: Vec<MatchArm>,
    },
    /// Plain assignment; compound forms are desugared upstream.
    Assign {
        dst: Box<Expr>,
        src: Box<Expr>,
    },
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UniOp {
        op: UniOp,
        value: Box<Expr>,
    },
    /// Field access by index (names were resolved during typecheck).
    Field {
        value: Box<Expr>,
        index: u32,
    },
    Index {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Deref {
        value: Box<Expr>,
    },
    /// View of one enum variant's body (emitted by match simplification).
    Downcast {
        value: Box<Expr>,
        variant: u32,
    },
    /// Primitive/pointer cast; the target type is `self.ty`.
    Cast {
        value: Box<Expr>,
    },
    /// Unsize coercion; the target type is `self.ty`. Becomes a fat-pointer
    /// construction whose metadata is materialised during cleanup.
    Unsize {
        value: Box<Expr>,
    },
    Borrow {
        kind: BorrowKind,
        value: Box<Expr>,
    },
    Call {
        callee: Callee,
        args: Vec<Expr>,
    },
    Tuple(Vec<Expr>),
    /// `[a, b, c]`
    ArrayList(Vec<Expr>),
    /// `[v; N]`
    ArraySized {
        value: Box<Expr>,
        count: u64,
    },
    /// Struct literal with fields in declaration order.
    StructLiteral {
        path: GenericPath,
        fields: Vec<Expr>,
    },
    UnionLiteral {
        path: GenericPath,
        index: u32,
        value: Box<Expr>,
    },
    VariantLiteral {
        path: GenericPath,
        index: u32,
        fields: Vec<Expr>,
    },
    Literal(Literal),
    /// Reference to a `const`, `static`, or function item.
    PathValue {
        path: Path,
    },
    /// A variable slot introduced by a pattern binding.
    Variable {
        binding: u32,
    },
    /// Stabilised inline assembly.
    InlineAsm {
        lines: Vec<String>,
        operands: Vec<AsmOperand>,
        options: AsmOptions,
    },
}

/// A literal value in the tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Int(i64, CoreType),
    Uint(u64, CoreType),
    Float(f64, CoreType),
    Bool(bool),
    Str(String),
    ByteStr(Vec<u8>),
}

/// A pattern, as matched against a value of the annotated type.
#[derive(Clone, Debug)]
pub struct Pattern {
    pub kind: PatternKind,
    pub span: Span,
}

impl Pattern {
    pub fn new(kind: PatternKind, span: Span) -> Self {
        Pattern { kind, span }
    }

    pub fn any(span: Span) -> Self {
        Pattern { kind: PatternKind::Any, span }
    }

    /// True when the pattern can fail to match.
    pub fn is_refutable(&self) -> bool {
        match &self.kind {
            PatternKind::Any => false,
            PatternKind::Binding { sub, .. } => sub.as_ref().is_some_and(|p| p.is_refutable()),
            PatternKind::Tuple(subs) | PatternKind::Struct { sub: subs, .. } => {
                subs.iter().any(Pattern::is_refutable)
            }
            // A variant pattern is refutable unless the enum has one variant,
            // which the builder cannot see from here; treat as refutable.
            PatternKind::Variant { .. } => true,
            PatternKind::Ref { sub } => sub.is_refutable(),
            PatternKind::Value { .. } | PatternKind::Range { .. } => true,
        }
    }
}

#[derive(Clone, Debug)]
pub enum PatternKind {
    /// `_`
    Any,
    /// A binding, optionally with a subpattern (`x @ sub`).
    Binding {
        slot: u32,
        name: Symbol,
        sub: Option<Box<Pattern>>,
    },
    Tuple(Vec<Pattern>),
    /// Struct pattern with subpatterns in field order (missing fields filled
    /// with `Any` by the front-end).
    Struct {
        path: GenericPath,
        sub: Vec<Pattern>,
    },
    Variant {
        path: GenericPath,
        index: u32,
        sub: Vec<Pattern>,
    },
    /// `&p`
    Ref {
        sub: Box<Pattern>,
    },
    Value {
        lit: Literal,
    },
    /// Inclusive range `start..=end`.
    Range {
        start: Literal,
        end: Literal,
    },
}
