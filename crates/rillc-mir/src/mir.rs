//! MIR definitions: places, values, statements, terminators, functions.
//!
//! A function is a list of typed locals, a list of drop flags, and a list of
//! basic blocks; block 0 is the entry. Places (`LValue`) are a root plus a
//! wrapper list applied outermost-last; all equality and ordering here is
//! structural.

use rillc_hir as hir;
use rillc_hir::{BorrowKind, CoreType, GenericPath, TypeRef};
use rillc_util::{define_idx, IndexVec, Symbol};
use std::cmp::Ordering;
use std::fmt;

define_idx!(LocalId);
define_idx!(BlockId);
define_idx!(FlagId);

// ---------------------------------------------------------------------------
// Places
// ---------------------------------------------------------------------------

/// Root of a place.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Root {
    /// The return slot.
    Return,
    /// Function argument `n`.
    Argument(u32),
    /// Function-local slot (variables and temporaries share this space).
    Local(LocalId),
    /// A static item.
    Static(Box<hir::Path>),
}

/// One projection step, applied outer-to-inner-last.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Wrapper {
    Deref,
    Field(u32),
    /// View of one enum variant's body.
    Downcast(u32),
    /// Runtime indexing; the index is always read out of a local.
    Index(LocalId),
}

/// A place: root plus projections.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LValue {
    pub root: Root,
    pub wrappers: Vec<Wrapper>,
}

impl LValue {
    pub fn new_return() -> Self {
        LValue { root: Root::Return, wrappers: Vec::new() }
    }

    pub fn new_argument(idx: u32) -> Self {
        LValue { root: Root::Argument(idx), wrappers: Vec::new() }
    }

    pub fn new_local(idx: LocalId) -> Self {
        LValue { root: Root::Local(idx), wrappers: Vec::new() }
    }

    pub fn new_static(path: hir::Path) -> Self {
        LValue { root: Root::Static(Box::new(path)), wrappers: Vec::new() }
    }

    pub fn deref(mut self) -> Self {
        self.wrappers.push(Wrapper::Deref);
        self
    }

    pub fn field(mut self, idx: u32) -> Self {
        self.wrappers.push(Wrapper::Field(idx));
        self
    }

    pub fn downcast(mut self, variant: u32) -> Self {
        self.wrappers.push(Wrapper::Downcast(variant));
        self
    }

    pub fn index(mut self, local: LocalId) -> Self {
        self.wrappers.push(Wrapper::Index(local));
        self
    }

    /// The bare local, if this place is exactly one.
    pub fn as_local(&self) -> Option<LocalId> {
        match (&self.root, self.wrappers.is_empty()) {
            (Root::Local(id), true) => Some(*id),
            _ => None,
        }
    }

    pub fn is_return(&self) -> bool {
        matches!(self.root, Root::Return) && self.wrappers.is_empty()
    }

    /// Clone with extra wrappers appended.
    pub fn clone_wrapped(&self, extra: impl IntoIterator<Item = Wrapper>) -> LValue {
        let mut wrappers = self.wrappers.clone();
        wrappers.extend(extra);
        LValue { root: self.root.clone(), wrappers }
    }

    /// Clone with the outermost `count` wrappers removed.
    pub fn clone_unwrapped(&self, count: usize) -> LValue {
        assert!(count <= self.wrappers.len());
        LValue {
            root: self.root.clone(),
            wrappers: self.wrappers[..self.wrappers.len() - count].to_vec(),
        }
    }

    /// True iff `self`'s wrapper list is a prefix of `other`'s (same root):
    /// `_1.0` is a subset of `*_1.0`.
    pub fn is_subset_of(&self, other: &LValue) -> bool {
        self.root == other.root
            && other.wrappers.len() >= self.wrappers.len()
            && other.wrappers[..self.wrappers.len()] == self.wrappers[..]
    }

    /// `a.is_subset_of(b) || b.is_subset_of(a)`, in one pass.
    pub fn is_either_subset(&self, other: &LValue) -> bool {
        if self.root != other.root {
            return false;
        }
        let n = self.wrappers.len().min(other.wrappers.len());
        self.wrappers[..n] == other.wrappers[..n]
    }

    /// Replace the view `root + wrappers[..depth]` with `with`, keeping the
    /// remaining outer wrappers.
    pub fn replace_prefix(&mut self, depth: usize, with: LValue) {
        assert!(depth <= self.wrappers.len());
        let mut new = with;
        new.wrappers.extend_from_slice(&self.wrappers[depth..]);
        *self = new;
    }

    /// Visit every local referenced by this place (the root and any index
    /// wrappers).
    pub fn visit_locals(&self, f: &mut impl FnMut(LocalId)) {
        if let Root::Local(id) = self.root {
            f(id);
        }
        for w in &self.wrappers {
            if let Wrapper::Index(id) = w {
                f(*id);
            }
        }
    }
}

impl fmt::Display for LValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Innermost-first textual form, built back-to-front.
        fn fmt_at(lv: &LValue, depth: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            if depth == 0 {
                return match &lv.root {
                    Root::Return => write!(f, "retval"),
                    Root::Argument(i) => write!(f, "a{}", i),
                    Root::Local(i) => write!(f, "_{}", i.0),
                    Root::Static(p) => write!(f, "({})", p),
                };
            }
            match lv.wrappers[depth - 1] {
                Wrapper::Deref => {
                    write!(f, "*")?;
                    fmt_at(lv, depth - 1, f)
                }
                Wrapper::Field(i) => {
                    fmt_at(lv, depth - 1, f)?;
                    write!(f, ".{}", i)
                }
                Wrapper::Downcast(i) => {
                    fmt_at(lv, depth - 1, f)?;
                    write!(f, "@{}", i)
                }
                Wrapper::Index(l) => {
                    fmt_at(lv, depth - 1, f)?;
                    write!(f, "[_{}]", l.0)
                }
            }
        }
        fmt_at(self, self.wrappers.len(), f)
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// A compile-time known value.
#[derive(Clone, Debug)]
pub enum Constant {
    Int { v: i64, t: CoreType },
    Uint { v: u64, t: CoreType },
    Float { v: f64, t: CoreType },
    Bool(bool),
    /// Byte string literal (`b"..."`).
    Bytes(Vec<u8>),
    /// UTF-8 string literal.
    StaticString(String),
    /// Reference to a `const` item, expanded during cleanup.
    Const(Box<hir::Path>),
    /// A const generic parameter.
    Generic(hir::GenericRef),
    /// Address of a static or function item. `None` marks the metadata slot
    /// of a not-yet-materialised unsize coercion.
    ItemAddr(Option<Box<hir::Path>>),
}

impl Constant {
    fn discriminant_order(&self) -> u8 {
        match self {
            Constant::Int { .. } => 0,
            Constant::Uint { .. } => 1,
            Constant::Float { .. } => 2,
            Constant::Bool(_) => 3,
            Constant::Bytes(_) => 4,
            Constant::StaticString(_) => 5,
            Constant::Const(_) => 6,
            Constant::Generic(_) => 7,
            Constant::ItemAddr(_) => 8,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match *self {
            Constant::Uint { v, .. } => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Constant::Bool(b) => Some(b),
            _ => None,
        }
    }
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Constant {}

impl PartialOrd for Constant {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Constant {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Constant::Int { v: a, t: at }, Constant::Int { v: b, t: bt }) => a.cmp(b).then(at.cmp(bt)),
            (Constant::Uint { v: a, t: at }, Constant::Uint { v: b, t: bt }) => a.cmp(b).then(at.cmp(bt)),
            // Total order over floats via their bit patterns.
            (Constant::Float { v: a, t: at }, Constant::Float { v: b, t: bt }) => {
                a.to_bits().cmp(&b.to_bits()).then(at.cmp(bt))
            }
            (Constant::Bool(a), Constant::Bool(b)) => a.cmp(b),
            (Constant::Bytes(a), Constant::Bytes(b)) => a.cmp(b),
            (Constant::StaticString(a), Constant::StaticString(b)) => a.cmp(b),
            (Constant::Const(a), Constant::Const(b)) => a.cmp(b),
            (Constant::Generic(a), Constant::Generic(b)) => a.cmp(b),
            (Constant::ItemAddr(a), Constant::ItemAddr(b)) => a.cmp(b),
            _ => self.discriminant_order().cmp(&other.discriminant_order()),
        }
    }
}

impl std::hash::Hash for Constant {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.discriminant_order().hash(state);
        match self {
            Constant::Int { v, t } => {
                v.hash(state);
                t.hash(state);
            }
            Constant::Uint { v, t } => {
                v.hash(state);
                t.hash(state);
            }
            Constant::Float { v, t } => {
                v.to_bits().hash(state);
                t.hash(state);
            }
            Constant::Bool(b) => b.hash(state),
            Constant::Bytes(b) => b.hash(state),
            Constant::StaticString(s) => s.hash(state),
            Constant::Const(p) => p.hash(state),
            Constant::Generic(g) => g.hash(state),
            Constant::ItemAddr(p) => p.hash(state),
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int { v, t } => write!(f, "{:+} {}", v, t),
            Constant::Uint { v, t } => write!(f, "{:#x} {}", v, t),
            Constant::Float { v, t } => write!(f, "{:?} {}", v, t),
            Constant::Bool(b) => write!(f, "{}", b),
            Constant::Bytes(b) => write!(f, "b\"{}\"", escape_bytes(b)),
            Constant::StaticString(s) => write!(f, "{:?}", s),
            Constant::Const(p) => write!(f, "const {}", p),
            Constant::Generic(g) => write!(f, "const {}", g),
            Constant::ItemAddr(Some(p)) => write!(f, "addr {}", p),
            Constant::ItemAddr(None) => write!(f, "addr <unresolved>"),
        }
    }
}

fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::new();
    for &b in bytes {
        match b {
            b' '..=b'~' if b != b'"' && b != b'\\' => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Operands and values
// ---------------------------------------------------------------------------

/// A read-only operand: a place, a borrow of a place, or a constant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Param {
    LValue(LValue),
    Borrow { kind: BorrowKind, val: LValue },
    Constant(Constant),
}

impl Param {
    pub fn as_lvalue(&self) -> Option<&LValue> {
        match self {
            Param::LValue(lv) => Some(lv),
            _ => None,
        }
    }

    pub fn visit_lvalues(&self, f: &mut impl FnMut(&LValue)) {
        match self {
            Param::LValue(lv) | Param::Borrow { val: lv, .. } => f(lv),
            Param::Constant(_) => {}
        }
    }

    pub fn visit_lvalues_mut(&mut self, f: &mut impl FnMut(&mut LValue)) {
        match self {
            Param::LValue(lv) | Param::Borrow { val: lv, .. } => f(lv),
            Param::Constant(_) => {}
        }
    }
}

impl From<LValue> for Param {
    fn from(lv: LValue) -> Self {
        Param::LValue(lv)
    }
}

impl From<Constant> for Param {
    fn from(c: Constant) -> Self {
        Param::Constant(c)
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::LValue(lv) => write!(f, "{}", lv),
            Param::Borrow { kind, val } => write!(f, "{}{}", kind.prefix_str(), val),
            Param::Constant(c) => write!(f, "{}", c),
        }
    }
}

/// Binary operations on primitives. The `..Ov` forms return a
/// `(result, overflowed)` tuple; the plain arithmetic forms wrap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    AddOv,
    Sub,
    SubOv,
    Mul,
    MulOv,
    Div,
    DivOv,
    Rem,
    BitOr,
    BitAnd,
    BitXor,
    Shr,
    Shl,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl BinOp {
    pub fn is_overflowing(self) -> bool {
        matches!(self, BinOp::AddOv | BinOp::SubOv | BinOp::MulOv | BinOp::DivOv)
    }

    pub fn is_comparison(self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Ne | BinOp::Gt | BinOp::Ge | BinOp::Lt | BinOp::Le)
    }

    pub fn name(self) -> &'static str {
        match self {
            BinOp::Add => "ADD",
            BinOp::AddOv => "ADD_OV",
            BinOp::Sub => "SUB",
            BinOp::SubOv => "SUB_OV",
            BinOp::Mul => "MUL",
            BinOp::MulOv => "MUL_OV",
            BinOp::Div => "DIV",
            BinOp::DivOv => "DIV_OV",
            BinOp::Rem => "MOD",
            BinOp::BitOr => "BIT_OR",
            BinOp::BitAnd => "BIT_AND",
            BinOp::BitXor => "BIT_XOR",
            BinOp::Shr => "BIT_SHR",
            BinOp::Shl => "BIT_SHL",
            BinOp::Eq => "EQ",
            BinOp::Ne => "NE",
            BinOp::Gt => "GT",
            BinOp::Ge => "GE",
            BinOp::Lt => "LT",
            BinOp::Le => "LE",
        }
    }
}

/// Unary operations on primitives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UniOp {
    /// Bitwise invert (logical not on `bool`).
    Inv,
    /// Arithmetic negation.
    Neg,
}

/// The right-hand side of an assignment.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RValue {
    Use(LValue),
    Constant(Constant),
    /// `[val; count]`
    SizedArray { val: Param, count: hir::ArraySize },
    Borrow { kind: BorrowKind, val: LValue },
    /// Primitive/pointer cast.
    Cast { val: LValue, ty: TypeRef },
    BinOp { val_l: Param, op: BinOp, val_r: Param },
    UniOp { val: LValue, op: UniOp },
    /// Metadata of a fat pointer (array size when used on an array lvalue).
    DstMeta { val: LValue },
    /// Data pointer of a fat pointer, as `*const ()`.
    DstPtr { val: LValue },
    /// Construct a fat pointer. `meta_val == ItemAddr(None)` marks an
    /// unsize coercion whose metadata cleanup has yet to materialise.
    MakeDst { ptr_val: Param, meta_val: Param },
    Tuple { vals: Vec<Param> },
    Array { vals: Vec<Param> },
    UnionVariant { path: GenericPath, index: u32, val: Param },
    EnumVariant { path: GenericPath, index: u32, vals: Vec<Param> },
    Struct { path: GenericPath, vals: Vec<Param> },
}

impl RValue {
    pub fn visit_lvalues(&self, f: &mut impl FnMut(&LValue)) {
        match self {
            RValue::Use(lv) | RValue::Borrow { val: lv, .. } | RValue::Cast { val: lv, .. } => f(lv),
            RValue::UniOp { val, .. } | RValue::DstMeta { val } | RValue::DstPtr { val } => f(val),
            RValue::Constant(_) => {}
            RValue::SizedArray { val, .. } => val.visit_lvalues(f),
            RValue::BinOp { val_l, val_r, .. } => {
                val_l.visit_lvalues(f);
                val_r.visit_lvalues(f);
            }
            RValue::MakeDst { ptr_val, meta_val } => {
                ptr_val.visit_lvalues(f);
                meta_val.visit_lvalues(f);
            }
            RValue::UnionVariant { val, .. } => val.visit_lvalues(f),
            RValue::Tuple { vals } | RValue::Array { vals } | RValue::EnumVariant { vals, .. } | RValue::Struct { vals, .. } => {
                for v in vals {
                    v.visit_lvalues(f);
                }
            }
        }
    }

    pub fn visit_lvalues_mut(&mut self, f: &mut impl FnMut(&mut LValue)) {
        match self {
            RValue::Use(lv) | RValue::Borrow { val: lv, .. } | RValue::Cast { val: lv, .. } => f(lv),
            RValue::UniOp { val, .. } | RValue::DstMeta { val } | RValue::DstPtr { val } => f(val),
            RValue::Constant(_) => {}
            RValue::SizedArray { val, .. } => val.visit_lvalues_mut(f),
            RValue::BinOp { val_l, val_r, .. } => {
                val_l.visit_lvalues_mut(f);
                val_r.visit_lvalues_mut(f);
            }
            RValue::MakeDst { ptr_val, meta_val } => {
                ptr_val.visit_lvalues_mut(f);
                meta_val.visit_lvalues_mut(f);
            }
            RValue::UnionVariant { val, .. } => val.visit_lvalues_mut(f),
            RValue::Tuple { vals } | RValue::Array { vals } | RValue::EnumVariant { vals, .. } | RValue::Struct { vals, .. } => {
                for v in vals {
                    v.visit_lvalues_mut(f);
                }
            }
        }
    }
}

impl fmt::Display for RValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RValue::Use(lv) => write!(f, "= {}", lv),
            RValue::Constant(c) => write!(f, "= {}", c),
            RValue::SizedArray { val, count } => write!(f, "= [{}; {}]", val, count),
            RValue::Borrow { kind, val } => write!(f, "= {}{}", kind.prefix_str(), val),
            RValue::Cast { val, ty } => write!(f, "= CAST {} as {}", val, ty),
            RValue::BinOp { val_l, op, val_r } => write!(f, "= BINOP {} {} {}", val_l, op.name(), val_r),
            RValue::UniOp { val, op } => {
                write!(f, "= UNIOP {} {}", match op { UniOp::Inv => "INV", UniOp::Neg => "NEG" }, val)
            }
            RValue::DstMeta { val } => write!(f, "= DSTMETA {}", val),
            RValue::DstPtr { val } => write!(f, "= DSTPTR {}", val),
            RValue::MakeDst { ptr_val, meta_val } => write!(f, "= MAKEDST {}, {}", ptr_val, meta_val),
            RValue::Tuple { vals } => write!(f, "= ({})", DisplayList(vals)),
            RValue::Array { vals } => write!(f, "= [{}]", DisplayList(vals)),
            RValue::UnionVariant { path, index, val } => write!(f, "= UNION {} {} {}", path, index, val),
            RValue::EnumVariant { path, index, vals } => {
                write!(f, "= ENUM {} {} ({})", path, index, DisplayList(vals))
            }
            RValue::Struct { path, vals } => write!(f, "= STRUCT {} ({})", path, DisplayList(vals)),
        }
    }
}

struct DisplayList<'a, T>(&'a [T]);

impl<T: fmt::Display> fmt::Display for DisplayList<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.0.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

/// How much of a value a drop destroys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DropKind {
    /// Free the allocation only (owned boxes whose contents moved out).
    Shallow,
    /// Full recursive drop.
    Deep,
}

/// Legacy template inline assembly.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AsmStmt {
    pub tpl: String,
    pub outputs: Vec<(String, LValue)>,
    pub inputs: Vec<(String, LValue)>,
    pub clobbers: Vec<String>,
    pub flags: Vec<String>,
}

/// One operand of the stabilised inline-assembly form.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AsmParam {
    Const(Constant),
    Sym(hir::Path),
    Reg {
        dir: hir::asm::Direction,
        spec: hir::asm::RegisterSpec,
        input: Option<Param>,
        output: Option<LValue>,
    },
}

/// Stabilised inline assembly.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Asm2Stmt {
    pub options: hir::asm::AsmOptions,
    pub lines: Vec<String>,
    pub params: Vec<AsmParam>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Statement {
    Assign { dst: LValue, src: RValue },
    Asm(AsmStmt),
    Asm2(Asm2Stmt),
    /// `flags[idx] = new_val` or, with `other`, `flags[idx] = new_val XOR
    /// flags[other]`.
    SetDropFlag { idx: FlagId, new_val: bool, other: Option<FlagId> },
    /// Drop the slot; with `flag_idx`, only when the flag is set.
    Drop { kind: DropKind, slot: LValue, flag_idx: Option<FlagId> },
    /// Marker listing locals whose scope ends here. Informational.
    ScopeEnd { slots: Vec<LocalId> },
}

impl Statement {
    /// Visit every lvalue in the statement.
    pub fn visit_lvalues(&self, f: &mut impl FnMut(&LValue)) {
        match self {
            Statement::Assign { dst, src } => {
                src.visit_lvalues(f);
                f(dst);
            }
            Statement::Asm(a) => {
                for (_, lv) in &a.inputs {
                    f(lv);
                }
                for (_, lv) in &a.outputs {
                    f(lv);
                }
            }
            Statement::Asm2(a) => {
                for p in &a.params {
                    if let AsmParam::Reg { input, output, .. } = p {
                        if let Some(i) = input {
                            i.visit_lvalues(f);
                        }
                        if let Some(o) = output {
                            f(o);
                        }
                    }
                }
            }
            Statement::Drop { slot, .. } => f(slot),
            Statement::SetDropFlag { .. } | Statement::ScopeEnd { .. } => {}
        }
    }

    pub fn visit_lvalues_mut(&mut self, f: &mut impl FnMut(&mut LValue)) {
        match self {
            Statement::Assign { dst, src } => {
                src.visit_lvalues_mut(f);
                f(dst);
            }
            Statement::Asm(a) => {
                for (_, lv) in &mut a.inputs {
                    f(lv);
                }
                for (_, lv) in &mut a.outputs {
                    f(lv);
                }
            }
            Statement::Asm2(a) => {
                for p in &mut a.params {
                    if let AsmParam::Reg { input, output, .. } = p {
                        if let Some(i) = input {
                            i.visit_lvalues_mut(f);
                        }
                        if let Some(o) = output {
                            f(o);
                        }
                    }
                }
            }
            Statement::Drop { slot, .. } => f(slot),
            Statement::SetDropFlag { .. } | Statement::ScopeEnd { .. } => {}
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Assign { dst, src } => write!(f, "ASSIGN {} {}", dst, src),
            Statement::Asm(a) => write!(f, "ASM ({:?})", a.tpl),
            Statement::Asm2(a) => {
                write!(f, "ASM2 [{}] (", a.options)?;
                for (i, line) in a.lines.iter().enumerate() {
                    if i != 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{:?}", line)?;
                }
                write!(f, ")")
            }
            Statement::SetDropFlag { idx, new_val, other: None } => {
                write!(f, "SETFLAG df{} = {}", idx.0, new_val)
            }
            Statement::SetDropFlag { idx, new_val, other: Some(o) } => {
                write!(f, "SETFLAG df{} = {} ^ df{}", idx.0, new_val, o.0)
            }
            Statement::Drop { kind, slot, flag_idx } => {
                write!(f, "DROP {}{}", if *kind == DropKind::Shallow { "shallow " } else { "" }, slot)?;
                if let Some(fl) = flag_idx {
                    write!(f, " IF df{}", fl.0)?;
                }
                Ok(())
            }
            Statement::ScopeEnd { slots } => {
                write!(f, "SCOPEEND")?;
                for s in slots {
                    write!(f, " _{}", s.0)?;
                }
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Terminators
// ---------------------------------------------------------------------------

/// Callee of a `Call` terminator.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CallTarget {
    /// Indirect through a function pointer or closure value.
    Value(LValue),
    /// A named function.
    Path(hir::Path),
    /// A compiler intrinsic.
    Intrinsic { name: Symbol, params: hir::PathParams },
}

impl fmt::Display for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallTarget::Value(lv) => write!(f, "({})", lv),
            CallTarget::Path(p) => write!(f, "{}", p),
            CallTarget::Intrinsic { name, params } => write!(f, "\"{}\"{}", name, params),
        }
    }
}

/// The value lists a `SwitchValue` dispatches over.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SwitchValues {
    Unsigned(Vec<u64>),
    Signed(Vec<i64>),
    String(Vec<String>),
    Bytes(Vec<Vec<u8>>),
}

impl SwitchValues {
    pub fn len(&self) -> usize {
        match self {
            SwitchValues::Unsigned(v) => v.len(),
            SwitchValues::Signed(v) => v.len(),
            SwitchValues::String(v) => v.len(),
            SwitchValues::Bytes(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Terminator {
    /// Block not yet finished; an error if it survives lowering.
    Incomplete,
    Return,
    /// Continue unwinding.
    Diverge,
    Goto(BlockId),
    /// Begin unwinding towards the given landing pad.
    Panic(BlockId),
    If { cond: LValue, bb_true: BlockId, bb_false: BlockId },
    /// Dispatch on an enum's variant; one target per variant.
    Switch { val: LValue, targets: Vec<BlockId> },
    /// Dispatch on a list of values, falling back to `def_target`.
    SwitchValue {
        val: LValue,
        def_target: BlockId,
        targets: Vec<BlockId>,
        values: SwitchValues,
    },
    Call {
        ret_block: BlockId,
        panic_block: BlockId,
        ret_val: LValue,
        fcn: CallTarget,
        args: Vec<Param>,
    },
}

impl Terminator {
    /// All successor blocks, in a stable order.
    pub fn targets(&self) -> Vec<BlockId> {
        match self {
            Terminator::Incomplete | Terminator::Return | Terminator::Diverge => Vec::new(),
            Terminator::Goto(bb) | Terminator::Panic(bb) => vec![*bb],
            Terminator::If { bb_true, bb_false, .. } => vec![*bb_true, *bb_false],
            Terminator::Switch { targets, .. } => targets.clone(),
            Terminator::SwitchValue { def_target, targets, .. } => {
                let mut v = targets.clone();
                v.push(*def_target);
                v
            }
            Terminator::Call { ret_block, panic_block, .. } => vec![*ret_block, *panic_block],
        }
    }

    /// Rewrite every block reference in place.
    pub fn visit_targets_mut(&mut self, f: &mut impl FnMut(&mut BlockId)) {
        match self {
            Terminator::Incomplete | Terminator::Return | Terminator::Diverge => {}
            Terminator::Goto(bb) | Terminator::Panic(bb) => f(bb),
            Terminator::If { bb_true, bb_false, .. } => {
                f(bb_true);
                f(bb_false);
            }
            Terminator::Switch { targets, .. } => {
                for t in targets {
                    f(t);
                }
            }
            Terminator::SwitchValue { def_target, targets, .. } => {
                for t in targets {
                    f(t);
                }
                f(def_target);
            }
            Terminator::Call { ret_block, panic_block, .. } => {
                f(ret_block);
                f(panic_block);
            }
        }
    }

    /// Visit lvalues read by the terminator (and the written return slot of
    /// a call, last).
    pub fn visit_lvalues(&self, f: &mut impl FnMut(&LValue)) {
        match self {
            Terminator::If { cond, .. } => f(cond),
            Terminator::Switch { val, .. } | Terminator::SwitchValue { val, .. } => f(val),
            Terminator::Call { ret_val, fcn, args, .. } => {
                if let CallTarget::Value(lv) = fcn {
                    f(lv);
                }
                for a in args {
                    a.visit_lvalues(f);
                }
                f(ret_val);
            }
            _ => {}
        }
    }

    pub fn visit_lvalues_mut(&mut self, f: &mut impl FnMut(&mut LValue)) {
        match self {
            Terminator::If { cond, .. } => f(cond),
            Terminator::Switch { val, .. } | Terminator::SwitchValue { val, .. } => f(val),
            Terminator::Call { ret_val, fcn, args, .. } => {
                if let CallTarget::Value(lv) = fcn {
                    f(lv);
                }
                for a in args {
                    a.visit_lvalues_mut(f);
                }
                f(ret_val);
            }
            _ => {}
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Incomplete => write!(f, "INCOMPLETE"),
            Terminator::Return => write!(f, "RETURN"),
            Terminator::Diverge => write!(f, "DIVERGE"),
            Terminator::Goto(bb) => write!(f, "GOTO bb{}", bb.0),
            Terminator::Panic(bb) => write!(f, "PANIC bb{}", bb.0),
            Terminator::If { cond, bb_true, bb_false } => {
                write!(f, "IF {} goto bb{} else bb{}", cond, bb_true.0, bb_false.0)
            }
            Terminator::Switch { val, targets } => {
                write!(f, "SWITCH {} {{", val)?;
                for (i, t) in targets.iter().enumerate() {
                    if i != 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {} => bb{}", i, t.0)?;
                }
                write!(f, " }}")
            }
            Terminator::SwitchValue { val, def_target, targets, values } => {
                write!(f, "SWITCHVALUE {} {{", val)?;
                for (i, t) in targets.iter().enumerate() {
                    match values {
                        SwitchValues::Unsigned(v) => write!(f, " {} => bb{},", v[i], t.0)?,
                        SwitchValues::Signed(v) => write!(f, " {:+} => bb{},", v[i], t.0)?,
                        SwitchValues::String(v) => write!(f, " {:?} => bb{},", v[i], t.0)?,
                        SwitchValues::Bytes(v) => write!(f, " b\"{}\" => bb{},", escape_bytes(&v[i]), t.0)?,
                    }
                }
                write!(f, " _ => bb{} }}", def_target.0)
            }
            Terminator::Call { ret_block, panic_block, ret_val, fcn, args } => {
                write!(
                    f,
                    "CALL {} = {}({}) goto bb{} else bb{}",
                    ret_val,
                    fcn,
                    DisplayList(args),
                    ret_block.0,
                    panic_block.0
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Blocks and functions
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicBlock {
    pub statements: Vec<Statement>,
    pub terminator: Terminator,
}

impl BasicBlock {
    pub fn new() -> Self {
        BasicBlock { statements: Vec::new(), terminator: Terminator::Incomplete }
    }
}

impl Default for BasicBlock {
    fn default() -> Self {
        BasicBlock::new()
    }
}

/// A MIR function body.
///
/// Locals, drop flags, and blocks are append-only between garbage-collection
/// points; indices handed out stay valid until a GC renumbers everything at
/// once.
#[derive(Clone, Default)]
pub struct Function {
    pub locals: IndexVec<LocalId, TypeRef>,
    pub drop_flags: IndexVec<FlagId, bool>,
    pub blocks: IndexVec<BlockId, BasicBlock>,
}

impl Function {
    pub fn new() -> Self {
        Function::default()
    }

    pub fn new_local(&mut self, ty: TypeRef) -> LocalId {
        self.locals.push(ty)
    }

    pub fn new_block(&mut self) -> BlockId {
        self.blocks.push(BasicBlock::new())
    }

    pub fn new_drop_flag(&mut self, initial: bool) -> FlagId {
        self.drop_flags.push(initial)
    }

    pub const ENTRY: BlockId = BlockId(0);
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("locals", &self.locals.len())
            .field("drop_flags", &self.drop_flags.len())
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lv_local(i: u32) -> LValue {
        LValue::new_local(LocalId(i))
    }

    #[test]
    fn subset_by_wrapper_prefix() {
        let a = lv_local(1).field(0);
        let b = lv_local(1).field(0).deref();
        assert!(a.is_subset_of(&b));
        assert!(!b.is_subset_of(&a));
        assert!(a.is_either_subset(&b));
        assert!(!a.is_subset_of(&lv_local(2)));
    }

    #[test]
    fn clone_wrapped_appends() {
        let a = lv_local(3).field(1);
        let b = a.clone_wrapped([Wrapper::Deref]);
        assert_eq!(b, lv_local(3).field(1).deref());
        assert_eq!(b.clone_unwrapped(1), a);
    }

    #[test]
    fn replace_prefix_keeps_outer_wrappers() {
        // *_1.0 with the `_1.0` view replaced by `_5` becomes *_5
        let mut lv = lv_local(1).field(0).deref();
        lv.replace_prefix(1, lv_local(5));
        assert_eq!(lv, lv_local(5).deref());
    }

    #[test]
    fn constant_ordering_is_total() {
        let nan = Constant::Float { v: f64::NAN, t: CoreType::F64 };
        assert_eq!(nan.cmp(&nan), Ordering::Equal);
        let a = Constant::Uint { v: 1, t: CoreType::U32 };
        let b = Constant::Uint { v: 2, t: CoreType::U32 };
        assert!(a < b);
    }

    #[test]
    fn terminator_target_listing() {
        let t = Terminator::Call {
            ret_block: BlockId(3),
            panic_block: BlockId(4),
            ret_val: lv_local(0),
            fcn: CallTarget::Value(lv_local(1)),
            args: Vec::new(),
        };
        assert_eq!(t.targets(), vec![BlockId(3), BlockId(4)]);
    }

    #[test]
    fn display_of_places() {
        let lv = lv_local(1).field(0).deref();
        assert_eq!(format!("{}", lv), "*_1.0");
        let lv = LValue::new_argument(2).downcast(1).field(3);
        assert_eq!(format!("{}", lv), "a2@1.3");
    }
}
