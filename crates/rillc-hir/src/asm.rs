//! Inline assembly support types, shared between the HIR nodes and the MIR
//! statement forms.

use rillc_util::Symbol;
use std::fmt;

/// Option bitmask for the stabilised `asm!` form.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct AsmOptions {
    bits: u16,
}

impl AsmOptions {
    pub const PURE: u16 = 1 << 0;
    pub const NOMEM: u16 = 1 << 1;
    pub const READONLY: u16 = 1 << 2;
    pub const PRESERVES_FLAGS: u16 = 1 << 3;
    pub const NORETURN: u16 = 1 << 4;
    pub const NOSTACK: u16 = 1 << 5;
    pub const ATT_SYNTAX: u16 = 1 << 6;

    pub fn new() -> Self {
        AsmOptions::default()
    }

    pub fn with(mut self, flag: u16) -> Self {
        self.bits |= flag;
        self
    }

    pub fn contains(self, flag: u16) -> bool {
        self.bits & flag != 0
    }

    pub fn bits(self) -> u16 {
        self.bits
    }
}

impl fmt::Display for AsmOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::PURE, "pure"),
            (Self::NOMEM, "nomem"),
            (Self::READONLY, "readonly"),
            (Self::PRESERVES_FLAGS, "preserves_flags"),
            (Self::NORETURN, "noreturn"),
            (Self::NOSTACK, "nostack"),
            (Self::ATT_SYNTAX, "att_syntax"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    write!(f, ",")?;
                }
                first = false;
                write!(f, "{}", name)?;
            }
        }
        Ok(())
    }
}

/// Data direction of a register operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
    LateOut,
    InOut,
    InLateOut,
}

impl Direction {
    pub fn reads(self) -> bool {
        matches!(self, Direction::In | Direction::InOut | Direction::InLateOut)
    }

    pub fn writes(self) -> bool {
        !matches!(self, Direction::In)
    }
}

/// A register constraint: a class name or an explicit register.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RegisterSpec {
    Class(Symbol),
    Explicit(Symbol),
}

impl fmt::Display for RegisterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterSpec::Class(s) => write!(f, "{}", s),
            RegisterSpec::Explicit(s) => write!(f, "\"{}\"", s),
        }
    }
}
