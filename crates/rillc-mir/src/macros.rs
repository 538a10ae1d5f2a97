//! Error-reporting macros used across the MIR passes.
//!
//! `bug!` is for invariant violations (malformed MIR, impossible states);
//! `user_err!` is for problems in the user's program. Both return early with
//! the corresponding [`crate::MirError`] variant.

macro_rules! bug {
    ($sp:expr, $($arg:tt)+) => {
        return Err($crate::MirError::bug($sp, format!($($arg)+)))
    };
}

macro_rules! user_err {
    ($sp:expr, $($arg:tt)+) => {
        return Err($crate::MirError::user($sp, format!($($arg)+)))
    };
}
