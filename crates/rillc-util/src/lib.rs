//! rillc-util - Foundation types for the rillc compiler.
//!
//! Zero-cost building blocks shared by every compiler phase: typed index
//! vectors, source spans, interned symbols, and the diagnostic sink.

pub mod diagnostic;
pub mod index_vec;
pub mod span;
pub mod symbol;

pub use diagnostic::{Diagnostic, Handler, Level};
pub use index_vec::{Idx, IndexVec};
pub use span::{FileId, Span};
pub use symbol::Symbol;

// Re-export the hashers used throughout the compiler.
pub use rustc_hash::{FxHashMap, FxHashSet};
