//! Item paths.
//!
//! `SimplePath` names an item; `GenericPath` adds type parameters; `Path`
//! additionally covers UFCS forms (`<T as Trait>::item`, `<T>::item`).

use crate::types::{LifetimeRef, TypeRef};
use rillc_util::Symbol;
use std::fmt;

/// An absolute item path: crate name plus components.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimplePath {
    pub crate_name: Symbol,
    pub components: Vec<Symbol>,
}

impl SimplePath {
    pub fn new(crate_name: Symbol, components: Vec<Symbol>) -> Self {
        SimplePath { crate_name, components }
    }

    /// Parse `"crate::a::b"` shorthand, used pervasively by tests.
    pub fn from_str(s: &str) -> Self {
        let mut it = s.split("::");
        let crate_name = Symbol::intern(it.next().unwrap_or(""));
        SimplePath { crate_name, components: it.map(Symbol::intern).collect() }
    }

    pub fn last(&self) -> Option<Symbol> {
        self.components.last().copied()
    }

    /// A copy of this path with one more trailing component.
    pub fn child(&self, name: Symbol) -> SimplePath {
        let mut components = self.components.clone();
        components.push(name);
        SimplePath { crate_name: self.crate_name, components }
    }

    /// A copy with the final component removed.
    pub fn parent(&self) -> SimplePath {
        let mut components = self.components.clone();
        components.pop();
        SimplePath { crate_name: self.crate_name, components }
    }
}

impl fmt::Display for SimplePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.crate_name)?;
        for c in &self.components {
            write!(f, "::{}", c)?;
        }
        Ok(())
    }
}

/// Parameters applied to a generic item.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PathParams {
    pub lifetimes: Vec<LifetimeRef>,
    pub types: Vec<TypeRef>,
}

impl PathParams {
    pub fn new(types: Vec<TypeRef>) -> Self {
        PathParams { lifetimes: Vec::new(), types }
    }

    pub fn is_empty(&self) -> bool {
        self.lifetimes.is_empty() && self.types.is_empty()
    }
}

impl fmt::Display for PathParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        write!(f, "<")?;
        let mut first = true;
        for lft in &self.lifetimes {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}", lft)?;
        }
        for ty in &self.types {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}", ty)?;
        }
        write!(f, ">")
    }
}

/// A path with generic parameters applied.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenericPath {
    pub path: SimplePath,
    pub params: PathParams,
}

impl GenericPath {
    pub fn new(path: SimplePath, params: PathParams) -> Self {
        GenericPath { path, params }
    }

    pub fn plain(path: SimplePath) -> Self {
        GenericPath { path, params: PathParams::default() }
    }
}

impl fmt::Display for GenericPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.path, self.params)
    }
}

/// A full value path, including UFCS forms.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Path {
    /// `a::b::c::<Params>`
    Generic(GenericPath),
    /// `<T as Trait>::item::<Params>`
    UfcsKnown {
        ty: TypeRef,
        trait_: GenericPath,
        item: Symbol,
        params: PathParams,
    },
    /// `<T>::item::<Params>` (inherent impl)
    UfcsInherent {
        ty: TypeRef,
        item: Symbol,
        params: PathParams,
    },
}

impl Path {
    pub fn generic(gp: GenericPath) -> Self {
        Path::Generic(gp)
    }

    pub fn plain(sp: SimplePath) -> Self {
        Path::Generic(GenericPath::plain(sp))
    }

    pub fn as_generic(&self) -> Option<&GenericPath> {
        match self {
            Path::Generic(gp) => Some(gp),
            _ => None,
        }
    }

    /// The final item name the path refers to.
    pub fn item_name(&self) -> Option<Symbol> {
        match self {
            Path::Generic(gp) => gp.path.last(),
            Path::UfcsKnown { item, .. } | Path::UfcsInherent { item, .. } => Some(*item),
        }
    }
}

impl From<GenericPath> for Path {
    fn from(gp: GenericPath) -> Self {
        Path::Generic(gp)
    }
}

impl From<SimplePath> for Path {
    fn from(sp: SimplePath) -> Self {
        Path::plain(sp)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Path::Generic(gp) => write!(f, "{}", gp),
            Path::UfcsKnown { ty, trait_, item, params } => {
                write!(f, "<{} as {}>::{}{}", ty, trait_, item, params)
            }
            Path::UfcsInherent { ty, item, params } => {
                write!(f, "<{}>::{}{}", ty, item, params)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let p = SimplePath::from_str("core::option::Option");
        assert_eq!(p.components.len(), 2);
        assert_eq!(format!("{}", p), "core::option::Option");
    }

    #[test]
    fn child_and_parent() {
        let p = SimplePath::from_str("core::mem");
        let q = p.child(Symbol::intern("swap"));
        assert_eq!(format!("{}", q), "core::mem::swap");
        assert_eq!(q.parent(), p);
    }
}
