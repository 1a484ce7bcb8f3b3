//! Type lattice used by the inferencer.
//!
//! ```text
//!            float        bool      void    range    int[n] / float[n]
//!              |           |         |        |           |
//!             int          |         |        |           |
//!               \          |        /         |           |
//!                 ---------------- unknown --------------
//! ```
//!
//! `unify` is the join of this lattice. Joining two types that share no upper
//! bound (`bool` with `int`, anything with `void`, arrays of different shape)
//! is a typing fault.

use super::error::{CompileError, CompileResult};
use std::fmt;

/// Element type of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Elem {
    Int,
    Float,
}

impl Elem {
    pub fn ty(self) -> Type {
        match self {
            Elem::Int => Type::Int,
            Elem::Float => Type::Float,
        }
    }
}

/// Concrete type of a value, or `Unknown` while inference has not reached it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Type {
    #[default]
    Unknown,
    Bool,
    /// 64-bit signed integer.
    Int,
    /// 64-bit IEEE float.
    Float,
    /// Result type of a function that returns `None`.
    Void,
    /// Iterator state of `range(...)`.
    Range,
    /// Heap array of fixed length.
    Array(Elem, u32),
}

impl Type {
    pub fn is_known(self) -> bool {
        self != Type::Unknown
    }

    /// Values held behind a pointer rather than in a register.
    pub fn on_heap(self) -> bool {
        matches!(self, Type::Array(..))
    }

    /// Lattice join. Commutative, idempotent and never yields `Unknown` when
    /// either side is known.
    pub fn unify(self, other: Type) -> CompileResult<Type> {
        use Type::*;
        match (self, other) {
            (a, b) if a == b => Ok(a),
            (Unknown, t) | (t, Unknown) => Ok(t),
            (Int, Float) | (Float, Int) => Ok(Float),
            (a, b) => Err(CompileError::typing(format!(
                "Unifying of types {a} and {b} not yet implemented"
            ))),
        }
    }

    /// Partial order of the lattice: `self ⊑ other`.
    pub fn leq(self, other: Type) -> bool {
        self == other
            || self == Type::Unknown
            || (self == Type::Int && other == Type::Float)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Type::Unknown => "?",
            Type::Bool => "bool",
            Type::Int => "int",
            Type::Float => "float",
            Type::Void => "void",
            Type::Range => "range",
            Type::Array(elem, len) => return write!(f, "{}[{len}]", elem.ty()),
        };
        f.write_str(name)
    }
}
