// This module defines the fault types of the compiler using the thiserror crate for
// idiomatic Rust error handling. CompileError covers everything that can stop a function
// from compiling: opcodes with no legalisation rule, operand types that cannot be unified,
// reads of locals with no reaching write, recognised constructs that are intentionally
// not handled, backend (LLVM builder or verifier) failures and malformed listings. Every
// variant carries an optional source location that is filled in while the error travels
// outwards through the per-instruction drivers. RuntimeError covers failures of the JIT
// harness as well as the Python-level faults raised while compiled code runs, and Error
// wraps both so callers can tell "could not compile" apart from
// "failed while running".

//! Error types for the compiler.

use crate::bytecode::SourceLoc;
use thiserror::Error;

fn at(location: &Option<SourceLoc>) -> String {
    match location {
        Some(loc) => format!(" at {loc}"),
        None => String::new(),
    }
}

/// A malformed disassembly listing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("listing line {line}: {message}")]
pub struct ListingError {
    pub line: usize,
    pub message: String,
}

/// Main error type for function compilation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("Unsupported operation {opcode}: {detail}{}", at(.location))]
    UnsupportedOperation {
        opcode: String,
        detail: String,
        location: Option<SourceLoc>,
    },

    #[error("{message}{}", at(.location))]
    TypingFault {
        message: String,
        location: Option<SourceLoc>,
    },

    #[error("Variable '{name}' may be read before assignment{}", at(.location))]
    UndefinedVariable {
        name: String,
        location: Option<SourceLoc>,
    },

    #[error("Not implemented: {feature}{}", at(.location))]
    Unimplemented {
        feature: String,
        location: Option<SourceLoc>,
    },

    #[error("Function {name} is not defined in the listing")]
    UnknownFunction { name: String },

    #[error("{function} takes {expected} arguments but {found} were given")]
    ArgumentCount {
        function: String,
        expected: usize,
        found: usize,
    },

    #[error("Code generation failed: {reason}{}", at(.location))]
    Backend {
        reason: String,
        location: Option<SourceLoc>,
    },

    #[error(transparent)]
    Listing(#[from] ListingError),
}

impl CompileError {
    pub fn unsupported(opcode: impl Into<String>, detail: impl Into<String>) -> Self {
        CompileError::UnsupportedOperation {
            opcode: opcode.into(),
            detail: detail.into(),
            location: None,
        }
    }

    pub fn typing(message: impl Into<String>) -> Self {
        CompileError::TypingFault {
            message: message.into(),
            location: None,
        }
    }

    pub fn undefined(name: impl Into<String>) -> Self {
        CompileError::UndefinedVariable {
            name: name.into(),
            location: None,
        }
    }

    pub fn unimplemented(feature: impl Into<String>) -> Self {
        CompileError::Unimplemented {
            feature: feature.into(),
            location: None,
        }
    }

    pub fn backend(reason: impl Into<String>) -> Self {
        CompileError::Backend {
            reason: reason.into(),
            location: None,
        }
    }

    /// Attach a source location unless a more precise one is already present.
    pub fn at(mut self, loc: &SourceLoc) -> Self {
        match &mut self {
            CompileError::UnsupportedOperation { location, .. }
            | CompileError::TypingFault { location, .. }
            | CompileError::UndefinedVariable { location, .. }
            | CompileError::Unimplemented { location, .. }
            | CompileError::Backend { location, .. } => {
                if location.is_none() {
                    *location = Some(loc.clone());
                }
            }
            CompileError::ArgumentCount { .. }
            | CompileError::UnknownFunction { .. }
            | CompileError::Listing(_) => {}
        }
        self
    }

    pub fn location(&self) -> Option<&SourceLoc> {
        match self {
            CompileError::UnsupportedOperation { location, .. }
            | CompileError::TypingFault { location, .. }
            | CompileError::UndefinedVariable { location, .. }
            | CompileError::Unimplemented { location, .. }
            | CompileError::Backend { location, .. } => location.as_ref(),
            CompileError::ArgumentCount { .. }
            | CompileError::UnknownFunction { .. }
            | CompileError::Listing(_) => None,
        }
    }
}

impl From<inkwell::builder::BuilderError> for CompileError {
    fn from(e: inkwell::builder::BuilderError) -> Self {
        CompileError::backend(format!("{e:?}"))
    }
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;

/// Failure of the JIT harness while preparing or running compiled code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Failed to initialise native target: {0}")]
    TargetInit(String),

    #[error("Failed to create execution engine: {0}")]
    EngineCreation(String),

    #[error("Optimisation pipeline failed: {0}")]
    Optimization(String),

    #[error("Compiled entry point {name} not found: {reason}")]
    SymbolLookup { name: String, reason: String },

    #[error("ZeroDivisionError: division or modulo by zero")]
    ZeroDivision,

    #[error("OverflowError: result does not fit a 64-bit integer")]
    Overflow,

    #[error("IndexError: array index out of range")]
    IndexOutOfRange,

    #[error("ValueError: range() step must not be zero")]
    ZeroStep,
}

/// Either side of the compile/run boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("compilation failed: {0}")]
    Compile(#[from] CompileError),

    #[error("execution failed: {0}")]
    Runtime(#[from] RuntimeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_is_attached_once() {
        let inner = SourceLoc::new("inner.py", 3);
        let outer = SourceLoc::new("outer.py", 9);
        let err = CompileError::typing("Comparing different types (int with float)")
            .at(&inner)
            .at(&outer);
        assert_eq!(err.location(), Some(&inner));
        assert_eq!(
            err.to_string(),
            "Comparing different types (int with float) at inner.py:3"
        );
    }

    #[test]
    fn test_compile_and_runtime_are_distinct() {
        let compile: Error = CompileError::undefined("r").into();
        let runtime: Error = RuntimeError::EngineCreation("no target".into()).into();
        assert!(matches!(compile, Error::Compile(CompileError::UndefinedVariable { .. })));
        assert!(matches!(runtime, Error::Runtime(_)));
        assert!(compile.to_string().starts_with("compilation failed"));
        assert!(runtime.to_string().starts_with("execution failed"));
    }

    #[test]
    fn test_listing_error_display() {
        let err: CompileError = ListingError {
            line: 4,
            message: "unknown opcode FROB".into(),
        }
        .into();
        assert_eq!(err.to_string(), "listing line 4: unknown opcode FROB");
        assert_eq!(err.location(), None);
    }
}
