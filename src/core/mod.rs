// This module gathers the infrastructure shared by every stage of the stackjit pipeline:
// the scalar type lattice that inference computes over, the structured fault types
// surfaced to callers, and the arena-backed compilation session that interns names and
// accumulates statistics. None of these pieces know about opcodes or LLVM; the IR, the
// opcode handlers and the emitter build on top of them.

//! Core infrastructure: types, errors and the compilation session.

pub mod error;
pub mod session;
pub mod test_utils;
pub mod types;

pub use error::{CompileError, CompileResult, Error, ListingError, RuntimeError};
pub use session::{CompilationSession, SessionStats};
pub use types::{Elem, Type};
