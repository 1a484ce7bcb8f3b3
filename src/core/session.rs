// This module provides arena-based compilation session management using the bumpalo crate
// to keep the IR free of lifetime juggling. CompilationSession is the hub shared by every
// stage of the pipeline for one or more function compilations: it owns a reference to the
// arena that backs interned variable and function names, remembers which function is being
// compiled (for log messages), and accumulates statistics. SessionStats tracks how many
// functions were compiled, how many instructions of each opcode were lowered, how many
// inference passes ran before the types settled, how many backend conversions were
// materialised for cast values and how many phi nodes the builder and the control-flow
// assembler inserted. Per-function IR is owned by the compilation context, not the session,
// so a fault in one function leaves the session usable for the next.

//! Arena-based compilation session management.
//!
//! Names handed out by [`CompilationSession::intern_str`] live as long as the
//! arena, so IR nodes can hold `&'arena str` without further bookkeeping.

use bumpalo::Bump;
use hashbrown::HashMap;
use std::cell::RefCell;
use std::fmt;

/// Arena-based compilation session.
pub struct CompilationSession<'arena> {
    /// Arena allocator for compilation objects.
    arena: &'arena Bump,

    /// Session statistics for debugging and tests.
    stats: RefCell<SessionStats>,

    /// String interning for variable and function names.
    interned_strings: RefCell<HashMap<String, &'arena str>>,

    /// Current function being compiled.
    current_function: RefCell<Option<String>>,
}

impl<'arena> CompilationSession<'arena> {
    /// Create a new compilation session with the given arena.
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
            interned_strings: RefCell::new(HashMap::new()),
            current_function: RefCell::new(None),
        }
    }

    /// Intern a string in the arena.
    pub fn intern_str(&self, s: &str) -> &'arena str {
        let mut strings = self.interned_strings.borrow_mut();
        if let Some(&interned) = strings.get(s) {
            return interned;
        }

        let interned = self.arena.alloc_str(s);
        strings.insert(s.to_string(), interned);
        interned
    }

    /// Set current function being compiled.
    pub fn set_current_function(&self, name: &str) {
        *self.current_function.borrow_mut() = Some(name.to_string());
    }

    pub fn current_function(&self) -> Option<String> {
        self.current_function.borrow().clone()
    }

    /// Clear per-function state once a compilation finished or faulted.
    pub fn clear_function_state(&self) {
        *self.current_function.borrow_mut() = None;
    }

    /// Record that a function was compiled.
    pub fn record_function_compiled(&self, name: &str, instruction_count: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.functions_compiled += 1;

        if stats.largest_function_size < instruction_count {
            stats.largest_function_size = instruction_count;
            stats.largest_function_name = name.to_string();
        }
    }

    /// Record the lowering of one instruction.
    pub fn record_instruction_lowered(&self, opcode: &str) {
        let mut stats = self.stats.borrow_mut();
        stats.instructions_lowered += 1;
        *stats
            .instruction_counts
            .entry(opcode.to_string())
            .or_insert(0) += 1;
    }

    /// Record one full inference pass over a function.
    pub fn record_retype_pass(&self) {
        self.stats.borrow_mut().retype_passes += 1;
    }

    /// Record a backend conversion emitted for a cast value.
    pub fn record_cast_emitted(&self) {
        self.stats.borrow_mut().casts_emitted += 1;
    }

    /// Record a phi node inserted at a join.
    pub fn record_phi_inserted(&self) {
        self.stats.borrow_mut().phis_inserted += 1;
    }

    /// Get compilation statistics.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Compilation session statistics.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    /// Number of functions compiled.
    pub functions_compiled: usize,

    /// Number of instructions lowered to LLVM.
    pub instructions_lowered: usize,

    /// Count of each opcode lowered.
    pub instruction_counts: std::collections::HashMap<String, usize>,

    /// Largest function compiled, in source instructions.
    pub largest_function_size: usize,

    /// Name of largest function.
    pub largest_function_name: String,

    /// Inference passes run, including the final clean one.
    pub retype_passes: usize,

    /// Backend conversions materialised for cast values.
    pub casts_emitted: usize,

    /// Stack and variable phis inserted.
    pub phis_inserted: usize,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation Session Statistics:")?;
        writeln!(f, "  Functions compiled: {}", self.functions_compiled)?;
        writeln!(f, "  Instructions lowered: {}", self.instructions_lowered)?;
        writeln!(f, "  Retype passes: {}", self.retype_passes)?;
        writeln!(f, "  Casts emitted: {}", self.casts_emitted)?;
        writeln!(f, "  Phi nodes inserted: {}", self.phis_inserted)?;

        if !self.largest_function_name.is_empty() {
            writeln!(
                f,
                "  Largest function: {} ({} instructions)",
                self.largest_function_name, self.largest_function_size
            )?;
        }

        if !self.instruction_counts.is_empty() {
            writeln!(f, "  Instruction breakdown:")?;
            let mut sorted: Vec<_> = self.instruction_counts.iter().collect();
            sorted.sort_by_key(|(opcode, count)| (std::cmp::Reverse(**count), opcode.as_str()));

            for (opcode, count) in sorted.into_iter().take(10) {
                writeln!(f, "    {}: {}", opcode, count)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compilation_session_creation() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        let stats = session.stats();
        assert_eq!(stats.functions_compiled, 0);
        assert_eq!(stats.instructions_lowered, 0);
        assert_eq!(stats.casts_emitted, 0);
        assert_eq!(session.current_function(), None);
    }

    #[test]
    fn test_string_interning() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        let s1 = session.intern_str("total");
        let s2 = session.intern_str("total");
        let s3 = session.intern_str("count");

        assert_eq!(s1.as_ptr(), s2.as_ptr());
        assert_ne!(s1.as_ptr(), s3.as_ptr());
    }

    #[test]
    fn test_session_statistics() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        session.set_current_function("fib");
        session.record_function_compiled("fib", 24);
        session.record_instruction_lowered("BINARY_ADD");
        session.record_instruction_lowered("COMPARE_OP");
        session.record_instruction_lowered("BINARY_ADD");
        session.record_retype_pass();
        session.record_retype_pass();
        session.record_cast_emitted();
        session.record_phi_inserted();

        let stats = session.stats();
        assert_eq!(stats.functions_compiled, 1);
        assert_eq!(stats.instructions_lowered, 3);
        assert_eq!(stats.instruction_counts["BINARY_ADD"], 2);
        assert_eq!(stats.instruction_counts["COMPARE_OP"], 1);
        assert_eq!(stats.retype_passes, 2);
        assert_eq!(stats.casts_emitted, 1);
        assert_eq!(stats.phis_inserted, 1);
        assert_eq!(session.current_function().as_deref(), Some("fib"));

        session.clear_function_state();
        assert_eq!(session.current_function(), None);
    }

    #[test]
    fn test_statistics_display() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        session.record_function_compiled("factorial", 16);
        session.record_instruction_lowered("BINARY_MULTIPLY");
        session.record_instruction_lowered("RETURN_VALUE");

        let output = format!("{}", session.stats());
        assert!(output.contains("Functions compiled: 1"));
        assert!(output.contains("Instructions lowered: 2"));
        assert!(output.contains("factorial (16 instructions)"));
    }
}
