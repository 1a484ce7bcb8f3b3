//! Compilation options.

/// Knobs for one [`Compiler`](crate::compiler::Compiler).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// LLVM `default<On>` pipeline run before JIT execution, 0 to 3.
    pub opt_level: u8,
    /// Verify the LLVM module after emission.
    pub verify: bool,
    /// Log the typed IR and the LLVM IR at debug level.
    pub dump_ir: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            opt_level: 0,
            verify: true,
            dump_ir: false,
        }
    }
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Levels above 3 are clamped.
    pub fn with_opt_level(mut self, level: u8) -> Self {
        self.opt_level = level.min(3);
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_dump_ir(mut self, dump_ir: bool) -> Self {
        self.dump_ir = dump_ir;
        self
    }
}
