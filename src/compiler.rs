// This module provides the driver that runs an entry function and everything it calls through
// the whole pipeline: the program builder turns the bytecode of every reachable listing
// function into a linked instruction graph, type inference runs to a fixpoint across the
// program and checks that every value received a type, the control-flow assembler forms
// blocks and builds SSA for the locals of each function, a second inference run types the
// variable phis it inserted, and the emitter lowers the result into a fresh LLVM module
// together with the module globals and the argument-binding stub of the entry function. The
// typed IR is owned by the driver for the duration of one call and dropped afterwards,
// whether compilation succeeded or faulted; the session only keeps the interned names and
// the statistics. CompiledModule owns the finished LLVM module and can be printed or handed
// to the JIT.

//! Program compilation driver.

use crate::bytecode::{Listing, Scalar, Value};
use crate::config::CompileOptions;
use crate::core::{CompilationSession, CompileError, CompileResult, Error, RuntimeError, Type};
use crate::ir::{cfg, Program};
use crate::llvm::{
    declare_function, declare_globals, emit_function, emit_stub, stub_name, JitModule,
};
use bumpalo::Bump;
use inkwell::context::Context;
use inkwell::module::Module;

/// Compiles listing functions into LLVM modules owned by one context.
pub struct Compiler<'ctx, 's, 'arena> {
    context: &'ctx Context,
    session: &'s CompilationSession<'arena>,
    options: CompileOptions,
}

impl<'ctx, 's, 'arena> Compiler<'ctx, 's, 'arena> {
    pub fn new(
        context: &'ctx Context,
        session: &'s CompilationSession<'arena>,
        options: CompileOptions,
    ) -> Self {
        Self {
            context,
            session,
            options,
        }
    }

    /// Build, type and assemble the IR of `entry` called with `args`,
    /// together with every function it calls.
    pub fn lower_to_ir(
        &self,
        listing: &Listing,
        entry: &str,
        args: &[Scalar],
    ) -> CompileResult<Program<'arena>> {
        let mut program = Program::build(listing, entry, args, self.session)?;
        let rounds = program.infer_to_fixpoint(self.session)?;
        program.check_resolved()?;
        for func in &mut program.functions {
            cfg::assemble(func, self.session)?;
        }
        program.infer_to_fixpoint(self.session)?;

        for func in &program.functions {
            log::debug!(
                "{}: types settled after {} rounds, returns {}",
                func.name,
                rounds,
                func.ty(func.result)
            );
            if self.options.dump_ir {
                log::debug!("typed IR of {}:\n{}", func.name, func.print());
            }
        }
        Ok(program)
    }

    /// Compile `entry` of `listing` for the given call-site arguments.
    pub fn compile(
        &self,
        listing: &Listing,
        entry: &str,
        args: &[Scalar],
    ) -> CompileResult<CompiledModule<'ctx>> {
        let rendered: Vec<String> = args.iter().map(Scalar::to_string).collect();
        log::info!("Compiling {entry}({})", rendered.join(", "));
        self.session.set_current_function(entry);
        let result = self.compile_inner(listing, entry, args);
        if let Err(e) = &result {
            log::info!("Compilation of {entry} failed: {e}");
        }
        self.session.clear_function_state();
        result
    }

    fn compile_inner(
        &self,
        listing: &Listing,
        entry: &str,
        args: &[Scalar],
    ) -> CompileResult<CompiledModule<'ctx>> {
        let program = self.lower_to_ir(listing, entry, args)?;
        let module = self.context.create_module(entry);
        for func in &program.functions {
            declare_function(self.context, &module, func)?;
        }
        declare_globals(self.context, &module, &program)?;
        for func in &program.functions {
            self.session.set_current_function(func.name);
            emit_function(self.context, &module, func, self.session)?;
        }
        self.session.set_current_function(entry);

        let main = program.entry();
        let target = module
            .get_function(main.name)
            .ok_or_else(|| CompileError::backend(format!("{} was never emitted", main.name)))?;
        emit_stub(self.context, &module, main, target, args)?;

        if self.options.dump_ir {
            log::debug!("LLVM IR of {entry}:\n{}", module.print_to_string());
        }
        if self.options.verify {
            module
                .verify()
                .map_err(|e| CompileError::backend(format!("module verification failed: {e}")))?;
        }

        for func in &program.functions {
            let size = listing.function(func.name).map_or(0, |code| code.instrs.len());
            self.session.record_function_compiled(func.name, size);
        }
        Ok(CompiledModule {
            module,
            function: main.name.to_string(),
            return_type: main.ty(main.result),
        })
    }
}

/// A verified LLVM module holding the compiled functions and the entry stub.
pub struct CompiledModule<'ctx> {
    module: Module<'ctx>,
    function: String,
    return_type: Type,
}

impl<'ctx> CompiledModule<'ctx> {
    pub fn module(&self) -> &Module<'ctx> {
        &self.module
    }

    pub fn function_name(&self) -> &str {
        &self.function
    }

    pub fn stub_name(&self) -> String {
        stub_name(&self.function)
    }

    pub fn return_type(&self) -> Type {
        self.return_type
    }

    /// Textual LLVM IR of the module.
    pub fn ir_text(&self) -> String {
        self.module.print_to_string().to_string()
    }

    /// Hand the module to MCJIT, optimising it first when `opt_level > 0`.
    pub fn into_jit(self, opt_level: u8) -> Result<JitModule<'ctx>, RuntimeError> {
        let stub = self.stub_name();
        JitModule::new(self.module, stub, self.return_type, opt_level)
    }
}

/// Compile `entry` with `args` and run it in a throwaway context.
pub fn run_function(
    listing: &Listing,
    entry: &str,
    args: &[Scalar],
    options: CompileOptions,
) -> Result<Value, Error> {
    let context = Context::create();
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let compiler = Compiler::new(&context, &session, options);
    let compiled = compiler.compile(listing, entry, args)?;
    let jit = compiled.into_jit(options.opt_level)?;
    let value = jit.run()?;
    log::info!("{entry}({} args) returned {value}", args.len());
    Ok(value)
}
