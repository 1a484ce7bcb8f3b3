//! stackjit - ahead-of-time compilation of stack bytecode through LLVM.
//!
//! A function's disassembly listing is simulated on an operand stack to build
//! a linked instruction graph. The functions it calls are built the same way,
//! and every value of the program gets a concrete type from a fixpoint
//! inference over a small lattice (`bool`, `int`, `float`, `void`, ranges and
//! fixed-length arrays). Each typed graph is split into blocks, put into SSA
//! form and lowered to LLVM IR. A generated stub binds the call-site
//! arguments so the result can be run through MCJIT with no marshalling at
//! the call boundary.
//!
//! # Primary Usage
//!
//! ```ignore
//! use stackjit::{parse_listing, CompilationSession, CompileOptions, Compiler, Scalar};
//! use bumpalo::Bump;
//! use inkwell::context::Context;
//!
//! let listing = parse_listing(&text)?;
//!
//! let arena = Bump::new();
//! let session = CompilationSession::new(&arena);
//! let context = Context::create();
//! let compiler = Compiler::new(&context, &session, CompileOptions::default());
//!
//! let compiled = compiler.compile(&listing, "add", &[Scalar::Int(3), Scalar::Float(4.0)])?;
//! println!("{}", compiled.ir_text());
//! let result = compiled.into_jit(0)?.run()?;
//! ```
//!
//! # Architecture
//!
//! - [`bytecode`] - Instruction records, opcode table and the listing parser
//! - [`ir`] - Typed IR, the stack-simulating builder, call-graph discovery,
//!   inference and CFG/SSA
//! - [`ops`] - Per-opcode stack effects, inference and lowering rules
//! - [`llvm`] - LLVM emission, the entry stub, runtime faults and the JIT runner
//! - [`core`] - Shared infrastructure (types, errors, session)

pub mod bytecode;
pub mod compiler;
pub mod config;
pub mod core;
pub mod ir;
pub mod llvm;
pub mod ops;

pub use bytecode::{
    parse_listing, FunctionCode, Listing, Opcode, Operand, Scalar, SourceLoc, Value,
};
pub use compiler::{run_function, CompiledModule, Compiler};
pub use config::CompileOptions;
pub use core::{
    CompilationSession, CompileError, CompileResult, Elem, Error, ListingError, RuntimeError,
    SessionStats, Type,
};
pub use ir::Program;
pub use llvm::JitModule;
