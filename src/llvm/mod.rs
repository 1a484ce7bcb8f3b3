//! LLVM backend.
//!
//! [`emitter`] lowers a typed, block-structured function into an LLVM
//! function, [`stub`] wraps it in a zero-argument entry point that binds the
//! call-site arguments, and [`jit`] runs the result through MCJIT with the
//! host routines of [`runtime`] mapped in.
//!
//! # Example
//! ```ignore
//! use stackjit::llvm::{declare_function, emit_function, emit_stub};
//!
//! let module = context.create_module("add");
//! declare_function(&context, &module, &func)?;
//! let function = emit_function(&context, &module, &func, &session)?;
//! let stub = emit_stub(&context, &module, &func, function, &args)?;
//! ```

pub mod emitter;
pub mod jit;
pub mod runtime;
pub mod stub;

pub use emitter::{declare_function, declare_globals, emit_function, Emitter};
pub use jit::JitModule;
pub use runtime::Fault;
pub use stub::{emit_stub, stub_name, StubReturn};
