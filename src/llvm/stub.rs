//! Zero-argument entry stub.
//!
//! The stub binds the call-site arguments as private constant globals, loads
//! them, calls the compiled function and hands the result back in a form the
//! host can read through a plain `extern "C"` signature: `i64`, `double`,
//! `i8` for booleans, nothing, or a pointer to the elements of a returned
//! array. It also lowers the fault flag before calling in.

use super::emitter::{basic_type, scalar_constant};
use super::runtime::FAULT_FLAG;
use crate::bytecode::Scalar;
use crate::core::{CompileError, CompileResult, Type};
use crate::ir::Function;
use inkwell::context::Context;
use inkwell::module::{Linkage, Module};
use inkwell::types::BasicType;
use inkwell::values::{BasicMetadataValueEnum, FunctionValue};

/// Symbol of the stub wrapping `function`.
pub fn stub_name(function: &str) -> String {
    format!("{function}__stub__")
}

/// How the stub hands back the result of the compiled function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubReturn {
    Nothing,
    /// Widened to a byte.
    Flag,
    /// Returned unchanged in a register.
    Direct(Type),
    /// Heap value returned as a pointer the host copies from.
    Indirect(Type),
}

impl StubReturn {
    pub fn for_type(ty: Type) -> CompileResult<Self> {
        match ty {
            Type::Void => Ok(StubReturn::Nothing),
            Type::Bool => Ok(StubReturn::Flag),
            Type::Int | Type::Float => Ok(StubReturn::Direct(ty)),
            Type::Array(..) => Ok(StubReturn::Indirect(ty)),
            Type::Range => Err(CompileError::unimplemented("returning a range")),
            Type::Unknown => Err(CompileError::backend("return type was never resolved")),
        }
    }
}

pub fn emit_stub<'ctx>(
    context: &'ctx Context,
    module: &Module<'ctx>,
    func: &Function<'_>,
    target: FunctionValue<'ctx>,
    args: &[Scalar],
) -> CompileResult<FunctionValue<'ctx>> {
    if args.len() != func.params.len() {
        return Err(CompileError::ArgumentCount {
            function: func.name.to_string(),
            expected: func.params.len(),
            found: args.len(),
        });
    }

    let convention = StubReturn::for_type(func.ty(func.result))?;
    let fn_type = match convention {
        StubReturn::Nothing => context.void_type().fn_type(&[], false),
        StubReturn::Flag => context.i8_type().fn_type(&[], false),
        StubReturn::Direct(ty) | StubReturn::Indirect(ty) => {
            basic_type(context, ty)?.fn_type(&[], false)
        }
    };
    let stub = module.add_function(&stub_name(func.name), fn_type, None);
    let builder = context.create_builder();
    builder.position_at_end(context.append_basic_block(stub, "entry"));
    if let Some(flag) = module.get_global(FAULT_FLAG) {
        builder.build_store(flag.as_pointer_value(), context.bool_type().const_zero())?;
    }

    let mut call_args: Vec<BasicMetadataValueEnum> = Vec::with_capacity(args.len());
    for (index, (&param, &arg)) in func.params.iter().zip(args).enumerate() {
        let ty = func.ty(param);
        let llvm_type = basic_type(context, ty)?;
        let global = module.add_global(llvm_type, None, &format!("{}.arg{index}", func.name));
        global.set_initializer(&scalar_constant(context, arg, ty)?);
        global.set_constant(true);
        global.set_linkage(Linkage::Private);
        let name = format!("arg{index}");
        let loaded = builder.build_load(llvm_type, global.as_pointer_value(), &name)?;
        call_args.push(loaded.into());
    }

    let call = builder.build_call(target, &call_args, "result")?;
    let result = call.try_as_basic_value().left();
    match (convention, result) {
        (StubReturn::Nothing, _) => {
            builder.build_return(None)?;
        }
        (StubReturn::Flag, Some(value)) => {
            let widened =
                builder.build_int_z_extend(value.into_int_value(), context.i8_type(), "flag")?;
            builder.build_return(Some(&widened))?;
        }
        (StubReturn::Direct(_) | StubReturn::Indirect(_), Some(value)) => {
            builder.build_return(Some(&value))?;
        }
        (_, None) => {
            return Err(CompileError::backend(format!(
                "{} returned no value",
                func.name
            )))
        }
    }
    Ok(stub)
}
