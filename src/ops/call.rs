//! `CALL_FUNCTION` on listing functions and builtins.
//!
//! A call to a listing function joins its argument types into the callee's
//! shared signature and takes the callee's result type; arguments are then
//! widened to the parameter types. Builtins are typed and lowered inline.

use super::{require_int, OpHandler, StackEffect};
use crate::bytecode::{Opcode, Operand, Scalar};
use crate::core::{CompileError, CompileResult, Elem, Type};
use crate::ir::infer::InferCx;
use crate::ir::{Builtin, Callee, InstrId, ValueKind};
use crate::llvm::{Emitter, Fault};
use inkwell::context::Context;
use inkwell::types::StructType;
use inkwell::values::{BasicMetadataValueEnum, BasicValueEnum};
use inkwell::{AddressSpace, IntPredicate};

/// Stack slot of a `range` iterator: counter, stop and step.
pub(crate) fn range_type(context: &Context) -> StructType<'_> {
    let i64_type = context.i64_type();
    context.struct_type(&[i64_type.into(), i64_type.into(), i64_type.into()], false)
}

pub struct Call;

pub static CALL: Call = Call;

fn arity(
    function: &str,
    expected: std::ops::RangeInclusive<usize>,
    found: usize,
) -> CompileResult<()> {
    if expected.contains(&found) {
        return Ok(());
    }
    Err(CompileError::ArgumentCount {
        function: function.to_string(),
        expected: if found < *expected.start() {
            *expected.start()
        } else {
            *expected.end()
        },
        found,
    })
}

impl OpHandler for Call {
    fn stack_effect(&self, op: Opcode, operand: &Operand) -> CompileResult<StackEffect> {
        match operand {
            Operand::Count(n) => Ok(StackEffect {
                pops: *n as usize + 1,
                pushes: 1,
            }),
            other => Err(CompileError::unsupported(
                op.name(),
                format!("expected an argument count, found '{other}'"),
            )),
        }
    }

    fn infer(&self, cx: &mut InferCx<'_, '_>, id: InstrId) -> CompileResult<()> {
        match cx.callee(id)? {
            Callee::Function(name) => infer_call(cx, id, name),
            Callee::Builtin(builtin) => infer_builtin(cx, id, builtin),
        }
    }

    fn lower(&self, em: &mut Emitter<'_, '_, '_>, id: InstrId) -> CompileResult<()> {
        let instr = em.instr(id);
        let callee = instr
            .callee
            .and_then(|c| em.func().as_callee(c))
            .ok_or_else(|| CompileError::backend("call without a callee"))?;
        match callee {
            Callee::Function(name) => {
                let mut args: Vec<BasicMetadataValueEnum> =
                    Vec::with_capacity(instr.operands.len());
                for index in 0..instr.operands.len() {
                    args.push(em.operand(id, index)?.into());
                }
                let result = em.call_compiled(name, &args)?;
                match (em.result_ty(id)?, result) {
                    (Type::Void, _) => Ok(()),
                    (_, Some(value)) => em.bind_result(id, value),
                    (ty, None) => Err(CompileError::backend(format!(
                        "{name} returned nothing where {ty} was expected"
                    ))),
                }
            }
            Callee::Builtin(builtin) => lower_builtin(em, id, builtin),
        }
    }
}

fn infer_call<'arena>(
    cx: &mut InferCx<'_, 'arena>,
    id: InstrId,
    name: &'arena str,
) -> CompileResult<()> {
    let argc = cx.instr(id).operands.len();
    let params = cx.types.signature(name)?.params.len();
    if argc != params {
        return Err(CompileError::ArgumentCount {
            function: name.to_string(),
            expected: params,
            found: argc,
        });
    }
    for index in 0..argc {
        let ty = cx.operand_ty(id, index)?;
        if ty == Type::Void {
            return Err(CompileError::unimplemented(format!(
                "None passed as argument {index} of {name}"
            )));
        }
        let param = cx.types.join_param(name, index, ty)?;
        cx.coerce_operand(id, index, param)?;
    }
    let returned = cx.types.signature(name)?.result;
    let result = cx.result(id)?;
    cx.unify_into(result, returned)?;
    Ok(())
}

fn infer_builtin(cx: &mut InferCx<'_, '_>, id: InstrId, builtin: Builtin) -> CompileResult<()> {
    let argc = cx.instr(id).operands.len();
    let name = builtin.name();
    let result = cx.result(id)?;
    match builtin {
        Builtin::Range => {
            arity(name, 1..=3, argc)?;
            for index in 0..argc {
                require_int("range() argument", cx.origin_ty(id, index)?)?;
            }
            cx.unify_into(result, Type::Range)?;
        }
        Builtin::Float => {
            arity(name, 1..=1, argc)?;
            match cx.origin_ty(id, 0)? {
                Type::Unknown | Type::Bool | Type::Int | Type::Float => {}
                other => {
                    return Err(CompileError::typing(format!(
                        "float() argument must be a number, not {other}"
                    )))
                }
            }
            cx.unify_into(result, Type::Float)?;
            cx.coerce_operand(id, 0, Type::Float)?;
        }
        Builtin::Int => {
            arity(name, 1..=1, argc)?;
            match cx.origin_ty(id, 0)? {
                Type::Bool => cx.coerce_operand(id, 0, Type::Int)?,
                Type::Unknown | Type::Int | Type::Float => {}
                other => {
                    return Err(CompileError::typing(format!(
                        "int() argument must be a number, not {other}"
                    )))
                }
            }
            cx.unify_into(result, Type::Int)?;
        }
        Builtin::Len => {
            arity(name, 1..=1, argc)?;
            match cx.operand_ty(id, 0)? {
                Type::Unknown | Type::Array(..) => {}
                other => {
                    return Err(CompileError::typing(format!("len() of {other} is not supported")))
                }
            }
            cx.unify_into(result, Type::Int)?;
        }
        Builtin::Zeros(None) => return Err(CompileError::unimplemented("zeros() without a dtype")),
        Builtin::Zeros(Some(elem)) => {
            arity(name, 1..=1, argc)?;
            let size = cx.operand(id, 0)?;
            let len = match cx.func.value(size).kind {
                ValueKind::Constant(Scalar::Int(n)) => u32::try_from(n).map_err(|_| {
                    CompileError::unimplemented(format!("zeros() of size {n}"))
                })?,
                _ => {
                    return Err(CompileError::unimplemented(
                        "zeros() with a size that is not a literal",
                    ))
                }
            };
            cx.unify_into(result, Type::Array(elem, len))?;
        }
    }
    Ok(())
}

fn lower_builtin(
    em: &mut Emitter<'_, '_, '_>,
    id: InstrId,
    builtin: Builtin,
) -> CompileResult<()> {
    let context = em.context();
    let i64_type = context.i64_type();
    let value: BasicValueEnum = match builtin {
        Builtin::Range => {
            let argc = em.instr(id).operands.len();
            let mut bounds = Vec::with_capacity(argc);
            for index in 0..argc {
                bounds.push(em.operand(id, index)?.into_int_value());
            }
            let (start, stop, step) = match bounds[..] {
                [stop] => (i64_type.const_zero(), stop, i64_type.const_int(1, false)),
                [start, stop] => (start, stop, i64_type.const_int(1, false)),
                [start, stop, step] => {
                    let nonzero = em.builder().build_int_compare(
                        IntPredicate::NE,
                        step,
                        i64_type.const_zero(),
                        "step.nz",
                    )?;
                    em.guard(nonzero, Fault::ZeroStep)?;
                    (start, stop, step)
                }
                _ => return Err(CompileError::backend("range() with no bounds")),
            };
            let state_type = range_type(context);
            let state = em.entry_alloca(state_type.into(), "range")?;
            let b = em.builder();
            for (index, field) in [start, stop, step].into_iter().enumerate() {
                let slot = b.build_struct_gep(state_type, state, index as u32, "range.field")?;
                b.build_store(slot, field)?;
            }
            state.into()
        }
        Builtin::Float => em.operand(id, 0)?,
        Builtin::Int => {
            let operand = em.operand(id, 0)?;
            match em.operand_ty(id, 0)? {
                Type::Int => operand,
                Type::Float => em.checked_float_to_int(operand.into_float_value())?.into(),
                other => return Err(CompileError::backend(format!("int() of {other}"))),
            }
        }
        Builtin::Len => match em.operand_ty(id, 0)? {
            Type::Array(_, len) => i64_type.const_int(len as u64, false).into(),
            other => return Err(CompileError::backend(format!("len() of {other}"))),
        },
        Builtin::Zeros(_) => {
            let len = match em.result_ty(id)? {
                Type::Array(_, len) => len,
                other => return Err(CompileError::backend(format!("zeros() typed as {other}"))),
            };
            let ptr_type = context.ptr_type(AddressSpace::default());
            let calloc = em.declare_runtime(
                "calloc",
                ptr_type.fn_type(&[i64_type.into(), i64_type.into()], false),
            );
            let count = i64_type.const_int(len as u64, false);
            let width = i64_type.const_int(std::mem::size_of::<i64>() as u64, false);
            let call = em
                .builder()
                .build_call(calloc, &[count.into(), width.into()], "zeros")?;
            call.try_as_basic_value()
                .left()
                .ok_or_else(|| CompileError::backend("calloc produced no value"))?
        }
    };
    em.bind_result(id, value)
}
