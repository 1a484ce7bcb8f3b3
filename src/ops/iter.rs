//! `GET_ITER` and `FOR_ITER` over `range(...)`.
//!
//! A range lives in a stack slot holding its next counter value, its stop
//! and its step. `FOR_ITER` tests the counter against the stop in the
//! direction of the step, advances it, and either enters the body with the
//! old counter or leaves the loop.

use super::call::range_type;
use super::OpHandler;
use crate::core::{CompileError, CompileResult, Type};
use crate::ir::infer::InferCx;
use crate::ir::InstrId;
use crate::llvm::Emitter;
use inkwell::IntPredicate;

fn require_range(ty: Type) -> CompileResult<()> {
    match ty {
        Type::Unknown | Type::Range => Ok(()),
        other => Err(CompileError::unimplemented(format!("iteration over {other}"))),
    }
}

/// `GET_ITER`: a range is its own iterator.
pub struct GetIter;

pub static GET_ITER: GetIter = GetIter;

impl OpHandler for GetIter {
    fn infer(&self, cx: &mut InferCx<'_, '_>, id: InstrId) -> CompileResult<()> {
        let ty = cx.operand_ty(id, 0)?;
        require_range(ty)?;
        let result = cx.result(id)?;
        cx.unify_into(result, ty)?;
        Ok(())
    }

    fn lower(&self, em: &mut Emitter<'_, '_, '_>, id: InstrId) -> CompileResult<()> {
        let state = em.operand(id, 0)?;
        em.bind_result(id, state)
    }
}

/// `FOR_ITER`: yields the counter, or jumps to its target once exhausted.
pub struct ForIter;

pub static FOR_ITER: ForIter = ForIter;

impl OpHandler for ForIter {
    fn infer(&self, cx: &mut InferCx<'_, '_>, id: InstrId) -> CompileResult<()> {
        require_range(cx.operand_ty(id, 0)?)?;
        let result = cx.result(id)?;
        cx.unify_into(result, Type::Int)?;
        Ok(())
    }

    fn lower(&self, em: &mut Emitter<'_, '_, '_>, id: InstrId) -> CompileResult<()> {
        let state = em.operand(id, 0)?.into_pointer_value();
        let context = em.context();
        let i64_type = context.i64_type();
        let state_type = range_type(context);
        let b = em.builder();

        let counter_slot = b.build_struct_gep(state_type, state, 0, "range.counter")?;
        let stop_slot = b.build_struct_gep(state_type, state, 1, "range.stop")?;
        let step_slot = b.build_struct_gep(state_type, state, 2, "range.step")?;
        let counter = b.build_load(i64_type, counter_slot, "counter")?.into_int_value();
        let stop = b.build_load(i64_type, stop_slot, "stop")?.into_int_value();
        let step = b.build_load(i64_type, step_slot, "step")?.into_int_value();

        let zero = i64_type.const_zero();
        let upwards = b.build_int_compare(IntPredicate::SGT, step, zero, "upwards")?;
        let below = b.build_int_compare(IntPredicate::SLT, counter, stop, "below")?;
        let above = b.build_int_compare(IntPredicate::SGT, counter, stop, "above")?;
        let more = b
            .build_select(upwards, below, above, "more")?
            .into_int_value();
        let next = b.build_int_add(counter, step, "next")?;
        b.build_store(counter_slot, next)?;

        em.bind_result(id, counter.into())?;
        let (exhausted, body) = em.successors(id)?;
        em.builder().build_conditional_branch(more, body, exhausted)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Scalar;
    use crate::core::test_utils::test::{listing, TestContext};
    use crate::ir::Program;

    #[test]
    fn test_loop_counter_is_an_int() {
        let _ = env_logger::builder().is_test(true).try_init();
        let text = r#"
def total(n) in "iter.py":
  2      0 LOAD_CONST         0
         2 STORE_FAST         acc
  3      4 SETUP_LOOP         24
         6 LOAD_GLOBAL        range
         8 LOAD_FAST          n
        10 CALL_FUNCTION      1
        12 GET_ITER
    >>  14 FOR_ITER           12
        16 STORE_FAST         i
  4     18 LOAD_FAST          acc
        20 LOAD_FAST          i
        22 INPLACE_ADD
        24 STORE_FAST         acc
        26 JUMP_ABSOLUTE      14
    >>  28 POP_BLOCK
  5 >>  30 LOAD_FAST          acc
        32 RETURN_VALUE
"#;
        let parsed = listing(text);
        let ctx = TestContext::new();
        let session = ctx.create_session();
        let mut program = Program::build(&parsed, "total", &[Scalar::Int(4)], &session).unwrap();
        program.infer_to_fixpoint(&session).unwrap();
        program.check_resolved().unwrap();
        let func = program.entry();
        assert_eq!(func.ty(func.result), Type::Int);
    }

    #[test]
    fn test_only_ranges_iterate() {
        assert!(require_range(Type::Range).is_ok());
        assert!(require_range(Type::Unknown).is_ok());
        let err = require_range(Type::Float).unwrap_err();
        assert!(matches!(err, CompileError::Unimplemented { .. }));
        assert!(err.to_string().contains("iteration over float"));
    }
}
