//! `COMPARE_OP`

use super::OpHandler;
use crate::bytecode::CmpOp;
use crate::core::{CompileError, CompileResult, Type};
use crate::ir::infer::InferCx;
use crate::ir::InstrId;
use crate::llvm::Emitter;
use inkwell::{FloatPredicate, IntPredicate};

pub struct Compare;

pub static COMPARE: Compare = Compare;

impl OpHandler for Compare {
    fn infer(&self, cx: &mut InferCx<'_, '_>, id: InstrId) -> CompileResult<()> {
        let lhs = cx.operand_ty(id, 0)?;
        let rhs = cx.operand_ty(id, 1)?;
        if lhs.is_known() && rhs.is_known() && lhs != rhs {
            return Err(CompileError::typing(format!(
                "Comparing different types ({lhs} with {rhs})"
            )));
        }
        if lhs == Type::Void || rhs == Type::Void {
            return Err(CompileError::typing("Comparing None values"));
        }
        let result = cx.result(id)?;
        cx.unify_into(result, Type::Bool)?;
        Ok(())
    }

    fn lower(&self, em: &mut Emitter<'_, '_, '_>, id: InstrId) -> CompileResult<()> {
        let cmp = em
            .instr(id)
            .cmp
            .ok_or_else(|| CompileError::unsupported("COMPARE_OP", "missing comparison"))?;
        let lhs = em.operand(id, 0)?;
        let rhs = em.operand(id, 1)?;
        let value = match em.operand_ty(id, 0)? {
            Type::Int => em.builder().build_int_compare(
                signed_predicate(cmp),
                lhs.into_int_value(),
                rhs.into_int_value(),
                "cmp",
            )?,
            Type::Bool => em.builder().build_int_compare(
                unsigned_predicate(cmp),
                lhs.into_int_value(),
                rhs.into_int_value(),
                "cmp",
            )?,
            Type::Float => em.builder().build_float_compare(
                float_predicate(cmp),
                lhs.into_float_value(),
                rhs.into_float_value(),
                "fcmp",
            )?,
            other => return Err(CompileError::backend(format!("comparison of {other}"))),
        };
        em.bind_result(id, value.into())
    }
}

fn signed_predicate(cmp: CmpOp) -> IntPredicate {
    match cmp {
        CmpOp::Lt => IntPredicate::SLT,
        CmpOp::Le => IntPredicate::SLE,
        CmpOp::Eq => IntPredicate::EQ,
        CmpOp::Ne => IntPredicate::NE,
        CmpOp::Gt => IntPredicate::SGT,
        CmpOp::Ge => IntPredicate::SGE,
    }
}

fn unsigned_predicate(cmp: CmpOp) -> IntPredicate {
    match cmp {
        CmpOp::Lt => IntPredicate::ULT,
        CmpOp::Le => IntPredicate::ULE,
        CmpOp::Eq => IntPredicate::EQ,
        CmpOp::Ne => IntPredicate::NE,
        CmpOp::Gt => IntPredicate::UGT,
        CmpOp::Ge => IntPredicate::UGE,
    }
}

/// Ordered predicates, except `!=` which must hold for NaN.
fn float_predicate(cmp: CmpOp) -> FloatPredicate {
    match cmp {
        CmpOp::Lt => FloatPredicate::OLT,
        CmpOp::Le => FloatPredicate::OLE,
        CmpOp::Eq => FloatPredicate::OEQ,
        CmpOp::Ne => FloatPredicate::UNE,
        CmpOp::Gt => FloatPredicate::OGT,
        CmpOp::Ge => FloatPredicate::OGE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert_eq!(signed_predicate(CmpOp::Lt), IntPredicate::SLT);
        assert_eq!(unsigned_predicate(CmpOp::Ge), IntPredicate::UGE);
        assert_eq!(float_predicate(CmpOp::Eq), FloatPredicate::OEQ);
        assert_eq!(float_predicate(CmpOp::Ne), FloatPredicate::UNE);
    }
}
