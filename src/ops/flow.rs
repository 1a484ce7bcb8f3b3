//! Returns, jumps and phis.

use super::OpHandler;
use crate::bytecode::JumpKind;
use crate::core::{CompileError, CompileResult, Type};
use crate::ir::infer::InferCx;
use crate::ir::InstrId;
use crate::llvm::Emitter;

/// `RETURN_VALUE`: widens the function's return type.
pub struct Return;

pub static RETURN: Return = Return;

impl OpHandler for Return {
    fn infer(&self, cx: &mut InferCx<'_, '_>, id: InstrId) -> CompileResult<()> {
        let returned = cx.operand_ty(id, 0)?;
        if returned == Type::Range {
            return Err(CompileError::unimplemented("returning a range"));
        }
        let result = cx.func.result;
        let ty = cx.unify_into(result, returned)?;
        cx.coerce_operand(id, 0, ty)
    }

    fn lower(&self, em: &mut Emitter<'_, '_, '_>, id: InstrId) -> CompileResult<()> {
        if em.return_ty() == Type::Void {
            em.builder().build_return(None)?;
        } else {
            let value = em.operand(id, 0)?;
            em.builder().build_return(Some(&value))?;
        }
        Ok(())
    }
}

/// `JUMP_ABSOLUTE` and `JUMP_FORWARD`.
pub struct Jump;

pub static JUMP: Jump = Jump;

impl OpHandler for Jump {
    fn infer(&self, _cx: &mut InferCx<'_, '_>, _id: InstrId) -> CompileResult<()> {
        Ok(())
    }

    fn lower(&self, em: &mut Emitter<'_, '_, '_>, id: InstrId) -> CompileResult<()> {
        let (target, _) = em.successors(id)?;
        em.builder().build_unconditional_branch(target)?;
        Ok(())
    }
}

/// Conditional jumps, including the short-circuit forms. The operand is
/// tested for truth; the short-circuit forms differ only in the stack state
/// at their target, which the IR builder already turned into a phi.
pub struct Branch;

pub static BRANCH: Branch = Branch;

impl OpHandler for Branch {
    fn infer(&self, _cx: &mut InferCx<'_, '_>, _id: InstrId) -> CompileResult<()> {
        Ok(())
    }

    fn lower(&self, em: &mut Emitter<'_, '_, '_>, id: InstrId) -> CompileResult<()> {
        let instr = em.instr(id);
        let jump_if = match instr.opcode().map(|op| op.info().jump) {
            Some(JumpKind::Conditional { jump_if } | JumpKind::ShortCircuit { jump_if }) => jump_if,
            _ => {
                return Err(CompileError::backend(format!(
                    "{} is not a conditional jump",
                    instr.name()
                )))
            }
        };
        let condition = em.operand(id, 0)?;
        let truth = em.truth(condition, em.operand_ty(id, 0)?)?;
        let (taken, fallthrough) = em.successors(id)?;
        let (then_block, else_block) = if jump_if {
            (taken, fallthrough)
        } else {
            (fallthrough, taken)
        };
        em.builder()
            .build_conditional_branch(truth, then_block, else_block)?;
        Ok(())
    }
}

/// Join of incoming values; every operand is widened to the joined type.
pub struct Phi;

pub static PHI: Phi = Phi;

impl OpHandler for Phi {
    fn infer(&self, cx: &mut InferCx<'_, '_>, id: InstrId) -> CompileResult<()> {
        let result = cx.result(id)?;
        let mut ty = cx.func.ty(result);
        for index in 0..cx.instr(id).operands.len() {
            ty = ty.unify(cx.operand_ty(id, index)?)?;
        }
        let ty = cx.unify_into(result, ty)?;
        cx.coerce_all(id, ty)
    }

    /// Incoming values are attached once every block has been lowered.
    fn lower(&self, em: &mut Emitter<'_, '_, '_>, id: InstrId) -> CompileResult<()> {
        let ty = em.result_ty(id)?;
        if ty == Type::Void {
            return Ok(());
        }
        let phi = em.builder().build_phi(em.llvm_type(ty)?, "phi")?;
        em.bind_result(id, phi.as_basic_value())?;
        em.defer_phi(id, phi);
        Ok(())
    }
}
