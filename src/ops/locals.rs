//! Variable access and opcodes with no typed effect.
//!
//! Locals are in SSA form by the time they are lowered; module globals live
//! in memory and are loaded and stored on every access.

use super::OpHandler;
use crate::core::{CompileError, CompileResult, Type};
use crate::ir::infer::InferCx;
use crate::ir::InstrId;
use crate::llvm::Emitter;

/// `NOP`, `POP_BLOCK`, `SETUP_LOOP`, `LOAD_CONST`, `POP_TOP` and the stack
/// shuffles.
///
/// Constants are interned values rather than instructions, a popped value is
/// simply never read again, and shuffles only reorder the builder's stack.
pub struct Passive;

pub static PASSIVE: Passive = Passive;

impl OpHandler for Passive {
    fn infer(&self, _cx: &mut InferCx<'_, '_>, _id: InstrId) -> CompileResult<()> {
        Ok(())
    }

    fn lower(&self, _em: &mut Emitter<'_, '_, '_>, _id: InstrId) -> CompileResult<()> {
        Ok(())
    }
}

/// `LOAD_FAST`: the result takes the variable's type and, once SSA is
/// built, the value of the reaching definition.
pub struct LoadFast;

pub static LOAD_FAST: LoadFast = LoadFast;

impl OpHandler for LoadFast {
    fn infer(&self, cx: &mut InferCx<'_, '_>, id: InstrId) -> CompileResult<()> {
        let var = cx.operand(id, 0)?;
        let ty = cx.func.ty(var);
        let result = cx.result(id)?;
        cx.unify_into(result, ty)?;
        Ok(())
    }

    fn lower(&self, em: &mut Emitter<'_, '_, '_>, id: InstrId) -> CompileResult<()> {
        let ty = em.result_ty(id)?;
        if ty == Type::Void {
            return Ok(());
        }
        let def = em.instr(id).reaching.ok_or_else(|| {
            CompileError::backend("variable load without a reaching definition")
        })?;
        let value = em.value(def)?;
        let value = em.convert(value, em.func().ty(def), ty)?;
        em.bind_result(id, value)
    }
}

/// `STORE_FAST`: widens the variable to the stored type.
pub struct StoreFast;

pub static STORE_FAST: StoreFast = StoreFast;

impl OpHandler for StoreFast {
    fn infer(&self, cx: &mut InferCx<'_, '_>, id: InstrId) -> CompileResult<()> {
        let var = cx.result(id)?;
        let stored = cx.operand_ty(id, 0)?;
        let ty = cx.unify_into(var, stored)?;
        cx.coerce_operand(id, 0, ty)
    }

    /// The stored value is materialised at the store.
    fn lower(&self, em: &mut Emitter<'_, '_, '_>, id: InstrId) -> CompileResult<()> {
        if em.operand_ty(id, 0)? == Type::Void {
            return Ok(());
        }
        em.operand(id, 0)?;
        Ok(())
    }
}

/// `LOAD_GLOBAL` of a variable. A load of a function leaves only its callee
/// value behind and has no operands.
pub struct LoadGlobal;

pub static LOAD_GLOBAL: LoadGlobal = LoadGlobal;

impl OpHandler for LoadGlobal {
    fn infer(&self, cx: &mut InferCx<'_, '_>, id: InstrId) -> CompileResult<()> {
        if cx.instr(id).operands.is_empty() {
            return Ok(());
        }
        let ty = cx.operand_ty(id, 0)?;
        let result = cx.result(id)?;
        cx.unify_into(result, ty)?;
        Ok(())
    }

    fn lower(&self, em: &mut Emitter<'_, '_, '_>, id: InstrId) -> CompileResult<()> {
        if em.instr(id).operands.is_empty() {
            return Ok(());
        }
        let var = em.operand_id(id, 0)?;
        let name = em
            .func()
            .var_name(var)
            .ok_or_else(|| CompileError::backend("global load without a variable"))?;
        let slot = em.global_slot(name)?;
        let ty = em.llvm_type(em.result_ty(id)?)?;
        let value = em.builder().build_load(ty, slot, name)?;
        em.bind_result(id, value)
    }
}

/// `STORE_GLOBAL`: widens the global, shared by every function of the program.
pub struct StoreGlobal;

pub static STORE_GLOBAL: StoreGlobal = StoreGlobal;

impl OpHandler for StoreGlobal {
    fn infer(&self, cx: &mut InferCx<'_, '_>, id: InstrId) -> CompileResult<()> {
        let var = cx.result(id)?;
        let stored = cx.operand_ty(id, 0)?;
        if stored == Type::Void {
            let name = cx.func.var_name(var).unwrap_or("?");
            return Err(CompileError::unimplemented(format!(
                "None stored in global {name}"
            )));
        }
        let ty = cx.unify_into(var, stored)?;
        cx.coerce_operand(id, 0, ty)
    }

    fn lower(&self, em: &mut Emitter<'_, '_, '_>, id: InstrId) -> CompileResult<()> {
        let value = em.operand(id, 0)?;
        let name = em
            .instr(id)
            .result
            .and_then(|var| em.func().var_name(var))
            .ok_or_else(|| CompileError::backend("global store without a variable"))?;
        let slot = em.global_slot(name)?;
        em.builder().build_store(slot, value)?;
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
    fn test_globals_are_shared_between_functions() {
        let _ = env_logger::builder().is_test(true).try_init();
        let text = r#"
global total = 0

def add(x) in "globals.py":
  2      0 LOAD_GLOBAL        total
         2 LOAD_FAST          x
         4 BINARY_ADD
         6 STORE_GLOBAL       total
         8 LOAD_CONST         None
        10 RETURN_VALUE

def run(x) in "globals.py":
  5      0 LOAD_GLOBAL        add
         2 LOAD_FAST          x
         4 CALL_FUNCTION      1
         6 POP_TOP
  6      8 LOAD_GLOBAL        total
        10 RETURN_VALUE

def clear() in "globals.py":
  9      0 LOAD_CONST         None
         2 STORE_GLOBAL       total
         4 LOAD_CONST         None
         6 RETURN_VALUE
"#;
        let parsed = listing(text);
        let ctx = TestContext::new();
        let session = ctx.create_session();
        let mut program = Program::build(&parsed, "run", &[Scalar::Float(0.5)], &session).unwrap();
        program.infer_to_fixpoint(&session).unwrap();
        program.check_resolved().unwrap();
        assert_eq!(program.globals(), vec![("total", Type::Float)]);
        let entry = program.entry();
        assert_eq!(entry.ty(entry.result), Type::Float);

        let mut program = Program::build(&parsed, "clear", &[], &session).unwrap();
        let err = program.infer_to_fixpoint(&session).unwrap_err();
        assert!(matches!(err, CompileError::Unimplemented { .. }));
        assert_eq!(err.location().unwrap().to_string(), "globals.py:9");
    }
}
