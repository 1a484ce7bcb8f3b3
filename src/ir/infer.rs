//! Fixpoint type inference.
//!
//! One pass visits every reachable instruction in sequence order and lets its
//! opcode handler unify result and operand types. A pass that changed any type
//! or spliced in a cast returns a non-empty [`DirtySet`]; the driver repeats
//! full passes until one comes back clean. Types only move up the lattice and
//! each variable can change at most twice (`? -> int -> float`), so the loop
//! terminates.
//!
//! Parameter, result and global types are shared with the rest of the program
//! through [`ModuleTypes`]: a pass starts by pulling them in and ends by
//! pushing them back.

use super::{Callee, Function, InstrId, Instruction, ModuleTypes, ValueId};
use crate::core::{CompilationSession, CompileError, CompileResult, Type};

/// What a single inference pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtySet {
    /// Values whose resolved type changed.
    pub retyped: Vec<ValueId>,
    /// Casts spliced into operand lists.
    pub casts: Vec<ValueId>,
}

impl DirtySet {
    pub fn is_empty(&self) -> bool {
        self.retyped.is_empty() && self.casts.is_empty()
    }
}

/// Mutable view of a function handed to the per-opcode inference rules.
pub struct InferCx<'f, 'arena> {
    pub func: &'f mut Function<'arena>,
    pub types: &'f mut ModuleTypes<'arena>,
    dirty: DirtySet,
}

impl<'f, 'arena> InferCx<'f, 'arena> {
    pub fn new(func: &'f mut Function<'arena>, types: &'f mut ModuleTypes<'arena>) -> Self {
        Self {
            func,
            types,
            dirty: DirtySet::default(),
        }
    }

    pub fn instr(&self, id: InstrId) -> &Instruction {
        self.func.instr(id)
    }

    /// Target of the call `id`.
    pub fn callee(&self, id: InstrId) -> CompileResult<Callee<'arena>> {
        let instr = self.func.instr(id);
        instr
            .callee
            .and_then(|c| self.func.as_callee(c))
            .ok_or_else(|| CompileError::unsupported(instr.name(), "call without a callee"))
    }

    pub fn operand(&self, id: InstrId, index: usize) -> CompileResult<ValueId> {
        let instr = self.func.instr(id);
        instr.operands.get(index).copied().ok_or_else(|| {
            CompileError::unsupported(instr.name(), format!("missing operand {index}"))
        })
    }

    pub fn operand_ty(&self, id: InstrId, index: usize) -> CompileResult<Type> {
        Ok(self.func.ty(self.operand(id, index)?))
    }

    /// Operand type before any cast the inferencer inserted.
    pub fn origin_ty(&self, id: InstrId, index: usize) -> CompileResult<Type> {
        Ok(self.func.origin_ty(self.operand(id, index)?))
    }

    pub fn result(&self, id: InstrId) -> CompileResult<ValueId> {
        let instr = self.func.instr(id);
        instr
            .result
            .ok_or_else(|| CompileError::unsupported(instr.name(), "instruction has no result"))
    }

    /// Join `ty` into the type of `value`, recording a change.
    pub fn unify_into(&mut self, value: ValueId, ty: Type) -> CompileResult<Type> {
        let old = self.func.ty(value);
        let new = old.unify(ty)?;
        if new != old {
            log::trace!("retype {} -> {}", self.func.describe(value), new);
            self.func.set_ty(value, new);
            self.dirty.retyped.push(value);
        }
        Ok(new)
    }

    /// Replace operand `index` with a cast to `ty` when its type differs.
    pub fn coerce_operand(&mut self, id: InstrId, index: usize, ty: Type) -> CompileResult<()> {
        let operand = self.operand(id, index)?;
        let current = self.func.ty(operand);
        if !ty.is_known() || !current.is_known() || current == ty {
            return Ok(());
        }
        let cast = self.func.cast(operand, ty);
        self.func.instr_mut(id).operands[index] = cast;
        self.dirty.casts.push(cast);
        log::trace!(
            "cast operand {} of {} to {}",
            index,
            self.func.instr(id).name(),
            ty
        );
        Ok(())
    }

    /// Coerce every operand to `ty`.
    pub fn coerce_all(&mut self, id: InstrId, ty: Type) -> CompileResult<()> {
        for index in 0..self.func.instr(id).operands.len() {
            self.coerce_operand(id, index, ty)?;
        }
        Ok(())
    }

    fn pull_shared(&mut self) -> CompileResult<()> {
        let sig = self.types.signature(self.func.name)?.clone();
        for (index, ty) in sig.params.into_iter().enumerate() {
            if let Some(&param) = self.func.params.get(index) {
                self.unify_into(param, ty)?;
            }
        }
        let result = self.func.result;
        self.unify_into(result, sig.result)?;
        for (name, var) in self.func.global_vars() {
            let ty = self.types.global(name);
            self.unify_into(var, ty)?;
        }
        Ok(())
    }

    fn push_shared(&mut self) -> CompileResult<()> {
        let name = self.func.name;
        for (index, &param) in self.func.params.iter().enumerate() {
            self.types.join_param(name, index, self.func.ty(param))?;
        }
        self.types.join_result(name, self.func.ty(self.func.result))?;
        for (global, var) in self.func.global_vars() {
            self.types.join_global(global, self.func.ty(var))?;
        }
        Ok(())
    }
}

/// Run one inference pass over every reachable instruction of `func`.
pub fn run_pass<'arena>(
    func: &mut Function<'arena>,
    types: &mut ModuleTypes<'arena>,
) -> CompileResult<DirtySet> {
    types.declare_function(func.name, func.params.len());
    let mut cx = InferCx::new(func, types);
    cx.pull_shared()?;
    for id in cx.func.order() {
        let instr = cx.func.instr(id);
        if !instr.reachable {
            continue;
        }
        let handler = instr.handler();
        let loc = instr.loc.clone();
        handler.infer(&mut cx, id).map_err(|e| e.at(&loc))?;
    }
    cx.push_shared()?;
    Ok(cx.dirty)
}

/// Repeat full passes over a function that calls nothing until its types
/// are stable. Returns the pass count.
pub fn infer_to_fixpoint(
    func: &mut Function<'_>,
    session: &CompilationSession<'_>,
) -> CompileResult<usize> {
    let mut types = ModuleTypes::default();
    let mut passes = 0;
    loop {
        let dirty = run_pass(func, &mut types)?;
        passes += 1;
        session.record_retype_pass();
        log::debug!(
            "{}: inference pass {} changed {} types, inserted {} casts",
            func.name,
            passes,
            dirty.retyped.len(),
            dirty.casts.len()
        );
        if dirty.is_empty() && !types.take_changed() {
            return Ok(passes);
        }
    }
}

/// Check that every reachable operand and result got a type.
pub fn check_resolved(func: &mut Function<'_>) -> CompileResult<()> {
    for id in func.order() {
        let instr = func.instr(id);
        if !instr.reachable || instr.discard {
            continue;
        }
        for &operand in &instr.operands {
            let ty = func.ty(operand);
            if ty.is_known() && !(ty == Type::Void && instr.is_conditional_jump()) {
                continue;
            }
            let err = match func.var_name(operand) {
                _ if ty == Type::Void => {
                    CompileError::typing(format!("{} cannot test None", instr.name()))
                }
                Some(name) if func.is_local(operand) || func.is_global(operand) => {
                    CompileError::undefined(name)
                }
                _ => CompileError::typing(format!(
                    "cannot infer the type of {} in {}",
                    func.describe(operand),
                    instr.name()
                )),
            };
            return Err(err.at(&instr.loc));
        }
        if let Some(result) = instr.result {
            if !func.ty(result).is_known() {
                return Err(CompileError::typing(format!(
                    "cannot infer the result type of {}",
                    instr.name()
                ))
                .at(&instr.loc));
            }
        }
    }
    // Every return is unreachable: the function never produces a value.
    if !func.ty(func.result).is_known() {
        func.set_ty(func.result, Type::Void);
    }
    Ok(())
}
