// The emitter turns one fully typed, block-structured IR function into an LLVM function.
// Every function of the program is declared before any body is emitted, so calls can name
// their callee whatever the emission order. All LLVM blocks of a function are created before
// any instruction is lowered so that jumps can name their targets regardless of layout
// order. The synthetic entry block binds the function parameters, holds the stack slots of
// range iterators, and branches to the first real block; the remaining blocks are lowered in
// reverse post-order, which guarantees that a value is always lowered after the block that
// defines it. Each instruction is handed to its opcode handler, which reads operands through
// the emitter and binds its result back into the value map.
//
// Phi nodes are created empty when their block is lowered and completed at the end, once
// every incoming value exists. Casts of constants are folded. A cast of any other value is
// emitted once, directly after the instruction that defines its source (after the last phi
// when the source is a phi, in the entry block when it is a parameter), so the converted
// value dominates every use of the source.
//
// Runtime checks split the current block: the failing edge leads to a block that records
// the fault, raises the module's fault flag and returns a zero value, and lowering continues
// in a fresh block. Each IR block therefore remembers the LLVM block it currently ends in,
// which is the block phis must name as their incoming edge.

//! LLVM IR emission for typed IR functions.

use super::runtime::{Fault, FAULT_FLAG, FAULT_HELPER};
use crate::bytecode::Scalar;
use crate::core::{CompilationSession, CompileError, CompileResult, Type};
use crate::ir::{BlockId, Function, InstrId, Instruction, PhiPred, Program, ValueId, ValueKind};
use hashbrown::HashMap;
use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::intrinsics::Intrinsic;
use inkwell::module::{Linkage, Module};
use inkwell::types::{BasicMetadataTypeEnum, BasicType, BasicTypeEnum, FunctionType};
use inkwell::values::{
    BasicMetadataValueEnum, BasicValue, BasicValueEnum, FloatValue, FunctionValue,
    GlobalValue, InstructionOpcode, IntValue, PhiValue, PointerValue,
};
use inkwell::{AddressSpace, FloatPredicate, IntPredicate};

/// LLVM representation of a resolved type. `void` has none; ranges and
/// arrays are pointers.
pub fn basic_type<'ctx>(context: &'ctx Context, ty: Type) -> CompileResult<BasicTypeEnum<'ctx>> {
    match ty {
        Type::Bool => Ok(context.bool_type().into()),
        Type::Int => Ok(context.i64_type().into()),
        Type::Float => Ok(context.f64_type().into()),
        Type::Range | Type::Array(..) => Ok(context.ptr_type(AddressSpace::default()).into()),
        Type::Void | Type::Unknown => Err(CompileError::backend(format!(
            "type {ty} has no value representation"
        ))),
    }
}

/// Zero, `false` or the null pointer.
pub fn zero_value<'ctx>(context: &'ctx Context, ty: Type) -> CompileResult<BasicValueEnum<'ctx>> {
    let value: BasicValueEnum = match ty {
        Type::Bool => context.bool_type().const_zero().into(),
        Type::Int => context.i64_type().const_zero().into(),
        Type::Float => context.f64_type().const_zero().into(),
        Type::Range | Type::Array(..) => context.ptr_type(AddressSpace::default()).const_null().into(),
        Type::Void | Type::Unknown => {
            return Err(CompileError::backend(format!("type {ty} has no zero value")))
        }
    };
    Ok(value)
}

/// A literal converted to `ty` at compile time.
pub fn scalar_constant<'ctx>(
    context: &'ctx Context,
    value: Scalar,
    ty: Type,
) -> CompileResult<BasicValueEnum<'ctx>> {
    let constant: BasicValueEnum = match (value, ty) {
        (Scalar::Bool(b), Type::Bool) => context.bool_type().const_int(b as u64, false).into(),
        (Scalar::Bool(b), Type::Int) => context.i64_type().const_int(b as u64, false).into(),
        (Scalar::Bool(b), Type::Float) => {
            context.f64_type().const_float(if b { 1.0 } else { 0.0 }).into()
        }
        (Scalar::Int(i), Type::Int) => context.i64_type().const_int(i as u64, true).into(),
        (Scalar::Int(i), Type::Float) => context.f64_type().const_float(i as f64).into(),
        (Scalar::Float(x), Type::Float) => context.f64_type().const_float(x).into(),
        (value, ty) => {
            return Err(CompileError::backend(format!(
                "constant {value} cannot be represented as {ty}"
            )))
        }
    };
    Ok(constant)
}

/// Symbol of the LLVM global backing a module global.
pub fn global_symbol(name: &str) -> String {
    format!("global.{name}")
}

/// Add the LLVM declaration of `func` to `module`.
pub fn declare_function<'ctx>(
    context: &'ctx Context,
    module: &Module<'ctx>,
    func: &Function<'_>,
) -> CompileResult<FunctionValue<'ctx>> {
    let mut params: Vec<BasicMetadataTypeEnum> = Vec::with_capacity(func.params.len());
    for &param in &func.params {
        params.push(basic_type(context, func.ty(param))?.into());
    }
    let fn_type = match func.ty(func.result) {
        Type::Void => context.void_type().fn_type(&params, false),
        ty => basic_type(context, ty)?.fn_type(&params, false),
    };
    Ok(module.add_function(func.name, fn_type, None))
}

/// Define the globals the program touches, initialised from their
/// declarations or to zero.
pub fn declare_globals<'ctx>(
    context: &'ctx Context,
    module: &Module<'ctx>,
    program: &Program<'_>,
) -> CompileResult<()> {
    for (name, ty) in program.globals() {
        let llvm_type = basic_type(context, ty)
            .map_err(|_| CompileError::typing(format!("global {name} has no usable type {ty}")))?;
        let initial = match program.initial.get(name) {
            Some(&value) => scalar_constant(context, value, ty)?,
            None => zero_value(context, ty)?,
        };
        let global = module.add_global(llvm_type, None, &global_symbol(name));
        global.set_initializer(&initial);
        global.set_linkage(Linkage::Internal);
        log::debug!("global {name}: {ty} = {initial:?}");
    }
    Ok(())
}

/// Per-function lowering state handed to the opcode handlers.
pub struct Emitter<'ctx, 'f, 'arena> {
    context: &'ctx Context,
    module: &'f Module<'ctx>,
    builder: Builder<'ctx>,
    func: &'f Function<'arena>,
    session: &'f CompilationSession<'arena>,
    function: FunctionValue<'ctx>,
    blocks: Vec<BasicBlock<'ctx>>,
    /// LLVM block each IR block currently ends in.
    exits: HashMap<BlockId, BasicBlock<'ctx>>,
    current: BlockId,
    values: HashMap<ValueId, BasicValueEnum<'ctx>>,
    pending_phis: Vec<(InstrId, PhiValue<'ctx>)>,
}

impl<'ctx, 'f, 'arena> Emitter<'ctx, 'f, 'arena> {
    /// Look up the declaration of `func` and create its blocks.
    pub fn new(
        context: &'ctx Context,
        module: &'f Module<'ctx>,
        func: &'f Function<'arena>,
        session: &'f CompilationSession<'arena>,
    ) -> CompileResult<Self> {
        let function = module
            .get_function(func.name)
            .ok_or_else(|| CompileError::backend(format!("{} was never declared", func.name)))?;

        let blocks = (0..func.blocks.len())
            .map(|index| {
                let name = if index == 0 {
                    "entry".to_string()
                } else {
                    BlockId(index as u32).to_string()
                };
                context.append_basic_block(function, &name)
            })
            .collect();

        Ok(Self {
            context,
            module,
            builder: context.create_builder(),
            func,
            session,
            function,
            blocks,
            exits: HashMap::new(),
            current: BlockId::ENTRY,
            values: HashMap::new(),
            pending_phis: Vec::new(),
        })
    }

    /// Lower every block and complete the phis.
    pub fn run(mut self) -> CompileResult<FunctionValue<'ctx>> {
        self.emit_entry()?;
        for block in self.func.reverse_post_order() {
            if block != BlockId::ENTRY {
                self.emit_block(block)?;
            }
        }
        self.complete_phis()?;
        Ok(self.function)
    }

    fn emit_entry(&mut self) -> CompileResult<()> {
        let entry = self.block(BlockId::ENTRY)?;
        self.builder.position_at_end(entry);
        self.exits.insert(BlockId::ENTRY, entry);
        for (index, &param) in self.func.params.iter().enumerate() {
            let value = self.function.get_nth_param(index as u32).ok_or_else(|| {
                CompileError::backend(format!("missing parameter {index} of {}", self.func.name))
            })?;
            if let Some(name) = self.func.var_name(param) {
                value.set_name(name);
            }
            self.values.insert(param, value);
        }
        let first = self.block(BlockId(1))?;
        self.builder.build_unconditional_branch(first)?;
        Ok(())
    }

    fn emit_block(&mut self, block: BlockId) -> CompileResult<()> {
        self.current = block;
        let bb = self.block(block)?;
        self.builder.position_at_end(bb);
        self.exits.insert(block, bb);

        for id in self.func.block_instrs(block) {
            let instr = self.func.instr(id);
            log::trace!("lower {}", self.func.print_instr(id));
            instr
                .handler()
                .lower(self, id)
                .map_err(|e| e.at(&instr.loc))?;
            self.session.record_instruction_lowered(instr.name());
        }

        let end = self.exit(block)?;
        if end.get_terminator().is_none() {
            let next = self.func.blocks[block.index()]
                .succs
                .first()
                .copied()
                .ok_or_else(|| CompileError::backend(format!("{block} has no successor")))?;
            let next = self.block(next)?;
            self.builder.build_unconditional_branch(next)?;
        }
        Ok(())
    }

    fn complete_phis(&mut self) -> CompileResult<()> {
        for (id, phi) in std::mem::take(&mut self.pending_phis) {
            let instr = self.func.instr(id);
            for (&operand, pred) in instr.operands.iter().zip(&instr.preds) {
                let PhiPred::Block(pred) = *pred else {
                    return Err(CompileError::backend("phi edge was never resolved to a block")
                        .at(&instr.loc));
                };
                let bb = self.exit(pred)?;
                match bb.get_terminator() {
                    Some(terminator) => self.builder.position_before(&terminator),
                    None => self.builder.position_at_end(bb),
                }
                self.current = pred;
                let value = self.value(operand).map_err(|e| e.at(&instr.loc))?;
                phi.add_incoming(&[(&value, bb)]);
            }
        }
        Ok(())
    }

    fn block(&self, block: BlockId) -> CompileResult<BasicBlock<'ctx>> {
        self.blocks
            .get(block.index())
            .copied()
            .ok_or_else(|| CompileError::backend(format!("no LLVM block for {block}")))
    }

    fn exit(&self, block: BlockId) -> CompileResult<BasicBlock<'ctx>> {
        self.exits
            .get(&block)
            .copied()
            .ok_or_else(|| CompileError::backend(format!("{block} was never lowered")))
    }

    pub fn context(&self) -> &'ctx Context {
        self.context
    }

    pub fn builder(&self) -> &Builder<'ctx> {
        &self.builder
    }

    pub fn func(&self) -> &'f Function<'arena> {
        self.func
    }

    pub fn instr(&self, id: InstrId) -> &'f Instruction {
        self.func.instr(id)
    }

    pub fn return_ty(&self) -> Type {
        self.func.ty(self.func.result)
    }

    pub fn llvm_type(&self, ty: Type) -> CompileResult<BasicTypeEnum<'ctx>> {
        basic_type(self.context, ty)
    }

    pub fn operand_ty(&self, id: InstrId, index: usize) -> CompileResult<Type> {
        Ok(self.func.ty(self.operand_id(id, index)?))
    }

    pub fn result_ty(&self, id: InstrId) -> CompileResult<Type> {
        let instr = self.func.instr(id);
        let result = instr
            .result
            .ok_or_else(|| CompileError::backend(format!("{} has no result", instr.name())))?;
        Ok(self.func.ty(result))
    }

    pub fn operand_id(&self, id: InstrId, index: usize) -> CompileResult<ValueId> {
        let instr = self.func.instr(id);
        instr.operands.get(index).copied().ok_or_else(|| {
            CompileError::backend(format!("{} has no operand {index}", instr.name()))
        })
    }

    /// LLVM value of operand `index`, materialising constants and casts.
    pub fn operand(&mut self, id: InstrId, index: usize) -> CompileResult<BasicValueEnum<'ctx>> {
        let operand = self.operand_id(id, index)?;
        self.value(operand)
    }

    pub fn bind_result(&mut self, id: InstrId, value: BasicValueEnum<'ctx>) -> CompileResult<()> {
        let instr = self.func.instr(id);
        let result = instr
            .result
            .ok_or_else(|| CompileError::backend(format!("{} has no result", instr.name())))?;
        self.values.insert(result, value);
        Ok(())
    }

    /// LLVM value of an IR value.
    pub fn value(&mut self, id: ValueId) -> CompileResult<BasicValueEnum<'ctx>> {
        if let Some(&value) = self.values.get(&id) {
            return Ok(value);
        }
        let data = *self.func.value(id);
        let value = match data.kind {
            ValueKind::Constant(c) => scalar_constant(self.context, c, data.ty)?,
            ValueKind::Cast { source } => {
                let value = match self.func.value(source).kind {
                    ValueKind::Constant(c) => scalar_constant(self.context, c, data.ty)?,
                    _ => self.emit_cast(source, data.ty)?,
                };
                self.session.record_cast_emitted();
                value
            }
            ValueKind::Variable { .. } | ValueKind::Callee(_) => {
                return Err(CompileError::backend(format!(
                    "{} is used before it is defined",
                    self.func.describe(id)
                )))
            }
        };
        self.values.insert(id, value);
        Ok(value)
    }

    /// Convert `source` right after its definition, then return to the
    /// current insertion point.
    fn emit_cast(&mut self, source: ValueId, ty: Type) -> CompileResult<BasicValueEnum<'ctx>> {
        let input = self.value(source)?;
        let resume = self.builder.get_insert_block();

        match input.as_instruction_value() {
            Some(def) if def.get_opcode() == InstructionOpcode::Phi => {
                let mut last = def;
                while let Some(next) = last.get_next_instruction() {
                    if next.get_opcode() != InstructionOpcode::Phi {
                        break;
                    }
                    last = next;
                }
                self.position_after(last)?;
            }
            Some(def) => self.position_after(def)?,
            None => {
                let entry = self.block(BlockId::ENTRY)?;
                match entry.get_terminator() {
                    Some(terminator) => self.builder.position_before(&terminator),
                    None => self.builder.position_at_end(entry),
                }
            }
        }
        let converted = self.convert(input, self.func.ty(source), ty);

        if let Some(bb) = resume {
            match bb.get_terminator() {
                Some(terminator) => self.builder.position_before(&terminator),
                None => self.builder.position_at_end(bb),
            }
        }
        converted
    }

    fn position_after(&self, def: inkwell::values::InstructionValue<'ctx>) -> CompileResult<()> {
        match def.get_next_instruction() {
            Some(next) => self.builder.position_before(&next),
            None => {
                let parent = def
                    .get_parent()
                    .ok_or_else(|| CompileError::backend("cast source outside any block"))?;
                self.builder.position_at_end(parent);
            }
        }
        Ok(())
    }

    /// Widening conversion between scalar representations.
    pub fn convert(
        &self,
        value: BasicValueEnum<'ctx>,
        from: Type,
        to: Type,
    ) -> CompileResult<BasicValueEnum<'ctx>> {
        let b = &self.builder;
        let (i64_type, f64_type) = (self.context.i64_type(), self.context.f64_type());
        let converted: BasicValueEnum = match (from, to) {
            _ if from == to => value,
            (Type::Int, Type::Float) => b
                .build_signed_int_to_float(value.into_int_value(), f64_type, "tofloat")?
                .into(),
            (Type::Bool, Type::Int) => b
                .build_int_z_extend(value.into_int_value(), i64_type, "widen")?
                .into(),
            (Type::Bool, Type::Float) => b
                .build_unsigned_int_to_float(value.into_int_value(), f64_type, "tofloat")?
                .into(),
            _ => {
                return Err(CompileError::backend(format!(
                    "no conversion from {from} to {to}"
                )))
            }
        };
        Ok(converted)
    }

    /// `fptosi` guarded against values outside the `i64` range and NaN.
    pub fn checked_float_to_int(&mut self, value: FloatValue<'ctx>) -> CompileResult<IntValue<'ctx>> {
        let f64_type = self.context.f64_type();
        let limit = 9_223_372_036_854_775_808.0;
        let b = &self.builder;
        let above = b.build_float_compare(
            FloatPredicate::OGE,
            value,
            f64_type.const_float(-limit),
            "fits.lo",
        )?;
        let below =
            b.build_float_compare(FloatPredicate::OLT, value, f64_type.const_float(limit), "fits.hi")?;
        let fits = b.build_and(above, below, "fits")?;
        self.guard(fits, Fault::Overflow)?;
        Ok(self
            .builder
            .build_float_to_signed_int(value, self.context.i64_type(), "toint")?)
    }

    /// Truth value of a scalar as `i1`.
    pub fn truth(&self, value: BasicValueEnum<'ctx>, ty: Type) -> CompileResult<IntValue<'ctx>> {
        match ty {
            Type::Bool => Ok(value.into_int_value()),
            Type::Int => {
                let zero = self.context.i64_type().const_zero();
                Ok(self.builder.build_int_compare(
                    IntPredicate::NE,
                    value.into_int_value(),
                    zero,
                    "truth",
                )?)
            }
            Type::Float => {
                let zero = self.context.f64_type().const_zero();
                Ok(self.builder.build_float_compare(
                    FloatPredicate::UNE,
                    value.into_float_value(),
                    zero,
                    "truth",
                )?)
            }
            other => Err(CompileError::typing(format!("cannot test {other} for truth"))),
        }
    }

    /// Narrow a float result to an integer when the instruction's result is one.
    pub fn narrow_float_result(
        &mut self,
        id: InstrId,
        value: FloatValue<'ctx>,
    ) -> CompileResult<BasicValueEnum<'ctx>> {
        match self.result_ty(id)? {
            Type::Float => Ok(value.into()),
            Type::Int => Ok(self.checked_float_to_int(value)?.into()),
            other => Err(CompileError::backend(format!("float result narrowed to {other}"))),
        }
    }

    /// `(taken, fallthrough)` successors of the jump ending the current block.
    pub fn successors(&self, id: InstrId) -> CompileResult<(BasicBlock<'ctx>, BasicBlock<'ctx>)> {
        let instr = self.func.instr(id);
        let block = instr
            .block
            .ok_or_else(|| CompileError::backend(format!("{} has no block", instr.name())))?;
        match self.func.blocks[block.index()].succs[..] {
            [target] => Ok((self.block(target)?, self.block(target)?)),
            [taken, fallthrough] => Ok((self.block(taken)?, self.block(fallthrough)?)),
            _ => Err(CompileError::backend(format!(
                "{} ends {block} without a jump target",
                instr.name()
            ))),
        }
    }

    /// Branch on `ok`, continuing in a fresh block. Returns the block taken
    /// when `ok` is false, with the builder positioned at its end.
    fn split(&mut self, ok: IntValue<'ctx>, name: &str) -> CompileResult<BasicBlock<'ctx>> {
        let failed = self.context.append_basic_block(self.function, name);
        let cont = self.context.append_basic_block(self.function, "cont");
        self.builder.build_conditional_branch(ok, cont, failed)?;
        self.exits.insert(self.current, cont);
        self.builder.position_at_end(failed);
        Ok(cont)
    }

    /// Continue lowering after `ok` holds; otherwise raise `fault` and return.
    pub fn guard(&mut self, ok: IntValue<'ctx>, fault: Fault) -> CompileResult<()> {
        let cont = self.split(ok, &format!("fault.{}", fault.name()))?;
        let i32_type = self.context.i32_type();
        let helper = self.declare_runtime(
            FAULT_HELPER,
            self.context.void_type().fn_type(&[i32_type.into()], false),
        );
        let code = i32_type.const_int(fault.code() as u64, false);
        self.builder.build_call(helper, &[code.into()], "")?;
        let flag = self.fault_flag();
        self.builder
            .build_store(flag.as_pointer_value(), self.context.bool_type().const_all_ones())?;
        self.build_zero_return()?;
        self.builder.position_at_end(cont);
        Ok(())
    }

    /// Return immediately when a callee raised a fault.
    fn unwind_on_fault(&mut self) -> CompileResult<()> {
        let flag = self.fault_flag();
        let raised = self
            .builder
            .build_load(self.context.bool_type(), flag.as_pointer_value(), "faulted")?
            .into_int_value();
        let clear = self.builder.build_not(raised, "clear")?;
        let cont = self.split(clear, "unwind")?;
        self.build_zero_return()?;
        self.builder.position_at_end(cont);
        Ok(())
    }

    fn fault_flag(&self) -> GlobalValue<'ctx> {
        self.module.get_global(FAULT_FLAG).unwrap_or_else(|| {
            let bool_type = self.context.bool_type();
            let flag = self.module.add_global(bool_type, None, FAULT_FLAG);
            flag.set_initializer(&bool_type.const_zero());
            flag.set_linkage(Linkage::Internal);
            flag
        })
    }

    fn build_zero_return(&self) -> CompileResult<()> {
        match self.return_ty() {
            Type::Void => self.builder.build_return(None)?,
            ty => {
                let zero = zero_value(self.context, ty)?;
                self.builder.build_return(Some(&zero))?
            }
        };
        Ok(())
    }

    /// Call another function of the program, unwinding if it faulted.
    pub fn call_compiled(
        &mut self,
        name: &str,
        args: &[BasicMetadataValueEnum<'ctx>],
    ) -> CompileResult<Option<BasicValueEnum<'ctx>>> {
        let callee = self
            .module
            .get_function(name)
            .ok_or_else(|| CompileError::backend(format!("call of undeclared function {name}")))?;
        let call = self.builder.build_call(callee, args, name)?;
        let value = call.try_as_basic_value().left();
        self.unwind_on_fault()?;
        Ok(value)
    }

    /// Stack slot in the entry block, live for the whole call.
    pub fn entry_alloca(&self, ty: BasicTypeEnum<'ctx>, name: &str) -> CompileResult<PointerValue<'ctx>> {
        let builder = self.context.create_builder();
        let entry = self.block(BlockId::ENTRY)?;
        match entry.get_terminator() {
            Some(terminator) => builder.position_before(&terminator),
            None => builder.position_at_end(entry),
        }
        Ok(builder.build_alloca(ty, name)?)
    }

    /// Address of the LLVM global backing module global `name`.
    pub fn global_slot(&self, name: &str) -> CompileResult<PointerValue<'ctx>> {
        self.module
            .get_global(&global_symbol(name))
            .map(|global| global.as_pointer_value())
            .ok_or_else(|| CompileError::backend(format!("global {name} was never declared")))
    }

    /// Declaration of an overloaded LLVM intrinsic.
    pub fn intrinsic(
        &self,
        name: &str,
        types: &[BasicTypeEnum<'ctx>],
    ) -> CompileResult<FunctionValue<'ctx>> {
        Intrinsic::find(name)
            .and_then(|intrinsic| intrinsic.get_declaration(self.module, types))
            .ok_or_else(|| CompileError::backend(format!("intrinsic {name} is not available")))
    }

    /// Declare an external routine the JIT must resolve.
    pub fn declare_runtime(&self, name: &str, fn_type: FunctionType<'ctx>) -> FunctionValue<'ctx> {
        self.module
            .get_function(name)
            .unwrap_or_else(|| self.module.add_function(name, fn_type, None))
    }

    pub fn call_float(
        &self,
        callee: FunctionValue<'ctx>,
        args: &[BasicMetadataValueEnum<'ctx>],
        name: &str,
    ) -> CompileResult<FloatValue<'ctx>> {
        let call = self.builder.build_call(callee, args, name)?;
        call.try_as_basic_value()
            .left()
            .map(|value| value.into_float_value())
            .ok_or_else(|| CompileError::backend(format!("call to {name} produced no value")))
    }

    /// Complete `phi` once every block is lowered.
    pub fn defer_phi(&mut self, id: InstrId, phi: PhiValue<'ctx>) {
        self.pending_phis.push((id, phi));
    }
}

/// Emit the body of `func` into its declaration in `module`.
pub fn emit_function<'ctx, 'arena>(
    context: &'ctx Context,
    module: &Module<'ctx>,
    func: &Function<'arena>,
    session: &CompilationSession<'arena>,
) -> CompileResult<FunctionValue<'ctx>> {
    let function = Emitter::new(context, module, func, session)?.run()?;
    log::debug!(
        "{}: emitted {} blocks",
        func.name,
        function.count_basic_blocks()
    );
    Ok(function)
}
