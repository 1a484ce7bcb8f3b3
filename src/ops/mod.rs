// Every opcode the compiler understands is described by one handler object. The handler
// carries the three pieces of per-opcode knowledge the pipeline needs: the stack effect the
// IR builder uses to turn pushes and pops into operands, the inference rule that joins
// operand and result types (splicing casts where the operands disagree), and the lowering
// rule that turns a typed instruction into LLVM IR. Handlers are stateless statics looked up
// through a single match over the opcode, so the builder, the inferencer and the emitter all
// dispatch the same way and adding an opcode is a matter of adding one arm here and one
// handler next to its relatives.
//
// Stack shuffles are resolved by the IR builder itself and reach the handlers only as
// discarded records. Opcodes that the listing parser recognises but that have no typed
// meaning in this compiler map onto rejecting handlers. Their stack effect is an error, so a function that
// reaches one fails while the IR is being built, before any type is inferred.

//! Per-opcode stack effects, inference rules and lowering rules.

mod arith;
mod call;
mod compare;
mod flow;
mod iter;
mod locals;
mod subscript;

use crate::bytecode::{Opcode, Operand};
use crate::core::{CompileError, CompileResult, Type};
use crate::ir::infer::InferCx;
use crate::ir::InstrId;
use crate::llvm::Emitter;

/// Operand and result counts of an instruction on the value stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackEffect {
    pub pops: usize,
    pub pushes: usize,
}

/// Behaviour of one opcode across the pipeline.
pub trait OpHandler: Sync {
    /// Stack effect used while building the IR.
    fn stack_effect(&self, op: Opcode, _operand: &Operand) -> CompileResult<StackEffect> {
        let info = op.info();
        Ok(StackEffect {
            pops: info.pops as usize,
            pushes: info.pushes as usize,
        })
    }

    /// Join operand and result types, inserting casts where needed.
    fn infer(&self, cx: &mut InferCx<'_, '_>, id: InstrId) -> CompileResult<()>;

    /// Emit LLVM IR at the emitter's current position.
    fn lower(&self, em: &mut Emitter<'_, '_, '_>, id: InstrId) -> CompileResult<()>;
}

impl Opcode {
    pub fn handler(self) -> &'static dyn OpHandler {
        use Opcode::*;
        match self {
            Nop | PopBlock | SetupLoop | LoadConst | PopTop | DupTop | DupTopTwo | RotTwo
            | RotThree => &locals::PASSIVE,
            LoadFast => &locals::LOAD_FAST,
            StoreFast => &locals::STORE_FAST,
            LoadGlobal => &locals::LOAD_GLOBAL,
            StoreGlobal => &locals::STORE_GLOBAL,
            UnaryNegative => &arith::NEGATIVE,
            UnaryNot => &arith::NOT,
            BinaryAdd | InplaceAdd => &arith::ADD,
            BinarySubtract | InplaceSubtract => &arith::SUBTRACT,
            BinaryMultiply | InplaceMultiply => &arith::MULTIPLY,
            BinaryModulo | InplaceModulo => &arith::MODULO,
            BinaryTrueDivide | InplaceTrueDivide => &arith::TRUE_DIVIDE,
            BinaryFloorDivide | InplaceFloorDivide => &arith::FLOOR_DIVIDE,
            BinaryPower | InplacePower => &arith::POWER,
            CompareOp => &compare::COMPARE,
            ReturnValue => &flow::RETURN,
            JumpAbsolute | JumpForward => &flow::JUMP,
            PopJumpIfFalse | PopJumpIfTrue | JumpIfFalseOrPop | JumpIfTrueOrPop => {
                &flow::BRANCH
            }
            CallFunction => &call::CALL,
            BinarySubscr => &subscript::LOAD_ITEM,
            StoreSubscr => &subscript::STORE_ITEM,
            GetIter => &iter::GET_ITER,
            ForIter => &iter::FOR_ITER,
            LoadAttr | StoreAttr => &Rejected::Unimplemented("attributes"),
            BuildTuple | BuildList => &Rejected::Unimplemented("tuples and lists"),
            SetupExcept | RaiseVarargs => &Rejected::Unimplemented("exceptions"),
            UnaryPositive | UnaryInvert | BinaryAnd | BinaryOr | BinaryXor | BinaryLshift
            | BinaryRshift => &Rejected::Unsupported,
        }
    }
}

/// Handler for the phi nodes inserted at control-flow joins.
pub fn phi_handler() -> &'static dyn OpHandler {
    &flow::PHI
}

/// Type error unless `ty` is usable as an integer index or bound.
pub(crate) fn require_int(what: &str, ty: Type) -> CompileResult<()> {
    match ty {
        Type::Unknown | Type::Int => Ok(()),
        other => Err(CompileError::typing(format!("{what} must be int, not {other}"))),
    }
}

/// Type error unless `ty` can take part in arithmetic.
pub(crate) fn require_numeric(op: &str, ty: Type) -> CompileResult<()> {
    match ty {
        Type::Unknown | Type::Int | Type::Float => Ok(()),
        other => Err(CompileError::typing(format!(
            "{op} does not support {other} operands"
        ))),
    }
}

/// Opcodes with no typed lowering.
enum Rejected {
    /// Language feature the compiler does not implement yet.
    Unimplemented(&'static str),
    Unsupported,
}

impl Rejected {
    fn error(&self, name: &str) -> CompileError {
        match self {
            Rejected::Unimplemented(feature) => {
                CompileError::unimplemented(format!("{feature} ({name})"))
            }
            Rejected::Unsupported => CompileError::unsupported(name, "no lowering rule exists"),
        }
    }
}

impl OpHandler for Rejected {
    fn stack_effect(&self, op: Opcode, _operand: &Operand) -> CompileResult<StackEffect> {
        Err(self.error(op.name()))
    }

    fn infer(&self, cx: &mut InferCx<'_, '_>, id: InstrId) -> CompileResult<()> {
        Err(self.error(cx.instr(id).name()))
    }

    fn lower(&self, em: &mut Emitter<'_, '_, '_>, id: InstrId) -> CompileResult<()> {
        Err(self.error(em.instr(id).name()))
    }
}
