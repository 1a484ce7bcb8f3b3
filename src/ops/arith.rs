//! Arithmetic and unary opcodes.
//!
//! Operands are widened to the joined numeric type before the operation.
//! The exceptions are true division, which always works in floats, and
//! floor division and power, which compute in floats and narrow the result
//! back to an integer when every operand was one. Division and modulo by
//! zero raise `ZeroDivision` at run time; narrowed results that do not fit
//! raise `Overflow`.

use super::{require_numeric, OpHandler};
use crate::core::{CompileError, CompileResult, Type};
use crate::ir::infer::InferCx;
use crate::ir::InstrId;
use crate::llvm::runtime::POWI_HELPER;
use crate::llvm::{Emitter, Fault};
use inkwell::values::{BasicValueEnum, FloatValue, IntValue};
use inkwell::{FloatPredicate, IntPredicate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Subtract,
    Multiply,
    /// Floored modulo: the result takes the sign of the divisor.
    Modulo,
}

/// Operations computed directly in the joined operand type.
pub struct Arith(pub ArithOp);

pub static ADD: Arith = Arith(ArithOp::Add);
pub static SUBTRACT: Arith = Arith(ArithOp::Subtract);
pub static MULTIPLY: Arith = Arith(ArithOp::Multiply);
pub static MODULO: Arith = Arith(ArithOp::Modulo);

impl OpHandler for Arith {
    fn infer(&self, cx: &mut InferCx<'_, '_>, id: InstrId) -> CompileResult<()> {
        let name = cx.instr(id).name();
        let result = cx.result(id)?;
        let mut ty = cx.func.ty(result);
        for index in 0..2 {
            let operand = cx.operand_ty(id, index)?;
            require_numeric(name, operand)?;
            ty = ty.unify(operand)?;
        }
        let ty = cx.unify_into(result, ty)?;
        cx.coerce_all(id, ty)
    }

    fn lower(&self, em: &mut Emitter<'_, '_, '_>, id: InstrId) -> CompileResult<()> {
        let lhs = em.operand(id, 0)?;
        let rhs = em.operand(id, 1)?;
        let value: BasicValueEnum = match (em.result_ty(id)?, self.0) {
            (Type::Int, ArithOp::Modulo) => {
                int_floored_mod(em, lhs.into_int_value(), rhs.into_int_value())?.into()
            }
            (Type::Float, ArithOp::Modulo) => {
                float_floored_mod(em, lhs.into_float_value(), rhs.into_float_value())?.into()
            }
            (Type::Int, op) => {
                let (l, r) = (lhs.into_int_value(), rhs.into_int_value());
                let b = em.builder();
                match op {
                    ArithOp::Add => b.build_int_add(l, r, "add")?.into(),
                    ArithOp::Subtract => b.build_int_sub(l, r, "sub")?.into(),
                    _ => b.build_int_mul(l, r, "mul")?.into(),
                }
            }
            (Type::Float, op) => {
                let (l, r) = (lhs.into_float_value(), rhs.into_float_value());
                let b = em.builder();
                match op {
                    ArithOp::Add => b.build_float_add(l, r, "fadd")?.into(),
                    ArithOp::Subtract => b.build_float_sub(l, r, "fsub")?.into(),
                    _ => b.build_float_mul(l, r, "fmul")?.into(),
                }
            }
            (other, _) => {
                return Err(CompileError::backend(format!(
                    "{} on {other} values",
                    em.instr(id).name()
                )))
            }
        };
        em.bind_result(id, value)
    }
}

/// Raise `ZeroDivision` unless `rhs` is nonzero.
fn guard_int_divisor<'ctx>(
    em: &mut Emitter<'ctx, '_, '_>,
    rhs: IntValue<'ctx>,
) -> CompileResult<()> {
    let zero = rhs.get_type().const_zero();
    let nonzero = em
        .builder()
        .build_int_compare(IntPredicate::NE, rhs, zero, "divisor.nz")?;
    em.guard(nonzero, Fault::ZeroDivision)
}

/// Raise `ZeroDivision` when `rhs` is zero. NaN divisors pass.
fn guard_float_divisor<'ctx>(
    em: &mut Emitter<'ctx, '_, '_>,
    rhs: FloatValue<'ctx>,
) -> CompileResult<()> {
    let zero = rhs.get_type().const_zero();
    let nonzero = em
        .builder()
        .build_float_compare(FloatPredicate::UNE, rhs, zero, "divisor.nz")?;
    em.guard(nonzero, Fault::ZeroDivision)
}

/// `srem` adjusted towards negative infinity.
fn int_floored_mod<'ctx>(
    em: &mut Emitter<'ctx, '_, '_>,
    lhs: IntValue<'ctx>,
    rhs: IntValue<'ctx>,
) -> CompileResult<IntValue<'ctx>> {
    guard_int_divisor(em, rhs)?;
    let b = em.builder();
    let int_type = lhs.get_type();
    let zero = int_type.const_zero();
    // `MIN % -1` traps in `srem`; any remainder by -1 is 0, as it is by 1.
    let minus_one = b.build_int_compare(
        IntPredicate::EQ,
        rhs,
        int_type.const_all_ones(),
        "divisor.m1",
    )?;
    let rhs = b
        .build_select(minus_one, int_type.const_int(1, false), rhs, "divisor")?
        .into_int_value();
    let rem = b.build_int_signed_rem(lhs, rhs, "rem")?;
    let nonzero = b.build_int_compare(IntPredicate::NE, rem, zero, "rem.nz")?;
    let signs = b.build_xor(rem, rhs, "rem.signs")?;
    let differ = b.build_int_compare(IntPredicate::SLT, signs, zero, "rem.neg")?;
    let adjust = b.build_and(nonzero, differ, "rem.adjust")?;
    let fixed = b.build_int_add(rem, rhs, "rem.fixed")?;
    Ok(b.build_select(adjust, fixed, rem, "mod")?.into_int_value())
}

/// `frem` adjusted towards negative infinity.
fn float_floored_mod<'ctx>(
    em: &mut Emitter<'ctx, '_, '_>,
    lhs: FloatValue<'ctx>,
    rhs: FloatValue<'ctx>,
) -> CompileResult<FloatValue<'ctx>> {
    guard_float_divisor(em, rhs)?;
    let b = em.builder();
    let zero = lhs.get_type().const_zero();
    let rem = b.build_float_rem(lhs, rhs, "frem")?;
    let nonzero = b.build_float_compare(FloatPredicate::ONE, rem, zero, "frem.nz")?;
    let rem_neg = b.build_float_compare(FloatPredicate::OLT, rem, zero, "frem.neg")?;
    let rhs_neg = b.build_float_compare(FloatPredicate::OLT, rhs, zero, "rhs.neg")?;
    let differ = b.build_xor(rem_neg, rhs_neg, "frem.signs")?;
    let adjust = b.build_and(nonzero, differ, "frem.adjust")?;
    let fixed = b.build_float_add(rem, rhs, "frem.fixed")?;
    Ok(b.build_select(adjust, fixed, rem, "fmod")?.into_float_value())
}

/// `a / b`: always a float.
pub struct TrueDivide;

pub static TRUE_DIVIDE: TrueDivide = TrueDivide;

impl OpHandler for TrueDivide {
    fn infer(&self, cx: &mut InferCx<'_, '_>, id: InstrId) -> CompileResult<()> {
        let name = cx.instr(id).name();
        for index in 0..2 {
            require_numeric(name, cx.origin_ty(id, index)?)?;
        }
        let result = cx.result(id)?;
        cx.unify_into(result, Type::Float)?;
        cx.coerce_all(id, Type::Float)
    }

    fn lower(&self, em: &mut Emitter<'_, '_, '_>, id: InstrId) -> CompileResult<()> {
        let lhs = em.operand(id, 0)?.into_float_value();
        let rhs = em.operand(id, 1)?.into_float_value();
        guard_float_divisor(em, rhs)?;
        let quotient = em.builder().build_float_div(lhs, rhs, "div")?;
        em.bind_result(id, quotient.into())
    }
}

/// `a // b`: the floor of the float quotient, narrowed back to an integer
/// when both operands were integers.
pub struct FloorDivide;

pub static FLOOR_DIVIDE: FloorDivide = FloorDivide;

impl OpHandler for FloorDivide {
    fn infer(&self, cx: &mut InferCx<'_, '_>, id: InstrId) -> CompileResult<()> {
        let name = cx.instr(id).name();
        let result = cx.result(id)?;
        let mut ty = cx.func.ty(result);
        for index in 0..2 {
            let origin = cx.origin_ty(id, index)?;
            require_numeric(name, origin)?;
            ty = ty.unify(origin)?;
        }
        cx.unify_into(result, ty)?;
        cx.coerce_all(id, Type::Float)
    }

    fn lower(&self, em: &mut Emitter<'_, '_, '_>, id: InstrId) -> CompileResult<()> {
        let lhs = em.operand(id, 0)?.into_float_value();
        let rhs = em.operand(id, 1)?.into_float_value();
        guard_float_divisor(em, rhs)?;
        let quotient = em.builder().build_float_div(lhs, rhs, "div")?;
        let floor = em.intrinsic("llvm.floor", &[em.context().f64_type().into()])?;
        let floored = em.call_float(floor, &[quotient.into()], "floor")?;
        let value = em.narrow_float_result(id, floored)?;
        em.bind_result(id, value)
    }
}

/// `a ** b`: computed on a float base.
pub struct Power;

pub static POWER: Power = Power;

impl OpHandler for Power {
    fn infer(&self, cx: &mut InferCx<'_, '_>, id: InstrId) -> CompileResult<()> {
        let name = cx.instr(id).name();
        let result = cx.result(id)?;
        let mut ty = cx.func.ty(result);
        for index in 0..2 {
            let origin = cx.origin_ty(id, index)?;
            require_numeric(name, origin)?;
            ty = ty.unify(origin)?;
        }
        cx.unify_into(result, ty)?;
        cx.coerce_operand(id, 0, Type::Float)
    }

    fn lower(&self, em: &mut Emitter<'_, '_, '_>, id: InstrId) -> CompileResult<()> {
        let base = em.operand(id, 0)?.into_float_value();
        let exponent = em.operand(id, 1)?;
        let f64_type = em.context().f64_type();

        let raised = match em.operand_ty(id, 1)? {
            Type::Int => {
                let i32_type = em.context().i32_type();
                let narrowed = em.builder().build_int_truncate(
                    exponent.into_int_value(),
                    i32_type,
                    "exp",
                )?;
                let powi = em.intrinsic("llvm.powi", &[f64_type.into(), i32_type.into()])?;
                let helper = f64_type.fn_type(&[f64_type.into(), i32_type.into()], false);
                em.declare_runtime(POWI_HELPER, helper);
                em.call_float(powi, &[base.into(), narrowed.into()], "powi")?
            }
            Type::Float => {
                let pow = em.intrinsic("llvm.pow", &[f64_type.into()])?;
                em.call_float(pow, &[base.into(), exponent.into()], "pow")?
            }
            other => {
                return Err(CompileError::backend(format!("exponent of type {other}")));
            }
        };
        let value = em.narrow_float_result(id, raised)?;
        em.bind_result(id, value)
    }
}

/// `-a`
pub struct Negative;

pub static NEGATIVE: Negative = Negative;

impl OpHandler for Negative {
    fn infer(&self, cx: &mut InferCx<'_, '_>, id: InstrId) -> CompileResult<()> {
        let operand = cx.operand_ty(id, 0)?;
        require_numeric(cx.instr(id).name(), operand)?;
        let result = cx.result(id)?;
        let ty = cx.unify_into(result, operand)?;
        cx.coerce_operand(id, 0, ty)
    }

    fn lower(&self, em: &mut Emitter<'_, '_, '_>, id: InstrId) -> CompileResult<()> {
        let operand = em.operand(id, 0)?;
        let value: BasicValueEnum = match em.result_ty(id)? {
            Type::Int => em
                .builder()
                .build_int_neg(operand.into_int_value(), "neg")?
                .into(),
            Type::Float => em
                .builder()
                .build_float_neg(operand.into_float_value(), "fneg")?
                .into(),
            other => return Err(CompileError::backend(format!("negation of {other}"))),
        };
        em.bind_result(id, value)
    }
}

/// `not a`
pub struct Not;

pub static NOT: Not = Not;

impl OpHandler for Not {
    fn infer(&self, cx: &mut InferCx<'_, '_>, id: InstrId) -> CompileResult<()> {
        if cx.operand_ty(id, 0)? == Type::Void {
            return Err(CompileError::typing("UNARY_NOT cannot test None"));
        }
        let result = cx.result(id)?;
        cx.unify_into(result, Type::Bool)?;
        Ok(())
    }

    fn lower(&self, em: &mut Emitter<'_, '_, '_>, id: InstrId) -> CompileResult<()> {
        let operand = em.operand(id, 0)?;
        let truth = em.truth(operand, em.operand_ty(id, 0)?)?;
        let inverted = em.builder().build_not(truth, "not")?;
        em.bind_result(id, inverted.into())
    }
}
