//! `BINARY_SUBSCR` and `STORE_SUBSCR` on fixed-length arrays.

use super::{require_int, OpHandler};
use crate::core::{CompileError, CompileResult, Elem, Type};
use crate::ir::infer::InferCx;
use crate::ir::InstrId;
use crate::llvm::{Emitter, Fault};
use inkwell::values::PointerValue;
use inkwell::IntPredicate;

/// Element type of an indexed operand, `None` while it is still unknown.
fn element(ty: Type) -> CompileResult<Option<Elem>> {
    match ty {
        Type::Array(elem, _) => Ok(Some(elem)),
        Type::Unknown => Ok(None),
        other => Err(CompileError::typing(format!("Indexing into {other} is not supported"))),
    }
}

/// Address of `array[index]`. Negative indices count from the end; anything
/// outside the array raises `IndexOutOfRange`.
fn element_ptr<'ctx>(
    em: &mut Emitter<'ctx, '_, '_>,
    id: InstrId,
    array: usize,
    index: usize,
) -> CompileResult<(PointerValue<'ctx>, Elem)> {
    let (elem, len) = match em.operand_ty(id, array)? {
        Type::Array(elem, len) => (elem, len),
        other => return Err(CompileError::backend(format!("indexing {other}"))),
    };
    let base = em.operand(id, array)?.into_pointer_value();
    let position = em.operand(id, index)?.into_int_value();

    let i64_type = em.context().i64_type();
    let len = i64_type.const_int(len as u64, false);
    let b = em.builder();
    let negative = b.build_int_compare(
        IntPredicate::SLT,
        position,
        i64_type.const_zero(),
        "index.neg",
    )?;
    let wrapped = b.build_int_add(position, len, "index.wrapped")?;
    let position = b
        .build_select(negative, wrapped, position, "index")?
        .into_int_value();
    let inside = b.build_int_compare(IntPredicate::ULT, position, len, "index.inside")?;
    em.guard(inside, Fault::IndexOutOfRange)?;

    let elem_type = em.llvm_type(elem.ty())?;
    // SAFETY: the index was checked against the array length above.
    let ptr = unsafe {
        em.builder()
            .build_in_bounds_gep(elem_type, base, &[position], "elem")?
    };
    Ok((ptr, elem))
}

/// `array[index]`
pub struct LoadItem;

pub static LOAD_ITEM: LoadItem = LoadItem;

impl OpHandler for LoadItem {
    fn infer(&self, cx: &mut InferCx<'_, '_>, id: InstrId) -> CompileResult<()> {
        let elem = element(cx.operand_ty(id, 0)?)?;
        require_int("Array index", cx.origin_ty(id, 1)?)?;
        if let Some(elem) = elem {
            let result = cx.result(id)?;
            cx.unify_into(result, elem.ty())?;
        }
        Ok(())
    }

    fn lower(&self, em: &mut Emitter<'_, '_, '_>, id: InstrId) -> CompileResult<()> {
        let (ptr, elem) = element_ptr(em, id, 0, 1)?;
        let elem_type = em.llvm_type(elem.ty())?;
        let value = em.builder().build_load(elem_type, ptr, "item")?;
        em.bind_result(id, value)
    }
}

/// `array[index] = value`: ints widen into float arrays, nothing narrows.
pub struct StoreItem;

pub static STORE_ITEM: StoreItem = StoreItem;

impl OpHandler for StoreItem {
    fn infer(&self, cx: &mut InferCx<'_, '_>, id: InstrId) -> CompileResult<()> {
        let elem = element(cx.operand_ty(id, 1)?)?;
        require_int("Array index", cx.origin_ty(id, 2)?)?;
        let Some(elem) = elem else {
            return Ok(());
        };
        let stored = cx.origin_ty(id, 0)?;
        match (stored, elem) {
            (Type::Unknown, _) | (Type::Int, _) | (Type::Float, Elem::Float) => {
                cx.coerce_operand(id, 0, elem.ty())
            }
            (other, elem) => Err(CompileError::typing(format!(
                "Storing {other} in an array of {}",
                elem.ty()
            ))),
        }
    }

    fn lower(&self, em: &mut Emitter<'_, '_, '_>, id: InstrId) -> CompileResult<()> {
        let value = em.operand(id, 0)?;
        let (ptr, _) = element_ptr(em, id, 1, 2)?;
        em.builder().build_store(ptr, value)?;
        Ok(())
    }
}
