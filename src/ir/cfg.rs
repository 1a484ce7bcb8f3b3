//! Control-flow assembly.
//!
//! Runs once the instruction graph is typed and every jump target resolved:
//!
//! 1. jump targets that land on discarded records move to the next kept one,
//!    then discarded records are unlinked;
//! 2. reachable instructions are cut into basic blocks at jump targets and
//!    after terminators and conditional jumps;
//! 3. successor and predecessor lists are derived from the block exits, and
//!    the edge references of stack phis are turned into predecessor blocks;
//! 4. every variable load is bound to its reaching definition, inserting
//!    variable phis on demand and dropping the trivial ones afterwards.
//!
//! Block 0 is an empty entry block whose only content is the parameters.

use super::{BasicBlock, BlockId, Function, InstrId, InstrKind, Instruction, PhiPred, ValueId};
use crate::bytecode::Opcode;
use crate::core::{CompilationSession, CompileError, CompileResult};
use hashbrown::{HashMap, HashSet};

pub fn assemble<'a>(func: &mut Function<'a>, session: &CompilationSession<'a>) -> CompileResult<()> {
    retarget_discarded(func)?;
    remove_discarded(func);
    form_blocks(func);
    link_blocks(func)?;
    resolve_stack_phis(func)?;
    SsaBuilder::new(func, session).run()?;
    log::debug!(
        "{}: {} blocks, {} phis",
        func.name,
        func.blocks.len(),
        func.phi_count()
    );
    Ok(())
}

fn retarget_discarded(func: &mut Function<'_>) -> CompileResult<()> {
    for id in func.order() {
        let Some(mut target) = func.instr(id).target else {
            continue;
        };
        let Some(mut anchor) = target.instr else {
            continue;
        };
        while func.instr(anchor).discard {
            anchor = func.instr(anchor).next.ok_or_else(|| {
                CompileError::unimplemented("jump past the last instruction")
                    .at(&func.instr(id).loc)
            })?;
        }
        target.instr = Some(anchor);
        func.instr_mut(id).target = Some(target);
    }
    Ok(())
}

fn remove_discarded(func: &mut Function<'_>) {
    for id in func.order() {
        if func.instr(id).discard {
            func.unlink(id);
        }
    }
}

fn form_blocks(func: &mut Function<'_>) {
    let is_target: HashSet<InstrId> = func
        .order()
        .into_iter()
        .filter(|&id| func.instr(id).reachable)
        .filter_map(|id| func.instr(id).target.and_then(|t| t.instr))
        .collect();

    func.blocks = vec![BasicBlock::default()];
    let mut current: Option<BlockId> = None;
    let mut previous: Option<InstrId> = None;

    for id in func.order() {
        if !func.instr(id).reachable {
            continue;
        }
        let ends_block = previous.map_or(true, |p| {
            let prev = func.instr(p);
            prev.is_terminator() || prev.is_conditional_jump()
        });

        // A conditional jump whose target is also its fallthrough gets an
        // empty block on the fallthrough edge so the two edges stay distinct.
        let jumps_to_next = previous.is_some_and(|p| {
            let prev = func.instr(p);
            prev.is_conditional_jump() && prev.target.and_then(|t| t.instr) == Some(id)
        });
        if jumps_to_next {
            func.blocks.push(BasicBlock::default());
        }

        if current.is_none() || ends_block || is_target.contains(&id) {
            let block = BlockId(func.blocks.len() as u32);
            func.blocks.push(BasicBlock {
                first: Some(id),
                ..BasicBlock::default()
            });
            current = Some(block);
        }
        if let Some(block) = current {
            func.instr_mut(id).block = Some(block);
            func.blocks[block.index()].last = Some(id);
        }
        previous = Some(id);
    }
}

fn link_blocks(func: &mut Function<'_>) -> CompileResult<()> {
    let count = func.blocks.len();
    if count < 2 {
        return Err(CompileError::unimplemented("function without reachable code"));
    }
    func.blocks[0].succs = vec![BlockId(1)];

    for index in 1..count {
        let next = BlockId(index as u32 + 1);
        let succs = match func.blocks[index].last {
            None => vec![next],
            Some(last) => {
                let instr = func.instr(last);
                let target = match instr.target.and_then(|t| t.instr) {
                    Some(t) => Some(func.instr(t).block.ok_or_else(|| {
                        CompileError::backend("jump target has no block").at(&instr.loc)
                    })?),
                    None => None,
                };
                match (instr.opcode(), target) {
                    (Some(Opcode::ReturnValue), _) => vec![],
                    (Some(op), Some(target)) if op.info().terminator => vec![target],
                    (Some(op), Some(target)) if op.info().jump.is_conditional() => {
                        vec![target, next]
                    }
                    _ => vec![next],
                }
            }
        };
        if succs.iter().any(|s| s.index() >= count) {
            let loc = func.blocks[index].last.map(|l| func.instr(l).loc.clone());
            let err = CompileError::unimplemented("control reaches the end of the function");
            return Err(match loc {
                Some(loc) => err.at(&loc),
                None => err,
            });
        }
        func.blocks[index].succs = succs;
    }

    for index in 0..count {
        let succs = func.blocks[index].succs.clone();
        for succ in succs {
            func.blocks[succ.index()].preds.push(BlockId(index as u32));
        }
    }
    Ok(())
}

/// Turn the jump/fallthrough edge references of stack phis into blocks.
fn resolve_stack_phis(func: &mut Function<'_>) -> CompileResult<()> {
    for id in func.order() {
        let instr = func.instr(id);
        if !instr.is_phi() {
            continue;
        }
        let (Some(block), Some(result)) = (instr.block, instr.result) else {
            continue;
        };
        let loc = instr.loc.clone();

        let mut preds = Vec::with_capacity(instr.preds.len());
        for pred in &instr.preds {
            let resolved = match *pred {
                PhiPred::Taken(jump) => func.instr(jump).block.ok_or_else(|| {
                    CompileError::backend("jump feeding a phi has no block").at(&loc)
                })?,
                PhiPred::Fallthrough => BlockId(block.0 - 1),
                PhiPred::Block(b) => b,
            };
            preds.push(resolved);
        }

        // Predecessors the stack state did not name are back edges, which
        // carry the stack unchanged.
        let mut missing = func.blocks[block.index()].preds.clone();
        for pred in &preds {
            match missing.iter().position(|m| m == pred) {
                Some(pos) => {
                    missing.remove(pos);
                }
                None => {
                    return Err(CompileError::backend(format!(
                        "phi edge from {pred} does not reach {block}"
                    ))
                    .at(&loc))
                }
            }
        }

        let instr = func.instr_mut(id);
        instr.preds = preds.into_iter().map(PhiPred::Block).collect();
        for back in missing {
            instr.operands.push(result);
            instr.preds.push(PhiPred::Block(back));
        }
    }
    Ok(())
}

/// On-demand SSA construction over the finished CFG.
struct SsaBuilder<'f, 's, 'arena> {
    func: &'f mut Function<'arena>,
    session: &'s CompilationSession<'arena>,
    /// Last definition of a variable inside a block.
    exit_defs: HashMap<(BlockId, ValueId), ValueId>,
    /// Definition live on entry to a block.
    entry_defs: HashMap<(BlockId, ValueId), ValueId>,
    var_phis: Vec<InstrId>,
}

impl<'f, 's, 'arena> SsaBuilder<'f, 's, 'arena> {
    fn new(func: &'f mut Function<'arena>, session: &'s CompilationSession<'arena>) -> Self {
        Self {
            func,
            session,
            exit_defs: HashMap::new(),
            entry_defs: HashMap::new(),
            var_phis: Vec::new(),
        }
    }

    fn run(mut self) -> CompileResult<()> {
        for &param in &self.func.params {
            self.exit_defs.insert((BlockId::ENTRY, param), param);
        }
        let blocks: Vec<BlockId> = (1..self.func.blocks.len())
            .map(|i| BlockId(i as u32))
            .collect();
        for &block in &blocks {
            for id in self.func.block_instrs(block) {
                let instr = self.func.instr(id);
                if instr.opcode() == Some(Opcode::StoreFast) {
                    if let (Some(var), Some(&def)) = (instr.result, instr.operands.first()) {
                        self.exit_defs.insert((block, var), def);
                    }
                }
            }
        }

        for &block in &blocks {
            let mut local: HashMap<ValueId, ValueId> = HashMap::new();
            for id in self.func.block_instrs(block) {
                let instr = self.func.instr(id);
                match instr.opcode() {
                    Some(Opcode::StoreFast) => {
                        if let (Some(var), Some(&def)) = (instr.result, instr.operands.first()) {
                            local.insert(var, def);
                        }
                    }
                    Some(Opcode::LoadFast) => {
                        let Some(&var) = instr.operands.first() else {
                            continue;
                        };
                        let loc = instr.loc.clone();
                        let def = match local.get(&var) {
                            Some(&def) => def,
                            None => self.read_entry(block, var).map_err(|e| e.at(&loc))?,
                        };
                        self.func.instr_mut(id).reaching = Some(def);
                    }
                    _ => {}
                }
            }
        }

        self.remove_trivial_phis();
        Ok(())
    }

    fn read_exit(&mut self, block: BlockId, var: ValueId) -> CompileResult<ValueId> {
        match self.exit_defs.get(&(block, var)) {
            Some(&def) => Ok(def),
            None => self.read_entry(block, var),
        }
    }

    fn read_entry(&mut self, block: BlockId, var: ValueId) -> CompileResult<ValueId> {
        if let Some(&def) = self.entry_defs.get(&(block, var)) {
            return Ok(def);
        }
        if block == BlockId::ENTRY {
            let name = self.func.var_name(var).unwrap_or("<unnamed>");
            return Err(CompileError::undefined(name));
        }

        let preds = self.func.blocks[block.index()].preds.clone();
        let def = if let [single] = preds[..] {
            self.read_exit(single, var)?
        } else {
            let (phi, result) = self.new_phi(block, var)?;
            self.entry_defs.insert((block, var), result);
            for pred in preds {
                let value = self.read_exit(pred, var)?;
                let instr = self.func.instr_mut(phi);
                instr.operands.push(value);
                instr.preds.push(PhiPred::Block(pred));
            }
            result
        };
        self.entry_defs.insert((block, var), def);
        Ok(def)
    }

    fn new_phi(&mut self, block: BlockId, var: ValueId) -> CompileResult<(InstrId, ValueId)> {
        let first = self.func.blocks[block.index()]
            .first
            .ok_or_else(|| CompileError::backend(format!("join block {block} is empty")))?;
        let (offset, loc) = {
            let anchor = self.func.instr(first);
            (anchor.offset, anchor.loc.clone())
        };
        let name = self.func.var_name(var).unwrap_or("$");
        let result = self.func.temp(name);

        let mut phi = Instruction::new(InstrKind::Phi, offset, loc);
        phi.block = Some(block);
        phi.result = Some(result);
        let id = self.func.insert_before(first, phi);
        self.func.blocks[block.index()].first = Some(id);
        self.var_phis.push(id);
        Ok((id, result))
    }

    fn remove_trivial_phis(&mut self) {
        let mut forward: HashMap<ValueId, ValueId> = HashMap::new();
        let mut live = std::mem::take(&mut self.var_phis);
        let mut removed = Vec::new();

        loop {
            let mut changed = false;
            live.retain(|&id| {
                let instr = self.func.instr(id);
                let Some(result) = instr.result else {
                    return true;
                };
                let mut same = None;
                for &operand in &instr.operands {
                    let operand = resolve(&forward, operand);
                    if operand == result || Some(operand) == same {
                        continue;
                    }
                    if same.is_some() {
                        return true;
                    }
                    same = Some(operand);
                }
                match same {
                    Some(value) => {
                        forward.insert(result, value);
                        removed.push(id);
                        changed = true;
                        false
                    }
                    None => true,
                }
            });
            if !changed {
                break;
            }
        }

        for index in 0..self.func.instrs.len() {
            let instr = &mut self.func.instrs[index];
            if let Some(def) = instr.reaching {
                instr.reaching = Some(resolve(&forward, def));
            }
            if instr.is_phi() {
                for operand in instr.operands.iter_mut() {
                    *operand = resolve(&forward, *operand);
                }
            }
        }

        for id in removed {
            if let Some(block) = self.func.instr(id).block {
                let bb = &mut self.func.blocks[block.index()];
                if bb.first == Some(id) {
                    bb.first = self.func.instrs[id.0 as usize].next;
                }
            }
            self.func.unlink(id);
        }
        for _ in &live {
            self.session.record_phi_inserted();
        }
        log::debug!("{}: {} variable phis after simplification", self.func.name, live.len());
    }
}

fn resolve(forward: &HashMap<ValueId, ValueId>, mut value: ValueId) -> ValueId {
    while let Some(&next) = forward.get(&value) {
        value = next;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Scalar;
    use crate::core::test_utils::test::with_built_function;
    use crate::core::Type;
    use crate::ir::infer::{check_resolved, infer_to_fixpoint};

    fn lower(func: &mut Function<'_>, session: &CompilationSession<'_>) -> CompileResult<()> {
        infer_to_fixpoint(func, session)?;
        check_resolved(func)?;
        assemble(func, session)?;
        infer_to_fixpoint(func, session)?;
        Ok(())
    }

    const WHILE1: &str = r#"
def while1(x) in "loops.py":
  2      0 LOAD_CONST          0
         2 STORE_FAST          r
  3      4 SETUP_LOOP         28
    >>   6 LOAD_FAST           x
         8 LOAD_CONST          0
        10 COMPARE_OP          >
        12 POP_JUMP_IF_FALSE  32
  4     14 LOAD_FAST           r
        16 LOAD_FAST           x
        18 INPLACE_ADD
        20 STORE_FAST          r
  5     22 LOAD_FAST           x
        24 LOAD_CONST          1
        26 INPLACE_SUBTRACT
        28 STORE_FAST          x
        30 JUMP_ABSOLUTE       6
    >>  32 POP_BLOCK
  6 >>  34 LOAD_FAST           r
        36 RETURN_VALUE
"#;

    #[test]
    fn test_loop_blocks_and_header_phis() {
        with_built_function(WHILE1, &[Scalar::Int(5)], |func, session| {
            let mut func = func.unwrap();
            lower(&mut func, session).unwrap();

            assert_eq!(func.blocks.len(), 5);
            assert_eq!(func.blocks[0].succs, vec![BlockId(1)]);
            assert_eq!(func.blocks[2].preds, vec![BlockId(1), BlockId(3)]);
            assert_eq!(func.blocks[2].succs, vec![BlockId(4), BlockId(3)]);
            assert_eq!(func.blocks[3].succs, vec![BlockId(2)]);
            assert!(func.blocks[4].succs.is_empty());

            let header = func.block_instrs(BlockId(2));
            let phis: Vec<_> = header
                .iter()
                .filter(|&&id| func.instr(id).is_phi())
                .collect();
            assert_eq!(phis.len(), 2);
            for &&phi in &phis {
                let instr = func.instr(phi);
                assert_eq!(
                    instr.preds,
                    vec![PhiPred::Block(BlockId(1)), PhiPred::Block(BlockId(3))]
                );
                assert_eq!(func.ty(instr.result.unwrap()), Type::Int);
            }
            assert!(func.order().iter().all(|&id| !func.instr(id).discard));
            assert_eq!(session.stats().phis_inserted, 2);
        });
    }

    #[test]
    fn test_straight_line_reads_need_no_phi() {
        let listing = r#"
def f(a):
  1      0 LOAD_FAST           a
         2 STORE_FAST          b
         4 LOAD_FAST           b
         6 RETURN_VALUE
"#;
        with_built_function(listing, &[Scalar::Float(1.5)], |func, session| {
            let mut func = func.unwrap();
            lower(&mut func, session).unwrap();
            assert_eq!(func.blocks.len(), 2);
            assert_eq!(func.phi_count(), 0);
            let order = func.order();
            let load_a = func.instr(order[0]);
            let load_b = func.instr(order[2]);
            assert_eq!(load_a.reaching, Some(func.params[0]));
            assert_eq!(load_b.reaching, load_a.result);
        });
    }

    #[test]
    fn test_read_after_one_armed_if_is_undefined() {
        let listing = r#"
def undefined1(x) in "undef.py":
  2      0 LOAD_FAST           x
         2 LOAD_CONST          0
         4 COMPARE_OP          >
         6 POP_JUMP_IF_FALSE  12
  3      8 LOAD_CONST          1
        10 STORE_FAST          r
  4 >>  12 LOAD_FAST           r
        14 RETURN_VALUE
"#;
        with_built_function(listing, &[Scalar::Int(1)], |func, session| {
            let mut func = func.unwrap();
            let err = lower(&mut func, session).unwrap_err();
            assert!(matches!(err, CompileError::UndefinedVariable { ref name, .. } if name == "r"));
            assert_eq!(err.location().unwrap().to_string(), "undef.py:4");
        });
    }

    #[test]
    fn test_conditional_jump_to_next_gets_edge_block() {
        let listing = r#"
def and_const(a):
  1      0 LOAD_FAST           a
         2 JUMP_IF_FALSE_OR_POP 6
         4 LOAD_CONST          True
    >>   6 RETURN_VALUE
"#;
        with_built_function(listing, &[Scalar::Bool(false)], |func, session| {
            let mut func = func.unwrap();
            lower(&mut func, session).unwrap();
            assert_eq!(func.blocks.len(), 4);
            assert_eq!(func.blocks[2].first, None);
            assert_eq!(func.blocks[1].succs, vec![BlockId(3), BlockId(2)]);
            assert_eq!(func.blocks[3].preds, vec![BlockId(1), BlockId(2)]);

            let phi = func.instr(func.blocks[3].first.unwrap());
            assert!(phi.is_phi());
            assert_eq!(
                phi.preds,
                vec![PhiPred::Block(BlockId(2)), PhiPred::Block(BlockId(1))]
            );
            assert_eq!(func.ty(phi.result.unwrap()), Type::Bool);
        });
    }

    #[test]
    fn test_mixed_branches_unify_at_join() {
        let listing = r#"
def pick(c) in "branch.py":
  2      0 LOAD_FAST           c
         2 POP_JUMP_IF_FALSE  10
  3      4 LOAD_CONST          1
         6 STORE_FAST          r
         8 JUMP_FORWARD        4
  5 >>  10 LOAD_CONST          2.5
        12 STORE_FAST          r
  6 >>  14 LOAD_FAST           r
        16 RETURN_VALUE
"#;
        with_built_function(listing, &[Scalar::Bool(true)], |func, session| {
            let mut func = func.unwrap();
            lower(&mut func, session).unwrap();
            assert_eq!(func.cast_count(), 1);
            assert_eq!(func.phi_count(), 1);
            let join = func.instr(func.blocks[4].first.unwrap());
            assert!(join.is_phi());
            assert_eq!(func.ty(join.result.unwrap()), Type::Float);
            assert_eq!(func.describe(join.operands[0]), "(float)1");
            assert_eq!(func.ty(func.result), Type::Float);
        });
    }
}
