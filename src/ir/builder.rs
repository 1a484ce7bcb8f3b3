//! IR construction by symbolic stack simulation.
//!
//! The builder walks the instruction stream once, in order. Every record pops
//! its operands off a symbolic stack of [`ValueId`]s and pushes its result, so
//! the implicit data flow of the stack machine becomes explicit operand lists.
//! Forward jumps park a copy of the stack under their target offset; when the
//! walk reaches that offset the parked states and the fallthrough state are
//! merged, with a stack phi for every slot whose values differ.
//!
//! Names loaded with `LOAD_GLOBAL` resolve to a function of the listing, a
//! builtin, or a module global, in that order. Stack shuffles (`DUP_TOP`,
//! `ROT_TWO`, ...) only permute the symbolic stack.

use super::{Builtin, Callee, Function, InstrId, InstrKind, Instruction, JumpTarget, PhiPred, ValueId};
use crate::bytecode::{FunctionCode, JumpKind, Listing, Opcode, Operand, OperandKind, RawInstr};
use crate::core::{CompilationSession, CompileError, CompileResult, Elem};
use hashbrown::HashMap;

/// Stack state travelling along one control-flow edge.
struct Edge {
    stack: Vec<ValueId>,
    /// `None` only for the implicit edge into the first instruction.
    pred: Option<PhiPred>,
}

struct IrBuilder<'s, 'arena> {
    func: Function<'arena>,
    listing: &'s Listing,
    session: &'s CompilationSession<'arena>,
    stack: Vec<ValueId>,
    /// Forward edges keyed by target offset.
    pending: HashMap<u32, Vec<Edge>>,
    /// Stack on entry to each reachable offset, checked by backward jumps.
    entry_stacks: HashMap<u32, Vec<ValueId>>,
    /// First instruction (phi or not) emitted for each offset.
    anchors: HashMap<u32, InstrId>,
    falls_through: bool,
    last: Option<InstrId>,
    /// Results of `LOAD_GLOBAL` on variables, for call diagnostics.
    loaded_globals: HashMap<ValueId, &'arena str>,
}

/// Build the untyped IR graph of `code`, resolving global names in `listing`.
pub fn build<'arena>(
    code: &FunctionCode,
    listing: &Listing,
    session: &CompilationSession<'arena>,
) -> CompileResult<Function<'arena>> {
    let sig = &code.signature;
    let func = Function::new(&sig.name, &sig.params, session);
    let mut builder = IrBuilder {
        func,
        listing,
        session,
        stack: Vec::new(),
        pending: HashMap::new(),
        entry_stacks: HashMap::new(),
        anchors: HashMap::new(),
        falls_through: true,
        last: None,
        loaded_globals: HashMap::new(),
    };
    for (index, raw) in code.instrs.iter().enumerate() {
        builder
            .step(code, index, raw)
            .map_err(|e| e.at(&raw.loc))?;
    }
    builder.finish(code)
}

impl<'s, 'arena> IrBuilder<'s, 'arena> {
    fn step(&mut self, code: &FunctionCode, index: usize, raw: &RawInstr) -> CompileResult<()> {
        let mut edges = self.pending.remove(&raw.offset).unwrap_or_default();
        if self.falls_through {
            let stack = std::mem::take(&mut self.stack);
            let pred = self.last.map(|_| PhiPred::Fallthrough);
            edges.insert(0, Edge { stack, pred });
        }

        if edges.is_empty() {
            let mut instr = Instruction::new(InstrKind::Op(raw.op), raw.offset, raw.loc.clone());
            instr.reachable = false;
            let id = self.func.append(instr);
            self.anchors.insert(raw.offset, id);
            log::trace!("offset {} ({}) is unreachable", raw.offset, raw.op);
            return Ok(());
        }

        let first_phi = self.merge(edges, raw)?;
        self.entry_stacks.insert(raw.offset, self.stack.clone());
        let id = self.emit(code, index, raw)?;
        self.anchors.insert(raw.offset, first_phi.unwrap_or(id));
        Ok(())
    }

    /// Merge the incoming stack states into `self.stack`, returning the first
    /// phi inserted, if any.
    fn merge(&mut self, mut edges: Vec<Edge>, raw: &RawInstr) -> CompileResult<Option<InstrId>> {
        let depth = edges[0].stack.len();
        if let Some(other) = edges.iter().find(|e| e.stack.len() != depth) {
            return Err(CompileError::unimplemented(format!(
                "stack depth differs at join ({} vs {})",
                depth,
                other.stack.len()
            )));
        }
        if edges.len() == 1 {
            if let Some(edge) = edges.pop() {
                self.stack = edge.stack;
            }
            return Ok(None);
        }

        let mut first = None;
        let mut stack = Vec::with_capacity(depth);
        for slot in 0..depth {
            let values: Vec<ValueId> = edges.iter().map(|e| e.stack[slot]).collect();
            if values.iter().all(|&v| v == values[0]) {
                stack.push(values[0]);
                continue;
            }
            let preds = edges
                .iter()
                .map(|e| {
                    e.pred
                        .ok_or_else(|| CompileError::unimplemented("join at function entry"))
                })
                .collect::<CompileResult<Vec<_>>>()?;

            let result = self.func.temp(self.session.intern_str("$"));
            let mut phi = Instruction::new(InstrKind::Phi, raw.offset, raw.loc.clone());
            phi.operands = values;
            phi.preds = preds;
            phi.result = Some(result);
            let id = self.func.append(phi);
            self.session.record_phi_inserted();
            log::debug!("stack phi for slot {} at offset {}", slot, raw.offset);
            first.get_or_insert(id);
            stack.push(result);
        }
        self.stack = stack;
        Ok(first)
    }

    fn check_depth(&self, name: &str, pops: usize) -> CompileResult<()> {
        if self.stack.len() < pops {
            return Err(CompileError::unsupported(
                name,
                format!(
                    "stack underflow: needs {} operands, {} available",
                    pops,
                    self.stack.len()
                ),
            ));
        }
        Ok(())
    }

    /// Callee, builtin or variable a global name stands for.
    fn resolve_global(&mut self, name: &str) -> ValueId {
        let name = self.session.intern_str(name);
        if self.listing.function(name).is_some() {
            self.func.callee(name, Callee::Function(name))
        } else if let Some(builtin) = Builtin::from_name(name) {
            self.func.callee(name, Callee::Builtin(builtin))
        } else {
            self.func.global(name)
        }
    }

    /// `DUP_TOP`, `DUP_TOP_TWO`, `ROT_TWO` and `ROT_THREE`.
    fn shuffle(&mut self, raw: &RawInstr) -> CompileResult<InstrId> {
        let info = raw.op.info();
        self.check_depth(info.name, info.pops as usize)?;
        let top = self.stack.split_off(self.stack.len() - info.pops as usize);
        let permuted = match (raw.op, &top[..]) {
            (Opcode::DupTop, &[a]) => vec![a, a],
            (Opcode::DupTopTwo, &[a, b]) => vec![a, b, a, b],
            (Opcode::RotTwo, &[a, b]) => vec![b, a],
            (Opcode::RotThree, &[a, b, c]) => vec![c, a, b],
            _ => return Err(CompileError::unsupported(info.name, "not a stack shuffle")),
        };
        self.stack.extend(permuted);

        let id = self
            .func
            .append(Instruction::new(InstrKind::Op(raw.op), raw.offset, raw.loc.clone()));
        self.last = Some(id);
        self.falls_through = true;
        Ok(id)
    }

    /// Split the callee off the operands of a call.
    fn bind_callee(&mut self, instr: &mut Instruction) -> CompileResult<()> {
        let callee = instr.operands.remove(0);
        let Some(target) = self.func.as_callee(callee) else {
            return Err(match self.loaded_globals.get(&callee) {
                Some(name) => CompileError::unimplemented(format!(
                    "call of {name}, which is not a function of the listing"
                )),
                None => CompileError::unimplemented("call of a computed value"),
            });
        };
        instr.callee = Some(callee);

        // `zeros(n, int)`: the dtype argument selects the element type.
        if target == Callee::Builtin(Builtin::Zeros(None)) && instr.operands.len() == 2 {
            let elem = match self.func.as_callee(instr.operands[1]) {
                Some(Callee::Builtin(Builtin::Int)) => Elem::Int,
                Some(Callee::Builtin(Builtin::Float)) => Elem::Float,
                _ => {
                    return Err(CompileError::unimplemented(
                        "zeros() with a dtype other than int or float",
                    ))
                }
            };
            instr.operands.truncate(1);
            let name = self.session.intern_str(&format!("zeros[{}]", elem.ty()));
            let typed = Callee::Builtin(Builtin::Zeros(Some(elem)));
            instr.callee = Some(self.func.callee(name, typed));
        }
        Ok(())
    }

    fn emit(&mut self, code: &FunctionCode, index: usize, raw: &RawInstr) -> CompileResult<InstrId> {
        let info = raw.op.info();
        if matches!(
            raw.op,
            Opcode::DupTop | Opcode::DupTopTwo | Opcode::RotTwo | Opcode::RotThree
        ) {
            return self.shuffle(raw);
        }
        let effect = raw.op.handler().stack_effect(raw.op, &raw.operand)?;
        self.check_depth(info.name, effect.pops)?;

        let mut instr = Instruction::new(InstrKind::Op(raw.op), raw.offset, raw.loc.clone());
        instr.operands = self.stack.split_off(self.stack.len() - effect.pops);
        if raw.op == Opcode::CallFunction {
            self.bind_callee(&mut instr)?;
        }
        if let Some(&value) = instr
            .operands
            .iter()
            .find(|&&v| self.func.as_callee(v).is_some())
        {
            return Err(CompileError::unimplemented(format!(
                "function {} used as a value",
                self.func.describe(value)
            )));
        }

        match (&raw.operand, raw.op) {
            (Operand::Const(value), _) => {
                let constant = self.func.constant(*value);
                instr.operands.push(constant);
                instr.result = Some(constant);
            }
            (Operand::Name(name), Opcode::LoadFast) => {
                let var = self.func.local(self.session.intern_str(name));
                instr.operands.push(var);
            }
            (Operand::Name(name), Opcode::LoadGlobal) => {
                let value = self.resolve_global(name);
                if self.func.is_global(value) {
                    instr.operands.push(value);
                } else {
                    instr.result = Some(value);
                    instr.discard = true;
                }
            }
            (Operand::Name(name), Opcode::StoreGlobal) => {
                let var = self.resolve_global(name);
                if !self.func.is_global(var) {
                    return Err(CompileError::unimplemented(format!(
                        "assignment to function {name}"
                    )));
                }
                instr.result = Some(var);
            }
            (Operand::Name(name), _) => {
                instr.result = Some(self.func.local(self.session.intern_str(name)));
            }
            (Operand::Compare(cmp), _) => instr.cmp = Some(*cmp),
            (Operand::Jump(label), _) if info.jump.has_target() => {
                let relative = info.operand == OperandKind::JumpRelative;
                let offset = if relative {
                    code.next_offset(index).checked_add(*label).ok_or_else(|| {
                        CompileError::unsupported(
                            info.name,
                            format!("jump label {label} is past the end of the offset range"),
                        )
                    })?
                } else {
                    *label
                };
                instr.target = Some(JumpTarget {
                    label: *label,
                    relative,
                    offset,
                    instr: None,
                });
            }
            _ => {}
        }

        if effect.pushes == 1 {
            let result = match instr.result {
                Some(result) => result,
                None => {
                    let temp = self.func.temp(self.session.intern_str("$"));
                    instr.result = Some(temp);
                    temp
                }
            };
            if raw.op == Opcode::LoadGlobal {
                if let Some(&var) = instr.operands.first() {
                    if let Some(name) = self.func.var_name(var) {
                        self.loaded_globals.insert(result, name);
                    }
                }
            }
            // The iterator stays below the value it produced.
            if info.jump == JumpKind::ForIter {
                self.stack.extend(instr.operands.first().copied());
            }
            self.stack.push(result);
        }

        let target = instr.target.map(|t| t.offset);
        let condition = instr.operands.first().copied();
        let id = self.func.append(instr);
        self.last = Some(id);
        log::trace!("{:>4} {:<22} depth {}", raw.offset, raw.op.name(), self.stack.len());

        match (info.jump, target) {
            (JumpKind::None, _) | (_, None) => self.falls_through = !info.terminator,
            (JumpKind::Always, Some(target)) => {
                self.record_jump(id, raw.offset, target, self.stack.clone())?;
                self.falls_through = false;
            }
            (JumpKind::Conditional { .. }, Some(target)) => {
                self.record_jump(id, raw.offset, target, self.stack.clone())?;
                self.falls_through = true;
            }
            (JumpKind::ShortCircuit { .. }, Some(target)) => {
                let mut taken = self.stack.clone();
                taken.extend(condition);
                self.record_jump(id, raw.offset, target, taken)?;
                self.falls_through = true;
            }
            (JumpKind::ForIter, Some(target)) => {
                let taken = self.stack[..self.stack.len().saturating_sub(2)].to_vec();
                self.record_jump(id, raw.offset, target, taken)?;
                self.falls_through = true;
            }
        }
        Ok(id)
    }

    fn record_jump(
        &mut self,
        from: InstrId,
        offset: u32,
        target: u32,
        stack: Vec<ValueId>,
    ) -> CompileResult<()> {
        if target > offset {
            self.pending.entry(target).or_default().push(Edge {
                stack,
                pred: Some(PhiPred::Taken(from)),
            });
            return Ok(());
        }
        match self.entry_stacks.get(&target) {
            Some(entry) if *entry == stack => Ok(()),
            Some(_) => Err(CompileError::unimplemented(format!(
                "backward jump to offset {target} with a different stack"
            ))),
            None => Err(CompileError::unimplemented(format!(
                "backward jump to offset {target}, which is not a reachable instruction"
            ))),
        }
    }

    fn finish(mut self, code: &FunctionCode) -> CompileResult<Function<'arena>> {
        let end_loc = code.instrs.last().map(|i| i.loc.clone());
        if self.falls_through {
            let err = CompileError::unimplemented("control reaches the end of the function");
            return Err(match &end_loc {
                Some(loc) => err.at(loc),
                None => err,
            });
        }
        if let Some((&offset, edges)) = self.pending.iter().next() {
            let err = CompileError::unimplemented(format!(
                "jump to offset {offset}, which is not an instruction of the function"
            ));
            return Err(match edges.first().and_then(|e| e.pred) {
                Some(PhiPred::Taken(from)) => err.at(&self.func.instr(from).loc),
                _ => err,
            });
        }

        for id in self.func.order() {
            let Some(mut target) = self.func.instr(id).target else {
                continue;
            };
            let anchor = self.anchors.get(&target.offset).copied().ok_or_else(|| {
                CompileError::unimplemented(format!("unresolved jump target {}", target.offset))
                    .at(&self.func.instr(id).loc)
            })?;
            target.instr = Some(anchor);
            self.func.instr_mut(id).target = Some(target);
        }

        log::debug!(
            "built IR for {}: {} instructions, {} values",
            self.func.name,
            self.func.instrs.len(),
            self.func.values.len()
        );
        Ok(self.func)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Scalar;
    use crate::core::test_utils::test::with_built_function;
    use crate::core::Type;
    use crate::ir::ValueKind;

    const ADD: &str = r#"
def add(a, b) in "basicmath.py":
  3      0 LOAD_FAST          a
         2 LOAD_FAST          b
         4 BINARY_ADD
         6 RETURN_VALUE
"#;

    #[test]
    fn test_stack_becomes_operands() {
        with_built_function(ADD, &[Scalar::Int(3), Scalar::Int(4)], |func, _| {
            let func = func.unwrap();
            let order = func.order();
            assert_eq!(order.len(), 4);

            let add = func.instr(order[2]);
            let lhs = func.instr(order[0]).result.unwrap();
            let rhs = func.instr(order[1]).result.unwrap();
            assert_eq!(add.operands, vec![lhs, rhs]);

            let ret = func.instr(order[3]);
            assert_eq!(ret.operands, vec![add.result.unwrap()]);
            assert_eq!(ret.result, None);
            assert_eq!(func.ty(func.params[0]), Type::Int);
        });
    }

    #[test]
    fn test_load_const_pushes_interned_constant() {
        let listing = r#"
def twice():
  1      0 LOAD_CONST         2
         2 LOAD_CONST         2
         4 BINARY_MULTIPLY
         6 RETURN_VALUE
"#;
        with_built_function(listing, &[], |func, _| {
            let func = func.unwrap();
            let order = func.order();
            let mul = func.instr(order[2]);
            assert_eq!(mul.operands[0], mul.operands[1]);
            assert!(matches!(
                func.value(mul.operands[0]).kind,
                ValueKind::Constant(Scalar::Int(2))
            ));
            assert!(func.instr(order[0]).discard);
        });
    }

    #[test]
    fn test_short_circuit_join_inserts_stack_phi() {
        let listing = r#"
def and_(a, b) in "logic.py":
  2      0 LOAD_FAST          a
         2 JUMP_IF_FALSE_OR_POP 8
         4 LOAD_FAST          b
         6 NOP
    >>   8 RETURN_VALUE
"#;
        with_built_function(listing, &[Scalar::Bool(true), Scalar::Bool(false)], |func, session| {
            let func = func.unwrap();
            let order = func.order();
            let phi_id = order[4];
            let phi = func.instr(phi_id);
            assert!(phi.is_phi());
            assert_eq!(phi.preds, vec![PhiPred::Fallthrough, PhiPred::Taken(order[1])]);
            let a = func.instr(order[0]).result.unwrap();
            let b = func.instr(order[2]).result.unwrap();
            assert_eq!(phi.operands, vec![b, a]);

            let jump = func.instr(order[1]);
            assert_eq!(jump.target.unwrap().instr, Some(phi_id));
            assert_eq!(func.instr(order[5]).operands, vec![phi.result.unwrap()]);
            assert_eq!(session.stats().phis_inserted, 1);
        });
    }

    #[test]
    fn test_relative_jump_and_unreachable_code() {
        let listing = r#"
def f(x):
  1      0 LOAD_FAST          x
         2 RETURN_VALUE
  2      4 JUMP_FORWARD       2
         6 LOAD_FAST          x
         8 RETURN_VALUE
"#;
        with_built_function(listing, &[Scalar::Int(1)], |func, _| {
            let func = func.unwrap();
            let order = func.order();
            for &id in &order[2..] {
                let instr = func.instr(id);
                assert!(!instr.reachable);
                assert!(instr.operands.is_empty());
            }
        });

        let jump = r#"
def g(x):
  1      0 JUMP_FORWARD       2
         2 NOP
         4 LOAD_FAST          x
         6 RETURN_VALUE
"#;
        with_built_function(jump, &[Scalar::Int(1)], |func, _| {
            let func = func.unwrap();
            let order = func.order();
            let target = func.instr(order[0]).target.unwrap();
            assert!(target.relative);
            assert_eq!(target.offset, 4);
            assert_eq!(target.instr, Some(order[2]));
            assert!(!func.instr(order[1]).reachable);
        });
    }

    #[test]
    fn test_stack_underflow_is_unsupported() {
        let listing = r#"
def bad() in "bad.py":
  4      0 BINARY_ADD
         2 RETURN_VALUE
"#;
        with_built_function(listing, &[], |func, _| {
            let err = func.unwrap_err();
            assert!(matches!(err, CompileError::UnsupportedOperation { .. }));
            assert_eq!(err.location().unwrap().to_string(), "bad.py:4");
        });
    }

    #[test]
    fn test_missing_terminator_and_depth_mismatch() {
        let open_end = "def f(x):\n  1 0 LOAD_FAST x\n    2 POP_TOP\n";
        with_built_function(open_end, &[Scalar::Int(1)], |func, _| {
            assert!(matches!(func.unwrap_err(), CompileError::Unimplemented { .. }));
        });

        let uneven = r#"
def f(x):
  1      0 LOAD_FAST          x
         2 POP_JUMP_IF_FALSE  8
         4 LOAD_FAST          x
         6 NOP
    >>   8 LOAD_CONST         None
        10 RETURN_VALUE
"#;
        with_built_function(uneven, &[Scalar::Int(1)], |func, _| {
            let err = func.unwrap_err();
            assert!(err.to_string().contains("stack depth"));
        });
    }

    #[test]
    fn test_shuffles_permute_the_stack() {
        let listing = r#"
def bump(a, i):
  1      0 LOAD_FAST          a
         2 LOAD_FAST          i
         4 DUP_TOP_TWO
         6 BINARY_SUBSCR
         8 LOAD_CONST         1
        10 INPLACE_ADD
        12 ROT_THREE
        14 STORE_SUBSCR
        16 LOAD_CONST         None
        18 RETURN_VALUE
"#;
        with_built_function(listing, &[Scalar::Int(0), Scalar::Int(0)], |func, _| {
            let func = func.unwrap();
            let order = func.order();
            let a = func.instr(order[0]).result.unwrap();
            let i = func.instr(order[1]).result.unwrap();
            assert!(func.instr(order[2]).discard);
            assert_eq!(func.instr(order[3]).operands, vec![a, i]);
            let sum = func.instr(order[5]).result.unwrap();
            assert!(func.instr(order[6]).discard);
            assert_eq!(func.instr(order[7]).operands, vec![sum, a, i]);
        });
    }

    #[test]
    fn test_global_names_resolve_in_order() {
        let listing = r#"
global scale = 2

def twice(x):
  1      0 LOAD_GLOBAL        scale
         2 LOAD_GLOBAL        double
         4 LOAD_FAST          x
         6 CALL_FUNCTION      1
         8 BINARY_MULTIPLY
        10 LOAD_GLOBAL        float
        12 ROT_TWO
        14 CALL_FUNCTION      1
        16 RETURN_VALUE

def double(x):
  4      0 LOAD_FAST          x
         2 LOAD_FAST          x
         4 BINARY_ADD
         6 RETURN_VALUE
"#;
        with_built_function(listing, &[Scalar::Int(1)], |func, _| {
            let func = func.unwrap();
            let order = func.order();
            let load = func.instr(order[0]);
            assert!(func.is_global(load.operands[0]));
            assert!(!load.discard);

            let call = func.instr(order[3]);
            assert_eq!(call.operands.len(), 1);
            let callee = call.callee.unwrap();
            assert_eq!(func.as_callee(callee), Some(Callee::Function("double")));
            assert!(func.instr(order[1]).discard);

            let convert = func.instr(order[7]);
            assert_eq!(
                func.as_callee(convert.callee.unwrap()),
                Some(Callee::Builtin(Builtin::Float))
            );
            assert_eq!(convert.operands, vec![func.instr(order[4]).result.unwrap()]);
        });
    }

    #[test]
    fn test_calls_need_a_known_callee() {
        let listing = r#"
def greet(x) in "calls.py":
  7      0 LOAD_GLOBAL        print
         2 LOAD_FAST          x
         4 CALL_FUNCTION      1
         6 RETURN_VALUE
"#;
        with_built_function(listing, &[Scalar::Int(1)], |func, _| {
            let err = func.unwrap_err();
            assert!(matches!(err, CompileError::Unimplemented { .. }));
            assert!(err.to_string().contains("call of print"));
            assert_eq!(err.location().unwrap().to_string(), "calls.py:7");
        });

        let escaping = r#"
def f(x):
  1      0 LOAD_GLOBAL        len
         2 RETURN_VALUE
"#;
        with_built_function(escaping, &[Scalar::Int(1)], |func, _| {
            let err = func.unwrap_err();
            assert!(err.to_string().contains("function len used as a value"));
        });
    }

    #[test]
    fn test_zeros_dtype_becomes_part_of_the_callee() {
        let listing = r#"
def make():
  1      0 LOAD_GLOBAL        zeros
         2 LOAD_CONST         5
         4 LOAD_GLOBAL        int
         6 CALL_FUNCTION      2
         8 RETURN_VALUE
"#;
        with_built_function(listing, &[], |func, _| {
            let func = func.unwrap();
            let call = func.instr(func.order()[3]);
            assert_eq!(call.operands.len(), 1);
            assert_eq!(
                func.as_callee(call.callee.unwrap()),
                Some(Callee::Builtin(Builtin::Zeros(Some(Elem::Int))))
            );
        });
    }

    #[test]
    fn test_for_iter_keeps_the_iterator_below_the_value() {
        let listing = r#"
def total(n):
  1      0 LOAD_CONST         0
         2 STORE_FAST         s
         4 SETUP_LOOP         24 (to 30)
         6 LOAD_GLOBAL        range
         8 LOAD_FAST          n
        10 CALL_FUNCTION      1
        12 GET_ITER
    >>  14 FOR_ITER           12 (to 28)
        16 STORE_FAST         i
        18 LOAD_FAST          s
        20 LOAD_FAST          i
        22 INPLACE_ADD
        24 STORE_FAST         s
        26 JUMP_ABSOLUTE      14
    >>  28 POP_BLOCK
    >>  30 LOAD_FAST          s
        32 RETURN_VALUE
"#;
        with_built_function(listing, &[Scalar::Int(3)], |func, _| {
            let func = func.unwrap();
            let next = func
                .order()
                .into_iter()
                .find(|&id| func.instr(id).opcode() == Some(Opcode::ForIter))
                .unwrap();
            let for_iter = func.instr(next);
            assert_eq!(for_iter.target.unwrap().offset, 28);
            assert!(for_iter.is_conditional_jump());
            let store = func.instr(for_iter.next.unwrap());
            assert_eq!(store.operands, vec![for_iter.result.unwrap()]);
        });
    }

    #[test]
    fn test_relative_jump_past_the_offset_range() {
        let listing = r#"
def f(x) in "far.py":
  2      0 JUMP_FORWARD       4294967295
         2 LOAD_FAST          x
         4 RETURN_VALUE
"#;
        with_built_function(listing, &[Scalar::Int(1)], |func, _| {
            let err = func.unwrap_err();
            assert!(matches!(err, CompileError::UnsupportedOperation { .. }));
            assert!(err.to_string().contains("JUMP_FORWARD"));
            assert_eq!(err.location().unwrap().to_string(), "far.py:2");
        });
    }

    #[test]
    fn test_argument_count_checked() {
        with_built_function(ADD, &[Scalar::Int(1)], |func, _| {
            assert!(matches!(
                func.unwrap_err(),
                CompileError::ArgumentCount { expected: 2, found: 1, .. }
            ));
        });
    }
}
