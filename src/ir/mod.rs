// This module defines the typed intermediate representation that sits between the untyped
// stack bytecode and LLVM. A Function owns two arenas: values (named locals and globals,
// stack temporaries, the function result, callee references, interned constants and
// interned casts) and
// instructions (one per bytecode record plus the phi nodes inserted at joins). Instructions
// form a doubly linked sequence through prev/next ids so the inferencer can splice casts
// into operand lists and the control-flow assembler can unlink discarded records and
// insert phis without shifting indices. Blocks are ranges over that sequence with explicit
// predecessor and successor lists. Every id is a plain index newtype; nothing in here
// references LLVM, so the same graph can be printed, tested and inspected without a
// backend context.

//! Typed IR: values, instructions, blocks and the per-function graph.

pub mod builder;
pub mod cfg;
pub mod infer;
pub mod program;

pub use program::{ModuleTypes, Program, Signature};

use crate::bytecode::{CmpOp, Opcode, Scalar, SourceLoc};
use crate::core::{CompilationSession, CompileError, CompileResult, Elem, Type};
use crate::ops::OpHandler;
use hashbrown::HashMap;
use std::fmt::{self, Write as _};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    /// Synthetic entry block holding the argument definitions.
    pub const ENTRY: BlockId = BlockId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// What a [`VariableData`] binding stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarRole {
    /// Parameter at the given position.
    Param(usize),
    Local,
    /// Stack temporary or phi result.
    Temp,
    /// The function's return value.
    Result,
    /// Module-level variable, kept in memory rather than in SSA form.
    Global,
}

/// Routines the compiled code can call without a listing function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Range,
    Float,
    Int,
    Len,
    /// `zeros(n, dtype=...)`; the element type is bound once the call's
    /// dtype argument is seen.
    Zeros(Option<Elem>),
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "range" => Builtin::Range,
            "float" => Builtin::Float,
            "int" => Builtin::Int,
            "len" => Builtin::Len,
            "zeros" => Builtin::Zeros(None),
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Range => "range",
            Builtin::Float => "float",
            Builtin::Int => "int",
            Builtin::Len => "len",
            Builtin::Zeros(_) => "zeros",
        }
    }
}

/// Target of a `CALL_FUNCTION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callee<'arena> {
    /// Another function of the same listing.
    Function(&'arena str),
    Builtin(Builtin),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueKind<'arena> {
    Variable { name: &'arena str, role: VarRole },
    Constant(Scalar),
    /// Conversion of `source` to the value's type.
    Cast { source: ValueId },
    /// A function pushed by `LOAD_GLOBAL`; only ever consumed by a call.
    Callee(Callee<'arena>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueData<'arena> {
    pub kind: ValueKind<'arena>,
    pub ty: Type,
}

/// Control-flow shape of an instruction once jump labels are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpTarget {
    /// Label as written: an offset, or a delta from the next instruction.
    pub label: u32,
    pub relative: bool,
    /// Offset the label designates.
    pub offset: u32,
    /// Anchor instruction, filled in once every instruction exists.
    pub instr: Option<InstrId>,
}

/// Predecessor reference of a phi operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhiPred {
    /// Edge taken by the jump instruction.
    Taken(InstrId),
    /// Fallthrough edge from the preceding instruction.
    Fallthrough,
    Block(BlockId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrKind {
    Op(Opcode),
    Phi,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub kind: InstrKind,
    pub operands: Vec<ValueId>,
    /// Parallel to `operands` for phis, empty otherwise.
    pub preds: Vec<PhiPred>,
    pub result: Option<ValueId>,
    pub cmp: Option<CmpOp>,
    pub target: Option<JumpTarget>,
    /// Callee value of a call.
    pub callee: Option<ValueId>,
    /// Definition a variable load observes, set by SSA construction.
    pub reaching: Option<ValueId>,
    pub offset: u32,
    pub loc: SourceLoc,
    pub block: Option<BlockId>,
    pub prev: Option<InstrId>,
    pub next: Option<InstrId>,
    pub reachable: bool,
    pub discard: bool,
}

impl Instruction {
    pub fn new(kind: InstrKind, offset: u32, loc: SourceLoc) -> Self {
        let discard = match kind {
            InstrKind::Op(op) => op.info().discard,
            InstrKind::Phi => false,
        };
        Self {
            kind,
            operands: Vec::new(),
            preds: Vec::new(),
            result: None,
            cmp: None,
            target: None,
            callee: None,
            reaching: None,
            offset,
            loc,
            block: None,
            prev: None,
            next: None,
            reachable: true,
            discard,
        }
    }

    pub fn opcode(&self) -> Option<Opcode> {
        match self.kind {
            InstrKind::Op(op) => Some(op),
            InstrKind::Phi => None,
        }
    }

    pub fn is_phi(&self) -> bool {
        self.kind == InstrKind::Phi
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            InstrKind::Op(op) => op.name(),
            InstrKind::Phi => "PHI",
        }
    }

    pub fn handler(&self) -> &'static dyn OpHandler {
        match self.kind {
            InstrKind::Op(op) => op.handler(),
            InstrKind::Phi => crate::ops::phi_handler(),
        }
    }

    pub fn is_terminator(&self) -> bool {
        self.opcode().is_some_and(|op| op.info().terminator)
    }

    pub fn is_conditional_jump(&self) -> bool {
        self.opcode().is_some_and(|op| op.info().jump.is_conditional())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicBlock {
    pub first: Option<InstrId>,
    pub last: Option<InstrId>,
    pub preds: Vec<BlockId>,
    /// Jump target first, fallthrough second for conditional exits.
    pub succs: Vec<BlockId>,
}

/// IR graph of one function, exclusively owned by its compilation.
pub struct Function<'arena> {
    pub name: &'arena str,
    pub values: Vec<ValueData<'arena>>,
    pub instrs: Vec<Instruction>,
    pub head: Option<InstrId>,
    pub tail: Option<InstrId>,
    pub blocks: Vec<BasicBlock>,
    pub params: Vec<ValueId>,
    /// Variable holding the return type.
    pub result: ValueId,
    locals: HashMap<&'arena str, ValueId>,
    /// Global variables and callees, by name.
    globals: HashMap<&'arena str, ValueId>,
    constants: HashMap<(u8, u64), ValueId>,
    casts: HashMap<(ValueId, Type), ValueId>,
}

impl<'arena> Function<'arena> {
    pub fn new(
        name: &str,
        params: &[String],
        session: &CompilationSession<'arena>,
    ) -> Function<'arena> {
        let mut func = Function {
            name: session.intern_str(name),
            values: Vec::new(),
            instrs: Vec::new(),
            head: None,
            tail: None,
            blocks: Vec::new(),
            params: Vec::new(),
            result: ValueId(0),
            locals: HashMap::new(),
            globals: HashMap::new(),
            constants: HashMap::new(),
            casts: HashMap::new(),
        };
        func.result = func.add_value(ValueKind::Variable {
            name: session.intern_str("<result>"),
            role: VarRole::Result,
        });
        for (index, param) in params.iter().enumerate() {
            let name = session.intern_str(param);
            let id = func.add_value(ValueKind::Variable {
                name,
                role: VarRole::Param(index),
            });
            func.locals.insert(name, id);
            func.params.push(id);
        }
        func
    }

    /// Type the parameters from the call-site arguments.
    pub fn bind_args(&mut self, args: &[Scalar]) -> CompileResult<()> {
        if args.len() != self.params.len() {
            return Err(CompileError::ArgumentCount {
                function: self.name.to_string(),
                expected: self.params.len(),
                found: args.len(),
            });
        }
        for (&param, arg) in self.params.clone().iter().zip(args) {
            if arg.ty() == Type::Void {
                let name = self.var_name(param).unwrap_or("?");
                return Err(CompileError::unimplemented(format!(
                    "None passed as argument '{name}'"
                )));
            }
            self.set_ty(param, arg.ty());
        }
        Ok(())
    }

    fn add_value(&mut self, kind: ValueKind<'arena>) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        let ty = match kind {
            ValueKind::Constant(c) => c.ty(),
            _ => Type::Unknown,
        };
        self.values.push(ValueData { kind, ty });
        id
    }

    pub fn value(&self, id: ValueId) -> &ValueData<'arena> {
        &self.values[id.0 as usize]
    }

    pub fn ty(&self, id: ValueId) -> Type {
        self.value(id).ty
    }

    pub(crate) fn set_ty(&mut self, id: ValueId, ty: Type) {
        self.values[id.0 as usize].ty = ty;
    }

    /// Type of the value before any cast was applied to it.
    pub fn origin_ty(&self, id: ValueId) -> Type {
        match self.value(id).kind {
            ValueKind::Cast { source } => self.origin_ty(source),
            _ => self.ty(id),
        }
    }

    /// Named local, created on first mention.
    pub fn local(&mut self, name: &'arena str) -> ValueId {
        if let Some(&id) = self.locals.get(name) {
            return id;
        }
        let id = self.add_value(ValueKind::Variable {
            name,
            role: VarRole::Local,
        });
        self.locals.insert(name, id);
        id
    }

    /// Module-level variable, created on first mention.
    pub fn global(&mut self, name: &'arena str) -> ValueId {
        if let Some(&id) = self.globals.get(name) {
            return id;
        }
        let id = self.add_value(ValueKind::Variable {
            name,
            role: VarRole::Global,
        });
        self.globals.insert(name, id);
        id
    }

    /// Reference to a callable, interned by name.
    pub fn callee(&mut self, name: &'arena str, callee: Callee<'arena>) -> ValueId {
        if let Some(&id) = self.globals.get(name) {
            return id;
        }
        let id = self.add_value(ValueKind::Callee(callee));
        self.globals.insert(name, id);
        id
    }

    /// Global variables this function reads or writes.
    pub fn global_vars(&self) -> Vec<(&'arena str, ValueId)> {
        let mut vars: Vec<_> = self
            .globals
            .iter()
            .filter(|(_, &id)| self.is_global(id))
            .map(|(&name, &id)| (name, id))
            .collect();
        vars.sort_by_key(|&(_, id)| id);
        vars
    }

    pub fn temp(&mut self, name: &'arena str) -> ValueId {
        self.add_value(ValueKind::Variable {
            name,
            role: VarRole::Temp,
        })
    }

    /// Interned constant-pool entry for a literal.
    pub fn constant(&mut self, value: Scalar) -> ValueId {
        if let Some(&id) = self.constants.get(&value.literal_key()) {
            return id;
        }
        let id = self.add_value(ValueKind::Constant(value));
        self.constants.insert(value.literal_key(), id);
        id
    }

    /// Interned cast of `source` to `ty`.
    pub fn cast(&mut self, source: ValueId, ty: Type) -> ValueId {
        if let Some(&id) = self.casts.get(&(source, ty)) {
            return id;
        }
        let id = self.add_value(ValueKind::Cast { source });
        self.set_ty(id, ty);
        self.casts.insert((source, ty), id);
        id
    }

    pub fn cast_count(&self) -> usize {
        self.casts.len()
    }

    /// Source-level name of a variable, if the value is one.
    pub fn var_name(&self, id: ValueId) -> Option<&'arena str> {
        match self.value(id).kind {
            ValueKind::Variable { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn is_local(&self, id: ValueId) -> bool {
        matches!(
            self.value(id).kind,
            ValueKind::Variable {
                role: VarRole::Local | VarRole::Param(_),
                ..
            }
        )
    }

    pub fn is_global(&self, id: ValueId) -> bool {
        matches!(
            self.value(id).kind,
            ValueKind::Variable {
                role: VarRole::Global,
                ..
            }
        )
    }

    pub fn as_callee(&self, id: ValueId) -> Option<Callee<'arena>> {
        match self.value(id).kind {
            ValueKind::Callee(callee) => Some(callee),
            _ => None,
        }
    }

    pub fn instr(&self, id: InstrId) -> &Instruction {
        &self.instrs[id.0 as usize]
    }

    pub fn instr_mut(&mut self, id: InstrId) -> &mut Instruction {
        &mut self.instrs[id.0 as usize]
    }

    /// Append at the end of the sequence.
    pub fn append(&mut self, mut instr: Instruction) -> InstrId {
        let id = InstrId(self.instrs.len() as u32);
        instr.prev = self.tail;
        instr.next = None;
        self.instrs.push(instr);
        match self.tail {
            Some(tail) => self.instr_mut(tail).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        id
    }

    /// Link `instr` in front of `before`.
    pub fn insert_before(&mut self, before: InstrId, mut instr: Instruction) -> InstrId {
        let id = InstrId(self.instrs.len() as u32);
        let prev = self.instr(before).prev;
        instr.prev = prev;
        instr.next = Some(before);
        self.instrs.push(instr);
        self.instr_mut(before).prev = Some(id);
        match prev {
            Some(p) => self.instr_mut(p).next = Some(id),
            None => self.head = Some(id),
        }
        id
    }

    /// Remove from the linked sequence; the arena slot stays valid.
    pub fn unlink(&mut self, id: InstrId) {
        let (prev, next) = {
            let instr = self.instr(id);
            (instr.prev, instr.next)
        };
        match prev {
            Some(p) => self.instr_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.instr_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let instr = self.instr_mut(id);
        instr.prev = None;
        instr.next = None;
    }

    /// Ids in sequence order.
    pub fn order(&self) -> Vec<InstrId> {
        let mut ids = Vec::with_capacity(self.instrs.len());
        let mut cursor = self.head;
        while let Some(id) = cursor {
            ids.push(id);
            cursor = self.instr(id).next;
        }
        ids
    }

    /// Ids of the instructions of `block`, in order.
    pub fn block_instrs(&self, block: BlockId) -> Vec<InstrId> {
        let bb = &self.blocks[block.index()];
        let mut ids = Vec::new();
        let mut cursor = bb.first;
        while let Some(id) = cursor {
            ids.push(id);
            if Some(id) == bb.last {
                break;
            }
            cursor = self.instr(id).next;
        }
        ids
    }

    pub fn phi_count(&self) -> usize {
        self.order()
            .into_iter()
            .filter(|&id| self.instr(id).is_phi())
            .count()
    }

    /// Blocks in reverse post-order from the entry block.
    pub fn reverse_post_order(&self) -> Vec<BlockId> {
        let mut visited = vec![false; self.blocks.len()];
        let mut post = Vec::with_capacity(self.blocks.len());
        let mut stack = vec![(BlockId::ENTRY, 0usize)];
        if self.blocks.is_empty() {
            return post;
        }
        visited[0] = true;
        while let Some((block, next_succ)) = stack.pop() {
            let succs = &self.blocks[block.index()].succs;
            if let Some(&succ) = succs.get(next_succ) {
                stack.push((block, next_succ + 1));
                if !visited[succ.index()] {
                    visited[succ.index()] = true;
                    stack.push((succ, 0));
                }
            } else {
                post.push(block);
            }
        }
        post.reverse();
        post
    }

    /// Display form of a value: `x<int>`, `$4<float>`, `2.5`, `(float)n<int>`.
    pub fn describe(&self, id: ValueId) -> String {
        let value = self.value(id);
        match value.kind {
            ValueKind::Variable { name, role } => match role {
                VarRole::Temp => format!("${}<{}>", id.0, value.ty),
                _ => format!("{}<{}>", name, value.ty),
            },
            ValueKind::Constant(c) => c.to_string(),
            ValueKind::Cast { source } => format!("({}){}", value.ty, self.describe(source)),
            ValueKind::Callee(Callee::Function(name)) => name.to_string(),
            ValueKind::Callee(Callee::Builtin(builtin)) => builtin.name().to_string(),
        }
    }

    /// Textual dump of the instruction sequence, grouped by block once blocks exist.
    pub fn print(&self) -> String {
        let mut out = String::new();
        let params: Vec<String> = self.params.iter().map(|&p| self.describe(p)).collect();
        let _ = writeln!(
            out,
            "function {}({}) -> {}",
            self.name,
            params.join(", "),
            self.ty(self.result)
        );
        let mut current_block = None;
        for id in self.order() {
            let instr = self.instr(id);
            if instr.block.is_some() && instr.block != current_block {
                current_block = instr.block;
                if let Some(block) = current_block {
                    let preds: Vec<String> = self.blocks[block.index()]
                        .preds
                        .iter()
                        .map(|p| p.to_string())
                        .collect();
                    let _ = writeln!(out, "{block}: ; preds = {}", preds.join(", "));
                }
            }
            let _ = writeln!(out, "  {}", self.print_instr(id));
        }
        out
    }

    pub fn print_instr(&self, id: InstrId) -> String {
        let instr = self.instr(id);
        let mut line = String::new();
        if !instr.reachable {
            line.push_str("(unreachable) ");
        }
        if let Some(result) = instr.result {
            let _ = write!(line, "{} = ", self.describe(result));
        }
        line.push_str(instr.name());
        if let Some(callee) = instr.callee {
            let _ = write!(line, " {}", self.describe(callee));
        }
        if let Some(cmp) = instr.cmp {
            let _ = write!(line, " {cmp}");
        }
        let operands: Vec<String> = instr
            .operands
            .iter()
            .enumerate()
            .map(|(i, &v)| match instr.preds.get(i) {
                Some(PhiPred::Block(b)) => format!("[{}, {b}]", self.describe(v)),
                Some(PhiPred::Taken(j)) => {
                    format!("[{}, @{}]", self.describe(v), self.instr(*j).offset)
                }
                Some(PhiPred::Fallthrough) => format!("[{}, fallthrough]", self.describe(v)),
                None => self.describe(v),
            })
            .collect();
        if !operands.is_empty() {
            let _ = write!(line, " {}", operands.join(", "));
        }
        if let Some(target) = instr.target {
            let _ = write!(line, " -> {}", target.offset);
        }
        if let Some(def) = instr.reaching {
            let _ = write!(line, " (reads {})", self.describe(def));
        }
        line
    }
}

impl fmt::Debug for Function<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.print())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_utils::test::TestContext;

    #[test]
    fn test_interning() {
        let ctx = TestContext::new();
        let session = ctx.create_session();
        let mut func = Function::new("f", &["a".to_string()], &session);

        let two = func.constant(Scalar::Int(2));
        assert_eq!(func.constant(Scalar::Int(2)), two);
        assert_ne!(func.constant(Scalar::Float(2.0)), two);
        assert_eq!(func.ty(two), Type::Int);

        let a = func.local(session.intern_str("a"));
        assert_eq!(a, func.params[0]);

        let g = func.global(session.intern_str("a"));
        assert_ne!(g, a);
        assert!(func.is_global(g) && !func.is_local(g));
        assert_eq!(func.global(session.intern_str("a")), g);
        assert_eq!(func.global_vars(), vec![("a", g)]);

        let cast = func.cast(two, Type::Float);
        assert_eq!(func.cast(two, Type::Float), cast);
        assert_eq!(func.ty(cast), Type::Float);
        assert_eq!(func.origin_ty(cast), Type::Int);
        assert_eq!(func.describe(cast), "(float)2");
        assert_eq!(func.cast_count(), 1);
    }

    #[test]
    fn test_bind_args() {
        let ctx = TestContext::new();
        let session = ctx.create_session();
        let mut func = Function::new("f", &["a".to_string(), "b".to_string()], &session);
        func.bind_args(&[Scalar::Int(1), Scalar::Float(2.0)]).unwrap();
        assert_eq!(func.ty(func.params[0]), Type::Int);
        assert_eq!(func.ty(func.params[1]), Type::Float);

        let err = func.bind_args(&[Scalar::Int(1)]).unwrap_err();
        assert!(matches!(err, CompileError::ArgumentCount { expected: 2, found: 1, .. }));
        let err = func.bind_args(&[Scalar::Int(1), Scalar::None]).unwrap_err();
        assert!(err.to_string().contains("'b'"));
    }

    #[test]
    fn test_builtin_names() {
        for name in ["range", "float", "int", "len", "zeros"] {
            assert_eq!(Builtin::from_name(name).map(Builtin::name), Some(name));
        }
        assert_eq!(Builtin::from_name("print"), None);
    }

    #[test]
    fn test_linked_sequence_editing() {
        let ctx = TestContext::new();
        let session = ctx.create_session();
        let mut func = Function::new("f", &[], &session);
        let loc = SourceLoc::new("f.py", 1);

        let a = func.append(Instruction::new(InstrKind::Op(Opcode::Nop), 0, loc.clone()));
        let b = func.append(Instruction::new(InstrKind::Op(Opcode::PopTop), 2, loc.clone()));
        let c = func.insert_before(b, Instruction::new(InstrKind::Phi, 2, loc.clone()));
        assert_eq!(func.order(), vec![a, c, b]);

        func.unlink(a);
        assert_eq!(func.order(), vec![c, b]);
        assert_eq!(func.head, Some(c));

        func.unlink(b);
        assert_eq!(func.order(), vec![c]);
        assert_eq!(func.tail, Some(c));
        assert!(func.instr(a).discard);
    }
}
