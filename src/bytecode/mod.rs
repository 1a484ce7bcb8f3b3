//! Symbolic instruction stream.
//!
//! A function arrives as an ordered list of [`RawInstr`] records: a symbolic
//! [`Opcode`], its immediate [`Operand`], the byte offset jumps refer to and
//! the source location faults are reported at. Each opcode carries a static
//! [`OpInfo`] descriptor with its stack effect and control-flow shape; the IR
//! builder consults it directly.
//!
//! ```text
//! def add(a, b) in "basicmath.py":
//!   3      0 LOAD_FAST          a
//!          2 LOAD_FAST          b
//!          4 BINARY_ADD
//!          6 RETURN_VALUE
//! ```

pub mod parser;

pub use parser::{parse_listing, Listing};

use crate::core::Type;
use std::fmt;
use std::sync::Arc;

/// `file:line` position of an instruction in the source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLoc {
    pub file: Arc<str>,
    pub line: u32,
}

impl SourceLoc {
    pub fn new(file: impl Into<Arc<str>>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// A literal constant, a call argument or the result of running compiled code.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl Scalar {
    pub fn ty(&self) -> Type {
        match self {
            Scalar::None => Type::Void,
            Scalar::Bool(_) => Type::Bool,
            Scalar::Int(_) => Type::Int,
            Scalar::Float(_) => Type::Float,
        }
    }

    /// Identity of the literal for constant-pool interning. Floats compare
    /// by bit pattern so `0.0` and `-0.0` stay distinct.
    pub fn literal_key(&self) -> (u8, u64) {
        match *self {
            Scalar::None => (0, 0),
            Scalar::Bool(b) => (1, b as u64),
            Scalar::Int(i) => (2, i as u64),
            Scalar::Float(x) => (3, x.to_bits()),
        }
    }

    /// Parse a literal as written in a listing or on the command line.
    pub fn parse(text: &str) -> Option<Scalar> {
        match text {
            "None" => return Some(Scalar::None),
            "True" => return Some(Scalar::Bool(true)),
            "False" => return Some(Scalar::Bool(false)),
            "inf" => return Some(Scalar::Float(f64::INFINITY)),
            "-inf" => return Some(Scalar::Float(f64::NEG_INFINITY)),
            "nan" => return Some(Scalar::Float(f64::NAN)),
            _ => {}
        }
        let body = text.strip_prefix('-').unwrap_or(text);
        if body.is_empty() || !body.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
            return None;
        }
        if body.bytes().all(|b| b.is_ascii_digit()) {
            text.parse().ok().map(Scalar::Int)
        } else {
            text.parse().ok().map(Scalar::Float)
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Scalar::None => f.write_str("None"),
            Scalar::Bool(true) => f.write_str("True"),
            Scalar::Bool(false) => f.write_str("False"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(x) if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e16 => {
                write!(f, "{x:.1}")
            }
            Scalar::Float(x) => write!(f, "{x}"),
        }
    }
}

/// Result of running compiled code: a scalar, or a copy of a returned array.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
}

impl From<Scalar> for Value {
    fn from(value: Scalar) -> Self {
        Value::Scalar(value)
    }
}

impl PartialEq<Scalar> for Value {
    fn eq(&self, other: &Scalar) -> bool {
        matches!(self, Value::Scalar(value) if value == other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = match self {
            Value::Scalar(value) => return write!(f, "{value}"),
            Value::IntArray(items) => items.iter().map(|i| i.to_string()).collect(),
            Value::FloatArray(items) => items
                .iter()
                .map(|&x| Scalar::Float(x).to_string())
                .collect(),
        };
        write!(f, "[{}]", items.join(", "))
    }
}

/// Comparison selector of `COMPARE_OP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn from_symbol(s: &str) -> Option<Self> {
        Some(match s {
            "<" => CmpOp::Lt,
            "<=" => CmpOp::Le,
            "==" => CmpOp::Eq,
            "!=" => CmpOp::Ne,
            ">" => CmpOp::Gt,
            ">=" => CmpOp::Ge,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Immediate operand of an instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Const(Scalar),
    Name(String),
    /// Jump label, absolute or relative depending on the opcode.
    Jump(u32),
    Compare(CmpOp),
    /// Argument count of a call.
    Count(u32),
    /// Operand text of an opcode that is recognised but never compiled.
    Raw(String),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Const(c) => write!(f, "{c}"),
            Operand::Name(n) => f.write_str(n),
            Operand::Jump(label) => write!(f, "{label}"),
            Operand::Compare(op) => write!(f, "{op}"),
            Operand::Count(n) => write!(f, "{n}"),
            Operand::Raw(text) => f.write_str(text),
        }
    }
}

/// Shape of the operand an opcode expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    Const,
    Name,
    JumpAbsolute,
    JumpRelative,
    Compare,
    Count,
    Raw,
}

/// Control-flow shape of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    /// Falls through to the next instruction.
    None,
    /// Unconditional transfer to the target.
    Always,
    /// Pops the condition, jumps when its truth equals `jump_if`.
    Conditional { jump_if: bool },
    /// Jumps keeping the condition on the stack when its truth equals
    /// `jump_if`, otherwise pops it and falls through.
    ShortCircuit { jump_if: bool },
    /// Pushes the next value of the iterator below it and falls through,
    /// or pops the exhausted iterator and jumps.
    ForIter,
}

impl JumpKind {
    pub fn has_target(self) -> bool {
        self != JumpKind::None
    }

    pub fn is_conditional(self) -> bool {
        matches!(
            self,
            JumpKind::Conditional { .. } | JumpKind::ShortCircuit { .. } | JumpKind::ForIter
        )
    }
}

/// Static descriptor of an opcode.
#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    pub name: &'static str,
    pub pops: u8,
    pub pushes: u8,
    pub operand: OperandKind,
    pub jump: JumpKind,
    /// Dropped from the instruction sequence before block assignment.
    pub discard: bool,
    pub terminator: bool,
}

const fn op(name: &'static str, pops: u8, pushes: u8) -> OpInfo {
    OpInfo {
        name,
        pops,
        pushes,
        operand: OperandKind::None,
        jump: JumpKind::None,
        discard: false,
        terminator: false,
    }
}

const fn with_operand(info: OpInfo, operand: OperandKind) -> OpInfo {
    OpInfo { operand, ..info }
}

const fn jump(name: &'static str, pops: u8, operand: OperandKind, jump: JumpKind) -> OpInfo {
    OpInfo {
        name,
        pops,
        pushes: 0,
        operand,
        jump,
        discard: false,
        terminator: matches!(jump, JumpKind::Always),
    }
}

const fn discarded(info: OpInfo) -> OpInfo {
    OpInfo {
        discard: true,
        ..info
    }
}

const fn raw(name: &'static str) -> OpInfo {
    with_operand(op(name, 0, 0), OperandKind::Raw)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Nop,
    PopBlock,
    SetupLoop,
    LoadConst,
    LoadFast,
    StoreFast,
    PopTop,
    UnaryNegative,
    UnaryNot,
    BinaryAdd,
    BinarySubtract,
    BinaryMultiply,
    BinaryModulo,
    BinaryTrueDivide,
    BinaryFloorDivide,
    BinaryPower,
    InplaceAdd,
    InplaceSubtract,
    InplaceMultiply,
    InplaceModulo,
    InplaceTrueDivide,
    InplaceFloorDivide,
    InplacePower,
    CompareOp,
    ReturnValue,
    JumpAbsolute,
    JumpForward,
    PopJumpIfFalse,
    PopJumpIfTrue,
    JumpIfFalseOrPop,
    JumpIfTrueOrPop,
    CallFunction,
    LoadGlobal,
    StoreGlobal,
    BinarySubscr,
    StoreSubscr,
    GetIter,
    ForIter,
    DupTop,
    DupTopTwo,
    RotTwo,
    RotThree,

    // Recognised in listings, rejected by the compiler.
    LoadAttr,
    StoreAttr,
    BuildTuple,
    BuildList,
    UnaryPositive,
    UnaryInvert,
    BinaryAnd,
    BinaryOr,
    BinaryXor,
    BinaryLshift,
    BinaryRshift,
    SetupExcept,
    RaiseVarargs,
}

impl Opcode {
    pub const ALL: [Opcode; 55] = {
        use Opcode::*;
        [
            Nop, PopBlock, SetupLoop, LoadConst, LoadFast, StoreFast, PopTop, UnaryNegative,
            UnaryNot, BinaryAdd, BinarySubtract, BinaryMultiply, BinaryModulo,
            BinaryTrueDivide, BinaryFloorDivide, BinaryPower, InplaceAdd, InplaceSubtract,
            InplaceMultiply, InplaceModulo, InplaceTrueDivide, InplaceFloorDivide,
            InplacePower, CompareOp, ReturnValue, JumpAbsolute, JumpForward, PopJumpIfFalse,
            PopJumpIfTrue, JumpIfFalseOrPop, JumpIfTrueOrPop, CallFunction, LoadGlobal,
            StoreGlobal, BinarySubscr, StoreSubscr, GetIter, ForIter, DupTop, DupTopTwo,
            RotTwo, RotThree, LoadAttr, StoreAttr, BuildTuple, BuildList, UnaryPositive,
            UnaryInvert, BinaryAnd, BinaryOr, BinaryXor, BinaryLshift, BinaryRshift,
            SetupExcept, RaiseVarargs,
        ]
    };

    pub const fn info(self) -> OpInfo {
        use Opcode::*;
        use OperandKind as K;
        match self {
            Nop => discarded(op("NOP", 0, 0)),
            PopBlock => discarded(op("POP_BLOCK", 0, 0)),
            SetupLoop => discarded(with_operand(op("SETUP_LOOP", 0, 0), K::JumpRelative)),
            LoadConst => discarded(with_operand(op("LOAD_CONST", 0, 1), K::Const)),
            LoadFast => with_operand(op("LOAD_FAST", 0, 1), K::Name),
            StoreFast => with_operand(op("STORE_FAST", 1, 0), K::Name),
            PopTop => op("POP_TOP", 1, 0),
            UnaryNegative => op("UNARY_NEGATIVE", 1, 1),
            UnaryNot => op("UNARY_NOT", 1, 1),
            BinaryAdd => op("BINARY_ADD", 2, 1),
            BinarySubtract => op("BINARY_SUBTRACT", 2, 1),
            BinaryMultiply => op("BINARY_MULTIPLY", 2, 1),
            BinaryModulo => op("BINARY_MODULO", 2, 1),
            BinaryTrueDivide => op("BINARY_TRUE_DIVIDE", 2, 1),
            BinaryFloorDivide => op("BINARY_FLOOR_DIVIDE", 2, 1),
            BinaryPower => op("BINARY_POWER", 2, 1),
            InplaceAdd => op("INPLACE_ADD", 2, 1),
            InplaceSubtract => op("INPLACE_SUBTRACT", 2, 1),
            InplaceMultiply => op("INPLACE_MULTIPLY", 2, 1),
            InplaceModulo => op("INPLACE_MODULO", 2, 1),
            InplaceTrueDivide => op("INPLACE_TRUE_DIVIDE", 2, 1),
            InplaceFloorDivide => op("INPLACE_FLOOR_DIVIDE", 2, 1),
            InplacePower => op("INPLACE_POWER", 2, 1),
            CompareOp => with_operand(op("COMPARE_OP", 2, 1), K::Compare),
            ReturnValue => OpInfo { terminator: true, ..op("RETURN_VALUE", 1, 0) },
            JumpAbsolute => jump("JUMP_ABSOLUTE", 0, K::JumpAbsolute, JumpKind::Always),
            JumpForward => jump("JUMP_FORWARD", 0, K::JumpRelative, JumpKind::Always),
            PopJumpIfFalse => jump("POP_JUMP_IF_FALSE", 1, K::JumpAbsolute, JumpKind::Conditional { jump_if: false }),
            PopJumpIfTrue => jump("POP_JUMP_IF_TRUE", 1, K::JumpAbsolute, JumpKind::Conditional { jump_if: true }),
            JumpIfFalseOrPop => jump("JUMP_IF_FALSE_OR_POP", 1, K::JumpAbsolute, JumpKind::ShortCircuit { jump_if: false }),
            JumpIfTrueOrPop => jump("JUMP_IF_TRUE_OR_POP", 1, K::JumpAbsolute, JumpKind::ShortCircuit { jump_if: true }),
            // Pops the callee; the arguments come on top of it.
            CallFunction => with_operand(op("CALL_FUNCTION", 1, 1), K::Count),
            LoadGlobal => with_operand(op("LOAD_GLOBAL", 0, 1), K::Name),
            StoreGlobal => with_operand(op("STORE_GLOBAL", 1, 0), K::Name),
            BinarySubscr => op("BINARY_SUBSCR", 2, 1),
            StoreSubscr => op("STORE_SUBSCR", 3, 0),
            GetIter => op("GET_ITER", 1, 1),
            ForIter => OpInfo { pushes: 1, ..jump("FOR_ITER", 1, K::JumpRelative, JumpKind::ForIter) },
            DupTop => discarded(op("DUP_TOP", 1, 2)),
            DupTopTwo => discarded(op("DUP_TOP_TWO", 2, 4)),
            RotTwo => discarded(op("ROT_TWO", 2, 2)),
            RotThree => discarded(op("ROT_THREE", 3, 3)),
            LoadAttr => raw("LOAD_ATTR"),
            StoreAttr => raw("STORE_ATTR"),
            BuildTuple => raw("BUILD_TUPLE"),
            BuildList => raw("BUILD_LIST"),
            UnaryPositive => raw("UNARY_POSITIVE"),
            UnaryInvert => raw("UNARY_INVERT"),
            BinaryAnd => raw("BINARY_AND"),
            BinaryOr => raw("BINARY_OR"),
            BinaryXor => raw("BINARY_XOR"),
            BinaryLshift => raw("BINARY_LSHIFT"),
            BinaryRshift => raw("BINARY_RSHIFT"),
            SetupExcept => raw("SETUP_EXCEPT"),
            RaiseVarargs => raw("RAISE_VARARGS"),
        }
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn from_name(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.name() == s)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One record of the instruction stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RawInstr {
    pub offset: u32,
    pub op: Opcode,
    pub operand: Operand,
    pub loc: SourceLoc,
}

/// Name and parameter names of a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    pub name: String,
    pub params: Vec<String>,
}

/// A function body as an instruction stream.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCode {
    pub signature: FunctionSignature,
    pub file: Arc<str>,
    pub instrs: Vec<RawInstr>,
}

impl FunctionCode {
    pub fn new(name: &str, params: &[&str], file: &str) -> Self {
        Self {
            signature: FunctionSignature {
                name: name.to_string(),
                params: params.iter().map(|p| p.to_string()).collect(),
            },
            file: Arc::from(file),
            instrs: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.signature.name
    }

    /// Append an instruction at the next two-byte offset.
    pub fn push(&mut self, line: u32, op: Opcode, operand: Operand) -> &mut Self {
        let offset = self.instrs.last().map_or(0, |last| last.offset + 2);
        self.instrs.push(RawInstr {
            offset,
            op,
            operand,
            loc: SourceLoc::new(self.file.clone(), line),
        });
        self
    }

    /// Offset of the instruction following `index`, the base of relative jumps.
    pub fn next_offset(&self, index: usize) -> u32 {
        match self.instrs.get(index + 1) {
            Some(next) => next.offset,
            None => self.instrs.get(index).map_or(0, |i| i.offset + 2),
        }
    }
}
