//! Bytecode

use crate::vm::value::Value;

/// Operational code, instruction to the stack-based virtual machine
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Ord, PartialOrd)]
#[repr(u8)]
pub enum Op {
    Halt = 0x00,

    /// Operand: constant index
    Const = 0x01,

    // arithmetic
    Add = 0x02,
    Sub = 0x03,
    Mul = 0x04,
    Div = 0x05,

    /// Operand: [`CompareOp`]
    Cmp = 0x06,

    /// Operand: two-byte absolute address
    Jmp = 0x07,
    /// Operand: two-byte absolute address
    JmpIfFalse = 0x08,

    // globals
    GetGlobal = 0x09,
    SetGlobal = 0x0A,

    Pop = 0x0B,

    // locals (offset from the base pointer)
    GetLocal = 0x0C,
    SetLocal = 0x0D,

    /// Operand: number of locals to drop under the top value
    ScopeExit = 0x0E,

    /// Operand: number of arguments
    Call = 0x0F,
    Return = 0x10,

    // cells (index into the cells of the current activation)
    GetCell = 0x11,
    SetCell = 0x12,
    LoadCell = 0x13,

    /// Operand: number of captured cells
    MakeFunction = 0x14,
}

/// Lookup table of `u8` → [`Op`]
const OPS: [Op; 21] = [
    Op::Halt,
    Op::Const,
    Op::Add,
    Op::Sub,
    Op::Mul,
    Op::Div,
    Op::Cmp,
    Op::Jmp,
    Op::JmpIfFalse,
    Op::GetGlobal,
    Op::SetGlobal,
    Op::Pop,
    Op::GetLocal,
    Op::SetLocal,
    Op::ScopeExit,
    Op::Call,
    Op::Return,
    Op::GetCell,
    Op::SetCell,
    Op::LoadCell,
    Op::MakeFunction,
];

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Ord, PartialOrd)]
pub enum OpCodeOperands {
    None,
    One,
    Two,
}

impl Op {
    pub fn operands(&self) -> OpCodeOperands {
        match self {
            Op::Const
            | Op::Cmp
            | Op::GetGlobal
            | Op::SetGlobal
            | Op::GetLocal
            | Op::SetLocal
            | Op::ScopeExit
            | Op::Call
            | Op::GetCell
            | Op::SetCell
            | Op::LoadCell
            | Op::MakeFunction => OpCodeOperands::One,
            Op::Jmp | Op::JmpIfFalse => OpCodeOperands::Two,
            Op::Halt | Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Pop | Op::Return => {
                OpCodeOperands::None
            }
        }
    }

    /// Number of operand bytes following the opcode
    pub fn operand_width(&self) -> usize {
        match self.operands() {
            OpCodeOperands::None => 0,
            OpCodeOperands::One => 1,
            OpCodeOperands::Two => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Halt => "HALT",
            Op::Const => "CONST",
            Op::Add => "ADD",
            Op::Sub => "SUB",
            Op::Mul => "MUL",
            Op::Div => "DIV",
            Op::Cmp => "CMP",
            Op::Jmp => "JMP",
            Op::JmpIfFalse => "JMP_IF_FALSE",
            Op::GetGlobal => "GET_GLOBAL",
            Op::SetGlobal => "SET_GLOBAL",
            Op::Pop => "POP",
            Op::GetLocal => "GET_LOCAL",
            Op::SetLocal => "SET_LOCAL",
            Op::ScopeExit => "SCOPE_EXIT",
            Op::Call => "CALL",
            Op::Return => "RETURN",
            Op::GetCell => "GET_CELL",
            Op::SetCell => "SET_CELL",
            Op::LoadCell => "LOAD_CELL",
            Op::MakeFunction => "MAKE_FUNCTION",
        }
    }
}

impl From<Op> for u8 {
    fn from(op: Op) -> u8 {
        op as u8
    }
}

impl TryFrom<u8> for Op {
    /// The unknown byte
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        OPS.get(byte as usize).copied().ok_or(byte)
    }
}

/// Operand of [`Op::Cmp`]
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
#[repr(u8)]
pub enum CompareOp {
    Lt = 0,
    Gt = 1,
    Eq = 2,
    Ge = 3,
    Le = 4,
    Ne = 5,
}

impl CompareOp {
    pub const ALL: [CompareOp; 6] = [
        CompareOp::Lt,
        CompareOp::Gt,
        CompareOp::Eq,
        CompareOp::Ge,
        CompareOp::Le,
        CompareOp::Ne,
    ];

    pub fn from_symbol(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.as_str() == s)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
            CompareOp::Eq => "==",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
            CompareOp::Ne => "!=",
        }
    }

    pub fn apply<T: PartialOrd + ?Sized>(&self, x: &T, y: &T) -> bool {
        match self {
            CompareOp::Lt => x < y,
            CompareOp::Gt => x > y,
            CompareOp::Eq => x == y,
            CompareOp::Ge => x >= y,
            CompareOp::Le => x <= y,
            CompareOp::Ne => x != y,
        }
    }
}

impl TryFrom<u8> for CompareOp {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Self::ALL.get(byte as usize).copied().ok_or(byte)
    }
}

/// Local variable declaration, kept for disassembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVar {
    pub name: String,
    /// Offset from the base pointer
    pub slot: usize,
}

/// Compiled function body: bytecode, constants and variable layout
#[derive(Debug, Clone, Default)]
pub struct CodeObject {
    pub name: String,
    pub arity: usize,
    /// [`Op`] s and their operands
    code: Vec<u8>,
    /// Constant pool, unique per type and value
    constants: Vec<Value>,
    locals: Vec<LocalVar>,
    /// Free variables followed by own cells
    cell_names: Vec<String>,
    free_count: usize,
}

impl CodeObject {
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity,
            ..Default::default()
        }
    }
}

/// Reader
impl CodeObject {
    #[inline(always)]
    pub fn bytes(&self) -> &[u8] {
        &self.code
    }

    #[inline(always)]
    pub fn read_u8(&self, ix: usize) -> Option<u8> {
        self.code.get(ix).copied()
    }

    /// Reads a big-endian `u16`
    #[inline(always)]
    pub fn read_u16(&self, ix: usize) -> Option<u16> {
        let hi = self.read_u8(ix)? as u16;
        let lo = self.read_u8(ix + 1)? as u16;
        Some((hi << 8) | lo)
    }

    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    pub fn constant(&self, ix: usize) -> Option<Value> {
        self.constants.get(ix).copied()
    }

    pub fn locals(&self) -> &[LocalVar] {
        &self.locals
    }

    /// Name of the latest local declared at the slot
    pub fn local_name(&self, slot: usize) -> Option<&str> {
        self.locals
            .iter()
            .rev()
            .find(|l| l.slot == slot)
            .map(|l| l.name.as_str())
    }

    pub fn cell_names(&self) -> &[String] {
        &self.cell_names
    }

    /// Number of cells captured from the enclosing function
    pub fn free_count(&self) -> usize {
        self.free_count
    }

    /// Number of cells allocated on each activation
    pub fn own_cell_count(&self) -> usize {
        self.cell_names.len() - self.free_count
    }
}

/// Writer
impl CodeObject {
    /// Current write offset, the address of the next instruction
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    #[inline(always)]
    pub fn write_code(&mut self, op: Op) {
        self.code.push(op.into());
    }

    #[inline(always)]
    pub fn write_u8(&mut self, x: u8) {
        self.code.push(x);
    }

    #[inline(always)]
    pub fn write_u16(&mut self, x: u16) {
        // higher 8 bits
        self.code.push((x >> 8) as u8);
        // lower 8 bits
        self.code.push(x as u8);
    }

    /// Overwrites a two-byte operand written before
    pub fn patch_u16(&mut self, ix: usize, x: u16) {
        self.code[ix] = (x >> 8) as u8;
        self.code[ix + 1] = x as u8;
    }

    /// Pushes a constant without deduplication and returns the index
    pub fn push_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    pub fn add_local(&mut self, name: impl Into<String>, slot: usize) {
        self.locals.push(LocalVar {
            name: name.into(),
            slot,
        });
    }

    /// Sets the captured variables. Must be called before any own cell is added.
    pub fn set_free_vars(&mut self, names: impl IntoIterator<Item = String>) {
        debug_assert!(self.cell_names.is_empty());
        self.cell_names.extend(names);
        self.free_count = self.cell_names.len();
    }

    /// Appends an own cell and returns the cell index
    pub fn add_cell(&mut self, name: impl Into<String>) -> usize {
        self.cell_names.push(name.into());
        self.cell_names.len() - 1
    }
}
