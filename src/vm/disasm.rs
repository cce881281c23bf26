//! Disassembler, read-only diagnostic view of [`CodeObject`] s

use std::fmt::{self, Write};

use itertools::Itertools;
use smallvec::SmallVec;
use thiserror::Error;

use crate::vm::{
    code::{CodeObject, CompareOp, Op, OpCodeOperands},
    global::{GlobalId, Globals},
    heap::{Heap, Object, ObjectId},
    value::Value,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DisasmError {
    #[error("unknown opcode 0x{byte:02X} at 0x{at:04X}")]
    UnknownOpcode { byte: u8, at: usize },
    #[error("truncated operand at 0x{at:04X}")]
    Truncated { at: usize },
    #[error("{0}")]
    Fmt(#[from] fmt::Error),
}

/// Decoded instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub offset: usize,
    pub op: Op,
    pub operands: SmallVec<[u8; 2]>,
}

impl Instruction {
    /// One-byte operand
    pub fn arg(&self) -> Option<u8> {
        match self.op.operands() {
            OpCodeOperands::One => self.operands.first().copied(),
            _ => None,
        }
    }

    /// Two-byte big-endian operand
    pub fn address(&self) -> Option<u16> {
        match self.op.operands() {
            OpCodeOperands::Two => Some(((self.operands[0] as u16) << 8) | self.operands[1] as u16),
            _ => None,
        }
    }

    /// Encoded size in bytes
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        1 + self.operands.len()
    }
}

/// Decodes the instruction stream into `(offset, op, operands)`
pub fn decode(co: &CodeObject) -> Result<Vec<Instruction>, DisasmError> {
    let bytes = co.bytes();
    let mut out = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let byte = bytes[offset];
        let op = Op::try_from(byte).map_err(|byte| DisasmError::UnknownOpcode { byte, at: offset })?;

        let width = op.operand_width();
        let operands = bytes
            .get(offset + 1..offset + 1 + width)
            .ok_or(DisasmError::Truncated { at: offset + 1 })?;

        let inst = Instruction {
            offset,
            op,
            operands: operands.iter().copied().collect(),
        };

        offset += inst.len();
        out.push(inst);
    }

    Ok(out)
}

/// Formats code objects with names resolved from the heap and the global table
#[derive(Debug, Clone, Copy)]
pub struct Disassembler<'a> {
    heap: &'a Heap,
    globals: &'a Globals,
}

impl<'a> Disassembler<'a> {
    pub fn new(heap: &'a Heap, globals: &'a Globals) -> Self {
        Self { heap, globals }
    }

    /// Disassembles the code object and every code object reachable from its constants
    pub fn disassemble_all(&self, root: ObjectId) -> Result<String, DisasmError> {
        let mut s = String::new();
        let mut stack = vec![root];
        let mut visited = Vec::new();

        while let Some(id) = stack.pop() {
            if visited.contains(&id) {
                continue;
            }
            visited.push(id);

            let co = match self.heap.as_code(id) {
                Some(co) => co,
                None => continue,
            };

            if !s.is_empty() {
                s.push('\n');
            }
            self.disassemble_into(co, &mut s)?;

            // nested functions, in reverse so that they're printed in constant order
            let nested = co.constants().iter().rev().filter_map(|c| self.nested_code(*c));
            stack.extend(nested);
        }

        Ok(s)
    }

    fn nested_code(&self, value: Value) -> Option<ObjectId> {
        let id = value.as_object()?;
        match self.heap.get(id)? {
            Object::Code(_) => Some(id),
            Object::Function(f) => Some(f.code),
            _ => None,
        }
    }

    pub fn disassemble(&self, co: &CodeObject) -> Result<String, DisasmError> {
        let mut s = String::new();
        self.disassemble_into(co, &mut s)?;
        Ok(s)
    }

    pub fn disassemble_into(&self, co: &CodeObject, s: &mut String) -> Result<(), DisasmError> {
        writeln!(s, "---------------- Disassembly: {} ----------------", co.name)?;

        for inst in self::decode(co)? {
            let mut line = String::new();
            self.write_instruction(co, &inst, &mut line)?;
            writeln!(s, "{}", line.trim_end())?;
        }

        Ok(())
    }

    fn write_instruction(&self, co: &CodeObject, inst: &Instruction, s: &mut String) -> fmt::Result {
        write!(s, "{:04X}    ", inst.offset)?;

        let bytes = std::iter::once(inst.op as u8)
            .chain(inst.operands.iter().copied())
            .map(|b| format!("{:02X} ", b))
            .join("");
        write!(s, "{:<12}{:<20}", bytes, inst.op.as_str())?;

        if let Some(addr) = inst.address() {
            return write!(s, "{:04X}", addr);
        }

        let arg = match inst.arg() {
            Some(arg) => arg,
            None => return Ok(()),
        };
        let ix = arg as usize;

        match inst.op {
            Op::Const => match co.constant(ix) {
                Some(value) => write!(s, "{} ({})", ix, value.display(self.heap)),
                None => write!(s, "{} (?)", ix),
            },
            Op::Cmp => {
                let op = CompareOp::try_from(arg).map(|op| op.as_str()).unwrap_or("?");
                write!(s, "{} ({})", ix, op)
            }
            Op::GetGlobal | Op::SetGlobal => {
                let name = self.globals.name(GlobalId::from(ix)).unwrap_or("?");
                write!(s, "{} ({})", ix, name)
            }
            Op::GetLocal | Op::SetLocal => {
                let name = co.local_name(ix).unwrap_or("?");
                write!(s, "{} ({})", ix, name)
            }
            Op::GetCell | Op::SetCell | Op::LoadCell => {
                let name = co.cell_names().get(ix).map(|s| s.as_str()).unwrap_or("?");
                write!(s, "{} ({})", ix, name)
            }
            _ => write!(s, "{}", ix),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Heap, Globals, CodeObject) {
        let mut heap = Heap::default();
        let mut globals = Globals::default();
        let x = globals.define("x");

        let mut co = CodeObject::new("main", 0);
        co.push_constant(Value::Number(10.0));
        co.push_constant(heap.alloc_string("hi"));

        co.write_code(Op::Const);
        co.write_u8(0);
        co.write_code(Op::SetGlobal);
        co.write_u8(usize::from(x) as u8);
        co.write_code(Op::Cmp);
        co.write_u8(CompareOp::Le as u8);
        co.write_code(Op::JmpIfFalse);
        co.write_u16(0x000A);
        co.write_code(Op::Const);
        co.write_u8(1);
        co.write_code(Op::Halt);

        (heap, globals, co)
    }

    #[test]
    fn decode_offsets() {
        let (_heap, _globals, co) = sample();
        let insts = decode(&co).unwrap();

        let ops = insts.iter().map(|i| (i.offset, i.op)).collect::<Vec<_>>();
        assert_eq!(
            ops,
            vec![
                (0, Op::Const),
                (2, Op::SetGlobal),
                (4, Op::Cmp),
                (6, Op::JmpIfFalse),
                (9, Op::Const),
                (11, Op::Halt),
            ]
        );
        assert_eq!(insts[3].address(), Some(0x000A));
        assert_eq!(insts[4].arg(), Some(1));
    }

    #[test]
    fn format() {
        let (heap, globals, co) = sample();
        let s = Disassembler::new(&heap, &globals).disassemble(&co).unwrap();

        let expected = "\
---------------- Disassembly: main ----------------
0000    01 00       CONST               0 (10)
0002    0A 00       SET_GLOBAL          0 (x)
0004    06 04       CMP                 4 (<=)
0006    08 00 0A    JMP_IF_FALSE        000A
0009    01 01       CONST               1 (\"hi\")
000B    00          HALT
";
        assert_eq!(s, expected);
    }

    #[test]
    fn unknown_opcode() {
        let mut co = CodeObject::new("bad", 0);
        co.write_code(Op::Pop);
        co.write_u8(0xEE);

        assert_eq!(
            decode(&co),
            Err(DisasmError::UnknownOpcode { byte: 0xEE, at: 1 })
        );
    }

    #[test]
    fn truncated_operand() {
        let mut co = CodeObject::new("bad", 0);
        co.write_code(Op::Jmp);
        co.write_u8(0);

        assert_eq!(decode(&co), Err(DisasmError::Truncated { at: 1 }));
    }
}
