//! Instruction decoding.
//!
//! [`decode_one`] reads a single opcode and its raw operand. [`Decoder`] is
//! the lazy cursor the interpreter advances: it folds `EXTENDED_ARG`
//! prefixes into the following instruction, resolves operands against the
//! unit's pools and attaches source line numbers from the line table.

use thiserror::Error;

use super::code::{CodeUnit, Constant};
use super::opcode::{CompareOp, JumpKind, Opcode, OperandPool};

/// Decoding failures. Any of these makes the unit malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("offset {offset} is past the end of the instruction stream ({len} bytes)")]
    OutOfBounds { offset: usize, len: usize },
    #[error("truncated operand for {opcode} at offset {offset}")]
    TruncatedOperand { opcode: Opcode, offset: usize },
    #[error("unknown opcode byte {byte} at offset {offset}")]
    UnknownOpcode { byte: u8, offset: usize },
    #[error("{pool} index {index} out of range for {opcode}")]
    OperandIndex {
        opcode: Opcode,
        pool: &'static str,
        index: u32,
    },
    #[error("extended operand overflows 32 bits at offset {offset}")]
    OperandOverflow { offset: usize },
}

/// One opcode read straight off the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawInstruction {
    pub opcode: Opcode,
    /// Operand including any pending extension; 0 for argument-less opcodes.
    pub raw: u32,
    pub next_offset: usize,
    /// High bits to add to the next instruction's operand (only non-zero
    /// after `EXTENDED_ARG`).
    pub carry: u32,
}

/// Decode the instruction at `offset`, adding `pending` (the carry of a
/// preceding `EXTENDED_ARG`) to its operand.
pub fn decode_one(bytes: &[u8], offset: usize, pending: u32) -> Result<RawInstruction, DecodeError> {
    let byte = *bytes.get(offset).ok_or(DecodeError::OutOfBounds {
        offset,
        len: bytes.len(),
    })?;
    let opcode = Opcode::from_byte(byte).ok_or(DecodeError::UnknownOpcode { byte, offset })?;

    if !opcode.has_argument() {
        return Ok(RawInstruction {
            opcode,
            raw: 0,
            next_offset: offset + 1,
            carry: 0,
        });
    }

    let (lo, hi) = match (bytes.get(offset + 1), bytes.get(offset + 2)) {
        (Some(lo), Some(hi)) => (*lo, *hi),
        _ => return Err(DecodeError::TruncatedOperand { opcode, offset }),
    };
    let raw = u32::from(u16::from_le_bytes([lo, hi]))
        .checked_add(pending)
        .ok_or(DecodeError::OperandOverflow { offset })?;

    let carry = if opcode == Opcode::ExtendedArg {
        raw.checked_mul(1 << 16)
            .ok_or(DecodeError::OperandOverflow { offset })?
    } else {
        0
    };

    Ok(RawInstruction {
        opcode,
        raw,
        next_offset: offset + 3,
        carry,
    })
}

/// A resolved operand, borrowed from the owning unit's pools.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand<'a> {
    Name(&'a str),
    Local(&'a str),
    Const(&'a Constant),
    Compare(CompareOp),
    Free(&'a str),
    Raw(u32),
}

impl<'a> Operand<'a> {
    /// The operand as a name, for name/local/free pools.
    pub fn name(&self) -> Option<&'a str> {
        match *self {
            Operand::Name(n) | Operand::Local(n) | Operand::Free(n) => Some(n),
            _ => None,
        }
    }
}

/// Map a raw operand through the pool its opcode uses.
pub fn resolve_operand<'a>(
    opcode: Opcode,
    unit: &'a CodeUnit,
    raw: u32,
) -> Result<Option<Operand<'a>>, DecodeError> {
    let index_err = |pool: &'static str| DecodeError::OperandIndex {
        opcode,
        pool,
        index: raw,
    };
    let idx = raw as usize;

    let operand = match opcode.operand_pool() {
        OperandPool::None => return Ok(None),
        OperandPool::Raw => Operand::Raw(raw),
        OperandPool::Name => Operand::Name(unit.names.get(idx).ok_or_else(|| index_err("name"))?),
        OperandPool::Local => {
            Operand::Local(unit.varnames.get(idx).ok_or_else(|| index_err("local"))?)
        }
        OperandPool::Const => {
            Operand::Const(unit.consts.get(idx).ok_or_else(|| index_err("constant"))?)
        }
        OperandPool::Compare => {
            Operand::Compare(CompareOp::from_index(raw).ok_or_else(|| index_err("comparison"))?)
        }
        OperandPool::Free => Operand::Free(unit.freevars.get(idx).ok_or_else(|| index_err("free"))?),
    };

    Ok(Some(operand))
}

/// A fully decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction<'a> {
    pub opcode: Opcode,
    pub operand: Option<Operand<'a>>,
    /// Raw operand value after prefix folding.
    pub arg: u32,
    /// Offset of the first byte, including any `EXTENDED_ARG` prefix.
    pub offset: u32,
    /// Offset just past this instruction.
    pub next_offset: u32,
    pub line: u32,
    pub jump_target: Option<u32>,
}

impl<'a> Instruction<'a> {
    pub fn name(&self) -> Option<&'a str> {
        self.operand.and_then(|o| o.name())
    }

    pub fn constant(&self) -> Option<&'a Constant> {
        match self.operand {
            Some(Operand::Const(c)) => Some(c),
            _ => None,
        }
    }
}

/// Offset-to-line mapping decoded from a unit's compressed line table.
#[derive(Debug, Clone)]
pub struct LineTable {
    /// `(first offset, line)` pairs in ascending offset order.
    starts: Vec<(u32, u32)>,
}

impl LineTable {
    pub fn new(first_line: u32, table: &[u8]) -> Self {
        let mut starts = vec![(0, first_line)];
        let (mut addr, mut line) = (0u32, first_line);
        for pair in table.chunks_exact(2) {
            addr = addr.saturating_add(u32::from(pair[0]));
            line = line.saturating_add(u32::from(pair[1]));
            match starts.last_mut() {
                Some(last) if last.0 == addr => last.1 = line,
                _ => starts.push((addr, line)),
            }
        }
        Self { starts }
    }

    pub fn line_for(&self, offset: u32) -> u32 {
        let idx = self.starts.partition_point(|(start, _)| *start <= offset);
        self.starts[idx.saturating_sub(1)].1
    }
}

/// Lazy instruction cursor over one code unit.
pub struct Decoder<'a> {
    unit: &'a CodeUnit,
    offset: usize,
    lines: LineTable,
}

impl<'a> Decoder<'a> {
    pub fn new(unit: &'a CodeUnit) -> Self {
        Self {
            unit,
            offset: 0,
            lines: LineTable::new(unit.first_line, &unit.line_table),
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_finished(&self) -> bool {
        self.offset >= self.unit.code.len()
    }

    /// Decode and consume the next instruction.
    pub fn next_instruction(&mut self) -> Result<Option<Instruction<'a>>, DecodeError> {
        let decoded = self.decode_at(self.offset)?;
        if let Some(ins) = &decoded {
            self.offset = ins.next_offset as usize;
        }
        Ok(decoded)
    }

    /// Decode the next instruction without consuming it.
    pub fn peek(&self) -> Result<Option<Instruction<'a>>, DecodeError> {
        self.decode_at(self.offset)
    }

    /// Decode the instruction that starts at `offset`.
    pub fn decode_at(&self, offset: usize) -> Result<Option<Instruction<'a>>, DecodeError> {
        let bytes = &self.unit.code;
        if offset >= bytes.len() {
            return Ok(None);
        }

        let mut pos = offset;
        let mut pending = 0;
        let raw = loop {
            let raw = decode_one(bytes, pos, pending)?;
            if raw.opcode != Opcode::ExtendedArg {
                break raw;
            }
            pending = raw.carry;
            pos = raw.next_offset;
        };

        let operand = resolve_operand(raw.opcode, self.unit, raw.raw)?;
        let next_offset = raw.next_offset as u32;
        let jump_target = match raw.opcode.jump_kind() {
            JumpKind::None => None,
            JumpKind::Relative => Some(next_offset.saturating_add(raw.raw)),
            JumpKind::Absolute => Some(raw.raw),
        };

        Ok(Some(Instruction {
            opcode: raw.opcode,
            operand,
            arg: raw.raw,
            offset: offset as u32,
            next_offset,
            line: self.lines.line_for(offset as u32),
            jump_target,
        }))
    }

    /// Opcode byte at an arbitrary offset, if any.
    pub fn opcode_at(&self, offset: usize) -> Option<Opcode> {
        self.unit.code.get(offset).copied().and_then(Opcode::from_byte)
    }
}

impl<'a> Iterator for Decoder<'a> {
    type Item = Result<Instruction<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_instruction() {
            Ok(Some(ins)) => Some(Ok(ins)),
            Ok(None) => None,
            Err(e) => {
                // stop after the first error
                self.offset = self.unit.code.len();
                Some(Err(e))
            }
        }
    }
}

/// Decode a whole unit eagerly.
pub fn decode_all(unit: &CodeUnit) -> Result<Vec<Instruction<'_>>, DecodeError> {
    Decoder::new(unit).collect()
}
