//! A small assembler for building code units by hand.
//!
//! Used by the test suites and by tooling that needs synthetic units. It
//! interns names and constants into the unit's pools, records line numbers,
//! resolves jump labels and inserts `EXTENDED_ARG` prefixes for operands that
//! do not fit in 16 bits.

use thiserror::Error;

use super::code::{CodeUnit, Constant, Params, UnitKind};
use super::opcode::{CompareOp, JumpKind, Opcode};

/// Assembly failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsmError {
    #[error("label {0} was never bound")]
    UnboundLabel(usize),
    #[error("{opcode} cannot jump backwards to offset {target}")]
    BackwardRelativeJump { opcode: Opcode, target: u32 },
    #[error("jump operand {0} does not fit in 16 bits")]
    JumpOutOfRange(u32),
    #[error("{0} does not jump")]
    NotAJump(Opcode),
}

/// A jump destination, bound to an offset with [`Assembler::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug)]
struct Fixup {
    /// Position of the low operand byte.
    at: usize,
    opcode: Opcode,
    label: Label,
    next_offset: u32,
}

/// Incremental builder for one [`CodeUnit`].
#[derive(Debug)]
pub struct Assembler {
    unit: CodeUnit,
    current_line: u32,
    lines: Vec<(u32, u32)>,
    labels: Vec<Option<u32>>,
    fixups: Vec<Fixup>,
}

impl Assembler {
    pub fn new(name: &str, kind: UnitKind) -> Self {
        Self {
            unit: CodeUnit::new(name, kind),
            current_line: 1,
            lines: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
        }
    }

    /// Line of the `def`/`class`/module start; later lines are relative to it.
    pub fn first_line(&mut self, line: u32) -> &mut Self {
        self.unit.first_line = line;
        self.current_line = line;
        self
    }

    /// Declare the parameter list; parameters take the first local slots.
    pub fn params(&mut self, params: Params) -> &mut Self {
        for name in &params.names {
            self.local(name);
        }
        self.unit.params = params;
        self
    }

    /// Subsequent instructions belong to `line`.
    pub fn line(&mut self, line: u32) -> &mut Self {
        self.current_line = line;
        self
    }

    /// Current end of the byte stream.
    pub fn offset(&self) -> u32 {
        self.unit.code.len() as u32
    }

    pub fn emit(&mut self, opcode: Opcode) -> &mut Self {
        debug_assert!(!opcode.has_argument(), "{} needs an operand", opcode);
        self.mark_line();
        self.unit.code.push(opcode.byte());
        self
    }

    pub fn emit_arg(&mut self, opcode: Opcode, arg: u32) -> &mut Self {
        debug_assert!(opcode.has_argument(), "{} takes no operand", opcode);
        self.mark_line();
        if arg > 0xFFFF {
            let high = (arg >> 16) as u16;
            self.push_with_operand(Opcode::ExtendedArg, high);
        }
        self.push_with_operand(opcode, (arg & 0xFFFF) as u16);
        self
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.labels[label.0] = Some(self.offset());
        self
    }

    /// Emit a jump whose target is resolved when the unit is finished.
    pub fn jump(&mut self, opcode: Opcode, label: Label) -> &mut Self {
        self.mark_line();
        let at = self.unit.code.len() + 1;
        self.push_with_operand(opcode, 0);
        self.fixups.push(Fixup {
            at,
            opcode,
            label,
            next_offset: self.offset(),
        });
        self
    }

    pub fn local(&mut self, name: &str) -> u32 {
        intern(&mut self.unit.varnames, name)
    }

    pub fn name(&mut self, name: &str) -> u32 {
        intern(&mut self.unit.names, name)
    }

    pub fn free(&mut self, name: &str) -> u32 {
        intern(&mut self.unit.freevars, name)
    }

    pub fn constant(&mut self, value: Constant) -> u32 {
        if let Some(pos) = self.unit.consts.iter().position(|c| *c == value) {
            return pos as u32;
        }
        self.unit.consts.push(value);
        (self.unit.consts.len() - 1) as u32
    }

    pub fn load_const(&mut self, value: Constant) -> &mut Self {
        let idx = self.constant(value);
        self.emit_arg(Opcode::LoadConst, idx)
    }

    pub fn load_none(&mut self) -> &mut Self {
        self.load_const(Constant::None)
    }

    pub fn load_int(&mut self, value: i64) -> &mut Self {
        self.load_const(Constant::Int(value))
    }

    pub fn load_str(&mut self, value: &str) -> &mut Self {
        self.load_const(Constant::Str(value.to_string()))
    }

    pub fn load_fast(&mut self, name: &str) -> &mut Self {
        let idx = self.local(name);
        self.emit_arg(Opcode::LoadFast, idx)
    }

    pub fn store_fast(&mut self, name: &str) -> &mut Self {
        let idx = self.local(name);
        self.emit_arg(Opcode::StoreFast, idx)
    }

    pub fn delete_fast(&mut self, name: &str) -> &mut Self {
        let idx = self.local(name);
        self.emit_arg(Opcode::DeleteFast, idx)
    }

    pub fn load_deref(&mut self, name: &str) -> &mut Self {
        let idx = self.free(name);
        self.emit_arg(Opcode::LoadDeref, idx)
    }

    /// Any opcode that indexes the name pool.
    pub fn named(&mut self, opcode: Opcode, name: &str) -> &mut Self {
        let idx = self.name(name);
        self.emit_arg(opcode, idx)
    }

    pub fn load_global(&mut self, name: &str) -> &mut Self {
        self.named(Opcode::LoadGlobal, name)
    }

    pub fn load_name(&mut self, name: &str) -> &mut Self {
        self.named(Opcode::LoadName, name)
    }

    pub fn store_name(&mut self, name: &str) -> &mut Self {
        self.named(Opcode::StoreName, name)
    }

    pub fn store_global(&mut self, name: &str) -> &mut Self {
        self.named(Opcode::StoreGlobal, name)
    }

    pub fn load_attr(&mut self, name: &str) -> &mut Self {
        self.named(Opcode::LoadAttr, name)
    }

    pub fn store_attr(&mut self, name: &str) -> &mut Self {
        self.named(Opcode::StoreAttr, name)
    }

    /// `import name` bound to the same name.
    pub fn import(&mut self, name: &str) -> &mut Self {
        self.load_int(-1).load_none();
        self.named(Opcode::ImportName, name);
        self.store_name(name)
    }

    pub fn compare(&mut self, op: CompareOp) -> &mut Self {
        self.emit_arg(Opcode::CompareOp, op.index())
    }

    /// `CALL_FUNCTION` with packed positional and keyword counts.
    pub fn call(&mut self, positional: u32, keywords: u32) -> &mut Self {
        self.emit_arg(Opcode::CallFunction, positional | (keywords << 8))
    }

    pub fn build_tuple(&mut self, count: u32) -> &mut Self {
        self.emit_arg(Opcode::BuildTuple, count)
    }

    pub fn build_list(&mut self, count: u32) -> &mut Self {
        self.emit_arg(Opcode::BuildList, count)
    }

    pub fn unpack(&mut self, count: u32) -> &mut Self {
        self.emit_arg(Opcode::UnpackSequence, count)
    }

    pub fn pop(&mut self) -> &mut Self {
        self.emit(Opcode::PopTop)
    }

    pub fn ret(&mut self) -> &mut Self {
        self.emit(Opcode::ReturnValue)
    }

    /// Implicit `return None` epilogue.
    pub fn ret_none(&mut self) -> &mut Self {
        self.load_none().ret()
    }

    pub fn raise(&mut self, count: u32) -> &mut Self {
        self.emit_arg(Opcode::RaiseVarargs, count)
    }

    /// Resolve labels and produce the unit.
    pub fn finish(mut self) -> Result<CodeUnit, AsmError> {
        for fixup in &self.fixups {
            let target = self.labels[fixup.label.0].ok_or(AsmError::UnboundLabel(fixup.label.0))?;
            let operand = match fixup.opcode.jump_kind() {
                JumpKind::None => return Err(AsmError::NotAJump(fixup.opcode)),
                JumpKind::Absolute => target,
                JumpKind::Relative => {
                    target.checked_sub(fixup.next_offset).ok_or(AsmError::BackwardRelativeJump {
                        opcode: fixup.opcode,
                        target,
                    })?
                }
            };
            let operand = u16::try_from(operand).map_err(|_| AsmError::JumpOutOfRange(operand))?;
            let [lo, hi] = operand.to_le_bytes();
            self.unit.code[fixup.at] = lo;
            self.unit.code[fixup.at + 1] = hi;
        }
        self.unit.line_table = encode_line_table(self.unit.first_line, &self.lines);
        Ok(self.unit)
    }

    fn push_with_operand(&mut self, opcode: Opcode, operand: u16) {
        let [lo, hi] = operand.to_le_bytes();
        self.unit.code.extend_from_slice(&[opcode.byte(), lo, hi]);
    }

    fn mark_line(&mut self) {
        let last = self.lines.last().map(|(_, l)| *l).unwrap_or(self.unit.first_line);
        if self.current_line != last {
            let offset = self.offset();
            self.lines.push((offset, self.current_line));
        }
    }
}

fn intern(pool: &mut Vec<String>, name: &str) -> u32 {
    if let Some(pos) = pool.iter().position(|n| n == name) {
        return pos as u32;
    }
    pool.push(name.to_string());
    (pool.len() - 1) as u32
}

/// Compress `(offset, line)` start points into a line table.
///
/// Lines must not decrease; entries that would move backwards are skipped.
pub fn encode_line_table(first_line: u32, starts: &[(u32, u32)]) -> Vec<u8> {
    let mut out = Vec::new();
    let (mut addr, mut line) = (0u32, first_line);
    for &(offset, new_line) in starts {
        if new_line < line || offset < addr {
            continue;
        }
        let mut byte_delta = offset - addr;
        let mut line_delta = new_line - line;
        while byte_delta > 255 {
            out.extend_from_slice(&[255, 0]);
            byte_delta -= 255;
        }
        while line_delta > 255 {
            out.extend_from_slice(&[byte_delta as u8, 255]);
            byte_delta = 0;
            line_delta -= 255;
        }
        if byte_delta > 0 || line_delta > 0 {
            out.extend_from_slice(&[byte_delta as u8, line_delta as u8]);
        }
        addr = offset;
        line = new_line;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::decode::{decode_all, LineTable, Operand};

    #[test]
    fn assembles_pools_and_lines() {
        let mut asm = Assembler::new("f", UnitKind::Function);
        asm.first_line(10).params(Params::positional(&["a"]));
        asm.line(11).load_fast("a").load_int(2).emit(Opcode::BinaryMultiply);
        asm.line(12).ret();
        let unit = asm.finish().unwrap();

        assert_eq!(unit.varnames, vec!["a"]);
        let ins = decode_all(&unit).unwrap();
        assert_eq!(ins.len(), 4);
        assert_eq!(ins[0].operand, Some(Operand::Local("a")));
        assert_eq!(ins[0].line, 11);
        assert_eq!(ins[2].line, 11);
        assert_eq!(ins[3].line, 12);
    }

    #[test]
    fn labels_resolve_relative_and_absolute() {
        let mut asm = Assembler::new("f", UnitKind::Function);
        let end = asm.label();
        let top = asm.label();
        asm.bind(top);
        asm.load_fast("x").jump(Opcode::PopJumpIfFalse, end);
        asm.jump(Opcode::JumpForward, end);
        asm.jump(Opcode::JumpAbsolute, top);
        asm.bind(end).ret_none();
        let unit = asm.finish().unwrap();
        let ins = decode_all(&unit).unwrap();
        assert_eq!(ins[1].jump_target, Some(12));
        assert_eq!(ins[2].jump_target, Some(12));
        assert_eq!(ins[3].jump_target, Some(0));
    }

    #[test]
    fn unbound_label_fails() {
        let mut asm = Assembler::new("f", UnitKind::Function);
        let nowhere = asm.label();
        asm.jump(Opcode::JumpAbsolute, nowhere);
        assert_eq!(asm.finish(), Err(AsmError::UnboundLabel(0)));
    }

    #[test]
    fn long_line_gaps_round_trip() {
        let table = encode_line_table(1, &[(300, 2), (303, 700)]);
        let lines = LineTable::new(1, &table);
        assert_eq!(lines.line_for(0), 1);
        assert_eq!(lines.line_for(299), 1);
        assert_eq!(lines.line_for(300), 2);
        assert_eq!(lines.line_for(303), 700);
    }
}
