//! Human-readable listings of code units.

use std::collections::BTreeSet;
use std::fmt::Write;

use super::code::CodeUnit;
use super::decode::{decode_all, DecodeError, Instruction, Operand};

/// Render `unit` and every nested code constant, outermost first.
pub fn disassemble(unit: &CodeUnit) -> Result<String, DecodeError> {
    let mut out = String::new();
    disassemble_into(unit, &mut out)?;
    Ok(out)
}

fn disassemble_into(unit: &CodeUnit, out: &mut String) -> Result<(), DecodeError> {
    let instructions = decode_all(unit)?;
    let targets: BTreeSet<u32> = instructions.iter().filter_map(|i| i.jump_target).collect();

    let _ = writeln!(out, "Disassembly of {} ({:?}, line {}):", unit.name, unit.kind, unit.first_line);
    let mut last_line = None;
    for ins in &instructions {
        let line = if last_line != Some(ins.line) {
            last_line = Some(ins.line);
            format!("{:>4}", ins.line)
        } else {
            "    ".to_string()
        };
        let marker = if targets.contains(&ins.offset) { ">>" } else { "  " };
        let _ = writeln!(out, "{} {} {:>5} {}", line, marker, ins.offset, format_instruction(ins));
    }
    out.push('\n');

    for nested in unit.nested_units() {
        disassemble_into(nested, out)?;
    }
    Ok(())
}

/// `OPNAME  arg (resolved)` for one instruction.
pub fn format_instruction(ins: &Instruction<'_>) -> String {
    let name = ins.opcode.to_string();
    if !ins.opcode.has_argument() {
        return name;
    }
    let detail = match (ins.operand, ins.jump_target) {
        (_, Some(target)) => format!("(to {})", target),
        (Some(Operand::Const(c)), _) => format!("({})", c),
        (Some(Operand::Compare(op)), _) => format!("({})", op),
        (Some(op), _) => match op.name() {
            Some(n) => format!("({})", n),
            None => String::new(),
        },
        (None, None) => String::new(),
    };
    format!("{:<20} {:>5} {}", name, ins.arg, detail).trim_end().to_string()
}
