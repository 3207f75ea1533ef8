//! Compiled stack bytecode: opcodes, code units, decoding and assembly.

pub mod asm;
pub mod code;
pub mod decode;
pub mod disasm;
pub mod opcode;

pub use asm::{AsmError, Assembler, Label};
pub use code::{CodeUnit, Constant, Params, UnitKind};
pub use decode::{decode_all, DecodeError, Decoder, Instruction, LineTable, Operand};
pub use disasm::disassemble;
pub use opcode::{CompareOp, JumpKind, Opcode, OperandPool, HAVE_ARGUMENT};
