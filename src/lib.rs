//! Bytelint - static defect detection for compiled stack bytecode.
//!
//! Bytelint decodes the compiled instruction stream of every function,
//! method, class body and module body of a program and walks it with an
//! abstract interpreter. The walk tracks approximate types, constants and
//! attribute chains on a symbolic operand stack and reports likely bugs
//! without running any of the program's logic.
//!
//! # Architecture
//!
//! - `bytecode`: opcodes, code units, the decoder and an assembler
//! - `symbols`: the program symbol table and built-in signatures
//! - `detect`: the abstract interpreter and the checks it drives
//! - `config`: option snapshots shared by YAML, the CLI and directives
//! - `report`: output formatting (pretty, JSON)

pub mod bytecode;
pub mod cli;
pub mod config;
pub mod detect;
pub mod report;
pub mod symbols;

pub use bytecode::{Assembler, CodeUnit, Opcode};
pub use config::Config;
pub use detect::{CheckResult, Diagnostic, DiagnosticKind, Runner};
pub use symbols::ProgramSymbolTable;
