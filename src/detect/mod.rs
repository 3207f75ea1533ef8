//! Abstract interpretation of bytecode units and the checks run on them.

mod calls;
mod dispatch;
mod format;
mod runner;
mod stack;
mod state;
mod suppress;
mod trackers;
mod types;

pub use calls::{check_arg_count, expected_text, CallSite, Target};
pub use dispatch::{CheckError, UnitOutcome, Walker};
pub use format::{check_format, parse_format, FormatError, FormatSpec};
pub use runner::Runner;
pub use stack::{Kind, OperandStack, StackItem};
pub use state::{AssignedMembers, Scope, UnitState};
pub use suppress::{parse_directive, DIRECTIVE_NAME};
pub use trackers::branch_count;
pub use types::{CheckResult, Diagnostic, DiagnosticKind, Finding, Severity};
