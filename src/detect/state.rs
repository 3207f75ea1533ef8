//! Per-unit interpreter state and the scope a unit is walked in.

use std::collections::{BTreeMap, BTreeSet};

use crate::bytecode::{CodeUnit, Opcode};
use crate::symbols::{Class, Function, FunctionKind, Module, ProgramSymbolTable, ValueType};

use super::stack::{OperandStack, StackItem};
use super::types::{Diagnostic, Finding};

/// Instance attributes assigned through the receiver, by attribute name,
/// with the methods that assign them.
pub type AssignedMembers = BTreeMap<String, BTreeSet<String>>;

/// Everything a walk may consult besides the unit itself.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub table: &'a ProgramSymbolTable,
    pub module: &'a Module,
    /// Names bound at module level by the module body, with their lines.
    pub module_names: &'a BTreeMap<String, u32>,
    pub class: Option<&'a Class>,
    pub assigned_members: Option<&'a AssignedMembers>,
    /// Table entry of the function being walked, if it has one.
    pub function: Option<&'a Function>,
}

impl<'a> Scope<'a> {
    pub fn module_only(table: &'a ProgramSymbolTable, module: &'a Module, module_names: &'a BTreeMap<String, u32>) -> Self {
        Self {
            table,
            module,
            module_names,
            class: None,
            assigned_members: None,
            function: None,
        }
    }

    pub fn file(&self) -> &'a str {
        self.module.display_file()
    }

    /// Whether `name` is bound at module level.
    pub fn is_module_name(&self, name: &str) -> bool {
        self.module_names.contains_key(name) || self.module.has_attribute(name)
    }

    /// Line where a module-level name is bound, when known.
    pub fn module_name_line(&self, name: &str) -> Option<u32> {
        if let Some(line) = self.module_names.get(name) {
            return Some(*line);
        }
        let module = self.module;
        module
            .variables
            .get(name)
            .map(|v| v.line)
            .or_else(|| module.functions.get(name).map(|f| f.line))
            .or_else(|| module.classes.get(name).map(|c| c.line))
    }

    /// Name of the receiver parameter for instance and class methods.
    pub fn receiver<'u>(&self, unit: &'u CodeUnit) -> Option<&'u str> {
        self.class?;
        match self.function.map(|f| f.kind) {
            Some(FunctionKind::StaticMethod) => None,
            _ => unit.params.first(),
        }
    }

    pub fn is_class_method(&self) -> bool {
        matches!(self.function.map(|f| f.kind), Some(FunctionKind::ClassMethod))
    }

    pub fn is_assigned_member(&self, attr: &str) -> bool {
        self.assigned_members.map_or(false, |m| m.contains_key(attr))
    }
}

/// Liveness of one local variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalUse {
    /// Written on this line and not read since. Negative lines mark
    /// targets of a tuple unpack.
    Written(i64),
    Used,
}

/// Best-known type of a local across all its stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalType {
    Known(ValueType),
    Mixed,
}

/// Instructions of the unit's first source line.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstStatement {
    pub line: Option<u32>,
    pub loads_local: bool,
}

/// One recorded `return`.
#[derive(Debug, Clone)]
pub struct ReturnSample {
    pub line: u32,
    pub value: Option<StackItem>,
    /// Recorded branch targets at the time of the return.
    pub branches: usize,
}

/// Interpreter state for one unit walk.
#[derive(Debug, Default)]
pub struct UnitState<'a> {
    pub stack: OperandStack,
    pub locals: BTreeMap<String, LocalUse>,
    pub local_types: BTreeMap<String, LocalType>,
    pub deleted: BTreeMap<String, u32>,
    /// Jump target offset to number of recorded incoming jumps.
    pub branches: BTreeMap<u32, u32>,
    /// Offsets where exception handlers start.
    pub handlers: BTreeSet<u32>,
    pub loops: usize,
    /// Remaining targets of the tuple unpack in progress.
    pub unpack: usize,
    pub diagnostics: Vec<Diagnostic>,
    /// Dotted names of everything called.
    pub functions_called: BTreeSet<String>,
    /// Global and module-level names read.
    pub globals_referenced: BTreeSet<String>,
    /// Names declared `global` by stores in this unit.
    pub declared_globals: BTreeSet<String>,
    /// Names bound by this unit when it is a module or class body.
    pub top_level_names: BTreeMap<String, u32>,
    /// Imports bound by a module body: name, line, imported module.
    pub imports: Vec<(String, u32, String)>,
    /// Plain variables bound by a module body.
    pub top_level_writes: Vec<(String, u32)>,
    /// Code constants that are walked as their own units.
    pub nested: Vec<&'a CodeUnit>,
    /// Code constant names seen, with the line they were loaded on.
    pub code_objects: BTreeMap<String, u32>,
    pub returns: Vec<ReturnSample>,
    /// Lines of every `raise`.
    pub raises: Vec<u32>,
    pub is_generator: bool,
    pub first_statement: FirstStatement,
    pub last_line: u32,
    /// Opcodes walked so far, most recent last.
    pub history: Vec<Opcode>,
    pub unreachable_reported: bool,
}

impl<'a> UnitState<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, finding: Finding, unit: &str, file: &str, line: u32) {
        self.diagnostics.push(Diagnostic::from_finding(finding, unit, file, line));
    }

    pub fn add_branch(&mut self, target: u32) {
        *self.branches.entry(target).or_insert(0) += 1;
    }

    pub fn is_branch_target(&self, offset: u32) -> bool {
        self.branches.contains_key(&offset)
    }

    /// Bodies whose first statement raises or returns without touching a local.
    pub fn is_stub(&self) -> bool {
        let Some(line) = self.first_statement.line else { return false };
        if self.first_statement.loads_local {
            return false;
        }
        self.raises.first() == Some(&line) || self.returns.first().map(|r| r.line) == Some(line)
    }

    /// Opcode `back` steps behind the most recently walked one (0 is the most recent).
    pub fn previous(&self, back: usize) -> Option<Opcode> {
        self.history.len().checked_sub(back + 1).map(|i| self.history[i])
    }

    /// Record a store's type for later loads.
    pub fn note_local_type(&mut self, name: &str, value_type: Option<ValueType>) {
        let next = match (self.local_types.get(name), value_type) {
            (_, None) => LocalType::Mixed,
            (None, Some(t)) => LocalType::Known(t),
            (Some(LocalType::Known(old)), Some(t)) if *old == t => LocalType::Known(t),
            _ => LocalType::Mixed,
        };
        self.local_types.insert(name.to_string(), next);
    }

    pub fn local_type(&self, name: &str) -> Option<ValueType> {
        match self.local_types.get(name) {
            Some(LocalType::Known(t)) => Some(*t),
            _ => None,
        }
    }
}
