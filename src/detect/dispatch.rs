//! The abstract stack machine.
//!
//! A [`Walker`] moves a cursor linearly over one code unit, dispatching
//! every decoded instruction to a handler that updates the symbolic operand
//! stack and the per-unit state. Jumps are never followed; their targets
//! only feed branch counting and the reachability heuristics.

use std::borrow::Cow;

use thiserror::Error;
use tracing::{debug, trace};

use crate::bytecode::{CodeUnit, Constant, DecodeError, Decoder, Instruction, Opcode as Op, Operand, UnitKind};
use crate::config::Config;
use crate::symbols::{builtins, ValueType};

use super::calls::{self, CallSite, Resolver, Target};
use super::format;
use super::stack::{Kind, StackItem};
use super::state::{LocalUse, Scope, UnitState};
use super::suppress;
use super::trackers;
use super::types::{DiagnosticKind, Finding};

/// A unit could not be walked to the end.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("{unit}: {source}")]
    Decode {
        unit: String,
        #[source]
        source: DecodeError,
    },
}

/// What a finished walk leaves behind.
#[derive(Debug)]
pub struct UnitOutcome<'a> {
    pub state: UnitState<'a>,
    /// Config installed by a directive in this unit, if any.
    pub config: Option<Config>,
}

/// Walks one code unit.
pub struct Walker<'a> {
    unit: &'a CodeUnit,
    scope: Scope<'a>,
    config: Cow<'a, Config>,
    decoder: Decoder<'a>,
    state: UnitState<'a>,
    receiver: Option<&'a str>,
    qualified: String,
    last_import: Option<String>,
}

impl<'a> Walker<'a> {
    pub fn new(unit: &'a CodeUnit, scope: Scope<'a>, config: &'a Config, qualified: impl Into<String>) -> Self {
        Self {
            unit,
            scope,
            config: Cow::Borrowed(config),
            decoder: Decoder::new(unit),
            state: UnitState::new(),
            receiver: scope.receiver(unit),
            qualified: qualified.into(),
            last_import: None,
        }
    }

    /// Walk the whole unit and run the end-of-unit checks.
    pub fn walk(mut self) -> Result<UnitOutcome<'a>, CheckError> {
        debug!(unit = %self.qualified, bytes = self.unit.code.len(), "walking unit");

        for name in &self.unit.params.names {
            self.state
                .locals
                .insert(name.clone(), LocalUse::Written(i64::from(self.unit.first_line)));
        }
        self.state.last_line = self.unit.first_line;

        let mut count = 0usize;
        while let Some(ins) = self.decoder.next_instruction().map_err(|e| self.decode_error(e))? {
            trace!(
                offset = ins.offset,
                opcode = %ins.opcode,
                depth = self.state.stack.len(),
                "dispatch"
            );
            self.before(&ins)?;
            self.dispatch(&ins)?;
            self.state.history.push(ins.opcode);
            count += 1;
        }

        trackers::finalize(self.unit, &self.scope, &self.config, &mut self.state, &self.qualified);
        debug!(
            unit = %self.qualified,
            instructions = count,
            diagnostics = self.state.diagnostics.len(),
            "unit walked"
        );

        let config = match self.config {
            Cow::Owned(config) => Some(config),
            Cow::Borrowed(_) => None,
        };
        Ok(UnitOutcome {
            state: self.state,
            config,
        })
    }

    fn decode_error(&self, source: DecodeError) -> CheckError {
        CheckError::Decode {
            unit: self.qualified.clone(),
            source,
        }
    }

    fn report(&mut self, finding: Finding, line: u32) {
        let file = self.scope.file();
        self.state.report(finding, &self.qualified, file, line);
    }

    fn pop(&mut self) -> StackItem {
        self.state.stack.pop().unwrap_or_else(StackItem::unknown)
    }

    fn push(&mut self, item: StackItem) {
        self.state.stack.push(item);
    }

    fn resolve(&self, item: &StackItem) -> Target<'a> {
        Resolver::new(&self.scope, self.receiver).resolve(item, &self.state)
    }

    fn next_opcode(&self) -> Result<Option<Op>, CheckError> {
        let next = self.decoder.peek().map_err(|e| self.decode_error(e))?;
        Ok(next.map(|i| i.opcode))
    }

    /// Bookkeeping done before an instruction's handler runs.
    fn before(&mut self, ins: &Instruction<'a>) -> Result<(), CheckError> {
        self.state.last_line = self.state.last_line.max(ins.line);

        let first = &mut self.state.first_statement;
        if first.line.is_none() {
            first.line = Some(ins.line);
        }
        if first.line == Some(ins.line) {
            first.loads_local |= ins.opcode == Op::LoadFast;
        }

        if self.config.unreachable && !self.state.unreachable_reported && self.is_unreachable(ins)? {
            self.state.unreachable_reported = true;
            self.report(Finding::new(DiagnosticKind::Unreachable, Vec::<String>::new()), ins.line);
        }

        // exception handlers start with the exception triple on the stack
        if self.state.handlers.contains(&ins.offset) {
            for _ in 0..3 {
                self.push(StackItem::exception());
            }
        }
        Ok(())
    }

    fn is_unreachable(&self, ins: &Instruction<'a>) -> Result<bool, CheckError> {
        if !self.state.previous(0).map_or(false, Op::ends_flow) {
            return Ok(false);
        }
        if self.state.is_branch_target(ins.offset) || self.state.handlers.contains(&ins.offset) {
            return Ok(false);
        }
        if matches!(
            ins.opcode,
            Op::JumpForward | Op::JumpAbsolute | Op::ContinueLoop | Op::PopBlock | Op::Nop | Op::EndFinally
        ) {
            return Ok(false);
        }
        Ok(!self.is_epilogue(ins)?)
    }

    /// The compiler's trailing `return None`.
    fn is_epilogue(&self, ins: &Instruction<'a>) -> Result<bool, CheckError> {
        if ins.opcode != Op::LoadConst || !ins.constant().map_or(false, Constant::is_none) {
            return Ok(false);
        }
        let next = self.decoder.peek().map_err(|e| self.decode_error(e))?;
        Ok(next.map_or(false, |n| {
            n.opcode == Op::ReturnValue && n.next_offset as usize >= self.unit.code.len()
        }))
    }

    fn dispatch(&mut self, ins: &Instruction<'a>) -> Result<(), CheckError> {
        let line = ins.line;
        match ins.opcode {
            Op::PopTop => {
                let item = self.pop();
                if item.kind == Kind::Comparison && self.config.no_effect {
                    self.report(Finding::new(DiagnosticKind::NoEffect, Vec::<String>::new()), line);
                }
            }
            Op::RotTwo => self.state.stack.rotate(1),
            Op::RotThree => self.state.stack.rotate(2),
            Op::RotFour => self.state.stack.rotate(3),
            Op::DupTop => self.state.stack.dup(1),
            Op::DupTopx => self.state.stack.dup(ins.arg as usize),

            Op::UnaryPositive | Op::UnaryNegative => self.unary_sign(ins)?,
            Op::UnaryNot => {
                self.pop();
                self.push(StackItem::typed(Some(ValueType::Bool)));
            }
            Op::UnaryConvert => {
                self.pop();
                self.push(StackItem::typed(Some(ValueType::Str)));
            }
            Op::UnaryInvert => {
                let item = self.pop();
                self.push(StackItem::typed(item.value_type));
            }

            Op::BinaryPower
            | Op::BinaryMultiply
            | Op::BinaryDivide
            | Op::BinaryModulo
            | Op::BinaryAdd
            | Op::BinarySubtract
            | Op::BinaryFloorDivide
            | Op::BinaryTrueDivide
            | Op::BinaryLshift
            | Op::BinaryRshift
            | Op::BinaryAnd
            | Op::BinaryXor
            | Op::BinaryOr
            | Op::InplaceFloorDivide
            | Op::InplaceTrueDivide
            | Op::InplaceAdd
            | Op::InplaceSubtract
            | Op::InplaceMultiply
            | Op::InplaceDivide
            | Op::InplaceModulo
            | Op::InplacePower
            | Op::InplaceLshift
            | Op::InplaceRshift
            | Op::InplaceAnd
            | Op::InplaceXor
            | Op::InplaceOr => self.binary(ins),

            Op::BinarySubscr => {
                self.pop();
                let container = self.pop();
                let value_type = container.value_type.filter(ValueType::is_string);
                self.push(StackItem::typed(value_type));
            }
            Op::StoreSubscr => {
                self.consume_unpack_slot();
                self.state.stack.discard(3);
            }
            Op::DeleteSubscr => self.state.stack.discard(2),

            Op::Slice0 => self.slice(0),
            Op::Slice1 | Op::Slice2 => self.slice(1),
            Op::Slice3 => self.slice(2),
            Op::StoreSlice0 | Op::StoreSlice1 | Op::StoreSlice2 | Op::StoreSlice3 => {
                self.consume_unpack_slot();
                let bounds = match ins.opcode {
                    Op::StoreSlice0 => 0,
                    Op::StoreSlice3 => 2,
                    _ => 1,
                };
                self.state.stack.discard(2 + bounds);
            }
            Op::DeleteSlice0 => self.state.stack.discard(1),
            Op::DeleteSlice1 | Op::DeleteSlice2 => self.state.stack.discard(2),
            Op::DeleteSlice3 => self.state.stack.discard(3),
            Op::BuildSlice => {
                self.state.stack.discard(ins.arg as usize);
                self.push(StackItem::typed(Some(ValueType::Slice)));
            }

            Op::GetIter => {
                self.pop();
                self.push(StackItem::unknown());
            }
            Op::ForIter => {
                self.add_jump(ins);
                self.push(StackItem::unknown());
            }
            Op::PrintExpr | Op::PrintItem | Op::PrintNewlineTo | Op::ImportStar => {
                self.state.stack.discard(1);
            }
            Op::PrintItemTo => self.state.stack.discard(2),
            Op::ListAppend | Op::SetAdd => self.state.stack.discard(1),
            Op::MapAdd | Op::StoreMap => self.state.stack.discard(2),
            Op::ExecStmt => self.state.stack.discard(3),
            Op::WithCleanup => {
                // drop `__exit__`, leaving the marker above it for END_FINALLY
                let marker = self.pop();
                self.pop();
                self.push(marker);
            }
            Op::LoadLocals => self.push(StackItem::typed(Some(ValueType::Dict))),
            Op::EndFinally => {
                let pending = self
                    .state
                    .stack
                    .top()
                    .map_or(false, |t| t.kind == Kind::ExceptionMarker || t.is_none_literal());
                if pending {
                    self.pop();
                }
            }

            Op::ReturnValue => self.return_value(line),
            Op::YieldValue => {
                self.state.is_generator = true;
                self.pop();
                self.push(StackItem::unknown());
            }
            Op::RaiseVarargs => {
                self.state.stack.discard(ins.arg as usize);
                self.state.raises.push(line);
            }

            Op::BuildClass => {
                self.state.stack.discard(3);
                self.push(StackItem::typed(Some(ValueType::Class)));
            }
            Op::MakeFunction => {
                self.state.stack.discard(1 + ins.arg as usize);
                self.push(StackItem::typed(Some(ValueType::Function)));
            }
            Op::MakeClosure => {
                self.state.stack.discard(2 + ins.arg as usize);
                self.push(StackItem::typed(Some(ValueType::Function)));
            }

            Op::LoadConst => self.load_const(ins),
            Op::LoadFast => self.load_fast(ins),
            Op::StoreFast => self.store_fast(ins),
            Op::DeleteFast => self.delete_fast(ins),
            Op::LoadGlobal | Op::LoadName => self.load_global(ins),
            Op::StoreName => self.store_name(ins),
            Op::StoreGlobal => self.store_global(ins),
            Op::DeleteName | Op::DeleteGlobal => {
                if let Some(name) = ins.name() {
                    self.state.globals_referenced.insert(name.to_string());
                }
            }
            Op::LoadClosure => {
                if let Some(name) = ins.name() {
                    self.mark_used(name);
                }
                self.push(StackItem::unknown());
            }
            Op::LoadDeref => {
                let name = ins.name().unwrap_or("?");
                self.mark_used(name);
                self.push(StackItem::local(name, None));
            }
            Op::StoreDeref => {
                self.consume_unpack_slot();
                self.state.stack.discard(1);
            }

            Op::LoadAttr => self.load_attr(ins),
            Op::StoreAttr => self.store_attr(ins),
            Op::DeleteAttr => self.state.stack.discard(1),

            Op::CompareOp => {
                let right = self.pop();
                let left = self.pop();
                match ins.operand {
                    Some(Operand::Compare(op)) => self.push(StackItem::comparison(left, op, right)),
                    _ => self.push(StackItem::typed(Some(ValueType::Bool))),
                }
            }

            Op::ImportName => {
                self.state.stack.discard(2);
                let module = ins.name().unwrap_or("?");
                self.last_import = Some(module.to_string());
                self.push(StackItem::global(module, Some(ValueType::Module)));
            }
            Op::ImportFrom => {
                let name = ins.name().unwrap_or("?");
                self.push(StackItem::global(name, None));
            }

            Op::UnpackSequence => self.unpack(ins),
            Op::BuildTuple => self.build(ins, ValueType::Tuple),
            Op::BuildList => self.build(ins, ValueType::List),
            Op::BuildSet => self.build(ins, ValueType::Set),
            Op::BuildMap => self.push(StackItem::aggregate(ValueType::Dict, ins.arg, None)),

            Op::JumpForward => self.jump_forward(ins),
            Op::JumpIfFalseOrPop | Op::JumpIfTrueOrPop | Op::PopJumpIfFalse | Op::PopJumpIfTrue => {
                let top = self.pop();
                self.check_condition(&top, line);
                self.add_jump(ins);
            }
            Op::JumpAbsolute | Op::ContinueLoop | Op::SetupFinally => self.add_jump(ins),
            Op::SetupLoop => {
                self.state.loops += 1;
                self.add_jump(ins);
            }
            Op::SetupExcept => {
                if let Some(target) = ins.jump_target {
                    self.state.handlers.insert(target);
                }
                self.add_jump(ins);
            }
            Op::SetupWith => {
                self.pop();
                self.push(StackItem::unknown());
                self.push(StackItem::unknown());
                self.add_jump(ins);
            }

            Op::CallFunction | Op::CallFunctionVar | Op::CallFunctionKw | Op::CallFunctionVarKw => {
                self.call(ins)?
            }

            Op::StopCode | Op::Nop | Op::PrintNewline | Op::BreakLoop | Op::PopBlock | Op::ExtendedArg => {}
        }
        Ok(())
    }

    fn add_jump(&mut self, ins: &Instruction<'a>) {
        if let Some(target) = ins.jump_target {
            self.state.add_branch(target);
        }
    }

    /// Count one store against the tuple unpack in progress. True when the
    /// store was an unpack target.
    fn consume_unpack_slot(&mut self) -> bool {
        if self.state.unpack == 0 {
            return false;
        }
        self.state.unpack -= 1;
        true
    }

    fn mark_used(&mut self, name: &str) {
        if let Some(entry) = self.state.locals.get_mut(name) {
            *entry = LocalUse::Used;
        }
    }

    fn jump_forward(&mut self, ins: &Instruction<'a>) {
        let Some(target) = ins.jump_target else { return };
        let after_exit = match self.state.previous(0) {
            Some(op) if op.ends_flow() => true,
            Some(Op::PopBlock) => self.state.previous(1).map_or(false, Op::ends_flow),
            _ => false,
        };
        let skips_finally = target > 0 && self.decoder.opcode_at(target as usize - 1) == Some(Op::EndFinally);
        if after_exit || skips_finally {
            trace!(offset = ins.offset, target, "dropping jump edge");
            return;
        }
        self.state.add_branch(target);
    }

    fn check_condition(&mut self, item: &StackItem, line: u32) {
        if let (Some((Kind::LocalRef, names)), Some(receiver)) = (item.chain(), self.receiver) {
            if names.len() == 2 && names[0] == receiver {
                if let Target::Method { .. } = self.resolve(item) {
                    let finding = Finding::new(DiagnosticKind::MethodAsAttribute, [names[1].as_str()]);
                    self.report(finding, line);
                }
            }
        }

        if !self.config.const_cond || item.kind != Kind::Constant || !item.is_constant {
            return;
        }
        if let Some(literal) = item.literal() {
            let is_one = matches!(literal, Constant::Int(1) | Constant::Bool(true));
            if is_one && !self.config.constant1 {
                return;
            }
            self.report(Finding::new(DiagnosticKind::ConstantCondition, [literal.to_string()]), line);
        }
    }

    fn unary_sign(&mut self, ins: &Instruction<'a>) -> Result<(), CheckError> {
        let doubled = self.next_opcode()? == Some(ins.opcode);
        let item = self.pop();

        if doubled {
            self.decoder.next_instruction().map_err(|e| self.decode_error(e))?;
            if self.config.no_effect {
                let symbol = if ins.opcode == Op::UnaryPositive { "++" } else { "--" };
                self.report(Finding::new(DiagnosticKind::DoubledOperator, [symbol]), ins.line);
            }
            self.push(item);
            return Ok(());
        }

        if ins.opcode == Op::UnaryPositive {
            if !item.is_constant && self.config.unary_plus {
                self.report(Finding::new(DiagnosticKind::UnaryPlus, Vec::<String>::new()), ins.line);
            }
            self.push(item);
            return Ok(());
        }

        let negated = match item.literal() {
            Some(Constant::Int(i)) => i.checked_neg().map(Constant::Int),
            Some(Constant::Float(f)) => Some(Constant::Float(-f)),
            _ => None,
        };
        match negated {
            Some(value) => self.push(StackItem::constant(value)),
            None => self.push(StackItem::typed(item.value_type.filter(ValueType::is_numeric))),
        }
        Ok(())
    }

    fn binary(&mut self, ins: &Instruction<'a>) {
        let right = self.pop();
        let left = self.pop();

        if matches!(ins.opcode, Op::BinaryModulo | Op::InplaceModulo) && left.kind == Kind::Constant {
            if let Some(template) = left.str_literal() {
                if self.config.formats {
                    if let Some(finding) = format::check_format(template, &right) {
                        self.report(finding, ins.line);
                    }
                }
                self.push(StackItem::typed(left.value_type));
                return;
            }
        }

        if let (Some(a), Some(b)) = (left.literal(), right.literal()) {
            if let Some(value) = fold(ins.opcode, a, b) {
                self.push(StackItem::constant(value));
                return;
            }
        }
        self.push(StackItem::typed(result_type(ins.opcode, left.value_type, right.value_type)));
    }

    fn slice(&mut self, bounds: usize) {
        self.state.stack.discard(bounds);
        let container = self.pop();
        self.push(StackItem::typed(container.value_type.filter(|t| t.is_sequence())));
    }

    fn return_value(&mut self, line: u32) {
        let value = self.pop();
        let branches = self.state.branches.len();
        let collapse = self
            .state
            .returns
            .last()
            .map_or(false, |last| last.line == line && last.branches == branches);
        if collapse {
            trace!(line, "collapsing return on the same line");
            return;
        }
        self.state.returns.push(super::state::ReturnSample {
            line,
            value: Some(value),
            branches,
        });
    }

    fn load_const(&mut self, ins: &Instruction<'a>) {
        let Some(constant) = ins.constant() else {
            self.push(StackItem::unknown());
            return;
        };
        if let Constant::Code(code) = constant {
            self.code_constant(code, ins.line);
        }
        self.push(StackItem::constant(constant.clone()));
    }

    fn code_constant(&mut self, code: &'a CodeUnit, line: u32) {
        let lambda = code.is_lambda();
        if !lambda {
            let decorated = self.state.previous(0) == Some(Op::LoadAttr);
            match self.state.code_objects.get(&code.name).copied() {
                Some(first) if self.config.redefined && !decorated => {
                    let finding = Finding::new(DiagnosticKind::Redefined, [code.name.clone(), first.to_string()]);
                    self.report(finding, line);
                }
                Some(_) => {}
                None => {
                    self.state.code_objects.insert(code.name.clone(), line);
                }
            }
        }

        let walked_elsewhere = match self.unit.kind {
            UnitKind::Module => {
                self.scope.module.functions.contains_key(&code.name) || self.scope.module.classes.contains_key(&code.name)
            }
            UnitKind::Class => self.scope.class.map_or(false, |c| c.methods.contains_key(&code.name)),
            _ => false,
        };
        let seen = self.state.nested.iter().any(|n| std::ptr::eq(*n, code));
        if (lambda || !walked_elsewhere) && !seen {
            self.state.nested.push(code);
        }
    }

    fn load_fast(&mut self, ins: &Instruction<'a>) {
        let name = ins.name().unwrap_or("?");
        self.check_local_read(name, ins.line);
        self.state.locals.insert(name.to_string(), LocalUse::Used);
        let value_type = self.state.local_type(name);
        self.push(StackItem::local(name, value_type));
    }

    fn check_local_read(&mut self, name: &str, line: u32) {
        if self.state.deleted.contains_key(name) {
            self.report(Finding::new(DiagnosticKind::UsedAfterDelete, [name]), line);
        } else if !self.state.locals.contains_key(name) && !self.unit.params.contains(name) {
            self.report(Finding::new(DiagnosticKind::UsedBeforeSet, [name]), line);
        }
    }

    fn store_fast(&mut self, ins: &Instruction<'a>) {
        let name = ins.name().unwrap_or("?");
        let line = ins.line;
        let value = self.pop();
        let unpacked = self.consume_unpack_slot();

        if suppress::is_directive(name) {
            self.apply_directive(&value, line);
            return;
        }

        let first_store = !self.state.locals.contains_key(name);
        if first_store && !self.unit.params.contains(name) {
            if self.config.shadows {
                if let Some(defined) = self.scope.module_name_line(name) {
                    let finding = Finding::new(DiagnosticKind::ShadowsGlobal, [name.to_string(), defined.to_string()]);
                    self.report(finding, line);
                }
            }
            if self.config.shadow_builtins && builtins::is_builtin(name) {
                self.report(Finding::new(DiagnosticKind::ShadowsBuiltin, [name]), line);
            }
        }

        let mut marker = i64::from(line);
        if unpacked && !self.config.unused_tuple {
            marker = -marker;
        }
        self.state.deleted.remove(name);
        if first_store {
            self.state.locals.insert(name.to_string(), LocalUse::Written(marker));
        }
        self.state.note_local_type(name, value.value_type);
    }

    fn delete_fast(&mut self, ins: &Instruction<'a>) {
        let name = ins.name().unwrap_or("?");
        self.check_local_read(name, ins.line);
        self.state.locals.insert(name.to_string(), LocalUse::Used);
        self.state.deleted.insert(name.to_string(), ins.line);
    }

    fn load_global(&mut self, ins: &Instruction<'a>) {
        let name = ins.name().unwrap_or("?");
        self.state.globals_referenced.insert(name.to_string());

        let known = self.state.top_level_names.contains_key(name)
            || self.scope.is_module_name(name)
            || self.state.declared_globals.contains(name)
            || builtins::is_builtin(name)
            || builtins::is_standard_exception(name);
        if !known {
            self.report(Finding::new(DiagnosticKind::NoGlobal, [name]), ins.line);
        }

        let value_type = match ins.opcode {
            Op::LoadName => self.state.local_type(name),
            _ => None,
        }
        .or_else(|| self.scope.module.variables.get(name).and_then(|v| v.value_type));
        self.push(StackItem::global(name, value_type));
    }

    fn store_name(&mut self, ins: &Instruction<'a>) {
        let name = ins.name().unwrap_or("?");
        let line = ins.line;
        let value = self.pop();
        self.consume_unpack_slot();

        if suppress::is_directive(name) {
            self.apply_directive(&value, line);
            return;
        }

        let first_store = !self.state.top_level_names.contains_key(name);
        self.state.top_level_names.entry(name.to_string()).or_insert(line);
        self.state.note_local_type(name, value.value_type);

        if self.unit.kind != UnitKind::Module {
            return;
        }
        match self.state.previous(0) {
            Some(Op::ImportName) | Some(Op::ImportFrom) => {
                let module = self.last_import.clone().unwrap_or_else(|| name.to_string());
                self.state.imports.push((name.to_string(), line, module));
            }
            Some(Op::MakeFunction) | Some(Op::MakeClosure) | Some(Op::BuildClass) => {}
            _ => self.state.top_level_writes.push((name.to_string(), line)),
        }
        if first_store && self.config.shadow_builtins && builtins::is_builtin(name) {
            self.report(Finding::new(DiagnosticKind::ShadowsBuiltin, [name]), line);
        }
    }

    fn store_global(&mut self, ins: &Instruction<'a>) {
        let name = ins.name().unwrap_or("?");
        self.pop();
        self.consume_unpack_slot();
        if !self.scope.is_module_name(name) && !self.state.declared_globals.contains(name) {
            self.report(Finding::new(DiagnosticKind::GlobalNotDeclared, [name]), ins.line);
        }
        self.state.declared_globals.insert(name.to_string());
        self.state.globals_referenced.insert(name.to_string());
    }

    fn apply_directive(&mut self, value: &StackItem, line: u32) {
        match suppress::child_config(&self.config, value) {
            Ok(child) => {
                debug!(unit = %self.qualified, line, "directive applied");
                self.config = Cow::Owned(child);
            }
            Err(finding) => self.report(finding, line),
        }
    }

    fn load_attr(&mut self, ins: &Instruction<'a>) {
        let attr = ins.name().unwrap_or("?");
        let top = self.pop();

        if self.config.obj_attrs {
            let target = self.resolve(&top);
            if let Some(finding) = calls::check_attribute(&self.scope, &target, &top, attr) {
                self.report(finding, ins.line);
            }
        }

        let chain = top.with_attribute(attr);
        if self.config.max_refs > 0 {
            if let Some((_, names)) = chain.chain() {
                let bonus = (names[0] == self.config.self_name) as usize;
                let limit = self.config.max_refs + bonus;
                if names.len() == limit + 1 {
                    let finding = Finding::new(DiagnosticKind::TooManyReferences, [names.len(), limit]);
                    self.report(finding, ins.line);
                }
            }
        }
        self.push(chain);
    }

    fn store_attr(&mut self, ins: &Instruction<'a>) {
        let attr = ins.name().unwrap_or("?");
        let receiver = self.pop();
        self.pop();
        self.consume_unpack_slot();

        if !self.config.init_attrs || self.unit.name == "__init__" {
            return;
        }
        let on_receiver = Resolver::new(&self.scope, self.receiver).is_receiver(&receiver);
        let Some(class) = self.scope.class else { return };
        let set_in_init = self
            .scope
            .assigned_members
            .and_then(|m| m.get(attr))
            .map_or(false, |methods| methods.contains("__init__"));
        if on_receiver && !class.has_attribute(attr) && !set_in_init {
            self.report(Finding::new(DiagnosticKind::AttributeOutsideInit, [attr]), ins.line);
        }
    }

    fn unpack(&mut self, ins: &Instruction<'a>) {
        let count = ins.arg as usize;
        let item = self.pop();
        // a nested unpack is itself one target of the enclosing one
        self.consume_unpack_slot();

        if item.kind == Kind::Constant {
            let known_len = match item.value_type {
                Some(ValueType::Tuple) | Some(ValueType::List) => Some(item.length as usize),
                Some(t) if t.is_string() && item.literal().is_some() => Some(item.length as usize),
                _ => None,
            };
            match (known_len, item.literal(), item.value_type) {
                (Some(len), _, _) if len != count => {
                    self.report(Finding::new(DiagnosticKind::UnpackSize, [len, count]), ins.line);
                }
                (None, Some(literal), Some(t)) if !t.is_sequence() => {
                    self.report(Finding::new(DiagnosticKind::UnpackNonSequence, [literal.to_string()]), ins.line);
                }
                _ => {}
            }
        }

        match item.literal() {
            Some(Constant::Tuple(values)) if values.len() == count => {
                for value in values.iter().rev() {
                    self.push(StackItem::constant(value.clone()));
                }
            }
            _ => {
                for _ in 0..count {
                    self.push(StackItem::unknown());
                }
            }
        }
        self.state.unpack += count;
    }

    fn build(&mut self, ins: &Instruction<'a>, value_type: ValueType) {
        let items = self.state.stack.pop_n(ins.arg as usize);
        let literal = match value_type {
            ValueType::Tuple if items.iter().all(|i| i.kind == Kind::Constant && i.is_constant) => items
                .iter()
                .map(|i| i.literal().cloned())
                .collect::<Option<Vec<_>>>()
                .map(Constant::Tuple),
            _ => None,
        };
        self.push(StackItem::aggregate(value_type, ins.arg, literal));
    }

    fn call(&mut self, ins: &Instruction<'a>) -> Result<(), CheckError> {
        let line = ins.line;
        let extra = ins.opcode.call_extra_items().unwrap_or(0);
        let positional = (ins.arg & 0xFF) as usize;
        let keyword_count = ((ins.arg >> 8) & 0xFF) as usize;

        self.state.stack.discard(extra);
        let keyword_items = self.state.stack.pop_n(2 * keyword_count);
        let keywords: Vec<String> = keyword_items
            .chunks(2)
            .map(|pair| pair[0].str_literal().unwrap_or("?").to_string())
            .collect();
        let args = self.state.stack.pop_n(positional);
        let func = self.pop();
        let name = func.display_name();
        let target = self.resolve(&func);

        let mut returns = None;
        let mut always_none = false;
        if let Some(callee) = calls::callee_for(&target, &name) {
            let site = CallSite {
                positional,
                keywords: keywords.clone(),
                star_args: extra > 0,
            };
            for finding in calls::check_call(&callee, &site, &self.config) {
                self.report(finding, line);
            }
            returns = callee.returns;
            always_none = callee.always_none;
        }

        match target {
            Target::Builtin("apply", _) => self.check_apply(&args, line),
            Target::Class(class) => {
                let has_args = positional + keywords.len() > 0 || extra > 0;
                if class.constructor().is_none() && has_args && !class.is_exception && class.checks_attributes() {
                    self.report(Finding::new(DiagnosticKind::NoConstructor, Vec::<String>::new()), line);
                }
            }
            _ => {}
        }

        if func.kind != Kind::Unknown {
            self.state.functions_called.insert(name.clone());
        }
        self.push(StackItem::call_return(Some(name.clone()), returns));

        if always_none && self.config.none_ret_val && self.next_opcode()? != Some(Op::PopTop) {
            self.report(Finding::new(DiagnosticKind::NoneReturnValue, [name]), line);
        }
        Ok(())
    }

    /// `apply(f, (a, b))` is checked as `f(a, b)` when the tuple is a literal.
    fn check_apply(&mut self, args: &[StackItem], line: u32) {
        let (Some(func), Some(packed)) = (args.first(), args.get(1)) else { return };
        if packed.kind != Kind::Constant || packed.value_type != Some(ValueType::Tuple) {
            return;
        }
        let name = func.display_name();
        let target = self.resolve(func);
        if let Some(callee) = calls::callee_for(&target, &name) {
            let site = CallSite {
                positional: packed.length as usize,
                ..Default::default()
            };
            for finding in calls::check_call(&callee, &site, &self.config) {
                self.report(finding, line);
            }
        }
    }
}

/// Fold an operator applied to two literals of the same type.
fn fold(opcode: Op, left: &Constant, right: &Constant) -> Option<Constant> {
    match (left, right) {
        (Constant::Int(a), Constant::Int(b)) => {
            let (a, b) = (*a, *b);
            let value = match opcode {
                Op::BinaryAdd | Op::InplaceAdd => a.checked_add(b),
                Op::BinarySubtract | Op::InplaceSubtract => a.checked_sub(b),
                Op::BinaryMultiply | Op::InplaceMultiply => a.checked_mul(b),
                Op::BinaryDivide | Op::InplaceDivide | Op::BinaryFloorDivide | Op::InplaceFloorDivide => {
                    floor_div(a, b)
                }
                Op::BinaryAnd | Op::InplaceAnd => Some(a & b),
                Op::BinaryOr | Op::InplaceOr => Some(a | b),
                Op::BinaryXor | Op::InplaceXor => Some(a ^ b),
                _ => None,
            }?;
            Some(Constant::Int(value))
        }
        (Constant::Float(a), Constant::Float(b)) => {
            let value = match opcode {
                Op::BinaryAdd | Op::InplaceAdd => a + b,
                Op::BinarySubtract | Op::InplaceSubtract => a - b,
                Op::BinaryMultiply | Op::InplaceMultiply => a * b,
                Op::BinaryDivide | Op::InplaceDivide | Op::BinaryTrueDivide | Op::InplaceTrueDivide
                    if *b != 0.0 =>
                {
                    a / b
                }
                _ => return None,
            };
            Some(Constant::Float(value))
        }
        (Constant::Str(a), Constant::Str(b)) if matches!(opcode, Op::BinaryAdd | Op::InplaceAdd) => {
            Some(Constant::Str(format!("{}{}", a, b)))
        }
        (Constant::Unicode(a), Constant::Unicode(b)) if matches!(opcode, Op::BinaryAdd | Op::InplaceAdd) => {
            Some(Constant::Unicode(format!("{}{}", a, b)))
        }
        (Constant::Tuple(a), Constant::Tuple(b)) if matches!(opcode, Op::BinaryAdd | Op::InplaceAdd) => {
            Some(Constant::Tuple(a.iter().chain(b).cloned().collect()))
        }
        _ => None,
    }
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

fn result_type(opcode: Op, left: Option<ValueType>, right: Option<ValueType>) -> Option<ValueType> {
    let (left, right) = (left?, right?);
    let repeats = matches!(opcode, Op::BinaryMultiply | Op::InplaceMultiply);
    match (left, right) {
        (seq, ValueType::Int) | (ValueType::Int, seq) if repeats && seq.is_sequence() => Some(seq),
        _ => ValueType::coerce(left, right),
    }
}
