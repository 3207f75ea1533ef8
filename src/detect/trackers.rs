//! End-of-unit checks: complexity thresholds, unused names and return
//! consistency.

use crate::bytecode::CodeUnit;
use crate::config::Config;
use crate::symbols::ValueType;

use super::stack::{Kind, StackItem};
use super::state::{LocalUse, ReturnSample, Scope, UnitState};
use super::types::{DiagnosticKind, Finding};

/// Branch count after discounting the edges every loop compiles to.
///
/// `(targets - loop_edges * loops) / 2`, never negative.
pub fn branch_count(targets: usize, loops: usize, loop_edges: usize) -> usize {
    targets.saturating_sub(loop_edges * loops) / 2
}

/// Run every end-of-unit check and append the findings to `state`.
pub fn finalize(unit: &CodeUnit, scope: &Scope<'_>, config: &Config, state: &mut UnitState<'_>, qualified: &str) {
    if unit.kind.is_definition_body() {
        return;
    }

    let mut findings = Vec::new();
    complexity(unit, config, state, &mut findings);
    unused_names(unit, scope, config, state, &mut findings);
    if !state.is_generator {
        return_checks(unit, scope, config, &state.returns, &mut findings);
    }

    let file = scope.file();
    for (finding, line) in findings {
        state.report(finding, qualified, file, line);
    }
}

fn complexity(unit: &CodeUnit, config: &Config, state: &UnitState<'_>, out: &mut Vec<(Finding, u32)>) {
    let name = unit.name.as_str();
    let line = unit.first_line;
    let mut check = |kind: DiagnosticKind, value: usize, limit: usize| {
        if limit > 0 && value > limit {
            out.push((Finding::new(kind, [name.to_string(), value.to_string()]), line));
        }
    };

    let lines = state.last_line.saturating_sub(unit.first_line) as usize;
    check(DiagnosticKind::TooManyLines, lines, config.max_lines);

    let branches = branch_count(state.branches.len(), state.loops, config.loop_edges);
    check(DiagnosticKind::TooManyBranches, branches, config.max_branches);

    check(DiagnosticKind::TooManyReturns, state.returns.len(), config.max_returns);
    check(DiagnosticKind::TooManyArgs, unit.params.names.len(), config.max_args);
    check(DiagnosticKind::TooManyLocals, unit.varnames.len(), config.max_locals);
}

fn unused_names(
    unit: &CodeUnit,
    scope: &Scope<'_>,
    config: &Config,
    state: &UnitState<'_>,
    out: &mut Vec<(Finding, u32)>,
) {
    if config.unused_locals {
        for (name, use_) in &state.locals {
            let LocalUse::Written(line) = *use_ else { continue };
            // negative lines are tuple-unpack targets
            if line < 0 || unit.params.contains(name) || config.is_exempt_name(name) {
                continue;
            }
            out.push((Finding::new(DiagnosticKind::UnusedLocal, [name]), line as u32));
        }
    }

    if !config.unused_params || unit.is_lambda() || state.is_stub() {
        return;
    }
    let receiver = scope.receiver(unit);
    for name in unit.params.positional_names() {
        if !matches!(state.locals.get(name), Some(LocalUse::Written(_))) || config.is_exempt_name(name) {
            continue;
        }
        let is_receiver = receiver == Some(name.as_str()) || *name == config.self_name;
        if is_receiver && config.ignore_self {
            continue;
        }
        out.push((Finding::new(DiagnosticKind::UnusedParameter, [name]), unit.first_line));
    }
}

/// Type a return value can be compared by, if any.
fn comparable_type(value: &StackItem) -> Option<ValueType> {
    if matches!(value.kind, Kind::Unknown | Kind::ExceptionMarker | Kind::AttributeChain) && value.value_type.is_none() {
        return None;
    }
    match value.value_type? {
        ValueType::None => None,
        ValueType::Bool => Some(ValueType::Int),
        other => Some(other),
    }
}

fn return_checks(
    unit: &CodeUnit,
    scope: &Scope<'_>,
    config: &Config,
    returns: &[ReturnSample],
    out: &mut Vec<(Finding, u32)>,
) {
    let values: Vec<(&StackItem, u32)> = returns
        .iter()
        .filter_map(|r| r.value.as_ref().map(|v| (v, r.line)))
        .collect();

    if config.return_values {
        let typed: Vec<(&StackItem, ValueType, u32)> = values
            .iter()
            .filter_map(|(v, line)| comparable_type(v).map(|t| (*v, t, *line)))
            .collect();
        if let Some((first, first_type, _)) = typed.first() {
            let mismatch = typed.iter().skip(1).find(|(item, t, _)| {
                let tuple_sizes_differ = *t == ValueType::Tuple
                    && first.kind == Kind::Constant
                    && item.kind == Kind::Constant
                    && first.length != item.length;
                t != first_type || tuple_sizes_differ
            });
            if let Some((_, _, line)) = mismatch {
                out.push((
                    Finding::new(DiagnosticKind::InconsistentReturns, Vec::<String>::new()),
                    *line,
                ));
            }
        }
    }

    let explicit = values.iter().any(|(v, _)| !v.is_none_literal());
    let implicit = values.iter().any(|(v, _)| v.is_none_literal());
    if config.implicit_returns && explicit && implicit {
        out.push((
            Finding::new(DiagnosticKind::ImplicitReturns, [unit.name.as_str()]),
            unit.first_line,
        ));
    }

    if config.init_return && unit.name == "__init__" && scope.class.is_some() {
        if let Some((_, line)) = values.iter().find(|(v, _)| !v.is_none_literal()) {
            out.push((
                Finding::new(DiagnosticKind::InitReturnsValue, Vec::<String>::new()),
                *line,
            ));
        }
    }
}
