//! Runner that walks every unit of a program and collects the diagnostics.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::bytecode::{decode_all, CodeUnit, Opcode};
use crate::config::Config;
use crate::symbols::{Class, Function, FunctionKind, Module, ProgramSymbolTable};

use super::dispatch::Walker;
use super::state::{AssignedMembers, Scope};
use super::suppress;
use super::types::{CheckResult, Diagnostic, DiagnosticKind, Finding};

/// What a walked unit hands back to its parent.
#[derive(Debug, Default)]
struct UnitSummary {
    /// Config left in effect by a directive in the unit.
    config: Option<Config>,
    top_level_names: BTreeMap<String, u32>,
    imports: Vec<(String, u32, String)>,
    top_level_writes: Vec<(String, u32)>,
    functions_called: BTreeSet<String>,
}

/// Accumulates everything walked within one module.
#[derive(Debug, Default)]
struct ModuleSink {
    diagnostics: Vec<Diagnostic>,
    units: usize,
    /// Module-level names read by any unit.
    references: BTreeSet<String>,
}

/// Checks every module of a program symbol table.
pub struct Runner<'a> {
    table: &'a ProgramSymbolTable,
    config: &'a Config,
    only: Option<BTreeSet<String>>,
}

impl<'a> Runner<'a> {
    /// Create a new runner over `table` with the base `config`.
    pub fn new(table: &'a ProgramSymbolTable, config: &'a Config) -> Self {
        Self {
            table,
            config,
            only: None,
        }
    }

    /// Restrict the run to the named modules.
    pub fn only_modules<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Check every selected module.
    pub fn run(&self) -> anyhow::Result<CheckResult> {
        let blacklist = self.config.blacklist_matcher()?;
        let mut result = CheckResult::new();

        for (name, module) in &self.table.modules {
            if self.only.as_ref().map_or(false, |only| !only.contains(name)) {
                continue;
            }
            if blacklist.is_match(name) {
                debug!(module = %name, "blacklisted");
                result.skipped.push(name.clone());
                continue;
            }
            result.merge(self.check_module(module));
        }

        Ok(result)
    }

    fn check_module(&self, module: &Module) -> CheckResult {
        debug!(module = %module.name, "checking module");
        let mut sink = ModuleSink::default();

        let no_names = BTreeMap::new();
        let body = module.body.as_ref().and_then(|body| {
            let scope = Scope::module_only(self.table, module, &no_names);
            self.walk_tree(body, scope, self.config, &module.name, &mut sink)
        });
        let body = body.unwrap_or_default();
        let config = body.config.as_ref().unwrap_or(self.config);
        let module_names = &body.top_level_names;

        for (name, function) in &module.functions {
            let Some(code) = &function.code else { continue };
            let scope = Scope {
                function: Some(function),
                ..Scope::module_only(self.table, module, module_names)
            };
            self.walk_tree(code, scope, config, &format!("{}.{}", module.name, name), &mut sink);
        }

        for class in module.classes.values() {
            self.check_class(module, class, module_names, config, &mut sink);
        }

        self.module_checks(module, config, &body, &mut sink);

        CheckResult {
            diagnostics: sink.diagnostics,
            units: sink.units,
            modules: 1,
            skipped: Vec::new(),
        }
    }

    fn check_class(
        &self,
        module: &Module,
        class: &Class,
        module_names: &BTreeMap<String, u32>,
        config: &Config,
        sink: &mut ModuleSink,
    ) {
        let qualified = format!("{}.{}", module.name, class.name);
        let module_scope = Scope::module_only(self.table, module, module_names);

        let class_config = class.body.as_ref().and_then(|body| {
            let scope = Scope {
                class: Some(class),
                ..module_scope
            };
            self.walk_tree(body, scope, config, &qualified, sink)
                .and_then(|summary| summary.config)
        });
        let config = class_config.as_ref().unwrap_or(config);

        let assigned = assigned_members(class);
        let mut init_calls = None;
        for (name, method) in &class.methods {
            let method_name = format!("{}.{}", qualified, name);
            if let Some(finding) = check_self_argument(method, config) {
                let line = method.line;
                sink.diagnostics
                    .push(Diagnostic::from_finding(finding, &method_name, module.display_file(), line));
            }

            let Some(code) = &method.code else { continue };
            let scope = Scope {
                class: Some(class),
                assigned_members: Some(&assigned),
                function: Some(method),
                ..module_scope
            };
            let summary = self.walk_tree(code, scope, config, &method_name, sink);
            if name == "__init__" {
                init_calls = summary.map(|s| s.functions_called);
            }
        }

        if config.base_init {
            if let (Some(init), Some(calls)) = (class.methods.get("__init__"), init_calls) {
                for base in self.bases_missing_init(module, class, &calls) {
                    sink.diagnostics.push(Diagnostic::from_finding(
                        Finding::new(DiagnosticKind::BaseInitNotCalled, [base]),
                        &format!("{}.__init__", qualified),
                        module.display_file(),
                        init.line,
                    ));
                }
            }
        }
    }

    /// Bases defining `__init__` that the subclass constructor never calls.
    fn bases_missing_init(&self, module: &Module, class: &Class, calls: &BTreeSet<String>) -> Vec<String> {
        if calls.contains("super.__init__") {
            return Vec::new();
        }
        class
            .bases
            .iter()
            .filter(|base| {
                let Some((_, base_class)) = self.table.find_class(&module.name, base) else {
                    return false;
                };
                if base_class.method("__init__").is_none() {
                    return false;
                }
                let direct = format!("{}.__init__", base);
                let suffix = format!(".{}.__init__", base_class.name);
                let bare = format!("{}.__init__", base_class.name);
                !calls.iter().any(|c| *c == direct || *c == bare || c.ends_with(&suffix))
            })
            .cloned()
            .collect()
    }

    /// Walk `unit`, then every unit nested in it under the config it leaves.
    ///
    /// Returns `None` when the unit could not be walked; the failure is
    /// recorded as an internal error diagnostic.
    fn walk_tree<'u>(
        &self,
        unit: &'u CodeUnit,
        scope: Scope<'u>,
        config: &Config,
        qualified: &str,
        sink: &mut ModuleSink,
    ) -> Option<UnitSummary> {
        let outcome = match Walker::new(unit, scope, config, qualified).walk() {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(unit = %qualified, error = %err, "unit aborted");
                sink.diagnostics.push(Diagnostic::from_finding(
                    Finding::new(DiagnosticKind::InternalError, [qualified.to_string(), err.to_string()]),
                    qualified,
                    scope.file(),
                    unit.first_line,
                ));
                return None;
            }
        };
        sink.units += 1;

        let state = outcome.state;
        sink.diagnostics.extend(state.diagnostics);
        sink.references.extend(state.globals_referenced);
        sink.references.extend(
            state
                .functions_called
                .iter()
                .filter_map(|called| called.split('.').next())
                .map(String::from),
        );

        let child_config = outcome.config;
        let effective = child_config.as_ref().unwrap_or(config);
        for nested in state.nested {
            let nested_scope = Scope {
                class: None,
                assigned_members: None,
                function: None,
                ..scope
            };
            let name = format!("{}.{}", qualified, nested.name);
            self.walk_tree(nested, nested_scope, effective, &name, sink);
        }

        Some(UnitSummary {
            config: child_config,
            top_level_names: state.top_level_names,
            imports: state.imports,
            top_level_writes: state.top_level_writes,
            functions_called: state.functions_called,
        })
    }

    /// Module-wide unused import and unused global checks.
    fn module_checks(&self, module: &Module, config: &Config, body: &UnitSummary, sink: &mut ModuleSink) {
        let file = module.display_file();
        let unit = module.name.as_str();
        let mut reported = BTreeSet::new();

        if config.unused_imports {
            for (name, line, imported) in &body.imports {
                if imported == "__future__" || config.is_exempt_name(name) || sink.references.contains(name) {
                    continue;
                }
                if reported.insert(name.clone()) {
                    let finding = Finding::new(DiagnosticKind::UnusedImport, [name]);
                    sink.diagnostics.push(Diagnostic::from_finding(finding, unit, file, *line));
                }
            }
        }

        if config.unused_globals {
            for (name, line) in &body.top_level_writes {
                let private = name.starts_with("__") || suppress::is_directive(name);
                if private || config.is_exempt_name(name) || sink.references.contains(name) {
                    continue;
                }
                if reported.insert(name.clone()) {
                    let finding = Finding::new(DiagnosticKind::UnusedGlobal, [name]);
                    sink.diagnostics.push(Diagnostic::from_finding(finding, unit, file, *line));
                }
            }
        }
    }
}

/// First-parameter checks for one method.
fn check_self_argument(method: &Function, config: &Config) -> Option<Finding> {
    if method.kind == FunctionKind::StaticMethod {
        return None;
    }
    let Some(first) = method.params.first() else {
        return Some(Finding::new(DiagnosticKind::NoMethodArgs, [config.self_name.as_str()]));
    };
    // `def f(*args)` receives the instance in args
    if method.params.var_args && method.params.positional_count() == 0 {
        return None;
    }

    match method.kind {
        FunctionKind::ClassMethod if !config.cls_names.iter().any(|n| n == first) => {
            let expected = config.cls_names.first().map(String::as_str).unwrap_or("cls");
            Some(Finding::new(DiagnosticKind::NotFirstArgument, [expected, "class "]))
        }
        FunctionKind::ClassMethod => None,
        _ if first != config.self_name => Some(Finding::new(
            DiagnosticKind::NotFirstArgument,
            [config.self_name.as_str(), ""],
        )),
        _ => None,
    }
}

/// Attributes each method assigns through its receiver (`self.x = ...`).
fn assigned_members(class: &Class) -> AssignedMembers {
    let mut assigned = AssignedMembers::new();
    for (name, method) in &class.methods {
        if method.kind == FunctionKind::StaticMethod {
            continue;
        }
        let Some(code) = &method.code else { continue };
        let Some(receiver) = code.params.first() else { continue };
        // undecodable units are reported when they are walked
        let Ok(instructions) = decode_all(code) else { continue };
        for pair in instructions.windows(2) {
            let loads_receiver = pair[0].opcode == Opcode::LoadFast && pair[0].name() == Some(receiver);
            if loads_receiver && pair[1].opcode == Opcode::StoreAttr {
                if let Some(attr) = pair[1].name() {
                    assigned.entry(attr.to_string()).or_default().insert(name.clone());
                }
            }
        }
    }
    assigned
}
