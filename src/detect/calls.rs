//! Call and attribute validation.
//!
//! Stack items are resolved against the program symbol table to a
//! [`Target`]; targets answer attribute lookups and supply the signature a
//! call is checked against.

use crate::bytecode::Params;
use crate::config::Config;
use crate::symbols::builtins::{self, Builtin};
use crate::symbols::{Class, Function, FunctionKind, Module, ValueType};

use super::stack::{Datum, Kind, StackItem};
use super::state::{Scope, UnitState};
use super::types::{DiagnosticKind, Finding};

/// What a stack item refers to, as far as the symbol table knows.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Module(&'a Module),
    /// The class object itself.
    Class(&'a Class),
    /// An instance of the class.
    Instance(&'a Class),
    Function(&'a Function),
    /// A method; `bound` when the receiver is passed implicitly.
    Method { function: &'a Function, bound: bool },
    Builtin(&'static str, &'static Builtin),
    BuiltinMethod(&'static Builtin),
    Type(ValueType),
    Unknown,
}

/// Resolves stack items within one unit's scope.
pub struct Resolver<'s, 'a> {
    scope: &'s Scope<'a>,
    /// Receiver parameter of the method being walked.
    receiver: Option<&'s str>,
}

impl<'s, 'a> Resolver<'s, 'a> {
    pub fn new(scope: &'s Scope<'a>, receiver: Option<&'s str>) -> Self {
        Self { scope, receiver }
    }

    pub fn resolve(&self, item: &StackItem, state: &UnitState<'_>) -> Target<'a> {
        match (&item.data, item.kind) {
            (Datum::Name(name), Kind::LocalRef) => self.resolve_local(name, state),
            (Datum::Name(name), Kind::GlobalRef) => self.resolve_global(name),
            (Datum::Chain { root, root_type, names }, _) => {
                let Some((first, attrs)) = names.split_first() else {
                    return Target::Unknown;
                };
                let mut target = match root {
                    Kind::LocalRef => self.resolve_local(first, state),
                    Kind::GlobalRef => self.resolve_global(first),
                    _ => root_type.map(Target::Type).unwrap_or(Target::Unknown),
                };
                for attr in attrs {
                    target = self.member(target, attr);
                }
                target
            }
            _ => item.value_type.map(Target::Type).unwrap_or(Target::Unknown),
        }
    }

    fn resolve_local(&self, name: &str, state: &UnitState<'_>) -> Target<'a> {
        if let (Some(receiver), Some(class)) = (self.receiver, self.scope.class) {
            if receiver == name {
                return if self.scope.is_class_method() {
                    Target::Class(class)
                } else {
                    Target::Instance(class)
                };
            }
        }
        state.local_type(name).map(Target::Type).unwrap_or(Target::Unknown)
    }

    pub fn resolve_global(&self, name: &str) -> Target<'a> {
        let module = self.scope.module;
        if let Some(full) = module.modules.get(name) {
            return self
                .scope
                .table
                .module(full)
                .map(Target::Module)
                .unwrap_or(Target::Unknown);
        }
        if let Some(class) = module.classes.get(name) {
            return Target::Class(class);
        }
        if let Some(function) = module.functions.get(name) {
            return Target::Function(function);
        }
        if let Some(var) = module.variables.get(name) {
            return var.value_type.map(Target::Type).unwrap_or(Target::Unknown);
        }
        if self.scope.module_names.contains_key(name) {
            return Target::Unknown;
        }
        builtins::BUILTIN_FUNCTIONS
            .get_entry(name)
            .map(|(key, sig)| Target::Builtin(*key, sig))
            .unwrap_or(Target::Unknown)
    }

    /// Look `attr` up on an already resolved target.
    pub fn member(&self, target: Target<'a>, attr: &str) -> Target<'a> {
        match target {
            Target::Module(module) => {
                if let Some(full) = module.modules.get(attr) {
                    return self.scope.table.module(full).map(Target::Module).unwrap_or(Target::Unknown);
                }
                if let Some(class) = module.classes.get(attr) {
                    return Target::Class(class);
                }
                if let Some(function) = module.functions.get(attr) {
                    return Target::Function(function);
                }
                module
                    .variables
                    .get(attr)
                    .and_then(|v| v.value_type)
                    .map(Target::Type)
                    .unwrap_or(Target::Unknown)
            }
            Target::Instance(class) => match class.method(attr) {
                Some(function) => Target::Method {
                    function,
                    bound: function.kind != FunctionKind::StaticMethod,
                },
                None => member_type(class, attr),
            },
            Target::Class(class) => match class.method(attr) {
                Some(function) => Target::Method {
                    function,
                    bound: function.kind == FunctionKind::ClassMethod,
                },
                None => member_type(class, attr),
            },
            Target::Type(value_type) => builtins::method_signature(value_type, attr)
                .map(Target::BuiltinMethod)
                .unwrap_or(Target::Unknown),
            _ => Target::Unknown,
        }
    }

    /// Whether `item` is the receiver of the method being walked.
    pub fn is_receiver(&self, item: &StackItem) -> bool {
        self.receiver.map_or(false, |r| item.is_local(r))
    }
}

fn member_type<'a>(class: &'a Class, attr: &str) -> Target<'a> {
    class
        .members
        .get(attr)
        .copied()
        .flatten()
        .map(Target::Type)
        .unwrap_or(Target::Unknown)
}

/// Check that `attr` exists on `target`.
pub fn check_attribute(scope: &Scope<'_>, target: &Target<'_>, item: &StackItem, attr: &str) -> Option<Finding> {
    match target {
        Target::Instance(class) | Target::Class(class) => {
            let walking_this_class = scope.class.map_or(false, |c| std::ptr::eq(c, *class));
            let assigned = walking_this_class && scope.is_assigned_member(attr);
            if class.checks_attributes() && !class.has_attribute(attr) && !assigned {
                return Some(Finding::new(DiagnosticKind::NoClassAttribute, [attr]));
            }
            None
        }
        Target::Module(module) if !module.has_attribute(attr) => {
            Some(Finding::new(DiagnosticKind::NoModuleAttribute, [attr]))
        }
        Target::Type(value_type) if !builtins::has_type_attribute(*value_type, attr) => Some(
            Finding::new(DiagnosticKind::NoObjectAttribute, [item.display_name(), attr.to_string()]),
        ),
        _ => None,
    }
}

/// Argument bounds of a callee.
#[derive(Debug, Clone)]
pub struct Signature<'p> {
    pub name: String,
    pub min_args: usize,
    /// `None` means unbounded.
    pub max_args: Option<usize>,
    /// Declared parameters, when known, for keyword matching.
    pub params: Option<&'p Params>,
    pub supports_kwargs: bool,
}

/// A resolved callee: its signature plus what calling it yields.
#[derive(Debug, Clone)]
pub struct Callee<'p> {
    pub signature: Signature<'p>,
    pub implicit_receiver: bool,
    pub returns: Option<ValueType>,
    pub always_none: bool,
}

impl<'p> Callee<'p> {
    fn function(name: &str, function: &'p Function, implicit_receiver: bool) -> Self {
        Self {
            signature: Signature {
                name: name.to_string(),
                min_args: function.min_args(),
                max_args: function.max_args(),
                params: Some(&function.params),
                supports_kwargs: function.supports_kwargs(),
            },
            implicit_receiver,
            returns: function.returns,
            always_none: function.always_returns_none,
        }
    }

    fn builtin(name: &str, builtin: &Builtin) -> Self {
        Self {
            signature: Signature {
                name: name.to_string(),
                min_args: builtin.min_args,
                max_args: builtin.max_args,
                params: None,
                supports_kwargs: false,
            },
            implicit_receiver: false,
            returns: builtin.returns.filter(|t| *t != ValueType::None),
            always_none: builtin.returns == Some(ValueType::None),
        }
    }
}

/// The callee a call through `target` is checked against.
pub fn callee_for<'p>(target: &Target<'p>, name: &str) -> Option<Callee<'p>> {
    match *target {
        Target::Function(function) => Some(Callee::function(name, function, false)),
        Target::Method { function, bound } => Some(Callee::function(name, function, bound)),
        Target::Class(class) => class.constructor().map(|init| {
            let mut callee = Callee::function(name, init, true);
            callee.returns = None;
            callee.always_none = false;
            callee
        }),
        Target::Builtin(_, builtin) | Target::BuiltinMethod(builtin) => Some(Callee::builtin(name, builtin)),
        _ => None,
    }
}

/// What the call site passes.
#[derive(Debug, Clone, Default)]
pub struct CallSite {
    pub positional: usize,
    pub keywords: Vec<String>,
    /// `*args` or `**kwargs` was passed, so the count is unknown.
    pub star_args: bool,
}

/// Expected-count phrase for argument count messages.
pub fn expected_text(min_args: usize, max_args: Option<usize>) -> String {
    match max_args {
        Some(max) if max == min_args => min_args.to_string(),
        Some(max) => format!("between {} and {}", min_args, max),
        None => format!("at least {}", min_args),
    }
}

pub fn check_arg_count(name: &str, min_args: usize, max_args: Option<usize>, count: usize) -> Option<Finding> {
    let too_few = count < min_args;
    let too_many = max_args.map_or(false, |max| count > max);
    if too_few || too_many {
        return Some(Finding::new(
            DiagnosticKind::InvalidArgCount,
            [name.to_string(), count.to_string(), expected_text(min_args, max_args)],
        ));
    }
    None
}

/// Validate one call against its callee.
pub fn check_call(callee: &Callee<'_>, site: &CallSite, config: &Config) -> Vec<Finding> {
    let sig = &callee.signature;
    let offset = callee.implicit_receiver as usize;
    let min_args = sig.min_args.saturating_sub(offset);
    let max_args = sig.max_args.map(|m| m.saturating_sub(offset));

    let mut findings = Vec::new();
    let mut count = site.positional;

    if !site.keywords.is_empty() {
        match sig.params {
            Some(params) => {
                let positional = params.positional_names();
                let filled = site.positional + offset;
                let mut used_named = false;
                for keyword in &site.keywords {
                    match positional.iter().position(|p| p == keyword) {
                        Some(index) if index >= filled => {
                            count += 1;
                            used_named = true;
                        }
                        Some(_) => {}
                        None if sig.supports_kwargs => {}
                        None => findings.push(Finding::new(
                            DiagnosticKind::UnknownKeyword,
                            [sig.name.as_str(), keyword.as_str()],
                        )),
                    }
                }
                if used_named && config.named_args {
                    findings.push(Finding::new(DiagnosticKind::NamedArguments, [sig.name.as_str()]));
                }
            }
            None => count += site.keywords.len(),
        }
    }

    if !site.star_args {
        if let Some(finding) = check_arg_count(&sig.name, min_args, max_args, count) {
            findings.push(finding);
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function(names: &[&str], defaults: usize, var_args: bool) -> Function {
        Function {
            name: "f".into(),
            params: Params {
                names: names.iter().map(|n| n.to_string()).collect(),
                defaults,
                var_args,
                var_kwargs: false,
            },
            ..Default::default()
        }
    }

    fn site(positional: usize) -> CallSite {
        CallSite {
            positional,
            ..Default::default()
        }
    }

    #[test]
    fn test_argument_count_law() {
        // min 2, max 4
        let f = function(&["a", "b", "c", "d"], 2, false);
        let callee = callee_for(&Target::Function(&f), "f").unwrap();
        let config = Config::default();

        let one = check_call(&callee, &site(1), &config);
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].message(), "Invalid arguments to (f), got 1, expected between 2 and 4");
        for n in 2..=4 {
            assert!(check_call(&callee, &site(n), &config).is_empty());
        }
        assert_eq!(check_call(&callee, &site(5), &config).len(), 1);

        // *args removes the upper bound
        let g = function(&["a", "b", "c", "d", "rest"], 2, true);
        let callee = callee_for(&Target::Function(&g), "g").unwrap();
        assert!(check_call(&callee, &site(9), &config).is_empty());
        let low = check_call(&callee, &site(1), &config);
        assert_eq!(low[0].message(), "Invalid arguments to (g), got 1, expected at least 2");
    }

    #[test]
    fn test_implicit_receiver() {
        let method = function(&["self", "x"], 0, false);
        let bound = Target::Method { function: &method, bound: true };
        let callee = callee_for(&bound, "self.run").unwrap();
        let config = Config::default();
        assert!(check_call(&callee, &site(1), &config).is_empty());
        let wrong = check_call(&callee, &site(2), &config);
        assert_eq!(wrong[0].message(), "Invalid arguments to (self.run), got 2, expected 1");
    }

    #[test]
    fn test_keywords() {
        let f = function(&["a", "b", "c"], 2, false);
        let callee = callee_for(&Target::Function(&f), "f").unwrap();
        let mut config = Config::default();

        let call = CallSite {
            positional: 1,
            keywords: vec!["c".into()],
            star_args: false,
        };
        assert!(check_call(&callee, &call, &config).is_empty());

        config.named_args = true;
        let advisory = check_call(&callee, &call, &config);
        assert_eq!(advisory[0].kind, DiagnosticKind::NamedArguments);

        let bad = CallSite {
            positional: 1,
            keywords: vec!["zzz".into()],
            star_args: false,
        };
        let findings = check_call(&callee, &bad, &Config::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].message(), "Function (f) has no keyword argument (zzz)");
    }

    #[test]
    fn test_star_args_skip_counts() {
        let f = function(&["a"], 0, false);
        let callee = callee_for(&Target::Function(&f), "f").unwrap();
        let call = CallSite {
            positional: 3,
            keywords: vec![],
            star_args: true,
        };
        assert!(check_call(&callee, &call, &Config::default()).is_empty());
    }

    #[test]
    fn test_builtin_callee() {
        let len = builtins::function_signature("len").unwrap();
        let callee = callee_for(&Target::Builtin("len", len), "len").unwrap();
        assert_eq!(callee.returns, Some(ValueType::Int));
        assert_eq!(check_call(&callee, &site(2), &Config::default()).len(), 1);

        let append = builtins::method_signature(ValueType::List, "append").unwrap();
        let callee = callee_for(&Target::BuiltinMethod(append), "x.append").unwrap();
        assert!(callee.always_none);
        assert_eq!(callee.returns, None);
    }

    #[test]
    fn test_expected_text() {
        assert_eq!(expected_text(2, Some(2)), "2");
        assert_eq!(expected_text(1, Some(3)), "between 1 and 3");
        assert_eq!(expected_text(1, None), "at least 1");
    }
}
