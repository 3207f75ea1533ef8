//! Core types for detection results.

use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator};

/// Severity levels for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Severity::Error),
            "warning" => Ok(Severity::Warning),
            "info" => Ok(Severity::Info),
            _ => Err(format!("unknown severity: {}", s)),
        }
    }
}

/// Every class of diagnostic the checker emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, EnumIter)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    UsedBeforeSet,
    UsedAfterDelete,
    UnusedLocal,
    UnusedParameter,
    ShadowsGlobal,
    ShadowsBuiltin,
    NoGlobal,
    GlobalNotDeclared,
    NoClassAttribute,
    NoModuleAttribute,
    NoObjectAttribute,
    TooManyReferences,
    AttributeOutsideInit,
    MethodAsAttribute,
    InvalidArgCount,
    NamedArguments,
    UnknownKeyword,
    NoConstructor,
    NoneReturnValue,
    FormatArgCount,
    InvalidFormat,
    MixedFormat,
    FormatStarWithMapping,
    FormatNeedsMapping,
    DoubledOperator,
    UnaryPlus,
    NoEffect,
    ConstantCondition,
    TooManyLines,
    TooManyBranches,
    TooManyReturns,
    TooManyArgs,
    TooManyLocals,
    InconsistentReturns,
    ImplicitReturns,
    Unreachable,
    BaseInitNotCalled,
    InitReturnsValue,
    NoMethodArgs,
    NotFirstArgument,
    Redefined,
    UnpackSize,
    UnpackNonSequence,
    UnusedImport,
    UnusedGlobal,
    InvalidSuppression,
    InternalError,
}

impl DiagnosticKind {
    /// Rule name, message template and severity.
    fn info(&self) -> (&'static str, &'static str, Severity) {
        use DiagnosticKind::*;
        use Severity::*;
        match self {
            UsedBeforeSet => ("used_before_set", "Variable ({}) used before being set", Error),
            UsedAfterDelete => ("used_after_delete", "Variable ({}) used after being deleted", Error),
            UnusedLocal => ("unused_local", "Local variable ({}) not used", Warning),
            UnusedParameter => ("unused_parameter", "Parameter ({}) not used", Warning),
            ShadowsGlobal => ("shadows_global", "Local variable ({}) shadows global defined on line {}", Warning),
            ShadowsBuiltin => ("shadows_builtin", "({}) shadows builtin", Warning),
            NoGlobal => ("no_global", "No global ({}) found", Error),
            GlobalNotDeclared => ("global_not_declared", "Global variable ({}) not defined in module scope", Warning),
            NoClassAttribute => ("no_class_attribute", "No class attribute ({}) found", Error),
            NoModuleAttribute => ("no_module_attribute", "No module attribute ({}) found", Error),
            NoObjectAttribute => ("no_object_attribute", "Object ({}) has no attribute ({})", Error),
            TooManyReferences => ("too_many_references", "Too many attribute references ({} > {})", Warning),
            AttributeOutsideInit => ("attribute_outside_init", "Attribute ({}) set outside constructor", Warning),
            MethodAsAttribute => ("method_as_attribute", "Using method ({}) as an attribute (not invoked)", Warning),
            InvalidArgCount => ("invalid_arg_count", "Invalid arguments to ({}), got {}, expected {}", Error),
            NamedArguments => ("named_arguments", "Function ({}) uses named arguments", Info),
            UnknownKeyword => ("unknown_keyword", "Function ({}) has no keyword argument ({})", Error),
            NoConstructor => ("no_constructor", "Instantiating an object with arguments, but no constructor", Error),
            NoneReturnValue => ("none_return_value", "Using the return value from ({}) which is always None", Warning),
            FormatArgCount => ("format_arg_count", "Format string argument count ({}) doesn't match arguments ({})", Error),
            InvalidFormat => ("invalid_format", "Invalid format string, problem starts near: ({})", Error),
            MixedFormat => ("mixed_format", "Can't mix tuple/mapping (without name) and dictionary/named (with name) format specifiers", Error),
            FormatStarWithMapping => ("format_star_with_mapping", "Can't use * in formats when using a mapping (dictionary), near: ({})", Error),
            FormatNeedsMapping => ("format_needs_mapping", "Format string uses named specifiers but is not given a mapping", Error),
            DoubledOperator => ("doubled_operator", "Operator ({}) doesn't exist, statement has no effect", Warning),
            UnaryPlus => ("unary_plus", "Operator (+) normally has no effect", Info),
            NoEffect => ("no_effect", "Statement appears to have no effect", Warning),
            ConstantCondition => ("constant_condition", "Using a conditional statement with a constant value ({})", Warning),
            TooManyLines => ("too_many_lines", "Function ({}) has too many lines ({})", Warning),
            TooManyBranches => ("too_many_branches", "Function ({}) has too many branches ({})", Warning),
            TooManyReturns => ("too_many_returns", "Function ({}) has too many returns ({})", Warning),
            TooManyArgs => ("too_many_args", "Function ({}) has too many arguments ({})", Warning),
            TooManyLocals => ("too_many_locals", "Function ({}) has too many local variables ({})", Warning),
            InconsistentReturns => ("inconsistent_returns", "Function return types are inconsistent", Warning),
            ImplicitReturns => ("implicit_returns", "Function ({}) uses both implicit and explicit returns", Info),
            Unreachable => ("unreachable", "Code appears to be unreachable", Warning),
            BaseInitNotCalled => ("base_init_not_called", "Base class ({}) __init__() not called", Warning),
            InitReturnsValue => ("init_returns_value", "__init__() should not return a value", Error),
            NoMethodArgs => ("no_method_args", "No method arguments, should have {} as argument", Error),
            NotFirstArgument => ("not_first_argument", "{} is not first {}method argument", Error),
            Redefined => ("redefined", "Redefining function ({}) that was defined on line {}", Warning),
            UnpackSize => ("unpack_size", "Unpacking {} values into {} variables", Error),
            UnpackNonSequence => ("unpack_non_sequence", "Unpacking a non-sequence ({})", Error),
            UnusedImport => ("unused_import", "Imported module ({}) not used", Warning),
            UnusedGlobal => ("unused_global", "Variable ({}) not used", Warning),
            InvalidSuppression => ("invalid_suppression", "Invalid arguments to __bytelint__: {}", Warning),
            InternalError => ("internal_error", "Internal error, processing stopped for {}: {}", Error),
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.info().0
    }

    /// Message template; each `{}` takes one argument in order.
    pub fn template(&self) -> &'static str {
        self.info().1
    }

    pub fn severity(&self) -> Severity {
        self.info().2
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::iter().find(|kind| kind.as_str() == s)
    }
}

impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fill `{}` placeholders in order; missing arguments render as `?`.
pub fn render(template: &str, args: &[String]) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut args = args.iter();
    let mut rest = template;
    while let Some(pos) = rest.find("{}") {
        out.push_str(&rest[..pos]);
        match args.next() {
            Some(arg) => out.push_str(arg),
            None => out.push('?'),
        }
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    out
}

/// A kind plus its message arguments, before a location is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub kind: DiagnosticKind,
    pub args: Vec<String>,
}

impl Finding {
    pub fn new<I, S>(kind: DiagnosticKind, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        Self {
            kind,
            args: args.into_iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn message(&self) -> String {
        render(self.kind.template(), &self.args)
    }
}

/// A single detected issue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Qualified name of the unit being walked.
    pub unit: String,
    pub file: String,
    pub line: u32,
    pub args: Vec<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, unit: &str, file: &str, line: u32, args: Vec<String>) -> Self {
        Self {
            kind,
            unit: unit.to_string(),
            file: file.to_string(),
            line,
            args,
        }
    }

    pub fn from_finding(finding: Finding, unit: &str, file: &str, line: u32) -> Self {
        Self::new(finding.kind, unit, file, line, finding.args)
    }

    pub fn message(&self) -> String {
        render(self.kind.template(), &self.args)
    }

    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }

    /// Create a unique key for this diagnostic (for deduplication/comparison).
    pub fn key(&self) -> String {
        format!("{}|{}|{}|{}", self.kind, self.file, self.line, self.message())
    }
}

/// Results of a checking run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckResult {
    pub diagnostics: Vec<Diagnostic>,
    /// Number of code units walked
    pub units: usize,
    /// Modules checked
    pub modules: usize,
    /// Modules skipped by the blacklist
    #[serde(default)]
    pub skipped: Vec<String>,
}

impl CheckResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge another result into this one.
    pub fn merge(&mut self, other: CheckResult) {
        self.diagnostics.extend(other.diagnostics);
        self.units += other.units;
        self.modules += other.modules;
        self.skipped.extend(other.skipped);
    }

    pub fn add_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Check if there are any error-severity diagnostics.
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity() == Severity::Error)
    }

    /// Errors and warnings fail a run; advisories do not.
    pub fn has_failures(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity() != Severity::Info)
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.diagnostics.iter().filter(|d| d.kind == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_fills_in_order() {
        let d = Diagnostic::new(
            DiagnosticKind::InvalidArgCount,
            "m.f",
            "m.py",
            3,
            vec!["g".into(), "1".into(), "at least 2".into()],
        );
        assert_eq!(d.message(), "Invalid arguments to (g), got 1, expected at least 2");
        assert_eq!(render("({}) and ({})", &["a".into()]), "(a) and (?)");
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in DiagnosticKind::iter() {
            assert_eq!(DiagnosticKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(DiagnosticKind::parse("nope"), None);
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!("Warning".parse::<Severity>(), Ok(Severity::Warning));
        assert!("loud".parse::<Severity>().is_err());
    }

    #[test]
    fn test_result_failures() {
        let mut result = CheckResult::new();
        assert!(!result.has_failures());
        result.add_diagnostic(Diagnostic::new(DiagnosticKind::UnaryPlus, "f", "m.py", 1, vec![]));
        assert!(!result.has_failures());
        result.add_diagnostic(Diagnostic::new(DiagnosticKind::UnusedLocal, "f", "m.py", 2, vec!["x".into()]));
        assert!(result.has_failures());
        assert!(!result.has_errors());
        assert_eq!(result.count(DiagnosticKind::UnusedLocal), 1);
    }
}
