//! Code units: the decoding targets handed over by the program loader.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::symbols::ValueType;

/// What kind of body a code unit holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Module,
    Class,
    #[default]
    Function,
    Method,
    Lambda,
}

impl UnitKind {
    /// Module and class bodies run once at definition time.
    pub fn is_definition_body(&self) -> bool {
        matches!(self, UnitKind::Module | UnitKind::Class)
    }
}

/// A literal from a unit's constant pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Complex(f64, f64),
    Str(String),
    Unicode(String),
    Tuple(Vec<Constant>),
    Code(Box<CodeUnit>),
}

impl Constant {
    pub fn value_type(&self) -> ValueType {
        match self {
            Constant::None => ValueType::None,
            Constant::Bool(_) => ValueType::Bool,
            Constant::Int(_) => ValueType::Int,
            Constant::Float(_) => ValueType::Float,
            Constant::Complex(..) => ValueType::Complex,
            Constant::Str(_) => ValueType::Str,
            Constant::Unicode(_) => ValueType::Unicode,
            Constant::Tuple(_) => ValueType::Tuple,
            Constant::Code(_) => ValueType::Code,
        }
    }

    /// String payload of `str`/`unicode` constants.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Constant::Str(s) | Constant::Unicode(s) => Some(s),
            _ => None,
        }
    }

    /// Element count for sized literals.
    pub fn len(&self) -> Option<usize> {
        match self {
            Constant::Str(s) | Constant::Unicode(s) => Some(s.chars().count()),
            Constant::Tuple(items) => Some(items.len()),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Constant::None)
    }

    /// Truth value, when statically obvious.
    pub fn truthy(&self) -> Option<bool> {
        match self {
            Constant::None => Some(false),
            Constant::Bool(b) => Some(*b),
            Constant::Int(i) => Some(*i != 0),
            Constant::Float(f) => Some(*f != 0.0),
            Constant::Complex(re, im) => Some(*re != 0.0 || *im != 0.0),
            Constant::Str(s) | Constant::Unicode(s) => Some(!s.is_empty()),
            Constant::Tuple(items) => Some(!items.is_empty()),
            Constant::Code(_) => None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::None => write!(f, "None"),
            Constant::Bool(true) => write!(f, "True"),
            Constant::Bool(false) => write!(f, "False"),
            Constant::Int(i) => write!(f, "{}", i),
            Constant::Float(x) => write!(f, "{:?}", x),
            Constant::Complex(re, im) => write!(f, "({:?}+{:?}j)", re, im),
            Constant::Str(s) => write!(f, "{:?}", s),
            Constant::Unicode(s) => write!(f, "u{:?}", s),
            Constant::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Constant::Code(code) => write!(f, "<code {}>", code.name),
        }
    }
}

/// Declared parameter list of the function owning a code unit.
///
/// `names` lists every parameter in declaration order, with the `*args`
/// and `**kwargs` names (when present) last, matching the head of the
/// unit's local-variable pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Params {
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub defaults: usize,
    #[serde(default)]
    pub var_args: bool,
    #[serde(default)]
    pub var_kwargs: bool,
}

impl Params {
    pub fn positional(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Number of parameters that can be passed by position.
    pub fn positional_count(&self) -> usize {
        self.names
            .len()
            .saturating_sub(self.var_args as usize + self.var_kwargs as usize)
    }

    pub fn positional_names(&self) -> &[String] {
        &self.names[..self.positional_count()]
    }

    pub fn min_args(&self) -> usize {
        self.positional_count().saturating_sub(self.defaults)
    }

    /// `None` when the function takes `*args`.
    pub fn max_args(&self) -> Option<usize> {
        if self.var_args {
            None
        } else {
            Some(self.positional_count())
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn first(&self) -> Option<&str> {
        self.names.first().map(String::as_str)
    }
}

/// A function, method, lambda, class body, or module body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeUnit {
    pub name: String,
    #[serde(default)]
    pub kind: UnitKind,
    /// Raw instruction bytes.
    #[serde(default)]
    pub code: Vec<u8>,
    /// Local-variable names; parameters come first.
    #[serde(default)]
    pub varnames: Vec<String>,
    #[serde(default)]
    pub consts: Vec<Constant>,
    /// Referenced global/attribute names.
    #[serde(default)]
    pub names: Vec<String>,
    /// Cell variables followed by free variables.
    #[serde(default)]
    pub freevars: Vec<String>,
    #[serde(default)]
    pub first_line: u32,
    /// Compressed line table: pairs of (byte increment, line increment).
    #[serde(default)]
    pub line_table: Vec<u8>,
    #[serde(default)]
    pub params: Params,
}

impl CodeUnit {
    pub fn new(name: &str, kind: UnitKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            code: Vec::new(),
            varnames: Vec::new(),
            consts: Vec::new(),
            names: Vec::new(),
            freevars: Vec::new(),
            first_line: 1,
            line_table: Vec::new(),
            params: Params::default(),
        }
    }

    pub fn is_lambda(&self) -> bool {
        self.kind == UnitKind::Lambda || self.name == "<lambda>"
    }

    /// Nested code units in the constant pool.
    pub fn nested_units(&self) -> impl Iterator<Item = &CodeUnit> {
        self.consts.iter().filter_map(|c| match c {
            Constant::Code(code) => Some(code.as_ref()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_bounds() {
        let params = Params {
            names: vec!["a".into(), "b".into(), "c".into(), "rest".into()],
            defaults: 1,
            var_args: true,
            var_kwargs: false,
        };
        assert_eq!(params.positional_count(), 3);
        assert_eq!(params.min_args(), 2);
        assert_eq!(params.max_args(), None);
        assert_eq!(params.positional_names(), &["a", "b", "c"]);

        let fixed = Params::positional(&["x", "y"]);
        assert_eq!(fixed.max_args(), Some(2));
        assert_eq!(fixed.first(), Some("x"));
    }

    #[test]
    fn constant_display_and_truth() {
        let t = Constant::Tuple(vec![Constant::Int(1)]);
        assert_eq!(t.to_string(), "(1,)");
        assert_eq!(t.len(), Some(1));
        assert_eq!(Constant::Str(String::new()).truthy(), Some(false));
        assert_eq!(Constant::Int(3).value_type(), ValueType::Int);
    }

    #[test]
    fn constant_json_shape() {
        let c: Constant = serde_json::from_str(r#"{"str": "%d"}"#).unwrap();
        assert_eq!(c, Constant::Str("%d".into()));
        let n: Constant = serde_json::from_str(r#""none""#).unwrap();
        assert!(n.is_none());
    }
}
