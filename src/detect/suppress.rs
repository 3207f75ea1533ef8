//! In-source suppression directives.
//!
//! A store to the name `__bytelint__` is not a real variable. Its string
//! value holds option tokens, for example:
//! - `__bytelint__ = 'no-objattrs maxlines=0'`
//! - `__bytelint__ = '--unusednames=tmp,junk'`
//!
//! The tokens are applied to a copy of the active config. The copy stays in
//! effect for the rest of the unit's walk and for the units walked under it,
//! and is dropped when the unit is done.

use regex::Regex;

use crate::config::Config;

use super::stack::StackItem;
use super::types::{DiagnosticKind, Finding};

/// Assignment target recognised as a directive.
pub const DIRECTIVE_NAME: &str = "__bytelint__";

lazy_static::lazy_static! {
    /// Shape of one directive token: `[--][no-]name[=value]`.
    static ref TOKEN_PATTERN: Regex = Regex::new(r"^(?:--)?(?:no-)?[a-z0-9]+(?:=\S*)?$").unwrap();
}

pub fn is_directive(name: &str) -> bool {
    name == DIRECTIVE_NAME
}

/// Parse a directive's text into a child of `parent`.
///
/// Malformed text yields the finding to report and leaves `parent` as is.
pub fn parse_directive(parent: &Config, text: &str) -> Result<Config, Finding> {
    if let Some(bad) = text.split_whitespace().find(|t| !TOKEN_PATTERN.is_match(t)) {
        return Err(invalid(format!("malformed token {:?}", bad)));
    }
    parent.with_tokens(text).map_err(|e| invalid(e.to_string()))
}

/// Child config for a directive whose value is `value`.
pub fn child_config(parent: &Config, value: &StackItem) -> Result<Config, Finding> {
    match value.str_literal() {
        Some(text) => parse_directive(parent, text),
        None => Err(invalid(format!("value must be a string, got {}", value.display_name()))),
    }
}

fn invalid(reason: String) -> Finding {
    Finding::new(DiagnosticKind::InvalidSuppression, [reason])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Constant;

    #[test]
    fn test_parse_directive() {
        let parent = Config::default();
        let child = parse_directive(&parent, "no-objattrs maxlines=0 --unusednames=tmp,junk").unwrap();
        assert!(!child.obj_attrs);
        assert_eq!(child.max_lines, 0);
        assert_eq!(child.unused_names, vec!["tmp", "junk"]);
        // parent untouched
        assert!(parent.obj_attrs);
    }

    #[test]
    fn test_invalid_directive_is_atomic() {
        let parent = Config::default();
        let err = parse_directive(&parent, "no-objattrs bogus").unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::InvalidSuppression);
        assert!(err.message().contains("bogus"));

        let err = parse_directive(&parent, "maxlines=ten").unwrap_err();
        assert!(err.message().starts_with("Invalid arguments to __bytelint__"));

        assert!(parse_directive(&parent, "No-Objattrs").is_err());
    }

    #[test]
    fn test_non_string_value() {
        let value = StackItem::constant(Constant::Int(3));
        let err = child_config(&Config::default(), &value).unwrap_err();
        assert!(err.message().contains("must be a string"));

        let value = StackItem::constant(Constant::Str("unusedtuple".into()));
        assert!(child_config(&Config::default(), &value).unwrap().unused_tuple);
    }

    #[test]
    fn test_empty_directive_is_a_copy() {
        let parent = Config::default();
        assert_eq!(parse_directive(&parent, "  ").unwrap(), parent);
    }
}
