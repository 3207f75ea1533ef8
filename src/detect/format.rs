//! `%`-style format string checks.
//!
//! A template is split into conversion specifiers and the number of
//! arguments it consumes is compared against the right-hand operand when
//! that operand's size is statically known.

use regex::Regex;

use crate::symbols::ValueType;

use super::stack::{Kind, StackItem};
use super::types::{DiagnosticKind, Finding};

lazy_static::lazy_static! {
    /// One conversion specifier, anchored at a `%`.
    static ref SPEC_PATTERN: Regex = Regex::new(
        r"%(?:\(([^)]*)\))?([#0 +\-]*)(\*|\d+)?(?:\.(\*|\d*))?[hlL]?(.?)"
    ).unwrap();
}

const CONVERSIONS: &str = "diouxXeEfFgGcrs";

/// One parsed conversion specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSpec {
    /// Mapping key of `%(name)s` specifiers.
    pub name: Option<String>,
    pub width_star: bool,
    pub precision_star: bool,
    pub conversion: char,
}

/// Why a template cannot be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Malformed specifier; carries the text where it starts.
    Invalid(String),
    /// Named and positional specifiers mixed.
    Mixed,
    /// `*` width or precision together with named specifiers.
    StarWithMapping(String),
}

/// Split a template into its specifiers. `%%` escapes are ignored.
pub fn parse_format(template: &str) -> Result<Vec<FormatSpec>, FormatError> {
    let stripped = template.replace("%%", "");
    let mut specs = Vec::new();
    let mut pos = 0;

    while let Some(found) = stripped[pos..].find('%') {
        let start = pos + found;
        let near: String = stripped[start..].chars().take(10).collect();
        let caps = SPEC_PATTERN
            .captures_at(&stripped, start)
            .filter(|c| c.get(0).map_or(false, |m| m.start() == start))
            .ok_or_else(|| FormatError::Invalid(near.clone()))?;

        let conversion = caps
            .get(5)
            .and_then(|m| m.as_str().chars().next())
            .filter(|c| CONVERSIONS.contains(*c))
            .ok_or_else(|| FormatError::Invalid(near.clone()))?;

        specs.push(FormatSpec {
            name: caps.get(1).map(|m| m.as_str().to_string()),
            width_star: caps.get(3).map_or(false, |m| m.as_str() == "*"),
            precision_star: caps.get(4).map_or(false, |m| m.as_str() == "*"),
            conversion,
        });
        pos = caps.get(0).map_or(start + 1, |m| m.end());
        if specs.last().map_or(false, |s| s.name.is_some() && (s.width_star || s.precision_star)) {
            return Err(FormatError::StarWithMapping(near));
        }
    }

    let named = specs.iter().filter(|s| s.name.is_some()).count();
    if named > 0 && named < specs.len() {
        return Err(FormatError::Mixed);
    }
    if named > 0 {
        if let Some(spec) = specs.iter().find(|s| s.width_star || s.precision_star) {
            return Err(FormatError::StarWithMapping(format!("%{}", spec.conversion)));
        }
    }
    Ok(specs)
}

/// Positional arguments a template consumes.
pub fn required_args(specs: &[FormatSpec]) -> usize {
    specs
        .iter()
        .filter(|s| s.name.is_none())
        .map(|s| 1 + s.width_star as usize + s.precision_star as usize)
        .sum()
}

/// What is statically known about a format operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatArgs {
    Tuple(usize),
    Mapping,
    Single,
    Unknown,
}

impl FormatArgs {
    pub fn of(item: &StackItem) -> Self {
        // only literals and built aggregates have a trustworthy shape
        if item.kind != Kind::Constant {
            return FormatArgs::Unknown;
        }
        match item.value_type {
            Some(ValueType::Tuple) => FormatArgs::Tuple(item.length as usize),
            Some(ValueType::Dict) => FormatArgs::Mapping,
            Some(_) => FormatArgs::Single,
            None => FormatArgs::Unknown,
        }
    }
}

/// Check `template % args`.
pub fn check_format(template: &str, args: &StackItem) -> Option<Finding> {
    let specs = match parse_format(template) {
        Ok(specs) => specs,
        Err(FormatError::Invalid(near)) => {
            return Some(Finding::new(DiagnosticKind::InvalidFormat, [near]))
        }
        Err(FormatError::Mixed) => return Some(Finding::new(DiagnosticKind::MixedFormat, Vec::<String>::new())),
        Err(FormatError::StarWithMapping(near)) => {
            return Some(Finding::new(DiagnosticKind::FormatStarWithMapping, [near]))
        }
    };

    let supplied = FormatArgs::of(args);
    let uses_mapping = specs.iter().any(|s| s.name.is_some());
    if uses_mapping {
        return match supplied {
            FormatArgs::Tuple(_) | FormatArgs::Single => {
                Some(Finding::new(DiagnosticKind::FormatNeedsMapping, Vec::<String>::new()))
            }
            _ => None,
        };
    }

    let required = required_args(&specs);
    let given = match supplied {
        FormatArgs::Tuple(n) => n,
        FormatArgs::Single | FormatArgs::Mapping => 1,
        FormatArgs::Unknown => return None,
    };
    if required != given {
        return Some(Finding::new(DiagnosticKind::FormatArgCount, [required, given]));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Constant;

    fn tuple(n: usize) -> StackItem {
        StackItem::constant(Constant::Tuple(vec![Constant::Int(0); n]))
    }

    fn string(s: &str) -> StackItem {
        StackItem::constant(Constant::Str(s.to_string()))
    }

    #[test]
    fn test_parse_specs() {
        let specs = parse_format("%-5d of %.*f%% %(x)s").unwrap_err();
        assert_eq!(specs, FormatError::Mixed);

        let specs = parse_format("%-5d of %*.*f 100%%").unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].conversion, 'd');
        assert!(specs[1].width_star && specs[1].precision_star);
        assert_eq!(required_args(&specs), 4);

        let named = parse_format("%(a)s and %(b)r").unwrap();
        assert_eq!(named[1].name.as_deref(), Some("b"));
        assert_eq!(required_args(&named), 0);
    }

    #[test]
    fn test_invalid_templates() {
        assert!(matches!(parse_format("50%"), Err(FormatError::Invalid(_))));
        assert!(matches!(parse_format("%y"), Err(FormatError::Invalid(_))));
        assert!(matches!(
            parse_format("%(a)*d"),
            Err(FormatError::StarWithMapping(_))
        ));
        assert!(parse_format("no specifiers").unwrap().is_empty());
    }

    #[test]
    fn test_count_law() {
        let template = "%d items in %s";
        assert_eq!(check_format(template, &tuple(2)), None);

        let one = check_format(template, &tuple(1)).unwrap();
        assert_eq!(one.kind, DiagnosticKind::FormatArgCount);
        assert_eq!(one.args, vec!["2", "1"]);

        let bare = check_format(template, &string("x")).unwrap();
        assert_eq!(bare.args, vec!["2", "1"]);
    }

    #[test]
    fn test_unknown_operands_are_skipped() {
        assert_eq!(check_format("%d %d", &StackItem::unknown()), None);
        assert_eq!(check_format("%d %d", &StackItem::local("pair", None)), None);
        let call = StackItem::call_return(Some("f".into()), Some(ValueType::Tuple));
        assert_eq!(check_format("%d %d", &call), None);
    }

    #[test]
    fn test_mapping_templates() {
        let dict = StackItem::aggregate(ValueType::Dict, 2, None);
        assert_eq!(check_format("%(a)s %(b)s", &dict), None);
        let finding = check_format("%(a)s", &tuple(1)).unwrap();
        assert_eq!(finding.kind, DiagnosticKind::FormatNeedsMapping);
    }
}
