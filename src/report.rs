//! Output formatting for check results.
//!
//! Supports two output formats:
//! - Pretty: colored terminal output grouped by file
//! - JSON: structured output for programmatic consumption
//!
//! Both render the same list: diagnostics sorted by file, line and message,
//! with exact duplicates removed.

use std::collections::{BTreeMap, HashSet};

use colored::*;
use serde::{Deserialize, Serialize};

use crate::detect::{CheckResult, Diagnostic, Severity};

/// Formats accepted by `--format`.
pub const FORMATS: &[&str] = &["pretty", "json"];

/// Sort and deduplicate the diagnostics of a run.
pub fn prepare(result: &CheckResult) -> Vec<&Diagnostic> {
    let mut sorted: Vec<(&Diagnostic, String)> = result.diagnostics.iter().map(|d| (d, d.message())).collect();
    sorted.sort_by(|(a, am), (b, bm)| (&a.file, a.line, am).cmp(&(&b.file, b.line, bm)));

    let mut seen = HashSet::new();
    sorted
        .into_iter()
        .filter(|(d, _)| seen.insert(d.key()))
        .map(|(d, _)| d)
        .collect()
}

// =============================================================================
// JSON Format
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonReport {
    pub version: String,
    pub modules_checked: usize,
    pub units_checked: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
    pub errors: usize,
    pub warnings: usize,
    pub advisories: usize,
    pub diagnostics: Vec<JsonDiagnostic>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonDiagnostic {
    pub kind: String,
    pub severity: String,
    pub file: String,
    pub line: u32,
    pub unit: String,
    pub message: String,
}

/// Build the JSON report for a run.
pub fn json_report(result: &CheckResult) -> JsonReport {
    let diagnostics = prepare(result);
    let count = |severity: Severity| diagnostics.iter().filter(|d| d.severity() == severity).count();

    JsonReport {
        version: env!("CARGO_PKG_VERSION").to_string(),
        modules_checked: result.modules,
        units_checked: result.units,
        skipped: result.skipped.clone(),
        errors: count(Severity::Error),
        warnings: count(Severity::Warning),
        advisories: count(Severity::Info),
        diagnostics: diagnostics
            .iter()
            .map(|d| JsonDiagnostic {
                kind: d.kind.as_str().to_string(),
                severity: d.severity().to_string(),
                file: d.file.clone(),
                line: d.line,
                unit: d.unit.clone(),
                message: d.message(),
            })
            .collect(),
    }
}

/// Write results in JSON format.
pub fn write_json(result: &CheckResult) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(&json_report(result))?;
    println!("{}", json);
    Ok(())
}

// =============================================================================
// Pretty Format
// =============================================================================

/// Render results in pretty (human-readable) format.
pub fn render_pretty(result: &CheckResult) -> String {
    let diagnostics = prepare(result);
    let mut out = String::new();

    out.push('\n');
    out.push_str(&format!("  {} v{}\n\n", "bytelint".cyan().bold(), env!("CARGO_PKG_VERSION")));

    let mut by_file: BTreeMap<&str, Vec<&Diagnostic>> = BTreeMap::new();
    for d in &diagnostics {
        by_file.entry(d.file.as_str()).or_default().push(d);
    }

    for (file, entries) in &by_file {
        out.push_str(&format!("  {} ({})\n", file.blue().bold(), entries.len()));
        for d in entries {
            out.push_str(&format!(
                "    {} {:<6} {:<24} {}\n",
                severity_tag(d.severity()),
                format!(":{}", d.line).dimmed(),
                d.kind.as_str().dimmed(),
                d.message()
            ));
        }
        out.push('\n');
    }

    if !result.skipped.is_empty() {
        out.push_str(&format!("  {} {}\n\n", "Skipped:".dimmed(), result.skipped.join(", ")));
    }

    out.push_str(&summary_line(result, &diagnostics));
    out.push('\n');
    out
}

/// Write results in pretty (human-readable) format.
pub fn write_pretty(result: &CheckResult) {
    print!("{}", render_pretty(result));
}

fn severity_tag(severity: Severity) -> ColoredString {
    match severity {
        Severity::Error => "ERROR".red(),
        Severity::Warning => "WARN ".yellow(),
        Severity::Info => "INFO ".blue(),
    }
}

fn summary_line(result: &CheckResult, diagnostics: &[&Diagnostic]) -> String {
    let failures = diagnostics.iter().filter(|d| d.severity() != Severity::Info).count();
    let status = if failures == 0 { "✓ PASS".green() } else { "✗ FAIL".red() };
    let plural = if diagnostics.len() != 1 { "s" } else { "" };
    format!(
        "  {}  {} diagnostic{} in {} modules ({} units)\n",
        status,
        diagnostics.len(),
        plural,
        result.modules,
        result.units
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::DiagnosticKind;

    fn diagnostic(kind: DiagnosticKind, file: &str, line: u32, arg: &str) -> Diagnostic {
        Diagnostic::new(kind, "m.f", file, line, vec![arg.to_string()])
    }

    fn sample() -> CheckResult {
        CheckResult {
            diagnostics: vec![
                diagnostic(DiagnosticKind::UnusedLocal, "b.py", 3, "x"),
                diagnostic(DiagnosticKind::UnusedLocal, "a.py", 9, "y"),
                diagnostic(DiagnosticKind::UnusedLocal, "a.py", 2, "z"),
                diagnostic(DiagnosticKind::UnusedLocal, "a.py", 2, "z"),
                diagnostic(DiagnosticKind::UnusedImport, "a.py", 2, "os"),
            ],
            units: 4,
            modules: 2,
            skipped: Vec::new(),
        }
    }

    #[test]
    fn test_prepare_sorts_and_dedups() {
        let result = sample();
        let ordered: Vec<(String, u32)> = prepare(&result).iter().map(|d| (d.file.clone(), d.line)).collect();
        assert_eq!(
            ordered,
            vec![
                ("a.py".to_string(), 2),
                ("a.py".to_string(), 2),
                ("a.py".to_string(), 9),
                ("b.py".to_string(), 3)
            ]
        );
        // same line sorts by message
        assert_eq!(prepare(&result)[0].message(), "Imported module (os) not used");
    }

    #[test]
    fn test_json_report() {
        let report = json_report(&sample());
        assert_eq!(report.diagnostics.len(), 4);
        assert_eq!(report.warnings, 4);
        assert_eq!(report.errors, 0);
        assert_eq!(report.diagnostics[0].kind, "unused_import");

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"modules_checked\":2"));
        assert!(!json.contains("skipped"));
    }

    #[test]
    fn test_pretty_groups_by_file() {
        colored::control::set_override(false);
        let text = render_pretty(&sample());
        let a = text.find("a.py (3)").unwrap();
        let b = text.find("b.py (1)").unwrap();
        assert!(a < b);
        assert!(text.contains("Local variable (x) not used"));
        assert!(text.contains("4 diagnostics in 2 modules (4 units)"));

        let clean = render_pretty(&CheckResult::new());
        assert!(clean.contains("PASS"));
    }
}
