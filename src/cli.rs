//! Command-line interface for bytelint.

use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::bytecode::{disassemble, CodeUnit};
use crate::config::{self, Config, OptionKind, OPTIONS};
use crate::detect::Runner;
use crate::report;
use crate::symbols::ProgramSymbolTable;

/// Exit codes.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_ERROR: i32 = 2;

/// Static defect detection for compiled stack bytecode.
///
/// Bytelint walks the compiled instruction stream of every module, class and
/// function of a program model and reports likely bugs: bad argument counts,
/// unknown attributes, unused names, dead code, malformed format strings and
/// excessive complexity.
#[derive(Parser)]
#[command(name = "bytelint")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a program model
    #[command(visible_alias = "lint")]
    Check(CheckArgs),
    /// Print the decoded instructions of a program's code units
    Disasm(DisasmArgs),
    /// List every option with its current value
    Options(OptionsArgs),
}

/// Arguments for the check command.
#[derive(Parser)]
pub struct CheckArgs {
    /// Program model JSON file, or a directory of them
    pub path: PathBuf,

    /// Path to config YAML file (default: auto-discover)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Option token applied on top of the config, e.g. `no-objattrs` or `maxlines=100`
    #[arg(short = 'o', long = "option", value_name = "TOKEN")]
    pub options: Vec<String>,

    /// Only check these modules
    #[arg(short, long = "module", value_name = "NAME")]
    pub modules: Vec<String>,

    /// Output format: pretty or json
    #[arg(short, long, default_value = "pretty")]
    pub format: String,
}

/// Arguments for the disasm command.
#[derive(Parser)]
pub struct DisasmArgs {
    /// Program model JSON file, or a directory of them
    pub path: PathBuf,

    /// Only disassemble this module
    #[arg(short, long)]
    pub module: Option<String>,

    /// Only disassemble units with this name (`func`, `Class.method` or fully qualified)
    #[arg(short, long)]
    pub unit: Option<String>,
}

/// Arguments for the options command.
#[derive(Parser)]
pub struct OptionsArgs {
    /// Path to config YAML file (default: auto-discover)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Tracing filter directive for a `-v` count.
pub fn log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    }
}

/// Load the config from `explicit`, or discover one in the current directory.
fn load_config(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => Config::discover(Path::new(".")),
    };
    let config = match path {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            Config::parse_file(&path)
                .map_err(|e| anyhow::anyhow!("error parsing config {}: {}", path.display(), e))?
        }
        None => Config::default(),
    };
    Ok(config)
}

/// Load a program model file, or every `*.json` model under a directory.
pub fn load_program(path: &Path) -> anyhow::Result<ProgramSymbolTable> {
    let metadata = std::fs::metadata(path).map_err(|e| anyhow::anyhow!("cannot access {}: {}", path.display(), e))?;
    if !metadata.is_dir() {
        return ProgramSymbolTable::from_json_file(path);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).follow_links(true).sort_by_file_name() {
        let entry = entry?;
        let is_json = entry.path().extension().and_then(|e| e.to_str()) == Some("json");
        if entry.file_type().is_file() && is_json {
            files.push(entry.into_path());
        }
    }
    if files.is_empty() {
        anyhow::bail!("no program models found under {}", path.display());
    }

    let mut table = ProgramSymbolTable::new();
    for file in &files {
        debug!(file = %file.display(), "loading program model");
        for (_, module) in ProgramSymbolTable::from_json_file(file)?.modules {
            table.insert(module);
        }
    }
    // bases may live in another file
    table.finalize();
    Ok(table)
}

/// Run the check command.
pub fn run_check(args: &CheckArgs) -> anyhow::Result<i32> {
    // Validate format
    if !report::FORMATS.contains(&args.format.as_str()) {
        eprintln!("Error: invalid format {:?}, must be 'pretty' or 'json'", args.format);
        return Ok(EXIT_ERROR);
    }

    let mut config = match load_config(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(EXIT_ERROR);
        }
    };

    // Command-line tokens win over the file
    for token in &args.options {
        if let Err(e) = config.apply_token(token) {
            eprintln!("Error: {}", e);
            return Ok(EXIT_ERROR);
        }
    }

    if let Err(e) = config::validate(&config) {
        eprintln!("Error: invalid config: {}", e);
        return Ok(EXIT_ERROR);
    }

    let table = match load_program(&args.path) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(EXIT_ERROR);
        }
    };
    info!(modules = table.modules.len(), "program loaded");

    let mut runner = Runner::new(&table, &config);
    if !args.modules.is_empty() {
        runner = runner.only_modules(args.modules.iter().cloned());
    }
    let result = runner.run()?;

    match args.format.as_str() {
        "json" => report::write_json(&result)?,
        _ => report::write_pretty(&result),
    }

    if result.has_failures() {
        Ok(EXIT_FAILED)
    } else {
        Ok(EXIT_SUCCESS)
    }
}

/// Top-level units of a program with their qualified names.
fn top_level_units<'a>(table: &'a ProgramSymbolTable, module: Option<&str>) -> Vec<(String, &'a CodeUnit)> {
    let mut units = Vec::new();
    for (name, m) in &table.modules {
        if module.map_or(false, |only| only != name) {
            continue;
        }
        if let Some(body) = &m.body {
            units.push((name.clone(), body));
        }
        for (fname, f) in &m.functions {
            if let Some(code) = &f.code {
                units.push((format!("{}.{}", name, fname), code));
            }
        }
        for (cname, class) in &m.classes {
            if let Some(body) = &class.body {
                units.push((format!("{}.{}", name, cname), body));
            }
            for (mname, method) in &class.methods {
                if let Some(code) = &method.code {
                    units.push((format!("{}.{}.{}", name, cname, mname), code));
                }
            }
        }
    }
    units
}

/// Run the disasm command.
pub fn run_disasm(args: &DisasmArgs) -> anyhow::Result<i32> {
    let table = match load_program(&args.path) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(EXIT_ERROR);
        }
    };

    let units: Vec<_> = top_level_units(&table, args.module.as_deref())
        .into_iter()
        .filter(|(qualified, _)| match &args.unit {
            Some(unit) => qualified == unit || qualified.ends_with(&format!(".{}", unit)),
            None => true,
        })
        .collect();

    if units.is_empty() {
        eprintln!("Error: no matching code units");
        return Ok(EXIT_ERROR);
    }

    let mut status = EXIT_SUCCESS;
    for (qualified, unit) in units {
        println!("== {} ==", qualified);
        match disassemble(unit) {
            Ok(text) => print!("{}", text),
            Err(e) => {
                eprintln!("Error: {}: {}", qualified, e);
                status = EXIT_FAILED;
            }
        }
    }
    Ok(status)
}

/// Run the options command.
pub fn run_options(args: &OptionsArgs) -> anyhow::Result<i32> {
    let config = match load_config(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(EXIT_ERROR);
        }
    };

    println!("Options (use as `--option TOKEN` or in a __bytelint__ directive):");
    println!();
    for spec in OPTIONS {
        let token = match spec.kind {
            OptionKind::Switch => format!("[no-]{}", spec.name),
            OptionKind::Number => format!("{}=N", spec.name),
            OptionKind::Text => format!("{}=NAME", spec.name),
            OptionKind::List => format!("{}=a,b", spec.name),
        };
        println!("  {:<22} {:<14} {}", token, config.value_of(spec), spec.help);
    }

    Ok(EXIT_SUCCESS)
}
