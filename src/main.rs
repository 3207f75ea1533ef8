//! Bytelint CLI entry point.

use clap::Parser;
use bytelint::cli::{self, Cli, Commands, EXIT_ERROR};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli::log_level(cli.verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let outcome = match &cli.command {
        Commands::Check(args) => cli::run_check(args),
        Commands::Disasm(args) => cli::run_disasm(args),
        Commands::Options(args) => cli::run_options(args),
    };

    let exit_code = match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_ERROR
        }
    };

    std::process::exit(exit_code);
}
