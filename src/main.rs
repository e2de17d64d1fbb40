use std::process;

use clap::Parser;
use colored::Colorize;
use metamer::{cli::Cli, commands};

/// Initialize the tracing subscriber with environment filter.
///
/// Set `RUST_LOG=metamer=debug` to see debug output.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    if let Err(e) = commands::run(cli) {
        eprintln!("{} {}", "Fatal error:".red().bold(), e);
        process::exit(1);
    }
}
