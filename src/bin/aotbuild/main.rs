//! aotbuild CLI - ahead-of-time compile managed sources to native code

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use aotbuild::util::shell::Shell;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    match run() {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    // Parse CLI
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("aotbuild=debug")
    } else {
        EnvFilter::new("aotbuild=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let shell = Shell::from_flags(cli.quiet, cli.verbose, cli.color);

    // Execute command
    match cli.command {
        Commands::Build(args) => commands::build::execute(args, &shell),
        Commands::Il(args) => commands::il::execute(args, &shell),
        Commands::Linkplan(args) => commands::linkplan::execute(args, &shell),
        Commands::Completions(args) => commands::completions::execute(args),
    }
}
