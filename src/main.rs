use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::error;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use tokio::runtime::Runtime;

use adhound::cli::Args;
use adhound::context::{connection_options, RunContext};
use adhound::ldap::Ldap3Client;
use adhound::links;

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = initialize_logging(&args) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize terminal logging at the requested verbosity.
fn initialize_logging(args: &Args) -> Result<()> {
    TermLogger::init(
        args.log_level(),
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("Failed to initialize logger")
}

/// Build the run context and drive the chain to completion. Returns false
/// when the run faulted, which maps to a non-zero exit code.
fn run(args: &Args) -> Result<bool> {
    let client = Arc::new(Ldap3Client::new(connection_options(args)));
    let mut ctx = RunContext::new(args, client)?;

    let runtime = Runtime::new().context("Failed to create Tokio runtime")?;
    runtime.block_on(links::run_chain(&mut ctx));

    Ok(!ctx.is_faulted)
}
