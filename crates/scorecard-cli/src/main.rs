//! Scorecard CLI
//!
//! Scores an operator against the basic and OLM test suites.

use std::process::ExitCode;

use clap::Parser;

use scorecard_cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            if e.is_usage() {
                eprintln!("Run with --help for the available flags.");
            }
            ExitCode::FAILURE
        }
    }
}
