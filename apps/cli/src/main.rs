//! dbt-docgen CLI: generate model documentation for a dbt project.
//!
//! Reads the compiled manifest, asks a language model for documentation,
//! writes doc blocks and points each model's schema entry at its block.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
