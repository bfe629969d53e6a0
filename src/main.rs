use anyhow::Result;
use clap::Parser;

use sonar_cli::cli::{self, Cli};
use sonar_cli::error::{categorize_error, format_cli_error};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Err(err) = cli::execute(cli).await {
        eprintln!("{}", format_cli_error(&err));
        tracing::error!(category = %categorize_error(&err).code(), error = %err, "command failed");
        std::process::exit(1);
    }

    Ok(())
}
