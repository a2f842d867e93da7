use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;

use codeadvisor::{
    cli_types::{Cli, Commands},
    init_logging, CliApp,
};

const EXIT_FAILED_FILES: u8 = 1;
const EXIT_ACTIONABLE: u8 = 2;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.verbose, cli.log_file.as_deref());

    let app = CliApp::new(cli.config, cli.verbose, !cli.no_color)?;

    match cli.command {
        Commands::Analyze(args) => {
            let result = app.analyze(args).await?;
            if result.has_user_actionable_failures() {
                return Ok(ExitCode::from(EXIT_ACTIONABLE));
            }
            if result.summary.files_failed > 0 {
                return Ok(ExitCode::from(EXIT_FAILED_FILES));
            }
        }
        Commands::Cache(args) => app.cache(args).await?,
        Commands::Config(args) => app.show_config(args).await?,
    }

    Ok(ExitCode::SUCCESS)
}
