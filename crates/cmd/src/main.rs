use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use cmd::commands::{self, Command};
use cmd::common;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "studio")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Studio home directory (overrides STUDIO_HOME)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Acting user (overrides STUDIO_USER)
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Configuration file (defaults to <home>/studio.yaml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    diagnostics::init_diagnostics();

    let cli = Cli::parse();
    let home = common::get_home_with_override(cli.home)?;
    let user = common::get_user_with_override(cli.user)?;
    let config = common::load_config(cli.config.as_deref(), &home)?;

    let api = common::open_api(&home, config).await?;
    let response = commands::run(&api, &home, &user, &cli.command).await?;

    common::write_response(&mut std::io::stdout().lock(), &response)?;
    Ok(if response.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
