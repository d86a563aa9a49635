use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

use episode_grabber::cli::{Cli, Command};
use episode_grabber::commands;
use episode_grabber::config::Config;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    episode_grabber::logging::init(cli.verbose).context("init logging")?;
    tracing::debug!(?cli, "parsed cli");

    let config = Config::load(&cli.config)?;
    tracing::debug!(
        path = %cli.config.display(),
        mappings = config.mappings.len(),
        "loaded config"
    );

    match cli.command {
        Command::Run => commands::run(config).await.context("run")?,
        Command::Once(args) => commands::once(config, args).await.context("once")?,
        Command::Check => commands::check(&config).context("check")?,
        Command::History(args) => commands::history(&config, args).await.context("history")?,
    }

    Ok(())
}
