use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    cryptid::logging::init().context("init logging")?;

    let cli = cryptid::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        cryptid::cli::Command::Plot(args) => {
            cryptid::studio::plot(args).await.context("plot")?;
        }
        cryptid::cli::Command::Draft(args) => {
            cryptid::studio::draft(args).await.context("draft")?;
        }
        cryptid::cli::Command::Illustrate(args) => {
            cryptid::studio::illustrate(args).await.context("illustrate")?;
        }
        cryptid::cli::Command::Render(args) => {
            cryptid::studio::render(args).await.context("render")?;
        }
    }

    Ok(())
}
