use clap::Parser;

use caw::cli::{commands, Cli, Command};
use caw::domain::models::{DbMode, Transport};
use caw::infrastructure::config::{CliOverrides, ConfigLoader};
use caw::infrastructure::logging::{self, LogFormat};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    });

    if let Err(e) = dispatch(cli).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let overrides = CliOverrides {
        transport: cli
            .transport
            .as_deref()
            .map(|t| {
                Transport::from_str(t).ok_or_else(|| anyhow::anyhow!("unknown transport: {t}"))
            })
            .transpose()?,
        port: cli.port,
        db_mode: cli
            .db_mode
            .as_deref()
            .map(|m| DbMode::from_str(m).ok_or_else(|| anyhow::anyhow!("unknown db mode: {m}")))
            .transpose()?,
        repo_path: cli.repo_path.clone(),
    };

    match cli.command {
        Command::Init => commands::init(&overrides).await,
        Command::Workflow { command } => {
            let config = ConfigLoader::load(&overrides)?;
            commands::workflow(command, &config).await
        }
        Command::Task { command } => {
            let config = ConfigLoader::load(&overrides)?;
            commands::task(command, &config).await
        }
        Command::Session { command } => {
            let config = ConfigLoader::load(&overrides)?;
            commands::session(command, &config).await
        }
        Command::Run { workflow_id, cycle } => {
            let config = ConfigLoader::load(&overrides)?;
            commands::run(&workflow_id, cycle.as_deref(), &config).await
        }
    }
}
