mod cli;
mod output;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::site::Lifecycle;
use cli::{Cli, Command, CredentialsAction, HostsAction, RecordsAction};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .without_time()
        .init();

    match cli.command {
        Command::Init => {
            cli::init::run(&cli.config, &cli.inventory)?;
        }

        Command::Detect { json } => {
            let settings = cli::load_settings(&cli.config)?;
            cli::detect::run(&settings, json).await?;
        }

        Command::Render {
            domain,
            kind,
            tls,
            out,
        } => {
            let settings = cli::load_settings(&cli.config)?;
            let store = cli::open_store(&settings, &cli.inventory)?;
            cli::render::run(&settings, &store, &domain, kind, tls, out.as_deref())?;
        }

        Command::Deploy { domain } => {
            let orchestrator = cli::orchestrator(cli::load_settings(&cli.config)?, &cli.inventory)?;
            cli::site::run(&orchestrator, &domain, Lifecycle::Deploy).await?;
        }

        Command::Update { domain } => {
            let orchestrator = cli::orchestrator(cli::load_settings(&cli.config)?, &cli.inventory)?;
            cli::site::run(&orchestrator, &domain, Lifecycle::Update).await?;
        }

        Command::Restart { domain } => {
            let orchestrator = cli::orchestrator(cli::load_settings(&cli.config)?, &cli.inventory)?;
            cli::site::run(&orchestrator, &domain, Lifecycle::Restart).await?;
        }

        Command::Delete { domain, yes } => {
            let orchestrator = cli::orchestrator(cli::load_settings(&cli.config)?, &cli.inventory)?;
            cli::site::delete(&orchestrator, &domain, yes).await?;
        }

        Command::Status { domain } => {
            let orchestrator = cli::orchestrator(cli::load_settings(&cli.config)?, &cli.inventory)?;
            cli::site::status(&orchestrator, &domain).await?;
        }

        Command::Hosts { action } => {
            let orchestrator = cli::orchestrator(cli::load_settings(&cli.config)?, &cli.inventory)?;
            match action {
                HostsAction::Check { host } => {
                    cli::hosts::check(&orchestrator, host.as_deref()).await?;
                }
                HostsAction::List => {
                    cli::hosts::list(orchestrator.store().as_ref())?;
                }
            }
        }

        Command::Credentials { action } => {
            let orchestrator = cli::orchestrator(cli::load_settings(&cli.config)?, &cli.inventory)?;
            match action {
                CredentialsAction::Activate { host, credential } => {
                    cli::hosts::activate(&orchestrator, &host, &credential).await?;
                }
            }
        }

        Command::Records { action } => match action {
            RecordsAction::Show {
                domain,
                lines,
                json,
            } => {
                let settings = cli::load_settings(&cli.config)?;
                let store = cli::open_store(&settings, &cli.inventory)?;
                cli::records::show(&store, &domain, lines, json)?;
            }
            RecordsAction::Reset { domain, yes } => {
                let orchestrator = cli::orchestrator(cli::load_settings(&cli.config)?, &cli.inventory)?;
                cli::records::reset(&orchestrator, &domain, yes).await?;
            }
        },
    }

    Ok(())
}
