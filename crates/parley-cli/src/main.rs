// ABOUTME: Entry point for the parley binary.
// ABOUTME: Parses CLI args, loads config and dispatches to subcommands.

mod builtins;
mod cli;
mod config;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use cli::{Cli, Command, ConfigAction};
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Interactive sessions log to a file so output stays readable
    match cli.command {
        Command::Chat => {
            parley_log::init_file("parley");
        }
        _ => parley_log::init(),
    }

    let config = Config::load(cli.config.as_deref(), cli.model.as_deref())?;
    tracing::debug!(?config, "Loaded configuration");

    match cli.command {
        Command::Send { message } => cli::send::run(&config, &message).await,
        Command::Chat => cli::chat::run(&config).await,
        Command::Models => cli::models::run(&config).await,
        Command::Extensions => cli::extensions::run(&config).await,
        Command::Config { action } => handle_config_command(action, cli.config, &config),
        Command::Completion { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "parley", &mut std::io::stdout());
            Ok(())
        }
        Command::Version => {
            println!("parley {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn handle_config_command(
    action: Option<ConfigAction>,
    path_override: Option<std::path::PathBuf>,
    config: &Config,
) -> Result<()> {
    let path = match path_override {
        Some(path) => path,
        None => Config::config_path()?,
    };

    match action.unwrap_or(ConfigAction::Show) {
        ConfigAction::Show => print!("{}", config.to_toml()?),
        ConfigAction::Path => println!("{}", path.display()),
        ConfigAction::Init => {
            if path.exists() {
                println!("Config already exists at {}", path.display());
            } else {
                Config::default().save_to(&path)?;
                println!("Wrote default config to {}", path.display());
            }
        }
    }
    Ok(())
}
