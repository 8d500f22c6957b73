// ABOUTME: CLI command definitions using clap.
// ABOUTME: Handles subcommands like send, chat, models, extensions and config.

pub mod chat;
pub mod extensions;
pub mod models;
pub mod send;

use clap::{Parser, Subcommand};
use parley_chat::{ChatObserver, MessageId, MessagePart};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "parley", about = "parley - chat with local models", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file path
    #[arg(long, global = true, env = "PARLEY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Model override
    #[arg(long, short, global = true)]
    pub model: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one message and stream the reply to stdout
    Send {
        /// Message to send
        message: String,
    },
    /// Interactive chat session
    Chat,
    /// List models available on the provider
    Models,
    /// Show extensions and the composed plugin table
    Extensions,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
    /// Generate shell completions
    Completion {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Show version
    Version,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Show config file path
    Path,
    /// Write the default configuration if none exists
    Init,
}

/// Streams parts straight to stdout as they arrive
pub struct StdoutObserver;

impl ChatObserver for StdoutObserver {
    fn on_part(&self, _id: MessageId, part: &MessagePart) {
        let mut stdout = std::io::stdout();
        let _ = write!(stdout, "{}", part.content());
        let _ = stdout.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_send_with_global_flags() {
        let cli = Cli::try_parse_from(["parley", "send", "hello there", "--model", "phi3"]).unwrap();
        assert_eq!(cli.model.as_deref(), Some("phi3"));
        match cli.command {
            Command::Send { message } => assert_eq!(message, "hello there"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_config_path() {
        let cli = Cli::try_parse_from(["parley", "--config", "/tmp/p.toml", "config", "path"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/p.toml")));
        assert!(matches!(
            cli.command,
            Command::Config {
                action: Some(ConfigAction::Path)
            }
        ));
    }
}
