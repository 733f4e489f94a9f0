use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "action_web", version, about = "Local web console for running actions")]
pub struct Cli {
    /// Install root holding actions/, conf/, data/, instance/ and logs/
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the web server (in the background unless --foreground)
    Start {
        /// Run in this terminal instead of detaching
        #[arg(long)]
        foreground: bool,

        /// Listen on exactly this port; fail if it is taken
        #[arg(long)]
        port: Option<u16>,
    },
    /// Stop the background web server
    Stop,
    /// Show whether a web server is running
    Status,
    /// Manage API tokens
    #[command(subcommand)]
    Token(TokenCommand),
}

#[derive(Debug, Subcommand)]
pub enum TokenCommand {
    /// Create a token and print it once
    Create {
        name: String,

        /// Random bytes in the token (hex encoded, so twice as many characters)
        #[arg(long)]
        size: Option<usize>,

        /// Lifetime such as 12h, 30d, 2w, 6m or 1y; 0 never expires
        #[arg(long, default_value = "30d")]
        expires_in: String,
    },
    /// List tokens
    List,
    /// Deactivate a token by name or value
    Revoke { name: String },
    /// Remove a token by name or value
    Delete { name: String },
    /// Revoke expired tokens and remove inactive ones
    Purge,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_with_pinned_port() {
        let cli = Cli::try_parse_from(["action_web", "--home", "/tmp/aw", "start", "--port", "9000"])
            .unwrap();
        assert_eq!(cli.home, Some(PathBuf::from("/tmp/aw")));
        assert!(matches!(
            cli.command,
            Command::Start { foreground: false, port: Some(9000) }
        ));
    }

    #[test]
    fn token_create_defaults_to_thirty_days() {
        let cli = Cli::try_parse_from(["action_web", "token", "create", "ci"]).unwrap();
        match cli.command {
            Command::Token(TokenCommand::Create { name, size, expires_in }) => {
                assert_eq!(name, "ci");
                assert_eq!(size, None);
                assert_eq!(expires_in, "30d");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
