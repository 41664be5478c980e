//! VaultPilot CLI, the main entry point.
//!
//! Commands:
//! - `chat`    Send a message (or start an interactive session) against the vault
//! - `tools`   List the tools the model would be offered
//! - `skills`  List the skills in the configured skills directory
//! - `config`  Create, show or validate the configuration file

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "vaultpilot",
    about = "VaultPilot: a tool-using assistant for Markdown note vaults",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override the vault root from the config file
    #[arg(long, global = true, env = "VAULTPILOT_VAULT")]
    vault: Option<std::path::PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the assistant
    Chat(commands::chat::ChatArgs),

    /// List available tools
    Tools {
        /// Leave out the built-in vault tools
        #[arg(long)]
        external_only: bool,
    },

    /// List available skills
    Skills,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default config file if none exists
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
    /// Check the configuration for errors
    Validate,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let logs = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        logs.json().init();
    } else {
        logs.init();
    }

    let vault = cli.vault;
    match cli.command {
        Commands::Chat(args) => commands::chat::run(args, vault).await?,
        Commands::Tools { external_only } => commands::tools::list(vault, !external_only).await?,
        Commands::Skills => commands::tools::skills(vault).await?,
        Commands::Config { action } => match action {
            ConfigAction::Init { force } => commands::config_cmd::init(force)?,
            ConfigAction::Show => commands::config_cmd::show()?,
            ConfigAction::Validate => commands::config_cmd::validate()?,
            ConfigAction::Path => commands::config_cmd::path(),
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn chat_flags_parse() {
        let cli = Cli::try_parse_from([
            "vaultpilot",
            "chat",
            "-m",
            "tidy my inbox",
            "--skill",
            "daily-review",
            "--skill",
            "weekly",
            "--max-iterations",
            "3",
            "--no-tools",
        ])
        .unwrap();
        let Commands::Chat(args) = cli.command else {
            panic!("expected chat");
        };
        assert_eq!(args.message.as_deref(), Some("tidy my inbox"));
        assert_eq!(args.skills, vec!["daily-review", "weekly"]);
        assert_eq!(args.max_iterations, Some(3));
        assert!(args.no_tools);
        assert!(!args.yes);
    }

    #[test]
    fn log_json_is_global() {
        let cli = Cli::try_parse_from(["vaultpilot", "tools", "--log-json"]).unwrap();
        assert!(cli.log_json);
        assert!(!cli.verbose);
    }

    #[test]
    fn config_requires_an_action() {
        assert!(Cli::try_parse_from(["vaultpilot", "config"]).is_err());
    }
}
