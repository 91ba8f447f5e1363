mod chooser;
mod cmd_chat;
mod cmd_config;
mod config;
mod render;

use clap::{Parser, Subcommand};
use shellchat_store::StorePaths;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Log filter variable, e.g. `SHELLCHAT_LOG=shellchat_runner=debug`.
const LOG_ENV: &str = "SHELLCHAT_LOG";

#[derive(Parser)]
#[command(
    name = "shellchat",
    version,
    about = "Chat with an assistant and run the shell commands it suggests",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    /// Send a single message, print the reply and exit
    message: Vec<String>,
    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start an interactive session (the default)
    Chat {
        /// Resume a session saved with !save
        #[arg(long)]
        load: Option<PathBuf>,
    },
    /// Manage settings in the store's config.json
    Config {
        #[command(subcommand)]
        cmd: cmd_config::ConfigCmd,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let paths = StorePaths::discover();

    match cli.cmd {
        Some(Command::Config { cmd }) => cmd_config::run(cmd, &paths),
        Some(Command::Chat { load }) => cmd_chat::interactive(&paths, load.as_deref()),
        None if !cli.message.is_empty() => cmd_chat::single(&paths, &cli.message.join(" ")),
        None => cmd_chat::interactive(&paths, None),
    }
}
