use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "vfs")]
#[command(about = "Watch a directory tree and manage item properties and locks", long_about = None)]
struct Cli {
    /// TOML file with watcher settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Additional exclude pattern (repeatable)
    #[arg(long = "exclude", global = true)]
    excludes: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print watcher events as JSON lines until interrupted
    Watch {
        root: PathBuf,

        /// Print resolved items instead of raw events
        #[arg(long)]
        items: bool,
    },
    /// List the items inside a folder
    Ls {
        root: PathBuf,
        #[arg(default_value = "/")]
        path: String,
    },
    /// Search indexed files by path substring
    Search { root: PathBuf, pattern: String },
    /// Read or change item properties
    Props {
        #[command(subcommand)]
        command: PropsCommand,
    },
    /// Lock a file and print the lock token
    Lock {
        root: PathBuf,
        path: String,

        /// Lock lifetime in milliseconds; 0 never expires
        #[arg(long, default_value_t = 0)]
        timeout_ms: u64,
    },
    /// Remove a lock
    Unlock {
        root: PathBuf,
        path: String,
        token: String,
    },
    /// Copy an item into a folder
    Cp {
        root: PathBuf,
        source: String,
        parent: String,

        /// Name of the copy; defaults to the source name
        #[arg(long)]
        name: Option<String>,

        /// Replace an existing item at the target
        #[arg(long)]
        overwrite: bool,
    },
    /// Move or rename an item
    Mv {
        root: PathBuf,
        source: String,
        parent: String,

        /// New name; defaults to the source name
        #[arg(long)]
        name: Option<String>,

        /// Replace an existing item at the target
        #[arg(long)]
        overwrite: bool,

        /// Lock token of a locked file
        #[arg(long)]
        token: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum PropsCommand {
    /// Print all properties, or one
    Get {
        root: PathBuf,
        path: String,
        name: Option<String>,
    },
    /// Set a property; omitting the value removes it
    Set {
        root: PathBuf,
        path: String,
        name: String,
        value: Option<String>,

        /// Lock token of a locked file
        #[arg(long)]
        token: Option<String>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let options = commands::Options::load(cli.config.as_deref(), cli.excludes)?;

    match cli.command {
        Command::Watch { root, items } => commands::watch(&options, root, items).await,
        Command::Ls { root, path } => commands::list(&options, root, &path).await,
        Command::Search { root, pattern } => commands::search(&options, root, &pattern),
        Command::Props { command } => match command {
            PropsCommand::Get { root, path, name } => {
                commands::props_get(&options, root, &path, name.as_deref()).await
            }
            PropsCommand::Set {
                root,
                path,
                name,
                value,
                token,
            } => commands::props_set(&options, root, &path, &name, value, token.as_deref()).await,
        },
        Command::Lock {
            root,
            path,
            timeout_ms,
        } => commands::lock(&options, root, &path, timeout_ms).await,
        Command::Unlock { root, path, token } => {
            commands::unlock(&options, root, &path, &token).await
        }
        Command::Cp {
            root,
            source,
            parent,
            name,
            overwrite,
        } => commands::copy(&options, root, &source, &parent, name.as_deref(), overwrite).await,
        Command::Mv {
            root,
            source,
            parent,
            name,
            overwrite,
            token,
        } => {
            let target = commands::Target {
                parent: &parent,
                name: name.as_deref(),
                overwrite,
            };
            commands::move_item(&options, root, &source, target, token.as_deref()).await
        }
    }
}
