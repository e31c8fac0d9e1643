//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod conversation;
pub mod history;
pub mod replay;


use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::debug;

use crate::cli::conversation::{edit_message, open_conversation};
use crate::cli::history::{delete_conversation, format_listing, list_conversations, show_conversation};
use crate::cli::replay::run_replay;
use crate::core::config::Config;
use crate::core::outline::render_conversation;
use crate::core::persistence::HttpBackend;
use crate::core::store::ConversationStore;
use crate::utils::logging::init_tracing;

const VERBOSE_LOG_FILTER: &str = "forkchat=debug";

#[derive(Parser)]
#[command(name = "forkchat", version)]
#[command(about = "Inspect, replay and edit branching chat conversations")]
#[command(
    long_about = "Forkchat keeps chat histories as trees: every edit or regenerated reply \
starts a new branch instead of overwriting the old one.\n\n\
Backend:\n\
  Commands that talk to a chat backend need both of these set:\n\
    forkchat set backend-url http://localhost:35005\n\
    forkchat set client-id <ID>\n\n\
Environment Variables:\n\
  RUST_LOG          Overrides the configured log filter"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Read and write this config file instead of the platform default
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Write diagnostics to this file instead of stderr
    #[arg(short = 'l', long, global = true, value_name = "FILE")]
    pub log: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Rebuild conversations from a JSON Lines file of chat events
    Replay {
        /// File with one `conversation-new` or `conversation-load` event per line
        events: PathBuf,
        /// Also write the active branch as a plain-text transcript
        #[arg(long, value_name = "FILE")]
        transcript: Option<PathBuf>,
    },
    /// Fetch a stored conversation and show its tree
    Open { conversation_id: String },
    /// Replace the content of a stored message
    Edit {
        conversation_id: String,
        message_id: String,
        /// New content (multiple words are joined with spaces)
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        content: Vec<String>,
    },
    /// Browse conversations stored by the backend
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },
    /// Set configuration values
    Set {
        /// Configuration key to set
        key: String,
        /// Value to set for the key (prints the configuration when omitted)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
    /// Unset configuration values
    Unset {
        /// Configuration key to unset
        key: String,
    },
    /// Print the current configuration
    Config,
}

#[derive(Subcommand)]
pub enum HistoryCommands {
    /// List stored conversations
    List,
    /// Print one stored conversation as a tree
    Show { conversation_id: String },
    /// Delete a stored conversation
    Delete { conversation_id: String },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let (mut config, config_path) = Config::load(args.config.as_deref())?;

    let filter = if args.verbose {
        VERBOSE_LOG_FILTER
    } else {
        config.log_filter_or_default()
    };
    init_tracing(filter, args.log.as_deref())?;
    debug!(config = %config_path.display(), "configuration loaded");

    match args.command {
        Commands::Replay { events, transcript } => {
            run_replay(&events, transcript.as_deref()).await
        }
        Commands::Open { conversation_id } => {
            let backend = build_backend(&config)?;
            let mut store = ConversationStore::new();
            if let Err(err) = open_conversation(&mut store, &backend, &conversation_id).await {
                eprintln!("❌ Could not open {conversation_id}: {err}");
                std::process::exit(1);
            }
            print_active(&store);
            Ok(())
        }
        Commands::Edit {
            conversation_id,
            message_id,
            content,
        } => {
            let backend = build_backend(&config)?;
            let mut store = ConversationStore::new();
            let content = content.join(" ");
            match edit_message(&mut store, &backend, &conversation_id, &message_id, &content).await
            {
                Ok(()) => println!("✅ Updated message {message_id}"),
                Err(err) => {
                    eprintln!("❌ Could not save message {message_id}: {err}");
                    std::process::exit(1);
                }
            }
            print_active(&store);
            Ok(())
        }
        Commands::History { command } => {
            let backend = build_backend(&config)?;
            match command {
                HistoryCommands::List => {
                    let history = list_conversations(&backend).await?;
                    print!("{}", format_listing(&history));
                }
                HistoryCommands::Show { conversation_id } => {
                    print!("{}", show_conversation(&backend, &conversation_id).await?);
                }
                HistoryCommands::Delete { conversation_id } => {
                    delete_conversation(&backend, &conversation_id).await?;
                    println!("✅ Deleted conversation {conversation_id}");
                }
            }
            Ok(())
        }
        Commands::Set { key, value } => {
            if value.is_empty() {
                config.print_all();
                return Ok(());
            }
            let value = value.join(" ");
            if let Err(err) = config.set_value(&key, &value) {
                eprintln!("❌ {err}");
                std::process::exit(1);
            }
            save(&config, &config_path)?;
            println!("✅ Set {key} to: {value}");
            Ok(())
        }
        Commands::Unset { key } => {
            if let Err(err) = config.unset_value(&key) {
                eprintln!("❌ {err}");
                std::process::exit(1);
            }
            save(&config, &config_path)?;
            println!("✅ Unset {key}");
            Ok(())
        }
        Commands::Config => {
            config.print_all();
            Ok(())
        }
    }
}

fn build_backend(config: &Config) -> Result<HttpBackend, Box<dyn Error>> {
    let (base_url, client_id) = config.backend().ok_or(
        "No backend configured. Run `forkchat set backend-url <URL>` and `forkchat set client-id <ID>` first.",
    )?;
    Ok(HttpBackend::new(base_url, client_id, config.request_timeout())?)
}

fn save(config: &Config, path: &Path) -> Result<(), Box<dyn Error>> {
    config.save_to_path(path)?;
    debug!(path = %path.display(), "configuration saved");
    Ok(())
}

fn print_active(store: &ConversationStore) {
    if let Some(conversation) = store.get_active_conversation() {
        print!(
            "{}",
            render_conversation(conversation, store.selected_message_id())
        );
    }
}
