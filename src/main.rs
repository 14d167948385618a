//! matchchat - terminal client for match and private-thread chats
//!
//! Talks to the hosted backend over REST and the realtime websocket.

mod api;
mod auth;
mod chat;
mod config;
mod models;
mod realtime;
mod voice;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use models::{ConversationId, MessageKind};

#[derive(Parser)]
#[command(name = "matchchat")]
#[command(about = "Terminal client for match and private chats", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        /// Account email
        #[arg(short, long)]
        email: String,

        /// Ask for the password even if a stored session is still usable
        #[arg(short, long)]
        force: bool,
    },

    /// Clear the stored session
    Logout,

    /// Show session and delivery settings
    Status,

    /// Print the messages of a conversation
    Read {
        /// Conversation (`match:<id>`, `dm:<id>`, or a bare match id)
        conversation: ConversationId,

        /// Maximum number of messages to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Send a text message
    Send {
        /// Conversation to send to
        #[arg(short, long)]
        to: ConversationId,

        /// text or quick_action
        #[arg(short, long, default_value = "text")]
        kind: MessageKind,

        /// Message text
        body: String,
    },

    /// Upload an audio file as a voice message
    SendVoice {
        #[arg(short, long)]
        to: ConversationId,

        /// Audio file (wav, webm, ogg, mp3, m4a)
        #[arg(short, long)]
        file: PathBuf,

        /// Duration in seconds (read from WAV headers when omitted)
        #[arg(short, long)]
        duration: Option<u32>,
    },

    /// Record from the microphone and send it as a voice message
    #[cfg(feature = "audio")]
    Record {
        #[arg(short, long)]
        to: ConversationId,

        /// Recording length
        #[arg(short, long, default_value = "5")]
        seconds: u64,
    },

    /// Show the unread message count
    Unread,

    /// Mark a conversation as read
    MarkRead { conversation: ConversationId },

    /// Open a conversation and chat live
    Watch { conversation: ConversationId },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the conversation.
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match cli.command {
        Commands::Login { email, force } => {
            tracing::info!("Signing in as {}...", email);
            auth::login(&email, force).await?;
        }
        Commands::Logout => {
            auth::logout().await?;
        }
        Commands::Status => {
            auth::status().await?;
        }
        Commands::Read {
            conversation,
            limit,
        } => {
            api::read_messages(&conversation, limit).await?;
        }
        Commands::Send { to, kind, body } => {
            api::send_message(&to, &body, kind).await?;
        }
        Commands::SendVoice { to, file, duration } => {
            tracing::info!("Uploading {}...", file.display());
            api::send_voice_file(&to, &file, duration).await?;
        }
        #[cfg(feature = "audio")]
        Commands::Record { to, seconds } => {
            chat::record(&to, seconds).await?;
        }
        Commands::Unread => {
            api::unread().await?;
        }
        Commands::MarkRead { conversation } => {
            api::mark_read(&conversation).await?;
        }
        Commands::Watch { conversation } => {
            chat::watch(&conversation).await?;
        }
    }

    Ok(())
}
