//! Chat view: message reconciliation and the interactive `watch` loop

pub mod banner;
pub mod engine;
pub mod error;
pub mod notify;
pub mod poller;
pub mod read_markers;
pub mod view;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::api::{client::BaasClient, format_message};
use crate::config::Config;
use crate::models::{ConversationId, MessageKind};
use crate::voice::{self, VoiceClip};

pub use engine::{classify_delivery_state, MessageLog};
pub use error::ChatError;
pub use read_markers::{unread_since, ReadMarkers};
pub use view::{ChatView, Update, ViewSettings};

const HELP: &str = "Commands: /quick <text>, /voice <file> [secs], /rec, /stop, /sound, /poll, /retry, /quit";

/// Mount a conversation and chat in it until `/quit` or Ctrl-C.
pub async fn watch(conversation: &ConversationId) -> Result<()> {
    let config = Config::load()?;
    let client = BaasClient::new().await?;
    let me = client.session().local_profile();
    let markers = ReadMarkers::open_default()?;

    let mut view = ChatView::new(Arc::new(client), conversation.clone(), me, ViewSettings::from(&config))
        .with_markers(markers);
    view.mount().await;

    for msg in view.messages() {
        println!("{}", format_message(msg));
    }
    let unread = view.unread_at_mount();
    if unread > 0 {
        println!("-- {} new since your last visit --", unread);
    }
    if let Some(err) = view.banner() {
        eprintln!("! {}", err);
    }
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line? {
                    Some(l) => l,
                    None => break,
                };
                if !handle_input(&mut view, &line).await {
                    break;
                }
            }
            event = view.next_event() => {
                let Some(event) = event else { break };
                for update in view.apply(event) {
                    render(&view, &update);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    drop(view);
    println!("Left {}", conversation);
    Ok(())
}

/// Handle one line typed by the user. Returns false to leave the view.
async fn handle_input(view: &mut ChatView<BaasClient>, line: &str) -> bool {
    let line = line.trim();
    let (command, rest) = match line.split_once(' ') {
        Some((c, r)) => (c, r.trim()),
        None => (line, ""),
    };

    match command {
        "/quit" | "/q" => return false,
        "/quick" => {
            view.send_text(rest, MessageKind::QuickAction);
        }
        "/voice" => send_voice_file(view, rest),
        "/rec" => {
            if view.start_microphone().is_ok() {
                println!("Recording... /stop to send");
            }
        }
        "/stop" => {
            if let Some(elapsed) = view.recording_elapsed() {
                println!("Recorded {}s", voice::recorded_duration_secs(elapsed));
            }
            let _ = view.stop_recording();
        }
        "/cancel" => view.cancel_recording(),
        "/sound" => {
            let on = view.toggle_sound();
            println!("Sound {}", if on { "on" } else { "off" });
        }
        "/poll" => {
            let realtime = view.toggle_realtime();
            println!("Delivery: {}", if realtime { "push" } else { "polling" });
        }
        "/retry" => {
            if view.load_initial().await.is_ok() {
                for msg in view.messages() {
                    println!("{}", format_message(msg));
                }
            }
        }
        "/help" => println!("{}", HELP),
        _ if command.starts_with('/') => println!("Unknown command. {}", HELP),
        _ => {
            view.send_text(line, MessageKind::Text);
        }
    }

    if let Some(err) = view.banner() {
        eprintln!("! {}", err);
    }
    true
}

fn send_voice_file(view: &mut ChatView<BaasClient>, args: &str) {
    let mut parts = args.split_whitespace();
    let Some(path) = parts.next() else {
        println!("Usage: /voice <file> [secs]");
        return;
    };
    let explicit = parts.next().and_then(|s| s.parse::<u32>().ok());

    match VoiceClip::load(Path::new(path)) {
        Ok(clip) => {
            let secs = explicit
                .or_else(|| clip.wav_duration().map(voice::recorded_duration_secs))
                .unwrap_or(1);
            view.send_voice(clip, secs);
            println!("Sending voice message ({}s)...", secs);
        }
        Err(e) => eprintln!("! {:#}", e),
    }
}

fn render(view: &ChatView<BaasClient>, update: &Update) {
    match update {
        Update::Message { index, fresh } => {
            if let Some(msg) = view.messages().get(*index) {
                let marker = if *fresh { "" } else { "~ " };
                println!("{}{}", marker, format_message(msg));
            }
        }
        Update::Removed(id) => println!("(unsent message {} removed)", id),
        Update::Status(status) => tracing::info!("Push channel: {:?}", status),
        Update::Error(err) if err.is_retryable() => eprintln!("! {} (try again)", err),
        Update::Error(err) => eprintln!("! {}", err),
    }
}

/// Record from the microphone for `seconds` and send it (CLI `record`).
#[cfg(feature = "audio")]
pub async fn record(conversation: &ConversationId, seconds: u64) -> Result<()> {
    use crate::api::ChatBackend;

    let client = BaasClient::new().await?;
    let mic = voice::default_microphone()?;
    let recorder = voice::VoiceRecorder::start(mic)?;
    println!("Recording for {}s...", seconds);
    tokio::time::sleep(std::time::Duration::from_secs(seconds)).await;
    let (clip, secs) = recorder.stop()?;

    let user_id = client.user_id().to_string();
    let msg = client
        .send_voice_message(conversation, &user_id, &clip, secs)
        .await?;
    println!("Sent: {}", format_message(&msg));
    Ok(())
}
