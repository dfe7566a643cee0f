//! Chat Sync command line.
//!
//! `chat-sync serve` runs the in-memory relay; `chat-sync chat` (the default)
//! joins it from the terminal.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use anyhow::Context;
use chat_sync::config::{AppConfig, Cli, Command};
use chat_sync::history::HttpHistoryLoader;
use chat_sync::sync::{SyncOptions, Synchronizer};
use chat_sync::transport::{ConnectionState, TransportChannel, WebSocketChannel};
use chat_sync::{Message, Snapshot, SyncError, server, telemetry};
use clap::Parser;
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    telemetry::init();

    let cli = Cli::parse();
    let config = Arc::new(AppConfig::from_cli(&cli).context("Configuration error")?);

    match cli.command.unwrap_or_default() {
        Command::Serve => server::start_server(config).await,
        Command::Chat => run_chat(&config).await,
    }
}

/// Terminal presentation layer: prints the visible sequence as it grows and
/// submits each stdin line.
async fn run_chat(config: &AppConfig) -> anyhow::Result<()> {
    let base = config.client.base_url()?;
    let history = Arc::new(HttpHistoryLoader::new(
        &base,
        config.client.history_timeout(),
    )?);
    let channel = Arc::new(WebSocketChannel::new(
        &base,
        config.client.websocket_options(),
    )?);

    info!(
        name: "chat.config.loaded",
        backend_url = %base,
        channel_url = %channel.url(),
        "Joining chat room"
    );

    let options = SyncOptions {
        history_timeout: config.client.history_timeout(),
    };
    let shared = Arc::clone(&channel) as Arc<dyn TransportChannel>;
    let sync = Synchronizer::start(history, shared, options);

    let printer = tokio::spawn(print_updates(sync.watch(), sync.connection()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) => match sync.submit(&line) {
                    Ok(()) | Err(SyncError::EmptyMessage) => {}
                    Err(e) => eprintln!("! message not sent: {e}"),
                },
                None => break,
            },
        }
    }

    sync.shutdown().await;
    channel.close().await;
    printer.abort();
    Ok(())
}

/// How to bring the terminal in line with a new visible sequence.
#[derive(Debug, PartialEq, Eq)]
enum Render {
    Unchanged,
    /// Print `messages[from..]` below what is already shown.
    Append { from: usize },
    /// Something landed before an already printed line.
    Redraw,
}

fn plan_render(shown: &[String], messages: &[Message]) -> Render {
    let prefix_intact = shown.len() <= messages.len()
        && shown.iter().zip(messages).all(|(id, m)| *id == m.id);

    if !prefix_intact {
        Render::Redraw
    } else if shown.len() == messages.len() {
        Render::Unchanged
    } else {
        Render::Append { from: shown.len() }
    }
}

fn print_message(message: &Message) {
    println!(
        "[{}] {}",
        message.created_at.format("%H:%M:%S"),
        message.text
    );
}

async fn print_updates(
    mut snapshots: watch::Receiver<Snapshot>,
    mut connection: watch::Receiver<ConnectionState>,
) {
    let mut shown: Vec<String> = Vec::new();
    let mut warned = false;

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if let (Some(warning), false) = (&snapshot.history_warning, warned) {
                    warned = true;
                    eprintln!("! history unavailable ({warning}); showing new messages only");
                }

                let from = match plan_render(&shown, &snapshot.messages) {
                    Render::Unchanged => continue,
                    Render::Append { from } => from,
                    Render::Redraw => {
                        eprintln!("--- earlier messages arrived; conversation so far ---");
                        shown.clear();
                        0
                    }
                };
                for message in &snapshot.messages[from..] {
                    print_message(message);
                    shown.push(message.id.clone());
                }
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *connection.borrow_and_update();
                eprintln!("* {state}");
            }
        }
    }
}
