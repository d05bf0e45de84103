use std::{
    io::{self, Write},
    path::PathBuf,
    time::Duration,
};

use anyhow::{Context, Result};
use chat_core::{build_responder, ChatController, ChatEvent, SubmitOutcome};
use clap::{Parser, Subcommand};
use scramble::ScrambleEngine;
use shared::domain::{ChatMessage, Role};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::{self, error::TryRecvError},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, DEFAULT_CONFIG_PATH};

/// Pause between a finished reveal and the simulated hover that replays it.
const REPLAY_PAUSE: Duration = Duration::from_millis(400);

#[derive(Parser, Debug)]
#[command(name = "landing", about = "Landing page text effects and site assistant")]
struct Cli {
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Animate TEXT resolving out of glyph noise.
    Scramble {
        text: String,
        #[arg(long)]
        tick_ms: Option<u64>,
        #[arg(long)]
        rate: Option<f64>,
        /// Extra runs, as if the pointer entered the text again.
        #[arg(long, default_value_t = 0)]
        replays: u32,
    },
    /// Send one message to the assistant and print the transcript.
    Ask {
        text: String,
        #[arg(long)]
        json: bool,
    },
    /// Interactive chat over stdin. `/quit` exits.
    Chat,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings(&cli.config)?;

    match cli.command {
        Command::Scramble {
            text,
            tick_ms,
            rate,
            replays,
        } => {
            if let Some(v) = tick_ms {
                settings.scramble_tick_ms = v;
            }
            if let Some(v) = rate {
                settings.scramble_resolve_rate = v;
            }
            run_scramble(&settings, &text, replays).await
        }
        Command::Ask { text, json } => {
            let controller = build_controller(&settings)?;
            if let SubmitOutcome::Ignored(code) = controller.submit(&text).await {
                anyhow::bail!("message not sent: {code:?}");
            }
            let transcript = controller.transcript();
            if json {
                println!("{}", serde_json::to_string_pretty(&transcript)?);
            } else {
                for message in &transcript {
                    print_message(message);
                }
            }
            Ok(())
        }
        Command::Chat => run_chat(&settings).await,
    }
}

fn build_controller(settings: &config::Settings) -> Result<ChatController> {
    let responder = build_responder(settings.api_key(), settings.gemini_options())?;
    Ok(ChatController::with_greeting(
        responder,
        settings.greeting.clone(),
    ))
}

async fn run_scramble(settings: &config::Settings, text: &str, replays: u32) -> Result<()> {
    let scramble_config = settings
        .scramble_config()
        .context("invalid scramble timing")?;
    let (mut engine, mut frames) = ScrambleEngine::new(scramble_config)?;

    if !engine.start(text) {
        warn!("scramble: nothing to animate");
        return Ok(());
    }

    let mut remaining = replays;
    let mut stdout = io::stdout();
    while let Some(frame) = frames.recv().await {
        write!(stdout, "\r{}", frame.text)?;
        stdout.flush()?;

        if !frame.is_final {
            continue;
        }
        if remaining == 0 {
            break;
        }
        remaining -= 1;
        tokio::time::sleep(REPLAY_PAUSE).await;
        engine.retrigger();
    }
    writeln!(stdout)?;

    info!("scramble: done generation={}", engine.generation());
    Ok(())
}

async fn run_chat(settings: &config::Settings) -> Result<()> {
    let controller = build_controller(settings)?;
    let mut events = controller.subscribe_events();

    for message in controller.transcript() {
        print_message(&message);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim() == "/quit" {
            break;
        }

        controller.submit(&line).await;
        render_events(&mut events);
    }

    Ok(())
}

/// Prints assistant messages appended since the last call; the user's own
/// lines are already on screen.
fn render_events(events: &mut broadcast::Receiver<ChatEvent>) {
    loop {
        match events.try_recv() {
            Ok(ChatEvent::MessageAppended { message, .. }) if !message.is_user() => {
                print_message(&message);
            }
            Ok(_) => {}
            Err(TryRecvError::Lagged(skipped)) => {
                warn!("chat: view fell behind skipped={skipped}");
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
}

fn print_message(message: &ChatMessage) {
    let label = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    println!("[{label}] {}", message.text);
}
