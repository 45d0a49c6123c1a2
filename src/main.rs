//! RhoVoice - talk to a hosted voice agent from the terminal
//!
//! Speak into the default microphone; the agent answers through the default
//! speaker. Lines typed on stdin are sent as user messages, and a few slash
//! commands control the session:
//!
//! ```text
//! /interrupt         stop the agent mid-sentence
//! /prompt <text>     replace the agent's instructions
//! /voice <model>     switch the speech voice
//! /say <text>        make the agent say something
//! /volume <gain>     playback gain, 1.0 is unchanged
//! /quit              hang up
//! ```

use anyhow::{Context, Result};
use rhovoice::protocol::Role;
use rhovoice::pulse::PulseBackend;
use rhovoice::{AgentOptions, Callbacks, Session, SessionConfig, StaticToken, WsConnector};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    info!("Starting rhovoice");

    let api_key = std::env::var("DEEPGRAM_API_KEY").context("DEEPGRAM_API_KEY must be set")?;
    let options = AgentOptions::from_env()?;
    let config = SessionConfig::from_env()?;

    let backend = PulseBackend {
        input_device: std::env::var("RHOVOICE_INPUT_DEVICE").ok(),
        output_device: std::env::var("RHOVOICE_OUTPUT_DEVICE").ok(),
        ..Default::default()
    };

    let callbacks = Callbacks::new()
        .on_connection_state(|state| info!("🔌 Connection: {}", state))
        .on_agent_state(|state| info!("🤖 Agent: {}", state))
        .on_user_transcript(|text, is_final| {
            if is_final {
                println!("you> {}", text);
            }
        })
        .on_agent_utterance(|text| println!("agent> {}", text))
        .on_error(|e| error!("❌ {}", e));

    let mut session = Session::new(
        Arc::new(backend),
        Arc::new(WsConnector::default()),
        Arc::new(StaticToken::new(api_key)),
        config,
        callbacks,
    );
    session.connect(options)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, hanging up");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                if !run_command(&session, line.trim()) {
                    break;
                }
            }
        }
    }

    session.disconnect().await;

    println!("\n--- transcript ---");
    for entry in session.transcript() {
        let who = match entry.role {
            Role::User => "you",
            Role::Assistant => "agent",
        };
        println!("{}> {}", who, entry.text);
    }
    info!("rhovoice stopped");
    Ok(())
}

/// Returns false when the user asked to quit.
fn run_command(session: &Session, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }
    let (command, arg) = match line.split_once(' ') {
        Some((command, arg)) => (command, arg.trim()),
        None => (line, ""),
    };
    let result = match command {
        "/quit" | "/exit" => return false,
        "/interrupt" => session.interrupt(),
        "/prompt" => session.update_prompt(arg),
        "/voice" => session.update_voice(arg),
        "/say" => session.inject_agent_message(arg),
        "/volume" => match arg.parse::<f32>() {
            Ok(gain) => {
                session.set_volume(gain);
                Ok(())
            }
            Err(_) => {
                warn!("Usage: /volume <gain>");
                Ok(())
            }
        },
        _ if command.starts_with('/') => {
            warn!("Unknown command: {}", command);
            Ok(())
        }
        _ => session.inject_message(line),
    };
    if let Err(e) = result {
        warn!("{}", e);
    }
    true
}
