//! BankEdge Voice - terminal interview simulator
//!
//! Pick a persona, talk, and the interviewer answers through the speakers.
//! Type `mute`, `unmute` or `hangup` at the prompt; Ctrl-C also hangs up.

#![forbid(unsafe_code)]

use anyhow::{bail, Context, Result};
use bankedge::capture::PulseMicrophoneSource;
use bankedge::config::Config;
use bankedge::device;
use bankedge::error::{DeviceError, SessionError};
use bankedge::events;
use bankedge::persona::{Persona, Voice};
use bankedge::runner::{self, Control};
use bankedge::session::{SessionParts, VoiceSession};
use bankedge::speaker::PulseSpeakerSource;
use bankedge::transport::GeminiConnector;
use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const APP_NAME: &str = "bankedge";

#[derive(Debug, Parser)]
#[command(name = "bankedge", about = "Voice mock interviews for bank recruitment exams")]
struct Args {
    /// Built-in persona: hr, awareness or stress
    #[arg(short, long, default_value = "hr")]
    persona: String,

    /// Custom system instruction; replaces the persona's own
    #[arg(long)]
    instruction: Option<String>,

    /// Interviewer voice (Puck, Charon, Kore, Fenrir, Aoede)
    #[arg(long)]
    voice: Option<String>,

    /// PulseAudio source to record from instead of the default
    #[arg(short, long)]
    device: Option<String>,

    /// Save input.wav and output.wav for each session under this directory
    #[arg(long)]
    record: Option<PathBuf>,

    /// Start with the microphone muted
    #[arg(long)]
    muted: bool,

    /// List input devices and personas, then exit
    #[arg(long)]
    list: bool,
}

fn resolve_persona(args: &Args) -> Result<Persona> {
    let mut persona = match Persona::find(&args.persona) {
        Some(persona) => persona,
        None if args.instruction.is_some() => Persona::new(args.persona.clone(), "", Voice::Puck),
        None => bail!(
            "unknown persona '{}' (try --list, or pass --instruction for a custom one)",
            args.persona
        ),
    };
    if let Some(instruction) = &args.instruction {
        persona.system_instruction = instruction.clone();
    }
    if let Some(name) = &args.voice {
        let voice = Voice::parse(name).with_context(|| format!("unknown voice '{name}'"))?;
        persona = persona.with_voice(voice);
    }
    Ok(persona)
}

fn print_listing() {
    println!("Personas:");
    for persona in Persona::builtin() {
        println!("  {:<10} voice {}", persona.name, persona.voice.as_str());
    }
    println!();
    println!("Input devices:");
    match device::list_input_devices() {
        Ok(devices) if devices.is_empty() => println!("  (none found)"),
        Ok(devices) => {
            for d in devices {
                println!("  {} ({}, {} Hz, {} ch)", d.name, d.description, d.sample_rate, d.channels);
            }
        }
        Err(e) => println!("  could not list devices: {e}"),
    }
}

/// Turn a terse device error into something a candidate can act on.
fn explain(error: &DeviceError) -> &'static str {
    match error {
        DeviceError::PermissionDenied => "Allow this program to use the microphone and try again.",
        DeviceError::NoDevice => "Plug in a microphone, or pick one with --device (see --list).",
        DeviceError::DeviceBusy => "Close other programs using the microphone and try again.",
        DeviceError::ConstraintsUnsatisfiable(_) => {
            "The device cannot record 16 kHz mono audio; pick another with --device."
        }
        DeviceError::Disconnected(_) | DeviceError::Other(_) => "Check the sound server and retry.",
    }
}

fn spawn_stdin_controls(control_tx: mpsc::UnboundedSender<Control>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match Control::parse(&line) {
                Some(command) => {
                    let hangup = command == Control::Hangup;
                    if control_tx.send(command).is_err() || hangup {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => println!("Commands: mute, unmute, hangup"),
            }
        }
    });
}

fn spawn_ctrl_c(control_tx: mpsc::UnboundedSender<Control>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, hanging up");
            let _ = control_tx.send(Control::Hangup);
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bankedge=info")),
        )
        .init();

    let args = Args::parse();
    if args.list {
        print_listing();
        return Ok(());
    }

    let persona = resolve_persona(&args)?;
    let config = Config::from_env()?;
    info!("Starting BankEdge interview with persona '{}'", persona.name);

    let (events_tx, events_rx) = events::channel();
    let parts = SessionParts {
        microphones: Box::new(PulseMicrophoneSource::new(APP_NAME).with_device(args.device.clone())),
        speakers: Box::new(PulseSpeakerSource::new(APP_NAME)),
        connector: Box::new(GeminiConnector::new(config)),
    };
    let mut session = VoiceSession::new(parts, events_tx).record_to(args.record.clone());
    if args.muted {
        session.set_muted(true);
    }

    let (control_tx, control_rx) = mpsc::unbounded_channel();
    spawn_stdin_controls(control_tx.clone());
    spawn_ctrl_c(control_tx);

    println!("Interview starting. Commands: mute, unmute, hangup.");
    match runner::run(session, persona, events_rx, control_rx).await {
        Ok(stats) => {
            info!(
                "Interview over: {} chunks sent, {} played, {} interruptions",
                stats.chunks_sent, stats.chunks_played, stats.interruptions
            );
            Ok(())
        }
        Err(e) => {
            let device_error = e.chain().find_map(|c| match c.downcast_ref::<SessionError>() {
                Some(SessionError::Device(d)) => Some(d),
                _ => None,
            });
            if let Some(device_error) = device_error {
                error!("{}", device_error);
                warn!("{}", explain(device_error));
            }
            Err(e)
        }
    }
}
