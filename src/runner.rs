//! Session runner - drains the event queue into the session state machine

use crate::events::EventReceiver;
use crate::persona::Persona;
use crate::session::{SessionState, SessionStats, VoiceSession};
use anyhow::{anyhow, Context, Result};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

/// User commands from the terminal or a signal handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Mute,
    Unmute,
    Hangup,
}

impl Control {
    /// Parse one line typed at the prompt.
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "mute" | "m" => Some(Self::Mute),
            "unmute" | "u" => Some(Self::Unmute),
            "hangup" | "quit" | "q" | "exit" => Some(Self::Hangup),
            _ => None,
        }
    }
}

/// Start `persona` and run the session until it ends.
///
/// Events are handled before control commands so that anything already queued
/// is processed in order before a hangup takes effect.
pub async fn run(
    mut session: VoiceSession,
    persona: Persona,
    mut events: EventReceiver,
    mut control: mpsc::UnboundedReceiver<Control>,
) -> Result<SessionStats> {
    session
        .start(persona)
        .context("could not start the interview")?;

    let mut reaper = interval(Duration::from_millis(100));
    reaper.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut stats_ticker = interval(Duration::from_secs(30));
    let mut control_open = true;

    while !session.state().is_terminal() {
        tokio::select! {
            biased;

            event = events.recv() => {
                let Some(event) = event else {
                    // The session holds a sender, so this only happens if it was dropped.
                    break;
                };
                session.handle(event);
            }

            command = control.recv(), if control_open => {
                match command {
                    Some(Control::Mute) => session.set_muted(true),
                    Some(Control::Unmute) => session.set_muted(false),
                    Some(Control::Hangup) => session.hangup(),
                    None => {
                        debug!("Control channel closed");
                        control_open = false;
                    }
                }
            }

            _ = reaper.tick() => session.reap_playback(),

            _ = stats_ticker.tick() => {
                let stats = session.stats();
                info!(
                    "📊 state {:?}, sent {}, muted {}, played {}, queued {}, underruns {}",
                    session.state(),
                    stats.chunks_sent,
                    stats.chunks_muted,
                    stats.chunks_played,
                    session.queued_buffers(),
                    session.playback_underruns()
                );
            }
        }
    }

    let stats = session.stats();
    match session.state() {
        SessionState::Failed => {
            let failure = session
                .take_failure()
                .map(anyhow::Error::new)
                .unwrap_or_else(|| anyhow!("session failed"));
            Err(failure.context("interview ended with an error"))
        }
        state => {
            info!("Session finished in state {:?}", state);
            Ok(stats)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_terminal_commands() {
        assert_eq!(Control::parse("mute"), Some(Control::Mute));
        assert_eq!(Control::parse("  UNMUTE \n"), Some(Control::Unmute));
        assert_eq!(Control::parse("quit"), Some(Control::Hangup));
        assert_eq!(Control::parse("hangup"), Some(Control::Hangup));
        assert_eq!(Control::parse("hello"), None);
        assert_eq!(Control::parse(""), None);
    }
}
