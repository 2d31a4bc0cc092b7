//! Voice session state machine
//!
//! One `VoiceSession` owns every resource of a conversation: the microphone,
//! the output context, the playback queue and the Live API link. All
//! asynchronous producers post [`SessionEvent`]s to a single queue; the owner of
//! the session feeds them to [`VoiceSession::handle`] one at a time.
//!
//! ```text
//! Idle -> RequestingPermission -> Connecting -> Live -> Ended
//!                  \__________________\___________\____> Failed
//! ```

use crate::capture::{Microphone, MicrophoneSource};
use crate::error::{DeviceError, Result, SessionError};
use crate::events::{Epoch, EventSender, SessionEvent};
use crate::pcm;
use crate::persona::Persona;
use crate::playback::PlaybackQueue;
use crate::recorder::SessionRecorder;
use crate::speaker::{Speaker, SpeakerSource};
use crate::transport::{ConnectTicket, Connector, LiveLink};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    RequestingPermission,
    Connecting,
    Live,
    Ended,
    Failed,
}

impl SessionState {
    /// Holding resources or waiting to.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::RequestingPermission | Self::Connecting | Self::Live
        )
    }

    /// Reached an end state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Failed)
    }
}

/// The transport connection as seen by the session.
#[derive(Debug)]
enum Link {
    Down,
    /// Connecting; nothing can be sent yet.
    Pending(ConnectTicket),
    Up(Box<dyn LiveLink>),
}

/// Where a session gets its devices and its connection from.
pub struct SessionParts {
    pub microphones: Box<dyn MicrophoneSource>,
    pub speakers: Box<dyn SpeakerSource>,
    pub connector: Box<dyn Connector>,
}

/// Counters for one session, logged at teardown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub chunks_sent: u64,
    pub chunks_muted: u64,
    pub chunks_played: u64,
    pub interruptions: u64,
}

pub struct VoiceSession {
    parts: SessionParts,
    events: EventSender,
    state: SessionState,
    epoch: Epoch,
    persona: Option<Persona>,
    microphone: Option<Box<dyn Microphone>>,
    speaker: Option<Box<dyn Speaker>>,
    link: Link,
    playback: PlaybackQueue,
    muted: bool,
    failure: Option<SessionError>,
    stats: SessionStats,
    recording_dir: Option<PathBuf>,
    recorder: Option<SessionRecorder>,
}

impl VoiceSession {
    pub fn new(parts: SessionParts, events: EventSender) -> Self {
        Self {
            parts,
            events,
            state: SessionState::Idle,
            epoch: 0,
            persona: None,
            microphone: None,
            speaker: None,
            link: Link::Down,
            playback: PlaybackQueue::for_output(),
            muted: false,
            failure: None,
            stats: SessionStats::default(),
            recording_dir: None,
            recorder: None,
        }
    }

    /// Record every session into a timestamped directory under `dir`.
    pub fn record_to(mut self, dir: Option<PathBuf>) -> Self {
        self.recording_dir = dir;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn persona(&self) -> Option<&Persona> {
        self.persona.as_ref()
    }

    pub fn failure(&self) -> Option<&SessionError> {
        self.failure.as_ref()
    }

    /// Move the recorded failure out, leaving none.
    pub fn take_failure(&mut self) -> Option<SessionError> {
        self.failure.take()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Playback cursor on the output clock, in seconds.
    pub fn playback_cursor(&self) -> f64 {
        self.playback.cursor()
    }

    /// Times playback fell behind the clock mid-turn.
    pub fn playback_underruns(&self) -> u64 {
        self.playback.underruns()
    }

    /// Buffers scheduled and not yet finished.
    pub fn queued_buffers(&self) -> usize {
        self.playback.len()
    }

    /// Start a conversation with `persona`, tearing down any previous one.
    ///
    /// Device problems are reported here, synchronously; connection problems
    /// arrive later through the event queue.
    pub fn start(&mut self, persona: Persona) -> Result<()> {
        self.release_resources();
        self.epoch += 1;
        self.failure = None;
        self.stats = SessionStats::default();
        self.state = SessionState::RequestingPermission;
        info!(
            "Starting session {} with persona '{}' (voice {})",
            self.epoch,
            persona.name,
            persona.voice.as_str()
        );

        let microphone = match self.parts.microphones.acquire() {
            Ok(microphone) => microphone,
            Err(e) => return Err(self.fail_start(e)),
        };
        self.microphone = Some(microphone);

        let speaker = match self.parts.speakers.open(self.epoch, self.events.clone()) {
            Ok(speaker) => speaker,
            Err(e) => return Err(self.fail_start(e)),
        };
        self.speaker = Some(speaker);

        self.state = SessionState::Connecting;
        let ticket = self
            .parts
            .connector
            .connect(self.epoch, &persona, self.events.clone());
        self.link = Link::Pending(ticket);
        self.persona = Some(persona);
        Ok(())
    }

    fn fail_start(&mut self, error: DeviceError) -> SessionError {
        error!("Session {} could not start: {}", self.epoch, error);
        self.release_resources();
        self.state = SessionState::Failed;
        self.failure = Some(SessionError::Device(error.clone()));
        SessionError::Device(error)
    }

    /// End the conversation. Safe from any state, any number of times.
    pub fn hangup(&mut self) {
        let was_active = self.state.is_active();
        self.release_resources();
        if was_active {
            info!("Session hung up");
            self.state = SessionState::Ended;
        }
    }

    pub fn set_muted(&mut self, muted: bool) {
        if self.muted != muted {
            info!("Microphone {}", if muted { "muted" } else { "unmuted" });
        }
        self.muted = muted;
    }

    /// Process one event from the queue.
    pub fn handle(&mut self, event: SessionEvent) {
        if event.epoch() != self.epoch || !self.state.is_active() {
            self.discard_stale(event);
            return;
        }

        match event {
            SessionEvent::Opened { link, .. } => self.on_opened(link),
            SessionEvent::InputChunk { samples, .. } => self.on_input(samples),
            SessionEvent::OutputAudio { pcm, .. } => self.on_output(&pcm),
            SessionEvent::Interrupted { .. } => self.interrupt_playback(),
            SessionEvent::InputTranscript { text, .. } => info!("Candidate: {}", text),
            SessionEvent::OutputTranscript { text, .. } => info!("Interviewer: {}", text),
            SessionEvent::TurnComplete { .. } => {
                debug!("Interviewer turn complete");
                self.playback.end_turn();
            }
            SessionEvent::Closed { reason, .. } => {
                info!("Connection closed: {}", reason.as_deref().unwrap_or("no reason"));
                self.release_resources();
                self.state = SessionState::Ended;
            }
            SessionEvent::TransportFailed { error, .. } => self.fail(error.into()),
            SessionEvent::DeviceLost { error, .. } => self.fail(error.into()),
        }
    }

    /// Late events from a torn-down attempt must not resurrect it.
    fn discard_stale(&mut self, event: SessionEvent) {
        debug!(
            "Ignoring stale {} event (epoch {}, current {}, state {:?})",
            event.kind(),
            event.epoch(),
            self.epoch,
            self.state
        );
        if let SessionEvent::Opened { mut link, .. } = event {
            link.close();
        }
    }

    fn on_opened(&mut self, mut link: Box<dyn LiveLink>) {
        if self.state != SessionState::Connecting {
            warn!("Unexpected open in state {:?}", self.state);
            link.close();
            return;
        }
        self.link = Link::Up(link);

        let started = match self.microphone.as_mut() {
            Some(microphone) => microphone.start(self.epoch, self.events.clone()),
            None => Err(DeviceError::Disconnected("microphone was released".to_string())),
        };
        if let Err(e) = started {
            self.fail(e.into());
            return;
        }

        let now = self.speaker.as_ref().map_or(0.0, |s| s.current_time());
        self.playback.reset(now);
        self.open_recorder();
        self.state = SessionState::Live;
        info!("Session {} is live", self.epoch);
    }

    fn open_recorder(&mut self) {
        let (Some(dir), Some(persona)) = (&self.recording_dir, &self.persona) else {
            return;
        };
        match SessionRecorder::create(dir, &persona.name) {
            Ok(recorder) => {
                info!("Session {} recording to {:?}", self.epoch, recorder.dir());
                self.recorder = Some(recorder);
            }
            Err(e) => error!("Recording disabled: {}", e),
        }
    }

    fn on_input(&mut self, samples: Vec<f32>) {
        if self.state != SessionState::Live {
            return;
        }
        if self.muted {
            self.stats.chunks_muted += 1;
            return;
        }

        let pcm16 = pcm::float_to_pcm16(&samples);
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.on_input(&pcm16);
        }
        let payload = pcm::encode_pcm16(&pcm16);

        let Link::Up(link) = &mut self.link else {
            return;
        };
        match link.send_audio(payload) {
            Ok(()) => {
                self.stats.chunks_sent += 1;
                debug!("Sent input chunk of {} samples", samples.len());
            }
            Err(e) => self.fail(e.into()),
        }
    }

    fn on_output(&mut self, bytes: &[u8]) {
        if self.state != SessionState::Live {
            return;
        }
        let Some(speaker) = self.speaker.as_mut() else {
            return;
        };

        let pcm16 = pcm::bytes_to_pcm16(bytes);
        if pcm16.is_empty() {
            return;
        }
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.on_output(&pcm16);
        }

        let now = speaker.current_time();
        self.playback.reap(now);
        let slot = self.playback.schedule(pcm16.len(), now);
        speaker.play(slot.id, pcm::pcm16_to_float(&pcm16), slot.start);
        self.stats.chunks_played += 1;
        debug!(
            "Scheduled output buffer {} at {:.3}s for {:.3}s",
            slot.id,
            slot.start,
            slot.duration()
        );
    }

    /// Barge-in: silence everything queued, keep the session.
    fn interrupt_playback(&mut self) {
        let Some(speaker) = self.speaker.as_mut() else {
            return;
        };
        let now = speaker.current_time();
        let cut = self.playback.interrupt(now);
        for buffer in &cut {
            speaker.stop(buffer.id);
        }
        self.stats.interruptions += 1;
        info!("Interrupted: stopped {} queued buffers", cut.len());
    }

    /// Drop finished buffers from the playback queue.
    pub fn reap_playback(&mut self) {
        if let Some(speaker) = self.speaker.as_ref() {
            self.playback.reap(speaker.current_time());
        }
    }

    fn fail(&mut self, error: SessionError) {
        error!("Session {} failed: {}", self.epoch, error);
        self.release_resources();
        self.state = SessionState::Failed;
        self.failure = Some(error);
    }

    /// Stop the microphone, cut playback, close the speaker and the link.
    /// Idempotent; bumps the epoch so anything still in flight is stale.
    fn release_resources(&mut self) {
        let held = self.microphone.is_some()
            || self.speaker.is_some()
            || !matches!(self.link, Link::Down);

        if let Some(mut microphone) = self.microphone.take() {
            microphone.stop();
        }

        if let Some(mut speaker) = self.speaker.take() {
            let now = speaker.current_time();
            for buffer in self.playback.interrupt(now) {
                speaker.stop(buffer.id);
            }
            speaker.close();
        }
        self.playback.reset(0.0);

        match std::mem::replace(&mut self.link, Link::Down) {
            Link::Up(mut link) => link.close(),
            Link::Pending(ticket) => ticket.cancel(),
            Link::Down => {}
        }

        if let Some(mut recorder) = self.recorder.take() {
            recorder.finish();
        }

        if held {
            self.epoch += 1;
            info!(
                "Session resources released (sent {}, muted {}, played {}, interruptions {})",
                self.stats.chunks_sent,
                self.stats.chunks_muted,
                self.stats.chunks_played,
                self.stats.interruptions
            );
        }
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.release_resources();
    }
}
