use approx::assert_abs_diff_eq;
use bankedge::capture::{Microphone, MicrophoneSource};
use bankedge::error::{DeviceError, SessionError};
use bankedge::events::{self, Epoch, EventReceiver, EventSender, SessionEvent};
use bankedge::pcm;
use bankedge::persona::Persona;
use bankedge::runner::{self, Control};
use bankedge::session::{SessionParts, SessionState, VoiceSession};
use bankedge::speaker::{Speaker, SpeakerSource};
use bankedge::transport::{ConnectTicket, Connector, LiveLink, TransportError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const CHUNK_LEVELS: [f32; 3] = [0.1, -0.2, 0.3];

#[derive(Debug, Default)]
struct Rig {
    now: f64,
    deny_microphone: bool,
    mic_running: bool,
    sent: Vec<String>,
    played: Vec<(u64, usize, f64)>,
    link_closed: bool,
    speaker_closed: bool,
}

type Shared = Arc<Mutex<Rig>>;

/// Posts three full capture callbacks as soon as it is started.
struct ScriptedMic(Shared);

impl Microphone for ScriptedMic {
    fn start(&mut self, epoch: Epoch, events: EventSender) -> Result<(), DeviceError> {
        self.0.lock().unwrap().mic_running = true;
        for level in CHUNK_LEVELS {
            let samples = vec![level; pcm::CAPTURE_CHUNK_SAMPLES];
            events
                .send(SessionEvent::InputChunk { epoch, samples })
                .map_err(|_| DeviceError::Disconnected("queue closed".to_string()))?;
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.0.lock().unwrap().mic_running = false;
    }
}

struct ScriptedMicSource(Shared);

impl MicrophoneSource for ScriptedMicSource {
    fn acquire(&self) -> Result<Box<dyn Microphone>, DeviceError> {
        if self.0.lock().unwrap().deny_microphone {
            return Err(DeviceError::PermissionDenied);
        }
        Ok(Box::new(ScriptedMic(self.0.clone())))
    }
}

struct ManualClockSpeaker(Shared);

impl Speaker for ManualClockSpeaker {
    fn current_time(&self) -> f64 {
        self.0.lock().unwrap().now
    }

    fn play(&mut self, id: u64, samples: Vec<f32>, start_at: f64) {
        self.0.lock().unwrap().played.push((id, samples.len(), start_at));
    }

    fn stop(&mut self, _id: u64) {}

    fn close(&mut self) {
        self.0.lock().unwrap().speaker_closed = true;
    }
}

struct ManualClockSpeakerSource(Shared);

impl SpeakerSource for ManualClockSpeakerSource {
    fn open(&self, _epoch: Epoch, _events: EventSender) -> Result<Box<dyn Speaker>, DeviceError> {
        Ok(Box::new(ManualClockSpeaker(self.0.clone())))
    }
}

#[derive(Debug)]
struct RecordingLink(Shared);

impl LiveLink for RecordingLink {
    fn send_audio(&mut self, data: String) -> Result<(), TransportError> {
        self.0.lock().unwrap().sent.push(data);
        Ok(())
    }

    fn close(&mut self) {
        self.0.lock().unwrap().link_closed = true;
    }
}

/// Opens instantly.
struct InstantConnector(Shared);

impl Connector for InstantConnector {
    fn connect(&self, epoch: Epoch, _persona: &Persona, events: EventSender) -> ConnectTicket {
        let link = Box::new(RecordingLink(self.0.clone()));
        let _ = events.send(SessionEvent::Opened { epoch, link });
        ConnectTicket::detached()
    }
}

fn rig() -> (VoiceSession, Shared, EventSender, EventReceiver) {
    let shared: Shared = Arc::default();
    let (tx, rx) = events::channel();
    let parts = SessionParts {
        microphones: Box::new(ScriptedMicSource(shared.clone())),
        speakers: Box::new(ManualClockSpeakerSource(shared.clone())),
        connector: Box::new(InstantConnector(shared.clone())),
    };
    (VoiceSession::new(parts, tx.clone()), shared, tx, rx)
}

fn drain(session: &mut VoiceSession, rx: &mut EventReceiver) {
    while let Ok(event) = rx.try_recv() {
        session.handle(event);
    }
}

fn persona() -> Persona {
    Persona::find("hr").unwrap()
}

#[test]
fn capture_send_and_schedule_end_to_end() {
    let (mut session, shared, tx, mut rx) = rig();
    let t0 = 3.0;
    shared.lock().unwrap().now = t0;

    session.start(persona()).unwrap();
    drain(&mut session, &mut rx);
    assert_eq!(session.state(), SessionState::Live);

    let sent = shared.lock().unwrap().sent.clone();
    assert_eq!(sent.len(), 3);
    for (payload, level) in sent.iter().zip(CHUNK_LEVELS) {
        assert_eq!(payload.len(), 10_924);
        let decoded = pcm::decode_base64_chunk(payload).unwrap();
        assert_eq!(decoded.len(), pcm::CAPTURE_CHUNK_SAMPLES);
        assert_abs_diff_eq!(decoded[0], level, epsilon = 1.0 / 32768.0);
    }

    // 0.2s at 24 kHz.
    let samples = 4800;
    let d = pcm::chunk_duration(samples, pcm::OUTPUT_SAMPLE_RATE);
    let epoch = session.epoch();
    tx.send(SessionEvent::OutputAudio { epoch, pcm: vec![0; samples * 2] })
        .unwrap();
    drain(&mut session, &mut rx);

    shared.lock().unwrap().now = t0 + d / 2.0;
    tx.send(SessionEvent::OutputAudio { epoch, pcm: vec![0; samples * 2] })
        .unwrap();
    drain(&mut session, &mut rx);

    let played = shared.lock().unwrap().played.clone();
    assert_eq!(played.len(), 2);
    assert_abs_diff_eq!(played[0].2, t0);
    assert_abs_diff_eq!(played[1].2, t0 + d, epsilon = 1e-9);
    assert_eq!(played[1].1, samples);

    session.hangup();
    let r = shared.lock().unwrap();
    assert!(!r.mic_running);
    assert!(r.link_closed);
    assert!(r.speaker_closed);
}

#[tokio::test]
async fn runner_streams_until_hangup() {
    let (session, shared, tx, rx) = rig();
    drop(tx);
    let (control_tx, control_rx) = mpsc::unbounded_channel();

    let handle = tokio::spawn(runner::run(session, persona(), rx, control_rx));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while shared.lock().unwrap().sent.len() < 3 {
        assert!(tokio::time::Instant::now() < deadline, "chunks were never sent");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    control_tx.send(Control::Mute).unwrap();
    control_tx.send(Control::Hangup).unwrap();
    let stats = handle.await.unwrap().unwrap();

    assert_eq!(stats.chunks_sent, 3);
    let r = shared.lock().unwrap();
    assert!(r.link_closed);
    assert!(!r.mic_running);
}

#[tokio::test]
async fn runner_reports_denied_microphone() {
    let (session, shared, tx, rx) = rig();
    drop(tx);
    shared.lock().unwrap().deny_microphone = true;
    let (_control_tx, control_rx) = mpsc::unbounded_channel();

    let err = runner::run(session, persona(), rx, control_rx)
        .await
        .unwrap_err();
    let cause = err
        .chain()
        .find_map(|c| c.downcast_ref::<SessionError>())
        .expect("session error in chain");
    assert!(matches!(cause, SessionError::Device(DeviceError::PermissionDenied)));
}
